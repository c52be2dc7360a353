//! Outbound message facade.
//!
//! Application code sends through a session's [`BasicRemote`] (returns when
//! the frame is handed to the transport) or [`AsyncRemote`] (returns a
//! [`SendFuture`] or reports to a completion callback). Objects are encoded
//! with the endpoint's [`CoderRegistry`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use crate::coder::{CoderRegistry, Encoded};
use crate::error::{CloseReason, WsError, WsResult};
use crate::message::Message;
use crate::monitor::EndpointStats;
use crate::types::Value;

/// Largest payload a ping or pong frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// The transport side of one connection.
///
/// Implementations queue frames for the wire; they must not block on I/O.
pub trait Connection: Send + Sync {
    /// Send a whole message or control frame.
    fn send(&self, message: Message) -> WsResult<()>;

    /// Send one fragment of a text message.
    fn send_partial_text(&self, fragment: &str, last: bool) -> WsResult<()>;

    /// Send one fragment of a binary message.
    fn send_partial_binary(&self, fragment: &[u8], last: bool) -> WsResult<()>;

    /// Start the closing handshake.
    fn close(&self, reason: CloseReason) -> WsResult<()>;
}

struct RemoteInner {
    connection: Arc<dyn Connection>,
    coders: Arc<CoderRegistry>,
    stats: Arc<EndpointStats>,
    batching: AtomicBool,
    batch: Mutex<Vec<Message>>,
}

impl RemoteInner {
    fn send(&self, message: Message) -> WsResult<()> {
        let kind = message.kind();
        let len = message.len();
        if self.batching.load(Ordering::Acquire) && !message.is_control() {
            self.batch.lock().push(message);
        } else {
            self.connection.send(message)?;
        }
        self.stats.message_sent(kind, len);
        Ok(())
    }

    fn send_object(&self, value: &Value) -> WsResult<()> {
        match self.coders.encode(value)? {
            Encoded::Text(text) => self.send(Message::Text(text)),
            Encoded::Binary(data) => self.send(Message::Binary(data)),
        }
    }

    fn send_partial_text(&self, fragment: &str, last: bool) -> WsResult<()> {
        self.connection.send_partial_text(fragment, last)?;
        self.stats.message_sent("text", fragment.len());
        Ok(())
    }

    fn send_partial_binary(&self, fragment: &[u8], last: bool) -> WsResult<()> {
        self.connection.send_partial_binary(fragment, last)?;
        self.stats.message_sent("binary", fragment.len());
        Ok(())
    }

    fn send_control(&self, kind: &'static str, data: Bytes, build: fn(Bytes) -> Message) -> WsResult<()> {
        if data.len() > MAX_CONTROL_PAYLOAD {
            return Err(WsError::PayloadTooLarge { kind });
        }
        self.send(build(data))
    }

    fn flush(&self) -> WsResult<()> {
        let pending = std::mem::take(&mut *self.batch.lock());
        trace!(count = pending.len(), "Flushing batch");
        for message in pending {
            self.connection.send(message)?;
        }
        Ok(())
    }
}

/// Creates the remotes of one session.
pub(crate) fn remotes(
    connection: Arc<dyn Connection>,
    coders: Arc<CoderRegistry>,
    stats: Arc<EndpointStats>,
) -> (BasicRemote, AsyncRemote) {
    let inner = Arc::new(RemoteInner {
        connection,
        coders,
        stats,
        batching: AtomicBool::new(false),
        batch: Mutex::new(Vec::new()),
    });
    (
        BasicRemote {
            inner: Arc::clone(&inner),
        },
        AsyncRemote { inner },
    )
}

/// Sends and returns once the frame is queued.
#[derive(Clone)]
pub struct BasicRemote {
    inner: Arc<RemoteInner>,
}

impl BasicRemote {
    /// Send a text message.
    pub fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        self.inner.send(Message::Text(text.into()))
    }

    /// Send a binary message.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> WsResult<()> {
        self.inner.send(Message::Binary(data.into()))
    }

    /// Send one fragment of a text message.
    pub fn send_partial_text(&self, fragment: &str, last: bool) -> WsResult<()> {
        self.inner.send_partial_text(fragment, last)
    }

    /// Send one fragment of a binary message.
    pub fn send_partial_binary(&self, fragment: &[u8], last: bool) -> WsResult<()> {
        self.inner.send_partial_binary(fragment, last)
    }

    /// Encode and send a value.
    ///
    /// Fails with [`WsError::EncodeFailed`] when encoding fails.
    pub fn send_object(&self, value: &Value) -> WsResult<()> {
        self.inner.send_object(value)
    }

    /// Send a ping. The payload may not exceed 125 bytes.
    pub fn send_ping(&self, data: impl Into<Bytes>) -> WsResult<()> {
        self.inner.send_control("Ping", data.into(), Message::Ping)
    }

    /// Send an unsolicited pong. The payload may not exceed 125 bytes.
    pub fn send_pong(&self, data: impl Into<Bytes>) -> WsResult<()> {
        self.inner.send_control("Pong", data.into(), Message::Pong)
    }

    /// Allow or forbid batching. Turning batching off flushes the batch.
    pub fn set_batching_allowed(&self, allowed: bool) -> WsResult<()> {
        let was = self.inner.batching.swap(allowed, Ordering::AcqRel);
        if was && !allowed {
            self.inner.flush()?;
        }
        Ok(())
    }

    /// Whether batching is allowed.
    pub fn batching_allowed(&self) -> bool {
        self.inner.batching.load(Ordering::Acquire)
    }

    /// Send every batched message.
    pub fn flush_batch(&self) -> WsResult<()> {
        self.inner.flush()
    }
}

impl fmt::Debug for BasicRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicRemote")
            .field("batching", &self.batching_allowed())
            .finish_non_exhaustive()
    }
}

/// Completion of an asynchronous send.
///
/// Resolves to the send result once the frame has been handed to the
/// transport.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct SendFuture {
    result: Option<WsResult<()>>,
}

impl SendFuture {
    fn ready(result: WsResult<()>) -> Self {
        Self {
            result: Some(result),
        }
    }

    /// True until the result has been taken by polling.
    pub fn is_done(&self) -> bool {
        self.result.is_some()
    }
}

impl Future for SendFuture {
    type Output = WsResult<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.result.take() {
            Some(result) => Poll::Ready(result),
            None => Poll::Ready(Err(WsError::send_failed("send future polled after completion"))),
        }
    }
}

/// Sends without waiting for the caller.
#[derive(Clone)]
pub struct AsyncRemote {
    inner: Arc<RemoteInner>,
}

impl AsyncRemote {
    /// Send a text message.
    pub fn send_text(&self, text: impl Into<String>) -> SendFuture {
        SendFuture::ready(self.inner.send(Message::Text(text.into())))
    }

    /// Send a text message and report the result to `handler`.
    pub fn send_text_with_handler<F>(&self, text: impl Into<String>, handler: F)
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        handler(self.inner.send(Message::Text(text.into())));
    }

    /// Send a binary message.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> SendFuture {
        SendFuture::ready(self.inner.send(Message::Binary(data.into())))
    }

    /// Send a binary message and report the result to `handler`.
    pub fn send_binary_with_handler<F>(&self, data: impl Into<Bytes>, handler: F)
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        handler(self.inner.send(Message::Binary(data.into())));
    }

    /// Send one fragment of a text message.
    pub fn send_partial_text(&self, fragment: &str, last: bool) -> SendFuture {
        SendFuture::ready(self.inner.send_partial_text(fragment, last))
    }

    /// Send one fragment of a text message, reporting the result to `handler`.
    pub fn send_partial_text_with_handler<F>(&self, fragment: &str, last: bool, handler: F)
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        handler(self.inner.send_partial_text(fragment, last));
    }

    /// Send one fragment of a binary message.
    pub fn send_partial_binary(&self, fragment: &[u8], last: bool) -> SendFuture {
        SendFuture::ready(self.inner.send_partial_binary(fragment, last))
    }

    /// Send one fragment of a binary message, reporting the result to
    /// `handler`.
    pub fn send_partial_binary_with_handler<F>(&self, fragment: &[u8], last: bool, handler: F)
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        handler(self.inner.send_partial_binary(fragment, last));
    }

    /// Encode and send a value.
    pub fn send_object(&self, value: &Value) -> SendFuture {
        SendFuture::ready(self.inner.send_object(value))
    }

    /// Encode and send a value, reporting the result to `handler`.
    pub fn send_object_with_handler<F>(&self, value: &Value, handler: F)
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        handler(self.inner.send_object(value));
    }

    /// Send a ping. The payload may not exceed 125 bytes.
    pub fn send_ping(&self, data: impl Into<Bytes>) -> SendFuture {
        SendFuture::ready(self.inner.send_control("Ping", data.into(), Message::Ping))
    }

    /// Send a ping, reporting the result to `handler`.
    pub fn send_ping_with_handler<F>(&self, data: impl Into<Bytes>, handler: F)
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        handler(self.inner.send_control("Ping", data.into(), Message::Ping));
    }

    /// Send an unsolicited pong. The payload may not exceed 125 bytes.
    pub fn send_pong(&self, data: impl Into<Bytes>) -> SendFuture {
        SendFuture::ready(self.inner.send_control("Pong", data.into(), Message::Pong))
    }

    /// Send an unsolicited pong, reporting the result to `handler`.
    pub fn send_pong_with_handler<F>(&self, data: impl Into<Bytes>, handler: F)
    where
        F: FnOnce(WsResult<()>) + Send + 'static,
    {
        handler(self.inner.send_control("Pong", data.into(), Message::Pong));
    }

    /// Send every batched message.
    pub fn flush_batch(&self) -> WsResult<()> {
        self.inner.flush()
    }
}

impl fmt::Debug for AsyncRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRemote").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloseCode;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Message>>,
        fragments: Mutex<Vec<(String, bool)>>,
        binary_fragments: Mutex<Vec<(Vec<u8>, bool)>>,
    }

    impl Connection for Recorder {
        fn send(&self, message: Message) -> WsResult<()> {
            self.sent.lock().push(message);
            Ok(())
        }

        fn send_partial_text(&self, fragment: &str, last: bool) -> WsResult<()> {
            self.fragments.lock().push((fragment.to_string(), last));
            Ok(())
        }

        fn send_partial_binary(&self, fragment: &[u8], last: bool) -> WsResult<()> {
            self.binary_fragments.lock().push((fragment.to_vec(), last));
            Ok(())
        }

        fn close(&self, reason: CloseReason) -> WsResult<()> {
            self.sent.lock().push(Message::Close(Some(reason)));
            Ok(())
        }
    }

    fn setup() -> (Arc<Recorder>, BasicRemote, AsyncRemote, Arc<EndpointStats>) {
        let recorder = Arc::new(Recorder::default());
        let stats = Arc::new(EndpointStats::new("/test"));
        let (basic, async_remote) = remotes(
            Arc::clone(&recorder) as Arc<dyn Connection>,
            Arc::new(CoderRegistry::default()),
            Arc::clone(&stats),
        );
        (recorder, basic, async_remote, stats)
    }

    #[test]
    fn test_send_text_and_object() {
        let (recorder, basic, _, stats) = setup();
        basic.send_text("hi").unwrap();
        basic.send_object(&Value::Integer(42)).unwrap();
        basic.send_object(&Value::from(vec![1u8])).unwrap();

        let sent = recorder.sent.lock().clone();
        assert_eq!(
            sent,
            vec![
                Message::text("hi"),
                Message::text("42"),
                Message::binary(vec![1u8])
            ]
        );
        assert_eq!(stats.snapshot().messages_sent, 3);
    }

    #[test]
    fn test_control_payload_limit() {
        let (recorder, basic, async_remote, _) = setup();
        basic.send_ping(vec![0u8; 125]).unwrap();
        let err = basic.send_pong(vec![0u8; 126]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Pong message exceeded the maximum allowed payload of 125 bytes."
        );
        let err = tokio_test::block_on(async_remote.send_ping(vec![0u8; 200])).unwrap_err();
        assert!(matches!(err, WsError::PayloadTooLarge { kind: "Ping" }));
        assert_eq!(recorder.sent.lock().len(), 1);
    }

    #[test]
    fn test_batching_defers_until_flush() {
        let (recorder, basic, _, _) = setup();
        basic.set_batching_allowed(true).unwrap();
        basic.send_text("a").unwrap();
        basic.send_text("b").unwrap();
        basic.send_ping(Bytes::new()).unwrap();
        assert_eq!(recorder.sent.lock().len(), 1);

        basic.set_batching_allowed(false).unwrap();
        let sent = recorder.sent.lock().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], Message::text("a"));
        assert_eq!(sent[2], Message::text("b"));
    }

    #[test]
    fn test_partial_sends_reach_connection() {
        let (recorder, basic, _, _) = setup();
        basic.send_partial_text("ab", false).unwrap();
        basic.send_partial_text("cd", true).unwrap();
        assert_eq!(
            recorder.fragments.lock().clone(),
            vec![("ab".to_string(), false), ("cd".to_string(), true)]
        );
    }

    #[test]
    fn test_send_future_resolves() {
        let (recorder, _, async_remote, _) = setup();
        let future = async_remote.send_text("later");
        assert!(future.is_done());
        tokio_test::block_on(future).unwrap();
        assert_eq!(recorder.sent.lock()[0], Message::text("later"));
    }

    #[test]
    fn test_completion_handler_invoked() {
        let (_, _, async_remote, _) = setup();
        let (tx, rx) = std::sync::mpsc::channel();
        async_remote.send_binary_with_handler(vec![1u8, 2], move |result| {
            let _ = tx.send(result.is_ok());
        });
        assert!(rx.recv().unwrap());
    }

    #[tokio::test]
    async fn test_async_partial_sends() {
        let (recorder, _, async_remote, stats) = setup();
        async_remote.send_partial_text("ab", false).await.unwrap();
        async_remote.send_partial_binary(&[1, 2], false).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        async_remote.send_partial_text_with_handler("cd", true, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap().unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        async_remote.send_partial_binary_with_handler(&[3], true, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap().unwrap();

        assert_eq!(
            recorder.fragments.lock().clone(),
            vec![("ab".to_string(), false), ("cd".to_string(), true)]
        );
        assert_eq!(
            recorder.binary_fragments.lock().clone(),
            vec![(vec![1, 2], false), (vec![3], true)]
        );
        assert_eq!(stats.snapshot().messages_sent, 4);
    }

    #[tokio::test]
    async fn test_async_control_frames_with_handler() {
        let (recorder, _, async_remote, _) = setup();

        let (tx, rx) = tokio::sync::oneshot::channel();
        async_remote.send_ping_with_handler(vec![1u8], move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap().unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        async_remote.send_pong_with_handler(vec![0u8; 126], move |result| {
            let _ = tx.send(result);
        });
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, WsError::PayloadTooLarge { kind: "Pong" }));

        async_remote.send_pong(vec![2u8]).await.unwrap();
        assert_eq!(
            recorder.sent.lock().clone(),
            vec![
                Message::Ping(Bytes::from_static(&[1])),
                Message::Pong(Bytes::from_static(&[2]))
            ]
        );
    }

    #[test]
    fn test_close_reason_passthrough() {
        let (recorder, ..) = setup();
        recorder
            .close(CloseReason::standard(CloseCode::GoingAway))
            .unwrap();
        assert!(matches!(recorder.sent.lock()[0], Message::Close(Some(_))));
    }
}
