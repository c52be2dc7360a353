//! Fragment-to-stream bridge.
//!
//! A handler declared for `Reader` or `InputStream` reads one logical
//! message as a blocking stream while its fragments are still arriving.
//! The notification side pushes fragments into a bounded single-producer,
//! single-consumer channel; the handler runs on a dedicated thread and pulls
//! from the other end, blocking until data or end of stream.
//!
//! At most [`MAX_BUFFER_SIZE`] bytes may sit unread in the channel. The
//! append that crosses the cap aborts the stream and fails with
//! [`WsError::BufferOverflow`]; the remaining fragments of that message are
//! discarded.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{WsError, WsResult};

/// Maximum number of unread bytes buffered for one streamed message.
pub const MAX_BUFFER_SIZE: usize = 8 * 1024;

const READER_THREAD_NAME: &str = "hermes-stream-reader";

#[derive(Debug)]
enum Chunk {
    Data(Bytes),
    End,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Open,
    Finished,
    Aborted,
}

/// Consumer end of a streamed message.
#[derive(Debug)]
pub struct ByteSource {
    current: Bytes,
    rx: Option<mpsc::Receiver<Chunk>>,
    buffered: Option<Arc<AtomicUsize>>,
    state: SourceState,
}

impl ByteSource {
    /// A source over an already complete payload. Never blocks.
    pub fn from_complete(data: impl Into<Bytes>) -> Self {
        Self {
            current: data.into(),
            rx: None,
            buffered: None,
            state: SourceState::Open,
        }
    }

    fn channel(rx: mpsc::Receiver<Chunk>, buffered: Arc<AtomicUsize>) -> Self {
        Self {
            current: Bytes::new(),
            rx: Some(rx),
            buffered: Some(buffered),
            state: SourceState::Open,
        }
    }

    /// Make sure `current` holds unread bytes. Returns `false` at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        while self.current.is_empty() {
            match self.state {
                SourceState::Finished => return Ok(false),
                SourceState::Aborted => return Err(overflow_error()),
                SourceState::Open => {}
            }
            let Some(rx) = self.rx.as_mut() else {
                self.state = SourceState::Finished;
                return Ok(false);
            };
            match rx.blocking_recv() {
                Some(Chunk::Data(data)) => {
                    if let Some(buffered) = &self.buffered {
                        buffered.fetch_sub(data.len(), Ordering::AcqRel);
                    }
                    self.current = data;
                }
                Some(Chunk::End) => self.state = SourceState::Finished,
                Some(Chunk::Aborted) => {
                    self.state = SourceState::Aborted;
                    return Err(overflow_error());
                }
                None => {
                    self.state = SourceState::Aborted;
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "session closed before the message was complete",
                    ));
                }
            }
        }
        Ok(true)
    }

    /// Read one byte, blocking until it arrives. `None` at end of stream.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if !self.fill()? {
            return Ok(None);
        }
        Ok(Some(self.current.get_u8()))
    }
}

impl io::Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || !self.fill()? {
            return Ok(0);
        }
        let n = buf.len().min(self.current.len());
        self.current.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

fn overflow_error() -> io::Error {
    io::Error::other(
        WsError::BufferOverflow {
            limit: MAX_BUFFER_SIZE,
        }
        .to_string(),
    )
}

/// Blocking byte stream handed to `InputStream` handlers.
#[derive(Debug)]
pub struct BinaryReader {
    source: ByteSource,
}

impl BinaryReader {
    /// Wrap a byte source.
    pub fn new(source: ByteSource) -> Self {
        Self { source }
    }

    /// A reader over a complete payload.
    pub fn from_complete(data: impl Into<Bytes>) -> Self {
        Self::new(ByteSource::from_complete(data))
    }

    /// Read one byte. `None` at end of stream.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        self.source.read_byte()
    }
}

impl io::Read for BinaryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.source.read(buf)
    }
}

/// Blocking character stream handed to `Reader` handlers.
///
/// Fragments may split a UTF-8 sequence; [`TextReader::read_char`] joins
/// the pieces back together.
#[derive(Debug)]
pub struct TextReader {
    source: ByteSource,
}

impl TextReader {
    /// Wrap a byte source carrying UTF-8 text.
    pub fn new(source: ByteSource) -> Self {
        Self { source }
    }

    /// A reader over a complete text payload.
    pub fn from_complete(text: impl Into<String>) -> Self {
        Self::new(ByteSource::from_complete(Bytes::from(text.into())))
    }

    /// Read one character. `None` at end of stream.
    pub fn read_char(&mut self) -> io::Result<Option<char>> {
        let Some(first) = self.source.read_byte()? else {
            return Ok(None);
        };
        let width = match first {
            0x00..=0x7F => return Ok(Some(char::from(first))),
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return Err(invalid_utf8()),
        };
        let mut seq = [first, 0, 0, 0];
        for slot in seq.iter_mut().take(width).skip(1) {
            *slot = self.source.read_byte()?.ok_or_else(invalid_utf8)?;
        }
        std::str::from_utf8(&seq[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .map(Some)
            .ok_or_else(invalid_utf8)
    }
}

impl io::Read for TextReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.source.read(buf)
    }
}

fn invalid_utf8() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "stream did not contain valid UTF-8")
}

#[derive(Debug)]
struct ActiveStream {
    tx: mpsc::Sender<Chunk>,
    buffered: Arc<AtomicUsize>,
}

/// Producer end of the fragment-to-stream bridge, one per session and direction.
#[derive(Debug)]
pub struct StreamBridge {
    limit: usize,
    active: Option<ActiveStream>,
    overflowed: bool,
}

impl Default for StreamBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBridge {
    /// Create a bridge with the standard cap.
    pub fn new() -> Self {
        Self::with_limit(MAX_BUFFER_SIZE)
    }

    /// Create a bridge with a custom cap.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            active: None,
            overflowed: false,
        }
    }

    /// The buffering cap in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// True while a streamed message is in progress.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Append one fragment.
    ///
    /// The first fragment of a message starts `consumer` on a new thread
    /// with the reading end. Fragments after an overflow are discarded up to
    /// and including the last one of that message.
    pub fn append<F>(&mut self, fragment: Bytes, last: bool, consumer: F) -> WsResult<()>
    where
        F: FnOnce(ByteSource) + Send + 'static,
    {
        if self.overflowed {
            if last {
                self.overflowed = false;
            }
            return Ok(());
        }

        if self.active.is_none() {
            self.active = Some(self.start(consumer)?);
        }
        let Some(active) = self.active.as_ref() else {
            return Ok(());
        };

        if !fragment.is_empty() && !active.tx.is_closed() {
            let len = fragment.len();
            let total = active.buffered.fetch_add(len, Ordering::AcqRel) + len;
            if total > self.limit {
                let _ = active.tx.try_send(Chunk::Aborted);
                self.active = None;
                self.overflowed = !last;
                return Err(WsError::BufferOverflow { limit: self.limit });
            }
            if active.tx.try_send(Chunk::Data(fragment)).is_err() {
                debug!(len, "Stream reader gone, fragment discarded");
            }
        }

        if last {
            let _ = active.tx.try_send(Chunk::End);
            self.active = None;
        }
        Ok(())
    }

    /// Abort the message in progress, if any.
    pub fn abort(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.tx.try_send(Chunk::Aborted);
        }
        self.overflowed = false;
    }

    fn start<F>(&self, consumer: F) -> WsResult<ActiveStream>
    where
        F: FnOnce(ByteSource) + Send + 'static,
    {
        // Data chunks are never empty, so `limit` bytes fit in `limit` slots
        // plus one terminator.
        let (tx, rx) = mpsc::channel(self.limit + 1);
        let buffered = Arc::new(AtomicUsize::new(0));
        let source = ByteSource::channel(rx, Arc::clone(&buffered));
        std::thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || consumer(source))?;
        Ok(ActiveStream { tx, buffered })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::mpsc as std_mpsc;

    fn collect_bytes(bridge: &mut StreamBridge) -> std_mpsc::Receiver<io::Result<Vec<u8>>> {
        let (done_tx, done_rx) = std_mpsc::channel();
        bridge
            .append(Bytes::new(), false, move |source| {
                let mut reader = BinaryReader::new(source);
                let mut out = Vec::new();
                let result = reader.read_to_end(&mut out).map(|_| out);
                let _ = done_tx.send(result);
            })
            .unwrap();
        done_rx
    }

    #[test]
    fn test_complete_source_reads_all_bytes() {
        let mut reader = BinaryReader::from_complete(vec![1u8, 2, 3]);
        assert_eq!(reader.read_byte().unwrap(), Some(1));
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![2, 3]);
        assert_eq!(reader.read_byte().unwrap(), None);
    }

    #[test]
    fn test_text_reader_multibyte_chars() {
        let mut reader = TextReader::from_complete("aé€😀");
        let mut chars = Vec::new();
        while let Some(c) = reader.read_char().unwrap() {
            chars.push(c);
        }
        assert_eq!(chars, vec!['a', 'é', '€', '😀']);
    }

    #[test]
    fn test_text_reader_rejects_invalid_utf8() {
        let mut reader = TextReader::new(ByteSource::from_complete(vec![0xFFu8]));
        let err = reader.read_char().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_fragments_arrive_in_order() {
        let mut bridge = StreamBridge::new();
        let done = collect_bytes(&mut bridge);
        bridge.append(Bytes::from_static(b"ab"), false, |_| {}).unwrap();
        bridge.append(Bytes::from_static(b"cd"), false, |_| {}).unwrap();
        bridge.append(Bytes::from_static(b"ef"), true, |_| {}).unwrap();
        assert!(!bridge.is_active());

        let out = done.recv().unwrap().unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_split_utf8_sequence_across_fragments() {
        let mut bridge = StreamBridge::new();
        let (done_tx, done_rx) = std_mpsc::channel();
        let euro = "€".as_bytes();
        bridge
            .append(Bytes::copy_from_slice(&euro[..1]), false, move |source| {
                let mut reader = TextReader::new(source);
                let _ = done_tx.send(reader.read_char().map_err(|e| e.to_string()));
            })
            .unwrap();
        bridge
            .append(Bytes::copy_from_slice(&euro[1..]), true, |_| {})
            .unwrap();
        assert_eq!(done_rx.recv().unwrap(), Ok(Some('€')));
    }

    #[test]
    fn test_overflow_raised_once_and_reader_aborted() {
        let mut bridge = StreamBridge::with_limit(4);
        let (done_tx, done_rx) = std_mpsc::channel();
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        bridge
            .append(Bytes::from_static(b"abc"), false, move |source| {
                // Hold off reading until the producer has overflowed.
                let _ = gate_rx.recv();
                let mut reader = BinaryReader::new(source);
                let mut out = Vec::new();
                let _ = done_tx.send(reader.read_to_end(&mut out).is_err());
            })
            .unwrap();

        let err = bridge
            .append(Bytes::from_static(b"de"), false, |_| {})
            .unwrap_err();
        assert!(matches!(err, WsError::BufferOverflow { limit: 4 }));

        // The rest of the message is discarded silently.
        bridge.append(Bytes::from_static(b"fg"), false, |_| {}).unwrap();
        bridge.append(Bytes::from_static(b"hi"), true, |_| {}).unwrap();
        assert!(!bridge.is_active());

        gate_tx.send(()).unwrap();
        assert!(done_rx.recv().unwrap());
    }

    #[test]
    fn test_next_message_starts_fresh_after_overflow() {
        let mut bridge = StreamBridge::with_limit(2);
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();
        bridge
            .append(Bytes::from_static(b"abc"), true, move |source| {
                let _ = gate_rx.recv();
                drop(source);
            })
            .unwrap_err();
        gate_tx.send(()).unwrap();

        let done = collect_bytes(&mut bridge);
        bridge.append(Bytes::from_static(b"ok"), true, |_| {}).unwrap();
        assert_eq!(done.recv().unwrap().unwrap(), b"ok");
    }

    #[test]
    fn test_abort_fails_reader() {
        let mut bridge = StreamBridge::new();
        let done = collect_bytes(&mut bridge);
        bridge.abort();
        assert!(done.recv().unwrap().is_err());
    }
}
