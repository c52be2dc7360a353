//! Whole-message reassembly.

use bytes::{Bytes, BytesMut};

use crate::error::{WsError, WsResult};

/// Collects fragments of one message for a whole-message handler.
///
/// The accumulated length is capped; the fragment that crosses the cap
/// fails with [`WsError::MessageTooBig`] and the buffer is emptied.
#[derive(Debug)]
pub struct MessageBuffer {
    data: BytesMut,
    limit: usize,
}

impl MessageBuffer {
    /// Create a buffer capped at `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            data: BytesMut::new(),
            limit,
        }
    }

    /// Drop buffered content and set a new cap.
    pub fn reset(&mut self, limit: usize) {
        self.data.clear();
        self.limit = limit;
    }

    /// Append a fragment.
    pub fn append(&mut self, fragment: &[u8]) -> WsResult<()> {
        let actual = self.data.len() + fragment.len();
        if actual > self.limit {
            self.data.clear();
            return Err(WsError::MessageTooBig {
                limit: self.limit,
                actual,
            });
        }
        self.data.extend_from_slice(fragment);
        Ok(())
    }

    /// Take the buffered content, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.data.split().freeze()
    }

    /// Take the buffered content as text.
    pub fn take_text(&mut self) -> WsResult<String> {
        String::from_utf8(self.take().to_vec())
            .map_err(|e| WsError::decode_failed(format!("reassembled text is not UTF-8: {e}")))
    }

    /// Buffered length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The cap in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassembles_fragments() {
        let mut buffer = MessageBuffer::new(16);
        buffer.append(b"ab").unwrap();
        buffer.append(b"cd").unwrap();
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.take_text().unwrap(), "abcd");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_reports_sizes() {
        let mut buffer = MessageBuffer::new(4);
        buffer.append(b"abc").unwrap();
        let err = buffer.append(b"de").unwrap_err();
        assert!(matches!(
            err,
            WsError::MessageTooBig {
                limit: 4,
                actual: 5
            }
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_reset_changes_limit() {
        let mut buffer = MessageBuffer::new(1);
        buffer.reset(8);
        buffer.append(b"12345678").unwrap();
        assert_eq!(buffer.limit(), 8);
        assert_eq!(&buffer.take()[..], b"12345678");
    }
}
