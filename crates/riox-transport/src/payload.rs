//! Sender payload: an 8-byte little-endian sequence number followed by
//! 128 bytes of zero filler. No framing, no checksum.

/// Size of the sequence number field
pub const SEQUENCE_LEN: usize = 8;

/// Size of the filler that follows the sequence number
pub const FILLER_LEN: usize = 128;

/// Total size of one send payload
pub const PAYLOAD_LEN: usize = SEQUENCE_LEN + FILLER_LEN;

/// Write the payload for `sequence` into the front of `buf`.
///
/// Returns the number of bytes written, or `None` if `buf` is shorter than
/// [`PAYLOAD_LEN`].
pub fn encode(sequence: u64, buf: &mut [u8]) -> Option<usize> {
    let out = buf.get_mut(..PAYLOAD_LEN)?;
    out[..SEQUENCE_LEN].copy_from_slice(&sequence.to_le_bytes());
    out[SEQUENCE_LEN..].fill(0);
    Some(PAYLOAD_LEN)
}

/// Read the sequence number from a received payload
#[must_use]
pub fn decode(buf: &[u8]) -> Option<u64> {
    let bytes: [u8; SEQUENCE_LEN] = buf.get(..SEQUENCE_LEN)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Monotonic sequence source shared by all slots of one sender
#[derive(Debug, Clone, Default)]
pub struct SequenceGenerator {
    next: u64,
}

impl SequenceGenerator {
    /// Start counting at `first`
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// The value the next call to [`fill`](Self::fill) will use
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Encode the next sequence number into `buf` and advance.
    ///
    /// Returns `(sequence, bytes_written)`; the counter only advances when
    /// the payload fits.
    pub fn fill(&mut self, buf: &mut [u8]) -> Option<(u64, usize)> {
        let sequence = self.next;
        let len = encode(sequence, buf)?;
        self.next = self.next.wrapping_add(1);
        Some((sequence, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_layout() {
        let mut buf = [0xFFu8; 1024];
        let len = encode(0x0102_0304_0506_0708, &mut buf).unwrap();

        assert_eq!(len, 136);
        assert_eq!(&buf[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert!(buf[8..136].iter().all(|&b| b == 0));
        // Bytes past the payload are untouched
        assert_eq!(buf[136], 0xFF);
    }

    #[test]
    fn test_encode_short_buffer() {
        let mut buf = [0u8; PAYLOAD_LEN - 1];
        assert!(encode(1, &mut buf).is_none());
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(decode(&[1, 2, 3]).is_none());
        assert_eq!(decode(&42u64.to_le_bytes()), Some(42));
    }

    #[test]
    fn test_generator_advances_only_on_success() {
        let mut sequence = SequenceGenerator::default();
        let mut small = [0u8; 16];
        let mut slot = [0u8; PAYLOAD_LEN];

        assert!(sequence.fill(&mut small).is_none());
        assert_eq!(sequence.peek(), 0);

        assert_eq!(sequence.fill(&mut slot), Some((0, PAYLOAD_LEN)));
        assert_eq!(sequence.fill(&mut slot), Some((1, PAYLOAD_LEN)));
        assert_eq!(decode(&slot), Some(1));
        assert_eq!(sequence.peek(), 2);
    }
}
