//! Extranonce2 counter for coinbase diversification.
//!
//! The pool assigns each connection a fixed extranonce2 width (1-8 bytes)
//! during subscription. Each distinct value produces a distinct coinbase
//! transaction, and therefore a distinct merkle root, giving the miner a
//! fresh 32-bit nonce space per value. A worker rolls this counter only
//! after exhausting its nonce partition.

use std::fmt;

use thiserror::Error;

/// Errors constructing an [`Extranonce2`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Extranonce2Error {
    #[error("invalid extranonce2 size: {0} (must be 1-8 bytes)")]
    InvalidSize(u8),
}

/// A wrapping counter sized to the pool-assigned extranonce2 width.
///
/// Stored as a `u64` and serialized to `size` little-endian bytes, the order
/// in which it is spliced into the coinbase transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extranonce2 {
    value: u64,
    size: u8,
}

impl Extranonce2 {
    /// Create a zeroed counter of the given width in bytes.
    pub fn new(size: u8) -> Result<Self, Extranonce2Error> {
        if size == 0 || size > 8 {
            return Err(Extranonce2Error::InvalidSize(size));
        }
        Ok(Self { value: 0, size })
    }

    /// Counter value.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Width in bytes.
    pub fn size(&self) -> u8 {
        self.size
    }

    /// Largest value representable in `size` bytes.
    pub fn max_value(&self) -> u64 {
        if self.size >= 8 {
            u64::MAX
        } else {
            (1u64 << (self.size * 8)) - 1
        }
    }

    /// Advance the counter, wrapping within its width.
    ///
    /// Returns `false` when the value wrapped back to zero, i.e. the
    /// extranonce2 space for this width is exhausted.
    pub fn increment(&mut self) -> bool {
        if self.value < self.max_value() {
            self.value += 1;
            true
        } else {
            self.value = 0;
            false
        }
    }

    /// Append the serialized little-endian bytes to `buf`.
    pub fn extend_vec(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes()[..self.size as usize]);
    }

    /// Serialized little-endian bytes, as spliced into the coinbase.
    pub fn to_vec(&self) -> Vec<u8> {
        self.value.to_le_bytes()[..self.size as usize].to_vec()
    }
}

impl fmt::Display for Extranonce2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$x}", self.value, width = self.size as usize * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_starts_at_zero() {
        let e2 = Extranonce2::new(4).unwrap();
        assert_eq!(e2.value(), 0);
        assert_eq!(e2.size(), 4);
        assert_eq!(e2.to_vec(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_new_rejects_bad_sizes() {
        assert_eq!(Extranonce2::new(0), Err(Extranonce2Error::InvalidSize(0)));
        assert_eq!(Extranonce2::new(9), Err(Extranonce2Error::InvalidSize(9)));
    }

    #[test]
    fn test_max_value() {
        assert_eq!(Extranonce2::new(1).unwrap().max_value(), 0xff);
        assert_eq!(Extranonce2::new(4).unwrap().max_value(), 0xffff_ffff);
        assert_eq!(Extranonce2::new(8).unwrap().max_value(), u64::MAX);
    }

    #[test]
    fn test_increment_wraps() {
        let mut e2 = Extranonce2::new(1).unwrap();
        for expected in 1..=255u64 {
            assert!(e2.increment());
            assert_eq!(e2.value(), expected);
        }
        // 0xff -> 0x00 reports exhaustion
        assert!(!e2.increment());
        assert_eq!(e2.value(), 0);
    }

    #[test]
    fn test_little_endian_serialization() {
        let mut e2 = Extranonce2::new(2).unwrap();
        for _ in 0..0x1234 {
            e2.increment();
        }
        assert_eq!(e2.to_vec(), vec![0x34, 0x12]);

        let mut buf = vec![0xaa];
        e2.extend_vec(&mut buf);
        assert_eq!(buf, vec![0xaa, 0x34, 0x12]);
    }

    #[test]
    fn test_display_is_value_hex() {
        let mut e2 = Extranonce2::new(4).unwrap();
        for _ in 0..0xab {
            e2.increment();
        }
        assert_eq!(e2.to_string(), "000000ab");
    }
}
