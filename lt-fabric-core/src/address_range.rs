use std::fmt;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// A non-empty range in a 64-bit address space bounded inclusively below and above.
///
/// Enforces the invariant that `self.start() <= self.end()`.
///
/// Platforms with narrower address buses simply never produce addresses above their
/// configured width; the range itself is width-agnostic.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct AddressRange {
    start: u64,
    end: u64,
}

impl Default for AddressRange {
    fn default() -> Self {
        Self::full()
    }
}

impl Display for AddressRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x}]", self.start, self.end)
    }
}

impl AddressRange {
    pub fn new(start: u64, end: u64) -> Result<Self, InvalidBoundsError> {
        (start <= end)
            .then_some(Self { start, end })
            .ok_or(InvalidBoundsError { start, end })
    }

    /// Creates the range `[base, base + size)`.
    ///
    /// Fails if `size == 0` or if the range would run past the end of the 64-bit space.
    pub fn from_base_size(base: u64, size: u64) -> Result<Self, InvalidBoundsError> {
        size.checked_sub(1)
            .and_then(|delta| base.checked_add(delta))
            .map(|end| Self { start: base, end })
            .ok_or(InvalidBoundsError {
                start: base,
                end: base.wrapping_add(size),
            })
    }

    /// Create a new address range covering all possible 64-bit addresses.
    pub fn full() -> Self {
        Self {
            start: 0,
            end: u64::MAX,
        }
    }

    pub fn start(self) -> u64 {
        self.start
    }

    pub fn end(self) -> u64 {
        self.end
    }

    /// Check if an address is contained within this address range.
    pub fn contains(self, address: u64) -> bool {
        self.start <= address && address <= self.end
    }

    /// Returns `true` if `len` bytes starting at `address` all fall within this range.
    ///
    /// An empty access (`len == 0`) is contained if `address` itself is.
    pub fn contains_access(self, address: u64, len: u64) -> bool {
        if !self.contains(address) {
            return false;
        }
        match len.checked_sub(1) {
            None => true,
            Some(delta) => self.end - address >= delta,
        }
    }

    /// Returns `true` if the two ranges share at least one address.
    pub fn overlaps(self, other: Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns `self.end() - self.start()`, which is the size minus 1.
    pub fn delta(self) -> u64 {
        self.end - self.start
    }

    /// Returns the size of this address range, or `None` if it spans the full 64-bit space.
    pub fn size(self) -> Option<u64> {
        self.delta().checked_add(1)
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("bounds [{start:#x}, {end:#x}] do not form a valid address range")]
pub struct InvalidBoundsError {
    start: u64,
    end: u64,
}

#[macro_export]
macro_rules! address_range {
    ($start:expr, $end:expr) => {
        $crate::address_range::AddressRange::new($start, $end).unwrap()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_size_bounds() {
        let range = AddressRange::from_base_size(0x0020_0000, 0x100).unwrap();
        assert_eq!(0x0020_0000, range.start());
        assert_eq!(0x0020_00FF, range.end());
        assert_eq!(Some(0x100), range.size());

        assert!(AddressRange::from_base_size(0x1000, 0).is_err());
        assert!(AddressRange::from_base_size(u64::MAX, 2).is_err());
        assert!(AddressRange::from_base_size(u64::MAX, 1).is_ok());
    }

    #[test]
    fn access_containment() {
        let range = address_range![0x1000, 0x1FFF];
        assert!(range.contains_access(0x1000, 4));
        assert!(range.contains_access(0x1FFC, 4));
        assert!(!range.contains_access(0x1FFD, 4));
        assert!(range.contains_access(0x1FFF, 0));
        assert!(!range.contains_access(0x0FFF, 1));
    }

    #[test]
    fn overlap() {
        let a = address_range![0x0, 0xFF];
        assert!(a.overlaps(address_range![0xFF, 0x1FF]));
        assert!(!a.overlaps(address_range![0x100, 0x1FF]));
        assert!(AddressRange::full().overlaps(a));
    }
}
