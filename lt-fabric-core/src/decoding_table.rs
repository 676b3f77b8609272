//! Lookup tables indexed by a bit field of an address (or initiator id).
//!
//! A table is described by two numbers: `use_bits`, the width of the field, and `drop_bits`, the
//! number of less significant bits below it. The key of a value `v` is therefore
//! `(v >> drop_bits) & ((1 << use_bits) - 1)`.

use std::ops::{Index, RangeInclusive};
use thiserror::Error;

/// Upper bound on the width of a decoded field, which bounds table memory to `1 << 24` entries.
pub const MAX_DECODE_BITS: u32 = 24;

const_assert!(usize::BITS > MAX_DECODE_BITS);

/// Extracts a contiguous bit field from a value.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AddressMaskingTable {
    use_bits: u32,
    drop_bits: u32,
}

impl AddressMaskingTable {
    pub fn new(use_bits: u32, drop_bits: u32) -> Result<Self, DecodingTableError> {
        if use_bits > 32 || use_bits + drop_bits > 64 {
            return Err(DecodingTableError::FieldOutOfRange {
                use_bits,
                drop_bits,
            });
        }
        Ok(Self {
            use_bits,
            drop_bits,
        })
    }

    /// Builds the masking table for a mask made of one contiguous run of set bits.
    ///
    /// A zero mask yields an empty field (every value maps to `0`).
    pub fn from_mask(mask: u64) -> Result<Self, DecodingTableError> {
        if mask == 0 {
            return Self::new(0, 0);
        }
        let drop_bits = mask.trailing_zeros();
        let use_bits = (mask >> drop_bits).trailing_ones();
        if mask >> drop_bits >> use_bits != 0 {
            return Err(DecodingTableError::NonContiguousMask(mask));
        }
        Self::new(use_bits, drop_bits)
    }

    pub fn use_bits(&self) -> u32 {
        self.use_bits
    }

    pub fn drop_bits(&self) -> u32 {
        self.drop_bits
    }

    /// Returns the field of `value` selected by this table.
    pub fn apply(&self, value: u64) -> u32 {
        let shifted = value.checked_shr(self.drop_bits).unwrap_or(0);
        (shifted & field_mask(self.use_bits)) as u32
    }

    /// Returns the fields of every value in `first..=last` as at most two key ranges, two when
    /// the field wraps around inside the range.
    pub fn apply_range(&self, first: u64, last: u64) -> Vec<RangeInclusive<u32>> {
        let max = field_mask(self.use_bits);
        let low = first.checked_shr(self.drop_bits).unwrap_or(0);
        let high = last.checked_shr(self.drop_bits).unwrap_or(0);
        if high.saturating_sub(low) >= max {
            return vec![0..=max as u32];
        }
        let (start, end) = ((low & max) as u32, (high & max) as u32);
        if start <= end {
            vec![start..=end]
        } else {
            vec![0..=end, start..=max as u32]
        }
    }
}

/// Returns `true` if any range of `a` intersects any range of `b`.
pub fn ranges_overlap<T: Ord>(a: &[RangeInclusive<T>], b: &[RangeInclusive<T>]) -> bool {
    a.iter()
        .any(|a| b.iter().any(|b| a.start() <= b.end() && b.start() <= a.end()))
}

/// Maps the bit field of an address to a value of type `T`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AddressDecodingTable<T> {
    mask: AddressMaskingTable,
    table: Vec<T>,
}

impl<T: Clone> AddressDecodingTable<T> {
    /// Creates a table decoding `use_bits` bits above the `drop_bits` lowest ones, with every
    /// entry set to `default`.
    pub fn new(use_bits: u32, drop_bits: u32, default: T) -> Result<Self, DecodingTableError> {
        if use_bits > MAX_DECODE_BITS {
            return Err(DecodingTableError::TableTooLarge(use_bits));
        }
        let mask = AddressMaskingTable::new(use_bits, drop_bits)?;
        Ok(Self {
            mask,
            table: vec![default; 1 << use_bits],
        })
    }

    /// Creates a table decoding the bits selected by a contiguous `mask`.
    pub fn from_mask(mask: u64, default: T) -> Result<Self, DecodingTableError> {
        let mask = AddressMaskingTable::from_mask(mask)?;
        Self::new(mask.use_bits(), mask.drop_bits(), default)
    }

    /// Sets every entry to `value`.
    pub fn reset(&mut self, value: T) {
        self.table.fill(value);
    }

    /// Sets the entry `address` decodes to.
    pub fn set(&mut self, address: u64, value: T) {
        let key = self.key(address);
        self.table[key] = value;
    }

    pub fn get(&self, address: u64) -> &T {
        &self.table[self.key(address)]
    }

    /// Returns the table slot `address` decodes to.
    pub fn key(&self, address: u64) -> usize {
        self.mask.apply(address) as usize
    }

    pub fn entry(&self, key: usize) -> &T {
        &self.table[key]
    }

    pub fn set_entry(&mut self, key: usize, value: T) {
        self.table[key] = value;
    }

    pub fn masking(&self) -> AddressMaskingTable {
        self.mask
    }

    /// Number of entries, always `1 << use_bits`.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<T: Clone> Index<u64> for AddressDecodingTable<T> {
    type Output = T;

    fn index(&self, address: u64) -> &Self::Output {
        self.get(address)
    }
}

fn field_mask(bits: u32) -> u64 {
    match bits {
        0 => 0,
        b if b >= 64 => u64::MAX,
        b => (1u64 << b) - 1,
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodingTableError {
    #[error("mask {0:#x} is not a single contiguous run of bits")]
    NonContiguousMask(u64),
    #[error("decoding {0} bits would need more than 1 << {MAX_DECODE_BITS} table entries")]
    TableTooLarge(u32),
    #[error("bit field of {use_bits} bits above {drop_bits} bits does not fit the value width")]
    FieldOutOfRange { use_bits: u32, drop_bits: u32 },
}
