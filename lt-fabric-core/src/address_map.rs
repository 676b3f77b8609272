use crate::{address_range, AddressRange};
use std::cmp::Ordering;
use thiserror::Error;

/// Generic map of address ranges to values of type `T`.
///
/// The ranges cannot overlap.
#[derive(Debug, Clone)]
pub struct AddressMap<T> {
    ordered_ranges: Vec<(AddressRange, T)>,
}

impl<T> Default for AddressMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AddressMap<T> {
    /// Create new empty map.
    pub fn new() -> Self {
        Self {
            ordered_ranges: Vec::new(),
        }
    }

    /// Number of mapped (non-vacant) ranges.
    pub fn len(&self) -> usize {
        self.ordered_ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_ranges.is_empty()
    }

    /// Maps `range` to `value`.
    ///
    /// Fails, leaving the map untouched, if `range` overlaps a previously inserted range.
    pub fn insert(&mut self, range: AddressRange, value: T) -> Result<(), AddressMapError> {
        let index = self
            .ordered_ranges
            .partition_point(|(r, _)| r.start() < range.start());

        let overlaps_prev = index
            .checked_sub(1)
            .and_then(|i| self.ordered_ranges.get(i))
            .is_some_and(|(r, _)| r.overlaps(range));
        let overlaps_next = self
            .ordered_ranges
            .get(index)
            .is_some_and(|(r, _)| r.overlaps(range));
        if overlaps_prev || overlaps_next {
            return Err(AddressMapError::OverlappingAddressRanges);
        }

        self.ordered_ranges.insert(index, (range, value));
        Ok(())
    }

    /// Returns the address range that contains `address`.
    ///
    /// Note that even if `address` maps to a vacant region, that region's range will be returned.
    pub fn range(&self, address: u64) -> AddressRange {
        self.range_value(address).0
    }

    /// Returns the value that the address range containing `address` maps to, or `None` if that
    /// address range is vacant.
    pub fn value(&self, address: u64) -> Option<&T> {
        self.range_value(address).1
    }

    /// Returns the address range that contains `address`, and the value that it maps to.
    ///
    /// The second item will be `None` if `address` is in a vacant region.
    pub fn range_value(&self, address: u64) -> (AddressRange, Option<&T>) {
        match self.ordered_ranges.binary_search_by(|(range, _)| {
            if address < range.start() {
                Ordering::Greater
            } else if address <= range.end() {
                Ordering::Equal
            } else {
                Ordering::Less
            }
        }) {
            Ok(index) => {
                let (range, value) = &self.ordered_ranges[index];
                (*range, Some(value))
            }
            Err(index) => {
                let start = index
                    .checked_sub(1)
                    .and_then(|i| self.ordered_ranges.get(i))
                    // The addition is guaranteed not to overflow, since that would mean
                    // `range.end() == u64::MAX`, which is impossible since `address > range.end()`
                    // according to the binary search.
                    .map(|(range, _)| range.end() + 1)
                    .unwrap_or(0);
                let end = self
                    .ordered_ranges
                    .get(index)
                    // The subtraction is guaranteed not to underflow, since that would mean
                    // `range.start() == 0`, which is impossible since `address < range.start()`
                    // according to the binary search.
                    .map(|(range, _)| range.start() - 1)
                    .unwrap_or(u64::MAX);
                (address_range![start, end], None)
            }
        }
    }

    /// Iterates over all mapped ranges in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (AddressRange, &T)> {
        self.ordered_ranges.iter().map(|(range, value)| (*range, value))
    }
}

impl<T> TryFrom<Vec<(AddressRange, T)>> for AddressMap<T> {
    type Error = AddressMapError;

    fn try_from(mut value: Vec<(AddressRange, T)>) -> Result<Self, Self::Error> {
        value.sort_by_key(|(range, _)| range.start());

        let mut iter = value.iter();
        if let Some((mut prev_range, _)) = iter.next() {
            for &(range, _) in iter {
                if range.start() <= prev_range.end() {
                    return Err(AddressMapError::OverlappingAddressRanges);
                }
                prev_range = range;
            }
        }

        Ok(Self {
            ordered_ranges: value,
        })
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum AddressMapError {
    /// Attempt to add an address range that overlaps with a previously added address range.
    #[error("address range overlaps with previously added address range")]
    OverlappingAddressRanges,
}

#[macro_export]
macro_rules! addr_map {
    ($([$start:expr, $end:expr] => $value:expr,)*) => {
        $crate::address_map::AddressMap::try_from(vec![
            $(($crate::address_range![$start, $end], $value)),*
        ]).unwrap()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacant_regions_are_reported() {
        let map = addr_map! {
            [0x0000_0000, 0x000F_FFFF] => "ram",
            [0x0020_0000, 0x0020_00FF] => "tty",
        };

        assert_eq!(Some(&"ram"), map.value(0x0005_0000));
        assert_eq!(Some(&"tty"), map.value(0x0020_0010));

        let (range, value) = map.range_value(0x0010_0000);
        assert_eq!(None, value);
        assert_eq!(address_range![0x0010_0000, 0x001F_FFFF], range);

        let (range, value) = map.range_value(0x0030_0000);
        assert_eq!(None, value);
        assert_eq!(u64::MAX, range.end());
    }

    #[test]
    fn insert_keeps_order_and_rejects_overlap() {
        let mut map = AddressMap::new();
        map.insert(address_range![0x2000, 0x2FFF], 2).unwrap();
        map.insert(address_range![0x0000, 0x0FFF], 0).unwrap();
        map.insert(address_range![0x1000, 0x1FFF], 1).unwrap();

        assert_eq!(
            Err(AddressMapError::OverlappingAddressRanges),
            map.insert(address_range![0x1800, 0x27FF], 9)
        );
        assert_eq!(3, map.len());

        let values: Vec<_> = map.iter().map(|(_, v)| *v).collect();
        assert_eq!(vec![0, 1, 2], values);
    }
}
