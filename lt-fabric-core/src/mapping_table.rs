//! Immutable description of a platform's address space, and the decode tables derived from it.
//!
//! Addresses are decoded hierarchically: the `level_addr_bits[0]` most significant bits select a
//! cluster at the top-level interconnect, the next `level_addr_bits[1]` bits select a target
//! inside that cluster, and so on. Initiator ids are packed the same way using `level_id_bits`,
//! so one scheme serves both the command (address-keyed) and response (id-keyed) directions.
//!
//! All tables are compiled at the *decode granularity*, i.e. pages of `1 << page_shift` bytes,
//! where the page is the part of the address below all decoded fields (further narrowed by the
//! cacheability mask). Two segments that share a page must agree on everything a table can say
//! about that page, otherwise table construction fails.

use crate::address_map::AddressMap;
use crate::component_index::{ComponentIndex, IndexEncodingError};
use crate::decoding_table::{
    ranges_overlap, AddressDecodingTable, AddressMaskingTable, DecodingTableError,
    MAX_DECODE_BITS,
};
use crate::segment::Segment;
use bitvec::vec::BitVec;
use log::debug;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;
use thiserror::Error;

/// Compiled description of an address space. Read-only once populated; freely shared.
#[derive(Debug, Clone)]
pub struct MappingTable {
    address_width: u32,
    level_addr_bits: Vec<u32>,
    level_id_bits: Vec<u32>,
    cacheability_mask: u64,
    /// log2 of the decode granularity.
    page_shift: u32,
    /// Segments in insertion order.
    segments: Vec<Segment>,
    /// Exact segment ranges, mapping to positions in `segments`.
    coverage: AddressMap<usize>,
}

assert_impl_all!(MappingTable: Send, Sync);

impl MappingTable {
    pub fn new(
        address_width: u32,
        level_addr_bits: impl Into<Vec<u32>>,
        level_id_bits: impl Into<Vec<u32>>,
        cacheability_mask: u64,
    ) -> Result<Self, MappingError> {
        let level_addr_bits = level_addr_bits.into();
        let level_id_bits = level_id_bits.into();

        if !(1..=64).contains(&address_width) {
            return Err(MappingError::AddressWidth(address_width));
        }
        if level_addr_bits.len() != level_id_bits.len() {
            return Err(MappingError::LevelCountMismatch {
                addr_levels: level_addr_bits.len(),
                id_levels: level_id_bits.len(),
            });
        }
        let addr_bits: u32 = level_addr_bits.iter().sum();
        if addr_bits > address_width {
            return Err(MappingError::DecodeWiderThanAddress {
                decoded: addr_bits,
                address_width,
            });
        }
        if let Some(&bits) = level_addr_bits.iter().find(|&&b| b > MAX_DECODE_BITS) {
            return Err(DecodingTableError::TableTooLarge(bits).into());
        }
        let id_bits: u32 = level_id_bits.iter().sum();
        if id_bits > 32 {
            return Err(MappingError::IdTooWide(id_bits));
        }
        if address_width < 64 && cacheability_mask >> address_width != 0 {
            return Err(MappingError::MaskOutsideAddress {
                mask: cacheability_mask,
                address_width,
            });
        }
        let cacheability = AddressMaskingTable::from_mask(cacheability_mask)?;
        if cacheability.use_bits() > MAX_DECODE_BITS {
            return Err(DecodingTableError::TableTooLarge(cacheability.use_bits()).into());
        }

        let mut page_shift = address_width - addr_bits;
        if cacheability_mask != 0 {
            page_shift = page_shift.min(cacheability.drop_bits());
        }

        Ok(Self {
            address_width,
            level_addr_bits,
            level_id_bits,
            cacheability_mask,
            page_shift,
            segments: Vec::new(),
            coverage: AddressMap::new(),
        })
    }

    pub fn address_width(&self) -> u32 {
        self.address_width
    }

    pub fn level_addr_bits(&self) -> &[u32] {
        &self.level_addr_bits
    }

    pub fn level_id_bits(&self) -> &[u32] {
        &self.level_id_bits
    }

    pub fn cacheability_mask(&self) -> u64 {
        self.cacheability_mask
    }

    /// Number of decode levels (1 for a flat platform).
    pub fn levels(&self) -> usize {
        self.level_addr_bits.len()
    }

    /// Size in bytes of the pages tables are compiled at, or `None` for a single page covering
    /// the full 64-bit space.
    pub fn decode_granularity(&self) -> Option<u64> {
        1u64.checked_shl(self.page_shift)
    }

    /// Adds a segment.
    ///
    /// Fails, leaving the table unchanged, if the segment:
    /// - has an index of another depth than the table's level count,
    /// - lies (partly) outside the address space,
    /// - overlaps an existing segment ([`MappingError::Collision`]), or
    /// - shares a decode page with a segment of another target, or shares cacheability-decode
    ///   bits with a segment of another cacheability ([`MappingError::Incoherent`]).
    pub fn add(&mut self, segment: Segment) -> Result<(), MappingError> {
        if segment.index().level() != self.levels() {
            return Err(MappingError::LevelMismatch {
                segment: segment.to_string(),
                levels: self.levels(),
            });
        }
        if self.address_width < 64 && segment.range().end() >> self.address_width != 0 {
            return Err(MappingError::OutOfAddressSpace {
                segment: segment.to_string(),
                address_width: self.address_width,
            });
        }

        if let Some(existing) = self.segments.iter().find(|s| s.is_overlapping(&segment)) {
            return Err(MappingError::Collision {
                segment: segment.to_string(),
                existing: existing.to_string(),
            });
        }

        let cacheability = AddressMaskingTable::from_mask(self.cacheability_mask)?;
        let cache_keys = |segment: &Segment| {
            cacheability.apply_range(segment.range().start(), segment.range().end())
        };
        let new_pages = [self.pages(&segment)];
        let new_cache_keys = cache_keys(&segment);

        for existing in &self.segments {
            if existing.cacheable() != segment.cacheable()
                && ranges_overlap(&new_cache_keys, &cache_keys(existing))
            {
                return Err(MappingError::Incoherent {
                    segment: segment.to_string(),
                    existing: existing.to_string(),
                    reason: "has a different cacheability attribute",
                });
            }
            if existing.index() != segment.index()
                && ranges_overlap(&new_pages, &[self.pages(existing)])
            {
                return Err(MappingError::Incoherent {
                    segment: segment.to_string(),
                    existing: existing.to_string(),
                    reason: "targets a different component",
                });
            }
        }

        debug!("Adding {segment} to mapping table");
        let position = self.segments.len();
        self.coverage
            .insert(segment.range(), position)
            .map_err(|_| MappingError::Collision {
                segment: segment.to_string(),
                existing: String::from("a mapped range"),
            })?;
        self.segments.push(segment);
        Ok(())
    }

    /// All segments, in the order they were added.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// All segments owned by the component at `index`.
    pub fn segment_list(&self, index: &ComponentIndex) -> Vec<&Segment> {
        self.segments
            .iter()
            .filter(|s| s.index() == index)
            .collect()
    }

    /// The single segment owned by the component at `index`.
    pub fn segment(&self, index: &ComponentIndex) -> Result<&Segment, MappingError> {
        match self.segment_list(index).as_slice() {
            [] => Err(MappingError::UnknownSegment(index.clone())),
            [segment] => Ok(segment),
            list => Err(MappingError::AmbiguousSegment(index.clone(), list.len())),
        }
    }

    /// The segment containing `address`, if any.
    pub fn segment_at(&self, address: u64) -> Option<&Segment> {
        self.coverage
            .value(address)
            .map(|&position| &self.segments[position])
    }

    /// Exact address ranges of all segments, mapped to the segment's position in
    /// [`segments`](Self::segments).
    pub fn coverage(&self) -> &AddressMap<usize> {
        &self.coverage
    }

    /// Returns the packed id of the component at `index`, as carried in transactions' source id.
    pub fn index_for_id(&self, index: &ComponentIndex) -> Result<u32, MappingError> {
        Ok(index.encode(&self.level_id_bits)?)
    }

    /// Builds the table an interconnect at `index` uses to route commands: it maps an address to
    /// the `index.level()`-th entry of the target's index. Addresses covered by no segment of the
    /// interconnect's sub-tree decode to `default_index`.
    pub fn routing_table(
        &self,
        index: &ComponentIndex,
        default_index: usize,
    ) -> Result<AddressDecodingTable<usize>, MappingError> {
        let level = self.check_level(index)?;
        let before: u32 = self.level_addr_bits[..level].iter().sum();
        let at = self.level_addr_bits[level];
        let table = AddressDecodingTable::new(at, self.address_width - at - before, default_index)?;

        self.compile(
            table,
            |s| s.index().id_matches(index),
            |s| s.index().values()[level] as usize,
            "targets a different target (or cluster)",
        )
    }

    /// Builds the table telling, for every address, whether it is served inside the sub-tree of
    /// the component at `index`.
    pub fn locality_table(
        &self,
        index: &ComponentIndex,
    ) -> Result<AddressDecodingTable<bool>, MappingError> {
        let nbits: u32 = self.level_addr_bits[..self.check_depth(index)?]
            .iter()
            .sum();
        let table = AddressDecodingTable::new(nbits, self.address_width - nbits, true)?;

        self.compile(
            table,
            |_| true,
            |s| s.index().id_matches(index),
            "targets a different component",
        )
    }

    /// Builds the table telling, for every address, whether it is cacheable.
    pub fn cacheability_table(&self) -> Result<AddressDecodingTable<bool>, MappingError> {
        let table = AddressDecodingTable::from_mask(self.cacheability_mask, false)?;

        self.compile(
            table,
            |_| true,
            |s| s.cacheable(),
            "has a different cacheability",
        )
    }

    /// Builds the table extracting, from a packed initiator id, its index at `level`.
    pub fn id_masking_table(&self, level: usize) -> Result<AddressMaskingTable, MappingError> {
        let Some(&use_bits) = self.level_id_bits.get(level) else {
            return Err(MappingError::LevelOutOfBounds {
                level,
                levels: self.levels(),
            });
        };
        let drop_bits = self.level_id_bits[level + 1..].iter().sum();
        Ok(AddressMaskingTable::new(use_bits, drop_bits)?)
    }

    /// Builds the table telling, for every packed id, whether it belongs to the sub-tree of the
    /// component at `index`.
    pub fn id_locality_table(
        &self,
        index: &ComponentIndex,
    ) -> Result<AddressDecodingTable<bool>, MappingError> {
        let nbits: u32 = self.level_id_bits[..self.check_depth(index)?].iter().sum();
        let id_width: u32 = self.level_id_bits.iter().sum();
        let mut table = AddressDecodingTable::new(nbits, id_width - nbits, true)?;
        let mut done: BitVec = BitVec::repeat(false, table.len());

        for segment in &self.segments {
            let id = self.index_for_id(segment.index())? as u64;
            let value = segment.index().id_matches(index);
            let key = table.key(id);
            if done[key] && *table.get(id) != value {
                return Err(MappingError::Incoherent {
                    segment: segment.to_string(),
                    existing: format!("id key {key}"),
                    reason: "targets a different component (same id MSBs)",
                });
            }
            table.set(id, value);
            done.set(key, true);
        }
        Ok(table)
    }

    /// Fills `table` with `value(segment)` for every entry the segments selected by `filter`
    /// decode to, failing if two segments disagree on the same entry.
    fn compile<T: Clone + Eq>(
        &self,
        mut table: AddressDecodingTable<T>,
        filter: impl Fn(&Segment) -> bool,
        value: impl Fn(&Segment) -> T,
        reason: &'static str,
    ) -> Result<AddressDecodingTable<T>, MappingError> {
        let mut done: BitVec = BitVec::repeat(false, table.len());
        let mut owners: Vec<Option<usize>> = vec![None; table.len()];

        for (position, segment) in self.segments.iter().enumerate() {
            if !filter(segment) {
                continue;
            }
            let v = value(segment);
            let keys = table
                .masking()
                .apply_range(segment.range().start(), segment.range().end());
            for key in keys.into_iter().flatten().map(|key| key as usize) {
                if done[key] && *table.entry(key) != v {
                    let existing = owners[key]
                        .map(|p| self.segments[p].to_string())
                        .unwrap_or_default();
                    return Err(MappingError::Incoherent {
                        segment: segment.to_string(),
                        existing,
                        reason,
                    });
                }
                table.set_entry(key, v.clone());
                done.set(key, true);
                owners[key] = Some(position);
            }
        }
        Ok(table)
    }

    /// Numbers of the first and last decode pages `segment` touches.
    fn pages(&self, segment: &Segment) -> RangeInclusive<u64> {
        let first = segment.range().start().checked_shr(self.page_shift).unwrap_or(0);
        let last = segment.range().end().checked_shr(self.page_shift).unwrap_or(0);
        first..=last
    }

    fn check_level(&self, index: &ComponentIndex) -> Result<usize, MappingError> {
        let level = index.level();
        if level >= self.levels() {
            return Err(MappingError::LevelOutOfBounds {
                level,
                levels: self.levels(),
            });
        }
        Ok(level)
    }

    fn check_depth(&self, index: &ComponentIndex) -> Result<usize, MappingError> {
        let level = index.level();
        if level > self.levels() {
            return Err(MappingError::LevelOutOfBounds {
                level,
                levels: self.levels(),
            });
        }
        Ok(level)
    }
}

impl Display for MappingTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Mapping table: ad:{:?} id:{:?} cacheability mask: {:#x}",
            self.level_addr_bits, self.level_id_bits, self.cacheability_mask
        )?;
        for segment in &self.segments {
            writeln!(f, " {segment}")?;
        }
        Ok(())
    }
}

/// Configuration errors detected while describing the address space or compiling its tables.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MappingError {
    #[error("address width {0} is not within 1..=64")]
    AddressWidth(u32),
    #[error("{addr_levels} address decode levels but {id_levels} id decode levels")]
    LevelCountMismatch { addr_levels: usize, id_levels: usize },
    #[error("decoding {decoded} address bits exceeds the address width {address_width}")]
    DecodeWiderThanAddress { decoded: u32, address_width: u32 },
    #[error("packed ids of {0} bits do not fit in 32 bits")]
    IdTooWide(u32),
    #[error("cacheability mask {mask:#x} exceeds the address width {address_width}")]
    MaskOutsideAddress { mask: u64, address_width: u32 },
    #[error("{segment} is not the same level as the mapping table ({levels})")]
    LevelMismatch { segment: String, levels: usize },
    #[error("{segment} lies outside the {address_width}-bit address space")]
    OutOfAddressSpace { segment: String, address_width: u32 },
    #[error("{segment} bumps in {existing}")]
    Collision { segment: String, existing: String },
    #[error("incoherent mapping table: {segment} {reason} than {existing} with same MSBs")]
    Incoherent {
        segment: String,
        existing: String,
        reason: &'static str,
    },
    #[error("level {level} out of bounds for a mapping table of {levels} levels")]
    LevelOutOfBounds { level: usize, levels: usize },
    #[error("no segment belongs to component {0}")]
    UnknownSegment(ComponentIndex),
    #[error("{1} segments belong to component {0}, expected exactly one")]
    AmbiguousSegment(ComponentIndex, usize),
    #[error(transparent)]
    Decoding(#[from] DecodingTableError),
    #[error(transparent)]
    Encoding(#[from] IndexEncodingError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_table() -> MappingTable {
        let mut mt = MappingTable::new(32, [12], [4], 0xFFF0_0000).unwrap();
        mt.add(Segment::new("RAM", 0x0000_0000, 0x0010_0000, [0], true).unwrap())
            .unwrap();
        mt.add(Segment::new("TTY", 0x0020_0000, 0x100, [1], false).unwrap())
            .unwrap();
        mt
    }

    #[test]
    fn decode_consistency() {
        let mt = reference_table();
        let routing = mt.routing_table(&ComponentIndex::root(), 99).unwrap();
        let cacheability = mt.cacheability_table().unwrap();

        for segment in mt.segments() {
            for address in [
                segment.base_address(),
                segment.base_address() + segment.size() / 2,
                segment.range().end(),
            ] {
                assert_eq!(segment.index().values()[0] as usize, routing[address]);
                assert_eq!(segment.cacheable(), cacheability[address]);
            }
        }
        assert_eq!(0, routing[0x0005_0000]);
        assert_eq!(99, routing[0x8000_0000]);
    }

    #[test]
    fn overlap_rejection_leaves_table_unchanged() {
        let mut mt = reference_table();
        let before = mt.segments().to_vec();

        let result = mt.add(Segment::new("BAD", 0x000F_F000, 0x2000, [0], true).unwrap());
        assert!(matches!(result, Err(MappingError::Collision { .. })));
        assert_eq!(before, mt.segments());
        assert_eq!(2, mt.coverage().len());
    }

    #[test]
    fn incoherent_cacheability_is_rejected() {
        let mut mt = reference_table();
        // Same 1 MiB cacheability page as the uncacheable TTY.
        let result = mt.add(Segment::new("BUF", 0x0020_1000, 0x1000, [1], true).unwrap());
        assert!(matches!(
            result,
            Err(MappingError::Incoherent {
                reason: "has a different cacheability attribute",
                ..
            })
        ));
    }

    #[test]
    fn incoherent_target_is_rejected() {
        let mut mt = reference_table();
        let result = mt.add(Segment::new("ROM", 0x0020_1000, 0x1000, [2], false).unwrap());
        assert!(matches!(
            result,
            Err(MappingError::Incoherent {
                reason: "targets a different component",
                ..
            })
        ));
        // Same target, same cacheability, same page: fine.
        mt.add(Segment::new("TTY1", 0x0020_1000, 0x100, [1], false).unwrap())
            .unwrap();
        assert_eq!(2, mt.segment_list(&ComponentIndex::new([1])).len());
        assert!(matches!(
            mt.segment(&ComponentIndex::new([1])),
            Err(MappingError::AmbiguousSegment(_, 2))
        ));
    }

    #[test]
    fn level_mismatch_is_rejected() {
        let mut mt = reference_table();
        let result = mt.add(Segment::new("DEEP", 0x0040_0000, 0x100, [2, 0], false).unwrap());
        assert!(matches!(result, Err(MappingError::LevelMismatch { .. })));
    }

    #[test]
    fn segment_queries() {
        let mt = reference_table();
        assert_eq!("TTY", mt.segment(&ComponentIndex::new([1])).unwrap().name());
        assert_eq!(Some("RAM"), mt.segment_at(0x0005_0000).map(Segment::name));
        assert_eq!(None, mt.segment_at(0x0010_0000));
        assert!(matches!(
            mt.segment(&ComponentIndex::new([7])),
            Err(MappingError::UnknownSegment(_))
        ));
    }

    fn clustered_table() -> MappingTable {
        // Two clusters of two targets each: 4 bits select the cluster, 4 more the target.
        let mut mt = MappingTable::new(32, [4, 4], [2, 2], 0xFF00_0000).unwrap();
        mt.add(Segment::new("ram00", 0x0000_0000, 0x1000, [0, 0], true).unwrap())
            .unwrap();
        mt.add(Segment::new("tty01", 0x0100_0000, 0x100, [0, 1], false).unwrap())
            .unwrap();
        mt.add(Segment::new("ram10", 0x1000_0000, 0x1000, [1, 0], true).unwrap())
            .unwrap();
        mt.add(Segment::new("tty11", 0x1100_0000, 0x100, [1, 1], false).unwrap())
            .unwrap();
        mt
    }

    #[test]
    fn hierarchical_routing_and_locality() {
        let mt = clustered_table();

        let global = mt.routing_table(&ComponentIndex::root(), 3).unwrap();
        assert_eq!(0, global[0x0100_0000]);
        assert_eq!(1, global[0x1100_0000]);
        assert_eq!(3, global[0x7000_0000]);

        let cluster1 = ComponentIndex::new([1]);
        let local = mt.routing_table(&cluster1, 2).unwrap();
        assert_eq!(0, local[0x1000_0000]);
        assert_eq!(1, local[0x1100_0000]);

        let locality = mt.locality_table(&cluster1).unwrap();
        assert!(locality[0x1000_0000]);
        assert!(!locality[0x0000_0000]);

        assert!(matches!(
            mt.routing_table(&ComponentIndex::new([1, 1]), 0),
            Err(MappingError::LevelOutOfBounds { level: 2, .. })
        ));
    }

    #[test]
    fn id_tables() {
        let mt = clustered_table();
        assert_eq!(Ok(0b10_01), mt.index_for_id(&ComponentIndex::new([2, 1])));

        let top = mt.id_masking_table(0).unwrap();
        assert_eq!(2, top.apply(0b10_01));
        let bottom = mt.id_masking_table(1).unwrap();
        assert_eq!(1, bottom.apply(0b10_01));

        let locality = mt.id_locality_table(&ComponentIndex::new([1])).unwrap();
        assert!(locality[0b01_00]);
        assert!(!locality[0b00_01]);
    }

    #[test]
    fn large_segment_with_fine_cacheability() {
        let mut mt = MappingTable::new(32, [2], [2], 0xFFFF_F000).unwrap();
        mt.add(Segment::new("DRAM", 0, 0x4000_0000, [0], true).unwrap())
            .unwrap();
        mt.add(Segment::new("IO", 0x4000_0000, 0x800, [1], false).unwrap())
            .unwrap();

        // Shares the IO segment's 4 KiB cacheability page.
        let result = mt.add(Segment::new("BUF", 0x4000_0800, 0x800, [1], true).unwrap());
        assert!(matches!(
            result,
            Err(MappingError::Incoherent {
                reason: "has a different cacheability attribute",
                ..
            })
        ));
        mt.add(Segment::new("IO2", 0x4000_1000, 0x1000, [1], false).unwrap())
            .unwrap();

        let cacheability = mt.cacheability_table().unwrap();
        assert!(cacheability[0x3FFF_F000]);
        assert!(!cacheability[0x4000_0000]);
        assert!(!cacheability[0x4000_1FFF]);
        let routing = mt.routing_table(&ComponentIndex::root(), 99).unwrap();
        assert_eq!(0, routing[0x3FFF_FFFF]);
        assert_eq!(1, routing[0x4000_1000]);
    }

    #[test]
    fn invalid_geometry() {
        assert_eq!(
            Err(MappingError::AddressWidth(0)),
            MappingTable::new(0, Vec::<u32>::new(), Vec::<u32>::new(), 0).map(|_| ())
        );
        assert!(matches!(
            MappingTable::new(32, [8], [4, 4], 0),
            Err(MappingError::LevelCountMismatch { .. })
        ));
        assert!(matches!(
            MappingTable::new(32, [8], [4], 0x0F0F_0000),
            Err(MappingError::Decoding(DecodingTableError::NonContiguousMask(_)))
        ));
    }
}
