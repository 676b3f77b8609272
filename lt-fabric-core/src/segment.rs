use crate::address_range::InvalidBoundsError;
use crate::component_index::ComponentIndex;
use crate::AddressRange;
use std::fmt;
use std::fmt::{Display, Formatter};

/// A named, contiguous region of the address space served by one target.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Segment {
    name: String,
    range: AddressRange,
    index: ComponentIndex,
    cacheable: bool,
}

impl Segment {
    /// Creates the segment `[base, base + size)` owned by the target at `index`.
    pub fn new(
        name: impl Into<String>,
        base: u64,
        size: u64,
        index: impl Into<ComponentIndex>,
        cacheable: bool,
    ) -> Result<Self, InvalidBoundsError> {
        Ok(Self {
            name: name.into(),
            range: AddressRange::from_base_size(base, size)?,
            index: index.into(),
            cacheable,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_address(&self) -> u64 {
        self.range.start()
    }

    /// Size in bytes. Saturates at `u64::MAX` for a segment spanning the whole space.
    pub fn size(&self) -> u64 {
        self.range.size().unwrap_or(u64::MAX)
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }

    pub fn index(&self) -> &ComponentIndex {
        &self.index
    }

    pub fn cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn contains(&self, address: u64) -> bool {
        self.range.contains(address)
    }

    pub fn is_overlapping(&self, other: &Segment) -> bool {
        self.range.overlaps(other.range)
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Segment \"{}\": {:#x}..{:#x} -> {}{}>",
            self.name,
            self.range.start(),
            self.range.end(),
            self.index,
            if self.cacheable { " C" } else { "" }
        )
    }
}
