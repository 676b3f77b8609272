//! Hierarchical component indices.

use std::fmt;
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Position of a component in a (possibly clustered) platform, e.g. `(cluster, target)`.
///
/// The number of entries is the *level* of the index. A flat platform uses single-level
/// indices such as `(3)`. The empty index `()` designates the root of the hierarchy, which is
/// what the top-level interconnect decodes against.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct ComponentIndex(Vec<u32>);

impl ComponentIndex {
    pub fn new(values: impl Into<Vec<u32>>) -> Self {
        Self(values.into())
    }

    /// The root index `()`.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn level(&self) -> usize {
        self.0.len()
    }

    /// Returns the value at `level`, or `None` if the index is not that deep.
    pub fn get(&self, level: usize) -> Option<u32> {
        self.0.get(level).copied()
    }

    pub fn values(&self) -> &[u32] {
        &self.0
    }

    /// Returns `true` if both indices agree on every level they both have.
    ///
    /// `(1)` matches `(1, 4)`, and the root index matches everything.
    pub fn id_matches(&self, other: &Self) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Packs the index into a single integer, using `widths[l]` bits for level `l`, most
    /// significant level first.
    pub fn encode(&self, widths: &[u32]) -> Result<u32, IndexEncodingError> {
        if widths.len() != self.0.len() {
            return Err(IndexEncodingError::LevelMismatch {
                index: self.clone(),
                levels: widths.len(),
            });
        }
        let mut encoded: u64 = 0;
        for (&value, &width) in self.0.iter().zip(widths) {
            if width < 32 && value >> width != 0 {
                return Err(IndexEncodingError::ValueTooWide {
                    index: self.clone(),
                    value,
                    width,
                });
            }
            encoded = (encoded << width) | value as u64;
        }
        u32::try_from(encoded).map_err(|_| IndexEncodingError::Overflow(self.clone()))
    }
}

impl From<&[u32]> for ComponentIndex {
    fn from(value: &[u32]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<[u32; N]> for ComponentIndex {
    fn from(value: [u32; N]) -> Self {
        Self(value.to_vec())
    }
}

impl Display for ComponentIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum IndexEncodingError {
    #[error("index {index} does not have {levels} levels")]
    LevelMismatch { index: ComponentIndex, levels: usize },
    #[error("value {value} of index {index} does not fit in {width} bits")]
    ValueTooWide {
        index: ComponentIndex,
        value: u32,
        width: u32,
    },
    #[error("encoded index {0} does not fit in 32 bits")]
    Overflow(ComponentIndex),
}
