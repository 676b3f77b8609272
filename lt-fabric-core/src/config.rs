//! Fabric-wide parameters, checked once when a platform is assembled.

use crate::decoding_table::{AddressMaskingTable, MAX_DECODE_BITS};
use crate::Time;
use thiserror::Error;

/// Quantum used when none is configured.
pub const DEFAULT_QUANTUM: Time = 100;

/// Parameters shared by every component of a platform.
///
/// Widths are runtime values: addresses are carried as `u64` and masked to `address_width` bits,
/// initiator ids as `u32` packed from `level_id_bits`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FabricConfig {
    /// Width of addresses, in bits.
    pub address_width: u32,
    /// Width of a data cell, in bytes.
    pub data_width: usize,
    /// Address bits decoded at each level of the hierarchy, most significant first.
    pub level_addr_bits: Vec<u32>,
    /// Initiator id bits at each level of the hierarchy, most significant first.
    pub level_id_bits: Vec<u32>,
    /// Contiguous mask of the address bits that decide cacheability.
    pub cacheability_mask: u64,
    /// Time a message spends crossing the interconnect.
    pub latency: Time,
    /// How far an initiator may run ahead before announcing its time.
    pub quantum: Time,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            address_width: 32,
            data_width: 4,
            level_addr_bits: vec![8],
            level_id_bits: vec![8],
            cacheability_mask: 0xFF00_0000,
            latency: 10,
            quantum: DEFAULT_QUANTUM,
        }
    }
}

impl FabricConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=64).contains(&self.address_width) {
            return Err(ConfigError::AddressWidth(self.address_width));
        }
        if !self.data_width.is_power_of_two() {
            return Err(ConfigError::DataWidth(self.data_width));
        }
        if self.level_addr_bits.is_empty() {
            return Err(ConfigError::NoLevels);
        }
        if self.level_addr_bits.len() != self.level_id_bits.len() {
            return Err(ConfigError::LevelCount {
                addr_levels: self.level_addr_bits.len(),
                id_levels: self.level_id_bits.len(),
            });
        }
        let addr_bits: u32 = self.level_addr_bits.iter().sum();
        if addr_bits > self.address_width
            || self.level_addr_bits.iter().any(|&b| b > MAX_DECODE_BITS)
        {
            return Err(ConfigError::AddressDecode(self.level_addr_bits.clone()));
        }
        let id_bits: u32 = self.level_id_bits.iter().sum();
        if id_bits > 32 || self.level_id_bits.iter().any(|&b| b > MAX_DECODE_BITS) {
            return Err(ConfigError::IdDecode(self.level_id_bits.clone()));
        }
        let fits = self.address_width == 64 || self.cacheability_mask >> self.address_width == 0;
        if !fits || AddressMaskingTable::from_mask(self.cacheability_mask).is_err() {
            return Err(ConfigError::CacheabilityMask(self.cacheability_mask));
        }
        if self.quantum == 0 {
            return Err(ConfigError::ZeroQuantum);
        }
        Ok(())
    }

    /// Number of initiator ports the top level can address.
    pub fn max_initiators(&self) -> usize {
        1 << self.level_id_bits[0]
    }

    /// Number of target ports the top level can address.
    pub fn max_targets(&self) -> usize {
        1 << self.level_addr_bits[0]
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("address width {0} is not within 1..=64")]
    AddressWidth(u32),
    #[error("data width {0} is not a power of two")]
    DataWidth(usize),
    #[error("at least one decode level is required")]
    NoLevels,
    #[error("{addr_levels} address levels but {id_levels} id levels")]
    LevelCount { addr_levels: usize, id_levels: usize },
    #[error("address decode bits {0:?} do not fit the address width")]
    AddressDecode(Vec<u32>),
    #[error("id decode bits {0:?} do not fit in 32 bits")]
    IdDecode(Vec<u32>),
    #[error("cacheability mask {0:#x} is not a contiguous mask within the address width")]
    CacheabilityMask(u64),
    #[error("the quantum must be at least one time unit")]
    ZeroQuantum,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(Ok(()), FabricConfig::default().validate());
    }

    #[test]
    fn invalid_fields() {
        let config = FabricConfig {
            data_width: 3,
            ..FabricConfig::default()
        };
        assert_eq!(Err(ConfigError::DataWidth(3)), config.validate());

        let config = FabricConfig {
            level_id_bits: vec![4, 4],
            ..FabricConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LevelCount { .. })
        ));

        let config = FabricConfig {
            cacheability_mask: 0xF0F0_0000,
            ..FabricConfig::default()
        };
        assert_eq!(
            Err(ConfigError::CacheabilityMask(0xF0F0_0000)),
            config.validate()
        );

        let config = FabricConfig {
            quantum: 0,
            ..FabricConfig::default()
        };
        assert_eq!(Err(ConfigError::ZeroQuantum), config.validate());
    }
}
