//! Named constructors for target components.

use crate::bus::Target;
use crate::config::FabricConfig;
use crate::resources::ram::Ram;
use crate::resources::tty::Tty;
use crate::segment::Segment;
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Debug, Formatter};
use thiserror::Error;

/// What a constructor gets to build one target instance.
#[derive(Debug, Clone)]
pub struct TargetArgs<'a> {
    pub name: &'a str,
    /// Every segment mapped to the target, in the order they were added to the mapping table.
    pub segments: Vec<Segment>,
    pub config: &'a FabricConfig,
    /// Number of channels for multi-channel components (terminals of a TTY). At least 1.
    pub channels: usize,
}

pub type Constructor = Box<dyn Fn(TargetArgs<'_>) -> Result<Box<dyn Target>, String>>;

/// Table of target constructors, keyed by component kind.
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Debug for Registry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry {
    /// Creates a registry without any kind.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Creates a registry knowing the built-in kinds `"ram"` and `"tty"`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry
            .constructors
            .insert("ram".to_owned(), Box::new(build_ram));
        registry
            .constructors
            .insert("tty".to_owned(), Box::new(build_tty));
        registry
    }

    /// Registers `constructor` under `kind`. A kind can only be registered once.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> Result<(), RegistryError>
    where
        F: Fn(TargetArgs<'_>) -> Result<Box<dyn Target>, String> + 'static,
    {
        let kind = kind.into();
        if self.constructors.contains_key(&kind) {
            return Err(RegistryError::Duplicate(kind));
        }
        debug!("Registering component kind {kind:?}");
        self.constructors.insert(kind, Box::new(constructor));
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Builds a target of kind `kind`.
    pub fn build(&self, kind: &str, args: TargetArgs<'_>) -> Result<Box<dyn Target>, RegistryError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| RegistryError::Unknown(kind.to_owned()))?;
        let name = args.name.to_owned();
        constructor(args).map_err(|reason| RegistryError::Construction {
            kind: kind.to_owned(),
            name,
            reason,
        })
    }
}

fn build_ram(args: TargetArgs<'_>) -> Result<Box<dyn Target>, String> {
    let ram = Ram::new(args.name, args.segments, args.config.data_width)
        .ok_or("segments too large to be held in memory")?;
    Ok(Box::new(ram))
}

fn build_tty(args: TargetArgs<'_>) -> Result<Box<dyn Target>, String> {
    let [segment] = <[Segment; 1]>::try_from(args.segments)
        .map_err(|segments| format!("needs exactly one segment, has {}", segments.len()))?;
    let tty = Tty::new(args.name, segment, args.config.data_width, args.channels)
        .ok_or("needs at least one terminal")?;
    Ok(Box::new(tty))
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum RegistryError {
    #[error("component kind {0:?} is already registered")]
    Duplicate(String),
    #[error("unknown component kind {0:?}")]
    Unknown(String),
    #[error("cannot build {name} ({kind}): {reason}")]
    Construction {
        kind: String,
        name: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>(config: &'a FabricConfig, segments: Vec<Segment>) -> TargetArgs<'a> {
        TargetArgs {
            name: "dev",
            segments,
            config,
            channels: 1,
        }
    }

    #[test]
    fn builds_default_kinds() {
        let registry = Registry::with_defaults();
        assert_eq!(vec!["ram", "tty"], registry.kinds().collect::<Vec<_>>());

        let config = FabricConfig::default();
        let segment = Segment::new("RAM", 0x1000, 0x100, [0], true).unwrap();
        let ram = registry.build("ram", args(&config, vec![segment])).unwrap();
        assert_eq!("dev", ram.name());
        assert!(ram.downcast_ref::<Ram>().is_some());
    }

    #[test]
    fn tty_needs_one_segment() {
        let registry = Registry::with_defaults();
        let config = FabricConfig::default();
        let error = registry.build("tty", args(&config, Vec::new())).unwrap_err();
        assert!(matches!(error, RegistryError::Construction { .. }));
    }

    #[test]
    fn unknown_and_duplicate_kinds() {
        let mut registry = Registry::with_defaults();
        let config = FabricConfig::default();
        assert_eq!(
            Some(RegistryError::Unknown("dma".to_owned())),
            registry.build("dma", args(&config, Vec::new())).err()
        );
        assert_eq!(
            Err(RegistryError::Duplicate("ram".to_owned())),
            registry.register("ram", |_| Err("unused".to_owned()))
        );
        assert!(registry.register("null", |_| Err("unused".to_owned())).is_ok());
        assert!(registry.contains("null"));
    }
}
