//! Assembles targets, initiators and an interconnect into a runnable platform.

pub mod registry;

use crate::bus::Target;
use crate::component_index::ComponentIndex;
use crate::config::{ConfigError, FabricConfig};
use crate::initiator::{Action, Initiator};
use crate::interconnect::Interconnect;
use crate::mapping_table::{MappingError, MappingTable};
use crate::segment::Segment;
use crate::simulator::Simulatable;
use crate::Time;
use bitvec::vec::BitVec;
use log::{debug, trace};
use registry::{Registry, RegistryError, TargetArgs};
use thiserror::Error;

/// A target to instantiate through a [`Registry`].
#[derive(Debug, Clone, Eq, PartialEq)]
struct TargetSpec {
    kind: String,
    name: String,
    index: ComponentIndex,
    channels: usize,
}

/// Collects the description of a platform, then builds it in one go.
///
/// ```
/// use lt_fabric_core::config::FabricConfig;
/// use lt_fabric_core::platform::PlatformBuilder;
/// use lt_fabric_core::platform::registry::Registry;
/// use lt_fabric_core::resources::traffic::{Op, ScriptedInitiator};
/// use lt_fabric_core::segment::Segment;
///
/// let mut builder = PlatformBuilder::new(FabricConfig::default());
/// builder
///     .segment(Segment::new("RAM", 0, 0x1000, [0], true).unwrap())
///     .target("ram", "ram0", [0])
///     .initiator(ScriptedInitiator::new("cpu0", 0, 100, [Op::Finish]));
/// let platform = builder.build(&Registry::with_defaults()).unwrap();
/// assert_eq!(1, platform.targets().len());
/// ```
#[derive(Debug, Default)]
pub struct PlatformBuilder {
    config: FabricConfig,
    segments: Vec<Segment>,
    targets: Vec<TargetSpec>,
    initiators: Vec<Box<dyn Initiator>>,
    trace: bool,
}

impl PlatformBuilder {
    pub fn new(config: FabricConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn segment(&mut self, segment: Segment) -> &mut Self {
        self.segments.push(segment);
        self
    }

    /// Adds a target of kind `kind` at `index`, serving every segment mapped to that index.
    pub fn target(
        &mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        index: impl Into<ComponentIndex>,
    ) -> &mut Self {
        self.multi_channel_target(kind, name, index, 1)
    }

    pub fn multi_channel_target(
        &mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        index: impl Into<ComponentIndex>,
        channels: usize,
    ) -> &mut Self {
        self.targets.push(TargetSpec {
            kind: kind.into(),
            name: name.into(),
            index: index.into(),
            channels,
        });
        self
    }

    /// Adds an initiator. Its port is decoded from its source id.
    pub fn initiator(&mut self, initiator: impl Initiator + 'static) -> &mut Self {
        self.initiators.push(Box::new(initiator));
        self
    }

    /// Records every delivery to a target, see [`Interconnect::trace`].
    pub fn trace(&mut self, enabled: bool) -> &mut Self {
        self.trace = enabled;
        self
    }

    pub fn build(self, registry: &Registry) -> Result<Platform, PlatformError> {
        self.config.validate()?;
        let config = self.config;
        if config.level_addr_bits.len() != 1 {
            return Err(PlatformError::Hierarchical(config.level_addr_bits.len()));
        }

        let mut mapping = MappingTable::new(
            config.address_width,
            config.level_addr_bits.clone(),
            config.level_id_bits.clone(),
            config.cacheability_mask,
        )?;
        for segment in self.segments {
            mapping.add(segment)?;
        }
        debug!("Mapping table:\n{mapping}");

        // Targets
        let mut slots: Vec<Option<Box<dyn Target>>> = Vec::new();
        for spec in &self.targets {
            if spec.index.level() != 1 {
                return Err(PlatformError::TargetIndex {
                    name: spec.name.clone(),
                    index: spec.index.clone(),
                });
            }
            let port = spec.index.values()[0] as usize;
            if port >= config.max_targets() {
                return Err(PlatformError::TargetPortOutOfRange {
                    name: spec.name.clone(),
                    port,
                    max: config.max_targets(),
                });
            }
            if slots.len() <= port {
                slots.resize_with(port + 1, || None);
            }
            if slots[port].is_some() {
                return Err(PlatformError::DuplicateTargetPort(port));
            }
            let args = TargetArgs {
                name: &spec.name,
                segments: mapping
                    .segment_list(&spec.index)
                    .into_iter()
                    .cloned()
                    .collect(),
                config: &config,
                channels: spec.channels,
            };
            debug!("Building {} ({}) at target port {port}", spec.name, spec.kind);
            slots[port] = Some(registry.build(&spec.kind, args)?);
        }
        let targets = slots
            .into_iter()
            .enumerate()
            .map(|(port, target)| target.ok_or(PlatformError::MissingTarget(port)))
            .collect::<Result<Vec<_>, _>>()?;
        for segment in mapping.segments() {
            let port = segment.index().values()[0] as usize;
            if port >= targets.len() {
                return Err(PlatformError::UnservedSegment {
                    segment: segment.name().to_owned(),
                    port,
                });
            }
        }

        // Initiators
        let id_bits: u32 = config.level_id_bits.iter().sum();
        let id_masking = mapping.id_masking_table(0)?;
        let mut slots: Vec<Option<Box<dyn Initiator>>> = Vec::new();
        for initiator in self.initiators {
            let src_id = initiator.src_id();
            if id_bits < 32 && src_id >> id_bits != 0 {
                return Err(PlatformError::InitiatorIdTooWide {
                    name: initiator.name().to_owned(),
                    src_id,
                    id_bits,
                });
            }
            let port = id_masking.apply(u64::from(src_id)) as usize;
            if slots.len() <= port {
                slots.resize_with(port + 1, || None);
            }
            if slots[port].is_some() {
                return Err(PlatformError::DuplicateInitiatorPort(port));
            }
            debug!("Initiator {} (id {src_id}) at port {port}", initiator.name());
            slots[port] = Some(initiator);
        }
        let initiators = slots
            .into_iter()
            .enumerate()
            .map(|(port, initiator)| initiator.ok_or(PlatformError::MissingInitiator(port)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut interconnect =
            Interconnect::new(&mapping, initiators.len(), targets.len(), config.latency)?;
        if self.trace {
            interconnect.enable_trace();
        }

        Ok(Platform {
            finished: BitVec::repeat(false, initiators.len()),
            config,
            mapping,
            interconnect,
            targets,
            initiators,
        })
    }
}

/// A flat platform: every initiator and target attached to a single interconnect.
///
/// The platform runs cooperatively, one round per [`tick`](Simulatable::tick).
#[derive(Debug)]
pub struct Platform {
    config: FabricConfig,
    mapping: MappingTable,
    interconnect: Interconnect,
    /// Indexed by target port.
    targets: Vec<Box<dyn Target>>,
    /// Indexed by initiator port.
    initiators: Vec<Box<dyn Initiator>>,
    finished: BitVec,
}

impl Platform {
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn mapping(&self) -> &MappingTable {
        &self.mapping
    }

    pub fn interconnect(&self) -> &Interconnect {
        &self.interconnect
    }

    pub fn targets(&self) -> &[Box<dyn Target>] {
        &self.targets
    }

    pub fn initiators(&self) -> &[Box<dyn Initiator>] {
        &self.initiators
    }

    /// The target named `name`, if it is a `T`.
    pub fn target<T: Target>(&self, name: &str) -> Option<&T> {
        self.targets
            .iter()
            .find(|t| t.name() == name)
            .and_then(|t| t.downcast_ref())
    }

    pub fn target_mut<T: Target>(&mut self, name: &str) -> Option<&mut T> {
        self.targets
            .iter_mut()
            .find(|t| t.name() == name)
            .and_then(|t| t.downcast_mut())
    }

    /// The initiator named `name`, if it is a `T`.
    pub fn initiator<T: Initiator>(&self, name: &str) -> Option<&T> {
        self.initiators
            .iter()
            .find(|i| i.name() == name)
            .and_then(|i| i.downcast_ref())
    }

    pub fn is_finished(&self) -> bool {
        self.finished.all()
    }

    /// Latest local time of any component.
    pub fn time(&self) -> Time {
        let initiators = self.initiators.iter().map(|i| i.local_time());
        let targets = self.targets.iter().map(|t| t.local_time());
        initiators.chain(targets).max().unwrap_or(0)
    }

    /// Delivers pending responses to initiator `port`, then runs it until it blocks.
    fn run_initiator(&mut self, port: usize) -> bool {
        let mut progress = false;
        let initiator = &mut self.initiators[port];
        while let Some(message) = self.interconnect.receive(port) {
            initiator.receive(message);
            progress = true;
        }
        if self.finished[port] {
            return progress;
        }
        loop {
            match initiator.step() {
                Action::Send(message) => {
                    trace!("{} -> {message}", initiator.name());
                    self.interconnect.send(port, message);
                    progress = true;
                }
                Action::Blocked => break,
                Action::Finished => {
                    debug!("{} finished at {}", initiator.name(), initiator.local_time());
                    self.finished.set(port, true);
                    progress = true;
                    break;
                }
            }
        }
        progress
    }

    /// Hands every queued message to target `port`, routing its responses back.
    fn run_target(&mut self, port: usize) -> bool {
        let mut progress = false;
        while let Some(message) = self.interconnect.next_for_target(port) {
            if let Some(response) = self.targets[port].transport(message) {
                self.interconnect.respond(port, response);
            }
            progress = true;
        }
        progress
    }
}

impl Simulatable for Platform {
    fn tick(&mut self) -> bool {
        let mut progress = false;
        for port in 0..self.initiators.len() {
            progress |= self.run_initiator(port);
        }
        for port in 0..self.targets.len() {
            progress |= self.run_target(port);
        }
        progress
    }

    fn is_done(&self) -> bool {
        self.is_finished() && self.interconnect.in_flight() == 0
    }
}

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("a platform has a single interconnect, but {0} decode levels are configured")]
    Hierarchical(usize),
    #[error("target {name} has index {index}, expected a single level")]
    TargetIndex { name: String, index: ComponentIndex },
    #[error("target {name} at port {port}, but only {max} target ports exist")]
    TargetPortOutOfRange { name: String, port: usize, max: usize },
    #[error("two targets at port {0}")]
    DuplicateTargetPort(usize),
    #[error("no target at port {0}")]
    MissingTarget(usize),
    #[error("segment {segment} is mapped to target port {port}, which has no target")]
    UnservedSegment { segment: String, port: usize },
    #[error("initiator {name} has id {src_id:#x}, wider than {id_bits} bits")]
    InitiatorIdTooWide {
        name: String,
        src_id: u32,
        id_bits: u32,
    },
    #[error("two initiators at port {0}")]
    DuplicateInitiatorPort(usize),
    #[error("no initiator at port {0}")]
    MissingInitiator(usize),
}
