//! Loosely-timed interconnect fabric for parallel discrete-event simulation.
//!
//! Initiators and targets exchange timestamped [`Message`](message::Message)s through an
//! [`Interconnect`](interconnect::Interconnect). A message is only released once every active
//! initiator has a message pending, so components never observe messages out of timestamp order.
//! Initiators with nothing to say keep the fabric moving with null messages.

#[macro_use]
extern crate static_assertions;

pub mod address_map;
pub mod address_range;
pub mod arbiter;
pub mod bus;
pub mod component_index;
pub mod config;
pub mod decoding_table;
pub mod initiator;
pub mod interconnect;
pub mod local_time;
pub mod mapping_table;
pub mod message;
pub mod platform;
pub mod resources;
pub mod router;
pub mod segment;
pub mod simulator;

/// Re-export of [`AddressRange`] for convenience.
pub use address_range::AddressRange;

/// Simulated time, in abstract time units.
pub type Time = u64;

/// Smallest step of simulated time.
pub const UNIT_TIME: Time = 1;
