//! Defines the interface of components addressed through an interconnect.

use crate::message::Message;
use crate::Time;
use downcast_rs::{impl_downcast, Downcast};
use std::fmt::Debug;

/// A component addressed by transactions: memory, peripherals, or the uplink to another
/// interconnect.
///
/// The interconnect hands every target one message for each arbitration decision, in
/// non-decreasing timestamp order. Most of these are null messages, which tell the target how far
/// simulated time has progressed without asking anything of it.
///
/// Implementors must uphold the following:
/// - A null message only advances the target's local time. It never changes any other
///   observable state, and is never answered.
/// - Every transaction is answered exactly once, with the same transaction carrying the result in
///   its `data` and `status`. An access the target cannot serve is answered with
///   [`ResponseStatus::Error`](crate::message::ResponseStatus::Error), never with a panic.
/// - A response is never timestamped earlier than the command it answers.
///
/// Responses are returned synchronously from [`transport`](Self::transport). The time a target
/// needs to serve a request is expressed by the response's timestamp only.
pub trait Target: Downcast + Debug {
    /// Name, as used in logs and traces.
    fn name(&self) -> &str;

    /// Handles one message from the interconnect, returning the response to a transaction.
    fn transport(&mut self, message: Message) -> Option<Message>;

    /// The latest time this target has observed.
    fn local_time(&self) -> Time;
}

impl_downcast!(Target);
