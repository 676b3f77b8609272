//! Defines the interface of components originating transactions.

use crate::message::Message;
use crate::Time;
use downcast_rs::{impl_downcast, Downcast};
use std::fmt::Debug;

/// What an initiator did when given the chance to run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Action {
    /// The initiator emitted a message and wants to run again.
    Send(Message),
    /// The initiator cannot progress until it receives a message.
    Blocked,
    /// The initiator is done for good. It must have announced inactivity before.
    Finished,
}

/// A bus master: processor model, DMA engine, traffic generator.
///
/// Initiators run cooperatively. [`step`](Self::step) runs the initiator until it emits a message
/// or cannot progress any further, and must not block.
///
/// The interconnect waits for every active initiator before releasing anything, so an initiator
/// with nothing to send must still either emit a null message once per quantum of local time, or
/// announce inactivity. Messages must be emitted in non-decreasing timestamp order, and an
/// initiator has at most one message in flight: after a transaction it waits for the response,
/// after a null message for the null message echoed back by the interconnect.
pub trait Initiator: Downcast + Debug {
    fn name(&self) -> &str;

    /// Packed id carried as source id by every transaction of this initiator.
    fn src_id(&self) -> u32;

    fn step(&mut self) -> Action;

    /// Delivers a response or null message from the interconnect.
    fn receive(&mut self, message: Message);

    fn local_time(&self) -> Time;
}

impl_downcast!(Initiator);
