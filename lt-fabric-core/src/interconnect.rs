//! The interconnect: one arbitration point between initiator and target ports.
//!
//! Commands flow initiator -> [`CentralizedBuffer`] -> [`CommandRouter`] -> target port FIFO.
//! Responses flow target -> [`ResponseRouter`] -> initiator mailbox.

use crate::arbiter::CentralizedBuffer;
use crate::component_index::ComponentIndex;
use crate::mapping_table::{MappingError, MappingTable};
use crate::message::{Message, MessageKind, Payload};
use crate::router::{CommandRouter, Decision, Destination, ResponseRouter};
use crate::{Time, UNIT_TIME};
use log::{trace, warn};
use std::collections::VecDeque;
use std::fmt;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
pub struct Interconnect {
    buffer: CentralizedBuffer,
    command_router: CommandRouter,
    response_router: ResponseRouter,
    ports: Vec<TargetPort>,
    mailboxes: Vec<VecDeque<Message>>,
    stats: InterconnectStats,
    trace: Option<Vec<TraceEvent>>,
}

/// Outbound side of a target port.
#[derive(Debug, Clone, Default)]
struct TargetPort {
    fifo: VecDeque<Message>,
    /// No message leaves the port earlier than this. Raised by deliveries and responses.
    time: Time,
    /// Arbitrated time of the last message delivered.
    command_time: Time,
}

/// Counters of the messages an interconnect handled.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct InterconnectStats {
    /// Transactions routed to a target.
    pub transactions: u64,
    /// Null messages released by the arbiter.
    pub nulls: u64,
    /// Transactions rejected with an error response.
    pub errors: u64,
    /// Activity and inactivity messages received.
    pub activity: u64,
    pub local: u64,
    pub remote: u64,
    /// Responses routed back to initiators.
    pub responses: u64,
    /// Null messages dropped from a port FIFO because a later message was queued behind them.
    pub skipped_nulls: u64,
    /// Messages arbitrated earlier than one already delivered to the same target.
    pub inversions: u64,
}

impl Display for InterconnectStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transactions: {} (local {}, remote {}), responses: {}, errors: {}, nulls: {} \
             ({} skipped), activity: {}, inversions: {}",
            self.transactions,
            self.local,
            self.remote,
            self.responses,
            self.errors,
            self.nulls,
            self.skipped_nulls,
            self.activity,
            self.inversions
        )
    }
}

/// One message handed to a target.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TraceEvent {
    /// Delivery time, after port contention.
    pub time: Time,
    /// Time the arbiter released the message with, latency included.
    pub arbitrated: Time,
    pub port: usize,
    pub kind: MessageKind,
    pub src_id: Option<u32>,
    pub pkt_id: Option<u32>,
}

impl Display for TraceEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.time, self.port, self.kind)?;
        if let (Some(src_id), Some(pkt_id)) = (self.src_id, self.pkt_id) {
            write!(f, " {src_id} {pkt_id}")?;
        }
        Ok(())
    }
}

impl Interconnect {
    /// Creates the top-level interconnect of a flat platform.
    pub fn new(
        mapping: &MappingTable,
        initiators: usize,
        targets: usize,
        latency: Time,
    ) -> Result<Self, MappingError> {
        Ok(Self::with_routers(
            initiators,
            CommandRouter::new(mapping, targets, latency)?,
            ResponseRouter::new(mapping, initiators, latency)?,
        ))
    }

    /// Creates the local crossbar of `cluster`. Both `initiators` and `targets` count the uplink
    /// port, which is the last port on each side.
    pub fn local_crossbar(
        mapping: &MappingTable,
        cluster: &ComponentIndex,
        initiators: usize,
        targets: usize,
        latency: Time,
    ) -> Result<Self, MappingError> {
        Ok(Self::with_routers(
            initiators,
            CommandRouter::local(mapping, cluster, targets, latency)?,
            ResponseRouter::local(mapping, cluster, initiators, latency)?,
        ))
    }

    fn with_routers(
        initiators: usize,
        command_router: CommandRouter,
        response_router: ResponseRouter,
    ) -> Self {
        Self {
            buffer: CentralizedBuffer::new(initiators),
            ports: vec![TargetPort::default(); command_router.targets()],
            mailboxes: vec![VecDeque::new(); initiators],
            command_router,
            response_router,
            stats: InterconnectStats::default(),
            trace: None,
        }
    }

    pub fn initiators(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn targets(&self) -> usize {
        self.ports.len()
    }

    pub fn buffer(&self) -> &CentralizedBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> &InterconnectStats {
        &self.stats
    }

    /// Starts recording every message handed to a target.
    pub fn enable_trace(&mut self) {
        self.trace.get_or_insert_with(Vec::new);
    }

    /// Recorded deliveries, if tracing is enabled.
    pub fn trace(&self) -> Option<&[TraceEvent]> {
        self.trace.as_deref()
    }

    /// Accepts `message` from initiator port `from`, then releases everything the arbiter can.
    ///
    /// An initiator becoming active again gets a null message back carrying the time it resumes
    /// at, which is never earlier than what the arbiter already released.
    pub fn send(&mut self, from: usize, message: Message) {
        let wake = match message.payload {
            Payload::Activity { active } => {
                self.stats.activity += 1;
                active.then(|| message.time.max(self.buffer.released()))
            }
            _ => None,
        };
        self.buffer.push(from, message);
        if let Some(time) = wake {
            trace!("Initiator {from} resumes at {time}");
            self.mailboxes[from].push_back(Message::null(time));
        }
        self.arbitrate();
    }

    /// Includes or excludes initiator port `port` from arbitration, then releases everything the
    /// arbiter can.
    ///
    /// A nested crossbar excludes the port a request came back in through while it re-forwards
    /// that request.
    pub fn set_eligible(&mut self, port: usize, eligible: bool) {
        self.buffer.set_eligible(port, eligible);
        self.arbitrate();
    }

    /// Releases messages from the arbiter while it allows it.
    fn arbitrate(&mut self) {
        while self.buffer.can_pop() {
            let Some((from, message)) = self.buffer.pop() else {
                break;
            };
            let routed = self.command_router.route(from, message);
            match routed.decision {
                Decision::Broadcast => self.stats.nulls += 1,
                Decision::Local { .. } => {
                    self.stats.transactions += 1;
                    self.stats.local += 1;
                }
                Decision::Remote { .. } => {
                    self.stats.transactions += 1;
                    self.stats.remote += 1;
                    self.buffer.set_external_access(from, true);
                }
                Decision::Rejected => self.stats.errors += 1,
            }
            for delivery in routed.deliveries {
                match delivery.destination {
                    Destination::Target(port) => self.ports[port].fifo.push_back(delivery.message),
                    Destination::Initiator(port) => {
                        self.mailboxes[port].push_back(delivery.message)
                    }
                }
            }
        }
    }

    /// Takes the next message for target port `port`.
    ///
    /// A null message with a later message queued behind it is dropped, since the later one
    /// carries at least the same time. The returned message is never earlier than the previous
    /// one of the same port, nor than the last response of its target. A message arbitrated
    /// earlier than the previous one is an ordering inversion: it is logged and counted.
    pub fn next_for_target(&mut self, port: usize) -> Option<Message> {
        let target_port = &mut self.ports[port];
        let mut message = target_port.fifo.pop_front()?;
        while message.is_null() {
            match target_port.fifo.pop_front() {
                Some(next) => {
                    self.stats.skipped_nulls += 1;
                    message = next;
                }
                None => break,
            }
        }

        let arbitrated = message.time;
        if arbitrated < target_port.command_time {
            warn!(
                "Target {port} gets {message} after a message at {}",
                target_port.command_time
            );
            self.stats.inversions += 1;
        }
        target_port.command_time = target_port.command_time.max(arbitrated);

        message.time = message.time.max(target_port.time);
        target_port.time = message.time;
        trace!("Target {port} <- {message}");

        if let Some(trace) = &mut self.trace {
            let transaction = message.as_transaction();
            trace.push(TraceEvent {
                time: message.time,
                arbitrated,
                port,
                kind: message.kind(),
                src_id: transaction.map(|t| t.src_id),
                pkt_id: transaction.map(|t| t.pkt_id),
            });
        }
        Some(message)
    }

    /// Returns `true` if target port `port` has messages waiting.
    pub fn has_pending(&self, port: usize) -> bool {
        !self.ports[port].fifo.is_empty()
    }

    /// Accepts the response of the target at port `port` and routes it to its initiator.
    pub fn respond(&mut self, port: usize, response: Message) {
        let target_port = &mut self.ports[port];
        target_port.time = target_port.time.max(response.time.saturating_add(UNIT_TIME));

        let (initiator, response) = self.response_router.route(response);
        if self.command_router.uplink() == Some(port) && self.buffer.has_external_access(initiator)
        {
            self.buffer.set_external_access(initiator, false);
        }
        self.stats.responses += 1;
        trace!("Initiator {initiator} <- {response}");
        self.mailboxes[initiator].push_back(response);
    }

    /// Takes the next message for initiator port `port`.
    pub fn receive(&mut self, port: usize) -> Option<Message> {
        self.mailboxes[port].pop_front()
    }

    /// Number of messages waiting in any target FIFO or initiator mailbox.
    pub fn in_flight(&self) -> usize {
        self.ports.iter().map(|p| p.fifo.len()).sum::<usize>()
            + self.mailboxes.iter().map(VecDeque::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Transaction;
    use crate::segment::Segment;

    fn mapping() -> MappingTable {
        let mut mt = MappingTable::new(32, [12], [4], 0xFFF0_0000).unwrap();
        mt.add(Segment::new("RAM", 0x0000_0000, 0x0010_0000, [0], true).unwrap())
            .unwrap();
        mt.add(Segment::new("TTY", 0x0020_0000, 0x100, [1], false).unwrap())
            .unwrap();
        mt
    }

    #[test]
    fn nulls_are_skipped_behind_later_messages() {
        let mut ic = Interconnect::new(&mapping(), 1, 2, 1).unwrap();
        ic.send(0, Message::null(1));
        ic.receive(0).unwrap();
        ic.send(0, Message::null(2));
        ic.receive(0).unwrap();
        ic.send(0, Message::transaction(Transaction::write(0, 0, 0x0020_0000, [b'x']), 3));

        // Target 1 has null@2, null@3, WRITE@4 queued; only the write is handed out.
        let message = ic.next_for_target(1).unwrap();
        assert_eq!(MessageKind::Transaction(crate::message::Command::Write), message.kind());
        assert_eq!(4, message.time);
        assert_eq!(None, ic.next_for_target(1));
        assert_eq!(2, ic.stats().skipped_nulls);

        // Target 0 only ever gets nulls; the last one survives.
        assert_eq!(Some(Message::null(4)), ic.next_for_target(0));
    }

    #[test]
    fn port_time_never_regresses() {
        let mut ic = Interconnect::new(&mapping(), 1, 2, 0).unwrap();
        ic.send(0, Message::transaction(Transaction::read(0, 0, 0x100, 4), 5));
        let command = ic.next_for_target(0).unwrap();
        ic.respond(0, Message::transaction(command.as_transaction().unwrap().clone(), 12));
        assert_eq!(12, ic.receive(0).unwrap().time);

        ic.send(0, Message::transaction(Transaction::read(0, 1, 0x100, 4), 6));
        // The port already saw a response at 12.
        assert_eq!(13, ic.next_for_target(0).unwrap().time);
        // Response contention is not an ordering inversion.
        assert_eq!(0, ic.stats().inversions);
    }

    #[test]
    fn held_back_message_is_an_inversion() {
        let mut ic = Interconnect::new(&mapping(), 2, 2, 0).unwrap();
        ic.enable_trace();
        ic.set_eligible(0, false);
        ic.send(0, Message::transaction(Transaction::read(0, 0, 0x100, 4), 1));
        ic.send(1, Message::transaction(Transaction::read(1, 0, 0x200, 4), 9));
        ic.set_eligible(0, true);
        ic.send(1, Message::null(20));

        assert_eq!(9, ic.next_for_target(0).unwrap().time);
        assert_eq!(0, ic.stats().inversions);
        // Released at 1 but delivered after the message at 9.
        assert_eq!(9, ic.next_for_target(0).unwrap().time);
        assert_eq!(1, ic.stats().inversions);

        let arbitrated: Vec<Time> = ic.trace().unwrap().iter().map(|e| e.arbitrated).collect();
        assert_eq!(vec![9, 1], arbitrated);
    }

    #[test]
    fn wake_up_is_acknowledged_at_released_time() {
        let mut ic = Interconnect::new(&mapping(), 2, 2, 1).unwrap();
        ic.send(1, Message::activity(false, 0));
        ic.send(0, Message::transaction(Transaction::read(0, 0, 0x100, 4), 90));
        assert_eq!(90, ic.buffer().released());

        ic.send(1, Message::activity(true, 50));
        assert_eq!(Some(Message::null(90)), ic.receive(1));
        assert_eq!(90, ic.buffer().last_push(1));

        ic.send(1, Message::activity(false, 90));
        ic.send(1, Message::activity(true, 120));
        assert_eq!(Some(Message::null(120)), ic.receive(1));
    }

    #[test]
    fn ineligible_port_is_not_waited_for() {
        let mut ic = Interconnect::new(&mapping(), 2, 2, 1).unwrap();
        ic.send(0, Message::transaction(Transaction::read(0, 0, 0x100, 4), 5));
        assert!(!ic.has_pending(0));

        ic.set_eligible(1, false);
        assert!(ic.has_pending(0));
        assert_eq!(6, ic.next_for_target(0).unwrap().time);

        ic.set_eligible(1, true);
        ic.send(0, Message::transaction(Transaction::read(0, 1, 0x100, 4), 7));
        assert!(!ic.has_pending(0));
    }

    #[test]
    fn remote_access_sets_external_access_until_response() {
        let mut mt = MappingTable::new(32, [4, 4], [2, 2], 0xFF00_0000).unwrap();
        mt.add(Segment::new("ram00", 0x0000_0000, 0x1000, [0, 0], true).unwrap())
            .unwrap();
        mt.add(Segment::new("ram10", 0x1000_0000, 0x1000, [1, 0], true).unwrap())
            .unwrap();
        let cluster = ComponentIndex::new([1]);
        // Initiator 0 plus uplink; target 0 plus uplink.
        let mut ic = Interconnect::local_crossbar(&mt, &cluster, 2, 2, 1).unwrap();
        ic.send(1, Message::activity(false, 0));

        ic.send(0, Message::transaction(Transaction::read(0b0100, 0, 0x10, 4), 0));
        assert!(ic.buffer().has_external_access(0));
        assert_eq!(1, ic.stats().remote);

        let forwarded = ic.next_for_target(1).unwrap();
        assert_eq!(0x10, forwarded.as_transaction().unwrap().address);

        ic.respond(1, Message::transaction(forwarded.as_transaction().unwrap().clone(), 30));
        assert!(!ic.buffer().has_external_access(0));
        assert_eq!(31, ic.receive(0).unwrap().time);
    }

    #[test]
    fn trace_records_deliveries() {
        let mut ic = Interconnect::new(&mapping(), 1, 2, 2).unwrap();
        ic.enable_trace();
        ic.send(0, Message::transaction(Transaction::read(0, 9, 0x0005_0000, 4), 10));
        ic.next_for_target(0).unwrap();
        ic.next_for_target(1).unwrap();

        let lines: Vec<String> = ic.trace().unwrap().iter().map(|e| e.to_string()).collect();
        assert_eq!(vec!["12 0 READ 0 9", "12 1 NULL"], lines);
    }
}
