//! Command and response routing behind the arbitration point.

use crate::address_map::AddressMap;
use crate::component_index::ComponentIndex;
use crate::decoding_table::{AddressDecodingTable, AddressMaskingTable};
use crate::mapping_table::{MappingError, MappingTable};
use crate::message::{Message, Payload};
use crate::Time;
use log::{trace, warn};

/// Where a routed message goes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Destination {
    /// A target port of the interconnect.
    Target(usize),
    /// Directly back to an initiator port, bypassing the targets.
    Initiator(usize),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Delivery {
    pub destination: Destination,
    pub message: Message,
}

/// What the router decided for one arbitrated message.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Decision {
    /// A null message, broadcast to every target and echoed to its sender.
    Broadcast,
    /// A transaction for a target of this interconnect.
    Local { target: usize },
    /// A transaction for a target outside this cluster, forwarded to the uplink port.
    Remote { uplink: usize },
    /// A transaction nobody serves, answered with an error response.
    Rejected,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Routed {
    pub decision: Decision,
    pub deliveries: Vec<Delivery>,
}

/// Turns one arbitrated command into the real transaction for its target plus null messages for
/// every other target, so no target waits on a message that will never come.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    routing: AddressDecodingTable<usize>,
    /// Exact segment ranges, to reject addresses in unmapped holes of a decoded page.
    coverage: AddressMap<usize>,
    /// Present in local crossbar mode, where the last target port is the uplink.
    locality: Option<AddressDecodingTable<bool>>,
    targets: usize,
    latency: Time,
}

impl CommandRouter {
    /// Router for the top-level interconnect, with `targets` target ports.
    pub fn new(mapping: &MappingTable, targets: usize, latency: Time) -> Result<Self, MappingError> {
        Ok(Self {
            routing: mapping.routing_table(&ComponentIndex::root(), targets)?,
            coverage: mapping.coverage().clone(),
            locality: None,
            targets,
            latency,
        })
    }

    /// Router for the local crossbar of `cluster`. `targets` includes the uplink port, which is
    /// the last one.
    pub fn local(
        mapping: &MappingTable,
        cluster: &ComponentIndex,
        targets: usize,
        latency: Time,
    ) -> Result<Self, MappingError> {
        assert!(targets > 0, "a local crossbar needs at least its uplink port");
        Ok(Self {
            routing: mapping.routing_table(cluster, targets)?,
            coverage: mapping.coverage().clone(),
            locality: Some(mapping.locality_table(cluster)?),
            targets,
            latency,
        })
    }

    pub fn targets(&self) -> usize {
        self.targets
    }

    pub fn latency(&self) -> Time {
        self.latency
    }

    /// The uplink port, in local crossbar mode.
    pub fn uplink(&self) -> Option<usize> {
        self.locality.as_ref().map(|_| self.targets - 1)
    }

    /// Routes `message`, released from the slot of initiator `from`.
    ///
    /// # Panics
    ///
    /// Panics on activity messages, which the arbiter consumes.
    pub fn route(&self, from: usize, message: Message) -> Routed {
        let time = message.time.saturating_add(self.latency);

        let transaction = match message.payload {
            Payload::Transaction(transaction) => transaction,
            Payload::Null => {
                trace!("Broadcasting null message from {from} at {time}");
                let mut deliveries = self.nulls_except(None, time);
                deliveries.push(Delivery {
                    destination: Destination::Initiator(from),
                    message: Message::null(time),
                });
                return Routed {
                    decision: Decision::Broadcast,
                    deliveries,
                };
            }
            Payload::Activity { .. } => {
                panic!("activity message from {from} reached the command router")
            }
        };

        let address = transaction.address;
        if self.coverage.value(address).is_none() {
            warn!(
                "Rejecting {} from initiator {from} to unmapped address {address:#x}",
                transaction.command
            );
            return self.reject(from, Message::transaction(transaction.into_error(), time));
        }

        if let (Some(locality), Some(uplink)) = (&self.locality, self.uplink()) {
            if !locality[address] {
                trace!("Forwarding {address:#x} from {from} to uplink {uplink} at {time}");
                let mut deliveries = self.nulls_except(Some(uplink), time);
                deliveries.push(Delivery {
                    destination: Destination::Target(uplink),
                    message: Message::transaction(transaction, time),
                });
                return Routed {
                    decision: Decision::Remote { uplink },
                    deliveries,
                };
            }
        }

        let target = self.routing[address];
        if target >= self.targets {
            warn!(
                "Rejecting {} from initiator {from}: {address:#x} decodes to missing target {target}",
                transaction.command
            );
            return self.reject(from, Message::transaction(transaction.into_error(), time));
        }

        trace!("Routing {address:#x} from {from} to target {target} at {time}");
        let mut deliveries = self.nulls_except(Some(target), time);
        deliveries.push(Delivery {
            destination: Destination::Target(target),
            message: Message::transaction(transaction, time),
        });
        Routed {
            decision: Decision::Local { target },
            deliveries,
        }
    }

    fn reject(&self, from: usize, response: Message) -> Routed {
        let mut deliveries = self.nulls_except(None, response.time);
        deliveries.push(Delivery {
            destination: Destination::Initiator(from),
            message: response,
        });
        Routed {
            decision: Decision::Rejected,
            deliveries,
        }
    }

    fn nulls_except(&self, except: Option<usize>, time: Time) -> Vec<Delivery> {
        (0..self.targets)
            .filter(|&port| Some(port) != except)
            .map(|port| Delivery {
                destination: Destination::Target(port),
                message: Message::null(time),
            })
            .collect()
    }
}

/// Routes responses back to the initiator port their source id designates.
#[derive(Debug, Clone)]
pub struct ResponseRouter {
    id_masking: AddressMaskingTable,
    /// Present in local crossbar mode, where the last initiator port is the uplink.
    id_locality: Option<AddressDecodingTable<bool>>,
    initiators: usize,
    latency: Time,
}

impl ResponseRouter {
    /// Router for the top-level interconnect, with `initiators` initiator ports.
    pub fn new(
        mapping: &MappingTable,
        initiators: usize,
        latency: Time,
    ) -> Result<Self, MappingError> {
        Ok(Self {
            id_masking: mapping.id_masking_table(0)?,
            id_locality: None,
            initiators,
            latency,
        })
    }

    /// Router for the local crossbar of `cluster`. `initiators` includes the uplink port, which is
    /// the last one.
    pub fn local(
        mapping: &MappingTable,
        cluster: &ComponentIndex,
        initiators: usize,
        latency: Time,
    ) -> Result<Self, MappingError> {
        assert!(initiators > 0, "a local crossbar needs at least its uplink port");
        Ok(Self {
            id_masking: mapping.id_masking_table(cluster.level())?,
            id_locality: Some(mapping.id_locality_table(cluster)?),
            initiators,
            latency,
        })
    }

    pub fn initiators(&self) -> usize {
        self.initiators
    }

    /// The uplink port, in local crossbar mode.
    pub fn uplink(&self) -> Option<usize> {
        self.id_locality.as_ref().map(|_| self.initiators - 1)
    }

    /// Returns the initiator port `response` is for, and the response delayed by the
    /// interconnect latency.
    ///
    /// # Panics
    ///
    /// Panics if `response` is not a transaction, or if its source id designates no initiator
    /// port.
    pub fn route(&self, response: Message) -> (usize, Message) {
        let Some(transaction) = response.as_transaction() else {
            panic!("targets only send transactions back, got {response}");
        };
        let src_id = transaction.src_id;

        let port = match (&self.id_locality, self.uplink()) {
            (Some(id_locality), Some(uplink)) if !id_locality[src_id as u64] => uplink,
            _ => self.id_masking.apply(src_id as u64) as usize,
        };
        assert!(
            port < self.initiators,
            "response for source id {src_id} routed to unknown initiator {port}"
        );
        trace!("Routing response for {src_id} to initiator {port}");
        (port, response.delayed(self.latency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ResponseStatus, Transaction};
    use crate::segment::Segment;

    fn mapping() -> MappingTable {
        let mut mt = MappingTable::new(32, [12], [4], 0xFFF0_0000).unwrap();
        mt.add(Segment::new("RAM", 0x0000_0000, 0x0010_0000, [0], true).unwrap())
            .unwrap();
        mt.add(Segment::new("TTY", 0x0020_0000, 0x100, [1], false).unwrap())
            .unwrap();
        mt.add(Segment::new("GHOST", 0x0030_0000, 0x100, [5], false).unwrap())
            .unwrap();
        mt
    }

    fn targets_of(routed: &Routed) -> Vec<(usize, bool)> {
        routed
            .deliveries
            .iter()
            .filter_map(|d| match d.destination {
                Destination::Target(port) => Some((port, d.message.is_null())),
                Destination::Initiator(_) => None,
            })
            .collect()
    }

    #[test]
    fn real_transaction_with_nulls_elsewhere() {
        let router = CommandRouter::new(&mapping(), 2, 3).unwrap();
        let read = Message::transaction(Transaction::read(0, 1, 0x0005_0000, 4), 10);
        let routed = router.route(0, read);

        assert_eq!(Decision::Local { target: 0 }, routed.decision);
        assert_eq!(vec![(1, true), (0, false)], targets_of(&routed));
        assert!(routed.deliveries.iter().all(|d| d.message.time == 13));
    }

    #[test]
    fn null_is_broadcast_and_echoed() {
        let router = CommandRouter::new(&mapping(), 2, 3).unwrap();
        let routed = router.route(1, Message::null(20));

        assert_eq!(Decision::Broadcast, routed.decision);
        assert_eq!(vec![(0, true), (1, true)], targets_of(&routed));
        assert_eq!(
            Some(&Delivery {
                destination: Destination::Initiator(1),
                message: Message::null(23),
            }),
            routed.deliveries.last()
        );
    }

    #[test]
    fn unmapped_address_is_rejected() {
        let router = CommandRouter::new(&mapping(), 2, 1).unwrap();
        for address in [0x0020_0100, 0x8000_0000, 0x0030_0000] {
            let write = Message::transaction(Transaction::write(0, 7, address, [1, 2]), 5);
            let routed = router.route(0, write);

            assert_eq!(Decision::Rejected, routed.decision);
            assert_eq!(vec![(0, true), (1, true)], targets_of(&routed));
            let response = &routed.deliveries.last().unwrap().message;
            assert_eq!(
                Some(ResponseStatus::Error),
                response.as_transaction().map(|t| t.status)
            );
        }
    }

    #[test]
    fn response_follows_source_id() {
        let router = ResponseRouter::new(&mapping(), 3, 2).unwrap();
        let mut read = Transaction::read(2, 0, 0x10, 4);
        read.status = ResponseStatus::Ok;
        let (port, response) = router.route(Message::transaction(read, 40));
        assert_eq!(2, port);
        assert_eq!(42, response.time);
    }

    #[test]
    #[should_panic(expected = "unknown initiator")]
    fn response_to_unknown_initiator() {
        let router = ResponseRouter::new(&mapping(), 2, 2).unwrap();
        router.route(Message::transaction(Transaction::read(9, 0, 0x10, 4), 40));
    }

    fn clustered() -> MappingTable {
        let mut mt = MappingTable::new(32, [4, 4], [2, 2], 0xFF00_0000).unwrap();
        mt.add(Segment::new("ram00", 0x0000_0000, 0x1000, [0, 0], true).unwrap())
            .unwrap();
        mt.add(Segment::new("ram10", 0x1000_0000, 0x1000, [1, 0], true).unwrap())
            .unwrap();
        mt.add(Segment::new("tty11", 0x1100_0000, 0x100, [1, 1], false).unwrap())
            .unwrap();
        mt
    }

    #[test]
    fn local_crossbar_forwards_remote_accesses() {
        let cluster = ComponentIndex::new([1]);
        // Two local targets plus the uplink.
        let router = CommandRouter::local(&clustered(), &cluster, 3, 1).unwrap();
        assert_eq!(Some(2), router.uplink());

        let local = Message::transaction(Transaction::read(0b0100, 0, 0x1100_0010, 4), 0);
        assert_eq!(Decision::Local { target: 1 }, router.route(0, local).decision);

        let remote = Message::transaction(Transaction::read(0b0100, 1, 0x0000_0010, 4), 0);
        let routed = router.route(0, remote);
        assert_eq!(Decision::Remote { uplink: 2 }, routed.decision);
        assert_eq!(vec![(0, true), (1, true), (2, false)], targets_of(&routed));
    }

    #[test]
    fn local_crossbar_sends_foreign_responses_up() {
        let cluster = ComponentIndex::new([1]);
        // Two local initiators plus the uplink.
        let router = ResponseRouter::local(&clustered(), &cluster, 3, 1).unwrap();

        let local = Message::transaction(Transaction::read(0b0101, 0, 0x1000_0000, 4), 0);
        assert_eq!(1, router.route(local).0);

        let foreign = Message::transaction(Transaction::read(0b0001, 0, 0x1000_0000, 4), 0);
        assert_eq!(2, router.route(foreign).0);
    }
}
