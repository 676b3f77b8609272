//! Messages exchanged over the fabric: transactions, null messages and activity markers.

use crate::Time;
use bitvec::vec::BitVec;
use std::fmt;
use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Command {
    Read,
    Write,
    /// Read that also places a reservation on the accessed address.
    LockedRead,
    /// Write that only succeeds while the sender's reservation still holds.
    StoreConditional,
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Read => "READ",
            Command::Write => "WRITE",
            Command::LockedRead => "LL",
            Command::StoreConditional => "SC",
        })
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResponseStatus {
    #[default]
    Ok,
    Error,
}

/// A split-phase bus transaction. The same value travels as the command and, once a target has
/// filled in `data` and `status`, as the response.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Transaction {
    pub command: Command,
    /// Packed id of the initiator, see [`MappingTable::index_for_id`].
    ///
    /// [`MappingTable::index_for_id`]: crate::mapping_table::MappingTable::index_for_id
    pub src_id: u32,
    pub pkt_id: u32,
    pub trd_id: u32,
    pub address: u64,
    /// One bit per byte of `data`; disabled bytes are not written.
    pub byte_enable: BitVec,
    /// Read commands carry zeroed data of the requested length.
    pub data: Vec<u8>,
    pub status: ResponseStatus,
    /// End-of-packet flag.
    pub eop: bool,
}

impl Transaction {
    fn new(command: Command, src_id: u32, pkt_id: u32, address: u64, data: Vec<u8>) -> Self {
        Self {
            command,
            src_id,
            pkt_id,
            trd_id: 0,
            address,
            byte_enable: BitVec::repeat(true, data.len()),
            data,
            status: ResponseStatus::Ok,
            eop: true,
        }
    }

    pub fn read(src_id: u32, pkt_id: u32, address: u64, len: usize) -> Self {
        Self::new(Command::Read, src_id, pkt_id, address, vec![0; len])
    }

    pub fn write(src_id: u32, pkt_id: u32, address: u64, data: impl Into<Vec<u8>>) -> Self {
        Self::new(Command::Write, src_id, pkt_id, address, data.into())
    }

    pub fn locked_read(src_id: u32, pkt_id: u32, address: u64, len: usize) -> Self {
        Self::new(Command::LockedRead, src_id, pkt_id, address, vec![0; len])
    }

    pub fn store_conditional(
        src_id: u32,
        pkt_id: u32,
        address: u64,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(Command::StoreConditional, src_id, pkt_id, address, data.into())
    }

    /// Replaces the byte enables. `byte_enable` must have one entry per data byte.
    pub fn with_byte_enable(mut self, byte_enable: BitVec) -> Self {
        assert_eq!(
            self.data.len(),
            byte_enable.len(),
            "byte enable must cover every data byte"
        );
        self.byte_enable = byte_enable;
        self
    }

    pub fn with_thread(mut self, trd_id: u32) -> Self {
        self.trd_id = trd_id;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }

    /// Turns the command into an error response, as sent back for a rejected transaction.
    pub fn into_error(mut self) -> Self {
        self.status = ResponseStatus::Error;
        self
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Payload {
    Transaction(Transaction),
    /// "Reached this time, nothing sent."
    Null,
    /// The sender becomes (in)active. Applied by the arbiter, never forwarded.
    Activity { active: bool },
}

/// Payload and the time it was issued at.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub payload: Payload,
    pub time: Time,
}

impl Message {
    pub fn transaction(transaction: Transaction, time: Time) -> Self {
        Self {
            payload: Payload::Transaction(transaction),
            time,
        }
    }

    pub fn null(time: Time) -> Self {
        Self {
            payload: Payload::Null,
            time,
        }
    }

    pub fn activity(active: bool, time: Time) -> Self {
        Self {
            payload: Payload::Activity { active },
            time,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null)
    }

    pub fn as_transaction(&self) -> Option<&Transaction> {
        match &self.payload {
            Payload::Transaction(transaction) => Some(transaction),
            _ => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match &self.payload {
            Payload::Transaction(t) if t.is_error() => MessageKind::Error,
            Payload::Transaction(t) => MessageKind::Transaction(t.command),
            Payload::Null => MessageKind::Null,
            Payload::Activity { active } => MessageKind::Activity(*active),
        }
    }

    /// Returns the same message, delayed by `latency`.
    pub fn delayed(mut self, latency: Time) -> Self {
        self.time = self.time.saturating_add(latency);
        self
    }
}

/// Coarse classification of a message, as recorded in delivery traces.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MessageKind {
    Transaction(Command),
    Error,
    Null,
    Activity(bool),
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Transaction(command) => write!(f, "{command}"),
            MessageKind::Error => f.write_str("ERROR"),
            MessageKind::Null => f.write_str("NULL"),
            MessageKind::Activity(true) => f.write_str("ACTIVE"),
            MessageKind::Activity(false) => f.write_str("INACTIVE"),
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Transaction(t) => write!(
                f,
                "{} src={} pkt={} addr={:#x} len={} @{}",
                self.kind(),
                t.src_id,
                t.pkt_id,
                t.address,
                t.len(),
                self.time
            ),
            _ => write!(f, "{} @{}", self.kind(), self.time),
        }
    }
}
