//! Multi-terminal TTY: the console of a simulated platform.

use crate::bus::Target;
use crate::message::{Command, Message, Payload, ResponseStatus};
use crate::segment::Segment;
use crate::Time;
use log::{debug, warn};
use std::collections::VecDeque;

/// Number of registers (cells) per terminal.
pub const TTY_SPAN: u64 = 4;

/// Register offsets within a terminal, in cells.
pub mod register {
    /// Write-only: the low byte of the cell is output.
    pub const WRITE: u64 = 0;
    /// Read-only: non-zero while input is pending.
    pub const STATUS: u64 = 1;
    /// Read-only: pops one byte of pending input (0 if none).
    pub const READ: u64 = 2;
}

/// A bank of terminals behind a single segment, each [`TTY_SPAN`] cells wide.
///
/// Written characters are captured rather than printed, so a platform can be run headless and its
/// console output inspected afterwards.
#[derive(Debug)]
pub struct Tty {
    name: String,
    segment: Segment,
    cell_size: usize,
    terminals: Vec<Terminal>,
    time: Time,
}

#[derive(Debug, Clone, Default)]
struct Terminal {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl Tty {
    /// Returns `None` if `cell_size` or `terminals` is zero.
    pub fn new(
        name: impl Into<String>,
        segment: Segment,
        cell_size: usize,
        terminals: usize,
    ) -> Option<Self> {
        if cell_size == 0 || terminals == 0 {
            return None;
        }
        Some(Self {
            name: name.into(),
            segment,
            cell_size,
            terminals: vec![Terminal::default(); terminals],
            time: 0,
        })
    }

    /// Everything written to terminal `terminal` so far.
    pub fn output(&self, terminal: usize) -> &[u8] {
        &self.terminals[terminal].output
    }

    /// Queues `bytes` as keyboard input of terminal `terminal`.
    pub fn feed(&mut self, terminal: usize, bytes: &[u8]) {
        self.terminals[terminal].input.extend(bytes);
    }

    /// Performs a register access, returning the read value, or `None` for a bad access.
    fn access(&mut self, command: Command, cell: u64, value: u8) -> Option<u8> {
        let terminal = self.terminals.get_mut((cell / TTY_SPAN) as usize)?;
        match (command, cell % TTY_SPAN) {
            (Command::Write, register::WRITE) => {
                terminal.output.push(value);
                Some(0)
            }
            (Command::Read, register::STATUS) => Some(u8::from(!terminal.input.is_empty())),
            (Command::Read, register::READ) => Some(terminal.input.pop_front().unwrap_or(0)),
            _ => None,
        }
    }
}

impl Target for Tty {
    fn name(&self) -> &str {
        &self.name
    }

    fn transport(&mut self, message: Message) -> Option<Message> {
        self.time = self.time.max(message.time);
        let Payload::Transaction(mut transaction) = message.payload else {
            return None;
        };

        let cells = transaction.len().div_ceil(self.cell_size).max(1);
        let response_time = self.time + cells as Time;
        let in_segment = self
            .segment
            .range()
            .contains_access(transaction.address, transaction.len() as u64);
        if !in_segment {
            warn!("{}: access at {:#x} outside its segment", self.name, transaction.address);
            return Some(Message::transaction(transaction.into_error(), response_time));
        }

        let base = transaction.address - self.segment.base_address();
        let mut status = ResponseStatus::Ok;
        for i in 0..cells {
            let offset = i * self.cell_size;
            let cell = base / self.cell_size as u64 + i as u64;
            let value = transaction.data.get(offset).copied().unwrap_or(0);
            match self.access(transaction.command, cell, value) {
                Some(read) => {
                    if let Some(byte) = transaction.data.get_mut(offset) {
                        if transaction.command == Command::Read {
                            *byte = read;
                        }
                    }
                }
                None => status = ResponseStatus::Error,
            }
        }
        if transaction.command == Command::Write {
            debug!("{}: wrote {} cell(s)", self.name, cells);
        }
        transaction.status = status;
        Some(Message::transaction(transaction, response_time))
    }

    fn local_time(&self) -> Time {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Transaction;

    fn tty() -> Tty {
        let segment = Segment::new("TTY", 0x0020_0000, 0x100, [1], false).unwrap();
        Tty::new("tty", segment, 4, 2).unwrap()
    }

    #[test]
    fn captures_output_per_terminal() {
        let mut tty = tty();
        for (i, &c) in b"hi".iter().enumerate() {
            let write = Transaction::write(0, i as u32, 0x0020_0000, [c, 0, 0, 0]);
            let response = tty.transport(Message::transaction(write, 10)).unwrap();
            assert_eq!(11, response.time);
        }
        let write = Transaction::write(0, 2, 0x0020_0010, [b'!', 0, 0, 0]);
        tty.transport(Message::transaction(write, 12));

        assert_eq!(b"hi", tty.output(0));
        assert_eq!(b"!", tty.output(1));
    }

    #[test]
    fn input_is_read_through_registers() {
        let mut tty = tty();
        tty.feed(0, b"k");
        let read = |tty: &mut Tty, cell: u64| {
            let read = Transaction::read(0, 0, 0x0020_0000 + cell * 4, 4);
            let response = tty.transport(Message::transaction(read, 0)).unwrap();
            response.as_transaction().unwrap().data[0]
        };
        assert_eq!(1, read(&mut tty, register::STATUS));
        assert_eq!(b'k', read(&mut tty, register::READ));
        assert_eq!(0, read(&mut tty, register::STATUS));
    }

    #[test]
    fn bad_register_is_an_error() {
        let mut tty = tty();
        let read = Transaction::read(0, 0, 0x0020_0000, 4);
        let response = tty.transport(Message::transaction(read, 0)).unwrap();
        assert!(response.as_transaction().unwrap().is_error());

        // Terminal 2 does not exist.
        let write = Transaction::write(0, 0, 0x0020_0020, [b'x', 0, 0, 0]);
        let response = tty.transport(Message::transaction(write, 0)).unwrap();
        assert!(response.as_transaction().unwrap().is_error());
    }

    #[test]
    fn null_messages_only_advance_time() {
        let mut tty = tty();
        assert_eq!(None, tty.transport(Message::null(7)));
        assert_eq!(7, tty.local_time());
        assert!(tty.output(0).is_empty());
    }
}
