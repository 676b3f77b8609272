//! Scripted traffic generator.

use crate::initiator::{Action, Initiator};
use crate::local_time::LocalTime;
use crate::message::{Message, Payload, Transaction};
use crate::Time;
use log::{debug, trace};
use std::collections::VecDeque;

/// One step of a traffic script.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Op {
    /// Advance local time by this many cycles, without bus traffic.
    Compute(Time),
    Read { address: u64, len: usize },
    Write { address: u64, data: Vec<u8> },
    LockedRead { address: u64, len: usize },
    StoreConditional { address: u64, data: Vec<u8> },
    /// Announce inactivity, then announce activity again this many cycles later. Execution resumes
    /// at the time the interconnect acknowledges, which may be later still.
    Sleep(Time),
    /// Announce inactivity for good. Implied at the end of the script.
    Finish,
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum State {
    /// Ready to start the next operation.
    Fetch,
    Computing { remaining: Time },
    /// Waiting for the response to packet `pkt_id`.
    AwaitResponse { pkt_id: u32 },
    /// Waiting for the echo of a null message, with `remaining` cycles left to compute.
    AwaitSync { remaining: Time },
    /// Inactivity was announced; wake up at `until`.
    Sleeping { until: Time },
    /// Activity was announced again; waiting for the null message carrying the resume time.
    Waking,
    Done,
}

/// Initiator replaying a fixed script of operations.
///
/// Every response is recorded, in order, with the time it arrived at.
#[derive(Debug)]
pub struct ScriptedInitiator {
    name: String,
    src_id: u32,
    script: VecDeque<Op>,
    state: State,
    time: LocalTime,
    next_pkt_id: u32,
    responses: Vec<(Time, Transaction)>,
    nulls_sent: u64,
}

impl ScriptedInitiator {
    pub fn new(
        name: impl Into<String>,
        src_id: u32,
        quantum: Time,
        script: impl IntoIterator<Item = Op>,
    ) -> Self {
        Self {
            name: name.into(),
            src_id,
            script: script.into_iter().collect(),
            state: State::Fetch,
            time: LocalTime::new(quantum),
            next_pkt_id: 0,
            responses: Vec::new(),
            nulls_sent: 0,
        }
    }

    /// Responses received so far, with their arrival time.
    pub fn responses(&self) -> &[(Time, Transaction)] {
        &self.responses
    }

    /// Number of responses with an error status.
    pub fn errors(&self) -> usize {
        self.responses.iter().filter(|(_, t)| t.is_error()).count()
    }

    pub fn nulls_sent(&self) -> u64 {
        self.nulls_sent
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Done
    }

    fn send_transaction(&mut self, transaction: Transaction) -> Action {
        self.state = State::AwaitResponse {
            pkt_id: transaction.pkt_id,
        };
        self.time.reset_sync();
        trace!("{}: sending {} at {}", self.name, transaction.command, self.time.get());
        Action::Send(Message::transaction(transaction, self.time.get()))
    }

    fn pkt_id(&mut self) -> u32 {
        let pkt_id = self.next_pkt_id;
        self.next_pkt_id = self.next_pkt_id.wrapping_add(1);
        pkt_id
    }

    /// Starts the next operation of the script.
    fn fetch(&mut self) -> Option<Action> {
        let op = self.script.pop_front().unwrap_or(Op::Finish);
        let src_id = self.src_id;
        let action = match op {
            Op::Compute(cycles) => {
                self.state = State::Computing { remaining: cycles };
                return None;
            }
            Op::Read { address, len } => {
                let pkt_id = self.pkt_id();
                self.send_transaction(Transaction::read(src_id, pkt_id, address, len))
            }
            Op::Write { address, data } => {
                let pkt_id = self.pkt_id();
                self.send_transaction(Transaction::write(src_id, pkt_id, address, data))
            }
            Op::LockedRead { address, len } => {
                let pkt_id = self.pkt_id();
                self.send_transaction(Transaction::locked_read(src_id, pkt_id, address, len))
            }
            Op::StoreConditional { address, data } => {
                let pkt_id = self.pkt_id();
                self.send_transaction(Transaction::store_conditional(
                    src_id, pkt_id, address, data,
                ))
            }
            Op::Sleep(cycles) => {
                debug!("{}: sleeping at {} for {cycles}", self.name, self.time.get());
                self.state = State::Sleeping {
                    until: self.time.get().saturating_add(cycles),
                };
                self.time.reset_sync();
                Action::Send(Message::activity(false, self.time.get()))
            }
            Op::Finish => {
                debug!("{}: finished at {}", self.name, self.time.get());
                self.state = State::Done;
                Action::Send(Message::activity(false, self.time.get()))
            }
        };
        Some(action)
    }

    /// Computes up to `remaining` cycles, stopping early to send a null message when a quantum
    /// elapses.
    fn compute(&mut self, mut remaining: Time) -> Option<Action> {
        while remaining > 0 {
            self.time.tick();
            remaining -= 1;
            if self.time.need_sync() {
                self.state = State::AwaitSync { remaining };
                self.time.reset_sync();
                self.nulls_sent += 1;
                return Some(Action::Send(Message::null(self.time.get())));
            }
        }
        self.state = State::Fetch;
        None
    }
}

impl Initiator for ScriptedInitiator {
    fn name(&self) -> &str {
        &self.name
    }

    fn src_id(&self) -> u32 {
        self.src_id
    }

    fn step(&mut self) -> Action {
        loop {
            let action = match self.state.clone() {
                State::Fetch => self.fetch(),
                State::Computing { remaining } => self.compute(remaining),
                State::AwaitResponse { .. } | State::AwaitSync { .. } | State::Waking => {
                    Some(Action::Blocked)
                }
                State::Sleeping { until } => {
                    self.time.set(until);
                    self.state = State::Waking;
                    debug!("{}: waking up at {}", self.name, self.time.get());
                    Some(Action::Send(Message::activity(true, self.time.get())))
                }
                State::Done => Some(Action::Finished),
            };
            if let Some(action) = action {
                return action;
            }
        }
    }

    fn receive(&mut self, message: Message) {
        self.time.set(message.time);
        match (self.state.clone(), message.payload) {
            (State::AwaitResponse { pkt_id }, Payload::Transaction(response))
                if response.pkt_id == pkt_id =>
            {
                trace!("{}: response to {pkt_id} at {}", self.name, message.time);
                self.responses.push((message.time, response));
                self.state = State::Fetch;
            }
            (State::AwaitSync { remaining }, Payload::Null) => {
                self.state = State::Computing { remaining };
            }
            (State::Waking, Payload::Null) => {
                trace!("{}: resuming at {}", self.name, message.time);
                self.time.reset_sync();
                self.state = State::Fetch;
            }
            (_, Payload::Null) => {}
            (state, payload) => panic!("{}: unexpected {payload:?} while {state:?}", self.name),
        }
    }

    fn local_time(&self) -> Time {
        self.time.get()
    }
}
