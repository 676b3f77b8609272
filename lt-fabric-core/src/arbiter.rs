//! Centralized buffer: the arbitration point in front of the command router.
//!
//! Every initiator owns one slot. A message is only released once every initiator that could
//! still send something earlier has deposited a message, so releases happen in timestamp order.

use crate::message::{Message, Payload};
use crate::Time;
use bitvec::vec::BitVec;
use log::{debug, trace};

#[derive(Debug, Clone)]
pub struct CentralizedBuffer {
    slots: Vec<Option<Message>>,
    /// Time of the last message pushed by each initiator.
    last_push: Vec<Time>,
    /// Cleared for initiators that announced inactivity.
    active: BitVec,
    /// Cleared for initiators temporarily excluded from arbitration.
    eligible: BitVec,
    /// Set for initiators whose request was forwarded elsewhere and which are waiting for it.
    external_access: BitVec,
    /// Number of empty slots that block [`can_pop`](Self::can_pop).
    free: usize,
    /// Time of the latest released message.
    released: Time,
}

impl CentralizedBuffer {
    /// Creates a buffer for `slots` initiators, all active, eligible, and without a message.
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![None; slots],
            last_push: vec![0; slots],
            active: BitVec::repeat(true, slots),
            eligible: BitVec::repeat(true, slots),
            external_access: BitVec::repeat(false, slots),
            free: slots,
            released: 0,
        }
    }

    /// Number of slots, i.e. of initiators.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Deposits `message` in the slot of initiator `from`.
    ///
    /// Activity messages are applied immediately instead of being stored. An initiator that
    /// becomes active again resumes at [`released`](Self::released) at the earliest.
    ///
    /// # Panics
    ///
    /// Panics if the slot is already occupied, if `message` is older than the previous message
    /// of the same initiator, or if a stored message is older than a message already released.
    /// All are protocol violations by the initiator.
    pub fn push(&mut self, from: usize, message: Message) {
        assert!(
            message.time >= self.last_push[from],
            "initiator {from} pushed a message at {} after one at {}",
            message.time,
            self.last_push[from]
        );
        self.last_push[from] = message.time;

        if let Payload::Activity { active } = message.payload {
            if active {
                self.last_push[from] = message.time.max(self.released);
            }
            self.set_activity(from, active);
            return;
        }

        assert!(
            message.time >= self.released,
            "initiator {from} pushed a message at {} before released time {}",
            message.time,
            self.released
        );
        assert!(
            self.slots[from].is_none(),
            "initiator {from} pushed into its occupied slot"
        );
        trace!("Slot {from} <- {message}");
        if self.counts(from) {
            self.free -= 1;
        }
        self.slots[from] = Some(message);
    }

    /// Returns `true` exactly when no active, eligible initiator has an empty slot.
    ///
    /// Initiators flagged as waiting on an external access are not waited for.
    pub fn can_pop(&self) -> bool {
        self.free == 0
    }

    /// Releases the earliest message among active, eligible initiators, ties going to the lowest
    /// initiator index.
    ///
    /// Returns `None` if no such initiator holds a message.
    pub fn pop(&mut self) -> Option<(usize, Message)> {
        let from = self.peek()?;
        let message = self.slots[from].take()?;
        if self.counts(from) {
            self.free += 1;
        }
        self.released = self.released.max(message.time);
        trace!("Slot {from} -> {message}");
        Some((from, message))
    }

    /// Returns the initiator [`pop`](Self::pop) would release from, without releasing it.
    pub fn peek(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|&(i, _)| self.active[i] && self.eligible[i])
            .filter_map(|(i, slot)| slot.as_ref().map(|m| (m.time, i)))
            .min()
            .map(|(_, i)| i)
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.slots[index].is_some()
    }

    pub fn is_active(&self, index: usize) -> bool {
        self.active[index]
    }

    pub fn is_eligible(&self, index: usize) -> bool {
        self.eligible[index]
    }

    pub fn has_external_access(&self, index: usize) -> bool {
        self.external_access[index]
    }

    /// Number of empty slots currently blocking arbitration.
    pub fn blocking_slots(&self) -> usize {
        self.free
    }

    /// Time of the last message pushed by initiator `index`.
    pub fn last_push(&self, index: usize) -> Time {
        self.last_push[index]
    }

    /// Time of the latest message released by [`pop`](Self::pop). No message older than this
    /// is accepted any more.
    pub fn released(&self) -> Time {
        self.released
    }

    pub fn set_activity(&mut self, index: usize, active: bool) {
        debug!("Initiator {index} becomes {}", if active { "active" } else { "inactive" });
        self.update_flag(index, |buffer| buffer.active.set(index, active));
    }

    pub fn set_eligible(&mut self, index: usize, eligible: bool) {
        self.update_flag(index, |buffer| buffer.eligible.set(index, eligible));
    }

    pub fn set_external_access(&mut self, index: usize, external_access: bool) {
        self.update_flag(index, |buffer| {
            buffer.external_access.set(index, external_access)
        });
    }

    /// Applies `update` to the flags of slot `index`, keeping the blocking count consistent.
    fn update_flag(&mut self, index: usize, update: impl FnOnce(&mut Self)) {
        let blocked_before = self.counts(index) && self.slots[index].is_none();
        update(self);
        let blocked_after = self.counts(index) && self.slots[index].is_none();
        match (blocked_before, blocked_after) {
            (true, false) => self.free -= 1,
            (false, true) => self.free += 1,
            _ => {}
        }
    }

    /// Whether an empty slot `index` blocks arbitration.
    fn counts(&self, index: usize) -> bool {
        self.active[index] && self.eligible[index] && !self.external_access[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Transaction;
    use std::collections::VecDeque;

    fn real(from: usize, time: Time) -> Message {
        Message::transaction(Transaction::read(from as u32, time as u32, 0, 4), time)
    }

    #[test]
    fn liveness() {
        let mut buffer = CentralizedBuffer::new(3);
        assert!(!buffer.can_pop());
        buffer.push(0, real(0, 5));
        assert!(!buffer.can_pop());
        buffer.push(2, Message::null(7));
        assert!(!buffer.can_pop());
        buffer.push(1, real(1, 3));
        assert!(buffer.can_pop());

        assert_eq!(Some(1), buffer.pop().map(|(from, _)| from));
        assert!(!buffer.can_pop());
    }

    #[test]
    fn inactive_initiators_are_not_waited_for() {
        let mut buffer = CentralizedBuffer::new(2);
        buffer.push(1, Message::activity(false, 0));
        assert!(!buffer.is_active(1));
        assert!(!buffer.can_pop());

        buffer.push(0, real(0, 10));
        assert!(buffer.can_pop());
        let (from, message) = buffer.pop().unwrap();
        assert_eq!(0, from);
        assert_eq!(10, message.time);

        buffer.push(1, Message::activity(true, 20));
        assert_eq!(2, buffer.blocking_slots());
    }

    #[test]
    fn reactivation_resumes_at_released_time() {
        let mut buffer = CentralizedBuffer::new(2);
        buffer.push(1, Message::activity(false, 0));
        buffer.push(0, real(0, 90));
        buffer.pop().unwrap();
        assert_eq!(90, buffer.released());

        buffer.push(1, Message::activity(true, 50));
        assert!(buffer.is_active(1));
        assert_eq!(90, buffer.last_push(1));
    }

    #[test]
    #[should_panic(expected = "before released time")]
    fn push_behind_released_time() {
        let mut buffer = CentralizedBuffer::new(2);
        buffer.set_external_access(1, true);
        buffer.push(0, real(0, 90));
        buffer.pop().unwrap();
        buffer.set_external_access(1, false);
        buffer.push(1, real(1, 50));
    }

    #[test]
    fn external_access_is_not_waited_for() {
        let mut buffer = CentralizedBuffer::new(2);
        buffer.set_external_access(1, true);
        buffer.push(0, real(0, 1));
        assert!(buffer.can_pop());
        buffer.pop().unwrap();

        buffer.set_external_access(1, false);
        buffer.push(0, real(0, 2));
        assert!(!buffer.can_pop());
    }

    #[test]
    fn ineligible_messages_are_held_back() {
        let mut buffer = CentralizedBuffer::new(2);
        buffer.push(0, real(0, 1));
        buffer.push(1, real(1, 9));
        buffer.set_eligible(0, false);
        assert!(buffer.can_pop());
        assert_eq!(Some(1), buffer.pop().map(|(from, _)| from));
        assert!(buffer.is_occupied(0));
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let mut buffer = CentralizedBuffer::new(3);
        buffer.push(2, real(2, 4));
        buffer.push(1, Message::null(4));
        buffer.push(0, real(0, 4));
        assert_eq!(Some(0), buffer.pop().map(|(from, _)| from));
        buffer.push(0, real(0, 4));
        assert_eq!(Some(0), buffer.pop().map(|(from, _)| from));
        buffer.push(0, real(0, 5));
        assert_eq!(Some(1), buffer.pop().map(|(from, _)| from));
    }

    #[test]
    fn causality() {
        let sequences: [&[Time]; 3] = [&[1, 4, 9, 12], &[2, 3, 3, 20], &[0, 15]];
        let mut pending: Vec<VecDeque<Time>> =
            sequences.iter().map(|s| s.iter().copied().collect()).collect();
        let mut buffer = CentralizedBuffer::new(sequences.len());
        let mut popped: Vec<(usize, Time)> = Vec::new();

        loop {
            for (i, queue) in pending.iter_mut().enumerate() {
                if buffer.is_occupied(i) || !buffer.is_active(i) {
                    continue;
                }
                match queue.pop_front() {
                    Some(time) => buffer.push(i, real(i, time)),
                    None => {
                        let last = buffer.last_push(i);
                        buffer.push(i, Message::activity(false, last));
                    }
                }
            }
            if !buffer.can_pop() {
                break;
            }
            match buffer.pop() {
                Some((from, message)) => popped.push((from, message.time)),
                None => break,
            }
        }

        let times: Vec<Time> = popped.iter().map(|&(_, t)| t).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(sorted, times);
        assert_eq!(10, popped.len());

        for (i, sequence) in sequences.iter().enumerate() {
            let own: Vec<Time> = popped
                .iter()
                .filter(|&&(from, _)| from == i)
                .map(|&(_, t)| t)
                .collect();
            assert_eq!(sequence.to_vec(), own);
        }
    }

    #[test]
    #[should_panic(expected = "occupied slot")]
    fn double_push() {
        let mut buffer = CentralizedBuffer::new(2);
        buffer.push(0, real(0, 1));
        buffer.push(0, real(0, 2));
    }

    #[test]
    #[should_panic(expected = "after one at")]
    fn timestamp_regression() {
        let mut buffer = CentralizedBuffer::new(2);
        buffer.push(0, real(0, 5));
        buffer.pop();
        buffer.push(0, real(0, 4));
    }
}
