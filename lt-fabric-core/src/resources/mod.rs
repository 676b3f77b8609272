//! Provides reference components: a RAM and a TTY to act as targets, and a scripted traffic
//! generator to act as initiator.

pub mod ram;
pub mod traffic;
pub mod tty;
