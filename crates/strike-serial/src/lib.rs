//! `strike-serial` – the half-duplex serial link to the target-array
//! controller.
//!
//! A single serial line carries interleaved "set output" and "read input"
//! commands. This crate owns the whole concurrency discipline around that
//! line:
//!
//! - [`frame`] – byte-stream framing: marker scanning, noise recovery, the
//!   fixed-width ack and input frame shapes, and input-event decoding.
//! - [`link`] – [`SerialLink`]: the owned link instance with its split-write
//!   busy lock, the FIFO pending-command correlator with per-command
//!   timeouts, and the broadcast channel of input frames and failures.
//!
//! # Wire protocol
//!
//! | Direction | Shape | Notes |
//! |---|---|---|
//! | out | `O` + 2-digit id + color char | output command, fire and forget |
//! | out | `L01` + value byte | bar LED percentage |
//! | out | `I` | read inputs |
//! | in | `O` + status byte | ack, `'1'` = success, consumed as 2 bytes |
//! | in | `I` + 2-byte group + 4-hex bitmask | input event, consumed as 5 bytes |
//!
//! Every command is physically written in two parts (first byte, settle
//! delay, remainder) because the controller's receive buffer cannot absorb a
//! full command atomically.

pub mod frame;
pub mod link;

pub use frame::{Frame, FrameParser, decode_input_event, POLL_GROUP};
pub use link::{LinkEvent, RawPort, SerialLink, SerialLinkConfig};
