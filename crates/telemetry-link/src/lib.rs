//! Lossy latest-value transport for real-time telemetry.
//!
//! The crate is built around one idea: a control loop should only ever see
//! the newest sample, because acting on a backlogged frame is worse than
//! skipping it. Everything here favors freshness over completeness.
//!
//! - `mailbox`: the in-process single-slot channel (overwrite on publish,
//!   block until newer on receive).
//! - `wire`: length-prefixed JSON framing for samples crossing a socket.
//! - `net`: TCP publish/subscribe that applies the mailbox contract per
//!   remote connection.

pub use mailbox::{Disconnected, Publisher, Subscriber, latest};
pub use net::{NetPublisher, bind, connect};
pub use wire::{MAX_FRAME_BYTES, WireError, read_frame, write_frame};

pub mod mailbox;
pub mod net;
pub mod wire;
