//! azmq - an asynchronous, brokerless messaging library speaking the ZeroMQ
//! pattern family over inproc, IPC and TCP, built on Tokio.
//!
//! Sockets are created from a [`Context`] and exchange multi-frame messages
//! according to their pattern (REQ/REP, DEALER/ROUTER, PUB/SUB, XPUB/XSUB,
//! PUSH/PULL, PAIR). A [`poller`](crate::poller) multiplexes readiness
//! across sockets and timers, and the [`device`](crate::device) layer wires
//! two sockets together and pumps frames between them.

/// Defines the `Context`, the entry point for creating sockets.
pub mod context;
/// Devices (Queue, Forwarder, Streamer) bridging two sockets.
pub mod device;
/// Per-connection protocol engines.
pub(crate) mod engine;
/// Custom error types used throughout the library.
pub mod error;
/// Message representation (`Msg`, `MsgFlags`, `Blob`).
pub mod message;
/// Readiness multiplexing (`poll`, `Poller`).
pub mod poller;
/// Wire protocol pieces (greeting, frame codec, control commands).
pub(crate) mod protocol;
/// Actor runtime primitives (mailboxes, commands, the event bus).
pub mod runtime;
/// Per-connection session actors.
pub(crate) mod session;
/// Socket types, options and pattern implementations.
pub mod socket;
/// Transports (TCP, IPC, inproc).
pub(crate) mod transport;

pub use context::{context, Context};
pub use error::{ErrorKind, ZmqError, ZmqResult};
pub use message::{Blob, Msg, MsgFlags};
pub use poller::{poll, PollEvents, PollItem, Poller, PollerHandle};
pub use socket::{Socket, SocketType};

pub use device::{Device, DeviceMode};

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
