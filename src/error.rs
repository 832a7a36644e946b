use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type ZmqResult<T> = Result<T, ZmqError>;

/// Coarse classification of a [`ZmqError`], named after the classic errno
/// surface. Callers that only care about the failure class (retry? fatal?
/// user error?) branch on this instead of matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
  /// EAGAIN: a non-blocking operation would have to suspend.
  WouldBlock,
  /// EFSM: the call is illegal in the socket's current pattern state.
  StateMachine,
  /// EHOSTUNREACH: no live peer for the requested identity.
  Unroutable,
  /// ETERM: the owning context is shutting down.
  Terminated,
  /// The socket itself was closed while the context lives on.
  Closed,
  /// EINVAL: malformed endpoint, argument, message or option value.
  Invalid,
  /// EADDRINUSE / EADDRNOTAVAIL: bind conflicts.
  Address,
  /// ENOTSUP: the socket type, option or build does not support this.
  NotSupported,
  /// Context-wide resource ceilings (MAX_SOCKETS).
  Limit,
  /// EMTHREAD: more I/O threads requested than will be provisioned.
  IoThreads,
  /// ETIMEDOUT: a bounded wait elapsed.
  TimedOut,
  /// A single connection failed; the socket itself stays usable.
  Connection,
  /// Raw I/O failure that fits no finer class.
  Io,
  /// A bug in this crate rather than a usage error.
  Internal,
}

/// Error type for every fallible operation in the crate.
///
/// Variants are grouped the way failures are handled, not the way they are
/// produced: flow control and state first (retryable or caller bugs), then
/// addressing and capability limits (fix the call), then per-connection
/// faults (the connection dies, the socket survives).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ZmqError {
  // --- Flow control and lifecycle ---
  /// Non-blocking send/recv found no room or no message (EAGAIN).
  #[error("operation would block")]
  WouldBlock,
  /// The pattern's state machine forbids this call right now (EFSM).
  #[error("operation out of sequence: {0}")]
  StateMachineViolation(&'static str),
  /// The socket was closed; its queues are gone.
  #[error("socket is closed")]
  SocketClosed,
  /// The whole context is terminating (ETERM); unblocks pending calls.
  #[error("context was terminated")]
  Terminated,
  /// A bounded wait (SNDTIMEO / RCVTIMEO / poll) elapsed.
  #[error("operation timed out")]
  TimedOut,

  // --- Routing ---
  /// ROUTER_MANDATORY send towards an identity with no live pipe.
  #[error("no route to peer: {0}")]
  UnroutablePeer(String),

  // --- Arguments, endpoints, options ---
  #[error("invalid argument: {0}")]
  InvalidArgument(String),
  #[error("malformed endpoint '{0}'")]
  MalformedEndpoint(String),
  #[error("endpoint '{0}' did not resolve to an address")]
  UnresolvableEndpoint(String),
  #[error("unknown option {0}")]
  UnknownOption(i32),
  #[error("bad value for option {0}")]
  BadOptionValue(i32),
  #[error("malformed message: {0}")]
  MalformedMessage(String),

  // --- Binding ---
  #[error("address already in use: {0}")]
  AddressInUse(String),
  #[error("address not available: {0}")]
  AddressNotAvailable(String),

  // --- Capability and resource limits ---
  /// The option exists but not for this socket type (ENOTSUP).
  #[error("option {0} is not supported by this socket type")]
  OptionNotSupported(i32),
  /// The operation has no meaning for this pattern (e.g. recv on PUSH).
  #[error("operation not supported by {0} sockets")]
  WrongSocketType(&'static str),
  #[error("transport not supported: {0}")]
  TransportNotSupported(String),
  /// The context's MAX_SOCKETS ceiling was hit.
  #[error("socket limit of {0} reached")]
  TooManySockets(i32),
  /// More I/O threads than the runtime will provision (EMTHREAD).
  #[error("cannot provision {0} I/O threads")]
  TooManyIoThreads(i32),

  // --- Per-connection faults; reconnect or drop the pipe, keep the socket ---
  #[error("peer refused the connection: {0}")]
  PeerRefused(String),
  #[error("peer disconnected")]
  Disconnected,
  #[error("access denied to endpoint: {0}")]
  AccessDenied(String),
  #[error("wire protocol fault: {0}")]
  ProtocolFault(String),
  #[error(transparent)]
  Io(#[from] io::Error),

  // --- Bugs ---
  #[error("internal fault: {0}")]
  Internal(String),
}

impl ZmqError {
  /// The errno-style class this error belongs to.
  pub fn kind(&self) -> ErrorKind {
    match self {
      ZmqError::WouldBlock => ErrorKind::WouldBlock,
      ZmqError::StateMachineViolation(_) => ErrorKind::StateMachine,
      ZmqError::SocketClosed => ErrorKind::Closed,
      ZmqError::Terminated => ErrorKind::Terminated,
      ZmqError::TimedOut => ErrorKind::TimedOut,
      ZmqError::UnroutablePeer(_) => ErrorKind::Unroutable,
      ZmqError::InvalidArgument(_)
      | ZmqError::MalformedEndpoint(_)
      | ZmqError::UnresolvableEndpoint(_)
      | ZmqError::UnknownOption(_)
      | ZmqError::BadOptionValue(_)
      | ZmqError::MalformedMessage(_) => ErrorKind::Invalid,
      ZmqError::AddressInUse(_) | ZmqError::AddressNotAvailable(_) => ErrorKind::Address,
      ZmqError::OptionNotSupported(_) | ZmqError::WrongSocketType(_) | ZmqError::TransportNotSupported(_) => {
        ErrorKind::NotSupported
      }
      ZmqError::TooManySockets(_) => ErrorKind::Limit,
      ZmqError::TooManyIoThreads(_) => ErrorKind::IoThreads,
      ZmqError::PeerRefused(_) | ZmqError::Disconnected | ZmqError::AccessDenied(_) | ZmqError::ProtocolFault(_) => {
        ErrorKind::Connection
      }
      ZmqError::Io(_) => ErrorKind::Io,
      ZmqError::Internal(_) => ErrorKind::Internal,
    }
  }

  /// Classifies an I/O failure that happened while binding or connecting
  /// `endpoint`, so bind collisions and refusals surface as their own
  /// variants instead of a bare I/O error.
  pub(crate) fn for_endpoint(endpoint: &str, e: io::Error) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => ZmqError::AddressInUse(endpoint.to_string()),
      io::ErrorKind::AddrNotAvailable => ZmqError::AddressNotAvailable(endpoint.to_string()),
      io::ErrorKind::ConnectionRefused => ZmqError::PeerRefused(endpoint.to_string()),
      io::ErrorKind::PermissionDenied => ZmqError::AccessDenied(endpoint.to_string()),
      io::ErrorKind::TimedOut => ZmqError::TimedOut,
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => ZmqError::Disconnected,
      _ => ZmqError::Io(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kinds_follow_the_taxonomy() {
    assert_eq!(ZmqError::WouldBlock.kind(), ErrorKind::WouldBlock);
    assert_eq!(ZmqError::StateMachineViolation("send before recv").kind(), ErrorKind::StateMachine);
    assert_eq!(ZmqError::Terminated.kind(), ErrorKind::Terminated);
    assert_eq!(ZmqError::UnroutablePeer("x".into()).kind(), ErrorKind::Unroutable);
    assert_eq!(ZmqError::BadOptionValue(17).kind(), ErrorKind::Invalid);
    assert_eq!(ZmqError::AddressInUse("tcp://x:1".into()).kind(), ErrorKind::Address);
    assert_eq!(ZmqError::TooManyIoThreads(99).kind(), ErrorKind::IoThreads);
  }

  #[test]
  fn endpoint_io_errors_are_classified() {
    let collision = io::Error::new(io::ErrorKind::AddrInUse, "busy");
    assert!(matches!(
      ZmqError::for_endpoint("tcp://127.0.0.1:1", collision),
      ZmqError::AddressInUse(_)
    ));

    let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "nobody home");
    assert!(matches!(
      ZmqError::for_endpoint("tcp://127.0.0.1:1", refused),
      ZmqError::PeerRefused(_)
    ));

    let other = io::Error::new(io::ErrorKind::OutOfMemory, "oom");
    assert!(matches!(ZmqError::for_endpoint("ipc:///tmp/x", other), ZmqError::Io(_)));
  }
}
