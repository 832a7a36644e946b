use crate::error::ZmqError;
use crate::message::Blob;

use std::time::Duration;

// Option IDs follow the libzmq numbering where one exists.
pub const ROUTING_ID: i32 = 5; // a.k.a. ZMQ_IDENTITY
pub const SUBSCRIBE: i32 = 6;
pub const UNSUBSCRIBE: i32 = 7;
pub const SNDBUF: i32 = 11;
pub const RCVBUF: i32 = 12;
pub const RCVMORE: i32 = 13;
pub const TYPE: i32 = 16;
pub const LINGER: i32 = 17;
pub const RECONNECT_IVL: i32 = 18;
pub const BACKLOG: i32 = 19;
pub const RECONNECT_IVL_MAX: i32 = 21;
pub const SNDHWM: i32 = 23;
pub const RCVHWM: i32 = 24;
pub const RCVTIMEO: i32 = 27;
pub const SNDTIMEO: i32 = 28;
pub const LAST_ENDPOINT: i32 = 32;
pub const ROUTER_MANDATORY: i32 = 33;
pub const TCP_KEEPALIVE: i32 = 34;
pub const TCP_KEEPALIVE_IDLE: i32 = 35;
pub const TCP_KEEPALIVE_CNT: i32 = 36;
pub const TCP_KEEPALIVE_INTVL: i32 = 37;
pub const XPUB_VERBOSE: i32 = 40;
pub const IPV6: i32 = 42;

/// Parsed and validated socket options.
#[derive(Debug, Clone)]
pub(crate) struct SocketOptions {
  // High water marks (pipe / incoming queue capacities).
  pub rcvhwm: usize,
  pub sndhwm: usize,
  // Timeouts: None = infinite, Some(ZERO) = non-blocking, Some(>0) = bound.
  pub rcvtimeo: Option<Duration>,
  pub sndtimeo: Option<Duration>,
  // None = infinite linger; Some(d) bounds the outbound drain on close.
  pub linger: Option<Duration>,
  pub reconnect_ivl: Option<Duration>,
  pub reconnect_ivl_max: Option<Duration>,
  pub backlog: i32,
  pub sndbuf: Option<usize>,
  pub rcvbuf: Option<usize>,
  pub routing_id: Option<Blob>,
  /// Socket type name advertised in READY (set at creation).
  pub socket_type_name: String,
  pub tcp_nodelay: bool,
  pub tcp_keepalive_enabled: i32, // -1 off, 0 system default, 1 on
  pub tcp_keepalive_idle: Option<Duration>,
  pub tcp_keepalive_count: Option<u32>,
  pub tcp_keepalive_interval: Option<Duration>,
  pub ipv6: bool,
  /// ROUTER: error (EHOSTUNREACH) instead of silently dropping unroutable.
  pub router_mandatory: bool,
  /// XPUB: pass every subscription message up, not just first/last.
  pub xpub_verbose: bool,
}

impl Default for SocketOptions {
  fn default() -> Self {
    Self {
      rcvhwm: 1000,
      sndhwm: 1000,
      rcvtimeo: None,
      sndtimeo: None,
      linger: Some(Duration::ZERO),
      reconnect_ivl: Some(Duration::from_millis(100)),
      reconnect_ivl_max: Some(Duration::ZERO), // 0 disables backoff growth
      backlog: 100,
      sndbuf: None,
      rcvbuf: None,
      routing_id: None,
      socket_type_name: String::new(),
      tcp_nodelay: true,
      tcp_keepalive_enabled: 0,
      tcp_keepalive_idle: None,
      tcp_keepalive_count: None,
      tcp_keepalive_interval: None,
      ipv6: false,
      router_mandatory: false,
      xpub_verbose: false,
    }
  }
}

/// Stream-level settings handed to TCP listeners/connecters.
#[derive(Debug, Clone, Default)]
pub(crate) struct TcpTransportConfig {
  pub tcp_nodelay: bool,
  pub keepalive_mode: i32,
  pub keepalive_time: Option<Duration>,
  pub keepalive_interval: Option<Duration>,
  pub keepalive_count: Option<u32>,
  pub sndbuf: Option<usize>,
  pub rcvbuf: Option<usize>,
  pub backlog: i32,
}

impl SocketOptions {
  pub(crate) fn tcp_config(&self) -> TcpTransportConfig {
    TcpTransportConfig {
      tcp_nodelay: self.tcp_nodelay,
      keepalive_mode: self.tcp_keepalive_enabled,
      keepalive_time: self.tcp_keepalive_idle,
      keepalive_interval: self.tcp_keepalive_interval,
      keepalive_count: self.tcp_keepalive_count,
      sndbuf: self.sndbuf,
      rcvbuf: self.rcvbuf,
      backlog: self.backlog,
    }
  }
}

// --- Option value parsers ---

/// Parses an integer option (native endianness, as in the C API).
pub(crate) fn parse_i32_option(value: &[u8], option_id: i32) -> Result<i32, ZmqError> {
  let arr: [u8; 4] = value.try_into().map_err(|_| ZmqError::BadOptionValue(option_id))?;
  Ok(i32::from_ne_bytes(arr))
}

pub(crate) fn parse_bool_option(value: &[u8], option_id: i32) -> Result<bool, ZmqError> {
  match parse_i32_option(value, option_id)? {
    0 => Ok(false),
    1 => Ok(true),
    _ => Err(ZmqError::BadOptionValue(option_id)),
  }
}

/// Timeout in milliseconds: -1 = infinite, 0 = non-blocking, >0 = bound.
pub(crate) fn parse_timeout_option(value: &[u8], option_id: i32) -> Result<Option<Duration>, ZmqError> {
  match parse_i32_option(value, option_id)? {
    -1 => Ok(None),
    ms @ 0.. => Ok(Some(Duration::from_millis(ms as u64))),
    _ => Err(ZmqError::BadOptionValue(option_id)),
  }
}

/// Linger in milliseconds: -1 = infinite, >= 0 = bound.
pub(crate) fn parse_linger_option(value: &[u8]) -> Result<Option<Duration>, ZmqError> {
  match parse_i32_option(value, LINGER)? {
    -1 => Ok(None),
    ms @ 0.. => Ok(Some(Duration::from_millis(ms as u64))),
    _ => Err(ZmqError::BadOptionValue(LINGER)),
  }
}

/// Reconnect interval: 0 disables reconnection entirely.
pub(crate) fn parse_reconnect_ivl_option(value: &[u8]) -> Result<Option<Duration>, ZmqError> {
  match parse_i32_option(value, RECONNECT_IVL)? {
    0 => Ok(None),
    ms @ 1.. => Ok(Some(Duration::from_millis(ms as u64))),
    _ => Err(ZmqError::BadOptionValue(RECONNECT_IVL)),
  }
}

/// Max reconnect interval: 0 disables exponential backoff growth.
pub(crate) fn parse_reconnect_ivl_max_option(value: &[u8]) -> Result<Option<Duration>, ZmqError> {
  match parse_i32_option(value, RECONNECT_IVL_MAX)? {
    ms @ 0.. => Ok(Some(Duration::from_millis(ms as u64))),
    _ => Err(ZmqError::BadOptionValue(RECONNECT_IVL_MAX)),
  }
}

pub(crate) fn parse_hwm_option(value: &[u8], option_id: i32) -> Result<usize, ZmqError> {
  match parse_i32_option(value, option_id)? {
    hwm @ 0.. => Ok(hwm as usize),
    _ => Err(ZmqError::BadOptionValue(option_id)),
  }
}

pub(crate) fn parse_buffer_size_option(value: &[u8], option_id: i32) -> Result<Option<usize>, ZmqError> {
  match parse_i32_option(value, option_id)? {
    -1 | 0 => Ok(None), // leave the OS default in place
    n @ 1.. => Ok(Some(n as usize)),
    _ => Err(ZmqError::BadOptionValue(option_id)),
  }
}

pub(crate) fn parse_secs_duration_option(value: &[u8], option_id: i32) -> Result<Option<Duration>, ZmqError> {
  match parse_i32_option(value, option_id)? {
    secs @ 0.. => Ok(Some(Duration::from_secs(secs as u64))),
    _ => Err(ZmqError::BadOptionValue(option_id)),
  }
}

pub(crate) fn parse_u32_option(value: &[u8], option_id: i32) -> Result<Option<u32>, ZmqError> {
  match parse_i32_option(value, option_id)? {
    n @ 0.. => Ok(Some(n as u32)),
    _ => Err(ZmqError::BadOptionValue(option_id)),
  }
}

/// TCP_KEEPALIVE mode is -1, 0 or 1.
pub(crate) fn parse_keepalive_mode_option(value: &[u8]) -> Result<i32, ZmqError> {
  match parse_i32_option(value, TCP_KEEPALIVE)? {
    mode @ -1..=1 => Ok(mode),
    _ => Err(ZmqError::BadOptionValue(TCP_KEEPALIVE)),
  }
}

/// Identities are limited to 255 bytes.
pub(crate) fn parse_blob_option(value: &[u8], option_id: i32) -> Result<Blob, ZmqError> {
  if value.len() > 255 {
    Err(ZmqError::BadOptionValue(option_id))
  } else {
    Ok(Blob::from(value.to_vec()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timeout_encodings() {
    assert_eq!(parse_timeout_option(&(-1i32).to_ne_bytes(), RCVTIMEO).unwrap(), None);
    assert_eq!(
      parse_timeout_option(&0i32.to_ne_bytes(), RCVTIMEO).unwrap(),
      Some(Duration::ZERO)
    );
    assert_eq!(
      parse_timeout_option(&250i32.to_ne_bytes(), RCVTIMEO).unwrap(),
      Some(Duration::from_millis(250))
    );
    assert!(parse_timeout_option(&(-2i32).to_ne_bytes(), RCVTIMEO).is_err());
  }

  #[test]
  fn hwm_rejects_negative() {
    assert!(parse_hwm_option(&(-1i32).to_ne_bytes(), SNDHWM).is_err());
    assert_eq!(parse_hwm_option(&5i32.to_ne_bytes(), SNDHWM).unwrap(), 5);
  }

  #[test]
  fn identity_length_limit() {
    assert!(parse_blob_option(&[0u8; 255], ROUTING_ID).is_ok());
    assert!(parse_blob_option(&[0u8; 256], ROUTING_ID).is_err());
  }
}
