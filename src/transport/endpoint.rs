use crate::error::ZmqError;
#[cfg(feature = "ipc")]
use std::path::PathBuf;

/// A parsed and validated endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Endpoint {
  /// Address part (e.g. "127.0.0.1:5555" or "*:0") plus the original URI.
  Tcp(String, String),
  #[cfg(feature = "ipc")]
  Ipc(PathBuf, String),
  #[cfg(feature = "inproc")]
  Inproc(String),
}

/// Parses an endpoint string into a structured `Endpoint`.
///
/// `pgm://` and `epgm://` are recognized schemes without an engine here, so
/// they report `TransportNotSupported` rather than `MalformedEndpoint`.
pub(crate) fn parse_endpoint(endpoint_str: &str) -> Result<Endpoint, ZmqError> {
  let invalid = || ZmqError::MalformedEndpoint(endpoint_str.to_string());

  let Some(separator_pos) = endpoint_str.find("://") else {
    return Err(invalid());
  };
  let scheme = &endpoint_str[..separator_pos];
  let address_part = &endpoint_str[separator_pos + 3..];

  match scheme {
    "tcp" => {
      if address_part.is_empty() || !address_part.contains(':') {
        Err(invalid())
      } else {
        Ok(Endpoint::Tcp(address_part.to_string(), endpoint_str.to_string()))
      }
    }

    #[cfg(feature = "ipc")]
    "ipc" => {
      if address_part.is_empty() || address_part.contains('\0') {
        Err(invalid())
      } else {
        Ok(Endpoint::Ipc(PathBuf::from(address_part), endpoint_str.to_string()))
      }
    }

    #[cfg(feature = "inproc")]
    "inproc" => {
      if address_part.is_empty() || address_part.contains('\0') {
        Err(invalid())
      } else {
        Ok(Endpoint::Inproc(address_part.to_string()))
      }
    }

    "pgm" | "epgm" => Err(ZmqError::TransportNotSupported(endpoint_str.to_string())),

    _ => Err(ZmqError::TransportNotSupported(endpoint_str.to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_tcp() {
    match parse_endpoint("tcp://127.0.0.1:5555").unwrap() {
      Endpoint::Tcp(addr, uri) => {
        assert_eq!(addr, "127.0.0.1:5555");
        assert_eq!(uri, "tcp://127.0.0.1:5555");
      }
      #[allow(unreachable_patterns)]
      other => panic!("unexpected endpoint {:?}", other),
    }
  }

  #[test]
  fn wildcard_tcp_is_valid() {
    assert!(parse_endpoint("tcp://127.0.0.1:0").is_ok());
    assert!(parse_endpoint("tcp://*:5555").is_ok());
  }

  #[cfg(feature = "inproc")]
  #[test]
  fn parses_inproc() {
    assert!(matches!(
      parse_endpoint("inproc://a-name").unwrap(),
      Endpoint::Inproc(name) if name == "a-name"
    ));
  }

  #[test]
  fn rejects_missing_scheme_and_empty_address() {
    assert!(matches!(parse_endpoint("hostname:5555"), Err(ZmqError::MalformedEndpoint(_))));
    assert!(matches!(parse_endpoint("tcp://"), Err(ZmqError::MalformedEndpoint(_))));
  }

  #[test]
  fn multicast_is_unsupported() {
    assert!(matches!(
      parse_endpoint("pgm://eth0;239.192.1.1:5555"),
      Err(ZmqError::TransportNotSupported(_))
    ));
  }
}
