//! ZMTP-compatible wire protocol pieces: connection greeting, frame codec,
//! and the command frames the engine exchanges or forwards.

pub(crate) mod codec;
pub(crate) mod command;
pub(crate) mod greeting;

pub(crate) use codec::ZmtpCodec;
pub(crate) use command::{ZmtpCommand, ZmtpReady};
pub(crate) use greeting::{ZmtpGreeting, GREETING_LENGTH};
