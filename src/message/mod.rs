//! Message-related types (`Msg`, `MsgFlags`, `Blob`).

mod blob;
mod flags;
mod msg;

pub use blob::Blob;
pub use flags::MsgFlags;
pub use msg::Msg;
