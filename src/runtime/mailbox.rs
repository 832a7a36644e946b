//! Type aliases for actor communication channels based on `async-channel`.

use crate::runtime::command::Command;

/// The sending end of an actor's mailbox. Cloneable, so multiple tasks can
/// post commands to the same actor.
pub type MailboxSender = async_channel::Sender<Command>;

/// The receiving end of an actor's mailbox. Exactly one task owns it and
/// processes commands sequentially; the channel's waker is the wakeup signal
/// that an eventfd would provide in a poll-based reactor.
pub type MailboxReceiver = async_channel::Receiver<Command>;

/// Default capacity for bounded mailboxes.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Creates a new bounded mailbox channel pair.
pub fn mailbox(capacity: usize) -> (MailboxSender, MailboxReceiver) {
  async_channel::bounded(capacity.max(1))
}
