//! Core asynchronous primitives: commands, mailboxes, the event bus, pipes.

pub mod command;
pub mod event_bus;
pub mod mailbox;
#[cfg(feature = "inproc")]
pub mod one_shot_sender;
pub mod pipe;
pub mod system_events;
pub mod waitgroup;

pub use command::Command;
pub(crate) use mailbox::{mailbox, MailboxReceiver, MailboxSender};

pub use event_bus::EventBus;
pub use system_events::{ActorType, SystemEvent};

#[cfg(feature = "inproc")]
pub(crate) use one_shot_sender::OneShotSender;
pub(crate) use waitgroup::WaitGroup;
