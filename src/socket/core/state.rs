use crate::message::Msg;
use crate::runtime::MailboxSender;
use crate::socket::options::SocketOptions;
use crate::socket::types::SocketType;

use async_channel::Sender as AsyncSender;
use std::collections::HashMap;
#[cfg(feature = "inproc")]
use std::collections::HashSet;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndpointType {
  Listener,
  /// An established connection (listener-accepted or connecter-made).
  Session,
}

/// One endpoint record: a bound listener or a live connection.
#[derive(Debug)]
pub(crate) struct EndpointInfo {
  /// Command mailbox of the child actor (listener or session).
  /// `None` for inproc connections, which have no actor of their own.
  pub mailbox: Option<MailboxSender>,
  pub task_handle: Option<JoinHandle<()>>,
  pub endpoint_type: EndpointType,
  pub endpoint_uri: String,
  /// (core write pipe ID, core read pipe ID) for sessions.
  pub pipe_ids: Option<(usize, usize)>,
  pub handle_id: usize,
  /// The user-requested endpoint; reconnect attempts target this.
  pub target_endpoint_uri: Option<String>,
  /// True when this side initiated the connection.
  pub is_outbound: bool,
}

/// Mutable state owned by the `SocketCore` actor.
#[derive(Debug)]
pub(crate) struct CoreState {
  pub options: SocketOptions,
  pub socket_type: SocketType,

  /// Pipe write ID -> sender feeding that peer's session.
  pub pipes_tx: HashMap<usize, AsyncSender<Msg>>,
  /// Pipe read ID -> reader task pumping that peer's frames in.
  pub pipe_reader_task_handles: HashMap<usize, JoinHandle<()>>,
  /// Normalized endpoint URI -> endpoint record.
  pub endpoints: HashMap<String, EndpointInfo>,
  /// Pipe read ID -> endpoint URI (reverse lookup for cleanup).
  pub pipe_read_id_to_endpoint_uri: HashMap<usize, String>,

  /// Resolved URI of the most recent bind (LAST_ENDPOINT).
  pub last_bound_endpoint: Option<String>,
  #[cfg(feature = "inproc")]
  pub bound_inproc_names: HashSet<String>,
}

impl CoreState {
  pub fn new(socket_type: SocketType, options: SocketOptions) -> Self {
    Self {
      options,
      socket_type,
      pipes_tx: HashMap::new(),
      pipe_reader_task_handles: HashMap::new(),
      endpoints: HashMap::new(),
      pipe_read_id_to_endpoint_uri: HashMap::new(),
      last_bound_endpoint: None,
      #[cfg(feature = "inproc")]
      bound_inproc_names: HashSet::new(),
    }
  }

  pub fn get_pipe_sender(&self, pipe_write_id: usize) -> Option<AsyncSender<Msg>> {
    self.pipes_tx.get(&pipe_write_id).cloned()
  }

  /// Removes pipe channel state for a (write, read) pair. Returns whether
  /// anything was actually removed.
  pub fn remove_pipe_state(&mut self, pipe_write_id: usize, pipe_read_id: usize) -> bool {
    let had_tx = self.pipes_tx.remove(&pipe_write_id).is_some();
    if let Some(handle) = self.pipe_reader_task_handles.remove(&pipe_read_id) {
      handle.abort();
    }
    self.pipe_read_id_to_endpoint_uri.remove(&pipe_read_id);
    had_tx
  }
}
