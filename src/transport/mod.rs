pub(crate) mod endpoint;
#[cfg(feature = "inproc")]
pub(crate) mod inproc;
#[cfg(all(feature = "ipc", unix))]
pub(crate) mod ipc;
pub(crate) mod tcp;
