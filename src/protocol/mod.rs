pub(crate) mod zmtp;
