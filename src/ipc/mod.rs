//! Unix socket IPC between the CLI and the prediction daemon.

pub mod client;
pub mod protocol;
pub mod server;
