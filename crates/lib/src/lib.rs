//! Legado core library: the chat widget session (store, reply normalization, card
//! splitting, attendance modes), the static asset server and a local webhook simulator,
//! shared by the CLI.

pub mod chat;
pub mod config;
pub mod format;
pub mod init;
pub mod layout;
pub mod normalize;
pub mod poller;
pub mod server;
pub mod simulator;
pub mod split;
pub mod store;
pub mod webhook;
