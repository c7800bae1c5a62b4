//! Sidekik is a terminal-first client for the Sidekik chat backend.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns conversation state and streaming orchestration: the
//!   chunk decoder, the session state machine, attachment uploads, and the
//!   generation-job poller.
//! - [`api`] defines the wire payloads and the HTTP transport client.
//! - [`auth`] manages the bearer-token lifecycle (persistence in the
//!   platform keyring, refresh-on-401, forced logout) underneath every
//!   backend call.
//! - [`cli`] parses command-line arguments and drives the data layer.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod core;
pub mod utils;
