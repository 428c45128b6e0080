//! askdocs is a terminal client for documentation-grounded question answering.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation store, the streaming session and its
//!   cancellation, generation providers, and persistence of chat history.
//! - [`api`] defines the wire payloads exchanged with the inference backend
//!   and the hosted providers.
//! - [`cli`] parses arguments and drives the one-shot and interactive
//!   commands on top of [`core::client::ChatClient`].
//! - [`utils`] holds URL helpers and the plain-text transcript writer.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
