//! Firefly relay: turns one generation request into a credential exchange,
//! an asynchronous provider job, and a polled result.

pub mod api;
pub mod cli;
pub mod config;
pub mod credential;
pub mod error;
pub mod extract;
pub mod kind;
pub mod orchestrator;
pub mod poll;
pub mod progress;
pub mod request;
pub mod server;
pub mod submit;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use kind::JobKind;
pub use orchestrator::{GenerationOutcome, Orchestrator};
