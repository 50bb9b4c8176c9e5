//! Farmgate node.
//!
//! Serves tier quotes, currency conversion and conversation read state over
//! HTTP. Backed by Postgres when `--database-url` is given, otherwise by an
//! in-process store.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod postgres;

pub use api::{router, AppState};
pub use backend::Backend;
pub use config::Cli;
