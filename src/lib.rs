//! Parrot Core Library
//!
//! Backend facade and session client for a talking-avatar demo: session
//! configuration, project report retrieval and generation, and conversation
//! transcript persistence against a hosted or local store.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod profile;
pub mod report;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod transcript;
pub mod upstream;
pub mod util;
