//! # Headless Client Library
//!
//! Bots that speak the sync protocol without a UI. They are used to soak
//! test a running server and to drive the workspace integration tests.
//!
//! - `input`: reproducible random movement deltas
//! - `network`: the [`network::Bot`], which joins a server in either model,
//!   sends traffic at a fixed pace and counts what comes back

pub mod input;
pub mod network;
