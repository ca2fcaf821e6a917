//! askfiles - HTTP server and operator tooling
//!
//! The binaries live in `main.rs` (`askfiles-server`) and `ctl.rs`
//! (`askfiles-ctl`); the router is exposed here so it can be tested in-process.

pub mod http;

pub use http::{build_router, AppState};
