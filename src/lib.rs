//! Bookforged - multi-provider ISBN and book metadata resolution
//!
//! This library crate exposes the resolution engine for the CLI and for
//! integration testing.

pub mod clock;
pub mod config;
pub mod http;
pub mod resolver;
pub mod secrets;
pub mod store;

#[cfg(test)]
mod test_support;
