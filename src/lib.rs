#![forbid(unsafe_code)]

//! Shared library for the streamgate binaries: signed capability tokens,
//! stream reference resolution, the read-only catalog layer, and runtime
//! configuration.

pub mod catalog;
pub mod config;
pub mod reference;
pub mod security;
pub mod token;
