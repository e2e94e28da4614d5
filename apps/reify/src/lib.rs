//! # reify
//!
//! The Reify binary's library half: the CLI and the effects that need a
//! tokio runtime. Integration tests drive the same entry points as `main`.

pub mod cli;
pub mod effects;
