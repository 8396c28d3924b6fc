//! # Ground-Truth Console Core
//!
//! Shared, runtime-agnostic logic for the ground-truth console: the
//! annotation taxonomy data model, the tolerant response envelope decoder,
//! and the [`transport::Transport`] trait every backend call goes through.
//!
//! This crate contains no tokio, reqwest, or filesystem I/O. The HTTP
//! transport and the in-memory backend live in the `gt-console` crate.

pub mod envelope;
pub mod models;
pub mod transport;
