//! # GT Console
//!
//! A data-entry console for a hierarchical ground-truth annotation taxonomy:
//! Variant → Part → Capture → Module (OCR or Detection) → Ground-Truth
//! Entry, plus a global Class registry that normalizes module outputs.
//!
//! The console is a client. All state lives in a REST backend; this crate
//! sequences the calls, resolves classes, and aggregates the hierarchy for
//! review.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Orchestrator │   │   Resolver   │   │  Aggregator  │
//! │  (create)    │──▶│ (class map)  │   │ (fetch-all)  │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        └──────────────────┼──────────────────┘
//!                           ▼
//!                    ┌──────────────┐   ┌──────────────┐
//!                    │   Gateway    │──▶│  Transport   │
//!                    │ (+ Session)  │   │ HTTP / mem   │
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gtc session set-token "$TOKEN"
//! gtc variants create V1
//! gtc parts create <VARIANT> P1
//! gtc captures create <VARIANT> <PART> --name front
//! gtc modules create <CAPTURE> --type ocr --detection-model dm1
//! gtc entries add <CAPTURE> <MODULE> ocr --value ABC123
//! gtc fetch-all <VARIANT>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`session`] | Bearer token lifecycle and session observers |
//! | [`gateway`] | Backend Gateway Client and HTTP transport |
//! | [`api`] | Typed endpoint calls and request payloads |
//! | [`resolver`] | Class Resolver |
//! | [`aggregate`] | Hierarchy Aggregator |
//! | [`orchestrate`] | Entity Mutation Orchestrator |
//! | [`progress`] | Fetch-all progress reporting |
//! | [`console`] | CLI entry points |
//! | [`memory`] | In-process backend for tests |
//!
//! The data model, envelope decoding and the [`Transport`] trait live in
//! the `gt-console-core` crate.
//!
//! [`Transport`]: gt_console_core::transport::Transport

pub mod aggregate;
pub mod api;
pub mod config;
pub mod console;
pub mod gateway;
pub mod memory;
pub mod orchestrate;
pub mod progress;
pub mod resolver;
pub mod session;
