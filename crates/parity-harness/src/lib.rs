//! Subconverter Parity Harness
//!
//! Launches the original subconverter and subconverter-rs side by side,
//! sends both the same fixed set of requests and checks that the responses
//! agree semantically (JSON/YAML structure, normalized text, version banner
//! shape). Also compares static resource trees and aggregates everything
//! into a suite summary with an optional strict gate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │  subconverter   │      │ subconverter-rs │
//! │  (local/docker) │      │  (local)        │
//! │  :19500         │      │  :19501         │
//! └────────┬────────┘      └────────┬────────┘
//!          │                        │
//!          └──────────┬─────────────┘
//!                     │
//!              ┌──────▼──────┐
//!              │   Parity    │
//!              │   Harness   │
//!              └─────────────┘
//! ```

pub mod cases;
pub mod client;
pub mod compare;
pub mod config;
pub mod error;
pub mod harness;
pub mod launcher;
pub mod report;
pub mod resources;
pub mod suite;

pub use error::{HarnessError, HarnessResult};
