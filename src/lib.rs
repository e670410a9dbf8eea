//! # EpiSignal
//! Signal fusion core for multi-source disease surveillance.
//!
//! Heterogeneous observations (community reports, clinical records,
//! voice-channel transcriptions, IoT sensor readings) are normalized,
//! correlated across time/space/symptom/severity, and fused into
//! deterministic `FusedEvent`s. A durable offline buffer replays
//! observations captured without connectivity, and the retention layer
//! ages fused events from plaintext HOT storage through encrypted COLD
//! storage to cryptographic shredding.

pub use crate::utils::error::{Error, Result};

pub mod buffer;
pub mod config;
pub mod engine;
pub mod fusion;
pub mod persistence;
pub mod retention;
pub mod signal;
pub mod utils;
