//! RoadTrace Core - Vehicle-Operation Log to Behavior Trace Pipeline
//!
//! Turns a multi-channel driving log into a time-aligned trace with derived
//! driving-behavior signals, in four stages:
//! 1. **Map indexing**: road-network JSON into queryable lane/junction
//!    geofences with junction-priority containment
//! 2. **Stream alignment**: five independently sampled channels fused by
//!    nearest-past timestamp onto the position clock
//! 3. **Signal derivation**: a per-frame geometric pass followed by a
//!    history-sensitive pass over the whole sequence
//! 4. **Assembly**: run-level verdicts, including the accident check

pub mod align;
pub mod assemble;
mod behavior;
pub mod channels;
pub mod classify;
pub mod config;
mod derive;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod map_index;
mod scene;

// Re-export key types for convenience
pub use align::StreamAligner;
pub use assemble::{ResultAssembler, Trace};
pub use channels::{ChannelKind, ChannelSet};
pub use config::DeriveConfig;
pub use derive::SignalEngine;
pub use error::{DecodeError, MapLoadError};
pub use frame::Frame;
pub use map_index::MapIndex;
