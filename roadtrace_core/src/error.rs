//! Error taxonomy for the trace pipeline.
//!
//! Only a failed map load aborts a run. Everything else recovers locally:
//! a message that fails to decode is skipped, a missing companion-channel
//! record degrades to defaults, and geometry queries are `Option`-typed so
//! "no geometry available" is a value, not an exception.

use thiserror::Error;

/// Fatal failure while loading the road-network description.
///
/// There is no recovery path: without geofences every derived signal is
/// meaningless, so the whole run aborts.
#[derive(Debug, Error)]
pub enum MapLoadError {
    #[error("cannot read map description `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("map description is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A single raw channel message failed to decode.
///
/// Recovered by skipping that message; the rest of the channel continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {channel} record: {reason}")]
    Malformed {
        channel: &'static str,
        reason: String,
    },
}
