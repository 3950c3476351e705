//! The two-pass signal derivation engine.
//!
//! Pass 1 (`scene`) computes per-frame geometric signals from the map alone;
//! pass 2 (`behavior`) then sweeps the whole sequence in timestamp order and
//! fills the history-sensitive signals. The split exists because pass 2
//! reads pass-1 output from frames *ahead* of the one it is writing.

use tracing::{info, warn};

use crate::config::DeriveConfig;
use crate::frame::{AlignedFrame, Frame};
use crate::map_index::MapIndex;
use crate::{behavior, scene};

/// Runs both derivation passes over an aligned frame sequence.
pub struct SignalEngine<'a> {
    map: &'a MapIndex,
    config: &'a DeriveConfig,
}

impl<'a> SignalEngine<'a> {
    pub fn new(map: &'a MapIndex, config: &'a DeriveConfig) -> Self {
        SignalEngine { map, config }
    }

    pub fn run(&self, aligned: Vec<AlignedFrame>) -> Vec<Frame> {
        let mut diagnostics = RunDiagnostics::default();

        let mut frames: Vec<Frame> = aligned
            .into_iter()
            .map(|frame| {
                let signals = scene::derive(self.map, self.config, &frame, &mut diagnostics);
                Frame::from_aligned(frame, signals)
            })
            .collect();

        behavior::run(&mut frames, self.map, self.config);

        info!(frames = frames.len(), "signal derivation complete");
        frames
    }
}

/// Warn-once state for conditions that would otherwise log on every frame
/// of a long trace.
#[derive(Debug, Default)]
pub(crate) struct RunDiagnostics {
    warned_empty_map: bool,
    warned_unclassified: bool,
    warned_missing_footprint: bool,
}

impl RunDiagnostics {
    pub(crate) fn empty_map(&mut self) {
        if !self.warned_empty_map {
            self.warned_empty_map = true;
            warn!("map has no lanes or junctions; every frame will be unclassified");
        }
    }

    pub(crate) fn unclassified(&mut self, lanes: usize, junctions: usize) {
        if !self.warned_unclassified {
            self.warned_unclassified = true;
            warn!(
                lanes,
                junctions, "ego footprint outside every geofence; snapping to nearest"
            );
        }
    }

    pub(crate) fn missing_footprint(&mut self) {
        if !self.warned_missing_footprint {
            self.warned_missing_footprint = true;
            warn!("ego footprint is degenerate; scene signals default");
        }
    }
}
