use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::types::{Note, PositionedNote};

/// Sticky-note background colours.
pub const NOTE_PALETTE: [&str; 28] = [
    // yellow / amber
    "#fef9c3", "#fef08a", "#fef3c7", "#fde68a",
    // red / orange
    "#fee2e2", "#fecaca", "#ffedd5", "#fed7aa",
    // green / lime
    "#dcfce7", "#bbf7d0", "#ecfccb", "#d9f99d",
    // blue / sky
    "#dbeafe", "#bfdbfe", "#e0f2fe", "#bae6fd",
    // purple / indigo
    "#f3e8ff", "#e9d5ff", "#e0e7ff", "#c7d2fe",
    // pink / rose
    "#fce7f3", "#fbcfe8", "#ffe4e6", "#fecdd3",
    // teal / cyan
    "#ccfbf1", "#99f6e4", "#cffafe", "#a5f3fc",
];

pub const PLACEMENT_MIN_PERCENT: f64 = 10.0;
pub const PLACEMENT_SPAN_PERCENT: f64 = 80.0;
pub const MAX_TILT_DEGREES: f64 = 15.0;

/// Client-only placement of a note, as percentages of the viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotePosition {
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub color: String,
}

impl NotePosition {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            x: PLACEMENT_MIN_PERCENT + rng.gen::<f64>() * PLACEMENT_SPAN_PERCENT,
            y: PLACEMENT_MIN_PERCENT + rng.gen::<f64>() * PLACEMENT_SPAN_PERCENT,
            rotation: -MAX_TILT_DEGREES + rng.gen::<f64>() * MAX_TILT_DEGREES * 2.0,
            color: NOTE_PALETTE[rng.gen_range(0..NOTE_PALETTE.len())].to_string(),
        }
    }
}

/// Positions of the notes of one track, keyed by note id.
#[derive(Debug, Default)]
pub struct PositionBook {
    track_id: Option<String>,
    positions: HashMap<String, NotePosition>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track_id.as_deref()
    }

    pub fn get(&self, note_id: &str) -> Option<&NotePosition> {
        self.positions.get(note_id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.track_id = None;
        self.positions.clear();
    }

    /// Pairs each note with a position. Known ids keep theirs untouched, new
    /// ids get a random one, and ids that left the set are forgotten.
    pub fn reconcile<R: Rng + ?Sized>(
        &mut self,
        track_id: &str,
        notes: &[Note],
        rng: &mut R,
    ) -> Vec<PositionedNote> {
        if self.track_id.as_deref() != Some(track_id) {
            if !self.positions.is_empty() {
                debug!("Track changed, discarding {} note positions", self.positions.len());
            }
            self.positions.clear();
            self.track_id = Some(track_id.to_string());
        }

        if notes.is_empty() {
            self.positions.clear();
            return Vec::new();
        }

        let live: HashSet<&str> = notes.iter().map(|n| n.id.as_str()).collect();
        self.positions.retain(|id, _| live.contains(id.as_str()));

        let mut placed = 0;
        let positioned = notes
            .iter()
            .map(|note| {
                let position = self
                    .positions
                    .entry(note.id.clone())
                    .or_insert_with(|| {
                        placed += 1;
                        NotePosition::random(&mut *rng)
                    })
                    .clone();
                PositionedNote::new(note.clone(), position)
            })
            .collect();

        debug!("Placed {} new notes for track {}", placed, track_id);
        positioned
    }

    /// Moves a note, replacing its position as a whole.
    pub fn move_to(&mut self, note_id: &str, x: f64, y: f64) -> Option<NotePosition> {
        let current = self.positions.get(note_id)?;
        let moved = NotePosition {
            x,
            y,
            rotation: current.rotation,
            color: current.color.clone(),
        };
        self.positions.insert(note_id.to_string(), moved.clone());
        Some(moved)
    }
}
