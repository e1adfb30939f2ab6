use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::placement::{NotePosition, PositionBook};

/// Rendered width and height of a sticky note, in pixels.
pub const NOTE_SIZE_PX: f64 = 192.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// Bounding box of a rendered note in viewport pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    pub note_id: String,
    /// Where the pointer grabbed the note, as a fraction of its width/height.
    pub offset: Point,
}

/// Cosmetic feedback for the renderer (the wind animation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DragFeedback {
    Started { note_id: String },
    Ended { note_id: String },
}

#[derive(Debug)]
pub struct DragEngine {
    session: Option<DragSession>,
    note_width_px: f64,
    note_height_px: f64,
}

impl Default for DragEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DragEngine {
    pub fn new() -> Self {
        Self::with_note_size(NOTE_SIZE_PX, NOTE_SIZE_PX)
    }

    pub fn with_note_size(width_px: f64, height_px: f64) -> Self {
        Self {
            session: None,
            note_width_px: width_px,
            note_height_px: height_px,
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    pub fn active_note_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.note_id.as_str())
    }

    /// Idle -> Dragging. Ignored while another drag is active.
    pub fn pointer_down(&mut self, note_id: &str, pointer: Point, rect: NoteRect) -> Option<DragFeedback> {
        if let Some(active) = &self.session {
            warn!(
                "Ignoring pointer-down on note {} while note {} is being dragged",
                note_id, active.note_id
            );
            return None;
        }

        let offset = Point {
            x: fraction_within(pointer.x - rect.left, rect.width),
            y: fraction_within(pointer.y - rect.top, rect.height),
        };
        debug!("Drag start on note {} at offset ({:.3}, {:.3})", note_id, offset.x, offset.y);

        self.session = Some(DragSession {
            note_id: note_id.to_string(),
            offset,
        });
        Some(DragFeedback::Started {
            note_id: note_id.to_string(),
        })
    }

    /// Repositions the dragged note under the pointer, kept inside the viewport.
    /// Returns `None` when idle or when the note is unknown.
    pub fn pointer_move(
        &self,
        pointer: Point,
        viewport: Viewport,
        book: &mut PositionBook,
    ) -> Option<(String, NotePosition)> {
        let session = self.session.as_ref()?;
        if viewport.width <= 0.0 || viewport.height <= 0.0 {
            return None;
        }

        let note_width_percent = self.note_width_px / viewport.width * 100.0;
        let note_height_percent = self.note_height_px / viewport.height * 100.0;

        let x = pointer.x / viewport.width * 100.0 - session.offset.x * note_width_percent;
        let y = pointer.y / viewport.height * 100.0 - session.offset.y * note_height_percent;
        let (x, y) = clamp_to_viewport(x, y, note_width_percent, note_height_percent);

        let position = book.move_to(&session.note_id, x, y)?;
        Some((session.note_id.clone(), position))
    }

    /// Dragging -> Idle.
    pub fn pointer_up(&mut self) -> Option<DragFeedback> {
        let session = self.session.take()?;
        debug!("Drag end on note {}", session.note_id);
        Some(DragFeedback::Ended {
            note_id: session.note_id,
        })
    }

    /// Drops any active drag without feedback, e.g. when the notes go away.
    pub fn cancel(&mut self) {
        self.session = None;
    }
}

/// Clamps a top-left corner so a note of the given size stays on screen.
pub fn clamp_to_viewport(x: f64, y: f64, note_width_percent: f64, note_height_percent: f64) -> (f64, f64) {
    let max_x = (100.0 - note_width_percent).max(0.0);
    let max_y = (100.0 - note_height_percent).max(0.0);
    (x.clamp(0.0, max_x), y.clamp(0.0, max_y))
}

fn fraction_within(distance: f64, extent: f64) -> f64 {
    if extent <= 0.0 {
        0.0
    } else {
        (distance / extent).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Note;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const VIEWPORT: Viewport = Viewport {
        width: 1920.0,
        height: 1080.0,
    };

    fn book_with(ids: &[&str]) -> PositionBook {
        let notes: Vec<Note> = ids
            .iter()
            .map(|id| Note {
                id: id.to_string(),
                track_id: "t".to_string(),
                content: "x".to_string(),
                author: None,
                location: None,
                created_at: String::new(),
                formatted_date: None,
            })
            .collect();
        let mut book = PositionBook::new();
        book.reconcile("t", &notes, &mut StdRng::seed_from_u64(11));
        book
    }

    fn rect_at(left: f64, top: f64) -> NoteRect {
        NoteRect {
            left,
            top,
            width: NOTE_SIZE_PX,
            height: NOTE_SIZE_PX,
        }
    }

    #[test]
    fn pointer_down_captures_offset_fraction() {
        let mut engine = DragEngine::new();
        let feedback = engine.pointer_down("a", Point { x: 148.0, y: 296.0 }, rect_at(100.0, 200.0));
        assert_eq!(feedback, Some(DragFeedback::Started { note_id: "a".into() }));
        let session = engine.session().unwrap();
        assert_eq!(session.offset, Point { x: 0.25, y: 0.5 });
    }

    #[test]
    fn second_pointer_down_is_ignored() {
        let mut engine = DragEngine::new();
        engine.pointer_down("a", Point { x: 0.0, y: 0.0 }, rect_at(0.0, 0.0));
        assert_eq!(engine.pointer_down("b", Point { x: 5.0, y: 5.0 }, rect_at(0.0, 0.0)), None);
        assert_eq!(engine.active_note_id(), Some("a"));
    }

    #[test]
    fn move_follows_pointer_minus_offset() {
        let mut book = book_with(&["a"]);
        let before = book.get("a").cloned().unwrap();
        let mut engine = DragEngine::new();
        engine.pointer_down("a", Point { x: 96.0, y: 96.0 }, rect_at(0.0, 0.0));

        let (id, position) = engine
            .pointer_move(Point { x: 960.0, y: 540.0 }, VIEWPORT, &mut book)
            .unwrap();
        assert_eq!(id, "a");
        let expected_x = 50.0 - 0.5 * (NOTE_SIZE_PX / 1920.0 * 100.0);
        let expected_y = 50.0 - 0.5 * (NOTE_SIZE_PX / 1080.0 * 100.0);
        assert!((position.x - expected_x).abs() < 1e-9);
        assert!((position.y - expected_y).abs() < 1e-9);
        assert_eq!(position.rotation, before.rotation);
        assert_eq!(position.color, before.color);
        assert_eq!(book.get("a"), Some(&position));
    }

    #[test]
    fn dragging_to_origin_clamps_to_zero_for_any_offset() {
        for offset in [0.0, 0.3, 0.99] {
            let mut book = book_with(&["a"]);
            let mut engine = DragEngine::new();
            let grab = Point {
                x: 500.0 + offset * NOTE_SIZE_PX,
                y: 300.0 + offset * NOTE_SIZE_PX,
            };
            engine.pointer_down("a", grab, rect_at(500.0, 300.0));
            let (_, position) = engine
                .pointer_move(Point { x: 0.0, y: 0.0 }, VIEWPORT, &mut book)
                .unwrap();
            assert_eq!((position.x, position.y), (0.0, 0.0));
        }
    }

    #[test]
    fn position_stays_inside_viewport_at_every_corner() {
        let max_x = 100.0 - NOTE_SIZE_PX / VIEWPORT.width * 100.0;
        let max_y = 100.0 - NOTE_SIZE_PX / VIEWPORT.height * 100.0;
        let corners = [
            Point { x: 0.0, y: 0.0 },
            Point { x: VIEWPORT.width, y: 0.0 },
            Point { x: 0.0, y: VIEWPORT.height },
            Point { x: VIEWPORT.width, y: VIEWPORT.height },
            Point { x: -400.0, y: 5_000.0 },
        ];
        for offset in [0.0, 0.5, 1.0] {
            let mut book = book_with(&["a"]);
            let mut engine = DragEngine::new();
            engine.pointer_down(
                "a",
                Point {
                    x: offset * NOTE_SIZE_PX,
                    y: offset * NOTE_SIZE_PX,
                },
                rect_at(0.0, 0.0),
            );
            for corner in corners {
                let (_, p) = engine.pointer_move(corner, VIEWPORT, &mut book).unwrap();
                assert!(p.x >= 0.0 && p.x <= max_x, "x {} escaped", p.x);
                assert!(p.y >= 0.0 && p.y <= max_y, "y {} escaped", p.y);
            }
        }
    }

    #[test]
    fn moves_after_pointer_up_are_ignored() {
        let mut book = book_with(&["a"]);
        let before = book.get("a").cloned();
        let mut engine = DragEngine::new();
        engine.pointer_down("a", Point { x: 0.0, y: 0.0 }, rect_at(0.0, 0.0));
        assert_eq!(engine.pointer_up(), Some(DragFeedback::Ended { note_id: "a".into() }));
        assert!(engine
            .pointer_move(Point { x: 10.0, y: 10.0 }, VIEWPORT, &mut book)
            .is_none());
        assert_eq!(book.get("a").cloned(), before);
        assert_eq!(engine.pointer_up(), None);
    }

    #[test]
    fn tiny_viewport_pins_note_to_origin() {
        assert_eq!(clamp_to_viewport(30.0, 30.0, 150.0, 150.0), (0.0, 0.0));
    }
}
