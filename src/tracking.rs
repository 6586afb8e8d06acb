use crate::container::WindowId;
use crate::geometry::Rectangle;
use log::debug;
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragPhase {
    Idle,
    Moving,
    Resizing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    pub window_id: WindowId,
    pub start_bounds: Rectangle,
    pub last_bounds: Rectangle,
    pub phase: DragPhase,
    last_event: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragEnded {
    pub window_id: WindowId,
    pub start_bounds: Rectangle,
    pub final_bounds: Rectangle,
    pub phase: DragPhase,
}

impl DragEnded {
    pub fn is_move(&self) -> bool {
        self.phase == DragPhase::Moving
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Ignored,
    Absorbed,
    Unchanged,
    Active(DragPhase),
}

pub struct WindowStateTracker {
    quiescence: Duration,
    known: HashMap<WindowId, Rectangle>,
    sessions: HashMap<WindowId, DragSession>,
    programmatic: HashMap<WindowId, Rectangle>,
}

impl WindowStateTracker {
    pub fn new(quiescence: Duration) -> Self {
        Self {
            quiescence,
            known: HashMap::new(),
            sessions: HashMap::new(),
            programmatic: HashMap::new(),
        }
    }

    pub fn set_quiescence(&mut self, quiescence: Duration) {
        self.quiescence = quiescence;
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn register(&mut self, window_id: WindowId, bounds: Rectangle) {
        self.known.insert(window_id, bounds);
    }

    pub fn unregister(&mut self, window_id: WindowId) -> Option<DragSession> {
        self.known.remove(&window_id);
        self.programmatic.remove(&window_id);
        self.sessions.remove(&window_id)
    }

    pub fn is_tracked(&self, window_id: WindowId) -> bool {
        self.known.contains_key(&window_id)
    }

    pub fn tracked_windows(&self) -> impl Iterator<Item = (WindowId, Rectangle)> + '_ {
        self.known.iter().map(|(id, bounds)| (*id, *bounds))
    }

    /// Last-known-good bounds. May lag the backend between events.
    pub fn bounds(&self, window_id: WindowId) -> Option<Rectangle> {
        self.known.get(&window_id).copied()
    }

    pub fn phase(&self, window_id: WindowId) -> DragPhase {
        self.sessions
            .get(&window_id)
            .map(|session| session.phase)
            .unwrap_or(DragPhase::Idle)
    }

    pub fn session(&self, window_id: WindowId) -> Option<&DragSession> {
        self.sessions.get(&window_id)
    }

    pub fn update_bounds(&mut self, window_id: WindowId, bounds: Rectangle) {
        if let Some(known) = self.known.get_mut(&window_id) {
            *known = bounds;
        }
    }

    /// Marks `bounds` as a move the window manager is about to issue so the
    /// backend's echo events do not open a gesture.
    pub fn expect_programmatic(&mut self, window_id: WindowId, bounds: Rectangle) {
        if self.known.contains_key(&window_id) {
            self.programmatic.insert(window_id, bounds);
        }
    }

    pub fn on_moved(&mut self, window_id: WindowId, bounds: Rectangle, now: Instant) -> TrackOutcome {
        self.observe(window_id, bounds, now, false)
    }

    pub fn on_resized(&mut self, window_id: WindowId, bounds: Rectangle, now: Instant) -> TrackOutcome {
        self.observe(window_id, bounds, now, true)
    }

    fn observe(&mut self, window_id: WindowId, bounds: Rectangle, now: Instant, resize: bool) -> TrackOutcome {
        let Some(known) = self.known.get_mut(&window_id) else {
            debug!("Ignoring geometry event for untracked window {}", window_id);
            return TrackOutcome::Ignored;
        };

        match self.programmatic.get(&window_id) {
            Some(expected) if *expected == bounds => {
                *known = bounds;
                return TrackOutcome::Absorbed;
            }
            Some(_) => {
                self.programmatic.remove(&window_id);
            }
            None => {}
        }

        let previous = *known;
        *known = bounds;

        match self.sessions.get_mut(&window_id) {
            Some(session) => {
                session.last_bounds = bounds;
                session.last_event = now;
                if resize || !bounds.same_size(&session.start_bounds) {
                    session.phase = DragPhase::Resizing;
                }
                TrackOutcome::Active(session.phase)
            }
            None => {
                if previous == bounds {
                    return TrackOutcome::Unchanged;
                }
                let phase = if resize || !bounds.same_size(&previous) {
                    DragPhase::Resizing
                } else {
                    DragPhase::Moving
                };
                debug!("Window {} entered {:?} from {}", window_id, phase, previous);
                self.sessions.insert(
                    window_id,
                    DragSession {
                        window_id,
                        start_bounds: previous,
                        last_bounds: bounds,
                        phase,
                        last_event: now,
                    },
                );
                TrackOutcome::Active(phase)
            }
        }
    }

    pub fn on_move_ended(
        &mut self,
        window_id: WindowId,
        bounds: Option<Rectangle>,
        now: Instant,
    ) -> Option<DragEnded> {
        if let Some(bounds) = bounds {
            match self.observe(window_id, bounds, now, false) {
                TrackOutcome::Active(_) => {}
                _ => return None,
            }
        } else if !self.known.contains_key(&window_id) {
            return None;
        }

        self.sessions.remove(&window_id).map(Self::finish)
    }

    pub fn flush_quiescent(&mut self, now: Instant) -> Vec<DragEnded> {
        let mut expired: Vec<WindowId> = self
            .sessions
            .values()
            .filter(|session| now.saturating_duration_since(session.last_event) >= self.quiescence)
            .map(|session| session.window_id)
            .collect();
        expired.sort();

        expired
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .map(Self::finish)
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .map(|session| session.last_event + self.quiescence)
            .min()
    }

    fn finish(session: DragSession) -> DragEnded {
        debug!(
            "Window {} finished {:?}: {} -> {}",
            session.window_id, session.phase, session.start_bounds, session.last_bounds
        );
        DragEnded {
            window_id: session.window_id,
            start_bounds: session.start_bounds,
            final_bounds: session.last_bounds,
            phase: session.phase,
        }
    }
}
