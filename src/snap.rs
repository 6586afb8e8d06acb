use crate::container::WindowId;
use crate::geometry::{Edge, Rectangle};
use crate::group::GroupModel;
use crate::tracking::{DragEnded, DragPhase};
use bitflags::bitflags;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WindowStateTracking: u8 {
        const MAIN = 0b01;
        const GROUP = 0b10;
    }
}

impl Default for WindowStateTracking {
    fn default() -> Self {
        Self::MAIN
    }
}

impl fmt::Display for WindowStateTracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = [(Self::MAIN, "main"), (Self::GROUP, "group")]
            .into_iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
            .collect();
        write!(f, "{}", names.join("|"))
    }
}

impl FromStr for WindowStateTracking {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = Self::empty();
        for part in s.split('|').map(str::trim) {
            match part.to_lowercase().as_str() {
                "main" => flags |= Self::MAIN,
                "group" => flags |= Self::GROUP,
                "none" | "" => {}
                other => anyhow::bail!("Unknown window state tracking mode: {}", other),
            }
        }
        Ok(flags)
    }
}

impl Serialize for WindowStateTracking {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WindowStateTracking {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapWindow {
    pub id: WindowId,
    pub bounds: Rectangle,
    pub allow_grouping: bool,
    pub phase: DragPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapCandidate {
    pub window_id: WindowId,
    pub anchor: WindowId,
    pub distance: f64,
    pub edge: Edge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SnapAction {
    Relocate { window: WindowId, bounds: Rectangle },
    Join { window: WindowId, target: WindowId },
    Leave { window: WindowId },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapPreview {
    pub window_id: WindowId,
    pub bounds: Rectangle,
    pub followers: Vec<(WindowId, Rectangle)>,
    pub candidate: Option<SnapCandidate>,
}

#[derive(Debug, Clone)]
pub struct SnapAssist {
    threshold: f64,
    tracking: WindowStateTracking,
}

impl SnapAssist {
    pub fn new(threshold: f64, tracking: WindowStateTracking) -> Self {
        Self {
            threshold: threshold.max(0.0),
            tracking,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn tracking(&self) -> WindowStateTracking {
        self.tracking
    }

    pub fn set_tracking(&mut self, tracking: WindowStateTracking) {
        self.tracking = tracking;
    }

    pub fn is_enabled(&self) -> bool {
        !self.tracking.is_empty()
    }

    fn follows_group(&self) -> bool {
        self.tracking.contains(WindowStateTracking::GROUP)
    }

    pub fn evaluate(
        &self,
        ended: &DragEnded,
        windows: &BTreeMap<WindowId, SnapWindow>,
        groups: &GroupModel,
    ) -> Vec<SnapAction> {
        let moved = ended.window_id;
        if !self.is_enabled() || !ended.is_move() {
            return Vec::new();
        }
        let Some(window) = windows.get(&moved) else {
            debug!("Snap evaluation skipped, window {} is not tracked", moved);
            return Vec::new();
        };
        if !window.allow_grouping {
            return Vec::new();
        }

        let final_bounds = ended.final_bounds;
        let grouped = groups.is_grouped(moved);
        let followed = grouped && self.follows_group();
        let mut actions = Vec::new();
        let mut sources = vec![(moved, final_bounds)];

        if followed {
            for (member, bounds) in self.follow_bounds(moved, final_bounds, windows, groups) {
                if windows.get(&member).map(|w| w.bounds) != Some(bounds) {
                    actions.push(SnapAction::Relocate { window: member, bounds });
                }
                sources.push((member, bounds));
            }

            // The group moves as one unit and absorbs every free window it
            // now touches; windows in other groups are left alone.
            let ranked = self.rank(&sources, windows, |candidate| {
                !groups.is_grouped(candidate.id) && is_free_candidate(candidate)
            });
            for candidate in ranked {
                debug!(
                    "Window {} snaps to group of {} at {:.1}px",
                    candidate.window_id, candidate.anchor, candidate.distance
                );
                actions.push(SnapAction::Join {
                    window: candidate.window_id,
                    target: candidate.anchor,
                });
            }
            return actions;
        }

        let ranked = self.rank(&sources, windows, |candidate| {
            candidate.id != moved
                && (groups.are_grouped(moved, candidate.id) || is_free_candidate(candidate))
        });

        let Some(winner) = ranked.first() else {
            if grouped {
                debug!("Window {} moved away from its group", moved);
                actions.push(SnapAction::Leave { window: moved });
            }
            return actions;
        };

        if groups.are_grouped(moved, winner.window_id) {
            debug!(
                "Window {} is still nearest to group peer {}",
                moved, winner.window_id
            );
            return actions;
        }

        debug!(
            "Window {} snaps to {} ({:?} edge, {:.1}px)",
            moved, winner.window_id, winner.edge, winner.distance
        );
        if grouped {
            actions.push(SnapAction::Leave { window: moved });
        }
        actions.push(SnapAction::Join {
            window: moved,
            target: winner.window_id,
        });
        actions
    }

    pub fn preview(
        &self,
        window_id: WindowId,
        bounds: Rectangle,
        windows: &BTreeMap<WindowId, SnapWindow>,
        groups: &GroupModel,
    ) -> Option<SnapPreview> {
        if !self.is_enabled() || !windows.get(&window_id)?.allow_grouping {
            return None;
        }

        let followers = if self.follows_group() {
            self.follow_bounds(window_id, bounds, windows, groups)
        } else {
            Vec::new()
        };

        let mut sources = vec![(window_id, bounds)];
        sources.extend(followers.iter().copied());
        let candidate = self
            .rank(&sources, windows, |candidate| {
                candidate.id != window_id
                    && !groups.are_grouped(window_id, candidate.id)
                    && is_free_candidate(candidate)
            })
            .into_iter()
            .next();

        Some(SnapPreview {
            window_id,
            bounds,
            followers,
            candidate,
        })
    }

    pub fn follow_bounds(
        &self,
        window_id: WindowId,
        bounds: Rectangle,
        windows: &BTreeMap<WindowId, SnapWindow>,
        groups: &GroupModel,
    ) -> Vec<(WindowId, Rectangle)> {
        groups
            .follow_targets(window_id, bounds.position())
            .into_iter()
            .filter_map(|(member, position)| {
                windows
                    .get(&member)
                    .map(|peer| (member, peer.bounds.with_position(position)))
            })
            .collect()
    }

    /// Windows within the threshold of any source, nearest first, ties broken
    /// by the lower window id.
    fn rank<F>(
        &self,
        sources: &[(WindowId, Rectangle)],
        windows: &BTreeMap<WindowId, SnapWindow>,
        eligible: F,
    ) -> Vec<SnapCandidate>
    where
        F: Fn(&SnapWindow) -> bool,
    {
        let mut candidates: Vec<SnapCandidate> = windows
            .values()
            .filter(|window| !sources.iter().any(|(id, _)| *id == window.id))
            .filter(|window| eligible(window))
            .filter_map(|window| {
                let mut best: Option<SnapCandidate> = None;
                for (anchor, source) in sources {
                    let Some(proximity) = source.edge_proximity(&window.bounds) else {
                        continue;
                    };
                    if proximity.distance > self.threshold {
                        continue;
                    }
                    if best.map_or(true, |b| proximity.distance < b.distance) {
                        best = Some(SnapCandidate {
                            window_id: window.id,
                            anchor: *anchor,
                            distance: proximity.distance,
                            edge: proximity.edge,
                        });
                    }
                }
                best
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.window_id.cmp(&b.window_id))
        });
        candidates
    }
}

fn is_free_candidate(window: &SnapWindow) -> bool {
    window.allow_grouping && window.phase != DragPhase::Resizing
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(entries: &[(u32, Rectangle)]) -> BTreeMap<WindowId, SnapWindow> {
        entries
            .iter()
            .map(|(id, bounds)| {
                (
                    WindowId(*id),
                    SnapWindow {
                        id: WindowId(*id),
                        bounds: *bounds,
                        allow_grouping: true,
                        phase: DragPhase::Idle,
                    },
                )
            })
            .collect()
    }

    fn bounds_of(windows: &BTreeMap<WindowId, SnapWindow>) -> HashMap<WindowId, Rectangle> {
        windows.values().map(|w| (w.id, w.bounds)).collect()
    }

    fn moved(id: u32, from: Rectangle, to: Rectangle) -> DragEnded {
        DragEnded {
            window_id: WindowId(id),
            start_bounds: from,
            final_bounds: to,
            phase: DragPhase::Moving,
        }
    }

    fn square(x: f64, y: f64) -> Rectangle {
        Rectangle::new(x, y, 200.0, 200.0)
    }

    #[test]
    fn adjacent_drop_joins_neighbour() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let windows = snapshot(&[(1, square(200.0, 0.0)), (2, square(205.0, 0.0))]);
        let groups = GroupModel::new();

        let actions = assist.evaluate(&moved(1, square(0.0, 0.0), square(200.0, 0.0)), &windows, &groups);
        assert_eq!(
            actions,
            vec![SnapAction::Join {
                window: WindowId(1),
                target: WindowId(2)
            }]
        );
    }

    #[test]
    fn drop_beyond_threshold_does_nothing() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let windows = snapshot(&[(1, square(0.0, 0.0)), (2, square(211.0, 0.0))]);

        let actions = assist.evaluate(
            &moved(1, square(-50.0, 0.0), square(0.0, 0.0)),
            &windows,
            &GroupModel::new(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn diagonal_neighbours_are_not_candidates() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let windows = snapshot(&[(1, square(0.0, 0.0)), (2, square(205.0, 205.0))]);

        let actions = assist.evaluate(
            &moved(1, square(-50.0, 0.0), square(0.0, 0.0)),
            &windows,
            &GroupModel::new(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn ties_break_by_distance_then_lowest_id() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let w = Rectangle::new(0.0, 0.0, 100.0, 100.0);
        let windows = snapshot(&[
            (1, Rectangle::new(-108.0, 0.0, 100.0, 100.0)),
            (2, Rectangle::new(0.0, 105.0, 100.0, 100.0)),
            (3, Rectangle::new(105.0, 0.0, 100.0, 100.0)),
            (4, w),
        ]);

        let actions = assist.evaluate(&moved(4, w.translate(300.0, 0.0), w), &windows, &GroupModel::new());
        assert_eq!(
            actions,
            vec![SnapAction::Join {
                window: WindowId(4),
                target: WindowId(2)
            }]
        );
    }

    #[test]
    fn dragging_far_away_leaves_group() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let before = snapshot(&[(1, square(0.0, 0.0)), (2, square(200.0, 0.0))]);
        let mut groups = GroupModel::new();
        groups.join(WindowId(1), WindowId(2), &bounds_of(&before));

        let windows = snapshot(&[(1, square(900.0, 600.0)), (2, square(200.0, 0.0))]);
        let actions = assist.evaluate(&moved(1, square(0.0, 0.0), square(900.0, 600.0)), &windows, &groups);
        assert_eq!(actions, vec![SnapAction::Leave { window: WindowId(1) }]);
    }

    #[test]
    fn small_nudge_keeps_group() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let before = snapshot(&[(1, square(0.0, 0.0)), (2, square(200.0, 0.0))]);
        let mut groups = GroupModel::new();
        groups.join(WindowId(1), WindowId(2), &bounds_of(&before));

        let windows = snapshot(&[(1, square(-4.0, 3.0)), (2, square(200.0, 0.0))]);
        let actions = assist.evaluate(&moved(1, square(0.0, 0.0), square(-4.0, 3.0)), &windows, &groups);
        assert!(actions.is_empty());
    }

    #[test]
    fn grouped_window_switches_to_nearer_outsider() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let before = snapshot(&[(1, square(0.0, 0.0)), (2, square(200.0, 0.0)), (3, square(0.0, 500.0))]);
        let mut groups = GroupModel::new();
        groups.join(WindowId(1), WindowId(2), &bounds_of(&before));

        let windows = snapshot(&[(1, square(0.0, 298.0)), (2, square(200.0, 0.0)), (3, square(0.0, 500.0))]);
        let actions = assist.evaluate(&moved(1, square(0.0, 0.0), square(0.0, 298.0)), &windows, &groups);
        assert_eq!(
            actions,
            vec![
                SnapAction::Leave { window: WindowId(1) },
                SnapAction::Join {
                    window: WindowId(1),
                    target: WindowId(3)
                },
            ]
        );
    }

    #[test]
    fn repeated_evaluation_is_idempotent() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let w = Rectangle::new(0.0, 0.0, 100.0, 100.0);
        let windows = snapshot(&[
            (1, Rectangle::new(-108.0, 0.0, 100.0, 100.0)),
            (2, Rectangle::new(0.0, 105.0, 100.0, 100.0)),
            (4, w),
        ]);
        let ended = moved(4, w.translate(300.0, 0.0), w);
        let mut groups = GroupModel::new();

        let first = assist.evaluate(&ended, &windows, &groups);
        assert_eq!(first.len(), 1);
        groups.join(WindowId(4), WindowId(2), &bounds_of(&windows));

        assert!(assist.evaluate(&ended, &windows, &groups).is_empty());
    }

    #[test]
    fn group_mode_relocates_members_by_same_delta() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::GROUP);
        let before = snapshot(&[(1, square(0.0, 0.0)), (2, square(200.0, 0.0))]);
        let mut groups = GroupModel::new();
        groups.join(WindowId(1), WindowId(2), &bounds_of(&before));

        let windows = snapshot(&[(1, square(50.0, 0.0)), (2, square(200.0, 0.0))]);
        let actions = assist.evaluate(&moved(1, square(0.0, 0.0), square(50.0, 0.0)), &windows, &groups);
        assert_eq!(
            actions,
            vec![SnapAction::Relocate {
                window: WindowId(2),
                bounds: square(250.0, 0.0)
            }]
        );
    }

    #[test]
    fn group_mode_absorbs_windows_touched_by_any_member() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN | WindowStateTracking::GROUP);
        let before = snapshot(&[(1, square(0.0, 0.0)), (2, square(200.0, 0.0)), (3, square(455.0, 0.0))]);
        let mut groups = GroupModel::new();
        groups.join(WindowId(1), WindowId(2), &bounds_of(&before));

        let windows = snapshot(&[(1, square(50.0, 0.0)), (2, square(200.0, 0.0)), (3, square(455.0, 0.0))]);
        let actions = assist.evaluate(&moved(1, square(0.0, 0.0), square(50.0, 0.0)), &windows, &groups);
        assert_eq!(
            actions,
            vec![
                SnapAction::Relocate {
                    window: WindowId(2),
                    bounds: square(250.0, 0.0)
                },
                SnapAction::Join {
                    window: WindowId(3),
                    target: WindowId(2)
                },
            ]
        );
    }

    #[test]
    fn resizing_and_ungroupable_windows_are_skipped() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let mut windows = snapshot(&[(1, square(200.0, 0.0)), (2, square(405.0, 0.0)), (3, square(0.0, 0.0))]);
        windows.get_mut(&WindowId(2)).unwrap().phase = DragPhase::Resizing;
        windows.get_mut(&WindowId(3)).unwrap().allow_grouping = false;

        let actions = assist.evaluate(
            &moved(1, square(200.0, 300.0), square(200.0, 0.0)),
            &windows,
            &GroupModel::new(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn disabled_tracking_and_resizes_never_snap() {
        let windows = snapshot(&[(1, square(200.0, 0.0)), (2, square(405.0, 0.0))]);
        let ended = moved(1, square(0.0, 0.0), square(200.0, 0.0));

        let disabled = SnapAssist::new(10.0, WindowStateTracking::empty());
        assert!(disabled.evaluate(&ended, &windows, &GroupModel::new()).is_empty());

        let assist = SnapAssist::new(10.0, WindowStateTracking::MAIN);
        let resize = DragEnded {
            phase: DragPhase::Resizing,
            ..ended
        };
        assert!(assist.evaluate(&resize, &windows, &GroupModel::new()).is_empty());
    }

    #[test]
    fn preview_reports_followers_and_candidate() {
        let assist = SnapAssist::new(10.0, WindowStateTracking::GROUP);
        let before = snapshot(&[(1, square(0.0, 0.0)), (2, square(200.0, 0.0)), (3, square(0.0, 206.0))]);
        let mut groups = GroupModel::new();
        groups.join(WindowId(1), WindowId(2), &bounds_of(&before));

        let preview = assist
            .preview(WindowId(1), square(0.0, 0.0), &before, &groups)
            .unwrap();
        assert_eq!(preview.followers, vec![(WindowId(2), square(200.0, 0.0))]);
        let candidate = preview.candidate.unwrap();
        assert_eq!(candidate.window_id, WindowId(3));
        assert_eq!(candidate.edge, Edge::Bottom);
    }

    #[test]
    fn tracking_mode_parses_and_prints() {
        let both: WindowStateTracking = "Main | group".parse().unwrap();
        assert_eq!(both, WindowStateTracking::MAIN | WindowStateTracking::GROUP);
        assert_eq!(both.to_string(), "main|group");
        assert_eq!("none".parse::<WindowStateTracking>().unwrap(), WindowStateTracking::empty());
        assert_eq!(WindowStateTracking::empty().to_string(), "none");
        assert!("everything".parse::<WindowStateTracking>().is_err());
    }
}
