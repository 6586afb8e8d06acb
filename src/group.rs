use crate::container::WindowId;
use crate::geometry::{Point, Rectangle};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowGroup {
    id: GroupId,
    leader: WindowId,
    members: Vec<WindowId>,
    offsets: HashMap<WindowId, Point>,
}

impl WindowGroup {
    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn leader(&self) -> WindowId {
        self.leader
    }

    pub fn members(&self) -> &[WindowId] {
        &self.members
    }

    pub fn contains(&self, window_id: WindowId) -> bool {
        self.members.contains(&window_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Offset of `window_id`'s origin from the leader's origin, as recorded at
    /// the last membership change.
    pub fn offset(&self, window_id: WindowId) -> Option<Point> {
        self.offsets.get(&window_id).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupChange {
    Unchanged,
    Formed(GroupId),
    Extended(GroupId),
    Left { group: GroupId, window: WindowId },
    Dissolved(GroupId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupModel {
    groups: BTreeMap<GroupId, WindowGroup>,
    membership: HashMap<WindowId, GroupId>,
    next_id: u64,
}

impl GroupModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = &WindowGroup> {
        self.groups.values()
    }

    pub fn group(&self, id: GroupId) -> Option<&WindowGroup> {
        self.groups.get(&id)
    }

    pub fn group_id_of(&self, window_id: WindowId) -> Option<GroupId> {
        self.membership.get(&window_id).copied()
    }

    pub fn group_of(&self, window_id: WindowId) -> Option<&WindowGroup> {
        self.group_id_of(window_id).and_then(|id| self.groups.get(&id))
    }

    pub fn is_grouped(&self, window_id: WindowId) -> bool {
        self.membership.contains_key(&window_id)
    }

    pub fn are_grouped(&self, a: WindowId, b: WindowId) -> bool {
        match (self.group_id_of(a), self.group_id_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn peers_of(&self, window_id: WindowId) -> Vec<WindowId> {
        self.group_of(window_id)
            .map(|group| {
                group
                    .members
                    .iter()
                    .copied()
                    .filter(|id| *id != window_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn join(
        &mut self,
        window_id: WindowId,
        target: WindowId,
        bounds: &HashMap<WindowId, Rectangle>,
    ) -> GroupChange {
        if window_id == target || self.are_grouped(window_id, target) {
            return GroupChange::Unchanged;
        }
        if self.is_grouped(window_id) {
            self.leave(window_id, bounds);
        }

        match self.group_id_of(target) {
            Some(id) => {
                if let Some(group) = self.groups.get_mut(&id) {
                    group.members.push(window_id);
                }
                self.membership.insert(window_id, id);
                self.recompute(id, bounds);
                debug!("Window {} joined {}", window_id, id);
                GroupChange::Extended(id)
            }
            None => {
                let id = self.form(vec![target, window_id], bounds);
                debug!("Windows {} and {} formed {}", target, window_id, id);
                GroupChange::Formed(id)
            }
        }
    }

    /// Removes `window_id` from its group. Groups left with fewer than two
    /// members dissolve; a departing leader hands over to the lowest
    /// remaining window id.
    pub fn leave(&mut self, window_id: WindowId, bounds: &HashMap<WindowId, Rectangle>) -> GroupChange {
        let Some(id) = self.membership.remove(&window_id) else {
            return GroupChange::Unchanged;
        };
        let Some(group) = self.groups.get_mut(&id) else {
            return GroupChange::Unchanged;
        };

        group.members.retain(|member| *member != window_id);
        group.offsets.remove(&window_id);

        if group.members.len() < 2 {
            if let Some(group) = self.groups.remove(&id) {
                for member in group.members {
                    self.membership.remove(&member);
                }
            }
            debug!("{} dissolved after window {} left", id, window_id);
            return GroupChange::Dissolved(id);
        }

        if group.leader == window_id {
            if let Some(next) = group.members.iter().min().copied() {
                debug!("{} leadership passes from {} to {}", id, window_id, next);
                group.leader = next;
            }
        }
        self.recompute(id, bounds);
        GroupChange::Left { group: id, window: window_id }
    }

    pub fn reconcile(&mut self, members: &[WindowId], bounds: &HashMap<WindowId, Rectangle>) -> GroupChange {
        let mut wanted: Vec<WindowId> = Vec::with_capacity(members.len());
        for member in members {
            if !wanted.contains(member) {
                wanted.push(*member);
            }
        }

        if wanted.len() < 2 {
            let mut change = GroupChange::Unchanged;
            for member in wanted {
                let left = self.leave(member, bounds);
                if left != GroupChange::Unchanged {
                    change = left;
                }
            }
            return change;
        }

        if self.matches_exactly(&wanted) {
            return GroupChange::Unchanged;
        }

        let keep = wanted.iter().find_map(|member| self.group_id_of(*member));

        for member in &wanted {
            if let Some(id) = self.group_id_of(*member) {
                if Some(id) != keep {
                    self.leave(*member, bounds);
                }
            }
        }

        if let Some(id) = keep {
            let extras: Vec<WindowId> = self
                .groups
                .get(&id)
                .map(|group| {
                    group
                        .members
                        .iter()
                        .copied()
                        .filter(|member| !wanted.contains(member))
                        .collect()
                })
                .unwrap_or_default();
            for extra in extras {
                self.leave(extra, bounds);
            }
        }

        match keep.filter(|id| self.groups.contains_key(id)) {
            Some(id) => {
                for member in &wanted {
                    if !self.is_grouped(*member) {
                        if let Some(group) = self.groups.get_mut(&id) {
                            group.members.push(*member);
                        }
                        self.membership.insert(*member, id);
                    }
                }
                self.recompute(id, bounds);
                GroupChange::Extended(id)
            }
            None => GroupChange::Formed(self.form(wanted, bounds)),
        }
    }

    pub fn follow_targets(&self, window_id: WindowId, position: Point) -> Vec<(WindowId, Point)> {
        let Some(group) = self.group_of(window_id) else {
            return Vec::new();
        };
        let Some(anchor) = group.offset(window_id) else {
            return Vec::new();
        };

        group
            .members
            .iter()
            .filter(|member| **member != window_id)
            .filter_map(|member| {
                group
                    .offset(*member)
                    .map(|offset| (*member, position + (offset - anchor)))
            })
            .collect()
    }

    fn form(&mut self, members: Vec<WindowId>, bounds: &HashMap<WindowId, Rectangle>) -> GroupId {
        self.next_id += 1;
        let id = GroupId(self.next_id);
        for member in &members {
            self.membership.insert(*member, id);
        }
        self.groups.insert(
            id,
            WindowGroup {
                id,
                leader: members[0],
                members,
                offsets: HashMap::new(),
            },
        );
        self.recompute(id, bounds);
        id
    }

    fn matches_exactly(&self, wanted: &[WindowId]) -> bool {
        let Some(group) = wanted.first().and_then(|first| self.group_of(*first)) else {
            return false;
        };
        group.members.len() == wanted.len() && wanted.iter().all(|member| group.contains(*member))
    }

    fn recompute(&mut self, id: GroupId, bounds: &HashMap<WindowId, Rectangle>) {
        let Some(group) = self.groups.get_mut(&id) else {
            return;
        };
        group.offsets.clear();
        let Some(origin) = bounds.get(&group.leader).map(|b| b.position()) else {
            debug!("No bounds for leader {} of {}, offsets cleared", group.leader, id);
            return;
        };
        for member in &group.members {
            if let Some(rect) = bounds.get(member) {
                group.offsets.insert(*member, rect.position() - origin);
            }
        }
    }
}
