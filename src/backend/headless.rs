use crate::container::{
    Container, ContainerError, ContainerResult, ContainerWindow, WindowEvent, WindowEventKind, WindowHandle,
    WindowId, WindowOptions,
};
use crate::events::EventHub;
use crate::geometry::{Display, Rectangle};
use crate::message_bus::{LocalMessageBus, MessageBus};
use crate::shortcuts::{GlobalShortcutManager, ShortcutRegistry};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct WindowRecord {
    name: String,
    bounds: Rectangle,
    allow_grouping: bool,
    showing: bool,
    state: Option<serde_json::Value>,
    group: Option<u64>,
}

#[derive(Default)]
struct HostState {
    windows: BTreeMap<WindowId, WindowRecord>,
    groups: BTreeMap<u64, Vec<WindowId>>,
    next_window: u32,
    next_group: u64,
    focused: Option<WindowId>,
    failures: HashSet<&'static str>,
}

impl HostState {
    fn record(&self, id: WindowId) -> ContainerResult<&WindowRecord> {
        self.windows.get(&id).ok_or(ContainerError::UnknownWindow(id))
    }

    fn record_mut(&mut self, id: WindowId) -> ContainerResult<&mut WindowRecord> {
        self.windows.get_mut(&id).ok_or(ContainerError::UnknownWindow(id))
    }

    fn take_failure(&mut self, operation: &'static str) -> ContainerResult<()> {
        if self.failures.remove(operation) {
            return Err(ContainerError::BackendOperationFailed {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn detach(&mut self, id: WindowId) -> Vec<WindowEvent> {
        let Some(group) = self.windows.get_mut(&id).and_then(|r| r.group.take()) else {
            return Vec::new();
        };
        let mut left = vec![id];

        if let Some(members) = self.groups.get_mut(&group) {
            members.retain(|member| *member != id);
            if members.len() < 2 {
                let remaining = std::mem::take(members);
                self.groups.remove(&group);
                for member in remaining {
                    if let Some(record) = self.windows.get_mut(&member) {
                        record.group = None;
                    }
                    left.push(member);
                }
            }
        }

        left.into_iter()
            .filter_map(|member| self.event(WindowEventKind::LeftGroup, member))
            .collect()
    }

    fn event(&self, kind: WindowEventKind, id: WindowId) -> Option<WindowEvent> {
        self.windows
            .get(&id)
            .map(|record| WindowEvent::new(kind, id, record.name.clone()).with_bounds(record.bounds))
    }
}

struct Shared {
    events: EventHub,
    state: Mutex<HostState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit_all(&self, events: Vec<WindowEvent>) {
        for event in events {
            debug!("{} for window {}", event.kind.name(), event.window_id);
            self.events.emit(event);
        }
    }
}

pub struct HeadlessContainer {
    shared: Arc<Shared>,
    bus: Arc<LocalMessageBus>,
    shortcuts: Arc<ShortcutRegistry>,
    displays: Vec<Display>,
}

impl HeadlessContainer {
    pub fn new() -> Self {
        let bounds = Rectangle::new(0.0, 0.0, 1920.0, 1080.0);
        let work_area = Rectangle::new(0.0, 25.0, 1920.0, 1055.0);
        Self::with_displays(vec![Display::new("primary", 1.0, bounds, work_area)])
    }

    pub fn with_displays(displays: Vec<Display>) -> Self {
        Self {
            shared: Arc::new(Shared {
                events: EventHub::default(),
                state: Mutex::new(HostState::default()),
            }),
            bus: Arc::new(LocalMessageBus::new()),
            shortcuts: Arc::new(ShortcutRegistry::new()),
            displays,
        }
    }

    /// Makes the next call of `operation` (e.g. `"join_group"`) fail with
    /// `BackendOperationFailed`.
    pub fn fail_next(&self, operation: &'static str) {
        self.shared.lock().failures.insert(operation);
    }

    pub fn end_move(&self, id: WindowId) -> ContainerResult<()> {
        let event = {
            let state = self.shared.lock();
            state.record(id)?;
            state.event(WindowEventKind::MoveEnded, id)
        };
        self.shared.emit_all(event.into_iter().collect());
        Ok(())
    }

    pub fn shortcut_registry(&self) -> Arc<ShortcutRegistry> {
        self.shortcuts.clone()
    }

    pub fn window_count(&self) -> usize {
        self.shared.lock().windows.len()
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.shared.lock().focused
    }

    pub fn shutdown(&self) {
        info!("Headless container shutting down");
        self.shared.events.shutdown();
    }

    fn handle(&self, id: WindowId, record: &WindowRecord) -> WindowHandle {
        Arc::new(HeadlessWindow {
            id,
            name: record.name.clone(),
            allow_grouping: record.allow_grouping,
            shared: self.shared.clone(),
        })
    }
}

impl Default for HeadlessContainer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Container for HeadlessContainer {
    fn host_type(&self) -> &str {
        "headless"
    }

    fn events(&self) -> &EventHub {
        &self.shared.events
    }

    fn message_bus(&self) -> Arc<dyn MessageBus> {
        self.bus.clone()
    }

    fn global_shortcuts(&self) -> Option<Arc<dyn GlobalShortcutManager>> {
        Some(self.shortcuts.clone() as Arc<dyn GlobalShortcutManager>)
    }

    async fn create_window(&self, options: WindowOptions) -> ContainerResult<WindowHandle> {
        let (handle, event) = {
            let mut state = self.shared.lock();
            state.take_failure("create_window")?;
            if !options.bounds.is_valid() {
                return Err(ContainerError::InvalidBounds(options.bounds));
            }
            if options.name.is_empty() || state.windows.values().any(|r| r.name == options.name) {
                return Err(ContainerError::BackendOperationFailed {
                    operation: "create_window",
                    message: format!("window name '{}' is empty or already in use", options.name),
                });
            }

            state.next_window += 1;
            let id = WindowId(state.next_window);
            let record = WindowRecord {
                name: options.name,
                bounds: options.bounds,
                allow_grouping: options.allow_grouping,
                showing: options.show,
                state: None,
                group: None,
            };
            let handle = self.handle(id, &record);
            state.windows.insert(id, record);
            (handle, state.event(WindowEventKind::Created, id))
        };

        self.shared.emit_all(event.into_iter().collect());
        Ok(handle)
    }

    async fn get_window_by_id(&self, id: WindowId) -> ContainerResult<Option<WindowHandle>> {
        let state = self.shared.lock();
        Ok(state.windows.get(&id).map(|record| self.handle(id, record)))
    }

    async fn get_window_by_name(&self, name: &str) -> ContainerResult<Option<WindowHandle>> {
        let state = self.shared.lock();
        Ok(state
            .windows
            .iter()
            .find(|(_, record)| record.name == name)
            .map(|(id, record)| self.handle(*id, record)))
    }

    async fn get_all_windows(&self) -> ContainerResult<Vec<WindowHandle>> {
        let state = self.shared.lock();
        Ok(state
            .windows
            .iter()
            .map(|(id, record)| self.handle(*id, record))
            .collect())
    }

    async fn get_all_displays(&self) -> ContainerResult<Vec<Display>> {
        Ok(self.displays.clone())
    }
}

pub struct HeadlessWindow {
    id: WindowId,
    name: String,
    allow_grouping: bool,
    shared: Arc<Shared>,
}

#[async_trait]
impl ContainerWindow for HeadlessWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn allow_grouping(&self) -> bool {
        self.allow_grouping
    }

    async fn get_bounds(&self) -> ContainerResult<Rectangle> {
        let mut state = self.shared.lock();
        state.take_failure("get_bounds")?;
        Ok(state.record(self.id)?.bounds)
    }

    async fn set_bounds(&self, bounds: Rectangle) -> ContainerResult<()> {
        let events = {
            let mut state = self.shared.lock();
            state.take_failure("set_bounds")?;
            if !bounds.is_valid() {
                return Err(ContainerError::InvalidBounds(bounds));
            }
            let record = state.record_mut(self.id)?;
            let previous = record.bounds;
            record.bounds = bounds;

            let mut events = Vec::new();
            if previous.position() != bounds.position() {
                events.extend(state.event(WindowEventKind::Moved, self.id));
            }
            if !previous.same_size(&bounds) {
                events.extend(state.event(WindowEventKind::Resized, self.id));
            }
            events
        };

        self.shared.emit_all(events);
        Ok(())
    }

    async fn join_group(&self, target: &dyn ContainerWindow) -> ContainerResult<()> {
        let target_id = target.id();
        if !self.allow_grouping {
            return Err(ContainerError::GroupingUnsupported(self.id));
        }
        if !target.allow_grouping() {
            return Err(ContainerError::GroupingUnsupported(target_id));
        }
        if target_id == self.id {
            return Ok(());
        }

        let events = {
            let mut state = self.shared.lock();
            state.take_failure("join_group")?;
            let own = state.record(self.id)?.group;
            let theirs = state.record(target_id)?.group;

            match (own, theirs) {
                (Some(a), Some(b)) if a == b => return Ok(()),
                (Some(_), _) => {
                    return Err(ContainerError::AlreadyGrouped {
                        window: self.id,
                        target: target_id,
                    })
                }
                (None, Some(group)) => {
                    if let Some(members) = state.groups.get_mut(&group) {
                        members.push(self.id);
                    }
                    state.record_mut(self.id)?.group = Some(group);
                    state.event(WindowEventKind::JoinedGroup, self.id).into_iter().collect::<Vec<_>>()
                }
                (None, None) => {
                    state.next_group += 1;
                    let group = state.next_group;
                    state.groups.insert(group, vec![target_id, self.id]);
                    state.record_mut(target_id)?.group = Some(group);
                    state.record_mut(self.id)?.group = Some(group);
                    [target_id, self.id]
                        .into_iter()
                        .filter_map(|id| state.event(WindowEventKind::JoinedGroup, id))
                        .collect()
                }
            }
        };

        self.shared.emit_all(events);
        Ok(())
    }

    async fn leave_group(&self) -> ContainerResult<()> {
        let events = {
            let mut state = self.shared.lock();
            state.take_failure("leave_group")?;
            state.record(self.id)?;
            state.detach(self.id)
        };
        self.shared.emit_all(events);
        Ok(())
    }

    async fn get_group(&self) -> ContainerResult<Vec<WindowId>> {
        let state = self.shared.lock();
        Ok(state
            .record(self.id)?
            .group
            .and_then(|group| state.groups.get(&group))
            .cloned()
            .unwrap_or_default())
    }

    async fn focus(&self) -> ContainerResult<()> {
        let mut state = self.shared.lock();
        state.record(self.id)?;
        state.focused = Some(self.id);
        Ok(())
    }

    async fn show(&self) -> ContainerResult<()> {
        self.shared.lock().record_mut(self.id)?.showing = true;
        Ok(())
    }

    async fn hide(&self) -> ContainerResult<()> {
        self.shared.lock().record_mut(self.id)?.showing = false;
        Ok(())
    }

    async fn is_showing(&self) -> ContainerResult<bool> {
        Ok(self.shared.lock().record(self.id)?.showing)
    }

    async fn close(&self) -> ContainerResult<()> {
        let events = {
            let mut state = self.shared.lock();
            state.take_failure("close")?;
            state.record(self.id)?;
            let mut events = state.detach(self.id);
            events.extend(state.event(WindowEventKind::Closed, self.id));
            state.windows.remove(&self.id);
            if state.focused == Some(self.id) {
                state.focused = None;
            }
            events
        };
        self.shared.emit_all(events);
        Ok(())
    }

    async fn get_state(&self) -> ContainerResult<Option<serde_json::Value>> {
        Ok(self.shared.lock().record(self.id)?.state.clone())
    }

    async fn set_state(&self, value: serde_json::Value) -> ContainerResult<()> {
        self.shared.lock().record_mut(self.id)?.state = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerEvent;
    use assert_matches::assert_matches;
    use tokio::sync::broadcast;

    fn drain(rx: &mut broadcast::Receiver<ContainerEvent>) -> Vec<(WindowEventKind, WindowId)> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ContainerEvent::Window(event) = event {
                seen.push((event.kind, event.window_id));
            }
        }
        seen
    }

    async fn window(container: &HeadlessContainer, name: &str, x: f64) -> WindowHandle {
        container
            .create_window(WindowOptions::new(name, Rectangle::new(x, 0.0, 100.0, 100.0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_and_lookup_windows() {
        let container = HeadlessContainer::new();
        let mut rx = container.events().subscribe();
        let a = window(&container, "a", 0.0).await;

        assert_eq!(drain(&mut rx), vec![(WindowEventKind::Created, a.id())]);
        assert_eq!(container.get_window_by_name("a").await.unwrap().unwrap().id(), a.id());
        assert!(container.get_window_by_id(WindowId(99)).await.unwrap().is_none());
        assert!(container
            .create_window(WindowOptions::new("a", Rectangle::new(0.0, 0.0, 1.0, 1.0)))
            .await
            .is_err());
        assert_matches!(
            container
                .create_window(WindowOptions::new("b", Rectangle::new(0.0, 0.0, -1.0, 1.0)))
                .await
                .err(),
            Some(ContainerError::InvalidBounds(_))
        );
        assert_eq!(container.get_primary_display().await.unwrap().id, "primary");
    }

    #[tokio::test]
    async fn set_bounds_reports_moves_and_resizes() {
        let container = HeadlessContainer::new();
        let a = window(&container, "a", 0.0).await;
        let mut rx = container.events().subscribe();

        a.set_bounds(Rectangle::new(10.0, 0.0, 100.0, 100.0)).await.unwrap();
        a.set_bounds(Rectangle::new(10.0, 0.0, 150.0, 100.0)).await.unwrap();
        a.set_bounds(Rectangle::new(10.0, 0.0, 150.0, 100.0)).await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![(WindowEventKind::Moved, a.id()), (WindowEventKind::Resized, a.id())]
        );
    }

    #[tokio::test]
    async fn grouping_rules_are_enforced() {
        let container = HeadlessContainer::new();
        let a = window(&container, "a", 0.0).await;
        let b = window(&container, "b", 100.0).await;
        let c = window(&container, "c", 200.0).await;
        let d = window(&container, "d", 300.0).await;
        let solo = container
            .create_window(WindowOptions::new("solo", Rectangle::new(0.0, 200.0, 100.0, 100.0)).without_grouping())
            .await
            .unwrap();

        assert_matches!(
            a.join_group(solo.as_ref()).await,
            Err(ContainerError::GroupingUnsupported(id)) if id == solo.id()
        );

        a.join_group(b.as_ref()).await.unwrap();
        c.join_group(d.as_ref()).await.unwrap();
        assert_matches!(
            a.join_group(c.as_ref()).await,
            Err(ContainerError::AlreadyGrouped { window, target }) if window == a.id() && target == c.id()
        );

        a.join_group(b.as_ref()).await.unwrap();
        assert_eq!(a.get_group().await.unwrap(), vec![b.id(), a.id()]);
    }

    #[tokio::test]
    async fn leaving_dissolves_two_member_groups() {
        let container = HeadlessContainer::new();
        let a = window(&container, "a", 0.0).await;
        let b = window(&container, "b", 100.0).await;
        a.join_group(b.as_ref()).await.unwrap();
        let mut rx = container.events().subscribe();

        a.leave_group().await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![(WindowEventKind::LeftGroup, a.id()), (WindowEventKind::LeftGroup, b.id())]
        );
        assert!(b.get_group().await.unwrap().is_empty());

        a.leave_group().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn closing_removes_window_and_its_membership() {
        let container = HeadlessContainer::new();
        let a = window(&container, "a", 0.0).await;
        let b = window(&container, "b", 100.0).await;
        let c = window(&container, "c", 200.0).await;
        b.join_group(a.as_ref()).await.unwrap();
        c.join_group(a.as_ref()).await.unwrap();
        let mut rx = container.events().subscribe();

        a.close().await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![(WindowEventKind::LeftGroup, a.id()), (WindowEventKind::Closed, a.id())]
        );
        assert_eq!(b.get_group().await.unwrap(), vec![b.id(), c.id()]);
        assert_eq!(container.window_count(), 2);
        assert_matches!(a.get_bounds().await, Err(ContainerError::UnknownWindow(_)));
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let container = HeadlessContainer::new();
        let a = window(&container, "a", 0.0).await;
        let b = window(&container, "b", 100.0).await;

        container.fail_next("join_group");
        assert_matches!(
            a.join_group(b.as_ref()).await,
            Err(ContainerError::BackendOperationFailed { operation: "join_group", .. })
        );
        assert!(a.get_group().await.unwrap().is_empty());
        a.join_group(b.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn state_and_visibility_are_stored() {
        let container = HeadlessContainer::new();
        let a = window(&container, "a", 0.0).await;

        assert_eq!(a.get_state().await.unwrap(), None);
        a.set_state(serde_json::json!({"tab": 2})).await.unwrap();
        assert_eq!(a.get_state().await.unwrap(), Some(serde_json::json!({"tab": 2})));

        a.hide().await.unwrap();
        assert!(!a.is_showing().await.unwrap());
        a.focus().await.unwrap();
        assert_eq!(container.focused(), Some(a.id()));
    }
}
