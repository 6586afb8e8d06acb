use crate::config::{Config, SnapTrigger};
use crate::container::{
    Container, ContainerError, ContainerEvent, ContainerResult, WindowEvent, WindowEventKind, WindowHandle,
    WindowId, WindowOptions,
};
use crate::geometry::Rectangle;
use crate::group::GroupModel;
use crate::layout::LayoutManager;
use crate::message_bus::{MessageBus, PublishOptions};
use crate::shortcuts::{self, KeyCombination};
use crate::snap::{SnapAction, SnapAssist, SnapWindow};
use crate::tracking::{DragEnded, DragPhase, TrackOutcome, WindowStateTracker};
use crate::Result;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};

pub const PREVIEW_TOPIC: &str = "snap-assist.preview";
pub const GROUPS_TOPIC: &str = "snap-assist.groups";

#[derive(Debug, Clone)]
pub enum Command {
    SaveLayout(Option<String>),
    RestoreLayout(Option<String>),
    UngroupAll,
    ToggleSnapAssist,
    GetStatus,
    ListWindows,
    ListGroups,
    CreateWindow(WindowOptions),
    MoveWindow(WindowId, Rectangle),
    JoinGroup(WindowId, WindowId),
    LeaveGroup(WindowId),
    CloseWindow(WindowId),
    ReloadConfig,
    Quit,
}

type Reply = std::result::Result<Value, String>;

pub struct Request {
    command: Command,
    reply: Option<oneshot::Sender<Reply>>,
}

#[derive(Clone)]
pub struct WindowManagerHandle {
    sender: mpsc::Sender<Request>,
}

impl WindowManagerHandle {
    pub async fn execute(&self, command: Command) -> Result<Value> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Request {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| anyhow::anyhow!("Window manager is not running"))?;

        response
            .await
            .map_err(|_| anyhow::anyhow!("Window manager dropped the request"))?
            .map_err(|message| anyhow::anyhow!(message))
    }

    pub async fn send(&self, command: Command) -> Result<()> {
        self.sender
            .send(Request { command, reply: None })
            .await
            .map_err(|_| anyhow::anyhow!("Window manager is not running"))
    }
}

pub struct WindowManager {
    container: Arc<dyn Container>,
    config: Config,
    config_path: Option<PathBuf>,

    windows: HashMap<WindowId, WindowHandle>,
    tracker: WindowStateTracker,
    groups: GroupModel,
    snap: SnapAssist,
    paused: bool,

    layouts: LayoutManager,
    bus: Arc<dyn MessageBus>,
    bindings: HashMap<KeyCombination, Command>,

    event_rx: broadcast::Receiver<ContainerEvent>,
    shortcut_rx: Option<broadcast::Receiver<KeyCombination>>,
    command_rx: mpsc::Receiver<Request>,
    command_tx: mpsc::Sender<Request>,
}

impl WindowManager {
    /// Subscribes to `container` right away so no event between construction
    /// and [`run`](Self::run) is lost.
    pub fn new(container: Arc<dyn Container>, config: Config) -> Self {
        let (command_tx, command_rx) = mpsc::channel(1000);
        let event_rx = container.events().subscribe();
        let shortcut_rx = container.global_shortcuts().map(|shortcuts| shortcuts.activations());
        let bus = container.message_bus();

        Self {
            tracker: WindowStateTracker::new(config.snap.quiescence()),
            snap: SnapAssist::new(config.snap.threshold, config.snap.window_state_tracking),
            layouts: LayoutManager::from_config(&config.layout),
            bindings: shortcuts::parse_bindings(&config.shortcuts.bindings),
            container,
            config,
            config_path: None,
            windows: HashMap::new(),
            groups: GroupModel::new(),
            paused: false,
            bus,
            event_rx,
            shortcut_rx,
            command_rx,
            command_tx,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn handle(&self) -> WindowManagerHandle {
        WindowManagerHandle {
            sender: self.command_tx.clone(),
        }
    }

    pub fn groups(&self) -> &GroupModel {
        &self.groups
    }

    pub fn tracker(&self) -> &WindowStateTracker {
        &self.tracker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_snap_enabled(&self) -> bool {
        !self.paused && self.snap.is_enabled()
    }

    pub async fn attach(&mut self) -> Result<()> {
        info!(
            "🪟 Attaching to {} container (tracking: {}, threshold: {}px)",
            self.container.host_type(),
            self.snap.tracking(),
            self.snap.threshold()
        );
        self.refresh_windows().await?;
        self.register_shortcuts().await;
        Ok(())
    }

    pub async fn run(&mut self) -> Result<()> {
        self.attach().await?;
        info!("Starting window manager event loop");

        loop {
            let deadline = self.tracker.next_deadline();
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                received = self.event_rx.recv() => match received {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            error!("Error handling container event: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event stream lagged by {} events, resynchronising", skipped);
                        if let Err(e) = self.refresh_windows().await {
                            error!("Error refreshing windows: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Container event hub closed, stopping");
                        break;
                    }
                },
                Some(request) = self.command_rx.recv() => {
                    if !self.handle_request(request).await {
                        break;
                    }
                }
                activation = next_activation(&mut self.shortcut_rx) => match activation {
                    Some(combination) => self.handle_shortcut(combination).await,
                    None => {
                        debug!("Shortcut activations closed");
                        self.shortcut_rx = None;
                    }
                },
                _ = sleep_until(wake_at), if deadline.is_some() => {
                    self.flush_quiescent(Instant::now()).await;
                }
            }
        }

        if let Some(shortcuts) = self.container.global_shortcuts() {
            if let Err(e) = shortcuts.unregister_all().await {
                warn!("Failed to unregister shortcuts: {}", e);
            }
        }
        info!("Window manager stopped");
        Ok(())
    }

    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => {
                    if let Err(e) = self.handle_event(event).await {
                        error!("Error handling container event: {}", e);
                    }
                    handled += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged by {} events, resynchronising", skipped);
                    if let Err(e) = self.refresh_windows().await {
                        error!("Error refreshing windows: {}", e);
                    }
                }
                Err(_) => return handled,
            }
        }
    }

    pub async fn flush_quiescent(&mut self, now: Instant) -> usize {
        let ended = self.tracker.flush_quiescent(now);
        let count = ended.len();
        for drag in ended {
            self.on_drag_ended(drag).await;
        }
        count
    }

    pub async fn handle_event(&mut self, event: ContainerEvent) -> Result<()> {
        match event {
            ContainerEvent::Window(event) => self.handle_window_event(event).await,
            ContainerEvent::LayoutSaved { name } => {
                debug!("Layout '{}' saved", name);
                Ok(())
            }
            ContainerEvent::LayoutLoaded { name } => {
                debug!("Layout '{}' loaded", name);
                Ok(())
            }
        }
    }

    async fn handle_window_event(&mut self, event: WindowEvent) -> Result<()> {
        let id = event.window_id;
        debug!("Handling {} for window {} ({})", event.kind.name(), id, event.window_name);

        match event.kind {
            WindowEventKind::Created => {
                if !self.windows.contains_key(&id) {
                    if let Some(handle) = self.container.get_window_by_id(id).await? {
                        let bounds = match event.bounds {
                            Some(bounds) => bounds,
                            None => handle.get_bounds().await?,
                        };
                        self.track(handle, bounds);
                    }
                }
            }
            WindowEventKind::Closed => {
                self.forget(id).await;
            }
            WindowEventKind::Moved | WindowEventKind::Resized => {
                let Some(bounds) = self.event_bounds(&event).await else {
                    return Ok(());
                };
                let now = Instant::now();
                let outcome = if event.kind == WindowEventKind::Moved {
                    self.tracker.on_moved(id, bounds, now)
                } else {
                    self.tracker.on_resized(id, bounds, now)
                };

                if outcome == TrackOutcome::Active(DragPhase::Moving)
                    && self.config.snap.trigger == SnapTrigger::Continuous
                {
                    self.live_feedback(id, bounds).await;
                }
            }
            WindowEventKind::MoveEnded => {
                if let Some(ended) = self.tracker.on_move_ended(id, event.bounds, Instant::now()) {
                    self.on_drag_ended(ended).await;
                }
            }
            WindowEventKind::JoinedGroup | WindowEventKind::LeftGroup => {
                self.sync_membership(id).await;
            }
        }

        Ok(())
    }

    async fn event_bounds(&self, event: &WindowEvent) -> Option<Rectangle> {
        if let Some(bounds) = event.bounds {
            return Some(bounds);
        }
        let handle = self.windows.get(&event.window_id)?;
        match handle.get_bounds().await {
            Ok(bounds) => Some(bounds),
            Err(e) => {
                debug!("Could not read bounds of window {}: {}", event.window_id, e);
                None
            }
        }
    }

    fn track(&mut self, handle: WindowHandle, bounds: Rectangle) {
        let id = handle.id();
        info!("➕ Tracking window {} '{}' at {}", id, handle.name(), bounds);
        self.tracker.register(id, bounds);
        self.windows.insert(id, handle);
    }

    async fn forget(&mut self, id: WindowId) {
        if self.windows.remove(&id).is_none() {
            return;
        }
        if self.tracker.unregister(id).is_some() {
            debug!("Window {} closed mid-gesture", id);
        }
        let bounds = self.bounds_map();
        let before = self.groups.clone();
        self.groups.leave(id, &bounds);
        info!("➖ Window {} closed", id);
        if self.groups != before {
            self.publish_groups().await;
        }
    }

    pub async fn refresh_windows(&mut self) -> Result<()> {
        let handles = self.container.get_all_windows().await?;
        let current: Vec<WindowId> = handles.iter().map(|h| h.id()).collect();

        let stale: Vec<WindowId> = self
            .windows
            .keys()
            .copied()
            .filter(|id| !current.contains(id))
            .collect();
        for id in stale {
            self.forget(id).await;
        }

        for handle in handles {
            let bounds = match handle.get_bounds().await {
                Ok(bounds) => bounds,
                Err(e) => {
                    warn!("Skipping window {} during refresh: {}", handle.id(), e);
                    self.forget(handle.id()).await;
                    continue;
                }
            };
            if self.windows.contains_key(&handle.id()) {
                self.tracker.update_bounds(handle.id(), bounds);
            } else {
                self.track(handle, bounds);
            }
        }

        let mut ids: Vec<WindowId> = self.windows.keys().copied().collect();
        ids.sort();
        for id in ids {
            self.sync_membership(id).await;
        }
        Ok(())
    }

    async fn sync_membership(&mut self, id: WindowId) {
        let bounds = self.bounds_map();
        let before = self.groups.clone();

        match self.windows.get(&id).cloned() {
            Some(handle) => match handle.get_group().await {
                Ok(members) if members.is_empty() => {
                    self.groups.leave(id, &bounds);
                }
                Ok(members) => {
                    self.groups.reconcile(&members, &bounds);
                }
                Err(e) => {
                    warn!("Could not read group of window {}: {}", id, e);
                    self.groups.leave(id, &bounds);
                }
            },
            None => {
                self.groups.leave(id, &bounds);
            }
        }

        if self.groups != before {
            debug!("Group model reconciled from backend for window {}", id);
            self.publish_groups().await;
        }
    }

    async fn on_drag_ended(&mut self, ended: DragEnded) {
        info!(
            "🛑 Drag ended for window {}: {} -> {}",
            ended.window_id, ended.start_bounds, ended.final_bounds
        );
        if self.paused {
            debug!("Snap assist paused, ignoring drag of window {}", ended.window_id);
            return;
        }

        let actions = self.snap.evaluate(&ended, &self.snapshot(), &self.groups);
        if !actions.is_empty() {
            self.apply(actions).await;
        }
    }

    async fn live_feedback(&mut self, id: WindowId, bounds: Rectangle) {
        if self.paused {
            return;
        }
        let Some(preview) = self.snap.preview(id, bounds, &self.snapshot(), &self.groups) else {
            return;
        };

        for (member, target) in &preview.followers {
            if self.tracker.bounds(*member) == Some(*target) {
                continue;
            }
            let action = SnapAction::Relocate {
                window: *member,
                bounds: *target,
            };
            if let Err(e) = self.apply_action(action).await {
                warn!("Could not move group member {} along: {}", member, e);
            }
        }

        match serde_json::to_value(&preview) {
            Ok(payload) => self.publish(PREVIEW_TOPIC, payload).await,
            Err(e) => warn!("Failed to encode snap preview: {}", e),
        }
    }

    pub async fn apply(&mut self, actions: Vec<SnapAction>) -> usize {
        let mut applied = 0;
        for action in actions {
            match self.apply_action(action).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!("⚠️  Backend refused {:?}: {}", action, e);
                    break;
                }
            }
        }
        applied
    }

    /// Issues one action to the backend. Group changes are recorded in the
    /// model up front and rolled back if the backend refuses them.
    async fn apply_action(&mut self, action: SnapAction) -> ContainerResult<()> {
        match action {
            SnapAction::Relocate { window, bounds } => {
                let handle = self.window(window)?;
                self.tracker.expect_programmatic(window, bounds);
                handle.set_bounds(bounds).await?;
                self.tracker.update_bounds(window, bounds);
                debug!("Moved window {} along with its group to {}", window, bounds);
                Ok(())
            }
            SnapAction::Join { window, target } => {
                let handle = self.window(window)?;
                let target_handle = self.window(target)?;
                if !handle.allow_grouping() {
                    return Err(ContainerError::GroupingUnsupported(window));
                }
                if !target_handle.allow_grouping() {
                    return Err(ContainerError::GroupingUnsupported(target));
                }

                let checkpoint = self.groups.clone();
                let bounds = self.bounds_map();
                self.groups.join(window, target, &bounds);
                if let Err(e) = handle.join_group(&*target_handle).await {
                    self.groups = checkpoint;
                    return Err(e);
                }
                info!("🧲 Window {} joined window {}", window, target);
                self.publish_groups().await;
                Ok(())
            }
            SnapAction::Leave { window } => {
                let handle = self.window(window)?;
                let checkpoint = self.groups.clone();
                let bounds = self.bounds_map();
                self.groups.leave(window, &bounds);
                if let Err(e) = handle.leave_group().await {
                    self.groups = checkpoint;
                    return Err(e);
                }
                info!("✂️  Window {} left its group", window);
                self.publish_groups().await;
                Ok(())
            }
        }
    }

    fn window(&self, id: WindowId) -> ContainerResult<WindowHandle> {
        self.windows
            .get(&id)
            .cloned()
            .ok_or(ContainerError::UnknownWindow(id))
    }

    fn bounds_map(&self) -> HashMap<WindowId, Rectangle> {
        self.tracker.tracked_windows().collect()
    }

    fn snapshot(&self) -> BTreeMap<WindowId, SnapWindow> {
        self.tracker
            .tracked_windows()
            .filter_map(|(id, bounds)| {
                self.windows.get(&id).map(|handle| {
                    (
                        id,
                        SnapWindow {
                            id,
                            bounds,
                            allow_grouping: handle.allow_grouping(),
                            phase: self.tracker.phase(id),
                        },
                    )
                })
            })
            .collect()
    }

    fn groups_json(&self) -> Value {
        Value::Array(
            self.groups
                .groups()
                .map(|group| {
                    json!({
                        "id": group.id().to_string(),
                        "leader": group.leader(),
                        "members": group.members(),
                    })
                })
                .collect(),
        )
    }

    async fn publish_groups(&self) {
        self.publish(GROUPS_TOPIC, self.groups_json()).await;
    }

    async fn publish(&self, topic: &str, payload: Value) {
        if let Err(e) = self.bus.publish(topic, payload, PublishOptions::default()).await {
            debug!("Publishing on '{}' failed: {}", topic, e);
        }
    }

    async fn register_shortcuts(&mut self) {
        let Some(shortcuts) = self.container.global_shortcuts() else {
            debug!("Container has no global shortcut support");
            return;
        };
        for combination in self.bindings.keys() {
            let accelerator = combination.to_string();
            match shortcuts.register(&accelerator).await {
                Ok(()) => debug!("Registered shortcut {}", accelerator),
                Err(e) => warn!("Failed to register shortcut {}: {}", accelerator, e),
            }
        }
    }

    async fn handle_shortcut(&mut self, combination: KeyCombination) {
        let Some(command) = self.bindings.get(&combination).cloned() else {
            debug!("No binding for shortcut {}", combination);
            return;
        };
        info!("⌨️  Shortcut {} -> {:?}", combination, command);
        if let Err(e) = self.execute(command).await {
            error!("Error handling shortcut {}: {}", combination, e);
        }
    }

    async fn handle_request(&mut self, request: Request) -> bool {
        let quit = matches!(request.command, Command::Quit);
        let result = self.execute(request.command).await;

        if let Err(e) = &result {
            error!("Error handling command: {}", e);
        }
        if let Some(reply) = request.reply {
            let _ = reply.send(result.map_err(|e| e.to_string()));
        }
        !quit
    }

    pub async fn execute(&mut self, command: Command) -> Result<Value> {
        debug!("Handling command: {:?}", command);

        match command {
            Command::SaveLayout(name) => {
                let name = name.unwrap_or_else(|| self.config.layout.default_name.clone());
                let layout = self.layouts.save_current(self.container.as_ref(), &name).await?;
                Ok(json!({ "name": layout.name, "windows": layout.entries.len() }))
            }
            Command::RestoreLayout(name) => {
                let name = name.unwrap_or_else(|| self.config.layout.default_name.clone());
                let layout = self.layouts.load(&name)?;

                // Restored bounds are authoritative: their echoes must not
                // start gestures that would re-run snapping.
                for entry in &layout.entries {
                    if let Some(id) = self.window_named(&entry.window_name) {
                        self.tracker.expect_programmatic(id, entry.bounds);
                    }
                }
                let report = self.layouts.restore(self.container.as_ref(), &layout).await?;
                self.refresh_windows().await?;
                Ok(serde_json::to_value(report)?)
            }
            Command::UngroupAll => {
                let grouped: Vec<WindowId> = self
                    .groups
                    .groups()
                    .flat_map(|group| group.members().to_vec())
                    .collect();
                let actions = grouped
                    .iter()
                    .map(|window| SnapAction::Leave { window: *window })
                    .collect();
                let applied = self.apply(actions).await;
                info!("Ungrouped {} windows", applied);
                Ok(json!({ "ungrouped": applied }))
            }
            Command::ToggleSnapAssist => {
                self.paused = !self.paused;
                info!("Snap assist {}", if self.paused { "paused" } else { "resumed" });
                Ok(json!({ "enabled": !self.paused }))
            }
            Command::GetStatus => Ok(json!({
                "host": self.container.host_type(),
                "windows": self.windows.len(),
                "groups": self.groups.len(),
                "dragging": self.tracker.active_sessions(),
                "enabled": self.is_snap_enabled(),
                "tracking": self.snap.tracking().to_string(),
                "threshold": self.snap.threshold(),
                "trigger": self.config.snap.trigger,
            })),
            Command::ListWindows => {
                let mut ids: Vec<WindowId> = self.windows.keys().copied().collect();
                ids.sort();
                let windows: Vec<Value> = ids
                    .into_iter()
                    .filter_map(|id| {
                        let handle = self.windows.get(&id)?;
                        Some(json!({
                            "id": id,
                            "name": handle.name(),
                            "bounds": self.tracker.bounds(id),
                            "allowGrouping": handle.allow_grouping(),
                            "group": self.groups.group_id_of(id).map(|g| g.to_string()),
                        }))
                    })
                    .collect();
                Ok(Value::Array(windows))
            }
            Command::ListGroups => Ok(self.groups_json()),
            Command::CreateWindow(options) => {
                let handle = self.container.create_window(options).await?;
                let bounds = handle.get_bounds().await?;
                let id = handle.id();
                self.track(handle, bounds);
                Ok(json!({ "id": id }))
            }
            Command::MoveWindow(id, bounds) => {
                // An outside move behaves like a user drag and is evaluated
                // once it goes quiet.
                self.window(id)?.set_bounds(bounds).await?;
                Ok(json!({ "id": id, "bounds": bounds }))
            }
            Command::JoinGroup(window, target) => {
                self.apply_action(SnapAction::Join { window, target }).await?;
                Ok(json!({ "group": self.groups.group_id_of(window).map(|g| g.to_string()) }))
            }
            Command::LeaveGroup(window) => {
                self.apply_action(SnapAction::Leave { window }).await?;
                Ok(json!({ "id": window }))
            }
            Command::CloseWindow(id) => {
                self.window(id)?.close().await?;
                self.forget(id).await;
                Ok(json!({ "id": id }))
            }
            Command::ReloadConfig => {
                let Some(path) = self.config_path.clone() else {
                    anyhow::bail!("No configuration file to reload from");
                };
                self.config.reload(&path)?;
                self.apply_config().await;
                info!("🔄 Configuration reloaded from {:?}", path);
                Ok(json!({ "reloaded": path }))
            }
            Command::Quit => {
                info!("Shutting down window manager");
                Ok(json!({ "stopping": true }))
            }
        }
    }

    async fn apply_config(&mut self) {
        self.snap = SnapAssist::new(self.config.snap.threshold, self.config.snap.window_state_tracking);
        self.tracker.set_quiescence(self.config.snap.quiescence());
        self.layouts = LayoutManager::from_config(&self.config.layout);
        self.bindings = shortcuts::parse_bindings(&self.config.shortcuts.bindings);

        if let Some(shortcuts) = self.container.global_shortcuts() {
            if let Err(e) = shortcuts.unregister_all().await {
                warn!("Failed to clear shortcuts: {}", e);
            }
        }
        self.register_shortcuts().await;
    }

    fn window_named(&self, name: &str) -> Option<WindowId> {
        self.windows
            .iter()
            .find(|(_, handle)| handle.name() == name)
            .map(|(id, _)| *id)
    }
}

async fn next_activation(rx: &mut Option<broadcast::Receiver<KeyCombination>>) -> Option<KeyCombination> {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(combination) => return Some(combination),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {} shortcut activations", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
