use crate::config::LayoutConfig;
use crate::container::{Container, ContainerEvent, ContainerResult, WindowHandle, WindowId, WindowOptions};
use crate::geometry::Rectangle;
use crate::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutEntry {
    pub window_name: String,
    pub bounds: Rectangle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub name: String,
    pub saved_at: DateTime<Utc>,
    pub entries: Vec<LayoutEntry>,
}

impl Layout {
    pub fn entry(&self, window_name: &str) -> Option<&LayoutEntry> {
        self.entries.iter().find(|e| e.window_name == window_name)
    }

    pub fn groups(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in &self.entries {
            if let Some(group_id) = &entry.group_id {
                groups
                    .entry(group_id.clone())
                    .or_default()
                    .push(entry.window_name.clone());
            }
        }
        groups
    }
}

/// Outcome of a restore. A restore never fails as a whole; entries that
/// cannot be applied are listed in `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub created: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub groups: usize,
}

pub struct LayoutManager {
    directory: PathBuf,
}

impl LayoutManager {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn from_config(config: &LayoutConfig) -> Self {
        Self::new(config.directory())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub async fn capture(&self, container: &dyn Container, name: &str) -> ContainerResult<Layout> {
        let mut windows = container.get_all_windows().await?;
        windows.sort_by_key(|w| w.id());

        let mut group_ids: HashMap<Vec<WindowId>, String> = HashMap::new();
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(windows.len());

        for window in &windows {
            let window_name = window.name();
            if !seen.insert(window_name.clone()) {
                warn!("Duplicate window name '{}' left out of layout '{}'", window_name, name);
                continue;
            }

            let bounds = window.get_bounds().await?;
            let mut members = window.get_group().await?;
            members.sort();
            let group_id = if members.len() > 1 {
                let next = group_ids.len() + 1;
                Some(
                    group_ids
                        .entry(members)
                        .or_insert_with(|| format!("group-{}", next))
                        .clone(),
                )
            } else {
                None
            };

            entries.push(LayoutEntry {
                window_name,
                bounds,
                group_id,
                state: window.get_state().await?,
            });
        }

        debug!(
            "Captured layout '{}' with {} windows across {} groups",
            name,
            entries.len(),
            group_ids.len()
        );

        Ok(Layout {
            name: name.to_string(),
            saved_at: Utc::now(),
            entries,
        })
    }

    pub async fn restore(&self, container: &dyn Container, layout: &Layout) -> ContainerResult<RestoreReport> {
        let mut report = RestoreReport::default();
        let mut handles: Vec<(WindowHandle, Option<String>)> = Vec::new();
        let mut seen = HashSet::new();

        for entry in &layout.entries {
            let name = &entry.window_name;
            if !seen.insert(name.clone()) {
                report.skipped.push((name.clone(), "duplicate window name".to_string()));
                continue;
            }
            if !entry.bounds.is_valid() {
                warn!("Skipping '{}' in layout '{}': invalid bounds {}", name, layout.name, entry.bounds);
                report.skipped.push((name.clone(), format!("invalid bounds {}", entry.bounds)));
                continue;
            }

            match self.restore_entry(container, entry, &mut report).await {
                Ok(handle) => {
                    report.restored.push(name.clone());
                    handles.push((handle, entry.group_id.clone()));
                }
                Err(e) => {
                    warn!("Skipping '{}' in layout '{}': {}", name, layout.name, e);
                    report.skipped.push((name.clone(), e.to_string()));
                }
            }
        }

        self.restore_groups(&handles, &mut report).await;

        container.events().emit(ContainerEvent::LayoutLoaded {
            name: layout.name.clone(),
        });
        info!(
            "🗂️  Restored layout '{}': {} windows, {} groups, {} skipped",
            layout.name,
            report.restored.len(),
            report.groups,
            report.skipped.len()
        );
        Ok(report)
    }

    async fn restore_entry(
        &self,
        container: &dyn Container,
        entry: &LayoutEntry,
        report: &mut RestoreReport,
    ) -> ContainerResult<WindowHandle> {
        let handle = match container.get_window_by_name(&entry.window_name).await? {
            Some(handle) => {
                handle.set_bounds(entry.bounds).await?;
                handle
            }
            None => {
                let handle = container
                    .create_window(WindowOptions::new(entry.window_name.clone(), entry.bounds))
                    .await?;
                report.created.push(entry.window_name.clone());
                handle
            }
        };

        if let Some(state) = &entry.state {
            handle.set_state(state.clone()).await?;
        }
        Ok(handle)
    }

    async fn restore_groups(&self, handles: &[(WindowHandle, Option<String>)], report: &mut RestoreReport) {
        let mut wanted: BTreeMap<&str, Vec<WindowHandle>> = BTreeMap::new();
        for (handle, group_id) in handles {
            if let Some(group_id) = group_id {
                wanted.entry(group_id.as_str()).or_default().push(handle.clone());
            }
        }

        let mut current = HashMap::new();
        for (handle, _) in handles {
            match handle.get_group().await {
                Ok(mut members) => {
                    members.sort();
                    current.insert(handle.id(), members);
                }
                Err(e) => warn!("Could not read group of '{}': {}", handle.name(), e),
            }
        }

        // Windows whose backend group differs from the recorded one start over.
        for (handle, group_id) in handles {
            let mut target: Vec<WindowId> = group_id
                .as_deref()
                .and_then(|id| wanted.get(id))
                .map(|members| members.iter().map(|h| h.id()).collect())
                .unwrap_or_default();
            target.sort();

            let actual = current.get(&handle.id()).cloned().unwrap_or_default();
            if !actual.is_empty() && actual != target {
                if let Err(e) = handle.leave_group().await {
                    warn!("Could not ungroup '{}': {}", handle.name(), e);
                }
            }
        }

        for (group_id, members) in &wanted {
            let Some((leader, rest)) = members.split_first() else {
                continue;
            };
            if rest.is_empty() {
                debug!("Group '{}' has a single restored member, left ungrouped", group_id);
                continue;
            }

            let mut joined = 0;
            for member in rest {
                let grouped = member
                    .get_group()
                    .await
                    .map(|g| g.contains(&leader.id()))
                    .unwrap_or(false);
                if grouped {
                    joined += 1;
                    continue;
                }
                match member.join_group(&**leader).await {
                    Ok(()) => joined += 1,
                    Err(e) => {
                        warn!("Could not regroup '{}' into '{}': {}", member.name(), group_id, e);
                        report
                            .skipped
                            .push((member.name(), format!("join {} failed: {}", group_id, e)));
                    }
                }
            }
            if joined > 0 {
                report.groups += 1;
            }
        }
    }

    pub async fn save_current(&self, container: &dyn Container, name: &str) -> Result<Layout> {
        let layout = self.capture(container, name).await?;
        self.save(&layout)?;
        container.events().emit(ContainerEvent::LayoutSaved {
            name: name.to_string(),
        });
        Ok(layout)
    }

    pub async fn restore_named(&self, container: &dyn Container, name: &str) -> Result<RestoreReport> {
        let layout = self.load(name)?;
        Ok(self.restore(container, &layout).await?)
    }

    pub fn save(&self, layout: &Layout) -> Result<PathBuf> {
        let path = self.path_for(&layout.name)?;
        std::fs::create_dir_all(&self.directory)?;
        let content = serde_json::to_string_pretty(layout)?;
        std::fs::write(&path, content)?;
        info!("💾 Saved layout '{}' to {:?}", layout.name, path);
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Layout> {
        let path = self.path_for(name)?;
        if !path.exists() {
            anyhow::bail!("Layout '{}' not found in {:?}", name, self.directory);
        }
        let content = std::fs::read_to_string(&path)?;
        let layout: Layout = serde_json::from_str(&content)?;
        Ok(layout)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        std::fs::remove_file(&path)?;
        Ok(())
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            anyhow::bail!("Invalid layout name: {:?}", name);
        }
        Ok(self.directory.join(format!("{}.json", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessContainer;
    use serde_json::json;
    use tempfile::tempdir;

    async fn two_grouped(container: &HeadlessContainer) -> (WindowHandle, WindowHandle) {
        let a = container
            .create_window(WindowOptions::new("chart", Rectangle::new(0.0, 0.0, 200.0, 200.0)))
            .await
            .unwrap();
        let b = container
            .create_window(WindowOptions::new("news", Rectangle::new(200.0, 0.0, 200.0, 200.0)))
            .await
            .unwrap();
        a.join_group(b.as_ref()).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn capture_records_groups_and_state() {
        let container = HeadlessContainer::new();
        let (a, _b) = two_grouped(&container).await;
        a.set_state(json!({"symbol": "AAPL"})).await.unwrap();
        container
            .create_window(WindowOptions::new("blotter", Rectangle::new(0.0, 400.0, 300.0, 200.0)))
            .await
            .unwrap();

        let manager = LayoutManager::new(tempdir().unwrap().path());
        let layout = manager.capture(&container, "work").await.unwrap();

        assert_eq!(layout.entries.len(), 3);
        let chart = layout.entry("chart").unwrap();
        assert_eq!(chart.group_id.as_deref(), Some("group-1"));
        assert_eq!(chart.state, Some(json!({"symbol": "AAPL"})));
        assert_eq!(layout.entry("news").unwrap().group_id.as_deref(), Some("group-1"));
        assert_eq!(layout.entry("blotter").unwrap().group_id, None);
        assert_eq!(layout.groups().len(), 1);
    }

    #[tokio::test]
    async fn save_then_restore_is_identity() {
        let dir = tempdir().unwrap();
        let container = HeadlessContainer::new();
        two_grouped(&container).await;

        let manager = LayoutManager::new(dir.path());
        let saved = manager.save_current(&container, "work").await.unwrap();
        let report = manager.restore_named(&container, "work").await.unwrap();

        assert!(report.skipped.is_empty());
        assert!(report.created.is_empty());
        let again = manager.capture(&container, "work").await.unwrap();
        assert_eq!(again.entries, saved.entries);
    }

    #[tokio::test]
    async fn restore_recreates_missing_windows_and_skips_bad_entries() {
        let container = HeadlessContainer::new();
        let manager = LayoutManager::new(tempdir().unwrap().path());
        let layout = Layout {
            name: "fresh".to_string(),
            saved_at: Utc::now(),
            entries: vec![
                LayoutEntry {
                    window_name: "left".to_string(),
                    bounds: Rectangle::new(0.0, 0.0, 100.0, 100.0),
                    group_id: Some("g".to_string()),
                    state: Some(json!(1)),
                },
                LayoutEntry {
                    window_name: "broken".to_string(),
                    bounds: Rectangle::new(0.0, 0.0, -5.0, 100.0),
                    group_id: None,
                    state: None,
                },
                LayoutEntry {
                    window_name: "right".to_string(),
                    bounds: Rectangle::new(100.0, 0.0, 100.0, 100.0),
                    group_id: Some("g".to_string()),
                    state: None,
                },
            ],
        };

        let report = manager.restore(&container, &layout).await.unwrap();
        assert_eq!(report.created, vec!["left".to_string(), "right".to_string()]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "broken");
        assert_eq!(report.groups, 1);

        let left = container.get_window_by_name("left").await.unwrap().unwrap();
        let right = container.get_window_by_name("right").await.unwrap().unwrap();
        assert_eq!(left.get_state().await.unwrap(), Some(json!(1)));
        let mut members = right.get_group().await.unwrap();
        members.sort();
        assert_eq!(members, vec![left.id(), right.id()]);
    }

    #[tokio::test]
    async fn restore_breaks_groups_absent_from_layout() {
        let container = HeadlessContainer::new();
        let (a, b) = two_grouped(&container).await;
        let manager = LayoutManager::new(tempdir().unwrap().path());
        let layout = Layout {
            name: "apart".to_string(),
            saved_at: Utc::now(),
            entries: vec![
                LayoutEntry {
                    window_name: "chart".to_string(),
                    bounds: Rectangle::new(0.0, 0.0, 200.0, 200.0),
                    group_id: None,
                    state: None,
                },
                LayoutEntry {
                    window_name: "news".to_string(),
                    bounds: Rectangle::new(600.0, 0.0, 200.0, 200.0),
                    group_id: None,
                    state: None,
                },
            ],
        };

        manager.restore(&container, &layout).await.unwrap();
        assert!(a.get_group().await.unwrap().is_empty());
        assert!(b.get_group().await.unwrap().is_empty());
        assert_eq!(b.get_bounds().await.unwrap(), Rectangle::new(600.0, 0.0, 200.0, 200.0));
    }

    #[test]
    fn layout_files_round_trip_and_list() {
        let dir = tempdir().unwrap();
        let manager = LayoutManager::new(dir.path().join("layouts"));
        assert!(manager.list().unwrap().is_empty());

        let layout = Layout {
            name: "desk".to_string(),
            saved_at: Utc::now(),
            entries: vec![LayoutEntry {
                window_name: "main".to_string(),
                bounds: Rectangle::new(1.0, 2.0, 3.0, 4.0),
                group_id: None,
                state: None,
            }],
        };
        manager.save(&layout).unwrap();

        assert_eq!(manager.list().unwrap(), vec!["desk".to_string()]);
        assert_eq!(manager.load("desk").unwrap(), layout);
        assert!(manager.load("../etc/passwd").is_err());

        manager.delete("desk").unwrap();
        assert!(manager.load("desk").is_err());
    }

    #[test]
    fn layout_json_uses_camel_case_keys() {
        let entry = LayoutEntry {
            window_name: "main".to_string(),
            bounds: Rectangle::new(0.0, 0.0, 10.0, 10.0),
            group_id: Some("group-1".to_string()),
            state: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["windowName"], "main");
        assert_eq!(value["groupId"], "group-1");
        assert!(value.get("state").is_none());
    }
}
