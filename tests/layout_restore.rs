use serde_json::json;
use snapdesk::backend::HeadlessContainer;
use snapdesk::layout::LayoutManager;
use snapdesk::{Command, Config, Container, Rectangle, WindowManager, WindowOptions};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{Duration, Instant};

fn setup() -> (TempDir, Arc<HeadlessContainer>, WindowManager) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.layout.directory = dir.path().to_string_lossy().into_owned();
    let container = Arc::new(HeadlessContainer::new());
    let wm = WindowManager::new(container.clone(), config);
    (dir, container, wm)
}

async fn settle(wm: &mut WindowManager) {
    wm.process_pending().await;
    wm.flush_quiescent(Instant::now() + Duration::from_secs(5)).await;
    wm.process_pending().await;
}

#[tokio::test]
async fn saved_layout_restores_bounds_and_groups() {
    let (dir, container, mut wm) = setup();
    let chart = container
        .create_window(WindowOptions::new("chart", Rectangle::new(0.0, 0.0, 400.0, 300.0)))
        .await
        .unwrap();
    let ticket = container
        .create_window(WindowOptions::new("ticket", Rectangle::new(400.0, 0.0, 200.0, 300.0)))
        .await
        .unwrap();
    container
        .create_window(WindowOptions::new("news", Rectangle::new(900.0, 500.0, 300.0, 300.0)))
        .await
        .unwrap();
    wm.process_pending().await;

    wm.execute(Command::JoinGroup(ticket.id(), chart.id())).await.unwrap();
    settle(&mut wm).await;

    let saved = wm.execute(Command::SaveLayout(Some("trading".into()))).await.unwrap();
    assert_eq!(saved["windows"], 3);
    assert!(dir.path().join("trading.json").exists());

    wm.execute(Command::UngroupAll).await.unwrap();
    wm.execute(Command::MoveWindow(chart.id(), Rectangle::new(300.0, 700.0, 400.0, 300.0)))
        .await
        .unwrap();
    wm.execute(Command::MoveWindow(ticket.id(), Rectangle::new(1200.0, 100.0, 200.0, 300.0)))
        .await
        .unwrap();
    settle(&mut wm).await;
    assert!(wm.groups().is_empty());

    let report = wm
        .execute(Command::RestoreLayout(Some("trading".into())))
        .await
        .unwrap();
    assert_eq!(report["restored"].as_array().unwrap().len(), 3);
    assert_eq!(report["groups"], 1);
    wm.process_pending().await;

    assert_eq!(chart.get_bounds().await.unwrap(), Rectangle::new(0.0, 0.0, 400.0, 300.0));
    assert_eq!(ticket.get_bounds().await.unwrap(), Rectangle::new(400.0, 0.0, 200.0, 300.0));
    assert!(wm.groups().are_grouped(chart.id(), ticket.id()));
    // Restored positions are not user drags.
    assert_eq!(wm.tracker().active_sessions(), 0);
}

#[tokio::test]
async fn restore_recreates_closed_windows() {
    let (_dir, container, mut wm) = setup();
    let a = container
        .create_window(WindowOptions::new("a", Rectangle::new(0.0, 0.0, 100.0, 100.0)))
        .await
        .unwrap();
    let b = container
        .create_window(WindowOptions::new("b", Rectangle::new(100.0, 0.0, 100.0, 100.0)))
        .await
        .unwrap();
    b.set_state(json!({"symbol": "AAPL"})).await.unwrap();
    wm.process_pending().await;
    wm.execute(Command::JoinGroup(b.id(), a.id())).await.unwrap();
    wm.execute(Command::SaveLayout(None)).await.unwrap();

    wm.execute(Command::CloseWindow(b.id())).await.unwrap();
    wm.process_pending().await;
    assert!(wm.groups().is_empty());

    let report = wm.execute(Command::RestoreLayout(None)).await.unwrap();
    assert_eq!(report["created"], json!(["b"]));
    wm.process_pending().await;

    let b = container.get_window_by_name("b").await.unwrap().unwrap();
    assert_eq!(b.get_state().await.unwrap(), Some(json!({"symbol": "AAPL"})));
    assert!(wm.groups().are_grouped(a.id(), b.id()));
}

#[tokio::test]
async fn missing_layout_is_an_error() {
    let (_dir, _container, mut wm) = setup();
    assert!(wm.execute(Command::RestoreLayout(Some("nope".into()))).await.is_err());
}

#[tokio::test]
async fn layouts_are_listed_by_name() {
    let (dir, container, mut wm) = setup();
    container
        .create_window(WindowOptions::new("solo", Rectangle::new(0.0, 0.0, 100.0, 100.0)))
        .await
        .unwrap();
    wm.process_pending().await;

    wm.execute(Command::SaveLayout(Some("morning".into()))).await.unwrap();
    wm.execute(Command::SaveLayout(Some("evening".into()))).await.unwrap();

    let manager = LayoutManager::new(dir.path());
    assert_eq!(manager.list().unwrap(), vec!["evening".to_string(), "morning".to_string()]);
}
