//! # Notification Flow Tests
//!
//! A local HTTP server stands in for the map page. Each test edits the page,
//! ticks the cycle controller and checks what subscribers receive.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Router, extract::State, routing::get};
use tokio::net::TcpListener;

use lib_common::core::{CycleController, Dispatcher, FetchError, LocationKey, RateLimiter, TickOutcome};
use lib_common::gateway::WELCOME_TEXT;
use lib_common::ingestors::{MapPageSource, PollScheduler};
use lib_common::retrieve::ClientOptions;

use project_tests::*;

const SWORDS: &str = "\u{2694}\u{FE0F}";

type Page = Arc<Mutex<String>>;

fn cell(left: &str, right: &str, top: &str) -> String {
    format!(
        r#"<div class="map-cell"><span class="top-right-text"> {} </span><span class="bottom-left-text">{}</span><span class="bottom-right-text">{}</span></div>"#,
        top, left, right
    )
}

fn page(cells: &[String]) -> String {
    format!("<html><body><div class=\"map\">{}</div></body></html>", cells.concat())
}

async fn serve_map(initial: String) -> anyhow::Result<(String, Page)> {
    let current: Page = Arc::new(Mutex::new(initial));
    let app = Router::new()
        .route(
            "/webview/map",
            get(|State(page): State<Page>| async move { page.lock().map(|p| p.clone()).unwrap_or_default() }),
        )
        .with_state(current.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/webview/map", listener.local_addr()?);
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok((url, current))
}

fn set_page(current: &Page, html: String) {
    *current.lock().unwrap() = html;
}

fn activations(outcome: TickOutcome) -> Vec<LocationKey> {
    match outcome {
        TickOutcome::Completed(report) => report.activations,
        other => panic!("expected a completed cycle, got {:?}", other),
    }
}

#[tokio::test]
async fn test_map_changes_reach_subscribers() -> anyhow::Result<()> {
    let (url, current) = serve_map(page(&[cell(SWORDS, "A", "1"), cell("", "B", "2")])).await?;
    let gateway = start_gateway(RateLimiter::default()).await;
    let source = MapPageSource::new(&url, &ClientOptions::default())?;
    let controller = CycleController::new(source, Dispatcher::new(gateway.registry.clone()));

    let mut client = connect(gateway.addr, Some(TOKEN)).await;
    assert_eq!(next_text(&mut client).await, WELCOME_TEXT);

    // First sighting of A1.
    assert_eq!(activations(controller.tick().await), vec![LocationKey::new("A1")]);
    assert_eq!(next_text(&mut client).await, format!("New {} detected at location: A1", SWORDS));

    // Unchanged page: silence.
    assert!(activations(controller.tick().await).is_empty());
    assert!(stays_quiet(&mut client, Duration::from_millis(200)).await);

    // A1 clears, B2 lights up.
    set_page(&current, page(&[cell("", "A", "1"), cell(SWORDS, "B", "2")]));
    assert_eq!(activations(controller.tick().await), vec![LocationKey::new("B2")]);
    assert_eq!(next_text(&mut client).await, format!("New {} detected at location: B2", SWORDS));

    // A1 flags again after having cleared.
    set_page(&current, page(&[cell(SWORDS, "A", "1"), cell(SWORDS, "B", "2")]));
    assert_eq!(activations(controller.tick().await), vec![LocationKey::new("A1")]);
    assert_eq!(next_text(&mut client).await, format!("New {} detected at location: A1", SWORDS));

    Ok(())
}

#[tokio::test]
async fn test_markup_in_cells_is_sanitized() -> anyhow::Result<()> {
    let (url, _current) = serve_map(page(&[cell(SWORDS, "C&lt;script&gt;", "3;")])).await?;
    let gateway = start_gateway(RateLimiter::default()).await;
    let source = MapPageSource::new(&url, &ClientOptions::default())?;
    let controller = CycleController::new(source, Dispatcher::new(gateway.registry.clone()));

    let mut client = connect(gateway.addr, Some(TOKEN)).await;
    assert_eq!(next_text(&mut client).await, WELCOME_TEXT);

    assert_eq!(activations(controller.tick().await), vec![LocationKey::new("Cscript3")]);
    assert_eq!(next_text(&mut client).await, format!("New {} detected at location: Cscript3", SWORDS));
    Ok(())
}

#[tokio::test]
async fn test_page_without_cells_keeps_active_set() -> anyhow::Result<()> {
    let (url, current) = serve_map(page(&[cell(SWORDS, "A", "1")])).await?;
    let gateway = start_gateway(RateLimiter::default()).await;
    let source = MapPageSource::new(&url, &ClientOptions::default())?;
    let controller = CycleController::new(source, Dispatcher::new(gateway.registry.clone()));

    activations(controller.tick().await);
    set_page(&current, "<html><body>maintenance</body></html>".to_string());

    assert_eq!(controller.tick().await, TickOutcome::FetchFailed(FetchError::NoCells));
    assert_eq!(controller.active_keys().await, vec![LocationKey::new("A1")]);

    // Once the map is back, A1 is not announced a second time.
    set_page(&current, page(&[cell(SWORDS, "A", "1")]));
    assert!(activations(controller.tick().await).is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_pushes_notifications() -> anyhow::Result<()> {
    let (url, _current) = serve_map(page(&[cell(SWORDS, "D", "4")])).await?;
    let gateway = start_gateway(RateLimiter::default()).await;
    let source = MapPageSource::new(&url, &ClientOptions::default())?;
    let controller = Arc::new(CycleController::new(source, Dispatcher::new(gateway.registry.clone())));

    let mut client = connect(gateway.addr, Some(TOKEN)).await;
    assert_eq!(next_text(&mut client).await, WELCOME_TEXT);

    let scheduler = PollScheduler::start(controller.clone(), "* * * * * *")
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let received = next_text(&mut client).await;
    scheduler.shutdown().await.map_err(|e| anyhow::anyhow!("{}", e))?;
    controller.wait_idle().await;

    assert_eq!(received, format!("New {} detected at location: D4", SWORDS));
    assert!(stays_quiet(&mut client, Duration::from_millis(1500)).await);
    Ok(())
}
