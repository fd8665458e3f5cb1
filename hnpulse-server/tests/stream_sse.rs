mod common;

use std::{future::IntoFuture, time::Duration};

use axum::http::{HeaderName, HeaderValue};
use common::TestApp;
use hnpulse_core::api::{routes, types::ActionResponse};

fn event_names(body: &str) -> Vec<&str> {
    body.lines()
        .filter_map(|line| line.strip_prefix("event:"))
        .map(str::trim)
        .collect()
}

#[tokio::test]
async fn late_subscriber_replays_the_finished_run() {
    let app = TestApp::builder()
        .steps(&["Scraping front page", "Summarizing"])
        .build()
        .unwrap();
    app.server.post(routes::refresh::TRIGGER).await.assert_status_ok();
    app.wait_idle().await;

    let response = app.server.get(routes::refresh::STREAM).await;
    response.assert_status_ok();
    let body = response.text();

    let names = event_names(&body);
    assert_eq!(names.first(), Some(&"status"));
    assert_eq!(names.last(), Some(&"done"));
    assert!(names.contains(&"log"));
    assert!(body.contains("Scraping front page"));
    assert!(body.contains("Refresh complete"));
    assert!(body.lines().any(|line| line.starts_with("id:")));
}

#[tokio::test]
async fn live_subscriber_follows_a_run_to_completion() {
    let app = TestApp::builder().steps(&["Scraping"]).gated().build().unwrap();
    app.server.post(routes::refresh::TRIGGER).await.assert_status_ok();

    let hub = app.state.hub.clone();
    let (response, ()) = tokio::join!(app.server.get(routes::refresh::STREAM).into_future(), async {
        while hub.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        app.open_gate();
    });
    response.assert_status_ok();
    let body = response.text();

    assert!(body.contains("Refresh in progress"));
    assert_eq!(event_names(&body).last(), Some(&"done"));
    app.wait_idle().await;
}

#[tokio::test]
async fn failed_run_ends_the_stream_with_an_error_event() {
    let app = TestApp::builder()
        .failing("scraper unreachable")
        .build()
        .unwrap();
    app.server.post(routes::refresh::TRIGGER).await.assert_status_ok();
    app.wait_idle().await;

    let body = app.server.get(routes::refresh::STREAM).await.text();
    assert_eq!(event_names(&body).last(), Some(&"refresh_error"));
    assert!(body.contains("scraper unreachable"));
}

#[tokio::test]
async fn idle_stream_opens_with_a_status_snapshot() {
    let app = TestApp::builder().build().unwrap();
    app.state.shutdown.cancel();

    let body = app.server.get(routes::refresh::STREAM).await.text();
    assert_eq!(event_names(&body), vec!["status"]);
    assert!(body.contains("No refresh running"));
}

#[tokio::test]
async fn stream_opened_after_trigger_follows_the_new_run() {
    let app = TestApp::builder().steps(&["Scraping"]).gated().build().unwrap();
    app.open_gate();
    app.server.post(routes::refresh::TRIGGER).await.assert_status_ok();
    app.wait_idle().await;
    app.clock.advance(chrono::Duration::hours(2));

    let started: ActionResponse =
        app.server.post(routes::refresh::TRIGGER).await.json();
    let run_id = started.run_id.expect("run id");

    let hub = app.state.hub.clone();
    let (response, ()) = tokio::join!(app.server.get(routes::refresh::STREAM).into_future(), async {
        while hub.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        app.open_gate();
    });
    let body = response.text();

    let names = event_names(&body);
    assert_eq!(names.iter().filter(|name| **name == "done").count(), 1);
    let done = body
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .last()
        .expect("terminal event data");
    assert!(done.contains(&run_id));
    app.wait_idle().await;
}

#[tokio::test]
async fn reconnect_with_last_event_id_skips_seen_frames() {
    let app = TestApp::builder()
        .steps(&["Scraping front page", "Summarizing"])
        .build()
        .unwrap();
    app.server.post(routes::refresh::TRIGGER).await.assert_status_ok();
    app.wait_idle().await;
    let scraping = app
        .state
        .hub
        .history(10)
        .into_iter()
        .find(|frame| frame.event.message == "Scraping front page")
        .expect("progress frame published");

    let body = app
        .server
        .get(routes::refresh::STREAM)
        .add_header(
            HeaderName::from_static("last-event-id"),
            HeaderValue::from(scraping.sequence),
        )
        .await
        .text();

    assert!(!body.contains("Scraping front page"));
    assert!(body.contains("Summarizing"));
    assert_eq!(event_names(&body).last(), Some(&"done"));
}

