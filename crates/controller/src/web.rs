use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::controller::Trigger;
use crate::runtime::{ControllerGone, ControllerHandle};
use crate::watering::WateringConfig;

const LOG_PATH: &str = "/watering.log";

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(handle: ControllerHandle) -> Router {
    Router::new()
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/config/reset", post(reset_config))
        .route("/api/trigger", post(trigger_both))
        .route("/api/trigger/upper", post(trigger_upper))
        .route("/api/trigger/lower", post(trigger_lower))
        .route("/api/stop", post(stop))
        .route("/api/skip", post(skip))
        .route("/api/skip/cancel", post(cancel_skip))
        .route("/api/schedule", get(schedule))
        .route("/api/status", get(status))
        .route(LOG_PATH, get(audit_log))
        .with_state(handle)
}

fn ok_status(msg: &str) -> Response {
    Json(json!({ "status": msg })).into_response()
}

fn rejected(code: StatusCode, msg: impl Into<String>) -> Response {
    (code, Json(json!({ "error": msg.into() }))).into_response()
}

impl IntoResponse for ControllerGone {
    fn into_response(self) -> Response {
        rejected(StatusCode::SERVICE_UNAVAILABLE, self.to_string())
    }
}

type ApiResult = std::result::Result<Response, ControllerGone>;

// -- Config -----------------------------------------------------------------

async fn get_config(State(h): State<ControllerHandle>) -> ApiResult {
    Ok(Json(h.config().await?).into_response())
}

async fn update_config(State(h): State<ControllerHandle>, body: Bytes) -> ApiResult {
    let config = match WateringConfig::from_update(&body) {
        Ok(c) => c,
        Err(e) => {
            warn!("config update rejected: {e}");
            return Ok(rejected(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };
    Ok(match h.update_config(config).await? {
        Ok(()) => ok_status("Configuration updated"),
        Err(e) => rejected(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    })
}

async fn reset_config(State(h): State<ControllerHandle>) -> ApiResult {
    Ok(match h.reset_config().await? {
        Ok(()) => ok_status("Configuration reset to defaults"),
        Err(e) => rejected(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    })
}

// -- Sessions ---------------------------------------------------------------

async fn trigger(h: &ControllerHandle, which: Trigger, started: &str) -> ApiResult {
    Ok(match h.trigger(which).await? {
        Ok(()) => ok_status(started),
        Err(e) => rejected(StatusCode::BAD_REQUEST, e.to_string()),
    })
}

async fn trigger_both(State(h): State<ControllerHandle>) -> ApiResult {
    trigger(&h, Trigger::Both, "Watering started manually").await
}

async fn trigger_upper(State(h): State<ControllerHandle>) -> ApiResult {
    trigger(&h, Trigger::Upper, "Upper line triggered").await
}

async fn trigger_lower(State(h): State<ControllerHandle>) -> ApiResult {
    trigger(&h, Trigger::Lower, "Lower line triggered").await
}

async fn stop(State(h): State<ControllerHandle>) -> ApiResult {
    Ok(match h.stop().await? {
        Ok(()) => ok_status("Watering stopped manually"),
        Err(e) => rejected(StatusCode::BAD_REQUEST, e.to_string()),
    })
}

// -- Skip + status ----------------------------------------------------------

async fn skip(State(h): State<ControllerHandle>) -> ApiResult {
    h.skip_next().await?;
    Ok(ok_status("Next watering schedule skipped"))
}

async fn cancel_skip(State(h): State<ControllerHandle>) -> ApiResult {
    h.cancel_skip().await?;
    Ok(ok_status("Skip cancelled"))
}

async fn schedule(State(h): State<ControllerHandle>) -> ApiResult {
    Ok(Json(h.schedule().await?).into_response())
}

async fn status(State(h): State<ControllerHandle>) -> ApiResult {
    let watering = h.is_watering().await?;
    Ok(Json(json!({ "watering": watering })).into_response())
}

async fn audit_log(State(h): State<ControllerHandle>) -> ApiResult {
    let text = [(header::CONTENT_TYPE, "text/plain; charset=utf-8")];
    Ok(match h.audit_log().await? {
        Ok(Some(log)) => (text, log).into_response(),
        Ok(None) => {
            (StatusCode::NOT_FOUND, text, format!("Not found: {LOG_PATH}")).into_response()
        }
        Err(e) => {
            error!("reading audit log failed: {e}");
            rejected(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    })
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(handle: ControllerHandle) -> Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);
    serve_on(handle, port).await
}

/// Consumes `handle` on every path, including a failed bind.
async fn serve_on(handle: ControllerHandle, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(handle))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("web server error")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            error!("cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::controller::{Controller, ControllerOptions};
    use crate::lines::RecordingLines;
    use crate::runtime;
    use crate::store::MemStorage;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use time::macros::date;
    use tower::ServiceExt;

    const FULL_UPDATE: &str = r#"{
        "morning_time": "06:15",
        "evening_time": "19:45",
        "morning_durations": {"valve1": 30, "valve2": 40},
        "evening_durations": {"valve1": 50, "valve2": 0},
        "manual_durations": {"upper": 10, "lower": 20}
    }"#;

    fn app_with(storage: MemStorage) -> Router {
        let clock = ManualClock::at(date!(2026 - 09 - 12), 12, 0);
        let controller = Controller::new(
            clock,
            storage,
            RecordingLines::default(),
            ControllerOptions::default(),
        );
        let (handle, rx) = runtime::channel(8);
        tokio::spawn(runtime::run(controller, rx, Duration::from_millis(10)));
        router(handle)
    }

    fn app() -> Router {
        app_with(MemStorage::default())
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, String) {
        let body = match body {
            Some(b) => Body::from(b.to_string()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn json(body: &str) -> serde_json::Value {
        serde_json::from_str(body).unwrap()
    }

    // -- Config -------------------------------------------------------------

    #[tokio::test]
    async fn get_config_returns_defaults() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/config", None).await;
        assert_eq!(status, StatusCode::OK);
        let v = json(&body);
        assert_eq!(v["morning_time"], "07:00");
        assert_eq!(v["evening_durations"]["valve2"], 60);
        assert_eq!(v["manual_durations"]["upper"], 60);
    }

    #[tokio::test]
    async fn post_config_replaces_all_fields() {
        let app = app();
        let (status, body) = send(&app, "POST", "/api/config", Some(FULL_UPDATE)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "Configuration updated");

        let (_, body) = send(&app, "GET", "/api/config", None).await;
        let v = json(&body);
        assert_eq!(v["morning_time"], "06:15");
        assert_eq!(v["evening_time"], "19:45");
        assert_eq!(v["evening_durations"]["valve2"], 0);
        assert_eq!(v["manual_durations"]["lower"], 20);
    }

    #[tokio::test]
    async fn post_config_with_missing_field_changes_nothing() {
        let app = app();
        let partial = r#"{"morning_time": "05:00"}"#;
        let (status, body) = send(&app, "POST", "/api/config", Some(partial)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json(&body)["error"].as_str().unwrap().contains("missing field"));

        let (_, body) = send(&app, "GET", "/api/config", None).await;
        assert_eq!(json(&body)["morning_time"], "07:00");
    }

    #[tokio::test]
    async fn post_config_invalid_json_is_bad_request() {
        let app = app();
        let (status, _) = send(&app, "POST", "/api/config", Some("{oops")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_config_write_failure_is_reported_but_applied() {
        let app = app_with(MemStorage {
            fail_writes: true,
            ..Default::default()
        });
        let (status, body) = send(&app, "POST", "/api/config", Some(FULL_UPDATE)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json(&body)["error"].as_str().unwrap().contains("write failed"));

        let (_, body) = send(&app, "GET", "/api/config", None).await;
        assert_eq!(json(&body)["morning_time"], "06:15");
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let app = app();
        send(&app, "POST", "/api/config", Some(FULL_UPDATE)).await;
        let (status, body) = send(&app, "POST", "/api/config/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "Configuration reset to defaults");

        let (_, body) = send(&app, "GET", "/api/config", None).await;
        assert_eq!(json(&body)["morning_time"], "07:00");
    }

    // -- Sessions -----------------------------------------------------------

    #[tokio::test]
    async fn trigger_then_conflict() {
        let app = app();
        let (status, body) = send(&app, "POST", "/api/trigger", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "Watering started manually");

        let (status, body) = send(&app, "POST", "/api/trigger/upper", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"], "Watering already in progress");

        let (_, body) = send(&app, "GET", "/api/status", None).await;
        assert_eq!(json(&body)["watering"], true);
    }

    #[tokio::test]
    async fn single_line_triggers() {
        let app = app();
        let (status, body) = send(&app, "POST", "/api/trigger/upper", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "Upper line triggered");
        send(&app, "POST", "/api/stop", None).await;

        let (status, body) = send(&app, "POST", "/api/trigger/lower", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "Lower line triggered");
    }

    #[tokio::test]
    async fn stop_when_idle_is_rejected() {
        let app = app();
        let (status, body) = send(&app, "POST", "/api/stop", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"], "Not currently watering");
    }

    #[tokio::test]
    async fn stop_ends_session() {
        let app = app();
        send(&app, "POST", "/api/trigger", None).await;
        let (status, body) = send(&app, "POST", "/api/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "Watering stopped manually");

        let (_, body) = send(&app, "GET", "/api/status", None).await;
        assert_eq!(json(&body)["watering"], false);
    }

    // -- Skip + schedule ----------------------------------------------------

    #[tokio::test]
    async fn schedule_reports_next_event_and_skip() {
        let app = app();
        let (status, body) = send(&app, "GET", "/api/schedule", None).await;
        assert_eq!(status, StatusCode::OK);
        let v = json(&body);
        assert_eq!(v["next_schedule"], "Today - 18:00 (Evening)");
        assert_eq!(v["skip_next"], false);

        let (_, body) = send(&app, "POST", "/api/skip", None).await;
        assert_eq!(json(&body)["status"], "Next watering schedule skipped");
        let (_, body) = send(&app, "GET", "/api/schedule", None).await;
        assert_eq!(json(&body)["skip_next"], true);

        let (_, body) = send(&app, "POST", "/api/skip/cancel", None).await;
        assert_eq!(json(&body)["status"], "Skip cancelled");
        let (_, body) = send(&app, "GET", "/api/schedule", None).await;
        assert_eq!(json(&body)["skip_next"], false);
    }

    // -- Audit log ----------------------------------------------------------

    #[tokio::test]
    async fn audit_log_missing_is_not_found() {
        let app = app();
        let (status, body) = send(&app, "GET", "/watering.log", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "Not found: /watering.log");
    }

    #[tokio::test]
    async fn audit_log_lists_session_events() {
        let app = app();
        send(&app, "POST", "/api/trigger", None).await;
        send(&app, "POST", "/api/stop", None).await;
        let (status, body) = send(&app, "GET", "/watering.log", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            "2026-09-12 12:00 - Started watering (Upper=60s, Lower=60s)\n\
             2026-09-12 12:00 - Stopped watering\n"
        );
    }

    // -- Server lifecycle ---------------------------------------------------

    #[tokio::test]
    async fn bind_failure_still_lets_control_loop_finish() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let controller = Controller::new(
            ManualClock::at(date!(2026 - 09 - 12), 12, 0),
            MemStorage::default(),
            RecordingLines::default(),
            ControllerOptions::default(),
        );
        let (handle, rx) = runtime::channel(8);
        let control = tokio::spawn(runtime::run(controller, rx, Duration::from_millis(10)));

        let err = serve_on(handle, port).await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to bind web port"));

        tokio::time::timeout(Duration::from_secs(1), control)
            .await
            .expect("control loop kept running after bind failure")
            .unwrap();
    }

    // -- Control loop gone --------------------------------------------------

    #[tokio::test]
    async fn closed_control_loop_is_unavailable() {
        let (handle, rx) = runtime::channel(1);
        drop(rx);
        let app = router(handle);
        let (status, body) = send(&app, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(&body)["error"], "control loop is not running");
    }
}
