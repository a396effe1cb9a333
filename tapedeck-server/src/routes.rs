//! The `/library` HTTP surface.
//!
//! Thin translation layer: paths are parsed strictly (400 with the
//! expected shape on mismatch, 405 on a wrong method), everything else is
//! delegated to the engine, and responses are pretty-printed JSON with
//! enums serialized by name.
//!
//! Cancellation contract: dropping a request does NOT cancel the
//! operation it started; it only abandons the early reply. Clients must
//! poll `/library/operation/{trace_id}` using the advisory
//! `WaitBeforeNextTrace` interval.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tapedeck::engine::Engine;
use tapedeck::model::VolumeTag;
use uuid::Uuid;

/// Build the application router.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/library/verify", get(verify))
        .route("/library/data", get(data))
        .route("/library/data/{flag}", get(data_flag))
        .route("/library/drives", get(drives))
        .route("/library/drives/{flag}", get(drives_flag))
        .route("/library/tapes", get(tapes))
        .route("/library/tapes/{flag}", get(tapes_flag))
        .route("/library/slots", get(slots))
        .route("/library/slots/{flag}", get(slots_flag))
        .route("/library/load/{drive}/{tape}", post(load))
        .route("/library/unload/{drive}", post(unload))
        .route("/library/mount/{drive}", post(mount))
        .route("/library/unmount/{drive}", post(unmount))
        .route("/library/format/{drive}", post(format))
        .route("/library/format/{drive}/{flag}", post(format_flag))
        .route("/library/ltfsck/{drive}", post(ltfsck))
        .route("/library/transfer/{tape}/{slot}", post(transfer))
        .route("/library/release", post(release))
        .route("/library/operation/{trace_id}", get(operation))
        .route("/library/operation/{trace_id}/{ticks}", get(operation_since))
        .route("/library/help", get(help))
        .method_not_allowed_fallback(invalid_method)
        .with_state(engine)
}

/// Pretty-printed JSON response.
fn pretty<T: Serialize>(value: &T) -> Response {
    match serde_json::to_string_pretty(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("serialization error: {err}"),
        )
            .into_response(),
    }
}

fn bad_request(message: &str) -> Response {
    let body = serde_json::json!({ "error": message });
    (
        StatusCode::BAD_REQUEST,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string_pretty(&body).unwrap_or_default(),
    )
        .into_response()
}

async fn invalid_method() -> Response {
    let body = serde_json::json!({ "error": "Invalid request" });
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_string_pretty(&body).unwrap_or_default(),
    )
        .into_response()
}

/// Parse a drive path segment.
fn parse_drive(segment: &str, shape: &str) -> Result<u32, Response> {
    segment
        .parse()
        .map_err(|_| bad_request(&format!("invalid drive number '{segment}'; expected {shape}")))
}

/// Parse a volume tag path segment.
fn parse_tape(segment: &str, shape: &str) -> Result<String, Response> {
    VolumeTag::parse(segment)
        .map(|tag| tag.as_str().to_string())
        .map_err(|_| {
            bad_request(&format!(
                "invalid volume tag '{segment}' (8 characters required); expected {shape}"
            ))
        })
}

/// Parse the optional trailing `force` segment.
fn parse_force(segment: &str, shape: &str) -> Result<bool, Response> {
    if segment.eq_ignore_ascii_case("force") {
        Ok(true)
    } else {
        Err(bad_request(&format!(
            "unexpected segment '{segment}'; expected {shape}"
        )))
    }
}

async fn verify(State(engine): State<Arc<Engine>>) -> Response {
    pretty(&engine.verify().await)
}

async fn data(State(engine): State<Arc<Engine>>) -> Response {
    pretty(&engine.data(false).await)
}

async fn data_flag(State(engine): State<Arc<Engine>>, Path(flag): Path<String>) -> Response {
    match parse_force(&flag, "/library/data[/force]") {
        Ok(force) => pretty(&engine.data(force).await),
        Err(response) => response,
    }
}

async fn drives(State(engine): State<Arc<Engine>>) -> Response {
    pretty(&engine.drives(false).await)
}

async fn drives_flag(State(engine): State<Arc<Engine>>, Path(flag): Path<String>) -> Response {
    match parse_force(&flag, "/library/drives[/force]") {
        Ok(force) => pretty(&engine.drives(force).await),
        Err(response) => response,
    }
}

async fn tapes(State(engine): State<Arc<Engine>>) -> Response {
    pretty(&engine.tapes(false).await)
}

async fn tapes_flag(State(engine): State<Arc<Engine>>, Path(flag): Path<String>) -> Response {
    match parse_force(&flag, "/library/tapes[/force]") {
        Ok(force) => pretty(&engine.tapes(force).await),
        Err(response) => response,
    }
}

async fn slots(State(engine): State<Arc<Engine>>) -> Response {
    pretty(&engine.slots(false).await)
}

async fn slots_flag(State(engine): State<Arc<Engine>>, Path(flag): Path<String>) -> Response {
    match parse_force(&flag, "/library/slots[/force]") {
        Ok(force) => pretty(&engine.slots(force).await),
        Err(response) => response,
    }
}

async fn load(
    State(engine): State<Arc<Engine>>,
    Path((drive, tape)): Path<(String, String)>,
) -> Response {
    const SHAPE: &str = "/library/load/{drive}/{tape}";
    let drive = match parse_drive(&drive, SHAPE) {
        Ok(drive) => drive,
        Err(response) => return response,
    };
    let tape = match parse_tape(&tape, SHAPE) {
        Ok(tape) => tape,
        Err(response) => return response,
    };
    pretty(&engine.load(&tape, drive).await)
}

async fn unload(State(engine): State<Arc<Engine>>, Path(drive): Path<String>) -> Response {
    match parse_drive(&drive, "/library/unload/{drive}") {
        Ok(drive) => pretty(&engine.unload(drive).await),
        Err(response) => response,
    }
}

async fn mount(State(engine): State<Arc<Engine>>, Path(drive): Path<String>) -> Response {
    match parse_drive(&drive, "/library/mount/{drive}") {
        Ok(drive) => pretty(&engine.mount(drive).await),
        Err(response) => response,
    }
}

async fn unmount(State(engine): State<Arc<Engine>>, Path(drive): Path<String>) -> Response {
    match parse_drive(&drive, "/library/unmount/{drive}") {
        Ok(drive) => pretty(&engine.unmount(drive).await),
        Err(response) => response,
    }
}

async fn format(State(engine): State<Arc<Engine>>, Path(drive): Path<String>) -> Response {
    match parse_drive(&drive, "/library/format/{drive}[/force]") {
        Ok(drive) => pretty(&engine.format(drive, false).await),
        Err(response) => response,
    }
}

async fn format_flag(
    State(engine): State<Arc<Engine>>,
    Path((drive, flag)): Path<(String, String)>,
) -> Response {
    const SHAPE: &str = "/library/format/{drive}[/force]";
    let drive = match parse_drive(&drive, SHAPE) {
        Ok(drive) => drive,
        Err(response) => return response,
    };
    match parse_force(&flag, SHAPE) {
        Ok(force) => pretty(&engine.format(drive, force).await),
        Err(response) => response,
    }
}

async fn ltfsck(State(engine): State<Arc<Engine>>, Path(drive): Path<String>) -> Response {
    match parse_drive(&drive, "/library/ltfsck/{drive}") {
        Ok(drive) => pretty(&engine.ltfsck(drive).await),
        Err(response) => response,
    }
}

async fn transfer(
    State(engine): State<Arc<Engine>>,
    Path((tape, slot)): Path<(String, String)>,
) -> Response {
    const SHAPE: &str = "/library/transfer/{tape}/{slot}";
    let tape = match parse_tape(&tape, SHAPE) {
        Ok(tape) => tape,
        Err(response) => return response,
    };
    let slot = match slot.parse::<u32>() {
        Ok(slot) => slot,
        Err(_) => {
            return bad_request(&format!("invalid slot number '{slot}'; expected {SHAPE}"))
        }
    };
    pretty(&engine.transfer(&tape, slot).await)
}

async fn release(State(engine): State<Arc<Engine>>) -> Response {
    pretty(&engine.release().await)
}

async fn operation(State(engine): State<Arc<Engine>>, Path(trace_id): Path<String>) -> Response {
    const SHAPE: &str = "/library/operation/{trace_id}[/{millis}]";
    let trace_id = match trace_id.parse::<Uuid>() {
        Ok(trace_id) => trace_id,
        Err(_) => return bad_request(&format!("invalid trace id '{trace_id}'; expected {SHAPE}")),
    };
    match engine.operation(trace_id, None) {
        Some(op) => pretty(&op),
        None => pretty(&serde_json::Value::Null),
    }
}

async fn operation_since(
    State(engine): State<Arc<Engine>>,
    Path((trace_id, ticks)): Path<(String, String)>,
) -> Response {
    const SHAPE: &str = "/library/operation/{trace_id}[/{millis}]";
    let trace_id = match trace_id.parse::<Uuid>() {
        Ok(trace_id) => trace_id,
        Err(_) => return bad_request(&format!("invalid trace id '{trace_id}'; expected {SHAPE}")),
    };
    let since = match ticks.parse::<i64>() {
        Ok(since) => since,
        Err(_) => {
            return bad_request(&format!(
                "invalid log timestamp '{ticks}' (milliseconds since the Unix epoch); expected {SHAPE}"
            ))
        }
    };
    match engine.operation(trace_id, Some(since)) {
        Some(op) => pretty(&op),
        None => pretty(&serde_json::Value::Null),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RouteHelp {
    method: &'static str,
    path: &'static str,
    description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HelpCatalogue {
    service: &'static str,
    version: &'static str,
    notes: [&'static str; 3],
    routes: Vec<RouteHelp>,
}

/// The routes, as data.
fn catalogue() -> HelpCatalogue {
    HelpCatalogue {
        service: "tapedeck",
        version: tapedeck::VERSION,
        notes: [
            "POST routes answer within 15 s with either the final operation or an Ongoing snapshot; poll /library/operation/{trace_id} afterwards.",
            "Dropping an HTTP request never cancels the underlying operation.",
            "Terminal operations stay pollable for 60 minutes.",
        ],
        routes: vec![
            RouteHelp { method: "GET", path: "/library/verify", description: "Initialize the library and report readiness" },
            RouteHelp { method: "GET", path: "/library/data[/force]", description: "Snapshot of drives and slots" },
            RouteHelp { method: "GET", path: "/library/drives[/force]", description: "Snapshot of drives" },
            RouteHelp { method: "GET", path: "/library/tapes[/force]", description: "Snapshot of cartridges" },
            RouteHelp { method: "GET", path: "/library/slots[/force]", description: "Snapshot of storage slots" },
            RouteHelp { method: "POST", path: "/library/load/{drive}/{tape}", description: "Load a cartridge into a drive and mount it" },
            RouteHelp { method: "POST", path: "/library/unload/{drive}", description: "Unmount and eject the cartridge in a drive" },
            RouteHelp { method: "POST", path: "/library/mount/{drive}", description: "Mount the volume already in a drive" },
            RouteHelp { method: "POST", path: "/library/unmount/{drive}", description: "Unmount the volume in a drive" },
            RouteHelp { method: "POST", path: "/library/format/{drive}[/force]", description: "Format the cartridge in a drive with mkltfs" },
            RouteHelp { method: "POST", path: "/library/ltfsck/{drive}", description: "Check the cartridge in a drive with ltfsck" },
            RouteHelp { method: "POST", path: "/library/transfer/{tape}/{slot}", description: "Move a cartridge between storage slots" },
            RouteHelp { method: "POST", path: "/library/release", description: "Unmount and unload every full drive" },
            RouteHelp { method: "GET", path: "/library/operation/{trace_id}[/{millis}]", description: "Poll an operation; optional timestamp filters its log" },
            RouteHelp { method: "GET", path: "/library/help", description: "This catalogue" },
        ],
    }
}

async fn help() -> Response {
    pretty(&catalogue())
}
