use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Read;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

use crate::bell::model::{
    BellSlot, BellType, LessonSlot, Session, UpcomingBell, is_time_shape, parse_weekday,
    weekday_key,
};
use crate::bell::scheduler::SettingsUpdate;
use crate::playback::{NotificationPort, PlaybackError, SharedIndicator, SpecialSound};
use crate::runner::{SharedScheduler, lock_scheduler, persist};
use crate::store::{SnapshotStore, snapshot_to_value};
use crate::time_provider::TimeProvider;

pub const DEFAULT_API_PORT: u16 = 8199;
const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

/// Handles the request threads need; everything else lives in the scheduler.
pub struct ApiContext<P> {
    pub scheduler: SharedScheduler<P>,
    pub store: SnapshotStore,
    pub indicator: SharedIndicator,
    pub sirens_dir: PathBuf,
    pub clock: Box<dyn TimeProvider>,
}

pub struct ApiServer {
    local_addr: Option<SocketAddr>,
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn start<P>(config: &ApiServerConfig, context: ApiContext<P>) -> Result<Self>
    where
        P: NotificationPort + 'static,
    {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        let local_addr = server.server_addr().to_ip();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let http_join = thread::Builder::new()
            .name("api".to_string())
            .spawn(move || run_server_loop(server, context, stop_for_thread))
            .context("failed to spawn API thread")?;

        Ok(Self {
            local_addr,
            stop,
            http_join: Some(http_join),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

fn run_server_loop<P: NotificationPort>(
    server: Server,
    context: ApiContext<P>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &context),
            Ok(None) => continue,
            Err(err) => {
                debug!(error = %err, "API receive failed");
                continue;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: ResponseBody::Text(body.into()),
        }
    }

    fn json<T: Serialize>(status: u16, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Self {
                status,
                body: ResponseBody::Json(value),
            },
            Err(err) => Self::text(500, format!("failed to encode response: {err}")),
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(
            status,
            &ErrorResponse {
                error: message.into(),
            },
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct AckResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct BellView {
    time: String,
    day: &'static str,
    session: &'static str,
    lesson: String,
    bell_type: &'static str,
}

impl BellView {
    fn new(slot: BellSlot, time: String) -> Self {
        Self {
            time,
            day: weekday_key(slot.day),
            session: slot.session.key(),
            lesson: slot.lesson.key(),
            bell_type: slot.bell.key(),
        }
    }
}

impl From<UpcomingBell> for BellView {
    fn from(bell: UpcomingBell) -> Self {
        Self::new(bell.slot, bell.time.format("%H:%M").to_string())
    }
}

#[derive(Debug, Serialize)]
struct IndicatorView {
    active: bool,
    lit: bool,
    fired_count: u64,
    last_fired_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    now: String,
    weekday: &'static str,
    school_name: String,
    rung_date: String,
    rung_today: usize,
    populated_slots: usize,
    malformed_slots: usize,
    next_bell: Option<BellView>,
    last_fired: Option<BellView>,
    last_fired_sound: Option<String>,
    ringing: IndicatorView,
    sirens_dir: String,
}

#[derive(Debug, Deserialize)]
struct LessonTimeRequest {
    day: String,
    session: String,
    lesson: String,
    bell_type: String,
    time: String,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsRequest {
    school_name: Option<String>,
    school_logo_path: Option<String>,
    #[serde(default)]
    bell_sound_paths: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct PlayResponse {
    ok: bool,
    path: String,
}

fn handle_request<P: NotificationPort>(mut request: tiny_http::Request, context: &ApiContext<P>) {
    let Some(remote_addr) = request.remote_addr().copied() else {
        let _ = send_text(request, StatusCode(400), "missing remote address");
        return;
    };
    if !is_local_network_ip(remote_addr.ip()) {
        let _ = send_text(request, StatusCode(403), "forbidden: local network only");
        return;
    }

    let method = request.method().clone();
    let url = request.url().to_string();
    let (path, _query) = split_path_query(&url);

    let mut body = String::new();
    if method == Method::Post {
        let read = request
            .as_reader()
            .take(MAX_BODY_BYTES)
            .read_to_string(&mut body);
        if let Err(err) = read {
            let _ = send_text(request, StatusCode(400), &format!("unreadable body: {err}"));
            return;
        }
    }

    let response = route(&method, path, &body, context);
    debug!(%method, path, status = response.status, remote = %remote_addr, "api request");
    let result = match &response.body {
        ResponseBody::Json(value) => send_json(request, StatusCode(response.status), value),
        ResponseBody::Text(text) => send_text(request, StatusCode(response.status), text),
    };
    if let Err(err) = result {
        warn!(path, error = %err, "failed to send API response");
    }
}

pub fn route<P: NotificationPort>(
    method: &Method,
    path: &str,
    body: &str,
    context: &ApiContext<P>,
) -> ApiResponse {
    match (method, path) {
        (Method::Get, "/healthz") => ApiResponse::text(200, "ok"),
        (Method::Get, "/v1/status") => status(context),
        (Method::Get, "/v1/schedule") => {
            let snapshot = lock_scheduler(&context.scheduler).snapshot().clone();
            ApiResponse::json(200, &snapshot_to_value(&snapshot))
        }
        (Method::Post, "/v1/lesson-time") => set_lesson_time(body, context),
        (Method::Post, "/v1/settings") => apply_settings(body, context),
        (Method::Post, "/v1/save") => save(context),
        (Method::Post, "/v1/stop") => {
            lock_scheduler(&context.scheduler).stop_playback();
            ApiResponse::json(200, &AckResponse { ok: true })
        }
        (Method::Post, _) if path.starts_with("/v1/ring/") => {
            ring(&path["/v1/ring/".len()..], context)
        }
        (Method::Post, _) if path.starts_with("/v1/special/") => {
            special(&path["/v1/special/".len()..], context)
        }
        (_, "/healthz" | "/v1/status" | "/v1/schedule") => {
            ApiResponse::text(405, "method not allowed")
        }
        (_, "/v1/lesson-time" | "/v1/settings" | "/v1/save" | "/v1/stop") => {
            ApiResponse::text(405, "method not allowed")
        }
        _ => ApiResponse::text(404, "not found"),
    }
}

fn status<P>(context: &ApiContext<P>) -> ApiResponse {
    let now = context.clock.now();
    let indicator = *context
        .indicator
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let scheduler = lock_scheduler(&context.scheduler);
    let snapshot = scheduler.snapshot();
    let payload = StatusResponse {
        now: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        weekday: weekday_key(now.weekday()),
        school_name: snapshot.school_name.clone(),
        rung_date: scheduler.rung().last_checked().format("%Y-%m-%d").to_string(),
        rung_today: scheduler.rung().len(),
        populated_slots: snapshot.lesson_times.populated_count(),
        malformed_slots: snapshot.lesson_times.malformed_entries().len(),
        next_bell: scheduler.next_bell(now).map(BellView::from),
        last_fired: scheduler
            .last_fired()
            .map(|fired| BellView::new(fired.slot, fired.time.clone())),
        last_fired_sound: scheduler
            .last_fired()
            .map(|fired| fired.sound_path.clone()),
        ringing: IndicatorView {
            active: indicator.is_active(now),
            lit: indicator.is_lit(now),
            fired_count: indicator.fired_count(),
            last_fired_at: indicator
                .last_fired_at()
                .map(|at| at.format("%Y-%m-%dT%H:%M:%S").to_string()),
        },
        sirens_dir: context.sirens_dir.display().to_string(),
    };
    drop(scheduler);
    ApiResponse::json(200, &payload)
}

fn set_lesson_time<P>(body: &str, context: &ApiContext<P>) -> ApiResponse {
    let request = match serde_json::from_str::<LessonTimeRequest>(body) {
        Ok(request) => request,
        Err(err) => return ApiResponse::error(400, format!("invalid request body: {err}")),
    };
    let slot = match parse_slot(&request) {
        Ok(slot) => slot,
        Err(message) => return ApiResponse::error(400, message),
    };
    let time = request.time.trim();
    if !time.is_empty() && !is_time_shape(time) {
        return ApiResponse::error(400, format!("time '{time}' must be HH:MM or empty"));
    }

    lock_scheduler(&context.scheduler).set_lesson_time(slot, time);
    info!(%slot, time, "lesson time edited");
    ApiResponse::json(200, &BellView::new(slot, time.to_string()))
}

fn parse_slot(request: &LessonTimeRequest) -> Result<BellSlot, String> {
    let day = parse_weekday(&request.day).map_err(|err| err.to_string())?;
    let session = Session::from_str(&request.session).map_err(|err| err.to_string())?;
    let lesson = LessonSlot::from_str(&request.lesson).map_err(|err| err.to_string())?;
    let bell = BellType::from_str(&request.bell_type).map_err(|err| err.to_string())?;
    Ok(BellSlot {
        day,
        session,
        lesson,
        bell,
    })
}

fn apply_settings<P>(body: &str, context: &ApiContext<P>) -> ApiResponse {
    let request = match serde_json::from_str::<SettingsRequest>(body) {
        Ok(request) => request,
        Err(err) => return ApiResponse::error(400, format!("invalid request body: {err}")),
    };
    let mut bell_sound_paths = Vec::with_capacity(request.bell_sound_paths.len());
    for (key, path) in request.bell_sound_paths {
        match BellType::from_str(&key) {
            Ok(bell) => bell_sound_paths.push((bell, path)),
            Err(err) => return ApiResponse::error(400, err.to_string()),
        }
    }

    lock_scheduler(&context.scheduler).apply_settings(SettingsUpdate {
        school_name: request.school_name,
        school_logo_path: request.school_logo_path,
        bell_sound_paths,
    });
    save(context)
}

fn save<P>(context: &ApiContext<P>) -> ApiResponse {
    match persist(&context.scheduler, &context.store) {
        Ok(()) => {
            info!(path = %context.store.path().display(), "snapshot saved");
            ApiResponse::json(200, &AckResponse { ok: true })
        }
        Err(err) => {
            warn!(error = %err, "snapshot save failed, keeping in-memory state");
            ApiResponse::error(500, err.to_string())
        }
    }
}

fn ring<P: NotificationPort>(key: &str, context: &ApiContext<P>) -> ApiResponse {
    let key = match decode_segment(key) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let bell = match BellType::from_str(&key) {
        Ok(bell) => bell,
        Err(err) => return ApiResponse::error(400, err.to_string()),
    };
    let mut scheduler = lock_scheduler(&context.scheduler);
    match scheduler.ring_now(bell) {
        Ok(()) => ApiResponse::json(
            200,
            &PlayResponse {
                ok: true,
                path: scheduler
                    .snapshot()
                    .bell_sound_paths
                    .raw(bell)
                    .to_string(),
            },
        ),
        Err(err) => playback_error(&err),
    }
}

fn special<P: NotificationPort>(key: &str, context: &ApiContext<P>) -> ApiResponse {
    let key = match decode_segment(key) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let sound = match SpecialSound::from_str(&key) {
        Ok(sound) => sound,
        Err(message) => return ApiResponse::error(400, message),
    };
    match lock_scheduler(&context.scheduler).play_special(sound, &context.sirens_dir) {
        Ok(path) => ApiResponse::json(
            200,
            &PlayResponse {
                ok: true,
                path: path.display().to_string(),
            },
        ),
        Err(err) => playback_error(&err),
    }
}

fn playback_error(err: &PlaybackError) -> ApiResponse {
    let status = match err {
        PlaybackError::Unassigned(_) => 409,
        PlaybackError::EmptyPath | PlaybackError::NotFound(_) => 422,
        PlaybackError::WorkerGone => 503,
    };
    ApiResponse::error(status, err.to_string())
}

fn send_json(request: tiny_http::Request, status: StatusCode, body: &Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let content_type = Header::from_str("Content-Type: application/json; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn send_text(request: tiny_http::Request, status: StatusCode, body: &str) -> Result<()> {
    let content_type = Header::from_str("Content-Type: text/plain; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_string(body.to_string())
            .with_status_code(status)
            .with_header(content_type),
    )?;
    Ok(())
}

fn split_path_query(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

/// Bell keys on disk are Turkish, so clients send them percent-encoded in the path.
fn decode_segment(segment: &str) -> Result<Cow<'_, str>, ApiResponse> {
    urlencoding::decode(segment).map_err(|err| {
        ApiResponse::error(400, format!("path segment is not valid UTF-8: {err}"))
    })
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || is_ipv4_mapped_local(v6)
        }
    }
}

fn is_ipv4_mapped_local(v6: Ipv6Addr) -> bool {
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::net::{Ipv4Addr, TcpStream};
    use std::sync::Mutex;

    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::bell::model::AppSnapshot;
    use crate::bell::scheduler::BellScheduler;
    use crate::playback::testing::RecordingPort;
    use crate::store::DATA_FILE_NAME;
    use crate::time_provider::testing::FixedTimeProvider;

    fn monday(hour: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .expect("date")
            .and_hms_opt(hour, min, 0)
            .expect("time")
    }

    fn context_at(dir: &TempDir, now: NaiveDateTime) -> ApiContext<RecordingPort> {
        let mut snapshot = AppSnapshot::default();
        snapshot.bell_sound_paths.set(BellType::Entry, "/sounds/entry.mp3");
        ApiContext {
            scheduler: Arc::new(Mutex::new(BellScheduler::new_with_now(
                snapshot,
                RecordingPort::default(),
                now,
            ))),
            store: SnapshotStore::new(dir.path().join(DATA_FILE_NAME)),
            indicator: SharedIndicator::default(),
            sirens_dir: PathBuf::from("/sirens"),
            clock: Box::new(FixedTimeProvider(now)),
        }
    }

    fn json_body(response: &ApiResponse) -> &Value {
        match &response.body {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => panic!("expected JSON, got text: {text}"),
        }
    }

    #[test]
    fn local_network_ip_filter_accepts_private_and_loopback() {
        assert!(is_local_network_ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
        assert!(is_local_network_ip(IpAddr::V4(Ipv4Addr::new(
            192, 168, 1, 44
        ))));
        assert!(is_local_network_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(!is_local_network_ip(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn lesson_time_edit_updates_schedule() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(&dir, monday(7, 0));
        let body = r#"{"day":"Pazartesi","session":"Sabah","lesson":"1.Ders","bell_type":"İçeri","time":"08:00"}"#;

        let response = route(&Method::Post, "/v1/lesson-time", body, &context);
        assert_eq!(response.status, 200);

        let schedule = route(&Method::Get, "/v1/schedule", "", &context);
        assert_eq!(
            json_body(&schedule)["lesson_times"]["Pazartesi"]["Sabah"]["1.Ders"]["İçeri"],
            Value::String("08:00".to_string())
        );

        let status = route(&Method::Get, "/v1/status", "", &context);
        assert_eq!(
            json_body(&status)["next_bell"]["time"],
            Value::String("08:00".to_string())
        );
        assert_eq!(json_body(&status)["weekday"], Value::String("Pazartesi".to_string()));
    }

    #[test]
    fn status_reports_last_fired_sound_and_rung_date() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(&dir, monday(8, 0));

        let before = route(&Method::Get, "/v1/status", "", &context);
        assert_eq!(json_body(&before)["rung_date"], Value::String("2026-03-02".to_string()));
        assert_eq!(json_body(&before)["rung_today"], Value::from(0));
        assert_eq!(json_body(&before)["last_fired_sound"], Value::Null);

        {
            let mut scheduler = lock_scheduler(&context.scheduler);
            let slot = BellSlot {
                day: chrono::Weekday::Mon,
                session: Session::Morning,
                lesson: LessonSlot::new(1).expect("lesson"),
                bell: BellType::Entry,
            };
            scheduler.set_lesson_time(slot, "08:00");
            assert_eq!(scheduler.tick(monday(8, 0)).rung, 1);
        }

        let after = route(&Method::Get, "/v1/status", "", &context);
        let body = json_body(&after);
        assert_eq!(body["rung_today"], Value::from(1));
        assert_eq!(
            body["last_fired_sound"],
            Value::String("/sounds/entry.mp3".to_string())
        );
        assert_eq!(body["last_fired"]["time"], Value::String("08:00".to_string()));
    }

    #[test]
    fn lesson_time_edit_rejects_bad_keys_and_shapes() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(&dir, monday(7, 0));
        let bad_time = r#"{"day":"monday","session":"morning","lesson":"1","bell_type":"entry","time":"8:00"}"#;
        let bad_day = r#"{"day":"Funday","session":"morning","lesson":"1","bell_type":"entry","time":"08:00"}"#;
        let bad_lesson = r#"{"day":"monday","session":"morning","lesson":"12","bell_type":"entry","time":"08:00"}"#;

        for body in [bad_time, bad_day, bad_lesson, "not json"] {
            let response = route(&Method::Post, "/v1/lesson-time", body, &context);
            assert_eq!(response.status, 400, "body {body}");
        }
        let clear = r#"{"day":"monday","session":"morning","lesson":"1","bell_type":"entry","time":""}"#;
        assert_eq!(route(&Method::Post, "/v1/lesson-time", clear, &context).status, 200);
        assert_eq!(
            lock_scheduler(&context.scheduler)
                .snapshot()
                .lesson_times
                .populated_count(),
            0
        );
    }

    #[test]
    fn settings_commit_applies_and_persists() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(&dir, monday(7, 0));
        let body = r#"{"school_name":"Atatürk Ortaokulu","bell_sound_paths":{"Teneffüs":"/sounds/break.mp3"}}"#;

        let response = route(&Method::Post, "/v1/settings", body, &context);
        assert_eq!(response.status, 200);

        let loaded = context.store.load();
        assert_eq!(loaded.snapshot.school_name, "Atatürk Ortaokulu");
        assert_eq!(
            loaded.snapshot.bell_sound_paths.get(BellType::Break),
            Some("/sounds/break.mp3")
        );
        assert_eq!(
            loaded.snapshot.bell_sound_paths.get(BellType::Entry),
            Some("/sounds/entry.mp3")
        );

        let unknown = r#"{"bell_sound_paths":{"Zil":"/x.mp3"}}"#;
        assert_eq!(route(&Method::Post, "/v1/settings", unknown, &context).status, 400);
    }

    #[test]
    fn failed_save_reports_error_and_keeps_edits() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file").expect("write blocker");
        let mut context = context_at(&dir, monday(7, 0));
        context.store = SnapshotStore::new(blocker.join(DATA_FILE_NAME));

        let response = route(
            &Method::Post,
            "/v1/settings",
            r#"{"school_name":"Yeni Okul"}"#,
            &context,
        );
        assert_eq!(response.status, 500);
        assert_eq!(
            lock_scheduler(&context.scheduler).snapshot().school_name,
            "Yeni Okul"
        );
    }

    #[test]
    fn manual_ring_special_and_stop_reach_the_port() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(&dir, monday(7, 0));

        assert_eq!(route(&Method::Post, "/v1/ring/entry", "", &context).status, 200);
        assert_eq!(
            route(&Method::Post, "/v1/ring/%C4%B0%C3%A7eri", "", &context).status,
            200
        );
        assert_eq!(route(&Method::Post, "/v1/ring/break", "", &context).status, 409);
        assert_eq!(route(&Method::Post, "/v1/ring/bogus", "", &context).status, 400);

        let special = route(&Method::Post, "/v1/special/fire", "", &context);
        assert_eq!(special.status, 200);
        assert_eq!(
            json_body(&special)["path"],
            Value::String("/sirens/yangın.mp3".to_string())
        );
        assert_eq!(route(&Method::Post, "/v1/special/tornado", "", &context).status, 400);
        assert_eq!(route(&Method::Post, "/v1/stop", "", &context).status, 200);

        let scheduler = lock_scheduler(&context.scheduler);
        assert_eq!(scheduler.port().played.len(), 3);
        assert_eq!(scheduler.port().stops, 1);
        assert!(scheduler.rung().is_empty());
    }

    #[test]
    fn wrong_method_and_unknown_paths() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(&dir, monday(7, 0));
        assert_eq!(route(&Method::Post, "/healthz", "", &context).status, 405);
        assert_eq!(route(&Method::Get, "/v1/save", "", &context).status, 405);
        assert_eq!(route(&Method::Get, "/nope", "", &context).status, 404);
        assert_eq!(
            route(&Method::Get, "/healthz", "", &context).body,
            ResponseBody::Text("ok".to_string())
        );
    }

    #[test]
    fn percent_encoded_turkish_bell_keys_resolve() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(&dir, monday(7, 0));

        // Break bell has no sound in this context, so a resolved key yields 409.
        let response = route(&Method::Post, "/v1/ring/Teneff%C3%BCs", "", &context);
        assert_eq!(response.status, 409);
        assert!(
            json_body(&response)["error"]
                .as_str()
                .is_some_and(|message| message.contains("Teneffüs"))
        );
        assert_eq!(
            route(&Method::Post, "/v1/ring/%C3%96%C4%9Fretmenler", "", &context).status,
            409
        );
        assert_eq!(route(&Method::Post, "/v1/ring/Tenef%C3%BCs", "", &context).status, 400);
        assert_eq!(route(&Method::Post, "/v1/special/fi%72e", "", &context).status, 200);
    }

    #[test]
    fn invalid_utf8_path_segment_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(&dir, monday(7, 0));

        let response = route(&Method::Post, "/v1/ring/%FF", "", &context);
        assert_eq!(response.status, 400);
        assert!(
            json_body(&response)["error"]
                .as_str()
                .is_some_and(|message| message.contains("UTF-8"))
        );
        assert_eq!(route(&Method::Post, "/v1/special/%C3", "", &context).status, 400);

        let scheduler = lock_scheduler(&context.scheduler);
        assert!(scheduler.port().played.is_empty());
        assert_eq!(scheduler.port().fired, 0);
    }

    #[test]
    fn server_answers_health_over_http() {
        let dir = tempdir().expect("tempdir");
        let context = context_at(&dir, monday(7, 0));
        let server = ApiServer::start(
            &ApiServerConfig {
                bind_addr: "127.0.0.1".to_string(),
                port: 0,
            },
            context,
        )
        .expect("start server");
        let addr = server.local_addr().expect("bound address");

        let mut stream = TcpStream::connect(addr).expect("connect");
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .expect("write request");
        let mut response = String::new();
        stream.read_to_string(&mut response).expect("read response");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));
    }
}
