//! In-process fake of the remote storage API and its token endpoint.
#![allow(dead_code)]

use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use media_uploader::{
    models::{
        credential::Credential,
        outcome::{Phase, TransferOutcome},
    },
    services::{
        api_client::ApiClient,
        auth::Authenticator,
        chunked_upload::{ChunkedUploadClient, DEFAULT_CHUNKED_THRESHOLD},
        digest::ContentDigest,
        orchestrator::{UploadOptions, UploadOrchestrator},
        resume_store::SqliteResumeStore,
        retry::RetryPolicy,
        telemetry::TransferReporter,
        transport::AuthenticatedTransport,
    },
};
use serde_json::{Value, json};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

pub const ROOT_FOLDER: &str = "0";

#[derive(Debug, Clone)]
pub struct FolderRec {
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileRec {
    pub name: String,
    pub parent: String,
    pub size: u64,
    pub sha1: String,
}

#[derive(Debug, Clone)]
pub struct SessionRec {
    pub name: String,
    pub folder_id: String,
    pub size: u64,
    pub content_ranges: Vec<String>,
    pub aborted: bool,
}

#[derive(Default)]
pub struct RemoteState {
    next_id: u64,
    valid_tokens: HashSet<String>,

    pub token_requests: Vec<HashMap<String, String>>,
    pub token_failure: Option<StatusCode>,
    /// Reject every bearer token, even freshly issued ones.
    pub always_unauthorized: bool,
    /// Omit folders from listings so creation runs into name conflicts.
    pub hide_folder_listings: bool,

    pub folders: HashMap<String, FolderRec>,
    pub files: HashMap<String, FileRec>,
    pub sessions: HashMap<String, SessionRec>,
    pub part_size: u64,

    pub part_failures: VecDeque<StatusCode>,
    pub upload_failures: VecDeque<StatusCode>,
    /// Commits answered with 202 before one succeeds.
    pub commit_processing: u32,
    /// Reported instead of the real part count on session create.
    pub session_total_parts: Option<u64>,
    /// Status returned by `GET /files/{id}` instead of the file.
    pub file_lookup_failure: Option<StatusCode>,
    /// Hold `GET /folders/{id}` this long before answering.
    pub folder_delay: Option<Duration>,

    pub api_requests: u32,
    pub unauthorized_responses: u32,
    pub folder_creates: u32,
    pub simple_uploads: u32,
    pub part_requests: u32,
    pub part_uploads: u32,
    pub commit_requests: u32,
    pub commits: u32,
    pub aborts: u32,
    pub collaborations: Vec<(String, String, String)>,
}

impl RemoteState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    /// Invalidate every issued token; the next API call gets a 401.
    pub fn revoke_tokens(&mut self) {
        self.valid_tokens.clear();
    }

    pub fn child_folder(&self, parent: &str, name: &str) -> Option<String> {
        self.folders
            .iter()
            .find(|(_, f)| f.parent.as_deref() == Some(parent) && f.name == name)
            .map(|(id, _)| id.clone())
    }

    /// Folder id at `segments` below the root, if the whole path exists.
    pub fn folder_at(&self, segments: &[&str]) -> Option<String> {
        let mut current = ROOT_FOLDER.to_string();
        for segment in segments {
            current = self.child_folder(&current, segment)?;
        }
        Some(current)
    }

    fn file_named(&self, parent: &str, name: &str) -> Option<(String, FileRec)> {
        self.files
            .iter()
            .find(|(_, f)| f.parent == parent && f.name == name)
            .map(|(id, f)| (id.clone(), f.clone()))
    }
}

pub type Shared = Arc<Mutex<RemoteState>>;

fn error(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(json!({
            "type": "error",
            "status": status.as_u16(),
            "code": code,
            "message": code.replace('_', " "),
            "request_id": "req-1",
        })),
    )
        .into_response()
}

fn conflict(conflicts: Value) -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({
            "type": "error",
            "status": 409,
            "code": "item_name_in_use",
            "message": "Item with the same name already exists",
            "context_info": { "conflicts": conflicts },
        })),
    )
        .into_response()
}

fn authorize(state: &mut RemoteState, headers: &HeaderMap) -> Result<(), Response> {
    state.api_requests += 1;
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match token {
        Some(token) if !state.always_unauthorized && state.valid_tokens.contains(token) => Ok(()),
        _ => {
            state.unauthorized_responses += 1;
            Err(error(StatusCode::UNAUTHORIZED, "unauthorized"))
        }
    }
}

fn folder_json(id: &str, folder: &FolderRec) -> Value {
    json!({
        "type": "folder",
        "id": id,
        "name": folder.name,
        "parent": folder.parent.as_ref().map(|p| json!({ "type": "folder", "id": p })),
    })
}

fn file_json(id: &str, file: &FileRec) -> Value {
    json!({
        "type": "file",
        "id": id,
        "name": file.name,
        "size": file.size,
        "sha1": file.sha1,
        "parent": { "type": "folder", "id": file.parent },
        "created_at": "2024-03-10T12:00:00Z",
    })
}

fn file_conflict_entry(id: &str, file: &FileRec) -> Value {
    json!({
        "type": "file",
        "id": id,
        "name": file.name,
        "size": file.size,
        "sha1": file.sha1,
    })
}

async fn token(State(shared): State<Shared>, Form(form): Form<HashMap<String, String>>) -> Response {
    let mut state = shared.lock().unwrap();
    state.token_requests.push(form.clone());
    if let Some(status) = state.token_failure {
        return (status, Json(json!({ "error": "invalid_grant" }))).into_response();
    }

    let access_token = state.next("tok-");
    state.valid_tokens.insert(access_token.clone());
    let mut body = json!({
        "access_token": access_token,
        "expires_in": 3600,
        "token_type": "bearer",
    });
    if form.get("grant_type").map(String::as_str) == Some("refresh_token") {
        body["refresh_token"] = json!(format!("refresh-{access_token}"));
    }
    Json(body).into_response()
}

async fn get_folder(
    State(shared): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let delay = shared.lock().unwrap().folder_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let mut state = shared.lock().unwrap();
    if let Err(rejected) = authorize(&mut state, &headers) {
        return rejected;
    }
    match state.folders.get(&id) {
        Some(folder) => Json(folder_json(&id, folder)).into_response(),
        None => error(StatusCode::NOT_FOUND, "not_found"),
    }
}

async fn list_items(
    State(shared): State<Shared>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut state = shared.lock().unwrap();
    if let Err(rejected) = authorize(&mut state, &headers) {
        return rejected;
    }
    if !state.folders.contains_key(&id) {
        return error(StatusCode::NOT_FOUND, "not_found");
    }

    let mut entries = Vec::new();
    if !state.hide_folder_listings {
        let mut folders = state
            .folders
            .iter()
            .filter(|(_, f)| f.parent.as_deref() == Some(id.as_str()))
            .collect::<Vec<_>>();
        folders.sort_by(|a, b| a.0.cmp(b.0));
        entries.extend(folders.into_iter().map(|(fid, f)| folder_json(fid, f)));
    }
    let mut files = state
        .files
        .iter()
        .filter(|(_, f)| f.parent == id)
        .collect::<Vec<_>>();
    files.sort_by(|a, b| a.0.cmp(b.0));
    entries.extend(files.into_iter().map(|(fid, f)| file_json(fid, f)));

    let limit = query
        .get("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(100);
    let offset = query
        .get("offset")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let total = entries.len();
    let page = entries.into_iter().skip(offset).take(limit).collect::<Vec<_>>();
    Json(json!({
        "total_count": total,
        "entries": page,
        "offset": offset,
        "limit": limit,
    }))
    .into_response()
}

async fn create_folder(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = shared.lock().unwrap();
    if let Err(rejected) = authorize(&mut state, &headers) {
        return rejected;
    }
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let parent = body["parent"]["id"].as_str().unwrap_or_default().to_string();
    if !state.folders.contains_key(&parent) {
        return error(StatusCode::NOT_FOUND, "not_found");
    }
    if let Some(existing) = state.child_folder(&parent, &name) {
        return conflict(json!([{ "type": "folder", "id": existing, "name": name }]));
    }

    let id = state.next("folder-");
    let folder = FolderRec {
        name,
        parent: Some(parent),
    };
    let body = folder_json(&id, &folder);
    state.folders.insert(id, folder);
    state.folder_creates += 1;
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn get_file(
    State(shared): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut state = shared.lock().unwrap();
    if let Err(rejected) = authorize(&mut state, &headers) {
        return rejected;
    }
    if let Some(status) = state.file_lookup_failure {
        return error(status, "injected_failure");
    }
    match state.files.get(&id) {
        Some(file) => Json(file_json(&id, file)).into_response(),
        None => error(StatusCode::NOT_FOUND, "not_found"),
    }
}

async fn upload_content(
    State(shared): State<Shared>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let rejected = {
        let mut state = shared.lock().unwrap();
        match authorize(&mut state, &headers) {
            Err(rejected) => Some(rejected),
            Ok(()) => state
                .upload_failures
                .pop_front()
                .map(|status| error(status, "injected_failure")),
        }
    };
    if let Some(rejected) = rejected {
        return rejected;
    }

    let mut attributes = Value::Null;
    let mut content = Bytes::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let data = field.bytes().await.unwrap_or_default();
        match name.as_str() {
            "attributes" => attributes = serde_json::from_slice(&data).unwrap_or(Value::Null),
            "file" => content = data,
            _ => {}
        }
    }

    let name = attributes["name"].as_str().unwrap_or_default().to_string();
    let parent = attributes["parent"]["id"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    if name.is_empty() || content.is_empty() {
        return error(StatusCode::BAD_REQUEST, "bad_request");
    }

    let mut state = shared.lock().unwrap();
    if !state.folders.contains_key(&parent) {
        return error(StatusCode::NOT_FOUND, "not_found");
    }
    if let Some((id, existing)) = state.file_named(&parent, &name) {
        return conflict(file_conflict_entry(&id, &existing));
    }

    let id = state.next("file-");
    let file = FileRec {
        name,
        parent,
        size: content.len() as u64,
        sha1: ContentDigest::of(&content).to_hex(),
    };
    let body = json!({ "total_count": 1, "entries": [file_json(&id, &file)] });
    state.files.insert(id, file);
    state.simple_uploads += 1;
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn create_session(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = shared.lock().unwrap();
    if let Err(rejected) = authorize(&mut state, &headers) {
        return rejected;
    }
    let folder_id = body["folder_id"].as_str().unwrap_or_default().to_string();
    let name = body["file_name"].as_str().unwrap_or_default().to_string();
    let size = body["file_size"].as_u64().unwrap_or_default();
    if !state.folders.contains_key(&folder_id) {
        return error(StatusCode::NOT_FOUND, "not_found");
    }
    if let Some((id, existing)) = state.file_named(&folder_id, &name) {
        return conflict(file_conflict_entry(&id, &existing));
    }

    let id = state.next("session-");
    let part_size = state.part_size;
    let total_parts = state
        .session_total_parts
        .unwrap_or_else(|| size.div_ceil(part_size));
    state.sessions.insert(
        id.clone(),
        SessionRec {
            name,
            folder_id,
            size,
            content_ranges: Vec::new(),
            aborted: false,
        },
    );
    (
        StatusCode::CREATED,
        Json(json!({
            "id": id,
            "type": "upload_session",
            "part_size": part_size,
            "total_parts": total_parts,
            "num_parts_processed": 0,
            "session_expires_at": "2099-01-01T00:00:00Z",
        })),
    )
        .into_response()
}

fn parse_range(value: &str) -> Option<(u64, u64, u64)> {
    let rest = value.strip_prefix("bytes ")?;
    let (range, total) = rest.split_once('/')?;
    let (first, last) = range.split_once('-')?;
    Some((first.parse().ok()?, last.parse().ok()?, total.parse().ok()?))
}

async fn upload_part(
    State(shared): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = shared.lock().unwrap();
    if let Err(rejected) = authorize(&mut state, &headers) {
        return rejected;
    }
    state.part_requests += 1;
    if let Some(status) = state.part_failures.pop_front() {
        return error(status, "injected_failure");
    }

    let digest = ContentDigest::of(&body);
    let sent_digest = headers.get("digest").and_then(|v| v.to_str().ok());
    if sent_digest != Some(digest.header_value().as_str()) {
        return error(StatusCode::BAD_REQUEST, "digest_mismatch");
    }
    let Some(range) = headers
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return error(StatusCode::BAD_REQUEST, "missing_range");
    };
    let Some((first, last, total)) = parse_range(&range) else {
        return error(StatusCode::BAD_REQUEST, "bad_range");
    };

    let Some(session) = state.sessions.get_mut(&id) else {
        return error(StatusCode::NOT_FOUND, "not_found");
    };
    if session.aborted || total != session.size || last + 1 - first != body.len() as u64 {
        return error(StatusCode::RANGE_NOT_SATISFIABLE, "bad_range");
    }
    session.content_ranges.push(range);
    state.part_uploads += 1;

    Json(json!({
        "part": {
            "part_id": format!("{:08X}", first),
            "offset": first,
            "size": body.len(),
            "sha1": digest.to_hex(),
        }
    }))
    .into_response()
}

async fn commit_session(
    State(shared): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = shared.lock().unwrap();
    if let Err(rejected) = authorize(&mut state, &headers) {
        return rejected;
    }
    state.commit_requests += 1;
    if state.commit_processing > 0 {
        state.commit_processing -= 1;
        return (StatusCode::ACCEPTED, [(header::RETRY_AFTER, "0")]).into_response();
    }

    let Some(session) = state.sessions.get(&id).cloned() else {
        return error(StatusCode::NOT_FOUND, "not_found");
    };
    if session.aborted {
        return error(StatusCode::NOT_FOUND, "not_found");
    }

    let mut expected = 0u64;
    for part in body["parts"].as_array().cloned().unwrap_or_default() {
        if part["offset"].as_u64() != Some(expected) {
            return error(StatusCode::BAD_REQUEST, "invalid_parts");
        }
        expected += part["size"].as_u64().unwrap_or_default();
    }
    if expected != session.size {
        return error(StatusCode::BAD_REQUEST, "invalid_parts");
    }

    let Some(sha1) = headers
        .get("digest")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("sha="))
        .and_then(|v| STANDARD.decode(v).ok())
        .map(|raw| raw.iter().map(|b| format!("{b:02x}")).collect::<String>())
    else {
        return error(StatusCode::BAD_REQUEST, "missing_digest");
    };

    let name = body["attributes"]["name"]
        .as_str()
        .map(str::to_string)
        .unwrap_or(session.name);
    let file_id = state.next("file-");
    let file = FileRec {
        name,
        parent: session.folder_id,
        size: session.size,
        sha1,
    };
    let response = json!({ "total_count": 1, "entries": [file_json(&file_id, &file)] });
    state.files.insert(file_id, file);
    state.sessions.remove(&id);
    state.commits += 1;
    (StatusCode::CREATED, Json(response)).into_response()
}

async fn abort_session(
    State(shared): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut state = shared.lock().unwrap();
    if let Err(rejected) = authorize(&mut state, &headers) {
        return rejected;
    }
    match state.sessions.get_mut(&id) {
        Some(session) => {
            session.aborted = true;
            state.aborts += 1;
            StatusCode::NO_CONTENT.into_response()
        }
        None => error(StatusCode::NOT_FOUND, "not_found"),
    }
}

async fn collaborate(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = shared.lock().unwrap();
    if let Err(rejected) = authorize(&mut state, &headers) {
        return rejected;
    }
    let folder = body["item"]["id"].as_str().unwrap_or_default().to_string();
    let login = body["accessible_by"]["login"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let role = body["role"].as_str().unwrap_or_default().to_string();
    if state
        .collaborations
        .iter()
        .any(|(f, l, _)| *f == folder && *l == login)
    {
        return error(StatusCode::BAD_REQUEST, "user_already_collaborator");
    }
    state.collaborations.push((folder, login, role));
    let id = state.next("collab-");
    (
        StatusCode::CREATED,
        Json(json!({ "type": "collaboration", "id": id })),
    )
        .into_response()
}

pub struct FakeRemote {
    pub url: String,
    shared: Shared,
}

impl FakeRemote {
    pub async fn start() -> Self {
        let mut state = RemoteState {
            part_size: 8 * 1024 * 1024,
            ..Default::default()
        };
        state.folders.insert(
            ROOT_FOLDER.to_string(),
            FolderRec {
                name: "All Files".into(),
                parent: None,
            },
        );
        let shared: Shared = Arc::new(Mutex::new(state));

        let app = Router::new()
            .route("/oauth2/token", post(token))
            .route("/folders", post(create_folder))
            .route("/folders/{id}", get(get_folder))
            .route("/folders/{id}/items", get(list_items))
            .route("/files/content", post(upload_content))
            .route("/files/upload_sessions", post(create_session))
            .route(
                "/files/upload_sessions/{id}",
                put(upload_part).delete(abort_session),
            )
            .route("/files/upload_sessions/{id}/commit", post(commit_session))
            .route("/files/{id}", get(get_file))
            .route("/collaborations", post(collaborate))
            .layer(DefaultBodyLimit::disable())
            .with_state(shared.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            shared,
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth2/token", self.url)
    }

    pub fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.shared.lock().unwrap()
    }

    /// Create the folder chain below the root; returns the innermost id.
    pub fn add_folders(&self, segments: &[&str]) -> String {
        let mut state = self.state();
        let mut current = ROOT_FOLDER.to_string();
        for segment in segments {
            current = match state.child_folder(&current, segment) {
                Some(id) => id,
                None => {
                    let id = state.next("folder-");
                    state.folders.insert(
                        id.clone(),
                        FolderRec {
                            name: segment.to_string(),
                            parent: Some(current),
                        },
                    );
                    id
                }
            };
        }
        current
    }

    pub fn add_file(&self, folder_id: &str, name: &str, content: &[u8]) -> String {
        let mut state = self.state();
        let id = state.next("file-");
        state.files.insert(
            id.clone(),
            FileRec {
                name: name.into(),
                parent: folder_id.into(),
                size: content.len() as u64,
                sha1: ContentDigest::of(content).to_hex(),
            },
        );
        id
    }
}

pub fn refresh_credential() -> Credential {
    Credential {
        client_id: "client".into(),
        client_secret: "secret".into(),
        refresh_token: Some("refresh-0".into()),
        ..Default::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        rate_limit_delay: Duration::from_millis(20),
    }
}

pub fn transport(remote: &FakeRemote) -> AuthenticatedTransport {
    let http = reqwest::Client::new();
    let auth = Authenticator::new(http.clone(), remote.token_url(), refresh_credential()).unwrap();
    AuthenticatedTransport::new(http, Arc::new(auth))
}

pub async fn memory_store() -> Arc<SqliteResumeStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteResumeStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    Arc::new(store)
}

#[derive(Default)]
pub struct RecordingReporter {
    pub phases: Mutex<Vec<(String, Phase)>>,
    pub outcomes: Mutex<Vec<TransferOutcome>>,
}

impl RecordingReporter {
    pub fn phases_for(&self, logical_id: &str) -> Vec<Phase> {
        self.phases
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == logical_id)
            .map(|(_, phase)| *phase)
            .collect()
    }
}

impl TransferReporter for RecordingReporter {
    fn phase(&self, logical_id: &str, phase: Phase) {
        self.phases.lock().unwrap().push((logical_id.into(), phase));
    }

    fn outcome(&self, outcome: &TransferOutcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }
}

/// Knobs applied before the orchestrator is built.
pub struct Setup {
    pub chunked_threshold: u64,
    pub options: UploadOptions,
}

pub struct Harness {
    pub remote: FakeRemote,
    pub orchestrator: UploadOrchestrator,
    pub store: Arc<SqliteResumeStore>,
    pub reporter: Arc<RecordingReporter>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub async fn start(configure: impl FnOnce(&mut Setup)) -> Self {
        let remote = FakeRemote::start().await;
        let transport = transport(&remote);

        let mut setup = Setup {
            chunked_threshold: DEFAULT_CHUNKED_THRESHOLD,
            options: UploadOptions::new(ROOT_FOLDER),
        };
        setup.options.commit_poll_delay = Duration::from_millis(10);
        configure(&mut setup);
        let Setup {
            chunked_threshold,
            options,
        } = setup;

        let api = ApiClient::new(transport.clone(), remote.url.clone(), remote.url.clone());
        let chunked = ChunkedUploadClient::new(
            transport,
            remote.url.clone(),
            fast_retry(),
            chunked_threshold,
        );
        let store = memory_store().await;
        let reporter = Arc::new(RecordingReporter::default());
        let orchestrator = UploadOrchestrator::new(
            api,
            chunked,
            store.clone(),
            reporter.clone(),
            options,
        );

        Self {
            remote,
            orchestrator,
            store,
            reporter,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Write `size` bytes of `seed`-dependent content at
    /// `<tmp>/<owner>/<year>/<month>/<day>/<name>`.
    pub fn media_file(&self, relative: &str, size: usize, seed: u8) -> PathBuf {
        let path = self.dir.path().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, pattern(size, seed)).unwrap();
        path
    }
}

pub fn pattern(size: usize, seed: u8) -> Vec<u8> {
    (0..size)
        .map(|i| (i % 251) as u8 ^ seed)
        .collect::<Vec<_>>()
}
