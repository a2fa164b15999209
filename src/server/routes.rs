//! API request handlers
//!
//! | Method   | Path               | Class | Notes                               |
//! |----------|--------------------|-------|-------------------------------------|
//! | `POST`   | `/api/text`        | write | JSON `{"content": "..."}`           |
//! | `GET`    | `/api/text/{id}`   | read  | gated by the abuse guard            |
//! | `POST`   | `/api/file?name=`  | write | raw body, `Content-Type` kept       |
//! | `GET`    | `/api/file/{id}`   | read  | served as an attachment             |
//! | `DELETE` | `/api/{id}`        | other | idempotent, misses count as failures |
//! | `GET`    | `/api/cleanup`     | other | runs a store sweep now              |
//!
//! Every route except `/healthz` passes the rate limiter and then the abuse
//! guard; a blocked client gets 400 everywhere.
//! | `GET`    | `/healthz`         | -     | liveness                            |

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::client_ip::client_identity;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::guard::{AbuseGuard, OperationClass, RateLimiter, Rejection, Verdict};
use crate::metrics::ServiceMetrics;
use crate::reaper::Reaper;
use crate::store::id::is_well_formed;
use crate::store::{BlobHandle, FileRef, Item, ItemKind, ObjectStore, Payload};

pub type ApiResponse = Response<Full<Bytes>>;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// =============================================================================
// Shared State
// =============================================================================

/// Everything a request handler needs
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<ObjectStore>,
    pub limiter: Arc<RateLimiter>,
    pub guard: Arc<AbuseGuard>,
    pub reaper: Arc<Reaper>,
    pub metrics: Arc<ServiceMetrics>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Charge one operation against the client's rate window
    fn admit(&self, client: &str, class: OperationClass) -> Result<()> {
        let decision = self.limiter.check(client, class);
        if !decision.is_allowed() {
            debug!(
                client,
                %class,
                ceiling = self.limiter.config().ceiling(class),
                "rate limited"
            );
            self.metrics.record_rate_limited(class);
        }
        decision.into_result(class)
    }

    fn screen(&self, verdict: Verdict) -> Result<()> {
        if let Verdict::Reject(rejection) = &verdict {
            self.metrics.record_rejection(rejection);
        }
        verdict.into_result()
    }

    /// Look up a live item and log the access. Malformed ids never reach
    /// the store but still count as a failed lookup.
    fn lookup(&self, client: &str, id: &str, kind: ItemKind) -> Result<Arc<Item>> {
        let lookup = if is_well_formed(id) {
            self.store.get_kind(id, kind)
        } else {
            Err(Error::NotFound)
        };
        self.guard.log_access(client, id, kind, lookup.is_ok());
        self.metrics.record_lookup(kind, lookup.is_ok());
        lookup
    }

    /// Read a request body up to `limit`. An oversized body counts as a failure.
    async fn read_body<B>(&self, client: &str, body: B, limit: usize) -> Result<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match read_body(body, limit).await {
            Err(e @ Error::PayloadTooLarge { .. }) => {
                self.guard.record_failure(client, "oversized request body");
                Err(e)
            }
            other => other,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct SaveTextRequest {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveTextResponse {
    id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetTextResponse {
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveFileResponse {
    id: String,
    file_name: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanupResponse {
    removed_count: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

// =============================================================================
// Router
// =============================================================================

/// Route one request. Never fails: errors become JSON error responses.
pub async fn handle<B>(state: Arc<AppState>, req: Request<B>, peer: SocketAddr) -> ApiResponse
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let client = client_identity(&parts.headers, peer, state.config.trust_proxy_headers);
    let path = parts.uri.path().to_owned();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let result = match (&parts.method, segments.as_slice()) {
        (&Method::GET, ["healthz"]) => Ok(plain(StatusCode::OK, "ok")),
        (&Method::POST, ["api", "text"]) => save_text(&state, &client, body).await,
        (&Method::GET, ["api", "text", id]) => get_text(&state, &client, id),
        (&Method::POST, ["api", "file"]) => {
            save_file(&state, &client, parts.uri.query(), &parts.headers, body).await
        }
        (&Method::GET, ["api", "file", id]) => get_file(&state, &client, id).await,
        (&Method::GET, ["api", "cleanup"]) => cleanup(&state, &client).await,
        (&Method::DELETE, ["api", id]) => delete(&state, &client, id),
        (&Method::OPTIONS, _) => Ok(preflight()),
        _ => Ok(plain(StatusCode::NOT_FOUND, "not found")),
    };

    let mut response = result.unwrap_or_else(|e| error_response(&e));
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

// =============================================================================
// Handlers
// =============================================================================

async fn save_text<B>(state: &AppState, client: &str, body: B) -> Result<ApiResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    state.admit(client, OperationClass::Write)?;

    // JSON escaping can expand content up to six bytes per character
    let limit = state
        .guard
        .config()
        .max_content_bytes
        .saturating_mul(6)
        .saturating_add(1024);
    let raw = state.read_body(client, body, limit).await?;
    let request: SaveTextRequest = serde_json::from_slice(&raw)?;

    state.screen(state.guard.validate_content(client, &request.content))?;

    let item = state
        .store
        .put_item(Payload::Text(request.content), state.config.default_ttl())?;
    state.metrics.record_stored(ItemKind::Text);

    json(
        StatusCode::OK,
        &SaveTextResponse {
            id: item.id().to_owned(),
            expires_at: item.expires_at(),
        },
    )
}

fn get_text(state: &AppState, client: &str, id: &str) -> Result<ApiResponse> {
    state.admit(client, OperationClass::Read)?;
    state.screen(state.guard.validate_access(client))?;

    let item = state.lookup(client, id, ItemKind::Text)?;
    json(
        StatusCode::OK,
        &GetTextResponse {
            content: item.text().unwrap_or_default().to_owned(),
            created_at: item.created_at(),
        },
    )
}

async fn save_file<B>(
    state: &AppState,
    client: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: B,
) -> Result<ApiResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    state.admit(client, OperationClass::Write)?;
    state.screen(state.guard.validate_access(client))?;

    let name = query.and_then(|q| query_param(q, "name")).unwrap_or_default();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_owned();

    state.screen(state.guard.validate_file_metadata(&name, &content_type))?;

    let limit = usize::try_from(state.config.max_file_bytes).unwrap_or(usize::MAX);
    let data = state.read_body(client, body, limit).await?;
    if data.is_empty() {
        state.screen(Verdict::Reject(Rejection::EmptyFile))?;
    }
    let size = data.len() as u64;

    let blobs = Arc::clone(state.store.blobs());
    let handle = tokio::task::spawn_blocking(move || blobs.write(data))
        .await
        .map_err(|e| Error::Internal(format!("blob write task failed: {}", e)))??;

    let payload = Payload::File(FileRef {
        handle: handle.clone(),
        name: name.clone(),
        content_type,
        size,
    });
    let item = match state.store.put_item(payload, state.config.default_ttl()) {
        Ok(item) => item,
        Err(e) => {
            release_orphan(state, handle).await;
            return Err(e);
        }
    };
    state.metrics.record_stored(ItemKind::File);

    json(
        StatusCode::OK,
        &SaveFileResponse {
            id: item.id().to_owned(),
            file_name: name,
            expires_at: item.expires_at(),
        },
    )
}

async fn get_file(state: &AppState, client: &str, id: &str) -> Result<ApiResponse> {
    state.admit(client, OperationClass::Read)?;
    state.screen(state.guard.validate_access(client))?;

    let item = state.lookup(client, id, ItemKind::File)?;
    let file = item
        .file()
        .ok_or_else(|| Error::Internal(format!("item {} has no file body", id)))?
        .clone();

    // A delete or sweep landing after the lookup leaves no body: NotFound
    let blobs = Arc::clone(state.store.blobs());
    let handle = file.handle.clone();
    let data = tokio::task::spawn_blocking(move || blobs.read(&handle))
        .await
        .map_err(|e| Error::Internal(format!("blob read task failed: {}", e)))??;

    let mut response = Response::new(Full::new(data));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, header_value(&file.content_type)?);
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&format!(
            "attachment; filename*=UTF-8''{}",
            urlencoding::encode(&file.name)
        ))?,
    );
    Ok(response)
}

fn delete(state: &AppState, client: &str, id: &str) -> Result<ApiResponse> {
    state.admit(client, OperationClass::Other)?;
    state.screen(state.guard.validate_access(client))?;

    let removed = is_well_formed(id) && state.store.delete(id);
    debug!(client, id, removed, "delete");
    if !removed {
        // A miss is a guess at someone else's code
        state
            .guard
            .record_failure(client, &format!("delete of unknown id {}", id));
    }
    Ok(Response::new(Full::new(Bytes::new())))
}

async fn cleanup(state: &AppState, client: &str) -> Result<ApiResponse> {
    state.admit(client, OperationClass::Other)?;
    state.screen(state.guard.validate_access(client))?;

    let reaper = Arc::clone(&state.reaper);
    let now = state.clock.now();
    let report = tokio::task::spawn_blocking(move || reaper.sweep_store(now))
        .await
        .map_err(|e| Error::Internal(format!("sweep task failed: {}", e)))?;

    // A sweep already in flight is doing the work
    let removed_count = report.map(|r| r.removed).unwrap_or_default();
    json(StatusCode::OK, &CleanupResponse { removed_count })
}

// =============================================================================
// Helpers
// =============================================================================

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(Error::PayloadTooLarge { max: limit as u64 })
        }
        Err(e) => Err(Error::Http(format!("failed to read request body: {}", e))),
    }
}

async fn release_orphan(state: &AppState, handle: BlobHandle) {
    let blobs = Arc::clone(state.store.blobs());
    match tokio::task::spawn_blocking(move || blobs.release(&handle)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Failed to release orphaned blob: {}", e),
        Err(e) => error!("Orphaned blob release task failed: {}", e),
    }
}

fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k != key {
            return None;
        }
        urlencoding::decode(&v.replace('+', " "))
            .ok()
            .map(|v| v.into_owned())
    })
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::Http(format!("invalid header value: {}", e)))
}

fn json<T: Serialize>(status: StatusCode, body: &T) -> Result<ApiResponse> {
    let mut response = Response::new(Full::new(Bytes::from(serde_json::to_vec(body)?)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn plain(status: StatusCode, body: &'static str) -> ApiResponse {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn preflight() -> ApiResponse {
    let mut response = plain(StatusCode::NO_CONTENT, "");
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound => StatusCode::NOT_FOUND,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        // Only request bodies are decoded on this path
        Error::Json(_) => StatusCode::BAD_REQUEST,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &Error) -> ApiResponse {
    let status = status_for(err);
    let message = if status.is_server_error() {
        error!("Request failed: {}", err);
        "internal error".to_string()
    } else {
        err.to_string()
    };

    let body = serde_json::to_vec(&ErrorBody { error: message }).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Error::RateLimited { retry_after, .. } = err {
        // Round up so clients never retry inside the window
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
    }
    response
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::guard::{AbuseConfig, RateLimitConfig};
    use crate::reaper::ReaperConfig;
    use crate::store::InMemoryBlobStore;
    use chrono::Duration as ChronoDuration;

    struct Harness {
        state: Arc<AppState>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(rate_limit: RateLimitConfig) -> Harness {
        harness_from(ServerConfig::default(), rate_limit)
    }

    fn harness_from(config: ServerConfig, rate_limit: RateLimitConfig) -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let store = Arc::new(ObjectStore::new(
            Arc::new(InMemoryBlobStore::new()),
            clock.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(rate_limit, clock.clone()));
        let guard = Arc::new(AbuseGuard::new(AbuseConfig::default(), clock.clone()));
        let metrics = Arc::new(ServiceMetrics::new().unwrap());
        let reaper = Reaper::new(
            ReaperConfig::default(),
            store.clone(),
            limiter.clone(),
            guard.clone(),
            metrics.clone(),
            clock.clone(),
        );
        let state = Arc::new(AppState {
            config,
            store,
            limiter,
            guard,
            reaper,
            metrics,
            clock: clock.clone(),
        });
        Harness { state, clock }
    }

    fn harness() -> Harness {
        harness_with(RateLimitConfig::default())
    }

    fn peer() -> SocketAddr {
        "192.0.2.7:50000".parse().unwrap()
    }

    fn request(method: Method, uri: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
        let mut req = Request::new(Full::new(body.into()));
        *req.method_mut() = method;
        *req.uri_mut() = uri.parse().unwrap();
        req
    }

    async fn send(h: &Harness, req: Request<Full<Bytes>>) -> (StatusCode, HeaderMap, Bytes) {
        send_from(h, req, peer()).await
    }

    async fn send_from(
        h: &Harness,
        req: Request<Full<Bytes>>,
        from: SocketAddr,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let response = handle(h.state.clone(), req, from).await;
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        (parts.status, parts.headers, bytes)
    }

    fn json_body(bytes: &Bytes) -> serde_json::Value {
        serde_json::from_slice(bytes).unwrap()
    }

    async fn save_text(h: &Harness, content: &str) -> String {
        let body = serde_json::json!({ "content": content }).to_string();
        let (status, _, bytes) = send(h, request(Method::POST, "/api/text", body)).await;
        assert_eq!(status, StatusCode::OK);
        json_body(&bytes)["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_text_round_trip() {
        let h = harness();
        let id = save_text(&h, "hello").await;

        let (status, headers, bytes) =
            send(&h, request(Method::GET, &format!("/api/text/{}", id), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body = json_body(&bytes);
        assert_eq!(body["content"], "hello");
        assert!(body["createdAt"].is_string());
    }

    #[tokio::test]
    async fn test_expired_text_is_not_found() {
        let h = harness();
        let id = save_text(&h, "short lived").await;

        h.clock.advance(ChronoDuration::hours(25));
        let (status, _, bytes) =
            send(&h, request(Method::GET, &format!("/api/text/{}", id), "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json_body(&bytes)["error"].is_string());
    }

    #[tokio::test]
    async fn test_denied_content_is_bad_request() {
        let h = harness();
        let body = serde_json::json!({ "content": "<script>alert(1)</script>" }).to_string();
        let (status, _, _) = send(&h, request(Method::POST, "/api/text", body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.state.guard.failure_count("192.0.2.7"), 1);
        assert!(h.state.store.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let h = harness();
        let (status, _, _) = send(&h, request(Method::POST, "/api/text", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let h = harness();
        let mut req = request(
            Method::POST,
            "/api/file?name=quarterly%20report.pdf",
            Bytes::from_static(b"%PDF-1.7"),
        );
        req.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/pdf"),
        );
        let (status, _, bytes) = send(&h, req).await;
        assert_eq!(status, StatusCode::OK);
        let body = json_body(&bytes);
        assert_eq!(body["fileName"], "quarterly report.pdf");
        let id = body["id"].as_str().unwrap().to_string();

        let (status, headers, bytes) =
            send(&h, request(Method::GET, &format!("/api/file/{}", id), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&bytes[..], b"%PDF-1.7");
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename*=UTF-8''quarterly%20report.pdf"
        );

        // A file id is not a text id
        let (status, _, _) =
            send(&h, request(Method::GET, &format!("/api/text/{}", id), "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_upload_rejections() {
        let h = harness();

        let (status, _, _) = send(&h, request(Method::POST, "/api/file?name=run.exe", "MZ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&h, request(Method::POST, "/api/file", "data")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&h, request(Method::POST, "/api/file?name=a.txt", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(h.state.store.is_empty());
        assert_eq!(h.state.store.blobs().stats().blob_count, 0);
    }

    #[tokio::test]
    async fn test_oversized_file_is_rejected() {
        let config = ServerConfig {
            max_file_bytes: 4,
            ..ServerConfig::default()
        };
        let h = harness_from(config, RateLimitConfig::default());

        let (status, _, _) =
            send(&h, request(Method::POST, "/api/file?name=a.txt", "too long")).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(h.state.guard.failure_count("192.0.2.7"), 1);
        assert_eq!(h.state.store.blobs().stats().blob_count, 0);
    }

    #[tokio::test]
    async fn test_file_body_released_after_lookup_is_not_found() {
        let h = harness();
        let blobs = h.state.store.blobs();
        let handle = blobs.write(Bytes::from_static(b"body")).unwrap();
        let id = h
            .state
            .store
            .put(
                Payload::File(FileRef {
                    handle: handle.clone(),
                    name: "gone.txt".into(),
                    content_type: "text/plain".into(),
                    size: 4,
                }),
                std::time::Duration::from_secs(60),
            )
            .unwrap();

        // The index still lists the item but its body is already gone
        blobs.release(&handle).unwrap();
        let (status, _, bytes) =
            send(&h, request(Method::GET, &format!("/api/file/{}", id), "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json_body(&bytes)["error"].is_string());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let h = harness();
        let id = save_text(&h, "bye").await;

        for _ in 0..2 {
            let (status, _, _) =
                send(&h, request(Method::DELETE, &format!("/api/{}", id), "")).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _, _) =
            send(&h, request(Method::GET, &format!("/api/text/{}", id), "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_blocked_client_cannot_delete_or_sweep() {
        let h = harness();
        let id = save_text(&h, "keep me").await;

        let attacker: SocketAddr = "198.51.100.9:40000".parse().unwrap();
        for _ in 0..21 {
            h.state.guard.record_failure("198.51.100.9", "scan");
        }

        let (status, _, _) = send_from(
            &h,
            request(Method::DELETE, &format!("/api/{}", id), ""),
            attacker,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.state.store.get(&id).is_ok());

        let (status, _, _) =
            send_from(&h, request(Method::GET, "/api/cleanup", ""), attacker).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_blind_deletes_lead_to_block() {
        let h = harness();
        let id = save_text(&h, "someone else's").await;

        for i in 0..21 {
            let (status, _, _) =
                send(&h, request(Method::DELETE, &format!("/api/Z{:03}", i), "")).await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(h.state.guard.failure_count("192.0.2.7"), 21);
        assert!(h.state.guard.is_blocked("192.0.2.7"));

        let (status, _, _) =
            send(&h, request(Method::DELETE, &format!("/api/{}", id), "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.state.store.contains(&id));
    }

    #[tokio::test]
    async fn test_malformed_id_counts_as_failed_lookup() {
        let h = harness();
        let (status, _, _) = send(&h, request(Method::GET, "/api/text/abc", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(&h, request(Method::DELETE, "/api/..%2F", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.state.guard.failure_count("192.0.2.7"), 2);
    }

    #[tokio::test]
    async fn test_cleanup_reports_removed_count() {
        let h = harness();
        save_text(&h, "one").await;
        save_text(&h, "two").await;

        h.clock.advance(ChronoDuration::hours(24));
        let (status, _, bytes) = send(&h, request(Method::GET, "/api/cleanup", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&bytes)["removedCount"], 2);
        assert!(h.state.store.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let h = harness_with(RateLimitConfig {
            write_limit: 1,
            ..Default::default()
        });
        save_text(&h, "first").await;

        let body = serde_json::json!({ "content": "second" }).to_string();
        let (status, headers, _) = send(&h, request(Method::POST, "/api/text", body)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers[header::RETRY_AFTER], "60");
    }

    #[tokio::test]
    async fn test_forwarded_client_identity_is_used() {
        let config = ServerConfig {
            trust_proxy_headers: true,
            ..ServerConfig::default()
        };
        let h = harness_from(config, RateLimitConfig::default());
        let mut req = request(Method::GET, "/api/text/ZZZZ", "");
        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9"));
        let (status, _, _) = send(&h, req).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(h.state.guard.failure_count("9.9.9.9"), 1);
        assert_eq!(h.state.guard.failure_count("192.0.2.7"), 0);
    }

    #[tokio::test]
    async fn test_forwarded_headers_ignored_by_default() {
        let h = harness();
        let mut req = request(Method::GET, "/api/text/ZZZZ", "");
        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9"));
        send(&h, req).await;

        assert_eq!(h.state.guard.failure_count("9.9.9.9"), 0);
        assert_eq!(h.state.guard.failure_count("192.0.2.7"), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_and_health() {
        let h = harness();
        let (status, _, _) = send(&h, request(Method::GET, "/nope", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, bytes) = send(&h, request(Method::GET, "/healthz", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&bytes[..], b"ok");
    }

    #[test]
    fn test_query_param_decoding() {
        assert_eq!(
            query_param("x=1&name=my+file%21.txt", "name").as_deref(),
            Some("my file!.txt")
        );
        assert_eq!(query_param("x=1", "name"), None);
    }
}
