#![forbid(unsafe_code)]

//! Axum server exposing the stream-access surface: a session-authenticated
//! endpoint that turns a catalog entry into a playable URL, and a
//! token-gated proxy relay for origins the browser cannot fetch directly.
//!
//! The relay never trusts ambient cookies or headers: `<video>` elements
//! cannot attach custom auth headers, so the capability token in the query
//! string is the entire authorization boundary.

use std::{net::{IpAddr, SocketAddr}, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use streamgate::catalog::{CatalogReader, ContentKind, ContentRecord};
use streamgate::config::{RuntimeOverrides, load_runtime_config};
use streamgate::reference::{RequestContext, StreamReference, origin_of, same_origin};
use streamgate::security::{ensure_not_root, ensure_signing_secret};
use streamgate::token::TokenCodec;
use tokio::signal;
use url::Url;

/// Sent upstream when the client did not supply its own User-Agent. Some
/// origins reject requests with no UA at all.
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) streamgate/0.1";

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bounds the wait for response headers and any idle gap between body reads.
/// This is not a total request timeout, so long-running streams stay alive as
/// long as the origin keeps sending bytes.
const UPSTREAM_READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct ServerArgs {
    catalog_db: Option<PathBuf>,
    port: Option<u16>,
    host: Option<String>,
    env_path: Option<PathBuf>,
}

impl ServerArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self {
            catalog_db: None,
            port: None,
            host: None,
            env_path: None,
        };
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            let mut take_value = |flag: &str| -> Result<String> {
                if let Some(value) = inline.clone() {
                    return Ok(value);
                }
                args.next().ok_or_else(|| anyhow!("{flag} requires a value"))
            };
            match flag.as_str() {
                "--db" => parsed.catalog_db = Some(PathBuf::from(take_value("--db")?)),
                "--port" => {
                    parsed.port = Some(
                        take_value("--port")?
                            .parse::<u16>()
                            .context("expected a numeric port between 0 and 65535")?,
                    )
                }
                "--host" => parsed.host = Some(take_value("--host")?),
                "--env" => parsed.env_path = Some(PathBuf::from(take_value("--env")?)),
                other => return Err(anyhow!("unknown argument: {other}")),
            }
        }
        Ok(parsed)
    }
}

/// Shared state injected into every handler. Every field is read-only after
/// startup; requests share nothing mutable.
#[derive(Clone)]
struct AppState {
    reader: Arc<CatalogReader>,
    codec: Arc<TokenCodec>,
    http: reqwest::Client,
    cdn_base: Arc<Option<String>>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized() -> Self {
        // Deliberately generic: the response never reveals which check failed.
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "unauthorized".into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse()?;
    ensure_not_root("server")?;

    let config = load_runtime_config(RuntimeOverrides {
        catalog_db: args.catalog_db,
        port: args.port,
        host: args.host,
        env_path: args.env_path,
    })?;
    ensure_signing_secret(&config.signing_secret)?;

    let reader = CatalogReader::new(&config.catalog_db)
        .await
        .context("initializing catalog reader")?;

    let http = reqwest::Client::builder()
        .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
        .read_timeout(UPSTREAM_READ_TIMEOUT)
        .build()
        .context("building upstream HTTP client")?;

    let state = AppState {
        reader: Arc::new(reader),
        codec: Arc::new(TokenCodec::new(&config.signing_secret)),
        http,
        cdn_base: Arc::new(config.cdn_base_url.clone()),
    };

    let app = router(state);

    let host: IpAddr = config
        .host
        .parse()
        .context("expected a valid IPv4 or IPv6 address for --host/STREAMGATE_HOST")?;
    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("stream server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running stream server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/stream/{content_id}/url", get(get_playable_url))
        .route("/stream/{content_id}/proxy", get(proxy_stream))
        .with_state(state)
}

async fn shutdown_signal() {
    // Failure here only affects graceful shutdown; Ctrl+C still terminates.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

/// Extracts the user id from a `Bearer` session token. The proxy endpoint
/// never goes through this; it authenticates with the capability token alone.
fn require_user(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .and_then(|token| state.codec.verify_session(token))
        .ok_or_else(ApiError::unauthorized)
}

#[derive(Debug, Deserialize)]
struct PlayableUrlQuery {
    #[serde(rename = "episodeId")]
    episode_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayableUrlResponse {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy_url: Option<String>,
    #[serde(rename = "type")]
    media_type: ContentKind,
}

/// The stream reference chosen for playback, plus the episode it came from
/// when the content is a series.
struct SelectedSource {
    reference: String,
    episode_id: Option<String>,
}

/// Picks which stored reference plays for `record`. For series the default is
/// the first episode by (season, episode) ascending; an episode id that does
/// not belong to the series is logged and falls back to that same default.
fn select_source(
    record: &ContentRecord,
    requested_episode: Option<&str>,
) -> ApiResult<SelectedSource> {
    match record.kind {
        ContentKind::Movie => {
            let reference = non_blank(record.video_ref.as_deref())
                .ok_or_else(|| ApiError::not_found("Video not available"))?;
            Ok(SelectedSource {
                reference: reference.to_owned(),
                episode_id: None,
            })
        }
        ContentKind::Series => {
            let Some(first) = record.episodes.first() else {
                return Err(ApiError::not_found("Content not found"));
            };
            let chosen = match requested_episode {
                Some(requested) => record
                    .episodes
                    .iter()
                    .find(|episode| episode.id == requested)
                    .unwrap_or_else(|| {
                        eprintln!(
                            "episode {} does not belong to series {}; using first episode {}",
                            requested, record.id, first.id
                        );
                        first
                    }),
                None => first,
            };
            let reference = non_blank(chosen.video_ref.as_deref())
                .ok_or_else(|| ApiError::not_found("Video not available"))?;
            Ok(SelectedSource {
                reference: reference.to_owned(),
                episode_id: Some(chosen.id.clone()),
            })
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// GET /stream/{contentId}/url — decides between a directly embeddable URL
/// and a token-gated proxy URL.
async fn get_playable_url(
    State(state): State<AppState>,
    AxumPath(content_id): AxumPath<String>,
    Query(query): Query<PlayableUrlQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<PlayableUrlResponse>> {
    let user_id = require_user(&state, &headers)?;

    let record = state
        .reader
        .get_content(&content_id)
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?
        .ok_or_else(|| ApiError::not_found("Content not found"))?;

    let selected = select_source(&record, query.episode_id.as_deref())?;
    let ctx = RequestContext::from_headers(&headers);
    let resolved = StreamReference::classify(&selected.reference)
        .resolve(&ctx, state.cdn_base.as_deref());

    // Same-origin URLs are safe to hand to the browser directly; everything
    // else goes through the relay to dodge CORS/referrer blocking.
    let proxy_url = if same_origin(&resolved, &ctx) {
        None
    } else {
        let token =
            state
                .codec
                .mint_stream(&content_id, selected.episode_id.as_deref(), &user_id);
        Some(format!(
            "{}/stream/{}/proxy?t={}",
            ctx.origin(),
            content_id,
            token
        ))
    };

    Ok(Json(PlayableUrlResponse {
        url: resolved,
        proxy_url,
        media_type: record.kind,
    }))
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    t: Option<String>,
}

/// GET /stream/{contentId}/proxy?t= — validates the capability token,
/// re-resolves the reference, and relays the upstream byte stream while
/// preserving range semantics.
async fn proxy_stream(
    State(state): State<AppState>,
    AxumPath(content_id): AxumPath<String>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    // Hard authorization boundary: the token is the only credential honored.
    let claims = query
        .t
        .as_deref()
        .and_then(|token| state.codec.verify_stream(token))
        .ok_or_else(ApiError::unauthorized)?;
    if claims.content_id != content_id {
        return Err(ApiError::unauthorized());
    }

    let record = state
        .reader
        .get_content(&content_id)
        .await
        .map_err(|err| {
            eprintln!("catalog lookup failed for {}: {}", content_id, err);
            ApiError::bad_gateway("could not load video")
        })?
        .ok_or_else(|| ApiError::not_found("Content not found"))?;

    let selected = select_source(&record, claims.episode_id.as_deref())?;
    let ctx = RequestContext::from_headers(&headers);
    let resolved = StreamReference::classify(&selected.reference)
        .resolve(&ctx, state.cdn_base.as_deref());

    // Data-quality guard, not a security boundary: a poster image stored in
    // the video field would otherwise stream "successfully" and confuse the
    // player.
    if is_image_reference(&resolved) {
        return Err(ApiError::bad_request(
            "stored video reference points to an image file; update the content's video URL",
        ));
    }

    let mut request = state.http.get(&resolved);
    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        request = request.header(header::RANGE, range);
    }
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_USER_AGENT);
    request = request.header(header::USER_AGENT, user_agent);
    // Compatibility shim for origins that reject hotlinking without a
    // same-site referer.
    if let Some(origin) = origin_of(&resolved) {
        request = request.header(header::REFERER, format!("{origin}/"));
    }

    let upstream = request.send().await.map_err(|err| {
        eprintln!("upstream fetch failed for {}: {}", resolved, err);
        ApiError::bad_gateway("could not load video")
    })?;

    let status = upstream.status();
    if !status.is_success() {
        if status == StatusCode::FORBIDDEN {
            return Err(ApiError::bad_gateway(
                "video source rejected the request; the origin likely enforces hotlink protection",
            ));
        }
        let mapped = if status.is_server_error() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY)
        };
        // Upstream bodies are never forwarded on failure.
        return Err(ApiError::with_status(mapped, "video source unavailable"));
    }

    relay_response(upstream)
}

/// Mirrors the upstream status and range headers and streams the body through
/// without buffering. Dropping the response (client disconnect) drops the
/// upstream stream with it, which aborts the fetch.
fn relay_response(upstream: reqwest::Response) -> ApiResult<Response> {
    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::OK);

    let mut builder = Response::builder()
        .status(status)
        .header(header::ACCEPT_RANGES, "bytes");

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("video/mp4")
        .to_owned();
    builder = builder.header(header::CONTENT_TYPE, content_type);

    if let Some(length) = upstream
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
    {
        builder = builder.header(header::CONTENT_LENGTH, length.to_owned());
    }
    // Content-Range is what makes seeking work end to end.
    if let Some(range) = upstream
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
    {
        builder = builder.header(header::CONTENT_RANGE, range.to_owned());
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|err| ApiError::internal(err.to_string()))
}

/// Extension sniff over the resolved URL's path. Defined small set: whatever
/// `mime_guess` maps to an `image/*` type.
fn is_image_reference(resolved_url: &str) -> bool {
    let path = Url::parse(resolved_url)
        .map(|url| url.path().to_owned())
        .unwrap_or_else(|_| resolved_url.to_owned());
    mime_guess::from_path(&path)
        .first()
        .map(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false)
}
