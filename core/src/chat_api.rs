/// Chat REST API + SSE, the delivery surface for browser-style clients
///
/// Endpoints:
///   GET  /api/health                   liveness, no auth
///   GET  /api/conversations            caller's sidebar list
///   POST /api/conversations            body: {"listing_id":"..."}  200 existing / 201 created
///   GET  /api/conversations/:id        deep link: view + messages (marks read)
///   POST /api/send                     body: {"conversation_id":"...","content":"..."}
///   GET  /api/unread-count             notification badge
///   GET  /events                       SSE stream of MessageChange JSON (table-wide)
///
/// Every route except /api/health wants "Authorization: Bearer <token>".
use crate::error::{ChatError, Result};
use crate::service::ChatService;
use crate::session::{AuthProvider, AuthSession};
use futures_util::stream::{unfold, StreamExt};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::chat_types::MessageChange;

// ─── Type alias ──────────────────────────────────────────────────────────────

type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, Infallible>;
type Resp = Response<BoxBody>;

/// Everything a request handler needs.
#[derive(Clone)]
pub struct ApiState {
    pub service: ChatService,
    pub auth: Arc<dyn AuthProvider>,
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn cors_headers(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type, Authorization")
}

fn json_resp(status: StatusCode, body: Vec<u8>) -> Resp {
    cors_headers(Response::builder())
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(bytes::Bytes::from(body)).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

fn json_ok(value: serde_json::Value) -> Resp {
    json_resp(StatusCode::OK, serde_json::to_vec(&value).unwrap_or_default())
}

fn json_status(status: StatusCode, value: serde_json::Value) -> Resp {
    json_resp(status, serde_json::to_vec(&value).unwrap_or_default())
}

fn json_err(status: StatusCode, msg: &str) -> Resp {
    json_resp(
        status,
        serde_json::to_vec(&serde_json::json!({ "error": msg })).unwrap_or_default(),
    )
}

fn chat_err(e: &ChatError) -> Resp {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_err(status, &e.to_string())
}

fn sse_resp(rx: tokio::sync::broadcast::Receiver<MessageChange>) -> Resp {
    // Keepalive comment sent immediately so the client knows the connection is live
    let initial = bytes::Bytes::from(": connected\n\n");
    let first = futures_util::stream::once(async move {
        Ok::<Frame<bytes::Bytes>, Infallible>(Frame::data(initial))
    });

    let events = unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    let json = serde_json::to_string(&change).unwrap_or_default();
                    let data = format!("data: {}\n\n", json);
                    let frame = Frame::data(bytes::Bytes::from(data));
                    return Some((Ok::<_, Infallible>(frame), rx));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    // Client is too slow, skip lagged events and continue
                    tracing::warn!("SSE client lagged {} events", n);
                    continue;
                }
                Err(_) => return None, // channel closed
            }
        }
    });

    let stream = first.chain(events);
    cors_headers(Response::builder())
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream; charset=utf-8")
        .header("Cache-Control", "no-cache")
        .header("X-Accel-Buffering", "no") // disable nginx buffering
        .body(BodyExt::boxed(StreamBody::new(stream)))
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

// ─── Entry points ────────────────────────────────────────────────────────────

/// Bind and serve on 127.0.0.1:{port}.
pub async fn start_chat_api(state: ApiState, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().map_err(|e| {
        ChatError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("Invalid chat API address: {}", e),
        ))
    })?;
    let listener = TcpListener::bind(addr).await.map_err(ChatError::Io)?;
    run_chat_api(listener, state).await
}

/// Serve on an already-bound listener (tests bind port 0 and pass it in).
pub async fn run_chat_api(listener: TcpListener, state: ApiState) -> Result<()> {
    let addr = listener.local_addr().map_err(ChatError::Io)?;
    info!("Chat API started on http://{}", addr);

    let state = Arc::new(state);
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let io = TokioIo::new(stream);
                let state = state.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req| {
                        let state = state.clone();
                        async move { Ok::<_, Infallible>(handle(req, state).await) }
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                        // Ignore client-disconnect errors (normal for SSE)
                        if !e.is_incomplete_message() {
                            error!("Chat API connection error: {:?}", e);
                        }
                    }
                });
            }
            Err(e) => error!("Chat API accept error: {}", e),
        }
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

async fn handle(req: Request<hyper::body::Incoming>, state: Arc<ApiState>) -> Resp {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // CORS preflight
    if method == Method::OPTIONS {
        return cors_headers(Response::builder())
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(bytes::Bytes::new()).boxed())
            .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()));
    }

    if method == Method::GET && path == "/api/health" {
        return json_ok(serde_json::json!({
            "status": "ok",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
    }

    // Everything else is caller-scoped
    let session = match authenticate(&req, &state).await {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match (method.clone(), path.as_str()) {
        (Method::GET, "/api/conversations") => get_conversations(&state, &session).await,
        (Method::POST, "/api/conversations") => post_conversation(req, &state, &session).await,
        (Method::POST, "/api/send") => post_send(req, &state, &session).await,
        (Method::GET, "/api/unread-count") => get_unread_count(&state, &session).await,
        (Method::GET, "/events") => get_sse(&state),
        _ => {
            // Dynamic segments
            if method == Method::GET && path.starts_with("/api/conversations/") {
                let conv_id = path.trim_start_matches("/api/conversations/").to_string();
                return get_conversation_detail(&conv_id, &state, &session).await;
            }
            json_err(StatusCode::NOT_FOUND, "not found")
        }
    }
}

async fn authenticate(
    req: &Request<hyper::body::Incoming>,
    state: &ApiState,
) -> std::result::Result<AuthSession, Resp> {
    let header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = match header.strip_prefix("Bearer ") {
        Some(t) if !t.is_empty() => t,
        _ => {
            return Err(json_err(
                StatusCode::UNAUTHORIZED,
                "missing or invalid authorization header",
            ))
        }
    };
    state.auth.authenticate(token).await.map_err(|e| chat_err(&e))
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn get_conversations(state: &ApiState, session: &AuthSession) -> Resp {
    match state.service.conversations_for(session).await {
        Ok(views) => json_ok(serde_json::json!({ "conversations": views })),
        Err(e) => chat_err(&e),
    }
}

#[derive(Deserialize)]
struct StartConversationRequest {
    listing_id: String,
}

async fn post_conversation(
    req: Request<hyper::body::Incoming>,
    state: &ApiState,
    session: &AuthSession,
) -> Resp {
    let body = match read_body(req).await {
        Ok(b) => b,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("body read error: {}", e)),
    };
    let r: StartConversationRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)),
    };
    match state
        .service
        .get_or_create_conversation(session, &r.listing_id)
        .await
    {
        Ok((view, created)) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            json_status(status, serde_json::json!({ "conversation": view }))
        }
        Err(e) => chat_err(&e),
    }
}

async fn get_conversation_detail(
    conversation_id: &str,
    state: &ApiState,
    session: &AuthSession,
) -> Resp {
    let view = match state.service.conversation_view(session, conversation_id).await {
        Ok(v) => v,
        Err(e) => return chat_err(&e),
    };
    match state.service.messages_for(session, conversation_id).await {
        Ok(messages) => json_ok(serde_json::json!({
            "conversation": view,
            "messages": messages,
        })),
        Err(e) => chat_err(&e),
    }
}

#[derive(Deserialize)]
struct SendRequest {
    conversation_id: String,
    content: String,
}

async fn post_send(
    req: Request<hyper::body::Incoming>,
    state: &ApiState,
    session: &AuthSession,
) -> Resp {
    let body = match read_body(req).await {
        Ok(b) => b,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("body read error: {}", e)),
    };
    let r: SendRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)),
    };
    match state
        .service
        .send_message(session, &r.conversation_id, &r.content)
        .await
    {
        Ok(message) => json_status(StatusCode::CREATED, serde_json::json!({ "message": message })),
        Err(e) => chat_err(&e),
    }
}

async fn get_unread_count(state: &ApiState, session: &AuthSession) -> Resp {
    match state.service.unread_conversation_count(session).await {
        Ok(n) => json_ok(serde_json::json!({ "unread_count": n })),
        Err(e) => chat_err(&e),
    }
}

fn get_sse(state: &ApiState) -> Resp {
    let rx = state.service.feed().subscribe();
    sse_resp(rx)
}

// ─── Utilities ────────────────────────────────────────────────────────────────

async fn read_body(req: Request<hyper::body::Incoming>) -> std::result::Result<bytes::Bytes, String> {
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| e.to_string())
}
