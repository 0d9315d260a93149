use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

use crate::{
    billing,
    commands::{self, Command},
    config::{Config, TokenLimits},
    db::RemoteDb,
    error::{RelayError, Result},
    llm::{DeltaStream, OpenAiClient, StreamEvent},
    models::ChatRequest,
    telemetry, tokens,
};

/** \brief 转发通道容量，满时生产方挂起等待调用方读取。 */
const STREAM_BUFFER: usize = 16;

/**
 * \brief 服务共享状态，每个请求克隆一份句柄。
 */
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm: OpenAiClient,
    /** \brief 未配置代理服务时为 None，此时不做额度检测与记录。 */
    pub db: Option<RemoteDb>,
}

impl AppState {
    pub fn from_config(config: Config) -> Result<Self> {
        let llm = OpenAiClient::from_config(&config)?;
        let db = config.store.clone().map(RemoteDb::new).transpose()?;
        Ok(Self {
            config: Arc::new(config),
            llm,
            db,
        })
    }
}

/**
 * \brief 构建路由。
 */
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", post(chat))
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/**
 * \brief 启动 HTTP 服务。
 * \param addr 监听地址，如 "127.0.0.1:3000"
 */
pub async fn run(addr: &str, config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    telemetry::log_event(
        "server",
        &format!(
            "upstream={} quota_proxy={} trust_proxy_headers={} password={}",
            state.llm.base_url(),
            state.db.as_ref().map_or("disabled", RemoteDb::base_url),
            state.config.trust_proxy_headers,
            state.config.password.is_some()
        ),
    );
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    telemetry::log_event("server", &format!("listening on http://{}", addr));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/**
 * \brief 调用方地址：默认取 TCP 对端地址，开启 `trust_proxy_headers` 后优先取反向代理头。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub Option<String>);

impl FromRequestParts<AppState> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientAddr(client_addr(
            &parts.headers,
            peer,
            state.config.trust_proxy_headers,
        )))
    }
}

fn client_addr(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_headers: bool,
) -> Option<String> {
    let peer_ip = || peer.map(|addr| addr.ip().to_string());
    if !trust_headers {
        return peer_ip();
    }
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    header_value("x-forwarded-for")
        .or_else(|| header_value("x-real-ip"))
        .or_else(peer_ip)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "quota_enabled": state.db.is_some(),
    }))
}

/**
 * \brief 聊天接口：POST /api
 */
async fn chat(
    State(state): State<AppState>,
    ClientAddr(addr): ClientAddr,
    body: Bytes,
) -> Response {
    match handle_chat(&state, addr, &body).await {
        Ok(resp) => resp,
        Err(err) => {
            telemetry::log_error("server.chat", &err.to_string());
            err.into_response()
        }
    }
}

async fn handle_chat(state: &AppState, addr: Option<String>, body: &[u8]) -> Result<Response> {
    let req: ChatRequest =
        serde_json::from_slice(body).map_err(|e| RelayError::Validation(e.to_string()))?;
    let config = &state.config;

    if let Some(pwd) = &config.password {
        if req.password.as_deref() != Some(pwd.as_str()) {
            return Err(RelayError::Auth(
                "密码错误，请联系网站管理员。".to_string(),
            ));
        }
    }

    let Some(last) = req.messages.last() else {
        return Err(RelayError::Validation("没有输入任何文字。".to_string()));
    };

    if let Some(command) = commands::resolve(&last.content) {
        return run_command(state, &req, command).await;
    }

    let caller_key = req.key.as_deref().filter(|k| !k.is_empty());
    let keys = commands::split_keys(req.key.as_deref().unwrap_or(&config.api_key));
    let api_key = commands::random_key(&keys)?.to_string();

    // Callers bringing their own key get the built-in ceilings, the server key gets the configured ones.
    let limit = match caller_key {
        Some(_) => TokenLimits::default().get(req.model),
        None => config.max_input_tokens.get(req.model),
    };
    let token_count = tokens::check_budget(req.model, &req.messages, limit)?;

    let ip = addr.ok_or_else(|| {
        RelayError::Validation("访问ip不能为空，请联系网站管理员".to_string())
    })?;

    if let Some(db) = &state.db {
        if db.is_reached_limit(&ip).await? {
            telemetry::log_event("server.quota", &format!("limit reached ip={}", ip));
            return Err(RelayError::QuotaExceeded {
                limit: config.total_count,
            });
        }
    }

    telemetry::log_event(
        "server.chat",
        &format!(
            "relay ip={} model={} msgs={} tokens={} key={}",
            ip,
            req.model.as_str(),
            req.messages.len(),
            token_count,
            telemetry::mask_key(&api_key)
        ),
    );

    let deltas = state
        .llm
        .stream_chat(&api_key, req.model, req.temperature, &req.messages)
        .await?;
    Ok(forward(deltas, state.db.clone(), ip, last.content.clone()))
}

async fn run_command(state: &AppState, req: &ChatRequest, command: Command) -> Result<Response> {
    let keys = match command {
        Command::QueryOwnKeys => {
            let own = req
                .key
                .as_deref()
                .filter(|k| !k.trim().is_empty() && *k != state.config.api_key)
                .ok_or_else(|| {
                    RelayError::Auth(
                        "没有填写 OpenAI API key，不会查询内置的 Key。".to_string(),
                    )
                })?;
            commands::split_keys(own)
        }
        Command::QueryKeys(keys) => keys,
        Command::Echo(content) => return Err(RelayError::Validation(content)),
    };

    telemetry::log_event("server.billing", &format!("query keys={}", keys.len()));
    let billings = billing::fetch_billings(&state.llm, &keys).await;
    Ok(billing::render_table(&billings).into_response())
}

/**
 * \brief 把增量文本逐段写入响应体；收到结束标记后写入聊天记录再关闭。
 */
fn forward(
    mut deltas: DeltaStream,
    db: Option<RemoteDb>,
    ip: String,
    question: String,
) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes>>(STREAM_BUFFER);

    tokio::spawn(async move {
        let mut answer = String::new();
        while let Some(item) = deltas.next().await {
            match item {
                Ok(StreamEvent::Delta(text)) => {
                    answer.push_str(&text);
                    if tx.send(Ok(Bytes::from(text))).await.is_err() {
                        telemetry::log_event("server.chat", "caller went away, stop relaying");
                        return;
                    }
                }
                Ok(StreamEvent::Done) => {
                    if let Some(db) = &db {
                        if let Err(err) = db.insert_chat(&ip, &question, &answer).await {
                            telemetry::log_error(
                                "server.chat",
                                &format!("insert chat failed: {}", err),
                            );
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                    telemetry::log_event(
                        "server.chat",
                        &format!("done ip={} answer_len={}", ip, answer.len()),
                    );
                    return;
                }
                Err(err) => {
                    telemetry::log_error("server.chat", &format!("stream error: {}", err));
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    });

    let mut resp = Body::from_stream(ReceiverStream::new(rx)).into_response();
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
