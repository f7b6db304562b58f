use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, get_service, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::services::{ServeDir, ServeFile};

use crate::{
    config::{ConfigStore, SaveError},
    error::RelayError,
    llm::{self, ChatDispatcher},
    models::{
        Configuration, ImageProviderDescriptor, ImageRequest, ProviderDescriptor,
        SearchProviderDescriptor,
    },
    providers,
    relay::AuxRelay,
    telemetry,
};

/**
 * \brief 各 handler 共享的状态：配置存储显式注入，而非全局变量。
 */
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub dispatcher: ChatDispatcher,
    pub relay: AuxRelay,
}

impl AppState {
    pub fn new(store: ConfigStore, dispatcher: ChatDispatcher, relay: AuxRelay) -> Self {
        Self {
            store: Arc::new(store),
            dispatcher,
            relay,
        }
    }
}

/**
 * \brief 组装路由（不含监听），测试中可直接复用。
 */
pub fn router(state: AppState) -> Router {
    let (index_file, ui_root) = resolve_ui_paths();

    Router::new()
        .route("/", get_service(ServeFile::new(index_file)))
        .route("/api/settings", get(get_settings).post(save_settings))
        .route("/api/providers", get(get_providers))
        .route("/api/chat", post(chat))
        .route("/api/search", post(search))
        .route("/api/image", post(generate_image))
        .route("/api/social/status", get(social_status))
        .fallback_service(ServeDir::new(ui_root))
        .with_state(state)
}

/**
 * \brief 启动本地 HTTP 服务。
 * \param addr 监听地址，默认仅 127.0.0.1，外网无法访问
 */
pub async fn run(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => anyhow::anyhow!(
                "端口 {} 已被占用，请改用其他端口或关闭占用该端口的程序",
                addr.port()
            ),
            _ => anyhow::Error::new(e).context(format!("服务器启动失败 ({})", addr)),
        })?;

    let shown_host = if addr.ip().is_loopback() {
        "localhost".to_string()
    } else {
        addr.ip().to_string()
    };
    println!("\n🦞 ClawBox 启动成功！");
    println!("👉 请在浏览器打开：http://{}:{}\n", shown_host, addr.port());
    if addr.ip().is_loopback() {
        println!("🔒 沙盒模式：仅本机可访问，外网无法连线。\n");
    }
    telemetry::log_event("server", &format!("listening on {}", addr));

    axum::serve(listener, router(state))
        .await
        .context("server terminated")?;
    Ok(())
}

/**
 * \brief 前端入口位置：CLAWBOX_UI_DIR 优先，其次工作目录下的 index.html，最后 public/。
 */
fn resolve_ui_paths() -> (PathBuf, PathBuf) {
    if let Ok(dir) = std::env::var("CLAWBOX_UI_DIR") {
        let dir = PathBuf::from(dir);
        return (dir.join("index.html"), dir);
    }
    let public = PathBuf::from("public");
    let root_index = PathBuf::from("index.html");
    if root_index.exists() {
        (root_index, public)
    } else {
        (public.join("index.html"), public)
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SettingsView {
    #[serde(flatten)]
    config: Configuration,
    providers: &'static [ProviderDescriptor],
    image_providers: &'static [ImageProviderDescriptor],
    search_providers: &'static [SearchProviderDescriptor],
}

#[derive(Serialize, Debug)]
struct ChatReply {
    reply: Option<String>,
}

/**
 * \brief 当前配置（含密钥明文，仅限本机访问）与各类目录。
 */
async fn get_settings(State(state): State<AppState>) -> Json<SettingsView> {
    Json(SettingsView {
        config: state.store.snapshot(),
        providers: providers::catalog(),
        image_providers: providers::image_catalog(),
        search_providers: providers::search_catalog(),
    })
}

/**
 * \brief 保存设定：浅合并 + 去空白 + 落盘。
 */
async fn save_settings(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let patch = match body {
        Ok(Json(v)) => v,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": format!("储存失败：{}", rejection.body_text())})),
            )
        }
    };

    match state.store.save(&patch) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"success": true, "message": "设定已储存！"})),
        ),
        Err(SaveError::Invalid(msg)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": format!("储存失败：{}", msg)})),
        ),
        Err(SaveError::Persist(e)) => {
            telemetry::log_error("server.settings", &format!("{:#}", e));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": format!("储存失败：{}", e)})),
            )
        }
    }
}

async fn get_providers() -> Json<Value> {
    Json(json!({
        "providers": providers::catalog(),
        "fallback": providers::FALLBACK_PROVIDER_ID,
    }))
}

/**
 * \brief 核心聊天接口：POST /api/chat {message}。
 */
async fn chat(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<ChatReply>) {
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let message = match llm::validate_message(body.get("message")) {
        Ok(m) => m,
        Err(e) => return failure_reply(e),
    };

    let config = state.store.snapshot();
    match state.dispatcher.dispatch(&config, message).await {
        Ok(reply) => (StatusCode::OK, Json(ChatReply { reply })),
        Err(e) => failure_reply(e),
    }
}

fn failure_reply(err: RelayError) -> (StatusCode, Json<ChatReply>) {
    (
        err.status_code(),
        Json(ChatReply {
            reply: Some(err.user_message()),
        }),
    )
}

fn failure_json(err: RelayError) -> (StatusCode, Json<Value>) {
    (
        err.status_code(),
        Json(json!({
            "success": false,
            "category": err.category(),
            "error": err.user_message(),
        })),
    )
}

async fn search(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let config = state.store.snapshot();
    match state.relay.search(&config, body.get("query")).await {
        Ok(results) => (
            StatusCode::OK,
            Json(json!({"success": true, "results": results})),
        ),
        Err(e) => failure_json(e),
    }
}

async fn generate_image(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let request = match body
        .map_err(|r| r.body_text())
        .and_then(|Json(v)| serde_json::from_value::<ImageRequest>(v).map_err(|e| e.to_string()))
    {
        Ok(req) => req,
        Err(msg) => return failure_json(RelayError::InvalidInput(format!("请求格式错误：{}", msg))),
    };

    let config = state.store.snapshot();
    match state.relay.generate_image(&config, &request).await {
        Ok(image) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "url": image.url,
                "revised_prompt": image.revised_prompt,
            })),
        ),
        Err(e) => failure_json(e),
    }
}

/**
 * \brief 社群整合尚未实现，仅返回静态说明。
 */
async fn social_status() -> Json<Value> {
    Json(json!({
        "status": "coming_soon",
        "message": "社群平台整合即将推出，敬请期待！",
        "platforms": [
            {"id": "telegram", "name": "Telegram", "available": false},
            {"id": "discord", "name": "Discord", "available": false},
            {"id": "line", "name": "LINE", "available": false}
        ]
    }))
}
