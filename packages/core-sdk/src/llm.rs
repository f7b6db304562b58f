use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::error::{classify_upstream, RelayError, RelayResult};
use crate::models::{
    Configuration, ProtocolFamily, ProviderDescriptor, ToolCall, ToolDescriptor, TurnOutcome,
};
use crate::{providers, telemetry, tools};

/** \brief 固定系统提示词，不接受调用方覆盖。 */
pub const SYSTEM_PROMPT: &str = "你是一个运行在用户本地电脑的 AI 助理 ClawBox。请友善地回答问题。";

#[cfg(feature = "anthropic")]
const ANTHROPIC_VERSION: &str = "2023-06-01";
#[cfg(feature = "anthropic")]
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
#[cfg(feature = "anthropic")]
const ANTHROPIC_MAX_TOKENS: u32 = 1024;
#[cfg(feature = "google")]
const GOOGLE_API_BASE: &str = "https://generativelanguage.googleapis.com";

/**
 * \brief 单轮对话的输入。
 */
#[derive(Debug, Clone, Copy)]
pub struct ChatTurn<'a> {
    pub model: &'a str,
    pub message: &'a str,
    pub tools: &'a [ToolDescriptor],
}

/**
 * \brief 协议适配器：三种协议族共享 send_turn，并返回统一的 TurnOutcome。
 * \details 凭据在构造时已转换为请求头，发送阶段不会再因密钥格式失败。
 */
#[derive(Debug, Clone)]
pub enum ChatAdapter {
    OpenAi {
        base: String,
        authorization: HeaderValue,
    },
    #[cfg(feature = "google")]
    Gemini { base: String, api_key: HeaderValue },
    #[cfg(feature = "anthropic")]
    Claude { base: String, api_key: HeaderValue },
}

impl ChatAdapter {
    /**
     * \brief 构造适配器；密钥非法或对应集成未编译进来时直接返回错误，不会发起请求。
     * \param base_override 覆盖所有协议族的基地址（代理或本地测试）
     */
    pub fn build(
        provider: &ProviderDescriptor,
        api_key: &str,
        base_override: Option<&str>,
    ) -> RelayResult<Self> {
        let key = credential_header(api_key)?;
        let pick = |default: &str| {
            base_override
                .unwrap_or(default)
                .trim_end_matches('/')
                .to_string()
        };
        match provider.family {
            ProtocolFamily::OpenAiCompatible => Ok(ChatAdapter::OpenAi {
                base: pick(provider.base_url.unwrap_or("https://api.openai.com/v1")),
                authorization: credential_header(&format!("Bearer {}", api_key.trim()))?,
            }),
            ProtocolFamily::Google => build_gemini(pick, key),
            ProtocolFamily::Anthropic => build_claude(pick, key),
        }
    }

    pub fn family(&self) -> ProtocolFamily {
        match self {
            ChatAdapter::OpenAi { .. } => ProtocolFamily::OpenAiCompatible,
            #[cfg(feature = "google")]
            ChatAdapter::Gemini { .. } => ProtocolFamily::Google,
            #[cfg(feature = "anthropic")]
            ChatAdapter::Claude { .. } => ProtocolFamily::Anthropic,
        }
    }

    /**
     * \brief 发送单轮请求并归一化结果。
     */
    pub async fn send_turn(
        &self,
        client: &reqwest::Client,
        turn: &ChatTurn<'_>,
    ) -> RelayResult<TurnOutcome> {
        match self {
            ChatAdapter::OpenAi {
                base,
                authorization,
            } => send_openai(client, base, authorization, turn).await,
            #[cfg(feature = "google")]
            ChatAdapter::Gemini { base, api_key } => send_gemini(client, base, api_key, turn).await,
            #[cfg(feature = "anthropic")]
            ChatAdapter::Claude { base, api_key } => send_claude(client, base, api_key, turn).await,
        }
    }
}

/**
 * \brief 将去除空白后的密钥转换为敏感请求头，非法字符归为配置错误。
 */
fn credential_header(api_key: &str) -> RelayResult<HeaderValue> {
    let mut value = HeaderValue::from_str(api_key.trim())
        .map_err(|_| RelayError::MalformedCredential("API Key"))?;
    value.set_sensitive(true);
    Ok(value)
}

#[cfg(feature = "google")]
fn build_gemini(pick: impl Fn(&str) -> String, api_key: HeaderValue) -> RelayResult<ChatAdapter> {
    Ok(ChatAdapter::Gemini {
        base: normalize_gemini_base(&pick(GOOGLE_API_BASE)),
        api_key,
    })
}

#[cfg(not(feature = "google"))]
fn build_gemini(_pick: impl Fn(&str) -> String, _api_key: HeaderValue) -> RelayResult<ChatAdapter> {
    Err(RelayError::IntegrationUnavailable("google"))
}

#[cfg(feature = "anthropic")]
fn build_claude(pick: impl Fn(&str) -> String, api_key: HeaderValue) -> RelayResult<ChatAdapter> {
    Ok(ChatAdapter::Claude {
        base: pick(ANTHROPIC_API_BASE),
        api_key,
    })
}

#[cfg(not(feature = "anthropic"))]
fn build_claude(_pick: impl Fn(&str) -> String, _api_key: HeaderValue) -> RelayResult<ChatAdapter> {
    Err(RelayError::IntegrationUnavailable("anthropic"))
}

/**
 * \brief 聊天分发器：校验 → 解析模型 → 选择适配器 → 发送 → 执行本地工具。
 */
#[derive(Debug, Clone, Default)]
pub struct ChatDispatcher {
    client: reqwest::Client,
    base_override: Option<String>,
}

impl ChatDispatcher {
    pub fn new(base_override: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_override: base_override
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    /**
     * \brief 读取 CLAWBOX_API_BASE 环境变量作为基地址覆盖。
     */
    pub fn from_env() -> Self {
        Self::new(std::env::var("CLAWBOX_API_BASE").ok())
    }

    pub fn base_override(&self) -> Option<&str> {
        self.base_override.as_deref()
    }

    /**
     * \brief 处理一条用户消息，返回回复文本（上游未给出文本时为 None）。
     * \details 所有失败都在此处分类并脱敏。
     */
    pub async fn dispatch(
        &self,
        config: &Configuration,
        message: &str,
    ) -> RelayResult<Option<String>> {
        let secrets = config.secrets();
        self.dispatch_inner(config, message).await.map_err(|e| {
            let e = e.redact(&secrets);
            telemetry::log_error(
                "llm.chat",
                &format!("provider={} error={}", config.api_provider, e),
            );
            e
        })
    }

    async fn dispatch_inner(
        &self,
        config: &Configuration,
        message: &str,
    ) -> RelayResult<Option<String>> {
        if message.trim().is_empty() {
            return Err(RelayError::InvalidInput("请输入有效的讯息内容。".to_string()));
        }

        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Err(RelayError::MissingCredential("API Key"));
        }

        let provider = providers::resolve(&config.api_provider);
        let model = resolve_model(config, provider)?;
        let adapter = ChatAdapter::build(provider, api_key, self.base_override())?;
        let advertised = tools::resolve_tools(config, provider.id);

        telemetry::log_event(
            "llm.chat",
            &format!(
                "provider={}({}) model={} tools={} prompt_len={}",
                provider.id,
                provider.family.as_str(),
                model,
                advertised.len(),
                message.len()
            ),
        );

        let turn = ChatTurn {
            model: &model,
            message,
            tools: &advertised,
        };
        let outcome = adapter.send_turn(&self.client, &turn).await?;

        if !outcome.tool_calls.is_empty() {
            telemetry::log_event(
                "llm.tools",
                &format!(
                    "calls=[{}]",
                    outcome
                        .tool_calls
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                ),
            );
            return Ok(Some(tools::narrate_tool_calls(&outcome.tool_calls)));
        }
        Ok(outcome.text)
    }
}

/**
 * \brief 校验 /api/chat 请求中的 message 字段。
 */
pub fn validate_message(value: Option<&Value>) -> RelayResult<&str> {
    match value.and_then(Value::as_str) {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(RelayError::InvalidInput("请输入有效的讯息内容。".to_string())),
    }
}

/**
 * \brief 解析本次请求使用的模型：配置优先，其次服务商默认值；不校验是否在允许列表中。
 */
pub fn resolve_model(
    config: &Configuration,
    provider: &ProviderDescriptor,
) -> RelayResult<String> {
    let configured = config.model.trim();
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }
    let fallback = provider.default_model.trim();
    if fallback.is_empty() {
        return Err(RelayError::NoModelSelected(provider.id.to_string()));
    }
    Ok(fallback.to_string())
}

async fn send_openai(
    client: &reqwest::Client,
    base: &str,
    authorization: &HeaderValue,
    turn: &ChatTurn<'_>,
) -> RelayResult<TurnOutcome> {
    let url = format!("{}/chat/completions", base);
    let mut body = json!({
        "model": turn.model,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": turn.message}
        ],
        "stream": false
    });
    if !turn.tools.is_empty() {
        body["tools"] = Value::Array(turn.tools.iter().map(tools::openai_tool_schema).collect());
    }

    let resp = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, authorization.clone())
        .json(&body)
        .send()
        .await?;
    let v = read_json(resp).await?;
    parse_openai_outcome(&v)
}

#[cfg(feature = "google")]
async fn send_gemini(
    client: &reqwest::Client,
    base: &str,
    api_key: &HeaderValue,
    turn: &ChatTurn<'_>,
) -> RelayResult<TurnOutcome> {
    let url = format!("{}/models/{}:generateContent", base, turn.model);
    let body = json!({
        "system_instruction": {
            "parts": [{"text": SYSTEM_PROMPT}]
        },
        "contents": [{
            "role": "user",
            "parts": [{"text": turn.message}]
        }]
    });

    // 密钥放在请求头而非 query，避免出现在错误信息的 URL 中
    let resp = client
        .post(url)
        .header("x-goog-api-key", api_key.clone())
        .json(&body)
        .send()
        .await?;
    let v = read_json(resp).await?;
    Ok(TurnOutcome {
        text: extract_gemini_content(&v),
        tool_calls: Vec::new(),
    })
}

#[cfg(feature = "anthropic")]
async fn send_claude(
    client: &reqwest::Client,
    base: &str,
    api_key: &HeaderValue,
    turn: &ChatTurn<'_>,
) -> RelayResult<TurnOutcome> {
    let url = format!("{}/v1/messages", base);
    let body = json!({
        "model": turn.model,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "system": SYSTEM_PROMPT,
        "messages": [{"role": "user", "content": turn.message}],
    });

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("x-api-key", api_key.clone());
    headers.insert(
        "anthropic-version",
        HeaderValue::from_static(ANTHROPIC_VERSION),
    );

    let resp = client.post(url).headers(headers).json(&body).send().await?;
    let v = read_json(resp).await?;
    Ok(TurnOutcome {
        text: extract_anthropic_content(&v),
        tool_calls: Vec::new(),
    })
}

/**
 * \brief 读取响应体；非 2xx 时交给错误分类器。
 */
pub(crate) async fn read_json(resp: reqwest::Response) -> RelayResult<Value> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(classify_upstream(Some(status.as_u16()), &text));
    }
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| RelayError::Upstream {
        status: Some(status.as_u16()),
        message: format!("响应不是合法的 JSON：{}", e),
    })
}

fn parse_openai_outcome(v: &Value) -> RelayResult<TurnOutcome> {
    let message = v
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| RelayError::Upstream {
            status: None,
            message: "响应中缺少 choices[0].message".to_string(),
        })?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);
    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .map(|call| ToolCall {
                    // 缺少名称的调用仍计入，执行阶段按未知工具跳过
                    name: call
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(TurnOutcome { text, tool_calls })
}

#[cfg(feature = "anthropic")]
fn extract_anthropic_content(v: &Value) -> Option<String> {
    v.get("content").and_then(Value::as_array).map(|blocks| {
        blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("")
    })
}

#[cfg(feature = "google")]
fn extract_gemini_content(v: &Value) -> Option<String> {
    if let Some(first) = v
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    {
        if let Some(parts) = first
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            return Some(
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(""),
            );
        }
        if let Some(text) = first.get("output").and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }
    v.get("text").and_then(Value::as_str).map(str::to_string)
}

#[cfg(feature = "google")]
fn normalize_gemini_base(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/v1")
        || trimmed.ends_with("/v1beta")
        || trimmed.contains("/v1/")
        || trimmed.contains("/v1beta/")
    {
        trimmed.to_string()
    } else {
        format!("{}/v1beta", trimmed)
    }
}
