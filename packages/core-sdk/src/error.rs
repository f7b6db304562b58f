use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

/**
 * \brief 面向用户的错误大类。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Configuration,
    IntegrationUnavailable,
    Upstream,
    AccessRestricted,
}

/**
 * \brief 中继层统一错误类型，所有对外接口在边界处都转换为它。
 */
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("malformed credential: {0}")]
    MalformedCredential(&'static str),

    #[error("no model selected for provider {0}")]
    NoModelSelected(String),

    #[error("not supported yet: {0}")]
    Unsupported(String),

    #[error("integration unavailable: {0}")]
    IntegrationUnavailable(&'static str),

    #[error("upstream error: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("access restricted: {message}")]
    AccessRestricted {
        status: Option<u16>,
        message: String,
    },
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

const GENERIC_UPSTREAM_MESSAGE: &str = "上游服务返回了无法识别的错误";

const RESTRICTION_PATTERNS: &[&str] = &[
    "region",
    "country",
    "territory",
    "location is not supported",
    "unsupported_country",
    "not available in your",
];

impl RelayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidInput(_) => ErrorCategory::Validation,
            RelayError::MissingCredential(_)
            | RelayError::MalformedCredential(_)
            | RelayError::NoModelSelected(_)
            | RelayError::Unsupported(_) => ErrorCategory::Configuration,
            RelayError::IntegrationUnavailable(_) => ErrorCategory::IntegrationUnavailable,
            RelayError::Upstream { .. } => ErrorCategory::Upstream,
            RelayError::AccessRestricted { .. } => ErrorCategory::AccessRestricted,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::Configuration => StatusCode::BAD_REQUEST,
            ErrorCategory::IntegrationUnavailable
            | ErrorCategory::Upstream
            | ErrorCategory::AccessRestricted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /**
     * \brief 生成给浏览器展示的简短提示。
     */
    pub fn user_message(&self) -> String {
        match self {
            RelayError::InvalidInput(what) => format!("❌ {}", what),
            RelayError::MissingCredential(what) => {
                format!("⚠️ 请先在设定页面输入 {}！", what)
            }
            RelayError::MalformedCredential(what) => {
                format!("⚠️ {} 含有非法字符，请在设定页面重新输入。", what)
            }
            RelayError::NoModelSelected(provider) => {
                format!("⚠️ 服务商 {} 尚未选择模型，请在设定页面选择模型。", provider)
            }
            RelayError::Unsupported(what) => format!("⚠️ {} 暂不支持，敬请期待。", what),
            RelayError::IntegrationUnavailable(name) => format!(
                "❌ 当前版本未包含 {} 集成，请使用启用该功能的构建，或切换到其他服务商。",
                name
            ),
            RelayError::Upstream { message, .. } => format!("❌ AI 请求失败：{}", message),
            RelayError::AccessRestricted { message, .. } => format!(
                "🌏 当前所在地区无法使用该服务（{}）。请尝试开启 VPN，或在设定页面切换到其他 AI 服务商。",
                message
            ),
        }
    }

    /**
     * \brief 将错误文本中的密钥替换为掩码。
     */
    pub fn redact(self, secrets: &[&str]) -> Self {
        match self {
            RelayError::Upstream { status, message } => RelayError::Upstream {
                status,
                message: redact_text(&message, secrets),
            },
            RelayError::AccessRestricted { status, message } => RelayError::AccessRestricted {
                status,
                message: redact_text(&message, secrets),
            },
            RelayError::InvalidInput(message) => {
                RelayError::InvalidInput(redact_text(&message, secrets))
            }
            RelayError::Unsupported(message) => {
                RelayError::Unsupported(redact_text(&message, secrets))
            }
            other => other,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let message = err.without_url().to_string();
        classify_upstream(status, &message)
    }
}

/**
 * \brief 错误分类器：根据上游状态码与响应体判断错误类别。
 * \param status 上游 HTTP 状态码，传输层失败时为 None
 * \param body 上游响应体或错误描述
 */
pub fn classify_upstream(status: Option<u16>, body: &str) -> RelayError {
    let message = extract_error_message(body).unwrap_or_else(|| match status {
        Some(code) => format!("{} (HTTP {})", GENERIC_UPSTREAM_MESSAGE, code),
        None => GENERIC_UPSTREAM_MESSAGE.to_string(),
    });

    if status == Some(403) || mentions_restriction(body) {
        RelayError::AccessRestricted { status, message }
    } else {
        RelayError::Upstream { status, message }
    }
}

/**
 * \brief 从各家服务商不同的错误结构中提取可读信息。
 */
pub fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => {
            let candidate = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .or_else(|| v.get("error").and_then(Value::as_str))
                .or_else(|| v.get("message").and_then(Value::as_str))
                .or_else(|| v.get("detail").and_then(Value::as_str));
            candidate
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }
        // 非 JSON 响应（如网关 HTML 页面）只保留前一小段
        Err(_) => Some(truncate_chars(trimmed, 200)),
    }
}

fn mentions_restriction(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    RESTRICTION_PATTERNS.iter().any(|p| lower.contains(p))
}

fn redact_text(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| s.len() >= 4) {
        out = out.replace(secret, "***");
    }
    out
}

/**
 * \brief 按字符截断，避免切断多字节字符。
 */
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_403_is_access_restricted() {
        let err = classify_upstream(Some(403), r#"{"error":{"message":"Forbidden"}}"#);
        assert_eq!(err.category(), ErrorCategory::AccessRestricted);
        assert!(err.user_message().contains("VPN"));
    }

    #[test]
    fn test_region_text_is_access_restricted_without_403() {
        let body = r#"{"error":{"code":"unsupported_country_region_territory","message":"Country, region, or territory not supported"}}"#;
        let err = classify_upstream(Some(400), body);
        assert_eq!(err.category(), ErrorCategory::AccessRestricted);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_generic_500_keeps_upstream_message() {
        let err = classify_upstream(Some(500), r#"{"error":{"message":"The server had an error"}}"#);
        assert_eq!(err.category(), ErrorCategory::Upstream);
        let msg = err.user_message();
        assert!(msg.contains("The server had an error"));
        assert!(!msg.contains("VPN"));
    }

    #[test]
    fn test_message_shapes() {
        assert_eq!(
            extract_error_message(r#"{"error":"bad key"}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            extract_error_message(r#"{"message":"quota exceeded"}"#).as_deref(),
            Some("quota exceeded")
        );
        assert_eq!(
            extract_error_message(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
            )
            .as_deref(),
            Some("Overloaded")
        );
        assert_eq!(extract_error_message("{}"), None);
        assert_eq!(extract_error_message(""), None);
    }

    #[test]
    fn test_unstructured_body_falls_back_to_generic_with_status() {
        let err = classify_upstream(Some(502), "{}");
        match err {
            RelayError::Upstream { status, message } => {
                assert_eq!(status, Some(502));
                assert!(message.contains("502"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_redact_hides_secret() {
        let err = RelayError::Upstream {
            status: Some(401),
            message: "Incorrect API key provided: sk-secret-123".to_string(),
        }
        .redact(&["sk-secret-123"]);
        assert!(!err.user_message().contains("sk-secret-123"));
        assert!(err.user_message().contains("***"));
    }

    #[test]
    fn test_configuration_errors_are_bad_request() {
        assert_eq!(
            RelayError::MissingCredential("API Key").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::MalformedCredential("API Key").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            RelayError::IntegrationUnavailable("anthropic").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(RelayError::IntegrationUnavailable("anthropic")
            .user_message()
            .contains("anthropic"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("你好世界", 2), "你好");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
