use serde_json::{json, Value};

use crate::error::{classify_upstream, truncate_chars, RelayError, RelayResult};
use crate::llm::read_json;
use crate::models::{Configuration, GeneratedImage, ImageRequest, SearchResult};
use crate::{providers, telemetry};

const BRAVE_SEARCH_BASE: &str = "https://api.search.brave.com/res/v1";
const OPENAI_IMAGE_BASE: &str = "https://api.openai.com/v1";
const SEARCH_RESULT_COUNT: u32 = 10;
const ERROR_BODY_MAX_CHARS: usize = 200;

/** \brief 发送给图像服务前的提示词长度上限（字符）。 */
pub const IMAGE_PROMPT_MAX_CHARS: usize = 4000;

/**
 * \brief 网页搜索与图像生成中继，各自只对接一个上游服务。
 */
#[derive(Debug, Clone, Default)]
pub struct AuxRelay {
    client: reqwest::Client,
    base_override: Option<String>,
}

impl AuxRelay {
    pub fn new(base_override: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_override: base_override
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("CLAWBOX_RELAY_BASE").ok())
    }

    fn base<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_override.as_deref().unwrap_or(default)
    }

    /**
     * \brief 网页搜索。
     * \param query 搜索关键字（JSON 值，需为非空字符串）
     */
    pub async fn search(
        &self,
        config: &Configuration,
        query: Option<&Value>,
    ) -> RelayResult<Vec<SearchResult>> {
        let secrets = config.secrets();
        self.search_inner(config, query).await.map_err(|e| {
            let e = e.redact(&secrets);
            telemetry::log_error("relay.search", &e.to_string());
            e
        })
    }

    async fn search_inner(
        &self,
        config: &Configuration,
        query: Option<&Value>,
    ) -> RelayResult<Vec<SearchResult>> {
        let query = non_empty_str(query)
            .ok_or_else(|| RelayError::InvalidInput("请输入搜索关键字。".to_string()))?;
        let provider = providers::search_provider(&config.search_provider).ok_or_else(|| {
            RelayError::Unsupported(format!("搜索服务商 {}", config.search_provider))
        })?;
        let api_key = config.search_api_key.trim();
        if api_key.is_empty() {
            return Err(RelayError::MissingCredential("搜索 API Key"));
        }

        telemetry::log_event(
            "relay.search",
            &format!("provider={} query_len={}", provider.id, query.len()),
        );

        let url = format!("{}/web/search", self.base(BRAVE_SEARCH_BASE));
        let count = SEARCH_RESULT_COUNT.to_string();
        let resp = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(truncated_failure(status.as_u16(), &text));
        }
        let text = resp.text().await?;
        let v: Value = serde_json::from_str(&text).map_err(|e| RelayError::Upstream {
            status: Some(status.as_u16()),
            message: format!("搜索结果不是合法的 JSON：{}", e),
        })?;
        Ok(project_brave_results(&v))
    }

    /**
     * \brief 图像生成。
     */
    pub async fn generate_image(
        &self,
        config: &Configuration,
        request: &ImageRequest,
    ) -> RelayResult<GeneratedImage> {
        let secrets = config.secrets();
        self.generate_image_inner(config, request)
            .await
            .map_err(|e| {
                let e = e.redact(&secrets);
                telemetry::log_error("relay.image", &e.to_string());
                e
            })
    }

    async fn generate_image_inner(
        &self,
        config: &Configuration,
        request: &ImageRequest,
    ) -> RelayResult<GeneratedImage> {
        let prompt = request
            .prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| RelayError::InvalidInput("请输入图像描述。".to_string()))?;
        let provider = providers::image_provider(&config.image_provider).ok_or_else(|| {
            RelayError::Unsupported(format!("图像服务商 {}", config.image_provider))
        })?;
        let api_key = resolve_image_key(config)
            .ok_or(RelayError::MissingCredential("图像 API Key"))?;

        let model = provider.resolve_model(request.model.as_deref());
        let size = model.resolve_size(request.size.as_deref());
        let prompt = truncate_chars(prompt, IMAGE_PROMPT_MAX_CHARS);

        telemetry::log_event(
            "relay.image",
            &format!(
                "provider={} model={} size={} prompt_chars={}",
                provider.id,
                model.id,
                size,
                prompt.chars().count()
            ),
        );

        let url = format!("{}/images/generations", self.base(OPENAI_IMAGE_BASE));
        let body = json!({
            "model": model.id,
            "prompt": prompt,
            "size": size,
            "n": 1
        });
        let resp = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let v = read_json(resp).await?;
        parse_image_response(&v)
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/**
 * \brief 图像密钥：优先 imageApiKey，其次通用 apiKey。
 */
fn resolve_image_key(config: &Configuration) -> Option<&str> {
    [config.image_api_key.trim(), config.api_key.trim()]
        .into_iter()
        .find(|k| !k.is_empty())
}

fn truncated_failure(status: u16, body: &str) -> RelayError {
    match classify_upstream(Some(status), body) {
        RelayError::Upstream { status, .. } => RelayError::Upstream {
            status,
            message: format!(
                "HTTP {}: {}",
                status.unwrap_or_default(),
                truncate_chars(body.trim(), ERROR_BODY_MAX_CHARS)
            ),
        },
        restricted => restricted,
    }
}

fn project_brave_results(v: &Value) -> Vec<SearchResult> {
    let field = |item: &Value, key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    v.get("web")
        .and_then(|w| w.get("results"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| SearchResult {
                    title: field(item, "title"),
                    url: field(item, "url"),
                    snippet: field(item, "description"),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_image_response(v: &Value) -> RelayResult<GeneratedImage> {
    let first = v
        .get("data")
        .and_then(|d| d.get(0))
        .ok_or_else(|| RelayError::Upstream {
            status: None,
            message: "响应中缺少 data[0]".to_string(),
        })?;
    let url = first
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::Upstream {
            status: None,
            message: "响应中缺少图像 URL".to_string(),
        })?;
    Ok(GeneratedImage {
        url: url.to_string(),
        revised_prompt: first
            .get("revised_prompt")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_key_fallback_order() {
        let mut cfg = Configuration {
            api_key: "chat-key".to_string(),
            ..Configuration::default()
        };
        assert_eq!(resolve_image_key(&cfg), Some("chat-key"));
        cfg.image_api_key = " image-key ".to_string();
        assert_eq!(resolve_image_key(&cfg), Some("image-key"));
        cfg.image_api_key.clear();
        cfg.api_key.clear();
        assert_eq!(resolve_image_key(&cfg), None);
    }

    #[test]
    fn test_brave_projection_keeps_order() {
        let v = json!({"web": {"results": [
            {"title": "One", "url": "https://one.example", "description": "first"},
            {"title": "Two", "url": "https://two.example"}
        ]}});
        let results = project_brave_results(&v);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "One");
        assert_eq!(results[0].snippet, "first");
        assert_eq!(results[1].url, "https://two.example");
        assert_eq!(results[1].snippet, "");
        assert!(project_brave_results(&json!({})).is_empty());
    }

    #[test]
    fn test_failure_body_is_truncated() {
        let body = "x".repeat(1000);
        match truncated_failure(500, &body) {
            RelayError::Upstream { message, .. } => {
                assert!(message.starts_with("HTTP 500: "));
                assert!(message.chars().count() <= ERROR_BODY_MAX_CHARS + 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_image_response() {
        let v = json!({"data": [{"url": "https://img.example/1.png", "revised_prompt": "a cat"}]});
        let img = parse_image_response(&v).expect("parse");
        assert_eq!(img.url, "https://img.example/1.png");
        assert_eq!(img.revised_prompt.as_deref(), Some("a cat"));
        assert!(parse_image_response(&json!({"data": []})).is_err());
    }

    #[tokio::test]
    async fn test_validation_runs_before_network() {
        let relay = AuxRelay::new(Some("http://127.0.0.1:9".to_string()));
        let cfg = Configuration::default();

        let err = relay.search(&cfg, Some(&json!(""))).await.expect_err("empty");
        assert!(matches!(err, RelayError::InvalidInput(_)));

        let err = relay
            .search(&cfg, Some(&json!("rust")))
            .await
            .expect_err("no key");
        assert!(matches!(err, RelayError::MissingCredential(_)));

        let bing = Configuration {
            search_provider: "bing".to_string(),
            search_api_key: "k".to_string(),
            ..Configuration::default()
        };
        let err = relay
            .search(&bing, Some(&json!("rust")))
            .await
            .expect_err("unsupported");
        assert!(matches!(err, RelayError::Unsupported(_)));

        let err = relay
            .generate_image(&cfg, &ImageRequest::default())
            .await
            .expect_err("no prompt");
        assert!(matches!(err, RelayError::InvalidInput(_)));

        let err = relay
            .generate_image(
                &cfg,
                &ImageRequest {
                    prompt: Some("a cat".to_string()),
                    ..ImageRequest::default()
                },
            )
            .await
            .expect_err("no key");
        assert!(matches!(err, RelayError::MissingCredential(_)));
    }
}
