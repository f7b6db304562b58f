use serde::{Deserialize, Serialize};

/**
 * \brief 用户配置记录，与本地 config.json 一一对应。
 * \details 所有字段都有安全默认值，缺失字段的旧文件也能正常加载。
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    /** \brief 聊天服务的 API Key */
    pub api_key: String,
    /** \brief 当前选择的服务商 ID */
    pub api_provider: String,
    /** \brief 模型名，留空则使用服务商默认模型 */
    pub model: String,
    /** \brief 是否允许模型调用本地时间工具 */
    pub allow_file_read: bool,
    /** \brief 预留开关，当前不会执行任何系统指令 */
    pub allow_system_cmd: bool,
    /** \brief 图像生成服务商 ID */
    pub image_provider: String,
    /** \brief 图像生成专用 API Key，留空时回退到 api_key */
    pub image_api_key: String,
    /** \brief 网页搜索服务商 ID */
    pub search_provider: String,
    /** \brief 网页搜索 API Key */
    pub search_api_key: String,
    pub telegram_bot_token: String,
    pub discord_bot_token: String,
    pub line_channel_token: String,
    /** \brief 是否写入本地事件日志 */
    pub telemetry_enabled: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_provider: "openai".to_string(),
            model: String::new(),
            allow_file_read: false,
            allow_system_cmd: false,
            image_provider: "openai".to_string(),
            image_api_key: String::new(),
            search_provider: "brave".to_string(),
            search_api_key: String::new(),
            telegram_bot_token: String::new(),
            discord_bot_token: String::new(),
            line_channel_token: String::new(),
            telemetry_enabled: false,
        }
    }
}

impl Configuration {
    /**
     * \brief 去除所有密钥字段首尾空白。
     */
    pub fn trim_secrets(&mut self) {
        for secret in [
            &mut self.api_key,
            &mut self.image_api_key,
            &mut self.search_api_key,
            &mut self.telegram_bot_token,
            &mut self.discord_bot_token,
            &mut self.line_channel_token,
        ] {
            let trimmed = secret.trim();
            if trimmed.len() != secret.len() {
                *secret = trimmed.to_string();
            }
        }
    }

    /**
     * \brief 返回当前配置中所有非空密钥，用于错误信息脱敏。
     */
    pub fn secrets(&self) -> Vec<&str> {
        [
            self.api_key.as_str(),
            self.image_api_key.as_str(),
            self.search_api_key.as_str(),
        ]
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
    }
}

/**
 * \brief 服务商协议族，决定请求走哪一个适配器。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolFamily {
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
    Google,
    Anthropic,
}

impl ProtocolFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolFamily::OpenAiCompatible => "openai-compatible",
            ProtocolFamily::Google => "google",
            ProtocolFamily::Anthropic => "anthropic",
        }
    }
}

/**
 * \brief 服务商描述，进程启动后不可变。
 */
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub family: ProtocolFamily,
    /** \brief 仅 OpenAI 兼容协议族携带，其余协议使用专用客户端 */
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<&'static str>,
    pub default_model: &'static str,
    pub models: &'static [&'static str],
    /** \brief 是否接受统一的 function 工具声明 */
    pub supports_tools: bool,
}

/**
 * \brief 可暴露给模型的本地能力。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
}

/**
 * \brief 模型在一次回复中请求的工具调用。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
}

/**
 * \brief 各协议适配器归一化后的单轮结果。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    /** \brief 模型原始文本，上游未返回时为 None */
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageModelDescriptor {
    pub id: &'static str,
    pub sizes: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageProviderDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub implemented: bool,
    pub default_model: &'static str,
    pub models: &'static [ImageModelDescriptor],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchProviderDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub implemented: bool,
}

/**
 * \brief 搜索结果条目，保持上游顺序。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/**
 * \brief 图像生成结果。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedImage {
    pub url: String,
    pub revised_prompt: Option<String>,
}

/**
 * \brief 图像生成请求参数。
 */
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}
