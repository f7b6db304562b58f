use crate::models::{
    ImageModelDescriptor, ImageProviderDescriptor, ProtocolFamily, ProviderDescriptor,
    SearchProviderDescriptor,
};

/** \brief 未识别的服务商 ID 一律回退到该服务商。 */
pub const FALLBACK_PROVIDER_ID: &str = "openai";

static PROVIDERS: &[ProviderDescriptor] = &[
    ProviderDescriptor {
        id: "openai",
        name: "OpenAI",
        family: ProtocolFamily::OpenAiCompatible,
        base_url: Some("https://api.openai.com/v1"),
        default_model: "gpt-4o-mini",
        models: &["gpt-4o-mini", "gpt-4o", "gpt-4-turbo", "gpt-3.5-turbo"],
        supports_tools: true,
    },
    ProviderDescriptor {
        id: "deepseek",
        name: "DeepSeek",
        family: ProtocolFamily::OpenAiCompatible,
        base_url: Some("https://api.deepseek.com/v1"),
        default_model: "deepseek-chat",
        models: &["deepseek-chat", "deepseek-reasoner"],
        supports_tools: true,
    },
    ProviderDescriptor {
        id: "groq",
        name: "Groq",
        family: ProtocolFamily::OpenAiCompatible,
        base_url: Some("https://api.groq.com/openai/v1"),
        default_model: "llama-3.3-70b-versatile",
        models: &[
            "llama-3.3-70b-versatile",
            "llama-3.1-8b-instant",
            "mixtral-8x7b-32768",
        ],
        supports_tools: true,
    },
    ProviderDescriptor {
        id: "mistral",
        name: "Mistral AI",
        family: ProtocolFamily::OpenAiCompatible,
        base_url: Some("https://api.mistral.ai/v1"),
        default_model: "mistral-small-latest",
        models: &[
            "mistral-small-latest",
            "mistral-large-latest",
            "open-mistral-nemo",
        ],
        supports_tools: true,
    },
    ProviderDescriptor {
        id: "xai",
        name: "xAI",
        family: ProtocolFamily::OpenAiCompatible,
        base_url: Some("https://api.x.ai/v1"),
        default_model: "grok-2-latest",
        models: &["grok-2-latest", "grok-beta"],
        supports_tools: true,
    },
    // 聚合网关，部分后端模型会拒绝 tools 字段
    ProviderDescriptor {
        id: "openrouter",
        name: "OpenRouter",
        family: ProtocolFamily::OpenAiCompatible,
        base_url: Some("https://openrouter.ai/api/v1"),
        default_model: "openai/gpt-4o-mini",
        models: &[
            "openai/gpt-4o-mini",
            "anthropic/claude-3.5-sonnet",
            "google/gemini-flash-1.5",
            "meta-llama/llama-3.1-70b-instruct",
        ],
        supports_tools: false,
    },
    ProviderDescriptor {
        id: "google",
        name: "Google Gemini",
        family: ProtocolFamily::Google,
        base_url: None,
        default_model: "gemini-1.5-flash",
        models: &["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash"],
        supports_tools: false,
    },
    ProviderDescriptor {
        id: "anthropic",
        name: "Anthropic Claude",
        family: ProtocolFamily::Anthropic,
        base_url: None,
        default_model: "claude-3-5-sonnet-20241022",
        models: &[
            "claude-3-5-sonnet-20241022",
            "claude-3-5-haiku-20241022",
            "claude-3-opus-20240229",
        ],
        supports_tools: false,
    },
];

static IMAGE_PROVIDERS: &[ImageProviderDescriptor] = &[ImageProviderDescriptor {
    id: "openai",
    name: "OpenAI DALL·E",
    implemented: true,
    default_model: "dall-e-3",
    models: &[
        ImageModelDescriptor {
            id: "dall-e-3",
            sizes: &["1024x1024", "1792x1024", "1024x1792"],
        },
        ImageModelDescriptor {
            id: "dall-e-2",
            sizes: &["256x256", "512x512", "1024x1024"],
        },
    ],
}];

static SEARCH_PROVIDERS: &[SearchProviderDescriptor] = &[
    SearchProviderDescriptor {
        id: "brave",
        name: "Brave Search",
        implemented: true,
    },
    SearchProviderDescriptor {
        id: "serpapi",
        name: "SerpApi",
        implemented: false,
    },
    SearchProviderDescriptor {
        id: "bing",
        name: "Bing Web Search",
        implemented: false,
    },
];

/**
 * \brief 按 ID 查找服务商，未识别时回退到 OpenAI。
 */
pub fn resolve(provider_id: &str) -> &'static ProviderDescriptor {
    let wanted = provider_id.trim();
    PROVIDERS
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(wanted))
        .unwrap_or_else(fallback_provider)
}

fn fallback_provider() -> &'static ProviderDescriptor {
    PROVIDERS
        .iter()
        .find(|p| p.id == FALLBACK_PROVIDER_ID)
        .unwrap_or(&PROVIDERS[0])
}

/**
 * \brief 服务商默认模型。
 */
pub fn default_model(provider_id: &str) -> &'static str {
    resolve(provider_id).default_model
}

/**
 * \brief 全部服务商，供设定页展示。
 */
pub fn catalog() -> &'static [ProviderDescriptor] {
    PROVIDERS
}

pub fn image_catalog() -> &'static [ImageProviderDescriptor] {
    IMAGE_PROVIDERS
}

pub fn search_catalog() -> &'static [SearchProviderDescriptor] {
    SEARCH_PROVIDERS
}

/**
 * \brief 查找已实现的图像服务商；未知或未实现返回 None。
 */
pub fn image_provider(provider_id: &str) -> Option<&'static ImageProviderDescriptor> {
    IMAGE_PROVIDERS
        .iter()
        .find(|p| p.implemented && p.id.eq_ignore_ascii_case(provider_id.trim()))
}

/**
 * \brief 查找已实现的搜索服务商；未知或未实现返回 None。
 */
pub fn search_provider(provider_id: &str) -> Option<&'static SearchProviderDescriptor> {
    SEARCH_PROVIDERS
        .iter()
        .find(|p| p.implemented && p.id.eq_ignore_ascii_case(provider_id.trim()))
}

impl ImageProviderDescriptor {
    /**
     * \brief 解析模型，未识别时使用默认模型。
     */
    pub fn resolve_model(&self, requested: Option<&str>) -> &ImageModelDescriptor {
        let wanted = requested.map(str::trim).unwrap_or_default();
        self.models
            .iter()
            .find(|m| m.id == wanted)
            .or_else(|| self.models.iter().find(|m| m.id == self.default_model))
            .unwrap_or(&self.models[0])
    }
}

impl ImageModelDescriptor {
    /**
     * \brief 解析尺寸，不在允许列表中时回退到第一个允许尺寸。
     */
    pub fn resolve_size(&self, requested: Option<&str>) -> &'static str {
        let wanted = requested.map(str::trim).unwrap_or_default();
        self.sizes
            .iter()
            .copied()
            .find(|s| *s == wanted)
            .unwrap_or(self.sizes[0])
    }
}
