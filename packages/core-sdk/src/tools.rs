use chrono::Local;
use serde_json::{json, Value};

use crate::models::{Configuration, ProtocolFamily, ToolCall, ToolDescriptor};
use crate::providers;

pub const READ_LOCAL_TIME: ToolDescriptor = ToolDescriptor {
    name: "read_local_time",
    description: "获取电脑当前系统时间",
};

/** \brief 发生工具调用时回复的固定开头。 */
pub const TOOL_REPLY_PREFIX: &str = "我执行了本地操作！";

/** \brief 每个工具结果前的标记，与模型自身文字区分。 */
pub const TOOL_RESULT_MARKER: &str = "[系统动作]";

const LOCAL_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/**
 * \brief 计算本次请求可以暴露给模型的工具。
 * \details 只有用户开启 allowFileRead 且服务商接受统一工具声明时才返回工具。
 */
pub fn resolve_tools(config: &Configuration, provider_id: &str) -> Vec<ToolDescriptor> {
    if !config.allow_file_read {
        return Vec::new();
    }
    let provider = providers::resolve(provider_id);
    if provider.family != ProtocolFamily::OpenAiCompatible || !provider.supports_tools {
        return Vec::new();
    }
    vec![READ_LOCAL_TIME]
}

/**
 * \brief 转换为 OpenAI function 工具声明。
 */
pub fn openai_tool_schema(tool: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": { "type": "object", "properties": {} }
        }
    })
}

/**
 * \brief 执行本地工具；未识别的名称返回 None。
 */
pub fn execute_tool(name: &str) -> Option<String> {
    match name {
        n if n == READ_LOCAL_TIME.name => Some(format!(
            "已获取本地时间：{}",
            Local::now().format(LOCAL_TIME_FORMAT)
        )),
        _ => None,
    }
}

/**
 * \brief 依次执行工具调用并拼接成最终回复；模型自身文字不保留。
 */
pub fn narrate_tool_calls(calls: &[ToolCall]) -> String {
    let mut reply = TOOL_REPLY_PREFIX.to_string();
    for call in calls {
        if let Some(output) = execute_tool(&call.name) {
            reply.push('\n');
            reply.push_str(TOOL_RESULT_MARKER);
            reply.push(' ');
            reply.push_str(&output);
        }
    }
    reply
}
