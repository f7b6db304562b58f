use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

static LOG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    let dir = std::env::var("CLAWBOX_LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    PathBuf::from(dir).join("clawbox.log")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

/**
 * \brief 更新事件日志开关，由配置中的 telemetryEnabled 驱动。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 记录常规事件（仅在开关打开时写入文件）。
 */
pub fn log_event(category: &str, message: &str) {
    record(Level::Info, category, message);
}

/**
 * \brief 记录非致命警告：始终输出到 stderr，开关打开时同时写入文件。
 */
pub fn log_warn(category: &str, message: &str) {
    eprintln!("⚠️  [{}] {}", category, message);
    record(Level::Warn, category, message);
}

/**
 * \brief 记录错误事件。
 */
pub fn log_error(category: &str, message: &str) {
    record(Level::Error, category, message);
}

fn record(level: Level, category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = append_line(&format_line(level, category, message)) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn format_line(level: Level, category: &str, message: &str) -> String {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "-".to_string());
    // 单行记录，避免上游错误体中的换行打乱日志
    let flat = message.replace(['\r', '\n'], " ");
    format!("{} [{}] {} - {}", timestamp, level.tag(), category, flat)
}

fn append_line(line: &str) -> Result<()> {
    if let Some(dir) = LOG_PATH.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_PATH.as_path())?;
    writeln!(file, "{}", line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_is_single_line() {
        let line = format_line(Level::Error, "llm.chat", "first\nsecond\r\nthird");
        assert!(!line.contains('\n'));
        assert!(line.contains("[ERROR] llm.chat - first second  third"));
    }
}
