use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::{models::Configuration, telemetry};

/** \brief 默认配置文件名（当前工作目录下）。 */
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/**
 * \brief 设定保存失败的原因。
 */
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /** \brief 请求体不是对象或字段类型不匹配 */
    #[error("invalid settings: {0}")]
    Invalid(String),
    /** \brief 写入磁盘失败，内存中的配置保持不变 */
    #[error("persist failed: {0}")]
    Persist(#[from] anyhow::Error),
}

/**
 * \brief 配置存储：内存中一份记录 + 本地 JSON 文件。
 * \details 读取返回快照；写入为“合并 → 去空白 → 落盘 → 替换”，后写者生效。
 */
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Configuration>,
}

impl ConfigStore {
    /**
     * \brief 从文件加载配置，文件缺失或损坏时使用默认值并记录警告，不会失败。
     */
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match read_config(&path) {
            Ok(Some(cfg)) => {
                telemetry::log_event("config", &format!("loaded {}", path.display()));
                cfg
            }
            Ok(None) => {
                telemetry::log_event(
                    "config",
                    &format!("{} not found, using defaults", path.display()),
                );
                Configuration::default()
            }
            Err(e) => {
                telemetry::log_warn(
                    "config",
                    &format!("failed to read {}, using defaults: {:#}", path.display(), e),
                );
                Configuration::default()
            }
        };
        telemetry::set_enabled(config.telemetry_enabled);
        Self::with_config(path, config)
    }

    /**
     * \brief 以给定配置构造存储，不读取磁盘，也不改动全局日志开关。
     */
    pub fn with_config(path: impl Into<PathBuf>, config: Configuration) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /**
     * \brief 获取当前配置快照。
     */
    pub fn snapshot(&self) -> Configuration {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /**
     * \brief 浅合并传入字段并落盘。
     * \param patch 部分配置字段（JSON 对象），值为 null 的字段保持原值
     * \return 合并后的新配置
     */
    pub fn save(&self, patch: &Value) -> Result<Configuration, SaveError> {
        let incoming = patch
            .as_object()
            .ok_or_else(|| SaveError::Invalid("settings payload must be a JSON object".into()))?;

        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut merged = serde_json::to_value(&*guard).map_err(|e| SaveError::Persist(e.into()))?;
        if let Some(fields) = merged.as_object_mut() {
            for (key, value) in incoming.iter().filter(|(_, v)| !v.is_null()) {
                fields.insert(key.clone(), value.clone());
            }
        }
        let mut next: Configuration =
            serde_json::from_value(merged).map_err(|e| SaveError::Invalid(e.to_string()))?;
        next.trim_secrets();

        write_config(&self.path, &next)?;
        telemetry::set_enabled(next.telemetry_enabled);
        telemetry::log_event(
            "config",
            &format!(
                "saved fields=[{}]",
                incoming.keys().cloned().collect::<Vec<_>>().join(",")
            ),
        );
        *guard = next.clone();
        Ok(next)
    }
}

fn read_config(path: &Path) -> Result<Option<Configuration>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).context("read config file")?;
    if raw.trim().is_empty() {
        return Err(anyhow!("config file is empty"));
    }
    let cfg = serde_json::from_str(&raw).context("parse config file")?;
    Ok(Some(cfg))
}

fn write_config(path: &Path, config: &Configuration) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).context("create config directory")?;
        }
    }
    let body = serde_json::to_string_pretty(config)?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::load(dir.path().join("config.json"));
        (dir, store)
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let (_dir, store) = temp_store();
        assert_eq!(store.snapshot(), Configuration::default());
    }

    #[test]
    fn test_corrupt_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").expect("write");
        let store = ConfigStore::load(&path);
        assert_eq!(store.snapshot(), Configuration::default());
    }

    #[test]
    fn test_wrong_shape_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"allowFileRead":"yes please"}"#).expect("write");
        let store = ConfigStore::load(&path);
        assert!(!store.snapshot().allow_file_read);
    }

    #[test]
    fn test_save_is_shallow_merge() {
        let (_dir, store) = temp_store();
        store
            .save(&json!({"apiKey": "sk-1", "apiProvider": "deepseek", "allowFileRead": true}))
            .expect("first save");
        let before = store.snapshot();

        let after = store.save(&json!({"model": "x"})).expect("second save");
        assert_eq!(after.model, "x");
        assert_eq!(
            Configuration {
                model: before.model.clone(),
                ..after.clone()
            },
            before
        );
    }

    #[test]
    fn test_save_trims_secrets_and_persists() {
        let (dir, store) = temp_store();
        store
            .save(&json!({"apiKey": "  sk-trim  ", "searchApiKey": "\nbrave\t"}))
            .expect("save");
        let reloaded = ConfigStore::load(dir.path().join("config.json")).snapshot();
        assert_eq!(reloaded.api_key, "sk-trim");
        assert_eq!(reloaded.search_api_key, "brave");
    }

    #[test]
    fn test_invalid_patch_leaves_state_untouched() {
        let (_dir, store) = temp_store();
        store.save(&json!({"model": "gpt-4o"})).expect("save");
        let err = store
            .save(&json!({"allowFileRead": "definitely"}))
            .expect_err("type mismatch");
        assert!(matches!(err, SaveError::Invalid(_)));
        assert_eq!(store.snapshot().model, "gpt-4o");
        assert!(matches!(
            store.save(&json!(["not", "an", "object"])),
            Err(SaveError::Invalid(_))
        ));
    }

    #[test]
    fn test_null_fields_keep_current_values() {
        let (_dir, store) = temp_store();
        store
            .save(&json!({"model": "gpt-4o", "apiKey": "sk-1"}))
            .expect("first save");
        let cfg = store
            .save(&json!({"model": null, "allowFileRead": true}))
            .expect("null is not a type error");
        assert_eq!(cfg.model, "gpt-4o");
        assert_eq!(cfg.api_key, "sk-1");
        assert!(cfg.allow_file_read);
    }

    #[test]
    fn test_with_config_leaves_telemetry_switch_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let _store = ConfigStore::with_config(
            dir.path().join("config.json"),
            Configuration {
                telemetry_enabled: true,
                ..Configuration::default()
            },
        );
        assert!(!telemetry::is_enabled());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let (_dir, store) = temp_store();
        let cfg = store
            .save(&json!({"favouriteColour": "red", "model": "m"}))
            .expect("save");
        assert_eq!(cfg.model, "m");
    }
}
