pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod providers;
pub mod relay;
pub mod server;
pub mod telemetry;
pub mod tools;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::config::ConfigStore;
    pub use crate::error::{ErrorCategory, RelayError};
    pub use crate::llm::ChatDispatcher;
    pub use crate::models::Configuration;
    pub use crate::relay::AuxRelay;
    pub use crate::server::AppState;
}
