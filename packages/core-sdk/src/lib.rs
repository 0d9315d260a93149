pub mod billing;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;
pub mod sse;
pub mod telemetry;
pub mod tokens;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::billing;
    pub use crate::config::Config;
    pub use crate::error::{RelayError, Result};
    pub use crate::llm;
    pub use crate::models;
    pub use crate::server;
    pub use crate::telemetry;
}
