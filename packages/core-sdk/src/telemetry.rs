use std::path::Path;

use anyhow::Result;
use once_cell::sync::OnceCell;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

struct Rfc3339Timer;

impl FormatTime for Rfc3339Timer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", now)
    }
}

/**
 * \brief 初始化日志：控制台输出，若给定目录则同时按天滚动写入 `chatrelay.log`。
 */
pub fn init(log_dir: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer().with_target(false).with_timer(Rfc3339Timer);

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "chatrelay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_timer(Rfc3339Timer),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;
    Ok(())
}

/**
 * \brief 记录常规事件。
 */
pub fn log_event(category: &str, message: &str) {
    tracing::info!(category, "{}", message);
}

/**
 * \brief 记录错误事件。
 */
pub fn log_error(category: &str, message: &str) {
    tracing::error!(category, "{}", message);
}

/**
 * \brief 日志中只保留 Key 的前 8 个字符。
 */
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(8).collect();
    if key.chars().count() > 8 {
        format!("{}…", prefix)
    } else {
        prefix
    }
}
