//! 日志初始化模块.
//!
//! 解码库通过 `log` 门面输出日志, 这里安装 `tracing-subscriber` 注册表并桥接 `log` 记录:
//! - console: stderr, 彩色, 带源码位置
//! - file (可选): 按天滚动, 无色, 由 `tracing-appender` 非阻塞写出
//!
//! 级别由 [`LoggingConfig::level`] 决定, `YING_LOG` 环境变量可覆盖.
//! 日志文件命名为 `{directory}/{prefix}.{date}.log`.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod retention;

/// 覆盖配置级别的环境变量
pub const LOG_ENV: &str = "YING_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` 语法, 如 "info" 或 "ying_codec=trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 是否在 console 中使用 ANSI 颜色
    #[serde(default = "default_true")]
    pub ansi: bool,
    /// 文件输出, 为空时只写 console
    #[serde(default)]
    pub file: Option<FileLogConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileLogConfig {
    pub directory: String,
    pub file_prefix: String,
    /// 早于该天数的历史日志在初始化时删除
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            ansi: true,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// 只输出到 console 的配置
    pub fn console(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// 增加按天滚动的文件输出
    pub fn with_file(mut self, directory: impl Into<String>, file_prefix: impl Into<String>) -> Self {
        self.file = Some(FileLogConfig {
            directory: directory.into(),
            file_prefix: file_prefix.into(),
            retention_days: default_retention_days(),
        });
        self
    }

    /// 构造过滤器: 环境变量优先, 否则使用配置的级别
    pub fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level).with_context(|| format!("无效的日志级别: {}", self.level))
    }
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 初始化全局日志系统
///
/// 全局订阅器只能安装一次, 重复调用返回错误.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .event_format(ConsoleFormatter { ansi: config.ansi })
        .with_filter(config.filter()?);

    let file_layer = match &config.file {
        Some(file) => {
            let directory = Path::new(&file.directory);
            std::fs::create_dir_all(directory)
                .with_context(|| format!("创建日志目录失败, path={}", directory.display()))?;
            retention::cleanup_logs(directory, &file.file_prefix, file.retention_days)?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&file.file_prefix)
                .filename_suffix("log")
                .build(directory)
                .context("创建日志文件失败")?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            LOG_GUARD.set(guard).ok();
            Some(
                fmt::Layer::default()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(FileFormatter)
                    .with_filter(config.filter()?),
            )
        }
        None => None,
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已经初始化")
}

/// 指定日期的日志文件路径, 与 `RollingFileAppender` 的命名一致
#[cfg(test)]
pub(crate) fn build_current_log_path(
    directory: &Path,
    prefix: &str,
    date: chrono::NaiveDate,
) -> std::path::PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

fn write_timestamp(writer: &mut Writer<'_>) -> std::fmt::Result {
    let now = Local::now();
    write!(
        writer,
        "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis()
    )
}

/// Console 格式: 时间戳, 级别 (可着色), 源码位置
struct ConsoleFormatter {
    ansi: bool,
}

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write_timestamp(&mut writer)?;
        let (color, reset) = if self.ansi {
            let color = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                _ => "\x1b[34m",
            };
            (color, "\x1b[0m")
        } else {
            ("", "")
        };
        write!(
            writer,
            "{}{:5}{} {}:{} > ",
            color,
            meta.level().to_string(),
            reset,
            meta.file().unwrap_or("unknown"),
            meta.line().unwrap_or(0)
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// File 格式: 无色, 时间戳 + 级别 + 消息
struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        write_timestamp(&mut writer)?;
        write!(writer, "{:5} > ", event.metadata().level().to_string())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
