//! 解码器配置.

use std::fmt;
use std::sync::Arc;

/// 头信息回调, 参数为格式化好的一行摘要 (参数集、切片头)
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// H.264 解码器配置
#[derive(Clone, Default)]
pub struct DecoderConfig {
    /// 工作线程数: 0 为同步模式, 负数为逻辑 CPU 数 (不超过 16)
    pub n_threads: i32,
    /// 可选的头信息回调
    pub log_callback: Option<LogCallback>,
}

impl DecoderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置工作线程数
    pub fn with_threads(mut self, n_threads: i32) -> Self {
        self.n_threads = n_threads;
        self
    }

    /// 设置头信息回调
    pub fn with_log_callback(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log_callback = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for DecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderConfig")
            .field("n_threads", &self.n_threads)
            .field("log_callback", &self.log_callback.is_some())
            .finish()
    }
}
