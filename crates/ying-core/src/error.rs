//! 统一错误类型定义.
//!
//! 解码器各层共用的错误类型. 每个变体对应 `decode_nal` 可能返回的一类结果码,
//! 调用方据此决定跳过、重试还是结束.

use thiserror::Error;

/// Ying 解码器统一错误类型
#[derive(Debug, Error)]
pub enum YingError {
    /// 无效参数 (调用方违反接口约定)
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 码流使用了未实现的特性, 该 NAL 被跳过
    #[error("不支持的特性: {0}")]
    Unsupported(String),

    /// 畸形码流 (尾随位或 CABAC 结束检查失败等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 内存分配失败
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// DPB 没有可用槽位, 需要先取走并归还输出帧
    #[error("缓冲区不足, 需要先取出输出帧")]
    OutOfBuffers,

    /// 非阻塞模式下操作需要等待, 稍后以相同 NAL 重试
    #[error("操作将阻塞, 请稍后重试")]
    WouldBlock,

    /// 码流已结束, 所有帧均已输出
    #[error("没有更多数据")]
    NoData,

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl YingError {
    /// 调用方是否应当以同一 NAL 重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::WouldBlock | Self::OutOfBuffers | Self::OutOfMemory(_)
        )
    }
}

/// Ying 统一 Result 类型
pub type YingResult<T> = Result<T, YingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(YingError::WouldBlock.is_retryable());
        assert!(YingError::OutOfBuffers.is_retryable());
        assert!(!YingError::InvalidData("x".into()).is_retryable());
        assert!(!YingError::NoData.is_retryable());
    }

    #[test]
    fn test_display_contains_detail() {
        let err = YingError::Unsupported("field_pic_flag".into());
        assert!(err.to_string().contains("field_pic_flag"));
    }
}
