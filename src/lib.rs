//! # Ying (影)
//!
//! 纯 Rust 实现的 H.264/AVC 视频解码器.
//!
//! - 8 位 4:2:0 逐行码流, Baseline/Main/High 档次
//! - CAVLC 与 CABAC 熵解码, 帧内/帧间预测, 加权预测, 去块滤波
//! - 按 POC 重排输出, 出错宏块自动修复
//! - 可选的切片级多线程解码
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use ying::{DecoderConfig, H264Decoder, YingError};
//!
//! # fn main() -> anyhow::Result<()> {
//! let stream = std::fs::read("input.264")?;
//! let mut decoder = H264Decoder::new(DecoderConfig::new().with_threads(-1))?;
//! let mut nal = ying::skip_to_first_nal(&stream);
//! loop {
//!     let (res, next) = decoder.decode_nal(nal, false);
//!     while let Some(frame) = decoder.get_frame(false)? {
//!         println!("{}x{} poc={}", frame.width(), frame.height(), frame.poc());
//!     }
//!     match res {
//!         Err(YingError::NoData) => break,
//!         Err(e) => eprintln!("{e}"),
//!         Ok(()) => {}
//!     }
//!     nal = next;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `ying-core` | 错误类型与位流读写 |
//! | `ying-codec` | NAL/SPS 解析与 H.264 解码器 |

pub mod logging;

/// 错误类型与位流工具
pub use ying_core as core;

/// 语法解析与解码器
pub use ying_codec as codec;

pub use ying_codec::decoders::h264::{DecoderConfig, Frame, FrameView, H264Decoder, LogCallback};
pub use ying_core::{YingError, YingResult};

/// 获取 Ying 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 跳过码流开头直到第一个起始码之后
///
/// 没有起始码时返回整个输入, 视为单个 NAL 单元.
pub fn skip_to_first_nal(stream: &[u8]) -> &[u8] {
    match ying_core::bitreader::find_start_code(stream) {
        Some(pos) => &stream[pos + 3..],
        None => stream,
    }
}
