//! # ying-codec
//!
//! Ying H.264/AVC 解码器核心库.
//!
//! - [`parsers::h264`]: NAL 单元与 SPS 的语法解析
//! - [`decoders::h264`]: 完整的 8 位 4:2:0 逐行解码器 (CAVLC/CABAC, 帧内/帧间预测,
//!   去块滤波, 参考帧管理与多线程任务调度)
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use ying_codec::decoders::h264::{DecoderConfig, H264Decoder};
//! use ying_core::bitreader::find_start_code;
//!
//! # fn main() -> ying_core::YingResult<()> {
//! let stream: Vec<u8> = std::fs::read("input.264")?;
//! let mut decoder = H264Decoder::new(DecoderConfig::default())?;
//! let mut nal = match find_start_code(&stream) {
//!     Some(pos) => &stream[pos + 3..],
//!     None => &stream[..],
//! };
//! loop {
//!     let (res, next) = decoder.decode_nal(nal, false);
//!     while let Some(frame) = decoder.get_frame(false)? {
//!         println!("帧 poc={}", frame.poc());
//!     }
//!     if matches!(res, Err(ying_core::YingError::NoData)) {
//!         break;
//!     }
//!     nal = next;
//! }
//! # Ok(())
//! # }
//! ```

pub mod decoders;
pub mod parsers;

pub use decoders::h264::{DecoderConfig, Frame, H264Decoder};
