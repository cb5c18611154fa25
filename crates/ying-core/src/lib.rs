//! # ying-core
//!
//! Ying 解码器核心库, 提供统一错误类型与 RBSP 位流读写工具.
//!
//! 解码器各 crate 共享的底层基础设施都放在这里.

pub mod bitreader;
pub mod bitwriter;
pub mod error;

// 重导出常用类型
pub use bitreader::BitReader;
pub use bitwriter::BitWriter;
pub use error::{YingError, YingResult};
