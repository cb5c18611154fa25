//! 码流解析器.
//!
//! 只负责语法层面的解析 (NAL 分割, 序列参数集), 不涉及解码状态.

pub mod h264;
