//! H.264/AVC 码流解析器.
//!
//! 提供对 H.264 Annex B 码流的解析能力:
//! - NAL 单元分割与类型识别 (含 MVC 头扩展)
//! - SPS / 子集 SPS (Sequence Parameter Set) 解析
//! - 量化矩阵与扫描顺序

pub mod nal;
pub mod sps;

pub use nal::{NalHeader, NalHeaderExtension, NalUnitType, split_annex_b};
pub use sps::{ScalingLists, Sps, parse_sps, parse_subset_sps};
