//! H.264 NAL (Network Abstraction Layer) 单元头解析.
//!
//! # Annex B 格式
//!
//! Annex B 使用起始码 (start code) 分隔 NAL 单元:
//! - 3 字节起始码: `00 00 01`
//! - 4 字节起始码: `00 00 00 01`
//!
//! # NAL 头部 (1 字节)
//! ```text
//! ┌─────────────────────────────────────┐
//! │ forbidden(1) | ref_idc(2) | type(5) │
//! └─────────────────────────────────────┘
//! ```
//!
//! 类型 14 (前缀 NAL) 与 20 (切片扩展) 之后还有 3 字节的 MVC 头扩展.

use ying_core::bitreader::find_start_code;
use ying_core::{YingError, YingResult};

/// NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// 非 IDR 图像切片 (P/B slice)
    Slice,
    /// 数据分区 A/B/C (不支持)
    SliceDataPartition(u8),
    /// IDR 图像切片 (关键帧)
    SliceIdr,
    /// 增补增强信息 (SEI)
    Sei,
    /// 序列参数集 (SPS)
    Sps,
    /// 图像参数集 (PPS)
    Pps,
    /// 访问单元分隔符 (AUD)
    Aud,
    /// 序列结束
    EndOfSequence,
    /// 流结束
    EndOfStream,
    /// 填充数据
    FillerData,
    /// SPS 扩展
    SpsExtension,
    /// MVC 前缀 NAL
    PrefixNal,
    /// 子集序列参数集 (MVC)
    SubsetSps,
    /// 切片扩展 (MVC 非基础视图)
    SliceExtension,
    /// 未知类型
    Unknown(u8),
}

impl NalUnitType {
    /// 从 NAL 类型编号创建
    pub fn from_type_id(type_id: u8) -> Self {
        match type_id {
            1 => Self::Slice,
            2..=4 => Self::SliceDataPartition(type_id),
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            13 => Self::SpsExtension,
            14 => Self::PrefixNal,
            15 => Self::SubsetSps,
            20 => Self::SliceExtension,
            _ => Self::Unknown(type_id),
        }
    }

    /// 获取类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::SliceDataPartition(id) => *id,
            Self::SliceIdr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::FillerData => 12,
            Self::SpsExtension => 13,
            Self::PrefixNal => 14,
            Self::SubsetSps => 15,
            Self::SliceExtension => 20,
            Self::Unknown(id) => *id,
        }
    }

    /// 是否为 VCL (Video Coding Layer) NAL
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            Self::Slice | Self::SliceDataPartition(_) | Self::SliceIdr | Self::SliceExtension
        )
    }
}

impl std::fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slice => write!(f, "Slice"),
            Self::SliceDataPartition(id) => write!(f, "SliceDP{}", (b'A' + id - 2) as char),
            Self::SliceIdr => write!(f, "IDR"),
            Self::Sei => write!(f, "SEI"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::Aud => write!(f, "AUD"),
            Self::EndOfSequence => write!(f, "EndOfSeq"),
            Self::EndOfStream => write!(f, "EndOfStream"),
            Self::FillerData => write!(f, "Filler"),
            Self::SpsExtension => write!(f, "SPSExt"),
            Self::PrefixNal => write!(f, "Prefix"),
            Self::SubsetSps => write!(f, "SubsetSPS"),
            Self::SliceExtension => write!(f, "SliceExt"),
            Self::Unknown(id) => write!(f, "Unknown({id})"),
        }
    }
}

/// NAL 单元头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    /// NAL 单元类型
    pub nal_type: NalUnitType,
    /// nal_ref_idc (参考重要性, 0-3)
    pub ref_idc: u8,
}

impl NalHeader {
    /// 从 NAL 头部字节解析
    pub fn parse(byte: u8) -> YingResult<Self> {
        if byte & 0x80 != 0 {
            return Err(YingError::InvalidData(
                "H264: forbidden_zero_bit 非零".into(),
            ));
        }
        Ok(Self {
            nal_type: NalUnitType::from_type_id(byte & 0x1F),
            ref_idc: (byte >> 5) & 0x03,
        })
    }
}

/// MVC NAL 头扩展 (nal_unit_header_mvc_extension)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeaderExtension {
    /// non_idr_flag 取反
    pub idr: bool,
    /// priority_id
    pub priority_id: u8,
    /// view_id
    pub view_id: u16,
    /// temporal_id
    pub temporal_id: u8,
    /// anchor_pic_flag
    pub anchor_pic: bool,
    /// inter_view_flag
    pub inter_view: bool,
}

impl NalHeaderExtension {
    /// 解析紧跟 NAL 头之后的 3 个字节
    ///
    /// svc_extension_flag 为 1 时 (SVC) 返回不支持.
    pub fn parse(bytes: &[u8]) -> YingResult<Self> {
        if bytes.len() < 3 {
            return Err(YingError::InvalidData("H264: NAL 头扩展被截断".into()));
        }
        let u = u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]);
        if u & (1 << 23) != 0 {
            return Err(YingError::Unsupported("H264: SVC NAL 头扩展".into()));
        }
        Ok(Self {
            idr: (u >> 22) & 1 == 0,
            priority_id: ((u >> 16) & 0x3F) as u8,
            view_id: ((u >> 6) & 0x3FF) as u16,
            temporal_id: ((u >> 3) & 7) as u8,
            anchor_pic: (u >> 2) & 1 == 1,
            inter_view: (u >> 1) & 1 == 1,
        })
    }
}

/// 从 Annex B 字节流中分割出所有 NAL 单元
///
/// 返回的切片不含起始码, 以 NAL 头部字节开头, 且已去除尾部的零字节.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut nalus = Vec::new();
    let Some(first) = find_start_code(data) else {
        return nalus;
    };
    let mut rest = &data[first + 3..];
    loop {
        let end = find_start_code(rest).unwrap_or(rest.len());
        let mut nal = &rest[..end];
        while let [head @ .., 0] = nal {
            nal = head;
        }
        if !nal.is_empty() {
            nalus.push(nal);
        }
        if end >= rest.len() {
            break;
        }
        rest = &rest[end + 3..];
    }
    nalus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nal_type_type_id() {
        for id in 0..32 {
            let nt = NalUnitType::from_type_id(id);
            assert_eq!(nt.type_id(), id);
        }
        assert!(NalUnitType::SliceIdr.is_vcl());
        assert!(NalUnitType::SliceExtension.is_vcl());
        assert!(!NalUnitType::Sps.is_vcl());
    }

    #[test]
    fn test_nal_header_parse() {
        // 0b0_11_00111 = 0x67
        let hdr = NalHeader::parse(0x67).unwrap();
        assert_eq!(hdr.nal_type, NalUnitType::Sps);
        assert_eq!(hdr.ref_idc, 3);
        assert!(NalHeader::parse(0xE7).is_err());
    }

    #[test]
    fn test_header_extension_fields() {
        // svc=0, non_idr=1, priority=5, view_id=1, temporal=2, anchor=1, inter_view=0, reserved=1
        let u: u32 = (1 << 22) | (5 << 16) | (1 << 6) | (2 << 3) | (1 << 2) | 1;
        let bytes = [(u >> 16) as u8, (u >> 8) as u8, u as u8];
        let ext = NalHeaderExtension::parse(&bytes).unwrap();
        assert!(!ext.idr);
        assert_eq!(ext.priority_id, 5);
        assert_eq!(ext.view_id, 1);
        assert_eq!(ext.temporal_id, 2);
        assert!(ext.anchor_pic);
        assert!(!ext.inter_view);
    }

    #[test]
    fn test_header_extension_rejects_svc() {
        let err = NalHeaderExtension::parse(&[0x80, 0, 0]).unwrap_err();
        assert!(matches!(err, YingError::Unsupported(_)));
    }

    #[test]
    fn test_annex_b_split_mixed_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // SPS
            0x00, 0x00, 0x01, 0x68, 0xCE, 0x00, // PPS + trailing zero
            0x00, 0x00, 0x01, 0x65, 0x88,
        ];
        let nalus = split_annex_b(&data);
        assert_eq!(nalus.len(), 3);
        assert_eq!(nalus[0], &[0x67, 0x42]);
        assert_eq!(nalus[1], &[0x68, 0xCE]);
        assert_eq!(nalus[2], &[0x65, 0x88]);
    }

    #[test]
    fn test_annex_b_split_without_start_code() {
        assert!(split_annex_b(&[0x65, 0x88]).is_empty());
    }
}
