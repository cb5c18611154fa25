//! H.264 PPS (Picture Parameter Set) 解析.
//!
//! PPS 中的量化矩阵按回退规则 B 解析: 缺失的列表从所引用 SPS 的矩阵继承,
//! 因此解析时需要传入当前已知的 SPS.

use std::sync::Arc;

use log::debug;
use ying_core::bitreader::BitReader;
use ying_core::{YingError, YingResult};

use crate::parsers::h264::sps::{ScalingLists, Sps};

/// 支持的 PPS 数量 (pps_id 0..4)
pub(crate) const MAX_PPS_COUNT: usize = 4;

/// 图像参数集
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub pps_id: u32,
    pub sps_id: u32,
    /// entropy_coding_mode_flag (true 为 CABAC)
    pub cabac: bool,
    /// bottom_field_pic_order_in_frame_present_flag
    pub pic_order_present: bool,
    /// num_ref_idx_l0/l1_default_active
    pub num_ref_idx_default_active: [u32; 2],
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u32,
    /// 26 + pic_init_qp_minus26
    pub pic_init_qp: i32,
    pub chroma_qp_index_offset: i32,
    pub second_chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present: bool,
    pub constrained_intra_pred: bool,
    pub redundant_pic_cnt_present: bool,
    pub transform_8x8_mode: bool,
    /// PPS 自带的量化矩阵 (已应用回退规则 B), None 表示沿用 SPS
    pub scaling: Option<ScalingLists>,
}

impl Pps {
    /// 切片实际使用的量化矩阵
    pub fn effective_scaling(&self, sps: &Sps) -> ScalingLists {
        self.scaling.clone().unwrap_or_else(|| sps.scaling.clone())
    }
}

/// 当前有效的参数集表
///
/// `subset_sps` 保存 MVC 子集 SPS, 只被非基础视图的切片引用.
#[derive(Debug, Default, Clone)]
pub(crate) struct ParamSets {
    pub(crate) sps: [Option<Arc<Sps>>; 32],
    pub(crate) subset_sps: [Option<Arc<Sps>>; 32],
    pub(crate) pps: [Option<Arc<Pps>>; MAX_PPS_COUNT],
}

impl ParamSets {
    /// 按 pps_id 取出 PPS 及其引用的 SPS; `view` 非 0 时取子集 SPS
    pub(crate) fn lookup(&self, pps_id: u32, view: usize) -> YingResult<(Arc<Sps>, Arc<Pps>)> {
        let pps = self
            .pps
            .get(pps_id as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| invalid(format!("H264: 未找到 PPS id={pps_id}")))?;
        let table = if view == 0 { &self.sps } else { &self.subset_sps };
        let sps = table[pps.sps_id as usize].as_ref().ok_or_else(|| {
            invalid(format!("H264: 未找到 SPS id={} view={view}", pps.sps_id))
        })?;
        Ok((Arc::clone(sps), Arc::clone(pps)))
    }
}

fn invalid(msg: String) -> YingError {
    YingError::InvalidData(msg)
}

/// 从 PPS 载荷 (NAL 头之后) 解析 PPS
///
/// `sps` 为 pps 所引用的 SPS (若已收到), 用于量化矩阵回退.
pub fn parse_pps(payload: &[u8], sps: Option<&Sps>) -> YingResult<Pps> {
    let mut br = BitReader::new(payload);
    let pps_id = br.read_ue(u32::MAX);
    if pps_id > 255 {
        return Err(invalid(format!("H264: pps_id 超出范围, pps_id={pps_id}")));
    }
    if pps_id as usize >= MAX_PPS_COUNT {
        return Err(YingError::Unsupported(format!(
            "H264: pps_id={pps_id} 超出支持范围"
        )));
    }
    let sps_id = br.read_ue(u32::MAX);
    if sps_id > 31 {
        return Err(invalid(format!("H264: sps_id 超出范围, sps_id={sps_id}")));
    }
    let cabac = br.read_flag();
    let pic_order_present = br.read_flag();
    let num_slice_groups_minus1 = br.read_ue(7);
    if num_slice_groups_minus1 > 0 {
        return Err(YingError::Unsupported(format!(
            "H264: 切片组 (FMO), num_slice_groups={}",
            num_slice_groups_minus1 + 1
        )));
    }
    let l0 = br.read_ue(32) + 1;
    let l1 = br.read_ue(32) + 1;
    if l0 > 32 || l1 > 32 {
        return Err(invalid(format!(
            "H264: num_ref_idx_default_active 超出范围, l0={l0} l1={l1}"
        )));
    }
    let weighted_pred = br.read_flag();
    let weighted_bipred_idc = br.read_bits(2);
    if weighted_bipred_idc > 2 {
        return Err(invalid(format!(
            "H264: weighted_bipred_idc 非法, value={weighted_bipred_idc}"
        )));
    }
    let pic_init_qp = 26 + br.read_se(-100, 100);
    if !(0..=51).contains(&pic_init_qp) {
        return Err(invalid(format!(
            "H264: pic_init_qp 超出范围, pic_init_qp={pic_init_qp}"
        )));
    }
    br.read_se(-26, 25); // pic_init_qs_minus26
    let chroma_qp_index_offset = br.read_se(-12, 12);
    let deblocking_filter_control_present = br.read_flag();
    let constrained_intra_pred = br.read_flag();
    let redundant_pic_cnt_present = br.read_flag();

    let mut transform_8x8_mode = false;
    let mut second_chroma_qp_index_offset = chroma_qp_index_offset;
    let mut scaling = None;
    if br.more_rbsp_data() {
        transform_8x8_mode = br.read_flag();
        if br.read_flag() {
            let mut lists = sps.map_or_else(ScalingLists::flat, |s| s.scaling.clone());
            let chroma_format_idc = sps.map_or(1, |s| s.chroma_format_idc);
            lists.parse(&mut br, transform_8x8_mode, chroma_format_idc)?;
            scaling = Some(lists);
        }
        second_chroma_qp_index_offset = br.read_se(-12, 12);
    }
    if br.overrun() > 0 || !br.is_rbsp_end() {
        return Err(invalid("H264: PPS 尾随位错误".into()));
    }

    debug!(
        "H264: PPS id={} sps={} cabac={} qp={} ref={}/{} wp={}/{} 8x8={}",
        pps_id,
        sps_id,
        cabac,
        pic_init_qp,
        l0,
        l1,
        weighted_pred,
        weighted_bipred_idc,
        transform_8x8_mode
    );

    Ok(Pps {
        pps_id,
        sps_id,
        cabac,
        pic_order_present,
        num_ref_idx_default_active: [l0, l1],
        weighted_pred,
        weighted_bipred_idc,
        pic_init_qp,
        chroma_qp_index_offset,
        second_chroma_qp_index_offset,
        deblocking_filter_control_present,
        constrained_intra_pred,
        redundant_pic_cnt_present,
        transform_8x8_mode,
        scaling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::h264::tests::helpers::{SpsParams, test_sps};
    use ying_core::bitwriter::BitWriter;

    struct PpsInput {
        pps_id: u32,
        cabac: bool,
        slice_groups_minus1: u32,
        qp_minus26: i32,
        chroma_offset: i32,
        /// (transform_8x8_mode, 写入 4x4 列表 1 为全 8, second_chroma_offset)
        ext: Option<(bool, bool, i32)>,
    }

    impl Default for PpsInput {
        fn default() -> Self {
            Self {
                pps_id: 0,
                cabac: true,
                slice_groups_minus1: 0,
                qp_minus26: 0,
                chroma_offset: 0,
                ext: None,
            }
        }
    }

    fn build(input: &PpsInput) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_ue(input.pps_id);
        bw.write_ue(0);
        bw.write_flag(input.cabac);
        bw.write_flag(false);
        bw.write_ue(input.slice_groups_minus1);
        bw.write_ue(0);
        bw.write_ue(1);
        bw.write_flag(true);
        bw.write_bits(2, 2);
        bw.write_se(input.qp_minus26);
        bw.write_se(0);
        bw.write_se(input.chroma_offset);
        bw.write_flag(true);
        bw.write_flag(true);
        bw.write_flag(false);
        if let Some((t8x8, custom, second)) = input.ext {
            bw.write_flag(t8x8);
            bw.write_flag(custom);
            if custom {
                // 列表 0 缺失 (回退到 SPS), 列表 1 显式为全 8, 其余缺失
                bw.write_flag(false);
                bw.write_flag(true);
                bw.write_se(0);
                for _ in 1..16 {
                    bw.write_se(0);
                }
                for _ in 2..6 {
                    bw.write_flag(false);
                }
                if t8x8 {
                    bw.write_flag(false);
                    bw.write_flag(false);
                }
            }
            bw.write_se(second);
        }
        bw.write_trailing_bits();
        bw.finish()
    }

    #[test]
    fn test_parse_pps_basic() {
        let pps = parse_pps(
            &build(&PpsInput {
                qp_minus26: -4,
                chroma_offset: -2,
                ..PpsInput::default()
            }),
            None,
        )
        .unwrap();
        assert!(pps.cabac);
        assert_eq!(pps.num_ref_idx_default_active, [1, 2]);
        assert!(pps.weighted_pred);
        assert_eq!(pps.weighted_bipred_idc, 2);
        assert_eq!(pps.pic_init_qp, 22);
        assert_eq!(pps.chroma_qp_index_offset, -2);
        assert_eq!(pps.second_chroma_qp_index_offset, -2);
        assert!(pps.deblocking_filter_control_present);
        assert!(pps.constrained_intra_pred);
        assert!(!pps.transform_8x8_mode);
        assert!(pps.scaling.is_none());
    }

    #[test]
    fn test_parse_pps_extension_and_rule_b_fallback() {
        let data = build(&PpsInput {
            ext: Some((true, true, 3)),
            ..PpsInput::default()
        });
        let pps = parse_pps(&data, None).unwrap();
        assert!(pps.transform_8x8_mode);
        assert_eq!(pps.second_chroma_qp_index_offset, 3);
        let lists = pps.scaling.clone().unwrap();
        // 列表 0 回退为 SPS 的平坦矩阵, 列表 1 显式为 8, 列表 2 沿用列表 1
        assert_eq!(lists.list_4x4[0], [16; 16]);
        assert_eq!(lists.list_4x4[1], [8; 16]);
        assert_eq!(lists.list_4x4[2], [8; 16]);
        assert_eq!(lists.list_4x4[3], [16; 16]);
        // 重复解析结果一致
        assert_eq!(parse_pps(&data, None).unwrap(), pps);
    }

    #[test]
    fn test_parse_pps_rejects_large_id_as_unsupported() {
        let err = parse_pps(
            &build(&PpsInput {
                pps_id: 4,
                ..PpsInput::default()
            }),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, YingError::Unsupported(_)));
    }

    #[test]
    fn test_parse_pps_rejects_slice_groups() {
        let err = parse_pps(
            &build(&PpsInput {
                slice_groups_minus1: 1,
                ..PpsInput::default()
            }),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, YingError::Unsupported(_)));
    }

    #[test]
    fn test_lookup_requires_both_sets() {
        let mut sets = ParamSets::default();
        let pps = parse_pps(&build(&PpsInput::default()), None).unwrap();
        sets.pps[0] = Some(Arc::new(pps));
        assert!(sets.lookup(0, 0).is_err());
        assert!(sets.lookup(3, 0).is_err());
    }

    #[test]
    fn test_lookup_second_view_uses_subset_sps() {
        let mut sets = ParamSets::default();
        let pps = parse_pps(&build(&PpsInput::default()), None).unwrap();
        sets.pps[0] = Some(Arc::new(pps));
        let base = SpsParams::default();
        sets.sps[0] = Some(Arc::new(test_sps(&base)));
        assert!(sets.lookup(0, 0).is_ok());
        assert!(sets.lookup(0, 1).is_err());

        let second = SpsParams {
            profile_idc: 118,
            ..SpsParams::default()
        };
        sets.subset_sps[0] = Some(Arc::new(test_sps(&second)));
        let (sps, _) = sets.lookup(0, 1).unwrap();
        assert_eq!(sps.profile_idc, 118);
        let (sps, _) = sets.lookup(0, 0).unwrap();
        assert_eq!(sps.profile_idc, base.profile_idc);
    }

    #[test]
    fn test_parse_pps_rejects_qp_out_of_range() {
        let err = parse_pps(
            &build(&PpsInput {
                qp_minus26: 30,
                ..PpsInput::default()
            }),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, YingError::InvalidData(_)));
    }
}
