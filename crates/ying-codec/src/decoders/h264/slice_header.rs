//! H.264 切片头解析 (7.3.3).
//!
//! 包括参考列表修改 (ref_pic_list_modification 及其 MVC 形式), 加权预测表
//! (pred_weight_table) 与参考图像标记 (dec_ref_pic_marking).

use std::sync::Arc;

use log::debug;
use ying_core::bitreader::BitReader;
use ying_core::{YingError, YingResult};

use super::parameter_sets::{ParamSets, Pps};
use crate::parsers::h264::nal::{NalHeader, NalHeaderExtension, NalUnitType};
use crate::parsers::h264::sps::Sps;

/// 切片类型 (SP/SI 不支持)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SliceType {
    P,
    B,
    I,
}

impl SliceType {
    fn from_raw(raw: u32) -> YingResult<Self> {
        match raw % 5 {
            0 => Ok(Self::P),
            1 => Ok(Self::B),
            2 => Ok(Self::I),
            _ => Err(YingError::Unsupported(format!(
                "H264: SP/SI 切片, slice_type={raw}"
            ))),
        }
    }

    /// 使用的参考列表数
    pub(crate) fn list_count(self) -> usize {
        match self {
            Self::I => 0,
            Self::P => 1,
            Self::B => 2,
        }
    }
}

/// 参考列表修改操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefPicListMod {
    /// modification_of_pic_nums_idc = 0, 值为 abs_diff_pic_num
    ShortTermSub(u32),
    /// modification_of_pic_nums_idc = 1
    ShortTermAdd(u32),
    /// modification_of_pic_nums_idc = 2, 值为 long_term_pic_num
    LongTerm(u32),
    /// modification_of_pic_nums_idc = 4/5 (仅非基础视图), 值为 abs_diff_view_idx_minus1
    InterView(u32),
}

/// 内存管理控制操作 (MMCO)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MmcoOp {
    /// 1: 短期参考转为非参考
    ForgetShort { difference_of_pic_nums: u32 },
    /// 2: 长期参考转为非参考
    ForgetLong { long_term_pic_num: u32 },
    /// 3: 短期参考转为长期参考
    ConvertShortToLong {
        difference_of_pic_nums: u32,
        long_term_frame_idx: u32,
    },
    /// 4: 设置最大长期索引
    TrimLong { max_long_term_frame_idx_plus1: u32 },
    /// 5: 清空所有参考
    ClearAll,
    /// 6: 当前图像标记为长期参考
    MarkCurrentLong { long_term_frame_idx: u32 },
}

/// dec_ref_pic_marking 语法
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DecRefPicMarking {
    pub(crate) no_output_of_prior_pics: bool,
    pub(crate) long_term_reference: bool,
    pub(crate) adaptive: bool,
    pub(crate) ops: Vec<MmcoOp>,
}

impl DecRefPicMarking {
    pub(crate) fn has_mmco5(&self) -> bool {
        self.ops.contains(&MmcoOp::ClearAll)
    }
}

/// 单个参考索引的显式权重, 下标 0/1/2 对应 Y/Cb/Cr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WeightEntry {
    pub(crate) weight: [i32; 3],
    pub(crate) offset: [i32; 3],
}

/// pred_weight_table 语法
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PredWeightTable {
    /// luma_log2_weight_denom, chroma_log2_weight_denom
    pub(crate) log2_denom: [u32; 2],
    pub(crate) entries: [Vec<WeightEntry>; 2],
}

/// 切片头
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SliceHeader {
    pub(crate) nal_ref_idc: u8,
    pub(crate) idr: bool,
    pub(crate) first_mb: u32,
    pub(crate) slice_type: SliceType,
    pub(crate) pps_id: u32,
    pub(crate) frame_num: u32,
    pub(crate) idr_pic_id: u32,
    pub(crate) poc_lsb: u32,
    pub(crate) delta_poc_bottom: i32,
    pub(crate) delta_poc: [i32; 2],
    pub(crate) redundant_pic_cnt: u32,
    pub(crate) direct_spatial_mv_pred: bool,
    pub(crate) num_ref_idx_active: [u32; 2],
    pub(crate) ref_pic_list_mods: [Vec<RefPicListMod>; 2],
    pub(crate) pred_weights: Option<PredWeightTable>,
    pub(crate) marking: DecRefPicMarking,
    pub(crate) cabac_init_idc: u32,
    pub(crate) slice_qp: i32,
    pub(crate) disable_deblocking_filter_idc: u32,
    /// FilterOffsetA = slice_alpha_c0_offset_div2 << 1
    pub(crate) filter_offset_a: i32,
    /// FilterOffsetB = slice_beta_offset_div2 << 1
    pub(crate) filter_offset_b: i32,
    /// slice_data() 相对于载荷起点的位偏移 (CABAC 对齐位之前)
    pub(crate) data_bit_offset: usize,
    /// 0 为基础视图, 1 为 MVC 非基础视图
    pub(crate) view: usize,
}

impl SliceHeader {
    /// frame_num 间隔中补出的参考帧所用的切片头
    pub(crate) fn non_existing(frame_num: u32) -> Self {
        Self {
            nal_ref_idc: 1,
            idr: false,
            first_mb: 0,
            slice_type: SliceType::P,
            pps_id: 0,
            frame_num,
            idr_pic_id: 0,
            poc_lsb: 0,
            delta_poc_bottom: 0,
            delta_poc: [0; 2],
            redundant_pic_cnt: 0,
            direct_spatial_mv_pred: false,
            num_ref_idx_active: [0; 2],
            ref_pic_list_mods: [Vec::new(), Vec::new()],
            pred_weights: None,
            marking: DecRefPicMarking::default(),
            cabac_init_idc: 0,
            slice_qp: 0,
            disable_deblocking_filter_idc: 0,
            filter_offset_a: 0,
            filter_offset_b: 0,
            data_bit_offset: 0,
            view: 0,
        }
    }

    /// 是否为参考图像
    pub(crate) fn is_reference(&self) -> bool {
        self.nal_ref_idc != 0
    }

    /// 两个切片是否属于不同的图像 (7.4.1.2.4, 仅帧编码部分)
    pub(crate) fn starts_new_picture(&self, prev: &SliceHeader) -> bool {
        self.view != prev.view
            || self.frame_num != prev.frame_num
            || self.pps_id != prev.pps_id
            || (self.nal_ref_idc == 0) != (prev.nal_ref_idc == 0)
            || self.poc_lsb != prev.poc_lsb
            || self.delta_poc_bottom != prev.delta_poc_bottom
            || self.delta_poc != prev.delta_poc
            || self.idr != prev.idr
            || (self.idr && self.idr_pic_id != prev.idr_pic_id)
    }
}

fn invalid(msg: String) -> YingError {
    YingError::InvalidData(msg)
}

/// 解析切片头
///
/// `data` 为 NAL 头 (及 MVC 头扩展) 之后的载荷. `ext` 为类型 20 切片的头扩展,
/// 此时切片属于非基础视图, 引用子集 SPS, IDR 由 non_idr_flag 决定.
pub(crate) fn parse_slice_header(
    data: &[u8],
    nal: &NalHeader,
    ext: Option<&NalHeaderExtension>,
    sets: &ParamSets,
) -> YingResult<(SliceHeader, Arc<Sps>, Arc<Pps>)> {
    let mut br = BitReader::new(data);
    let view = usize::from(ext.is_some());
    let idr = match ext {
        Some(e) => e.idr,
        None => nal.nal_type == NalUnitType::SliceIdr,
    };

    let first_mb = br.read_ue(u32::MAX);
    let slice_type = SliceType::from_raw(br.read_ue(9))?;
    let pps_id = br.read_ue(255);
    let (sps, pps) = sets.lookup(pps_id, view)?;
    if first_mb >= sps.mb_count() {
        return Err(invalid(format!(
            "H264: first_mb_in_slice 超出范围, value={first_mb}"
        )));
    }
    // 非基础视图的 IDR 图像可以只用视图间参考做帧间预测
    if idr && view == 0 && slice_type != SliceType::I {
        return Err(invalid("H264: IDR 图像包含非 I 切片".into()));
    }
    if !sps.frame_mbs_only {
        return Err(YingError::Unsupported("H264: 场编码切片".into()));
    }

    let frame_num = br.read_bits(sps.log2_max_frame_num);
    let idr_pic_id = if idr { br.read_ue(65535) } else { 0 };

    let mut poc_lsb = 0;
    let mut delta_poc_bottom = 0;
    let mut delta_poc = [0; 2];
    if sps.poc_type == 0 {
        poc_lsb = br.read_bits(sps.log2_max_poc_lsb);
        if pps.pic_order_present {
            delta_poc_bottom = br.read_se(i32::MIN + 1, i32::MAX);
        }
    } else if sps.poc_type == 1 && !sps.delta_pic_order_always_zero {
        delta_poc[0] = br.read_se(i32::MIN + 1, i32::MAX);
        if pps.pic_order_present {
            delta_poc[1] = br.read_se(i32::MIN + 1, i32::MAX);
        }
    }

    let redundant_pic_cnt = if pps.redundant_pic_cnt_present {
        br.read_ue(127)
    } else {
        0
    };

    let mut direct_spatial_mv_pred = false;
    let mut num_ref_idx_active = [0u32; 2];
    if slice_type == SliceType::B {
        direct_spatial_mv_pred = br.read_flag();
    }
    if slice_type != SliceType::I {
        num_ref_idx_active = pps.num_ref_idx_default_active;
        if br.read_flag() {
            num_ref_idx_active[0] = br.read_ue(u32::MAX).saturating_add(1);
            if slice_type == SliceType::B {
                num_ref_idx_active[1] = br.read_ue(u32::MAX).saturating_add(1);
            }
        }
        if slice_type == SliceType::P {
            num_ref_idx_active[1] = 0;
        }
        for (list, &n) in num_ref_idx_active.iter().enumerate() {
            if n > 32 {
                return Err(invalid(format!(
                    "H264: num_ref_idx_l{list}_active 超出范围, value={n}"
                )));
            }
        }
    }

    let mut ref_pic_list_mods = [Vec::new(), Vec::new()];
    for mods in ref_pic_list_mods.iter_mut().take(slice_type.list_count()) {
        if br.read_flag() {
            *mods = parse_ref_pic_list_mod(&mut br, &sps, view)?;
        }
    }

    let use_weights = (pps.weighted_pred && slice_type == SliceType::P)
        || (pps.weighted_bipred_idc == 1 && slice_type == SliceType::B);
    let pred_weights = if use_weights {
        Some(parse_pred_weight_table(
            &mut br,
            slice_type,
            num_ref_idx_active,
        )?)
    } else {
        None
    };

    let marking = if nal.ref_idc != 0 {
        parse_dec_ref_pic_marking(&mut br, idr)?
    } else {
        DecRefPicMarking::default()
    };

    let mut cabac_init_idc = 0;
    if pps.cabac && slice_type != SliceType::I {
        cabac_init_idc = br.read_ue(u32::MAX);
        if cabac_init_idc > 2 {
            return Err(invalid(format!(
                "H264: cabac_init_idc 非法, value={cabac_init_idc}"
            )));
        }
    }

    let slice_qp = pps.pic_init_qp + br.read_se(-100, 100);
    if !(0..=51).contains(&slice_qp) {
        return Err(invalid(format!(
            "H264: slice_qp 超出范围, slice_qp={slice_qp}"
        )));
    }

    let mut disable_deblocking_filter_idc = 0;
    let mut filter_offset_a = 0;
    let mut filter_offset_b = 0;
    if pps.deblocking_filter_control_present {
        disable_deblocking_filter_idc = br.read_ue(u32::MAX);
        if disable_deblocking_filter_idc > 2 {
            return Err(invalid(format!(
                "H264: disable_deblocking_filter_idc 非法, value={disable_deblocking_filter_idc}"
            )));
        }
        if disable_deblocking_filter_idc != 1 {
            filter_offset_a = br.read_se(-6, 6) * 2;
            filter_offset_b = br.read_se(-6, 6) * 2;
        }
    }

    if br.overrun() > 0 {
        return Err(invalid("H264: 切片头被截断".into()));
    }

    let header = SliceHeader {
        nal_ref_idc: nal.ref_idc,
        idr,
        first_mb,
        slice_type,
        pps_id,
        frame_num,
        idr_pic_id,
        poc_lsb,
        delta_poc_bottom,
        delta_poc,
        redundant_pic_cnt,
        direct_spatial_mv_pred,
        num_ref_idx_active,
        ref_pic_list_mods,
        pred_weights,
        marking,
        cabac_init_idc,
        slice_qp,
        disable_deblocking_filter_idc,
        filter_offset_a,
        filter_offset_b,
        data_bit_offset: br.bits_consumed(),
        view,
    };
    debug!(
        "H264: 切片头 view={} type={:?} first_mb={} frame_num={} poc_lsb={} qp={} ref={:?} idr={}",
        header.view,
        header.slice_type,
        header.first_mb,
        header.frame_num,
        header.poc_lsb,
        header.slice_qp,
        header.num_ref_idx_active,
        header.idr
    );
    Ok((header, sps, pps))
}

fn parse_ref_pic_list_mod(
    br: &mut BitReader,
    sps: &Sps,
    view: usize,
) -> YingResult<Vec<RefPicListMod>> {
    let max_pic_num = sps.max_frame_num();
    let mut mods = Vec::new();
    loop {
        let op = br.read_ue(u32::MAX);
        let m = match op {
            0 => RefPicListMod::ShortTermSub(br.read_ue(max_pic_num - 1) + 1),
            1 => RefPicListMod::ShortTermAdd(br.read_ue(max_pic_num - 1) + 1),
            2 => RefPicListMod::LongTerm(br.read_ue(31)),
            3 => break,
            4 | 5 if view > 0 => RefPicListMod::InterView(br.read_ue(1023)),
            _ => {
                return Err(invalid(format!(
                    "H264: modification_of_pic_nums_idc 非法, value={op}"
                )));
            }
        };
        mods.push(m);
        if mods.len() > 32 || br.overrun() > 0 {
            return Err(invalid("H264: ref_pic_list_modification 项数过多".into()));
        }
    }
    Ok(mods)
}

fn parse_pred_weight_table(
    br: &mut BitReader,
    slice_type: SliceType,
    num_ref_idx_active: [u32; 2],
) -> YingResult<PredWeightTable> {
    let luma_denom = br.read_ue(7);
    let chroma_denom = br.read_ue(7);
    let mut entries = [Vec::new(), Vec::new()];
    for (list, out) in entries.iter_mut().enumerate().take(slice_type.list_count()) {
        for _ in 0..num_ref_idx_active[list] {
            let mut entry = WeightEntry {
                weight: [1 << luma_denom, 1 << chroma_denom, 1 << chroma_denom],
                offset: [0; 3],
            };
            if br.read_flag() {
                entry.weight[0] = br.read_se(-128, 127);
                entry.offset[0] = br.read_se(-128, 127);
            }
            if br.read_flag() {
                for c in 1..3 {
                    entry.weight[c] = br.read_se(-128, 127);
                    entry.offset[c] = br.read_se(-128, 127);
                }
            }
            out.push(entry);
        }
    }
    Ok(PredWeightTable {
        log2_denom: [luma_denom, chroma_denom],
        entries,
    })
}

fn parse_dec_ref_pic_marking(br: &mut BitReader, idr: bool) -> YingResult<DecRefPicMarking> {
    let mut marking = DecRefPicMarking::default();
    if idr {
        marking.no_output_of_prior_pics = br.read_flag();
        marking.long_term_reference = br.read_flag();
        return Ok(marking);
    }
    marking.adaptive = br.read_flag();
    if !marking.adaptive {
        return Ok(marking);
    }
    loop {
        let op = match br.read_ue(u32::MAX) {
            0 => break,
            1 => MmcoOp::ForgetShort {
                difference_of_pic_nums: br.read_ue(u32::MAX - 1) + 1,
            },
            2 => MmcoOp::ForgetLong {
                long_term_pic_num: br.read_ue(31),
            },
            3 => MmcoOp::ConvertShortToLong {
                difference_of_pic_nums: br.read_ue(u32::MAX - 1) + 1,
                long_term_frame_idx: br.read_ue(15),
            },
            4 => MmcoOp::TrimLong {
                max_long_term_frame_idx_plus1: br.read_ue(16),
            },
            5 => MmcoOp::ClearAll,
            6 => MmcoOp::MarkCurrentLong {
                long_term_frame_idx: br.read_ue(15),
            },
            op => {
                return Err(invalid(format!(
                    "H264: memory_management_control_operation 非法, value={op}"
                )));
            }
        };
        marking.ops.push(op);
        if marking.ops.len() > 66 || br.overrun() > 0 {
            return Err(invalid("H264: MMCO 项数过多".into()));
        }
    }
    Ok(marking)
}
