//! 测试用码流构造工具.
//!
//! 参数集与切片头按语法表逐字段写出, 切片数据由各构造函数拼出;
//! CABAC 部分使用按标准伪代码 (9.3.4) 实现的算术编码器.

use std::sync::Arc;

use bytes::Bytes;
use ying_core::YingResult;
use ying_core::bitreader::find_start_code;
use ying_core::bitwriter::{BitWriter, annex_b_nal};

use super::super::cabac::{CABAC_STATE_COUNT, init_context_states};
use super::super::cabac_tables::{RANGE_TAB_LPS, TRANS_IDX_LPS, TRANS_IDX_MPS};
use super::super::parameter_sets::{ParamSets, parse_pps};
use super::super::output::{FrameInfo, ViewPicture};
use super::super::picture::Picture;
use super::super::scheduler::Scheduler;
use super::super::slice_data::SliceTask;
use super::super::slice_header::{MmcoOp, SliceHeader};
use super::super::transform::LevelScale;
use super::super::{DecoderConfig, Frame, H264Decoder};
use crate::parsers::h264::{ScalingLists, Sps, parse_sps};

// ============================================================
// 伪随机数
// ============================================================

/// xorshift32
pub struct XorShift(u32);

impl XorShift {
    pub fn new(seed: u32) -> Self {
        Self(seed.max(1))
    }

    pub fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    pub fn bytes(&mut self, n: usize) -> Vec<u8> {
        (0..n).map(|_| self.next() as u8).collect()
    }
}

// ============================================================
// CABAC 编码器
// ============================================================

/// 9.3.4.2 的算术编码器, 输出从字节边界开始
pub struct CabacEncoder {
    w: BitWriter,
    low: u32,
    range: u32,
    outstanding: u32,
    first_bit: bool,
    states: [u8; CABAC_STATE_COUNT],
}

impl CabacEncoder {
    pub fn new(qp: i32, table: usize) -> Self {
        Self {
            w: BitWriter::new(),
            low: 0,
            range: 510,
            outstanding: 0,
            first_bit: true,
            states: init_context_states(qp, table),
        }
    }

    fn reset_engine(&mut self) {
        self.low = 0;
        self.range = 510;
        self.outstanding = 0;
        self.first_bit = true;
    }

    fn put_bit(&mut self, b: u32) {
        if self.first_bit {
            self.first_bit = false;
        } else {
            self.w.write_bit(b);
        }
        while self.outstanding > 0 {
            self.w.write_bit(1 - b);
            self.outstanding -= 1;
        }
    }

    fn renorm(&mut self) {
        while self.range < 256 {
            if self.low < 256 {
                self.put_bit(0);
            } else if self.low >= 512 {
                self.low -= 512;
                self.put_bit(1);
            } else {
                self.low -= 256;
                self.outstanding += 1;
            }
            self.range <<= 1;
            self.low <<= 1;
        }
    }

    pub fn encode_decision(&mut self, ctx: usize, bin: u32) {
        let state = self.states[ctx];
        let mut p = usize::from(state >> 1);
        let mut mps = u32::from(state & 1);
        let q = ((self.range >> 6) & 3) as usize;
        let lps = u32::from(RANGE_TAB_LPS[p][q]);
        self.range -= lps;
        if bin != mps {
            self.low += self.range;
            self.range = lps;
            if p == 0 {
                mps = 1 - mps;
            }
            p = usize::from(TRANS_IDX_LPS[p]);
        } else {
            p = usize::from(TRANS_IDX_MPS[p]);
        }
        self.states[ctx] = ((p as u8) << 1) | mps as u8;
        self.renorm();
    }

    pub fn encode_bypass(&mut self, bin: u32) {
        self.low <<= 1;
        if bin != 0 {
            self.low += self.range;
        }
        if self.low >= 1024 {
            self.put_bit(1);
            self.low -= 1024;
        } else if self.low < 512 {
            self.put_bit(0);
        } else {
            self.low -= 512;
            self.outstanding += 1;
        }
    }

    pub fn encode_terminate(&mut self, bin: u32) {
        self.range -= 2;
        if bin != 0 {
            self.low += self.range;
            self.flush();
        } else {
            self.renorm();
        }
    }

    /// 9.3.4.5: 最后写出的 1 即 rbsp_stop_one_bit (或 I_PCM 前的最后一位)
    fn flush(&mut self) {
        self.range = 2;
        self.renorm();
        self.put_bit((self.low >> 9) & 1);
        self.w.write_bits(((self.low >> 7) & 3) | 1, 2);
    }

    /// I_PCM: mb_type 之后写入终止位、对齐位与样本, 然后重新初始化引擎
    pub fn encode_pcm(&mut self, samples: &[u8]) {
        self.encode_terminate(1);
        self.w.align_zero();
        self.w.write_bytes(samples);
        self.reset_engine();
    }

    pub fn finish(self) -> Vec<u8> {
        self.w.finish()
    }
}

// ============================================================
// 参数集
// ============================================================

/// SPS 字段, 默认 2x2 宏块, 始终写出带 bitstream_restriction 的 VUI
#[derive(Debug, Clone)]
pub struct SpsParams {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub sps_id: u32,
    pub width_mbs: u32,
    pub height_mbs: u32,
    pub log2_max_frame_num: u32,
    pub poc_type: u32,
    pub log2_max_poc_lsb: u32,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_ref_frame: Vec<i32>,
    pub max_num_ref_frames: u32,
    pub gaps_allowed: bool,
    /// frame_crop 偏移 (色度单位): 左, 右, 上, 下
    pub crop: Option<[u32; 4]>,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
}

impl Default for SpsParams {
    fn default() -> Self {
        Self {
            profile_idc: 77,
            level_idc: 30,
            sps_id: 0,
            width_mbs: 2,
            height_mbs: 2,
            log2_max_frame_num: 4,
            poc_type: 0,
            log2_max_poc_lsb: 6,
            offset_for_non_ref_pic: 0,
            offset_for_ref_frame: Vec::new(),
            max_num_ref_frames: 2,
            gaps_allowed: false,
            crop: None,
            max_num_reorder_frames: 0,
            max_dec_frame_buffering: 2,
        }
    }
}

pub fn sps_rbsp(p: &SpsParams) -> Vec<u8> {
    let mut w = BitWriter::new();
    write_sps_data(&mut w, p);
    w.write_trailing_bits();
    w.finish()
}

/// 双视图 (view_id 0/1) 子集 SPS, 非基础视图的锚定与非锚定图像都以视图 0 为参考
pub fn subset_sps_rbsp(p: &SpsParams) -> Vec<u8> {
    let mut w = BitWriter::new();
    write_sps_data(&mut w, p);
    w.write_flag(true); // bit_equal_to_one
    w.write_ue(1); // num_views_minus1
    w.write_ue(0);
    w.write_ue(1);
    for _ in 0..4 {
        w.write_ue(1); // num_(non_)anchor_refs_l0/l1
        w.write_ue(0);
    }
    w.write_ue(0); // num_level_values_signalled_minus1
    w.write_bits(u32::from(p.level_idc), 8);
    w.write_ue(0); // num_applicable_ops_minus1
    w.write_bits(0, 3);
    w.write_ue(0);
    w.write_ue(1);
    w.write_ue(1);
    w.write_flag(false); // mvc_vui_parameters_present
    w.write_flag(false); // additional_extension2
    w.write_trailing_bits();
    w.finish()
}

fn write_sps_data(w: &mut BitWriter, p: &SpsParams) {
    w.write_bits(u32::from(p.profile_idc), 8);
    w.write_bits(0, 8);
    w.write_bits(u32::from(p.level_idc), 8);
    w.write_ue(p.sps_id);
    if !matches!(p.profile_idc, 66 | 77 | 88) {
        w.write_ue(1); // chroma_format_idc
        w.write_ue(0);
        w.write_ue(0);
        w.write_flag(false); // qpprime_y_zero_transform_bypass
        w.write_flag(false); // seq_scaling_matrix_present
    }
    w.write_ue(p.log2_max_frame_num - 4);
    w.write_ue(p.poc_type);
    match p.poc_type {
        0 => w.write_ue(p.log2_max_poc_lsb - 4),
        1 => {
            w.write_flag(false);
            w.write_se(p.offset_for_non_ref_pic);
            w.write_se(0);
            w.write_ue(p.offset_for_ref_frame.len() as u32);
            for &o in &p.offset_for_ref_frame {
                w.write_se(o);
            }
        }
        _ => {}
    }
    w.write_ue(p.max_num_ref_frames);
    w.write_flag(p.gaps_allowed);
    w.write_ue(p.width_mbs - 1);
    w.write_ue(p.height_mbs - 1);
    w.write_flag(true); // frame_mbs_only
    w.write_flag(true); // direct_8x8_inference
    w.write_flag(p.crop.is_some());
    if let Some(c) = p.crop {
        for v in c {
            w.write_ue(v);
        }
    }
    w.write_flag(true); // vui_parameters_present
    for _ in 0..4 {
        w.write_flag(false); // aspect, overscan, video_signal, chroma_loc
    }
    w.write_flag(false); // timing_info
    w.write_flag(false); // nal_hrd
    w.write_flag(false); // vcl_hrd
    w.write_flag(false); // pic_struct_present
    w.write_flag(true); // bitstream_restriction
    w.write_flag(true);
    w.write_ue(2);
    w.write_ue(1);
    w.write_ue(16);
    w.write_ue(16);
    w.write_ue(p.max_num_reorder_frames);
    w.write_ue(p.max_dec_frame_buffering);
}

pub fn test_sps(p: &SpsParams) -> Sps {
    parse_sps(&sps_rbsp(p)).unwrap()
}

/// PPS 字段
#[derive(Debug, Clone)]
pub struct PpsParams {
    pub pps_id: u32,
    pub sps_id: u32,
    pub cabac: bool,
    pub pic_order_present: bool,
    pub num_ref_idx_default: [u32; 2],
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u32,
    pub pic_init_qp: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present: bool,
    pub constrained_intra_pred: bool,
    pub redundant_pic_cnt_present: bool,
    pub transform_8x8_mode: bool,
}

impl Default for PpsParams {
    fn default() -> Self {
        Self {
            pps_id: 0,
            sps_id: 0,
            cabac: false,
            pic_order_present: false,
            num_ref_idx_default: [1, 1],
            weighted_pred: false,
            weighted_bipred_idc: 0,
            pic_init_qp: 26,
            chroma_qp_index_offset: 0,
            deblocking_filter_control_present: false,
            constrained_intra_pred: false,
            redundant_pic_cnt_present: false,
            transform_8x8_mode: false,
        }
    }
}

pub fn pps_rbsp(p: &PpsParams) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_ue(p.pps_id);
    w.write_ue(p.sps_id);
    w.write_flag(p.cabac);
    w.write_flag(p.pic_order_present);
    w.write_ue(0); // num_slice_groups_minus1
    w.write_ue(p.num_ref_idx_default[0] - 1);
    w.write_ue(p.num_ref_idx_default[1] - 1);
    w.write_flag(p.weighted_pred);
    w.write_bits(p.weighted_bipred_idc, 2);
    w.write_se(p.pic_init_qp - 26);
    w.write_se(0); // pic_init_qs_minus26
    w.write_se(p.chroma_qp_index_offset);
    w.write_flag(p.deblocking_filter_control_present);
    w.write_flag(p.constrained_intra_pred);
    w.write_flag(p.redundant_pic_cnt_present);
    if p.transform_8x8_mode {
        w.write_flag(true);
        w.write_flag(false); // pic_scaling_matrix_present
        w.write_se(p.chroma_qp_index_offset);
    }
    w.write_trailing_bits();
    w.finish()
}

pub fn param_sets(sps: &SpsParams, pps: &PpsParams) -> ParamSets {
    let mut sets = ParamSets::default();
    let s = test_sps(sps);
    let p = parse_pps(&pps_rbsp(pps), Some(&s)).unwrap();
    let sps_id = s.sps_id as usize;
    let pps_id = p.pps_id as usize;
    sets.sps[sps_id] = Some(Arc::new(s));
    sets.pps[pps_id] = Some(Arc::new(p));
    sets
}

// ============================================================
// 切片头
// ============================================================

/// 切片头字段; `slice_type` 为语法值 (0=P, 1=B, 2=I)
#[derive(Debug, Clone)]
pub struct SliceParams {
    pub first_mb: u32,
    pub slice_type: u32,
    pub pps_id: u32,
    pub nal_ref_idc: u8,
    pub idr: bool,
    pub idr_pic_id: u32,
    pub frame_num: u32,
    pub poc_lsb: u32,
    pub redundant_pic_cnt: u32,
    pub direct_spatial: bool,
    pub num_ref_idx_override: Option<[u32; 2]>,
    /// (modification_of_pic_nums_idc, abs_diff_pic_num 或 long_term_pic_num)
    pub ref_mods: [Vec<(u32, u32)>; 2],
    /// (luma_log2_weight_denom, 每个列表每个参考的 (weight, offset))
    pub luma_weights: Option<(u32, [Vec<Option<(i32, i32)>>; 2])>,
    pub no_output_of_prior_pics: bool,
    pub long_term_reference: bool,
    pub mmco: Option<Vec<MmcoOp>>,
    pub cabac_init_idc: u32,
    pub slice_qp_delta: i32,
    pub disable_deblocking: u32,
    /// (slice_alpha_c0_offset_div2, slice_beta_offset_div2)
    pub filter_offsets: (i32, i32),
    /// 非 0 时写成带 MVC 头扩展的类型 20 切片
    pub view_id: u16,
}

impl Default for SliceParams {
    fn default() -> Self {
        Self {
            first_mb: 0,
            slice_type: 2,
            pps_id: 0,
            nal_ref_idc: 1,
            idr: false,
            idr_pic_id: 0,
            frame_num: 0,
            poc_lsb: 0,
            redundant_pic_cnt: 0,
            direct_spatial: false,
            num_ref_idx_override: None,
            ref_mods: [Vec::new(), Vec::new()],
            luma_weights: None,
            no_output_of_prior_pics: false,
            long_term_reference: false,
            mmco: None,
            cabac_init_idc: 0,
            slice_qp_delta: 0,
            disable_deblocking: 0,
            filter_offsets: (0, 0),
            view_id: 0,
        }
    }
}

impl SliceParams {
    fn lists(&self) -> usize {
        match self.slice_type % 5 {
            0 => 1,
            1 => 2,
            _ => 0,
        }
    }

    /// NAL 头字节
    pub fn nal_header(&self) -> u8 {
        let nal_type = match (self.view_id, self.idr) {
            (0, true) => 5,
            (0, false) => 1,
            _ => 20,
        };
        (self.nal_ref_idc << 5) | nal_type
    }

    /// 类型 20 切片的 3 字节头扩展 (svc_extension_flag = 0)
    pub fn nal_header_extension(&self) -> Vec<u8> {
        if self.view_id == 0 {
            return Vec::new();
        }
        let mut w = BitWriter::new();
        w.write_flag(false); // svc_extension_flag
        w.write_flag(!self.idr); // non_idr_flag
        w.write_bits(0, 6); // priority_id
        w.write_bits(u32::from(self.view_id), 10);
        w.write_bits(0, 3); // temporal_id
        w.write_flag(self.idr); // anchor_pic_flag
        w.write_flag(false); // inter_view_flag
        w.write_flag(true); // reserved_one_bit
        w.finish()
    }
}

fn write_mmco(w: &mut BitWriter, op: &MmcoOp) {
    match *op {
        MmcoOp::ForgetShort {
            difference_of_pic_nums,
        } => {
            w.write_ue(1);
            w.write_ue(difference_of_pic_nums - 1);
        }
        MmcoOp::ForgetLong { long_term_pic_num } => {
            w.write_ue(2);
            w.write_ue(long_term_pic_num);
        }
        MmcoOp::ConvertShortToLong {
            difference_of_pic_nums,
            long_term_frame_idx,
        } => {
            w.write_ue(3);
            w.write_ue(difference_of_pic_nums - 1);
            w.write_ue(long_term_frame_idx);
        }
        MmcoOp::TrimLong {
            max_long_term_frame_idx_plus1,
        } => {
            w.write_ue(4);
            w.write_ue(max_long_term_frame_idx_plus1);
        }
        MmcoOp::ClearAll => w.write_ue(5),
        MmcoOp::MarkCurrentLong {
            long_term_frame_idx,
        } => {
            w.write_ue(6);
            w.write_ue(long_term_frame_idx);
        }
    }
}

/// 写出切片头 (不含对齐位与切片数据)
pub fn write_slice_header(w: &mut BitWriter, sps: &SpsParams, pps: &PpsParams, s: &SliceParams) {
    let lists = s.lists();
    w.write_ue(s.first_mb);
    w.write_ue(s.slice_type);
    w.write_ue(s.pps_id);
    w.write_bits(s.frame_num, sps.log2_max_frame_num);
    if s.idr {
        w.write_ue(s.idr_pic_id);
    }
    match sps.poc_type {
        0 => {
            w.write_bits(s.poc_lsb, sps.log2_max_poc_lsb);
            if pps.pic_order_present {
                w.write_se(0);
            }
        }
        1 => {
            w.write_se(0);
            if pps.pic_order_present {
                w.write_se(0);
            }
        }
        _ => {}
    }
    if pps.redundant_pic_cnt_present {
        w.write_ue(s.redundant_pic_cnt);
    }
    if lists == 2 {
        w.write_flag(s.direct_spatial);
    }
    let mut active = pps.num_ref_idx_default;
    if lists > 0 {
        w.write_flag(s.num_ref_idx_override.is_some());
        if let Some(n) = s.num_ref_idx_override {
            active = n;
            w.write_ue(n[0] - 1);
            if lists == 2 {
                w.write_ue(n[1] - 1);
            }
        }
    }
    for mods in s.ref_mods.iter().take(lists) {
        w.write_flag(!mods.is_empty());
        if mods.is_empty() {
            continue;
        }
        for &(idc, val) in mods {
            w.write_ue(idc);
            w.write_ue(if idc < 2 { val - 1 } else { val });
        }
        w.write_ue(3);
    }
    let weighted =
        (pps.weighted_pred && lists == 1) || (pps.weighted_bipred_idc == 1 && lists == 2);
    if weighted {
        let (denom, table) = s
            .luma_weights
            .clone()
            .unwrap_or((0, [Vec::new(), Vec::new()]));
        w.write_ue(denom);
        w.write_ue(0);
        for (list, entries) in table.iter().enumerate().take(lists) {
            for i in 0..active[list] as usize {
                match entries.get(i).copied().flatten() {
                    Some((wt, off)) => {
                        w.write_flag(true);
                        w.write_se(wt);
                        w.write_se(off);
                    }
                    None => w.write_flag(false),
                }
                w.write_flag(false); // chroma_weight_flag
            }
        }
    }
    if s.nal_ref_idc != 0 {
        if s.idr {
            w.write_flag(s.no_output_of_prior_pics);
            w.write_flag(s.long_term_reference);
        } else {
            w.write_flag(s.mmco.is_some());
            if let Some(ops) = &s.mmco {
                for op in ops {
                    write_mmco(w, op);
                }
                w.write_ue(0);
            }
        }
    }
    if pps.cabac && lists > 0 {
        w.write_ue(s.cabac_init_idc);
    }
    w.write_se(s.slice_qp_delta);
    if pps.deblocking_filter_control_present {
        w.write_ue(s.disable_deblocking);
        if s.disable_deblocking != 1 {
            w.write_se(s.filter_offsets.0);
            w.write_se(s.filter_offsets.1);
        }
    }
}

/// 只含切片头与尾随位的 RBSP
pub fn slice_header_rbsp(sps: &SpsParams, pps: &PpsParams, s: &SliceParams) -> Vec<u8> {
    let mut w = BitWriter::new();
    write_slice_header(&mut w, sps, pps, s);
    w.write_trailing_bits();
    w.finish()
}

/// 调度测试用的空任务
pub fn blank_task() -> SliceTask {
    let sps = Arc::new(test_sps(&SpsParams::default()));
    let pps = Arc::new(parse_pps(&pps_rbsp(&PpsParams::default()), Some(&sps)).unwrap());
    SliceTask {
        header: SliceHeader::non_existing(0),
        sps,
        pps,
        scale: Arc::new(LevelScale::new(&ScalingLists::flat())),
        payload: Bytes::new(),
        slice_num: 1,
        target: Arc::new(Picture::new(1, 1)),
        poc: 0,
        refs: [Vec::new(), Vec::new()],
    }
}

// ============================================================
// 切片数据
// ============================================================

/// 一个 I_PCM 宏块的样本: 256 亮度 + 64 Cb + 64 Cr
pub type PcmBlock = Vec<u8>;

/// 随机 I_PCM 宏块
pub fn random_pcm(rng: &mut XorShift, count: usize) -> Vec<PcmBlock> {
    (0..count).map(|_| rng.bytes(384)).collect()
}

/// CAVLC I 切片, 全部为 I_PCM
pub fn cavlc_pcm_data(w: &mut BitWriter, mbs: &[PcmBlock]) {
    for mb in mbs {
        w.write_ue(25);
        w.align_zero();
        w.write_bytes(mb);
    }
    w.write_trailing_bits();
}

/// CAVLC P/B 切片, `count` 个跳过宏块
pub fn cavlc_skip_data(w: &mut BitWriter, count: u32) {
    w.write_ue(count);
    w.write_trailing_bits();
}

/// CAVLC I 切片, 全部为 I_16x16 DC 预测 (cbp = 0)
///
/// 第一个宏块带一个幅度为 `level` (2..=8) 的亮度 DC 系数, 其余宏块无系数.
pub fn cavlc_i16x16_dc_data(w: &mut BitWriter, count: u32, level: u32) {
    for k in 0..count {
        w.write_ue(3); // I_16x16_2_0_0
        w.write_ue(0); // intra_chroma_pred_mode = DC
        w.write_se(0); // mb_qp_delta
        if k == 0 && level > 0 {
            // coeff_token (nC 0..2): TrailingOnes 0, TotalCoeff 1
            w.write_bits(0b000101, 6);
            // 首个非 T1 系数 levelCode 减 2 后编码, suffixLength = 0
            let prefix = 2 * level - 4;
            w.write_bits(1, prefix + 1);
            // total_zeros = 0
            w.write_bits(1, 1);
        } else {
            w.write_bits(1, 1); // coeff_token: TotalCoeff 0
        }
    }
    w.write_trailing_bits();
}

/// 宏块 `addr` 的左邻与上邻是否在同一切片内
fn neighbors_in_slice(addr: u32, first_mb: u32, width_mbs: u32) -> (bool, bool) {
    let left = addr % width_mbs > 0 && addr - 1 >= first_mb;
    let top = addr >= width_mbs && addr - width_mbs >= first_mb;
    (left, top)
}

/// CABAC I 切片, 全部为 I_PCM
pub fn cabac_pcm_data(qp: i32, first_mb: u32, width_mbs: u32, mbs: &[PcmBlock]) -> Vec<u8> {
    let mut enc = CabacEncoder::new(qp, 0);
    for (k, mb) in mbs.iter().enumerate() {
        let addr = first_mb + k as u32;
        let (a, b) = neighbors_in_slice(addr, first_mb, width_mbs);
        // ctxIdxInc: 可用且不为 I_NxN 的邻居数
        enc.encode_decision(3 + usize::from(a) + usize::from(b), 1);
        enc.encode_pcm(mb);
        enc.encode_terminate(u32::from(k + 1 == mbs.len()));
    }
    enc.finish()
}

/// CABAC P 切片, `count` 个 P_Skip 宏块
pub fn cabac_skip_data(qp: i32, cabac_init_idc: u32, count: u32) -> Vec<u8> {
    let mut enc = CabacEncoder::new(qp, cabac_init_idc as usize + 1);
    for k in 0..count {
        // 邻居全部跳过, ctxIdxInc = 0
        enc.encode_decision(11, 1);
        enc.encode_terminate(u32::from(k + 1 == count));
    }
    enc.finish()
}

// ============================================================
// 码流
// ============================================================

/// Annex B 码流构造器
pub struct Stream {
    pub sps: SpsParams,
    pub pps: PpsParams,
    pub data: Vec<u8>,
}

impl Stream {
    /// 以 SPS 与 PPS 开头的码流
    pub fn new(sps: SpsParams, pps: PpsParams) -> Self {
        let mut data = annex_b_nal(0x67, &sps_rbsp(&sps));
        data.extend(annex_b_nal(0x68, &pps_rbsp(&pps)));
        Self { sps, pps, data }
    }

    pub fn push_nal(&mut self, header: u8, rbsp: &[u8]) {
        self.data.extend(annex_b_nal(header, rbsp));
    }

    /// CAVLC 切片: 切片头之后由 `body` 写出切片数据与尾随位
    pub fn push_cavlc(&mut self, s: &SliceParams, body: impl FnOnce(&mut BitWriter)) {
        let mut w = BitWriter::new();
        write_slice_header(&mut w, &self.sps, &self.pps, s);
        body(&mut w);
        self.push_slice(s, &w.finish());
    }

    /// CABAC 切片: 切片头 + cabac_alignment_one_bit + 编码器输出
    pub fn push_cabac(&mut self, s: &SliceParams, data: &[u8]) {
        let rbsp = cabac_slice_rbsp(&self.sps, &self.pps, s, data);
        self.push_slice(s, &rbsp);
    }

    fn push_slice(&mut self, s: &SliceParams, rbsp: &[u8]) {
        let mut unit = s.nal_header_extension();
        unit.extend_from_slice(rbsp);
        self.push_nal(s.nal_header(), &unit);
    }
}

/// 双视图码流: 基础视图用 SPS/PPS 0, 非基础视图用子集 SPS 1 与 PPS 1
pub fn mvc_stream(sps: SpsParams, pps: PpsParams) -> Stream {
    let subset = SpsParams {
        profile_idc: 118,
        sps_id: 1,
        ..sps.clone()
    };
    let second_pps = PpsParams {
        pps_id: 1,
        sps_id: 1,
        ..pps.clone()
    };
    let mut stream = Stream::new(sps, pps);
    stream.push_nal(0x6F, &subset_sps_rbsp(&subset));
    stream.push_nal(0x68, &pps_rbsp(&second_pps));
    stream
}

pub fn cabac_slice_rbsp(sps: &SpsParams, pps: &PpsParams, s: &SliceParams, data: &[u8]) -> Vec<u8> {
    let mut w = BitWriter::new();
    write_slice_header(&mut w, sps, pps, s);
    while !w.byte_aligned() {
        w.write_bit(1);
    }
    w.write_bytes(data);
    w.finish()
}

/// 解码整条码流, 返回每个 NAL 的结果与全部输出帧
pub fn decode_stream(dec: &mut H264Decoder, data: &[u8]) -> (Vec<YingResult<()>>, Vec<Frame>) {
    let mut results = Vec::new();
    let mut frames = Vec::new();
    let start = find_start_code(data).map_or(data.len(), |p| p + 3);
    let mut rest = &data[start..];
    while !rest.is_empty() {
        let (res, next) = dec.decode_nal(rest, false);
        results.push(res);
        rest = next;
        while let Some(f) = dec.get_frame(false).unwrap() {
            frames.push(f);
        }
    }
    let (res, _) = dec.decode_nal(&[], false);
    assert!(matches!(res, Err(ying_core::YingError::NoData)));
    while let Some(f) = dec.get_frame(false).unwrap() {
        frames.push(f);
    }
    (results, frames)
}

/// 用指定线程数解码
pub fn decode_with_threads(data: &[u8], n_threads: i32) -> (Vec<YingResult<()>>, Vec<Frame>) {
    let mut dec = H264Decoder::new(DecoderConfig::new().with_threads(n_threads)).unwrap();
    decode_stream(&mut dec, data)
}

/// 不经过解码器把图像包装成输出帧 (槽位 0)
pub fn frame_of(pic: Arc<Picture>) -> Frame {
    let sched = Scheduler::new(0).unwrap();
    let (width, height) = {
        let d = pic.read().unwrap();
        (d.width() as u32, d.height() as u32)
    };
    let info = FrameInfo {
        width,
        height,
        crop_left: 0,
        crop_top: 0,
        frame_id: 0,
        poc: 0,
        error: false,
    };
    let base = ViewPicture::new(0, pic, info).unwrap();
    Frame::new(Arc::clone(sched.shared()), base, None, width as usize)
}

/// 帧的完整 (未裁剪) 平面拷贝
pub fn planes_of(frame: &Frame) -> [Vec<u8>; 3] {
    let view = frame.planes().unwrap();
    [view.y().to_vec(), view.cb().to_vec(), view.cr().to_vec()]
}

/// 把 I_PCM 宏块按光栅顺序拼成三个平面
pub fn pcm_planes(mbs: &[PcmBlock], width_mbs: usize) -> [Vec<u8>; 3] {
    let height_mbs = mbs.len() / width_mbs;
    let (w, cw) = (width_mbs * 16, width_mbs * 8);
    let mut planes = [
        vec![0u8; w * height_mbs * 16],
        vec![0u8; cw * height_mbs * 8],
        vec![0u8; cw * height_mbs * 8],
    ];
    for (addr, mb) in mbs.iter().enumerate() {
        let (mx, my) = (addr % width_mbs, addr / width_mbs);
        for y in 0..16 {
            let row = (my * 16 + y) * w + mx * 16;
            planes[0][row..row + 16].copy_from_slice(&mb[y * 16..y * 16 + 16]);
        }
        for c in 0..2 {
            for y in 0..8 {
                let src = 256 + c * 64 + y * 8;
                let row = (my * 8 + y) * cw + mx * 8;
                planes[1 + c][row..row + 8].copy_from_slice(&mb[src..src + 8]);
            }
        }
    }
    planes
}
