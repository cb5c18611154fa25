//! H.264 SPS (Sequence Parameter Set) 解析器.
//!
//! SPS 包含编码视频序列的全局参数, 包括:
//! - Profile / Level (编码规格)
//! - 图像宽度和高度 (以宏块为单位, 以及 cropping 偏移)
//! - 色度格式与位深
//! - 图像顺序计数 (POC) 参数
//! - 量化矩阵 (scaling list, 按光栅顺序存储)
//! - VUI 中的缓冲参数 (max_num_reorder_frames / max_dec_frame_buffering)
//!
//! 解析只检查语法合法性. 解码器是否支持该序列 (4:2:0, 8 位, 逐行) 由
//! [`Sps::check_supported`] 单独判断.

use log::debug;
use ying_core::bitreader::BitReader;
use ying_core::{YingError, YingResult};

/// 4x4 之字形扫描: 扫描序号 → 光栅位置
pub const ZIGZAG_4X4: [u8; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// 8x8 之字形扫描 (帧): 扫描序号 → 光栅位置
#[rustfmt::skip]
pub const ZIGZAG_8X8: [u8; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10, 17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34, 27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// 预定义的 SAR 表 (ITU-T H.264 表 E-1)
const SAR_TABLE: [(u32, u32); 17] = [
    (0, 1),    // 0: 未指定
    (1, 1),    // 1: 1:1
    (12, 11),  // 2: 12:11
    (10, 11),  // 3: 10:11
    (16, 11),  // 4: 16:11
    (40, 33),  // 5: 40:33
    (24, 11),  // 6: 24:11
    (20, 11),  // 7: 20:11
    (32, 11),  // 8: 32:11
    (80, 33),  // 9: 80:33
    (18, 11),  // 10: 18:11
    (15, 11),  // 11: 15:11
    (64, 33),  // 12: 64:33
    (160, 99), // 13: 160:99
    (4, 3),    // 14: 4:3
    (3, 2),    // 15: 3:2
    (2, 1),    // 16: 2:1
];

/// 各 level 的 MaxDpbMbs (表 A-1), 按 level_idc 索引
#[rustfmt::skip]
const MAX_DPB_MBS: [u32; 64] = [
    396, 396, 396, 396, 396, 396, 396, 396, 396, 396, 396,
    900,
    2376, 2376, 2376, 2376, 2376, 2376, 2376, 2376, 2376,
    4752,
    8100, 8100, 8100, 8100, 8100, 8100, 8100, 8100, 8100,
    18000,
    20480,
    32768, 32768, 32768, 32768, 32768, 32768, 32768, 32768, 32768,
    34816,
    110400, 110400, 110400, 110400, 110400, 110400, 110400, 110400,
    184320, 184320,
    696320, 696320, 696320, 696320, 696320, 696320, 696320, 696320, 696320, 696320,
    u32::MAX,
];

/// Default_4x4_Intra (光栅顺序)
pub const DEFAULT_SCALING_4X4_INTRA: [u8; 16] = [
    6, 13, 20, 28, 13, 20, 28, 32, 20, 28, 32, 37, 28, 32, 37, 42,
];

/// Default_4x4_Inter (光栅顺序)
pub const DEFAULT_SCALING_4X4_INTER: [u8; 16] = [
    10, 14, 20, 24, 14, 20, 24, 27, 20, 24, 27, 30, 24, 27, 30, 34,
];

/// Default_8x8_Intra (光栅顺序)
pub const DEFAULT_SCALING_8X8_INTRA: [u8; 64] = [
    6, 10, 13, 16, 18, 23, 25, 27, 10, 11, 16, 18, 23, 25, 27, 29, 13, 16, 18, 23, 25, 27, 29, 31,
    16, 18, 23, 25, 27, 29, 31, 33, 18, 23, 25, 27, 29, 31, 33, 36, 23, 25, 27, 29, 31, 33, 36, 38,
    25, 27, 29, 31, 33, 36, 38, 40, 27, 29, 31, 33, 36, 38, 40, 42,
];

/// Default_8x8_Inter (光栅顺序)
pub const DEFAULT_SCALING_8X8_INTER: [u8; 64] = [
    9, 13, 15, 17, 19, 21, 22, 24, 13, 13, 17, 19, 21, 22, 24, 25, 15, 17, 19, 21, 22, 24, 25, 27,
    17, 19, 21, 22, 24, 25, 27, 28, 19, 21, 22, 24, 25, 27, 28, 30, 21, 22, 24, 25, 27, 28, 30, 32,
    22, 24, 25, 27, 28, 30, 32, 33, 24, 25, 27, 28, 30, 32, 33, 35,
];

/// 已解析的量化矩阵集合 (光栅顺序)
///
/// 4x4 列表顺序为 Y/Cb/Cr 帧内, Y/Cb/Cr 帧间; 8x8 列表顺序为 Y 帧内, Y 帧间, 之后
/// 是 4:4:4 才有的 Cb/Cr 列表.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingLists {
    /// 6 个 4x4 列表
    pub list_4x4: [[u8; 16]; 6],
    /// 6 个 8x8 列表
    pub list_8x8: [[u8; 64]; 6],
}

impl ScalingLists {
    /// Flat_4x4_16 / Flat_8x8_16
    pub fn flat() -> Self {
        Self {
            list_4x4: [[16; 16]; 6],
            list_8x8: [[16; 64]; 6],
        }
    }

    /// 预置默认矩阵, 作为回退规则 A 的起点
    fn defaults() -> Self {
        let mut lists = Self::flat();
        for (i, l) in lists.list_4x4.iter_mut().enumerate() {
            *l = if i < 3 {
                DEFAULT_SCALING_4X4_INTRA
            } else {
                DEFAULT_SCALING_4X4_INTER
            };
        }
        for (i, l) in lists.list_8x8.iter_mut().enumerate() {
            *l = if i % 2 == 0 {
                DEFAULT_SCALING_8X8_INTRA
            } else {
                DEFAULT_SCALING_8X8_INTER
            };
        }
        lists
    }

    /// 解析 scaling_list 语法并就地应用回退规则
    ///
    /// 调用前 `self` 必须已装入回退起点: SPS 为默认矩阵 (规则 A), PPS 为所属 SPS
    /// 的矩阵 (规则 B). 列表 0/3/6/7 缺失时保持原值即得到正确的回退结果.
    pub fn parse(
        &mut self,
        br: &mut BitReader,
        transform_8x8: bool,
        chroma_format_idc: u32,
    ) -> YingResult<()> {
        let mut fallback = self.list_4x4[0];
        for i in 0..6 {
            if i == 3 {
                fallback = self.list_4x4[3];
            }
            if !br.read_flag() {
                self.list_4x4[i] = fallback;
                continue;
            }
            let default = if i < 3 {
                &DEFAULT_SCALING_4X4_INTRA
            } else {
                &DEFAULT_SCALING_4X4_INTER
            };
            if !read_scaling_list(br, &mut self.list_4x4[i], &ZIGZAG_4X4) {
                self.list_4x4[i] = *default;
            }
            fallback = self.list_4x4[i];
        }

        if !transform_8x8 {
            return Ok(());
        }
        let count = if chroma_format_idc == 3 { 6 } else { 2 };
        for i in 0..count {
            if !br.read_flag() {
                if i >= 2 {
                    self.list_8x8[i] = self.list_8x8[i - 2];
                }
                continue;
            }
            let default = if i % 2 == 0 {
                &DEFAULT_SCALING_8X8_INTRA
            } else {
                &DEFAULT_SCALING_8X8_INTER
            };
            if !read_scaling_list(br, &mut self.list_8x8[i], &ZIGZAG_8X8) {
                self.list_8x8[i] = *default;
            }
        }
        Ok(())
    }
}

/// 读取一个 scaling_list, 按之字形写入光栅位置
///
/// 返回 false 表示 useDefaultScalingMatrixFlag.
fn read_scaling_list(br: &mut BitReader, list: &mut [u8], scan: &[u8]) -> bool {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for (j, &pos) in scan.iter().enumerate() {
        if next_scale != 0 {
            let delta = br.read_se(-128, 127);
            next_scale = (last_scale + delta + 256) % 256;
            if j == 0 && next_scale == 0 {
                return false;
            }
        }
        let scale = if next_scale == 0 {
            last_scale
        } else {
            next_scale
        };
        list[pos as usize] = scale as u8;
        last_scale = scale;
    }
    true
}

/// SPS 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    /// profile_idc (编码规格, 如 66=Baseline, 77=Main, 100=High)
    pub profile_idc: u8,
    /// constraint_set 标志位
    pub constraint_set_flags: u8,
    /// level_idc (编码级别, 如 30=3.0, 41=4.1)
    pub level_idc: u8,
    /// seq_parameter_set_id
    pub sps_id: u32,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u32,
    /// separate_colour_plane_flag
    pub separate_colour_plane: bool,
    /// 亮度位深
    pub bit_depth_luma: u32,
    /// 色度位深
    pub bit_depth_chroma: u32,
    /// qpprime_y_zero_transform_bypass_flag
    pub qpprime_y_zero_transform_bypass: bool,
    /// 序列级量化矩阵 (未出现时为 Flat_16)
    pub scaling: ScalingLists,
    /// log2(MaxFrameNum)
    pub log2_max_frame_num: u32,
    /// 图像顺序计数类型 (0, 1, 2)
    pub poc_type: u32,
    /// log2(MaxPicOrderCntLsb), 仅 poc_type==0
    pub log2_max_poc_lsb: u32,
    /// `poc_type==1` 时的 delta_pic_order_always_zero_flag
    pub delta_pic_order_always_zero: bool,
    /// `poc_type==1` 时的 offset_for_non_ref_pic
    pub offset_for_non_ref_pic: i32,
    /// `poc_type==1` 时的 offset_for_top_to_bottom_field
    pub offset_for_top_to_bottom_field: i32,
    /// `poc_type==1` 时的 offset_for_ref_frame 列表
    pub offset_for_ref_frame: Vec<i32>,
    /// 最大参考帧数
    pub max_num_ref_frames: u32,
    /// gaps_in_frame_num_value_allowed_flag
    pub gaps_in_frame_num_allowed: bool,
    /// 宽度 (宏块)
    pub pic_width_in_mbs: u32,
    /// 帧高度 (宏块)
    pub pic_height_in_mbs: u32,
    /// frame_mbs_only_flag
    pub frame_mbs_only: bool,
    /// mb_adaptive_frame_field_flag
    pub mb_adaptive_frame_field: bool,
    /// direct_8x8_inference_flag
    pub direct_8x8_inference: bool,
    /// 裁剪偏移 (亮度像素): 左
    pub crop_left: u32,
    /// 裁剪偏移 (亮度像素): 右
    pub crop_right: u32,
    /// 裁剪偏移 (亮度像素): 上
    pub crop_top: u32,
    /// 裁剪偏移 (亮度像素): 下
    pub crop_bottom: u32,
    /// 是否存在 VUI 参数
    pub vui_present: bool,
    /// SAR (Sample Aspect Ratio), 未指定时为 None
    pub sar: Option<(u32, u32)>,
    /// 帧率 (time_scale, 2 * num_units_in_tick)
    pub fps: Option<(u32, u32)>,
    /// max_num_reorder_frames (VUI 或按 profile/level 推断)
    pub max_num_reorder_frames: u32,
    /// max_dec_frame_buffering, 不小于参考帧数与重排帧数
    pub max_dec_frame_buffering: u32,
}

impl Sps {
    /// 裁剪后的显示宽度
    pub fn width(&self) -> u32 {
        self.pic_width_in_mbs * 16 - self.crop_left - self.crop_right
    }

    /// 裁剪后的显示高度
    pub fn height(&self) -> u32 {
        self.pic_height_in_mbs * 16 - self.crop_top - self.crop_bottom
    }

    /// 宏块总数
    pub fn mb_count(&self) -> u32 {
        self.pic_width_in_mbs * self.pic_height_in_mbs
    }

    /// MaxFrameNum
    pub fn max_frame_num(&self) -> u32 {
        1 << self.log2_max_frame_num
    }

    /// DPB 需要的帧缓冲数 (含当前帧)
    pub fn num_frame_buffers(&self) -> u32 {
        self.max_dec_frame_buffering + 1
    }

    /// 检查解码器是否支持该序列
    pub fn check_supported(&self) -> YingResult<()> {
        if self.chroma_format_idc != 1 || self.separate_colour_plane {
            return Err(YingError::Unsupported(format!(
                "H264: 仅支持 4:2:0, chroma_format_idc={}",
                self.chroma_format_idc
            )));
        }
        if self.bit_depth_luma != 8 || self.bit_depth_chroma != 8 {
            return Err(YingError::Unsupported(format!(
                "H264: 仅支持 8 位, bit_depth={}/{}",
                self.bit_depth_luma, self.bit_depth_chroma
            )));
        }
        if self.qpprime_y_zero_transform_bypass {
            return Err(YingError::Unsupported(
                "H264: qpprime_y_zero_transform_bypass".into(),
            ));
        }
        if !self.frame_mbs_only {
            return Err(YingError::Unsupported("H264: 场编码 (PAFF/MBAFF)".into()));
        }
        Ok(())
    }

    /// 宏块尺寸与裁剪区域是否相同
    pub fn same_geometry(&self, other: &Sps) -> bool {
        self.pic_width_in_mbs == other.pic_width_in_mbs
            && self.pic_height_in_mbs == other.pic_height_in_mbs
            && (self.crop_left, self.crop_right, self.crop_top, self.crop_bottom)
                == (other.crop_left, other.crop_right, other.crop_top, other.crop_bottom)
    }

    /// 参数是否会改变帧缓冲布局
    pub fn same_format(&self, other: &Sps) -> bool {
        self.same_geometry(other)
            && self.chroma_format_idc == other.chroma_format_idc
            && self.bit_depth_luma == other.bit_depth_luma
            && self.bit_depth_chroma == other.bit_depth_chroma
            && self.max_dec_frame_buffering == other.max_dec_frame_buffering
    }
}

/// 是否带 chroma_format_idc 等扩展字段
fn has_chroma_info(profile_idc: u8) -> bool {
    !matches!(profile_idc, 66 | 77 | 88)
}

/// 从 SPS 载荷 (NAL 头之后, 可含防竞争字节) 解析 SPS
pub fn parse_sps(payload: &[u8]) -> YingResult<Sps> {
    let mut br = BitReader::new(payload);
    let sps = parse_sps_data(&mut br)?;
    if br.overrun() > 0 || !br.is_rbsp_end() {
        return Err(YingError::InvalidData("H264: SPS 尾随位错误".into()));
    }
    debug!(
        "H264: SPS id={} profile={} level={} {}x{} 宏块, poc_type={}, ref={}, reorder={}",
        sps.sps_id,
        sps.profile_idc,
        sps.level_idc,
        sps.pic_width_in_mbs,
        sps.pic_height_in_mbs,
        sps.poc_type,
        sps.max_num_ref_frames,
        sps.max_num_reorder_frames
    );
    Ok(sps)
}

/// 解析子集 SPS (MVC)
///
/// 只接受 Multiview/Stereo High; MVC 扩展部分仅做语法检查.
pub fn parse_subset_sps(payload: &[u8]) -> YingResult<Sps> {
    let mut br = BitReader::new(payload);
    let sps = parse_sps_data(&mut br)?;
    if !matches!(sps.profile_idc, 118 | 128 | 134) {
        return Err(YingError::Unsupported(format!(
            "H264: 子集 SPS profile_idc={}",
            sps.profile_idc
        )));
    }
    if !br.read_flag() {
        return Err(YingError::InvalidData("H264: bit_equal_to_one 为 0".into()));
    }
    skip_mvc_extension(&mut br)?;
    if br.read_flag() {
        skip_mvc_vui_extension(&mut br);
    }
    // additional_extension2_flag 之后的尾随位在实际码流中常有错误, 不检查
    br.read_bit();
    if br.overrun() > 0 {
        return Err(YingError::InvalidData("H264: 子集 SPS 被截断".into()));
    }
    if sps.profile_idc == 134 {
        return Err(YingError::Unsupported("H264: MFC High".into()));
    }
    Ok(sps)
}

fn parse_sps_data(br: &mut BitReader) -> YingResult<Sps> {
    let profile_idc = br.read_bits(8) as u8;
    let constraint_set_flags = br.read_bits(8) as u8;
    let level_idc = br.read_bits(8) as u8;
    let sps_id = br.read_ue(u32::MAX);
    if sps_id > 31 {
        return Err(YingError::InvalidData(format!(
            "H264: sps_id 超出范围, sps_id={sps_id}"
        )));
    }

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;
    let mut qpprime_y_zero_transform_bypass = false;
    let mut scaling = ScalingLists::flat();

    if has_chroma_info(profile_idc) {
        chroma_format_idc = br.read_ue(3);
        if chroma_format_idc == 3 {
            separate_colour_plane = br.read_flag();
        }
        bit_depth_luma = br.read_ue(6) + 8;
        bit_depth_chroma = br.read_ue(6) + 8;
        qpprime_y_zero_transform_bypass = br.read_flag();
        if br.read_flag() {
            scaling = ScalingLists::defaults();
            scaling.parse(br, true, chroma_format_idc)?;
        }
    }

    let log2_max_frame_num = br.read_ue(12) + 4;
    let poc_type = br.read_ue(u32::MAX);
    if poc_type > 2 {
        return Err(YingError::InvalidData(format!(
            "H264: pic_order_cnt_type 非法, value={poc_type}"
        )));
    }
    let mut log2_max_poc_lsb = 0;
    let mut delta_pic_order_always_zero = false;
    let mut offset_for_non_ref_pic = 0;
    let mut offset_for_top_to_bottom_field = 0;
    let mut offset_for_ref_frame = Vec::new();
    match poc_type {
        0 => log2_max_poc_lsb = br.read_ue(12) + 4,
        1 => {
            delta_pic_order_always_zero = br.read_flag();
            offset_for_non_ref_pic = br.read_se(-32768, 32767);
            offset_for_top_to_bottom_field = br.read_se(-32768, 32767);
            let cycle = br.read_ue(255);
            offset_for_ref_frame = (0..cycle).map(|_| br.read_se(-65535, 65535)).collect();
        }
        _ => {}
    }

    let max_num_ref_frames = br.read_ue(u32::MAX);
    if max_num_ref_frames > 16 {
        return Err(YingError::InvalidData(format!(
            "H264: max_num_ref_frames 超出范围, value={max_num_ref_frames}"
        )));
    }
    let gaps_in_frame_num_allowed = br.read_flag();
    let pic_width_in_mbs = br.read_ue(1022) + 1;
    let pic_height_in_map_units = br.read_ue(1054) + 1;
    let frame_mbs_only = br.read_flag();
    let pic_height_in_mbs = if frame_mbs_only {
        pic_height_in_map_units.min(527)
    } else {
        pic_height_in_map_units * 2
    };
    let mb_adaptive_frame_field = !frame_mbs_only && br.read_flag();
    let direct_8x8_inference = br.read_flag();

    let chroma_array_type = if separate_colour_plane {
        0
    } else {
        chroma_format_idc
    };
    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    if br.read_flag() {
        let shift_x = u32::from(chroma_array_type == 1 || chroma_array_type == 2);
        let shift_y = u32::from(chroma_array_type == 1) + u32::from(!frame_mbs_only);
        let lim_x = ((pic_width_in_mbs * 16) >> shift_x) - 1;
        let lim_y = ((pic_height_in_mbs * 16) >> shift_y) - 1;
        let left = br.read_ue(lim_x);
        let right = br.read_ue(lim_x - left);
        let top = br.read_ue(lim_y);
        let bottom = br.read_ue(lim_y - top);
        crop_left = left << shift_x;
        crop_right = right << shift_x;
        crop_top = top << shift_y;
        crop_bottom = bottom << shift_y;
    }

    // 无 VUI 时按 profile 与 level 推断缓冲参数
    let mb_count = pic_width_in_mbs * pic_height_in_mbs;
    let max_dpb_frames = (MAX_DPB_MBS[usize::from(level_idc.min(63))] / mb_count).min(16);
    let intra_only = matches!(profile_idc, 44 | 86 | 100 | 110 | 122 | 244)
        && constraint_set_flags & (1 << 4) != 0;
    let mut max_num_reorder_frames = if intra_only { 0 } else { max_dpb_frames };
    let mut max_dec_frame_buffering = max_num_reorder_frames.max(max_num_ref_frames);

    let vui_present = br.read_flag();
    let mut sar = None;
    let mut fps = None;
    if vui_present {
        let vui = parse_vui(br)?;
        sar = vui.sar;
        fps = vui.fps;
        if let Some((reorder, buffering)) = vui.buffering {
            max_num_reorder_frames = reorder;
            max_dec_frame_buffering = buffering.max(max_num_ref_frames).max(reorder);
        }
    }

    Ok(Sps {
        profile_idc,
        constraint_set_flags,
        level_idc,
        sps_id,
        chroma_format_idc,
        separate_colour_plane,
        bit_depth_luma,
        bit_depth_chroma,
        qpprime_y_zero_transform_bypass,
        scaling,
        log2_max_frame_num,
        poc_type,
        log2_max_poc_lsb,
        delta_pic_order_always_zero,
        offset_for_non_ref_pic,
        offset_for_top_to_bottom_field,
        offset_for_ref_frame,
        max_num_ref_frames,
        gaps_in_frame_num_allowed,
        pic_width_in_mbs,
        pic_height_in_mbs,
        frame_mbs_only,
        mb_adaptive_frame_field,
        direct_8x8_inference,
        crop_left,
        crop_right,
        crop_top,
        crop_bottom,
        vui_present,
        sar,
        fps,
        max_num_reorder_frames,
        max_dec_frame_buffering,
    })
}

/// VUI 中解码器关心的字段
struct Vui {
    sar: Option<(u32, u32)>,
    fps: Option<(u32, u32)>,
    /// (max_num_reorder_frames, max_dec_frame_buffering)
    buffering: Option<(u32, u32)>,
}

fn parse_vui(br: &mut BitReader) -> YingResult<Vui> {
    let mut sar = None;
    // aspect_ratio_info_present_flag
    if br.read_flag() {
        let ar_idc = br.read_bits(8) as usize;
        if ar_idc == 255 {
            let w = br.read_bits(16);
            let h = br.read_bits(16);
            if w > 0 && h > 0 {
                sar = Some((w, h));
            }
        } else if let Some(&(w, h)) = SAR_TABLE.get(ar_idc) {
            if w > 0 {
                sar = Some((w, h));
            }
        }
    }

    // overscan_info_present_flag
    if br.read_flag() {
        br.skip_bits(1);
    }

    // video_signal_type_present_flag
    if br.read_flag() {
        br.skip_bits(4); // video_format + video_full_range_flag
        if br.read_flag() {
            br.skip_bits(24); // colour_primaries, transfer, matrix
        }
    }

    // chroma_loc_info_present_flag
    if br.read_flag() {
        br.read_ue(5);
        br.read_ue(5);
    }

    let mut fps = None;
    // timing_info_present_flag
    if br.read_flag() {
        let num_units = br.read_bits(32).max(1);
        let time_scale = br.read_bits(32).max(1);
        br.skip_bits(1); // fixed_frame_rate_flag
        fps = Some((time_scale, num_units.saturating_mul(2)));
    }

    let nal_hrd = br.read_flag();
    if nal_hrd {
        skip_hrd_parameters(br);
    }
    let vcl_hrd = br.read_flag();
    if vcl_hrd {
        skip_hrd_parameters(br);
    }
    if nal_hrd || vcl_hrd {
        br.skip_bits(1); // low_delay_hrd_flag
    }
    br.skip_bits(1); // pic_struct_present_flag

    let mut buffering = None;
    // bitstream_restriction_flag
    if br.read_flag() {
        br.skip_bits(1); // motion_vectors_over_pic_boundaries_flag
        br.read_ue(16); // max_bytes_per_pic_denom
        br.read_ue(16); // max_bits_per_mb_denom
        br.read_ue(15); // log2_max_mv_length_horizontal
        br.read_ue(15); // log2_max_mv_length_vertical
        let reorder = br.read_ue(16);
        let max_dec = br.read_ue(16);
        buffering = Some((reorder, max_dec));
    }

    Ok(Vui {
        sar,
        fps,
        buffering,
    })
}

fn skip_hrd_parameters(br: &mut BitReader) {
    let cpb_cnt = br.read_ue(31) + 1;
    br.skip_bits(8); // bit_rate_scale + cpb_size_scale
    for _ in 0..cpb_cnt {
        br.read_ue(u32::MAX - 1);
        br.read_ue(u32::MAX - 1);
        br.skip_bits(1);
    }
    br.skip_bits(20);
}

fn skip_mvc_extension(br: &mut BitReader) -> YingResult<()> {
    let num_views = br.read_ue(1023) + 1;
    for _ in 0..num_views {
        br.read_ue(1023);
    }
    if num_views != 2 {
        return Err(YingError::Unsupported(format!(
            "H264: MVC 视图数 {num_views}"
        )));
    }
    // anchor/non-anchor 的 l0/l1 视图间参考
    for _ in 0..4 {
        if br.read_ue(1) != 0 {
            br.read_ue(1023);
        }
    }
    let levels = br.read_ue(63) + 1;
    for _ in 0..levels {
        br.skip_bits(8);
        let ops = br.read_ue(1023) + 1;
        for _ in 0..ops {
            br.skip_bits(3);
            let targets = br.read_ue(1023) + 1;
            for _ in 0..targets {
                br.read_ue(1023);
            }
            br.read_ue(1023);
        }
    }
    Ok(())
}

fn skip_mvc_vui_extension(br: &mut BitReader) {
    let ops = br.read_ue(1023) + 1;
    for _ in 0..ops {
        br.skip_bits(3);
        let targets = br.read_ue(1023) + 1;
        for _ in 0..targets {
            br.read_ue(1023);
        }
        if br.read_flag() {
            br.skip_bits(65);
        }
        let nal_hrd = br.read_flag();
        if nal_hrd {
            skip_hrd_parameters(br);
        }
        let vcl_hrd = br.read_flag();
        if vcl_hrd {
            skip_hrd_parameters(br);
        }
        if nal_hrd || vcl_hrd {
            br.skip_bits(1);
        }
        br.skip_bits(1);
    }
}
