//! 集成测试与基准测试共用的码流合成工具.
//!
//! 只生成 CAVLC 的 I_PCM IDR 与全跳过 P 图像, 足以覆盖解码器的公开接口.

#![allow(dead_code)]

use ying::core::bitwriter::{BitWriter, annex_b_nal};

/// 一个 I_PCM 宏块: 256 亮度 + 64 Cb + 64 Cr
pub type PcmBlock = Vec<u8>;

/// 确定性的 I_PCM 样本
pub fn pcm_blocks(seed: u32, count: usize) -> Vec<PcmBlock> {
    let mut state = seed.max(1);
    (0..count)
        .map(|_| {
            (0..384)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 17;
                    state ^= state << 5;
                    (state >> 24) as u8
                })
                .collect()
        })
        .collect()
}

/// 码流几何与缓冲参数
#[derive(Debug, Clone, Copy)]
pub struct StreamShape {
    pub width_mbs: u32,
    pub height_mbs: u32,
    /// frame_crop 偏移 (色度单位): 左, 右, 上, 下
    pub crop: Option<[u32; 4]>,
    pub reorder: u32,
}

impl StreamShape {
    pub fn new(width_mbs: u32, height_mbs: u32) -> Self {
        Self {
            width_mbs,
            height_mbs,
            crop: None,
            reorder: 0,
        }
    }

    pub fn mb_count(&self) -> usize {
        (self.width_mbs * self.height_mbs) as usize
    }
}

/// Annex B 码流构造器
pub struct SynthStream {
    shape: StreamShape,
    frame_num: u32,
    idr_count: u32,
    pub data: Vec<u8>,
}

impl SynthStream {
    /// 以 SPS (Main, 带 VUI) 与 PPS (CAVLC) 开头的码流
    pub fn new(shape: StreamShape) -> Self {
        let mut data = annex_b_nal(0x67, &sps_rbsp(&shape));
        data.extend(annex_b_nal(0x68, &pps_rbsp()));
        Self {
            shape,
            frame_num: 0,
            idr_count: 0,
            data,
        }
    }

    /// 整帧 I_PCM 的 IDR 图像
    pub fn idr_pcm(&mut self, mbs: &[PcmBlock]) -> &mut Self {
        let mut w = BitWriter::new();
        w.write_ue(0); // first_mb_in_slice
        w.write_ue(7); // I, 全部切片同类型
        w.write_ue(0); // pps_id
        w.write_bits(0, 4); // frame_num
        w.write_ue(self.idr_count % 2); // idr_pic_id
        w.write_bits(0, 8); // pic_order_cnt_lsb
        w.write_flag(false); // no_output_of_prior_pics
        w.write_flag(false); // long_term_reference
        w.write_se(0); // slice_qp_delta
        for mb in mbs {
            w.write_ue(25);
            w.align_zero();
            w.write_bytes(mb);
        }
        w.write_trailing_bits();
        self.data.extend(annex_b_nal(0x65, &w.finish()));
        self.frame_num = 0;
        self.idr_count += 1;
        self
    }

    /// 全部宏块跳过的 P 参考图像
    pub fn p_skip(&mut self) -> &mut Self {
        self.frame_num += 1;
        let mut w = BitWriter::new();
        w.write_ue(0);
        w.write_ue(5); // P
        w.write_ue(0);
        w.write_bits(self.frame_num % 16, 4);
        w.write_bits((2 * self.frame_num) % 256, 8);
        w.write_flag(false); // num_ref_idx_active_override
        w.write_flag(false); // ref_pic_list_modification_flag_l0
        w.write_flag(false); // adaptive_ref_pic_marking_mode
        w.write_se(0);
        w.write_ue(self.shape.mb_count() as u32); // mb_skip_run
        w.write_trailing_bits();
        self.data.extend(annex_b_nal(0x41, &w.finish()));
        self
    }
}

fn sps_rbsp(shape: &StreamShape) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_bits(77, 8); // profile_idc
    w.write_bits(0, 8);
    w.write_bits(30, 8); // level_idc
    w.write_ue(0); // sps_id
    w.write_ue(0); // log2_max_frame_num - 4
    w.write_ue(0); // pic_order_cnt_type
    w.write_ue(4); // log2_max_pic_order_cnt_lsb - 4
    w.write_ue(1); // max_num_ref_frames
    w.write_flag(false);
    w.write_ue(shape.width_mbs - 1);
    w.write_ue(shape.height_mbs - 1);
    w.write_flag(true); // frame_mbs_only
    w.write_flag(true); // direct_8x8_inference
    w.write_flag(shape.crop.is_some());
    if let Some(c) = shape.crop {
        for v in c {
            w.write_ue(v);
        }
    }
    w.write_flag(true); // vui_parameters_present
    for _ in 0..8 {
        w.write_flag(false);
    }
    w.write_flag(true); // bitstream_restriction
    w.write_flag(true);
    w.write_ue(2);
    w.write_ue(1);
    w.write_ue(16);
    w.write_ue(16);
    w.write_ue(shape.reorder);
    w.write_ue(shape.reorder.max(1));
    w.write_trailing_bits();
    w.finish()
}

fn pps_rbsp() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_ue(0); // pps_id
    w.write_ue(0); // sps_id
    w.write_flag(false); // CAVLC
    w.write_flag(false); // bottom_field_pic_order_in_frame_present
    w.write_ue(0); // num_slice_groups - 1
    w.write_ue(0);
    w.write_ue(0);
    w.write_flag(false); // weighted_pred
    w.write_bits(0, 2);
    w.write_se(0); // pic_init_qp - 26
    w.write_se(0);
    w.write_se(0);
    w.write_flag(false); // deblocking_filter_control_present
    w.write_flag(false);
    w.write_flag(false);
    w.write_trailing_bits();
    w.finish()
}

/// 把 I_PCM 宏块按光栅顺序拼成三个完整平面
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
