//! 反量化与整数反变换 (8.5.9 ~ 8.5.14).

use super::tables::{NORM_ADJUST_4X4, NORM_ADJUST_8X8, norm_class_4x4, norm_class_8x8};
use crate::parsers::h264::sps::ScalingLists;

/// LevelScale4x4 / LevelScale8x8 (weightScale * normAdjust)
///
/// 4x4 列表下标 0..3 为 Y/Cb/Cr 帧内, 3..6 为帧间; 8x8 下标 0 帧内, 1 帧间.
pub(crate) struct LevelScale {
    s4: [[[i32; 16]; 6]; 6],
    s8: [[[i32; 64]; 6]; 2],
}

impl LevelScale {
    pub(crate) fn new(lists: &ScalingLists) -> Self {
        let mut s4 = [[[0; 16]; 6]; 6];
        for (list, out) in s4.iter_mut().enumerate() {
            for (m, row) in out.iter_mut().enumerate() {
                for (pos, v) in row.iter_mut().enumerate() {
                    *v = i32::from(lists.list_4x4[list][pos])
                        * i32::from(NORM_ADJUST_4X4[m][norm_class_4x4(pos)]);
                }
            }
        }
        let mut s8 = [[[0; 64]; 6]; 2];
        for (list, out) in s8.iter_mut().enumerate() {
            for (m, row) in out.iter_mut().enumerate() {
                for (pos, v) in row.iter_mut().enumerate() {
                    *v = i32::from(lists.list_8x8[list][pos])
                        * i32::from(NORM_ADJUST_8X8[m][norm_class_8x8(pos)]);
                }
            }
        }
        Self { s4, s8 }
    }

    #[inline]
    pub(crate) fn scale_4x4(&self, list: usize, qp: i32) -> &[i32; 16] {
        &self.s4[list][(qp % 6) as usize]
    }

    #[inline]
    pub(crate) fn scale_8x8(&self, list: usize, qp: i32) -> &[i32; 64] {
        &self.s8[list][(qp % 6) as usize]
    }
}

// ============================================================
// 反量化
// ============================================================

/// 4x4 残差反量化 (8.5.12.1), `skip_dc` 时位置 0 已由 DC 变换给出
pub(crate) fn dequant_4x4(block: &mut [i32; 16], scale: &[i32; 16], qp: i32, skip_dc: bool) {
    let start = usize::from(skip_dc);
    if qp >= 24 {
        let shift = qp / 6 - 4;
        for i in start..16 {
            block[i] = (block[i] * scale[i]) << shift;
        }
    } else {
        let shift = 4 - qp / 6;
        let round = 1 << (shift - 1);
        for i in start..16 {
            block[i] = (block[i] * scale[i] + round) >> shift;
        }
    }
}

/// 8x8 残差反量化 (8.5.13.1)
pub(crate) fn dequant_8x8(block: &mut [i32; 64], scale: &[i32; 64], qp: i32) {
    if qp >= 36 {
        let shift = qp / 6 - 6;
        for (c, &s) in block.iter_mut().zip(scale.iter()) {
            *c = (*c * s) << shift;
        }
    } else {
        let shift = 6 - qp / 6;
        let round = 1 << (shift - 1);
        for (c, &s) in block.iter_mut().zip(scale.iter()) {
            *c = (*c * s + round) >> shift;
        }
    }
}

/// Intra16x16 亮度 DC: 4x4 Hadamard 反变换与反量化 (8.5.10)
///
/// 输入输出均为 4x4 块的光栅顺序, `scale0` 为 LevelScale4x4(qP % 6, 0, 0).
pub(crate) fn luma_dc_transform(dc: &mut [i32; 16], scale0: i32, qp: i32) {
    let mut tmp = [0i32; 16];
    for i in 0..4 {
        let r = &dc[i * 4..i * 4 + 4];
        let (s0, s1) = (r[0] + r[1], r[0] - r[1]);
        let (s2, s3) = (r[2] + r[3], r[2] - r[3]);
        tmp[i * 4] = s0 + s2;
        tmp[i * 4 + 1] = s1 + s3;
        tmp[i * 4 + 2] = s1 - s3;
        tmp[i * 4 + 3] = s0 - s2;
    }
    for j in 0..4 {
        let c = [tmp[j], tmp[4 + j], tmp[8 + j], tmp[12 + j]];
        let (s0, s1) = (c[0] + c[1], c[0] - c[1]);
        let (s2, s3) = (c[2] + c[3], c[2] - c[3]);
        let f = [s0 + s2, s1 + s3, s1 - s3, s0 - s2];
        for (i, &v) in f.iter().enumerate() {
            dc[i * 4 + j] = if qp >= 36 {
                (v * scale0) << (qp / 6 - 6)
            } else {
                (v * scale0 + (1 << (5 - qp / 6))) >> (6 - qp / 6)
            };
        }
    }
}

/// 4:2:0 色度 DC: 2x2 变换与反量化 (8.5.11)
pub(crate) fn chroma_dc_transform(dc: &mut [i32; 4], scale0: i32, qp: i32) {
    let (a, b, c, d) = (dc[0], dc[1], dc[2], dc[3]);
    let f = [a + b + c + d, a - b + c - d, a + b - c - d, a - b - c + d];
    for (out, v) in dc.iter_mut().zip(f) {
        *out = ((v * scale0) << (qp / 6)) >> 5;
    }
}

// ============================================================
// 反变换
// ============================================================

#[inline]
fn clip_pixel(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// 4x4 反变换并叠加到预测样本 (8.5.12.2)
pub(crate) fn idct4x4_add(dst: &mut [u8], stride: usize, block: &mut [i32; 16]) {
    for i in 0..4 {
        let r = &mut block[i * 4..i * 4 + 4];
        let e = r[0] + r[2];
        let f = r[0] - r[2];
        let g = (r[1] >> 1) - r[3];
        let h = r[1] + (r[3] >> 1);
        r[0] = e + h;
        r[1] = f + g;
        r[2] = f - g;
        r[3] = e - h;
    }
    for j in 0..4 {
        let e = block[j] + block[8 + j];
        let f = block[j] - block[8 + j];
        let g = (block[4 + j] >> 1) - block[12 + j];
        let h = block[4 + j] + (block[12 + j] >> 1);
        let col = [e + h, f + g, f - g, e - h];
        for (i, &v) in col.iter().enumerate() {
            let p = &mut dst[i * stride + j];
            *p = clip_pixel(i32::from(*p) + ((v + 32) >> 6));
        }
    }
}

/// 只有 DC 系数的 4x4 块的快速路径
pub(crate) fn idct4x4_dc_add(dst: &mut [u8], stride: usize, dc: i32) {
    let d = (dc + 32) >> 6;
    for row in dst.chunks_mut(stride).take(4) {
        for p in &mut row[..4] {
            *p = clip_pixel(i32::from(*p) + d);
        }
    }
}

fn idct8_1d(s: [i32; 8]) -> [i32; 8] {
    let a0 = s[0] + s[4];
    let a4 = s[0] - s[4];
    let a2 = (s[2] >> 1) - s[6];
    let a6 = s[2] + (s[6] >> 1);
    let b0 = a0 + a6;
    let b2 = a4 + a2;
    let b4 = a4 - a2;
    let b6 = a0 - a6;

    let a1 = -s[3] + s[5] - s[7] - (s[7] >> 1);
    let a3 = s[1] + s[7] - s[3] - (s[3] >> 1);
    let a5 = -s[1] + s[7] + s[5] + (s[5] >> 1);
    let a7 = s[3] + s[5] + s[1] + (s[1] >> 1);
    let b1 = a1 + (a7 >> 2);
    let b7 = a7 - (a1 >> 2);
    let b3 = a3 + (a5 >> 2);
    let b5 = (a3 >> 2) - a5;

    [
        b0 + b7,
        b2 + b5,
        b4 + b3,
        b6 + b1,
        b6 - b1,
        b4 - b3,
        b2 - b5,
        b0 - b7,
    ]
}

/// 8x8 反变换并叠加到预测样本 (8.5.13.2)
pub(crate) fn idct8x8_add(dst: &mut [u8], stride: usize, block: &mut [i32; 64]) {
    for i in 0..8 {
        let mut row = [0; 8];
        row.copy_from_slice(&block[i * 8..i * 8 + 8]);
        block[i * 8..i * 8 + 8].copy_from_slice(&idct8_1d(row));
    }
    for j in 0..8 {
        let col: [i32; 8] = std::array::from_fn(|i| block[i * 8 + j]);
        for (i, &v) in idct8_1d(col).iter().enumerate() {
            let p = &mut dst[i * stride + j];
            *p = clip_pixel(i32::from(*p) + ((v + 32) >> 6));
        }
    }
}
