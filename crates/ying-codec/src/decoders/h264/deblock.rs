//! H.264 去块滤波 (8.7).
//!
//! 按宏块光栅顺序处理整幅图像: 每个宏块先滤波垂直边界再滤波水平边界,
//! 亮度按 4x4 边界 (8x8 变换宏块跳过内部奇数边界), 色度按 4x4 色度边界.
//! 边界强度 bS 由边界两侧的宏块记录推导, bS 为 0 的样本保持不变.

use super::macroblock::{MbFlags, MbInfo};
use super::picture::{DeblockParams, PictureData};
use super::tables::{ALPHA_TABLE, BETA_TABLE, TC0_TABLE, raster_to_blk8};

/// 边界方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeDir {
    /// 垂直边界, 沿水平方向跨越
    Vertical,
    /// 水平边界, 沿垂直方向跨越
    Horizontal,
}

/// 某 4x4 块 (或其所在 8x8 变换块) 是否含非零系数
fn has_coefficients(mb: &MbInfo, raster: usize) -> bool {
    if mb.flags.contains(MbFlags::TRANSFORM_8X8) {
        let b8 = raster_to_blk8(raster);
        let base = (b8 >> 1) * 8 + (b8 & 1) * 2;
        [base, base + 1, base + 4, base + 5]
            .iter()
            .any(|&r| mb.nnz[r] != 0)
    } else {
        mb.nnz[raster] != 0
    }
}

/// 4x4 块的运动: 按列表给出 (参考图像 FrameId, 运动矢量)
fn block_motion(mb: &MbInfo, raster: usize) -> Vec<(i32, [i32; 2])> {
    let b8 = raster_to_blk8(raster);
    (0..2)
        .filter(|&l| mb.ref_idx[l][b8] >= 0)
        .map(|l| (mb.ref_pic[l][b8], mb.mv_of(l, raster)))
        .collect()
}

#[inline]
fn mv_differs(a: [i32; 2], b: [i32; 2]) -> bool {
    (a[0] - b[0]).abs() >= 4 || (a[1] - b[1]).abs() >= 4
}

/// 边界强度 (8.7.2.1)
///
/// `p`/`q` 为边界两侧的宏块记录与 4x4 光栅位置, `mb_edge` 表示边界位于宏块边缘.
pub(crate) fn boundary_strength(
    p: &MbInfo,
    p_raster: usize,
    q: &MbInfo,
    q_raster: usize,
    mb_edge: bool,
) -> u8 {
    if p.is_intra() || q.is_intra() {
        return if mb_edge { 4 } else { 3 };
    }
    if has_coefficients(p, p_raster) || has_coefficients(q, q_raster) {
        return 2;
    }
    let mp = block_motion(p, p_raster);
    let mq = block_motion(q, q_raster);
    let differs = match (mp.as_slice(), mq.as_slice()) {
        ([a], [b]) => a.0 != b.0 || mv_differs(a.1, b.1),
        ([p0, p1], [q0, q1]) => {
            let same_set = (p0.0 == q0.0 && p1.0 == q1.0) || (p0.0 == q1.0 && p1.0 == q0.0);
            if !same_set {
                true
            } else if p0.0 != p1.0 {
                if p0.0 == q0.0 {
                    mv_differs(p0.1, q0.1) || mv_differs(p1.1, q1.1)
                } else {
                    mv_differs(p0.1, q1.1) || mv_differs(p1.1, q0.1)
                }
            } else {
                (mv_differs(p0.1, q0.1) || mv_differs(p1.1, q1.1))
                    && (mv_differs(p0.1, q1.1) || mv_differs(p1.1, q0.1))
            }
        }
        _ => true,
    };
    u8::from(differs)
}

/// 一条边界的阈值
#[derive(Debug, Clone, Copy)]
struct Thresholds {
    alpha: i32,
    beta: i32,
    index_a: usize,
}

impl Thresholds {
    fn new(qp_p: u8, qp_q: u8, params: &DeblockParams) -> Self {
        let qp_av = (i32::from(qp_p) + i32::from(qp_q) + 1) >> 1;
        let index_a = (qp_av + params.offset_a).clamp(0, 51) as usize;
        let index_b = (qp_av + params.offset_b).clamp(0, 51) as usize;
        Self {
            alpha: i32::from(ALPHA_TABLE[index_a]),
            beta: i32::from(BETA_TABLE[index_b]),
            index_a,
        }
    }
}

#[inline]
fn clip1(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// 滤波边界上的一组样本 (8.7.2.3, 8.7.2.4)
///
/// `q0` 为 q0 样本的下标, `step` 为跨越边界方向上相邻样本的距离.
fn filter_samples(plane: &mut [u8], q0: usize, step: usize, bs: u8, t: Thresholds, chroma: bool) {
    let at = |i: isize| (q0 as isize + i * step as isize) as usize;
    let px = |plane: &[u8], i: isize| i32::from(plane[at(i)]);
    let (p0, p1, q0v, q1) = (px(plane, -1), px(plane, -2), px(plane, 0), px(plane, 1));
    if (p0 - q0v).abs() >= t.alpha || (p1 - p0).abs() >= t.beta || (q1 - q0v).abs() >= t.beta {
        return;
    }

    if bs < 4 {
        let tc0 = i32::from(TC0_TABLE[t.index_a][usize::from(bs) - 1]);
        if chroma {
            let tc = tc0 + 1;
            let delta = ((((q0v - p0) << 2) + (p1 - q1) + 4) >> 3).clamp(-tc, tc);
            plane[at(-1)] = clip1(p0 + delta);
            plane[at(0)] = clip1(q0v - delta);
            return;
        }
        let (p2, q2) = (px(plane, -3), px(plane, 2));
        let ap = (p2 - p0).abs() < t.beta;
        let aq = (q2 - q0v).abs() < t.beta;
        let tc = tc0 + i32::from(ap) + i32::from(aq);
        let delta = ((((q0v - p0) << 2) + (p1 - q1) + 4) >> 3).clamp(-tc, tc);
        plane[at(-1)] = clip1(p0 + delta);
        plane[at(0)] = clip1(q0v - delta);
        if ap {
            plane[at(-2)] = (p1 + ((p2 + ((p0 + q0v + 1) >> 1) - (p1 << 1)) >> 1).clamp(-tc0, tc0)) as u8;
        }
        if aq {
            plane[at(1)] = (q1 + ((q2 + ((p0 + q0v + 1) >> 1) - (q1 << 1)) >> 1).clamp(-tc0, tc0)) as u8;
        }
        return;
    }

    if chroma {
        plane[at(-1)] = ((2 * p1 + p0 + q1 + 2) >> 2) as u8;
        plane[at(0)] = ((2 * q1 + q0v + p1 + 2) >> 2) as u8;
        return;
    }
    let (p2, q2) = (px(plane, -3), px(plane, 2));
    let strong = (p0 - q0v).abs() < (t.alpha >> 2) + 2;
    if strong && (p2 - p0).abs() < t.beta {
        let p3 = px(plane, -4);
        plane[at(-1)] = ((p2 + 2 * p1 + 2 * p0 + 2 * q0v + q1 + 4) >> 3) as u8;
        plane[at(-2)] = ((p2 + p1 + p0 + q0v + 2) >> 2) as u8;
        plane[at(-3)] = ((2 * p3 + 3 * p2 + p1 + p0 + q0v + 4) >> 3) as u8;
    } else {
        plane[at(-1)] = ((2 * p1 + p0 + q1 + 2) >> 2) as u8;
    }
    if strong && (q2 - q0v).abs() < t.beta {
        let q3 = px(plane, 3);
        plane[at(0)] = ((p1 + 2 * p0 + 2 * q0v + 2 * q1 + q2 + 4) >> 3) as u8;
        plane[at(1)] = ((p0 + q0v + q1 + q2 + 2) >> 2) as u8;
        plane[at(2)] = ((2 * q3 + 3 * q2 + q1 + q0v + p0 + 4) >> 3) as u8;
    } else {
        plane[at(0)] = ((2 * q1 + q0v + p1 + 2) >> 2) as u8;
    }
}

/// 对整幅图像执行去块滤波
pub(crate) fn deblock_picture(pic: &mut PictureData) {
    for addr in 0..pic.mbs.len() {
        deblock_mb(pic, addr);
    }
}

fn deblock_mb(pic: &mut PictureData, addr: usize) {
    let params = pic.deblock_params(addr);
    if params.disable_idc == 1 {
        return;
    }
    let w = pic.width_mbs;
    let (mb_x, mb_y) = (addr % w, addr / w);
    let q = pic.mbs[addr];
    let same_slice = |a: usize| params.disable_idc != 2 || pic.mbs[a].slice_num == q.slice_num;
    let left = (mb_x > 0).then(|| addr - 1).filter(|&a| same_slice(a));
    let top = (mb_y > 0).then(|| addr - w).filter(|&a| same_slice(a));
    let t8 = q.flags.contains(MbFlags::TRANSFORM_8X8);
    let strides = [pic.stride(0), pic.stride(1)];

    for dir in [EdgeDir::Vertical, EdgeDir::Horizontal] {
        let outer = match dir {
            EdgeDir::Vertical => left,
            EdgeDir::Horizontal => top,
        };
        for edge in 0..4 {
            if (edge == 0 && outer.is_none()) || (t8 && edge & 1 == 1) {
                continue;
            }
            let p_mb = match outer {
                Some(n) if edge == 0 => pic.mbs[n],
                _ => q,
            };
            let mut bs = [0u8; 4];
            for (i, v) in bs.iter_mut().enumerate() {
                let (q_r, p_r) = match (dir, edge) {
                    (EdgeDir::Vertical, 0) => (i * 4, i * 4 + 3),
                    (EdgeDir::Vertical, _) => (i * 4 + edge, i * 4 + edge - 1),
                    (EdgeDir::Horizontal, 0) => (i, 12 + i),
                    (EdgeDir::Horizontal, _) => (edge * 4 + i, edge * 4 + i - 4),
                };
                *v = boundary_strength(&p_mb, p_r, &q, q_r, edge == 0);
            }
            if bs == [0; 4] {
                continue;
            }

            // 亮度
            let t = Thresholds::new(p_mb.qp[0], q.qp[0], &params);
            let (x0, y0) = (mb_x * 16, mb_y * 16);
            for k in 0..16 {
                let b = bs[k / 4];
                if b == 0 {
                    continue;
                }
                let (x, y, step) = match dir {
                    EdgeDir::Vertical => (x0 + edge * 4, y0 + k, 1),
                    EdgeDir::Horizontal => (x0 + k, y0 + edge * 4, strides[0]),
                };
                filter_samples(&mut pic.planes[0], y * strides[0] + x, step, b, t, false);
            }

            // 色度边界对应亮度边界 0 与 2
            if edge & 1 == 1 {
                continue;
            }
            let (cx0, cy0) = (mb_x * 8, mb_y * 8);
            for c in 0..2 {
                let t = Thresholds::new(p_mb.qp[1 + c], q.qp[1 + c], &params);
                for k in 0..8 {
                    let b = bs[k / 2];
                    if b == 0 {
                        continue;
                    }
                    let (x, y, step) = match dir {
                        EdgeDir::Vertical => (cx0 + edge * 2, cy0 + k, 1),
                        EdgeDir::Horizontal => (cx0 + k, cy0 + edge * 2, strides[1]),
                    };
                    filter_samples(&mut pic.planes[1 + c], y * strides[1] + x, step, b, t, true);
                }
            }
        }
    }
}
