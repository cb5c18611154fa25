//! H.264 帧间预测: 分数像素插值 (8.4.2.2) 与加权预测 (8.4.2.3).
//!
//! 参考图像没有填充边框, 越界坐标在取样时钳制到图像内 (等价于边界复制).

/// 参考图像的三个平面
#[derive(Clone, Copy)]
pub(crate) struct RefPlanes<'a> {
    pub(crate) planes: [&'a [u8]; 3],
    /// 亮度宽高 (像素)
    pub(crate) width: usize,
    pub(crate) height: usize,
}

/// 宏块级预测缓冲: 亮度 16x16, 色度各 8x8 (步长 8)
#[derive(Clone)]
pub(crate) struct PredBuf {
    pub(crate) luma: [u8; 256],
    pub(crate) chroma: [[u8; 64]; 2],
}

impl Default for PredBuf {
    fn default() -> Self {
        Self {
            luma: [0; 256],
            chroma: [[0; 64]; 2],
        }
    }
}

/// 分区的加权参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Weights {
    /// 单向直接复制, 双向取平均
    Default,
    /// 显式或隐式加权, 下标 [列表][平面]
    Weighted {
        log_wd: [i32; 3],
        w: [[i32; 3]; 2],
        o: [[i32; 3]; 2],
    },
}

// ============================================================
// 亮度插值
// ============================================================

/// 以块左上角为原点, 覆盖 [-2, w+3) x [-2, h+3) 的整像素窗口
struct Window {
    buf: [i32; 21 * 21],
}

impl Window {
    const STRIDE: usize = 21;

    fn load(plane: &[u8], width: usize, height: usize, x0: i32, y0: i32, w: usize, h: usize) -> Self {
        let mut buf = [0; 21 * 21];
        let max_x = width as i32 - 1;
        let max_y = height as i32 - 1;
        for wy in 0..h + 5 {
            let sy = (y0 + wy as i32 - 2).clamp(0, max_y) as usize;
            let row = &plane[sy * width..sy * width + width];
            for wx in 0..w + 5 {
                let sx = (x0 + wx as i32 - 2).clamp(0, max_x) as usize;
                buf[wy * Self::STRIDE + wx] = i32::from(row[sx]);
            }
        }
        Self { buf }
    }

    /// 整像素 G(x, y), x / y 可为 -2..w+3
    #[inline]
    fn g(&self, x: i32, y: i32) -> i32 {
        self.buf[(y + 2) as usize * Self::STRIDE + (x + 2) as usize]
    }

    /// 水平 6 抽头中间值 b1 (位于 x 与 x+1 之间)
    #[inline]
    fn b1(&self, x: i32, y: i32) -> i32 {
        tap(
            self.g(x - 2, y),
            self.g(x - 1, y),
            self.g(x, y),
            self.g(x + 1, y),
            self.g(x + 2, y),
            self.g(x + 3, y),
        )
    }

    /// 垂直 6 抽头中间值 h1
    #[inline]
    fn h1(&self, x: i32, y: i32) -> i32 {
        tap(
            self.g(x, y - 2),
            self.g(x, y - 1),
            self.g(x, y),
            self.g(x, y + 1),
            self.g(x, y + 2),
            self.g(x, y + 3),
        )
    }

    #[inline]
    fn b(&self, x: i32, y: i32) -> i32 {
        clip1((self.b1(x, y) + 16) >> 5)
    }

    #[inline]
    fn h(&self, x: i32, y: i32) -> i32 {
        clip1((self.h1(x, y) + 16) >> 5)
    }

    /// 中心半像素 j
    #[inline]
    fn j(&self, x: i32, y: i32) -> i32 {
        let j1 = tap(
            self.b1(x, y - 2),
            self.b1(x, y - 1),
            self.b1(x, y),
            self.b1(x, y + 1),
            self.b1(x, y + 2),
            self.b1(x, y + 3),
        );
        clip1((j1 + 512) >> 10)
    }

    /// 按分数相位取样 (表 8-12)
    fn sample(&self, x: i32, y: i32, fx: i32, fy: i32) -> u8 {
        let avg = |a: i32, b: i32| (a + b + 1) >> 1;
        let v = match (fx, fy) {
            (0, 0) => self.g(x, y),
            (0, 1) => avg(self.g(x, y), self.h(x, y)),
            (0, 2) => self.h(x, y),
            (0, 3) => avg(self.g(x, y + 1), self.h(x, y)),
            (1, 0) => avg(self.g(x, y), self.b(x, y)),
            (2, 0) => self.b(x, y),
            (3, 0) => avg(self.g(x + 1, y), self.b(x, y)),
            (1, 1) => avg(self.b(x, y), self.h(x, y)),
            (3, 1) => avg(self.b(x, y), self.h(x + 1, y)),
            (1, 3) => avg(self.h(x, y), self.b(x, y + 1)),
            (3, 3) => avg(self.h(x + 1, y), self.b(x, y + 1)),
            (2, 1) => avg(self.b(x, y), self.j(x, y)),
            (2, 2) => self.j(x, y),
            (2, 3) => avg(self.j(x, y), self.b(x, y + 1)),
            (1, 2) => avg(self.h(x, y), self.j(x, y)),
            _ => avg(self.j(x, y), self.h(x + 1, y)),
        };
        v as u8
    }
}

#[inline]
fn tap(e: i32, f: i32, g: i32, h: i32, i: i32, j: i32) -> i32 {
    e - 5 * f + 20 * g + 20 * h - 5 * i + j
}

#[inline]
fn clip1(v: i32) -> i32 {
    v.clamp(0, 255)
}

/// 亮度运动补偿
///
/// (`x`, `y`) 为块在图像中的整像素位置, `mv` 为 1/4 像素运动矢量,
/// 结果写入 `dst` (步长 `dst_stride`).
#[allow(clippy::too_many_arguments)]
pub(crate) fn mc_luma(
    dst: &mut [u8],
    dst_stride: usize,
    r: &RefPlanes,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    mv: [i32; 2],
) {
    let x0 = x as i32 + (mv[0] >> 2);
    let y0 = y as i32 + (mv[1] >> 2);
    let (fx, fy) = (mv[0] & 3, mv[1] & 3);
    let win = Window::load(r.planes[0], r.width, r.height, x0, y0, w, h);
    for by in 0..h {
        for bx in 0..w {
            dst[by * dst_stride + bx] = win.sample(bx as i32, by as i32, fx, fy);
        }
    }
}

/// 色度运动补偿 (4:2:0, 1/8 像素双线性)
///
/// (`x`, `y`) 与 `w`/`h` 均为色度坐标, `mv` 为亮度运动矢量.
#[allow(clippy::too_many_arguments)]
pub(crate) fn mc_chroma(
    dst: [&mut [u8]; 2],
    dst_stride: usize,
    r: &RefPlanes,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    mv: [i32; 2],
) {
    let cw = r.width / 2;
    let ch = r.height / 2;
    let x0 = x as i32 + (mv[0] >> 3);
    let y0 = y as i32 + (mv[1] >> 3);
    let (fx, fy) = (mv[0] & 7, mv[1] & 7);
    let max_x = cw as i32 - 1;
    let max_y = ch as i32 - 1;
    for (c, out) in dst.into_iter().enumerate() {
        let plane = r.planes[c + 1];
        let px = |sx: i32, sy: i32| -> i32 {
            let sx = sx.clamp(0, max_x) as usize;
            let sy = sy.clamp(0, max_y) as usize;
            i32::from(plane[sy * cw + sx])
        };
        for by in 0..h as i32 {
            for bx in 0..w as i32 {
                let (sx, sy) = (x0 + bx, y0 + by);
                let v = ((8 - fx) * (8 - fy) * px(sx, sy)
                    + fx * (8 - fy) * px(sx + 1, sy)
                    + (8 - fx) * fy * px(sx, sy + 1)
                    + fx * fy * px(sx + 1, sy + 1)
                    + 32)
                    >> 6;
                out[by as usize * dst_stride + bx as usize] = v as u8;
            }
        }
    }
}

// ============================================================
// 加权预测
// ============================================================

/// 合成一个平面上的预测块并写入目标
///
/// `preds` 中为 None 的列表不参与; `plane` 为 0 (亮度) 或 1/2 (色度).
#[allow(clippy::too_many_arguments)]
pub(crate) fn write_prediction(
    dst: &mut [u8],
    dst_stride: usize,
    preds: [Option<&[u8]>; 2],
    src_stride: usize,
    w: usize,
    h: usize,
    weights: &Weights,
    plane: usize,
) {
    for y in 0..h {
        for x in 0..w {
            let i = y * src_stride + x;
            let p0 = preds[0].map(|p| i32::from(p[i]));
            let p1 = preds[1].map(|p| i32::from(p[i]));
            let v = match (weights, p0, p1) {
                (Weights::Default, Some(a), Some(b)) => (a + b + 1) >> 1,
                (Weights::Default, Some(a), None) | (Weights::Default, None, Some(a)) => a,
                (Weights::Weighted { log_wd, w, o }, Some(a), Some(b)) => {
                    let lw = log_wd[plane];
                    ((a * w[0][plane] + b * w[1][plane] + (1 << lw)) >> (lw + 1))
                        + ((o[0][plane] + o[1][plane] + 1) >> 1)
                }
                (Weights::Weighted { log_wd, w, o }, Some(a), None) => {
                    weight_one(a, log_wd[plane], w[0][plane], o[0][plane])
                }
                (Weights::Weighted { log_wd, w, o }, None, Some(b)) => {
                    weight_one(b, log_wd[plane], w[1][plane], o[1][plane])
                }
                (_, None, None) => 128,
            };
            dst[y * dst_stride + x] = clip1(v) as u8;
        }
    }
}

#[inline]
fn weight_one(p: i32, log_wd: i32, w: i32, o: i32) -> i32 {
    if log_wd >= 1 {
        ((p * w + (1 << (log_wd - 1))) >> log_wd) + o
    } else {
        p * w + o
    }
}

/// 隐式加权的 (w0, w1) (8.4.2.3.1), `dist_scale` 为 None 表示使用默认 32/32
pub(crate) fn implicit_weights(dist_scale: Option<i32>) -> (i32, i32) {
    match dist_scale {
        Some(dsf) if (-64..=128).contains(&(dsf >> 2)) => (64 - (dsf >> 2), dsf >> 2),
        _ => (32, 32),
    }
}
