//! H.264 帧内预测 (8.3).
//!
//! 预测直接写入图像平面, 邻居样本从同一平面读取 (去块在整帧完成后进行,
//! 因此读到的总是未滤波的重建样本).
//!
//! - Intra_4x4 / Intra_8x8: 9 种方向模式, 8x8 先对参考样本做低通滤波
//! - Intra_16x16: 垂直, 水平, DC, 平面
//! - 色度 8x8: DC (按 4x4 象限), 水平, 垂直, 平面

/// 参考样本可用性
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct IntraAvail {
    pub(crate) left: bool,
    pub(crate) top: bool,
    pub(crate) top_right: bool,
    pub(crate) top_left: bool,
}

/// Intra_4x4 / Intra_8x8 预测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IntraNxNMode {
    Vertical,
    Horizontal,
    Dc,
    DiagonalDownLeft,
    DiagonalDownRight,
    VerticalRight,
    HorizontalDown,
    VerticalLeft,
    HorizontalUp,
}

impl IntraNxNMode {
    pub(crate) fn from_u8(mode: u8) -> Self {
        match mode {
            0 => Self::Vertical,
            1 => Self::Horizontal,
            3 => Self::DiagonalDownLeft,
            4 => Self::DiagonalDownRight,
            5 => Self::VerticalRight,
            6 => Self::HorizontalDown,
            7 => Self::VerticalLeft,
            8 => Self::HorizontalUp,
            _ => Self::Dc,
        }
    }
}

/// Intra_16x16 预测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intra16x16Mode {
    Vertical,
    Horizontal,
    Dc,
    Plane,
}

impl Intra16x16Mode {
    pub(crate) fn from_u8(mode: u8) -> Self {
        match mode {
            0 => Self::Vertical,
            1 => Self::Horizontal,
            3 => Self::Plane,
            _ => Self::Dc,
        }
    }
}

/// 色度预测模式 (intra_chroma_pred_mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChromaMode {
    Dc,
    Horizontal,
    Vertical,
    Plane,
}

impl ChromaMode {
    pub(crate) fn from_u8(mode: u8) -> Self {
        match mode {
            1 => Self::Horizontal,
            2 => Self::Vertical,
            3 => Self::Plane,
            _ => Self::Dc,
        }
    }
}

// ============================================================
// 参考样本
// ============================================================

/// 块的参考样本, 不可用的位置填 128
struct Edges {
    top: [i32; 16],
    left: [i32; 16],
    top_left: i32,
}

impl Edges {
    /// 读取 `size` 大小块的参考样本, `top_len` 为上方需要的样本数
    fn load(
        plane: &[u8],
        stride: usize,
        x0: usize,
        y0: usize,
        size: usize,
        top_len: usize,
        avail: IntraAvail,
    ) -> Self {
        let mut e = Self {
            top: [128; 16],
            left: [128; 16],
            top_left: 128,
        };
        if avail.top {
            let row = (y0 - 1) * stride + x0;
            for x in 0..size {
                e.top[x] = i32::from(plane[row + x]);
            }
            for x in size..top_len {
                e.top[x] = if avail.top_right {
                    i32::from(plane[row + x])
                } else {
                    e.top[size - 1]
                };
            }
        }
        if avail.left {
            for y in 0..size {
                e.left[y] = i32::from(plane[(y0 + y) * stride + x0 - 1]);
            }
        }
        if avail.top_left {
            e.top_left = i32::from(plane[(y0 - 1) * stride + x0 - 1]);
        }
        e
    }

    /// p[k, -1], k = -1 时为左上角
    #[inline]
    fn t(&self, k: i32) -> i32 {
        if k < 0 {
            self.top_left
        } else {
            self.top[k as usize]
        }
    }

    /// p[-1, k], k = -1 时为左上角
    #[inline]
    fn l(&self, k: i32) -> i32 {
        if k < 0 {
            self.top_left
        } else {
            self.left[k as usize]
        }
    }

    /// Intra_8x8 参考样本滤波 (8.3.2.2.1)
    fn filter_8x8(&self, avail: IntraAvail) -> Self {
        let mut f = Self {
            top: self.top,
            left: self.left,
            top_left: self.top_left,
        };
        let (t, l, lt) = (&self.top, &self.left, self.top_left);
        if avail.top {
            f.top[0] = if avail.top_left {
                (lt + 2 * t[0] + t[1] + 2) >> 2
            } else {
                (3 * t[0] + t[1] + 2) >> 2
            };
            for x in 1..15 {
                f.top[x] = (t[x - 1] + 2 * t[x] + t[x + 1] + 2) >> 2;
            }
            f.top[15] = (t[14] + 3 * t[15] + 2) >> 2;
        }
        if avail.top_left {
            f.top_left = match (avail.top, avail.left) {
                (true, true) => (t[0] + 2 * lt + l[0] + 2) >> 2,
                (true, false) => (3 * lt + t[0] + 2) >> 2,
                (false, true) => (3 * lt + l[0] + 2) >> 2,
                (false, false) => lt,
            };
        }
        if avail.left {
            f.left[0] = if avail.top_left {
                (lt + 2 * l[0] + l[1] + 2) >> 2
            } else {
                (3 * l[0] + l[1] + 2) >> 2
            };
            for y in 1..7 {
                f.left[y] = (l[y - 1] + 2 * l[y] + l[y + 1] + 2) >> 2;
            }
            f.left[7] = (l[6] + 3 * l[7] + 2) >> 2;
        }
        f
    }
}

#[inline]
fn clip(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn avg2(a: i32, b: i32) -> i32 {
    (a + b + 1) >> 1
}

#[inline]
fn avg3(a: i32, b: i32, c: i32) -> i32 {
    (a + 2 * b + c + 2) >> 2
}

fn fill(plane: &mut [u8], stride: usize, x0: usize, y0: usize, w: usize, h: usize, v: u8) {
    for y in 0..h {
        let row = (y0 + y) * stride + x0;
        plane[row..row + w].fill(v);
    }
}

/// DC 值: 上下均可用时取两者平均, 否则取可用的一侧, 都不可用为 128
fn dc_value(e: &Edges, n: usize, avail: IntraAvail) -> u8 {
    let sum_t: i32 = e.top[..n].iter().sum();
    let sum_l: i32 = e.left[..n].iter().sum();
    let shift = n.trailing_zeros() as i32;
    let v = match (avail.top, avail.left) {
        (true, true) => (sum_t + sum_l + n as i32) >> (shift + 1),
        (true, false) => (sum_t + (n as i32 >> 1)) >> shift,
        (false, true) => (sum_l + (n as i32 >> 1)) >> shift,
        (false, false) => 128,
    };
    v as u8
}

// ============================================================
// Intra_4x4 / Intra_8x8
// ============================================================

/// N x N 方向预测 (N = 4 或 8), 公式对两种尺寸通用
fn predict_directional(
    plane: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    n: usize,
    mode: IntraNxNMode,
    e: &Edges,
    avail: IntraAvail,
) {
    let ni = n as i32;
    let value = |x: i32, y: i32| -> i32 {
        match mode {
            IntraNxNMode::Vertical => e.t(x),
            IntraNxNMode::Horizontal => e.l(y),
            IntraNxNMode::Dc => 0,
            IntraNxNMode::DiagonalDownLeft => {
                if x == ni - 1 && y == ni - 1 {
                    (e.t(2 * ni - 2) + 3 * e.t(2 * ni - 1) + 2) >> 2
                } else {
                    avg3(e.t(x + y), e.t(x + y + 1), e.t(x + y + 2))
                }
            }
            IntraNxNMode::DiagonalDownRight => {
                if x > y {
                    avg3(e.t(x - y - 2), e.t(x - y - 1), e.t(x - y))
                } else if x < y {
                    avg3(e.l(y - x - 2), e.l(y - x - 1), e.l(y - x))
                } else {
                    avg3(e.t(0), e.top_left, e.l(0))
                }
            }
            IntraNxNMode::VerticalRight => {
                let z = 2 * x - y;
                let k = x - (y >> 1);
                if z >= 0 && z & 1 == 0 {
                    avg2(e.t(k - 1), e.t(k))
                } else if z >= 0 {
                    avg3(e.t(k - 2), e.t(k - 1), e.t(k))
                } else if z == -1 {
                    avg3(e.l(0), e.top_left, e.t(0))
                } else {
                    avg3(e.l(y - 2 * x - 1), e.l(y - 2 * x - 2), e.l(y - 2 * x - 3))
                }
            }
            IntraNxNMode::HorizontalDown => {
                let z = 2 * y - x;
                let k = y - (x >> 1);
                if z >= 0 && z & 1 == 0 {
                    avg2(e.l(k - 1), e.l(k))
                } else if z >= 0 {
                    avg3(e.l(k - 2), e.l(k - 1), e.l(k))
                } else if z == -1 {
                    avg3(e.l(0), e.top_left, e.t(0))
                } else {
                    avg3(e.t(x - 2 * y - 1), e.t(x - 2 * y - 2), e.t(x - 2 * y - 3))
                }
            }
            IntraNxNMode::VerticalLeft => {
                let k = x + (y >> 1);
                if y & 1 == 0 {
                    avg2(e.t(k), e.t(k + 1))
                } else {
                    avg3(e.t(k), e.t(k + 1), e.t(k + 2))
                }
            }
            IntraNxNMode::HorizontalUp => {
                let z = x + 2 * y;
                let k = y + (x >> 1);
                if z < 2 * ni - 3 && z & 1 == 0 {
                    avg2(e.l(k), e.l(k + 1))
                } else if z < 2 * ni - 3 {
                    avg3(e.l(k), e.l(k + 1), e.l(k + 2))
                } else if z == 2 * ni - 3 {
                    (e.l(ni - 2) + 3 * e.l(ni - 1) + 2) >> 2
                } else {
                    e.l(ni - 1)
                }
            }
        }
    };
    if mode == IntraNxNMode::Dc {
        fill(plane, stride, x0, y0, n, n, dc_value(e, n, avail));
        return;
    }
    for y in 0..n {
        let row = (y0 + y) * stride + x0;
        for x in 0..n {
            plane[row + x] = clip(value(x as i32, y as i32));
        }
    }
}

/// Intra_4x4 预测 (8.3.1.2)
pub(crate) fn predict_4x4(
    plane: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    mode: IntraNxNMode,
    avail: IntraAvail,
) {
    let e = Edges::load(plane, stride, x0, y0, 4, 8, avail);
    predict_directional(plane, stride, x0, y0, 4, mode, &e, avail);
}

/// Intra_8x8 预测 (8.3.2.2), 含参考样本滤波
pub(crate) fn predict_8x8(
    plane: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    mode: IntraNxNMode,
    avail: IntraAvail,
) {
    let e = Edges::load(plane, stride, x0, y0, 8, 16, avail).filter_8x8(avail);
    predict_directional(plane, stride, x0, y0, 8, mode, &e, avail);
}

// ============================================================
// Intra_16x16
// ============================================================

/// Intra_16x16 预测 (8.3.3)
pub(crate) fn predict_16x16(
    plane: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    mode: Intra16x16Mode,
    avail: IntraAvail,
) {
    let e = Edges::load(plane, stride, x0, y0, 16, 16, avail);
    match mode {
        Intra16x16Mode::Vertical => {
            for y in 0..16 {
                for x in 0..16 {
                    plane[(y0 + y) * stride + x0 + x] = e.top[x] as u8;
                }
            }
        }
        Intra16x16Mode::Horizontal => {
            for y in 0..16 {
                fill(plane, stride, x0, y0 + y, 16, 1, e.left[y] as u8);
            }
        }
        Intra16x16Mode::Dc => fill(plane, stride, x0, y0, 16, 16, dc_value(&e, 16, avail)),
        Intra16x16Mode::Plane => {
            let (mut h, mut v) = (0, 0);
            for k in 0..8i32 {
                h += (k + 1) * (e.t(8 + k) - e.t(6 - k));
                v += (k + 1) * (e.l(8 + k) - e.l(6 - k));
            }
            let a = 16 * (e.left[15] + e.top[15]);
            let b = (5 * h + 32) >> 6;
            let c = (5 * v + 32) >> 6;
            plane_fill(plane, stride, x0, y0, 16, a, b, c);
        }
    }
}

fn plane_fill(
    plane: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    n: usize,
    a: i32,
    b: i32,
    c: i32,
) {
    let mid = (n / 2 - 1) as i32;
    for y in 0..n {
        for x in 0..n {
            let v = (a + b * (x as i32 - mid) + c * (y as i32 - mid) + 16) >> 5;
            plane[(y0 + y) * stride + x0 + x] = clip(v);
        }
    }
}

// ============================================================
// 色度
// ============================================================

/// 4:2:0 色度 8x8 预测 (8.3.4)
pub(crate) fn predict_chroma(
    plane: &mut [u8],
    stride: usize,
    x0: usize,
    y0: usize,
    mode: ChromaMode,
    avail: IntraAvail,
) {
    let e = Edges::load(plane, stride, x0, y0, 8, 8, avail);
    match mode {
        ChromaMode::Dc => {
            for blk in 0..4 {
                let (bx, by) = ((blk & 1) * 4, (blk >> 1) * 4);
                let sum_t: i32 = e.top[bx..bx + 4].iter().sum();
                let sum_l: i32 = e.left[by..by + 4].iter().sum();
                // 右上象限优先用上方, 左下象限优先用左侧
                let v = match (blk, avail.top, avail.left) {
                    (0 | 3, true, true) => (sum_t + sum_l + 4) >> 3,
                    (1, true, _) | (0 | 3, true, false) | (2, true, false) => (sum_t + 2) >> 2,
                    (_, _, true) => (sum_l + 2) >> 2,
                    _ => 128,
                };
                fill(plane, stride, x0 + bx, y0 + by, 4, 4, v as u8);
            }
        }
        ChromaMode::Horizontal => {
            for y in 0..8 {
                fill(plane, stride, x0, y0 + y, 8, 1, e.left[y] as u8);
            }
        }
        ChromaMode::Vertical => {
            for y in 0..8 {
                for x in 0..8 {
                    plane[(y0 + y) * stride + x0 + x] = e.top[x] as u8;
                }
            }
        }
        ChromaMode::Plane => {
            let (mut h, mut v) = (0, 0);
            for k in 0..4i32 {
                h += (k + 1) * (e.t(4 + k) - e.t(2 - k));
                v += (k + 1) * (e.l(4 + k) - e.l(2 - k));
            }
            let a = 16 * (e.left[7] + e.top[7]);
            let b = (34 * h + 32) >> 6;
            let c = (34 * v + 32) >> 6;
            plane_fill(plane, stride, x0, y0, 8, a, b, c);
        }
    }
}

/// 用 DC 值填充整个宏块 (亮度 16x16 与两个色度 8x8), 错误隐藏使用
pub(crate) fn conceal_dc(
    planes: [&mut [u8]; 3],
    strides: [usize; 2],
    mb_x: usize,
    mb_y: usize,
    avail: IntraAvail,
) {
    let [y, cb, cr] = planes;
    predict_16x16(y, strides[0], mb_x * 16, mb_y * 16, Intra16x16Mode::Dc, avail);
    predict_chroma(cb, strides[1], mb_x * 8, mb_y * 8, ChromaMode::Dc, avail);
    predict_chroma(cr, strides[1], mb_x * 8, mb_y * 8, ChromaMode::Dc, avail);
}
