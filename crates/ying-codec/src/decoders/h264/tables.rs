//! H.264 解码用的静态表: 宏块类型, 块索引映射, 量化与去块参数.

// ============================================================
// 块索引
// ============================================================

/// luma4x4BlkIdx 与 4x4 光栅索引 (y * 4 + x) 的互相映射 (该映射是自逆的)
pub(crate) const BLK_TO_RASTER: [usize; 16] = [0, 1, 4, 5, 2, 3, 6, 7, 8, 9, 12, 13, 10, 11, 14, 15];

/// 8x8 块号 → 左上角 4x4 光栅索引
pub(crate) const BLK8_TO_RASTER: [usize; 4] = [0, 2, 8, 10];

/// 光栅索引所在的 8x8 块号
#[inline]
pub(crate) fn raster_to_blk8(raster: usize) -> usize {
    ((raster >> 3) << 1) | ((raster & 3) >> 1)
}

/// 4x4 帧扫描 (zig-zag) 位置 → 光栅索引
pub(crate) const ZIGZAG_4X4: [usize; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// 8x8 帧扫描位置 → 光栅索引
#[rustfmt::skip]
pub(crate) const ZIGZAG_8X8: [usize; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10, 17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34, 27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

// ============================================================
// 宏块类型
// ============================================================

/// 帧间分区的预测方向位: 1 = L0, 2 = L1, 3 = 双向
pub(crate) type PredDir = u8;

/// 帧间宏块分区形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Partition {
    P16x16,
    P16x8,
    P8x16,
    P8x8,
}

impl Partition {
    /// 分区数目
    pub(crate) fn count(self) -> usize {
        match self {
            Self::P16x16 => 1,
            Self::P16x8 | Self::P8x16 => 2,
            Self::P8x8 => 4,
        }
    }

    /// 第 `idx` 个分区的 (x, y, w, h), 以 4x4 块为单位
    pub(crate) fn rect(self, idx: usize) -> (usize, usize, usize, usize) {
        match self {
            Self::P16x16 => (0, 0, 4, 4),
            Self::P16x8 => (0, idx * 2, 4, 2),
            Self::P8x16 => (idx * 2, 0, 2, 4),
            Self::P8x8 => ((idx & 1) * 2, (idx >> 1) * 2, 2, 2),
        }
    }
}

/// 解析后的宏块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MbType {
    /// I_NxN, 由 transform_size_8x8_flag 区分 4x4 / 8x8
    INxN,
    /// I_16x16_<pred>_<chroma>_<luma>
    I16x16 { pred: u8, cbp_chroma: u8, cbp_luma: u8 },
    IPcm,
    PSkip,
    BSkip,
    BDirect16x16,
    /// 16x16 / 16x8 / 8x16 帧间分区
    Inter { part: Partition, dirs: [PredDir; 2] },
    /// P_8x8 与 P_8x8ref0
    P8x8 { ref0: bool },
    B8x8,
}

impl MbType {
    pub(crate) fn is_intra(self) -> bool {
        matches!(self, Self::INxN | Self::I16x16 { .. } | Self::IPcm)
    }
}

/// I 切片 mb_type (表 7-11)
pub(crate) fn i_mb_type(mb_type: u32) -> Option<MbType> {
    match mb_type {
        0 => Some(MbType::INxN),
        1..=24 => {
            let t = (mb_type - 1) as u8;
            Some(MbType::I16x16 {
                pred: t & 3,
                cbp_chroma: (t >> 2) % 3,
                cbp_luma: if t >= 12 { 15 } else { 0 },
            })
        }
        25 => Some(MbType::IPcm),
        _ => None,
    }
}

/// P 切片 mb_type (表 7-13), 5 及以上为帧内类型
pub(crate) fn p_mb_type(mb_type: u32) -> Option<MbType> {
    match mb_type {
        0 => Some(MbType::Inter {
            part: Partition::P16x16,
            dirs: [1, 0],
        }),
        1 => Some(MbType::Inter {
            part: Partition::P16x8,
            dirs: [1, 1],
        }),
        2 => Some(MbType::Inter {
            part: Partition::P8x16,
            dirs: [1, 1],
        }),
        3 => Some(MbType::P8x8 { ref0: false }),
        4 => Some(MbType::P8x8 { ref0: true }),
        _ => i_mb_type(mb_type - 5),
    }
}

/// B 切片 16x8 / 8x16 两个分区的预测方向 (mb_type 4..=21)
#[rustfmt::skip]
const B_PART_DIRS: [[PredDir; 2]; 9] = [
    [1, 1], [2, 2], [1, 2], [2, 1], [1, 3], [2, 3], [3, 1], [3, 2], [3, 3],
];

/// B 切片 mb_type (表 7-14), 23 及以上为帧内类型
pub(crate) fn b_mb_type(mb_type: u32) -> Option<MbType> {
    match mb_type {
        0 => Some(MbType::BDirect16x16),
        1..=3 => Some(MbType::Inter {
            part: Partition::P16x16,
            dirs: [mb_type as u8, 0],
        }),
        4..=21 => {
            let t = (mb_type - 4) as usize;
            let part = if t & 1 == 0 {
                Partition::P16x8
            } else {
                Partition::P8x16
            };
            Some(MbType::Inter {
                part,
                dirs: B_PART_DIRS[t >> 1],
            })
        }
        22 => Some(MbType::B8x8),
        _ => i_mb_type(mb_type - 23),
    }
}

/// 子宏块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SubMbType {
    /// 0 表示 B_Direct_8x8
    pub dir: PredDir,
    /// 子分区宽度 (4x4 块为单位, 1 或 2)
    pub w: usize,
    /// 子分区高度
    pub h: usize,
}

impl SubMbType {
    pub(crate) fn count(self) -> usize {
        if self.dir == 0 {
            4
        } else {
            (2 / self.w) * (2 / self.h)
        }
    }

    pub(crate) fn is_direct(self) -> bool {
        self.dir == 0
    }
}

const fn sub(dir: PredDir, w: usize, h: usize) -> SubMbType {
    SubMbType { dir, w, h }
}

/// P 子宏块类型 (表 7-17)
pub(crate) fn p_sub_mb_type(t: u32) -> Option<SubMbType> {
    const TYPES: [SubMbType; 4] = [sub(1, 2, 2), sub(1, 2, 1), sub(1, 1, 2), sub(1, 1, 1)];
    TYPES.get(t as usize).copied()
}

/// B 子宏块类型 (表 7-18)
pub(crate) fn b_sub_mb_type(t: u32) -> Option<SubMbType> {
    #[rustfmt::skip]
    const TYPES: [SubMbType; 13] = [
        sub(0, 1, 1),
        sub(1, 2, 2), sub(2, 2, 2), sub(3, 2, 2),
        sub(1, 2, 1), sub(1, 1, 2), sub(2, 2, 1), sub(2, 1, 2),
        sub(3, 2, 1), sub(3, 1, 2),
        sub(1, 1, 1), sub(2, 1, 1), sub(3, 1, 1),
    ];
    TYPES.get(t as usize).copied()
}

// ============================================================
// coded_block_pattern 映射 (me(v), ChromaArrayType 1)
// ============================================================

#[rustfmt::skip]
pub(crate) const INTRA_CBP: [u8; 48] = [
    47, 31, 15,  0, 23, 27, 29, 30,  7, 11, 13, 14, 39, 43, 45, 46,
    16,  3,  5, 10, 12, 19, 21, 26, 28, 35, 37, 42, 44,  1,  2,  4,
     8, 17, 18, 20, 24,  6,  9, 22, 25, 32, 33, 34, 36, 40, 38, 41,
];

#[rustfmt::skip]
pub(crate) const INTER_CBP: [u8; 48] = [
     0, 16,  1,  2,  4,  8, 32,  3,  5, 10, 12, 15, 47,  7, 11, 13,
    14,  6,  9, 31, 35, 37, 42, 44, 33, 34, 36, 40, 39, 43, 45, 46,
    17, 18, 20, 24, 19, 21, 26, 28, 23, 27, 29, 30, 22, 25, 38, 41,
];

// ============================================================
// 量化
// ============================================================

/// QPc 与 qPI 的对应关系 (表 8-15), qPI < 30 时 QPc = qPI
#[rustfmt::skip]
const CHROMA_QP_HIGH: [u8; 22] = [
    29, 30, 31, 32, 32, 33, 34, 34, 35, 35, 36, 36, 37, 37, 37, 38, 38, 38, 39, 39, 39, 39,
];

/// 由亮度 QP 与 chroma_qp_index_offset 计算色度 QP
pub(crate) fn chroma_qp(qp: i32, offset: i32) -> u8 {
    let qpi = (qp + offset).clamp(0, 51);
    if qpi < 30 {
        qpi as u8
    } else {
        CHROMA_QP_HIGH[(qpi - 30) as usize]
    }
}

/// normAdjust4x4 的三类取值, 按 qP % 6 索引
pub(crate) const NORM_ADJUST_4X4: [[u8; 3]; 6] = [
    [10, 13, 16],
    [11, 14, 18],
    [13, 16, 20],
    [14, 18, 23],
    [16, 20, 25],
    [18, 23, 29],
];

/// normAdjust8x8 的六类取值, 按 qP % 6 索引
pub(crate) const NORM_ADJUST_8X8: [[u8; 6]; 6] = [
    [20, 18, 32, 19, 25, 24],
    [22, 19, 35, 21, 28, 26],
    [26, 23, 42, 24, 33, 31],
    [28, 25, 45, 26, 35, 33],
    [32, 28, 51, 30, 40, 38],
    [36, 32, 58, 34, 46, 43],
];

/// 4x4 光栅位置所属的 normAdjust 类别
#[inline]
pub(crate) fn norm_class_4x4(pos: usize) -> usize {
    let (x, y) = (pos & 3, pos >> 2);
    match (x & 1, y & 1) {
        (0, 0) => 0,
        (1, 1) => 1,
        _ => 2,
    }
}

/// 8x8 光栅位置所属的 normAdjust 类别
#[inline]
pub(crate) fn norm_class_8x8(pos: usize) -> usize {
    let (x, y) = (pos & 7, pos >> 3);
    if x % 4 == 0 && y % 4 == 0 {
        0
    } else if x % 2 == 1 && y % 2 == 1 {
        1
    } else if x % 4 == 2 && y % 4 == 2 {
        2
    } else if (x % 4 == 0 && y % 2 == 1) || (x % 2 == 1 && y % 4 == 0) {
        3
    } else if (x % 4 == 0 && y % 4 == 2) || (x % 4 == 2 && y % 4 == 0) {
        4
    } else {
        5
    }
}

// ============================================================
// 去块滤波 (表 8-16, 8-17)
// ============================================================

#[rustfmt::skip]
pub(crate) const ALPHA_TABLE: [u8; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    4, 4, 5, 6, 7, 8, 9, 10, 12, 13, 15, 17, 20, 22, 25, 28,
    32, 36, 40, 45, 50, 56, 63, 71, 80, 90, 101, 113, 127, 144, 162, 182,
    203, 226, 255, 255,
];

#[rustfmt::skip]
pub(crate) const BETA_TABLE: [u8; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 6, 6, 7, 7, 8, 8,
    9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16,
    17, 17, 18, 18,
];

/// tC0, 按 indexA 与 bS (1..=3) 索引
#[rustfmt::skip]
pub(crate) const TC0_TABLE: [[u8; 3]; 52] = [
    [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0],
    [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0],
    [0, 0, 0], [0, 0, 1], [0, 0, 1], [0, 0, 1], [0, 0, 1], [0, 1, 1], [0, 1, 1], [1, 1, 1],
    [1, 1, 1], [1, 1, 1], [1, 1, 1], [1, 1, 2], [1, 1, 2], [1, 1, 2], [1, 1, 2], [1, 2, 3],
    [1, 2, 3], [2, 2, 3], [2, 2, 4], [2, 3, 4], [2, 3, 4], [3, 3, 5], [3, 4, 6], [3, 4, 6],
    [4, 5, 7], [4, 5, 8], [4, 6, 9], [5, 7, 10], [6, 8, 11], [6, 8, 13], [7, 10, 14], [8, 11, 16],
    [9, 12, 18], [10, 13, 20], [11, 15, 23], [13, 17, 25],
];
