//! 运动矢量预测 (8.4.1): 中值预测, P_Skip, B 直接模式.
//!
//! 预测规则本身是纯函数, 只依赖邻居记录; 邻居的收集见 [`neighbors`].

use super::macroblock::{MbCtx, MbInfo};
use super::tables::BLK_TO_RASTER;

/// 邻居分区的运动信息
///
/// 帧内或未使用该列表的分区记为 `available = true, ref_idx = -1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MvNeighbor {
    pub(crate) available: bool,
    pub(crate) ref_idx: i32,
    pub(crate) mv: [i32; 2],
}

impl MvNeighbor {
    pub(crate) const UNAVAILABLE: Self = Self {
        available: false,
        ref_idx: -1,
        mv: [0, 0],
    };

    pub(crate) fn new(ref_idx: i32, mv: [i32; 2]) -> Self {
        Self {
            available: true,
            ref_idx,
            mv: if ref_idx < 0 { [0, 0] } else { mv },
        }
    }
}

/// 需要方向捷径的分区形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PartShape {
    Other,
    Top16x8,
    Bottom16x8,
    Left8x16,
    Right8x16,
}

#[inline]
pub(crate) fn median(a: i32, b: i32, c: i32) -> i32 {
    a.max(b).min(a.min(b).max(c))
}

/// 中值预测 (8.4.1.3), `n` 为 [A, B, C] (C 已按需替换为 D)
pub(crate) fn predict_mv(n: [MvNeighbor; 3], ref_idx: i32, shape: PartShape) -> [i32; 2] {
    let [a, b, c] = n;
    match shape {
        PartShape::Top16x8 if b.ref_idx == ref_idx => return b.mv,
        PartShape::Bottom16x8 | PartShape::Left8x16 if a.ref_idx == ref_idx => return a.mv,
        PartShape::Right8x16 if c.ref_idx == ref_idx => return c.mv,
        _ => {}
    }

    let (b, c) = if !b.available && !c.available && a.available {
        (a, a)
    } else {
        (b, c)
    };
    let matches = [a, b, c].iter().filter(|x| x.ref_idx == ref_idx).count();
    if matches == 1 {
        if a.ref_idx == ref_idx {
            return a.mv;
        }
        if b.ref_idx == ref_idx {
            return b.mv;
        }
        return c.mv;
    }
    [
        median(a.mv[0], b.mv[0], c.mv[0]),
        median(a.mv[1], b.mv[1], c.mv[1]),
    ]
}

/// P_Skip 的 L0 运动矢量 (8.4.1.1)
pub(crate) fn p_skip_mv(n: [MvNeighbor; 3]) -> [i32; 2] {
    let [a, b, _] = n;
    let zero = |x: MvNeighbor| x.ref_idx == 0 && x.mv == [0, 0];
    if !a.available || !b.available || zero(a) || zero(b) {
        return [0, 0];
    }
    predict_mv(n, 0, PartShape::Other)
}

// ============================================================
// B 直接模式
// ============================================================

/// 同位块的运动信息, 帧内时 `ref_idx = -1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Colocated {
    pub(crate) ref_idx: i32,
    pub(crate) mv: [i32; 2],
    /// 同位块所引用图像的 FrameId
    pub(crate) ref_pic: i32,
}

impl Colocated {
    /// 从同位宏块的光栅块取运动信息, 优先 L0
    pub(crate) fn from_mb(mb: &MbInfo, raster: usize) -> Self {
        if mb.is_intra() || mb.slice_num == 0 {
            return Self {
                ref_idx: -1,
                mv: [0, 0],
                ref_pic: -1,
            };
        }
        let list = usize::from(mb.ref_of(0, raster) < 0);
        let b8 = super::tables::raster_to_blk8(raster);
        Self {
            ref_idx: i32::from(mb.ref_idx[list][b8]),
            mv: mb.mv_of(list, raster),
            ref_pic: mb.ref_pic[list][b8],
        }
    }
}

#[inline]
fn min_positive(x: i32, y: i32) -> i32 {
    if x >= 0 && y >= 0 { x.min(y) } else { x.max(y) }
}

/// 空间直接模式的宏块级结果 (8.4.1.2.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SpatialDirect {
    pub(crate) ref_idx: [i32; 2],
    pub(crate) mv: [[i32; 2]; 2],
}

/// `n[list]` 为 16x16 分区的 [A, B, C] 邻居
pub(crate) fn spatial_direct(n: [[MvNeighbor; 3]; 2]) -> SpatialDirect {
    let mut ref_idx = [0; 2];
    for (list, r) in ref_idx.iter_mut().enumerate() {
        let [a, b, c] = n[list];
        *r = min_positive(a.ref_idx, min_positive(b.ref_idx, c.ref_idx));
    }
    if ref_idx[0] < 0 && ref_idx[1] < 0 {
        return SpatialDirect {
            ref_idx: [0, 0],
            mv: [[0, 0]; 2],
        };
    }
    let mut mv = [[0; 2]; 2];
    for list in 0..2 {
        if ref_idx[list] >= 0 {
            mv[list] = predict_mv(n[list], ref_idx[list], PartShape::Other);
        }
    }
    SpatialDirect { ref_idx, mv }
}

/// colZeroFlag: RefPicList1[0] 为短期参考且同位块静止
pub(crate) fn col_zero(col: &Colocated, l1_short_term: bool) -> bool {
    l1_short_term
        && col.ref_idx == 0
        && (-1..=1).contains(&col.mv[0])
        && (-1..=1).contains(&col.mv[1])
}

/// 空间直接模式下单个 4x4 块的运动矢量
pub(crate) fn spatial_direct_block(d: &SpatialDirect, col_zero: bool) -> [[i32; 2]; 2] {
    let mut mv = d.mv;
    for list in 0..2 {
        if d.ref_idx[list] < 0 || (d.ref_idx[list] == 0 && col_zero) {
            mv[list] = [0, 0];
        }
    }
    mv
}

/// DistScaleFactor (8.4.1.2.3), td 为 0 时返回 None
pub(crate) fn dist_scale_factor(poc_cur: i32, poc0: i32, poc1: i32) -> Option<i32> {
    let td = (poc1 - poc0).clamp(-128, 127);
    if td == 0 {
        return None;
    }
    let tb = (poc_cur - poc0).clamp(-128, 127);
    let tx = (16384 + (td.abs() >> 1)) / td;
    Some(((tb * tx + 32) >> 6).clamp(-1024, 1023))
}

/// 时间直接模式的 (mvL0, mvL1); `dsf` 为 None 表示长期参考或 td 为 0
pub(crate) fn temporal_direct_mv(mv_col: [i32; 2], dsf: Option<i32>) -> [[i32; 2]; 2] {
    match dsf {
        Some(s) => {
            let l0 = mv_col.map(|c| (s * c + 128) >> 8);
            [l0, [l0[0] - mv_col[0], l0[1] - mv_col[1]]]
        }
        None => [mv_col, [0, 0]],
    }
}

/// 同位块参考图像在 RefPicList0 中的最小下标, 找不到时取 0
pub(crate) fn map_col_to_list0(ref_pic: i32, list0: &[i32]) -> i32 {
    list0
        .iter()
        .position(|&id| id == ref_pic)
        .map_or(0, |i| i as i32)
}

// ============================================================
// 邻居收集
// ============================================================

/// 收集左上角 (x, y)、宽 `w` (4x4 块单位) 分区在 `list` 上的 A/B/C 邻居
///
/// 当前宏块中已解码的分区必须已经写入网格. C 位于当前宏块内部且尚未解码,
/// 或位于图像/切片外时, 用 D 代替.
pub(crate) fn neighbors(
    mbs: &[MbInfo],
    ctx: &MbCtx,
    list: usize,
    x: usize,
    y: usize,
    w: usize,
) -> [MvNeighbor; 3] {
    let fetch = |pos: Option<(usize, usize)>| -> MvNeighbor {
        let Some((addr, raster)) = pos else {
            return MvNeighbor::UNAVAILABLE;
        };
        let mb = &mbs[addr];
        if mb.is_intra() {
            return MvNeighbor::new(-1, [0, 0]);
        }
        MvNeighbor::new(i32::from(mb.ref_of(list, raster)), mb.mv_of(list, raster))
    };
    let (x, y) = (x as i32, y as i32);
    let a = fetch(ctx.locate(x - 1, y));
    let b = fetch(ctx.locate(x, y - 1));

    let cur_blk = BLK_TO_RASTER[(y * 4 + x) as usize];
    let c_pos = ctx.locate(x + w as i32, y - 1).filter(|&(addr, raster)| {
        addr != ctx.addr || BLK_TO_RASTER[raster] < cur_blk
    });
    let c = match c_pos {
        Some(_) => fetch(c_pos),
        None => fetch(ctx.locate(x - 1, y - 1)),
    };
    [a, b, c]
}
