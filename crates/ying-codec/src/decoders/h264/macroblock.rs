//! 宏块记录与邻居定位.
//!
//! 每幅图像保存一张按宏块地址索引的 [`MbInfo`] 网格. 当前宏块在解析开始时被重置,
//! 随后按语法顺序逐步写入, 因此宏块内部与外部的邻居访问都走同一套网格查询.
//! 所有 4x4 粒度的数组都使用光栅索引 (y * 4 + x).

use bitflags::bitflags;

bitflags! {
    /// 宏块类型标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct MbFlags: u16 {
        const INTRA = 1;
        const SKIP = 1 << 1;
        const PCM = 1 << 2;
        const INTRA16X16 = 1 << 3;
        const DIRECT16X16 = 1 << 4;
        const TRANSFORM_8X8 = 1 << 5;
    }
}

// cbf 位布局: 0..16 亮度 4x4 (光栅), 16 亮度 DC, 17/18 Cb/Cr DC, 19..23 Cb AC, 23..27 Cr AC
pub(crate) const CBF_LUMA_DC: u32 = 16;
pub(crate) const CBF_CHROMA_DC: u32 = 17;
pub(crate) const CBF_CHROMA_AC: u32 = 19;

/// 宏块记录
#[derive(Debug, Clone, Copy)]
pub(crate) struct MbInfo {
    /// 所属切片编号, 0 表示尚未解码
    pub(crate) slice_num: u32,
    pub(crate) flags: MbFlags,
    /// 每个 4x4 块的帧内预测模式 (I_8x8 时 4 个块相同)
    pub(crate) intra_modes: [u8; 16],
    pub(crate) intra_chroma_mode: u8,
    /// 低 4 位亮度, 高 2 位色度
    pub(crate) cbp: u8,
    /// 非零系数个数: 0..16 亮度, 16..20 Cb, 20..24 Cr
    pub(crate) nnz: [u8; 24],
    /// CABAC coded_block_flag
    pub(crate) cbf: u32,
    /// QP'Y, QP'Cb, QP'Cr
    pub(crate) qp: [u8; 3],
    /// B_Direct_8x8 子宏块掩码
    pub(crate) direct8x8: u8,
    /// 每个 8x8 块的参考索引, -1 表示该列表未使用
    pub(crate) ref_idx: [[i8; 4]; 2],
    /// 每个 8x8 块所引用图像的 FrameId, -1 表示无
    pub(crate) ref_pic: [[i32; 4]; 2],
    pub(crate) mv: [[[i16; 2]; 16]; 2],
    /// |mvd|, CABAC 上下文使用, 饱和到 255
    pub(crate) mvd: [[[u8; 2]; 16]; 2],
    /// 错误概率 (百分比), 0 表示正常解码
    pub(crate) error: u8,
}

impl Default for MbInfo {
    fn default() -> Self {
        Self {
            slice_num: 0,
            flags: MbFlags::empty(),
            intra_modes: [2; 16],
            intra_chroma_mode: 0,
            cbp: 0,
            nnz: [0; 24],
            cbf: 0,
            qp: [0; 3],
            direct8x8: 0,
            ref_idx: [[-1; 4]; 2],
            ref_pic: [[-1; 4]; 2],
            mv: [[[0; 2]; 16]; 2],
            mvd: [[[0; 2]; 16]; 2],
            error: 0,
        }
    }
}

impl MbInfo {
    #[inline]
    pub(crate) fn is_intra(&self) -> bool {
        self.flags.contains(MbFlags::INTRA)
    }

    /// I_NxN (I_4x4 或 I_8x8)
    #[inline]
    pub(crate) fn is_intra_nxn(&self) -> bool {
        self.is_intra() && !self.flags.intersects(MbFlags::INTRA16X16 | MbFlags::PCM)
    }

    #[inline]
    pub(crate) fn is_skip(&self) -> bool {
        self.flags.contains(MbFlags::SKIP)
    }

    /// B_Skip 或 B_Direct_16x16
    #[inline]
    pub(crate) fn is_direct(&self) -> bool {
        self.flags.contains(MbFlags::DIRECT16X16)
    }

    #[inline]
    pub(crate) fn cbf_bit(&self, bit: u32) -> bool {
        (self.cbf >> bit) & 1 != 0
    }

    /// 某 4x4 光栅块所在 8x8 块的参考索引
    #[inline]
    pub(crate) fn ref_of(&self, list: usize, raster: usize) -> i8 {
        self.ref_idx[list][super::tables::raster_to_blk8(raster)]
    }

    #[inline]
    pub(crate) fn mv_of(&self, list: usize, raster: usize) -> [i32; 2] {
        let mv = self.mv[list][raster];
        [i32::from(mv[0]), i32::from(mv[1])]
    }
}

/// 当前宏块及其 A (左) / B (上) / C (右上) / D (左上) 邻居宏块地址
///
/// 邻居只有在图像内且属于同一切片时才可用.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MbCtx {
    pub(crate) addr: usize,
    pub(crate) mb_x: usize,
    pub(crate) mb_y: usize,
    pub(crate) a: Option<usize>,
    pub(crate) b: Option<usize>,
    pub(crate) c: Option<usize>,
    pub(crate) d: Option<usize>,
}

impl MbCtx {
    pub(crate) fn new(mbs: &[MbInfo], width_mbs: usize, addr: usize, slice_num: u32) -> Self {
        let mb_x = addr % width_mbs;
        let mb_y = addr / width_mbs;
        let avail = |ok: bool, n: usize| (ok && mbs[n].slice_num == slice_num).then_some(n);
        let a = avail(mb_x > 0, addr.wrapping_sub(1));
        let b = avail(mb_y > 0, addr.wrapping_sub(width_mbs));
        let c = avail(
            mb_y > 0 && mb_x + 1 < width_mbs,
            addr.wrapping_sub(width_mbs).wrapping_add(1),
        );
        let d = avail(
            mb_y > 0 && mb_x > 0,
            addr.wrapping_sub(width_mbs + 1),
        );
        Self {
            addr,
            mb_x,
            mb_y,
            a,
            b,
            c,
            d,
        }
    }

    /// 定位相对当前宏块左上角 (x, y) 处的 4x4 块 (单位为 4x4 块, 取值 -1..=4)
    ///
    /// 返回 (宏块地址, 光栅索引). 宏块内部的位置总是返回当前宏块, 是否已解码由调用方判断.
    pub(crate) fn locate(&self, x: i32, y: i32) -> Option<(usize, usize)> {
        self.locate_n(x, y, 4)
    }

    /// 色度 (每个平面 2x2 个 4x4 块) 版本的 [`MbCtx::locate`]
    pub(crate) fn locate_chroma(&self, x: i32, y: i32) -> Option<(usize, usize)> {
        self.locate_n(x, y, 2)
    }

    fn locate_n(&self, x: i32, y: i32, n: i32) -> Option<(usize, usize)> {
        let idx = |xx: i32, yy: i32| (yy * n + xx) as usize;
        match (x, y) {
            (0.., 0..) if x < n && y < n => Some((self.addr, idx(x, y))),
            (..0, 0..) if y < n => self.a.map(|a| (a, idx(n - 1, y))),
            (0.., ..0) if x < n => self.b.map(|b| (b, idx(x, n - 1))),
            (..0, ..0) => self.d.map(|d| (d, idx(n - 1, n - 1))),
            (_, ..0) => self.c.map(|c| (c, idx(0, n - 1))),
            _ => None,
        }
    }
}

/// 宏块残差系数 (光栅顺序, 尚未反量化)
#[derive(Clone)]
pub(crate) struct Residual {
    pub(crate) luma: [[i32; 16]; 16],
    pub(crate) luma8x8: [[i32; 64]; 4],
    pub(crate) luma_dc: [i32; 16],
    pub(crate) chroma_dc: [[i32; 4]; 2],
    pub(crate) chroma_ac: [[[i32; 16]; 4]; 2],
}

impl Default for Residual {
    fn default() -> Self {
        Self {
            luma: [[0; 16]; 16],
            luma8x8: [[0; 64]; 4],
            luma_dc: [0; 16],
            chroma_dc: [[0; 4]; 2],
            chroma_ac: [[[0; 16]; 4]; 2],
        }
    }
}

impl Residual {
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(width: usize, height: usize, slice: u32) -> Vec<MbInfo> {
        let mut mbs = vec![MbInfo::default(); width * height];
        for mb in &mut mbs {
            mb.slice_num = slice;
        }
        mbs
    }

    #[test]
    fn test_neighbors_inside_picture() {
        let mbs = grid(3, 3, 1);
        let ctx = MbCtx::new(&mbs, 3, 4, 1);
        assert_eq!((ctx.mb_x, ctx.mb_y), (1, 1));
        assert_eq!(ctx.a, Some(3));
        assert_eq!(ctx.b, Some(1));
        assert_eq!(ctx.c, Some(2));
        assert_eq!(ctx.d, Some(0));
    }

    #[test]
    fn test_neighbors_at_borders_and_slice_boundary() {
        let mut mbs = grid(3, 2, 1);
        let ctx = MbCtx::new(&mbs, 3, 0, 1);
        assert!(ctx.a.is_none() && ctx.b.is_none() && ctx.c.is_none() && ctx.d.is_none());
        let ctx = MbCtx::new(&mbs, 3, 5, 1);
        assert!(ctx.c.is_none());
        // 上一行属于另一切片
        mbs[1].slice_num = 2;
        let ctx = MbCtx::new(&mbs, 3, 4, 1);
        assert!(ctx.b.is_none());
        assert_eq!(ctx.a, Some(3));
    }

    #[test]
    fn test_locate_4x4_neighbors() {
        let mbs = grid(2, 2, 1);
        let ctx = MbCtx::new(&mbs, 2, 3, 1);
        assert_eq!(ctx.locate(1, 2), Some((3, 9)));
        assert_eq!(ctx.locate(-1, 2), Some((2, 11)));
        assert_eq!(ctx.locate(2, -1), Some((1, 14)));
        assert_eq!(ctx.locate(-1, -1), Some((0, 15)));
        // 右上宏块不存在
        assert_eq!(ctx.locate(4, -1), None);
        // 宏块内部的右侧位置不可用
        assert_eq!(ctx.locate(4, 1), None);
        assert_eq!(ctx.locate_chroma(-1, 1), Some((2, 3)));
    }

    #[test]
    fn test_flags_helpers() {
        let mut mb = MbInfo::default();
        mb.flags = MbFlags::INTRA;
        assert!(mb.is_intra_nxn());
        mb.flags |= MbFlags::INTRA16X16;
        assert!(!mb.is_intra_nxn());
        mb.ref_idx[0] = [0, 1, 2, 3];
        assert_eq!(mb.ref_of(0, 7), 1);
        assert_eq!(mb.ref_of(0, 13), 3);
    }
}
