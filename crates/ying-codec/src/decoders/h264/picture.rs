//! 解码图像存储.
//!
//! 每个 DPB 槽位持有一个 [`Picture`]: 样本平面与宏块网格放在同一个 `RwLock` 之后,
//! 正在解码的任务持有写锁, 引用它的任务持有读锁.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ying_core::{YingError, YingResult};

use super::inter::RefPlanes;
use super::macroblock::MbInfo;

/// 切片级去块参数, 按切片编号保存
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DeblockParams {
    pub(crate) disable_idc: u32,
    pub(crate) offset_a: i32,
    pub(crate) offset_b: i32,
}

/// 图像内容
pub(crate) struct PictureData {
    pub(crate) width_mbs: usize,
    pub(crate) height_mbs: usize,
    /// Y, Cb, Cr
    pub(crate) planes: [Vec<u8>; 3],
    pub(crate) mbs: Vec<MbInfo>,
    /// 下标为 slice_num - 1
    pub(crate) slices: Vec<DeblockParams>,
    /// 最近一个帧间切片的首个参考图像, 帧级修复时用作填充来源
    pub(crate) conceal_ref: Option<Arc<Picture>>,
    /// 是否有宏块经过修复
    pub(crate) concealed: bool,
    /// 图像所属的恢复代数, 每个 IDR 加一
    pub(crate) generation: u32,
}

impl PictureData {
    fn new(width_mbs: usize, height_mbs: usize) -> Self {
        let luma = width_mbs * height_mbs * 256;
        Self {
            width_mbs,
            height_mbs,
            planes: [vec![0; luma], vec![128; luma / 4], vec![128; luma / 4]],
            mbs: vec![MbInfo::default(); width_mbs * height_mbs],
            slices: Vec::new(),
            conceal_ref: None,
            concealed: false,
            generation: 0,
        }
    }

    /// 复用槽位前清空宏块网格与切片信息, 尺寸变化时重新分配
    pub(crate) fn reset(&mut self, width_mbs: usize, height_mbs: usize) {
        if self.width_mbs != width_mbs || self.height_mbs != height_mbs {
            *self = Self::new(width_mbs, height_mbs);
            return;
        }
        self.mbs.fill(MbInfo::default());
        self.slices.clear();
        self.conceal_ref = None;
        self.concealed = false;
    }

    #[inline]
    pub(crate) fn width(&self) -> usize {
        self.width_mbs * 16
    }

    #[inline]
    pub(crate) fn height(&self) -> usize {
        self.height_mbs * 16
    }

    /// 平面步长
    #[inline]
    pub(crate) fn stride(&self, plane: usize) -> usize {
        if plane == 0 {
            self.width_mbs * 16
        } else {
            self.width_mbs * 8
        }
    }

    pub(crate) fn ref_planes(&self) -> RefPlanes<'_> {
        RefPlanes {
            planes: [&self.planes[0], &self.planes[1], &self.planes[2]],
            width: self.width(),
            height: self.height(),
        }
    }

    /// 宏块 `addr` 所属切片的去块参数
    pub(crate) fn deblock_params(&self, addr: usize) -> DeblockParams {
        let n = self.mbs[addr].slice_num as usize;
        self.slices.get(n.wrapping_sub(1)).copied().unwrap_or_default()
    }
}

/// 一个 DPB 槽位上的图像
pub(crate) struct Picture {
    data: RwLock<PictureData>,
}

impl Picture {
    pub(crate) fn new(width_mbs: usize, height_mbs: usize) -> Self {
        Self {
            data: RwLock::new(PictureData::new(width_mbs, height_mbs)),
        }
    }

    pub(crate) fn read(&self) -> YingResult<RwLockReadGuard<'_, PictureData>> {
        self.data
            .read()
            .map_err(|_| YingError::Internal("H264: 图像读锁已中毒".into()))
    }

    /// 不等待的读锁, 锁被占用或中毒时返回 None
    pub(crate) fn try_read(&self) -> Option<RwLockReadGuard<'_, PictureData>> {
        self.data.try_read().ok()
    }

    pub(crate) fn write(&self) -> YingResult<RwLockWriteGuard<'_, PictureData>> {
        self.data
            .write()
            .map_err(|_| YingError::Internal("H264: 图像写锁已中毒".into()))
    }
}
