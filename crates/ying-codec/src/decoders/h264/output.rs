//! 输出帧.
//!
//! [`Frame`] 借用一个 DPB 槽位 (MVC 码流再加上非基础视图的槽位): 在它被丢弃或交给
//! [`H264Decoder::release_frame`](super::H264Decoder::release_frame) 之前,
//! 这些槽位不会被新图像复用.

use std::io::Write;
use std::sync::{Arc, RwLockReadGuard};

use ying_core::YingResult;

use super::picture::{Picture, PictureData};
use super::scheduler::Shared;

/// 输出帧的几何与标识信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameInfo {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) crop_left: u32,
    pub(crate) crop_top: u32,
    pub(crate) frame_id: i32,
    pub(crate) poc: i32,
    pub(crate) error: bool,
}

/// 一个视图的解码图像
pub(crate) struct ViewPicture {
    slot: usize,
    pic: Arc<Picture>,
    info: FrameInfo,
    /// 按光栅顺序的宏块错误概率 (0..=100)
    mb_errors: Vec<u8>,
    generation: u32,
    width_mbs: usize,
}

impl ViewPicture {
    /// 在图像解码完成后截取它的宏块错误表
    pub(crate) fn new(slot: usize, pic: Arc<Picture>, info: FrameInfo) -> YingResult<Self> {
        let (mb_errors, generation, width_mbs) = {
            let data = pic.read()?;
            let errors = data.mbs.iter().map(|mb| mb.error).collect();
            (errors, data.generation, data.width_mbs)
        };
        Ok(Self {
            slot,
            pic,
            info,
            mb_errors,
            generation,
            width_mbs,
        })
    }

    fn view(&self, strides: [usize; 3]) -> YingResult<FrameView<'_>> {
        Ok(FrameView {
            data: self.pic.read()?,
            info: &self.info,
            strides,
        })
    }
}

/// 一帧解码结果
///
/// MVC 码流中同一访问单元的两个视图一起输出, 非基础视图通过 `mvc_*` 方法访问.
pub struct Frame {
    shared: Arc<Shared>,
    base: ViewPicture,
    mvc: Option<ViewPicture>,
    strides: [usize; 3],
}

impl Frame {
    pub(crate) fn new(
        shared: Arc<Shared>,
        base: ViewPicture,
        mvc: Option<ViewPicture>,
        luma_stride: usize,
    ) -> Self {
        Self {
            shared,
            base,
            mvc,
            strides: [luma_stride, luma_stride / 2, luma_stride / 2],
        }
    }

    /// 裁剪后的宽度
    pub fn width(&self) -> u32 {
        self.base.info.width
    }

    /// 裁剪后的高度
    pub fn height(&self) -> u32 {
        self.base.info.height
    }

    /// 裁剪区域左上角在亮度平面中的偏移 (x, y)
    pub fn crop_offset(&self) -> (u32, u32) {
        (self.base.info.crop_left, self.base.info.crop_top)
    }

    /// Y/Cb/Cr 平面步长
    pub fn strides(&self) -> [usize; 3] {
        self.strides
    }

    pub fn bit_depth(&self) -> u32 {
        8
    }

    /// 解码顺序中唯一的帧标识
    pub fn frame_id(&self) -> i32 {
        self.base.info.frame_id
    }

    /// 图像顺序计数
    pub fn poc(&self) -> i32 {
        self.base.info.poc
    }

    /// 帧中是否有切片出错或宏块被修复
    pub fn has_error(&self) -> bool {
        self.base.info.error
    }

    /// 每行宏块数, 即 [`mb_errors`](Self::mb_errors) 的行宽
    pub fn width_mbs(&self) -> usize {
        self.base.width_mbs
    }

    /// 按光栅顺序的宏块错误概率
    ///
    /// 0 表示正常解码, 100 表示宏块完全由修复得到, 中间值是熵解码出错时
    /// 对出错位置之前宏块的估计.
    pub fn mb_errors(&self) -> &[u8] {
        &self.base.mb_errors
    }

    /// 恢复代数: 每个 IDR 图像加一
    ///
    /// 代数较大的帧不会引用代数较小的帧, 因此不会继承它们的错误.
    pub fn recovery_generation(&self) -> u32 {
        self.base.generation
    }

    /// 获取样本平面的只读视图
    pub fn planes(&self) -> YingResult<FrameView<'_>> {
        self.base.view(self.strides)
    }

    /// 以平面 I420 格式写出裁剪区域
    pub fn write_i420<W: Write>(&self, out: &mut W) -> YingResult<()> {
        self.planes()?.write_i420(out)
    }

    /// 是否带有 MVC 非基础视图
    pub fn is_mvc(&self) -> bool {
        self.mvc.is_some()
    }

    /// 非基础视图的帧标识
    pub fn mvc_frame_id(&self) -> Option<i32> {
        self.mvc.as_ref().map(|v| v.info.frame_id)
    }

    /// 非基础视图是否有错误
    pub fn mvc_has_error(&self) -> Option<bool> {
        self.mvc.as_ref().map(|v| v.info.error)
    }

    /// 非基础视图的宏块错误概率
    pub fn mvc_mb_errors(&self) -> Option<&[u8]> {
        self.mvc.as_ref().map(|v| v.mb_errors.as_slice())
    }

    /// 非基础视图的样本平面, 几何与基础视图相同
    pub fn mvc_planes(&self) -> YingResult<Option<FrameView<'_>>> {
        self.mvc.as_ref().map(|v| v.view(self.strides)).transpose()
    }

    /// 以 I420 格式写出非基础视图; 没有非基础视图时不写任何数据
    pub fn write_mvc_i420<W: Write>(&self, out: &mut W) -> YingResult<()> {
        match self.mvc_planes()? {
            Some(view) => view.write_i420(out),
            None => Ok(()),
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.shared.release_borrow(self.base.slot);
        if let Some(v) = &self.mvc {
            self.shared.release_borrow(v.slot);
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("slot", &self.base.slot)
            .field("info", &self.base.info)
            .field("mvc_slot", &self.mvc.as_ref().map(|v| v.slot))
            .finish()
    }
}

/// 帧样本的只读视图, 持有图像读锁
pub struct FrameView<'a> {
    data: RwLockReadGuard<'a, PictureData>,
    info: &'a FrameInfo,
    strides: [usize; 3],
}

impl FrameView<'_> {
    /// 完整 (未裁剪) 平面, 0/1/2 对应 Y/Cb/Cr
    pub fn plane(&self, index: usize) -> &[u8] {
        &self.data.planes[index.min(2)]
    }

    pub fn y(&self) -> &[u8] {
        self.plane(0)
    }

    pub fn cb(&self) -> &[u8] {
        self.plane(1)
    }

    pub fn cr(&self) -> &[u8] {
        self.plane(2)
    }

    /// 裁剪区域内的逐行切片
    pub fn cropped_rows(&self, index: usize) -> impl Iterator<Item = &[u8]> + '_ {
        let index = index.min(2);
        let shift = u32::from(index > 0);
        let info = self.info;
        let stride = self.strides[index];
        let x0 = (info.crop_left >> shift) as usize;
        let y0 = (info.crop_top >> shift) as usize;
        let w = (info.width >> shift) as usize;
        let h = (info.height >> shift) as usize;
        let plane = self.plane(index);
        (y0..y0 + h).map(move |y| &plane[y * stride + x0..y * stride + x0 + w])
    }

    fn write_i420<W: Write>(&self, out: &mut W) -> YingResult<()> {
        for plane in 0..3 {
            for row in self.cropped_rows(plane) {
                out.write_all(row)?;
            }
        }
        Ok(())
    }
}
