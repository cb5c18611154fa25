//! 错误恢复.
//!
//! 切片解码出错时, 已解码的宏块按照出错位置估计一个错误概率, 再向备选重建结果混合:
//! I 切片使用 DC 填充, P/B 切片在错误概率超过 25% 时改用跳过宏块的重建结果.
//! 图像完成时仍未被任何切片覆盖的宏块由 [`recover_frame`] 以 100% 错误概率填充.

use log::{debug, warn};
use ying_core::YingResult;

use super::intra::{IntraAvail, conceal_dc};
use super::macroblock::{MbFlags, MbInfo};
use super::picture::PictureData;
use super::slice_data::SliceDecoder;
use super::slice_header::SliceType;

/// CABAC 中 end_of_slice_flag 意外为 1 的概率 2/383, 以 16 位定点表示
const CABAC_ESCAPE_P: u32 = 342;

/// P/B 切片中超过该错误概率的宏块改用跳过宏块重建
const SKIP_FALLBACK_THRESHOLD: u8 = 25;

/// CAVLC 切片的错误概率: 从切片起点到出错宏块线性增长到 100
pub(crate) fn cavlc_error_probs(n: usize) -> Vec<u8> {
    (0..n).map(|k| ((k + 1) * 100 / n) as u8).collect()
}

/// CABAC 切片的错误概率
///
/// 距出错宏块 d 个宏块的位置错误概率为 (1-p)^d, 出错宏块本身为 100.
pub(crate) fn cabac_error_probs(n: usize) -> Vec<u8> {
    let mut probs = vec![0u8; n];
    let mut e: u64 = 1 << 16;
    for p in probs.iter_mut().rev() {
        *p = ((e * 100 + (1 << 15)) >> 16) as u8;
        e = (e * u64::from((1 << 16) - CABAC_ESCAPE_P)) >> 16;
    }
    probs
}

/// 宏块内全部样本在各平面中的 (平面, 偏移), 依次为 Y、Cb、Cr 的光栅顺序
fn mb_sample_offsets(pic: &PictureData, addr: usize) -> Vec<(usize, usize)> {
    let (mb_x, mb_y) = (addr % pic.width_mbs, addr / pic.width_mbs);
    let mut out = Vec::with_capacity(384);
    for plane in 0..3 {
        let n = if plane == 0 { 16 } else { 8 };
        let stride = pic.stride(plane);
        for y in 0..n {
            for x in 0..n {
                out.push((plane, (mb_y * n + y) * stride + mb_x * n + x));
            }
        }
    }
    out
}

/// 以已有样本的相邻宏块为依据做 DC 填充
fn dc_fill(pic: &mut PictureData, addr: usize) {
    let w = pic.width_mbs;
    let (mb_x, mb_y) = (addr % w, addr / w);
    let decoded = |a: usize| pic.mbs[a].slice_num != 0;
    let avail = IntraAvail {
        left: mb_x > 0 && decoded(addr - 1),
        top: mb_y > 0 && decoded(addr - w),
        top_right: false,
        top_left: mb_x > 0 && mb_y > 0 && decoded(addr - w - 1),
    };
    let strides = [pic.stride(0), pic.stride(1)];
    let [y, cb, cr] = &mut pic.planes;
    conceal_dc(
        [y.as_mut_slice(), cb.as_mut_slice(), cr.as_mut_slice()],
        strides,
        mb_x,
        mb_y,
        avail,
    );
}

impl SliceDecoder<'_> {
    /// 对出错切片中已开始解码的宏块 [first_mb, next_mb) 做错误隐藏
    pub(crate) fn conceal_slice(&mut self) -> YingResult<()> {
        let n = self.next_mb - self.first_mb;
        if n == 0 {
            return Ok(());
        }
        let probs = if self.pps.cabac {
            cabac_error_probs(n)
        } else {
            cavlc_error_probs(n)
        };
        debug!(
            "H264: 切片错误隐藏, 宏块 {}..{}",
            self.first_mb, self.next_mb
        );
        for (k, &e) in probs.iter().enumerate() {
            let addr = self.first_mb + k;
            match self.slice_type() {
                SliceType::I => self.blend_dc(addr, e),
                _ if e > SKIP_FALLBACK_THRESHOLD => self.redo_as_skip(addr)?,
                _ => {}
            }
            self.pic.mbs[addr].error = e;
        }
        self.pic.concealed = true;
        Ok(())
    }

    fn blend_dc(&mut self, addr: usize, e: u8) {
        let offsets = mb_sample_offsets(self.pic, addr);
        let decoded: Vec<u8> = offsets.iter().map(|&(p, o)| self.pic.planes[p][o]).collect();
        dc_fill(self.pic, addr);
        let e = u32::from(e);
        for (&(p, o), &d) in offsets.iter().zip(&decoded) {
            let fill = u32::from(self.pic.planes[p][o]);
            self.pic.planes[p][o] = ((u32::from(d) * (100 - e) + fill * e + 50) / 100) as u8;
        }
        if e == 100 {
            let mb = &mut self.pic.mbs[addr];
            *mb = MbInfo {
                slice_num: mb.slice_num,
                flags: MbFlags::INTRA,
                qp: mb.qp,
                ..MbInfo::default()
            };
        }
    }

    /// 以跳过宏块重新重建 `addr`, 运动推导失败时退回 DC 填充
    fn redo_as_skip(&mut self, addr: usize) -> YingResult<()> {
        let next = self.next_mb;
        self.begin_mb(addr);
        self.next_mb = next;
        if let Err(e) = self.decode_skip() {
            debug!("H264: 宏块 {addr} 无法按跳过宏块隐藏 ({e}), 改用 DC 填充");
            dc_fill(self.pic, addr);
            self.pic.mbs[addr].flags = MbFlags::INTRA;
        }
        Ok(())
    }
}

/// 帧级修复: 填充没有任何切片覆盖的宏块, 返回修复的宏块数
///
/// 优先从最近的参考图像复制同位样本, 没有可用参考时做 DC 填充.
pub(crate) fn recover_frame(pic: &mut PictureData) -> usize {
    let missing: Vec<usize> = (0..pic.mbs.len())
        .filter(|&a| pic.mbs[a].slice_num == 0)
        .collect();
    if missing.is_empty() {
        return 0;
    }
    warn!("H264: 图像缺少 {} 个宏块, 执行帧级修复", missing.len());

    let source = pic.conceal_ref.clone();
    // 参考槽位可能正被其他任务写入, 此时不等待
    let guard = source.as_ref().and_then(|p| p.try_read());
    let reference = guard
        .as_deref()
        .filter(|r| r.width_mbs == pic.width_mbs && r.height_mbs == pic.height_mbs);

    for &addr in &missing {
        match reference {
            Some(r) => {
                for (p, o) in mb_sample_offsets(pic, addr) {
                    pic.planes[p][o] = r.planes[p][o];
                }
            }
            None => dc_fill(pic, addr),
        }
        pic.mbs[addr] = MbInfo {
            slice_num: u32::MAX,
            flags: MbFlags::INTRA,
            error: 100,
            ..MbInfo::default()
        };
    }
    pic.concealed = true;
    missing.len()
}
