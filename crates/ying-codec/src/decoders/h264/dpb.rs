//! 解码图像缓冲 (DPB) 与参考图像管理.
//!
//! 32 个帧槽位以位掩码寻址: `reference` / `long_term` 记录参考状态, `output`
//! 记录等待输出的帧, `second_views` 记录属于 MVC 非基础视图的槽位. 两个视图共用
//! 槽位, 参考标记、参考列表与输出调度都只在同一视图的槽位之间进行.
//! 借出与任务依赖由调用方以 `unavailable` 掩码传入.
//! 图像顺序计数 (8.2.1)、参考标记 (8.2.5)、参考列表 (8.2.4, H.8.2) 与输出调度 (C.4.5)
//! 都在这里完成.

use std::sync::Arc;

use log::{debug, warn};
use ying_core::{YingError, YingResult};

use super::picture::Picture;
use super::slice_header::{MmcoOp, RefPicListMod, SliceHeader, SliceType};
use crate::parsers::h264::sps::Sps;

/// 帧槽位数
pub(crate) const MAX_SLOTS: usize = 32;

/// 支持的视图数: 基础视图与一个 MVC 非基础视图
pub(crate) const MAX_VIEWS: usize = 2;

#[inline]
fn bit(slot: usize) -> u32 {
    1 << slot
}

/// 按位遍历掩码中的槽位
fn slots_of(mask: u32) -> impl Iterator<Item = usize> {
    (0..MAX_SLOTS).filter(move |&i| mask & bit(i) != 0)
}

// ============================================================
// 图像顺序计数
// ============================================================

/// 一帧的 POC 推导结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Poc {
    pub(crate) top: i32,
    pub(crate) bottom: i32,
    /// PicOrderCntMsb (类型 0)
    pub(crate) msb: i32,
    /// FrameNumOffset (类型 1/2)
    pub(crate) frame_num_offset: i32,
}

impl Poc {
    /// 帧的 POC 取两场中较小者
    pub(crate) fn frame(&self) -> i32 {
        self.top.min(self.bottom)
    }
}

/// 跨图像保存的 POC 状态
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PocState {
    prev_poc_msb: i32,
    prev_poc_lsb: i32,
    prev_frame_num_offset: i32,
    prev_frame_num: u32,
}

impl PocState {
    fn frame_num_offset(&self, sps: &Sps, hdr: &SliceHeader) -> i32 {
        if hdr.idr {
            0
        } else if self.prev_frame_num > hdr.frame_num {
            self.prev_frame_num_offset
                .wrapping_add(sps.max_frame_num() as i32)
        } else {
            self.prev_frame_num_offset
        }
    }

    /// 推导当前图像的 POC, 不修改状态
    pub(crate) fn compute(&self, sps: &Sps, hdr: &SliceHeader) -> Poc {
        match sps.poc_type {
            0 => {
                let (prev_msb, prev_lsb) = if hdr.idr {
                    (0, 0)
                } else {
                    (self.prev_poc_msb, self.prev_poc_lsb)
                };
                let max_lsb = 1i32 << sps.log2_max_poc_lsb;
                let lsb = hdr.poc_lsb as i32;
                let msb = if lsb < prev_lsb && prev_lsb - lsb >= max_lsb / 2 {
                    prev_msb.wrapping_add(max_lsb)
                } else if lsb > prev_lsb && lsb - prev_lsb > max_lsb / 2 {
                    prev_msb.wrapping_sub(max_lsb)
                } else {
                    prev_msb
                };
                let top = msb.wrapping_add(lsb);
                Poc {
                    top,
                    bottom: top.wrapping_add(hdr.delta_poc_bottom),
                    msb,
                    frame_num_offset: 0,
                }
            }
            1 => {
                let offset = self.frame_num_offset(sps, hdr);
                let cycle = &sps.offset_for_ref_frame;
                let mut abs = if cycle.is_empty() {
                    0
                } else {
                    offset.wrapping_add(hdr.frame_num as i32)
                };
                if hdr.nal_ref_idc == 0 && abs > 0 {
                    abs -= 1;
                }
                let mut expected: i32 = 0;
                if abs > 0 {
                    let n = cycle.len() as i32;
                    let delta: i32 = cycle.iter().fold(0, |s, &v| s.wrapping_add(v));
                    let cycle_cnt = (abs - 1) / n;
                    let in_cycle = ((abs - 1) % n) as usize;
                    expected = cycle_cnt.wrapping_mul(delta);
                    for &v in &cycle[..=in_cycle] {
                        expected = expected.wrapping_add(v);
                    }
                }
                if hdr.nal_ref_idc == 0 {
                    expected = expected.wrapping_add(sps.offset_for_non_ref_pic);
                }
                let top = expected.wrapping_add(hdr.delta_poc[0]);
                Poc {
                    top,
                    bottom: top
                        .wrapping_add(sps.offset_for_top_to_bottom_field)
                        .wrapping_add(hdr.delta_poc[1]),
                    msb: 0,
                    frame_num_offset: offset,
                }
            }
            _ => {
                let offset = self.frame_num_offset(sps, hdr);
                let base = offset.wrapping_add(hdr.frame_num as i32).wrapping_mul(2);
                let poc = if hdr.idr {
                    0
                } else if hdr.nal_ref_idc == 0 {
                    base.wrapping_sub(1)
                } else {
                    base
                };
                Poc {
                    top: poc,
                    bottom: poc,
                    msb: 0,
                    frame_num_offset: offset,
                }
            }
        }
    }

    /// 图像解码完成后更新状态
    ///
    /// 含 MMCO5 的图像之后 prevFrameNum 与 prevFrameNumOffset 归零, 类型 0 的
    /// prevPicOrderCnt 取重置后的顶场 POC.
    pub(crate) fn update(&mut self, hdr: &SliceHeader, poc: &Poc, mmco5: bool) {
        if mmco5 {
            self.prev_frame_num = 0;
            self.prev_frame_num_offset = 0;
        } else {
            self.prev_frame_num = hdr.frame_num;
            self.prev_frame_num_offset = poc.frame_num_offset;
        }
        if hdr.is_reference() {
            if mmco5 {
                self.prev_poc_msb = 0;
                self.prev_poc_lsb = poc.top - poc.frame();
            } else {
                self.prev_poc_msb = poc.msb;
                self.prev_poc_lsb = hdr.poc_lsb as i32;
            }
        }
    }
}

// ============================================================
// 帧槽位
// ============================================================

/// 一个 DPB 槽位的元数据
pub(crate) struct FrameSlot {
    pub(crate) pic: Arc<Picture>,
    pub(crate) sps: Option<Arc<Sps>>,
    pub(crate) frame_num: u32,
    pub(crate) frame_id: i32,
    pub(crate) top_poc: i32,
    pub(crate) bottom_poc: i32,
    pub(crate) long_term_idx: u32,
    /// frame_num 间隔补出的帧, 不输出
    pub(crate) non_existing: bool,
}

impl FrameSlot {
    fn empty() -> Self {
        Self {
            pic: Arc::new(Picture::new(0, 0)),
            sps: None,
            frame_num: 0,
            frame_id: -1,
            top_poc: 0,
            bottom_poc: 0,
            long_term_idx: 0,
            non_existing: false,
        }
    }

    pub(crate) fn poc(&self) -> i32 {
        self.top_poc.min(self.bottom_poc)
    }
}

/// 解码图像缓冲
pub(crate) struct Dpb {
    pub(crate) slots: Vec<FrameSlot>,
    pub(crate) reference: u32,
    pub(crate) long_term: u32,
    pub(crate) output: u32,
    /// 非基础视图的槽位
    pub(crate) second_views: u32,
    max_long_term_idx: [Option<u32>; MAX_VIEWS],
    next_frame_id: i32,
    /// 每个视图在本编码视频序列内最近一次输出的 POC
    last_output_poc: [Option<i32>; MAX_VIEWS],
}

impl Default for Dpb {
    fn default() -> Self {
        Self::new()
    }
}

impl Dpb {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..MAX_SLOTS).map(|_| FrameSlot::empty()).collect(),
            reference: 0,
            long_term: 0,
            output: 0,
            second_views: 0,
            max_long_term_idx: [None; MAX_VIEWS],
            next_frame_id: 0,
            last_output_poc: [None; MAX_VIEWS],
        }
    }

    pub(crate) fn short_term(&self) -> u32 {
        self.reference & !self.long_term
    }

    /// 视图 `view` 的槽位掩码 (包括空闲槽位中上次属于该视图的)
    pub(crate) fn view_slots(&self, view: usize) -> u32 {
        if view == 0 {
            !self.second_views
        } else {
            self.second_views
        }
    }

    /// 槽位所属的视图
    pub(crate) fn view_of(&self, slot: usize) -> usize {
        (self.second_views >> slot & 1) as usize
    }

    fn same_view(&self, slot: usize) -> u32 {
        self.view_slots(self.view_of(slot))
    }

    /// 第一个既非参考也不等待输出、且不在 `unavailable` 中的槽位
    pub(crate) fn free_slot(&self, unavailable: u32) -> Option<usize> {
        let used = self.reference | self.output | unavailable;
        (0..MAX_SLOTS).find(|&i| used & bit(i) == 0)
    }

    /// 为视图 `view` 占用槽位并写入新帧的标识, 返回分配的 FrameId
    pub(crate) fn claim(
        &mut self,
        slot: usize,
        view: usize,
        sps: &Arc<Sps>,
        frame_num: u32,
        poc: &Poc,
        non_existing: bool,
    ) -> i32 {
        let id = self.next_frame_id;
        self.next_frame_id = (id + 1) & 0x7fff_ffff;
        let s = &mut self.slots[slot];
        s.sps = Some(Arc::clone(sps));
        s.frame_num = frame_num;
        s.frame_id = id;
        s.top_poc = poc.top;
        s.bottom_poc = poc.bottom;
        s.long_term_idx = 0;
        s.non_existing = non_existing;
        self.reference &= !bit(slot);
        self.long_term &= !bit(slot);
        self.output &= !bit(slot);
        if view == 0 {
            self.second_views &= !bit(slot);
        } else {
            self.second_views |= bit(slot);
        }
        id
    }

    /// 清除一个视图的参考标记
    pub(crate) fn clear_view_references(&mut self, view: usize) {
        let keep = !self.view_slots(view);
        self.reference &= keep;
        self.long_term &= keep;
        self.max_long_term_idx[view] = None;
    }

    /// 清除全部参考标记
    pub(crate) fn clear_references(&mut self) {
        for view in 0..MAX_VIEWS {
            self.clear_view_references(view);
        }
    }

    /// 丢弃视图 `view` 的待输出帧
    pub(crate) fn drop_output(&mut self, view: usize) {
        self.output &= !self.view_slots(view);
    }

    /// 丢弃全部参考与待输出帧
    pub(crate) fn reset(&mut self) {
        self.clear_references();
        self.output = 0;
        self.last_output_poc = [None; MAX_VIEWS];
    }

    /// FrameNumWrap (8-27)
    fn frame_num_wrap(&self, slot: usize, cur_frame_num: u32, max_frame_num: u32) -> i32 {
        let f = self.slots[slot].frame_num;
        if f > cur_frame_num {
            f as i32 - max_frame_num as i32
        } else {
            f as i32
        }
    }

    /// 在 `scope` 掩码内按 PicNum 查找短期参考
    fn find_short(
        &self,
        scope: u32,
        pic_num: i32,
        cur_frame_num: u32,
        max_frame_num: u32,
    ) -> Option<usize> {
        slots_of(self.short_term() & scope)
            .find(|&s| self.frame_num_wrap(s, cur_frame_num, max_frame_num) == pic_num)
    }

    /// 视图 `view` 中 FrameNumWrap 最大的短期参考, 即解码顺序上最近的一帧
    pub(crate) fn most_recent_short(
        &self,
        view: usize,
        cur_frame_num: u32,
        max_frame_num: u32,
    ) -> Option<usize> {
        slots_of(self.short_term() & self.view_slots(view))
            .max_by_key(|&s| self.frame_num_wrap(s, cur_frame_num, max_frame_num))
    }

    fn find_long(&self, scope: u32, long_term_pic_num: u32) -> Option<usize> {
        slots_of(self.long_term & scope)
            .find(|&s| self.slots[s].long_term_idx == long_term_pic_num)
    }

    fn unmark(&mut self, slot: usize) {
        self.reference &= !bit(slot);
        self.long_term &= !bit(slot);
    }

    // ============================================================
    // 参考标记
    // ============================================================

    /// 滑动窗口 (8.2.5.3): 参考帧达到上限时移除 FrameNumWrap 最小的短期参考
    fn sliding_window(&mut self, sps: &Sps, cur: usize, cur_frame_num: u32) {
        let limit = sps.max_num_ref_frames.max(1);
        let scope = self.same_view(cur) & !bit(cur);
        loop {
            let others = self.reference & scope;
            let short = self.short_term() & scope;
            if others.count_ones() < limit || short == 0 {
                break;
            }
            let max = sps.max_frame_num();
            if let Some(oldest) =
                slots_of(short).min_by_key(|&s| self.frame_num_wrap(s, cur_frame_num, max))
            {
                self.unmark(oldest);
            }
        }
    }

    fn long_term_idx_allowed(&self, view: usize, idx: u32) -> bool {
        let max = self.max_long_term_idx[view];
        let ok = max.is_some_and(|m| idx <= m);
        if !ok {
            warn!("H264: LongTermFrameIdx 超过上限, idx={idx}, max={max:?}");
        }
        ok
    }

    fn apply_mmco(&mut self, op: MmcoOp, cur: usize, cur_frame_num: u32, sps: &Sps) -> bool {
        let max = sps.max_frame_num();
        let view = self.view_of(cur);
        let scope = self.same_view(cur);
        let pic_num_x = |diff: u32| cur_frame_num as i32 - diff as i32;
        match op {
            MmcoOp::ForgetShort {
                difference_of_pic_nums,
            } => match self.find_short(scope, pic_num_x(difference_of_pic_nums), cur_frame_num, max)
            {
                Some(s) => self.unmark(s),
                None => debug!("H264: MMCO1 目标不存在, diff={difference_of_pic_nums}"),
            },
            MmcoOp::ForgetLong { long_term_pic_num } => {
                if let Some(s) = self.find_long(scope, long_term_pic_num) {
                    self.unmark(s);
                }
            }
            MmcoOp::ConvertShortToLong {
                difference_of_pic_nums,
                long_term_frame_idx,
            } => {
                if !self.long_term_idx_allowed(view, long_term_frame_idx) {
                    return false;
                }
                match self.find_short(scope, pic_num_x(difference_of_pic_nums), cur_frame_num, max) {
                    Some(s) => {
                        if let Some(old) = self.find_long(scope, long_term_frame_idx) {
                            self.unmark(old);
                        }
                        self.long_term |= bit(s);
                        self.slots[s].long_term_idx = long_term_frame_idx;
                    }
                    None => debug!("H264: MMCO3 目标不存在, diff={difference_of_pic_nums}"),
                }
            }
            MmcoOp::TrimLong {
                max_long_term_frame_idx_plus1,
            } => {
                let stale: Vec<usize> = slots_of(self.long_term & scope)
                    .filter(|&s| self.slots[s].long_term_idx >= max_long_term_frame_idx_plus1)
                    .collect();
                for s in stale {
                    self.unmark(s);
                }
                self.max_long_term_idx[view] = max_long_term_frame_idx_plus1.checked_sub(1);
            }
            MmcoOp::ClearAll => {
                let keep = self.reference & bit(cur);
                self.clear_view_references(view);
                self.reference |= keep;
            }
            MmcoOp::MarkCurrentLong {
                long_term_frame_idx,
            } => {
                if !self.long_term_idx_allowed(view, long_term_frame_idx) {
                    return false;
                }
                if let Some(old) = self.find_long(scope, long_term_frame_idx) {
                    if old != cur {
                        self.unmark(old);
                    }
                }
                self.reference |= bit(cur);
                self.long_term |= bit(cur);
                self.slots[cur].long_term_idx = long_term_frame_idx;
                return true;
            }
        }
        false
    }

    /// 当前图像解码完成后的参考标记 (8.2.5)
    ///
    /// 返回当前图像是否含 MMCO5. 含 MMCO5 时槽位的 FrameNum 归零, POC 平移到以 0 为起点.
    pub(crate) fn mark_current(&mut self, cur: usize, hdr: &SliceHeader, sps: &Sps) -> bool {
        if !hdr.is_reference() {
            return false;
        }
        let m = &hdr.marking;
        let view = self.view_of(cur);
        if hdr.idr {
            self.clear_view_references(view);
            self.reference |= bit(cur);
            if m.long_term_reference {
                self.long_term |= bit(cur);
                self.slots[cur].long_term_idx = 0;
                self.max_long_term_idx[view] = Some(0);
            }
            return false;
        }

        let mut current_long = false;
        let mut mmco5 = false;
        if m.adaptive {
            for &op in &m.ops {
                mmco5 |= op == MmcoOp::ClearAll;
                current_long |= self.apply_mmco(op, cur, hdr.frame_num, sps);
            }
            let limit = sps.max_num_ref_frames.max(1);
            let others = self.reference & self.same_view(cur) & !bit(cur);
            if !current_long && others.count_ones() >= limit {
                warn!("H264: MMCO 后参考帧数超过上限, 按滑动窗口移除");
                self.sliding_window(sps, cur, hdr.frame_num);
            }
        } else {
            self.sliding_window(sps, cur, hdr.frame_num);
        }
        if !current_long {
            self.reference |= bit(cur);
            self.long_term &= !bit(cur);
        }
        if mmco5 {
            let s = &mut self.slots[cur];
            let base = s.poc();
            s.top_poc -= base;
            s.bottom_poc -= base;
            s.frame_num = 0;
        }
        mmco5
    }

    /// 为 frame_num 间隔补出的帧做滑动窗口标记
    pub(crate) fn mark_non_existing(&mut self, slot: usize, sps: &Sps) {
        let frame_num = self.slots[slot].frame_num;
        self.sliding_window(sps, slot, frame_num);
        self.reference |= bit(slot);
        self.long_term &= !bit(slot);
    }

    // ============================================================
    // 参考列表
    // ============================================================

    /// 构建当前切片的参考列表 (8.2.4), 元素为槽位号
    ///
    /// 列表先按初始化规则排序, 只取与当前图像同一视图的参考. 非基础视图的切片再把
    /// 同一访问单元的基础视图图像 `inter_view` 追加到每个列表末尾 (H.8.2.1).
    /// 然后执行修改操作, 最后截断或以末项补齐到 num_ref_idx_active.
    /// P/B 切片没有任何可用参考时返回 InvalidData.
    pub(crate) fn ref_lists(
        &self,
        hdr: &SliceHeader,
        sps: &Sps,
        cur: usize,
        cur_poc: i32,
        inter_view: Option<usize>,
    ) -> YingResult<[Vec<usize>; 2]> {
        let mut lists: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
        let n_lists = match hdr.slice_type {
            SliceType::I => return Ok(lists),
            SliceType::P => 1,
            SliceType::B => 2,
        };
        let max = sps.max_frame_num();
        let scope = self.same_view(cur) & !bit(cur);
        let short: Vec<usize> = slots_of(self.short_term() & scope).collect();
        let mut long: Vec<usize> = slots_of(self.long_term & scope).collect();
        long.sort_by_key(|&s| self.slots[s].long_term_idx);

        if n_lists == 1 {
            let mut l0 = short.clone();
            l0.sort_by_key(|&s| std::cmp::Reverse(self.frame_num_wrap(s, hdr.frame_num, max)));
            l0.extend(&long);
            lists[0] = l0;
        } else {
            let poc = |s: usize| self.slots[s].poc();
            let mut before: Vec<usize> = short.iter().copied().filter(|&s| poc(s) < cur_poc).collect();
            let mut after: Vec<usize> = short.iter().copied().filter(|&s| poc(s) > cur_poc).collect();
            before.sort_by_key(|&s| std::cmp::Reverse(poc(s)));
            after.sort_by_key(|&s| poc(s));
            let mut l0 = before.clone();
            l0.extend(&after);
            l0.extend(&long);
            let mut l1 = after;
            l1.extend(&before);
            l1.extend(&long);
            if l1.len() > 1 && l1 == l0 {
                l1.swap(0, 1);
            }
            lists = [l0, l1];
        }

        for (list, l) in lists.iter_mut().enumerate().take(n_lists) {
            l.extend(inter_view);
            let active = hdr.num_ref_idx_active[list] as usize;
            l.truncate(active);
            let ctx = ModifyContext {
                scope,
                cur_frame_num: hdr.frame_num,
                max_frame_num: max,
                inter_view,
            };
            self.modify_list(l, &hdr.ref_pic_list_mods[list], &ctx, active);
            let Some(&last) = l.last() else {
                return Err(YingError::InvalidData(format!(
                    "H264: 参考列表 {list} 为空, frame_num={}",
                    hdr.frame_num
                )));
            };
            l.resize(active, last);
        }
        Ok(lists)
    }

    /// ref_pic_list_modification (8.2.4.3, H.8.2.2.3)
    fn modify_list(
        &self,
        list: &mut Vec<usize>,
        mods: &[RefPicListMod],
        ctx: &ModifyContext,
        active: usize,
    ) {
        let max = ctx.max_frame_num as i32;
        let cur = ctx.cur_frame_num as i32;
        let mut pred = cur;
        for (idx, &m) in mods.iter().enumerate().take(active) {
            let target = match m {
                RefPicListMod::ShortTermSub(d) | RefPicListMod::ShortTermAdd(d) => {
                    let d = d as i32;
                    let mut no_wrap = if matches!(m, RefPicListMod::ShortTermSub(_)) {
                        pred - d
                    } else {
                        pred + d
                    };
                    if no_wrap < 0 {
                        no_wrap += max;
                    } else if no_wrap >= max {
                        no_wrap -= max;
                    }
                    pred = no_wrap;
                    let pic_num = if no_wrap > cur { no_wrap - max } else { no_wrap };
                    self.find_short(ctx.scope, pic_num, ctx.cur_frame_num, ctx.max_frame_num)
                }
                RefPicListMod::LongTerm(n) => self.find_long(ctx.scope, n),
                // 只有一个视图间参考, 任何视图索引都指向它
                RefPicListMod::InterView(_) => ctx.inter_view,
            };
            let Some(target) = target else {
                warn!("H264: 参考列表修改的目标图像不存在, op={m:?}");
                continue;
            };
            let pos = idx.min(list.len());
            list.insert(pos, target);
            if let Some(dup) = (pos + 1..list.len()).find(|&i| list[i] == target) {
                list.remove(dup);
            }
            list.truncate(active);
        }
    }

    // ============================================================
    // 输出调度
    // ============================================================

    /// 取出视图 `view` 中 POC 最小的待输出帧
    fn take_min_poc(&mut self, view: usize) -> Option<usize> {
        let slot = slots_of(self.output & self.view_slots(view))
            .min_by_key(|&s| self.slots[s].poc())?;
        self.output &= !bit(slot);
        let poc = self.slots[slot].poc();
        if self.last_output_poc[view].is_some_and(|last| poc <= last) {
            warn!("H264: 输出 POC 非递增, view={view} poc={poc}");
        }
        self.last_output_poc[view] = Some(poc);
        Some(slot)
    }

    /// 按 POC 顺序输出视图 `view` 的全部待输出帧, 并开始新的编码视频序列
    pub(crate) fn bump_all(&mut self, view: usize) -> Vec<usize> {
        let mut out = Vec::new();
        while let Some(s) = self.take_min_poc(view) {
            out.push(s);
        }
        self.last_output_poc[view] = None;
        out
    }

    /// 当前图像存入 DPB 后选出同一视图中可输出的帧, 按输出顺序返回
    pub(crate) fn store_and_bump(&mut self, cur: usize, sps: &Sps) -> Vec<usize> {
        if !self.slots[cur].non_existing {
            self.output |= bit(cur);
        }
        let view = self.view_of(cur);
        let scope = self.view_slots(view);
        let mut out = Vec::new();
        if self.reference & bit(cur) == 0 {
            let limit = self.slots[cur].poc();
            while slots_of(self.output & scope).any(|s| self.slots[s].poc() <= limit) {
                match self.take_min_poc(view) {
                    Some(s) => out.push(s),
                    None => break,
                }
            }
        }
        while (self.output & scope).count_ones() > sps.max_num_reorder_frames {
            match self.take_min_poc(view) {
                Some(s) => out.push(s),
                None => break,
            }
        }
        let limit = sps.max_dec_frame_buffering.max(1);
        while ((self.reference | self.output) & scope).count_ones() > limit {
            match self.take_min_poc(view) {
                Some(s) => out.push(s),
                None => break,
            }
        }
        out
    }

    /// 视图 `view` 的待输出帧数
    pub(crate) fn pending_output(&self, view: usize) -> u32 {
        (self.output & self.view_slots(view)).count_ones()
    }
}

/// 参考列表修改所需的上下文
struct ModifyContext {
    /// 当前视图中可作为参考的槽位
    scope: u32,
    cur_frame_num: u32,
    max_frame_num: u32,
    inter_view: Option<usize>,
}
