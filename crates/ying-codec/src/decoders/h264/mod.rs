//! H.264/AVC 视频解码器.
//!
//! 支持 8 位 4:2:0 逐行码流: CAVLC/CABAC 熵解码, 帧内/帧间预测, 加权预测,
//! 空间/时间直接模式, 8x8 变换与量化矩阵, 去块滤波, 参考帧管理 (POC 类型 0/1/2,
//! 滑动窗口与 MMCO) 以及多线程切片调度. 双视图 MVC 码流的两个视图都会解码,
//! 非基础视图以同一访问单元的基础视图图像作为视图间参考, 两个视图成对输出.
//!
//! 调用方逐个送入 NAL 单元 ([`H264Decoder::decode_nal`]), 按输出顺序取回
//! [`Frame`] ([`H264Decoder::get_frame`]).

pub mod cabac;
mod cabac_tables;
mod cavlc;
mod config;
mod deblock;
mod dpb;
mod inter;
mod intra;
mod macroblock;
mod mb_cabac;
mod mb_cavlc;
mod mvpred;
mod output;
mod parameter_sets;
mod picture;
mod reconstruct;
mod recovery;
mod scheduler;
mod slice_data;
mod slice_header;
mod tables;
mod transform;

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, trace, warn};
use ying_core::bitreader::{BitReader, find_start_code};
use ying_core::{YingError, YingResult};

use crate::parsers::h264::{
    NalHeader, NalHeaderExtension, NalUnitType, Sps, parse_sps, parse_subset_sps,
};
use dpb::{Dpb, MAX_VIEWS, Poc, PocState};
use output::{FrameInfo, ViewPicture};
use parameter_sets::ParamSets;
use recovery::recover_frame;
use scheduler::Scheduler;
use slice_data::{RefPic, SliceTask};
use slice_header::{SliceHeader, parse_slice_header};
use transform::LevelScale;

pub use config::{DecoderConfig, LogCallback};
pub use output::{Frame, FrameView};
pub use parameter_sets::{Pps, parse_pps};

/// 每个视图的输出队列与待输出帧的总数上限
const MAX_OUTPUT_FRAMES: usize = 16;

// ============================================================
// 解码器状态
// ============================================================

/// 正在接收切片的图像
struct CurrentPicture {
    slot: usize,
    /// 图像第一个切片的切片头
    header: SliceHeader,
    sps: Arc<Sps>,
    poc: Poc,
    /// 已提交的切片数
    slices: u32,
}

/// 按参数集缓存的反量化表
struct ScaleCache {
    sps: Arc<Sps>,
    pps: Arc<Pps>,
    scale: Arc<LevelScale>,
}

/// 每个视图独立维护的 POC 与输出状态
#[derive(Debug, Default)]
struct ViewState {
    poc_state: PocState,
    /// PrevRefFrameNum, None 表示还没有参考图像
    prev_ref_frame_num: Option<u32>,
    /// 已确定输出顺序、等待 get_frame 取走的槽位
    out_queue: VecDeque<usize>,
}

/// H.264 解码器
pub struct H264Decoder {
    config: DecoderConfig,
    sets: ParamSets,
    /// 当前编码视频序列的 SPS (基础视图)
    active_sps: Option<Arc<Sps>>,
    dpb: Dpb,
    views: [ViewState; MAX_VIEWS],
    current: Option<CurrentPicture>,
    /// 最近完成的基础视图图像, 是同一访问单元中非基础视图的视图间参考
    base_pic: Option<usize>,
    /// 码流含非基础视图, 两个视图成对输出
    mvc: bool,
    /// 已收到码流结束, 剩余帧不再等待配对
    draining: bool,
    /// 已解码的基础视图 IDR 数
    generation: u32,
    scale_cache: Option<ScaleCache>,
    sched: Scheduler,
}

impl H264Decoder {
    /// 创建解码器, 按配置启动工作线程
    pub fn new(config: DecoderConfig) -> YingResult<Self> {
        let sched = Scheduler::new(config.n_threads)?;
        Ok(Self {
            config,
            sets: ParamSets::default(),
            active_sps: None,
            dpb: Dpb::new(),
            views: Default::default(),
            current: None,
            base_pic: None,
            mvc: false,
            draining: false,
            generation: 0,
            scale_cache: None,
            sched,
        })
    }

    /// 向头信息回调发送一行摘要
    fn emit(&self, line: impl FnOnce() -> String) {
        if let Some(cb) = &self.config.log_callback {
            cb(&line());
        }
    }

    // ============================================================
    // 公共接口
    // ============================================================

    /// 解码一个 NAL 单元
    ///
    /// `nal` 从 NAL 头字节开始 (起始码之后), 可以延伸到后续数据, NAL 在下一个
    /// 起始码处结束. 返回值的第二项为该起始码之后的剩余数据; 结果为 WouldBlock、
    /// OutOfBuffers 或 OutOfMemory 时原样返回 `nal`, 调用方应在取走输出帧后重试.
    /// 空的 `nal` 表示码流结束: 输出全部剩余帧并返回 NoData.
    pub fn decode_nal<'a>(&mut self, nal: &'a [u8], non_blocking: bool) -> (YingResult<()>, &'a [u8]) {
        if nal.is_empty() {
            let res = self.drain().and(Err(YingError::NoData));
            return (res, nal);
        }
        let (unit, rest) = match find_start_code(nal) {
            Some(pos) => (&nal[..pos], &nal[pos + 3..]),
            None => (nal, &nal[nal.len()..]),
        };
        let res = self.dispatch(unit, non_blocking);
        if res.as_ref().err().is_some_and(YingError::is_retryable) {
            return (res, nal);
        }
        if let Err(e) = &res {
            warn!("{e}");
        }
        (res, rest)
    }

    /// 按输出顺序取下一帧
    ///
    /// 没有可输出的帧时返回 `Ok(None)`; MVC 码流中非基础视图尚未输出时也返回
    /// `Ok(None)`, 直到码流结束. 队首帧仍在解码时, 阻塞模式等待其完成, 非阻塞模式
    /// 返回 WouldBlock 且不改变输出队列. 返回的帧在丢弃前一直占用自己的 DPB 槽位.
    pub fn get_frame(&mut self, non_blocking: bool) -> YingResult<Option<Frame>> {
        let Some(&base) = self.views[0].out_queue.front() else {
            if self.draining && !self.views[1].out_queue.is_empty() {
                warn!(
                    "H264: 丢弃 {} 个没有基础视图的非基础视图帧",
                    self.views[1].out_queue.len()
                );
                self.views[1].out_queue.clear();
            }
            return Ok(None);
        };
        let second = match self.views[1].out_queue.front() {
            Some(&s) => Some(s),
            None if !self.mvc || self.draining => None,
            None if self.output_full(0) => {
                warn!("H264: 非基础视图缺失, 单独输出基础视图帧");
                None
            }
            None => return Ok(None),
        };
        let base_pic = self.view_picture(base, non_blocking)?;
        let mvc_pic = second
            .map(|s| self.view_picture(s, non_blocking))
            .transpose()?;
        let luma_stride = self.dpb.slots[base]
            .sps
            .as_ref()
            .map_or(0, |sps| sps.pic_width_in_mbs as usize * 16);
        self.sched.borrow(base)?;
        self.views[0].out_queue.pop_front();
        if let Some(s) = second {
            self.sched.borrow(s)?;
            self.views[1].out_queue.pop_front();
        }
        Ok(Some(Frame::new(
            Arc::clone(self.sched.shared()),
            base_pic,
            mvc_pic,
            luma_stride,
        )))
    }

    /// 归还输出帧, 等同于丢弃它
    pub fn release_frame(&mut self, frame: Frame) {
        drop(frame);
    }

    /// 等待进行中的任务结束, 丢弃待输出帧并清空参考状态 (保留参数集)
    pub fn flush(&mut self) {
        if let Err(e) = self.try_flush() {
            error!("H264: flush 失败: {e}");
        }
    }

    fn try_flush(&mut self) -> YingResult<()> {
        self.sched.wait_idle()?;
        if let Some(cur) = self.current.take() {
            self.sched.close_frame(cur.slot)?;
        }
        self.sched.wait_idle()?;
        self.dpb.reset();
        for v in &mut self.views {
            v.out_queue.clear();
        }
        self.reset_sequence();
        self.draining = false;
        debug!("H264: 解码器已 flush");
        Ok(())
    }

    // ============================================================
    // NAL 分发
    // ============================================================

    fn dispatch(&mut self, unit: &[u8], non_blocking: bool) -> YingResult<()> {
        let Some((&first, payload)) = unit.split_first() else {
            return Err(YingError::InvalidData("H264: 空 NAL 单元".into()));
        };
        let nal = NalHeader::parse(first)?;
        trace!(
            "H264: NAL type={} ref_idc={} len={}",
            nal.nal_type,
            nal.ref_idc,
            unit.len()
        );
        match nal.nal_type {
            NalUnitType::Slice | NalUnitType::SliceIdr => {
                self.handle_slice(&nal, None, payload, non_blocking)
            }
            NalUnitType::Sps => self.handle_sps(payload),
            NalUnitType::SubsetSps => self.handle_subset_sps(payload),
            NalUnitType::Pps => self.handle_pps(payload),
            NalUnitType::Aud => check_aud(payload),
            NalUnitType::Sei | NalUnitType::EndOfStream | NalUnitType::FillerData => Ok(()),
            NalUnitType::EndOfSequence => self.end_of_sequence(),
            NalUnitType::PrefixNal => {
                let ext = NalHeaderExtension::parse(payload)?;
                trace!("H264: 前缀 NAL view_id={}", ext.view_id);
                Ok(())
            }
            NalUnitType::SliceExtension => {
                let ext = NalHeaderExtension::parse(payload)?;
                self.handle_slice(&nal, Some(&ext), &payload[3..], non_blocking)
            }
            other => Err(YingError::Unsupported(format!(
                "H264: 不支持的 NAL 类型 {other}"
            ))),
        }
    }

    fn handle_sps(&mut self, payload: &[u8]) -> YingResult<()> {
        let sps = parse_sps(payload)?;
        sps.check_supported()?;
        self.emit(|| {
            format!(
                "SPS id={} profile={} level={} {}x{} ref={} reorder={}",
                sps.sps_id,
                sps.profile_idc,
                sps.level_idc,
                sps.width(),
                sps.height(),
                sps.max_num_ref_frames,
                sps.max_num_reorder_frames
            )
        });
        let id = sps.sps_id as usize;
        if self.sets.sps[id].as_deref() != Some(&sps) {
            self.sets.sps[id] = Some(Arc::new(sps));
        }
        Ok(())
    }

    /// 子集 SPS 只被非基础视图的切片引用
    fn handle_subset_sps(&mut self, payload: &[u8]) -> YingResult<()> {
        let sps = parse_subset_sps(payload)?;
        sps.check_supported()?;
        self.emit(|| {
            format!(
                "subset SPS id={} profile={} {}x{} ref={}",
                sps.sps_id,
                sps.profile_idc,
                sps.width(),
                sps.height(),
                sps.max_num_ref_frames
            )
        });
        let id = sps.sps_id as usize;
        if self.sets.subset_sps[id].as_deref() != Some(&sps) {
            self.sets.subset_sps[id] = Some(Arc::new(sps));
        }
        Ok(())
    }

    fn handle_pps(&mut self, payload: &[u8]) -> YingResult<()> {
        let mut pps = parse_pps(payload, None)?;
        // 量化矩阵的回退规则依赖所引用的 SPS
        if pps.scaling.is_some() {
            let id = pps.sps_id as usize;
            let sps = self.sets.sps[id].as_ref().or(self.sets.subset_sps[id].as_ref());
            if let Some(sps) = sps {
                pps = parse_pps(payload, Some(sps))?;
            }
        }
        self.emit(|| {
            format!(
                "PPS id={} sps={} cabac={} qp={} 8x8={}",
                pps.pps_id, pps.sps_id, pps.cabac, pps.pic_init_qp, pps.transform_8x8_mode
            )
        });
        let id = pps.pps_id as usize;
        if self.sets.pps[id].as_deref() != Some(&pps) {
            self.sets.pps[id] = Some(Arc::new(pps));
        }
        Ok(())
    }

    /// 序列结束: 输出全部帧, 下一图像须为 IDR
    fn end_of_sequence(&mut self) -> YingResult<()> {
        self.drain()?;
        self.dpb.clear_references();
        self.reset_sequence();
        debug!("H264: 序列结束");
        Ok(())
    }

    fn reset_sequence(&mut self) {
        self.current = None;
        self.base_pic = None;
        self.mvc = false;
        for v in &mut self.views {
            v.poc_state = PocState::default();
            v.prev_ref_frame_num = None;
        }
    }

    /// 结束当前图像并按 POC 顺序输出两个视图的全部待输出帧
    fn drain(&mut self) -> YingResult<()> {
        self.finish_picture()?;
        for view in 0..MAX_VIEWS {
            let out = self.dpb.bump_all(view);
            self.views[view].out_queue.extend(out);
        }
        self.draining = true;
        Ok(())
    }

    /// 视图的输出队列已满, 再开始新图像会返回 OutOfBuffers
    fn output_full(&self, view: usize) -> bool {
        self.views[view].out_queue.len() + self.dpb.pending_output(view) as usize + 1
            > MAX_OUTPUT_FRAMES
    }

    // ============================================================
    // 切片
    // ============================================================

    fn handle_slice(
        &mut self,
        nal: &NalHeader,
        ext: Option<&NalHeaderExtension>,
        payload: &[u8],
        non_blocking: bool,
    ) -> YingResult<()> {
        let (hdr, sps, pps) = parse_slice_header(payload, nal, ext, &self.sets)?;
        if hdr.redundant_pic_cnt > 0 {
            trace!("H264: 跳过冗余切片, redundant_pic_cnt={}", hdr.redundant_pic_cnt);
            return Ok(());
        }
        self.emit(|| {
            format!(
                "slice view={} type={:?} first_mb={} frame_num={} poc_lsb={} qp={} idr={}",
                hdr.view,
                hdr.slice_type,
                hdr.first_mb,
                hdr.frame_num,
                hdr.poc_lsb,
                hdr.slice_qp,
                hdr.idr
            )
        });
        self.draining = false;
        if hdr.view > 0 {
            self.mvc = true;
        }

        let new_picture = self
            .current
            .as_ref()
            .is_none_or(|cur| hdr.starts_new_picture(&cur.header));
        if new_picture {
            self.finish_picture()?;
            if let Err(e) = self.start_picture(&hdr, &sps, non_blocking) {
                // 无法解码的非基础视图不再阻塞基础视图的输出
                if hdr.view > 0 && !e.is_retryable() {
                    self.mvc = false;
                }
                return Err(e);
            }
        }
        let Some(cur) = &self.current else {
            return Err(YingError::Internal("H264: 没有正在解码的图像".into()));
        };
        let (slot, poc) = (cur.slot, cur.poc.frame());
        let inter_view = if hdr.view > 0 { self.base_pic } else { None };

        let lists = self.dpb.ref_lists(&hdr, &sps, slot, poc, inter_view)?;
        let mut deps = 0u32;
        let refs = lists.map(|list| {
            list.into_iter()
                .map(|s| {
                    deps |= 1 << s;
                    let f = &self.dpb.slots[s];
                    RefPic {
                        pic: Arc::clone(&f.pic),
                        frame_id: f.frame_id,
                        poc: f.poc(),
                        // 视图间参考按长期参考处理 (不做时间缩放)
                        long_term: self.dpb.long_term & (1 << s) != 0 || inter_view == Some(s),
                    }
                })
                .collect()
        });
        let scale = self.level_scale(&sps, &pps);

        let idx = self.sched.reserve(non_blocking)?;
        let Some(cur) = &mut self.current else {
            self.sched.cancel(idx)?;
            return Err(YingError::Internal("H264: 没有正在解码的图像".into()));
        };
        cur.slices += 1;
        let task = SliceTask {
            header: hdr,
            sps,
            pps,
            scale,
            payload: Bytes::copy_from_slice(payload),
            slice_num: cur.slices,
            target: Arc::clone(&self.dpb.slots[slot].pic),
            poc,
            refs,
        };
        match self.sched.submit(idx, task, slot, deps)? {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn level_scale(&mut self, sps: &Arc<Sps>, pps: &Arc<Pps>) -> Arc<LevelScale> {
        if let Some(c) = &self.scale_cache {
            if Arc::ptr_eq(&c.sps, sps) && Arc::ptr_eq(&c.pps, pps) {
                return Arc::clone(&c.scale);
            }
        }
        let scale = Arc::new(LevelScale::new(&pps.effective_scaling(sps)));
        self.scale_cache = Some(ScaleCache {
            sps: Arc::clone(sps),
            pps: Arc::clone(pps),
            scale: Arc::clone(&scale),
        });
        scale
    }

    // ============================================================
    // 图像边界
    // ============================================================

    /// 基础视图的新图像激活 SPS, 序列格式变化时输出并清空两个视图
    fn activate_sps(&mut self, hdr: &SliceHeader, sps: &Arc<Sps>) -> YingResult<()> {
        match &self.active_sps {
            Some(active) if !active.same_format(sps) => {
                if !hdr.idr {
                    return Err(YingError::InvalidData(
                        "H264: 非 IDR 图像切换了序列格式".into(),
                    ));
                }
                debug!(
                    "H264: 序列格式变化 {}x{} -> {}x{}",
                    active.width(),
                    active.height(),
                    sps.width(),
                    sps.height()
                );
                for view in 0..MAX_VIEWS {
                    let out = self.dpb.bump_all(view);
                    self.views[view].out_queue.extend(out);
                }
                self.dpb.clear_references();
            }
            None if !hdr.idr => warn!("H264: 码流不以 IDR 开始, frame_num={}", hdr.frame_num),
            _ => {}
        }
        self.active_sps = Some(Arc::clone(sps));
        Ok(())
    }

    /// 新图像的第一个切片: 激活 SPS, 处理 IDR 与 frame_num 间隔, 分配槽位
    ///
    /// 非基础视图沿用基础视图的帧尺寸. 返回可重试错误时不留下任何部分状态,
    /// 重试会重新走一遍.
    fn start_picture(&mut self, hdr: &SliceHeader, sps: &Arc<Sps>, non_blocking: bool) -> YingResult<()> {
        let view = hdr.view;
        if self.output_full(view) {
            return Err(YingError::OutOfBuffers);
        }

        if view == 0 {
            self.activate_sps(hdr, sps)?;
            self.base_pic = None;
        } else {
            match &self.active_sps {
                Some(active) if !active.same_geometry(sps) => {
                    return Err(YingError::Unsupported(format!(
                        "H264: 非基础视图尺寸 {}x{} 与基础视图 {}x{} 不同",
                        sps.width(),
                        sps.height(),
                        active.width(),
                        active.height()
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(YingError::InvalidData(
                        "H264: 非基础视图切片之前没有基础视图图像".into(),
                    ));
                }
            }
            if self.base_pic.is_none() {
                warn!("H264: 非基础视图缺少同一访问单元的基础视图图像");
            }
        }

        if hdr.idr {
            if hdr.marking.no_output_of_prior_pics {
                self.dpb.drop_output(view);
            } else {
                let out = self.dpb.bump_all(view);
                self.views[view].out_queue.extend(out);
            }
            self.dpb.clear_view_references(view);
            if view == 0 {
                self.generation += 1;
            }
        } else if let Some(prev) = self.views[view].prev_ref_frame_num {
            let max = sps.max_frame_num();
            if hdr.frame_num != prev && hdr.frame_num != (prev + 1) % max {
                if !sps.gaps_in_frame_num_allowed {
                    warn!(
                        "H264: frame_num 不连续, view={view} prev={prev} cur={}",
                        hdr.frame_num
                    );
                }
                self.fill_frame_num_gap(sps, view, prev, hdr.frame_num, non_blocking)?;
            }
        }

        let poc = self.views[view].poc_state.compute(sps, hdr);
        let slot = self.alloc_slot(non_blocking)?;
        let frame_id = self.dpb.claim(slot, view, sps, hdr.frame_num, &poc, false);
        let pic = Arc::clone(&self.dpb.slots[slot].pic);
        {
            let mut data = pic.write()?;
            data.reset(
                sps.pic_width_in_mbs as usize,
                sps.pic_height_in_mbs as usize,
            );
            data.generation = self.generation;
        }
        self.sched.begin_frame(slot, pic, sps.mb_count())?;
        debug!(
            "H264: 新图像 view={view} slot={slot} id={frame_id} frame_num={} poc={}",
            hdr.frame_num,
            poc.frame()
        );
        self.current = Some(CurrentPicture {
            slot,
            header: hdr.clone(),
            sps: Arc::clone(sps),
            poc,
            slices: 0,
        });
        Ok(())
    }

    /// 结束当前图像: 参考标记、POC 状态更新与输出调度
    fn finish_picture(&mut self) -> YingResult<()> {
        let Some(cur) = self.current.take() else {
            return Ok(());
        };
        let view = cur.header.view;
        self.sched.close_frame(cur.slot)?;
        let mmco5 = self.dpb.mark_current(cur.slot, &cur.header, &cur.sps);
        let state = &mut self.views[view];
        if mmco5 {
            state.out_queue.extend(self.dpb.bump_all(view));
        }
        state.poc_state.update(&cur.header, &cur.poc, mmco5);
        if cur.header.is_reference() {
            state.prev_ref_frame_num = Some(if mmco5 { 0 } else { cur.header.frame_num });
        }
        state.out_queue.extend(self.dpb.store_and_bump(cur.slot, &cur.sps));
        if view == 0 {
            self.base_pic = Some(cur.slot);
        }
        Ok(())
    }

    /// 补出 frame_num 间隔中缺失的参考帧 (8.2.5.2)
    ///
    /// 只有最后 max_num_ref_frames 帧可能留在参考列表中, 更早的帧只推进 POC 状态.
    fn fill_frame_num_gap(
        &mut self,
        sps: &Arc<Sps>,
        view: usize,
        prev: u32,
        target: u32,
        non_blocking: bool,
    ) -> YingResult<()> {
        let max = sps.max_frame_num();
        let gap = (target + max - prev - 1) % max;
        let keep = sps.max_num_ref_frames.max(1);
        debug!("H264: 补出 {gap} 个不存在的帧, view={view} frame_num {prev} -> {target}");
        for k in 0..gap {
            let frame_num = (prev + 1 + k) % max;
            let mut hdr = SliceHeader::non_existing(frame_num);
            hdr.view = view;
            let poc = self.views[view].poc_state.compute(sps, &hdr);
            if gap - k <= keep {
                let source = self
                    .dpb
                    .most_recent_short(view, frame_num, max)
                    .map(|s| Arc::clone(&self.dpb.slots[s].pic));
                let slot = self.alloc_slot(non_blocking)?;
                self.dpb.claim(slot, view, sps, frame_num, &poc, true);
                let pic = Arc::clone(&self.dpb.slots[slot].pic);
                {
                    let mut data = pic.write()?;
                    data.reset(
                        sps.pic_width_in_mbs as usize,
                        sps.pic_height_in_mbs as usize,
                    );
                    data.generation = self.generation;
                    data.conceal_ref = source;
                    recover_frame(&mut data);
                    data.conceal_ref = None;
                }
                self.sched.mark_done(slot, pic)?;
                self.dpb.mark_non_existing(slot, sps);
            }
            self.views[view].poc_state.update(&hdr, &poc, false);
            self.views[view].prev_ref_frame_num = Some(frame_num);
        }
        Ok(())
    }

    /// 分配一个可复用的帧槽位
    ///
    /// 槽位全部被参考、待输出或借出时返回 OutOfBuffers; 只是被进行中的任务占用时
    /// 等待任务结束 (非阻塞模式返回 WouldBlock).
    fn alloc_slot(&self, non_blocking: bool) -> YingResult<usize> {
        let queued = self
            .views
            .iter()
            .flat_map(|v| v.out_queue.iter())
            .fold(0u32, |m, &s| m | 1 << s);
        let current = self.current.as_ref().map_or(0, |c| 1u32 << c.slot);
        let base = self.base_pic.map_or(0, |s| 1u32 << s);
        loop {
            let occ = self.sched.occupancy()?;
            let held = queued | current | base | occ.borrowed;
            if self.dpb.free_slot(held).is_none() {
                return Err(YingError::OutOfBuffers);
            }
            if let Some(slot) = self.dpb.free_slot(held | occ.busy) {
                return Ok(slot);
            }
            if non_blocking {
                return Err(YingError::WouldBlock);
            }
            self.sched.wait_change(occ.generation)?;
        }
    }

    /// 截取一个已完成槽位的输出信息; 帧仍在解码时按 `non_blocking` 等待或返回 WouldBlock
    fn view_picture(&self, slot: usize, non_blocking: bool) -> YingResult<ViewPicture> {
        let error = self.sched.wait_frame(slot, non_blocking)?;
        let f = &self.dpb.slots[slot];
        let sps = f
            .sps
            .as_ref()
            .ok_or_else(|| YingError::Internal(format!("H264: 槽位 {slot} 没有 SPS")))?;
        let info = FrameInfo {
            width: sps.width(),
            height: sps.height(),
            crop_left: sps.crop_left,
            crop_top: sps.crop_top,
            frame_id: f.frame_id,
            poc: f.poc(),
            error,
        };
        ViewPicture::new(slot, Arc::clone(&f.pic), info)
    }
}

impl std::fmt::Debug for H264Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("H264Decoder")
            .field("config", &self.config)
            .field("reference", &format_args!("{:#010x}", self.dpb.reference))
            .field("output", &format_args!("{:#010x}", self.dpb.output))
            .field("second_views", &format_args!("{:#010x}", self.dpb.second_views))
            .field("queued", &[self.views[0].out_queue.len(), self.views[1].out_queue.len()])
            .field("mvc", &self.mvc)
            .finish()
    }
}

/// 访问单元分隔符只含 primary_pic_type 与尾随位
fn check_aud(payload: &[u8]) -> YingResult<()> {
    let mut br = BitReader::new(payload);
    let primary_pic_type = br.read_bits(3);
    if br.overrun() > 0 || !br.is_rbsp_end() {
        return Err(YingError::InvalidData("H264: AUD 语法错误".into()));
    }
    trace!("H264: AUD primary_pic_type={primary_pic_type}");
    Ok(())
}
