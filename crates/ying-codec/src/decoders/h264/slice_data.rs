//! 切片数据解码 (7.3.4): 宏块循环与运动信息推导.
//!
//! 一个 [`SliceTask`] 由一个线程完整解码. 任务持有目标图像的写锁与参考图像的读锁,
//! 宏块按光栅顺序逐个解析 ([`super::mb_cavlc`], [`super::mb_cabac`]) 并重建
//! ([`super::reconstruct`]).

use std::sync::Arc;

use bytes::Bytes;
use log::{trace, warn};
use ying_core::bitreader::BitReader;
use ying_core::{YingError, YingResult};

use super::cabac::CabacDecoder;
use super::inter::PredBuf;
use super::macroblock::{MbCtx, MbFlags, MbInfo, Residual};
use super::mvpred::{
    Colocated, PartShape, SpatialDirect, col_zero, dist_scale_factor, map_col_to_list0,
    neighbors, p_skip_mv, predict_mv, spatial_direct, spatial_direct_block, temporal_direct_mv,
};
use super::parameter_sets::Pps;
use super::picture::{DeblockParams, Picture, PictureData};
use super::slice_header::{SliceHeader, SliceType};
use super::tables::{BLK_TO_RASTER, MbType, Partition, SubMbType, chroma_qp, raster_to_blk8};
use super::transform::LevelScale;
use crate::parsers::h264::sps::Sps;

/// 参考列表中的一项
#[derive(Clone)]
pub(crate) struct RefPic {
    pub(crate) pic: Arc<Picture>,
    pub(crate) frame_id: i32,
    pub(crate) poc: i32,
    pub(crate) long_term: bool,
}

/// 一个切片的完整解码上下文
pub(crate) struct SliceTask {
    pub(crate) header: SliceHeader,
    pub(crate) sps: Arc<Sps>,
    pub(crate) pps: Arc<Pps>,
    pub(crate) scale: Arc<LevelScale>,
    /// NAL 头之后的载荷 (含防竞争字节), 止于下一个起始码
    pub(crate) payload: Bytes,
    /// 图像内的切片编号, 从 1 开始
    pub(crate) slice_num: u32,
    pub(crate) target: Arc<Picture>,
    pub(crate) poc: i32,
    pub(crate) refs: [Vec<RefPic>; 2],
}

/// 切片解码结果
#[derive(Debug)]
pub(crate) struct SliceOutcome {
    /// 首次写入的宏块数
    pub(crate) fresh: u32,
    pub(crate) error: Option<YingError>,
}

/// 单个宏块解析出的、不进入宏块网格的语法元素
#[derive(Clone)]
pub(crate) struct MbSyntax {
    pub(crate) mb_type: MbType,
    pub(crate) sub: [SubMbType; 4],
    /// 帧内 NxN 预测模式语法, 按块序; None 表示 prev_intra_pred_mode_flag = 1
    pub(crate) intra_rem: [Option<u8>; 16],
    /// 分区左上角 4x4 光栅位置上的 mvd
    pub(crate) mvd: [[[i32; 2]; 16]; 2],
    pub(crate) pcm: [u8; 384],
}

impl Default for MbSyntax {
    fn default() -> Self {
        Self {
            mb_type: MbType::INxN,
            sub: [SubMbType::default(); 4],
            intra_rem: [None; 16],
            mvd: [[[0; 2]; 16]; 2],
            pcm: [0; 384],
        }
    }
}

pub(crate) fn malformed(what: &str) -> YingError {
    YingError::InvalidData(format!("H264: 畸形切片数据, {what}"))
}

/// 解码一个切片
///
/// 码流错误不会作为 `Err` 返回, 而是在完成修复后记录在 [`SliceOutcome::error`] 中;
/// `Err` 只用于锁中毒等内部错误.
pub(crate) fn decode_slice(task: &SliceTask) -> YingResult<SliceOutcome> {
    let mut guard = task.target.write()?;

    // 同一参考图像在列表中可能出现多次, 只加一次读锁
    let mut unique: Vec<&Arc<Picture>> = Vec::new();
    let mut map: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for (list, entries) in task.refs.iter().enumerate() {
        for r in entries {
            if Arc::ptr_eq(&r.pic, &task.target) {
                return Err(YingError::Internal("H264: 参考列表包含当前图像".into()));
            }
            let idx = match unique.iter().position(|p| Arc::ptr_eq(p, &r.pic)) {
                Some(i) => i,
                None => {
                    unique.push(&r.pic);
                    unique.len() - 1
                }
            };
            map[list].push(idx);
        }
    }
    let guards = unique
        .iter()
        .map(|p| p.read())
        .collect::<YingResult<Vec<_>>>()?;
    let refs: [Vec<&PictureData>; 2] = [0, 1].map(|l| map[l].iter().map(|&i| &*guards[i]).collect());

    let pic: &mut PictureData = &mut guard;
    let n = task.slice_num as usize;
    if pic.slices.len() < n {
        pic.slices.resize(n, DeblockParams::default());
    }
    pic.slices[n - 1] = DeblockParams {
        disable_idc: task.header.disable_deblocking_filter_idc,
        offset_a: task.header.filter_offset_a,
        offset_b: task.header.filter_offset_b,
    };
    if let Some(r) = task.refs[0].first() {
        pic.conceal_ref = Some(Arc::clone(&r.pic));
    }

    let mut dec = SliceDecoder::new(task, pic, refs);
    let mut br = BitReader::new(&task.payload);
    br.skip_bits(task.header.data_bit_offset);
    let result = if task.pps.cabac {
        let mut cabac = CabacDecoder::new(br);
        dec.run_cabac(&mut cabac)
    } else {
        dec.run_cavlc(&mut br)
    };
    let error = match result {
        Ok(()) => None,
        Err(e) if matches!(e, YingError::Internal(_)) => return Err(e),
        Err(e) => {
            warn!(
                "H264: 切片解码失败, first_mb={} 已解码至 {}: {e}",
                task.header.first_mb, dec.next_mb
            );
            dec.conceal_slice()?;
            Some(e)
        }
    };
    trace!(
        "H264: 切片完成 slice_num={} 新宏块数={}",
        task.slice_num, dec.fresh
    );
    Ok(SliceOutcome {
        fresh: dec.fresh,
        error,
    })
}

/// 切片解码器
pub(crate) struct SliceDecoder<'a> {
    pub(crate) task: &'a SliceTask,
    pub(crate) hdr: &'a SliceHeader,
    pub(crate) pps: &'a Pps,
    pub(crate) pic: &'a mut PictureData,
    pub(crate) refs: [Vec<&'a PictureData>; 2],
    pub(crate) ctx: MbCtx,
    /// 当前 QP'Y
    pub(crate) qp: i32,
    /// 解码顺序上前一个宏块的 mb_qp_delta 是否非零
    pub(crate) last_dqp_nonzero: bool,
    pub(crate) res: Residual,
    pub(crate) syn: MbSyntax,
    pub(crate) pred: [PredBuf; 2],
    spatial: Option<SpatialDirect>,
    pub(crate) first_mb: usize,
    /// 最后一个已开始解码的宏块之后的地址
    pub(crate) next_mb: usize,
    pub(crate) fresh: u32,
}

impl<'a> SliceDecoder<'a> {
    pub(crate) fn new(
        task: &'a SliceTask,
        pic: &'a mut PictureData,
        refs: [Vec<&'a PictureData>; 2],
    ) -> Self {
        let first_mb = task.header.first_mb as usize;
        let ctx = MbCtx::new(&pic.mbs, pic.width_mbs, first_mb, task.slice_num);
        Self {
            task,
            hdr: &task.header,
            pps: &task.pps,
            pic,
            refs,
            ctx,
            qp: task.header.slice_qp,
            last_dqp_nonzero: false,
            res: Residual::default(),
            syn: MbSyntax::default(),
            pred: [PredBuf::default(), PredBuf::default()],
            spatial: None,
            first_mb,
            next_mb: first_mb,
            fresh: 0,
        }
    }

    #[inline]
    pub(crate) fn slice_type(&self) -> SliceType {
        self.hdr.slice_type
    }

    #[inline]
    pub(crate) fn cur(&self) -> &MbInfo {
        &self.pic.mbs[self.ctx.addr]
    }

    #[inline]
    pub(crate) fn cur_mut(&mut self) -> &mut MbInfo {
        &mut self.pic.mbs[self.ctx.addr]
    }

    /// 可选邻居宏块
    #[inline]
    pub(crate) fn mb_at(&self, addr: Option<usize>) -> Option<&MbInfo> {
        addr.map(|a| &self.pic.mbs[a])
    }

    // ============================================================
    // 宏块循环
    // ============================================================

    fn run_cavlc(&mut self, br: &mut BitReader<'_>) -> YingResult<()> {
        let mb_count = self.pic.mbs.len();
        let mut addr = self.first_mb;
        loop {
            if self.slice_type() != SliceType::I {
                let run = br.read_ue(mb_count as u32) as usize;
                for _ in 0..run {
                    if addr >= mb_count {
                        return Err(malformed("mb_skip_run 越过图像末尾"));
                    }
                    self.begin_mb(addr);
                    self.decode_skip()?;
                    addr += 1;
                }
                if run > 0 && !br.more_rbsp_data() {
                    break;
                }
            }
            if addr >= mb_count {
                return Err(malformed("宏块数超过图像大小"));
            }
            self.begin_mb(addr);
            self.parse_mb_cavlc(br)?;
            if br.overrun() > 0 {
                return Err(malformed("宏块数据被截断"));
            }
            self.reconstruct()?;
            addr += 1;
            if !br.more_rbsp_data() {
                break;
            }
        }
        if br.overrun() > 0 || !br.is_rbsp_end() {
            return Err(malformed("rbsp_slice_trailing_bits 错误"));
        }
        Ok(())
    }

    fn run_cabac(&mut self, cabac: &mut CabacDecoder<'_>) -> YingResult<()> {
        if cabac.start() {
            return Err(malformed("cabac_alignment_one_bit 不为 1"));
        }
        let table = match self.slice_type() {
            SliceType::I => 0,
            _ => self.hdr.cabac_init_idc as usize + 1,
        };
        cabac.init_contexts(self.hdr.slice_qp, table);

        let mb_count = self.pic.mbs.len();
        let mut addr = self.first_mb;
        loop {
            if addr >= mb_count {
                return Err(malformed("宏块数超过图像大小"));
            }
            self.begin_mb(addr);
            let skip = self.slice_type() != SliceType::I && self.decode_skip_flag(cabac);
            if skip {
                self.decode_skip()?;
            } else {
                self.parse_mb_cabac(cabac)?;
                if cabac.reader().overrun() > 0 {
                    return Err(malformed("宏块数据被截断"));
                }
                self.reconstruct()?;
            }
            addr += 1;
            if cabac.decode_terminate() == 1 {
                break;
            }
        }
        if cabac.reader().overrun() > 0 || !cabac.reader().stop_bit_consumed() {
            return Err(malformed("end_of_slice_flag 与 rbsp_stop_one_bit 不一致"));
        }
        Ok(())
    }

    /// 开始解码宏块 `addr`: 重置网格记录并建立邻居上下文
    pub(crate) fn begin_mb(&mut self, addr: usize) {
        let qp = self.qp_triple(self.qp);
        let mb = &mut self.pic.mbs[addr];
        if mb.slice_num == 0 {
            self.fresh += 1;
        }
        *mb = MbInfo {
            slice_num: self.task.slice_num,
            qp,
            ..MbInfo::default()
        };
        self.ctx = MbCtx::new(&self.pic.mbs, self.pic.width_mbs, addr, self.task.slice_num);
        self.res.clear();
        self.syn.mb_type = MbType::INxN;
        self.syn.sub = [SubMbType::default(); 4];
        self.syn.intra_rem = [None; 16];
        self.syn.mvd = [[[0; 2]; 16]; 2];
        self.spatial = None;
        self.next_mb = addr + 1;
    }

    /// 记录 mb_type 并设置对应的宏块标志
    pub(crate) fn set_mb_type(&mut self, t: MbType) {
        self.syn.mb_type = t;
        let mb = &mut self.pic.mbs[self.ctx.addr];
        mb.flags = match t {
            MbType::INxN => MbFlags::INTRA,
            MbType::I16x16 {
                cbp_chroma,
                cbp_luma,
                ..
            } => {
                mb.cbp = cbp_luma | (cbp_chroma << 4);
                MbFlags::INTRA | MbFlags::INTRA16X16
            }
            MbType::IPcm => MbFlags::INTRA | MbFlags::PCM,
            MbType::PSkip => MbFlags::SKIP,
            MbType::BSkip => MbFlags::SKIP | MbFlags::DIRECT16X16,
            MbType::BDirect16x16 => MbFlags::DIRECT16X16,
            MbType::Inter { .. } | MbType::P8x8 { .. } | MbType::B8x8 => MbFlags::empty(),
        };
    }

    pub(crate) fn qp_triple(&self, qp: i32) -> [u8; 3] {
        [
            qp as u8,
            chroma_qp(qp, self.pps.chroma_qp_index_offset),
            chroma_qp(qp, self.pps.second_chroma_qp_index_offset),
        ]
    }

    /// 应用 mb_qp_delta, QP 在 [0, 51] 内回绕
    pub(crate) fn apply_qp_delta(&mut self, dqp: i32) -> YingResult<()> {
        if !(-26..=25).contains(&dqp) {
            return Err(malformed("mb_qp_delta 超出范围"));
        }
        self.qp = (self.qp + dqp + 52) % 52;
        self.last_dqp_nonzero = dqp != 0;
        let qp = self.qp_triple(self.qp);
        self.cur_mut().qp = qp;
        Ok(())
    }

    /// 读取 I_PCM 样本后设置宏块记录
    pub(crate) fn finish_pcm(&mut self) {
        let qp = self.qp_triple(0);
        let mb = self.cur_mut();
        mb.cbp = 0x2F;
        mb.nnz = [16; 24];
        mb.cbf = (1 << 27) - 1;
        mb.qp = qp;
        self.last_dqp_nonzero = false;
    }

    /// P_Skip / B_Skip 宏块
    pub(crate) fn decode_skip(&mut self) -> YingResult<()> {
        match self.slice_type() {
            SliceType::P => {
                self.set_mb_type(MbType::PSkip);
                let n = neighbors(&self.pic.mbs, &self.ctx, 0, 0, 0, 4);
                let mv = p_skip_mv(n);
                self.store_motion((0, 0, 4, 4), [0, -1], [mv, [0, 0]]);
            }
            SliceType::B => {
                self.set_mb_type(MbType::BSkip);
                self.derive_direct(0xF)?;
            }
            SliceType::I => return Err(malformed("I 切片中出现跳过宏块")),
        }
        self.last_dqp_nonzero = false;
        self.motion_compensate()
    }

    // ============================================================
    // 帧内预测模式
    // ============================================================

    /// 邻居宏块能否用于帧内预测 (constrained_intra_pred_flag)
    #[inline]
    pub(crate) fn intra_usable(&self, mb: &MbInfo) -> bool {
        !self.pps.constrained_intra_pred || mb.is_intra()
    }

    /// 左上角位于 4x4 坐标 (x, y) 的块的预测模式 predIntraNxNPredMode
    pub(crate) fn predicted_intra_mode(&self, x: i32, y: i32) -> u8 {
        let mode = |pos: Option<(usize, usize)>| -> Option<u8> {
            let (addr, raster) = pos?;
            let mb = &self.pic.mbs[addr];
            if !self.intra_usable(mb) {
                return None;
            }
            Some(if mb.is_intra_nxn() {
                mb.intra_modes[raster]
            } else {
                2
            })
        };
        match (
            mode(self.ctx.locate(x - 1, y)),
            mode(self.ctx.locate(x, y - 1)),
        ) {
            (Some(a), Some(b)) => a.min(b),
            _ => 2,
        }
    }

    /// 根据 prev/rem 语法确定 I_NxN 的预测模式并写入网格
    pub(crate) fn resolve_intra_modes(&mut self, transform_8x8: bool) {
        let (count, size) = if transform_8x8 { (4, 2) } else { (16, 1) };
        for blk in 0..count {
            let raster = if transform_8x8 {
                super::tables::BLK8_TO_RASTER[blk]
            } else {
                BLK_TO_RASTER[blk]
            };
            let (x, y) = ((raster & 3) as i32, (raster >> 2) as i32);
            let pred = self.predicted_intra_mode(x, y);
            let mode = match self.syn.intra_rem[blk] {
                None => pred,
                Some(rem) if rem < pred => rem,
                Some(rem) => rem + 1,
            };
            let mb = &mut self.pic.mbs[self.ctx.addr];
            for dy in 0..size {
                for dx in 0..size {
                    mb.intra_modes[raster + dy * 4 + dx] = mode;
                }
            }
        }
    }

    // ============================================================
    // 运动信息
    // ============================================================

    /// 写入矩形区域 (4x4 块单位) 的参考索引与运动矢量
    pub(crate) fn store_motion(
        &mut self,
        rect: (usize, usize, usize, usize),
        ref_idx: [i32; 2],
        mv: [[i32; 2]; 2],
    ) {
        let (x0, y0, w, h) = rect;
        let ids = [0, 1].map(|l| {
            usize::try_from(ref_idx[l])
                .ok()
                .and_then(|r| self.task.refs[l].get(r))
                .map_or(-1, |r| r.frame_id)
        });
        let mb = &mut self.pic.mbs[self.ctx.addr];
        for list in 0..2 {
            let used = ref_idx[list] >= 0;
            let v = if used { mv[list] } else { [0, 0] };
            let v = v.map(|c| c.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16);
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    let r = y * 4 + x;
                    mb.mv[list][r] = v;
                    let b8 = raster_to_blk8(r);
                    mb.ref_idx[list][b8] = if used { ref_idx[list] as i8 } else { -1 };
                    mb.ref_pic[list][b8] = ids[list];
                }
            }
        }
    }

    /// 由解析出的 ref_idx 与 mvd 推导整个宏块的运动矢量
    pub(crate) fn derive_motion(&mut self) -> YingResult<()> {
        match self.syn.mb_type {
            MbType::Inter { part, dirs } => {
                for p in 0..part.count() {
                    let rect = part.rect(p);
                    let shape = match (part, p) {
                        (Partition::P16x8, 0) => PartShape::Top16x8,
                        (Partition::P16x8, _) => PartShape::Bottom16x8,
                        (Partition::P8x16, 0) => PartShape::Left8x16,
                        (Partition::P8x16, _) => PartShape::Right8x16,
                        _ => PartShape::Other,
                    };
                    self.derive_partition(rect, dirs[p], shape);
                }
            }
            MbType::P8x8 { .. } | MbType::B8x8 => {
                for b8 in 0..4 {
                    let sub = self.syn.sub[b8];
                    if sub.is_direct() {
                        self.derive_direct(1 << b8)?;
                        continue;
                    }
                    for j in 0..sub.count() {
                        let rect = sub_rect(b8, sub, j);
                        self.derive_partition(rect, sub.dir, PartShape::Other);
                    }
                }
            }
            MbType::BDirect16x16 => self.derive_direct(0xF)?,
            _ => {}
        }
        Ok(())
    }

    fn derive_partition(&mut self, rect: (usize, usize, usize, usize), dir: u8, shape: PartShape) {
        let (x, y, w, _) = rect;
        let raster = y * 4 + x;
        let b8 = raster_to_blk8(raster);
        let mut ref_idx = [-1; 2];
        let mut mv = [[0; 2]; 2];
        for list in 0..2 {
            if dir & (1 << list) == 0 {
                continue;
            }
            let r = i32::from(self.cur().ref_idx[list][b8]).max(0);
            let n = neighbors(&self.pic.mbs, &self.ctx, list, x, y, w);
            let mvp = predict_mv(n, r, shape);
            let mvd = self.syn.mvd[list][raster];
            ref_idx[list] = r;
            mv[list] = [mvp[0] + mvd[0], mvp[1] + mvd[1]];
        }
        self.store_motion(rect, ref_idx, mv);
    }

    /// B 直接模式, `mask` 的第 i 位表示 8x8 块 i
    pub(crate) fn derive_direct(&mut self, mask: u8) -> YingResult<()> {
        let col_pic = *self.refs[1]
            .first()
            .ok_or_else(|| malformed("直接预测缺少 RefPicList1[0]"))?;
        if col_pic.mbs.len() != self.pic.mbs.len() {
            return Err(malformed("同位图像尺寸不一致"));
        }
        let col_mb = col_pic.mbs[self.ctx.addr];
        let l1_long = self.task.refs[1][0].long_term;
        let inference = self.task.sps.direct_8x8_inference;

        if self.hdr.direct_spatial_mv_pred && self.spatial.is_none() {
            let n = [0, 1].map(|l| neighbors(&self.pic.mbs, &self.ctx, l, 0, 0, 4));
            self.spatial = Some(spatial_direct(n));
        }

        for b8 in 0..4 {
            if mask & (1 << b8) == 0 {
                continue;
            }
            let bx = (b8 & 1) * 2;
            let by = (b8 >> 1) * 2;
            for sub in 0..4 {
                let (x, y) = (bx + (sub & 1), by + (sub >> 1));
                let col_raster = if inference {
                    // 8x8 块的外角
                    (by + (by >> 1)) * 4 + bx + (bx >> 1)
                } else {
                    y * 4 + x
                };
                let col = Colocated::from_mb(&col_mb, col_raster);
                let (ref_idx, mv) = match self.spatial {
                    Some(sd) => (
                        sd.ref_idx,
                        spatial_direct_block(&sd, col_zero(&col, !l1_long)),
                    ),
                    None => self.temporal_direct(&col),
                };
                self.store_motion((x, y, 1, 1), ref_idx, mv);
            }
        }
        Ok(())
    }

    fn temporal_direct(&self, col: &Colocated) -> ([i32; 2], [[i32; 2]; 2]) {
        let list0 = &self.task.refs[0];
        let ref0 = if col.ref_idx < 0 {
            0
        } else {
            let ids: Vec<i32> = list0.iter().map(|r| r.frame_id).collect();
            map_col_to_list0(col.ref_pic, &ids)
        };
        let dsf = match (list0.get(ref0 as usize), self.task.refs[1].first()) {
            (Some(r0), Some(r1)) if !r0.long_term => {
                dist_scale_factor(self.task.poc, r0.poc, r1.poc)
            }
            _ => None,
        };
        ([ref0, 0], temporal_direct_mv(col.mv, dsf))
    }

    /// 运动补偿的矩形划分 (4x4 块单位)
    pub(crate) fn motion_rects(&self) -> Vec<(usize, usize, usize, usize)> {
        let inference = self.task.sps.direct_8x8_inference;
        let direct = |out: &mut Vec<_>, b8: usize| {
            let (bx, by) = ((b8 & 1) * 2, (b8 >> 1) * 2);
            if inference {
                out.push((bx, by, 2, 2));
            } else {
                for sub in 0..4 {
                    out.push((bx + (sub & 1), by + (sub >> 1), 1, 1));
                }
            }
        };
        let mut out = Vec::with_capacity(16);
        match self.syn.mb_type {
            MbType::PSkip => out.push((0, 0, 4, 4)),
            MbType::BSkip | MbType::BDirect16x16 => (0..4).for_each(|b8| direct(&mut out, b8)),
            MbType::Inter { part, .. } => (0..part.count()).for_each(|p| out.push(part.rect(p))),
            MbType::P8x8 { .. } | MbType::B8x8 => {
                for b8 in 0..4 {
                    let sub = self.syn.sub[b8];
                    if sub.is_direct() {
                        direct(&mut out, b8);
                    } else {
                        (0..sub.count()).for_each(|j| out.push(sub_rect(b8, sub, j)));
                    }
                }
            }
            _ => {}
        }
        out
    }
}

/// 8x8 块 `b8` 中第 `j` 个子分区的矩形
pub(crate) fn sub_rect(b8: usize, sub: SubMbType, j: usize) -> (usize, usize, usize, usize) {
    let (bx, by) = ((b8 & 1) * 2, (b8 >> 1) * 2);
    let per_row = 2 / sub.w;
    (bx + (j % per_row) * sub.w, by + (j / per_row) * sub.h, sub.w, sub.h)
}
