//! 宏块重建: 帧内预测、运动补偿与残差叠加.

use ying_core::YingResult;

use super::inter::{Weights, implicit_weights, mc_chroma, mc_luma, write_prediction};
use super::intra::{
    ChromaMode, Intra16x16Mode, IntraAvail, IntraNxNMode, predict_16x16, predict_4x4,
    predict_8x8, predict_chroma,
};
use super::macroblock::MbFlags;
use super::mvpred::dist_scale_factor;
use super::slice_data::{SliceDecoder, malformed};
use super::slice_header::SliceType;
use super::tables::{BLK_TO_RASTER, BLK8_TO_RASTER, MbType, raster_to_blk8};
use super::transform::{
    chroma_dc_transform, dequant_4x4, dequant_8x8, idct4x4_add, idct8x8_add, luma_dc_transform,
};

impl SliceDecoder<'_> {
    /// 重建当前宏块 (解析完成之后调用)
    pub(crate) fn reconstruct(&mut self) -> YingResult<()> {
        match self.syn.mb_type {
            MbType::IPcm => {
                self.write_pcm();
                return Ok(());
            }
            MbType::INxN => self.recon_intra_nxn(),
            MbType::I16x16 { pred, .. } => self.recon_intra_16x16(pred),
            _ => {
                self.derive_motion()?;
                self.motion_compensate()?;
                self.add_inter_luma();
            }
        }
        if self.cur().is_intra() {
            let avail = self.block_avail(0, 0, 4);
            let mode = ChromaMode::from_u8(self.cur().intra_chroma_mode);
            let (x0, y0) = (self.ctx.mb_x * 8, self.ctx.mb_y * 8);
            let stride = self.pic.stride(1);
            for c in 1..3 {
                predict_chroma(&mut self.pic.planes[c], stride, x0, y0, mode, avail);
            }
        }
        self.add_chroma_residual();
        Ok(())
    }

    /// 以 4x4 块坐标 (x, y)、宽 `w` 描述的块的邻居样本可用性
    pub(crate) fn block_avail(&self, x: i32, y: i32, w: i32) -> IntraAvail {
        let addr = self.ctx.addr;
        let usable = |pos: Option<(usize, usize)>| {
            pos.is_some_and(|(a, _)| a == addr || self.intra_usable(&self.pic.mbs[a]))
        };
        let cur_blk = BLK_TO_RASTER[(y * 4 + x) as usize];
        let top_right = self
            .ctx
            .locate(x + w, y - 1)
            .is_some_and(|(a, raster)| {
                if a == addr {
                    BLK_TO_RASTER[raster] < cur_blk
                } else {
                    self.intra_usable(&self.pic.mbs[a])
                }
            });
        IntraAvail {
            left: usable(self.ctx.locate(x - 1, y)),
            top: usable(self.ctx.locate(x, y - 1)),
            top_right,
            top_left: usable(self.ctx.locate(x - 1, y - 1)),
        }
    }

    // ============================================================
    // 帧内
    // ============================================================

    fn recon_intra_nxn(&mut self) {
        let transform_8x8 = self.cur().flags.contains(MbFlags::TRANSFORM_8X8);
        self.resolve_intra_modes(transform_8x8);
        let task = self.task;
        let qp = i32::from(self.cur().qp[0]);
        let stride = self.pic.stride(0);
        let (mx, my) = (self.ctx.mb_x * 16, self.ctx.mb_y * 16);

        if transform_8x8 {
            let scale = task.scale.scale_8x8(0, qp);
            for b8 in 0..4 {
                let raster = BLK8_TO_RASTER[b8];
                let (x, y) = (raster & 3, raster >> 2);
                let avail = self.block_avail(x as i32, y as i32, 2);
                let mode = IntraNxNMode::from_u8(self.cur().intra_modes[raster]);
                let (px, py) = (mx + x * 4, my + y * 4);
                predict_8x8(&mut self.pic.planes[0], stride, px, py, mode, avail);
                let mut block = self.res.luma8x8[b8];
                if block.iter().any(|&c| c != 0) {
                    dequant_8x8(&mut block, scale, qp);
                    idct8x8_add(&mut self.pic.planes[0][py * stride + px..], stride, &mut block);
                }
            }
            return;
        }

        let scale = task.scale.scale_4x4(0, qp);
        for &raster in &BLK_TO_RASTER {
            let (x, y) = (raster & 3, raster >> 2);
            let avail = self.block_avail(x as i32, y as i32, 1);
            let mode = IntraNxNMode::from_u8(self.cur().intra_modes[raster]);
            let (px, py) = (mx + x * 4, my + y * 4);
            predict_4x4(&mut self.pic.planes[0], stride, px, py, mode, avail);
            let mut block = self.res.luma[raster];
            if block.iter().any(|&c| c != 0) {
                dequant_4x4(&mut block, scale, qp, false);
                idct4x4_add(&mut self.pic.planes[0][py * stride + px..], stride, &mut block);
            }
        }
    }

    fn recon_intra_16x16(&mut self, pred: u8) {
        let task = self.task;
        let qp = i32::from(self.cur().qp[0]);
        let stride = self.pic.stride(0);
        let (mx, my) = (self.ctx.mb_x * 16, self.ctx.mb_y * 16);
        let avail = self.block_avail(0, 0, 4);
        predict_16x16(
            &mut self.pic.planes[0],
            stride,
            mx,
            my,
            Intra16x16Mode::from_u8(pred),
            avail,
        );

        let scale = task.scale.scale_4x4(0, qp);
        let mut dc = self.res.luma_dc;
        luma_dc_transform(&mut dc, scale[0], qp);
        for (raster, &dc_val) in dc.iter().enumerate() {
            let mut block = self.res.luma[raster];
            block[0] = dc_val;
            dequant_4x4(&mut block, scale, qp, true);
            if block.iter().all(|&c| c == 0) {
                continue;
            }
            let (px, py) = (mx + (raster & 3) * 4, my + (raster >> 2) * 4);
            idct4x4_add(&mut self.pic.planes[0][py * stride + px..], stride, &mut block);
        }
    }

    fn write_pcm(&mut self) {
        let (mx, my) = (self.ctx.mb_x, self.ctx.mb_y);
        let s0 = self.pic.stride(0);
        let s1 = self.pic.stride(1);
        for y in 0..16 {
            let off = (my * 16 + y) * s0 + mx * 16;
            self.pic.planes[0][off..off + 16].copy_from_slice(&self.syn.pcm[y * 16..y * 16 + 16]);
        }
        for c in 0..2 {
            let base = 256 + c * 64;
            for y in 0..8 {
                let off = (my * 8 + y) * s1 + mx * 8;
                self.pic.planes[1 + c][off..off + 8]
                    .copy_from_slice(&self.syn.pcm[base + y * 8..base + y * 8 + 8]);
            }
        }
    }

    // ============================================================
    // 残差
    // ============================================================

    fn add_inter_luma(&mut self) {
        let mb = *self.cur();
        if mb.cbp & 0xF == 0 {
            return;
        }
        let task = self.task;
        let qp = i32::from(mb.qp[0]);
        let stride = self.pic.stride(0);
        let (mx, my) = (self.ctx.mb_x * 16, self.ctx.mb_y * 16);
        if mb.flags.contains(MbFlags::TRANSFORM_8X8) {
            let scale = task.scale.scale_8x8(1, qp);
            for b8 in 0..4 {
                let mut block = self.res.luma8x8[b8];
                if block.iter().all(|&c| c == 0) {
                    continue;
                }
                let raster = BLK8_TO_RASTER[b8];
                let (px, py) = (mx + (raster & 3) * 4, my + (raster >> 2) * 4);
                dequant_8x8(&mut block, scale, qp);
                idct8x8_add(&mut self.pic.planes[0][py * stride + px..], stride, &mut block);
            }
            return;
        }
        let scale = task.scale.scale_4x4(3, qp);
        for raster in 0..16 {
            let mut block = self.res.luma[raster];
            if block.iter().all(|&c| c == 0) {
                continue;
            }
            let (px, py) = (mx + (raster & 3) * 4, my + (raster >> 2) * 4);
            dequant_4x4(&mut block, scale, qp, false);
            idct4x4_add(&mut self.pic.planes[0][py * stride + px..], stride, &mut block);
        }
    }

    fn add_chroma_residual(&mut self) {
        let mb = *self.cur();
        if mb.cbp >> 4 == 0 {
            return;
        }
        let task = self.task;
        let stride = self.pic.stride(1);
        let (mx, my) = (self.ctx.mb_x * 8, self.ctx.mb_y * 8);
        for c in 0..2 {
            let qpc = i32::from(mb.qp[1 + c]);
            let list = if mb.is_intra() { 1 + c } else { 4 + c };
            let scale = task.scale.scale_4x4(list, qpc);
            let mut dc = self.res.chroma_dc[c];
            chroma_dc_transform(&mut dc, scale[0], qpc);
            for (blk, &dc_val) in dc.iter().enumerate() {
                let mut block = self.res.chroma_ac[c][blk];
                block[0] = dc_val;
                dequant_4x4(&mut block, scale, qpc, true);
                if block.iter().all(|&v| v == 0) {
                    continue;
                }
                let (px, py) = (mx + (blk & 1) * 4, my + (blk >> 1) * 4);
                idct4x4_add(&mut self.pic.planes[1 + c][py * stride + px..], stride, &mut block);
            }
        }
    }

    // ============================================================
    // 运动补偿
    // ============================================================

    /// 按当前宏块网格中的运动信息生成帧间预测并写入图像
    pub(crate) fn motion_compensate(&mut self) -> YingResult<()> {
        let mb = *self.cur();
        let (mx, my) = (self.ctx.mb_x * 16, self.ctx.mb_y * 16);
        let s0 = self.pic.stride(0);
        let s1 = self.pic.stride(1);
        for (x, y, w, h) in self.motion_rects() {
            let raster = y * 4 + x;
            let b8 = raster_to_blk8(raster);
            let ref_idx = [0, 1].map(|l| i32::from(mb.ref_idx[l][b8]));
            for list in 0..2 {
                let Ok(idx) = usize::try_from(ref_idx[list]) else {
                    continue;
                };
                let r = *self.refs[list]
                    .get(idx)
                    .ok_or_else(|| malformed("ref_idx 超出参考列表"))?;
                let planes = r.ref_planes();
                let mv = mb.mv_of(list, raster);
                let pred = &mut self.pred[list];
                let lo = y * 4 * 16 + x * 4;
                mc_luma(&mut pred.luma[lo..], 16, &planes, mx + x * 4, my + y * 4, w * 4, h * 4, mv);
                let co = y * 2 * 8 + x * 2;
                let [cb, cr] = &mut pred.chroma;
                mc_chroma(
                    [&mut cb[co..], &mut cr[co..]],
                    8,
                    &planes,
                    mx / 2 + x * 2,
                    my / 2 + y * 2,
                    w * 2,
                    h * 2,
                    mv,
                );
            }
            if ref_idx.iter().all(|&r| r < 0) {
                return Err(malformed("帧间分区没有使用任何参考列表"));
            }

            let weights = self.weights(ref_idx);
            let lo = y * 4 * 16 + x * 4;
            let luma = [0, 1].map(|l| (ref_idx[l] >= 0).then(|| &self.pred[l].luma[lo..]));
            let off = (my + y * 4) * s0 + mx + x * 4;
            write_prediction(
                &mut self.pic.planes[0][off..],
                s0,
                luma,
                16,
                w * 4,
                h * 4,
                &weights,
                0,
            );
            let co = y * 2 * 8 + x * 2;
            let off = (my / 2 + y * 2) * s1 + mx / 2 + x * 2;
            for c in 0..2 {
                let chroma =
                    [0, 1].map(|l| (ref_idx[l] >= 0).then(|| &self.pred[l].chroma[c][co..]));
                write_prediction(
                    &mut self.pic.planes[1 + c][off..],
                    s1,
                    chroma,
                    8,
                    w * 2,
                    h * 2,
                    &weights,
                    1 + c,
                );
            }
        }
        Ok(())
    }

    /// 分区的加权预测参数 (8.4.2.3)
    fn weights(&self, ref_idx: [i32; 2]) -> Weights {
        let explicit = match self.slice_type() {
            SliceType::P => self.pps.weighted_pred,
            SliceType::B => self.pps.weighted_bipred_idc == 1,
            SliceType::I => false,
        };
        if explicit {
            let Some(table) = &self.hdr.pred_weights else {
                return Weights::Default;
            };
            let denom = table.log2_denom.map(|d| d as i32);
            let mut w = [[0; 3]; 2];
            let mut o = [[0; 3]; 2];
            for list in 0..2 {
                let Ok(idx) = usize::try_from(ref_idx[list]) else {
                    continue;
                };
                match table.entries[list].get(idx) {
                    Some(e) => {
                        w[list] = e.weight;
                        o[list] = e.offset;
                    }
                    None => w[list] = [1 << denom[0], 1 << denom[1], 1 << denom[1]],
                }
            }
            return Weights::Weighted {
                log_wd: [denom[0], denom[1], denom[1]],
                w,
                o,
            };
        }

        if self.slice_type() == SliceType::B
            && self.pps.weighted_bipred_idc == 2
            && ref_idx[0] >= 0
            && ref_idx[1] >= 0
        {
            let r0 = self.task.refs[0].get(ref_idx[0] as usize);
            let r1 = self.task.refs[1].get(ref_idx[1] as usize);
            let dsf = match (r0, r1) {
                (Some(a), Some(b)) if !a.long_term && !b.long_term => {
                    dist_scale_factor(self.task.poc, a.poc, b.poc)
                }
                _ => None,
            };
            let (w0, w1) = implicit_weights(dsf);
            return Weights::Weighted {
                log_wd: [5; 3],
                w: [[w0; 3], [w1; 3]],
                o: [[0; 3]; 2],
            };
        }
        Weights::Default
    }
}
