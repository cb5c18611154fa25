//! CABAC 宏块层语法 (7.3.5 与 9.3.3.1.1 的上下文选择).
//!
//! 上下文增量依赖的邻居状态全部来自宏块网格, 当前宏块在解析过程中逐步写入网格,
//! 因此宏块内部与外部的邻居使用同一套查询.

use ying_core::YingResult;

use super::cabac::CabacDecoder;
use super::cabac_tables::{LAST_COEFF_8X8_INC, SIG_COEFF_8X8_INC};
use super::macroblock::{CBF_CHROMA_AC, CBF_CHROMA_DC, CBF_LUMA_DC, MbFlags, MbInfo};
use super::slice_data::{SliceDecoder, malformed, sub_rect};
use super::slice_header::SliceType;
use super::tables::{
    BLK_TO_RASTER, BLK8_TO_RASTER, MbType, ZIGZAG_4X4, ZIGZAG_8X8, b_mb_type, b_sub_mb_type,
    i_mb_type, p_mb_type, p_sub_mb_type, raster_to_blk8,
};

/// 残差块类别 ctxBlockCat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockCat {
    LumaDc = 0,
    LumaAc = 1,
    Luma4x4 = 2,
    ChromaDc = 3,
    ChromaAc = 4,
    Luma8x8 = 5,
}

const CBF_OFFSET: [usize; 5] = [0, 4, 8, 12, 16];
const SIG_OFFSET: [usize; 5] = [0, 15, 29, 44, 47];
const ABS_OFFSET: [usize; 5] = [0, 10, 20, 30, 39];

/// k 阶指数哥伦布旁路后缀 (UEGk)
fn decode_ueg_suffix(cabac: &mut CabacDecoder<'_>, mut k: u32) -> YingResult<i32> {
    let mut value = 0i32;
    while cabac.decode_bypass() == 1 {
        value += 1 << k;
        k += 1;
        if k >= 24 {
            return Err(malformed("UEGk 后缀过长"));
        }
    }
    while k > 0 {
        k -= 1;
        value += (cabac.decode_bypass() as i32) << k;
    }
    Ok(value)
}

/// 解码一个残差块的系数, 按扫描顺序写入 `coeffs`, 返回非零系数个数
fn decode_coefficients(
    cabac: &mut CabacDecoder<'_>,
    cat: BlockCat,
    coeffs: &mut [i32],
) -> YingResult<u8> {
    let max = coeffs.len();
    let (sig_base, last_base, abs_base) = match cat {
        BlockCat::Luma8x8 => (402, 417, 426),
        _ => {
            let c = cat as usize;
            (105 + SIG_OFFSET[c], 166 + SIG_OFFSET[c], 227 + ABS_OFFSET[c])
        }
    };

    let mut positions = [0usize; 64];
    let mut n = 0;
    let mut terminated = false;
    for i in 0..max - 1 {
        let (sig_inc, last_inc) = match cat {
            BlockCat::ChromaDc => (i.min(2), i.min(2)),
            BlockCat::Luma8x8 => (
                usize::from(SIG_COEFF_8X8_INC[i]),
                usize::from(LAST_COEFF_8X8_INC[i]),
            ),
            _ => (i, i),
        };
        if cabac.decode_decision(sig_base + sig_inc) == 1 {
            positions[n] = i;
            n += 1;
            if cabac.decode_decision(last_base + last_inc) == 1 {
                terminated = true;
                break;
            }
        }
    }
    if !terminated {
        positions[n] = max - 1;
        n += 1;
    }

    let gt1_cap = if cat == BlockCat::ChromaDc { 3 } else { 4 };
    let (mut eq1, mut gt1) = (0usize, 0usize);
    for &pos in positions[..n].iter().rev() {
        let inc0 = if gt1 != 0 { 0 } else { (1 + eq1).min(4) };
        let abs = if cabac.decode_decision(abs_base + inc0) == 0 {
            eq1 += 1;
            1
        } else {
            let inc = 5 + gt1.min(gt1_cap);
            let mut minus1 = 1;
            while minus1 < 14 && cabac.decode_decision(abs_base + inc) == 1 {
                minus1 += 1;
            }
            if minus1 == 14 {
                minus1 += decode_ueg_suffix(cabac, 0)?;
            }
            gt1 += 1;
            minus1 + 1
        };
        coeffs[pos] = if cabac.decode_bypass() == 1 { -abs } else { abs };
    }
    Ok(n as u8)
}

impl SliceDecoder<'_> {
    // ============================================================
    // 宏块类型
    // ============================================================

    /// 邻居宏块 A/B 中满足条件的个数 (ctxIdxInc = condA + condB)
    fn count_ab(&self, cond: impl Fn(&MbInfo) -> bool) -> usize {
        usize::from(self.mb_at(self.ctx.a).is_some_and(&cond))
            + usize::from(self.mb_at(self.ctx.b).is_some_and(&cond))
    }

    /// mb_skip_flag
    pub(crate) fn decode_skip_flag(&mut self, cabac: &mut CabacDecoder<'_>) -> bool {
        let base = if self.slice_type() == SliceType::B { 24 } else { 11 };
        let inc = self.count_ab(|m| !m.is_skip());
        cabac.decode_decision(base + inc) == 1
    }

    /// 帧内 mb_type, `prefix_base` 为 None 时表示 I 切片
    fn decode_intra_mb_type(
        &self,
        cabac: &mut CabacDecoder<'_>,
        prefix_base: Option<usize>,
    ) -> YingResult<MbType> {
        let (first, luma_ctx, chroma_ctx, chroma2_ctx, pred_ctx) = match prefix_base {
            None => (3 + self.count_ab(|m| !m.is_intra_nxn()), 6, 7, 8, [9, 10]),
            Some(b) => (b, b + 1, b + 2, b + 2, [b + 3, b + 3]),
        };
        if cabac.decode_decision(first) == 0 {
            return Ok(MbType::INxN);
        }
        if cabac.decode_terminate() == 1 {
            return Ok(MbType::IPcm);
        }
        let luma = cabac.decode_decision(luma_ctx);
        let chroma = match cabac.decode_decision(chroma_ctx) {
            0 => 0,
            _ => 1 + cabac.decode_decision(chroma2_ctx),
        };
        let pred = (cabac.decode_decision(pred_ctx[0]) << 1) | cabac.decode_decision(pred_ctx[1]);
        i_mb_type(1 + pred + 4 * chroma + 12 * luma).ok_or_else(|| malformed("I mb_type 无效"))
    }

    fn decode_mb_type(&self, cabac: &mut CabacDecoder<'_>) -> YingResult<MbType> {
        match self.slice_type() {
            SliceType::I => self.decode_intra_mb_type(cabac, None),
            SliceType::P => {
                if cabac.decode_decision(14) == 1 {
                    return self.decode_intra_mb_type(cabac, Some(17));
                }
                let t = if cabac.decode_decision(15) == 0 {
                    3 * cabac.decode_decision(16)
                } else {
                    2 - cabac.decode_decision(17)
                };
                p_mb_type(t).ok_or_else(|| malformed("P mb_type 无效"))
            }
            SliceType::B => {
                let inc = self.count_ab(|m| !m.is_direct());
                if cabac.decode_decision(27 + inc) == 0 {
                    return b_mb_type(0).ok_or_else(|| malformed("B mb_type 无效"));
                }
                let t = if cabac.decode_decision(30) == 0 {
                    1 + cabac.decode_decision(32)
                } else {
                    let bits = (cabac.decode_decision(31) << 3)
                        | (cabac.decode_decision(32) << 2)
                        | (cabac.decode_decision(32) << 1)
                        | cabac.decode_decision(32);
                    match bits {
                        0..8 => bits + 3,
                        13 => return self.decode_intra_mb_type(cabac, Some(32)),
                        14 => 11,
                        15 => 22,
                        _ => ((bits << 1) | cabac.decode_decision(32)) - 4,
                    }
                };
                b_mb_type(t).ok_or_else(|| malformed("B mb_type 无效"))
            }
        }
    }

    fn decode_sub_mb_type(&self, cabac: &mut CabacDecoder<'_>) -> YingResult<u32> {
        if self.slice_type() == SliceType::P {
            return Ok(if cabac.decode_decision(21) == 1 {
                0
            } else if cabac.decode_decision(22) == 0 {
                1
            } else if cabac.decode_decision(23) == 1 {
                2
            } else {
                3
            });
        }
        if cabac.decode_decision(36) == 0 {
            return Ok(0);
        }
        if cabac.decode_decision(37) == 0 {
            return Ok(1 + cabac.decode_decision(39));
        }
        let mut t = 3;
        if cabac.decode_decision(38) == 1 {
            if cabac.decode_decision(39) == 1 {
                return Ok(11 + cabac.decode_decision(39));
            }
            t += 4;
        }
        t += 2 * cabac.decode_decision(39);
        t += cabac.decode_decision(39);
        Ok(t)
    }

    // ============================================================
    // 宏块层
    // ============================================================

    /// 解析一个非跳过宏块
    pub(crate) fn parse_mb_cabac(&mut self, cabac: &mut CabacDecoder<'_>) -> YingResult<()> {
        let mb_type = self.decode_mb_type(cabac)?;
        self.set_mb_type(mb_type);

        if mb_type == MbType::IPcm {
            let br = cabac.reader_mut();
            br.align_to_byte();
            for i in 0..384 {
                self.syn.pcm[i] = br.read_bits(8) as u8;
            }
            cabac.init_engine();
            self.finish_pcm();
            return Ok(());
        }

        let mut no_sub_8x8 = true;
        match mb_type {
            MbType::P8x8 { .. } | MbType::B8x8 => {
                no_sub_8x8 = self.sub_mb_pred_cabac(cabac, mb_type)?;
            }
            MbType::INxN => {
                if self.pps.transform_8x8_mode && self.decode_transform_8x8_flag(cabac) {
                    self.cur_mut().flags |= MbFlags::TRANSFORM_8X8;
                }
                self.intra_pred_cabac(cabac);
            }
            MbType::I16x16 { .. } => self.intra_pred_cabac(cabac),
            MbType::Inter { .. } => self.mb_pred_inter_cabac(cabac, mb_type)?,
            _ => {}
        }

        if !matches!(mb_type, MbType::I16x16 { .. }) {
            let cbp = self.decode_cbp(cabac);
            self.cur_mut().cbp = cbp;
            let direct_ok =
                mb_type != MbType::BDirect16x16 || self.task.sps.direct_8x8_inference;
            if cbp & 0xF != 0
                && self.pps.transform_8x8_mode
                && mb_type != MbType::INxN
                && no_sub_8x8
                && direct_ok
                && self.decode_transform_8x8_flag(cabac)
            {
                self.cur_mut().flags |= MbFlags::TRANSFORM_8X8;
            }
        }

        let cbp = self.cur().cbp;
        if cbp == 0 && !matches!(mb_type, MbType::I16x16 { .. }) {
            self.last_dqp_nonzero = false;
            return Ok(());
        }
        let dqp = self.decode_qp_delta(cabac)?;
        self.apply_qp_delta(dqp)?;
        self.residual_cabac(cabac)
    }

    fn decode_transform_8x8_flag(&self, cabac: &mut CabacDecoder<'_>) -> bool {
        let inc = self.count_ab(|m| m.flags.contains(MbFlags::TRANSFORM_8X8));
        cabac.decode_decision(399 + inc) == 1
    }

    fn intra_pred_cabac(&mut self, cabac: &mut CabacDecoder<'_>) {
        if self.syn.mb_type == MbType::INxN {
            let count = if self.cur().flags.contains(MbFlags::TRANSFORM_8X8) {
                4
            } else {
                16
            };
            for blk in 0..count {
                self.syn.intra_rem[blk] = if cabac.decode_decision(68) == 1 {
                    None
                } else {
                    let rem = cabac.decode_decision(69)
                        | (cabac.decode_decision(69) << 1)
                        | (cabac.decode_decision(69) << 2);
                    Some(rem as u8)
                };
            }
        }
        let inc = self.count_ab(|m| {
            m.is_intra() && !m.flags.contains(MbFlags::PCM) && m.intra_chroma_mode != 0
        });
        let mode = if cabac.decode_decision(64 + inc) == 0 {
            0
        } else if cabac.decode_decision(67) == 0 {
            1
        } else if cabac.decode_decision(67) == 0 {
            2
        } else {
            3
        };
        self.cur_mut().intra_chroma_mode = mode;
    }

    fn decode_qp_delta(&self, cabac: &mut CabacDecoder<'_>) -> YingResult<i32> {
        let mut ctx = 60 + usize::from(self.last_dqp_nonzero);
        let mut v = 0;
        while cabac.decode_decision(ctx) == 1 {
            v += 1;
            ctx = if ctx < 62 { 62 } else { 63 };
            if v > 2 * 52 {
                return Err(malformed("mb_qp_delta 过长"));
            }
        }
        Ok(if v & 1 == 1 {
            (v + 1) >> 1
        } else {
            -((v + 1) >> 1)
        })
    }

    fn decode_cbp(&self, cabac: &mut CabacDecoder<'_>) -> u8 {
        let mut cbp = 0u8;
        for b8 in 0..4 {
            let raster = BLK8_TO_RASTER[b8];
            let (x, y) = ((raster & 3) as i32, (raster >> 2) as i32);
            // 条件为真表示邻居 8x8 块没有编码残差
            let cond = |pos: Option<(usize, usize)>| -> usize {
                let Some((addr, r)) = pos else {
                    return 0;
                };
                let n8 = raster_to_blk8(r);
                let bits = if addr == self.ctx.addr {
                    cbp
                } else {
                    self.pic.mbs[addr].cbp
                };
                usize::from(bits & (1 << n8) == 0)
            };
            let inc = cond(self.ctx.locate(x - 1, y)) + 2 * cond(self.ctx.locate(x, y - 1));
            cbp |= (cabac.decode_decision(73 + inc) as u8) << b8;
        }

        let chroma_of = |addr: Option<usize>| self.mb_at(addr).map(|m| m.cbp >> 4);
        let (a, b) = (chroma_of(self.ctx.a), chroma_of(self.ctx.b));
        let inc0 = usize::from(a.is_some_and(|c| c > 0)) + 2 * usize::from(b.is_some_and(|c| c > 0));
        if cabac.decode_decision(77 + inc0) == 1 {
            let inc1 =
                usize::from(a.is_some_and(|c| c == 2)) + 2 * usize::from(b.is_some_and(|c| c == 2));
            cbp |= (1 + cabac.decode_decision(81 + inc1) as u8) << 4;
        }
        cbp
    }

    // ============================================================
    // 帧间预测语法
    // ============================================================

    fn decode_ref_idx(
        &self,
        cabac: &mut CabacDecoder<'_>,
        list: usize,
        x: usize,
        y: usize,
    ) -> YingResult<i32> {
        let cond = |pos: Option<(usize, usize)>| -> usize {
            let Some((addr, r)) = pos else {
                return 0;
            };
            let mb = &self.pic.mbs[addr];
            let b8 = raster_to_blk8(r);
            let direct = mb.is_direct() || mb.direct8x8 & (1 << b8) != 0;
            usize::from(!mb.is_skip() && !mb.is_intra() && !direct && mb.ref_idx[list][b8] > 0)
        };
        let (x, y) = (x as i32, y as i32);
        let inc = cond(self.ctx.locate(x - 1, y)) + 2 * cond(self.ctx.locate(x, y - 1));
        if cabac.decode_decision(54 + inc) == 0 {
            return Ok(0);
        }
        let mut r = 1;
        let mut ctx = 58;
        while cabac.decode_decision(ctx) == 1 {
            r += 1;
            ctx = 59;
            if r >= 32 {
                return Err(malformed("ref_idx 过长"));
            }
        }
        if r as u32 >= self.hdr.num_ref_idx_active[list] {
            return Err(malformed("ref_idx 超出范围"));
        }
        Ok(r)
    }

    fn decode_mvd_comp(
        &self,
        cabac: &mut CabacDecoder<'_>,
        list: usize,
        comp: usize,
        x: usize,
        y: usize,
    ) -> YingResult<i32> {
        let base = if comp == 0 { 40 } else { 47 };
        let abs_of = |pos: Option<(usize, usize)>| -> u32 {
            pos.map_or(0, |(addr, r)| u32::from(self.pic.mbs[addr].mvd[list][r][comp]))
        };
        let (xi, yi) = (x as i32, y as i32);
        let sum = abs_of(self.ctx.locate(xi - 1, yi)) + abs_of(self.ctx.locate(xi, yi - 1));
        let inc = match sum {
            0..3 => 0,
            3..=32 => 1,
            _ => 2,
        };
        if cabac.decode_decision(base + inc) == 0 {
            return Ok(0);
        }
        let mut abs = 1;
        let mut ctx = 3;
        while abs < 9 && cabac.decode_decision(base + ctx) == 1 {
            abs += 1;
            if ctx < 6 {
                ctx += 1;
            }
        }
        if abs >= 9 {
            abs += decode_ueg_suffix(cabac, 3)?;
        }
        Ok(if cabac.decode_bypass() == 1 { -abs } else { abs })
    }

    /// 解码一个分区的 mvd, 记入语法与网格 (|mvd|)
    fn decode_mvd(
        &mut self,
        cabac: &mut CabacDecoder<'_>,
        list: usize,
        rect: (usize, usize, usize, usize),
    ) -> YingResult<()> {
        let (x0, y0, w, h) = rect;
        let mvd = [
            self.decode_mvd_comp(cabac, list, 0, x0, y0)?,
            self.decode_mvd_comp(cabac, list, 1, x0, y0)?,
        ];
        self.syn.mvd[list][y0 * 4 + x0] = mvd;
        let abs = mvd.map(|c| c.unsigned_abs().min(255) as u8);
        let mb = self.cur_mut();
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                mb.mvd[list][y * 4 + x] = abs;
            }
        }
        Ok(())
    }

    fn mb_pred_inter_cabac(&mut self, cabac: &mut CabacDecoder<'_>, mb_type: MbType) -> YingResult<()> {
        let MbType::Inter { part, dirs } = mb_type else {
            return Ok(());
        };
        for list in 0..2 {
            for p in 0..part.count() {
                if dirs[p] & (1 << list) == 0 {
                    continue;
                }
                let (x, y, _, _) = part.rect(p);
                let r = if self.hdr.num_ref_idx_active[list] > 1 {
                    self.decode_ref_idx(cabac, list, x, y)?
                } else {
                    0
                };
                self.fill_ref_idx(list, part.rect(p), r);
            }
        }
        for list in 0..2 {
            for p in 0..part.count() {
                if dirs[p] & (1 << list) != 0 {
                    self.decode_mvd(cabac, list, part.rect(p))?;
                }
            }
        }
        Ok(())
    }

    /// 返回 NoSubMbPartSizeLessThan8x8Flag
    fn sub_mb_pred_cabac(&mut self, cabac: &mut CabacDecoder<'_>, mb_type: MbType) -> YingResult<bool> {
        let is_b = mb_type == MbType::B8x8;
        let mut no_sub_8x8 = true;
        for b8 in 0..4 {
            let code = self.decode_sub_mb_type(cabac)?;
            let sub = if is_b {
                b_sub_mb_type(code)
            } else {
                p_sub_mb_type(code)
            }
            .ok_or_else(|| malformed("sub_mb_type 无效"))?;
            if sub.is_direct() {
                self.cur_mut().direct8x8 |= 1 << b8;
                no_sub_8x8 &= self.task.sps.direct_8x8_inference;
            } else if sub.count() > 1 {
                no_sub_8x8 = false;
            }
            self.syn.sub[b8] = sub;
        }

        let ref0 = matches!(mb_type, MbType::P8x8 { ref0: true });
        for list in 0..2 {
            for b8 in 0..4 {
                let sub = self.syn.sub[b8];
                if sub.is_direct() || sub.dir & (1 << list) == 0 {
                    continue;
                }
                let (bx, by) = ((b8 & 1) * 2, (b8 >> 1) * 2);
                let r = if self.hdr.num_ref_idx_active[list] > 1 && !ref0 {
                    self.decode_ref_idx(cabac, list, bx, by)?
                } else {
                    0
                };
                self.fill_ref_idx(list, (bx, by, 2, 2), r);
            }
        }
        for list in 0..2 {
            for b8 in 0..4 {
                let sub = self.syn.sub[b8];
                if sub.is_direct() || sub.dir & (1 << list) == 0 {
                    continue;
                }
                for j in 0..sub.count() {
                    self.decode_mvd(cabac, list, sub_rect(b8, sub, j))?;
                }
            }
        }
        Ok(no_sub_8x8)
    }

    // ============================================================
    // 残差
    // ============================================================

    /// coded_block_flag 的邻居条件, `bit_of` 把邻居块下标映射到 cbf 位
    fn cbf_cond(&self, pos: Option<(usize, usize)>, bit_of: impl Fn(usize) -> u32) -> usize {
        match pos {
            None => usize::from(self.cur().is_intra()),
            Some((addr, idx)) => usize::from(self.pic.mbs[addr].cbf_bit(bit_of(idx))),
        }
    }

    /// 解码 coded_block_flag 并记录到当前宏块
    fn decode_cbf(&mut self, cabac: &mut CabacDecoder<'_>, cat: BlockCat, inc: usize, bit: u32) -> bool {
        let coded = cabac.decode_decision(85 + CBF_OFFSET[cat as usize] + inc) == 1;
        if coded {
            self.cur_mut().cbf |= 1 << bit;
        }
        coded
    }

    fn luma_cbf_inc(&self, raster: usize) -> usize {
        let (x, y) = ((raster & 3) as i32, (raster >> 2) as i32);
        self.cbf_cond(self.ctx.locate(x - 1, y), |r| r as u32)
            + 2 * self.cbf_cond(self.ctx.locate(x, y - 1), |r| r as u32)
    }

    fn mb_cbf_inc(&self, bit: u32) -> usize {
        let a = self.ctx.a.map(|a| (a, 0));
        let b = self.ctx.b.map(|b| (b, 0));
        self.cbf_cond(a, |_| bit) + 2 * self.cbf_cond(b, |_| bit)
    }

    fn residual_cabac(&mut self, cabac: &mut CabacDecoder<'_>) -> YingResult<()> {
        let mb = *self.cur();
        let i16 = mb.flags.contains(MbFlags::INTRA16X16);
        let t8 = mb.flags.contains(MbFlags::TRANSFORM_8X8);

        if i16 {
            let inc = self.mb_cbf_inc(CBF_LUMA_DC);
            if self.decode_cbf(cabac, BlockCat::LumaDc, inc, CBF_LUMA_DC) {
                let mut lv = [0i32; 16];
                decode_coefficients(cabac, BlockCat::LumaDc, &mut lv)?;
                for (k, &v) in lv.iter().enumerate() {
                    self.res.luma_dc[ZIGZAG_4X4[k]] = v;
                }
            }
        }

        for b8 in 0..4 {
            if mb.cbp & (1 << b8) == 0 {
                continue;
            }
            if t8 {
                let mut lv = [0i32; 64];
                let n = decode_coefficients(cabac, BlockCat::Luma8x8, &mut lv)?;
                for (k, &v) in lv.iter().enumerate() {
                    self.res.luma8x8[b8][ZIGZAG_8X8[k]] = v;
                }
                let cur = self.cur_mut();
                for i4 in 0..4 {
                    let raster = BLK_TO_RASTER[b8 * 4 + i4];
                    cur.nnz[raster] = n;
                    cur.cbf |= 1 << raster;
                }
                continue;
            }
            for i4 in 0..4 {
                let raster = BLK_TO_RASTER[b8 * 4 + i4];
                let inc = self.luma_cbf_inc(raster);
                let cat = if i16 { BlockCat::LumaAc } else { BlockCat::Luma4x4 };
                if !self.decode_cbf(cabac, cat, inc, raster as u32) {
                    continue;
                }
                let mut lv = [0i32; 16];
                let n = if i16 {
                    let n = decode_coefficients(cabac, cat, &mut lv[..15])?;
                    for k in 0..15 {
                        self.res.luma[raster][ZIGZAG_4X4[k + 1]] = lv[k];
                    }
                    n
                } else {
                    let n = decode_coefficients(cabac, cat, &mut lv)?;
                    for k in 0..16 {
                        self.res.luma[raster][ZIGZAG_4X4[k]] = lv[k];
                    }
                    n
                };
                self.cur_mut().nnz[raster] = n;
            }
        }

        let cbp_chroma = mb.cbp >> 4;
        if cbp_chroma != 0 {
            for c in 0..2 {
                let bit = CBF_CHROMA_DC + c as u32;
                let inc = self.mb_cbf_inc(bit);
                if self.decode_cbf(cabac, BlockCat::ChromaDc, inc, bit) {
                    let mut dc = [0i32; 4];
                    decode_coefficients(cabac, BlockCat::ChromaDc, &mut dc)?;
                    self.res.chroma_dc[c] = dc;
                }
            }
        }
        if cbp_chroma & 2 != 0 {
            for c in 0..2 {
                for blk in 0..4 {
                    let (x, y) = ((blk & 1) as i32, (blk >> 1) as i32);
                    let bit_of = |i: usize| CBF_CHROMA_AC + (c * 4 + i) as u32;
                    let inc = self.cbf_cond(self.ctx.locate_chroma(x - 1, y), bit_of)
                        + 2 * self.cbf_cond(self.ctx.locate_chroma(x, y - 1), bit_of);
                    if !self.decode_cbf(cabac, BlockCat::ChromaAc, inc, bit_of(blk)) {
                        continue;
                    }
                    let mut lv = [0i32; 15];
                    let n = decode_coefficients(cabac, BlockCat::ChromaAc, &mut lv)?;
                    for k in 0..15 {
                        self.res.chroma_ac[c][blk][ZIGZAG_4X4[k + 1]] = lv[k];
                    }
                    self.cur_mut().nnz[16 + c * 4 + blk] = n;
                }
            }
        }
        Ok(())
    }
}
