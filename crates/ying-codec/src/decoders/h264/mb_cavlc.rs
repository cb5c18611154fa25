//! CAVLC 宏块层语法 (7.3.5).

use ying_core::YingResult;
use ying_core::bitreader::BitReader;

use super::cavlc::read_residual_block;
use super::macroblock::MbFlags;
use super::slice_data::{SliceDecoder, malformed, sub_rect};
use super::slice_header::SliceType;
use super::tables::{
    BLK_TO_RASTER, INTER_CBP, INTRA_CBP, MbType, ZIGZAG_4X4, ZIGZAG_8X8, b_mb_type,
    b_sub_mb_type, i_mb_type, p_mb_type, p_sub_mb_type, raster_to_blk8,
};

const MVD_MIN: i32 = -(1 << 15);
const MVD_MAX: i32 = (1 << 15) - 1;

/// te(v), `max` 为语法元素的最大取值
fn read_te(br: &mut BitReader<'_>, max: u32) -> YingResult<i32> {
    let v = if max == 1 {
        1 - br.read_bit()
    } else {
        br.read_ue(u32::MAX)
    };
    if v > max {
        return Err(malformed("ref_idx 超出范围"));
    }
    Ok(v as i32)
}

/// mvd_l0 / mvd_l1 的一对分量
fn read_mvd(br: &mut BitReader<'_>) -> [i32; 2] {
    [MVD_MIN, MVD_MIN].map(|lo| br.read_se(lo, MVD_MAX))
}

/// 两个邻居 nC 的组合规则 (9.2.1)
pub(crate) fn combine_nc(a: Option<i32>, b: Option<i32>) -> i32 {
    match (a, b) {
        (Some(a), Some(b)) => (a + b + 1) >> 1,
        (Some(v), None) | (None, Some(v)) => v,
        (None, None) => 0,
    }
}

impl SliceDecoder<'_> {
    /// 解析一个非跳过宏块
    pub(crate) fn parse_mb_cavlc(&mut self, br: &mut BitReader<'_>) -> YingResult<()> {
        let code = br.read_ue(u32::MAX);
        let mb_type = match self.slice_type() {
            SliceType::I => i_mb_type(code),
            SliceType::P if code < 5 => p_mb_type(code),
            SliceType::P => i_mb_type(code - 5),
            SliceType::B if code < 23 => b_mb_type(code),
            SliceType::B => i_mb_type(code - 23),
        }
        .ok_or_else(|| malformed("mb_type 无效"))?;
        self.set_mb_type(mb_type);

        if mb_type == MbType::IPcm {
            br.align_to_byte();
            for i in 0..384 {
                self.syn.pcm[i] = br.read_bits(8) as u8;
            }
            self.finish_pcm();
            return Ok(());
        }

        let mut no_sub_8x8 = true;
        match mb_type {
            MbType::P8x8 { .. } | MbType::B8x8 => {
                no_sub_8x8 = self.sub_mb_pred_cavlc(br, mb_type)?;
            }
            MbType::INxN => {
                if self.pps.transform_8x8_mode && br.read_flag() {
                    self.cur_mut().flags |= MbFlags::TRANSFORM_8X8;
                }
                self.intra_pred_cavlc(br);
            }
            MbType::I16x16 { .. } => self.intra_pred_cavlc(br),
            MbType::Inter { .. } => self.mb_pred_inter_cavlc(br, mb_type)?,
            _ => {}
        }

        if !matches!(mb_type, MbType::I16x16 { .. }) {
            let code = br.read_ue(47) as usize;
            let cbp = if mb_type == MbType::INxN {
                INTRA_CBP[code]
            } else {
                INTER_CBP[code]
            };
            self.cur_mut().cbp = cbp;
            let direct_ok =
                mb_type != MbType::BDirect16x16 || self.task.sps.direct_8x8_inference;
            if cbp & 0xF != 0
                && self.pps.transform_8x8_mode
                && mb_type != MbType::INxN
                && no_sub_8x8
                && direct_ok
                && br.read_flag()
            {
                self.cur_mut().flags |= MbFlags::TRANSFORM_8X8;
            }
        }

        let cbp = self.cur().cbp;
        if cbp == 0 && !matches!(mb_type, MbType::I16x16 { .. }) {
            self.last_dqp_nonzero = false;
            return Ok(());
        }
        let dqp = br.read_se(-26, 25);
        self.apply_qp_delta(dqp)?;
        self.residual_cavlc(br)
    }

    fn intra_pred_cavlc(&mut self, br: &mut BitReader<'_>) {
        if self.syn.mb_type == MbType::INxN {
            let count = if self.cur().flags.contains(MbFlags::TRANSFORM_8X8) {
                4
            } else {
                16
            };
            for blk in 0..count {
                self.syn.intra_rem[blk] = if br.read_flag() {
                    None
                } else {
                    Some(br.read_bits(3) as u8)
                };
            }
        }
        self.cur_mut().intra_chroma_mode = br.read_ue(3) as u8;
    }

    /// 参考索引在当前列表上是否需要显式传输
    fn ref_idx_coded(&self, list: usize) -> bool {
        self.hdr.num_ref_idx_active[list] > 1
    }

    fn mb_pred_inter_cavlc(&mut self, br: &mut BitReader<'_>, mb_type: MbType) -> YingResult<()> {
        let MbType::Inter { part, dirs } = mb_type else {
            return Ok(());
        };
        for list in 0..2 {
            for p in 0..part.count() {
                if dirs[p] & (1 << list) == 0 {
                    continue;
                }
                let r = if self.ref_idx_coded(list) {
                    read_te(br, self.hdr.num_ref_idx_active[list] - 1)?
                } else {
                    0
                };
                self.fill_ref_idx(list, part.rect(p), r);
            }
        }
        for list in 0..2 {
            for p in 0..part.count() {
                if dirs[p] & (1 << list) == 0 {
                    continue;
                }
                let (x, y, _, _) = part.rect(p);
                self.syn.mvd[list][y * 4 + x] = read_mvd(br);
            }
        }
        Ok(())
    }

    /// 写入一个分区覆盖的 8x8 块的参考索引
    pub(crate) fn fill_ref_idx(&mut self, list: usize, rect: (usize, usize, usize, usize), r: i32) {
        let (x0, y0, w, h) = rect;
        let mb = self.cur_mut();
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                mb.ref_idx[list][raster_to_blk8(y * 4 + x)] = r as i8;
            }
        }
    }

    /// 返回 NoSubMbPartSizeLessThan8x8Flag
    fn sub_mb_pred_cavlc(&mut self, br: &mut BitReader<'_>, mb_type: MbType) -> YingResult<bool> {
        let is_b = mb_type == MbType::B8x8;
        let mut no_sub_8x8 = true;
        for b8 in 0..4 {
            let code = br.read_ue(u32::MAX);
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
                let r = if self.ref_idx_coded(list) && !ref0 {
                    read_te(br, self.hdr.num_ref_idx_active[list] - 1)?
                } else {
                    0
                };
                let (bx, by) = ((b8 & 1) * 2, (b8 >> 1) * 2);
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
                    let (x, y, _, _) = sub_rect(b8, sub, j);
                    self.syn.mvd[list][y * 4 + x] = read_mvd(br);
                }
            }
        }
        Ok(no_sub_8x8)
    }

    // ============================================================
    // 残差
    // ============================================================

    /// 亮度 4x4 块 (光栅 `raster`) 的 nC
    pub(crate) fn luma_nc(&self, raster: usize) -> i32 {
        let (x, y) = ((raster & 3) as i32, (raster >> 2) as i32);
        let get = |pos: Option<(usize, usize)>| pos.map(|(a, r)| i32::from(self.pic.mbs[a].nnz[r]));
        combine_nc(get(self.ctx.locate(x - 1, y)), get(self.ctx.locate(x, y - 1)))
    }

    /// 色度 AC 块的 nC, `c` 为 0 (Cb) 或 1 (Cr)
    pub(crate) fn chroma_nc(&self, c: usize, blk: usize) -> i32 {
        let (x, y) = ((blk & 1) as i32, (blk >> 1) as i32);
        let get = |pos: Option<(usize, usize)>| {
            pos.map(|(a, i)| i32::from(self.pic.mbs[a].nnz[16 + c * 4 + i]))
        };
        combine_nc(
            get(self.ctx.locate_chroma(x - 1, y)),
            get(self.ctx.locate_chroma(x, y - 1)),
        )
    }

    fn residual_cavlc(&mut self, br: &mut BitReader<'_>) -> YingResult<()> {
        let mb = *self.cur();
        let i16 = mb.flags.contains(MbFlags::INTRA16X16);
        let t8 = mb.flags.contains(MbFlags::TRANSFORM_8X8);
        let mut lv = [0i32; 16];

        if i16 {
            let nc = self.luma_nc(0);
            read_residual_block(br, nc, &mut lv)?;
            for (k, &v) in lv.iter().enumerate() {
                self.res.luma_dc[ZIGZAG_4X4[k]] = v;
            }
        }

        for b8 in 0..4 {
            if mb.cbp & (1 << b8) == 0 {
                continue;
            }
            for i4 in 0..4 {
                let raster = BLK_TO_RASTER[b8 * 4 + i4];
                let nc = self.luma_nc(raster);
                lv.fill(0);
                let total = if i16 {
                    let n = read_residual_block(br, nc, &mut lv[..15])?;
                    for k in 0..15 {
                        self.res.luma[raster][ZIGZAG_4X4[k + 1]] = lv[k];
                    }
                    n
                } else if t8 {
                    let n = read_residual_block(br, nc, &mut lv)?;
                    for k in 0..16 {
                        self.res.luma8x8[b8][ZIGZAG_8X8[4 * k + i4]] = lv[k];
                    }
                    n
                } else {
                    let n = read_residual_block(br, nc, &mut lv)?;
                    for k in 0..16 {
                        self.res.luma[raster][ZIGZAG_4X4[k]] = lv[k];
                    }
                    n
                };
                self.cur_mut().nnz[raster] = total;
            }
        }

        let cbp_chroma = mb.cbp >> 4;
        if cbp_chroma != 0 {
            for c in 0..2 {
                let mut dc = [0i32; 4];
                read_residual_block(br, -1, &mut dc)?;
                self.res.chroma_dc[c] = dc;
            }
        }
        if cbp_chroma & 2 != 0 {
            for c in 0..2 {
                for blk in 0..4 {
                    let nc = self.chroma_nc(c, blk);
                    lv.fill(0);
                    let total = read_residual_block(br, nc, &mut lv[..15])?;
                    for k in 0..15 {
                        self.res.chroma_ac[c][blk][ZIGZAG_4X4[k + 1]] = lv[k];
                    }
                    self.cur_mut().nnz[16 + c * 4 + blk] = total;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ying_core::bitwriter::BitWriter;

    #[test]
    fn test_combine_nc_rounds_up() {
        assert_eq!(combine_nc(Some(3), Some(4)), 4);
        assert_eq!(combine_nc(Some(3), None), 3);
        assert_eq!(combine_nc(None, Some(16)), 16);
        assert_eq!(combine_nc(None, None), 0);
    }

    #[test]
    fn test_te_single_bit_is_inverted() {
        let mut w = BitWriter::new();
        w.write_bit(0);
        w.write_bit(1);
        w.write_ue(2);
        w.write_ue(5);
        let data = w.finish();
        let mut br = BitReader::new(&data);
        assert_eq!(read_te(&mut br, 1).unwrap(), 1);
        assert_eq!(read_te(&mut br, 1).unwrap(), 0);
        assert_eq!(read_te(&mut br, 3).unwrap(), 2);
        assert!(read_te(&mut br, 3).is_err());
    }
}
