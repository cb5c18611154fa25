//! H.264 CABAC 算术解码引擎 (9.3.1.2, 9.3.3.2).
//!
//! 使用标准中的 9 位 codIRange / codIOffset 表示, 解出的每个 bin 与规范伪代码逐位一致.
//! 上下文状态以 `pStateIdx << 1 | valMPS` 的单字节形式存放.
//!
//! 引擎对外公开, 供基准测试与码流分析工具直接驱动.

use ying_core::bitreader::BitReader;

use super::cabac_tables::{
    CABAC_INIT_MN, NUM_CABAC_CONTEXTS, RANGE_TAB_LPS, TRANS_IDX_LPS, TRANS_IDX_MPS,
};

/// 上下文状态数组长度
pub const CABAC_STATE_COUNT: usize = 1024;

/// 根据切片 QP 与初始化表计算所有上下文的初始状态 (9.3.1.1)
///
/// `table` 为 0 时用于 I 切片, 1~3 对应 cabac_init_idc 0~2.
pub fn init_context_states(slice_qp: i32, table: usize) -> [u8; CABAC_STATE_COUNT] {
    let mut states = [0u8; CABAC_STATE_COUNT];
    let qp = slice_qp.clamp(0, 51);
    let mn = &CABAC_INIT_MN[table.min(3)];
    for (state, &(m, n)) in states.iter_mut().zip(mn.iter()).take(NUM_CABAC_CONTEXTS) {
        let pre = (((i32::from(m) * qp) >> 4) + i32::from(n)).clamp(1, 126);
        *state = if pre <= 63 {
            ((63 - pre) << 1) as u8
        } else {
            (((pre - 64) << 1) | 1) as u8
        };
    }
    states
}

/// CABAC 解码器
///
/// 持有切片数据的比特读取器, I_PCM 宏块通过 [`CabacDecoder::reader_mut`] 直接读取样本.
pub struct CabacDecoder<'a> {
    br: BitReader<'a>,
    range: u32,
    offset: u32,
    states: [u8; CABAC_STATE_COUNT],
}

impl<'a> CabacDecoder<'a> {
    /// 基于已定位到 slice_data() 开头的读取器创建解码器
    pub fn new(br: BitReader<'a>) -> Self {
        Self {
            br,
            range: 510,
            offset: 0,
            states: [0; CABAC_STATE_COUNT],
        }
    }

    /// 读取 cabac_alignment_one_bit 并初始化算术引擎
    ///
    /// 对齐位中出现 0 时返回 `true`, 表示码流很可能已损坏.
    pub fn start(&mut self) -> bool {
        let mut corrupt = false;
        while !self.br.byte_aligned() {
            corrupt |= self.br.read_bit() == 0;
        }
        self.init_engine();
        corrupt
    }

    /// 初始化上下文变量
    pub fn init_contexts(&mut self, slice_qp: i32, table: usize) {
        self.states = init_context_states(slice_qp, table);
    }

    /// 9.3.1.2: codIRange = 510, codIOffset = read_bits(9)
    pub fn init_engine(&mut self) {
        self.range = 510;
        self.offset = self.br.read_bits(9);
    }

    #[inline]
    fn renorm(&mut self) {
        if self.range < 256 {
            let shift = self.range.leading_zeros() - 23;
            self.range <<= shift;
            self.offset = (self.offset << shift) | self.br.read_bits(shift);
        }
    }

    /// 常规 bin 解码 (9.3.3.2.1)
    #[inline]
    pub fn decode_decision(&mut self, ctx_idx: usize) -> u32 {
        let state = self.states[ctx_idx];
        let p = usize::from(state >> 1);
        let mps = u32::from(state & 1);
        let q = ((self.range >> 6) & 3) as usize;
        let lps = u32::from(RANGE_TAB_LPS[p][q]);
        self.range -= lps;
        let bin;
        if self.offset >= self.range {
            bin = mps ^ 1;
            self.offset -= self.range;
            self.range = lps;
            let new_mps = if p == 0 { mps ^ 1 } else { mps };
            self.states[ctx_idx] = (TRANS_IDX_LPS[p] << 1) | new_mps as u8;
        } else {
            bin = mps;
            self.states[ctx_idx] = (TRANS_IDX_MPS[p] << 1) | mps as u8;
        }
        self.renorm();
        bin
    }

    /// 旁路 bin 解码 (9.3.3.2.3)
    #[inline]
    pub fn decode_bypass(&mut self) -> u32 {
        self.offset = (self.offset << 1) | self.br.read_bit();
        if self.offset >= self.range {
            self.offset -= self.range;
            1
        } else {
            0
        }
    }

    /// 终止 bin 解码 (9.3.3.2.4)
    ///
    /// 返回 1 时不再重归一化, 读取位置恰好位于编码器冲刷写出的最后一位之后.
    pub fn decode_terminate(&mut self) -> u32 {
        self.range -= 2;
        if self.offset >= self.range {
            1
        } else {
            self.renorm();
            0
        }
    }

    /// 直接访问底层读取器 (I_PCM 样本)
    pub(crate) fn reader_mut(&mut self) -> &mut BitReader<'a> {
        &mut self.br
    }

    /// 只读访问底层读取器
    pub(crate) fn reader(&self) -> &BitReader<'a> {
        &self.br
    }

    #[cfg(test)]
    pub(crate) fn state(&self, ctx_idx: usize) -> u8 {
        self.states[ctx_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::h264::tests::helpers::{CabacEncoder, XorShift};

    #[test]
    fn test_init_states_follow_formula() {
        // ctxIdx 0 的 (m, n) = (20, -15), QP 26: (20*26>>4) - 15 = 17 -> pStateIdx 46, MPS 0
        let states = init_context_states(26, 0);
        assert_eq!(states[0], 46 << 1);
        // ctxIdx 2 的 (m, n) = (3, 74): (3*26>>4) + 74 = 78 -> pStateIdx 14, MPS 1
        assert_eq!(states[2], (14 << 1) | 1);
        // 超出范围的 QP 被钳制
        assert_eq!(init_context_states(80, 1), init_context_states(51, 1));
        // 未使用的上下文保持 0
        assert!(states[NUM_CABAC_CONTEXTS..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_random_bins_match_reference_encoder() {
        let mut rng = XorShift::new(0x1234_5678);
        for round in 0..8 {
            let qp = (round * 7) as i32;
            let table = round % 4;
            let mut enc = CabacEncoder::new(qp, table);
            let mut script = Vec::new();
            for _ in 0..4000 {
                let kind = rng.next() % 10;
                let ctx = (rng.next() % NUM_CABAC_CONTEXTS as u32) as usize;
                // 偏斜分布, 让状态机走到高概率区
                let bin = u32::from(rng.next() % 8 == 0) ^ (ctx as u32 & 1);
                if kind == 0 {
                    enc.encode_bypass(bin);
                } else {
                    enc.encode_decision(ctx, bin);
                }
                script.push((kind, ctx, bin));
            }
            enc.encode_terminate(1);
            let data = enc.finish();

            let mut dec = CabacDecoder::new(BitReader::new(&data));
            assert!(!dec.start());
            dec.init_contexts(qp, table);
            for (i, &(kind, ctx, bin)) in script.iter().enumerate() {
                let got = if kind == 0 {
                    dec.decode_bypass()
                } else {
                    dec.decode_decision(ctx)
                };
                assert_eq!(got, bin, "第 {round} 轮第 {i} 个 bin 不一致");
            }
            assert_eq!(dec.decode_terminate(), 1);
            assert!(dec.reader().stop_bit_consumed());
        }
    }

    #[test]
    fn test_terminate_zero_then_one() {
        let mut enc = CabacEncoder::new(30, 0);
        enc.encode_decision(60, 1);
        enc.encode_terminate(0);
        enc.encode_decision(60, 0);
        enc.encode_terminate(1);
        let data = enc.finish();
        let mut dec = CabacDecoder::new(BitReader::new(&data));
        dec.start();
        dec.init_contexts(30, 0);
        assert_eq!(dec.decode_decision(60), 1);
        assert_eq!(dec.decode_terminate(), 0);
        assert_eq!(dec.decode_decision(60), 0);
        assert_eq!(dec.decode_terminate(), 1);
        assert!(dec.reader().stop_bit_consumed());
    }

    #[test]
    fn test_state_transitions_on_lps() {
        let mut enc = CabacEncoder::new(26, 0);
        // ctxIdx 0 的 MPS 为 0, 编码 1 走 LPS 路径
        enc.encode_decision(0, 1);
        enc.encode_terminate(1);
        let data = enc.finish();
        let mut dec = CabacDecoder::new(BitReader::new(&data));
        dec.start();
        dec.init_contexts(26, 0);
        assert_eq!(dec.decode_decision(0), 1);
        assert_eq!(dec.state(0), TRANS_IDX_LPS[46] << 1);
    }

    #[test]
    fn test_alignment_zero_bit_reported() {
        // 读取器先消耗 3 位, 对齐位中混入 0
        let data = [0b1110_1111, 0xFF, 0xFF, 0xFF];
        let mut br = BitReader::new(&data);
        br.read_bits(3);
        let mut dec = CabacDecoder::new(br);
        assert!(dec.start());
    }
}
