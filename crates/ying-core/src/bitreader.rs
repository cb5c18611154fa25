//! RBSP 比特流读取器.
//!
//! 从 NAL 载荷 (仍含防竞争字节) 中按位读取数据, 读取时即时删除 `00 00 03` 中的 `03`,
//! 并提供 H.264 语法所需的定长读取与指数哥伦布 (Exp-Golomb) 读取.
//!
//! 读取越过末尾时不会报错, 而是返回 0 位并记录越界位数 ([`BitReader::overrun`]),
//! 由上层在语法单元结束时统一检查并报告畸形码流.

/// RBSP 比特流读取器
///
/// 使用 64 位左对齐缓存, 按大端位序 (MSB first) 读取.
///
/// # 示例
/// ```
/// use ying_core::bitreader::BitReader;
///
/// // 0x00 0x00 0x03 0x01 中的 0x03 为防竞争字节
/// let data = [0b1011_0001, 0x00, 0x00, 0x03, 0x01, 0x80];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4), 0b1011);
/// assert_eq!(br.read_bits(4), 0b0001);
/// assert_eq!(br.read_bits(24), 0x00_0001);
/// assert!(br.is_rbsp_end());
/// ```
#[derive(Clone)]
pub struct BitReader<'a> {
    /// 原始载荷 (含防竞争字节)
    data: &'a [u8],
    /// 下一个待装载字节的索引
    pos: usize,
    /// 左对齐的未读位缓存
    cache: u64,
    /// 缓存中的有效位数
    cache_bits: u32,
    /// 连续零字节计数, 用于识别防竞争字节
    zeros: u32,
    /// 已装载的真实 (去转义后) 位数
    loaded_bits: usize,
    /// 已消耗的位数
    consumed: usize,
    /// rbsp_stop_one_bit 在去转义位流中的位置
    stop_bit: Option<usize>,
}

impl<'a> BitReader<'a> {
    /// 创建读取器, 并预先定位 rbsp_stop_one_bit
    pub fn new(data: &'a [u8]) -> Self {
        let mut br = Self {
            data,
            pos: 0,
            cache: 0,
            cache_bits: 0,
            zeros: 0,
            loaded_bits: 0,
            consumed: 0,
            stop_bit: locate_stop_bit(data),
        };
        br.refill();
        br
    }

    /// 补充缓存至至少 57 位, 越过末尾时补 0
    #[inline]
    fn refill(&mut self) {
        while self.cache_bits <= 56 {
            let byte = match self.data.get(self.pos) {
                Some(&b) => {
                    self.pos += 1;
                    if self.zeros >= 2 && b == 0x03 {
                        self.zeros = 0;
                        continue;
                    }
                    self.zeros = if b == 0 { self.zeros + 1 } else { 0 };
                    self.loaded_bits += 8;
                    b
                }
                None => 0,
            };
            self.cache |= u64::from(byte) << (56 - self.cache_bits);
            self.cache_bits += 8;
        }
    }

    /// 读取 1 个位
    #[inline]
    pub fn read_bit(&mut self) -> u32 {
        self.read_bits(1)
    }

    /// 读取 1 个位并转换为布尔值
    #[inline]
    pub fn read_flag(&mut self) -> bool {
        self.read_bits(1) != 0
    }

    /// 读取 N 个位 (最多 32 位)
    #[inline]
    pub fn read_bits(&mut self, n: u32) -> u32 {
        debug_assert!(n <= 32);
        if n == 0 {
            return 0;
        }
        if self.cache_bits < n {
            self.refill();
        }
        let value = (self.cache >> (64 - n)) as u32;
        self.cache <<= n;
        self.cache_bits -= n;
        self.consumed += n as usize;
        value
    }

    /// 查看接下来 N 个位但不消耗 (最多 32 位)
    #[inline]
    pub fn peek_bits(&mut self, n: u32) -> u32 {
        debug_assert!(n <= 32);
        if n == 0 {
            return 0;
        }
        if self.cache_bits < n {
            self.refill();
        }
        (self.cache >> (64 - n)) as u32
    }

    /// 跳过任意数量的位
    pub fn skip_bits(&mut self, mut n: usize) {
        while n > 0 {
            let step = n.min(32) as u32;
            self.read_bits(step);
            n -= step as usize;
        }
    }

    /// 读取无符号指数哥伦布码 ue(v), 结果钳制到 `upper`
    pub fn read_ue(&mut self, upper: u32) -> u32 {
        self.refill();
        let leading = self.cache.leading_zeros().min(32);
        self.skip_bits(leading as usize);
        self.read_bits(1);
        let suffix = u64::from(self.read_bits(leading));
        let value = (1u64 << leading) - 1 + suffix;
        value.min(u64::from(upper)) as u32
    }

    /// 读取有符号指数哥伦布码 se(v), 结果钳制到 `[lower, upper]`
    pub fn read_se(&mut self, lower: i32, upper: i32) -> i32 {
        self.refill();
        let leading = self.cache.leading_zeros().min(32);
        self.skip_bits(leading as usize);
        self.read_bits(1);
        let suffix = u64::from(self.read_bits(leading));
        let k = (1u64 << leading) - 1 + suffix;
        let value = if k & 1 == 1 {
            ((k + 1) >> 1) as i64
        } else {
            -((k >> 1) as i64)
        };
        value.clamp(i64::from(lower), i64::from(upper)) as i32
    }

    /// 当前是否字节对齐
    pub fn byte_aligned(&self) -> bool {
        self.consumed % 8 == 0
    }

    /// 跳到下一个字节边界, 返回被跳过的位
    pub fn align_to_byte(&mut self) -> u32 {
        let rem = (8 - self.consumed % 8) % 8;
        self.read_bits(rem as u32)
    }

    /// 已消耗的 (去转义后) 位数
    pub fn bits_consumed(&self) -> usize {
        self.consumed
    }

    /// 越过载荷末尾读取的位数, 0 表示未越界
    pub fn overrun(&self) -> usize {
        self.consumed.saturating_sub(self.loaded_bits_total())
    }

    fn loaded_bits_total(&self) -> usize {
        if self.pos >= self.data.len() {
            self.loaded_bits
        } else {
            usize::MAX
        }
    }

    /// more_rbsp_data(): 当前位置之后是否还有 rbsp_stop_one_bit 以外的数据
    pub fn more_rbsp_data(&self) -> bool {
        self.stop_bit.is_some_and(|stop| self.consumed < stop)
    }

    /// 剩余数据是否恰为 rbsp_trailing_bits (一个 1 后跟若干 0)
    pub fn is_rbsp_end(&self) -> bool {
        self.stop_bit == Some(self.consumed)
    }

    /// rbsp_stop_one_bit 是否刚被读取 (CABAC 以终止位结束切片时使用)
    pub fn stop_bit_consumed(&self) -> bool {
        self.stop_bit.is_some_and(|stop| self.consumed == stop + 1)
    }

    /// 原始载荷
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// 在去转义位流中定位最后一个置位位 (rbsp_stop_one_bit)
fn locate_stop_bit(data: &[u8]) -> Option<usize> {
    let mut zeros = 0u32;
    let mut index = 0usize;
    let mut last = None;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        if b != 0 {
            last = Some(index * 8 + 7 - b.trailing_zeros() as usize);
        }
        index += 1;
    }
    last
}

/// 查找下一个起始码 `00 00 01`, 返回其首字节的索引
///
/// 四字节起始码 `00 00 00 01` 的前导零被视为上一个 NAL 的 trailing_zero_8bits,
/// 因此返回的是 `00 00 01` 的位置.
pub fn find_start_code(data: &[u8]) -> Option<usize> {
    data.windows(3)
        .position(|w| w[0] == 0 && w[1] == 0 && w[2] == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 把一串 ue(v) 编码为位串
    fn encode_ue(bits: &mut Vec<u8>, value: u32) {
        let v = u64::from(value) + 1;
        let len = 64 - v.leading_zeros();
        bits.extend(std::iter::repeat_n(0, (len - 1) as usize));
        for i in (0..len).rev() {
            bits.push(((v >> i) & 1) as u8);
        }
    }

    fn pack(bits: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; bits.len().div_ceil(8)];
        for (i, &b) in bits.iter().enumerate() {
            out[i / 8] |= b << (7 - i % 8);
        }
        out
    }

    #[test]
    fn test_read_bits_basic() {
        let data = [0xA5, 0xFF, 0x00, 0x80];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(4), 0xA);
        assert_eq!(br.read_bits(4), 0x5);
        assert_eq!(br.read_bits(12), 0xFF0);
        assert_eq!(br.bits_consumed(), 20);
        assert_eq!(br.peek_bits(4), 0);
        assert_eq!(br.peek_bits(5), 1);
    }

    #[test]
    fn test_read_32_bits() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(32), 0x1234_5678);
        assert_eq!(br.read_bits(8), 0x9A);
    }

    #[test]
    fn test_emulation_prevention_removed() {
        let data = [0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x01];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(16), 0);
        assert_eq!(br.read_bits(16), 0);
        assert_eq!(br.read_bits(8), 0x01);
        assert_eq!(br.overrun(), 0);
    }

    #[test]
    fn test_emulation_byte_not_after_two_zeros_is_kept() {
        let data = [0x00, 0x03, 0x03];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(24), 0x00_0303);
    }

    #[test]
    fn test_overrun_yields_zero_bits() {
        let data = [0xFF];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(8), 0xFF);
        assert_eq!(br.overrun(), 0);
        assert_eq!(br.read_bits(16), 0);
        assert_eq!(br.overrun(), 16);
    }

    #[test]
    fn test_exp_golomb_round_trip_wide_range() {
        let values: Vec<u32> = (0..4096u32)
            .chain((0..20).map(|s| (1u32 << s) - 1))
            .chain((1..20).map(|s| 1u32 << s))
            .chain([(1 << 20) - 2, 999_999, 123_456])
            .collect();
        let mut bits = Vec::new();
        for &v in &values {
            encode_ue(&mut bits, v);
        }
        bits.push(1);
        let data = pack(&bits);
        let mut br = BitReader::new(&data);
        for &v in &values {
            assert_eq!(br.read_ue(u32::MAX), v, "ue 解码不一致: {v}");
        }
        assert!(br.is_rbsp_end());
    }

    #[test]
    fn test_signed_exp_golomb_mapping() {
        // k -> 0, 1, -1, 2, -2, ...
        let mut bits = Vec::new();
        for k in 0..200u32 {
            encode_ue(&mut bits, k);
        }
        bits.push(1);
        let data = pack(&bits);
        let mut br = BitReader::new(&data);
        for k in 0..200i32 {
            let expected = if k % 2 == 1 { (k + 1) / 2 } else { -(k / 2) };
            assert_eq!(br.read_se(i32::MIN, i32::MAX), expected);
        }
    }

    #[test]
    fn test_exp_golomb_clamped_to_bounds() {
        let mut bits = Vec::new();
        encode_ue(&mut bits, 300);
        encode_ue(&mut bits, 2 * 40); // se = -40
        bits.push(1);
        let data = pack(&bits);
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_ue(255), 255);
        assert_eq!(br.read_se(-26, 25), -26);
    }

    #[test]
    fn test_exp_golomb_32_leading_zeros() {
        // 32 个零, 1, 然后 32 位后缀 (全 0) => 2^32 - 1, 钳制到上界
        let mut bits = vec![0u8; 32];
        bits.push(1);
        bits.extend(std::iter::repeat_n(0, 32));
        bits.push(1);
        let data = pack(&bits);
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_ue(139_263), 139_263);
        assert!(br.is_rbsp_end());
    }

    #[test]
    fn test_more_rbsp_data_and_trailing_bits() {
        // 101 + 停止位 1 + 对齐 0 + cabac_zero_word
        let data = [0b1011_0000, 0x00, 0x00];
        let mut br = BitReader::new(&data);
        assert!(br.more_rbsp_data());
        br.read_bits(3);
        assert!(!br.more_rbsp_data());
        assert!(br.is_rbsp_end());
        br.read_bit();
        assert!(br.stop_bit_consumed());
    }

    #[test]
    fn test_align_to_byte() {
        let data = [0b1110_0000, 0xAB];
        let mut br = BitReader::new(&data);
        br.read_bits(3);
        assert!(!br.byte_aligned());
        assert_eq!(br.align_to_byte(), 0);
        assert!(br.byte_aligned());
        assert_eq!(br.read_bits(8), 0xAB);
    }

    #[test]
    fn test_find_start_code() {
        let data = [0x65, 0x88, 0x00, 0x00, 0x00, 0x01, 0x41];
        assert_eq!(find_start_code(&data), Some(3));
        assert_eq!(find_start_code(&data[6..]), None);
    }
}
