//! RBSP 比特流写入器.
//!
//! 与 [`BitReader`](crate::bitreader::BitReader) 对应, 按大端位序写入定长字段与指数哥伦布码,
//! 并能把 RBSP 封装为带防竞争字节的 Annex-B NAL 单元. 主要用于测试中构造码流.

/// RBSP 比特流写入器
///
/// # 示例
/// ```
/// use ying_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_bits(0b1011, 4);
/// bw.write_ue(0);
/// bw.write_trailing_bits();
/// assert_eq!(bw.finish(), vec![0b1011_1100]);
/// ```
#[derive(Default)]
pub struct BitWriter {
    /// 输出缓冲区
    data: Vec<u8>,
    /// 当前字节 (正在填充)
    current_byte: u8,
    /// 当前字节中已填充的位数 (0-7)
    bit_count: u8,
}

impl BitWriter {
    /// 创建新的比特流写入器
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取已写入的总位数
    pub fn bits_written(&self) -> usize {
        self.data.len() * 8 + self.bit_count as usize
    }

    /// 写入 1 个位
    pub fn write_bit(&mut self, bit: u32) {
        self.current_byte = (self.current_byte << 1) | (bit & 1) as u8;
        self.bit_count += 1;
        if self.bit_count == 8 {
            self.data.push(self.current_byte);
            self.current_byte = 0;
            self.bit_count = 0;
        }
    }

    /// 写入布尔标志
    pub fn write_flag(&mut self, flag: bool) {
        self.write_bit(u32::from(flag));
    }

    /// 写入 N 个位 (最多 32 位), 值的低 N 位高位在前
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={} 超过 32 位", n);
        for i in (0..n).rev() {
            self.write_bit(value >> i);
        }
    }

    /// 写入无符号指数哥伦布码 ue(v)
    pub fn write_ue(&mut self, value: u32) {
        let v = u64::from(value) + 1;
        let len = 64 - v.leading_zeros();
        for _ in 1..len {
            self.write_bit(0);
        }
        for i in (0..len).rev() {
            self.write_bit((v >> i) as u32);
        }
    }

    /// 写入有符号指数哥伦布码 se(v)
    pub fn write_se(&mut self, value: i32) {
        let k = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.write_ue(k);
    }

    /// 写入 te(v): 范围为 1 时是单个取反位, 否则同 ue(v)
    pub fn write_te(&mut self, value: u32, range: u32) {
        if range == 1 {
            self.write_bit(u32::from(value == 0));
        } else {
            self.write_ue(value);
        }
    }

    /// 当前是否字节对齐
    pub fn byte_aligned(&self) -> bool {
        self.bit_count == 0
    }

    /// 用 0 填充到字节边界
    pub fn align_zero(&mut self) {
        while self.bit_count != 0 {
            self.write_bit(0);
        }
    }

    /// 写入 rbsp_trailing_bits: 一个 1 后跟 0 对齐
    pub fn write_trailing_bits(&mut self) {
        self.write_bit(1);
        self.align_zero();
    }

    /// 写入整字节序列 (必须已对齐)
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        debug_assert!(self.byte_aligned());
        self.data.extend_from_slice(bytes);
    }

    /// 完成写入, 不足一字节时补 0
    pub fn finish(mut self) -> Vec<u8> {
        self.align_zero();
        self.data
    }
}

/// 在 RBSP 中插入防竞争字节, 得到 NAL 载荷
pub fn escape_rbsp(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64 + 4);
    let mut zeros = 0;
    for &b in rbsp {
        if zeros >= 2 && b <= 3 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// 以四字节起始码封装一个 NAL 单元 (`header` 为 NAL 头字节)
pub fn annex_b_nal(header: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![0, 0, 0, 1, header];
    out.extend(escape_rbsp(rbsp));
    out
}
