//! CAVLC 残差块解码 (9.2).
//!
//! coeff_token / total_zeros / run_before 的码表以 (码字, 码长) 形式存放,
//! 码字集合无前缀冲突, 因此按顺序比对 16 位预读值即可唯一确定符号.

use ying_core::bitreader::BitReader;
use ying_core::{YingError, YingResult};

// ============================================================
// 变长码查找
// ============================================================

/// 在 (bits, lens) 码表中查找当前码字, 返回符号索引
fn read_vlc<B: Copy + Into<u32>>(br: &mut BitReader, bits: &[B], lens: &[u8]) -> Option<usize> {
    let peek = br.peek_bits(16);
    for (sym, (&code, &len)) in bits.iter().zip(lens.iter()).enumerate() {
        if len == 0 {
            continue;
        }
        if peek >> (16 - u32::from(len)) == code.into() {
            br.skip_bits(usize::from(len));
            return Some(sym);
        }
    }
    None
}

/// coeff_token 符号 → (TrailingOnes, TotalCoeff)
fn token_to_counts(sym: usize) -> (usize, usize) {
    const TRAILING_ONES: [usize; 6] = [0, 0, 1, 0, 1, 2];
    const TOTAL_COEFF: [usize; 6] = [0, 1, 1, 2, 2, 2];
    if sym < 6 {
        (TRAILING_ONES[sym], TOTAL_COEFF[sym])
    } else {
        ((sym - 6) & 3, (sym + 6) >> 2)
    }
}

/// 由 nC 选择 coeff_token 码表, -1 表示色度 DC
fn nc_table(nc: i32) -> usize {
    match nc {
        0 | 1 => 0,
        2 | 3 => 1,
        4..=7 => 2,
        _ => 3,
    }
}

fn invalid(what: &str) -> YingError {
    YingError::InvalidData(format!("H264: CAVLC {what}"))
}

// ============================================================
// residual_block_cavlc
// ============================================================

/// 解码一个 CAVLC 残差块
///
/// `nc` 为 -1 时使用色度 DC 码表. 系数按扫描顺序写入 `levels[0..max_coeff]`
/// (调用方负责将 AC 块映射到扫描位置 1..16), 返回 TotalCoeff.
pub(crate) fn read_residual_block(
    br: &mut BitReader,
    nc: i32,
    levels: &mut [i32],
) -> YingResult<u8> {
    let max_coeff = levels.len();
    let sym = if nc < 0 {
        read_vlc(br, &CHROMA_DC_COEFF_TOKEN_BITS, &CHROMA_DC_COEFF_TOKEN_LENS)
    } else {
        let t = nc_table(nc);
        read_vlc(br, &COEFF_TOKEN_BITS[t], &COEFF_TOKEN_LENS[t])
    }
    .ok_or_else(|| invalid("coeff_token 无效"))?;
    let (trailing_ones, total_coeff) = token_to_counts(sym);
    if total_coeff > max_coeff {
        return Err(invalid("TotalCoeff 超过块大小"));
    }
    if total_coeff == 0 {
        return Ok(0);
    }

    // 按逆扫描顺序收集非零值
    let mut level = [0i32; 16];
    let mut suffix_length = u32::from(total_coeff > 10 && trailing_ones < 3);
    for (i, lv) in level.iter_mut().enumerate().take(total_coeff) {
        if i < trailing_ones {
            *lv = 1 - 2 * br.read_bit() as i32;
            continue;
        }
        let mut prefix = 0u32;
        while br.read_bit() == 0 {
            prefix += 1;
            if prefix > 25 {
                return Err(invalid("level_prefix 过长"));
            }
        }
        let mut code = (prefix.min(15) << suffix_length) as i32;
        let suffix_size = if prefix == 14 && suffix_length == 0 {
            4
        } else if prefix >= 15 {
            prefix - 3
        } else {
            suffix_length
        };
        if suffix_size > 0 {
            code += br.read_bits(suffix_size) as i32;
        }
        if prefix >= 15 && suffix_length == 0 {
            code += 15;
        }
        if prefix >= 16 {
            code += (1 << (prefix - 3)) - 4096;
        }
        if i == trailing_ones && trailing_ones < 3 {
            code += 2;
        }
        *lv = if code & 1 == 0 {
            (code + 2) >> 1
        } else {
            -((code + 1) >> 1)
        };
        if suffix_length == 0 {
            suffix_length = 1;
        }
        if lv.abs() > (3 << (suffix_length - 1)) && suffix_length < 6 {
            suffix_length += 1;
        }
    }

    let mut zeros_left = if total_coeff < max_coeff {
        let tz = if nc < 0 {
            read_vlc(
                br,
                &CHROMA_DC_TOTAL_ZERO_BITS[total_coeff - 1],
                &CHROMA_DC_TOTAL_ZERO_LENS[total_coeff - 1],
            )
        } else {
            read_vlc(
                br,
                &TOTAL_ZERO_BITS[total_coeff - 1],
                &TOTAL_ZERO_LENS[total_coeff - 1],
            )
        };
        tz.ok_or_else(|| invalid("total_zeros 无效"))?
    } else {
        0
    };
    if zeros_left + total_coeff > max_coeff {
        return Err(invalid("total_zeros 超过块大小"));
    }

    let mut run = [0usize; 16];
    for r in run.iter_mut().take(total_coeff - 1) {
        if zeros_left == 0 {
            break;
        }
        let t = (zeros_left - 1).min(6);
        let rb = read_vlc(br, &RUN_BEFORE_BITS[t], &RUN_BEFORE_LENS[t])
            .ok_or_else(|| invalid("run_before 无效"))?;
        if rb > zeros_left {
            return Err(invalid("run_before 超过剩余零个数"));
        }
        *r = rb;
        zeros_left -= rb;
    }
    run[total_coeff - 1] = zeros_left;

    levels.fill(0);
    let mut pos = 0usize;
    for i in (0..total_coeff).rev() {
        pos += run[i];
        levels[pos] = level[i];
        pos += 1;
    }
    Ok(total_coeff as u8)
}

// ============================================================
// 码表 (表 9-5, 9-7, 9-8, 9-9, 9-10)
// ============================================================

#[rustfmt::skip]
const COEFF_TOKEN_BITS: [[u16; 62]; 4] = [
    [
        0x01, 0x05, 0x01, 0x07, 0x04, 0x01, 0x07, 0x06, 0x05, 0x03, 0x07, 0x06, 0x05, 0x03, 0x07, 0x06,
        0x05, 0x04, 0x0F, 0x06, 0x05, 0x04, 0x0B, 0x0E, 0x05, 0x04, 0x08, 0x0A, 0x0D, 0x04, 0x0F, 0x0E,
        0x09, 0x04, 0x0B, 0x0A, 0x0D, 0x0C, 0x0F, 0x0E, 0x09, 0x0C, 0x0B, 0x0A, 0x0D, 0x08, 0x0F, 0x01,
        0x09, 0x0C, 0x0B, 0x0E, 0x0D, 0x08, 0x07, 0x0A, 0x09, 0x0C, 0x04, 0x06, 0x05, 0x08,
    ],
    [
        0x03, 0x0B, 0x02, 0x07, 0x07, 0x03, 0x07, 0x0A, 0x09, 0x05, 0x07, 0x06, 0x05, 0x04, 0x04, 0x06,
        0x05, 0x06, 0x07, 0x06, 0x05, 0x08, 0x0F, 0x06, 0x05, 0x04, 0x0B, 0x0E, 0x0D, 0x04, 0x0F, 0x0A,
        0x09, 0x04, 0x0B, 0x0E, 0x0D, 0x0C, 0x08, 0x0A, 0x09, 0x08, 0x0F, 0x0E, 0x0D, 0x0C, 0x0B, 0x0A,
        0x09, 0x0C, 0x07, 0x0B, 0x06, 0x08, 0x09, 0x08, 0x0A, 0x01, 0x07, 0x06, 0x05, 0x04,
    ],
    [
        0x0F, 0x0F, 0x0E, 0x0B, 0x0F, 0x0D, 0x08, 0x0C, 0x0E, 0x0C, 0x0F, 0x0A, 0x0B, 0x0B, 0x0B, 0x08,
        0x09, 0x0A, 0x09, 0x0E, 0x0D, 0x09, 0x08, 0x0A, 0x09, 0x08, 0x0F, 0x0E, 0x0D, 0x0D, 0x0B, 0x0E,
        0x0A, 0x0C, 0x0F, 0x0A, 0x0D, 0x0C, 0x0B, 0x0E, 0x09, 0x0C, 0x08, 0x0A, 0x0D, 0x08, 0x0D, 0x07,
        0x09, 0x0C, 0x09, 0x0C, 0x0B, 0x0A, 0x05, 0x08, 0x07, 0x06, 0x01, 0x04, 0x03, 0x02,
    ],
    [
        0x03, 0x00, 0x01, 0x04, 0x05, 0x06, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11,
        0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E, 0x1F, 0x20, 0x21,
        0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2A, 0x2B, 0x2C, 0x2D, 0x2E, 0x2F, 0x30, 0x31,
        0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F,
    ],
];

#[rustfmt::skip]
const COEFF_TOKEN_LENS: [[u8; 62]; 4] = [
    [
         1,  6,  2,  8,  6,  3,  9,  8,  7,  5, 10,  9,  8,  6, 11, 10,
         9,  7, 13, 11, 10,  8, 13, 13, 11,  9, 13, 13, 13, 10, 14, 14,
        13, 11, 14, 14, 14, 13, 15, 15, 14, 14, 15, 15, 15, 14, 16, 15,
        15, 15, 16, 16, 16, 15, 16, 16, 16, 16, 16, 16, 16, 16,
    ],
    [
         2,  6,  2,  6,  5,  3,  7,  6,  6,  4,  8,  6,  6,  4,  8,  7,
         7,  5,  9,  8,  8,  6, 11,  9,  9,  6, 11, 11, 11,  7, 12, 11,
        11,  9, 12, 12, 12, 11, 12, 12, 12, 11, 13, 13, 13, 12, 13, 13,
        13, 13, 13, 14, 13, 13, 14, 14, 14, 13, 14, 14, 14, 14,
    ],
    [
         4,  6,  4,  6,  5,  4,  6,  5,  5,  4,  7,  5,  5,  4,  7,  5,
         5,  4,  7,  6,  6,  4,  7,  6,  6,  4,  8,  7,  7,  5,  8,  8,
         7,  6,  9,  8,  8,  7,  9,  9,  8,  8,  9,  9,  9,  8, 10,  9,
         9,  9, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10,
    ],
    [6; 62],
];

const CHROMA_DC_COEFF_TOKEN_BITS: [u8; 14] = [1, 7, 1, 4, 6, 1, 3, 3, 2, 5, 2, 3, 2, 0];
const CHROMA_DC_COEFF_TOKEN_LENS: [u8; 14] = [2, 6, 1, 6, 6, 3, 6, 7, 7, 6, 6, 8, 8, 7];

#[rustfmt::skip]
const TOTAL_ZERO_BITS: [[u8; 16]; 15] = [
    [1, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 1],
    [7, 6, 5, 4, 3, 5, 4, 3, 2, 3, 2, 3, 2, 1, 0, 0],
    [5, 7, 6, 5, 4, 3, 4, 3, 2, 3, 2, 1, 1, 0, 0, 0],
    [3, 7, 5, 4, 6, 5, 4, 3, 3, 2, 2, 1, 0, 0, 0, 0],
    [5, 4, 3, 7, 6, 5, 4, 3, 2, 1, 1, 0, 0, 0, 0, 0],
    [1, 1, 7, 6, 5, 4, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0],
    [1, 1, 5, 4, 3, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 1, 3, 3, 2, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 1, 3, 2, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 1, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 2, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

#[rustfmt::skip]
const TOTAL_ZERO_LENS: [[u8; 16]; 15] = [
    [1, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 9],
    [3, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 6, 6, 6, 6, 0],
    [4, 3, 3, 3, 4, 4, 3, 3, 4, 5, 5, 6, 5, 6, 0, 0],
    [5, 3, 4, 4, 3, 3, 3, 4, 3, 4, 5, 5, 5, 0, 0, 0],
    [4, 4, 4, 3, 3, 3, 3, 3, 4, 5, 4, 5, 0, 0, 0, 0],
    [6, 5, 3, 3, 3, 3, 3, 3, 4, 3, 6, 0, 0, 0, 0, 0],
    [6, 5, 3, 3, 3, 2, 3, 4, 3, 6, 0, 0, 0, 0, 0, 0],
    [6, 4, 5, 3, 2, 2, 3, 3, 6, 0, 0, 0, 0, 0, 0, 0],
    [6, 6, 4, 2, 2, 3, 2, 5, 0, 0, 0, 0, 0, 0, 0, 0],
    [5, 5, 3, 2, 2, 2, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 4, 3, 3, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 4, 2, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

const CHROMA_DC_TOTAL_ZERO_BITS: [[u8; 4]; 3] = [[1, 1, 1, 0], [1, 1, 0, 0], [1, 0, 0, 0]];
const CHROMA_DC_TOTAL_ZERO_LENS: [[u8; 4]; 3] = [[1, 2, 3, 3], [1, 2, 2, 0], [1, 1, 0, 0]];

#[rustfmt::skip]
const RUN_BEFORE_BITS: [[u8; 15]; 7] = [
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 0, 1, 3, 2, 5, 4, 0, 0, 0, 0, 0, 0, 0, 0],
    [7, 6, 5, 4, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1],
];

#[rustfmt::skip]
const RUN_BEFORE_LENS: [[u8; 15]; 7] = [
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 2, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 3, 3, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 3, 3, 3, 3, 3, 3, 4, 5, 6, 7, 8, 9, 10, 11],
];

#[cfg(test)]
mod tests {
    use super::*;
    use ying_core::bitwriter::BitWriter;

    fn bits(s: &str) -> Vec<u8> {
        let mut bw = BitWriter::new();
        for c in s.chars().filter(|c| !c.is_whitespace()) {
            bw.write_bit(u32::from(c == '1'));
        }
        // 尾部填充, 避免 peek 越界影响判断
        bw.write_bits(0xFFFF, 16);
        bw.finish()
    }

    #[test]
    fn test_textbook_block_nc0() {
        // 0 3 -1 0 / 0 -1 1 0 / 1 0 0 0 / 0 0 0 0
        let data = bits("0000100 011 1 0010 111 10 1 1 01");
        let mut br = BitReader::new(&data);
        let mut levels = [0i32; 16];
        let tc = read_residual_block(&mut br, 0, &mut levels).unwrap();
        assert_eq!(tc, 5);
        assert_eq!(&levels[..8], &[0, 3, 0, 1, -1, -1, 0, 1]);
        assert!(levels[8..].iter().all(|&l| l == 0));
        assert_eq!(br.bits_consumed(), 24);
    }

    #[test]
    fn test_escape_level_prefix_15() {
        // TC=1 T1=0, level_prefix=15, 12 位后缀 166 => levelCode 198 => 100
        let data = bits("000101 0000000000000001 000010100110 1");
        let mut br = BitReader::new(&data);
        let mut levels = [0i32; 16];
        assert_eq!(read_residual_block(&mut br, 1, &mut levels).unwrap(), 1);
        assert_eq!(levels[0], 100);
    }

    #[test]
    fn test_flc_table_for_large_nc() {
        // nC >= 8: 6 位定长, 000000 表示 TC=1 T1=0
        let data = bits("000000 1 1");
        let mut br = BitReader::new(&data);
        let mut levels = [0i32; 15];
        assert_eq!(read_residual_block(&mut br, 9, &mut levels).unwrap(), 1);
        // level_prefix=0 经 +2 修正后 levelCode=2 => 2; total_zeros=0 ("1")
        assert_eq!(levels[0], 2);
        // 000011 表示空块
        let data = bits("000011");
        let mut br = BitReader::new(&data);
        assert_eq!(read_residual_block(&mut br, 16, &mut levels).unwrap(), 0);
    }

    #[test]
    fn test_chroma_dc_block() {
        // TC=1 T1=1 ("1"), 符号 "1" => -1, total_zeros=1 ("01")
        let data = bits("1 1 01");
        let mut br = BitReader::new(&data);
        let mut levels = [0i32; 4];
        assert_eq!(read_residual_block(&mut br, -1, &mut levels).unwrap(), 1);
        assert_eq!(levels, [0, -1, 0, 0]);
    }

    #[test]
    fn test_invalid_token_rejected() {
        // nC=0 码表中不存在 16 个 0 开头的码字
        let data = [0u8; 4];
        let mut br = BitReader::new(&data);
        let mut levels = [0i32; 16];
        assert!(read_residual_block(&mut br, 0, &mut levels).is_err());
    }
}
