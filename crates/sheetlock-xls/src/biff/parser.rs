//! Little-endian field readers and the RK number encoding.

use crate::error::{XlsError, XlsResult};

/// Copy `N` bytes at `offset` and advance past them.
#[inline]
fn take<const N: usize>(data: &[u8], offset: &mut usize) -> XlsResult<[u8; N]> {
    let field = offset
        .checked_add(N)
        .and_then(|end| data.get(*offset..end))
        .ok_or_else(|| {
            XlsError::Parse(format!(
                "record ends at {} bytes, field of {N} at offset {offset}",
                data.len()
            ))
        })?;
    let mut out = [0u8; N];
    out.copy_from_slice(field);
    *offset += N;
    Ok(out)
}

#[inline]
pub fn read_u8(data: &[u8], offset: &mut usize) -> XlsResult<u8> {
    take::<1>(data, offset).map(|[b]| b)
}

#[inline]
pub fn read_u16(data: &[u8], offset: &mut usize) -> XlsResult<u16> {
    take(data, offset).map(u16::from_le_bytes)
}

#[inline]
pub fn read_u32(data: &[u8], offset: &mut usize) -> XlsResult<u32> {
    take(data, offset).map(u32::from_le_bytes)
}

#[inline]
pub fn read_f64(data: &[u8], offset: &mut usize) -> XlsResult<f64> {
    take(data, offset).map(f64::from_le_bytes)
}

/// A 4-byte RK number.
///
/// Bit 0 asks for a division by 100. Bit 1 selects a signed 30-bit integer
/// in bits 2..31; otherwise bits 2..31 are the high bits of an IEEE double
/// whose low 34 bits are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rk(pub u32);

impl Rk {
    const DIV100: u32 = 0x01;
    const INTEGER: u32 = 0x02;

    pub fn read(data: &[u8], offset: &mut usize) -> XlsResult<Self> {
        read_u32(data, offset).map(Rk)
    }

    /// The integer an unscaled integer RK holds.
    pub fn as_integer(self) -> Option<i64> {
        (self.0 & (Self::DIV100 | Self::INTEGER) == Self::INTEGER)
            .then(|| i64::from((self.0 as i32) >> 2))
    }

    pub fn to_f64(self) -> f64 {
        let value = if self.0 & Self::INTEGER != 0 {
            f64::from((self.0 as i32) >> 2)
        } else {
            f64::from_bits(u64::from(self.0 & !0x03) << 32)
        };
        if self.0 & Self::DIV100 != 0 {
            value / 100.0
        } else {
            value
        }
    }

    /// Encode `value` when it fits the signed 30-bit range.
    pub fn from_integer(value: i64) -> Option<Self> {
        const LIMIT: i64 = 1 << 29;
        (-LIMIT..LIMIT)
            .contains(&value)
            .then(|| Rk(((value as i32) << 2) as u32 | Self::INTEGER))
    }
}
