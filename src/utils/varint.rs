use crate::types::{
    MAX_VARINT_LENGTH,
    error::{RepairError, Result},
};

/// Reads a big-endian base-128 varint from the head of `bytes`.
///
/// Returns the value and the number of bytes consumed. Each of the first eight
/// bytes contributes seven bits while its high bit is set; a ninth byte that
/// still carries the continuation bit is treated as damage.
pub fn read_varint(bytes: &[u8]) -> Result<(i64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().take(MAX_VARINT_LENGTH).enumerate() {
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok((value as i64, i + 1));
        }
    }
    if bytes.len() < MAX_VARINT_LENGTH {
        Err(RepairError::damaged("varint runs past end of buffer"))
    } else {
        Err(RepairError::damaged("varint longer than 9 bytes"))
    }
}

/// Inverse of [`read_varint`] for non-negative values below 2^63.
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut groups = Vec::with_capacity(MAX_VARINT_LENGTH);
    let mut rest = value;
    loop {
        groups.push((rest & 0x7f) as u8);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    groups.reverse();
    let last = groups.len() - 1;
    for byte in &mut groups[..last] {
        *byte |= 0x80;
    }
    groups
}

/// Reads a big-endian two's-complement integer of `width` bytes and
/// sign-extends it.
pub fn read_int(bytes: &[u8], width: usize) -> Result<i64> {
    if width == 0 || width > 8 {
        return Err(RepairError::misuse(format!("invalid integer width {width}")));
    }
    let raw = bytes
        .get(..width)
        .ok_or_else(|| RepairError::damaged("integer runs past end of buffer"))?;
    let mut value: i64 = if raw[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in raw {
        value = (value << 8) | i64::from(*byte);
    }
    Ok(value)
}

pub fn read_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| RepairError::damaged(format!("u16 at offset {offset} out of range")))
}

pub fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| RepairError::damaged(format!("u32 at offset {offset} out of range")))
}

pub fn read_f64(bytes: &[u8]) -> Result<f64> {
    let raw = bytes
        .get(..8)
        .ok_or_else(|| RepairError::damaged("float runs past end of buffer"))?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(f64::from_be_bytes(buf))
}
