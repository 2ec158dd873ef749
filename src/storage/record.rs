//! Record format decoding: the serial-type header followed by column bodies.

use crate::{
    types::{
        error::{RepairError, Result},
        row::Column,
    },
    utils::varint::{read_f64, read_int, read_varint},
};

const FIXED_LENGTHS: [usize; 12] = [0, 1, 2, 3, 4, 6, 8, 8, 0, 0, 0, 0];

/// Body length in bytes for a serial type.
pub fn serial_type_length(serial_type: i64) -> usize {
    match serial_type {
        t if t < 0 => 0,
        t if t < 12 => FIXED_LENGTHS[t as usize],
        t => ((t - 12 - t % 2) / 2) as usize,
    }
}

/// Decodes a fully assembled payload into `column`.
///
/// The header offset must land exactly on the header length and the body
/// offset exactly on the payload end; anything else means the serial-type
/// stream is corrupt and cannot be resynchronised.
pub fn decode_record(payload: &[u8], column: &mut Column) -> Result<()> {
    let (header_len, mut header_offset) = read_varint(payload)?;
    let header_len = usize::try_from(header_len)
        .ok()
        .filter(|len| *len <= payload.len())
        .ok_or_else(|| RepairError::damaged(format!("record header length {header_len} out of range")))?;

    let mut value_offset = header_len;
    while header_offset < header_len {
        let (serial_type, used) = read_varint(&payload[header_offset..header_len])?;
        header_offset += used;

        let length = serial_type_length(serial_type);
        let body = payload
            .get(value_offset..)
            .and_then(|rest| rest.get(..length))
            .ok_or_else(|| {
                RepairError::damaged(format!(
                    "value of serial type {serial_type} runs past payload end"
                ))
            })?;

        match serial_type {
            0 => column.add_null(),
            1..=6 => column.add_integer64(read_int(body, length)?),
            7 => column.add_number(read_f64(body)?),
            8 => column.add_integer(0),
            9 => column.add_integer(1),
            t if t >= 12 && t % 2 == 0 => column.add_binary(body),
            t if t >= 12 => column.add_text_bytes(body),
            t => return Err(RepairError::damaged(format!("invalid serial type {t}"))),
        }
        value_offset += length;
    }

    if header_offset != header_len || value_offset != payload.len() {
        return Err(RepairError::damaged(format!(
            "record ends at header {header_offset}/{header_len}, body {value_offset}/{}",
            payload.len()
        )));
    }
    Ok(())
}
