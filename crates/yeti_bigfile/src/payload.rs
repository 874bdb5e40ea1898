//! Splitting a file body into its header ints and payload
//!
//! A decompressed body is laid out as `[i32 count][count x i32][payload]`. Bodies shorter than the count word
//! carry no header at all.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::types::FileKey;

const COUNT_LENGTH: usize = 4;
const INT_LENGTH: usize = 4;

fn header_len(key: FileKey, count: i32, body_len: usize) -> Result<usize> {
    let len = usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(INT_LENGTH))
        .and_then(|ints| ints.checked_add(COUNT_LENGTH));

    match len {
        Some(len) if len <= body_len => Ok(len),
        _ => Err(Error::TruncatedRead {
            key,
            expected: COUNT_LENGTH + (count.max(0) as usize) * INT_LENGTH,
            actual: body_len,
        }),
    }
}

/// Decode the header ints of `body`, returning them with the number of bytes they occupy
pub fn split_header(key: FileKey, body: &[u8]) -> Result<(Vec<i32>, usize)> {
    if body.len() < COUNT_LENGTH {
        return Ok((Vec::new(), 0));
    }

    let mut cursor = body;
    let count = cursor.read_i32::<LittleEndian>()?;
    let len = header_len(key, count, body.len())?;

    let mut header = vec![0i32; (len - COUNT_LENGTH) / INT_LENGTH];
    cursor.read_i32_into::<LittleEndian>(&mut header)?;

    Ok((header, len))
}

/// Read only the header ints from a stream positioned at the start of a body of `body_len` bytes
///
/// Stream failures surface as [`Error::IOFailure`], the caller decides what they mean for its framing.
pub(crate) fn read_header_from<R: Read>(
    key: FileKey,
    reader: &mut R,
    body_len: usize,
) -> Result<Vec<i32>> {
    if body_len < COUNT_LENGTH {
        return Ok(Vec::new());
    }

    let count = reader.read_i32::<LittleEndian>()?;
    let len = header_len(key, count, body_len)?;

    let mut header = vec![0i32; (len - COUNT_LENGTH) / INT_LENGTH];
    reader.read_i32_into::<LittleEndian>(&mut header)?;
    Ok(header)
}

/// Assemble a body from header ints and payload
pub fn encode_body(header: &[i32], payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(COUNT_LENGTH + header.len() * INT_LENGTH + payload.len());
    // writes into a Vec cannot fail
    let _ = body.write_i32::<LittleEndian>(header.len() as i32);
    for value in header {
        let _ = body.write_i32::<LittleEndian>(*value);
    }
    body.extend_from_slice(payload);
    body
}
