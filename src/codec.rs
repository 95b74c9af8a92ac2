//! Bounds-checked little-endian field access on raw region bytes

use crate::error::{BroadcastError, Result};
use std::ops::Range;

fn field(buf: &[u8], offset: usize, len: usize) -> Result<Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= buf.len() => Ok(offset..end),
        _ => Err(BroadcastError::OutOfBounds {
            offset,
            len,
            size: buf.len(),
        }),
    }
}

pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N]> {
    let range = field(buf, offset, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[range]);
    Ok(out)
}

pub(crate) fn write_bytes(buf: &mut [u8], offset: usize, bytes: &[u8]) -> Result<()> {
    let range = field(buf, offset, bytes.len())?;
    buf[range].copy_from_slice(bytes);
    Ok(())
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    read_array(buf, offset).map(u32::from_le_bytes)
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> Result<u64> {
    read_array(buf, offset).map(u64::from_le_bytes)
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, val: u32) -> Result<()> {
    write_bytes(buf, offset, &val.to_le_bytes())
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, val: u64) -> Result<()> {
    write_bytes(buf, offset, &val.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_are_little_endian() {
        let mut buf = [0u8; 12];
        write_u32(&mut buf, 0, 0x0403_0201).unwrap();
        write_u64(&mut buf, 4, 0x0c0b_0a09_0807_0605).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(read_u32(&buf, 0).unwrap(), 0x0403_0201);
        assert_eq!(read_u64(&buf, 4).unwrap(), 0x0c0b_0a09_0807_0605);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut buf = [0u8; 8];
        assert!(matches!(
            read_u64(&buf, 1),
            Err(BroadcastError::OutOfBounds { offset: 1, len: 8, size: 8 })
        ));
        assert!(write_u32(&mut buf, 5, 1).is_err());
        assert!(read_array::<2>(&buf, usize::MAX).is_err());
        // Failed writes leave the buffer alone
        assert_eq!(buf, [0u8; 8]);
    }
}
