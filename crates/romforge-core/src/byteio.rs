//! Little-endian field access for raw buffers.

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment.max(1)) * alignment.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bounds() {
        let buf = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(read_u16(&buf, 0), Some(0x1234));
        assert_eq!(read_u32(&buf, 0), Some(0x5678_1234));
        assert_eq!(read_u32(&buf, 1), None);
        assert_eq!(read_u16(&buf, usize::MAX), None);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(5, 1), 5);
        assert_eq!(align_up(5, 0), 5);
    }
}
