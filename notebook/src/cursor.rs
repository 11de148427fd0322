use crate::DecodeError;

/// Byte cursor over a decoded page blob.
///
/// Position is explicit so callers can checkpoint before a speculative tag
/// probe and rewind if it does not match; all reads are bounds-checked and
/// fail with `Truncated` instead of panicking.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Rewind (or jump forward) to a previously saved position. Positions
    /// past the end are clamped so a bad block length cannot panic later.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32_le(&mut self) -> Result<f32, DecodeError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f64_le(&mut self) -> Result<f64, DecodeError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// LEB128-style varint, 7 bits per byte, low group first.
    pub fn varint(&mut self) -> Result<u64, DecodeError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(DecodeError::Block("varint overflow".into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_reads_advance_in_order() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut cur = Cursor::new(&data);
        assert_eq!(cur.u8().unwrap(), 0x01);
        assert_eq!(cur.u16_le().unwrap(), 0x0302);
        assert_eq!(cur.pos(), 3);
        assert_eq!(cur.remaining(), 2);
    }

    #[test]
    fn reads_past_end_fail_without_moving() {
        let data = [0xaa];
        let mut cur = Cursor::new(&data);
        assert!(matches!(cur.u32_le(), Err(DecodeError::Truncated)));
        assert_eq!(cur.pos(), 0);
        assert_eq!(cur.u8().unwrap(), 0xaa);
    }

    #[test]
    fn checkpoint_and_rewind() {
        let data = [1, 2, 3, 4];
        let mut cur = Cursor::new(&data);
        cur.u8().unwrap();
        let cp = cur.pos();
        cur.u16_le().unwrap();
        cur.set_pos(cp);
        assert_eq!(cur.u8().unwrap(), 2);
    }

    #[test]
    fn varint_single_and_multi_byte() {
        let data = [0x05, 0xac, 0x02];
        let mut cur = Cursor::new(&data);
        assert_eq!(cur.varint().unwrap(), 5);
        assert_eq!(cur.varint().unwrap(), 300);
    }
}
