// ByteBuffer - little-endian binary serialization/deserialization
// Used for navmesh tile data blobs

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Error, ErrorKind};

/// A byte buffer for reading/writing binary blobs.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

fn read_past_end() -> Error {
    Error::new(ErrorKind::UnexpectedEof, "ByteBuffer read past end")
}

impl ByteBuffer {
    /// Create a new empty ByteBuffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            data: Vec::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Wrap existing bytes for reading
    pub fn from_bytes(data: &[u8]) -> Self {
        ByteBuffer {
            data: data.to_vec(),
            read_pos: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer, returning the written bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    // ---- Write operations (append) ----

    pub fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    pub fn write_u8(&mut self, val: u8) {
        self.data.push(val);
    }

    pub fn write_u16(&mut self, val: u16) {
        self.data.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_u32(&mut self, val: u32) {
        self.data.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_i32(&mut self, val: i32) {
        self.data.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_u64(&mut self, val: u64) {
        self.data.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_f32(&mut self, val: f32) {
        self.data.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_vec3(&mut self, v: [f32; 3]) {
        for c in v {
            self.write_f32(c);
        }
    }

    // ---- Read operations ----

    fn cursor(&self, len: usize) -> Result<Cursor<&[u8]>, Error> {
        if self.read_pos + len > self.data.len() {
            return Err(read_past_end());
        }
        Ok(Cursor::new(&self.data[self.read_pos..self.read_pos + len]))
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let val = self.cursor(1)?.read_u8()?;
        self.read_pos += 1;
        Ok(val)
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        let val = self.cursor(2)?.read_u16::<LittleEndian>()?;
        self.read_pos += 2;
        Ok(val)
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let val = self.cursor(4)?.read_u32::<LittleEndian>()?;
        self.read_pos += 4;
        Ok(val)
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        let val = self.cursor(4)?.read_i32::<LittleEndian>()?;
        self.read_pos += 4;
        Ok(val)
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        let val = self.cursor(8)?.read_u64::<LittleEndian>()?;
        self.read_pos += 8;
        Ok(val)
    }

    pub fn read_f32(&mut self) -> Result<f32, Error> {
        let val = self.cursor(4)?.read_f32::<LittleEndian>()?;
        self.read_pos += 4;
        Ok(val)
    }

    pub fn read_vec3(&mut self) -> Result<[f32; 3], Error> {
        Ok([self.read_f32()?, self.read_f32()?, self.read_f32()?])
    }

    /// Read N bytes
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, Error> {
        if self.read_pos + count > self.data.len() {
            return Err(read_past_end());
        }
        let bytes = self.data[self.read_pos..self.read_pos + count].to_vec();
        self.read_pos += count;
        Ok(bytes)
    }

    /// Skip N bytes in the read position
    pub fn read_skip(&mut self, count: usize) {
        self.read_pos = (self.read_pos + count).min(self.data.len());
    }
}

impl std::fmt::Display for ByteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteBuffer(size={}, rpos={})", self.size(), self.read_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_values() {
        let mut buf = ByteBuffer::new();
        buf.write_u8(42);
        buf.write_u16(0xBEEF);
        buf.write_i32(-7);
        buf.write_u64(1 << 40);
        buf.write_vec3([1.0, -2.5, 3.25]);
        assert_eq!(buf.size(), 1 + 2 + 4 + 8 + 12);

        assert_eq!(buf.read_u8().unwrap(), 42);
        assert_eq!(buf.read_u16().unwrap(), 0xBEEF);
        assert_eq!(buf.read_i32().unwrap(), -7);
        assert_eq!(buf.read_u64().unwrap(), 1 << 40);
        assert_eq!(buf.read_vec3().unwrap(), [1.0, -2.5, 3.25]);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_read_past_end() {
        let mut buf = ByteBuffer::from_bytes(&[1, 2, 3]);
        assert!(buf.read_u32().is_err());
        // failed reads don't move the cursor
        assert_eq!(buf.read_pos(), 0);
        assert_eq!(buf.read_bytes(3).unwrap(), vec![1, 2, 3]);
        assert!(buf.read_u8().is_err());
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = ByteBuffer::new();
        buf.write_u32(0x4D53_4554);
        assert_eq!(buf.contents(), &[0x54, 0x45, 0x53, 0x4D]);
    }
}
