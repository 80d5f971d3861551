//! Little-endian primitive readers and writers for SSP-BIN.

use crate::error::{CodecError, CodecResult};
use bytes::{Buf, BufMut, BytesMut};

/// Growable output buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, x: u8) {
        self.buf.put_u8(x);
    }

    pub fn write_i8(&mut self, x: i8) {
        self.buf.put_i8(x);
    }

    pub fn write_u16(&mut self, x: u16) {
        self.buf.put_u16_le(x);
    }

    pub fn write_i16(&mut self, x: i16) {
        self.buf.put_i16_le(x);
    }

    pub fn write_u32(&mut self, x: u32) {
        self.buf.put_u32_le(x);
    }

    pub fn write_i32(&mut self, x: i32) {
        self.buf.put_i32_le(x);
    }

    pub fn write_f32(&mut self, x: f32) {
        self.buf.put_f32_le(x);
    }

    /// 7 bits per byte, least significant group first, high bit = "more".
    pub fn write_varuint(&mut self, mut x: u64) {
        while x >= 0x80 {
            self.buf.put_u8((x & 0x7F) as u8 | 0x80);
            x >>= 7;
        }
        self.buf.put_u8(x as u8);
    }

    /// One length byte followed by the payload.
    pub fn write_sized(&mut self, data: &[u8]) -> CodecResult<()> {
        let len = u8::try_from(data.len()).map_err(|_| {
            CodecError::BinaryFormat(format!("{} bytes exceed the 255 byte limit", data.len()))
        })?;
        self.buf.put_u8(len);
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Cursor over received bytes. Never panics on short input.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    pub fn has_more(&self) -> bool {
        self.data.has_remaining()
    }

    fn need(&self, n: usize) -> CodecResult<()> {
        if self.data.remaining() < n {
            return Err(CodecError::Underflow {
                needed: n,
                available: self.data.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    pub fn read_i8(&mut self) -> CodecResult<i8> {
        self.need(1)?;
        Ok(self.data.get_i8())
    }

    pub fn read_u16(&mut self) -> CodecResult<u16> {
        self.need(2)?;
        Ok(self.data.get_u16_le())
    }

    pub fn read_i16(&mut self) -> CodecResult<i16> {
        self.need(2)?;
        Ok(self.data.get_i16_le())
    }

    pub fn read_u32(&mut self) -> CodecResult<u32> {
        self.need(4)?;
        Ok(self.data.get_u32_le())
    }

    pub fn read_i32(&mut self) -> CodecResult<i32> {
        self.need(4)?;
        Ok(self.data.get_i32_le())
    }

    pub fn read_f32(&mut self) -> CodecResult<f32> {
        self.need(4)?;
        Ok(self.data.get_f32_le())
    }

    pub fn read_varuint(&mut self) -> CodecResult<u64> {
        let mut x: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(CodecError::BinaryFormat("varuint too long".into()));
            }
            x |= u64::from(byte & 0x7F) << shift;
            if byte < 0x80 {
                return Ok(x);
            }
            shift += 7;
        }
    }

    /// Reads one length byte and that many bytes.
    pub fn read_sized(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_u8()? as usize;
        self.need(len)?;
        let out = self.data[..len].to_vec();
        self.data.advance(len);
        Ok(out)
    }

    /// Everything not yet consumed.
    pub fn rest(&self) -> &'a [u8] {
        self.data
    }
}
