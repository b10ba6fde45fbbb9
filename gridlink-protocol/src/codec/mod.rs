//! Primitive wire codecs shared by the pack engine.
//!
//! The engine is encoding-agnostic: it drives a [`WireCodec`] implementation
//! chosen at run time (binary or XML) through a bounds-checked [`Cursor`] on
//! decode and a capped [`OutBuf`] on encode.

pub mod binary;
pub mod xml;

use crate::error::ProtocolError;
use crate::WireEncoding;
use bytes::{BufMut, Bytes, BytesMut};

/// Token written in place of a NULL pointer body under the binary encoding.
pub const NULL_PTR_TOKEN: &str = "%@#ANULLSTR$%";

/// Wire alignment widths for the binary encoding. Fixed, not platform
/// sniffed, so the packed form is identical on every host.
pub const INT16_ALIGN: usize = 2;
pub const INT_ALIGN: usize = 4;
pub const LONG_ALIGN: usize = 8;
pub const POINTER_ALIGN: usize = 8;

pub(crate) fn padding(pos: usize, width: usize) -> usize {
    (width - pos % width) % width
}

pub(crate) fn codec_for(encoding: WireEncoding) -> &'static dyn WireCodec {
    match encoding {
        WireEncoding::Binary => &binary::BinaryCodec,
        WireEncoding::Xml => &xml::XmlCodec,
    }
}

/// Bounds-checked read cursor over wire input. Every advance returns a
/// result instead of walking off the buffer.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.buf.get(self.pos..self.pos + n)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        match self.buf.get(self.pos..self.pos + n) {
            Some(slice) => {
                self.pos += n;
                Ok(slice)
            }
            None => Err(ProtocolError::Truncated {
                needed: n,
                remaining: self.remaining(),
            }),
        }
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.take(n).map(|_| ())
    }

    /// Skips padding up to the next multiple of `width`.
    pub fn align_to(&mut self, width: usize) -> Result<(), ProtocolError> {
        self.skip(padding(self.pos, width))
    }

    /// Takes the bytes before the next NUL, consuming the NUL as well.
    pub fn take_cstr(&mut self) -> Result<&'a [u8], ProtocolError> {
        let rest = self.rest();
        match rest.iter().position(|&b| b == 0) {
            Some(end) => {
                self.pos += end + 1;
                Ok(&rest[..end])
            }
            None => Err(ProtocolError::Truncated {
                needed: rest.len() + 1,
                remaining: rest.len(),
            }),
        }
    }
}

/// Growable output buffer with a hard size cap. Growth is amortized
/// doubling; exceeding the cap is an AllocationError and the buffer is
/// dropped by the failing call.
#[derive(Debug)]
pub struct OutBuf {
    buf: BytesMut,
    cap: usize,
}

impl OutBuf {
    pub fn new(cap: usize) -> OutBuf {
        OutBuf {
            buf: BytesMut::with_capacity(4096),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&mut self, extra: usize) -> Result<(), ProtocolError> {
        let requested = self.buf.len() + extra;
        if requested > self.cap {
            return Err(ProtocolError::Allocation {
                requested,
                cap: self.cap,
            });
        }
        self.buf.reserve(extra);
        Ok(())
    }

    pub fn put_slice(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.ensure(data.len())?;
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn put_u8(&mut self, b: u8) -> Result<(), ProtocolError> {
        self.ensure(1)?;
        self.buf.put_u8(b);
        Ok(())
    }

    /// Writes zero padding up to the next multiple of `width`.
    pub fn align_to(&mut self, width: usize) -> Result<(), ProtocolError> {
        let pad = padding(self.buf.len(), width);
        for _ in 0..pad {
            self.put_u8(0)?;
        }
        Ok(())
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// One wire encoding's primitive operations. The engine resolves counts and
/// drives these per item; implementations own tagging, byte order and the
/// NULL-pointer marker.
pub(crate) trait WireCodec {
    fn put_int(&self, out: &mut OutBuf, name: &str, vals: &[i32]) -> Result<(), ProtocolError>;
    fn put_int16(&self, out: &mut OutBuf, name: &str, vals: &[i16]) -> Result<(), ProtocolError>;
    fn put_long(&self, out: &mut OutBuf, name: &str, vals: &[i64]) -> Result<(), ProtocolError>;
    fn put_string(
        &self,
        out: &mut OutBuf,
        name: &str,
        s: &str,
        max_len: i32,
    ) -> Result<(), ProtocolError>;
    /// Fixed byte block of exactly `declared` wire bytes; shorter input is
    /// zero padded, longer input is a bounds error. `base64` selects the
    /// `bin` rendition under XML.
    fn put_block(
        &self,
        out: &mut OutBuf,
        name: &str,
        base64: bool,
        data: &[u8],
        declared: usize,
    ) -> Result<(), ProtocolError>;
    /// NULL pointer marker: sentinel token (binary) or nothing (XML).
    fn put_null(&self, out: &mut OutBuf, name: &str) -> Result<(), ProtocolError>;
    fn align_pointer(&self, out: &mut OutBuf) -> Result<(), ProtocolError>;
    fn begin_struct(&self, out: &mut OutBuf, ty: &str) -> Result<(), ProtocolError>;
    fn end_struct(&self, out: &mut OutBuf, ty: &str) -> Result<(), ProtocolError>;

    fn get_int(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        n: usize,
    ) -> Result<Vec<i32>, ProtocolError>;
    fn get_int16(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        n: usize,
    ) -> Result<Vec<i16>, ProtocolError>;
    fn get_long(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        n: usize,
    ) -> Result<Vec<i64>, ProtocolError>;
    fn get_string(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        max_len: i32,
    ) -> Result<String, ProtocolError>;
    fn get_block(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        base64: bool,
        declared: usize,
    ) -> Result<Vec<u8>, ProtocolError>;
    /// Detects the NULL marker for a pointer item. Binary consumes the
    /// sentinel when present; XML only peeks for the missing start tag.
    fn take_null(&self, cur: &mut Cursor<'_>, name: &str) -> bool;
    fn skip_pointer_align(&self, cur: &mut Cursor<'_>) -> Result<(), ProtocolError>;
    /// Struct-element entry that may legitimately be absent (pointer
    /// elements under XML). Consumes the start tag when it matches.
    fn try_begin_struct(&self, cur: &mut Cursor<'_>, ty: &str) -> bool;
    fn begin_struct_decode(&self, cur: &mut Cursor<'_>, ty: &str) -> Result<(), ProtocolError>;
    fn end_struct_decode(&self, cur: &mut Cursor<'_>, ty: &str) -> Result<(), ProtocolError>;
}
