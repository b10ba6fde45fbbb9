//! Compact binary wire encoding.
//!
//! Scalars are network byte order, aligned to their own width within the
//! packed buffer; strings are NUL terminated; byte blocks are copied
//! verbatim; a NULL pointer body is the reserved sentinel token.

use super::{Cursor, OutBuf, WireCodec, INT16_ALIGN, INT_ALIGN, LONG_ALIGN, POINTER_ALIGN};
use super::NULL_PTR_TOKEN;
use crate::error::ProtocolError;

pub(crate) struct BinaryCodec;

fn check_no_nul(name: &str, s: &str) -> Result<(), ProtocolError> {
    if s.as_bytes().contains(&0) {
        return Err(ProtocolError::ValueMismatch {
            field: name.to_string(),
            expected: "string without interior NUL",
        });
    }
    Ok(())
}

impl WireCodec for BinaryCodec {
    fn put_int(&self, out: &mut OutBuf, _name: &str, vals: &[i32]) -> Result<(), ProtocolError> {
        out.align_to(INT_ALIGN)?;
        for v in vals {
            out.put_slice(&v.to_be_bytes())?;
        }
        Ok(())
    }

    fn put_int16(&self, out: &mut OutBuf, _name: &str, vals: &[i16]) -> Result<(), ProtocolError> {
        out.align_to(INT16_ALIGN)?;
        for v in vals {
            out.put_slice(&v.to_be_bytes())?;
        }
        Ok(())
    }

    fn put_long(&self, out: &mut OutBuf, _name: &str, vals: &[i64]) -> Result<(), ProtocolError> {
        out.align_to(LONG_ALIGN)?;
        for v in vals {
            out.put_slice(&v.to_be_bytes())?;
        }
        Ok(())
    }

    fn put_string(
        &self,
        out: &mut OutBuf,
        name: &str,
        s: &str,
        max_len: i32,
    ) -> Result<(), ProtocolError> {
        check_no_nul(name, s)?;
        if max_len >= 0 && s.len() >= max_len as usize {
            return Err(ProtocolError::Bounds {
                len: s.len(),
                max: max_len as usize,
            });
        }
        out.put_slice(s.as_bytes())?;
        out.put_u8(0)
    }

    fn put_block(
        &self,
        out: &mut OutBuf,
        _name: &str,
        _base64: bool,
        data: &[u8],
        declared: usize,
    ) -> Result<(), ProtocolError> {
        if data.len() > declared {
            return Err(ProtocolError::Bounds {
                len: data.len(),
                max: declared,
            });
        }
        out.put_slice(data)?;
        for _ in data.len()..declared {
            out.put_u8(0)?;
        }
        Ok(())
    }

    fn put_null(&self, out: &mut OutBuf, _name: &str) -> Result<(), ProtocolError> {
        out.put_slice(NULL_PTR_TOKEN.as_bytes())?;
        out.put_u8(0)
    }

    fn align_pointer(&self, out: &mut OutBuf) -> Result<(), ProtocolError> {
        out.align_to(POINTER_ALIGN)
    }

    fn begin_struct(&self, _out: &mut OutBuf, _ty: &str) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn end_struct(&self, _out: &mut OutBuf, _ty: &str) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn get_int(
        &self,
        cur: &mut Cursor<'_>,
        _name: &str,
        n: usize,
    ) -> Result<Vec<i32>, ProtocolError> {
        cur.align_to(INT_ALIGN)?;
        let mut vals = Vec::with_capacity(n.min(256));
        for _ in 0..n {
            let b = cur.take(4)?;
            vals.push(i32::from_be_bytes([b[0], b[1], b[2], b[3]]));
        }
        Ok(vals)
    }

    fn get_int16(
        &self,
        cur: &mut Cursor<'_>,
        _name: &str,
        n: usize,
    ) -> Result<Vec<i16>, ProtocolError> {
        cur.align_to(INT16_ALIGN)?;
        let mut vals = Vec::with_capacity(n.min(256));
        for _ in 0..n {
            let b = cur.take(2)?;
            vals.push(i16::from_be_bytes([b[0], b[1]]));
        }
        Ok(vals)
    }

    fn get_long(
        &self,
        cur: &mut Cursor<'_>,
        _name: &str,
        n: usize,
    ) -> Result<Vec<i64>, ProtocolError> {
        cur.align_to(LONG_ALIGN)?;
        let mut vals = Vec::with_capacity(n.min(256));
        for _ in 0..n {
            let b = cur.take(8)?;
            vals.push(i64::from_be_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]));
        }
        Ok(vals)
    }

    fn get_string(
        &self,
        cur: &mut Cursor<'_>,
        _name: &str,
        max_len: i32,
    ) -> Result<String, ProtocolError> {
        let bytes = cur.take_cstr()?;
        if max_len >= 0 && bytes.len() >= max_len as usize {
            return Err(ProtocolError::Bounds {
                len: bytes.len(),
                max: max_len as usize,
            });
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::Utf8("string field"))
    }

    fn get_block(
        &self,
        cur: &mut Cursor<'_>,
        _name: &str,
        _base64: bool,
        declared: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        Ok(cur.take(declared)?.to_vec())
    }

    fn take_null(&self, cur: &mut Cursor<'_>, _name: &str) -> bool {
        let token = NULL_PTR_TOKEN.as_bytes();
        match cur.peek(token.len() + 1) {
            Some(head) if &head[..token.len()] == token && head[token.len()] == 0 => {
                let _ = cur.skip(token.len() + 1);
                true
            }
            _ => false,
        }
    }

    fn skip_pointer_align(&self, cur: &mut Cursor<'_>) -> Result<(), ProtocolError> {
        cur.align_to(POINTER_ALIGN)
    }

    fn try_begin_struct(&self, _cur: &mut Cursor<'_>, _ty: &str) -> bool {
        // binary has no struct framing; NULL was already handled via the
        // sentinel for the whole pointer item
        true
    }

    fn begin_struct_decode(&self, _cur: &mut Cursor<'_>, _ty: &str) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn end_struct_decode(&self, _cur: &mut Cursor<'_>, _ty: &str) -> Result<(), ProtocolError> {
        Ok(())
    }
}
