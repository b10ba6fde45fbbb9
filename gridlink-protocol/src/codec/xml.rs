//! Tagged XML wire encoding.
//!
//! Each scalar is wrapped in `<name>...</name>`; struct elements wrap their
//! fields in `<TypeName>` with a newline after both tags. Strings are
//! entity escaped, `bin` blocks are base64, and a NULL pointer simply omits
//! the start tag. The encoding is self delimiting, so no alignment is
//! performed.

use super::{Cursor, OutBuf, WireCodec};
use crate::error::ProtocolError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub(crate) struct XmlCodec;

fn put_start_tag(out: &mut OutBuf, name: &str, lf: bool) -> Result<(), ProtocolError> {
    out.put_u8(b'<')?;
    out.put_slice(name.as_bytes())?;
    out.put_u8(b'>')?;
    if lf {
        out.put_u8(b'\n')?;
    }
    Ok(())
}

fn put_end_tag(out: &mut OutBuf, name: &str) -> Result<(), ProtocolError> {
    out.put_slice(b"</")?;
    out.put_slice(name.as_bytes())?;
    out.put_slice(b">\n")?;
    Ok(())
}

/// Entity escaping used for string values. The last entry maps the
/// backquote, which this wire format spells `&apos;`.
const ESCAPES: &[(u8, &str)] = &[
    (b'&', "&amp;"),
    (b'<', "&lt;"),
    (b'>', "&gt;"),
    (b'"', "&quot;"),
    (b'`', "&apos;"),
];

fn escape_into(out: &mut OutBuf, s: &str) -> Result<(), ProtocolError> {
    for &b in s.as_bytes() {
        match ESCAPES.iter().find(|(c, _)| *c == b) {
            Some((_, ent)) => out.put_slice(ent.as_bytes())?,
            None => out.put_u8(b)?,
        }
    }
    Ok(())
}

/// Reverses `escape_into`. An unrecognized entity stops the scan and the
/// remainder is copied through untouched.
fn unescape(input: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'&' {
            match ESCAPES
                .iter()
                .find(|(_, ent)| input[i..].starts_with(ent.as_bytes()))
            {
                Some((c, ent)) => {
                    result.push(*c);
                    i += ent.len();
                    continue;
                }
                None => {
                    result.extend_from_slice(&input[i..]);
                    break;
                }
            }
        }
        result.push(input[i]);
        i += 1;
    }
    result
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parses `<name>`, skipping anything before the next `<`. With `lf`, a
/// newline directly after the tag is consumed too.
fn parse_start_tag(cur: &mut Cursor<'_>, name: &str, lf: bool) -> Result<(), ProtocolError> {
    let rest = cur.rest();
    let mismatch = || ProtocolError::TagMismatch {
        name: name.to_string(),
        expected: "start",
    };
    let lt = rest.iter().position(|&b| b == b'<').ok_or_else(mismatch)?;
    let after = &rest[lt + 1..];
    let nb = name.as_bytes();
    if after.len() < nb.len() + 1 || &after[..nb.len()] != nb || after[nb.len()] != b'>' {
        return Err(mismatch());
    }
    let mut adv = lt + 1 + nb.len() + 1;
    if lf && rest.get(adv) == Some(&b'\n') {
        adv += 1;
    }
    cur.skip(adv)
}

/// Finds `</name>` ahead of the cursor and consumes through it (plus a
/// trailing newline when present). Returns the number of bytes skipped
/// before the tag, i.e. the enclosed value length.
fn parse_end_tag(cur: &mut Cursor<'_>, name: &str) -> Result<usize, ProtocolError> {
    let pat = format!("</{name}>");
    let rest = cur.rest();
    let idx = find_sub(rest, pat.as_bytes()).ok_or_else(|| ProtocolError::TagMismatch {
        name: name.to_string(),
        expected: "end",
    })?;
    let mut adv = idx + pat.len();
    if rest.get(adv) == Some(&b'\n') {
        adv += 1;
    }
    cur.skip(adv)?;
    Ok(idx)
}

/// Parses `<name>value</name>` and returns the raw value bytes.
fn parse_value<'a>(cur: &mut Cursor<'a>, name: &str) -> Result<&'a [u8], ProtocolError> {
    parse_start_tag(cur, name, false)?;
    let rest = cur.rest();
    let len = parse_end_tag(cur, name)?;
    Ok(&rest[..len])
}

fn parse_decimal<T: std::str::FromStr>(
    raw: &[u8],
    name: &str,
) -> Result<T, ProtocolError> {
    std::str::from_utf8(raw)
        .map_err(|_| ProtocolError::Utf8("integer field"))?
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::Format(format!("bad integer in <{name}>")))
}

impl XmlCodec {
    fn put_decimal(
        &self,
        out: &mut OutBuf,
        name: &str,
        text: &str,
    ) -> Result<(), ProtocolError> {
        put_start_tag(out, name, false)?;
        out.put_slice(text.as_bytes())?;
        put_end_tag(out, name)
    }
}

impl WireCodec for XmlCodec {
    fn put_int(&self, out: &mut OutBuf, name: &str, vals: &[i32]) -> Result<(), ProtocolError> {
        for v in vals {
            self.put_decimal(out, name, &v.to_string())?;
        }
        Ok(())
    }

    fn put_int16(&self, out: &mut OutBuf, name: &str, vals: &[i16]) -> Result<(), ProtocolError> {
        for v in vals {
            self.put_decimal(out, name, &v.to_string())?;
        }
        Ok(())
    }

    fn put_long(&self, out: &mut OutBuf, name: &str, vals: &[i64]) -> Result<(), ProtocolError> {
        for v in vals {
            self.put_decimal(out, name, &v.to_string())?;
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
        if max_len >= 0 && s.len() >= max_len as usize {
            return Err(ProtocolError::Bounds {
                len: s.len(),
                max: max_len as usize,
            });
        }
        put_start_tag(out, name, false)?;
        escape_into(out, s)?;
        put_end_tag(out, name)
    }

    fn put_block(
        &self,
        out: &mut OutBuf,
        name: &str,
        base64: bool,
        data: &[u8],
        declared: usize,
    ) -> Result<(), ProtocolError> {
        if data.len() > declared {
            return Err(ProtocolError::Bounds {
                len: data.len(),
                max: declared,
            });
        }
        let mut padded;
        let full: &[u8] = if data.len() == declared {
            data
        } else {
            padded = data.to_vec();
            padded.resize(declared, 0);
            &padded
        };
        put_start_tag(out, name, false)?;
        if base64 {
            out.put_slice(BASE64.encode(full).as_bytes())?;
        } else {
            out.put_slice(full)?;
        }
        put_end_tag(out, name)
    }

    fn put_null(&self, _out: &mut OutBuf, _name: &str) -> Result<(), ProtocolError> {
        // a NULL pointer omits its start tag entirely
        Ok(())
    }

    fn align_pointer(&self, _out: &mut OutBuf) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn begin_struct(&self, out: &mut OutBuf, ty: &str) -> Result<(), ProtocolError> {
        put_start_tag(out, ty, true)
    }

    fn end_struct(&self, out: &mut OutBuf, ty: &str) -> Result<(), ProtocolError> {
        put_end_tag(out, ty)
    }

    fn get_int(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        n: usize,
    ) -> Result<Vec<i32>, ProtocolError> {
        let mut vals = Vec::with_capacity(n.min(256));
        for _ in 0..n {
            vals.push(parse_decimal(parse_value(cur, name)?, name)?);
        }
        Ok(vals)
    }

    fn get_int16(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        n: usize,
    ) -> Result<Vec<i16>, ProtocolError> {
        let mut vals = Vec::with_capacity(n.min(256));
        for _ in 0..n {
            vals.push(parse_decimal(parse_value(cur, name)?, name)?);
        }
        Ok(vals)
    }

    fn get_long(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        n: usize,
    ) -> Result<Vec<i64>, ProtocolError> {
        let mut vals = Vec::with_capacity(n.min(256));
        for _ in 0..n {
            vals.push(parse_decimal(parse_value(cur, name)?, name)?);
        }
        Ok(vals)
    }

    fn get_string(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        max_len: i32,
    ) -> Result<String, ProtocolError> {
        let raw = parse_value(cur, name)?;
        let plain = unescape(raw);
        if max_len >= 0 && plain.len() >= max_len as usize {
            return Err(ProtocolError::Bounds {
                len: plain.len(),
                max: max_len as usize,
            });
        }
        String::from_utf8(plain).map_err(|_| ProtocolError::Utf8("string field"))
    }

    fn get_block(
        &self,
        cur: &mut Cursor<'_>,
        name: &str,
        base64: bool,
        declared: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        let raw = parse_value(cur, name)?;
        let mut data = if base64 {
            BASE64
                .decode(raw)
                .map_err(|_| ProtocolError::Format(format!("bad base64 in <{name}>")))?
        } else {
            raw.to_vec()
        };
        if data.len() > declared {
            return Err(ProtocolError::Bounds {
                len: data.len(),
                max: declared,
            });
        }
        data.resize(declared, 0);
        Ok(data)
    }

    fn take_null(&self, cur: &mut Cursor<'_>, name: &str) -> bool {
        let mut probe = *cur;
        parse_start_tag(&mut probe, name, false).is_err()
    }

    fn skip_pointer_align(&self, _cur: &mut Cursor<'_>) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn try_begin_struct(&self, cur: &mut Cursor<'_>, ty: &str) -> bool {
        let mut probe = *cur;
        if parse_start_tag(&mut probe, ty, true).is_ok() {
            *cur = probe;
            true
        } else {
            false
        }
    }

    fn begin_struct_decode(&self, cur: &mut Cursor<'_>, ty: &str) -> Result<(), ProtocolError> {
        parse_start_tag(cur, ty, true)
    }

    fn end_struct_decode(&self, cur: &mut Cursor<'_>, ty: &str) -> Result<(), ProtocolError> {
        parse_end_tag(cur, ty).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MAX_PACKED_LEN;

    fn out() -> OutBuf {
        OutBuf::new(MAX_PACKED_LEN)
    }

    #[test]
    fn test_int_tags() {
        let mut buf = out();
        XmlCodec.put_int(&mut buf, "count", &[5, -3]).unwrap();
        let bytes = buf.freeze();
        assert_eq!(&bytes[..], b"<count>5</count>\n<count>-3</count>\n");
        let mut cur = Cursor::new(&bytes);
        assert_eq!(XmlCodec.get_int(&mut cur, "count", 2).unwrap(), vec![5, -3]);
    }

    #[test]
    fn test_string_escaping() {
        let mut buf = out();
        XmlCodec
            .put_string(&mut buf, "s", "a<b>&\"c`", -1)
            .unwrap();
        let bytes = buf.freeze();
        assert_eq!(
            &bytes[..],
            b"<s>a&lt;b&gt;&amp;&quot;c&apos;</s>\n".as_slice()
        );
        let mut cur = Cursor::new(&bytes);
        assert_eq!(XmlCodec.get_string(&mut cur, "s", -1).unwrap(), "a<b>&\"c`");
    }

    #[test]
    fn test_unknown_entity_passthrough() {
        assert_eq!(unescape(b"a&bogus;b"), b"a&bogus;b");
        assert_eq!(unescape(b"x&amp;&nope;"), b"x&&nope;");
    }

    #[test]
    fn test_bin_base64_roundtrip() {
        let mut buf = out();
        XmlCodec
            .put_block(&mut buf, "buf", true, &[0, 1, 254, 255], 4)
            .unwrap();
        let bytes = buf.freeze();
        let mut cur = Cursor::new(&bytes);
        assert_eq!(
            XmlCodec.get_block(&mut cur, "buf", true, 4).unwrap(),
            vec![0, 1, 254, 255]
        );
    }

    #[test]
    fn test_tag_mismatch() {
        let mut cur = Cursor::new(b"<other>1</other>\n");
        assert!(matches!(
            XmlCodec.get_int(&mut cur, "count", 1),
            Err(ProtocolError::TagMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_end_tag() {
        let mut cur = Cursor::new(b"<count>1");
        assert!(matches!(
            XmlCodec.get_int(&mut cur, "count", 1),
            Err(ProtocolError::TagMismatch { expected: "end", .. })
        ));
    }

    #[test]
    fn test_take_null_peeks_only() {
        let bytes = b"<next>1</next>\n";
        let mut cur = Cursor::new(bytes);
        assert!(XmlCodec.take_null(&mut cur, "absent"));
        assert!(!XmlCodec.take_null(&mut cur, "next"));
        assert_eq!(cur.pos(), 0);
    }

    #[test]
    fn test_string_bounds() {
        let mut buf = out();
        assert!(matches!(
            XmlCodec.put_string(&mut buf, "s", "abcd", 4),
            Err(ProtocolError::Bounds { len: 4, max: 4 })
        ));
        let mut cur = Cursor::new(b"<s>abcd</s>\n");
        assert!(matches!(
            XmlCodec.get_string(&mut cur, "s", 4),
            Err(ProtocolError::Bounds { len: 4, max: 4 })
        ));
    }

    #[test]
    fn test_struct_tags() {
        let mut buf = out();
        XmlCodec.begin_struct(&mut buf, "T_PI").unwrap();
        XmlCodec.put_int(&mut buf, "x", &[7]).unwrap();
        XmlCodec.end_struct(&mut buf, "T_PI").unwrap();
        let bytes = buf.freeze();
        assert_eq!(&bytes[..], b"<T_PI>\n<x>7</x>\n</T_PI>\n");
        let mut cur = Cursor::new(&bytes);
        assert!(XmlCodec.try_begin_struct(&mut cur, "T_PI"));
        assert_eq!(XmlCodec.get_int(&mut cur, "x", 1).unwrap(), vec![7]);
        XmlCodec.end_struct_decode(&mut cur, "T_PI").unwrap();
        assert_eq!(cur.remaining(), 0);
    }
}
