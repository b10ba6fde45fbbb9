//! Structured pack/unpack engine.
//!
//! Walks a [`Value`] tree against a parsed pack instruction, driving the
//! primitive codec for the negotiated encoding. Dependent items are resolved
//! from already-processed sibling fields; dimension expressions resolve
//! against siblings, ancestors and the constant table; pointer items encode
//! a NULL marker or their pointee elements. The whole call either yields one
//! contiguous buffer (plus out-of-line blobs for `#` items) or fails with
//! everything dropped.

use crate::codec::{codec_for, Cursor, OutBuf, WireCodec};
use crate::error::ProtocolError;
use crate::instruction::{parse_instruction, Arm, DepTable, Dim, Item, PointerKind, TypeTag};
use crate::registry::{self, Registry};
use crate::value::Value;
use crate::{WireEncoding, MAX_PACKED_LEN};
use bytes::Bytes;

/// Result of one encode call: the packed buffer and any out-of-line blobs
/// collected from `#` items, in index order.
#[derive(Debug, Clone)]
pub struct Packed {
    pub data: Bytes,
    pub blobs: Vec<Bytes>,
}

/// Processing frame: the integer and string values already seen in the
/// current record, linked to the enclosing record's frame. Dimension and
/// dependent-type resolution walk this chain backward, then fall back to
/// the constant table.
struct Frame<'p> {
    ints: Vec<(String, i32)>,
    strs: Vec<(String, String)>,
    parent: Option<&'p Frame<'p>>,
}

impl<'p> Frame<'p> {
    fn new(parent: Option<&'p Frame<'p>>) -> Frame<'p> {
        Frame {
            ints: Vec::new(),
            strs: Vec::new(),
            parent,
        }
    }

    fn lookup_int(&self, name: &str) -> Option<i32> {
        self.ints
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .or_else(|| self.parent.and_then(|p| p.lookup_int(name)))
    }

    fn lookup_str(&self, name: &str) -> Option<&str> {
        self.strs
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .or_else(|| self.parent.and_then(|p| p.lookup_str(name)))
    }

    /// Negative values clamp to 0 so they never propagate into a length.
    fn record_int(&mut self, name: &str, v: i32) {
        self.ints.push((name.to_string(), v.max(0)));
    }

    fn record_str(&mut self, name: &str, v: &str) {
        self.strs.push((name.to_string(), v.to_string()));
    }
}

fn resolve_count(dim: &Dim, frame: &Frame<'_>) -> Result<i64, ProtocolError> {
    match dim {
        Dim::Lit(v) => Ok(*v as i64),
        Dim::Ref(name) => frame
            .lookup_int(name)
            .or_else(|| registry::constant(name))
            .map(|v| v as i64)
            .ok_or_else(|| ProtocolError::UnresolvedSchema(name.clone())),
    }
}

fn product(dims: &[Dim], frame: &Frame<'_>) -> Result<i64, ProtocolError> {
    let mut acc = 1i64;
    for dim in dims {
        acc = acc
            .checked_mul(resolve_count(dim, frame)?)
            .ok_or_else(|| ProtocolError::Format("dimension product overflow".to_string()))?;
    }
    Ok(acc)
}

/// Byte or element count as a buffer length, capped.
fn as_len(n: i64) -> Result<usize, ProtocolError> {
    let len = n.max(0) as usize;
    if len > MAX_PACKED_LEN {
        return Err(ProtocolError::Allocation {
            requested: len,
            cap: MAX_PACKED_LEN,
        });
    }
    Ok(len)
}

/// String layout from the controlling dimension list: the last dimension is
/// the per-string maximum, the rest multiply into the string count. No
/// dimensions means one NUL-delimited string of unbounded length.
fn str_layout(dims: &[Dim], frame: &Frame<'_>) -> Result<(i32, usize), ProtocolError> {
    if dims.is_empty() {
        return Ok((-1, 1));
    }
    let total = product(dims, frame)?;
    let max = resolve_count(dims.last().expect("non-empty dims"), frame)?;
    if max <= 0 {
        return Ok((max as i32, 0));
    }
    Ok((max as i32, as_len(total / max)?))
}

fn select_arm<'t>(table: &'t DepTable, key: i32) -> Result<&'t Arm, ProtocolError> {
    table
        .arms
        .iter()
        .find(|arm| {
            arm.keys.iter().any(|k| match k {
                crate::instruction::ArmKey::Default => true,
                crate::instruction::ArmKey::Value(v) => *v == key,
            })
        })
        .ok_or_else(|| ProtocolError::Format(format!("no dependent arm matches key {key}")))
}

fn fetch<'v>(record: &'v Value, name: &str) -> Result<&'v Value, ProtocolError> {
    record.get(name).ok_or_else(|| ProtocolError::ValueMismatch {
        field: name.to_string(),
        expected: "field present in record",
    })
}

fn mismatch(field: &str, expected: &'static str) -> ProtocolError {
    ProtocolError::ValueMismatch {
        field: field.to_string(),
        expected,
    }
}

/// A `?` item resolved against its referenced sibling behaves as a struct
/// item of the resolved type, keeping the original pointer kind and
/// dimensions. The resolved type name is also the field and wire tag name.
fn depend_proxy(item: &Item, ty: &str) -> Item {
    Item {
        tag: TypeTag::Struct,
        name: ty.to_string(),
        pointer: item.pointer,
        dims: item.dims.clone(),
        hints: item.hints.clone(),
        dep_ref: None,
        dep_table: None,
    }
}

fn string_values<'v>(
    value: &'v Value,
    count: usize,
    field: &str,
) -> Result<Vec<&'v str>, ProtocolError> {
    match (value, count) {
        (_, 0) => Ok(Vec::new()),
        (Value::Str(s), 1) => Ok(vec![s.as_str()]),
        (Value::Null, n) => Ok(vec![""; n]),
        (Value::Array(a), n) if a.len() == n => a
            .iter()
            .map(|v| v.as_str().ok_or_else(|| mismatch(field, "string element")))
            .collect(),
        _ => Err(mismatch(field, "string or string array of declared length")),
    }
}

fn int_values(value: &Value, count: usize, field: &str) -> Result<Vec<i32>, ProtocolError> {
    match (value, count) {
        (_, 0) => Ok(Vec::new()),
        (Value::Int(v), 1) => Ok(vec![*v]),
        (Value::Null, n) => Ok(vec![0; n]),
        (Value::Array(a), n) if a.len() == n => a
            .iter()
            .map(|v| v.as_int().ok_or_else(|| mismatch(field, "int element")))
            .collect(),
        _ => Err(mismatch(field, "int or int array of declared length")),
    }
}

fn int16_values(value: &Value, count: usize, field: &str) -> Result<Vec<i16>, ProtocolError> {
    match (value, count) {
        (_, 0) => Ok(Vec::new()),
        (Value::Int16(v), 1) => Ok(vec![*v]),
        (Value::Null, n) => Ok(vec![0; n]),
        (Value::Array(a), n) if a.len() == n => a
            .iter()
            .map(|v| v.as_int16().ok_or_else(|| mismatch(field, "int16 element")))
            .collect(),
        _ => Err(mismatch(field, "int16 or int16 array of declared length")),
    }
}

fn long_values(value: &Value, count: usize, field: &str) -> Result<Vec<i64>, ProtocolError> {
    match (value, count) {
        (_, 0) => Ok(Vec::new()),
        (Value::Long(v), 1) => Ok(vec![*v]),
        (Value::Null, n) => Ok(vec![0; n]),
        (Value::Array(a), n) if a.len() == n => a
            .iter()
            .map(|v| v.as_long().ok_or_else(|| mismatch(field, "long element")))
            .collect(),
        _ => Err(mismatch(field, "long or long array of declared length")),
    }
}

fn byte_values<'v>(value: &'v Value, field: &str) -> Result<&'v [u8], ProtocolError> {
    match value {
        Value::Null => Ok(&[]),
        Value::Bytes(b) => Ok(b),
        _ => Err(mismatch(field, "byte block")),
    }
}

fn struct_elems<'v>(
    value: &'v Value,
    count: usize,
    field: &str,
) -> Result<Vec<&'v Value>, ProtocolError> {
    match value {
        Value::Array(a) if a.len() == count => Ok(a.iter().collect()),
        Value::Struct(_) if count == 1 => Ok(vec![value]),
        _ => Err(mismatch(field, "struct or struct array of declared length")),
    }
}

fn wrap_scalars<T>(vals: Vec<T>, mk: fn(T) -> Value) -> Value {
    let mut vals = vals;
    if vals.len() == 1 {
        mk(vals.pop().expect("len checked"))
    } else {
        Value::Array(vals.into_iter().map(mk).collect())
    }
}

/// Schema-driven encoder for one wire encoding.
pub struct Packer<'a> {
    registry: &'a Registry,
    encoding: WireEncoding,
}

impl<'a> Packer<'a> {
    pub fn new(registry: &'a Registry, encoding: WireEncoding) -> Packer<'a> {
        Packer { registry, encoding }
    }

    /// Packs one record of the named type into a fresh buffer.
    pub fn pack(&self, record: &Value, type_name: &str) -> Result<Packed, ProtocolError> {
        let codec = codec_for(self.encoding);
        let mut out = OutBuf::new(MAX_PACKED_LEN);
        let mut blobs = Vec::new();
        self.pack_struct_elems(&mut out, &mut blobs, codec, type_name, &[record], None)?;
        Ok(Packed {
            data: out.freeze(),
            blobs,
        })
    }

    fn pack_struct_elems(
        &self,
        out: &mut OutBuf,
        blobs: &mut Vec<Bytes>,
        codec: &dyn WireCodec,
        ty: &str,
        elems: &[&Value],
        parent: Option<&Frame<'_>>,
    ) -> Result<(), ProtocolError> {
        let text = self.registry.lookup(ty)?;
        let items = parse_instruction(text)?;
        for &elem in elems {
            if !matches!(elem, Value::Struct(_)) {
                return Err(mismatch(ty, "struct"));
            }
            codec.begin_struct(out, ty)?;
            let mut frame = Frame::new(parent);
            self.pack_items(&items, elem, &mut frame, out, blobs, codec)?;
            codec.end_struct(out, ty)?;
        }
        Ok(())
    }

    fn pack_items(
        &self,
        items: &[Item],
        record: &Value,
        frame: &mut Frame<'_>,
        out: &mut OutBuf,
        blobs: &mut Vec<Bytes>,
        codec: &dyn WireCodec,
    ) -> Result<(), ProtocolError> {
        for item in items {
            match item.tag {
                TypeTag::DependInt => {
                    let table = item
                        .dep_table
                        .as_ref()
                        .ok_or_else(|| ProtocolError::Format("% item without table".into()))?;
                    let key = resolve_count(&table.key, frame)? as i32;
                    let arm = select_arm(table, key)?;
                    self.pack_items(&arm.items, record, frame, out, blobs, codec)?;
                }
                TypeTag::DependStr => self.pack_depend_str(item, record, frame, out, blobs, codec)?,
                _ => {
                    let value = fetch(record, &item.name)?;
                    self.pack_field(item, value, frame, out, blobs, codec)?;
                }
            }
        }
        Ok(())
    }

    fn pack_depend_str(
        &self,
        item: &Item,
        record: &Value,
        frame: &mut Frame<'_>,
        out: &mut OutBuf,
        blobs: &mut Vec<Bytes>,
        codec: &dyn WireCodec,
    ) -> Result<(), ProtocolError> {
        let dep_ref = item
            .dep_ref
            .as_deref()
            .ok_or_else(|| ProtocolError::Format("? item without reference".into()))?;
        let ty = frame
            .lookup_str(dep_ref)
            .ok_or_else(|| ProtocolError::Format(format!("cannot resolve {dep_ref}")))?
            .to_string();
        // records built by hand may key the field by its declared name
        let value = record.get(&ty).or_else(|| record.get(&item.name));
        if ty.is_empty() {
            // NULL pointer of unknown type packs as a string pointer
            if item.pointer.is_pointer() && value.map_or(true, Value::is_null) {
                codec.align_pointer(out)?;
                return codec.put_null(out, &item.name);
            }
            return Err(ProtocolError::Format(format!(
                "empty dependent type for {}",
                item.name
            )));
        }
        let value = value.ok_or_else(|| mismatch(&ty, "field present in record"))?;
        self.pack_field(&depend_proxy(item, &ty), value, frame, out, blobs, codec)
    }

    fn pack_field(
        &self,
        item: &Item,
        value: &Value,
        frame: &mut Frame<'_>,
        out: &mut OutBuf,
        blobs: &mut Vec<Bytes>,
        codec: &dyn WireCodec,
    ) -> Result<(), ProtocolError> {
        if item.pointer.is_pointer() {
            return self.pack_pointer(item, value, frame, out, blobs, codec);
        }
        let name = item.name.as_str();
        match item.tag {
            TypeTag::Char | TypeTag::Bin => {
                let declared = as_len(product(&item.dims, frame)?)?;
                if declared > 0 {
                    let data = byte_values(value, name)?;
                    codec.put_block(out, name, item.tag == TypeTag::Bin, data, declared)?;
                }
            }
            TypeTag::Str | TypeTag::PiStr => {
                let (max, count) = str_layout(&item.dims, frame)?;
                let strs = string_values(value, count, name)?;
                if item.tag == TypeTag::PiStr && count == 1 {
                    frame.record_str(name, strs[0]);
                }
                for s in strs {
                    codec.put_string(out, name, s, max)?;
                }
            }
            TypeTag::Int => {
                let n = as_len(product(&item.dims, frame)?)?;
                let vals = int_values(value, n, name)?;
                if n > 0 {
                    codec.put_int(out, name, &vals)?;
                }
                frame.record_int(name, vals.first().copied().unwrap_or(0));
            }
            TypeTag::Int16 => {
                let n = as_len(product(&item.dims, frame)?)?;
                if n > 0 {
                    codec.put_int16(out, name, &int16_values(value, n, name)?)?;
                }
            }
            TypeTag::Double => {
                let n = as_len(product(&item.dims, frame)?)?;
                if n > 0 {
                    codec.put_long(out, name, &long_values(value, n, name)?)?;
                }
            }
            TypeTag::Struct => {
                let count = as_len(product(&item.dims, frame)?)?;
                if count > 0 {
                    let elems = struct_elems(value, count, name)?;
                    self.pack_struct_elems(out, blobs, codec, name, &elems, Some(frame))?;
                }
            }
            TypeTag::DependInt | TypeTag::DependStr => unreachable!("resolved in pack_items"),
        }
        Ok(())
    }

    fn pack_pointer(
        &self,
        item: &Item,
        value: &Value,
        frame: &mut Frame<'_>,
        out: &mut OutBuf,
        blobs: &mut Vec<Bytes>,
        codec: &dyn WireCodec,
    ) -> Result<(), ProtocolError> {
        let name = item.name.as_str();
        codec.align_pointer(out)?;
        if value.is_null() {
            return codec.put_null(out, name);
        }

        if item.pointer == PointerKind::Indexed {
            // out-of-line blob: stash the bytes, pack only the index
            let data = value
                .as_bytes()
                .ok_or_else(|| mismatch(name, "byte block"))?;
            let index = blobs.len() as i32;
            blobs.push(Bytes::copy_from_slice(data));
            return codec.put_int(out, name, &[index]);
        }

        let n_ptr = if item.dims.is_empty() {
            1
        } else {
            as_len(product(&item.dims, frame)?)?
        };
        if n_ptr == 0 {
            return Ok(());
        }
        let pointees: Vec<&Value> = if item.dims.is_empty() {
            vec![value]
        } else {
            match value {
                Value::Array(a) if a.len() == n_ptr => a.iter().collect(),
                _ => return Err(mismatch(name, "array of declared pointer count")),
            }
        };

        match item.tag {
            TypeTag::Char | TypeTag::Bin => {
                let declared = as_len(product(&item.hints, frame)?)?;
                if declared == 0 {
                    return Ok(());
                }
                for p in pointees {
                    codec.put_block(
                        out,
                        name,
                        item.tag == TypeTag::Bin,
                        byte_values(p, name)?,
                        declared,
                    )?;
                }
            }
            TypeTag::Str | TypeTag::PiStr => {
                let (max, count) = str_layout(&item.hints, frame)?;
                if count == 0 {
                    return Ok(());
                }
                for p in pointees {
                    let strs = string_values(p, count, name)?;
                    if item.tag == TypeTag::PiStr && item.dims.is_empty() && count == 1 {
                        frame.record_str(name, strs[0]);
                    }
                    for s in strs {
                        codec.put_string(out, name, s, max)?;
                    }
                }
            }
            TypeTag::Int => {
                let n = as_len(product(&item.hints, frame)?)?;
                if n == 0 {
                    return Ok(());
                }
                for p in pointees {
                    codec.put_int(out, name, &int_values(p, n, name)?)?;
                }
            }
            TypeTag::Int16 => {
                let n = as_len(product(&item.hints, frame)?)?;
                if n == 0 {
                    return Ok(());
                }
                for p in pointees {
                    codec.put_int16(out, name, &int16_values(p, n, name)?)?;
                }
            }
            TypeTag::Double => {
                let n = as_len(product(&item.hints, frame)?)?;
                if n == 0 {
                    return Ok(());
                }
                for p in pointees {
                    codec.put_long(out, name, &long_values(p, n, name)?)?;
                }
            }
            TypeTag::Struct => {
                let count = as_len(product(&item.hints, frame)?)?;
                if count == 0 {
                    return Ok(());
                }
                for p in pointees {
                    if p.is_null() {
                        return Err(mismatch(name, "non-null struct element"));
                    }
                    let elems = struct_elems(p, count, name)?;
                    self.pack_struct_elems(out, blobs, codec, name, &elems, Some(frame))?;
                }
            }
            TypeTag::DependInt | TypeTag::DependStr => unreachable!("resolved in pack_items"),
        }
        Ok(())
    }
}

/// Schema-driven decoder for one wire encoding.
pub struct Unpacker<'a> {
    registry: &'a Registry,
    encoding: WireEncoding,
    blobs: &'a [Bytes],
}

impl<'a> Unpacker<'a> {
    pub fn new(registry: &'a Registry, encoding: WireEncoding) -> Unpacker<'a> {
        Unpacker {
            registry,
            encoding,
            blobs: &[],
        }
    }

    /// Supplies the out-of-line blob store consulted by `#` items.
    pub fn with_blobs(mut self, blobs: &'a [Bytes]) -> Unpacker<'a> {
        self.blobs = blobs;
        self
    }

    /// Unpacks one record of the named type from wire input.
    pub fn unpack(&self, data: &[u8], type_name: &str) -> Result<Value, ProtocolError> {
        let codec = codec_for(self.encoding);
        let mut cur = Cursor::new(data);
        let mut elems = self.unpack_struct_elems(&mut cur, codec, type_name, None, 1, false)?;
        Ok(elems.pop().expect("one root element"))
    }

    fn unpack_struct_elems(
        &self,
        cur: &mut Cursor<'_>,
        codec: &dyn WireCodec,
        ty: &str,
        parent: Option<&Frame<'_>>,
        count: usize,
        nullable: bool,
    ) -> Result<Vec<Value>, ProtocolError> {
        let text = self.registry.lookup(ty)?;
        let items = parse_instruction(text)?;
        let mut elems = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            if nullable && !codec.try_begin_struct(cur, ty) {
                elems.push(Value::Null);
                continue;
            }
            if !nullable {
                codec.begin_struct_decode(cur, ty)?;
            }
            let mut frame = Frame::new(parent);
            let mut fields = Vec::with_capacity(items.len());
            self.unpack_items(&items, &mut fields, &mut frame, cur, codec)?;
            codec.end_struct_decode(cur, ty)?;
            elems.push(Value::Struct(fields));
        }
        Ok(elems)
    }

    fn unpack_items(
        &self,
        items: &[Item],
        fields: &mut Vec<(String, Value)>,
        frame: &mut Frame<'_>,
        cur: &mut Cursor<'_>,
        codec: &dyn WireCodec,
    ) -> Result<(), ProtocolError> {
        for item in items {
            match item.tag {
                TypeTag::DependInt => {
                    let table = item
                        .dep_table
                        .as_ref()
                        .ok_or_else(|| ProtocolError::Format("% item without table".into()))?;
                    let key = resolve_count(&table.key, frame)? as i32;
                    let arm = select_arm(table, key)?;
                    self.unpack_items(&arm.items, fields, frame, cur, codec)?;
                }
                TypeTag::DependStr => {
                    let dep_ref = item
                        .dep_ref
                        .as_deref()
                        .ok_or_else(|| ProtocolError::Format("? item without reference".into()))?;
                    let ty = frame
                        .lookup_str(dep_ref)
                        .ok_or_else(|| {
                            ProtocolError::Format(format!("cannot resolve {dep_ref}"))
                        })?
                        .to_string();
                    if ty.is_empty() {
                        // counterpart of the NULL-of-unknown-type encode path
                        codec.skip_pointer_align(cur)?;
                        if item.pointer.is_pointer() && codec.take_null(cur, &item.name) {
                            fields.push((item.name.clone(), Value::Null));
                            continue;
                        }
                        return Err(ProtocolError::Format(format!(
                            "empty dependent type for {}",
                            item.name
                        )));
                    }
                    let proxy = depend_proxy(item, &ty);
                    let value = self.unpack_field(&proxy, frame, cur, codec)?;
                    fields.push((proxy.name, value));
                }
                _ => {
                    let value = self.unpack_field(item, frame, cur, codec)?;
                    fields.push((item.name.clone(), value));
                }
            }
        }
        Ok(())
    }

    fn unpack_field(
        &self,
        item: &Item,
        frame: &mut Frame<'_>,
        cur: &mut Cursor<'_>,
        codec: &dyn WireCodec,
    ) -> Result<Value, ProtocolError> {
        if item.pointer.is_pointer() {
            return self.unpack_pointer(item, frame, cur, codec);
        }
        let name = item.name.as_str();
        let value = match item.tag {
            TypeTag::Char | TypeTag::Bin => {
                let declared = as_len(product(&item.dims, frame)?)?;
                if declared == 0 {
                    Value::Bytes(Vec::new())
                } else {
                    Value::Bytes(codec.get_block(
                        cur,
                        name,
                        item.tag == TypeTag::Bin,
                        declared,
                    )?)
                }
            }
            TypeTag::Str | TypeTag::PiStr => {
                let (max, count) = str_layout(&item.dims, frame)?;
                let mut strs = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    strs.push(codec.get_string(cur, name, max)?);
                }
                if item.tag == TypeTag::PiStr && count == 1 {
                    frame.record_str(name, &strs[0]);
                }
                wrap_scalars(strs, Value::Str)
            }
            TypeTag::Int => {
                let n = as_len(product(&item.dims, frame)?)?;
                // count 0 consumes nothing, mirroring the encode side
                let vals = if n == 0 {
                    Vec::new()
                } else {
                    codec.get_int(cur, name, n)?
                };
                frame.record_int(name, vals.first().copied().unwrap_or(0));
                wrap_scalars(vals, Value::Int)
            }
            TypeTag::Int16 => {
                let n = as_len(product(&item.dims, frame)?)?;
                let vals = if n == 0 {
                    Vec::new()
                } else {
                    codec.get_int16(cur, name, n)?
                };
                wrap_scalars(vals, Value::Int16)
            }
            TypeTag::Double => {
                let n = as_len(product(&item.dims, frame)?)?;
                let vals = if n == 0 {
                    Vec::new()
                } else {
                    codec.get_long(cur, name, n)?
                };
                wrap_scalars(vals, Value::Long)
            }
            TypeTag::Struct => {
                let count = as_len(product(&item.dims, frame)?)?;
                let mut elems =
                    self.unpack_struct_elems(cur, codec, name, Some(frame), count, false)?;
                if count == 1 {
                    elems.pop().expect("one element")
                } else {
                    Value::Array(elems)
                }
            }
            TypeTag::DependInt | TypeTag::DependStr => unreachable!("resolved in unpack_items"),
        };
        Ok(value)
    }

    fn unpack_pointer(
        &self,
        item: &Item,
        frame: &mut Frame<'_>,
        cur: &mut Cursor<'_>,
        codec: &dyn WireCodec,
    ) -> Result<Value, ProtocolError> {
        let name = item.name.as_str();
        codec.skip_pointer_align(cur)?;
        if codec.take_null(cur, name) {
            return Ok(Value::Null);
        }

        if item.pointer == PointerKind::Indexed {
            let index = codec.get_int(cur, name, 1)?[0];
            let blob = if index >= 0 {
                self.blobs.get(index as usize)
            } else {
                None
            };
            return Ok(blob
                .map(|b| Value::Bytes(b.to_vec()))
                .unwrap_or(Value::Null));
        }

        let n_ptr = if item.dims.is_empty() {
            1
        } else {
            as_len(product(&item.dims, frame)?)?
        };

        // element counts behind one pointer
        let (str_max, str_count) = match item.tag {
            TypeTag::Str | TypeTag::PiStr => str_layout(&item.hints, frame)?,
            _ => (-1, 0),
        };
        let hint_n = match item.tag {
            TypeTag::Str | TypeTag::PiStr => str_count,
            _ => as_len(product(&item.hints, frame)?)?,
        };

        // a zero-length dependent array never dereferences anything
        if hint_n == 0 || n_ptr == 0 {
            return Ok(Value::Null);
        }

        let mut pointees = Vec::with_capacity(n_ptr.min(256));
        for _ in 0..n_ptr {
            let value = match item.tag {
                TypeTag::Char | TypeTag::Bin => Value::Bytes(codec.get_block(
                    cur,
                    name,
                    item.tag == TypeTag::Bin,
                    hint_n,
                )?),
                TypeTag::Str | TypeTag::PiStr => {
                    let mut strs = Vec::with_capacity(str_count.min(256));
                    for _ in 0..str_count {
                        strs.push(codec.get_string(cur, name, str_max)?);
                    }
                    if item.tag == TypeTag::PiStr && item.dims.is_empty() && str_count == 1 {
                        frame.record_str(name, &strs[0]);
                    }
                    wrap_scalars(strs, Value::Str)
                }
                TypeTag::Int => wrap_scalars(codec.get_int(cur, name, hint_n)?, Value::Int),
                TypeTag::Int16 => wrap_scalars(codec.get_int16(cur, name, hint_n)?, Value::Int16),
                TypeTag::Double => wrap_scalars(codec.get_long(cur, name, hint_n)?, Value::Long),
                TypeTag::Struct => {
                    let mut elems =
                        self.unpack_struct_elems(cur, codec, name, Some(frame), hint_n, true)?;
                    if hint_n == 1 {
                        elems.pop().expect("one element")
                    } else {
                        Value::Array(elems)
                    }
                }
                TypeTag::DependInt | TypeTag::DependStr => {
                    unreachable!("resolved in unpack_items")
                }
            };
            pointees.push(value);
        }

        if item.dims.is_empty() {
            Ok(pointees.pop().expect("one pointee"))
        } else {
            Ok(Value::Array(pointees))
        }
    }
}
