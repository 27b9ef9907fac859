//! The tagged binary value encoding.
//!
//! Every value encodes to a self-describing byte string: a one-byte kind
//! tag followed by a kind-specific payload, with varint length prefixes
//! for anything variable-size. The encoding is canonical — one byte
//! string per value — which is what makes content addressing work:
//! a value's address is the hash of its encoding.
//!
//! Numbers are encoded as `(mantissa, exponent)` signed varints with
//! `value = mantissa * 2^exponent` (see [`crate::number`]); the
//! non-finite values use an exponent sentinel so the encoding is total.
//! Sequence nodes encode their level, letting the decoder distinguish
//! inline leaves from meta nodes. Refs embed their target type and
//! height.

use quilt_hash::{Address, ADDRESS_LEN};

use crate::error::{ValueError, ValueResult};
use crate::kind::Kind;
use crate::number;
use crate::refs::Ref;
use crate::sequence::{MapEntry, MetaTuple, OrderKey, Sequence, SequenceData};
use crate::structs::Struct;
use crate::types::{StructType, Type};
use crate::value::Value;

// Exponent marker for the three non-finite doubles; the mantissa then
// carries the class (1 = +inf, -1 = -inf, 0 = NaN).
const NON_FINITE_EXPONENT: i64 = i64::MAX;

// ---------------------------------------------------------------------
// Primitive writers/readers
// ---------------------------------------------------------------------

pub(crate) fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub(crate) fn write_zigzag(buf: &mut Vec<u8>, value: i64) {
    write_varint(buf, ((value << 1) ^ (value >> 63)) as u64);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> ValueResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| ValueError::Decode("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn raw(&mut self, n: usize) -> ValueResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(ValueError::Decode("unexpected end of input".into()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn varint(&mut self) -> ValueResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift >= 64 {
                return Err(ValueError::Decode("varint overflow".into()));
            }
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn zigzag(&mut self) -> ValueResult<i64> {
        let raw = self.varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn len_prefixed(&mut self) -> ValueResult<&'a [u8]> {
        let len = self.varint()? as usize;
        self.raw(len)
    }

    fn string(&mut self) -> ValueResult<String> {
        let bytes = self.len_prefixed()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ValueError::Decode("invalid utf-8 in string".into()))
    }

    fn finished(&self) -> bool {
        self.pos == self.buf.len()
    }
}

// ---------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------

/// Canonical encoding of a value.
pub fn encode_value(v: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    write_value(&mut buf, v);
    buf
}

fn write_value(buf: &mut Vec<u8>, v: &Value) {
    match v {
        Value::Bool(b) => {
            buf.push(Kind::Bool as u8);
            buf.push(*b as u8);
        }
        Value::Number(n) => {
            buf.push(Kind::Number as u8);
            let (mantissa, exponent) = if n.is_finite() {
                number::decompose(*n).expect("finite number decomposes")
            } else if *n == f64::INFINITY {
                (1, NON_FINITE_EXPONENT)
            } else if *n == f64::NEG_INFINITY {
                (-1, NON_FINITE_EXPONENT)
            } else {
                (0, NON_FINITE_EXPONENT)
            };
            write_zigzag(buf, mantissa);
            write_zigzag(buf, exponent);
        }
        Value::String(s) => {
            buf.push(Kind::String as u8);
            write_varint(buf, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Blob(b) => write_sequence(buf, b.sequence()),
        Value::List(l) => write_sequence(buf, l.sequence()),
        Value::Map(m) => write_sequence(buf, m.sequence()),
        Value::Set(s) => write_sequence(buf, s.sequence()),
        Value::Struct(s) => {
            buf.push(Kind::Struct as u8);
            write_varint(buf, s.name().len() as u64);
            buf.extend_from_slice(s.name().as_bytes());
            write_varint(buf, s.fields().len() as u64);
            for (name, value) in s.fields() {
                write_varint(buf, name.len() as u64);
                buf.extend_from_slice(name.as_bytes());
                write_value(buf, value);
            }
        }
        Value::Ref(r) => write_ref(buf, r),
        Value::Type(t) => {
            buf.push(Kind::Type as u8);
            write_type(buf, t);
        }
    }
}

fn write_ref(buf: &mut Vec<u8>, r: &Ref) {
    buf.push(Kind::Ref as u8);
    buf.extend_from_slice(r.address().as_bytes());
    write_type(buf, r.target_type());
    write_varint(buf, r.height());
}

fn write_sequence(buf: &mut Vec<u8>, seq: &Sequence) {
    buf.push(seq.kind as u8);
    write_varint(buf, seq.level as u64);
    match &seq.data {
        SequenceData::Bytes(bytes) => {
            write_varint(buf, bytes.len() as u64);
            buf.extend_from_slice(bytes);
        }
        SequenceData::Values(values) => {
            write_varint(buf, values.len() as u64);
            for v in values {
                write_value(buf, v);
            }
        }
        SequenceData::Entries(entries) => {
            write_varint(buf, entries.len() as u64);
            for e in entries {
                write_value(buf, &e.key);
                write_value(buf, &e.value);
            }
        }
        SequenceData::Meta(tuples) => {
            write_varint(buf, tuples.len() as u64);
            for t in tuples {
                write_ref(buf, &t.child);
                write_order_key(buf, &t.key);
                write_varint(buf, t.num_leaves);
            }
        }
    }
}

fn write_order_key(buf: &mut Vec<u8>, key: &OrderKey) {
    match key {
        OrderKey::ByAddress(addr) => {
            buf.push(0);
            buf.extend_from_slice(addr.as_bytes());
        }
        OrderKey::ByValue(v) => {
            buf.push(1);
            write_value(buf, v);
        }
    }
}

/// Encoding of an ordering key, used both on the wire and as rolling-hash
/// input at meta levels.
pub fn encode_order_key(key: &OrderKey) -> Vec<u8> {
    let mut buf = Vec::new();
    write_order_key(&mut buf, key);
    buf
}

fn write_type(buf: &mut Vec<u8>, t: &Type) {
    match t {
        Type::Primitive(kind) => buf.push(*kind as u8),
        Type::List(elem) => {
            buf.push(Kind::List as u8);
            write_type(buf, elem);
        }
        Type::Set(elem) => {
            buf.push(Kind::Set as u8);
            write_type(buf, elem);
        }
        Type::Ref(target) => {
            buf.push(Kind::Ref as u8);
            write_type(buf, target);
        }
        Type::Map(key, value) => {
            buf.push(Kind::Map as u8);
            write_type(buf, key);
            write_type(buf, value);
        }
        Type::Union(members) => {
            buf.push(Kind::Union as u8);
            write_varint(buf, members.len() as u64);
            for m in members {
                write_type(buf, m);
            }
        }
        Type::Struct(st) => {
            buf.push(Kind::Struct as u8);
            write_varint(buf, st.name.len() as u64);
            buf.extend_from_slice(st.name.as_bytes());
            write_varint(buf, st.fields.len() as u64);
            for (name, field_type) in &st.fields {
                write_varint(buf, name.len() as u64);
                buf.extend_from_slice(name.as_bytes());
                write_type(buf, field_type);
            }
        }
        Type::Cycle(level) => {
            buf.push(Kind::Cycle as u8);
            write_varint(buf, *level);
        }
    }
}

/// Encoding of a bare type description.
pub fn encode_type(t: &Type) -> Vec<u8> {
    let mut buf = Vec::new();
    write_type(&mut buf, t);
    buf
}

// ---------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------

/// Decode a value from its complete canonical encoding.
pub fn decode_value(bytes: &[u8]) -> ValueResult<Value> {
    let mut reader = Reader::new(bytes);
    let value = read_value(&mut reader)?;
    if !reader.finished() {
        return Err(ValueError::Decode("trailing bytes after value".into()));
    }
    Ok(value)
}

fn read_value(r: &mut Reader<'_>) -> ValueResult<Value> {
    let tag = r.u8()?;
    let kind = Kind::from_u8(tag)
        .ok_or_else(|| ValueError::Decode(format!("unknown kind tag {tag}")))?;
    match kind {
        Kind::Bool => match r.u8()? {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            other => Err(ValueError::Decode(format!("bad bool byte {other}"))),
        },
        Kind::Number => {
            let mantissa = r.zigzag()?;
            let exponent = r.zigzag()?;
            let n = if exponent == NON_FINITE_EXPONENT {
                match mantissa {
                    1 => f64::INFINITY,
                    -1 => f64::NEG_INFINITY,
                    _ => f64::NAN,
                }
            } else {
                number::recompose(mantissa, exponent)
            };
            Ok(Value::Number(n))
        }
        Kind::String => Ok(Value::String(r.string()?)),
        Kind::Blob | Kind::List | Kind::Map | Kind::Set => {
            read_sequence(r, kind).map(Sequence::into_value)
        }
        Kind::Struct => {
            let name = r.string()?;
            let count = r.varint()? as usize;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let field_name = r.string()?;
                let value = read_value(r)?;
                fields.push((field_name, value));
            }
            Struct::from_sorted_fields(name, fields)
                .map(Value::Struct)
                .map_err(|e| ValueError::Decode(e.to_string()))
        }
        Kind::Ref => read_ref(r).map(Value::Ref),
        Kind::Type => Ok(Value::Type(read_type(r)?)),
        Kind::Cycle | Kind::Union | Kind::Value => Err(ValueError::Decode(format!(
            "kind {kind} cannot head a value"
        ))),
    }
}

fn read_ref(r: &mut Reader<'_>) -> ValueResult<Ref> {
    let addr_bytes = r.raw(ADDRESS_LEN)?;
    let address = Address::from_slice(addr_bytes)
        .map_err(|e| ValueError::Decode(e.to_string()))?;
    let target_type = read_type(r)?;
    let height = r.varint()?;
    Ok(Ref::from_parts(address, target_type, height))
}

fn read_sequence(r: &mut Reader<'_>, kind: Kind) -> ValueResult<Sequence> {
    let level = r.varint()?;
    if level > u8::MAX as u64 {
        return Err(ValueError::Decode(format!("sequence level {level} too deep")));
    }
    let level = level as u8;
    let count = r.varint()? as usize;

    if level == 0 {
        let data = match kind {
            Kind::Blob => SequenceData::Bytes(r.raw(count)?.to_vec()),
            Kind::Map => {
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = read_value(r)?;
                    let value = read_value(r)?;
                    entries.push(MapEntry::new(key, value));
                }
                SequenceData::Entries(entries)
            }
            _ => {
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(read_value(r)?);
                }
                SequenceData::Values(values)
            }
        };
        return Ok(Sequence::new_leaf(kind, data));
    }

    let mut tuples = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = r.u8()?;
        if tag != Kind::Ref as u8 {
            return Err(ValueError::Decode("meta entry must hold a ref".into()));
        }
        let child = read_ref(r)?;
        let key = read_order_key(r)?;
        let num_leaves = r.varint()?;
        tuples.push(MetaTuple {
            child,
            key,
            num_leaves,
        });
    }
    Ok(Sequence::new_meta(kind, level, tuples))
}

fn read_order_key(r: &mut Reader<'_>) -> ValueResult<OrderKey> {
    match r.u8()? {
        0 => {
            let addr_bytes = r.raw(ADDRESS_LEN)?;
            let address = Address::from_slice(addr_bytes)
                .map_err(|e| ValueError::Decode(e.to_string()))?;
            Ok(OrderKey::ByAddress(address))
        }
        1 => Ok(OrderKey::ByValue(read_value(r)?)),
        other => Err(ValueError::Decode(format!("bad order-key tag {other}"))),
    }
}

fn read_type(r: &mut Reader<'_>) -> ValueResult<Type> {
    let tag = r.u8()?;
    let kind = Kind::from_u8(tag)
        .ok_or_else(|| ValueError::Decode(format!("unknown type tag {tag}")))?;
    match kind {
        Kind::Bool | Kind::Number | Kind::String | Kind::Blob | Kind::Type | Kind::Value => {
            Ok(Type::Primitive(kind))
        }
        Kind::List => Ok(Type::List(Box::new(read_type(r)?))),
        Kind::Set => Ok(Type::Set(Box::new(read_type(r)?))),
        Kind::Ref => Ok(Type::Ref(Box::new(read_type(r)?))),
        Kind::Map => {
            let key = read_type(r)?;
            let value = read_type(r)?;
            Ok(Type::Map(Box::new(key), Box::new(value)))
        }
        Kind::Union => {
            let count = r.varint()? as usize;
            let mut members = Vec::with_capacity(count);
            for _ in 0..count {
                members.push(read_type(r)?);
            }
            Ok(Type::Union(members))
        }
        Kind::Struct => {
            let name = r.string()?;
            let count = r.varint()? as usize;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let field_name = r.string()?;
                let field_type = read_type(r)?;
                fields.push((field_name, field_type));
            }
            Ok(Type::Struct(StructType { name, fields }))
        }
        Kind::Cycle => Ok(Type::Cycle(r.varint()?)),
    }
}

/// Decode a bare type description.
pub fn decode_type(bytes: &[u8]) -> ValueResult<Type> {
    let mut reader = Reader::new(bytes);
    let t = read_type(&mut reader)?;
    if !reader.finished() {
        return Err(ValueError::Decode("trailing bytes after type".into()));
    }
    Ok(t)
}
