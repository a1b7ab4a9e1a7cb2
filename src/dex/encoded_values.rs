//! `encoded_value`, `encoded_array` and `encoded_annotation`
//! https://source.android.com/docs/core/runtime/dex-format#encoding
//!
//! Values refer to pool entries by key. Reading resolves indices through the pools, writing
//! resolves keys back, so the pools must hold every key a value refers to (see `collect_keys`).

use crate::dex::error::DexError;
use crate::dex::pool::DexPools;
use crate::dex::{read_u1, read_uleb128, write_u1, write_uleb128, write_x};
use crate::types::{FieldKey, MethodKey, ProtoKey, TypeKey};
use num_traits::PrimInt;
use std::cmp::max;
use std::fmt;
use std::mem::size_of;

const VALUE_BYTE: u8 = 0x00;
const VALUE_SHORT: u8 = 0x02;
const VALUE_CHAR: u8 = 0x03;
const VALUE_INT: u8 = 0x04;
const VALUE_LONG: u8 = 0x06;
const VALUE_FLOAT: u8 = 0x10;
const VALUE_DOUBLE: u8 = 0x11;
const VALUE_METHOD_TYPE: u8 = 0x15;
const VALUE_METHOD_HANDLE: u8 = 0x16;
const VALUE_STRING: u8 = 0x17;
const VALUE_TYPE: u8 = 0x18;
const VALUE_FIELD: u8 = 0x19;
const VALUE_METHOD: u8 = 0x1a;
const VALUE_ENUM: u8 = 0x1b;
const VALUE_ARRAY: u8 = 0x1c;
const VALUE_ANNOTATION: u8 = 0x1d;
const VALUE_NULL: u8 = 0x1e;
const VALUE_BOOLEAN: u8 = 0x1f;

#[derive(Debug, PartialEq, Clone)]
pub enum EncodedValue
{
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(ProtoKey),
    /// Index into method_handles; that section is not modelled.
    MethodHandle(u32),
    String(String),
    Type(TypeKey),
    Field(FieldKey),
    Method(MethodKey),
    Enum(FieldKey),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue
{
    /// The implicit value of a field of type `t` that has no initializer.
    pub fn default_for(t: &TypeKey) -> EncodedValue
    {
        match t.descriptor()
        {
            "Z" => EncodedValue::Boolean(false),
            "B" => EncodedValue::Byte(0),
            "S" => EncodedValue::Short(0),
            "C" => EncodedValue::Char(0),
            "I" => EncodedValue::Int(0),
            "J" => EncodedValue::Long(0),
            "F" => EncodedValue::Float(0.0),
            "D" => EncodedValue::Double(0.0),
            _ => EncodedValue::Null,
        }
    }

    /// True for zero, false and null. `-0.0` is not a default.
    pub fn is_default(&self) -> bool
    {
        match self
        {
            EncodedValue::Byte(v) => *v == 0,
            EncodedValue::Short(v) => *v == 0,
            EncodedValue::Char(v) => *v == 0,
            EncodedValue::Int(v) => *v == 0,
            EncodedValue::Long(v) => *v == 0,
            EncodedValue::Float(v) => v.to_bits() == 0,
            EncodedValue::Double(v) => v.to_bits() == 0,
            EncodedValue::Boolean(v) => !*v,
            EncodedValue::Null => true,
            _ => false,
        }
    }

    /// Shorty character of a primitive value.
    pub fn primitive_type(&self) -> Option<char>
    {
        match self
        {
            EncodedValue::Byte(_) => Some('B'),
            EncodedValue::Short(_) => Some('S'),
            EncodedValue::Char(_) => Some('C'),
            EncodedValue::Int(_) => Some('I'),
            EncodedValue::Long(_) => Some('J'),
            EncodedValue::Float(_) => Some('F'),
            EncodedValue::Double(_) => Some('D'),
            EncodedValue::Boolean(_) => Some('Z'),
            _ => None,
        }
    }

    /// Whether the value can initialize a field of type `t`.
    pub fn fits_type(&self, t: &TypeKey) -> bool
    {
        match self.primitive_type()
        {
            Some(c) => t.is_primitive() && t.shorty() == c,
            None => !t.is_primitive(),
        }
    }

    #[inline]
    pub fn as_annotation(&self) -> Option<&EncodedAnnotation>
    {
        match self
        {
            EncodedValue::Annotation(ann) => Some(ann),
            _ => None,
        }
    }

    /// Interns every key the value refers to.
    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        match self
        {
            EncodedValue::MethodType(p) => { pools.intern_proto(p); }
            EncodedValue::String(s) => { pools.intern_string(s); }
            EncodedValue::Type(t) => { pools.intern_type(t); }
            EncodedValue::Field(f) | EncodedValue::Enum(f) => { pools.intern_field(f); }
            EncodedValue::Method(m) => { pools.intern_method(m); }
            EncodedValue::Array(values) => {
                for v in values
                {
                    v.collect_keys(pools);
                }
            }
            EncodedValue::Annotation(a) => a.collect_keys(pools),
            _ => {}
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, pools: &DexPools) -> Result<EncodedValue, DexError>
    {
        let header_byte = read_u1(bytes, ix)?;
        let value_arg = header_byte >> 5;
        let value_type = header_byte & 0x1F;
        let size = (value_arg + 1) as usize;

        let value = match value_type
        {
            VALUE_BYTE => EncodedValue::Byte(read_signed(bytes, ix, size, 1)? as i8),
            VALUE_SHORT => EncodedValue::Short(read_signed(bytes, ix, size, 2)? as i16),
            VALUE_CHAR => EncodedValue::Char(read_unsigned(bytes, ix, size, 2)? as u16),
            VALUE_INT => EncodedValue::Int(read_signed(bytes, ix, size, 4)? as i32),
            VALUE_LONG => EncodedValue::Long(read_signed(bytes, ix, size, 8)?),
            VALUE_FLOAT => EncodedValue::Float(f32::from_bits(read_right(bytes, ix, size, 4)? as u32)),
            VALUE_DOUBLE => EncodedValue::Double(f64::from_bits(read_right(bytes, ix, size, 8)?)),
            VALUE_METHOD_TYPE => EncodedValue::MethodType(pools.protos.at(read_index(bytes, ix, size)?)?.clone()),
            VALUE_METHOD_HANDLE => EncodedValue::MethodHandle(read_index(bytes, ix, size)?),
            VALUE_STRING => EncodedValue::String(pools.strings.at(read_index(bytes, ix, size)?)?.clone()),
            VALUE_TYPE => EncodedValue::Type(pools.types.at(read_index(bytes, ix, size)?)?.clone()),
            VALUE_FIELD => EncodedValue::Field(pools.fields.at(read_index(bytes, ix, size)?)?.clone()),
            VALUE_METHOD => EncodedValue::Method(pools.methods.at(read_index(bytes, ix, size)?)?.clone()),
            VALUE_ENUM => EncodedValue::Enum(pools.fields.at(read_index(bytes, ix, size)?)?.clone()),
            VALUE_ARRAY => EncodedValue::Array(read_values(bytes, ix, pools)?),
            VALUE_ANNOTATION => EncodedValue::Annotation(EncodedAnnotation::read(bytes, ix, pools)?),
            VALUE_NULL => EncodedValue::Null,
            VALUE_BOOLEAN => EncodedValue::Boolean(value_arg != 0),
            _ => fail!("Unknown encoded value type 0x{:02x} at index {}", value_type, *ix - 1),
        };
        Ok(value)
    }

    pub fn write(&self, bytes: &mut Vec<u8>, pools: &DexPools) -> Result<usize, DexError>
    {
        let c = match self
        {
            EncodedValue::Byte(v) => write_u1(bytes, VALUE_BYTE) + write_u1(bytes, *v as u8),
            EncodedValue::Short(v) => write_signed(bytes, VALUE_SHORT, *v),
            EncodedValue::Char(v) => write_unsigned(bytes, VALUE_CHAR, *v),
            EncodedValue::Int(v) => write_signed(bytes, VALUE_INT, *v),
            EncodedValue::Long(v) => write_signed(bytes, VALUE_LONG, *v),
            EncodedValue::Float(v) => write_right(bytes, VALUE_FLOAT, v.to_bits()),
            EncodedValue::Double(v) => write_right(bytes, VALUE_DOUBLE, v.to_bits()),
            EncodedValue::MethodType(p) => write_unsigned(bytes, VALUE_METHOD_TYPE, pools.proto_index(p)?),
            EncodedValue::MethodHandle(i) => write_unsigned(bytes, VALUE_METHOD_HANDLE, *i),
            EncodedValue::String(s) => write_unsigned(bytes, VALUE_STRING, pools.string_index(s)?),
            EncodedValue::Type(t) => write_unsigned(bytes, VALUE_TYPE, pools.type_index(t)?),
            EncodedValue::Field(f) => write_unsigned(bytes, VALUE_FIELD, pools.field_index(f)?),
            EncodedValue::Method(m) => write_unsigned(bytes, VALUE_METHOD, pools.method_index(m)?),
            EncodedValue::Enum(f) => write_unsigned(bytes, VALUE_ENUM, pools.field_index(f)?),
            EncodedValue::Array(values) => write_u1(bytes, VALUE_ARRAY) + write_values(bytes, values, pools)?,
            EncodedValue::Annotation(a) => write_u1(bytes, VALUE_ANNOTATION) + a.write(bytes, pools)?,
            EncodedValue::Null => write_u1(bytes, VALUE_NULL),
            EncodedValue::Boolean(v) => write_u1(bytes, VALUE_BOOLEAN | ((*v as u8) << 5)),
        };
        Ok(c)
    }
}

impl fmt::Display for EncodedValue
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            EncodedValue::Byte(x) => write!(f, "{:#x}t", x),
            EncodedValue::Short(x) => write!(f, "{:#x}s", x),
            EncodedValue::Char(x) => match char::from_u32(*x as u32) {
                Some(c) => write!(f, "{:?}", c),
                None => write!(f, "'\\u{:04x}'", x),
            },
            EncodedValue::Int(x) => write!(f, "{:#x}", x),
            EncodedValue::Long(x) => write!(f, "{:#x}L", x),
            EncodedValue::Float(x) => write!(f, "{}f", x),
            EncodedValue::Double(x) => write!(f, "{}", x),
            EncodedValue::MethodType(p) => write!(f, "{}", p),
            EncodedValue::MethodHandle(i) => write!(f, "method_handle@{}", i),
            EncodedValue::String(s) => write!(f, "{:?}", s),
            EncodedValue::Type(t) => write!(f, "{}", t),
            EncodedValue::Field(k) => write!(f, "{}", k),
            EncodedValue::Method(k) => write!(f, "{}", k),
            EncodedValue::Enum(k) => write!(f, ".enum {}", k),
            EncodedValue::Array(values) => {
                write!(f, "{{")?;
                for (i, v) in values.iter().enumerate()
                {
                    write!(f, "{}{}", if i == 0 { " " } else { ", " }, v)?;
                }
                write!(f, " }}")
            }
            EncodedValue::Annotation(a) => write!(f, ".subannotation {}", a.type_key),
            EncodedValue::Null => write!(f, "null"),
            EncodedValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct AnnotationElement
{
    pub name: String,
    pub value: EncodedValue,
}

#[derive(Debug, PartialEq, Clone)]
pub struct EncodedAnnotation
{
    pub type_key: TypeKey,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation
{
    pub fn new(type_key: TypeKey) -> EncodedAnnotation
    {
        EncodedAnnotation { type_key, elements: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&EncodedValue>
    {
        self.elements.iter().find(|e| e.name == name).map(|e| &e.value)
    }

    /// Sets or replaces the element called `name`.
    pub fn set(&mut self, name: &str, value: EncodedValue)
    {
        match self.elements.iter_mut().find(|e| e.name == name)
        {
            Some(e) => e.value = value,
            None => self.elements.push(AnnotationElement { name: name.to_string(), value }),
        }
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        pools.intern_type(&self.type_key);
        for e in &self.elements
        {
            pools.intern_string(&e.name);
            e.value.collect_keys(pools);
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, pools: &DexPools) -> Result<EncodedAnnotation, DexError>
    {
        let type_key = pools.types.at(read_uleb128(bytes, ix)?)?.clone();
        let size = read_uleb128(bytes, ix)? as usize;
        let mut elements = Vec::with_capacity(size.min(bytes.len()));
        for _ in 0..size
        {
            let name = pools.strings.at(read_uleb128(bytes, ix)?)?.clone();
            let value = EncodedValue::read(bytes, ix, pools)?;
            elements.push(AnnotationElement { name, value });
        }
        Ok(EncodedAnnotation { type_key, elements })
    }

    /// Elements go out sorted by name index.
    pub fn write(&self, bytes: &mut Vec<u8>, pools: &DexPools) -> Result<usize, DexError>
    {
        let mut ordered = Vec::with_capacity(self.elements.len());
        for e in &self.elements
        {
            ordered.push((pools.string_index(&e.name)?, &e.value));
        }
        ordered.sort_by_key(|(i, _)| *i);

        let mut c = write_uleb128(bytes, pools.type_index(&self.type_key)?);
        c += write_uleb128(bytes, ordered.len() as u32);
        for (name_idx, value) in ordered
        {
            c += write_uleb128(bytes, name_idx);
            c += value.write(bytes, pools)?;
        }
        Ok(c)
    }
}

/// `encoded_array_item`; as a class's static values it holds one slot per leading static field.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct EncodedArray
{
    pub values: Vec<EncodedValue>,
}

impl EncodedArray
{
    pub fn new(values: Vec<EncodedValue>) -> EncodedArray
    {
        EncodedArray { values }
    }

    pub fn len(&self) -> usize
    {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EncodedValue>
    {
        self.values.get(index)
    }

    pub fn set(&mut self, index: usize, value: EncodedValue) -> Result<(), DexError>
    {
        match self.values.get_mut(index)
        {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => fail!(kind: Contract, "Value index {} out of range for array of {}", index, self.values.len()),
        }
    }

    pub fn add(&mut self, value: EncodedValue)
    {
        self.values.push(value);
    }

    pub fn remove(&mut self, index: usize) -> Option<EncodedValue>
    {
        if index < self.values.len() { Some(self.values.remove(index)) } else { None }
    }

    /// Drops trailing default values; returns how many went.
    pub fn trim_null(&mut self) -> usize
    {
        let keep = self.values.iter().rposition(|v| !v.is_default()).map_or(0, |i| i + 1);
        let dropped = self.values.len() - keep;
        self.values.truncate(keep);
        dropped
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        for v in &self.values
        {
            v.collect_keys(pools);
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, pools: &DexPools) -> Result<EncodedArray, DexError>
    {
        Ok(EncodedArray { values: read_values(bytes, ix, pools)? })
    }

    pub fn write(&self, bytes: &mut Vec<u8>, pools: &DexPools) -> Result<usize, DexError>
    {
        write_values(bytes, &self.values, pools)
    }
}

fn read_values(bytes: &[u8], ix: &mut usize, pools: &DexPools) -> Result<Vec<EncodedValue>, DexError>
{
    let size = read_uleb128(bytes, ix)? as usize;
    let mut values = Vec::with_capacity(size.min(bytes.len()));
    for i in 0..size
    {
        values.push(EncodedValue::read(bytes, ix, pools).map_err(|e| err!(e, "array element {}", i))?);
    }
    Ok(values)
}

fn write_values(bytes: &mut Vec<u8>, values: &[EncodedValue], pools: &DexPools) -> Result<usize, DexError>
{
    let mut c = write_uleb128(bytes, values.len() as u32);
    for v in values
    {
        c += v.write(bytes, pools)?;
    }
    Ok(c)
}

fn read_raw(bytes: &[u8], ix: &mut usize, size: usize, limit: usize) -> Result<u64, DexError>
{
    if size > limit
    {
        fail!("Encoded value of {} bytes exceeds its type's {} at index {}", size, limit, *ix);
    }
    let mut result = 0u64;
    for i in 0..size
    {
        result |= (read_u1(bytes, ix)? as u64) << (8 * i);
    }
    Ok(result)
}

fn read_signed(bytes: &[u8], ix: &mut usize, size: usize, limit: usize) -> Result<i64, DexError>
{
    let raw = read_raw(bytes, ix, size, limit)?;
    let shift = 64 - 8 * size as u32;
    Ok(((raw << shift) as i64) >> shift)
}

fn read_unsigned(bytes: &[u8], ix: &mut usize, size: usize, limit: usize) -> Result<u64, DexError>
{
    read_raw(bytes, ix, size, limit)
}

fn read_index(bytes: &[u8], ix: &mut usize, size: usize) -> Result<u32, DexError>
{
    Ok(read_raw(bytes, ix, size, 4)? as u32)
}

/// Float bits are stored with their low zero bytes dropped.
fn read_right(bytes: &[u8], ix: &mut usize, size: usize, limit: usize) -> Result<u64, DexError>
{
    let raw = read_raw(bytes, ix, size, limit)?;
    Ok(raw << (8 * (limit - size)))
}

/// Bytes needed for `v` once sign-extended back.
fn signed_width<T: PrimInt>(v: T) -> usize
{
    let bits = size_of::<T>() * 8;
    let redundant = if v < T::zero() { (!v).leading_zeros() } else { v.leading_zeros() } as usize;
    max(1, (bits - redundant + 1 + 7) / 8)
}

fn unsigned_width<T: PrimInt>(v: T) -> usize
{
    let bits = size_of::<T>() * 8 - v.leading_zeros() as usize;
    max(1, (bits + 7) / 8)
}

fn right_width<T: PrimInt>(v: T) -> usize
{
    max(1, size_of::<T>() - v.trailing_zeros() as usize / 8)
}

fn write_signed<T: PrimInt>(bytes: &mut Vec<u8>, value_type: u8, v: T) -> usize
{
    let width = signed_width(v);
    let raw = v.to_i64().unwrap_or_default().to_le_bytes();
    write_u1(bytes, ((width as u8 - 1) << 5) | value_type) + write_x(bytes, &raw[..width])
}

fn write_unsigned<T: PrimInt>(bytes: &mut Vec<u8>, value_type: u8, v: T) -> usize
{
    let width = unsigned_width(v);
    let raw = v.to_u64().unwrap_or_default().to_le_bytes();
    write_u1(bytes, ((width as u8 - 1) << 5) | value_type) + write_x(bytes, &raw[..width])
}

fn write_right<T: PrimInt>(bytes: &mut Vec<u8>, value_type: u8, v: T) -> usize
{
    let size = size_of::<T>();
    let width = right_width(v);
    let raw = v.to_u64().unwrap_or_default().to_le_bytes();
    write_u1(bytes, ((width as u8 - 1) << 5) | value_type) + write_x(bytes, &raw[size - width..size])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(v: &EncodedValue, pools: &DexPools) -> Vec<u8> {
        let mut out = vec![];
        v.write(&mut out, pools).expect("write failed");
        out
    }

    fn decode(bytes: &[u8], pools: &DexPools) -> EncodedValue {
        let mut ix = 0;
        let v = EncodedValue::read(bytes, &mut ix, pools).expect("read failed");
        assert_eq!(ix, bytes.len());
        v
    }

    #[test]
    fn integers_use_minimal_width() {
        let pools = DexPools::new();
        let cases = vec![
            (EncodedValue::Byte(0x7f), vec![0x00, 0x7f]),
            (EncodedValue::Short(0x1234), vec![0x22, 0x34, 0x12]),
            (EncodedValue::Short(-1), vec![0x02, 0xff]),
            (EncodedValue::Char(0x80), vec![0x03, 0x80]),
            (EncodedValue::Int(0x80), vec![0x24, 0x80, 0x00]),
            (EncodedValue::Int(-129), vec![0x24, 0x7f, 0xff]),
            (EncodedValue::Int(0x12345678), vec![0x64, 0x78, 0x56, 0x34, 0x12]),
            (EncodedValue::Long(-1), vec![0x06, 0xff]),
            (EncodedValue::Long(i64::MIN), vec![0xe6, 0, 0, 0, 0, 0, 0, 0, 0x80]),
        ];
        for (value, bytes) in cases {
            assert_eq!(encode(&value, &pools), bytes, "{:?}", value);
            assert_eq!(decode(&bytes, &pools), value);
        }
    }

    #[test]
    fn floats_drop_low_zero_bytes() {
        let pools = DexPools::new();
        // 1.0f = 0x3f800000
        assert_eq!(encode(&EncodedValue::Float(1.0), &pools), vec![0x30, 0x80, 0x3f]);
        assert_eq!(decode(&[0x30, 0x80, 0x3f], &pools), EncodedValue::Float(1.0));
        assert_eq!(encode(&EncodedValue::Double(2.0), &pools), vec![0x11, 0x40]);
        assert_eq!(decode(&[0x11, 0x40], &pools), EncodedValue::Double(2.0));
        assert_eq!(encode(&EncodedValue::Float(0.0), &pools), vec![0x10, 0x00]);
    }

    #[test]
    fn keyed_values_resolve_through_pools() {
        let mut pools = DexPools::new();
        let mut anno = EncodedAnnotation::new(TypeKey::new("Lanno;"));
        anno.set("value", EncodedValue::String("hello".to_string()));
        anno.set("count", EncodedValue::Int(3));
        let value = EncodedValue::Array(vec![
            EncodedValue::Type(TypeKey::new("Lfoo;")),
            EncodedValue::Enum(FieldKey::new("Lcolor;", "RED", "Lcolor;")),
            EncodedValue::Annotation(anno),
            EncodedValue::Boolean(true),
            EncodedValue::Null,
        ]);
        value.collect_keys(&mut pools);
        pools.refresh();

        let bytes = encode(&value, &pools);
        let back = decode(&bytes, &pools);
        match &back {
            EncodedValue::Array(values) => {
                let a = values[2].as_annotation().unwrap();
                // sorted by name index on write
                assert_eq!(a.elements[0].name, "count");
                assert_eq!(a.get("value"), Some(&EncodedValue::String("hello".to_string())));
            }
            _ => panic!("Unexpected variant"),
        }
    }

    #[test]
    fn missing_key_is_unresolved() {
        let pools = DexPools::new();
        let mut out = vec![];
        let e = EncodedValue::String("x".to_string()).write(&mut out, &pools).unwrap_err();
        assert_eq!(e.kind(), crate::dex::ErrorKind::Unresolved);
    }

    #[test]
    fn oversized_and_unknown_values_are_corrupt() {
        let pools = DexPools::new();
        let mut ix = 0;
        assert!(EncodedValue::read(&[0x24 | 0xe0, 0, 0, 0, 0, 0, 0, 0, 0], &mut ix, &pools).is_err());
        ix = 0;
        assert!(EncodedValue::read(&[0x05], &mut ix, &pools).is_err());
    }

    #[test]
    fn trim_null_keeps_last_non_default() {
        let mut a = EncodedArray::new(vec![
            EncodedValue::Int(0),
            EncodedValue::Int(5),
            EncodedValue::Int(0),
            EncodedValue::Null,
            EncodedValue::Boolean(false),
        ]);
        assert_eq!(a.trim_null(), 3);
        assert_eq!(a.len(), 2);

        let mut zeros = EncodedArray::new(vec![EncodedValue::Long(0), EncodedValue::Double(0.0)]);
        zeros.trim_null();
        assert!(zeros.is_empty());
        assert!(!EncodedValue::Double(-0.0).is_default());
    }

    #[test]
    fn defaults_fit_their_types() {
        for d in ["Z", "B", "S", "C", "I", "J", "F", "D", "Ljava/lang/String;", "[I"] {
            let t = TypeKey::new(d);
            let v = EncodedValue::default_for(&t);
            assert!(v.is_default());
            assert!(v.fits_type(&t));
        }
        assert!(!EncodedValue::Int(1).fits_type(&TypeKey::new("J")));
        assert!(!EncodedValue::Null.fits_type(&TypeKey::new("I")));
    }
}
