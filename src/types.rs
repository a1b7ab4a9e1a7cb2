/* Identifier keys for the dex pools. A key is the content identity of a type, prototype,
   field or method; pools map keys to indices and definitions hold keys, never indices. */

use crate::dex::error::{DexError, ErrorKind};
use bitflags::bitflags;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, one_of};
use nom::combinator::{all_consuming, map, recognize};
use nom::multi::{many0, many1_count};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Access flags shared by classes, fields and methods.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        const VOLATILE = 0x40;
        const BRIDGE = 0x40;
        const TRANSIENT = 0x80;
        const VARARGS = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

impl AccessFlags
{
    /// Keeps unknown bits so a read/write cycle is lossless.
    pub fn from_raw(value: u32) -> AccessFlags
    {
        AccessFlags::from_bits_retain(value)
    }
}

/// A type descriptor such as `I`, `[J` or `Ljava/lang/String;`
///
/// # Examples
///
/// ```
///  use dexdata::types::TypeKey;
///
///  let t: TypeKey = "[Ljava/lang/String;".parse().unwrap();
///  assert!(t.is_array());
///  assert!(!t.is_primitive());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeKey(String);

impl TypeKey
{
    /// Wraps a descriptor without checking it; pools hold whatever the file holds.
    pub fn new(descriptor: &str) -> TypeKey
    {
        TypeKey(descriptor.to_string())
    }

    pub fn descriptor(&self) -> &str
    {
        &self.0
    }

    pub fn is_primitive(&self) -> bool
    {
        self.0.len() == 1 && "ZBSCIJFD".contains(self.0.as_str())
    }

    pub fn is_void(&self) -> bool
    {
        self.0 == "V"
    }

    pub fn is_array(&self) -> bool
    {
        self.0.starts_with('[')
    }

    /// Takes two registers and two slots in a register list.
    pub fn is_wide(&self) -> bool
    {
        self.0 == "J" || self.0 == "D"
    }

    pub fn register_count(&self) -> u16
    {
        if self.is_wide() { 2 } else { 1 }
    }

    pub fn shorty(&self) -> char
    {
        match self.0.chars().next()
        {
            Some('[') | Some('L') | None => 'L',
            Some(c) => c,
        }
    }
}

impl fmt::Display for TypeKey
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TypeKey
{
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match all_consuming(return_descriptor)(s)
        {
            Ok((_, d)) => Ok(TypeKey::new(d)),
            Err(_) => Err(DexError::of_kind(ErrorKind::Contract, &format!("Invalid type descriptor {:?}", s))),
        }
    }
}

/// A method prototype: return type and parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtoKey
{
    pub return_type: TypeKey,
    pub parameters: Vec<TypeKey>,
}

impl ProtoKey
{
    pub fn new(return_type: TypeKey, parameters: Vec<TypeKey>) -> ProtoKey
    {
        ProtoKey { return_type, parameters }
    }

    pub fn shorty(&self) -> String
    {
        let mut s = String::with_capacity(self.parameters.len() + 1);
        s.push(self.return_type.shorty());
        for p in &self.parameters
        {
            s.push(p.shorty());
        }
        s
    }

    /// Registers taken by the declared parameters, excluding `this`.
    pub fn parameter_registers(&self) -> u16
    {
        self.parameters.iter().map(TypeKey::register_count).sum()
    }

    /// Registers taken by the parameters before `index`.
    pub fn register_of(&self, index: usize) -> u16
    {
        self.parameters.iter().take(index).map(TypeKey::register_count).sum()
    }

    pub fn remove_parameter(&self, index: usize) -> ProtoKey
    {
        let mut parameters = self.parameters.clone();
        if index < parameters.len()
        {
            parameters.remove(index);
        }
        ProtoKey::new(self.return_type.clone(), parameters)
    }

    pub fn uses_type(&self, t: &TypeKey) -> bool
    {
        &self.return_type == t || self.parameters.contains(t)
    }

    /// Swaps every occurrence of `search` for `replace`.
    pub fn replace_type(&self, search: &TypeKey, replace: &TypeKey) -> ProtoKey
    {
        let swap = |t: &TypeKey| if t == search { replace.clone() } else { t.clone() };
        ProtoKey::new(swap(&self.return_type), self.parameters.iter().map(swap).collect())
    }
}

impl fmt::Display for ProtoKey
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "(")?;
        for p in &self.parameters
        {
            write!(f, "{}", p)?;
        }
        write!(f, "){}", self.return_type)
    }
}

impl FromStr for ProtoKey
{
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match all_consuming(proto_descriptor)(s)
        {
            Ok((_, p)) => Ok(p),
            Err(_) => Err(DexError::of_kind(ErrorKind::Contract, &format!("Invalid prototype {:?}", s))),
        }
    }
}

/// `Lcls;->name:type`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldKey
{
    pub declaring: TypeKey,
    pub name: String,
    pub field_type: TypeKey,
}

impl FieldKey
{
    pub fn new(declaring: &str, name: &str, field_type: &str) -> FieldKey
    {
        FieldKey {
            declaring: TypeKey::new(declaring),
            name: name.to_string(),
            field_type: TypeKey::new(field_type),
        }
    }

    pub fn uses_type(&self, t: &TypeKey) -> bool
    {
        &self.declaring == t || &self.field_type == t
    }

    pub fn replace_type(&self, search: &TypeKey, replace: &TypeKey) -> FieldKey
    {
        let swap = |t: &TypeKey| if t == search { replace.clone() } else { t.clone() };
        FieldKey { declaring: swap(&self.declaring), name: self.name.clone(), field_type: swap(&self.field_type) }
    }
}

impl fmt::Display for FieldKey
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}->{}:{}", self.declaring, self.name, self.field_type)
    }
}

impl FromStr for FieldKey
{
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let parsed: IResult<&str, (&str, &str, &str, &str, &str)> =
            all_consuming(tuple((field_descriptor, tag("->"), member_name, tag(":"), field_descriptor)))(s);
        match parsed
        {
            Ok((_, (declaring, _, name, _, field_type))) => Ok(FieldKey::new(declaring, name, field_type)),
            Err(_) => Err(DexError::of_kind(ErrorKind::Contract, &format!("Invalid field key {:?}", s))),
        }
    }
}

/// `Lcls;->name(params)return`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodKey
{
    pub declaring: TypeKey,
    pub name: String,
    pub proto: ProtoKey,
}

impl MethodKey
{
    pub fn new(declaring: &str, name: &str, proto: ProtoKey) -> MethodKey
    {
        MethodKey {
            declaring: TypeKey::new(declaring),
            name: name.to_string(),
            proto,
        }
    }

    pub fn parameters_count(&self) -> usize
    {
        self.proto.parameters.len()
    }

    pub fn is_constructor(&self) -> bool
    {
        self.name == "<init>" || self.name == "<clinit>"
    }

    pub fn remove_parameter(&self, index: usize) -> MethodKey
    {
        MethodKey { declaring: self.declaring.clone(), name: self.name.clone(), proto: self.proto.remove_parameter(index) }
    }

    pub fn uses_type(&self, t: &TypeKey) -> bool
    {
        &self.declaring == t || self.proto.uses_type(t)
    }

    pub fn replace_type(&self, search: &TypeKey, replace: &TypeKey) -> MethodKey
    {
        let declaring = if &self.declaring == search { replace.clone() } else { self.declaring.clone() };
        MethodKey { declaring, name: self.name.clone(), proto: self.proto.replace_type(search, replace) }
    }
}

impl fmt::Display for MethodKey
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}->{}{}", self.declaring, self.name, self.proto)
    }
}

impl FromStr for MethodKey
{
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let parsed: IResult<&str, (&str, &str, &str, ProtoKey)> =
            all_consuming(tuple((field_descriptor, tag("->"), member_name, proto_descriptor)))(s);
        match parsed
        {
            Ok((_, (declaring, _, name, proto))) => Ok(MethodKey::new(declaring, name, proto)),
            Err(_) => Err(DexError::of_kind(ErrorKind::Contract, &format!("Invalid method key {:?}", s))),
        }
    }
}

fn primitive_descriptor(input: &str) -> IResult<&str, &str> {
    recognize(one_of("ZBSCIJFD"))(input)
}

fn object_descriptor(input: &str) -> IResult<&str, &str> {
    recognize(tuple((char('L'), take_while1(|c: char| c != ';' && c != '(' && c != ')'), char(';'))))(input)
}

fn array_descriptor(input: &str) -> IResult<&str, &str> {
    recognize(preceded(many1_count(char('[')), alt((primitive_descriptor, object_descriptor))))(input)
}

pub(crate) fn field_descriptor(input: &str) -> IResult<&str, &str> {
    alt((primitive_descriptor, object_descriptor, array_descriptor))(input)
}

fn return_descriptor(input: &str) -> IResult<&str, &str> {
    alt((recognize(char('V')), field_descriptor))(input)
}

fn member_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != ':' && c != '(')(input)
}

pub(crate) fn proto_descriptor(input: &str) -> IResult<&str, ProtoKey> {
    map(
        pair(delimited(char('('), many0(field_descriptor), char(')')), return_descriptor),
        |(params, ret)| ProtoKey::new(TypeKey::new(ret), params.into_iter().map(TypeKey::new).collect()),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_descriptors() {
        assert!("I".parse::<TypeKey>().unwrap().is_primitive());
        assert!("J".parse::<TypeKey>().unwrap().is_wide());
        assert!("V".parse::<TypeKey>().unwrap().is_void());
        assert_eq!("[[Lfoo/Bar;".parse::<TypeKey>().unwrap().shorty(), 'L');
        assert!("Lfoo".parse::<TypeKey>().is_err());
        assert!("[V".parse::<TypeKey>().is_err());
        assert!("Q".parse::<TypeKey>().is_err());
    }

    #[test]
    fn proto_shorty_and_registers() {
        let p: ProtoKey = "(IJLjava/lang/String;[D)V".parse().unwrap();
        assert_eq!(p.parameters.len(), 4);
        assert_eq!(p.shorty(), "VIJLL");
        assert_eq!(p.parameter_registers(), 5);
        assert_eq!(p.to_string(), "(IJLjava/lang/String;[D)V");
    }

    #[test]
    fn member_keys_round_trip_text() {
        let f: FieldKey = "Lfoo;->X:I".parse().unwrap();
        assert_eq!(f, FieldKey::new("Lfoo;", "X", "I"));
        assert_eq!(f.to_string(), "Lfoo;->X:I");

        let m: MethodKey = "Lfoo;-><init>(Ljava/lang/Object;)V".parse().unwrap();
        assert!(m.is_constructor());
        assert_eq!(m.parameters_count(), 1);
        assert_eq!(m.to_string(), "Lfoo;-><init>(Ljava/lang/Object;)V");
        assert!("Lfoo;->run".parse::<MethodKey>().is_err());
    }

    #[test]
    fn keys_order_like_id_sections() {
        let a = FieldKey::new("La;", "b", "I");
        let b = FieldKey::new("La;", "c", "B");
        let c = FieldKey::new("Lb;", "a", "I");
        assert!(a < b && b < c);
    }

    #[test]
    fn type_replacement_reaches_nested_keys() {
        let m: MethodKey = "La;->run(JLa;I)La;".parse().unwrap();
        let (a, b) = (TypeKey::new("La;"), TypeKey::new("Lb;"));
        assert!(m.uses_type(&a));
        assert_eq!(m.replace_type(&a, &b).to_string(), "Lb;->run(JLb;I)Lb;");
        assert_eq!(m.proto.register_of(2), 3);
        assert_eq!(m.remove_parameter(0).to_string(), "La;->run(La;I)La;");
        assert_eq!(m.remove_parameter(9), m);
        let f = FieldKey::new("Lc;", "x", "La;");
        assert_eq!(f.replace_type(&a, &b), FieldKey::new("Lc;", "x", "Lb;"));
        assert!(!f.uses_type(&b));
    }

    #[test]
    fn access_flags_keep_unknown_bits() {
        let f = AccessFlags::from_raw(0x8_0009);
        assert!(f.contains(AccessFlags::PUBLIC | AccessFlags::STATIC));
        assert_eq!(f.bits(), 0x8_0009);
    }
}
