//! Dalvik opcode table.
//! https://source.android.com/docs/core/runtime/dalvik-bytecode

use bitflags::bitflags;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Instruction formats. The name encodes the size in code units (first digit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format
{
    Format10t,
    Format10x,
    Format11n,
    Format11x,
    Format12x,
    Format20t,
    Format21c,
    Format21ih,
    Format21lh,
    Format21s,
    Format21t,
    Format22b,
    Format22c,
    Format22s,
    Format22t,
    Format22x,
    Format23x,
    Format30t,
    Format31c,
    Format31i,
    Format31t,
    Format32x,
    Format35c,
    Format3rc,
    Format45cc,
    Format4rcc,
    Format51l,
    ArrayPayload,
    PackedSwitchPayload,
    SparseSwitchPayload,
}

impl Format
{
    /// Size in 16-bit code units; payloads are variable and report 0.
    pub const fn size(&self) -> u32
    {
        match self
        {
            Format::Format10t | Format::Format10x | Format::Format11n | Format::Format11x | Format::Format12x => 1,

            Format::Format20t
            | Format::Format21c
            | Format::Format21ih
            | Format::Format21lh
            | Format::Format21s
            | Format::Format21t
            | Format::Format22b
            | Format::Format22c
            | Format::Format22s
            | Format::Format22t
            | Format::Format22x
            | Format::Format23x => 2,

            Format::Format30t
            | Format::Format31c
            | Format::Format31i
            | Format::Format31t
            | Format::Format32x
            | Format::Format35c
            | Format::Format3rc => 3,

            Format::Format45cc | Format::Format4rcc => 4,
            Format::Format51l => 5,

            Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload => 0,
        }
    }

    /// Formats carrying a branch offset.
    pub const fn is_branch(&self) -> bool
    {
        matches!(self, Format::Format10t | Format::Format20t | Format::Format30t | Format::Format21t | Format::Format22t)
    }

    pub const fn is_payload(&self) -> bool
    {
        matches!(self, Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload)
    }
}

/// What kind of pool item an instruction's index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType
{
    None,
    String,
    Type,
    Field,
    Method,
    CallSite,
    MethodProto,
    MethodHandle,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u32 {
        const CAN_THROW = 0x1;
        const CAN_CONTINUE = 0x4;
        const SETS_RESULT = 0x8;
        const SETS_REGISTER = 0x10;
        const SETS_WIDE_REGISTER = 0x20;
    }
}

#[derive(Debug)]
pub struct Opcode
{
    pub value: u8,
    pub name: &'static str,
    pub format: Format,
    pub reference_type: ReferenceType,
    pub flags: OpcodeFlags,
}

impl Opcode
{
    pub fn can_throw(&self) -> bool
    {
        self.flags.contains(OpcodeFlags::CAN_THROW)
    }

    pub fn can_continue(&self) -> bool
    {
        self.flags.contains(OpcodeFlags::CAN_CONTINUE)
    }

    pub fn sets_register(&self) -> bool
    {
        self.flags.contains(OpcodeFlags::SETS_REGISTER)
    }

    pub fn sets_wide_register(&self) -> bool
    {
        self.flags.contains(OpcodeFlags::SETS_WIDE_REGISTER)
    }
}

const CONTINUE: OpcodeFlags = OpcodeFlags::CAN_CONTINUE;
const THROW: OpcodeFlags = OpcodeFlags::CAN_THROW.union(OpcodeFlags::CAN_CONTINUE);
const SETS: OpcodeFlags = OpcodeFlags::CAN_CONTINUE.union(OpcodeFlags::SETS_REGISTER);
const SETS_WIDE: OpcodeFlags = SETS.union(OpcodeFlags::SETS_WIDE_REGISTER);
const THROW_SETS: OpcodeFlags = THROW.union(OpcodeFlags::SETS_REGISTER);
const THROW_SETS_WIDE: OpcodeFlags = THROW_SETS.union(OpcodeFlags::SETS_WIDE_REGISTER);
const INVOKE: OpcodeFlags = THROW.union(OpcodeFlags::SETS_RESULT);

const ARRAY_OPS: [&str; 7] = ["", "-wide", "-object", "-boolean", "-byte", "-char", "-short"];
const BINARY_INT: [&str; 11] = ["add", "sub", "mul", "div", "rem", "and", "or", "xor", "shl", "shr", "ushr"];
const BINARY_FLOAT: [&str; 5] = ["add", "sub", "mul", "div", "rem"];
const UNARY: [(&str, bool); 21] = [
    ("neg-int", false), ("not-int", false), ("neg-long", true), ("not-long", true),
    ("neg-float", false), ("neg-double", true), ("int-to-long", true), ("int-to-float", false),
    ("int-to-double", true), ("long-to-int", false), ("long-to-float", false), ("long-to-double", true),
    ("float-to-int", false), ("float-to-long", true), ("float-to-double", true), ("double-to-int", false),
    ("double-to-long", true), ("double-to-float", false), ("int-to-byte", false), ("int-to-char", false),
    ("int-to-short", false),
];

fn leak(name: String) -> &'static str
{
    Box::leak(name.into_boxed_str())
}

static OPCODES: Lazy<Vec<Option<Opcode>>> = Lazy::new(|| {
    let mut table: Vec<Option<Opcode>> = (0..256).map(|_| None).collect();
    let mut op = |value: u8, name: &'static str, format: Format, reference_type: ReferenceType, flags: OpcodeFlags| {
        table[value as usize] = Some(Opcode { value, name, format, reference_type, flags });
    };
    use Format::*;
    use ReferenceType as R;

    op(0x00, "nop", Format10x, R::None, CONTINUE);
    op(0x01, "move", Format12x, R::None, SETS);
    op(0x02, "move/from16", Format22x, R::None, SETS);
    op(0x03, "move/16", Format32x, R::None, SETS);
    op(0x04, "move-wide", Format12x, R::None, SETS_WIDE);
    op(0x05, "move-wide/from16", Format22x, R::None, SETS_WIDE);
    op(0x06, "move-wide/16", Format32x, R::None, SETS_WIDE);
    op(0x07, "move-object", Format12x, R::None, SETS);
    op(0x08, "move-object/from16", Format22x, R::None, SETS);
    op(0x09, "move-object/16", Format32x, R::None, SETS);
    op(0x0a, "move-result", Format11x, R::None, SETS);
    op(0x0b, "move-result-wide", Format11x, R::None, SETS_WIDE);
    op(0x0c, "move-result-object", Format11x, R::None, SETS);
    op(0x0d, "move-exception", Format11x, R::None, SETS);
    op(0x0e, "return-void", Format10x, R::None, OpcodeFlags::empty());
    op(0x0f, "return", Format11x, R::None, OpcodeFlags::empty());
    op(0x10, "return-wide", Format11x, R::None, OpcodeFlags::empty());
    op(0x11, "return-object", Format11x, R::None, OpcodeFlags::empty());
    op(0x12, "const/4", Format11n, R::None, SETS);
    op(0x13, "const/16", Format21s, R::None, SETS);
    op(0x14, "const", Format31i, R::None, SETS);
    op(0x15, "const/high16", Format21ih, R::None, SETS);
    op(0x16, "const-wide/16", Format21s, R::None, SETS_WIDE);
    op(0x17, "const-wide/32", Format31i, R::None, SETS_WIDE);
    op(0x18, "const-wide", Format51l, R::None, SETS_WIDE);
    op(0x19, "const-wide/high16", Format21lh, R::None, SETS_WIDE);
    op(0x1a, "const-string", Format21c, R::String, THROW_SETS);
    op(0x1b, "const-string/jumbo", Format31c, R::String, THROW_SETS);
    op(0x1c, "const-class", Format21c, R::Type, THROW_SETS);
    op(0x1d, "monitor-enter", Format11x, R::None, THROW);
    op(0x1e, "monitor-exit", Format11x, R::None, THROW);
    op(0x1f, "check-cast", Format21c, R::Type, THROW_SETS);
    op(0x20, "instance-of", Format22c, R::Type, THROW_SETS);
    op(0x21, "array-length", Format12x, R::None, THROW_SETS);
    op(0x22, "new-instance", Format21c, R::Type, THROW_SETS);
    op(0x23, "new-array", Format22c, R::Type, THROW_SETS);
    op(0x24, "filled-new-array", Format35c, R::Type, INVOKE);
    op(0x25, "filled-new-array/range", Format3rc, R::Type, INVOKE);
    op(0x26, "fill-array-data", Format31t, R::None, CONTINUE);
    op(0x27, "throw", Format11x, R::None, OpcodeFlags::CAN_THROW);
    op(0x28, "goto", Format10t, R::None, OpcodeFlags::empty());
    op(0x29, "goto/16", Format20t, R::None, OpcodeFlags::empty());
    op(0x2a, "goto/32", Format30t, R::None, OpcodeFlags::empty());
    op(0x2b, "packed-switch", Format31t, R::None, CONTINUE);
    op(0x2c, "sparse-switch", Format31t, R::None, CONTINUE);
    for (i, name) in ["cmpl-float", "cmpg-float", "cmpl-double", "cmpg-double", "cmp-long"].into_iter().enumerate()
    {
        op(0x2d + i as u8, name, Format23x, R::None, SETS);
    }
    for (i, cond) in ["eq", "ne", "lt", "ge", "gt", "le"].iter().enumerate()
    {
        op(0x32 + i as u8, leak(format!("if-{}", cond)), Format22t, R::None, CONTINUE);
        op(0x38 + i as u8, leak(format!("if-{}z", cond)), Format21t, R::None, CONTINUE);
    }
    for (i, suffix) in ARRAY_OPS.iter().enumerate()
    {
        let wide = *suffix == "-wide";
        op(0x44 + i as u8, leak(format!("aget{}", suffix)), Format23x, R::None, if wide { THROW_SETS_WIDE } else { THROW_SETS });
        op(0x4b + i as u8, leak(format!("aput{}", suffix)), Format23x, R::None, THROW);
        op(0x52 + i as u8, leak(format!("iget{}", suffix)), Format22c, R::Field, if wide { THROW_SETS_WIDE } else { THROW_SETS });
        op(0x59 + i as u8, leak(format!("iput{}", suffix)), Format22c, R::Field, THROW);
        op(0x60 + i as u8, leak(format!("sget{}", suffix)), Format21c, R::Field, if wide { THROW_SETS_WIDE } else { THROW_SETS });
        op(0x67 + i as u8, leak(format!("sput{}", suffix)), Format21c, R::Field, THROW);
    }
    for (i, kind) in ["virtual", "super", "direct", "static", "interface"].iter().enumerate()
    {
        op(0x6e + i as u8, leak(format!("invoke-{}", kind)), Format35c, R::Method, INVOKE);
        op(0x74 + i as u8, leak(format!("invoke-{}/range", kind)), Format3rc, R::Method, INVOKE);
    }
    for (i, (name, wide)) in UNARY.into_iter().enumerate()
    {
        op(0x7b + i as u8, name, Format12x, R::None, if wide { SETS_WIDE } else { SETS });
    }
    let mut binary = Vec::with_capacity(32);
    for name in BINARY_INT
    {
        binary.push((format!("{}-int", name), false, name == "div" || name == "rem"));
    }
    for name in BINARY_INT
    {
        binary.push((format!("{}-long", name), true, name == "div" || name == "rem"));
    }
    for name in BINARY_FLOAT
    {
        binary.push((format!("{}-float", name), false, false));
    }
    for name in BINARY_FLOAT
    {
        binary.push((format!("{}-double", name), true, false));
    }
    for (i, (name, wide, throws)) in binary.iter().enumerate()
    {
        let flags = match (*wide, *throws)
        {
            (true, true) => THROW_SETS_WIDE,
            (true, false) => SETS_WIDE,
            (false, true) => THROW_SETS,
            (false, false) => SETS,
        };
        op(0x90 + i as u8, leak(name.clone()), Format23x, R::None, flags);
        op(0xb0 + i as u8, leak(format!("{}/2addr", name)), Format12x, R::None, flags);
    }
    for (i, name) in ["add-int/lit16", "rsub-int", "mul-int/lit16", "div-int/lit16", "rem-int/lit16", "and-int/lit16", "or-int/lit16", "xor-int/lit16"]
        .into_iter()
        .enumerate()
    {
        op(0xd0 + i as u8, name, Format22s, R::None, if name.starts_with("div") || name.starts_with("rem") { THROW_SETS } else { SETS });
    }
    for (i, name) in BINARY_INT.iter().enumerate()
    {
        let name = if *name == "sub" { "rsub-int/lit8".to_string() } else { format!("{}-int/lit8", name) };
        let throws = name.starts_with("div") || name.starts_with("rem");
        op(0xd8 + i as u8, leak(name), Format22b, R::None, if throws { THROW_SETS } else { SETS });
    }
    op(0xfa, "invoke-polymorphic", Format45cc, R::Method, INVOKE);
    op(0xfb, "invoke-polymorphic/range", Format4rcc, R::Method, INVOKE);
    op(0xfc, "invoke-custom", Format35c, R::CallSite, INVOKE);
    op(0xfd, "invoke-custom/range", Format3rc, R::CallSite, INVOKE);
    op(0xfe, "const-method-handle", Format21c, R::MethodHandle, THROW_SETS);
    op(0xff, "const-method-type", Format21c, R::MethodProto, THROW_SETS);
    table
});

static BY_NAME: Lazy<HashMap<&'static str, &'static Opcode>> =
    Lazy::new(|| OPCODES.iter().flatten().map(|o| (o.name, o)).collect());

pub fn opcode(value: u8) -> Option<&'static Opcode>
{
    OPCODES[value as usize].as_ref()
}

pub fn opcode_by_name(name: &str) -> Option<&'static Opcode>
{
    BY_NAME.get(name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_the_standard_set() {
        assert_eq!(OPCODES.iter().flatten().count(), 224);
        assert!(opcode(0x3e).is_none());
        assert!(opcode(0x73).is_none());
        assert!(opcode(0xe3).is_none());
    }

    #[test]
    fn names_and_formats() {
        let cases = [
            (0x2d, "cmpl-float", Format::Format23x),
            (0x3d, "if-lez", Format::Format21t),
            (0x4a, "aget-short", Format::Format23x),
            (0x6d, "sput-short", Format::Format21c),
            (0x78, "invoke-interface/range", Format::Format3rc),
            (0x8f, "int-to-short", Format::Format12x),
            (0xaf, "rem-double", Format::Format23x),
            (0xcf, "rem-double/2addr", Format::Format12x),
            (0xd1, "rsub-int", Format::Format22s),
            (0xd9, "rsub-int/lit8", Format::Format22b),
            (0xe2, "ushr-int/lit8", Format::Format22b),
        ];
        for (value, name, format) in cases {
            let o = opcode(value).unwrap();
            assert_eq!(o.name, name);
            assert_eq!(o.format, format);
            assert_eq!(opcode_by_name(name).unwrap().value, value);
        }
    }

    #[test]
    fn flags() {
        assert!(!opcode_by_name("goto").unwrap().can_continue());
        assert!(opcode_by_name("div-int/lit8").unwrap().can_throw());
        assert!(!opcode_by_name("add-int/lit8").unwrap().can_throw());
        assert!(opcode_by_name("add-long").unwrap().sets_wide_register());
        assert!(opcode_by_name("shl-long").unwrap().sets_wide_register());
        assert_eq!(Format::Format51l.size(), 5);
        assert!(Format::Format22t.is_branch());
    }
}
