//! Single Dalvik instructions.
//!
//! An instruction keeps its raw code units. Fields that depend on the rest of the file are
//! held symbolically and patched back into the units when the list is encoded:
//! pool indices become a [`Reference`] key, and branch offsets become the [`Label`] of the
//! target instruction.

use crate::dex::error::DexError;
use crate::dex::opcodes::{opcode, Format, Opcode, ReferenceType};
use crate::dex::pool::DexPools;
use crate::types::{FieldKey, MethodKey, ProtoKey, TypeKey};
use std::fmt;

pub const PACKED_SWITCH_IDENT: u16 = 0x0100;
pub const SPARSE_SWITCH_IDENT: u16 = 0x0200;
pub const ARRAY_DATA_IDENT: u16 = 0x0300;

/// Stable identity of an instruction inside its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label
{
    pub(crate) const UNSET: Label = Label(u32::MAX);
}

impl fmt::Display for Label
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, ":L{}", self.0)
    }
}

/// The pool item an instruction refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference
{
    String(String),
    Type(TypeKey),
    Field(FieldKey),
    Method(MethodKey),
    Proto(ProtoKey),
    /// invoke-polymorphic: the method plus the call site prototype.
    Polymorphic(MethodKey, ProtoKey),
    /// Call site or method handle index; those sections keep their order.
    Index(u32),
}

impl Reference
{
    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        match self
        {
            Reference::String(s) => { pools.intern_string(s); }
            Reference::Type(t) => { pools.intern_type(t); }
            Reference::Field(f) => { pools.intern_field(f); }
            Reference::Method(m) => { pools.intern_method(m); }
            Reference::Proto(p) => { pools.intern_proto(p); }
            Reference::Polymorphic(m, p) => {
                pools.intern_method(m);
                pools.intern_proto(p);
            }
            Reference::Index(_) => {}
        }
    }

    /// Whether `key` is this reference or a type inside it.
    pub fn contains_key(&self, key: &Reference) -> bool
    {
        if self == key
        {
            return true;
        }
        match (self, key)
        {
            (Reference::Field(f), Reference::Type(t)) => f.uses_type(t),
            (Reference::Method(m), Reference::Type(t)) => m.uses_type(t),
            (Reference::Proto(p), Reference::Type(t)) => p.uses_type(t),
            (Reference::Polymorphic(m, p), Reference::Type(t)) => m.uses_type(t) || p.uses_type(t),
            (Reference::Polymorphic(m, _), Reference::Method(k)) => m == k,
            _ => false,
        }
    }

    /// This reference with `search` swapped for `replace`; None when `search` does not occur.
    /// A type is swapped inside member and prototype keys too.
    pub fn replace_key(&self, search: &Reference, replace: &Reference) -> Option<Reference>
    {
        if !self.contains_key(search)
        {
            return None;
        }
        if self == search
        {
            return Some(replace.clone());
        }
        let swapped = match (self, search, replace)
        {
            (Reference::Polymorphic(_, p), Reference::Method(_), Reference::Method(k)) => Reference::Polymorphic(k.clone(), p.clone()),
            (_, Reference::Type(from), Reference::Type(to)) => match self
            {
                Reference::Field(f) => Reference::Field(f.replace_type(from, to)),
                Reference::Method(m) => Reference::Method(m.replace_type(from, to)),
                Reference::Proto(p) => Reference::Proto(p.replace_type(from, to)),
                Reference::Polymorphic(m, p) => Reference::Polymorphic(m.replace_type(from, to), p.replace_type(from, to)),
                _ => return None,
            },
            _ => return None,
        };
        Some(swapped)
    }

    fn matches(&self, reference_type: ReferenceType) -> bool
    {
        matches!(
            (self, reference_type),
            (Reference::String(_), ReferenceType::String)
                | (Reference::Type(_), ReferenceType::Type)
                | (Reference::Field(_), ReferenceType::Field)
                | (Reference::Method(_), ReferenceType::Method)
                | (Reference::Polymorphic(..), ReferenceType::Method)
                | (Reference::Proto(_), ReferenceType::MethodProto)
                | (Reference::Index(_), ReferenceType::CallSite)
                | (Reference::Index(_), ReferenceType::MethodHandle)
        )
    }
}

impl fmt::Display for Reference
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            Reference::String(s) => write!(f, "{:?}", s),
            Reference::Type(t) => write!(f, "{}", t),
            Reference::Field(k) => write!(f, "{}", k),
            Reference::Method(k) => write!(f, "{}", k),
            Reference::Proto(p) => write!(f, "{}", p),
            Reference::Polymorphic(m, p) => write!(f, "{}, {}", m, p),
            Reference::Index(i) => write!(f, "@{}", i),
        }
    }
}

/// How an instruction uses a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAccess
{
    Read,
    Write,
}

/// Try, catch and debug positions anchored on an instruction.
///
/// A try range ends before the instruction carrying its `TryEnd`; a range that runs to the end
/// of the code keeps `TryEnd` on the list's tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraLine
{
    TryStart(usize),
    TryEnd(usize),
    Catch { try_index: usize, index: usize },
    CatchAll(usize),
    Debug(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsKind
{
    Op
    {
        units: Vec<u16>,
        reference: Option<Reference>,
        target: Option<Label>,
    },
    /// Targets are relative to the switch instruction referring to the payload.
    PackedSwitch
    {
        first_key: i32,
        targets: Vec<Label>,
    },
    SparseSwitch
    {
        entries: Vec<(i32, Label)>,
    },
    ArrayData
    {
        element_width: u16,
        data: Vec<u8>,
    },
}

/// A register operand field inside the code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSlot
{
    unit: usize,
    shift: u32,
    bits: u32,
    /// Registers covered from this one on; more than one only for range formats.
    pub count: u32,
}

impl RegisterSlot
{
    const fn new(unit: usize, shift: u32, bits: u32) -> RegisterSlot
    {
        RegisterSlot { unit, shift, bits, count: 1 }
    }

    pub fn limit(&self) -> u32
    {
        (1u32 << self.bits) - 1
    }

    pub fn get(&self, units: &[u16]) -> u32
    {
        ((units[self.unit] as u32) >> self.shift) & self.limit()
    }

    /// Whether `value` (and the rest of a range) is encodable here.
    pub fn fits(&self, value: u32) -> bool
    {
        value + self.count.saturating_sub(1) <= self.limit()
    }

    fn set(&self, units: &mut [u16], value: u32)
    {
        let mask = (self.limit() << self.shift) as u16;
        units[self.unit] = (units[self.unit] & !mask) | (((value << self.shift) as u16) & mask);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ins
{
    label: Label,
    pub kind: InsKind,
    pub(crate) extra_lines: Vec<ExtraLine>,
}

impl Ins
{
    fn of(kind: InsKind) -> Ins
    {
        Ins { label: Label::UNSET, kind, extra_lines: Vec::new() }
    }

    /// An instruction without reference or branch target.
    pub fn new(units: Vec<u16>) -> Result<Ins, DexError>
    {
        let op = check_units(&units)?;
        if op.reference_type != ReferenceType::None || op.format.is_branch() || op.format == Format::Format31t
        {
            fail!(kind: Contract, "{} needs a reference or a target", op.name);
        }
        Ok(Ins::of(InsKind::Op { units, reference: None, target: None }))
    }

    pub fn with_reference(units: Vec<u16>, reference: Reference) -> Result<Ins, DexError>
    {
        let op = check_units(&units)?;
        if !reference.matches(op.reference_type)
        {
            fail!(kind: Contract, "{} cannot refer to {}", op.name, reference);
        }
        Ok(Ins::of(InsKind::Op { units, reference: Some(reference), target: None }))
    }

    /// A branch, or a switch/fill-array-data pointing at its payload.
    pub fn with_target(units: Vec<u16>, target: Label) -> Result<Ins, DexError>
    {
        let op = check_units(&units)?;
        if !(op.format.is_branch() || op.format == Format::Format31t)
        {
            fail!(kind: Contract, "{} has no target", op.name);
        }
        Ok(Ins::of(InsKind::Op { units, reference: None, target: Some(target) }))
    }

    pub fn packed_switch(first_key: i32, targets: Vec<Label>) -> Ins
    {
        Ins::of(InsKind::PackedSwitch { first_key, targets })
    }

    pub fn sparse_switch(entries: Vec<(i32, Label)>) -> Ins
    {
        Ins::of(InsKind::SparseSwitch { entries })
    }

    pub fn array_data(element_width: u16, data: Vec<u8>) -> Ins
    {
        Ins::of(InsKind::ArrayData { element_width, data })
    }

    /// The shortest `const` form holding `value` in `register`.
    pub fn const_integer(register: u32, value: i32) -> Result<Ins, DexError>
    {
        if register > 0xff
        {
            fail!(kind: Validation, "Register v{} does not fit a const instruction", register);
        }
        let r = (register as u16) << 8;
        let units = if register <= 0xf && (-8..=7).contains(&value)
        {
            vec![0x12 | r | (((value as u16) & 0xf) << 12)]
        }
        else if (i16::MIN as i32..=i16::MAX as i32).contains(&value)
        {
            vec![0x13 | r, value as i16 as u16]
        }
        else if value & 0xffff == 0
        {
            vec![0x15 | r, ((value as u32) >> 16) as u16]
        }
        else
        {
            vec![0x14 | r, value as u32 as u16, ((value as u32) >> 16) as u16]
        };
        Ins::new(units)
    }

    /// `const-string`, or its jumbo form when the string index needs 32 bits.
    pub fn const_string(register: u32, value: &str, jumbo: bool) -> Result<Ins, DexError>
    {
        if register > 0xff
        {
            fail!(kind: Validation, "Register v{} does not fit a const-string", register);
        }
        let r = (register as u16) << 8;
        let units = if jumbo { vec![0x1b | r, 0, 0] } else { vec![0x1a | r, 0] };
        Ins::with_reference(units, Reference::String(value.to_string()))
    }

    pub fn nop() -> Ins
    {
        Ins::of(InsKind::Op { units: vec![0x0000], reference: None, target: None })
    }

    pub fn return_void() -> Ins
    {
        Ins::of(InsKind::Op { units: vec![0x000e], reference: None, target: None })
    }

    pub fn label(&self) -> Label
    {
        self.label
    }

    pub(crate) fn set_label(&mut self, label: Label)
    {
        self.label = label;
    }

    pub fn extra_lines(&self) -> &[ExtraLine]
    {
        &self.extra_lines
    }

    /// None for payloads.
    pub fn opcode(&self) -> Option<&'static Opcode>
    {
        match &self.kind
        {
            InsKind::Op { units, .. } => opcode((units[0] & 0xff) as u8),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str
    {
        match &self.kind
        {
            InsKind::Op { .. } => self.opcode().map_or("?", |o| o.name),
            InsKind::PackedSwitch { .. } => "packed-switch-payload",
            InsKind::SparseSwitch { .. } => "sparse-switch-payload",
            InsKind::ArrayData { .. } => "array-payload",
        }
    }

    pub fn format(&self) -> Format
    {
        match &self.kind
        {
            InsKind::Op { .. } => self.opcode().map_or(Format::Format10x, |o| o.format),
            InsKind::PackedSwitch { .. } => Format::PackedSwitchPayload,
            InsKind::SparseSwitch { .. } => Format::SparseSwitchPayload,
            InsKind::ArrayData { .. } => Format::ArrayPayload,
        }
    }

    pub fn is_payload(&self) -> bool
    {
        !matches!(self.kind, InsKind::Op { .. })
    }

    /// Size in code units, payload alignment not included.
    pub fn size(&self) -> u32
    {
        match &self.kind
        {
            InsKind::Op { units, .. } => units.len() as u32,
            InsKind::PackedSwitch { targets, .. } => 4 + 2 * targets.len() as u32,
            InsKind::SparseSwitch { entries } => 2 + 4 * entries.len() as u32,
            InsKind::ArrayData { data, .. } => 4 + (data.len() as u32 + 1) / 2,
        }
    }

    pub fn units(&self) -> Option<&[u16]>
    {
        match &self.kind
        {
            InsKind::Op { units, .. } => Some(units),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&Reference>
    {
        match &self.kind
        {
            InsKind::Op { reference, .. } => reference.as_ref(),
            _ => None,
        }
    }

    pub fn set_reference(&mut self, new: Reference) -> Result<(), DexError>
    {
        let reference_type = self.opcode().map_or(ReferenceType::None, |o| o.reference_type);
        if !new.matches(reference_type)
        {
            fail!(kind: Contract, "{} cannot refer to {}", self.name(), new);
        }
        if let InsKind::Op { reference, .. } = &mut self.kind
        {
            *reference = Some(new);
        }
        Ok(())
    }

    /// Every label this instruction jumps to.
    pub fn targets(&self) -> Vec<Label>
    {
        match &self.kind
        {
            InsKind::Op { target, .. } => target.iter().copied().collect(),
            InsKind::PackedSwitch { targets, .. } => targets.clone(),
            InsKind::SparseSwitch { entries } => entries.iter().map(|(_, l)| *l).collect(),
            InsKind::ArrayData { .. } => Vec::new(),
        }
    }

    /// Points jumps at `old` to `new`; returns true when anything changed.
    pub(crate) fn retarget(&mut self, old: Label, new: Label) -> bool
    {
        let mut changed = false;
        let mut swap = |l: &mut Label| {
            if *l == old
            {
                *l = new;
                changed = true;
            }
        };
        match &mut self.kind
        {
            InsKind::Op { target: Some(t), .. } => swap(t),
            InsKind::PackedSwitch { targets, .. } => targets.iter_mut().for_each(&mut swap),
            InsKind::SparseSwitch { entries } => entries.iter_mut().for_each(|(_, l)| swap(l)),
            _ => {}
        }
        changed
    }

    pub fn can_throw(&self) -> bool
    {
        self.opcode().map_or(false, Opcode::can_throw)
    }

    pub fn can_continue(&self) -> bool
    {
        self.opcode().map_or(false, Opcode::can_continue)
    }

    pub fn register_slots(&self) -> Vec<RegisterSlot>
    {
        let units = match &self.kind
        {
            InsKind::Op { units, .. } => units,
            _ => return Vec::new(),
        };
        match self.format()
        {
            Format::Format11n
            | Format::Format11x
            | Format::Format21c
            | Format::Format21ih
            | Format::Format21lh
            | Format::Format21s
            | Format::Format21t
            | Format::Format31c
            | Format::Format31i
            | Format::Format31t
            | Format::Format51l => {
                let bits = if self.format() == Format::Format11n { 4 } else { 8 };
                vec![RegisterSlot::new(0, 8, bits)]
            }
            Format::Format12x | Format::Format22c | Format::Format22s | Format::Format22t => {
                vec![RegisterSlot::new(0, 8, 4), RegisterSlot::new(0, 12, 4)]
            }
            Format::Format22b => vec![RegisterSlot::new(0, 8, 8), RegisterSlot::new(1, 0, 8)],
            Format::Format22x => vec![RegisterSlot::new(0, 8, 8), RegisterSlot::new(1, 0, 16)],
            Format::Format23x => vec![RegisterSlot::new(0, 8, 8), RegisterSlot::new(1, 0, 8), RegisterSlot::new(1, 8, 8)],
            Format::Format32x => vec![RegisterSlot::new(1, 0, 16), RegisterSlot::new(2, 0, 16)],
            Format::Format35c | Format::Format45cc => {
                let count = (units[0] >> 12) as usize;
                let all = [
                    RegisterSlot::new(2, 0, 4),
                    RegisterSlot::new(2, 4, 4),
                    RegisterSlot::new(2, 8, 4),
                    RegisterSlot::new(2, 12, 4),
                    RegisterSlot::new(0, 8, 4),
                ];
                all[..count.min(5)].to_vec()
            }
            Format::Format3rc | Format::Format4rcc => {
                let count = (units[0] >> 8) as u32;
                if count == 0
                {
                    Vec::new()
                }
                else
                {
                    vec![RegisterSlot { count, ..RegisterSlot::new(2, 0, 16) }]
                }
            }
            _ => Vec::new(),
        }
    }

    /// First register of every operand slot.
    pub fn registers(&self) -> Vec<u32>
    {
        match self.units()
        {
            Some(units) => self.register_slots().iter().map(|s| s.get(units)).collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn set_register(&mut self, slot: &RegisterSlot, value: u32) -> Result<(), DexError>
    {
        if !slot.fits(value)
        {
            fail!(kind: Validation, "Register v{} does not fit the operand of {}", value, self.name());
        }
        if let InsKind::Op { units, .. } = &mut self.kind
        {
            slot.set(units, value);
        }
        Ok(())
    }

    /// How this instruction uses `register`, if at all. The destination of a `/2addr`
    /// operation is read before it is written.
    pub fn register_access(&self, register: u32) -> Option<RegisterAccess>
    {
        let units = self.units()?;
        let op = self.opcode()?;
        let mut access = None;
        for (i, slot) in self.register_slots().iter().enumerate()
        {
            let first = slot.get(units);
            let writes = i == 0 && op.sets_register();
            let width = if writes && op.sets_wide_register() { 2 } else { slot.count.max(1) };
            if register < first || register >= first + width
            {
                continue;
            }
            if writes && !op.name.ends_with("/2addr")
            {
                access = Some(RegisterAccess::Write);
            }
            else
            {
                return Some(RegisterAccess::Read);
            }
        }
        access
    }

    /// Swaps `search` for `replace` in the reference; returns true when it changed.
    pub fn replace_keys(&mut self, search: &Reference, replace: &Reference) -> Result<bool, DexError>
    {
        match self.reference().and_then(|r| r.replace_key(search, replace))
        {
            Some(new) => {
                self.set_reference(new)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        if let Some(r) = self.reference()
        {
            r.collect_keys(pools);
        }
    }
}

impl fmt::Display for Ins
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}", self.name())?;
        for r in self.registers()
        {
            write!(f, " v{}", r)?;
        }
        if let Some(r) = self.reference()
        {
            write!(f, " {}", r)?;
        }
        for t in self.targets()
        {
            write!(f, " {}", t)?;
        }
        Ok(())
    }
}

fn check_units(units: &[u16]) -> Result<&'static Opcode, DexError>
{
    let first = match units.first()
    {
        Some(u) => *u,
        None => fail!(kind: Contract, "An instruction needs at least one code unit"),
    };
    let op = match opcode((first & 0xff) as u8)
    {
        Some(op) => op,
        None => fail!(kind: Contract, "Unknown opcode 0x{:02x}", first & 0xff),
    };
    if units.len() as u32 != op.format.size()
    {
        fail!(kind: Contract, "{} takes {} code units, got {}", op.name, op.format.size(), units.len());
    }
    Ok(op)
}

/// Branch offset stored in `units`, in code units relative to the instruction.
pub(crate) fn branch_offset(format: Format, units: &[u16]) -> Option<i32>
{
    match format
    {
        Format::Format10t => Some(((units[0] >> 8) as u8 as i8) as i32),
        Format::Format20t | Format::Format21t | Format::Format22t => Some(units[1] as i16 as i32),
        Format::Format30t | Format::Format31t => Some(((units[1] as u32) | ((units[2] as u32) << 16)) as i32),
        _ => None,
    }
}

pub(crate) fn set_branch_offset(format: Format, units: &mut [u16], offset: i32) -> Result<(), DexError>
{
    match format
    {
        Format::Format10t => {
            if offset < i8::MIN as i32 || offset > i8::MAX as i32
            {
                fail!(kind: Validation, "Branch offset {} does not fit goto", offset);
            }
            units[0] = (units[0] & 0x00ff) | (((offset as i8 as u8) as u16) << 8);
        }
        Format::Format20t | Format::Format21t | Format::Format22t => {
            if offset < i16::MIN as i32 || offset > i16::MAX as i32
            {
                fail!(kind: Validation, "Branch offset {} does not fit 16 bits", offset);
            }
            units[1] = offset as i16 as u16;
        }
        Format::Format30t | Format::Format31t => {
            units[1] = offset as u32 as u16;
            units[2] = ((offset as u32) >> 16) as u16;
        }
        _ => fail!(kind: Contract, "Format {:?} has no branch offset", format),
    }
    Ok(())
}

pub(crate) fn reference_index(format: Format, units: &[u16]) -> Option<u32>
{
    match format
    {
        Format::Format21c | Format::Format22c | Format::Format35c | Format::Format3rc | Format::Format45cc | Format::Format4rcc => {
            Some(units[1] as u32)
        }
        Format::Format31c => Some((units[1] as u32) | ((units[2] as u32) << 16)),
        _ => None,
    }
}

fn set_reference_index(format: Format, units: &mut [u16], index: u32) -> Result<(), DexError>
{
    match format
    {
        Format::Format31c => {
            units[1] = index as u16;
            units[2] = (index >> 16) as u16;
        }
        _ => {
            if index > u16::MAX as u32
            {
                fail!(kind: Validation, "Index {} does not fit a 16-bit operand", index);
            }
            units[1] = index as u16;
        }
    }
    Ok(())
}

/// Turns the raw index of an instruction into its key.
pub(crate) fn resolve_reference(op: &Opcode, units: &[u16], pools: &DexPools) -> Result<Option<Reference>, DexError>
{
    let index = match reference_index(op.format, units)
    {
        Some(i) if op.reference_type != ReferenceType::None => i,
        _ => return Ok(None),
    };
    let r = match op.reference_type
    {
        ReferenceType::String => Reference::String(pools.strings.at(index)?.clone()),
        ReferenceType::Type => Reference::Type(pools.types.at(index)?.clone()),
        ReferenceType::Field => Reference::Field(pools.fields.at(index)?.clone()),
        ReferenceType::Method if matches!(op.format, Format::Format45cc | Format::Format4rcc) => {
            Reference::Polymorphic(pools.methods.at(index)?.clone(), pools.protos.at(units[3] as u32)?.clone())
        }
        ReferenceType::Method => Reference::Method(pools.methods.at(index)?.clone()),
        ReferenceType::MethodProto => Reference::Proto(pools.protos.at(index)?.clone()),
        ReferenceType::CallSite | ReferenceType::MethodHandle => Reference::Index(index),
        ReferenceType::None => return Ok(None),
    };
    Ok(Some(r))
}

/// Writes the index of `reference` into `units`.
pub(crate) fn patch_reference(format: Format, units: &mut [u16], reference: &Reference, pools: &DexPools) -> Result<(), DexError>
{
    let index = match reference
    {
        Reference::String(s) => pools.string_index(s)?,
        Reference::Type(t) => pools.type_index(t)?,
        Reference::Field(f) => pools.field_index(f)?,
        Reference::Method(m) => pools.method_index(m)?,
        Reference::Proto(p) => pools.proto_index(p)?,
        Reference::Polymorphic(m, p) => {
            let proto = pools.proto_index(p)?;
            if proto > u16::MAX as u32
            {
                fail!(kind: Validation, "Proto index {} does not fit invoke-polymorphic", proto);
            }
            units[3] = proto as u16;
            pools.method_index(m)?
        }
        Reference::Index(i) => *i,
    };
    set_reference_index(format, units, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_check_opcode_and_size() {
        assert!(Ins::new(vec![0x0012]).is_ok());
        assert!(Ins::new(vec![0x0013]).is_err());
        assert!(Ins::new(vec![0x003e]).is_err());
        assert!(Ins::new(vec![0x0028]).is_err());
        assert!(Ins::with_target(vec![0x0028], Label(0)).is_ok());
        assert!(Ins::with_reference(vec![0x001a, 0], Reference::Type(TypeKey::new("I"))).is_err());
        assert!(Ins::with_reference(vec![0x001a, 0], Reference::String("s".to_string())).is_ok());
    }

    #[test]
    fn register_slots_per_format() {
        // add-int v1, v2, v3
        let ins = Ins::new(vec![0x0190, 0x0302]).unwrap();
        assert_eq!(ins.registers(), vec![1, 2, 3]);

        // invoke-static {v4, v5, v6}, method@0
        let invoke = Ins::with_reference(
            vec![0x3071, 0x0000, 0x0654],
            Reference::Method(MethodKey::new("La;", "f", "(III)V".parse().unwrap())),
        )
        .unwrap();
        assert_eq!(invoke.registers(), vec![4, 5, 6]);

        // invoke-static/range {v10 .. v12}
        let range = Ins::with_reference(
            vec![0x0377, 0x0000, 0x000a],
            Reference::Method(MethodKey::new("La;", "f", "(III)V".parse().unwrap())),
        )
        .unwrap();
        let slots = range.register_slots();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].count, 3);
        assert!(slots[0].fits(65533));
        assert!(!slots[0].fits(65534));
    }

    #[test]
    fn set_register_respects_width() {
        // move v1, v2
        let mut ins = Ins::new(vec![0x2101]).unwrap();
        let slots = ins.register_slots();
        ins.set_register(&slots[1], 15).unwrap();
        assert_eq!(ins.registers(), vec![1, 15]);
        let e = ins.set_register(&slots[0], 16).unwrap_err();
        assert_eq!(e.kind(), crate::dex::ErrorKind::Validation);
    }

    #[test]
    fn const_integer_picks_the_shortest_form() {
        let name = |r, v| Ins::const_integer(r, v).unwrap().name();
        assert_eq!(name(3, -8), "const/4");
        assert_eq!(Ins::const_integer(3, -1).unwrap().units(), Some(&[0xf312][..]));
        assert_eq!(name(16, 1), "const/16");
        assert_eq!(name(0, 0x7fff), "const/16");
        assert_eq!(name(0, 0x10000), "const/high16");
        assert_eq!(name(0, 0x12345), "const");
        assert_eq!(Ins::const_integer(2, -0x12345).unwrap().units(), Some(&[0x0214, 0xdcbb, 0xfffe][..]));
        assert!(Ins::const_integer(256, 0).is_err());

        let s = Ins::const_string(4, "hi", true).unwrap();
        assert_eq!(s.name(), "const-string/jumbo");
        assert_eq!(s.registers(), vec![4]);
        assert_eq!(s.reference(), Some(&Reference::String("hi".to_string())));
    }

    #[test]
    fn register_access_per_operand() {
        // add-int v1, v2, v1
        let add = Ins::new(vec![0x0190, 0x0102]).unwrap();
        assert_eq!(add.register_access(1), Some(RegisterAccess::Read));
        assert_eq!(add.register_access(2), Some(RegisterAccess::Read));
        // const-wide/16 v4, 1
        let wide = Ins::new(vec![0x0416, 0x0001]).unwrap();
        assert_eq!(wide.register_access(5), Some(RegisterAccess::Write));
        assert_eq!(wide.register_access(6), None);
        // add-int/2addr v0, v1
        let addr2 = Ins::new(vec![0x10b0]).unwrap();
        assert_eq!(addr2.register_access(0), Some(RegisterAccess::Read));
        // move v3, v7
        let mv = Ins::new(vec![0x7301]).unwrap();
        assert_eq!(mv.register_access(3), Some(RegisterAccess::Write));
        assert_eq!(mv.register_access(7), Some(RegisterAccess::Read));
    }

    #[test]
    fn replacing_a_type_reaches_member_references() {
        let from = Reference::Type(TypeKey::new("La;"));
        let to = Reference::Type(TypeKey::new("Lb;"));
        // invoke-static {}, La;->f()La;
        let mut ins = Ins::with_reference(
            vec![0x0071, 0x0000, 0x0000],
            Reference::Method(MethodKey::new("La;", "f", "()La;".parse().unwrap())),
        )
        .unwrap();
        assert!(ins.replace_keys(&from, &to).unwrap());
        assert_eq!(ins.reference().unwrap().to_string(), "Lb;->f()Lb;");
        assert!(!ins.replace_keys(&from, &to).unwrap());
        // a method reference cannot become a string
        let m = ins.reference().cloned().unwrap();
        assert!(ins.replace_keys(&m, &Reference::String("x".to_string())).is_err());
    }

    #[test]
    fn branch_offsets() {
        let mut units = vec![0x0028];
        set_branch_offset(Format::Format10t, &mut units, -3).unwrap();
        assert_eq!(branch_offset(Format::Format10t, &units), Some(-3));
        assert!(set_branch_offset(Format::Format10t, &mut units, 200).is_err());

        let mut units = vec![0x002a, 0, 0];
        set_branch_offset(Format::Format30t, &mut units, -70000).unwrap();
        assert_eq!(branch_offset(Format::Format30t, &units), Some(-70000));
    }

    #[test]
    fn payload_sizes() {
        assert_eq!(Ins::packed_switch(0, vec![Label(1), Label(2)]).size(), 8);
        assert_eq!(Ins::sparse_switch(vec![(1, Label(1))]).size(), 6);
        assert_eq!(Ins::array_data(4, vec![0; 12]).size(), 10);
        assert_eq!(Ins::array_data(1, vec![0; 3]).size(), 6);
    }
}
