//! debug_info_item: the line number and local variable state machine.
//!
//! See https://source.android.com/docs/core/runtime/dex-format#debug-info-item
//!
//! The bytecode is decoded into a flat list of [`DebugElement`]s, each with the address and
//! line the state machine was at when it was emitted. Writing encodes the list afresh, so the
//! output is canonical rather than a copy of what was read.

use crate::dex::error::DexError;
use crate::dex::pool::DexPools;
use crate::dex::{read_u1, read_sleb128, read_uleb128, read_uleb128p1, write_u1, write_sleb128, write_uleb128, write_uleb128p1};
use crate::types::TypeKey;
use std::fmt;

const DBG_END_SEQUENCE: u8 = 0x00;
const DBG_ADVANCE_PC: u8 = 0x01;
const DBG_ADVANCE_LINE: u8 = 0x02;
const DBG_START_LOCAL: u8 = 0x03;
const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
const DBG_END_LOCAL: u8 = 0x05;
const DBG_RESTART_LOCAL: u8 = 0x06;
const DBG_SET_PROLOGUE_END: u8 = 0x07;
const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
const DBG_SET_FILE: u8 = 0x09;
const DBG_FIRST_SPECIAL: u8 = 0x0a;
const DBG_LINE_BASE: i32 = -4;
const DBG_LINE_RANGE: i32 = 15;

#[derive(Debug, Clone, PartialEq)]
pub enum DebugKind
{
    LineNumber,
    StartLocal
    {
        register: u32,
        name: Option<String>,
        type_key: Option<TypeKey>,
        signature: Option<String>,
    },
    EndLocal
    {
        register: u32,
    },
    RestartLocal
    {
        register: u32,
    },
    PrologueEnd,
    EpilogueBegin,
    SetFile
    {
        name: Option<String>,
    },
}

impl DebugKind
{
    pub fn register(&self) -> Option<u32>
    {
        match self
        {
            DebugKind::StartLocal { register, .. } | DebugKind::EndLocal { register } | DebugKind::RestartLocal { register } => Some(*register),
            _ => None,
        }
    }

    pub(crate) fn register_mut(&mut self) -> Option<&mut u32>
    {
        match self
        {
            DebugKind::StartLocal { register, .. } | DebugKind::EndLocal { register } | DebugKind::RestartLocal { register } => Some(register),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DebugElement
{
    pub address: u32,
    pub line: u32,
    pub kind: DebugKind,
}

impl fmt::Display for DebugElement
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match &self.kind
        {
            DebugKind::LineNumber => write!(f, "0x{:04x} .line {}", self.address, self.line),
            DebugKind::StartLocal { register, name, type_key, signature } => {
                write!(f, "0x{:04x} .local v{}", self.address, register)?;
                if let Some(n) = name
                {
                    write!(f, ", {:?}", n)?;
                }
                if let Some(t) = type_key
                {
                    write!(f, ":{}", t)?;
                }
                if let Some(s) = signature
                {
                    write!(f, ", {:?}", s)?;
                }
                Ok(())
            }
            DebugKind::EndLocal { register } => write!(f, "0x{:04x} .end local v{}", self.address, register),
            DebugKind::RestartLocal { register } => write!(f, "0x{:04x} .restart local v{}", self.address, register),
            DebugKind::PrologueEnd => write!(f, "0x{:04x} .prologue", self.address),
            DebugKind::EpilogueBegin => write!(f, "0x{:04x} .epilogue", self.address),
            DebugKind::SetFile { name } => write!(f, "0x{:04x} .source {:?}", self.address, name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugInfo
{
    line_start: u32,
    pub parameter_names: Vec<Option<String>>,
    elements: Vec<DebugElement>,
}

impl DebugInfo
{
    pub fn new(line_start: u32, parameter_names: Vec<Option<String>>) -> DebugInfo
    {
        DebugInfo { line_start, parameter_names, elements: Vec::new() }
    }

    /// Line the state machine starts at; the first line number entry wins when there is one.
    pub fn line_start(&self) -> u32
    {
        self.elements
            .iter()
            .filter(|e| e.kind == DebugKind::LineNumber)
            .min_by_key(|e| e.address)
            .map_or(self.line_start, |e| e.line)
    }

    pub fn elements(&self) -> &[DebugElement]
    {
        &self.elements
    }

    pub(crate) fn elements_mut(&mut self) -> &mut Vec<DebugElement>
    {
        &mut self.elements
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        for name in self.parameter_names.iter().flatten()
        {
            pools.intern_string(name);
        }
        for e in &self.elements
        {
            match &e.kind
            {
                DebugKind::StartLocal { name, type_key, signature, .. } => {
                    if let Some(n) = name
                    {
                        pools.intern_string(n);
                    }
                    if let Some(t) = type_key
                    {
                        pools.intern_type(t);
                    }
                    if let Some(s) = signature
                    {
                        pools.intern_string(s);
                    }
                }
                DebugKind::SetFile { name: Some(n) } => {
                    pools.intern_string(n);
                }
                _ => {}
            }
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, pools: &DexPools) -> Result<DebugInfo, DexError>
    {
        let line_start = read_uleb128(bytes, ix)?;
        let parameters_size = read_uleb128(bytes, ix)?;
        if parameters_size as usize > bytes.len()
        {
            fail!("debug_info_item claims {} parameters", parameters_size);
        }
        let mut parameter_names = Vec::with_capacity(parameters_size as usize);
        for _ in 0..parameters_size
        {
            parameter_names.push(optional_string(read_uleb128p1(bytes, ix)?, pools)?);
        }

        let mut elements = Vec::new();
        let mut address: u32 = 0;
        let mut line: i64 = line_start as i64;
        loop
        {
            let opcode = read_u1(bytes, ix)?;
            let kind = match opcode
            {
                DBG_END_SEQUENCE => break,
                DBG_ADVANCE_PC => {
                    address = address.wrapping_add(read_uleb128(bytes, ix)?);
                    continue;
                }
                DBG_ADVANCE_LINE => {
                    line += read_sleb128(bytes, ix)? as i64;
                    continue;
                }
                DBG_START_LOCAL | DBG_START_LOCAL_EXTENDED => {
                    let register = read_uleb128(bytes, ix)?;
                    let name = optional_string(read_uleb128p1(bytes, ix)?, pools)?;
                    let type_key = match read_uleb128p1(bytes, ix)?
                    {
                        -1 => None,
                        t => Some(pools.types.at(t as u32)?.clone()),
                    };
                    let signature = if opcode == DBG_START_LOCAL_EXTENDED { optional_string(read_uleb128p1(bytes, ix)?, pools)? } else { None };
                    DebugKind::StartLocal { register, name, type_key, signature }
                }
                DBG_END_LOCAL => DebugKind::EndLocal { register: read_uleb128(bytes, ix)? },
                DBG_RESTART_LOCAL => DebugKind::RestartLocal { register: read_uleb128(bytes, ix)? },
                DBG_SET_PROLOGUE_END => DebugKind::PrologueEnd,
                DBG_SET_EPILOGUE_BEGIN => DebugKind::EpilogueBegin,
                DBG_SET_FILE => DebugKind::SetFile { name: optional_string(read_uleb128p1(bytes, ix)?, pools)? },
                special => {
                    let adjusted = (special - DBG_FIRST_SPECIAL) as i32;
                    line += (DBG_LINE_BASE + adjusted % DBG_LINE_RANGE) as i64;
                    address = address.wrapping_add((adjusted / DBG_LINE_RANGE) as u32);
                    DebugKind::LineNumber
                }
            };
            if line < 0 || line > u32::MAX as i64
            {
                fail!("Line number {} out of range in debug_info_item", line);
            }
            elements.push(DebugElement { address, line: line as u32, kind });
        }
        Ok(DebugInfo { line_start, parameter_names, elements })
    }

    /// Encodes the elements in address order.
    pub fn write(&self, buf: &mut Vec<u8>, pools: &DexPools) -> Result<(), DexError>
    {
        let line_start = self.line_start();
        write_uleb128(buf, line_start);
        write_uleb128(buf, self.parameter_names.len() as u32);
        for name in &self.parameter_names
        {
            write_uleb128p1(buf, optional_string_index(name, pools)?);
        }

        let mut ordered: Vec<&DebugElement> = self.elements.iter().collect();
        ordered.sort_by_key(|e| e.address);
        let mut address: u32 = 0;
        let mut line: i64 = line_start as i64;
        for e in ordered
        {
            let mut address_delta = e.address - address;
            address = e.address;
            match &e.kind
            {
                DebugKind::LineNumber => {
                    let mut line_delta = e.line as i64 - line;
                    line = e.line as i64;
                    if line_delta < DBG_LINE_BASE as i64 || line_delta >= (DBG_LINE_BASE + DBG_LINE_RANGE) as i64
                    {
                        write_u1(buf, DBG_ADVANCE_LINE);
                        write_sleb128(buf, line_delta as i32);
                        line_delta = 0;
                    }
                    let mut special = special_opcode(line_delta, address_delta);
                    if special > 0xff
                    {
                        write_u1(buf, DBG_ADVANCE_PC);
                        write_uleb128(buf, address_delta);
                        address_delta = 0;
                        special = special_opcode(line_delta, address_delta);
                    }
                    write_u1(buf, special as u8);
                    continue;
                }
                _ => {
                    if address_delta > 0
                    {
                        write_u1(buf, DBG_ADVANCE_PC);
                        write_uleb128(buf, address_delta);
                    }
                }
            }
            match &e.kind
            {
                DebugKind::StartLocal { register, name, type_key, signature } => {
                    write_u1(buf, if signature.is_some() { DBG_START_LOCAL_EXTENDED } else { DBG_START_LOCAL });
                    write_uleb128(buf, *register);
                    write_uleb128p1(buf, optional_string_index(name, pools)?);
                    let type_index = match type_key
                    {
                        Some(t) => pools.type_index(t)? as i32,
                        None => -1,
                    };
                    write_uleb128p1(buf, type_index);
                    if signature.is_some()
                    {
                        write_uleb128p1(buf, optional_string_index(signature, pools)?);
                    }
                }
                DebugKind::EndLocal { register } => {
                    write_u1(buf, DBG_END_LOCAL);
                    write_uleb128(buf, *register);
                }
                DebugKind::RestartLocal { register } => {
                    write_u1(buf, DBG_RESTART_LOCAL);
                    write_uleb128(buf, *register);
                }
                DebugKind::PrologueEnd => {
                    write_u1(buf, DBG_SET_PROLOGUE_END);
                }
                DebugKind::EpilogueBegin => {
                    write_u1(buf, DBG_SET_EPILOGUE_BEGIN);
                }
                DebugKind::SetFile { name } => {
                    write_u1(buf, DBG_SET_FILE);
                    write_uleb128p1(buf, optional_string_index(name, pools)?);
                }
                DebugKind::LineNumber => {}
            }
        }
        write_u1(buf, DBG_END_SEQUENCE);
        Ok(())
    }
}

fn special_opcode(line_delta: i64, address_delta: u32) -> u32
{
    (line_delta - DBG_LINE_BASE as i64) as u32 + address_delta.saturating_mul(DBG_LINE_RANGE as u32) + DBG_FIRST_SPECIAL as u32
}

fn optional_string(index: i32, pools: &DexPools) -> Result<Option<String>, DexError>
{
    if index < 0
    {
        return Ok(None);
    }
    Ok(Some(pools.strings.at(index as u32)?.clone()))
}

fn optional_string_index(s: &Option<String>, pools: &DexPools) -> Result<i32, DexError>
{
    match s
    {
        Some(s) => Ok(pools.string_index(s)? as i32),
        None => Ok(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> DexPools {
        let mut pools = DexPools::new();
        pools.intern_string("this");
        pools.intern_string("x");
        pools.intern_type(&TypeKey::new("I"));
        pools.refresh();
        pools
    }

    #[test]
    fn special_opcodes_move_line_and_address() {
        let pools = pools();
        // line_start 10, no parameters, special 0x0a + (4 + 1) + 2 * 15, end
        let bytes = [10, 0, 0x0a + 5 + 30, 0];
        let info = DebugInfo::read(&bytes, &mut 0, &pools).expect("read failed");
        assert_eq!(info.elements(), &[DebugElement { address: 2, line: 11, kind: DebugKind::LineNumber }]);
        let mut out = Vec::new();
        info.write(&mut out, &pools).expect("write failed");
        // line_start becomes the first line entry
        assert_eq!(out, vec![11, 0, 0x0a + 4 + 30, 0]);
    }

    #[test]
    fn large_deltas_use_advance_ops() {
        let pools = pools();
        let mut info = DebugInfo::new(1, vec![Some("x".to_string())]);
        info.elements_mut().push(DebugElement { address: 0, line: 1, kind: DebugKind::LineNumber });
        info.elements_mut().push(DebugElement { address: 100, line: 50, kind: DebugKind::LineNumber });
        let mut out = Vec::new();
        info.write(&mut out, &pools).expect("write failed");
        let read = DebugInfo::read(&out, &mut 0, &pools).expect("read failed");
        assert_eq!(read.elements(), info.elements());
        assert_eq!(read.parameter_names, info.parameter_names);
        assert!(out.contains(&DBG_ADVANCE_LINE));
        assert!(out.contains(&DBG_ADVANCE_PC));
    }

    #[test]
    fn locals_round_trip() {
        let pools = pools();
        let mut info = DebugInfo::new(3, vec![]);
        info.elements_mut().push(DebugElement {
            address: 1,
            line: 3,
            kind: DebugKind::StartLocal { register: 2, name: Some("x".to_string()), type_key: Some(TypeKey::new("I")), signature: None },
        });
        info.elements_mut().push(DebugElement { address: 4, line: 3, kind: DebugKind::EndLocal { register: 2 } });
        info.elements_mut().push(DebugElement { address: 0, line: 3, kind: DebugKind::PrologueEnd });
        let mut out = Vec::new();
        info.write(&mut out, &pools).expect("write failed");
        let read = DebugInfo::read(&out, &mut 0, &pools).expect("read failed");
        // written in address order
        assert_eq!(read.elements()[0].kind, DebugKind::PrologueEnd);
        assert_eq!(read.elements()[1], info.elements()[0]);
        assert_eq!(read.elements()[2], info.elements()[1]);
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let pools = pools();
        assert!(DebugInfo::read(&[1, 0, DBG_ADVANCE_PC], &mut 0, &pools).is_err());
    }
}
