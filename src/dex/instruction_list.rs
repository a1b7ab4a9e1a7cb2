//! The instruction stream of a code item.
//!
//! Instructions are addressed by position (for editing) and by [`Label`] (for jumps). Code
//! unit addresses are derived: the list lays itself out after every mutation, inserting the
//! alignment padding payloads need, so a jump never holds a stale offset.

use crate::dex::error::DexError;
use crate::dex::instructions::{
    branch_offset, patch_reference, resolve_reference, set_branch_offset, ExtraLine, Ins, InsKind, Label, Reference,
    RegisterAccess, ARRAY_DATA_IDENT, PACKED_SWITCH_IDENT, SPARSE_SWITCH_IDENT,
};
use crate::dex::opcodes::{opcode, Format};
use crate::dex::pool::DexPools;
use log::{debug, warn};
use rangemap::RangeMap;
use std::collections::HashMap;

const PACKED_SWITCH: u8 = 0x2b;
const SPARSE_SWITCH: u8 = 0x2c;

#[derive(Debug, Clone, Default)]
pub struct InstructionList
{
    items: Vec<Ins>,
    /// Lines anchored past the last instruction.
    tail: Vec<ExtraLine>,
    next_label: u32,
    ranges: RangeMap<u32, Label>,
    starts: HashMap<Label, u32>,
    positions: HashMap<Label, usize>,
    size: u32,
}

impl PartialEq for InstructionList
{
    fn eq(&self, other: &Self) -> bool
    {
        self.items == other.items && self.tail == other.tail
    }
}

impl InstructionList
{
    pub fn new() -> InstructionList
    {
        InstructionList::default()
    }

    pub fn len(&self) -> usize
    {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Ins>
    {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Ins>
    {
        self.items.iter()
    }

    /// Size of the laid out code in 16-bit units.
    pub fn size(&self) -> u32
    {
        self.size
    }

    pub fn index_of(&self, label: Label) -> Option<usize>
    {
        self.positions.get(&label).copied()
    }

    pub fn address_of(&self, label: Label) -> Option<u32>
    {
        self.starts.get(&label).copied()
    }

    pub fn address_at(&self, index: usize) -> Option<u32>
    {
        self.items.get(index).and_then(|ins| self.address_of(ins.label()))
    }

    /// The instruction covering `address`, not necessarily starting there.
    pub fn at_address(&self, address: u32) -> Option<&Ins>
    {
        self.ranges.get(&address).and_then(|l| self.index_of(*l)).map(|i| &self.items[i])
    }

    pub fn tail_lines(&self) -> &[ExtraLine]
    {
        &self.tail
    }

    /// Every extra line with the address of its anchor.
    pub fn anchored_lines(&self) -> Vec<(u32, ExtraLine)>
    {
        let mut lines = Vec::new();
        for ins in &self.items
        {
            let address = self.starts.get(&ins.label()).copied().unwrap_or(0);
            lines.extend(ins.extra_lines.iter().map(|l| (address, *l)));
        }
        lines.extend(self.tail.iter().map(|l| (self.size, *l)));
        lines
    }

    /// Appends an instruction, taking over the lines of the tail.
    pub fn add(&mut self, ins: Ins) -> Label
    {
        let index = self.items.len();
        self.place(index, ins)
    }

    /// Inserts before `index`. The new instruction takes the extra lines and the incoming jumps
    /// of the one it displaces.
    pub fn insert(&mut self, index: usize, ins: Ins) -> Result<Label, DexError>
    {
        if index > self.items.len()
        {
            fail!(kind: Contract, "Insert position {} past the end of {} instructions", index, self.items.len());
        }
        Ok(self.place(index, ins))
    }

    fn place(&mut self, index: usize, mut ins: Ins) -> Label
    {
        let label = self.fresh_label();
        ins.set_label(label);
        ins.extra_lines.clear();
        match self.items.get_mut(index)
        {
            Some(old) => {
                ins.extra_lines = std::mem::take(&mut old.extra_lines);
                let old_label = old.label();
                self.retarget(old_label, label);
            }
            None => ins.extra_lines = std::mem::take(&mut self.tail),
        }
        self.items.insert(index, ins);
        self.relayout();
        label
    }

    /// Removes the instruction at `index`; its lines and incoming jumps move to its successor.
    ///
    /// The only instruction of a try range is replaced by a `nop` instead of vanishing, unless
    /// `force` is set.
    pub fn remove(&mut self, index: usize, force: bool) -> Result<Ins, DexError>
    {
        if index >= self.items.len()
        {
            fail!(kind: Contract, "No instruction at position {}", index);
        }
        if !force && self.is_lonely_in_try_catch(index)
        {
            debug!("keeping a nop for the only instruction of a try range at {}", index);
            return self.replace(index, Ins::nop());
        }
        let label = self.items[index].label();
        let successor = self.items.get(index + 1).map(Ins::label);
        match successor
        {
            Some(next) => {
                self.retarget(label, next);
            }
            None => {
                if self.is_target(label)
                {
                    fail!(kind: Contract, "Cannot remove the last instruction while it is a jump target");
                }
            }
        }
        let mut removed = self.items.remove(index);
        let lines = std::mem::take(&mut removed.extra_lines);
        self.prepend_lines(index, lines);
        self.relayout();
        Ok(removed)
    }

    /// Moves an instruction to `to`, an index in the list without it. Its lines and incoming
    /// jumps stay behind with its successor.
    ///
    /// The only instruction of a try range leaves a `nop` behind, which keeps its label and
    /// lines, so the range never ends up empty.
    pub fn move_to(&mut self, from: usize, to: usize) -> Result<(), DexError>
    {
        if from >= self.items.len() || to >= self.items.len()
        {
            fail!(kind: Contract, "Cannot move instruction {} to {} in {} instructions", from, to, self.items.len());
        }
        if from == to
        {
            return Ok(());
        }
        if self.is_lonely_in_try_catch(from)
        {
            debug!("keeping a nop for the only instruction of a try range at {}", from);
            let mut ins = self.replace(from, Ins::nop())?;
            ins.set_label(self.fresh_label());
            let at = if to > from { to + 1 } else { to };
            self.items.insert(at, ins);
            self.relayout();
            return Ok(());
        }
        let label = self.items[from].label();
        match self.items.get(from + 1).map(Ins::label)
        {
            Some(next) => {
                self.retarget(label, next);
            }
            None => {
                if self.is_target(label)
                {
                    fail!(kind: Contract, "Cannot move the last instruction while it is a jump target");
                }
            }
        }
        let mut ins = self.items.remove(from);
        let lines = std::mem::take(&mut ins.extra_lines);
        self.prepend_lines(from, lines);
        self.items.insert(to, ins);
        self.relayout();
        Ok(())
    }

    /// Swaps in a new instruction under the same label and lines.
    pub fn replace(&mut self, index: usize, mut ins: Ins) -> Result<Ins, DexError>
    {
        let old = match self.items.get_mut(index)
        {
            Some(old) => old,
            None => fail!(kind: Contract, "No instruction at position {}", index),
        };
        ins.set_label(old.label());
        ins.extra_lines = std::mem::take(&mut old.extra_lines);
        let old = std::mem::replace(old, ins);
        self.relayout();
        Ok(old)
    }

    /// Whether the instruction alone makes up a try range.
    pub fn is_lonely_in_try_catch(&self, index: usize) -> bool
    {
        let ins = match self.items.get(index)
        {
            Some(ins) => ins,
            None => return false,
        };
        let next_lines = match self.items.get(index + 1)
        {
            Some(next) => &next.extra_lines,
            None => &self.tail,
        };
        ins.extra_lines.iter().any(|l| match l
        {
            ExtraLine::TryStart(t) => next_lines.contains(&ExtraLine::TryEnd(*t)),
            _ => false,
        })
    }

    /// Inserts the shortest `const` loading `value` into `register` before `index`.
    pub fn create_const_integer_at(&mut self, index: usize, register: u32, value: i32) -> Result<Label, DexError>
    {
        let ins = Ins::const_integer(register, value)?;
        self.insert(index, ins)
    }

    /// Inserts a `const-string` before `index`; the jumbo form is picked when the string
    /// sits, or would land, past the 16 bit index range of `pools`.
    pub fn create_string_at(&mut self, index: usize, register: u32, value: &str, pools: &DexPools) -> Result<Label, DexError>
    {
        let position = match pools.strings.index_of(&value.to_string())
        {
            Some(i) => i as usize,
            None => pools.strings.len(),
        };
        let ins = Ins::const_string(register, value, position > u16::MAX as usize)?;
        self.insert(index, ins)
    }

    /// Swaps `search` for `replace` in every reference; returns how many instructions changed.
    pub fn replace_keys(&mut self, search: &Reference, replace: &Reference) -> Result<usize, DexError>
    {
        let mut changed = 0;
        for ins in self.items.iter_mut()
        {
            if ins.replace_keys(search, replace)?
            {
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub fn contains_key(&self, key: &Reference) -> bool
    {
        self.items.iter().any(|i| i.reference().map_or(false, |r| r.contains_key(key)))
    }

    /// How the first instruction from `start` on that touches `register` uses it.
    pub fn first_access(&self, register: u32, start: usize) -> Option<RegisterAccess>
    {
        self.items.iter().skip(start).find_map(|i| i.register_access(register))
    }

    /// Whether any instruction jumps to `label`.
    pub fn is_target(&self, label: Label) -> bool
    {
        self.items.iter().any(|i| i.targets().contains(&label))
    }

    /// Attaches a line at `address`. Off-start addresses are a decoding error when `exact`,
    /// otherwise they snap to the covering instruction or the tail.
    pub(crate) fn anchor(&mut self, address: u32, line: ExtraLine, exact: bool) -> Result<(), DexError>
    {
        if address == self.size
        {
            self.tail.push(line);
            return Ok(());
        }
        let label = match self.ranges.get(&address)
        {
            Some(l) => *l,
            None if exact => fail!("Address 0x{:x} is past the end of the code", address),
            None => {
                warn!("Address 0x{:x} is past the end of the code; anchoring at the end", address);
                self.tail.push(line);
                return Ok(());
            }
        };
        if exact && self.starts.get(&label) != Some(&address)
        {
            fail!("Address 0x{:x} is inside an instruction", address);
        }
        if let Some(index) = self.index_of(label)
        {
            self.items[index].extra_lines.push(line);
        }
        Ok(())
    }

    /// Drops every extra line matching `filter`.
    pub(crate) fn clear_lines<F: Fn(&ExtraLine) -> bool>(&mut self, filter: F)
    {
        for ins in self.items.iter_mut()
        {
            ins.extra_lines.retain(|l| !filter(l));
        }
        self.tail.retain(|l| !filter(l));
    }

    pub(crate) fn items_mut(&mut self) -> std::slice::IterMut<'_, Ins>
    {
        self.items.iter_mut()
    }

    fn prepend_lines(&mut self, index: usize, mut lines: Vec<ExtraLine>)
    {
        let target = match self.items.get_mut(index)
        {
            Some(next) => &mut next.extra_lines,
            None => &mut self.tail,
        };
        lines.append(target);
        *target = lines;
    }

    fn retarget(&mut self, old: Label, new: Label) -> bool
    {
        let mut changed = false;
        for ins in self.items.iter_mut()
        {
            changed |= ins.retarget(old, new);
        }
        changed
    }

    fn fresh_label(&mut self) -> Label
    {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn relayout(&mut self)
    {
        self.ranges = RangeMap::new();
        self.starts.clear();
        self.positions.clear();
        let mut address = 0u32;
        for (i, ins) in self.items.iter().enumerate()
        {
            if ins.is_payload() && address % 2 == 1
            {
                address += 1;
            }
            let size = ins.size();
            if size > 0
            {
                self.ranges.insert(address..address + size, ins.label());
            }
            self.starts.insert(ins.label(), address);
            self.positions.insert(ins.label(), i);
            address += size;
        }
        self.size = address;
    }

    /// Decodes `units`, turning pool indices into keys and offsets into labels.
    pub fn read(units: &[u16], pools: &DexPools) -> Result<InstructionList, DexError>
    {
        let raw = scan(units)?;
        let mut list = InstructionList::new();
        let mut by_address = HashMap::new();
        for (address, _) in raw.iter()
        {
            let label = list.fresh_label();
            by_address.insert(*address, label);
        }
        let lookup = |address: i64| -> Result<Label, DexError> {
            match u32::try_from(address).ok().and_then(|a| by_address.get(&a))
            {
                Some(l) => Ok(*l),
                None => fail!("Jump target 0x{:x} is not an instruction", address),
            }
        };

        // payload address -> address of the switch using it
        let mut switch_bases = HashMap::new();
        for (address, slice) in raw.iter()
        {
            let op = slice[0] as u8;
            if (op == PACKED_SWITCH || op == SPARSE_SWITCH) && slice.len() == 3
            {
                if let Some(offset) = branch_offset(Format::Format31t, slice)
                {
                    switch_bases.insert((*address as i64 + offset as i64) as u32, *address);
                }
            }
        }

        for (address, slice) in raw.iter()
        {
            let base = *address as i64;
            let kind = match slice[0]
            {
                PACKED_SWITCH_IDENT => {
                    let switch = switch_base(&switch_bases, *address)?;
                    let count = slice[1] as usize;
                    let first_key = read_i32(slice, 2);
                    let mut targets = Vec::with_capacity(count);
                    for i in 0..count
                    {
                        targets.push(lookup(switch + read_i32(slice, 4 + 2 * i) as i64)?);
                    }
                    InsKind::PackedSwitch { first_key, targets }
                }
                SPARSE_SWITCH_IDENT => {
                    let switch = switch_base(&switch_bases, *address)?;
                    let count = slice[1] as usize;
                    let mut entries = Vec::with_capacity(count);
                    for i in 0..count
                    {
                        let key = read_i32(slice, 2 + 2 * i);
                        let target = lookup(switch + read_i32(slice, 2 + 2 * count + 2 * i) as i64)?;
                        entries.push((key, target));
                    }
                    InsKind::SparseSwitch { entries }
                }
                ARRAY_DATA_IDENT => {
                    let element_width = slice[1];
                    let count = (slice[2] as usize) | ((slice[3] as usize) << 16);
                    let mut data: Vec<u8> = slice[4..].iter().flat_map(|u| u.to_le_bytes()).collect();
                    data.truncate(count * element_width as usize);
                    InsKind::ArrayData { element_width, data }
                }
                first => {
                    let op = match opcode(first as u8)
                    {
                        Some(op) => op,
                        None => fail!("Unknown opcode 0x{:02x} at 0x{:x}", first & 0xff, address),
                    };
                    let reference = resolve_reference(op, slice, pools).map_err(|e| err!(e, "{} at 0x{:x}", op.name, address))?;
                    let target = match branch_offset(op.format, slice)
                    {
                        Some(offset) => Some(lookup(base + offset as i64).map_err(|e| err!(e, "{} at 0x{:x}", op.name, address))?),
                        None => None,
                    };
                    InsKind::Op { units: slice.to_vec(), reference, target }
                }
            };
            let mut ins = match kind
            {
                InsKind::Op { units, reference, target } => match (reference, target)
                {
                    (Some(r), _) => Ins::with_reference(units, r)?,
                    (None, Some(t)) => Ins::with_target(units, t)?,
                    (None, None) => Ins::new(units)?,
                },
                InsKind::PackedSwitch { first_key, targets } => Ins::packed_switch(first_key, targets),
                InsKind::SparseSwitch { entries } => Ins::sparse_switch(entries),
                InsKind::ArrayData { element_width, data } => Ins::array_data(element_width, data),
            };
            ins.set_label(by_address[address]);
            list.items.push(ins);
        }
        list.relayout();
        if list.size as usize != units.len()
        {
            debug!("code re-lays out to {} units from {}", list.size, units.len());
        }
        Ok(list)
    }

    /// Encodes the list with the current pool indices.
    pub fn write(&self, pools: &DexPools) -> Result<Vec<u16>, DexError>
    {
        let mut payload_bases: HashMap<Label, u32> = HashMap::new();
        for ins in &self.items
        {
            if let InsKind::Op { target: Some(t), units, .. } = &ins.kind
            {
                let op = units[0] as u8;
                if op == PACKED_SWITCH || op == SPARSE_SWITCH
                {
                    let address = self.starts[&ins.label()];
                    if let Some(previous) = payload_bases.insert(*t, address)
                    {
                        if previous != address
                        {
                            fail!(kind: Validation, "Switch payload {} is used by more than one switch", t);
                        }
                    }
                }
            }
        }
        let target_address = |label: Label| -> Result<i64, DexError> {
            match self.starts.get(&label)
            {
                Some(a) => Ok(*a as i64),
                None => fail!(kind: Validation, "Jump to {} which is not in the list", label),
            }
        };

        let mut out: Vec<u16> = Vec::with_capacity(self.size as usize);
        for ins in &self.items
        {
            let address = self.starts[&ins.label()];
            while (out.len() as u32) < address
            {
                out.push(0);
            }
            match &ins.kind
            {
                InsKind::Op { units, reference, target } => {
                    let mut units = units.clone();
                    let format = ins.format();
                    if let Some(r) = reference
                    {
                        patch_reference(format, &mut units, r, pools).map_err(|e| err!(e, "{} at 0x{:x}", ins.name(), address))?;
                    }
                    if let Some(t) = target
                    {
                        let offset = target_address(*t)? - address as i64;
                        set_branch_offset(format, &mut units, offset as i32).map_err(|e| err!(e, "{} at 0x{:x}", ins.name(), address))?;
                    }
                    out.extend_from_slice(&units);
                }
                InsKind::PackedSwitch { first_key, targets } => {
                    let base = payload_base(&payload_bases, ins.label())?;
                    out.push(PACKED_SWITCH_IDENT);
                    out.push(narrow_count(targets.len())?);
                    push_i32(&mut out, *first_key);
                    for t in targets
                    {
                        push_i32(&mut out, (target_address(*t)? - base) as i32);
                    }
                }
                InsKind::SparseSwitch { entries } => {
                    let base = payload_base(&payload_bases, ins.label())?;
                    out.push(SPARSE_SWITCH_IDENT);
                    out.push(narrow_count(entries.len())?);
                    for (key, _) in entries
                    {
                        push_i32(&mut out, *key);
                    }
                    for (_, t) in entries
                    {
                        push_i32(&mut out, (target_address(*t)? - base) as i32);
                    }
                }
                InsKind::ArrayData { element_width, data } => {
                    if *element_width == 0 || data.len() % *element_width as usize != 0
                    {
                        fail!(kind: Validation, "Array payload of {} bytes does not hold {}-byte elements", data.len(), element_width);
                    }
                    let count = (data.len() / *element_width as usize) as u32;
                    out.push(ARRAY_DATA_IDENT);
                    out.push(*element_width);
                    out.push(count as u16);
                    out.push((count >> 16) as u16);
                    for pair in data.chunks(2)
                    {
                        let hi = pair.get(1).copied().unwrap_or(0);
                        out.push(u16::from_le_bytes([pair[0], hi]));
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Splits the stream into instructions, dropping the nops that only pad payloads.
fn scan(units: &[u16]) -> Result<Vec<(u32, &[u16])>, DexError>
{
    let mut raw: Vec<(u32, &[u16])> = Vec::new();
    let mut address = 0usize;
    while address < units.len()
    {
        let unit = units[address];
        let size = match unit
        {
            PACKED_SWITCH_IDENT => 4 + 2 * unit_at(units, address + 1)? as usize,
            SPARSE_SWITCH_IDENT => 2 + 4 * unit_at(units, address + 1)? as usize,
            ARRAY_DATA_IDENT => {
                let width = unit_at(units, address + 1)? as usize;
                let count = (unit_at(units, address + 2)? as usize) | ((unit_at(units, address + 3)? as usize) << 16);
                4 + (count * width + 1) / 2
            }
            _ => match opcode(unit as u8)
            {
                Some(op) => op.format.size() as usize,
                None => fail!("Unknown opcode 0x{:02x} at 0x{:x}", unit & 0xff, address),
            },
        };
        if address + size > units.len()
        {
            fail!("Instruction at 0x{:x} runs past the end of the code", address);
        }
        let is_payload = matches!(unit, PACKED_SWITCH_IDENT | SPARSE_SWITCH_IDENT | ARRAY_DATA_IDENT);
        if is_payload
        {
            if address % 2 == 1
            {
                fail!("Payload at odd address 0x{:x}", address);
            }
            if let Some((prev, slice)) = raw.last()
            {
                if *prev as usize + 1 == address && *prev % 2 == 1 && slice[0] == 0
                {
                    raw.pop();
                }
            }
        }
        raw.push((address as u32, &units[address..address + size]));
        address += size;
    }
    Ok(raw)
}

fn unit_at(units: &[u16], index: usize) -> Result<u16, DexError>
{
    match units.get(index)
    {
        Some(u) => Ok(*u),
        None => fail!("Payload header at 0x{:x} is truncated", index),
    }
}

fn switch_base(bases: &HashMap<u32, u32>, payload: u32) -> Result<i64, DexError>
{
    match bases.get(&payload)
    {
        Some(a) => Ok(*a as i64),
        None => fail!("Switch payload at 0x{:x} has no switch", payload),
    }
}

fn payload_base(bases: &HashMap<Label, u32>, payload: Label) -> Result<i64, DexError>
{
    match bases.get(&payload)
    {
        Some(a) => Ok(*a as i64),
        None => fail!(kind: Validation, "Switch payload {} has no switch", payload),
    }
}

fn read_i32(units: &[u16], at: usize) -> i32
{
    ((units[at] as u32) | ((units[at + 1] as u32) << 16)) as i32
}

fn push_i32(out: &mut Vec<u16>, value: i32)
{
    out.push(value as u32 as u16);
    out.push(((value as u32) >> 16) as u16);
}

fn narrow_count(count: usize) -> Result<u16, DexError>
{
    match u16::try_from(count)
    {
        Ok(c) => Ok(c),
        Err(_) => fail!(kind: Validation, "Switch payload with {} entries", count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::ErrorKind;

    // const/4 v0, 0 ; if-eqz v0, +3 ; const/4 v0, 1 ; return v0
    const BRANCHY: [u16; 5] = [0x0012, 0x0038, 0x0003, 0x1012, 0x000f];

    #[test]
    fn read_resolves_branch_targets() {
        let pools = DexPools::new();
        let list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        assert_eq!(list.len(), 4);
        let ret = list.get(3).unwrap().label();
        assert_eq!(list.get(1).unwrap().targets(), vec![ret]);
        assert_eq!(list.address_of(ret), Some(4));
        assert_eq!(list.write(&pools).expect("write failed"), BRANCHY.to_vec());
    }

    #[test]
    fn insert_takes_over_jumps_and_lines() {
        let pools = DexPools::new();
        let mut list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        list.anchor(4, ExtraLine::Debug(0), true).unwrap();
        let nop = list.insert(3, Ins::nop()).unwrap();
        assert_eq!(list.get(1).unwrap().targets(), vec![nop]);
        assert_eq!(list.get(3).unwrap().extra_lines(), &[ExtraLine::Debug(0)]);
        assert!(list.get(4).unwrap().extra_lines().is_empty());
        // the branch lands on the nop
        let units = list.write(&pools).unwrap();
        assert_eq!(units[2], 3);
        assert_eq!(units.len(), 6);
    }

    #[test]
    fn remove_hands_lines_to_successor() {
        let pools = DexPools::new();
        let mut list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        list.anchor(3, ExtraLine::Debug(1), true).unwrap();
        list.remove(2, false).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(2).unwrap().extra_lines(), &[ExtraLine::Debug(1)]);
        assert_eq!(list.write(&pools).unwrap(), vec![0x0012, 0x0038, 0x0002, 0x000f]);
    }

    #[test]
    fn remove_last_target_fails() {
        let pools = DexPools::new();
        let mut list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        let e = list.remove(3, false).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Contract);
    }

    #[test]
    fn lonely_try_member_becomes_nop() {
        let pools = DexPools::new();
        let mut list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        list.anchor(3, ExtraLine::TryStart(0), true).unwrap();
        list.anchor(4, ExtraLine::TryEnd(0), true).unwrap();
        assert!(list.is_lonely_in_try_catch(2));
        let removed = list.remove(2, false).unwrap();
        assert_eq!(removed.name(), "const/4");
        assert_eq!(list.len(), 4);
        assert_eq!(list.get(2).unwrap().name(), "nop");
        assert_eq!(list.get(2).unwrap().extra_lines(), &[ExtraLine::TryStart(0)]);

        list.remove(2, true).unwrap();
        assert_eq!(list.get(2).unwrap().extra_lines(), &[ExtraLine::TryStart(0), ExtraLine::TryEnd(0)]);
    }

    #[test]
    fn move_leaves_lines_behind() {
        let pools = DexPools::new();
        let mut list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        list.anchor(0, ExtraLine::Debug(0), true).unwrap();
        let first = list.get(0).unwrap().label();
        list.move_to(0, 2).unwrap();
        assert_eq!(list.index_of(first), Some(2));
        assert!(list.get(2).unwrap().extra_lines().is_empty());
        assert_eq!(list.get(0).unwrap().extra_lines(), &[ExtraLine::Debug(0)]);
    }

    #[test]
    fn moving_a_lonely_try_member_leaves_a_nop() {
        let pools = DexPools::new();
        let mut list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        list.anchor(3, ExtraLine::TryStart(0), true).unwrap();
        list.anchor(4, ExtraLine::TryEnd(0), true).unwrap();
        let guarded = list.get(2).unwrap().label();

        list.move_to(2, 0).unwrap();
        assert_eq!(list.len(), 5);
        assert_eq!(list.get(0).unwrap().name(), "const/4");
        assert!(list.get(0).unwrap().extra_lines().is_empty());
        assert_eq!(list.get(3).unwrap().name(), "nop");
        assert_eq!(list.get(3).unwrap().label(), guarded);
        assert_eq!(list.get(3).unwrap().extra_lines(), &[ExtraLine::TryStart(0)]);
        assert_eq!(list.get(4).unwrap().extra_lines(), &[ExtraLine::TryEnd(0)]);
        assert_ne!(list.get(0).unwrap().label(), guarded);

        // moving forward skips past the nop
        let mut list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        list.anchor(0, ExtraLine::TryStart(0), true).unwrap();
        list.anchor(1, ExtraLine::TryEnd(0), true).unwrap();
        list.move_to(0, 2).unwrap();
        let names: Vec<&str> = list.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["nop", "if-eqz", "const/4", "const/4", "return"]);
    }

    #[test]
    fn const_helpers_insert_before_index() {
        let mut pools = DexPools::new();
        pools.intern_string("a");
        pools.refresh();
        let mut list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        list.create_const_integer_at(0, 1, 300).unwrap();
        list.create_string_at(5, 2, "a", &pools).unwrap();
        let names: Vec<&str> = list.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["const/16", "const/4", "if-eqz", "const/4", "return", "const-string"]);
        // the branch still lands on the return
        let ret = list.get(4).unwrap().label();
        assert_eq!(list.get(2).unwrap().targets(), vec![ret]);
        assert!(list.create_const_integer_at(9, 0, 0).is_err());
    }

    #[test]
    fn first_access_scans_from_start() {
        let pools = DexPools::new();
        let list = InstructionList::read(&BRANCHY, &pools).expect("read failed");
        assert_eq!(list.first_access(0, 0), Some(RegisterAccess::Write));
        assert_eq!(list.first_access(0, 1), Some(RegisterAccess::Read));
        assert_eq!(list.first_access(0, 2), Some(RegisterAccess::Write));
        assert_eq!(list.first_access(1, 0), None);
    }

    #[test]
    fn replace_keys_counts_changed_instructions() {
        let mut pools = DexPools::new();
        pools.intern_type(&crate::types::TypeKey::new("La;"));
        pools.refresh();
        // new-instance v0, La; ; return-void
        let mut list = InstructionList::read(&[0x0022, 0x0000, 0x000e], &pools).expect("read failed");
        let from = Reference::Type(crate::types::TypeKey::new("La;"));
        let to = Reference::Type(crate::types::TypeKey::new("Lb;"));
        assert!(list.contains_key(&from));
        assert_eq!(list.replace_keys(&from, &to).unwrap(), 1);
        assert!(!list.contains_key(&from));
        assert!(list.contains_key(&to));
    }

    #[test]
    fn switch_payload_is_aligned() {
        let pools = DexPools::new();
        // packed-switch v0, +4 ; return-void ; payload{first 1, targets [+3]}
        let units = [0x002b, 0x0004, 0x0000, 0x000e, 0x0100, 0x0001, 0x0001, 0x0000, 0x0003, 0x0000];
        let mut list = InstructionList::read(&units, &pools).expect("read failed");
        assert_eq!(list.len(), 3);
        assert_eq!(list.write(&pools).unwrap(), units.to_vec());

        // one more unit pushes the payload to an odd address, so it gets a padding unit
        list.insert(1, Ins::nop()).unwrap();
        let written = list.write(&pools).unwrap();
        assert_eq!(written.len(), 12);
        assert_eq!(written[1], 6);
        assert_eq!(written[5], 0x0000);
        assert_eq!(written[6], PACKED_SWITCH_IDENT);
        assert_eq!(written[10], 4);
        assert_eq!(list.at_address(4).map(|i| i.name()), Some("return-void"));

        // read back, the padding nop disappears again
        let again = InstructionList::read(&written, &pools).expect("read failed");
        assert_eq!(again.len(), 4);
    }

    #[test]
    fn unknown_opcode_is_corrupt() {
        let pools = DexPools::new();
        let e = InstructionList::read(&[0x003e], &pools).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Corrupt);
    }
}
