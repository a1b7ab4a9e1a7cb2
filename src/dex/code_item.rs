//! code_item: registers, instructions, try ranges and debug info of one method.
//!
//! See https://source.android.com/docs/core/runtime/dex-format#code-item

use crate::dex::debug_info::{DebugElement, DebugInfo, DebugKind};
use crate::dex::error::DexError;
use crate::dex::instruction_list::InstructionList;
use crate::dex::instructions::{ExtraLine, Reference, RegisterAccess};
use crate::dex::item::Item;
use crate::dex::pool::DexPools;
use crate::dex::section::{DataReader, DataWriter};
use crate::dex::try_block::{read_tries, shift_try_lines, try_addresses, write_tries, CatchHandler, TryAddresses, TryItem};
use crate::dex::{read_u2, read_u4, write_u2, write_u4};
use crate::types::MethodKey;
use log::{debug, warn};

/// Register frame of a method. Parameters occupy the last `ins` registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistersTable
{
    pub registers: u16,
    pub ins: u16,
    pub outs: u16,
}

impl RegistersTable
{
    pub fn locals(&self) -> u16
    {
        self.registers.saturating_sub(self.ins)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeItem
{
    pub registers: RegistersTable,
    pub instructions: InstructionList,
    tries: Vec<TryItem>,
    debug_info: Option<Item<DebugInfo>>,
    /// Method this code was read for, when known.
    pub method: Option<MethodKey>,
}

impl CodeItem
{
    pub fn new(registers: RegistersTable, instructions: InstructionList) -> CodeItem
    {
        CodeItem { registers, instructions, ..CodeItem::default() }
    }

    pub fn tries(&self) -> &[TryItem]
    {
        &self.tries
    }

    pub fn try_addresses(&self) -> Vec<TryAddresses>
    {
        try_addresses(&self.tries, &self.instructions)
    }

    /// Adds a try range over instructions `start..end`. `catch_targets` are the instruction
    /// positions of the handlers, one per caught type.
    pub fn add_try(
        &mut self,
        start: usize,
        end: usize,
        handler: CatchHandler,
        catch_targets: &[usize],
        catch_all_target: Option<usize>,
    ) -> Result<usize, DexError>
    {
        let len = self.instructions.len();
        if start >= end || end > len
        {
            fail!(kind: Contract, "Bad try range {}..{} over {} instructions", start, end, len);
        }
        if catch_targets.len() != handler.catches.len() || handler.catch_all != catch_all_target.is_some()
        {
            fail!(kind: Contract, "Catch targets do not match the handler");
        }
        if catch_targets.iter().chain(catch_all_target.iter()).any(|i| *i >= len)
        {
            fail!(kind: Contract, "Catch target past the end of {} instructions", len);
        }
        let t = self.tries.len();
        let address = |list: &InstructionList, i: usize| if i == list.len() { list.size() } else { list.address_at(i).unwrap_or(0) };
        let (start_address, end_address) = (address(&self.instructions, start), address(&self.instructions, end));
        self.instructions.anchor(start_address, ExtraLine::TryStart(t), true)?;
        self.instructions.anchor(end_address, ExtraLine::TryEnd(t), true)?;
        for (index, target) in catch_targets.iter().enumerate()
        {
            let a = address(&self.instructions, *target);
            self.instructions.anchor(a, ExtraLine::Catch { try_index: t, index }, true)?;
        }
        if let Some(target) = catch_all_target
        {
            let a = address(&self.instructions, target);
            self.instructions.anchor(a, ExtraLine::CatchAll(t), true)?;
        }
        self.tries.push(TryItem { handler });
        Ok(t)
    }

    pub fn remove_try(&mut self, t: usize) -> Result<TryItem, DexError>
    {
        if t >= self.tries.len()
        {
            fail!(kind: Contract, "No try range #{}", t);
        }
        self.instructions.clear_lines(|l| match l
        {
            ExtraLine::TryStart(i) | ExtraLine::TryEnd(i) | ExtraLine::CatchAll(i) => *i == t,
            ExtraLine::Catch { try_index, .. } => *try_index == t,
            ExtraLine::Debug(_) => false,
        });
        shift_try_lines(&mut self.instructions, t);
        Ok(self.tries.remove(t))
    }

    pub fn debug_info(&self) -> Option<&DebugInfo>
    {
        self.debug_info.as_ref().map(Item::get)
    }

    pub fn debug_info_item(&self) -> Option<&Item<DebugInfo>>
    {
        self.debug_info.as_ref()
    }

    /// Replaces the debug info; its elements are anchored at their current addresses.
    pub fn set_debug_info(&mut self, info: Option<Item<DebugInfo>>)
    {
        self.instructions.clear_lines(|l| matches!(l, ExtraLine::Debug(_)));
        if let Some(info) = &info
        {
            self.anchor_debug(info.get());
        }
        self.debug_info = info;
    }

    fn anchor_debug(&mut self, info: &DebugInfo)
    {
        for (i, e) in info.elements().iter().enumerate()
        {
            // non-exact anchoring never fails
            let _ = self.instructions.anchor(e.address, ExtraLine::Debug(i), false);
        }
    }

    /// Adds a debug entry before the instruction at `index`, or after the last one when
    /// `index` equals the instruction count.
    pub fn add_debug_element(&mut self, index: usize, line: u32, kind: DebugKind) -> Result<(), DexError>
    {
        let address = if index == self.instructions.len()
        {
            self.instructions.size()
        }
        else
        {
            match self.instructions.address_at(index)
            {
                Some(a) => a,
                None => fail!(kind: Contract, "No instruction at position {}", index),
            }
        };
        let info = self.debug_info.get_or_insert_with(|| Item::unique(DebugInfo::new(line, Vec::new())));
        let elements = info.edit().elements_mut();
        elements.push(DebugElement { address, line, kind });
        let i = elements.len() - 1;
        self.instructions.anchor(address, ExtraLine::Debug(i), true)
    }

    /// Addresses of debug entries as anchored on the instructions.
    fn anchored_debug_addresses(&self) -> Vec<Option<u32>>
    {
        let count = self.debug_info().map_or(0, |d| d.elements().len());
        let mut found = vec![None; count];
        for (address, line) in self.instructions.anchored_lines()
        {
            if let ExtraLine::Debug(i) = line
            {
                if let Some(slot) = found.get_mut(i)
                {
                    *slot = Some(address);
                }
            }
        }
        found
    }

    /// Moves debug entries to where their instructions ended up after editing.
    pub fn refresh(&mut self)
    {
        let anchored = self.anchored_debug_addresses();
        let stale = match self.debug_info()
        {
            Some(info) => info.elements().iter().zip(anchored.iter()).any(|(e, a)| a.map_or(false, |a| a != e.address)),
            None => false,
        };
        if let (true, Some(info)) = (stale, self.debug_info.as_mut())
        {
            debug!("updating debug addresses");
            for (e, a) in info.edit().elements_mut().iter_mut().zip(anchored)
            {
                if let Some(a) = a
                {
                    e.address = a;
                }
            }
        }
    }

    pub fn can_add_local_registers(&self, amount: u16) -> bool
    {
        self.can_shift(self.registers.locals() as u32, amount)
    }

    /// Whether every register from `from` on still fits its operand when moved up by `amount`.
    fn can_shift(&self, from: u32, amount: u16) -> bool
    {
        let total = self.registers.registers as u32 + amount as u32;
        if total > u16::MAX as u32
        {
            return false;
        }
        if total < 0xf
        {
            return true;
        }
        self.instructions.iter().all(|ins| {
            let units = match ins.units()
            {
                Some(u) => u,
                None => return true,
            };
            ins.register_slots().iter().all(|slot| {
                let r = slot.get(units);
                if r >= from
                {
                    slot.fits(r + amount as u32)
                }
                else
                {
                    r + slot.count.saturating_sub(1) < from
                }
            })
        })
    }

    /// Grows the locals by `amount`, renumbering the parameter registers above them.
    pub fn add_local_registers(&mut self, amount: u16) -> Result<(), DexError>
    {
        self.add_local_registers_at(false, amount)
    }

    /// Grows the locals by `amount`. With `start` the new registers come first and every
    /// register is renumbered; otherwise they go after the existing locals.
    pub fn add_local_registers_at(&mut self, start: bool, amount: u16) -> Result<(), DexError>
    {
        if amount == 0
        {
            return Ok(());
        }
        let from = if start { 0 } else { self.registers.locals() as u32 };
        if !self.can_shift(from, amount)
        {
            fail!(kind: Validation, "Cannot add {} local registers to a frame of {}", amount, self.registers.registers);
        }
        for ins in self.instructions.items_mut()
        {
            let units = match ins.units()
            {
                Some(u) => u.to_vec(),
                None => continue,
            };
            for slot in ins.register_slots()
            {
                let r = slot.get(&units);
                if r >= from
                {
                    ins.set_register(&slot, r + amount as u32)?;
                }
            }
        }
        if let Some(info) = self.debug_info.as_mut()
        {
            let shifts = info.get().elements().iter().any(|e| e.kind.register().map_or(false, |r| r >= from));
            if shifts
            {
                for e in info.edit().elements_mut().iter_mut()
                {
                    if let Some(r) = e.kind.register_mut()
                    {
                        if *r >= from
                        {
                            *r += amount as u32;
                        }
                    }
                }
            }
        }
        self.registers.registers += amount;
        Ok(())
    }

    /// Makes sure at least `count` non-parameter registers exist.
    pub fn ensure_local_registers_count(&mut self, count: u16) -> Result<(), DexError>
    {
        let locals = self.registers.locals();
        if locals < count
        {
            self.add_local_registers(count - locals)?;
        }
        Ok(())
    }

    /// Whether `register` may be overwritten at instruction `start`: the next instruction
    /// touching it writes it, or nothing touches it and it is a local.
    pub fn is_free_register(&self, register: u32, start: usize) -> bool
    {
        match self.instructions.first_access(register, start)
        {
            Some(access) => access == RegisterAccess::Write,
            None => register < self.registers.locals() as u32,
        }
    }

    /// Locals free at instruction `start`, ascending.
    pub fn local_free_registers(&self, start: usize) -> Vec<u32>
    {
        (0..self.registers.locals() as u32).filter(|r| self.is_free_register(*r, start)).collect()
    }

    pub fn contains_key(&self, key: &Reference) -> bool
    {
        let caught = match key
        {
            Reference::Type(t) => self.tries.iter().any(|x| x.handler.catches.contains(t)),
            _ => false,
        };
        caught || self.instructions.contains_key(key)
    }

    /// Swaps `search` for `replace` in the instructions and, for types, in the catch clauses.
    /// Returns how many places changed.
    pub fn replace_keys(&mut self, search: &Reference, replace: &Reference) -> Result<usize, DexError>
    {
        let mut changed = self.instructions.replace_keys(search, replace)?;
        if let (Reference::Type(from), Reference::Type(to)) = (search, replace)
        {
            for t in self.tries.iter_mut()
            {
                for c in t.handler.catches.iter_mut().filter(|c| **c == *from)
                {
                    *c = to.clone();
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Drops the debug name of parameter `index`; later names move down one place.
    pub fn remove_debug_parameter(&mut self, index: usize)
    {
        let present = self.debug_info().map_or(false, |d| index < d.parameter_names.len());
        if let (true, Some(info)) = (present, self.debug_info.as_mut())
        {
            info.edit().parameter_names.remove(index);
        }
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        for ins in self.instructions.iter()
        {
            ins.collect_keys(pools);
        }
        for t in &self.tries
        {
            for c in &t.handler.catches
            {
                pools.intern_type(c);
            }
        }
        if let Some(info) = self.debug_info()
        {
            info.collect_keys(pools);
        }
        if let Some(m) = &self.method
        {
            pools.intern_method(m);
        }
    }

    pub fn read(reader: &mut DataReader, ix: &mut usize) -> Result<CodeItem, DexError>
    {
        let bytes = reader.bytes;
        let registers = RegistersTable {
            registers: read_u2(bytes, ix)?,
            ins: read_u2(bytes, ix)?,
            outs: read_u2(bytes, ix)?,
        };
        let tries_size = read_u2(bytes, ix)?;
        let debug_off = read_u4(bytes, ix)?;
        let insns_size = read_u4(bytes, ix)? as usize;
        if insns_size > bytes.len().saturating_sub(*ix) / 2
        {
            fail!("insns_size {} runs past the end of the file", insns_size);
        }
        let mut units = Vec::with_capacity(insns_size);
        for _ in 0..insns_size
        {
            units.push(read_u2(bytes, ix)?);
        }
        let mut instructions = InstructionList::read(&units, reader.pools)?;
        if tries_size > 0 && insns_size % 2 == 1
        {
            let padding = read_u2(bytes, ix)?;
            if padding != 0
            {
                if reader.options.strict_padding
                {
                    fail!("Non-zero padding 0x{:04x} before try_items", padding);
                }
                warn!("Non-zero padding 0x{:04x} before try_items", padding);
            }
        }
        let tries = read_tries(bytes, ix, tries_size as usize, &mut instructions, reader.pools)?;
        let mut code = CodeItem { registers, instructions, tries, debug_info: None, method: None };
        if debug_off != 0
        {
            let info = reader.debug_info(debug_off)?;
            code.set_debug_info(Some(Item::shared(info)));
        }
        Ok(code)
    }

    /// Writes the debug info, unless a shared copy is already out.
    pub fn place_debug_info(&self, w: &mut DataWriter, pools: &DexPools) -> Result<(), DexError>
    {
        if let Some(info) = self.debug_info_item()
        {
            w.place(info.get(), 1, |d, buf| d.write(buf, pools))?;
        }
        Ok(())
    }

    /// Writes the code item after its debug info; a shared item goes out once.
    pub fn place(&self, w: &mut DataWriter, pools: &DexPools) -> Result<u32, DexError>
    {
        if let Some(off) = w.placed_offset(self)
        {
            return Ok(off);
        }
        let debug_off = match self.debug_info_item()
        {
            Some(info) => w.require(info.get())?,
            None => 0,
        };
        w.place(self, 4, |c, buf| c.write(buf, debug_off, pools))
    }

    pub fn write(&self, buf: &mut Vec<u8>, debug_off: u32, pools: &DexPools) -> Result<(), DexError>
    {
        if self.registers.ins > self.registers.registers
        {
            fail!(kind: Validation, "{} parameter registers in a frame of {}", self.registers.ins, self.registers.registers);
        }
        if let Some(info) = self.debug_info()
        {
            let anchored = self.anchored_debug_addresses();
            if info.elements().iter().zip(anchored.iter()).any(|(e, a)| *a != Some(e.address))
            {
                fail!(kind: Validation, "Debug info is out of date with the instructions; refresh first");
            }
        }
        if self.tries.len() > u16::MAX as usize
        {
            fail!(kind: Validation, "{} try ranges", self.tries.len());
        }
        let units = self.instructions.write(pools)?;
        write_u2(buf, self.registers.registers);
        write_u2(buf, self.registers.ins);
        write_u2(buf, self.registers.outs);
        write_u2(buf, self.tries.len() as u16);
        write_u4(buf, debug_off);
        write_u4(buf, units.len() as u32);
        for u in &units
        {
            write_u2(buf, *u);
        }
        if !self.tries.is_empty()
        {
            if units.len() % 2 == 1
            {
                write_u2(buf, 0);
            }
            write_tries(&self.tries, &self.instructions, pools, buf)?;
        }
        Ok(())
    }
}
