//! Hidden API restriction flags.
//!
//! See https://source.android.com/docs/core/runtime/dex-format#hiddenapi-class-data-item
//!
//! The `hiddenapi_class_data_item` holds one ULEB128 flag per field and method of every class,
//! in class data order. The flag lists here are matched to their definition arrays by raw array
//! position; every definition holds a handle to its own flag cell, so re-linking after an edit
//! rebuilds a list from the handles its array still owns.

use crate::dex::class_data::ClassData;
use crate::dex::class_def::ClassDef;
use crate::dex::def::Def;
use crate::dex::def_array::DefArray;
use crate::dex::error::DexError;
use crate::dex::section::DataWriter;
use crate::dex::{patch_u4, read_u4, read_uleb128, write_u4, write_uleb128};
use bitflags::bitflags;
use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Mask of the restriction part of a flag; a masked value of 0x7 means no restriction.
pub const NO_RESTRICTION: u32 = 0x7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HiddenApiRestriction
{
    Whitelist = 0,
    Greylist = 1,
    Blacklist = 2,
    GreylistMaxO = 3,
    GreylistMaxP = 4,
    GreylistMaxQ = 5,
    GreylistMaxR = 6,
}

const RESTRICTIONS: [HiddenApiRestriction; 7] = [
    HiddenApiRestriction::Whitelist,
    HiddenApiRestriction::Greylist,
    HiddenApiRestriction::Blacklist,
    HiddenApiRestriction::GreylistMaxO,
    HiddenApiRestriction::GreylistMaxP,
    HiddenApiRestriction::GreylistMaxQ,
    HiddenApiRestriction::GreylistMaxR,
];

impl HiddenApiRestriction
{
    pub fn from_value(value: u32) -> Option<HiddenApiRestriction>
    {
        RESTRICTIONS.get((value & NO_RESTRICTION) as usize).copied()
    }

    pub fn value(&self) -> u32
    {
        *self as u32
    }

    pub fn name(&self) -> &'static str
    {
        match self
        {
            HiddenApiRestriction::Whitelist => "whitelist",
            HiddenApiRestriction::Greylist => "greylist",
            HiddenApiRestriction::Blacklist => "blacklist",
            HiddenApiRestriction::GreylistMaxO => "greylist-max-o",
            HiddenApiRestriction::GreylistMaxP => "greylist-max-p",
            HiddenApiRestriction::GreylistMaxQ => "greylist-max-q",
            HiddenApiRestriction::GreylistMaxR => "greylist-max-r",
        }
    }
}

bitflags! {
    /// Domain bits sitting above the restriction value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HiddenApiDomain: u32 {
        const CORE_PLATFORM_API = 0x8;
        const TEST_API = 0x10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HiddenApiFlag
{
    Restriction(HiddenApiRestriction),
    Domain(HiddenApiDomain),
}

static NAME_MAP: Lazy<HashMap<&'static str, HiddenApiFlag>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for r in RESTRICTIONS
    {
        map.insert(r.name(), HiddenApiFlag::Restriction(r));
    }
    map.insert("core-platform-api", HiddenApiFlag::Domain(HiddenApiDomain::CORE_PLATFORM_API));
    map.insert("test-api", HiddenApiFlag::Domain(HiddenApiDomain::TEST_API));
    map
});

impl HiddenApiFlag
{
    pub fn value_of(name: &str) -> Option<HiddenApiFlag>
    {
        NAME_MAP.get(name).copied()
    }

    pub fn value(&self) -> u32
    {
        match self
        {
            HiddenApiFlag::Restriction(r) => r.value(),
            HiddenApiFlag::Domain(d) => d.bits(),
        }
    }

    pub fn name(&self) -> &'static str
    {
        match self
        {
            HiddenApiFlag::Restriction(r) => r.name(),
            HiddenApiFlag::Domain(d) if *d == HiddenApiDomain::TEST_API => "test-api",
            HiddenApiFlag::Domain(_) => "core-platform-api",
        }
    }

    pub fn is_domain_flag(&self) -> bool
    {
        matches!(self, HiddenApiFlag::Domain(_))
    }

    pub fn is_set(&self, value: u32) -> bool
    {
        match self
        {
            HiddenApiFlag::Restriction(r) => value & NO_RESTRICTION == r.value(),
            HiddenApiFlag::Domain(d) => value & d.bits() == d.bits(),
        }
    }

    /// Splits a raw value into its restriction and domain flags; None when unrestricted.
    pub fn values_of(value: u32) -> Option<Vec<HiddenApiFlag>>
    {
        let restriction = HiddenApiRestriction::from_value(value)?;
        let mut flags = vec![HiddenApiFlag::Restriction(restriction)];
        let domain = HiddenApiDomain::from_bits_truncate(value & !NO_RESTRICTION);
        flags.extend(domain.iter().map(HiddenApiFlag::Domain));
        Some(flags)
    }
}

impl fmt::Display for HiddenApiFlag
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}", self.name())
    }
}

/// The flag of one definition. Clones get a cell of their own; [`HiddenApiFlagValue::share`]
/// hands out another handle on the same cell.
#[derive(Debug)]
pub struct HiddenApiFlagValue(Rc<Cell<u32>>);

impl Clone for HiddenApiFlagValue
{
    fn clone(&self) -> Self
    {
        HiddenApiFlagValue::new(self.get())
    }
}

impl HiddenApiFlagValue
{
    pub fn new(value: u32) -> HiddenApiFlagValue
    {
        HiddenApiFlagValue(Rc::new(Cell::new(value)))
    }

    pub fn share(&self) -> HiddenApiFlagValue
    {
        HiddenApiFlagValue(Rc::clone(&self.0))
    }

    pub fn get(&self) -> u32
    {
        self.0.get()
    }

    pub fn set(&self, value: u32)
    {
        self.0.set(value)
    }

    pub fn same_cell(&self, other: &HiddenApiFlagValue) -> bool
    {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn flags(&self) -> Option<Vec<HiddenApiFlag>>
    {
        HiddenApiFlag::values_of(self.get())
    }
}

impl Default for HiddenApiFlagValue
{
    fn default() -> Self
    {
        HiddenApiFlagValue::new(NO_RESTRICTION)
    }
}

impl PartialEq for HiddenApiFlagValue
{
    fn eq(&self, other: &Self) -> bool
    {
        self.get() == other.get()
    }
}

impl fmt::Display for HiddenApiFlagValue
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self.flags()
        {
            Some(flags) => {
                let names: Vec<&str> = flags.iter().map(HiddenApiFlag::name).collect();
                write!(f, "{}", names.join(" "))
            }
            None => Ok(()),
        }
    }
}

/// Flags of one definition array, position for position.
#[derive(Debug, Default)]
pub struct HiddenApiFlagValueList
{
    values: Vec<HiddenApiFlagValue>,
    linked: bool,
    copy: bool,
}

impl PartialEq for HiddenApiFlagValueList
{
    fn eq(&self, other: &Self) -> bool
    {
        self.values == other.values
    }
}

impl HiddenApiFlagValueList
{
    pub fn new() -> HiddenApiFlagValueList
    {
        HiddenApiFlagValueList::default()
    }

    /// A view sharing this list's cells.
    pub fn new_copy(&self) -> HiddenApiFlagValueList
    {
        HiddenApiFlagValueList { values: self.values.iter().map(HiddenApiFlagValue::share).collect(), linked: false, copy: true }
    }

    /// A linked list holding the handles `defs` carry.
    fn adopt<D: Def>(defs: Option<&mut DefArray<D>>) -> HiddenApiFlagValueList
    {
        let values = match defs
        {
            Some(defs) => defs.iter_mut().map(|d| d.hidden_api_or_default().share()).collect(),
            None => Vec::new(),
        };
        HiddenApiFlagValueList { values, linked: true, copy: false }
    }

    pub fn is_copy(&self) -> bool
    {
        self.copy
    }

    pub fn len(&self) -> usize
    {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.values.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&HiddenApiFlagValue>
    {
        self.values.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HiddenApiFlagValue>
    {
        self.values.iter()
    }

    /// Binds the list to `defs`. The first link pairs stored values with definitions by
    /// position; later links rebuild the list from the handles the definitions hold.
    pub fn link_def_array<D: Def>(&mut self, defs: &mut DefArray<D>) -> Result<(), DexError>
    {
        if self.copy
        {
            if self.values.len() != defs.len()
            {
                fail!(kind: Contract, "A copied hidden api list cannot follow {} definitions", defs.len());
            }
            for (d, v) in defs.iter_mut().zip(self.values.iter())
            {
                d.set_hidden_api(Some(v.share()));
            }
        }
        else if self.linked
        {
            let before = self.values.len();
            self.values = defs.iter_mut().map(|d| d.hidden_api_or_default().share()).collect();
            if before != self.values.len()
            {
                debug!("hidden api list resized from {} to {}", before, self.values.len());
            }
        }
        else
        {
            if self.values.len() != defs.len()
            {
                warn!("{} hidden api flags for {} definitions", self.values.len(), defs.len());
                self.values.resize_with(defs.len(), HiddenApiFlagValue::default);
            }
            for (d, v) in defs.iter_mut().zip(self.values.iter())
            {
                d.set_hidden_api(Some(v.share()));
            }
        }
        self.linked = true;
        Ok(())
    }

    fn read(bytes: &[u8], ix: &mut usize, count: usize) -> Result<HiddenApiFlagValueList, DexError>
    {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count
        {
            values.push(HiddenApiFlagValue::new(read_uleb128(bytes, ix)?));
        }
        Ok(HiddenApiFlagValueList { values, linked: false, copy: false })
    }

    fn write(&self, buf: &mut Vec<u8>)
    {
        for v in &self.values
        {
            write_uleb128(buf, v.get());
        }
    }
}

/// The four flag lists of a class, in class data order.
#[derive(Debug, Default)]
pub struct HiddenApiData
{
    pub static_fields: HiddenApiFlagValueList,
    pub instance_fields: HiddenApiFlagValueList,
    pub direct_methods: HiddenApiFlagValueList,
    pub virtual_methods: HiddenApiFlagValueList,
    /// Offset inside the hidden api section; shared with copies.
    offset: Rc<Cell<u32>>,
    copy: bool,
}

impl PartialEq for HiddenApiData
{
    fn eq(&self, other: &Self) -> bool
    {
        self.static_fields == other.static_fields
            && self.instance_fields == other.instance_fields
            && self.direct_methods == other.direct_methods
            && self.virtual_methods == other.virtual_methods
    }
}

impl HiddenApiData
{
    pub fn new() -> HiddenApiData
    {
        HiddenApiData::default()
    }

    /// A read-only view that writes nothing and reuses this data's offset.
    pub fn new_copy(&self) -> HiddenApiData
    {
        HiddenApiData {
            static_fields: self.static_fields.new_copy(),
            instance_fields: self.instance_fields.new_copy(),
            direct_methods: self.direct_methods.new_copy(),
            virtual_methods: self.virtual_methods.new_copy(),
            offset: Rc::clone(&self.offset),
            copy: true,
        }
    }

    pub fn is_copy(&self) -> bool
    {
        self.copy
    }

    /// Data of its own over the handles `data` carries, as taken by a cloned class.
    pub fn adopt(data: &mut ClassData) -> HiddenApiData
    {
        HiddenApiData {
            static_fields: HiddenApiFlagValueList::adopt(data.static_fields_mut().map(|a| &mut **a)),
            instance_fields: HiddenApiFlagValueList::adopt(data.instance_fields_mut()),
            direct_methods: HiddenApiFlagValueList::adopt(data.direct_methods_mut()),
            virtual_methods: HiddenApiFlagValueList::adopt(data.virtual_methods_mut()),
            offset: Rc::new(Cell::new(0)),
            copy: false,
        }
    }

    /// Whether `source` is the data this copy was taken from.
    pub fn is_copy_of(&self, source: &HiddenApiData) -> bool
    {
        self.copy && !source.copy && Rc::ptr_eq(&self.offset, &source.offset)
    }

    /// The encoded flag blob.
    pub fn encode(&self) -> Vec<u8>
    {
        let mut buf = Vec::new();
        self.write(&mut buf);
        buf
    }

    /// Whether every list holds as many flags as `data` has definitions.
    pub fn fits_class_data(&self, data: &ClassData) -> bool
    {
        [self.static_fields.len(), self.instance_fields.len(), self.direct_methods.len(), self.virtual_methods.len()] == data.counts()
    }

    pub fn offset(&self) -> u32
    {
        self.offset.get()
    }

    pub fn is_empty_value_list(&self) -> bool
    {
        self.static_fields.is_empty() && self.instance_fields.is_empty() && self.direct_methods.is_empty() && self.virtual_methods.is_empty()
    }

    /// Whether every definition still sits at the position of the cell it holds.
    pub fn matches_class_data(&self, data: &ClassData) -> bool
    {
        lists_match(&self.static_fields, data.static_fields().map(|a| &**a))
            && lists_match(&self.instance_fields, data.instance_fields())
            && lists_match(&self.direct_methods, data.direct_methods())
            && lists_match(&self.virtual_methods, data.virtual_methods())
    }

    /// Turns a copy view into data of its own. Every definition gets a private cell holding
    /// its current flags, so later edits no longer reach the source.
    pub fn make_unique(&mut self, data: &mut ClassData) -> Result<(), DexError>
    {
        if !self.copy
        {
            return Ok(());
        }
        debug!("copy-on-write: hidden api flags at +0x{:x}", self.offset());
        unshare_cells(data.static_fields_mut().map(|a| &mut **a));
        unshare_cells(data.instance_fields_mut());
        unshare_cells(data.direct_methods_mut());
        unshare_cells(data.virtual_methods_mut());
        let relinked = || HiddenApiFlagValueList { values: Vec::new(), linked: true, copy: false };
        *self = HiddenApiData {
            static_fields: relinked(),
            instance_fields: relinked(),
            direct_methods: relinked(),
            virtual_methods: relinked(),
            offset: Rc::new(Cell::new(0)),
            copy: false,
        };
        self.link_class_data(data)
    }

    pub fn link_class_data(&mut self, data: &mut ClassData) -> Result<(), DexError>
    {
        link_optional(&mut self.static_fields, data.static_fields_mut().map(|a| &mut **a))?;
        link_optional(&mut self.instance_fields, data.instance_fields_mut())?;
        link_optional(&mut self.direct_methods, data.direct_methods_mut())?;
        link_optional(&mut self.virtual_methods, data.virtual_methods_mut())
    }

    fn read(bytes: &[u8], ix: &mut usize, counts: [usize; 4]) -> Result<HiddenApiData, DexError>
    {
        Ok(HiddenApiData {
            static_fields: HiddenApiFlagValueList::read(bytes, ix, counts[0])?,
            instance_fields: HiddenApiFlagValueList::read(bytes, ix, counts[1])?,
            direct_methods: HiddenApiFlagValueList::read(bytes, ix, counts[2])?,
            virtual_methods: HiddenApiFlagValueList::read(bytes, ix, counts[3])?,
            offset: Rc::new(Cell::new(0)),
            copy: false,
        })
    }

    fn write(&self, buf: &mut Vec<u8>)
    {
        self.static_fields.write(buf);
        self.instance_fields.write(buf);
        self.direct_methods.write(buf);
        self.virtual_methods.write(buf);
    }
}

fn lists_match<D: Def>(list: &HiddenApiFlagValueList, defs: Option<&DefArray<D>>) -> bool
{
    match defs
    {
        Some(defs) => {
            list.len() == defs.len()
                && defs.iter().zip(list.iter()).all(|(d, v)| d.hidden_api().map_or(true, |h| h.same_cell(v)))
        }
        None => list.is_empty(),
    }
}

fn unshare_cells<D: Def>(defs: Option<&mut DefArray<D>>)
{
    if let Some(defs) = defs
    {
        for d in defs.iter_mut()
        {
            let value = d.hidden_api_flags();
            d.set_hidden_api(Some(HiddenApiFlagValue::new(value)));
        }
    }
}

fn link_optional<D: Def>(list: &mut HiddenApiFlagValueList, defs: Option<&mut DefArray<D>>) -> Result<(), DexError>
{
    let mut empty = DefArray::new();
    list.link_def_array(defs.unwrap_or(&mut empty))
}

/// The `hiddenapi_class_data_item` section: one offset per class, then the flag blobs.
pub struct HiddenApiIndexList;

impl HiddenApiIndexList
{
    /// Reads the section at `off` into `classes`, sharing data between classes that point at
    /// the same blob.
    pub fn read(bytes: &[u8], off: u32, classes: &mut [ClassDef]) -> Result<(), DexError>
    {
        let base = off as usize;
        let mut ix = base;
        let size = read_u4(bytes, &mut ix)? as usize;
        if base + size > bytes.len() || size < 4 + 4 * classes.len()
        {
            fail!("hiddenapi_class_data_item of {} bytes for {} classes", size, classes.len());
        }
        let mut seen: HashMap<u32, HiddenApiData> = HashMap::new();
        for (i, class) in classes.iter_mut().enumerate()
        {
            let data_off = read_u4(bytes, &mut ix)?;
            if data_off == 0
            {
                continue;
            }
            if data_off as usize >= size
            {
                fail!("Hidden api data offset 0x{:x} of class #{} is outside the section", data_off, i);
            }
            let data = match seen.get(&data_off)
            {
                Some(source) => source.new_copy(),
                None => {
                    let mut at = base + data_off as usize;
                    let counts = class.class_data().map_or([0; 4], ClassData::counts);
                    let data = HiddenApiData::read(bytes, &mut at, counts).map_err(|e| err!(e, "hidden api data of {}", class.class_type()))?;
                    data.offset.set(data_off);
                    seen.insert(data_off, data.new_copy());
                    data
                }
            };
            trace!("hidden api data of {} at +0x{:x}", class.class_type(), data_off);
            class.set_hidden_api(Some(data))?;
        }
        Ok(())
    }

    /// Writes the section when any class carries flags; returns its offset or 0. A copy
    /// reuses its source's blob only while the two still encode the same; classes without
    /// definitions get offset 0.
    pub fn write(classes: &[ClassDef], w: &mut DataWriter) -> Result<u32, DexError>
    {
        if classes.iter().all(|c| c.hidden_api().is_none())
        {
            return Ok(0);
        }
        let mut buf = Vec::new();
        write_u4(&mut buf, 0);
        for _ in classes
        {
            write_u4(&mut buf, 0);
        }
        let mut offsets = vec![0u32; classes.len()];
        for (i, class) in classes.iter().enumerate()
        {
            if let Some(data) = class.hidden_api().filter(|d| !d.is_copy())
            {
                let blob = data.encode();
                if blob.is_empty()
                {
                    continue;
                }
                offsets[i] = buf.len() as u32;
                data.offset.set(offsets[i]);
                buf.extend_from_slice(&blob);
            }
        }
        for (i, class) in classes.iter().enumerate()
        {
            if let Some(data) = class.hidden_api().filter(|d| d.is_copy())
            {
                let blob = data.encode();
                if blob.is_empty()
                {
                    continue;
                }
                let source = classes.iter().enumerate().find_map(|(j, c)| {
                    c.hidden_api().filter(|s| data.is_copy_of(s) && s.encode() == blob).map(|_| offsets[j])
                });
                offsets[i] = match source
                {
                    Some(off) if off != 0 => off,
                    _ => {
                        debug!("hidden api copy of {} no longer matches its source", class.class_type());
                        let off = buf.len() as u32;
                        buf.extend_from_slice(&blob);
                        off
                    }
                };
            }
        }
        for (i, off) in offsets.iter().enumerate()
        {
            patch_u4(&mut buf, 4 + 4 * i, *off);
        }
        let size = buf.len() as u32;
        patch_u4(&mut buf, 0, size);
        w.append(4, |out| {
            out.extend_from_slice(&buf);
            Ok(())
        })
    }
}
