//! Offset-keyed access to the data section.
//!
//! Data items (code, debug info, annotation sets, static value arrays) are referenced from
//! their owners by file offset. Several owners may point at the same offset; [`DataReader`]
//! hands every one of them the same `Rc`, and [`DataWriter`] emits each shared `Rc` once,
//! grouping items by kind for the map list.

use crate::dex::annotations::{AnnotationGroup, AnnotationSet};
use crate::dex::code_item::CodeItem;
use crate::dex::debug_info::DebugInfo;
use crate::dex::encoded_values::EncodedArray;
use crate::dex::error::DexError;
use crate::dex::pool::DexPools;
use crate::dex::{write_align, DexOptions};
use log::trace;
use std::collections::HashMap;
use std::rc::Rc;

/// Size of the file header; nothing in the data section can live below it.
pub const HEADER_SIZE: usize = 0x70;

pub struct DataReader<'a>
{
    pub bytes: &'a [u8],
    pub pools: &'a DexPools,
    pub options: &'a DexOptions,
    code_items: HashMap<u32, Rc<CodeItem>>,
    debug_infos: HashMap<u32, Rc<DebugInfo>>,
    annotation_sets: HashMap<u32, Rc<AnnotationSet>>,
    annotation_groups: HashMap<u32, Rc<AnnotationGroup>>,
    encoded_arrays: HashMap<u32, Rc<EncodedArray>>,
}

impl<'a> DataReader<'a>
{
    pub fn new(bytes: &'a [u8], pools: &'a DexPools, options: &'a DexOptions) -> DataReader<'a>
    {
        DataReader {
            bytes,
            pools,
            options,
            code_items: HashMap::new(),
            debug_infos: HashMap::new(),
            annotation_sets: HashMap::new(),
            annotation_groups: HashMap::new(),
            encoded_arrays: HashMap::new(),
        }
    }

    fn check_offset(&self, off: u32, what: &str) -> Result<usize, DexError>
    {
        let pos = off as usize;
        if pos < HEADER_SIZE || pos >= self.bytes.len()
        {
            fail!("{} offset 0x{:x} is outside the data section", what, off);
        }
        Ok(pos)
    }

    pub fn code_item(&mut self, off: u32) -> Result<Rc<CodeItem>, DexError>
    {
        if let Some(item) = self.code_items.get(&off)
        {
            return Ok(Rc::clone(item));
        }
        let mut ix = self.check_offset(off, "code_item")?;
        trace!("code_item at 0x{:x}", off);
        let item = Rc::new(CodeItem::read(self, &mut ix).map_err(|e| err!(e, "code_item at 0x{:x}", off))?);
        self.code_items.insert(off, Rc::clone(&item));
        Ok(item)
    }

    pub fn debug_info(&mut self, off: u32) -> Result<Rc<DebugInfo>, DexError>
    {
        if let Some(item) = self.debug_infos.get(&off)
        {
            return Ok(Rc::clone(item));
        }
        let mut ix = self.check_offset(off, "debug_info_item")?;
        let item = Rc::new(DebugInfo::read(self.bytes, &mut ix, self.pools).map_err(|e| err!(e, "debug_info_item at 0x{:x}", off))?);
        self.debug_infos.insert(off, Rc::clone(&item));
        Ok(item)
    }

    pub fn annotation_set(&mut self, off: u32) -> Result<Rc<AnnotationSet>, DexError>
    {
        if let Some(item) = self.annotation_sets.get(&off)
        {
            return Ok(Rc::clone(item));
        }
        let mut ix = self.check_offset(off, "annotation_set_item")?;
        let item = Rc::new(AnnotationSet::read(self.bytes, &mut ix, self.pools).map_err(|e| err!(e, "annotation_set_item at 0x{:x}", off))?);
        self.annotation_sets.insert(off, Rc::clone(&item));
        Ok(item)
    }

    pub fn annotation_group(&mut self, off: u32) -> Result<Rc<AnnotationGroup>, DexError>
    {
        if let Some(item) = self.annotation_groups.get(&off)
        {
            return Ok(Rc::clone(item));
        }
        let mut ix = self.check_offset(off, "annotation_set_ref_list")?;
        let item = Rc::new(AnnotationGroup::read(self, &mut ix).map_err(|e| err!(e, "annotation_set_ref_list at 0x{:x}", off))?);
        self.annotation_groups.insert(off, Rc::clone(&item));
        Ok(item)
    }

    pub fn encoded_array(&mut self, off: u32) -> Result<Rc<EncodedArray>, DexError>
    {
        if let Some(item) = self.encoded_arrays.get(&off)
        {
            return Ok(Rc::clone(item));
        }
        let mut ix = self.check_offset(off, "encoded_array_item")?;
        let item = Rc::new(EncodedArray::read(self.bytes, &mut ix, self.pools).map_err(|e| err!(e, "encoded_array_item at 0x{:x}", off))?);
        self.encoded_arrays.insert(off, Rc::clone(&item));
        Ok(item)
    }
}

/// Map list item types of the data section.
/// <https://source.android.com/docs/core/runtime/dex-format#type-codes>
pub const TYPE_TYPE_LIST: u16 = 0x1001;
pub const TYPE_ANNOTATION_SET_REF_LIST: u16 = 0x1002;
pub const TYPE_ANNOTATION_SET_ITEM: u16 = 0x1003;
pub const TYPE_CLASS_DATA_ITEM: u16 = 0x2000;
pub const TYPE_CODE_ITEM: u16 = 0x2001;
pub const TYPE_STRING_DATA_ITEM: u16 = 0x2002;
pub const TYPE_DEBUG_INFO_ITEM: u16 = 0x2003;
pub const TYPE_ANNOTATION_ITEM: u16 = 0x2004;
pub const TYPE_ENCODED_ARRAY_ITEM: u16 = 0x2005;
pub const TYPE_ANNOTATIONS_DIRECTORY_ITEM: u16 = 0x2006;
pub const TYPE_HIDDENAPI_CLASS_DATA_ITEM: u16 = 0xF000;

/// One map_list entry: `count` items of `item_type` laid out back to back from `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry
{
    pub item_type: u16,
    pub count: u32,
    pub offset: u32,
}

/// Output buffer for a whole file. Offsets handed out are absolute file offsets.
///
/// Items are written one kind at a time between [`DataWriter::begin`] and [`DataWriter::end`],
/// so that every kind forms one contiguous run for the map list. An item is identified by its
/// address and type: every owner of a shared `Rc` sees the same address, so it is written once
/// and later kinds look its offset up with [`DataWriter::require`].
pub struct DataWriter
{
    buffer: Vec<u8>,
    placed: HashMap<(usize, &'static str), u32>,
    current: Option<MapEntry>,
    runs: Vec<MapEntry>,
}

impl Default for DataWriter
{
    fn default() -> Self
    {
        DataWriter::new()
    }
}

fn identity<T>(value: &T) -> (usize, &'static str)
{
    (value as *const T as usize, std::any::type_name::<T>())
}

impl DataWriter
{
    pub fn new() -> DataWriter
    {
        DataWriter { buffer: vec![0; HEADER_SIZE], placed: HashMap::new(), current: None, runs: Vec::new() }
    }

    pub fn offset(&self) -> u32
    {
        self.buffer.len() as u32
    }

    pub fn align(&mut self, alignment: usize) -> u32
    {
        write_align(&mut self.buffer, alignment);
        self.offset()
    }

    pub fn buffer(&mut self) -> &mut Vec<u8>
    {
        &mut self.buffer
    }

    /// Zero-fills up to `offset`, leaving room for blocks patched in later.
    pub fn reserve(&mut self, offset: u32)
    {
        if self.buffer.len() < offset as usize
        {
            self.buffer.resize(offset as usize, 0);
        }
    }

    /// Overwrites bytes inside a reserved block.
    pub fn patch(&mut self, offset: u32, bytes: &[u8]) -> Result<(), DexError>
    {
        let start = offset as usize;
        if start + bytes.len() > self.buffer.len()
        {
            fail!(kind: Contract, "Patch of {} bytes at 0x{:x} runs past the output", bytes.len(), offset);
        }
        self.buffer[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Starts the run of `item_type`; every block written until [`DataWriter::end`] counts.
    pub fn begin(&mut self, item_type: u16)
    {
        self.end();
        self.current = Some(MapEntry { item_type, count: 0, offset: 0 });
    }

    pub fn end(&mut self)
    {
        if let Some(run) = self.current.take()
        {
            if run.count > 0
            {
                trace!("{} items of type 0x{:04x} at 0x{:x}", run.count, run.item_type, run.offset);
                self.runs.push(run);
            }
        }
    }

    /// Map entries of the runs closed so far.
    pub fn runs(&self) -> &[MapEntry]
    {
        &self.runs
    }

    fn count(&mut self, off: u32)
    {
        if let Some(run) = self.current.as_mut()
        {
            if run.count == 0
            {
                run.offset = off;
            }
            run.count += 1;
        }
    }

    /// Writes a block at the next aligned offset and returns that offset.
    pub fn append<F>(&mut self, alignment: usize, write: F) -> Result<u32, DexError>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<(), DexError>,
    {
        let off = self.align(alignment);
        write(&mut self.buffer)?;
        self.count(off);
        Ok(off)
    }

    /// Offset of an item already placed.
    pub fn placed_offset<T>(&self, value: &T) -> Option<u32>
    {
        self.placed.get(&identity(value)).copied()
    }

    /// Offset of an item that must have been placed in an earlier run.
    pub fn require<T>(&self, value: &T) -> Result<u32, DexError>
    {
        match self.placed_offset(value)
        {
            Some(off) => Ok(off),
            None => fail!(kind: Contract, "{} was not written before its owner", std::any::type_name::<T>()),
        }
    }

    /// Like [`DataWriter::append`], but an item already written returns its first offset.
    pub fn place<T, F>(&mut self, value: &T, alignment: usize, write: F) -> Result<u32, DexError>
    where
        F: FnOnce(&T, &mut Vec<u8>) -> Result<(), DexError>,
    {
        if let Some(off) = self.placed_offset(value)
        {
            return Ok(off);
        }
        let off = self.append(alignment, |buf| write(value, buf))?;
        self.placed.insert(identity(value), off);
        trace!("placed {} at 0x{:x}", std::any::type_name::<T>(), off);
        Ok(off)
    }

    pub fn into_bytes(self) -> Vec<u8>
    {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::item::Item;
    use crate::dex::write_u4;

    #[test]
    fn shared_items_are_written_once() {
        let mut w = DataWriter::new();
        let shared = Rc::new(7u32);
        let a = Item::shared(Rc::clone(&shared));
        let b = Item::shared(Rc::clone(&shared));
        let c = Item::unique(7u32);

        let write = |v: &u32, buf: &mut Vec<u8>| {
            write_u4(buf, *v);
            Ok(())
        };
        w.begin(TYPE_ENCODED_ARRAY_ITEM);
        let off_a = w.place(a.get(), 4, write).unwrap();
        let off_b = w.place(b.get(), 4, write).unwrap();
        let off_c = w.place(c.get(), 4, write).unwrap();
        w.end();
        assert_eq!(off_a, HEADER_SIZE as u32);
        assert_eq!(off_a, off_b);
        assert_eq!(off_c, off_a + 4);
        assert_eq!(w.require(b.get()).unwrap(), off_a);
        assert!(w.require(&8u32).is_err());
        assert_eq!(w.runs(), &[MapEntry { item_type: TYPE_ENCODED_ARRAY_ITEM, count: 2, offset: off_a }]);
        assert_eq!(w.into_bytes().len(), HEADER_SIZE + 8);
    }

    #[test]
    fn empty_runs_are_dropped() {
        let mut w = DataWriter::new();
        w.begin(TYPE_CODE_ITEM);
        w.begin(TYPE_TYPE_LIST);
        w.append(4, |buf| {
            write_u4(buf, 0);
            Ok(())
        }).unwrap();
        w.end();
        assert_eq!(w.runs().len(), 1);
        assert_eq!(w.runs()[0].item_type, TYPE_TYPE_LIST);

        w.reserve(0x100);
        assert_eq!(w.offset(), 0x100);
        w.patch(0x80, &[1, 2]).unwrap();
        assert!(w.patch(0xff, &[1, 2]).is_err());
    }

    #[test]
    fn append_aligns() {
        let mut w = DataWriter::new();
        w.buffer().push(1);
        let off = w.append(4, |buf| {
            buf.push(2);
            Ok(())
        }).unwrap();
        assert_eq!(off % 4, 0);
        assert_eq!(w.offset(), off + 1);
    }

    #[test]
    fn reader_rejects_header_offsets() {
        let pools = DexPools::new();
        let options = DexOptions::default();
        let bytes = vec![0u8; 0x80];
        let mut r = DataReader::new(&bytes, &pools, &options);
        assert!(r.encoded_array(0x10).is_err());
        assert!(r.code_item(0x100).is_err());
    }
}
