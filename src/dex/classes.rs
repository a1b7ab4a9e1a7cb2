//! A whole set of classes with the pools they refer into.
//!
//! Writing runs in four phases: every key the classes use is interned, the pools are sorted,
//! every class is refreshed against the final indices, and only then are bytes emitted, one
//! data kind at a time so the map list can describe each kind as a single run.
//!
//! <https://source.android.com/docs/core/runtime/dex-format#file-layout>

use crate::dex::class_def::{ClassDef, ClassDefOffsets, CLASS_DEF_SIZE};
use crate::dex::error::DexError;
use crate::dex::hidden_api::HiddenApiIndexList;
use crate::dex::instructions::Reference;
use crate::dex::pool::{DexPools, IdSection, IdSections};
use crate::dex::section::{
    DataReader, DataWriter, MapEntry, HEADER_SIZE, TYPE_ANNOTATIONS_DIRECTORY_ITEM, TYPE_ANNOTATION_ITEM,
    TYPE_ANNOTATION_SET_ITEM, TYPE_ANNOTATION_SET_REF_LIST, TYPE_CLASS_DATA_ITEM, TYPE_CODE_ITEM, TYPE_DEBUG_INFO_ITEM,
    TYPE_ENCODED_ARRAY_ITEM, TYPE_HIDDENAPI_CLASS_DATA_ITEM, TYPE_STRING_DATA_ITEM, TYPE_TYPE_LIST,
};
use crate::dex::{patch_u4, read_u2, read_u4, read_x, write_u2, write_u4, write_x, DexOptions};
use crate::types::{AccessFlags, TypeKey};
use adler::adler32_slice;
use log::{debug, trace, warn};
use sha1::{Digest, Sha1};

const DEX_MAGIC: &[u8; 8] = b"dex\n035\0";
const ENDIAN_CONSTANT: u32 = 0x1234_5678;

const TYPE_HEADER_ITEM: u16 = 0x0000;
const TYPE_STRING_ID_ITEM: u16 = 0x0001;
const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
const TYPE_PROTO_ID_ITEM: u16 = 0x0003;
const TYPE_FIELD_ID_ITEM: u16 = 0x0004;
const TYPE_METHOD_ID_ITEM: u16 = 0x0005;
const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
const TYPE_MAP_LIST: u16 = 0x1000;

/// Data kinds in write order: every kind only refers to kinds written before it.
const DATA_ORDER: [u16; 11] = [
    TYPE_STRING_DATA_ITEM,
    TYPE_TYPE_LIST,
    TYPE_DEBUG_INFO_ITEM,
    TYPE_CODE_ITEM,
    TYPE_ANNOTATION_ITEM,
    TYPE_ANNOTATION_SET_ITEM,
    TYPE_ANNOTATION_SET_REF_LIST,
    TYPE_ANNOTATIONS_DIRECTORY_ITEM,
    TYPE_ENCODED_ARRAY_ITEM,
    TYPE_CLASS_DATA_ITEM,
    TYPE_HIDDENAPI_CLASS_DATA_ITEM,
];

/// Where the sections of a file live, as recorded in its header and map list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DexLayout
{
    pub ids: IdSections,
    pub class_defs: IdSection,
    /// Offset of the `hiddenapi_class_data_item`, 0 when absent.
    pub hidden_api: u32,
    pub map: u32,
    pub data_off: u32,
    pub data_size: u32,
    pub file_size: u32,
}

impl DexLayout
{
    pub fn read(bytes: &[u8]) -> Result<DexLayout, DexError>
    {
        if bytes.len() < HEADER_SIZE
        {
            fail!("Not enough bytes for header");
        }
        let mut ix = 0;
        let magic = read_x(bytes, &mut ix, 8)?;
        if &magic[0..4] != b"dex\n"
        {
            fail!("Invalid magic value");
        }
        let checksum = read_u4(bytes, &mut ix)?;
        if checksum != DexLayout::checksum(bytes)
        {
            warn!("checksum 0x{:08x} does not match the file contents", checksum);
        }
        ix = 0x20;
        let file_size = read_u4(bytes, &mut ix)?;
        let _header_size = read_u4(bytes, &mut ix)?;
        let endian_tag = read_u4(bytes, &mut ix)?;
        if endian_tag != ENDIAN_CONSTANT
        {
            fail!("Unsupported endian tag 0x{:08x}", endian_tag);
        }
        ix = 0x34;
        let map = read_u4(bytes, &mut ix)?;
        let mut section = || -> Result<IdSection, DexError> {
            let count = read_u4(bytes, &mut ix)?;
            let offset = read_u4(bytes, &mut ix)?;
            Ok(IdSection { offset, count })
        };
        let ids = IdSections {
            strings: section()?,
            types: section()?,
            protos: section()?,
            fields: section()?,
            methods: section()?,
        };
        let class_defs = section()?;
        let data = section()?;

        let mut layout = DexLayout { ids, class_defs, hidden_api: 0, map, data_off: data.offset, data_size: data.count, file_size };
        if map != 0
        {
            for entry in DexLayout::read_map(bytes, map)?
            {
                if entry.item_type == TYPE_HIDDENAPI_CLASS_DATA_ITEM
                {
                    layout.hidden_api = entry.offset;
                }
            }
        }
        Ok(layout)
    }

    /// Reads the `map_list` at `map`.
    pub fn read_map(bytes: &[u8], map: u32) -> Result<Vec<MapEntry>, DexError>
    {
        let mut at = map as usize;
        let size = read_u4(bytes, &mut at)?;
        let mut entries = Vec::with_capacity(size.min(0x100) as usize);
        for _ in 0..size
        {
            let item_type = read_u2(bytes, &mut at)?;
            let _unused = read_u2(bytes, &mut at)?;
            let count = read_u4(bytes, &mut at)?;
            let offset = read_u4(bytes, &mut at)?;
            entries.push(MapEntry { item_type, count, offset });
        }
        Ok(entries)
    }

    /// Adler-32 of everything past the checksum field.
    pub fn checksum(bytes: &[u8]) -> u32
    {
        adler32_slice(&bytes[12..])
    }

    /// SHA-1 of everything past the signature field.
    pub fn signature(bytes: &[u8]) -> [u8; 20]
    {
        let mut hasher = Sha1::new();
        hasher.update(&bytes[32..]);
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }

    /// Fills the header, then signs the file and checksums it, in that order.
    fn write_header(&self, buf: &mut [u8])
    {
        let mut header = Vec::with_capacity(HEADER_SIZE);
        write_x(&mut header, DEX_MAGIC);
        write_u4(&mut header, 0);
        write_x(&mut header, &[0; 20]);
        write_u4(&mut header, self.file_size);
        write_u4(&mut header, HEADER_SIZE as u32);
        write_u4(&mut header, ENDIAN_CONSTANT);
        write_u4(&mut header, 0);
        write_u4(&mut header, 0);
        write_u4(&mut header, self.map);
        for s in [self.ids.strings, self.ids.types, self.ids.protos, self.ids.fields, self.ids.methods, self.class_defs]
        {
            write_u4(&mut header, s.count);
            write_u4(&mut header, s.offset);
        }
        write_u4(&mut header, self.data_size);
        write_u4(&mut header, self.data_off);
        buf[..HEADER_SIZE].copy_from_slice(&header);

        let signature = DexLayout::signature(buf);
        buf[12..32].copy_from_slice(&signature);
        let checksum = DexLayout::checksum(buf);
        patch_u4(buf, 8, checksum);
    }

    /// Writes the map list: header, id sections, then every data run the writer recorded.
    fn write_map(&self, w: &mut DataWriter) -> Result<u32, DexError>
    {
        let mut entries = vec![MapEntry { item_type: TYPE_HEADER_ITEM, count: 1, offset: 0 }];
        let ids = [
            (TYPE_STRING_ID_ITEM, self.ids.strings),
            (TYPE_TYPE_ID_ITEM, self.ids.types),
            (TYPE_PROTO_ID_ITEM, self.ids.protos),
            (TYPE_FIELD_ID_ITEM, self.ids.fields),
            (TYPE_METHOD_ID_ITEM, self.ids.methods),
            (TYPE_CLASS_DEF_ITEM, self.class_defs),
        ];
        for (item_type, s) in ids
        {
            if s.count > 0
            {
                entries.push(MapEntry { item_type, count: s.count, offset: s.offset });
            }
        }
        w.end();
        entries.extend_from_slice(w.runs());
        let map_off = w.align(4);
        entries.push(MapEntry { item_type: TYPE_MAP_LIST, count: 1, offset: map_off });
        entries.sort_by_key(|e| e.offset);
        w.append(4, |buf| {
            write_u4(buf, entries.len() as u32);
            for e in &entries
            {
                write_u2(buf, e.item_type);
                write_u2(buf, 0);
                write_u4(buf, e.count);
                write_u4(buf, e.offset);
            }
            Ok(())
        })
    }
}

/// Pools plus the classes defined against them.
#[derive(Debug, Clone, Default)]
pub struct DexClasses
{
    pub pools: DexPools,
    pub options: DexOptions,
    classes: Vec<ClassDef>,
}

impl DexClasses
{
    pub fn new(options: DexOptions) -> DexClasses
    {
        DexClasses { pools: DexPools::new(), options, classes: Vec::new() }
    }

    pub fn len(&self) -> usize
    {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClassDef>
    {
        self.classes.iter()
    }

    pub fn get(&self, class_type: &TypeKey) -> Option<&ClassDef>
    {
        self.classes.iter().find(|c| c.class_type() == class_type)
    }

    pub fn get_mut(&mut self, class_type: &TypeKey) -> Option<&mut ClassDef>
    {
        self.classes.iter_mut().find(|c| c.class_type() == class_type)
    }

    pub fn get_or_create(&mut self, class_type: &TypeKey) -> &mut ClassDef
    {
        let pos = match self.classes.iter().position(|c| c.class_type() == class_type)
        {
            Some(pos) => pos,
            None => {
                self.classes.push(ClassDef::new(class_type.clone(), AccessFlags::PUBLIC));
                self.classes.len() - 1
            }
        };
        &mut self.classes[pos]
    }

    pub fn add(&mut self, class: ClassDef) -> Result<&mut ClassDef, DexError>
    {
        if self.get(class.class_type()).is_some()
        {
            fail!(kind: Contract, "{} is already defined", class.class_type());
        }
        self.classes.push(class);
        let last = self.classes.len() - 1;
        Ok(&mut self.classes[last])
    }

    pub fn remove(&mut self, class_type: &TypeKey) -> Option<ClassDef>
    {
        let pos = self.classes.iter().position(|c| c.class_type() == class_type)?;
        Some(self.classes.remove(pos))
    }

    /// Swaps `search` for `replace` in every class. Renaming a class onto another defined
    /// class is refused.
    pub fn replace_keys(&mut self, search: &Reference, replace: &Reference) -> Result<(), DexError>
    {
        if let (Reference::Type(from), Reference::Type(to)) = (search, replace)
        {
            if from != to && self.get(from).is_some() && self.get(to).is_some()
            {
                fail!(kind: Contract, "Renaming {} onto {} collides with a defined class", from, to);
            }
        }
        for class in self.classes.iter_mut()
        {
            class.replace_keys(search, replace).map_err(|e| err!(e, "class {}", class.class_type()))?;
        }
        Ok(())
    }

    /// Reads every class of a dex file. Classes sharing code, debug info, annotation sets or
    /// static values share them after the read too.
    pub fn read(bytes: &[u8], options: DexOptions) -> Result<DexClasses, DexError>
    {
        let layout = DexLayout::read(bytes)?;
        let pools = DexPools::read(bytes, &layout.ids)?;
        let mut classes = Vec::with_capacity(layout.class_defs.count as usize);
        {
            let mut reader = DataReader::new(bytes, &pools, &options);
            let mut ix = layout.class_defs.offset as usize;
            for i in 0..layout.class_defs.count
            {
                let class = ClassDef::read(&mut reader, &mut ix).map_err(|e| err!(e, "class_def #{}", i))?;
                classes.push(class);
            }
        }
        if layout.hidden_api != 0
        {
            HiddenApiIndexList::read(bytes, layout.hidden_api, &mut classes)?;
        }
        debug!("read {} classes", classes.len());
        Ok(DexClasses { pools, options, classes })
    }

    /// Interns every key the classes use, sorts the pools and refreshes every class against
    /// the new indices.
    pub fn refresh(&mut self) -> Result<(), DexError>
    {
        for class in &self.classes
        {
            class.collect_keys(&mut self.pools);
        }
        if self.pools.refresh()
        {
            trace!("pool indices moved");
        }
        for class in self.classes.iter_mut()
        {
            class.refresh(&self.pools, &self.options).map_err(|e| err!(e, "class {}", class.class_type()))?;
        }
        self.detach_stale_hidden_api()
    }

    /// Hidden api copies whose source is gone or now encodes differently get flags of their own.
    fn detach_stale_hidden_api(&mut self) -> Result<(), DexError>
    {
        let stale: Vec<usize> = self
            .classes
            .iter()
            .enumerate()
            .filter_map(|(i, class)| {
                let copy = class.hidden_api().filter(|d| d.is_copy())?;
                let blob = copy.encode();
                let in_sync = self.classes.iter().any(|c| c.hidden_api().map_or(false, |s| copy.is_copy_of(s) && s.encode() == blob));
                if in_sync { None } else { Some(i) }
            })
            .collect();
        for i in stale
        {
            let class = &mut self.classes[i];
            debug!("hidden api copy of {} detached from its source", class.class_type());
            class.detach_hidden_api()?;
        }
        Ok(())
    }

    /// Writes a complete file and returns it with its layout.
    ///
    /// The id sections and class defs are reserved right after the header; the data section
    /// follows with one contiguous run per item kind, and the map list closes the file.
    pub fn write(&mut self) -> Result<(Vec<u8>, DexLayout), DexError>
    {
        self.refresh()?;

        let mut w = DataWriter::new();
        let ids = self.pools.id_sections(HEADER_SIZE as u32)?;
        let class_defs = IdSection { offset: ids.end(), count: self.classes.len() as u32 };
        let data_off = class_defs.offset + class_defs.count * CLASS_DEF_SIZE as u32;
        w.reserve(data_off);

        let mut string_offsets = Vec::new();
        let mut param_offsets = Vec::new();
        let mut offsets = vec![ClassDefOffsets::default(); self.classes.len()];
        let mut hidden_api = 0;
        for item_type in DATA_ORDER
        {
            w.begin(item_type);
            match item_type
            {
                TYPE_STRING_DATA_ITEM => string_offsets = self.pools.write_string_data(&mut w)?,
                TYPE_TYPE_LIST => param_offsets = self.pools.write_type_lists(&mut w)?,
                TYPE_HIDDENAPI_CLASS_DATA_ITEM => hidden_api = HiddenApiIndexList::write(&self.classes, &mut w)?,
                _ => {}
            }
            for (class, placed) in self.classes.iter_mut().zip(offsets.iter_mut())
            {
                class.place(item_type, &mut w, &self.pools, placed).map_err(|e| err!(e, "class {}", class.class_type()))?;
            }
        }
        w.end();

        self.pools.write_ids(&mut w, &ids, &string_offsets, &param_offsets)?;
        let mut defs = Vec::with_capacity(self.classes.len() * CLASS_DEF_SIZE);
        for (class, placed) in self.classes.iter().zip(offsets.iter())
        {
            class.write(&mut defs, placed, &self.pools)?;
        }
        w.patch(class_defs.offset, &defs)?;

        let mut layout = DexLayout { ids, class_defs, hidden_api, data_off, ..DexLayout::default() };
        layout.map = layout.write_map(&mut w)?;
        layout.file_size = w.offset();
        layout.data_size = layout.file_size - data_off;
        for s in [&mut layout.ids.strings, &mut layout.ids.types, &mut layout.ids.protos, &mut layout.ids.fields, &mut layout.ids.methods, &mut layout.class_defs]
        {
            if s.count == 0
            {
                s.offset = 0;
            }
        }

        let mut bytes = w.into_bytes();
        layout.write_header(&mut bytes);
        debug!("wrote {} classes in {} bytes", self.classes.len(), bytes.len());
        Ok((bytes, layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_round_trip() {
        let mut classes = DexClasses::new(DexOptions::default());
        let (bytes, layout) = classes.write().unwrap();
        assert_eq!(&bytes[0..8], DEX_MAGIC);
        assert_eq!(layout.file_size as usize, bytes.len());
        let read = DexClasses::read(&bytes, DexOptions::default()).expect("read failed");
        assert!(read.is_empty());
        assert_eq!(DexLayout::read(&bytes).unwrap(), layout);
    }

    #[test]
    fn header_is_checked() {
        assert!(DexLayout::read(&[0; 0x20]).is_err());
        let mut bytes = vec![0; HEADER_SIZE];
        bytes[0..8].copy_from_slice(b"zip\n035\0");
        assert!(DexLayout::read(&bytes).is_err());
    }

    #[test]
    fn duplicate_classes_are_rejected() {
        let mut classes = DexClasses::new(DexOptions::default());
        let foo = TypeKey::new("Lfoo;");
        classes.get_or_create(&foo);
        assert!(classes.add(ClassDef::new(foo.clone(), AccessFlags::PUBLIC)).is_err());
        assert_eq!(classes.len(), 1);
        assert!(classes.remove(&foo).is_some());
        assert!(classes.is_empty());
    }
}
