//! Deduplicated identifier pools.
//!
//! A [`Section`] maps keys to indices. Indices stay stable until [`Section::refresh`] drops
//! removed entries and sorts the rest, which is also the order the id sections of a dex file
//! must be written in.

use crate::dex::error::{DexError, ErrorKind};
use crate::dex::section::DataWriter;
use crate::dex::{read_u1, read_u2, read_u4, read_uleb128, write_u1, write_u2, write_u4, write_uleb128, write_x};
use crate::types::{FieldKey, MethodKey, ProtoKey, TypeKey};
use cesu8::{from_java_cesu8, to_java_cesu8};
use log::trace;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct Section<K>
{
    items: Vec<Option<K>>,
    index: HashMap<K, u32>,
    replacements: HashMap<K, K>,
}

impl<K> Default for Section<K>
{
    fn default() -> Self
    {
        Section { items: Vec::new(), index: HashMap::new(), replacements: HashMap::new() }
    }
}

impl<K: Clone + Eq + Hash + Ord + fmt::Display> Section<K>
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Number of index slots, removed entries included.
    pub fn len(&self) -> usize
    {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.index.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&K>
    {
        self.items.get(index as usize).and_then(Option::as_ref)
    }

    pub fn index_of(&self, key: &K) -> Option<u32>
    {
        self.index.get(key).copied()
    }

    pub fn contains(&self, key: &K) -> bool
    {
        self.index.contains_key(key)
    }

    /// Index of `key`, added when missing. A replaced key interns its replacement.
    pub fn get_or_create(&mut self, key: &K) -> u32
    {
        let replaced = self.get_replace(key);
        let key = &replaced;
        if let Some(i) = self.index.get(key)
        {
            return *i;
        }
        let i = self.items.len() as u32;
        self.items.push(Some(key.clone()));
        self.index.insert(key.clone(), i);
        i
    }

    /// Leaves a hole; other indices do not move until the next refresh.
    pub fn remove(&mut self, key: &K) -> bool
    {
        match self.index.remove(key)
        {
            Some(i) => {
                self.items[i as usize] = None;
                true
            }
            None => false,
        }
    }

    /// Retires `old` in favour of `new`; holders of `old` follow it through [`Section::get_replace`].
    pub fn replace(&mut self, old: &K, new: &K) -> u32
    {
        if old == new
        {
            return self.get_or_create(new);
        }
        self.replacements.remove(new);
        let i = self.get_or_create(new);
        self.remove(old);
        self.replacements.insert(old.clone(), new.clone());
        i
    }

    /// Follows replacement links to the key that currently stands for `key`.
    pub fn get_replace(&self, key: &K) -> K
    {
        let mut current = key;
        for _ in 0..=self.replacements.len()
        {
            match self.replacements.get(current)
            {
                Some(next) => current = next,
                None => break,
            }
        }
        current.clone()
    }

    pub fn resolve(&self, key: &K) -> Option<u32>
    {
        self.index_of(&self.get_replace(key))
    }

    /// Index for writing; a missing key is an error.
    pub fn require(&self, key: &K) -> Result<u32, DexError>
    {
        match self.resolve(key)
        {
            Some(i) => Ok(i),
            None => Err(DexError::of_kind(ErrorKind::Unresolved, &format!("{} is not in its pool", key))),
        }
    }

    /// Key for an index read from a stream; a missing slot is corruption.
    pub fn at(&self, index: u32) -> Result<&K, DexError>
    {
        match self.get(index)
        {
            Some(k) => Ok(k),
            None => fail!("Index {} is outside its pool of {}", index, self.items.len()),
        }
    }

    /// Drops removed entries and sorts; returns true when any index moved.
    pub fn refresh(&mut self) -> bool
    {
        let before: Vec<Option<K>> = self.items.clone();
        let mut live: Vec<K> = self.items.drain(..).flatten().collect();
        live.sort();
        self.index.clear();
        for (i, k) in live.iter().enumerate()
        {
            self.index.insert(k.clone(), i as u32);
        }
        self.items = live.into_iter().map(Some).collect();
        before != self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &K)>
    {
        self.items.iter().enumerate().filter_map(|(i, k)| k.as_ref().map(|k| (i as u32, k)))
    }
}

/// Placement of one id section inside a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdSection
{
    pub offset: u32,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdSections
{
    pub strings: IdSection,
    pub types: IdSection,
    pub protos: IdSection,
    pub fields: IdSection,
    pub methods: IdSection,
}

impl IdSections
{
    /// First offset past the method ids.
    pub fn end(&self) -> u32
    {
        self.methods.offset + self.methods.count * 8
    }
}

/// The five identifier pools a class refers into.
#[derive(Debug, Clone, Default)]
pub struct DexPools
{
    pub strings: Section<String>,
    pub types: Section<TypeKey>,
    pub protos: Section<ProtoKey>,
    pub fields: Section<FieldKey>,
    pub methods: Section<MethodKey>,
}

impl DexPools
{
    pub fn new() -> DexPools
    {
        DexPools::default()
    }

    pub fn intern_string(&mut self, s: &str) -> u32
    {
        self.strings.get_or_create(&s.to_string())
    }

    pub fn intern_type(&mut self, t: &TypeKey) -> u32
    {
        let t = &self.types.get_replace(t);
        self.intern_string(t.descriptor());
        self.types.get_or_create(t)
    }

    pub fn intern_proto(&mut self, p: &ProtoKey) -> u32
    {
        let p = &self.protos.get_replace(p);
        self.intern_string(&p.shorty());
        self.intern_type(&p.return_type);
        for t in &p.parameters
        {
            self.intern_type(t);
        }
        self.protos.get_or_create(p)
    }

    pub fn intern_field(&mut self, f: &FieldKey) -> u32
    {
        let f = &self.fields.get_replace(f);
        self.intern_type(&f.declaring);
        self.intern_string(&f.name);
        self.intern_type(&f.field_type);
        self.fields.get_or_create(f)
    }

    pub fn intern_method(&mut self, m: &MethodKey) -> u32
    {
        let m = &self.methods.get_replace(m);
        self.intern_type(&m.declaring);
        self.intern_string(&m.name);
        self.intern_proto(&m.proto);
        self.methods.get_or_create(m)
    }

    /// Sorts every pool; returns true when any index moved.
    pub fn refresh(&mut self) -> bool
    {
        let mut changed = self.strings.refresh();
        changed |= self.types.refresh();
        changed |= self.protos.refresh();
        changed |= self.fields.refresh();
        changed |= self.methods.refresh();
        changed
    }

    pub fn string_index(&self, s: &str) -> Result<u32, DexError>
    {
        self.strings.require(&s.to_string())
    }

    pub fn type_index(&self, t: &TypeKey) -> Result<u32, DexError>
    {
        self.types.require(t)
    }

    pub fn proto_index(&self, p: &ProtoKey) -> Result<u32, DexError>
    {
        self.protos.require(p)
    }

    pub fn field_index(&self, f: &FieldKey) -> Result<u32, DexError>
    {
        self.fields.require(f)
    }

    pub fn method_index(&self, m: &MethodKey) -> Result<u32, DexError>
    {
        self.methods.require(m)
    }

    pub fn read(bytes: &[u8], ids: &IdSections) -> Result<DexPools, DexError>
    {
        let mut pools = DexPools::new();

        let mut ix = ids.strings.offset as usize;
        for i in 0..ids.strings.count
        {
            let mut data_off = read_u4(bytes, &mut ix)? as usize;
            let s = read_string_data(bytes, &mut data_off).map_err(|e| DexError::with_context(e, format!("string_id #{}", i)))?;
            pools.strings.items.push(Some(s.clone()));
            pools.strings.index.insert(s, i);
        }

        let mut ix = ids.types.offset as usize;
        for i in 0..ids.types.count
        {
            let descriptor = pools.strings.at(read_u4(bytes, &mut ix)?)?;
            let t = TypeKey::new(descriptor);
            pools.types.items.push(Some(t.clone()));
            pools.types.index.insert(t, i);
        }

        let mut ix = ids.protos.offset as usize;
        for i in 0..ids.protos.count
        {
            let _shorty = read_u4(bytes, &mut ix)?;
            let return_type = pools.types.at(read_u4(bytes, &mut ix)?)?.clone();
            let mut params_off = read_u4(bytes, &mut ix)? as usize;
            let mut parameters = vec![];
            if params_off != 0
            {
                let size = read_u4(bytes, &mut params_off)?;
                for _ in 0..size
                {
                    parameters.push(pools.types.at(read_u2(bytes, &mut params_off)? as u32)?.clone());
                }
            }
            let p = ProtoKey::new(return_type, parameters);
            pools.protos.items.push(Some(p.clone()));
            pools.protos.index.insert(p, i);
        }

        let mut ix = ids.fields.offset as usize;
        for i in 0..ids.fields.count
        {
            let declaring = pools.types.at(read_u2(bytes, &mut ix)? as u32)?.clone();
            let field_type = pools.types.at(read_u2(bytes, &mut ix)? as u32)?.clone();
            let name = pools.strings.at(read_u4(bytes, &mut ix)?)?.clone();
            let f = FieldKey { declaring, name, field_type };
            pools.fields.items.push(Some(f.clone()));
            pools.fields.index.insert(f, i);
        }

        let mut ix = ids.methods.offset as usize;
        for i in 0..ids.methods.count
        {
            let declaring = pools.types.at(read_u2(bytes, &mut ix)? as u32)?.clone();
            let proto = pools.protos.at(read_u2(bytes, &mut ix)? as u32)?.clone();
            let name = pools.strings.at(read_u4(bytes, &mut ix)?)?.clone();
            let m = MethodKey { declaring, name, proto };
            pools.methods.items.push(Some(m.clone()));
            pools.methods.index.insert(m, i);
        }

        trace!(
            "pools: {} strings, {} types, {} protos, {} fields, {} methods",
            ids.strings.count, ids.types.count, ids.protos.count, ids.fields.count, ids.methods.count
        );
        Ok(pools)
    }

    /// Lays the five id sections out back to back from `start`. The pools must be refreshed.
    pub fn id_sections(&self, start: u32) -> Result<IdSections, DexError>
    {
        if self.strings.items.iter().any(Option::is_none) || self.types.items.iter().any(Option::is_none)
        {
            fail!(kind: Validation, "Pools hold removed entries; refresh before writing");
        }
        let mut at = start;
        let mut section = |count: usize, size: u32| {
            let s = IdSection { offset: at, count: count as u32 };
            at += s.count * size;
            s
        };
        Ok(IdSections {
            strings: section(self.strings.len(), 4),
            types: section(self.types.len(), 4),
            protos: section(self.protos.len(), 12),
            fields: section(self.fields.len(), 8),
            methods: section(self.methods.len(), 8),
        })
    }

    /// Writes every `string_data_item` in index order and returns their offsets.
    pub fn write_string_data(&self, w: &mut DataWriter) -> Result<Vec<u32>, DexError>
    {
        let mut offsets = Vec::with_capacity(self.strings.len());
        for (_, s) in self.strings.iter()
        {
            offsets.push(w.append(1, |buf| {
                write_string_data(buf, s);
                Ok(())
            })?);
        }
        Ok(offsets)
    }

    /// Writes the parameter `type_list` of every proto that has parameters; 0 for the rest.
    pub fn write_type_lists(&self, w: &mut DataWriter) -> Result<Vec<u32>, DexError>
    {
        let mut offsets = Vec::with_capacity(self.protos.len());
        for (_, p) in self.protos.iter()
        {
            if p.parameters.is_empty()
            {
                offsets.push(0);
                continue;
            }
            let mut indices = Vec::with_capacity(p.parameters.len());
            for t in &p.parameters
            {
                indices.push(narrow_u16(self.type_index(t)?, "type index in type_list")?);
            }
            offsets.push(w.append(4, |buf| {
                write_type_list(buf, &indices);
                Ok(())
            })?);
        }
        Ok(offsets)
    }

    /// Fills the id sections reserved by [`DexPools::id_sections`].
    pub fn write_ids(&self, w: &mut DataWriter, ids: &IdSections, string_offsets: &[u32], param_offsets: &[u32]) -> Result<(), DexError>
    {
        let mut buf = Vec::with_capacity((ids.end() - ids.strings.offset) as usize);
        for off in string_offsets
        {
            write_u4(&mut buf, *off);
        }
        for (_, t) in self.types.iter()
        {
            write_u4(&mut buf, self.string_index(t.descriptor())?);
        }
        for ((_, p), params_off) in self.protos.iter().zip(param_offsets)
        {
            write_u4(&mut buf, self.string_index(&p.shorty())?);
            write_u4(&mut buf, self.type_index(&p.return_type)?);
            write_u4(&mut buf, *params_off);
        }
        for (_, f) in self.fields.iter()
        {
            write_u2(&mut buf, narrow_u16(self.type_index(&f.declaring)?, "field class index")?);
            write_u2(&mut buf, narrow_u16(self.type_index(&f.field_type)?, "field type index")?);
            write_u4(&mut buf, self.string_index(&f.name)?);
        }
        for (_, m) in self.methods.iter()
        {
            write_u2(&mut buf, narrow_u16(self.type_index(&m.declaring)?, "method class index")?);
            write_u2(&mut buf, narrow_u16(self.proto_index(&m.proto)?, "method proto index")?);
            write_u4(&mut buf, self.string_index(&m.name)?);
        }
        if buf.len() as u32 != ids.end() - ids.strings.offset
        {
            fail!(kind: Contract, "Id sections changed size after layout");
        }
        w.patch(ids.strings.offset, &buf)
    }
}

/// Writes a `type_list`: a u4 size then one u2 type index per entry.
pub(crate) fn write_type_list(buffer: &mut Vec<u8>, indices: &[u16])
{
    write_u4(buffer, indices.len() as u32);
    for index in indices
    {
        write_u2(buffer, *index);
    }
}

pub(crate) fn narrow_u16(value: u32, what: &str) -> Result<u16, DexError>
{
    if value > u16::MAX as u32
    {
        fail!(kind: Validation, "{} {} does not fit 16 bits", what, value);
    }
    Ok(value as u16)
}

fn read_string_data(bytes: &[u8], ix: &mut usize) -> Result<String, DexError>
{
    let _utf16_size = read_uleb128(bytes, ix)?;
    let start = *ix;
    while read_u1(bytes, ix)? != 0 {}
    match from_java_cesu8(&bytes[start..*ix - 1])
    {
        Ok(s) => Ok(s.into_owned()),
        Err(_) => fail!("Invalid MUTF-8 string data at 0x{:x}", start),
    }
}

fn write_string_data(buffer: &mut Vec<u8>, s: &str) -> usize
{
    let mut c = write_uleb128(buffer, s.encode_utf16().count() as u32);
    c += write_x(buffer, &to_java_cesu8(s));
    c += write_u1(buffer, 0);
    c
}
