//! Annotation items and the per-class annotations directory.
//!
//! Implements:
//! - annotation_item / annotation_set_item / annotation_set_ref_list
//! - annotations_directory_item, with its field, method and parameter tables
//!
//! https://source.android.com/docs/core/runtime/dex-format#annotations-directory
//!
//! Directory tables are keyed by definition index, the pool index of the annotated field or
//! method. Entries read from a file only know that index; [`DirectoryMap::link`] binds them to
//! the definition's key once the class data is loaded, and [`DirectoryMap::refresh`] turns the
//! key back into a (possibly different) index before writing.

use crate::dex::encoded_values::EncodedAnnotation;
use crate::dex::error::DexError;
use crate::dex::item::Item;
use crate::dex::pool::DexPools;
use crate::dex::section::{DataReader, DataWriter, TYPE_ANNOTATION_ITEM, TYPE_ANNOTATION_SET_ITEM, TYPE_ANNOTATION_SET_REF_LIST};
use crate::dex::{read_u1, read_u4, write_u1, write_u4};
use crate::types::{FieldKey, MethodKey, TypeKey};
use log::{debug, warn};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationVisibility
{
    Build,
    Runtime,
    System,
}

impl AnnotationVisibility
{
    pub fn from_u8(value: u8) -> Result<AnnotationVisibility, DexError>
    {
        match value
        {
            0 => Ok(AnnotationVisibility::Build),
            1 => Ok(AnnotationVisibility::Runtime),
            2 => Ok(AnnotationVisibility::System),
            _ => fail!("Invalid annotation visibility 0x{:02x}", value),
        }
    }

    pub fn to_u8(self) -> u8
    {
        match self
        {
            AnnotationVisibility::Build => 0,
            AnnotationVisibility::Runtime => 1,
            AnnotationVisibility::System => 2,
        }
    }
}

impl fmt::Display for AnnotationVisibility
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self
        {
            AnnotationVisibility::Build => write!(f, "build"),
            AnnotationVisibility::Runtime => write!(f, "runtime"),
            AnnotationVisibility::System => write!(f, "system"),
        }
    }
}

/// annotation_item
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationItem
{
    pub visibility: AnnotationVisibility,
    pub annotation: EncodedAnnotation,
}

impl AnnotationItem
{
    pub fn new(visibility: AnnotationVisibility, type_key: TypeKey) -> AnnotationItem
    {
        AnnotationItem { visibility, annotation: EncodedAnnotation::new(type_key) }
    }

    pub fn type_key(&self) -> &TypeKey
    {
        &self.annotation.type_key
    }

    pub fn read(bytes: &[u8], ix: &mut usize, pools: &DexPools) -> Result<AnnotationItem, DexError>
    {
        let visibility = AnnotationVisibility::from_u8(read_u1(bytes, ix)?)?;
        let annotation = EncodedAnnotation::read(bytes, ix, pools)?;
        Ok(AnnotationItem { visibility, annotation })
    }

    pub fn write(&self, bytes: &mut Vec<u8>, pools: &DexPools) -> Result<usize, DexError>
    {
        let c = write_u1(bytes, self.visibility.to_u8());
        Ok(c + self.annotation.write(bytes, pools)?)
    }
}

/// annotation_set_item
///
/// `owner` is the class a set was built for. Sets read from a file have no owner.
#[derive(Debug, Clone, Default)]
pub struct AnnotationSet
{
    pub owner: Option<TypeKey>,
    pub items: Vec<AnnotationItem>,
}

impl PartialEq for AnnotationSet
{
    fn eq(&self, other: &Self) -> bool
    {
        self.items == other.items
    }
}

impl AnnotationSet
{
    pub fn new(owner: Option<TypeKey>) -> AnnotationSet
    {
        AnnotationSet { owner, items: Vec::new() }
    }

    pub fn len(&self) -> usize
    {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.items.is_empty()
    }

    pub fn get(&self, type_key: &TypeKey) -> Option<&AnnotationItem>
    {
        self.items.iter().find(|i| i.type_key() == type_key)
    }

    pub fn get_or_create(&mut self, type_key: &TypeKey, visibility: AnnotationVisibility) -> &mut AnnotationItem
    {
        let pos = match self.items.iter().position(|i| i.type_key() == type_key)
        {
            Some(pos) => pos,
            None => {
                self.items.push(AnnotationItem::new(visibility, type_key.clone()));
                self.items.len() - 1
            }
        };
        &mut self.items[pos]
    }

    pub fn remove(&mut self, type_key: &TypeKey) -> bool
    {
        let before = self.items.len();
        self.items.retain(|i| i.type_key() != type_key);
        before != self.items.len()
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        for item in &self.items
        {
            item.annotation.collect_keys(pools);
        }
    }

    pub fn read(bytes: &[u8], ix: &mut usize, pools: &DexPools) -> Result<AnnotationSet, DexError>
    {
        let size = read_u4(bytes, ix)? as usize;
        let mut items = Vec::with_capacity(size.min(bytes.len() / 4));
        for i in 0..size
        {
            let mut item_ix = read_u4(bytes, ix)? as usize;
            items.push(AnnotationItem::read(bytes, &mut item_ix, pools).map_err(|e| err!(e, "annotation_item #{}", i))?);
        }
        Ok(AnnotationSet { owner: None, items })
    }

    /// Writes the set's annotation items; shared sets are written once.
    pub fn place_items(&self, w: &mut DataWriter, pools: &DexPools) -> Result<(), DexError>
    {
        for item in &self.items
        {
            w.place(item, 1, |a, buf| a.write(buf, pools).map(|_| ()))?;
        }
        Ok(())
    }

    /// Writes the set sorted by type index; its items must already be placed.
    pub fn place(&self, w: &mut DataWriter, pools: &DexPools) -> Result<u32, DexError>
    {
        if let Some(off) = w.placed_offset(self)
        {
            return Ok(off);
        }
        let mut entries = Vec::with_capacity(self.len());
        for item in &self.items
        {
            entries.push((pools.type_index(item.type_key())?, w.require(item)?));
        }
        entries.sort_by_key(|(t, _)| *t);
        w.place(self, 4, |_, buf| {
            write_u4(buf, entries.len() as u32);
            for (_, off) in &entries
            {
                write_u4(buf, *off);
            }
            Ok(())
        })
    }
}

/// Returns a set that belongs to `context`, copying it if it was built for another class.
pub fn ensure_same_context(set: Item<AnnotationSet>, context: &TypeKey) -> Item<AnnotationSet>
{
    if !matches!(&set.owner, Some(owner) if owner != context)
    {
        return set;
    }
    let mut copy = set.get().clone();
    debug!("annotation set of {:?} copied into {}", copy.owner, context);
    copy.owner = Some(context.clone());
    Item::unique(copy)
}

/// annotation_set_ref_list: one optional set per parameter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnnotationGroup
{
    pub slots: Vec<Option<Item<AnnotationSet>>>,
}

impl AnnotationGroup
{
    pub fn new(size: usize) -> AnnotationGroup
    {
        AnnotationGroup { slots: vec![None; size] }
    }

    pub fn len(&self) -> usize
    {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.slots.iter().all(|s| s.as_ref().map_or(true, |set| set.is_empty()))
    }

    pub fn get(&self, index: usize) -> Result<Option<&AnnotationSet>, DexError>
    {
        match self.slots.get(index)
        {
            Some(slot) => Ok(slot.as_ref().map(Item::get)),
            None => fail!(kind: Contract, "Parameter {} out of range for {} slots", index, self.slots.len()),
        }
    }

    pub fn get_or_create(&mut self, index: usize, context: &TypeKey) -> Result<&mut AnnotationSet, DexError>
    {
        let size = self.slots.len();
        match self.slots.get_mut(index)
        {
            Some(slot) => Ok(slot.get_or_insert_with(|| Item::unique(AnnotationSet::new(Some(context.clone())))).edit()),
            None => fail!(kind: Contract, "Parameter {} out of range for {} slots", index, size),
        }
    }

    pub fn set(&mut self, index: usize, set: Option<Item<AnnotationSet>>) -> Result<(), DexError>
    {
        let size = self.slots.len();
        match self.slots.get_mut(index)
        {
            Some(slot) => {
                *slot = set;
                Ok(())
            }
            None => fail!(kind: Contract, "Parameter {} out of range for {} slots", index, size),
        }
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        for set in self.slots.iter().flatten()
        {
            set.collect_keys(pools);
        }
    }

    pub fn read(reader: &mut DataReader, ix: &mut usize) -> Result<AnnotationGroup, DexError>
    {
        let size = read_u4(reader.bytes, ix)? as usize;
        let mut slots = Vec::with_capacity(size.min(reader.bytes.len() / 4));
        for _ in 0..size
        {
            let off = read_u4(reader.bytes, ix)?;
            slots.push(if off == 0 { None } else { Some(Item::shared(reader.annotation_set(off)?)) });
        }
        Ok(AnnotationGroup { slots })
    }

    /// Writes the ref list; its sets must already be placed.
    pub fn place(&self, w: &mut DataWriter) -> Result<u32, DexError>
    {
        if let Some(off) = w.placed_offset(self)
        {
            return Ok(off);
        }
        let mut offsets = Vec::with_capacity(self.len());
        for slot in &self.slots
        {
            offsets.push(match slot
            {
                Some(set) => w.require(set.get())?,
                None => 0,
            });
        }
        w.place(self, 4, |_, buf| {
            write_u4(buf, offsets.len() as u32);
            for off in &offsets
            {
                write_u4(buf, *off);
            }
            Ok(())
        })
    }
}

/// One row of a directory table.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry<K, V>
{
    pub definition_index: u32,
    /// Unset until linked to a definition.
    pub key: Option<K>,
    pub value: Item<V>,
}

/// A directory table sorted by definition index.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryMap<K, V>
{
    entries: Vec<DirectoryEntry<K, V>>,
}

impl<K, V> Default for DirectoryMap<K, V>
{
    fn default() -> Self
    {
        DirectoryMap { entries: Vec::new() }
    }
}

impl<K: Clone + PartialEq + fmt::Display, V: Clone> DirectoryMap<K, V>
{
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry<K, V>>
    {
        self.entries.iter()
    }

    pub fn add(&mut self, key: K, definition_index: u32, value: Item<V>)
    {
        self.entries.push(DirectoryEntry { definition_index, key: Some(key), value });
    }

    /// Every value attached to `key`; more than one is unusual but allowed.
    pub fn get_all(&self, key: &K) -> Vec<&V>
    {
        self.entries.iter().filter(|e| e.key.as_ref() == Some(key)).map(|e| e.value.get()).collect()
    }

    pub fn get_by_index(&self, definition_index: u32) -> Vec<&V>
    {
        self.entries.iter().filter(|e| e.definition_index == definition_index).map(|e| e.value.get()).collect()
    }

    /// The first value attached to `key`, made unique for editing; created when missing.
    pub fn edit_or_insert<F>(&mut self, key: &K, definition_index: u32, create: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let pos = match self.entries.iter().position(|e| e.key.as_ref() == Some(key))
        {
            Some(pos) => pos,
            None => {
                self.add(key.clone(), definition_index, Item::unique(create()));
                self.entries.len() - 1
            }
        };
        self.entries[pos].value.edit()
    }

    pub fn remove(&mut self, key: &K) -> usize
    {
        let before = self.entries.len();
        self.entries.retain(|e| e.key.as_ref() != Some(key));
        before - self.entries.len()
    }

    /// Moves the entries of `old` over to `new`.
    pub fn rename(&mut self, old: &K, new: &K) -> usize
    {
        let mut renamed = 0;
        for e in self.entries.iter_mut().filter(|e| e.key.as_ref() == Some(old))
        {
            e.key = Some(new.clone());
            renamed += 1;
        }
        renamed
    }

    /// Runs `edit` on every value attached to `key`, copying shared values first.
    pub fn edit_all<F>(&mut self, key: &K, mut edit: F) -> usize
    where
        F: FnMut(&mut V),
    {
        let mut edited = 0;
        for e in self.entries.iter_mut().filter(|e| e.key.as_ref() == Some(key))
        {
            edit(e.value.edit());
            edited += 1;
        }
        edited
    }

    /// Binds unlinked entries recorded at `definition_index` to `key`.
    pub fn link(&mut self, key: &K, definition_index: u32) -> usize
    {
        let mut linked = 0;
        for e in self.entries.iter_mut().filter(|e| e.key.is_none() && e.definition_index == definition_index)
        {
            e.key = Some(key.clone());
            linked += 1;
        }
        linked
    }

    /// Entries no definition claimed.
    pub fn unlinked(&self) -> impl Iterator<Item = u32> + '_
    {
        self.entries.iter().filter(|e| e.key.is_none()).map(|e| e.definition_index)
    }

    pub fn sort(&mut self)
    {
        self.entries.sort_by_key(|e| e.definition_index);
    }

    /// Re-resolves every entry through `resolve`, which yields the key now standing for the
    /// entry's key and its definition index. Prunes the ones that no longer resolve and sorts
    /// the rest. Returns the number pruned.
    pub fn refresh<F>(&mut self, resolve: F) -> usize
    where
        F: Fn(&K) -> Option<(K, u32)>,
    {
        let before = self.entries.len();
        self.entries.retain_mut(|e| match e.key.as_ref().and_then(&resolve)
        {
            Some((key, index)) => {
                e.key = Some(key);
                e.definition_index = index;
                true
            }
            None => {
                match &e.key
                {
                    Some(k) => debug!("pruned directory entry for removed {}", k),
                    None => debug!("pruned unlinked directory entry at index {}", e.definition_index),
                }
                false
            }
        });
        self.sort();
        before - self.entries.len()
    }

    /// Appends the other table's entries for keys this one does not hold yet.
    pub fn merge(&mut self, other: &DirectoryMap<K, V>)
    {
        for e in &other.entries
        {
            if let Some(k) = &e.key
            {
                if self.get_all(k).is_empty()
                {
                    self.entries.push(e.clone());
                }
            }
        }
    }

    fn is_sorted(&self) -> bool
    {
        self.entries.windows(2).all(|w| w[0].definition_index <= w[1].definition_index)
    }
}

/// annotations_directory_item
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnnotationsDirectory
{
    pub class_annotations: Option<Item<AnnotationSet>>,
    pub fields: DirectoryMap<FieldKey, AnnotationSet>,
    pub methods: DirectoryMap<MethodKey, AnnotationSet>,
    pub parameters: DirectoryMap<MethodKey, AnnotationGroup>,
}

impl AnnotationsDirectory
{
    pub fn new() -> AnnotationsDirectory
    {
        AnnotationsDirectory::default()
    }

    /// True when there is no class set and all three tables are empty.
    pub fn is_empty(&self) -> bool
    {
        self.class_annotations.as_ref().map_or(true, |s| s.is_empty())
            && self.fields.is_empty()
            && self.methods.is_empty()
            && self.parameters.is_empty()
    }

    pub fn get_or_create_class_annotations(&mut self, context: &TypeKey) -> &mut AnnotationSet
    {
        self.class_annotations
            .get_or_insert_with(|| Item::unique(AnnotationSet::new(Some(context.clone()))))
            .edit()
    }

    pub fn set_class_annotations(&mut self, set: Option<Item<AnnotationSet>>, context: &TypeKey)
    {
        self.class_annotations = set.map(|s| ensure_same_context(s, context));
    }

    pub fn add_field_annotations(&mut self, key: &FieldKey, definition_index: u32, set: Item<AnnotationSet>, context: &TypeKey)
    {
        self.fields.add(key.clone(), definition_index, ensure_same_context(set, context));
    }

    pub fn get_fields_annotation(&self, key: &FieldKey) -> Vec<&AnnotationSet>
    {
        self.fields.get_all(key)
    }

    pub fn get_or_create_field_annotations(&mut self, key: &FieldKey, definition_index: u32, context: &TypeKey) -> &mut AnnotationSet
    {
        self.fields.edit_or_insert(key, definition_index, || AnnotationSet::new(Some(context.clone())))
    }

    pub fn add_method_annotations(&mut self, key: &MethodKey, definition_index: u32, set: Item<AnnotationSet>, context: &TypeKey)
    {
        self.methods.add(key.clone(), definition_index, ensure_same_context(set, context));
    }

    pub fn get_methods_annotation(&self, key: &MethodKey) -> Vec<&AnnotationSet>
    {
        self.methods.get_all(key)
    }

    pub fn get_or_create_method_annotations(&mut self, key: &MethodKey, definition_index: u32, context: &TypeKey) -> &mut AnnotationSet
    {
        self.methods.edit_or_insert(key, definition_index, || AnnotationSet::new(Some(context.clone())))
    }

    pub fn get_parameter_annotations(&self, key: &MethodKey, parameter: usize) -> Result<Option<&AnnotationSet>, DexError>
    {
        if parameter >= key.parameters_count()
        {
            fail!(kind: Contract, "Parameter {} out of range for {}", parameter, key);
        }
        match self.parameters.get_all(key).into_iter().next()
        {
            Some(group) => group.get(parameter),
            None => Ok(None),
        }
    }

    /// The set of one parameter; the method's group is created with one slot per parameter.
    pub fn get_or_create_parameter_annotations(
        &mut self,
        key: &MethodKey,
        definition_index: u32,
        parameter: usize,
        context: &TypeKey,
    ) -> Result<&mut AnnotationSet, DexError>
    {
        let count = key.parameters_count();
        if parameter >= count
        {
            fail!(kind: Contract, "Parameter {} out of range for {}", parameter, key);
        }
        let group = self.parameters.edit_or_insert(key, definition_index, || AnnotationGroup::new(count));
        if group.slots.len() < count
        {
            group.slots.resize(count, None);
        }
        group.get_or_create(parameter, context)
    }

    pub fn remove_field(&mut self, key: &FieldKey) -> usize
    {
        self.fields.remove(key)
    }

    pub fn remove_method(&mut self, key: &MethodKey) -> usize
    {
        self.methods.remove(key) + self.parameters.remove(key)
    }

    pub fn rename_field(&mut self, old: &FieldKey, new: &FieldKey) -> usize
    {
        self.fields.rename(old, new)
    }

    pub fn rename_method(&mut self, old: &MethodKey, new: &MethodKey) -> usize
    {
        self.methods.rename(old, new) + self.parameters.rename(old, new)
    }

    /// Drops the slot of parameter `index` from the groups of `key`; later slots move down.
    pub fn remove_parameter(&mut self, key: &MethodKey, index: usize) -> usize
    {
        let mut removed = 0;
        self.parameters.edit_all(key, |group| {
            if index < group.slots.len()
            {
                group.slots.remove(index);
                removed += 1;
            }
        });
        removed
    }

    pub fn link_field(&mut self, key: &FieldKey, definition_index: u32)
    {
        self.fields.link(key, definition_index);
    }

    pub fn link_method(&mut self, key: &MethodKey, definition_index: u32)
    {
        self.methods.link(key, definition_index);
        self.parameters.link(key, definition_index);
    }

    pub fn warn_unlinked(&self, class: &TypeKey)
    {
        for index in self.fields.unlinked()
        {
            warn!("{}: field annotations for index {} match no field", class, index);
        }
        for index in self.methods.unlinked().chain(self.parameters.unlinked())
        {
            warn!("{}: method annotations for index {} match no method", class, index);
        }
    }

    /// Re-resolves definition indices, prunes stale entries and sorts all three tables.
    pub fn refresh<F, M>(&mut self, field_index: F, method_index: M)
    where
        F: Fn(&FieldKey) -> Option<(FieldKey, u32)>,
        M: Fn(&MethodKey) -> Option<(MethodKey, u32)>,
    {
        self.fields.refresh(&field_index);
        self.methods.refresh(&method_index);
        self.parameters.refresh(&method_index);
    }

    pub fn merge(&mut self, other: &AnnotationsDirectory, context: &TypeKey)
    {
        if let Some(set) = &other.class_annotations
        {
            let mut merged = self.class_annotations.take().map(|s| s.get().clone()).unwrap_or_default();
            for item in &set.items
            {
                if merged.get(item.type_key()).is_none()
                {
                    merged.items.push(item.clone());
                }
            }
            merged.owner = Some(context.clone());
            self.class_annotations = Some(Item::unique(merged));
        }
        self.fields.merge(&other.fields);
        self.methods.merge(&other.methods);
        self.parameters.merge(&other.parameters);
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        if let Some(set) = &self.class_annotations
        {
            set.collect_keys(pools);
        }
        for e in self.fields.iter()
        {
            e.value.collect_keys(pools);
        }
        for e in self.methods.iter()
        {
            e.value.collect_keys(pools);
        }
        for e in self.parameters.iter()
        {
            e.value.collect_keys(pools);
        }
    }

    pub fn read(reader: &mut DataReader, off: u32) -> Result<AnnotationsDirectory, DexError>
    {
        let mut ix = off as usize;
        let bytes = reader.bytes;
        let class_annotations_off = read_u4(bytes, &mut ix)?;
        let fields_size = read_u4(bytes, &mut ix)?;
        let methods_size = read_u4(bytes, &mut ix)?;
        let parameters_size = read_u4(bytes, &mut ix)?;
        let total = fields_size as usize + methods_size as usize + parameters_size as usize;
        if total.saturating_mul(8) > bytes.len().saturating_sub(ix)
        {
            fail!("annotations_directory_item at 0x{:x} claims {} entries past the end of the file", off, total);
        }

        let mut dir = AnnotationsDirectory::new();
        if class_annotations_off != 0
        {
            dir.class_annotations = Some(Item::shared(reader.annotation_set(class_annotations_off)?));
        }
        for _ in 0..fields_size
        {
            let definition_index = read_u4(bytes, &mut ix)?;
            let value = Item::shared(reader.annotation_set(read_u4(bytes, &mut ix)?)?);
            dir.fields.entries.push(DirectoryEntry { definition_index, key: None, value });
        }
        for _ in 0..methods_size
        {
            let definition_index = read_u4(bytes, &mut ix)?;
            let value = Item::shared(reader.annotation_set(read_u4(bytes, &mut ix)?)?);
            dir.methods.entries.push(DirectoryEntry { definition_index, key: None, value });
        }
        for _ in 0..parameters_size
        {
            let definition_index = read_u4(bytes, &mut ix)?;
            let value = Item::shared(reader.annotation_group(read_u4(bytes, &mut ix)?)?);
            dir.parameters.entries.push(DirectoryEntry { definition_index, key: None, value });
        }
        if !(dir.fields.is_sorted() && dir.methods.is_sorted() && dir.parameters.is_sorted())
        {
            warn!("annotations_directory_item at 0x{:x} is not sorted by index", off);
        }
        Ok(dir)
    }

    /// Every set the directory refers to, parameter slots included.
    fn sets(&self) -> Vec<&AnnotationSet>
    {
        let mut sets = Vec::new();
        if let Some(set) = self.class_annotations.as_ref().filter(|set| !set.is_empty())
        {
            sets.push(set.get());
        }
        sets.extend(self.fields.iter().map(|e| e.value.get()));
        sets.extend(self.methods.iter().map(|e| e.value.get()));
        for e in self.parameters.iter()
        {
            sets.extend(e.value.slots.iter().flatten().map(|set| set.get()));
        }
        sets
    }

    /// Writes the directory's items of one map kind: annotation items, annotation sets or
    /// set ref lists, in that order across all classes.
    pub fn place(&self, item_type: u16, w: &mut DataWriter, pools: &DexPools) -> Result<(), DexError>
    {
        match item_type
        {
            TYPE_ANNOTATION_ITEM => {
                for set in self.sets()
                {
                    set.place_items(w, pools)?;
                }
            }
            TYPE_ANNOTATION_SET_ITEM => {
                for set in self.sets()
                {
                    set.place(w, pools)?;
                }
            }
            TYPE_ANNOTATION_SET_REF_LIST => {
                for e in self.parameters.iter()
                {
                    e.value.get().place(w)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Writes the directory itself; everything it refers to must already be placed.
    /// Call `refresh` first.
    pub fn write(&self, w: &mut DataWriter) -> Result<u32, DexError>
    {
        if !(self.fields.is_sorted() && self.methods.is_sorted() && self.parameters.is_sorted())
        {
            fail!(kind: Validation, "Annotations directory tables must be sorted before writing");
        }
        let class_off = match &self.class_annotations
        {
            Some(set) if !set.is_empty() => w.require(set.get())?,
            _ => 0,
        };
        let mut field_rows = Vec::with_capacity(self.fields.len());
        for e in self.fields.iter()
        {
            field_rows.push((e.definition_index, w.require(e.value.get())?));
        }
        let mut method_rows = Vec::with_capacity(self.methods.len());
        for e in self.methods.iter()
        {
            method_rows.push((e.definition_index, w.require(e.value.get())?));
        }
        let mut parameter_rows = Vec::with_capacity(self.parameters.len());
        for e in self.parameters.iter()
        {
            parameter_rows.push((e.definition_index, w.require(e.value.get())?));
        }

        w.append(4, |buf| {
            write_u4(buf, class_off);
            write_u4(buf, field_rows.len() as u32);
            write_u4(buf, method_rows.len() as u32);
            write_u4(buf, parameter_rows.len() as u32);
            for (index, off) in field_rows.iter().chain(method_rows.iter()).chain(parameter_rows.iter())
            {
                write_u4(buf, *index);
                write_u4(buf, *off);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::section::TYPE_ANNOTATIONS_DIRECTORY_ITEM;
    use crate::dex::encoded_values::EncodedValue;
    use crate::dex::DexOptions;
    use std::rc::Rc;

    fn method(name: &str, proto: &str) -> MethodKey {
        MethodKey::new("Lfoo;", name, proto.parse().expect("proto"))
    }

    fn set_with(type_key: &str) -> AnnotationSet {
        let mut set = AnnotationSet::new(None);
        set.get_or_create(&TypeKey::new(type_key), AnnotationVisibility::Runtime)
            .annotation
            .set("value", EncodedValue::Int(1));
        set
    }

    #[test]
    fn refresh_sorts_and_prunes() {
        let mut map: DirectoryMap<FieldKey, AnnotationSet> = DirectoryMap::default();
        let a = FieldKey::new("Lfoo;", "a", "I");
        let b = FieldKey::new("Lfoo;", "b", "I");
        let gone = FieldKey::new("Lfoo;", "gone", "I");
        map.add(b.clone(), 0, Item::unique(set_with("Lb;")));
        map.add(gone.clone(), 1, Item::unique(set_with("Lg;")));
        map.add(a.clone(), 2, Item::unique(set_with("La;")));

        let renamed = FieldKey::new("Lfoo;", "c", "I");
        let pruned = map.refresh(|k| match k.name.as_str() {
            "a" => Some((renamed.clone(), 5)),
            "b" => Some((k.clone(), 9)),
            _ => None,
        });
        assert_eq!(pruned, 1);
        let order: Vec<u32> = map.iter().map(|e| e.definition_index).collect();
        assert_eq!(order, vec![5, 9]);
        assert!(map.get_all(&gone).is_empty());
        assert!(map.get_all(&a).is_empty());
        assert_eq!(map.get_all(&renamed).len(), 1);
        assert_eq!(map.get_by_index(5).len(), 1);
    }

    #[test]
    fn link_binds_by_index() {
        let mut map: DirectoryMap<MethodKey, AnnotationSet> = DirectoryMap::default();
        map.entries.push(DirectoryEntry { definition_index: 3, key: None, value: Item::unique(set_with("La;")) });
        map.entries.push(DirectoryEntry { definition_index: 7, key: None, value: Item::unique(set_with("Lb;")) });
        let m = method("run", "()V");
        assert_eq!(map.link(&m, 7), 1);
        assert_eq!(map.unlinked().collect::<Vec<_>>(), vec![3]);
        assert_eq!(map.get_all(&m)[0].items[0].type_key().descriptor(), "Lb;");
    }

    #[test]
    fn parameter_index_is_checked() {
        let mut dir = AnnotationsDirectory::new();
        let ctx = TypeKey::new("Lfoo;");
        let m = method("run", "(IJ)V");
        dir.get_or_create_parameter_annotations(&m, 0, 1, &ctx)
            .unwrap()
            .get_or_create(&TypeKey::new("Lanno;"), AnnotationVisibility::Build);
        assert!(dir.get_parameter_annotations(&m, 1).unwrap().is_some());
        assert!(dir.get_parameter_annotations(&m, 0).unwrap().is_none());

        let e = dir.get_or_create_parameter_annotations(&m, 0, 2, &ctx).unwrap_err();
        assert_eq!(e.kind(), crate::dex::ErrorKind::Contract);
        assert!(dir.get_parameter_annotations(&m, 5).is_err());
    }

    #[test]
    fn removing_a_parameter_slot_and_renaming() {
        let mut dir = AnnotationsDirectory::new();
        let ctx = TypeKey::new("Lfoo;");
        let m = method("run", "(IJ)V");
        dir.get_or_create_parameter_annotations(&m, 0, 1, &ctx)
            .unwrap()
            .get_or_create(&TypeKey::new("Lanno;"), AnnotationVisibility::Build);
        dir.get_or_create_method_annotations(&m, 0, &ctx);

        assert_eq!(dir.remove_parameter(&m, 0), 1);
        let shorter = method("run", "(J)V");
        assert_eq!(dir.rename_method(&m, &shorter), 2);
        assert!(dir.get_parameter_annotations(&shorter, 0).unwrap().is_some());
        assert!(dir.get_methods_annotation(&m).is_empty());
        assert_eq!(dir.get_methods_annotation(&shorter).len(), 1);
    }

    #[test]
    fn emptiness_needs_every_part_empty() {
        let mut dir = AnnotationsDirectory::new();
        assert!(dir.is_empty());
        let ctx = TypeKey::new("Lfoo;");
        dir.get_or_create_method_annotations(&method("a", "()V"), 0, &ctx)
            .get_or_create(&TypeKey::new("Lanno;"), AnnotationVisibility::Runtime);
        assert!(dir.class_annotations.is_none());
        assert!(!dir.is_empty());
        assert_eq!(dir.remove_method(&method("a", "()V")), 1);
        assert!(dir.is_empty());
    }

    #[test]
    fn foreign_sets_are_copied() {
        let mine = TypeKey::new("Lmine;");
        let theirs = TypeKey::new("Ltheirs;");
        let mut set = set_with("La;");
        set.owner = Some(theirs.clone());
        let shared = Item::shared(Rc::new(set));

        let adopted = ensure_same_context(shared.clone(), &mine);
        assert!(!adopted.is_shared());
        assert_eq!(adopted.owner.as_ref(), Some(&mine));

        let kept = ensure_same_context(shared.clone(), &theirs);
        assert!(kept.same_item(&shared));
    }

    #[test]
    fn directory_round_trip() {
        let ctx = TypeKey::new("Lfoo;");
        let field = FieldKey::new("Lfoo;", "X", "I");
        let run = method("run", "(I)V");
        let mut dir = AnnotationsDirectory::new();
        dir.get_or_create_class_annotations(&ctx).get_or_create(&TypeKey::new("Lcls;"), AnnotationVisibility::System);
        dir.get_or_create_field_annotations(&field, 0, &ctx).get_or_create(&TypeKey::new("Lfld;"), AnnotationVisibility::Runtime);
        dir.get_or_create_method_annotations(&run, 0, &ctx).get_or_create(&TypeKey::new("Lmth;"), AnnotationVisibility::Build);
        dir.get_or_create_parameter_annotations(&run, 0, 0, &ctx)
            .unwrap()
            .get_or_create(&TypeKey::new("Lprm;"), AnnotationVisibility::Runtime);

        let mut pools = DexPools::new();
        pools.intern_field(&field);
        pools.intern_method(&run);
        dir.collect_keys(&mut pools);
        pools.refresh();

        let mut w = DataWriter::new();
        for kind in [TYPE_ANNOTATION_ITEM, TYPE_ANNOTATION_SET_ITEM, TYPE_ANNOTATION_SET_REF_LIST] {
            w.begin(kind);
            dir.place(kind, &mut w, &pools).expect("write failed");
        }
        w.begin(TYPE_ANNOTATIONS_DIRECTORY_ITEM);
        let off = dir.write(&mut w).expect("write failed");
        w.end();
        assert_eq!(w.runs().iter().map(|r| r.count).collect::<Vec<_>>(), vec![4, 4, 1, 1]);
        let bytes = w.into_bytes();

        let options = DexOptions::default();
        let mut reader = DataReader::new(&bytes, &pools, &options);
        let mut back = AnnotationsDirectory::read(&mut reader, off).expect("read failed");
        back.link_field(&field, 0);
        back.link_method(&run, 0);
        assert_eq!(back, dir);
        assert_eq!(back.get_parameter_annotations(&run, 0).unwrap().unwrap().items[0].type_key().descriptor(), "Lprm;");
    }
}
