//! Definition arrays of class data.
//!
//! An array is encoded as a run of records whose first field is the difference between the
//! record's pool index and the previous record's, so the array has to be sorted by pool
//! index and every delta recomputed whenever membership or pool order changes.

use crate::dex::def::{Def, FieldDef};
use crate::dex::encoded_values::{EncodedArray, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::instructions::Reference;
use crate::dex::pool::DexPools;
use crate::dex::section::DataReader;
use crate::dex::{read_uleb128, write_uleb128};
use crate::types::{AccessFlags, FieldKey};
use log::{trace, warn};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, PartialEq)]
pub struct DefArray<D>
{
    defs: Vec<D>,
}

impl<D> Default for DefArray<D>
{
    fn default() -> Self
    {
        DefArray { defs: Vec::new() }
    }
}

impl<D: Def> DefArray<D>
{
    pub fn new() -> DefArray<D>
    {
        DefArray::default()
    }

    pub fn len(&self) -> usize
    {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.defs.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&D>
    {
        self.defs.get(position)
    }

    pub fn get_mut(&mut self, position: usize) -> Option<&mut D>
    {
        self.defs.get_mut(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, D>
    {
        self.defs.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, D>
    {
        self.defs.iter_mut()
    }

    pub fn position(&self, key: &D::Key) -> Option<usize>
    {
        self.defs.iter().position(|d| d.key() == key)
    }

    pub fn get_by_key(&self, key: &D::Key) -> Option<&D>
    {
        self.defs.iter().find(|d| d.key() == key)
    }

    pub fn get_by_key_mut(&mut self, key: &D::Key) -> Option<&mut D>
    {
        self.defs.iter_mut().find(|d| d.key() == key)
    }

    pub fn find_by_definition_index(&self, definition_index: u32) -> Option<&D>
    {
        self.defs.iter().find(|d| d.definition_index() == definition_index)
    }

    /// The definition for `key`, appended with `access_flags` when missing.
    pub fn get_or_create(&mut self, key: D::Key, access_flags: AccessFlags) -> &mut D
    {
        let pos = match self.position(&key)
        {
            Some(pos) => pos,
            None => {
                self.defs.push(D::new(key, access_flags));
                self.defs.len() - 1
            }
        };
        &mut self.defs[pos]
    }

    pub fn add(&mut self, def: D) -> Result<&mut D, DexError>
    {
        if self.position(def.key()).is_some()
        {
            fail!(kind: Contract, "{} is already defined", def.key());
        }
        self.defs.push(def);
        let last = self.defs.len() - 1;
        Ok(&mut self.defs[last])
    }

    /// Detaches the definition for `key`; side tables keyed by it must be cleaned by the owner.
    pub fn remove(&mut self, key: &D::Key) -> Option<D>
    {
        let pos = self.position(key)?;
        Some(self.defs.remove(pos))
    }

    /// Whether the cached pool indices strictly increase.
    pub fn is_sorted(&self) -> bool
    {
        self.defs.windows(2).all(|w| w[0].definition_index() < w[1].definition_index())
    }

    pub fn read(reader: &mut DataReader, ix: &mut usize, count: u32) -> Result<DefArray<D>, DexError>
    {
        let mut defs = Vec::with_capacity((count as usize).min(reader.bytes.len()));
        let mut previous: u32 = 0;
        for i in 0..count
        {
            let relative = read_uleb128(reader.bytes, ix)?;
            if i > 0 && relative == 0
            {
                fail!("Definition #{} repeats index {}", i, previous);
            }
            let index = match previous.checked_add(relative)
            {
                Some(index) => index,
                None => fail!("Relative index {} of definition #{} overflows", relative, i),
            };
            let key = D::key_at(reader.pools, index).map_err(|e| err!(e, "definition #{}", i))?;
            let mut def = D::read_body(reader, ix, key)?;
            def.set_indices(relative, index);
            trace!("definition #{} {}", i, def.key());
            defs.push(def);
            previous = index;
        }
        Ok(DefArray { defs })
    }

    /// Follows key replacements, drops definitions whose key left the pool, sorts by pool
    /// index and recomputes every relative index. Returns the dropped definitions.
    pub fn refresh(&mut self, pools: &DexPools) -> Vec<D>
    {
        let mut orphans = Vec::new();
        let mut kept = Vec::with_capacity(self.defs.len());
        for mut def in self.defs.drain(..)
        {
            match D::resolve(pools, def.key())
            {
                Some((key, index)) => {
                    if &key != def.key()
                    {
                        def.set_key(key);
                    }
                    def.set_indices(def.relative_index(), index);
                    kept.push(def);
                }
                None => {
                    warn!("dropping {} whose key is no longer in the pool", def.key());
                    orphans.push(def);
                }
            }
        }
        kept.sort_by_key(|d| d.definition_index());
        let before = kept.len();
        kept.dedup_by(|later, earlier| {
            later.definition_index() == earlier.definition_index()
        });
        if kept.len() != before
        {
            warn!("{} definitions collapsed onto keys already defined", before - kept.len());
        }
        let mut previous = 0;
        for def in kept.iter_mut()
        {
            let index = def.definition_index();
            def.set_indices(index - previous, index);
            previous = index;
        }
        self.defs = kept;
        orphans
    }

    /// Writes the records; the array must be refreshed.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<(), DexError>
    {
        if !self.is_sorted()
        {
            fail!(kind: Validation, "Definitions must be sorted by index before writing");
        }
        for def in &self.defs
        {
            write_uleb128(buf, def.relative_index());
            def.write_body(buf);
        }
        Ok(())
    }

    /// Merges by key: definitions present in both take over the other's content.
    pub fn merge(&mut self, other: &DefArray<D>)
    {
        for def in other.iter()
        {
            let flags = def.access_flags();
            self.get_or_create(def.key().clone(), flags).merge(def);
        }
    }

    /// Swaps `search` for `replace` in every key and body. Returns the keys that changed as
    /// (old, new) pairs. Nothing changes when a new key would collide with another definition.
    pub fn replace_keys(&mut self, search: &Reference, replace: &Reference) -> Result<Vec<(D::Key, D::Key)>, DexError>
    {
        let renamed: Vec<(usize, D::Key)> =
            self.defs.iter().enumerate().filter_map(|(i, d)| d.replaced_key(search, replace).map(|k| (i, k))).collect();
        for (i, key) in &renamed
        {
            let kept = self.defs.iter().enumerate().any(|(j, d)| d.key() == key && !renamed.iter().any(|(r, _)| *r == j));
            let twice = renamed.iter().any(|(j, k)| j != i && k == key);
            if kept || twice
            {
                fail!(kind: Contract, "Renaming {} onto {} collides with another definition", self.defs[*i].key(), key);
            }
        }
        for def in self.defs.iter_mut()
        {
            def.replace_body_keys(search, replace)?;
        }
        let mut changed = Vec::with_capacity(renamed.len());
        for (i, key) in renamed
        {
            let def = &mut self.defs[i];
            trace!("renaming {} to {}", def.key(), key);
            changed.push((def.key().clone(), key.clone()));
            def.set_key(key);
        }
        Ok(changed)
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        for def in &self.defs
        {
            def.collect_keys(pools);
        }
    }
}

/// Static fields, paired with the class's `encoded_array_item` of initial values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticFieldDefArray
{
    fields: DefArray<FieldDef>,
}

impl Deref for StaticFieldDefArray
{
    type Target = DefArray<FieldDef>;

    fn deref(&self) -> &DefArray<FieldDef>
    {
        &self.fields
    }
}

impl DerefMut for StaticFieldDefArray
{
    fn deref_mut(&mut self) -> &mut DefArray<FieldDef>
    {
        &mut self.fields
    }
}

impl From<DefArray<FieldDef>> for StaticFieldDefArray
{
    fn from(fields: DefArray<FieldDef>) -> Self
    {
        StaticFieldDefArray { fields }
    }
}

impl StaticFieldDefArray
{
    pub fn new() -> StaticFieldDefArray
    {
        StaticFieldDefArray::default()
    }

    /// Pairs value `i` with field `i`; fields past the end of `values` have none.
    pub fn link_static_values(&mut self, values: Option<&EncodedArray>) -> Result<(), DexError>
    {
        let count = values.map_or(0, EncodedArray::len);
        if count > self.fields.len()
        {
            fail!(kind: Validation, "{} static values for {} static fields", count, self.fields.len());
        }
        for (i, field) in self.fields.iter_mut().enumerate()
        {
            field.static_value = values.and_then(|v| v.get(i)).cloned();
        }
        Ok(())
    }

    /// Values in field order, trailing defaults trimmed.
    pub fn static_values(&self) -> EncodedArray
    {
        let mut array = EncodedArray::new(self.fields.iter().map(FieldDef::static_value_or_default).collect());
        array.trim_null();
        array
    }

    /// Explicit values must fit their field types.
    pub fn validate_values(&self) -> Result<(), DexError>
    {
        for field in self.fields.iter()
        {
            if let Some(value) = &field.static_value
            {
                if !value.fits_type(&field.key().field_type)
                {
                    fail!(kind: Validation, "Static value {} does not fit {}", value, field.key());
                }
            }
        }
        Ok(())
    }

    pub fn static_value(&self, key: &FieldKey) -> Option<&EncodedValue>
    {
        self.fields.get_by_key(key).and_then(|f| f.static_value.as_ref())
    }
}
