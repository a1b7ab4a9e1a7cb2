//! `class_data_item`: the field and method definitions of one class.
//!
//! <https://source.android.com/docs/core/runtime/dex-format#class-data-item>

use crate::dex::code_item::{CodeItem, RegistersTable};
use crate::dex::instruction_list::InstructionList;
use crate::dex::instructions::{Ins, Reference};
use crate::dex::item::Item;
use crate::dex::def::{Def, FieldDef, MethodDef};
use crate::dex::def_array::{DefArray, StaticFieldDefArray};
use crate::dex::error::DexError;
use crate::dex::pool::DexPools;
use crate::dex::section::{DataReader, DataWriter};
use crate::dex::{read_uleb128, write_uleb128};
use crate::types::{AccessFlags, FieldKey, MethodKey, ProtoKey, TypeKey};
use log::{debug, trace};

/// The four definition arrays of a class; each exists only once something was put in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassData
{
    static_fields: Option<StaticFieldDefArray>,
    instance_fields: Option<DefArray<FieldDef>>,
    direct_methods: Option<DefArray<MethodDef>>,
    virtual_methods: Option<DefArray<MethodDef>>,
}

impl ClassData
{
    pub fn new() -> ClassData
    {
        ClassData::default()
    }

    pub fn static_fields(&self) -> Option<&StaticFieldDefArray>
    {
        self.static_fields.as_ref()
    }

    pub fn instance_fields(&self) -> Option<&DefArray<FieldDef>>
    {
        self.instance_fields.as_ref()
    }

    pub fn direct_methods(&self) -> Option<&DefArray<MethodDef>>
    {
        self.direct_methods.as_ref()
    }

    pub fn virtual_methods(&self) -> Option<&DefArray<MethodDef>>
    {
        self.virtual_methods.as_ref()
    }

    pub fn static_fields_mut(&mut self) -> Option<&mut StaticFieldDefArray>
    {
        self.static_fields.as_mut()
    }

    pub fn instance_fields_mut(&mut self) -> Option<&mut DefArray<FieldDef>>
    {
        self.instance_fields.as_mut()
    }

    pub fn direct_methods_mut(&mut self) -> Option<&mut DefArray<MethodDef>>
    {
        self.direct_methods.as_mut()
    }

    pub fn virtual_methods_mut(&mut self) -> Option<&mut DefArray<MethodDef>>
    {
        self.virtual_methods.as_mut()
    }

    /// Sizes of the four arrays in stream order.
    pub fn counts(&self) -> [usize; 4]
    {
        [
            self.static_fields.as_ref().map_or(0, |a| a.len()),
            self.instance_fields.as_ref().map_or(0, DefArray::len),
            self.direct_methods.as_ref().map_or(0, DefArray::len),
            self.virtual_methods.as_ref().map_or(0, DefArray::len),
        ]
    }

    pub fn is_empty(&self) -> bool
    {
        self.counts().iter().all(|c| *c == 0)
    }

    pub fn get_or_create_static(&mut self, key: FieldKey) -> &mut FieldDef
    {
        self.static_fields.get_or_insert_with(StaticFieldDefArray::new).get_or_create(key, AccessFlags::STATIC)
    }

    pub fn get_or_create_instance(&mut self, key: FieldKey) -> &mut FieldDef
    {
        self.instance_fields.get_or_insert_with(DefArray::new).get_or_create(key, AccessFlags::empty())
    }

    pub fn get_or_create_direct(&mut self, key: MethodKey) -> &mut MethodDef
    {
        let flags = if key.is_constructor() { AccessFlags::CONSTRUCTOR } else { AccessFlags::PRIVATE };
        self.direct_methods.get_or_insert_with(DefArray::new).get_or_create(key, flags)
    }

    pub fn get_or_create_virtual(&mut self, key: MethodKey) -> &mut MethodDef
    {
        self.virtual_methods.get_or_insert_with(DefArray::new).get_or_create(key, AccessFlags::PUBLIC)
    }

    /// The `<clinit>` of `class_type`; created with a body that only returns when missing.
    pub fn ensure_static_constructor(&mut self, class_type: &TypeKey) -> &mut MethodDef
    {
        let key = MethodKey::new(class_type.descriptor(), "<clinit>", ProtoKey::new(TypeKey::new("V"), Vec::new()));
        let missing = self.get_method(&key).is_none();
        let def = self.get_or_create_direct(key);
        if missing
        {
            debug!("{}: adding a static constructor", class_type);
            def.access_flags = AccessFlags::STATIC | AccessFlags::CONSTRUCTOR;
            let mut body = InstructionList::new();
            body.add(Ins::return_void());
            def.set_code(Some(Item::unique(CodeItem::new(RegistersTable::default(), body))));
        }
        def
    }

    /// Adds a field to the array its STATIC flag selects.
    pub fn add_field(&mut self, def: FieldDef) -> Result<&mut FieldDef, DexError>
    {
        if self.get_field(def.key()).is_some()
        {
            fail!(kind: Contract, "{} is already defined", def.key());
        }
        if def.is_static()
        {
            self.static_fields.get_or_insert_with(StaticFieldDefArray::new).add(def)
        }
        else
        {
            self.instance_fields.get_or_insert_with(DefArray::new).add(def)
        }
    }

    /// Adds a method to the direct or virtual array by its flags.
    pub fn add_method(&mut self, def: MethodDef) -> Result<&mut MethodDef, DexError>
    {
        if self.get_method(def.key()).is_some()
        {
            fail!(kind: Contract, "{} is already defined", def.key());
        }
        if def.is_direct()
        {
            self.direct_methods.get_or_insert_with(DefArray::new).add(def)
        }
        else
        {
            self.virtual_methods.get_or_insert_with(DefArray::new).add(def)
        }
    }

    /// Static fields are searched before instance fields.
    pub fn get_field(&self, key: &FieldKey) -> Option<&FieldDef>
    {
        self.static_fields.as_ref().and_then(|a| a.get_by_key(key))
            .or_else(|| self.instance_fields.as_ref().and_then(|a| a.get_by_key(key)))
    }

    pub fn get_field_mut(&mut self, key: &FieldKey) -> Option<&mut FieldDef>
    {
        if let Some(def) = self.static_fields.as_mut().and_then(|a| a.get_by_key_mut(key))
        {
            return Some(def);
        }
        self.instance_fields.as_mut().and_then(|a| a.get_by_key_mut(key))
    }

    /// Direct methods are searched before virtual ones.
    pub fn get_method(&self, key: &MethodKey) -> Option<&MethodDef>
    {
        self.direct_methods.as_ref().and_then(|a| a.get_by_key(key))
            .or_else(|| self.virtual_methods.as_ref().and_then(|a| a.get_by_key(key)))
    }

    pub fn get_method_mut(&mut self, key: &MethodKey) -> Option<&mut MethodDef>
    {
        if let Some(def) = self.direct_methods.as_mut().and_then(|a| a.get_by_key_mut(key))
        {
            return Some(def);
        }
        self.virtual_methods.as_mut().and_then(|a| a.get_by_key_mut(key))
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef>
    {
        let statics = self.static_fields.iter().flat_map(|a| a.iter());
        statics.chain(self.instance_fields.iter().flat_map(DefArray::iter))
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDef>
    {
        self.direct_methods.iter().flat_map(DefArray::iter).chain(self.virtual_methods.iter().flat_map(DefArray::iter))
    }

    /// Detaches a field; the owning class cleans its side tables.
    pub fn remove_field(&mut self, key: &FieldKey) -> Option<FieldDef>
    {
        if let Some(def) = self.static_fields.as_mut().and_then(|a| a.remove(key))
        {
            return Some(def);
        }
        self.instance_fields.as_mut().and_then(|a| a.remove(key))
    }

    pub fn remove_method(&mut self, key: &MethodKey) -> Option<MethodDef>
    {
        if let Some(def) = self.direct_methods.as_mut().and_then(|a| a.remove(key))
        {
            return Some(def);
        }
        self.virtual_methods.as_mut().and_then(|a| a.remove(key))
    }

    /// Reads the four counts, then the arrays in their fixed order.
    pub fn read(reader: &mut DataReader, off: u32) -> Result<ClassData, DexError>
    {
        let mut ix = off as usize;
        let static_count = read_uleb128(reader.bytes, &mut ix)?;
        let instance_count = read_uleb128(reader.bytes, &mut ix)?;
        let direct_count = read_uleb128(reader.bytes, &mut ix)?;
        let virtual_count = read_uleb128(reader.bytes, &mut ix)?;
        trace!("class_data_item at 0x{:x}: {} {} {} {}", off, static_count, instance_count, direct_count, virtual_count);

        let mut data = ClassData::new();
        if static_count > 0
        {
            let fields = DefArray::read(reader, &mut ix, static_count).map_err(|e| err!(e, "static fields"))?;
            data.static_fields = Some(StaticFieldDefArray::from(fields));
        }
        if instance_count > 0
        {
            data.instance_fields = Some(DefArray::read(reader, &mut ix, instance_count).map_err(|e| err!(e, "instance fields"))?);
        }
        if direct_count > 0
        {
            data.direct_methods = Some(DefArray::read(reader, &mut ix, direct_count).map_err(|e| err!(e, "direct methods"))?);
        }
        if virtual_count > 0
        {
            data.virtual_methods = Some(DefArray::read(reader, &mut ix, virtual_count).map_err(|e| err!(e, "virtual methods"))?);
        }
        Ok(data)
    }

    /// Swaps `search` for `replace` in every definition. Returns the renamed field and method
    /// keys as (old, new) pairs.
    pub fn replace_keys(&mut self, search: &Reference, replace: &Reference) -> Result<(Vec<(FieldKey, FieldKey)>, Vec<(MethodKey, MethodKey)>), DexError>
    {
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        if let Some(a) = self.static_fields.as_mut()
        {
            fields.extend(a.replace_keys(search, replace)?);
        }
        if let Some(a) = self.instance_fields.as_mut()
        {
            fields.extend(a.replace_keys(search, replace)?);
        }
        for a in [self.direct_methods.as_mut(), self.virtual_methods.as_mut()].into_iter().flatten()
        {
            methods.extend(a.replace_keys(search, replace)?);
        }
        Ok((fields, methods))
    }

    /// Sorts and re-indexes every array and moves debug info of edited code along with its
    /// instructions. Returns the keys of definitions dropped as orphans.
    pub fn refresh(&mut self, pools: &DexPools) -> (Vec<FieldKey>, Vec<MethodKey>)
    {
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        if let Some(a) = self.static_fields.as_mut()
        {
            fields.extend(a.refresh(pools).into_iter().map(|d| d.key().clone()));
        }
        if let Some(a) = self.instance_fields.as_mut()
        {
            fields.extend(a.refresh(pools).into_iter().map(|d| d.key().clone()));
        }
        for a in [self.direct_methods.as_mut(), self.virtual_methods.as_mut()].into_iter().flatten()
        {
            methods.extend(a.refresh(pools).into_iter().map(|d| d.key().clone()));
            for def in a.iter_mut()
            {
                if def.code_item().map_or(false, |c| !c.is_shared())
                {
                    if let Some(code) = def.edit_code()
                    {
                        code.refresh();
                    }
                }
            }
        }
        (fields, methods)
    }

    /// Writes the debug info of every method body.
    pub fn place_debug_info(&self, w: &mut DataWriter, pools: &DexPools) -> Result<(), DexError>
    {
        for def in self.methods()
        {
            if let Some(code) = def.code()
            {
                code.place_debug_info(w, pools).map_err(|e| err!(e, "debug info of {}", def.key()))?;
            }
        }
        Ok(())
    }

    /// Places every method's code item and records its offset for [`ClassData::write`].
    pub fn place_code(&mut self, w: &mut DataWriter, pools: &DexPools) -> Result<(), DexError>
    {
        for a in [self.direct_methods.as_mut(), self.virtual_methods.as_mut()].into_iter().flatten()
        {
            for def in a.iter_mut()
            {
                def.code_offset = match def.code()
                {
                    Some(code) => code.place(w, pools).map_err(|e| err!(e, "code of {}", def.key()))?,
                    None => 0,
                };
            }
        }
        Ok(())
    }

    /// Writes the item; arrays must be refreshed and code placed.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<(), DexError>
    {
        for count in self.counts()
        {
            write_uleb128(buf, count as u32);
        }
        if let Some(a) = &self.static_fields
        {
            a.write(buf)?;
        }
        if let Some(a) = &self.instance_fields
        {
            a.write(buf)?;
        }
        for a in [&self.direct_methods, &self.virtual_methods].into_iter().flatten()
        {
            a.write(buf)?;
        }
        Ok(())
    }

    /// Merges each array the other side has; definitions with the same key are overwritten.
    pub fn merge(&mut self, other: &ClassData)
    {
        if let Some(a) = &other.static_fields
        {
            self.static_fields.get_or_insert_with(StaticFieldDefArray::new).merge(a);
        }
        if let Some(a) = &other.instance_fields
        {
            self.instance_fields.get_or_insert_with(DefArray::new).merge(a);
        }
        if let Some(a) = &other.direct_methods
        {
            self.direct_methods.get_or_insert_with(DefArray::new).merge(a);
        }
        if let Some(a) = &other.virtual_methods
        {
            self.virtual_methods.get_or_insert_with(DefArray::new).merge(a);
        }
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        if let Some(a) = &self.static_fields
        {
            a.collect_keys(pools);
        }
        if let Some(a) = &self.instance_fields
        {
            a.collect_keys(pools);
        }
        for a in [&self.direct_methods, &self.virtual_methods].into_iter().flatten()
        {
            a.collect_keys(pools);
        }
    }
}
