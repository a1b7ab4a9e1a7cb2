//! `class_def_item` and everything a class owns through it.
//!
//! A class reaches its annotations, its static values and its hidden api flags through side
//! tables keyed by definition index or by position. Every mutation made through [`ClassDef`]
//! keeps those tables consistent with the class data; [`ClassDef::refresh`] re-sorts them all
//! before writing.
//!
//! <https://source.android.com/docs/core/runtime/dex-format#class-def-item>

use crate::dex::annotations::{AnnotationSet, AnnotationsDirectory};
use crate::dex::class_data::ClassData;
use crate::dex::code_item::CodeItem;
use crate::dex::def::{Def, FieldDef, MethodDef, Parameter};
use crate::dex::encoded_values::{EncodedArray, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::hidden_api::HiddenApiData;
use crate::dex::instructions::Reference;
use crate::dex::item::Item;
use crate::dex::pool::{write_type_list, DexPools};
use crate::dex::section::{
    DataReader, DataWriter, TYPE_ANNOTATIONS_DIRECTORY_ITEM, TYPE_ANNOTATION_ITEM, TYPE_ANNOTATION_SET_ITEM,
    TYPE_ANNOTATION_SET_REF_LIST, TYPE_CLASS_DATA_ITEM, TYPE_CODE_ITEM, TYPE_DEBUG_INFO_ITEM, TYPE_ENCODED_ARRAY_ITEM,
    TYPE_TYPE_LIST,
};
use crate::dex::{read_u2, read_u4, write_u4, DexOptions};
use crate::types::{AccessFlags, FieldKey, MethodKey, TypeKey};
use log::{debug, trace};

pub const NO_INDEX: u32 = 0xffff_ffff;

/// Size of one `class_def_item`.
pub const CLASS_DEF_SIZE: usize = 32;

#[derive(Debug, PartialEq)]
pub struct ClassDef
{
    class_type: TypeKey,
    pub access_flags: AccessFlags,
    pub superclass: Option<TypeKey>,
    pub interfaces: Vec<TypeKey>,
    pub source_file: Option<String>,
    annotations: Option<AnnotationsDirectory>,
    class_data: Option<ClassData>,
    static_values: Option<Item<EncodedArray>>,
    hidden_api: Option<HiddenApiData>,
}

/// Offsets of the data items of one class, as placed by [`ClassDef::place`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassDefOffsets
{
    pub interfaces: u32,
    pub annotations: u32,
    pub class_data: u32,
    pub static_values: u32,
}

/// A clone owns its hidden api flags; setting them never reaches the original.
impl Clone for ClassDef
{
    fn clone(&self) -> Self
    {
        let mut class_data = self.class_data.clone();
        let hidden_api = match &self.hidden_api
        {
            Some(_) => Some(HiddenApiData::adopt(class_data.get_or_insert_with(ClassData::new))),
            None => None,
        };
        ClassDef {
            class_type: self.class_type.clone(),
            access_flags: self.access_flags,
            superclass: self.superclass.clone(),
            interfaces: self.interfaces.clone(),
            source_file: self.source_file.clone(),
            annotations: self.annotations.clone(),
            class_data,
            static_values: self.static_values.clone(),
            hidden_api,
        }
    }
}

impl ClassDef
{
    pub fn new(class_type: TypeKey, access_flags: AccessFlags) -> ClassDef
    {
        ClassDef {
            class_type,
            access_flags,
            superclass: Some(TypeKey::new("Ljava/lang/Object;")),
            interfaces: Vec::new(),
            source_file: None,
            annotations: None,
            class_data: None,
            static_values: None,
            hidden_api: None,
        }
    }

    pub fn class_type(&self) -> &TypeKey
    {
        &self.class_type
    }

    pub fn class_data(&self) -> Option<&ClassData>
    {
        self.class_data.as_ref()
    }

    /// Mutable class data for edits that do not touch membership.
    pub fn class_data_mut(&mut self) -> &mut ClassData
    {
        self.class_data.get_or_insert_with(ClassData::new)
    }

    pub fn annotations(&self) -> Option<&AnnotationsDirectory>
    {
        self.annotations.as_ref()
    }

    pub fn annotations_mut(&mut self) -> &mut AnnotationsDirectory
    {
        self.annotations.get_or_insert_with(AnnotationsDirectory::new)
    }

    pub fn hidden_api(&self) -> Option<&HiddenApiData>
    {
        self.hidden_api.as_ref()
    }

    /// Attaches hidden api flags and binds them position by position to the definitions. A
    /// copy view that does not fit the class data is made unique first.
    pub fn set_hidden_api(&mut self, data: Option<HiddenApiData>) -> Result<(), DexError>
    {
        self.hidden_api = data;
        if let Some(api) = self.hidden_api.as_mut()
        {
            let data = self.class_data.get_or_insert_with(ClassData::new);
            if api.is_copy() && !api.fits_class_data(data)
            {
                api.make_unique(data)?;
            }
            else
            {
                api.link_class_data(data)?;
            }
        }
        Ok(())
    }

    /// Gives a copy view cells of its own, so it no longer follows its source.
    pub fn detach_hidden_api(&mut self) -> Result<(), DexError>
    {
        if let Some(api) = self.hidden_api.as_mut()
        {
            let data = self.class_data.get_or_insert_with(ClassData::new);
            api.make_unique(data)?;
        }
        Ok(())
    }

    /// Flags of one definition; classes without hidden api data have none.
    pub fn hidden_api_flags(&self, key: &MethodKey) -> Option<u32>
    {
        self.hidden_api.as_ref()?;
        self.class_data()?.get_method(key).map(Def::hidden_api_flags)
    }

    pub fn field_hidden_api_flags(&self, key: &FieldKey) -> Option<u32>
    {
        self.hidden_api.as_ref()?;
        self.class_data()?.get_field(key).map(Def::hidden_api_flags)
    }

    /// Sets the flags of a definition, creating hidden api data for the class when missing.
    pub fn set_method_hidden_api_flags(&mut self, key: &MethodKey, value: u32) -> Result<(), DexError>
    {
        self.ensure_hidden_api()?;
        match self.class_data.as_mut().and_then(|d| d.get_method_mut(key))
        {
            Some(def) => def.set_hidden_api_flags(value),
            None => fail!(kind: Contract, "{} is not defined in {}", key, self.class_type),
        }
        Ok(())
    }

    pub fn set_field_hidden_api_flags(&mut self, key: &FieldKey, value: u32) -> Result<(), DexError>
    {
        self.ensure_hidden_api()?;
        match self.class_data.as_mut().and_then(|d| d.get_field_mut(key))
        {
            Some(def) => def.set_hidden_api_flags(value),
            None => fail!(kind: Contract, "{} is not defined in {}", key, self.class_type),
        }
        Ok(())
    }

    fn ensure_hidden_api(&mut self) -> Result<(), DexError>
    {
        if self.hidden_api.is_none()
        {
            self.set_hidden_api(Some(HiddenApiData::new()))?;
        }
        Ok(())
    }

    fn relink_hidden_api(&mut self) -> Result<(), DexError>
    {
        if let Some(api) = self.hidden_api.as_mut()
        {
            let data = self.class_data.get_or_insert_with(ClassData::new);
            if api.is_copy() && !api.matches_class_data(data)
            {
                api.make_unique(data)?;
            }
            else
            {
                api.link_class_data(data)?;
            }
        }
        Ok(())
    }

    pub fn static_values(&self) -> Option<&EncodedArray>
    {
        self.static_values.as_ref().map(Item::get)
    }

    pub fn static_values_item(&self) -> Option<&Item<EncodedArray>>
    {
        self.static_values.as_ref()
    }

    /// Replaces the class's static values and pairs them with the static fields.
    pub fn set_static_values(&mut self, values: Option<Item<EncodedArray>>) -> Result<(), DexError>
    {
        self.static_values = values;
        self.link_static_values()
    }

    /// Pairs value `i` of the static values with static field `i`.
    pub fn link_static_values(&mut self) -> Result<(), DexError>
    {
        let values = self.static_values.as_ref().map(Item::get);
        match self.class_data.as_mut().and_then(ClassData::static_fields_mut)
        {
            Some(fields) => fields.link_static_values(values).map_err(|e| err!(e, "static values of {}", self.class_type)),
            None if values.map_or(true, EncodedArray::is_empty) => Ok(()),
            None => fail!(kind: Validation, "{} has static values but no static fields", self.class_type),
        }
    }

    /// Like [`ClassDef::link_static_values`], after taking a private copy of shared values.
    pub fn link_unique_static_values(&mut self) -> Result<(), DexError>
    {
        if let Some(values) = self.static_values.as_mut()
        {
            if values.is_shared()
            {
                debug!("copy-on-write: static values of {}", self.class_type);
            }
            values.edit();
        }
        self.link_static_values()
    }

    pub fn static_value(&self, key: &FieldKey) -> Option<&EncodedValue>
    {
        self.class_data()?.static_fields()?.static_value(key)
    }

    /// Sets the initial value of a static field.
    pub fn set_static_value(&mut self, key: &FieldKey, value: Option<EncodedValue>) -> Result<(), DexError>
    {
        self.link_unique_static_values()?;
        let field = match self.class_data.as_mut().and_then(ClassData::static_fields_mut).and_then(|a| a.get_by_key_mut(key))
        {
            Some(field) => field,
            None => fail!(kind: Contract, "{} is not a static field of {}", key, self.class_type),
        };
        if let Some(v) = &value
        {
            if !v.fits_type(&key.field_type)
            {
                fail!(kind: Validation, "Static value {} does not fit {}", v, key);
            }
        }
        field.static_value = value;
        self.sync_static_values(false)
    }

    /// Rebuilds the static values from the fields, keeping the current item when nothing
    /// changed.
    fn sync_static_values(&mut self, validate: bool) -> Result<(), DexError>
    {
        let array = match self.class_data.as_ref().and_then(ClassData::static_fields)
        {
            Some(fields) => {
                if validate
                {
                    fields.validate_values().map_err(|e| err!(e, "{}", self.class_type))?;
                }
                fields.static_values()
            }
            None => EncodedArray::default(),
        };
        if array.is_empty()
        {
            self.static_values = None;
            return Ok(());
        }
        if self.static_values.as_ref().map_or(true, |v| v.get() != &array)
        {
            trace!("static values of {} rebuilt with {} entries", self.class_type, array.len());
            self.static_values = Some(Item::unique(array));
        }
        Ok(())
    }

    pub fn get_or_create_static(&mut self, key: FieldKey) -> Result<&mut FieldDef, DexError>
    {
        self.check_member(&key.declaring)?;
        let created = self.class_data().and_then(|d| d.get_field(&key)).is_none();
        if created
        {
            self.class_data_mut().get_or_create_static(key.clone());
            self.after_static_fields_changed()?;
        }
        self.expect_field(&key)
    }

    pub fn get_or_create_instance(&mut self, key: FieldKey) -> Result<&mut FieldDef, DexError>
    {
        self.check_member(&key.declaring)?;
        if self.class_data().and_then(|d| d.get_field(&key)).is_none()
        {
            self.class_data_mut().get_or_create_instance(key.clone());
            self.relink_hidden_api()?;
        }
        self.expect_field(&key)
    }

    pub fn get_or_create_direct(&mut self, key: MethodKey) -> Result<&mut MethodDef, DexError>
    {
        self.check_member(&key.declaring)?;
        if self.class_data().and_then(|d| d.get_method(&key)).is_none()
        {
            self.class_data_mut().get_or_create_direct(key.clone());
            self.relink_hidden_api()?;
        }
        self.expect_method(&key)
    }

    pub fn get_or_create_virtual(&mut self, key: MethodKey) -> Result<&mut MethodDef, DexError>
    {
        self.check_member(&key.declaring)?;
        if self.class_data().and_then(|d| d.get_method(&key)).is_none()
        {
            self.class_data_mut().get_or_create_virtual(key.clone());
            self.relink_hidden_api()?;
        }
        self.expect_method(&key)
    }

    pub fn add_field(&mut self, def: FieldDef) -> Result<(), DexError>
    {
        self.check_member(&def.key().declaring)?;
        let is_static = def.is_static();
        self.class_data_mut().add_field(def)?;
        if is_static
        {
            self.after_static_fields_changed()
        }
        else
        {
            self.relink_hidden_api()
        }
    }

    pub fn add_method(&mut self, def: MethodDef) -> Result<(), DexError>
    {
        self.check_member(&def.key().declaring)?;
        self.class_data_mut().add_method(def)?;
        self.relink_hidden_api()
    }

    pub fn get_field(&self, key: &FieldKey) -> Option<&FieldDef>
    {
        self.class_data()?.get_field(key)
    }

    pub fn get_method(&self, key: &MethodKey) -> Option<&MethodDef>
    {
        self.class_data()?.get_method(key)
    }

    fn check_member(&self, declaring: &TypeKey) -> Result<(), DexError>
    {
        if declaring != &self.class_type
        {
            fail!(kind: Contract, "A member of {} cannot be defined in {}", declaring, self.class_type);
        }
        Ok(())
    }

    fn expect_field(&mut self, key: &FieldKey) -> Result<&mut FieldDef, DexError>
    {
        match self.class_data.as_mut().and_then(|d| d.get_field_mut(key))
        {
            Some(def) => Ok(def),
            None => fail!(kind: Contract, "{} is not defined", key),
        }
    }

    fn expect_method(&mut self, key: &MethodKey) -> Result<&mut MethodDef, DexError>
    {
        match self.class_data.as_mut().and_then(|d| d.get_method_mut(key))
        {
            Some(def) => Ok(def),
            None => fail!(kind: Contract, "{} is not defined", key),
        }
    }

    /// Static values are positional, so any change in the static fields moves them.
    fn after_static_fields_changed(&mut self) -> Result<(), DexError>
    {
        self.sync_static_values(false)?;
        self.relink_hidden_api()
    }

    /// Removes a field together with its annotations, hidden api flag and static value.
    pub fn remove_field(&mut self, key: &FieldKey) -> Result<Option<FieldDef>, DexError>
    {
        let removed = match self.class_data.as_mut().and_then(|d| d.remove_field(key))
        {
            Some(def) => def,
            None => return Ok(None),
        };
        if let Some(dir) = self.annotations.as_mut()
        {
            let pruned = dir.remove_field(key);
            if pruned > 0
            {
                debug!("{}: dropped {} annotation sets of {}", self.class_type, pruned, key);
            }
        }
        if removed.is_static()
        {
            self.after_static_fields_changed()?;
        }
        else
        {
            self.relink_hidden_api()?;
        }
        Ok(Some(removed))
    }

    /// Removes a method together with its annotations, parameter annotations and hidden api flag.
    pub fn remove_method(&mut self, key: &MethodKey) -> Result<Option<MethodDef>, DexError>
    {
        let removed = match self.class_data.as_mut().and_then(|d| d.remove_method(key))
        {
            Some(def) => def,
            None => return Ok(None),
        };
        if let Some(dir) = self.annotations.as_mut()
        {
            let pruned = dir.remove_method(key);
            if pruned > 0
            {
                debug!("{}: dropped {} annotation entries of {}", self.class_type, pruned, key);
            }
        }
        self.relink_hidden_api()?;
        Ok(Some(removed))
    }

    /// The method's code, copied first when it is shared with other methods.
    pub fn edit_code(&mut self, key: &MethodKey) -> Result<&mut CodeItem, DexError>
    {
        let class_type = &self.class_type;
        let method = match self.class_data.as_mut().and_then(|d| d.get_method_mut(key))
        {
            Some(method) => method,
            None => fail!(kind: Contract, "{} is not defined in {}", key, class_type),
        };
        match method.edit_code()
        {
            Some(code) => Ok(code),
            None => fail!(kind: Contract, "{} has no code", key),
        }
    }

    /// The `<clinit>` of the class, created with an empty body when missing.
    pub fn ensure_static_constructor(&mut self) -> Result<&mut MethodDef, DexError>
    {
        let class_type = self.class_type.clone();
        let key = self.class_data_mut().ensure_static_constructor(&class_type).key().clone();
        self.relink_hidden_api()?;
        self.expect_method(&key)
    }

    /// The declared parameters of a method, with their annotations.
    pub fn get_parameters(&self, key: &MethodKey) -> Result<Vec<Parameter<'_>>, DexError>
    {
        let method = match self.get_method(key)
        {
            Some(m) => m,
            None => fail!(kind: Contract, "{} is not defined in {}", key, self.class_type),
        };
        let mut parameters = method.parameters();
        for p in parameters.iter_mut()
        {
            p.annotations = self.get_parameter_annotations(key, p.index)?;
        }
        Ok(parameters)
    }

    /// Drops parameter `index` from a method: its annotations, its debug name and its type in
    /// the method key. Returns the new key. The body keeps its registers as they are.
    pub fn remove_parameter(&mut self, key: &MethodKey, index: usize) -> Result<MethodKey, DexError>
    {
        if index >= key.parameters_count()
        {
            fail!(kind: Contract, "Parameter {} out of range for {}", index, key);
        }
        let new_key = key.remove_parameter(index);
        if self.get_method(&new_key).is_some()
        {
            fail!(kind: Contract, "Removing parameter {} of {} collides with {}", index, key, new_key);
        }
        let method = self.expect_method(key)?;
        let named = method.code().and_then(CodeItem::debug_info).map_or(false, |d| index < d.parameter_names.len());
        if named
        {
            if let Some(code) = method.edit_code()
            {
                code.remove_debug_parameter(index);
            }
        }
        method.set_key(new_key.clone());
        if let Some(dir) = self.annotations.as_mut()
        {
            dir.remove_parameter(key, index);
            dir.rename_method(key, &new_key);
        }
        debug!("{}: removed parameter {} of {}", self.class_type, index, key);
        Ok(new_key)
    }

    /// Swaps `search` for `replace` throughout the class: its own types, the member keys, the
    /// code and the annotation tables keyed by members. Annotation contents and static values
    /// are left as they are.
    pub fn replace_keys(&mut self, search: &Reference, replace: &Reference) -> Result<(), DexError>
    {
        let (fields, methods) = match self.class_data.as_mut()
        {
            Some(data) => data.replace_keys(search, replace)?,
            None => (Vec::new(), Vec::new()),
        };
        if let (Reference::Type(from), Reference::Type(to)) = (search, replace)
        {
            let swap = |t: &mut TypeKey| {
                if *t == *from
                {
                    *t = to.clone();
                }
            };
            swap(&mut self.class_type);
            if let Some(t) = self.superclass.as_mut()
            {
                swap(t);
            }
            for t in self.interfaces.iter_mut()
            {
                swap(t);
            }
        }
        if let Some(dir) = self.annotations.as_mut()
        {
            for (old, new) in &fields
            {
                dir.rename_field(old, new);
            }
            for (old, new) in &methods
            {
                dir.rename_method(old, new);
            }
        }
        if !fields.is_empty() || !methods.is_empty()
        {
            debug!("{}: renamed {} fields and {} methods", self.class_type, fields.len(), methods.len());
        }
        Ok(())
    }

    pub fn get_or_create_class_annotations(&mut self) -> &mut AnnotationSet
    {
        let context = self.class_type.clone();
        self.annotations_mut().get_or_create_class_annotations(&context)
    }

    pub fn get_fields_annotation(&self, key: &FieldKey) -> Vec<&AnnotationSet>
    {
        self.annotations.as_ref().map_or_else(Vec::new, |d| d.get_fields_annotation(key))
    }

    pub fn get_methods_annotation(&self, key: &MethodKey) -> Vec<&AnnotationSet>
    {
        self.annotations.as_ref().map_or_else(Vec::new, |d| d.get_methods_annotation(key))
    }

    pub fn get_parameter_annotations(&self, key: &MethodKey, parameter: usize) -> Result<Option<&AnnotationSet>, DexError>
    {
        match &self.annotations
        {
            Some(dir) => dir.get_parameter_annotations(key, parameter),
            None if parameter < key.parameters_count() => Ok(None),
            None => fail!(kind: Contract, "Parameter {} out of range for {}", parameter, key),
        }
    }

    /// Attaches a set to a field; a set built for another class is copied in.
    pub fn add_field_annotations(&mut self, key: &FieldKey, set: Item<AnnotationSet>) -> Result<(), DexError>
    {
        let index = self.field_index(key)?;
        let context = self.class_type.clone();
        self.annotations_mut().add_field_annotations(key, index, set, &context);
        Ok(())
    }

    pub fn get_or_create_field_annotations(&mut self, key: &FieldKey) -> Result<&mut AnnotationSet, DexError>
    {
        let index = self.field_index(key)?;
        let context = self.class_type.clone();
        Ok(self.annotations_mut().get_or_create_field_annotations(key, index, &context))
    }

    pub fn add_method_annotations(&mut self, key: &MethodKey, set: Item<AnnotationSet>) -> Result<(), DexError>
    {
        let index = self.method_index(key)?;
        let context = self.class_type.clone();
        self.annotations_mut().add_method_annotations(key, index, set, &context);
        Ok(())
    }

    pub fn get_or_create_method_annotations(&mut self, key: &MethodKey) -> Result<&mut AnnotationSet, DexError>
    {
        let index = self.method_index(key)?;
        let context = self.class_type.clone();
        Ok(self.annotations_mut().get_or_create_method_annotations(key, index, &context))
    }

    pub fn get_or_create_parameter_annotations(&mut self, key: &MethodKey, parameter: usize) -> Result<&mut AnnotationSet, DexError>
    {
        let index = self.method_index(key)?;
        let context = self.class_type.clone();
        self.annotations_mut().get_or_create_parameter_annotations(key, index, parameter, &context)
    }

    fn field_index(&self, key: &FieldKey) -> Result<u32, DexError>
    {
        match self.get_field(key)
        {
            Some(def) => Ok(def.definition_index()),
            None => fail!(kind: Contract, "{} is not defined in {}", key, self.class_type),
        }
    }

    fn method_index(&self, key: &MethodKey) -> Result<u32, DexError>
    {
        match self.get_method(key)
        {
            Some(def) => Ok(def.definition_index()),
            None => fail!(kind: Contract, "{} is not defined in {}", key, self.class_type),
        }
    }

    /// Binds directory entries read by index to the definitions now holding those indices.
    fn link_annotations(&mut self)
    {
        let (dir, data) = match (self.annotations.as_mut(), self.class_data.as_ref())
        {
            (Some(dir), Some(data)) => (dir, data),
            (Some(dir), None) => {
                dir.warn_unlinked(&self.class_type);
                return;
            }
            _ => return,
        };
        for def in data.fields()
        {
            dir.link_field(def.key(), def.definition_index());
        }
        for def in data.methods()
        {
            dir.link_method(def.key(), def.definition_index());
        }
        dir.warn_unlinked(&self.class_type);
    }

    /// Takes over the members and annotations of `other`; members with the same key are
    /// overwritten.
    pub fn merge(&mut self, other: &ClassDef) -> Result<(), DexError>
    {
        if let Some(data) = &other.class_data
        {
            self.class_data_mut().merge(data);
        }
        if let Some(dir) = &other.annotations
        {
            let context = self.class_type.clone();
            self.annotations_mut().merge(dir, &context);
        }
        if other.hidden_api.is_some()
        {
            self.ensure_hidden_api()?;
        }
        self.sync_static_values(false)?;
        self.relink_hidden_api()
    }

    /// Sorts the class data, re-indexes and prunes the annotation tables, rebuilds the static
    /// values and realigns the hidden api flags.
    pub fn refresh(&mut self, pools: &DexPools, options: &DexOptions) -> Result<(), DexError>
    {
        if let Some(data) = self.class_data.as_mut()
        {
            let (fields, methods) = data.refresh(pools);
            if let Some(dir) = self.annotations.as_mut()
            {
                for k in &fields
                {
                    dir.remove_field(k);
                }
                for k in &methods
                {
                    dir.remove_method(k);
                }
            }
        }
        if let Some(dir) = self.annotations.as_mut()
        {
            let data = self.class_data.as_ref();
            dir.refresh(
                |k| data.and_then(|d| d.get_field(&pools.fields.get_replace(k))).map(|d| (d.key().clone(), d.definition_index())),
                |k| data.and_then(|d| d.get_method(&pools.methods.get_replace(k))).map(|d| (d.key().clone(), d.definition_index())),
            );
            if options.prune_empty_directories && dir.is_empty()
            {
                debug!("{}: dropping empty annotations directory", self.class_type);
                self.annotations = None;
            }
        }
        self.sync_static_values(options.validate_static_values)?;
        self.relink_hidden_api()
    }

    pub fn collect_keys(&self, pools: &mut DexPools)
    {
        pools.intern_type(&self.class_type);
        if let Some(t) = &self.superclass
        {
            pools.intern_type(t);
        }
        for t in &self.interfaces
        {
            pools.intern_type(t);
        }
        if let Some(s) = &self.source_file
        {
            pools.intern_string(s);
        }
        if let Some(data) = &self.class_data
        {
            data.collect_keys(pools);
        }
        if let Some(dir) = &self.annotations
        {
            dir.collect_keys(pools);
        }
        if let Some(values) = &self.static_values
        {
            values.collect_keys(pools);
        }
    }

    /// Reads the `class_def_item` at `ix` and every data item it points at.
    pub fn read(reader: &mut DataReader, ix: &mut usize) -> Result<ClassDef, DexError>
    {
        let bytes = reader.bytes;
        let class_idx = read_u4(bytes, ix)?;
        let class_type = reader.pools.types.at(class_idx)?.clone();
        let access_flags = AccessFlags::from_raw(read_u4(bytes, ix)?);
        let superclass_idx = read_u4(bytes, ix)?;
        let interfaces_off = read_u4(bytes, ix)?;
        let source_file_idx = read_u4(bytes, ix)?;
        let annotations_off = read_u4(bytes, ix)?;
        let class_data_off = read_u4(bytes, ix)?;
        let static_values_off = read_u4(bytes, ix)?;
        trace!("class_def_item {} data at 0x{:x}", class_type, class_data_off);

        let mut class = ClassDef::new(class_type, access_flags);
        class.superclass = match superclass_idx
        {
            NO_INDEX => None,
            i => Some(reader.pools.types.at(i)?.clone()),
        };
        if source_file_idx != NO_INDEX
        {
            class.source_file = Some(reader.pools.strings.at(source_file_idx)?.clone());
        }
        let context = class.class_type.clone();
        class.read_items(reader, interfaces_off, annotations_off, class_data_off, static_values_off)
            .map_err(|e| err!(e, "class {}", context))?;
        Ok(class)
    }

    fn read_items(&mut self, reader: &mut DataReader, interfaces_off: u32, annotations_off: u32, class_data_off: u32, static_values_off: u32) -> Result<(), DexError>
    {
        if interfaces_off != 0
        {
            let mut at = interfaces_off as usize;
            let size = read_u4(reader.bytes, &mut at)?;
            for _ in 0..size
            {
                let index = read_u2(reader.bytes, &mut at)?;
                self.interfaces.push(reader.pools.types.at(index as u32)?.clone());
            }
        }
        if class_data_off != 0
        {
            self.class_data = Some(ClassData::read(reader, class_data_off)?);
        }
        if static_values_off != 0
        {
            let values = Item::shared(reader.encoded_array(static_values_off)?);
            self.set_static_values(Some(values))?;
        }
        if annotations_off != 0
        {
            self.annotations = Some(AnnotationsDirectory::read(reader, annotations_off)?);
            self.link_annotations();
        }
        Ok(())
    }

    /// Writes the class's data items of one map kind, recording the offsets its
    /// `class_def_item` needs. Kinds must come in dependency order across all classes, and the
    /// class must be refreshed against `pools`.
    pub fn place(&mut self, item_type: u16, w: &mut DataWriter, pools: &DexPools, offsets: &mut ClassDefOffsets) -> Result<(), DexError>
    {
        match item_type
        {
            TYPE_TYPE_LIST if !self.interfaces.is_empty() => {
                let mut indices = Vec::with_capacity(self.interfaces.len());
                for t in &self.interfaces
                {
                    let index = pools.type_index(t)?;
                    if index > u16::MAX as u32
                    {
                        fail!(kind: Validation, "Interface {} has type index {} past 0xffff", t, index);
                    }
                    indices.push(index as u16);
                }
                offsets.interfaces = w.append(4, |buf| {
                    write_type_list(buf, &indices);
                    Ok(())
                })?;
            }
            TYPE_DEBUG_INFO_ITEM => {
                if let Some(data) = &self.class_data
                {
                    data.place_debug_info(w, pools)?;
                }
            }
            TYPE_CODE_ITEM => {
                if let Some(data) = self.class_data.as_mut()
                {
                    data.place_code(w, pools)?;
                }
            }
            TYPE_ANNOTATION_ITEM | TYPE_ANNOTATION_SET_ITEM | TYPE_ANNOTATION_SET_REF_LIST => {
                if let Some(dir) = self.annotations.as_ref().filter(|d| !d.is_empty())
                {
                    dir.place(item_type, w, pools)?;
                }
            }
            TYPE_ANNOTATIONS_DIRECTORY_ITEM => {
                if let Some(dir) = self.annotations.as_ref().filter(|d| !d.is_empty())
                {
                    offsets.annotations = dir.write(w)?;
                }
            }
            TYPE_ENCODED_ARRAY_ITEM => {
                if let Some(values) = &self.static_values
                {
                    offsets.static_values = w.place(values.get(), 1, |v, buf| v.write(buf, pools).map(|_| ()))?;
                }
            }
            TYPE_CLASS_DATA_ITEM => {
                if let Some(data) = self.class_data.as_ref().filter(|d| !d.is_empty())
                {
                    offsets.class_data = w.append(1, |buf| data.write(buf))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Writes the fixed-size `class_def_item`.
    pub fn write(&self, buf: &mut Vec<u8>, offsets: &ClassDefOffsets, pools: &DexPools) -> Result<(), DexError>
    {
        write_u4(buf, pools.type_index(&self.class_type)?);
        write_u4(buf, self.access_flags.bits());
        write_u4(buf, match &self.superclass
        {
            Some(t) => pools.type_index(t)?,
            None => NO_INDEX,
        });
        write_u4(buf, offsets.interfaces);
        write_u4(buf, match &self.source_file
        {
            Some(s) => pools.string_index(s)?,
            None => NO_INDEX,
        });
        write_u4(buf, offsets.annotations);
        write_u4(buf, offsets.class_data);
        write_u4(buf, offsets.static_values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::annotations::AnnotationVisibility;
    use crate::dex::ErrorKind;

    fn class() -> ClassDef {
        ClassDef::new(TypeKey::new("Lfoo;"), AccessFlags::PUBLIC)
    }

    fn field(name: &str, t: &str) -> FieldKey {
        FieldKey::new("Lfoo;", name, t)
    }

    #[test]
    fn members_must_belong_to_the_class() {
        let mut c = class();
        let e = c.get_or_create_static(FieldKey::new("Lbar;", "X", "I")).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Contract);
    }

    #[test]
    fn static_values_follow_fields() {
        let mut c = class();
        c.get_or_create_static(field("a", "I")).unwrap();
        c.get_or_create_static(field("b", "I")).unwrap();
        assert!(c.static_values().is_none());

        c.set_static_value(&field("a", "I"), Some(EncodedValue::Int(5))).unwrap();
        assert_eq!(c.static_values().unwrap().len(), 1);
        assert!(c.set_static_value(&field("b", "I"), Some(EncodedValue::Long(1))).is_err());

        c.remove_field(&field("a", "I")).unwrap();
        assert!(c.static_values().is_none());
    }

    #[test]
    fn shared_static_values_are_copied_before_editing() {
        let shared = std::rc::Rc::new(EncodedArray::new(vec![EncodedValue::Int(1)]));
        let mut a = class();
        let mut b = class();
        a.get_or_create_static(field("X", "I")).unwrap();
        b.get_or_create_static(field("X", "I")).unwrap();
        a.set_static_values(Some(Item::shared(shared.clone()))).unwrap();
        b.set_static_values(Some(Item::shared(shared.clone()))).unwrap();

        a.set_static_value(&field("X", "I"), Some(EncodedValue::Int(9))).unwrap();
        assert_eq!(shared.get(0), Some(&EncodedValue::Int(1)));
        assert_eq!(b.static_value(&field("X", "I")), Some(&EncodedValue::Int(1)));
        assert_eq!(a.static_value(&field("X", "I")), Some(&EncodedValue::Int(9)));
    }

    #[test]
    fn removing_a_method_drops_its_annotations() {
        let mut c = class();
        let run = MethodKey::new("Lfoo;", "run", "(I)V".parse().unwrap());
        c.get_or_create_virtual(run.clone()).unwrap();
        c.get_or_create_method_annotations(&run).unwrap()
            .get_or_create(&TypeKey::new("Lanno;"), AnnotationVisibility::Runtime);
        c.get_or_create_parameter_annotations(&run, 0).unwrap()
            .get_or_create(&TypeKey::new("Lanno;"), AnnotationVisibility::Runtime);
        assert!(c.get_parameter_annotations(&run, 1).is_err());

        c.remove_method(&run).unwrap();
        assert!(c.get_methods_annotation(&run).is_empty());
        assert!(c.annotations().map_or(true, |d| d.methods.is_empty() && d.parameters.is_empty()));
    }

    #[test]
    fn removing_a_parameter_rekeys_the_method() {
        use crate::dex::code_item::RegistersTable;
        use crate::dex::debug_info::DebugInfo;
        use crate::dex::instruction_list::InstructionList;
        use crate::dex::instructions::Ins;

        let mut c = class();
        let run = MethodKey::new("Lfoo;", "run", "(IJ)V".parse().unwrap());
        let method = c.get_or_create_virtual(run.clone()).unwrap();
        let mut body = InstructionList::new();
        body.add(Ins::return_void());
        let mut code = CodeItem::new(RegistersTable { registers: 4, ins: 4, outs: 0 }, body);
        code.set_debug_info(Some(Item::unique(DebugInfo::new(1, vec![Some("a".to_string()), Some("b".to_string())]))));
        method.set_code(Some(Item::unique(code)));
        c.get_or_create_parameter_annotations(&run, 1).unwrap()
            .get_or_create(&TypeKey::new("Lanno;"), AnnotationVisibility::Runtime);

        let params = c.get_parameters(&run).unwrap();
        assert_eq!(params.len(), 2);
        assert!(params[0].annotations.is_none());
        assert!(params[1].annotations.is_some());
        assert_eq!(params[1].register, 2);

        let shorter = c.remove_parameter(&run, 0).unwrap();
        assert_eq!(shorter.to_string(), "Lfoo;->run(J)V");
        assert!(c.get_method(&run).is_none());
        let params = c.get_parameters(&shorter).unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].debug_name, Some("b"));
        assert!(params[0].annotations.is_some());
        assert_eq!(params[0].register, 1);

        assert_eq!(c.remove_parameter(&shorter, 3).unwrap_err().kind(), ErrorKind::Contract);
        assert_eq!(c.remove_parameter(&run, 0).unwrap_err().kind(), ErrorKind::Contract);
    }

    #[test]
    fn static_constructor_is_added_as_direct() {
        let mut c = class();
        c.set_hidden_api(Some(HiddenApiData::new())).unwrap();
        let clinit = c.ensure_static_constructor().unwrap().key().clone();
        assert_eq!(clinit.name, "<clinit>");
        assert!(c.get_method(&clinit).unwrap().is_direct());
        assert!(c.hidden_api_flags(&clinit).is_some());
        c.ensure_static_constructor().unwrap();
        assert_eq!(c.class_data().unwrap().counts(), [0, 0, 1, 0]);
    }

    #[test]
    fn replacing_the_class_type_renames_members_and_annotations() {
        let mut c = class();
        c.interfaces.push(TypeKey::new("Lfoo;"));
        let run = MethodKey::new("Lfoo;", "run", "(Lfoo;)V".parse().unwrap());
        c.get_or_create_virtual(run.clone()).unwrap();
        c.get_or_create_method_annotations(&run).unwrap()
            .get_or_create(&TypeKey::new("Lanno;"), AnnotationVisibility::Runtime);

        c.replace_keys(&Reference::Type(TypeKey::new("Lfoo;")), &Reference::Type(TypeKey::new("Lbar;"))).unwrap();
        assert_eq!(c.class_type(), &TypeKey::new("Lbar;"));
        assert_eq!(c.interfaces, vec![TypeKey::new("Lbar;")]);
        let renamed = MethodKey::new("Lbar;", "run", "(Lbar;)V".parse().unwrap());
        assert!(c.get_method(&renamed).is_some());
        assert_eq!(c.get_methods_annotation(&renamed).len(), 1);
        assert!(c.get_methods_annotation(&run).is_empty());
    }

    #[test]
    fn edit_code_needs_a_body() {
        let mut c = class();
        let run = MethodKey::new("Lfoo;", "run", "()V".parse().unwrap());
        c.get_or_create_virtual(run.clone()).unwrap();
        assert_eq!(c.edit_code(&run).unwrap_err().kind(), ErrorKind::Contract);
    }

    #[test]
    fn hidden_api_tracks_membership() {
        let mut c = class();
        let a = MethodKey::new("Lfoo;", "a", "()V".parse().unwrap());
        let b = MethodKey::new("Lfoo;", "b", "()V".parse().unwrap());
        c.get_or_create_virtual(a.clone()).unwrap();
        c.set_method_hidden_api_flags(&a, 1).unwrap();
        c.get_or_create_virtual(b.clone()).unwrap();
        assert_eq!(c.hidden_api().unwrap().virtual_methods.len(), 2);
        assert_eq!(c.hidden_api_flags(&b), Some(crate::dex::hidden_api::NO_RESTRICTION));
        c.remove_method(&a).unwrap();
        assert_eq!(c.hidden_api().unwrap().virtual_methods.len(), 1);
        assert_eq!(c.hidden_api_flags(&b), Some(crate::dex::hidden_api::NO_RESTRICTION));
    }
}
