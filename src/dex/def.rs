//! `encoded_field` and `encoded_method` records.
//!
//! See https://source.android.com/docs/core/runtime/dex-format#encoded-field-format
//!
//! A definition holds its key; the pool index it encodes to is looked up again on every
//! refresh, and its relative index only means something next to its predecessor in the array.

use crate::dex::annotations::AnnotationSet;
use crate::dex::code_item::CodeItem;
use crate::dex::encoded_values::EncodedValue;
use crate::dex::error::DexError;
use crate::dex::hidden_api::{HiddenApiFlagValue, NO_RESTRICTION};
use crate::dex::instructions::Reference;
use crate::dex::item::Item;
use crate::dex::pool::DexPools;
use crate::dex::section::DataReader;
use crate::dex::{read_uleb128, write_uleb128};
use crate::types::{AccessFlags, FieldKey, MethodKey, TypeKey};
use log::debug;
use std::fmt;

/// What field and method definitions have in common.
pub trait Def: Clone + fmt::Debug
{
    type Key: Clone + Ord + fmt::Debug + fmt::Display;

    fn new(key: Self::Key, access_flags: AccessFlags) -> Self;

    fn key(&self) -> &Self::Key;

    fn set_key(&mut self, key: Self::Key);

    fn access_flags(&self) -> AccessFlags;

    fn set_access_flags(&mut self, flags: AccessFlags);

    /// Delta to the previous definition's pool index, as last read or refreshed.
    fn relative_index(&self) -> u32;

    /// Pool index of the key, as last read or refreshed.
    fn definition_index(&self) -> u32;

    fn set_indices(&mut self, relative_index: u32, definition_index: u32);

    fn hidden_api(&self) -> Option<&HiddenApiFlagValue>;

    fn hidden_api_slot(&mut self) -> &mut Option<HiddenApiFlagValue>;

    /// Current pool index of `key` after following replacements.
    fn resolve(pools: &DexPools, key: &Self::Key) -> Option<(Self::Key, u32)>;

    fn key_at(pools: &DexPools, index: u32) -> Result<Self::Key, DexError>;

    fn intern(pools: &mut DexPools, key: &Self::Key);

    /// Reads what follows the relative index.
    fn read_body(reader: &mut DataReader, ix: &mut usize, key: Self::Key) -> Result<Self, DexError>;

    /// Writes what follows the relative index.
    fn write_body(&self, buf: &mut Vec<u8>);

    /// Takes over the content of `other`, a definition with the same key.
    fn merge(&mut self, other: &Self);

    /// The key with `search` swapped for `replace`; None when it stays the same.
    fn replaced_key(&self, search: &Reference, replace: &Reference) -> Option<Self::Key>;

    /// Swaps keys inside what the definition owns besides its key. Returns how many places
    /// changed.
    fn replace_body_keys(&mut self, _search: &Reference, _replace: &Reference) -> Result<usize, DexError>
    {
        Ok(0)
    }

    fn collect_keys(&self, pools: &mut DexPools)
    {
        Self::intern(pools, self.key());
    }

    fn is_static(&self) -> bool
    {
        self.access_flags().contains(AccessFlags::STATIC)
    }

    fn set_hidden_api(&mut self, value: Option<HiddenApiFlagValue>)
    {
        *self.hidden_api_slot() = value;
    }

    /// The hidden api handle, created with no restriction when missing.
    fn hidden_api_or_default(&mut self) -> &HiddenApiFlagValue
    {
        self.hidden_api_slot().get_or_insert_with(HiddenApiFlagValue::default)
    }

    fn hidden_api_flags(&self) -> u32
    {
        self.hidden_api().map_or(NO_RESTRICTION, HiddenApiFlagValue::get)
    }

    fn set_hidden_api_flags(&mut self, value: u32)
    {
        self.hidden_api_or_default().set(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef
{
    key: FieldKey,
    pub access_flags: AccessFlags,
    relative_index: u32,
    definition_index: u32,
    /// Explicit initial value of a static field, linked from the class's static values.
    pub static_value: Option<EncodedValue>,
    hidden_api: Option<HiddenApiFlagValue>,
}

impl FieldDef
{
    /// The value written to the static values array: the explicit one or the type's default.
    pub fn static_value_or_default(&self) -> EncodedValue
    {
        match &self.static_value
        {
            Some(v) => v.clone(),
            None => EncodedValue::default_for(&self.key.field_type),
        }
    }
}

impl fmt::Display for FieldDef
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, ".field 0x{:x} {}", self.access_flags.bits(), self.key)?;
        if let Some(v) = &self.static_value
        {
            write!(f, " = {}", v)?;
        }
        Ok(())
    }
}

impl Def for FieldDef
{
    type Key = FieldKey;

    fn new(key: FieldKey, access_flags: AccessFlags) -> FieldDef
    {
        FieldDef { key, access_flags, relative_index: 0, definition_index: 0, static_value: None, hidden_api: None }
    }

    fn key(&self) -> &FieldKey
    {
        &self.key
    }

    fn set_key(&mut self, key: FieldKey)
    {
        self.key = key;
    }

    fn access_flags(&self) -> AccessFlags
    {
        self.access_flags
    }

    fn set_access_flags(&mut self, flags: AccessFlags)
    {
        self.access_flags = flags;
    }

    fn relative_index(&self) -> u32
    {
        self.relative_index
    }

    fn definition_index(&self) -> u32
    {
        self.definition_index
    }

    fn set_indices(&mut self, relative_index: u32, definition_index: u32)
    {
        self.relative_index = relative_index;
        self.definition_index = definition_index;
    }

    fn hidden_api(&self) -> Option<&HiddenApiFlagValue>
    {
        self.hidden_api.as_ref()
    }

    fn hidden_api_slot(&mut self) -> &mut Option<HiddenApiFlagValue>
    {
        &mut self.hidden_api
    }

    fn resolve(pools: &DexPools, key: &FieldKey) -> Option<(FieldKey, u32)>
    {
        let key = pools.fields.get_replace(key);
        pools.fields.resolve(&key).map(|i| (key, i))
    }

    fn key_at(pools: &DexPools, index: u32) -> Result<FieldKey, DexError>
    {
        pools.fields.at(index).cloned()
    }

    fn intern(pools: &mut DexPools, key: &FieldKey)
    {
        pools.intern_field(key);
    }

    fn read_body(reader: &mut DataReader, ix: &mut usize, key: FieldKey) -> Result<FieldDef, DexError>
    {
        let access_flags = AccessFlags::from_raw(read_uleb128(reader.bytes, ix)?);
        Ok(FieldDef::new(key, access_flags))
    }

    fn write_body(&self, buf: &mut Vec<u8>)
    {
        write_uleb128(buf, self.access_flags.bits());
    }

    fn merge(&mut self, other: &FieldDef)
    {
        self.key = other.key.clone();
        self.access_flags = other.access_flags;
        self.static_value = other.static_value.clone();
        if let Some(v) = &other.hidden_api
        {
            self.set_hidden_api_flags(v.get());
        }
    }

    fn replaced_key(&self, search: &Reference, replace: &Reference) -> Option<FieldKey>
    {
        match Reference::Field(self.key.clone()).replace_key(search, replace)
        {
            Some(Reference::Field(k)) => Some(k),
            _ => None,
        }
    }

    fn collect_keys(&self, pools: &mut DexPools)
    {
        pools.intern_field(&self.key);
        if let Some(v) = &self.static_value
        {
            v.collect_keys(pools);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef
{
    key: MethodKey,
    pub access_flags: AccessFlags,
    relative_index: u32,
    definition_index: u32,
    code: Option<Item<CodeItem>>,
    /// Offset of the code item, as read or as last placed.
    pub(crate) code_offset: u32,
    hidden_api: Option<HiddenApiFlagValue>,
}

impl MethodDef
{
    /// Direct methods are constructors, private or static.
    pub fn is_direct(&self) -> bool
    {
        self.access_flags.intersects(AccessFlags::CONSTRUCTOR | AccessFlags::PRIVATE | AccessFlags::STATIC) || self.key.is_constructor()
    }

    pub fn code(&self) -> Option<&CodeItem>
    {
        self.code.as_ref().map(Item::get)
    }

    pub fn code_item(&self) -> Option<&Item<CodeItem>>
    {
        self.code.as_ref()
    }

    pub fn set_code(&mut self, code: Option<Item<CodeItem>>)
    {
        self.code = code;
    }

    /// The code, copied out of any sharing first; later edits touch this method only.
    pub fn edit_code(&mut self) -> Option<&mut CodeItem>
    {
        let key = self.key.clone();
        let code = self.code.as_mut()?;
        if code.is_shared()
        {
            debug!("copy-on-write: code of {}", key);
        }
        let code = code.edit();
        code.method = Some(key);
        Some(code)
    }
}

/// One declared parameter of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter<'a>
{
    pub index: usize,
    pub type_key: &'a TypeKey,
    /// First register of the parameter, counted from the first register of the parameter area
    /// where `this` comes first.
    pub register: u32,
    pub debug_name: Option<&'a str>,
    /// Filled in by the class, which owns the annotations directory.
    pub annotations: Option<&'a AnnotationSet>,
}

impl Parameter<'_>
{
    /// Neither a debug name nor annotations.
    pub fn is_empty(&self) -> bool
    {
        self.debug_name.is_none() && self.annotations.map_or(true, AnnotationSet::is_empty)
    }
}

impl MethodDef
{
    pub fn parameter(&self, index: usize) -> Option<Parameter<'_>>
    {
        let type_key = self.key.proto.parameters.get(index)?;
        let this = if self.is_static() { 0 } else { 1 };
        let debug_name = self
            .code()
            .and_then(CodeItem::debug_info)
            .and_then(|d| d.parameter_names.get(index))
            .and_then(|n| n.as_deref());
        Some(Parameter { index, type_key, register: this + self.key.proto.register_of(index) as u32, debug_name, annotations: None })
    }

    pub fn parameters(&self) -> Vec<Parameter<'_>>
    {
        (0..self.key.parameters_count()).filter_map(|i| self.parameter(i)).collect()
    }
}

impl fmt::Display for MethodDef
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, ".method 0x{:x} {}", self.access_flags.bits(), self.key)
    }
}

impl Def for MethodDef
{
    type Key = MethodKey;

    fn new(key: MethodKey, access_flags: AccessFlags) -> MethodDef
    {
        MethodDef { key, access_flags, relative_index: 0, definition_index: 0, code: None, code_offset: 0, hidden_api: None }
    }

    fn key(&self) -> &MethodKey
    {
        &self.key
    }

    /// Code read for the old key is copied and handed the new one.
    fn set_key(&mut self, key: MethodKey)
    {
        let stale = self.code().and_then(|c| c.method.as_ref()).map_or(false, |m| m != &key);
        self.key = key;
        if stale
        {
            let _ = self.edit_code();
        }
    }

    fn access_flags(&self) -> AccessFlags
    {
        self.access_flags
    }

    fn set_access_flags(&mut self, flags: AccessFlags)
    {
        self.access_flags = flags;
    }

    fn relative_index(&self) -> u32
    {
        self.relative_index
    }

    fn definition_index(&self) -> u32
    {
        self.definition_index
    }

    fn set_indices(&mut self, relative_index: u32, definition_index: u32)
    {
        self.relative_index = relative_index;
        self.definition_index = definition_index;
    }

    fn hidden_api(&self) -> Option<&HiddenApiFlagValue>
    {
        self.hidden_api.as_ref()
    }

    fn hidden_api_slot(&mut self) -> &mut Option<HiddenApiFlagValue>
    {
        &mut self.hidden_api
    }

    fn resolve(pools: &DexPools, key: &MethodKey) -> Option<(MethodKey, u32)>
    {
        let key = pools.methods.get_replace(key);
        pools.methods.resolve(&key).map(|i| (key, i))
    }

    fn key_at(pools: &DexPools, index: u32) -> Result<MethodKey, DexError>
    {
        pools.methods.at(index).cloned()
    }

    fn intern(pools: &mut DexPools, key: &MethodKey)
    {
        pools.intern_method(key);
    }

    fn read_body(reader: &mut DataReader, ix: &mut usize, key: MethodKey) -> Result<MethodDef, DexError>
    {
        let access_flags = AccessFlags::from_raw(read_uleb128(reader.bytes, ix)?);
        let code_offset = read_uleb128(reader.bytes, ix)?;
        let mut def = MethodDef::new(key, access_flags);
        def.code_offset = code_offset;
        if code_offset != 0
        {
            let code = reader.code_item(code_offset).map_err(|e| err!(e, "method {}", def.key))?;
            def.code = Some(Item::shared(code));
        }
        Ok(def)
    }

    fn write_body(&self, buf: &mut Vec<u8>)
    {
        write_uleb128(buf, self.access_flags.bits());
        write_uleb128(buf, if self.code.is_some() { self.code_offset } else { 0 });
    }

    /// Code is taken over as its own item, so the source class keeps an independent body.
    fn merge(&mut self, other: &MethodDef)
    {
        self.key = other.key.clone();
        self.access_flags = other.access_flags;
        self.code = other.code().map(|c| {
            let mut code = c.clone();
            code.method = Some(other.key.clone());
            Item::unique(code)
        });
        if let Some(v) = &other.hidden_api
        {
            self.set_hidden_api_flags(v.get());
        }
    }

    fn replaced_key(&self, search: &Reference, replace: &Reference) -> Option<MethodKey>
    {
        match Reference::Method(self.key.clone()).replace_key(search, replace)
        {
            Some(Reference::Method(k)) => Some(k),
            _ => None,
        }
    }

    /// Shared code is copied only when it refers to `search`.
    fn replace_body_keys(&mut self, search: &Reference, replace: &Reference) -> Result<usize, DexError>
    {
        if !self.code().map_or(false, |c| c.contains_key(search))
        {
            return Ok(0);
        }
        match self.edit_code()
        {
            Some(code) => code.replace_keys(search, replace),
            None => Ok(0),
        }
    }

    fn collect_keys(&self, pools: &mut DexPools)
    {
        pools.intern_method(&self.key);
        if let Some(code) = self.code()
        {
            code.collect_keys(pools);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::code_item::RegistersTable;
    use crate::dex::instruction_list::InstructionList;
    use crate::dex::instructions::Ins;
    use std::rc::Rc;

    fn method(name: &str, flags: AccessFlags) -> MethodDef {
        MethodDef::new(MethodKey::new("Lfoo;", name, "()V".parse().unwrap()), flags)
    }

    #[test]
    fn direct_methods() {
        assert!(method("<init>", AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR).is_direct());
        assert!(method("a", AccessFlags::PRIVATE).is_direct());
        assert!(method("b", AccessFlags::STATIC).is_direct());
        assert!(!method("c", AccessFlags::PUBLIC).is_direct());
    }

    #[test]
    fn edit_code_copies_shared_body() {
        let mut list = InstructionList::new();
        list.add(Ins::new(vec![0x000e]).unwrap());
        let shared = Rc::new(CodeItem::new(RegistersTable::default(), list));

        let mut a = method("a", AccessFlags::PUBLIC);
        let mut b = method("b", AccessFlags::PUBLIC);
        a.set_code(Some(Item::shared(Rc::clone(&shared))));
        b.set_code(Some(Item::shared(Rc::clone(&shared))));

        let code = a.edit_code().unwrap();
        code.instructions.insert(0, Ins::nop()).unwrap();
        assert_eq!(a.code().unwrap().instructions.len(), 2);
        assert_eq!(b.code().unwrap().instructions.len(), 1);
        assert_eq!(a.code().unwrap().method.as_ref(), Some(a.key()));
        assert!(!a.code_item().unwrap().is_shared());
        assert!(b.code_item().unwrap().same_item(&Item::shared(shared)));
    }

    #[test]
    fn parameters_count_registers_past_this() {
        let key = MethodKey::new("Lfoo;", "f", "(JLjava/lang/String;I)V".parse().unwrap());
        let mut list = InstructionList::new();
        list.add(Ins::new(vec![0x000e]).unwrap());
        let mut code = CodeItem::new(RegistersTable { registers: 5, ins: 5, outs: 0 }, list);
        code.set_debug_info(Some(Item::unique(crate::dex::debug_info::DebugInfo::new(1, vec![None, Some("s".to_string())]))));
        let mut m = MethodDef::new(key, AccessFlags::PUBLIC);
        m.set_code(Some(Item::unique(code)));

        let params = m.parameters();
        assert_eq!(params.iter().map(|p| p.register).collect::<Vec<_>>(), vec![1, 3, 4]);
        assert_eq!(params[1].type_key, &TypeKey::new("Ljava/lang/String;"));
        assert_eq!(params[1].debug_name, Some("s"));
        assert!(params[0].is_empty());
        assert!(!params[1].is_empty());
        assert!(params[2].debug_name.is_none());
        assert!(m.parameter(3).is_none());

        m.access_flags = AccessFlags::STATIC;
        assert_eq!(m.parameter(0).unwrap().register, 0);
    }

    #[test]
    fn replacing_keys_copies_shared_code_that_uses_them() {
        let mut list = InstructionList::new();
        // const-string v0, "old" ; return-void
        list.add(Ins::with_reference(vec![0x001a, 0], Reference::String("old".to_string())).unwrap());
        list.add(Ins::new(vec![0x000e]).unwrap());
        let shared = Rc::new(CodeItem::new(RegistersTable { registers: 1, ins: 0, outs: 0 }, list));
        let mut a = method("a", AccessFlags::PUBLIC);
        a.set_code(Some(Item::shared(Rc::clone(&shared))));

        let old = Reference::String("old".to_string());
        let new = Reference::String("new".to_string());
        assert_eq!(a.replace_body_keys(&new, &old).unwrap(), 0);
        assert!(a.code_item().unwrap().is_shared());
        assert_eq!(a.replace_body_keys(&old, &new).unwrap(), 1);
        assert!(!a.code_item().unwrap().is_shared());
        assert_eq!(a.code().unwrap().instructions.get(0).unwrap().reference(), Some(&new));
        assert_eq!(shared.instructions.get(0).unwrap().reference(), Some(&old));

        let renamed = a.replaced_key(&Reference::Type(TypeKey::new("Lfoo;")), &Reference::Type(TypeKey::new("Lbar;"))).unwrap();
        assert_eq!(renamed.to_string(), "Lbar;->a()V");
        a.set_key(renamed.clone());
        assert_eq!(a.code().unwrap().method.as_ref(), Some(&renamed));
    }

    #[test]
    fn hidden_api_defaults_to_no_restriction() {
        let mut f = FieldDef::new(FieldKey::new("Lfoo;", "x", "I"), AccessFlags::STATIC);
        assert_eq!(f.hidden_api_flags(), NO_RESTRICTION);
        f.set_hidden_api_flags(1);
        assert_eq!(f.hidden_api().unwrap().get(), 1);
        assert!(f.is_static());
    }

    #[test]
    fn static_value_defaults_follow_field_type() {
        let f = FieldDef::new(FieldKey::new("Lfoo;", "x", "J"), AccessFlags::STATIC);
        assert_eq!(f.static_value_or_default(), EncodedValue::default_for(&crate::types::TypeKey::new("J")));
    }
}
