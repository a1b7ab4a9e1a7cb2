use super::{field, foo, method};
use crate::dex::annotations::AnnotationVisibility;
use crate::dex::def::Def;
use crate::dex::code_item::{CodeItem, RegistersTable};
use crate::dex::encoded_values::EncodedValue;
use crate::dex::instruction_list::InstructionList;
use crate::dex::instructions::{Ins, Reference};
use crate::dex::{ClassDef, DexClasses, DexOptions, DexPools, ErrorKind, Item};
use crate::types::{AccessFlags, TypeKey};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn anno(name: &str) -> TypeKey {
    TypeKey::new(&format!("Lanno/{};", name))
}

fn annotation_types(sets: Vec<&crate::dex::annotations::AnnotationSet>) -> Vec<TypeKey> {
    sets.iter().flat_map(|s| s.items.iter().map(|i| i.type_key().clone())).collect()
}

#[test]
fn add_a_field_with_annotation() {
    let mut classes = DexClasses::new(DexOptions::default());
    let x = field("X", "I");
    let c = classes.get_or_create(&foo());
    c.get_or_create_static(x.clone()).unwrap();
    c.get_or_create_field_annotations(&x).unwrap()
        .get_or_create(&TypeKey::new("Lanno;"), AnnotationVisibility::Runtime);
    classes.refresh().unwrap();

    let c = classes.get(&foo()).unwrap();
    let sets = c.get_fields_annotation(&x);
    assert_eq!(sets.len(), 1);
    assert_eq!(annotation_types(sets), vec![TypeKey::new("Lanno;")]);
    let statics = c.class_data().unwrap().static_fields().unwrap();
    assert_eq!(statics.len(), 1);
    assert_eq!(statics.get(0).unwrap().relative_index(), 0);
    assert_eq!(statics.get(0).unwrap().definition_index(), 0);
}

#[test]
fn remove_a_method() {
    let mut classes = DexClasses::new(DexOptions::default());
    let keys: Vec<_> = ["a", "b", "c"].iter().map(|n| method("Lfoo;", n, "()V")).collect();
    let c = classes.get_or_create(&foo());
    for (i, k) in keys.iter().enumerate() {
        c.get_or_create_virtual(k.clone()).unwrap();
        c.get_or_create_method_annotations(k).unwrap()
            .get_or_create(&anno(&k.name.to_uppercase()), AnnotationVisibility::Runtime);
        c.set_method_hidden_api_flags(k, i as u32 + 1).unwrap();
    }
    classes.refresh().unwrap();

    let c = classes.get_mut(&foo()).unwrap();
    let removed = c.remove_method(&keys[1]).unwrap();
    assert_eq!(removed.map(|d| d.key().clone()), Some(keys[1].clone()));
    classes.refresh().unwrap();

    let c = classes.get(&foo()).unwrap();
    assert_eq!(annotation_types(c.get_methods_annotation(&keys[0])), vec![anno("A")]);
    assert_eq!(annotation_types(c.get_methods_annotation(&keys[2])), vec![anno("C")]);
    assert!(c.get_methods_annotation(&keys[1]).is_empty());
    assert_eq!(c.hidden_api_flags(&keys[0]), Some(1));
    assert_eq!(c.hidden_api_flags(&keys[2]), Some(3));

    let dir = c.annotations().unwrap();
    assert_eq!(dir.methods.len(), 2);
    for e in dir.methods.iter() {
        let def = c.get_method(e.key.as_ref().unwrap()).unwrap();
        assert_eq!(e.definition_index, def.definition_index());
    }
    let api = c.hidden_api().unwrap();
    assert_eq!(api.virtual_methods.len(), 2);
    let flags: Vec<u32> = api.virtual_methods.iter().map(|v| v.get()).collect();
    assert_eq!(flags, vec![1, 3]);
}

#[test]
fn merge_two_classes() {
    let x = field("X", "I");
    let mut dst = ClassDef::new(foo(), AccessFlags::PUBLIC);
    dst.get_or_create_static(x.clone()).unwrap();
    dst.set_static_value(&x, Some(EncodedValue::Int(1))).unwrap();
    let mut src = ClassDef::new(foo(), AccessFlags::PUBLIC);
    src.get_or_create_static(x.clone()).unwrap();
    src.set_static_value(&x, Some(EncodedValue::Int(2))).unwrap();
    src.get_or_create_virtual(method("Lfoo;", "run", "()V")).unwrap();

    dst.merge(&src).unwrap();
    let data = dst.class_data().unwrap();
    assert_eq!(data.counts(), [1, 0, 0, 1]);
    assert_eq!(dst.static_value(&x), Some(&EncodedValue::Int(2)));
    assert_eq!(dst.static_values().unwrap().get(0), Some(&EncodedValue::Int(2)));
    // the source is untouched
    assert_eq!(src.static_value(&x), Some(&EncodedValue::Int(2)));
    assert_eq!(src.class_data().unwrap().counts(), [1, 0, 0, 1]);
}

#[test]
fn default_static_values_are_trimmed() {
    let mut classes = DexClasses::new(DexOptions::default());
    let c = classes.get_or_create(&foo());
    for i in 0..6 {
        c.get_or_create_static(field(&format!("f{}", i), "I")).unwrap();
    }
    c.get_or_create_static(field("s", "Ljava/lang/String;")).unwrap();
    classes.refresh().unwrap();
    assert!(classes.get(&foo()).unwrap().static_values().is_none());

    let c = classes.get_mut(&foo()).unwrap();
    c.set_static_value(&field("f2", "I"), Some(EncodedValue::Int(-1))).unwrap();
    classes.refresh().unwrap();
    let values = classes.get(&foo()).unwrap().static_values().unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values.get(0), Some(&EncodedValue::Int(0)));
    assert_eq!(values.get(2), Some(&EncodedValue::Int(-1)));
}

#[test]
fn mismatched_static_value_fails_refresh() {
    let mut classes = DexClasses::new(DexOptions::default());
    let c = classes.get_or_create(&foo());
    c.get_or_create_static(field("X", "I")).unwrap();
    c.class_data_mut().get_field_mut(&field("X", "I")).unwrap().static_value = Some(EncodedValue::Boolean(true));
    assert!(classes.refresh().is_err());

    let mut lenient = DexOptions::default();
    lenient.validate_static_values = false;
    classes.options = lenient;
    assert!(classes.refresh().is_ok());
}

#[test]
fn relative_indices_after_shuffled_inserts() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut names: Vec<String> = (0..40).map(|i| format!("m{:02}", i)).collect();
    names.shuffle(&mut rng);

    let mut classes = DexClasses::new(DexOptions::default());
    let c = classes.get_or_create(&foo());
    for n in &names {
        c.get_or_create_virtual(method("Lfoo;", n, "()V")).unwrap();
        c.get_or_create_instance(field(n, "I")).unwrap();
    }
    // a foreign method lands between ours in the pool
    classes.pools.intern_method(&method("Lfoo;", "m20a", "()V"));
    classes.refresh().unwrap();

    let data = classes.get(&foo()).unwrap().class_data().unwrap();
    let methods = data.virtual_methods().unwrap();
    assert!(methods.is_sorted());
    let mut previous = None;
    for def in methods.iter() {
        match previous {
            None => assert_eq!(def.definition_index(), def.relative_index()),
            Some(p) => assert_eq!(def.definition_index(), def.relative_index() + p),
        }
        assert_eq!(classes.pools.method_index(def.key()).unwrap(), def.definition_index());
        previous = Some(def.definition_index());
    }
    assert!(methods.iter().any(|d| d.relative_index() == 2));
    assert!(data.instance_fields().unwrap().is_sorted());
}

#[test]
fn stale_directory_entries_are_pruned() {
    let a = field("a", "I");
    let b = field("b", "I");
    let mut c = ClassDef::new(foo(), AccessFlags::PUBLIC);
    c.get_or_create_instance(a.clone()).unwrap();
    c.get_or_create_instance(b.clone()).unwrap();
    c.get_or_create_field_annotations(&b).unwrap().get_or_create(&anno("B"), AnnotationVisibility::Build);
    c.get_or_create_field_annotations(&a).unwrap().get_or_create(&anno("A"), AnnotationVisibility::Build);

    let mut pools = DexPools::new();
    c.collect_keys(&mut pools);
    pools.fields.remove(&a);
    pools.refresh();
    c.refresh(&pools, &DexOptions::default()).unwrap();

    assert!(c.get_field(&a).is_none());
    let dir = c.annotations().unwrap();
    assert_eq!(dir.fields.len(), 1);
    let entry = dir.fields.iter().next().unwrap();
    assert_eq!(entry.key.as_ref(), Some(&b));
    assert_eq!(entry.definition_index, pools.field_index(&b).unwrap());
}

#[test]
fn directory_is_sorted_after_refresh() {
    let mut classes = DexClasses::new(DexOptions::default());
    let c = classes.get_or_create(&foo());
    for n in ["z", "m", "a", "q"] {
        let k = method("Lfoo;", n, "(I)V");
        c.get_or_create_virtual(k.clone()).unwrap();
        c.get_or_create_method_annotations(&k).unwrap().get_or_create(&anno("M"), AnnotationVisibility::Runtime);
        c.get_or_create_parameter_annotations(&k, 0).unwrap().get_or_create(&anno("P"), AnnotationVisibility::Runtime);
    }
    classes.refresh().unwrap();
    let dir = classes.get(&foo()).unwrap().annotations().unwrap();
    let indices: Vec<u32> = dir.methods.iter().map(|e| e.definition_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    let indices: Vec<u32> = dir.parameters.iter().map(|e| e.definition_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[test]
fn hidden_api_lists_follow_every_array() {
    let mut c = ClassDef::new(foo(), AccessFlags::PUBLIC);
    c.get_or_create_static(field("s", "I")).unwrap();
    c.get_or_create_instance(field("i", "I")).unwrap();
    c.get_or_create_direct(method("Lfoo;", "<init>", "()V")).unwrap();
    c.get_or_create_virtual(method("Lfoo;", "v", "()V")).unwrap();
    c.set_field_hidden_api_flags(&field("s", "I"), 2).unwrap();

    let sizes = |c: &ClassDef| {
        let api = c.hidden_api().unwrap();
        [api.static_fields.len(), api.instance_fields.len(), api.direct_methods.len(), api.virtual_methods.len()]
    };
    assert_eq!(sizes(&c), c.class_data().unwrap().counts());

    c.get_or_create_static(field("t", "I")).unwrap();
    c.get_or_create_virtual(method("Lfoo;", "w", "()V")).unwrap();
    assert_eq!(sizes(&c), c.class_data().unwrap().counts());

    c.remove_field(&field("i", "I")).unwrap();
    c.remove_method(&method("Lfoo;", "<init>", "()V")).unwrap();
    assert_eq!(sizes(&c), c.class_data().unwrap().counts());
    assert_eq!(sizes(&c), [2, 0, 0, 2]);
    assert_eq!(c.field_hidden_api_flags(&field("s", "I")), Some(2));
}

#[test]
fn hidden_api_copies_share_until_restructured() {
    let run = method("Lfoo;", "run", "()V");
    let mut source = ClassDef::new(foo(), AccessFlags::PUBLIC);
    source.get_or_create_virtual(run.clone()).unwrap();
    source.get_or_create_virtual(method("Lfoo;", "stop", "()V")).unwrap();
    source.set_method_hidden_api_flags(&run, 1).unwrap();

    let mut copy = source.clone();
    let view = source.hidden_api().unwrap().new_copy();
    copy.set_hidden_api(Some(view)).unwrap();
    assert!(copy.hidden_api().unwrap().is_copy());

    // flag edits reach the source through the shared cells
    copy.set_method_hidden_api_flags(&run, 3).unwrap();
    assert_eq!(source.hidden_api_flags(&run), Some(3));

    // a membership change gives the copy cells of its own
    copy.remove_method(&method("Lfoo;", "stop", "()V")).unwrap();
    assert!(!copy.hidden_api().unwrap().is_copy());
    copy.set_method_hidden_api_flags(&run, 0).unwrap();
    assert_eq!(source.hidden_api_flags(&run), Some(3));
    assert_eq!(source.hidden_api().unwrap().virtual_methods.len(), 2);
    assert_eq!(copy.hidden_api().unwrap().virtual_methods.len(), 1);
}

#[test]
fn replaced_field_key_reaches_class_data() {
    let mut classes = DexClasses::new(DexOptions::default());
    let a = field("a", "I");
    let z = field("z", "I");
    let c = classes.get_or_create(&foo());
    c.get_or_create_static(a.clone()).unwrap();
    c.set_static_value(&a, Some(EncodedValue::Int(3))).unwrap();
    c.get_or_create_field_annotations(&a).unwrap().get_or_create(&anno("A"), AnnotationVisibility::Runtime);
    classes.refresh().unwrap();

    classes.pools.fields.replace(&a, &z);
    classes.refresh().unwrap();
    let c = classes.get(&foo()).unwrap();
    assert!(c.get_field(&a).is_none());
    assert_eq!(c.get_field(&z).unwrap().key(), &z);
    assert_eq!(c.static_value(&z), Some(&EncodedValue::Int(3)));
    assert!(c.get_fields_annotation(&a).is_empty());
    assert_eq!(annotation_types(c.get_fields_annotation(&z)), vec![anno("A")]);

    let (bytes, _) = classes.write().unwrap();
    let read = DexClasses::read(&bytes, DexOptions::default()).unwrap();
    let c = read.get(&foo()).unwrap();
    assert!(!read.pools.fields.contains(&a));
    assert_eq!(c.static_value(&z), Some(&EncodedValue::Int(3)));
    assert_eq!(annotation_types(c.get_fields_annotation(&z)), vec![anno("A")]);
}

#[test]
fn cloned_class_owns_its_hidden_api_flags() {
    let run = method("Lfoo;", "run", "()V");
    let mut original = ClassDef::new(foo(), AccessFlags::PUBLIC);
    original.get_or_create_virtual(run.clone()).unwrap();
    original.set_method_hidden_api_flags(&run, 1).unwrap();

    let mut cloned = original.clone();
    assert!(!cloned.hidden_api().unwrap().is_copy());
    cloned.set_method_hidden_api_flags(&run, 2).unwrap();
    assert_eq!(original.hidden_api_flags(&run), Some(1));
    assert_eq!(cloned.hidden_api_flags(&run), Some(2));

    original.set_method_hidden_api_flags(&run, 4).unwrap();
    assert_eq!(cloned.hidden_api_flags(&run), Some(2));
}

#[test]
fn renaming_a_type_reaches_code_of_other_classes() {
    let mut classes = DexClasses::new(DexOptions::default());
    let run = method("Lfoo;", "run", "()V");
    classes.get_or_create(&foo()).get_or_create_virtual(run.clone()).unwrap();
    let mut list = InstructionList::new();
    // invoke-virtual {v1}, Lfoo;->run()V ; return-void
    list.add(Ins::with_reference(vec![0x106e, 0x0000, 0x0001], Reference::Method(run)).unwrap());
    list.add(Ins::return_void());
    let bar = TypeKey::new("Lbar;");
    classes.get_or_create(&bar).get_or_create_virtual(method("Lbar;", "call", "(Lfoo;)V")).unwrap()
        .set_code(Some(Item::unique(CodeItem::new(RegistersTable { registers: 2, ins: 2, outs: 1 }, list))));
    classes.refresh().unwrap();

    let baz = TypeKey::new("Lbaz;");
    let e = classes.replace_keys(&Reference::Type(bar.clone()), &Reference::Type(foo())).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Contract);
    classes.replace_keys(&Reference::Type(foo()), &Reference::Type(baz.clone())).unwrap();

    let (bytes, _) = classes.write().unwrap();
    let read = DexClasses::read(&bytes, DexOptions::default()).unwrap();
    assert!(read.get(&foo()).is_none());
    assert!(read.get(&baz).unwrap().get_method(&method("Lbaz;", "run", "()V")).is_some());
    let code = read.get(&bar).unwrap().get_method(&method("Lbar;", "call", "(Lbaz;)V")).unwrap().code().unwrap();
    assert_eq!(code.instructions.get(0).unwrap().reference(), Some(&Reference::Method(method("Lbaz;", "run", "()V"))));
}

#[test]
fn removed_parameter_survives_a_write() {
    let mut classes = DexClasses::new(DexOptions::default());
    let run = method("Lfoo;", "run", "(ILjava/lang/String;)V");
    let c = classes.get_or_create(&foo());
    c.get_or_create_virtual(run.clone()).unwrap().set_code(Some(Item::unique(super::body(&super::RETURN_VOID, 3, 3))));
    c.get_or_create_parameter_annotations(&run, 1).unwrap().get_or_create(&anno("P"), AnnotationVisibility::Runtime);
    let shorter = c.remove_parameter(&run, 0).unwrap();
    c.ensure_static_constructor().unwrap();

    let (bytes, _) = classes.write().unwrap();
    let read = DexClasses::read(&bytes, DexOptions::default()).unwrap();
    let c = read.get(&foo()).unwrap();
    assert!(c.get_method(&run).is_none());
    let params = c.get_parameters(&shorter).unwrap();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].type_key, &TypeKey::new("Ljava/lang/String;"));
    assert_eq!(annotation_types(params[0].annotations.into_iter().collect()), vec![anno("P")]);
    assert!(c.get_method(&method("Lfoo;", "<clinit>", "()V")).unwrap().code().is_some());
}
