mod class_scenarios;

use crate::dex::annotations::AnnotationVisibility;
use crate::dex::code_item::{CodeItem, RegistersTable};
use crate::dex::debug_info::DebugKind;
use crate::dex::encoded_values::EncodedValue;
use crate::dex::instruction_list::InstructionList;
use crate::dex::{ClassDef, DexClasses, DexOptions, DexPools, Item};
use crate::types::{AccessFlags, FieldKey, MethodKey, TypeKey};
use std::rc::Rc;

// const/4 v0, 0 ; return-void
pub(crate) const CLEAR_AND_RETURN: [u16; 2] = [0x0012, 0x000e];
// const/4 v0, 0 ; return v0
pub(crate) const RETURN_ZERO: [u16; 2] = [0x0012, 0x000f];
// return-void
pub(crate) const RETURN_VOID: [u16; 1] = [0x000e];

pub(crate) fn foo() -> TypeKey {
    TypeKey::new("Lfoo;")
}

pub(crate) fn field(name: &str, t: &str) -> FieldKey {
    FieldKey::new("Lfoo;", name, t)
}

pub(crate) fn method(class: &str, name: &str, proto: &str) -> MethodKey {
    MethodKey::new(class, name, proto.parse().expect("bad proto"))
}

pub(crate) fn body(units: &[u16], registers: u16, ins: u16) -> CodeItem {
    let list = InstructionList::read(units, &DexPools::new()).expect("read failed");
    CodeItem::new(RegistersTable { registers, ins, outs: 0 }, list)
}

/// Two classes: `Lfoo;` with every kind of member and side table, and `Lbar;` whose one
/// method shares its body with `Lfoo;->run()V`.
pub(crate) fn sample_classes() -> DexClasses {
    let mut classes = DexClasses::new(DexOptions::default());
    let shared = Rc::new(body(&CLEAR_AND_RETURN, 1, 1));

    let c = classes.get_or_create(&foo());
    c.source_file = Some("Foo.java".to_string());
    c.interfaces.push(TypeKey::new("Ljava/lang/Runnable;"));

    c.get_or_create_static(field("A", "I")).unwrap();
    c.get_or_create_static(field("B", "Ljava/lang/String;")).unwrap();
    c.get_or_create_static(field("C", "I")).unwrap();
    c.get_or_create_instance(field("y", "J")).unwrap();
    c.set_static_value(&field("A", "I"), Some(EncodedValue::Int(7))).unwrap();
    c.set_static_value(&field("B", "Ljava/lang/String;"), Some(EncodedValue::String("hi".to_string()))).unwrap();

    let init = method("Lfoo;", "<init>", "()V");
    c.get_or_create_direct(init).unwrap().set_code(Some(Item::unique(body(&RETURN_VOID, 1, 1))));
    let run = method("Lfoo;", "run", "()V");
    let stop = method("Lfoo;", "stop", "()V");
    c.get_or_create_virtual(run.clone()).unwrap().set_code(Some(Item::shared(Rc::clone(&shared))));
    c.get_or_create_virtual(stop.clone()).unwrap().set_code(Some(Item::shared(Rc::clone(&shared))));

    let get = method("Lfoo;", "get", "()I");
    let mut get_body = body(&RETURN_ZERO, 1, 1);
    get_body.add_debug_element(0, 10, DebugKind::LineNumber).unwrap();
    get_body.add_debug_element(1, 11, DebugKind::LineNumber).unwrap();
    c.get_or_create_virtual(get).unwrap().set_code(Some(Item::unique(get_body)));

    let set = method("Lfoo;", "set", "(I)V");
    c.get_or_create_virtual(set.clone()).unwrap().set_code(Some(Item::unique(body(&RETURN_VOID, 2, 2))));

    c.get_or_create_class_annotations()
        .get_or_create(&TypeKey::new("Lanno/Keep;"), AnnotationVisibility::Runtime);
    c.get_or_create_field_annotations(&field("A", "I")).unwrap()
        .get_or_create(&TypeKey::new("Lanno/Const;"), AnnotationVisibility::Build)
        .annotation.set("value", EncodedValue::Int(7));
    c.get_or_create_method_annotations(&run).unwrap()
        .get_or_create(&TypeKey::new("Lanno/Entry;"), AnnotationVisibility::Runtime);
    c.get_or_create_parameter_annotations(&set, 0).unwrap()
        .get_or_create(&TypeKey::new("Lanno/NonNull;"), AnnotationVisibility::Runtime);

    c.set_method_hidden_api_flags(&run, 1).unwrap();
    c.set_method_hidden_api_flags(&stop, 2).unwrap();
    c.set_field_hidden_api_flags(&field("A", "I"), 0x8).unwrap();

    let bar = classes.get_or_create(&TypeKey::new("Lbar;"));
    bar.superclass = Some(foo());
    bar.access_flags = AccessFlags::PUBLIC | AccessFlags::FINAL;
    bar.get_or_create_virtual(method("Lbar;", "run", "()V")).unwrap().set_code(Some(Item::shared(shared)));

    classes
}

pub(crate) fn class<'a>(classes: &'a DexClasses, name: &str) -> &'a ClassDef {
    classes.get(&TypeKey::new(name)).expect("class missing")
}
