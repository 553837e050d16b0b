use cloister::{
    compartment::{BuiltinImportHook, Compartment, FsReadHook, LoadOptions, MemoryReadHook},
    errors::CompartmentError,
    runtime::{Interpreter, ObjectRef, Value},
};

mod support;
use support::Project;

fn memory_options(read: MemoryReadHook) -> LoadOptions {
    LoadOptions::new(Box::new(BuiltinImportHook::default()), Box::new(read))
}

fn export(namespace: &ObjectRef, name: &str) -> Value {
    namespace.get(name).unwrap_or_default()
}

#[test]
fn dependencies_evaluate_before_dependents() {
    let project = Project::new();
    project.file("lib/base.mjs", "export const value = 42;");
    project.file(
        "lib/mid.mjs",
        "import { value as base } from './base.mjs';\nexport const value = base * 2;",
    );
    let top = project.file(
        "top.mjs",
        "import { value as mid } from './lib/mid.mjs';\nexport const value = mid + 8;",
    );

    let mut interp = Interpreter::new();
    let options = LoadOptions::new(Box::new(BuiltinImportHook::default()), Box::new(FsReadHook));
    let namespace = Compartment::load(&mut interp, &top.to_string_lossy(), options).unwrap();

    assert_eq!(export(&namespace, "value").to_number(), 92.0);
    assert!(namespace.is_frozen());
}

#[test]
fn shared_dependency_evaluates_once() {
    let read = MemoryReadHook::new()
        .with_module("/m/counter.mjs", "export const box = { hits: 0 };")
        .with_module("/m/a.mjs", "import { box } from './counter.mjs'; box.hits += 1; export const seen = box;")
        .with_module("/m/b.mjs", "import { box } from './counter.mjs'; box.hits += 1; export const seen = box;")
        .with_module(
            "/m/entry.mjs",
            "import { seen as a } from './a.mjs';\nimport { seen as b } from './b.mjs';\nexport const hits = a.hits;\nexport const same = a === b;",
        );

    let mut interp = Interpreter::new();
    let namespace = Compartment::load(&mut interp, "/m/entry.mjs", memory_options(read)).unwrap();
    assert_eq!(export(&namespace, "hits").to_number(), 2.0);
    assert!(export(&namespace, "same").is_truthy());
}

#[test]
fn global_rebinding_stays_inside_its_compartment() {
    let read = MemoryReadHook::new()
        .with_module("/m/first.mjs", "Math = 5;\nexport const seen = typeof Math;")
        .with_module("/m/second.mjs", "export const seen = typeof Math;");

    let mut interp = Interpreter::new();
    let first = Compartment::load(&mut interp, "/m/first.mjs", memory_options(read.clone())).unwrap();
    let second = Compartment::load(&mut interp, "/m/second.mjs", memory_options(read)).unwrap();

    assert_eq!(export(&first, "seen").to_display(), "number");
    assert_eq!(export(&second, "seen").to_display(), "object");
    assert_eq!(interp.host_global().get("Math").map(|m| m.type_of()), Some("object"));
}

#[test]
fn new_globals_cannot_be_created() {
    let read = MemoryReadHook::new().with_module("/m/leak.mjs", "leaked = 1;");
    let mut interp = Interpreter::new();
    let err = Compartment::load(&mut interp, "/m/leak.mjs", memory_options(read)).unwrap_err();

    let CompartmentError::Evaluation { thrown, location } = err else {
        panic!("expected an evaluation failure, got {err:?}");
    };
    assert_eq!(location, "/m/leak.mjs");
    assert_eq!(thrown.summary(), "ReferenceError: leaked is not defined");
    assert!(!interp.host_global().has("leaked"));
}

#[test]
fn global_object_is_not_extensible() {
    let read = MemoryReadHook::new().with_module("/m/grow.mjs", "globalThis.leaked = 1;");
    let mut interp = Interpreter::new();
    let err = Compartment::load(&mut interp, "/m/grow.mjs", memory_options(read)).unwrap_err();
    let CompartmentError::Evaluation { thrown, .. } = err else {
        panic!("expected an evaluation failure, got {err:?}");
    };
    assert_eq!(thrown.summary(), "TypeError: Cannot add property leaked, object is not extensible");
}

#[test]
fn endowments_are_the_only_extra_globals() {
    let read = MemoryReadHook::new()
        .with_module("/m/endowed.mjs", "export const got = typeof config === 'object' ? config.name : 'none';")
        .with_module("/m/bare.mjs", "export const got = typeof config;");

    let mut interp = Interpreter::new();
    let config = ObjectRef::from_entries([("name", Value::string("alpha"))]);
    let endowed = Compartment::load(
        &mut interp,
        "/m/endowed.mjs",
        memory_options(read.clone()).with_global("config", Value::Object(config)),
    )
    .unwrap();
    let bare = Compartment::load(&mut interp, "/m/bare.mjs", memory_options(read)).unwrap();

    assert_eq!(export(&endowed, "got").to_display(), "alpha");
    assert_eq!(export(&bare, "got").to_display(), "undefined");
}

#[test]
fn missing_module_is_a_resolution_error_naming_the_chain() {
    let read = MemoryReadHook::new()
        .with_module("/m/top.mjs", "import './mid.mjs';")
        .with_module("/m/mid.mjs", "import './gone.mjs';");

    let mut interp = Interpreter::new();
    let err = Compartment::load(&mut interp, "/m/top.mjs", memory_options(read)).unwrap_err();
    assert!(matches!(err, CompartmentError::Resolution { .. }), "{err:?}");
    assert_eq!(err.failing_location(), "/m/gone.mjs");
}

#[test]
fn import_cycles_are_rejected() {
    let read = MemoryReadHook::new()
        .with_module("/m/a.mjs", "import './b.mjs';")
        .with_module("/m/b.mjs", "import './a.mjs';");

    let mut interp = Interpreter::new();
    let err = Compartment::load(&mut interp, "/m/a.mjs", memory_options(read)).unwrap_err();
    let mut source: &CompartmentError = &err;
    while let CompartmentError::Resolution { source: inner, .. } = source {
        source = inner.as_ref();
    }
    assert!(matches!(source, CompartmentError::Cycle { .. }), "{err:?}");
}

#[test]
fn unknown_external_specifier_fails_through_the_import_hook() {
    let read = MemoryReadHook::new().with_module("/m/a.mjs", "import { pad } from 'left-pad';");
    let mut interp = Interpreter::new();
    let err = Compartment::load(&mut interp, "/m/a.mjs", memory_options(read)).unwrap_err();
    let CompartmentError::Resolution { source, specifier, .. } = err else {
        panic!("expected a resolution failure");
    };
    assert_eq!(specifier, "left-pad");
    assert!(matches!(*source, CompartmentError::ImportHook { .. }));
}

#[test]
fn missing_export_names_both_modules() {
    let read = MemoryReadHook::new()
        .with_module("/m/lib.mjs", "export const present = 1;")
        .with_module("/m/main.mjs", "import { absent } from './lib.mjs';");

    let mut interp = Interpreter::new();
    let err = Compartment::load(&mut interp, "/m/main.mjs", memory_options(read)).unwrap_err();
    match err {
        CompartmentError::MissingExport { location, name, importer } => {
            assert_eq!(location, "/m/lib.mjs");
            assert_eq!(name, "absent");
            assert_eq!(importer, "/m/main.mjs");
        }
        other => panic!("unexpected {other:?}"),
    }
}
