//! Lockdown is process-wide, so these tests live in their own binary. Every
//! test locks with the default configuration first; the order they run in
//! does not matter.

use std::{rc::Rc, thread};

use cloister::{
    compartment::{BuiltinImportHook, Compartment, LoadOptions, MemoryReadHook},
    errors::CompartmentError,
    lockdown::{self, EvalTaming, LockdownConfiguration, LockdownOutcome},
    runtime::{intrinsics, Interpreter, ModuleSource, Realm},
    syntax::parse_module,
};

fn lock() {
    lockdown::lockdown(LockdownConfiguration::default()).unwrap();
}

fn load(entry: &str, source: &str) -> Result<cloister::runtime::ObjectRef, CompartmentError> {
    let read = MemoryReadHook::new().with_module(entry, source);
    let options = LoadOptions::new(Box::new(BuiltinImportHook::default()), Box::new(read));
    Compartment::load(&mut Interpreter::new(), entry, options)
}

#[test]
fn repeated_lockdown_is_a_no_op() {
    lock();
    let again = lockdown::lockdown(LockdownConfiguration::default()).unwrap();
    assert_eq!(again, LockdownOutcome::AlreadyApplied);
    assert!(lockdown::is_locked());
}

#[test]
fn later_configuration_is_ignored() {
    lock();
    let different = LockdownConfiguration {
        eval_taming: EvalTaming::UnsafeEval,
        ..Default::default()
    };
    assert_eq!(lockdown::lockdown(different).unwrap(), LockdownOutcome::AlreadyApplied);
    assert_eq!(lockdown::configuration(), Some(&LockdownConfiguration::default()));
}

#[test]
fn frozen_intrinsics_reject_mutation_in_compartments() {
    lock();
    let err = load("/m/poison.mjs", "Math.max = function () { return 0; };").unwrap_err();
    let CompartmentError::Evaluation { thrown, .. } = err else {
        panic!("expected an evaluation failure, got {err:?}");
    };
    assert_eq!(
        thrown.summary(),
        "TypeError: Cannot assign to read only property 'max' of object"
    );
}

#[test]
fn frozen_intrinsics_reject_mutation_in_the_host_realm() {
    lock();
    let source = "Object.extra = 1;";
    let module = parse_module(source, "/h/main.mjs").unwrap();
    let mut interp = Interpreter::new();
    let global = interp.host_global().clone();
    let thrown = interp
        .evaluate_module(&module, Rc::new(ModuleSource::new("/h/main.mjs", source)), Vec::new(), global, Realm::Host)
        .unwrap_err();
    assert!(thrown.summary().starts_with("TypeError"), "{}", thrown.summary());
}

#[test]
fn scripts_observe_frozen_intrinsics() {
    lock();
    let namespace = load(
        "/m/probe.mjs",
        "export const frozen = Object.isFrozen(Math) && Object.isFrozen(JSON) && Object.isFrozen(Object);",
    )
    .unwrap();
    assert!(namespace.get("frozen").unwrap_or_default().is_truthy());
}

#[test]
fn other_threads_harden_on_first_access() {
    lock();
    let hardened = thread::spawn(|| intrinsics::current().is_hardened()).join().unwrap();
    assert!(hardened);
}
