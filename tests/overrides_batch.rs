//! End-to-end scenario for `Ecosystem::overrides`: an atomic multi-key
//! override batch, per SPEC_FULL.md §7.

use std::sync::Arc;

use atomix_engine::template::{atom, primitive};
use atomix_engine::{Ecosystem, EcosystemConfig, Injection, OverrideChange};

#[test]
fn overrides_applies_every_change_in_the_batch_before_any_dependent_recomputes() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let a = Arc::new(primitive::<(), i32>("batch-a", 1));
    let b = Arc::new(primitive::<(), i32>("batch-b", 10));
    let sum = Arc::new(atom("batch-sum", {
        let a = a.clone();
        let b = b.clone();
        move |injection: &Injection, _: ()| Ok((injection.get(&a, ())? + injection.get(&b, ())?).into())
    }));

    let sum_instance = ecosystem.resolve_instance(&sum, ()).unwrap();
    assert_eq!(sum_instance.get(), 11);

    let replacement_a = Arc::new(primitive::<(), i32>("batch-a", 100));
    let replacement_b = Arc::new(primitive::<(), i32>("batch-b", 200));
    ecosystem.overrides(vec![
        OverrideChange::set(replacement_a),
        OverrideChange::set(replacement_b),
    ]);

    assert_eq!(
        sum_instance.get(),
        300,
        "both overrides must be visible to the dependent's single recompute, not just the first one applied"
    );
}

#[test]
fn overrides_clear_removes_a_previously_installed_override() {
    let ecosystem = Ecosystem::new(EcosystemConfig::default());
    let flag = Arc::new(primitive::<(), i32>("batch-flag", 1));

    let first = ecosystem.resolve_instance(&flag, ()).unwrap();
    assert_eq!(first.get(), 1);

    let replacement = Arc::new(primitive::<(), i32>("batch-flag", 2));
    ecosystem.overrides(vec![OverrideChange::set(replacement)]);
    let second = ecosystem.resolve_instance(&flag, ()).unwrap();
    assert_eq!(second.get(), 2);

    ecosystem.overrides(vec![OverrideChange::clear("batch-flag")]);
    let third = ecosystem.resolve_instance(&flag, ()).unwrap();
    assert_eq!(third.get(), 1, "clearing the override restores the original template's behavior");
}
