//! Property-based tests for identifiers and the object factory using proptest.

use proptest::prelude::*;
use serde_json::json;

use ccml_core::callbacks::resolve_list;
use ccml_core::{ObjectRegistry, RunContext};

// --- Identifier substitution properties ---

proptest! {
    #[test]
    fn substitution_embeds_both_ids(
        run_id in "[a-z0-9]{1,16}",
        short_id in "[a-z0-9]{1,8}",
        prefix in "[a-z/_-]{0,12}",
    ) {
        let ctx = RunContext::new().with_run_id(run_id.clone()).with_short_id(short_id.clone());
        let out = ctx.substitute_identifiers(&format!("{prefix}$RUN_ID/$SHORT_ID")).unwrap();
        prop_assert_eq!(out, format!("{prefix}{run_id}/{short_id}"));
    }

    #[test]
    fn templates_without_placeholders_are_unchanged(template in "[a-zA-Z0-9/_.-]{0,40}") {
        let ctx = RunContext::new();
        prop_assert_eq!(ctx.substitute_identifiers(&template).unwrap(), template);
    }

    #[test]
    fn unset_short_id_always_fails(run_id in "[a-z0-9]{1,16}", suffix in "[a-z]{0,8}") {
        let ctx = RunContext::new().with_run_id(run_id);
        let err = ctx.substitute_identifiers(&format!("$SHORT_ID{suffix}")).unwrap_err();
        prop_assert!(err.is_configuration());
    }

    #[test]
    fn pipeline_name_keeps_first(first in "[a-z]{1,10}", rest in prop::collection::vec("[a-z]{1,10}", 0..5)) {
        let mut ctx = RunContext::new();
        ctx.set_pipeline_name_once(first.clone());
        for name in rest {
            ctx.set_pipeline_name_once(name);
        }
        prop_assert_eq!(ctx.pipeline_name(), Some(first.as_str()));
    }
}

// --- Factory properties ---

proptest! {
    #[test]
    fn resolve_list_preserves_order(values in prop::collection::vec(0u32..1000, 0..20)) {
        let mut registry = ObjectRegistry::new();
        let descriptors: Vec<_> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                registry.register_value(&format!("tests.values.v{i}"), *v).unwrap();
                json!({"function": format!("tests.values.v{i}")})
            })
            .collect();

        let resolved = resolve_list(&registry, &descriptors).unwrap();
        let back: Vec<u32> = resolved.iter().map(|r| *r.downcast_ref::<u32>().unwrap()).collect();
        prop_assert_eq!(back, values);
    }

    #[test]
    fn paths_without_dot_are_rejected(name in "[A-Za-z]{1,12}") {
        let registry = ObjectRegistry::new();
        let err = registry.resolve_value(&json!({"type": name})).unwrap_err();
        prop_assert!(err.is_configuration());
    }
}
