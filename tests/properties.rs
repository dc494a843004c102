mod common;

use common::{
    build_program, evaluate, find_stale_read, mixed_steps, mutating_steps, placeholder_names,
    pure_steps, sample_inputs,
};
use harp_rewrite::config::{INPLACE_KWARG, OUT_KWARG};
use harp_rewrite::prelude::*;
use proptest::prelude::*;

fn run_inplacifier(module: &mut GraphModule, config: &RewriteConfig) -> Counters {
    let signatures = StaticSignatures::default();
    let mut counters = Counters::new();
    Inplacifier::new(config, &signatures)
        .inplacify(module, &mut counters)
        .unwrap();
    counters
}

proptest! {
    #[test]
    fn test_passes_preserve_placeholders(inputs in 1..4usize, steps in mutating_steps()) {
        let config = RewriteConfig::default();
        let graph = build_program(inputs, &steps, true);
        let names = placeholder_names(&graph);

        let mut module = GraphModule::new(graph.clone());
        normalize(&mut module, &config).unwrap();
        prop_assert_eq!(placeholder_names(&module.graph), names.clone());

        run_inplacifier(&mut module, &config);
        module.graph.validate().unwrap();
        prop_assert_eq!(placeholder_names(&module.graph), names.clone());

        let (pure, _) = functionalize(&GraphModule::new(graph), &config).unwrap();
        prop_assert_eq!(placeholder_names(&pure), names);
    }

    #[test]
    fn test_inplacifier_preserves_values(inputs in 1..4usize, steps in mixed_steps(), seed in 0..1000u64) {
        let config = RewriteConfig::default();
        let graph = build_program(inputs, &steps, false);
        let mut module = GraphModule::new(graph.clone());

        let counters = run_inplacifier(&mut module, &config);

        module.graph.validate().unwrap();
        prop_assert_eq!(find_stale_read(&graph, &module.graph, &config), None);
        let data = sample_inputs(inputs, seed);
        prop_assert_eq!(evaluate(&graph, &data), evaluate(&module.graph, &data));
        prop_assert!(counters.total(Category::Optimizations) <= steps.len());
    }

    #[test]
    fn test_inplacifier_leaves_never_inplace_calls(inputs in 1..4usize, steps in pure_steps()) {
        let config = RewriteConfig::default().with_never_inplace("torch.sigmoid");
        let graph = build_program(inputs, &steps, false);
        let mut module = GraphModule::new(graph.clone());

        run_inplacifier(&mut module, &config);

        let skipped = |g: &Graph| -> Vec<Node> {
            g.iter()
                .map(|(_, n)| n)
                .filter(|n| n.op.function().is_some_and(|f| config.is_never_inplace(f)))
                .cloned()
                .collect()
        };
        let before = skipped(&graph);
        let after = skipped(&module.graph);
        prop_assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(&after) {
            prop_assert_eq!(&a.op, &b.op);
            prop_assert_eq!(&a.kwargs, &b.kwargs);
            prop_assert_eq!(a.args.len(), b.args.len());
        }
    }

    #[test]
    fn test_functionalizer_output_is_pure(inputs in 1..4usize, steps in mutating_steps()) {
        let config = RewriteConfig::default();
        let graph = build_program(inputs, &steps, true);

        let (pure, counters) = functionalize(&GraphModule::new(graph), &config).unwrap();

        pure.validate().unwrap();
        let mut left = 0;
        for (_, node) in pure.iter() {
            let Some(meta) = node.meta.as_ref() else { continue };
            if !meta.is_tensor() {
                continue;
            }
            let destructive = node.op.function().is_some_and(|f| {
                config.destructive_operators.contains_key(f) || config.inplace_variants.contains_key(f)
            });
            if meta.is_input_mutation {
                left += 1;
                continue;
            }
            prop_assert!(!node.kwargs.contains_key(OUT_KWARG));
            prop_assert!(node.kwargs.get(INPLACE_KWARG).and_then(Argument::as_bool) != Some(true));
            prop_assert!(!destructive, "{} left destructive", node.name);
            prop_assert!(!meta.is_mutation);
        }
        prop_assert_eq!(left, counters.total(Category::InputMutation));
    }

    #[test]
    fn test_functionalizer_preserves_values(inputs in 1..4usize, steps in mutating_steps(), seed in 0..1000u64) {
        let config = RewriteConfig::default();
        let graph = build_program(inputs, &steps, true);

        let (pure, _) = functionalize(&GraphModule::new(graph.clone()), &config).unwrap();

        let data = sample_inputs(inputs, seed);
        prop_assert_eq!(evaluate(&graph, &data), evaluate(&pure, &data));
    }

    #[test]
    fn test_inplace_then_functionalize_round_trips(inputs in 1..4usize, steps in pure_steps(), seed in 0..1000u64) {
        let config = RewriteConfig::default();
        let graph = build_program(inputs, &steps, false);
        let mut module = GraphModule::new(graph.clone());
        run_inplacifier(&mut module, &config);

        let (pure, counters) = functionalize(&module, &config).unwrap();

        prop_assert_eq!(counters.total(Category::Mutation), 0);
        let data = sample_inputs(inputs, seed);
        prop_assert_eq!(evaluate(&graph, &data), evaluate(&pure, &data));
    }
}
