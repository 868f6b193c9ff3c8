use std::sync::Arc;

use orch_core::errors::{ErrorKind, OrchError};
use orch_core::tags::Tags;
use orch_entities::{ArmBuilder, Simulation, SweepBuilder, SweepCallback, TemplatedSimulations};
use orch_task::{CommandLine, JsonConfiguredTask, Task};
use proptest::prelude::*;
use serde_json::{json, Value};

fn base_task() -> JsonConfiguredTask {
    JsonConfiguredTask::new(CommandLine::from_string("python model.py --config config.json").expect("command"))
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| json!(v)).collect()
}

fn parameters_of(simulation: &Simulation) -> (Value, Value) {
    let params = simulation.task.parameters().expect("json task");
    (
        params.get("a").cloned().unwrap_or(Value::Null),
        params.get("b").cloned().unwrap_or(Value::Null),
    )
}

fn collect(template: &TemplatedSimulations) -> Vec<Simulation> {
    template
        .iter()
        .collect::<Result<Vec<_>, OrchError>>()
        .expect("expansion")
}

#[test]
fn cross_sweep_varies_left_most_axis_slowest() {
    let mut builder = SweepBuilder::cross();
    builder.add_parameter("a", ints(&[0, 1])).expect("a");
    builder.add_parameter("b", ints(&[1, 9])).expect("b");
    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(builder);

    let simulations = collect(&template);
    let pairs: Vec<_> = simulations.iter().map(parameters_of).collect();
    assert_eq!(
        pairs,
        vec![
            (json!(0), json!(1)),
            (json!(0), json!(9)),
            (json!(1), json!(1)),
            (json!(1), json!(9)),
        ]
    );
    for simulation in &simulations {
        assert!(simulation.id().is_none());
        assert!(simulation.tags.contains_key("a"));
        assert!(simulation.tags.contains_key("b"));
    }
    assert_eq!(simulations[3].tags.get_str("a"), Some("1"));
    assert_eq!(simulations[3].tags.get_str("b"), Some("9"));
}

#[test]
fn pair_sweep_zips_values_and_rejects_unequal_lengths() {
    let mut builder = SweepBuilder::pair();
    builder.add_parameter("a", ints(&[1, 2, 3])).expect("a");
    builder.add_parameter("b", ints(&[10, 20, 30])).expect("b");
    let err = builder.add_parameter("c", ints(&[1])).expect_err("length mismatch");
    assert_eq!(err.kind(), ErrorKind::Invalid);

    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(builder);
    let pairs: Vec<_> = collect(&template).iter().map(parameters_of).collect();
    assert_eq!(
        pairs,
        vec![
            (json!(1), json!(10)),
            (json!(2), json!(20)),
            (json!(3), json!(30)),
        ]
    );
}

#[test]
fn empty_builders_follow_their_mode() {
    assert_eq!(SweepBuilder::cross().count().expect("count"), 1);
    assert_eq!(SweepBuilder::pair().count().expect("count"), 0);
    let template = TemplatedSimulations::from_task(base_task());
    assert_eq!(template.len().expect("len"), 1);
    assert_eq!(collect(&template).len(), 1);
}

#[test]
fn arm_builder_concatenates_arms_and_extras_come_last() {
    let mut first = SweepBuilder::cross();
    first.add_parameter("a", ints(&[0, 1])).expect("a");
    let mut second = SweepBuilder::cross();
    second.add_parameter("b", ints(&[5, 6, 7])).expect("b");
    let mut arms = ArmBuilder::new();
    arms.add_arm(first).add_arm(second);
    assert_eq!(arms.count().expect("count"), 5);

    let mut extra = Simulation::from_task(base_task());
    extra.tags.insert("extra", "yes");
    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(arms).add_simulation(extra);
    assert_eq!(template.len().expect("len"), 6);

    let simulations = collect(&template);
    assert_eq!(parameters_of(&simulations[1]).0, json!(1));
    assert_eq!(parameters_of(&simulations[4]).1, json!(7));
    assert_eq!(simulations[5].tags.get_str("extra"), Some("yes"));
}

#[test]
fn tag_precedence_is_inherited_then_template_then_callbacks() {
    let mut builder = SweepBuilder::cross();
    builder.add_parameter("a", ints(&[3])).expect("a");
    let mut template = TemplatedSimulations::from_task(base_task());
    template.tags_mut().insert("a", "template");
    template.tags_mut().insert("owner", "template");
    template.add_builder(builder);

    let mut inherited = Tags::new();
    inherited.insert("owner", "experiment");
    inherited.insert("study", "growth");
    let simulation = template
        .iter_with(inherited)
        .next()
        .expect("one simulation")
        .expect("built");
    assert_eq!(simulation.tags.get_str("study"), Some("growth"));
    assert_eq!(simulation.tags.get_str("owner"), Some("template"));
    assert_eq!(simulation.tags.get_str("a"), Some("3"));
}

#[test]
fn multiple_parameter_definition_crosses_named_values() {
    let callback: SweepCallback = Arc::new(|simulation: &mut Simulation, value: &Value| {
        let mut patch = Tags::new();
        if let Value::Object(map) = value {
            for (key, item) in map {
                patch.merge(&simulation.task.set_parameter(key, item.clone())?);
            }
        }
        Ok(patch)
    });
    let mut builder = SweepBuilder::cross();
    builder
        .add_multiple_parameter_definition(
            "ab",
            callback,
            vec![("a".into(), ints(&[0, 1])), ("b".into(), ints(&[7, 8]))],
        )
        .expect("definition");
    assert_eq!(builder.count().expect("count"), 4);

    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(builder);
    let pairs: Vec<_> = collect(&template).iter().map(parameters_of).collect();
    assert_eq!(pairs[1], (json!(0), json!(8)));
    assert_eq!(pairs[2], (json!(1), json!(7)));
}

#[test]
fn iteration_is_restartable_and_leaves_base_task_untouched() {
    let mut builder = SweepBuilder::cross();
    builder.add_parameter("a", ints(&[1, 2])).expect("a");
    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(builder);

    let mut iter = template.iter();
    let first: Vec<_> = iter.by_ref().map(|sim| sim.expect("sim")).collect();
    assert_eq!(iter.position(), 2);
    iter.restart();
    let second: Vec<_> = iter.map(|sim| sim.expect("sim")).collect();
    assert_eq!(first.len(), second.len());
    for (left, right) in first.iter().zip(&second) {
        assert_eq!(parameters_of(left), parameters_of(right));
        assert_eq!(left.tags, right.tags);
    }
    assert!(template.base_task().parameters().expect("params").get("a").is_none());
}

#[test]
fn failing_callback_surfaces_as_error_item() {
    let callback: SweepCallback = Arc::new(|_: &mut Simulation, _: &Value| {
        Err(orch_core::errors::invalid("test.callback", "rejected value"))
    });
    let mut builder = SweepBuilder::cross();
    builder.add_sweep_definition("bad", callback, ints(&[1])).expect("definition");
    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(builder);
    let item = template.iter().next().expect("one item");
    assert!(item.is_err());
}

#[test]
fn oversized_cross_sweeps_are_rejected() {
    let mut builder = SweepBuilder::cross();
    let mut rejected = None;
    for idx in 0..64 {
        if let Err(err) = builder.add_parameter(&format!("p{idx}"), ints(&[0, 1])) {
            rejected = Some((idx, err));
            break;
        }
    }
    let (idx, err) = rejected.expect("too many axes");
    assert_eq!(idx as u32, usize::BITS - 1);
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(err.info().code, "sweep.too_large");
    assert_eq!(builder.count().expect("count"), 1usize << (usize::BITS - 1));

    let mut arms = ArmBuilder::new();
    arms.add_arm(builder.clone()).add_arm(builder);
    assert_eq!(arms.count().expect_err("sum overflows").info().code, "sweep.too_large");

    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(arms);
    assert!(template.len().is_err());
    let items: Vec<_> = template.iter().collect();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_err());
}

#[test]
fn an_empty_axis_empties_the_cross_product() {
    let mut builder = SweepBuilder::cross();
    builder.add_parameter("a", ints(&[1, 2])).expect("a");
    builder.add_parameter("b", Vec::new()).expect("b");
    assert_eq!(builder.count().expect("count"), 0);
}

proptest! {
    #[test]
    fn cross_count_is_product_of_axis_lengths(lengths in prop::collection::vec(1usize..5, 0..4)) {
        let mut builder = SweepBuilder::cross();
        for (idx, len) in lengths.iter().enumerate() {
            let values = (0..*len as i64).map(|v| json!(v)).collect();
            builder.add_parameter(&format!("p{idx}"), values).expect("axis");
        }
        let expected: usize = lengths.iter().product();
        prop_assert_eq!(builder.count().expect("count"), expected);

        let mut template = TemplatedSimulations::from_task(base_task());
        template.add_builder(builder);
        let produced = template.iter().filter(Result::is_ok).count();
        prop_assert_eq!(produced, expected);
    }

    #[test]
    fn pair_count_is_common_length(len in 0usize..12, axes in 1usize..4) {
        let mut builder = SweepBuilder::pair();
        for idx in 0..axes {
            let values = (0..len as i64).map(|v| json!(v)).collect();
            builder.add_parameter(&format!("p{idx}"), values).expect("axis");
        }
        prop_assert_eq!(builder.count().expect("count"), len);
    }

    #[test]
    fn cross_indices_enumerate_every_tuple_once(a in 1usize..4, b in 1usize..4, c in 1usize..4) {
        let mut builder = SweepBuilder::cross();
        builder.add_parameter("a", (0..a as i64).map(|v| json!(v)).collect()).expect("a");
        builder.add_parameter("b", (0..b as i64).map(|v| json!(v)).collect()).expect("b");
        builder.add_parameter("c", (0..c as i64).map(|v| json!(v)).collect()).expect("c");
        let mut seen = std::collections::BTreeSet::new();
        for index in 0..builder.count().expect("count") {
            prop_assert!(seen.insert(builder.indices(index)));
        }
        prop_assert_eq!(seen.len(), a * b * c);
    }
}
