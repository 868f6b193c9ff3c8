use orch_assets::Asset;
use orch_core::errors::ErrorKind;
use orch_core::ids::{ItemType, PlatformObject};
use orch_core::status::EntityStatus;
use orch_core::tags::Tags;
use orch_entities::{
    Experiment, FileFilter, Simulation, Suite, SweepBuilder, TemplatedSimulations, WorkItem,
};
use orch_task::{CommandLine, CommandTask, JsonConfiguredTask, Task, TaskRegistry, TASK_TYPE_TAG};
use serde_json::json;

fn command_task(with_common: Option<&str>) -> CommandTask {
    let mut task = CommandTask::from_command_str("run.sh").expect("task");
    if let Some(content) = with_common {
        task.core_mut()
            .common_assets
            .add(Asset::from_content("model.bin", "", content.as_bytes().to_vec()).expect("asset"))
            .expect("add");
    }
    task
}

fn created(simulation: &mut Simulation, id: &str) {
    simulation.mark_created(PlatformObject::new(id, ItemType::Simulation));
}

#[test]
fn generator_is_peeked_once_and_consumed_once() {
    let sims = (0..3).map(|i| {
        let mut sim = Simulation::from_task(command_task(Some("same")));
        sim.tags.insert("i", i.to_string());
        sim
    });
    let mut experiment = Experiment::from_generator("gen", sims);
    experiment.tags.insert("study", "g");
    assert_eq!(experiment.expected_count(), None);

    let common = experiment.gather_common_assets().expect("gather");
    assert_eq!(common.len(), 1);
    assert_eq!(experiment.tags.get_str(TASK_TYPE_TAG), Some("CommandTask"));

    let pending: Vec<_> = experiment
        .take_pending()
        .expect("pending")
        .map(|sim| sim.expect("sim"))
        .collect();
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].tags.get_str("i"), Some("0"));
    assert!(pending.iter().all(|sim| sim.tags.get_str("study") == Some("g")));

    let err = experiment.take_pending().expect_err("second pass");
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(err.info().code, "experiment.generator_consumed");
}

#[test]
fn disagreeing_common_assets_fail_before_any_backend_call() {
    let experiment_sims = vec![
        Simulation::from_task(command_task(Some("v1"))),
        Simulation::from_task(command_task(Some("v2"))),
    ];
    let mut experiment = Experiment::from_simulations("clash", experiment_sims);
    let err = experiment.gather_common_assets().expect_err("conflict");
    assert_eq!(err.kind(), ErrorKind::ConflictingCommonAsset);

    let agreeing = vec![
        Simulation::from_task(command_task(Some("v1"))),
        Simulation::from_task(command_task(Some("v1"))),
    ];
    let mut experiment = Experiment::from_simulations("fine", agreeing);
    experiment
        .common_assets
        .add(Asset::from_content("shared.txt", "inputs", b"s".to_vec()).expect("asset"))
        .expect("add");
    let merged = experiment.gather_common_assets().expect("gather");
    assert_eq!(merged.len(), 2);
}

#[test]
fn take_pending_keeps_created_simulations() {
    let mut done = Simulation::from_task(command_task(None));
    created(&mut done, "sim-1");
    let fresh = Simulation::from_task(command_task(None));
    let mut experiment = Experiment::from_simulations("mixed", vec![done, fresh]);
    experiment.tags.insert("owner", "lab");

    let pending: Vec<_> = experiment.take_pending().expect("pending").collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(experiment.simulations().len(), 1);
    assert_eq!(experiment.simulations()[0].id(), Some("sim-1"));
    let fresh = pending.into_iter().next().expect("one").expect("sim");
    assert_eq!(fresh.tags.get_str("owner"), Some("lab"));
    assert!(experiment.add_simulation(fresh.clone()).is_err());
    experiment.finish_creation();
    assert!(experiment.add_simulation(fresh).is_ok());
}

#[test]
fn experiment_status_aggregates_simulations() {
    let mut a = Simulation::from_task(command_task(None));
    let mut b = Simulation::from_task(command_task(None));
    created(&mut a, "a");
    created(&mut b, "b");
    let mut experiment = Experiment::from_simulations("agg", vec![a, b]);
    assert_eq!(experiment.status(), EntityStatus::Created);
    assert!(!experiment.done());

    experiment.simulations_mut()[0].observe_status(EntityStatus::Succeeded);
    assert_eq!(experiment.status(), EntityStatus::Running);

    experiment.simulations_mut()[1].observe_status(EntityStatus::Running);
    experiment.simulations_mut()[1].observe_status(EntityStatus::Failed);
    assert!(experiment.done());
    assert!(!experiment.succeeded());
    assert_eq!(experiment.status(), EntityStatus::Failed);

    let summary = experiment.status_summary();
    assert_eq!((summary.succeeded, summary.failed), (1, 1));
}

#[test]
fn backward_status_reports_are_clamped() {
    let mut sim = Simulation::from_task(command_task(None));
    sim.observe_status(EntityStatus::Running);
    sim.observe_status(EntityStatus::Commissioning);
    assert_eq!(sim.status(), EntityStatus::Running);
    sim.observe_status(EntityStatus::Succeeded);
    sim.observe_status(EntityStatus::Failed);
    assert_eq!(sim.status(), EntityStatus::Succeeded);
}

#[test]
fn pre_creation_hook_tags_override_callback_tags() {
    let mut task = JsonConfiguredTask::new(CommandLine::new("model"));
    task.core_mut().add_pre_creation_hook(std::sync::Arc::new(
        |_: &mut dyn Task, tags: &mut Tags| -> Result<(), orch_core::OrchError> {
            tags.insert("a", "hooked");
            Ok(())
        },
    ));
    let mut builder = SweepBuilder::cross();
    builder.add_parameter("a", vec![json!(1)]).expect("a");
    let mut template = TemplatedSimulations::from_task(task);
    template.add_builder(builder);

    let mut sim = template.iter().next().expect("one").expect("sim");
    assert_eq!(sim.tags.get_str("a"), Some("1"));
    sim.pre_creation().expect("pre creation");
    assert_eq!(sim.tags.get_str("a"), Some("hooked"));
    assert!(sim.assets().get_one("config.json", "").is_some());

    created(&mut sim, "sim-9");
    assert!(sim.pre_creation().is_err());
    assert!(sim.assets().is_frozen());
}

#[test]
fn simulation_metadata_rebuilds_task_through_registry() {
    let task = JsonConfiguredTask::new(CommandLine::from_string("python model.py").expect("command"))
        .with_parameters(json!({"a": 1}).as_object().cloned().expect("map"));
    let mut sim = Simulation::from_task(task);
    sim.parent_id = Some("exp-1".into());
    sim.tags.insert("a", "1");
    created(&mut sim, "sim-1");

    let metadata = sim.to_metadata(Some("memory")).expect("metadata");
    let handle = PlatformObject::new("sim-1", ItemType::Simulation);
    let rebuilt = Simulation::from_metadata(&metadata, &TaskRegistry::with_builtin(), handle).expect("rebuild");
    assert_eq!(rebuilt.tags, sim.tags);
    assert_eq!(rebuilt.parent_id.as_deref(), Some("exp-1"));
    assert_eq!(rebuilt.task.command().cmd(), sim.task.command().cmd());
    assert_eq!(rebuilt.task.parameters(), sim.task.parameters());

    let mut unknown = metadata.clone();
    unknown.task = Some(json!({"task_type": "Mystery", "command": CommandLine::new("mystery")}));
    let handle = PlatformObject::new("sim-1", ItemType::Simulation);
    let fallback = Simulation::from_metadata(&unknown, &TaskRegistry::with_builtin(), handle).expect("fallback");
    assert_eq!(fallback.task_type(), "CommandTask");
    assert_eq!(fallback.task.command().cmd(), "mystery");
}

#[test]
fn suite_adopts_experiments_and_reparents_on_create() {
    let mut suite = Suite::new("study");
    suite.add_experiment(Experiment::new("one")).expect("add");
    suite.mark_created(PlatformObject::new("suite-1", ItemType::Suite));
    assert_eq!(suite.experiments()[0].parent_id.as_deref(), Some("suite-1"));

    let mut foreign = Experiment::new("two");
    foreign.parent_id = Some("suite-other".into());
    let err = suite.add_experiment(foreign).expect_err("foreign");
    assert_eq!(err.kind(), ErrorKind::Invalid);
    assert_eq!(Suite::anonymous().name, "anonymous");
}

#[test]
fn work_item_file_filter_and_metadata() {
    let mut filter = FileFilter::new(vec!["**/*.csv".into()], vec!["**/tmp/**".into()]).expect("filter");
    filter.entity_filter = Some(std::sync::Arc::new(|tags: &Tags| tags.get_str("keep") == Some("yes")));
    filter.pre_run = Some(std::sync::Arc::new(|item: &mut WorkItem| {
        item.tags.insert("prepared", "true");
        Ok(())
    }));
    assert!(filter.matches("out/result.csv"));
    assert!(!filter.matches("out/tmp/result.csv"));
    assert!(!filter.matches("out/result.txt"));

    let mut keep = Tags::new();
    keep.insert("keep", "yes");
    assert!(filter.accepts_entity(&keep));
    assert!(!filter.accepts_entity(&Tags::new()));

    let mut item = WorkItem::file_filter("collect", CommandLine::new("collect"), filter);
    item.related.add(ItemType::Experiment, "exp-1");
    item.related.add(ItemType::Experiment, "exp-1");
    assert_eq!(item.related.len(), 1);
    item.pre_creation().expect("pre run");
    assert_eq!(item.tags.get_str("prepared"), Some("true"));
    assert!(item.to_metadata().is_err());

    item.mark_created(PlatformObject::new("wi-1", ItemType::WorkItem));
    let metadata = item.to_metadata().expect("metadata");
    let rebuilt = WorkItem::from_metadata(&metadata, PlatformObject::new("wi-1", ItemType::WorkItem)).expect("rebuild");
    assert_eq!(rebuilt.related.of(ItemType::Experiment), ["exp-1".to_string()]);
    assert_eq!(rebuilt.command.cmd(), "collect");
}
