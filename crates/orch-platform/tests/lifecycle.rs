use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use orch_assets::Asset;
use orch_core::errors::ErrorKind;
use orch_core::id_file::write_id_file;
use orch_core::ids::ItemType;
use orch_core::status::EntityStatus;
use orch_core::tags::Tags;
use orch_entities::{Experiment, Simulation, Suite, SweepBuilder, TemplatedSimulations};
use orch_platform::{
    BackoffConfig, CancelToken, MemoryBackend, OpKind, Platform, PlatformConfig, ProgressEvent, RunOptions,
    SimulationScript,
};
use orch_task::{CommandLine, JsonConfiguredTask, Task};
use serde_json::{json, Value};

fn fast_config() -> PlatformConfig {
    PlatformConfig {
        batch_size: 2,
        upload_concurrency: 2,
        refresh_interval_ms: 1,
        min_refresh_interval_ms: 1,
        timeout_secs: 10,
        backoff: BackoffConfig {
            attempts: 3,
            base_ms: 1,
            cap_ms: 2,
        },
        ..PlatformConfig::default()
    }
}

fn platform_over(backend: &Arc<MemoryBackend>) -> Platform {
    Platform::new(backend.clone()).with_config(fast_config())
}

fn base_task() -> JsonConfiguredTask {
    JsonConfiguredTask::new(CommandLine::from_string("python model.py --config config.json").expect("command"))
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| json!(v)).collect()
}

fn cross_experiment(name: &str) -> Experiment {
    let mut builder = SweepBuilder::cross();
    builder.add_parameter("a", ints(&[0, 1])).expect("a");
    builder.add_parameter("b", ints(&[1, 9])).expect("b");
    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(builder);
    Experiment::from_template(name, template)
}

fn tag_pairs(experiment: &Experiment) -> Vec<(String, String)> {
    experiment
        .simulations()
        .iter()
        .map(|sim| {
            (
                sim.tags.get_str("a").unwrap_or_default().to_string(),
                sim.tags.get_str("b").unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[test]
fn two_axis_cross_sweep_runs_to_success() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("cross");

    let report = platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    assert!(report.succeeded());
    assert!(report.waited);
    assert!(!report.cancelled);
    assert_eq!(report.summary.succeeded, 4);
    assert_eq!(report.experiment_ids, vec![experiment.id().expect("id").to_string()]);
    assert_eq!(
        tag_pairs(&experiment),
        vec![
            ("0".to_string(), "1".to_string()),
            ("0".to_string(), "9".to_string()),
            ("1".to_string(), "1".to_string()),
            ("1".to_string(), "9".to_string()),
        ]
    );
    for (simulation, expected) in experiment
        .simulations()
        .iter()
        .zip([r#"{"a":0,"b":1}"#, r#"{"a":0,"b":9}"#, r#"{"a":1,"b":1}"#, r#"{"a":1,"b":9}"#])
    {
        let files = platform.get_files(simulation, &["config.json"]).expect("config");
        assert_eq!(&*files["config.json"], expected.as_bytes());
    }
    assert_eq!(experiment.status(), EntityStatus::Succeeded);
    assert!(experiment.parent_id.is_some());
    assert_eq!(experiment.tags.get_str("task_type"), Some("JsonConfiguredTask"));
    for simulation in experiment.simulations() {
        assert_eq!(simulation.parent_id.as_deref(), experiment.id());
        assert!(simulation.assets().is_frozen());
    }
    assert_eq!(backend.count(ItemType::Suite), 1);
    assert_eq!(backend.count(ItemType::Simulation), 4);
}

#[test]
fn creation_runs_in_lifecycle_order() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("ordered");
    platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    let log = backend.op_log();
    let position = |predicate: &dyn Fn(&orch_platform::OpRecord) -> bool| log.iter().position(|op| predicate(op));
    let last = |predicate: &dyn Fn(&orch_platform::OpRecord) -> bool| log.iter().rposition(|op| predicate(op));

    let suite = position(&|op| op.op == OpKind::Create && op.item_type == ItemType::Suite).expect("suite");
    let exp = position(&|op| op.op == OpKind::Create && op.item_type == ItemType::Experiment).expect("experiment");
    let first_sim =
        position(&|op| op.op == OpKind::Create && op.item_type == ItemType::Simulation).expect("simulation");
    let last_sim = last(&|op| op.op == OpKind::Create && op.item_type == ItemType::Simulation).expect("simulation");
    let run = position(&|op| op.op == OpKind::Run && op.item_type == ItemType::Experiment).expect("run");
    let refresh = position(&|op| op.op == OpKind::Refresh).expect("refresh");

    assert!(suite < exp);
    assert!(exp < first_sim);
    assert!(last_sim < run);
    assert!(run < refresh);
}

#[test]
fn common_assets_are_uploaded_once_across_experiments() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let model = Asset::from_content("model.py", "", b"print('hi')".to_vec()).expect("asset");
    let checksum = model.checksum().expect("checksum").to_string();

    let mut ids = Vec::new();
    for name in ["first", "second"] {
        let mut task = base_task();
        task.core_mut().common_assets.add(model.clone()).expect("add");
        let mut experiment = Experiment::from_task(name, Box::new(task));
        experiment
            .common_assets
            .add(Asset::from_content("copy.py", "lib", b"print('hi')".to_vec()).expect("asset"))
            .expect("add");
        platform
            .run_experiment(&mut experiment, &RunOptions::default())
            .expect("run");
        let assets_id = experiment.assets_id().expect("assets id").to_string();
        ids.push(assets_id);
        assert!(experiment.common_assets.is_frozen());
    }

    assert_eq!(backend.upload_count(&checksum), 1);
    assert_eq!(backend.blob_count(), 1);
    let collection = platform.get_asset_collection(&ids[0]).expect("collection");
    assert_eq!(collection.len(), 2);
    assert!(collection.get_one("model.py", "").is_some());
    assert!(collection.get_one("copy.py", "lib").is_some());
}

#[test]
fn identical_common_assets_share_one_blob() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let content = br#"{"a":1,"b":2}"#;
    let simulations = ["test.json", "test1.json"]
        .into_iter()
        .map(|filename| {
            let mut task = base_task();
            task.core_mut()
                .common_assets
                .add(Asset::from_content(filename, "", content.to_vec()).expect("asset"))
                .expect("add");
            Simulation::new(Box::new(task))
        })
        .collect();
    let mut experiment = Experiment::from_simulations("dedup", simulations);

    let report = platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    assert!(report.succeeded());
    let checksum = orch_core::hash::md5_hex(content);
    assert_eq!(checksum, "608de49a4600dbb5b173492759792e4a");
    let collection = platform
        .get_asset_collection(experiment.assets_id().expect("assets id"))
        .expect("collection");
    assert_eq!(collection.len(), 2);
    for filename in ["test.json", "test1.json"] {
        let asset = collection.get_one(filename, "").expect(filename);
        assert_eq!(asset.checksum().expect("checksum"), checksum);
    }
    assert_eq!(backend.upload_count(&checksum), 1);
}

#[test]
fn derived_parameters_reach_the_config_but_not_the_tags() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let mut builder = SweepBuilder::pair();
    builder
        .add_sweep_definition(
            "a",
            Arc::new(|simulation: &mut Simulation, value: &Value| {
                let a = value.as_i64().unwrap_or_default();
                simulation.task.set_parameter("b", json!(a + 2))?;
                simulation.task.set_parameter("a", value.clone())
            }),
            ints(&[0, 1, 2, 3, 4]),
        )
        .expect("a");
    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(builder);
    let mut experiment = Experiment::from_template("derived", template);

    let report = platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    assert_eq!(report.summary.succeeded, 5);
    let mut pairs = Vec::new();
    for simulation in experiment.simulations() {
        assert!(simulation.tags.get_str("a").is_some());
        assert_eq!(simulation.tags.get_str("b"), None);
        let files = platform.get_files(simulation, &["config.json"]).expect("config");
        let config: Value = serde_json::from_slice(&files["config.json"]).expect("json");
        pairs.push((config["a"].clone(), config["b"].clone()));
    }
    assert_eq!(
        pairs,
        [(0, 2), (1, 3), (2, 4), (3, 5), (4, 6)]
            .into_iter()
            .map(|(a, b)| (json!(a), json!(b)))
            .collect::<Vec<_>>()
    );
}

#[test]
fn pair_sweep_creates_one_simulation_per_row() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let mut builder = SweepBuilder::pair();
    builder.add_parameter("a", ints(&[1, 2, 3])).expect("a");
    builder.add_parameter("b", ints(&[10, 20, 30])).expect("b");
    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(builder);
    let mut experiment = Experiment::from_template("pair", template);

    let report = platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    assert_eq!(report.summary.total(), 3);
    assert_eq!(
        tag_pairs(&experiment),
        vec![
            ("1".to_string(), "10".to_string()),
            ("2".to_string(), "20".to_string()),
            ("3".to_string(), "30".to_string()),
        ]
    );
    let params: Vec<Value> = experiment
        .simulations()
        .iter()
        .map(|sim| sim.task.parameters().and_then(|p| p.get("b").cloned()).unwrap_or(Value::Null))
        .collect();
    assert_eq!(params, ints(&[10, 20, 30]));
}

#[test]
fn failing_simulation_fails_the_experiment_and_keeps_its_stderr() {
    let backend = Arc::new(MemoryBackend::new().with_script(|tags: &Tags| {
        if tags.get_str("a") == Some("1") && tags.get_str("b") == Some("9") {
            SimulationScript::fail("boom\n")
        } else {
            SimulationScript::succeed()
        }
    }));
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("failing");

    let report = platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    assert!(!report.succeeded());
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.succeeded, 3);
    assert_eq!(experiment.status(), EntityStatus::Failed);
    let failed = experiment
        .simulations()
        .iter()
        .find(|sim| sim.status() == EntityStatus::Failed)
        .expect("failed simulation");
    let files = platform.get_files(failed, &["stderr.txt"]).expect("stderr");
    assert_eq!(&*files["stderr.txt"], b"boom\n");
}

#[test]
fn cancelling_stops_waiting_without_failing() {
    let backend = Arc::new(MemoryBackend::new().with_script(|_: &Tags| SimulationScript::never_finish()));
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("cancelled");
    let interval = Duration::from_millis(400);
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let cancelled_at = Arc::new(Mutex::new(None::<Instant>));
    let stamp = Arc::clone(&cancelled_at);
    let armed = Arc::new(AtomicBool::new(false));
    let options = RunOptions::wait()
        .with_refresh_interval(interval)
        .with_cancel(cancel)
        .with_progress(Arc::new(move |event: &ProgressEvent| {
            if matches!(event, ProgressEvent::StatusRefreshed { .. }) && !armed.swap(true, Ordering::SeqCst) {
                let trigger = trigger.clone();
                let stamp = Arc::clone(&stamp);
                // Lands while the driver sleeps between polls.
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(50));
                    *stamp.lock().expect("stamp") = Some(Instant::now());
                    trigger.cancel();
                });
            }
        }));

    let report = platform.run_experiment(&mut experiment, &options).expect("run");
    let returned_at = Instant::now();

    assert!(report.cancelled);
    assert!(!report.succeeded());
    assert_eq!(report.summary.running, 4);
    assert!(!experiment.done());
    let cancelled_at = cancelled_at.lock().expect("stamp").expect("cancel was triggered");
    assert!(returned_at.duration_since(cancelled_at) < interval);
    for simulation in experiment.simulations() {
        let id = simulation.id().expect("id");
        assert_eq!(backend.status_of(id), Some(EntityStatus::Running));
    }
    assert!(!backend.op_log().iter().any(|op| op.op == OpKind::Cancel));
}

#[test]
fn waiting_past_the_deadline_is_a_timeout() {
    let backend = Arc::new(MemoryBackend::new().with_script(|_: &Tags| SimulationScript::never_finish()));
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("slow");
    let options = RunOptions::wait().with_timeout(Duration::from_millis(20));

    let err = platform
        .run_experiment(&mut experiment, &options)
        .expect_err("timeout");

    assert_eq!(err.kind(), ErrorKind::WaitTimeout);
    assert_eq!(err.info().entity_id.as_deref(), experiment.id());
    assert_eq!(experiment.simulations().len(), 4);
}

#[test]
fn id_file_round_trip_rebuilds_the_experiment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("round-trip");
    experiment.tags.insert("owner", "lab");
    platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    let path = dir.path().join("experiment.round-trip.id");
    write_id_file(&path, &experiment, Some(platform.name()), None).expect("write");
    let handle = platform.get_item_from_id_file(&path).expect("handle");
    assert_eq!(Some(handle.id.as_str()), experiment.id());
    assert_eq!(handle.item_type, ItemType::Experiment);

    let loaded = platform.get_experiment(&handle.id, true).expect("experiment");
    assert_eq!(loaded.tags, experiment.tags);
    assert_eq!(loaded.parent_id, experiment.parent_id);
    assert_eq!(loaded.assets_id(), experiment.assets_id());
    assert_eq!(loaded.simulations().len(), 4);
    let mut loaded_pairs = tag_pairs(&loaded);
    loaded_pairs.sort();
    assert_eq!(loaded_pairs, tag_pairs(&experiment));
    for original in experiment.simulations() {
        let loaded = loaded
            .simulations()
            .iter()
            .find(|sim| sim.id() == original.id())
            .expect("reloaded simulation");
        assert_eq!(loaded.status(), EntityStatus::Succeeded);
        assert_eq!(loaded.task.command().cmd(), original.task.command().cmd());
        assert_eq!(loaded.task.parameters(), original.task.parameters());
    }
}

#[test]
fn running_twice_creates_nothing_new() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("twice");
    platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("first run");
    let first_id = experiment.id().map(str::to_string);

    let report = platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("second run");

    assert_eq!(experiment.id().map(str::to_string), first_id);
    assert!(report.succeeded());
    assert_eq!(backend.count(ItemType::Experiment), 1);
    assert_eq!(backend.count(ItemType::Simulation), 4);
    assert_eq!(backend.count(ItemType::Suite), 1);
}

#[test]
fn generator_experiments_are_created_once() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let produced = (0..5).map(|i| {
        let mut task = base_task();
        task.set_parameter("i", json!(i)).expect("parameter");
        let mut simulation = Simulation::from_task(task);
        simulation.tags.insert("i", i.to_string());
        simulation
    });
    let mut experiment = Experiment::from_generator("generated", produced);

    let report = platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");
    assert_eq!(report.summary.succeeded, 5);

    platform
        .run_experiment(&mut experiment, &RunOptions::default())
        .expect("rerun");
    assert_eq!(backend.count(ItemType::Simulation), 5);
    let order: Vec<&str> = experiment
        .simulations()
        .iter()
        .filter_map(|sim| sim.tags.get_str("i"))
        .collect();
    assert_eq!(order, vec!["0", "1", "2", "3", "4"]);
}

#[test]
fn failed_creations_are_retried_then_marked_failed() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_simulation_creates_where(|tags: &Tags| tags.get_str("a") == Some("0"), 1);
    backend.fail_simulation_creates_where(|tags: &Tags| tags.get_str("b") == Some("9"), 10);
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("flaky");

    let report = platform
        .run_experiment(&mut experiment, &RunOptions::wait().with_retries(1))
        .expect("run");

    assert_eq!(report.creation_failures.len(), 2);
    assert!(report
        .creation_failures
        .iter()
        .all(|err| err.kind() == ErrorKind::BackendCreateFailure));
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(experiment.simulations().len(), 4);
    let uncreated: Vec<(String, String)> = experiment
        .simulations()
        .iter()
        .filter(|sim| !sim.is_created())
        .map(|sim| {
            (
                sim.tags.get_str("a").unwrap_or_default().to_string(),
                sim.tags.get_str("b").unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        uncreated,
        vec![("0".to_string(), "9".to_string()), ("1".to_string(), "9".to_string())]
    );
}

#[test]
fn transient_experiment_failures_are_retried_with_backoff() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_next_experiment_creates(2, true);
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("transient");
    platform
        .run_experiment(&mut experiment, &RunOptions::default())
        .expect("run");
    assert!(experiment.id().is_some());

    backend.fail_next_experiment_creates(1, false);
    let mut rejected = cross_experiment("rejected");
    let err = platform
        .run_experiment(&mut rejected, &RunOptions::default())
        .expect_err("permanent failure");
    assert_eq!(err.kind(), ErrorKind::BackendCreateFailure);
    assert_eq!(err.info().context.get("attempts").map(String::as_str), Some("1"));
    assert!(rejected.id().is_none());
}

#[test]
fn transient_failures_past_the_last_attempt_become_create_failures() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_next_experiment_creates(10, true);
    let platform = platform_over(&backend);
    let mut experiment = cross_experiment("flaky");

    let err = platform
        .run_experiment(&mut experiment, &RunOptions::default())
        .expect_err("retries exhausted");

    assert_eq!(err.kind(), ErrorKind::BackendCreateFailure);
    assert_eq!(err.info().code, "backend.retries_exhausted");
    assert_eq!(err.info().context.get("attempts").map(String::as_str), Some("3"));
    assert!(err
        .info()
        .cause
        .as_deref()
        .is_some_and(|cause| cause.contains("memory.experiment_create")));
    assert!(experiment.id().is_none());
}

#[test]
fn suites_launch_every_experiment_before_waiting() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = platform_over(&backend);
    let mut suite = Suite::new("study");
    suite.add_experiment(cross_experiment("one")).expect("one");
    suite.add_experiment(cross_experiment("two")).expect("two");

    let report = platform.run_suite(&mut suite, &RunOptions::wait()).expect("run");

    assert_eq!(report.experiment_ids.len(), 2);
    assert_eq!(report.summary.succeeded, 8);
    assert_eq!(report.suite_id.as_deref(), suite.id());
    for experiment in suite.experiments() {
        assert_eq!(experiment.parent_id.as_deref(), suite.id());
    }
    let log = backend.op_log();
    let runs: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, op)| op.op == OpKind::Run && op.item_type == ItemType::Experiment)
        .map(|(idx, _)| idx)
        .collect();
    let first_refresh = log.iter().position(|op| op.op == OpKind::Refresh).expect("refresh");
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| *run < first_refresh));

    let loaded = platform.get_suite(suite.id().expect("id")).expect("suite");
    assert_eq!(loaded.experiments().len(), 2);
}

#[test]
fn progress_events_follow_the_lifecycle() {
    let backend = Arc::new(MemoryBackend::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let platform = platform_over(&backend).with_progress(Arc::new(move |event: &ProgressEvent| {
        sink_events.lock().expect("events").push(event.clone());
    }));
    let mut experiment = cross_experiment("events");
    platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    let events = events.lock().expect("events");
    assert!(matches!(events.first(), Some(ProgressEvent::ExperimentCreated { .. })));
    let created: Vec<usize> = events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::SimulationsCreated { created, expected, .. } => {
                assert_eq!(*expected, Some(4));
                Some(*created)
            }
            _ => None,
        })
        .collect();
    assert_eq!(created.last(), Some(&4));
    assert!(events.iter().any(|event| matches!(event, ProgressEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(ProgressEvent::StatusRefreshed { .. })));
}
