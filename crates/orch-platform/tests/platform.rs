use std::sync::Arc;

use orch_core::errors::{ErrorInfo, ErrorKind, OrchError};
use orch_core::ids::ItemType;
use orch_core::status::EntityStatus;
use orch_core::tags::Tags;
use orch_entities::{Experiment, Suite, SweepBuilder, TemplatedSimulations, WorkItem};
use orch_platform::{
    clear_global_platform, enter, resolve_platform, set_global_platform, Backend, BackoffConfig, FnHook, HookSite,
    ItemRef, MemoryBackend, Platform, PlatformConfig, RunOptions, Runnable, SimulationScript,
};
use orch_task::{CommandLine, JsonConfiguredTask, Task};
use proptest::prelude::*;
use serde_json::json;

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

fn base_task() -> JsonConfiguredTask {
    JsonConfiguredTask::new(CommandLine::from_string("python model.py --config config.json").expect("command"))
}

fn sweep_experiment(name: &str, values: &[i64]) -> Experiment {
    let mut builder = SweepBuilder::cross();
    builder
        .add_parameter("x", values.iter().map(|v| json!(v)).collect())
        .expect("x");
    let mut template = TemplatedSimulations::from_task(base_task());
    template.add_builder(builder);
    Experiment::from_template(name, template)
}

#[test]
fn creating_a_saved_entity_returns_its_handle() {
    let backend = MemoryBackend::new();

    let mut suite = Suite::new("once");
    let handle = backend.suites().platform_create(&mut suite).expect("create suite");
    suite.mark_created(handle.clone());
    let again = backend.suites().platform_create(&mut suite).expect("create suite again");
    assert_eq!(again.id, handle.id);
    assert_eq!(backend.count(ItemType::Suite), 1);

    let mut experiment = Experiment::new("once");
    experiment.parent_id = suite.id().map(str::to_string);
    let handle = backend.experiments().platform_create(&mut experiment).expect("create experiment");
    experiment.mark_created(handle.clone());
    for _ in 0..3 {
        let again = backend.experiments().platform_create(&mut experiment).expect("create experiment again");
        assert_eq!(again.id, handle.id);
    }
    assert_eq!(backend.count(ItemType::Experiment), 1);
}

#[test]
fn pre_create_hooks_can_tag_simulations() {
    let backend = Arc::new(MemoryBackend::new());
    let hook = FnHook::new("stamp", HookSite::PreCreate, |item: &mut ItemRef<'_>| {
        if let ItemRef::Simulation(simulation) = item {
            simulation.tags.insert("stamped", "yes");
        }
        Ok(())
    })
    .for_type(ItemType::Simulation);
    let platform = Platform::new(backend.clone())
        .with_config(fast_config())
        .with_hook(Arc::new(hook));
    let mut experiment = sweep_experiment("stamped", &[1, 2]);

    platform
        .run_experiment(&mut experiment, &RunOptions::default())
        .expect("run");

    for simulation in experiment.simulations() {
        assert_eq!(simulation.tags.get_str("stamped"), Some("yes"));
        let stored = platform
            .get_simulation(simulation.id().expect("id"))
            .expect("stored simulation");
        assert_eq!(stored.tags.get_str("stamped"), Some("yes"));
    }
    assert_eq!(experiment.tags.get_str("stamped"), None);
}

#[test]
fn failing_simulation_hook_only_fails_that_simulation() {
    let backend = Arc::new(MemoryBackend::new());
    let hook = FnHook::new("reject-two", HookSite::PreCreate, |item: &mut ItemRef<'_>| match item {
        ItemRef::Simulation(simulation) if simulation.tags.get_str("x") == Some("2") => Err(OrchError::Invalid(
            ErrorInfo::new("test.rejected", "x=2 is not allowed"),
        )),
        _ => Ok(()),
    });
    let platform = Platform::new(backend.clone())
        .with_config(fast_config())
        .with_hook(Arc::new(hook));
    let mut experiment = sweep_experiment("partly-rejected", &[1, 2, 3]);

    let report = platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    assert_eq!(report.creation_failures.len(), 1);
    let failure = &report.creation_failures[0];
    assert_eq!(failure.kind(), ErrorKind::HookError);
    assert_eq!(failure.info().code, "hook.pre_create_item");
    assert_eq!(failure.info().context.get("hook").map(String::as_str), Some("reject-two"));
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(backend.count(ItemType::Simulation), 2);
}

#[test]
fn run_hooks_see_every_simulation() {
    let backend = Arc::new(MemoryBackend::new());
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut platform = Platform::new(backend.clone()).with_config(fast_config());
    for site in [HookSite::PreRun, HookSite::PostRun] {
        let seen = Arc::clone(&seen);
        let hook = FnHook::new(site.as_str(), site, move |item: &mut ItemRef<'_>| {
            if let ItemRef::Simulation(simulation) = item {
                let x = simulation.tags.get_str("x").unwrap_or("-").to_string();
                seen.lock().expect("seen").push((site, x, simulation.status()));
            }
            Ok(())
        })
        .for_type(ItemType::Simulation);
        platform = platform.with_hook(Arc::new(hook));
    }
    let mut experiment = sweep_experiment("observed", &[1, 2]);

    platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect("run");

    let seen = seen.lock().expect("seen").clone();
    assert_eq!(
        seen,
        vec![
            (HookSite::PreRun, "1".to_string(), EntityStatus::Created),
            (HookSite::PreRun, "2".to_string(), EntityStatus::Created),
            (HookSite::PostRun, "1".to_string(), EntityStatus::Succeeded),
            (HookSite::PostRun, "2".to_string(), EntityStatus::Succeeded),
        ]
    );
}

#[test]
fn run_hooks_bracket_the_suite() {
    let backend = Arc::new(MemoryBackend::new());
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut platform = Platform::new(backend.clone()).with_config(fast_config());
    for site in [HookSite::PreRun, HookSite::PostRun] {
        let order = Arc::clone(&order);
        let hook = FnHook::new(site.as_str(), site, move |item: &mut ItemRef<'_>| {
            order.lock().expect("order").push((site, item.item_type()));
            Ok(())
        });
        platform = platform.with_hook(Arc::new(hook));
    }
    let mut suite = Suite::new("bracketed");
    suite
        .add_experiment(sweep_experiment("inner", &[1]))
        .expect("add experiment");

    platform.run_suite(&mut suite, &RunOptions::wait()).expect("run");

    assert_eq!(
        *order.lock().expect("order"),
        vec![
            (HookSite::PreRun, ItemType::Suite),
            (HookSite::PreRun, ItemType::Experiment),
            (HookSite::PreRun, ItemType::Simulation),
            (HookSite::PostRun, ItemType::Simulation),
            (HookSite::PostRun, ItemType::Experiment),
            (HookSite::PostRun, ItemType::Suite),
        ]
    );
}

#[test]
fn failing_pre_run_hook_stops_the_run() {
    let backend = Arc::new(MemoryBackend::new());
    let hook = FnHook::new("veto", HookSite::PreRun, |_: &mut ItemRef<'_>| {
        Err(OrchError::Invalid(ErrorInfo::new("test.veto", "not today")))
    })
    .for_type(ItemType::Experiment);
    let platform = Platform::new(backend.clone())
        .with_config(fast_config())
        .with_hook(Arc::new(hook));
    let mut experiment = sweep_experiment("vetoed", &[1]);

    let err = platform
        .run_experiment(&mut experiment, &RunOptions::wait())
        .expect_err("hook error");

    assert_eq!(err.kind(), ErrorKind::HookError);
    assert_eq!(err.info().code, "hook.pre_run_item");
    assert_eq!(err.info().entity_id.as_deref(), experiment.id());
    assert!(backend
        .op_log()
        .iter()
        .all(|op| op.op != orch_platform::OpKind::Run));
}

#[test]
fn unmet_requirements_fail_before_any_creation() {
    let backend = Arc::new(MemoryBackend::new().with_capabilities(["linux"]));
    let platform = Platform::new(backend.clone()).with_config(fast_config());
    let mut task = base_task();
    task.core_mut().platform_requirements.insert("gpu".to_string());
    let mut experiment = Experiment::from_task("needs-gpu", Box::new(task));

    let err = platform
        .run_experiment(&mut experiment, &RunOptions::default())
        .expect_err("unsupported");

    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert_eq!(err.info().context.get("missing").map(String::as_str), Some("gpu"));
    assert_eq!(backend.count(ItemType::Experiment), 0);
    assert_eq!(backend.count(ItemType::Simulation), 0);
    assert!(platform.are_requirements_met(&["linux".to_string()].into_iter().collect()));
}

#[test]
fn unsupported_item_types_are_rejected() {
    let backend = Arc::new(MemoryBackend::new().without_item_type(ItemType::WorkItem));
    let platform = Platform::new(backend).with_config(fast_config());
    let mut item = WorkItem::new("analysis", CommandLine::from_string("python analyze.py").expect("command"));

    let err = platform
        .run_work_item(&mut item, &RunOptions::default())
        .expect_err("unsupported");

    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert!(item.id().is_none());
}

#[test]
fn runs_resolve_the_scoped_then_global_platform() {
    clear_global_platform();
    let err = resolve_platform(None).expect_err("nothing registered");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let scoped_backend = Arc::new(MemoryBackend::new().with_name("scoped"));
    let scoped = Arc::new(Platform::new(scoped_backend.clone()).with_config(fast_config()));
    {
        let _scope = enter(Arc::clone(&scoped));
        let mut experiment = sweep_experiment("scoped", &[1, 2]);
        let report = experiment.run(None, &RunOptions::wait()).expect("scoped run");
        assert!(report.succeeded());
    }
    assert_eq!(scoped_backend.count(ItemType::Simulation), 2);

    let global_backend = Arc::new(MemoryBackend::new().with_name("global"));
    set_global_platform(Arc::new(Platform::new(global_backend.clone()).with_config(fast_config())));
    let mut experiment = sweep_experiment("global", &[1]);
    experiment.run(None, &RunOptions::wait()).expect("global run");
    assert_eq!(global_backend.count(ItemType::Simulation), 1);
    assert_eq!(resolve_platform(Some(&scoped)).expect("explicit").name(), "scoped");
    clear_global_platform();
}

#[test]
fn file_cache_serves_repeats_until_the_job_finishes() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = Platform::new(backend).with_config(fast_config());
    let mut experiment = sweep_experiment("cached", &[7]);
    platform
        .run_experiment(&mut experiment, &RunOptions::default())
        .expect("run");

    let simulation = experiment.simulations()[0].clone();
    let first = platform.get_files(&simulation, &["config.json"]).expect("config");
    let second = platform.get_files(&simulation, &["config.json"]).expect("config again");
    assert_eq!(first, second);
    let config: serde_json::Value = serde_json::from_slice(&first["config.json"]).expect("json");
    assert_eq!(config["x"], json!(7));
    let stats = platform.cache_stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));

    platform
        .wait_till_done(&mut experiment, &RunOptions::wait())
        .expect("wait");
    assert_eq!(platform.cache_stats().entries, 0);
    platform.get_files(&experiment.simulations()[0], &["config.json"]).expect("refetch");
    assert_eq!(platform.cache_stats().misses, 2);

    let err = platform
        .get_files(&experiment.simulations()[0], &["missing.txt"])
        .expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::AssetNotFound);
}

#[test]
fn backward_status_reports_are_ignored() {
    let backend = Arc::new(MemoryBackend::new().with_script(|_: &Tags| {
        SimulationScript::new(vec![
            EntityStatus::Running,
            EntityStatus::Succeeded,
            EntityStatus::Running,
        ])
    }));
    let platform = Platform::new(backend).with_config(fast_config());
    let mut experiment = sweep_experiment("flapping", &[1]);
    platform
        .run_experiment(&mut experiment, &RunOptions::default())
        .expect("run");

    let simulation = &mut experiment.simulations_mut()[0];
    let mut seen = Vec::new();
    for _ in 0..3 {
        platform.refresh_simulation(simulation).expect("refresh");
        seen.push(simulation.status());
    }
    assert_eq!(
        seen,
        vec![EntityStatus::Running, EntityStatus::Succeeded, EntityStatus::Succeeded]
    );
}

#[test]
fn work_items_run_and_expose_outputs() {
    let backend = Arc::new(MemoryBackend::new());
    let platform = Platform::new(backend.clone()).with_config(fast_config());
    let mut item = WorkItem::new("analysis", CommandLine::from_string("python analyze.py").expect("command"));
    item.tags.insert("kind", "analysis");

    let report = platform.run_work_item(&mut item, &RunOptions::wait()).expect("run");

    assert!(report.succeeded());
    assert_eq!(item.status(), EntityStatus::Succeeded);
    let files = platform.get_work_item_files(&item, &["stdout.txt"]).expect("stdout");
    assert_eq!(&*files["stdout.txt"], b"done\n");
    let stored = platform.get_work_item(item.id().expect("id")).expect("stored");
    assert_eq!(stored.name, "analysis");
    assert_eq!(stored.tags.get_str("kind"), Some("analysis"));
    assert_eq!(stored.status(), EntityStatus::Succeeded);
}

#[test]
fn explicit_cancel_marks_running_simulations_failed() {
    let backend = Arc::new(MemoryBackend::new().with_script(|_: &Tags| SimulationScript::never_finish()));
    let platform = Platform::new(backend.clone()).with_config(fast_config());
    let mut experiment = sweep_experiment("stopped", &[1, 2]);
    platform
        .run_experiment(&mut experiment, &RunOptions::default())
        .expect("run");

    platform
        .cancel(ItemRef::Experiment(&mut experiment))
        .expect("cancel");

    assert!(experiment.done());
    assert_eq!(experiment.status(), EntityStatus::Failed);
    for simulation in experiment.simulations() {
        assert_eq!(backend.status_of(simulation.id().expect("id")), Some(EntityStatus::Failed));
    }
}

#[test]
fn partial_yaml_configuration_keeps_defaults() {
    let config = PlatformConfig::from_yaml_str(
        "batch_size: 5\nbackoff:\n  attempts: 2\ncache:\n  max_entries: 3\n",
    )
    .expect("config");
    let defaults = PlatformConfig::default();

    assert_eq!(config.batch_size, 5);
    assert_eq!(config.backoff.attempts, 2);
    assert_eq!(config.backoff.base_ms, defaults.backoff.base_ms);
    assert_eq!(config.cache.max_entries, 3);
    assert_eq!(config.refresh_interval_ms, defaults.refresh_interval_ms);
    assert_eq!(PlatformConfig::from_yaml_str("  \n").expect("empty"), defaults);
    assert!(PlatformConfig::from_yaml_str("batch_size: [1").is_err());
}

#[test]
fn poll_interval_is_clamped_to_the_floor() {
    let config = PlatformConfig {
        min_refresh_interval_ms: 50,
        ..PlatformConfig::default()
    };
    assert_eq!(
        config.clamp_interval(std::time::Duration::from_millis(5)),
        std::time::Duration::from_millis(50)
    );
    assert_eq!(
        config.clamp_interval(std::time::Duration::from_millis(500)),
        std::time::Duration::from_millis(500)
    );
}

#[test]
fn backoff_delays_grow_to_the_cap() {
    let policy = BackoffConfig {
        attempts: 5,
        base_ms: 10,
        cap_ms: 35,
    };
    let delays: Vec<u128> = (1..=4).map(|attempt| policy.delay(attempt).as_millis()).collect();
    assert_eq!(delays, vec![10, 20, 35, 35]);
}

proptest! {
    #[test]
    fn backoff_delays_never_shrink_or_pass_the_cap(base in 1u64..500, cap in 1u64..5_000, attempt in 1u32..40) {
        let policy = BackoffConfig { attempts: 5, base_ms: base, cap_ms: cap };
        let delay = policy.delay(attempt);
        prop_assert!(delay <= std::time::Duration::from_millis(cap));
        prop_assert!(policy.delay(attempt + 1) >= delay);
    }
}
