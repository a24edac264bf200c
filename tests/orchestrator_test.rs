//! End-to-end tests for the experiment orchestrator

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::TimeDelta;
use serde_json::json;
use trueno_ab::clock::ManualClock;
use trueno_ab::model::{
    Assignment, Conversion, ConversionKey, Experiment, ExperimentConfig, ExperimentId,
    ExperimentStatus, Goal, StatField, Variation, VariationConfig, VariationId, VariationUpdate,
};
use trueno_ab::store::{ExperimentStore, MemoryStore, Upsert};
use trueno_ab::targeting::{RequestContext, RuleType, TargetingEvaluator, TargetingRule};
use trueno_ab::{EngineConfig, Error, ExperimentOrchestrator, Significance};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine() -> ExperimentOrchestrator<MemoryStore> {
    init_tracing();
    ExperimentOrchestrator::builder(MemoryStore::new())
        .build()
        .unwrap()
}

fn ab_config(name: &str) -> ExperimentConfig {
    ExperimentConfig::builder(name)
        .variation(VariationConfig::new("a", "Control").traffic_percentage(50.0))
        .variation(VariationConfig::new("b", "Challenger").traffic_percentage(50.0))
        .goal(Goal::new("signup", "signup"))
        .build()
}

fn running(engine: &ExperimentOrchestrator<MemoryStore>, config: ExperimentConfig) -> u64 {
    let id = engine.create_experiment(config).unwrap();
    engine.start_experiment(id).unwrap();
    id
}

#[test]
fn test_assign_convert_report() {
    let engine = engine();
    let id = running(&engine, ab_config("Signup button"));
    let context = RequestContext::default();

    let served = engine
        .get_user_variation(id, "alice", &context)
        .unwrap()
        .unwrap();
    let again = engine
        .get_user_variation(id, "alice", &context)
        .unwrap()
        .unwrap();
    assert_eq!(served.id, again.id);

    assert_eq!(engine.track_conversion("alice", "signup", &json!({})).unwrap(), 1);
    assert_eq!(engine.track_conversion("alice", "signup", &json!({})).unwrap(), 0);

    let results = engine.get_experiment_results(id).unwrap();
    assert_eq!(results.total_visitors, 1);

    let mine = results.variation(&served.key).unwrap();
    assert_eq!((mine.visitors, mine.conversions), (1, 1));
    assert!((mine.conversion_rate - 100.0).abs() < f64::EPSILON);

    let other_key = if served.key == "a" { "b" } else { "a" };
    let other = results.variation(other_key).unwrap();
    assert_eq!((other.visitors, other.conversions), (0, 0));
    assert!(other.conversion_rate.abs() < f64::EPSILON);

    assert!(!results.significance.is_significant());
}

#[test]
fn test_conversion_without_assignment_is_ignored() {
    let engine = engine();
    let id = running(&engine, ab_config("Quiz"));

    assert_eq!(engine.track_conversion("bob", "signup", &json!({})).unwrap(), 0);
    assert_eq!(engine.store().conversion_count(), 0);
    assert!(engine.store().get_assignment(id, "bob").unwrap().is_none());
}

#[test]
fn test_unmatched_event_records_nothing() {
    let engine = engine();
    let id = running(&engine, ab_config("Quiz"));
    engine
        .get_user_variation(id, "carol", &RequestContext::default())
        .unwrap();

    assert_eq!(engine.track_conversion("carol", "quiz_complete", &json!({})).unwrap(), 0);
}

#[test]
fn test_single_variation_rejected_before_persist() {
    let engine = engine();
    let config = ExperimentConfig::builder("Lonely")
        .variation(VariationConfig::new("a", "Only").traffic_percentage(100.0))
        .goal(Goal::new("g", "signup"))
        .build();

    let err = engine.create_experiment(config).unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(err
        .to_string()
        .to_lowercase()
        .contains("at least 2 variations are required"));
    assert_eq!(engine.store().experiment_count(), 0);
    assert_eq!(engine.store().variation_count(), 0);
}

#[test]
fn test_create_from_json_payload() {
    let engine = engine();
    let config: ExperimentConfig = serde_json::from_str(
        r#"{
            "name": "Pricing page",
            "type": "split",
            "traffic_allocation": 100,
            "variations": [
                {"key": "a", "name": "A", "traffic_percentage": 0},
                {"key": "b", "name": "B", "traffic_percentage": 0},
                {"key": "c", "name": "C", "traffic_percentage": 0}
            ],
            "goals": [{"id": "purchase", "event": "purchase"}]
        }"#,
    )
    .unwrap();

    let id = engine.create_experiment(config).unwrap();
    engine.start_experiment(id).unwrap();

    let served = engine
        .get_user_variation(id, "dave", &RequestContext::default())
        .unwrap();
    assert!(served.is_some());
}

#[test]
fn test_pause_stops_new_assignments() {
    let engine = engine();
    let id = running(&engine, ab_config("Pause me"));
    let context = RequestContext::default();
    engine.get_user_variation(id, "erin", &context).unwrap();

    engine.pause_experiment(id).unwrap();
    assert!(engine.get_user_variation(id, "frank", &context).unwrap().is_none());
    assert_eq!(engine.store().assignment_count(), 1);

    engine.resume_experiment(id).unwrap();
    assert!(engine.get_user_variation(id, "frank", &context).unwrap().is_some());
    assert_eq!(engine.store().assignment_count(), 2);
}

#[test]
fn test_stop_marks_winner_and_runs_hook() {
    init_tracing();
    let applied = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&applied);
    let engine = ExperimentOrchestrator::builder(MemoryStore::new())
        .winner_hook(move |_: &Experiment, variation: &Variation| -> anyhow::Result<()> {
            assert_eq!(variation.key, "b");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();
    let id = running(&engine, ab_config("Winner"));
    let winner = engine.store().list_variations(id).unwrap()[1].id;

    engine.stop_experiment(id, Some(winner)).unwrap();

    assert_eq!(applied.load(Ordering::SeqCst), 1);
    let experiment = engine.store().get_experiment(id).unwrap().unwrap();
    assert_eq!(experiment.status, ExperimentStatus::Completed);
    assert!(experiment.ended_at.is_some());
    assert!(engine.store().get_variation(winner).unwrap().unwrap().is_winner);
    assert!(engine.get_experiment_results(id).unwrap().variation("b").unwrap().is_winner);
}

#[test]
fn test_stop_rolls_back_when_hook_fails() {
    init_tracing();
    let engine = ExperimentOrchestrator::builder(MemoryStore::new())
        .winner_hook(|_: &Experiment, _: &Variation| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("publish failed"))
        })
        .build()
        .unwrap();
    let id = running(&engine, ab_config("Rollback"));
    let winner = engine.store().list_variations(id).unwrap()[0].id;

    let err = engine.stop_experiment(id, Some(winner)).unwrap_err();

    assert!(matches!(err, Error::WinnerHook(_)));
    assert!(err.to_string().contains("publish failed"));
    let experiment = engine.store().get_experiment(id).unwrap().unwrap();
    assert_eq!(experiment.status, ExperimentStatus::Running);
    assert!(experiment.ended_at.is_none());
    assert!(!engine.store().get_variation(winner).unwrap().unwrap().is_winner);
}

#[test]
fn test_stop_rejects_foreign_winner() {
    let engine = engine();
    let id = running(&engine, ab_config("Mine"));
    let other = running(&engine, ab_config("Theirs"));
    let foreign = engine.store().list_variations(other).unwrap()[0].id;

    let err = engine.stop_experiment(id, Some(foreign)).unwrap_err();

    assert!(matches!(err, Error::VariationNotFound(v) if v == foreign));
    assert_eq!(
        engine.store().get_experiment(id).unwrap().unwrap().status,
        ExperimentStatus::Running
    );
    assert!(!engine.store().get_variation(foreign).unwrap().unwrap().is_winner);
}

#[test]
fn test_completed_is_terminal() {
    let engine = engine();
    let id = running(&engine, ab_config("Done"));
    engine.stop_experiment(id, None).unwrap();

    assert!(matches!(
        engine.resume_experiment(id),
        Err(Error::InvalidTransition {
            from: ExperimentStatus::Completed,
            to: ExperimentStatus::Running
        })
    ));
    assert!(matches!(
        engine.stop_experiment(id, None),
        Err(Error::InvalidTransition { .. })
    ));
}

#[test]
fn test_direct_store_change_visible_after_ttl() {
    init_tracing();
    let clock = Arc::new(ManualClock::default());
    let engine = ExperimentOrchestrator::builder(MemoryStore::new())
        .clock(clock.clone())
        .config(EngineConfig::default().with_cache_ttl(std::time::Duration::from_secs(300)))
        .build()
        .unwrap();
    let id = running(&engine, ab_config("Stale"));
    let context = RequestContext::default();
    assert!(engine.get_user_variation(id, "u1", &context).unwrap().is_some());

    let mut experiment = engine.store().get_experiment(id).unwrap().unwrap();
    experiment.status = ExperimentStatus::Paused;
    engine.store().update_experiment(&experiment).unwrap();

    clock.advance(TimeDelta::seconds(120));
    assert!(engine.get_user_variation(id, "u2", &context).unwrap().is_some());

    clock.advance(TimeDelta::seconds(180));
    assert!(engine.get_user_variation(id, "u3", &context).unwrap().is_none());
}

#[test]
fn test_targeting_rules_gate_assignment() {
    init_tracing();
    let mut targeting = TargetingEvaluator::new();
    targeting.register("plan", |value, context| {
        context.attributes.get("plan").map(String::as_str) == value.as_str()
    });
    let engine = ExperimentOrchestrator::builder(MemoryStore::new())
        .targeting(targeting)
        .build()
        .unwrap();

    let mut config = ab_config("Mobile pros");
    config.targeting = vec![
        TargetingRule::new(RuleType::Device, json!(["mobile", "tablet"])),
        TargetingRule::custom("plan", "pro"),
    ];
    let id = running(&engine, config);

    let desktop = RequestContext::default()
        .with_device("desktop")
        .with_attribute("plan", "pro");
    let free_mobile = RequestContext::default()
        .with_device("Mobile")
        .with_attribute("plan", "free");
    let pro_mobile = RequestContext::default()
        .with_device("Mobile")
        .with_attribute("plan", "pro");

    assert!(engine.get_user_variation(id, "x", &desktop).unwrap().is_none());
    assert!(engine.get_user_variation(id, "x", &free_mobile).unwrap().is_none());
    assert!(engine.get_user_variation(id, "x", &pro_mobile).unwrap().is_some());
    assert_eq!(engine.store().assignment_count(), 1);
}

#[test]
fn test_zero_traffic_allocation_serves_nobody() {
    let engine = engine();
    let mut config = ab_config("Dark launch");
    config.traffic_allocation = 0.0;
    let id = running(&engine, config);

    for i in 0..200 {
        let served = engine
            .get_user_variation(id, &format!("u{i}"), &RequestContext::default())
            .unwrap();
        assert!(served.is_none());
    }
    assert_eq!(engine.store().assignment_count(), 0);
}

#[test]
fn test_results_with_clear_winner() {
    let engine = engine();
    let id = running(&engine, ab_config("Signup copy"));
    let context = RequestContext::default();

    // Convert every challenger visitor and no control visitor
    for i in 0..400 {
        let user = format!("visitor-{i}");
        let served = engine.get_user_variation(id, &user, &context).unwrap().unwrap();
        if served.key == "b" {
            engine.track_conversion(&user, "signup", &json!({})).unwrap();
        }
    }

    let results = engine.get_experiment_results(id).unwrap();
    assert_eq!(results.total_visitors, 400);
    let control = results.variation("a").unwrap();
    let challenger = results.variation("b").unwrap();
    assert!(control.is_control);
    assert!(control.improvement.is_none());
    assert!(control.significance.is_none());
    assert!(challenger.significance.unwrap().significant);

    match results.significance {
        Significance::Computed(result) => {
            assert!(result.significant);
            assert!(result.p_value < 0.05);
        }
        Significance::Undecided => panic!("expected computed significance"),
    }
}

#[test]
fn test_results_unknown_experiment() {
    let engine = engine();
    assert!(matches!(
        engine.get_experiment_results(404),
        Err(Error::ExperimentNotFound(404))
    ));
}

#[test]
fn test_priority_order_for_conversions() {
    let engine = engine();
    let low = running(&engine, ab_config("Low"));
    let mut high_config = ab_config("High");
    high_config.priority = 10;
    let high = running(&engine, high_config);
    let context = RequestContext::default();
    engine.get_user_variation(low, "gina", &context).unwrap();
    engine.get_user_variation(high, "gina", &context).unwrap();

    assert_eq!(engine.track_conversion("gina", "signup", &json!({"value": 5})).unwrap(), 2);

    let experiments = engine.store().list_experiments(ExperimentStatus::Running).unwrap();
    assert_eq!(experiments[0].id, high);
    assert_eq!(experiments[1].id, low);
}

/// `MemoryStore` that fails chosen writes with `Error::Store`.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    variation_inserts: AtomicUsize,
    fail_variation_insert_at: usize,
    fail_variation_updates: AtomicBool,
}

impl FaultyStore {
    fn failing_variation_insert(nth: usize) -> Self {
        Self {
            fail_variation_insert_at: nth,
            ..Self::default()
        }
    }
}

impl ExperimentStore for FaultyStore {
    fn list_experiments(&self, status: ExperimentStatus) -> trueno_ab::Result<Vec<Experiment>> {
        self.inner.list_experiments(status)
    }

    fn get_experiment(&self, id: ExperimentId) -> trueno_ab::Result<Option<Experiment>> {
        self.inner.get_experiment(id)
    }

    fn insert_experiment(&self, experiment: Experiment) -> trueno_ab::Result<ExperimentId> {
        self.inner.insert_experiment(experiment)
    }

    fn update_experiment(&self, experiment: &Experiment) -> trueno_ab::Result<()> {
        self.inner.update_experiment(experiment)
    }

    fn insert_variation(&self, variation: Variation) -> trueno_ab::Result<VariationId> {
        let call = self.variation_inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_variation_insert_at {
            return Err(Error::Store("variation insert refused".to_string()));
        }
        self.inner.insert_variation(variation)
    }

    fn get_variation(&self, id: VariationId) -> trueno_ab::Result<Option<Variation>> {
        self.inner.get_variation(id)
    }

    fn list_variations(&self, experiment_id: ExperimentId) -> trueno_ab::Result<Vec<Variation>> {
        self.inner.list_variations(experiment_id)
    }

    fn update_variation(&self, id: VariationId, update: VariationUpdate) -> trueno_ab::Result<()> {
        if self.fail_variation_updates.load(Ordering::SeqCst) {
            return Err(Error::Store("variation update refused".to_string()));
        }
        self.inner.update_variation(id, update)
    }

    fn get_assignment(
        &self,
        experiment_id: ExperimentId,
        user_id: &str,
    ) -> trueno_ab::Result<Option<Assignment>> {
        self.inner.get_assignment(experiment_id, user_id)
    }

    fn get_or_create_assignment<F>(
        &self,
        experiment_id: ExperimentId,
        user_id: &str,
        factory: F,
    ) -> trueno_ab::Result<Upsert<Assignment>>
    where
        F: FnOnce() -> Assignment,
    {
        self.inner.get_or_create_assignment(experiment_id, user_id, factory)
    }

    fn get_conversion(&self, key: &ConversionKey) -> trueno_ab::Result<Option<Conversion>> {
        self.inner.get_conversion(key)
    }

    fn get_or_create_conversion<F>(
        &self,
        key: &ConversionKey,
        factory: F,
    ) -> trueno_ab::Result<Upsert<Conversion>>
    where
        F: FnOnce() -> Conversion,
    {
        self.inner.get_or_create_conversion(key, factory)
    }

    fn increment_stat(&self, variation_id: VariationId, field: StatField) -> trueno_ab::Result<()> {
        self.inner.increment_stat(variation_id, field)
    }

    fn begin(&self) -> trueno_ab::Result<()> {
        self.inner.begin()
    }

    fn commit(&self) -> trueno_ab::Result<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> trueno_ab::Result<()> {
        self.inner.rollback()
    }
}

#[test]
fn test_create_rolls_back_on_store_failure() {
    init_tracing();
    let engine = ExperimentOrchestrator::builder(FaultyStore::failing_variation_insert(2))
        .build()
        .unwrap();

    let err = engine.create_experiment(ab_config("Half written")).unwrap_err();

    assert!(matches!(err, Error::Store(_)));
    assert_eq!(engine.store().inner.experiment_count(), 0);
    assert_eq!(engine.store().inner.variation_count(), 0);
    assert!(engine.store().inner.is_empty());

    let id = engine.create_experiment(ab_config("Second try")).unwrap();
    assert_eq!(engine.store().list_variations(id).unwrap().len(), 2);
}

#[test]
fn test_stop_rolls_back_on_store_failure() {
    init_tracing();
    let applied = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&applied);
    let engine = ExperimentOrchestrator::builder(FaultyStore::default())
        .winner_hook(move |_: &Experiment, _: &Variation| -> anyhow::Result<()> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();
    let id = engine.create_experiment(ab_config("Flaky stop")).unwrap();
    engine.start_experiment(id).unwrap();
    let winner = engine.store().list_variations(id).unwrap()[1].id;
    let context = RequestContext::default();
    assert!(engine.get_user_variation(id, "henry", &context).unwrap().is_some());

    engine.store().fail_variation_updates.store(true, Ordering::SeqCst);
    let err = engine.stop_experiment(id, Some(winner)).unwrap_err();

    assert!(matches!(err, Error::Store(_)));
    assert_eq!(applied.load(Ordering::SeqCst), 0);
    let experiment = engine.store().get_experiment(id).unwrap().unwrap();
    assert_eq!(experiment.status, ExperimentStatus::Running);
    assert!(experiment.ended_at.is_none());
    assert!(engine
        .store()
        .list_variations(id)
        .unwrap()
        .iter()
        .all(|variation| !variation.is_winner));
    assert!(engine.get_user_variation(id, "ivy", &context).unwrap().is_some());

    engine.store().fail_variation_updates.store(false, Ordering::SeqCst);
    engine.stop_experiment(id, Some(winner)).unwrap();
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert!(engine.store().get_variation(winner).unwrap().unwrap().is_winner);
}
