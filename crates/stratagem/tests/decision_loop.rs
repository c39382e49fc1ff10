//! End-to-end tests of the decide → execute → report → retrain loop.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;

use stratagem::{
    read_log, train_from_log, DecisionEngine, EngineConfig, OutcomeLog, OutcomeMetadata,
    OutcomeRecord, OutcomeReport, ProtectionContext, SelectionMethod, Strategy,
};

// ─────────────────────── helpers ───────────────────────

/// Engine over a temp data dir with a fixed arbitration seed.
fn seeded_engine(dir: &Path, ml_weight: f64, seed: u64) -> DecisionEngine {
    let mut config = EngineConfig::at_dir(dir);
    config.ml_weight = ml_weight;
    DecisionEngine::with_rng(config, StdRng::seed_from_u64(seed)).unwrap()
}

fn metadata(protection_type: &str) -> OutcomeMetadata {
    OutcomeMetadata {
        protection_type: protection_type.to_string(),
        url: format!("https://target.example/{protection_type}/listing"),
        ip_region: "US".to_string(),
        user_agent: "chrome_91".to_string(),
        has_captcha: false,
    }
}

/// Append pre-baked rule-based history straight into the log file.
fn seed_history(log_path: &Path, protection_type: &str, strategy: &str, successes: u64, failures: u64) {
    let log = OutcomeLog::open(log_path).unwrap();
    for i in 0..successes + failures {
        log.append(&OutcomeRecord {
            timestamp: chrono::Utc::now(),
            strategy: Strategy::from(strategy),
            method: SelectionMethod::RuleBased,
            success: i < successes,
            duration_secs: 2.0,
            protection_type: protection_type.to_string(),
            url: format!("https://target.example/{protection_type}/listing"),
            ip_region: "US".to_string(),
            user_agent: "chrome_91".to_string(),
            has_captcha: false,
            token: None,
        })
        .unwrap();
    }
}

/// Drive enough successful outcomes through the engine to train on.
fn record_successes(engine: &DecisionEngine, protection_type: &str, rounds: usize) {
    for _ in 0..rounds {
        let decision = engine
            .select_strategy(protection_type, &ProtectionContext::new(protection_type))
            .unwrap();
        engine
            .log_result(OutcomeReport::for_decision(
                &decision,
                true,
                1.5,
                metadata(protection_type),
            ))
            .unwrap();
    }
}

// ─────────────────────── arbitration ───────────────────────

#[test]
fn test_ab_split_converges_to_weight() {
    let dir = tempfile::tempdir().unwrap();

    // Train a model first so the learned arm can actually fire.
    let bootstrap = seeded_engine(dir.path(), 0.0, 1);
    record_successes(&bootstrap, "cloudflare", 20);
    train_from_log(bootstrap.log_path(), bootstrap.model_path()).unwrap();
    drop(bootstrap);

    let engine = seeded_engine(dir.path(), 0.5, 42);
    assert!(engine.model_available());

    let mut ml = 0u32;
    let context = ProtectionContext::new("cloudflare");
    for _ in 0..1000 {
        let decision = engine.select_strategy("cloudflare", &context).unwrap();
        if decision.method == SelectionMethod::Ml {
            ml += 1;
        }
    }

    // Binomial(1000, 0.5): anything outside this band means the coin is bent.
    assert!(
        (420..=580).contains(&ml),
        "ml arm drew {ml} of 1000 decisions"
    );
}

#[test]
fn test_extreme_weights_pin_the_arm() {
    let dir = tempfile::tempdir().unwrap();
    let bootstrap = seeded_engine(dir.path(), 0.0, 1);
    record_successes(&bootstrap, "cloudflare", 10);
    train_from_log(bootstrap.log_path(), bootstrap.model_path()).unwrap();
    drop(bootstrap);

    let always_ml = seeded_engine(dir.path(), 1.0, 3);
    let never_ml = seeded_engine(dir.path(), 0.0, 3);
    let context = ProtectionContext::new("cloudflare");

    for _ in 0..30 {
        assert_eq!(
            always_ml.select_strategy("cloudflare", &context).unwrap().method,
            SelectionMethod::Ml
        );
        assert_eq!(
            never_ml.select_strategy("cloudflare", &context).unwrap().method,
            SelectionMethod::RuleBased
        );
    }
}

#[test]
fn test_missing_model_never_blocks_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let engine = seeded_engine(dir.path(), 1.0, 9);
    assert!(!engine.model_available());

    // Full ML weight with no model on disk: every call falls back, none fail.
    for _ in 0..40 {
        let decision = engine
            .select_strategy("cloudflare", &ProtectionContext::new("cloudflare"))
            .unwrap();
        assert_eq!(decision.method, SelectionMethod::RuleBased);
    }

    // Unknown protection types resolve through the default set.
    let decision = engine
        .select_strategy("shield_of_mystery", &ProtectionContext::new("shield_of_mystery"))
        .unwrap();
    assert_eq!(decision.strategy.name(), "selenium_stealth");
}

// ─────────────────────── rule-based learning ───────────────────────

#[test]
fn test_stats_shift_reroutes_rule_based_choice() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("outcomes.csv");

    // playwright 7/10, selenium 9/10, proxy 1/10.
    seed_history(&log_path, "cloudflare", "playwright_interactive", 7, 3);
    seed_history(&log_path, "cloudflare", "selenium_stealth", 9, 1);
    seed_history(&log_path, "cloudflare", "requests_rotating_proxy", 1, 9);

    let engine = seeded_engine(dir.path(), 0.0, 5);
    let context = ProtectionContext::new("cloudflare");

    // 0.9 beats 0.7.
    let decision = engine.select_strategy("cloudflare", &context).unwrap();
    assert_eq!(decision.strategy.name(), "selenium_stealth");

    // Three straight selenium failures: 9/13 sinks below playwright's 0.7.
    for _ in 0..3 {
        let decision = engine.select_strategy("cloudflare", &context).unwrap();
        engine
            .log_result(OutcomeReport::for_decision(
                &decision,
                false,
                6.0,
                metadata("cloudflare"),
            ))
            .unwrap();
    }

    let decision = engine.select_strategy("cloudflare", &context).unwrap();
    assert_eq!(decision.strategy.name(), "playwright_interactive");
}

#[test]
fn test_ml_outcomes_log_but_skip_counters() {
    let dir = tempfile::tempdir().unwrap();
    let bootstrap = seeded_engine(dir.path(), 0.0, 1);
    record_successes(&bootstrap, "cloudflare", 10);
    train_from_log(bootstrap.log_path(), bootstrap.model_path()).unwrap();
    drop(bootstrap);

    // Fresh dir for the actual assertion so prior history has no counters.
    let dir2 = tempfile::tempdir().unwrap();
    std::fs::copy(
        dir.path().join("strategy_model.sgem"),
        dir2.path().join("strategy_model.sgem"),
    )
    .unwrap();

    let engine = seeded_engine(dir2.path(), 1.0, 11);
    assert!(engine.model_available());

    for _ in 0..5 {
        let decision = engine
            .select_strategy("cloudflare", &ProtectionContext::new("cloudflare"))
            .unwrap();
        assert_eq!(decision.method, SelectionMethod::Ml);
        engine
            .log_result(OutcomeReport::for_decision(
                &decision,
                true,
                1.0,
                metadata("cloudflare"),
            ))
            .unwrap();
    }

    // Five ML rows in the log, zero movement in the live counters.
    assert!(engine.stats_snapshot().is_empty());
    let summary = engine.method_summary().unwrap();
    assert_eq!(summary[&SelectionMethod::Ml].total, 5);
    assert!(!summary.contains_key(&SelectionMethod::RuleBased));
}

#[test]
fn test_ml_report_lands_verbatim_without_counter_movement() {
    let dir = tempfile::tempdir().unwrap();
    let engine = seeded_engine(dir.path(), 0.0, 23);

    engine
        .log_result(OutcomeReport {
            strategy: Strategy::from("s1"),
            method: SelectionMethod::Ml,
            success: true,
            duration_secs: 3.21,
            metadata: OutcomeMetadata {
                protection_type: "cloudflare".to_string(),
                url: "https://example.com".to_string(),
                ip_region: "RU".to_string(),
                user_agent: "chrome_91".to_string(),
                has_captcha: false,
            },
            token: None,
        })
        .unwrap();

    let (rows, skipped) = read_log(engine.log_path()).unwrap();
    assert_eq!(skipped, 0);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.strategy.name(), "s1");
    assert_eq!(row.method, SelectionMethod::Ml);
    assert!(row.success);
    assert_eq!(row.duration_secs, 3.21);
    assert_eq!(row.protection_type, "cloudflare");
    assert_eq!(row.url, "https://example.com");
    assert_eq!(row.ip_region, "RU");
    assert_eq!(row.user_agent, "chrome_91");
    assert!(!row.has_captcha);

    assert!(engine.stats_snapshot().is_empty());
}

// ─────────────────────── retraining ───────────────────────

#[test]
fn test_train_reload_activates_learned_arm() {
    let dir = tempfile::tempdir().unwrap();
    let engine = seeded_engine(dir.path(), 1.0, 13);

    // No model yet: the learned arm cannot fire.
    let decision = engine
        .select_strategy("cloudflare", &ProtectionContext::new("cloudflare"))
        .unwrap();
    assert_eq!(decision.method, SelectionMethod::RuleBased);
    engine
        .log_result(OutcomeReport::for_decision(&decision, true, 1.2, metadata("cloudflare")))
        .unwrap();
    record_successes(&engine, "cloudflare", 9);

    // Offline pass over the log the engine has been writing.
    let report = train_from_log(engine.log_path(), engine.model_path()).unwrap();
    assert_eq!(report.model_version, 1);
    assert!(!engine.model_available());

    let meta = engine.reload_model().unwrap();
    assert_eq!(meta.model_version, 1);
    assert!(engine.model_available());

    let decision = engine
        .select_strategy("cloudflare", &ProtectionContext::new("cloudflare"))
        .unwrap();
    assert_eq!(decision.method, SelectionMethod::Ml);

    // Second generation: more data, bumped version, hot-swapped in place.
    record_successes(&engine, "cloudflare", 5);
    let report = train_from_log(engine.log_path(), engine.model_path()).unwrap();
    assert_eq!(report.model_version, 2);
    assert_eq!(engine.reload_model().unwrap().model_version, 2);
}

// ─────────────────────── reporting ───────────────────────

#[test]
fn test_method_summary_reflects_the_whole_log() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("outcomes.csv");
    seed_history(&log_path, "cloudflare", "playwright_interactive", 6, 2);

    let engine = seeded_engine(dir.path(), 0.0, 17);
    record_successes(&engine, "ip_block", 4);

    let summary = engine.method_summary().unwrap();
    let rule = summary[&SelectionMethod::RuleBased];
    assert_eq!(rule.total, 12);
    assert_eq!(rule.successes, 10);
    assert!(rule.mean_duration_secs > 0.0);
}

#[test]
fn test_token_closes_the_loop_with_honest_method() {
    let dir = tempfile::tempdir().unwrap();
    let engine = seeded_engine(dir.path(), 0.0, 19);

    let decision = engine
        .select_strategy("cloudflare", &ProtectionContext::new("cloudflare"))
        .unwrap();

    // Caller misremembers the method; the tracked decision corrects it.
    let mut report =
        OutcomeReport::for_decision(&decision, true, 2.0, metadata("cloudflare"));
    report.method = SelectionMethod::Ml;
    engine.log_result(report).unwrap();

    let summary = engine.method_summary().unwrap();
    assert_eq!(summary[&SelectionMethod::RuleBased].total, 1);
    assert!(!summary.contains_key(&SelectionMethod::Ml));

    // The counters moved because the decision really was rule-based.
    let snapshot = engine.stats_snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].1.attempts, 1);
}
