use std::sync::Arc;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use uuid::Uuid;

use autopilot_runtime::db::schema::migrate;
use autopilot_runtime::store::model::{
    GoalSnapshot, MarketSignal, MemoryEntry, MemoryType, RunMode, RunRecord, Strategy,
    StrategyParams, TraceEntry, UpsertAutopilotInput,
};
use autopilot_runtime::store::sqlx_backend::SqlxStore;
use autopilot_runtime::store::Store;
use autopilot_runtime::time::now_ms;

const CHAIN: &str = "bsc";

async fn setup() -> (AnyPool, Store) {
    sqlx::any::install_default_drivers();
    let db_name = Uuid::new_v4().to_string();
    let conn = format!("sqlite:file:{db_name}?mode=memory&cache=shared");

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn)
        .await
        .expect("connect sqlite memory db");
    migrate(&pool).await.expect("run migrations");

    let store = Store::new(Arc::new(SqlxStore::new(pool.clone())));
    (pool, store)
}

fn strategy(token_id: i64) -> Strategy {
    Strategy {
        chain: CHAIN.to_string(),
        token_id,
        strategy_type: "dca".to_string(),
        target: "0xtarget".to_string(),
        data: "0x".to_string(),
        value: "0".to_string(),
        strategy_params: StrategyParams::default(),
        min_interval_ms: Some(15_000),
        require_positive_balance: false,
        max_failures: 3,
        failure_count: 0,
        budget_day: chrono::Utc::now().date_naive(),
        daily_runs_used: 0,
        daily_value_used: "0".to_string(),
        enabled: true,
        last_run_at: None,
        next_check_at: None,
        last_error: None,
    }
}

#[tokio::test]
async fn upsert_enabled_is_idempotent_and_round_trips() {
    let (_pool, store) = setup().await;
    let token_id = 1;

    let input = UpsertAutopilotInput {
        chain: CHAIN.to_string(),
        token_id,
        renter: "0xrenter".to_string(),
        operator: "0xoperator".to_string(),
        permit_expires: now_ms() + 3_600_000,
        permit_deadline: now_ms() + 3_600_000,
        sig: "0xsig".to_string(),
    };
    store.upsert_enabled(&input, now_ms()).await.expect("first upsert");
    store.upsert_enabled(&input, now_ms()).await.expect("second upsert");

    let got = store.get_autopilot(CHAIN, token_id).await.expect("get").expect("row exists");
    assert_eq!(got.renter, "0xrenter");
    assert!(got.enabled);
    assert!(got.locked_until.is_none());
}

#[tokio::test]
async fn disable_clears_lock_and_flips_enabled() {
    let (_pool, store) = setup().await;
    let token_id = 2;

    let input = UpsertAutopilotInput {
        chain: CHAIN.to_string(),
        token_id,
        renter: "0xrenter".to_string(),
        operator: "0xoperator".to_string(),
        permit_expires: now_ms() + 3_600_000,
        permit_deadline: now_ms() + 3_600_000,
        sig: "0xsig".to_string(),
    };
    store.upsert_enabled(&input, now_ms()).await.expect("upsert");
    assert!(store.try_acquire_autopilot_lock(CHAIN, token_id, 30_000, now_ms()).await.expect("acquire"));

    store.disable(CHAIN, token_id, "manual_stop", None, now_ms()).await.expect("disable");

    let got = store.get_autopilot(CHAIN, token_id).await.expect("get").expect("row exists");
    assert!(!got.enabled);
    assert_eq!(got.last_reason, "manual_stop");
    assert!(got.locked_until.is_none());
}

#[tokio::test]
async fn lease_acquire_is_mutually_exclusive_until_released() {
    let (_pool, store) = setup().await;
    let token_id = 3;

    store
        .upsert_enabled(
            &UpsertAutopilotInput {
                chain: CHAIN.to_string(),
                token_id,
                renter: "0xrenter".to_string(),
                operator: "0xoperator".to_string(),
                permit_expires: now_ms() + 3_600_000,
                permit_deadline: now_ms() + 3_600_000,
                sig: "0xsig".to_string(),
            },
            now_ms(),
        )
        .await
        .expect("upsert");

    assert!(store.try_acquire_autopilot_lock(CHAIN, token_id, 30_000, now_ms()).await.expect("first acquire"));
    assert!(!store.try_acquire_autopilot_lock(CHAIN, token_id, 30_000, now_ms()).await.expect("second attempt"));

    store.release_autopilot_lock(CHAIN, token_id).await.expect("release");
    assert!(store.try_acquire_autopilot_lock(CHAIN, token_id, 30_000, now_ms()).await.expect("reacquire after release"));
}

#[tokio::test]
async fn expired_lease_can_be_reacquired() {
    let (_pool, store) = setup().await;
    let token_id = 4;

    store
        .upsert_enabled(
            &UpsertAutopilotInput {
                chain: CHAIN.to_string(),
                token_id,
                renter: "0xrenter".to_string(),
                operator: "0xoperator".to_string(),
                permit_expires: now_ms() + 3_600_000,
                permit_deadline: now_ms() + 3_600_000,
                sig: "0xsig".to_string(),
            },
            now_ms(),
        )
        .await
        .expect("upsert");

    let past = now_ms() - 60_000;
    assert!(store.try_acquire_autopilot_lock(CHAIN, token_id, 1_000, past).await.expect("acquire in the past"));
    assert!(store.try_acquire_autopilot_lock(CHAIN, token_id, 30_000, now_ms()).await.expect("lease already expired"));
}

#[tokio::test]
async fn schedulable_ids_require_both_autopilot_and_strategy_enabled() {
    let (_pool, store) = setup().await;

    store
        .upsert_enabled(
            &UpsertAutopilotInput {
                chain: CHAIN.to_string(),
                token_id: 10,
                renter: "0xrenter".to_string(),
                operator: "0xoperator".to_string(),
                permit_expires: now_ms() + 3_600_000,
                permit_deadline: now_ms() + 3_600_000,
                sig: "0xsig".to_string(),
            },
            now_ms(),
        )
        .await
        .expect("upsert 10");
    store.upsert_strategy(&strategy(10)).await.expect("strategy 10");

    store
        .upsert_enabled(
            &UpsertAutopilotInput {
                chain: CHAIN.to_string(),
                token_id: 11,
                renter: "0xrenter".to_string(),
                operator: "0xoperator".to_string(),
                permit_expires: now_ms() + 3_600_000,
                permit_deadline: now_ms() + 3_600_000,
                sig: "0xsig".to_string(),
            },
            now_ms(),
        )
        .await
        .expect("upsert 11");
    let mut disabled_strategy = strategy(11);
    disabled_strategy.enabled = false;
    store.upsert_strategy(&disabled_strategy).await.expect("strategy 11");

    let ids = store.list_schedulable_token_ids(CHAIN).await.expect("list schedulable");
    assert_eq!(ids, vec![10]);
}

#[tokio::test]
async fn clear_trading_goal_appends_history_and_empties_current_goal() {
    let (_pool, store) = setup().await;
    let token_id = 20;

    let mut s = strategy(token_id);
    s.strategy_type = "llm_trader".to_string();
    s.strategy_params.trading_goal = Some("accumulate BNB".to_string());
    s.strategy_params.goal_set_at = Some(now_ms() - 10_000);
    store.upsert_strategy(&s).await.expect("upsert strategy");

    store.clear_trading_goal(CHAIN, token_id, now_ms()).await.expect("clear goal");

    let reloaded = store.get_strategy(CHAIN, token_id).await.expect("get").expect("strategy exists");
    assert!(reloaded.strategy_params.trading_goal.is_none());
    assert!(!reloaded.has_goal());
    assert_eq!(reloaded.strategy_params.goal_history.len(), 1);
    assert_eq!(reloaded.strategy_params.goal_history[0].goal, "accumulate BNB");

    // Clearing again with no active goal is a no-op, not an extra history entry.
    store.clear_trading_goal(CHAIN, token_id, now_ms()).await.expect("clear goal again");
    let reloaded2 = store.get_strategy(CHAIN, token_id).await.expect("get").expect("strategy exists");
    assert_eq!(reloaded2.strategy_params.goal_history.len(), 1);
}

#[tokio::test]
async fn strategy_params_extra_fields_round_trip() {
    let (_pool, store) = setup().await;
    let token_id = 21;

    let mut s = strategy(token_id);
    s.strategy_params.allowed_targets = vec!["0xRouter".to_string()];
    s.strategy_params.max_value_per_run = Some("500000000000000000".to_string());
    s.strategy_params.extra.insert("dcaIntervalHours".to_string(), serde_json::json!(24));
    store.upsert_strategy(&s).await.expect("upsert strategy");

    let reloaded = store.get_strategy(CHAIN, token_id).await.expect("get").expect("strategy exists");
    assert_eq!(reloaded.strategy_params.allowed_targets, vec!["0xRouter".to_string()]);
    assert_eq!(reloaded.strategy_params.max_value_per_run.as_deref(), Some("500000000000000000"));
    assert_eq!(reloaded.strategy_params.extra.get("dcaIntervalHours"), Some(&serde_json::json!(24)));
}

#[tokio::test]
async fn budget_check_and_consume_track_daily_spend() {
    let (_pool, store) = setup().await;
    let token_id = 22;

    let mut s = strategy(token_id);
    s.strategy_params.max_value_per_run = Some("1000".to_string());
    store.upsert_strategy(&s).await.expect("upsert strategy");

    assert!(store.check_budget(CHAIN, token_id, "600").await.expect("check under cap"));
    store.consume_budget(CHAIN, token_id, "600").await.expect("consume");

    assert!(!store.check_budget(CHAIN, token_id, "600").await.expect("check over cap"));
    assert!(store.check_budget(CHAIN, token_id, "400").await.expect("check at cap"));
}

#[tokio::test]
async fn record_failure_disables_after_max_failures() {
    let (_pool, store) = setup().await;
    let token_id = 23;

    store
        .upsert_enabled(
            &UpsertAutopilotInput {
                chain: CHAIN.to_string(),
                token_id,
                renter: "0xrenter".to_string(),
                operator: "0xoperator".to_string(),
                permit_expires: now_ms() + 3_600_000,
                permit_deadline: now_ms() + 3_600_000,
                sig: "0xsig".to_string(),
            },
            now_ms(),
        )
        .await
        .expect("upsert");

    let mut s = strategy(token_id);
    s.max_failures = 2;
    store.upsert_strategy(&s).await.expect("upsert strategy");

    store.record_failure(CHAIN, token_id, "rpc timeout", now_ms()).await.expect("failure 1");
    let mid = store.get_autopilot(CHAIN, token_id).await.expect("get").expect("exists");
    assert!(mid.enabled, "must stay enabled below the threshold");

    store.record_failure(CHAIN, token_id, "rpc timeout", now_ms()).await.expect("failure 2");
    let after = store.get_autopilot(CHAIN, token_id).await.expect("get").expect("exists");
    assert!(!after.enabled, "must auto-disable once failure_count reaches max_failures");
}

#[tokio::test]
async fn record_success_resets_failure_count() {
    let (_pool, store) = setup().await;
    let token_id = 24;

    let mut s = strategy(token_id);
    s.max_failures = 5;
    store.upsert_strategy(&s).await.expect("upsert strategy");

    store.record_failure(CHAIN, token_id, "oops", now_ms()).await.expect("failure");
    store.record_success(CHAIN, token_id, now_ms()).await.expect("success");

    let reloaded = store.get_strategy(CHAIN, token_id).await.expect("get").expect("exists");
    assert_eq!(reloaded.failure_count, 0);
    assert!(reloaded.last_error.is_none());
}

#[tokio::test]
async fn run_retention_trims_old_rows_per_chain() {
    let (_pool, store) = setup().await;
    let token_id = 30;

    for i in 0..5 {
        let mut run = RunRecord::new(CHAIN, token_id, now_ms() + i);
        run.action_hash = format!("0xhash{i}");
        run.simulate_ok = true;
        store.record_run(&run, 3).await.expect("record run");
    }

    let runs = store.list_runs(CHAIN, token_id, 100).await.expect("list runs");
    assert_eq!(runs.len(), 3, "retention must cap stored runs at the configured count");
    // Most recent first.
    assert_eq!(runs[0].action_hash, "0xhash4");
}

#[tokio::test]
async fn recall_excludes_goal_entries() {
    let (_pool, store) = setup().await;
    let token_id = 31;

    store
        .store_memory(&MemoryEntry {
            action: Some("swap".to_string()),
            ..MemoryEntry::new(CHAIN, token_id, MemoryType::Decision, now_ms())
        })
        .await
        .expect("store decision");

    store.upsert_goal(CHAIN, token_id, "accumulate BNB", now_ms()).await.expect("store goal");

    let recalled = store.recall(CHAIN, token_id, 10).await.expect("recall");
    assert_eq!(recalled.len(), 1);
    assert_eq!(recalled[0].entry_type, MemoryType::Decision);

    let goals = store.list_goals(CHAIN, token_id).await.expect("list goals");
    assert_eq!(goals.len(), 1);
}

#[tokio::test]
async fn market_signal_upsert_overwrites_existing_pair() {
    let (_pool, store) = setup().await;

    store
        .upsert_market_signal(&MarketSignal {
            chain: CHAIN.to_string(),
            pair: "BNB/USDT".to_string(),
            data: serde_json::json!({"price": "300.0"}),
            updated_at: now_ms(),
        })
        .await
        .expect("insert signal");

    store
        .upsert_market_signal(&MarketSignal {
            chain: CHAIN.to_string(),
            pair: "BNB/USDT".to_string(),
            data: serde_json::json!({"price": "310.5"}),
            updated_at: now_ms(),
        })
        .await
        .expect("update signal");

    let signal = store.get_market_signal(CHAIN, "BNB/USDT").await.expect("get").expect("exists");
    assert_eq!(signal.data["price"], "310.5");
}

#[tokio::test]
async fn trace_entries_round_trip_through_run_records() {
    let (_pool, store) = setup().await;
    let token_id = 32;

    let mut run = RunRecord::new(CHAIN, token_id, now_ms());
    run.action_hash = "0xabc".to_string();
    run.execution_trace = vec![
        TraceEntry::new("observe", "ok", now_ms()),
        TraceEntry::new("guard", "blocked", now_ms()).with_note("below min balance"),
    ];
    store.record_run(&run, 100).await.expect("record run");

    let runs = store.list_runs(CHAIN, token_id, 10).await.expect("list runs");
    assert_eq!(runs[0].execution_trace.len(), 2);
    assert_eq!(runs[0].execution_trace[1].note.as_deref(), Some("below min balance"));
}

#[tokio::test]
async fn refresh_daily_budget_resets_counters_on_a_new_day() {
    let (_pool, store) = setup().await;
    let token_id = 33;

    let mut s = strategy(token_id);
    s.daily_runs_used = 4;
    s.daily_value_used = "1000".to_string();
    s.budget_day = chrono::NaiveDate::from_ymd_opt(2026, 7, 25).unwrap();
    store.upsert_strategy(&s).await.expect("upsert strategy");

    let today = chrono::NaiveDate::from_ymd_opt(2026, 7, 26).unwrap();
    store.refresh_daily_budget(CHAIN, token_id, today).await.expect("refresh");

    let reloaded = store.get_strategy(CHAIN, token_id).await.expect("get").expect("exists");
    assert_eq!(reloaded.budget_day, today);
    assert_eq!(reloaded.daily_runs_used, 0);
    assert_eq!(reloaded.daily_value_used, "0");
}

#[test]
fn goal_snapshot_defaults_are_empty() {
    let snap = GoalSnapshot::default();
    assert_eq!(snap.goal, "");
    assert_eq!(snap.set_at, 0);
}
