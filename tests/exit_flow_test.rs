use exitflow::broker::{BrokerAdapter, MockBroker};
use exitflow::config::Config;
use exitflow::db::init_db;
use exitflow::domain::{
    ExitPhase, ExitSource, IntentStatus, IntentType, OrderStatus, PositionStatus, ReasonCode,
    Side, Symbol,
};
use exitflow::pricefeed::{MockPriceFeed, PriceFeed};
use exitflow::{Decimal, ExitRuntime, Repository, TimeMs};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    repo: Arc<Repository>,
    broker: Arc<MockBroker>,
    prices: Arc<MockPriceFeed>,
    runtime: ExitRuntime,
    _temp: TempDir,
}

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

async fn setup() -> Harness {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("test.db").to_string_lossy().to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let mut env = HashMap::new();
    env.insert("DATABASE_PATH".to_string(), db_path);
    env.insert("ACCOUNT_ID".to_string(), "acct-1".to_string());
    env.insert("BROKER_API_URL".to_string(), "http://example.invalid".to_string());
    env.insert("MARKET_HOURS_ENFORCED".to_string(), "false".to_string());
    let config = Config::from_env_map(env).unwrap();

    let broker = Arc::new(MockBroker::new());
    let prices = Arc::new(MockPriceFeed::new());
    let broker_dyn: Arc<dyn BrokerAdapter> = broker.clone();
    let prices_dyn: Arc<dyn PriceFeed> = prices.clone();
    let runtime = ExitRuntime::new(&config, repo.clone(), broker_dyn, prices_dyn);

    Harness {
        repo,
        broker,
        prices,
        runtime,
        _temp: temp,
    }
}

#[tokio::test]
async fn test_stop_loss_exit_end_to_end() {
    let h = setup().await;
    h.broker
        .set_holding("005930", 100, d("70000"), d("70000"));

    // holdings sync discovers the position
    let now = TimeMs::now();
    let report = h.runtime.bootstrap(now).await.unwrap();
    assert_eq!(report.positions_created, 1);
    let position = h
        .repo
        .find_active_position_by_symbol("acct-1", &Symbol::new("005930"))
        .await
        .unwrap()
        .unwrap();

    // price falls through SL2
    h.prices.set_price("005930", d("66150"));
    let cycle = h.runtime.exit.run_cycle(TimeMs::now()).await.unwrap();
    assert_eq!(cycle.intents_created, 1);

    let intents = h.repo.list_intents_for_position(&position.position_id).await.unwrap();
    assert_eq!(intents.len(), 1);
    let intent = &intents[0];
    assert_eq!(intent.reason_code, ReasonCode::Sl2);
    assert_eq!(intent.intent_type, IntentType::ExitFull);

    // intent poller submits it
    let exec = h
        .runtime
        .execution
        .process_new_intents(TimeMs::now())
        .await
        .unwrap();
    assert_eq!(exec.submitted, 1);
    let submitted = h.broker.submitted();
    assert_eq!(submitted.len(), 1);
    let (order_id, request) = &submitted[0];
    assert_eq!(request.qty, 100);
    assert_eq!(request.side, Side::Sell);

    // another cycle at the same price does not add a second exit
    let cycle = h.runtime.exit.run_cycle(TimeMs::now()).await.unwrap();
    assert_eq!(cycle.intents_created, 0);

    // broker executes, fill poller picks it up
    h.broker.fill_order(order_id, 100, d("66100"), TimeMs::now());
    let fills = h
        .runtime
        .fills
        .sync(TimeMs::new(0), TimeMs::now())
        .await
        .unwrap();
    assert_eq!(fills.inserted, 1);

    let order = h.repo.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    let intent = h.repo.get_intent(&intent.intent_id).await.unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Filled);
    let state = h.repo.get_exit_state(&position.position_id).await.unwrap().unwrap();
    assert_eq!(state.phase, ExitPhase::Exited);

    // holding disappears, closure is recorded against the SL2 intent
    h.broker.remove_holding("005930");
    let holdings = h.runtime.holdings.sync(TimeMs::now()).await.unwrap();
    assert_eq!(holdings.closures, 1);

    let event = h
        .repo
        .get_exit_event_for_position(&position.position_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.reason_code, "SL2");
    assert_eq!(event.source, ExitSource::AutoExit);
    assert_eq!(event.exit_qty, 100);
    assert_eq!(event.exit_avg_price, d("66100"));
    assert_eq!(event.realized_pnl, d("-390000"));

    let closed = h.repo.get_position(&position.position_id).await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
}

#[tokio::test]
async fn test_take_profit_partial_then_position_shrinks() {
    let h = setup().await;
    h.broker
        .set_holding("000660", 100, d("100000"), d("100000"));
    h.runtime.bootstrap(TimeMs::now()).await.unwrap();
    let position = h
        .repo
        .find_active_position_by_symbol("acct-1", &Symbol::new("000660"))
        .await
        .unwrap()
        .unwrap();

    h.prices.set_price("000660", d("105500"));
    h.runtime.exit.run_cycle(TimeMs::now()).await.unwrap();
    let intents = h.repo.list_intents_for_position(&position.position_id).await.unwrap();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].reason_code, ReasonCode::Tp1);
    assert_eq!(intents[0].intent_type, IntentType::ExitPartial);
    assert_eq!(intents[0].qty, 30);

    h.runtime
        .execution
        .process_new_intents(TimeMs::now())
        .await
        .unwrap();
    let (order_id, _) = h.broker.submitted().remove(0);
    h.broker.fill_order(&order_id, 30, d("105500"), TimeMs::now());
    h.runtime
        .fills
        .sync(TimeMs::new(0), TimeMs::now())
        .await
        .unwrap();

    let state = h.repo.get_exit_state(&position.position_id).await.unwrap().unwrap();
    assert_eq!(state.phase, ExitPhase::Tp1Done);
    assert!(state.stop_floor_price.is_some());

    // broker now reports the reduced holding
    h.broker
        .set_holding("000660", 70, d("100000"), d("105500"));
    let summary = h.runtime.holdings.sync(TimeMs::now()).await.unwrap();
    assert_eq!(summary.closures, 0);
    let synced = h.repo.get_position(&position.position_id).await.unwrap().unwrap();
    assert_eq!(synced.qty, 70);
    assert_eq!(synced.original_qty, 100);
    assert_ne!(synced.status, PositionStatus::Closed);
}

#[tokio::test]
async fn test_manual_sale_without_intent_is_attributed_manual() {
    let h = setup().await;
    h.broker
        .set_holding("035720", 10, d("50000"), d("51000"));
    h.runtime.bootstrap(TimeMs::now()).await.unwrap();
    let position = h
        .repo
        .find_active_position_by_symbol("acct-1", &Symbol::new("035720"))
        .await
        .unwrap()
        .unwrap();

    h.broker
        .set_holding("035720", 0, d("50000"), d("52000"));
    let summary = h.runtime.holdings.sync(TimeMs::now()).await.unwrap();
    assert_eq!(summary.closures, 1);

    let event = h
        .repo
        .get_exit_event_for_position(&position.position_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.reason_code, "MANUAL");
    assert_eq!(event.source, ExitSource::Manual);
    assert_eq!(event.exit_avg_price, d("52000"));
    assert_eq!(event.exit_qty, 10);
    assert!(event.intent_id.is_none());
}
