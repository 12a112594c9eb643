mod common;

use std::sync::Arc;
use tokio::sync::mpsc;

use common::{block, unix, MockChain};
use monthly_balance_monitor::models::{BlockEvent, CellValue, Tx, TxOutput};
use monthly_balance_monitor::monitor::{BlockEventRouter, MonitorService, RouterConfig};
use monthly_balance_monitor::sink::SqliteSink;
use monthly_balance_monitor::wallet::{SqliteWalletDb, WalletDatabase};

fn payment(txid: &str, address: &str, value: u64) -> Tx {
    Tx {
        txid: txid.to_string(),
        inputs: Vec::new(),
        outputs: vec![TxOutput { address: Some(address.to_string()), value }],
    }
}

fn connect(height: u32, time: u32, txs: Vec<Tx>) -> BlockEvent {
    BlockEvent::Connect { entry: block(height, time), txs }
}

fn rescan(height: u32, time: u32, txs: Vec<Tx>) -> BlockEvent {
    BlockEvent::Rescan { entry: block(height, time), txs }
}

struct Setup {
    service: MonitorService,
    wallet_db: Arc<SqliteWalletDb>,
    sink: Arc<SqliteSink>,
    events: mpsc::Sender<BlockEvent>,
}

fn setup(tip: u32, rescan_height: Option<&str>) -> Setup {
    let chain = MockChain::new(tip);
    let wallet_db = Arc::new(SqliteWalletDb::new_in_memory(chain.clone()).unwrap());
    wallet_db.register_wallet("savings", &["bc1qsavings".to_string()]).unwrap();
    let sink = Arc::new(SqliteSink::new_in_memory().unwrap());

    let router = BlockEventRouter::new(
        chain,
        wallet_db.clone(),
        sink.clone(),
        RouterConfig {
            wallet_ids: vec!["savings".to_string()],
            log_destination: "log".to_string(),
            timezone_offset_hours: 0,
            rescan_height: rescan_height.map(str::to_string),
        },
    );

    let (tx, rx) = mpsc::channel(16);
    let service = MonitorService::new(router, wallet_db.clone(), rx);
    Setup { service, wallet_db, sink, events: tx }
}

#[tokio::test]
async fn test_live_stream_reports_balances_at_month_end() {
    let Setup { service, wallet_db, sink, events } = setup(100, None);

    events.send(connect(100, unix(2024, 1, 30, 0), vec![payment("t1", "bc1qsavings", 150_000_000)])).await.unwrap();
    events.send(connect(101, unix(2024, 1, 31, 0), vec![payment("t2", "bc1qsavings", 50_000_000)])).await.unwrap();
    events.send(connect(102, unix(2024, 2, 1, 0), vec![payment("t3", "bc1qsavings", 1)])).await.unwrap();
    drop(events);

    let stats = service.run().await.unwrap();
    assert_eq!(stats.live_blocks, 3);
    assert_eq!(stats.reports_sent, 1);

    assert_eq!(sink.row_count("log").unwrap(), 1);
    let rows = sink.list_rows(Some("savings"), 10).unwrap();
    assert_eq!(rows.len(), 1);
    // The boundary block is applied by the wallet store before the report is built
    assert_eq!(rows[0].cells[0], CellValue::Integer(102));
    assert_eq!(rows[0].cells[2], CellValue::Integer(3));
    assert_eq!(rows[0].cells[4], CellValue::Number(2.00000001));

    assert_eq!(wallet_db.tip_height().unwrap(), Some(102));
}

#[tokio::test]
async fn test_rescan_replays_history_and_ignores_live_blocks() {
    let Setup { mut service, wallet_db, sink, .. } = setup(12, Some("10"));

    let replay = service.open().await.unwrap();
    assert!(replay.is_some());
    assert!(service.router().is_rescanning());
    assert!(wallet_db.is_rescanning());

    service.handle_event(rescan(10, unix(2024, 3, 31, 0), vec![])).await;
    // A live block racing the replay is left to the replay path
    service.handle_event(connect(11, unix(2024, 3, 31, 12), vec![payment("live", "bc1qsavings", 7)])).await;
    service.handle_event(rescan(11, unix(2024, 3, 31, 12), vec![payment("t1", "bc1qsavings", 100_000_000)])).await;
    service.handle_event(rescan(12, unix(2024, 4, 1, 0), vec![])).await;

    assert!(!service.router().is_rescanning());
    assert!(!wallet_db.is_rescanning());
    assert!(!wallet_db.tx_lock().is_locked());

    let balance = wallet_db.balance("savings").unwrap();
    assert_eq!(balance.confirmed, 100_000_000);
    assert_eq!(balance.tx_count, 1);

    let rows = sink.list_rows(Some("savings"), 10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].cells[0], CellValue::Integer(12));
    assert_eq!(rows[0].cells[4], CellValue::Number(1.0));

    let stats = service.stats();
    assert_eq!(stats.replay_blocks, 3);
    assert_eq!(stats.live_blocks, 1);
}
