use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::timeout;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use monthly_balance_monitor::chain::{block_source, BlockSourceConfig, ChainClient, RpcClient};
use monthly_balance_monitor::error::ChainError;
use monthly_balance_monitor::models::BlockEvent;
use monthly_balance_monitor::retry::RetryConfig;

fn hash_for(height: u32) -> String {
    format!("{:064x}", height)
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "result": result, "error": null, "id": 1 }))
}

async fn mount_call(server: &MockServer, request: Value, result: Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(request))
        .respond_with(rpc_result(result))
        .mount(server)
        .await;
}

/// Mount a small chain of verbose blocks from `first` to `tip`
async fn mount_chain(server: &MockServer, first: u32, tip: u32) {
    mount_call(server, json!({ "method": "getblockcount" }), json!(tip)).await;

    for height in first..=tip {
        let hash = hash_for(height);
        mount_call(server, json!({ "method": "getblockhash", "params": [height] }), json!(hash)).await;
        mount_call(
            server,
            json!({ "method": "getblockheader", "params": [hash, true] }),
            json!({ "hash": hash, "height": height, "time": 1_706_745_600 + height }),
        )
        .await;
        mount_call(
            server,
            json!({ "method": "getblock", "params": [hash, 2] }),
            json!({
                "hash": hash,
                "height": height,
                "time": 1_706_745_600 + height,
                "tx": [{
                    "txid": format!("tx{}", height),
                    "vin": [{ "coinbase": "00" }],
                    "vout": [{ "value": 0.5, "n": 0, "scriptPubKey": { "address": "bc1qsavings" } }]
                }]
            }),
        )
        .await;
    }
}

#[tokio::test]
async fn test_rpc_client_reads_chain() {
    let server = MockServer::start().await;
    mount_chain(&server, 101, 102).await;

    let client = RpcClient::new(server.uri()).unwrap();

    let tip = client.get_tip().await.unwrap();
    assert_eq!(tip.height, 102);
    assert_eq!(tip.hash_hex(), hash_for(102));

    let entry = client.get_entry(101).await.unwrap();
    assert_eq!(entry.height, 101);
    assert_eq!(entry.time, 1_706_745_701);
    assert_eq!(entry.hash_hex(), hash_for(101));

    let (entry, txs) = client.get_block_at(102).await.unwrap();
    assert_eq!(entry.height, 102);
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].outputs[0].value, 50_000_000);
}

#[tokio::test]
async fn test_rpc_errors_are_mapped() {
    let server = MockServer::start().await;

    // bitcoind answers RPC errors with HTTP 500 and a JSON body
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getblockhash" })))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "result": null,
            "error": { "code": -8, "message": "Block height out of range" },
            "id": 1
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getblockcount" })))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let client = RpcClient::new(server.uri()).unwrap();

    let result = client.get_block_hash(9_999_999).await;
    assert!(matches!(result, Err(ChainError::BlockNotFound { height: 9_999_999 })));

    let result = client.get_block_count().await;
    assert!(matches!(result, Err(ChainError::Connection(_))));
}

#[tokio::test]
async fn test_rpc_retries_recoverable_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_call(&server, json!({ "method": "getblockcount" }), json!(840_000)).await;

    let retry = RetryConfig::for_rpc(3, 0, 0);
    let client = RpcClient::new_with_config(server.uri(), 5, retry).unwrap();

    assert_eq!(client.get_block_count().await.unwrap(), 840_000);
}

#[tokio::test]
async fn test_poll_publishes_connect_events() {
    let server = MockServer::start().await;
    mount_chain(&server, 101, 102).await;

    let rpc = RpcClient::new(server.uri()).unwrap();
    let (source, _client, mut events) = block_source(rpc, BlockSourceConfig::default());
    let mut source = source.resume_after(100);

    assert_eq!(source.poll_new_blocks().await.unwrap(), 2);
    assert_eq!(source.last_delivered(), Some(102));

    for expected in [101, 102] {
        match events.recv().await.unwrap() {
            BlockEvent::Connect { entry, txs } => {
                assert_eq!(entry.height, expected);
                assert_eq!(txs.len(), 1);
            }
            other => panic!("expected connect event, got {:?}", other.entry()),
        }
    }

    assert_eq!(source.poll_new_blocks().await.unwrap(), 0);
}

#[tokio::test]
async fn test_rescan_replays_from_start_hash() {
    let server = MockServer::start().await;
    mount_chain(&server, 100, 102).await;

    let rpc = RpcClient::new(server.uri()).unwrap();
    let config = BlockSourceConfig { poll_interval_seconds: 3600, rescan_timeout_seconds: 10 };
    let (source, client, mut events) = block_source(rpc, config);
    let source = source.resume_after(102);
    let shutdown = source.shutdown_signal.clone();
    let handle = tokio::spawn(source.run());

    client.rescan(&hash_for(101)).await.unwrap();

    let mut replayed = Vec::new();
    for _ in 0..2 {
        match timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap() {
            BlockEvent::Rescan { entry, .. } => replayed.push(entry.height),
            other => panic!("expected rescan event, got {:?}", other.entry()),
        }
    }
    assert_eq!(replayed, vec![101, 102]);

    shutdown.store(true, Ordering::Relaxed);
    handle.abort();
}
