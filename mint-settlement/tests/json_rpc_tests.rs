//! Solana RPC network client against a mock HTTP node

use base64::Engine;
use mint_ledger::SettlementLedger;
use mint_settlement::transaction::settlement_memo;
use mint_settlement::{
    Complexity, Config, ExecutionId, ExecutionOptions, FreshnessToken, JobDescriptor, Keypair,
    MintProgram, NetworkError, SettlementCoordinator, SettlementNetwork, SettlementOutcome,
    SettlementStatus, SignatureStatus, SignedTransaction, SolanaRpcNetwork, TransactionBuilder,
};
use serde_json::{json, Value};
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BLOCKHASH: &str = "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N";

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": 1
    }))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": 1
    }))
}

async fn mount(server: &MockServer, rpc_method: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Node answers that the client may ask for before the call under test
async fn mount_node_basics(server: &MockServer) {
    mount(
        server,
        "getVersion",
        rpc_result(json!({ "solana-core": "2.2.0", "feature-set": 3294202862u32 })),
    )
    .await;
    mount(
        server,
        "getLatestBlockhash",
        rpc_result(json!({
            "context": { "slot": 2792 },
            "value": { "blockhash": BLOCKHASH, "lastValidBlockHeight": 3090 }
        })),
    )
    .await;
}

/// Decode the base64 wire transaction posted to `sendTransaction`
fn posted_transaction(body: &Value) -> Option<Transaction> {
    let wire = body["params"][0].as_str()?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(wire).ok()?;
    bincode::deserialize(&bytes).ok()
}

async fn mount_echoing_send(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "sendTransaction" })))
        .respond_with(|request: &wiremock::Request| {
            let body: Value = request.body_json().unwrap_or_default();
            match posted_transaction(&body) {
                Some(transaction) => rpc_result(json!(transaction.signatures[0].to_string())),
                None => rpc_error(-32602, "invalid transaction"),
            }
        })
        .mount(server)
        .await;
}

fn network(server: &MockServer) -> SolanaRpcNetwork {
    SolanaRpcNetwork::new(&server.uri(), Duration::from_secs(5)).unwrap()
}

fn signed_transaction() -> SignedTransaction {
    let keypair = Keypair::from_seed(&[3u8; 32]);
    let treasury = Keypair::from_seed(&[4u8; 32]).public_key();
    let job = JobDescriptor {
        job_name: "index".to_string(),
        execution_id: ExecutionId::new("exec-rpc"),
        duration_secs: 30,
        complexity: Complexity::ONE,
    };
    let unsigned = TransactionBuilder::new(keypair.public_key(), MintProgram::default()).build(
        treasury,
        150_000_000,
        settlement_memo(&job.execution_id),
        &job,
        BLOCKHASH.parse::<FreshnessToken>().unwrap(),
    );
    TransactionBuilder::sign(unsigned, &keypair).unwrap()
}

fn status_value(status: Value) -> Value {
    json!({ "context": { "slot": 82 }, "value": [status] })
}

#[tokio::test]
async fn test_latest_freshness() {
    let server = MockServer::start().await;
    mount_node_basics(&server).await;

    let token = network(&server).latest_freshness().await.unwrap();
    assert_eq!(token.to_string(), BLOCKHASH);
}

#[tokio::test]
async fn test_send_transaction_posts_signed_wire() {
    let server = MockServer::start().await;
    mount_node_basics(&server).await;
    mount_echoing_send(&server).await;
    let transaction = signed_transaction();

    let signature = network(&server)
        .send_transaction(&transaction)
        .await
        .unwrap();
    assert_eq!(signature, transaction.signature());

    let requests = server.received_requests().await.unwrap();
    let posted = requests
        .iter()
        .filter_map(|request| request.body_json::<Value>().ok())
        .find(|body| body["method"] == "sendTransaction")
        .unwrap();
    assert_eq!(posted["jsonrpc"], "2.0");

    let decoded = posted_transaction(&posted).unwrap();
    assert_eq!(decoded, transaction.transaction);
    decoded.verify().unwrap();
}

#[tokio::test]
async fn test_signature_status_mapping() {
    let cases = [
        (
            json!({
                "slot": 72, "confirmations": 10, "status": { "Ok": null },
                "err": null, "confirmationStatus": "confirmed"
            }),
            SignatureStatus::Confirmed,
        ),
        (
            json!({
                "slot": 72, "confirmations": null, "status": { "Ok": null },
                "err": null, "confirmationStatus": "finalized"
            }),
            SignatureStatus::Confirmed,
        ),
        (
            json!({
                "slot": 72, "confirmations": 0, "status": { "Ok": null },
                "err": null, "confirmationStatus": "processed"
            }),
            SignatureStatus::Pending,
        ),
        (Value::Null, SignatureStatus::Unknown),
    ];
    let signature = signed_transaction().signature();

    for (status, expected) in cases {
        let server = MockServer::start().await;
        mount(&server, "getSignatureStatuses", rpc_result(status_value(status))).await;

        assert_eq!(
            network(&server).signature_status(&signature).await.unwrap(),
            expected
        );
    }
}

#[tokio::test]
async fn test_signature_status_with_error_is_failed() {
    let server = MockServer::start().await;
    let failure = json!({ "InstructionError": [2, { "Custom": 1 }] });
    mount(
        &server,
        "getSignatureStatuses",
        rpc_result(status_value(json!({
            "slot": 72,
            "confirmations": 1,
            "status": { "Err": failure },
            "err": failure,
            "confirmationStatus": "confirmed"
        }))),
    )
    .await;

    let status = network(&server)
        .signature_status(&signed_transaction().signature())
        .await
        .unwrap();
    assert!(matches!(status, SignatureStatus::Failed(reason) if reason.contains("Instruction 2")));
}

#[tokio::test]
async fn test_malformed_signature_not_sent() {
    let server = MockServer::start().await;

    let err = network(&server).signature_status("sig").await.unwrap_err();
    assert!(matches!(err, NetworkError::Protocol(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_blockhash_retriable() {
    let server = MockServer::start().await;
    mount_node_basics(&server).await;
    mount(
        &server,
        "sendTransaction",
        rpc_error(-32002, "Transaction simulation failed: Blockhash not found"),
    )
    .await;

    let err = network(&server)
        .send_transaction(&signed_transaction())
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::ExpiredFreshness(_)));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_insufficient_funds_not_retriable() {
    let server = MockServer::start().await;
    mount_node_basics(&server).await;
    mount(
        &server,
        "sendTransaction",
        rpc_error(
            -32002,
            "Transaction simulation failed: Attempt to debit an account but found no record of a prior credit; insufficient funds",
        ),
    )
    .await;

    let err = network(&server)
        .send_transaction(&signed_transaction())
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::InsufficientFunds(_)));
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn test_http_status_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let err = network(&server).latest_freshness().await.unwrap_err();
    assert!(matches!(err, NetworkError::NodeUnavailable(_)));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let err = network(&server).latest_freshness().await.unwrap_err();
    assert!(matches!(err, NetworkError::Protocol(_)));
}

#[tokio::test]
async fn test_settlement_over_rpc() {
    let server = MockServer::start().await;
    mount_node_basics(&server).await;
    mount_echoing_send(&server).await;
    mount(
        &server,
        "getSignatureStatuses",
        rpc_result(status_value(json!({
            "slot": 2,
            "confirmations": null,
            "status": { "Ok": null },
            "err": null,
            "confirmationStatus": "finalized"
        }))),
    )
    .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.treasury_address = Keypair::from_seed(&[5u8; 32]).public_key().to_string();
    config.rpc_endpoint = server.uri();
    config.ledger.data_dir = temp_dir.path().to_path_buf();
    config.ledger.rocksdb.sync_writes = false;
    config.confirmation.poll_interval_ms = 10;
    config.earnings.min_duration_secs = 0;

    let ledger = SettlementLedger::open(config.ledger.clone()).await.unwrap();
    let network = SolanaRpcNetwork::new(&config.rpc_endpoint, Duration::from_secs(5)).unwrap();
    let coordinator = Arc::new(
        SettlementCoordinator::new(
            &config,
            Keypair::from_seed(&[6u8; 32]),
            Arc::new(ledger),
            Arc::new(network),
        )
        .unwrap(),
    );

    let execution_id = coordinator
        .start_execution(ExecutionOptions::default().with_job_name("crawl"))
        .unwrap();
    let outcome = coordinator
        .on_execution_end(&execution_id)
        .unwrap()
        .outcome()
        .await
        .unwrap();

    // Sub-second run: zero amount, still settled once
    match outcome {
        SettlementOutcome::Confirmed(record) => {
            assert_eq!(record.status, SettlementStatus::Confirmed);
            assert_eq!(record.duration_secs, 0);
            assert!(record.amount.is_zero());
            assert_eq!(record.attempt_signatures.len(), 1);
        }
        other => panic!("expected confirmed, got {:?}", other),
    }

    // The posted transaction carries the job record for this execution
    let requests = server.received_requests().await.unwrap();
    let posted = requests
        .iter()
        .filter_map(|request| request.body_json::<Value>().ok())
        .find(|body| body["method"] == "sendTransaction")
        .and_then(|body| posted_transaction(&body))
        .unwrap();
    let program = MintProgram::default();
    let record_job = &posted.message.instructions[2];
    assert_eq!(
        posted.message.account_keys[record_job.program_id_index as usize],
        program.program_id
    );
}
