use alloy_primitives::{Address, B256, U256};
use serde_json::json;
use txlens::calltrace::{flatten, CallKind};
use txlens::sources::{ExplorerService, LedgerQuery, SourceError, TraceService};
use txlens::{EtherscanExplorer, JsonRpcLedger, RpcTraceService};
use wiremock::matchers::{body_partial_json, method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SENDER: &str = "0x00000000000000000000000000000000000000a1";
const ROUTER: &str = "0x00000000000000000000000000000000000000b2";

fn hash() -> B256 {
    B256::repeat_byte(0x11)
}

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

#[tokio::test]
async fn ledger_decodes_transaction_and_receipt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getTransactionByHash" })))
        .respond_with(rpc_result(json!({
            "hash": hash(),
            "from": SENDER,
            "to": ROUTER,
            "value": "0xde0b6b3a7640000",
            "input": "0x38ed1739",
            "nonce": "0x7",
            "blockNumber": "0x121eac0",
            "gas": "0x3d090",
            "gasPrice": "0x6fc23ac00"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
        .respond_with(rpc_result(json!({
            "status": "0x1",
            "blockNumber": "0x121eac0",
            "gasUsed": "0x22ab0",
            "effectiveGasPrice": "0x5d21dba00",
            "contractAddress": null,
            "logs": [{
                "address": ROUTER,
                "topics": [],
                "data": "0x",
                "logIndex": "0x4"
            }]
        })))
        .mount(&server)
        .await;

    let ledger = JsonRpcLedger::new(server.uri()).unwrap();
    let tx = ledger.get_transaction(hash()).await.unwrap().unwrap();
    assert_eq!(tx.from, SENDER.parse::<Address>().unwrap());
    assert_eq!(tx.value, U256::from(1_000_000_000_000_000_000u64));
    assert_eq!(tx.nonce, 7);
    assert_eq!(tx.block_number, Some(19_000_000));
    assert_eq!(tx.gas_limit, 250_000);
    assert_eq!(tx.gas_price, Some(U256::from(30_000_000_000u64)));

    let receipt = ledger.get_receipt(hash()).await.unwrap().unwrap();
    assert!(receipt.status);
    assert_eq!(receipt.gas_used, 142_000);
    assert_eq!(receipt.effective_gas_price, Some(U256::from(25_000_000_000u64)));
    assert_eq!(receipt.logs[0].log_index, 4);
}

#[tokio::test]
async fn ledger_maps_null_and_rpc_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getTransactionByHash" })))
        .respond_with(rpc_result(serde_json::Value::Null))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_call" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": 3, "message": "execution reverted" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "eth_getCode" })))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let ledger = JsonRpcLedger::new(server.uri()).unwrap();
    assert!(ledger.get_transaction(hash()).await.unwrap().is_none());

    let router: Address = ROUTER.parse().unwrap();
    let err = ledger
        .call(router, txlens::sources::selectors::selector_for("symbol()"))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Rpc { code: 3, .. }));

    let err = ledger.get_bytecode(router).await.unwrap_err();
    assert!(matches!(err, SourceError::RateLimited(_)));
}

#[tokio::test]
async fn explorer_parses_internal_transactions() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("action", "txlistinternal"))
        .and(query_param("chainid", "1"))
        .and(query_param("apikey", "key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "message": "OK",
            "result": [
                {
                    "from": ROUTER,
                    "to": SENDER,
                    "value": "5000",
                    "input": "",
                    "type": "call",
                    "isError": "0"
                },
                {
                    "from": ROUTER,
                    "to": "",
                    "contractAddress": "0x00000000000000000000000000000000000000c3",
                    "value": "0",
                    "type": "create",
                    "isError": "1"
                }
            ]
        })))
        .mount(&server)
        .await;

    let explorer = EtherscanExplorer::new(server.uri(), Some("key".into()), 1).unwrap();
    let rows = explorer.internal_transactions(hash()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value, U256::from(5000u64));
    assert_eq!(rows[0].to, Some(SENDER.parse().unwrap()));
    assert!(!rows[0].is_error);
    assert_eq!(rows[1].kind, "create");
    assert_eq!(rows[1].to, Some(Address::with_last_byte(0xc3)));
    assert!(rows[1].is_error);
}

#[tokio::test]
async fn explorer_treats_empty_answers_as_absent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("action", "txlistinternal"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "0", "message": "No transactions found", "result": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("action", "getabi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "0", "message": "NOTOK", "result": "Contract source code not verified"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("action", "getsourcecode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "message": "OK",
            "result": [{ "SourceCode": "", "ContractName": "", "CompilerVersion": "" }]
        })))
        .mount(&server)
        .await;

    let explorer = EtherscanExplorer::new(server.uri(), None, 1).unwrap();
    let router: Address = ROUTER.parse().unwrap();
    assert!(explorer.internal_transactions(hash()).await.unwrap().is_empty());
    assert!(explorer.contract_abi(router).await.unwrap().is_none());
    assert!(explorer.contract_source(router).await.unwrap().is_none());
}

#[tokio::test]
async fn explorer_reads_source_tokens_and_gas() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("action", "getsourcecode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "message": "OK",
            "result": [{
                "SourceCode": "contract Router {}",
                "ContractName": "Router",
                "CompilerVersion": "v0.8.24+commit.e11b9ed9"
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("action", "tokeninfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "message": "OK",
            "result": [{ "tokenName": "Tether USD", "symbol": "USDT", "divisor": "6" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("action", "gasoracle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "message": "OK",
            "result": { "SafeGasPrice": "11", "ProposeGasPrice": "12.5", "FastGasPrice": "14" }
        })))
        .mount(&server)
        .await;

    let explorer = EtherscanExplorer::new(server.uri(), None, 1).unwrap();
    let router: Address = ROUTER.parse().unwrap();

    let source = explorer.contract_source(router).await.unwrap().unwrap();
    assert_eq!(source.contract_name, "Router");
    assert_eq!(source.compiler_version.as_deref(), Some("v0.8.24+commit.e11b9ed9"));

    let token = explorer.token_info(router).await.unwrap().unwrap();
    assert_eq!(token.symbol.as_deref(), Some("USDT"));
    assert_eq!(token.decimals, Some(6));

    let gas = explorer.gas_price_reference(19_000_000).await.unwrap();
    assert_eq!(gas, Some(U256::from(12_500_000_000u64)));
}

#[tokio::test]
async fn explorer_rate_limit_message_is_classified() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached"
        })))
        .mount(&server)
        .await;

    let explorer = EtherscanExplorer::new(server.uri(), None, 1).unwrap();
    let err = explorer.gas_price_reference(1).await.unwrap_err();
    assert!(matches!(err, SourceError::RateLimited(_)));
}

#[tokio::test]
async fn trace_service_builds_the_call_tree() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "debug_traceTransaction",
            "params": [hash(), { "tracer": "callTracer" }]
        })))
        .respond_with(rpc_result(json!({
            "type": "CALL",
            "from": SENDER,
            "to": ROUTER,
            "value": "0x0",
            "gas": "0x3d090",
            "gasUsed": "0x22ab0",
            "input": "0x38ed1739",
            "calls": [
                {
                    "type": "STATICCALL",
                    "from": ROUTER,
                    "to": "0x00000000000000000000000000000000000000c3",
                    "input": "0x0902f1ac"
                },
                {
                    "type": "CALL",
                    "from": ROUTER,
                    "to": SENDER,
                    "value": "0x10",
                    "input": "0x",
                    "error": "execution reverted"
                }
            ]
        })))
        .mount(&server)
        .await;

    let service = RpcTraceService::new(server.uri()).unwrap();
    let root = service.trace_transaction(hash()).await.unwrap();
    assert_eq!(root.node_count(), 3);
    assert_eq!(root.gas_used, 142_000);

    let calls = flatten(&root);
    assert_eq!(calls[1].kind, CallKind::StaticCall);
    assert_eq!(calls[1].depth, 1);
    assert!(calls[2].failed);
    assert_eq!(calls[2].value, U256::from(16u8));
}

#[tokio::test]
async fn trace_service_surfaces_unsupported_method() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32601, "message": "the method debug_traceTransaction does not exist" }
        })))
        .mount(&server)
        .await;

    let service = RpcTraceService::new(server.uri()).unwrap();
    let err = service.trace_transaction(hash()).await.unwrap_err();
    assert!(matches!(err, SourceError::Rpc { code: -32601, .. }));
}
