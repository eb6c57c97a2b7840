//! Polkadot-SDK and Cardano adapters through the dispatcher.

mod common;

use common::*;
use dappgate_core::{ChainFamily, ConfirmationKind, ConfirmationPayload, ConfirmationResult, KeyType};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

const DAPP: &str = "https://dapp.example";
const ALICE_SR: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
const ALICE_ETH: &str = "0xa11ce00000000000000000000000000000000001";
const ADA: &str = "addr1qx2fxv2umyhttkxyxp8x0dlpdt3k6cwng5pxj3jhsydzer3jcu5d8ps7zex2k2xt3uqxgjqnnj83ws8lhrn648jjxtwq2ytjqp";
const POLKADOT_GENESIS: &str = "0x91b171bb158e2d3848fa23a9f1c25182fb8e20313b2c1eb49219da7a70ce90c3";

fn approve_with_password(h: &Harness, id: &str) {
    let mut result = ConfirmationResult::<Value>::approved(id);
    result.password = Some(PASSWORD.to_string());
    h.services().queue.resolve(id, result).unwrap();
}

fn reject(h: &Harness, id: &str) {
    h.services()
        .queue
        .resolve(id, ConfirmationResult::rejected(id))
        .unwrap();
}

// ==================== Substrate ====================

fn substrate_harness() -> Harness {
    Harness::new(vec![
        account(ALICE_SR, KeyType::Sr25519, 1),
        account(ALICE_ETH, KeyType::Ethereum, 2),
    ])
}

#[tokio::test(start_paused = true)]
async fn test_ethereum_keys_listed_for_substrate_only_when_bridged() {
    let h = substrate_harness();
    let (bridged, _rx) = h.page(DAPP);
    h.authorize(&bridged, &[ChainFamily::Substrate], &[ALICE_SR, ALICE_ETH]).await;
    let listed = result(h.call(&bridged, "pub(accounts.list)", json!({ "families": ["substrate"] })).await);
    assert_eq!(addresses(&listed), vec![ALICE_SR, ALICE_ETH]);

    let (plain, _rx2) = h.page("https://plain.example");
    h.authorize(&plain, &[ChainFamily::Substrate], &[ALICE_SR]).await;
    let listed = result(h.call(&plain, "pub(accounts.list)", json!({ "families": ["substrate"] })).await);
    assert_eq!(addresses(&listed), vec![ALICE_SR]);
}

#[tokio::test(start_paused = true)]
async fn test_sign_bytes() {
    let h = substrate_harness();
    let (page, _rx) = h.page(DAPP);
    h.authorize(&page, &[ChainFamily::Substrate], &[ALICE_SR]).await;

    let call = h.spawn_call(
        &page,
        "substrate(bytes.sign)",
        json!({ "address": ALICE_SR, "data": "0x3c42797465733e" }),
    );
    let item = h.next_confirmation(ConfirmationKind::SignatureRequest).await;
    assert_eq!(item.chain.as_deref(), Some("polkadot"));
    approve_with_password(&h, &item.id);
    assert_eq!(result(call.await.unwrap()), json!({ "signature": SIGNATURE }));

    let bad = error(
        h.call(&page, "substrate(bytes.sign)", json!({ "address": ALICE_SR, "data": "0xzz" }))
            .await,
    );
    assert!(bad.message.starts_with("Invalid params"));

    let unlisted = error(
        h.call(&page, "substrate(bytes.sign)", json!({ "address": ALICE_ETH, "data": "0x00" }))
            .await,
    );
    assert_eq!(unlisted.message, "Unable to find authorization for this origin");
}

#[tokio::test(start_paused = true)]
async fn test_declined_substrate_signature_reads_cancelled() {
    let h = substrate_harness();
    let (page, _rx) = h.page(DAPP);
    h.authorize(&page, &[ChainFamily::Substrate], &[ALICE_SR]).await;

    let call = h.spawn_call(
        &page,
        "substrate(bytes.sign)",
        json!({ "address": ALICE_SR, "data": "0x00" }),
    );
    let item = h.next_confirmation(ConfirmationKind::SignatureRequest).await;
    reject(&h, &item.id);
    let cancelled = error(call.await.unwrap());
    assert_eq!(cancelled.code, None);
    assert_eq!(cancelled.message, "Cancelled");
}

#[tokio::test(start_paused = true)]
async fn test_sign_extrinsic_resolves_chain_by_genesis_hash() {
    let h = substrate_harness();
    let (page, _rx) = h.page(DAPP);
    h.authorize(&page, &[ChainFamily::Substrate], &[ALICE_SR]).await;

    let call = h.spawn_call(
        &page,
        "substrate(extrinsic.sign)",
        json!({
            "address": ALICE_SR,
            "genesisHash": POLKADOT_GENESIS,
            "method": "0x0503",
            "nonce": "0x00",
        }),
    );
    let item = h.next_confirmation(ConfirmationKind::SignatureRequest).await;
    assert_eq!(item.chain.as_deref(), Some("polkadot"));
    match &item.payload {
        ConfirmationPayload::SignatureRequest(request) => {
            assert_eq!(request.data["method"], json!("0x0503"));
            assert_eq!(request.data["genesisHash"], json!(POLKADOT_GENESIS));
        }
        other => panic!("unexpected payload {:?}", other),
    }
    approve_with_password(&h, &item.id);
    assert_eq!(result(call.await.unwrap()), json!({ "signature": SIGNATURE }));

    let unknown = error(
        h.call(
            &page,
            "substrate(extrinsic.sign)",
            json!({ "address": ALICE_SR, "genesisHash": "0xdead" }),
        )
        .await,
    );
    assert!(unknown.message.contains("0xdead"));
    assert!(h.services().queue.list_pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rpc_send_is_curated() {
    let h = substrate_harness();
    let (page, _rx) = h.page(DAPP);
    h.authorize(&page, &[ChainFamily::Substrate], &[ALICE_SR]).await;

    let ok = h
        .call(&page, "substrate(rpc.send)", json!({ "method": "system_chain", "params": [] }))
        .await;
    assert_eq!(result(ok), Value::Null);

    let denied = error(
        h.call(&page, "substrate(rpc.send)", json!({ "method": "author_rotateKeys" }))
            .await,
    );
    assert!(denied.message.contains("author_rotateKeys"));
}

// ==================== Cardano ====================

fn cardano_harness() -> Harness {
    Harness::with_connector(
        vec![account(ADA, KeyType::Cardano, 1)],
        MockConnector::default().unreachable("cardano"),
    )
}

async fn enable(h: &Harness, page: &dappgate::Channel) {
    let call = h.spawn_call(page, "cardano(request)", json!({ "method": "enable" }));
    let request = h.next_authorize().await;
    assert_eq!(request.families, vec![ChainFamily::Cardano]);
    h.services()
        .queue
        .resolve_authorize(dappgate_core::AuthorizeResult {
            id: request.id,
            is_approved: true,
            accounts: vec![ADA.into()],
        })
        .unwrap();
    assert_eq!(result(call.await.unwrap()), json!(true));
}

async fn cardano(h: &Harness, page: &dappgate::Channel, method: &str, params: Value) -> dappgate::OutboundMessage {
    h.call(page, "cardano(request)", json!({ "method": method, "params": params }))
        .await
}

#[tokio::test(start_paused = true)]
async fn test_cardano_calls_need_enable() {
    let h = cardano_harness();
    let (page, _rx) = h.page(DAPP);
    let refused = error(cardano(&h, &page, "getUsedAddresses", json!([])).await);
    assert_eq!(refused.kind.as_deref(), Some("APIError"));
    assert_eq!(refused.code, Some(-3));
}

#[tokio::test(start_paused = true)]
async fn test_cardano_account_reads() {
    let h = cardano_harness();
    let (page, _rx) = h.page(DAPP);
    enable(&h, &page).await;

    assert_eq!(result(cardano(&h, &page, "getNetworkId", json!([])).await), json!(1));
    assert_eq!(result(cardano(&h, &page, "getUsedAddresses", json!([])).await), json!([ADA]));
    assert_eq!(result(cardano(&h, &page, "getUnusedAddresses", json!([])).await), json!([]));
    assert_eq!(result(cardano(&h, &page, "getChangeAddress", json!([])).await), json!(ADA));
}

#[tokio::test(start_paused = true)]
async fn test_value_reads_fail_fast_while_disconnected() {
    let h = cardano_harness();
    let (page, _rx) = h.page(DAPP);
    enable(&h, &page).await;

    let started = tokio::time::Instant::now();
    let lost = error(cardano(&h, &page, "getUtxos", json!([])).await);
    assert_eq!(lost.kind.as_deref(), Some("APIError"));
    assert_eq!(lost.code, Some(-2));
    assert_eq!(started.elapsed(), std::time::Duration::ZERO);

    let lost = error(cardano(&h, &page, "getBalance", json!([])).await);
    assert_eq!(lost.code, Some(-2));
}

#[tokio::test(start_paused = true)]
async fn test_declined_tx_signature_is_tx_sign_error() {
    let h = cardano_harness();
    let (page, _rx) = h.page(DAPP);
    enable(&h, &page).await;

    let call = h.spawn_call(
        &page,
        "cardano(request)",
        json!({ "method": "signTx", "params": ["84a400", true] }),
    );
    let item = h.next_confirmation(ConfirmationKind::SignatureRequest).await;
    assert_eq!(item.chain.as_deref(), Some("cardano"));
    reject(&h, &item.id);

    let declined = error(call.await.unwrap());
    assert_eq!(declined.kind.as_deref(), Some("TxSignError"));
    assert_eq!(declined.code, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_declined_data_signature_is_data_sign_error() {
    let h = cardano_harness();
    let (page, _rx) = h.page(DAPP);
    enable(&h, &page).await;

    let call = h.spawn_call(
        &page,
        "cardano(request)",
        json!({ "method": "signData", "params": [ADA, "48656c6c6f"] }),
    );
    let item = h.next_confirmation(ConfirmationKind::SignatureRequest).await;
    reject(&h, &item.id);

    let declined = error(call.await.unwrap());
    assert_eq!(declined.kind.as_deref(), Some("DataSignError"));
    assert_eq!(declined.code, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_submit_tx_goes_through_the_transaction_service() {
    let h = cardano_harness();
    let (page, _rx) = h.page(DAPP);
    enable(&h, &page).await;

    let submitted = cardano(&h, &page, "submitTx", json!(["84a400"])).await;
    assert_eq!(result(submitted), json!(TX_HASH));
    assert_eq!(*h.transactions.submitted.lock().unwrap(), vec!["84a400".to_string()]);
}
