use alloy::{
    consensus::{SignableTransaction, TxEip1559, TxLegacy},
    eips::eip2930::AccessList,
    primitives::{Address, B256, Bytes, TxKind, U64, U128, U256},
    signers::{SignerSync, local::PrivateKeySigner},
};
use attest_id_core::{
    Config,
    Environment,
    attestation::{AttestationRecord, RpcTransaction},
    config::COINBASE_ISSUER_CONTRACT,
};
use attest_id_primitives::CircuitKind;
use serde_json::json;

/// Chain id used by every fixture transaction.
pub const CHAIN_ID: u64 = 8453;

/// Birth year carried by every age attestation fixture.
pub const BIRTH_YEAR: u16 = 1990;

/// Calldata of an issuer call attesting `recipient` for `circuit`.
#[must_use]
pub fn attestation_calldata(circuit: CircuitKind, recipient: Address) -> Bytes {
    let mut data = circuit.selector().to_vec();
    data.extend([0u8; 12]);
    data.extend(recipient.as_slice());
    if circuit == CircuitKind::AgeThreshold {
        data.extend(U256::from(BIRTH_YEAR).to_be_bytes::<32>());
    }
    data.into()
}

/// A set of issuer keys, the issuer contract and a holder wallet.
pub struct AttestationFixture {
    pub issuers: Vec<PrivateKeySigner>,
    pub issuer_contract: Address,
    pub holder: PrivateKeySigner,
}

impl Default for AttestationFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl AttestationFixture {
    /// Three random issuer keys and a random holder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuers: (0..3).map(|_| PrivateKeySigner::random()).collect(),
            issuer_contract: COINBASE_ISSUER_CONTRACT,
            holder: PrivateKeySigner::random(),
        }
    }

    #[must_use]
    pub fn wallet(&self) -> Address {
        self.holder.address()
    }

    #[must_use]
    pub fn signer_addresses(&self) -> Vec<Address> {
        self.issuers.iter().map(PrivateKeySigner::address).collect()
    }

    /// A local config trusting the fixture issuers.
    #[must_use]
    pub fn config(&self, index_url: String, rpc_urls: Vec<String>) -> Config {
        Config::for_environment(Environment::Local)
            .with_authorized_signers(self.signer_addresses())
            .with_attestation_index_url(index_url)
            .with_rpc_urls(rpc_urls)
    }

    /// An EIP-155 legacy attestation of `recipient` signed by issuer `issuer`.
    #[must_use]
    pub fn legacy_attestation(
        &self,
        issuer: usize,
        circuit: CircuitKind,
        recipient: Address,
        nonce: u64,
    ) -> RpcTransaction {
        sign_legacy(
            &self.issuers[issuer],
            self.issuer_contract,
            attestation_calldata(circuit, recipient),
            nonce,
        )
    }

    /// An EIP-1559 attestation of `recipient` signed by issuer `issuer`.
    #[must_use]
    pub fn eip1559_attestation(
        &self,
        issuer: usize,
        circuit: CircuitKind,
        recipient: Address,
        nonce: u64,
    ) -> RpcTransaction {
        sign_eip1559(
            &self.issuers[issuer],
            self.issuer_contract,
            attestation_calldata(circuit, recipient),
            nonce,
        )
    }

    /// The index entry of an attestation transaction.
    #[must_use]
    pub fn record(&self, tx: &RpcTransaction, recipient: Address, time: u64) -> AttestationRecord {
        AttestationRecord {
            id: format!("{:#x}", tx.hash),
            tx_hash: tx.hash,
            attester: self.issuer_contract,
            recipient,
            time,
        }
    }
}

/// Signs an EIP-155 legacy transaction.
#[must_use]
pub fn sign_legacy(
    signer: &PrivateKeySigner,
    to: Address,
    input: Bytes,
    nonce: u64,
) -> RpcTransaction {
    let tx = TxLegacy {
        chain_id: Some(CHAIN_ID),
        nonce,
        gas_price: 1_000_000,
        gas_limit: 120_000,
        to: TxKind::Call(to),
        value: U256::ZERO,
        input,
    };
    let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
    let signed = tx.clone().into_signed(signature);

    RpcTransaction {
        hash: *signed.hash(),
        tx_type: Some(U64::ZERO),
        chain_id: Some(U64::from(CHAIN_ID)),
        nonce: U64::from(nonce),
        gas: U64::from(tx.gas_limit),
        gas_price: Some(U128::from(tx.gas_price)),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        to: Some(to),
        value: tx.value,
        input: tx.input,
        access_list: None,
        v: Some(U64::from(35 + CHAIN_ID * 2 + u64::from(signature.v()))),
        r: signature.r(),
        s: signature.s(),
        y_parity: None,
    }
}

/// Signs an EIP-1559 transaction.
#[must_use]
pub fn sign_eip1559(
    signer: &PrivateKeySigner,
    to: Address,
    input: Bytes,
    nonce: u64,
) -> RpcTransaction {
    let tx = TxEip1559 {
        chain_id: CHAIN_ID,
        nonce,
        gas_limit: 120_000,
        max_fee_per_gas: 2_000_000,
        max_priority_fee_per_gas: 1_000,
        to: TxKind::Call(to),
        value: U256::ZERO,
        access_list: AccessList::default(),
        input,
    };
    let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
    let signed = tx.clone().into_signed(signature);

    RpcTransaction {
        hash: *signed.hash(),
        tx_type: Some(U64::from(2)),
        chain_id: Some(U64::from(CHAIN_ID)),
        nonce: U64::from(nonce),
        gas: U64::from(tx.gas_limit),
        gas_price: None,
        max_fee_per_gas: Some(U128::from(tx.max_fee_per_gas)),
        max_priority_fee_per_gas: Some(U128::from(tx.max_priority_fee_per_gas)),
        to: Some(to),
        value: tx.value,
        input: tx.input,
        access_list: Some(AccessList::default()),
        v: None,
        r: signature.r(),
        s: signature.s(),
        y_parity: Some(U64::from(u8::from(signature.v()))),
    }
}

/// GraphQL response body listing `records`.
#[must_use]
pub fn index_response(records: &[AttestationRecord]) -> String {
    json!({ "data": { "attestations": records } }).to_string()
}

/// JSON-RPC response body for `eth_getTransactionByHash`.
#[must_use]
pub fn rpc_response(tx: Option<&RpcTransaction>) -> String {
    json!({ "jsonrpc": "2.0", "id": 1, "result": tx }).to_string()
}

/// Mounts a GraphQL index on `server` at `/graphql` answering with `records`.
pub async fn mount_index(
    server: &mut mockito::ServerGuard,
    records: &[AttestationRecord],
) -> mockito::Mock {
    server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(index_response(records))
        .create_async()
        .await
}

/// Mounts an RPC mirror on `server` at `path` serving `txs` by hash.
pub async fn mount_rpc(
    server: &mut mockito::ServerGuard,
    path: &str,
    txs: &[RpcTransaction],
) -> Vec<mockito::Mock> {
    let mut mocks = Vec::with_capacity(txs.len());
    for tx in txs {
        let mock = server
            .mock("POST", path)
            .match_body(mockito::Matcher::PartialJson(json!({
                "method": "eth_getTransactionByHash",
                "params": [tx.hash],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(rpc_response(Some(tx)))
            .create_async()
            .await;
        mocks.push(mock);
    }
    mocks
}

/// Hash of nothing in particular, for transactions no source knows.
#[must_use]
pub fn unknown_hash(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}
