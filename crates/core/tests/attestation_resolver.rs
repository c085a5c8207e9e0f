use std::sync::Arc;

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use attest_id_core::{
    AttestationResolver,
    Config,
    attestation::{AttestationIndex, MokaTtlCache, ResolverError, TransactionSource},
};
use attest_id_primitives::CircuitKind;
use attest_id_test_utils::{
    AttestationFixture,
    FailingIndex,
    StaticIndex,
    StaticSource,
    fixtures::{attestation_calldata, mount_index, mount_rpc, sign_legacy},
};
use eyre::Result;

fn resolver(
    config: &Config,
    index: Arc<dyn AttestationIndex>,
    sources: Vec<Arc<dyn TransactionSource>>,
) -> AttestationResolver {
    let cache = Arc::new(MokaTtlCache::new(config.attestation_cache_ttl(), 64));
    AttestationResolver::new(config, index, sources, cache).unwrap()
}

#[tokio::test]
async fn resolves_attestation_over_http() -> Result<()> {
    let fixture = AttestationFixture::new();
    let wallet = fixture.wallet();
    let tx = fixture.legacy_attestation(1, CircuitKind::CoinbaseKyc, wallet, 3);

    let mut server = mockito::Server::new_async().await;
    let index = mount_index(&mut server, &[fixture.record(&tx, wallet, 1_700_000_000)]).await;
    let _rpc = mount_rpc(&mut server, "/rpc", std::slice::from_ref(&tx)).await;

    let config = fixture.config(
        format!("{}/graphql", server.url()),
        vec![format!("{}/rpc", server.url())],
    );
    let resolver = AttestationResolver::from_config(&config, &reqwest::Client::new())?;

    let resolved = resolver
        .find(wallet, CircuitKind::CoinbaseKyc)
        .await?
        .expect("attestation should resolve");
    index.assert_async().await;

    assert_eq!(resolved.record.tx_hash, tx.hash);
    assert_eq!(resolved.signer, fixture.issuers[1].address());
    assert_eq!(resolved.signer_index, 1);
    assert_eq!(resolved.transaction.hash, tx.hash);
    assert_eq!(resolved.issuer_public_key[0], 0x04);
    Ok(())
}

#[tokio::test]
async fn skips_invalid_candidates() -> Result<()> {
    let fixture = AttestationFixture::new();
    let wallet = fixture.wallet();
    let config = fixture.config("http://unused.invalid".to_string(), vec![]);

    let outsider = PrivateKeySigner::random();
    let unauthorized = sign_legacy(
        &outsider,
        fixture.issuer_contract,
        attestation_calldata(CircuitKind::CoinbaseKyc, wallet),
        1,
    );
    let wrong_contract = sign_legacy(
        &fixture.issuers[0],
        Address::repeat_byte(0x99),
        attestation_calldata(CircuitKind::CoinbaseKyc, wallet),
        2,
    );
    let other_circuit = fixture.legacy_attestation(0, CircuitKind::CoinbaseCountry, wallet, 3);
    let valid = fixture.eip1559_attestation(2, CircuitKind::CoinbaseKyc, wallet, 4);

    let records = [&unauthorized, &wrong_contract, &other_circuit, &valid]
        .into_iter()
        .map(|tx| fixture.record(tx, wallet, 1))
        .collect();
    let sources: Vec<Arc<dyn TransactionSource>> = vec![Arc::new(StaticSource::new([
        unauthorized,
        wrong_contract,
        other_circuit,
        valid.clone(),
    ]))];
    let resolver = resolver(&config, Arc::new(StaticIndex::new(records)), sources);

    let resolved = resolver.find(wallet, CircuitKind::CoinbaseKyc).await?;
    assert_eq!(resolved.map(|r| r.record.tx_hash), Some(valid.hash));
    Ok(())
}

#[tokio::test]
async fn reports_not_found_separately_from_errors() -> Result<()> {
    let fixture = AttestationFixture::new();
    let wallet = fixture.wallet();
    let config = fixture.config("http://unused.invalid".to_string(), vec![]);

    let stranger =
        fixture.legacy_attestation(0, CircuitKind::CoinbaseKyc, Address::repeat_byte(7), 1);
    let mismatched = fixture.record(&stranger, wallet, 1);
    let resolver_without_match = resolver(
        &config,
        Arc::new(StaticIndex::new(vec![mismatched])),
        vec![Arc::new(StaticSource::new([stranger]))],
    );
    assert!(resolver_without_match
        .find(wallet, CircuitKind::CoinbaseKyc)
        .await?
        .is_none());

    let unreachable = resolver(&config, Arc::new(FailingIndex), vec![]);
    assert!(matches!(
        unreachable.find(wallet, CircuitKind::CoinbaseKyc).await,
        Err(ResolverError::Index(_))
    ));
    Ok(())
}

#[tokio::test]
async fn failing_mirrors_fall_back_to_healthy_ones() -> Result<()> {
    let fixture = AttestationFixture::new();
    let wallet = fixture.wallet();
    let config = fixture.config("http://unused.invalid".to_string(), vec![]);
    let tx = fixture.legacy_attestation(0, CircuitKind::CoinbaseKyc, wallet, 1);

    let resolver = resolver(
        &config,
        Arc::new(StaticIndex::new(vec![fixture.record(&tx, wallet, 1)])),
        vec![
            Arc::new(StaticSource::failing()),
            Arc::new(StaticSource::new([tx.clone()])),
        ],
    );
    let resolved = resolver.find(wallet, CircuitKind::CoinbaseKyc).await?;
    assert_eq!(resolved.map(|r| r.signer), Some(fixture.issuers[0].address()));
    Ok(())
}

#[tokio::test]
async fn tampered_mirror_answers_fall_back_to_healthy_ones() -> Result<()> {
    let fixture = AttestationFixture::new();
    let wallet = fixture.wallet();
    let config = fixture.config("http://unused.invalid".to_string(), vec![]);
    let tx = fixture.legacy_attestation(1, CircuitKind::CoinbaseKyc, wallet, 1);
    let mut tampered = tx.clone();
    tampered.to = Some(Address::repeat_byte(0x66));

    let resolver = resolver(
        &config,
        Arc::new(StaticIndex::new(vec![fixture.record(&tx, wallet, 1)])),
        vec![
            Arc::new(StaticSource::new([tampered.clone()])),
            Arc::new(StaticSource::new([tx])),
        ],
    );
    let resolved = resolver.find(wallet, CircuitKind::CoinbaseKyc).await?;
    assert_eq!(resolved.map(|r| r.signer), Some(fixture.issuers[1].address()));

    let only_tampered = self::resolver(
        &config,
        Arc::new(StaticIndex::new(vec![fixture.record(&tampered, wallet, 1)])),
        vec![Arc::new(StaticSource::new([tampered]))],
    );
    assert!(only_tampered.find(wallet, CircuitKind::CoinbaseKyc).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn lookups_are_cached_per_wallet_and_schema() -> Result<()> {
    let fixture = AttestationFixture::new();
    let wallet = fixture.wallet();
    let config = fixture.config("http://unused.invalid".to_string(), vec![]);
    let tx = fixture.legacy_attestation(0, CircuitKind::CoinbaseKyc, wallet, 1);

    // the same attestation listed twice is checked once
    let record = fixture.record(&tx, wallet, 1);
    let index = Arc::new(StaticIndex::new(vec![record.clone(), record]));
    let resolver = resolver(
        &config,
        index.clone(),
        vec![Arc::new(StaticSource::new([tx]))],
    );

    assert!(resolver.find(wallet, CircuitKind::CoinbaseKyc).await?.is_some());
    assert!(resolver.find(wallet, CircuitKind::CoinbaseKyc).await?.is_some());
    assert_eq!(index.calls(), 1);

    assert!(resolver
        .find(wallet, CircuitKind::CoinbaseCountry)
        .await?
        .is_none());
    assert_eq!(index.calls(), 2);

    resolver.invalidate(wallet, CircuitKind::CoinbaseKyc).await;
    assert!(resolver.find(wallet, CircuitKind::CoinbaseKyc).await?.is_some());
    assert_eq!(index.calls(), 3);
    Ok(())
}
