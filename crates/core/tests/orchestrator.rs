use std::{sync::Arc, time::Duration};

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use attest_id_core::{
    AttestationResolver,
    Config,
    GenerationRequest,
    OrchestratorError,
    ProofOrchestrator,
    attestation::{MokaTtlCache, ResolverError},
    orchestrator::{ExclusiveGuard, SignerError, Step, StepState},
};
use attest_id_primitives::{
    CircuitExtras, CircuitKind, IdentityBinding, InputField, VerificationType,
};
use attest_id_test_utils::{
    AttestationFixture, FailingIndex, MockEngine, MockOnchainVerifier, MockStorage,
    ScriptedSigner, StaticIndex, StaticSource,
};

const MIN_FREE: u64 = 200 * 1024 * 1024;

struct Harness {
    fixture: AttestationFixture,
    config: Config,
    engine: Arc<MockEngine>,
    storage: Arc<MockStorage>,
}

impl Harness {
    fn new(engine: MockEngine, storage: MockStorage) -> Self {
        let fixture = AttestationFixture::new();
        let config = fixture
            .config("http://unused.invalid".to_string(), vec![])
            .with_min_free_storage_bytes(MIN_FREE);
        Self {
            fixture,
            config,
            engine: Arc::new(engine),
            storage: Arc::new(storage),
        }
    }

    fn resolver(&self) -> AttestationResolver {
        let wallet = self.fixture.wallet();
        let kyc = self
            .fixture
            .legacy_attestation(0, CircuitKind::CoinbaseKyc, wallet, 1);
        let country = self
            .fixture
            .eip1559_attestation(2, CircuitKind::CoinbaseCountry, wallet, 2);
        let records = vec![
            self.fixture.record(&kyc, wallet, 2),
            self.fixture.record(&country, wallet, 1),
        ];
        AttestationResolver::new(
            &self.config,
            Arc::new(StaticIndex::new(records)),
            vec![Arc::new(StaticSource::new([kyc, country]))],
            Arc::new(MokaTtlCache::new(self.config.attestation_cache_ttl(), 16)),
        )
        .unwrap()
    }

    fn orchestrator_with(
        &self,
        resolver: AttestationResolver,
        signer: ScriptedSigner,
    ) -> ProofOrchestrator {
        ProofOrchestrator::new(
            &self.config,
            resolver,
            self.engine.clone(),
            Arc::new(signer),
            self.storage.clone(),
        )
    }

    fn orchestrator(&self) -> ProofOrchestrator {
        self.orchestrator_with(
            self.resolver(),
            ScriptedSigner::new(self.fixture.holder.clone()),
        )
    }
}

fn kyc_request(verification_type: VerificationType) -> GenerationRequest {
    GenerationRequest {
        circuit: CircuitKind::CoinbaseKyc,
        scope: "app:default".to_string(),
        signal_hash: None,
        extras: CircuitExtras::None,
        verification_type,
    }
}

#[tokio::test]
async fn generates_kyc_proof() {
    let harness = Harness::new(MockEngine::default(), MockStorage::roomy());
    let orchestrator = harness.orchestrator();

    let generated = orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap();

    let expected = IdentityBinding::derive(
        harness.fixture.wallet(),
        "app:default",
        CircuitKind::CoinbaseKyc,
        None,
    );
    assert_eq!(generated.binding, expected);
    assert!(orchestrator.steps().is_complete());

    let inputs = harness.engine.last_inputs.lock().clone();
    assert_eq!(inputs.len(), CircuitKind::CoinbaseKyc.input_len());
    assert_eq!(
        generated.parsed.num_public_inputs,
        CircuitKind::CoinbaseKyc.num_public_inputs()
    );
    assert_eq!(
        generated.parsed.public_inputs.len(),
        CircuitKind::CoinbaseKyc.num_public_inputs()
    );
    assert!(!generated.artifact.on_chain_mode);
    assert!(generated.started_at <= generated.completed_at);
    assert!(orchestrator.verify_offchain(&generated.artifact).await);
    assert_eq!(harness.engine.cleaned.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn generates_country_proof_with_public_list() {
    let harness = Harness::new(MockEngine::default(), MockStorage::roomy());
    let orchestrator = harness.orchestrator();

    let request = GenerationRequest {
        circuit: CircuitKind::CoinbaseCountry,
        extras: CircuitExtras::Country {
            countries: vec!["US".to_string(), "KR".to_string()],
            is_included: true,
        },
        ..kyc_request(VerificationType::Offchain)
    };
    let generated = orchestrator.generate(&request).await.unwrap();
    assert_eq!(
        harness.engine.last_inputs.lock().len(),
        CircuitKind::CoinbaseCountry.input_len()
    );
    assert_eq!(
        generated.parsed.public_inputs.len(),
        CircuitKind::CoinbaseCountry.num_public_inputs()
    );
}

#[tokio::test]
async fn storage_exhaustion_never_reaches_proving() {
    let harness = Harness::new(MockEngine::default(), MockStorage::new(1_024, 4_096));
    let orchestrator = harness.orchestrator();

    let err = orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InsufficientStorage {
            available: 4_096,
            required: MIN_FREE
        }
    ));
    assert_eq!(harness.storage.purges(), 1);
    assert_eq!(harness.engine.generate_calls(), 0);

    let steps = orchestrator.steps();
    assert!(matches!(steps.state(Step::CheckStorage), StepState::Error(_)));
    assert_eq!(*steps.state(Step::GenerateProof), StepState::Pending);
    assert_eq!(*steps.state(Step::AssembleInputs), StepState::Completed);
}

#[tokio::test]
async fn purging_the_cache_can_free_enough_storage() {
    let harness = Harness::new(MockEngine::default(), MockStorage::new(1_024, MIN_FREE));
    let orchestrator = harness.orchestrator();

    orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap();
    assert_eq!(harness.storage.purges(), 1);
    assert_eq!(harness.engine.generate_calls(), 1);
}

#[tokio::test]
async fn missing_attestation_stops_before_signing() {
    let harness = Harness::new(MockEngine::default(), MockStorage::roomy());
    let empty = AttestationResolver::new(
        &harness.config,
        Arc::new(StaticIndex::default()),
        vec![],
        Arc::new(MokaTtlCache::new(harness.config.attestation_cache_ttl(), 16)),
    )
    .unwrap();
    let orchestrator =
        harness.orchestrator_with(empty, ScriptedSigner::new(harness.fixture.holder.clone()));

    let err = orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NoAttestation { .. }));
    assert!(!err.is_retryable());
    assert_eq!(
        *orchestrator.steps().state(Step::RequestSignature),
        StepState::Pending
    );

    let unreachable = AttestationResolver::new(
        &harness.config,
        Arc::new(FailingIndex),
        vec![],
        Arc::new(MokaTtlCache::new(harness.config.attestation_cache_ttl(), 16)),
    )
    .unwrap();
    let orchestrator = harness.orchestrator_with(
        unreachable,
        ScriptedSigner::new(harness.fixture.holder.clone()),
    );
    let err = orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Resolver(ResolverError::Index(_))));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn signature_failures_are_classified() {
    let harness = Harness::new(MockEngine::default(), MockStorage::roomy());

    let pending = harness.orchestrator_with(
        harness.resolver(),
        ScriptedSigner::failing(harness.fixture.holder.clone(), SignerError::AlreadyPending),
    );
    let err = pending
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::SignaturePending));
    assert!(err.is_retryable());

    let rejected = harness.orchestrator_with(
        harness.resolver(),
        ScriptedSigner::failing(harness.fixture.holder.clone(), SignerError::Rejected),
    );
    let err = rejected
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::SignatureRejected));
    assert!(!err.is_retryable());

    let mut impostor = ScriptedSigner::new(harness.fixture.holder.clone());
    impostor.impostor = Some(PrivateKeySigner::random());
    let mismatched = harness.orchestrator_with(harness.resolver(), impostor);
    let err = mismatched
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::SignerMismatch { .. }));
    assert_eq!(harness.engine.generate_calls(), 0);
}

#[tokio::test]
async fn cleanup_failure_keeps_the_proof() {
    let harness = Harness::new(MockEngine::with_failing_cleanup(), MockStorage::roomy());
    let orchestrator = harness.orchestrator();

    let generated = orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap();
    assert!(!generated.artifact.proof.is_empty());

    let steps = orchestrator.steps();
    assert_eq!(*steps.state(Step::ParseProof), StepState::Completed);
    assert!(matches!(steps.state(Step::CleanupCache), StepState::Error(_)));
}

#[tokio::test]
async fn onchain_verification_requires_onchain_mode() {
    let harness = Harness::new(MockEngine::default(), MockStorage::roomy());
    let verifier = Arc::new(MockOnchainVerifier::new(Address::repeat_byte(0x51), true));
    let orchestrator = harness.orchestrator().with_onchain_verifier(verifier.clone());
    assert_eq!(orchestrator.verifier_address(), Some(Address::repeat_byte(0x51)));

    let offchain = orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap();
    assert!(!orchestrator.verify_onchain(&offchain.artifact).await);

    let onchain = orchestrator
        .generate(&kyc_request(VerificationType::Onchain))
        .await
        .unwrap();
    assert!(onchain.artifact.on_chain_mode);
    assert!(orchestrator.verify_onchain(&onchain.artifact).await);
    assert_eq!(verifier.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    // verification does not touch generation progress
    assert!(orchestrator.steps().is_complete());

    let unconfigured = harness.orchestrator();
    assert!(!unconfigured.verify_onchain(&onchain.artifact).await);
}

#[tokio::test]
async fn public_inputs_start_with_the_binding() {
    let harness = Harness::new(MockEngine::default(), MockStorage::roomy());
    let orchestrator = harness.orchestrator();

    let generated = orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap();

    // every byte of the signal hash is its own public input word
    let signal_words = InputField::SignalHash.width();
    let leading: Vec<u8> = generated.parsed.public_inputs[..signal_words]
        .iter()
        .map(|word| word[31])
        .collect();
    assert_eq!(leading, generated.binding.signal_hash.to_vec());
}

#[tokio::test]
async fn overlapping_generation_is_refused_and_the_first_proof_survives() {
    let engine = MockEngine::slow(Duration::from_millis(300));
    let harness = Harness::new(engine, MockStorage::roomy());
    let orchestrator = Arc::new(harness.orchestrator());

    let mut progress = orchestrator.subscribe();
    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .generate(&kyc_request(VerificationType::Offchain))
                .await
        }
    });
    progress
        .wait_for(|steps| *steps.state(Step::GenerateProof) == StepState::InProgress)
        .await
        .unwrap();
    assert!(orchestrator.is_generating());

    let err = orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::GenerationInProgress));
    assert!(err.is_retryable());

    // the refused attempt left the running one's progress alone
    let steps = orchestrator.steps();
    assert_eq!(*steps.state(Step::RequestSignature), StepState::Completed);
    assert_eq!(*steps.state(Step::GenerateProof), StepState::InProgress);
    assert_eq!(steps.failed_step(), None);

    let generated = first.await.unwrap().unwrap();
    assert!(!generated.artifact.proof.is_empty());
    assert!(orchestrator.steps().is_complete());
    assert!(!orchestrator.is_generating());
    assert_eq!(harness.engine.generate_calls(), 1);

    // and the next attempt runs normally
    orchestrator
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap();
    assert_eq!(harness.engine.generate_calls(), 2);
}

#[tokio::test]
async fn second_signature_prompt_fails_fast() {
    let harness = Harness::new(MockEngine::default(), MockStorage::roomy());
    let prompt = Arc::new(ExclusiveGuard::default());
    let slow_signer =
        ScriptedSigner::hesitant(harness.fixture.holder.clone(), Duration::from_millis(300));
    let hesitant = Arc::new(
        harness
            .orchestrator_with(harness.resolver(), slow_signer)
            .with_signing_guard(prompt.clone()),
    );
    let eager = harness
        .orchestrator_with(
            harness.resolver(),
            ScriptedSigner::new(harness.fixture.holder.clone()),
        )
        .with_signing_guard(prompt.clone());

    let mut progress = hesitant.subscribe();
    let first = tokio::spawn({
        let hesitant = hesitant.clone();
        async move {
            hesitant
                .generate(&kyc_request(VerificationType::Offchain))
                .await
        }
    });
    progress
        .wait_for(|steps| *steps.state(Step::RequestSignature) == StepState::InProgress)
        .await
        .unwrap();
    assert!(prompt.is_busy());

    let err = eager
        .generate(&kyc_request(VerificationType::Offchain))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::SignatureInProgress));
    assert!(err.is_retryable());

    let steps = eager.steps();
    assert_eq!(steps.failed_step(), Some(Step::RequestSignature));
    assert_eq!(*steps.state(Step::DeriveSignal), StepState::Completed);
    assert_eq!(*steps.state(Step::RecoverPublicKey), StepState::Pending);

    let generated = first.await.unwrap().unwrap();
    let expected = IdentityBinding::derive(
        harness.fixture.wallet(),
        "app:default",
        CircuitKind::CoinbaseKyc,
        None,
    );
    assert_eq!(generated.binding.nullifier, expected.nullifier);
    assert!(hesitant.steps().is_complete());
    assert!(!prompt.is_busy());
    assert_eq!(harness.engine.generate_calls(), 1);
}
