//! Fixtures and stub collaborators shared by the attest-id test suites.
#![allow(missing_docs, clippy::missing_panics_doc)]

pub mod fixtures;
pub mod stubs;

pub use fixtures::AttestationFixture;
pub use stubs::{
    FailingIndex, MockEngine, MockOnchainVerifier, MockStorage, ScriptedSigner, StaticIndex,
    StaticSource,
};
