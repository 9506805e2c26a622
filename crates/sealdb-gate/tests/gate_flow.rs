//! End-to-end verification flows against a real record file.

use std::sync::Arc;
use std::thread;

use chrono::{Duration, Utc};
use sealdb_core::config::VerificationConfig;
use sealdb_core::GateState;
use sealdb_gate::{ManualClock, VerificationGate, VerifyOutcome};
use secrecy::ExposeSecret;

#[test]
fn fresh_install_generate_verify_reset_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let gate = VerificationGate::open(dir.path(), &VerificationConfig::default()).unwrap();

    assert!(!gate.is_verification_completed());

    let first = gate.generate_code().unwrap();
    assert!(first.expires_at > Utc::now() + Duration::minutes(29));
    assert!(gate.verify_code(first.code.expose_secret()).unwrap());
    // Idempotent after success
    assert!(gate.verify_code(first.code.expose_secret()).unwrap());
    assert!(gate.verify_code("not-even-digits").unwrap());

    gate.reset().unwrap();
    assert!(!gate.is_verification_completed());
    assert!(!gate.verify_code(first.code.expose_secret()).unwrap());
    assert_eq!(gate.state().unwrap(), GateState::Unverified);

    let second = gate.generate_code().unwrap();
    assert!(gate.verify_code(second.code.expose_secret()).unwrap());
}

#[test]
fn regenerating_replaces_outstanding_code() {
    let dir = tempfile::tempdir().unwrap();
    let gate = VerificationGate::open(dir.path(), &VerificationConfig::default()).unwrap();

    let old = gate.generate_code().unwrap();
    let new = gate.generate_code().unwrap();
    if old.code.expose_secret() != new.code.expose_secret() {
        assert_eq!(
            gate.verify_code_detailed(old.code.expose_secret()).unwrap(),
            VerifyOutcome::Mismatch
        );
    }
    assert!(gate.verify_code(new.code.expose_secret()).unwrap());
}

#[test]
fn short_ttl_from_config_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let config = VerificationConfig {
        code_ttl_minutes: 5,
        ..Default::default()
    };
    let gate = VerificationGate::with_clock(dir.path(), &config, clock.clone()).unwrap();

    let issued = gate.generate_code().unwrap();
    clock.advance(Duration::minutes(6));
    assert_eq!(
        gate.verify_code_detailed(issued.code.expose_secret()).unwrap(),
        VerifyOutcome::Expired
    );
}

#[test]
fn concurrent_verifications_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let config = VerificationConfig {
        max_attempts: 100,
        ..Default::default()
    };
    let gate = Arc::new(VerificationGate::open(dir.path(), &config).unwrap());
    let code = gate.generate_code().unwrap().code.expose_secret().to_string();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gate = gate.clone();
            let code = code.clone();
            thread::spawn(move || gate.verify_code_detailed(&code).unwrap())
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == VerifyOutcome::Verified)
            .count(),
        1
    );
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, VerifyOutcome::Verified | VerifyOutcome::AlreadyVerified)));
}

#[test]
fn two_gates_share_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let a = VerificationGate::open(dir.path(), &VerificationConfig::default()).unwrap();
    let issued = a.generate_code().unwrap();

    let b = VerificationGate::open(dir.path(), &VerificationConfig::default()).unwrap();
    assert_eq!(b.state().unwrap(), GateState::CodeIssued);
    assert!(b.verify_code(issued.code.expose_secret()).unwrap());
    assert!(a.is_verification_completed());
}
