//! Key derivation across restarts, machines and passwords.

use std::path::Path;
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::time::Duration;

use sealdb_crypto::{KeyProtector, LegacyProtector};
use sealdb_secrets::{
    KeyManager, KeyMaterialStore, KeychainProtector, NewDeviceAlert, Notifier, StaticIdentity,
};
use secrecy::{ExposeSecret, SecretString};

struct Recorder(Mutex<mpsc::Sender<NewDeviceAlert>>);

impl Notifier for Recorder {
    fn send_new_device_alert(&self, alert: &NewDeviceAlert) -> anyhow::Result<()> {
        self.0.lock().unwrap().send(alert.clone())?;
        Ok(())
    }

    fn send_verification_code(&self, _: &str, _: &SecretString) -> anyhow::Result<()> {
        Ok(())
    }
}

fn legacy() -> Arc<dyn KeyProtector> {
    Arc::new(LegacyProtector::from_identity("test-host", "test-user"))
}

fn manager_with(
    dir: &Path,
    fingerprint: &str,
    protector: Arc<dyn KeyProtector>,
    notifier: Arc<dyn Notifier>,
) -> KeyManager {
    KeyManager::new(
        KeyMaterialStore::with_defaults(dir, None, protector),
        Arc::new(StaticIdentity::new(fingerprint)),
        notifier,
        dir,
    )
}

fn manager(dir: &Path, fingerprint: &str) -> KeyManager {
    manager_with(dir, fingerprint, legacy(), Arc::new(sealdb_secrets::LogNotifier))
}

#[test]
fn same_machine_same_password_same_key_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let password = SecretString::from("Tr0ub4dor&3");

    let first = manager(dir.path(), "CPU123-VOL456")
        .get_encryption_key(Some(&password))
        .unwrap();
    let again = manager(dir.path(), "CPU123-VOL456")
        .get_encryption_key(Some(&password))
        .unwrap();

    assert_eq!(first.expose_secret(), again.expose_secret());
}

#[test]
fn copied_key_material_on_another_machine_yields_different_key() {
    let dir = tempfile::tempdir().unwrap();
    let password = SecretString::from("Tr0ub4dor&3");

    let here = manager(dir.path(), "CPU123-VOL456")
        .get_encryption_key(Some(&password))
        .unwrap();
    let there = manager(dir.path(), "CPU999-VOL000")
        .get_encryption_key(Some(&password))
        .unwrap();

    assert_ne!(here.expose_secret(), there.expose_secret());

    let here_plain = manager(dir.path(), "CPU123-VOL456")
        .get_encryption_key(None)
        .unwrap();
    let there_plain = manager(dir.path(), "CPU999-VOL000")
        .get_encryption_key(None)
        .unwrap();
    assert_ne!(here_plain.expose_secret(), there_plain.expose_secret());
}

#[test]
fn separate_installations_have_separate_keys() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();

    let ka = manager(a.path(), "CPU123-VOL456").get_encryption_key(None).unwrap();
    let kb = manager(b.path(), "CPU123-VOL456").get_encryption_key(None).unwrap();
    assert_ne!(ka.expose_secret(), kb.expose_secret());
}

#[test]
fn new_device_alert_fires_once_per_installation() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel();
    let notifier: Arc<dyn Notifier> = Arc::new(Recorder(Mutex::new(tx)));

    let m = manager_with(dir.path(), "CPU123-VOL456", legacy(), notifier.clone());
    let key = m.get_encryption_key(None).unwrap();
    m.get_encryption_key(None).unwrap();
    manager_with(dir.path(), "CPU123-VOL456", legacy(), notifier)
        .get_encryption_key(None)
        .unwrap();

    let alert = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(alert.device_id, sealdb_secrets::identity::device_id("CPU123-VOL456"));
    assert_eq!(
        alert.key_reference,
        sealdb_secrets::notify::key_reference(&key)
    );
    assert!(!alert.key_reference.contains(key.expose_secret()));
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn concurrent_first_requests_agree_on_one_key() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel();
    let notifier: Arc<dyn Notifier> = Arc::new(Recorder(Mutex::new(tx)));
    let m = Arc::new(manager_with(dir.path(), "CPU123-VOL456", legacy(), notifier));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let m = m.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                m.get_encryption_key(None).unwrap()
            })
        })
        .collect();
    let keys: Vec<SecretString> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let later = manager(dir.path(), "CPU123-VOL456")
        .get_encryption_key(None)
        .unwrap();
    for key in &keys {
        assert_eq!(key.expose_secret(), later.expose_secret());
    }

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
}

#[test]
fn explicit_wrapping_key_protector_works_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let protector: Arc<dyn KeyProtector> = Arc::new(KeychainProtector::with_key([7u8; 32]));

    let m = manager_with(
        dir.path(),
        "CPU123-VOL456",
        protector.clone(),
        Arc::new(sealdb_secrets::LogNotifier),
    );
    let k1 = m.get_encryption_key(None).unwrap();

    let m2 = manager_with(
        dir.path(),
        "CPU123-VOL456",
        protector,
        Arc::new(sealdb_secrets::LogNotifier),
    );
    assert_eq!(k1.expose_secret(), m2.get_encryption_key(None).unwrap().expose_secret());

    // A different wrapping key cannot open the stored base key.
    let m3 = manager_with(
        dir.path(),
        "CPU123-VOL456",
        Arc::new(KeychainProtector::with_key([8u8; 32])),
        Arc::new(sealdb_secrets::LogNotifier),
    );
    assert!(m3.get_encryption_key(None).is_err());
}

#[test]
fn password_hash_is_machine_bound() {
    let dir = tempfile::tempdir().unwrap();
    let password = SecretString::from("Tr0ub4dor&3");

    assert!(manager(dir.path(), "CPU123-VOL456").set_password(&password));
    assert!(manager(dir.path(), "CPU123-VOL456").validate_password(&password));
    assert!(!manager(dir.path(), "CPU999-VOL000").validate_password(&password));
}
