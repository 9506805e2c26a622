//! sealdb-secrets: key material lifecycle for sealdb
//!
//! Key request flow:
//!   1. KeyMaterialStore returns the protected base key (keychain, then file),
//!      generating it on first use
//!   2. The selected KeyProtector unprotects it
//!   3. MachineIdentity supplies the fingerprint it is bound to
//!   4. An optional password is stretched over the bound key
//!
//! The first generation on a device fires a one-time alert through `Notifier`.

pub mod identity;
pub mod keychain;
pub mod manager;
pub mod notify;
pub mod protection;
pub mod store;

pub use identity::{Fingerprint, MachineIdentity, StaticIdentity, SystemIdentity};
pub use manager::{KeyError, KeyManager};
pub use notify::{LogNotifier, NewDeviceAlert, Notifier, OutboxNotifier};
pub use protection::{select_protector, KeychainProtector};
pub use store::{BaseKeyLookup, FileSlot, KeyMaterialStore, KeychainSlot, SecretSlot};
