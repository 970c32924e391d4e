//! Vault state-change notifications
//!
//! Emitted on the service's broadcast channel after the corresponding
//! mutation has been persisted.

use crate::address::AddressType;
use crate::network::Network;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Unlocked,
    Locked,
    KeyringAdded { index: usize },
    KeyringRemoved { index: usize },
    NewAccount { keyring_index: usize, public_key: String },
    AddressTypeChanged { index: usize, address_type: AddressType },
    QuantumKeyChanged { index: usize, fingerprint: Option<String> },
    NetworkChanged { network: Network },
    PasswordChanged,
    /// All keyrings replaced, e.g. by a backup restore
    KeyringsReset,
}
