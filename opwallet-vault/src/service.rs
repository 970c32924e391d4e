//! Keyring service
//!
//! Owns the in-memory keyrings, their address types and the encrypted vault
//! persisted under `keyringState`:
//!
//! ```text
//! keyringState = { "booted": <encrypted "true">, "vault": <encrypted [SavedVaultEntry]> }
//! ```
//!
//! All state sits behind one async mutex, so mutations are serialized and
//! readers see whole values. Every mutation is staged on a copy of the
//! keyring list, persisted, and only then swapped in; a failed persist
//! leaves memory as it was. Events are sent after the swap.
//!
//! Security: the password and all key material are dropped on lock. Errors
//! and log lines name indexes, public keys and fingerprints only.

use opw_crypto_pq::{MlDsaPublicKey, SecurityLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::address::AddressType;
use crate::cipher::Encryptor;
use crate::error::{Result, VaultError};
use crate::events::VaultEvent;
use crate::keyring::{
    AccountKey, EmptyKeyring, HdKeyring, Keyring, KeyringType, SignatureScheme, SignedInput,
    SimpleKeyring, UnsignedTransaction,
};
use crate::migration::{decode_entry, decode_vault};
use crate::network::Network;
use crate::preferences::Preferences;
use crate::storage::{KeyValueStore, KEYRING_STATE_KEY, PREFERENCES_KEY};

/// Plaintext of the boot marker
const BOOT_MARKER: &[u8] = b"true";

const EVENT_CAPACITY: usize = 64;

/// Persisted `keyringState` document
#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyringState {
    #[serde(default)]
    booted: Option<String>,
    #[serde(default)]
    vault: Option<String>,
}

/// Settings applied to a freshly opened service
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceOptions {
    /// Network used when no preferences have been saved yet
    pub network: Network,
    /// ML-DSA level for new keyrings
    pub security_level: SecurityLevel,
}

/// A vault entry that could not be restored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    pub index: usize,
    pub reason: String,
}

/// Outcome of [`KeyringService::submit_password`]
#[derive(Debug, Clone, Default)]
pub struct UnlockReport {
    pub restored: usize,
    /// Entries replaced by empty keyrings; their data is kept in the vault
    pub failures: Vec<RestoreFailure>,
    /// Legacy entries were read; they move to the current form on the next write
    pub migrated: bool,
}

impl UnlockReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Derived view of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub pubkey: String,
    pub address: String,
    pub alias: String,
    pub index: u32,
    pub flag: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantum_public_key_hash: Option<String>,
}

/// Non-secret view of one keyring
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyringSnapshot {
    pub index: usize,
    pub keyring_type: KeyringType,
    pub address_type: AddressType,
    pub alias: String,
    /// One-way hash of the keyring's secret material
    pub wallet_fingerprint: Option<String>,
    /// Hash of the keyring-level ML-DSA public key
    pub quantum_fingerprint: Option<String>,
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultSnapshot {
    pub network: Network,
    pub keyrings: Vec<KeyringSnapshot>,
}

#[derive(Debug, Clone)]
struct KeyringSlot {
    keyring: Keyring,
    address_type: AddressType,
}

struct VaultState {
    password: Option<Zeroizing<String>>,
    /// Index-aligned keyrings and address types
    slots: Vec<KeyringSlot>,
    preferences: Preferences,
}

impl VaultState {
    fn password(&self) -> Result<Zeroizing<String>> {
        self.password.clone().ok_or(VaultError::Locked)
    }

    fn unlocked_slots(&self) -> Result<&[KeyringSlot]> {
        if self.password.is_none() {
            return Err(VaultError::Locked);
        }
        Ok(&self.slots)
    }

    fn slot(&self, index: usize) -> Result<&KeyringSlot> {
        self.unlocked_slots()?
            .get(index)
            .ok_or(VaultError::KeyringNotFound(index))
    }

    /// First keyring holding `public_key`
    fn keyring_for(&self, public_key: &str) -> Result<&Keyring> {
        self.unlocked_slots()?
            .iter()
            .map(|slot| &slot.keyring)
            .find(|keyring| keyring.contains_public_key(public_key))
            .ok_or_else(|| VaultError::AccountNotFound(public_key.to_string()))
    }
}

/// Reject `candidate` if it shares secret material or an account with any
/// keyring other than `skip`.
fn ensure_wallet_unique(slots: &[KeyringSlot], candidate: &Keyring, skip: Option<usize>) -> Result<()> {
    let fingerprint = candidate.wallet_fingerprint();
    let public_keys = candidate.public_keys();

    for (index, slot) in slots.iter().enumerate() {
        if Some(index) == skip {
            continue;
        }
        let same_secret = fingerprint.is_some() && slot.keyring.wallet_fingerprint() == fingerprint;
        let shared_account = slot
            .keyring
            .public_keys()
            .iter()
            .any(|pk| public_keys.contains(pk));
        if same_secret || shared_account {
            return Err(VaultError::DuplicateWallet { index });
        }
    }
    Ok(())
}

/// Reject a quantum key already used by a keyring other than `skip`.
fn ensure_quantum_unique(slots: &[KeyringSlot], fingerprint: &str, skip: Option<usize>) -> Result<()> {
    for (index, slot) in slots.iter().enumerate() {
        if Some(index) == skip {
            continue;
        }
        if slot.keyring.quantum_public_key_hash().as_deref() == Some(fingerprint) {
            return Err(VaultError::DuplicateQuantumKey {
                index,
                fingerprint: fingerprint.to_string(),
            });
        }
    }
    Ok(())
}

fn ensure_unique(slots: &[KeyringSlot], candidate: &Keyring, skip: Option<usize>) -> Result<()> {
    ensure_wallet_unique(slots, candidate, skip)?;
    if let Some(fingerprint) = candidate.quantum_public_key_hash() {
        ensure_quantum_unique(slots, &fingerprint, skip)?;
    }
    Ok(())
}

fn default_keyring_alias(keyring_type: KeyringType, index: usize) -> String {
    match keyring_type {
        KeyringType::Hd => format!("HD Wallet #{}", index + 1),
        KeyringType::Simple => format!("Simple Wallet #{}", index + 1),
        KeyringType::Empty => format!("Unavailable Wallet #{}", index + 1),
    }
}

fn account_view(
    key: &AccountKey,
    address_type: AddressType,
    network: Network,
    preferences: &Preferences,
) -> Result<Account> {
    let pubkey = key.public_key_hex();
    let address = address_type.to_address(
        network,
        &key.public_key,
        key.quantum_public_key.as_ref().map(MlDsaPublicKey::as_bytes),
    )?;

    Ok(Account {
        alias: preferences
            .account_alias(&pubkey)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Account {}", key.index + 1)),
        flag: preferences.account_flag(&pubkey),
        quantum_public_key_hash: key.quantum_public_key.as_ref().map(MlDsaPublicKey::hash),
        index: key.index,
        address,
        pubkey,
    })
}

fn slot_snapshot(
    index: usize,
    slot: &KeyringSlot,
    network: Network,
    preferences: &Preferences,
) -> Result<KeyringSnapshot> {
    let keyring_type = slot.keyring.keyring_type();
    let accounts = slot
        .keyring
        .accounts()
        .iter()
        .map(|key| account_view(key, slot.address_type, network, preferences))
        .collect::<Result<Vec<_>>>()?;

    Ok(KeyringSnapshot {
        index,
        keyring_type,
        address_type: slot.address_type,
        alias: preferences
            .keyring_alias(index)
            .map(str::to_string)
            .unwrap_or_else(|| default_keyring_alias(keyring_type, index)),
        wallet_fingerprint: slot.keyring.wallet_fingerprint(),
        quantum_fingerprint: slot.keyring.quantum_public_key_hash(),
        accounts,
    })
}

/// The credential vault
pub struct KeyringService {
    store: Arc<dyn KeyValueStore>,
    cipher: Arc<dyn Encryptor>,
    security_level: SecurityLevel,
    state: Mutex<VaultState>,
    events: broadcast::Sender<VaultEvent>,
}

impl KeyringService {
    /// Open the service over `store`. The vault starts locked.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        cipher: Arc<dyn Encryptor>,
        options: ServiceOptions,
    ) -> Result<Self> {
        let preferences = match store.get(PREFERENCES_KEY).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Ignoring unreadable keyring preferences: {}", e);
                Preferences {
                    network: options.network,
                    ..Default::default()
                }
            }),
            None => Preferences {
                network: options.network,
                ..Default::default()
            },
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            store,
            cipher,
            security_level: options.security_level,
            state: Mutex::new(VaultState {
                password: None,
                slots: Vec::new(),
                preferences,
            }),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: VaultEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    async fn load_keyring_state(&self) -> Result<KeyringState> {
        match self.store.get(KEYRING_STATE_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(KeyringState::default()),
        }
    }

    async fn save_keyring_state(&self, keyring_state: &KeyringState) -> Result<()> {
        self.store
            .set(KEYRING_STATE_KEY, serde_json::to_value(keyring_state)?)
            .await?;
        Ok(())
    }

    async fn save_preferences(&self, preferences: &Preferences) -> Result<()> {
        self.store
            .set(PREFERENCES_KEY, serde_json::to_value(preferences)?)
            .await?;
        Ok(())
    }

    async fn write_vault(&self, password: &str, slots: &[KeyringSlot]) -> Result<()> {
        let entries = slots
            .iter()
            .map(|slot| slot.keyring.to_entry(slot.address_type))
            .collect::<Result<Vec<_>>>()?;
        let plaintext = Zeroizing::new(serde_json::to_vec(&Value::Array(entries))?);
        let vault = self.cipher.encrypt(password, &plaintext).await?;

        let mut keyring_state = self.load_keyring_state().await?;
        keyring_state.vault = Some(vault);
        self.save_keyring_state(&keyring_state).await?;

        debug!("Persisted {} keyring(s)", slots.len());
        Ok(())
    }

    /// Persist `slots`, then make them live.
    async fn commit(&self, state: &mut VaultState, slots: Vec<KeyringSlot>) -> Result<()> {
        let password = state.password()?;
        self.write_vault(&password, &slots).await?;
        state.slots = slots;
        Ok(())
    }

    /// Serialize every keyring with its address type, encrypt, and overwrite
    /// the vault.
    pub async fn persist_all_keyrings(&self) -> Result<()> {
        let state = self.state.lock().await;
        let password = state.password()?;
        self.write_vault(&password, &state.slots).await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn is_booted(&self) -> Result<bool> {
        Ok(self.load_keyring_state().await?.booted.is_some())
    }

    pub async fn has_vault(&self) -> Result<bool> {
        Ok(self.load_keyring_state().await?.vault.is_some())
    }

    pub async fn is_unlocked(&self) -> bool {
        self.state.lock().await.password.is_some()
    }

    /// Encrypt the boot marker under `password` and unlock with no keyrings.
    ///
    /// Booting again overwrites the marker; the persisted vault is left as is
    /// until the next persist.
    pub async fn boot(&self, password: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        let marker = self.cipher.encrypt(password, BOOT_MARKER).await?;
        let mut keyring_state = self.load_keyring_state().await?;
        keyring_state.booted = Some(marker);
        self.save_keyring_state(&keyring_state).await?;

        state.password = Some(Zeroizing::new(password.to_string()));
        state.slots.clear();
        info!("Vault booted");
        self.emit(VaultEvent::Unlocked);
        Ok(())
    }

    /// Check `password` against the boot marker.
    pub async fn verify_password(&self, password: &str) -> Result<()> {
        let keyring_state = self.load_keyring_state().await?;
        let marker = keyring_state.booted.ok_or(VaultError::NoVault)?;
        let plaintext = self
            .cipher
            .decrypt(password, &marker)
            .await
            .map_err(|_| VaultError::IncorrectPassword)?;

        if plaintext.as_slice() != BOOT_MARKER {
            return Err(VaultError::IncorrectPassword);
        }
        Ok(())
    }

    /// Verify `password`, decrypt the vault and restore every entry.
    ///
    /// Entries that fail to restore become empty keyrings holding the raw
    /// entry, so indexes stay aligned and nothing is lost on the next
    /// persist. Failures are listed in the report.
    pub async fn submit_password(&self, password: &str) -> Result<UnlockReport> {
        let mut state = self.state.lock().await;
        self.verify_password(password).await?;

        let keyring_state = self.load_keyring_state().await?;
        let network = state.preferences.network;
        let mut report = UnlockReport::default();
        let mut slots = Vec::new();

        if let Some(vault) = &keyring_state.vault {
            let plaintext = self.cipher.decrypt(password, vault).await?;
            for (index, decoded) in decode_vault(&plaintext)?.into_iter().enumerate() {
                report.migrated |= decoded.legacy;

                let restored = decoded.entry.and_then(|entry| {
                    Keyring::restore(&entry, network).map(|keyring| KeyringSlot {
                        keyring,
                        address_type: entry.address_type,
                    })
                });

                match restored {
                    Ok(slot) => {
                        report.restored += 1;
                        slots.push(slot);
                    }
                    Err(err) => {
                        warn!("Keyring {} could not be restored: {}", index, err);
                        let address_type = decoded
                            .raw
                            .get("addressType")
                            .and_then(|v| serde_json::from_value(v.clone()).ok())
                            .unwrap_or_default();
                        slots.push(KeyringSlot {
                            keyring: Keyring::Empty(EmptyKeyring::for_failed_entry(
                                err.to_string(),
                                decoded.raw,
                            )),
                            address_type,
                        });
                        report.failures.push(RestoreFailure {
                            index,
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }

        if report.migrated {
            info!("Vault holds legacy entries, they will be upgraded on the next write");
        }

        state.password = Some(Zeroizing::new(password.to_string()));
        state.slots = slots;
        info!(
            "Vault unlocked: {} keyring(s) restored, {} failed",
            report.restored,
            report.failures.len()
        );
        self.emit(VaultEvent::Unlocked);
        Ok(report)
    }

    /// Drop the password and all in-memory keyrings.
    pub async fn set_locked(&self) {
        let mut state = self.state.lock().await;
        state.password = None;
        state.slots.clear();
        info!("Vault locked");
        self.emit(VaultEvent::Locked);
    }

    /// Re-encrypt the boot marker and the vault under `new_password`.
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.verify_password(old_password).await?;

        let mut keyring_state = self.load_keyring_state().await?;
        if let Some(vault) = &keyring_state.vault {
            let plaintext = self.cipher.decrypt(old_password, vault).await?;
            keyring_state.vault = Some(self.cipher.encrypt(new_password, &plaintext).await?);
        }
        keyring_state.booted = Some(self.cipher.encrypt(new_password, BOOT_MARKER).await?);
        self.save_keyring_state(&keyring_state).await?;

        if state.password.is_some() {
            state.password = Some(Zeroizing::new(new_password.to_string()));
        }
        info!("Vault password changed");
        self.emit(VaultEvent::PasswordChanged);
        Ok(())
    }

    // ========================================================================
    // Keyring creation
    // ========================================================================

    pub fn generate_mnemonic(&self, words: usize) -> Result<Zeroizing<String>> {
        crate::keyring::generate_mnemonic(words)
    }

    fn build_hd_keyring(
        &self,
        mnemonic: &str,
        passphrase: &str,
        address_type: AddressType,
        network: Network,
        account_count: u32,
    ) -> Result<Keyring> {
        let mut keyring = HdKeyring::new(
            mnemonic,
            passphrase,
            address_type.purpose(),
            network,
            self.security_level,
        )?;
        keyring.add_accounts(account_count.max(1))?;
        Ok(Keyring::Hd(keyring))
    }

    fn build_simple_keyring(
        &self,
        private_key: &str,
        address_type: AddressType,
        network: Network,
        quantum_private_key: Option<&str>,
    ) -> Result<Keyring> {
        let mut keyring = SimpleKeyring::from_private_key(private_key, network, self.security_level)?;
        match quantum_private_key {
            Some(secret_hex) => {
                keyring.import_quantum_key(secret_hex)?;
            }
            None if address_type.requires_quantum_key() => {
                keyring.generate_fresh_quantum_key();
            }
            None => {}
        }
        Ok(Keyring::Simple(keyring))
    }

    async fn add_keyring(&self, keyring: Keyring, address_type: AddressType) -> Result<usize> {
        let mut state = self.state.lock().await;
        ensure_unique(state.unlocked_slots()?, &keyring, None)?;

        let mut slots = state.slots.clone();
        slots.push(KeyringSlot { keyring, address_type });
        let index = slots.len() - 1;
        self.commit(&mut state, slots).await?;

        state.preferences.current_keyring_index = index;
        self.save_preferences(&state.preferences).await?;

        info!("Added keyring {} ({})", index, address_type);
        self.emit(VaultEvent::KeyringAdded { index });
        Ok(index)
    }

    /// Add an HD keyring with `account_count` accounts (at least one).
    /// Returns the new keyring index.
    pub async fn create_keyring_with_mnemonics(
        &self,
        mnemonic: &str,
        passphrase: &str,
        address_type: AddressType,
        account_count: u32,
    ) -> Result<usize> {
        let network = self.network().await;
        let keyring = self.build_hd_keyring(mnemonic, passphrase, address_type, network, account_count)?;
        self.add_keyring(keyring, address_type).await
    }

    /// Add a single-key keyring from a hex or WIF key, optionally with an
    /// ML-DSA seed. P2QRH keyrings without one get a fresh quantum key.
    pub async fn import_private_key(
        &self,
        private_key: &str,
        address_type: AddressType,
        quantum_private_key: Option<&str>,
    ) -> Result<usize> {
        let network = self.network().await;
        let keyring = self.build_simple_keyring(private_key, address_type, network, quantum_private_key)?;
        self.add_keyring(keyring, address_type).await
    }

    async fn preview(&self, keyring: Keyring, address_type: AddressType) -> Result<KeyringSnapshot> {
        let state = self.state.lock().await;
        let slots = state.unlocked_slots()?;
        ensure_unique(slots, &keyring, None)?;

        let slot = KeyringSlot { keyring, address_type };
        slot_snapshot(slots.len(), &slot, state.preferences.network, &state.preferences)
    }

    /// Build an HD keyring without adding it, running the same checks.
    pub async fn create_tmp_keyring_with_mnemonics(
        &self,
        mnemonic: &str,
        passphrase: &str,
        address_type: AddressType,
        account_count: u32,
    ) -> Result<KeyringSnapshot> {
        let network = self.network().await;
        let keyring = self.build_hd_keyring(mnemonic, passphrase, address_type, network, account_count)?;
        self.preview(keyring, address_type).await
    }

    /// Build a single-key keyring without adding it, running the same checks.
    pub async fn create_tmp_keyring_with_private_key(
        &self,
        private_key: &str,
        address_type: AddressType,
    ) -> Result<KeyringSnapshot> {
        let network = self.network().await;
        let keyring = self.build_simple_keyring(private_key, address_type, network, None)?;
        self.preview(keyring, address_type).await
    }

    /// Restore a persisted entry as a new keyring without duplicate checks.
    pub async fn append_restored_keyring(&self, raw_entry: Value) -> Result<usize> {
        let mut state = self.state.lock().await;
        state.unlocked_slots()?;

        let entry = decode_entry(raw_entry).entry?;
        let keyring = Keyring::restore(&entry, state.preferences.network)?;

        let mut slots = state.slots.clone();
        slots.push(KeyringSlot {
            keyring,
            address_type: entry.address_type,
        });
        let index = slots.len() - 1;
        self.commit(&mut state, slots).await?;

        debug!("Restored keyring {} ({})", index, entry.keyring_type.name());
        self.emit(VaultEvent::KeyringAdded { index });
        Ok(index)
    }

    /// Every keyring's view and persisted entry, in index order, taken
    /// under one lock. The entries contain secrets.
    pub async fn export_keyrings(&self) -> Result<Vec<(KeyringSnapshot, Value)>> {
        let state = self.state.lock().await;
        let network = state.preferences.network;
        state
            .unlocked_slots()?
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let snapshot = slot_snapshot(index, slot, network, &state.preferences)?;
                Ok((snapshot, slot.keyring.to_entry(slot.address_type)?))
            })
            .collect()
    }

    // ========================================================================
    // Keyring mutation
    // ========================================================================

    /// Append the next account to HD keyring `index`.
    pub async fn add_new_account(&self, index: usize) -> Result<Account> {
        let mut accounts = self.grow_keyring(index, |keyring| keyring.add_accounts(1)).await?;
        accounts
            .pop()
            .ok_or_else(|| VaultError::UnsupportedOperation("no account was added".into()))
    }

    /// Activate specific account indexes of HD keyring `index`.
    pub async fn activate_accounts(&self, index: usize, account_indexes: &[u32]) -> Result<Vec<Account>> {
        self.grow_keyring(index, |keyring| keyring.activate_accounts(account_indexes))
            .await
    }

    async fn grow_keyring<F>(&self, index: usize, grow: F) -> Result<Vec<Account>>
    where
        F: FnOnce(&mut Keyring) -> Result<Vec<AccountKey>>,
    {
        let mut state = self.state.lock().await;
        let slot = state.slot(index)?;

        let mut keyring = slot.keyring.clone();
        let added = grow(&mut keyring)?;
        let public_keys: Vec<String> = added.iter().map(AccountKey::public_key_hex).collect();
        for (other, slot) in state.slots.iter().enumerate() {
            if other != index && slot.keyring.public_keys().iter().any(|pk| public_keys.contains(pk)) {
                return Err(VaultError::DuplicateWallet { index: other });
            }
        }

        let address_type = slot.address_type;
        let network = state.preferences.network;
        let accounts = added
            .iter()
            .map(|key| account_view(key, address_type, network, &state.preferences))
            .collect::<Result<Vec<_>>>()?;

        let mut slots = state.slots.clone();
        slots[index].keyring = keyring;
        self.commit(&mut state, slots).await?;

        for account in &accounts {
            self.emit(VaultEvent::NewAccount {
                keyring_index: index,
                public_key: account.pubkey.clone(),
            });
        }
        Ok(accounts)
    }

    /// Remove keyring `index`; later keyrings shift down by one.
    pub async fn remove_keyring(&self, index: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state.slot(index)?;

        let count = state.slots.len();
        let mut slots = state.slots.clone();
        slots.remove(index);
        self.commit(&mut state, slots).await?;

        let remaining: Vec<String> = state
            .slots
            .iter()
            .flat_map(|slot| slot.keyring.public_keys())
            .collect();
        state.preferences.remove_keyring(index, count);
        state.preferences.retain_accounts(&remaining);
        self.save_preferences(&state.preferences).await?;

        info!("Removed keyring {}", index);
        self.emit(VaultEvent::KeyringRemoved { index });
        Ok(())
    }

    /// Remove every keyring.
    pub async fn clear_keyrings(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.unlocked_slots()?;
        self.commit(&mut state, Vec::new()).await?;

        state.preferences.clear_keyrings();
        self.save_preferences(&state.preferences).await?;
        info!("Cleared all keyrings");
        self.emit(VaultEvent::KeyringsReset);
        Ok(())
    }

    /// Switch keyring `index` to another address type. HD keyrings are
    /// re-derived under the new purpose.
    pub async fn change_address_type(&self, index: usize, address_type: AddressType) -> Result<()> {
        let mut state = self.state.lock().await;
        let slot = state.slot(index)?;

        let keyring = match &slot.keyring {
            Keyring::Hd(hd) => {
                let rederived = Keyring::Hd(hd.rederive(address_type.purpose(), hd.network())?);
                ensure_unique(&state.slots, &rederived, Some(index))?;
                rederived
            }
            Keyring::Simple(_) if address_type.requires_quantum_key() && !slot.keyring.has_quantum_key() => {
                return Err(VaultError::UnsupportedOperation(format!(
                    "{} requires a quantum key",
                    address_type
                )));
            }
            Keyring::Simple(_) => slot.keyring.clone(),
            Keyring::Empty(_) => {
                return Err(VaultError::UnsupportedOperation(
                    "empty keyring has no address type".into(),
                ))
            }
        };

        let mut slots = state.slots.clone();
        slots[index] = KeyringSlot { keyring, address_type };
        self.commit(&mut state, slots).await?;

        info!("Keyring {} now uses {}", index, address_type);
        self.emit(VaultEvent::AddressTypeChanged { index, address_type });
        Ok(())
    }

    pub async fn set_keyring_alias(&self, index: usize, alias: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.slot(index)?;
        state.preferences.set_keyring_alias(index, alias);
        self.save_preferences(&state.preferences).await
    }

    pub async fn set_account_alias(&self, public_key: &str, alias: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.keyring_for(public_key)?;
        state.preferences.set_account_alias(public_key, alias);
        self.save_preferences(&state.preferences).await
    }

    pub async fn set_current_keyring(&self, index: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state.slot(index)?;
        state.preferences.current_keyring_index = index;
        self.save_preferences(&state.preferences).await
    }

    // ========================================================================
    // Network
    // ========================================================================

    pub async fn network(&self) -> Network {
        self.state.lock().await.preferences.network
    }

    /// Re-derive every keyring for `network`.
    ///
    /// All keyrings are rebuilt on a staging list first; if any fails the
    /// live keyrings and the persisted vault are untouched.
    pub async fn update_keyrings_network(&self, network: Network) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state.preferences.network;
        if network == current {
            return Ok(());
        }

        let mut staged = Vec::with_capacity(state.unlocked_slots()?.len());
        for (index, slot) in state.slots.iter().enumerate() {
            if let Keyring::Empty(_) = slot.keyring {
                staged.push(slot.clone());
                continue;
            }

            let keyring = slot
                .keyring
                .to_entry(slot.address_type)
                .and_then(|raw| decode_entry(raw).entry)
                .and_then(|entry| Keyring::restore(&entry, network))
                .map_err(|e| VaultError::NetworkSwitch {
                    index,
                    reason: e.to_string(),
                })?;
            staged.push(KeyringSlot {
                keyring,
                address_type: slot.address_type,
            });
        }

        let password = state.password()?;
        self.write_vault(&password, &staged).await?;
        let mut preferences = state.preferences.clone();
        preferences.network = network;
        if let Err(e) = self.save_preferences(&preferences).await {
            // Put the old vault back so disk and memory stay on `current`
            if let Err(rollback) = self.write_vault(&password, &state.slots).await {
                warn!("Could not restore the vault after a failed switch: {}", rollback);
            }
            return Err(e);
        }

        state.slots = staged;
        state.preferences = preferences;
        info!("Switched keyrings from {} to {}", current, network);
        self.emit(VaultEvent::NetworkChanged { network });
        Ok(())
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub async fn keyring_count(&self) -> Result<usize> {
        Ok(self.state.lock().await.unlocked_slots()?.len())
    }

    pub async fn current_keyring_index(&self) -> usize {
        self.state.lock().await.preferences.current_keyring_index
    }

    pub async fn address_types(&self) -> Result<Vec<AddressType>> {
        let state = self.state.lock().await;
        Ok(state.unlocked_slots()?.iter().map(|slot| slot.address_type).collect())
    }

    /// Summaries of every keyring
    pub async fn keyrings(&self) -> Result<Vec<KeyringSnapshot>> {
        Ok(self.snapshot().await?.keyrings)
    }

    pub async fn keyring(&self, index: usize) -> Result<KeyringSnapshot> {
        let state = self.state.lock().await;
        let slot = state.slot(index)?;
        slot_snapshot(index, slot, state.preferences.network, &state.preferences)
    }

    pub async fn accounts(&self, index: usize) -> Result<Vec<Account>> {
        Ok(self.keyring(index).await?.accounts)
    }

    pub async fn all_accounts(&self) -> Result<Vec<Account>> {
        Ok(self
            .keyrings()
            .await?
            .into_iter()
            .flat_map(|keyring| keyring.accounts)
            .collect())
    }

    /// Consistent view of all keyrings, taken under the state lock.
    pub async fn snapshot(&self) -> Result<VaultSnapshot> {
        let state = self.state.lock().await;
        let network = state.preferences.network;
        let keyrings = state
            .unlocked_slots()?
            .iter()
            .enumerate()
            .map(|(index, slot)| slot_snapshot(index, slot, network, &state.preferences))
            .collect::<Result<Vec<_>>>()?;
        Ok(VaultSnapshot { network, keyrings })
    }

    // ========================================================================
    // Secret export (callers must re-verify the password first)
    // ========================================================================

    pub async fn export_account(&self, public_key: &str) -> Result<Zeroizing<String>> {
        let state = self.state.lock().await;
        state.keyring_for(public_key)?.export_account(public_key)
    }

    /// Mnemonic and passphrase of HD keyring `index`
    pub async fn export_mnemonic(&self, index: usize) -> Result<(Zeroizing<String>, Zeroizing<String>)> {
        let state = self.state.lock().await;
        match &state.slot(index)?.keyring {
            Keyring::Hd(hd) => Ok((
                Zeroizing::new(hd.mnemonic().to_string()),
                Zeroizing::new(hd.passphrase().to_string()),
            )),
            _ => Err(VaultError::UnsupportedOperation(
                "only HD keyrings have a mnemonic".into(),
            )),
        }
    }

    pub async fn export_quantum_private_key(&self, index: usize) -> Result<Zeroizing<String>> {
        let state = self.state.lock().await;
        state.slot(index)?.keyring.export_quantum_private_key()
    }

    // ========================================================================
    // Quantum keys
    // ========================================================================

    pub async fn quantum_public_key(&self, index: usize) -> Result<Option<MlDsaPublicKey>> {
        let state = self.state.lock().await;
        Ok(state.slot(index)?.keyring.quantum_public_key().cloned())
    }

    /// Run a quantum key mutation on a copy of keyring `index`, check the
    /// resulting fingerprint is unique, persist, then swap it in.
    async fn stage_quantum<F>(&self, index: usize, mutate: F) -> Result<Option<MlDsaPublicKey>>
    where
        F: FnOnce(&mut Keyring, AddressType) -> Result<()>,
    {
        let mut state = self.state.lock().await;
        let slot = state.slot(index)?;

        let mut keyring = slot.keyring.clone();
        mutate(&mut keyring, slot.address_type)?;

        let public_key = keyring.quantum_public_key().cloned();
        let fingerprint = public_key.as_ref().map(MlDsaPublicKey::hash);
        if let Some(fingerprint) = &fingerprint {
            ensure_quantum_unique(&state.slots, fingerprint, Some(index))?;
        }

        let mut slots = state.slots.clone();
        slots[index].keyring = keyring;
        self.commit(&mut state, slots).await?;

        info!(
            "Quantum key of keyring {} is now {}",
            index,
            fingerprint.as_deref().unwrap_or("none")
        );
        self.emit(VaultEvent::QuantumKeyChanged { index, fingerprint });
        Ok(public_key)
    }

    /// Replace the quantum key of a single-key keyring with an imported seed.
    pub async fn import_quantum_key(&self, index: usize, secret_hex: &str) -> Result<MlDsaPublicKey> {
        self.stage_quantum(index, |keyring, _| keyring.import_quantum_key(secret_hex).map(drop))
            .await?
            .ok_or_else(|| VaultError::InvalidKey("quantum key was not imported".into()))
    }

    pub async fn generate_fresh_quantum_key(&self, index: usize) -> Result<MlDsaPublicKey> {
        self.stage_quantum(index, |keyring, _| keyring.generate_fresh_quantum_key().map(drop))
            .await?
            .ok_or_else(|| VaultError::InvalidKey("quantum key was not generated".into()))
    }

    /// Remove the quantum key of a single-key keyring. Returns whether one
    /// was present.
    pub async fn clear_quantum_key(&self, index: usize) -> Result<bool> {
        let mut had_key = false;
        self.stage_quantum(index, |keyring, address_type| {
            if address_type.requires_quantum_key() {
                return Err(VaultError::UnsupportedOperation(format!(
                    "{} keyrings need their quantum key",
                    address_type
                )));
            }
            had_key = keyring.clear_quantum_key()?;
            Ok(())
        })
        .await?;
        Ok(had_key)
    }

    // ========================================================================
    // Signing
    // ========================================================================

    pub async fn sign_transaction(&self, index: usize, tx: &UnsignedTransaction) -> Result<Vec<SignedInput>> {
        let state = self.state.lock().await;
        state.slot(index)?.keyring.sign_transaction(tx)
    }

    pub async fn sign_message(&self, public_key: &str, message: &[u8]) -> Result<String> {
        let state = self.state.lock().await;
        state.keyring_for(public_key)?.sign_message(public_key, message)
    }

    pub async fn sign_data(&self, public_key: &str, data_hex: &str, scheme: SignatureScheme) -> Result<String> {
        let state = self.state.lock().await;
        state.keyring_for(public_key)?.sign_data(public_key, data_hex, scheme)
    }

    pub async fn sign_mldsa(&self, public_key: &str, message: &[u8]) -> Result<String> {
        let state = self.state.lock().await;
        state.keyring_for(public_key)?.sign_mldsa(public_key, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{CipherParams, PasswordCipher};
    use crate::storage::MemoryStore;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    async fn service(store: Arc<MemoryStore>) -> KeyringService {
        KeyringService::open(
            store,
            Arc::new(PasswordCipher::new(CipherParams::insecure_for_tests())),
            ServiceOptions {
                network: Network::Mainnet,
                security_level: SecurityLevel::Mldsa44,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_starts_locked() {
        let service = service(Arc::new(MemoryStore::new())).await;
        assert!(!service.is_unlocked().await);
        assert!(!service.is_booted().await.unwrap());
        assert!(matches!(service.keyring_count().await, Err(VaultError::Locked)));
        assert!(matches!(service.submit_password("pw").await, Err(VaultError::NoVault)));
    }

    #[tokio::test]
    async fn test_boot_and_verify() {
        let service = service(Arc::new(MemoryStore::new())).await;
        service.boot("pw").await.unwrap();

        assert!(service.is_unlocked().await);
        assert!(service.is_booted().await.unwrap());
        assert!(!service.has_vault().await.unwrap());
        service.verify_password("pw").await.unwrap();
        assert!(matches!(
            service.verify_password("wrong").await,
            Err(VaultError::IncorrectPassword)
        ));
    }

    #[tokio::test]
    async fn test_bip84_account_view() {
        let service = service(Arc::new(MemoryStore::new())).await;
        service.boot("pw").await.unwrap();
        let index = service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();

        let accounts = service.accounts(index).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert_eq!(accounts[0].alias, "Account 1");
        assert!(accounts[0].quantum_public_key_hash.is_some());

        let keyring = service.keyring(index).await.unwrap();
        assert_eq!(keyring.alias, "HD Wallet #1");
        assert_eq!(service.current_keyring_index().await, 0);
    }

    #[tokio::test]
    async fn test_events_follow_mutations() {
        let service = service(Arc::new(MemoryStore::new())).await;
        let mut events = service.subscribe();
        service.boot("pw").await.unwrap();
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap(), VaultEvent::Unlocked);
        assert_eq!(events.recv().await.unwrap(), VaultEvent::KeyringAdded { index: 0 });
    }

    #[tokio::test]
    async fn test_failed_mutation_emits_nothing() {
        let service = service(Arc::new(MemoryStore::new())).await;
        service.boot("pw").await.unwrap();
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();

        let mut events = service.subscribe();
        assert!(service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .is_err());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_change_address_type_rederives() {
        let service = service(Arc::new(MemoryStore::new())).await;
        service.boot("pw").await.unwrap();
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();

        service.change_address_type(0, AddressType::P2pkh).await.unwrap();
        let accounts = service.accounts(0).await.unwrap();
        assert_eq!(accounts[0].address, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
        assert_eq!(service.address_types().await.unwrap(), vec![AddressType::P2pkh]);
    }

    #[tokio::test]
    async fn test_clear_quantum_key_blocked_for_p2qrh() {
        let service = service(Arc::new(MemoryStore::new())).await;
        service.boot("pw").await.unwrap();
        service
            .import_private_key(&"42".repeat(32), AddressType::P2qrh, None)
            .await
            .unwrap();

        assert!(service.quantum_public_key(0).await.unwrap().is_some());
        assert!(matches!(
            service.clear_quantum_key(0).await,
            Err(VaultError::UnsupportedOperation(_))
        ));
        assert!(service.accounts(0).await.unwrap()[0].address.starts_with("bc1r"));
    }
}
