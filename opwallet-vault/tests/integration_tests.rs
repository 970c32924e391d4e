//! Integration tests for opwallet-vault
//!
//! These tests exercise the vault end to end through `KeyringService`:
//! - Vault lifecycle (boot, unlock, lock, change password)
//! - Keyring round-trips and index alignment
//! - Duplicate wallet and quantum key rejection
//! - Network switching
//! - Duplication detection, backup and resolution

use opw_crypto_pq::SecurityLevel;
use opwallet_vault::{
    cipher::{CipherParams, Encryptor, PasswordCipher},
    duplication::{
        resolve_conflict, BackupKeyringData, ConflictType, DuplicationBackup, DuplicationDetector,
        ResolutionReport,
    },
    keyring::SignatureScheme,
    storage::{
        FileStore, KeyValueStore, MemoryStore, StorageError, KEYRING_STATE_KEY, PREFERENCES_KEY,
    },
    AddressType, KeyringService, KeyringType, Network, ServiceOptions, VaultError,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

// Standard BIP39 test vectors (12 words)
const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const OTHER_MNEMONIC: &str =
    "legal winner thank year wave sausage worth useful legal winner thank yellow";
const TEST_PASSWORD: &str = "secure-test-password-123!";

// Private key 1, as hex and as mainnet WIF
const KEY_ONE_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000001";
const KEY_ONE_WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";

fn key_hex(byte: u8) -> String {
    hex::encode([byte; 32])
}

fn cipher() -> Arc<PasswordCipher> {
    Arc::new(PasswordCipher::new(CipherParams::insecure_for_tests()))
}

async fn open(store: Arc<dyn KeyValueStore>, cipher: Arc<PasswordCipher>) -> KeyringService {
    KeyringService::open(
        store,
        cipher,
        ServiceOptions {
            network: Network::Mainnet,
            security_level: SecurityLevel::Mldsa44,
        },
    )
    .await
    .unwrap()
}

/// A booted, unlocked service over an in-memory store
async fn booted() -> (KeyringService, Arc<MemoryStore>, Arc<PasswordCipher>) {
    let store = Arc::new(MemoryStore::new());
    let cipher = cipher();
    let service = open(store.clone(), cipher.clone()).await;
    service.boot(TEST_PASSWORD).await.unwrap();
    (service, store, cipher)
}

async fn all_pubkeys(service: &KeyringService) -> Vec<String> {
    service
        .all_accounts()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.pubkey)
        .collect()
}

/// Decrypt the persisted vault array
async fn read_vault(store: &MemoryStore, cipher: &PasswordCipher) -> Vec<Value> {
    let state = store.get(KEYRING_STATE_KEY).await.unwrap().unwrap();
    let vault = state["vault"].as_str().unwrap();
    let plaintext = cipher.decrypt(TEST_PASSWORD, vault).await.unwrap();
    serde_json::from_slice(&plaintext).unwrap()
}

/// Replace the persisted vault with `entries`, keeping the boot marker
async fn write_vault(store: &MemoryStore, cipher: &PasswordCipher, entries: Value) {
    let mut state = store.get(KEYRING_STATE_KEY).await.unwrap().unwrap();
    let plaintext = serde_json::to_vec(&entries).unwrap();
    state["vault"] = json!(cipher.encrypt(TEST_PASSWORD, &plaintext).await.unwrap());
    store.set(KEYRING_STATE_KEY, state).await.unwrap();
}

fn simple_entry(private_key: &str, quantum_seed: Option<&str>) -> Value {
    let mut data = json!({"privateKey": private_key, "securityLevel": "MLDSA44"});
    if let Some(seed) = quantum_seed {
        data["quantumPrivateKey"] = json!(seed);
    }
    json!({"type": "SimpleKeyring", "data": data, "addressType": "P2WPKH"})
}

// ============================================================================
// Vault Lifecycle Tests
// ============================================================================

mod vault_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_boot_import_lock_unlock_same_pubkey() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("vault.json");

        // 1. Boot and import a mnemonic
        let service = open(Arc::new(FileStore::new(&path)), cipher()).await;
        service.boot(TEST_PASSWORD).await.unwrap();
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        let before = all_pubkeys(&service).await;

        // 2. Lock
        service.set_locked().await;
        assert!(!service.is_unlocked().await);

        // 3. Unlock from a fresh process over the same file
        let reopened = open(Arc::new(FileStore::new(&path)), cipher()).await;
        let report = reopened.submit_password(TEST_PASSWORD).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.restored, 1);

        assert_eq!(all_pubkeys(&reopened).await, before);
        assert_eq!(
            reopened.accounts(0).await.unwrap()[0].address,
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );
    }

    #[tokio::test]
    async fn test_lock_clears_secrets() {
        let (service, _, _) = booted().await;
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        let pubkey = all_pubkeys(&service).await.remove(0);
        let hash = "ab".repeat(32);

        let signature = service
            .sign_data(&pubkey, &hash, SignatureScheme::Ecdsa)
            .await
            .unwrap();

        service.set_locked().await;
        assert!(matches!(
            service.sign_data(&pubkey, &hash, SignatureScheme::Ecdsa).await,
            Err(VaultError::Locked)
        ));
        assert!(matches!(service.export_account(&pubkey).await, Err(VaultError::Locked)));
        assert!(matches!(service.keyrings().await, Err(VaultError::Locked)));

        service.submit_password(TEST_PASSWORD).await.unwrap();
        assert_eq!(
            service
                .sign_data(&pubkey, &hash, SignatureScheme::Ecdsa)
                .await
                .unwrap(),
            signature
        );
    }

    #[tokio::test]
    async fn test_wrong_password_and_missing_vault() {
        let store = Arc::new(MemoryStore::new());
        let service = open(store.clone(), cipher()).await;
        assert!(matches!(
            service.submit_password(TEST_PASSWORD).await,
            Err(VaultError::NoVault)
        ));

        service.boot(TEST_PASSWORD).await.unwrap();
        service.set_locked().await;
        assert!(matches!(
            service.submit_password("wrong password").await,
            Err(VaultError::IncorrectPassword)
        ));
        assert!(!service.is_unlocked().await);
    }

    #[tokio::test]
    async fn test_change_password() {
        let (service, _, _) = booted().await;
        service
            .import_private_key(&key_hex(7), AddressType::P2tr, None)
            .await
            .unwrap();
        let before = all_pubkeys(&service).await;

        assert!(matches!(
            service.change_password("wrong password", "new-password-456").await,
            Err(VaultError::IncorrectPassword)
        ));
        service
            .change_password(TEST_PASSWORD, "new-password-456")
            .await
            .unwrap();

        service.set_locked().await;
        assert!(matches!(
            service.submit_password(TEST_PASSWORD).await,
            Err(VaultError::IncorrectPassword)
        ));
        service.submit_password("new-password-456").await.unwrap();
        assert_eq!(all_pubkeys(&service).await, before);
    }

    #[tokio::test]
    async fn test_failed_entry_is_preserved() {
        let (service, store, cipher) = booted().await;
        let unknown = json!({"type": "KeystoneKeyring", "data": {"xfp": "deadbeef"}, "addressType": "P2TR"});
        write_vault(&store, &cipher, json!([simple_entry(&key_hex(1), None), unknown.clone()])).await;

        service.set_locked().await;
        let report = service.submit_password(TEST_PASSWORD).await.unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);

        // The failed slot keeps its index and address type
        let keyrings = service.keyrings().await.unwrap();
        assert_eq!(keyrings.len(), 2);
        assert_eq!(keyrings[1].keyring_type, KeyringType::Empty);
        assert_eq!(keyrings[1].address_type, AddressType::P2tr);
        assert!(keyrings[1].accounts.is_empty());

        // Persisting writes the raw entry back untouched
        service
            .import_private_key(&key_hex(2), AddressType::P2wpkh, None)
            .await
            .unwrap();
        let vault = read_vault(&store, &cipher).await;
        assert_eq!(vault.len(), 3);
        assert_eq!(vault[1], unknown);
    }

    #[tokio::test]
    async fn test_legacy_entries_are_migrated() {
        let (service, store, cipher) = booted().await;
        write_vault(
            &store,
            &cipher,
            json!([
                {"type": "Simple Key Pair", "data": [KEY_ONE_HEX], "addressType": 0},
                {"type": "HD Key Tree", "data": {"mnemonic": TEST_MNEMONIC, "hdPath": "m/84'/0'/0'/0", "numberOfAccounts": 2}, "addressType": 1}
            ]),
        )
        .await;

        service.set_locked().await;
        let report = service.submit_password(TEST_PASSWORD).await.unwrap();
        assert!(report.migrated);
        assert!(report.is_complete());

        let keyrings = service.keyrings().await.unwrap();
        assert_eq!(keyrings[0].address_type, AddressType::P2pkh);
        assert_eq!(keyrings[0].accounts[0].address, "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
        assert_eq!(keyrings[1].accounts.len(), 2);
        assert_eq!(
            keyrings[1].accounts[0].address,
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );

        // Unlocking alone leaves the stored entries untouched
        let vault = read_vault(&store, &cipher).await;
        assert_eq!(vault[0]["type"], "Simple Key Pair");
        assert_eq!(vault[1]["type"], "HD Key Tree");

        // The next write stores the current form
        service.persist_all_keyrings().await.unwrap();
        let vault = read_vault(&store, &cipher).await;
        assert_eq!(vault[0]["type"], "SimpleKeyring");
        assert_eq!(vault[0]["addressType"], "P2PKH");
        assert_eq!(vault[1]["type"], "HdKeyring");
        assert_eq!(vault[1]["data"]["activeIndexes"], json!([0, 1]));
        assert!(vault[1]["data"].get("hdPath").is_none());
    }
}

// ============================================================================
// Keyring Round-Trip Tests
// ============================================================================

mod keyring_roundtrip {
    use super::*;

    #[tokio::test]
    async fn test_every_variant_roundtrips() {
        let (service, _, _) = booted().await;

        let hd = service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "TREZOR", AddressType::P2tr, 2)
            .await
            .unwrap();
        service.activate_accounts(hd, &[5, 9]).await.unwrap();
        let simple = service
            .import_private_key(&key_hex(3), AddressType::P2shP2wpkh, Some(&"11".repeat(32)))
            .await
            .unwrap();
        service
            .append_restored_keyring(json!({"type": "Empty", "data": {"reason": "hardware"}, "addressType": "P2WPKH"}))
            .await
            .unwrap();

        let before = service.snapshot().await.unwrap();
        let hash = "5a".repeat(32);
        let mut signatures = Vec::new();
        for pubkey in all_pubkeys(&service).await {
            signatures.push(
                service
                    .sign_data(&pubkey, &hash, SignatureScheme::Ecdsa)
                    .await
                    .unwrap(),
            );
        }

        service.set_locked().await;
        service.submit_password(TEST_PASSWORD).await.unwrap();

        let after = service.snapshot().await.unwrap();
        assert_eq!(after.keyrings.len(), 3);
        for (a, b) in before.keyrings.iter().zip(&after.keyrings) {
            assert_eq!(a.keyring_type, b.keyring_type);
            assert_eq!(a.address_type, b.address_type);
            assert_eq!(a.accounts, b.accounts);
            assert_eq!(a.wallet_fingerprint, b.wallet_fingerprint);
            assert_eq!(a.quantum_fingerprint, b.quantum_fingerprint);
        }
        assert_eq!(
            after.keyrings[hd].accounts.iter().map(|a| a.index).collect::<Vec<_>>(),
            vec![0, 1, 5, 9]
        );
        assert!(after.keyrings[simple].quantum_fingerprint.is_some());

        for (pubkey, signature) in all_pubkeys(&service).await.iter().zip(&signatures) {
            assert_eq!(
                &service
                    .sign_data(pubkey, &hash, SignatureScheme::Ecdsa)
                    .await
                    .unwrap(),
                signature
            );
        }
    }

    #[tokio::test]
    async fn test_index_alignment() {
        let (service, _, _) = booted().await;

        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        service
            .import_private_key(&key_hex(1), AddressType::P2pkh, None)
            .await
            .unwrap();
        service
            .create_keyring_with_mnemonics(OTHER_MNEMONIC, "", AddressType::P2tr, 1)
            .await
            .unwrap();
        service
            .import_private_key(&key_hex(2), AddressType::M44P2tr, None)
            .await
            .unwrap();
        service.set_keyring_alias(2, "savings").await.unwrap();
        service.set_keyring_alias(3, "spending").await.unwrap();
        service.set_current_keyring(3).await.unwrap();

        service.remove_keyring(1).await.unwrap();
        service.add_new_account(1).await.unwrap();
        service
            .import_private_key(&key_hex(4), AddressType::P2qrh, None)
            .await
            .unwrap();
        service.remove_keyring(0).await.unwrap();

        let keyrings = service.keyrings().await.unwrap();
        let address_types = service.address_types().await.unwrap();
        assert_eq!(keyrings.len(), 3);
        assert_eq!(address_types.len(), keyrings.len());
        assert_eq!(
            address_types,
            vec![AddressType::P2tr, AddressType::M44P2tr, AddressType::P2qrh]
        );
        for (i, keyring) in keyrings.iter().enumerate() {
            assert_eq!(keyring.index, i);
            assert_eq!(keyring.address_type, address_types[i]);
        }

        // Aliases and the selection followed their keyrings
        assert_eq!(keyrings[0].alias, "savings");
        assert_eq!(keyrings[0].accounts.len(), 2);
        assert_eq!(keyrings[1].alias, "spending");
        assert_eq!(service.current_keyring_index().await, 2);

        service.set_locked().await;
        service.submit_password(TEST_PASSWORD).await.unwrap();
        assert_eq!(service.address_types().await.unwrap(), address_types);
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let (service, _, _) = booted().await;
        let simple = service
            .import_private_key(&key_hex(1), AddressType::P2wpkh, None)
            .await
            .unwrap();
        let hd = service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();

        assert!(matches!(
            service.add_new_account(simple).await,
            Err(VaultError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            service.generate_fresh_quantum_key(hd).await,
            Err(VaultError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            service.export_mnemonic(simple).await,
            Err(VaultError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            service.add_new_account(9).await,
            Err(VaultError::KeyringNotFound(9))
        ));
    }
}

// ============================================================================
// Duplicate Rejection Tests
// ============================================================================

mod duplicate_rejection {
    use super::*;

    #[tokio::test]
    async fn test_same_mnemonic_rejected() {
        let (service, store, cipher) = booted().await;
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        let vault_before = read_vault(&store, &cipher).await;

        // Same secret under another address type is still the same wallet
        for address_type in [AddressType::P2wpkh, AddressType::P2tr] {
            assert!(matches!(
                service
                    .create_keyring_with_mnemonics(TEST_MNEMONIC, "", address_type, 1)
                    .await,
                Err(VaultError::DuplicateWallet { index: 0 })
            ));
        }
        assert!(matches!(
            service
                .create_tmp_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
                .await,
            Err(VaultError::DuplicateWallet { index: 0 })
        ));

        assert_eq!(service.keyring_count().await.unwrap(), 1);
        assert_eq!(read_vault(&store, &cipher).await, vault_before);

        // A passphrase makes it a different wallet
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "extra", AddressType::P2wpkh, 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_private_key_of_hd_account_rejected() {
        let (service, _, _) = booted().await;
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        let pubkey = all_pubkeys(&service).await.remove(0);
        let private_key = service.export_account(&pubkey).await.unwrap();

        assert!(matches!(
            service
                .import_private_key(&private_key, AddressType::P2wpkh, None)
                .await,
            Err(VaultError::DuplicateWallet { index: 0 })
        ));
        assert!(matches!(
            service
                .create_tmp_keyring_with_private_key(&private_key, AddressType::P2wpkh)
                .await,
            Err(VaultError::DuplicateWallet { index: 0 })
        ));
        assert_eq!(service.keyring_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hex_and_wif_are_the_same_wallet() {
        let (service, _, _) = booted().await;
        service
            .import_private_key(KEY_ONE_HEX, AddressType::P2wpkh, None)
            .await
            .unwrap();
        assert!(matches!(
            service
                .import_private_key(KEY_ONE_WIF, AddressType::P2pkh, None)
                .await,
            Err(VaultError::DuplicateWallet { index: 0 })
        ));
    }

    #[tokio::test]
    async fn test_tmp_keyring_preview_adds_nothing() {
        let (service, _, _) = booted().await;
        let preview = service
            .create_tmp_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2pkh, 3)
            .await
            .unwrap();

        assert_eq!(preview.accounts.len(), 3);
        assert_eq!(preview.accounts[0].address, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
        assert_eq!(service.keyring_count().await.unwrap(), 0);
    }
}

// ============================================================================
// Quantum Key Tests
// ============================================================================

mod quantum_keys {
    use super::*;

    #[tokio::test]
    async fn test_shared_quantum_key_rejected_on_import() {
        let (service, _, _) = booted().await;
        let q1 = "11".repeat(32);

        service
            .import_private_key(&key_hex(1), AddressType::P2wpkh, Some(&q1))
            .await
            .unwrap();
        let result = service
            .import_private_key(&key_hex(2), AddressType::P2wpkh, Some(&q1))
            .await;

        match result {
            Err(VaultError::DuplicateQuantumKey { index, fingerprint }) => {
                assert_eq!(index, 0);
                let existing = service.quantum_public_key(0).await.unwrap().unwrap();
                assert_eq!(fingerprint, existing.hash());
            }
            other => panic!("expected DuplicateQuantumKey, got {:?}", other),
        }
        assert_eq!(service.keyring_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_quantum_mutation_keeps_target_on_conflict() {
        let (service, _, _) = booted().await;
        let q1 = "11".repeat(32);
        let q2 = "22".repeat(32);

        service
            .import_private_key(&key_hex(1), AddressType::P2wpkh, Some(&q1))
            .await
            .unwrap();
        service
            .import_private_key(&key_hex(2), AddressType::P2wpkh, Some(&q2))
            .await
            .unwrap();
        let before = service.quantum_public_key(1).await.unwrap().unwrap();

        assert!(matches!(
            service.import_quantum_key(1, &q1).await,
            Err(VaultError::DuplicateQuantumKey { index: 0, .. })
        ));
        assert_eq!(service.quantum_public_key(1).await.unwrap().unwrap(), before);

        // Survives a lock cycle unchanged
        service.set_locked().await;
        service.submit_password(TEST_PASSWORD).await.unwrap();
        assert_eq!(service.quantum_public_key(1).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_generate_and_clear() {
        let (service, _, _) = booted().await;
        let index = service
            .import_private_key(&key_hex(5), AddressType::P2wpkh, None)
            .await
            .unwrap();
        assert!(service.quantum_public_key(index).await.unwrap().is_none());

        let fresh = service.generate_fresh_quantum_key(index).await.unwrap();
        assert_eq!(
            service.accounts(index).await.unwrap()[0].quantum_public_key_hash,
            Some(fresh.hash())
        );
        let pubkey = all_pubkeys(&service).await.remove(0);
        assert!(service.sign_mldsa(&pubkey, b"message").await.is_ok());

        let seed = service.export_quantum_private_key(index).await.unwrap();
        assert_eq!(seed.len(), 64);

        assert!(service.clear_quantum_key(index).await.unwrap());
        assert!(!service.clear_quantum_key(index).await.unwrap());
        assert!(service.quantum_public_key(index).await.unwrap().is_none());
        assert!(service.sign_mldsa(&pubkey, b"message").await.is_err());
    }

    #[tokio::test]
    async fn test_hd_quantum_key_is_stable_across_address_types() {
        let (service, _, _) = booted().await;
        let index = service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        let before = service.quantum_public_key(index).await.unwrap().unwrap();

        service.change_address_type(index, AddressType::P2qrh).await.unwrap();
        let after = service.quantum_public_key(index).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert!(service.accounts(index).await.unwrap()[0].address.starts_with("bc1r"));
    }
}

// ============================================================================
// Network Switch Tests
// ============================================================================

mod network_switch {
    use super::*;

    #[tokio::test]
    async fn test_switch_rederives_keyrings() {
        let (service, _, _) = booted().await;
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        service
            .import_private_key(KEY_ONE_HEX, AddressType::P2wpkh, None)
            .await
            .unwrap();
        let mainnet = all_pubkeys(&service).await;

        service.update_keyrings_network(Network::Testnet).await.unwrap();
        assert_eq!(service.network().await, Network::Testnet);

        let testnet = all_pubkeys(&service).await;
        // HD coin type changes, the single key does not
        assert_ne!(testnet[0], mainnet[0]);
        assert_eq!(testnet[1], mainnet[1]);
        for account in service.all_accounts().await.unwrap() {
            assert!(account.address.starts_with("tb1q"));
        }

        // The network is remembered across unlocks
        service.set_locked().await;
        service.submit_password(TEST_PASSWORD).await.unwrap();
        assert_eq!(all_pubkeys(&service).await, testnet);
    }

    #[tokio::test]
    async fn test_wif_import_survives_switch() {
        let (service, store, cipher) = booted().await;
        let index = service
            .import_private_key(KEY_ONE_WIF, AddressType::P2wpkh, None)
            .await
            .unwrap();
        let mainnet = all_pubkeys(&service).await;

        // Persisted as hex, so the key is not tied to the import network
        assert_eq!(read_vault(&store, &cipher).await[0]["data"]["privateKey"], KEY_ONE_HEX);

        service.update_keyrings_network(Network::Testnet).await.unwrap();
        assert_eq!(all_pubkeys(&service).await, mainnet);
        assert!(service.accounts(index).await.unwrap()[0].address.starts_with("tb1q"));

        service.update_keyrings_network(Network::Mainnet).await.unwrap();
        assert!(service.accounts(index).await.unwrap()[0].address.starts_with("bc1q"));
    }

    #[tokio::test]
    async fn test_switch_keeps_unreadable_entries() {
        let (service, store, cipher) = booted().await;
        let corrupt = json!({"type": "SimpleKeyring", "data": {"privateKey": "zz"}});
        write_vault(&store, &cipher, json!([simple_entry(&key_hex(1), None), corrupt.clone()])).await;

        service.set_locked().await;
        let report = service.submit_password(TEST_PASSWORD).await.unwrap();
        assert_eq!(report.failures.len(), 1);

        service.update_keyrings_network(Network::Testnet).await.unwrap();
        let vault = read_vault(&store, &cipher).await;
        assert_eq!(vault.len(), 2);
        assert_eq!(vault[1], corrupt);
    }

    /// Memory store whose writes to one key fail once armed
    struct FailingStore {
        inner: Arc<MemoryStore>,
        fail_key: std::sync::Mutex<Option<&'static str>>,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
            if *self.fail_key.lock().unwrap() == Some(key) {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_failed_switch_changes_nothing() {
        let inner = Arc::new(MemoryStore::new());
        let store = Arc::new(FailingStore {
            inner: inner.clone(),
            fail_key: std::sync::Mutex::new(None),
        });
        let cipher = cipher();
        let service = open(store.clone(), cipher.clone()).await;
        service.boot(TEST_PASSWORD).await.unwrap();
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        service
            .import_private_key(KEY_ONE_WIF, AddressType::P2wpkh, None)
            .await
            .unwrap();
        let before = service.snapshot().await.unwrap();
        let vault_before = read_vault(&inner, &cipher).await;

        // The vault write fails
        *store.fail_key.lock().unwrap() = Some(KEYRING_STATE_KEY);
        assert!(matches!(
            service.update_keyrings_network(Network::Testnet).await,
            Err(VaultError::Storage(_))
        ));

        // The vault write lands but the preferences write fails
        *store.fail_key.lock().unwrap() = Some(PREFERENCES_KEY);
        assert!(matches!(
            service.update_keyrings_network(Network::Testnet).await,
            Err(VaultError::Storage(_))
        ));

        *store.fail_key.lock().unwrap() = None;
        let after = service.snapshot().await.unwrap();
        assert_eq!(after.network, Network::Mainnet);
        assert_eq!(service.network().await, Network::Mainnet);
        for (a, b) in before.keyrings.iter().zip(&after.keyrings) {
            assert_eq!(a.accounts, b.accounts);
        }
        assert_eq!(read_vault(&inner, &cipher).await, vault_before);

        // A fresh unlock still sees the mainnet wallet
        service.set_locked().await;
        service.submit_password(TEST_PASSWORD).await.unwrap();
        assert_eq!(service.snapshot().await.unwrap().keyrings[0].accounts, before.keyrings[0].accounts);
    }
}

// ============================================================================
// Duplication Tests
// ============================================================================

mod duplication {
    use super::*;

    /// Vault holding the same HD wallet twice (as an older vault could) and
    /// two single keys sharing a quantum key
    async fn vault_with_conflicts() -> (KeyringService, Arc<MemoryStore>, Arc<PasswordCipher>) {
        let (service, store, cipher) = booted().await;
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        let entry = service.export_keyrings().await.unwrap().remove(0).1;
        service.append_restored_keyring(entry).await.unwrap();

        let q = "33".repeat(32);
        service
            .append_restored_keyring(simple_entry(&key_hex(8), Some(&q)))
            .await
            .unwrap();
        service
            .append_restored_keyring(simple_entry(&key_hex(9), Some(&q)))
            .await
            .unwrap();
        (service, store, cipher)
    }

    #[tokio::test]
    async fn test_detection() {
        let (service, _, _) = vault_with_conflicts().await;
        let snapshot = service.snapshot().await.unwrap();
        let detector = DuplicationDetector::new();

        let conflicts = detector.detect(&snapshot);
        assert_eq!(conflicts.len(), 3);

        assert_eq!(conflicts[0].conflict_type, ConflictType::WalletDuplicate);
        assert_eq!(conflicts[0].keyring_indexes(), vec![0, 1]);
        // The duplicated HD wallet also shares its first quantum key
        assert_eq!(conflicts[1].conflict_type, ConflictType::MldsaDuplicate);
        assert_eq!(conflicts[1].keyring_indexes(), vec![0, 1]);
        assert_eq!(conflicts[2].conflict_type, ConflictType::MldsaDuplicate);
        assert_eq!(conflicts[2].keyring_indexes(), vec![2, 3]);

        // Deterministic across runs and snapshots
        assert_eq!(conflicts, detector.detect(&service.snapshot().await.unwrap()));

        // Reports carry fingerprints only
        let report = serde_json::to_string(&detector.detect_with_on_chain(&snapshot).await).unwrap();
        assert!(!report.contains("abandon"));
        assert!(!report.contains(&key_hex(8)));
        assert!(!report.contains(&"33".repeat(32)));
    }

    #[tokio::test]
    async fn test_backup_isolation() {
        let (service, store, cipher) = vault_with_conflicts().await;
        let backup = DuplicationBackup::new(store.clone(), cipher.clone());
        let original = all_pubkeys(&service).await;
        let conflicts = DuplicationDetector::new().detect(&service.snapshot().await.unwrap());

        backup
            .create_backup(&service, TEST_PASSWORD, &conflicts)
            .await
            .unwrap();

        // Losing the vault leaves the backup readable
        store.remove(KEYRING_STATE_KEY).await.unwrap();
        let restored = backup.get_backup(TEST_PASSWORD).await.unwrap();
        assert_eq!(restored.keyrings.len(), 4);
        assert_eq!(restored.conflicts, conflicts);

        // Each entry carries its derived metadata alongside the raw data
        let hd = &restored.keyrings[0];
        assert_eq!(hd.index, 0);
        assert_eq!(hd.keyring_type, KeyringType::Hd);
        assert_eq!(hd.address_type, AddressType::P2wpkh);
        assert_eq!(hd.alias, "HD Wallet #1");
        assert_eq!(hd.accounts.len(), 1);
        assert_eq!(hd.accounts[0].index, 0);
        assert_eq!(hd.accounts[0].address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert!(hd.accounts[0].quantum_public_key_hash.is_some());

        let single = &restored.keyrings[2];
        assert_eq!(single.keyring_type, KeyringType::Simple);
        assert_eq!(single.accounts.len(), 1);
        assert_eq!(single.accounts[0].pubkey, original[2]);
        assert_eq!(
            single.accounts[0].quantum_public_key_hash,
            restored.keyrings[3].accounts[0].quantum_public_key_hash
        );
        assert!(matches!(
            backup.get_backup("wrong password").await,
            Err(VaultError::IncorrectPassword)
        ));

        // And losing the backup leaves the vault alone
        let (service, store, cipher) = vault_with_conflicts().await;
        let backup = DuplicationBackup::new(store.clone(), cipher.clone());
        backup.create_backup(&service, TEST_PASSWORD, &[]).await.unwrap();
        backup.clear_backup().await.unwrap();
        assert!(!backup.has_backup().await.unwrap());
        assert_eq!(read_vault(&store, &cipher).await.len(), 4);
    }

    #[tokio::test]
    async fn test_backup_file_roundtrip() {
        let (service, store, cipher) = vault_with_conflicts().await;
        let backup = DuplicationBackup::new(store.clone(), cipher.clone());
        assert!(matches!(
            backup.export_backup_to_file(TEST_PASSWORD).await,
            Err(VaultError::NoBackup)
        ));

        backup.create_backup(&service, TEST_PASSWORD, &[]).await.unwrap();
        assert!(matches!(
            backup.export_backup_to_file("wrong password").await,
            Err(VaultError::IncorrectPassword)
        ));
        let file = backup.export_backup_to_file(TEST_PASSWORD).await.unwrap();

        let envelope: Value = serde_json::from_str(&file).unwrap();
        assert_eq!(envelope["type"], "opwallet-duplication-backup");
        assert_eq!(envelope["version"], 1);
        assert!(!file.contains("abandon"));

        // Import into a separate store
        let other = DuplicationBackup::new(Arc::new(MemoryStore::new()), cipher.clone());
        assert!(matches!(
            other.import_backup_from_file(&file, "wrong password").await,
            Err(VaultError::IncorrectPassword)
        ));
        let bad_type = file.replace("opwallet-duplication-backup", "something-else");
        assert!(matches!(
            other.import_backup_from_file(&bad_type, TEST_PASSWORD).await,
            Err(VaultError::InvalidBackupFormat(_))
        ));
        assert!(matches!(
            other.import_backup_from_file("not json", TEST_PASSWORD).await,
            Err(VaultError::InvalidBackupFormat(_))
        ));
        assert!(!other.has_backup().await.unwrap());

        let imported = other.import_backup_from_file(&file, TEST_PASSWORD).await.unwrap();
        assert_eq!(imported.keyrings.len(), 4);
        assert!(other.has_backup().await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_then_restore() {
        let (service, store, cipher) = vault_with_conflicts().await;
        let backup = DuplicationBackup::new(store.clone(), cipher.clone());
        let original = all_pubkeys(&service).await;
        let conflicts = DuplicationDetector::new().detect(&service.snapshot().await.unwrap());

        // Resolution needs a backup
        assert!(matches!(
            resolve_conflict(&service, &backup, &conflicts[0], 0, TEST_PASSWORD).await,
            Err(VaultError::NoBackup)
        ));
        backup
            .create_backup(&service, TEST_PASSWORD, &conflicts)
            .await
            .unwrap();

        // Keeping a keyring outside the conflict is refused
        assert!(resolve_conflict(&service, &backup, &conflicts[2], 0, TEST_PASSWORD)
            .await
            .is_err());

        // Two distinct single keys sharing a quantum key: both stay, the
        // one not kept loses the quantum key
        let quantum_before = service.quantum_public_key(3).await.unwrap();
        let report = resolve_conflict(&service, &backup, &conflicts[2], 3, TEST_PASSWORD)
            .await
            .unwrap();
        assert_eq!(
            report,
            ResolutionReport {
                removed: vec![],
                quantum_reset: vec![2],
            }
        );
        assert!(!backup.has_backup().await.unwrap());
        assert_eq!(service.keyring_count().await.unwrap(), 4);
        assert_eq!(all_pubkeys(&service).await, original);
        assert!(service.quantum_public_key(2).await.unwrap().is_none());
        assert_eq!(service.quantum_public_key(3).await.unwrap(), quantum_before);

        // The same wallet twice: the copy goes
        let conflicts = DuplicationDetector::new().detect(&service.snapshot().await.unwrap());
        assert_eq!(conflicts.len(), 2);
        backup
            .create_backup(&service, TEST_PASSWORD, &conflicts)
            .await
            .unwrap();
        let report = resolve_conflict(&service, &backup, &conflicts[0], 0, TEST_PASSWORD)
            .await
            .unwrap();
        assert_eq!(report.removed, vec![1]);
        assert!(report.quantum_reset.is_empty());
        assert_eq!(service.keyring_count().await.unwrap(), 3);
        assert!(DuplicationDetector::new()
            .detect(&service.snapshot().await.unwrap())
            .is_empty());

        // Restoring from an exported copy brings back every keyring
        backup
            .create_backup(&service, TEST_PASSWORD, &[])
            .await
            .unwrap();
        service.remove_keyring(0).await.unwrap();
        let report = backup
            .restore_from_backup(&service, TEST_PASSWORD)
            .await
            .unwrap();
        assert_eq!(report.restored, 3);
        assert!(report.errors.is_empty());
        assert_eq!(service.keyring_count().await.unwrap(), 3);

        let mut expected = original.clone();
        expected.remove(1);
        assert_eq!(all_pubkeys(&service).await, expected);
        assert!(service.quantum_public_key(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_never_removes_distinct_hd_wallet() {
        let (service, store, cipher) = booted().await;
        service
            .create_keyring_with_mnemonics(TEST_MNEMONIC, "", AddressType::P2wpkh, 1)
            .await
            .unwrap();
        // A single key carrying the HD wallet's quantum key
        let seed = service.export_quantum_private_key(0).await.unwrap();
        service
            .append_restored_keyring(simple_entry(&key_hex(5), Some(seed.as_str())))
            .await
            .unwrap();

        let conflicts = DuplicationDetector::new().detect(&service.snapshot().await.unwrap());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::MldsaDuplicate);

        let backup = DuplicationBackup::new(store.clone(), cipher.clone());
        backup
            .create_backup(&service, TEST_PASSWORD, &conflicts)
            .await
            .unwrap();
        let before = service.snapshot().await.unwrap();

        // The HD wallet cannot give up its derived quantum key
        assert!(matches!(
            resolve_conflict(&service, &backup, &conflicts[0], 1, TEST_PASSWORD).await,
            Err(VaultError::UnsupportedOperation(_))
        ));
        assert!(backup.has_backup().await.unwrap());
        let after = service.snapshot().await.unwrap();
        assert_eq!(after.keyrings.len(), 2);
        assert_eq!(after.keyrings[1].quantum_fingerprint, before.keyrings[1].quantum_fingerprint);

        let report = resolve_conflict(&service, &backup, &conflicts[0], 0, TEST_PASSWORD)
            .await
            .unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.quantum_reset, vec![1]);
        assert_eq!(service.keyring_count().await.unwrap(), 2);
        assert!(service.quantum_public_key(1).await.unwrap().is_none());
        assert!(service.quantum_public_key(0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restore_needs_the_backup_password() {
        let (service, store, cipher) = vault_with_conflicts().await;
        let backup = DuplicationBackup::new(store.clone(), cipher.clone());
        backup.create_backup(&service, TEST_PASSWORD, &[]).await.unwrap();

        // The stored backup keeps the password it was made under
        service
            .change_password(TEST_PASSWORD, "a-new-password")
            .await
            .unwrap();
        assert!(matches!(
            backup.restore_from_backup(&service, "a-new-password").await,
            Err(VaultError::IncorrectPassword)
        ));
        assert_eq!(service.keyring_count().await.unwrap(), 4);

        let report = backup
            .restore_from_backup(&service, TEST_PASSWORD)
            .await
            .unwrap();
        assert_eq!(report.restored, 4);
    }

    #[tokio::test]
    async fn test_restore_reports_bad_entries() {
        let (service, store, cipher) = booted().await;
        service
            .import_private_key(&key_hex(1), AddressType::P2wpkh, None)
            .await
            .unwrap();
        let backup = DuplicationBackup::new(store.clone(), cipher.clone());
        backup.create_backup(&service, TEST_PASSWORD, &[]).await.unwrap();

        // Corrupt one backed-up entry by importing a doctored backup
        let mut contents = backup.get_backup(TEST_PASSWORD).await.unwrap();
        contents.keyrings.push(BackupKeyringData {
            index: 1,
            keyring_type: KeyringType::Simple,
            address_type: AddressType::P2wpkh,
            alias: "Broken".into(),
            accounts: vec![],
            entry: json!({"type": "SimpleKeyring", "data": {"privateKey": "zz"}}),
        });
        let plaintext = serde_json::to_vec(&contents).unwrap();
        let file = json!({
            "type": "opwallet-duplication-backup",
            "version": 1,
            "encrypted": cipher.encrypt(TEST_PASSWORD, &plaintext).await.unwrap(),
        });
        backup
            .import_backup_from_file(&file.to_string(), TEST_PASSWORD)
            .await
            .unwrap();

        let report = backup
            .restore_from_backup(&service, TEST_PASSWORD)
            .await
            .unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("keyring 1"));
        assert_eq!(service.keyring_count().await.unwrap(), 1);
    }
}
