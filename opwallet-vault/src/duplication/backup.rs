//! Duplication backup
//!
//! Before conflicts are resolved, every keyring is copied into a backup
//! encrypted under its own storage key. The backup is independent of the
//! vault: losing either leaves the other readable. It can be exported to a
//! file envelope, imported back and restored destructively.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

use super::types::{Backup, BackupKeyringData, DuplicationConflict, RestoreReport};
use crate::cipher::Encryptor;
use crate::error::{Result, VaultError};
use crate::service::KeyringService;
use crate::storage::{KeyValueStore, DEFAULT_BACKUP_KEY};

/// `type` of an exported backup file
pub const BACKUP_FILE_TYPE: &str = "opwallet-duplication-backup";

pub const BACKUP_VERSION: u32 = 1;

/// Exported backup file; carries the ciphertext only
#[derive(Debug, Serialize, Deserialize)]
struct BackupFileEnvelope {
    #[serde(rename = "type")]
    file_type: String,
    version: u32,
    encrypted: String,
}

pub struct DuplicationBackup {
    store: Arc<dyn KeyValueStore>,
    cipher: Arc<dyn Encryptor>,
    storage_key: String,
}

impl DuplicationBackup {
    pub fn new(store: Arc<dyn KeyValueStore>, cipher: Arc<dyn Encryptor>) -> Self {
        Self::with_storage_key(store, cipher, DEFAULT_BACKUP_KEY)
    }

    pub fn with_storage_key(
        store: Arc<dyn KeyValueStore>,
        cipher: Arc<dyn Encryptor>,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            cipher,
            storage_key: storage_key.into(),
        }
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    async fn load_ciphertext(&self) -> Result<Option<String>> {
        match self.store.get(&self.storage_key).await? {
            Some(Value::String(ciphertext)) => Ok(Some(ciphertext)),
            Some(_) => Err(VaultError::InvalidBackupFormat("stored backup is not a string".into())),
            None => Ok(None),
        }
    }

    async fn open(&self, password: &str, ciphertext: &str) -> Result<Backup> {
        let plaintext = self
            .cipher
            .decrypt(password, ciphertext)
            .await
            .map_err(|_| VaultError::IncorrectPassword)?;
        let backup: Backup = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::InvalidBackupFormat(e.to_string()))?;
        if backup.version > BACKUP_VERSION {
            return Err(VaultError::InvalidBackupFormat(format!(
                "unsupported backup version {}",
                backup.version
            )));
        }
        Ok(backup)
    }

    /// Snapshot every keyring of the unlocked `service`, encrypted under
    /// `password`, replacing any previous backup.
    pub async fn create_backup(
        &self,
        service: &KeyringService,
        password: &str,
        conflicts: &[DuplicationConflict],
    ) -> Result<Backup> {
        service.verify_password(password).await?;

        let keyrings = service
            .export_keyrings()
            .await?
            .into_iter()
            .map(|(snapshot, entry)| BackupKeyringData::new(&snapshot, entry))
            .collect();
        let backup = Backup {
            version: BACKUP_VERSION,
            created_at: Utc::now(),
            keyrings,
            conflicts: conflicts.to_vec(),
        };

        let plaintext = Zeroizing::new(serde_json::to_vec(&backup)?);
        let ciphertext = self.cipher.encrypt(password, &plaintext).await?;
        self.store
            .set(&self.storage_key, Value::String(ciphertext))
            .await?;

        info!(
            "Backed up {} keyring(s) with {} conflict(s)",
            backup.keyrings.len(),
            backup.conflicts.len()
        );
        Ok(backup)
    }

    pub async fn has_backup(&self) -> Result<bool> {
        Ok(self.load_ciphertext().await?.is_some())
    }

    pub async fn get_backup(&self, password: &str) -> Result<Backup> {
        let ciphertext = self.load_ciphertext().await?.ok_or(VaultError::NoBackup)?;
        self.open(password, &ciphertext).await
    }

    /// File contents for the stored backup. The password is checked by a
    /// trial decryption; the file itself holds ciphertext only.
    pub async fn export_backup_to_file(&self, password: &str) -> Result<String> {
        let ciphertext = self.load_ciphertext().await?.ok_or(VaultError::NoBackup)?;
        self.open(password, &ciphertext).await?;

        let envelope = BackupFileEnvelope {
            file_type: BACKUP_FILE_TYPE.to_string(),
            version: BACKUP_VERSION,
            encrypted: ciphertext,
        };
        Ok(serde_json::to_string_pretty(&envelope)?)
    }

    /// Validate an exported file against `password` and store it as the
    /// current backup.
    pub async fn import_backup_from_file(&self, content: &str, password: &str) -> Result<Backup> {
        let envelope: BackupFileEnvelope = serde_json::from_str(content)
            .map_err(|e| VaultError::InvalidBackupFormat(e.to_string()))?;
        if envelope.file_type != BACKUP_FILE_TYPE {
            return Err(VaultError::InvalidBackupFormat(format!(
                "unexpected file type {:?}",
                envelope.file_type
            )));
        }
        if envelope.version > BACKUP_VERSION {
            return Err(VaultError::InvalidBackupFormat(format!(
                "unsupported file version {}",
                envelope.version
            )));
        }

        let backup = self.open(password, &envelope.encrypted).await?;
        self.store
            .set(&self.storage_key, Value::String(envelope.encrypted))
            .await?;

        info!("Imported backup of {} keyring(s)", backup.keyrings.len());
        Ok(backup)
    }

    /// Replace every keyring of `service` with the backed-up ones.
    ///
    /// Entries are restored one by one without duplicate checks; failures
    /// are collected and do not stop the restore.
    pub async fn restore_from_backup(&self, service: &KeyringService, password: &str) -> Result<RestoreReport> {
        let backup = self.get_backup(password).await?;
        if !service.is_unlocked().await {
            return Err(VaultError::Locked);
        }

        service.clear_keyrings().await?;

        let mut report = RestoreReport::default();
        for keyring in backup.keyrings {
            match service.append_restored_keyring(keyring.entry).await {
                Ok(_) => report.restored += 1,
                Err(e) => {
                    warn!("Backup keyring {} could not be restored: {}", keyring.index, e);
                    report.errors.push(format!("keyring {}: {}", keyring.index, e));
                }
            }
        }

        info!(
            "Restored {} keyring(s) from backup, {} failed",
            report.restored,
            report.errors.len()
        );
        Ok(report)
    }

    pub async fn clear_backup(&self) -> Result<()> {
        self.store.remove(&self.storage_key).await?;
        info!("Duplication backup cleared");
        Ok(())
    }
}
