//! Duplicate wallet handling
//!
//! Detection is read-only. Resolution is destructive and therefore gated
//! on an existing backup that opens with the vault password.

mod backup;
mod detection;
mod types;

pub use backup::{DuplicationBackup, BACKUP_FILE_TYPE, BACKUP_VERSION};
pub use detection::DuplicationDetector;
pub use types::{
    Backup, BackupAccount, BackupKeyringData, ConflictResolution, ConflictType,
    DuplicateWalletInfo, DuplicationConflict, DuplicationReport, OnChainLinkage,
    ResolutionReport, RestoreReport,
};

use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use crate::error::{Result, VaultError};
use crate::keyring::KeyringType;
use crate::service::{KeyringService, VaultSnapshot};

/// Resolve one conflict by keeping `keep_index`.
///
/// Keyrings holding the same secret as the kept one are removed. Other
/// keyrings that only share its quantum key lose that key instead; they
/// are never removed.
pub async fn resolve_conflict(
    service: &KeyringService,
    backup: &DuplicationBackup,
    conflict: &DuplicationConflict,
    keep_index: usize,
    password: &str,
) -> Result<ResolutionReport> {
    let resolution = ConflictResolution {
        conflict: conflict.clone(),
        keep_index,
    };
    resolve_conflicts(service, backup, &[resolution], password).await
}

/// Plan for one conflict member that is not kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberAction {
    /// Same secret as the kept keyring
    Remove,
    /// Distinct wallet sharing the kept keyring's quantum key; `regenerate`
    /// when its address type cannot do without one
    ResetQuantum { regenerate: bool },
}

/// Work out what happens to every non-kept member of `resolution`.
fn plan_resolution(
    snapshot: &VaultSnapshot,
    resolution: &ConflictResolution,
    plan: &mut BTreeMap<usize, MemberAction>,
) -> Result<()> {
    let conflict = &resolution.conflict;
    let keep = conflict
        .wallets
        .iter()
        .find(|w| w.keyring_index == resolution.keep_index)
        .ok_or_else(|| {
            VaultError::UnsupportedOperation(format!(
                "keyring {} is not part of conflict {}",
                resolution.keep_index, conflict.conflict_id
            ))
        })?;

    for wallet in &conflict.wallets {
        let current = snapshot
            .keyrings
            .get(wallet.keyring_index)
            .ok_or(VaultError::KeyringNotFound(wallet.keyring_index))?;
        if current.wallet_fingerprint.as_deref() != Some(wallet.private_key_hash.as_str()) {
            return Err(VaultError::UnsupportedOperation(format!(
                "conflict {} no longer matches keyring {}",
                conflict.conflict_id, wallet.keyring_index
            )));
        }
        if wallet.keyring_index == resolution.keep_index {
            continue;
        }

        let action = if wallet.private_key_hash == keep.private_key_hash {
            MemberAction::Remove
        } else if current.keyring_type == KeyringType::Simple {
            MemberAction::ResetQuantum {
                regenerate: current.address_type.requires_quantum_key(),
            }
        } else {
            return Err(VaultError::UnsupportedOperation(format!(
                "keyring {} derives its quantum key and is a different wallet; keep it instead",
                wallet.keyring_index
            )));
        };

        // Removal wins over a reset planned by another conflict
        let entry = plan.entry(wallet.keyring_index).or_insert(action);
        if action == MemberAction::Remove {
            *entry = MemberAction::Remove;
        }
    }
    Ok(())
}

/// Resolve several conflicts from the same detection pass.
///
/// Every conflict must still describe the current keyrings, and the whole
/// plan is validated before anything changes. Quantum keys are reset
/// first, then duplicates are removed highest index first so the remaining
/// indexes stay valid. The backup is cleared once every step succeeded.
pub async fn resolve_conflicts(
    service: &KeyringService,
    backup: &DuplicationBackup,
    resolutions: &[ConflictResolution],
    password: &str,
) -> Result<ResolutionReport> {
    service.verify_password(password).await?;
    if !backup.has_backup().await? {
        return Err(VaultError::NoBackup);
    }
    backup.get_backup(password).await?;

    let snapshot = service.snapshot().await?;
    let mut plan = BTreeMap::new();
    for resolution in resolutions {
        plan_resolution(&snapshot, resolution, &mut plan)?;
    }

    let kept: BTreeSet<usize> = resolutions.iter().map(|r| r.keep_index).collect();
    if let Some(index) = kept
        .iter()
        .find(|i| plan.get(i) == Some(&MemberAction::Remove))
    {
        return Err(VaultError::UnsupportedOperation(format!(
            "keyring {} is both kept and removed",
            index
        )));
    }

    let mut report = ResolutionReport::default();
    for (&index, action) in &plan {
        if let MemberAction::ResetQuantum { regenerate } = *action {
            if regenerate {
                service.generate_fresh_quantum_key(index).await?;
            } else {
                service.clear_quantum_key(index).await?;
            }
            report.quantum_reset.push(index);
        }
    }

    report.removed = plan
        .iter()
        .filter(|(_, action)| **action == MemberAction::Remove)
        .map(|(&index, _)| index)
        .rev()
        .collect();
    for &index in &report.removed {
        service.remove_keyring(index).await?;
    }

    backup.clear_backup().await?;
    info!(
        "Resolved {} conflict(s): removed {} keyring(s), reset {} quantum key(s)",
        resolutions.len(),
        report.removed.len(),
        report.quantum_reset.len()
    );
    Ok(report)
}
