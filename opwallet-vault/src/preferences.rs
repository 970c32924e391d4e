//! Keyring preferences
//!
//! Non-secret, index-keyed settings kept next to the vault: the selected
//! keyring, keyring and account aliases, account flags and the active
//! network. Keyring aliases are keyed `keyring_<index>` and must be
//! re-keyed whenever a keyring is removed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::network::Network;

/// Key of keyring `index` in the alias map
pub fn keyring_key(index: usize) -> String {
    format!("keyring_{}", index)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default)]
    pub current_keyring_index: usize,
    #[serde(default)]
    pub keyring_aliases: BTreeMap<String, String>,
    /// Keyed by account public key
    #[serde(default)]
    pub account_aliases: BTreeMap<String, String>,
    /// Keyed by account public key
    #[serde(default)]
    pub account_flags: BTreeMap<String, u32>,
    #[serde(default)]
    pub network: Network,
}

impl Preferences {
    pub fn keyring_alias(&self, index: usize) -> Option<&str> {
        self.keyring_aliases.get(&keyring_key(index)).map(String::as_str)
    }

    pub fn set_keyring_alias(&mut self, index: usize, alias: impl Into<String>) {
        self.keyring_aliases.insert(keyring_key(index), alias.into());
    }

    pub fn account_alias(&self, public_key: &str) -> Option<&str> {
        self.account_aliases.get(public_key).map(String::as_str)
    }

    pub fn set_account_alias(&mut self, public_key: impl Into<String>, alias: impl Into<String>) {
        self.account_aliases.insert(public_key.into(), alias.into());
    }

    pub fn account_flag(&self, public_key: &str) -> u32 {
        self.account_flags.get(public_key).copied().unwrap_or(0)
    }

    /// Drop keyring `index` and shift every later alias down by one.
    /// `count` is the number of keyrings before removal.
    pub fn remove_keyring(&mut self, index: usize, count: usize) {
        self.keyring_aliases.remove(&keyring_key(index));
        for i in index + 1..count {
            if let Some(alias) = self.keyring_aliases.remove(&keyring_key(i)) {
                self.keyring_aliases.insert(keyring_key(i - 1), alias);
            }
        }

        if self.current_keyring_index == index {
            self.current_keyring_index = 0;
        } else if self.current_keyring_index > index {
            self.current_keyring_index -= 1;
        }
    }

    /// Forget per-account settings of accounts that no longer exist.
    pub fn retain_accounts(&mut self, public_keys: &[String]) {
        self.account_aliases.retain(|pk, _| public_keys.contains(pk));
        self.account_flags.retain(|pk, _| public_keys.contains(pk));
    }

    pub fn clear_keyrings(&mut self) {
        self.current_keyring_index = 0;
        self.keyring_aliases.clear();
        self.account_aliases.clear();
        self.account_flags.clear();
    }
}
