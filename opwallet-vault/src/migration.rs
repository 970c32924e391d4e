//! Vault plaintext decoding and legacy entry detection
//!
//! Older vaults use display names for keyring types, numeric address types
//! and a few legacy data fields. Those are accepted on read by the entry
//! and keyring deserializers; this module only decides, per entry, whether
//! it decoded and whether it was in a legacy form. Legacy entries are
//! rewritten in the current form by the next successful persist.

use serde_json::Value;

use crate::error::{Result, VaultError};
use crate::keyring::{KeyringType, SavedVaultEntry};

/// One element of the decrypted vault array
#[derive(Debug)]
pub struct DecodedEntry {
    /// The element as stored
    pub raw: Value,
    pub entry: Result<SavedVaultEntry>,
    pub legacy: bool,
}

/// Decode decrypted vault plaintext into its entries, in keyring order.
///
/// A malformed element does not fail the whole vault; only a plaintext that
/// is not a JSON array does.
pub fn decode_vault(plaintext: &[u8]) -> Result<Vec<DecodedEntry>> {
    let value: Value = serde_json::from_slice(plaintext)
        .map_err(|e| VaultError::Deserialization(format!("vault: {}", e)))?;
    let Value::Array(elements) = value else {
        return Err(VaultError::Deserialization("vault is not a list of keyrings".into()));
    };

    Ok(elements.into_iter().map(decode_entry).collect())
}

pub fn decode_entry(raw: Value) -> DecodedEntry {
    let legacy = is_legacy(&raw);
    let entry = serde_json::from_value::<SavedVaultEntry>(raw.clone())
        .map_err(|e| VaultError::Deserialization(e.to_string()));
    DecodedEntry { raw, entry, legacy }
}

fn is_legacy(raw: &Value) -> bool {
    let canonical_type = raw
        .get("type")
        .and_then(Value::as_str)
        .map(|t| [KeyringType::Hd, KeyringType::Simple, KeyringType::Empty].iter().any(|k| k.name() == t))
        .unwrap_or(false);

    let numeric_address_type = raw.get("addressType").map(Value::is_number).unwrap_or(false);

    let legacy_data = match raw.get("data") {
        Some(Value::Array(_)) => true,
        Some(Value::Object(data)) => data.contains_key("hdPath") || data.contains_key("numberOfAccounts"),
        _ => false,
    };

    !canonical_type || numeric_address_type || legacy_data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressType;
    use serde_json::json;

    #[test]
    fn test_current_form_is_not_legacy() {
        let entry = json!({"type": "HdKeyring", "data": {"mnemonic": "x"}, "addressType": "P2TR"});
        let decoded = decode_entry(entry);
        assert!(!decoded.legacy);
        assert_eq!(decoded.entry.unwrap().address_type, AddressType::P2tr);
    }

    #[test]
    fn test_legacy_forms() {
        for raw in [
            json!({"type": "HD Key Tree", "data": {}, "addressType": "P2WPKH"}),
            json!({"type": "HdKeyring", "data": {}, "addressType": 2}),
            json!({"type": "HdKeyring", "data": {"hdPath": "m/44'/0'/0'/0"}, "addressType": "P2PKH"}),
            json!({"type": "SimpleKeyring", "data": ["00"], "addressType": "P2PKH"}),
        ] {
            assert!(decode_entry(raw).legacy);
        }
    }

    #[test]
    fn test_bad_element_does_not_fail_vault() {
        let plaintext = serde_json::to_vec(&json!([
            {"type": "SimpleKeyring", "data": {"privateKey": "00"}, "addressType": "P2WPKH"},
            {"type": "Trezor", "data": {}},
            "garbage"
        ]))
        .unwrap();

        let decoded = decode_vault(&plaintext).unwrap();
        assert_eq!(decoded.len(), 3);
        assert!(decoded[0].entry.is_ok());
        assert!(decoded[1].entry.is_err());
        assert!(decoded[2].entry.is_err());
        assert_eq!(decoded[2].raw, json!("garbage"));
    }

    #[test]
    fn test_non_array_vault() {
        assert!(decode_vault(b"{\"type\":\"HdKeyring\"}").is_err());
        assert!(decode_vault(b"not json").is_err());
    }
}
