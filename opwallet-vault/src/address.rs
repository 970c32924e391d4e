//! Address types and address encoding
//!
//! Each keyring carries an [`AddressType`] which decides both the HD
//! derivation purpose and how account public keys are rendered as
//! addresses.

use bech32::{ToBase32, Variant};
use opw_crypto_secp256k1::{hash160, taproot_output_key};
use serde::{de, Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VaultError};
use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum AddressType {
    #[serde(rename = "P2PKH")]
    P2pkh,
    #[default]
    #[serde(rename = "P2WPKH")]
    P2wpkh,
    #[serde(rename = "P2TR")]
    P2tr,
    #[serde(rename = "P2SH_P2WPKH")]
    P2shP2wpkh,
    #[serde(rename = "M44_P2WPKH")]
    M44P2wpkh,
    #[serde(rename = "M44_P2TR")]
    M44P2tr,
    /// Quantum-resistant witness output committing to an ML-DSA key
    #[serde(rename = "P2QRH")]
    P2qrh,
}

impl AddressType {
    pub const ALL: [AddressType; 7] = [
        AddressType::P2pkh,
        AddressType::P2wpkh,
        AddressType::P2tr,
        AddressType::P2shP2wpkh,
        AddressType::M44P2wpkh,
        AddressType::M44P2tr,
        AddressType::P2qrh,
    ];

    /// Map the numeric encoding used by older vaults.
    pub fn from_legacy_index(index: u64) -> Option<Self> {
        match index {
            0 => Some(AddressType::P2pkh),
            1 => Some(AddressType::P2wpkh),
            2 => Some(AddressType::P2tr),
            3 => Some(AddressType::P2shP2wpkh),
            4 => Some(AddressType::M44P2wpkh),
            5 => Some(AddressType::M44P2tr),
            _ => None,
        }
    }

    /// BIP-43 purpose of the HD derivation path
    pub fn purpose(&self) -> u32 {
        match self {
            AddressType::P2pkh => 44,
            AddressType::P2wpkh => 84,
            AddressType::P2tr => 86,
            AddressType::P2shP2wpkh => 49,
            AddressType::M44P2wpkh | AddressType::M44P2tr | AddressType::P2qrh => 44,
        }
    }

    pub fn requires_quantum_key(&self) -> bool {
        matches!(self, AddressType::P2qrh)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AddressType::P2pkh => "P2PKH",
            AddressType::P2wpkh => "P2WPKH",
            AddressType::P2tr => "P2TR",
            AddressType::P2shP2wpkh => "P2SH_P2WPKH",
            AddressType::M44P2wpkh => "M44_P2WPKH",
            AddressType::M44P2tr => "M44_P2TR",
            AddressType::P2qrh => "P2QRH",
        }
    }

    /// Render an account as an address.
    ///
    /// `public_key` is the 33-byte compressed secp256k1 key. P2QRH outputs
    /// commit to `quantum_public_key` instead and fail without one.
    pub fn to_address(
        &self,
        network: Network,
        public_key: &[u8; 33],
        quantum_public_key: Option<&[u8]>,
    ) -> Result<String> {
        match self {
            AddressType::P2pkh => Ok(base58_address(network.p2pkh_version(), &hash160(public_key))),
            AddressType::P2shP2wpkh => {
                let mut redeem_script = Vec::with_capacity(22);
                redeem_script.extend_from_slice(&[0x00, 0x14]);
                redeem_script.extend_from_slice(&hash160(public_key));
                Ok(base58_address(network.p2sh_version(), &hash160(&redeem_script)))
            }
            AddressType::P2wpkh | AddressType::M44P2wpkh => {
                segwit_address(network, 0, &hash160(public_key))
            }
            AddressType::P2tr | AddressType::M44P2tr => {
                let mut x_only = [0u8; 32];
                x_only.copy_from_slice(&public_key[1..]);
                let output_key = taproot_output_key(&x_only)?;
                segwit_address(network, 1, &output_key)
            }
            AddressType::P2qrh => {
                let quantum_public_key = quantum_public_key.ok_or_else(|| {
                    VaultError::Address("P2QRH requires a quantum public key".into())
                })?;
                let program: [u8; 32] = Sha256::digest(quantum_public_key).into();
                segwit_address(network, 3, &program)
            }
        }
    }
}

fn base58_address(version: u8, payload: &[u8; 20]) -> String {
    let mut data = Vec::with_capacity(21);
    data.push(version);
    data.extend_from_slice(payload);
    bs58::encode(data).with_check().into_string()
}

fn segwit_address(network: Network, version: u8, program: &[u8]) -> Result<String> {
    let variant = if version == 0 {
        Variant::Bech32
    } else {
        Variant::Bech32m
    };

    let mut data =
        vec![bech32::u5::try_from_u8(version).map_err(|e| VaultError::Address(e.to_string()))?];
    data.extend(program.to_base32());

    bech32::encode(network.bech32_hrp(), data, variant)
        .map_err(|e| VaultError::Address(e.to_string()))
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AddressType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        AddressType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| format!("unknown address type: {}", s))
    }
}

impl<'de> Deserialize<'de> for AddressType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Legacy(u64),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Legacy(index) => AddressType::from_legacy_index(index)
                .ok_or_else(|| de::Error::custom(format!("unknown legacy address type {}", index))),
            Repr::Name(name) => name.parse().map_err(de::Error::custom),
        }
    }
}
