use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use multifaucet_common::Address;
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EcdsaError {
    #[error("Invalid Hex String")]
    HexError(#[from] hex::FromHexError),
    #[error("Invalid Key")]
    KeyError,
    #[error("Signing failed: {0}")]
    SigningFailed(String),
    #[error("Public key recovery failed")]
    RecoveryFailed,
}

/// secp256k1 signing identity with its derived account address.
pub struct KeyPair {
    signing_key: SigningKey,
    address: Address,
}

impl KeyPair {
    pub fn random() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Accepts 64 hex digits, with or without a `0x` prefix.
    pub fn from_private_key_hex(hex_str: &str) -> Result<Self, EcdsaError> {
        let hex_str = hex_str.trim();
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        Self::from_private_key_bytes(&hex::decode(hex_str)?)
    }

    pub fn from_private_key_bytes(bytes: &[u8]) -> Result<Self, EcdsaError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| EcdsaError::KeyError)?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = public_key_to_address(signing_key.verifying_key());
        Self { signing_key, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }

    /// Signs a 32-byte digest, returning a low-s signature and its recovery id.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<(Signature, RecoveryId), EcdsaError> {
        self.signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| EcdsaError::SigningFailed(e.to_string()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({})", self.address)
    }
}

/// Ethereum address: last 20 bytes of keccak256 over the uncompressed point
/// without its `0x04` tag.
pub fn public_key_to_address(public_key: &VerifyingKey) -> Address {
    let encoded = public_key.to_encoded_point(false);
    let hash = keccak_hash::keccak(&encoded.as_bytes()[1..]);
    Address::from_slice(&hash.0[12..])
}

pub fn recover_address(
    digest: &[u8; 32],
    signature: &Signature,
    recovery_id: RecoveryId,
) -> Result<Address, EcdsaError> {
    let key = VerifyingKey::recover_from_prehash(digest, signature, recovery_id)
        .map_err(|_| EcdsaError::RecoveryFailed)?;
    Ok(public_key_to_address(&key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_address_derivation() {
        let pair = KeyPair::from_private_key_hex(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(pair.address().to_string(), "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");

        let pair = KeyPair::from_private_key_hex(
            "4646464646464646464646464646464646464646464646464646464646464646",
        )
        .unwrap();
        assert_eq!(pair.address().to_string(), "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f");
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(KeyPair::from_private_key_hex("0xzz"), Err(EcdsaError::HexError(_))));
        assert!(matches!(KeyPair::from_private_key_hex("0x0102"), Err(EcdsaError::KeyError)));
        assert!(matches!(
            KeyPair::from_private_key_hex(&"00".repeat(32)),
            Err(EcdsaError::KeyError)
        ));
    }

    #[test]
    fn test_sign_and_recover() {
        let pair = KeyPair::random();
        let digest = keccak_hash::keccak(b"hello world").0;
        let (signature, recovery_id) = pair.sign_prehash(&digest).unwrap();

        assert!(signature.normalize_s().is_none(), "signature must be low-s");
        assert_eq!(recover_address(&digest, &signature, recovery_id).unwrap(), pair.address());
    }

    #[test]
    fn test_debug_hides_secret() {
        let pair = KeyPair::random();
        let debug = format!("{:?}", pair);
        assert!(!debug.contains(&hex::encode(pair.private_key_bytes())));
    }
}
