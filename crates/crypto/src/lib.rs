//! Signing identities, encrypted key files and transaction signing for the
//! EVM networks the faucet pays out on.

pub mod ecdsa;
pub mod keyfile;
pub mod transaction;

pub use ecdsa::{public_key_to_address, recover_address, EcdsaError, KeyPair};
pub use keyfile::{decrypt_key, encrypt_key, load_key_file, read_password_file, KeyFile, KeyFileError};
pub use transaction::{LegacyTransaction, SignedTransaction};
