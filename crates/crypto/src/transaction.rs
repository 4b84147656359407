use crate::ecdsa::{EcdsaError, KeyPair};
use multifaucet_common::Address;
use rlp::RlpStream;

/// Gas limit of a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Pre-EIP-2718 transaction, signed with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: [u8; 32],
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash))
    }
}

/// Big-endian bytes without leading zeros, the canonical RLP integer form.
fn trimmed(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

impl LegacyTransaction {
    pub fn transfer(nonce: u64, gas_price: u128, to: Address, value: u128, chain_id: u64) -> Self {
        Self {
            nonce,
            gas_price,
            gas_limit: TRANSFER_GAS_LIMIT,
            to,
            value,
            data: Vec::new(),
            chain_id,
        }
    }

    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&trimmed(&self.gas_price.to_be_bytes()));
        stream.append(&self.gas_limit);
        stream.append(&self.to.0.to_vec());
        stream.append(&trimmed(&self.value.to_be_bytes()));
        stream.append(&self.data);
    }

    /// RLP of `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        stream.out().to_vec()
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak_hash::keccak(self.signing_payload()).0
    }

    pub fn sign(&self, key: &KeyPair) -> Result<SignedTransaction, EcdsaError> {
        let digest = self.signing_hash();
        let (signature, recovery_id) = key.sign_prehash(&digest)?;
        let v = u64::from(recovery_id.to_byte()) + 35 + self.chain_id * 2;
        let (r, s) = signature.split_bytes();

        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&v);
        stream.append(&trimmed(&r));
        stream.append(&trimmed(&s));

        let raw = stream.out().to_vec();
        let hash = keccak_hash::keccak(&raw).0;
        Ok(SignedTransaction { raw, hash })
    }
}
