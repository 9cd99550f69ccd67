/// Transaction types for TChain
use crate::crypto::{hash, HashValue, Signer, TxSignature, HASH_LEN};
use crate::error::ChainError;
use crate::merkle::Encodable;
use serde::{Deserialize, Serialize};

/// Maximum payload size in bytes.
pub const TX_DATA_SIZE_LIMIT: usize = 1024;

/// An opaque payload, its claimed checksum and the signature over that checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub signature: Option<TxSignature>,
    pub hash: HashValue,
    pub data: Vec<u8>,
}

impl Transaction {
    /// Hashes `data` and signs the digest with `signer`.
    pub fn new<S: Signer>(data: Vec<u8>, signer: &S) -> Result<Self, ChainError> {
        let digest = hash(&data);
        let signature = signer.sign(&digest)?;
        Ok(Transaction {
            signature: Some(signature),
            hash: digest,
            data,
        })
    }
}

fn put_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

impl Encodable for Transaction {
    /// Signature presence tag, length-prefixed key and signature, the claimed
    /// hash, then the length-prefixed payload.
    fn bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 8 + 33 + 64 + HASH_LEN + 4 + self.data.len());
        match &self.signature {
            Some(sig) => {
                buf.push(1);
                put_len_prefixed(&mut buf, &sig.public_key);
                put_len_prefixed(&mut buf, &sig.signature);
            }
            None => buf.push(0),
        }
        buf.extend_from_slice(&self.hash);
        put_len_prefixed(&mut buf, &self.data);
        buf
    }
}
