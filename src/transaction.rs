//! Transaction module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::verify_payload;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash, HashValue, KeyPair, Signer};
    use crate::error::ChainError;

    fn signed_parts(msg: &[u8]) -> (KeyPair, HashValue) {
        (KeyPair::generate(), hash(msg))
    }

    #[test]
    fn test_transaction_validation_table() {
        let msg = b"message to be hashed".to_vec();
        let (signer, checksum) = signed_parts(&msg);
        let sig = signer.sign(&checksum).unwrap();

        let mut invalid_sum = [0u8; 32];
        invalid_sum[5..].copy_from_slice(&checksum[..27]);
        let sig_over_wrong_message = signer.sign(&invalid_sum).unwrap();

        let table = vec![
            (Transaction::default(), Err(ChainError::EmptyData)),
            (
                Transaction {
                    signature: Some(sig.clone()),
                    hash: checksum,
                    data: Vec::new(),
                },
                Err(ChainError::EmptyData),
            ),
            (
                Transaction {
                    signature: None,
                    hash: checksum,
                    data: msg.clone(),
                },
                Err(ChainError::InvalidSignature),
            ),
            (
                Transaction {
                    signature: Some(sig_over_wrong_message.clone()),
                    hash: checksum,
                    data: msg.clone(),
                },
                Err(ChainError::InvalidSignature),
            ),
            (
                Transaction {
                    signature: Some(sig.clone()),
                    hash: [0u8; 32],
                    data: msg.clone(),
                },
                Err(ChainError::InvalidChecksum),
            ),
            (
                Transaction {
                    signature: Some(sig_over_wrong_message),
                    hash: invalid_sum,
                    data: msg.clone(),
                },
                Err(ChainError::InvalidChecksum),
            ),
            (
                Transaction {
                    signature: Some(sig),
                    hash: checksum,
                    data: msg,
                },
                Ok(()),
            ),
        ];

        for (i, (tx, expected)) in table.into_iter().enumerate() {
            assert_eq!(tx.verify(), expected, "table entry #{}", i);
        }
    }

    #[test]
    fn test_new_transaction_verifies() {
        let keypair = KeyPair::generate();
        let tx = Transaction::new(b"pay alice".to_vec(), &keypair).unwrap();
        assert_eq!(tx.hash, hash(b"pay alice"));
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn test_payload_size_limit() {
        let keypair = KeyPair::generate();

        let at_limit = Transaction::new(vec![7u8; TX_DATA_SIZE_LIMIT], &keypair).unwrap();
        assert!(at_limit.verify().is_ok());

        let over_limit = Transaction::new(vec![7u8; TX_DATA_SIZE_LIMIT + 1], &keypair).unwrap();
        assert_eq!(
            over_limit.verify(),
            Err(ChainError::TransactionTooLarge {
                size: TX_DATA_SIZE_LIMIT + 1,
                max: TX_DATA_SIZE_LIMIT,
            })
        );
    }

    #[test]
    fn test_encoding_is_deterministic_and_covers_signature() {
        use crate::merkle::Encodable;

        let keypair = KeyPair::generate();
        let tx = Transaction::new(b"data".to_vec(), &keypair).unwrap();
        assert_eq!(tx.bytes(), tx.clone().bytes());

        let mut unsigned = tx.clone();
        unsigned.signature = None;
        assert_ne!(tx.bytes(), unsigned.bytes());
    }
}
