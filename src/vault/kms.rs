use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("KMS unavailable: {0}")]
    Unavailable(String),

    #[error("KMS rejected the request: {0}")]
    Rejected(String),

    #[error("Data key decryption failed")]
    DecryptFailed,
}

/// A freshly generated data key: the plaintext for immediate local use
/// (zeroized on drop) and the ciphertext for storage.
pub struct DataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub ciphertext: Vec<u8>,
}

/// The slice of the external KMS this core depends on. The real client (AWS
/// KMS or Vault transit) is wired in production; [`InMemoryKms`] stands in
/// everywhere else.
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Generates a 32-byte data key under `key_id`.
    async fn generate_data_key(&self, key_id: &str) -> Result<DataKey, KmsError>;

    /// Decrypts a stored data-key ciphertext back to plaintext.
    async fn decrypt_data_key(&self, key_id: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, KmsError>;
}

/// Local KMS stand-in: data keys are wrapped with an in-process AES-256-GCM
/// master key. Round-trips are real; durability and access control are not
/// the point here.
pub struct InMemoryKms {
    master_key: Zeroizing<Vec<u8>>,
}

impl Default for InMemoryKms {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKms {
    pub fn new() -> Self {
        let mut master = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut master);
        Self {
            master_key: Zeroizing::new(master),
        }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.master_key))
    }
}

#[async_trait]
impl KmsClient for InMemoryKms {
    async fn generate_data_key(&self, _key_id: &str) -> Result<DataKey, KmsError> {
        let mut plaintext = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut plaintext);

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let wrapped = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|_| KmsError::Rejected("data key wrap failed".to_string()))?;

        let mut ciphertext = nonce_bytes.to_vec();
        ciphertext.extend_from_slice(&wrapped);

        Ok(DataKey {
            plaintext: Zeroizing::new(plaintext),
            ciphertext,
        })
    }

    async fn decrypt_data_key(&self, _key_id: &str, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        if ciphertext.len() < 12 {
            return Err(KmsError::DecryptFailed);
        }
        let (nonce_bytes, wrapped) = ciphertext.split_at(12);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), wrapped)
            .map_err(|_| KmsError::DecryptFailed)?;
        Ok(Zeroizing::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_data_key_roundtrip() {
        let kms = InMemoryKms::new();
        let data_key = kms.generate_data_key("kms-key-1").await.unwrap();
        assert_eq!(data_key.plaintext.len(), 32);

        let recovered = kms.decrypt_data_key("kms-key-1", &data_key.ciphertext).await.unwrap();
        assert_eq!(*recovered, *data_key.plaintext);
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_fails() {
        let kms = InMemoryKms::new();
        let data_key = kms.generate_data_key("kms-key-1").await.unwrap();

        let mut tampered = data_key.ciphertext.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert!(kms.decrypt_data_key("kms-key-1", &tampered).await.is_err());

        // A different KMS instance has a different master key.
        let other = InMemoryKms::new();
        assert!(other.decrypt_data_key("kms-key-1", &data_key.ciphertext).await.is_err());
    }
}
