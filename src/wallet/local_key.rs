//! Strategy backed by a key held in this process.
//!
//! Keys are persisted as encrypted JSON keystores and unlocked with a password, or with the
//! device identifier when none is given.

use alloy::dyn_abi::TypedData;
use alloy::primitives::{Address, Bytes, B256};
use alloy::signers::{local::PrivateKeySigner, SignerSync};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::Zeroizing;

use super::{NetworkSwitchAction, SigningStrategy, StrategyKind};
use crate::error::{Error, Result};
use crate::rpc::ChainContext;
use crate::transaction::{sign_and_broadcast, TransactionInput};

/// A key held in this process, persisted as a scrypt-encrypted JSON keystore.
///
/// The decrypted key lives only inside the signer, whose key material is zeroed on drop.
pub struct LocalKey {
    signer: PrivateKeySigner,
    keystore_path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKey")
            .field("address", &self.signer.address())
            .field("keystore_path", &self.keystore_path)
            .finish()
    }
}

fn split_keystore_path(path: &Path) -> Result<(&Path, &str)> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Keystore(format!("invalid keystore path {}", path.display())))?;
    Ok((dir, name))
}

fn signer_from_secret(secret: &[u8]) -> Result<PrivateKeySigner> {
    PrivateKeySigner::from_slice(secret).map_err(|e| Error::Keystore(e.to_string()))
}

impl LocalKey {
    /// Decrypt the keystore at `path`. A wrong password yields [`Error::InvalidCredentials`].
    pub fn unlock(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        let path = path.as_ref();
        let secret = Zeroizing::new(eth_keystore::decrypt_key(path, password)?);
        let signer = signer_from_secret(&secret)?;
        info!(address = %signer.address(), path = %path.display(), "Local account unlocked");
        Ok(Self {
            signer,
            keystore_path: Some(path.to_path_buf()),
        })
    }

    /// Create a fresh key and persist it encrypted at `path`.
    pub fn generate(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        let path = path.as_ref();
        let (dir, name) = split_keystore_path(path)?;
        fs::create_dir_all(dir)?;

        let mut rng = rand08::thread_rng();
        let (secret, _uuid) = eth_keystore::new(dir, &mut rng, password, Some(name))?;
        let secret = Zeroizing::new(secret);
        let signer = signer_from_secret(&secret)?;
        info!(address = %signer.address(), path = %path.display(), "New local account created");
        Ok(Self {
            signer,
            keystore_path: Some(path.to_path_buf()),
        })
    }

    /// Unlock the keystore at `path`, or create one if none exists yet.
    ///
    /// Without a password the device identifier is used.
    pub fn unlock_or_generate(
        path: impl AsRef<Path>,
        password: Option<&str>,
        device_id: &str,
    ) -> Result<Self> {
        let path = path.as_ref();
        let password = password.unwrap_or(device_id);
        if path.exists() {
            Self::unlock(path, password)
        } else {
            Self::generate(path, password)
        }
    }

    /// In-memory key, not backed by a keystore file.
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let key = private_key.trim().trim_start_matches("0x");
        let bytes = Zeroizing::new(
            hex::decode(key).map_err(|e| Error::InvalidInput(format!("invalid private key: {e}")))?,
        );
        Ok(Self {
            signer: signer_from_secret(&bytes)?,
            keystore_path: None,
        })
    }

    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
            keystore_path: None,
        }
    }

    /// Re-encrypt the key under `password` into `path`. Plaintext never leaves the signer.
    pub fn export(&self, path: impl AsRef<Path>, password: &str) -> Result<PathBuf> {
        let path = path.as_ref();
        let (dir, name) = split_keystore_path(path)?;
        fs::create_dir_all(dir)?;

        let secret = Zeroizing::new(self.signer.to_bytes().0);
        let mut rng = rand08::thread_rng();
        eth_keystore::encrypt_key(dir, &mut rng, secret.as_slice(), password, Some(name))?;
        Ok(path.to_path_buf())
    }

    pub fn keystore_path(&self) -> Option<&Path> {
        self.keystore_path.as_deref()
    }

    pub fn address_sync(&self) -> Address {
        self.signer.address()
    }
}

#[async_trait]
impl SigningStrategy for LocalKey {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LocalKey
    }

    async fn address(&self) -> Result<Address> {
        Ok(self.signer.address())
    }

    async fn sign_message(&self, _ctx: &ChainContext, message: &[u8]) -> Result<Bytes> {
        let signature = self.signer.sign_message_sync(message)?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }

    async fn sign_typed_data(&self, _ctx: &ChainContext, data: &TypedData) -> Result<Bytes> {
        let hash = data.eip712_signing_hash()?;
        let signature = self.signer.sign_hash_sync(&hash)?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn send_transaction(&self, ctx: &ChainContext, input: &TransactionInput) -> Result<B256> {
        sign_and_broadcast(ctx, &self.signer, input).await
    }

    fn prepare_network_switch(&self) -> NetworkSwitchAction {
        NetworkSwitchAction::Handled
    }

    async fn disconnect(&self, _end_session: bool) -> Result<()> {
        Ok(())
    }
}
