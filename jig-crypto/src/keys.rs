use ed25519_dalek::{Signer, Verifier};
use jig_types::error::TypesError;
use jig_types::primitives::{Address, PublicKey, Signature};
use zeroize::Zeroizing;

use crate::address::pubkey_to_address;

/// Wrapper around an Ed25519 keypair.
pub struct Keypair {
    inner: ed25519_dalek::SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        let signing_key = ed25519_dalek::SigningKey::generate(&mut csprng);
        Self { inner: signing_key }
    }

    /// Create a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
        Self { inner: signing_key }
    }

    /// Get the public key bytes.
    pub fn public_key(&self) -> PublicKey {
        self.inner.verifying_key().to_bytes()
    }

    /// Address derived from the public key.
    pub fn address(&self) -> Address {
        pubkey_to_address(&self.public_key())
    }

    /// The 32-byte seed, wiped on drop.
    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.inner.to_bytes())
    }

    /// Sign a message, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.inner.sign(message).to_bytes()
    }
}

/// Verify an Ed25519 signature.
pub fn verify(message: &[u8], signature: &Signature, pubkey: &PublicKey) -> Result<(), TypesError> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(pubkey)
        .map_err(|_| TypesError::InvalidKeyMaterial)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key
        .verify(message, &sig)
        .map_err(|_| TypesError::InvalidSignature { signer_index: 0 })
}

/// Batch-verify multiple signatures.
///
/// Falls back to sequential verification when the batch fails so the
/// failing index can be reported.
pub fn batch_verify(
    messages: &[&[u8]],
    signatures: &[Signature],
    pubkeys: &[PublicKey],
) -> Result<(), TypesError> {
    if messages.len() != signatures.len() || messages.len() != pubkeys.len() {
        return Err(TypesError::InvalidSignature { signer_index: 0 });
    }
    if messages.is_empty() {
        return Ok(());
    }

    let mut verifying_keys = Vec::with_capacity(pubkeys.len());
    let mut dalek_sigs = Vec::with_capacity(signatures.len());
    for (i, (pk, sig)) in pubkeys.iter().zip(signatures.iter()).enumerate() {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(pk)
            .map_err(|_| TypesError::InvalidSignature { signer_index: i })?;
        verifying_keys.push(vk);
        dalek_sigs.push(ed25519_dalek::Signature::from_bytes(sig));
    }

    if ed25519_dalek::verify_batch(messages, &dalek_sigs, &verifying_keys).is_ok() {
        return Ok(());
    }

    for (i, ((msg, sig), vk)) in messages
        .iter()
        .zip(dalek_sigs.iter())
        .zip(verifying_keys.iter())
        .enumerate()
    {
        if vk.verify(msg, sig).is_err() {
            return Err(TypesError::InvalidSignature { signer_index: i });
        }
    }

    Ok(())
}
