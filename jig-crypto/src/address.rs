use jig_types::primitives::{Address, PublicKey};

use crate::hash::blake3_hash;

/// Derive an address from a public key.
/// Address = BLAKE3(pubkey)[0..20]
pub fn pubkey_to_address(pubkey: &PublicKey) -> Address {
    let hash = blake3_hash(pubkey);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[..20]);
    address
}

/// Addresses of a signer set, in order.
pub fn signer_addresses(signers: &[PublicKey]) -> Vec<Address> {
    signers.iter().map(pubkey_to_address).collect()
}
