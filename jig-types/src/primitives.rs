/// 32-byte BLAKE3 hash.
pub type Hash = [u8; 32];

/// 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// 20-byte address derived from BLAKE3(pubkey)[0..20].
pub type Address = [u8; 20];

/// Hash of a serialized transaction. Doubles as the id half of every
/// pointer created by that transaction.
pub type TxHash = Hash;

/// Content hash of a package bundle (entries + sources).
pub type PackageId = [u8; 32];

/// BLAKE3 hash of a serialized output.
pub type OutputId = Hash;

/// Package id of the built-in coin package (all zeros).
pub const COIN_PKG_ID: PackageId = [0u8; 32];

/// Runtime type id reserved for raw byte buffers.
pub const BUFFER_RTID: u32 = 1;

/// Runtime type id reserved for UTF-8 strings.
pub const STRING_RTID: u32 = 2;
