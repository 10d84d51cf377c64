use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::primitives::{Hash, COIN_PKG_ID};

/// Length of the binary form of a pointer: 32-byte id + u16 index.
pub const POINTER_LEN: usize = 34;

/// A structurally-compared reference to a package export or to an object.
///
/// For package exports `id` is the package id and `idx` the export index.
/// For objects `id` is the hash of the transaction that created (origin) or
/// last touched (location) the object and `idx` its output slot.
///
/// The borsh encoding is identical to [`Pointer::to_bytes`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Pointer {
    pub id: Hash,
    pub idx: u16,
}

/// Class pointer of the built-in coin class.
pub const COIN_CLS_PTR: Pointer = Pointer {
    id: COIN_PKG_ID,
    idx: 0,
};

impl Pointer {
    pub const fn new(id: Hash, idx: u16) -> Self {
        Self { id, idx }
    }

    /// `id ‖ idx` with the index little-endian.
    pub fn to_bytes(&self) -> [u8; POINTER_LEN] {
        let mut out = [0u8; POINTER_LEN];
        out[..32].copy_from_slice(&self.id);
        out[32..].copy_from_slice(&self.idx.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        if bytes.len() != POINTER_LEN {
            return Err(TypesError::InvalidPointer { len: bytes.len() });
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes[..32]);
        let idx = u16::from_le_bytes([bytes[32], bytes[33]]);
        Ok(Self { id, idx })
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", hex::encode(self.id), self.idx)
    }
}

impl FromStr for Pointer {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypesError::InvalidPointerString {
            input: s.to_string(),
        };
        let (id_hex, idx_str) = s.split_once('_').ok_or_else(invalid)?;
        let id: Hash = hex::decode(id_hex)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(invalid)?;
        let idx = idx_str.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self { id, idx })
    }
}
