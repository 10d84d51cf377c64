use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::abi::Abi;
use crate::error::TypesError;
use crate::primitives::PackageId;

/// A compiled, content-addressed package. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PkgData {
    pub id: PackageId,
    pub abi: Abi,
    /// Compiled WebAssembly binary.
    pub wasm: Vec<u8>,
    pub entries: Vec<String>,
    pub sources: BTreeMap<String, String>,
    pub docs: Vec<u8>,
}

impl PkgData {
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        borsh::to_vec(self).map_err(TypesError::encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        PkgData::try_from_slice(bytes).map_err(TypesError::decode)
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}
