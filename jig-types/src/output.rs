use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::TypesError;
use crate::lock::SerializedLock;
use crate::pointer::Pointer;
use crate::primitives::OutputId;
use crate::value::{decode_values, Value};

/// At-rest record of an object after a transaction touched it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Output {
    /// Immutable creation identity.
    pub origin: Pointer,
    /// Identity of this particular version.
    pub location: Pointer,
    /// Package id + export index of the object's class.
    pub class_ptr: Pointer,
    pub lock: SerializedLock,
    /// Borsh-encoded own field values in declaration order.
    pub state: Vec<u8>,
}

impl Output {
    /// Canonical bytes; identical to the borsh encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(34 * 3 + 1 + 8 + self.lock.data.len() + self.state.len());
        out.extend_from_slice(&self.origin.to_bytes());
        out.extend_from_slice(&self.location.to_bytes());
        out.extend_from_slice(&self.class_ptr.to_bytes());
        out.push(self.lock.kind.code());
        out.extend_from_slice(&(self.lock.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.lock.data);
        out.extend_from_slice(&(self.state.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.state);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        let output = Output::try_from_slice(bytes).map_err(TypesError::decode)?;
        output.lock.validate()?;
        Ok(output)
    }

    /// BLAKE3 of the canonical bytes.
    pub fn id(&self) -> OutputId {
        *blake3::hash(&self.to_bytes()).as_bytes()
    }

    /// Decode the stored field values.
    pub fn state_values(&self) -> Result<Vec<Value>, TypesError> {
        decode_values(&self.state)
    }
}
