use std::io::{Read, Write};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::pointer::{Pointer, POINTER_LEN};
use crate::primitives::Address;

/// Discriminant of a lock. The numeric codes are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LockType {
    None = 0,
    Address = 1,
    Jig = 2,
    Public = 3,
    Frozen = 255,
}

impl LockType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, TypesError> {
        match code {
            0 => Ok(LockType::None),
            1 => Ok(LockType::Address),
            2 => Ok(LockType::Jig),
            3 => Ok(LockType::Public),
            255 => Ok(LockType::Frozen),
            _ => Err(TypesError::UnknownLockType { code }),
        }
    }

    /// Length the data payload must have for this lock type.
    pub fn data_len(self) -> usize {
        match self {
            LockType::Address => 20,
            LockType::Jig => POINTER_LEN,
            LockType::None | LockType::Public | LockType::Frozen => 0,
        }
    }
}

impl BorshSerialize for LockType {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        BorshSerialize::serialize(&self.code(), writer)
    }
}

impl BorshDeserialize for LockType {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let code = u8::deserialize_reader(reader)?;
        LockType::from_code(code)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }
}

/// At-rest form of a lock: a flat `{type, data}` tagged union.
#[derive(Debug, Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct SerializedLock {
    pub kind: LockType,
    pub data: Vec<u8>,
}

impl SerializedLock {
    pub fn none() -> Self {
        Self {
            kind: LockType::None,
            data: Vec::new(),
        }
    }

    pub fn frozen() -> Self {
        Self {
            kind: LockType::Frozen,
            data: Vec::new(),
        }
    }

    pub fn public() -> Self {
        Self {
            kind: LockType::Public,
            data: Vec::new(),
        }
    }

    pub fn address(address: &Address) -> Self {
        Self {
            kind: LockType::Address,
            data: address.to_vec(),
        }
    }

    pub fn jig(owner: &Pointer) -> Self {
        Self {
            kind: LockType::Jig,
            data: owner.to_bytes().to_vec(),
        }
    }

    /// Check that the payload length matches the lock type.
    pub fn validate(&self) -> Result<(), TypesError> {
        let expected = self.kind.data_len();
        if self.data.len() != expected {
            return Err(TypesError::InvalidLockData {
                kind: self.kind,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// The locking address, if this is an address lock with valid data.
    pub fn as_address(&self) -> Option<Address> {
        if self.kind != LockType::Address {
            return None;
        }
        self.data.as_slice().try_into().ok()
    }
}
