//! Hydrated locks and their authorization predicates.
//!
//! Everything here is a pure function of the lock, the identity acting on
//! the jig and the verified signer addresses, so it can be checked without
//! running any guest code.

use jig_types::error::TypesError;
use jig_types::lock::{LockType, SerializedLock};
use jig_types::pointer::Pointer;
use jig_types::primitives::Address;

use crate::error::ExecError;

/// Lock carried by a live jig during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lock {
    Frozen,
    None,
    Address(Address),
    /// Owned by another jig.
    Jig(Pointer),
    Public,
}

impl Lock {
    pub fn from_serialized(lock: &SerializedLock) -> Result<Self, TypesError> {
        lock.validate()?;
        Ok(match lock.kind {
            LockType::None => Lock::None,
            LockType::Frozen => Lock::Frozen,
            LockType::Public => Lock::Public,
            LockType::Address => {
                let mut address = [0u8; 20];
                address.copy_from_slice(&lock.data);
                Lock::Address(address)
            }
            LockType::Jig => Lock::Jig(Pointer::from_bytes(&lock.data)?),
        })
    }

    pub fn to_serialized(&self) -> SerializedLock {
        match self {
            Lock::Frozen => SerializedLock::frozen(),
            Lock::None => SerializedLock::none(),
            Lock::Address(address) => SerializedLock::address(address),
            Lock::Jig(owner) => SerializedLock::jig(owner),
            Lock::Public => SerializedLock::public(),
        }
    }

    pub fn lock_type(&self) -> LockType {
        match self {
            Lock::Frozen => LockType::Frozen,
            Lock::None => LockType::None,
            Lock::Address(_) => LockType::Address,
            Lock::Jig(_) => LockType::Jig,
            Lock::Public => LockType::Public,
        }
    }

    /// Raw lock payload as stored in guest memory and outputs.
    pub fn data(&self) -> Vec<u8> {
        self.to_serialized().data
    }

    /// Whether methods may be invoked on the jig.
    pub fn can_receive_calls(&self, acting: Option<&Pointer>, signers: &[Address]) -> bool {
        match self {
            Lock::Frozen => false,
            Lock::None | Lock::Public => true,
            Lock::Address(address) => signers.contains(address),
            Lock::Jig(owner) => acting == Some(owner),
        }
    }

    /// Whether the jig may be relocked, funded or otherwise changed.
    pub fn can_be_changed(&self, acting: Option<&Pointer>, signers: &[Address]) -> bool {
        match self {
            Lock::Frozen | Lock::Public => false,
            Lock::None => true,
            Lock::Address(address) => signers.contains(address),
            Lock::Jig(owner) => acting == Some(owner),
        }
    }

    /// A jig with an open lock cannot be committed.
    pub fn is_open(&self) -> bool {
        matches!(self, Lock::None)
    }
}

/// Decide whether `current` may be replaced with `next`.
///
/// `in_own_constructor` is true only while the jig's own constructor is
/// executing; that is the only place a public lock may be installed.
pub fn check_transition(
    current: &Lock,
    next: &Lock,
    acting: Option<&Pointer>,
    signers: &[Address],
    in_own_constructor: bool,
) -> Result<(), ExecError> {
    if matches!(next, Lock::Public) && !in_own_constructor {
        return Err(ExecError::authorization(
            "public lock can only be set from the jig's own constructor",
        ));
    }
    if matches!(current, Lock::Public) {
        if in_own_constructor && matches!(next, Lock::Public) {
            return Ok(());
        }
        return Err(ExecError::authorization("a public lock is permanent"));
    }
    if !current.can_be_changed(acting, signers) {
        return Err(ExecError::authorization(format!(
            "{:?} lock cannot be changed by the current context",
            current.lock_type()
        )));
    }
    Ok(())
}
