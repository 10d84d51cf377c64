use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::TypesError;
use crate::instruction::Instruction;
use crate::primitives::{Hash, PublicKey, Signature, TxHash};

/// Current transaction format version.
pub const TX_VERSION: u16 = 1;

/// An ordered list of instructions executed atomically.
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Tx {
    pub version: u16,
    pub instructions: Vec<Instruction>,
}

/// A signature instruction extracted from a transaction, with the message
/// it must sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSignature {
    pub position: usize,
    pub sig: Signature,
    pub pubkey: PublicKey,
    pub message: Hash,
}

impl Tx {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            version: TX_VERSION,
            instructions,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        borsh::to_vec(self).map_err(TypesError::encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Tx::try_from_slice(bytes).map_err(TypesError::decode)
    }

    /// BLAKE3 of the full serialized transaction.
    pub fn hash(&self) -> Result<TxHash, TypesError> {
        Ok(*blake3::hash(&self.to_bytes()?).as_bytes())
    }

    /// Message signed by `SIGN`: every instruction except signatures.
    pub fn sighash(&self) -> Result<Hash, TypesError> {
        self.hash_instructions(self.instructions.iter().filter(|i| !i.is_signature()))
    }

    /// Message signed by a `SIGNTO` at `position`: every instruction before it.
    pub fn sighash_to(&self, position: usize) -> Result<Hash, TypesError> {
        let end = position.min(self.instructions.len());
        self.hash_instructions(self.instructions[..end].iter())
    }

    fn hash_instructions<'a>(
        &self,
        instructions: impl Iterator<Item = &'a Instruction>,
    ) -> Result<Hash, TypesError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.version.to_le_bytes());
        for ix in instructions {
            hasher.update(&ix.to_bytes()?);
        }
        Ok(*hasher.finalize().as_bytes())
    }

    /// All signature instructions with the message each one covers.
    pub fn signatures(&self) -> Result<Vec<TxSignature>, TypesError> {
        let mut out = Vec::new();
        let mut sighash = None;
        for (position, ix) in self.instructions.iter().enumerate() {
            match ix {
                Instruction::Sign { sig, pubkey } => {
                    let message = match sighash {
                        Some(h) => h,
                        None => {
                            let h = self.sighash()?;
                            sighash = Some(h);
                            h
                        }
                    };
                    out.push(TxSignature {
                        position,
                        sig: *sig,
                        pubkey: *pubkey,
                        message,
                    });
                }
                Instruction::SignTo { sig, pubkey } => out.push(TxSignature {
                    position,
                    sig: *sig,
                    pubkey: *pubkey,
                    message: self.sighash_to(position)?,
                }),
                _ => {}
            }
        }
        Ok(out)
    }
}
