use std::collections::BTreeMap;
use std::io::{Read, Write};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::TypesError;
use crate::pointer::Pointer;
use crate::primitives::{Address, OutputId, PackageId, PublicKey, Signature};
use crate::value::Value;

/// Instruction opcodes. The byte values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Import = 0xA1,
    Load = 0xA2,
    LoadByOrigin = 0xA3,
    New = 0xB1,
    Call = 0xB2,
    Exec = 0xB3,
    ExecFunc = 0xB4,
    Fund = 0xC1,
    Lock = 0xC2,
    Deploy = 0xD1,
    Sign = 0xE1,
    SignTo = 0xE2,
}

impl OpCode {
    pub fn from_code(code: u8) -> Result<Self, TypesError> {
        Ok(match code {
            0xA1 => OpCode::Import,
            0xA2 => OpCode::Load,
            0xA3 => OpCode::LoadByOrigin,
            0xB1 => OpCode::New,
            0xB2 => OpCode::Call,
            0xB3 => OpCode::Exec,
            0xB4 => OpCode::ExecFunc,
            0xC1 => OpCode::Fund,
            0xC2 => OpCode::Lock,
            0xD1 => OpCode::Deploy,
            0xE1 => OpCode::Sign,
            0xE2 => OpCode::SignTo,
            _ => return Err(TypesError::UnknownOpCode { code }),
        })
    }
}

/// One argument of a call-like instruction: either a reference to an
/// earlier statement on the tape or an inline literal.
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum Arg {
    Ref(u16),
    Literal(Value),
}

/// A single transaction instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Import {
        pkg_id: PackageId,
    },
    Load {
        output_id: OutputId,
    },
    LoadByOrigin {
        origin: Pointer,
    },
    New {
        idx: u16,
        export_idx: u16,
        args: Vec<Arg>,
    },
    Call {
        idx: u16,
        method_idx: u16,
        args: Vec<Arg>,
    },
    /// Static method of an exported class.
    Exec {
        idx: u16,
        export_idx: u16,
        method_idx: u16,
        args: Vec<Arg>,
    },
    /// Exported function.
    ExecFunc {
        idx: u16,
        export_idx: u16,
        args: Vec<Arg>,
    },
    Fund {
        idx: u16,
    },
    Lock {
        idx: u16,
        address: Address,
    },
    Deploy {
        entries: Vec<String>,
        sources: BTreeMap<String, String>,
    },
    Sign {
        sig: Signature,
        pubkey: PublicKey,
    },
    SignTo {
        sig: Signature,
        pubkey: PublicKey,
    },
}

impl Instruction {
    pub fn opcode(&self) -> OpCode {
        match self {
            Instruction::Import { .. } => OpCode::Import,
            Instruction::Load { .. } => OpCode::Load,
            Instruction::LoadByOrigin { .. } => OpCode::LoadByOrigin,
            Instruction::New { .. } => OpCode::New,
            Instruction::Call { .. } => OpCode::Call,
            Instruction::Exec { .. } => OpCode::Exec,
            Instruction::ExecFunc { .. } => OpCode::ExecFunc,
            Instruction::Fund { .. } => OpCode::Fund,
            Instruction::Lock { .. } => OpCode::Lock,
            Instruction::Deploy { .. } => OpCode::Deploy,
            Instruction::Sign { .. } => OpCode::Sign,
            Instruction::SignTo { .. } => OpCode::SignTo,
        }
    }

    pub fn is_signature(&self) -> bool {
        matches!(self, Instruction::Sign { .. } | Instruction::SignTo { .. })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        borsh::to_vec(self).map_err(TypesError::encode)
    }

    /// Decode exactly one instruction; trailing bytes are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Instruction::try_from_slice(bytes).map_err(TypesError::decode)
    }
}

impl BorshSerialize for Instruction {
    fn serialize<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.opcode() as u8).serialize(writer)?;
        match self {
            Instruction::Import { pkg_id } => pkg_id.serialize(writer),
            Instruction::Load { output_id } => output_id.serialize(writer),
            Instruction::LoadByOrigin { origin } => origin.serialize(writer),
            Instruction::New {
                idx,
                export_idx,
                args,
            }
            | Instruction::ExecFunc {
                idx,
                export_idx,
                args,
            } => {
                idx.serialize(writer)?;
                export_idx.serialize(writer)?;
                args.serialize(writer)
            }
            Instruction::Call {
                idx,
                method_idx,
                args,
            } => {
                idx.serialize(writer)?;
                method_idx.serialize(writer)?;
                args.serialize(writer)
            }
            Instruction::Exec {
                idx,
                export_idx,
                method_idx,
                args,
            } => {
                idx.serialize(writer)?;
                export_idx.serialize(writer)?;
                method_idx.serialize(writer)?;
                args.serialize(writer)
            }
            Instruction::Fund { idx } => idx.serialize(writer),
            Instruction::Lock { idx, address } => {
                idx.serialize(writer)?;
                address.serialize(writer)
            }
            Instruction::Deploy { entries, sources } => {
                entries.serialize(writer)?;
                sources.serialize(writer)
            }
            Instruction::Sign { sig, pubkey } | Instruction::SignTo { sig, pubkey } => {
                sig.serialize(writer)?;
                pubkey.serialize(writer)
            }
        }
    }
}

impl BorshDeserialize for Instruction {
    fn deserialize_reader<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let code = u8::deserialize_reader(reader)?;
        let opcode = OpCode::from_code(code)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        let instruction = match opcode {
            OpCode::Import => Instruction::Import {
                pkg_id: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::Load => Instruction::Load {
                output_id: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::LoadByOrigin => Instruction::LoadByOrigin {
                origin: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::New => Instruction::New {
                idx: u16::deserialize_reader(reader)?,
                export_idx: u16::deserialize_reader(reader)?,
                args: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::Call => Instruction::Call {
                idx: u16::deserialize_reader(reader)?,
                method_idx: u16::deserialize_reader(reader)?,
                args: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::Exec => Instruction::Exec {
                idx: u16::deserialize_reader(reader)?,
                export_idx: u16::deserialize_reader(reader)?,
                method_idx: u16::deserialize_reader(reader)?,
                args: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::ExecFunc => Instruction::ExecFunc {
                idx: u16::deserialize_reader(reader)?,
                export_idx: u16::deserialize_reader(reader)?,
                args: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::Fund => Instruction::Fund {
                idx: u16::deserialize_reader(reader)?,
            },
            OpCode::Lock => Instruction::Lock {
                idx: u16::deserialize_reader(reader)?,
                address: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::Deploy => Instruction::Deploy {
                entries: BorshDeserialize::deserialize_reader(reader)?,
                sources: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::Sign => Instruction::Sign {
                sig: BorshDeserialize::deserialize_reader(reader)?,
                pubkey: BorshDeserialize::deserialize_reader(reader)?,
            },
            OpCode::SignTo => Instruction::SignTo {
                sig: BorshDeserialize::deserialize_reader(reader)?,
                pubkey: BorshDeserialize::deserialize_reader(reader)?,
            },
        };
        Ok(instruction)
    }
}
