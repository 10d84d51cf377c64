//! ABI document: the structured description of a package's exported and
//! imported surface.
//!
//! The same model has two interchange forms, JSON (serde) and a compact
//! borsh binary. Both decode to equal [`Abi`] values.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Current ABI schema version.
pub const ABI_VERSION: u16 = 1;

/// Name of the constructor method every class declares.
pub const CONSTRUCTOR: &str = "constructor";

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Abi {
    pub version: u16,
    #[serde(default)]
    pub exports: Vec<ExportDef>,
    #[serde(default)]
    pub imports: Vec<ImportDef>,
    #[serde(default)]
    pub objects: Vec<ObjectDef>,
    #[serde(default)]
    pub type_ids: Vec<TypeIdDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExportDef {
    Class(ClassDef),
    Function(FunctionDef),
    Interface(InterfaceDef),
}

impl ExportDef {
    pub fn name(&self) -> &str {
        match self {
            ExportDef::Class(c) => &c.name,
            ExportDef::Function(f) => &f.name,
            ExportDef::Interface(i) => &i.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub implements: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ArgDef>,
    #[serde(default)]
    pub rtype: Option<TypeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    /// Static methods take no receiver and are invoked with `EXEC`.
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default)]
    pub args: Vec<ArgDef>,
    #[serde(default)]
    pub rtype: Option<TypeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ArgDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeNode,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeNode,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ObjectDef {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

/// Code owned by another package and referenced by this one.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImportDef {
    Class {
        name: String,
        pkg: String,
    },
    Function {
        name: String,
        pkg: String,
        #[serde(default)]
        args: Vec<ArgDef>,
        #[serde(default)]
        rtype: Option<TypeNode>,
    },
    Interface {
        name: String,
        pkg: String,
    },
}

impl ImportDef {
    pub fn name(&self) -> &str {
        match self {
            ImportDef::Class { name, .. }
            | ImportDef::Function { name, .. }
            | ImportDef::Interface { name, .. } => name,
        }
    }

    /// Hex package id the import resolves against.
    pub fn pkg(&self) -> &str {
        match self {
            ImportDef::Class { pkg, .. }
            | ImportDef::Function { pkg, .. }
            | ImportDef::Interface { pkg, .. } => pkg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TypeIdDef {
    pub id: u32,
    pub name: String,
}

/// A (possibly generic, possibly nullable) type reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct TypeNode {
    pub name: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub args: Vec<TypeNode>,
}

impl TypeNode {
    pub fn simple(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nullable: false,
            args: Vec::new(),
        }
    }

    pub fn generic(name: &str, args: Vec<TypeNode>) -> Self {
        Self {
            name: name.to_string(),
            nullable: false,
            args,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Name used in the runtime type-id table: generic arguments included,
    /// nullability dropped.
    pub fn normalized_name(&self) -> String {
        if self.args.is_empty() {
            return self.name.clone();
        }
        let args: Vec<String> = self.args.iter().map(|a| a.normalized_name()).collect();
        format!("{}<{}>", self.name, args.join(","))
    }
}

impl fmt::Display for TypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized_name())?;
        if self.nullable {
            write!(f, " | null")?;
        }
        Ok(())
    }
}

impl Abi {
    pub fn from_json(json: &str) -> Result<Self, TypesError> {
        serde_json::from_str(json).map_err(|e| TypesError::InvalidAbi {
            reason: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, TypesError> {
        serde_json::to_string_pretty(self).map_err(TypesError::encode)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Abi::try_from_slice(bytes).map_err(|e| TypesError::InvalidAbi {
            reason: e.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        borsh::to_vec(self).map_err(TypesError::encode)
    }
}
