use jig_types::abi::TypeNode;
use jig_types::pointer::Pointer;
use jig_types::primitives::PackageId;
use jig_types::value::Value;

use crate::error::ExecError;

/// Outcome of one executed instruction. Later instructions refer to these
/// by their position on the tape.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Empty,
    Package {
        container: usize,
        pkg_id: PackageId,
    },
    Value {
        ty: TypeNode,
        value: Value,
        /// Container the value was lifted from.
        container: usize,
    },
}

impl StatementResult {
    pub fn as_package(&self) -> Result<usize, ExecError> {
        match self {
            StatementResult::Package { container, .. } => Ok(*container),
            _ => Err(ExecError::validation("statement is not a package")),
        }
    }

    pub fn as_value(&self) -> Result<&Value, ExecError> {
        match self {
            StatementResult::Value { value, .. } => Ok(value),
            _ => Err(ExecError::validation("statement is not a value")),
        }
    }

    pub fn as_jig(&self) -> Result<Pointer, ExecError> {
        self.as_value()?
            .as_jig()
            .ok_or_else(|| ExecError::validation("statement is not a jig"))
    }
}
