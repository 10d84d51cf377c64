use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use jig_types::package::PkgData;
use jig_types::primitives::PackageId;
use tracing::debug;
use wasmtime::{Config, Engine, Linker, Module};

use crate::abi::AbiAccess;
use crate::error::ExecError;
use crate::host;
use crate::state::ExecState;

type Prepared = (Module, Arc<AbiAccess>);

/// The Wasm runtime shared by every transaction.
///
/// Wraps a wasmtime `Engine` configured with fuel metering, the linker with
/// the host imports registered, and a cache of compiled package modules.
pub struct Runtime {
    engine: Engine,
    linker: Linker<ExecState>,
    modules: Mutex<HashMap<PackageId, Prepared>>,
}

impl Runtime {
    /// Create a new runtime with fuel metering enabled.
    pub fn new() -> Result<Self, ExecError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config).map_err(|e| ExecError::RuntimeError {
            reason: format!("failed to create wasmtime engine: {e}"),
        })?;
        let mut linker = Linker::new(&engine);
        host::register(&mut linker)?;
        Ok(Self {
            engine,
            linker,
            modules: Mutex::new(HashMap::new()),
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn linker(&self) -> &Linker<ExecState> {
        &self.linker
    }

    /// Compiled module and ABI view of a package, compiled once per id.
    pub fn prepare(&self, pkg: &PkgData) -> Result<(Module, Arc<AbiAccess>), ExecError> {
        let mut modules = self.modules.lock().map_err(|e| ExecError::RuntimeError {
            reason: format!("module cache poisoned: {e}"),
        })?;
        if let Some((module, abi)) = modules.get(&pkg.id) {
            return Ok((module.clone(), abi.clone()));
        }

        let module = Module::new(&self.engine, &pkg.wasm).map_err(|e| ExecError::InvalidBytecode {
            reason: format!("failed to compile wasm module: {e}"),
        })?;
        let abi = Arc::new(AbiAccess::new(pkg.abi.clone())?);
        debug!(package = %pkg.id_hex(), "compiled package module");
        modules.insert(pkg.id, (module.clone(), abi.clone()));
        Ok((module, abi))
    }

    /// Number of cached modules.
    pub fn cached_modules(&self) -> usize {
        self.modules.lock().map(|m| m.len()).unwrap_or(0)
    }
}
