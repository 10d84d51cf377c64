use std::sync::Arc;

use jig_types::package::PkgData;
use jig_types::pointer::Pointer;
use jig_types::primitives::{Address, PackageId, TxHash};
use wasmtime::{StoreContextMut, StoreLimits, StoreLimitsBuilder};

use crate::call_stack::CallerStack;
use crate::config::ExecOpts;
use crate::container::WasmContainer;
use crate::context::ExecContext;
use crate::error::ExecError;
use crate::jig::JigRef;
use crate::metering::Measurements;
use crate::runtime::Runtime;
use crate::statement::StatementResult;

/// Store context handed to every engine routine. Host callbacks and the
/// instruction interpreter both reach the same state through it.
pub(crate) type Cx<'a> = StoreContextMut<'a, ExecState>;

/// A jig whose constructor is running but which has not linked yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingJig {
    pub origin: Pointer,
    pub class_ptr: Pointer,
}

/// Per-transaction state owned by the wasmtime `Store`.
///
/// All containers of a transaction live in one store so host callbacks
/// can re-enter any of them.
pub struct ExecState {
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) context: Arc<dyn ExecContext>,
    pub(crate) opts: ExecOpts,
    pub(crate) tx_hash: TxHash,
    pub(crate) signers: Vec<Address>,

    pub(crate) containers: Vec<WasmContainer>,
    pub(crate) jigs: Vec<JigRef>,
    /// Origins of touched jigs, in output slot order. A new jig's slot is
    /// reserved when its origin is issued.
    pub(crate) affected: Vec<Pointer>,
    pub(crate) statements: Vec<StatementResult>,
    pub(crate) deploys: Vec<Arc<PkgData>>,

    pub(crate) stack: CallerStack,
    /// Containers with a guest frame on the wasm stack, innermost last.
    pub(crate) active: Vec<usize>,
    /// Origins whose constructors are running, innermost last.
    pub(crate) constructing: Vec<Pointer>,
    pub(crate) next_jig: Option<PendingJig>,

    pub(crate) measurements: Measurements,
    pub(crate) fuel_reported: u64,
    pub(crate) fund_amount: u64,

    /// Error raised by a host callback, recovered once the trap unwinds.
    pub(crate) host_error: Option<ExecError>,
    pub(crate) store_limits: StoreLimits,
}

impl ExecState {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        context: Arc<dyn ExecContext>,
        opts: ExecOpts,
        signers: Vec<Address>,
    ) -> Self {
        let tx_hash = context.tx_hash();
        Self {
            runtime,
            context,
            tx_hash,
            signers,
            containers: Vec::new(),
            jigs: Vec::new(),
            affected: Vec::new(),
            statements: Vec::new(),
            deploys: Vec::new(),
            stack: CallerStack::with_max_depth(opts.max_call_depth),
            active: Vec::new(),
            constructing: Vec::new(),
            next_jig: None,
            measurements: Measurements::new(&opts),
            fuel_reported: 0,
            fund_amount: 0,
            host_error: None,
            store_limits: StoreLimitsBuilder::new()
                .memory_size(opts.max_memory_bytes)
                .build(),
            opts,
        }
    }

    pub(crate) fn container_index(&self, id: &PackageId) -> Option<usize> {
        self.containers.iter().position(|c| &c.id == id)
    }

    pub(crate) fn container(&self, idx: usize) -> Result<&WasmContainer, ExecError> {
        self.containers
            .get(idx)
            .ok_or_else(|| ExecError::invariant(format!("no container #{idx}")))
    }

    pub(crate) fn jig_index(&self, origin: &Pointer) -> Option<usize> {
        self.jigs.iter().position(|j| &j.origin == origin)
    }

    pub(crate) fn jig(&self, idx: usize) -> Result<&JigRef, ExecError> {
        self.jigs
            .get(idx)
            .ok_or_else(|| ExecError::invariant(format!("no jig #{idx}")))
    }

    pub(crate) fn mark_affected(&mut self, jig_idx: usize) -> Result<(), ExecError> {
        let origin = self.jig(jig_idx)?.origin;
        if !self.affected.contains(&origin) {
            self.affected.push(origin);
        }
        Ok(())
    }

    /// Origin the next created jig will receive.
    pub(crate) fn next_origin(&self) -> Result<Pointer, ExecError> {
        let idx = u16::try_from(self.affected.len())
            .map_err(|_| ExecError::validation("too many jigs touched in one transaction"))?;
        Ok(Pointer::new(self.tx_hash, idx))
    }

    /// Issue the origin of a jig about to be constructed and hold its
    /// output slot, so its location will equal its origin.
    pub(crate) fn reserve_origin(&mut self) -> Result<Pointer, ExecError> {
        let origin = self.next_origin()?;
        self.affected.push(origin);
        Ok(origin)
    }

    /// Container whose guest code is currently calling into the host.
    pub(crate) fn current_container(&self) -> Result<usize, ExecError> {
        self.active
            .last()
            .copied()
            .ok_or_else(|| ExecError::invariant("host call with no active container"))
    }

    /// True while `origin`'s own constructor is the executing frame.
    pub(crate) fn in_own_constructor(&self, origin: &Pointer) -> bool {
        self.constructing.last() == Some(origin) && self.stack.top() == Some(origin)
    }

    pub(crate) fn statement(&self, idx: u16) -> Result<&StatementResult, ExecError> {
        self.statements
            .get(usize::from(idx))
            .ok_or_else(|| ExecError::not_found(format!("statement #{idx}")))
    }
}
