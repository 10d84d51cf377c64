//! The instruction interpreter.
//!
//! A [`TxExecution`] owns the wasmtime store of one transaction. Each
//! operation appends exactly one [`StatementResult`] to the tape; later
//! instructions refer to earlier results by tape index. Nothing leaves the
//! execution until [`TxExecution::finalize`] succeeds.

use std::collections::BTreeMap;
use std::sync::Arc;

use jig_crypto::address::signer_addresses;
use jig_crypto::package::package_id;
use jig_types::abi::{ArgDef, TypeNode};
use jig_types::instruction::{Arg, Instruction};
use jig_types::output::Output;
use jig_types::pointer::{Pointer, COIN_CLS_PTR};
use jig_types::primitives::{Address, OutputId, PackageId, PublicKey, Signature};
use jig_types::tx::Tx;
use jig_types::value::{encode_values, Value};
use tracing::{debug, info};
use wasmtime::{AsContextMut, Store, Val};

use crate::config::ExecOpts;
use crate::container::{assert_container, call_export, instantiate};
use crate::context::ExecContext;
use crate::error::ExecError;
use crate::jig::{self, ensure_jig, hydrate, set_lock, state_values};
use crate::lock::{check_transition, Lock};
use crate::memory::{lift, lower, val_to_word, word_to_val};
use crate::result::ExecutionResult;
use crate::runtime::Runtime;
use crate::state::{Cx, ExecState};
use crate::statement::StatementResult;

/// Execution of a single transaction.
pub struct TxExecution {
    store: Store<ExecState>,
}

impl TxExecution {
    /// Start an execution. Signatures are counted up front.
    pub fn new(
        runtime: Arc<Runtime>,
        context: Arc<dyn ExecContext>,
        opts: ExecOpts,
    ) -> Result<Self, ExecError> {
        let pubkeys = context.signers();
        let signers = signer_addresses(&pubkeys);
        let fuel = opts.fuel_budget();
        let state = ExecState::new(runtime.clone(), context, opts, signers);

        let mut store = Store::new(runtime.engine(), state);
        store.limiter(|state| &mut state.store_limits);
        store.set_fuel(fuel).map_err(|e| ExecError::RuntimeError {
            reason: format!("failed to set fuel: {e}"),
        })?;
        for _ in &pubkeys {
            store.data_mut().measurements.num_sigs.inc()?;
        }
        Ok(Self { store })
    }

    fn cx(&mut self) -> Cx<'_> {
        self.store.as_context_mut()
    }

    /// Results recorded so far.
    pub fn statements(&self) -> &[StatementResult] {
        &self.store.data().statements
    }

    /// Origin the next created jig will receive.
    pub fn next_origin(&self) -> Result<Pointer, ExecError> {
        self.store.data().next_origin()
    }

    fn push(&mut self, statement: StatementResult) -> Result<usize, ExecError> {
        self.sync_fuel()?;
        let state = self.store.data_mut();
        state.statements.push(statement);
        Ok(state.statements.len() - 1)
    }

    /// Report fuel burnt since the last sync to the execution counter.
    fn sync_fuel(&mut self) -> Result<(), ExecError> {
        let remaining = self.store.get_fuel().map_err(|e| ExecError::RuntimeError {
            reason: format!("failed to read fuel: {e}"),
        })?;
        let state = self.store.data_mut();
        let consumed = state.opts.fuel_budget().saturating_sub(remaining);
        let delta = consumed.saturating_sub(state.fuel_reported);
        state.fuel_reported = consumed;
        state.measurements.wasm_executed.add(delta)
    }

    // ─── Arguments ──────────────────────────────────────────────────────

    fn resolve_arg(&self, arg: &Arg) -> Result<Value, ExecError> {
        match arg {
            Arg::Literal(value) => Ok(value.clone()),
            Arg::Ref(idx) => self.store.data().statement(*idx)?.as_value().cloned(),
        }
    }

    /// Lower instruction arguments into `container` as wasm parameters.
    fn lower_args(
        &mut self,
        container: usize,
        args: &[Arg],
        defs: &[ArgDef],
    ) -> Result<Vec<Val>, ExecError> {
        if args.len() != defs.len() {
            return Err(ExecError::validation(format!(
                "expected {} arguments, got {}",
                defs.len(),
                args.len()
            )));
        }
        let values = args
            .iter()
            .map(|arg| self.resolve_arg(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let mut cx = self.cx();
        let mut params = Vec::with_capacity(defs.len());
        for (def, value) in defs.iter().zip(&values) {
            let raw = lower(&mut cx, container, &def.ty, value)?;
            params.extend(word_to_val(&def.ty, raw));
        }
        Ok(params)
    }

    /// Record the return value of a guest call.
    fn push_return(
        &mut self,
        container: usize,
        rtype: Option<&TypeNode>,
        ret: Option<Val>,
    ) -> Result<usize, ExecError> {
        let (Some(ty), Some(val)) = (rtype, ret) else {
            return self.push(StatementResult::Empty);
        };
        let raw = val_to_word(&val)?;
        let value = lift(&mut self.cx(), container, ty, raw)?;
        self.push(StatementResult::Value {
            ty: ty.clone(),
            value,
            container,
        })
    }

    fn push_jig(&mut self, jig_idx: usize) -> Result<usize, ExecError> {
        let state = self.store.data();
        let jig = state.jig(jig_idx)?;
        let class = state.container(jig.container)?.abi.class(jig.class_idx)?;
        let statement = StatementResult::Value {
            ty: TypeNode::simple(&class.name),
            value: Value::Jig(jig.origin),
            container: jig.container,
        };
        self.push(statement)
    }

    fn jig_at(&mut self, stmt_idx: u16) -> Result<usize, ExecError> {
        let origin = self.store.data().statement(stmt_idx)?.as_jig()?;
        ensure_jig(&mut self.cx(), &origin)
    }

    // ─── Operations ─────────────────────────────────────────────────────

    /// Instantiate a package container.
    pub fn import(&mut self, pkg_id: &PackageId) -> Result<usize, ExecError> {
        let container = assert_container(&mut self.cx(), pkg_id)?;
        self.push(StatementResult::Package {
            container,
            pkg_id: *pkg_id,
        })
    }

    /// Hydrate a jig from an unspent output.
    pub fn load(&mut self, output_id: &OutputId) -> Result<usize, ExecError> {
        let output = self.store.data().context.output_by_id(output_id)?;
        let jig_idx = hydrate(&mut self.cx(), output)?;
        self.push_jig(jig_idx)
    }

    /// Hydrate the latest output of a jig.
    pub fn load_by_origin(&mut self, origin: &Pointer) -> Result<usize, ExecError> {
        self.store.data_mut().measurements.origin_checks.inc()?;
        let output = self.store.data().context.input_by_origin(origin)?;
        let jig_idx = hydrate(&mut self.cx(), output)?;
        self.push_jig(jig_idx)
    }

    /// Create a jig of class `class_idx` from the package at `stmt_idx`.
    pub fn instantiate(
        &mut self,
        stmt_idx: u16,
        class_idx: u16,
        args: &[Arg],
    ) -> Result<usize, ExecError> {
        let container = self.store.data().statement(stmt_idx)?.as_package()?;
        let abi = self.store.data().container(container)?.abi.clone();
        let class = abi.class(class_idx)?;
        let params = self.lower_args(container, args, &class.constructor.args)?;
        let jig_idx = jig::create(&mut self.cx(), container, class_idx, &params)?;
        self.push_jig(jig_idx)
    }

    /// Call an instance method of the jig at `stmt_idx`.
    pub fn call(&mut self, stmt_idx: u16, method_idx: u16, args: &[Arg]) -> Result<usize, ExecError> {
        let jig_idx = self.jig_at(stmt_idx)?;
        let state = self.store.data();
        let jig = state.jig(jig_idx)?.clone();
        if !jig
            .lock
            .can_receive_calls(state.stack.acting_on(&jig.origin), &state.signers)
        {
            return Err(ExecError::authorization(format!(
                "jig {} does not accept calls from this transaction",
                jig.origin
            )));
        }
        let abi = state.container(jig.container)?.abi.clone();
        let method = abi.class(jig.class_idx)?.method(method_idx)?;
        if method.is_static {
            return Err(ExecError::validation(format!(
                "{} is static; use exec",
                method.name
            )));
        }

        let params = self.lower_args(jig.container, args, &method.args)?;
        self.store.data_mut().mark_affected(jig_idx)?;
        let ret = jig::call_method(&mut self.cx(), jig_idx, method, &params)?;
        self.push_return(jig.container, method.rtype.as_ref(), ret)
    }

    /// Call a static method of an exported class.
    pub fn exec(
        &mut self,
        stmt_idx: u16,
        class_idx: u16,
        method_idx: u16,
        args: &[Arg],
    ) -> Result<usize, ExecError> {
        let container = self.store.data().statement(stmt_idx)?.as_package()?;
        let abi = self.store.data().container(container)?.abi.clone();
        let method = abi.class(class_idx)?.method(method_idx)?;
        if !method.is_static {
            return Err(ExecError::validation(format!(
                "{} is not static; use call",
                method.name
            )));
        }
        let params = self.lower_args(container, args, &method.args)?;
        let ret = call_export(&mut self.cx(), container, &method.export_name, &params)?;
        self.push_return(container, method.rtype.as_ref(), ret)
    }

    /// Call an exported function.
    pub fn exec_func(&mut self, stmt_idx: u16, fn_idx: u16, args: &[Arg]) -> Result<usize, ExecError> {
        let container = self.store.data().statement(stmt_idx)?.as_package()?;
        let abi = self.store.data().container(container)?.abi.clone();
        let function = abi.function(fn_idx)?;
        let params = self.lower_args(container, args, &function.args)?;
        let ret = call_export(&mut self.cx(), container, &function.name, &params)?;
        self.push_return(container, function.rtype.as_ref(), ret)
    }

    /// Spend a coin toward the transaction's funding and freeze it.
    pub fn fund(&mut self, stmt_idx: u16) -> Result<usize, ExecError> {
        let jig_idx = self.jig_at(stmt_idx)?;
        let state = self.store.data();
        let jig = state.jig(jig_idx)?.clone();
        if jig.class_ptr != COIN_CLS_PTR {
            return Err(ExecError::validation(format!(
                "jig {} is not a coin",
                jig.origin
            )));
        }
        if !jig.lock.can_be_changed(None, &state.signers) {
            return Err(ExecError::authorization(format!(
                "coin {} cannot be spent by this transaction",
                jig.origin
            )));
        }
        let abi = state.container(jig.container)?.abi.clone();
        let amount_pos = abi
            .class(jig.class_idx)?
            .state_fields()
            .iter()
            .position(|f| f.name == "amount")
            .ok_or_else(|| ExecError::validation("coin class has no amount field"))?;

        let values = state_values(&mut self.cx(), jig_idx)?;
        let amount = values
            .get(amount_pos)
            .and_then(Value::as_u64)
            .ok_or_else(|| ExecError::validation("coin amount is not an unsigned integer"))?;
        let state = self.store.data_mut();
        state.fund_amount = state
            .fund_amount
            .checked_add(amount)
            .ok_or_else(|| ExecError::validation("funding amount overflow"))?;

        set_lock(&mut self.cx(), jig_idx, Lock::Frozen)?;
        self.store.data_mut().mark_affected(jig_idx)?;
        debug!(coin = %jig.origin, amount, "funded transaction");
        self.push(StatementResult::Empty)
    }

    /// Lock the jig at `stmt_idx` to an address.
    pub fn lock(&mut self, stmt_idx: u16, address: &Address) -> Result<usize, ExecError> {
        let jig_idx = self.jig_at(stmt_idx)?;
        let state = self.store.data();
        let jig = state.jig(jig_idx)?;
        let next = Lock::Address(*address);
        check_transition(
            &jig.lock,
            &next,
            state.stack.acting_on(&jig.origin),
            &state.signers,
            false,
        )?;
        set_lock(&mut self.cx(), jig_idx, next)?;
        self.store.data_mut().mark_affected(jig_idx)?;
        self.push(StatementResult::Empty)
    }

    /// Compile and instantiate a new package.
    pub async fn deploy(
        &mut self,
        entries: Vec<String>,
        sources: BTreeMap<String, String>,
    ) -> Result<usize, ExecError> {
        let (context, cost) = {
            let state = self.store.data_mut();
            (state.context.clone(), state.opts.deploy_hydro_cost)
        };
        self.store.data_mut().measurements.deploys.add(cost)?;

        let expected = package_id(&entries, &sources)?;
        let pkg = context.compile(entries, sources).await?;
        if pkg.id != expected {
            return Err(ExecError::validation(format!(
                "compiled package id {} does not match its sources",
                pkg.id_hex()
            )));
        }
        let container = instantiate(&mut self.cx(), &pkg)?;
        info!(package = %pkg.id_hex(), "deployed package");
        let pkg_id = pkg.id;
        self.store.data_mut().deploys.push(Arc::new(pkg));
        self.push(StatementResult::Package { container, pkg_id })
    }

    /// Record a signature. Verification happens before execution starts.
    pub fn sign(&mut self, _sig: &Signature, pubkey: &PublicKey) -> Result<usize, ExecError> {
        if !self.store.data().context.signers().contains(pubkey) {
            return Err(ExecError::authorization(format!(
                "signature by {} was not verified",
                hex::encode(pubkey)
            )));
        }
        self.push(StatementResult::Empty)
    }

    /// Record a signature over a transaction prefix.
    pub fn sign_to(&mut self, sig: &Signature, pubkey: &PublicKey) -> Result<usize, ExecError> {
        self.sign(sig, pubkey)
    }

    // ─── Whole transactions ─────────────────────────────────────────────

    /// Interpret every instruction of `tx` in order.
    pub async fn run(&mut self, tx: &Tx) -> Result<(), ExecError> {
        for (position, instruction) in tx.instructions.iter().enumerate() {
            debug!(position, opcode = ?instruction.opcode(), "executing instruction");
            match instruction {
                Instruction::Import { pkg_id } => self.import(pkg_id)?,
                Instruction::Load { output_id } => self.load(output_id)?,
                Instruction::LoadByOrigin { origin } => self.load_by_origin(origin)?,
                Instruction::New {
                    idx,
                    export_idx,
                    args,
                } => self.instantiate(*idx, *export_idx, args)?,
                Instruction::Call {
                    idx,
                    method_idx,
                    args,
                } => self.call(*idx, *method_idx, args)?,
                Instruction::Exec {
                    idx,
                    export_idx,
                    method_idx,
                    args,
                } => self.exec(*idx, *export_idx, *method_idx, args)?,
                Instruction::ExecFunc {
                    idx,
                    export_idx,
                    args,
                } => self.exec_func(*idx, *export_idx, args)?,
                Instruction::Fund { idx } => self.fund(*idx)?,
                Instruction::Lock { idx, address } => self.lock(*idx, address)?,
                Instruction::Deploy { entries, sources } => {
                    self.deploy(entries.clone(), sources.clone()).await?
                }
                Instruction::Sign { sig, pubkey } => self.sign(sig, pubkey)?,
                Instruction::SignTo { sig, pubkey } => self.sign_to(sig, pubkey)?,
            };
        }
        Ok(())
    }

    /// Check the end state and produce the transaction's outputs.
    pub fn finalize(mut self) -> Result<ExecutionResult, ExecError> {
        self.sync_fuel()?;
        let state = self.store.data();
        if state.fund_amount < state.opts.min_fund_amount {
            return Err(ExecError::InsufficientFunding {
                provided: state.fund_amount,
                required: state.opts.min_fund_amount,
            });
        }
        if let Some(open) = state.jigs.iter().find(|j| j.lock.is_open()) {
            return Err(ExecError::authorization(format!(
                "jig {} was left without a lock",
                open.origin
            )));
        }
        if !state.stack.is_empty() {
            return Err(ExecError::invariant("caller stack not empty at finalize"));
        }

        let tx_hash = state.tx_hash;
        let affected = state.affected.clone();
        let mut outputs = Vec::with_capacity(affected.len());
        for (slot, origin) in affected.iter().enumerate() {
            let jig_idx = self
                .store
                .data()
                .jig_index(origin)
                .ok_or_else(|| ExecError::invariant(format!("affected jig {origin} is missing")))?;
            let values = state_values(&mut self.cx(), jig_idx)?;
            let state = self.store.data_mut();
            let slot = u16::try_from(slot)
                .map_err(|_| ExecError::validation("too many outputs in one transaction"))?;
            let location = Pointer::new(tx_hash, slot);
            let jig = state
                .jigs
                .get_mut(jig_idx)
                .ok_or_else(|| ExecError::invariant(format!("no jig #{jig_idx}")))?;
            jig.location = location;
            outputs.push(Output {
                origin: jig.origin,
                location,
                class_ptr: jig.class_ptr,
                lock: jig.lock.to_serialized(),
                state: encode_values(&values)?,
            });
        }

        let state = self.store.data_mut();
        let mut spends = Vec::new();
        let mut reads = Vec::new();
        for jig in &state.jigs {
            let Some(input) = &jig.input else {
                continue;
            };
            if affected.contains(&jig.origin) {
                spends.push(input.clone());
            } else {
                reads.push(input.clone());
            }
        }
        let deploys = state.deploys.iter().map(|pkg| (**pkg).clone()).collect();
        let hydros_used = state.measurements.clear();

        info!(
            tx = %hex::encode(tx_hash),
            outputs = outputs.len(),
            spends = spends.len(),
            reads = reads.len(),
            hydros_used,
            "finalized transaction"
        );
        Ok(ExecutionResult {
            tx_hash,
            outputs,
            spends,
            reads,
            deploys,
            hydros_used,
        })
    }
}
