//! The ledger-facing facade: verifies, executes and persists transactions
//! one at a time.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jig_crypto::hash::blake3_hash_multi;
use jig_crypto::package::package_id;
use jig_crypto::tx::verify_tx;
use jig_storage::ledger::LedgerStore;
use jig_storage::traits::BatchWriter;
use jig_types::abi::Abi;
use jig_types::lock::SerializedLock;
use jig_types::output::Output;
use jig_types::package::PkgData;
use jig_types::pointer::{Pointer, COIN_CLS_PTR};
use jig_types::primitives::{Address, OutputId, PackageId, PublicKey, TxHash};
use jig_types::tx::Tx;
use jig_types::value::{encode_values, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::builtins::coin_package;
use crate::config::ExecOpts;
use crate::context::ExecContext;
use crate::error::ExecError;
use crate::execution::TxExecution;
use crate::result::ExecutionResult;
use crate::runtime::Runtime;

// ─── Compiler ───────────────────────────────────────────────────────────────

/// Output of the contract compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPackage {
    pub wasm: Vec<u8>,
    pub abi: Abi,
    pub docs: Vec<u8>,
}

/// Turns package sources into a module and its ABI. The engine treats it
/// as a black box.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(
        &self,
        entries: &[String],
        sources: &BTreeMap<String, String>,
    ) -> Result<CompiledPackage, ExecError>;
}

// ─── StorageContext ─────────────────────────────────────────────────────────

/// [`ExecContext`] backed by a [`LedgerStore`].
pub struct StorageContext<S: BatchWriter> {
    ledger: Arc<LedgerStore<S>>,
    compiler: Option<Arc<dyn Compiler>>,
    tx_hash: TxHash,
    signers: Vec<PublicKey>,
}

impl<S: BatchWriter> StorageContext<S> {
    pub fn new(
        ledger: Arc<LedgerStore<S>>,
        compiler: Option<Arc<dyn Compiler>>,
        tx_hash: TxHash,
        signers: Vec<PublicKey>,
    ) -> Self {
        Self {
            ledger,
            compiler,
            tx_hash,
            signers,
        }
    }
}

#[async_trait]
impl<S: BatchWriter + 'static> ExecContext for StorageContext<S> {
    fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    fn output_by_id(&self, id: &OutputId) -> Result<Output, ExecError> {
        let output = self
            .ledger
            .output_by_id(id)?
            .ok_or_else(|| ExecError::not_found(format!("output {}", hex::encode(id))))?;
        let tip = self.ledger.output_by_origin(&output.origin)?;
        if tip.map(|t| t.id()) != Some(*id) {
            return Err(ExecError::validation(format!(
                "output {} is already spent",
                hex::encode(id)
            )));
        }
        Ok(output)
    }

    fn input_by_origin(&self, origin: &Pointer) -> Result<Output, ExecError> {
        self.ledger
            .output_by_origin(origin)?
            .ok_or_else(|| ExecError::not_found(format!("jig {origin}")))
    }

    fn wasm_from_pkg_id(&self, id: &PackageId) -> Result<Arc<PkgData>, ExecError> {
        self.ledger
            .package(id)?
            .map(Arc::new)
            .ok_or_else(|| ExecError::not_found(format!("package {}", hex::encode(id))))
    }

    async fn compile(
        &self,
        entries: Vec<String>,
        sources: BTreeMap<String, String>,
    ) -> Result<PkgData, ExecError> {
        let compiler = self.compiler.as_ref().ok_or_else(|| ExecError::CompileError {
            reason: "no compiler configured".to_string(),
        })?;
        let compiled = compiler.compile(&entries, &sources).await?;
        Ok(PkgData {
            id: package_id(&entries, &sources)?,
            abi: compiled.abi,
            wasm: compiled.wasm,
            entries,
            sources,
            docs: compiled.docs,
        })
    }

    fn signers(&self) -> Vec<PublicKey> {
        self.signers.clone()
    }
}

// ─── Vm ─────────────────────────────────────────────────────────────────────

/// Executes transactions against a ledger.
///
/// Transactions are serialized: each one finalizes and is persisted before
/// the next starts. A failed transaction leaves the ledger untouched.
pub struct Vm<S: BatchWriter> {
    runtime: Arc<Runtime>,
    ledger: Arc<LedgerStore<S>>,
    compiler: Option<Arc<dyn Compiler>>,
    opts: ExecOpts,
    exec_lock: Mutex<()>,
}

impl<S: BatchWriter + 'static> Vm<S> {
    /// Create a VM over `store`, registering the built-in packages.
    pub fn new(store: S, opts: ExecOpts) -> Result<Self, ExecError> {
        let ledger = Arc::new(LedgerStore::new(store));
        let coin = coin_package()?;
        if !ledger.has_package(&coin.id)? {
            ledger.add_package(&coin)?;
        }
        Ok(Self {
            runtime: Arc::new(Runtime::new()?),
            ledger,
            compiler: None,
            opts,
            exec_lock: Mutex::new(()),
        })
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn opts(&self) -> &ExecOpts {
        &self.opts
    }

    pub fn ledger(&self) -> &LedgerStore<S> {
        &self.ledger
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Register a precompiled package. Its module and ABI are validated
    /// before anything is stored.
    pub fn add_package(&self, pkg: &PkgData) -> Result<(), ExecError> {
        self.runtime.prepare(pkg)?;
        self.ledger.add_package(pkg)?;
        info!(package = %pkg.id_hex(), "registered package");
        Ok(())
    }

    /// Create a coin locked to `address` outside of any transaction.
    ///
    /// The origin hashes the recipient, the amount and the first nonce
    /// whose origin the ledger has not seen yet.
    pub async fn mint(&self, address: &Address, amount: u64) -> Result<Output, ExecError> {
        let _guard = self.exec_lock.lock().await;
        let mut nonce = 0u64;
        let location = loop {
            let id = blake3_hash_multi(&[
                b"jig mint".as_slice(),
                address.as_slice(),
                amount.to_le_bytes().as_slice(),
                nonce.to_le_bytes().as_slice(),
            ]);
            let location = Pointer::new(id, 0);
            if self.ledger.output_by_origin(&location)?.is_none() {
                break location;
            }
            nonce += 1;
        };
        let output = Output {
            origin: location,
            location,
            class_ptr: COIN_CLS_PTR,
            lock: SerializedLock::address(address),
            state: encode_values(&[Value::U64(amount)])?,
        };
        self.ledger.add_output(&output)?;
        info!(address = %hex::encode(address), amount, "minted coin");
        Ok(output)
    }

    /// Verify a transaction's signatures and prepare its execution
    /// against the current ledger without running anything.
    pub fn begin(&self, tx: &Tx) -> Result<TxExecution, ExecError> {
        let signers = verify_tx(tx)?;
        let context = Arc::new(StorageContext::new(
            self.ledger.clone(),
            self.compiler.clone(),
            tx.hash()?,
            signers,
        ));
        TxExecution::new(self.runtime.clone(), context, self.opts.clone())
    }

    /// Verify, execute and persist a transaction.
    pub async fn exec_tx(&self, tx: &Tx) -> Result<ExecutionResult, ExecError> {
        let _guard = self.exec_lock.lock().await;
        let tx_hash = tx.hash()?;
        let mut execution = self.begin(tx)?;
        let result = match execution.run(tx).await {
            Ok(()) => execution.finalize(),
            Err(err) => Err(err),
        };
        let result = match result {
            Ok(result) => result,
            Err(err) => {
                warn!(tx = %hex::encode(tx_hash), error = %err, "transaction failed");
                return Err(err);
            }
        };

        self.ledger.commit(&result.outputs, &result.deploys)?;
        info!(
            tx = %hex::encode(tx_hash),
            outputs = result.outputs.len(),
            hydros_used = result.hydros_used,
            "committed transaction"
        );
        Ok(result)
    }
}
