use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use jig_types::abi::Abi;
use jig_types::output::Output;
use jig_types::package::PkgData;
use jig_types::pointer::Pointer;
use jig_types::primitives::{OutputId, PackageId, PublicKey, TxHash};
use wasmtime::{AsContextMut, Store};

use crate::builtins::ALLOCATOR_WAT;
use crate::config::ExecOpts;
use crate::container::instantiate;
use crate::context::ExecContext;
use crate::error::ExecError;
use crate::runtime::Runtime;
use crate::state::ExecState;

/// In-memory context serving fixed packages and outputs.
#[derive(Default)]
pub(crate) struct MockContext {
    pub packages: HashMap<PackageId, Arc<PkgData>>,
    pub outputs: HashMap<Pointer, Output>,
    pub signers: Vec<PublicKey>,
    /// Package handed back by `compile`, whatever the sources.
    pub compiled: Option<PkgData>,
}

#[async_trait]
impl ExecContext for MockContext {
    fn tx_hash(&self) -> TxHash {
        [0xAA; 32]
    }

    fn output_by_id(&self, id: &OutputId) -> Result<Output, ExecError> {
        self.outputs
            .values()
            .find(|o| &o.id() == id)
            .cloned()
            .ok_or_else(|| ExecError::not_found("output"))
    }

    fn input_by_origin(&self, origin: &Pointer) -> Result<Output, ExecError> {
        self.outputs
            .get(origin)
            .cloned()
            .ok_or_else(|| ExecError::not_found(format!("jig {origin}")))
    }

    fn wasm_from_pkg_id(&self, id: &PackageId) -> Result<Arc<PkgData>, ExecError> {
        self.packages
            .get(id)
            .cloned()
            .ok_or_else(|| ExecError::not_found("package"))
    }

    async fn compile(
        &self,
        _entries: Vec<String>,
        _sources: BTreeMap<String, String>,
    ) -> Result<PkgData, ExecError> {
        self.compiled.clone().ok_or_else(|| ExecError::CompileError {
            reason: "no compiler".to_string(),
        })
    }

    fn signers(&self) -> Vec<PublicKey> {
        self.signers.clone()
    }
}

/// A package with only an allocator and the given ABI.
pub(crate) fn bare_package(id: u8, abi_json: &str) -> PkgData {
    let wat = format!(
        r#"(module
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  {ALLOCATOR_WAT}
)"#
    );
    PkgData {
        id: [id; 32],
        abi: Abi::from_json(abi_json).unwrap(),
        wasm: wat::parse_str(wat).unwrap(),
        entries: vec![],
        sources: Default::default(),
        docs: vec![],
    }
}

/// A transaction store with `pkg` instantiated as container 0.
pub(crate) fn store_with(pkg: PkgData) -> Store<ExecState> {
    let runtime = Arc::new(Runtime::new().unwrap());
    let mut context = MockContext::default();
    context.packages.insert(pkg.id, Arc::new(pkg.clone()));
    let opts = ExecOpts::unfunded();
    let fuel = opts.fuel_budget();
    let state = ExecState::new(runtime.clone(), Arc::new(context), opts, vec![]);
    let mut store = Store::new(runtime.engine(), state);
    store.limiter(|state| &mut state.store_limits);
    store.set_fuel(fuel).unwrap();
    let idx = instantiate(&mut store.as_context_mut(), &pkg).unwrap();
    assert_eq!(idx, 0);
    store
}
