//! End-to-end transactions against hand-written modules: creation, calls,
//! jig-owned locks, cross-package objects, deploys, funding and metering.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use jig_crypto::package::package_id;
use jig_crypto::keys::Keypair;
use jig_crypto::tx::sign_tx;
use jig_storage::memory::MemoryStore;
use jig_types::abi::Abi;
use jig_types::instruction::{Arg, Instruction};
use jig_types::lock::{LockType, SerializedLock};
use jig_types::output::Output;
use jig_types::package::PkgData;
use jig_types::pointer::Pointer;
use jig_types::primitives::{PackageId, COIN_PKG_ID};
use jig_types::tx::Tx;
use jig_types::value::Value;
use jig_vm::builtins::ALLOCATOR_WAT;
use jig_vm::config::ExecOpts;
use jig_vm::error::ExecError;
use jig_vm::result::ExecutionResult;
use jig_vm::statement::StatementResult;
use jig_vm::vm::{CompiledPackage, Compiler, Vm};
use tracing_subscriber::EnvFilter;

const COUNTER_PKG: PackageId = [0x11; 32];

// Export indexes: Counter 0, Holder 1, spin 2, Tagger 3.
// Counter methods: grow 0, peek 1. Holder methods: grow_inner 0.
const COUNTER_ABI: &str = r#"{
    "version": 1,
    "exports": [
        {
            "kind": "class",
            "name": "Counter",
            "fields": [{ "name": "size", "type": { "name": "u32" } }],
            "methods": [
                { "name": "constructor" },
                { "name": "grow", "rtype": { "name": "u32" } },
                {
                    "name": "peek",
                    "static": true,
                    "args": [{ "name": "n", "type": { "name": "u32" } }],
                    "rtype": { "name": "u32" }
                }
            ]
        },
        {
            "kind": "class",
            "name": "Holder",
            "fields": [{ "name": "inner", "type": { "name": "Counter" } }],
            "methods": [
                { "name": "constructor" },
                { "name": "grow_inner", "rtype": { "name": "u32" } }
            ]
        },
        {
            "kind": "function",
            "name": "spin",
            "args": [{ "name": "n", "type": { "name": "u32" } }]
        },
        {
            "kind": "class",
            "name": "Tagger",
            "fields": [{ "name": "seen", "type": { "name": "u32" } }],
            "methods": [
                {
                    "name": "constructor",
                    "args": [{ "name": "counter", "type": { "name": "Counter" } }]
                }
            ]
        }
    ],
    "type_ids": [
        { "id": 10, "name": "Counter" },
        { "id": 11, "name": "Holder" },
        { "id": 12, "name": "Tagger" }
    ]
}"#;

// Counter: $output 0, $lock 4, size 8 (12 bytes).
// Holder: $output 0, $lock 4, inner 8 (12 bytes).
// Tagger: $output 0, $lock 4, seen 8 (12 bytes). Its constructor grows the
// counter it is given before linking itself.
// Managed strings "Counter" at 24 and "grow" at 48.
fn counter_wat() -> String {
    format!(
        r#"(module
  (import "vm" "jig_link" (func $jig_link (param i32 i32)))
  (import "vm" "constructor_local" (func $constructor_local (param i32 i32) (result i32)))
  (import "vm" "call_method" (func $call_method (param i32 i32 i32) (result i64)))
  (import "vm" "jig_lock" (func $jig_lock (param i32 i32 i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (data (i32.const 16) "\02\00\00\00\07\00\00\00Counter")
  (data (i32.const 40) "\02\00\00\00\04\00\00\00grow")
  {ALLOCATOR_WAT}
  (func $origin (param $obj i32) (result i32)
    (i32.load (i32.load (local.get $obj))))
  (func (export "__Counter_constructor") (result i32)
    (local $self i32)
    (local.set $self (call $new (i32.const 12) (i32.const 10)))
    (call $jig_link (local.get $self) (i32.const 10))
    (local.get $self))
  (func (export "__Counter_grow") (param $self i32) (result i32)
    (i32.store offset=8 (local.get $self)
      (i32.add (i32.load offset=8 (local.get $self)) (i32.const 1)))
    (i32.load offset=8 (local.get $self)))
  (func (export "__Counter_peek") (param $n i32) (result i32)
    (i32.add (local.get $n) (i32.const 1)))
  (func (export "__Holder_constructor") (result i32)
    (local $self i32)
    (local $inner i32)
    (local.set $self (call $new (i32.const 12) (i32.const 11)))
    (call $jig_link (local.get $self) (i32.const 11))
    (local.set $inner (call $constructor_local (i32.const 24) (i32.const 0)))
    (i32.store offset=8 (local.get $self) (local.get $inner))
    (call $jig_lock (call $origin (local.get $inner)) (i32.const 2) (i32.const 0))
    (local.get $self))
  (func (export "__Holder_grow_inner") (param $self i32) (result i32)
    (i32.wrap_i64
      (call $call_method
        (call $origin (i32.load offset=8 (local.get $self)))
        (i32.const 48)
        (i32.const 0))))
  (func (export "__Tagger_constructor") (param $counter i32) (result i32)
    (local $seen i32)
    (local $self i32)
    (local.set $seen
      (i32.wrap_i64
        (call $call_method (call $origin (local.get $counter)) (i32.const 48) (i32.const 0))))
    (local.set $self (call $new (i32.const 12) (i32.const 12)))
    (call $jig_link (local.get $self) (i32.const 12))
    (i32.store offset=8 (local.get $self) (local.get $seen))
    (local.get $self))
  (func (export "spin") (param $n i32)
    (loop $again
      (if (local.get $n)
        (then
          (local.set $n (i32.sub (local.get $n) (i32.const 1)))
          (br $again)))))
)"#
    )
}

const KEEPER_PKG: PackageId = [0x22; 32];

// Keeper imports Counter from the counter package and owns one through a
// proxy: $output 0, $lock 4, counter 8 (12 bytes).
fn keeper_abi() -> String {
    format!(
        r#"{{
    "version": 1,
    "exports": [
        {{
            "kind": "class",
            "name": "Keeper",
            "fields": [{{ "name": "counter", "type": {{ "name": "Counter" }} }}],
            "methods": [
                {{ "name": "constructor" }},
                {{ "name": "bump", "rtype": {{ "name": "u32" }} }}
            ]
        }}
    ],
    "imports": [{{ "kind": "class", "name": "Counter", "pkg": "{pkg}" }}],
    "type_ids": [{{ "id": 10, "name": "Keeper" }}]
}}"#,
        pkg = hex::encode(COUNTER_PKG)
    )
}

// Managed strings "Counter" at 24, "grow" at 48 and the counter package id
// in hex at 72.
fn keeper_wat() -> String {
    format!(
        r#"(module
  (import "vm" "jig_link" (func $jig_link (param i32 i32)))
  (import "vm" "constructor_remote" (func $constructor_remote (param i32 i32 i32) (result i32)))
  (import "vm" "call_method" (func $call_method (param i32 i32 i32) (result i64)))
  (import "vm" "jig_lock" (func $jig_lock (param i32 i32 i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (data (i32.const 16) "\02\00\00\00\07\00\00\00Counter")
  (data (i32.const 40) "\02\00\00\00\04\00\00\00grow")
  (data (i32.const 64) "\02\00\00\00\40\00\00\00{pkg}")
  {ALLOCATOR_WAT}
  (func $origin (param $obj i32) (result i32)
    (i32.load (i32.load (local.get $obj))))
  (func (export "__Keeper_constructor") (result i32)
    (local $self i32)
    (local $counter i32)
    (local.set $self (call $new (i32.const 12) (i32.const 10)))
    (call $jig_link (local.get $self) (i32.const 10))
    (local.set $counter (call $constructor_remote (i32.const 72) (i32.const 24) (i32.const 0)))
    (i32.store offset=8 (local.get $self) (local.get $counter))
    (call $jig_lock (call $origin (local.get $counter)) (i32.const 2) (i32.const 0))
    (local.get $self))
  (func (export "__Keeper_bump") (param $self i32) (result i32)
    (i32.wrap_i64
      (call $call_method
        (call $origin (i32.load offset=8 (local.get $self)))
        (i32.const 48)
        (i32.const 0))))
)"#,
        pkg = hex::encode(COUNTER_PKG)
    )
}

fn keeper_package() -> PkgData {
    PkgData {
        id: KEEPER_PKG,
        abi: Abi::from_json(&keeper_abi()).unwrap(),
        wasm: wat::parse_str(keeper_wat()).unwrap(),
        entries: vec!["keeper.ts".to_string()],
        sources: Default::default(),
        docs: vec![],
    }
}

/// Compiles any sources into the counter module.
struct CounterCompiler;

#[async_trait]
impl Compiler for CounterCompiler {
    async fn compile(
        &self,
        _entries: &[String],
        _sources: &BTreeMap<String, String>,
    ) -> Result<CompiledPackage, ExecError> {
        Ok(CompiledPackage {
            wasm: wat::parse_str(counter_wat()).unwrap(),
            abi: Abi::from_json(COUNTER_ABI).unwrap(),
            docs: vec![],
        })
    }
}

fn counter_sources() -> (Vec<String>, BTreeMap<String, String>) {
    let entries = vec!["counter.ts".to_string()];
    let sources = BTreeMap::from([(
        "counter.ts".to_string(),
        "export class Counter extends Jig { size: u32 = 0 }".to_string(),
    )]);
    (entries, sources)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn counter_package() -> PkgData {
    PkgData {
        id: COUNTER_PKG,
        abi: Abi::from_json(COUNTER_ABI).unwrap(),
        wasm: wat::parse_str(counter_wat()).unwrap(),
        entries: vec!["counter.ts".to_string()],
        sources: Default::default(),
        docs: vec![],
    }
}

fn vm_with(opts: ExecOpts) -> Vm<MemoryStore> {
    init_tracing();
    let vm = Vm::new(MemoryStore::new(), opts).unwrap();
    vm.add_package(&counter_package()).unwrap();
    vm
}

fn state_of(output: &Output) -> Vec<Value> {
    output.state_values().unwrap()
}

fn output_of_class(result: &ExecutionResult, class_idx: u16) -> &Output {
    result
        .outputs
        .iter()
        .find(|o| o.class_ptr == Pointer::new(COUNTER_PKG, class_idx))
        .expect("no output of class")
}

/// Creates a Holder (which creates and jig-locks a Counter) and locks the
/// holder to `owner`.
async fn create_holder(vm: &Vm<MemoryStore>, owner: &Keypair) -> ExecutionResult {
    let mut tx = Tx::new(vec![
        Instruction::Import {
            pkg_id: COUNTER_PKG,
        },
        Instruction::New {
            idx: 0,
            export_idx: 1,
            args: vec![],
        },
        Instruction::Lock {
            idx: 1,
            address: owner.address(),
        },
    ]);
    sign_tx(&mut tx, owner).unwrap();
    vm.exec_tx(&tx).await.unwrap()
}

#[tokio::test]
async fn test_counter_grows_and_locks() {
    let vm = vm_with(ExecOpts::unfunded());
    let owner = [0x42u8; 20];
    let tx = Tx::new(vec![
        Instruction::Import {
            pkg_id: COUNTER_PKG,
        },
        Instruction::New {
            idx: 0,
            export_idx: 0,
            args: vec![],
        },
        Instruction::Call {
            idx: 1,
            method_idx: 0,
            args: vec![],
        },
        Instruction::Call {
            idx: 1,
            method_idx: 0,
            args: vec![],
        },
        Instruction::Call {
            idx: 1,
            method_idx: 0,
            args: vec![],
        },
        Instruction::Lock {
            idx: 1,
            address: owner,
        },
    ]);
    let result = vm.exec_tx(&tx).await.unwrap();

    assert_eq!(result.outputs.len(), 1);
    let output = &result.outputs[0];
    assert_eq!(state_of(output), vec![Value::U32(3)]);
    assert_eq!(output.lock, SerializedLock::address(&owner));
    assert_eq!(output.origin, Pointer::new(tx.hash().unwrap(), 0));
    assert_eq!(output.location, output.origin);
    assert!(result.spends.is_empty());
    assert!(result.hydros_used > 0);

    let stored = vm.ledger().output_by_origin(&output.origin).unwrap().unwrap();
    assert_eq!(&stored, output);
    assert_eq!(vm.ledger().outputs_by_address(&owner).unwrap().len(), 1);
}

#[tokio::test]
async fn test_calls_on_same_statement_see_each_other() {
    let vm = vm_with(ExecOpts::unfunded());
    let tx = Tx::new(vec![
        Instruction::Import {
            pkg_id: COUNTER_PKG,
        },
        Instruction::New {
            idx: 0,
            export_idx: 0,
            args: vec![],
        },
        Instruction::Call {
            idx: 1,
            method_idx: 0,
            args: vec![],
        },
        Instruction::Call {
            idx: 1,
            method_idx: 0,
            args: vec![],
        },
    ]);
    let mut execution = vm.begin(&tx).unwrap();
    execution.run(&tx).await.unwrap();

    let statements = execution.statements();
    assert_eq!(statements.len(), 4);
    assert_eq!(statements[2].as_value().unwrap(), &Value::U32(1));
    assert_eq!(statements[3].as_value().unwrap(), &Value::U32(2));

    // The counter was never locked.
    match execution.finalize().unwrap_err() {
        ExecError::Authorization { .. } => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_jig_locked_child_only_callable_through_owner() {
    let vm = vm_with(ExecOpts::unfunded());
    let owner = Keypair::from_seed(&[7u8; 32]);
    let created = create_holder(&vm, &owner).await;

    assert_eq!(created.outputs.len(), 2);
    let holder = output_of_class(&created, 1).clone();
    let counter = output_of_class(&created, 0).clone();
    assert_eq!(counter.lock, SerializedLock::jig(&holder.origin));
    assert_eq!(state_of(&holder), vec![Value::Jig(counter.origin)]);

    // Direct call with an empty caller stack.
    let mut direct = Tx::new(vec![
        Instruction::LoadByOrigin {
            origin: counter.origin,
        },
        Instruction::Call {
            idx: 0,
            method_idx: 0,
            args: vec![],
        },
    ]);
    sign_tx(&mut direct, &owner).unwrap();
    match vm.exec_tx(&direct).await.unwrap_err() {
        ExecError::Authorization { .. } => {}
        other => panic!("unexpected error: {other}"),
    }

    // The same call routed through the owner.
    let mut routed = Tx::new(vec![
        Instruction::LoadByOrigin {
            origin: holder.origin,
        },
        Instruction::Call {
            idx: 0,
            method_idx: 0,
            args: vec![],
        },
    ]);
    sign_tx(&mut routed, &owner).unwrap();
    let result = vm.exec_tx(&routed).await.unwrap();

    assert_eq!(result.outputs.len(), 2);
    assert_eq!(result.spends.len(), 2);
    let grown = result.output_for(&counter.origin).unwrap();
    assert_eq!(state_of(grown), vec![Value::U32(1)]);
    assert_eq!(grown.lock.kind, LockType::Jig);
    assert_eq!(grown.location, Pointer::new(routed.hash().unwrap(), 1));
}

#[tokio::test]
async fn test_address_lock_requires_signature() {
    let vm = vm_with(ExecOpts::unfunded());
    let owner = Keypair::from_seed(&[7u8; 32]);
    let stranger = Keypair::from_seed(&[8u8; 32]);
    let created = create_holder(&vm, &owner).await;
    let holder = output_of_class(&created, 1).clone();

    let mut tx = Tx::new(vec![
        Instruction::LoadByOrigin {
            origin: holder.origin,
        },
        Instruction::Call {
            idx: 0,
            method_idx: 0,
            args: vec![],
        },
    ]);
    sign_tx(&mut tx, &stranger).unwrap();
    match vm.exec_tx(&tx).await.unwrap_err() {
        ExecError::Authorization { .. } => {}
        other => panic!("unexpected error: {other}"),
    }
    // Nothing was persisted.
    assert_eq!(
        vm.ledger().output_by_origin(&holder.origin).unwrap().unwrap(),
        holder
    );
}

#[tokio::test]
async fn test_static_method_and_function() {
    let vm = vm_with(ExecOpts::unfunded());
    let tx = Tx::new(vec![
        Instruction::Import {
            pkg_id: COUNTER_PKG,
        },
        Instruction::Exec {
            idx: 0,
            export_idx: 0,
            method_idx: 1,
            args: vec![Arg::Literal(Value::U32(41))],
        },
        Instruction::ExecFunc {
            idx: 0,
            export_idx: 2,
            args: vec![Arg::Ref(1)],
        },
    ]);
    let mut execution = vm.begin(&tx).unwrap();
    execution.run(&tx).await.unwrap();
    assert_eq!(execution.statements()[1].as_value().unwrap(), &Value::U32(42));
    assert_eq!(execution.statements()[2], StatementResult::Empty);
    let result = execution.finalize().unwrap();
    assert!(result.outputs.is_empty());
}

#[tokio::test]
async fn test_operand_errors() {
    let vm = vm_with(ExecOpts::unfunded());
    let bad_ref = Tx::new(vec![
        Instruction::Import {
            pkg_id: COUNTER_PKG,
        },
        Instruction::Call {
            idx: 9,
            method_idx: 0,
            args: vec![],
        },
    ]);
    match vm.exec_tx(&bad_ref).await.unwrap_err() {
        ExecError::NotFound { .. } => {}
        other => panic!("unexpected error: {other}"),
    }

    let package_as_jig = Tx::new(vec![
        Instruction::Import {
            pkg_id: COUNTER_PKG,
        },
        Instruction::Call {
            idx: 0,
            method_idx: 0,
            args: vec![],
        },
    ]);
    match vm.exec_tx(&package_as_jig).await.unwrap_err() {
        ExecError::Validation { .. } => {}
        other => panic!("unexpected error: {other}"),
    }

    let wrong_arity = Tx::new(vec![
        Instruction::Import {
            pkg_id: COUNTER_PKG,
        },
        Instruction::ExecFunc {
            idx: 0,
            export_idx: 2,
            args: vec![],
        },
    ]);
    match vm.exec_tx(&wrong_arity).await.unwrap_err() {
        ExecError::Validation { .. } => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_wasm_execution_is_metered() {
    let opts = ExecOpts {
        wasm_execution_hydro_size: 1_000,
        wasm_execution_max_hydros: 5,
        ..ExecOpts::unfunded()
    };
    let vm = vm_with(opts);
    let spin = |n: u32| {
        Tx::new(vec![
            Instruction::Import {
                pkg_id: COUNTER_PKG,
            },
            Instruction::ExecFunc {
                idx: 0,
                export_idx: 2,
                args: vec![Arg::Literal(Value::U32(n))],
            },
        ])
    };

    let result = vm.exec_tx(&spin(10)).await.unwrap();
    assert!(result.hydros_used >= 1);

    match vm.exec_tx(&spin(1_000_000)).await.unwrap_err() {
        ExecError::ResourceExhausted { counter, max } => {
            assert_eq!(counter, "wasm execution");
            assert_eq!(max, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_fund_with_coin() {
    let vm = vm_with(ExecOpts::default());
    let payer = Keypair::from_seed(&[9u8; 32]);
    let coin = vm.mint(&payer.address(), 500).await.unwrap();

    let mut tx = Tx::new(vec![
        Instruction::Load {
            output_id: coin.id(),
        },
        Instruction::Fund { idx: 0 },
    ]);
    sign_tx(&mut tx, &payer).unwrap();
    let result = vm.exec_tx(&tx).await.unwrap();

    assert_eq!(result.outputs.len(), 1);
    assert_eq!(result.outputs[0].lock, SerializedLock::frozen());
    assert_eq!(state_of(&result.outputs[0]), vec![Value::U64(500)]);
    assert_eq!(result.spends, vec![coin.clone()]);

    // The minted output is no longer the tip.
    match vm.exec_tx(&tx).await.unwrap_err() {
        ExecError::Validation { .. } => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_underfunded_and_unsigned() {
    let vm = vm_with(ExecOpts::default());
    let payer = Keypair::from_seed(&[9u8; 32]);
    let small = vm.mint(&payer.address(), 50).await.unwrap();

    let mut tx = Tx::new(vec![
        Instruction::Load {
            output_id: small.id(),
        },
        Instruction::Fund { idx: 0 },
    ]);
    sign_tx(&mut tx, &payer).unwrap();
    match vm.exec_tx(&tx).await.unwrap_err() {
        ExecError::InsufficientFunding { provided, required } => {
            assert_eq!(provided, 50);
            assert_eq!(required, 100);
        }
        other => panic!("unexpected error: {other}"),
    }

    let unsigned = Tx::new(vec![
        Instruction::Load {
            output_id: small.id(),
        },
        Instruction::Fund { idx: 0 },
    ]);
    match vm.exec_tx(&unsigned).await.unwrap_err() {
        ExecError::Authorization { .. } => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_new_jig_keeps_its_slot_when_constructor_touches_another() {
    let vm = vm_with(ExecOpts::unfunded());
    let owner = Keypair::from_seed(&[7u8; 32]);
    let mut create = Tx::new(vec![
        Instruction::Import {
            pkg_id: COUNTER_PKG,
        },
        Instruction::New {
            idx: 0,
            export_idx: 0,
            args: vec![],
        },
        Instruction::Lock {
            idx: 1,
            address: owner.address(),
        },
    ]);
    sign_tx(&mut create, &owner).unwrap();
    let counter = vm.exec_tx(&create).await.unwrap().outputs[0].clone();

    let mut tag = Tx::new(vec![
        Instruction::LoadByOrigin {
            origin: counter.origin,
        },
        Instruction::Import {
            pkg_id: COUNTER_PKG,
        },
        Instruction::New {
            idx: 1,
            export_idx: 3,
            args: vec![Arg::Ref(0)],
        },
        Instruction::Lock {
            idx: 2,
            address: owner.address(),
        },
    ]);
    sign_tx(&mut tag, &owner).unwrap();
    let result = vm.exec_tx(&tag).await.unwrap();
    let tx_hash = tag.hash().unwrap();

    assert_eq!(result.outputs.len(), 2);
    let tagger = output_of_class(&result, 3);
    assert_eq!(tagger.origin, Pointer::new(tx_hash, 0));
    assert_eq!(tagger.location, tagger.origin);
    assert_eq!(state_of(tagger), vec![Value::U32(1)]);

    let grown = result.output_for(&counter.origin).unwrap();
    assert_eq!(grown.location, Pointer::new(tx_hash, 1));
    assert_eq!(state_of(grown), vec![Value::U32(1)]);
    assert_eq!(result.spends, vec![counter]);
}

#[tokio::test]
async fn test_coins_cannot_be_constructed() {
    let vm = vm_with(ExecOpts::default());
    let tx = Tx::new(vec![
        Instruction::Import {
            pkg_id: COIN_PKG_ID,
        },
        Instruction::New {
            idx: 0,
            export_idx: 0,
            args: vec![Arg::Literal(Value::U64(1_000_000))],
        },
        Instruction::Fund { idx: 1 },
    ]);
    match vm.exec_tx(&tx).await.unwrap_err() {
        ExecError::Authorization { .. } => {}
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_mint_origins_survive_restart() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let payer = Keypair::from_seed(&[9u8; 32]);

    let first = {
        let vm = Vm::new(store.clone(), ExecOpts::default()).unwrap();
        let first = vm.mint(&payer.address(), 500).await.unwrap();
        let again = vm.mint(&payer.address(), 500).await.unwrap();
        assert_ne!(first.origin, again.origin);
        first
    };

    let vm = Vm::new(store.clone(), ExecOpts::default()).unwrap();
    let after_restart = vm.mint(&payer.address(), 500).await.unwrap();
    assert_ne!(after_restart.origin, first.origin);
    assert_eq!(
        vm.ledger().output_by_origin(&first.origin).unwrap().unwrap(),
        first
    );
    assert_eq!(vm.ledger().outputs_by_address(&payer.address()).unwrap().len(), 3);
}

#[tokio::test]
async fn test_imported_class_through_proxy() {
    let vm = vm_with(ExecOpts::unfunded());
    vm.add_package(&keeper_package()).unwrap();
    let owner = Keypair::from_seed(&[7u8; 32]);

    let mut create = Tx::new(vec![
        Instruction::Import { pkg_id: KEEPER_PKG },
        Instruction::New {
            idx: 0,
            export_idx: 0,
            args: vec![],
        },
        Instruction::Call {
            idx: 1,
            method_idx: 0,
            args: vec![],
        },
        Instruction::Lock {
            idx: 1,
            address: owner.address(),
        },
    ]);
    sign_tx(&mut create, &owner).unwrap();
    let mut execution = vm.begin(&create).unwrap();
    execution.run(&create).await.unwrap();
    assert_eq!(execution.statements()[2].as_value().unwrap(), &Value::U32(1));
    let result = vm.exec_tx(&create).await.unwrap();

    let tx_hash = create.hash().unwrap();
    let keeper = result
        .outputs
        .iter()
        .find(|o| o.class_ptr == Pointer::new(KEEPER_PKG, 0))
        .unwrap()
        .clone();
    let counter = output_of_class(&result, 0).clone();
    assert_eq!(keeper.origin, Pointer::new(tx_hash, 0));
    assert_eq!(counter.origin, Pointer::new(tx_hash, 1));
    assert_eq!(state_of(&keeper), vec![Value::Jig(counter.origin)]);
    assert_eq!(state_of(&counter), vec![Value::U32(1)]);
    assert_eq!(counter.lock, SerializedLock::jig(&keeper.origin));

    // Rehydrating the keeper rebuilds the proxy from the ledger.
    let mut bump = Tx::new(vec![
        Instruction::LoadByOrigin {
            origin: keeper.origin,
        },
        Instruction::Call {
            idx: 0,
            method_idx: 0,
            args: vec![],
        },
    ]);
    sign_tx(&mut bump, &owner).unwrap();
    let result = vm.exec_tx(&bump).await.unwrap();
    assert_eq!(result.outputs.len(), 2);
    let grown = result.output_for(&counter.origin).unwrap();
    assert_eq!(state_of(grown), vec![Value::U32(2)]);
    assert_eq!(
        state_of(result.output_for(&keeper.origin).unwrap()),
        vec![Value::Jig(counter.origin)]
    );
}

#[tokio::test]
async fn test_deploy_then_construct() {
    let vm = vm_with(ExecOpts::unfunded()).with_compiler(Arc::new(CounterCompiler));
    let owner = [0x42u8; 20];
    let (entries, sources) = counter_sources();
    let deployed_id = package_id(&entries, &sources).unwrap();

    let tx = Tx::new(vec![
        Instruction::Deploy {
            entries: entries.clone(),
            sources: sources.clone(),
        },
        Instruction::New {
            idx: 0,
            export_idx: 0,
            args: vec![],
        },
        Instruction::Lock {
            idx: 1,
            address: owner,
        },
    ]);
    let result = vm.exec_tx(&tx).await.unwrap();

    assert_eq!(result.deploys.len(), 1);
    assert_eq!(result.deploys[0].id, deployed_id);
    assert_eq!(result.deploys[0].entries, entries);
    assert_eq!(result.outputs.len(), 1);
    assert_eq!(result.outputs[0].class_ptr, Pointer::new(deployed_id, 0));
    assert!(result.hydros_used >= vm.opts().deploy_hydro_cost);
    assert!(vm.ledger().has_package(&deployed_id).unwrap());

    // The committed package is importable by later transactions.
    let reuse = Tx::new(vec![
        Instruction::Import {
            pkg_id: deployed_id,
        },
        Instruction::New {
            idx: 0,
            export_idx: 0,
            args: vec![],
        },
        Instruction::Lock {
            idx: 1,
            address: owner,
        },
    ]);
    let result = vm.exec_tx(&reuse).await.unwrap();
    assert!(result.deploys.is_empty());
    assert_eq!(result.outputs[0].class_ptr, Pointer::new(deployed_id, 0));
    assert_eq!(vm.ledger().outputs_by_address(&owner).unwrap().len(), 2);
}

#[tokio::test]
async fn test_deploy_errors() {
    let (entries, sources) = counter_sources();
    let deployed_id = package_id(&entries, &sources).unwrap();
    let deploy = Tx::new(vec![Instruction::Deploy { entries, sources }]);

    let vm = vm_with(ExecOpts::unfunded());
    match vm.exec_tx(&deploy).await.unwrap_err() {
        ExecError::CompileError { .. } => {}
        other => panic!("unexpected error: {other}"),
    }

    let opts = ExecOpts {
        deploy_max_hydros: 10,
        ..ExecOpts::unfunded()
    };
    let vm = vm_with(opts).with_compiler(Arc::new(CounterCompiler));
    match vm.exec_tx(&deploy).await.unwrap_err() {
        ExecError::ResourceExhausted { counter, .. } => assert_eq!(counter, "deploys"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!vm.ledger().has_package(&deployed_id).unwrap());
}
