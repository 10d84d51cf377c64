//! Packages every ledger carries from genesis.

use jig_types::abi::Abi;
use jig_types::package::PkgData;
use jig_types::primitives::COIN_PKG_ID;

use crate::error::ExecError;

/// Bump allocator satisfying the `__new(size, rtid) -> ptr` contract.
///
/// Objects are 8-byte aligned and preceded by an `{rtid, size}` header.
/// Memory grows on demand. Splice it into a module that declares a
/// `memory` export and a mutable `$heap` global.
pub const ALLOCATOR_WAT: &str = r#"
  (func $new (export "__new") (param $size i32) (param $rtid i32) (result i32)
    (local $ptr i32)
    (local $end i32)
    (local.set $ptr
      (i32.add
        (i32.and (i32.add (global.get $heap) (i32.const 7)) (i32.const -8))
        (i32.const 8)))
    (local.set $end (i32.add (local.get $ptr) (local.get $size)))
    (if (i32.gt_u (local.get $end) (i32.mul (memory.size) (i32.const 65536)))
      (then
        (if (i32.eq
              (memory.grow
                (i32.add
                  (i32.shr_u
                    (i32.sub (local.get $end) (i32.mul (memory.size) (i32.const 65536)))
                    (i32.const 16))
                  (i32.const 1)))
              (i32.const -1))
          (then unreachable))))
    (i32.store (i32.sub (local.get $ptr) (i32.const 8)) (local.get $rtid))
    (i32.store (i32.sub (local.get $ptr) (i32.const 4)) (local.get $size))
    (global.set $heap (local.get $end))
    (local.get $ptr))
"#;

/// Runtime type id of the `Coin` class.
pub const COIN_RTID: u32 = 3;

const COIN_ABI: &str = r#"{
    "version": 1,
    "exports": [
        {
            "kind": "class",
            "name": "Coin",
            "fields": [{ "name": "amount", "type": { "name": "u64" } }],
            "methods": [
                { "name": "constructor", "args": [{ "name": "amount", "type": { "name": "u64" } }] }
            ]
        }
    ],
    "type_ids": [{ "id": 3, "name": "Coin" }]
}"#;

/// Coin layout: `$output` at 0, `$lock` at 4, `amount` at 8; 16 bytes.
/// The constructor exists for the ABI only; the engine refuses to run it.
fn coin_wat() -> String {
    format!(
        r#"(module
  (import "vm" "jig_link" (func $jig_link (param i32 i32)))
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  {ALLOCATOR_WAT}
  (func (export "__Coin_constructor") (param $amount i64) (result i32)
    (local $self i32)
    (local.set $self (call $new (i32.const 16) (i32.const {COIN_RTID})))
    (call $jig_link (local.get $self) (i32.const {COIN_RTID}))
    (i64.store offset=8 (local.get $self) (local.get $amount))
    (local.get $self))
)"#
    )
}

/// The built-in coin package, stored under [`COIN_PKG_ID`].
pub fn coin_package() -> Result<PkgData, ExecError> {
    let wasm = wat::parse_str(coin_wat()).map_err(|e| ExecError::InvalidBytecode {
        reason: format!("built-in coin module: {e}"),
    })?;
    Ok(PkgData {
        id: COIN_PKG_ID,
        abi: Abi::from_json(COIN_ABI)?,
        wasm,
        entries: Vec::new(),
        sources: Default::default(),
        docs: Vec::new(),
    })
}
