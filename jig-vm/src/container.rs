//! Instantiated package modules and raw access to their linear memory.

use std::sync::Arc;

use jig_types::package::PkgData;
use jig_types::primitives::PackageId;
use tracing::debug;
use wasmtime::{Instance, Memory, Trap, TypedFunc, Val};

use crate::abi::AbiAccess;
use crate::error::ExecError;
use crate::state::Cx;

/// Name of the guest allocator export: `__new(size, rtid) -> ptr`.
pub const ALLOC_EXPORT: &str = "__new";

/// Size of the object header the allocator writes before every pointer:
/// `rtid: u32` then `size: u32`.
pub const HEADER_SIZE: u32 = 8;

/// A package module instantiated inside the transaction store.
pub struct WasmContainer {
    pub id: PackageId,
    pub abi: Arc<AbiAccess>,
    pub(crate) instance: Instance,
    pub(crate) memory: Memory,
    pub(crate) alloc: TypedFunc<(i32, i32), i32>,
}

impl WasmContainer {
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

// ─── Instantiation ──────────────────────────────────────────────────────────

/// Index of the container for `pkg_id`, instantiating it on first use.
pub(crate) fn assert_container(cx: &mut Cx<'_>, pkg_id: &PackageId) -> Result<usize, ExecError> {
    if let Some(idx) = cx.data().container_index(pkg_id) {
        return Ok(idx);
    }
    let pkg = cx.data().context.wasm_from_pkg_id(pkg_id)?;
    instantiate(cx, &pkg)
}

/// Instantiate a package module into the store.
pub(crate) fn instantiate(cx: &mut Cx<'_>, pkg: &PkgData) -> Result<usize, ExecError> {
    cx.data_mut().measurements.num_containers.inc()?;
    let runtime = cx.data().runtime.clone();
    let (module, abi) = runtime.prepare(pkg)?;

    let instance = runtime
        .linker()
        .instantiate(&mut *cx, &module)
        .map_err(|e| trap_error(cx, e))?;
    let memory = instance
        .get_memory(&mut *cx, "memory")
        .ok_or_else(|| ExecError::InvalidBytecode {
            reason: format!("package {} has no memory export", pkg.id_hex()),
        })?;
    let alloc = instance
        .get_typed_func::<(i32, i32), i32>(&mut *cx, ALLOC_EXPORT)
        .map_err(|e| ExecError::InvalidBytecode {
            reason: format!("package {} has no usable {ALLOC_EXPORT} export: {e}", pkg.id_hex()),
        })?;

    let idx = cx.data().containers.len();
    cx.data_mut().containers.push(WasmContainer {
        id: pkg.id,
        abi,
        instance,
        memory,
        alloc,
    });
    debug!(package = %pkg.id_hex(), container = idx, "instantiated container");

    if instance.get_func(&mut *cx, "_start").is_some() {
        call_export(cx, idx, "_start", &[])?;
    }
    Ok(idx)
}

// ─── Calls ──────────────────────────────────────────────────────────────────

/// Call an export of a container, returning its single result if any.
pub(crate) fn call_export(
    cx: &mut Cx<'_>,
    container: usize,
    name: &str,
    params: &[Val],
) -> Result<Option<Val>, ExecError> {
    let (instance, pkg) = {
        let c = cx.data().container(container)?;
        (c.instance, c.id_hex())
    };
    let func = instance
        .get_func(&mut *cx, name)
        .ok_or_else(|| ExecError::not_found(format!("export {name} in package {pkg}")))?;
    let mut results = vec![Val::I32(0); func.ty(&*cx).results().len()];

    cx.data_mut().active.push(container);
    let outcome = func.call(&mut *cx, params, &mut results);
    cx.data_mut().active.pop();

    outcome.map_err(|e| trap_error(cx, e))?;
    Ok(results.into_iter().next())
}

/// Turn a wasmtime failure into the error that caused it.
///
/// Host callbacks park their typed error in the store before trapping;
/// that error wins over the generic trap.
pub(crate) fn trap_error(cx: &mut Cx<'_>, err: wasmtime::Error) -> ExecError {
    if let Some(host_error) = cx.data_mut().host_error.take() {
        return host_error;
    }
    match err.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => ExecError::ResourceExhausted {
            counter: cx.data().measurements.wasm_executed.tag().to_string(),
            max: cx.data().opts.wasm_execution_max_hydros,
        },
        Some(trap) => ExecError::WasmTrap {
            reason: trap.to_string(),
        },
        None => ExecError::WasmTrap {
            reason: err.to_string(),
        },
    }
}

// ─── Memory ─────────────────────────────────────────────────────────────────

fn span(ptr: u32, len: u32, mem_len: usize) -> Result<std::ops::Range<usize>, ExecError> {
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= mem_len)
        .ok_or_else(|| {
            ExecError::marshal(format!("out of bounds memory access at {ptr} (+{len})"))
        })?;
    Ok(start..end)
}

/// Copy bytes out of guest memory.
pub(crate) fn read_bytes(
    cx: &mut Cx<'_>,
    container: usize,
    ptr: u32,
    len: u32,
) -> Result<Vec<u8>, ExecError> {
    cx.data_mut().measurements.moved_data.add(u64::from(len))?;
    let memory = cx.data().container(container)?.memory;
    let data = memory.data(&*cx);
    let range = span(ptr, len, data.len())?;
    Ok(data[range].to_vec())
}

/// Copy bytes into guest memory.
pub(crate) fn write_bytes(
    cx: &mut Cx<'_>,
    container: usize,
    ptr: u32,
    bytes: &[u8],
) -> Result<(), ExecError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| ExecError::marshal("write larger than guest memory"))?;
    cx.data_mut().measurements.moved_data.add(u64::from(len))?;
    let memory = cx.data().container(container)?.memory;
    let data = memory.data_mut(&mut *cx);
    let range = span(ptr, len, data.len())?;
    data[range].copy_from_slice(bytes);
    Ok(())
}

/// Read a little-endian word of `width` bytes.
pub(crate) fn read_word(
    cx: &mut Cx<'_>,
    container: usize,
    ptr: u32,
    width: u32,
) -> Result<u64, ExecError> {
    let bytes = read_bytes(cx, container, ptr, width)?;
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(&bytes);
    Ok(u64::from_le_bytes(buf))
}

/// Write the low `width` bytes of `raw`, little-endian.
pub(crate) fn write_word(
    cx: &mut Cx<'_>,
    container: usize,
    ptr: u32,
    width: u32,
    raw: u64,
) -> Result<(), ExecError> {
    let bytes = raw.to_le_bytes();
    write_bytes(cx, container, ptr, &bytes[..width as usize])
}

pub(crate) fn read_u32(cx: &mut Cx<'_>, container: usize, ptr: u32) -> Result<u32, ExecError> {
    Ok(read_word(cx, container, ptr, 4)? as u32)
}

/// Payload size recorded in the header of a managed object.
pub(crate) fn object_size(cx: &mut Cx<'_>, container: usize, ptr: u32) -> Result<u32, ExecError> {
    if ptr < HEADER_SIZE {
        return Err(ExecError::marshal(format!("invalid object pointer {ptr}")));
    }
    read_u32(cx, container, ptr - 4)
}

/// Contents of a managed buffer or string.
pub(crate) fn read_buffer(cx: &mut Cx<'_>, container: usize, ptr: u32) -> Result<Vec<u8>, ExecError> {
    let len = object_size(cx, container, ptr)?;
    read_bytes(cx, container, ptr, len)
}

/// Allocate a managed object through the guest allocator.
pub(crate) fn alloc(cx: &mut Cx<'_>, container: usize, size: u32, rtid: u32) -> Result<u32, ExecError> {
    let alloc = cx.data().container(container)?.alloc.clone();
    let ptr = alloc
        .call(&mut *cx, (size as i32, rtid as i32))
        .map_err(|e| trap_error(cx, e))? as u32;
    if ptr < HEADER_SIZE {
        return Err(ExecError::marshal(format!(
            "allocator returned invalid pointer {ptr}"
        )));
    }
    Ok(ptr)
}

/// Allocate a managed object holding `bytes`.
pub(crate) fn alloc_bytes(
    cx: &mut Cx<'_>,
    container: usize,
    rtid: u32,
    bytes: &[u8],
) -> Result<u32, ExecError> {
    let size = u32::try_from(bytes.len())
        .map_err(|_| ExecError::marshal("buffer larger than guest memory"))?;
    let ptr = alloc(cx, container, size, rtid)?;
    write_bytes(cx, container, ptr, bytes)?;
    Ok(ptr)
}
