//! Live jigs: hydration from outputs, construction and method dispatch.

use jig_types::output::Output;
use jig_types::pointer::{Pointer, COIN_CLS_PTR};
use jig_types::value::Value;
use tracing::debug;
use wasmtime::Val;

use crate::abi::{type_width, MethodInfo};
use crate::container::{alloc, assert_container, call_export, read_word, write_word};
use crate::error::ExecError;
use crate::lock::Lock;
use crate::memory::{lift, lower, lower_lock, lower_output};
use crate::state::{Cx, PendingJig};

/// A jig present in guest memory during a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JigRef {
    pub origin: Pointer,
    pub location: Pointer,
    pub class_ptr: Pointer,
    /// Container holding the jig's memory.
    pub container: usize,
    /// Export index of its class in that container.
    pub class_idx: u16,
    pub ptr: u32,
    pub lock: Lock,
    /// Created by this transaction.
    pub is_new: bool,
    /// Output the jig was hydrated from.
    pub input: Option<Output>,
}

// ─── Lookup and hydration ───────────────────────────────────────────────────

/// Index of the live jig with `origin`, hydrating its latest output on
/// first use. Every first use counts as an origin check.
pub(crate) fn ensure_jig(cx: &mut Cx<'_>, origin: &Pointer) -> Result<usize, ExecError> {
    if let Some(idx) = cx.data().jig_index(origin) {
        return Ok(idx);
    }
    cx.data_mut().measurements.origin_checks.inc()?;
    let output = cx.data().context.input_by_origin(origin)?;
    hydrate(cx, output)
}

/// Rebuild a jig in its class container from a persisted output.
pub(crate) fn hydrate(cx: &mut Cx<'_>, output: Output) -> Result<usize, ExecError> {
    if let Some(idx) = cx.data().jig_index(&output.origin) {
        return Ok(idx);
    }
    let container = assert_container(cx, &output.class_ptr.id)?;
    let abi = cx.data().container(container)?.abi.clone();
    let class = abi.class(output.class_ptr.idx)?.clone();
    let values = output.state_values()?;
    if values.len() != class.state_fields().len() {
        return Err(ExecError::validation(format!(
            "output {} has {} state values, class {} has {} fields",
            output.origin,
            values.len(),
            class.name,
            class.state_fields().len()
        )));
    }
    let lock = Lock::from_serialized(&output.lock)?;
    let ptr = alloc(cx, container, class.size, abi.rtid_by_name(&class.name)?)?;

    let idx = cx.data().jigs.len();
    cx.data_mut().jigs.push(JigRef {
        origin: output.origin,
        location: output.location,
        class_ptr: output.class_ptr,
        container,
        class_idx: output.class_ptr.idx,
        ptr,
        lock,
        is_new: false,
        input: Some(output.clone()),
    });
    debug!(origin = %output.origin, class = %class.name, "hydrated jig");

    write_header(cx, idx)?;
    for (field, value) in class.state_fields().iter().zip(&values) {
        let raw = lower(cx, container, &field.ty, value)?;
        write_word(cx, container, ptr + field.offset, type_width(&field.ty), raw)?;
    }
    Ok(idx)
}

/// Write the `$output` and `$lock` fields of a jig from its record.
fn write_header(cx: &mut Cx<'_>, jig_idx: usize) -> Result<(), ExecError> {
    let jig = cx.data().jig(jig_idx)?.clone();
    let output = lower_output(cx, jig.container, &jig.origin, &jig.location, &jig.class_ptr)?;
    let lock = lower_lock(cx, jig.container, &jig.origin, &jig.lock)?;
    write_word(cx, jig.container, jig.ptr, 4, output.into())?;
    write_word(cx, jig.container, jig.ptr + 4, 4, lock.into())
}

/// Current values of a jig's persisted fields, read from guest memory.
pub(crate) fn state_values(cx: &mut Cx<'_>, jig_idx: usize) -> Result<Vec<Value>, ExecError> {
    let jig = cx.data().jig(jig_idx)?.clone();
    let abi = cx.data().container(jig.container)?.abi.clone();
    let class = abi.class(jig.class_idx)?;
    let mut values = Vec::with_capacity(class.state_fields().len());
    for field in class.state_fields() {
        let raw = read_word(cx, jig.container, jig.ptr + field.offset, type_width(&field.ty))?;
        values.push(lift(cx, jig.container, &field.ty, raw)?);
    }
    Ok(values)
}

/// Replace a jig's lock, in the record and in guest memory.
pub(crate) fn set_lock(cx: &mut Cx<'_>, jig_idx: usize, lock: Lock) -> Result<(), ExecError> {
    let (container, origin, ptr) = {
        let jig = cx
            .data_mut()
            .jigs
            .get_mut(jig_idx)
            .ok_or_else(|| ExecError::invariant(format!("no jig #{jig_idx}")))?;
        jig.lock = lock;
        (jig.container, jig.origin, jig.ptr)
    };
    let lock_ptr = lower_lock(cx, container, &origin, &lock)?;
    write_word(cx, container, ptr + 4, 4, lock_ptr.into())
}

// ─── Construction ───────────────────────────────────────────────────────────

/// Run the constructor of class `class_idx` in `container`.
///
/// The constructor must link the new object through `vm.jig_link` before
/// it returns; the new jig's index is returned.
pub(crate) fn create(
    cx: &mut Cx<'_>,
    container: usize,
    class_idx: u16,
    params: &[Val],
) -> Result<usize, ExecError> {
    if cx.data().next_jig.is_some() {
        return Err(ExecError::validation(
            "a constructor ran before the previous jig was linked",
        ));
    }
    let (pkg_id, constructor) = {
        let c = cx.data().container(container)?;
        (c.id, c.abi.class(class_idx)?.constructor.export_name.clone())
    };
    let class_ptr = Pointer::new(pkg_id, class_idx);
    if class_ptr == COIN_CLS_PTR {
        return Err(ExecError::authorization(
            "coins are minted by the ledger, not constructed",
        ));
    }
    cx.data_mut().measurements.new_jigs.inc()?;
    let origin = cx.data_mut().reserve_origin()?;
    cx.data_mut().next_jig = Some(PendingJig { origin, class_ptr });

    cx.data_mut().stack.push(origin)?;
    cx.data_mut().constructing.push(origin);
    let outcome = call_export(cx, container, &constructor, params);
    cx.data_mut().constructing.pop();
    cx.data_mut().stack.pop()?;
    outcome?;

    if cx.data_mut().next_jig.take().is_some() {
        return Err(ExecError::validation(format!(
            "constructor {constructor} did not link the new jig"
        )));
    }
    cx.data()
        .jig_index(&origin)
        .ok_or_else(|| ExecError::invariant(format!("linked jig {origin} is missing")))
}

/// Bind the object at `ptr` to the pending jig. Called by the guest from
/// inside a constructor.
pub(crate) fn link(cx: &mut Cx<'_>, container: usize, ptr: u32, rtid: u32) -> Result<usize, ExecError> {
    let pending = cx
        .data_mut()
        .next_jig
        .take()
        .ok_or_else(|| ExecError::validation("no jig is waiting to be linked"))?;
    let c = cx.data().container(container)?;
    let class_name = c.abi.type_name(rtid)?.to_string();
    let class_idx = c.abi.export_idx(&class_name)?;
    if c.id != pending.class_ptr.id || class_idx != pending.class_ptr.idx {
        return Err(ExecError::validation(format!(
            "linked object of class {class_name} does not match the constructor being run"
        )));
    }

    let idx = cx.data().jigs.len();
    cx.data_mut().jigs.push(JigRef {
        origin: pending.origin,
        location: pending.origin,
        class_ptr: pending.class_ptr,
        container,
        class_idx,
        ptr,
        lock: Lock::None,
        is_new: true,
        input: None,
    });
    cx.data_mut().mark_affected(idx)?;
    write_header(cx, idx)?;
    debug!(origin = %pending.origin, class = %class_name, "linked new jig");
    Ok(idx)
}

// ─── Calls ──────────────────────────────────────────────────────────────────

/// Invoke an instance method with the jig's origin on the caller stack.
///
/// Authorization is the caller's responsibility.
pub(crate) fn call_method(
    cx: &mut Cx<'_>,
    jig_idx: usize,
    method: &MethodInfo,
    params: &[Val],
) -> Result<Option<Val>, ExecError> {
    let jig = cx.data().jig(jig_idx)?.clone();
    let mut all = Vec::with_capacity(params.len() + 1);
    all.push(Val::I32(jig.ptr as i32));
    all.extend_from_slice(params);

    cx.data_mut().stack.push(jig.origin)?;
    let outcome = call_export(cx, jig.container, &method.export_name, &all);
    cx.data_mut().stack.pop()?;
    outcome
}
