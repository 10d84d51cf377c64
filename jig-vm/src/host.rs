//! Host functions imported by package modules.
//!
//! Module `env` carries the runtime basics (`abort`, `log`); module `vm`
//! carries the capabilities through which jigs create, call, inspect and
//! lock one another. Every callback runs against the same transaction
//! store, so a call from one container can re-enter any other.

use jig_types::abi::{ArgDef, TypeNode};
use jig_types::pointer::Pointer;
use jig_types::primitives::{PackageId, BUFFER_RTID};
use jig_types::value::Value;
use tracing::info;
use wasmtime::{AsContextMut, Caller, Linker, Val};

use crate::abi::{type_width, JIG_INIT_PARAMS_OBJECT};
use crate::container::{alloc_bytes, assert_container, call_export, read_buffer, read_word};
use crate::error::ExecError;
use crate::jig::{self, ensure_jig};
use crate::lock::{check_transition, Lock};
use crate::memory::{
    lift, lower, lower_output, read_pointer_buffer, read_string, unpack_words, val_to_word,
    word_to_val,
};
use crate::state::{Cx, ExecState};

/// Lock type codes understood by `vm.jig_lock`.
const LOCK_NONE: i32 = 0;
const LOCK_ADDRESS: i32 = 1;
const LOCK_JIG: i32 = 2;
const LOCK_PUBLIC: i32 = 3;
const LOCK_FROZEN: i32 = 255;

/// Check codes understood by `vm.jig_auth_check`.
const AUTH_CALLS: i32 = 0;
const AUTH_CHANGE: i32 = 1;

/// Park a failed callback's error in the store and trap.
fn guard<T>(cx: &mut Cx<'_>, result: Result<T, ExecError>) -> wasmtime::Result<T> {
    result.map_err(|err| {
        let msg = err.to_string();
        cx.data_mut().host_error = Some(err);
        wasmtime::Error::msg(msg)
    })
}

fn registration(name: &str, err: impl std::fmt::Display) -> ExecError {
    ExecError::RuntimeError {
        reason: format!("failed to register {name}: {err}"),
    }
}

/// Register every host import on the linker.
pub(crate) fn register(linker: &mut Linker<ExecState>) -> Result<(), ExecError> {
    // ── env ─────────────────────────────────────────────────────────────
    linker
        .func_wrap(
            "env",
            "abort",
            |mut caller: Caller<'_, ExecState>,
             msg: i32,
             file: i32,
             line: i32,
             col: i32|
             -> wasmtime::Result<()> {
                let mut cx = caller.as_context_mut();
                let result = abort(&mut cx, msg as u32, file as u32, line as u32, col as u32);
                guard(&mut cx, result)
            },
        )
        .map_err(|e| registration("env.abort", e))?;

    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, ExecState>, msg: i32| -> wasmtime::Result<()> {
                let mut cx = caller.as_context_mut();
                let result = log(&mut cx, msg as u32);
                guard(&mut cx, result)
            },
        )
        .map_err(|e| registration("env.log", e))?;

    // ── vm: construction ────────────────────────────────────────────────
    linker
        .func_wrap(
            "vm",
            "jig_init",
            |mut caller: Caller<'_, ExecState>| -> wasmtime::Result<i32> {
                let mut cx = caller.as_context_mut();
                let result = jig_init(&mut cx);
                guard(&mut cx, result).map(|ptr| ptr as i32)
            },
        )
        .map_err(|e| registration("vm.jig_init", e))?;

    linker
        .func_wrap(
            "vm",
            "jig_link",
            |mut caller: Caller<'_, ExecState>, ptr: i32, rtid: i32| -> wasmtime::Result<()> {
                let mut cx = caller.as_context_mut();
                let result = jig_link(&mut cx, ptr as u32, rtid as u32);
                guard(&mut cx, result)
            },
        )
        .map_err(|e| registration("vm.jig_link", e))?;

    linker
        .func_wrap(
            "vm",
            "constructor_local",
            |mut caller: Caller<'_, ExecState>, class_name: i32, args: i32| -> wasmtime::Result<i32> {
                let mut cx = caller.as_context_mut();
                let result = constructor_local(&mut cx, class_name as u32, args as u32);
                guard(&mut cx, result).map(|ptr| ptr as i32)
            },
        )
        .map_err(|e| registration("vm.constructor_local", e))?;

    linker
        .func_wrap(
            "vm",
            "constructor_remote",
            |mut caller: Caller<'_, ExecState>,
             pkg: i32,
             class_name: i32,
             args: i32|
             -> wasmtime::Result<i32> {
                let mut cx = caller.as_context_mut();
                let result = constructor_remote(&mut cx, pkg as u32, class_name as u32, args as u32);
                guard(&mut cx, result).map(|ptr| ptr as i32)
            },
        )
        .map_err(|e| registration("vm.constructor_remote", e))?;

    // ── vm: calls and properties ────────────────────────────────────────
    linker
        .func_wrap(
            "vm",
            "call_method",
            |mut caller: Caller<'_, ExecState>,
             origin: i32,
             method: i32,
             args: i32|
             -> wasmtime::Result<i64> {
                let mut cx = caller.as_context_mut();
                let result = call_method(&mut cx, origin as u32, method as u32, args as u32);
                guard(&mut cx, result)
            },
        )
        .map_err(|e| registration("vm.call_method", e))?;

    linker
        .func_wrap(
            "vm",
            "call_function",
            |mut caller: Caller<'_, ExecState>,
             pkg: i32,
             name: i32,
             args: i32|
             -> wasmtime::Result<i64> {
                let mut cx = caller.as_context_mut();
                let result = call_function(&mut cx, pkg as u32, name as u32, args as u32);
                guard(&mut cx, result)
            },
        )
        .map_err(|e| registration("vm.call_function", e))?;

    linker
        .func_wrap(
            "vm",
            "get_prop",
            |mut caller: Caller<'_, ExecState>, origin: i32, prop: i32| -> wasmtime::Result<i64> {
                let mut cx = caller.as_context_mut();
                let result = get_prop(&mut cx, origin as u32, prop as u32);
                guard(&mut cx, result)
            },
        )
        .map_err(|e| registration("vm.get_prop", e))?;

    // ── vm: locks ───────────────────────────────────────────────────────
    linker
        .func_wrap(
            "vm",
            "jig_lock",
            |mut caller: Caller<'_, ExecState>,
             origin: i32,
             lock_type: i32,
             data: i32|
             -> wasmtime::Result<()> {
                let mut cx = caller.as_context_mut();
                let result = jig_lock(&mut cx, origin as u32, lock_type, data as u32);
                guard(&mut cx, result)
            },
        )
        .map_err(|e| registration("vm.jig_lock", e))?;

    linker
        .func_wrap(
            "vm",
            "jig_auth_check",
            |mut caller: Caller<'_, ExecState>, origin: i32, check: i32| -> wasmtime::Result<i32> {
                let mut cx = caller.as_context_mut();
                let result = jig_auth_check(&mut cx, origin as u32, check);
                guard(&mut cx, result).map(i32::from)
            },
        )
        .map_err(|e| registration("vm.jig_auth_check", e))?;

    // ── vm: caller introspection ────────────────────────────────────────
    linker
        .func_wrap(
            "vm",
            "caller_typecheck",
            |mut caller: Caller<'_, ExecState>, rtid: i32, exact: i32| -> wasmtime::Result<i32> {
                let mut cx = caller.as_context_mut();
                let result = caller_typecheck(&mut cx, rtid as u32, exact != 0);
                guard(&mut cx, result).map(i32::from)
            },
        )
        .map_err(|e| registration("vm.caller_typecheck", e))?;

    linker
        .func_wrap(
            "vm",
            "caller_output_check",
            |caller: Caller<'_, ExecState>| -> i32 {
                i32::from(caller.data().stack.caller().is_some())
            },
        )
        .map_err(|e| registration("vm.caller_output_check", e))?;

    linker
        .func_wrap(
            "vm",
            "caller_output",
            |mut caller: Caller<'_, ExecState>| -> wasmtime::Result<i32> {
                let mut cx = caller.as_context_mut();
                let result = caller_output(&mut cx);
                guard(&mut cx, result).map(|ptr| ptr as i32)
            },
        )
        .map_err(|e| registration("vm.caller_output", e))?;

    linker
        .func_wrap(
            "vm",
            "caller_output_val",
            |mut caller: Caller<'_, ExecState>, key: i32| -> wasmtime::Result<i32> {
                let mut cx = caller.as_context_mut();
                let result = caller_output_val(&mut cx, key as u32);
                guard(&mut cx, result).map(|ptr| ptr as i32)
            },
        )
        .map_err(|e| registration("vm.caller_output_val", e))?;

    Ok(())
}

// ─── Argument passing ───────────────────────────────────────────────────────

/// Read an argument buffer written by container `from` and produce the
/// wasm parameters for a call into container `to`.
pub(crate) fn move_args(
    cx: &mut Cx<'_>,
    from: usize,
    to: usize,
    buf_ptr: u32,
    args: &[ArgDef],
) -> Result<Vec<Val>, ExecError> {
    let bytes = if buf_ptr == 0 {
        Vec::new()
    } else {
        read_buffer(cx, from, buf_ptr)?
    };
    let types: Vec<&TypeNode> = args.iter().map(|a| &a.ty).collect();
    let words = unpack_words(&bytes, &types)?;

    let mut params = Vec::with_capacity(args.len());
    for (ty, raw) in types.into_iter().zip(words) {
        let raw = if from == to {
            raw
        } else {
            let value = lift(cx, from, ty, raw)?;
            lower(cx, to, ty, &value)?
        };
        params.extend(word_to_val(ty, raw));
    }
    Ok(params)
}

/// Carry a call's return value from the callee container back to the
/// caller, widened to `i64`.
fn move_return(
    cx: &mut Cx<'_>,
    from: usize,
    to: usize,
    rtype: Option<&TypeNode>,
    ret: Option<Val>,
) -> Result<i64, ExecError> {
    let (Some(ty), Some(val)) = (rtype, ret) else {
        return Ok(0);
    };
    let raw = val_to_word(&val)?;
    if from == to {
        return Ok(raw as i64);
    }
    let value = lift(cx, from, ty, raw)?;
    Ok(lower(cx, to, ty, &value)? as i64)
}

fn parse_pkg_id(hex_id: &str) -> Result<PackageId, ExecError> {
    hex::decode(hex_id)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| ExecError::validation(format!("invalid package id {hex_id}")))
}

// ─── env ────────────────────────────────────────────────────────────────────

fn abort(cx: &mut Cx<'_>, msg: u32, file: u32, line: u32, col: u32) -> Result<(), ExecError> {
    let container = cx.data().current_container()?;
    let msg = read_string(cx, container, msg)?;
    let file = read_string(cx, container, file)?;
    Err(ExecError::WasmTrap {
        reason: format!("abort: {msg} ({file}:{line}:{col})"),
    })
}

fn log(cx: &mut Cx<'_>, msg: u32) -> Result<(), ExecError> {
    let container = cx.data().current_container()?;
    let msg = read_string(cx, container, msg)?;
    let pkg = cx.data().container(container)?.id_hex();
    info!(target: "jig_vm::guest", pkg = %pkg, "{msg}");
    Ok(())
}

// ─── vm: construction ───────────────────────────────────────────────────────

fn jig_init(cx: &mut Cx<'_>) -> Result<u32, ExecError> {
    let container = cx.data().current_container()?;
    let pending = cx
        .data()
        .next_jig
        .ok_or_else(|| ExecError::validation("jig_init called outside a constructor"))?;
    let params = Value::Object(vec![
        Value::Bytes(pending.origin.to_bytes().to_vec()),
        Value::Bytes(pending.origin.to_bytes().to_vec()),
        Value::Bytes(pending.class_ptr.to_bytes().to_vec()),
        Value::U8(Lock::None.lock_type().code()),
        Value::Bytes(Vec::new()),
    ]);
    Ok(lower(cx, container, &TypeNode::simple(JIG_INIT_PARAMS_OBJECT), &params)? as u32)
}

fn jig_link(cx: &mut Cx<'_>, ptr: u32, rtid: u32) -> Result<(), ExecError> {
    let container = cx.data().current_container()?;
    jig::link(cx, container, ptr, rtid)?;
    Ok(())
}

fn constructor_local(cx: &mut Cx<'_>, class_name: u32, args: u32) -> Result<u32, ExecError> {
    let container = cx.data().current_container()?;
    let class_name = read_string(cx, container, class_name)?;
    let abi = cx.data().container(container)?.abi.clone();
    let class = abi.class_by_name(&class_name)?;
    let params = move_args(cx, container, container, args, &class.constructor.args)?;
    let idx = jig::create(cx, container, class.export_idx, &params)?;
    Ok(cx.data().jig(idx)?.ptr)
}

fn constructor_remote(cx: &mut Cx<'_>, pkg: u32, class_name: u32, args: u32) -> Result<u32, ExecError> {
    let from = cx.data().current_container()?;
    let pkg_id = parse_pkg_id(&read_string(cx, from, pkg)?)?;
    let class_name = read_string(cx, from, class_name)?;
    let to = assert_container(cx, &pkg_id)?;
    let abi = cx.data().container(to)?.abi.clone();
    let class = abi.class_by_name(&class_name)?;
    let params = move_args(cx, from, to, args, &class.constructor.args)?;
    let idx = jig::create(cx, to, class.export_idx, &params)?;
    let origin = cx.data().jig(idx)?.origin;
    Ok(lower(cx, from, &TypeNode::simple(&class_name), &Value::Jig(origin))? as u32)
}

// ─── vm: calls and properties ───────────────────────────────────────────────

fn call_method(cx: &mut Cx<'_>, origin: u32, method: u32, args: u32) -> Result<i64, ExecError> {
    let from = cx.data().current_container()?;
    let origin = read_pointer_buffer(cx, from, origin)?;
    let method_name = read_string(cx, from, method)?;
    let jig_idx = ensure_jig(cx, &origin)?;
    let jig = cx.data().jig(jig_idx)?.clone();

    let state = cx.data();
    if !jig
        .lock
        .can_receive_calls(state.stack.acting_on(&origin), &state.signers)
    {
        return Err(ExecError::authorization(format!(
            "jig {origin} does not accept calls from the current context"
        )));
    }
    let abi = state.container(jig.container)?.abi.clone();
    let method = abi.class(jig.class_idx)?.method_by_name(&method_name)?.clone();
    if method.is_static {
        return Err(ExecError::validation(format!(
            "{method_name} is static and cannot be called on an instance"
        )));
    }

    let params = move_args(cx, from, jig.container, args, &method.args)?;
    cx.data_mut().mark_affected(jig_idx)?;
    let ret = jig::call_method(cx, jig_idx, &method, &params)?;
    move_return(cx, jig.container, from, method.rtype.as_ref(), ret)
}

fn call_function(cx: &mut Cx<'_>, pkg: u32, name: u32, args: u32) -> Result<i64, ExecError> {
    let from = cx.data().current_container()?;
    let pkg_id = parse_pkg_id(&read_string(cx, from, pkg)?)?;
    let name = read_string(cx, from, name)?;
    let to = assert_container(cx, &pkg_id)?;
    let abi = cx.data().container(to)?.abi.clone();
    let function = abi.function_by_name(&name)?;
    let params = move_args(cx, from, to, args, &function.args)?;
    let ret = call_export(cx, to, &function.name, &params)?;
    move_return(cx, to, from, function.rtype.as_ref(), ret)
}

fn get_prop(cx: &mut Cx<'_>, origin: u32, prop: u32) -> Result<i64, ExecError> {
    let from = cx.data().current_container()?;
    let origin = read_pointer_buffer(cx, from, origin)?;
    let prop = read_string(cx, from, prop)?;
    let jig_idx = ensure_jig(cx, &origin)?;
    let jig = cx.data().jig(jig_idx)?.clone();
    let abi = cx.data().container(jig.container)?.abi.clone();
    let field = abi
        .class(jig.class_idx)?
        .state_fields()
        .iter()
        .find(|f| f.name == prop)
        .cloned()
        .ok_or_else(|| ExecError::not_found(format!("property {prop} of jig {origin}")))?;

    let raw = read_word(cx, jig.container, jig.ptr + field.offset, type_width(&field.ty))?;
    if jig.container == from {
        return Ok(raw as i64);
    }
    let value = lift(cx, jig.container, &field.ty, raw)?;
    Ok(lower(cx, from, &field.ty, &value)? as i64)
}

// ─── vm: locks ──────────────────────────────────────────────────────────────

fn jig_lock(cx: &mut Cx<'_>, origin: u32, lock_type: i32, data: u32) -> Result<(), ExecError> {
    let from = cx.data().current_container()?;
    let origin = read_pointer_buffer(cx, from, origin)?;
    let next = match lock_type {
        LOCK_NONE => Lock::None,
        LOCK_ADDRESS => {
            let bytes = read_buffer(cx, from, data)?;
            let address = bytes
                .as_slice()
                .try_into()
                .map_err(|_| {
                    ExecError::validation(format!(
                        "address lock needs 20 bytes, got {}",
                        bytes.len()
                    ))
                })?;
            Lock::Address(address)
        }
        LOCK_JIG => {
            let owner = cx
                .data()
                .stack
                .top()
                .copied()
                .ok_or_else(|| ExecError::authorization("a jig lock needs an executing owner"))?;
            Lock::Jig(owner)
        }
        LOCK_PUBLIC => Lock::Public,
        LOCK_FROZEN => Lock::Frozen,
        other => {
            return Err(ExecError::validation(format!("unknown lock type {other}")));
        }
    };

    let jig_idx = ensure_jig(cx, &origin)?;
    let current = cx.data().jig(jig_idx)?.lock;
    let state = cx.data();
    check_transition(
        &current,
        &next,
        state.stack.acting_on(&origin),
        &state.signers,
        state.in_own_constructor(&origin),
    )?;
    jig::set_lock(cx, jig_idx, next)?;
    cx.data_mut().mark_affected(jig_idx)?;
    Ok(())
}

fn jig_auth_check(cx: &mut Cx<'_>, origin: u32, check: i32) -> Result<bool, ExecError> {
    let from = cx.data().current_container()?;
    let origin = read_pointer_buffer(cx, from, origin)?;
    let jig_idx = ensure_jig(cx, &origin)?;
    let state = cx.data();
    let lock = state.jig(jig_idx)?.lock;
    let acting = state.stack.acting_on(&origin);
    match check {
        AUTH_CALLS => Ok(lock.can_receive_calls(acting, &state.signers)),
        AUTH_CHANGE => Ok(lock.can_be_changed(acting, &state.signers)),
        other => Err(ExecError::validation(format!("unknown auth check {other}"))),
    }
}

// ─── vm: caller introspection ───────────────────────────────────────────────

fn calling_jig(cx: &mut Cx<'_>) -> Result<Option<usize>, ExecError> {
    match cx.data().stack.caller().copied() {
        Some(origin) => ensure_jig(cx, &origin).map(Some),
        None => Ok(None),
    }
}

fn caller_typecheck(cx: &mut Cx<'_>, rtid: u32, exact: bool) -> Result<bool, ExecError> {
    let from = cx.data().current_container()?;
    let Some(caller_idx) = calling_jig(cx)? else {
        return Ok(false);
    };
    let state = cx.data();
    let name = state.container(from)?.abi.type_name(rtid)?;
    let caller = state.jig(caller_idx)?;
    let class = state.container(caller.container)?.abi.class(caller.class_idx)?;
    Ok(if exact {
        class.name == name
    } else {
        class.is_a(name)
    })
}

fn caller_output(cx: &mut Cx<'_>) -> Result<u32, ExecError> {
    let from = cx.data().current_container()?;
    let caller_idx =
        calling_jig(cx)?.ok_or_else(|| ExecError::not_found("caller of the executing jig"))?;
    let caller = cx.data().jig(caller_idx)?.clone();
    lower_output(cx, from, &caller.origin, &caller.location, &caller.class_ptr)
}

fn caller_output_val(cx: &mut Cx<'_>, key: u32) -> Result<u32, ExecError> {
    let from = cx.data().current_container()?;
    let key = read_string(cx, from, key)?;
    let caller_idx =
        calling_jig(cx)?.ok_or_else(|| ExecError::not_found("caller of the executing jig"))?;
    let caller = cx.data().jig(caller_idx)?;
    let pointer: Pointer = match key.as_str() {
        "origin" => caller.origin,
        "location" => caller.location,
        "class" => caller.class_ptr,
        other => return Err(ExecError::not_found(format!("caller output value {other}"))),
    };
    alloc_bytes(cx, from, BUFFER_RTID, &pointer.to_bytes())
}
