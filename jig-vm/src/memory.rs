//! Type-driven marshaling between host [`Value`]s and guest memory.
//!
//! A value crosses the boundary as a raw word: inline bits for numbers and
//! booleans, a pointer to a managed object for everything else. `lift`
//! turns a word into a `Value`, `lower` writes a `Value` into a container
//! and returns its word. For every representable value, lifting what was
//! lowered with the same type gives the value back.

use std::sync::Arc;

use jig_types::abi::TypeNode;
use jig_types::pointer::Pointer;
use jig_types::primitives::{BUFFER_RTID, STRING_RTID};
use jig_types::value::Value;
use wasmtime::Val;

use crate::abi::{type_width, AbiAccess, Prim, TypeKind, LOCK_OBJECT, OUTPUT_OBJECT};
use crate::container::{
    alloc, alloc_bytes, object_size, read_buffer, read_bytes, read_u32, read_word, write_word,
};
use crate::error::ExecError;
use crate::jig::ensure_jig;
use crate::lock::Lock;
use crate::state::Cx;

// ─── Words ──────────────────────────────────────────────────────────────────

/// Wasm value carrying a word of type `ty`. `None` for `void`.
pub(crate) fn word_to_val(ty: &TypeNode, raw: u64) -> Option<Val> {
    match Prim::from_name(&ty.name) {
        Some(Prim::U64 | Prim::I64) => Some(Val::I64(raw as i64)),
        Some(Prim::F32) => Some(Val::F32(raw as u32)),
        Some(Prim::F64) => Some(Val::F64(raw)),
        Some(_) => Some(Val::I32(raw as u32 as i32)),
        None if ty.name == "void" => None,
        None => Some(Val::I32(raw as u32 as i32)),
    }
}

/// Raw bits of a wasm value.
pub(crate) fn val_to_word(val: &Val) -> Result<u64, ExecError> {
    match val {
        Val::I32(v) => Ok(u64::from(*v as u32)),
        Val::I64(v) => Ok(*v as u64),
        Val::F32(bits) => Ok(u64::from(*bits)),
        Val::F64(bits) => Ok(*bits),
        other => Err(ExecError::marshal(format!("unsupported wasm value {other:?}"))),
    }
}

/// Pack words into an argument buffer, each at its type's width.
pub(crate) fn pack_words(items: &[(u32, u64)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (width, raw) in items {
        out.extend_from_slice(&raw.to_le_bytes()[..*width as usize]);
    }
    out
}

/// Split an argument buffer into one word per type.
pub(crate) fn unpack_words(bytes: &[u8], types: &[&TypeNode]) -> Result<Vec<u64>, ExecError> {
    let mut offset = 0usize;
    let mut words = Vec::with_capacity(types.len());
    for ty in types {
        let width = type_width(ty) as usize;
        let chunk = bytes
            .get(offset..offset + width)
            .ok_or_else(|| ExecError::marshal("argument buffer too short"))?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(chunk);
        words.push(u64::from_le_bytes(buf));
        offset += width;
    }
    if offset != bytes.len() {
        return Err(ExecError::marshal(format!(
            "argument buffer has {} trailing bytes",
            bytes.len() - offset
        )));
    }
    Ok(words)
}

fn map_entry_layout(key: &TypeNode, value: &TypeNode) -> (u32, u32, u32) {
    let kw = type_width(key);
    let vw = type_width(value);
    let value_offset = kw.div_ceil(vw) * vw;
    let align = kw.max(vw);
    let entry_size = (value_offset + vw).div_ceil(align) * align;
    (kw, value_offset, entry_size)
}

fn abi_of(cx: &Cx<'_>, container: usize) -> Result<Arc<AbiAccess>, ExecError> {
    Ok(cx.data().container(container)?.abi.clone())
}

fn checked(base: u32, offset: u64) -> Result<u32, ExecError> {
    u64::from(base)
        .checked_add(offset)
        .and_then(|p| u32::try_from(p).ok())
        .ok_or_else(|| ExecError::marshal("pointer arithmetic overflow"))
}

// ─── Lift ───────────────────────────────────────────────────────────────────

/// Read the value of type `ty` whose word is `raw`.
pub(crate) fn lift(
    cx: &mut Cx<'_>,
    container: usize,
    ty: &TypeNode,
    raw: u64,
) -> Result<Value, ExecError> {
    let abi = abi_of(cx, container)?;
    let kind = abi.classify(ty)?;
    match kind {
        TypeKind::Void => return Ok(Value::Null),
        TypeKind::Prim(prim) => return Ok(prim.decode(raw)),
        _ => {}
    }
    let ptr = raw as u32;
    if ptr == 0 {
        if ty.nullable {
            return Ok(Value::Null);
        }
        return Err(ExecError::marshal(format!("null pointer for non-nullable {ty}")));
    }

    match kind {
        TypeKind::Void | TypeKind::Prim(_) => Ok(Value::Null),
        TypeKind::Buffer => Ok(Value::Bytes(read_buffer(cx, container, ptr)?)),
        TypeKind::String => {
            let bytes = read_buffer(cx, container, ptr)?;
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|e| ExecError::marshal(format!("invalid utf-8 string: {e}")))
        }
        TypeKind::TypedArray(_) => {
            let data_start = read_u32(cx, container, checked(ptr, 4)?)?;
            let byte_len = read_u32(cx, container, checked(ptr, 8)?)?;
            Ok(Value::Bytes(read_bytes(cx, container, data_start, byte_len)?))
        }
        TypeKind::Array(elem) => {
            let data_start = read_u32(cx, container, checked(ptr, 4)?)?;
            let length = read_u32(cx, container, checked(ptr, 12)?)?;
            lift_elements(cx, container, &elem, data_start, length).map(Value::Array)
        }
        TypeKind::StaticArray(elem) => {
            let size = object_size(cx, container, ptr)?;
            let length = size / type_width(&elem);
            lift_elements(cx, container, &elem, ptr, length).map(Value::Array)
        }
        TypeKind::Set(elem) => {
            let entries = read_u32(cx, container, ptr)?;
            let count = read_u32(cx, container, checked(ptr, 8)?)?;
            lift_elements(cx, container, &elem, entries, count).map(Value::Set)
        }
        TypeKind::Map(key_ty, value_ty) => {
            let entries = read_u32(cx, container, ptr)?;
            let count = read_u32(cx, container, checked(ptr, 8)?)?;
            let (kw, value_offset, entry_size) = map_entry_layout(&key_ty, &value_ty);
            let vw = type_width(&value_ty);
            let mut pairs = Vec::with_capacity(count.min(1024) as usize);
            for i in 0..u64::from(count) {
                let entry = checked(entries, i * u64::from(entry_size))?;
                let key_raw = read_word(cx, container, entry, kw)?;
                let value_raw = read_word(cx, container, checked(entry, u64::from(value_offset))?, vw)?;
                let key = lift(cx, container, &key_ty, key_raw)?;
                let value = lift(cx, container, &value_ty, value_raw)?;
                pairs.push((key, value));
            }
            Ok(Value::Map(pairs))
        }
        TypeKind::Object(name) => {
            let layout = abi.object(&name)?.clone();
            let mut values = Vec::with_capacity(layout.fields.len());
            for field in &layout.fields {
                let addr = checked(ptr, u64::from(field.offset))?;
                let field_raw = read_word(cx, container, addr, type_width(&field.ty))?;
                values.push(lift(cx, container, &field.ty, field_raw)?);
            }
            Ok(Value::Object(values))
        }
        TypeKind::Class(_) | TypeKind::Proxy(_) => {
            Ok(Value::Jig(read_origin(cx, container, ptr)?))
        }
    }
}

fn lift_elements(
    cx: &mut Cx<'_>,
    container: usize,
    elem: &TypeNode,
    start: u32,
    length: u32,
) -> Result<Vec<Value>, ExecError> {
    let width = type_width(elem);
    let mut items = Vec::with_capacity(length.min(1024) as usize);
    for i in 0..u64::from(length) {
        let addr = checked(start, i * u64::from(width))?;
        let raw = read_word(cx, container, addr, width)?;
        items.push(lift(cx, container, elem, raw)?);
    }
    Ok(items)
}

/// Origin of a jig or proxy object, read through its `$output` field.
pub(crate) fn read_origin(cx: &mut Cx<'_>, container: usize, ptr: u32) -> Result<Pointer, ExecError> {
    let output_ptr = read_u32(cx, container, ptr)?;
    if output_ptr == 0 {
        return Err(ExecError::marshal(format!("object at {ptr} is not linked")));
    }
    let origin_ptr = read_u32(cx, container, output_ptr)?;
    read_pointer_buffer(cx, container, origin_ptr)
}

/// Pointer stored in a managed buffer.
pub(crate) fn read_pointer_buffer(
    cx: &mut Cx<'_>,
    container: usize,
    ptr: u32,
) -> Result<Pointer, ExecError> {
    let bytes = read_buffer(cx, container, ptr)?;
    Pointer::from_bytes(&bytes).map_err(|e| ExecError::marshal(e.to_string()))
}

/// Read a managed string. A null pointer reads as the empty string.
pub(crate) fn read_string(cx: &mut Cx<'_>, container: usize, ptr: u32) -> Result<String, ExecError> {
    if ptr == 0 {
        return Ok(String::new());
    }
    let bytes = read_buffer(cx, container, ptr)?;
    String::from_utf8(bytes).map_err(|e| ExecError::marshal(format!("invalid utf-8 string: {e}")))
}

// ─── Lower ──────────────────────────────────────────────────────────────────

fn mismatch(ty: &TypeNode, value: &Value) -> ExecError {
    ExecError::marshal(format!("cannot lower {} as {ty}", value.kind_name()))
}

/// Write `value` into `container` as type `ty`, returning its word.
pub(crate) fn lower(
    cx: &mut Cx<'_>,
    container: usize,
    ty: &TypeNode,
    value: &Value,
) -> Result<u64, ExecError> {
    let abi = abi_of(cx, container)?;
    let kind = abi.classify(ty)?;
    match (&kind, value) {
        (TypeKind::Void, _) => return Ok(0),
        (TypeKind::Prim(prim), _) => return prim.encode(value),
        (_, Value::Null) if ty.nullable => return Ok(0),
        (_, Value::Null) => {
            return Err(ExecError::marshal(format!("null for non-nullable {ty}")))
        }
        _ => {}
    }

    let ptr = match (kind, value) {
        (TypeKind::Buffer, Value::Bytes(bytes)) => alloc_bytes(cx, container, BUFFER_RTID, bytes)?,
        (TypeKind::String, Value::String(s)) => {
            alloc_bytes(cx, container, STRING_RTID, s.as_bytes())?
        }
        (TypeKind::TypedArray(prim), Value::Bytes(bytes)) => {
            if bytes.len() % prim.width() as usize != 0 {
                return Err(ExecError::marshal(format!(
                    "{} bytes is not a whole number of {ty} elements",
                    bytes.len()
                )));
            }
            let buffer = alloc_bytes(cx, container, BUFFER_RTID, bytes)?;
            let header = pack_words(&[(4, buffer.into()), (4, buffer.into()), (4, bytes.len() as u64)]);
            alloc_bytes(cx, container, abi.rtid(ty)?, &header)?
        }
        (TypeKind::Array(elem), Value::Array(items)) => {
            let buffer = lower_elements(cx, container, &elem, items, BUFFER_RTID)?;
            let byte_len = items.len() as u64 * u64::from(type_width(&elem));
            let header = pack_words(&[
                (4, buffer.into()),
                (4, buffer.into()),
                (4, byte_len),
                (4, items.len() as u64),
            ]);
            alloc_bytes(cx, container, abi.rtid(ty)?, &header)?
        }
        (TypeKind::StaticArray(elem), Value::Array(items)) => {
            lower_elements(cx, container, &elem, items, abi.rtid(ty)?)?
        }
        (TypeKind::Set(elem), Value::Set(items)) => {
            let entries = lower_elements(cx, container, &elem, items, BUFFER_RTID)?;
            let byte_len = items.len() as u64 * u64::from(type_width(&elem));
            let header = pack_words(&[(4, entries.into()), (4, byte_len), (4, items.len() as u64)]);
            alloc_bytes(cx, container, abi.rtid(ty)?, &header)?
        }
        (TypeKind::Map(key_ty, value_ty), Value::Map(pairs)) => {
            let (kw, value_offset, entry_size) = map_entry_layout(&key_ty, &value_ty);
            let vw = type_width(&value_ty);
            let total = u32::try_from(pairs.len() as u64 * u64::from(entry_size))
                .map_err(|_| ExecError::marshal("map too large"))?;
            let entries = alloc(cx, container, total, BUFFER_RTID)?;
            for (i, (key, val)) in pairs.iter().enumerate() {
                let entry = checked(entries, i as u64 * u64::from(entry_size))?;
                let key_raw = lower(cx, container, &key_ty, key)?;
                write_word(cx, container, entry, kw, key_raw)?;
                let value_raw = lower(cx, container, &value_ty, val)?;
                write_word(cx, container, checked(entry, u64::from(value_offset))?, vw, value_raw)?;
            }
            let header = pack_words(&[(4, entries.into()), (4, total.into()), (4, pairs.len() as u64)]);
            alloc_bytes(cx, container, abi.rtid(ty)?, &header)?
        }
        (TypeKind::Object(name), Value::Object(values)) => {
            let layout = abi.object(&name)?.clone();
            if layout.fields.len() != values.len() {
                return Err(ExecError::marshal(format!(
                    "{name} has {} fields, got {}",
                    layout.fields.len(),
                    values.len()
                )));
            }
            let ptr = alloc(cx, container, layout.size, abi.rtid_by_name(&name)?)?;
            for (field, field_value) in layout.fields.iter().zip(values) {
                let raw = lower(cx, container, &field.ty, field_value)?;
                write_word(
                    cx,
                    container,
                    checked(ptr, u64::from(field.offset))?,
                    type_width(&field.ty),
                    raw,
                )?;
            }
            ptr
        }
        (TypeKind::Class(idx), Value::Jig(origin)) => {
            let jig_idx = ensure_jig(cx, origin)?;
            let jig = cx.data().jig(jig_idx)?;
            let class_name = &abi.class(idx)?.name;
            let local_class = cx.data().container(jig.container)?.abi.class(jig.class_idx)?;
            if jig.container != container || !local_class.is_a(class_name) {
                return Err(ExecError::marshal(format!("jig {origin} is not a {class_name}")));
            }
            jig.ptr
        }
        (TypeKind::Proxy(name), Value::Jig(origin)) => {
            let jig_idx = ensure_jig(cx, origin)?;
            let jig = cx.data().jig(jig_idx)?.clone();
            if jig.container == container {
                jig.ptr
            } else {
                let output = lower_output(cx, container, &jig.origin, &jig.location, &jig.class_ptr)?;
                let lock = lower_lock(cx, container, &jig.origin, &jig.lock)?;
                let header = pack_words(&[(4, output.into()), (4, lock.into())]);
                alloc_bytes(cx, container, abi.rtid_by_name(&name)?, &header)?
            }
        }
        (_, value) => return Err(mismatch(ty, value)),
    };
    Ok(u64::from(ptr))
}

/// Lower a list into a freshly allocated buffer of packed element words.
fn lower_elements(
    cx: &mut Cx<'_>,
    container: usize,
    elem: &TypeNode,
    items: &[Value],
    rtid: u32,
) -> Result<u32, ExecError> {
    let width = type_width(elem);
    let size = u32::try_from(items.len() as u64 * u64::from(width))
        .map_err(|_| ExecError::marshal("collection too large"))?;
    let buffer = alloc(cx, container, size, rtid)?;
    for (i, item) in items.iter().enumerate() {
        let raw = lower(cx, container, elem, item)?;
        write_word(cx, container, checked(buffer, i as u64 * u64::from(width))?, width, raw)?;
    }
    Ok(buffer)
}

/// Write an `Output` object describing a jig.
pub(crate) fn lower_output(
    cx: &mut Cx<'_>,
    container: usize,
    origin: &Pointer,
    location: &Pointer,
    class_ptr: &Pointer,
) -> Result<u32, ExecError> {
    let value = Value::Object(vec![
        Value::Bytes(origin.to_bytes().to_vec()),
        Value::Bytes(location.to_bytes().to_vec()),
        Value::Bytes(class_ptr.to_bytes().to_vec()),
    ]);
    Ok(lower(cx, container, &TypeNode::simple(OUTPUT_OBJECT), &value)? as u32)
}

/// Write a `Lock` object describing a jig's lock.
pub(crate) fn lower_lock(
    cx: &mut Cx<'_>,
    container: usize,
    origin: &Pointer,
    lock: &Lock,
) -> Result<u32, ExecError> {
    let value = Value::Object(vec![
        Value::Bytes(origin.to_bytes().to_vec()),
        Value::U32(u32::from(lock.lock_type().code())),
        Value::Bytes(lock.data()),
    ]);
    Ok(lower(cx, container, &TypeNode::simple(LOCK_OBJECT), &value)? as u32)
}
