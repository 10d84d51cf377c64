//! Indexed view over a package ABI: export and import lookup, class
//! hierarchies, memory layouts and the runtime type-id table.

use std::collections::HashMap;

use jig_types::abi::{
    Abi, ArgDef, ClassDef, ExportDef, FieldDef, FunctionDef, ImportDef, ObjectDef, TypeNode,
    CONSTRUCTOR,
};
use jig_types::primitives::{BUFFER_RTID, STRING_RTID};
use jig_types::value::Value;

use crate::error::ExecError;

/// Built-in object describing a jig's location data.
pub const OUTPUT_OBJECT: &str = "Output";
/// Built-in object describing a jig's lock.
pub const LOCK_OBJECT: &str = "Lock";
/// Built-in object handed to constructors before linking.
pub const JIG_INIT_PARAMS_OBJECT: &str = "JigInitParams";
/// Generic name for "any jig".
pub const JIG_TYPE: &str = "Jig";

const OUTPUT_FIELD: &str = "$output";
const LOCK_FIELD: &str = "$lock";

// ─── Primitive Types ────────────────────────────────────────────────────────

/// Numeric and boolean types stored inline as little-endian words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prim {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl Prim {
    /// `usize` and `isize` are 32-bit on wasm32.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Prim::Bool,
            "u8" => Prim::U8,
            "u16" => Prim::U16,
            "u32" | "usize" => Prim::U32,
            "u64" => Prim::U64,
            "i8" => Prim::I8,
            "i16" => Prim::I16,
            "i32" | "isize" => Prim::I32,
            "i64" => Prim::I64,
            "f32" => Prim::F32,
            "f64" => Prim::F64,
            _ => return None,
        })
    }

    pub fn width(self) -> u32 {
        match self {
            Prim::Bool | Prim::U8 | Prim::I8 => 1,
            Prim::U16 | Prim::I16 => 2,
            Prim::U32 | Prim::I32 | Prim::F32 => 4,
            Prim::U64 | Prim::I64 | Prim::F64 => 8,
        }
    }

    /// Decode the low `width` bytes of a raw word.
    pub fn decode(self, raw: u64) -> Value {
        match self {
            Prim::Bool => Value::Bool(raw as u8 != 0),
            Prim::U8 => Value::U8(raw as u8),
            Prim::U16 => Value::U16(raw as u16),
            Prim::U32 => Value::U32(raw as u32),
            Prim::U64 => Value::U64(raw),
            Prim::I8 => Value::I8(raw as u8 as i8),
            Prim::I16 => Value::I16(raw as u16 as i16),
            Prim::I32 => Value::I32(raw as u32 as i32),
            Prim::I64 => Value::I64(raw as i64),
            Prim::F32 => Value::F32(f32::from_bits(raw as u32)),
            Prim::F64 => Value::F64(f64::from_bits(raw)),
        }
    }

    /// Encode a value of exactly this type as a raw word.
    pub fn encode(self, value: &Value) -> Result<u64, ExecError> {
        Ok(match (self, value) {
            (Prim::Bool, Value::Bool(b)) => u64::from(*b),
            (Prim::U8, Value::U8(n)) => u64::from(*n),
            (Prim::U16, Value::U16(n)) => u64::from(*n),
            (Prim::U32, Value::U32(n)) => u64::from(*n),
            (Prim::U64, Value::U64(n)) => *n,
            (Prim::I8, Value::I8(n)) => u64::from(*n as u8),
            (Prim::I16, Value::I16(n)) => u64::from(*n as u16),
            (Prim::I32, Value::I32(n)) => u64::from(*n as u32),
            (Prim::I64, Value::I64(n)) => *n as u64,
            (Prim::F32, Value::F32(n)) => u64::from(n.to_bits()),
            (Prim::F64, Value::F64(n)) => n.to_bits(),
            (prim, other) => {
                return Err(ExecError::marshal(format!(
                    "expected {prim:?}, got {}",
                    other.kind_name()
                )))
            }
        })
    }
}

fn typed_array_prim(name: &str) -> Option<Prim> {
    Some(match name {
        "Uint8Array" => Prim::U8,
        "Int8Array" => Prim::I8,
        "Uint16Array" => Prim::U16,
        "Int16Array" => Prim::I16,
        "Uint32Array" => Prim::U32,
        "Int32Array" => Prim::I32,
        "Uint64Array" => Prim::U64,
        "Int64Array" => Prim::I64,
        "Float32Array" => Prim::F32,
        "Float64Array" => Prim::F64,
        _ => return None,
    })
}

/// Width in bytes of a value of this type when stored in a field, array
/// slot or argument buffer. References are 32-bit pointers.
pub fn type_width(ty: &TypeNode) -> u32 {
    Prim::from_name(&ty.name).map_or(4, Prim::width)
}

fn align_up(offset: u32, width: u32) -> u32 {
    offset.div_ceil(width) * width
}

// ─── Type Classification ────────────────────────────────────────────────────

/// How a type is represented in guest memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Prim(Prim),
    Buffer,
    String,
    TypedArray(Prim),
    Array(TypeNode),
    StaticArray(TypeNode),
    Set(TypeNode),
    Map(TypeNode, TypeNode),
    /// Plain object, by name.
    Object(String),
    /// Instance of a class exported by this package, by export index.
    Class(u16),
    /// Imported class, interface or bare `Jig`: a `{$output, $lock}` proxy.
    Proxy(String),
}

// ─── Layouts ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: TypeNode,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    pub name: String,
    pub fields: Vec<FieldLayout>,
    pub size: u32,
}

fn layout_fields<'a>(fields: impl IntoIterator<Item = &'a FieldDef>) -> (Vec<FieldLayout>, u32) {
    let mut offset = 0u32;
    let mut out = Vec::new();
    for field in fields {
        let width = type_width(&field.ty);
        offset = align_up(offset, width);
        out.push(FieldLayout {
            name: field.name.clone(),
            ty: field.ty.clone(),
            offset,
        });
        offset += width;
    }
    (out, offset)
}

/// A callable method with its resolved export name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    /// Name of the wasm export implementing it.
    pub export_name: String,
    pub is_static: bool,
    pub args: Vec<ArgDef>,
    pub rtype: Option<TypeNode>,
}

/// A class with its inherited fields and methods flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLayout {
    pub export_idx: u16,
    pub name: String,
    /// `$output`, `$lock`, ancestor fields root first, then own fields.
    pub fields: Vec<FieldLayout>,
    pub size: u32,
    pub constructor: MethodInfo,
    /// Ancestor methods then own methods, constructor excluded.
    pub methods: Vec<MethodInfo>,
    /// The class itself, its ancestors and every interface it implements.
    pub hierarchy: Vec<String>,
}

impl ClassLayout {
    /// Fields persisted in outputs: everything after `$output` and `$lock`.
    pub fn state_fields(&self) -> &[FieldLayout] {
        &self.fields[2..]
    }

    pub fn output_field(&self) -> &FieldLayout {
        &self.fields[0]
    }

    pub fn lock_field(&self) -> &FieldLayout {
        &self.fields[1]
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, idx: u16) -> Result<&MethodInfo, ExecError> {
        self.methods.get(usize::from(idx)).ok_or_else(|| {
            ExecError::not_found(format!("method #{idx} of class {}", self.name))
        })
    }

    pub fn method_by_name(&self, name: &str) -> Result<&MethodInfo, ExecError> {
        self.methods
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| ExecError::not_found(format!("method {}.{name}", self.name)))
    }

    pub fn is_a(&self, name: &str) -> bool {
        name == JIG_TYPE || self.hierarchy.iter().any(|h| h == name)
    }
}

// ─── AbiAccess ──────────────────────────────────────────────────────────────

/// Hash-indexed view over an [`Abi`] with the built-in nodes appended.
#[derive(Debug, Clone)]
pub struct AbiAccess {
    abi: Abi,
    exports_by_name: HashMap<String, u16>,
    imports_by_name: HashMap<String, u16>,
    objects: HashMap<String, ObjectLayout>,
    classes: HashMap<u16, ClassLayout>,
    rtids: HashMap<String, u32>,
    names_by_rtid: HashMap<u32, String>,
}

fn invalid(reason: impl Into<String>) -> ExecError {
    ExecError::Validation {
        reason: format!("invalid abi: {}", reason.into()),
    }
}

fn builtin_objects() -> Vec<ObjectDef> {
    let buffer = || TypeNode::simple("ArrayBuffer");
    let field = |name: &str, ty: TypeNode| FieldDef {
        name: name.to_string(),
        ty,
    };
    vec![
        ObjectDef {
            name: OUTPUT_OBJECT.to_string(),
            fields: vec![
                field("origin", buffer()),
                field("location", buffer()),
                field("class_ptr", buffer()),
            ],
        },
        ObjectDef {
            name: LOCK_OBJECT.to_string(),
            fields: vec![
                field("origin", buffer()),
                field("type", TypeNode::simple("u32")),
                field("data", buffer()),
            ],
        },
        ObjectDef {
            name: JIG_INIT_PARAMS_OBJECT.to_string(),
            fields: vec![
                field("origin", buffer()),
                field("location", buffer()),
                field("class_ptr", buffer()),
                field("lock_type", TypeNode::simple("u8")),
                field("lock_data", buffer()),
            ],
        },
    ]
}

impl AbiAccess {
    pub fn new(abi: Abi) -> Result<Self, ExecError> {
        let mut exports_by_name = HashMap::new();
        for (idx, export) in abi.exports.iter().enumerate() {
            let idx = u16::try_from(idx).map_err(|_| invalid("too many exports"))?;
            if exports_by_name.insert(export.name().to_string(), idx).is_some() {
                return Err(invalid(format!("duplicate export {}", export.name())));
            }
        }
        let mut imports_by_name = HashMap::new();
        for (idx, import) in abi.imports.iter().enumerate() {
            let idx = u16::try_from(idx).map_err(|_| invalid("too many imports"))?;
            if exports_by_name.contains_key(import.name())
                || imports_by_name.insert(import.name().to_string(), idx).is_some()
            {
                return Err(invalid(format!("duplicate name {}", import.name())));
            }
        }

        let mut objects = HashMap::new();
        for object in abi.objects.iter().chain(builtin_objects().iter()) {
            let (fields, size) = layout_fields(&object.fields);
            let layout = ObjectLayout {
                name: object.name.clone(),
                fields,
                size,
            };
            if objects.insert(object.name.clone(), layout).is_some() {
                return Err(invalid(format!("duplicate object {}", object.name)));
            }
        }

        let mut access = Self {
            abi,
            exports_by_name,
            imports_by_name,
            objects,
            classes: HashMap::new(),
            rtids: HashMap::new(),
            names_by_rtid: HashMap::new(),
        };

        let mut classes = HashMap::new();
        for (idx, export) in access.abi.exports.iter().enumerate() {
            if let ExportDef::Class(class) = export {
                classes.insert(idx as u16, access.class_layout(idx as u16, class)?);
            }
        }
        access.classes = classes;
        access.assign_type_ids()?;
        Ok(access)
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    // ── Exports ─────────────────────────────────────────────────────────

    pub fn export(&self, idx: u16) -> Result<&ExportDef, ExecError> {
        self.abi
            .exports
            .get(usize::from(idx))
            .ok_or_else(|| ExecError::not_found(format!("export #{idx}")))
    }

    pub fn export_idx(&self, name: &str) -> Result<u16, ExecError> {
        self.exports_by_name
            .get(name)
            .copied()
            .ok_or_else(|| ExecError::not_found(format!("export {name}")))
    }

    pub fn class(&self, idx: u16) -> Result<&ClassLayout, ExecError> {
        let export = self.export(idx)?;
        self.classes
            .get(&idx)
            .ok_or_else(|| ExecError::validation(format!("export {} is not a class", export.name())))
    }

    pub fn class_by_name(&self, name: &str) -> Result<&ClassLayout, ExecError> {
        self.class(self.export_idx(name)?)
    }

    pub fn function(&self, idx: u16) -> Result<&FunctionDef, ExecError> {
        match self.export(idx)? {
            ExportDef::Function(function) => Ok(function),
            other => Err(ExecError::validation(format!(
                "export {} is not a function",
                other.name()
            ))),
        }
    }

    pub fn function_by_name(&self, name: &str) -> Result<&FunctionDef, ExecError> {
        self.function(self.export_idx(name)?)
    }

    // ── Imports and objects ─────────────────────────────────────────────

    pub fn import(&self, name: &str) -> Option<&ImportDef> {
        self.imports_by_name
            .get(name)
            .map(|idx| &self.abi.imports[usize::from(*idx)])
    }

    pub fn object(&self, name: &str) -> Result<&ObjectLayout, ExecError> {
        self.objects
            .get(name)
            .ok_or_else(|| ExecError::not_found(format!("object {name}")))
    }

    // ── Runtime type ids ────────────────────────────────────────────────

    pub fn rtid(&self, ty: &TypeNode) -> Result<u32, ExecError> {
        self.rtid_by_name(&ty.normalized_name())
    }

    pub fn rtid_by_name(&self, name: &str) -> Result<u32, ExecError> {
        self.rtids
            .get(name)
            .copied()
            .ok_or_else(|| ExecError::not_found(format!("type id for {name}")))
    }

    pub fn type_name(&self, rtid: u32) -> Result<&str, ExecError> {
        self.names_by_rtid
            .get(&rtid)
            .map(String::as_str)
            .ok_or_else(|| ExecError::not_found(format!("type with id {rtid}")))
    }

    // ── Classification ──────────────────────────────────────────────────

    pub fn classify(&self, ty: &TypeNode) -> Result<TypeKind, ExecError> {
        if let Some(prim) = Prim::from_name(&ty.name) {
            return Ok(TypeKind::Prim(prim));
        }
        if let Some(prim) = typed_array_prim(&ty.name) {
            return Ok(TypeKind::TypedArray(prim));
        }
        let arg = |n: usize| {
            ty.args
                .get(n)
                .cloned()
                .ok_or_else(|| ExecError::marshal(format!("{ty} is missing type argument {n}")))
        };
        Ok(match ty.name.as_str() {
            "void" => TypeKind::Void,
            "ArrayBuffer" => TypeKind::Buffer,
            "string" => TypeKind::String,
            "Array" => TypeKind::Array(arg(0)?),
            "StaticArray" => TypeKind::StaticArray(arg(0)?),
            "Set" => TypeKind::Set(arg(0)?),
            "Map" => TypeKind::Map(arg(0)?, arg(1)?),
            JIG_TYPE => TypeKind::Proxy(JIG_TYPE.to_string()),
            name => {
                if let Some(idx) = self.exports_by_name.get(name) {
                    match self.export(*idx)? {
                        ExportDef::Class(_) => TypeKind::Class(*idx),
                        ExportDef::Interface(_) => TypeKind::Proxy(name.to_string()),
                        ExportDef::Function(_) => {
                            return Err(ExecError::marshal(format!("{name} is a function")))
                        }
                    }
                } else if let Some(import) = self.import(name) {
                    match import {
                        ImportDef::Class { .. } | ImportDef::Interface { .. } => {
                            TypeKind::Proxy(name.to_string())
                        }
                        ImportDef::Function { .. } => {
                            return Err(ExecError::marshal(format!("{name} is a function")))
                        }
                    }
                } else if self.objects.contains_key(name) {
                    TypeKind::Object(name.to_string())
                } else {
                    return Err(ExecError::marshal(format!("unknown type {name}")));
                }
            }
        })
    }

    // ── Construction helpers ────────────────────────────────────────────

    fn class_def(&self, name: &str) -> Result<&ClassDef, ExecError> {
        match self.exports_by_name.get(name).map(|idx| self.export(*idx)) {
            Some(Ok(ExportDef::Class(class))) => Ok(class),
            _ => Err(invalid(format!("{name} is not an exported class"))),
        }
    }

    /// Ancestors of `class`, root first, ending with the class itself.
    fn lineage<'a>(&'a self, class: &'a ClassDef) -> Result<Vec<&'a ClassDef>, ExecError> {
        let mut chain = vec![class];
        let mut current = class;
        while let Some(parent) = &current.extends {
            if parent == JIG_TYPE {
                break;
            }
            let parent = self.class_def(parent)?;
            if chain.iter().any(|c| c.name == parent.name) {
                return Err(invalid(format!("inheritance cycle at {}", parent.name)));
            }
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        Ok(chain)
    }

    fn class_layout(&self, export_idx: u16, class: &ClassDef) -> Result<ClassLayout, ExecError> {
        let lineage = self.lineage(class)?;

        let base = [
            FieldDef {
                name: OUTPUT_FIELD.to_string(),
                ty: TypeNode::simple(OUTPUT_OBJECT),
            },
            FieldDef {
                name: LOCK_FIELD.to_string(),
                ty: TypeNode::simple(LOCK_OBJECT),
            },
        ];
        let (fields, size) = layout_fields(
            base.iter()
                .chain(lineage.iter().flat_map(|c| c.fields.iter())),
        );

        let constructor = class
            .methods
            .iter()
            .find(|m| m.name == CONSTRUCTOR)
            .ok_or_else(|| invalid(format!("class {} has no constructor", class.name)))?;

        let mut methods: Vec<MethodInfo> = Vec::new();
        let mut hierarchy = Vec::new();
        for ancestor in &lineage {
            hierarchy.push(ancestor.name.clone());
            hierarchy.extend(ancestor.implements.iter().cloned());
            for method in ancestor.methods.iter().filter(|m| m.name != CONSTRUCTOR) {
                let info = MethodInfo {
                    name: method.name.clone(),
                    export_name: format!("__{}_{}", ancestor.name, method.name),
                    is_static: method.is_static,
                    args: method.args.clone(),
                    rtype: method.rtype.clone(),
                };
                match methods.iter_mut().find(|m| m.name == method.name) {
                    Some(overridden) => *overridden = info,
                    None => methods.push(info),
                }
            }
        }

        Ok(ClassLayout {
            export_idx,
            name: class.name.clone(),
            fields,
            size,
            constructor: MethodInfo {
                name: CONSTRUCTOR.to_string(),
                export_name: format!("__{}_{}", class.name, CONSTRUCTOR),
                is_static: false,
                args: constructor.args.clone(),
                rtype: None,
            },
            methods,
            hierarchy,
        })
    }

    fn assign_type_ids(&mut self) -> Result<(), ExecError> {
        let mut rtids = HashMap::new();
        let mut names_by_rtid = HashMap::new();
        for (id, name) in [(BUFFER_RTID, "ArrayBuffer"), (STRING_RTID, "string")] {
            rtids.insert(name.to_string(), id);
            names_by_rtid.insert(id, name.to_string());
        }
        for def in &self.abi.type_ids {
            let reserved = names_by_rtid.get(&def.id).is_some_and(|n| n != &def.name)
                || rtids.get(&def.name).is_some_and(|id| *id != def.id);
            if reserved {
                return Err(invalid(format!("type id {} for {} conflicts", def.id, def.name)));
            }
            rtids.insert(def.name.clone(), def.id);
            names_by_rtid.insert(def.id, def.name.clone());
        }

        let mut order: Vec<String> = Vec::new();
        for export in &self.abi.exports {
            order.push(export.name().to_string());
            match export {
                ExportDef::Class(class) => {
                    for field in &class.fields {
                        collect_type_names(&field.ty, &mut order);
                    }
                    for method in &class.methods {
                        visit_signature(&method.args, method.rtype.as_ref(), &mut order);
                    }
                }
                ExportDef::Interface(iface) => {
                    for field in &iface.fields {
                        collect_type_names(&field.ty, &mut order);
                    }
                    for method in &iface.methods {
                        visit_signature(&method.args, method.rtype.as_ref(), &mut order);
                    }
                }
                ExportDef::Function(function) => {
                    visit_signature(&function.args, function.rtype.as_ref(), &mut order);
                }
            }
        }
        for import in &self.abi.imports {
            match import {
                ImportDef::Function { args, rtype, .. } => {
                    visit_signature(args, rtype.as_ref(), &mut order)
                }
                other => order.push(other.name().to_string()),
            }
        }
        for object in self.abi.objects.iter().chain(builtin_objects().iter()) {
            order.push(object.name.clone());
            for field in &object.fields {
                collect_type_names(&field.ty, &mut order);
            }
        }
        order.push(JIG_TYPE.to_string());

        let mut next = names_by_rtid.keys().copied().max().unwrap_or(STRING_RTID) + 1;
        for name in order {
            if rtids.contains_key(&name) {
                continue;
            }
            rtids.insert(name.clone(), next);
            names_by_rtid.insert(next, name);
            next += 1;
        }
        self.rtids = rtids;
        self.names_by_rtid = names_by_rtid;
        Ok(())
    }
}

fn collect_type_names(ty: &TypeNode, order: &mut Vec<String>) {
    if Prim::from_name(&ty.name).is_none() && ty.name != "void" {
        order.push(ty.normalized_name());
    }
    for arg in &ty.args {
        collect_type_names(arg, order);
    }
}

fn visit_signature(args: &[ArgDef], rtype: Option<&TypeNode>, order: &mut Vec<String>) {
    for arg in args {
        collect_type_names(&arg.ty, order);
    }
    if let Some(rtype) = rtype {
        collect_type_names(rtype, order);
    }
}
