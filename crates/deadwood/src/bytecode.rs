//! Serde data model for the decompiler collaborator's JSON.
//!
//! One decompiled class is an object with a `methods` list; each method
//! carries its parameter types, return type, and a `code` object holding the
//! ordered opcode records (keyed by `offset`) and the offset→source-line
//! table. The opcode records form a closed tagged union on `"opr"` — an
//! unknown tag is a parse error, never a silent fall-through.
//!
//! Offsets index the opcode list directly; the decompiler emits them that
//! way and the analysis relies on it for fall-through (`offset + 1`).

use serde::{Deserialize, Serialize};

use crate::domain::CmpCond;

/// A decompiled class: name plus method list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompiledClass {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<Method>,
}

impl DecompiledClass {
    /// Parses the decompiler's JSON output.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Looks a method up by name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// One method of a decompiled class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub returns: Option<ReturnDesc>,
    #[serde(default)]
    pub code: Option<Code>,
}

/// A parameter type, either annotated (`{"type": …}`) or plain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    Annotated {
        #[serde(rename = "type")]
        ty: JvmType,
    },
    Plain(JvmType),
}

/// A return type; `{"type": null}` (or a missing object) is void.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnDesc {
    #[serde(rename = "type", default)]
    pub ty: Option<JvmType>,
}

/// The code attribute: bytecode plus line table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    #[serde(default)]
    pub bytecode: Vec<Opcode>,
    #[serde(default)]
    pub lines: Vec<LineEntry>,
}

/// One offset→source-line record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    pub offset: u32,
    pub line: u32,
}

/// The decompiler's type encoding: a primitive name, an array
/// (`{"kind": "array", "type": …}`), or the annotated `{"base": …}` wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JvmType {
    Primitive(Primitive),
    Array(ArrayType),
    Annotated(Box<Annotated>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Boolean,
    Byte,
    Char,
    Short,
    #[serde(rename = "int", alias = "integer")]
    Int,
    Long,
    #[serde(alias = "single")]
    Float,
    Double,
    Ref,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayType {
    pub kind: ArrayKind,
    #[serde(rename = "type")]
    pub inner: Box<JvmType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayKind {
    Array,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotated {
    pub base: JvmType,
}

/// A typed constant operand of `push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConstValue {
    #[serde(rename = "int", alias = "integer")]
    Int { value: i64 },
    Boolean { value: bool },
    Byte { value: i64 },
    Short { value: i64 },
    Char { value: char },
    Long { value: i64 },
    Float { value: f64 },
    Double { value: f64 },
    Ref {
        #[serde(default)]
        value: Option<serde_json::Value>,
    },
}

impl ConstValue {
    /// The numeric view handed to the abstraction function. A null reference
    /// reads as the null sentinel 0.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int { value } | Self::Byte { value } | Self::Short { value } | Self::Long { value } => {
                *value as f64
            }
            Self::Boolean { value } => f64::from(u8::from(*value)),
            Self::Char { value } => f64::from(u32::from(*value)),
            Self::Float { value } | Self::Double { value } => *value,
            Self::Ref { .. } => 0.0,
        }
    }
}

/// A binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// A static or instance field reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub name: String,
    #[serde(default)]
    pub class: Option<String>,
}

/// Invocation access kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeAccess {
    Static,
    Virtual,
    Special,
    Interface,
    Dynamic,
}

/// The callee of an `invoke`, as far as the abstract no-op needs it: arity
/// and whether a value comes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeTarget {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Vec<Param>,
    #[serde(default)]
    pub returns: Option<ReturnDesc>,
}

impl InvokeTarget {
    pub fn returns_void(&self) -> bool {
        match &self.returns {
            None => true,
            Some(desc) => desc.ty.is_none(),
        }
    }
}

fn default_on_nan() -> i8 {
    1
}

/// One opcode record, tagged by `"opr"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "opr", rename_all = "snake_case")]
pub enum Opcode {
    Push {
        offset: u32,
        #[serde(default)]
        value: Option<ConstValue>,
    },
    Load {
        offset: u32,
        #[serde(rename = "type", default)]
        ty: Option<JvmType>,
        index: u16,
    },
    Store {
        offset: u32,
        #[serde(rename = "type", default)]
        ty: Option<JvmType>,
        index: u16,
    },
    Dup {
        offset: u32,
    },
    Binary {
        offset: u32,
        #[serde(rename = "type", default)]
        ty: Option<JvmType>,
        operant: BinaryOp,
    },
    Negate {
        offset: u32,
        #[serde(rename = "type", default)]
        ty: Option<JvmType>,
    },
    Ifz {
        offset: u32,
        condition: CmpCond,
        target: u32,
    },
    If {
        offset: u32,
        condition: CmpCond,
        target: u32,
    },
    Goto {
        offset: u32,
        target: u32,
    },
    Incr {
        offset: u32,
        index: u16,
        amount: i64,
    },
    Return {
        offset: u32,
        #[serde(rename = "type", default)]
        ty: Option<JvmType>,
    },
    Get {
        offset: u32,
        #[serde(rename = "static", default)]
        is_static: bool,
        field: FieldRef,
    },
    New {
        offset: u32,
        class: String,
    },
    #[serde(rename = "newarray")]
    NewArray {
        offset: u32,
        #[serde(rename = "type", default)]
        ty: Option<JvmType>,
        #[serde(default)]
        dim: Option<u32>,
    },
    ArrayStore {
        offset: u32,
        #[serde(rename = "type", default)]
        ty: Option<JvmType>,
    },
    ArrayLoad {
        offset: u32,
        #[serde(rename = "type", default)]
        ty: Option<JvmType>,
    },
    #[serde(rename = "arraylength")]
    ArrayLength {
        offset: u32,
    },
    Cast {
        offset: u32,
        #[serde(rename = "from", default)]
        from_ty: Option<JvmType>,
        #[serde(rename = "to", default)]
        to_ty: Option<JvmType>,
    },
    CompareFloating {
        offset: u32,
        #[serde(rename = "type", default)]
        ty: Option<JvmType>,
        #[serde(default = "default_on_nan")]
        onnan: i8,
    },
    Invoke {
        offset: u32,
        access: InvokeAccess,
        method: InvokeTarget,
    },
    Throw {
        offset: u32,
    },
}

impl Opcode {
    /// The bytecode offset of this record.
    pub fn offset(&self) -> u32 {
        match self {
            Self::Push { offset, .. }
            | Self::Load { offset, .. }
            | Self::Store { offset, .. }
            | Self::Dup { offset }
            | Self::Binary { offset, .. }
            | Self::Negate { offset, .. }
            | Self::Ifz { offset, .. }
            | Self::If { offset, .. }
            | Self::Goto { offset, .. }
            | Self::Incr { offset, .. }
            | Self::Return { offset, .. }
            | Self::Get { offset, .. }
            | Self::New { offset, .. }
            | Self::NewArray { offset, .. }
            | Self::ArrayStore { offset, .. }
            | Self::ArrayLoad { offset, .. }
            | Self::ArrayLength { offset }
            | Self::Cast { offset, .. }
            | Self::CompareFloating { offset, .. }
            | Self::Invoke { offset, .. }
            | Self::Throw { offset } => *offset,
        }
    }

    /// The wire tag, for diagnostics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Push { .. } => "push",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::Dup { .. } => "dup",
            Self::Binary { .. } => "binary",
            Self::Negate { .. } => "negate",
            Self::Ifz { .. } => "ifz",
            Self::If { .. } => "if",
            Self::Goto { .. } => "goto",
            Self::Incr { .. } => "incr",
            Self::Return { .. } => "return",
            Self::Get { .. } => "get",
            Self::New { .. } => "new",
            Self::NewArray { .. } => "newarray",
            Self::ArrayStore { .. } => "array_store",
            Self::ArrayLoad { .. } => "array_load",
            Self::ArrayLength { .. } => "arraylength",
            Self::Cast { .. } => "cast",
            Self::CompareFloating { .. } => "compare_floating",
            Self::Invoke { .. } => "invoke",
            Self::Throw { .. } => "throw",
        }
    }
}
