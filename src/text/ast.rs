//! The text-format data model.
//!
//! The reader produces these structures with symbolic references
//! ([`Var::Name`]) intact; the resolver rewrites every reference to
//! [`Var::Index`]; the desugarer hoists inline conveniences into their
//! canonical top-level shapes. After both passes the module is in the form
//! the binary encoder expects.

use super::keywords::OpInfo;
use super::token::{At, BindVar, Span};
use std::fmt;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::V128 => "v128",
            ValueType::FuncRef => "funcref",
            ValueType::ExternRef => "externref",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    FuncRef,
    ExternRef,
}

impl ReferenceType {
    pub fn value_type(self) -> ValueType {
        match self {
            ReferenceType::FuncRef => ValueType::FuncRef,
            ReferenceType::ExternRef => ValueType::ExternRef,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
    Event,
}

impl ExternalKind {
    pub fn name(self) -> &'static str {
        match self {
            ExternalKind::Func => "func",
            ExternalKind::Table => "table",
            ExternalKind::Memory => "memory",
            ExternalKind::Global => "global",
            ExternalKind::Event => "event",
        }
    }
}

/// Table and memory size bounds, in elements or 64KiB pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
    /// Threads proposal: shared memories.
    pub shared: bool,
}

impl Limits {
    pub fn exact(n: u32) -> Self {
        Self {
            min: n,
            max: Some(n),
            shared: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableType {
    pub limits: Limits,
    pub elem_type: At<ReferenceType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalType {
    pub value_type: At<ValueType>,
    pub mutable: bool,
}

// ---------------------------------------------------------------------------
// Variables and function types
// ---------------------------------------------------------------------------

/// A reference to an indexed definition: numeric, or symbolic until the
/// resolver runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Var {
    Index(u32),
    Name(String),
}

impl Var {
    pub fn index(&self) -> Option<u32> {
        match self {
            Var::Index(i) => Some(*i),
            Var::Name(_) => None,
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Index(i) => write!(f, "{i}"),
            Var::Name(n) => write!(f, "${n}"),
        }
    }
}

/// A parameter or local declaration: optional binding name plus type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundLocal {
    pub name: Option<BindVar>,
    pub ty: At<ValueType>,
}

/// A function signature with parameter names attached.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoundFunctionType {
    pub params: Vec<BoundLocal>,
    pub results: Vec<At<ValueType>>,
}

impl BoundFunctionType {
    /// Drop the binding names, for structural comparison and interning.
    pub fn to_function_type(&self) -> FunctionType {
        FunctionType {
            params: self.params.iter().map(|p| p.ty.value).collect(),
            results: self.results.iter().map(|r| r.value).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.results.is_empty()
    }
}

/// A bare function signature, the unit of type-section deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

/// A reference to a function type: by index, structurally, or both.
///
/// When both are present they must agree after resolution; when neither is
/// present the signature defaults to `[] → []`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionTypeUse {
    pub type_use: Option<At<Var>>,
    pub ty: BoundFunctionType,
}

impl FunctionTypeUse {
    /// Whether the use carried inline `(param …)`/`(result …)` clauses.
    pub fn has_inline(&self) -> bool {
        !self.ty.is_empty()
    }

    /// The concrete type index; meaningful after desugaring.
    pub fn index(&self) -> Option<u32> {
        self.type_use.as_ref().and_then(|v| v.index())
    }
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

/// `offset=`/`align=` fields of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    /// log2 of the alignment in bytes.
    pub align_log2: u32,
    pub offset: u32,
}

/// Label and type of a `block`/`loop`/`if`/`try`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockImmediate {
    pub label: Option<BindVar>,
    pub ty: FunctionTypeUse,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Immediate {
    None,
    Var(At<Var>),
    BrTable {
        targets: Vec<At<Var>>,
        default: At<Var>,
    },
    BrOnExn {
        label: At<Var>,
        event: At<Var>,
    },
    CallIndirect {
        table: Option<At<Var>>,
        ty: FunctionTypeUse,
    },
    Block(BlockImmediate),
    MemArg(MemArg),
    /// Memarg followed by a lane index (`v128.load8_lane` family).
    MemArgLane { memarg: MemArg, lane: u8 },
    I32(i32),
    I64(i64),
    /// Bit pattern, so NaN payloads survive untouched.
    F32(u32),
    /// Bit pattern, so NaN payloads survive untouched.
    F64(u64),
    V128([u8; 16]),
    Lane(u8),
    Shuffle([u8; 16]),
    /// Typed `select` result list; empty means the untyped form.
    Select(Vec<At<ValueType>>),
    RefNull(At<ReferenceType>),
    TableCopy {
        dst: Option<At<Var>>,
        src: Option<At<Var>>,
    },
    TableInit {
        segment: At<Var>,
        table: Option<At<Var>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: &'static OpInfo,
    pub imm: Immediate,
    pub span: Span,
}

impl Instruction {
    pub fn new(op: &'static OpInfo, imm: Immediate, span: Span) -> Self {
        Self { op, imm, span }
    }

    pub fn bare(op: &'static OpInfo, span: Span) -> Self {
        Self::new(op, Immediate::None, span)
    }
}

// ---------------------------------------------------------------------------
// Module items
// ---------------------------------------------------------------------------

/// An inline `(import "module" "field")` attached to a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImport {
    pub span: Span,
    pub module: At<String>,
    pub field: At<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeEntry {
    pub span: Span,
    pub name: Option<BindVar>,
    pub ty: BoundFunctionType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub span: Span,
    pub name: Option<BindVar>,
    pub exports: Vec<At<String>>,
    pub import: Option<InlineImport>,
    pub type_use: FunctionTypeUse,
    pub locals: Vec<BoundLocal>,
    pub body: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableKind {
    Normal(TableType),
    /// `(table reftype (elem …))`; the limits come from the element count.
    Inline {
        elem_type: At<ReferenceType>,
        payload: ElementPayload,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub span: Span,
    pub name: Option<BindVar>,
    pub exports: Vec<At<String>>,
    pub import: Option<InlineImport>,
    pub kind: TableKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryKind {
    Normal(MemoryType),
    /// `(memory (data …))`; the limits come from the data size.
    Inline { data: Vec<At<Vec<u8>>> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    pub span: Span,
    pub name: Option<BindVar>,
    pub exports: Vec<At<String>>,
    pub import: Option<InlineImport>,
    pub kind: MemoryKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub span: Span,
    pub name: Option<BindVar>,
    pub exports: Vec<At<String>>,
    pub import: Option<InlineImport>,
    pub ty: GlobalType,
    /// Empty when the global is an inline import.
    pub init: Vec<Instruction>,
}

/// An exception event (the exceptions proposal's pre-`tag` naming).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub span: Span,
    pub name: Option<BindVar>,
    pub exports: Vec<At<String>>,
    pub import: Option<InlineImport>,
    pub type_use: FunctionTypeUse,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportDesc {
    Func {
        name: Option<BindVar>,
        type_use: FunctionTypeUse,
    },
    Table {
        name: Option<BindVar>,
        ty: TableType,
    },
    Memory {
        name: Option<BindVar>,
        ty: MemoryType,
    },
    Global {
        name: Option<BindVar>,
        ty: GlobalType,
    },
    Event {
        name: Option<BindVar>,
        type_use: FunctionTypeUse,
    },
}

impl ImportDesc {
    pub fn kind(&self) -> ExternalKind {
        match self {
            ImportDesc::Func { .. } => ExternalKind::Func,
            ImportDesc::Table { .. } => ExternalKind::Table,
            ImportDesc::Memory { .. } => ExternalKind::Memory,
            ImportDesc::Global { .. } => ExternalKind::Global,
            ImportDesc::Event { .. } => ExternalKind::Event,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub span: Span,
    pub module: At<String>,
    pub field: At<String>,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub span: Span,
    pub name: At<String>,
    pub kind: At<ExternalKind>,
    pub var: At<Var>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Start {
    pub span: Span,
    pub var: At<Var>,
}

/// Placement of an element or data segment.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentMode {
    Active {
        /// Target table or memory; absent means index 0.
        target: Option<At<Var>>,
        offset: Vec<Instruction>,
    },
    Passive,
    Declared,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementPayload {
    /// `func $f $g …`: a list of variables of one external kind.
    Vars {
        kind: At<ExternalKind>,
        vars: Vec<At<Var>>,
    },
    /// `funcref (item …)* …`: a list of constant expressions.
    Exprs {
        elem_type: At<ReferenceType>,
        exprs: Vec<Vec<Instruction>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub span: Span,
    pub name: Option<BindVar>,
    pub mode: SegmentMode,
    pub payload: ElementPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub span: Span,
    pub name: Option<BindVar>,
    pub mode: SegmentMode,
    pub data: Vec<At<Vec<u8>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModuleItem {
    Type(TypeEntry),
    Import(Import),
    Func(Func),
    Table(Table),
    Memory(Memory),
    Global(Global),
    Event(Event),
    Export(Export),
    Start(Start),
    Elem(ElementSegment),
    Data(DataSegment),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub span: Span,
    pub name: Option<BindVar>,
    pub items: Vec<ModuleItem>,
}

/// Per-kind definition counts, imports included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub types: u32,
    pub funcs: u32,
    pub tables: u32,
    pub memories: u32,
    pub globals: u32,
    pub events: u32,
    pub elems: u32,
    pub datas: u32,
}

impl Module {
    /// Count the index space sizes. Valid before and after desugaring:
    /// items with inline imports occupy an index in their kind space, and
    /// inline table/memory contents occupy an element/data segment index.
    pub fn count_kinds(&self) -> KindCounts {
        let mut c = KindCounts::default();
        for item in &self.items {
            match item {
                ModuleItem::Type(_) => c.types += 1,
                ModuleItem::Import(i) => match i.desc.kind() {
                    ExternalKind::Func => c.funcs += 1,
                    ExternalKind::Table => c.tables += 1,
                    ExternalKind::Memory => c.memories += 1,
                    ExternalKind::Global => c.globals += 1,
                    ExternalKind::Event => c.events += 1,
                },
                ModuleItem::Func(_) => c.funcs += 1,
                ModuleItem::Table(t) => {
                    c.tables += 1;
                    if matches!(t.kind, TableKind::Inline { .. }) {
                        c.elems += 1;
                    }
                }
                ModuleItem::Memory(m) => {
                    c.memories += 1;
                    if matches!(m.kind, MemoryKind::Inline { .. }) {
                        c.datas += 1;
                    }
                }
                ModuleItem::Global(_) => c.globals += 1,
                ModuleItem::Event(_) => c.events += 1,
                ModuleItem::Export(_) | ModuleItem::Start(_) => {}
                ModuleItem::Elem(_) => c.elems += 1,
                ModuleItem::Data(_) => c.datas += 1,
            }
        }
        c
    }
}

// ---------------------------------------------------------------------------
// Script commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub commands: Vec<At<Command>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Module(ScriptModule),
    Register {
        name: At<String>,
        module: Option<At<Var>>,
    },
    Action(Action),
    Assertion(Assertion),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptModule {
    pub span: Span,
    pub name: Option<BindVar>,
    pub kind: ScriptModuleKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptModuleKind {
    /// An inline text module, parsed in place.
    Text(Module),
    /// `(module binary "…"*)`: raw bytes, decoded by the binary reader.
    Binary(Vec<At<Vec<u8>>>),
    /// `(module quote "…"*)`: text to be re-lexed by the consumer.
    Quote(Vec<At<Vec<u8>>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Invoke {
        module: Option<At<Var>>,
        name: At<String>,
        args: Vec<At<Const>>,
    },
    Get {
        module: Option<At<Var>>,
        name: At<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assertion {
    Malformed {
        module: ScriptModule,
        message: At<String>,
    },
    Invalid {
        module: ScriptModule,
        message: At<String>,
    },
    Unlinkable {
        module: ScriptModule,
        message: At<String>,
    },
    ModuleTrap {
        module: ScriptModule,
        message: At<String>,
    },
    Return {
        action: Action,
        results: Vec<At<ReturnResult>>,
    },
    ActionTrap {
        action: Action,
        message: At<String>,
    },
    Exhaustion {
        action: Action,
        message: At<String>,
    },
}

/// A typed constant used as an invocation argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    I32(i32),
    I64(i64),
    /// Bit patterns, as for [`Immediate`].
    F32(u32),
    F64(u64),
    V128([u8; 16]),
    RefNull(ReferenceType),
    RefHost(u32),
}

/// An expected result, which may be a pattern rather than a single value.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnResult {
    I32(i32),
    I64(i64),
    F32(FloatResult<u32>),
    F64(FloatResult<u64>),
    /// Integer-shaped v128 expectations, as raw little-endian bytes.
    V128(Box<[u8; 16]>),
    /// Per-lane f32x4 expectations, each possibly a NaN pattern.
    F32x4([FloatResult<u32>; 4]),
    /// Per-lane f64x2 expectations, each possibly a NaN pattern.
    F64x2([FloatResult<u64>; 2]),
    RefNull,
    RefAny,
    RefFunc,
    RefHost(u32),
}

/// A float expectation: exact bits, or a NaN class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatResult<T> {
    Bits(T),
    NanCanonical,
    NanArithmetic,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::token::At;

    #[test]
    fn var_index_access() {
        assert_eq!(Var::Index(3).index(), Some(3));
        assert_eq!(Var::Name("f".into()).index(), None);
        assert_eq!(format!("{}", Var::Name("f".into())), "$f");
        assert_eq!(format!("{}", Var::Index(7)), "7");
    }

    #[test]
    fn bound_type_erases_names() {
        let bound = BoundFunctionType {
            params: vec![BoundLocal {
                name: Some(At::nowhere("p".to_string())),
                ty: At::nowhere(ValueType::I32),
            }],
            results: vec![At::nowhere(ValueType::F64)],
        };
        let ft = bound.to_function_type();
        assert_eq!(ft.params, vec![ValueType::I32]);
        assert_eq!(ft.results, vec![ValueType::F64]);
    }

    #[test]
    fn type_use_default_is_empty() {
        let use_ = FunctionTypeUse::default();
        assert!(!use_.has_inline());
        assert_eq!(use_.index(), None);
    }

    #[test]
    fn limits_exact() {
        let l = Limits::exact(2);
        assert_eq!(l.min, 2);
        assert_eq!(l.max, Some(2));
        assert!(!l.shared);
    }

    #[test]
    fn count_kinds_sees_imports_and_inline_contents() {
        let mut module = Module::default();
        module.items.push(ModuleItem::Import(Import {
            span: Span::ZERO,
            module: At::nowhere("m".into()),
            field: At::nowhere("f".into()),
            desc: ImportDesc::Func {
                name: None,
                type_use: FunctionTypeUse::default(),
            },
        }));
        module.items.push(ModuleItem::Func(Func {
            span: Span::ZERO,
            name: None,
            exports: vec![],
            import: None,
            type_use: FunctionTypeUse::default(),
            locals: vec![],
            body: vec![],
        }));
        module.items.push(ModuleItem::Memory(Memory {
            span: Span::ZERO,
            name: None,
            exports: vec![],
            import: None,
            kind: MemoryKind::Inline {
                data: vec![At::nowhere(b"hi".to_vec())],
            },
        }));

        let c = module.count_kinds();
        assert_eq!(c.funcs, 2);
        assert_eq!(c.memories, 1);
        assert_eq!(c.datas, 1);
        assert_eq!(c.elems, 0);
    }
}
