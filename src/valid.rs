//! Structural validation of desugared modules.
//!
//! Covers the index-space and shape checks that need no type context:
//! every index immediate is within its kind's count, `start` is nullary,
//! alignment never exceeds the natural alignment, and single-table /
//! single-memory restrictions hold when the relevant proposals are off.
//! Instruction sequence type-checking is out of scope; the module is never
//! mutated.

use crate::features::Features;
use crate::text::ast::*;
use crate::text::errors::ErrorSink;
use crate::text::keywords::ImmKind;
use crate::text::token::{At, Span};

struct ValidCtx<'a> {
    features: Features,
    counts: KindCounts,
    /// Type index of each function, imports first.
    func_types: Vec<Option<u32>>,
    /// Explicit type entries in index order.
    types: Vec<FunctionType>,
    errors: &'a mut dyn ErrorSink,
}

/// Validate a desugared module, reporting through the sink.
pub fn validate(module: &Module, features: Features, errors: &mut dyn ErrorSink) {
    let counts = module.count_kinds();

    let mut types = Vec::new();
    let mut func_types = Vec::new();
    for item in &module.items {
        match item {
            ModuleItem::Type(entry) => types.push(entry.ty.to_function_type()),
            ModuleItem::Import(import) => {
                if let ImportDesc::Func { type_use, .. } = &import.desc {
                    func_types.push(type_use.index());
                }
            }
            ModuleItem::Func(f) => func_types.push(f.type_use.index()),
            _ => {}
        }
    }

    let mut ctx = ValidCtx {
        features,
        counts,
        func_types,
        types,
        errors,
    };
    ctx.validate_module(module);
}

impl<'a> ValidCtx<'a> {
    fn error(&mut self, span: Span, message: String) {
        self.errors.on_error(span, message);
    }

    fn check_index(&mut self, var: &At<Var>, count: u32, kind: &str) {
        if let Var::Index(index) = var.value
            && index >= count
        {
            self.error(var.span, format!("{kind} index {index} out of bounds"));
        }
    }

    fn check_target(&mut self, target: &Option<At<Var>>, count: u32, kind: &str) {
        if let Some(var) = target {
            self.check_index(var, count, kind);
        }
    }

    fn check_type_use(&mut self, use_: &FunctionTypeUse, span: Span) {
        if let Some(var) = &use_.type_use {
            self.check_index(var, self.counts.types, "type");
        } else if use_.has_inline() {
            self.error(span, "function type use was not materialised".to_string());
        }
    }

    fn validate_module(&mut self, module: &Module) {
        if self.counts.memories > 1 {
            self.error(module.span, "Multiple memories not allowed".to_string());
        }
        if self.counts.tables > 1 && !self.features.reference_types() {
            self.error(module.span, "Multiple tables not allowed".to_string());
        }

        for item in &module.items {
            match item {
                ModuleItem::Type(_) => {}
                ModuleItem::Import(import) => self.validate_import(import),
                ModuleItem::Func(f) => {
                    self.check_type_use(&f.type_use, f.span);
                    self.validate_body(&f.body);
                }
                ModuleItem::Table(_) | ModuleItem::Memory(_) => {}
                ModuleItem::Global(g) => self.validate_body(&g.init),
                ModuleItem::Event(e) => self.check_type_use(&e.type_use, e.span),
                ModuleItem::Export(e) => self.validate_export(e),
                ModuleItem::Start(s) => self.validate_start(s),
                ModuleItem::Elem(e) => self.validate_elem(e),
                ModuleItem::Data(d) => {
                    if let SegmentMode::Active { target, offset } = &d.mode {
                        self.check_target(target, self.counts.memories, "memory");
                        self.validate_body(offset);
                    }
                }
            }
        }
    }

    fn validate_import(&mut self, import: &Import) {
        match &import.desc {
            ImportDesc::Func { type_use, .. } | ImportDesc::Event { type_use, .. } => {
                self.check_type_use(type_use, import.span);
            }
            ImportDesc::Global { ty, .. } => {
                if ty.mutable && !self.features.mutable_globals() {
                    self.error(import.span, "Mutable globals cannot be imported".to_string());
                }
            }
            _ => {}
        }
    }

    fn validate_export(&mut self, export: &Export) {
        let count = match export.kind.value {
            ExternalKind::Func => self.counts.funcs,
            ExternalKind::Table => self.counts.tables,
            ExternalKind::Memory => self.counts.memories,
            ExternalKind::Global => self.counts.globals,
            ExternalKind::Event => self.counts.events,
        };
        self.check_index(&export.var, count, export.kind.value.name());
    }

    fn validate_start(&mut self, start: &Start) {
        self.check_index(&start.var, self.counts.funcs, "function");
        if let Var::Index(index) = start.var.value
            && let Some(Some(type_index)) = self.func_types.get(index as usize)
            && let Some(ty) = self.types.get(*type_index as usize)
            && !(ty.params.is_empty() && ty.results.is_empty())
        {
            self.error(
                start.span,
                "Start function must have no parameters and no results".to_string(),
            );
        }
    }

    fn validate_elem(&mut self, e: &ElementSegment) {
        if let SegmentMode::Active { target, offset } = &e.mode {
            self.check_target(target, self.counts.tables, "table");
            self.validate_body(offset);
        }
        match &e.payload {
            ElementPayload::Vars { vars, .. } => {
                for var in vars {
                    self.check_index(var, self.counts.funcs, "function");
                }
            }
            ElementPayload::Exprs { exprs, .. } => {
                for expr in exprs {
                    self.validate_body(expr);
                }
            }
        }
    }

    fn validate_body(&mut self, body: &[Instruction]) {
        for inst in body {
            match &inst.imm {
                Immediate::Var(var) => {
                    let (count, kind) = match inst.op.imm {
                        ImmKind::Func => (self.counts.funcs, "function"),
                        ImmKind::Global => (self.counts.globals, "global"),
                        ImmKind::Elem => (self.counts.elems, "element"),
                        ImmKind::Data => (self.counts.datas, "data"),
                        ImmKind::Event => (self.counts.events, "event"),
                        ImmKind::TableUse => (self.counts.tables, "table"),
                        // Locals and labels need per-function context the
                        // resolver already enforced
                        _ => continue,
                    };
                    self.check_index(var, count, kind);
                }
                Immediate::CallIndirect { table, ty } => {
                    self.check_target(table, self.counts.tables, "table");
                    self.check_type_use(ty, inst.span);
                }
                Immediate::Block(bi) => {
                    if let Some(var) = &bi.ty.type_use {
                        self.check_index(var, self.counts.types, "type");
                    }
                }
                Immediate::BrOnExn { event, .. } => {
                    self.check_index(event, self.counts.events, "event");
                }
                Immediate::TableCopy { dst, src } => {
                    self.check_target(dst, self.counts.tables, "table");
                    self.check_target(src, self.counts.tables, "table");
                }
                Immediate::TableInit { segment, table } => {
                    self.check_index(segment, self.counts.elems, "element");
                    self.check_target(table, self.counts.tables, "table");
                }
                Immediate::MemArg(memarg) => {
                    if let ImmKind::Memarg(natural) = inst.op.imm
                        && memarg.align_log2 > natural
                    {
                        self.error(
                            inst.span,
                            "Alignment must not be larger than natural alignment".to_string(),
                        );
                    }
                }
                Immediate::MemArgLane { memarg, .. } => {
                    if let ImmKind::MemargLane(natural, _) = inst.op.imm
                        && memarg.align_log2 > natural
                    {
                        self.error(
                            inst.span,
                            "Alignment must not be larger than natural alignment".to_string(),
                        );
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;
    use crate::text::errors::TextErrors;
    use crate::text::parse_module;

    fn validate_source(source: &str, features: Features) -> TextErrors {
        let mut errors = TextErrors::new();
        let module = parse_module(source, features, &mut errors)
            .unwrap_or_else(|| panic!("parse failed: {:?}", errors.diagnostics()));
        let mut errors = TextErrors::new();
        validate(&module, features, &mut errors);
        errors
    }

    #[test]
    fn clean_module_passes() {
        let errors = validate_source(
            r#"(module
                (memory 1)
                (func (export "f") (param i32) (result i32)
                    local.get 0
                    i32.load offset=4))"#,
            Features::default(),
        );
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
    }

    #[test]
    fn call_out_of_bounds() {
        let errors = validate_source("(module (func call 7))", Features::default());
        assert!(errors.has_error());
        assert!(
            errors.diagnostics()[0]
                .message
                .contains("function index 7 out of bounds")
        );
    }

    #[test]
    fn start_must_be_nullary() {
        let errors = validate_source(
            "(module (func $f (param i32)) (start $f))",
            Features::default(),
        );
        assert!(errors.has_error());
        assert!(errors.diagnostics()[0].message.contains("Start function"));
    }

    #[test]
    fn nullary_start_is_fine() {
        let errors =
            validate_source("(module (func $f) (start $f))", Features::default());
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
    }

    #[test]
    fn oversized_alignment_is_rejected() {
        let errors = validate_source(
            "(module (memory 1) (func (i32.load align=8 (i32.const 0)) drop))",
            Features::default(),
        );
        assert!(errors.has_error());
        assert!(errors.diagnostics()[0].message.contains("natural alignment"));
    }

    #[test]
    fn multiple_memories_rejected() {
        let errors =
            validate_source("(module (memory 1) (memory 1))", Features::default());
        assert!(errors.has_error());
        assert!(errors.diagnostics()[0].message.contains("Multiple memories"));
    }

    #[test]
    fn multiple_tables_gated_on_reference_types() {
        let source = "(module (table 1 funcref) (table 1 funcref))";
        let errors = validate_source(source, Features::default());
        assert!(errors.has_error());

        let mut features = Features::default();
        features.enable(crate::features::REFERENCE_TYPES);
        let errors = validate_source(source, features);
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
    }

    #[test]
    fn mutable_global_import_gated() {
        let source = r#"(module (import "e" "g" (global (mut i32))))"#;
        let mut features = Features::default();
        features.disable(crate::features::MUTABLE_GLOBALS);
        let errors = validate_source(source, features);
        assert!(errors.has_error());
        assert!(errors.diagnostics()[0].message.contains("Mutable globals"));
    }

    #[test]
    fn export_index_bounds() {
        let errors = validate_source(
            r#"(module (export "f" (func 3)))"#,
            Features::default(),
        );
        assert!(errors.has_error());
    }
}
