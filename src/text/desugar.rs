//! Lowering of surface conveniences into canonical module shape.
//!
//! Four rewrites, in order:
//!
//! 1. Inline `(export "n")` lists become separate `Export` items appended
//!    to the module, referencing the definition's index.
//! 2. Definitions carrying an inline `(import "m" "n")` are replaced in
//!    place by plain `Import` items (the reader has already enforced that
//!    they sit in the import prefix).
//! 3. Inline table/memory contents become fixed limits plus a synthesised
//!    active segment at offset `i32.const 0`.
//! 4. Implicit function types are interned through the two-phase
//!    [`FunctionTypeMap`]; deferred signatures are appended after the last
//!    explicit type entry and every use is given its concrete index.
//!
//! Block types that need no type-section entry (empty, or a single result)
//! keep the shorthand form rather than growing the type section.
//!
//! Desugaring an already-desugared module is the identity.

use super::ast::*;
use super::errors::ErrorSink;
use super::keywords;
use super::token::{At, Span};
use super::typemap::FunctionTypeMap;

const PAGE_SIZE: usize = 65536;

/// Desugar a module in place. Expects a name-resolved module; symbolic
/// references left by an earlier failure are ignored rather than lowered.
pub fn desugar(module: &mut Module, errors: &mut dyn ErrorSink) {
    hoist_inline_exports(module);
    split_inline_imports(module);
    lower_inline_contents(module);
    materialise_implicit_types(module, errors);
    verify_block_nesting(module, errors);
}

/// Desugar every text module embedded in a script.
pub fn desugar_script(script: &mut Script, errors: &mut dyn ErrorSink) {
    for command in &mut script.commands {
        if let Command::Module(sm) = &mut command.value
            && let ScriptModuleKind::Text(module) = &mut sm.kind
        {
            desugar(module, errors);
        }
    }
}

// ---------------------------------------------------------------------------
// Inline exports
// ---------------------------------------------------------------------------

fn hoist_inline_exports(module: &mut Module) {
    let mut counts = KindCounts::default();
    let mut hoisted = Vec::new();

    for item in &mut module.items {
        let (kind, index, exports) = match item {
            ModuleItem::Import(import) => {
                // Plain imports have no inline export list to hoist
                bump(&mut counts, import.desc.kind());
                continue;
            }
            ModuleItem::Func(f) => {
                let index = bump(&mut counts, ExternalKind::Func);
                (ExternalKind::Func, index, &mut f.exports)
            }
            ModuleItem::Table(t) => {
                let index = bump(&mut counts, ExternalKind::Table);
                if matches!(t.kind, TableKind::Inline { .. }) {
                    counts.elems += 1;
                }
                (ExternalKind::Table, index, &mut t.exports)
            }
            ModuleItem::Memory(m) => {
                let index = bump(&mut counts, ExternalKind::Memory);
                if matches!(m.kind, MemoryKind::Inline { .. }) {
                    counts.datas += 1;
                }
                (ExternalKind::Memory, index, &mut m.exports)
            }
            ModuleItem::Global(g) => {
                let index = bump(&mut counts, ExternalKind::Global);
                (ExternalKind::Global, index, &mut g.exports)
            }
            ModuleItem::Event(e) => {
                let index = bump(&mut counts, ExternalKind::Event);
                (ExternalKind::Event, index, &mut e.exports)
            }
            _ => continue,
        };

        for name in exports.drain(..) {
            hoisted.push(ModuleItem::Export(Export {
                span: name.span,
                name,
                kind: At::nowhere(kind),
                var: At::nowhere(Var::Index(index)),
            }));
        }
    }

    module.items.extend(hoisted);
}

fn bump(counts: &mut KindCounts, kind: ExternalKind) -> u32 {
    let slot = match kind {
        ExternalKind::Func => &mut counts.funcs,
        ExternalKind::Table => &mut counts.tables,
        ExternalKind::Memory => &mut counts.memories,
        ExternalKind::Global => &mut counts.globals,
        ExternalKind::Event => &mut counts.events,
    };
    let index = *slot;
    *slot += 1;
    index
}

// ---------------------------------------------------------------------------
// Inline imports
// ---------------------------------------------------------------------------

fn split_inline_imports(module: &mut Module) {
    for item in &mut module.items {
        let replacement = match item {
            ModuleItem::Func(f) => f.import.take().map(|ii| Import {
                span: f.span,
                module: ii.module,
                field: ii.field,
                desc: ImportDesc::Func {
                    name: f.name.take(),
                    type_use: std::mem::take(&mut f.type_use),
                },
            }),
            ModuleItem::Table(t) => t.import.take().map(|ii| Import {
                span: t.span,
                module: ii.module,
                field: ii.field,
                desc: ImportDesc::Table {
                    name: t.name.take(),
                    ty: match &t.kind {
                        TableKind::Normal(ty) => ty.clone(),
                        // An import cannot carry inline contents; the reader
                        // never produces this shape.
                        TableKind::Inline { elem_type, .. } => TableType {
                            limits: Limits::exact(0),
                            elem_type: elem_type.clone(),
                        },
                    },
                },
            }),
            ModuleItem::Memory(m) => m.import.take().map(|ii| Import {
                span: m.span,
                module: ii.module,
                field: ii.field,
                desc: ImportDesc::Memory {
                    name: m.name.take(),
                    ty: match &m.kind {
                        MemoryKind::Normal(ty) => ty.clone(),
                        MemoryKind::Inline { .. } => MemoryType {
                            limits: Limits::exact(0),
                        },
                    },
                },
            }),
            ModuleItem::Global(g) => g.import.take().map(|ii| Import {
                span: g.span,
                module: ii.module,
                field: ii.field,
                desc: ImportDesc::Global {
                    name: g.name.take(),
                    ty: g.ty.clone(),
                },
            }),
            ModuleItem::Event(e) => e.import.take().map(|ii| Import {
                span: e.span,
                module: ii.module,
                field: ii.field,
                desc: ImportDesc::Event {
                    name: e.name.take(),
                    type_use: std::mem::take(&mut e.type_use),
                },
            }),
            _ => None,
        };
        if let Some(import) = replacement {
            *item = ModuleItem::Import(import);
        }
    }
}

// ---------------------------------------------------------------------------
// Inline table/memory contents
// ---------------------------------------------------------------------------

fn i32_const_zero() -> Vec<Instruction> {
    let op = keywords::opcode("i32.const").unwrap();
    vec![Instruction::new(op, Immediate::I32(0), Span::ZERO)]
}

fn lower_inline_contents(module: &mut Module) {
    let mut table_index = 0u32;
    let mut memory_index = 0u32;
    let mut items = Vec::with_capacity(module.items.len());

    for mut item in module.items.drain(..) {
        let mut synthesised: Option<ModuleItem> = None;
        match &mut item {
            ModuleItem::Import(import) => match import.desc.kind() {
                ExternalKind::Table => table_index += 1,
                ExternalKind::Memory => memory_index += 1,
                _ => {}
            },
            ModuleItem::Table(t) => {
                if let TableKind::Inline { elem_type, payload } = &mut t.kind {
                    let n = match payload {
                        ElementPayload::Vars { vars, .. } => vars.len(),
                        ElementPayload::Exprs { exprs, .. } => exprs.len(),
                    } as u32;
                    let elem_type = elem_type.clone();
                    let payload = std::mem::replace(
                        payload,
                        ElementPayload::Vars {
                            kind: At::nowhere(ExternalKind::Func),
                            vars: Vec::new(),
                        },
                    );
                    synthesised = Some(ModuleItem::Elem(ElementSegment {
                        span: t.span,
                        name: None,
                        mode: SegmentMode::Active {
                            target: Some(At::nowhere(Var::Index(table_index))),
                            offset: i32_const_zero(),
                        },
                        payload,
                    }));
                    t.kind = TableKind::Normal(TableType {
                        limits: Limits::exact(n),
                        elem_type,
                    });
                }
                table_index += 1;
            }
            ModuleItem::Memory(m) => {
                if let MemoryKind::Inline { data } = &mut m.kind {
                    let total: usize = data.iter().map(|chunk| chunk.value.len()).sum();
                    let pages = total.div_ceil(PAGE_SIZE) as u32;
                    synthesised = Some(ModuleItem::Data(DataSegment {
                        span: m.span,
                        name: None,
                        mode: SegmentMode::Active {
                            target: Some(At::nowhere(Var::Index(memory_index))),
                            offset: i32_const_zero(),
                        },
                        data: std::mem::take(data),
                    }));
                    m.kind = MemoryKind::Normal(MemoryType {
                        limits: Limits::exact(pages),
                    });
                }
                memory_index += 1;
            }
            _ => {}
        }
        items.push(item);
        if let Some(segment) = synthesised {
            items.push(segment);
        }
    }

    module.items = items;
}

// ---------------------------------------------------------------------------
// Implicit function types
// ---------------------------------------------------------------------------

fn materialise_implicit_types(module: &mut Module, errors: &mut dyn ErrorSink) {
    let mut map = FunctionTypeMap::new();
    for item in &module.items {
        if let ModuleItem::Type(entry) = item {
            map.define(entry.ty.to_function_type());
        }
    }

    for item in &mut module.items {
        match item {
            ModuleItem::Import(import) => match &mut import.desc {
                ImportDesc::Func { type_use, .. } | ImportDesc::Event { type_use, .. } => {
                    intern_use(&mut map, type_use, true, errors);
                }
                _ => {}
            },
            ModuleItem::Func(f) => {
                intern_use(&mut map, &mut f.type_use, true, errors);
                intern_body(&mut map, &mut f.body, errors);
            }
            ModuleItem::Event(e) => intern_use(&mut map, &mut e.type_use, true, errors),
            ModuleItem::Global(g) => intern_body(&mut map, &mut g.init, errors),
            ModuleItem::Elem(e) => {
                if let SegmentMode::Active { offset, .. } = &mut e.mode {
                    intern_body(&mut map, offset, errors);
                }
                if let ElementPayload::Exprs { exprs, .. } = &mut e.payload {
                    for expr in exprs {
                        intern_body(&mut map, expr, errors);
                    }
                }
            }
            ModuleItem::Data(d) => {
                if let SegmentMode::Active { offset, .. } = &mut d.mode {
                    intern_body(&mut map, offset, errors);
                }
            }
            _ => {}
        }
    }

    for ty in map.end_module() {
        module.items.push(ModuleItem::Type(TypeEntry {
            span: Span::ZERO,
            name: None,
            ty: unbind(&ty),
        }));
    }
}

fn unbind(ty: &FunctionType) -> BoundFunctionType {
    BoundFunctionType {
        params: ty
            .params
            .iter()
            .map(|&vt| BoundLocal {
                name: None,
                ty: At::nowhere(vt),
            })
            .collect(),
        results: ty.results.iter().map(|&vt| At::nowhere(vt)).collect(),
    }
}

/// Give a use its concrete index. `needs_entry` is set for uses that always
/// require a type-section entry (functions, events, `call_indirect`); block
/// types only need one for multi-value signatures.
fn intern_use(
    map: &mut FunctionTypeMap,
    use_: &mut FunctionTypeUse,
    needs_entry: bool,
    errors: &mut dyn ErrorSink,
) {
    match &use_.type_use {
        None => {
            let multi = !use_.ty.params.is_empty() || use_.ty.results.len() > 1;
            if needs_entry || multi {
                let index = map.use_type(&use_.ty.to_function_type());
                use_.type_use = Some(At::nowhere(Var::Index(index)));
            }
        }
        Some(var) => {
            if let Var::Index(index) = var.value
                && use_.has_inline()
                && let Some(expected) = map.get(index)
                && *expected != use_.ty.to_function_type()
            {
                errors.on_error(
                    var.span,
                    format!("Inline function type does not match type at index {index}"),
                );
            }
        }
    }
}

fn intern_body(map: &mut FunctionTypeMap, body: &mut [Instruction], errors: &mut dyn ErrorSink) {
    for inst in body {
        match &mut inst.imm {
            Immediate::Block(bi) => intern_use(map, &mut bi.ty, false, errors),
            Immediate::CallIndirect { ty, .. } => intern_use(map, ty, true, errors),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Block nesting
// ---------------------------------------------------------------------------

fn verify_block_nesting(module: &Module, errors: &mut dyn ErrorSink) {
    for item in &module.items {
        if let ModuleItem::Func(f) = item {
            let mut depth = 0i64;
            for inst in &f.body {
                match inst.op.name {
                    "block" | "loop" | "if" | "try" => depth += 1,
                    "end" => depth -= 1,
                    _ => {}
                }
                if depth < 0 {
                    errors.on_error(inst.span, "Unexpected end".to_string());
                    break;
                }
            }
            if depth > 0 {
                errors.on_error(f.span, "Expected end of block".to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;
    use crate::text::errors::TextErrors;
    use crate::text::read;
    use crate::text::resolve;
    use crate::text::tokenizer::Tokenizer;

    fn pipeline(source: &str) -> (Module, TextErrors) {
        let mut errors = TextErrors::new();
        let mut t = Tokenizer::new(source);
        let mut module = read::read_module(&mut t, Features::default(), &mut errors)
            .expect("reader returned no module");
        assert!(!errors.has_error(), "reader: {:?}", errors.diagnostics());
        resolve::resolve(&mut module, &mut errors);
        assert!(!errors.has_error(), "resolver: {:?}", errors.diagnostics());
        desugar(&mut module, &mut errors);
        (module, errors)
    }

    fn type_entries(module: &Module) -> Vec<FunctionType> {
        module
            .items
            .iter()
            .filter_map(|item| match item {
                ModuleItem::Type(entry) => Some(entry.ty.to_function_type()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn implicit_type_is_interned() {
        let (module, errors) =
            pipeline("(module (func $f (param $p i32) (result i32) local.get $p))");
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
        let types = type_entries(&module);
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].params, vec![ValueType::I32]);
        assert_eq!(types[0].results, vec![ValueType::I32]);
        for item in &module.items {
            if let ModuleItem::Func(f) = item {
                assert_eq!(f.type_use.index(), Some(0));
            }
        }
    }

    #[test]
    fn explicit_types_keep_their_indices() {
        // The function precedes the explicit type, but the explicit entry
        // still gets index 0; the implicit [i32] -> [] is deferred to 1.
        let (module, errors) = pipeline("(module (func (param i32)) (type (func)))");
        assert!(!errors.has_error());
        let types = type_entries(&module);
        assert_eq!(types.len(), 2);
        assert_eq!(types[0], FunctionType::default());
        assert_eq!(
            types[1],
            FunctionType {
                params: vec![ValueType::I32],
                results: vec![],
            }
        );
        for item in &module.items {
            if let ModuleItem::Func(f) = item {
                assert_eq!(f.type_use.index(), Some(1));
            }
        }
    }

    #[test]
    fn identical_signatures_share_an_entry() {
        let (module, errors) = pipeline(
            "(module (type (func (param i32))) (func (param i32)) (func (param i32)))",
        );
        assert!(!errors.has_error());
        assert_eq!(type_entries(&module).len(), 1);
    }

    #[test]
    fn inline_export_becomes_export_item() {
        let (module, errors) = pipeline("(module (func $f (export \"run\")))");
        assert!(!errors.has_error());
        let export = module
            .items
            .iter()
            .find_map(|item| match item {
                ModuleItem::Export(e) => Some(e),
                _ => None,
            })
            .expect("no export item");
        assert_eq!(export.name.value, "run");
        assert_eq!(export.kind.value, ExternalKind::Func);
        assert_eq!(export.var.value, Var::Index(0));
        for item in &module.items {
            if let ModuleItem::Func(f) = item {
                assert!(f.exports.is_empty());
            }
        }
    }

    #[test]
    fn inline_import_is_split_in_place() {
        let (module, errors) =
            pipeline("(module (func $f (import \"env\" \"f\") (param i32)))");
        assert!(!errors.has_error());
        let import = match &module.items[0] {
            ModuleItem::Import(i) => i,
            other => panic!("expected import first, got {other:?}"),
        };
        assert_eq!(import.module.value, "env");
        assert_eq!(import.field.value, "f");
        match &import.desc {
            ImportDesc::Func { name, type_use } => {
                assert_eq!(name.as_ref().map(|n| n.value.as_str()), Some("f"));
                assert_eq!(type_use.index(), Some(0));
            }
            other => panic!("expected func import, got {other:?}"),
        }
    }

    #[test]
    fn inline_table_contents_synthesise_segment() {
        let (module, errors) =
            pipeline("(module (func $f) (table funcref (elem $f $f $f)))");
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
        let table = module
            .items
            .iter()
            .find_map(|item| match item {
                ModuleItem::Table(t) => Some(t),
                _ => None,
            })
            .unwrap();
        match &table.kind {
            TableKind::Normal(ty) => {
                assert_eq!(ty.limits.min, 3);
                assert_eq!(ty.limits.max, Some(3));
            }
            other => panic!("expected lowered table, got {other:?}"),
        }
        let elem = module
            .items
            .iter()
            .find_map(|item| match item {
                ModuleItem::Elem(e) => Some(e),
                _ => None,
            })
            .unwrap();
        match &elem.mode {
            SegmentMode::Active { target, offset } => {
                assert_eq!(target.as_ref().unwrap().value, Var::Index(0));
                assert_eq!(offset.len(), 1);
                assert_eq!(offset[0].imm, Immediate::I32(0));
            }
            other => panic!("expected active segment, got {other:?}"),
        }
    }

    #[test]
    fn inline_memory_data_sets_page_limits() {
        let (module, errors) = pipeline("(module (memory (data \"hi\")))");
        assert!(!errors.has_error());
        let memory = module
            .items
            .iter()
            .find_map(|item| match item {
                ModuleItem::Memory(m) => Some(m),
                _ => None,
            })
            .unwrap();
        match &memory.kind {
            MemoryKind::Normal(ty) => {
                assert_eq!(ty.limits.min, 1);
                assert_eq!(ty.limits.max, Some(1));
            }
            other => panic!("expected lowered memory, got {other:?}"),
        }
        let data = module
            .items
            .iter()
            .find_map(|item| match item {
                ModuleItem::Data(d) => Some(d),
                _ => None,
            })
            .unwrap();
        let bytes: Vec<u8> = data.data.iter().flat_map(|c| c.value.clone()).collect();
        assert_eq!(bytes, b"hi");
        assert!(matches!(&data.mode, SegmentMode::Active { .. }));
    }

    #[test]
    fn single_result_block_keeps_shorthand() {
        let (module, errors) =
            pipeline("(module (func (result i32) (block (result i32) (i32.const 1))))");
        assert!(!errors.has_error());
        // Only the function's own [ ] -> [i32] type is in the section
        assert_eq!(type_entries(&module).len(), 1);
    }

    #[test]
    fn type_mismatch_with_inline_signature_is_diagnosed() {
        let (_, errors) = pipeline(
            "(module (type (func (param i32))) (func (type 0) (param f64) nop))",
        );
        assert!(errors.has_error());
        assert!(
            errors.diagnostics()[0]
                .message
                .contains("does not match type at index 0")
        );
    }

    #[test]
    fn desugar_is_idempotent() {
        let source = "(module
            (type (func))
            (func $f (export \"f\") (param i32))
            (table funcref (elem $f))
            (memory (data \"xyz\")))";
        let (mut module, errors) = pipeline(source);
        assert!(!errors.has_error());
        let snapshot = module.clone();
        let mut errors = TextErrors::new();
        desugar(&mut module, &mut errors);
        assert!(!errors.has_error());
        assert_eq!(module, snapshot);
    }
}
