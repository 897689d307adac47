//! Name resolution: symbolic references to numeric indices.
//!
//! Two sweeps. The first walks items in declaration order and assigns each
//! definition the next index in its kind's scope, binding names as it goes
//! (anonymous definitions still consume an index). The second rewrites
//! every [`Var::Name`] occurrence to [`Var::Index`]. Labels are not a flat
//! scope: they live on a stack entered at `block`/`loop`/`if`/`try` and
//! popped at `end`, and resolve innermost-out (0 = innermost), shadowing
//! allowed.
//!
//! Resolution is idempotent: binding names survive in the AST, so a second
//! run rebuilds identical scopes and finds nothing left to rewrite.

use super::ast::*;
use super::errors::ErrorSink;
use super::keywords::ImmKind;
use super::token::{At, BindVar};
use std::collections::HashMap;

/// A per-kind ordered scope: names to dense indices from zero.
#[derive(Debug, Default)]
pub struct NameMap {
    map: HashMap<String, u32>,
    next: u32,
}

impl NameMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name to the next index. Returns the previously bound index on
    /// a duplicate.
    pub fn new_bound(&mut self, name: &str) -> Result<u32, u32> {
        if let Some(&prior) = self.map.get(name) {
            return Err(prior);
        }
        let index = self.next;
        self.next += 1;
        self.map.insert(name.to_string(), index);
        Ok(index)
    }

    /// Consume the next index without binding a name.
    pub fn new_unbound(&mut self) -> u32 {
        let index = self.next;
        self.next += 1;
        index
    }

    pub fn has(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.map.get(name).copied()
    }

    pub fn len(&self) -> u32 {
        self.next
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }
}

#[derive(Default)]
struct ResolveCtx {
    types: NameMap,
    funcs: NameMap,
    tables: NameMap,
    memories: NameMap,
    globals: NameMap,
    events: NameMap,
    elems: NameMap,
    datas: NameMap,
    /// Explicit type entries in declaration order, for the parameter counts
    /// of `(type n)`-only function headers.
    type_entries: Vec<BoundFunctionType>,
    locals: NameMap,
    labels: Vec<Option<String>>,
}

/// Resolve all names in a module in place.
pub fn resolve(module: &mut Module, errors: &mut dyn ErrorSink) {
    let mut ctx = ResolveCtx::default();
    collect_bindings(module, &mut ctx, errors);
    resolve_references(module, &mut ctx, errors);
}

/// Resolve every text module embedded in a script.
pub fn resolve_script(script: &mut Script, errors: &mut dyn ErrorSink) {
    for command in &mut script.commands {
        if let Command::Module(sm) = &mut command.value
            && let ScriptModuleKind::Text(module) = &mut sm.kind
        {
            resolve(module, errors);
        }
    }
}

// ---------------------------------------------------------------------------
// Sweep 1: collect bindings
// ---------------------------------------------------------------------------

fn define(map: &mut NameMap, name: &Option<BindVar>, errors: &mut dyn ErrorSink) {
    match name {
        Some(n) => {
            if let Err(prior) = map.new_bound(&n.value) {
                errors.on_error(
                    n.span,
                    format!("Variable ${} is already bound to index {prior}", n.value),
                );
            }
        }
        None => {
            map.new_unbound();
        }
    }
}

fn collect_bindings(module: &Module, ctx: &mut ResolveCtx, errors: &mut dyn ErrorSink) {
    for item in &module.items {
        match item {
            ModuleItem::Type(entry) => {
                define(&mut ctx.types, &entry.name, errors);
                ctx.type_entries.push(entry.ty.clone());
            }
            ModuleItem::Import(import) => match &import.desc {
                ImportDesc::Func { name, .. } => define(&mut ctx.funcs, name, errors),
                ImportDesc::Table { name, .. } => define(&mut ctx.tables, name, errors),
                ImportDesc::Memory { name, .. } => define(&mut ctx.memories, name, errors),
                ImportDesc::Global { name, .. } => define(&mut ctx.globals, name, errors),
                ImportDesc::Event { name, .. } => define(&mut ctx.events, name, errors),
            },
            ModuleItem::Func(f) => define(&mut ctx.funcs, &f.name, errors),
            ModuleItem::Table(t) => {
                define(&mut ctx.tables, &t.name, errors);
                if matches!(t.kind, TableKind::Inline { .. }) {
                    // The synthesised active segment takes an element index
                    ctx.elems.new_unbound();
                }
            }
            ModuleItem::Memory(m) => {
                define(&mut ctx.memories, &m.name, errors);
                if matches!(m.kind, MemoryKind::Inline { .. }) {
                    ctx.datas.new_unbound();
                }
            }
            ModuleItem::Global(g) => define(&mut ctx.globals, &g.name, errors),
            ModuleItem::Event(e) => define(&mut ctx.events, &e.name, errors),
            ModuleItem::Export(_) | ModuleItem::Start(_) => {}
            ModuleItem::Elem(e) => define(&mut ctx.elems, &e.name, errors),
            ModuleItem::Data(d) => define(&mut ctx.datas, &d.name, errors),
        }
    }
}

// ---------------------------------------------------------------------------
// Sweep 2: resolve references
// ---------------------------------------------------------------------------

fn resolve_var(map: &NameMap, var: &mut At<Var>, errors: &mut dyn ErrorSink) {
    if let Var::Name(name) = &var.value {
        match map.get(name) {
            Some(index) => var.value = Var::Index(index),
            None => errors.on_error(var.span, format!("Undefined variable ${name}")),
        }
    }
}

fn resolve_var_opt(map: &NameMap, var: &mut Option<At<Var>>, errors: &mut dyn ErrorSink) {
    if let Some(var) = var {
        resolve_var(map, var, errors);
    }
}

fn resolve_type_use(ctx: &ResolveCtx, use_: &mut FunctionTypeUse, errors: &mut dyn ErrorSink) {
    if let Some(var) = &mut use_.type_use {
        resolve_var(&ctx.types, var, errors);
    }
}

fn resolve_references(module: &mut Module, ctx: &mut ResolveCtx, errors: &mut dyn ErrorSink) {
    for item in &mut module.items {
        match item {
            ModuleItem::Type(_) => {}
            ModuleItem::Import(import) => match &mut import.desc {
                ImportDesc::Func { type_use, .. } | ImportDesc::Event { type_use, .. } => {
                    resolve_type_use(ctx, type_use, errors);
                }
                _ => {}
            },
            ModuleItem::Func(f) => resolve_func(f, ctx, errors),
            ModuleItem::Table(t) => {
                if let TableKind::Inline { payload, .. } = &mut t.kind {
                    resolve_element_payload(payload, ctx, errors);
                }
            }
            ModuleItem::Memory(_) => {}
            ModuleItem::Global(g) => resolve_instructions(&mut g.init, ctx, errors),
            ModuleItem::Event(e) => resolve_type_use(ctx, &mut e.type_use, errors),
            ModuleItem::Export(e) => {
                let map = match e.kind.value {
                    ExternalKind::Func => &ctx.funcs,
                    ExternalKind::Table => &ctx.tables,
                    ExternalKind::Memory => &ctx.memories,
                    ExternalKind::Global => &ctx.globals,
                    ExternalKind::Event => &ctx.events,
                };
                resolve_var(map, &mut e.var, errors);
            }
            ModuleItem::Start(s) => resolve_var(&ctx.funcs, &mut s.var, errors),
            ModuleItem::Elem(e) => {
                if let SegmentMode::Active { target, offset } = &mut e.mode {
                    resolve_var_opt(&ctx.tables, target, errors);
                    resolve_instructions(offset, ctx, errors);
                }
                resolve_element_payload(&mut e.payload, ctx, errors);
            }
            ModuleItem::Data(d) => {
                if let SegmentMode::Active { target, offset } = &mut d.mode {
                    resolve_var_opt(&ctx.memories, target, errors);
                    resolve_instructions(offset, ctx, errors);
                }
            }
        }
    }
}

fn resolve_element_payload(
    payload: &mut ElementPayload,
    ctx: &mut ResolveCtx,
    errors: &mut dyn ErrorSink,
) {
    match payload {
        ElementPayload::Vars { vars, .. } => {
            for var in vars {
                resolve_var(&ctx.funcs, var, errors);
            }
        }
        ElementPayload::Exprs { exprs, .. } => {
            for expr in exprs {
                resolve_instructions(expr, ctx, errors);
            }
        }
    }
}

/// Build the function's local scope (parameters first, then locals) and
/// resolve its body.
fn resolve_func(f: &mut Func, ctx: &mut ResolveCtx, errors: &mut dyn ErrorSink) {
    resolve_type_use(ctx, &mut f.type_use, errors);

    ctx.locals = NameMap::new();
    if !f.type_use.has_inline()
        && let Some(index) = f.type_use.index()
    {
        // Header is `(type n)` with no inline params: the type's parameters
        // still occupy local indices.
        let params = ctx
            .type_entries
            .get(index as usize)
            .map(|ty| ty.params.len())
            .unwrap_or(0);
        for _ in 0..params {
            ctx.locals.new_unbound();
        }
    } else {
        for param in &f.type_use.ty.params {
            define(&mut ctx.locals, &param.name, errors);
        }
    }
    for local in &f.locals {
        define(&mut ctx.locals, &local.name, errors);
    }

    ctx.labels.clear();
    resolve_instructions(&mut f.body, ctx, errors);
}

fn resolve_label(labels: &[Option<String>], var: &mut At<Var>, errors: &mut dyn ErrorSink) {
    if let Var::Name(name) = &var.value {
        let found = labels
            .iter()
            .rev()
            .position(|label| label.as_deref() == Some(name.as_str()));
        match found {
            Some(depth) => var.value = Var::Index(depth as u32),
            None => errors.on_error(var.span, format!("Undefined variable ${name}")),
        }
    }
}

fn resolve_instructions(
    body: &mut [Instruction],
    ctx: &mut ResolveCtx,
    errors: &mut dyn ErrorSink,
) {
    for inst in body {
        match &mut inst.imm {
            Immediate::Block(bi) => {
                resolve_type_use(ctx, &mut bi.ty, errors);
                ctx.labels.push(bi.label.as_ref().map(|l| l.value.clone()));
                continue;
            }
            Immediate::Var(var) => {
                match inst.op.imm {
                    ImmKind::Label => resolve_label(&ctx.labels, var, errors),
                    ImmKind::Func => resolve_var(&ctx.funcs, var, errors),
                    ImmKind::Local => resolve_var(&ctx.locals, var, errors),
                    ImmKind::Global => resolve_var(&ctx.globals, var, errors),
                    ImmKind::Elem => resolve_var(&ctx.elems, var, errors),
                    ImmKind::Data => resolve_var(&ctx.datas, var, errors),
                    ImmKind::Event => resolve_var(&ctx.events, var, errors),
                    ImmKind::TableUse => resolve_var(&ctx.tables, var, errors),
                    _ => {}
                }
            }
            Immediate::BrTable { targets, default } => {
                for target in targets {
                    resolve_label(&ctx.labels, target, errors);
                }
                resolve_label(&ctx.labels, default, errors);
            }
            Immediate::BrOnExn { label, event } => {
                resolve_label(&ctx.labels, label, errors);
                resolve_var(&ctx.events, event, errors);
            }
            Immediate::CallIndirect { table, ty } => {
                resolve_var_opt(&ctx.tables, table, errors);
                resolve_type_use(ctx, ty, errors);
            }
            Immediate::TableCopy { dst, src } => {
                resolve_var_opt(&ctx.tables, dst, errors);
                resolve_var_opt(&ctx.tables, src, errors);
            }
            Immediate::TableInit { segment, table } => {
                resolve_var(&ctx.elems, segment, errors);
                resolve_var_opt(&ctx.tables, table, errors);
            }
            _ => {}
        }
        if inst.op.name == "end" {
            ctx.labels.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;
    use crate::text::errors::TextErrors;
    use crate::text::read;
    use crate::text::tokenizer::Tokenizer;

    fn parse_and_resolve(source: &str) -> (Module, TextErrors) {
        let mut errors = TextErrors::new();
        let mut t = Tokenizer::new(source);
        let mut module = read::read_module(&mut t, Features::default(), &mut errors)
            .expect("reader returned no module");
        assert!(
            !errors.has_error(),
            "reader errors: {:?}",
            errors.diagnostics()
        );
        resolve(&mut module, &mut errors);
        (module, errors)
    }

    fn body_of(module: &Module, at: usize) -> &[Instruction] {
        let mut seen = 0;
        for item in &module.items {
            if let ModuleItem::Func(f) = item {
                if seen == at {
                    return &f.body;
                }
                seen += 1;
            }
        }
        panic!("no function {at}");
    }

    #[test]
    fn name_map_binds_densely() {
        let mut map = NameMap::new();
        assert_eq!(map.new_bound("a"), Ok(0));
        assert_eq!(map.new_unbound(), 1);
        assert_eq!(map.new_bound("b"), Ok(2));
        assert_eq!(map.new_bound("a"), Err(0));
        assert!(map.has("a"));
        assert_eq!(map.get("b"), Some(2));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn locals_resolve_params_first() {
        let (module, errors) = parse_and_resolve(
            "(module (func $f (param $p i32) (local $l i32) local.get $p local.get $l))",
        );
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
        let body = body_of(&module, 0);
        assert_eq!(body[0].imm, Immediate::Var(At::nowhere(Var::Index(0))));
        assert_eq!(body[1].imm, Immediate::Var(At::nowhere(Var::Index(1))));
    }

    #[test]
    fn function_references_resolve_forward() {
        let (module, errors) =
            parse_and_resolve("(module (func $a call $b) (func $b call $a))");
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
        let body = body_of(&module, 0);
        assert_eq!(body[0].imm, Immediate::Var(At::nowhere(Var::Index(1))));
        let body = body_of(&module, 1);
        assert_eq!(body[0].imm, Immediate::Var(At::nowhere(Var::Index(0))));
    }

    #[test]
    fn imports_consume_indices_first() {
        let (module, errors) = parse_and_resolve(
            "(module (import \"e\" \"f\" (func $imp)) (func $def call $imp call $def))",
        );
        assert!(!errors.has_error());
        let body = body_of(&module, 0);
        assert_eq!(body[0].imm, Immediate::Var(At::nowhere(Var::Index(0))));
        assert_eq!(body[1].imm, Immediate::Var(At::nowhere(Var::Index(1))));
    }

    #[test]
    fn labels_resolve_innermost_out() {
        let (module, errors) = parse_and_resolve(
            "(module (func (block $outer (block $inner (br $inner) (br $outer)))))",
        );
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
        let body = body_of(&module, 0);
        // body: block, block, br, br, end, end
        assert_eq!(body[2].imm, Immediate::Var(At::nowhere(Var::Index(0))));
        assert_eq!(body[3].imm, Immediate::Var(At::nowhere(Var::Index(1))));
    }

    #[test]
    fn label_shadowing_picks_innermost() {
        let (module, errors) =
            parse_and_resolve("(module (func (block $l (block $l (br $l)))))");
        assert!(!errors.has_error());
        let body = body_of(&module, 0);
        assert_eq!(body[2].imm, Immediate::Var(At::nowhere(Var::Index(0))));
    }

    #[test]
    fn undefined_variable_is_diagnosed() {
        let (_, errors) = parse_and_resolve("(module (func call $missing))");
        assert!(errors.has_error());
        assert!(
            errors.diagnostics()[0]
                .message
                .contains("Undefined variable $missing")
        );
    }

    #[test]
    fn type_only_header_reserves_param_indices() {
        let (module, errors) = parse_and_resolve(
            "(module (type (func (param i32 i32))) (func (type 0) (local $l i32) local.get $l))",
        );
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
        let body = body_of(&module, 0);
        // Two anonymous parameters occupy indices 0 and 1
        assert_eq!(body[0].imm, Immediate::Var(At::nowhere(Var::Index(2))));
    }

    #[test]
    fn resolve_is_idempotent() {
        let source = "(module
            (global $g i32 (i32.const 1))
            (func $f (param $p i32) (block $b (br $b)) global.get $g local.get $p))";
        let (mut module, errors) = parse_and_resolve(source);
        assert!(!errors.has_error());
        let snapshot = module.clone();
        let mut errors = TextErrors::new();
        resolve(&mut module, &mut errors);
        assert!(!errors.has_error());
        assert_eq!(module, snapshot);
    }

    #[test]
    fn export_and_start_resolve() {
        let (module, errors) = parse_and_resolve(
            "(module (func $main) (export \"main\" (func $main)) (start $main))",
        );
        assert!(!errors.has_error());
        let mut saw_export = false;
        let mut saw_start = false;
        for item in &module.items {
            match item {
                ModuleItem::Export(e) => {
                    assert_eq!(e.var.value, Var::Index(0));
                    saw_export = true;
                }
                ModuleItem::Start(s) => {
                    assert_eq!(s.var.value, Var::Index(0));
                    saw_start = true;
                }
                _ => {}
            }
        }
        assert!(saw_export && saw_start);
    }
}
