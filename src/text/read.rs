//! Recursive-descent reader for modules and scripts.
//!
//! Every production returns `Option<T>`: failure reports through the error
//! sink and returns `None`, and the enclosing item reader recovers by
//! skipping to the next balanced `)` so independent top-level forms still
//! parse. Feature-gated grammar rejects disabled constructs with explicit
//! diagnostics rather than generic token errors.
//!
//! Symbolic references are kept as [`Var::Name`]; only binding-site
//! duplicates are diagnosed here. Reference resolution is the resolver's
//! job, and inline-form lowering is the desugarer's.

use super::ast::*;
use super::errors::ErrorSink;
use super::keywords::{self, ImmKind, OpInfo};
use super::num;
use super::token::{At, BindVar, Kw, Span, Token, TokenKind};
use super::tokenizer::Tokenizer;
use crate::features::Features;
use std::collections::HashMap;

/// Read a single `(module …)` (or a bare sequence of module fields) from
/// the tokenizer.
pub fn read_module(
    t: &mut Tokenizer<'_>,
    features: Features,
    errors: &mut dyn ErrorSink,
) -> Option<Module> {
    let mut ctx = ReadCtx::new(features, errors);
    ctx.read_single_module(t)
}

/// Read a whole script: commands until end of input.
pub fn read_script(
    t: &mut Tokenizer<'_>,
    features: Features,
    errors: &mut dyn ErrorSink,
) -> Option<Script> {
    let mut ctx = ReadCtx::new(features, errors);
    ctx.read_script(t)
}

// ---------------------------------------------------------------------------
// Read-time name tables
// ---------------------------------------------------------------------------

/// Binding-site bookkeeping for one index space. Anonymous definitions
/// still consume an index, which keeps the reported indices in duplicate
/// diagnostics aligned with the resolver's numbering.
#[derive(Default)]
struct Names {
    map: HashMap<String, u32>,
    next: u32,
}

impl Names {
    fn bind(&mut self, name: &str) -> Result<u32, u32> {
        if let Some(&prior) = self.map.get(name) {
            return Err(prior);
        }
        let index = self.next;
        self.next += 1;
        self.map.insert(name.to_string(), index);
        Ok(index)
    }

    fn skip(&mut self) -> u32 {
        let index = self.next;
        self.next += 1;
        index
    }
}

/// The index spaces that have read-time binding tables.
#[derive(Clone, Copy)]
enum Ns {
    Type,
    Func,
    Table,
    Memory,
    Global,
    Event,
    Elem,
    Data,
    Local,
}

#[derive(Default)]
struct ModuleNames {
    types: Names,
    funcs: Names,
    tables: Names,
    memories: Names,
    globals: Names,
    events: Names,
    elems: Names,
    datas: Names,
    locals: Names,
}

// ---------------------------------------------------------------------------
// Reader context
// ---------------------------------------------------------------------------

pub struct ReadCtx<'a> {
    features: Features,
    errors: &'a mut dyn ErrorSink,
    names: ModuleNames,
    seen_non_import: bool,
    seen_start: bool,
}

impl<'a> ReadCtx<'a> {
    pub fn new(features: Features, errors: &'a mut dyn ErrorSink) -> Self {
        Self {
            features,
            errors,
            names: ModuleNames::default(),
            seen_non_import: false,
            seen_start: false,
        }
    }

    fn error(&mut self, span: Span, message: String) {
        self.errors.on_error(span, message);
    }

    fn reset_module(&mut self) {
        self.names = ModuleNames::default();
        self.seen_non_import = false;
        self.seen_start = false;
    }

    fn ns(&mut self, ns: Ns) -> &mut Names {
        match ns {
            Ns::Type => &mut self.names.types,
            Ns::Func => &mut self.names.funcs,
            Ns::Table => &mut self.names.tables,
            Ns::Memory => &mut self.names.memories,
            Ns::Global => &mut self.names.globals,
            Ns::Event => &mut self.names.events,
            Ns::Elem => &mut self.names.elems,
            Ns::Data => &mut self.names.datas,
            Ns::Local => &mut self.names.locals,
        }
    }

    // -----------------------------------------------------------------------
    // Token-level helpers
    // -----------------------------------------------------------------------

    fn expect_lpar(&mut self, t: &mut Tokenizer<'_>) -> Option<Token> {
        match t.match_token(&TokenKind::Lpar) {
            Some(token) => Some(token),
            None => {
                let peeked = t.peek(0).clone();
                self.error(peeked.span, format!("Expected Lpar, got {}", peeked.kind));
                None
            }
        }
    }

    fn expect_rpar(&mut self, t: &mut Tokenizer<'_>) -> Option<Token> {
        match t.match_token(&TokenKind::Rpar) {
            Some(token) => Some(token),
            None => {
                let peeked = t.peek(0).clone();
                self.error(peeked.span, format!("Expected Rpar, got {}", peeked.kind));
                None
            }
        }
    }

    fn expect_kw(&mut self, t: &mut Tokenizer<'_>, kw: Kw) -> Option<Token> {
        match t.match_kw(kw) {
            Some(token) => Some(token),
            None => {
                let peeked = t.peek(0).clone();
                self.error(
                    peeked.span,
                    format!("Expected {}, got {}", kw.ident(), peeked.kind),
                );
                None
            }
        }
    }

    /// Recover after a failed production: consume tokens until the `)` that
    /// closes the current depth, so the next top-level form parses cleanly.
    fn skip_balanced(&mut self, t: &mut Tokenizer<'_>) {
        let mut depth = 0usize;
        loop {
            match t.peek(0).kind {
                TokenKind::Eof => return,
                TokenKind::Lpar | TokenKind::LparAnn(_) => depth += 1,
                TokenKind::Rpar => {
                    if depth == 0 {
                        t.read();
                        return;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            t.read();
        }
    }

    fn span_from(t: &Tokenizer<'_>, start: Span) -> Span {
        Span::new(start.start, t.previous().span.end, start.line, start.column)
    }

    // -----------------------------------------------------------------------
    // Variables and identifiers
    // -----------------------------------------------------------------------

    /// A required variable: `nat | $id`.
    fn read_var(&mut self, t: &mut Tokenizer<'_>) -> Option<At<Var>> {
        match self.read_var_opt(t) {
            Some(var) => Some(var),
            None => {
                let peeked = t.peek(0).clone();
                self.error(peeked.span, format!("Expected var, got {}", peeked.kind));
                None
            }
        }
    }

    /// An optional variable; no diagnostic when absent.
    fn read_var_opt(&mut self, t: &mut Tokenizer<'_>) -> Option<At<Var>> {
        match &t.peek(0).kind {
            TokenKind::Nat(text) => {
                let text = text.clone();
                let token = t.read();
                match num::nat32(&text) {
                    Some(index) => Some(At::new(token.span, Var::Index(index))),
                    None => {
                        self.error(token.span, format!("Index out of range, got {text}"));
                        None
                    }
                }
            }
            TokenKind::Id(name) => {
                let name = name.clone();
                let token = t.read();
                Some(At::new(token.span, Var::Name(name)))
            }
            _ => None,
        }
    }

    /// An optional binding identifier. A present `$id` is entered into the
    /// given index space; an absent one still consumes the next index, so
    /// later duplicate diagnostics report the numbering the resolver will
    /// assign.
    fn read_bind_var_opt(&mut self, t: &mut Tokenizer<'_>, ns: Ns) -> Option<BindVar> {
        if let TokenKind::Id(name) = &t.peek(0).kind {
            let name = name.clone();
            let token = t.read();
            if let Err(prior) = self.ns(ns).bind(&name) {
                self.error(
                    token.span,
                    format!("Variable ${name} is already bound to index {prior}"),
                );
            }
            Some(At::new(token.span, name))
        } else {
            self.ns(ns).skip();
            None
        }
    }

    /// An optional label identifier. Labels use shadowing stack scopes, not
    /// a flat table, so nothing is bound here.
    fn read_label_opt(&mut self, t: &mut Tokenizer<'_>) -> Option<BindVar> {
        if let TokenKind::Id(name) = &t.peek(0).kind {
            let name = name.clone();
            let token = t.read();
            Some(At::new(token.span, name))
        } else {
            None
        }
    }

    // -----------------------------------------------------------------------
    // Numeric productions
    // -----------------------------------------------------------------------

    fn read_nat32(&mut self, t: &mut Tokenizer<'_>) -> Option<At<u32>> {
        let peeked = t.peek(0).clone();
        match &peeked.kind {
            TokenKind::Nat(text) => {
                let text = text.clone();
                t.read();
                match num::nat32(&text) {
                    Some(v) => Some(At::new(peeked.span, v)),
                    None => {
                        self.error(peeked.span, format!("Constant out of range, got {text}"));
                        None
                    }
                }
            }
            kind => {
                self.error(peeked.span, format!("Expected Nat, got {kind}"));
                None
            }
        }
    }

    fn read_i32(&mut self, t: &mut Tokenizer<'_>) -> Option<At<i32>> {
        self.read_int_with(t, num::i32_lit)
    }

    fn read_i64(&mut self, t: &mut Tokenizer<'_>) -> Option<At<i64>> {
        self.read_int_with(t, num::i64_lit)
    }

    fn read_int_with<T>(
        &mut self,
        t: &mut Tokenizer<'_>,
        convert: fn(&str) -> Option<T>,
    ) -> Option<At<T>> {
        let peeked = t.peek(0).clone();
        match &peeked.kind {
            TokenKind::Nat(text) | TokenKind::Int(text) => {
                let text = text.clone();
                t.read();
                match convert(&text) {
                    Some(v) => Some(At::new(peeked.span, v)),
                    None => {
                        self.error(peeked.span, format!("Constant out of range, got {text}"));
                        None
                    }
                }
            }
            kind => {
                self.error(peeked.span, format!("Expected Int, got {kind}"));
                None
            }
        }
    }

    fn read_f32(&mut self, t: &mut Tokenizer<'_>) -> Option<At<u32>> {
        self.read_float_with(t, |s| num::f32_lit(s).map(f32::to_bits))
    }

    fn read_f64(&mut self, t: &mut Tokenizer<'_>) -> Option<At<u64>> {
        self.read_float_with(t, |s| num::f64_lit(s).map(f64::to_bits))
    }

    fn read_float_with<T>(
        &mut self,
        t: &mut Tokenizer<'_>,
        convert: fn(&str) -> Option<T>,
    ) -> Option<At<T>> {
        let peeked = t.peek(0).clone();
        match &peeked.kind {
            TokenKind::Nat(text) | TokenKind::Int(text) | TokenKind::Float(text) => {
                let text = text.clone();
                t.read();
                match convert(&text) {
                    Some(v) => Some(At::new(peeked.span, v)),
                    None => {
                        self.error(peeked.span, format!("Constant out of range, got {text}"));
                        None
                    }
                }
            }
            kind => {
                self.error(peeked.span, format!("Expected Float, got {kind}"));
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Strings
    // -----------------------------------------------------------------------

    fn read_text(&mut self, t: &mut Tokenizer<'_>) -> Option<At<Vec<u8>>> {
        let peeked = t.peek(0).clone();
        match &peeked.kind {
            TokenKind::Text(text) => {
                let bytes = text.decode();
                t.read();
                Some(At::new(peeked.span, bytes))
            }
            kind => {
                self.error(peeked.span, format!("Expected Text, got {kind}"));
                None
            }
        }
    }

    fn read_utf8(&mut self, t: &mut Tokenizer<'_>) -> Option<At<String>> {
        let peeked = t.peek(0).clone();
        match &peeked.kind {
            TokenKind::Text(text) => {
                let decoded = text.decode_string();
                t.read();
                match decoded {
                    Some(s) => Some(At::new(peeked.span, s)),
                    None => {
                        self.error(peeked.span, "Invalid UTF-8 encoding".to_string());
                        None
                    }
                }
            }
            kind => {
                self.error(peeked.span, format!("Expected Text, got {kind}"));
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------------

    fn read_value_type(&mut self, t: &mut Tokenizer<'_>) -> Option<At<ValueType>> {
        let peeked = t.peek(0).clone();
        match peeked.kind {
            TokenKind::ValType(vt) => {
                t.read();
                let allowed = match vt {
                    ValueType::V128 => self.features.simd(),
                    ValueType::FuncRef | ValueType::ExternRef => self.features.reference_types(),
                    _ => true,
                };
                if !allowed {
                    self.error(peeked.span, format!("value type {vt} not allowed"));
                    return None;
                }
                Some(At::new(peeked.span, vt))
            }
            kind => {
                self.error(peeked.span, format!("Expected value type, got {kind}"));
                None
            }
        }
    }

    /// A table element type. `funcref` is MVP here; `externref` requires
    /// reference types.
    fn read_reference_type(&mut self, t: &mut Tokenizer<'_>) -> Option<At<ReferenceType>> {
        let peeked = t.peek(0).clone();
        match peeked.kind {
            TokenKind::ValType(ValueType::FuncRef) => {
                t.read();
                Some(At::new(peeked.span, ReferenceType::FuncRef))
            }
            TokenKind::ValType(ValueType::ExternRef) => {
                t.read();
                if !self.features.reference_types() {
                    self.error(peeked.span, "value type externref not allowed".to_string());
                    return None;
                }
                Some(At::new(peeked.span, ReferenceType::ExternRef))
            }
            kind => {
                self.error(peeked.span, format!("Expected reference type, got {kind}"));
                None
            }
        }
    }

    fn read_global_type(&mut self, t: &mut Tokenizer<'_>) -> Option<GlobalType> {
        if t.match_lpar(Kw::Mut).is_some() {
            let value_type = self.read_value_type(t)?;
            self.expect_rpar(t)?;
            Some(GlobalType {
                value_type,
                mutable: true,
            })
        } else {
            let value_type = self.read_value_type(t)?;
            Some(GlobalType {
                value_type,
                mutable: false,
            })
        }
    }

    fn read_limits(&mut self, t: &mut Tokenizer<'_>) -> Option<Limits> {
        let min = self.read_nat32(t)?;
        let max = if matches!(t.peek(0).kind, TokenKind::Nat(_)) {
            Some(self.read_nat32(t)?.value)
        } else {
            None
        };
        let shared = if let Some(token) = t.match_kw(Kw::Shared) {
            if !self.features.threads() {
                self.error(token.span, "Shared memories not allowed".to_string());
            }
            true
        } else {
            false
        };
        Some(Limits {
            min: min.value,
            max,
            shared,
        })
    }

    // -----------------------------------------------------------------------
    // Params, results, locals, type uses
    // -----------------------------------------------------------------------

    /// Zero or more `(param $id? t…)` clauses. When `bind` is set, each
    /// parameter consumes an index in the function's local scope; named
    /// clauses bind exactly one type.
    fn read_bound_param_list(
        &mut self,
        t: &mut Tokenizer<'_>,
        bind: bool,
    ) -> Option<Vec<BoundLocal>> {
        let mut params = Vec::new();
        while t.match_lpar(Kw::Param).is_some() {
            if matches!(t.peek(0).kind, TokenKind::Id(_)) {
                let name = if bind {
                    self.read_bind_var_opt(t, Ns::Local)
                } else {
                    self.read_label_opt(t)
                };
                let ty = self.read_value_type(t)?;
                params.push(BoundLocal { name, ty });
                self.expect_rpar(t)?;
            } else {
                while !matches!(t.peek(0).kind, TokenKind::Rpar | TokenKind::Eof) {
                    let ty = self.read_value_type(t)?;
                    if bind {
                        self.names.locals.skip();
                    }
                    params.push(BoundLocal { name: None, ty });
                }
                self.expect_rpar(t)?;
            }
        }
        Some(params)
    }

    /// Zero or more `(result t…)` clauses.
    fn read_result_list(&mut self, t: &mut Tokenizer<'_>) -> Option<Vec<At<ValueType>>> {
        let mut results = Vec::new();
        while let Some(token) = t.match_lpar(Kw::Result) {
            while !matches!(t.peek(0).kind, TokenKind::Rpar | TokenKind::Eof) {
                results.push(self.read_value_type(t)?);
            }
            self.expect_rpar(t)?;
            if results.len() > 1 && !self.features.multi_value() {
                self.error(token.span, "Multiple result values not allowed".to_string());
            }
        }
        Some(results)
    }

    /// Zero or more `(local $id? t…)` clauses, all bound in the function's
    /// local scope.
    fn read_local_list(&mut self, t: &mut Tokenizer<'_>) -> Option<Vec<BoundLocal>> {
        let mut locals = Vec::new();
        while t.match_lpar(Kw::Local).is_some() {
            if matches!(t.peek(0).kind, TokenKind::Id(_)) {
                let name = self.read_bind_var_opt(t, Ns::Local);
                let ty = self.read_value_type(t)?;
                locals.push(BoundLocal { name, ty });
                self.expect_rpar(t)?;
            } else {
                while !matches!(t.peek(0).kind, TokenKind::Rpar | TokenKind::Eof) {
                    let ty = self.read_value_type(t)?;
                    self.names.locals.skip();
                    locals.push(BoundLocal { name: None, ty });
                }
                self.expect_rpar(t)?;
            }
        }
        Some(locals)
    }

    /// `(type var)? (param …)* (result …)*`. The inline signature, when
    /// present, is kept alongside the (possibly missing) index; interning of
    /// index-less uses happens during desugaring.
    fn read_function_type_use(&mut self, t: &mut Tokenizer<'_>, bind: bool) -> Option<FunctionTypeUse> {
        let type_use = if t.match_lpar(Kw::Type).is_some() {
            let var = self.read_var(t)?;
            self.expect_rpar(t)?;
            Some(var)
        } else {
            None
        };
        let params = self.read_bound_param_list(t, bind)?;
        let results = self.read_result_list(t)?;
        Some(FunctionTypeUse {
            type_use,
            ty: BoundFunctionType { params, results },
        })
    }

    // -----------------------------------------------------------------------
    // Inline imports and exports
    // -----------------------------------------------------------------------

    /// `(export "name")*` attached to a definition.
    fn read_inline_export_list(&mut self, t: &mut Tokenizer<'_>) -> Option<Vec<At<String>>> {
        let mut exports = Vec::new();
        while t.match_lpar(Kw::Export).is_some() {
            exports.push(self.read_utf8(t)?);
            self.expect_rpar(t)?;
        }
        Some(exports)
    }

    /// `(import "module" "field")?` attached to a definition.
    fn read_inline_import_opt(&mut self, t: &mut Tokenizer<'_>) -> Option<InlineImport> {
        let token = t.match_lpar(Kw::Import)?;
        if self.seen_non_import {
            self.error(
                token.span,
                "Imports must occur before all non-import definitions".to_string(),
            );
        }
        let module = self.read_utf8(t)?;
        let field = self.read_utf8(t)?;
        self.expect_rpar(t)?;
        Some(InlineImport {
            span: token.span,
            module,
            field,
        })
    }

    // -----------------------------------------------------------------------
    // Instructions
    // -----------------------------------------------------------------------

    /// A sequence of instructions (plain, block-structured, or folded),
    /// ending before `)`, `end`, `else`, `catch`, or end of input.
    fn read_instruction_list(
        &mut self,
        t: &mut Tokenizer<'_>,
        out: &mut Vec<Instruction>,
    ) -> Option<()> {
        loop {
            match &t.peek(0).kind {
                TokenKind::Lpar => self.read_expression(t, out)?,
                TokenKind::Instr(_) => {
                    let inst = self.read_plain_instruction(t)?;
                    out.push(inst);
                }
                TokenKind::Keyword(Kw::Block | Kw::Loop | Kw::If | Kw::Try) => {
                    self.read_block_instruction(t, out)?;
                }
                TokenKind::Invalid(msg) => {
                    let message = msg.to_string();
                    let token = t.read();
                    self.error(token.span, message);
                }
                _ => return Some(()),
            }
        }
    }

    /// One plain instruction with its immediates, flat form.
    fn read_plain_instruction(&mut self, t: &mut Tokenizer<'_>) -> Option<Instruction> {
        let token = t.read();
        let op = match token.kind {
            TokenKind::Instr(op) => op,
            kind => {
                self.error(token.span, format!("Expected instruction, got {kind}"));
                return None;
            }
        };
        if !self.features.contains(op.features) {
            self.error(token.span, format!("{} instruction not allowed", op.name));
        }
        let imm = self.read_immediate(t, op, token.span)?;
        Some(Instruction::new(op, imm, token.span))
    }

    fn read_immediate(
        &mut self,
        t: &mut Tokenizer<'_>,
        op: &'static OpInfo,
        span: Span,
    ) -> Option<Immediate> {
        Some(match op.imm {
            ImmKind::None | ImmKind::Fence | ImmKind::BlockType => Immediate::None,
            ImmKind::Label
            | ImmKind::Func
            | ImmKind::Local
            | ImmKind::Global
            | ImmKind::Elem
            | ImmKind::Data
            | ImmKind::Event => Immediate::Var(self.read_var(t)?),
            ImmKind::BrTable => {
                let mut targets = Vec::new();
                while let Some(var) = self.read_var_opt(t) {
                    targets.push(var);
                }
                let default = match targets.pop() {
                    Some(var) => var,
                    None => {
                        self.error(span, "Expected br_table target, got none".to_string());
                        return None;
                    }
                };
                Immediate::BrTable { targets, default }
            }
            ImmKind::BrOnExn => {
                let label = self.read_var(t)?;
                let event = self.read_var(t)?;
                Immediate::BrOnExn { label, event }
            }
            ImmKind::CallIndirect => {
                let table = self.read_var_opt(t);
                if table.is_some() && !self.features.reference_types() {
                    self.error(span, "call_indirect table index not allowed".to_string());
                }
                let ty = self.read_function_type_use(t, false)?;
                Immediate::CallIndirect { table, ty }
            }
            ImmKind::TableUse => match self.read_var_opt(t) {
                Some(var) => Immediate::Var(var),
                None => Immediate::None,
            },
            ImmKind::TableCopy => {
                let dst = self.read_var_opt(t);
                let src = match dst {
                    Some(_) => Some(self.read_var(t)?),
                    None => None,
                };
                Immediate::TableCopy { dst, src }
            }
            ImmKind::TableInit => {
                let first = self.read_var(t)?;
                match self.read_var_opt(t) {
                    Some(segment) => Immediate::TableInit {
                        segment,
                        table: Some(first),
                    },
                    None => Immediate::TableInit {
                        segment: first,
                        table: None,
                    },
                }
            }
            ImmKind::Memarg(natural) => Immediate::MemArg(self.read_memarg(t, natural)?),
            ImmKind::MemargLane(natural, lanes) => {
                let memarg = self.read_memarg(t, natural)?;
                let lane = self.read_lane_index(t, lanes)?;
                Immediate::MemArgLane { memarg, lane }
            }
            ImmKind::I32 => Immediate::I32(self.read_i32(t)?.value),
            ImmKind::I64 => Immediate::I64(self.read_i64(t)?.value),
            ImmKind::F32 => Immediate::F32(self.read_f32(t)?.value),
            ImmKind::F64 => Immediate::F64(self.read_f64(t)?.value),
            ImmKind::V128 => Immediate::V128(self.read_v128(t, span)?),
            ImmKind::Lane(count) => Immediate::Lane(self.read_lane_index(t, count)?),
            ImmKind::Shuffle => {
                let mut lanes = [0u8; 16];
                for lane in lanes.iter_mut() {
                    *lane = self.read_lane_index(t, 32)?;
                }
                Immediate::Shuffle(lanes)
            }
            ImmKind::SelectT => {
                let results = self.read_result_list(t)?;
                if !results.is_empty() && !self.features.reference_types() {
                    self.error(span, "select result list not allowed".to_string());
                }
                Immediate::Select(results)
            }
            ImmKind::RefNullT => {
                let peeked = t.peek(0).clone();
                let rt = match peeked.kind {
                    TokenKind::Keyword(Kw::Func) => ReferenceType::FuncRef,
                    TokenKind::Keyword(Kw::Extern) => ReferenceType::ExternRef,
                    kind => {
                        self.error(peeked.span, format!("Expected reference kind, got {kind}"));
                        return None;
                    }
                };
                t.read();
                Immediate::RefNull(At::new(peeked.span, rt))
            }
        })
    }

    fn read_memarg(&mut self, t: &mut Tokenizer<'_>, natural: u32) -> Option<MemArg> {
        let mut offset = 0u32;
        let mut align_log2 = natural;
        // offset= and align= may appear in either order
        loop {
            let peeked = t.peek(0).clone();
            match &peeked.kind {
                TokenKind::OffsetEq(text) => {
                    let text = text.clone();
                    t.read();
                    match num::nat32(&text) {
                        Some(v) => offset = v,
                        None => {
                            self.error(peeked.span, format!("Constant out of range, got {text}"))
                        }
                    }
                }
                TokenKind::AlignEq(text) => {
                    let text = text.clone();
                    t.read();
                    match num::nat32(&text) {
                        Some(bytes) if bytes != 0 && bytes.is_power_of_two() => {
                            align_log2 = bytes.trailing_zeros();
                        }
                        _ => self.error(
                            peeked.span,
                            format!("Alignment must be a power of two, got {text}"),
                        ),
                    }
                }
                _ => break,
            }
        }
        Some(MemArg { align_log2, offset })
    }

    fn read_lane_index(&mut self, t: &mut Tokenizer<'_>, count: u8) -> Option<u8> {
        let at = self.read_nat32(t)?;
        if at.value >= count as u32 {
            self.error(at.span, format!("Lane index out of range, got {}", at.value));
            return None;
        }
        Some(at.value as u8)
    }

    /// `v128.const shape lane*` where shape is one of the six lane shapes.
    fn read_v128(&mut self, t: &mut Tokenizer<'_>, span: Span) -> Option<[u8; 16]> {
        let peeked = t.peek(0).clone();
        let shape = match &peeked.kind {
            TokenKind::Reserved(text) => text.clone(),
            kind => {
                self.error(peeked.span, format!("Expected v128 shape, got {kind}"));
                return None;
            }
        };
        t.read();

        let mut bytes = [0u8; 16];
        match shape.as_str() {
            "i8x16" => {
                for i in 0..16 {
                    let v = self.read_lane_int(t, -0x80, 0xFF)?;
                    bytes[i] = v as u8;
                }
            }
            "i16x8" => {
                for i in 0..8 {
                    let v = self.read_lane_int(t, -0x8000, 0xFFFF)?;
                    bytes[i * 2..i * 2 + 2].copy_from_slice(&(v as i16).to_le_bytes());
                }
            }
            "i32x4" => {
                for i in 0..4 {
                    let v = self.read_i32(t)?.value;
                    bytes[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
            "i64x2" => {
                for i in 0..2 {
                    let v = self.read_i64(t)?.value;
                    bytes[i * 8..i * 8 + 8].copy_from_slice(&v.to_le_bytes());
                }
            }
            "f32x4" => {
                for i in 0..4 {
                    let v = self.read_f32(t)?.value;
                    bytes[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
            "f64x2" => {
                for i in 0..2 {
                    let v = self.read_f64(t)?.value;
                    bytes[i * 8..i * 8 + 8].copy_from_slice(&v.to_le_bytes());
                }
            }
            other => {
                self.error(span, format!("Invalid simd value type {other}"));
                return None;
            }
        }
        Some(bytes)
    }

    fn read_lane_int(&mut self, t: &mut Tokenizer<'_>, min: i64, max: i64) -> Option<i64> {
        let at = self.read_int_with(t, num::i64_lit)?;
        if at.value < min || at.value > max {
            self.error(at.span, format!("Constant out of range, got {}", at.value));
            return None;
        }
        Some(at.value)
    }

    // -----------------------------------------------------------------------
    // Block instructions (flat form)
    // -----------------------------------------------------------------------

    /// Label and type of a block header: `$label? (type t)? (param …)*
    /// (result …)*`.
    fn read_block_immediate(&mut self, t: &mut Tokenizer<'_>) -> Option<BlockImmediate> {
        let label = self.read_label_opt(t);
        let ty = self.read_function_type_use(t, false)?;
        Some(BlockImmediate { label, ty })
    }

    /// An optional repeated label after `end`, `else`, or `catch`, which
    /// must match the block's opening label.
    fn check_end_label(&mut self, t: &mut Tokenizer<'_>, label: &Option<BindVar>) {
        if let TokenKind::Id(name) = &t.peek(0).kind {
            let name = name.clone();
            let token = t.read();
            match label {
                Some(l) if l.value == name => {}
                Some(l) => self.error(
                    token.span,
                    format!("Expected label ${}, got ${name}", l.value),
                ),
                None => self.error(token.span, format!("Unexpected label ${name}")),
            }
        }
    }

    /// Flat `block`/`loop`/`if`/`try` with explicit `end`.
    fn read_block_instruction(
        &mut self,
        t: &mut Tokenizer<'_>,
        out: &mut Vec<Instruction>,
    ) -> Option<()> {
        let token = t.read();
        let kw = match token.kind {
            TokenKind::Keyword(kw) => kw,
            _ => unreachable!("caller checked for a block keyword"),
        };
        if kw == Kw::Try && !self.features.exceptions() {
            self.error(token.span, "try instruction not allowed".to_string());
        }
        let bi = self.read_block_immediate(t)?;
        let label = bi.label.clone();

        let op = match kw {
            Kw::Block => &keywords::BLOCK,
            Kw::Loop => &keywords::LOOP,
            Kw::If => &keywords::IF,
            Kw::Try => &keywords::TRY,
            _ => unreachable!(),
        };
        out.push(Instruction::new(op, Immediate::Block(bi), token.span));

        self.read_instruction_list(t, out)?;

        match kw {
            Kw::If => {
                if let Some(else_token) = t.match_kw(Kw::Else) {
                    self.check_end_label(t, &label);
                    out.push(Instruction::bare(&keywords::ELSE, else_token.span));
                    self.read_instruction_list(t, out)?;
                }
            }
            Kw::Try => {
                let catch_token = self.expect_kw(t, Kw::Catch)?;
                self.check_end_label(t, &label);
                out.push(Instruction::bare(&keywords::CATCH, catch_token.span));
                self.read_instruction_list(t, out)?;
            }
            _ => {}
        }

        let end = self.expect_kw(t, Kw::End)?;
        self.check_end_label(t, &label);
        out.push(Instruction::bare(&keywords::END, end.span));
        Some(())
    }

    // -----------------------------------------------------------------------
    // Folded expressions
    // -----------------------------------------------------------------------

    /// A folded expression `( op … )`. Child expressions are emitted before
    /// the operator; block forms get a synthesised `end`.
    fn read_expression(&mut self, t: &mut Tokenizer<'_>, out: &mut Vec<Instruction>) -> Option<()> {
        self.expect_lpar(t)?;
        match &t.peek(0).kind {
            TokenKind::Keyword(Kw::Block | Kw::Loop) => {
                let token = t.read();
                let op = if token.kind == TokenKind::Keyword(Kw::Block) {
                    &keywords::BLOCK
                } else {
                    &keywords::LOOP
                };
                let bi = self.read_block_immediate(t)?;
                out.push(Instruction::new(op, Immediate::Block(bi), token.span));
                self.read_instruction_list(t, out)?;
                let rpar = self.expect_rpar(t)?;
                out.push(Instruction::bare(&keywords::END, rpar.span));
            }
            TokenKind::Keyword(Kw::If) => {
                let token = t.read();
                let bi = self.read_block_immediate(t)?;
                // Condition expressions come before the `if` opcode
                while t.peek(0).kind == TokenKind::Lpar && !t.peek_lpar(Kw::Then) {
                    self.read_expression(t, out)?;
                }
                out.push(Instruction::new(&keywords::IF, Immediate::Block(bi), token.span));
                if t.match_lpar(Kw::Then).is_none() {
                    let peeked = t.peek(0).clone();
                    self.error(peeked.span, format!("Expected Then, got {}", peeked.kind));
                    return None;
                }
                self.read_instruction_list(t, out)?;
                self.expect_rpar(t)?;
                if let Some(else_token) = t.match_lpar(Kw::Else) {
                    out.push(Instruction::bare(&keywords::ELSE, else_token.span));
                    self.read_instruction_list(t, out)?;
                    self.expect_rpar(t)?;
                }
                let rpar = self.expect_rpar(t)?;
                out.push(Instruction::bare(&keywords::END, rpar.span));
            }
            TokenKind::Keyword(Kw::Try) => {
                let token = t.read();
                if !self.features.exceptions() {
                    self.error(token.span, "try instruction not allowed".to_string());
                }
                let bi = self.read_block_immediate(t)?;
                out.push(Instruction::new(&keywords::TRY, Immediate::Block(bi), token.span));
                self.read_instruction_list(t, out)?;
                let catch_token = match t.match_lpar(Kw::Catch) {
                    Some(token) => token,
                    None => {
                        let peeked = t.peek(0).clone();
                        self.error(peeked.span, format!("Expected Catch, got {}", peeked.kind));
                        return None;
                    }
                };
                out.push(Instruction::bare(&keywords::CATCH, catch_token.span));
                self.read_instruction_list(t, out)?;
                self.expect_rpar(t)?;
                let rpar = self.expect_rpar(t)?;
                out.push(Instruction::bare(&keywords::END, rpar.span));
            }
            TokenKind::Instr(_) => {
                let inst = self.read_plain_instruction(t)?;
                while t.peek(0).kind == TokenKind::Lpar {
                    self.read_expression(t, out)?;
                }
                self.expect_rpar(t)?;
                out.push(inst);
            }
            kind => {
                let message = format!("Expected instruction, got {kind}");
                let span = t.peek(0).span;
                self.error(span, message);
                self.skip_balanced(t);
                return None;
            }
        }
        Some(())
    }

    // -----------------------------------------------------------------------
    // Module items
    // -----------------------------------------------------------------------

    fn read_type_entry(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<TypeEntry> {
        let name = self.read_bind_var_opt(t, Ns::Type);
        self.expect_lpar(t)?;
        self.expect_kw(t, Kw::Func)?;
        let params = self.read_bound_param_list(t, false)?;
        let results = self.read_result_list(t)?;
        self.expect_rpar(t)?;
        self.expect_rpar(t)?;
        Some(TypeEntry {
            span: Self::span_from(t, start),
            name,
            ty: BoundFunctionType { params, results },
        })
    }

    fn read_import(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<Import> {
        if self.seen_non_import {
            self.error(
                start,
                "Imports must occur before all non-import definitions".to_string(),
            );
        }
        let module = self.read_utf8(t)?;
        let field = self.read_utf8(t)?;

        self.expect_lpar(t)?;
        let kw_token = t.read();
        let desc = match kw_token.kind {
            TokenKind::Keyword(Kw::Func) => {
                let name = self.read_bind_var_opt(t, Ns::Func);
                let type_use = self.read_function_type_use(t, false)?;
                ImportDesc::Func { name, type_use }
            }
            TokenKind::Keyword(Kw::Table) => {
                let name = self.read_bind_var_opt(t, Ns::Table);
                let limits = self.read_limits(t)?;
                let elem_type = self.read_reference_type(t)?;
                ImportDesc::Table {
                    name,
                    ty: TableType { limits, elem_type },
                }
            }
            TokenKind::Keyword(Kw::Memory) => {
                let name = self.read_bind_var_opt(t, Ns::Memory);
                let limits = self.read_limits(t)?;
                ImportDesc::Memory {
                    name,
                    ty: MemoryType { limits },
                }
            }
            TokenKind::Keyword(Kw::Global) => {
                let name = self.read_bind_var_opt(t, Ns::Global);
                let ty = self.read_global_type(t)?;
                ImportDesc::Global { name, ty }
            }
            TokenKind::Keyword(Kw::Event) => {
                if !self.features.exceptions() {
                    self.error(kw_token.span, "Events not allowed".to_string());
                }
                let name = self.read_bind_var_opt(t, Ns::Event);
                let type_use = self.read_function_type_use(t, false)?;
                ImportDesc::Event { name, type_use }
            }
            kind => {
                self.error(kw_token.span, format!("Expected import kind, got {kind}"));
                return None;
            }
        };
        self.expect_rpar(t)?;
        self.expect_rpar(t)?;
        Some(Import {
            span: Self::span_from(t, start),
            module,
            field,
            desc,
        })
    }

    fn read_func(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<Func> {
        self.errors.push_context(start, "function");
        let result = self.read_func_inner(t, start);
        self.errors.pop_context();
        result
    }

    fn read_func_inner(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<Func> {
        let name = self.read_bind_var_opt(t, Ns::Func);
        let exports = self.read_inline_export_list(t)?;

        if let Some(import) = self.read_inline_import_opt(t) {
            let type_use = self.read_function_type_use(t, false)?;
            self.expect_rpar(t)?;
            return Some(Func {
                span: Self::span_from(t, start),
                name,
                exports,
                import: Some(import),
                type_use,
                locals: Vec::new(),
                body: Vec::new(),
            });
        }

        self.seen_non_import = true;
        self.names.locals = Names::default();
        let type_use = self.read_function_type_use(t, true)?;
        let locals = self.read_local_list(t)?;
        let mut body = Vec::new();
        self.read_instruction_list(t, &mut body)?;
        self.expect_rpar(t)?;
        Some(Func {
            span: Self::span_from(t, start),
            name,
            exports,
            import: None,
            type_use,
            locals,
            body,
        })
    }

    fn read_table(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<Table> {
        let name = self.read_bind_var_opt(t, Ns::Table);
        let exports = self.read_inline_export_list(t)?;

        if let Some(import) = self.read_inline_import_opt(t) {
            let limits = self.read_limits(t)?;
            let elem_type = self.read_reference_type(t)?;
            self.expect_rpar(t)?;
            return Some(Table {
                span: Self::span_from(t, start),
                name,
                exports,
                import: Some(import),
                kind: TableKind::Normal(TableType { limits, elem_type }),
            });
        }

        self.seen_non_import = true;

        // Inline contents: (table reftype (elem …))
        if matches!(t.peek(0).kind, TokenKind::ValType(ValueType::FuncRef | ValueType::ExternRef)) {
            let elem_type = self.read_reference_type(t)?;
            self.expect_lpar(t)?;
            self.expect_kw(t, Kw::Elem)?;
            let payload = self.read_element_payload(t, true)?;
            self.expect_rpar(t)?;
            self.expect_rpar(t)?;
            // The synthesised active segment occupies an element index
            self.names.elems.skip();
            return Some(Table {
                span: Self::span_from(t, start),
                name,
                exports,
                import: None,
                kind: TableKind::Inline { elem_type, payload },
            });
        }

        let limits = self.read_limits(t)?;
        let elem_type = self.read_reference_type(t)?;
        self.expect_rpar(t)?;
        Some(Table {
            span: Self::span_from(t, start),
            name,
            exports,
            import: None,
            kind: TableKind::Normal(TableType { limits, elem_type }),
        })
    }

    fn read_memory(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<Memory> {
        let name = self.read_bind_var_opt(t, Ns::Memory);
        let exports = self.read_inline_export_list(t)?;

        if let Some(import) = self.read_inline_import_opt(t) {
            let limits = self.read_limits(t)?;
            self.expect_rpar(t)?;
            return Some(Memory {
                span: Self::span_from(t, start),
                name,
                exports,
                import: Some(import),
                kind: MemoryKind::Normal(MemoryType { limits }),
            });
        }

        self.seen_non_import = true;

        // Inline contents: (memory (data "…"*))
        if t.match_lpar(Kw::Data).is_some() {
            let mut data = Vec::new();
            while matches!(t.peek(0).kind, TokenKind::Text(_)) {
                data.push(self.read_text(t)?);
            }
            self.expect_rpar(t)?;
            self.expect_rpar(t)?;
            // The synthesised active segment occupies a data index
            self.names.datas.skip();
            return Some(Memory {
                span: Self::span_from(t, start),
                name,
                exports,
                import: None,
                kind: MemoryKind::Inline { data },
            });
        }

        let limits = self.read_limits(t)?;
        self.expect_rpar(t)?;
        Some(Memory {
            span: Self::span_from(t, start),
            name,
            exports,
            import: None,
            kind: MemoryKind::Normal(MemoryType { limits }),
        })
    }

    fn read_global(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<Global> {
        let name = self.read_bind_var_opt(t, Ns::Global);
        let exports = self.read_inline_export_list(t)?;

        if let Some(import) = self.read_inline_import_opt(t) {
            let ty = self.read_global_type(t)?;
            self.expect_rpar(t)?;
            return Some(Global {
                span: Self::span_from(t, start),
                name,
                exports,
                import: Some(import),
                ty,
                init: Vec::new(),
            });
        }

        self.seen_non_import = true;
        let ty = self.read_global_type(t)?;
        let mut init = Vec::new();
        self.read_instruction_list(t, &mut init)?;
        self.expect_rpar(t)?;
        Some(Global {
            span: Self::span_from(t, start),
            name,
            exports,
            import: None,
            ty,
            init,
        })
    }

    fn read_event(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<Event> {
        if !self.features.exceptions() {
            self.error(start, "Events not allowed".to_string());
        }
        let name = self.read_bind_var_opt(t, Ns::Event);
        let exports = self.read_inline_export_list(t)?;

        if let Some(import) = self.read_inline_import_opt(t) {
            let type_use = self.read_function_type_use(t, false)?;
            self.expect_rpar(t)?;
            return Some(Event {
                span: Self::span_from(t, start),
                name,
                exports,
                import: Some(import),
                type_use,
            });
        }

        self.seen_non_import = true;
        let type_use = self.read_function_type_use(t, false)?;
        self.expect_rpar(t)?;
        Some(Event {
            span: Self::span_from(t, start),
            name,
            exports,
            import: None,
            type_use,
        })
    }

    fn read_export(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<Export> {
        let name = self.read_utf8(t)?;
        self.expect_lpar(t)?;
        let kw_token = t.read();
        let kind = match kw_token.kind {
            TokenKind::Keyword(Kw::Func) => ExternalKind::Func,
            TokenKind::Keyword(Kw::Table) => ExternalKind::Table,
            TokenKind::Keyword(Kw::Memory) => ExternalKind::Memory,
            TokenKind::Keyword(Kw::Global) => ExternalKind::Global,
            TokenKind::Keyword(Kw::Event) => {
                if !self.features.exceptions() {
                    self.error(kw_token.span, "Events not allowed".to_string());
                }
                ExternalKind::Event
            }
            kind => {
                self.error(kw_token.span, format!("Expected export kind, got {kind}"));
                return None;
            }
        };
        let var = self.read_var(t)?;
        self.expect_rpar(t)?;
        self.expect_rpar(t)?;
        Some(Export {
            span: Self::span_from(t, start),
            name,
            kind: At::new(kw_token.span, kind),
            var,
        })
    }

    fn read_start(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<Start> {
        if self.seen_start {
            self.error(start, "Multiple start functions".to_string());
        }
        self.seen_start = true;
        let var = self.read_var(t)?;
        self.expect_rpar(t)?;
        Some(Start {
            span: Self::span_from(t, start),
            var,
        })
    }

    /// The list part of an element segment: `func var*`, a bare var list,
    /// or `reftype (item expr)* / expr*`. `inline_table` relaxes the
    /// leading-reftype rule, which `(table reftype (elem …))` has already
    /// consumed.
    fn read_element_payload(
        &mut self,
        t: &mut Tokenizer<'_>,
        inline_table: bool,
    ) -> Option<ElementPayload> {
        // Expression payload: a reference type followed by element
        // expressions. The inline-table form has already consumed its
        // reference type.
        if inline_table && t.peek(0).kind == TokenKind::Lpar
            || matches!(
                t.peek(0).kind,
                TokenKind::ValType(ValueType::FuncRef | ValueType::ExternRef)
            )
        {
            let elem_type = if inline_table {
                At::nowhere(ReferenceType::FuncRef)
            } else {
                let token = t.peek(0).clone();
                if !self.features.bulk_memory() {
                    self.error(token.span, "Element expressions not allowed".to_string());
                }
                self.read_reference_type(t)?
            };
            let mut exprs = Vec::new();
            while t.peek(0).kind == TokenKind::Lpar {
                let mut expr = Vec::new();
                if t.match_lpar(Kw::Item).is_some() {
                    self.read_instruction_list(t, &mut expr)?;
                    self.expect_rpar(t)?;
                } else {
                    self.read_expression(t, &mut expr)?;
                }
                exprs.push(expr);
            }
            return Some(ElementPayload::Exprs { elem_type, exprs });
        }

        // `func` keyword or a bare var list
        let kind_span = t.peek(0).span;
        if let Some(token) = t.match_kw(Kw::Func)
            && !self.features.bulk_memory()
        {
            self.error(token.span, "Expected Rpar, got Func".to_string());
        }
        let mut vars = Vec::new();
        while let Some(var) = self.read_var_opt(t) {
            vars.push(var);
        }
        Some(ElementPayload::Vars {
            kind: At::new(kind_span, ExternalKind::Func),
            vars,
        })
    }

    fn read_element_segment(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<ElementSegment> {
        let name = self.read_bind_var_opt(t, Ns::Elem);

        // Declarative form
        if let Some(token) = t.match_kw(Kw::Declare) {
            if !self.features.bulk_memory() {
                self.error(token.span, "Declared element segments not allowed".to_string());
            }
            let payload = self.read_element_payload(t, false)?;
            self.expect_rpar(t)?;
            return Some(ElementSegment {
                span: Self::span_from(t, start),
                name,
                mode: SegmentMode::Declared,
                payload,
            });
        }

        // Optional explicit table use
        let target = if t.peek_lpar(Kw::Table) {
            let token = t.match_lpar(Kw::Table).unwrap();
            if !self.features.bulk_memory() {
                self.error(token.span, "Element segment table use not allowed".to_string());
            }
            let var = self.read_var(t)?;
            self.expect_rpar(t)?;
            Some(var)
        } else {
            None
        };

        // Active form: an offset expression follows
        if t.peek(0).kind == TokenKind::Lpar {
            let mut offset = Vec::new();
            if t.match_lpar(Kw::Offset).is_some() {
                self.read_instruction_list(t, &mut offset)?;
                self.expect_rpar(t)?;
            } else {
                self.read_expression(t, &mut offset)?;
            }
            let payload = self.read_element_payload(t, false)?;
            self.expect_rpar(t)?;
            return Some(ElementSegment {
                span: Self::span_from(t, start),
                name,
                mode: SegmentMode::Active { target, offset },
                payload,
            });
        }

        if !self.features.bulk_memory() {
            let peeked = t.peek(0).clone();
            self.error(
                peeked.span,
                format!("Expected offset expression, got {}", peeked.kind),
            );
            return None;
        }

        // Passive form
        let payload = self.read_element_payload(t, false)?;
        self.expect_rpar(t)?;
        Some(ElementSegment {
            span: Self::span_from(t, start),
            name,
            mode: SegmentMode::Passive,
            payload,
        })
    }

    fn read_data_segment(&mut self, t: &mut Tokenizer<'_>, start: Span) -> Option<DataSegment> {
        let name = self.read_bind_var_opt(t, Ns::Data);

        // Optional explicit memory use
        let target = if t.peek_lpar(Kw::Memory) {
            let token = t.match_lpar(Kw::Memory).unwrap();
            if !self.features.bulk_memory() {
                self.error(token.span, "Data segment memory use not allowed".to_string());
            }
            let var = self.read_var(t)?;
            self.expect_rpar(t)?;
            Some(var)
        } else {
            None
        };

        let mode = if t.peek(0).kind == TokenKind::Lpar {
            let mut offset = Vec::new();
            if t.match_lpar(Kw::Offset).is_some() {
                self.read_instruction_list(t, &mut offset)?;
                self.expect_rpar(t)?;
            } else {
                self.read_expression(t, &mut offset)?;
            }
            SegmentMode::Active { target, offset }
        } else {
            if !self.features.bulk_memory() {
                let peeked = t.peek(0).clone();
                self.error(
                    peeked.span,
                    format!("Expected offset expression, got {}", peeked.kind),
                );
                return None;
            }
            SegmentMode::Passive
        };

        let mut data = Vec::new();
        while matches!(t.peek(0).kind, TokenKind::Text(_)) {
            data.push(self.read_text(t)?);
        }
        self.expect_rpar(t)?;
        Some(DataSegment {
            span: Self::span_from(t, start),
            name,
            mode,
            data,
        })
    }

    /// One `(keyword …)` module field, appended to `items`. Returns `None`
    /// after recovering from a failed field.
    fn read_module_item(&mut self, t: &mut Tokenizer<'_>, items: &mut Vec<ModuleItem>) -> Option<()> {
        let lpar = self.expect_lpar(t)?;
        let start = lpar.span;
        let kw_token = t.read();
        let kw = match kw_token.kind {
            TokenKind::Keyword(kw) => kw,
            kind => {
                self.error(kw_token.span, format!("Expected module item, got {kind}"));
                self.skip_balanced(t);
                return None;
            }
        };

        let item = match kw {
            Kw::Type => self.read_type_entry(t, start).map(ModuleItem::Type),
            Kw::Import => self.read_import(t, start).map(ModuleItem::Import),
            Kw::Func => self.read_func(t, start).map(ModuleItem::Func),
            Kw::Table => self.read_table(t, start).map(ModuleItem::Table),
            Kw::Memory => self.read_memory(t, start).map(ModuleItem::Memory),
            Kw::Global => self.read_global(t, start).map(ModuleItem::Global),
            Kw::Event => self.read_event(t, start).map(ModuleItem::Event),
            Kw::Export => self.read_export(t, start).map(ModuleItem::Export),
            Kw::Start => self.read_start(t, start).map(ModuleItem::Start),
            Kw::Elem => self.read_element_segment(t, start).map(ModuleItem::Elem),
            Kw::Data => self.read_data_segment(t, start).map(ModuleItem::Data),
            other => {
                self.error(
                    kw_token.span,
                    format!("Expected module item, got {}", other.ident()),
                );
                self.skip_balanced(t);
                return None;
            }
        };

        match item {
            Some(item) => {
                items.push(item);
                Some(())
            }
            None => {
                self.skip_balanced(t);
                None
            }
        }
    }

    /// `(module $id? field*)`, or a bare field sequence covering the whole
    /// input.
    pub fn read_single_module(&mut self, t: &mut Tokenizer<'_>) -> Option<Module> {
        self.reset_module();
        let mut items = Vec::new();

        if t.peek_lpar(Kw::Module) {
            let lpar_span = t.peek(0).span;
            t.match_lpar(Kw::Module);
            self.errors.push_context(lpar_span, "module");
            let name = self.read_label_opt(t);
            while t.peek(0).kind != TokenKind::Rpar && t.peek(0).kind != TokenKind::Eof {
                let _ = self.read_module_item(t, &mut items);
            }
            self.expect_rpar(t);
            self.errors.pop_context();
            return Some(Module {
                span: Self::span_from(t, lpar_span),
                name,
                items,
            });
        }

        let start = t.peek(0).span;
        while t.peek(0).kind != TokenKind::Eof {
            let _ = self.read_module_item(t, &mut items);
        }
        Some(Module {
            span: Self::span_from(t, start),
            name: None,
            items,
        })
    }

    // -----------------------------------------------------------------------
    // Script commands
    // -----------------------------------------------------------------------

    pub fn read_script(&mut self, t: &mut Tokenizer<'_>) -> Option<Script> {
        let mut commands = Vec::new();
        while t.peek(0).kind != TokenKind::Eof {
            match self.read_command(t) {
                Some(command) => commands.push(command),
                None => self.skip_balanced(t),
            }
        }
        Some(Script { commands })
    }

    fn read_command(&mut self, t: &mut Tokenizer<'_>) -> Option<At<Command>> {
        let start = t.peek(0).span;
        if t.peek(0).kind != TokenKind::Lpar {
            let peeked = t.peek(0).clone();
            self.error(peeked.span, format!("Expected command, got {}", peeked.kind));
            t.read();
            return None;
        }

        let command = match &t.peek(1).kind {
            TokenKind::Keyword(Kw::Module) => Command::Module(self.read_script_module(t)?),
            TokenKind::Keyword(Kw::Register) => {
                t.match_lpar(Kw::Register);
                let name = self.read_utf8(t)?;
                let module = self.read_var_opt(t);
                self.expect_rpar(t)?;
                Command::Register { name, module }
            }
            TokenKind::Keyword(Kw::Invoke | Kw::Get) => Command::Action(self.read_action(t)?),
            TokenKind::Keyword(Kw::AssertMalformed) => {
                t.match_lpar(Kw::AssertMalformed);
                let module = self.read_script_module(t)?;
                let message = self.read_utf8(t)?;
                self.expect_rpar(t)?;
                Command::Assertion(Assertion::Malformed { module, message })
            }
            TokenKind::Keyword(Kw::AssertInvalid) => {
                t.match_lpar(Kw::AssertInvalid);
                let module = self.read_script_module(t)?;
                let message = self.read_utf8(t)?;
                self.expect_rpar(t)?;
                Command::Assertion(Assertion::Invalid { module, message })
            }
            TokenKind::Keyword(Kw::AssertUnlinkable) => {
                t.match_lpar(Kw::AssertUnlinkable);
                let module = self.read_script_module(t)?;
                let message = self.read_utf8(t)?;
                self.expect_rpar(t)?;
                Command::Assertion(Assertion::Unlinkable { module, message })
            }
            TokenKind::Keyword(Kw::AssertTrap) => {
                t.match_lpar(Kw::AssertTrap);
                let assertion = if t.peek_lpar(Kw::Module) {
                    let module = self.read_script_module(t)?;
                    let message = self.read_utf8(t)?;
                    Assertion::ModuleTrap { module, message }
                } else {
                    let action = self.read_action(t)?;
                    let message = self.read_utf8(t)?;
                    Assertion::ActionTrap { action, message }
                };
                self.expect_rpar(t)?;
                Command::Assertion(assertion)
            }
            TokenKind::Keyword(Kw::AssertReturn) => {
                t.match_lpar(Kw::AssertReturn);
                let action = self.read_action(t)?;
                let mut results = Vec::new();
                while t.peek(0).kind == TokenKind::Lpar {
                    results.push(self.read_return_result(t)?);
                }
                self.expect_rpar(t)?;
                Command::Assertion(Assertion::Return { action, results })
            }
            TokenKind::Keyword(Kw::AssertExhaustion) => {
                t.match_lpar(Kw::AssertExhaustion);
                let action = self.read_action(t)?;
                let message = self.read_utf8(t)?;
                self.expect_rpar(t)?;
                Command::Assertion(Assertion::Exhaustion { action, message })
            }
            // A bare module field begins an implicit module that spans all
            // following top-level fields.
            TokenKind::Keyword(
                Kw::Type
                | Kw::Import
                | Kw::Func
                | Kw::Table
                | Kw::Memory
                | Kw::Global
                | Kw::Event
                | Kw::Export
                | Kw::Start
                | Kw::Elem
                | Kw::Data,
            ) => {
                self.reset_module();
                let mut items = Vec::new();
                loop {
                    let _ = self.read_module_item(t, &mut items);
                    let next_is_field = t.peek(0).kind == TokenKind::Lpar
                        && matches!(
                            t.peek(1).kind,
                            TokenKind::Keyword(
                                Kw::Type
                                    | Kw::Import
                                    | Kw::Func
                                    | Kw::Table
                                    | Kw::Memory
                                    | Kw::Global
                                    | Kw::Event
                                    | Kw::Export
                                    | Kw::Start
                                    | Kw::Elem
                                    | Kw::Data
                            )
                        );
                    if !next_is_field {
                        break;
                    }
                }
                let span = Self::span_from(t, start);
                Command::Module(ScriptModule {
                    span,
                    name: None,
                    kind: ScriptModuleKind::Text(Module {
                        span,
                        name: None,
                        items,
                    }),
                })
            }
            kind => {
                let message = format!("Expected command, got {kind}");
                let span = t.peek(1).span;
                self.error(span, message);
                return None;
            }
        };
        Some(At::new(Self::span_from(t, start), command))
    }

    fn read_script_module(&mut self, t: &mut Tokenizer<'_>) -> Option<ScriptModule> {
        let start = t.peek(0).span;
        if t.match_lpar(Kw::Module).is_none() {
            let peeked = t.peek(0).clone();
            self.error(peeked.span, format!("Expected Module, got {}", peeked.kind));
            return None;
        }
        let name = self.read_label_opt(t);

        let kind = if t.match_kw(Kw::Binary).is_some() {
            let mut chunks = Vec::new();
            while matches!(t.peek(0).kind, TokenKind::Text(_)) {
                chunks.push(self.read_text(t)?);
            }
            self.expect_rpar(t)?;
            ScriptModuleKind::Binary(chunks)
        } else if t.match_kw(Kw::Quote).is_some() {
            let mut chunks = Vec::new();
            while matches!(t.peek(0).kind, TokenKind::Text(_)) {
                chunks.push(self.read_text(t)?);
            }
            self.expect_rpar(t)?;
            ScriptModuleKind::Quote(chunks)
        } else {
            self.reset_module();
            let mut items = Vec::new();
            while t.peek(0).kind != TokenKind::Rpar && t.peek(0).kind != TokenKind::Eof {
                let _ = self.read_module_item(t, &mut items);
            }
            self.expect_rpar(t)?;
            ScriptModuleKind::Text(Module {
                span: Self::span_from(t, start),
                name: name.clone(),
                items,
            })
        };

        Some(ScriptModule {
            span: Self::span_from(t, start),
            name,
            kind,
        })
    }

    fn read_action(&mut self, t: &mut Tokenizer<'_>) -> Option<Action> {
        if let Some(_token) = t.match_lpar(Kw::Invoke) {
            let module = self.read_var_opt(t);
            let name = self.read_utf8(t)?;
            let mut args = Vec::new();
            while t.peek(0).kind == TokenKind::Lpar {
                args.push(self.read_const(t)?);
            }
            self.expect_rpar(t)?;
            Some(Action::Invoke { module, name, args })
        } else if t.match_lpar(Kw::Get).is_some() {
            let module = self.read_var_opt(t);
            let name = self.read_utf8(t)?;
            self.expect_rpar(t)?;
            Some(Action::Get { module, name })
        } else {
            let peeked = t.peek(0).clone();
            self.error(peeked.span, format!("Expected action, got {}", peeked.kind));
            None
        }
    }

    /// A typed constant: `(i32.const n)`, `(v128.const shape …)`,
    /// `(ref.null kind)`, `(ref.host n)`.
    fn read_const(&mut self, t: &mut Tokenizer<'_>) -> Option<At<Const>> {
        let start = t.peek(0).span;
        self.expect_lpar(t)?;
        let head = t.read();
        let value = match &head.kind {
            TokenKind::Instr(op) => match op.name {
                "i32.const" => Const::I32(self.read_i32(t)?.value),
                "i64.const" => Const::I64(self.read_i64(t)?.value),
                "f32.const" => Const::F32(self.read_f32(t)?.value),
                "f64.const" => Const::F64(self.read_f64(t)?.value),
                "v128.const" => {
                    if !self.features.simd() {
                        self.error(head.span, "Simd values not allowed".to_string());
                    }
                    Const::V128(self.read_v128(t, head.span)?)
                }
                "ref.null" => {
                    if !self.features.reference_types() {
                        self.error(head.span, "ref.null not allowed".to_string());
                    }
                    let rt = match t.peek(0).kind {
                        TokenKind::Keyword(Kw::Extern) => {
                            t.read();
                            ReferenceType::ExternRef
                        }
                        TokenKind::Keyword(Kw::Func) => {
                            t.read();
                            ReferenceType::FuncRef
                        }
                        _ => ReferenceType::FuncRef,
                    };
                    Const::RefNull(rt)
                }
                other => {
                    self.error(head.span, format!("Expected constant, got {other}"));
                    return None;
                }
            },
            TokenKind::Keyword(Kw::RefHost) => {
                if !self.features.reference_types() {
                    self.error(head.span, "ref.host not allowed".to_string());
                }
                Const::RefHost(self.read_nat32(t)?.value)
            }
            kind => {
                self.error(head.span, format!("Expected constant, got {kind}"));
                return None;
            }
        };
        self.expect_rpar(t)?;
        Some(At::new(Self::span_from(t, start), value))
    }

    /// An expected result, which also admits NaN patterns, per-lane SIMD
    /// patterns, and reference classes.
    fn read_return_result(&mut self, t: &mut Tokenizer<'_>) -> Option<At<ReturnResult>> {
        let start = t.peek(0).span;
        self.expect_lpar(t)?;
        let head = t.read();
        let value = match &head.kind {
            TokenKind::Instr(op) => match op.name {
                "i32.const" => ReturnResult::I32(self.read_i32(t)?.value),
                "i64.const" => ReturnResult::I64(self.read_i64(t)?.value),
                "f32.const" => ReturnResult::F32(self.read_f32_result(t)?),
                "f64.const" => ReturnResult::F64(self.read_f64_result(t)?),
                "v128.const" => {
                    if !self.features.simd() {
                        self.error(head.span, "Simd values not allowed".to_string());
                    }
                    self.read_v128_result(t, head.span)?
                }
                "ref.null" => {
                    if !self.features.reference_types() {
                        self.error(head.span, "ref.null not allowed".to_string());
                    }
                    if matches!(t.peek(0).kind, TokenKind::Keyword(Kw::Func | Kw::Extern)) {
                        t.read();
                    }
                    ReturnResult::RefNull
                }
                "ref.func" => ReturnResult::RefFunc,
                other => {
                    self.error(head.span, format!("Expected result, got {other}"));
                    return None;
                }
            },
            TokenKind::Keyword(Kw::RefAny) => {
                if !self.features.reference_types() {
                    self.error(head.span, "ref.any not allowed".to_string());
                }
                ReturnResult::RefAny
            }
            TokenKind::Keyword(Kw::RefHost) => {
                if !self.features.reference_types() {
                    self.error(head.span, "ref.host not allowed".to_string());
                }
                ReturnResult::RefHost(self.read_nat32(t)?.value)
            }
            kind => {
                self.error(head.span, format!("Expected result, got {kind}"));
                return None;
            }
        };
        self.expect_rpar(t)?;
        Some(At::new(Self::span_from(t, start), value))
    }

    fn read_f32_result(&mut self, t: &mut Tokenizer<'_>) -> Option<FloatResult<u32>> {
        match nan_pattern(t) {
            Some(pattern) => Some(pattern),
            None => Some(FloatResult::Bits(self.read_f32(t)?.value)),
        }
    }

    fn read_f64_result(&mut self, t: &mut Tokenizer<'_>) -> Option<FloatResult<u64>> {
        match nan_pattern(t) {
            Some(pattern) => Some(pattern),
            None => Some(FloatResult::Bits(self.read_f64(t)?.value)),
        }
    }

    fn read_v128_result(&mut self, t: &mut Tokenizer<'_>, span: Span) -> Option<ReturnResult> {
        let peeked = t.peek(0).clone();
        let shape = match &peeked.kind {
            TokenKind::Reserved(text) => text.clone(),
            kind => {
                self.error(peeked.span, format!("Expected v128 shape, got {kind}"));
                return None;
            }
        };
        match shape.as_str() {
            "f32x4" => {
                t.read();
                let mut lanes = [FloatResult::Bits(0u32); 4];
                for lane in lanes.iter_mut() {
                    *lane = self.read_f32_result(t)?;
                }
                Some(ReturnResult::F32x4(lanes))
            }
            "f64x2" => {
                t.read();
                let mut lanes = [FloatResult::Bits(0u64); 2];
                for lane in lanes.iter_mut() {
                    *lane = self.read_f64_result(t)?;
                }
                Some(ReturnResult::F64x2(lanes))
            }
            _ => Some(ReturnResult::V128(Box::new(self.read_v128(t, span)?))),
        }
    }
}

/// Recognise a `nan:canonical`/`nan:arithmetic` pattern token.
fn nan_pattern<T>(t: &mut Tokenizer<'_>) -> Option<FloatResult<T>> {
    let pattern = match &t.peek(0).kind {
        TokenKind::Float(text) if text == "nan:canonical" => FloatResult::NanCanonical,
        TokenKind::Float(text) if text == "nan:arithmetic" => FloatResult::NanArithmetic,
        _ => return None,
    };
    t.read();
    Some(pattern)
}
