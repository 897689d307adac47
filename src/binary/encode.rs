//! Encoder from the desugared text AST to the binary module format.
//!
//! Expects its input to have been through the resolver and desugarer:
//! every variable is an index, every function-kind type use carries a
//! concrete type index, and inline conveniences have been hoisted. The
//! round-trip contract is that decoding the produced bytes yields an equal
//! module up to the erasure of identifiers.
//!
//! Sections are emitted in wire order and only when non-empty. Opcode
//! bytes come straight from the keyword table, so the encoder carries no
//! opcode knowledge of its own beyond the handful of reserved zero-byte
//! immediates the binary format requires.

use crate::text::annotations::{CustomAnnotation, SectionOrder, SectionPlace};
use crate::text::ast::*;
use crate::text::keywords::OpCode;
use crate::text::token::At;
use byteorder::{LittleEndian, WriteBytesExt};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodeError {
    /// A symbolic reference survived into encoding; the resolver did not
    /// run or did not succeed.
    #[error("unresolved name ${0}")]
    UnresolvedName(String),
    /// A function-kind type use without a concrete index; the desugarer
    /// did not run or did not succeed.
    #[error("function type use has no resolved index")]
    MissingTypeIndex,
    /// An inline import or inline segment that desugaring should have
    /// removed.
    #[error("module is not in desugared form: {0}")]
    NotDesugared(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, EncodeError>;

// Section ids, in wire order.
const SECTION_CUSTOM: u8 = 0;
const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_TABLE: u8 = 4;
const SECTION_MEMORY: u8 = 5;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;
const SECTION_START: u8 = 8;
const SECTION_ELEMENT: u8 = 9;
const SECTION_CODE: u8 = 10;
const SECTION_DATA: u8 = 11;
const SECTION_DATA_COUNT: u8 = 12;
const SECTION_EVENT: u8 = 13;

const TYPE_FUNC: u8 = 0x60;
const OP_END: u8 = 0x0B;
const BLOCK_TYPE_VOID: u8 = 0x40;

/// Encode a desugared module to `.wasm` bytes.
pub fn encode(module: &Module) -> Result<Vec<u8>> {
    encode_with_customs(module, &[])
}

/// Encode a desugared module, splicing extracted `(@custom …)` sections at
/// their requested positions.
pub fn encode_with_customs(module: &Module, customs: &[CustomAnnotation]) -> Result<Vec<u8>> {
    let sections = Sections::gather(module)?;

    let mut out = Vec::new();
    out.extend_from_slice(b"\0asm");
    out.write_u32::<LittleEndian>(1)?;

    // Pseudo-slots First/Last anchor customs at the very beginning and end.
    let order: &[(SectionPlace, Option<(u8, Vec<u8>)>)] = &[
        (SectionPlace::First, None),
        (SectionPlace::Type, sections.type_section()?),
        (SectionPlace::Import, sections.import_section()?),
        (SectionPlace::Func, sections.function_section()?),
        (SectionPlace::Table, sections.table_section()?),
        (SectionPlace::Memory, sections.memory_section()?),
        (SectionPlace::Global, sections.global_section()?),
        (SectionPlace::Export, sections.export_section()?),
        (SectionPlace::Start, sections.start_section()?),
        (SectionPlace::Elem, sections.element_section()?),
        (SectionPlace::DataCount, sections.data_count_section()),
        (SectionPlace::Code, sections.code_section()?),
        (SectionPlace::Data, sections.data_section()?),
        (SectionPlace::Last, None),
    ];

    // The event section has no custom anchor; it rides along after memory.
    let event_section = sections.event_section()?;

    for (place, body) in order {
        for custom in customs {
            if custom.place == *place && custom.order == SectionOrder::Before {
                write_custom_section(&mut out, custom);
            }
        }
        if let Some((id, body)) = body {
            write_section(&mut out, *id, body);
        }
        if *place == SectionPlace::Memory
            && let Some((id, body)) = &event_section
        {
            write_section(&mut out, *id, body);
        }
        for custom in customs {
            if custom.place == *place && custom.order == SectionOrder::After {
                write_custom_section(&mut out, custom);
            }
        }
    }

    Ok(out)
}

fn write_section(out: &mut Vec<u8>, id: u8, body: &[u8]) {
    out.push(id);
    write_u32_leb(out, body.len() as u32);
    out.extend_from_slice(body);
}

fn write_custom_section(out: &mut Vec<u8>, custom: &CustomAnnotation) {
    let mut body = Vec::with_capacity(custom.name.len() + custom.data.len() + 5);
    write_u32_leb(&mut body, custom.name.len() as u32);
    body.extend_from_slice(&custom.name);
    body.extend_from_slice(&custom.data);
    write_section(out, SECTION_CUSTOM, &body);
}

// ---------------------------------------------------------------------------
// LEB128
// ---------------------------------------------------------------------------

fn write_u32_leb(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_s64_leb(buf: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        let sign_clear = byte & 0x40 == 0;
        if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_s32_leb(buf: &mut Vec<u8>, value: i32) {
    write_s64_leb(buf, value as i64);
}

// ---------------------------------------------------------------------------
// Gathered module view
// ---------------------------------------------------------------------------

/// The module reorganised by section, in item order.
#[derive(Default)]
struct Sections<'m> {
    types: Vec<&'m BoundFunctionType>,
    imports: Vec<&'m Import>,
    funcs: Vec<&'m Func>,
    tables: Vec<&'m TableType>,
    memories: Vec<&'m MemoryType>,
    globals: Vec<&'m Global>,
    events: Vec<&'m Event>,
    exports: Vec<&'m Export>,
    start: Option<&'m Start>,
    elems: Vec<&'m ElementSegment>,
    datas: Vec<&'m DataSegment>,
}

impl<'m> Sections<'m> {
    fn gather(module: &'m Module) -> Result<Self> {
        let mut s = Sections::default();
        for item in &module.items {
            match item {
                ModuleItem::Type(entry) => s.types.push(&entry.ty),
                ModuleItem::Import(import) => s.imports.push(import),
                ModuleItem::Func(f) => {
                    if f.import.is_some() {
                        return Err(EncodeError::NotDesugared("inline function import"));
                    }
                    s.funcs.push(f);
                }
                ModuleItem::Table(t) => match &t.kind {
                    TableKind::Normal(ty) if t.import.is_none() => s.tables.push(ty),
                    _ => return Err(EncodeError::NotDesugared("inline table form")),
                },
                ModuleItem::Memory(m) => match &m.kind {
                    MemoryKind::Normal(ty) if m.import.is_none() => s.memories.push(ty),
                    _ => return Err(EncodeError::NotDesugared("inline memory form")),
                },
                ModuleItem::Global(g) => {
                    if g.import.is_some() {
                        return Err(EncodeError::NotDesugared("inline global import"));
                    }
                    s.globals.push(g);
                }
                ModuleItem::Event(e) => {
                    if e.import.is_some() {
                        return Err(EncodeError::NotDesugared("inline event import"));
                    }
                    s.events.push(e);
                }
                ModuleItem::Export(e) => s.exports.push(e),
                ModuleItem::Start(st) => s.start = Some(st),
                ModuleItem::Elem(e) => s.elems.push(e),
                ModuleItem::Data(d) => s.datas.push(d),
            }
        }
        Ok(s)
    }

    fn type_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.types.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.types.len() as u32);
        for ty in &self.types {
            body.push(TYPE_FUNC);
            write_u32_leb(&mut body, ty.params.len() as u32);
            for p in &ty.params {
                body.push(value_type_byte(p.ty.value));
            }
            write_u32_leb(&mut body, ty.results.len() as u32);
            for r in &ty.results {
                body.push(value_type_byte(r.value));
            }
        }
        Ok(Some((SECTION_TYPE, body)))
    }

    fn import_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.imports.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.imports.len() as u32);
        for import in &self.imports {
            write_name(&mut body, import.module.value.as_bytes());
            write_name(&mut body, import.field.value.as_bytes());
            match &import.desc {
                ImportDesc::Func { type_use, .. } => {
                    body.push(0x00);
                    write_u32_leb(&mut body, type_index(type_use)?);
                }
                ImportDesc::Table { ty, .. } => {
                    body.push(0x01);
                    write_table_type(&mut body, ty);
                }
                ImportDesc::Memory { ty, .. } => {
                    body.push(0x02);
                    write_limits(&mut body, &ty.limits);
                }
                ImportDesc::Global { ty, .. } => {
                    body.push(0x03);
                    write_global_type(&mut body, ty);
                }
                ImportDesc::Event { type_use, .. } => {
                    body.push(0x04);
                    write_u32_leb(&mut body, 0); // exception attribute
                    write_u32_leb(&mut body, type_index(type_use)?);
                }
            }
        }
        Ok(Some((SECTION_IMPORT, body)))
    }

    fn function_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.funcs.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.funcs.len() as u32);
        for f in &self.funcs {
            write_u32_leb(&mut body, type_index(&f.type_use)?);
        }
        Ok(Some((SECTION_FUNCTION, body)))
    }

    fn table_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.tables.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.tables.len() as u32);
        for ty in &self.tables {
            write_table_type(&mut body, ty);
        }
        Ok(Some((SECTION_TABLE, body)))
    }

    fn memory_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.memories.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.memories.len() as u32);
        for ty in &self.memories {
            write_limits(&mut body, &ty.limits);
        }
        Ok(Some((SECTION_MEMORY, body)))
    }

    fn event_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.events.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.events.len() as u32);
        for e in &self.events {
            write_u32_leb(&mut body, 0); // exception attribute
            write_u32_leb(&mut body, type_index(&e.type_use)?);
        }
        Ok(Some((SECTION_EVENT, body)))
    }

    fn global_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.globals.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.globals.len() as u32);
        for g in &self.globals {
            write_global_type(&mut body, &g.ty);
            write_expression(&mut body, &g.init)?;
        }
        Ok(Some((SECTION_GLOBAL, body)))
    }

    fn export_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.exports.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.exports.len() as u32);
        for e in &self.exports {
            write_name(&mut body, e.name.value.as_bytes());
            body.push(match e.kind.value {
                ExternalKind::Func => 0x00,
                ExternalKind::Table => 0x01,
                ExternalKind::Memory => 0x02,
                ExternalKind::Global => 0x03,
                ExternalKind::Event => 0x04,
            });
            write_u32_leb(&mut body, var_index(&e.var)?);
        }
        Ok(Some((SECTION_EXPORT, body)))
    }

    fn start_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        match self.start {
            Some(start) => {
                let mut body = Vec::new();
                write_u32_leb(&mut body, var_index(&start.var)?);
                Ok(Some((SECTION_START, body)))
            }
            None => Ok(None),
        }
    }

    fn element_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.elems.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.elems.len() as u32);
        for e in &self.elems {
            write_element_segment(&mut body, e)?;
        }
        Ok(Some((SECTION_ELEMENT, body)))
    }

    /// The DataCount section exists to let `memory.init`/`data.drop`
    /// validate before the data section arrives; emit it exactly when those
    /// instructions occur.
    fn data_count_section(&self) -> Option<(u8, Vec<u8>)> {
        let referencing = self.funcs.iter().any(|f| {
            f.body
                .iter()
                .any(|inst| matches!(inst.op.name, "memory.init" | "data.drop"))
        });
        if !referencing {
            return None;
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.datas.len() as u32);
        Some((SECTION_DATA_COUNT, body))
    }

    fn code_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.funcs.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.funcs.len() as u32);
        for f in &self.funcs {
            let mut code = Vec::new();
            let runs = compress_locals(&f.locals);
            write_u32_leb(&mut code, runs.len() as u32);
            for (count, ty) in runs {
                write_u32_leb(&mut code, count);
                code.push(value_type_byte(ty));
            }
            for inst in &f.body {
                write_instruction(&mut code, inst)?;
            }
            code.push(OP_END);

            write_u32_leb(&mut body, code.len() as u32);
            body.extend_from_slice(&code);
        }
        Ok(Some((SECTION_CODE, body)))
    }

    fn data_section(&self) -> Result<Option<(u8, Vec<u8>)>> {
        if self.datas.is_empty() {
            return Ok(None);
        }
        let mut body = Vec::new();
        write_u32_leb(&mut body, self.datas.len() as u32);
        for d in &self.datas {
            match &d.mode {
                SegmentMode::Active { target, offset } => {
                    let memory = target_index(target)?;
                    if memory == 0 {
                        body.push(0x00);
                    } else {
                        body.push(0x02);
                        write_u32_leb(&mut body, memory);
                    }
                    write_expression(&mut body, offset)?;
                }
                SegmentMode::Passive => body.push(0x01),
                SegmentMode::Declared => {
                    return Err(EncodeError::NotDesugared("declared data segment"));
                }
            }
            let total: usize = d.data.iter().map(|chunk| chunk.value.len()).sum();
            write_u32_leb(&mut body, total as u32);
            for chunk in &d.data {
                body.extend_from_slice(&chunk.value);
            }
        }
        Ok(Some((SECTION_DATA, body)))
    }
}

// ---------------------------------------------------------------------------
// Leaf writers
// ---------------------------------------------------------------------------

fn var_index(var: &At<Var>) -> Result<u32> {
    match &var.value {
        Var::Index(i) => Ok(*i),
        Var::Name(n) => Err(EncodeError::UnresolvedName(n.clone())),
    }
}

fn target_index(target: &Option<At<Var>>) -> Result<u32> {
    match target {
        Some(var) => var_index(var),
        None => Ok(0),
    }
}

fn type_index(use_: &FunctionTypeUse) -> Result<u32> {
    match &use_.type_use {
        Some(var) => var_index(var),
        None => Err(EncodeError::MissingTypeIndex),
    }
}

fn value_type_byte(vt: ValueType) -> u8 {
    match vt {
        ValueType::I32 => 0x7F,
        ValueType::I64 => 0x7E,
        ValueType::F32 => 0x7D,
        ValueType::F64 => 0x7C,
        ValueType::V128 => 0x7B,
        ValueType::FuncRef => 0x70,
        ValueType::ExternRef => 0x6F,
    }
}

fn reference_type_byte(rt: ReferenceType) -> u8 {
    value_type_byte(rt.value_type())
}

fn write_name(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_u32_leb(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn write_limits(buf: &mut Vec<u8>, limits: &Limits) {
    let flags: u8 = match (limits.max.is_some(), limits.shared) {
        (false, false) => 0x00,
        (true, false) => 0x01,
        (_, true) => 0x03,
    };
    buf.push(flags);
    write_u32_leb(buf, limits.min);
    if let Some(max) = limits.max {
        write_u32_leb(buf, max);
    }
}

fn write_table_type(buf: &mut Vec<u8>, ty: &TableType) {
    buf.push(reference_type_byte(ty.elem_type.value));
    write_limits(buf, &ty.limits);
}

fn write_global_type(buf: &mut Vec<u8>, ty: &GlobalType) {
    buf.push(value_type_byte(ty.value_type.value));
    buf.push(if ty.mutable { 0x01 } else { 0x00 });
}

fn write_block_type(buf: &mut Vec<u8>, ty: &FunctionTypeUse) -> Result<()> {
    if let Some(var) = &ty.type_use {
        write_s64_leb(buf, var_index(var)? as i64);
    } else if ty.ty.results.len() == 1 {
        buf.push(value_type_byte(ty.ty.results[0].value));
    } else {
        buf.push(BLOCK_TYPE_VOID);
    }
    Ok(())
}

fn write_expression(buf: &mut Vec<u8>, instructions: &[Instruction]) -> Result<()> {
    for inst in instructions {
        write_instruction(buf, inst)?;
    }
    buf.push(OP_END);
    Ok(())
}

fn write_memarg(buf: &mut Vec<u8>, memarg: &MemArg) {
    write_u32_leb(buf, memarg.align_log2);
    write_u32_leb(buf, memarg.offset);
}

fn write_instruction(buf: &mut Vec<u8>, inst: &Instruction) -> Result<()> {
    // Typed select has its own opcode; the mnemonic alone cannot tell.
    if let Immediate::Select(types) = &inst.imm {
        if types.is_empty() {
            buf.push(0x1B);
        } else {
            buf.push(0x1C);
            write_u32_leb(buf, types.len() as u32);
            for ty in types {
                buf.push(value_type_byte(ty.value));
            }
        }
        return Ok(());
    }

    match inst.op.code {
        OpCode::Byte(b) => buf.push(b),
        OpCode::Prefixed(prefix, sub) => {
            buf.push(prefix);
            write_u32_leb(buf, sub);
        }
    }

    match &inst.imm {
        Immediate::None => {}
        Immediate::Var(var) => write_u32_leb(buf, var_index(var)?),
        Immediate::BrTable { targets, default } => {
            write_u32_leb(buf, targets.len() as u32);
            for target in targets {
                write_u32_leb(buf, var_index(target)?);
            }
            write_u32_leb(buf, var_index(default)?);
        }
        Immediate::BrOnExn { label, event } => {
            write_u32_leb(buf, var_index(label)?);
            write_u32_leb(buf, var_index(event)?);
        }
        Immediate::CallIndirect { table, ty } => {
            write_u32_leb(buf, type_index(ty)?);
            write_u32_leb(buf, target_index(table)?);
        }
        Immediate::Block(bi) => write_block_type(buf, &bi.ty)?,
        Immediate::MemArg(memarg) => write_memarg(buf, memarg),
        Immediate::MemArgLane { memarg, lane } => {
            write_memarg(buf, memarg);
            buf.push(*lane);
        }
        Immediate::I32(v) => write_s32_leb(buf, *v),
        Immediate::I64(v) => write_s64_leb(buf, *v),
        Immediate::F32(bits) => buf.write_u32::<LittleEndian>(*bits)?,
        Immediate::F64(bits) => buf.write_u64::<LittleEndian>(*bits)?,
        Immediate::V128(bytes) => buf.extend_from_slice(bytes),
        Immediate::Lane(lane) => buf.push(*lane),
        Immediate::Shuffle(lanes) => buf.extend_from_slice(lanes),
        Immediate::Select(_) => unreachable!("handled above"),
        Immediate::RefNull(rt) => buf.push(reference_type_byte(rt.value)),
        Immediate::TableCopy { dst, src } => {
            write_u32_leb(buf, target_index(dst)?);
            write_u32_leb(buf, target_index(src)?);
        }
        Immediate::TableInit { segment, table } => {
            write_u32_leb(buf, var_index(segment)?);
            write_u32_leb(buf, target_index(table)?);
        }
    }

    // Reserved index bytes the binary format carries but the text format
    // leaves implicit.
    match inst.op.name {
        "memory.size" | "memory.grow" | "memory.fill" | "atomic.fence" => buf.push(0x00),
        "memory.copy" => {
            buf.push(0x00);
            buf.push(0x00);
        }
        "memory.init" => buf.push(0x00),
        "table.get" | "table.set" | "table.size" | "table.grow" | "table.fill" => {
            if inst.imm == Immediate::None {
                write_u32_leb(buf, 0);
            }
        }
        _ => {}
    }

    Ok(())
}

fn write_element_segment(buf: &mut Vec<u8>, e: &ElementSegment) -> Result<()> {
    let exprs = matches!(e.payload, ElementPayload::Exprs { .. });
    let (flags, table) = match &e.mode {
        SegmentMode::Active { target, .. } => {
            let table = target_index(target)?;
            let flags = match (table == 0, exprs) {
                (true, false) => 0u8,
                (true, true) => 4,
                (false, false) => 2,
                (false, true) => 6,
            };
            (flags, table)
        }
        SegmentMode::Passive => (if exprs { 5 } else { 1 }, 0),
        SegmentMode::Declared => (if exprs { 7 } else { 3 }, 0),
    };

    buf.push(flags);
    if flags == 2 || flags == 6 {
        write_u32_leb(buf, table);
    }
    if let SegmentMode::Active { offset, .. } = &e.mode {
        write_expression(buf, offset)?;
    }

    match &e.payload {
        ElementPayload::Vars { vars, .. } => {
            if flags != 0 {
                buf.push(0x00); // elemkind: funcref
            }
            write_u32_leb(buf, vars.len() as u32);
            for var in vars {
                write_u32_leb(buf, var_index(var)?);
            }
        }
        ElementPayload::Exprs { elem_type, exprs } => {
            if flags != 4 {
                buf.push(reference_type_byte(elem_type.value));
            }
            write_u32_leb(buf, exprs.len() as u32);
            for expr in exprs {
                write_expression(buf, expr)?;
            }
        }
    }
    Ok(())
}

/// Collapse consecutive identical local types into `(count, type)` runs.
fn compress_locals(locals: &[BoundLocal]) -> Vec<(u32, ValueType)> {
    let mut runs: Vec<(u32, ValueType)> = Vec::new();
    for local in locals {
        match runs.last_mut() {
            Some((count, ty)) if *ty == local.ty.value => *count += 1,
            _ => runs.push((1, local.ty.value)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Features;
    use crate::text::errors::TextErrors;
    use crate::text::parse_module;

    fn encode_source(source: &str) -> Vec<u8> {
        let mut errors = TextErrors::new();
        let module = parse_module(source, Features::default(), &mut errors)
            .unwrap_or_else(|| panic!("parse failed: {:?}", errors.diagnostics()));
        encode(&module).expect("encode failed")
    }

    #[test]
    fn empty_module_is_header_only() {
        assert_eq!(
            encode_source("(module)"),
            vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn leb128_unsigned() {
        let mut buf = Vec::new();
        write_u32_leb(&mut buf, 0);
        write_u32_leb(&mut buf, 127);
        write_u32_leb(&mut buf, 128);
        write_u32_leb(&mut buf, 624485);
        assert_eq!(buf, vec![0x00, 0x7F, 0x80, 0x01, 0xE5, 0x8E, 0x26]);
    }

    #[test]
    fn leb128_signed() {
        let mut buf = Vec::new();
        write_s32_leb(&mut buf, 0);
        write_s32_leb(&mut buf, -1);
        write_s32_leb(&mut buf, 63);
        write_s32_leb(&mut buf, 64);
        write_s32_leb(&mut buf, -123456);
        assert_eq!(buf, vec![0x00, 0x7F, 0x3F, 0xC0, 0x00, 0xC0, 0xBB, 0x78]);
    }

    #[test]
    fn simple_function_sections() {
        let bytes = encode_source("(module (func (result i32) (i32.const 42)))");
        // magic + version
        assert_eq!(&bytes[0..8], b"\0asm\x01\0\0\0");
        // type section: id 1, size 5, one type () -> (i32)
        assert_eq!(&bytes[8..15], &[1, 5, 1, 0x60, 0, 1, 0x7F]);
        // function section: id 3, size 2, one function of type 0
        assert_eq!(&bytes[15..19], &[3, 2, 1, 0]);
        // code section: id 10; body is locals(0) i32.const 42 end
        assert_eq!(&bytes[19..], &[10, 6, 1, 4, 0, 0x41, 42, 0x0B]);
    }

    #[test]
    fn memory_with_inline_data() {
        let bytes = encode_source("(module (memory (data \"hi\")))");
        // memory section: id 5, one memory with limits {1,1}
        let mem = [5u8, 4, 1, 0x01, 1, 1];
        assert!(
            bytes.windows(mem.len()).any(|w| w == mem),
            "no memory section in {bytes:x?}"
        );
        // data section: id 11, one active segment, offset i32.const 0, "hi"
        let data = [11u8, 8, 1, 0x00, 0x41, 0, 0x0B, 2, b'h', b'i'];
        assert!(
            bytes.windows(data.len()).any(|w| w == data),
            "no data section in {bytes:x?}"
        );
    }

    #[test]
    fn imports_and_exports() {
        let bytes = encode_source(
            r#"(module
                (import "env" "inc" (func $inc (param i32) (result i32)))
                (func $twice (export "twice") (param i32) (result i32)
                    local.get 0
                    call $inc
                    call $inc))"#,
        );
        // import section id 2 present
        assert!(bytes.contains(&2));
        // export entry: name "twice", kind 0, index 1
        let export = [5u8, b't', b'w', b'i', b'c', b'e', 0x00, 1];
        assert!(
            bytes.windows(export.len()).any(|w| w == export),
            "no export entry in {bytes:x?}"
        );
    }

    #[test]
    fn custom_sections_splice_in_order() {
        let mut errors = TextErrors::new();
        let module = parse_module("(module)", Features::default(), &mut errors).unwrap();
        let customs = vec![
            CustomAnnotation {
                name: b"head".to_vec(),
                order: SectionOrder::After,
                place: SectionPlace::First,
                data: b"x".to_vec(),
            },
            CustomAnnotation {
                name: b"tail".to_vec(),
                order: SectionOrder::After,
                place: SectionPlace::Last,
                data: b"y".to_vec(),
            },
        ];
        let bytes = encode_with_customs(&module, &customs).unwrap();
        // header, then custom "head" (with payload "x"), then custom "tail"
        assert_eq!(&bytes[0..8], b"\0asm\x01\0\0\0");
        assert_eq!(&bytes[8..11], &[0, 6, 4]);
        assert_eq!(&bytes[11..16], b"headx");
        let tail_at = bytes.len() - 8;
        assert_eq!(&bytes[tail_at..tail_at + 3], &[0, 6, 4]);
        assert_eq!(&bytes[tail_at + 3..], b"taily");
    }

    #[test]
    fn unresolved_names_are_rejected() {
        use crate::text::token::At;
        let mut module = Module::default();
        module.items.push(ModuleItem::Start(Start {
            span: crate::text::token::Span::ZERO,
            var: At::nowhere(Var::Name("f".into())),
        }));
        match encode(&module) {
            Err(EncodeError::UnresolvedName(name)) => assert_eq!(name, "f"),
            other => panic!("expected UnresolvedName, got {other:?}"),
        }
    }

    #[test]
    fn compress_locals_runs() {
        use crate::text::token::At;
        let local = |vt: ValueType| BoundLocal {
            name: None,
            ty: At::nowhere(vt),
        };
        let locals = vec![
            local(ValueType::I32),
            local(ValueType::I32),
            local(ValueType::F64),
            local(ValueType::I32),
        ];
        assert_eq!(
            compress_locals(&locals),
            vec![(2, ValueType::I32), (1, ValueType::F64), (1, ValueType::I32)]
        );
    }
}
