//! Static keyword and opcode tables.
//!
//! The lexer classifies identifier-character runs by exact match against
//! these tables; the reader picks an immediate production from the entry's
//! [`ImmKind`]; the binary encoder takes its opcode bytes from [`OpCode`].
//! Unknown runs fall through to `Reserved` tokens.

use super::ast::ValueType;
use super::token::Kw;
use crate::features;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Binary encoding of an opcode: a plain byte, or a prefix byte followed by
/// a LEB128-encoded sub-opcode (`0xFC` misc, `0xFD` SIMD, `0xFE` threads).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Byte(u8),
    Prefixed(u8, u32),
}

/// The immediate production an opcode's mnemonic selects in the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmKind {
    /// No immediate.
    None,
    /// A label variable (`br`, `br_if`).
    Label,
    /// Label list plus default label (`br_table`).
    BrTable,
    /// Label and event variables (`br_on_exn`).
    BrOnExn,
    /// A function variable (`call`, `ref.func`).
    Func,
    /// A local variable.
    Local,
    /// A global variable.
    Global,
    /// An element-segment variable (`elem.drop`).
    Elem,
    /// A data-segment variable (`memory.init`, `data.drop`).
    Data,
    /// An event variable (`throw`).
    Event,
    /// Optional table variable plus function type use (`call_indirect`).
    CallIndirect,
    /// Optional table variable (`table.get`, `table.size`, …).
    TableUse,
    /// Optional destination and source table variables (`table.copy`).
    TableCopy,
    /// Element-segment variable with optional table variable (`table.init`).
    TableInit,
    /// `offset=`/`align=` fields; payload is the natural alignment (log2).
    Memarg(u32),
    /// Memarg followed by a lane index (`v128.load8_lane`, …).
    MemargLane(u32, u8),
    /// Scalar constants.
    I32,
    I64,
    F32,
    F64,
    /// A 128-bit vector constant.
    V128,
    /// A single lane index; payload is the lane count.
    Lane(u8),
    /// Sixteen shuffle lane indices, each below 32.
    Shuffle,
    /// Optional `(result t…)` list (typed `select`).
    SelectT,
    /// A heap-type keyword (`ref.null func`).
    RefNullT,
    /// `atomic.fence`; encoded with a trailing zero byte.
    Fence,
    /// Label plus function type use (`block`, `loop`, `if`, `try`).
    BlockType,
}

/// One row of the opcode table.
#[derive(Debug, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    pub code: OpCode,
    pub imm: ImmKind,
    /// Feature bits that must all be enabled for this instruction.
    pub features: u32,
}

/// Classify a structural keyword.
pub fn keyword(text: &str) -> Option<Kw> {
    Some(match text {
        "module" => Kw::Module,
        "type" => Kw::Type,
        "func" => Kw::Func,
        "table" => Kw::Table,
        "memory" => Kw::Memory,
        "global" => Kw::Global,
        "event" => Kw::Event,
        "import" => Kw::Import,
        "export" => Kw::Export,
        "start" => Kw::Start,
        "elem" => Kw::Elem,
        "data" => Kw::Data,
        "param" => Kw::Param,
        "result" => Kw::Result,
        "local" => Kw::Local,
        "offset" => Kw::Offset,
        "item" => Kw::Item,
        "declare" => Kw::Declare,
        "mut" => Kw::Mut,
        "shared" => Kw::Shared,
        "extern" => Kw::Extern,
        "block" => Kw::Block,
        "loop" => Kw::Loop,
        "if" => Kw::If,
        "then" => Kw::Then,
        "else" => Kw::Else,
        "end" => Kw::End,
        "try" => Kw::Try,
        "catch" => Kw::Catch,
        "binary" => Kw::Binary,
        "quote" => Kw::Quote,
        "register" => Kw::Register,
        "invoke" => Kw::Invoke,
        "get" => Kw::Get,
        "assert_malformed" => Kw::AssertMalformed,
        "assert_invalid" => Kw::AssertInvalid,
        "assert_unlinkable" => Kw::AssertUnlinkable,
        "assert_return" => Kw::AssertReturn,
        "assert_trap" => Kw::AssertTrap,
        "assert_exhaustion" => Kw::AssertExhaustion,
        "ref.any" => Kw::RefAny,
        "ref.host" => Kw::RefHost,
        _ => return None,
    })
}

/// Classify a value-type keyword.
pub fn value_type(text: &str) -> Option<ValueType> {
    Some(match text {
        "i32" => ValueType::I32,
        "i64" => ValueType::I64,
        "f32" => ValueType::F32,
        "f64" => ValueType::F64,
        "v128" => ValueType::V128,
        "funcref" => ValueType::FuncRef,
        "externref" => ValueType::ExternRef,
        _ => return None,
    })
}

/// Look up an instruction mnemonic in the opcode table.
pub fn opcode(text: &str) -> Option<&'static OpInfo> {
    static INDEX: Lazy<HashMap<&'static str, &'static OpInfo>> =
        Lazy::new(|| OPCODES.iter().map(|op| (op.name, op)).collect());
    INDEX.get(text).copied()
}

// Block-structured instructions lex as structural keywords (they interact
// with labels and `end`), but still need table entries for the instruction
// representation and binary encoding.
pub static BLOCK: OpInfo = op("block", B(0x02), ImmKind::BlockType, 0);
pub static LOOP: OpInfo = op("loop", B(0x03), ImmKind::BlockType, 0);
pub static IF: OpInfo = op("if", B(0x04), ImmKind::BlockType, 0);
pub static ELSE: OpInfo = op("else", B(0x05), ImmKind::None, 0);
pub static END: OpInfo = op("end", B(0x0B), ImmKind::None, 0);
pub static TRY: OpInfo = op("try", B(0x06), ImmKind::BlockType, features::EXCEPTIONS);
pub static CATCH: OpInfo = op("catch", B(0x07), ImmKind::None, features::EXCEPTIONS);

const fn op(name: &'static str, code: OpCode, imm: ImmKind, feats: u32) -> OpInfo {
    OpInfo {
        name,
        code,
        imm,
        features: feats,
    }
}

use OpCode::Byte as B;

const fn misc(sub: u32) -> OpCode {
    OpCode::Prefixed(0xFC, sub)
}

const fn simd(sub: u32) -> OpCode {
    OpCode::Prefixed(0xFD, sub)
}

const fn atomic(sub: u32) -> OpCode {
    OpCode::Prefixed(0xFE, sub)
}

/// The plain-instruction table: one row per mnemonic.
///
/// Memarg payloads are the natural alignment as log2 of the access width,
/// used when the source omits `align=`.
pub static OPCODES: &[OpInfo] = {
    use ImmKind::*;
    use crate::features::{
        BULK_MEMORY, EXCEPTIONS, REFERENCE_TYPES, SATURATING_FLOAT_TO_INT, SIGN_EXTENSION, SIMD,
        TAIL_CALL, THREADS,
    };
    &[
        // Control
        op("unreachable", B(0x00), None, 0),
        op("nop", B(0x01), None, 0),
        op("br", B(0x0C), Label, 0),
        op("br_if", B(0x0D), Label, 0),
        op("br_table", B(0x0E), BrTable, 0),
        op("return", B(0x0F), None, 0),
        op("call", B(0x10), Func, 0),
        op("call_indirect", B(0x11), CallIndirect, 0),
        op("return_call", B(0x12), Func, TAIL_CALL),
        op("return_call_indirect", B(0x13), CallIndirect, TAIL_CALL),
        op("throw", B(0x08), Event, EXCEPTIONS),
        op("rethrow", B(0x09), None, EXCEPTIONS),
        op("br_on_exn", B(0x0A), BrOnExn, EXCEPTIONS),
        // Parametric
        op("drop", B(0x1A), None, 0),
        op("select", B(0x1B), SelectT, 0),
        // Reference types
        op("ref.null", B(0xD0), RefNullT, REFERENCE_TYPES),
        op("ref.is_null", B(0xD1), None, REFERENCE_TYPES),
        op("ref.func", B(0xD2), Func, REFERENCE_TYPES),
        // Variable access
        op("local.get", B(0x20), Local, 0),
        op("local.set", B(0x21), Local, 0),
        op("local.tee", B(0x22), Local, 0),
        op("global.get", B(0x23), Global, 0),
        op("global.set", B(0x24), Global, 0),
        // Table access
        op("table.get", B(0x25), TableUse, REFERENCE_TYPES),
        op("table.set", B(0x26), TableUse, REFERENCE_TYPES),
        op("table.init", misc(12), TableInit, BULK_MEMORY),
        op("elem.drop", misc(13), Elem, BULK_MEMORY),
        op("table.copy", misc(14), TableCopy, BULK_MEMORY),
        op("table.grow", misc(15), TableUse, REFERENCE_TYPES),
        op("table.size", misc(16), TableUse, REFERENCE_TYPES),
        op("table.fill", misc(17), TableUse, REFERENCE_TYPES),
        // Memory access
        op("i32.load", B(0x28), Memarg(2), 0),
        op("i64.load", B(0x29), Memarg(3), 0),
        op("f32.load", B(0x2A), Memarg(2), 0),
        op("f64.load", B(0x2B), Memarg(3), 0),
        op("i32.load8_s", B(0x2C), Memarg(0), 0),
        op("i32.load8_u", B(0x2D), Memarg(0), 0),
        op("i32.load16_s", B(0x2E), Memarg(1), 0),
        op("i32.load16_u", B(0x2F), Memarg(1), 0),
        op("i64.load8_s", B(0x30), Memarg(0), 0),
        op("i64.load8_u", B(0x31), Memarg(0), 0),
        op("i64.load16_s", B(0x32), Memarg(1), 0),
        op("i64.load16_u", B(0x33), Memarg(1), 0),
        op("i64.load32_s", B(0x34), Memarg(2), 0),
        op("i64.load32_u", B(0x35), Memarg(2), 0),
        op("i32.store", B(0x36), Memarg(2), 0),
        op("i64.store", B(0x37), Memarg(3), 0),
        op("f32.store", B(0x38), Memarg(2), 0),
        op("f64.store", B(0x39), Memarg(3), 0),
        op("i32.store8", B(0x3A), Memarg(0), 0),
        op("i32.store16", B(0x3B), Memarg(1), 0),
        op("i64.store8", B(0x3C), Memarg(0), 0),
        op("i64.store16", B(0x3D), Memarg(1), 0),
        op("i64.store32", B(0x3E), Memarg(2), 0),
        op("memory.size", B(0x3F), None, 0),
        op("memory.grow", B(0x40), None, 0),
        op("memory.init", misc(8), Data, BULK_MEMORY),
        op("data.drop", misc(9), Data, BULK_MEMORY),
        op("memory.copy", misc(10), None, BULK_MEMORY),
        op("memory.fill", misc(11), None, BULK_MEMORY),
        // Constants
        op("i32.const", B(0x41), I32, 0),
        op("i64.const", B(0x42), I64, 0),
        op("f32.const", B(0x43), F32, 0),
        op("f64.const", B(0x44), F64, 0),
        // i32 comparison
        op("i32.eqz", B(0x45), None, 0),
        op("i32.eq", B(0x46), None, 0),
        op("i32.ne", B(0x47), None, 0),
        op("i32.lt_s", B(0x48), None, 0),
        op("i32.lt_u", B(0x49), None, 0),
        op("i32.gt_s", B(0x4A), None, 0),
        op("i32.gt_u", B(0x4B), None, 0),
        op("i32.le_s", B(0x4C), None, 0),
        op("i32.le_u", B(0x4D), None, 0),
        op("i32.ge_s", B(0x4E), None, 0),
        op("i32.ge_u", B(0x4F), None, 0),
        // i64 comparison
        op("i64.eqz", B(0x50), None, 0),
        op("i64.eq", B(0x51), None, 0),
        op("i64.ne", B(0x52), None, 0),
        op("i64.lt_s", B(0x53), None, 0),
        op("i64.lt_u", B(0x54), None, 0),
        op("i64.gt_s", B(0x55), None, 0),
        op("i64.gt_u", B(0x56), None, 0),
        op("i64.le_s", B(0x57), None, 0),
        op("i64.le_u", B(0x58), None, 0),
        op("i64.ge_s", B(0x59), None, 0),
        op("i64.ge_u", B(0x5A), None, 0),
        // f32 comparison
        op("f32.eq", B(0x5B), None, 0),
        op("f32.ne", B(0x5C), None, 0),
        op("f32.lt", B(0x5D), None, 0),
        op("f32.gt", B(0x5E), None, 0),
        op("f32.le", B(0x5F), None, 0),
        op("f32.ge", B(0x60), None, 0),
        // f64 comparison
        op("f64.eq", B(0x61), None, 0),
        op("f64.ne", B(0x62), None, 0),
        op("f64.lt", B(0x63), None, 0),
        op("f64.gt", B(0x64), None, 0),
        op("f64.le", B(0x65), None, 0),
        op("f64.ge", B(0x66), None, 0),
        // i32 arithmetic
        op("i32.clz", B(0x67), None, 0),
        op("i32.ctz", B(0x68), None, 0),
        op("i32.popcnt", B(0x69), None, 0),
        op("i32.add", B(0x6A), None, 0),
        op("i32.sub", B(0x6B), None, 0),
        op("i32.mul", B(0x6C), None, 0),
        op("i32.div_s", B(0x6D), None, 0),
        op("i32.div_u", B(0x6E), None, 0),
        op("i32.rem_s", B(0x6F), None, 0),
        op("i32.rem_u", B(0x70), None, 0),
        op("i32.and", B(0x71), None, 0),
        op("i32.or", B(0x72), None, 0),
        op("i32.xor", B(0x73), None, 0),
        op("i32.shl", B(0x74), None, 0),
        op("i32.shr_s", B(0x75), None, 0),
        op("i32.shr_u", B(0x76), None, 0),
        op("i32.rotl", B(0x77), None, 0),
        op("i32.rotr", B(0x78), None, 0),
        // i64 arithmetic
        op("i64.clz", B(0x79), None, 0),
        op("i64.ctz", B(0x7A), None, 0),
        op("i64.popcnt", B(0x7B), None, 0),
        op("i64.add", B(0x7C), None, 0),
        op("i64.sub", B(0x7D), None, 0),
        op("i64.mul", B(0x7E), None, 0),
        op("i64.div_s", B(0x7F), None, 0),
        op("i64.div_u", B(0x80), None, 0),
        op("i64.rem_s", B(0x81), None, 0),
        op("i64.rem_u", B(0x82), None, 0),
        op("i64.and", B(0x83), None, 0),
        op("i64.or", B(0x84), None, 0),
        op("i64.xor", B(0x85), None, 0),
        op("i64.shl", B(0x86), None, 0),
        op("i64.shr_s", B(0x87), None, 0),
        op("i64.shr_u", B(0x88), None, 0),
        op("i64.rotl", B(0x89), None, 0),
        op("i64.rotr", B(0x8A), None, 0),
        // f32 arithmetic
        op("f32.abs", B(0x8B), None, 0),
        op("f32.neg", B(0x8C), None, 0),
        op("f32.ceil", B(0x8D), None, 0),
        op("f32.floor", B(0x8E), None, 0),
        op("f32.trunc", B(0x8F), None, 0),
        op("f32.nearest", B(0x90), None, 0),
        op("f32.sqrt", B(0x91), None, 0),
        op("f32.add", B(0x92), None, 0),
        op("f32.sub", B(0x93), None, 0),
        op("f32.mul", B(0x94), None, 0),
        op("f32.div", B(0x95), None, 0),
        op("f32.min", B(0x96), None, 0),
        op("f32.max", B(0x97), None, 0),
        op("f32.copysign", B(0x98), None, 0),
        // f64 arithmetic
        op("f64.abs", B(0x99), None, 0),
        op("f64.neg", B(0x9A), None, 0),
        op("f64.ceil", B(0x9B), None, 0),
        op("f64.floor", B(0x9C), None, 0),
        op("f64.trunc", B(0x9D), None, 0),
        op("f64.nearest", B(0x9E), None, 0),
        op("f64.sqrt", B(0x9F), None, 0),
        op("f64.add", B(0xA0), None, 0),
        op("f64.sub", B(0xA1), None, 0),
        op("f64.mul", B(0xA2), None, 0),
        op("f64.div", B(0xA3), None, 0),
        op("f64.min", B(0xA4), None, 0),
        op("f64.max", B(0xA5), None, 0),
        op("f64.copysign", B(0xA6), None, 0),
        // Conversions
        op("i32.wrap_i64", B(0xA7), None, 0),
        op("i32.trunc_f32_s", B(0xA8), None, 0),
        op("i32.trunc_f32_u", B(0xA9), None, 0),
        op("i32.trunc_f64_s", B(0xAA), None, 0),
        op("i32.trunc_f64_u", B(0xAB), None, 0),
        op("i64.extend_i32_s", B(0xAC), None, 0),
        op("i64.extend_i32_u", B(0xAD), None, 0),
        op("i64.trunc_f32_s", B(0xAE), None, 0),
        op("i64.trunc_f32_u", B(0xAF), None, 0),
        op("i64.trunc_f64_s", B(0xB0), None, 0),
        op("i64.trunc_f64_u", B(0xB1), None, 0),
        op("f32.convert_i32_s", B(0xB2), None, 0),
        op("f32.convert_i32_u", B(0xB3), None, 0),
        op("f32.convert_i64_s", B(0xB4), None, 0),
        op("f32.convert_i64_u", B(0xB5), None, 0),
        op("f32.demote_f64", B(0xB6), None, 0),
        op("f64.convert_i32_s", B(0xB7), None, 0),
        op("f64.convert_i32_u", B(0xB8), None, 0),
        op("f64.convert_i64_s", B(0xB9), None, 0),
        op("f64.convert_i64_u", B(0xBA), None, 0),
        op("f64.promote_f32", B(0xBB), None, 0),
        op("i32.reinterpret_f32", B(0xBC), None, 0),
        op("i64.reinterpret_f64", B(0xBD), None, 0),
        op("f32.reinterpret_i32", B(0xBE), None, 0),
        op("f64.reinterpret_i64", B(0xBF), None, 0),
        // Sign extension
        op("i32.extend8_s", B(0xC0), None, SIGN_EXTENSION),
        op("i32.extend16_s", B(0xC1), None, SIGN_EXTENSION),
        op("i64.extend8_s", B(0xC2), None, SIGN_EXTENSION),
        op("i64.extend16_s", B(0xC3), None, SIGN_EXTENSION),
        op("i64.extend32_s", B(0xC4), None, SIGN_EXTENSION),
        // Saturating truncation
        op("i32.trunc_sat_f32_s", misc(0), None, SATURATING_FLOAT_TO_INT),
        op("i32.trunc_sat_f32_u", misc(1), None, SATURATING_FLOAT_TO_INT),
        op("i32.trunc_sat_f64_s", misc(2), None, SATURATING_FLOAT_TO_INT),
        op("i32.trunc_sat_f64_u", misc(3), None, SATURATING_FLOAT_TO_INT),
        op("i64.trunc_sat_f32_s", misc(4), None, SATURATING_FLOAT_TO_INT),
        op("i64.trunc_sat_f32_u", misc(5), None, SATURATING_FLOAT_TO_INT),
        op("i64.trunc_sat_f64_s", misc(6), None, SATURATING_FLOAT_TO_INT),
        op("i64.trunc_sat_f64_u", misc(7), None, SATURATING_FLOAT_TO_INT),
        // SIMD memory
        op("v128.load", simd(0), Memarg(4), SIMD),
        op("v128.load8x8_s", simd(1), Memarg(3), SIMD),
        op("v128.load8x8_u", simd(2), Memarg(3), SIMD),
        op("v128.load16x4_s", simd(3), Memarg(3), SIMD),
        op("v128.load16x4_u", simd(4), Memarg(3), SIMD),
        op("v128.load32x2_s", simd(5), Memarg(3), SIMD),
        op("v128.load32x2_u", simd(6), Memarg(3), SIMD),
        op("v128.load8_splat", simd(7), Memarg(0), SIMD),
        op("v128.load16_splat", simd(8), Memarg(1), SIMD),
        op("v128.load32_splat", simd(9), Memarg(2), SIMD),
        op("v128.load64_splat", simd(10), Memarg(3), SIMD),
        op("v128.store", simd(11), Memarg(4), SIMD),
        op("v128.const", simd(12), V128, SIMD),
        op("i8x16.shuffle", simd(13), Shuffle, SIMD),
        op("i8x16.swizzle", simd(14), None, SIMD),
        op("i8x16.splat", simd(15), None, SIMD),
        op("i16x8.splat", simd(16), None, SIMD),
        op("i32x4.splat", simd(17), None, SIMD),
        op("i64x2.splat", simd(18), None, SIMD),
        op("f32x4.splat", simd(19), None, SIMD),
        op("f64x2.splat", simd(20), None, SIMD),
        op("i8x16.extract_lane_s", simd(21), Lane(16), SIMD),
        op("i8x16.extract_lane_u", simd(22), Lane(16), SIMD),
        op("i8x16.replace_lane", simd(23), Lane(16), SIMD),
        op("i16x8.extract_lane_s", simd(24), Lane(8), SIMD),
        op("i16x8.extract_lane_u", simd(25), Lane(8), SIMD),
        op("i16x8.replace_lane", simd(26), Lane(8), SIMD),
        op("i32x4.extract_lane", simd(27), Lane(4), SIMD),
        op("i32x4.replace_lane", simd(28), Lane(4), SIMD),
        op("i64x2.extract_lane", simd(29), Lane(2), SIMD),
        op("i64x2.replace_lane", simd(30), Lane(2), SIMD),
        op("f32x4.extract_lane", simd(31), Lane(4), SIMD),
        op("f32x4.replace_lane", simd(32), Lane(4), SIMD),
        op("f64x2.extract_lane", simd(33), Lane(2), SIMD),
        op("f64x2.replace_lane", simd(34), Lane(2), SIMD),
        // SIMD comparison
        op("i8x16.eq", simd(35), None, SIMD),
        op("i8x16.ne", simd(36), None, SIMD),
        op("i8x16.lt_s", simd(37), None, SIMD),
        op("i8x16.lt_u", simd(38), None, SIMD),
        op("i8x16.gt_s", simd(39), None, SIMD),
        op("i8x16.gt_u", simd(40), None, SIMD),
        op("i8x16.le_s", simd(41), None, SIMD),
        op("i8x16.le_u", simd(42), None, SIMD),
        op("i8x16.ge_s", simd(43), None, SIMD),
        op("i8x16.ge_u", simd(44), None, SIMD),
        op("i16x8.eq", simd(45), None, SIMD),
        op("i16x8.ne", simd(46), None, SIMD),
        op("i16x8.lt_s", simd(47), None, SIMD),
        op("i16x8.lt_u", simd(48), None, SIMD),
        op("i16x8.gt_s", simd(49), None, SIMD),
        op("i16x8.gt_u", simd(50), None, SIMD),
        op("i16x8.le_s", simd(51), None, SIMD),
        op("i16x8.le_u", simd(52), None, SIMD),
        op("i16x8.ge_s", simd(53), None, SIMD),
        op("i16x8.ge_u", simd(54), None, SIMD),
        op("i32x4.eq", simd(55), None, SIMD),
        op("i32x4.ne", simd(56), None, SIMD),
        op("i32x4.lt_s", simd(57), None, SIMD),
        op("i32x4.lt_u", simd(58), None, SIMD),
        op("i32x4.gt_s", simd(59), None, SIMD),
        op("i32x4.gt_u", simd(60), None, SIMD),
        op("i32x4.le_s", simd(61), None, SIMD),
        op("i32x4.le_u", simd(62), None, SIMD),
        op("i32x4.ge_s", simd(63), None, SIMD),
        op("i32x4.ge_u", simd(64), None, SIMD),
        op("f32x4.eq", simd(65), None, SIMD),
        op("f32x4.ne", simd(66), None, SIMD),
        op("f32x4.lt", simd(67), None, SIMD),
        op("f32x4.gt", simd(68), None, SIMD),
        op("f32x4.le", simd(69), None, SIMD),
        op("f32x4.ge", simd(70), None, SIMD),
        op("f64x2.eq", simd(71), None, SIMD),
        op("f64x2.ne", simd(72), None, SIMD),
        op("f64x2.lt", simd(73), None, SIMD),
        op("f64x2.gt", simd(74), None, SIMD),
        op("f64x2.le", simd(75), None, SIMD),
        op("f64x2.ge", simd(76), None, SIMD),
        // v128 bitwise
        op("v128.not", simd(77), None, SIMD),
        op("v128.and", simd(78), None, SIMD),
        op("v128.andnot", simd(79), None, SIMD),
        op("v128.or", simd(80), None, SIMD),
        op("v128.xor", simd(81), None, SIMD),
        op("v128.bitselect", simd(82), None, SIMD),
        op("v128.any_true", simd(83), None, SIMD),
        // SIMD lane memory
        op("v128.load8_lane", simd(84), MemargLane(0, 16), SIMD),
        op("v128.load16_lane", simd(85), MemargLane(1, 8), SIMD),
        op("v128.load32_lane", simd(86), MemargLane(2, 4), SIMD),
        op("v128.load64_lane", simd(87), MemargLane(3, 2), SIMD),
        op("v128.store8_lane", simd(88), MemargLane(0, 16), SIMD),
        op("v128.store16_lane", simd(89), MemargLane(1, 8), SIMD),
        op("v128.store32_lane", simd(90), MemargLane(2, 4), SIMD),
        op("v128.store64_lane", simd(91), MemargLane(3, 2), SIMD),
        op("v128.load32_zero", simd(92), Memarg(2), SIMD),
        op("v128.load64_zero", simd(93), Memarg(3), SIMD),
        op("f32x4.demote_f64x2_zero", simd(94), None, SIMD),
        op("f64x2.promote_low_f32x4", simd(95), None, SIMD),
        // i8x16 arithmetic
        op("i8x16.abs", simd(96), None, SIMD),
        op("i8x16.neg", simd(97), None, SIMD),
        op("i8x16.popcnt", simd(98), None, SIMD),
        op("i8x16.all_true", simd(99), None, SIMD),
        op("i8x16.bitmask", simd(100), None, SIMD),
        op("i8x16.narrow_i16x8_s", simd(101), None, SIMD),
        op("i8x16.narrow_i16x8_u", simd(102), None, SIMD),
        op("f32x4.ceil", simd(103), None, SIMD),
        op("f32x4.floor", simd(104), None, SIMD),
        op("f32x4.trunc", simd(105), None, SIMD),
        op("f32x4.nearest", simd(106), None, SIMD),
        op("i8x16.shl", simd(107), None, SIMD),
        op("i8x16.shr_s", simd(108), None, SIMD),
        op("i8x16.shr_u", simd(109), None, SIMD),
        op("i8x16.add", simd(110), None, SIMD),
        op("i8x16.add_sat_s", simd(111), None, SIMD),
        op("i8x16.add_sat_u", simd(112), None, SIMD),
        op("i8x16.sub", simd(113), None, SIMD),
        op("i8x16.sub_sat_s", simd(114), None, SIMD),
        op("i8x16.sub_sat_u", simd(115), None, SIMD),
        op("f64x2.ceil", simd(116), None, SIMD),
        op("f64x2.floor", simd(117), None, SIMD),
        op("i8x16.min_s", simd(118), None, SIMD),
        op("i8x16.min_u", simd(119), None, SIMD),
        op("i8x16.max_s", simd(120), None, SIMD),
        op("i8x16.max_u", simd(121), None, SIMD),
        op("f64x2.trunc", simd(122), None, SIMD),
        op("i8x16.avgr_u", simd(123), None, SIMD),
        op("i16x8.extadd_pairwise_i8x16_s", simd(124), None, SIMD),
        op("i16x8.extadd_pairwise_i8x16_u", simd(125), None, SIMD),
        op("i32x4.extadd_pairwise_i16x8_s", simd(126), None, SIMD),
        op("i32x4.extadd_pairwise_i16x8_u", simd(127), None, SIMD),
        // i16x8 arithmetic
        op("i16x8.abs", simd(128), None, SIMD),
        op("i16x8.neg", simd(129), None, SIMD),
        op("i16x8.q15mulr_sat_s", simd(130), None, SIMD),
        op("i16x8.all_true", simd(131), None, SIMD),
        op("i16x8.bitmask", simd(132), None, SIMD),
        op("i16x8.narrow_i32x4_s", simd(133), None, SIMD),
        op("i16x8.narrow_i32x4_u", simd(134), None, SIMD),
        op("i16x8.extend_low_i8x16_s", simd(135), None, SIMD),
        op("i16x8.extend_high_i8x16_s", simd(136), None, SIMD),
        op("i16x8.extend_low_i8x16_u", simd(137), None, SIMD),
        op("i16x8.extend_high_i8x16_u", simd(138), None, SIMD),
        op("i16x8.shl", simd(139), None, SIMD),
        op("i16x8.shr_s", simd(140), None, SIMD),
        op("i16x8.shr_u", simd(141), None, SIMD),
        op("i16x8.add", simd(142), None, SIMD),
        op("i16x8.add_sat_s", simd(143), None, SIMD),
        op("i16x8.add_sat_u", simd(144), None, SIMD),
        op("i16x8.sub", simd(145), None, SIMD),
        op("i16x8.sub_sat_s", simd(146), None, SIMD),
        op("i16x8.sub_sat_u", simd(147), None, SIMD),
        op("f64x2.nearest", simd(148), None, SIMD),
        op("i16x8.mul", simd(149), None, SIMD),
        op("i16x8.min_s", simd(150), None, SIMD),
        op("i16x8.min_u", simd(151), None, SIMD),
        op("i16x8.max_s", simd(152), None, SIMD),
        op("i16x8.max_u", simd(153), None, SIMD),
        op("i16x8.avgr_u", simd(155), None, SIMD),
        op("i16x8.extmul_low_i8x16_s", simd(156), None, SIMD),
        op("i16x8.extmul_high_i8x16_s", simd(157), None, SIMD),
        op("i16x8.extmul_low_i8x16_u", simd(158), None, SIMD),
        op("i16x8.extmul_high_i8x16_u", simd(159), None, SIMD),
        // i32x4 arithmetic
        op("i32x4.abs", simd(160), None, SIMD),
        op("i32x4.neg", simd(161), None, SIMD),
        op("i32x4.all_true", simd(163), None, SIMD),
        op("i32x4.bitmask", simd(164), None, SIMD),
        op("i32x4.extend_low_i16x8_s", simd(167), None, SIMD),
        op("i32x4.extend_high_i16x8_s", simd(168), None, SIMD),
        op("i32x4.extend_low_i16x8_u", simd(169), None, SIMD),
        op("i32x4.extend_high_i16x8_u", simd(170), None, SIMD),
        op("i32x4.shl", simd(171), None, SIMD),
        op("i32x4.shr_s", simd(172), None, SIMD),
        op("i32x4.shr_u", simd(173), None, SIMD),
        op("i32x4.add", simd(174), None, SIMD),
        op("i32x4.sub", simd(177), None, SIMD),
        op("i32x4.mul", simd(181), None, SIMD),
        op("i32x4.min_s", simd(182), None, SIMD),
        op("i32x4.min_u", simd(183), None, SIMD),
        op("i32x4.max_s", simd(184), None, SIMD),
        op("i32x4.max_u", simd(185), None, SIMD),
        op("i32x4.dot_i16x8_s", simd(186), None, SIMD),
        op("i32x4.extmul_low_i16x8_s", simd(188), None, SIMD),
        op("i32x4.extmul_high_i16x8_s", simd(189), None, SIMD),
        op("i32x4.extmul_low_i16x8_u", simd(190), None, SIMD),
        op("i32x4.extmul_high_i16x8_u", simd(191), None, SIMD),
        // i64x2 arithmetic
        op("i64x2.abs", simd(192), None, SIMD),
        op("i64x2.neg", simd(193), None, SIMD),
        op("i64x2.all_true", simd(195), None, SIMD),
        op("i64x2.bitmask", simd(196), None, SIMD),
        op("i64x2.extend_low_i32x4_s", simd(199), None, SIMD),
        op("i64x2.extend_high_i32x4_s", simd(200), None, SIMD),
        op("i64x2.extend_low_i32x4_u", simd(201), None, SIMD),
        op("i64x2.extend_high_i32x4_u", simd(202), None, SIMD),
        op("i64x2.shl", simd(203), None, SIMD),
        op("i64x2.shr_s", simd(204), None, SIMD),
        op("i64x2.shr_u", simd(205), None, SIMD),
        op("i64x2.add", simd(206), None, SIMD),
        op("i64x2.sub", simd(209), None, SIMD),
        op("i64x2.mul", simd(213), None, SIMD),
        op("i64x2.eq", simd(214), None, SIMD),
        op("i64x2.ne", simd(215), None, SIMD),
        op("i64x2.lt_s", simd(216), None, SIMD),
        op("i64x2.gt_s", simd(217), None, SIMD),
        op("i64x2.le_s", simd(218), None, SIMD),
        op("i64x2.ge_s", simd(219), None, SIMD),
        op("i64x2.extmul_low_i32x4_s", simd(220), None, SIMD),
        op("i64x2.extmul_high_i32x4_s", simd(221), None, SIMD),
        op("i64x2.extmul_low_i32x4_u", simd(222), None, SIMD),
        op("i64x2.extmul_high_i32x4_u", simd(223), None, SIMD),
        // f32x4 arithmetic
        op("f32x4.abs", simd(224), None, SIMD),
        op("f32x4.neg", simd(225), None, SIMD),
        op("f32x4.sqrt", simd(227), None, SIMD),
        op("f32x4.add", simd(228), None, SIMD),
        op("f32x4.sub", simd(229), None, SIMD),
        op("f32x4.mul", simd(230), None, SIMD),
        op("f32x4.div", simd(231), None, SIMD),
        op("f32x4.min", simd(232), None, SIMD),
        op("f32x4.max", simd(233), None, SIMD),
        op("f32x4.pmin", simd(234), None, SIMD),
        op("f32x4.pmax", simd(235), None, SIMD),
        // f64x2 arithmetic
        op("f64x2.abs", simd(236), None, SIMD),
        op("f64x2.neg", simd(237), None, SIMD),
        op("f64x2.sqrt", simd(239), None, SIMD),
        op("f64x2.add", simd(240), None, SIMD),
        op("f64x2.sub", simd(241), None, SIMD),
        op("f64x2.mul", simd(242), None, SIMD),
        op("f64x2.div", simd(243), None, SIMD),
        op("f64x2.min", simd(244), None, SIMD),
        op("f64x2.max", simd(245), None, SIMD),
        op("f64x2.pmin", simd(246), None, SIMD),
        op("f64x2.pmax", simd(247), None, SIMD),
        // SIMD conversions
        op("i32x4.trunc_sat_f32x4_s", simd(248), None, SIMD),
        op("i32x4.trunc_sat_f32x4_u", simd(249), None, SIMD),
        op("f32x4.convert_i32x4_s", simd(250), None, SIMD),
        op("f32x4.convert_i32x4_u", simd(251), None, SIMD),
        op("i32x4.trunc_sat_f64x2_s_zero", simd(252), None, SIMD),
        op("i32x4.trunc_sat_f64x2_u_zero", simd(253), None, SIMD),
        op("f64x2.convert_low_i32x4_s", simd(254), None, SIMD),
        op("f64x2.convert_low_i32x4_u", simd(255), None, SIMD),
        // Threads
        op("memory.atomic.notify", atomic(0x00), Memarg(2), THREADS),
        op("memory.atomic.wait32", atomic(0x01), Memarg(2), THREADS),
        op("memory.atomic.wait64", atomic(0x02), Memarg(3), THREADS),
        op("atomic.fence", atomic(0x03), Fence, THREADS),
        op("i32.atomic.load", atomic(0x10), Memarg(2), THREADS),
        op("i64.atomic.load", atomic(0x11), Memarg(3), THREADS),
        op("i32.atomic.load8_u", atomic(0x12), Memarg(0), THREADS),
        op("i32.atomic.load16_u", atomic(0x13), Memarg(1), THREADS),
        op("i64.atomic.load8_u", atomic(0x14), Memarg(0), THREADS),
        op("i64.atomic.load16_u", atomic(0x15), Memarg(1), THREADS),
        op("i64.atomic.load32_u", atomic(0x16), Memarg(2), THREADS),
        op("i32.atomic.store", atomic(0x17), Memarg(2), THREADS),
        op("i64.atomic.store", atomic(0x18), Memarg(3), THREADS),
        op("i32.atomic.store8", atomic(0x19), Memarg(0), THREADS),
        op("i32.atomic.store16", atomic(0x1A), Memarg(1), THREADS),
        op("i64.atomic.store8", atomic(0x1B), Memarg(0), THREADS),
        op("i64.atomic.store16", atomic(0x1C), Memarg(1), THREADS),
        op("i64.atomic.store32", atomic(0x1D), Memarg(2), THREADS),
        op("i32.atomic.rmw.add", atomic(0x1E), Memarg(2), THREADS),
        op("i64.atomic.rmw.add", atomic(0x1F), Memarg(3), THREADS),
        op("i32.atomic.rmw8.add_u", atomic(0x20), Memarg(0), THREADS),
        op("i32.atomic.rmw16.add_u", atomic(0x21), Memarg(1), THREADS),
        op("i64.atomic.rmw8.add_u", atomic(0x22), Memarg(0), THREADS),
        op("i64.atomic.rmw16.add_u", atomic(0x23), Memarg(1), THREADS),
        op("i64.atomic.rmw32.add_u", atomic(0x24), Memarg(2), THREADS),
        op("i32.atomic.rmw.sub", atomic(0x25), Memarg(2), THREADS),
        op("i64.atomic.rmw.sub", atomic(0x26), Memarg(3), THREADS),
        op("i32.atomic.rmw8.sub_u", atomic(0x27), Memarg(0), THREADS),
        op("i32.atomic.rmw16.sub_u", atomic(0x28), Memarg(1), THREADS),
        op("i64.atomic.rmw8.sub_u", atomic(0x29), Memarg(0), THREADS),
        op("i64.atomic.rmw16.sub_u", atomic(0x2A), Memarg(1), THREADS),
        op("i64.atomic.rmw32.sub_u", atomic(0x2B), Memarg(2), THREADS),
        op("i32.atomic.rmw.and", atomic(0x2C), Memarg(2), THREADS),
        op("i64.atomic.rmw.and", atomic(0x2D), Memarg(3), THREADS),
        op("i32.atomic.rmw8.and_u", atomic(0x2E), Memarg(0), THREADS),
        op("i32.atomic.rmw16.and_u", atomic(0x2F), Memarg(1), THREADS),
        op("i64.atomic.rmw8.and_u", atomic(0x30), Memarg(0), THREADS),
        op("i64.atomic.rmw16.and_u", atomic(0x31), Memarg(1), THREADS),
        op("i64.atomic.rmw32.and_u", atomic(0x32), Memarg(2), THREADS),
        op("i32.atomic.rmw.or", atomic(0x33), Memarg(2), THREADS),
        op("i64.atomic.rmw.or", atomic(0x34), Memarg(3), THREADS),
        op("i32.atomic.rmw8.or_u", atomic(0x35), Memarg(0), THREADS),
        op("i32.atomic.rmw16.or_u", atomic(0x36), Memarg(1), THREADS),
        op("i64.atomic.rmw8.or_u", atomic(0x37), Memarg(0), THREADS),
        op("i64.atomic.rmw16.or_u", atomic(0x38), Memarg(1), THREADS),
        op("i64.atomic.rmw32.or_u", atomic(0x39), Memarg(2), THREADS),
        op("i32.atomic.rmw.xor", atomic(0x3A), Memarg(2), THREADS),
        op("i64.atomic.rmw.xor", atomic(0x3B), Memarg(3), THREADS),
        op("i32.atomic.rmw8.xor_u", atomic(0x3C), Memarg(0), THREADS),
        op("i32.atomic.rmw16.xor_u", atomic(0x3D), Memarg(1), THREADS),
        op("i64.atomic.rmw8.xor_u", atomic(0x3E), Memarg(0), THREADS),
        op("i64.atomic.rmw16.xor_u", atomic(0x3F), Memarg(1), THREADS),
        op("i64.atomic.rmw32.xor_u", atomic(0x40), Memarg(2), THREADS),
        op("i32.atomic.rmw.xchg", atomic(0x41), Memarg(2), THREADS),
        op("i64.atomic.rmw.xchg", atomic(0x42), Memarg(3), THREADS),
        op("i32.atomic.rmw8.xchg_u", atomic(0x43), Memarg(0), THREADS),
        op("i32.atomic.rmw16.xchg_u", atomic(0x44), Memarg(1), THREADS),
        op("i64.atomic.rmw8.xchg_u", atomic(0x45), Memarg(0), THREADS),
        op("i64.atomic.rmw16.xchg_u", atomic(0x46), Memarg(1), THREADS),
        op("i64.atomic.rmw32.xchg_u", atomic(0x47), Memarg(2), THREADS),
        op("i32.atomic.rmw.cmpxchg", atomic(0x48), Memarg(2), THREADS),
        op("i64.atomic.rmw.cmpxchg", atomic(0x49), Memarg(3), THREADS),
        op("i32.atomic.rmw8.cmpxchg_u", atomic(0x4A), Memarg(0), THREADS),
        op("i32.atomic.rmw16.cmpxchg_u", atomic(0x4B), Memarg(1), THREADS),
        op("i64.atomic.rmw8.cmpxchg_u", atomic(0x4C), Memarg(0), THREADS),
        op("i64.atomic.rmw16.cmpxchg_u", atomic(0x4D), Memarg(1), THREADS),
        op("i64.atomic.rmw32.cmpxchg_u", atomic(0x4E), Memarg(2), THREADS),
    ]
};

#[cfg(test)]
mod table_tests {
    use super::*;

    #[test]
    fn representative_encodings() {
        assert_eq!(opcode("unreachable").unwrap().code, OpCode::Byte(0x00));
        assert_eq!(opcode("call").unwrap().code, OpCode::Byte(0x10));
        assert_eq!(opcode("i32.const").unwrap().code, OpCode::Byte(0x41));
        assert_eq!(opcode("f64.copysign").unwrap().code, OpCode::Byte(0xA6));
        assert_eq!(
            opcode("memory.init").unwrap().code,
            OpCode::Prefixed(0xFC, 8)
        );
        assert_eq!(
            opcode("v128.const").unwrap().code,
            OpCode::Prefixed(0xFD, 12)
        );
        assert_eq!(
            opcode("i8x16.shuffle").unwrap().imm,
            ImmKind::Shuffle
        );
        assert_eq!(
            opcode("memory.atomic.wait64").unwrap().code,
            OpCode::Prefixed(0xFE, 0x02)
        );
    }

    #[test]
    fn lane_counts_match_shapes() {
        assert_eq!(opcode("i8x16.extract_lane_s").unwrap().imm, ImmKind::Lane(16));
        assert_eq!(opcode("i16x8.replace_lane").unwrap().imm, ImmKind::Lane(8));
        assert_eq!(opcode("f32x4.extract_lane").unwrap().imm, ImmKind::Lane(4));
        assert_eq!(opcode("i64x2.replace_lane").unwrap().imm, ImmKind::Lane(2));
        assert_eq!(
            opcode("v128.load16_lane").unwrap().imm,
            ImmKind::MemargLane(1, 8)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keyword_lookup() {
        assert_eq!(keyword("module"), Some(Kw::Module));
        assert_eq!(keyword("assert_return"), Some(Kw::AssertReturn));
        assert_eq!(keyword("i32.add"), None);
        assert_eq!(keyword("bogus"), None);
    }

    #[test]
    fn value_type_lookup() {
        assert_eq!(value_type("i32"), Some(ValueType::I32));
        assert_eq!(value_type("externref"), Some(ValueType::ExternRef));
        assert_eq!(value_type("i31"), None);
    }

    #[test]
    fn opcode_lookup() {
        let add = opcode("i32.add").unwrap();
        assert_eq!(add.code, OpCode::Byte(0x6A));
        assert_eq!(add.imm, ImmKind::None);

        let load = opcode("i64.load").unwrap();
        assert_eq!(load.imm, ImmKind::Memarg(3));

        assert!(opcode("i32.bogus").is_none());
    }

    #[test]
    fn feature_masks() {
        assert_eq!(opcode("i32.add").unwrap().features, 0);
        assert_eq!(opcode("v128.const").unwrap().features, crate::features::SIMD);
        assert_eq!(
            opcode("memory.copy").unwrap().features,
            crate::features::BULK_MEMORY
        );
        assert_eq!(
            opcode("i32.extend8_s").unwrap().features,
            crate::features::SIGN_EXTENSION
        );
    }

    #[test]
    fn no_duplicate_mnemonics() {
        let mut seen = HashSet::new();
        for op in OPCODES {
            assert!(seen.insert(op.name), "duplicate opcode name: {}", op.name);
        }
    }

    #[test]
    fn no_duplicate_encodings() {
        let mut seen = HashSet::new();
        for op in OPCODES {
            assert!(seen.insert(op.code), "duplicate encoding for: {}", op.name);
        }
    }

    #[test]
    fn block_statics() {
        assert_eq!(BLOCK.code, OpCode::Byte(0x02));
        assert_eq!(END.code, OpCode::Byte(0x0B));
        assert_eq!(TRY.features, crate::features::EXCEPTIONS);
    }
}
