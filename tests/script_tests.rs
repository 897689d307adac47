//! Tests for the .wast script dialect: modules, register, actions, and
//! assertions.

use wattle::features::{self, Features};
use wattle::text::ast::*;
use wattle::text::errors::{ErrorSink, TextErrors};

fn parse_script(source: &str) -> Script {
    parse_script_with(source, Features::default())
}

fn parse_script_with(source: &str, features: Features) -> Script {
    let mut errors = TextErrors::new();
    match wattle::text::parse_script(source, features, &mut errors) {
        Some(script) => script,
        None => panic!("script parse failed:\n{}", errors.render("test.wast", source)),
    }
}

#[test]
fn module_and_assert_return() {
    let script = parse_script(
        r#"
(module
  (func (export "add") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.add))
(assert_return (invoke "add" (i32.const 1) (i32.const 2)) (i32.const 3))
"#,
    );
    assert_eq!(script.commands.len(), 2);
    assert!(matches!(script.commands[0].value, Command::Module(_)));
    match &script.commands[1].value {
        Command::Assertion(Assertion::Return { action, results }) => {
            match action {
                Action::Invoke { module, name, args } => {
                    assert!(module.is_none());
                    assert_eq!(name.value, "add");
                    assert_eq!(args.len(), 2);
                    assert_eq!(args[0].value, Const::I32(1));
                }
                other => panic!("expected invoke, got {other:?}"),
            }
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].value, ReturnResult::I32(3));
        }
        other => panic!("expected assert_return, got {other:?}"),
    }
}

#[test]
fn embedded_modules_are_desugared() {
    let script = parse_script(r#"(module $m (func $f (export "f") (param i32) nop))"#);
    match &script.commands[0].value {
        Command::Module(sm) => {
            assert_eq!(sm.name.as_ref().map(|n| n.value.as_str()), Some("m"));
            match &sm.kind {
                ScriptModuleKind::Text(module) => {
                    // Inline export hoisted, implicit type materialised
                    assert!(
                        module
                            .items
                            .iter()
                            .any(|i| matches!(i, ModuleItem::Export(_)))
                    );
                    assert!(
                        module
                            .items
                            .iter()
                            .any(|i| matches!(i, ModuleItem::Type(_)))
                    );
                }
                other => panic!("expected text module, got {other:?}"),
            }
        }
        other => panic!("expected module, got {other:?}"),
    }
}

#[test]
fn named_module_and_register() {
    let script = parse_script(
        r#"
(module $M (func (export "f") (result i32) (i32.const 7)))
(register "mod" $M)
(assert_return (invoke $M "f") (i32.const 7))
"#,
    );
    assert_eq!(script.commands.len(), 3);
    match &script.commands[1].value {
        Command::Register { name, module } => {
            assert_eq!(name.value, "mod");
            assert_eq!(
                module.as_ref().map(|v| v.value.clone()),
                Some(Var::Name("M".into()))
            );
        }
        other => panic!("expected register, got {other:?}"),
    }
    match &script.commands[2].value {
        Command::Assertion(Assertion::Return { action, .. }) => match action {
            Action::Invoke { module, .. } => {
                assert_eq!(
                    module.as_ref().map(|v| v.value.clone()),
                    Some(Var::Name("M".into()))
                );
            }
            other => panic!("expected invoke, got {other:?}"),
        },
        other => panic!("expected assert_return, got {other:?}"),
    }
}

#[test]
fn binary_and_quote_modules() {
    let script = parse_script(
        r#"
(module binary "\00asm" "\01\00\00\00")
(module quote "(func)" "(memory 1)")
"#,
    );
    match &script.commands[0].value {
        Command::Module(sm) => match &sm.kind {
            ScriptModuleKind::Binary(chunks) => {
                let bytes: Vec<u8> = chunks.iter().flat_map(|c| c.value.clone()).collect();
                assert_eq!(bytes, b"\x00asm\x01\x00\x00\x00");
            }
            other => panic!("expected binary module, got {other:?}"),
        },
        other => panic!("expected module, got {other:?}"),
    }
    match &script.commands[1].value {
        Command::Module(sm) => match &sm.kind {
            ScriptModuleKind::Quote(chunks) => {
                let text: Vec<u8> = chunks.iter().flat_map(|c| c.value.clone()).collect();
                assert_eq!(text, b"(func)(memory 1)");
            }
            other => panic!("expected quote module, got {other:?}"),
        },
        other => panic!("expected module, got {other:?}"),
    }
}

#[test]
fn bare_fields_form_an_implicit_module() {
    let script = parse_script(
        r#"
(func (export "f") (result i32) (i32.const 1))
(memory 1)
(invoke "f")
"#,
    );
    assert_eq!(script.commands.len(), 2);
    match &script.commands[0].value {
        Command::Module(sm) => match &sm.kind {
            ScriptModuleKind::Text(module) => {
                assert_eq!(module.count_kinds().funcs, 1);
                assert_eq!(module.count_kinds().memories, 1);
            }
            other => panic!("expected text module, got {other:?}"),
        },
        other => panic!("expected implicit module, got {other:?}"),
    }
    assert!(matches!(script.commands[1].value, Command::Action(_)));
}

#[test]
fn assert_malformed_with_quote() {
    let script = parse_script(
        r#"(assert_malformed (module quote "(func (result i32)))") "unexpected token")"#,
    );
    match &script.commands[0].value {
        Command::Assertion(Assertion::Malformed { module, message }) => {
            assert!(matches!(module.kind, ScriptModuleKind::Quote(_)));
            assert_eq!(message.value, "unexpected token");
        }
        other => panic!("expected assert_malformed, got {other:?}"),
    }
}

#[test]
fn assert_invalid_and_unlinkable() {
    let script = parse_script(
        r#"
(assert_invalid (module (func (result i32) (f32.const 0))) "type mismatch")
(assert_unlinkable (module (import "m" "missing" (func))) "unknown import")
"#,
    );
    assert!(matches!(
        script.commands[0].value,
        Command::Assertion(Assertion::Invalid { .. })
    ));
    assert!(matches!(
        script.commands[1].value,
        Command::Assertion(Assertion::Unlinkable { .. })
    ));
}

#[test]
fn assert_trap_distinguishes_modules_from_actions() {
    let script = parse_script(
        r#"
(assert_trap (invoke "div" (i32.const 1) (i32.const 0)) "integer divide by zero")
(assert_trap (module (func $main unreachable) (start $main)) "unreachable")
"#,
    );
    assert!(matches!(
        script.commands[0].value,
        Command::Assertion(Assertion::ActionTrap { .. })
    ));
    assert!(matches!(
        script.commands[1].value,
        Command::Assertion(Assertion::ModuleTrap { .. })
    ));
}

#[test]
fn assert_exhaustion() {
    let script = parse_script(
        r#"(assert_exhaustion (invoke "runaway") "call stack exhausted")"#,
    );
    match &script.commands[0].value {
        Command::Assertion(Assertion::Exhaustion { message, .. }) => {
            assert_eq!(message.value, "call stack exhausted");
        }
        other => panic!("expected assert_exhaustion, got {other:?}"),
    }
}

#[test]
fn nan_patterns_in_results() {
    let script = parse_script(
        r#"(assert_return (invoke "f") (f32.const nan:canonical) (f64.const nan:arithmetic))"#,
    );
    match &script.commands[0].value {
        Command::Assertion(Assertion::Return { results, .. }) => {
            assert_eq!(
                results[0].value,
                ReturnResult::F32(FloatResult::NanCanonical)
            );
            assert_eq!(
                results[1].value,
                ReturnResult::F64(FloatResult::NanArithmetic)
            );
        }
        other => panic!("expected assert_return, got {other:?}"),
    }
}

#[test]
fn nan_patterns_are_not_argument_values() {
    let mut errors = TextErrors::new();
    let result = wattle::text::parse_script(
        r#"(assert_return (invoke "f" (f32.const nan:canonical)) (i32.const 0))"#,
        Features::default(),
        &mut errors,
    );
    assert!(result.is_none());
    assert!(errors.has_error());
}

#[test]
fn simd_lane_result_patterns() {
    let mut features = Features::default();
    features.enable(features::SIMD);
    let script = parse_script_with(
        r#"(assert_return (invoke "f")
            (v128.const f32x4 nan:canonical 1 2 nan:arithmetic)
            (v128.const i32x4 1 2 3 4))"#,
        features,
    );
    match &script.commands[0].value {
        Command::Assertion(Assertion::Return { results, .. }) => {
            match &results[0].value {
                ReturnResult::F32x4(lanes) => {
                    assert_eq!(lanes[0], FloatResult::NanCanonical);
                    assert_eq!(lanes[1], FloatResult::Bits(1.0f32.to_bits()));
                    assert_eq!(lanes[3], FloatResult::NanArithmetic);
                }
                other => panic!("expected f32x4 lanes, got {other:?}"),
            }
            match &results[1].value {
                ReturnResult::V128(bytes) => {
                    assert_eq!(bytes[0], 1);
                    assert_eq!(bytes[4], 2);
                }
                other => panic!("expected v128 bytes, got {other:?}"),
            }
        }
        other => panic!("expected assert_return, got {other:?}"),
    }
}

#[test]
fn reference_results_are_gated() {
    let mut errors = TextErrors::new();
    let result = wattle::text::parse_script(
        r#"(assert_return (invoke "f") (ref.any))"#,
        Features::default(),
        &mut errors,
    );
    assert!(result.is_none());
    assert!(
        errors
            .diagnostics()
            .iter()
            .any(|d| d.message.contains("ref.any not allowed"))
    );

    let mut features = Features::default();
    features.enable(features::REFERENCE_TYPES);
    let script = parse_script_with(
        r#"(assert_return (invoke "f") (ref.any) (ref.func) (ref.null) (ref.host 3))"#,
        features,
    );
    match &script.commands[0].value {
        Command::Assertion(Assertion::Return { results, .. }) => {
            assert_eq!(results[0].value, ReturnResult::RefAny);
            assert_eq!(results[1].value, ReturnResult::RefFunc);
            assert_eq!(results[2].value, ReturnResult::RefNull);
            assert_eq!(results[3].value, ReturnResult::RefHost(3));
        }
        other => panic!("expected assert_return, got {other:?}"),
    }
}

#[test]
fn get_action() {
    let script = parse_script(r#"(assert_return (get $m "g") (i64.const -1))"#);
    match &script.commands[0].value {
        Command::Assertion(Assertion::Return { action, results }) => {
            assert!(matches!(action, Action::Get { .. }));
            assert_eq!(results[0].value, ReturnResult::I64(-1));
        }
        other => panic!("expected assert_return, got {other:?}"),
    }
}
