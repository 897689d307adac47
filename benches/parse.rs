use criterion::{Criterion, black_box, criterion_group, criterion_main};
use wattle::features::Features;
use wattle::text::errors::TextErrors;
use wattle::text::lexer::Lexer;

const FIB: &str = r#"
(module
  (func $fib (export "fib") (param $n i32) (result i32)
    (local $a i32)
    (local $b i32)
    (local $tmp i32)
    (local $i i32)
    (if (i32.lt_u (local.get $n) (i32.const 2))
      (then (return (local.get $n))))
    (local.set $a (i32.const 0))
    (local.set $b (i32.const 1))
    (local.set $i (i32.const 1))
    (block $done
      (loop $loop
        (br_if $done (i32.ge_u (local.get $i) (local.get $n)))
        (local.set $tmp (i32.add (local.get $a) (local.get $b)))
        (local.set $a (local.get $b))
        (local.set $b (local.get $tmp))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $loop)))
    (local.get $b)))
"#;

fn bench_lex(c: &mut Criterion) {
    c.bench_function("lex_fib", |b| {
        b.iter(|| Lexer::tokenise(black_box(FIB)));
    });
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_fib", |b| {
        b.iter(|| {
            let mut errors = TextErrors::new();
            let module =
                wattle::text::parse_module(black_box(FIB), Features::default(), &mut errors);
            assert!(module.is_some());
            module
        });
    });
}

fn bench_encode(c: &mut Criterion) {
    let mut errors = TextErrors::new();
    let module = wattle::text::parse_module(FIB, Features::default(), &mut errors).unwrap();
    c.bench_function("encode_fib", |b| {
        b.iter(|| wattle::binary::encode(black_box(&module)).unwrap());
    });
}

criterion_group!(benches, bench_lex, bench_parse, bench_encode);
criterion_main!(benches);
