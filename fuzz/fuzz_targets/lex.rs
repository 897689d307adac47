#![no_main]

use libfuzzer_sys::fuzz_target;

use wattle::text::lexer::Lexer;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as text; invalid UTF-8 becomes replacement characters
    let source = String::from_utf8_lossy(data);

    // The lexer is infallible by contract: it must terminate with Eof and
    // never panic, whatever the input
    let tokens = Lexer::tokenise(&source);
    assert!(!tokens.is_empty());
});
