#![no_main]

use libfuzzer_sys::fuzz_target;

use wattle::features::Features;
use wattle::text::errors::TextErrors;

fuzz_target!(|data: &[u8]| {
    let source = String::from_utf8_lossy(data);

    // Run the whole pipeline with everything enabled; we only care that it
    // terminates without panicking
    let mut errors = TextErrors::new();
    let _ = wattle::text::parse_module(&source, Features::all(), &mut errors);
});
