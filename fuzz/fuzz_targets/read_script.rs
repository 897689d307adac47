#![no_main]

use libfuzzer_sys::fuzz_target;

use wattle::features::Features;
use wattle::text::errors::TextErrors;

fuzz_target!(|data: &[u8]| {
    let source = String::from_utf8_lossy(data);

    let mut errors = TextErrors::new();
    let _ = wattle::text::parse_script(&source, Features::all(), &mut errors);
});
