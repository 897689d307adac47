//! Shared helpers for the integration tests.
#![allow(dead_code)] // not every test target uses every helper

use wattle::features::Features;
use wattle::text::ast::Module;
use wattle::text::errors::TextErrors;

/// Run the full read → resolve → desugar pipeline, panicking with rendered
/// diagnostics on failure.
pub fn parse(source: &str) -> Module {
    parse_with(source, Features::default())
}

pub fn parse_with(source: &str, features: Features) -> Module {
    let mut errors = TextErrors::new();
    match wattle::text::parse_module(source, features, &mut errors) {
        Some(module) => module,
        None => panic!("parse failed:\n{}", errors.render("test.wat", source)),
    }
}

/// Run the pipeline and return the diagnostic messages it produced.
pub fn parse_errors(source: &str) -> Vec<String> {
    parse_errors_with(source, Features::default())
}

pub fn parse_errors_with(source: &str, features: Features) -> Vec<String> {
    let mut errors = TextErrors::new();
    let _ = wattle::text::parse_module(source, features, &mut errors);
    errors
        .diagnostics()
        .iter()
        .map(|d| d.message.clone())
        .collect()
}

/// Assert that parsing fails and some diagnostic contains `needle`.
pub fn assert_error(source: &str, needle: &str) {
    assert_error_with(source, Features::default(), needle);
}

pub fn assert_error_with(source: &str, features: Features, needle: &str) {
    let messages = parse_errors_with(source, features);
    assert!(
        messages.iter().any(|m| m.contains(needle)),
        "expected a diagnostic containing {needle:?}, got {messages:?}"
    );
}
