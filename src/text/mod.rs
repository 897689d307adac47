//! The text-format front end.
//!
//! The pipeline runs lexer → tokenizer → reader → resolver → desugarer:
//!
//! - [`lexer::Lexer`] turns source bytes into tokens, collecting `(@name …)`
//!   annotations on a side channel;
//! - [`tokenizer::Tokenizer`] provides the two-token lookahead the reader
//!   needs;
//! - [`read`] builds the AST, gated by [`Features`](crate::features::Features);
//! - [`resolve`] turns symbolic references into dense indices;
//! - [`desugar`] lowers inline conveniences and materialises implicit
//!   function types.
//!
//! Each stage reports through an [`errors::ErrorSink`]; a stage only runs
//! when everything before it was clean. [`parse_module`] and
//! [`parse_script`] wire the stages together.
//!
//! # Example
//!
//! ```
//! use wattle::features::Features;
//! use wattle::text::{self, errors::TextErrors};
//!
//! let mut errors = TextErrors::new();
//! let module = text::parse_module(
//!     r#"(module (func (export "answer") (result i32) (i32.const 42)))"#,
//!     Features::default(),
//!     &mut errors,
//! )
//! .expect("parse failed");
//! assert_eq!(module.items.len(), 3); // func, export, implicit type
//! ```

pub mod annotations;
pub mod ast;
pub mod cursor;
pub mod desugar;
pub mod errors;
pub mod keywords;
pub mod lexer;
pub mod num;
pub mod read;
pub mod resolve;
pub mod token;
pub mod tokenizer;
pub mod typemap;

use crate::features::Features;
use ast::{Module, Script};
use errors::ErrorSink;
use token::TokenKind;
use tokenizer::Tokenizer;

/// Check end of input and the annotations policy after a read.
fn finish(t: &mut Tokenizer<'_>, features: Features, errors: &mut dyn ErrorSink) {
    let trailing = t.peek(0).clone();
    if trailing.kind != TokenKind::Eof {
        errors.on_error(
            trailing.span,
            format!("Expected Eof, got {}", trailing.kind),
        );
    }
    if !features.annotations()
        && let Some(group) = t.annotations().first()
        && let Some(token) = group.first()
    {
        errors.on_error(token.span, "Annotations not allowed".to_string());
    }
}

/// Parse one module from source: read, resolve, desugar. Returns `None`
/// (with diagnostics in the sink) as soon as any stage reports an error.
pub fn parse_module(
    source: &str,
    features: Features,
    errors: &mut errors::TextErrors,
) -> Option<Module> {
    let mut t = Tokenizer::new(source);
    let module = read::read_module(&mut t, features, errors);
    finish(&mut t, features, errors);
    let mut module = module?;
    if errors.has_error() {
        return None;
    }
    resolve::resolve(&mut module, errors);
    if errors.has_error() {
        return None;
    }
    desugar::desugar(&mut module, errors);
    if errors.has_error() {
        return None;
    }
    Some(module)
}

/// Parse a script: commands until end of input, with every embedded text
/// module resolved and desugared.
pub fn parse_script(
    source: &str,
    features: Features,
    errors: &mut errors::TextErrors,
) -> Option<Script> {
    let mut t = Tokenizer::new(source);
    let script = read::read_script(&mut t, features, errors);
    finish(&mut t, features, errors);
    let mut script = script?;
    if errors.has_error() {
        return None;
    }
    resolve::resolve_script(&mut script, errors);
    if errors.has_error() {
        return None;
    }
    desugar::desugar_script(&mut script, errors);
    if errors.has_error() {
        return None;
    }
    Some(script)
}
