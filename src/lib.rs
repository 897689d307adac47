//! A WebAssembly text-format front end written in Rust.
//!
//! wattle parses the S-expression text format (and the reference test
//! suite's script dialect) into a structured module representation,
//! resolves symbolic names to indices, lowers the surface conveniences the
//! text format allows (inline imports and exports, inline element and data
//! segments, folded expressions, implicit function types) and re-emits
//! modules as `.wasm` binaries.
//!
//! # Modules
//!
//! - [`text`] -- Lexer, tokenizer, reader, name resolver, and desugarer.
//! - [`binary`] -- Binary encoder for desugared modules.
//! - [`valid`] -- Structural validation (index bounds, shapes).
//! - [`features`] -- The proposal feature-flag set that gates the grammar.
//!
//! # Example
//!
//! Parse a module and encode it to binary:
//!
//! ```
//! use wattle::binary;
//! use wattle::features::Features;
//! use wattle::text::{self, errors::TextErrors};
//!
//! let mut errors = TextErrors::new();
//! let module = text::parse_module(
//!     r#"(module
//!         (func (export "add") (param i32 i32) (result i32)
//!             local.get 0
//!             local.get 1
//!             i32.add))"#,
//!     Features::default(),
//!     &mut errors,
//! )
//! .expect("parse failed");
//!
//! let bytes = binary::encode(&module).unwrap();
//! assert_eq!(&bytes[0..4], b"\0asm");
//! ```
//!
//! # Diagnostics
//!
//! All stages report into an error sink rather than failing fast; a stage
//! runs only when the previous ones were clean. Collected diagnostics
//! render in source order with a pointer into the offending line:
//!
//! ```
//! use wattle::features::Features;
//! use wattle::text::{self, errors::TextErrors};
//!
//! let source = "(module (func (bork)))";
//! let mut errors = TextErrors::new();
//! assert!(text::parse_module(source, Features::default(), &mut errors).is_none());
//! assert!(errors.render("example.wat", source).contains("bork"));
//! ```

pub mod binary;
pub mod features;
pub mod text;
pub mod valid;
