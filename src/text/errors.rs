//! Diagnostic collection for the text pipeline.
//!
//! Stages report problems through an [`ErrorSink`] instead of aborting: the
//! reader recovers and keeps going, and the driver decides afterwards
//! whether later stages may run. Diagnostics carry the context stack that
//! was active when they were reported, producing nested error traces like
//! `in function at 3:2`.

use super::token::Span;
use std::fmt;
use std::fmt::Write as _;

/// The sink contract shared by the reader, resolver, and desugarer.
pub trait ErrorSink {
    fn on_error(&mut self, span: Span, message: String);
    fn push_context(&mut self, span: Span, desc: &str);
    fn pop_context(&mut self);
    fn has_error(&self) -> bool;
    fn clear(&mut self);
}

/// One reported problem, with the context stack at the time of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub span: Span,
    pub message: String,
    /// Outermost first.
    pub context: Vec<(Span, String)>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.message)
    }
}

/// The standard collecting sink.
#[derive(Debug, Default)]
pub struct TextErrors {
    context: Vec<(Span, String)>,
    diagnostics: Vec<Diagnostic>,
}

impl TextErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render all diagnostics in source order, each with a pointer-arrow
    /// into its line of the original source.
    pub fn render(&self, filename: &str, source: &str) -> String {
        let mut out = String::new();
        let mut sorted: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        sorted.sort_by_key(|d| d.span.start);

        for diag in sorted {
            let _ = writeln!(
                out,
                "{}:{}:{}: {}",
                filename, diag.span.line, diag.span.column, diag.message
            );
            if let Some(line) = source.lines().nth(diag.span.line.saturating_sub(1) as usize) {
                let _ = writeln!(out, "  {}", line);
                let col = diag.span.column.saturating_sub(1) as usize;
                let width = diag.span.len().max(1).min(line.chars().count().saturating_sub(col).max(1));
                let _ = writeln!(out, "  {}{}", " ".repeat(col), "^".repeat(width));
            }
            for (span, desc) in diag.context.iter().rev() {
                let _ = writeln!(out, "  in {} at {}:{}", desc, span.line, span.column);
            }
        }
        out
    }
}

impl ErrorSink for TextErrors {
    fn on_error(&mut self, span: Span, message: String) {
        self.diagnostics.push(Diagnostic {
            span,
            message,
            context: self.context.clone(),
        });
    }

    fn push_context(&mut self, span: Span, desc: &str) {
        self.context.push((span, desc.to_string()));
    }

    fn pop_context(&mut self) {
        self.context.pop();
    }

    fn has_error(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    fn clear(&mut self) {
        self.diagnostics.clear();
        self.context.clear();
    }
}
