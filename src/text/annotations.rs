//! `(@custom …)` annotation extraction.
//!
//! Annotations arrive from the tokenizer as balanced token groups. This
//! pass picks out the ones named `custom`, parses their placement grammar,
//! and leaves every other annotation untouched for other tools:
//!
//! ```text
//! (@custom "name" (before|after <section>)? text*)
//! <section> ::= first | type | import | func | table | memory | global
//!             | export | start | elem | code | data | datacount | last
//! ```
//!
//! The extracted sections carry byte-exact payloads; where they land in the
//! encoded binary is decided by the encoder from `order`/`place`.

use super::errors::ErrorSink;
use super::token::{Kw, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionOrder {
    Before,
    After,
}

/// A standard section slot a custom section can be anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionPlace {
    First,
    Type,
    Import,
    Func,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Elem,
    Code,
    Data,
    DataCount,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAnnotation {
    /// Section name bytes (byte-exact, not required to be UTF-8).
    pub name: Vec<u8>,
    pub order: SectionOrder,
    pub place: SectionPlace,
    /// Concatenated payload strings.
    pub data: Vec<u8>,
}

/// Extract all `(@custom …)` groups from the collected annotations,
/// removing them from the list. Malformed custom annotations are diagnosed
/// and dropped; unrelated annotations are left in place.
pub fn extract_custom_annotations(
    annots: &mut Vec<Vec<Token>>,
    errors: &mut dyn ErrorSink,
) -> Vec<CustomAnnotation> {
    let mut extracted = Vec::new();
    annots.retain(|group| {
        let is_custom = matches!(&group.first().map(|t| &t.kind),
            Some(TokenKind::LparAnn(name)) if name == "custom");
        if !is_custom {
            return true;
        }
        if let Some(custom) = parse_custom(group, errors) {
            extracted.push(custom);
        }
        false
    });
    extracted
}

/// Parse one `(@custom …)` token group. The group is balanced and ends
/// with its closing `Rpar`.
fn parse_custom(group: &[Token], errors: &mut dyn ErrorSink) -> Option<CustomAnnotation> {
    // group[0] is the `(@custom` opener; the final token is its `)`.
    let mut at = 1usize;
    let end = group.len().saturating_sub(1);

    let name = match group.get(at).map(|t| &t.kind) {
        Some(TokenKind::Text(text)) => text.decode(),
        _ => {
            let token = group.get(at).or_else(|| group.first())?;
            errors.on_error(
                token.span,
                format!("Expected section name, found token: {}", token.kind),
            );
            return None;
        }
    };
    at += 1;

    let mut order = SectionOrder::After;
    let mut place = SectionPlace::Last;
    if group.get(at).map(|t| &t.kind) == Some(&TokenKind::Lpar) {
        at += 1;
        match group.get(at).map(|t| &t.kind) {
            Some(TokenKind::Reserved(word)) if word == "before" => order = SectionOrder::Before,
            Some(TokenKind::Reserved(word)) if word == "after" => order = SectionOrder::After,
            _ => {
                let token = group.get(at).unwrap_or(&group[0]);
                errors.on_error(
                    token.span,
                    format!("Expected after/before clause, found token: {}", token.kind),
                );
                return None;
            }
        }
        at += 1;
        place = match group.get(at).map(|t| &t.kind) {
            Some(TokenKind::Reserved(word)) if word == "first" => SectionPlace::First,
            Some(TokenKind::Reserved(word)) if word == "code" => SectionPlace::Code,
            Some(TokenKind::Reserved(word)) if word == "datacount" => SectionPlace::DataCount,
            Some(TokenKind::Reserved(word)) if word == "last" => SectionPlace::Last,
            Some(TokenKind::Keyword(Kw::Type)) => SectionPlace::Type,
            Some(TokenKind::Keyword(Kw::Import)) => SectionPlace::Import,
            Some(TokenKind::Keyword(Kw::Func)) => SectionPlace::Func,
            Some(TokenKind::Keyword(Kw::Table)) => SectionPlace::Table,
            Some(TokenKind::Keyword(Kw::Memory)) => SectionPlace::Memory,
            Some(TokenKind::Keyword(Kw::Global)) => SectionPlace::Global,
            Some(TokenKind::Keyword(Kw::Export)) => SectionPlace::Export,
            Some(TokenKind::Keyword(Kw::Start)) => SectionPlace::Start,
            Some(TokenKind::Keyword(Kw::Elem)) => SectionPlace::Elem,
            Some(TokenKind::Keyword(Kw::Data)) => SectionPlace::Data,
            _ => {
                let token = group.get(at).unwrap_or(&group[0]);
                errors.on_error(
                    token.span,
                    format!("Expected section position, found token: {}", token.kind),
                );
                return None;
            }
        };
        at += 1;
        if group.get(at).map(|t| &t.kind) != Some(&TokenKind::Rpar) {
            let token = group.get(at).unwrap_or(&group[0]);
            errors.on_error(
                token.span,
                format!("Expected location clause end, found token: {}", token.kind),
            );
            return None;
        }
        at += 1;
    }

    let mut data = Vec::new();
    while at < end {
        match &group[at].kind {
            TokenKind::Text(text) => data.extend_from_slice(&text.decode()),
            kind => {
                errors.on_error(
                    group[at].span,
                    format!("Expected section data, found token: {kind}"),
                );
                return None;
            }
        }
        at += 1;
    }

    if at >= group.len() {
        let last = group.last()?;
        errors.on_error(last.span, "Unexpected end of annotation".to_string());
        return None;
    }

    Some(CustomAnnotation {
        name,
        order,
        place,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::errors::TextErrors;
    use crate::text::tokenizer::Tokenizer;

    fn annots_of(source: &str) -> Vec<Vec<Token>> {
        let mut t = Tokenizer::new(source);
        while t.read().kind != TokenKind::Eof {}
        std::mem::take(t.annotations())
    }

    #[test]
    fn extracts_simple_custom() {
        let mut annots = annots_of(r#"(@custom "meta" "hello " "world") (module)"#);
        let mut errors = TextErrors::new();
        let customs = extract_custom_annotations(&mut annots, &mut errors);
        assert!(!errors.has_error(), "{:?}", errors.diagnostics());
        assert!(annots.is_empty());
        assert_eq!(customs.len(), 1);
        assert_eq!(customs[0].name, b"meta");
        assert_eq!(customs[0].data, b"hello world");
        assert_eq!(customs[0].order, SectionOrder::After);
        assert_eq!(customs[0].place, SectionPlace::Last);
    }

    #[test]
    fn parses_placement_clause() {
        let mut annots = annots_of(r#"(@custom "m" (before func) "x") (module)"#);
        let mut errors = TextErrors::new();
        let customs = extract_custom_annotations(&mut annots, &mut errors);
        assert!(!errors.has_error());
        assert_eq!(customs[0].order, SectionOrder::Before);
        assert_eq!(customs[0].place, SectionPlace::Func);
    }

    #[test]
    fn parses_reserved_places() {
        for (text, place) in [
            ("first", SectionPlace::First),
            ("code", SectionPlace::Code),
            ("datacount", SectionPlace::DataCount),
            ("last", SectionPlace::Last),
        ] {
            let source = format!(r#"(@custom "m" (after {text}))"#);
            let mut annots = annots_of(&source);
            let mut errors = TextErrors::new();
            let customs = extract_custom_annotations(&mut annots, &mut errors);
            assert!(!errors.has_error(), "{text}: {:?}", errors.diagnostics());
            assert_eq!(customs[0].place, place, "{text}");
        }
    }

    #[test]
    fn leaves_other_annotations_alone() {
        let mut annots = annots_of(r#"(@name "m") (@custom "c") (module)"#);
        let mut errors = TextErrors::new();
        let customs = extract_custom_annotations(&mut annots, &mut errors);
        assert_eq!(customs.len(), 1);
        assert_eq!(annots.len(), 1);
        assert_eq!(annots[0][0].kind, TokenKind::LparAnn("name".into()));
    }

    #[test]
    fn missing_name_is_diagnosed() {
        let mut annots = annots_of(r#"(@custom (before func))"#);
        let mut errors = TextErrors::new();
        let customs = extract_custom_annotations(&mut annots, &mut errors);
        assert!(customs.is_empty());
        assert!(errors.has_error());
        assert!(errors.diagnostics()[0].message.contains("Expected section name"));
    }

    #[test]
    fn bad_place_is_diagnosed() {
        let mut annots = annots_of(r#"(@custom "m" (before nowhere))"#);
        let mut errors = TextErrors::new();
        let customs = extract_custom_annotations(&mut annots, &mut errors);
        assert!(customs.is_empty());
        assert!(
            errors.diagnostics()[0]
                .message
                .contains("Expected section position")
        );
    }

    #[test]
    fn trailing_junk_is_diagnosed() {
        let mut annots = annots_of(r#"(@custom "m" $id)"#);
        let mut errors = TextErrors::new();
        let customs = extract_custom_annotations(&mut annots, &mut errors);
        assert!(customs.is_empty());
        assert!(errors.diagnostics()[0].message.contains("Expected section data"));
    }
}
