//! Lexer for the WebAssembly text format.
//!
//! The lexer is infallible: malformed input becomes `Invalid` tokens and the
//! scan continues at the next recovery point, so a single bad literal does
//! not hide errors in the rest of the source. End of input is an explicit
//! `Eof` token; lexing an empty buffer yields exactly one `Eof`.
//!
//! Annotations, the parenthesised regions opened by `(@name`, are not part of
//! the grammar proper. [`Lexer::lex_no_whitespace_collect_annots`] skips
//! them while lexing and returns each complete balanced annotation as its
//! own token group, preserving it for tools that understand specific
//! annotation names (e.g. `(@custom …)`).

use super::cursor::Cursor;
use super::keywords;
use super::num;
use super::token::{Text, Token, TokenKind};

pub struct Lexer<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
        }
    }

    /// Tokenise an entire source buffer, annotations included in stream
    /// order. The last token is always `Eof`.
    pub fn tokenise(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    /// Advance past whitespace and comments and return the next token,
    /// collecting any complete `(@name …)` annotation groups encountered on
    /// the way.
    pub fn lex_no_whitespace_collect_annots(&mut self) -> (Token, Vec<Vec<Token>>) {
        let mut annots = Vec::new();
        loop {
            let token = self.next_token();
            if let TokenKind::LparAnn(_) = token.kind {
                annots.push(self.collect_annotation(token));
                continue;
            }
            return (token, annots);
        }
    }

    /// Collect the balanced token group of an annotation whose opening
    /// `LparAnn` has already been read. The group includes the opener and
    /// the closing `Rpar`. An unterminated annotation ends at `Eof`.
    fn collect_annotation(&mut self, open: Token) -> Vec<Token> {
        let mut group = vec![open];
        let mut depth = 1usize;
        while depth > 0 {
            let token = self.next_token();
            match token.kind {
                TokenKind::Lpar | TokenKind::LparAnn(_) => depth += 1,
                TokenKind::Rpar => depth -= 1,
                TokenKind::Eof => break,
                _ => {}
            }
            group.push(token);
        }
        group
    }

    /// Lex one token, skipping leading whitespace and comments.
    pub fn next_token(&mut self) -> Token {
        if let Some(invalid) = self.skip_whitespace_and_comments() {
            return invalid;
        }

        let start = self.cursor.position();
        if self.cursor.is_eof() {
            return Token::new(TokenKind::Eof, start.span_here());
        }

        let kind = match self.cursor.peek().unwrap() {
            '(' => self.lex_lpar(),
            ')' => {
                self.cursor.advance();
                TokenKind::Rpar
            }
            '"' => self.lex_string(),
            c if is_idchar(c) => {
                let text = self.cursor.take_while(is_idchar);
                classify(text)
            }
            _ => {
                self.cursor.advance();
                TokenKind::Invalid("unexpected character")
            }
        };

        Token::new(kind, start.span_to(&self.cursor.position()))
    }

    /// `(`, or the annotation opener `(@name`.
    fn lex_lpar(&mut self) -> TokenKind {
        self.cursor.advance();
        if self.cursor.peek() != Some('@') {
            return TokenKind::Lpar;
        }
        self.cursor.advance();
        let name = self.cursor.take_while(is_idchar);
        if name.is_empty() {
            TokenKind::Invalid("expected annotation name after `(@`")
        } else {
            TokenKind::LparAnn(name.to_string())
        }
    }

    /// Skip whitespace, line comments (`;; …`), and nested block comments
    /// (`(; … ;)`). Returns an `Invalid` token for an unterminated block
    /// comment.
    fn skip_whitespace_and_comments(&mut self) -> Option<Token> {
        loop {
            self.cursor.skip_while(|c| c.is_ascii_whitespace());
            match (self.cursor.peek(), self.cursor.peek_second()) {
                (Some(';'), Some(';')) => {
                    self.cursor.skip_while(|c| c != '\n');
                }
                (Some('('), Some(';')) => {
                    if let Some(invalid) = self.skip_block_comment() {
                        return Some(invalid);
                    }
                }
                _ => return None,
            }
        }
    }

    fn skip_block_comment(&mut self) -> Option<Token> {
        let start = self.cursor.position();
        self.cursor.advance(); // (
        self.cursor.advance(); // ;

        let mut depth = 1;
        while depth > 0 {
            match (self.cursor.peek(), self.cursor.peek_second()) {
                (None, _) => {
                    return Some(Token::new(
                        TokenKind::Invalid("unterminated block comment"),
                        start.span_to(&self.cursor.position()),
                    ));
                }
                (Some('('), Some(';')) => {
                    self.cursor.advance();
                    self.cursor.advance();
                    depth += 1;
                }
                (Some(';'), Some(')')) => {
                    self.cursor.advance();
                    self.cursor.advance();
                    depth -= 1;
                }
                _ => {
                    self.cursor.advance();
                }
            }
        }
        None
    }

    /// Lex a string literal, validating escapes and computing the decoded
    /// byte length as we go.
    fn lex_string(&mut self) -> TokenKind {
        let start = self.cursor.position();
        self.cursor.advance(); // opening quote

        let mut decoded_len = 0usize;
        let mut bad: Option<&'static str> = None;

        loop {
            match self.cursor.peek() {
                None => {
                    return TokenKind::Invalid("unterminated string literal");
                }
                Some('"') => {
                    self.cursor.advance();
                    break;
                }
                Some('\\') => {
                    self.cursor.advance();
                    match self.lex_escape() {
                        Ok(n) => decoded_len += n,
                        Err(msg) => bad = bad.or(Some(msg)),
                    }
                }
                Some(c) if (c as u32) < 0x20 || c == '\u{7f}' => {
                    // Raw control characters must be written as escapes
                    self.cursor.advance();
                    bad = bad.or(Some("unescaped control character in string literal"));
                }
                Some(c) => {
                    self.cursor.advance();
                    decoded_len += c.len_utf8();
                }
            }
        }

        match bad {
            Some(msg) => TokenKind::Invalid(msg),
            None => TokenKind::Text(Text {
                raw: self.cursor.slice_from(&start).to_string(),
                decoded_len,
            }),
        }
    }

    /// Validate one escape sequence (the backslash has been consumed) and
    /// return its decoded byte length.
    fn lex_escape(&mut self) -> Result<usize, &'static str> {
        match self.cursor.advance() {
            Some('t' | 'n' | 'r' | '"' | '\'' | '\\') => Ok(1),
            Some('u') => {
                if self.cursor.advance() != Some('{') {
                    return Err("expected `{` after `\\u`");
                }
                let digits = self.cursor.take_while(|c| c.is_ascii_hexdigit());
                if digits.is_empty() {
                    return Err("empty unicode escape");
                }
                let cp = u32::from_str_radix(digits, 16).map_err(|_| "unicode escape out of range")?;
                if self.cursor.advance() != Some('}') {
                    return Err("expected `}` in unicode escape");
                }
                match char::from_u32(cp) {
                    Some(c) => Ok(c.len_utf8()),
                    None => Err("invalid unicode code point"),
                }
            }
            Some(hi) if hi.is_ascii_hexdigit() => match self.cursor.peek() {
                Some(lo) if lo.is_ascii_hexdigit() => {
                    self.cursor.advance();
                    Ok(1)
                }
                _ => Err("expected two hex digits in byte escape"),
            },
            Some(_) => Err("invalid escape sequence"),
            None => Err("unterminated escape sequence"),
        }
    }
}

/// Classify a maximal idchar run against the keyword, value-type, opcode,
/// and numeric shapes. Anything unrecognised is `Reserved`.
fn classify(text: &str) -> TokenKind {
    if let Some(rest) = text.strip_prefix('$') {
        return if rest.is_empty() {
            TokenKind::Invalid("expected identifier after `$`")
        } else {
            TokenKind::Id(rest.to_string())
        };
    }
    if let Some(kw) = keywords::keyword(text) {
        return TokenKind::Keyword(kw);
    }
    if let Some(vt) = keywords::value_type(text) {
        return TokenKind::ValType(vt);
    }
    if let Some(op) = keywords::opcode(text) {
        return TokenKind::Instr(op);
    }
    if let Some(rest) = text.strip_prefix("offset=") {
        return if num::is_nat(rest) {
            TokenKind::OffsetEq(rest.to_string())
        } else {
            TokenKind::Reserved(text.to_string())
        };
    }
    if let Some(rest) = text.strip_prefix("align=") {
        return if num::is_nat(rest) {
            TokenKind::AlignEq(rest.to_string())
        } else {
            TokenKind::Reserved(text.to_string())
        };
    }
    if num::is_nat(text) {
        return TokenKind::Nat(text.to_string());
    }
    if num::is_int(text) {
        return TokenKind::Int(text.to_string());
    }
    if num::is_float(text) {
        return TokenKind::Float(text.to_string());
    }
    TokenKind::Reserved(text.to_string())
}

/// The idchar set of the text format: letters, digits, and a generous
/// helping of punctuation. See
/// <https://webassembly.github.io/spec/core/text/values.html#text-id>
fn is_idchar(c: char) -> bool {
    matches!(
        c,
        '0'..='9'
            | 'a'..='z'
            | 'A'..='Z'
            | '!'
            | '#'
            | '$'
            | '%'
            | '&'
            | '\''
            | '*'
            | '+'
            | '-'
            | '.'
            | '/'
            | ':'
            | '<'
            | '='
            | '>'
            | '?'
            | '@'
            | '\\'
            | '^'
            | '_'
            | '`'
            | '|'
            | '~'
    )
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The lexer must never panic and must always terminate with Eof.
        #[test]
        fn never_panics(source in "\\PC{0,400}") {
            let tokens = Lexer::tokenise(&source);
            prop_assert_eq!(&tokens.last().unwrap().kind, &TokenKind::Eof);
        }

        /// Token spans are within bounds and non-inverted.
        #[test]
        fn spans_are_valid(source in "\\PC{0,200}") {
            for token in Lexer::tokenise(&source) {
                prop_assert!(token.span.start <= token.span.end);
                prop_assert!(token.span.end <= source.len());
            }
        }

        /// Tokens do not overlap and appear in source order.
        #[test]
        fn tokens_do_not_overlap(source in "\\PC{0,200}") {
            let tokens = Lexer::tokenise(&source);
            for window in tokens.windows(2) {
                prop_assert!(window[0].span.end <= window[1].span.start);
            }
        }

        /// Line numbers never decrease.
        #[test]
        fn line_numbers_monotone(source in "[a-z0-9()\\n \"$]{0,200}") {
            let mut last = 0u32;
            for token in Lexer::tokenise(&source) {
                prop_assert!(token.span.line >= last);
                last = token.span.line;
            }
        }

        /// Keyword-shaped words always classify the same way as a direct
        /// table lookup.
        #[test]
        fn classification_matches_table(word in "[a-z][a-z0-9._]{0,18}") {
            let tokens = Lexer::tokenise(&word);
            match &tokens[0].kind {
                TokenKind::Keyword(_) => prop_assert!(super::super::keywords::keyword(&word).is_some()),
                TokenKind::Instr(op) => prop_assert_eq!(op.name, word.as_str()),
                _ => {}
            }
        }
    }
}
