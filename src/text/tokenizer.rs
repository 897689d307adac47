//! Lookahead window over the lexer.
//!
//! The reader needs at most two tokens of lookahead: one to dispatch on, and
//! a second to recognise the `( keyword` pair that opens most productions.
//! Tokens are materialised lazily; annotations collected while skipping are
//! kept on a side channel until something asks for them.

use super::lexer::Lexer;
use super::token::{Kw, Span, Token, TokenKind};

pub struct Tokenizer<'a> {
    lexer: Lexer<'a>,
    /// Two-slot circular lookahead buffer.
    lookahead: [Option<Token>; 2],
    current: usize,
    count: usize,
    previous: Token,
    annots: Vec<Vec<Token>>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
            lookahead: [None, None],
            current: 0,
            count: 0,
            previous: Token::new(TokenKind::Eof, Span::ZERO),
            annots: Vec::new(),
        }
    }

    fn fill(&mut self) -> Token {
        let (token, annots) = self.lexer.lex_no_whitespace_collect_annots();
        self.annots.extend(annots);
        token
    }

    /// Peek at the token `at` positions ahead, where `at` is 0 or 1.
    pub fn peek(&mut self, at: usize) -> &Token {
        debug_assert!(at < 2);
        while self.count <= at {
            let token = self.fill();
            let slot = (self.current + self.count) % 2;
            self.lookahead[slot] = Some(token);
            self.count += 1;
        }
        self.lookahead[(self.current + at) % 2].as_ref().unwrap()
    }

    /// Return the current token and advance.
    pub fn read(&mut self) -> Token {
        let token = if self.count == 0 {
            self.fill()
        } else {
            let token = self.lookahead[self.current].take().unwrap();
            self.current = (self.current + 1) % 2;
            self.count -= 1;
            token
        };
        self.previous = token.clone();
        token
    }

    /// The most recently read token, for diagnostic locations.
    pub fn previous(&self) -> &Token {
        &self.previous
    }

    /// Read and return the current token iff its kind equals `kind`.
    pub fn match_token(&mut self, kind: &TokenKind) -> Option<Token> {
        if &self.peek(0).kind == kind {
            Some(self.read())
        } else {
            None
        }
    }

    /// Read and return the keyword token iff the current token is `kw`.
    pub fn match_kw(&mut self, kw: Kw) -> Option<Token> {
        self.match_token(&TokenKind::Keyword(kw))
    }

    /// Atomically accept `(` followed by the given keyword, returning the
    /// keyword token. Neither token is consumed on a mismatch.
    pub fn match_lpar(&mut self, kw: Kw) -> Option<Token> {
        if self.peek(0).kind == TokenKind::Lpar && self.peek(1).kind == TokenKind::Keyword(kw) {
            self.read();
            Some(self.read())
        } else {
            None
        }
    }

    /// True when the next two tokens are `(` and the given keyword.
    pub fn peek_lpar(&mut self, kw: Kw) -> bool {
        self.peek(0).kind == TokenKind::Lpar && self.peek(1).kind == TokenKind::Keyword(kw)
    }

    /// All annotations collected so far, in source order.
    pub fn annotations(&mut self) -> &mut Vec<Vec<Token>> {
        &mut self.annots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_advances() {
        let mut t = Tokenizer::new("(module)");
        assert_eq!(t.read().kind, TokenKind::Lpar);
        assert_eq!(t.read().kind, TokenKind::Keyword(Kw::Module));
        assert_eq!(t.read().kind, TokenKind::Rpar);
        assert_eq!(t.read().kind, TokenKind::Eof);
        // Reading past the end keeps returning Eof
        assert_eq!(t.read().kind, TokenKind::Eof);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut t = Tokenizer::new("(module)");
        assert_eq!(t.peek(0).kind, TokenKind::Lpar);
        assert_eq!(t.peek(1).kind, TokenKind::Keyword(Kw::Module));
        assert_eq!(t.peek(0).kind, TokenKind::Lpar);
        assert_eq!(t.read().kind, TokenKind::Lpar);
        assert_eq!(t.peek(0).kind, TokenKind::Keyword(Kw::Module));
    }

    #[test]
    fn previous_tracks_last_read() {
        let mut t = Tokenizer::new("(module)");
        assert_eq!(t.previous().kind, TokenKind::Eof);
        t.read();
        assert_eq!(t.previous().kind, TokenKind::Lpar);
        t.read();
        assert_eq!(t.previous().kind, TokenKind::Keyword(Kw::Module));
    }

    #[test]
    fn match_token_consumes_on_hit() {
        let mut t = Tokenizer::new(") (");
        assert!(t.match_token(&TokenKind::Lpar).is_none());
        assert!(t.match_token(&TokenKind::Rpar).is_some());
        assert!(t.match_token(&TokenKind::Lpar).is_some());
    }

    #[test]
    fn match_lpar_is_atomic() {
        let mut t = Tokenizer::new("(func)");
        // A failed match must not consume the `(`
        assert!(t.match_lpar(Kw::Module).is_none());
        assert_eq!(t.peek(0).kind, TokenKind::Lpar);
        let kw = t.match_lpar(Kw::Func).unwrap();
        assert_eq!(kw.kind, TokenKind::Keyword(Kw::Func));
        assert_eq!(t.peek(0).kind, TokenKind::Rpar);
    }

    #[test]
    fn interleaved_peek_and_read() {
        let mut t = Tokenizer::new("1 2 3 4");
        assert_eq!(t.peek(1).kind, TokenKind::Nat("2".into()));
        assert_eq!(t.read().kind, TokenKind::Nat("1".into()));
        assert_eq!(t.peek(1).kind, TokenKind::Nat("3".into()));
        assert_eq!(t.read().kind, TokenKind::Nat("2".into()));
        assert_eq!(t.read().kind, TokenKind::Nat("3".into()));
        assert_eq!(t.peek(0).kind, TokenKind::Nat("4".into()));
        assert_eq!(t.read().kind, TokenKind::Nat("4".into()));
        assert_eq!(t.read().kind, TokenKind::Eof);
    }

    #[test]
    fn annotations_surface_on_side_channel() {
        let mut t = Tokenizer::new("(@custom \"s\") (module (@note x))");
        while t.read().kind != TokenKind::Eof {}
        let annots = t.annotations();
        assert_eq!(annots.len(), 2);
        assert_eq!(annots[0][0].kind, TokenKind::LparAnn("custom".into()));
        assert_eq!(annots[1][0].kind, TokenKind::LparAnn("note".into()));
    }
}
