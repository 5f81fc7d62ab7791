//! Recursive-descent parser for `.foo` sources
//!
//! ```text
//! module := (var | def)*
//! var    := 'var' IDENT ';'
//! def    := 'def' IDENT '(' (IDENT (',' IDENT)*)? ')' '{' ... '}'
//! ```
//!
//! Parsing recovers from errors by skipping to the next `var` or `def`
//! keyword, so a module always holds every well-formed declaration.

use grove_core::TextRange;
use serde::Serialize;

use crate::lexer::{Token, TokenKind, tokenize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VarDecl {
    pub name: String,
    pub full_range: TextRange,
    pub name_range: TextRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefDecl {
    pub name: String,
    pub params: Vec<String>,
    pub full_range: TextRange,
    pub name_range: TextRange,
}

/// Syntax errors found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("expected {expected} at offset {offset}, found '{found}'")]
    Unexpected {
        expected: &'static str,
        found: String,
        offset: usize,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: &'static str },

    #[error("body of def '{name}' at offset {offset} is never closed")]
    UnclosedBody { name: String, offset: usize },
}

/// Declarations of one source file, in source order per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Module {
    pub vars: Vec<VarDecl>,
    pub defs: Vec<DefDecl>,
    #[serde(skip)]
    pub errors: Vec<ParseError>,
}

impl Module {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub fn parse(source: &str) -> Module {
    Parser {
        tokens: tokenize(source),
        pos: 0,
    }
    .module()
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn module(mut self) -> Module {
        let mut module = Module::default();
        while let Some(token) = self.peek() {
            let result = match token.kind {
                TokenKind::Var => self.var().map(|var| module.vars.push(var)),
                TokenKind::Def => self.def().map(|def| module.defs.push(def)),
                _ => Err(unexpected("'var' or 'def'", token)),
            };
            if let Err(err) = result {
                module.errors.push(err);
                self.recover();
            }
        }
        module
    }

    fn var(&mut self) -> Result<VarDecl, ParseError> {
        let keyword = self.expect(TokenKind::Var, "'var'")?;
        let name = self.expect(TokenKind::Ident, "a variable name")?;
        let end = self.expect(TokenKind::Semicolon, "';'")?;
        Ok(VarDecl {
            name: name.text.to_string(),
            full_range: span(&keyword, &end),
            name_range: TextRange::new(name.offset, name.text.len()),
        })
    }

    fn def(&mut self) -> Result<DefDecl, ParseError> {
        let keyword = self.expect(TokenKind::Def, "'def'")?;
        let name = self.expect(TokenKind::Ident, "a definition name")?;
        self.expect(TokenKind::LParen, "'('")?;

        let mut params = Vec::new();
        if self.peek().is_some_and(|t| t.kind == TokenKind::Ident) {
            params.push(self.expect(TokenKind::Ident, "a parameter name")?.text.to_string());
            while self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                self.pos += 1;
                params.push(self.expect(TokenKind::Ident, "a parameter name")?.text.to_string());
            }
        }
        self.expect(TokenKind::RParen, "')' or ','")?;
        self.expect(TokenKind::LBrace, "'{'")?;

        let mut depth = 1;
        let end = loop {
            let Some(token) = self.next() else {
                return Err(ParseError::UnclosedBody {
                    name: name.text.to_string(),
                    offset: keyword.offset,
                });
            };
            match token.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        break token;
                    }
                }
                _ => {}
            }
        };

        Ok(DefDecl {
            name: name.text.to_string(),
            params,
            full_range: span(&keyword, &end),
            name_range: TextRange::new(name.offset, name.text.len()),
        })
    }

    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).cloned()
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<Token<'a>, ParseError> {
        match self.peek() {
            Some(token) if token.kind == kind => {
                self.pos += 1;
                Ok(token)
            }
            Some(token) => Err(unexpected(expected, token)),
            None => Err(ParseError::UnexpectedEof { expected }),
        }
    }

    /// Skips at least one token, then up to the next declaration keyword.
    fn recover(&mut self) {
        self.pos += 1;
        while self
            .peek()
            .is_some_and(|t| !matches!(t.kind, TokenKind::Var | TokenKind::Def))
        {
            self.pos += 1;
        }
    }
}

fn unexpected(expected: &'static str, token: Token<'_>) -> ParseError {
    ParseError::Unexpected {
        expected,
        found: token.text.to_string(),
        offset: token.offset,
    }
}

fn span(first: &Token<'_>, last: &Token<'_>) -> TextRange {
    TextRange::new(first.offset, last.end() - first.offset)
}
