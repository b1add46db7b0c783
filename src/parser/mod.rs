mod expr;
mod stmt;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;

use crate::ast::Program;
use crate::errors::{ProVisoError, Result};
use crate::lexer::Lexer;
use crate::token::{Keyword, Token, TokenKind};

/// parse agreement source into a program
///
/// Deterministic: the same input yields the same AST. The first failure
/// aborts the parse with a located syntax error.
pub fn parse(source: &str) -> Result<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse_program(&mut self) -> Result<Program> {
        let mut statements = Vec::new();
        while !self.at_eof() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    // ------------------------------------------------------------------
    // token plumbing
    // ------------------------------------------------------------------

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek_ahead(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    pub(crate) fn check_keyword(&self, kw: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(kw)
    }

    /// consume the token if it matches
    pub(crate) fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_keyword(&mut self, kw: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(kw))
    }

    pub(crate) fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(&format!("expected {}, found {}", what, self.peek().describe())))
        }
    }

    pub(crate) fn expect_keyword(&mut self, kw: Keyword) -> Result<Token> {
        self.expect(&TokenKind::Keyword(kw), &format!("keyword {:?}", kw))
    }

    pub(crate) fn expect_ident(&mut self) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here(&format!(
                "expected identifier, found {}",
                self.peek().describe()
            ))),
        }
    }

    pub(crate) fn expect_string(&mut self) -> Result<String> {
        match &self.peek().kind {
            TokenKind::Str(text) => {
                let text = text.clone();
                self.advance();
                Ok(text)
            }
            _ => Err(self.error_here(&format!("expected string, found {}", self.peek().describe()))),
        }
    }

    pub(crate) fn expect_date(&mut self) -> Result<NaiveDate> {
        match self.peek().kind {
            TokenKind::Date(date) => {
                self.advance();
                Ok(date)
            }
            _ => Err(self.error_here(&format!("expected date, found {}", self.peek().describe()))),
        }
    }

    /// expect a bare non-negative integer literal
    pub(crate) fn expect_u32(&mut self) -> Result<u32> {
        match self.peek().kind {
            TokenKind::Number(n) => match n.to_u32() {
                Some(v) if n.fract().is_zero() => {
                    self.advance();
                    Ok(v)
                }
                _ => Err(self.error_here(&format!("expected whole number, found {}", n))),
            },
            _ => Err(self.error_here(&format!(
                "expected number, found {}",
                self.peek().describe()
            ))),
        }
    }

    /// `ident ("," ident)*`
    pub(crate) fn ident_list(&mut self) -> Result<Vec<String>> {
        let mut names = vec![self.expect_ident()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_ident()?);
        }
        Ok(names)
    }

    pub(crate) fn error_here(&self, message: &str) -> ProVisoError {
        let token = self.peek();
        ProVisoError::Syntax {
            message: message.to_string(),
            line: token.line,
            column: token.column,
            offset_start: token.span.start,
            offset_end: token.span.end,
        }
    }
}
