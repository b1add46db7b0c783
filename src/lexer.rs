use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::errors::{ProVisoError, Result};
use crate::token::{Keyword, Span, Token, TokenKind};

/// hand-written scanner for agreement source text
///
/// Keywords are case-sensitive uppercase; any other word matching
/// `[A-Za-z_][A-Za-z0-9_]*` is an identifier. `//` comments run to end
/// of line. A bare `YYYY-MM-DD` digit sequence always lexes as a date
/// literal, so subtraction of numeric literals needs whitespace.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// tokenize the whole input, appending a final Eof token
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia();

        let start = self.pos;
        let line = self.line;
        let column = self.column;

        let Some(&b) = self.bytes.get(self.pos) else {
            return Ok(Token::new(TokenKind::Eof, Span::new(start, start), line, column));
        };

        let kind = match b {
            b'0'..=b'9' => return self.scan_number(start, line, column),
            b'$' => return self.scan_currency(start, line, column),
            b'"' => return self.scan_string(start, line, column),
            b'A'..=b'Z' | b'a'..=b'z' | b'_' => return self.scan_word(start, line, column),
            b'+' => {
                self.advance(1);
                TokenKind::Plus
            }
            b'-' => {
                self.advance(1);
                TokenKind::Minus
            }
            b'*' => {
                self.advance(1);
                TokenKind::Star
            }
            b'/' => {
                self.advance(1);
                TokenKind::Slash
            }
            b'%' => {
                self.advance(1);
                TokenKind::PercentOp
            }
            b'(' => {
                self.advance(1);
                TokenKind::LParen
            }
            b')' => {
                self.advance(1);
                TokenKind::RParen
            }
            b',' => {
                self.advance(1);
                TokenKind::Comma
            }
            b'=' => {
                self.advance(1);
                TokenKind::Eq
            }
            b'!' => {
                if self.bytes.get(self.pos + 1) == Some(&b'=') {
                    self.advance(2);
                    TokenKind::NotEq
                } else {
                    return Err(self.error("unexpected character '!'", start, start + 1, line, column));
                }
            }
            b'<' => {
                if self.bytes.get(self.pos + 1) == Some(&b'=') {
                    self.advance(2);
                    TokenKind::Le
                } else {
                    self.advance(1);
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.bytes.get(self.pos + 1) == Some(&b'=') {
                    self.advance(2);
                    TokenKind::Ge
                } else {
                    self.advance(1);
                    TokenKind::Gt
                }
            }
            other => {
                return Err(self.error(
                    &format!("unexpected character '{}'", other as char),
                    start,
                    start + 1,
                    line,
                    column,
                ));
            }
        };

        Ok(Token::new(kind, Span::new(start, self.pos), line, column))
    }

    /// skip whitespace and `//` comments
    fn skip_trivia(&mut self) {
        loop {
            match self.bytes.get(self.pos) {
                Some(b' ') | Some(b'\t') | Some(b'\r') => self.advance(1),
                Some(b'\n') => {
                    self.pos += 1;
                    self.line += 1;
                    self.column = 1;
                }
                Some(b'/') if self.bytes.get(self.pos + 1) == Some(&b'/') => {
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.advance(1);
                    }
                }
                _ => break,
            }
        }
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
        self.column += n;
    }

    fn error(
        &self,
        message: &str,
        offset_start: usize,
        offset_end: usize,
        line: usize,
        column: usize,
    ) -> ProVisoError {
        ProVisoError::Syntax {
            message: message.to_string(),
            line,
            column,
            offset_start,
            offset_end,
        }
    }

    fn is_ident_byte(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_'
    }

    /// true if the bytes at `pos` spell `YYYY-MM-DD` with a clean boundary
    fn date_ahead(&self, pos: usize) -> bool {
        let b = self.bytes;
        if pos + 10 > b.len() {
            return false;
        }
        let digits = |range: std::ops::Range<usize>| range.into_iter().all(|i| b[i].is_ascii_digit());
        if !(digits(pos..pos + 4) && b[pos + 4] == b'-' && digits(pos + 5..pos + 7)
            && b[pos + 7] == b'-' && digits(pos + 8..pos + 10))
        {
            return false;
        }
        match b.get(pos + 10) {
            Some(&next) => !Self::is_ident_byte(next),
            None => true,
        }
    }

    fn scan_number(&mut self, start: usize, line: usize, column: usize) -> Result<Token> {
        if self.date_ahead(self.pos) {
            let text = &self.source[self.pos..self.pos + 10];
            let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
                self.error(&format!("invalid date literal {}", text), start, start + 10, line, column)
            })?;
            self.advance(10);
            return Ok(Token::new(TokenKind::Date(date), Span::new(start, self.pos), line, column));
        }

        let digits = self.scan_digits(start, line, column)?;

        // suffix decides percentage / ratio
        match self.bytes.get(self.pos) {
            Some(b'%') => {
                self.advance(1);
                Ok(Token::new(
                    TokenKind::Percentage(digits),
                    Span::new(start, self.pos),
                    line,
                    column,
                ))
            }
            Some(b'x')
                if self
                    .bytes
                    .get(self.pos + 1)
                    .map_or(true, |&b| !Self::is_ident_byte(b)) =>
            {
                self.advance(1);
                Ok(Token::new(
                    TokenKind::Ratio(digits),
                    Span::new(start, self.pos),
                    line,
                    column,
                ))
            }
            _ => Ok(Token::new(
                TokenKind::Number(digits),
                Span::new(start, self.pos),
                line,
                column,
            )),
        }
    }

    fn scan_currency(&mut self, start: usize, line: usize, column: usize) -> Result<Token> {
        self.advance(1); // consume '$'
        if !matches!(self.bytes.get(self.pos), Some(b) if b.is_ascii_digit()) {
            return Err(self.error("expected digits after '$'", start, self.pos, line, column));
        }
        let amount = self.scan_digits(start, line, column)?;
        Ok(Token::new(
            TokenKind::Currency(amount),
            Span::new(start, self.pos),
            line,
            column,
        ))
    }

    /// scan `[0-9_]+(\.[0-9_]+)?` into a decimal, underscores stripped
    fn scan_digits(&mut self, start: usize, line: usize, column: usize) -> Result<Decimal> {
        let mut text = String::new();
        while let Some(&b) = self.bytes.get(self.pos) {
            match b {
                b'0'..=b'9' => {
                    text.push(b as char);
                    self.advance(1);
                }
                b'_' => self.advance(1),
                _ => break,
            }
        }
        if self.bytes.get(self.pos) == Some(&b'.')
            && matches!(self.bytes.get(self.pos + 1), Some(b) if b.is_ascii_digit())
        {
            text.push('.');
            self.advance(1);
            while let Some(&b) = self.bytes.get(self.pos) {
                match b {
                    b'0'..=b'9' => {
                        text.push(b as char);
                        self.advance(1);
                    }
                    b'_' => self.advance(1),
                    _ => break,
                }
            }
        }
        Decimal::from_str(&text).map_err(|_| {
            self.error(&format!("invalid numeric literal {}", text), start, self.pos, line, column)
        })
    }

    fn scan_string(&mut self, start: usize, line: usize, column: usize) -> Result<Token> {
        self.advance(1); // consume opening quote
        let mut text = String::new();
        loop {
            match self.bytes.get(self.pos) {
                None | Some(b'\n') => {
                    return Err(self.error("unterminated string literal", start, self.pos, line, column));
                }
                Some(b'"') => {
                    self.advance(1);
                    break;
                }
                Some(b'\\') => {
                    let escaped = match self.bytes.get(self.pos + 1) {
                        Some(b'"') => '"',
                        Some(b'\\') => '\\',
                        Some(b'n') => '\n',
                        Some(b't') => '\t',
                        _ => {
                            return Err(self.error(
                                "invalid escape sequence",
                                self.pos,
                                self.pos + 2,
                                line,
                                column,
                            ));
                        }
                    };
                    text.push(escaped);
                    self.advance(2);
                }
                Some(_) => {
                    // strings are utf-8; copy the full char
                    let ch = self.source[self.pos..].chars().next().unwrap_or('\u{fffd}');
                    text.push(ch);
                    self.advance(ch.len_utf8());
                }
            }
        }
        Ok(Token::new(TokenKind::Str(text), Span::new(start, self.pos), line, column))
    }

    fn scan_word(&mut self, start: usize, line: usize, column: usize) -> Result<Token> {
        while matches!(self.bytes.get(self.pos), Some(&b) if Self::is_ident_byte(b)) {
            self.advance(1);
        }
        let word = &self.source[start..self.pos];
        let kind = match Keyword::lookup(word) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(word.to_string()),
        };
        Ok(Token::new(kind, Span::new(start, self.pos), line, column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_covenant_statement() {
        let toks = kinds("COVENANT MaxLeverage REQUIRES Leverage <= 5.00");
        assert_eq!(
            toks,
            vec![
                TokenKind::Keyword(Keyword::Covenant),
                TokenKind::Ident("MaxLeverage".to_string()),
                TokenKind::Keyword(Keyword::Requires),
                TokenKind::Ident("Leverage".to_string()),
                TokenKind::Le,
                TokenKind::Number(dec!(5.00)),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_currency_with_separators() {
        let toks = kinds("$20_000_000.50");
        assert_eq!(toks[0], TokenKind::Currency(dec!(20000000.50)));
    }

    #[test]
    fn test_percentage_and_ratio() {
        let toks = kinds("12.5% 3.25x");
        assert_eq!(toks[0], TokenKind::Percentage(dec!(12.5)));
        assert_eq!(toks[1], TokenKind::Ratio(dec!(3.25)));
    }

    #[test]
    fn test_modulo_is_distinct_from_percentage() {
        let toks = kinds("Total % Buckets");
        assert_eq!(toks[1], TokenKind::PercentOp);
    }

    #[test]
    fn test_date_literal() {
        let toks = kinds("UNTIL 2025-12-31");
        assert_eq!(
            toks[1],
            TokenKind::Date(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap())
        );
    }

    #[test]
    fn test_uppercase_identifier_is_not_keyword() {
        let toks = kinds("EBITDA DSRA");
        assert_eq!(toks[0], TokenKind::Ident("EBITDA".to_string()));
        assert_eq!(toks[1], TokenKind::Ident("DSRA".to_string()));
    }

    #[test]
    fn test_comment_skipped() {
        let toks = kinds("DEFINE X = 1 // trailing note\nEVENT COD");
        assert!(toks.contains(&TokenKind::Keyword(Keyword::Event)));
        assert!(!toks.iter().any(|t| matches!(t, TokenKind::Ident(s) if s == "trailing")));
    }

    #[test]
    fn test_string_escapes() {
        let toks = kinds(r#""say \"when\"""#);
        assert_eq!(toks[0], TokenKind::Str("say \"when\"".to_string()));
    }

    #[test]
    fn test_unterminated_string_reports_location() {
        let err = Lexer::new("BREACH \"oops").tokenize().unwrap_err();
        match err {
            ProVisoError::Syntax { line, column, .. } => {
                assert_eq!(line, 1);
                assert_eq!(column, 8);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
