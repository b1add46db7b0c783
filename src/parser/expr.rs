use crate::ast::{BinaryOp, CompareOp, Expression, TrailingUnit, Trigger, UnaryOp};
use crate::errors::Result;
use crate::token::{Keyword, TokenKind};

use super::Parser;

/// expression parsing, loosest binding first:
/// OR, AND, comparison (non-associative), + -, * / %, unary, primary
impl Parser {
    pub(crate) fn parse_expression(&mut self) -> Result<Expression> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut left = self.parse_and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            left = Expression::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut left = self.parse_comparison()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.parse_comparison()?;
            left = Expression::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    pub(crate) fn parse_comparison(&mut self) -> Result<Expression> {
        let left = self.parse_additive()?;
        let Some(op) = self.peek_compare_op() else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub(crate) fn peek_compare_op(&self) -> Option<CompareOp> {
        match self.peek().kind {
            TokenKind::Le => Some(CompareOp::Le),
            TokenKind::Ge => Some(CompareOp::Ge),
            TokenKind::Lt => Some(CompareOp::Lt),
            TokenKind::Gt => Some(CompareOp::Gt),
            TokenKind::Eq => Some(CompareOp::Eq),
            TokenKind::NotEq => Some(CompareOp::Ne),
            _ => None,
        }
    }

    pub(crate) fn parse_additive(&mut self) -> Result<Expression> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::PercentOp => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        if self.eat(&TokenKind::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        if self.eat_keyword(Keyword::Not) {
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        match self.peek().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expression::Number(n))
            }
            TokenKind::Currency(n) => {
                self.advance();
                Ok(Expression::Currency(n))
            }
            TokenKind::Percentage(p) => {
                self.advance();
                Ok(Expression::Percentage(p))
            }
            TokenKind::Ratio(r) => {
                self.advance();
                Ok(Expression::Ratio(r))
            }
            TokenKind::Date(d) => {
                self.advance();
                Ok(Expression::DateLiteral(d))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expression::Str(s))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Keyword(Keyword::Trailing) => self.parse_trailing(),
            TokenKind::Ident(name) => {
                self.advance();
                if self.check(&TokenKind::LParen) {
                    self.parse_call(name)
                } else {
                    Ok(Expression::Identifier(name))
                }
            }
            _ => Err(self.error_here(&format!(
                "expected expression, found {}",
                self.peek().describe()
            ))),
        }
    }

    /// `TRAILING n (QUARTERS|MONTHS|YEARS) OF expr`
    fn parse_trailing(&mut self) -> Result<Expression> {
        self.expect_keyword(Keyword::Trailing)?;
        let count = self.expect_u32()?;
        let unit = if self.eat_keyword(Keyword::Quarters) {
            TrailingUnit::Quarters
        } else if self.eat_keyword(Keyword::Months) {
            TrailingUnit::Months
        } else if self.eat_keyword(Keyword::Years) {
            TrailingUnit::Years
        } else {
            return Err(self.error_here("expected QUARTERS, MONTHS, or YEARS"));
        };
        self.expect_keyword(Keyword::Of)?;
        let expr = self.parse_unary()?;
        Ok(Expression::Trailing {
            count,
            unit,
            expr: Box::new(expr),
        })
    }

    fn parse_call(&mut self, name: String) -> Result<Expression> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            args.push(self.parse_expression()?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.parse_expression()?);
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(Expression::FunctionCall { name, args })
    }

    /// `ALL_OF(a, b)` / `ANY_OF(a, b)` / bare boolean expression
    pub(crate) fn parse_trigger(&mut self) -> Result<Trigger> {
        if self.eat_keyword(Keyword::AllOf) {
            self.expect(&TokenKind::LParen, "'('")?;
            let names = self.ident_list()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Trigger::AllOf(names));
        }
        if self.eat_keyword(Keyword::AnyOf) {
            self.expect(&TokenKind::LParen, "'('")?;
            let names = self.ident_list()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(Trigger::AnyOf(names));
        }
        Ok(Trigger::Expr(self.parse_expression()?))
    }

    /// AND-separated comparison-level conditions, kept as separate
    /// expressions so each can be reported as its own reasoning step
    pub(crate) fn parse_condition_list(&mut self) -> Result<Vec<Expression>> {
        let mut conditions = vec![self.parse_comparison()?];
        while self.eat_keyword(Keyword::And) {
            conditions.push(self.parse_comparison()?);
        }
        Ok(conditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use rust_decimal_macros::dec;

    fn expr_of(source: &str) -> Expression {
        // wrap in a definition to reuse the statement parser
        let program = parse(&format!("DEFINE Probe = {}", source)).unwrap();
        match &program.statements[0].node {
            crate::ast::StatementNode::Define(d) => d.expr.clone(),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let e = expr_of("1 + 2 * 3");
        match e {
            Expression::Binary { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(*right, Expression::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_comparison_binds_tighter_than_and() {
        let e = expr_of("Leverage <= 5.00 AND DSCR >= 1.20");
        match e {
            Expression::Binary { op: BinaryOp::And, left, right } => {
                assert!(left.is_comparison());
                assert!(right.is_comparison());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_function_call() {
        let e = expr_of("GreaterOf($25_000_000, 10% * EBITDA)");
        match e {
            Expression::FunctionCall { name, args } => {
                assert_eq!(name, "GreaterOf");
                assert_eq!(args.len(), 2);
                assert_eq!(args[0], Expression::Currency(dec!(25000000)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_trailing_expression() {
        let e = expr_of("TRAILING 4 QUARTERS OF EBITDA");
        match e {
            Expression::Trailing { count, unit, expr } => {
                assert_eq!(count, 4);
                assert_eq!(unit, TrailingUnit::Quarters);
                assert_eq!(*expr, Expression::ident("EBITDA"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parenthesized_grouping() {
        let e = expr_of("(TotalDebt - Cash) / EBITDA");
        assert!(matches!(e, Expression::Binary { op: BinaryOp::Div, .. }));
    }
}
