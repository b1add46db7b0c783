use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::errors::{ProVisoError, Result};

use super::eval::EvalCtx;
use super::Interpreter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningStep {
    pub rule: String,
    pub passed: bool,
}

/// outcome of a may-the-borrower-do-X query, with its reasoning trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProhibitionResult {
    pub action: String,
    pub permitted: bool,
    pub reasoning: Vec<ReasoningStep>,
    pub warnings: Vec<String>,
}

impl Interpreter {
    /// test an action against its PROHIBIT rule; `amount` is bound as a
    /// scoped temporary for the exception conditions
    pub fn check_prohibition(
        &self,
        action: &str,
        amount: Option<Decimal>,
    ) -> Result<ProhibitionResult> {
        let mut bindings = BTreeMap::new();
        if let Some(amount) = amount {
            bindings.insert("amount".to_string(), amount);
        }
        let ctx = EvalCtx {
            period: None,
            bindings: Some(&bindings),
        };

        let Some(prohibition) = self.symbols.prohibitions.get(action) else {
            return Ok(ProhibitionResult {
                action: action.to_string(),
                permitted: true,
                reasoning: vec![ReasoningStep {
                    rule: format!("No prohibition registered for {}", action),
                    passed: true,
                }],
                warnings: Vec::new(),
            });
        };

        let mut reasoning = vec![ReasoningStep {
            rule: format!("Prohibit {}", action),
            passed: false,
        }];

        for exception in &prohibition.exceptions {
            let mut all_passed = true;
            for condition in &exception.conditions {
                let passed = match self.eval_bool(condition, ctx) {
                    Ok(passed) => passed,
                    // an unresolvable reference reads as a failed test,
                    // not a fatal query
                    Err(ProVisoError::UndefinedIdentifier { .. }) => false,
                    Err(other) => return Err(other),
                };
                reasoning.push(ReasoningStep {
                    rule: condition.to_string(),
                    passed,
                });
                all_passed &= passed;
            }
            if all_passed {
                return Ok(ProhibitionResult {
                    action: action.to_string(),
                    permitted: true,
                    reasoning,
                    warnings: Vec::new(),
                });
            }
        }

        Ok(ProhibitionResult {
            action: action.to_string(),
            permitted: false,
            reasoning,
            warnings: vec!["All exception conditions must be satisfied".to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;
    use rust_decimal_macros::dec;

    const SOURCE: &str = "\
        DEFINE Leverage = TotalDebt / EBITDA\n\
        PROHIBIT AssetSales\n\
          EXCEPT WHEN amount <= $10_000_000 AND Leverage <= 4.50\n\
          EXCEPT WHEN Leverage <= 3.00";

    fn interp(json: &str) -> Interpreter {
        let mut i = Interpreter::new(parse(SOURCE).unwrap()).unwrap();
        i.load_financials_json(json).unwrap();
        i
    }

    #[test]
    fn test_permitted_within_exception() {
        let i = interp(r#"{"TotalDebt": 160000000, "EBITDA": 40000000}"#);
        let result = i
            .check_prohibition("AssetSales", Some(dec!(5000000)))
            .unwrap();
        assert!(result.permitted);
        assert!(result.warnings.is_empty());
        // denial reason plus both conditions of the first exception
        assert_eq!(result.reasoning.len(), 3);
        assert!(result.reasoning[1].passed);
        assert!(result.reasoning[2].passed);
    }

    #[test]
    fn test_denied_when_all_exceptions_fail() {
        let i = interp(r#"{"TotalDebt": 200000000, "EBITDA": 40000000}"#);
        let result = i
            .check_prohibition("AssetSales", Some(dec!(50000000)))
            .unwrap();
        assert!(!result.permitted);
        assert_eq!(
            result.warnings,
            vec!["All exception conditions must be satisfied".to_string()]
        );
        // every exception's conditions were traced
        assert!(result.reasoning.len() > 3);
    }

    #[test]
    fn test_unregistered_action_is_permitted() {
        let i = interp(r#"{"TotalDebt": 1, "EBITDA": 1}"#);
        let result = i.check_prohibition("Dividends", None).unwrap();
        assert!(result.permitted);
        assert!(result.reasoning[0].rule.contains("No prohibition"));
    }

    #[test]
    fn test_amount_binding_is_scoped() {
        let i = interp(r#"{"TotalDebt": 160000000, "EBITDA": 40000000}"#);
        i.check_prohibition("AssetSales", Some(dec!(5000000)))
            .unwrap();
        // the binding does not leak into later evaluation
        let err = i
            .evaluate(&crate::ast::Expression::ident("amount"))
            .unwrap_err();
        assert!(matches!(err, ProVisoError::UndefinedIdentifier { .. }));
    }
}
