use chrono::NaiveDate;
use serde::Serialize;

use crate::ast::{CompareOp, Covenant, Expression, TestFrequency, ThresholdStep};
use crate::errors::{ProVisoError, Result};
use crate::value::Value;

use super::eval::{bool_value, compare_values, EvalCtx};
use super::Interpreter;

/// outcome of testing one covenant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CovenantResult {
    pub name: String,
    pub compliant: bool,
    pub actual: Value,
    pub threshold: Value,
    pub operator: CompareOp,
    /// distance to the threshold; negative when in breach. Only defined
    /// for `<=` and `>=` tests.
    pub headroom: Option<Value>,
    pub tested: Option<TestFrequency>,
}

/// covenant results for one reporting period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodCompliance {
    pub period: String,
    pub period_end: NaiveDate,
    pub all_compliant: bool,
    pub results: Vec<CovenantResult>,
}

impl Interpreter {
    pub fn check_covenant(&self, name: &str) -> Result<CovenantResult> {
        self.check_covenant_ctx(name, EvalCtx::default())
    }

    pub(crate) fn check_covenant_ctx(
        &self,
        name: &str,
        ctx: EvalCtx<'_>,
    ) -> Result<CovenantResult> {
        let covenant = self.symbols.covenants.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "covenant",
                name: name.to_string(),
            }
        })?;
        self.test_requirement(covenant, ctx)
    }

    fn test_requirement(&self, covenant: &Covenant, ctx: EvalCtx<'_>) -> Result<CovenantResult> {
        let (op, left, threshold_expr) = match self.effective_comparison(covenant) {
            Some(parts) => parts,
            None => {
                // non-comparison requirement: a plain boolean condition
                let compliant = self.eval_bool(&covenant.requires, ctx)?;
                return Ok(CovenantResult {
                    name: covenant.name.clone(),
                    compliant,
                    actual: bool_value(compliant),
                    threshold: Value::ONE,
                    operator: CompareOp::Eq,
                    headroom: None,
                    tested: covenant.tested,
                });
            }
        };

        let actual = self.eval_expr(left, ctx)?;
        let threshold = self.eval_expr(threshold_expr, ctx)?;
        let compliant = compare_values(op, actual, threshold);
        let headroom = match op {
            CompareOp::Le => Some(threshold - actual),
            CompareOp::Ge => Some(actual - threshold),
            _ => None,
        };
        Ok(CovenantResult {
            name: covenant.name.clone(),
            compliant,
            actual,
            threshold,
            operator: op,
            headroom,
            tested: covenant.tested,
        })
    }

    /// the comparison in force today: the active schedule step when the
    /// requirement is stepped, otherwise the requirement itself
    fn effective_comparison<'c>(
        &self,
        covenant: &'c Covenant,
    ) -> Option<(CompareOp, &'c Expression, &'c Expression)> {
        let Expression::Comparison { op, left, right } = &covenant.requires else {
            return None;
        };
        if covenant.schedule.is_empty() {
            return Some((*op, left.as_ref(), right.as_ref()));
        }
        let step = self.active_step(&covenant.schedule);
        Some((step.op, left.as_ref(), &step.threshold))
    }

    fn active_step<'c>(&self, schedule: &'c [ThresholdStep]) -> &'c ThresholdStep {
        let today = self.today();
        schedule
            .iter()
            .find(|step| step.until.map_or(true, |until| today <= until))
            .unwrap_or_else(|| &schedule[schedule.len() - 1])
    }

    /// every covenant, declaration-name order
    pub fn check_all_covenants(&self) -> Result<Vec<CovenantResult>> {
        self.symbols
            .covenants
            .keys()
            .map(|name| self.check_covenant(name))
            .collect()
    }

    /// covenants active in the current phase, plus the phase's required
    /// covenants
    pub fn check_active_covenants(&self) -> Result<Vec<CovenantResult>> {
        let mut results = Vec::new();
        for name in self.symbols.covenants.keys() {
            if self.is_covenant_active(name) {
                results.push(self.check_covenant(name)?);
            }
        }
        if let Some(phase) = self.current_phase_decl() {
            for name in &phase.required_covenants {
                if results.iter().any(|r| &r.name == name) {
                    continue;
                }
                if self.symbols.covenants.contains_key(name) {
                    results.push(self.check_covenant(name)?);
                }
            }
        }
        Ok(results)
    }

    /// every covenant evaluated against every loaded period, in
    /// chronological order
    pub fn compliance_history(&self) -> Result<Vec<PeriodCompliance>> {
        let mut history = Vec::new();
        for period in self.state.finance.periods() {
            let ctx = EvalCtx {
                period: Some(&period.period),
                bindings: None,
            };
            let results: Result<Vec<CovenantResult>> = self
                .symbols
                .covenants
                .keys()
                .map(|name| self.check_covenant_ctx(name, ctx))
                .collect();
            let results = results?;
            history.push(PeriodCompliance {
                period: period.period.clone(),
                period_end: period.period_end,
                all_compliant: results.iter().all(|r| r.compliant),
                results,
            });
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;
    use chrono::{TimeZone, Utc};
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use rust_decimal_macros::dec;

    fn interp(source: &str, json: &str) -> Interpreter {
        let mut i = Interpreter::new(parse(source).unwrap()).unwrap();
        i.load_financials_json(json).unwrap();
        i
    }

    #[test]
    fn test_leverage_breach() {
        let i = interp(
            "DEFINE Leverage = TotalDebt / EBITDA\n\
             COVENANT MaxLeverage REQUIRES Leverage <= 5.00 TESTED QUARTERLY",
            r#"{"TotalDebt": 200000000, "EBITDA": 36000000}"#,
        );
        let result = i.check_covenant("MaxLeverage").unwrap();
        assert!(!result.compliant);
        assert_eq!(result.operator, CompareOp::Le);
        assert_eq!(result.threshold, Value::from_decimal(dec!(5.00)));
        assert_eq!(
            result.actual.as_decimal().unwrap().round_dp(3),
            dec!(5.556)
        );
        let headroom = result.headroom.unwrap().as_decimal().unwrap().round_dp(3);
        assert_eq!(headroom, dec!(-0.556));
    }

    #[test]
    fn test_boolean_requirement() {
        let i = interp(
            "CONDITION InsuranceInPlace = InsuranceCoverage >= 1\n\
             COVENANT MaintainInsurance REQUIRES InsuranceInPlace",
            r#"{"InsuranceCoverage": 1}"#,
        );
        let result = i.check_covenant("MaintainInsurance").unwrap();
        assert!(result.compliant);
        assert_eq!(result.actual, Value::ONE);
        assert_eq!(result.threshold, Value::ONE);
        assert_eq!(result.operator, CompareOp::Eq);
        assert_eq!(result.headroom, None);
    }

    #[test]
    fn test_stepped_threshold_selection() {
        let source = "DEFINE Leverage = TotalDebt / EBITDA\n\
             COVENANT MaxLeverage REQUIRES Leverage <= 5.00 UNTIL 2025-12-31, THEN <= 4.75";
        let json = r#"{"TotalDebt": 196000000, "EBITDA": 40000000}"#;

        // before the step-down: threshold 5.00, 4.90 passes
        let before = Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap();
        let mut i = Interpreter::with_time(
            parse(source).unwrap(),
            SafeTimeProvider::new(TimeSource::Test(before)),
        )
        .unwrap();
        i.load_financials_json(json).unwrap();
        let result = i.check_covenant("MaxLeverage").unwrap();
        assert_eq!(result.threshold, Value::from_decimal(dec!(5.00)));
        assert!(result.compliant);

        // after the step-down: threshold 4.75, 4.90 breaches
        let after = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let mut i = Interpreter::with_time(
            parse(source).unwrap(),
            SafeTimeProvider::new(TimeSource::Test(after)),
        )
        .unwrap();
        i.load_financials_json(json).unwrap();
        let result = i.check_covenant("MaxLeverage").unwrap();
        assert_eq!(result.threshold, Value::from_decimal(dec!(4.75)));
        assert!(!result.compliant);
    }

    #[test]
    fn test_unknown_covenant() {
        let i = interp("EVENT COD", "{}");
        let err = i.check_covenant("Ghost").unwrap_err();
        assert!(matches!(err, ProVisoError::UnknownSymbol { kind: "covenant", .. }));
    }

    #[test]
    fn test_compliance_history_order() {
        let json = r#"{"periods": [
            {"period": "2024-Q4", "periodEnd": "2024-12-31", "periodType": "quarterly", "data": {"EBITDA": 30000000, "TotalDebt": 160000000}},
            {"period": "2024-Q3", "periodEnd": "2024-09-30", "periodType": "quarterly", "data": {"EBITDA": 28000000, "TotalDebt": 160000000}}
        ]}"#;
        let i = interp(
            "DEFINE Leverage = TotalDebt / EBITDA\n\
             COVENANT MaxLeverage REQUIRES Leverage <= 5.50",
            json,
        );
        let history = i.compliance_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].period, "2024-Q3");
        assert!(!history[0].all_compliant);
        assert!(history[1].all_compliant);
    }
}
