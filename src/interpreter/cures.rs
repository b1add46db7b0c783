use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::ast::{CompareOp, CurePeriod, CureUnit};
use crate::errors::{ProVisoError, Result};
use crate::events::DealEvent;
use crate::value::Value;

use super::covenants::CovenantResult;
use super::{CureAttempt, CureState, CureStatus, Interpreter};

const DEFAULT_CURE_DAYS: u64 = 30;

/// structured cure outcome; refusals are results, not errors
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CureOutcome {
    pub success: bool,
    pub cured_amount: Option<Decimal>,
    pub reason: Option<String>,
}

impl CureOutcome {
    fn refused(reason: &str) -> Self {
        Self {
            success: false,
            cured_amount: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// covenant test with any cure overlay applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CovenantResultWithCure {
    pub result: CovenantResult,
    pub cure_applied: bool,
    pub effective_compliant: bool,
    pub cure_state: Option<CureState>,
}

impl Interpreter {
    /// a cure is available when one is declared and uses remain
    pub fn can_apply_cure(&self, covenant: &str) -> Result<bool> {
        let decl = self.symbols.covenants.get(covenant).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "covenant",
                name: covenant.to_string(),
            }
        })?;
        let Some(cure) = &decl.cure else {
            return Ok(false);
        };
        Ok(self.cure_uses_remaining(cure.max_uses, &cure.mechanism))
    }

    fn cure_uses_remaining(&self, max_uses: Option<u32>, mechanism: &str) -> bool {
        match max_uses {
            Some(max) => self
                .state
                .cure_usage
                .get(mechanism)
                .copied()
                .unwrap_or(0)
                < max,
            None => true,
        }
    }

    pub fn cure_usage(&self, mechanism: &str) -> u32 {
        self.state.cure_usage.get(mechanism).copied().unwrap_or(0)
    }

    /// attempt to cure a breached covenant with the given amount
    pub fn apply_cure(&mut self, covenant: &str, amount: Decimal) -> Result<CureOutcome> {
        let decl = self.symbols.covenants.get(covenant).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "covenant",
                name: covenant.to_string(),
            }
        })?;
        let Some(cure) = decl.cure.clone() else {
            return Ok(CureOutcome::refused("No cure mechanism declared"));
        };
        if !self.cure_uses_remaining(cure.max_uses, &cure.mechanism) {
            return Ok(CureOutcome::refused("No cure uses remaining"));
        }
        if let Some(max_amount) = &cure.max_amount {
            let max_amount = self.evaluate(max_amount)?;
            if Value::from_decimal(amount) > max_amount {
                return Ok(CureOutcome::refused("Amount exceeds maximum cure amount"));
            }
        }

        let result = self.check_covenant(covenant)?;
        if result.compliant {
            return Ok(CureOutcome::refused("Covenant is not in breach"));
        }
        let shortfall = cure_shortfall(&result);
        if Value::from_decimal(amount) < shortfall {
            return Ok(CureOutcome::refused("Amount is less than the shortfall"));
        }

        let usage = self
            .state
            .cure_usage
            .entry(cure.mechanism.clone())
            .or_insert(0);
        *usage += 1;
        let uses_remaining = cure.max_uses.map(|max| max - self.cure_usage(&cure.mechanism));

        let today = self.today();
        let deadline = cure_deadline(today, cure.cure_period);
        let attempt = CureAttempt {
            date: today,
            mechanism: cure.mechanism.clone(),
            amount,
        };
        let entry = self
            .state
            .cure_states
            .entry(covenant.to_string())
            .or_insert(CureState {
                breach_date: today,
                cure_deadline: deadline,
                status: CureStatus::Open,
                attempts: Vec::new(),
            });
        entry.status = CureStatus::Cured;
        entry.attempts.push(attempt);

        self.events.emit(DealEvent::CureApplied {
            covenant: covenant.to_string(),
            mechanism: cure.mechanism.clone(),
            amount,
            uses_remaining,
            timestamp: self.time.now(),
        });
        Ok(CureOutcome {
            success: true,
            cured_amount: Some(amount),
            reason: None,
        })
    }

    /// open a cure window for a breached covenant
    pub fn record_breach(&mut self, covenant: &str) -> Result<CureState> {
        let decl = self.symbols.covenants.get(covenant).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "covenant",
                name: covenant.to_string(),
            }
        })?;
        let cure_period = decl.cure.as_ref().and_then(|c| c.cure_period);
        let breach_date = self.today();
        let cure_deadline = cure_deadline(breach_date, cure_period);
        let state = CureState {
            breach_date,
            cure_deadline,
            status: CureStatus::Open,
            attempts: Vec::new(),
        };
        self.state
            .cure_states
            .insert(covenant.to_string(), state.clone());
        self.events.emit(DealEvent::BreachRecorded {
            covenant: covenant.to_string(),
            breach_date,
            cure_deadline,
        });
        Ok(state)
    }

    pub fn cure_state(&self, covenant: &str) -> Option<&CureState> {
        self.state.cure_states.get(covenant)
    }

    /// covenant test with the cure overlay: a cured breach reads as
    /// effectively compliant
    pub fn check_covenant_with_cure(&self, covenant: &str) -> Result<CovenantResultWithCure> {
        let result = self.check_covenant(covenant)?;
        let cure_state = self.state.cure_states.get(covenant).cloned();
        let cure_applied = cure_state
            .as_ref()
            .map_or(false, |s| s.status == CureStatus::Cured);
        Ok(CovenantResultWithCure {
            effective_compliant: result.compliant || cure_applied,
            cure_applied,
            result,
            cure_state,
        })
    }
}

/// shortfall in the covenant's native units
fn cure_shortfall(result: &CovenantResult) -> Value {
    match result.operator {
        CompareOp::Le => result.actual - result.threshold,
        CompareOp::Ge => result.threshold - result.actual,
        _ => (result.actual - result.threshold).abs(),
    }
}

fn cure_deadline(from: NaiveDate, period: Option<CurePeriod>) -> NaiveDate {
    match period {
        Some(CurePeriod { unit: CureUnit::Days, amount }) => {
            from + chrono::Days::new(amount as u64)
        }
        Some(CurePeriod { unit: CureUnit::Months, amount }) => from + Months::new(amount),
        Some(CurePeriod { unit: CureUnit::Years, amount }) => from + Months::new(amount * 12),
        None => from + chrono::Days::new(DEFAULT_CURE_DAYS),
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

    const SOURCE: &str = "\
        DEFINE Leverage = TotalDebt / EBITDA\n\
        COVENANT MaxLeverage\n\
          REQUIRES Leverage <= 5.00\n\
          TESTED QUARTERLY\n\
          CURE EquityCure MAX_USES 2 OVER \"rolling 4 quarters\" \
            MAX_AMOUNT $25_000_000 CURE_PERIOD 45 DAYS";

    fn breached() -> Interpreter {
        let now = Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap();
        let mut i = Interpreter::with_time(
            parse(SOURCE).unwrap(),
            SafeTimeProvider::new(TimeSource::Test(now)),
        )
        .unwrap();
        i.load_financials_json(r#"{"TotalDebt": 200000000, "EBITDA": 36000000}"#)
            .unwrap();
        i
    }

    #[test]
    fn test_cure_quota_exhausts() {
        let mut i = breached();
        assert!(i.can_apply_cure("MaxLeverage").unwrap());

        let first = i.apply_cure("MaxLeverage", dec!(10000000)).unwrap();
        assert!(first.success);
        assert_eq!(first.cured_amount, Some(dec!(10000000)));

        let second = i.apply_cure("MaxLeverage", dec!(10000000)).unwrap();
        assert!(second.success);
        assert_eq!(i.cure_usage("EquityCure"), 2);

        assert!(!i.can_apply_cure("MaxLeverage").unwrap());
        let third = i.apply_cure("MaxLeverage", dec!(10000000)).unwrap();
        assert!(!third.success);
        assert_eq!(third.reason.as_deref(), Some("No cure uses remaining"));
        // quota invariant: usage never exceeds MAX_USES
        assert_eq!(i.cure_usage("EquityCure"), 2);
    }

    #[test]
    fn test_amount_cap_refusal() {
        let mut i = breached();
        let outcome = i.apply_cure("MaxLeverage", dec!(30000000)).unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("Amount exceeds maximum cure amount")
        );
        assert_eq!(i.cure_usage("EquityCure"), 0);
    }

    #[test]
    fn test_compliant_covenant_refuses_cure() {
        let mut i = breached();
        i.load_financials_json(r#"{"TotalDebt": 150000000, "EBITDA": 36000000}"#)
            .unwrap();
        let outcome = i.apply_cure("MaxLeverage", dec!(10000000)).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some("Covenant is not in breach"));
    }

    #[test]
    fn test_breach_record_and_deadline() {
        let mut i = breached();
        let state = i.record_breach("MaxLeverage").unwrap();
        assert_eq!(state.breach_date, NaiveDate::from_ymd_opt(2025, 3, 31).unwrap());
        // declared cure period is 45 days
        assert_eq!(state.cure_deadline, NaiveDate::from_ymd_opt(2025, 5, 15).unwrap());
        assert_eq!(state.status, CureStatus::Open);
    }

    #[test]
    fn test_cure_overlay() {
        let mut i = breached();
        let before = i.check_covenant_with_cure("MaxLeverage").unwrap();
        assert!(!before.result.compliant);
        assert!(!before.effective_compliant);

        i.apply_cure("MaxLeverage", dec!(10000000)).unwrap();
        let after = i.check_covenant_with_cure("MaxLeverage").unwrap();
        assert!(!after.result.compliant);
        assert!(after.cure_applied);
        assert!(after.effective_compliant);
    }
}
