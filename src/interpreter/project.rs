use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::errors::{ProVisoError, Result};
use crate::events::DealEvent;
use crate::value::Value;

use super::phases::TriggerConditionStatus;
use super::Interpreter;

/// flip evaluation: whether the conditions hold and whether the flip
/// has been formally triggered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlipStatus {
    pub name: String,
    pub conditions_met: bool,
    pub conditions: Vec<TriggerConditionStatus>,
    pub triggered: bool,
    pub triggered_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxEquityStatus {
    pub name: String,
    pub investor: Option<String>,
    pub sponsor: Option<String>,
    /// allocation currently in force, pre- or post-flip
    pub active_share: Option<Value>,
    pub post_flip: bool,
    pub target_return: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStatus {
    pub name: String,
    pub metric: String,
    pub p50: Option<Value>,
    pub p90: Option<Value>,
    pub actual: Option<Value>,
    pub meets_p50: Option<bool>,
    pub meets_p90: Option<bool>,
    /// production below p50, zero when performing
    pub shortfall: Value,
    /// shortfall priced at the declared rate
    pub shortfall_payment: Option<Value>,
    pub within_insurance: Option<bool>,
}

impl Interpreter {
    // ------------------------------------------------------------------
    // tax equity flips
    // ------------------------------------------------------------------

    pub fn flip_status(&self, name: &str) -> Result<FlipStatus> {
        let flip = self.symbols.flip_events.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "flip event",
                name: name.to_string(),
            }
        })?;
        let (conditions_met, conditions) = self.evaluate_trigger(&flip.when)?;
        let triggered_date = self.state.triggered_flips.get(name).copied();
        Ok(FlipStatus {
            name: name.to_string(),
            conditions_met,
            conditions,
            triggered: triggered_date.is_some(),
            triggered_date,
        })
    }

    /// formally trigger a flip; the allocation change shows up in
    /// `tax_equity_status`
    pub fn trigger_flip(&mut self, name: &str) -> Result<NaiveDate> {
        if !self.symbols.flip_events.contains_key(name) {
            return Err(ProVisoError::UnknownSymbol {
                kind: "flip event",
                name: name.to_string(),
            });
        }
        let date = self.today();
        self.state.triggered_flips.insert(name.to_string(), date);
        self.state.satisfied_conditions.insert(name.to_string());
        self.events.emit(DealEvent::FlipTriggered {
            flip: name.to_string(),
            date,
        });
        Ok(date)
    }

    pub fn tax_equity_status(&self, name: &str) -> Result<TaxEquityStatus> {
        let structure = self.symbols.tax_equity_structures.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "tax equity structure",
                name: name.to_string(),
            }
        })?;
        let post_flip = !self.state.triggered_flips.is_empty();
        let share_expr = if post_flip {
            structure.post_flip_share.as_ref()
        } else {
            structure.investor_share.as_ref()
        };
        let active_share = match share_expr {
            Some(expr) => Some(self.evaluate(expr)?),
            None => None,
        };
        let target_return = match &structure.target_return {
            Some(expr) => Some(self.evaluate(expr)?),
            None => None,
        };
        Ok(TaxEquityStatus {
            name: name.to_string(),
            investor: structure.investor.clone(),
            sponsor: structure.sponsor.clone(),
            active_share,
            post_flip,
            target_return,
        })
    }

    // ------------------------------------------------------------------
    // performance guarantees
    // ------------------------------------------------------------------

    pub fn performance_status(&self, name: &str) -> Result<PerformanceStatus> {
        let guarantee = self.symbols.performance_guarantees.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "performance guarantee",
                name: name.to_string(),
            }
        })?;
        let eval_opt = |expr: &Option<crate::ast::Expression>| -> Result<Option<Value>> {
            match expr {
                Some(e) => Ok(Some(self.evaluate(e)?)),
                None => Ok(None),
            }
        };
        let p50 = eval_opt(&guarantee.p50)?;
        let p90 = eval_opt(&guarantee.p90)?;
        let actual = eval_opt(&guarantee.actual_value)?;

        let meets = |level: Option<Value>| match (actual, level) {
            (Some(a), Some(l)) => Some(a >= l),
            _ => None,
        };
        let shortfall = match (actual, p50) {
            (Some(a), Some(p)) => (p - a).max(Value::ZERO),
            _ => Value::ZERO,
        };
        let shortfall_payment = match &guarantee.shortfall_rate {
            Some(rate) if !shortfall.is_zero() => Some(shortfall * self.evaluate(rate)?),
            Some(_) => Some(Value::ZERO),
            None => None,
        };
        let within_insurance = match (&shortfall_payment, &guarantee.insurance_coverage) {
            (Some(payment), Some(coverage)) => Some(*payment <= self.evaluate(coverage)?),
            _ => None,
        };
        Ok(PerformanceStatus {
            name: name.to_string(),
            metric: guarantee.metric.clone(),
            p50,
            p90,
            actual,
            meets_p50: meets(p50),
            meets_p90: meets(p90),
            shortfall,
            shortfall_payment,
            within_insurance,
        })
    }

    // ------------------------------------------------------------------
    // production adjustments
    // ------------------------------------------------------------------

    /// compounded output factor after `years` of degradation
    pub fn degradation_factor(&self, name: &str, years: u32) -> Result<Value> {
        let schedule = self.symbols.degradation_schedules.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "degradation schedule",
                name: name.to_string(),
            }
        })?;
        let rate = self.evaluate(&schedule.annual_rate)?;
        let base = Value::ONE - rate;
        let mut factor = Value::ONE;
        for _ in 0..years {
            factor = factor * base;
        }
        Ok(factor)
    }

    /// seasonal production factor for a calendar quarter (1-4)
    pub fn seasonal_factor(&self, name: &str, quarter: u8) -> Result<Value> {
        let adjustment = self.symbols.seasonal_adjustments.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "seasonal adjustment",
                name: name.to_string(),
            }
        })?;
        let expr = match quarter {
            1 => &adjustment.q1,
            2 => &adjustment.q2,
            3 => &adjustment.q3,
            4 => &adjustment.q4,
            other => {
                return Err(ProVisoError::InvalidAmount {
                    message: format!("quarter must be 1-4, got {}", other),
                });
            }
        };
        self.evaluate(expr)
    }

    // ------------------------------------------------------------------
    // depreciation
    // ------------------------------------------------------------------

    /// depreciation allowance for a recovery year (1-based)
    ///
    /// MACRS uses the standard half-year convention percentages for
    /// 5-year property; anything else is straight-line over the period.
    pub fn depreciation_allowance(&self, name: &str, year: u32) -> Result<Value> {
        let decl = self.symbols.depreciation.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "depreciation",
                name: name.to_string(),
            }
        })?;
        let basis = match &decl.basis {
            Some(expr) => self.evaluate(expr)?,
            None => return Ok(Value::ZERO),
        };
        if year == 0 {
            return Ok(Value::ZERO);
        }
        let allowance = if decl.method == "MACRS" && decl.period_years == 5 {
            let macrs_5: [Decimal; 6] = [
                dec!(0.20),
                dec!(0.32),
                dec!(0.192),
                dec!(0.1152),
                dec!(0.1152),
                dec!(0.0576),
            ];
            match macrs_5.get(year as usize - 1) {
                Some(rate) => basis * Value::from_decimal(*rate),
                None => Value::ZERO,
            }
        } else if year <= decl.period_years {
            basis / Value::from_int(decl.period_years as i64)
        } else {
            Value::ZERO
        };
        if year == 1 {
            if let Some(bonus) = &decl.bonus_rate {
                let bonus_rate = self.evaluate(bonus)?;
                return Ok(allowance + basis * bonus_rate);
            }
        }
        Ok(allowance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;
    use rust_decimal_macros::dec;

    const SOURCE: &str = "\
        TAX_EQUITY_STRUCTURE SolarPartnership\n\
          INVESTOR \"TaxEq Investor LLC\" SPONSOR \"DevCo\"\n\
          INVESTOR_SHARE 99% POST_FLIP_SHARE 5% TARGET_RETURN 7.5%\n\
        TAX_CREDIT SolarITC TYPE ITC RATE 30% BASIS $200_000_000 SATISFIES ITCPlaced\n\
        FLIP_EVENT TargetReturnFlip WHEN ALL_OF(TargetIRRReached)\n\
        PERFORMANCE_GUARANTEE EnergyOutput METRIC \"Net MWh\"\n\
          P50 480_000 P90 430_000 ACTUAL ActualOutput\n\
          SHORTFALL_RATE 45 GUARANTEE_PERIOD \"first 5 operating years\"\n\
          INSURANCE $4_000_000\n\
        DEGRADATION_SCHEDULE PanelDegradation ANNUAL_RATE 0.5% APPLIES_TO EnergyOutput\n\
        SEASONAL_ADJUSTMENT SolarSeasonality Q1 0.80 Q2 1.15 Q3 1.25 Q4 0.80\n\
        DEPRECIATION SolarMACRS METHOD MACRS PERIOD 5 BASIS $170_000_000";

    fn interp(json: &str) -> Interpreter {
        let mut i = Interpreter::new(parse(SOURCE).unwrap()).unwrap();
        if !json.is_empty() {
            i.load_financials_json(json).unwrap();
        }
        i
    }

    #[test]
    fn test_tax_credit_satisfies_on_load() {
        let i = interp("");
        assert!(i.is_condition_satisfied("ITCPlaced"));
    }

    #[test]
    fn test_flip_changes_allocation() {
        let mut i = interp("");
        let before = i.tax_equity_status("SolarPartnership").unwrap();
        assert_eq!(before.active_share, Some(Value::from_decimal(dec!(0.99))));
        assert!(!before.post_flip);

        let status = i.flip_status("TargetReturnFlip").unwrap();
        assert!(!status.conditions_met);

        i.satisfy_condition("TargetIRRReached");
        assert!(i.flip_status("TargetReturnFlip").unwrap().conditions_met);

        i.trigger_flip("TargetReturnFlip").unwrap();
        let after = i.tax_equity_status("SolarPartnership").unwrap();
        assert_eq!(after.active_share, Some(Value::from_decimal(dec!(0.05))));
        assert!(after.post_flip);
    }

    #[test]
    fn test_performance_shortfall_priced() {
        let i = interp(r#"{"ActualOutput": 460000}"#);
        let status = i.performance_status("EnergyOutput").unwrap();
        assert_eq!(status.meets_p50, Some(false));
        assert_eq!(status.meets_p90, Some(true));
        assert_eq!(status.shortfall, Value::from_int(20_000));
        assert_eq!(status.shortfall_payment, Some(Value::from_int(900_000)));
        assert_eq!(status.within_insurance, Some(true));
    }

    #[test]
    fn test_degradation_compounds() {
        let i = interp("");
        let factor = i.degradation_factor("PanelDegradation", 2).unwrap();
        assert_eq!(factor, Value::from_decimal(dec!(0.990025)));
    }

    #[test]
    fn test_seasonal_quarters() {
        let i = interp("");
        assert_eq!(
            i.seasonal_factor("SolarSeasonality", 3).unwrap(),
            Value::from_decimal(dec!(1.25))
        );
        assert!(i.seasonal_factor("SolarSeasonality", 5).is_err());
    }

    #[test]
    fn test_macrs_allowances() {
        let i = interp("");
        assert_eq!(
            i.depreciation_allowance("SolarMACRS", 1).unwrap(),
            Value::from_int(34_000_000)
        );
        assert_eq!(
            i.depreciation_allowance("SolarMACRS", 2).unwrap(),
            Value::from_decimal(dec!(54400000))
        );
        assert_eq!(i.depreciation_allowance("SolarMACRS", 7).unwrap(), Value::ZERO);
    }
}
