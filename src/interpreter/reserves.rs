use rust_decimal::Decimal;
use serde::Serialize;

use crate::ast::Expression;
use crate::errors::{ProVisoError, Result};
use crate::events::DealEvent;
use crate::value::Value;

use super::Interpreter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReserveStatus {
    pub name: String,
    pub balance: Decimal,
    pub target: Value,
    pub minimum: Value,
    pub available_for_release: Decimal,
    pub below_minimum: bool,
}

/// outcome of one waterfall tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierResult {
    pub priority: u32,
    pub requested: Decimal,
    /// what the tier's payee received, reserve draws included
    pub paid: Decimal,
    pub shortfall: Decimal,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub pay_to: Option<String>,
    /// portion of `paid` funded by the shortfall reserve
    pub reserve_draw: Decimal,
    pub reserve_draw_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterfallResult {
    pub name: String,
    pub total_revenue: Decimal,
    /// revenue actually pushed through the tiers; reserve draws are
    /// excluded so that distributed + remainder = revenue
    pub total_distributed: Decimal,
    pub remainder: Decimal,
    pub tiers: Vec<TierResult>,
}

impl Interpreter {
    fn reserve_decl(&self, name: &str) -> Result<&crate::ast::ReserveDecl> {
        self.symbols
            .reserves
            .get(name)
            .ok_or_else(|| ProVisoError::UnknownSymbol {
                kind: "reserve",
                name: name.to_string(),
            })
    }

    fn reserve_balance(&self, name: &str) -> Decimal {
        self.state
            .reserve_balances
            .get(name)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn reserve_status(&self, name: &str) -> Result<ReserveStatus> {
        let reserve = self.reserve_decl(name)?;
        let balance = self.reserve_balance(name);
        let target = match &reserve.target {
            Some(expr) => self.evaluate(expr)?,
            None => Value::ZERO,
        };
        let minimum = match &reserve.minimum {
            Some(expr) => self.evaluate(expr)?,
            None => Value::ZERO,
        };
        let minimum_dec = minimum.finite_or_zero();
        Ok(ReserveStatus {
            name: name.to_string(),
            balance,
            target,
            minimum,
            available_for_release: (balance - minimum_dec).max(Decimal::ZERO),
            below_minimum: balance < minimum_dec,
        })
    }

    pub fn fund_reserve(&mut self, name: &str, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(ProVisoError::InvalidAmount {
                message: format!("reserve funding must be positive, got {}", amount),
            });
        }
        self.reserve_decl(name)?;
        let balance = self
            .state
            .reserve_balances
            .entry(name.to_string())
            .or_insert(Decimal::ZERO);
        *balance += amount;
        let new_balance = *balance;
        self.events.emit(DealEvent::ReserveFunded {
            reserve: name.to_string(),
            amount,
            new_balance,
            timestamp: self.time.now(),
        });
        Ok(new_balance)
    }

    pub fn set_reserve_balance(&mut self, name: &str, amount: Decimal) -> Result<()> {
        if amount < Decimal::ZERO {
            return Err(ProVisoError::InvalidAmount {
                message: format!("reserve balance cannot be negative, got {}", amount),
            });
        }
        self.reserve_decl(name)?;
        self.state.reserve_balances.insert(name.to_string(), amount);
        Ok(())
    }

    /// draw what can be released: never more than requested, never past
    /// the reserve minimum
    pub fn draw_from_reserve(&mut self, name: &str, requested: Decimal) -> Result<Decimal> {
        if requested < Decimal::ZERO {
            return Err(ProVisoError::InvalidAmount {
                message: format!("reserve draw cannot be negative, got {}", requested),
            });
        }
        let status = self.reserve_status(name)?;
        let drawn = requested.min(status.available_for_release);
        if drawn > Decimal::ZERO {
            let balance = self
                .state
                .reserve_balances
                .entry(name.to_string())
                .or_insert(Decimal::ZERO);
            *balance -= drawn;
            let new_balance = *balance;
            self.events.emit(DealEvent::ReserveDrawn {
                reserve: name.to_string(),
                amount: drawn,
                new_balance,
                timestamp: self.time.now(),
            });
        }
        Ok(drawn)
    }

    // ------------------------------------------------------------------
    // waterfall execution
    // ------------------------------------------------------------------

    /// push revenue through the tiers in priority order
    pub fn execute_waterfall(&mut self, name: &str, revenue: Decimal) -> Result<WaterfallResult> {
        if revenue < Decimal::ZERO {
            return Err(ProVisoError::InvalidAmount {
                message: format!("waterfall revenue cannot be negative, got {}", revenue),
            });
        }
        let waterfall = self
            .symbols
            .waterfalls
            .get(name)
            .ok_or_else(|| ProVisoError::UnknownSymbol {
                kind: "waterfall",
                name: name.to_string(),
            })?
            .clone();
        let mut tiers = waterfall.tiers.clone();
        tiers.sort_by_key(|t| t.priority);

        let mut remainder = revenue;
        let mut results = Vec::new();

        for tier in &tiers {
            // gate
            if let Some(condition) = &tier.condition {
                if !self.evaluate_bool(condition)? {
                    results.push(TierResult {
                        priority: tier.priority,
                        requested: Decimal::ZERO,
                        paid: Decimal::ZERO,
                        shortfall: Decimal::ZERO,
                        blocked: true,
                        block_reason: Some("Condition not met".to_string()),
                        pay_to: tier.pay_to.clone(),
                        reserve_draw: Decimal::ZERO,
                        reserve_draw_source: None,
                    });
                    continue;
                }
            }

            let requested = self.tier_request(tier)?;
            let from_revenue = requested.min(remainder);
            let mut paid = from_revenue;
            let mut shortfall = requested - paid;

            let mut reserve_draw = Decimal::ZERO;
            let mut reserve_draw_source = None;
            if shortfall > Decimal::ZERO {
                if let Some(source) = &tier.shortfall_from {
                    reserve_draw = self.draw_from_reserve(source, shortfall)?;
                    if reserve_draw > Decimal::ZERO {
                        paid += reserve_draw;
                        shortfall -= reserve_draw;
                        reserve_draw_source = Some(source.clone());
                    }
                }
            }

            if let Some(target_reserve) = &tier.pay_to {
                if paid > Decimal::ZERO {
                    self.reserve_decl(target_reserve)?;
                    let balance = self
                        .state
                        .reserve_balances
                        .entry(target_reserve.clone())
                        .or_insert(Decimal::ZERO);
                    *balance += paid;
                }
            }

            remainder -= from_revenue;
            results.push(TierResult {
                priority: tier.priority,
                requested,
                paid,
                shortfall,
                blocked: false,
                block_reason: None,
                pay_to: tier.pay_to.clone(),
                reserve_draw,
                reserve_draw_source,
            });
        }

        let total_distributed = revenue - remainder;
        self.events.emit(DealEvent::WaterfallExecuted {
            waterfall: name.to_string(),
            revenue,
            distributed: total_distributed,
            remainder,
            timestamp: self.time.now(),
        });
        Ok(WaterfallResult {
            name: name.to_string(),
            total_revenue: revenue,
            total_distributed,
            remainder,
            tiers: results,
        })
    }

    /// how much a tier wants: its PAY amount, or the fill needed to
    /// bring its target reserve to the UNTIL level (or reserve target)
    fn tier_request(&self, tier: &crate::ast::WaterfallTier) -> Result<Decimal> {
        if let Some(amount) = &tier.pay_amount {
            return Ok(self.evaluate(amount)?.finite_or_zero().max(Decimal::ZERO));
        }
        let Some(reserve) = &tier.pay_to else {
            return Ok(Decimal::ZERO);
        };
        let balance = self.reserve_balance(reserve);
        let fill_to = match &tier.until {
            // the original shape is preserved at parse time; a
            // comparison reads as "fill until balance meets the rhs"
            Some(Expression::Comparison { right, .. }) => self.evaluate(right)?,
            Some(expr) => self.evaluate(expr)?,
            None => self.reserve_status(reserve)?.target,
        };
        Ok((fill_to.finite_or_zero() - balance).max(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;
    use rust_decimal_macros::dec;

    const PROJECT: &str = "\
        DEFINE Leverage = TotalDebt / EBITDA\n\
        RESERVE DSRA TARGET $30_000_000 MINIMUM $10_000_000 \
          FUNDED_BY \"Tier 3 of the operating waterfall\" \
          RELEASED_FOR \"Debt service shortfalls\"\n\
        WATERFALL Operating\n\
          TIER 1 PAY $5_000_000\n\
          TIER 2 PAY $3_000_000\n\
          TIER 3 PAY_TO DSRA UNTIL DSRABalance >= $30_000_000\n\
          TIER 4 IF Leverage <= 4.50 PAY $2_000_000";

    fn interp(json: &str) -> Interpreter {
        let mut i = Interpreter::new(parse(PROJECT).unwrap()).unwrap();
        i.load_financials_json(json).unwrap();
        i
    }

    #[test]
    fn test_reserve_status_and_draw_floor() {
        let mut i = interp(r#"{"TotalDebt": 1, "EBITDA": 1}"#);
        i.set_reserve_balance("DSRA", dec!(20000000)).unwrap();

        let status = i.reserve_status("DSRA").unwrap();
        assert_eq!(status.balance, dec!(20000000));
        assert_eq!(status.target, Value::from_int(30_000_000));
        assert_eq!(status.available_for_release, dec!(10000000));
        assert!(!status.below_minimum);

        // a draw may not dip below the minimum
        let drawn = i.draw_from_reserve("DSRA", dec!(15000000)).unwrap();
        assert_eq!(drawn, dec!(10000000));
        assert_eq!(i.reserve_status("DSRA").unwrap().balance, dec!(10000000));
    }

    #[test]
    fn test_waterfall_with_gate_and_reserve_fill() {
        // leverage 4.80 blocks the distribution tier
        let mut i = interp(r#"{"TotalDebt": 192000000, "EBITDA": 40000000}"#);
        i.set_reserve_balance("DSRA", dec!(20000000)).unwrap();

        let result = i.execute_waterfall("Operating", dec!(12000000)).unwrap();
        assert_eq!(result.tiers[0].paid, dec!(5000000));
        assert_eq!(result.tiers[1].paid, dec!(3000000));

        // DSRA fill wanted 10, got the remaining 4
        assert_eq!(result.tiers[2].requested, dec!(10000000));
        assert_eq!(result.tiers[2].paid, dec!(4000000));
        assert_eq!(result.tiers[2].shortfall, dec!(6000000));
        assert_eq!(i.reserve_status("DSRA").unwrap().balance, dec!(24000000));

        assert!(result.tiers[3].blocked);
        assert_eq!(
            result.tiers[3].block_reason.as_deref(),
            Some("Condition not met")
        );

        assert_eq!(result.total_distributed, dec!(12000000));
        assert_eq!(result.remainder, dec!(0));
    }

    #[test]
    fn test_distributed_plus_remainder_equals_revenue() {
        let mut i = interp(r#"{"TotalDebt": 150000000, "EBITDA": 40000000}"#);
        i.set_reserve_balance("DSRA", dec!(30000000)).unwrap();

        // DSRA is full, gate passes; revenue exceeds all requests
        let result = i.execute_waterfall("Operating", dec!(20000000)).unwrap();
        let paid_total: Decimal = result.tiers.iter().map(|t| t.paid).sum();
        assert_eq!(paid_total, dec!(10000000));
        assert_eq!(result.total_distributed + result.remainder, dec!(20000000));
        assert_eq!(result.remainder, dec!(10000000));
    }

    #[test]
    fn test_shortfall_draws_from_reserve() {
        let source = "\
            RESERVE OpReserve TARGET $8_000_000\n\
            WATERFALL Payments\n\
              TIER 1 PAY $6_000_000 SHORTFALL_FROM OpReserve";
        let mut i = Interpreter::new(parse(source).unwrap()).unwrap();
        i.set_reserve_balance("OpReserve", dec!(8000000)).unwrap();

        let result = i.execute_waterfall("Payments", dec!(2000000)).unwrap();
        let tier = &result.tiers[0];
        assert_eq!(tier.paid, dec!(6000000));
        assert_eq!(tier.reserve_draw, dec!(4000000));
        assert_eq!(tier.shortfall, dec!(0));
        // reserve draws are not revenue
        assert_eq!(result.total_distributed, dec!(2000000));
        assert_eq!(result.remainder, dec!(0));
        assert_eq!(i.reserve_status("OpReserve").unwrap().balance, dec!(4000000));
    }
}
