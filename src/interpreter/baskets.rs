use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::ast::Basket;
use crate::errors::{ProVisoError, Result};
use crate::events::DealEvent;
use crate::value::Value;

use super::{Interpreter, LedgerEntry, LedgerEntryType};

/// basket classification: builder beats grower beats fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BasketType {
    Fixed,
    Grower,
    Builder,
}

pub fn classify(basket: &Basket) -> BasketType {
    if basket.builds_from.is_some() {
        BasketType::Builder
    } else if basket.floor.is_some() {
        BasketType::Grower
    } else {
        BasketType::Fixed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasketStatus {
    pub name: String,
    pub basket_type: BasketType,
    pub capacity: Value,
    pub used: Decimal,
    pub available: Value,
    /// fixed and grower baskets: the formula capacity before the floor
    pub base_capacity: Option<Value>,
    /// grower baskets: the floor in force
    pub floor: Option<Value>,
    /// builder baskets
    pub starting: Option<Value>,
    pub accumulated: Option<Decimal>,
    pub maximum: Option<Value>,
}

impl Interpreter {
    fn basket(&self, name: &str) -> Result<&Basket> {
        self.symbols
            .baskets
            .get(name)
            .ok_or_else(|| ProVisoError::UnknownSymbol {
                kind: "basket",
                name: name.to_string(),
            })
    }

    fn eval_or_zero(&self, expr: Option<&crate::ast::Expression>) -> Result<Value> {
        match expr {
            Some(e) => self.evaluate(e),
            None => Ok(Value::ZERO),
        }
    }

    fn plus_total(&self, basket: &Basket) -> Result<Value> {
        let mut total = Value::ZERO;
        for expr in &basket.plus {
            total += self.evaluate(expr)?;
        }
        Ok(total)
    }

    /// current capacity per basket type
    pub(crate) fn basket_capacity(&self, name: &str) -> Result<Value> {
        let basket = self.basket(name)?;
        let plus = self.plus_total(basket)?;
        match classify(basket) {
            BasketType::Fixed => Ok(self.eval_or_zero(basket.capacity.as_ref())? + plus),
            BasketType::Grower => {
                let base = self.eval_or_zero(basket.capacity.as_ref())? + plus;
                let floor = self.eval_or_zero(basket.floor.as_ref())?;
                Ok(base.max(floor))
            }
            BasketType::Builder => {
                let starting = self.eval_or_zero(basket.starting.as_ref())?;
                let accumulated = self.accumulation(name);
                let built = starting + Value::from_decimal(accumulated) + plus;
                match &basket.maximum {
                    Some(max) => Ok(built.min(self.evaluate(max)?)),
                    None => Ok(built),
                }
            }
        }
    }

    fn utilization(&self, name: &str) -> Decimal {
        self.state
            .basket_utilization
            .get(name)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn accumulation(&self, name: &str) -> Decimal {
        self.state
            .basket_accumulation
            .get(name)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// remaining headroom: capacity minus utilization
    pub fn basket_available(&self, name: &str) -> Result<Value> {
        let capacity = self.basket_capacity(name)?;
        Ok(capacity - Value::from_decimal(self.utilization(name)))
    }

    pub fn basket_status(&self, name: &str) -> Result<BasketStatus> {
        let basket = self.basket(name)?;
        let basket_type = classify(basket);
        let capacity = self.basket_capacity(name)?;
        let used = self.utilization(name);
        let available = capacity - Value::from_decimal(used);

        let mut status = BasketStatus {
            name: name.to_string(),
            basket_type,
            capacity,
            used,
            available,
            base_capacity: None,
            floor: None,
            starting: None,
            accumulated: None,
            maximum: None,
        };
        match basket_type {
            BasketType::Fixed => {
                status.base_capacity = Some(capacity);
            }
            BasketType::Grower => {
                status.base_capacity =
                    Some(self.eval_or_zero(basket.capacity.as_ref())? + self.plus_total(basket)?);
                status.floor = Some(self.eval_or_zero(basket.floor.as_ref())?);
            }
            BasketType::Builder => {
                status.starting = Some(self.eval_or_zero(basket.starting.as_ref())?);
                status.accumulated = Some(self.accumulation(name));
                status.maximum = match &basket.maximum {
                    Some(max) => Some(self.evaluate(max)?),
                    None => None,
                };
            }
        }
        Ok(status)
    }

    /// draw on a basket; refuses rather than over-utilizes
    pub fn use_basket(
        &mut self,
        name: &str,
        amount: Decimal,
        description: &str,
    ) -> Result<BasketStatus> {
        if amount <= Decimal::ZERO {
            return Err(ProVisoError::InvalidAmount {
                message: format!("basket usage must be positive, got {}", amount),
            });
        }
        let basket = self.basket(name)?;
        for gate in basket.subject_to.clone() {
            if !self.basket_gate_holds(&gate)? {
                return Err(ProVisoError::BasketConditionNotMet {
                    basket: name.to_string(),
                    condition: gate,
                });
            }
        }
        let available = self.basket_available(name)?;
        if Value::from_decimal(amount) > available {
            return Err(ProVisoError::InsufficientCapacity {
                basket: name.to_string(),
                requested: Value::from_decimal(amount),
                available,
            });
        }

        let entry = self
            .state
            .basket_utilization
            .entry(name.to_string())
            .or_insert(Decimal::ZERO);
        *entry += amount;

        self.state.basket_ledger.push(LedgerEntry {
            id: Uuid::new_v4(),
            timestamp: self.time.now(),
            basket: name.to_string(),
            amount,
            description: description.to_string(),
            entry_type: LedgerEntryType::Usage,
        });
        let status = self.basket_status(name)?;
        self.events.emit(DealEvent::BasketUsed {
            basket: name.to_string(),
            amount,
            remaining: status.available.finite_or_zero(),
            description: description.to_string(),
            timestamp: self.time.now(),
        });
        Ok(status)
    }

    /// one accumulation tick for a builder basket, clamped so that
    /// starting + accumulation never exceeds the maximum
    pub fn accumulate_builder_basket(&mut self, name: &str, description: &str) -> Result<Decimal> {
        let basket = self.basket(name)?.clone();
        let Some(builds_from) = &basket.builds_from else {
            return Err(ProVisoError::Evaluation {
                message: format!("basket {} is not a builder basket", name),
            });
        };
        let earned = self.evaluate(builds_from)?;
        let earned = earned.finite_or_zero().max(Decimal::ZERO);

        let current = self.accumulation(name);
        let mut next = current + earned;
        if let Some(max_expr) = &basket.maximum {
            let maximum = self.evaluate(max_expr)?.finite_or_zero();
            let starting = self.eval_or_zero(basket.starting.as_ref())?.finite_or_zero();
            next = next.min((maximum - starting).max(Decimal::ZERO));
        }
        let added = next - current;
        self.state
            .basket_accumulation
            .insert(name.to_string(), next);

        self.state.basket_ledger.push(LedgerEntry {
            id: Uuid::new_v4(),
            timestamp: self.time.now(),
            basket: name.to_string(),
            amount: added,
            description: description.to_string(),
            entry_type: LedgerEntryType::Accumulation,
        });
        self.events.emit(DealEvent::BasketAccumulated {
            basket: name.to_string(),
            amount: added,
            total_accumulated: next,
            timestamp: self.time.now(),
        });
        Ok(added)
    }

    /// insertion-ordered usage and accumulation history
    pub fn basket_ledger(&self) -> &[LedgerEntry] {
        &self.state.basket_ledger
    }

    /// a SUBJECT_TO gate holds when the named covenant is compliant,
    /// the named condition is true, or the bare name is satisfied
    fn basket_gate_holds(&self, gate: &str) -> Result<bool> {
        if self.symbols.covenants.contains_key(gate) {
            return Ok(self.check_covenant(gate)?.compliant);
        }
        if let Some(condition) = self.symbols.conditions.get(gate) {
            return self.evaluate_bool(&condition.expr);
        }
        Ok(self.state.satisfied_conditions.contains(gate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;
    use rust_decimal_macros::dec;

    fn interp(source: &str, json: &str) -> Interpreter {
        let mut i = Interpreter::new(parse(source).unwrap()).unwrap();
        i.load_financials_json(json).unwrap();
        i
    }

    #[test]
    fn test_grower_floor_wins() {
        let i = interp(
            "BASKET GeneralInvestments CAPACITY 10% * EBITDA FLOOR $25_000_000",
            r#"{"EBITDA": 36000000}"#,
        );
        let status = i.basket_status("GeneralInvestments").unwrap();
        assert_eq!(status.basket_type, BasketType::Grower);
        assert_eq!(status.capacity, Value::from_int(25_000_000));
        assert_eq!(status.base_capacity, Some(Value::from_int(3_600_000)));
    }

    #[test]
    fn test_grower_scales_past_floor() {
        let i = interp(
            "BASKET GeneralInvestments CAPACITY 10% * EBITDA FLOOR $25_000_000",
            r#"{"EBITDA": 400000000}"#,
        );
        let status = i.basket_status("GeneralInvestments").unwrap();
        assert_eq!(status.capacity, Value::from_int(40_000_000));
    }

    #[test]
    fn test_fixed_basket_with_plus() {
        let i = interp(
            "BASKET Indebtedness CAPACITY $50_000_000 PLUS $10_000_000",
            "{}",
        );
        let status = i.basket_status("Indebtedness").unwrap();
        assert_eq!(status.basket_type, BasketType::Fixed);
        assert_eq!(status.capacity, Value::from_int(60_000_000));
    }

    #[test]
    fn test_use_and_refuse() {
        let mut i = interp("BASKET Small CAPACITY $1_000_000", "{}");
        i.use_basket("Small", dec!(600000), "tranche one").unwrap();

        let err = i.use_basket("Small", dec!(500000), "too much").unwrap_err();
        assert!(matches!(err, ProVisoError::InsufficientCapacity { .. }));

        // refused call left utilization unchanged
        let status = i.basket_status("Small").unwrap();
        assert_eq!(status.used, dec!(600000));
        assert_eq!(status.available, Value::from_int(400_000));
        assert_eq!(i.basket_ledger().len(), 1);
    }

    #[test]
    fn test_builder_accumulates_to_maximum() {
        let i_source = "BASKET RetainedECF BUILDS_FROM 50% * ExcessCashFlow \
                        STARTING $5_000_000 MAXIMUM $12_000_000";
        let mut i = interp(i_source, r#"{"ExcessCashFlow": 10000000}"#);

        let added = i.accumulate_builder_basket("RetainedECF", "fy24 sweep").unwrap();
        assert_eq!(added, dec!(5000000));

        // second sweep clamps at maximum - starting
        let added = i.accumulate_builder_basket("RetainedECF", "fy25 sweep").unwrap();
        assert_eq!(added, dec!(2000000));

        let status = i.basket_status("RetainedECF").unwrap();
        assert_eq!(status.capacity, Value::from_int(12_000_000));
        assert_eq!(status.accumulated, Some(dec!(7000000)));
    }

    #[test]
    fn test_subject_to_gate() {
        let source = "\
            DEFINE Leverage = TotalDebt / EBITDA\n\
            COVENANT MaxLeverage REQUIRES Leverage <= 5.00\n\
            BASKET RestrictedPayments CAPACITY $20_000_000 SUBJECT_TO MaxLeverage";
        let mut i = interp(source, r#"{"TotalDebt": 220000000, "EBITDA": 40000000}"#);

        let err = i
            .use_basket("RestrictedPayments", dec!(1000000), "dividend")
            .unwrap_err();
        assert!(matches!(err, ProVisoError::BasketConditionNotMet { .. }));

        // deleverage, then the gate opens
        i.load_financials_json(r#"{"TotalDebt": 180000000, "EBITDA": 40000000}"#)
            .unwrap();
        assert!(i
            .use_basket("RestrictedPayments", dec!(1000000), "dividend")
            .is_ok());
    }
}
