use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::warn;

use crate::ast::{BinaryOp, CompareOp, Expression, PeriodType, TrailingUnit, UnaryOp};
use crate::errors::{ProVisoError, Result};
use crate::value::Value;

use super::Interpreter;

/// evaluation context threaded through the expression walk
///
/// `period` overrides the active evaluation period (trailing windows,
/// compliance history); `bindings` carries scoped temporaries such as
/// the `amount` binding during prohibition checks. Passing the context
/// by value keeps every query pure; there is nothing to restore on
/// exit.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EvalCtx<'a> {
    pub period: Option<&'a str>,
    pub bindings: Option<&'a BTreeMap<String, Decimal>>,
}

impl Interpreter {
    /// evaluate a numeric expression against the active period
    pub fn evaluate(&self, expr: &Expression) -> Result<Value> {
        self.eval_expr(expr, EvalCtx::default())
    }

    /// evaluate a boolean expression against the active period
    pub fn evaluate_bool(&self, expr: &Expression) -> Result<bool> {
        self.eval_bool(expr, EvalCtx::default())
    }

    pub(crate) fn eval_expr(&self, expr: &Expression, ctx: EvalCtx<'_>) -> Result<Value> {
        match expr {
            Expression::Number(n) => Ok(Value::from_decimal(*n)),
            Expression::Currency(n) => Ok(Value::from_decimal(*n)),
            Expression::Percentage(p) => Ok(Value::from_percent(*p)),
            Expression::Ratio(r) => Ok(Value::from_decimal(*r)),
            Expression::DateLiteral(_) | Expression::Str(_) => Err(ProVisoError::Evaluation {
                message: format!("{} is not numeric", expr),
            }),
            Expression::Identifier(name) => self.resolve_identifier(name, ctx),
            Expression::Binary { op, left, right } => self.eval_binary(*op, left, right, ctx),
            Expression::Unary { op, operand } => match op {
                UnaryOp::Neg => Ok(-self.eval_expr(operand, ctx)?),
                UnaryOp::Not => Ok(bool_value(!self.eval_bool(operand, ctx)?)),
            },
            Expression::Comparison { .. } => Ok(bool_value(self.eval_bool(expr, ctx)?)),
            Expression::FunctionCall { name, args } => self.eval_function(name, args, ctx),
            Expression::Trailing { count, unit, expr } => {
                self.eval_trailing(*count, *unit, expr, ctx)
            }
        }
    }

    pub(crate) fn eval_bool(&self, expr: &Expression, ctx: EvalCtx<'_>) -> Result<bool> {
        match expr {
            Expression::Comparison { op, left, right } => {
                let l = self.eval_expr(left, ctx)?;
                let r = self.eval_expr(right, ctx)?;
                Ok(compare_values(*op, l, r))
            }
            Expression::Binary { op: BinaryOp::And, left, right } => {
                Ok(self.eval_bool(left, ctx)? && self.eval_bool(right, ctx)?)
            }
            Expression::Binary { op: BinaryOp::Or, left, right } => {
                Ok(self.eval_bool(left, ctx)? || self.eval_bool(right, ctx)?)
            }
            Expression::Unary { op: UnaryOp::Not, operand } => {
                Ok(!self.eval_bool(operand, ctx)?)
            }
            Expression::Identifier(name) => self.resolve_bool_identifier(name, ctx),
            other => Ok(self.eval_expr(other, ctx)?.is_truthy()),
        }
    }

    /// bare identifier in boolean position: a condition if one exists,
    /// then numeric truthiness, then satisfied-condition membership;
    /// unknown names are false
    fn resolve_bool_identifier(&self, name: &str, ctx: EvalCtx<'_>) -> Result<bool> {
        if let Some(condition) = self.symbols.conditions.get(name) {
            return self.eval_bool(&condition.expr, ctx);
        }
        match self.resolve_identifier(name, ctx) {
            Ok(value) => Ok(value.is_truthy()),
            Err(ProVisoError::UndefinedIdentifier { .. }) => Ok(self
                .state
                .satisfied_conditions
                .contains(name)
                || self.state.event_defaults.contains(name)),
            Err(other) => Err(other),
        }
    }

    /// resolution order: context bindings, definitions, financial data,
    /// then case-convention aliases of the same layers
    fn resolve_identifier(&self, name: &str, ctx: EvalCtx<'_>) -> Result<Value> {
        if let Some(bindings) = ctx.bindings {
            if let Some(v) = bindings.get(name) {
                return Ok(Value::from_decimal(*v));
            }
        }
        if let Some(definition) = self.symbols.definitions.get(name) {
            return self.eval_definition(definition, ctx);
        }
        if let Some(v) = self.state.finance.lookup(name, ctx.period) {
            return Ok(Value::from_decimal(v));
        }
        for alias in alias_candidates(name) {
            if alias == name {
                continue;
            }
            if let Some(definition) = self.symbols.definitions.get(&alias) {
                return self.eval_definition(definition, ctx);
            }
            if let Some(v) = self.state.finance.lookup(&alias, ctx.period) {
                return Ok(Value::from_decimal(v));
            }
        }
        Err(ProVisoError::UndefinedIdentifier {
            name: name.to_string(),
        })
    }

    /// definition body, minus exclusions, clamped by the cap
    fn eval_definition(&self, definition: &crate::ast::Define, ctx: EvalCtx<'_>) -> Result<Value> {
        let mut value = self.eval_expr(&definition.expr, ctx)?;
        for excluded in &definition.excluding {
            value = value - self.resolve_identifier(excluded, ctx)?;
        }
        if let Some(cap) = &definition.cap {
            value = value.min(self.eval_expr(cap, ctx)?);
        }
        Ok(value)
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        ctx: EvalCtx<'_>,
    ) -> Result<Value> {
        match op {
            BinaryOp::And => {
                let b = self.eval_bool(left, ctx)? && self.eval_bool(right, ctx)?;
                Ok(bool_value(b))
            }
            BinaryOp::Or => {
                let b = self.eval_bool(left, ctx)? || self.eval_bool(right, ctx)?;
                Ok(bool_value(b))
            }
            _ => {
                let l = self.eval_expr(left, ctx)?;
                let r = self.eval_expr(right, ctx)?;
                Ok(match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Mod => l % r,
                    BinaryOp::And | BinaryOp::Or => unreachable!(),
                })
            }
        }
    }

    fn eval_function(&self, name: &str, args: &[Expression], ctx: EvalCtx<'_>) -> Result<Value> {
        match name {
            "AVAILABLE" => {
                let basket = Self::name_argument(name, args)?;
                self.basket_available(basket)
            }
            "GreaterOf" => self.fold_args(name, args, ctx, Value::max),
            "LesserOf" => self.fold_args(name, args, ctx, Value::min),
            "COMPLIANT" => {
                let covenant = Self::name_argument(name, args)?;
                Ok(bool_value(self.check_covenant(covenant)?.compliant))
            }
            "EXISTS" => {
                let event = Self::name_argument(name, args)?;
                Ok(bool_value(self.state.event_defaults.contains(event)))
            }
            "NOT" => match args {
                [operand] => Ok(bool_value(!self.eval_bool(operand, ctx)?)),
                _ => Err(ProVisoError::Evaluation {
                    message: "NOT takes exactly one argument".to_string(),
                }),
            },
            other => Err(ProVisoError::UnknownSymbol {
                kind: "function",
                name: other.to_string(),
            }),
        }
    }

    fn fold_args(
        &self,
        name: &str,
        args: &[Expression],
        ctx: EvalCtx<'_>,
        pick: fn(Value, Value) -> Value,
    ) -> Result<Value> {
        let mut values = args.iter().map(|a| self.eval_expr(a, ctx));
        let Some(first) = values.next() else {
            return Err(ProVisoError::Evaluation {
                message: format!("{} needs at least one argument", name),
            });
        };
        values.try_fold(first?, |acc, v| Ok(pick(acc, v?)))
    }

    fn name_argument<'e>(function: &str, args: &'e [Expression]) -> Result<&'e str> {
        match args {
            [Expression::Identifier(name)] => Ok(name),
            [Expression::Str(name)] => Ok(name),
            _ => Err(ProVisoError::Evaluation {
                message: format!("{} takes a single name argument", function),
            }),
        }
    }

    // ------------------------------------------------------------------
    // trailing windows
    // ------------------------------------------------------------------

    /// sum the expression over the trailing window; partial windows use
    /// what exists. In simple mode this logs a warning and evaluates
    /// once.
    fn eval_trailing(
        &self,
        count: u32,
        unit: TrailingUnit,
        expr: &Expression,
        ctx: EvalCtx<'_>,
    ) -> Result<Value> {
        if !self.state.finance.is_multi_period() {
            warn!(count, %unit, "trailing window in simple mode; evaluating once");
            return self.eval_expr(expr, ctx);
        }
        let window = self.trailing_window(count, unit, ctx.period);
        let mut sum = Value::ZERO;
        for period in &window {
            let child_ctx = EvalCtx {
                period: Some(period.as_str()),
                bindings: ctx.bindings,
            };
            sum += self.eval_expr(expr, child_ctx)?;
        }
        Ok(sum)
    }

    /// the period labels a trailing sum would cover, anchored at the
    /// active (or overridden) evaluation period
    pub fn trailing_periods(&self, count: u32, unit: TrailingUnit) -> Vec<String> {
        self.trailing_window(count, unit, None)
    }

    fn trailing_window(&self, count: u32, unit: TrailingUnit, anchor: Option<&str>) -> Vec<String> {
        let wanted = match unit {
            TrailingUnit::Quarters => PeriodType::Quarterly,
            TrailingUnit::Months => PeriodType::Monthly,
            TrailingUnit::Years => PeriodType::Annual,
        };
        let anchor_key = anchor
            .or_else(|| self.state.finance.evaluation_period())
            .map(super::finance::period_sort_key);
        let mut labels: Vec<String> = self
            .state
            .finance
            .periods()
            .iter()
            .filter(|p| p.period_type == wanted)
            .filter(|p| match anchor_key {
                Some(key) => super::finance::period_sort_key(&p.period) <= key,
                None => true,
            })
            .map(|p| p.period.clone())
            .collect();
        let keep = count as usize;
        if labels.len() > keep {
            labels.drain(..labels.len() - keep);
        }
        labels
    }

    // ------------------------------------------------------------------
    // calculation trees
    // ------------------------------------------------------------------

    /// drilldown tree for a definition or raw metric
    pub fn calculation_tree(&self, name: &str) -> Result<CalculationNode> {
        if let Some(definition) = self.symbols.definitions.get(name) {
            let value = self.eval_definition(definition, EvalCtx::default())?;
            return Ok(CalculationNode {
                name: name.to_string(),
                value,
                formula: Some(definition.expr.to_string()),
                children: self.operand_nodes(&definition.expr)?,
                source: CalcSource::Definition,
                value_type: infer_value_type(name, value),
                raw_data_key: None,
            });
        }
        if let Some(v) = self.state.finance.lookup(name, None) {
            let value = Value::from_decimal(v);
            return Ok(CalculationNode {
                name: name.to_string(),
                value,
                formula: None,
                children: Vec::new(),
                source: CalcSource::FinancialData,
                value_type: infer_value_type(name, value),
                raw_data_key: Some(name.to_string()),
            });
        }
        Err(ProVisoError::UndefinedIdentifier {
            name: name.to_string(),
        })
    }

    /// leaf-ish operand nodes, flattening nested arithmetic
    fn operand_nodes(&self, expr: &Expression) -> Result<Vec<CalculationNode>> {
        match expr {
            Expression::Binary { left, right, .. } => {
                let mut nodes = self.operand_nodes(left)?;
                nodes.extend(self.operand_nodes(right)?);
                Ok(nodes)
            }
            Expression::Unary { operand, .. } => self.operand_nodes(operand),
            Expression::Identifier(name) => {
                if self.symbols.definitions.contains_key(name.as_str()) {
                    Ok(vec![self.calculation_tree(name)?])
                } else {
                    let value = self.resolve_identifier(name, EvalCtx::default())?;
                    Ok(vec![CalculationNode {
                        name: name.clone(),
                        value,
                        formula: None,
                        children: Vec::new(),
                        source: CalcSource::FinancialData,
                        value_type: infer_value_type(name, value),
                        raw_data_key: Some(name.clone()),
                    }])
                }
            }
            literal @ (Expression::Number(_)
            | Expression::Currency(_)
            | Expression::Percentage(_)
            | Expression::Ratio(_)) => {
                let value = self.eval_expr(literal, EvalCtx::default())?;
                Ok(vec![CalculationNode {
                    name: literal.to_string(),
                    value,
                    formula: None,
                    children: Vec::new(),
                    source: CalcSource::Literal,
                    value_type: literal_value_type(literal, value),
                    raw_data_key: None,
                }])
            }
            other => {
                let value = self.eval_expr(other, EvalCtx::default())?;
                Ok(vec![CalculationNode {
                    name: other.to_string(),
                    value,
                    formula: Some(other.to_string()),
                    children: Vec::new(),
                    source: CalcSource::Computed,
                    value_type: infer_value_type("", value),
                    raw_data_key: None,
                }])
            }
        }
    }
}

pub(crate) fn compare_values(op: CompareOp, left: Value, right: Value) -> bool {
    match op {
        CompareOp::Le => left <= right,
        CompareOp::Ge => left >= right,
        CompareOp::Lt => left < right,
        CompareOp::Gt => left > right,
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
    }
}

pub(crate) fn bool_value(b: bool) -> Value {
    if b {
        Value::ONE
    } else {
        Value::ZERO
    }
}

/// PascalCase / snake_case / case-fold aliases for one identifier
fn alias_candidates(name: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    // TotalDebt -> total_debt
    let mut snake = String::new();
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 && !snake.ends_with('_') {
                snake.push('_');
            }
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }
    candidates.push(snake);

    // total_debt -> TotalDebt
    let mut pascal = String::new();
    let mut upper_next = true;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            pascal.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            pascal.push(ch);
        }
    }
    candidates.push(pascal);

    // EBITDA <-> ebitda
    candidates.push(name.to_ascii_lowercase());
    candidates.push(name.to_ascii_uppercase());

    candidates.dedup();
    candidates
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcSource {
    Literal,
    FinancialData,
    Definition,
    Computed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Currency,
    Ratio,
    Percentage,
    Number,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationNode {
    pub name: String,
    pub value: Value,
    pub formula: Option<String>,
    pub children: Vec<CalculationNode>,
    pub source: CalcSource,
    pub value_type: ValueType,
    pub raw_data_key: Option<String>,
}

/// name-and-magnitude heuristic: rates read as percentages, large
/// magnitudes as currency, small as ratios
fn infer_value_type(name: &str, value: Value) -> ValueType {
    let lower = name.to_ascii_lowercase();
    if lower.contains("percent") || lower.contains("rate") || lower.contains("margin") {
        return ValueType::Percentage;
    }
    match value.as_decimal() {
        Some(d) => {
            let magnitude = d.abs();
            if magnitude > dec!(10_000) {
                ValueType::Currency
            } else if magnitude < dec!(10) {
                ValueType::Ratio
            } else {
                ValueType::Number
            }
        }
        None => ValueType::Ratio,
    }
}

fn literal_value_type(expr: &Expression, value: Value) -> ValueType {
    match expr {
        Expression::Currency(_) => ValueType::Currency,
        Expression::Percentage(_) => ValueType::Percentage,
        Expression::Ratio(_) => ValueType::Ratio,
        _ => infer_value_type("", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;

    fn interp(source: &str, json: &str) -> Interpreter {
        let mut i = Interpreter::new(parse(source).unwrap()).unwrap();
        if !json.is_empty() {
            i.load_financials_json(json).unwrap();
        }
        i
    }

    #[test]
    fn test_definition_resolution() {
        let i = interp(
            "DEFINE Leverage = TotalDebt / EBITDA",
            r#"{"TotalDebt": 200000000, "EBITDA": 36000000}"#,
        );
        let v = i.evaluate(&Expression::ident("Leverage")).unwrap();
        let d = v.as_decimal().unwrap().round_dp(3);
        assert_eq!(d, dec!(5.556));
    }

    #[test]
    fn test_excluding_and_cap_modifiers() {
        let i = interp(
            "DEFINE AdjustedEBITDA = EBITDA EXCLUDING OneTimeItems CAP $50_000_000",
            r#"{"EBITDA": 60000000, "OneTimeItems": 4000000}"#,
        );
        let v = i.evaluate(&Expression::ident("AdjustedEBITDA")).unwrap();
        assert_eq!(v, Value::from_int(50_000_000));
    }

    #[test]
    fn test_alias_resolution() {
        let i = interp("", r#"{"total_debt": 100, "ebitda": 50}"#);
        assert_eq!(
            i.evaluate(&Expression::ident("TotalDebt")).unwrap(),
            Value::from_int(100)
        );
        assert_eq!(
            i.evaluate(&Expression::ident("EBITDA")).unwrap(),
            Value::from_int(50)
        );
    }

    #[test]
    fn test_zero_ebitda_blows_to_infinity() {
        let i = interp(
            "DEFINE Leverage = TotalDebt / EBITDA",
            r#"{"TotalDebt": 200000000, "EBITDA": 0}"#,
        );
        let v = i.evaluate(&Expression::ident("Leverage")).unwrap();
        assert!(v.is_infinite());
    }

    #[test]
    fn test_undefined_identifier() {
        let i = interp("", "{}");
        let err = i.evaluate(&Expression::ident("Mystery")).unwrap_err();
        assert!(matches!(err, ProVisoError::UndefinedIdentifier { .. }));
    }

    #[test]
    fn test_greater_of() {
        let i = interp(
            "DEFINE Cap = GreaterOf($25_000_000, 10% * EBITDA)",
            r#"{"EBITDA": 36000000}"#,
        );
        let v = i.evaluate(&Expression::ident("Cap")).unwrap();
        assert_eq!(v, Value::from_int(25_000_000));
    }

    #[test]
    fn test_trailing_sum_partial_window() {
        let json = r#"{"periods": [
            {"period": "2024-Q2", "periodEnd": "2024-06-30", "periodType": "quarterly", "data": {"Revenue": 10}},
            {"period": "2024-Q3", "periodEnd": "2024-09-30", "periodType": "quarterly", "data": {"Revenue": 12}},
            {"period": "2024-Q4", "periodEnd": "2024-12-31", "periodType": "quarterly", "data": {"Revenue": 14}}
        ]}"#;
        let i = interp("DEFINE LTM = TRAILING 4 QUARTERS OF Revenue", json);
        // only three quarters exist; the window uses what is there
        assert_eq!(
            i.trailing_periods(4, TrailingUnit::Quarters),
            vec!["2024-Q2", "2024-Q3", "2024-Q4"]
        );
        let v = i.evaluate(&Expression::ident("LTM")).unwrap();
        assert_eq!(v, Value::from_int(36));
    }

    #[test]
    fn test_trailing_respects_evaluation_period() {
        let json = r#"{"periods": [
            {"period": "2024-Q2", "periodEnd": "2024-06-30", "periodType": "quarterly", "data": {"Revenue": 10}},
            {"period": "2024-Q3", "periodEnd": "2024-09-30", "periodType": "quarterly", "data": {"Revenue": 12}},
            {"period": "2024-Q4", "periodEnd": "2024-12-31", "periodType": "quarterly", "data": {"Revenue": 14}}
        ]}"#;
        let mut i = interp("DEFINE L2 = TRAILING 2 QUARTERS OF Revenue", json);
        i.set_evaluation_period("2024-Q3").unwrap();
        let v = i.evaluate(&Expression::ident("L2")).unwrap();
        assert_eq!(v, Value::from_int(22));
    }

    #[test]
    fn test_trailing_in_simple_mode_evaluates_once() {
        let i = interp(
            "DEFINE LTM = TRAILING 4 QUARTERS OF Revenue",
            r#"{"Revenue": 12}"#,
        );
        let v = i.evaluate(&Expression::ident("LTM")).unwrap();
        assert_eq!(v, Value::from_int(12));
    }

    #[test]
    fn test_calculation_tree_sources() {
        let i = interp(
            "DEFINE Leverage = TotalDebt / EBITDA",
            r#"{"TotalDebt": 200000000, "EBITDA": 36000000}"#,
        );
        let tree = i.calculation_tree("Leverage").unwrap();
        assert_eq!(tree.source, CalcSource::Definition);
        assert_eq!(tree.formula.as_deref(), Some("TotalDebt / EBITDA"));
        assert_eq!(tree.children.len(), 2);
        assert!(tree
            .children
            .iter()
            .all(|c| c.source == CalcSource::FinancialData));
        assert_eq!(tree.value_type, ValueType::Ratio);
        assert_eq!(tree.children[0].value_type, ValueType::Currency);
    }
}
