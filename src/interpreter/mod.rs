pub mod amendments;
pub mod baskets;
pub mod conditions;
pub mod covenants;
pub mod cures;
pub mod eval;
pub mod finance;
pub mod milestones;
pub mod phases;
pub mod prohibitions;
pub mod project;
pub mod reserves;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use hourglass_rs::{SafeTimeProvider, TimeSource};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::ast::{
    AmendmentDecl, Basket, Condition, Covenant, CpChecklistDecl, CpStatus, Define,
    DegradationSchedule, DepreciationDecl, EventDecl, FlipEventDecl, MilestoneDecl,
    PerformanceGuarantee, PhaseDecl, Program, Prohibit, RegulatoryRequirement, ReserveDecl,
    SeasonalAdjustment, Statement, StatementNode, TaxCredit, TaxEquityStructure,
    TechnicalMilestoneDecl, TransitionDecl, WaterfallDecl,
};
use crate::errors::{ProVisoError, Result};
use crate::events::{DealEvent, EventStore};
use crate::value::Value;

use self::covenants::CovenantResult;
use self::finance::{decimal_map, FinancialData, FinancialSnapshot, Period};

/// typed symbol tables, populated once at load and mutated only by
/// amendments
#[derive(Debug, Clone, Default)]
pub struct SymbolTables {
    pub definitions: BTreeMap<String, Define>,
    pub covenants: BTreeMap<String, Covenant>,
    pub baskets: BTreeMap<String, Basket>,
    pub conditions: BTreeMap<String, Condition>,
    pub prohibitions: BTreeMap<String, Prohibit>,
    pub events: BTreeMap<String, EventDecl>,
    pub phases: BTreeMap<String, PhaseDecl>,
    pub transitions: BTreeMap<String, TransitionDecl>,
    pub milestones: BTreeMap<String, MilestoneDecl>,
    pub technical_milestones: BTreeMap<String, TechnicalMilestoneDecl>,
    pub regulatory: BTreeMap<String, RegulatoryRequirement>,
    pub performance_guarantees: BTreeMap<String, PerformanceGuarantee>,
    pub degradation_schedules: BTreeMap<String, DegradationSchedule>,
    pub seasonal_adjustments: BTreeMap<String, SeasonalAdjustment>,
    pub tax_equity_structures: BTreeMap<String, TaxEquityStructure>,
    pub tax_credits: BTreeMap<String, TaxCredit>,
    pub depreciation: BTreeMap<String, DepreciationDecl>,
    pub flip_events: BTreeMap<String, FlipEventDecl>,
    pub reserves: BTreeMap<String, ReserveDecl>,
    pub waterfalls: BTreeMap<String, WaterfallDecl>,
    pub cp_checklists: BTreeMap<String, CpChecklistDecl>,
}

/// basket ledger entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Usage,
    Accumulation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub basket: String,
    pub amount: Decimal,
    pub description: String,
    pub entry_type: LedgerEntryType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseEntry {
    pub phase: String,
    pub entered_at: DateTime<Utc>,
    pub triggered_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CureStatus {
    Open,
    Cured,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CureAttempt {
    pub date: NaiveDate,
    pub mechanism: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CureState {
    pub breach_date: NaiveDate,
    pub cure_deadline: NaiveDate,
    pub status: CureStatus,
    pub attempts: Vec<CureAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegulatoryState {
    pub status: String,
    pub approval_date: Option<NaiveDate>,
}

/// mutable runtime state; commands mutate it, queries never do
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub finance: FinancialData,
    pub satisfied_conditions: BTreeSet<String>,
    pub current_phase: Option<String>,
    pub phase_history: Vec<PhaseEntry>,
    pub basket_utilization: BTreeMap<String, Decimal>,
    pub basket_accumulation: BTreeMap<String, Decimal>,
    pub basket_ledger: Vec<LedgerEntry>,
    pub reserve_balances: BTreeMap<String, Decimal>,
    pub cure_usage: BTreeMap<String, u32>,
    pub cure_states: BTreeMap<String, CureState>,
    pub event_defaults: BTreeSet<String>,
    pub triggered_flips: BTreeMap<String, NaiveDate>,
    pub milestone_achievements: BTreeMap<String, NaiveDate>,
    pub technical_achievements: BTreeMap<String, NaiveDate>,
    pub regulatory_statuses: BTreeMap<String, RegulatoryState>,
    pub cp_statuses: BTreeMap<String, BTreeMap<String, CpStatus>>,
    pub applied_amendments: Vec<AmendmentDecl>,
}

/// single-deal interpreter; one instance per deal, not thread-safe
pub struct Interpreter {
    pub(crate) program: Program,
    pub(crate) symbols: SymbolTables,
    pub(crate) state: RuntimeState,
    pub(crate) events: EventStore,
    pub(crate) time: SafeTimeProvider,
    declared_amendments: Vec<AmendmentDecl>,
}

impl Interpreter {
    pub fn new(program: Program) -> Result<Self> {
        Self::with_time(program, SafeTimeProvider::new(TimeSource::System))
    }

    /// construct with an injected clock; tests pin time with
    /// `TimeSource::Test`
    pub fn with_time(program: Program, time: SafeTimeProvider) -> Result<Self> {
        let mut interpreter = Self {
            program: Program::default(),
            symbols: SymbolTables::default(),
            state: RuntimeState::default(),
            events: EventStore::new(),
            time,
            declared_amendments: Vec::new(),
        };
        for statement in &program.statements {
            interpreter.load_statement(statement)?;
        }
        interpreter.program = program;
        Ok(interpreter)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn events(&self) -> &[DealEvent] {
        self.events.events()
    }

    pub fn take_events(&mut self) -> Vec<DealEvent> {
        self.events.take_events()
    }

    /// amendments declared in the source but not yet applied
    pub fn declared_amendments(&self) -> &[AmendmentDecl] {
        &self.declared_amendments
    }

    pub(crate) fn today(&self) -> NaiveDate {
        self.time.now().date_naive()
    }

    // ------------------------------------------------------------------
    // symbol loading
    // ------------------------------------------------------------------

    /// install one statement into the tables, applying its load-time
    /// side effects
    pub(crate) fn load_statement(&mut self, statement: &Statement) -> Result<()> {
        match &statement.node {
            StatementNode::Define(d) => {
                Self::install(&mut self.symbols.definitions, "definition", &d.name, d.clone());
            }
            StatementNode::Covenant(c) => {
                Self::install(&mut self.symbols.covenants, "covenant", &c.name, c.clone());
            }
            StatementNode::Basket(b) => {
                Self::install(&mut self.symbols.baskets, "basket", &b.name, b.clone());
                self.state
                    .basket_utilization
                    .entry(b.name.clone())
                    .or_insert(Decimal::ZERO);
            }
            StatementNode::Condition(c) => {
                Self::install(&mut self.symbols.conditions, "condition", &c.name, c.clone());
            }
            StatementNode::Prohibit(p) => {
                Self::install(&mut self.symbols.prohibitions, "prohibition", &p.action, p.clone());
            }
            StatementNode::Event(e) => {
                Self::install(&mut self.symbols.events, "event", &e.name, e.clone());
            }
            StatementNode::Phase(p) => {
                // a phase without a FROM clause is the initial phase
                if p.from.is_none() && self.state.current_phase.is_none() {
                    self.state.current_phase = Some(p.name.clone());
                    self.state.phase_history.push(PhaseEntry {
                        phase: p.name.clone(),
                        entered_at: self.time.now(),
                        triggered_by: None,
                    });
                }
                Self::install(&mut self.symbols.phases, "phase", &p.name, p.clone());
            }
            StatementNode::Transition(t) => {
                Self::install(&mut self.symbols.transitions, "transition", &t.name, t.clone());
            }
            StatementNode::Milestone(m) => {
                Self::install(&mut self.symbols.milestones, "milestone", &m.name, m.clone());
            }
            StatementNode::TechnicalMilestone(m) => {
                Self::install(
                    &mut self.symbols.technical_milestones,
                    "technical milestone",
                    &m.name,
                    m.clone(),
                );
            }
            StatementNode::Regulatory(r) => {
                self.state.regulatory_statuses.insert(
                    r.name.clone(),
                    RegulatoryState {
                        status: r.status.clone(),
                        approval_date: r.approval_date,
                    },
                );
                // an approval on the books already satisfies its conditions
                if r.status == "approved" {
                    self.state.satisfied_conditions.insert(r.name.clone());
                    for name in &r.satisfies {
                        self.state.satisfied_conditions.insert(name.clone());
                    }
                }
                Self::install(&mut self.symbols.regulatory, "regulatory requirement", &r.name, r.clone());
            }
            StatementNode::PerformanceGuarantee(p) => {
                Self::install(
                    &mut self.symbols.performance_guarantees,
                    "performance guarantee",
                    &p.name,
                    p.clone(),
                );
            }
            StatementNode::DegradationSchedule(d) => {
                Self::install(
                    &mut self.symbols.degradation_schedules,
                    "degradation schedule",
                    &d.name,
                    d.clone(),
                );
            }
            StatementNode::SeasonalAdjustment(s) => {
                Self::install(
                    &mut self.symbols.seasonal_adjustments,
                    "seasonal adjustment",
                    &s.name,
                    s.clone(),
                );
            }
            StatementNode::TaxEquityStructure(t) => {
                Self::install(
                    &mut self.symbols.tax_equity_structures,
                    "tax equity structure",
                    &t.name,
                    t.clone(),
                );
            }
            StatementNode::TaxCredit(t) => {
                // credits are earned on placement in service
                for name in &t.satisfies {
                    self.state.satisfied_conditions.insert(name.clone());
                }
                Self::install(&mut self.symbols.tax_credits, "tax credit", &t.name, t.clone());
            }
            StatementNode::Depreciation(d) => {
                Self::install(&mut self.symbols.depreciation, "depreciation", &d.name, d.clone());
            }
            StatementNode::FlipEvent(f) => {
                Self::install(&mut self.symbols.flip_events, "flip event", &f.name, f.clone());
            }
            StatementNode::Reserve(r) => {
                self.state
                    .reserve_balances
                    .entry(r.name.clone())
                    .or_insert(Decimal::ZERO);
                Self::install(&mut self.symbols.reserves, "reserve", &r.name, r.clone());
            }
            StatementNode::Waterfall(w) => {
                Self::install(&mut self.symbols.waterfalls, "waterfall", &w.name, w.clone());
            }
            StatementNode::ConditionsPrecedent(cp) => {
                let checklist = self
                    .state
                    .cp_statuses
                    .entry(cp.name.clone())
                    .or_default();
                for item in &cp.items {
                    checklist.insert(item.name.clone(), item.status);
                }
                Self::install(&mut self.symbols.cp_checklists, "conditions precedent", &cp.name, cp.clone());
            }
            StatementNode::Amendment(a) => {
                self.declared_amendments.push(a.clone());
            }
            StatementNode::Load(l) => {
                let mut values = BTreeMap::new();
                for (name, expr) in &l.entries {
                    let value = self.eval_literal(expr)?;
                    values.insert(name.clone(), value);
                }
                match &l.period {
                    Some(header) => self.state.finance.add_period(Period {
                        period: header.period.clone(),
                        period_end: header.period_end,
                        period_type: header.period_type,
                        data: values,
                    }),
                    None => self.state.finance.merge_simple(values),
                }
            }
        }
        Ok(())
    }

    fn install<T>(table: &mut BTreeMap<String, T>, kind: &str, name: &str, item: T) {
        if table.insert(name.to_string(), item).is_some() {
            warn!(kind, name, "duplicate declaration; last write wins");
        }
    }

    /// literal-only arithmetic for inline LOAD entries
    fn eval_literal(&self, expr: &crate::ast::Expression) -> Result<Decimal> {
        use crate::ast::{BinaryOp, Expression, UnaryOp};
        let value = match expr {
            Expression::Number(n) => Value::from_decimal(*n),
            Expression::Currency(n) => Value::from_decimal(*n),
            Expression::Percentage(p) => Value::from_percent(*p),
            Expression::Ratio(r) => Value::from_decimal(*r),
            Expression::Unary { op: UnaryOp::Neg, operand } => {
                -Value::from_decimal(self.eval_literal(operand)?)
            }
            Expression::Binary { op, left, right } => {
                let l = Value::from_decimal(self.eval_literal(left)?);
                let r = Value::from_decimal(self.eval_literal(right)?);
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    _ => {
                        return Err(ProVisoError::FinancialData {
                            message: format!("inline data entries must be numeric: {}", expr),
                        });
                    }
                }
            }
            other => {
                return Err(ProVisoError::FinancialData {
                    message: format!("inline data entries must be numeric: {}", other),
                });
            }
        };
        value.as_decimal().ok_or_else(|| ProVisoError::FinancialData {
            message: format!("inline data entry is not finite: {}", expr),
        })
    }

    // ------------------------------------------------------------------
    // financial data
    // ------------------------------------------------------------------

    pub fn load_financials(&mut self, snapshot: FinancialSnapshot) -> Result<()> {
        match snapshot {
            FinancialSnapshot::Simple(values) => {
                self.state.finance.merge_simple(decimal_map(values)?);
            }
            FinancialSnapshot::MultiPeriod { periods } => {
                for p in periods {
                    self.state.finance.add_period(Period {
                        period: p.period,
                        period_end: p.period_end,
                        period_type: p.period_type,
                        data: decimal_map(p.data)?,
                    });
                }
            }
        }
        Ok(())
    }

    /// parse and load a json snapshot, either shape
    pub fn load_financials_json(&mut self, json: &str) -> Result<()> {
        let snapshot: FinancialSnapshot =
            serde_json::from_str(json).map_err(|e| ProVisoError::FinancialData {
                message: e.to_string(),
            })?;
        self.load_financials(snapshot)
    }

    pub fn set_evaluation_period(&mut self, period: &str) -> Result<()> {
        self.state.finance.set_evaluation_period(period)
    }

    pub fn evaluation_period(&self) -> Option<&str> {
        self.state.finance.evaluation_period()
    }

    pub fn available_periods(&self) -> Vec<String> {
        self.state.finance.available_periods()
    }

    // ------------------------------------------------------------------
    // simulation
    // ------------------------------------------------------------------

    /// run covenant checks against adjusted financials, restoring the
    /// snapshot on every exit path
    pub fn simulate(&mut self, changes: &[(String, Adjustment)]) -> Result<SimulationResult> {
        let snapshot = self.state.finance.clone();
        let outcome = self.run_simulation(changes);
        self.state.finance = snapshot;
        outcome
    }

    fn run_simulation(&mut self, changes: &[(String, Adjustment)]) -> Result<SimulationResult> {
        let mut applied = Vec::new();
        for (name, adjustment) in changes {
            let before = self.state.finance.lookup(name, None);
            let after = match adjustment {
                Adjustment::Set(v) => {
                    let value = decimal_from_f64(*v, name)?;
                    self.state.finance.set(name, value);
                    value
                }
                Adjustment::Add(delta) => {
                    let delta = decimal_from_f64(*delta, name)?;
                    self.state.finance.adjust(name, delta);
                    before.unwrap_or(Decimal::ZERO) + delta
                }
            };
            applied.push(AppliedChange {
                name: name.clone(),
                before,
                after,
            });
        }
        let covenants = self.check_all_covenants()?;
        Ok(SimulationResult {
            changes: applied,
            covenants,
        })
    }

    // ------------------------------------------------------------------
    // events of default
    // ------------------------------------------------------------------

    pub fn set_event_default(&mut self, event: &str) -> Result<()> {
        if !self.symbols.events.contains_key(event) {
            return Err(ProVisoError::UnknownSymbol {
                kind: "event",
                name: event.to_string(),
            });
        }
        self.state.event_defaults.insert(event.to_string());
        self.events.emit(DealEvent::EventOfDefaultSet {
            event: event.to_string(),
            timestamp: self.time.now(),
        });
        Ok(())
    }

    pub fn clear_event_default(&mut self, event: &str) -> Result<()> {
        if !self.state.event_defaults.remove(event) {
            return Err(ProVisoError::UnknownSymbol {
                kind: "event",
                name: event.to_string(),
            });
        }
        self.events.emit(DealEvent::EventOfDefaultCleared {
            event: event.to_string(),
            timestamp: self.time.now(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // aggregate status
    // ------------------------------------------------------------------

    /// one-call summary assembled from the pure queries
    pub fn status(&self) -> Result<DealStatus> {
        let covenants = self.check_all_covenants()?;
        let compliant_count = covenants.iter().filter(|c| c.compliant).count();
        let breached_count = covenants.len() - compliant_count;

        let mut baskets = Vec::new();
        for name in self.symbols.baskets.keys() {
            baskets.push(self.basket_status(name)?);
        }
        let mut reserves = Vec::new();
        for name in self.symbols.reserves.keys() {
            reserves.push(self.reserve_status(name)?);
        }

        let milestones_total = self.symbols.milestones.len();
        let milestones_achieved = self
            .symbols
            .milestones
            .keys()
            .filter(|name| self.state.milestone_achievements.contains_key(*name))
            .count();

        let mut cp_total = 0;
        let mut cp_satisfied = 0;
        for checklist in self.state.cp_statuses.values() {
            for status in checklist.values() {
                cp_total += 1;
                if matches!(status, CpStatus::Satisfied | CpStatus::Waived) {
                    cp_satisfied += 1;
                }
            }
        }

        Ok(DealStatus {
            current_phase: self.state.current_phase.clone(),
            evaluation_period: self.evaluation_period().map(str::to_string),
            compliant_count,
            breached_count,
            covenants,
            baskets,
            reserves,
            milestones_achieved,
            milestones_total,
            cp_satisfied,
            cp_total,
            events_of_default: self.state.event_defaults.iter().cloned().collect(),
        })
    }
}

fn decimal_from_f64(v: f64, name: &str) -> Result<Decimal> {
    use rust_decimal::prelude::FromPrimitive;
    Decimal::from_f64(v).ok_or_else(|| ProVisoError::FinancialData {
        message: format!("value for {} is not a finite number", name),
    })
}

/// simulation input: overwrite or shift a metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    Set(f64),
    Add(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedChange {
    pub name: String,
    pub before: Option<Decimal>,
    pub after: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub changes: Vec<AppliedChange>,
    pub covenants: Vec<CovenantResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealStatus {
    pub current_phase: Option<String>,
    pub evaluation_period: Option<String>,
    pub compliant_count: usize,
    pub breached_count: usize,
    pub covenants: Vec<CovenantResult>,
    pub baskets: Vec<baskets::BasketStatus>,
    pub reserves: Vec<reserves::ReserveStatus>,
    pub milestones_achieved: usize,
    pub milestones_total: usize,
    pub cp_satisfied: usize,
    pub cp_total: usize,
    pub events_of_default: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::value::Value;
    use rust_decimal_macros::dec;

    fn interp(source: &str, json: &str) -> Interpreter {
        let mut i = Interpreter::new(parse(source).unwrap()).unwrap();
        if !json.is_empty() {
            i.load_financials_json(json).unwrap();
        }
        i
    }

    const DEAL: &str = "\
        DEFINE Leverage = TotalDebt / EBITDA\n\
        COVENANT MaxLeverage REQUIRES Leverage <= 5.00 TESTED QUARTERLY\n\
        BASKET GeneralInvestments CAPACITY GreaterOf($25_000_000, 10% * EBITDA)";

    #[test]
    fn test_scenario_leverage_breach_basket_tight() {
        let i = interp(DEAL, r#"{"TotalDebt": 200000000, "EBITDA": 36000000}"#);

        let result = i.check_covenant("MaxLeverage").unwrap();
        assert!(!result.compliant);
        assert_eq!(result.actual.as_decimal().unwrap().round_dp(3), dec!(5.556));
        assert_eq!(result.threshold, Value::from_decimal(dec!(5.00)));
        assert_eq!(
            result.headroom.unwrap().as_decimal().unwrap().round_dp(3),
            dec!(-0.556)
        );

        // 10% of 36M is 3.6M; the floor wins
        let basket = i.basket_status("GeneralInvestments").unwrap();
        assert_eq!(basket.capacity, Value::from_int(25_000_000));
    }

    #[test]
    fn test_scenario_simulate_acquisition_is_neutral() {
        let source = "\
            DEFINE Leverage = (TotalDebt + SeniorDebt) / EBITDA\n\
            COVENANT MaxLeverage REQUIRES Leverage <= 5.00";
        let mut i = interp(
            source,
            r#"{"TotalDebt": 200000000, "SeniorDebt": 0, "EBITDA": 40000000}"#,
        );
        let before = i.check_covenant("MaxLeverage").unwrap();
        assert!(before.compliant);

        let simulated = i
            .simulate(&[("SeniorDebt".to_string(), Adjustment::Add(20_000_000.0))])
            .unwrap();
        let max_leverage = &simulated.covenants[0];
        assert!(!max_leverage.compliant);
        assert_eq!(max_leverage.actual, Value::from_decimal(dec!(5.5)));

        // the main state is untouched
        let after = i.check_covenant("MaxLeverage").unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn test_scenario_simulate_restores_on_error() {
        let mut i = interp(
            "DEFINE Leverage = TotalDebt / EBITDA\n\
             COVENANT MaxLeverage REQUIRES Leverage <= 5.00\n\
             COVENANT Broken REQUIRES MissingMetric <= 1.00",
            r#"{"TotalDebt": 100000000, "EBITDA": 40000000}"#,
        );
        let err = i
            .simulate(&[("TotalDebt".to_string(), Adjustment::Add(1_000_000.0))])
            .unwrap_err();
        assert!(matches!(err, ProVisoError::UndefinedIdentifier { .. }));
        // snapshot restored despite the mid-flight failure
        assert_eq!(
            i.state.finance.lookup("TotalDebt", None),
            Some(dec!(100000000))
        );
    }

    #[test]
    fn test_scenario_cure_lifecycle() {
        let source = "\
            DEFINE Leverage = TotalDebt / EBITDA\n\
            COVENANT MaxLeverage REQUIRES Leverage <= 5.00\n\
              CURE EquityCure MAX_USES 2 OVER \"rolling 4 quarters\" MAX_AMOUNT $25_000_000";
        let mut i = interp(source, r#"{"TotalDebt": 200000000, "EBITDA": 36000000}"#);

        assert!(i.can_apply_cure("MaxLeverage").unwrap());
        assert!(i.apply_cure("MaxLeverage", dec!(10000000)).unwrap().success);
        assert!(i.apply_cure("MaxLeverage", dec!(10000000)).unwrap().success);
        let third = i.apply_cure("MaxLeverage", dec!(10000000)).unwrap();
        assert!(!third.success);
        assert_eq!(third.reason.as_deref(), Some("No cure uses remaining"));
    }

    #[test]
    fn test_inline_load_statements() {
        let source = "\
            DEFINE Leverage = TotalDebt / EBITDA\n\
            LOAD PERIOD \"2024-Q3\" ENDING 2024-09-30 QUARTERLY\n\
              TotalDebt = 200_000_000, EBITDA = 36_000_000\n\
            LOAD PERIOD \"2024-Q4\" ENDING 2024-12-31 QUARTERLY\n\
              TotalDebt = 200_000_000, EBITDA = 40_000_000";
        let i = interp(source, "");
        assert_eq!(i.available_periods(), vec!["2024-Q3", "2024-Q4"]);
        assert_eq!(i.evaluation_period(), Some("2024-Q4"));
        let v = i.evaluate(&crate::ast::Expression::ident("Leverage")).unwrap();
        assert_eq!(v, Value::from_decimal(dec!(5)));
    }

    #[test]
    fn test_status_summary() {
        let source = "\
            DEFINE Leverage = TotalDebt / EBITDA\n\
            COVENANT MaxLeverage REQUIRES Leverage <= 5.00\n\
            BASKET GeneralInvestments CAPACITY $25_000_000\n\
            RESERVE DSRA TARGET $30_000_000\n\
            EVENT PaymentDefault\n\
            MILESTONE COD TARGET 2025-06-30";
        let mut i = interp(source, r#"{"TotalDebt": 120000000, "EBITDA": 40000000}"#);
        i.set_event_default("PaymentDefault").unwrap();

        let status = i.status().unwrap();
        assert_eq!(status.compliant_count, 1);
        assert_eq!(status.breached_count, 0);
        assert_eq!(status.baskets.len(), 1);
        assert_eq!(status.reserves.len(), 1);
        assert_eq!(status.milestones_total, 1);
        assert_eq!(status.milestones_achieved, 0);
        assert_eq!(status.events_of_default, vec!["PaymentDefault".to_string()]);
    }

    #[test]
    fn test_duplicate_declaration_last_write_wins() {
        let source = "\
            COVENANT MaxLeverage REQUIRES Leverage <= 5.00\n\
            COVENANT MaxLeverage REQUIRES Leverage <= 4.00\n\
            DEFINE Leverage = TotalDebt / EBITDA";
        let i = interp(source, r#"{"TotalDebt": 180000000, "EBITDA": 40000000}"#);
        let result = i.check_covenant("MaxLeverage").unwrap();
        assert_eq!(result.threshold, Value::from_decimal(dec!(4.00)));
    }
}
