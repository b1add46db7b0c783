use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::token::Span;

/// a parsed agreement: an ordered sequence of statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

/// one agreement statement with its source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub span: Span,
    pub node: StatementNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementNode {
    Define(Define),
    Covenant(Covenant),
    Basket(Basket),
    Condition(Condition),
    Prohibit(Prohibit),
    Event(EventDecl),
    Phase(PhaseDecl),
    Transition(TransitionDecl),
    Milestone(MilestoneDecl),
    TechnicalMilestone(TechnicalMilestoneDecl),
    Regulatory(RegulatoryRequirement),
    PerformanceGuarantee(PerformanceGuarantee),
    DegradationSchedule(DegradationSchedule),
    SeasonalAdjustment(SeasonalAdjustment),
    TaxEquityStructure(TaxEquityStructure),
    TaxCredit(TaxCredit),
    Depreciation(DepreciationDecl),
    FlipEvent(FlipEventDecl),
    Reserve(ReserveDecl),
    Waterfall(WaterfallDecl),
    ConditionsPrecedent(CpChecklistDecl),
    Amendment(AmendmentDecl),
    Load(LoadDecl),
}

impl StatementNode {
    /// name of the declared element, if the statement declares one
    pub fn element_name(&self) -> Option<&str> {
        match self {
            StatementNode::Define(d) => Some(&d.name),
            StatementNode::Covenant(c) => Some(&c.name),
            StatementNode::Basket(b) => Some(&b.name),
            StatementNode::Condition(c) => Some(&c.name),
            StatementNode::Prohibit(p) => Some(&p.action),
            StatementNode::Event(e) => Some(&e.name),
            StatementNode::Phase(p) => Some(&p.name),
            StatementNode::Transition(t) => Some(&t.name),
            StatementNode::Milestone(m) => Some(&m.name),
            StatementNode::TechnicalMilestone(m) => Some(&m.name),
            StatementNode::Regulatory(r) => Some(&r.name),
            StatementNode::PerformanceGuarantee(p) => Some(&p.name),
            StatementNode::DegradationSchedule(d) => Some(&d.name),
            StatementNode::SeasonalAdjustment(s) => Some(&s.name),
            StatementNode::TaxEquityStructure(t) => Some(&t.name),
            StatementNode::TaxCredit(t) => Some(&t.name),
            StatementNode::Depreciation(d) => Some(&d.name),
            StatementNode::FlipEvent(f) => Some(&f.name),
            StatementNode::Reserve(r) => Some(&r.name),
            StatementNode::Waterfall(w) => Some(&w.name),
            StatementNode::ConditionsPrecedent(c) => Some(&c.name),
            StatementNode::Amendment(_) => None,
            StatementNode::Load(_) => None,
        }
    }

    pub fn element_kind(&self) -> ElementKind {
        match self {
            StatementNode::Define(_) => ElementKind::Define,
            StatementNode::Covenant(_) => ElementKind::Covenant,
            StatementNode::Basket(_) => ElementKind::Basket,
            StatementNode::Condition(_) => ElementKind::Condition,
            StatementNode::Prohibit(_) => ElementKind::Prohibit,
            StatementNode::Event(_) => ElementKind::Event,
            StatementNode::Phase(_) => ElementKind::Phase,
            StatementNode::Transition(_) => ElementKind::Transition,
            StatementNode::Milestone(_) => ElementKind::Milestone,
            StatementNode::TechnicalMilestone(_) => ElementKind::TechnicalMilestone,
            StatementNode::Regulatory(_) => ElementKind::Regulatory,
            StatementNode::PerformanceGuarantee(_) => ElementKind::PerformanceGuarantee,
            StatementNode::DegradationSchedule(_) => ElementKind::DegradationSchedule,
            StatementNode::SeasonalAdjustment(_) => ElementKind::SeasonalAdjustment,
            StatementNode::TaxEquityStructure(_) => ElementKind::TaxEquityStructure,
            StatementNode::TaxCredit(_) => ElementKind::TaxCredit,
            StatementNode::Depreciation(_) => ElementKind::Depreciation,
            StatementNode::FlipEvent(_) => ElementKind::FlipEvent,
            StatementNode::Reserve(_) => ElementKind::Reserve,
            StatementNode::Waterfall(_) => ElementKind::Waterfall,
            StatementNode::ConditionsPrecedent(_) => ElementKind::ConditionsPrecedent,
            StatementNode::Amendment(_) => ElementKind::Amendment,
            StatementNode::Load(_) => ElementKind::Load,
        }
    }
}

/// statement kind tag used by amendments, prose sections, and redlines
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementKind {
    Define,
    Covenant,
    Basket,
    Condition,
    Prohibit,
    Event,
    Phase,
    Transition,
    Milestone,
    TechnicalMilestone,
    Regulatory,
    PerformanceGuarantee,
    DegradationSchedule,
    SeasonalAdjustment,
    TaxEquityStructure,
    TaxCredit,
    Depreciation,
    FlipEvent,
    Reserve,
    Waterfall,
    ConditionsPrecedent,
    Amendment,
    Load,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ElementKind::Define => "definition",
            ElementKind::Covenant => "covenant",
            ElementKind::Basket => "basket",
            ElementKind::Condition => "condition",
            ElementKind::Prohibit => "prohibition",
            ElementKind::Event => "event",
            ElementKind::Phase => "phase",
            ElementKind::Transition => "transition",
            ElementKind::Milestone => "milestone",
            ElementKind::TechnicalMilestone => "technical milestone",
            ElementKind::Regulatory => "regulatory requirement",
            ElementKind::PerformanceGuarantee => "performance guarantee",
            ElementKind::DegradationSchedule => "degradation schedule",
            ElementKind::SeasonalAdjustment => "seasonal adjustment",
            ElementKind::TaxEquityStructure => "tax equity structure",
            ElementKind::TaxCredit => "tax credit",
            ElementKind::Depreciation => "depreciation",
            ElementKind::FlipEvent => "flip event",
            ElementKind::Reserve => "reserve",
            ElementKind::Waterfall => "waterfall",
            ElementKind::ConditionsPrecedent => "conditions precedent",
            ElementKind::Amendment => "amendment",
            ElementKind::Load => "load",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Le,
    Ge,
    Lt,
    Gt,
    Eq,
    Ne,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailingUnit {
    Quarters,
    Months,
    Years,
}

impl fmt::Display for TrailingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrailingUnit::Quarters => "quarters",
            TrailingUnit::Months => "months",
            TrailingUnit::Years => "years",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Number(Decimal),
    /// dollar amount
    Currency(Decimal),
    /// raw percent; semantically value/100
    Percentage(Decimal),
    Ratio(Decimal),
    DateLiteral(NaiveDate),
    Str(String),
    Identifier(String),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Comparison {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    Trailing {
        count: u32,
        unit: TrailingUnit,
        expr: Box<Expression>,
    },
}

impl Expression {
    pub fn is_comparison(&self) -> bool {
        matches!(self, Expression::Comparison { .. })
    }

    pub fn ident(name: &str) -> Expression {
        Expression::Identifier(name.to_string())
    }

    /// binding strength, loosest first; used by Display for parentheses
    fn precedence(&self) -> u8 {
        match self {
            Expression::Binary { op: BinaryOp::Or, .. } => 1,
            Expression::Binary { op: BinaryOp::And, .. } => 2,
            Expression::Comparison { .. } => 3,
            Expression::Binary { op: BinaryOp::Add | BinaryOp::Sub, .. } => 4,
            Expression::Binary { .. } => 5,
            Expression::Unary { .. } => 6,
            _ => 7,
        }
    }

    fn fmt_child(&self, child: &Expression, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if child.precedence() < self.precedence() {
            write!(f, "({})", child)
        } else {
            write!(f, "{}", child)
        }
    }
}

impl fmt::Display for Expression {
    /// canonical source-like rendering; deterministic for a fixed AST
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Number(n) => write!(f, "{}", n),
            Expression::Currency(n) => write!(f, "${}", n),
            Expression::Percentage(p) => write!(f, "{}%", p),
            Expression::Ratio(r) => write!(f, "{}x", r),
            Expression::DateLiteral(d) => write!(f, "{}", d),
            Expression::Str(s) => write!(f, "\"{}\"", s),
            Expression::Identifier(name) => write!(f, "{}", name),
            Expression::Binary { op, left, right } => {
                self.fmt_child(left, f)?;
                write!(f, " {} ", op)?;
                self.fmt_child(right, f)
            }
            Expression::Unary { op, operand } => {
                match op {
                    UnaryOp::Neg => write!(f, "-")?,
                    UnaryOp::Not => write!(f, "NOT ")?,
                }
                self.fmt_child(operand, f)
            }
            Expression::Comparison { op, left, right } => {
                self.fmt_child(left, f)?;
                write!(f, " {} ", op)?;
                self.fmt_child(right, f)
            }
            Expression::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::Trailing { count, unit, expr } => {
                let unit = match unit {
                    TrailingUnit::Quarters => "QUARTERS",
                    TrailingUnit::Months => "MONTHS",
                    TrailingUnit::Years => "YEARS",
                };
                write!(f, "TRAILING {} {} OF ", count, unit)?;
                self.fmt_child(expr, f)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// statement payloads
// ---------------------------------------------------------------------------

/// `DEFINE Name = expr [EXCLUDING a, b] [CAP expr]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Define {
    pub name: String,
    pub expr: Expression,
    pub excluding: Vec<String>,
    pub cap: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestFrequency {
    Quarterly,
    Monthly,
    Annually,
}

impl fmt::Display for TestFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestFrequency::Quarterly => "quarterly",
            TestFrequency::Monthly => "monthly",
            TestFrequency::Annually => "annually",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CureUnit {
    Days,
    Months,
    Years,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurePeriod {
    pub unit: CureUnit,
    pub amount: u32,
}

/// cure right attached to a covenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CureSpec {
    pub mechanism: String,
    pub max_uses: Option<u32>,
    pub over_period: Option<String>,
    pub max_amount: Option<Expression>,
    pub cure_period: Option<CurePeriod>,
}

/// one leg of a stepped threshold schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdStep {
    pub op: CompareOp,
    pub threshold: Expression,
    pub until: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covenant {
    pub name: String,
    pub requires: Expression,
    /// stepped thresholds; empty when the requirement has a single leg
    pub schedule: Vec<ThresholdStep>,
    pub tested: Option<TestFrequency>,
    pub cure: Option<CureSpec>,
    pub breach: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    pub name: String,
    pub capacity: Option<Expression>,
    pub floor: Option<Expression>,
    pub plus: Vec<Expression>,
    pub builds_from: Option<Expression>,
    pub starting: Option<Expression>,
    pub maximum: Option<Expression>,
    pub subject_to: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    pub expr: Expression,
}

/// one `EXCEPT WHEN c1 AND c2 ...` clause; all conditions must pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptWhen {
    pub conditions: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prohibit {
    pub action: String,
    pub exceptions: Vec<ExceptWhen>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDecl {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDecl {
    pub name: String,
    pub from: Option<String>,
    pub until: Option<String>,
    pub covenants_suspended: Vec<String>,
    pub covenants_active: Vec<String>,
    pub required_covenants: Vec<String>,
}

/// transition / prerequisite trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    AllOf(Vec<String>),
    AnyOf(Vec<String>),
    Expr(Expression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDecl {
    pub name: String,
    pub when: Trigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneDecl {
    pub name: String,
    pub target_date: Option<NaiveDate>,
    pub longstop_date: Option<NaiveDate>,
    pub triggers: Vec<String>,
    pub requires: Option<Trigger>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalMilestoneDecl {
    pub name: String,
    pub measurement: String,
    pub target_value: Expression,
    pub current_value: Option<Expression>,
    pub progress_metric: Option<String>,
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryRequirement {
    pub name: String,
    pub agency: String,
    pub requirement_type: String,
    pub description: Option<String>,
    pub required_for: Option<String>,
    pub status: String,
    pub approval_date: Option<NaiveDate>,
    pub satisfies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceGuarantee {
    pub name: String,
    pub metric: String,
    pub p50: Option<Expression>,
    pub p75: Option<Expression>,
    pub p90: Option<Expression>,
    pub p99: Option<Expression>,
    pub actual_value: Option<Expression>,
    pub shortfall_rate: Option<Expression>,
    pub guarantee_period: String,
    pub insurance_coverage: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationSchedule {
    pub name: String,
    pub annual_rate: Expression,
    pub applies_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalAdjustment {
    pub name: String,
    pub q1: Expression,
    pub q2: Expression,
    pub q3: Expression,
    pub q4: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxEquityStructure {
    pub name: String,
    pub investor: Option<String>,
    pub sponsor: Option<String>,
    pub investor_share: Option<Expression>,
    pub post_flip_share: Option<Expression>,
    pub target_return: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxCredit {
    pub name: String,
    pub credit_type: String,
    pub rate: Option<Expression>,
    pub basis: Option<Expression>,
    pub satisfies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepreciationDecl {
    pub name: String,
    pub method: String,
    pub period_years: u32,
    pub basis: Option<Expression>,
    pub bonus_rate: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipEventDecl {
    pub name: String,
    pub when: Trigger,
    pub pre_flip: Option<Expression>,
    pub post_flip: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveDecl {
    pub name: String,
    pub target: Option<Expression>,
    pub minimum: Option<Expression>,
    pub funded_by: Option<String>,
    pub released_for: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallTier {
    pub priority: u32,
    /// gate; tier is blocked when this evaluates false
    pub condition: Option<Expression>,
    pub pay_amount: Option<Expression>,
    pub pay_to: Option<String>,
    /// target-balance predicate for pay_to tiers; comparison or bare target
    pub until: Option<Expression>,
    pub shortfall_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallDecl {
    pub name: String,
    pub tiers: Vec<WaterfallTier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpStatus {
    Pending,
    Satisfied,
    Waived,
}

impl fmt::Display for CpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CpStatus::Pending => "pending",
            CpStatus::Satisfied => "satisfied",
            CpStatus::Waived => "waived",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpItem {
    pub name: String,
    pub description: Option<String>,
    pub responsible: Option<String>,
    pub satisfies: Vec<String>,
    pub status: CpStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpChecklistDecl {
    pub name: String,
    pub section: Option<String>,
    pub items: Vec<CpItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModValue {
    Expr(Expression),
    Frequency(TestFrequency),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub field: String,
    pub value: ModValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Directive {
    Replace {
        kind: ElementKind,
        name: String,
        replacement: Box<Statement>,
    },
    Add {
        statement: Box<Statement>,
    },
    Delete {
        kind: ElementKind,
        name: String,
    },
    Modify {
        kind: ElementKind,
        name: String,
        changes: Vec<Modification>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendmentDecl {
    pub number: u32,
    pub effective: NaiveDate,
    pub description: String,
    pub directives: Vec<Directive>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Quarterly,
    Monthly,
    Annual,
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeriodType::Quarterly => "quarterly",
            PeriodType::Monthly => "monthly",
            PeriodType::Annual => "annual",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadPeriod {
    pub period: String,
    pub period_end: NaiveDate,
    pub period_type: PeriodType,
}

/// inline financial data; a period header promotes multi-period mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadDecl {
    pub period: Option<LoadPeriod>,
    pub entries: Vec<(String, Expression)>,
}
