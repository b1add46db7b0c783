use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// byte range of a token in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// reserved words of the agreement language
///
/// Keywords are case-sensitive uppercase. An uppercase word that is not
/// in this table (EBITDA, DSRA, COD) lexes as an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    // definitions
    Define,
    Excluding,
    Cap,
    Trailing,
    Quarters,
    Months,
    Years,
    Of,
    // covenants
    Covenant,
    Requires,
    Tested,
    Quarterly,
    Monthly,
    Annually,
    Cure,
    MaxUses,
    Over,
    MaxAmount,
    CurePeriod,
    Days,
    Breach,
    // baskets
    Basket,
    Capacity,
    Floor,
    Plus,
    BuildsFrom,
    Starting,
    Maximum,
    SubjectTo,
    // conditions and prohibitions
    Condition,
    Prohibit,
    Except,
    When,
    Event,
    // phases and transitions
    Phase,
    From,
    Until,
    Then,
    Suspends,
    Activates,
    Transition,
    AllOf,
    AnyOf,
    // milestones
    Milestone,
    Target,
    Longstop,
    Triggers,
    TechnicalMilestone,
    Measurement,
    TargetValue,
    CurrentValue,
    ProgressMetric,
    // regulatory
    Regulatory,
    Agency,
    Type,
    Description,
    RequiredFor,
    Status,
    ApprovalDate,
    Satisfies,
    // performance
    PerformanceGuarantee,
    Metric,
    P50,
    P75,
    P90,
    P99,
    Actual,
    ShortfallRate,
    GuaranteePeriod,
    Insurance,
    DegradationSchedule,
    AnnualRate,
    AppliesTo,
    SeasonalAdjustment,
    Q1,
    Q2,
    Q3,
    Q4,
    // tax equity
    TaxEquityStructure,
    Investor,
    Sponsor,
    InvestorShare,
    PostFlipShare,
    TargetReturn,
    TaxCredit,
    Rate,
    Basis,
    Depreciation,
    Method,
    Period,
    BonusRate,
    FlipEvent,
    PreFlip,
    PostFlip,
    // reserves and waterfalls
    Reserve,
    Minimum,
    FundedBy,
    ReleasedFor,
    Waterfall,
    Tier,
    If,
    Pay,
    PayTo,
    ShortfallFrom,
    // conditions precedent
    ConditionsPrecedent,
    Section,
    Item,
    Responsible,
    // amendments
    Amendment,
    Effective,
    Replace,
    With,
    Add,
    Delete,
    Modify,
    Set,
    // financial data
    Load,
    Ending,
    Annual,
    // logical operators
    And,
    Or,
    Not,
}

impl Keyword {
    pub fn lookup(word: &str) -> Option<Keyword> {
        let kw = match word {
            "DEFINE" => Keyword::Define,
            "EXCLUDING" => Keyword::Excluding,
            "CAP" => Keyword::Cap,
            "TRAILING" => Keyword::Trailing,
            "QUARTERS" => Keyword::Quarters,
            "MONTHS" => Keyword::Months,
            "YEARS" => Keyword::Years,
            "OF" => Keyword::Of,
            "COVENANT" => Keyword::Covenant,
            "REQUIRES" => Keyword::Requires,
            "TESTED" => Keyword::Tested,
            "QUARTERLY" => Keyword::Quarterly,
            "MONTHLY" => Keyword::Monthly,
            "ANNUALLY" => Keyword::Annually,
            "CURE" => Keyword::Cure,
            "MAX_USES" => Keyword::MaxUses,
            "OVER" => Keyword::Over,
            "MAX_AMOUNT" => Keyword::MaxAmount,
            "CURE_PERIOD" => Keyword::CurePeriod,
            "DAYS" => Keyword::Days,
            "BREACH" => Keyword::Breach,
            "BASKET" => Keyword::Basket,
            "CAPACITY" => Keyword::Capacity,
            "FLOOR" => Keyword::Floor,
            "PLUS" => Keyword::Plus,
            "BUILDS_FROM" => Keyword::BuildsFrom,
            "STARTING" => Keyword::Starting,
            "MAXIMUM" => Keyword::Maximum,
            "SUBJECT_TO" => Keyword::SubjectTo,
            "CONDITION" => Keyword::Condition,
            "PROHIBIT" => Keyword::Prohibit,
            "EXCEPT" => Keyword::Except,
            "WHEN" => Keyword::When,
            "EVENT" => Keyword::Event,
            "PHASE" => Keyword::Phase,
            "FROM" => Keyword::From,
            "UNTIL" => Keyword::Until,
            "THEN" => Keyword::Then,
            "SUSPENDS" => Keyword::Suspends,
            "ACTIVATES" => Keyword::Activates,
            "TRANSITION" => Keyword::Transition,
            "ALL_OF" => Keyword::AllOf,
            "ANY_OF" => Keyword::AnyOf,
            "MILESTONE" => Keyword::Milestone,
            "TARGET" => Keyword::Target,
            "LONGSTOP" => Keyword::Longstop,
            "TRIGGERS" => Keyword::Triggers,
            "TECHNICAL_MILESTONE" => Keyword::TechnicalMilestone,
            "MEASUREMENT" => Keyword::Measurement,
            "TARGET_VALUE" => Keyword::TargetValue,
            "CURRENT_VALUE" => Keyword::CurrentValue,
            "PROGRESS_METRIC" => Keyword::ProgressMetric,
            "REGULATORY" => Keyword::Regulatory,
            "AGENCY" => Keyword::Agency,
            "TYPE" => Keyword::Type,
            "DESCRIPTION" => Keyword::Description,
            "REQUIRED_FOR" => Keyword::RequiredFor,
            "STATUS" => Keyword::Status,
            "APPROVAL_DATE" => Keyword::ApprovalDate,
            "SATISFIES" => Keyword::Satisfies,
            "PERFORMANCE_GUARANTEE" => Keyword::PerformanceGuarantee,
            "METRIC" => Keyword::Metric,
            "P50" => Keyword::P50,
            "P75" => Keyword::P75,
            "P90" => Keyword::P90,
            "P99" => Keyword::P99,
            "ACTUAL" => Keyword::Actual,
            "SHORTFALL_RATE" => Keyword::ShortfallRate,
            "GUARANTEE_PERIOD" => Keyword::GuaranteePeriod,
            "INSURANCE" => Keyword::Insurance,
            "DEGRADATION_SCHEDULE" => Keyword::DegradationSchedule,
            "ANNUAL_RATE" => Keyword::AnnualRate,
            "APPLIES_TO" => Keyword::AppliesTo,
            "SEASONAL_ADJUSTMENT" => Keyword::SeasonalAdjustment,
            "Q1" => Keyword::Q1,
            "Q2" => Keyword::Q2,
            "Q3" => Keyword::Q3,
            "Q4" => Keyword::Q4,
            "TAX_EQUITY_STRUCTURE" => Keyword::TaxEquityStructure,
            "INVESTOR" => Keyword::Investor,
            "SPONSOR" => Keyword::Sponsor,
            "INVESTOR_SHARE" => Keyword::InvestorShare,
            "POST_FLIP_SHARE" => Keyword::PostFlipShare,
            "TARGET_RETURN" => Keyword::TargetReturn,
            "TAX_CREDIT" => Keyword::TaxCredit,
            "RATE" => Keyword::Rate,
            "BASIS" => Keyword::Basis,
            "DEPRECIATION" => Keyword::Depreciation,
            "METHOD" => Keyword::Method,
            "PERIOD" => Keyword::Period,
            "BONUS_RATE" => Keyword::BonusRate,
            "FLIP_EVENT" => Keyword::FlipEvent,
            "PRE_FLIP" => Keyword::PreFlip,
            "POST_FLIP" => Keyword::PostFlip,
            "RESERVE" => Keyword::Reserve,
            "MINIMUM" => Keyword::Minimum,
            "FUNDED_BY" => Keyword::FundedBy,
            "RELEASED_FOR" => Keyword::ReleasedFor,
            "WATERFALL" => Keyword::Waterfall,
            "TIER" => Keyword::Tier,
            "IF" => Keyword::If,
            "PAY" => Keyword::Pay,
            "PAY_TO" => Keyword::PayTo,
            "SHORTFALL_FROM" => Keyword::ShortfallFrom,
            "CONDITIONS_PRECEDENT" => Keyword::ConditionsPrecedent,
            "SECTION" => Keyword::Section,
            "ITEM" => Keyword::Item,
            "RESPONSIBLE" => Keyword::Responsible,
            "AMENDMENT" => Keyword::Amendment,
            "EFFECTIVE" => Keyword::Effective,
            "REPLACE" => Keyword::Replace,
            "WITH" => Keyword::With,
            "ADD" => Keyword::Add,
            "DELETE" => Keyword::Delete,
            "MODIFY" => Keyword::Modify,
            "SET" => Keyword::Set,
            "LOAD" => Keyword::Load,
            "ENDING" => Keyword::Ending,
            "ANNUAL" => Keyword::Annual,
            "AND" => Keyword::And,
            "OR" => Keyword::Or,
            "NOT" => Keyword::Not,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Ident(String),
    Number(Decimal),
    /// dollar amount, e.g. `$25_000_000`
    Currency(Decimal),
    /// raw percent, e.g. `12.5%` carries 12.5
    Percentage(Decimal),
    /// ratio, e.g. `3.25x`
    Ratio(Decimal),
    Date(NaiveDate),
    Str(String),
    // operators
    Plus,
    Minus,
    Star,
    Slash,
    PercentOp,
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    LParen,
    RParen,
    Comma,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, line: usize, column: usize) -> Self {
        Self { kind, span, line, column }
    }

    /// short description for diagnostics
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Keyword(kw) => format!("keyword {:?}", kw),
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Currency(n) => format!("currency ${}", n),
            TokenKind::Percentage(p) => format!("percentage {}%", p),
            TokenKind::Ratio(r) => format!("ratio {}x", r),
            TokenKind::Date(d) => format!("date {}", d),
            TokenKind::Str(s) => format!("string \"{}\"", s),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::PercentOp => "'%'".to_string(),
            TokenKind::Eq => "'='".to_string(),
            TokenKind::NotEq => "'!='".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::Le => "'<='".to_string(),
            TokenKind::Ge => "'>='".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}
