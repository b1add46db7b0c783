use rust_decimal::Decimal;

use crate::ast::{
    Basket, CompareOp, Condition, Covenant, CpChecklistDecl, Define, DegradationSchedule,
    DepreciationDecl, EventDecl, Expression, FlipEventDecl, MilestoneDecl, PerformanceGuarantee,
    PhaseDecl, Prohibit, RegulatoryRequirement, ReserveDecl, SeasonalAdjustment, StatementNode,
    TaxCredit, TaxEquityStructure, TechnicalMilestoneDecl, TransitionDecl, Trigger,
    WaterfallDecl,
};

/// integer dollars with thousands separators
pub fn format_currency(amount: Decimal) -> String {
    let rounded = amount.round();
    let negative = rounded.is_sign_negative();
    let digits = rounded.abs().to_string();
    let mut grouped = String::new();
    let len = digits.len();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if negative {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}

pub fn format_ratio(value: Decimal) -> String {
    format!("{}x", value.round_dp(2))
}

pub fn format_percent(value: Decimal) -> String {
    format!("{}%", value.round_dp(2))
}

/// expression in prose form: literal amounts formatted, structure kept
fn prose_expr(expr: &Expression) -> String {
    match expr {
        Expression::Currency(n) => format_currency(*n),
        Expression::Percentage(p) => format_percent(*p),
        Expression::Ratio(r) => format_ratio(*r),
        Expression::Binary { op, left, right } => {
            format!("{} {} {}", prose_expr(left), op, prose_expr(right))
        }
        Expression::FunctionCall { name, args } if name == "GreaterOf" && args.len() == 2 => {
            format!(
                "the greater of {} and {}",
                prose_expr(&args[0]),
                prose_expr(&args[1])
            )
        }
        Expression::FunctionCall { name, args } if name == "LesserOf" && args.len() == 2 => {
            format!(
                "the lesser of {} and {}",
                prose_expr(&args[0]),
                prose_expr(&args[1])
            )
        }
        other => other.to_string(),
    }
}

fn comparison_phrase(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Le => "not more than",
        CompareOp::Ge => "not less than",
        CompareOp::Lt => "less than",
        CompareOp::Gt => "greater than",
        CompareOp::Eq => "equal to",
        CompareOp::Ne => "other than",
    }
}

fn name_list(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        [head @ .., last] => format!("{} and {}", head.join(", "), last),
    }
}

fn trigger_prose(trigger: &Trigger) -> String {
    match trigger {
        Trigger::AllOf(names) => format!("each of {} has occurred", name_list(names)),
        Trigger::AnyOf(names) => format!("any of {} has occurred", name_list(names)),
        Trigger::Expr(expr) => prose_expr(expr),
    }
}

const ORDINALS: [&str; 12] = [
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
    "tenth", "eleventh", "twelfth",
];

fn ordinal(n: usize) -> String {
    ORDINALS
        .get(n)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}th", n + 1))
}

fn roman(n: usize) -> String {
    const NUMERALS: [(usize, &str); 7] = [
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut remaining = n;
    let mut out = String::new();
    for (value, text) in NUMERALS {
        while remaining >= value {
            out.push_str(text);
            remaining -= value;
        }
    }
    out
}

/// render one statement to its prose paragraph; byte-stable for a
/// fixed AST
pub fn render_statement(node: &StatementNode) -> String {
    match node {
        StatementNode::Define(d) => render_define(d),
        StatementNode::Covenant(c) => render_covenant(c),
        StatementNode::Basket(b) => render_basket(b),
        StatementNode::Condition(c) => render_condition(c),
        StatementNode::Prohibit(p) => render_prohibit(p),
        StatementNode::Event(e) => render_event(e),
        StatementNode::Phase(p) => render_phase(p),
        StatementNode::Transition(t) => render_transition(t),
        StatementNode::Milestone(m) => render_milestone(m),
        StatementNode::TechnicalMilestone(m) => render_technical_milestone(m),
        StatementNode::Regulatory(r) => render_regulatory(r),
        StatementNode::PerformanceGuarantee(p) => render_performance(p),
        StatementNode::DegradationSchedule(d) => render_degradation(d),
        StatementNode::SeasonalAdjustment(s) => render_seasonal(s),
        StatementNode::TaxEquityStructure(t) => render_tax_equity(t),
        StatementNode::TaxCredit(t) => render_tax_credit(t),
        StatementNode::Depreciation(d) => render_depreciation(d),
        StatementNode::FlipEvent(f) => render_flip(f),
        StatementNode::Reserve(r) => render_reserve(r),
        StatementNode::Waterfall(w) => render_waterfall(w),
        StatementNode::ConditionsPrecedent(cp) => render_cp(cp),
        StatementNode::Amendment(a) => format!(
            "Amendment No. {} (effective {}): {} ({} directives).",
            a.number,
            a.effective,
            a.description,
            a.directives.len()
        ),
        StatementNode::Load(_) => String::new(),
    }
}

fn render_define(d: &Define) -> String {
    let mut text = format!("\"{}\" means {}", d.name, prose_expr(&d.expr));
    if !d.excluding.is_empty() {
        text.push_str(&format!(", excluding {}", name_list(&d.excluding)));
    }
    if let Some(cap) = &d.cap {
        text.push_str(&format!(", subject to a cap of {}", prose_expr(cap)));
    }
    text.push('.');
    text
}

fn render_covenant(c: &Covenant) -> String {
    let mut text = match &c.requires {
        Expression::Comparison { op, left, right } if c.schedule.is_empty() => format!(
            "The Borrower shall maintain {} of {} {}",
            prose_expr(left),
            comparison_phrase(*op),
            prose_expr(right)
        ),
        Expression::Comparison { left, .. } => {
            let mut text = format!("The Borrower shall maintain {}", prose_expr(left));
            for (i, step) in c.schedule.iter().enumerate() {
                if i == 0 {
                    text.push_str(" of ");
                } else {
                    text.push_str(", and thereafter ");
                }
                text.push_str(&format!(
                    "{} {}",
                    comparison_phrase(step.op),
                    prose_expr(&step.threshold)
                ));
                if let Some(until) = step.until {
                    text.push_str(&format!(" through {}", until));
                }
            }
            text
        }
        other => format!("The Borrower shall ensure that {}", prose_expr(other)),
    };
    if let Some(tested) = c.tested {
        text.push_str(&format!(", tested {}", tested));
    }
    text.push('.');
    if let Some(cure) = &c.cure {
        text.push_str(&format!(" A breach may be cured by {}", cure.mechanism));
        if let Some(max_uses) = cure.max_uses {
            text.push_str(&format!(" no more than {} times", max_uses));
        }
        if let Some(over) = &cure.over_period {
            text.push_str(&format!(" over {}", over));
        }
        if let Some(max_amount) = &cure.max_amount {
            text.push_str(&format!(
                ", in an amount not to exceed {}",
                prose_expr(max_amount)
            ));
        }
        text.push('.');
    }
    if let Some(breach) = &c.breach {
        text.push_str(&format!(" Upon an uncured breach: {}.", breach));
    }
    text
}

fn render_basket(b: &Basket) -> String {
    let mut text = if let Some(builds_from) = &b.builds_from {
        let mut text = format!(
            "The {} basket builds from {}",
            b.name,
            prose_expr(builds_from)
        );
        if let Some(starting) = &b.starting {
            text.push_str(&format!(", starting at {}", prose_expr(starting)));
        }
        if let Some(maximum) = &b.maximum {
            text.push_str(&format!(
                ", up to a maximum of {}",
                prose_expr(maximum)
            ));
        }
        text
    } else if let Some(floor) = &b.floor {
        let capacity = b
            .capacity
            .as_ref()
            .map(prose_expr)
            .unwrap_or_else(|| "zero".to_string());
        format!(
            "The {} basket permits an aggregate amount not to exceed the greater of {} and {}",
            b.name,
            prose_expr(floor),
            capacity
        )
    } else {
        let capacity = b
            .capacity
            .as_ref()
            .map(prose_expr)
            .unwrap_or_else(|| "zero".to_string());
        format!(
            "The {} basket permits an aggregate amount not to exceed {}",
            b.name, capacity
        )
    };
    for plus in &b.plus {
        text.push_str(&format!(", plus {}", prose_expr(plus)));
    }
    if !b.subject_to.is_empty() {
        text.push_str(&format!(
            ", subject to satisfaction of {}",
            name_list(&b.subject_to)
        ));
    }
    text.push('.');
    text
}

fn render_condition(c: &Condition) -> String {
    format!("\"{}\" is satisfied when {}.", c.name, prose_expr(&c.expr))
}

fn render_prohibit(p: &Prohibit) -> String {
    let mut text = format!("The Borrower shall not effect {}", p.action);
    for (i, exception) in p.exceptions.iter().enumerate() {
        let conditions = exception
            .conditions
            .iter()
            .map(prose_expr)
            .collect::<Vec<_>>()
            .join(" and ");
        if i == 0 {
            text.push_str(&format!(", except when {}", conditions));
        } else {
            text.push_str(&format!("; or when {}", conditions));
        }
    }
    text.push('.');
    text
}

fn render_event(e: &EventDecl) -> String {
    format!(
        "The occurrence of {} shall constitute an Event of Default.",
        e.name
    )
}

fn render_phase(p: &PhaseDecl) -> String {
    let mut text = format!("During the {} phase", p.name);
    if let Some(from) = &p.from {
        text.push_str(&format!(", commencing upon {}", from));
    }
    if let Some(until) = &p.until {
        text.push_str(&format!(" and continuing until {}", until));
    }
    if !p.covenants_suspended.is_empty() {
        text.push_str(&format!(
            ", testing of {} is suspended",
            name_list(&p.covenants_suspended)
        ));
    }
    if !p.covenants_active.is_empty() {
        text.push_str(&format!(
            ", only {} are tested",
            name_list(&p.covenants_active)
        ));
    }
    if !p.required_covenants.is_empty() {
        text.push_str(&format!(
            ", and {} are tested in all events",
            name_list(&p.required_covenants)
        ));
    }
    text.push('.');
    text
}

fn render_transition(t: &TransitionDecl) -> String {
    format!("{} occurs when {}.", t.name, trigger_prose(&t.when))
}

fn render_milestone(m: &MilestoneDecl) -> String {
    let mut text = format!("The Borrower shall achieve {}", m.name);
    if let Some(target) = m.target_date {
        text.push_str(&format!(" by {}", target));
    }
    if let Some(longstop) = m.longstop_date {
        text.push_str(&format!(", and in no event later than {}", longstop));
    }
    text.push('.');
    if let Some(requires) = &m.requires {
        text.push_str(&format!(
            " Achievement requires that {}.",
            trigger_prose(requires)
        ));
    }
    if !m.triggers.is_empty() {
        text.push_str(&format!(
            " Achievement constitutes {}.",
            name_list(&m.triggers)
        ));
    }
    text
}

fn render_technical_milestone(m: &TechnicalMilestoneDecl) -> String {
    let mut text = format!(
        "{} is measured by {} against a target of {}",
        m.name,
        m.measurement,
        prose_expr(&m.target_value)
    );
    if let Some(current) = &m.current_value {
        text.push_str(&format!(", currently {}", prose_expr(current)));
    }
    if let Some(metric) = &m.progress_metric {
        text.push_str(&format!(", tracked as {}", metric));
    }
    text.push('.');
    if !m.triggers.is_empty() {
        text.push_str(&format!(
            " Achievement constitutes {}.",
            name_list(&m.triggers)
        ));
    }
    text
}

fn render_regulatory(r: &RegulatoryRequirement) -> String {
    let mut text = format!("{}: {} from {}", r.name, r.requirement_type, r.agency);
    if let Some(description) = &r.description {
        text.push_str(&format!(", {}", description));
    }
    if let Some(phase) = &r.required_for {
        text.push_str(&format!(", required for the {} phase", phase));
    }
    text.push_str(&format!(" (status: {}", r.status));
    if let Some(date) = r.approval_date {
        text.push_str(&format!(", approved {}", date));
    }
    text.push_str(").");
    if !r.satisfies.is_empty() {
        text.push_str(&format!(" Approval satisfies {}.", name_list(&r.satisfies)));
    }
    text
}

fn render_performance(p: &PerformanceGuarantee) -> String {
    let mut text = format!(
        "{} guarantees {} over {}",
        p.name, p.metric, p.guarantee_period
    );
    for (label, level) in [("P50", &p.p50), ("P75", &p.p75), ("P90", &p.p90), ("P99", &p.p99)] {
        if let Some(expr) = level {
            text.push_str(&format!(", {} of {}", label, prose_expr(expr)));
        }
    }
    if let Some(rate) = &p.shortfall_rate {
        text.push_str(&format!(
            ", with liquidated damages of {} per unit of shortfall",
            prose_expr(rate)
        ));
    }
    if let Some(coverage) = &p.insurance_coverage {
        text.push_str(&format!(", insured up to {}", prose_expr(coverage)));
    }
    text.push('.');
    text
}

fn render_degradation(d: &DegradationSchedule) -> String {
    let mut text = format!(
        "Expected output degrades at {} per annum under the {} schedule",
        prose_expr(&d.annual_rate),
        d.name
    );
    if let Some(applies_to) = &d.applies_to {
        text.push_str(&format!(", applied to {}", applies_to));
    }
    text.push('.');
    text
}

fn render_seasonal(s: &SeasonalAdjustment) -> String {
    format!(
        "Seasonal factors under {}: Q1 {}, Q2 {}, Q3 {}, Q4 {}.",
        s.name,
        prose_expr(&s.q1),
        prose_expr(&s.q2),
        prose_expr(&s.q3),
        prose_expr(&s.q4)
    )
}

fn render_tax_equity(t: &TaxEquityStructure) -> String {
    let mut text = format!("The {} structure", t.name);
    if let Some(investor) = &t.investor {
        text.push_str(&format!(" allocates to {}", investor));
    }
    if let Some(share) = &t.investor_share {
        text.push_str(&format!(" {} of tax attributes before the flip", prose_expr(share)));
    }
    if let Some(post) = &t.post_flip_share {
        text.push_str(&format!(" and {} thereafter", prose_expr(post)));
    }
    if let Some(sponsor) = &t.sponsor {
        text.push_str(&format!(", with {} as sponsor", sponsor));
    }
    if let Some(target) = &t.target_return {
        text.push_str(&format!(
            ", flipping upon an investor return of {}",
            prose_expr(target)
        ));
    }
    text.push('.');
    text
}

fn render_tax_credit(t: &TaxCredit) -> String {
    let mut text = format!("{} is a {} credit", t.name, t.credit_type);
    if let Some(rate) = &t.rate {
        text.push_str(&format!(" at {}", prose_expr(rate)));
    }
    if let Some(basis) = &t.basis {
        text.push_str(&format!(" of an eligible basis of {}", prose_expr(basis)));
    }
    text.push('.');
    if !t.satisfies.is_empty() {
        text.push_str(&format!(
            " Placement in service satisfies {}.",
            name_list(&t.satisfies)
        ));
    }
    text
}

fn render_depreciation(d: &DepreciationDecl) -> String {
    let mut text = format!(
        "{} is depreciated under {} over {} years",
        d.name, d.method, d.period_years
    );
    if let Some(basis) = &d.basis {
        text.push_str(&format!(" on a basis of {}", prose_expr(basis)));
    }
    if let Some(bonus) = &d.bonus_rate {
        text.push_str(&format!(
            ", with first-year bonus depreciation of {}",
            prose_expr(bonus)
        ));
    }
    text.push('.');
    text
}

fn render_flip(f: &FlipEventDecl) -> String {
    let mut text = format!("The {} flip occurs when {}", f.name, trigger_prose(&f.when));
    if let (Some(pre), Some(post)) = (&f.pre_flip, &f.post_flip) {
        text.push_str(&format!(
            ", reallocating from {} to {}",
            prose_expr(pre),
            prose_expr(post)
        ));
    }
    text.push('.');
    text
}

fn render_reserve(r: &ReserveDecl) -> String {
    let mut text = format!("The {} shall be funded", r.name);
    if let Some(target) = &r.target {
        text.push_str(&format!(" to a target balance of {}", prose_expr(target)));
    }
    if let Some(minimum) = &r.minimum {
        text.push_str(&format!(
            ", with a minimum balance of {}",
            prose_expr(minimum)
        ));
    }
    if let Some(funded_by) = &r.funded_by {
        text.push_str(&format!(", funded by {}", funded_by));
    }
    if let Some(released_for) = &r.released_for {
        text.push_str(&format!(" and released for {}", released_for));
    }
    text.push('.');
    text
}

fn render_waterfall(w: &WaterfallDecl) -> String {
    let mut tiers = w.tiers.clone();
    tiers.sort_by_key(|t| t.priority);
    let mut clauses = Vec::new();
    for (i, tier) in tiers.iter().enumerate() {
        let mut clause = format!("{}, ", ordinal(i));
        if let Some(condition) = &tier.condition {
            clause.push_str(&format!("if {}, ", prose_expr(condition)));
        }
        if let Some(amount) = &tier.pay_amount {
            clause.push_str(&format!("to pay {}", prose_expr(amount)));
        } else if let Some(reserve) = &tier.pay_to {
            clause.push_str(&format!("to fund the {}", reserve));
            if let Some(until) = &tier.until {
                clause.push_str(&format!(" until {}", prose_expr(until)));
            }
        }
        if let Some(source) = &tier.shortfall_from {
            clause.push_str(&format!(", drawing any shortfall from the {}", source));
        }
        clauses.push(clause);
    }
    format!(
        "Amounts available under the {} waterfall shall be applied: {}.",
        w.name,
        clauses.join("; ")
    )
}

fn render_cp(cp: &CpChecklistDecl) -> String {
    let section = cp.section.as_deref().unwrap_or("4.01");
    let mut items = Vec::new();
    for (i, item) in cp.items.iter().enumerate() {
        let mut text = format!("({}) {}", roman(i + 1), item.name);
        if let Some(description) = &item.description {
            text.push_str(&format!(", {}", description));
        }
        if let Some(responsible) = &item.responsible {
            text.push_str(&format!(" (responsible: {})", responsible));
        }
        items.push(text);
    }
    format!(
        "The obligations under {} are subject to the conditions set forth in Section {}: {}.",
        cp.name,
        section,
        items.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use rust_decimal_macros::dec;

    fn rendered(source: &str) -> String {
        let program = parse(source).unwrap();
        render_statement(&program.statements[0].node)
    }

    #[test]
    fn test_currency_grouping() {
        assert_eq!(format_currency(dec!(25000000)), "$25,000,000");
        assert_eq!(format_currency(dec!(999)), "$999");
        assert_eq!(format_currency(dec!(1000)), "$1,000");
        assert_eq!(format_currency(dec!(-1234567)), "-$1,234,567");
    }

    #[test]
    fn test_define_prose() {
        let text = rendered("DEFINE Leverage = TotalDebt / EBITDA");
        assert_eq!(text, "\"Leverage\" means TotalDebt / EBITDA.");
    }

    #[test]
    fn test_covenant_prose() {
        let text = rendered("COVENANT MaxLeverage REQUIRES Leverage <= 5.00 TESTED QUARTERLY");
        assert_eq!(
            text,
            "The Borrower shall maintain Leverage of not more than 5.00, tested quarterly."
        );
    }

    #[test]
    fn test_stepped_covenant_prose_shows_schedule() {
        let text = rendered(
            "COVENANT MaxLeverage REQUIRES Leverage <= 5.00 UNTIL 2025-12-31, THEN <= 4.75",
        );
        assert!(text.contains("not more than 5.00 through 2025-12-31"));
        assert!(text.contains("thereafter not more than 4.75"));
    }

    #[test]
    fn test_grower_basket_prose() {
        let text =
            rendered("BASKET GeneralInvestments CAPACITY 10% * EBITDA FLOOR $25_000_000");
        assert_eq!(
            text,
            "The GeneralInvestments basket permits an aggregate amount not to exceed \
             the greater of $25,000,000 and 10% * EBITDA."
        );
    }

    #[test]
    fn test_waterfall_prose_orders_tiers() {
        let text = rendered(
            "WATERFALL Operating\n\
               TIER 2 PAY SeniorPrincipal\n\
               TIER 1 PAY SeniorInterest",
        );
        let first = text.find("first, to pay SeniorInterest").unwrap();
        let second = text.find("second, to pay SeniorPrincipal").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let source = "RESERVE DSRA TARGET $30_000_000 MINIMUM $10_000_000";
        assert_eq!(rendered(source), rendered(source));
    }
}
