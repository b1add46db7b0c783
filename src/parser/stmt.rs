use crate::ast::{
    AmendmentDecl, Basket, Condition, Covenant, CpChecklistDecl, CpItem, CpStatus, CurePeriod,
    CureSpec, CureUnit, Define, DegradationSchedule, DepreciationDecl, Directive, ElementKind,
    EventDecl, ExceptWhen, Expression, FlipEventDecl, LoadDecl, LoadPeriod, MilestoneDecl,
    ModValue, Modification, PerformanceGuarantee, PeriodType, PhaseDecl, Prohibit,
    RegulatoryRequirement, ReserveDecl, SeasonalAdjustment, Statement, StatementNode, TaxCredit,
    TaxEquityStructure, TechnicalMilestoneDecl, TestFrequency, ThresholdStep, TransitionDecl,
    WaterfallDecl, WaterfallTier,
};
use crate::errors::Result;
use crate::token::{Keyword, Span, TokenKind};

use super::Parser;

impl Parser {
    pub(crate) fn parse_statement(&mut self) -> Result<Statement> {
        let start = self.peek().span.start;
        let node = match self.peek().kind {
            TokenKind::Keyword(Keyword::Define) => self.parse_define()?,
            TokenKind::Keyword(Keyword::Covenant) => self.parse_covenant()?,
            TokenKind::Keyword(Keyword::Basket) => self.parse_basket()?,
            TokenKind::Keyword(Keyword::Condition) => self.parse_condition()?,
            TokenKind::Keyword(Keyword::Prohibit) => self.parse_prohibit()?,
            TokenKind::Keyword(Keyword::Event) => self.parse_event()?,
            TokenKind::Keyword(Keyword::Phase) => self.parse_phase()?,
            TokenKind::Keyword(Keyword::Transition) => self.parse_transition()?,
            TokenKind::Keyword(Keyword::Milestone) => self.parse_milestone()?,
            TokenKind::Keyword(Keyword::TechnicalMilestone) => self.parse_technical_milestone()?,
            TokenKind::Keyword(Keyword::Regulatory) => self.parse_regulatory()?,
            TokenKind::Keyword(Keyword::PerformanceGuarantee) => {
                self.parse_performance_guarantee()?
            }
            TokenKind::Keyword(Keyword::DegradationSchedule) => self.parse_degradation()?,
            TokenKind::Keyword(Keyword::SeasonalAdjustment) => self.parse_seasonal()?,
            TokenKind::Keyword(Keyword::TaxEquityStructure) => self.parse_tax_equity()?,
            TokenKind::Keyword(Keyword::TaxCredit) => self.parse_tax_credit()?,
            TokenKind::Keyword(Keyword::Depreciation) => self.parse_depreciation()?,
            TokenKind::Keyword(Keyword::FlipEvent) => self.parse_flip_event()?,
            TokenKind::Keyword(Keyword::Reserve) => self.parse_reserve()?,
            TokenKind::Keyword(Keyword::Waterfall) => self.parse_waterfall()?,
            TokenKind::Keyword(Keyword::ConditionsPrecedent) => {
                self.parse_conditions_precedent()?
            }
            TokenKind::Keyword(Keyword::Amendment) => self.parse_amendment()?,
            TokenKind::Keyword(Keyword::Load) => self.parse_load()?,
            _ => {
                return Err(self.error_here(&format!(
                    "expected a statement keyword, found {}",
                    self.peek().describe()
                )));
            }
        };
        let end = self.last_consumed_end(start);
        Ok(Statement {
            span: Span::new(start, end),
            node,
        })
    }

    fn last_consumed_end(&self, fallback: usize) -> usize {
        if self.pos == 0 {
            fallback
        } else {
            self.tokens[self.pos - 1].span.end
        }
    }

    // ------------------------------------------------------------------
    // definitions
    // ------------------------------------------------------------------

    fn parse_define(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Define)?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Eq, "'='")?;
        let expr = self.parse_expression()?;
        let mut excluding = Vec::new();
        let mut cap = None;
        loop {
            if self.eat_keyword(Keyword::Excluding) {
                excluding = self.ident_list()?;
            } else if self.eat_keyword(Keyword::Cap) {
                cap = Some(self.parse_expression()?);
            } else {
                break;
            }
        }
        Ok(StatementNode::Define(Define {
            name,
            expr,
            excluding,
            cap,
        }))
    }

    // ------------------------------------------------------------------
    // covenants
    // ------------------------------------------------------------------

    fn parse_covenant(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Covenant)?;
        let name = self.expect_ident()?;
        let mut requires = None;
        let mut schedule = Vec::new();
        let mut tested = None;
        let mut cure = None;
        let mut breach = None;
        loop {
            if self.eat_keyword(Keyword::Requires) {
                let (expr, steps) = self.parse_requirement()?;
                requires = Some(expr);
                schedule = steps;
            } else if self.eat_keyword(Keyword::Tested) {
                tested = Some(self.parse_frequency()?);
            } else if self.check_keyword(Keyword::Cure) {
                cure = Some(self.parse_cure_spec()?);
            } else if self.eat_keyword(Keyword::Breach) {
                breach = Some(self.expect_string()?);
            } else {
                break;
            }
        }
        let requires =
            requires.ok_or_else(|| self.error_here("COVENANT requires a REQUIRES clause"))?;
        Ok(StatementNode::Covenant(Covenant {
            name,
            requires,
            schedule,
            tested,
            cure,
            breach,
        }))
    }

    /// `expr [UNTIL date] ("," THEN op expr [UNTIL date])*`
    ///
    /// A stepped requirement keeps the base comparison in `requires`
    /// and records every leg, first included, in the schedule.
    fn parse_requirement(&mut self) -> Result<(Expression, Vec<ThresholdStep>)> {
        let expr = self.parse_expression()?;
        let mut schedule = Vec::new();

        let first_until = if self.eat_keyword(Keyword::Until) {
            Some(self.expect_date()?)
        } else {
            None
        };

        let stepped = first_until.is_some()
            || (self.check(&TokenKind::Comma)
                && self.peek_ahead(1).kind == TokenKind::Keyword(Keyword::Then));

        if stepped {
            let Expression::Comparison { op, right, .. } = &expr else {
                return Err(self.error_here("stepped thresholds need a comparison requirement"));
            };
            schedule.push(ThresholdStep {
                op: *op,
                threshold: (**right).clone(),
                until: first_until,
            });
            while self.check(&TokenKind::Comma)
                && self.peek_ahead(1).kind == TokenKind::Keyword(Keyword::Then)
            {
                self.advance(); // ','
                self.advance(); // THEN
                let op = self
                    .peek_compare_op()
                    .ok_or_else(|| self.error_here("expected comparison operator after THEN"))?;
                self.advance();
                let threshold = self.parse_additive()?;
                let until = if self.eat_keyword(Keyword::Until) {
                    Some(self.expect_date()?)
                } else {
                    None
                };
                schedule.push(ThresholdStep { op, threshold, until });
            }
        }

        Ok((expr, schedule))
    }

    fn parse_frequency(&mut self) -> Result<TestFrequency> {
        if self.eat_keyword(Keyword::Quarterly) {
            Ok(TestFrequency::Quarterly)
        } else if self.eat_keyword(Keyword::Monthly) {
            Ok(TestFrequency::Monthly)
        } else if self.eat_keyword(Keyword::Annually) {
            Ok(TestFrequency::Annually)
        } else {
            Err(self.error_here("expected QUARTERLY, MONTHLY, or ANNUALLY"))
        }
    }

    /// `CURE Mechanism [MAX_USES n] [OVER "..."] [MAX_AMOUNT expr]
    ///  [CURE_PERIOD n (DAYS|MONTHS|YEARS)]`
    fn parse_cure_spec(&mut self) -> Result<CureSpec> {
        self.expect_keyword(Keyword::Cure)?;
        let mechanism = self.expect_ident()?;
        let mut max_uses = None;
        let mut over_period = None;
        let mut max_amount = None;
        let mut cure_period = None;
        loop {
            if self.eat_keyword(Keyword::MaxUses) {
                max_uses = Some(self.expect_u32()?);
            } else if self.eat_keyword(Keyword::Over) {
                over_period = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::MaxAmount) {
                max_amount = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::CurePeriod) {
                let amount = self.expect_u32()?;
                let unit = if self.eat_keyword(Keyword::Days) {
                    CureUnit::Days
                } else if self.eat_keyword(Keyword::Months) {
                    CureUnit::Months
                } else if self.eat_keyword(Keyword::Years) {
                    CureUnit::Years
                } else {
                    return Err(self.error_here("expected DAYS, MONTHS, or YEARS"));
                };
                cure_period = Some(CurePeriod { unit, amount });
            } else {
                break;
            }
        }
        Ok(CureSpec {
            mechanism,
            max_uses,
            over_period,
            max_amount,
            cure_period,
        })
    }

    // ------------------------------------------------------------------
    // baskets
    // ------------------------------------------------------------------

    fn parse_basket(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Basket)?;
        let name = self.expect_ident()?;
        let mut basket = Basket {
            name,
            capacity: None,
            floor: None,
            plus: Vec::new(),
            builds_from: None,
            starting: None,
            maximum: None,
            subject_to: Vec::new(),
        };
        loop {
            if self.eat_keyword(Keyword::Capacity) {
                basket.capacity = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Floor) {
                basket.floor = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Plus) {
                basket.plus.push(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::BuildsFrom) {
                basket.builds_from = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Starting) {
                basket.starting = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Maximum) {
                basket.maximum = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::SubjectTo) {
                basket.subject_to = self.ident_list()?;
            } else {
                break;
            }
        }
        Ok(StatementNode::Basket(basket))
    }

    // ------------------------------------------------------------------
    // conditions, prohibitions, events
    // ------------------------------------------------------------------

    fn parse_condition(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Condition)?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Eq, "'='")?;
        let expr = self.parse_expression()?;
        Ok(StatementNode::Condition(Condition { name, expr }))
    }

    fn parse_prohibit(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Prohibit)?;
        let action = self.expect_ident()?;
        let mut exceptions = Vec::new();
        while self.eat_keyword(Keyword::Except) {
            self.expect_keyword(Keyword::When)?;
            let conditions = self.parse_condition_list()?;
            exceptions.push(ExceptWhen { conditions });
        }
        Ok(StatementNode::Prohibit(Prohibit { action, exceptions }))
    }

    fn parse_event(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Event)?;
        let name = self.expect_ident()?;
        Ok(StatementNode::Event(EventDecl { name }))
    }

    // ------------------------------------------------------------------
    // phases and transitions
    // ------------------------------------------------------------------

    fn parse_phase(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Phase)?;
        let name = self.expect_ident()?;
        let mut phase = PhaseDecl {
            name,
            from: None,
            until: None,
            covenants_suspended: Vec::new(),
            covenants_active: Vec::new(),
            required_covenants: Vec::new(),
        };
        loop {
            if self.eat_keyword(Keyword::From) {
                phase.from = Some(self.expect_ident()?);
            } else if self.eat_keyword(Keyword::Until) {
                phase.until = Some(self.expect_ident()?);
            } else if self.eat_keyword(Keyword::Suspends) {
                phase.covenants_suspended = self.ident_list()?;
            } else if self.eat_keyword(Keyword::Activates) {
                phase.covenants_active = self.ident_list()?;
            } else if self.eat_keyword(Keyword::Requires) {
                phase.required_covenants = self.ident_list()?;
            } else {
                break;
            }
        }
        Ok(StatementNode::Phase(phase))
    }

    fn parse_transition(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Transition)?;
        let name = self.expect_ident()?;
        self.expect_keyword(Keyword::When)?;
        let when = self.parse_trigger()?;
        Ok(StatementNode::Transition(TransitionDecl { name, when }))
    }

    // ------------------------------------------------------------------
    // milestones and regulatory
    // ------------------------------------------------------------------

    fn parse_milestone(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Milestone)?;
        let name = self.expect_ident()?;
        let mut milestone = MilestoneDecl {
            name,
            target_date: None,
            longstop_date: None,
            triggers: Vec::new(),
            requires: None,
        };
        loop {
            if self.eat_keyword(Keyword::Target) {
                milestone.target_date = Some(self.expect_date()?);
            } else if self.eat_keyword(Keyword::Longstop) {
                milestone.longstop_date = Some(self.expect_date()?);
            } else if self.eat_keyword(Keyword::Triggers) {
                milestone.triggers = self.ident_list()?;
            } else if self.eat_keyword(Keyword::Requires) {
                milestone.requires = Some(self.parse_trigger()?);
            } else {
                break;
            }
        }
        Ok(StatementNode::Milestone(milestone))
    }

    fn parse_technical_milestone(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::TechnicalMilestone)?;
        let name = self.expect_ident()?;
        let mut measurement = None;
        let mut target_value = None;
        let mut current_value = None;
        let mut progress_metric = None;
        let mut triggers = Vec::new();
        loop {
            if self.eat_keyword(Keyword::Measurement) {
                measurement = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::TargetValue) {
                target_value = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::CurrentValue) {
                current_value = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::ProgressMetric) {
                progress_metric = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::Triggers) {
                triggers = self.ident_list()?;
            } else {
                break;
            }
        }
        let measurement = measurement
            .ok_or_else(|| self.error_here("TECHNICAL_MILESTONE requires MEASUREMENT"))?;
        let target_value = target_value
            .ok_or_else(|| self.error_here("TECHNICAL_MILESTONE requires TARGET_VALUE"))?;
        Ok(StatementNode::TechnicalMilestone(TechnicalMilestoneDecl {
            name,
            measurement,
            target_value,
            current_value,
            progress_metric,
            triggers,
        }))
    }

    fn parse_regulatory(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Regulatory)?;
        let name = self.expect_ident()?;
        let mut agency = None;
        let mut requirement_type = None;
        let mut description = None;
        let mut required_for = None;
        let mut status = None;
        let mut approval_date = None;
        let mut satisfies = Vec::new();
        loop {
            if self.eat_keyword(Keyword::Agency) {
                agency = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::Type) {
                requirement_type = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::Description) {
                description = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::RequiredFor) {
                required_for = Some(self.expect_ident()?);
            } else if self.eat_keyword(Keyword::Status) {
                status = Some(self.expect_ident()?);
            } else if self.eat_keyword(Keyword::ApprovalDate) {
                approval_date = Some(self.expect_date()?);
            } else if self.eat_keyword(Keyword::Satisfies) {
                satisfies = self.ident_list()?;
            } else {
                break;
            }
        }
        let agency = agency.ok_or_else(|| self.error_here("REGULATORY requires AGENCY"))?;
        let requirement_type =
            requirement_type.ok_or_else(|| self.error_here("REGULATORY requires TYPE"))?;
        let status = status.ok_or_else(|| self.error_here("REGULATORY requires STATUS"))?;
        Ok(StatementNode::Regulatory(RegulatoryRequirement {
            name,
            agency,
            requirement_type,
            description,
            required_for,
            status,
            approval_date,
            satisfies,
        }))
    }

    // ------------------------------------------------------------------
    // performance and project statements
    // ------------------------------------------------------------------

    fn parse_performance_guarantee(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::PerformanceGuarantee)?;
        let name = self.expect_ident()?;
        let mut metric = None;
        let mut p50 = None;
        let mut p75 = None;
        let mut p90 = None;
        let mut p99 = None;
        let mut actual_value = None;
        let mut shortfall_rate = None;
        let mut guarantee_period = None;
        let mut insurance_coverage = None;
        loop {
            if self.eat_keyword(Keyword::Metric) {
                metric = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::P50) {
                p50 = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::P75) {
                p75 = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::P90) {
                p90 = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::P99) {
                p99 = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Actual) {
                actual_value = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::ShortfallRate) {
                shortfall_rate = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::GuaranteePeriod) {
                guarantee_period = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::Insurance) {
                insurance_coverage = Some(self.parse_expression()?);
            } else {
                break;
            }
        }
        let metric =
            metric.ok_or_else(|| self.error_here("PERFORMANCE_GUARANTEE requires METRIC"))?;
        let guarantee_period = guarantee_period
            .ok_or_else(|| self.error_here("PERFORMANCE_GUARANTEE requires GUARANTEE_PERIOD"))?;
        Ok(StatementNode::PerformanceGuarantee(PerformanceGuarantee {
            name,
            metric,
            p50,
            p75,
            p90,
            p99,
            actual_value,
            shortfall_rate,
            guarantee_period,
            insurance_coverage,
        }))
    }

    fn parse_degradation(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::DegradationSchedule)?;
        let name = self.expect_ident()?;
        let mut annual_rate = None;
        let mut applies_to = None;
        loop {
            if self.eat_keyword(Keyword::AnnualRate) {
                annual_rate = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::AppliesTo) {
                applies_to = Some(self.expect_ident()?);
            } else {
                break;
            }
        }
        let annual_rate = annual_rate
            .ok_or_else(|| self.error_here("DEGRADATION_SCHEDULE requires ANNUAL_RATE"))?;
        Ok(StatementNode::DegradationSchedule(DegradationSchedule {
            name,
            annual_rate,
            applies_to,
        }))
    }

    fn parse_seasonal(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::SeasonalAdjustment)?;
        let name = self.expect_ident()?;
        let mut q1 = None;
        let mut q2 = None;
        let mut q3 = None;
        let mut q4 = None;
        loop {
            if self.eat_keyword(Keyword::Q1) {
                q1 = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Q2) {
                q2 = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Q3) {
                q3 = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Q4) {
                q4 = Some(self.parse_expression()?);
            } else {
                break;
            }
        }
        let missing = self.error_here("SEASONAL_ADJUSTMENT requires Q1 through Q4");
        Ok(StatementNode::SeasonalAdjustment(SeasonalAdjustment {
            name,
            q1: q1.ok_or_else(|| missing.clone())?,
            q2: q2.ok_or_else(|| missing.clone())?,
            q3: q3.ok_or_else(|| missing.clone())?,
            q4: q4.ok_or(missing)?,
        }))
    }

    fn parse_tax_equity(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::TaxEquityStructure)?;
        let name = self.expect_ident()?;
        let mut structure = TaxEquityStructure {
            name,
            investor: None,
            sponsor: None,
            investor_share: None,
            post_flip_share: None,
            target_return: None,
        };
        loop {
            if self.eat_keyword(Keyword::Investor) {
                structure.investor = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::Sponsor) {
                structure.sponsor = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::InvestorShare) {
                structure.investor_share = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::PostFlipShare) {
                structure.post_flip_share = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::TargetReturn) {
                structure.target_return = Some(self.parse_expression()?);
            } else {
                break;
            }
        }
        Ok(StatementNode::TaxEquityStructure(structure))
    }

    fn parse_tax_credit(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::TaxCredit)?;
        let name = self.expect_ident()?;
        let mut credit_type = None;
        let mut rate = None;
        let mut basis = None;
        let mut satisfies = Vec::new();
        loop {
            if self.eat_keyword(Keyword::Type) {
                credit_type = Some(self.expect_ident()?);
            } else if self.eat_keyword(Keyword::Rate) {
                rate = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Basis) {
                basis = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Satisfies) {
                satisfies = self.ident_list()?;
            } else {
                break;
            }
        }
        let credit_type = credit_type.ok_or_else(|| self.error_here("TAX_CREDIT requires TYPE"))?;
        Ok(StatementNode::TaxCredit(TaxCredit {
            name,
            credit_type,
            rate,
            basis,
            satisfies,
        }))
    }

    fn parse_depreciation(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Depreciation)?;
        let name = self.expect_ident()?;
        let mut method = None;
        let mut period_years = None;
        let mut basis = None;
        let mut bonus_rate = None;
        loop {
            if self.eat_keyword(Keyword::Method) {
                method = Some(self.expect_ident()?);
            } else if self.eat_keyword(Keyword::Period) {
                period_years = Some(self.expect_u32()?);
            } else if self.eat_keyword(Keyword::Basis) {
                basis = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::BonusRate) {
                bonus_rate = Some(self.parse_expression()?);
            } else {
                break;
            }
        }
        let method = method.ok_or_else(|| self.error_here("DEPRECIATION requires METHOD"))?;
        let period_years =
            period_years.ok_or_else(|| self.error_here("DEPRECIATION requires PERIOD"))?;
        Ok(StatementNode::Depreciation(DepreciationDecl {
            name,
            method,
            period_years,
            basis,
            bonus_rate,
        }))
    }

    fn parse_flip_event(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::FlipEvent)?;
        let name = self.expect_ident()?;
        self.expect_keyword(Keyword::When)?;
        let when = self.parse_trigger()?;
        let mut pre_flip = None;
        let mut post_flip = None;
        loop {
            if self.eat_keyword(Keyword::PreFlip) {
                pre_flip = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::PostFlip) {
                post_flip = Some(self.parse_expression()?);
            } else {
                break;
            }
        }
        Ok(StatementNode::FlipEvent(FlipEventDecl {
            name,
            when,
            pre_flip,
            post_flip,
        }))
    }

    // ------------------------------------------------------------------
    // reserves and waterfalls
    // ------------------------------------------------------------------

    fn parse_reserve(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Reserve)?;
        let name = self.expect_ident()?;
        let mut reserve = ReserveDecl {
            name,
            target: None,
            minimum: None,
            funded_by: None,
            released_for: None,
        };
        loop {
            if self.eat_keyword(Keyword::Target) {
                reserve.target = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Minimum) {
                reserve.minimum = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::FundedBy) {
                reserve.funded_by = Some(self.expect_string()?);
            } else if self.eat_keyword(Keyword::ReleasedFor) {
                reserve.released_for = Some(self.expect_string()?);
            } else {
                break;
            }
        }
        Ok(StatementNode::Reserve(reserve))
    }

    fn parse_waterfall(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Waterfall)?;
        let name = self.expect_ident()?;
        let mut tiers = Vec::new();
        while self.eat_keyword(Keyword::Tier) {
            let priority = self.expect_u32()?;
            let condition = if self.eat_keyword(Keyword::If) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            let mut tier = WaterfallTier {
                priority,
                condition,
                pay_amount: None,
                pay_to: None,
                until: None,
                shortfall_from: None,
            };
            if self.eat_keyword(Keyword::Pay) {
                tier.pay_amount = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::PayTo) {
                tier.pay_to = Some(self.expect_ident()?);
                if self.eat_keyword(Keyword::Until) {
                    tier.until = Some(self.parse_expression()?);
                }
            } else {
                return Err(self.error_here("TIER requires PAY or PAY_TO"));
            }
            if self.eat_keyword(Keyword::ShortfallFrom) {
                tier.shortfall_from = Some(self.expect_ident()?);
            }
            tiers.push(tier);
        }
        if tiers.is_empty() {
            return Err(self.error_here("WATERFALL requires at least one TIER"));
        }
        Ok(StatementNode::Waterfall(WaterfallDecl { name, tiers }))
    }

    // ------------------------------------------------------------------
    // conditions precedent
    // ------------------------------------------------------------------

    fn parse_conditions_precedent(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::ConditionsPrecedent)?;
        let name = self.expect_ident()?;
        let section = if self.eat_keyword(Keyword::Section) {
            Some(self.expect_string()?)
        } else {
            None
        };
        let mut items = Vec::new();
        while self.eat_keyword(Keyword::Item) {
            let item_name = self.expect_ident()?;
            let mut item = CpItem {
                name: item_name,
                description: None,
                responsible: None,
                satisfies: Vec::new(),
                status: CpStatus::Pending,
            };
            loop {
                if self.eat_keyword(Keyword::Description) {
                    item.description = Some(self.expect_string()?);
                } else if self.eat_keyword(Keyword::Responsible) {
                    item.responsible = Some(self.expect_string()?);
                } else if self.eat_keyword(Keyword::Satisfies) {
                    item.satisfies = self.ident_list()?;
                } else if self.eat_keyword(Keyword::Status) {
                    item.status = self.parse_cp_status()?;
                } else {
                    break;
                }
            }
            items.push(item);
        }
        if items.is_empty() {
            return Err(self.error_here("CONDITIONS_PRECEDENT requires at least one ITEM"));
        }
        Ok(StatementNode::ConditionsPrecedent(CpChecklistDecl {
            name,
            section,
            items,
        }))
    }

    fn parse_cp_status(&mut self) -> Result<CpStatus> {
        let word = self.expect_ident()?;
        match word.as_str() {
            "pending" => Ok(CpStatus::Pending),
            "satisfied" => Ok(CpStatus::Satisfied),
            "waived" => Ok(CpStatus::Waived),
            other => Err(self.error_here(&format!(
                "expected pending, satisfied, or waived; found '{}'",
                other
            ))),
        }
    }

    // ------------------------------------------------------------------
    // amendments
    // ------------------------------------------------------------------

    fn parse_amendment(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Amendment)?;
        let number = self.expect_u32()?;
        self.expect_keyword(Keyword::Effective)?;
        let effective = self.expect_date()?;
        self.expect_keyword(Keyword::Description)?;
        let description = self.expect_string()?;
        let mut directives = Vec::new();
        loop {
            if self.eat_keyword(Keyword::Replace) {
                let kind = self.parse_element_kind()?;
                let name = self.expect_ident()?;
                self.expect_keyword(Keyword::With)?;
                let replacement = Box::new(self.parse_statement()?);
                directives.push(Directive::Replace {
                    kind,
                    name,
                    replacement,
                });
            } else if self.eat_keyword(Keyword::Add) {
                let statement = Box::new(self.parse_statement()?);
                directives.push(Directive::Add { statement });
            } else if self.eat_keyword(Keyword::Delete) {
                let kind = self.parse_element_kind()?;
                let name = self.expect_ident()?;
                directives.push(Directive::Delete { kind, name });
            } else if self.eat_keyword(Keyword::Modify) {
                let kind = self.parse_element_kind()?;
                let name = self.expect_ident()?;
                let mut changes = Vec::new();
                while self.eat_keyword(Keyword::Set) {
                    let field = self.expect_ident()?;
                    self.expect(&TokenKind::Eq, "'='")?;
                    let value = self.parse_mod_value()?;
                    changes.push(Modification { field, value });
                }
                if changes.is_empty() {
                    return Err(self.error_here("MODIFY requires at least one SET"));
                }
                directives.push(Directive::Modify {
                    kind,
                    name,
                    changes,
                });
            } else {
                break;
            }
        }
        if directives.is_empty() {
            return Err(self.error_here("AMENDMENT requires at least one directive"));
        }
        Ok(StatementNode::Amendment(AmendmentDecl {
            number,
            effective,
            description,
            directives,
        }))
    }

    fn parse_element_kind(&mut self) -> Result<ElementKind> {
        let kind = match self.peek().kind {
            TokenKind::Keyword(Keyword::Define) => ElementKind::Define,
            TokenKind::Keyword(Keyword::Covenant) => ElementKind::Covenant,
            TokenKind::Keyword(Keyword::Basket) => ElementKind::Basket,
            TokenKind::Keyword(Keyword::Condition) => ElementKind::Condition,
            TokenKind::Keyword(Keyword::Prohibit) => ElementKind::Prohibit,
            TokenKind::Keyword(Keyword::Event) => ElementKind::Event,
            TokenKind::Keyword(Keyword::Phase) => ElementKind::Phase,
            TokenKind::Keyword(Keyword::Transition) => ElementKind::Transition,
            TokenKind::Keyword(Keyword::Milestone) => ElementKind::Milestone,
            TokenKind::Keyword(Keyword::TechnicalMilestone) => ElementKind::TechnicalMilestone,
            TokenKind::Keyword(Keyword::Regulatory) => ElementKind::Regulatory,
            TokenKind::Keyword(Keyword::PerformanceGuarantee) => ElementKind::PerformanceGuarantee,
            TokenKind::Keyword(Keyword::DegradationSchedule) => ElementKind::DegradationSchedule,
            TokenKind::Keyword(Keyword::SeasonalAdjustment) => ElementKind::SeasonalAdjustment,
            TokenKind::Keyword(Keyword::TaxEquityStructure) => ElementKind::TaxEquityStructure,
            TokenKind::Keyword(Keyword::TaxCredit) => ElementKind::TaxCredit,
            TokenKind::Keyword(Keyword::Depreciation) => ElementKind::Depreciation,
            TokenKind::Keyword(Keyword::FlipEvent) => ElementKind::FlipEvent,
            TokenKind::Keyword(Keyword::Reserve) => ElementKind::Reserve,
            TokenKind::Keyword(Keyword::Waterfall) => ElementKind::Waterfall,
            TokenKind::Keyword(Keyword::ConditionsPrecedent) => ElementKind::ConditionsPrecedent,
            _ => {
                return Err(self.error_here(&format!(
                    "expected element kind, found {}",
                    self.peek().describe()
                )));
            }
        };
        self.advance();
        Ok(kind)
    }

    fn parse_mod_value(&mut self) -> Result<ModValue> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Quarterly) => {
                self.advance();
                Ok(ModValue::Frequency(TestFrequency::Quarterly))
            }
            TokenKind::Keyword(Keyword::Monthly) => {
                self.advance();
                Ok(ModValue::Frequency(TestFrequency::Monthly))
            }
            TokenKind::Keyword(Keyword::Annually) => {
                self.advance();
                Ok(ModValue::Frequency(TestFrequency::Annually))
            }
            _ => Ok(ModValue::Expr(self.parse_expression()?)),
        }
    }

    // ------------------------------------------------------------------
    // financial data
    // ------------------------------------------------------------------

    fn parse_load(&mut self) -> Result<StatementNode> {
        self.expect_keyword(Keyword::Load)?;
        let period = if self.eat_keyword(Keyword::Period) {
            let label = self.expect_string()?;
            self.expect_keyword(Keyword::Ending)?;
            let period_end = self.expect_date()?;
            let period_type = if self.eat_keyword(Keyword::Quarterly) {
                PeriodType::Quarterly
            } else if self.eat_keyword(Keyword::Monthly) {
                PeriodType::Monthly
            } else if self.eat_keyword(Keyword::Annual) {
                PeriodType::Annual
            } else {
                return Err(self.error_here("expected QUARTERLY, MONTHLY, or ANNUAL"));
            };
            Some(LoadPeriod {
                period: label,
                period_end,
                period_type,
            })
        } else {
            None
        };

        let mut entries = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Eq, "'='")?;
            let value = self.parse_expression()?;
            entries.push((name, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(StatementNode::Load(LoadDecl { period, entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stepped_covenant_with_cure() {
        let source = r#"
            COVENANT MaxLeverage
              REQUIRES Leverage <= 5.00 UNTIL 2025-12-31, THEN <= 4.75
              TESTED QUARTERLY
              CURE EquityCure MAX_USES 2 OVER "rolling 4 quarters" MAX_AMOUNT $20_000_000
        "#;
        let program = parse(source).unwrap();
        let StatementNode::Covenant(c) = &program.statements[0].node else {
            panic!("expected covenant");
        };
        assert_eq!(c.name, "MaxLeverage");
        assert_eq!(c.schedule.len(), 2);
        assert_eq!(c.schedule[0].threshold, Expression::Number(dec!(5.00)));
        assert_eq!(c.schedule[1].threshold, Expression::Number(dec!(4.75)));
        assert_eq!(c.tested, Some(TestFrequency::Quarterly));
        let cure = c.cure.as_ref().unwrap();
        assert_eq!(cure.mechanism, "EquityCure");
        assert_eq!(cure.max_uses, Some(2));
        assert_eq!(cure.over_period.as_deref(), Some("rolling 4 quarters"));
    }

    #[test]
    fn test_grower_basket() {
        let source = "BASKET GeneralInvestments CAPACITY 10% * EBITDA FLOOR $25_000_000";
        let program = parse(source).unwrap();
        let StatementNode::Basket(b) = &program.statements[0].node else {
            panic!("expected basket");
        };
        assert!(b.capacity.is_some());
        assert!(b.floor.is_some());
        assert!(b.builds_from.is_none());
    }

    #[test]
    fn test_prohibit_with_exceptions() {
        let source = r#"
            PROHIBIT AssetSales
              EXCEPT WHEN amount <= $10_000_000 AND Leverage <= 4.50
              EXCEPT WHEN COMPLIANT(MaxLeverage) = 1
        "#;
        let program = parse(source).unwrap();
        let StatementNode::Prohibit(p) = &program.statements[0].node else {
            panic!("expected prohibit");
        };
        assert_eq!(p.action, "AssetSales");
        assert_eq!(p.exceptions.len(), 2);
        assert_eq!(p.exceptions[0].conditions.len(), 2);
        assert_eq!(p.exceptions[1].conditions.len(), 1);
    }

    #[test]
    fn test_waterfall_tiers() {
        let source = r#"
            WATERFALL Operating
              TIER 1 PAY SeniorInterest
              TIER 2 PAY SeniorPrincipal
              TIER 3 PAY_TO DSRA UNTIL DSRA_Balance >= $30_000_000
              TIER 4 IF Leverage <= 4.50 PAY Distributions SHORTFALL_FROM DSRA
        "#;
        let program = parse(source).unwrap();
        let StatementNode::Waterfall(w) = &program.statements[0].node else {
            panic!("expected waterfall");
        };
        assert_eq!(w.tiers.len(), 4);
        assert_eq!(w.tiers[2].pay_to.as_deref(), Some("DSRA"));
        assert!(w.tiers[2].until.as_ref().unwrap().is_comparison());
        assert!(w.tiers[3].condition.is_some());
        assert_eq!(w.tiers[3].shortfall_from.as_deref(), Some("DSRA"));
    }

    #[test]
    fn test_phase_and_transition() {
        let source = r#"
            PHASE Construction SUSPENDS DSCR
            PHASE Operations FROM COD
            TRANSITION COD WHEN ALL_OF(SubstantialCompletion, PermitsFinal)
        "#;
        let program = parse(source).unwrap();
        assert_eq!(program.statements.len(), 3);
        let StatementNode::Transition(t) = &program.statements[2].node else {
            panic!("expected transition");
        };
        assert_eq!(
            t.when,
            crate::ast::Trigger::AllOf(vec![
                "SubstantialCompletion".to_string(),
                "PermitsFinal".to_string()
            ])
        );
    }

    #[test]
    fn test_amendment_directives() {
        let source = r#"
            AMENDMENT 1 EFFECTIVE 2025-06-30 DESCRIPTION "Covenant reset"
              MODIFY COVENANT MaxLeverage SET requires = Leverage <= 5.25
              DELETE BASKET GeneralInvestments
        "#;
        let program = parse(source).unwrap();
        let StatementNode::Amendment(a) = &program.statements[0].node else {
            panic!("expected amendment");
        };
        assert_eq!(a.number, 1);
        assert_eq!(a.directives.len(), 2);
        assert!(matches!(
            &a.directives[1],
            Directive::Delete { kind: ElementKind::Basket, name } if name == "GeneralInvestments"
        ));
    }

    #[test]
    fn test_load_with_period() {
        let source = r#"
            LOAD PERIOD "2024-Q3" ENDING 2024-09-30 QUARTERLY
              EBITDA = 36_000_000, TotalDebt = 200_000_000
        "#;
        let program = parse(source).unwrap();
        let StatementNode::Load(l) = &program.statements[0].node else {
            panic!("expected load");
        };
        let header = l.period.as_ref().unwrap();
        assert_eq!(header.period, "2024-Q3");
        assert_eq!(header.period_type, PeriodType::Quarterly);
        assert_eq!(l.entries.len(), 2);
    }

    #[test]
    fn test_conditions_precedent_items() {
        let source = r#"
            CONDITIONS_PRECEDENT InitialFunding SECTION "4.01"
              ITEM CreditAgreement DESCRIPTION "Executed credit agreement" STATUS satisfied
              ITEM LegalOpinions RESPONSIBLE "Borrower counsel" SATISFIES OpinionsDelivered
        "#;
        let program = parse(source).unwrap();
        let StatementNode::ConditionsPrecedent(cp) = &program.statements[0].node else {
            panic!("expected conditions precedent");
        };
        assert_eq!(cp.items.len(), 2);
        assert_eq!(cp.items[0].status, CpStatus::Satisfied);
        assert_eq!(cp.items[1].satisfies, vec!["OpinionsDelivered".to_string()]);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let source = "DEFINE Leverage = TotalDebt / EBITDA\nCOVENANT MaxLeverage REQUIRES Leverage <= 5.00";
        assert_eq!(parse(source).unwrap(), parse(source).unwrap());
    }

    #[test]
    fn test_syntax_error_carries_location() {
        let err = parse("COVENANT 5.00").unwrap_err();
        match err {
            crate::errors::ProVisoError::Syntax { line, column, .. } => {
                assert_eq!(line, 1);
                assert!(column > 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
