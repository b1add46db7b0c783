use crate::ast::{
    AmendmentDecl, Directive, ElementKind, Expression, ModValue, Modification, Statement,
    StatementNode,
};
use crate::errors::{ProVisoError, Result};
use crate::events::DealEvent;

use super::Interpreter;

impl Interpreter {
    /// apply an amendment's directives in order, all-or-nothing: a
    /// failing directive rolls the whole amendment back
    pub fn apply_amendment(&mut self, amendment: &AmendmentDecl) -> Result<()> {
        let symbols_snapshot = self.symbols.clone();
        let state_snapshot = self.state.clone();
        let program_snapshot = self.program.clone();

        match self.apply_directives(amendment) {
            Ok(()) => {
                self.state.applied_amendments.push(amendment.clone());
                self.events.emit(DealEvent::AmendmentApplied {
                    number: amendment.number,
                    effective: amendment.effective,
                    description: amendment.description.clone(),
                    timestamp: self.time.now(),
                });
                Ok(())
            }
            Err(error) => {
                self.symbols = symbols_snapshot;
                self.state = state_snapshot;
                self.program = program_snapshot;
                Err(error)
            }
        }
    }

    /// apply an amendment that was declared in the source
    pub fn apply_declared_amendment(&mut self, number: u32) -> Result<()> {
        let amendment = self
            .declared_amendments()
            .iter()
            .find(|a| a.number == number)
            .cloned()
            .ok_or_else(|| ProVisoError::MissingTarget {
                kind: "amendment",
                name: number.to_string(),
            })?;
        self.apply_amendment(&amendment)
    }

    /// amendments already applied, in application order
    pub fn applied_amendments(&self) -> &[AmendmentDecl] {
        &self.state.applied_amendments
    }

    fn apply_directives(&mut self, amendment: &AmendmentDecl) -> Result<()> {
        for directive in &amendment.directives {
            match directive {
                Directive::Replace { kind, name, replacement } => {
                    self.delete_element(*kind, name)?;
                    self.load_statement(replacement)?;
                    self.program_replace(*kind, name, (**replacement).clone());
                }
                Directive::Add { statement } => {
                    self.load_statement(statement)?;
                    self.program.statements.push((**statement).clone());
                }
                Directive::Delete { kind, name } => {
                    self.delete_element(*kind, name)?;
                    if let Some(pos) = self.program_position(*kind, name) {
                        self.program.statements.remove(pos);
                    }
                }
                Directive::Modify { kind, name, changes } => {
                    self.modify_element(*kind, name, changes)?;
                }
            }
        }
        Ok(())
    }

    fn program_position(&self, kind: ElementKind, name: &str) -> Option<usize> {
        self.program.statements.iter().position(|s| {
            s.node.element_kind() == kind && s.node.element_name() == Some(name)
        })
    }

    fn program_replace(&mut self, kind: ElementKind, name: &str, statement: Statement) {
        match self.program_position(kind, name) {
            Some(pos) => self.program.statements[pos] = statement,
            None => self.program.statements.push(statement),
        }
    }

    fn program_update_node(&mut self, kind: ElementKind, name: &str, node: StatementNode) {
        if let Some(pos) = self.program_position(kind, name) {
            self.program.statements[pos].node = node;
        }
    }

    fn missing(kind: ElementKind, name: &str) -> ProVisoError {
        let kind: &'static str = match kind {
            ElementKind::Define => "definition",
            ElementKind::Covenant => "covenant",
            ElementKind::Basket => "basket",
            ElementKind::Condition => "condition",
            ElementKind::Prohibit => "prohibition",
            ElementKind::Event => "event",
            ElementKind::Phase => "phase",
            ElementKind::Transition => "transition",
            ElementKind::Milestone => "milestone",
            ElementKind::Reserve => "reserve",
            ElementKind::Waterfall => "waterfall",
            _ => "element",
        };
        ProVisoError::MissingTarget {
            kind,
            name: name.to_string(),
        }
    }

    /// drop an element and its dependent runtime state
    fn delete_element(&mut self, kind: ElementKind, name: &str) -> Result<()> {
        let removed = match kind {
            ElementKind::Define => self.symbols.definitions.remove(name).is_some(),
            ElementKind::Covenant => self.symbols.covenants.remove(name).is_some(),
            ElementKind::Basket => {
                let removed = self.symbols.baskets.remove(name).is_some();
                if removed {
                    self.state.basket_utilization.remove(name);
                    self.state.basket_accumulation.remove(name);
                }
                removed
            }
            ElementKind::Condition => self.symbols.conditions.remove(name).is_some(),
            ElementKind::Prohibit => self.symbols.prohibitions.remove(name).is_some(),
            ElementKind::Event => self.symbols.events.remove(name).is_some(),
            ElementKind::Phase => {
                let removed = self.symbols.phases.remove(name).is_some();
                if removed && self.state.current_phase.as_deref() == Some(name) {
                    self.state.current_phase = None;
                }
                removed
            }
            ElementKind::Transition => self.symbols.transitions.remove(name).is_some(),
            ElementKind::Milestone => self.symbols.milestones.remove(name).is_some(),
            ElementKind::TechnicalMilestone => {
                self.symbols.technical_milestones.remove(name).is_some()
            }
            ElementKind::Regulatory => self.symbols.regulatory.remove(name).is_some(),
            ElementKind::PerformanceGuarantee => {
                self.symbols.performance_guarantees.remove(name).is_some()
            }
            ElementKind::DegradationSchedule => {
                self.symbols.degradation_schedules.remove(name).is_some()
            }
            ElementKind::SeasonalAdjustment => {
                self.symbols.seasonal_adjustments.remove(name).is_some()
            }
            ElementKind::TaxEquityStructure => {
                self.symbols.tax_equity_structures.remove(name).is_some()
            }
            ElementKind::TaxCredit => self.symbols.tax_credits.remove(name).is_some(),
            ElementKind::Depreciation => self.symbols.depreciation.remove(name).is_some(),
            ElementKind::FlipEvent => self.symbols.flip_events.remove(name).is_some(),
            ElementKind::Reserve => {
                let removed = self.symbols.reserves.remove(name).is_some();
                if removed {
                    self.state.reserve_balances.remove(name);
                }
                removed
            }
            ElementKind::Waterfall => self.symbols.waterfalls.remove(name).is_some(),
            ElementKind::ConditionsPrecedent => {
                let removed = self.symbols.cp_checklists.remove(name).is_some();
                if removed {
                    self.state.cp_statuses.remove(name);
                }
                removed
            }
            ElementKind::Amendment | ElementKind::Load => false,
        };
        if removed {
            Ok(())
        } else {
            Err(Self::missing(kind, name))
        }
    }

    /// patch whitelisted fields in place
    fn modify_element(
        &mut self,
        kind: ElementKind,
        name: &str,
        changes: &[Modification],
    ) -> Result<()> {
        match kind {
            ElementKind::Basket => {
                let mut basket = self
                    .symbols
                    .baskets
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Self::missing(kind, name))?;
                for change in changes {
                    let expr = Self::expr_value(kind, change)?;
                    match change.field.as_str() {
                        "capacity" => basket.capacity = Some(expr),
                        "floor" => basket.floor = Some(expr),
                        "maximum" => basket.maximum = Some(expr),
                        other => {
                            return Err(ProVisoError::UnsupportedModification {
                                kind: "basket",
                                field: other.to_string(),
                            });
                        }
                    }
                }
                self.symbols.baskets.insert(name.to_string(), basket.clone());
                self.program_update_node(kind, name, StatementNode::Basket(basket));
                Ok(())
            }
            ElementKind::Covenant => {
                let mut covenant = self
                    .symbols
                    .covenants
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Self::missing(kind, name))?;
                for change in changes {
                    match (change.field.as_str(), &change.value) {
                        ("requires", ModValue::Expr(expr)) => {
                            covenant.requires = expr.clone();
                            // a rewritten requirement supersedes any
                            // stepped schedule
                            covenant.schedule.clear();
                        }
                        ("tested", ModValue::Frequency(freq)) => {
                            covenant.tested = Some(*freq);
                        }
                        (other, _) => {
                            return Err(ProVisoError::UnsupportedModification {
                                kind: "covenant",
                                field: other.to_string(),
                            });
                        }
                    }
                }
                self.symbols
                    .covenants
                    .insert(name.to_string(), covenant.clone());
                self.program_update_node(kind, name, StatementNode::Covenant(covenant));
                Ok(())
            }
            other => Err(ProVisoError::UnsupportedModification {
                kind: "element",
                field: format!("{:?}", other),
            }),
        }
    }

    fn expr_value(kind: ElementKind, change: &Modification) -> Result<Expression> {
        match &change.value {
            ModValue::Expr(expr) => Ok(expr.clone()),
            ModValue::Frequency(_) => Err(ProVisoError::UnsupportedModification {
                kind: match kind {
                    ElementKind::Basket => "basket",
                    _ => "element",
                },
                field: change.field.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;
    use crate::value::Value;
    use rust_decimal_macros::dec;

    const SOURCE: &str = "\
        DEFINE Leverage = TotalDebt / EBITDA\n\
        COVENANT MaxLeverage REQUIRES Leverage <= 5.00 TESTED QUARTERLY\n\
        BASKET GeneralInvestments CAPACITY $25_000_000\n\
        AMENDMENT 1 EFFECTIVE 2025-06-30 DESCRIPTION \"Covenant reset\"\n\
          MODIFY COVENANT MaxLeverage SET requires = Leverage <= 5.25";

    fn interp() -> Interpreter {
        let mut i = Interpreter::new(parse(SOURCE).unwrap()).unwrap();
        i.load_financials_json(r#"{"TotalDebt": 205000000, "EBITDA": 40000000}"#)
            .unwrap();
        i
    }

    #[test]
    fn test_modify_covenant_threshold() {
        let mut i = interp();
        assert!(!i.check_covenant("MaxLeverage").unwrap().compliant);

        i.apply_declared_amendment(1).unwrap();
        let result = i.check_covenant("MaxLeverage").unwrap();
        assert_eq!(result.threshold, Value::from_decimal(dec!(5.25)));
        assert!(result.compliant);
        assert_eq!(i.applied_amendments().len(), 1);
    }

    #[test]
    fn test_delete_basket_drops_runtime_state() {
        let mut i = interp();
        i.use_basket("GeneralInvestments", dec!(1000000), "seed").unwrap();

        let amendment = parse(
            "AMENDMENT 2 EFFECTIVE 2025-09-30 DESCRIPTION \"Remove basket\"\n\
               DELETE BASKET GeneralInvestments",
        )
        .unwrap();
        let StatementNode::Amendment(a) = &amendment.statements[0].node else {
            panic!("expected amendment");
        };
        i.apply_amendment(a).unwrap();

        assert!(i.basket_status("GeneralInvestments").is_err());
        assert!(!i.state.basket_utilization.contains_key("GeneralInvestments"));
    }

    #[test]
    fn test_failing_directive_rolls_back() {
        let mut i = interp();
        let amendment = parse(
            "AMENDMENT 3 EFFECTIVE 2025-09-30 DESCRIPTION \"Bad batch\"\n\
               MODIFY COVENANT MaxLeverage SET requires = Leverage <= 6.00\n\
               DELETE BASKET NoSuchBasket",
        )
        .unwrap();
        let StatementNode::Amendment(a) = &amendment.statements[0].node else {
            panic!("expected amendment");
        };
        let err = i.apply_amendment(a).unwrap_err();
        assert!(matches!(err, ProVisoError::MissingTarget { .. }));

        // the first directive was rolled back with the second
        let result = i.check_covenant("MaxLeverage").unwrap();
        assert_eq!(result.threshold, Value::from_decimal(dec!(5.00)));
        assert!(i.applied_amendments().is_empty());
    }

    #[test]
    fn test_add_and_replace() {
        let mut i = interp();
        let amendment = parse(
            "AMENDMENT 4 EFFECTIVE 2025-12-31 DESCRIPTION \"New covenant and basket\"\n\
               ADD COVENANT MinEbitda REQUIRES EBITDA >= $30_000_000\n\
               REPLACE BASKET GeneralInvestments WITH \
                 BASKET GeneralInvestments CAPACITY $40_000_000",
        )
        .unwrap();
        let StatementNode::Amendment(a) = &amendment.statements[0].node else {
            panic!("expected amendment");
        };
        i.apply_amendment(a).unwrap();

        assert!(i.check_covenant("MinEbitda").unwrap().compliant);
        let status = i.basket_status("GeneralInvestments").unwrap();
        assert_eq!(status.capacity, Value::from_int(40_000_000));
    }

    #[test]
    fn test_amended_program_rerenders() {
        let mut i = interp();
        i.apply_declared_amendment(1).unwrap();

        let document = crate::prose::generate_document_from(
            i.program(),
            crate::prose::DocumentMetadata::default(),
        );
        let covenants = document
            .articles
            .iter()
            .find(|a| a.number == 7)
            .unwrap()
            .sections
            .iter()
            .find(|s| s.number == "7.11")
            .unwrap();
        assert!(covenants.subsections[0].text.contains("5.25"));
        assert!(!covenants.subsections[0].text.contains("5.00"));
    }

    #[test]
    fn test_unsupported_field_refused() {
        let mut i = interp();
        let amendment = parse(
            "AMENDMENT 5 EFFECTIVE 2025-12-31 DESCRIPTION \"Illegal patch\"\n\
               MODIFY COVENANT MaxLeverage SET name = NewName",
        )
        .unwrap();
        let StatementNode::Amendment(a) = &amendment.statements[0].node else {
            panic!("expected amendment");
        };
        let err = i.apply_amendment(a).unwrap_err();
        assert!(matches!(err, ProVisoError::UnsupportedModification { .. }));
    }
}
