use serde::Serialize;

use crate::ast::{PhaseDecl, Trigger};
use crate::errors::{ProVisoError, Result};
use crate::events::DealEvent;

use super::{Interpreter, PhaseEntry};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerConditionStatus {
    pub name: String,
    pub satisfied: bool,
}

/// evaluation of one transition rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionCheck {
    pub transition: String,
    pub triggered: bool,
    pub conditions: Vec<TriggerConditionStatus>,
    pub target_phase: Option<String>,
}

impl Interpreter {
    pub fn current_phase(&self) -> Option<&str> {
        self.state.current_phase.as_deref()
    }

    pub fn phase_history(&self) -> &[PhaseEntry] {
        &self.state.phase_history
    }

    pub(crate) fn current_phase_decl(&self) -> Option<&PhaseDecl> {
        self.state
            .current_phase
            .as_ref()
            .and_then(|name| self.symbols.phases.get(name))
    }

    /// phase activity rule: an explicit ACTIVATES list is a whitelist,
    /// and suspension always wins; with no phase set every covenant is
    /// active
    pub(crate) fn is_covenant_active(&self, covenant: &str) -> bool {
        let Some(phase) = self.current_phase_decl() else {
            return true;
        };
        let suspended = phase.covenants_suspended.iter().any(|c| c == covenant);
        if !phase.covenants_active.is_empty() {
            phase.covenants_active.iter().any(|c| c == covenant) && !suspended
        } else {
            !suspended
        }
    }

    /// mark a condition as achieved
    pub fn satisfy_condition(&mut self, name: &str) {
        self.state.satisfied_conditions.insert(name.to_string());
        self.events.emit(DealEvent::ConditionSatisfied {
            name: name.to_string(),
            timestamp: self.time.now(),
        });
    }

    pub fn is_condition_satisfied(&self, name: &str) -> bool {
        self.state.satisfied_conditions.contains(name)
    }

    /// evaluate every transition without firing any of them
    pub fn check_phase_transitions(&self) -> Result<Vec<TransitionCheck>> {
        let mut checks = Vec::new();
        for (name, transition) in &self.symbols.transitions {
            let (triggered, conditions) = self.evaluate_trigger(&transition.when)?;
            checks.push(TransitionCheck {
                transition: name.clone(),
                triggered,
                conditions,
                target_phase: self.phase_from(name).map(|p| p.name.clone()),
            });
        }
        Ok(checks)
    }

    pub(crate) fn evaluate_trigger(
        &self,
        trigger: &Trigger,
    ) -> Result<(bool, Vec<TriggerConditionStatus>)> {
        match trigger {
            Trigger::AllOf(names) => {
                let conditions = self.trigger_conditions(names);
                let triggered = conditions.iter().all(|c| c.satisfied);
                Ok((triggered, conditions))
            }
            Trigger::AnyOf(names) => {
                let conditions = self.trigger_conditions(names);
                let triggered = conditions.iter().any(|c| c.satisfied);
                Ok((triggered, conditions))
            }
            Trigger::Expr(expr) => Ok((self.evaluate_bool(expr)?, Vec::new())),
        }
    }

    fn trigger_conditions(&self, names: &[String]) -> Vec<TriggerConditionStatus> {
        names
            .iter()
            .map(|name| TriggerConditionStatus {
                name: name.clone(),
                satisfied: self.state.satisfied_conditions.contains(name)
                    || self.state.milestone_achievements.contains_key(name),
            })
            .collect()
    }

    fn phase_from(&self, event: &str) -> Option<&PhaseDecl> {
        self.symbols
            .phases
            .values()
            .find(|p| p.from.as_deref() == Some(event))
    }

    /// fire a named transition event: the event becomes a satisfied
    /// condition and the phase declared FROM it becomes current
    pub fn transition_to(&mut self, event: &str) -> Result<String> {
        let Some(phase_name) = self.phase_from(event).map(|p| p.name.clone()) else {
            return Err(ProVisoError::UnknownSymbol {
                kind: "phase transition",
                name: event.to_string(),
            });
        };
        self.state.satisfied_conditions.insert(event.to_string());
        self.state.current_phase = Some(phase_name.clone());
        self.state.phase_history.push(PhaseEntry {
            phase: phase_name.clone(),
            entered_at: self.time.now(),
            triggered_by: Some(event.to_string()),
        });
        self.events.emit(DealEvent::PhaseEntered {
            phase: phase_name.clone(),
            triggered_by: Some(event.to_string()),
            timestamp: self.time.now(),
        });
        Ok(phase_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;

    const PHASED: &str = "\
        DEFINE DSCRRatio = CFADS / DebtService\n\
        COVENANT DSCR REQUIRES DSCRRatio >= 1.20\n\
        COVENANT MaxLeverage REQUIRES Leverage <= 5.00\n\
        DEFINE Leverage = TotalDebt / EBITDA\n\
        PHASE Construction SUSPENDS DSCR\n\
        PHASE Operations FROM COD\n\
        TRANSITION COD WHEN ALL_OF(SubstantialCompletion, PermitsFinal)";

    const DATA: &str = r#"{"CFADS": 12000000, "DebtService": 8000000,
        "TotalDebt": 150000000, "EBITDA": 40000000}"#;

    fn interp() -> Interpreter {
        let mut i = Interpreter::new(parse(PHASED).unwrap()).unwrap();
        i.load_financials_json(DATA).unwrap();
        i
    }

    #[test]
    fn test_initial_phase_is_from_free_phase() {
        let i = interp();
        assert_eq!(i.current_phase(), Some("Construction"));
        assert_eq!(i.phase_history().len(), 1);
    }

    #[test]
    fn test_suspension_hides_covenant() {
        let i = interp();
        let active = i.check_active_covenants().unwrap();
        assert!(active.iter().all(|c| c.name != "DSCR"));
        assert!(active.iter().any(|c| c.name == "MaxLeverage"));
    }

    #[test]
    fn test_transition_reactivates() {
        let mut i = interp();
        let phase = i.transition_to("COD").unwrap();
        assert_eq!(phase, "Operations");
        assert_eq!(i.current_phase(), Some("Operations"));
        assert_eq!(i.phase_history().len(), 2);
        assert!(i.is_condition_satisfied("COD"));

        let active = i.check_active_covenants().unwrap();
        assert!(active.iter().any(|c| c.name == "DSCR"));
    }

    #[test]
    fn test_transition_check_reports_conditions() {
        let mut i = interp();
        i.satisfy_condition("SubstantialCompletion");
        let checks = i.check_phase_transitions().unwrap();
        let cod = checks.iter().find(|c| c.transition == "COD").unwrap();
        assert!(!cod.triggered);
        assert_eq!(cod.target_phase.as_deref(), Some("Operations"));
        let pending: Vec<_> = cod
            .conditions
            .iter()
            .filter(|c| !c.satisfied)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(pending, vec!["PermitsFinal"]);

        i.satisfy_condition("PermitsFinal");
        let checks = i.check_phase_transitions().unwrap();
        assert!(checks.iter().find(|c| c.transition == "COD").unwrap().triggered);
    }

    #[test]
    fn test_activation_whitelist_with_suspension_wins() {
        let source = "\
            COVENANT A REQUIRES X >= 1\n\
            COVENANT B REQUIRES X >= 1\n\
            PHASE Ramp ACTIVATES A, B SUSPENDS B";
        let mut i = Interpreter::new(parse(source).unwrap()).unwrap();
        i.load_financials_json(r#"{"X": 2}"#).unwrap();
        assert!(i.is_covenant_active("A"));
        assert!(!i.is_covenant_active("B"));
    }

    #[test]
    fn test_unknown_transition_event() {
        let mut i = interp();
        let err = i.transition_to("Nothing").unwrap_err();
        assert!(matches!(
            err,
            crate::errors::ProVisoError::UnknownSymbol { .. }
        ));
    }
}
