use serde::Serialize;

use crate::ast::CpStatus;
use crate::errors::{ProVisoError, Result};
use crate::events::DealEvent;

use super::Interpreter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpItemStatus {
    pub name: String,
    pub description: Option<String>,
    pub responsible: Option<String>,
    pub status: CpStatus,
    pub satisfies: Vec<String>,
}

/// per-checklist totals and item detail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpChecklistStatus {
    pub name: String,
    pub section: Option<String>,
    pub total: usize,
    pub satisfied: usize,
    pub waived: usize,
    pub pending: usize,
    /// every item satisfied or waived
    pub complete: bool,
    pub items: Vec<CpItemStatus>,
}

impl Interpreter {
    pub fn cp_checklist(&self, name: &str) -> Result<CpChecklistStatus> {
        let checklist = self.symbols.cp_checklists.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "conditions precedent",
                name: name.to_string(),
            }
        })?;
        let statuses = self.state.cp_statuses.get(name);

        let mut items = Vec::new();
        let mut satisfied = 0;
        let mut waived = 0;
        let mut pending = 0;
        for item in &checklist.items {
            let status = statuses
                .and_then(|s| s.get(&item.name))
                .copied()
                .unwrap_or(item.status);
            match status {
                CpStatus::Satisfied => satisfied += 1,
                CpStatus::Waived => waived += 1,
                CpStatus::Pending => pending += 1,
            }
            items.push(CpItemStatus {
                name: item.name.clone(),
                description: item.description.clone(),
                responsible: item.responsible.clone(),
                status,
                satisfies: item.satisfies.clone(),
            });
        }
        Ok(CpChecklistStatus {
            name: name.to_string(),
            section: checklist.section.clone(),
            total: items.len(),
            satisfied,
            waived,
            pending,
            complete: pending == 0,
            items,
        })
    }

    /// update one checklist item; satisfying it feeds the phase and
    /// transition machinery through `satisfies`
    pub fn update_cp_status(
        &mut self,
        checklist_name: &str,
        cp_name: &str,
        status: CpStatus,
    ) -> Result<()> {
        let checklist = self.symbols.cp_checklists.get(checklist_name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "conditions precedent",
                name: checklist_name.to_string(),
            }
        })?;
        let item = checklist
            .items
            .iter()
            .find(|i| i.name == cp_name)
            .ok_or_else(|| ProVisoError::UnknownSymbol {
                kind: "condition precedent item",
                name: cp_name.to_string(),
            })?;
        let satisfies = item.satisfies.clone();

        self.state
            .cp_statuses
            .entry(checklist_name.to_string())
            .or_default()
            .insert(cp_name.to_string(), status);

        if status == CpStatus::Satisfied {
            for condition in &satisfies {
                self.state.satisfied_conditions.insert(condition.clone());
            }
        }
        self.events.emit(DealEvent::CpStatusChanged {
            checklist: checklist_name.to_string(),
            item: cp_name.to_string(),
            status: status.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;

    const SOURCE: &str = "\
        PHASE PreClosing\n\
        PHASE Funded FROM ClosingComplete\n\
        CONDITIONS_PRECEDENT InitialFunding SECTION \"4.01\"\n\
          ITEM CreditAgreement DESCRIPTION \"Executed credit agreement\" STATUS satisfied\n\
          ITEM LegalOpinions RESPONSIBLE \"Borrower counsel\"\n\
          ITEM InsuranceCertificates SATISFIES ClosingComplete";

    fn interp() -> Interpreter {
        Interpreter::new(parse(SOURCE).unwrap()).unwrap()
    }

    #[test]
    fn test_checklist_totals() {
        let i = interp();
        let checklist = i.cp_checklist("InitialFunding").unwrap();
        assert_eq!(checklist.total, 3);
        assert_eq!(checklist.satisfied, 1);
        assert_eq!(checklist.pending, 2);
        assert_eq!(checklist.section.as_deref(), Some("4.01"));
        assert!(!checklist.complete);
    }

    #[test]
    fn test_satisfying_item_feeds_transitions() {
        let mut i = interp();
        i.update_cp_status("InitialFunding", "LegalOpinions", CpStatus::Waived)
            .unwrap();
        i.update_cp_status("InitialFunding", "InsuranceCertificates", CpStatus::Satisfied)
            .unwrap();

        let checklist = i.cp_checklist("InitialFunding").unwrap();
        assert!(checklist.complete);
        assert_eq!(checklist.waived, 1);

        // the satisfies edge reached the phase machinery
        assert!(i.is_condition_satisfied("ClosingComplete"));
        assert_eq!(i.transition_to("ClosingComplete").unwrap(), "Funded");
    }

    #[test]
    fn test_unknown_item_rejected() {
        let mut i = interp();
        let err = i
            .update_cp_status("InitialFunding", "Ghost", CpStatus::Satisfied)
            .unwrap_err();
        assert!(matches!(err, ProVisoError::UnknownSymbol { .. }));
    }
}
