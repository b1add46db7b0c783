use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::ast::Trigger;
use crate::errors::{ProVisoError, Result};
use crate::events::DealEvent;
use crate::value::Value;

use super::{Interpreter, RegulatoryState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneState {
    Pending,
    AtRisk,
    Breached,
    Achieved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MilestoneStatus {
    pub name: String,
    pub status: MilestoneState,
    pub target_date: Option<NaiveDate>,
    pub longstop_date: Option<NaiveDate>,
    pub achieved_date: Option<NaiveDate>,
    pub prerequisites_met: bool,
    pub missing_prerequisites: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicalProgress {
    pub name: String,
    pub measurement: String,
    pub target_value: Value,
    pub current_value: Value,
    pub completion_percent: Value,
    pub achieved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegulatoryItem {
    pub name: String,
    pub agency: String,
    pub requirement_type: String,
    pub status: String,
    pub approval_date: Option<NaiveDate>,
    pub required_for: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegulatoryChecklist {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub items: Vec<RegulatoryItem>,
}

impl Interpreter {
    // ------------------------------------------------------------------
    // construction milestones
    // ------------------------------------------------------------------

    /// milestone state as of a date (defaults to today)
    pub fn milestone_status(
        &self,
        name: &str,
        as_of: Option<NaiveDate>,
    ) -> Result<MilestoneStatus> {
        let milestone = self.symbols.milestones.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "milestone",
                name: name.to_string(),
            }
        })?;
        let as_of = as_of.unwrap_or_else(|| self.today());
        let achieved_date = self.state.milestone_achievements.get(name).copied();

        let status = if achieved_date.is_some() {
            MilestoneState::Achieved
        } else if milestone.longstop_date.map_or(false, |d| as_of > d) {
            MilestoneState::Breached
        } else if milestone.target_date.map_or(false, |d| as_of > d) {
            MilestoneState::AtRisk
        } else {
            MilestoneState::Pending
        };

        let (prerequisites_met, missing_prerequisites) = match &milestone.requires {
            Some(trigger) => {
                let (met, conditions) = self.evaluate_trigger(trigger)?;
                let missing = conditions
                    .into_iter()
                    .filter(|c| !c.satisfied)
                    .map(|c| c.name)
                    .collect();
                (met, missing)
            }
            None => (true, Vec::new()),
        };

        Ok(MilestoneStatus {
            name: name.to_string(),
            status,
            target_date: milestone.target_date,
            longstop_date: milestone.longstop_date,
            achieved_date,
            prerequisites_met,
            missing_prerequisites,
        })
    }

    /// record achievement and fire the milestone's triggers
    pub fn achieve_milestone(&mut self, name: &str, date: Option<NaiveDate>) -> Result<()> {
        let milestone = self.symbols.milestones.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "milestone",
                name: name.to_string(),
            }
        })?;
        let triggers = milestone.triggers.clone();
        let date = date.unwrap_or_else(|| self.today());

        self.state.milestone_achievements.insert(name.to_string(), date);
        self.state.satisfied_conditions.insert(name.to_string());
        for trigger in &triggers {
            self.state.satisfied_conditions.insert(trigger.clone());
        }
        self.events.emit(DealEvent::MilestoneAchieved {
            milestone: name.to_string(),
            date,
            triggers_fired: triggers,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // technical milestones
    // ------------------------------------------------------------------

    /// measured progress toward a technical milestone
    pub fn technical_milestone_progress(&self, name: &str) -> Result<TechnicalProgress> {
        let milestone = self.symbols.technical_milestones.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "technical milestone",
                name: name.to_string(),
            }
        })?;
        let target_value = self.evaluate(&milestone.target_value)?;
        let current_value = match &milestone.current_value {
            Some(expr) => self.evaluate(expr)?,
            None => Value::ZERO,
        };
        let completion_percent = current_value / target_value * Value::from_int(100);
        Ok(TechnicalProgress {
            name: name.to_string(),
            measurement: milestone.measurement.clone(),
            target_value,
            current_value,
            completion_percent,
            achieved: self.state.technical_achievements.contains_key(name)
                || current_value >= target_value,
        })
    }

    /// the first observation of current >= target auto-achieves the
    /// milestone and fires its triggers
    pub fn is_technical_milestone_achieved(&mut self, name: &str) -> Result<bool> {
        let progress = self.technical_milestone_progress(name)?;
        if !progress.achieved {
            return Ok(false);
        }
        if !self.state.technical_achievements.contains_key(name) {
            let date = self.today();
            let triggers = self
                .symbols
                .technical_milestones
                .get(name)
                .map(|m| m.triggers.clone())
                .unwrap_or_default();
            self.state.technical_achievements.insert(name.to_string(), date);
            self.state.satisfied_conditions.insert(name.to_string());
            for trigger in &triggers {
                self.state.satisfied_conditions.insert(trigger.clone());
            }
            self.events.emit(DealEvent::MilestoneAchieved {
                milestone: name.to_string(),
                date,
                triggers_fired: triggers,
            });
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // regulatory requirements
    // ------------------------------------------------------------------

    pub fn update_regulatory_status(
        &mut self,
        name: &str,
        status: &str,
        approval_date: Option<NaiveDate>,
    ) -> Result<()> {
        let requirement = self.symbols.regulatory.get(name).ok_or_else(|| {
            ProVisoError::UnknownSymbol {
                kind: "regulatory requirement",
                name: name.to_string(),
            }
        })?;
        let satisfies = requirement.satisfies.clone();
        let old_status = self
            .state
            .regulatory_statuses
            .get(name)
            .map(|s| s.status.clone())
            .unwrap_or_else(|| "pending".to_string());

        self.state.regulatory_statuses.insert(
            name.to_string(),
            RegulatoryState {
                status: status.to_string(),
                approval_date,
            },
        );
        if status == "approved" {
            self.state.satisfied_conditions.insert(name.to_string());
            for condition in &satisfies {
                self.state.satisfied_conditions.insert(condition.clone());
            }
        }
        self.events.emit(DealEvent::RegulatoryStatusChanged {
            requirement: name.to_string(),
            old_status,
            new_status: status.to_string(),
        });
        Ok(())
    }

    /// counts by status plus per-item detail
    pub fn regulatory_checklist(&self) -> RegulatoryChecklist {
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut items = Vec::new();
        for (name, requirement) in &self.symbols.regulatory {
            let state = self.state.regulatory_statuses.get(name);
            let status = state
                .map(|s| s.status.clone())
                .unwrap_or_else(|| requirement.status.clone());
            *by_status.entry(status.clone()).or_insert(0) += 1;
            items.push(RegulatoryItem {
                name: name.clone(),
                agency: requirement.agency.clone(),
                requirement_type: requirement.requirement_type.clone(),
                status,
                approval_date: state.and_then(|s| s.approval_date),
                required_for: requirement.required_for.clone(),
            });
        }
        RegulatoryChecklist {
            total: items.len(),
            by_status,
            items,
        }
    }

    /// every requirement naming this phase is approved
    pub fn phase_regulatory_ready(&self, phase: &str) -> bool {
        self.symbols
            .regulatory
            .iter()
            .filter(|(_, r)| r.required_for.as_deref() == Some(phase))
            .all(|(name, _)| {
                self.state
                    .regulatory_statuses
                    .get(name)
                    .map_or(false, |s| s.status == "approved")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::parse;
    use chrono::{TimeZone, Utc};
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use rust_decimal_macros::dec;

    fn interp_at(source: &str, json: &str, ymd: (i32, u32, u32)) -> Interpreter {
        let now = Utc
            .with_ymd_and_hms(ymd.0, ymd.1, ymd.2, 12, 0, 0)
            .unwrap();
        let mut i = Interpreter::with_time(
            parse(source).unwrap(),
            SafeTimeProvider::new(TimeSource::Test(now)),
        )
        .unwrap();
        if !json.is_empty() {
            i.load_financials_json(json).unwrap();
        }
        i
    }

    const MILESTONES: &str = "\
        MILESTONE NoticeToProceed TARGET 2024-03-01\n\
        MILESTONE SubstantialCompletion TARGET 2025-06-30 LONGSTOP 2025-12-31 \
          TRIGGERS COD REQUIRES ALL_OF(NoticeToProceed)";

    #[test]
    fn test_status_progression() {
        let i = interp_at(MILESTONES, "", (2025, 3, 1));
        let status = i.milestone_status("SubstantialCompletion", None).unwrap();
        assert_eq!(status.status, MilestoneState::Pending);

        // past target, inside longstop
        let at_risk = i
            .milestone_status(
                "SubstantialCompletion",
                NaiveDate::from_ymd_opt(2025, 8, 1),
            )
            .unwrap();
        assert_eq!(at_risk.status, MilestoneState::AtRisk);

        // past longstop
        let breached = i
            .milestone_status(
                "SubstantialCompletion",
                NaiveDate::from_ymd_opt(2026, 1, 15),
            )
            .unwrap();
        assert_eq!(breached.status, MilestoneState::Breached);
    }

    #[test]
    fn test_prerequisites_and_triggers() {
        let mut i = interp_at(MILESTONES, "", (2025, 3, 1));
        let status = i.milestone_status("SubstantialCompletion", None).unwrap();
        assert!(!status.prerequisites_met);
        assert_eq!(status.missing_prerequisites, vec!["NoticeToProceed"]);

        i.achieve_milestone("NoticeToProceed", None).unwrap();
        let status = i.milestone_status("SubstantialCompletion", None).unwrap();
        assert!(status.prerequisites_met);

        i.achieve_milestone("SubstantialCompletion", None).unwrap();
        assert!(i.is_condition_satisfied("COD"));
        let status = i.milestone_status("SubstantialCompletion", None).unwrap();
        assert_eq!(status.status, MilestoneState::Achieved);
    }

    #[test]
    fn test_technical_milestone_auto_achieves() {
        let source = "\
            TECHNICAL_MILESTONE GridSync MEASUREMENT \"MW synchronized\" \
              TARGET_VALUE 200 CURRENT_VALUE InstalledMW TRIGGERS MechanicalComplete";
        let mut i = interp_at(source, r#"{"InstalledMW": 150}"#, (2025, 3, 1));

        assert!(!i.is_technical_milestone_achieved("GridSync").unwrap());
        let progress = i.technical_milestone_progress("GridSync").unwrap();
        assert_eq!(progress.completion_percent, Value::from_int(75));

        i.load_financials_json(r#"{"InstalledMW": 205}"#).unwrap();
        assert!(i.is_technical_milestone_achieved("GridSync").unwrap());
        assert!(i.is_condition_satisfied("MechanicalComplete"));
        let progress = i.technical_milestone_progress("GridSync").unwrap();
        assert_eq!(
            progress.completion_percent.as_decimal().unwrap().round_dp(1),
            dec!(102.5)
        );
    }

    #[test]
    fn test_regulatory_checklist_and_phase_ready() {
        let source = "\
            REGULATORY FercApproval AGENCY \"FERC\" TYPE \"Market-based rates\" \
              REQUIRED_FOR Operations STATUS pending SATISFIES RegulatoryClear\n\
            REGULATORY InterconnectAgreement AGENCY \"ISO\" TYPE \"LGIA\" \
              REQUIRED_FOR Operations STATUS approved APPROVAL_DATE 2024-11-01";
        let mut i = interp_at(source, "", (2025, 3, 1));

        let checklist = i.regulatory_checklist();
        assert_eq!(checklist.total, 2);
        assert_eq!(checklist.by_status.get("pending"), Some(&1));
        assert_eq!(checklist.by_status.get("approved"), Some(&1));
        assert!(!i.phase_regulatory_ready("Operations"));

        // approval at load time already satisfied its own name
        assert!(i.is_condition_satisfied("InterconnectAgreement"));

        i.update_regulatory_status(
            "FercApproval",
            "approved",
            NaiveDate::from_ymd_opt(2025, 2, 1),
        )
        .unwrap();
        assert!(i.phase_regulatory_ready("Operations"));
        assert!(i.is_condition_satisfied("RegulatoryClear"));
    }
}
