use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ast::PeriodType;
use crate::errors::{ProVisoError, Result};

/// one reporting period and its metric values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Period {
    pub period: String,
    pub period_end: NaiveDate,
    pub period_type: PeriodType,
    pub data: BTreeMap<String, Decimal>,
}

/// financial inputs; simple mode and multi-period mode are disjoint
///
/// Loading any multi-period shaped data promotes the store into
/// multi-period mode for good. The default evaluation period is the
/// chronologically latest.
#[derive(Debug, Clone, PartialEq)]
pub enum FinancialData {
    Simple(BTreeMap<String, Decimal>),
    MultiPeriod {
        periods: Vec<Period>,
        evaluation_period: Option<String>,
    },
}

impl Default for FinancialData {
    fn default() -> Self {
        FinancialData::Simple(BTreeMap::new())
    }
}

/// chronological sort key: `YYYY-Qn` -> year*100 + n*25,
/// `YYYY-MM` -> year*100 + month, `YYYY` -> year*100
pub fn period_sort_key(period: &str) -> i64 {
    let mut parts = period.splitn(2, '-');
    let year: i64 = parts.next().and_then(|y| y.parse().ok()).unwrap_or(0);
    match parts.next() {
        Some(rest) => {
            if let Some(quarter) = rest.strip_prefix('Q').and_then(|q| q.parse::<i64>().ok()) {
                year * 100 + quarter * 25
            } else if let Ok(month) = rest.parse::<i64>() {
                year * 100 + month
            } else {
                year * 100
            }
        }
        None => year * 100,
    }
}

impl FinancialData {
    pub fn is_multi_period(&self) -> bool {
        matches!(self, FinancialData::MultiPeriod { .. })
    }

    /// merge a flat snapshot; later writes overwrite earlier ones.
    /// In multi-period mode the values land on the current period.
    pub fn merge_simple(&mut self, values: BTreeMap<String, Decimal>) {
        match self {
            FinancialData::Simple(data) => data.extend(values),
            FinancialData::MultiPeriod { periods, evaluation_period } => {
                let current = evaluation_period.clone();
                if let Some(period) = periods
                    .iter_mut()
                    .find(|p| Some(&p.period) == current.as_ref())
                {
                    period.data.extend(values);
                }
            }
        }
    }

    /// append or merge a period, promoting into multi-period mode
    pub fn add_period(&mut self, new_period: Period) {
        let (periods, evaluation_period) = match self {
            FinancialData::MultiPeriod { periods, evaluation_period } => {
                (periods, evaluation_period)
            }
            FinancialData::Simple(_) => {
                *self = FinancialData::MultiPeriod {
                    periods: Vec::new(),
                    evaluation_period: None,
                };
                let FinancialData::MultiPeriod { periods, evaluation_period } = self else {
                    unreachable!();
                };
                (periods, evaluation_period)
            }
        };

        if let Some(existing) = periods.iter_mut().find(|p| p.period == new_period.period) {
            existing.data.extend(new_period.data);
            existing.period_end = new_period.period_end;
            existing.period_type = new_period.period_type;
        } else {
            periods.push(new_period);
            periods.sort_by_key(|p| period_sort_key(&p.period));
        }

        // default to the latest period
        if let Some(last) = periods.last() {
            let latest = last.period.clone();
            let stale = evaluation_period
                .as_ref()
                .map_or(true, |p| period_sort_key(p) < period_sort_key(&latest));
            if stale {
                *evaluation_period = Some(latest);
            }
        }
    }

    pub fn set_evaluation_period(&mut self, period: &str) -> Result<()> {
        match self {
            FinancialData::MultiPeriod { periods, evaluation_period } => {
                if periods.iter().any(|p| p.period == period) {
                    *evaluation_period = Some(period.to_string());
                    Ok(())
                } else {
                    Err(ProVisoError::InvalidPeriod {
                        period: period.to_string(),
                    })
                }
            }
            FinancialData::Simple(_) => Err(ProVisoError::InvalidPeriod {
                period: period.to_string(),
            }),
        }
    }

    pub fn evaluation_period(&self) -> Option<&str> {
        match self {
            FinancialData::MultiPeriod { evaluation_period, .. } => evaluation_period.as_deref(),
            FinancialData::Simple(_) => None,
        }
    }

    /// chronologically ordered period labels
    pub fn available_periods(&self) -> Vec<String> {
        match self {
            FinancialData::MultiPeriod { periods, .. } => {
                periods.iter().map(|p| p.period.clone()).collect()
            }
            FinancialData::Simple(_) => Vec::new(),
        }
    }

    pub fn periods(&self) -> &[Period] {
        match self {
            FinancialData::MultiPeriod { periods, .. } => periods,
            FinancialData::Simple(_) => &[],
        }
    }

    fn period_named(&self, name: &str) -> Option<&Period> {
        self.periods().iter().find(|p| p.period == name)
    }

    /// look a metric up in the given period, or the active one
    pub fn lookup(&self, name: &str, period_override: Option<&str>) -> Option<Decimal> {
        match self {
            FinancialData::Simple(data) => data.get(name).copied(),
            FinancialData::MultiPeriod { evaluation_period, .. } => {
                let label = period_override.or(evaluation_period.as_deref())?;
                self.period_named(label)?.data.get(name).copied()
            }
        }
    }

    /// adjust a metric in place (simple mode or the active period)
    pub fn adjust(&mut self, name: &str, delta: Decimal) {
        match self {
            FinancialData::Simple(data) => {
                let entry = data.entry(name.to_string()).or_insert(Decimal::ZERO);
                *entry += delta;
            }
            FinancialData::MultiPeriod { periods, evaluation_period } => {
                let current = evaluation_period.clone();
                if let Some(period) = periods
                    .iter_mut()
                    .find(|p| Some(&p.period) == current.as_ref())
                {
                    let entry = period.data.entry(name.to_string()).or_insert(Decimal::ZERO);
                    *entry += delta;
                }
            }
        }
    }

    /// overwrite a metric (simple mode or the active period)
    pub fn set(&mut self, name: &str, value: Decimal) {
        match self {
            FinancialData::Simple(data) => {
                data.insert(name.to_string(), value);
            }
            FinancialData::MultiPeriod { periods, evaluation_period } => {
                let current = evaluation_period.clone();
                if let Some(period) = periods
                    .iter_mut()
                    .find(|p| Some(&p.period) == current.as_ref())
                {
                    period.data.insert(name.to_string(), value);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// external snapshot shape
// ---------------------------------------------------------------------------

/// json-shaped financial snapshot supplied by callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FinancialSnapshot {
    MultiPeriod { periods: Vec<PeriodSnapshot> },
    Simple(BTreeMap<String, f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSnapshot {
    pub period: String,
    #[serde(rename = "periodEnd")]
    pub period_end: NaiveDate,
    #[serde(rename = "periodType")]
    pub period_type: PeriodType,
    pub data: BTreeMap<String, f64>,
}

pub(crate) fn decimal_map(values: BTreeMap<String, f64>) -> Result<BTreeMap<String, Decimal>> {
    values
        .into_iter()
        .map(|(name, v)| match Decimal::from_f64(v) {
            Some(d) => Ok((name, d)),
            None => Err(ProVisoError::FinancialData {
                message: format!("value for {} is not a finite number", name),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quarter(label: &str, end: (i32, u32, u32), ebitda: i64) -> Period {
        Period {
            period: label.to_string(),
            period_end: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
            period_type: PeriodType::Quarterly,
            data: BTreeMap::from([("EBITDA".to_string(), Decimal::from(ebitda))]),
        }
    }

    #[test]
    fn test_period_sort_keys() {
        assert!(period_sort_key("2024-Q3") < period_sort_key("2024-Q4"));
        assert!(period_sort_key("2024-Q4") < period_sort_key("2025-Q1"));
        assert!(period_sort_key("2024-01") < period_sort_key("2024-12"));
        assert!(period_sort_key("2023") < period_sort_key("2024"));
    }

    #[test]
    fn test_promotion_to_multi_period() {
        let mut data = FinancialData::default();
        assert!(!data.is_multi_period());
        data.add_period(quarter("2024-Q3", (2024, 9, 30), 36_000_000));
        assert!(data.is_multi_period());
        assert_eq!(data.evaluation_period(), Some("2024-Q3"));
    }

    #[test]
    fn test_latest_period_becomes_default() {
        let mut data = FinancialData::default();
        data.add_period(quarter("2024-Q4", (2024, 12, 31), 40_000_000));
        data.add_period(quarter("2024-Q3", (2024, 9, 30), 36_000_000));
        assert_eq!(data.evaluation_period(), Some("2024-Q4"));
        assert_eq!(
            data.available_periods(),
            vec!["2024-Q3".to_string(), "2024-Q4".to_string()]
        );
    }

    #[test]
    fn test_lookup_with_override() {
        let mut data = FinancialData::default();
        data.add_period(quarter("2024-Q3", (2024, 9, 30), 36_000_000));
        data.add_period(quarter("2024-Q4", (2024, 12, 31), 40_000_000));
        assert_eq!(data.lookup("EBITDA", None), Some(dec!(40000000)));
        assert_eq!(data.lookup("EBITDA", Some("2024-Q3")), Some(dec!(36000000)));
    }

    #[test]
    fn test_invalid_period_rejected() {
        let mut data = FinancialData::default();
        data.add_period(quarter("2024-Q3", (2024, 9, 30), 36_000_000));
        let err = data.set_evaluation_period("2019-Q1").unwrap_err();
        assert!(matches!(err, ProVisoError::InvalidPeriod { .. }));
    }

    #[test]
    fn test_snapshot_shapes_deserialize() {
        let simple: FinancialSnapshot =
            serde_json::from_str(r#"{"EBITDA": 36000000, "TotalDebt": 200000000}"#).unwrap();
        assert!(matches!(simple, FinancialSnapshot::Simple(_)));

        let multi: FinancialSnapshot = serde_json::from_str(
            r#"{"periods": [{"period": "2024-Q3", "periodEnd": "2024-09-30",
                 "periodType": "quarterly", "data": {"EBITDA": 36000000}}]}"#,
        )
        .unwrap();
        assert!(matches!(multi, FinancialSnapshot::MultiPeriod { .. }));
    }
}
