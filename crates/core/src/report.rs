// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Fee reports over consultations.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::Consultation;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Fee sum and consultation count for one period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeriodTotal {
    pub total: i64,
    pub count: usize,
}

impl PeriodTotal {
    fn add(&mut self, fee: i64) {
        self.total += fee;
        self.count += 1;
    }
}

/// Fees collected today, over the last seven days, and this month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeeTotals {
    pub day: PeriodTotal,
    /// Registrations 0 to 6 whole days before `now`.
    pub week: PeriodTotal,
    pub month: PeriodTotal,
}

impl FeeTotals {
    /// Aggregates by registration time. Calendar periods are in UTC.
    pub fn compute<'a>(
        consultations: impl IntoIterator<Item = &'a Consultation>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut totals = FeeTotals::default();
        for c in consultations {
            let at = c.cashier_registered_at;
            if at.date_naive() == now.date_naive() {
                totals.day.add(c.fee);
            }
            let days = (now - at).num_milliseconds().div_euclid(MS_PER_DAY);
            if (0..=6).contains(&days) {
                totals.week.add(c.fee);
            }
            if at.year() == now.year() && at.month() == now.month() {
                totals.month.add(c.fee);
            }
        }
        totals
    }
}

/// Groups consultations by patient name, preserving input order per patient.
///
/// Blank names are grouped under `"Unknown"`.
pub fn group_by_patient<'a>(
    consultations: impl IntoIterator<Item = &'a Consultation>,
) -> BTreeMap<String, Vec<&'a Consultation>> {
    let mut groups: BTreeMap<String, Vec<&Consultation>> = BTreeMap::new();
    for c in consultations {
        let name = match c.patient_name.trim() {
            "" => "Unknown",
            name => name,
        };
        groups.entry(name.to_string()).or_default().push(c);
    }
    groups
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
