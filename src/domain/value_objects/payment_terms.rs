//! Payment-term codes agreed on a proposal and the installment plan each one implies.

use chrono::{Days, NaiveDate};

/// Known payment-term codes and their day offsets, one per installment.
const PAYMENT_TERMS: &[(&str, &[u64])] = &[
    ("a_vista", &[0]),
    ("30", &[30]),
    ("60", &[60]),
    ("90", &[90]),
    ("30_60", &[30, 60]),
    ("60_90", &[60, 90]),
    ("30_60_90", &[30, 60, 90]),
    ("30_60_90_120", &[30, 60, 90, 120]),
    ("60_90_120", &[60, 90, 120]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallmentPlan {
    code: String,
    offsets_days: Vec<u64>,
}

impl InstallmentPlan {
    /// Looks up a payment-term code. Accepts `60/90`, `60-90` and `60 90` spellings
    /// of `60_90`, and a trailing "dias"/"days" on single terms.
    pub fn from_code(raw: &str) -> Option<Self> {
        let code = canonical_code(raw);
        PAYMENT_TERMS
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(known, offsets)| InstallmentPlan {
                code: known.to_string(),
                offsets_days: offsets.to_vec(),
            })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn installment_count(&self) -> u32 {
        self.offsets_days.len() as u32
    }

    pub fn offsets_days(&self) -> &[u64] {
        &self.offsets_days
    }

    /// Due dates counted from `start`.
    pub fn due_dates(&self, start: NaiveDate) -> Vec<NaiveDate> {
        self.offsets_days
            .iter()
            .map(|d| start.checked_add_days(Days::new(*d)).unwrap_or(NaiveDate::MAX))
            .collect()
    }
}

fn canonical_code(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped = lowered
        .trim_end_matches("dias")
        .trim_end_matches("days")
        .trim();
    stripped
        .split(|c: char| c == '/' || c == '-' || c == ' ' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn known_codes() -> Vec<&'static str> {
    PAYMENT_TERMS.iter().map(|(code, _)| *code).collect()
}
