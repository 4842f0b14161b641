use std::fmt;

/// Storefront order number in the form used for comparisons: symbols stripped,
/// uppercase, no surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Normalizes a raw number. Returns `None` when nothing alphanumeric remains.
    pub fn normalize(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_uppercase())
            .collect();

        if normalized.is_empty() {
            None
        } else {
            Some(OrderNumber(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact comparison against a raw value coming back from the ERP.
    pub fn matches(&self, raw: &str) -> bool {
        OrderNumber::normalize(raw).map_or(false, |other| other == *self)
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// True when the raw number carries one of the internal-only prefixes
/// (proposals, drafts) that never exist in the ERP.
pub fn has_internal_prefix(raw: &str, prefixes: &[String]) -> bool {
    let candidate = raw.trim().to_uppercase();
    prefixes
        .iter()
        .filter(|p| !p.trim().is_empty())
        .any(|p| candidate.starts_with(&p.trim().to_uppercase()))
}
