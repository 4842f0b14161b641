//! Order Matcher
//!
//! Re-identifies a local order in the ERP. Strategies run in order and stop at
//! the first confident hit:
//!
//! 1. exact store-number match (the ERP filter is fuzzy, so results are
//!    re-checked against the normalized query)
//! 2. total within tolerance, inside a date window around the order date,
//!    accepted only when exactly one candidate survives a complete scan of
//!    the window; a scan cut off by `search_max_pages` never yields a match
//!
//! Numbers with an internal-only prefix are skipped before any network call.
//! Nothing is persisted here.

use crate::config::MatcherConfig;
use crate::domain::entities::local_order::{LocalOrder, MatchResult, MatchStrategy};
use crate::domain::repositories::erp_api::{ErpApi, ErpResult, ExternalOrderSummary};
use crate::domain::value_objects::money::Money;
use crate::domain::value_objects::order_number::{has_internal_prefix, OrderNumber};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Business identifiers available for a match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchQuery {
    pub order_number: Option<String>,
    pub total: Option<Money>,
    pub order_date: Option<NaiveDate>,
}

impl From<&LocalOrder> for MatchQuery {
    fn from(order: &LocalOrder) -> Self {
        MatchQuery {
            order_number: order.store_order_number.clone(),
            total: Some(order.total),
            order_date: Some(order.order_date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched(MatchResult),
    /// Left undecided: internal number (no network call) or an incomplete scan.
    Skipped { reason: String },
    NotFound,
    /// More than one candidate survived; never guessed.
    Ambiguous { candidates: Vec<String> },
}

pub struct OrderMatcher {
    erp: Arc<dyn ErpApi>,
    config: MatcherConfig,
}

impl OrderMatcher {
    pub fn new(erp: Arc<dyn ErpApi>, config: MatcherConfig) -> Self {
        Self { erp, config }
    }

    pub fn internal_prefixes(&self) -> &[String] {
        &self.config.internal_prefixes
    }

    pub async fn match_order(&self, order: &LocalOrder) -> ErpResult<MatchOutcome> {
        self.find_external_order(&MatchQuery::from(order)).await
    }

    pub async fn find_external_order(&self, query: &MatchQuery) -> ErpResult<MatchOutcome> {
        let raw_number = query
            .order_number
            .as_deref()
            .filter(|n| !n.trim().is_empty());

        if let Some(raw) = raw_number {
            if has_internal_prefix(raw, &self.config.internal_prefixes) {
                debug!("Order number '{}' is internal-only, skipping match", raw);
                return Ok(MatchOutcome::Skipped {
                    reason: format!("internal order number {}", raw.trim()),
                });
            }

            if let Some(number) = OrderNumber::normalize(raw) {
                match self.match_by_number(&number).await? {
                    MatchOutcome::NotFound => {
                        debug!("No exact ERP match for store number {}, trying value/date window", number);
                    }
                    outcome => return Ok(outcome),
                }
            }
        }

        match (query.total, query.order_date) {
            (Some(total), Some(date)) => self.match_by_value_and_date(total, date).await,
            _ => Ok(MatchOutcome::NotFound),
        }
    }

    async fn match_by_number(&self, number: &OrderNumber) -> ErpResult<MatchOutcome> {
        let results = self.erp.search_orders_by_store_number(number.as_str()).await?;

        let exact: BTreeSet<String> = results
            .iter()
            .filter(|o| o.store_number.as_deref().map_or(false, |s| number.matches(s)))
            .map(|o| o.id.clone())
            .collect();

        if results.len() > exact.len() {
            debug!(
                "Discarded {} non-exact ERP results for store number {}",
                results.len() - exact.len(),
                number
            );
        }

        Ok(Self::decide(exact, MatchStrategy::ExactNumber))
    }

    async fn match_by_value_and_date(&self, total: Money, date: NaiveDate) -> ErpResult<MatchOutcome> {
        let window = Duration::days(self.config.date_window_days);
        let from = date - window;
        let to = date + window;

        let max_pages = self.config.search_max_pages.max(1);
        let mut candidates = BTreeSet::new();
        let mut complete = false;
        for page in 1..=max_pages {
            let orders = self
                .erp
                .search_orders_by_date_range(from, to, page, self.config.search_page_size)
                .await?;
            let fetched = orders.len();

            candidates.extend(
                orders
                    .iter()
                    .filter(|o| self.within_tolerance(o, total))
                    .map(|o| o.id.clone()),
            );

            if fetched < self.config.search_page_size as usize {
                complete = true;
                break;
            }
        }

        // Unscanned pages may hold more candidates, so only ambiguity is certain.
        if !complete && candidates.len() < 2 {
            warn!(
                "Date window {}..{} has more than {} pages, value/date match left undecided",
                from, to, max_pages
            );
            return Ok(MatchOutcome::Skipped {
                reason: format!("date window scan truncated after {} pages", max_pages),
            });
        }

        Ok(Self::decide(candidates, MatchStrategy::ValueDateWindow))
    }

    fn within_tolerance(&self, order: &ExternalOrderSummary, total: Money) -> bool {
        order
            .total
            .map_or(false, |t| t.abs_diff(total) <= self.config.total_tolerance)
    }

    fn decide(candidates: BTreeSet<String>, strategy: MatchStrategy) -> MatchOutcome {
        let mut ids: Vec<String> = candidates.into_iter().collect();
        match ids.len() {
            0 => MatchOutcome::NotFound,
            1 => {
                let matched_external_id = ids.remove(0);
                info!("Matched ERP order {} via {:?}", matched_external_id, strategy);
                MatchOutcome::Matched(MatchResult {
                    matched_external_id,
                    strategy_used: strategy,
                    confidence: strategy.confidence(),
                })
            }
            _ => MatchOutcome::Ambiguous { candidates: ids },
        }
    }
}
