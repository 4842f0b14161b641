//! Invoice/Document Resolver
//!
//! Walks order -> fiscal document -> document detail to find an authorized
//! document and its printable link. The ERP has exposed the document reference
//! in several shapes over time, so extraction is an ordered list of extractor
//! functions tried in sequence.

use crate::config::ResolverConfig;
use crate::domain::entities::local_order::FiscalDocumentLink;
use crate::domain::repositories::erp_api::{ErpApi, ErpResult, Lookup};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

type Extractor = fn(&Value) -> Option<String>;

/// Document-id extractors for an order payload, in priority order.
const DOCUMENT_ID_EXTRACTORS: &[(&str, Extractor)] = &[
    ("direct_field", direct_document_id),
    ("nested_object", nested_document_id),
    ("document_array", latest_document_in_array),
];

/// Printable link fields of a document payload, in priority order.
const PRINTABLE_URL_FIELDS: &[&str] = &["linkDanfe", "linkPDF", "linkPdf", "link"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolveOutcome {
    Resolved(FiscalDocumentLink),
    /// A document exists but is not usable yet.
    NotReady {
        document_id: String,
        status: Option<i64>,
        reason: String,
    },
    NotFound,
}

pub struct DocumentResolver {
    erp: Arc<dyn ErpApi>,
    config: ResolverConfig,
}

impl DocumentResolver {
    pub fn new(erp: Arc<dyn ErpApi>, config: ResolverConfig) -> Self {
        Self { erp, config }
    }

    pub async fn resolve_fiscal_document(&self, external_order_id: &str) -> ErpResult<ResolveOutcome> {
        let order = match self.erp.get_order(external_order_id).await? {
            Lookup::Found(order) => order,
            Lookup::NotFound => {
                debug!("ERP order {} not found", external_order_id);
                return Ok(ResolveOutcome::NotFound);
            }
        };

        let document_id = match extract_document_id(&order) {
            Some(id) => Some(id),
            None if self.config.search_documents_by_order => {
                let documents = self.erp.list_documents_for_order(external_order_id).await?;
                documents.iter().rev().find_map(value_id)
            }
            None => None,
        };

        let Some(document_id) = document_id else {
            debug!("No fiscal document referenced by ERP order {}", external_order_id);
            return Ok(ResolveOutcome::NotFound);
        };

        let document = match self.erp.get_fiscal_document(&document_id).await? {
            Lookup::Found(document) => document,
            Lookup::NotFound => {
                warn!(
                    "ERP order {} references fiscal document {} which does not exist",
                    external_order_id, document_id
                );
                return Ok(ResolveOutcome::NotFound);
            }
        };

        Ok(self.inspect_document(external_order_id, document_id, &document))
    }

    fn inspect_document(&self, external_order_id: &str, document_id: String, document: &Value) -> ResolveOutcome {
        let status = authorization_status(document);
        if status != Some(self.config.authorized_status_code) {
            debug!(
                "Fiscal document {} of order {} not authorized (status {:?})",
                document_id, external_order_id, status
            );
            return ResolveOutcome::NotReady {
                document_id,
                status,
                reason: "document not authorized".to_string(),
            };
        }

        let Some(printable_url) = printable_url(document) else {
            warn!(
                "Fiscal document {} is authorized but has no printable link",
                document_id
            );
            return ResolveOutcome::NotReady {
                document_id,
                status,
                reason: "authorized without printable link".to_string(),
            };
        };

        let document_number = document
            .get("numero")
            .and_then(scalar_string)
            .unwrap_or_else(|| document_id.clone());

        info!(
            "Resolved fiscal document {} for ERP order {}",
            document_number, external_order_id
        );
        ResolveOutcome::Resolved(FiscalDocumentLink {
            document_id,
            document_number,
            authorization_status: self.config.authorized_status_code,
            printable_url,
        })
    }
}

/// First non-empty document id any extractor finds.
pub fn extract_document_id(order: &Value) -> Option<String> {
    DOCUMENT_ID_EXTRACTORS.iter().find_map(|(name, extract)| {
        let id = extract(order)?;
        debug!("Fiscal document id {} found via {}", id, name);
        Some(id)
    })
}

fn direct_document_id(order: &Value) -> Option<String> {
    ["notaFiscalId", "idNotaFiscal", "nfeId"]
        .iter()
        .find_map(|field| order.get(*field).and_then(id_string))
}

fn nested_document_id(order: &Value) -> Option<String> {
    ["notaFiscal", "nfe"]
        .iter()
        .find_map(|field| order.get(*field).and_then(value_id))
}

fn latest_document_in_array(order: &Value) -> Option<String> {
    ["notasFiscais", "nfes"].iter().find_map(|field| {
        order
            .get(*field)
            .and_then(Value::as_array)
            .and_then(|docs| docs.iter().rev().find_map(value_id))
    })
}

fn value_id(object: &Value) -> Option<String> {
    object.get("id").and_then(id_string)
}

/// Numeric or string ids; the ERP uses 0 for "no document".
fn id_string(value: &Value) -> Option<String> {
    scalar_string(value).filter(|id| id != "0")
}

fn scalar_string(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

/// `situacao` arrives as `{"id": 5}`, `5` or `"5"`.
fn authorization_status(document: &Value) -> Option<i64> {
    let situacao = document.get("situacao")?;
    let raw = situacao.get("id").unwrap_or(situacao);
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn printable_url(document: &Value) -> Option<String> {
    PRINTABLE_URL_FIELDS
        .iter()
        .filter_map(|field| document.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .find(|url| !url.is_empty())
        .map(str::to_string)
}
