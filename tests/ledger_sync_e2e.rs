//! End-to-end: operator API -> service -> SQLite ledger -> gateway -> ERP mock.

mod common;

use chrono::NaiveDate;
use common::{credential_manager, fast_sync_config, memory_pool, MockErp};
use ledgersync::application::actors::reconciliation_actor::{ReconciliationActor, ReconciliationHandle};
use ledgersync::application::handlers::sync_handler::router;
use ledgersync::application::services::LedgerSyncService;
use ledgersync::domain::entities::local_order::LocalOrder;
use ledgersync::domain::entities::proposal::{DeliveryAddress, Proposal, ProposalItem, ProposalStatus};
use ledgersync::domain::entities::installment::InstallmentOrigin;
use ledgersync::domain::repositories::erp_api::ErpApi;
use ledgersync::domain::repositories::ledger_repository::{LedgerRepository, SettlementProgress};
use ledgersync::domain::services::document_resolver::DocumentResolver;
use ledgersync::domain::services::order_matcher::OrderMatcher;
use ledgersync::domain::services::reconciliation::{DocumentBackfill, LinkageBackfill};
use ledgersync::domain::services::settlement::SettlementOrchestrator;
use ledgersync::domain::value_objects::money::Money;
use ledgersync::infrastructure::erp_client::ErpHttpClient;
use ledgersync::infrastructure::erp_gateway::ErpGateway;
use ledgersync::persistence::backfill_audit::{BackfillAuditRepository, SqliteBackfillAudit};
use ledgersync::persistence::ledger_repository::SqliteLedgerRepository;
use ledgersync::rate_limit::{create_rate_limiter, RateLimiterConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Harness {
    mock: MockErp,
    ledger: Arc<SqliteLedgerRepository>,
    audit: Arc<SqliteBackfillAudit>,
    reconciliation: ReconciliationHandle,
    api_url: String,
    http: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let mock = MockErp::start().await;
        let config = fast_sync_config(&mock);
        let pool = memory_pool().await;

        let credentials = credential_manager(&mock, &pool).await;
        let gateway = Arc::new(ErpGateway::new(config.gateway.clone(), credentials).unwrap());
        let erp: Arc<dyn ErpApi> = Arc::new(ErpHttpClient::new(gateway, config.matcher.search_page_size));

        let ledger = Arc::new(SqliteLedgerRepository::new(pool.clone()));
        let ledger_dyn: Arc<dyn LedgerRepository> = ledger.clone();
        let audit = Arc::new(SqliteBackfillAudit::new(pool.clone()));
        let audit_dyn: Arc<dyn BackfillAuditRepository> = audit.clone();

        let matcher = Arc::new(OrderMatcher::new(erp.clone(), config.matcher.clone()));
        let resolver = Arc::new(DocumentResolver::new(erp.clone(), config.resolver.clone()));
        let reconciliation = ReconciliationActor::spawn(
            Arc::new(LinkageBackfill::new(ledger_dyn.clone(), matcher, config.backfill.clone())),
            Arc::new(DocumentBackfill::new(ledger_dyn.clone(), resolver, config.backfill.clone())),
            Some(audit_dyn),
            CancellationToken::new(),
        );
        let orchestrator = Arc::new(SettlementOrchestrator::new(erp, ledger_dyn.clone()));
        let service = LedgerSyncService::new(orchestrator, ledger_dyn, reconciliation.clone());

        let app = router(
            service,
            create_rate_limiter(RateLimiterConfig {
                requests_per_minute: 600,
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            mock,
            ledger,
            audit,
            reconciliation,
            api_url,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str) -> (u16, Value) {
        let response = self
            .http
            .post(format!("{}{}", self.api_url, path))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

fn approved_proposal(id: &str) -> Proposal {
    let item = |id: &str, code: &str, qty: f64, cents: i64| ProposalItem {
        id: id.to_string(),
        description: format!("Item {}", id),
        external_product_code: Some(code.to_string()),
        quantity: qty,
        unit_price: Money::from_cents(cents),
        list_price: Money::from_cents(cents),
        discount_pct: None,
    };
    Proposal {
        id: id.to_string(),
        number: "P-100".to_string(),
        status: ProposalStatus::Approved,
        customer_external_id: "1234".to_string(),
        customer_name: "Paróquia São José".to_string(),
        agent_id: "agent-1".to_string(),
        agent_external_id: Some("55".to_string()),
        commission_rate_pct: 1.5,
        payment_terms: "60_90".to_string(),
        blanket_discount_pct: 0.0,
        freight: Money::ZERO,
        delivery_address: Some(DeliveryAddress {
            street: "Rua das Flores".to_string(),
            number: "100".to_string(),
            complement: None,
            district: "Centro".to_string(),
            city: "Curitiba".to_string(),
            state: "PR".to_string(),
            postal_code: "80000-000".to_string(),
        }),
        notes: None,
        issued_on: day(10),
        items: vec![item("1", "SKU-1", 2.0, 25_000), item("2", "SKU-2", 1.0, 50_000)],
        external_order_id: None,
        external_order_number: None,
    }
}

fn local_order(id: &str, number: &str, cents: i64, date: NaiveDate) -> LocalOrder {
    LocalOrder {
        id: id.to_string(),
        store_order_number: Some(number.to_string()),
        total: Money::from_cents(cents),
        order_date: date,
        external_order_id: None,
        fiscal_document_number: None,
        fiscal_document_url: None,
    }
}

#[tokio::test]
async fn test_settlement_through_api() {
    let h = Harness::start().await;
    h.ledger.insert_proposal(&approved_proposal("p-1")).await.unwrap();
    h.mock.enqueue(
        "POST",
        "/pedidos/vendas",
        201,
        json!({"data": {"id": 9001, "numero": 4512}}),
    );

    let (status, body) = h.get("/settlements/p-1").await;
    assert_eq!(status, 200);
    assert_eq!(body["progress"], "NotStarted");

    let (status, body) = h.post("/settlements/p-1").await;
    assert_eq!(status, 200, "body: {}", body);
    assert_eq!(body["external_order_id"], "9001");
    assert_eq!(body["external_order_number"], "4512");
    assert_eq!(body["installment_count"], 2);

    let created = h.mock.requests_to("POST", "/pedidos/vendas");
    assert_eq!(created.len(), 1);
    let sent: Value = serde_json::from_str(&created[0].body).unwrap();
    assert_eq!(sent["contato"]["id"], 1234);
    assert_eq!(sent["vendedor"]["id"], 55);
    assert_eq!(sent["itens"].as_array().map(Vec::len), Some(2));
    assert_eq!(sent["parcelas"].as_array().map(Vec::len), Some(2));

    let proposal = h.ledger.get_proposal("p-1").await.unwrap().unwrap();
    assert_eq!(proposal.status, ProposalStatus::Invoiced);
    assert_eq!(proposal.external_order_number.as_deref(), Some("4512"));

    let installments = h.ledger.list_installments("p-1").await.unwrap();
    assert_eq!(installments.len(), 2);
    assert!(installments
        .iter()
        .all(|i| i.origin == InstallmentOrigin::Invoiced && i.external_order_id.as_deref() == Some("9001")));
    let gross: i64 = installments.iter().map(|i| i.gross_amount.cents()).sum();
    assert_eq!(gross, 100_000);

    assert_eq!(
        h.ledger.settlement_progress("p-1").await.unwrap(),
        Some(SettlementProgress::InstallmentsGenerated)
    );

    // Already invoiced: rejected before any ERP call.
    let (status, body) = h.post("/settlements/p-1").await;
    assert_eq!(status, 422);
    assert_eq!(body["stage"], "validating");
    assert_eq!(h.mock.requests_to("POST", "/pedidos/vendas").len(), 1);
    assert_eq!(h.ledger.list_installments("p-1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_order_creation_leaves_ledger_untouched() {
    let h = Harness::start().await;
    h.ledger.insert_proposal(&approved_proposal("p-2")).await.unwrap();
    h.mock.respond("POST", "/pedidos/vendas", 400, json!({"error": {"message": "produto inexistente"}}));

    let (status, body) = h.post("/settlements/p-2").await;
    assert_eq!(status, 502);
    assert_eq!(body["stage"], "external_order_creating");

    assert_eq!(
        h.ledger.settlement_progress("p-2").await.unwrap(),
        Some(SettlementProgress::NotStarted)
    );
    let (status, _) = h.get("/settlements/unknown").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_linkage_then_document_backfill() {
    let h = Harness::start().await;
    h.ledger.insert_order(&local_order("o-1", "A-17", 100_000, day(10))).await.unwrap();
    h.ledger.insert_order(&local_order("o-2", "#D-5", 20_000, day(11))).await.unwrap();

    h.mock.respond(
        "GET",
        "/pedidos/vendas",
        200,
        json!({"data": [
            {"id": 7001, "numero": 301, "numeroLoja": "A-17", "data": "2025-03-10", "total": 1000.0}
        ]}),
    );

    let (status, report) = h.post("/reconciliation/linkages").await;
    assert_eq!(status, 200, "report: {}", report);
    // The internal-only order is never selected for matching.
    assert_eq!(report["processed"], 1);
    assert_eq!(report["updated"], 1);
    assert_eq!(report["skipped"], 0);
    assert_eq!(report["failed"], 0);

    let linked = h.ledger.get_order("o-1").await.unwrap().unwrap();
    assert_eq!(linked.external_order_id.as_deref(), Some("7001"));
    let internal = h.ledger.get_order("o-2").await.unwrap().unwrap();
    assert_eq!(internal.external_order_id, None);

    // The internal-only number never reached the ERP.
    assert!(h
        .mock
        .requests_to("GET", "/pedidos/vendas")
        .iter()
        .all(|r| !r.query.as_deref().unwrap_or_default().contains("D-5")));

    h.mock.respond(
        "GET",
        "/pedidos/vendas/7001",
        200,
        json!({"data": {"id": 7001, "notaFiscal": {"id": 77}}}),
    );
    h.mock.respond(
        "GET",
        "/nfe/77",
        200,
        json!({"data": {"id": 77, "numero": "000123", "situacao": {"id": 5}, "linkDanfe": "https://erp.example/danfe/77"}}),
    );

    let (status, report) = h.post("/reconciliation/documents").await;
    assert_eq!(status, 200, "report: {}", report);
    assert_eq!(report["updated"], 1);

    let documented = h.ledger.get_order("o-1").await.unwrap().unwrap();
    assert_eq!(documented.fiscal_document_number.as_deref(), Some("000123"));
    assert_eq!(
        documented.fiscal_document_url.as_deref(),
        Some("https://erp.example/danfe/77")
    );

    // Nothing left to resolve.
    let (_, report) = h.post("/reconciliation/documents").await;
    assert_eq!(report["processed"], 0);

    let (status, body) = h.get("/reconciliation/status").await;
    assert_eq!(status, 200);
    assert_eq!(body["stats"]["total_runs"], 3);

    let latest = h
        .audit
        .latest_report(ledgersync::domain::services::reconciliation::BackfillJob::Linkage)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.updated, 1);

    h.reconciliation.shutdown().await;
}

#[tokio::test]
async fn test_revoked_refresh_token_aborts_sweep() {
    let h = Harness::start().await;
    h.ledger.insert_order(&local_order("o-1", "A-17", 100_000, day(10))).await.unwrap();
    h.ledger.insert_order(&local_order("o-2", "A-18", 50_000, day(12))).await.unwrap();
    h.mock.respond("GET", "/pedidos/vendas", 401, json!({"error": "invalid_token"}));
    h.mock.respond("POST", common::TOKEN_PATH, 400, json!({"error": "invalid_grant"}));

    let (status, report) = h.post("/reconciliation/linkages").await;
    assert_eq!(status, 200);
    assert_eq!(report["failed"], 1);
    assert!(report["aborted"].is_string());
    assert_eq!(h.ledger.get_order("o-2").await.unwrap().unwrap().external_order_id, None);
}

#[tokio::test]
async fn test_health() {
    let h = Harness::start().await;
    let (status, body) = h.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}
