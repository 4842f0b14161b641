//! # ERP HTTP Client
//!
//! `ErpApi` over the ERP's REST v3 resources, routed through `ErpGateway`.
//!
//! | Operation                 | Request                                        |
//! |---------------------------|------------------------------------------------|
//! | orders by store number    | `GET /pedidos/vendas?numerosLojas[]=`          |
//! | orders by date range      | `GET /pedidos/vendas?dataInicial=&dataFinal=`  |
//! | order detail              | `GET /pedidos/vendas/{id}`                     |
//! | documents of an order     | `GET /nfe?idPedidoVenda=`                      |
//! | fiscal document detail    | `GET /nfe/{id}`                                |
//! | create order              | `POST /pedidos/vendas`                         |
//!
//! Responses wrap their payload in `{"data": ...}`. Amounts arrive as numbers
//! or strings and dates as `YYYY-MM-DD` (sometimes with a time part), so list
//! entries are parsed leniently and entries without an id are dropped.

use crate::domain::repositories::erp_api::{
    CreateOrderRequest, ErpApi, ErpResult, ExternalOrderSummary, Lookup,
};
use crate::domain::value_objects::money::Money;
use crate::infrastructure::erp_gateway::ErpGateway;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ORDERS_PATH: &str = "/pedidos/vendas";
const DOCUMENTS_PATH: &str = "/nfe";

pub struct ErpHttpClient {
    gateway: Arc<ErpGateway>,
    page_size: u32,
}

impl ErpHttpClient {
    pub fn new(gateway: Arc<ErpGateway>, page_size: u32) -> Self {
        Self {
            gateway,
            page_size: page_size.clamp(1, 100),
        }
    }
}

#[async_trait]
impl ErpApi for ErpHttpClient {
    async fn search_orders_by_store_number(
        &self,
        store_number: &str,
    ) -> ErpResult<Vec<ExternalOrderSummary>> {
        let query = [
            ("numerosLojas[]", store_number.to_string()),
            ("pagina", "1".to_string()),
            ("limite", self.page_size.to_string()),
        ];
        let response = self.gateway.call(Method::GET, ORDERS_PATH, &query, None).await?;
        Ok(parse_order_list(&response))
    }

    async fn search_orders_by_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        page: u32,
        page_size: u32,
    ) -> ErpResult<Vec<ExternalOrderSummary>> {
        let query = [
            ("dataInicial", from.format("%Y-%m-%d").to_string()),
            ("dataFinal", to.format("%Y-%m-%d").to_string()),
            ("pagina", page.max(1).to_string()),
            ("limite", page_size.clamp(1, 100).to_string()),
        ];
        let response = self.gateway.call(Method::GET, ORDERS_PATH, &query, None).await?;
        Ok(parse_order_list(&response))
    }

    async fn get_order(&self, order_id: &str) -> ErpResult<Lookup<Value>> {
        let path = format!("{}/{}", ORDERS_PATH, order_id);
        Ok(match self.gateway.get_optional(&path, &[]).await? {
            Lookup::Found(body) => Lookup::Found(unwrap_data(body)),
            Lookup::NotFound => Lookup::NotFound,
        })
    }

    async fn list_documents_for_order(&self, order_id: &str) -> ErpResult<Vec<Value>> {
        let query = [("idPedidoVenda", order_id.to_string())];
        match self.gateway.get_optional(DOCUMENTS_PATH, &query).await? {
            Lookup::Found(body) => Ok(match unwrap_data(body) {
                Value::Array(documents) => documents,
                _ => Vec::new(),
            }),
            Lookup::NotFound => Ok(Vec::new()),
        }
    }

    async fn get_fiscal_document(&self, document_id: &str) -> ErpResult<Lookup<Value>> {
        let path = format!("{}/{}", DOCUMENTS_PATH, document_id);
        Ok(match self.gateway.get_optional(&path, &[]).await? {
            Lookup::Found(body) => Lookup::Found(unwrap_data(body)),
            Lookup::NotFound => Lookup::NotFound,
        })
    }

    async fn create_order(&self, request: &CreateOrderRequest) -> ErpResult<Value> {
        info!(
            "Creating ERP order for store number {} ({} items, total {})",
            request.store_number,
            request.items.len(),
            request.grand_total
        );
        let body = order_body(request);
        self.gateway
            .call(Method::POST, ORDERS_PATH, &[], Some(&body))
            .await
    }
}

fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
        other => other,
    }
}

pub fn parse_order_list(body: &Value) -> Vec<ExternalOrderSummary> {
    let entries = match body.get("data").unwrap_or(body) {
        Value::Array(entries) => entries.as_slice(),
        _ => {
            debug!("Order listing without a data array");
            &[]
        }
    };
    entries.iter().filter_map(parse_order_summary).collect()
}

fn parse_order_summary(entry: &Value) -> Option<ExternalOrderSummary> {
    let Some(id) = entry.get("id").and_then(scalar) else {
        warn!("Skipping ERP order entry without id");
        return None;
    };
    Some(ExternalOrderSummary {
        id,
        number: entry.get("numero").and_then(scalar),
        store_number: entry.get("numeroLoja").and_then(scalar),
        date: entry.get("data").and_then(Value::as_str).and_then(parse_date),
        total: entry.get("total").and_then(parse_money),
    })
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn parse_money(value: &Value) -> Option<Money> {
    match value {
        Value::Number(n) => n.as_f64().and_then(|v| Money::from_decimal(v).ok()),
        Value::String(s) => Money::parse(s).ok(),
        _ => None,
    }
}

/// Numeric ids go out as numbers, anything else as strings.
fn id_value(raw: &str) -> Value {
    raw.trim()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw.trim()))
}

pub fn order_body(request: &CreateOrderRequest) -> Value {
    let items: Vec<Value> = request
        .items
        .iter()
        .map(|item| {
            json!({
                "codigo": item.code,
                "descricao": item.description,
                "quantidade": item.quantity,
                "valor": item.unit_price.as_decimal(),
            })
        })
        .collect();

    let installments: Vec<Value> = request
        .installments
        .iter()
        .map(|p| {
            json!({
                "dataVencimento": p.due_date.format("%Y-%m-%d").to_string(),
                "valor": p.amount.as_decimal(),
            })
        })
        .collect();

    let address = &request.delivery_address;
    let mut body = json!({
        "contato": { "id": id_value(&request.contact_id) },
        "data": request.order_date.format("%Y-%m-%d").to_string(),
        "numeroLoja": request.store_number,
        "itens": items,
        "totalProdutos": request.items_total.as_decimal(),
        "total": request.grand_total.as_decimal(),
        "parcelas": installments,
        "transporte": {
            "frete": request.freight.as_decimal(),
            "etiqueta": {
                "endereco": address.street,
                "numero": address.number,
                "complemento": address.complement.clone().unwrap_or_default(),
                "bairro": address.district,
                "municipio": address.city,
                "uf": address.state,
                "cep": address.postal_code,
            }
        },
        "observacoesInternas": format!("Condição de pagamento: {}", request.payment_terms),
    });

    if let Some(map) = body.as_object_mut() {
        if let Some(salesperson) = &request.salesperson_id {
            map.insert("vendedor".to_string(), json!({ "id": id_value(salesperson) }));
        }
        if let Some(notes) = request.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            map.insert("observacoes".to_string(), Value::from(notes));
        }
    }
    body
}
