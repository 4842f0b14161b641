//! SQLite implementation of the local ledger.

use super::models::*;
use super::DbPool;
use crate::domain::entities::installment::{CommissionInstallment, RecognizedSale};
use crate::domain::entities::local_order::{FiscalDocumentLink, LocalOrder};
use crate::domain::entities::proposal::{Proposal, ProposalStatus};
use crate::domain::errors::RepositoryError;
use crate::domain::repositories::ledger_repository::{
    LedgerRepository, RepositoryResult, SettlementProgress,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tracing::{debug, error};

pub struct SqliteLedgerRepository {
    pool: DbPool,
}

/// Maps a sqlx error, turning unique violations into `Conflict`.
fn db_error(context: &str, e: sqlx::Error) -> RepositoryError {
    let unique = e
        .as_database_error()
        .map_or(false, |db| db.is_unique_violation());
    if unique {
        RepositoryError::Conflict(format!("{}: {}", context, e))
    } else {
        error!("{}: {}", context, e);
        RepositoryError::Storage(format!("{}: {}", context, e))
    }
}

impl SqliteLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Bumps the item to the newest attempt sequence of all jobs.
    async fn record_attempt(&self, job: &str, item_key: &str) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO backfill_attempts (job, item_key, attempts, attempt_seq, last_attempted_at)
            VALUES (?1, ?2, 1, (SELECT COALESCE(MAX(attempt_seq), 0) + 1 FROM backfill_attempts), ?3)
            ON CONFLICT(job, item_key) DO UPDATE SET
                attempts = attempts + 1,
                attempt_seq = excluded.attempt_seq,
                last_attempted_at = excluded.last_attempted_at
            "#,
        )
        .bind(job)
        .bind(item_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record backfill attempt", e))?;

        debug!("Recorded {} attempt for {}", job, item_key);
        Ok(())
    }

    /// Writes a proposal and its items; used by the proposal editor and by tests.
    pub async fn insert_proposal(&self, proposal: &Proposal) -> RepositoryResult<()> {
        let address_json = proposal
            .delivery_address
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Storage(format!("Failed to encode address: {}", e)))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO proposals (
                id, number, status, customer_external_id, customer_name, agent_id,
                agent_external_id, commission_rate_pct, payment_terms, blanket_discount_pct,
                freight_cents, delivery_address_json, notes, issued_on,
                external_order_id, external_order_number
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&proposal.id)
        .bind(&proposal.number)
        .bind(proposal.status.as_str())
        .bind(&proposal.customer_external_id)
        .bind(&proposal.customer_name)
        .bind(&proposal.agent_id)
        .bind(&proposal.agent_external_id)
        .bind(proposal.commission_rate_pct)
        .bind(&proposal.payment_terms)
        .bind(proposal.blanket_discount_pct)
        .bind(proposal.freight.cents())
        .bind(&address_json)
        .bind(&proposal.notes)
        .bind(proposal.issued_on)
        .bind(&proposal.external_order_id)
        .bind(&proposal.external_order_number)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert proposal", e))?;

        for (position, item) in proposal.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO proposal_items (
                    id, proposal_id, position, description, external_product_code,
                    quantity, unit_price_cents, list_price_cents, discount_pct
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&item.id)
            .bind(&proposal.id)
            .bind(position as i64)
            .bind(&item.description)
            .bind(&item.external_product_code)
            .bind(item.quantity)
            .bind(item.unit_price.cents())
            .bind(item.list_price.cents())
            .bind(item.discount_pct)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert proposal item", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit proposal", e))?;
        debug!("Inserted proposal {} with {} items", proposal.id, proposal.items.len());
        Ok(())
    }

    /// Writes a local order as the order-placement path would.
    pub async fn insert_order(&self, order: &LocalOrder) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, store_order_number, total_cents, order_date,
                external_order_id, fiscal_document_number, fiscal_document_url
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&order.id)
        .bind(&order.store_order_number)
        .bind(order.total.cents())
        .bind(order.order_date)
        .bind(&order.external_order_id)
        .bind(&order.fiscal_document_number)
        .bind(&order.fiscal_document_url)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert order", e))?;
        Ok(())
    }

    pub async fn get_order(&self, order_id: &str) -> RepositoryResult<Option<LocalOrder>> {
        let record = sqlx::query_as::<_, OrderRecord>(
            r#"
            SELECT id, store_order_number, total_cents, order_date,
                   external_order_id, fiscal_document_number, fiscal_document_url
            FROM orders WHERE id = ?1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get order", e))?;
        Ok(record.map(LocalOrder::from))
    }

    pub async fn list_installments(&self, parent_ref: &str) -> RepositoryResult<Vec<CommissionInstallment>> {
        let records = sqlx::query_as::<_, InstallmentRecord>(
            r#"
            SELECT parent_ref, agent_id, installment_index, installment_count, gross_cents,
                   commission_cents, due_date, status, origin, external_order_id,
                   fiscal_document_number, fiscal_document_url
            FROM commission_installments
            WHERE parent_ref = ?1
            ORDER BY installment_index
            "#,
        )
        .bind(parent_ref)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list installments", e))?;

        records.into_iter().map(CommissionInstallment::try_from).collect()
    }
}

#[async_trait]
impl LedgerRepository for SqliteLedgerRepository {
    async fn get_proposal(&self, proposal_id: &str) -> RepositoryResult<Option<Proposal>> {
        let record = sqlx::query_as::<_, ProposalRecord>(
            r#"
            SELECT id, number, status, customer_external_id, customer_name, agent_id,
                   agent_external_id, commission_rate_pct, payment_terms, blanket_discount_pct,
                   freight_cents, delivery_address_json, notes, issued_on,
                   external_order_id, external_order_number, settled_at
            FROM proposals WHERE id = ?1
            "#,
        )
        .bind(proposal_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get proposal", e))?;

        let Some(record) = record else {
            return Ok(None);
        };

        let items = sqlx::query_as::<_, ProposalItemRecord>(
            r#"
            SELECT id, proposal_id, position, description, external_product_code,
                   quantity, unit_price_cents, list_price_cents, discount_pct
            FROM proposal_items
            WHERE proposal_id = ?1
            ORDER BY position, id
            "#,
        )
        .bind(proposal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get proposal items", e))?;

        record.into_domain(items).map(Some)
    }

    async fn mark_proposal_settled(
        &self,
        proposal_id: &str,
        external_order_id: &str,
        external_order_number: &str,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE proposals
            SET status = ?1, external_order_id = ?2, external_order_number = ?3, settled_at = ?4
            WHERE id = ?5 AND status = ?6
            "#,
        )
        .bind(ProposalStatus::Invoiced.as_str())
        .bind(external_order_id)
        .bind(external_order_number)
        .bind(Utc::now())
        .bind(proposal_id)
        .bind(ProposalStatus::Approved.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to mark proposal settled", e))?;

        if result.rows_affected() == 0 {
            let status: Option<String> = sqlx::query_scalar("SELECT status FROM proposals WHERE id = ?1")
                .bind(proposal_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to read proposal status", e))?;
            return Err(match status {
                Some(status) => RepositoryError::Conflict(format!(
                    "proposal {} is {}, not {}",
                    proposal_id,
                    status,
                    ProposalStatus::Approved
                )),
                None => RepositoryError::NotFound(format!("proposal {}", proposal_id)),
            });
        }

        debug!("Proposal {} settled as ERP order {}", proposal_id, external_order_id);
        Ok(())
    }

    async fn insert_recognized_sale(&self, sale: &RecognizedSale) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO recognized_sales (
                proposal_id, external_order_id, external_order_number, agent_id,
                customer_name, total_cents, recognized_on
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&sale.proposal_id)
        .bind(&sale.external_order_id)
        .bind(&sale.external_order_number)
        .bind(&sale.agent_id)
        .bind(&sale.customer_name)
        .bind(sale.total.cents())
        .bind(sale.recognized_on)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert recognized sale", e))?;
        Ok(())
    }

    async fn insert_installments(&self, installments: &[CommissionInstallment]) -> RepositoryResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        if let Some(first) = installments.first() {
            let existing: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM commission_installments WHERE parent_ref = ?1")
                    .bind(&first.parent_ref)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| db_error("Failed to count installments", e))?;
            if existing > 0 {
                return Err(RepositoryError::Conflict(format!(
                    "{} already has {} installments",
                    first.parent_ref, existing
                )));
            }
        }

        for installment in installments {
            sqlx::query(
                r#"
                INSERT INTO commission_installments (
                    parent_ref, agent_id, installment_index, installment_count, gross_cents,
                    commission_cents, due_date, status, origin, external_order_id,
                    fiscal_document_number, fiscal_document_url
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
            )
            .bind(&installment.parent_ref)
            .bind(&installment.agent_id)
            .bind(installment.installment_index as i64)
            .bind(installment.installment_count as i64)
            .bind(installment.gross_amount.cents())
            .bind(installment.commission_amount.cents())
            .bind(installment.due_date)
            .bind(installment.status.as_str())
            .bind(installment.origin.as_str())
            .bind(&installment.external_order_id)
            .bind(&installment.fiscal_document_number)
            .bind(&installment.fiscal_document_url)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert installment", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit installments", e))?;
        debug!("Inserted {} installments", installments.len());
        Ok(())
    }

    async fn installment_count(&self, parent_ref: &str) -> RepositoryResult<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commission_installments WHERE parent_ref = ?1")
            .bind(parent_ref)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to count installments", e))?;
        Ok(count as u32)
    }

    async fn list_unlinked_orders(
        &self,
        limit: u32,
        excluded_prefixes: &[String],
    ) -> RepositoryResult<Vec<LocalOrder>> {
        let prefixes: Vec<String> = excluded_prefixes
            .iter()
            .map(|p| p.trim().to_uppercase())
            .filter(|p| !p.is_empty())
            .collect();

        let mut sql = String::from(
            r#"
            SELECT o.id AS id, o.store_order_number AS store_order_number,
                   o.total_cents AS total_cents, o.order_date AS order_date,
                   o.external_order_id AS external_order_id,
                   o.fiscal_document_number AS fiscal_document_number,
                   o.fiscal_document_url AS fiscal_document_url
            FROM orders o
            LEFT JOIN backfill_attempts a ON a.job = 'linkage' AND a.item_key = o.id
            WHERE o.external_order_id IS NULL
              AND o.store_order_number IS NOT NULL
              AND TRIM(o.store_order_number) != ''
            "#,
        );
        for n in 0..prefixes.len() {
            let param = n + 2;
            sql.push_str(&format!(
                "  AND substr(UPPER(TRIM(o.store_order_number)), 1, length(?{p})) != ?{p}\n",
                p = param
            ));
        }
        sql.push_str("ORDER BY COALESCE(a.attempt_seq, 0), o.order_date, o.id\nLIMIT ?1");

        let mut query = sqlx::query_as::<_, OrderRecord>(&sql).bind(limit as i64);
        for prefix in &prefixes {
            query = query.bind(prefix.as_str());
        }
        let records = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list unlinked orders", e))?;

        Ok(records.into_iter().map(LocalOrder::from).collect())
    }

    async fn record_linkage_attempt(&self, order_id: &str) -> RepositoryResult<()> {
        self.record_attempt("linkage", order_id).await
    }

    async fn link_order(&self, order_id: &str, external_order_id: &str) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET external_order_id = ?1 WHERE id = ?2 AND external_order_id IS NULL",
        )
        .bind(external_order_id)
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to link order", e))?;

        if result.rows_affected() > 0 {
            debug!("Order {} linked to ERP order {}", order_id, external_order_id);
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM orders WHERE id = ?1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to read order", e))?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound(format!("order {}", order_id)))
        }
    }

    async fn list_pending_document_links(&self, limit: u32) -> RepositoryResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT p.external_order_id AS external_order_id
            FROM (
                SELECT external_order_id FROM orders
                WHERE external_order_id IS NOT NULL AND fiscal_document_url IS NULL
                UNION
                SELECT external_order_id FROM commission_installments
                WHERE external_order_id IS NOT NULL AND fiscal_document_url IS NULL
            ) p
            LEFT JOIN backfill_attempts a ON a.job = 'documents' AND a.item_key = p.external_order_id
            ORDER BY COALESCE(a.attempt_seq, 0), p.external_order_id
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list pending document links", e))?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("external_order_id"))
            .collect())
    }

    async fn record_document_attempt(&self, external_order_id: &str) -> RepositoryResult<()> {
        self.record_attempt("documents", external_order_id).await
    }

    async fn apply_fiscal_document(
        &self,
        external_order_id: &str,
        link: &FiscalDocumentLink,
    ) -> RepositoryResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let orders = sqlx::query(
            r#"
            UPDATE orders SET fiscal_document_number = ?1, fiscal_document_url = ?2
            WHERE external_order_id = ?3 AND fiscal_document_url IS NULL
            "#,
        )
        .bind(&link.document_number)
        .bind(&link.printable_url)
        .bind(external_order_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to apply document to orders", e))?
        .rows_affected();

        let installments = sqlx::query(
            r#"
            UPDATE commission_installments SET fiscal_document_number = ?1, fiscal_document_url = ?2
            WHERE external_order_id = ?3 AND fiscal_document_url IS NULL
            "#,
        )
        .bind(&link.document_number)
        .bind(&link.printable_url)
        .bind(external_order_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to apply document to installments", e))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit document link", e))?;

        debug!(
            "Document {} applied to {} orders and {} installments of ERP order {}",
            link.document_number, orders, installments, external_order_id
        );
        Ok(orders + installments)
    }

    async fn settlement_progress(&self, proposal_id: &str) -> RepositoryResult<Option<SettlementProgress>> {
        let row = sqlx::query(
            r#"
            SELECT p.external_order_id AS external_order_id,
                   (SELECT COUNT(*) FROM recognized_sales s WHERE s.proposal_id = p.id) AS sales,
                   (SELECT COUNT(*) FROM commission_installments i WHERE i.parent_ref = p.id) AS installments
            FROM proposals p
            WHERE p.id = ?1
            "#,
        )
        .bind(proposal_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to read settlement progress", e))?;

        Ok(row.map(|row| {
            let external_order_id: Option<String> = row.get("external_order_id");
            let sales: i64 = row.get("sales");
            let installments: i64 = row.get("installments");
            if installments > 0 {
                SettlementProgress::InstallmentsGenerated
            } else if sales > 0 {
                SettlementProgress::LedgerRecorded
            } else if external_order_id.is_some() {
                SettlementProgress::Linked
            } else {
                SettlementProgress::NotStarted
            }
        }))
    }
}
