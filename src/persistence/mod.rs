//! Persistence Layer
//!
//! SQLite storage for the local ledger, the ERP credential pair and the
//! backfill audit trail, via sqlx.
//!
//! # Database Schema
//!
//! ## external_credentials
//! - scope: external-account scope (primary key)
//! - access_token, refresh_token, expires_at
//!
//! ## proposals / proposal_items
//! - commercial proposals with their line items; amounts in integer cents
//! - external_order_id / external_order_number: set once settled
//!
//! ## orders
//! - local orders: store_order_number, total_cents, order_date
//! - external_order_id: linkage into the ERP, never cleared
//! - fiscal_document_number / fiscal_document_url: resolved document link
//!
//! ## recognized_sales
//! - one row per settled proposal, consumed by quota and reporting features
//!
//! ## commission_installments
//! - one row per scheduled agent payment, UNIQUE(parent_ref, installment_index)
//!
//! ## backfill_audit
//! - one row per backfill run with counters and the full JSON report
//!
//! ## backfill_attempts
//! - (job, item_key) of every item a sweep tried without resolving it
//! - attempt_seq: global counter; sweeps select the lowest first

pub mod backfill_audit;
pub mod credential_repository;
pub mod ledger_repository;
pub mod models;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "external_credentials",
        r#"
        CREATE TABLE IF NOT EXISTS external_credentials (
            scope TEXT PRIMARY KEY,
            access_token TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            expires_at DATETIME,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "proposals",
        r#"
        CREATE TABLE IF NOT EXISTS proposals (
            id TEXT PRIMARY KEY,
            number TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('RASCUNHO', 'APROVADO', 'FATURADO', 'CANCELADO')),
            customer_external_id TEXT NOT NULL DEFAULT '',
            customer_name TEXT NOT NULL DEFAULT '',
            agent_id TEXT NOT NULL,
            agent_external_id TEXT,
            commission_rate_pct REAL NOT NULL DEFAULT 0.0,
            payment_terms TEXT NOT NULL,
            blanket_discount_pct REAL NOT NULL DEFAULT 0.0,
            freight_cents INTEGER NOT NULL DEFAULT 0,
            delivery_address_json TEXT,
            notes TEXT,
            issued_on DATE NOT NULL,
            external_order_id TEXT,
            external_order_number TEXT,
            settled_at DATETIME,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "proposal_items",
        r#"
        CREATE TABLE IF NOT EXISTS proposal_items (
            id TEXT PRIMARY KEY,
            proposal_id TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL,
            external_product_code TEXT,
            quantity REAL NOT NULL,
            unit_price_cents INTEGER NOT NULL,
            list_price_cents INTEGER NOT NULL,
            discount_pct REAL,
            FOREIGN KEY (proposal_id) REFERENCES proposals(id)
        )
        "#,
    ),
    (
        "orders",
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            store_order_number TEXT,
            total_cents INTEGER NOT NULL,
            order_date DATE NOT NULL,
            external_order_id TEXT,
            fiscal_document_number TEXT,
            fiscal_document_url TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "recognized_sales",
        r#"
        CREATE TABLE IF NOT EXISTS recognized_sales (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proposal_id TEXT NOT NULL UNIQUE,
            external_order_id TEXT NOT NULL,
            external_order_number TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            customer_name TEXT NOT NULL,
            total_cents INTEGER NOT NULL,
            recognized_on DATE NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "commission_installments",
        r#"
        CREATE TABLE IF NOT EXISTS commission_installments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_ref TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            installment_index INTEGER NOT NULL,
            installment_count INTEGER NOT NULL,
            gross_cents INTEGER NOT NULL,
            commission_cents INTEGER NOT NULL,
            due_date DATE NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('AGUARDANDO', 'PAGO')),
            origin TEXT NOT NULL CHECK(origin IN ('faturado', 'pago_online', 'manual')),
            external_order_id TEXT,
            fiscal_document_number TEXT,
            fiscal_document_url TEXT,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(parent_ref, installment_index)
        )
        "#,
    ),
    (
        "backfill_audit",
        r#"
        CREATE TABLE IF NOT EXISTS backfill_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job TEXT NOT NULL CHECK(job IN ('linkage', 'documents')),
            started_at DATETIME NOT NULL,
            finished_at DATETIME,
            processed INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            cancelled BOOLEAN NOT NULL DEFAULT 0,
            aborted TEXT,
            report_json TEXT NOT NULL,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    ),
    (
        "backfill_attempts",
        r#"
        CREATE TABLE IF NOT EXISTS backfill_attempts (
            job TEXT NOT NULL CHECK(job IN ('linkage', 'documents')),
            item_key TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 1,
            attempt_seq INTEGER NOT NULL,
            last_attempted_at DATETIME NOT NULL,
            PRIMARY KEY (job, item_key)
        )
        "#,
    ),
    (
        "idx_proposal_items_proposal",
        "CREATE INDEX IF NOT EXISTS idx_proposal_items_proposal ON proposal_items(proposal_id)",
    ),
    (
        "idx_orders_external_order",
        "CREATE INDEX IF NOT EXISTS idx_orders_external_order ON orders(external_order_id)",
    ),
    (
        "idx_installments_external_order",
        "CREATE INDEX IF NOT EXISTS idx_installments_external_order ON commission_installments(external_order_id)",
    ),
    (
        "idx_backfill_audit_job",
        "CREATE INDEX IF NOT EXISTS idx_backfill_audit_job ON backfill_audit(job, started_at)",
    ),
];

/// Initialize the database connection pool and run migrations.
///
/// In-memory databases are private to each connection, so they get a pool of
/// exactly one connection that is never recycled.
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !config.log_queries {
        options = options.disable_statement_logging();
    }

    let in_memory = config.url.contains(":memory:");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
    };

    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    for (name, statement) in MIGRATIONS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to apply {}: {}", name, e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/ledgersync.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/ledgersync.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }
}
