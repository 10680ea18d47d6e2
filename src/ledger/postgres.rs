//! PostgreSQL ledger host
//!
//! Stores the proposal table and the ledger state in a PostgreSQL database.
//! Each ledger transaction is a `BEGIN ... COMMIT` block that first takes a
//! transaction-scoped advisory lock, so transactions run one at a time.
//! Upserts are a single `INSERT ... ON CONFLICT` statement.

use super::{LedgerHost, LedgerTxn, ProposalRow, UpsertOutcome, PROPOSAL_TABLE};
use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

const STATE_TABLE: &str = "ledger_state";

/// Advisory lock key held by every ledger transaction
const LEDGER_LOCK_KEY: i64 = 0x626f_6c65_746f;

/// PostgreSQL-backed ledger host
pub struct PostgresLedger {
    pool: Pool,
}

impl PostgresLedger {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from DATABASE_URL and verify the connection
    pub async fn connect(database_url: &str, max_pool_size: usize) -> anyhow::Result<Self> {
        let config = database_url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| anyhow::anyhow!("Failed to parse DATABASE_URL: {}", e))?;

        let host = match config.get_hosts().first() {
            Some(tokio_postgres::config::Host::Tcp(s)) => s.clone(),
            Some(tokio_postgres::config::Host::Unix(_)) => {
                return Err(anyhow::anyhow!("Unix socket connections are not supported"));
            }
            None => return Err(anyhow::anyhow!("No host in DATABASE_URL")),
        };
        let port = config.get_ports().first().copied().unwrap_or(5432);
        let user = config
            .get_user()
            .map(|u| u.to_string())
            .ok_or_else(|| anyhow::anyhow!("No user in DATABASE_URL"))?;
        let password = config
            .get_password()
            .map(|p| String::from_utf8_lossy(p).to_string())
            .unwrap_or_default();
        let dbname = config
            .get_dbname()
            .map(|db| db.to_string())
            .ok_or_else(|| anyhow::anyhow!("No database name in DATABASE_URL"))?;

        // Neon and other managed hosts require TLS
        let use_tls = host.contains("neon.tech") || database_url.contains("sslmode=require");

        let mut cfg = Config::new();
        cfg.host = Some(host);
        cfg.port = Some(port);
        cfg.user = Some(user);
        cfg.password = Some(password);
        cfg.dbname = Some(dbname);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(max_pool_size));

        let pool = if use_tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
            cfg.create_pool(Some(Runtime::Tokio1), tls)
                .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
        };

        let client = pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;
        client
            .query_one("SELECT 1 AS ok", &[])
            .await
            .map_err(|e| anyhow::anyhow!("Failed to verify database connection: {}", e))?;

        info!("✅ Ledger database connection successful (TLS: {})", use_tls);
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl LedgerHost for PostgresLedger {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTxn>, AppError> {
        let client = self.pool.get().await?;
        client.batch_execute("BEGIN").await?;
        // serializes ledger transactions, including the first init when no
        // state row exists yet to lock
        client
            .execute("SELECT pg_advisory_xact_lock($1)", &[&LEDGER_LOCK_KEY])
            .await?;
        Ok(Box::new(PostgresTxn {
            client: Some(client),
        }))
    }
}

/// One open `BEGIN ... COMMIT` block on a pooled connection
struct PostgresTxn {
    /// `None` once the transaction has ended
    client: Option<Object>,
}

impl PostgresTxn {
    fn client(&self) -> Result<&Object, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Internal("Ledger transaction already ended".to_string()))
    }
}

#[async_trait]
impl LedgerTxn for PostgresTxn {
    async fn table_exists(&mut self) -> Result<bool, AppError> {
        let row = self
            .client()?
            .query_one("SELECT to_regclass($1) IS NOT NULL", &[&PROPOSAL_TABLE])
            .await?;
        Ok(row.get(0))
    }

    async fn drop_table(&mut self) -> Result<(), AppError> {
        self.client()?
            .execute(&format!("DROP TABLE IF EXISTS {}", PROPOSAL_TABLE), &[])
            .await?;
        debug!("Dropped table {}", PROPOSAL_TABLE);
        Ok(())
    }

    async fn create_table(&mut self) -> Result<(), AppError> {
        let client = self.client()?;
        client
            .execute(
                &format!(
                    "CREATE TABLE {} (
                        id TEXT PRIMARY KEY,
                        cpf_pagador TEXT,
                        pagador_aceitou BOOLEAN,
                        beneficiario_aceitou BOOLEAN,
                        boleto_pago BOOLEAN
                    )",
                    PROPOSAL_TABLE
                ),
                &[],
            )
            .await?;
        client
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        key TEXT PRIMARY KEY,
                        value BYTEA NOT NULL
                    )",
                    STATE_TABLE
                ),
                &[],
            )
            .await?;
        Ok(())
    }

    async fn upsert_row(&mut self, row: ProposalRow) -> Result<UpsertOutcome, AppError> {
        // xmax is zero only for a freshly inserted tuple
        let result = self
            .client()?
            .query_one(
                &format!(
                    "INSERT INTO {} (id, cpf_pagador, pagador_aceitou, beneficiario_aceitou, boleto_pago)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (id) DO UPDATE SET
                        cpf_pagador = EXCLUDED.cpf_pagador,
                        pagador_aceitou = EXCLUDED.pagador_aceitou,
                        beneficiario_aceitou = EXCLUDED.beneficiario_aceitou,
                        boleto_pago = EXCLUDED.boleto_pago
                     RETURNING (xmax = 0) AS inserted",
                    PROPOSAL_TABLE
                ),
                &[
                    &row.id,
                    &row.payer_tax_id,
                    &row.payer_accepted,
                    &row.beneficiary_accepted,
                    &row.paid,
                ],
            )
            .await?;

        let inserted: bool = result.get("inserted");
        Ok(if inserted {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Replaced
        })
    }

    async fn get_row(&mut self, id: &str) -> Result<Option<ProposalRow>, AppError> {
        let row = self
            .client()?
            .query_opt(
                &format!(
                    "SELECT id, cpf_pagador, pagador_aceitou, beneficiario_aceitou, boleto_pago
                     FROM {} WHERE id = $1",
                    PROPOSAL_TABLE
                ),
                &[&id],
            )
            .await?;

        Ok(row.map(|r| ProposalRow {
            id: r.get(0),
            payer_tax_id: r.get(1),
            payer_accepted: r.get(2),
            beneficiary_accepted: r.get(3),
            paid: r.get(4),
        }))
    }

    async fn put_state(&mut self, key: &str, value: &[u8]) -> Result<(), AppError> {
        self.client()?
            .execute(
                &format!(
                    "INSERT INTO {} (key, value) VALUES ($1, $2)
                     ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
                    STATE_TABLE
                ),
                &[&key, &value],
            )
            .await?;
        Ok(())
    }

    async fn get_state(&mut self, key: &str) -> Result<Option<Vec<u8>>, AppError> {
        let client = self.client()?;
        // the state table may not exist before the first init
        let exists: bool = client
            .query_one("SELECT to_regclass($1) IS NOT NULL", &[&STATE_TABLE])
            .await?
            .get(0);
        if !exists {
            return Ok(None);
        }

        let row = client
            .query_opt(
                &format!("SELECT value FROM {} WHERE key = $1", STATE_TABLE),
                &[&key],
            )
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let mut txn = self;
        let client = txn.client()?;
        client.batch_execute("COMMIT").await?;
        // committed; hand the connection back to the pool
        txn.client.take();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        let mut txn = self;
        let client = txn.client()?;
        client.batch_execute("ROLLBACK").await?;
        txn.client.take();
        Ok(())
    }
}

impl Drop for PostgresTxn {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // never return a connection with an open transaction to the pool;
            // closing it makes the server roll back
            warn!("Rolling back uncommitted ledger transaction");
            drop(Object::take(client));
        }
    }
}

#[cfg(test)]
mod tests {
    //! Needs a scratch database: `DATABASE_URL=... cargo test -- --ignored`.
    //! The ledger tables in that database are dropped.

    use super::*;
    use crate::identity::CallerIdentity;
    use crate::proposal::{Proposal, ProposalStore};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn row(id: &str, paid: bool) -> ProposalRow {
        ProposalRow {
            id: id.to_string(),
            payer_tax_id: Some("12345678900".to_string()),
            payer_accepted: Some(true),
            beneficiary_accepted: Some(false),
            paid: Some(paid),
        }
    }

    async fn scratch_ledger() -> Option<Arc<PostgresLedger>> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping");
            return None;
        };
        let ledger = PostgresLedger::connect(&url, 4).await.unwrap();
        let client = ledger.pool.get().await.unwrap();
        client
            .batch_execute(&format!(
                "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {}",
                PROPOSAL_TABLE, STATE_TABLE
            ))
            .await
            .unwrap();
        Some(Arc::new(ledger))
    }

    /// Both phases share the ledger tables, so they run in one test
    #[tokio::test]
    #[ignore]
    async fn test_against_database() {
        let Some(ledger) = scratch_ledger().await else {
            return;
        };
        host_operations(ledger).await;

        let Some(ledger) = scratch_ledger().await else {
            return;
        };
        store_reset_and_guard(ledger).await;
    }

    async fn host_operations(ledger: Arc<PostgresLedger>) {
        // nothing exists before the first init
        let mut txn = ledger.begin().await.unwrap();
        assert!(!txn.table_exists().await.unwrap());
        assert_eq!(txn.get_state("admin").await.unwrap(), None);
        txn.create_table().await.unwrap();
        txn.put_state("admin", b"cert").await.unwrap();
        txn.put_state("admin", b"cert-2").await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = ledger.begin().await.unwrap();
        assert!(txn.table_exists().await.unwrap());
        assert_eq!(txn.get_state("admin").await.unwrap(), Some(b"cert-2".to_vec()));
        assert_eq!(txn.upsert_row(row("P1", false)).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(txn.upsert_row(row("P1", true)).await.unwrap(), UpsertOutcome::Replaced);
        txn.commit().await.unwrap();

        let mut txn = ledger.begin().await.unwrap();
        assert_eq!(txn.get_row("P1").await.unwrap(), Some(row("P1", true)));
        assert_eq!(txn.get_row("missing").await.unwrap(), None);
        txn.upsert_row(row("P2", false)).await.unwrap();
        txn.rollback().await.unwrap();

        // an abandoned transaction is discarded with its connection
        let mut txn = ledger.begin().await.unwrap();
        txn.upsert_row(row("P3", false)).await.unwrap();
        drop(txn);

        let mut txn = ledger.begin().await.unwrap();
        assert_eq!(txn.get_row("P2").await.unwrap(), None);
        assert_eq!(txn.get_row("P3").await.unwrap(), None);
        txn.commit().await.unwrap();

        // a row with a NULL column comes back with that column unset
        let client = ledger.pool.get().await.unwrap();
        client
            .execute(
                &format!("INSERT INTO {} (id, cpf_pagador) VALUES ($1, $2)", PROPOSAL_TABLE),
                &[&"broken", &"123"],
            )
            .await
            .unwrap();
        drop(client);

        let mut txn = ledger.begin().await.unwrap();
        let broken = txn.get_row("broken").await.unwrap().unwrap();
        txn.commit().await.unwrap();
        assert_eq!(broken.payer_tax_id.as_deref(), Some("123"));
        assert_eq!((broken.payer_accepted, broken.beneficiary_accepted, broken.paid), (None, None, None));

        let store = ProposalStore::new(ledger.clone());
        assert_eq!(store.get("broken").await.unwrap(), None);
    }

    async fn store_reset_and_guard(ledger: Arc<PostgresLedger>) {
        let store = ProposalStore::new(ledger);
        let admin = CallerIdentity::new(b"admin".to_vec());
        let proposal = Proposal {
            id: "P1".to_string(),
            payer_tax_id: "12345678900".to_string(),
            payer_accepted: true,
            beneficiary_accepted: false,
            paid: false,
        };

        let first = store.reset(&admin).await.unwrap();
        assert!(!first.dropped_existing);
        assert_eq!(store.upsert_as_admin(&admin, &proposal).await.unwrap(), UpsertOutcome::Created);
        assert!(matches!(
            store
                .upsert_as_admin(&CallerIdentity::new(b"intruder".to_vec()), &proposal)
                .await,
            Err(AppError::Unauthorized(_))
        ));
        assert_eq!(store.upsert_as_admin(&admin, &proposal).await.unwrap(), UpsertOutcome::Replaced);

        let second = store.reset(&CallerIdentity::new(b"new-admin".to_vec())).await.unwrap();
        assert!(second.dropped_existing);
        assert_eq!(store.get("P1").await.unwrap(), None);
        assert!(matches!(
            store.upsert_as_admin(&admin, &proposal).await,
            Err(AppError::Unauthorized(_))
        ));
    }
}
