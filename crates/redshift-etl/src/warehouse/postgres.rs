//! Warehouse driver speaking the PostgreSQL wire protocol.

use async_trait::async_trait;
use tokio_postgres::Client;
use tracing::{debug, error};

use crate::config::WarehouseConfig;
use crate::error::Result;
use crate::warehouse::tls::{make_tls, SslMode};
use crate::warehouse::{Warehouse, WarehouseConnection};

/// Warehouse reachable over the PostgreSQL protocol (Redshift or Postgres).
pub struct PgWarehouse {
    config: WarehouseConfig,
}

impl PgWarehouse {
    pub fn new(config: WarehouseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn connect(&self, autocommit: bool) -> Result<Box<dyn WarehouseConnection>> {
        let ssl_mode = SslMode::parse(&self.config.ssl_mode)?;
        let dsn = self.config.dsn();
        debug!(
            "Connecting to warehouse {}:{}/{} (autocommit: {})",
            self.config.host, self.config.port, self.config.database, autocommit
        );

        let client = match make_tls(ssl_mode)? {
            Some(tls) => {
                let (client, connection) = tokio_postgres::connect(&dsn, tls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("Warehouse connection error: {}", e);
                    }
                });
                client
            }
            None => {
                let (client, connection) =
                    tokio_postgres::connect(&dsn, tokio_postgres::NoTls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("Warehouse connection error: {}", e);
                    }
                });
                client
            }
        };

        if !autocommit {
            client.batch_execute("BEGIN").await?;
        }

        Ok(Box::new(PgConnection {
            client,
            database: self.config.database.clone(),
        }))
    }
}

struct PgConnection {
    client: Client,
    database: String,
}

#[async_trait]
impl WarehouseConnection for PgConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!(database = %self.database, "Executing: {}", compact(sql));
        Ok(self.client.execute(sql, &[]).await?)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        debug!(database = %self.database, "Querying: {}", compact(sql));
        let rows = self.client.query(sql, &[]).await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let mut cells = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                cells.push(row.try_get::<_, Option<String>>(i)?);
            }
            result.push(cells);
        }
        Ok(result)
    }

    async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    fn database(&self) -> &str {
        &self.database
    }
}

/// Single-line rendering of a statement for log output.
fn compact(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
