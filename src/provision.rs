// src/provision.rs

//! Check-then-create provisioning of warehouse tables.
//!
//! [`IdempotentProvisioner::ensure_exists`] never deletes or overwrites a
//! table. When two callers race between the check and the create, the loser
//! sees an "already exists" conflict from the catalog, which counts as
//! success.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::connectors::{Catalog, ConnectorError, TableRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The table was already there; nothing was done.
    AlreadyExists,
    /// This call created the table.
    Created,
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("checking whether table {table} exists failed: {source}")]
    Check {
        table: TableRef,
        #[source]
        source: ConnectorError,
    },

    #[error("creating table {table} failed: {source}")]
    Create {
        table: TableRef,
        #[source]
        source: ConnectorError,
    },
}

#[derive(Debug, Clone)]
pub struct IdempotentProvisioner {
    catalog: Arc<dyn Catalog>,
}

impl IdempotentProvisioner {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Make sure `table` exists, creating it from `schema` if it does not.
    pub async fn ensure_exists(
        &self,
        table: &TableRef,
        schema: &str,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let exists = self
            .catalog
            .table_exists(table)
            .await
            .map_err(|source| ProvisionError::Check {
                table: table.clone(),
                source,
            })?;

        if exists {
            debug!(table = %table, "table already exists");
            return Ok(ProvisionOutcome::AlreadyExists);
        }

        match self.catalog.create_table(table, schema).await {
            Ok(()) => {
                info!(table = %table, "table created");
                Ok(ProvisionOutcome::Created)
            }
            Err(ConnectorError::AlreadyExists(_)) => {
                debug!(table = %table, "table created concurrently by another caller");
                Ok(ProvisionOutcome::AlreadyExists)
            }
            Err(source) => Err(ProvisionError::Create {
                table: table.clone(),
                source,
            }),
        }
    }
}
