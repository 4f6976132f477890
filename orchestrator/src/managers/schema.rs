//! Read-only cache for the target's data-schema description.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::collaborators::SchemaSource;
use crate::store::KeyValueStore;
use crate::types::{ColumnInfo, SchemaDescription, TableSchema};

const SCHEMA_DESCRIPTION_KEY: &str = "schemaDescription";

/// Manages the cached schema description in the store.
///
/// The schema is loaded once per task from a [`SchemaSource`] and is never
/// mutated by the engine afterwards; collaborators only read it.
#[derive(Debug, Clone)]
pub struct SchemaCacheManager {
    store: Arc<KeyValueStore>,
}

impl SchemaCacheManager {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self { store }
    }

    /// Fetch the schema for `target_name` from `source` and cache it.
    pub fn load_from(&self, source: &dyn SchemaSource, target_name: &str) -> Result<SchemaDescription> {
        let schema = source
            .load_schema(target_name)
            .with_context(|| format!("load schema for target '{target_name}'"))?;
        let value = serde_json::to_value(&schema).context("serialize schema description")?;
        self.store.set(SCHEMA_DESCRIPTION_KEY, value, None, None);
        tracing::info!(target_name, tables = schema.tables.len(), "cached schema description");
        Ok(schema)
    }

    /// The cached schema, or absent when no load has happened yet.
    pub fn get_schema(&self) -> Result<Option<SchemaDescription>> {
        match self.store.get(SCHEMA_DESCRIPTION_KEY, None) {
            Some(value) => {
                let schema = serde_json::from_value(value).context("deserialize schema description")?;
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    pub fn get_table(&self, table_name: &str) -> Result<Option<TableSchema>> {
        Ok(self
            .get_schema()?
            .and_then(|schema| schema.tables.get(table_name).cloned()))
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self
            .get_schema()?
            .map(|schema| schema.tables.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn get_column(&self, table_name: &str, column_name: &str) -> Result<Option<ColumnInfo>> {
        Ok(self
            .get_table(table_name)?
            .and_then(|table| table.columns.get(column_name).cloned()))
    }

    /// Primary-key column names of `table_name`, in column order.
    pub fn primary_keys(&self, table_name: &str) -> Result<Vec<String>> {
        Ok(self
            .get_table(table_name)?
            .map(|table| {
                table
                    .columns
                    .iter()
                    .filter(|(_, column)| column.is_primary_key)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
