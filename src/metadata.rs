//! Schema metadata
//!
//! The [`MetadataCatalog`] looks up table definitions through the driver and
//! resolves every user-defined type they reference, producing a
//! [`TableSchema`] that value coercion can work from without further lookups.
//! Resolved schemas and user types are cached until the catalog is
//! invalidated.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::driver::CqlDriver;
use crate::error::{CqlError, Result};
use crate::types::CqlType;

/// The role of a column in the table's primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Part of the partition key
    PartitionKey,
    /// A clustering column
    Clustering,
    /// A regular column
    Regular,
    /// A static column
    Static,
}

/// A column definition
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    name: String,
    cql_type: CqlType,
    kind: ColumnKind,
}

impl ColumnMetadata {
    /// Create a column definition
    pub fn new(name: impl Into<String>, cql_type: CqlType, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            cql_type,
            kind,
        }
    }

    /// A partition key column
    pub fn partition_key(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self::new(name, cql_type, ColumnKind::PartitionKey)
    }

    /// A clustering column
    pub fn clustering(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self::new(name, cql_type, ColumnKind::Clustering)
    }

    /// A regular column
    pub fn regular(name: impl Into<String>, cql_type: CqlType) -> Self {
        Self::new(name, cql_type, ColumnKind::Regular)
    }

    /// The column name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared type
    pub fn cql_type(&self) -> &CqlType {
        &self.cql_type
    }

    /// The column kind
    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    /// Whether the column is part of the primary key
    pub fn is_primary_key(&self) -> bool {
        matches!(self.kind, ColumnKind::PartitionKey | ColumnKind::Clustering)
    }
}

/// A table definition
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    keyspace: String,
    name: String,
    columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Create a table definition
    pub fn new(
        keyspace: impl Into<String>,
        name: impl Into<String>,
        columns: impl IntoIterator<Item = ColumnMetadata>,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            columns: columns.into_iter().collect(),
        }
    }

    /// The keyspace
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// The table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All columns in declaration order
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Look up a column
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key columns, partition key first
    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnMetadata> {
        let partition = self
            .columns
            .iter()
            .filter(|c| c.kind == ColumnKind::PartitionKey);
        let clustering = self
            .columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Clustering);
        partition.chain(clustering)
    }
}

/// A user-defined type definition
#[derive(Debug, Clone, PartialEq)]
pub struct UserType {
    keyspace: String,
    name: String,
    fields: Vec<(String, CqlType)>,
}

impl UserType {
    /// Create a user type definition; fields are in declared order
    pub fn new<I, K>(keyspace: impl Into<String>, name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, CqlType)>,
        K: Into<String>,
    {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            fields: fields.into_iter().map(|(k, t)| (k.into(), t)).collect(),
        }
    }

    /// The keyspace
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// The type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declared order
    pub fn fields(&self) -> &[(String, CqlType)] {
        &self.fields
    }

    /// Look up a field type
    pub fn field(&self, name: &str) -> Option<&CqlType> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

/// A table definition with every referenced user type resolved
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    table: TableMetadata,
    user_types: HashMap<String, UserType>,
}

impl TableSchema {
    /// Create a schema from a table and its resolved user types
    pub fn new(table: TableMetadata, user_types: impl IntoIterator<Item = UserType>) -> Self {
        Self {
            table,
            user_types: user_types
                .into_iter()
                .map(|u| (u.name.clone(), u))
                .collect(),
        }
    }

    /// The table definition
    pub fn table(&self) -> &TableMetadata {
        &self.table
    }

    /// Look up a column, failing with a schema mismatch if it is unknown
    pub fn column(&self, name: &str) -> Result<&ColumnMetadata> {
        self.table.column(name).ok_or_else(|| {
            CqlError::schema(format!(
                "column '{}' is not defined in table {}.{}",
                name, self.table.keyspace, self.table.name
            ))
        })
    }

    /// The declared type of a column
    pub fn column_type(&self, name: &str) -> Result<&CqlType> {
        self.column(name).map(ColumnMetadata::cql_type)
    }

    /// Look up a resolved user type
    pub fn user_type(&self, name: &str) -> Result<&UserType> {
        self.user_types.get(name).ok_or_else(|| {
            CqlError::schema(format!(
                "user type '{}' is not defined in keyspace {}",
                name, self.table.keyspace
            ))
        })
    }
}

type CacheKey = (String, String);

/// Cached schema lookups through the driver
pub struct MetadataCatalog {
    driver: Arc<dyn CqlDriver>,
    tables: RwLock<HashMap<CacheKey, Arc<TableSchema>>>,
    user_types: RwLock<HashMap<CacheKey, UserType>>,
}

impl MetadataCatalog {
    /// Create an empty catalog
    pub fn new(driver: Arc<dyn CqlDriver>) -> Self {
        Self {
            driver,
            tables: RwLock::new(HashMap::new()),
            user_types: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a table and the user types it references
    pub async fn table_schema(&self, keyspace: &str, table: &str) -> Result<Arc<TableSchema>> {
        let key = (keyspace.to_string(), table.to_string());
        if let Some(schema) = self.tables.read().ok().and_then(|t| t.get(&key).cloned()) {
            return Ok(schema);
        }

        let metadata = self
            .driver
            .table_metadata(keyspace, table)
            .await?
            .ok_or_else(|| {
                CqlError::schema(format!("table {}.{} is not defined", keyspace, table))
            })?;

        let mut pending: Vec<String> = metadata
            .columns()
            .iter()
            .flat_map(|c| c.cql_type().referenced_udts())
            .map(str::to_string)
            .collect();
        let mut resolved: HashMap<String, UserType> = HashMap::new();

        while let Some(name) = pending.pop() {
            if resolved.contains_key(&name) {
                continue;
            }
            let user_type = self.user_type(keyspace, &name).await?;
            pending.extend(
                user_type
                    .fields()
                    .iter()
                    .flat_map(|(_, t)| t.referenced_udts())
                    .map(str::to_string),
            );
            resolved.insert(name, user_type);
        }

        let schema = Arc::new(TableSchema::new(metadata, resolved.into_values()));
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(key, Arc::clone(&schema));
        }
        Ok(schema)
    }

    /// Resolve a user type
    pub async fn user_type(&self, keyspace: &str, name: &str) -> Result<UserType> {
        let key = (keyspace.to_string(), name.to_string());
        if let Some(user_type) = self.user_types.read().ok().and_then(|u| u.get(&key).cloned()) {
            return Ok(user_type);
        }

        let user_type = self
            .driver
            .user_type(keyspace, name)
            .await?
            .ok_or_else(|| {
                CqlError::schema(format!(
                    "user type '{}' is not defined in keyspace {}",
                    name, keyspace
                ))
            })?;

        if let Ok(mut user_types) = self.user_types.write() {
            user_types.insert(key, user_type.clone());
        }
        Ok(user_type)
    }

    /// Number of cached table schemas
    pub fn cached_tables(&self) -> usize {
        self.tables.read().map(|t| t.len()).unwrap_or(0)
    }

    /// Drop every cached table and user type
    pub fn invalidate_all(&self) {
        if let Ok(mut tables) = self.tables.write() {
            tables.clear();
        }
        if let Ok(mut user_types) = self.user_types.write() {
            user_types.clear();
        }
    }
}

impl std::fmt::Debug for MetadataCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCatalog")
            .field("cached_tables", &self.cached_tables())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::ReplayDriver;

    fn driver() -> ReplayDriver {
        let driver = ReplayDriver::new();
        driver.add_user_type(UserType::new(
            "shop",
            "address",
            [("street", CqlType::Text), ("geo", CqlType::udt("point"))],
        ));
        driver.add_user_type(UserType::new(
            "shop",
            "point",
            [("lat", CqlType::Double), ("lon", CqlType::Double)],
        ));
        driver.add_table(TableMetadata::new(
            "shop",
            "customers",
            [
                ColumnMetadata::partition_key("id", CqlType::Int),
                ColumnMetadata::clustering("since", CqlType::Timestamp),
                ColumnMetadata::regular("addresses", CqlType::list(CqlType::udt("address"))),
            ],
        ));
        driver
    }

    #[test]
    fn test_primary_key_order() {
        let table = TableMetadata::new(
            "ks",
            "t",
            [
                ColumnMetadata::clustering("c", CqlType::Int),
                ColumnMetadata::regular("v", CqlType::Text),
                ColumnMetadata::partition_key("p", CqlType::Int),
            ],
        );
        let names: Vec<_> = table.primary_key().map(ColumnMetadata::name).collect();
        assert_eq!(names, vec!["p", "c"]);
    }

    #[tokio::test]
    async fn test_table_schema_resolves_nested_user_types() {
        let catalog = MetadataCatalog::new(Arc::new(driver()));

        let schema = catalog.table_schema("shop", "customers").await.unwrap();

        assert!(schema.user_type("address").is_ok());
        assert!(schema.user_type("point").is_ok());
        assert_eq!(schema.column_type("id").unwrap(), &CqlType::Int);
    }

    #[tokio::test]
    async fn test_table_schema_is_cached() {
        let driver = driver();
        let catalog = MetadataCatalog::new(Arc::new(driver.clone()));

        catalog.table_schema("shop", "customers").await.unwrap();
        catalog.table_schema("shop", "customers").await.unwrap();

        assert_eq!(driver.metadata_lookups(), 1);
        assert_eq!(catalog.cached_tables(), 1);

        catalog.invalidate_all();
        assert_eq!(catalog.cached_tables(), 0);

        catalog.table_schema("shop", "customers").await.unwrap();
        assert_eq!(driver.metadata_lookups(), 2);
    }

    #[tokio::test]
    async fn test_unknown_table_and_column() {
        let catalog = MetadataCatalog::new(Arc::new(driver()));

        let err = catalog.table_schema("shop", "nope").await.unwrap_err();
        assert!(matches!(err, CqlError::SchemaMismatch(_)));

        let schema = catalog.table_schema("shop", "customers").await.unwrap();
        let err = schema.column("nme").unwrap_err();
        assert_eq!(
            err.to_string(),
            "schema mismatch: column 'nme' is not defined in table shop.customers"
        );
    }
}
