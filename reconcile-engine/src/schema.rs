//! C11: derives the expected table shape for a registered family and diffs
//! it against the remote. Only additive changes (`add_column`, `add_index`)
//! are applied automatically; destructive differences are reported as
//! non-applicable (spec §4.11).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Uuid,
    Timestamp,
    Bool,
    Int,
    Text,
    Float,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

/// Declares a syncable model's properties; the engine derives required
/// sync columns around it.
#[derive(Debug, Clone)]
pub struct FamilyDescriptor {
    pub family: String,
    pub properties: Vec<ColumnSpec>,
}

impl FamilyDescriptor {
    /// The expected table shape: required sync columns plus one column per
    /// declared syncable property.
    pub fn expected_shape(&self) -> Vec<ColumnSpec> {
        let mut columns = vec![
            ColumnSpec {
                name: "sync_id".to_string(),
                kind: ColumnKind::Uuid,
                nullable: false,
            },
            ColumnSpec {
                name: "last_modified".to_string(),
                kind: ColumnKind::Timestamp,
                nullable: false,
            },
            ColumnSpec {
                name: "last_synced".to_string(),
                kind: ColumnKind::Timestamp,
                nullable: true,
            },
            ColumnSpec {
                name: "is_deleted".to_string(),
                kind: ColumnKind::Bool,
                nullable: false,
            },
            ColumnSpec {
                name: "version".to_string(),
                kind: ColumnKind::Int,
                nullable: false,
            },
        ];
        columns.extend(self.properties.clone());
        columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaDifference {
    FieldAdded { name: String, kind: ColumnKind },
    FieldRemoved { name: String },
    FieldTypeChanged { name: String, expected: ColumnKind, actual: ColumnKind },
    IndexMissing { name: String },
}

pub struct SchemaIntrospector;

impl SchemaIntrospector {
    pub fn new() -> Self {
        SchemaIntrospector
    }

    pub fn check_compatibility(
        &self,
        descriptor: &FamilyDescriptor,
        remote_columns: &[ColumnSpec],
    ) -> Vec<SchemaDifference> {
        let mut diffs = Vec::new();
        let expected = descriptor.expected_shape();

        for column in &expected {
            match remote_columns.iter().find(|c| c.name == column.name) {
                None => diffs.push(SchemaDifference::FieldAdded {
                    name: column.name.clone(),
                    kind: column.kind.clone(),
                }),
                Some(remote) if remote.kind != column.kind => diffs.push(SchemaDifference::FieldTypeChanged {
                    name: column.name.clone(),
                    expected: column.kind.clone(),
                    actual: remote.kind.clone(),
                }),
                Some(_) => {}
            }
        }

        for remote in remote_columns {
            if !expected.iter().any(|c| c.name == remote.name) {
                diffs.push(SchemaDifference::FieldRemoved {
                    name: remote.name.clone(),
                });
            }
        }

        diffs
    }

    /// Additive DDL text for the differences that can be applied without
    /// operator confirmation. Destructive differences (removed/retyped
    /// fields) are skipped — they are reported by `check_compatibility` but
    /// never auto-applied.
    pub fn generate_migration_sql(&self, table: &str, differences: &[SchemaDifference]) -> String {
        let mut statements = Vec::new();
        for diff in differences {
            match diff {
                SchemaDifference::FieldAdded { name, kind } => {
                    statements.push(format!(
                        "ALTER TABLE {table} ADD COLUMN {name} {};",
                        sql_type(kind)
                    ));
                }
                SchemaDifference::IndexMissing { name } => {
                    statements.push(format!("CREATE INDEX IF NOT EXISTS idx_{table}_{name} ON {table} ({name});"));
                }
                SchemaDifference::FieldRemoved { .. } | SchemaDifference::FieldTypeChanged { .. } => {}
            }
        }
        statements.join("\n")
    }
}

impl Default for SchemaIntrospector {
    fn default() -> Self {
        SchemaIntrospector::new()
    }
}

fn sql_type(kind: &ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Uuid => "UUID",
        ColumnKind::Timestamp => "TIMESTAMPTZ",
        ColumnKind::Bool => "BOOLEAN",
        ColumnKind::Int => "BIGINT",
        ColumnKind::Text => "TEXT",
        ColumnKind::Float => "DOUBLE PRECISION",
        ColumnKind::Json => "JSONB",
    }
}
