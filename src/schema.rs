//! Schema text: the flattened table/column description handed to the
//! translator, and the structured view parsed back out of it.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static TABLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Table ([^:]+): (.*)").expect("table pattern is valid"));

static COLUMN_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\s+(.+)$").expect("column pattern is valid"));

/// One row of the introspection query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TableRow {
    pub table_name: String,
    /// Comma-joined `name type[ NOT NULL]` entries.
    pub column_details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub is_primary: bool,
    pub is_nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// A likely foreign key, guessed from `<table>_id` column naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SchemaOverview {
    pub tables: Vec<TableSchema>,
    pub relationships: Vec<Relationship>,
}

/// Render introspection rows as schema text, one `Table name: details`
/// block per table separated by a blank line.
pub fn format_schema_text(rows: &[TableRow]) -> String {
    rows.iter()
        .map(|row| format!("Table {}: {}", row.table_name, row.column_details))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Parse schema text back into tables. Blocks that do not look like a
/// table are skipped. Column types containing `", "` split incorrectly.
pub fn parse_schema_text(text: &str) -> Vec<TableSchema> {
    text.split("\n\n")
        .filter_map(|block| {
            let caps = TABLE_BLOCK.captures(block)?;
            Some(TableSchema {
                name: caps[1].to_string(),
                columns: parse_column_details(&caps[2]),
            })
        })
        .collect()
}

pub fn parse_column_details(details: &str) -> Vec<ColumnSchema> {
    details.split(", ").map(parse_column).collect()
}

fn parse_column(definition: &str) -> ColumnSchema {
    match COLUMN_DEF.captures(definition) {
        Some(caps) => {
            let type_name = caps[2].to_string();
            let lowered = type_name.to_lowercase();
            ColumnSchema {
                name: caps[1].to_string(),
                is_primary: lowered.contains("primary key"),
                is_nullable: !lowered.contains("not null"),
                type_name,
            }
        }
        None => ColumnSchema {
            name: definition.to_string(),
            type_name: "unknown".into(),
            is_primary: false,
            is_nullable: false,
        },
    }
}

/// For every `<x>_id` column, link to a table named `<x>` or `<x>s`.
pub fn infer_relationships(tables: &[TableSchema]) -> Vec<Relationship> {
    let mut relationships = Vec::new();

    for source in tables {
        for column in &source.columns {
            let Some(stem) = column.name.strip_suffix("_id") else {
                continue;
            };
            let plural = format!("{stem}s");
            if let Some(target) = tables.iter().find(|t| t.name == stem || t.name == plural) {
                relationships.push(Relationship {
                    source: source.name.clone(),
                    target: target.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
    }

    relationships
}

pub fn overview(text: &str) -> SchemaOverview {
    let tables = parse_schema_text(text);
    let relationships = infer_relationships(&tables);
    SchemaOverview {
        tables,
        relationships,
    }
}
