use serde::Serialize;

use crate::schema::{SchemaOverview, TableRow};

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct SchemaResponse {
    pub data: Vec<TableRow>,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct SchemaOverviewResponse {
    pub data: SchemaOverview,
}
