use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize, schemars::JsonSchema)]
pub struct QueryRequest {
    #[schemars(description = "SQL to run against the connected database. Statements that modify data or schema are rejected.")]
    #[serde(default)]
    pub query: Option<String>,
}

impl QueryRequest {
    pub fn query(&self) -> Option<&str> {
        super::required(self.query.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct QueryResponse {
    /// One object per row, keyed by column name
    pub data: Vec<Value>,
}
