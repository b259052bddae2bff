use serde::{Deserialize, Serialize};

use crate::assistant::QueryResultRecord;

#[derive(Debug, Clone, Default, Deserialize, schemars::JsonSchema)]
pub struct AskRequest {
    #[schemars(description = "Question about the connected database, in plain English")]
    #[serde(default)]
    pub question: Option<String>,
}

impl AskRequest {
    pub fn question(&self) -> Option<&str> {
        super::required(self.question.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct HistoryResponse {
    /// Newest first
    pub data: Vec<QueryResultRecord>,
}
