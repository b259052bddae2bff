//! The ask pipeline: schema text, translation, guarded execution, answer
//! rendering and a bounded history of past answers.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::answer;
use crate::db::{ConnectionManager, ConnectionStatus};
use crate::error::MarketAiError;
use crate::schema::{self, SchemaOverview, TableRow};
use crate::translator::{Translation, Translator};

/// One answered question, as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultRecord {
    pub question: String,
    pub answer: String,
    pub query: String,
    pub explanation: String,
    /// Rows returned by `query`; absent when nothing was executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    pub asked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ConnectSummary {
    #[serde(flatten)]
    pub status: ConnectionStatus,
    pub tables: Vec<TableRow>,
}

#[derive(Debug, Clone)]
struct CachedSchema {
    generation: u64,
    text: String,
}

#[derive(Debug, Clone)]
pub struct Assistant {
    db: ConnectionManager,
    translator: Translator,
    schema_cache: Arc<RwLock<Option<CachedSchema>>>,
    history: Arc<Mutex<VecDeque<QueryResultRecord>>>,
    max_history: usize,
}

impl Assistant {
    pub fn new(db: ConnectionManager, translator: Translator, max_history: usize) -> Self {
        Self {
            db,
            translator,
            schema_cache: Arc::new(RwLock::new(None)),
            history: Arc::new(Mutex::new(VecDeque::new())),
            max_history,
        }
    }

    pub fn database(&self) -> &ConnectionManager {
        &self.db
    }

    /// Connect and read the schema right away, so an unreachable server or
    /// an empty database is reported at connect time.
    pub async fn connect(&self, connection_string: &str) -> Result<ConnectSummary, MarketAiError> {
        let status = self.db.connect(connection_string).await?;
        let (generation, tables) = self.db.schema_with_generation().await?;
        if tables.is_empty() {
            warn!(generation, "connected database has no tables in schema public");
            return Err(MarketAiError::EmptySchema);
        }

        let text = schema::format_schema_text(&tables);
        *self.schema_cache.write().await = Some(CachedSchema { generation, text });
        info!(generation, tables = tables.len(), "schema loaded");

        Ok(ConnectSummary { status, tables })
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.db.status().await
    }

    /// Schema text for the current pool. A cache entry from an older pool
    /// generation is ignored.
    pub async fn schema_text(&self) -> Result<String, MarketAiError> {
        let active = self.db.current().await?;
        if let Some(cached) = self.schema_cache.read().await.as_ref() {
            if cached.generation == active.generation {
                return Ok(cached.text.clone());
            }
        }

        let (generation, rows) = self.db.schema_with_generation().await?;
        let text = schema::format_schema_text(&rows);
        *self.schema_cache.write().await = Some(CachedSchema {
            generation,
            text: text.clone(),
        });
        Ok(text)
    }

    pub async fn schema_overview(&self) -> Result<SchemaOverview, MarketAiError> {
        let text = self.schema_text().await?;
        Ok(schema::overview(&text))
    }

    pub async fn ask(&self, question: &str) -> Result<QueryResultRecord, MarketAiError> {
        if question.trim().is_empty() {
            return Err(MarketAiError::InvalidInput("Question is required".into()));
        }

        let schema_text = self.schema_text().await?;
        let translation = self.translator.translate(question, &schema_text).await;
        match &translation {
            Translation::Generated(_) => {}
            Translation::ParseFailure { reason, .. } | Translation::ServiceFailure { reason } => {
                warn!(%reason, "answering with fallback translation");
            }
        }
        let result = translation.into_result();

        let executable = result.has_executable_query();
        let mut answer = result.answer;
        let mut data = None;
        if executable {
            let rows = self.db.execute(&result.query).await?;
            if answer::has_placeholder(&answer) {
                answer = answer::render(&rows, &answer);
            }
            data = Some(rows);
        }

        let record = QueryResultRecord {
            question: question.to_string(),
            answer,
            query: result.query,
            explanation: result.explanation,
            data,
            asked_at: Utc::now(),
        };

        let mut history = self.history.lock().await;
        history.push_front(record.clone());
        history.truncate(self.max_history);

        Ok(record)
    }

    /// Newest first.
    pub async fn history(&self) -> Vec<QueryResultRecord> {
        self.history.lock().await.iter().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) async fn seed_schema_text(&self, text: &str) -> Result<(), MarketAiError> {
        let active = self.db.current().await?;
        *self.schema_cache.write().await = Some(CachedSchema {
            generation: active.generation,
            text: text.to_string(),
        });
        Ok(())
    }
}
