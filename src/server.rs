//! MCP stdio server exposing the same operations as the HTTP endpoints.

use std::sync::Arc;

use rmcp::{
    ServerHandler, ServiceExt,
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject,
        ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo,
        Tool,
    },
    service::RequestContext,
    transport::stdio,
};
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use crate::assistant::{Assistant, ConnectSummary, QueryResultRecord};
use crate::db::ConnectionStatus;
use crate::error::MarketAiError;
use crate::tools::{
    AskRequest, ConnectRequest, HistoryResponse, QueryRequest, QueryResponse,
    SchemaOverviewResponse, SchemaResponse,
};

#[derive(Debug, Clone)]
pub struct MarketAiHandler {
    assistant: Assistant,
}

/// Tools that take no arguments.
#[derive(Debug, JsonSchema)]
pub struct NoArguments {}

fn input_schema<T: JsonSchema>() -> Arc<JsonObject> {
    match serde_json::to_value(schemars::schema_for!(T)) {
        Ok(Value::Object(map)) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Option<JsonObject>) -> Result<T, rmcp::ErrorData> {
    serde_json::from_value(Value::Object(arguments.unwrap_or_default()))
        .map_err(|e| rmcp::ErrorData::invalid_params(e.to_string(), None))
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, rmcp::ErrorData> {
    Ok(CallToolResult::success(vec![Content::json(value)?]))
}

impl MarketAiHandler {
    pub fn new(assistant: Assistant) -> Self {
        Self { assistant }
    }

    /// Connect and load the schema; unlike the HTTP endpoint this checks
    /// the server is reachable and has tables.
    pub async fn connect_tool(&self, req: ConnectRequest) -> Result<ConnectSummary, MarketAiError> {
        let Some(connection_string) = req.connection_string() else {
            return Err(MarketAiError::InvalidInput(
                "Connection string is required".into(),
            ));
        };
        self.assistant.connect(connection_string).await
    }

    pub async fn query_tool(&self, req: QueryRequest) -> Result<QueryResponse, MarketAiError> {
        let Some(sql) = req.query() else {
            return Err(MarketAiError::InvalidInput("Query is required".into()));
        };
        let data = self.assistant.database().execute(sql).await?;
        Ok(QueryResponse { data })
    }

    pub async fn schema_tool(&self) -> Result<SchemaResponse, MarketAiError> {
        let data = self.assistant.database().schema().await?;
        Ok(SchemaResponse { data })
    }

    pub async fn schema_overview_tool(&self) -> Result<SchemaOverviewResponse, MarketAiError> {
        let data = self.assistant.schema_overview().await?;
        Ok(SchemaOverviewResponse { data })
    }

    pub async fn ask_tool(&self, req: AskRequest) -> Result<QueryResultRecord, MarketAiError> {
        let question = req.question().unwrap_or_default();
        self.assistant.ask(question).await
    }

    pub async fn history_tool(&self) -> HistoryResponse {
        HistoryResponse {
            data: self.assistant.history().await,
        }
    }

    pub async fn health_check_tool(&self) -> ConnectionStatus {
        self.assistant.status().await
    }

    fn get_tools() -> Vec<Tool> {
        vec![
            Tool::new(
                "connect",
                "Connect to a PostgreSQL database and load its public schema",
                input_schema::<ConnectRequest>(),
            ),
            Tool::new(
                "query",
                "Run a read-only SQL query. Statements containing DROP, ALTER, CREATE, INSERT, UPDATE, DELETE, TRUNCATE, GRANT or REVOKE are rejected",
                input_schema::<QueryRequest>(),
            ),
            Tool::new(
                "schema",
                "List tables in the public schema with their column definitions",
                input_schema::<NoArguments>(),
            ),
            Tool::new(
                "schema_overview",
                "Structured tables, columns and inferred relationships",
                input_schema::<NoArguments>(),
            ),
            Tool::new(
                "ask",
                "Answer a plain-English question by generating and running SQL",
                input_schema::<AskRequest>(),
            ),
            Tool::new(
                "history",
                "Previously answered questions, newest first",
                input_schema::<NoArguments>(),
            ),
            Tool::new(
                "health_check",
                "Report whether a database is connected",
                input_schema::<NoArguments>(),
            ),
        ]
    }

    async fn list_tools_handler(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<rmcp::service::RoleServer>,
    ) -> Result<ListToolsResult, rmcp::ErrorData> {
        Ok(ListToolsResult {
            tools: Self::get_tools(),
            next_cursor: None,
        })
    }

    async fn call_tool_handler(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<rmcp::service::RoleServer>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.dispatch(request.name.as_ref(), request.arguments).await
    }

    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        match name {
            "connect" => json_result(&self.connect_tool(parse_args(arguments)?).await?),
            "query" => json_result(&self.query_tool(parse_args(arguments)?).await?),
            "schema" => json_result(&self.schema_tool().await?),
            "schema_overview" => json_result(&self.schema_overview_tool().await?),
            "ask" => json_result(&self.ask_tool(parse_args(arguments)?).await?),
            "history" => json_result(&self.history_tool().await),
            "health_check" => json_result(&self.health_check_tool().await),
            _ => Err(rmcp::ErrorData::invalid_params("Tool not found", None)),
        }
    }
}

impl ServerHandler for MarketAiHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            server_info: Implementation::from_build_env(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Ask questions about a PostgreSQL database in plain English. \
                Connect first, then use ask for answers or query for read-only SQL."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
        context: RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, rmcp::ErrorData>> + Send + '_
    {
        self.list_tools_handler(request, context)
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, rmcp::ErrorData>> + Send + '_
    {
        self.call_tool_handler(request, context)
    }
}

pub async fn run(assistant: Assistant) -> anyhow::Result<()> {
    let handler = MarketAiHandler::new(assistant);
    info!("Serving MCP over stdio");

    let server = handler.serve(stdio()).await?;
    server.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::ConnectionManager;
    use crate::providers::mock::MockProvider;
    use crate::security::GatePolicy;
    use crate::translator::Translator;
    use serde_json::json;

    fn handler() -> MarketAiHandler {
        let options = DatabaseConfig {
            acquire_timeout_secs: 1,
            ..DatabaseConfig::default()
        };
        let db = ConnectionManager::new(options, GatePolicy::Denylist);
        let translator = Translator::new(Arc::new(MockProvider::replying("not json")), 0.2);
        MarketAiHandler::new(Assistant::new(db, translator, 10))
    }

    fn args(value: Value) -> Option<JsonObject> {
        value.as_object().cloned()
    }

    #[test]
    fn test_tool_list() {
        let names: Vec<_> = MarketAiHandler::get_tools()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        assert_eq!(
            names,
            vec!["connect", "query", "schema", "schema_overview", "ask", "history", "health_check"]
        );
    }

    #[test]
    fn test_connect_schema_uses_wire_field_name() {
        let schema = input_schema::<ConnectRequest>();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("connectionString"));
    }

    #[tokio::test]
    async fn test_health_check_before_connect() {
        let status = handler().health_check_tool().await;
        assert!(!status.connected);
        assert_eq!(status.target, None);
    }

    #[tokio::test]
    async fn test_connect_requires_connection_string() {
        let err = handler()
            .connect_tool(ConnectRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MarketAiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_connect_reports_unreachable_server() {
        let handler = handler();
        let err = handler
            .connect_tool(ConnectRequest {
                connection_string: Some("postgres://u@127.0.0.1:9/shop".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MarketAiError::Execution(_)));
        // The pool is still replaced, as with the HTTP endpoint.
        assert_eq!(handler.health_check_tool().await.generation, 1);
    }

    #[tokio::test]
    async fn test_query_rejects_disallowed_statement() {
        let handler = handler();
        handler
            .assistant
            .database()
            .connect("postgres://u@127.0.0.1:9/shop")
            .await
            .unwrap();

        let err = handler
            .query_tool(QueryRequest {
                query: Some("TRUNCATE orders".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MarketAiError::DisallowedStatement { .. }));
    }

    #[tokio::test]
    async fn test_dispatch_errors_map_to_mcp_errors() {
        let handler = handler();

        let err = handler.dispatch("nope", None).await.unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);

        let err = handler
            .dispatch("query", args(json!({"query": 42})))
            .await
            .unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);

        let err = handler
            .dispatch("ask", args(json!({"question": "How many customers?"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INTERNAL_ERROR);
        assert_eq!(err.message, "Database pool not initialized");
    }

    #[tokio::test]
    async fn test_dispatch_history_returns_content() {
        let result = handler().dispatch("history", None).await.unwrap();
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.is_error, Some(false));
    }
}
