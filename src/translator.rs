//! Natural-language to SQL translation through a completion service.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::providers::CompletionProvider;

pub const NO_QUERY_SENTINEL: &str = "-- No query generated";
pub const ERROR_QUERY_SENTINEL: &str = "-- Error generating query";

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```json([\s\S]*?)```").expect("fence pattern is valid"));

static BRACED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\{[\s\S]*\})").expect("brace pattern is valid"));

/// What the model proposes for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TranslationResult {
    /// Plain-English answer, normally holding one `{answer}` placeholder
    #[serde(default, deserialize_with = "lenient_text")]
    pub answer: String,
    /// SQL text, or one of the sentinel comments
    #[serde(default, deserialize_with = "lenient_text")]
    pub query: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub explanation: String,
}

/// Models sometimes answer `null` or a bare number where text is expected.
/// `null` reads as empty; other values keep their JSON text.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

impl TranslationResult {
    pub fn parse_failure() -> Self {
        Self {
            answer: "I couldn't generate a proper response. Please try rephrasing your question."
                .into(),
            query: NO_QUERY_SENTINEL.into(),
            explanation: "There was an error processing your request.".into(),
        }
    }

    pub fn service_failure() -> Self {
        Self {
            answer: "An error occurred while generating the SQL query.".into(),
            query: ERROR_QUERY_SENTINEL.into(),
            explanation: "There was an API error. Please try again later.".into(),
        }
    }

    /// Whether `query` should be sent to the database at all.
    pub fn has_executable_query(&self) -> bool {
        !self.query.trim().is_empty()
            && self.query != NO_QUERY_SENTINEL
            && self.query != ERROR_QUERY_SENTINEL
    }
}

/// Outcome of one translation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Generated(TranslationResult),
    /// The reply held no parseable JSON object
    ParseFailure { reply: String, reason: String },
    /// The completion service could not be reached or errored
    ServiceFailure { reason: String },
}

impl Translation {
    /// The result to show: the generated triple, or the fixed fallback.
    pub fn into_result(self) -> TranslationResult {
        match self {
            Self::Generated(result) => result,
            Self::ParseFailure { .. } => TranslationResult::parse_failure(),
            Self::ServiceFailure { .. } => TranslationResult::service_failure(),
        }
    }
}

pub fn build_prompt(question: &str, schema_text: &str) -> String {
    format!(
        r#"
You are a helpful SQL assistant. Given the following database schema:

{schema_text}

Generate a SQL query to answer this question: "{question}"

Format your response as a JSON object with the following structure:
{{
  "answer": "Detailed answer to the question in plain English",
  "query": "The SQL query that answers the question",
  "explanation": "Explanation of how the SQL query works"
}}
For answer the answer should be:
      "There are {{answer}} customers in Chicago."
      Since we do not know the answer, please use the placeholder {{answer}} in the answer.
"#
    )
}

/// Pull the JSON body out of a free-form reply: a ```json fence first,
/// then the widest `{...}` span, else the whole reply.
pub fn extract_json_body(reply: &str) -> &str {
    if let Some(caps) = FENCED_JSON.captures(reply) {
        if let Some(body) = caps.get(1) {
            return body.as_str();
        }
    }
    if let Some(caps) = BRACED_JSON.captures(reply) {
        if let Some(body) = caps.get(1) {
            return body.as_str();
        }
    }
    reply
}

pub fn parse_reply(reply: &str) -> Translation {
    let body = extract_json_body(reply);
    match serde_json::from_str::<TranslationResult>(body.trim()) {
        Ok(result) => Translation::Generated(result),
        Err(e) => Translation::ParseFailure {
            reply: reply.to_string(),
            reason: e.to_string(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct Translator {
    provider: Arc<dyn CompletionProvider>,
    temperature: f32,
}

impl Translator {
    pub fn new(provider: Arc<dyn CompletionProvider>, temperature: f32) -> Self {
        Self {
            provider,
            temperature,
        }
    }

    /// One completion, no retry. Never fails: failures become tagged outcomes.
    pub async fn translate(&self, question: &str, schema_text: &str) -> Translation {
        let prompt = build_prompt(question, schema_text);
        debug!(provider = self.provider.name(), "translating question");

        let reply = match self.provider.complete(&prompt, self.temperature).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Completion service failed: {}", e);
                return Translation::ServiceFailure {
                    reason: e.to_string(),
                };
            }
        };

        let translation = parse_reply(&reply);
        if let Translation::ParseFailure { reply, reason } = &translation {
            warn!("Could not parse completion as JSON: {}", reason);
            debug!(%reply, "unparsed completion");
        }
        translation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    const REPLY_JSON: &str = r#"{"answer": "There are {answer} customers in Chicago.", "query": "SELECT COUNT(*) FROM customers WHERE city = 'Chicago'", "explanation": "Counts customers."}"#;

    #[test]
    fn test_prompt_embeds_schema_and_question() {
        let prompt = build_prompt("How many customers?", "Table customers: id integer");
        assert!(prompt.contains("Table customers: id integer"));
        assert!(prompt.contains(r#"answer this question: "How many customers?""#));
        assert!(prompt.contains("placeholder {answer}"));
        assert!(prompt.contains(r#""query": "The SQL query that answers the question""#));
    }

    #[test]
    fn test_fenced_block_is_preferred() {
        let reply = format!("Sure!\n```json\n{REPLY_JSON}\n```\nAlso {{\"other\": 1}}");
        assert_eq!(extract_json_body(&reply).trim(), REPLY_JSON);
    }

    #[test]
    fn test_brace_span_is_used_without_fence() {
        let reply = format!("Here you go: {REPLY_JSON} Hope that helps.");
        assert_eq!(extract_json_body(&reply), REPLY_JSON);
    }

    #[test]
    fn test_whole_reply_is_last_resort() {
        assert_eq!(extract_json_body("no json here"), "no json here");
    }

    #[test]
    fn test_parse_generated_reply() {
        match parse_reply(REPLY_JSON) {
            Translation::Generated(result) => {
                assert_eq!(result.answer, "There are {answer} customers in Chicago.");
                assert!(result.query.starts_with("SELECT COUNT(*)"));
                assert!(result.has_executable_query());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let translation = parse_reply(r#"{"answer": "Nothing to run"}"#);
        let result = translation.into_result();
        assert_eq!(result.query, "");
        assert!(!result.has_executable_query());
    }

    #[test]
    fn test_null_query_keeps_model_answer() {
        let reply = r#"{"answer":"That data is not in the schema.","query":null,"explanation":"No table holds it."}"#;
        match parse_reply(reply) {
            Translation::Generated(result) => {
                assert_eq!(result.answer, "That data is not in the schema.");
                assert_eq!(result.query, "");
                assert_eq!(result.explanation, "No table holds it.");
                assert!(!result.has_executable_query());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_scalar_fields_become_text() {
        let result = parse_reply(r#"{"answer": 42, "query": "SELECT 42", "explanation": null}"#).into_result();
        assert_eq!(result.answer, "42");
        assert_eq!(result.explanation, "");
    }

    #[test]
    fn test_unparseable_reply_maps_to_exact_fallback() {
        let translation = parse_reply("```json\n{not valid}\n```");
        assert!(matches!(translation, Translation::ParseFailure { .. }));
        assert_eq!(
            translation.into_result(),
            TranslationResult {
                answer: "I couldn't generate a proper response. Please try rephrasing your question."
                    .into(),
                query: "-- No query generated".into(),
                explanation: "There was an error processing your request.".into(),
            }
        );
    }

    #[test]
    fn test_sentinels_are_not_executable() {
        assert!(!TranslationResult::parse_failure().has_executable_query());
        assert!(!TranslationResult::service_failure().has_executable_query());
    }

    #[tokio::test]
    async fn test_translate_uses_low_temperature() {
        let provider = Arc::new(MockProvider::replying(REPLY_JSON));
        let translator = Translator::new(provider.clone(), 0.2);

        let translation = translator.translate("How many customers in Chicago?", "Table customers: id integer").await;

        assert!(matches!(translation, Translation::Generated(_)));
        assert_eq!(provider.calls(), 1);
        let (prompt, temperature) = provider.last_prompt().unwrap();
        assert!(prompt.contains("How many customers in Chicago?"));
        assert!((temperature - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_service_failure_maps_to_its_own_fallback() {
        let translator = Translator::new(Arc::new(MockProvider::failing()), 0.2);
        let translation = translator.translate("q", "s").await;
        assert!(matches!(translation, Translation::ServiceFailure { .. }));
        assert_eq!(translation.into_result(), TranslationResult::service_failure());
    }

    #[tokio::test]
    async fn test_garbage_reply_maps_to_parse_fallback() {
        let translator = Translator::new(Arc::new(MockProvider::replying("I am not JSON")), 0.2);
        let result = translator.translate("q", "s").await.into_result();
        assert_eq!(result, TranslationResult::parse_failure());
    }
}
