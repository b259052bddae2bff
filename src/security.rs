//! Query gate: statement screening applied before any SQL reaches the pool.
//!
//! The default policy is a case-insensitive whole-word keyword denylist. It
//! has no defense against obfuscated statements and is a guardrail only.
//! The strict policy additionally requires the text to parse into read-only
//! query statements.

use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::MarketAiError;

/// Keywords whose presence as a whole word rejects a statement.
pub const DISALLOWED_KEYWORDS: [&str; 9] = [
    "drop", "alter", "create", "insert", "update", "delete", "truncate", "grant", "revoke",
];

static DISALLOWED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", DISALLOWED_KEYWORDS.join("|")))
        .expect("keyword pattern is valid")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GatePolicy {
    /// Keyword denylist only.
    #[default]
    Denylist,
    /// Denylist, then parse and accept only query statements.
    Strict,
}

impl GatePolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Strict } else { Self::Denylist }
    }
}

/// Returns the first disallowed keyword found in `sql`, lowercased.
pub fn find_disallowed_keyword(sql: &str) -> Option<String> {
    DISALLOWED_PATTERN
        .captures(sql)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Screen a statement. `Ok(())` means it may be forwarded verbatim.
pub fn check_statement(sql: &str, policy: GatePolicy) -> Result<(), MarketAiError> {
    if let Some(keyword) = find_disallowed_keyword(sql) {
        return Err(MarketAiError::DisallowedStatement {
            reason: format!("keyword `{keyword}`"),
        });
    }

    if policy == GatePolicy::Strict {
        classify_read_only(sql)?;
    }

    Ok(())
}

fn classify_read_only(sql: &str) -> Result<(), MarketAiError> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| {
        MarketAiError::DisallowedStatement {
            reason: format!("unparseable statement: {e}"),
        }
    })?;

    if statements.is_empty() {
        return Err(MarketAiError::DisallowedStatement {
            reason: "empty statement".into(),
        });
    }

    for statement in &statements {
        let Statement::Query(query) = statement else {
            return Err(MarketAiError::DisallowedStatement {
                reason: format!("non-query statement: {}", statement_kind(statement)),
            });
        };
        if !is_read_only_query(query) {
            return Err(MarketAiError::DisallowedStatement {
                reason: "query writes data (SELECT INTO or a data-modifying clause)".into(),
            });
        }
    }

    Ok(())
}

/// A query that only reads: no `SELECT ... INTO` anywhere in its body, its
/// set operations or its CTEs.
fn is_read_only_query(query: &Query) -> bool {
    let ctes_read_only = query
        .with
        .as_ref()
        .is_none_or(|with| with.cte_tables.iter().all(|cte| is_read_only_query(&cte.query)));
    ctes_read_only && is_read_only_body(&query.body)
}

fn is_read_only_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_read_only_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_read_only_body(left) && is_read_only_body(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}

fn statement_kind(statement: &Statement) -> String {
    let text = statement.to_string();
    text.split_whitespace()
        .next()
        .unwrap_or("unknown")
        .to_ascii_uppercase()
}
