//! Statement classification and label normalization.
//!
//! Everything here is text-only and total: any input produces a result, the
//! worst case being a label that collapses less than it could.

use once_cell::sync::Lazy;
use regex::Regex;

/// Statement category derived from the leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Update,
    Delete,
    Create,
    Other,
}

impl StatementKind {
    /// Classify a statement by a case-insensitive prefix match on its leading
    /// keyword. Keywords are checked in the order select, update, delete,
    /// create; anything else (inserts included) is `Other`.
    pub fn classify(sql: &str) -> Self {
        if starts_with_keyword(sql, "select") {
            StatementKind::Select
        } else if starts_with_keyword(sql, "update") {
            StatementKind::Update
        } else if starts_with_keyword(sql, "delete") {
            StatementKind::Delete
        } else if starts_with_keyword(sql, "create") {
            StatementKind::Create
        } else {
            StatementKind::Other
        }
    }

    /// Only selects may be routed to a read-only endpoint.
    pub fn is_read(&self) -> bool {
        matches!(self, StatementKind::Select)
    }

    /// Returns the kind as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Create => "create",
            StatementKind::Other => "other",
        }
    }

    /// Display name used for the statement span.
    pub fn span_name(&self) -> &'static str {
        match self {
            StatementKind::Select => "SQL: SELECT",
            StatementKind::Update => "SQL: UPDATE",
            StatementKind::Delete => "SQL: DELETE",
            StatementKind::Create => "SQL: CREATE",
            StatementKind::Other => "SQL: OTHER",
        }
    }
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Constant block every insert value list collapses into.
pub const INSERT_VALUES_PLACEHOLDER: &str = "VALUES (? ?)";

// Two or more `?` placeholders separated by commas, e.g. the body of `IN (?,?,?)`.
static PLACEHOLDER_RUN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\?(?:\s*,\s*\?)+").unwrap());

// From the first `VALUES (` to the end of the text, across newlines.
static INSERT_VALUES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bvalues\s*\(.*").unwrap());

// Digits, each optionally followed by a comma: `42`, `1,2,3`.
static DIGIT_RUN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d,?)+").unwrap());

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    sql.trim_start()
        .get(..keyword.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
}

/// Whether the statement is an insert.
pub fn is_insert(sql: &str) -> bool {
    starts_with_keyword(sql, "insert")
}

/// Remove every run of comma-separated placeholders.
pub fn collapse_placeholders(sql: &str) -> String {
    PLACEHOLDER_RUN_REGEX.replace_all(sql, "").into_owned()
}

/// Replace an insert's value tuples with [`INSERT_VALUES_PLACEHOLDER`].
///
/// Statements that are not inserts are returned unchanged.
pub fn collapse_insert_values(sql: &str) -> String {
    if !is_insert(sql) {
        return sql.to_string();
    }
    INSERT_VALUES_REGEX
        .replace(sql, INSERT_VALUES_PLACEHOLDER)
        .into_owned()
}

/// Rewrite statement text into a bounded-cardinality label.
///
/// Placeholder runs are collapsed first, then insert value lists. Applying
/// `normalize` to its own output is a no-op.
pub fn normalize(sql: &str) -> String {
    collapse_insert_values(&collapse_placeholders(sql))
}

/// Strip digit runs (and their trailing commas) from a label.
///
/// This is a coarser pass than [`normalize`] that catches inlined numeric ids
/// such as `IN (1,2,3)`. It is applied to every `query` metric label.
pub fn sanitize_label(query: &str) -> String {
    DIGIT_RUN_REGEX.replace_all(query, "").into_owned()
}

/// A statement with its derived kind and normalized text.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub kind: StatementKind,
    pub normalized: String,
}

impl ParsedStatement {
    /// Classify and normalize a statement.
    pub fn parse(sql: &str) -> Self {
        Self {
            kind: StatementKind::classify(sql),
            normalized: normalize(sql),
        }
    }
}
