//! # Query Converter
//!
//! Turns a `field = value` string into a [`StructuredQuery`].
//!
//! Grammar:
//! ```text
//! ^\s*(\w+)\s*=\s*(.+)$
//! ```
//! The first `=` splits field from value; later `=`s belong to the value.
//! The value is classified in order: anything with a `*` is a wildcard,
//! `/…/` is a regexp, everything else is an exact term. A slash-wrapped
//! value that contains `*` is therefore a wildcard.

use crate::query::StructuredQuery;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid query format: {0}")]
    MalformedQuery(String),
}

/// A `field = value` clause split by the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedClause {
    /// Field name exactly as typed.
    pub field: String,
    /// Value with surrounding whitespace trimmed.
    pub raw_value: String,
}

fn clause_grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| Regex::new(r"^\s*(\w+)\s*=\s*(.+)$").expect("clause grammar compiles"))
}

/// Split a query into its field and value.
pub fn parse_clause(query: &str) -> Result<ParsedClause, ConversionError> {
    let trimmed = query.trim();
    let caps = clause_grammar()
        .captures(trimmed)
        .ok_or_else(|| ConversionError::MalformedQuery(query.to_string()))?;

    let field = caps[1].to_string();
    let raw_value = caps[2].trim().to_string();
    if raw_value.is_empty() {
        return Err(ConversionError::MalformedQuery(query.to_string()));
    }

    Ok(ParsedClause { field, raw_value })
}

/// Pick the query shape for a parsed clause.
pub fn classify(clause: ParsedClause) -> StructuredQuery {
    let ParsedClause { field, raw_value } = clause;

    if raw_value.contains('*') {
        StructuredQuery::Wildcard {
            field,
            pattern: raw_value,
        }
    } else if is_slash_wrapped(&raw_value) {
        let pattern = raw_value[1..raw_value.len() - 1].to_string();
        StructuredQuery::Regexp { field, pattern }
    } else {
        StructuredQuery::Term {
            field,
            value: raw_value,
        }
    }
}

fn is_slash_wrapped(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('/') && value.ends_with('/')
}

/// Convert a `field = value` query into its structured form.
pub fn convert(query: &str) -> Result<StructuredQuery, ConversionError> {
    let clause = parse_clause(query)?;
    Ok(classify(clause))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(field: &str, value: &str) -> StructuredQuery {
        StructuredQuery::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_wildcard_query() {
        assert_eq!(
            convert("Hostname = octoxlabs*").unwrap(),
            StructuredQuery::Wildcard {
                field: "Hostname".into(),
                pattern: "octoxlabs*".into(),
            }
        );
    }

    #[test]
    fn test_regex_query() {
        assert_eq!(
            convert("Hostname = /octoxlabs.+/").unwrap(),
            StructuredQuery::Regexp {
                field: "Hostname".into(),
                pattern: "octoxlabs.+".into(),
            }
        );
        assert_eq!(
            convert("Ip = /10\\.0\\.1\\.[0-9]+/").unwrap(),
            StructuredQuery::Regexp {
                field: "Ip".into(),
                pattern: "10\\.0\\.1\\.[0-9]+".into(),
            }
        );
    }

    #[test]
    fn test_star_wins_over_slashes() {
        assert_eq!(
            convert("Hostname = /octo*labs/").unwrap(),
            StructuredQuery::Wildcard {
                field: "Hostname".into(),
                pattern: "/octo*labs/".into(),
            }
        );
        // a regexp body can never contain `*`
        assert_eq!(
            convert("Hostname = /octoxlabs.*/").unwrap(),
            StructuredQuery::Wildcard {
                field: "Hostname".into(),
                pattern: "/octoxlabs.*/".into(),
            }
        );
    }

    #[test]
    fn test_term_query() {
        assert_eq!(
            convert("Hostname = octoxlabs").unwrap(),
            term("Hostname", "octoxlabs")
        );
    }

    #[test]
    fn test_whitespace_insensitive() {
        assert_eq!(
            convert("Hostname  =  octoxlabs").unwrap(),
            convert("Hostname = octoxlabs").unwrap()
        );
        assert_eq!(convert("Hostname=octoxlabs").unwrap(), term("Hostname", "octoxlabs"));
        assert_eq!(
            convert("  Hostname = octoxlabs \t").unwrap(),
            term("Hostname", "octoxlabs")
        );
    }

    #[test]
    fn test_value_keeps_later_equals() {
        assert_eq!(convert("ip = a=b").unwrap(), term("ip", "a=b"));
    }

    #[test]
    fn test_single_slash_is_a_term() {
        assert_eq!(convert("Hostname = /").unwrap(), term("Hostname", "/"));
        assert_eq!(convert("Hostname = /abc").unwrap(), term("Hostname", "/abc"));
    }

    #[test]
    fn test_empty_regex_body() {
        assert_eq!(
            convert("Hostname = //").unwrap(),
            StructuredQuery::Regexp {
                field: "Hostname".into(),
                pattern: String::new(),
            }
        );
    }

    #[test]
    fn test_missing_equals_is_malformed() {
        assert_eq!(
            convert("Hostname octoxlabs"),
            Err(ConversionError::MalformedQuery("Hostname octoxlabs".into()))
        );
        assert!(matches!(
            convert("invalid query format"),
            Err(ConversionError::MalformedQuery(_))
        ));
    }

    #[test]
    fn test_empty_parts_are_malformed() {
        assert!(convert("").is_err());
        assert!(convert("Hostname =").is_err());
        assert!(convert("= octoxlabs").is_err());
    }

    #[test]
    fn test_field_case_preserved() {
        let clause = parse_clause("HOSTNAME = x").unwrap();
        assert_eq!(clause.field, "HOSTNAME");
        assert_eq!(clause.raw_value, "x");
    }
}
