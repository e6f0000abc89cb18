//! Table-name extraction for error signatures and memory lookups.

use regex::Regex;
use sqlparser::ast::visit_relations;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::LazyLock;

static FROM_JOIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_"`][\w."`]*)"#)
        .expect("table reference pattern is valid")
});

/// Returns the tables a query references, lowercased, sorted and deduplicated.
///
/// Parses with sqlparser when it can; SQL the parser rejects (which is common
/// for broken LLM output) falls back to scanning `FROM`/`JOIN` clauses.
pub fn table_references(sql: &str) -> Vec<String> {
    let mut tables = BTreeSet::new();

    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => {
            let _ = visit_relations(&statements, |relation| {
                let name = relation
                    .0
                    .iter()
                    .map(|ident| ident.value.to_lowercase())
                    .collect::<Vec<_>>()
                    .join(".");
                tables.insert(name);
                ControlFlow::<()>::Continue(())
            });
        }
        Err(_) => {
            for caps in FROM_JOIN_RE.captures_iter(sql) {
                let name = caps[1].replace(['"', '`'], "").to_lowercase();
                if !name.is_empty() {
                    tables.insert(name);
                }
            }
        }
    }

    tables.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_select() {
        assert_eq!(table_references("SELECT * FROM Users"), vec!["users"]);
    }

    #[test]
    fn test_join_is_sorted_and_deduplicated() {
        let tables = table_references(
            "SELECT o.id FROM orders o JOIN users u ON u.id = o.user_id JOIN orders o2 ON o2.id = o.id",
        );
        assert_eq!(tables, vec!["orders", "users"]);
    }

    #[test]
    fn test_schema_qualified_name() {
        assert_eq!(
            table_references("SELECT * FROM public.orders"),
            vec!["public.orders"]
        );
    }

    #[test]
    fn test_subquery_tables_are_found() {
        let tables =
            table_references("SELECT * FROM a WHERE id IN (SELECT a_id FROM b)");
        assert_eq!(tables, vec!["a", "b"]);
    }

    #[test]
    fn test_unparseable_sql_falls_back_to_regex() {
        let tables = table_references("SELEC name FROM customers JOIN \"Orders\" ON");
        assert_eq!(tables, vec!["customers", "orders"]);
    }

    #[test]
    fn test_no_tables() {
        assert!(table_references("SELECT 1").is_empty());
    }
}
