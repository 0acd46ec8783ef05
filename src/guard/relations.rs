//! Statement shape and table references.
//!
//! Walks the parsed tree with the `sqlparser` visitor so that subqueries hidden
//! anywhere in an expression are still seen.

use crate::error::ValidationError;
use crate::policy::FullyQualifiedName;
use sqlparser::ast::{ObjectName, Query, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::tokenizer::{Token, TokenWithLocation};
use std::ops::ControlFlow;

/// The one top-level query of a single read-only SELECT statement.
pub fn single_select<'a>(
    statements: &'a [Statement],
    tokens: &[TokenWithLocation],
) -> Result<&'a Query, ValidationError> {
    // The trailing terminator is already gone; any separator left means a script.
    if tokens.iter().any(|t| t.token == Token::SemiColon) {
        return Err(ValidationError::NotASelect);
    }

    let query = match statements {
        [Statement::Query(query)] => query.as_ref(),
        _ => return Err(ValidationError::NotASelect),
    };

    if !is_select_body(&query.body) {
        return Err(ValidationError::NotASelect);
    }
    if query.visit(&mut ReadOnlyShape).is_break() {
        return Err(ValidationError::NotASelect);
    }

    Ok(query)
}

/// Every table/view reference in parse order, excluding names that resolve to
/// a CTE in scope. Table functions in FROM count as references too.
pub fn table_references(query: &Query) -> Vec<ObjectName> {
    let mut collector = RelationCollector::default();
    // The collector never breaks.
    let _ = query.visit(&mut collector);
    collector.relations
}

/// Normalize a reference to a lower-cased `schema.name`.
///
/// One-part names are unqualified. Names with more than two parts can never
/// match the allow-list.
pub fn qualify(name: &ObjectName) -> Result<FullyQualifiedName, ValidationError> {
    match name.0.as_slice() {
        [schema, table] => FullyQualifiedName::new(&schema.value, &table.value)
            .ok_or_else(|| ValidationError::UnqualifiedTable(name.to_string())),
        [] | [_] => Err(ValidationError::UnqualifiedTable(name.to_string())),
        _ => Err(ValidationError::TableNotAllowed(name.to_string().to_lowercase())),
    }
}

fn is_select_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(_) => true,
        SetExpr::Query(query) => is_select_body(&query.body),
        SetExpr::SetOperation { left, right, .. } => is_select_body(left) && is_select_body(right),
        _ => false,
    }
}

fn is_read_only_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        // Nested queries are checked on their own visit.
        SetExpr::Query(_) => true,
        SetExpr::SetOperation { left, right, .. } => {
            is_read_only_body(left) && is_read_only_body(right)
        }
        SetExpr::Values(_) => true,
        _ => false,
    }
}

/// Breaks on any query that writes, locks rows or uses `TABLE name` shorthand.
struct ReadOnlyShape;

impl Visitor for ReadOnlyShape {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if query.locks.is_empty() && is_read_only_body(&query.body) {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }
}

/// CTE names introduced by one query's WITH clause.
///
/// `visible` is how many of `names` a relation may currently resolve to: all of
/// them in the main body, only earlier siblings inside a CTE body.
struct CteScope {
    names: Vec<String>,
    // Identity of each CTE body, compared by address only.
    bodies: Vec<*const Query>,
    visible: usize,
    recursive: bool,
}

impl CteScope {
    fn for_query(query: &Query) -> Self {
        let (names, bodies, recursive) = match &query.with {
            Some(with) => (
                with.cte_tables
                    .iter()
                    .map(|cte| cte.alias.name.value.to_lowercase())
                    .collect::<Vec<_>>(),
                with.cte_tables
                    .iter()
                    .map(|cte| cte.query.as_ref() as *const Query)
                    .collect(),
                with.recursive,
            ),
            None => (Vec::new(), Vec::new(), false),
        };
        Self {
            visible: names.len(),
            names,
            bodies,
            recursive,
        }
    }

    fn body_index(&self, query: &Query) -> Option<usize> {
        self.bodies
            .iter()
            .position(|body| std::ptr::eq(*body, query))
    }

    fn resolves(&self, name: &str) -> bool {
        self.names.iter().take(self.visible).any(|n| n == name)
    }
}

#[derive(Default)]
struct RelationCollector {
    scopes: Vec<CteScope>,
    relations: Vec<ObjectName>,
}

impl RelationCollector {
    fn is_cte_reference(&self, name: &ObjectName) -> bool {
        match name.0.as_slice() {
            [ident] => {
                let lowered = ident.value.to_lowercase();
                self.scopes.iter().any(|scope| scope.resolves(&lowered))
            }
            _ => false,
        }
    }
}

impl Visitor for RelationCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(parent) = self.scopes.last_mut() {
            if let Some(index) = parent.body_index(query) {
                parent.visible = if parent.recursive { index + 1 } else { index };
            }
        }
        self.scopes.push(CteScope::for_query(query));
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        self.scopes.pop();
        if let Some(parent) = self.scopes.last_mut() {
            if parent.body_index(query).is_some() {
                parent.visible = parent.names.len();
            }
        }
        ControlFlow::Continue(())
    }

    // LATERAL table functions never reach `pre_visit_relation`.
    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Function { name, .. } = factor {
            self.relations.push(name.clone());
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        if !self.is_cte_reference(relation) {
            self.relations.push(relation.clone());
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;
    use sqlparser::tokenizer::Tokenizer;

    fn parse(sql: &str) -> (Vec<Statement>, Vec<TokenWithLocation>) {
        let dialect = PostgreSqlDialect {};
        let tokens = Tokenizer::new(&dialect, sql).tokenize_with_location().unwrap();
        let statements = Parser::parse_sql(&dialect, sql).unwrap();
        (statements, tokens)
    }

    fn shape(sql: &str) -> Result<(), ValidationError> {
        let (statements, tokens) = parse(sql);
        single_select(&statements, &tokens).map(|_| ())
    }

    fn references(sql: &str) -> Vec<String> {
        let (statements, tokens) = parse(sql);
        let query = single_select(&statements, &tokens).unwrap();
        table_references(query)
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    #[test]
    fn test_select_shapes_accepted() {
        assert!(shape("SELECT 1").is_ok());
        assert!(shape("WITH m AS (SELECT * FROM analytics.monthly_revenue) SELECT * FROM m").is_ok());
        assert!(shape("(SELECT 1)").is_ok());
        assert!(shape("SELECT 1 UNION ALL SELECT 2").is_ok());
        assert!(shape("SELECT * FROM (VALUES (1), (2)) AS v(x)").is_ok());
    }

    #[test]
    fn test_non_select_shapes_rejected() {
        assert_eq!(shape("SELECT 1; SELECT 2"), Err(ValidationError::NotASelect));
        assert_eq!(shape("SELECT 1;"), Err(ValidationError::NotASelect));
        assert_eq!(shape("VALUES (1)"), Err(ValidationError::NotASelect));
        assert_eq!(shape("SHOW search_path"), Err(ValidationError::NotASelect));
        assert_eq!(shape("EXPLAIN SELECT 1"), Err(ValidationError::NotASelect));
        assert_eq!(
            shape("SELECT * INTO analytics.stash FROM analytics.monthly_revenue"),
            Err(ValidationError::NotASelect)
        );
        assert_eq!(
            shape("SELECT * FROM analytics.monthly_revenue FOR SHARE"),
            Err(ValidationError::NotASelect)
        );
    }

    #[test]
    fn test_references_in_parse_order() {
        assert_eq!(
            references(
                "SELECT * FROM analytics.a JOIN analytics.b ON a.id = b.id \
                 WHERE a.x IN (SELECT x FROM analytics.c) \
                 AND EXISTS (SELECT 1 FROM analytics.d)"
            ),
            vec!["analytics.a", "analytics.b", "analytics.c", "analytics.d"]
        );
    }

    #[test]
    fn test_references_in_select_list_and_derived_tables() {
        assert_eq!(
            references(
                "SELECT (SELECT max(revenue) FROM analytics.monthly_revenue) AS top \
                 FROM (SELECT * FROM secret.t) AS sub"
            ),
            vec!["analytics.monthly_revenue", "secret.t"]
        );
    }

    #[test]
    fn test_cte_names_are_not_table_references() {
        assert_eq!(
            references(
                "WITH m AS (SELECT * FROM analytics.monthly_revenue), \
                      n AS (SELECT * FROM m) \
                 SELECT * FROM n JOIN m ON true"
            ),
            vec!["analytics.monthly_revenue"]
        );
    }

    #[test]
    fn test_cte_cannot_see_later_sibling() {
        assert_eq!(
            references("WITH a AS (SELECT * FROM b), b AS (SELECT 1) SELECT * FROM a"),
            vec!["b"]
        );
    }

    #[test]
    fn test_recursive_cte_sees_itself() {
        assert_eq!(
            references(
                "WITH RECURSIVE r(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM r WHERE n < 5) \
                 SELECT * FROM r"
            ),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_cte_scope_does_not_leak_out_of_subquery() {
        assert_eq!(
            references(
                "SELECT * FROM (WITH secret AS (SELECT 1) SELECT * FROM secret) AS s, secret"
            ),
            vec!["secret"]
        );
    }

    #[test]
    fn test_lateral_table_functions_are_references() {
        assert_eq!(
            references(
                "SELECT * FROM analytics.a, LATERAL pg_catalog.pg_ls_dir('.') AS f \
                 JOIN analytics.b ON true"
            ),
            vec!["analytics.a", "pg_catalog.pg_ls_dir", "analytics.b"]
        );
        assert_eq!(
            references("SELECT * FROM analytics.a, LATERAL generate_series(1, 3) AS g"),
            vec!["analytics.a", "generate_series"]
        );
    }

    #[test]
    fn test_qualify() {
        let (statements, tokens) =
            parse("SELECT * FROM Analytics.Invoice_Summary, orders, db.analytics.t");
        let query = single_select(&statements, &tokens).unwrap();
        let names = table_references(query);
        assert_eq!(
            qualify(&names[0]).unwrap(),
            FullyQualifiedName::parse("analytics.invoice_summary").unwrap()
        );
        assert_eq!(
            qualify(&names[1]),
            Err(ValidationError::UnqualifiedTable("orders".to_string()))
        );
        assert_eq!(
            qualify(&names[2]),
            Err(ValidationError::TableNotAllowed("db.analytics.t".to_string()))
        );
    }
}
