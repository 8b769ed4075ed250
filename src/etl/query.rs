//! Source query construction
//!
//! Queries are built from a [`TableConfig`] and the table's stored watermark.
//! The watermark is never spliced into the SQL text: it travels as bind
//! parameter `$1`, and only the rendered log form shows it inline.

use crate::config::TableConfig;
use std::fmt;

/// Exclusive lower bound on the incremental column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    pub column: String,
    pub value: String,
}

/// A parameterized `SELECT` against one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    columns: Option<Vec<String>>,
    boundary: Option<Boundary>,
}

/// Build the query for `table`
///
/// - full tables: `SELECT <columns> FROM <table>`, the watermark is ignored
/// - incremental tables without a watermark: same as full
/// - incremental tables with a watermark: adds `WHERE <column> > $1`
pub fn build(table: &TableConfig, watermark: Option<&str>) -> Query {
    let boundary = match (&table.incremental_column, watermark) {
        (Some(column), Some(value)) if table.is_incremental() => Some(Boundary {
            column: column.clone(),
            value: value.to_string(),
        }),
        _ => None,
    };

    Query {
        table: table.name.clone(),
        columns: table.columns().map(<[String]>::to_vec),
        boundary,
    }
}

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl Query {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Projected columns, `None` for `*`
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    pub fn boundary(&self) -> Option<&Boundary> {
        self.boundary.as_ref()
    }

    fn select_list(&self) -> String {
        match &self.columns {
            Some(columns) => columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            None => "*".to_string(),
        }
    }

    fn render(&self, select: &str, boundary: impl FnOnce(&Boundary) -> String) -> String {
        let mut sql = format!("SELECT {} FROM {}", select, self.table);
        if let Some(b) = &self.boundary {
            sql.push_str(&format!(" WHERE {}", boundary(b)));
        }
        sql
    }

    fn placeholder(boundary: &Boundary) -> String {
        format!("{} > $1", quote_ident(&boundary.column))
    }

    /// SQL text with the boundary as placeholder `$1`
    pub fn sql(&self) -> String {
        self.render(&self.select_list(), Self::placeholder)
    }

    /// Like [`Query::sql`] with `projection` as the select list
    ///
    /// Projection entries are SQL expressions and are not quoted.
    pub fn sql_projecting(&self, projection: &[String]) -> String {
        self.render(&projection.join(", "), Self::placeholder)
    }

    /// Values for the placeholders of [`Query::sql`], in order
    pub fn params(&self) -> Vec<&str> {
        self.boundary
            .iter()
            .map(|boundary| boundary.value.as_str())
            .collect()
    }
}

/// Log form with the boundary shown as a quoted literal
impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&self.select_list(), |boundary| {
            format!("{} > {}", boundary.column, quote_literal(&boundary.value))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_select_all() {
        let query = build(&TableConfig::full("orders"), None);
        assert_eq!(query.sql(), "SELECT * FROM orders");
        assert!(query.params().is_empty());
    }

    #[test]
    fn test_full_ignores_watermark() {
        let query = build(&TableConfig::full("orders"), Some("2024-01-01"));
        assert_eq!(query.sql(), "SELECT * FROM orders");
        assert_eq!(query.boundary(), None);
    }

    #[test]
    fn test_columns_are_quoted() {
        let table = TableConfig::full("sales.orders").with_columns(["id", "Order", "we\"ird"]);
        assert_eq!(
            build(&table, None).sql(),
            r#"SELECT "id", "Order", "we""ird" FROM sales.orders"#
        );
    }

    #[test]
    fn test_incremental_first_run_has_no_boundary() {
        let query = build(&TableConfig::incremental("orders", "updated_at"), None);
        assert_eq!(query.sql(), "SELECT * FROM orders");
        assert_eq!(query.to_string(), "SELECT * FROM orders");
    }

    #[test]
    fn test_incremental_binds_watermark() {
        let table = TableConfig::incremental("orders", "updated_at");
        let query = build(&table, Some("2024-01-15T10:00:00"));

        assert_eq!(query.sql(), r#"SELECT * FROM orders WHERE "updated_at" > $1"#);
        assert_eq!(query.params(), vec!["2024-01-15T10:00:00"]);
        assert_eq!(
            query.to_string(),
            "SELECT * FROM orders WHERE updated_at > '2024-01-15T10:00:00'"
        );
    }

    #[test]
    fn test_mixed_case_incremental_column_is_quoted() {
        let table = TableConfig::incremental("orders", "UpdatedAt").with_columns(["id", "UpdatedAt"]);
        let query = build(&table, Some("2024-01-15T10:00:00"));

        assert_eq!(
            query.sql(),
            r#"SELECT "id", "UpdatedAt" FROM orders WHERE "UpdatedAt" > $1"#
        );
        assert_eq!(
            query.sql_projecting(&[r#""id""#.to_string(), r#""UpdatedAt"::text AS "UpdatedAt""#.to_string()]),
            r#"SELECT "id", "UpdatedAt"::text AS "UpdatedAt" FROM orders WHERE "UpdatedAt" > $1"#
        );
    }

    #[test]
    fn test_hostile_watermark_stays_out_of_sql() {
        let table = TableConfig::incremental("orders", "updated_at");
        let query = build(&table, Some("x'; DROP TABLE orders; --"));

        assert!(!query.sql().contains("DROP"));
        assert_eq!(
            query.to_string(),
            "SELECT * FROM orders WHERE updated_at > 'x''; DROP TABLE orders; --'"
        );
    }
}
