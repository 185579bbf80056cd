//! The per-dialect driver contract.
//!
//! Every source and target hides behind [`Adapter`]: the minimum capability
//! set the engine needs, plus the bulk-transfer paths that unlock fast
//! loads. One adapter instance serves one connection in one job; partition
//! workers call [`connect`] to obtain their own instances.

mod duckdb;
mod postgres;
mod sqlserver;

pub use duckdb::DuckdbAdapter;
pub use postgres::PostgresAdapter;
pub use sqlserver::SqlserverAdapter;

use crate::catalog::{qualified, Column};
use crate::config::{ConnectionConfig, Dialect};
use crate::error::{LoadError, Result};
use crate::runlog::LogRecord;
use std::path::Path;

/// Result of one bulk load. `skipped > 0` with `rows > 0` degrades the job
/// to WARN instead of failing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOutcome {
    pub rows: u64,
    pub skipped: u64,
}

/// Open an adapter for the given connection.
pub fn connect(config: &ConnectionConfig) -> Result<Box<dyn Adapter>> {
    match config.dialect {
        Dialect::Postgres => Ok(Box::new(PostgresAdapter::connect(config)?)),
        Dialect::Sqlserver => Ok(Box::new(SqlserverAdapter::connect(config)?)),
        Dialect::Duckdb => Ok(Box::new(DuckdbAdapter::connect(config)?)),
    }
}

/// Capability set every dialect driver implements.
///
/// All operations may fail and surface typed [`LoadError`]s, never silent
/// results. Connections close on drop.
pub trait Adapter: Send {
    fn dialect(&self) -> Dialect;

    /// Connection name from the configuration, for error reporting.
    fn connection_name(&self) -> &str;

    /// Database the connection is bound to; used in stage file names.
    fn database(&self) -> &str;

    fn read_only(&self) -> bool;

    /// Concurrent partition workers this connection allows.
    fn parallel_workers(&self) -> usize;

    /// Refuse mutation on read-only connections before any SQL is issued.
    fn ensure_writable(&self) -> Result<()> {
        if self.read_only() {
            Err(LoadError::ReadOnly(self.connection_name().to_string()))
        } else {
            Ok(())
        }
    }

    fn schemas(&mut self) -> Result<Vec<String>>;

    /// All tables as `schema.table`.
    fn tables(&mut self) -> Result<Vec<String>>;

    fn table_exists(&mut self, qualified_name: &str) -> Result<bool>;

    /// Ordered columns of a table, mapped to the logical type set.
    fn table_columns(&mut self, schema: &str, table: &str) -> Result<Vec<Column>>;

    /// Columns inferred from an ad-hoc query via a one-row dry run.
    fn query_columns(&mut self, sql: &str) -> Result<Vec<Column>>;

    /// Drop columns this adapter cannot safely move in flight. The default
    /// keeps everything; adapters with bulk-tool limits override.
    fn remove_unsupported_columns(&self, columns: Vec<Column>) -> Vec<Column> {
        columns
    }

    /// Build the export SELECT: projected columns, combined WHERE from
    /// replication predicate + connection static clause + partition
    /// predicate (AND-joined), and the connection row limit if set.
    fn export_sql(
        &self,
        columns: &[Column],
        schema: &str,
        table: &str,
        replication: Option<(&str, &str)>,
        partition_where: Option<&str>,
    ) -> String;

    /// Run a query and write one delimited stage file. Returns rows written.
    fn export_query(&mut self, sql: &str, file_path: &Path, delimiter: u8) -> Result<u64>;

    /// Bulk load one stage file into an existing table.
    fn import_file(
        &mut self,
        schema: &str,
        table: &str,
        file_path: &Path,
        delimiter: u8,
    ) -> Result<ImportOutcome>;

    /// Idempotent.
    fn create_schema(&mut self, schema: &str) -> Result<()>;

    /// Drop the table if present, then create it from the logical columns,
    /// in ordinal order.
    fn create_table_from_columns(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[Column],
    ) -> Result<()>;

    fn truncate_table(&mut self, qualified_name: &str) -> Result<()>;

    fn drop_table(&mut self, qualified_name: &str) -> Result<()>;

    fn rename_table(&mut self, schema: &str, from: &str, to: &str) -> Result<()>;

    /// `INSERT INTO to SELECT * FROM from; DROP TABLE from;`
    fn insert_from_and_drop(&mut self, schema: &str, to: &str, from: &str) -> Result<()>;

    /// Merge by primary key (matched rows updated, new rows inserted), then
    /// drop `from`. Dialects may realize this as MERGE or DELETE+INSERT as
    /// long as the observable postcondition holds.
    fn merge_from_and_drop(
        &mut self,
        schema: &str,
        to: &str,
        from: &str,
        primary_key: &[String],
    ) -> Result<()>;

    /// Promote the shadow table: rename live aside, rename shadow in, drop
    /// the leftover. Readers may briefly observe the table missing.
    fn switch_tables(&mut self, schema: &str, live: &str, shadow: &str) -> Result<()> {
        self.ensure_writable()?;
        let run = |adapter: &mut Self| -> Result<()> {
            let delete_table = format!("{}_delete", live);
            if adapter.table_exists(&qualified(schema, live))? {
                adapter.rename_table(schema, live, &delete_table)?;
                adapter.rename_table(schema, shadow, live)?;
                adapter.drop_table(&qualified(schema, &delete_table))?;
            } else {
                adapter.rename_table(schema, shadow, live)?;
            }
            Ok(())
        };
        run(self).map_err(|e| LoadError::Promote(e.to_string()))
    }

    /// MAX of a column rendered as a SQL-literal-safe string. `None` when
    /// the table is empty.
    fn max_column_value(&mut self, qualified_name: &str, column: &str) -> Result<Option<String>>;

    /// `(min, max, stride)` for range partitioning over an integer column,
    /// with `stride = ceil((max - min) / (count / batch_size))`. `None` when
    /// the table has no rows or the key is entirely NULL.
    fn min_max_batch(&mut self, qualified_name: &str, column: &str)
        -> Result<Option<(i64, i64, i64)>>;

    /// Create the run-log table (and convenience views where the dialect
    /// supports them) if missing.
    fn create_log_table(&mut self, schema: &str, table: &str) -> Result<()>;

    /// Append one run-log row.
    fn write_log(&mut self, schema: &str, table: &str, record: &LogRecord) -> Result<()>;
}

/// Identifier quoting for [`build_export_select`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum QuoteStyle {
    /// Identifiers pass through unquoted.
    None,
    /// `[identifier]`
    Brackets,
}

/// Row-limit placement for [`build_export_select`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum LimitStyle {
    /// Trailing `FETCH FIRST n ROWS ONLY`
    FetchFirst,
    /// Trailing `LIMIT n`
    Limit,
    /// `SELECT TOP n ...`
    Top,
}

/// Dialect knobs for the shared SELECT builder.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SelectStyle {
    pub quote: QuoteStyle,
    pub limit: LimitStyle,
    /// Hint appended to the FROM clause, e.g. `WITH (NOLOCK)`.
    pub from_hint: Option<&'static str>,
}

impl SelectStyle {
    fn quote_ident(&self, ident: &str) -> String {
        match self.quote {
            QuoteStyle::None => ident.to_string(),
            QuoteStyle::Brackets => format!("[{}]", ident),
        }
    }
}

/// Shared export-SELECT generation: projection in ordinal order, up to three
/// optional predicates AND-joined, dialect-specific limit placement.
pub(crate) fn build_export_select(
    style: &SelectStyle,
    columns: &[Column],
    from: &str,
    replication: Option<(&str, &str)>,
    static_where: Option<&str>,
    partition_where: Option<&str>,
    limit_rows: Option<u64>,
) -> String {
    let mut stmt = String::from("SELECT ");
    if let (LimitStyle::Top, Some(n)) = (style.limit, limit_rows) {
        stmt.push_str(&format!("TOP {} ", n));
    }

    let projection: Vec<String> = columns
        .iter()
        .map(|c| style.quote_ident(&c.name))
        .collect();
    stmt.push_str(&projection.join(", "));

    stmt.push_str(" FROM ");
    stmt.push_str(from);
    if let Some(hint) = style.from_hint {
        stmt.push(' ');
        stmt.push_str(hint);
    }

    let replication_where = replication.map(|(key, max)| format!("{} > '{}'", key, max));
    let wheres: Vec<&str> = [
        replication_where.as_deref(),
        static_where,
        partition_where,
    ]
    .into_iter()
    .flatten()
    .collect();
    if !wheres.is_empty() {
        stmt.push_str(" WHERE ");
        stmt.push_str(&wheres.join(" AND "));
    }

    match (style.limit, limit_rows) {
        (LimitStyle::FetchFirst, Some(n)) => {
            stmt.push_str(&format!(" FETCH FIRST {} ROWS ONLY", n));
        }
        (LimitStyle::Limit, Some(n)) => {
            stmt.push_str(&format!(" LIMIT {}", n));
        }
        _ => {}
    }

    stmt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LogicalType;

    fn columns() -> Vec<Column> {
        vec![
            Column::new(1, "id", LogicalType::Integer),
            Column::new(2, "name", LogicalType::String),
            Column::new(3, "ts", LogicalType::Datetime),
        ]
    }

    const PLAIN: SelectStyle = SelectStyle {
        quote: QuoteStyle::None,
        limit: LimitStyle::FetchFirst,
        from_hint: None,
    };

    #[test]
    fn plain_select_projects_in_ordinal_order() {
        let sql = build_export_select(&PLAIN, &columns(), "test.t1", None, None, None, None);
        assert_eq!(sql, "SELECT id, name, ts FROM test.t1");
    }

    #[test]
    fn three_wheres_are_and_joined() {
        let sql = build_export_select(
            &PLAIN,
            &columns(),
            "test.t1",
            Some(("ts", "2019-10-03 13:00:00")),
            Some("name <> 'skip'"),
            Some("id between 1 and 250000"),
            None,
        );
        assert_eq!(
            sql,
            "SELECT id, name, ts FROM test.t1 WHERE ts > '2019-10-03 13:00:00' \
             AND name <> 'skip' AND id between 1 and 250000"
        );
    }

    #[test]
    fn fetch_first_limit_is_appended() {
        let sql = build_export_select(&PLAIN, &columns(), "test.t1", None, None, None, Some(100));
        assert!(sql.ends_with(" FETCH FIRST 100 ROWS ONLY"));
    }

    #[test]
    fn top_limit_leads_the_projection() {
        let style = SelectStyle {
            quote: QuoteStyle::Brackets,
            limit: LimitStyle::Top,
            from_hint: Some("WITH (NOLOCK)"),
        };
        let sql = build_export_select(
            &style,
            &columns(),
            "[appdb].[test].[t1]",
            None,
            None,
            Some("id between 1 and 10"),
            Some(50),
        );
        assert_eq!(
            sql,
            "SELECT TOP 50 [id], [name], [ts] FROM [appdb].[test].[t1] WITH (NOLOCK) \
             WHERE id between 1 and 10"
        );
    }

    #[test]
    fn single_where_has_no_and() {
        let sql = build_export_select(
            &PLAIN,
            &columns(),
            "test.t1",
            None,
            None,
            Some("id between 1 and 10"),
            None,
        );
        assert_eq!(sql, "SELECT id, name, ts FROM test.t1 WHERE id between 1 and 10");
    }
}
