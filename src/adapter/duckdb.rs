//! Embedded DuckDB adapter.
//!
//! DuckDB is bundled and compiled in, which makes it the zero-setup dialect:
//! the integration suite replicates between DuckDB database files, and local
//! file-to-file replication works without any server. DuckDB holds a single
//! writer lock per database file, so this adapter reports one parallel
//! worker and the schedulers fall back to sequential partition processing on
//! the job's own connection.

use super::{
    build_export_select, Adapter, ImportOutcome, LimitStyle, QuoteStyle, SelectStyle,
};
use crate::catalog::{qualified, Column, LogicalType};
use crate::config::{ConnectionConfig, Dialect};
use crate::error::{LoadError, Result};
use crate::runlog::LogRecord;
use crate::stage;
use chrono::NaiveDateTime;
use duckdb::types::ValueRef;
use duckdb::Connection;
use std::path::Path;
use tracing::debug;

const SELECT_STYLE: SelectStyle = SelectStyle {
    quote: QuoteStyle::None,
    limit: LimitStyle::Limit,
    from_hint: None,
};

pub struct DuckdbAdapter {
    conn: Connection,
    name: String,
    database: String,
    read_only: bool,
    limit_rows: Option<u64>,
    table_where_clause: Option<String>,
    batch_size: u64,
}

impl DuckdbAdapter {
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let path = config.credentials.path.clone().ok_or_else(|| {
            LoadError::Config(format!("connection '{}': duckdb needs a 'path'", config.name))
        })?;

        let conn = if path == ":memory:" || path == "memory" {
            Connection::open_in_memory()
        } else {
            Connection::open(&path)
        }
        .map_err(|e| LoadError::Connect {
            connection: config.name.clone(),
            detail: e.to_string(),
        })?;
        debug!(connection = %config.name, %path, "connected to duckdb");

        let database = Path::new(&path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("memory")
            .to_string();

        Ok(Self {
            conn,
            name: config.name.clone(),
            database,
            read_only: config.read_only,
            limit_rows: config.credentials.limit_rows,
            table_where_clause: config.credentials.table_where_clause.clone(),
            batch_size: config.credentials.batch_size(),
        })
    }

    fn execute(&self, sql: &str) -> Result<usize> {
        debug!(sql, "duckdb execute");
        self.conn
            .execute(sql, [])
            .map_err(|e| LoadError::Catalog(format!("{}: {}", sql, e)))
    }

    fn query_strings(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| LoadError::Catalog(format!("{}: {}", sql, e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| LoadError::Catalog(format!("{}: {}", sql, e)))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| LoadError::Catalog(e.to_string()))?
        {
            let count = row.as_ref().column_count();
            let mut fields = Vec::with_capacity(count);
            for i in 0..count {
                let value = row
                    .get_ref(i)
                    .map_err(|e| LoadError::Catalog(e.to_string()))?;
                fields.push(render_value(value));
            }
            out.push(fields);
        }
        Ok(out)
    }
}

impl Adapter for DuckdbAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Duckdb
    }

    fn connection_name(&self) -> &str {
        &self.name
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    /// DuckDB database files take a single writer; partitions are processed
    /// sequentially on the job connection.
    fn parallel_workers(&self) -> usize {
        1
    }

    fn schemas(&mut self) -> Result<Vec<String>> {
        let rows =
            self.query_strings("SELECT schema_name FROM information_schema.schemata")?;
        Ok(rows.into_iter().flat_map(|r| r.into_iter().flatten()).collect())
    }

    fn tables(&mut self) -> Result<Vec<String>> {
        let rows = self.query_strings(
            "SELECT table_schema || '.' || table_name FROM information_schema.tables",
        )?;
        Ok(rows.into_iter().flat_map(|r| r.into_iter().flatten()).collect())
    }

    fn table_exists(&mut self, qualified_name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT count(*) FROM information_schema.tables \
             WHERE lower(table_schema || '.' || table_name) = lower('{}')",
            sql_escape(qualified_name)
        );
        let rows = self.query_strings(&sql)?;
        Ok(rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_deref())
            .map(|v| v != "0")
            .unwrap_or(false))
    }

    fn table_columns(&mut self, schema: &str, table: &str) -> Result<Vec<Column>> {
        let sql = format!(
            "SELECT column_name, data_type, character_maximum_length, \
             numeric_precision, numeric_scale \
             FROM information_schema.columns \
             WHERE lower(table_schema) = lower('{}') AND lower(table_name) = lower('{}') \
             ORDER BY ordinal_position",
            sql_escape(schema),
            sql_escape(table)
        );
        let rows = self.query_strings(&sql)?;
        if rows.is_empty() {
            return Err(LoadError::Catalog(format!(
                "no columns found for {}",
                qualified(schema, table)
            )));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let name = row[0].clone().unwrap_or_default();
            let ty = row[1].as_deref().unwrap_or("");
            let mut column = native_type_to_column(i as u32 + 1, &name, ty);
            if column.char_max_len.is_none() {
                column.char_max_len = row[2].as_deref().and_then(|v| v.parse().ok());
            }
            if column.num_precision.is_none() {
                column.num_precision = row[3].as_deref().and_then(|v| v.parse().ok());
                column.num_scale = row[4].as_deref().and_then(|v| v.parse().ok());
            }
            columns.push(column);
        }
        Ok(columns)
    }

    fn query_columns(&mut self, sql: &str) -> Result<Vec<Column>> {
        let describe = format!("DESCRIBE SELECT * FROM ({}) q", sql);
        let rows = self.query_strings(&describe)?;
        let mut columns = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let name = row[0].clone().unwrap_or_default();
            let ty = row[1].as_deref().unwrap_or("");
            columns.push(native_type_to_column(i as u32 + 1, &name, ty));
        }
        if columns.is_empty() {
            return Err(LoadError::Catalog("query produced no columns".to_string()));
        }
        Ok(columns)
    }

    fn export_sql(
        &self,
        columns: &[Column],
        schema: &str,
        table: &str,
        replication: Option<(&str, &str)>,
        partition_where: Option<&str>,
    ) -> String {
        build_export_select(
            &SELECT_STYLE,
            columns,
            &qualified(schema, table),
            replication,
            self.table_where_clause.as_deref(),
            partition_where,
            self.limit_rows,
        )
    }

    /// Cursor export: fetch through a prepared statement and render values
    /// per logical type into the stage writer.
    fn export_query(&mut self, sql: &str, file_path: &Path, delimiter: u8) -> Result<u64> {
        debug!(sql, file = %file_path.display(), "duckdb export");
        let mut writer = stage::open_row_writer(file_path, delimiter).map_err(LoadError::Stage)?;

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| LoadError::Export(format!("{}: {}", sql, e)))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| LoadError::Export(format!("{}: {}", sql, e)))?;

        let mut fields: Vec<Option<String>> = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| LoadError::Export(e.to_string()))?
        {
            let count = row.as_ref().column_count();
            fields.clear();
            for i in 0..count {
                let value = row
                    .get_ref(i)
                    .map_err(|e| LoadError::Export(e.to_string()))?;
                fields.push(render_value(value));
            }
            writer.write_row(&fields).map_err(LoadError::Stage)?;
        }
        writer.finish().map_err(LoadError::Stage)
    }

    fn import_file(
        &mut self,
        schema: &str,
        table: &str,
        file_path: &Path,
        delimiter: u8,
    ) -> Result<ImportOutcome> {
        self.ensure_writable()?;
        let sql = format!(
            "COPY {} FROM '{}' (FORMAT CSV, DELIMITER '{}', HEADER FALSE, \
             QUOTE '', NULL '')",
            qualified(schema, table),
            file_path.display(),
            delimiter as char
        );
        debug!(sql, "duckdb import");
        let rows = self
            .conn
            .execute(&sql, [])
            .map_err(|e| LoadError::Import(format!("{}: {}", file_path.display(), e)))?;
        Ok(ImportOutcome {
            rows: rows as u64,
            skipped: 0,
        })
    }

    fn create_schema(&mut self, schema: &str) -> Result<()> {
        self.ensure_writable()?;
        self.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))?;
        Ok(())
    }

    fn create_table_from_columns(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[Column],
    ) -> Result<()> {
        self.ensure_writable()?;
        self.create_schema(schema)?;
        self.execute(&format!("DROP TABLE IF EXISTS {}", qualified(schema, table)))?;

        let column_defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", c.name, column_to_native_type(c)))
            .collect();
        let ddl = format!(
            "CREATE TABLE {} ({})",
            qualified(schema, table),
            column_defs.join(", ")
        );
        self.execute(&ddl)?;
        Ok(())
    }

    fn truncate_table(&mut self, qualified_name: &str) -> Result<()> {
        self.ensure_writable()?;
        // DuckDB has no TRUNCATE statement; an unfiltered DELETE has the
        // same postcondition.
        self.execute(&format!("DELETE FROM {}", qualified_name))?;
        Ok(())
    }

    fn drop_table(&mut self, qualified_name: &str) -> Result<()> {
        self.ensure_writable()?;
        self.execute(&format!("DROP TABLE IF EXISTS {}", qualified_name))?;
        Ok(())
    }

    fn rename_table(&mut self, schema: &str, from: &str, to: &str) -> Result<()> {
        self.ensure_writable()?;
        self.execute(&format!(
            "ALTER TABLE {} RENAME TO {}",
            qualified(schema, from),
            to
        ))?;
        Ok(())
    }

    fn insert_from_and_drop(&mut self, schema: &str, to: &str, from: &str) -> Result<()> {
        self.ensure_writable()?;
        let to_table = qualified(schema, to);
        let from_table = qualified(schema, from);
        self.execute(&format!(
            "INSERT INTO {} SELECT * FROM {}",
            to_table, from_table
        ))
        .map_err(|e| LoadError::Promote(e.to_string()))?;
        self.execute(&format!("DROP TABLE {}", from_table))
            .map_err(|e| LoadError::Promote(e.to_string()))?;
        Ok(())
    }

    fn merge_from_and_drop(
        &mut self,
        schema: &str,
        to: &str,
        from: &str,
        primary_key: &[String],
    ) -> Result<()> {
        self.ensure_writable()?;
        let to_table = qualified(schema, to);
        let from_table = qualified(schema, from);

        let on: Vec<String> = primary_key
            .iter()
            .map(|k| format!("{}.{} = {}.{}", to, k, from, k))
            .collect();
        let merge = format!(
            "BEGIN; DELETE FROM {} USING {} WHERE {}; \
             INSERT INTO {} SELECT * FROM {}; COMMIT;",
            to_table,
            from_table,
            on.join(" AND "),
            to_table,
            from_table
        );
        debug!(sql = %merge, "duckdb merge");
        self.conn
            .execute_batch(&merge)
            .map_err(|e| LoadError::Promote(e.to_string()))?;
        self.execute(&format!("DROP TABLE {}", from_table))
            .map_err(|e| LoadError::Promote(e.to_string()))?;
        Ok(())
    }

    fn max_column_value(&mut self, qualified_name: &str, column: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT CAST(MAX({}) AS VARCHAR) FROM {}",
            column, qualified_name
        );
        let rows = self.query_strings(&sql)?;
        Ok(rows.into_iter().next().and_then(|r| r.into_iter().next()).flatten())
    }

    fn min_max_batch(
        &mut self,
        qualified_name: &str,
        column: &str,
    ) -> Result<Option<(i64, i64, i64)>> {
        let sql = format!(
            "SELECT CAST(MIN({col}) AS BIGINT), CAST(MAX({col}) AS BIGINT), \
             CAST(CEIL((MAX({col}) - MIN({col})) / (COUNT(*) / {batch}.0)) AS BIGINT) \
             FROM {table}",
            col = column,
            batch = self.batch_size,
            table = qualified_name
        );
        let rows = self.query_strings(&sql)?;
        let row = match rows.into_iter().next() {
            Some(row) => row,
            None => return Ok(None),
        };
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.parse::<i64>().ok());
        match (parse(&row[0]), parse(&row[1]), parse(&row[2])) {
            (Some(lo), Some(hi), Some(stride)) => Ok(Some((lo, hi, stride))),
            _ => Ok(None),
        }
    }

    fn create_log_table(&mut self, schema: &str, table: &str) -> Result<()> {
        self.ensure_writable()?;
        let full_table = qualified(schema, table);
        if self.table_exists(&full_table)? {
            return Ok(());
        }
        self.create_schema(schema)?;
        self.execute(&format!(
            "CREATE TABLE {} (\n\
             log_time TIMESTAMP,\n\
             project VARCHAR(128),\n\
             project_started_at TIMESTAMP,\n\
             source_table VARCHAR(128),\n\
             target_table VARCHAR(128),\n\
             started_at TIMESTAMP,\n\
             ended_at TIMESTAMP,\n\
             status VARCHAR(16),\n\
             exported_rows BIGINT,\n\
             imported_rows BIGINT)",
            full_table
        ))?;

        // Convenience views; losing them is not worth failing the run.
        let summary = format!(
            "CREATE OR REPLACE VIEW {full}_summary AS \
             SELECT project, project_started_at, \
             sum(CASE WHEN source_table IS NOT NULL AND status = 'DONE' THEN 1 ELSE 0 END) AS completed_loads, \
             max(ended_at) AS ended_at, \
             sum(exported_rows) AS exported_rows, \
             sum(imported_rows) AS imported_rows \
             FROM {full} GROUP BY project, project_started_at",
            full = full_table
        );
        let details = format!(
            "CREATE OR REPLACE VIEW {full}_details AS \
             SELECT project, project_started_at, source_table, target_table, \
             started_at, ended_at, status, exported_rows, imported_rows \
             FROM {full} WHERE source_table IS NOT NULL",
            full = full_table
        );
        for view in [summary, details] {
            if let Err(e) = self.execute(&view) {
                debug!(error = %e, "could not create run-log view");
            }
        }
        Ok(())
    }

    fn write_log(&mut self, schema: &str, table: &str, record: &LogRecord) -> Result<()> {
        self.ensure_writable()?;
        let sql = format!(
            "INSERT INTO {} (log_time, project, project_started_at, source_table, \
             target_table, started_at, ended_at, status, exported_rows, imported_rows) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            qualified(schema, table),
            timestamp_lit(Some(record.log_time)),
            string_lit(Some(&record.project)),
            timestamp_lit(Some(record.project_started_at)),
            string_lit(record.source_table.as_deref()),
            string_lit(record.target_table.as_deref()),
            timestamp_lit(record.started_at),
            timestamp_lit(record.ended_at),
            string_lit(Some(record.status.as_str())),
            number_lit(record.exported_rows),
            number_lit(record.imported_rows),
        );
        self.execute(&sql)?;
        Ok(())
    }
}

fn sql_escape(raw: &str) -> String {
    raw.replace('\'', "''")
}

fn string_lit(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("'{}'", sql_escape(v)),
        None => "NULL".to_string(),
    }
}

fn timestamp_lit(value: Option<NaiveDateTime>) -> String {
    match value {
        Some(v) => format!("TIMESTAMP '{}'", v.format("%Y-%m-%d %H:%M:%S%.6f")),
        None => "NULL".to_string(),
    }
}

fn number_lit(value: Option<u64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "NULL".to_string(),
    }
}

/// Map a DuckDB type string (as reported by DESCRIBE or the catalog) onto
/// the logical set.
fn native_type_to_column(ordinal: u32, name: &str, native: &str) -> Column {
    let upper = native.to_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim().to_string();
    let params: Vec<i64> = upper
        .split('(')
        .nth(1)
        .map(|p| {
            p.trim_end_matches(')')
                .split(',')
                .filter_map(|v| v.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    match base.as_str() {
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "HUGEINT" | "UTINYINT"
        | "USMALLINT" | "UINTEGER" | "UBIGINT" => {
            Column::new(ordinal, name, LogicalType::Integer)
        }
        "FLOAT" | "REAL" | "DOUBLE" => Column::new(ordinal, name, LogicalType::Float),
        "DECIMAL" | "NUMERIC" => {
            let mut c = Column::new(ordinal, name, LogicalType::Decimal);
            if params.len() == 2 {
                c = c.with_numeric(params[0], params[1]);
            }
            c
        }
        "VARCHAR" | "TEXT" | "CHAR" | "BPCHAR" | "JSON" => {
            let mut c = Column::new(ordinal, name, LogicalType::String);
            if let Some(&len) = params.first() {
                c = c.with_char_max_len(len);
            }
            c
        }
        "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" => {
            Column::new(ordinal, name, LogicalType::Bytes)
        }
        "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => {
            Column::new(ordinal, name, LogicalType::Datetime)
        }
        "DATE" => Column::new(ordinal, name, LogicalType::Date),
        "TIME" | "TIME WITH TIME ZONE" => Column::new(ordinal, name, LogicalType::Time),
        "BOOLEAN" | "BOOL" => Column::new(ordinal, name, LogicalType::Bool),
        "UUID" => Column::new(ordinal, name, LogicalType::Uuid),
        _ => Column::new(ordinal, name, LogicalType::String),
    }
}

/// Map a logical column back to DuckDB DDL.
fn column_to_native_type(column: &Column) -> String {
    match column.ty {
        LogicalType::Integer => "BIGINT".to_string(),
        LogicalType::Float => "DOUBLE".to_string(),
        LogicalType::Decimal => match (column.num_precision, column.num_scale) {
            (Some(p), Some(s)) => format!("DECIMAL({},{})", p, s),
            _ => "DECIMAL(18,3)".to_string(),
        },
        LogicalType::String => match column.char_max_len {
            Some(n) if n > 0 => format!("VARCHAR({})", n),
            _ => "VARCHAR".to_string(),
        },
        LogicalType::Bytes => "BLOB".to_string(),
        LogicalType::Datetime => "TIMESTAMP".to_string(),
        LogicalType::Date => "DATE".to_string(),
        LogicalType::Time => "TIME".to_string(),
        LogicalType::Bool => "BOOLEAN".to_string(),
        LogicalType::Uuid => "UUID".to_string(),
    }
}

/// Render one fetched value as a stage field. NULL becomes `None`, never a
/// literal string.
fn render_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Boolean(b) => Some(b.to_string()),
        ValueRef::TinyInt(n) => Some(n.to_string()),
        ValueRef::SmallInt(n) => Some(n.to_string()),
        ValueRef::Int(n) => Some(n.to_string()),
        ValueRef::BigInt(n) => Some(n.to_string()),
        ValueRef::HugeInt(n) => Some(n.to_string()),
        ValueRef::UTinyInt(n) => Some(n.to_string()),
        ValueRef::USmallInt(n) => Some(n.to_string()),
        ValueRef::UInt(n) => Some(n.to_string()),
        ValueRef::UBigInt(n) => Some(n.to_string()),
        ValueRef::Float(f) => Some(f.to_string()),
        ValueRef::Double(f) => Some(f.to_string()),
        ValueRef::Decimal(d) => Some(d.to_string()),
        ValueRef::Text(s) => Some(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => {
            let mut hex = String::with_capacity(b.len() * 2 + 2);
            hex.push_str("\\x");
            for byte in b {
                hex.push_str(&format!("{:02x}", byte));
            }
            Some(hex)
        }
        // DuckDB reports timestamps in microseconds since the epoch.
        ValueRef::Timestamp(_, ts) => {
            let secs = ts.div_euclid(1_000_000);
            let micros = ts.rem_euclid(1_000_000);
            let nanos = (micros * 1000) as u32;
            chrono::DateTime::from_timestamp(secs, nanos).map(|dt| {
                if micros == 0 {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
                }
            })
        }
        // Days since 1970-01-01; 719163 days from 0001-01-01 to the epoch.
        ValueRef::Date32(days) => chrono::NaiveDate::from_num_days_from_ce_opt(719_163 + days)
            .map(|date| date.format("%Y-%m-%d").to_string()),
        ValueRef::Time64(_, micros) => {
            let secs = (micros / 1_000_000) as u32;
            let nanos = ((micros % 1_000_000) * 1000) as u32;
            chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
                .map(|time| time.format("%H:%M:%S").to_string())
        }
        other => Some(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    fn file_config(dir: &Path, file: &str) -> ConnectionConfig {
        ConnectionConfig {
            name: "test_duck".to_string(),
            dialect: Dialect::Duckdb,
            read_only: false,
            credentials: Credentials {
                path: Some(dir.join(file).to_string_lossy().to_string()),
                ..Default::default()
            },
        }
    }

    fn seeded_adapter(dir: &Path) -> DuckdbAdapter {
        let mut db = DuckdbAdapter::connect(&file_config(dir, "src.duckdb")).unwrap();
        db.conn
            .execute_batch(
                "CREATE SCHEMA test;
                 CREATE TABLE test.test1 (
                     id_col BIGINT,
                     name_col VARCHAR(64),
                     datetime_col TIMESTAMP
                 );
                 INSERT INTO test.test1 VALUES
                     (1, 'First', '2019-10-01 11:00:00'),
                     (2, 'Second', '2019-10-02 12:00:00'),
                     (3, 'Third', '2019-10-03 13:00:00');",
            )
            .unwrap();
        db
    }

    #[test]
    fn schemas_and_tables_are_listed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        assert!(db.schemas().unwrap().contains(&"test".to_string()));
        assert!(db.tables().unwrap().contains(&"test.test1".to_string()));
    }

    #[test]
    fn table_exists_checks_qualified_name() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        assert!(db.table_exists("test.test1").unwrap());
        assert!(!db.table_exists("test.nope").unwrap());
    }

    #[test]
    fn table_columns_map_to_logical_types() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        let columns = db.table_columns("test", "test1").unwrap();

        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].ordinal, 1);
        assert_eq!(columns[0].name, "id_col");
        assert_eq!(columns[0].ty, LogicalType::Integer);
        assert_eq!(columns[1].ty, LogicalType::String);
        assert_eq!(columns[2].ty, LogicalType::Datetime);
    }

    #[test]
    fn query_columns_infer_from_projection() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        let columns = db
            .query_columns("SELECT id_col, name_col FROM test.test1")
            .unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].ty, LogicalType::String);
    }

    #[test]
    fn max_column_value_renders_text() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        assert_eq!(
            db.max_column_value("test.test1", "id_col").unwrap(),
            Some("3".to_string())
        );
        assert_eq!(
            db.max_column_value("test.test1", "datetime_col").unwrap(),
            Some("2019-10-03 13:00:00".to_string())
        );
    }

    #[test]
    fn max_column_value_of_empty_table_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        db.execute("CREATE TABLE test.empty (id BIGINT)").unwrap();
        assert_eq!(db.max_column_value("test.empty", "id").unwrap(), None);
    }

    #[test]
    fn min_max_batch_computes_stride() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        db.execute("CREATE TABLE test.wide AS SELECT range AS id FROM range(1, 1001)")
            .unwrap();
        db.batch_size = 250;

        let (lo, hi, stride) = db.min_max_batch("test.wide", "id").unwrap().unwrap();
        assert_eq!(lo, 1);
        assert_eq!(hi, 1000);
        assert_eq!(stride, 250);
    }

    #[test]
    fn export_then_import_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        let columns = db.table_columns("test", "test1").unwrap();

        let sql = db.export_sql(&columns, "test", "test1", None, None);
        let file = tmp.path().join("out.csv");
        let exported = db.export_query(&sql, &file, b'|').unwrap();
        assert_eq!(exported, 3);

        db.create_table_from_columns("test_tgt", "test1_tmp", &columns)
            .unwrap();
        let outcome = db.import_file("test_tgt", "test1_tmp", &file, b'|').unwrap();
        assert_eq!(outcome.rows, 3);

        let rows = db
            .query_strings("SELECT count(*) FROM test_tgt.test1_tmp")
            .unwrap();
        assert_eq!(rows[0][0].as_deref(), Some("3"));
    }

    #[test]
    fn export_renders_null_as_empty_field() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        db.execute("INSERT INTO test.test1 VALUES (4, NULL, NULL)")
            .unwrap();
        let columns = db.table_columns("test", "test1").unwrap();

        let sql = db.export_sql(&columns, "test", "test1", None, None);
        let file = tmp.path().join("out.csv");
        db.export_query(&sql, &file, b'|').unwrap();

        let content = std::fs::read_to_string(&file).unwrap();
        assert!(content.contains("4||\n"));
        assert!(!content.contains("None"));
        assert!(!content.contains("NULL"));
    }

    #[test]
    fn switch_tables_promotes_shadow_and_drops_leftover() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        db.execute("CREATE TABLE test.live AS SELECT 1 AS id")
            .unwrap();
        db.execute("CREATE TABLE test.live_tmp AS SELECT 2 AS id")
            .unwrap();

        db.switch_tables("test", "live", "live_tmp").unwrap();

        assert!(db.table_exists("test.live").unwrap());
        assert!(!db.table_exists("test.live_tmp").unwrap());
        assert!(!db.table_exists("test.live_delete").unwrap());
        let rows = db.query_strings("SELECT id FROM test.live").unwrap();
        assert_eq!(rows[0][0].as_deref(), Some("2"));
    }

    #[test]
    fn switch_tables_without_live_just_renames() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        db.execute("CREATE TABLE test.fresh_tmp AS SELECT 9 AS id")
            .unwrap();

        db.switch_tables("test", "fresh", "fresh_tmp").unwrap();
        assert!(db.table_exists("test.fresh").unwrap());
    }

    #[test]
    fn merge_updates_matches_and_inserts_new_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        db.conn
            .execute_batch(
                "CREATE TABLE test.target (id BIGINT, name VARCHAR);
                 INSERT INTO test.target VALUES (1, 'A'), (2, 'B');
                 CREATE TABLE test.target_tmp (id BIGINT, name VARCHAR);
                 INSERT INTO test.target_tmp VALUES (2, 'B2'), (3, 'C');",
            )
            .unwrap();

        db.merge_from_and_drop("test", "target", "target_tmp", &["id".to_string()])
            .unwrap();

        let rows = db
            .query_strings("SELECT id, name FROM test.target ORDER BY id")
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][1].as_deref(), Some("B2"));
        assert_eq!(rows[2][1].as_deref(), Some("C"));
        assert!(!db.table_exists("test.target_tmp").unwrap());
    }

    #[test]
    fn read_only_refuses_mutation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = file_config(tmp.path(), "ro.duckdb");
        config.read_only = true;
        let mut db = DuckdbAdapter::connect(&config).unwrap();

        let err = db.drop_table("test.anything").unwrap_err();
        assert!(matches!(err, LoadError::ReadOnly(_)));
        assert!(err.is_fatal_to_project());
    }

    #[test]
    fn log_table_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut db = seeded_adapter(tmp.path());
        db.create_log_table("etl", "run_log").unwrap();
        // Second call is a no-op.
        db.create_log_table("etl", "run_log").unwrap();

        let t0 = chrono::Local::now().naive_local();
        db.write_log("etl", "run_log", &LogRecord::project_start("demo", t0))
            .unwrap();
        db.write_log(
            "etl",
            "run_log",
            &LogRecord::job(
                "demo",
                t0,
                "test.test1",
                "tgt.test1",
                t0,
                t0,
                crate::runlog::LoadStatus::Done,
                3,
                3,
            ),
        )
        .unwrap();

        let rows = db
            .query_strings("SELECT status, exported_rows FROM etl.run_log ORDER BY log_time")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0].as_deref(), Some("START"));
        assert_eq!(rows[1][1].as_deref(), Some("3"));
    }
}
