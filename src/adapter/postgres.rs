//! PostgreSQL adapter.
//!
//! Bulk transfer rides the server-side COPY protocol in both directions:
//! `COPY (<select>) TO STDOUT` streamed into the stage file on export, `COPY
//! <table> FROM STDIN` streamed out of it on import. Text format with
//! `NULL ''` matches the stage encoding (empty field = NULL) and its
//! backslash escaping keeps embedded delimiters round-trippable within
//! Postgres.

use super::{
    build_export_select, Adapter, ImportOutcome, LimitStyle, QuoteStyle, SelectStyle,
};
use crate::catalog::{qualified, Column, LogicalType};
use crate::config::{ConnectionConfig, Dialect};
use crate::error::{LoadError, Result};
use crate::runlog::LogRecord;
use postgres::types::Type;
use postgres::{Client, NoTls};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

const SELECT_STYLE: SelectStyle = SelectStyle {
    quote: QuoteStyle::None,
    limit: LimitStyle::FetchFirst,
    from_hint: None,
};

pub struct PostgresAdapter {
    client: Client,
    name: String,
    database: String,
    read_only: bool,
    limit_rows: Option<u64>,
    table_where_clause: Option<String>,
    parallel_loads: usize,
    batch_size: u64,
}

impl PostgresAdapter {
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let creds = &config.credentials;
        let database = creds.database.clone().ok_or_else(|| {
            LoadError::Config(format!("connection '{}': postgres needs a 'database'", config.name))
        })?;

        let mut params = format!(
            "host={} dbname={}",
            creds.host.as_deref().unwrap_or("localhost"),
            database
        );
        if let Some(port) = creds.port {
            params.push_str(&format!(" port={}", port));
        }
        if let Some(user) = &creds.user {
            params.push_str(&format!(" user={}", user));
        }
        if let Some(password) = &creds.password {
            params.push_str(&format!(" password={}", password));
        }

        let client = Client::connect(&params, NoTls).map_err(|e| LoadError::Connect {
            connection: config.name.clone(),
            detail: e.to_string(),
        })?;
        debug!(connection = %config.name, "connected to postgres");

        Ok(Self {
            client,
            name: config.name.clone(),
            database,
            read_only: config.read_only,
            limit_rows: creds.limit_rows,
            table_where_clause: creds.table_where_clause.clone(),
            parallel_loads: creds.parallel_loads(),
            batch_size: creds.batch_size(),
        })
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!(sql, "postgres execute");
        self.client
            .execute(sql, &[])
            .map_err(|e| LoadError::Catalog(format!("{}: {}", sql, e)))
    }
}

impl Adapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
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

    fn parallel_workers(&self) -> usize {
        self.parallel_loads
    }

    fn schemas(&mut self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query("SELECT schema_name FROM information_schema.schemata", &[])
            .map_err(|e| LoadError::Catalog(e.to_string()))?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    fn tables(&mut self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT table_schema || '.' || table_name FROM information_schema.tables",
                &[],
            )
            .map_err(|e| LoadError::Catalog(e.to_string()))?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    fn table_exists(&mut self, qualified_name: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema || '.' || table_name = $1)",
                &[&qualified_name.to_lowercase()],
            )
            .map_err(|e| LoadError::Catalog(e.to_string()))?;
        Ok(row.get(0))
    }

    fn table_columns(&mut self, schema: &str, table: &str) -> Result<Vec<Column>> {
        let rows = self
            .client
            .query(
                "SELECT column_name, data_type, character_maximum_length, \
                 numeric_precision, numeric_scale \
                 FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 \
                 ORDER BY ordinal_position",
                &[&schema.to_lowercase(), &table.to_lowercase()],
            )
            .map_err(|e| LoadError::Catalog(e.to_string()))?;
        if rows.is_empty() {
            return Err(LoadError::Catalog(format!(
                "no columns found for {}",
                qualified(schema, table)
            )));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let char_max_len: Option<i32> = row.get(2);
            let precision: Option<i32> = row.get(3);
            let scale: Option<i32> = row.get(4);

            let mut column = Column::new(i as u32 + 1, name, catalog_type_to_logical(&data_type));
            column.char_max_len = char_max_len.map(i64::from);
            if column.ty == LogicalType::Decimal {
                column.num_precision = precision.map(i64::from);
                column.num_scale = scale.map(i64::from);
            }
            columns.push(column);
        }
        Ok(columns)
    }

    fn query_columns(&mut self, sql: &str) -> Result<Vec<Column>> {
        let probe = format!("SELECT * FROM ({}) q LIMIT 1", sql);
        let stmt = self
            .client
            .prepare(&probe)
            .map_err(|e| LoadError::Catalog(format!("could not infer query columns: {}", e)))?;

        let columns: Vec<Column> = stmt
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| Column::new(i as u32 + 1, c.name(), pg_type_to_logical(c.type_())))
            .collect();
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

    fn export_query(&mut self, sql: &str, file_path: &Path, delimiter: u8) -> Result<u64> {
        let copy_sql = format!(
            "COPY ({}) TO STDOUT WITH (FORMAT text, DELIMITER '{}', NULL '')",
            sql, delimiter as char
        );
        debug!(sql = %copy_sql, file = %file_path.display(), "postgres export");

        let mut reader = self
            .client
            .copy_out(&copy_sql)
            .map_err(|e| LoadError::Export(format!("{}: {}", sql, e)))?;
        let mut writer = BufWriter::with_capacity(
            crate::stage::WRITER_BUFFER_SIZE,
            File::create(file_path).map_err(LoadError::Stage)?,
        );

        let mut rows: u64 = 0;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| LoadError::Export(e.to_string()))?;
            if n == 0 {
                break;
            }
            rows += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
            writer.write_all(&buf[..n]).map_err(LoadError::Stage)?;
        }
        writer.flush().map_err(LoadError::Stage)?;
        Ok(rows)
    }

    fn import_file(
        &mut self,
        schema: &str,
        table: &str,
        file_path: &Path,
        delimiter: u8,
    ) -> Result<ImportOutcome> {
        self.ensure_writable()?;
        let copy_sql = format!(
            "COPY {} FROM STDIN WITH (FORMAT text, DELIMITER '{}', NULL '')",
            qualified(schema, table),
            delimiter as char
        );
        debug!(sql = %copy_sql, file = %file_path.display(), "postgres import");

        let mut writer = self
            .client
            .copy_in(&copy_sql)
            .map_err(|e| LoadError::Import(e.to_string()))?;
        let mut reader = BufReader::with_capacity(
            crate::stage::WRITER_BUFFER_SIZE,
            File::open(file_path).map_err(LoadError::Stage)?,
        );
        std::io::copy(&mut reader, &mut writer)
            .map_err(|e| LoadError::Import(format!("{}: {}", file_path.display(), e)))?;
        let rows = writer
            .finish()
            .map_err(|e| LoadError::Import(format!("{}: {}", file_path.display(), e)))?;
        Ok(ImportOutcome { rows, skipped: 0 })
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
        self.execute(&format!(
            "CREATE TABLE {} ({})",
            qualified(schema, table),
            column_defs.join(", ")
        ))?;
        Ok(())
    }

    fn truncate_table(&mut self, qualified_name: &str) -> Result<()> {
        self.ensure_writable()?;
        self.execute(&format!("TRUNCATE TABLE {}", qualified_name))?;
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
        let batch = format!(
            "BEGIN; \
             DELETE FROM {to_table} USING {from_table} WHERE {on}; \
             INSERT INTO {to_table} SELECT * FROM {from_table}; \
             DROP TABLE {from_table}; \
             COMMIT;",
            to_table = to_table,
            from_table = from_table,
            on = on.join(" AND ")
        );
        debug!(sql = %batch, "postgres merge");
        self.client
            .batch_execute(&batch)
            .map_err(|e| LoadError::Promote(e.to_string()))?;
        Ok(())
    }

    fn max_column_value(&mut self, qualified_name: &str, column: &str) -> Result<Option<String>> {
        let sql = format!("SELECT MAX({})::text FROM {}", column, qualified_name);
        let row = self
            .client
            .query_one(&sql, &[])
            .map_err(|e| LoadError::Catalog(format!("{}: {}", sql, e)))?;
        Ok(row.get(0))
    }

    fn min_max_batch(
        &mut self,
        qualified_name: &str,
        column: &str,
    ) -> Result<Option<(i64, i64, i64)>> {
        let sql = format!(
            "SELECT MIN({col})::bigint, MAX({col})::bigint, \
             CEIL((MAX({col}) - MIN({col})) / (COUNT(*) / {batch}::float))::bigint \
             FROM {table}",
            col = column,
            batch = self.batch_size,
            table = qualified_name
        );
        let row = self
            .client
            .query_one(&sql, &[])
            .map_err(|e| LoadError::Catalog(format!("{}: {}", sql, e)))?;
        let lo: Option<i64> = row.get(0);
        let hi: Option<i64> = row.get(1);
        let stride: Option<i64> = row.get(2);
        match (lo, hi, stride) {
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
             log_time timestamp,\n\
             project varchar(128),\n\
             project_started_at timestamp,\n\
             source_table varchar(128),\n\
             target_table varchar(128),\n\
             started_at timestamp,\n\
             ended_at timestamp,\n\
             status varchar(16),\n\
             exported_rows bigint,\n\
             imported_rows bigint)",
            full_table
        ))?;

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
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            qualified(schema, table)
        );
        self.client
            .execute(
                &sql,
                &[
                    &record.log_time,
                    &record.project,
                    &record.project_started_at,
                    &record.source_table,
                    &record.target_table,
                    &record.started_at,
                    &record.ended_at,
                    &record.status.as_str(),
                    &record.exported_rows.map(|v| v as i64),
                    &record.imported_rows.map(|v| v as i64),
                ],
            )
            .map_err(|e| LoadError::Catalog(format!("run log insert: {}", e)))?;
        Ok(())
    }
}

/// `information_schema.columns.data_type` uses SQL-standard names.
fn catalog_type_to_logical(data_type: &str) -> LogicalType {
    match data_type.to_lowercase().as_str() {
        "smallint" | "integer" | "bigint" => LogicalType::Integer,
        "real" | "double precision" => LogicalType::Float,
        "numeric" | "decimal" | "money" => LogicalType::Decimal,
        "bytea" => LogicalType::Bytes,
        "date" => LogicalType::Date,
        "time without time zone" | "time with time zone" => LogicalType::Time,
        "timestamp without time zone" | "timestamp with time zone" => LogicalType::Datetime,
        "boolean" => LogicalType::Bool,
        "uuid" => LogicalType::Uuid,
        _ => LogicalType::String,
    }
}

/// Wire types from a prepared statement, for ad-hoc query projections.
fn pg_type_to_logical(ty: &Type) -> LogicalType {
    if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
        LogicalType::Integer
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        LogicalType::Float
    } else if *ty == Type::NUMERIC {
        LogicalType::Decimal
    } else if *ty == Type::BYTEA {
        LogicalType::Bytes
    } else if *ty == Type::DATE {
        LogicalType::Date
    } else if *ty == Type::TIME || *ty == Type::TIMETZ {
        LogicalType::Time
    } else if *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ {
        LogicalType::Datetime
    } else if *ty == Type::BOOL {
        LogicalType::Bool
    } else if *ty == Type::UUID {
        LogicalType::Uuid
    } else {
        LogicalType::String
    }
}

/// Logical column back to Postgres DDL.
fn column_to_native_type(column: &Column) -> String {
    match column.ty {
        LogicalType::Integer => "bigint".to_string(),
        LogicalType::Float => "double precision".to_string(),
        LogicalType::Decimal => match (column.num_precision, column.num_scale) {
            (Some(p), Some(s)) => format!("numeric({},{})", p, s),
            _ => "numeric".to_string(),
        },
        LogicalType::String => match column.char_max_len {
            Some(n) if n > 0 => format!("varchar({})", n),
            _ => "text".to_string(),
        },
        LogicalType::Bytes => "bytea".to_string(),
        LogicalType::Datetime => "timestamp".to_string(),
        LogicalType::Date => "date".to_string(),
        LogicalType::Time => "time".to_string(),
        LogicalType::Bool => "boolean".to_string(),
        LogicalType::Uuid => "uuid".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_types_map_to_logical() {
        assert_eq!(catalog_type_to_logical("integer"), LogicalType::Integer);
        assert_eq!(catalog_type_to_logical("character varying"), LogicalType::String);
        assert_eq!(
            catalog_type_to_logical("timestamp without time zone"),
            LogicalType::Datetime
        );
        assert_eq!(catalog_type_to_logical("numeric"), LogicalType::Decimal);
        assert_eq!(catalog_type_to_logical("bytea"), LogicalType::Bytes);
        assert_eq!(catalog_type_to_logical("uuid"), LogicalType::Uuid);
    }

    #[test]
    fn ddl_preserves_lengths_and_precision() {
        let name = Column::new(2, "name_col", LogicalType::String).with_char_max_len(64);
        assert_eq!(column_to_native_type(&name), "varchar(64)");

        let unbounded = Column::new(3, "body", LogicalType::String).with_char_max_len(-1);
        assert_eq!(column_to_native_type(&unbounded), "text");

        let amount = Column::new(4, "amount", LogicalType::Decimal).with_numeric(10, 2);
        assert_eq!(column_to_native_type(&amount), "numeric(10,2)");
    }

    #[test]
    fn wire_types_map_to_logical() {
        assert_eq!(pg_type_to_logical(&Type::INT8), LogicalType::Integer);
        assert_eq!(pg_type_to_logical(&Type::VARCHAR), LogicalType::String);
        assert_eq!(pg_type_to_logical(&Type::TIMESTAMP), LogicalType::Datetime);
        assert_eq!(pg_type_to_logical(&Type::JSONB), LogicalType::String);
    }
}
