//! SQL Server adapter.
//!
//! Catalog, DDL and promotion statements go through tiberius on a
//! current-thread tokio runtime; the bulk paths shell out to `bcp`, which is
//! dramatically faster than cursor fetches for wide tables. The final
//! summary of a successful bcp run is parsed to recover the row count; a
//! non-zero exit surfaces the tool's stderr verbatim.

use super::{
    build_export_select, Adapter, ImportOutcome, LimitStyle, QuoteStyle, SelectStyle,
};
use crate::catalog::{qualified, Column, LogicalType};
use crate::config::{ConnectionConfig, Dialect};
use crate::error::{LoadError, Result};
use crate::runlog::LogRecord;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::Command;
use tiberius::{AuthMethod, ColumnType, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

const SELECT_STYLE: SelectStyle = SelectStyle {
    quote: QuoteStyle::Brackets,
    limit: LimitStyle::Top,
    from_hint: Some("WITH (NOLOCK)"),
};

/// bcp batch size for imports.
const BCP_BATCH_SIZE: &str = "-b100000";

pub struct SqlserverAdapter {
    runtime: tokio::runtime::Runtime,
    client: tiberius::Client<Compat<TcpStream>>,
    name: String,
    server: String,
    database: String,
    user: Option<String>,
    password: Option<String>,
    trusted_connection: bool,
    codepage: String,
    as_columnstore: bool,
    read_only: bool,
    limit_rows: Option<u64>,
    table_where_clause: Option<String>,
    parallel_loads: usize,
    batch_size: u64,
}

impl SqlserverAdapter {
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let creds = &config.credentials;
        let host = creds.host.clone().ok_or_else(|| {
            LoadError::Config(format!("connection '{}': sqlserver needs a 'host'", config.name))
        })?;
        let database = creds.database.clone().ok_or_else(|| {
            LoadError::Config(format!(
                "connection '{}': sqlserver needs a 'database'",
                config.name
            ))
        })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LoadError::Connect {
                connection: config.name.clone(),
                detail: e.to_string(),
            })?;

        let mut tds = Config::new();
        tds.host(&host);
        if let Some(port) = creds.port {
            tds.port(port);
        }
        tds.database(&database);
        tds.authentication(AuthMethod::sql_server(
            creds.user.clone().unwrap_or_default(),
            creds.password.clone().unwrap_or_default(),
        ));
        tds.trust_cert();

        let client = runtime
            .block_on(async move {
                let tcp = TcpStream::connect(tds.get_addr())
                    .await
                    .map_err(|e| e.to_string())?;
                tcp.set_nodelay(true).map_err(|e| e.to_string())?;
                tiberius::Client::connect(tds, tcp.compat_write())
                    .await
                    .map_err(|e| e.to_string())
            })
            .map_err(|detail| LoadError::Connect {
                connection: config.name.clone(),
                detail,
            })?;
        debug!(connection = %config.name, server = %host, "connected to sqlserver");

        let server = match creds.port {
            Some(port) => format!("{},{}", host, port),
            None => host,
        };

        Ok(Self {
            runtime,
            client,
            name: config.name.clone(),
            server,
            database,
            user: creds.user.clone(),
            password: creds.password.clone(),
            trusted_connection: creds.trusted_connection.unwrap_or(false),
            codepage: creds.codepage().to_string(),
            as_columnstore: creds.as_columnstore.unwrap_or(false),
            read_only: config.read_only,
            limit_rows: creds.limit_rows,
            table_where_clause: creds.table_where_clause.clone(),
            parallel_loads: creds.parallel_loads(),
            batch_size: creds.batch_size(),
        })
    }

    fn query_rows(&mut self, sql: &str) -> Result<Vec<tiberius::Row>> {
        debug!(sql, "sqlserver query");
        let runtime = &self.runtime;
        let client = &mut self.client;
        runtime
            .block_on(async move {
                let stream = client.query(sql, &[]).await?;
                stream.into_first_result().await
            })
            .map_err(|e| LoadError::Catalog(format!("{}: {}", sql, e)))
    }

    fn exec(&mut self, sql: &str) -> Result<u64> {
        debug!(sql, "sqlserver execute");
        let runtime = &self.runtime;
        let client = &mut self.client;
        runtime
            .block_on(async move { client.execute(sql, &[]).await })
            .map(|r| r.total())
            .map_err(|e| LoadError::Catalog(format!("{}: {}", sql, e)))
    }

    fn bcp_auth_args(&self) -> Vec<String> {
        if self.trusted_connection {
            vec!["-T".to_string()]
        } else {
            vec![
                format!("-U{}", self.user.as_deref().unwrap_or_default()),
                format!("-P{}", self.password.as_deref().unwrap_or_default()),
            ]
        }
    }

    fn run_bcp(&self, args: &[String]) -> std::result::Result<String, String> {
        debug!(?args, "running bcp");
        let output = Command::new("bcp")
            .args(args)
            .output()
            .map_err(|e| format!("could not run bcp: {}", e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!("bcp exited with {}: {}{}", output.status, stdout, stderr))
        }
    }
}

impl Adapter for SqlserverAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlserver
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
        let rows = self.query_rows("SELECT schema_name FROM information_schema.schemata")?;
        Ok(rows
            .iter()
            .filter_map(|r| r.try_get::<&str, _>(0).ok().flatten())
            .map(|s| s.to_string())
            .collect())
    }

    fn tables(&mut self) -> Result<Vec<String>> {
        let rows = self
            .query_rows("SELECT table_schema + '.' + table_name FROM information_schema.tables")?;
        Ok(rows
            .iter()
            .filter_map(|r| r.try_get::<&str, _>(0).ok().flatten())
            .map(|s| s.to_string())
            .collect())
    }

    fn table_exists(&mut self, qualified_name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema + '.' + table_name = '{}'",
            sql_escape(qualified_name)
        );
        Ok(!self.query_rows(&sql)?.is_empty())
    }

    fn table_columns(&mut self, schema: &str, table: &str) -> Result<Vec<Column>> {
        let sql = format!(
            "SELECT column_name, data_type, character_maximum_length, \
             numeric_precision, numeric_scale \
             FROM information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' \
             ORDER BY ordinal_position",
            sql_escape(schema),
            sql_escape(table)
        );
        let rows = self.query_rows(&sql)?;
        if rows.is_empty() {
            return Err(LoadError::Catalog(format!(
                "no columns found for {}",
                qualified(schema, table)
            )));
        }

        let mut columns = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let name = row
                .try_get::<&str, _>(0)
                .map_err(|e| LoadError::Catalog(e.to_string()))?
                .unwrap_or_default()
                .to_string();
            let data_type = row
                .try_get::<&str, _>(1)
                .map_err(|e| LoadError::Catalog(e.to_string()))?
                .unwrap_or_default()
                .to_string();
            let char_max_len = row.try_get::<i32, _>(2).ok().flatten().map(i64::from);
            let precision = row.try_get::<u8, _>(3).ok().flatten().map(i64::from);
            let scale = row.try_get::<i32, _>(4).ok().flatten().map(i64::from);

            let mut column = Column::new(i as u32 + 1, name, catalog_type_to_logical(&data_type));
            column.char_max_len = char_max_len;
            if column.ty == LogicalType::Decimal {
                column.num_precision = precision;
                column.num_scale = scale;
            }
            columns.push(column);
        }
        Ok(columns)
    }

    fn query_columns(&mut self, sql: &str) -> Result<Vec<Column>> {
        let probe = format!("SELECT TOP 1 * FROM ({}) q", sql);
        let runtime = &self.runtime;
        let client = &mut self.client;
        let metadata: Vec<(String, ColumnType)> = runtime
            .block_on(async move {
                let mut stream = client.query(probe.as_str(), &[]).await?;
                let columns = stream
                    .columns()
                    .await?
                    .map(|cols| {
                        cols.iter()
                            .map(|c| (c.name().to_string(), c.column_type()))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok::<_, tiberius::error::Error>(columns)
            })
            .map_err(|e| LoadError::Catalog(format!("could not infer query columns: {}", e)))?;

        if metadata.is_empty() {
            return Err(LoadError::Catalog("query produced no columns".to_string()));
        }
        Ok(metadata
            .into_iter()
            .enumerate()
            .map(|(i, (name, ty))| Column::new(i as u32 + 1, name, wire_type_to_logical(ty)))
            .collect())
    }

    /// Strings wider than 4000 and LOB/binary columns exceed what bcp moves
    /// reliably in character mode; they are dropped from the projection.
    fn remove_unsupported_columns(&self, columns: Vec<Column>) -> Vec<Column> {
        drop_unsupported(columns)
    }

    fn export_sql(
        &self,
        columns: &[Column],
        schema: &str,
        table: &str,
        replication: Option<(&str, &str)>,
        partition_where: Option<&str>,
    ) -> String {
        let from = format!("[{}].[{}].[{}]", self.database, schema, table);
        build_export_select(
            &SELECT_STYLE,
            columns,
            &from,
            replication,
            self.table_where_clause.as_deref(),
            partition_where,
            self.limit_rows,
        )
    }

    fn export_query(&mut self, sql: &str, file_path: &Path, delimiter: u8) -> Result<u64> {
        let mut args = vec![
            sql.to_string(),
            "queryout".to_string(),
            file_path.to_string_lossy().to_string(),
            format!("-t{}", delimiter as char),
            "-c".to_string(),
            format!("-C{}", self.codepage),
            format!("-S{}", self.server),
        ];
        args.extend(self.bcp_auth_args());

        let output = self.run_bcp(&args).map_err(LoadError::Export)?;
        parse_bcp_row_count(&output).ok_or_else(|| {
            LoadError::Export(format!("could not parse bcp summary: {}", output.trim()))
        })
    }

    fn import_file(
        &mut self,
        schema: &str,
        table: &str,
        file_path: &Path,
        delimiter: u8,
    ) -> Result<ImportOutcome> {
        self.ensure_writable()?;
        let mut args = vec![
            format!("[{}].[{}].[{}]", self.database, schema, table),
            "in".to_string(),
            file_path.to_string_lossy().to_string(),
            format!("-t{}", delimiter as char),
            "-c".to_string(),
            format!("-C{}", self.codepage),
            BCP_BATCH_SIZE.to_string(),
            format!("-S{}", self.server),
        ];
        args.extend(self.bcp_auth_args());

        let output = self.run_bcp(&args).map_err(LoadError::Import)?;
        let rows = parse_bcp_row_count(&output).ok_or_else(|| {
            LoadError::Import(format!("could not parse bcp summary: {}", output.trim()))
        })?;

        let sent = count_lines(file_path).map_err(LoadError::Stage)?;
        if rows == 0 && sent > 0 {
            return Err(LoadError::Import(format!(
                "bcp loaded 0 of {} rows into {}",
                sent,
                qualified(schema, table)
            )));
        }
        Ok(ImportOutcome {
            rows,
            skipped: sent.saturating_sub(rows),
        })
    }

    fn create_schema(&mut self, schema: &str) -> Result<()> {
        self.ensure_writable()?;
        if self.schemas()?.iter().any(|s| s.eq_ignore_ascii_case(schema)) {
            return Ok(());
        }
        self.exec(&format!("CREATE SCHEMA {}", schema))?;
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
        let schema_table = qualified(schema, table);
        if self.table_exists(&schema_table)? {
            self.exec(&format!("DROP TABLE {}", schema_table))?;
        }

        let column_defs: Vec<String> = columns
            .iter()
            .map(|c| format!("[{}] {}", c.name, column_to_native_type(c)))
            .collect();
        self.exec(&format!(
            "CREATE TABLE {} ({})",
            schema_table,
            column_defs.join(", ")
        ))?;

        if self.as_columnstore {
            let index_name = format!("{}_{}_cci", schema, table);
            self.exec(&format!(
                "DROP INDEX IF EXISTS {} ON {}",
                index_name, schema_table
            ))?;
            self.exec(&format!(
                "CREATE CLUSTERED COLUMNSTORE INDEX {} ON {}",
                index_name, schema_table
            ))?;
        }
        Ok(())
    }

    fn truncate_table(&mut self, qualified_name: &str) -> Result<()> {
        self.ensure_writable()?;
        self.exec(&format!("TRUNCATE TABLE {}", qualified_name))?;
        Ok(())
    }

    fn drop_table(&mut self, qualified_name: &str) -> Result<()> {
        self.ensure_writable()?;
        self.exec(&format!("DROP TABLE IF EXISTS {}", qualified_name))?;
        Ok(())
    }

    fn rename_table(&mut self, schema: &str, from: &str, to: &str) -> Result<()> {
        self.ensure_writable()?;
        self.exec(&format!(
            "EXEC sp_rename '{}', '{}'",
            qualified(schema, from),
            to
        ))?;
        Ok(())
    }

    fn insert_from_and_drop(&mut self, schema: &str, to: &str, from: &str) -> Result<()> {
        self.ensure_writable()?;
        let to_table = qualified(schema, to);
        let from_table = qualified(schema, from);
        self.exec(&format!(
            "INSERT INTO {} SELECT * FROM {}",
            to_table, from_table
        ))
        .map_err(|e| LoadError::Promote(e.to_string()))?;
        self.exec(&format!("DROP TABLE {}", from_table))
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
        let columns = self.table_columns(schema, to)?;
        let names: Vec<String> = columns.into_iter().map(|c| c.name).collect();
        let merge = build_merge_sql(schema, to, from, &names, primary_key);
        debug!(sql = %merge, "sqlserver merge");
        self.exec(&merge).map_err(|e| LoadError::Promote(e.to_string()))?;
        self.exec(&format!("DROP TABLE {}", qualified(schema, from)))
            .map_err(|e| LoadError::Promote(e.to_string()))?;
        Ok(())
    }

    fn max_column_value(&mut self, qualified_name: &str, column: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT CONVERT(VARCHAR(32), MAX([{}]), 121) FROM {}",
            column, qualified_name
        );
        let rows = self.query_rows(&sql)?;
        let value = rows
            .first()
            .and_then(|r| r.try_get::<&str, _>(0).ok().flatten())
            .map(trim_datetime_fraction);
        Ok(value)
    }

    fn min_max_batch(
        &mut self,
        qualified_name: &str,
        column: &str,
    ) -> Result<Option<(i64, i64, i64)>> {
        let sql = format!(
            "SELECT CAST(MIN([{col}]) AS BIGINT), CAST(MAX([{col}]) AS BIGINT), \
             CAST(CEILING((MAX([{col}]) - MIN([{col}])) / (COUNT(*) / {batch}.0)) AS BIGINT) \
             FROM {table}",
            col = column,
            batch = self.batch_size,
            table = qualified_name
        );
        let rows = self.query_rows(&sql)?;
        let row = match rows.first() {
            Some(row) => row,
            None => return Ok(None),
        };
        let get = |i: usize| row.try_get::<i64, _>(i).ok().flatten();
        match (get(0), get(1), get(2)) {
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
        self.exec(&format!(
            "CREATE TABLE {} (\n\
             log_time datetime2(6),\n\
             project varchar(128),\n\
             project_started_at datetime2(6),\n\
             source_table varchar(128),\n\
             target_table varchar(128),\n\
             started_at datetime2(6),\n\
             ended_at datetime2(6),\n\
             status varchar(16),\n\
             exported_rows bigint,\n\
             imported_rows bigint)",
            full_table
        ))?;
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
        self.exec(&sql)?;
        Ok(())
    }
}

/// `(\d+) rows copied.` from the tool's final summary.
fn parse_bcp_row_count(output: &str) -> Option<u64> {
    static ROWS_COPIED: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?m)^\s*(\d+) rows copied").unwrap());
    ROWS_COPIED
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Datetime renderings keep at most millisecond precision so they stay safe
/// as SQL literals across dialects.
fn trim_datetime_fraction(value: &str) -> String {
    static FRACTION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3})\d+$").unwrap()
    });
    match FRACTION.captures(value) {
        Some(caps) => caps[1].to_string(),
        None => value.to_string(),
    }
}

fn count_lines(path: &Path) -> std::io::Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = 0;
    for line in reader.split(b'\n') {
        line?;
        lines += 1;
    }
    Ok(lines)
}

fn build_merge_sql(
    schema: &str,
    to: &str,
    from: &str,
    columns: &[String],
    primary_key: &[String],
) -> String {
    let to_table = qualified(schema, to);
    let from_table = qualified(schema, from);

    let on: Vec<String> = primary_key
        .iter()
        .map(|k| format!("t.[{}] = s.[{}]", k, k))
        .collect();

    let non_key: Vec<&String> = columns
        .iter()
        .filter(|c| !primary_key.iter().any(|k| k.eq_ignore_ascii_case(c)))
        .collect();
    let update_clause = if non_key.is_empty() {
        String::new()
    } else {
        let sets: Vec<String> = non_key
            .iter()
            .map(|c| format!("t.[{}] = s.[{}]", c, c))
            .collect();
        format!("WHEN MATCHED THEN UPDATE SET {} ", sets.join(", "))
    };

    let insert_cols: Vec<String> = columns.iter().map(|c| format!("[{}]", c)).collect();
    let insert_vals: Vec<String> = columns.iter().map(|c| format!("s.[{}]", c)).collect();

    format!(
        "MERGE {to_table} t USING {from_table} s ON {on} \
         {update}WHEN NOT MATCHED BY TARGET THEN INSERT ({cols}) VALUES ({vals});",
        to_table = to_table,
        from_table = from_table,
        on = on.join(" AND "),
        update = update_clause,
        cols = insert_cols.join(", "),
        vals = insert_vals.join(", ")
    )
}

fn drop_unsupported(columns: Vec<Column>) -> Vec<Column> {
    columns
        .into_iter()
        .filter(|c| match c.ty {
            LogicalType::Bytes => false,
            LogicalType::String => !matches!(c.char_max_len, Some(n) if n > 4000),
            _ => true,
        })
        .collect()
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
        Some(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.3f")),
        None => "NULL".to_string(),
    }
}

fn number_lit(value: Option<u64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "NULL".to_string(),
    }
}

fn catalog_type_to_logical(data_type: &str) -> LogicalType {
    match data_type.to_lowercase().as_str() {
        "tinyint" | "smallint" | "int" | "bigint" => LogicalType::Integer,
        "float" | "real" => LogicalType::Float,
        "decimal" | "numeric" | "money" | "smallmoney" => LogicalType::Decimal,
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => LogicalType::Bytes,
        "date" => LogicalType::Date,
        "time" => LogicalType::Time,
        "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" => LogicalType::Datetime,
        "bit" => LogicalType::Bool,
        "uniqueidentifier" => LogicalType::Uuid,
        _ => LogicalType::String,
    }
}

fn wire_type_to_logical(ty: ColumnType) -> LogicalType {
    match ty {
        ColumnType::Int1
        | ColumnType::Int2
        | ColumnType::Int4
        | ColumnType::Int8
        | ColumnType::Intn => LogicalType::Integer,
        ColumnType::Float4 | ColumnType::Float8 | ColumnType::Floatn => LogicalType::Float,
        ColumnType::Decimaln | ColumnType::Numericn | ColumnType::Money
        | ColumnType::Money4 => LogicalType::Decimal,
        ColumnType::Bit | ColumnType::Bitn => LogicalType::Bool,
        ColumnType::Guid => LogicalType::Uuid,
        ColumnType::Daten => LogicalType::Date,
        ColumnType::Timen => LogicalType::Time,
        ColumnType::Datetime
        | ColumnType::Datetime4
        | ColumnType::Datetimen
        | ColumnType::Datetime2
        | ColumnType::DatetimeOffsetn => LogicalType::Datetime,
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => LogicalType::Bytes,
        _ => LogicalType::String,
    }
}

fn column_to_native_type(column: &Column) -> String {
    match column.ty {
        LogicalType::Integer => "bigint".to_string(),
        LogicalType::Float => "float".to_string(),
        LogicalType::Decimal => match (column.num_precision, column.num_scale) {
            (Some(p), Some(s)) => format!("numeric({},{})", p, s),
            _ => "numeric(38,9)".to_string(),
        },
        LogicalType::String => match column.char_max_len {
            Some(n) if n > 0 && n <= 4000 => format!("nvarchar({})", n),
            _ => "nvarchar(MAX)".to_string(),
        },
        LogicalType::Bytes => "varbinary(MAX)".to_string(),
        LogicalType::Datetime => "datetime2".to_string(),
        LogicalType::Date => "date".to_string(),
        LogicalType::Time => "time".to_string(),
        LogicalType::Bool => "bit".to_string(),
        LogicalType::Uuid => "uniqueidentifier".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BCP_EXPORT_OUTPUT: &str = "\
Starting copy...

1000000 rows copied.
Network packet size (bytes): 4096
Clock Time (ms.) Total     : 4985   Average : (200602.81 rows per sec.)
";

    #[test]
    fn bcp_summary_row_count_is_parsed() {
        assert_eq!(parse_bcp_row_count(BCP_EXPORT_OUTPUT), Some(1_000_000));
        assert_eq!(parse_bcp_row_count("3 rows copied.\n"), Some(3));
        assert_eq!(parse_bcp_row_count("garbage"), None);
    }

    #[test]
    fn datetime_fraction_is_trimmed_to_millis() {
        assert_eq!(
            trim_datetime_fraction("2019-10-03 13:00:00.1234567"),
            "2019-10-03 13:00:00.123"
        );
        assert_eq!(
            trim_datetime_fraction("2019-10-03 13:00:00.123"),
            "2019-10-03 13:00:00.123"
        );
        assert_eq!(trim_datetime_fraction("42"), "42");
    }

    #[test]
    fn merge_updates_non_key_columns_and_inserts_all() {
        let columns = vec!["id".to_string(), "name".to_string(), "ts".to_string()];
        let sql = build_merge_sql("tgt", "t1", "t1_tmp", &columns, &["id".to_string()]);

        assert!(sql.starts_with("MERGE tgt.t1 t USING tgt.t1_tmp s ON t.[id] = s.[id]"));
        assert!(sql.contains("UPDATE SET t.[name] = s.[name], t.[ts] = s.[ts]"));
        assert!(sql.contains("INSERT ([id], [name], [ts]) VALUES (s.[id], s.[name], s.[ts])"));
    }

    #[test]
    fn merge_with_only_key_columns_skips_update() {
        let columns = vec!["id".to_string()];
        let sql = build_merge_sql("tgt", "t1", "t1_tmp", &columns, &["id".to_string()]);
        assert!(!sql.contains("WHEN MATCHED"));
        assert!(sql.contains("WHEN NOT MATCHED BY TARGET"));
    }

    #[test]
    fn unsupported_columns_are_dropped() {
        let columns = vec![
            Column::new(1, "id", LogicalType::Integer),
            Column::new(2, "blob_col", LogicalType::Bytes),
            Column::new(3, "wide", LogicalType::String).with_char_max_len(8000),
            Column::new(4, "name", LogicalType::String).with_char_max_len(64),
        ];
        let kept = drop_unsupported(columns);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].name, "name");
    }

    #[test]
    fn native_ddl_caps_nvarchar_at_4000() {
        let wide = Column::new(1, "wide", LogicalType::String).with_char_max_len(4001);
        assert_eq!(column_to_native_type(&wide), "nvarchar(MAX)");
        let narrow = Column::new(1, "narrow", LogicalType::String).with_char_max_len(128);
        assert_eq!(column_to_native_type(&narrow), "nvarchar(128)");
    }
}
