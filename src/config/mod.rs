//! Project and connections configuration.
//!
//! Two YAML files drive a run: the project file (what to replicate, from
//! which connection to which) and the connections file (credential profiles
//! per connection name). The connections file defaults to
//! `~/.sqlferry/connections.yml`; the profile under `outputs` is chosen by
//! each connection's `target` key unless overridden on the command line.

use crate::catalog::LogicalType;
use crate::error::{LoadError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Sqlserver,
    Duckdb,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlserver => write!(f, "sqlserver"),
            Dialect::Duckdb => write!(f, "duckdb"),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlserver" | "mssql" => Ok(Dialect::Sqlserver),
            "duckdb" => Ok(Dialect::Duckdb),
            other => Err(format!(
                "unknown dialect: {}. Supported: postgres, sqlserver, duckdb",
                other
            )),
        }
    }
}

/// Credentials and per-connection tuning for one output profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    /// Database file path (duckdb).
    pub path: Option<String>,
    /// Cap on rows per generated SELECT.
    pub limit_rows: Option<u64>,
    /// Static predicate ANDed into every export from this source.
    pub table_where_clause: Option<String>,
    pub table_parallel_loads: Option<usize>,
    pub table_parallel_batch_size: Option<u64>,
    /// SQL Server: integrated auth for bcp and the driver.
    pub trusted_connection: Option<bool>,
    /// SQL Server: bcp -C codepage.
    pub codepage: Option<String>,
    /// SQL Server: clustered columnstore index after table create.
    pub as_columnstore: Option<bool>,
}

impl Credentials {
    pub fn parallel_loads(&self) -> usize {
        self.table_parallel_loads.unwrap_or(10)
    }

    pub fn batch_size(&self) -> u64 {
        self.table_parallel_batch_size.unwrap_or(1_000_000)
    }

    pub fn codepage(&self) -> &str {
        self.codepage.as_deref().unwrap_or("65001")
    }
}

/// Raw connections-file entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionEntry {
    #[serde(rename = "type")]
    pub dialect: Dialect,
    #[serde(default)]
    pub read_only: bool,
    pub target: String,
    pub outputs: HashMap<String, Credentials>,
}

/// A named connection with its target profile resolved.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub name: String,
    pub dialect: Dialect,
    pub read_only: bool,
    pub credentials: Credentials,
}

/// All resolved connections from a connections file.
#[derive(Debug, Clone)]
pub struct Connections {
    connections: HashMap<String, ConnectionConfig>,
}

impl Connections {
    /// Load and resolve a connections file. `target_override` replaces every
    /// connection's own `target` profile selection.
    pub fn load(path: Option<&Path>, target_override: Option<&str>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_connections_path(),
        };
        let content = fs::read_to_string(&path).map_err(|e| {
            LoadError::Config(format!("could not read {}: {}", path.display(), e))
        })?;
        let entries: HashMap<String, ConnectionEntry> = serde_yaml::from_str(&content)
            .map_err(|e| LoadError::Config(format!("{}: {}", path.display(), e)))?;

        let mut connections = HashMap::new();
        for (name, entry) in entries {
            let profile = target_override.unwrap_or(&entry.target);
            let credentials = entry.outputs.get(profile).cloned().ok_or_else(|| {
                LoadError::Config(format!(
                    "connection '{}' has no output profile '{}'",
                    name, profile
                ))
            })?;
            connections.insert(
                name.clone(),
                ConnectionConfig {
                    name,
                    dialect: entry.dialect,
                    read_only: entry.read_only,
                    credentials,
                },
            );
        }
        Ok(Self { connections })
    }

    pub fn from_map(connections: HashMap<String, ConnectionConfig>) -> Self {
        Self { connections }
    }

    pub fn get(&self, name: &str) -> Result<&ConnectionConfig> {
        self.connections
            .get(name)
            .ok_or_else(|| LoadError::Config(format!("unknown connection: {}", name)))
    }
}

fn default_connections_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sqlferry")
        .join("connections.yml")
}

/// How a table is replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    FullTable,
    Incremental,
    Upsert,
}

impl Default for ReplicationMethod {
    fn default() -> Self {
        ReplicationMethod::FullTable
    }
}

impl std::fmt::Display for ReplicationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationMethod::FullTable => write!(f, "FULL_TABLE"),
            ReplicationMethod::Incremental => write!(f, "INCREMENTAL"),
            ReplicationMethod::Upsert => write!(f, "UPSERT"),
        }
    }
}

/// One table to replicate.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub table_name: String,
    #[serde(default)]
    pub replication_method: ReplicationMethod,
    #[serde(default)]
    pub replication_key: Option<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub parallelization_key: Option<String>,
}

/// A source schema mapped onto a target schema.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaConfig {
    pub source_schema: String,
    pub target_schema: String,
    #[serde(default)]
    pub table_prefix: Option<String>,
    #[serde(default)]
    pub table_suffix: Option<String>,
    pub tables: Vec<TableConfig>,
}

/// One ad-hoc query to replicate.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub query_name: String,
    pub query: String,
    pub table_name: String,
    #[serde(default)]
    pub replication_method: ReplicationMethod,
    #[serde(default)]
    pub parallelization_key: Option<String>,
}

/// A group of queries landing in one target schema.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryGroup {
    pub target_schema: String,
    pub queries: Vec<QueryConfig>,
}

/// Raw project file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectFile {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub logdb: Option<String>,
    #[serde(default = "default_logschema")]
    pub logschema: String,
    #[serde(default = "default_logtable")]
    pub logtable: String,
    #[serde(default = "default_temp_path")]
    pub temp_path: String,
    #[serde(default)]
    pub keep_tempfiles: bool,
    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: String,
    #[serde(default = "default_parallel_loads")]
    pub parallel_loads: usize,
    /// Comma-separated logical types dropped from every source projection.
    #[serde(default)]
    pub source_columntypes_to_exclude: Option<String>,
    #[serde(default)]
    pub schemas: Vec<SchemaConfig>,
    #[serde(default)]
    pub queries: Vec<QueryGroup>,
}

fn default_logschema() -> String {
    "sqlferry".to_string()
}

fn default_logtable() -> String {
    "run_log".to_string()
}

fn default_temp_path() -> String {
    "temp".to_string()
}

fn default_csv_delimiter() -> String {
    "|".to_string()
}

fn default_parallel_loads() -> usize {
    1
}

/// A loaded project: the parsed file plus derived paths.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub file: ProjectFile,
    /// `<temp_path>/<project name>`, absolute.
    pub temp_root: PathBuf,
}

impl Project {
    /// Load `<name>.yml` or an explicit `.yml` path. The project name is the
    /// lowercased file stem.
    pub fn load(project: &str) -> Result<Self> {
        let path = if project.to_lowercase().ends_with(".yml") {
            PathBuf::from(project)
        } else {
            PathBuf::from(format!("{}.yml", project))
        };
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| LoadError::Config(format!("invalid project path: {}", project)))?
            .to_lowercase();

        let content = fs::read_to_string(&path).map_err(|e| {
            LoadError::Config(format!("could not read {}: {}", path.display(), e))
        })?;
        Self::parse(&name, &content)
    }

    pub fn parse(name: &str, yaml: &str) -> Result<Self> {
        let file: ProjectFile = serde_yaml::from_str(yaml)
            .map_err(|e| LoadError::Config(format!("project '{}': {}", name, e)))?;

        if file.csv_delimiter.len() != 1 || !file.csv_delimiter.is_ascii() {
            return Err(LoadError::Config(format!(
                "csv_delimiter must be a single ASCII character, got '{}'",
                file.csv_delimiter
            )));
        }

        let temp_root = PathBuf::from(&file.temp_path).join(name);
        let temp_root = if temp_root.is_absolute() {
            temp_root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&temp_root))
                .unwrap_or(temp_root)
        };

        Ok(Self {
            name: name.to_string(),
            file,
            temp_root,
        })
    }

    pub fn delimiter(&self) -> u8 {
        self.file.csv_delimiter.as_bytes()[0]
    }

    /// Logical types excluded from every source projection.
    pub fn excluded_types(&self) -> Result<Vec<LogicalType>> {
        let Some(raw) = &self.file.source_columntypes_to_exclude else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<LogicalType>()
                    .map_err(|e| LoadError::Config(format!("source_columntypes_to_exclude: {}", e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECT_YAML: &str = r#"
source: pg_prod
target: dw
logdb: dw
logschema: etl
parallel_loads: 4
csv_delimiter: "|"
source_columntypes_to_exclude: bytes, uuid
schemas:
  - source_schema: test
    target_schema: test_tgt
    table_suffix: _raw
    tables:
      - table_name: t1
        replication_method: INCREMENTAL
        replication_key: id
        parallelization_key: id
      - table_name: t2
queries:
  - target_schema: reports
    queries:
      - query_name: daily_totals
        query: select day, sum(amount) as amount from test.orders group by day
        table_name: totals
        replication_method: FULL_TABLE
"#;

    const CONNECTIONS_YAML: &str = r#"
pg_prod:
  type: postgres
  read_only: true
  target: prod
  outputs:
    prod:
      host: db.internal
      port: 5432
      user: replicator
      password: secret
      database: appdb
      table_parallel_loads: 8
dw:
  type: duckdb
  target: dev
  outputs:
    dev:
      path: /var/lib/dw/analytics.duckdb
    prod:
      path: /var/lib/dw/analytics_prod.duckdb
"#;

    #[test]
    fn project_parses_with_defaults() {
        let project = Project::parse("demo", PROJECT_YAML).unwrap();
        assert_eq!(project.file.source, "pg_prod");
        assert_eq!(project.file.logschema, "etl");
        assert_eq!(project.file.logtable, "run_log");
        assert_eq!(project.file.parallel_loads, 4);
        assert!(!project.file.keep_tempfiles);
        assert_eq!(project.delimiter(), b'|');
        assert!(project.temp_root.ends_with("temp/demo"));
    }

    #[test]
    fn project_tables_and_queries() {
        let project = Project::parse("demo", PROJECT_YAML).unwrap();
        let schema = &project.file.schemas[0];
        assert_eq!(schema.table_suffix.as_deref(), Some("_raw"));
        assert_eq!(schema.tables.len(), 2);
        assert_eq!(
            schema.tables[0].replication_method,
            ReplicationMethod::Incremental
        );
        assert_eq!(schema.tables[1].replication_method, ReplicationMethod::FullTable);
        assert_eq!(project.file.queries[0].queries[0].table_name, "totals");
    }

    #[test]
    fn excluded_types_parse() {
        let project = Project::parse("demo", PROJECT_YAML).unwrap();
        assert_eq!(
            project.excluded_types().unwrap(),
            vec![LogicalType::Bytes, LogicalType::Uuid]
        );
    }

    #[test]
    fn multi_char_delimiter_is_rejected() {
        let yaml = "source: a\ntarget: b\ncsv_delimiter: '||'\n";
        assert!(Project::parse("demo", yaml).is_err());
    }

    #[test]
    fn connections_resolve_target_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("connections.yml");
        std::fs::write(&path, CONNECTIONS_YAML).unwrap();

        let conns = Connections::load(Some(&path), None).unwrap();
        let pg = conns.get("pg_prod").unwrap();
        assert_eq!(pg.dialect, Dialect::Postgres);
        assert!(pg.read_only);
        assert_eq!(pg.credentials.parallel_loads(), 8);
        assert_eq!(pg.credentials.batch_size(), 1_000_000);

        let dw = conns.get("dw").unwrap();
        assert_eq!(dw.dialect, Dialect::Duckdb);
        assert!(dw.credentials.path.as_deref().unwrap().ends_with("analytics.duckdb"));
    }

    #[test]
    fn connections_target_override() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("connections.yml");
        std::fs::write(&path, CONNECTIONS_YAML).unwrap();

        let conns = Connections::load(Some(&path), Some("prod")).unwrap();
        let dw = conns.get("dw").unwrap();
        assert!(dw.credentials.path.as_deref().unwrap().ends_with("analytics_prod.duckdb"));
    }

    #[test]
    fn unknown_connection_is_config_error() {
        let conns = Connections::from_map(Default::default());
        assert!(matches!(
            conns.get("nope"),
            Err(crate::error::LoadError::Config(_))
        ));
    }

    #[test]
    fn unknown_profile_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("connections.yml");
        std::fs::write(&path, CONNECTIONS_YAML).unwrap();

        let err = Connections::load(Some(&path), Some("staging")).unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
    }
}
