//! Expands a project into an ordered list of independent load jobs.
//!
//! Planning binds connection configurations, resolves target table names
//! (prefix/suffix), derives per-job staging directories and validates that
//! each table carries the keys its replication method needs. Anything wrong
//! here is a configuration error and stops the run before any job starts.

use crate::catalog::LogicalType;
use crate::config::{ConnectionConfig, Connections, Project, ReplicationMethod};
use crate::error::{LoadError, Result};
use std::path::PathBuf;

/// Run-log destination bound to a concrete connection.
#[derive(Debug, Clone)]
pub struct LogDb {
    pub connection: ConnectionConfig,
    pub schema: String,
    pub table: String,
}

/// What a job replicates: a schema table or an ad-hoc query.
#[derive(Debug, Clone)]
pub enum LoadKind {
    Table {
        source_schema: String,
        source_table: String,
        replication_method: ReplicationMethod,
        replication_key: Option<String>,
        primary_key: Option<String>,
        parallelization_key: Option<String>,
    },
    Query {
        name: String,
        sql: String,
        replication_method: ReplicationMethod,
        parallelization_key: Option<String>,
    },
}

/// One planned load. Jobs are independent: they share no connections, no
/// staging directories and no mutable state.
#[derive(Debug, Clone)]
pub struct LoadJob {
    /// 1-based position, for deterministic numbering in progress lines.
    pub order: usize,
    pub total: usize,
    pub project_name: String,
    pub source: ConnectionConfig,
    pub target: ConnectionConfig,
    pub logdb: Option<LogDb>,
    pub kind: LoadKind,
    pub target_schema: String,
    pub target_table: String,
    pub temp_dir: PathBuf,
    pub delimiter: u8,
    pub keep_tempfiles: bool,
    pub excluded_types: Vec<LogicalType>,
}

/// Resolve the project's run-log destination, if one is configured.
pub fn resolve_logdb(project: &Project, connections: &Connections) -> Result<Option<LogDb>> {
    let Some(name) = &project.file.logdb else {
        return Ok(None);
    };
    Ok(Some(LogDb {
        connection: connections.get(name)?.clone(),
        schema: project.file.logschema.clone(),
        table: project.file.logtable.clone(),
    }))
}

/// Expand the project into its load jobs, tables first, then queries.
pub fn plan(project: &Project, connections: &Connections) -> Result<Vec<LoadJob>> {
    let source = connections.get(&project.file.source)?.clone();
    let target = connections.get(&project.file.target)?.clone();
    let logdb = resolve_logdb(project, connections)?;
    let excluded_types = project.excluded_types()?;
    let delimiter = project.delimiter();

    let mut jobs = Vec::new();

    for schema in &project.file.schemas {
        for table in &schema.tables {
            validate_keys(&table.table_name, table.replication_method, &table.replication_key, &table.primary_key)?;

            let target_table = format!(
                "{}{}{}",
                schema.table_prefix.as_deref().unwrap_or(""),
                table.table_name,
                schema.table_suffix.as_deref().unwrap_or("")
            );
            jobs.push(LoadJob {
                order: 0,
                total: 0,
                project_name: project.name.clone(),
                source: source.clone(),
                target: target.clone(),
                logdb: logdb.clone(),
                kind: LoadKind::Table {
                    source_schema: schema.source_schema.clone(),
                    source_table: table.table_name.clone(),
                    replication_method: table.replication_method,
                    replication_key: table.replication_key.clone(),
                    primary_key: table.primary_key.clone(),
                    parallelization_key: table.parallelization_key.clone(),
                },
                target_schema: schema.target_schema.clone(),
                target_table,
                temp_dir: project
                    .temp_root
                    .join(&schema.source_schema)
                    .join(&table.table_name),
                delimiter,
                keep_tempfiles: project.file.keep_tempfiles,
                excluded_types: excluded_types.clone(),
            });
        }
    }

    for group in &project.file.queries {
        for query in &group.queries {
            jobs.push(LoadJob {
                order: 0,
                total: 0,
                project_name: project.name.clone(),
                source: source.clone(),
                target: target.clone(),
                logdb: logdb.clone(),
                kind: LoadKind::Query {
                    name: query.query_name.clone(),
                    sql: query.query.clone(),
                    replication_method: query.replication_method,
                    parallelization_key: query.parallelization_key.clone(),
                },
                target_schema: group.target_schema.clone(),
                target_table: query.table_name.clone(),
                temp_dir: project.temp_root.join("queries").join(&query.query_name),
                delimiter,
                keep_tempfiles: project.file.keep_tempfiles,
                excluded_types: excluded_types.clone(),
            });
        }
    }

    let total = jobs.len();
    for (i, job) in jobs.iter_mut().enumerate() {
        job.order = i + 1;
        job.total = total;
    }
    Ok(jobs)
}

fn validate_keys(
    table: &str,
    method: ReplicationMethod,
    replication_key: &Option<String>,
    primary_key: &Option<String>,
) -> Result<()> {
    match method {
        ReplicationMethod::FullTable => Ok(()),
        ReplicationMethod::Incremental => {
            if replication_key.is_none() {
                return Err(LoadError::Config(format!(
                    "table '{}': INCREMENTAL requires a replication_key",
                    table
                )));
            }
            Ok(())
        }
        ReplicationMethod::Upsert => {
            if replication_key.is_none() || primary_key.is_none() {
                return Err(LoadError::Config(format!(
                    "table '{}': UPSERT requires a replication_key and a primary_key",
                    table
                )));
            }
            Ok(())
        }
    }
}
