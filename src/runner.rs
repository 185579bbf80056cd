//! Job and project runners.
//!
//! The project runner drives a bounded pool of workers over the planned
//! jobs and owns the run-log session; each job runner owns its adapter
//! connections and staging directory, dispatches to a strategy and reports
//! one result line plus one run-log row. A single failing job never stops
//! the project; a read-only violation or a user interrupt stops new jobs
//! from being scheduled while in-flight jobs run to completion.

use crate::adapter;
use crate::catalog::qualified;
use crate::config::{Connections, Project, ReplicationMethod};
use crate::error::Result;
use crate::partition::{run_pool, CancelFlag};
use crate::planner::{self, LoadJob, LoadKind, LogDb};
use crate::printer::{Printer, COLOR_FG_GREEN, COLOR_FG_RED, COLOR_FG_YELLOW};
use crate::runlog::{LoadStatus, LogRecord};
use crate::stage::DelimitedStage;
use crate::strategy::{self, LoadOutcome, StrategyIo};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::debug;

/// Outcome of one load job.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub order: usize,
    pub source: String,
    pub target: String,
    pub status: LoadStatus,
    pub exported_rows: u64,
    pub imported_rows: u64,
    pub elapsed_secs: f64,
    #[serde(skip)]
    fatal: bool,
}

/// Aggregate outcome of a project run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub project: String,
    pub jobs: usize,
    pub done: usize,
    pub warnings: usize,
    pub errors: usize,
    pub elapsed_secs: f64,
    pub interrupted: bool,
    pub results: Vec<JobResult>,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            2
        } else if self.errors > 0 {
            1
        } else {
            0
        }
    }
}

/// Run every job of the project with `parallel_loads` workers and aggregate
/// the outcomes. `interrupt` stops the pool from claiming new jobs.
pub fn run_project(
    project: &Project,
    connections: &Connections,
    interrupt: &CancelFlag,
    printer: &Printer,
) -> Result<RunSummary> {
    let mut jobs = planner::plan(project, connections)?;
    let total = jobs.len();

    printer.msg(&format!(
        "Running {} with {} loadjobs from {} to {}",
        project.name, total, project.file.source, project.file.target
    ));
    printer.msg("");

    let workers = project.file.parallel_loads.clamp(1, total.max(1));
    printer.output_line(&format!(
        "Start loading {} tables with {} parallel workers",
        total, workers
    ));

    let start = Instant::now();
    let project_started_at = chrono::Local::now().naive_local();

    // Open the run-log session. A log database that cannot be prepared
    // disables database logging for the whole run, it does not fail it.
    let logdb = planner::resolve_logdb(project, connections)?;
    let logdb = match logdb {
        Some(logdb) => match open_log_session(&logdb, &project.name, project_started_at) {
            Ok(()) => Some(logdb),
            Err(e) => {
                debug!(error = %e, "failed creating database logger");
                for job in &mut jobs {
                    job.logdb = None;
                }
                None
            }
        },
        None => None,
    };

    let fatal_seen = AtomicBool::new(false);
    let results = run_pool(workers, &jobs, interrupt, |job| {
        let result = run_load(job, project_started_at, printer);
        if result.fatal {
            fatal_seen.store(true, Ordering::SeqCst);
            interrupt.cancel();
        }
        Ok(result)
    })?;

    let done = results.iter().filter(|r| r.status == LoadStatus::Done).count();
    let warnings = results.iter().filter(|r| r.status == LoadStatus::Warn).count();
    let errors = results.iter().filter(|r| r.status == LoadStatus::Error).count();

    if !project.file.keep_tempfiles {
        if let Err(e) = std::fs::remove_dir_all(&project.temp_root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(error = %e, "could not delete project temp directory");
            }
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    printer.output_line("");
    printer.output_line(&format!(
        "Finished loading {} tables in {:.2}s: {} successful, {} with warnings and {} with errors",
        total, elapsed, done, warnings, errors
    ));
    printer.msg("");
    if errors > 0 {
        printer.msg_colored("Completed with errors", COLOR_FG_RED);
    } else if warnings > 0 {
        printer.msg_colored("Completed with warnings", COLOR_FG_YELLOW);
    } else {
        printer.msg_colored("Completed successfully", COLOR_FG_GREEN);
    }

    if let Some(logdb) = &logdb {
        if let Err(e) = close_log_session(logdb, &project.name, project_started_at) {
            debug!(error = %e, "failed writing project end row");
        }
    }

    let interrupted = interrupt.is_cancelled() && !fatal_seen.load(Ordering::SeqCst);
    let mut results = results;
    results.sort_by_key(|r| r.order);
    Ok(RunSummary {
        project: project.name.clone(),
        jobs: total,
        done,
        warnings,
        errors,
        elapsed_secs: elapsed,
        interrupted,
        results,
    })
}

fn open_log_session(
    logdb: &LogDb,
    project_name: &str,
    project_started_at: NaiveDateTime,
) -> Result<()> {
    let mut log = adapter::connect(&logdb.connection)?;
    log.create_log_table(&logdb.schema, &logdb.table)?;
    log.write_log(
        &logdb.schema,
        &logdb.table,
        &LogRecord::project_start(project_name, project_started_at),
    )
}

fn close_log_session(
    logdb: &LogDb,
    project_name: &str,
    project_started_at: NaiveDateTime,
) -> Result<()> {
    let mut log = adapter::connect(&logdb.connection)?;
    log.write_log(
        &logdb.schema,
        &logdb.table,
        &LogRecord::project_end(
            project_name,
            project_started_at,
            chrono::Local::now().naive_local(),
        ),
    )
}

/// Execute one load job end to end and report its result.
pub fn run_load(
    job: &LoadJob,
    project_started_at: NaiveDateTime,
    printer: &Printer,
) -> JobResult {
    let start = Instant::now();
    let started_at = chrono::Local::now().naive_local();

    let (source_name, log_source_name) = match &job.kind {
        LoadKind::Table {
            source_schema,
            source_table,
            ..
        } => {
            let full = qualified(source_schema, source_table);
            (full.clone(), full)
        }
        LoadKind::Query { name, .. } => (name.clone(), "query".to_string()),
    };
    let full_target_table = qualified(&job.target_schema, &job.target_table);

    let outcome = execute_load(job, &source_name, printer);

    let elapsed = start.elapsed().as_secs_f64();
    printer.load_line(
        job.order,
        job.total,
        outcome.status,
        &source_name,
        Some(outcome.imported),
        Some(elapsed),
        None,
    );

    if let Some(logdb) = &job.logdb {
        let record = LogRecord::job(
            &job.project_name,
            project_started_at,
            &log_source_name,
            &full_target_table,
            started_at,
            chrono::Local::now().naive_local(),
            outcome.status,
            outcome.exported,
            outcome.imported,
        );
        let written = adapter::connect(&logdb.connection)
            .and_then(|mut log| log.write_log(&logdb.schema, &logdb.table, &record));
        if let Err(e) = written {
            debug!(error = %e, "failed writing run log row");
        }
    }

    JobResult {
        order: job.order,
        source: source_name,
        target: full_target_table,
        status: outcome.status,
        exported_rows: outcome.exported,
        imported_rows: outcome.imported,
        elapsed_secs: elapsed,
        fatal: outcome.fatal,
    }
}

fn error_outcome() -> LoadOutcome {
    LoadOutcome {
        status: LoadStatus::Error,
        exported: 0,
        imported: 0,
        fatal: false,
    }
}

fn execute_load(job: &LoadJob, display_name: &str, printer: &Printer) -> LoadOutcome {
    let index = job.order;
    let total = job.total;

    let mut source = match adapter::connect(&job.source) {
        Ok(adapter) => adapter,
        Err(e) => {
            printer.load_line(
                index,
                total,
                LoadStatus::Error,
                display_name,
                None,
                None,
                Some(&e.to_string()),
            );
            return error_outcome();
        }
    };
    let mut target = match adapter::connect(&job.target) {
        Ok(adapter) => adapter,
        Err(e) => {
            printer.load_line(
                index,
                total,
                LoadStatus::Error,
                display_name,
                None,
                None,
                Some(&e.to_string()),
            );
            return error_outcome();
        }
    };

    let stage = DelimitedStage::new(&job.temp_dir, job.delimiter);

    let outcome = match &job.kind {
        LoadKind::Table {
            source_schema,
            source_table,
            replication_method,
            replication_key,
            primary_key,
            parallelization_key,
        } => {
            let full_source_table = qualified(source_schema, source_table);
            match source.table_exists(&full_source_table) {
                Ok(true) => {}
                Ok(false) => {
                    printer.load_line(
                        index,
                        total,
                        LoadStatus::Error,
                        &full_source_table,
                        None,
                        None,
                        Some("does not exist in source"),
                    );
                    return error_outcome();
                }
                Err(e) => {
                    printer.load_line(
                        index,
                        total,
                        LoadStatus::Error,
                        &full_source_table,
                        None,
                        None,
                        Some(&e.to_string()),
                    );
                    return error_outcome();
                }
            }

            if let Err(e) = stage.init() {
                printer.load_line(
                    index,
                    total,
                    LoadStatus::Error,
                    &full_source_table,
                    None,
                    None,
                    Some("failed to prepare staging directory"),
                );
                debug!(error = %e, "stage init failed");
                return error_outcome();
            }

            let columns = match source.table_columns(source_schema, source_table) {
                Ok(columns) => columns,
                Err(e) => {
                    printer.load_line(
                        index,
                        total,
                        LoadStatus::Error,
                        &full_source_table,
                        None,
                        None,
                        Some(&e.to_string()),
                    );
                    return error_outcome();
                }
            };
            let mut columns = source.remove_unsupported_columns(columns);
            columns.retain(|c| !job.excluded_types.contains(&c.ty));
            if columns.is_empty() {
                printer.load_line(
                    index,
                    total,
                    LoadStatus::Error,
                    &full_source_table,
                    None,
                    None,
                    Some("no exportable columns"),
                );
                return error_outcome();
            }

            printer.load_line(
                index,
                total,
                LoadStatus::Start,
                &format!("{} ({})", full_source_table, replication_method),
                None,
                None,
                None,
            );

            let mut io = StrategyIo {
                index,
                total,
                source: source.as_mut(),
                target: target.as_mut(),
                source_cfg: &job.source,
                target_cfg: &job.target,
                stage: &stage,
                columns: &columns,
                printer,
            };
            match replication_method {
                ReplicationMethod::FullTable => strategy::full_table_load(
                    &mut io,
                    source_schema,
                    source_table,
                    &job.target_schema,
                    &job.target_table,
                    parallelization_key.as_deref(),
                ),
                ReplicationMethod::Incremental => strategy::incremental(
                    &mut io,
                    source_schema,
                    source_table,
                    &job.target_schema,
                    &job.target_table,
                    replication_key.as_deref(),
                    parallelization_key.as_deref(),
                ),
                ReplicationMethod::Upsert => strategy::upsert(
                    &mut io,
                    source_schema,
                    source_table,
                    &job.target_schema,
                    &job.target_table,
                    replication_key.as_deref(),
                    parallelization_key.as_deref(),
                    primary_key.as_deref(),
                ),
            }
        }
        LoadKind::Query {
            name,
            sql,
            replication_method,
            parallelization_key,
        } => {
            if let Err(e) = stage.init() {
                printer.load_line(
                    index,
                    total,
                    LoadStatus::Error,
                    name,
                    None,
                    None,
                    Some("failed to prepare staging directory"),
                );
                debug!(error = %e, "stage init failed");
                return error_outcome();
            }

            let columns = match source.query_columns(sql) {
                Ok(columns) => columns,
                Err(e) => {
                    printer.load_line(
                        index,
                        total,
                        LoadStatus::Error,
                        name,
                        None,
                        None,
                        Some(&e.to_string()),
                    );
                    return error_outcome();
                }
            };

            printer.load_line(
                index,
                total,
                LoadStatus::Start,
                &format!("{} ({})", name, replication_method),
                None,
                None,
                None,
            );

            let mut io = StrategyIo {
                index,
                total,
                source: source.as_mut(),
                target: target.as_mut(),
                source_cfg: &job.source,
                target_cfg: &job.target,
                stage: &stage,
                columns: &columns,
                printer,
            };
            match replication_method {
                ReplicationMethod::FullTable => strategy::full_query_load(
                    &mut io,
                    name,
                    sql,
                    &job.target_schema,
                    &job.target_table,
                    parallelization_key.as_deref(),
                ),
                other => {
                    printer.load_line(
                        index,
                        total,
                        LoadStatus::Error,
                        name,
                        None,
                        None,
                        Some(&format!("{} not implemented for queries", other)),
                    );
                    error_outcome()
                }
            }
        }
    };

    if !job.keep_tempfiles {
        if let Err(e) = stage.clear() {
            debug!(error = %e, "could not clear staging directory");
        }
    }

    outcome
}
