//! Replication strategies.
//!
//! Each strategy is a deterministic pipeline over adapter and stage
//! primitives: export into the stage, create the shadow table, import the
//! staged files, promote. A failing stage stops the pipeline without
//! advancing; the shadow table is left in place for inspection and replaced
//! on the next run. The live table is only ever touched through
//! `switch_tables`, `insert_from_and_drop` or `merge_from_and_drop`.

use crate::adapter::Adapter;
use crate::catalog::{contains_column, qualified, Column};
use crate::config::ConnectionConfig;
use crate::error::{LoadError, Result};
use crate::partition::{self, TableExport};
use crate::printer::Printer;
use crate::runlog::LoadStatus;
use crate::stage::DelimitedStage;
use tracing::debug;

/// What a strategy reports back to the job runner.
#[derive(Debug, Clone, Copy)]
pub struct LoadOutcome {
    pub status: LoadStatus,
    pub exported: u64,
    pub imported: u64,
    /// Set when the failure must stop the whole project (read-only target).
    pub fatal: bool,
}

impl LoadOutcome {
    fn done(exported: u64, imported: u64) -> Self {
        Self {
            status: LoadStatus::Done,
            exported,
            imported,
            fatal: false,
        }
    }

    fn warn(exported: u64, imported: u64) -> Self {
        Self {
            status: LoadStatus::Warn,
            exported,
            imported,
            fatal: false,
        }
    }

    fn error(exported: u64, imported: u64, e: &LoadError) -> Self {
        Self {
            status: LoadStatus::Error,
            exported,
            imported,
            fatal: e.is_fatal_to_project(),
        }
    }
}

/// Connections, stage and progress context shared by every strategy call.
pub struct StrategyIo<'a> {
    pub index: usize,
    pub total: usize,
    pub source: &'a mut dyn Adapter,
    pub target: &'a mut dyn Adapter,
    pub source_cfg: &'a ConnectionConfig,
    pub target_cfg: &'a ConnectionConfig,
    pub stage: &'a DelimitedStage,
    pub columns: &'a [Column],
    pub printer: &'a Printer,
}

impl StrategyIo<'_> {
    fn fail(&self, name: &str, msg: &str, e: &LoadError, exported: u64, imported: u64) -> LoadOutcome {
        debug!(error = %e, stage = msg, "load stage failed");
        self.printer.load_line(
            self.index,
            self.total,
            LoadStatus::Error,
            name,
            None,
            None,
            Some(msg),
        );
        LoadOutcome::error(exported, imported, e)
    }
}

/// Drop and recreate the live table behind the readers' backs: export all
/// rows, build the shadow, bulk load it, swap it in.
pub fn full_table_load(
    io: &mut StrategyIo<'_>,
    source_schema: &str,
    source_table: &str,
    target_schema: &str,
    target_table: &str,
    parallelization_key: Option<&str>,
) -> LoadOutcome {
    let full_source_table = qualified(source_schema, source_table);
    let target_table_tmp = format!("{}_tmp", target_table);

    let export = TableExport {
        source_cfg: io.source_cfg,
        columns: io.columns,
        source_schema,
        source_table,
        replication: None,
        parallelization_key,
    };
    let exported = match partition::export_table(io.source, &export, io.stage) {
        Ok(rows) => rows,
        Err(e) => return io.fail(&full_source_table, "failed to export", &e, 0, 0),
    };

    if let Err(e) = io
        .target
        .create_table_from_columns(target_schema, &target_table_tmp, io.columns)
    {
        return io.fail(&full_source_table, "failed create temptable", &e, exported, 0);
    }

    let outcome = match partition::import_stage(
        io.target,
        io.target_cfg,
        target_schema,
        &target_table_tmp,
        io.stage,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            return io.fail(
                &full_source_table,
                "failed import into temptable",
                &e,
                exported,
                0,
            )
        }
    };

    if let Err(e) = io
        .target
        .switch_tables(target_schema, target_table, &target_table_tmp)
    {
        return io.fail(
            &full_source_table,
            "failed switching temptable",
            &e,
            exported,
            outcome.rows,
        );
    }

    if outcome.skipped > 0 {
        LoadOutcome::warn(exported, outcome.rows)
    } else {
        LoadOutcome::done(exported, outcome.rows)
    }
}

/// Append rows newer than the target's replication-key high-water mark.
/// Falls back to a full load when the target table does not exist yet.
pub fn incremental(
    io: &mut StrategyIo<'_>,
    source_schema: &str,
    source_table: &str,
    target_schema: &str,
    target_table: &str,
    replication_key: Option<&str>,
    parallelization_key: Option<&str>,
) -> LoadOutcome {
    let full_source_table = qualified(source_schema, source_table);
    let target_table_tmp = format!("{}_tmp", target_table);

    let Some(replication_key) = replication_key else {
        let e = LoadError::Catalog("replication key not defined".to_string());
        return io.fail(&full_source_table, "replication key not defined", &e, 0, 0);
    };
    if !contains_column(io.columns, replication_key) {
        let e = LoadError::Catalog(format!("{} not in columns", replication_key));
        return io.fail(&full_source_table, "replication key not found in table", &e, 0, 0);
    }

    let max_replication_key =
        match resolve_max_key(io, target_schema, target_table, replication_key) {
            Ok(max) => max,
            Err(e) => return io.fail(&full_source_table, "failed reading replication key", &e, 0, 0),
        };

    let Some(max_replication_key) = max_replication_key else {
        return full_table_load(
            io,
            source_schema,
            source_table,
            target_schema,
            target_table,
            parallelization_key,
        );
    };

    let export = TableExport {
        source_cfg: io.source_cfg,
        columns: io.columns,
        source_schema,
        source_table,
        replication: Some((replication_key, max_replication_key.as_str())),
        parallelization_key,
    };
    let exported = match partition::export_table(io.source, &export, io.stage) {
        Ok(rows) => rows,
        Err(e) => return io.fail(&full_source_table, "failed to export", &e, 0, 0),
    };

    if let Err(e) = io
        .target
        .create_table_from_columns(target_schema, &target_table_tmp, io.columns)
    {
        return io.fail(&full_source_table, "failed create temptable", &e, exported, 0);
    }

    let outcome = match partition::import_stage(
        io.target,
        io.target_cfg,
        target_schema,
        &target_table_tmp,
        io.stage,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            return io.fail(
                &full_source_table,
                "failed import into temptable",
                &e,
                exported,
                0,
            )
        }
    };

    if let Err(e) = io
        .target
        .insert_from_and_drop(target_schema, target_table, &target_table_tmp)
    {
        return io.fail(
            &full_source_table,
            "failed insert from temptable",
            &e,
            exported,
            outcome.rows,
        );
    }

    if outcome.skipped > 0 {
        LoadOutcome::warn(exported, outcome.rows)
    } else {
        LoadOutcome::done(exported, outcome.rows)
    }
}

/// Merge changed rows by primary key. Falls back to a full load when the
/// target table does not exist yet.
#[allow(clippy::too_many_arguments)]
pub fn upsert(
    io: &mut StrategyIo<'_>,
    source_schema: &str,
    source_table: &str,
    target_schema: &str,
    target_table: &str,
    replication_key: Option<&str>,
    parallelization_key: Option<&str>,
    primary_key: Option<&str>,
) -> LoadOutcome {
    let full_source_table = qualified(source_schema, source_table);
    let target_table_tmp = format!("{}_tmp", target_table);

    let Some(replication_key) = replication_key else {
        let e = LoadError::Catalog("replication key not defined".to_string());
        return io.fail(&full_source_table, "replication key not defined", &e, 0, 0);
    };
    if !contains_column(io.columns, replication_key) {
        let e = LoadError::Catalog(format!("{} not in columns", replication_key));
        return io.fail(&full_source_table, "replication key not found in table", &e, 0, 0);
    }
    let Some(primary_key) = primary_key else {
        let e = LoadError::Catalog("primary key not defined".to_string());
        return io.fail(&full_source_table, "primary key not defined", &e, 0, 0);
    };
    if !contains_column(io.columns, primary_key) {
        let e = LoadError::Catalog(format!("{} not in columns", primary_key));
        return io.fail(&full_source_table, "primary key not found in table", &e, 0, 0);
    }

    let max_replication_key =
        match resolve_max_key(io, target_schema, target_table, replication_key) {
            Ok(max) => max,
            Err(e) => return io.fail(&full_source_table, "failed reading replication key", &e, 0, 0),
        };

    let Some(max_replication_key) = max_replication_key else {
        return full_table_load(
            io,
            source_schema,
            source_table,
            target_schema,
            target_table,
            parallelization_key,
        );
    };

    let export = TableExport {
        source_cfg: io.source_cfg,
        columns: io.columns,
        source_schema,
        source_table,
        replication: Some((replication_key, max_replication_key.as_str())),
        parallelization_key,
    };
    let exported = match partition::export_table(io.source, &export, io.stage) {
        Ok(rows) => rows,
        Err(e) => return io.fail(&full_source_table, "failed to export", &e, 0, 0),
    };

    if let Err(e) = io
        .target
        .create_table_from_columns(target_schema, &target_table_tmp, io.columns)
    {
        return io.fail(&full_source_table, "failed create temptable", &e, exported, 0);
    }

    let outcome = match partition::import_stage(
        io.target,
        io.target_cfg,
        target_schema,
        &target_table_tmp,
        io.stage,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            return io.fail(
                &full_source_table,
                "failed import into temptable",
                &e,
                exported,
                0,
            )
        }
    };

    if let Err(e) = io.target.merge_from_and_drop(
        target_schema,
        target_table,
        &target_table_tmp,
        &[primary_key.to_string()],
    ) {
        return io.fail(
            &full_source_table,
            "failed merge from temptable",
            &e,
            exported,
            outcome.rows,
        );
    }

    if outcome.skipped > 0 {
        LoadOutcome::warn(exported, outcome.rows)
    } else {
        LoadOutcome::done(exported, outcome.rows)
    }
}

/// Replicate an ad-hoc SELECT into a target table: single-file export,
/// shadow, import, swap. Partitioned query exports are not supported.
pub fn full_query_load(
    io: &mut StrategyIo<'_>,
    query_name: &str,
    query: &str,
    target_schema: &str,
    target_table: &str,
    parallelization_key: Option<&str>,
) -> LoadOutcome {
    let target_table_tmp = format!("{}_tmp", target_table);

    if parallelization_key.is_some() {
        io.printer.load_line(
            io.index,
            io.total,
            LoadStatus::Run,
            query_name,
            None,
            None,
            Some("parallelization not implemented for queries"),
        );
    }

    let file = io.stage.query_path(query_name);
    let exported = match io.source.export_query(query, &file, io.stage.delimiter()) {
        Ok(rows) => rows,
        Err(e) => return io.fail(query_name, "failed to export", &e, 0, 0),
    };

    if let Err(e) = io
        .target
        .create_table_from_columns(target_schema, &target_table_tmp, io.columns)
    {
        return io.fail(query_name, "failed create temptable", &e, exported, 0);
    }

    let outcome = match partition::import_stage(
        io.target,
        io.target_cfg,
        target_schema,
        &target_table_tmp,
        io.stage,
    ) {
        Ok(outcome) => outcome,
        Err(e) => return io.fail(query_name, "failed import into temptable", &e, exported, 0),
    };

    if let Err(e) = io
        .target
        .switch_tables(target_schema, target_table, &target_table_tmp)
    {
        return io.fail(
            query_name,
            "failed switching temptable",
            &e,
            exported,
            outcome.rows,
        );
    }

    if outcome.skipped > 0 {
        LoadOutcome::warn(exported, outcome.rows)
    } else {
        LoadOutcome::done(exported, outcome.rows)
    }
}

/// The target-side high-water mark, or `None` when the target table does not
/// exist or is empty (both delegate to a full load).
fn resolve_max_key(
    io: &mut StrategyIo<'_>,
    target_schema: &str,
    target_table: &str,
    replication_key: &str,
) -> Result<Option<String>> {
    let full_target_table = qualified(target_schema, target_table);
    if !io.target.table_exists(&full_target_table)? {
        io.printer.load_line(
            io.index,
            io.total,
            LoadStatus::Run,
            &full_target_table,
            None,
            None,
            Some("does not exist in target. Starts FULL_TABLE load"),
        );
        return Ok(None);
    }
    let max = io
        .target
        .max_column_value(&full_target_table, replication_key)?;
    debug!(table = %full_target_table, key = replication_key, max = ?max, "replication high-water mark");
    Ok(max)
}
