//! Range partitioning and the per-job worker pools.
//!
//! A partitioned export tiles `[lo, hi]` with `key BETWEEN a AND b`
//! predicates derived from the source's `(min, max, stride)`, then runs a
//! bounded pool of export workers followed by a pool of import workers.
//! Workers share nothing but an atomic work cursor and a cancellation flag;
//! each one opens its own adapter connection.

use crate::adapter::{self, Adapter, ImportOutcome};
use crate::catalog::{qualified, Column};
use crate::config::ConnectionConfig;
use crate::error::{LoadError, Result};
use crate::stage::DelimitedStage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Shared cancellation token. The first failing worker sets it; remaining
/// workers stop claiming work after their current item.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One contiguous range of the parallelization key.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// 1-based, used as the stage file suffix.
    pub id: usize,
    pub predicate: String,
}

/// Tile `[lo, hi]` into `key BETWEEN start AND start+stride-1` ranges.
///
/// The ranges are disjoint, their union covers `[lo, hi]`, and the last one
/// includes `hi`. A degenerate stride (zero or negative, from tiny tables or
/// huge batch sizes) collapses to a single covering partition.
pub fn plan_partitions(key: &str, lo: i64, hi: i64, stride: i64) -> Vec<Partition> {
    if stride <= 0 {
        return vec![Partition {
            id: 1,
            predicate: format!("{} between {} and {}", key, lo, hi),
        }];
    }

    let mut partitions = Vec::new();
    let mut start = lo;
    let mut id = 1;
    while start <= hi {
        partitions.push(Partition {
            id,
            predicate: format!("{} between {} and {}", key, start, start + stride - 1),
        });
        start += stride;
        id += 1;
    }
    partitions
}

/// Run `f` over `items` with at most `workers` OS threads.
///
/// Items are claimed through an atomic cursor. The first error cancels the
/// pool and is returned after all workers have stopped; results of completed
/// items are returned otherwise (a pre-set flag yields an empty run).
pub(crate) fn run_pool<T, R, F>(
    workers: usize,
    items: &[T],
    cancel: &CancelFlag,
    f: F,
) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, items.len());

    let cursor = AtomicUsize::new(0);
    let first_error: Mutex<Option<LoadError>> = Mutex::new(None);
    let results: Mutex<Vec<R>> = Mutex::new(Vec::with_capacity(items.len()));

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if cancel.is_cancelled() {
                    break;
                }
                let i = cursor.fetch_add(1, Ordering::SeqCst);
                if i >= items.len() {
                    break;
                }
                match f(&items[i]) {
                    Ok(result) => results.lock().unwrap().push(result),
                    Err(e) => {
                        cancel.cancel();
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        break;
                    }
                }
            });
        }
    });

    match first_error.into_inner().unwrap() {
        Some(e) => Err(e),
        None => Ok(results.into_inner().unwrap()),
    }
}

/// Everything the export scheduler needs to know about one table export.
pub struct TableExport<'a> {
    pub source_cfg: &'a ConnectionConfig,
    pub columns: &'a [Column],
    pub source_schema: &'a str,
    pub source_table: &'a str,
    /// `(replication_key, max value in target)` for delta exports.
    pub replication: Option<(&'a str, &'a str)>,
    pub parallelization_key: Option<&'a str>,
}

/// Export a table into the stage, partitioned over the parallelization key
/// when one is configured. Returns total exported rows.
pub fn export_table(
    source: &mut dyn Adapter,
    export: &TableExport<'_>,
    stage: &DelimitedStage,
) -> Result<u64> {
    let database = source.database().to_string();
    let delimiter = stage.delimiter();

    let Some(key) = export.parallelization_key else {
        return export_single(source, export, stage, &database);
    };

    let full_table = qualified(export.source_schema, export.source_table);
    let Some((lo, hi, stride)) = source.min_max_batch(&full_table, key)? else {
        // Empty table or all-NULL key: nothing to tile over.
        return export_single(source, export, stage, &database);
    };
    debug!(table = %full_table, key, lo, hi, stride, "partitioning export");

    let partitions = plan_partitions(key, lo, hi, stride);
    let work: Vec<(String, PathBuf)> = partitions
        .iter()
        .map(|p| {
            let sql = source.export_sql(
                export.columns,
                export.source_schema,
                export.source_table,
                export.replication,
                Some(&p.predicate),
            );
            let file = stage.partition_path(
                &database,
                export.source_schema,
                export.source_table,
                Some(p.id),
            );
            (sql, file)
        })
        .collect();

    let workers = source.parallel_workers().min(work.len());
    if workers <= 1 {
        // Sequential fallback on the job's own connection; embedded engines
        // with a single-writer file lock land here.
        let mut total = 0;
        for (sql, file) in &work {
            total += source.export_query(sql, file, delimiter)?;
        }
        return Ok(total);
    }

    let cancel = CancelFlag::new();
    let rows = run_pool(workers, &work, &cancel, |(sql, file)| {
        let mut worker = adapter::connect(export.source_cfg)?;
        worker.export_query(sql, file, delimiter)
    })?;
    Ok(rows.iter().sum())
}

fn export_single(
    source: &mut dyn Adapter,
    export: &TableExport<'_>,
    stage: &DelimitedStage,
    database: &str,
) -> Result<u64> {
    let sql = source.export_sql(
        export.columns,
        export.source_schema,
        export.source_table,
        export.replication,
        None,
    );
    let file = stage.partition_path(database, export.source_schema, export.source_table, None);
    source.export_query(&sql, &file, stage.delimiter())
}

/// Import every staged file into the shadow table. The shadow must exist
/// before the first import; files load concurrently because all supported
/// targets treat bulk loads as row-order-independent.
pub fn import_stage(
    target: &mut dyn Adapter,
    target_cfg: &ConnectionConfig,
    target_schema: &str,
    target_table: &str,
    stage: &DelimitedStage,
) -> Result<ImportOutcome> {
    let files = stage.list_partitions().map_err(LoadError::Stage)?;
    let delimiter = stage.delimiter();

    let workers = target.parallel_workers().min(files.len());
    if workers <= 1 {
        let mut total = ImportOutcome::default();
        for file in &files {
            let outcome = target.import_file(target_schema, target_table, file, delimiter)?;
            total.rows += outcome.rows;
            total.skipped += outcome.skipped;
        }
        return Ok(total);
    }

    let cancel = CancelFlag::new();
    let outcomes = run_pool(workers, &files, &cancel, |file| {
        let mut worker = adapter::connect(target_cfg)?;
        worker.import_file(target_schema, target_table, file, delimiter)
    })?;
    Ok(outcomes.iter().fold(ImportOutcome::default(), |mut acc, o| {
        acc.rows += o.rows;
        acc.skipped += o.skipped;
        acc
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn four_even_partitions_tile_one_million_rows() {
        let partitions = plan_partitions("id", 1, 1_000_000, 250_000);
        assert_eq!(partitions.len(), 4);
        assert_eq!(partitions[0].predicate, "id between 1 and 250000");
        assert_eq!(partitions[1].predicate, "id between 250001 and 500000");
        assert_eq!(partitions[2].predicate, "id between 500001 and 750000");
        assert_eq!(partitions[3].predicate, "id between 750001 and 1000000");
        assert_eq!(partitions[3].id, 4);
    }

    #[test]
    fn last_partition_includes_hi_on_uneven_stride() {
        let partitions = plan_partitions("id", 1, 10, 4);
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[2].predicate, "id between 9 and 12");
    }

    #[test]
    fn zero_stride_collapses_to_single_partition() {
        let partitions = plan_partitions("id", 5, 900, 0);
        assert_eq!(
            partitions,
            vec![Partition {
                id: 1,
                predicate: "id between 5 and 900".to_string()
            }]
        );
    }

    #[test]
    fn equal_bounds_yield_single_partition() {
        let partitions = plan_partitions("id", 7, 7, 100);
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].predicate, "id between 7 and 106");
    }

    #[test]
    fn pool_collects_all_results() {
        let items: Vec<u64> = (1..=20).collect();
        let cancel = CancelFlag::new();
        let results = run_pool(4, &items, &cancel, |&n| Ok(n * 2)).unwrap();
        assert_eq!(results.len(), 20);
        assert_eq!(results.iter().sum::<u64>(), 420);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn first_failure_cancels_remaining_work() {
        let items: Vec<usize> = (0..4).collect();
        let cancel = CancelFlag::new();
        let attempts = AtomicU64::new(0);

        let err = run_pool(1, &items, &cancel, |&n| {
            attempts.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                Err(LoadError::Export("partition 2 went away".to_string()))
            } else {
                Ok(n)
            }
        })
        .unwrap_err();

        assert!(matches!(err, LoadError::Export(_)));
        assert!(cancel.is_cancelled());
        // Items 3 and 4 were never claimed.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pre_cancelled_pool_claims_nothing() {
        let items: Vec<usize> = (0..8).collect();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let attempts = AtomicU64::new(0);

        let results = run_pool(4, &items, &cancel, |&n| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(n)
        })
        .unwrap();

        assert!(results.is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_pool_is_a_no_op() {
        let items: Vec<usize> = Vec::new();
        let cancel = CancelFlag::new();
        let results = run_pool(4, &items, &cancel, |&n| Ok(n)).unwrap();
        assert!(results.is_empty());
    }
}
