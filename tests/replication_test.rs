//! End-to-end replication scenarios against DuckDB database files.
//!
//! DuckDB is bundled, so these tests exercise the whole pipeline for real:
//! plan, export to the stage, shadow table, import, promote, run log.

use sqlferry::config::{ConnectionConfig, Connections, Credentials, Dialect, Project};
use sqlferry::partition::CancelFlag;
use sqlferry::printer::Printer;
use sqlferry::runlog::LoadStatus;
use sqlferry::runner;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn duck_config(name: &str, path: &Path) -> ConnectionConfig {
    duck_config_with(name, path, |_| {})
}

fn duck_config_with(
    name: &str,
    path: &Path,
    tweak: impl FnOnce(&mut Credentials),
) -> ConnectionConfig {
    let mut credentials = Credentials {
        path: Some(path.to_string_lossy().to_string()),
        ..Default::default()
    };
    tweak(&mut credentials);
    ConnectionConfig {
        name: name.to_string(),
        dialect: Dialect::Duckdb,
        read_only: false,
        credentials,
    }
}

fn connections(entries: Vec<ConnectionConfig>) -> Connections {
    let map: HashMap<String, ConnectionConfig> = entries
        .into_iter()
        .map(|c| (c.name.clone(), c))
        .collect();
    Connections::from_map(map)
}

fn seed(path: &Path, sql: &str) {
    let conn = duckdb::Connection::open(path).unwrap();
    conn.execute_batch(sql).unwrap();
}

fn query_one(path: &Path, sql: &str) -> String {
    let conn = duckdb::Connection::open(path).unwrap();
    let value: String = conn
        .query_row(sql, [], |row| row.get::<_, String>(0))
        .unwrap();
    value
}

fn table_exists(path: &Path, qualified: &str) -> bool {
    let conn = duckdb::Connection::open(path).unwrap();
    let count: i64 = conn
        .query_row(
            &format!(
                "SELECT count(*) FROM information_schema.tables \
                 WHERE table_schema || '.' || table_name = '{}'",
                qualified
            ),
            [],
            |row| row.get(0),
        )
        .unwrap();
    count > 0
}

fn seed_source_t1(path: &Path) {
    seed(
        path,
        "CREATE SCHEMA test;
         CREATE TABLE test.t1 (id BIGINT, name VARCHAR(64), ts TIMESTAMP);
         INSERT INTO test.t1 VALUES
             (1, 'First', '2019-10-01 11:00:00'),
             (2, 'Second', '2019-10-02 12:00:00'),
             (3, 'Third', '2019-10-03 13:00:00');",
    );
}

struct TestRun {
    tmp: tempfile::TempDir,
    source_db: PathBuf,
    target_db: PathBuf,
}

impl TestRun {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let source_db = tmp.path().join("source.duckdb");
        let target_db = tmp.path().join("target.duckdb");
        Self {
            tmp,
            source_db,
            target_db,
        }
    }

    fn project(&self, name: &str, body: &str) -> Project {
        let yaml = format!(
            "source: src\ntarget: dw\ntemp_path: {}\n{}",
            self.tmp.path().join("stage_root").display(),
            body
        );
        Project::parse(name, &yaml).unwrap()
    }

    fn run(&self, project: &Project, conns: &Connections) -> runner::RunSummary {
        let interrupt = CancelFlag::new();
        let printer = Printer::new(false);
        runner::run_project(project, conns, &interrupt, &printer).unwrap()
    }

    fn default_connections(&self) -> Connections {
        connections(vec![
            duck_config("src", &self.source_db),
            duck_config("dw", &self.target_db),
        ])
    }
}

#[test]
fn full_table_load_replicates_all_rows() {
    let run = TestRun::new();
    seed_source_t1(&run.source_db);

    let project = run.project(
        "s1",
        "schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: t1
",
    );
    let summary = run.run(&project, &run.default_connections());

    assert_eq!(summary.done, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.results[0].status, LoadStatus::Done);
    assert_eq!(summary.results[0].exported_rows, 3);
    assert_eq!(summary.results[0].imported_rows, 3);
    assert_eq!(summary.exit_code(), 0);

    assert_eq!(query_one(&run.target_db, "SELECT CAST(count(*) AS VARCHAR) FROM test_tgt.t1"), "3");
    assert_eq!(
        query_one(
            &run.target_db,
            "SELECT name FROM test_tgt.t1 WHERE id = 2"
        ),
        "Second"
    );
    // Shadow and promotion leftovers are gone.
    assert!(!table_exists(&run.target_db, "test_tgt.t1_tmp"));
    assert!(!table_exists(&run.target_db, "test_tgt.t1_delete"));
    // Project temp dir is cleaned up.
    assert!(!run.tmp.path().join("stage_root").join("s1").exists());
}

#[test]
fn incremental_first_run_falls_back_to_full_load() {
    let run = TestRun::new();
    seed_source_t1(&run.source_db);

    let project = run.project(
        "s2",
        "schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: t1
        replication_method: INCREMENTAL
        replication_key: id
",
    );
    let summary = run.run(&project, &run.default_connections());

    assert_eq!(summary.done, 1);
    assert_eq!(summary.results[0].exported_rows, 3);
    assert_eq!(query_one(&run.target_db, "SELECT CAST(count(*) AS VARCHAR) FROM test_tgt.t1"), "3");
}

#[test]
fn incremental_delta_run_appends_new_rows() {
    let run = TestRun::new();
    seed_source_t1(&run.source_db);

    let project = run.project(
        "s3",
        "schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: t1
        replication_method: INCREMENTAL
        replication_key: id
",
    );
    let conns = run.default_connections();

    let first = run.run(&project, &conns);
    assert_eq!(first.done, 1);

    seed(
        &run.source_db,
        "INSERT INTO test.t1 VALUES
             (4, 'Forth', '2019-10-04 12:00:00'),
             (5, 'Fifth', '2019-10-05 13:00:00');",
    );

    let second = run.run(&project, &conns);
    assert_eq!(second.done, 1);
    assert_eq!(second.results[0].exported_rows, 2);
    assert_eq!(second.results[0].imported_rows, 2);

    assert_eq!(query_one(&run.target_db, "SELECT CAST(count(*) AS VARCHAR) FROM test_tgt.t1"), "5");
    assert_eq!(query_one(&run.target_db, "SELECT CAST(max(id) AS VARCHAR) FROM test_tgt.t1"), "5");
}

#[test]
fn upsert_updates_matches_and_inserts_new_rows() {
    let run = TestRun::new();
    seed(
        &run.source_db,
        "CREATE SCHEMA test;
         CREATE TABLE test.customers (id BIGINT, name VARCHAR, updated_at TIMESTAMP);
         INSERT INTO test.customers VALUES
             (1, 'A', '2019-01-01 00:00:00'),
             (2, 'B2', '2019-02-01 00:00:00'),
             (3, 'C', '2019-02-01 00:00:00');",
    );
    seed(
        &run.target_db,
        "CREATE SCHEMA test_tgt;
         CREATE TABLE test_tgt.customers (id BIGINT, name VARCHAR, updated_at TIMESTAMP);
         INSERT INTO test_tgt.customers VALUES
             (1, 'A', '2019-01-01 00:00:00'),
             (2, 'B', '2019-01-01 00:00:00');",
    );

    let project = run.project(
        "s5",
        "schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: customers
        replication_method: UPSERT
        replication_key: updated_at
        primary_key: id
",
    );
    let summary = run.run(&project, &run.default_connections());

    assert_eq!(summary.done, 1);
    assert_eq!(summary.results[0].exported_rows, 2);

    assert_eq!(
        query_one(&run.target_db, "SELECT CAST(count(*) AS VARCHAR) FROM test_tgt.customers"),
        "3"
    );
    assert_eq!(
        query_one(&run.target_db, "SELECT name FROM test_tgt.customers WHERE id = 1"),
        "A"
    );
    assert_eq!(
        query_one(&run.target_db, "SELECT name FROM test_tgt.customers WHERE id = 2"),
        "B2"
    );
    assert_eq!(
        query_one(&run.target_db, "SELECT name FROM test_tgt.customers WHERE id = 3"),
        "C"
    );
    assert!(!table_exists(&run.target_db, "test_tgt.customers_tmp"));
}

#[test]
fn partitioned_full_table_load_tiles_the_key_range() {
    let run = TestRun::new();
    seed(
        &run.source_db,
        "CREATE SCHEMA test;
         CREATE TABLE test.big AS
             SELECT range AS id, 'row_' || range AS name FROM range(1, 1001);",
    );

    let conns = connections(vec![
        duck_config_with("src", &run.source_db, |c| {
            c.table_parallel_batch_size = Some(250);
        }),
        duck_config("dw", &run.target_db),
    ]);
    let project = run.project(
        "s4",
        "keep_tempfiles: true
schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: big
        parallelization_key: id
",
    );
    let summary = run.run(&project, &conns);

    assert_eq!(summary.done, 1);
    assert_eq!(summary.results[0].exported_rows, 1000);
    assert_eq!(summary.results[0].imported_rows, 1000);
    assert_eq!(query_one(&run.target_db, "SELECT CAST(count(*) AS VARCHAR) FROM test_tgt.big"), "1000");

    // keep_tempfiles preserved the four partition files.
    let job_dir = run
        .tmp
        .path()
        .join("stage_root")
        .join("s4")
        .join("test")
        .join("big");
    let mut files: Vec<_> = std::fs::read_dir(&job_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    files.sort();
    assert_eq!(files.len(), 4);
    assert!(files.iter().all(|f| f.starts_with("source_test_big_") && f.ends_with(".csv")));
}

#[test]
fn query_load_promotes_into_target_schema() {
    let run = TestRun::new();
    seed_source_t1(&run.source_db);

    let project = run.project(
        "q1",
        "queries:
  - target_schema: reports
    queries:
      - query_name: totals
        query: SELECT count(*) AS n, max(id) AS max_id FROM test.t1
        table_name: t1_totals
",
    );
    let summary = run.run(&project, &run.default_connections());

    assert_eq!(summary.done, 1);
    assert_eq!(summary.results[0].source, "totals");
    assert_eq!(query_one(&run.target_db, "SELECT CAST(n AS VARCHAR) FROM reports.t1_totals"), "3");
}

#[test]
fn missing_source_table_reports_error_and_leaves_target_alone() {
    let run = TestRun::new();
    seed(&run.source_db, "CREATE SCHEMA test");

    let project = run.project(
        "e1",
        "schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: ghost
",
    );
    let summary = run.run(&project, &run.default_connections());

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.results[0].status, LoadStatus::Error);
    assert_eq!(summary.exit_code(), 1);
    assert!(!table_exists(&run.target_db, "test_tgt.ghost"));
}

#[test]
fn replication_key_not_in_columns_reports_error() {
    let run = TestRun::new();
    seed_source_t1(&run.source_db);

    let project = run.project(
        "e2",
        "schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: t1
        replication_method: INCREMENTAL
        replication_key: no_such_column
",
    );
    let summary = run.run(&project, &run.default_connections());

    assert_eq!(summary.errors, 1);
    assert!(!table_exists(&run.target_db, "test_tgt.t1"));
}

#[test]
fn read_only_target_fails_the_job() {
    let run = TestRun::new();
    seed_source_t1(&run.source_db);

    let mut target = duck_config("dw", &run.target_db);
    target.read_only = true;
    let conns = connections(vec![duck_config("src", &run.source_db), target]);

    let project = run.project(
        "e3",
        "schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: t1
",
    );
    let summary = run.run(&project, &conns);

    assert_eq!(summary.errors, 1);
    // Fatal to the project, but not a user interrupt.
    assert!(!summary.interrupted);
    assert_eq!(summary.exit_code(), 1);
    assert!(!table_exists(&run.target_db, "test_tgt.t1"));
}

#[test]
fn pre_interrupted_run_schedules_no_jobs() {
    let run = TestRun::new();
    seed_source_t1(&run.source_db);

    let project = run.project(
        "e4",
        "schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: t1
",
    );
    let interrupt = CancelFlag::new();
    interrupt.cancel();
    let printer = Printer::new(false);
    let summary =
        runner::run_project(&project, &run.default_connections(), &interrupt, &printer).unwrap();

    assert!(summary.interrupted);
    assert!(summary.results.is_empty());
    assert_eq!(summary.exit_code(), 2);
    assert!(!table_exists(&run.target_db, "test_tgt.t1"));
}

#[test]
fn run_log_gets_start_end_and_one_row_per_job() {
    let run = TestRun::new();
    seed_source_t1(&run.source_db);
    seed(
        &run.source_db,
        "CREATE TABLE test.t2 AS SELECT * FROM test.t1;",
    );

    let conns = run.default_connections();
    let project = {
        let yaml = format!(
            "source: src\ntarget: dw\nlogdb: dw\nlogschema: etl\ntemp_path: {}\n{}",
            run.tmp.path().join("stage_root").display(),
            "schemas:
  - source_schema: test
    target_schema: test_tgt
    tables:
      - table_name: t1
      - table_name: t2
        replication_method: INCREMENTAL
        replication_key: id
"
        );
        Project::parse("logged", &yaml).unwrap()
    };

    let summary = run.run(&project, &conns);
    assert_eq!(summary.done, 2);

    let starts = query_one(
        &run.target_db,
        "SELECT CAST(count(*) AS VARCHAR) FROM etl.run_log WHERE status = 'START'",
    );
    let ends = query_one(
        &run.target_db,
        "SELECT CAST(count(*) AS VARCHAR) FROM etl.run_log WHERE status = 'END'",
    );
    let jobs = query_one(
        &run.target_db,
        "SELECT CAST(count(*) AS VARCHAR) FROM etl.run_log WHERE source_table IS NOT NULL",
    );
    assert_eq!(starts, "1");
    assert_eq!(ends, "1");
    assert_eq!(jobs, "2");

    let done_rows = query_one(
        &run.target_db,
        "SELECT CAST(count(*) AS VARCHAR) FROM etl.run_log \
         WHERE status = 'DONE' AND imported_rows = 3",
    );
    assert_eq!(done_rows, "2");
}

#[test]
fn table_suffix_and_excluded_types_are_applied() {
    let run = TestRun::new();
    seed(
        &run.source_db,
        "CREATE SCHEMA test;
         CREATE TABLE test.mixed (id BIGINT, payload BLOB, name VARCHAR);
         INSERT INTO test.mixed VALUES (1, 'aa'::BLOB, 'x');",
    );

    let project = run.project(
        "x1",
        "source_columntypes_to_exclude: bytes
schemas:
  - source_schema: test
    target_schema: test_tgt
    table_suffix: _raw
    tables:
      - table_name: mixed
",
    );
    let summary = run.run(&project, &run.default_connections());

    assert_eq!(summary.done, 1);
    assert!(table_exists(&run.target_db, "test_tgt.mixed_raw"));

    let conn = duckdb::Connection::open(&run.target_db).unwrap();
    let cols: i64 = conn
        .query_row(
            "SELECT count(*) FROM information_schema.columns \
             WHERE table_schema = 'test_tgt' AND table_name = 'mixed_raw'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(cols, 2);
}
