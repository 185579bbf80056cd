//! Persisted operational run log.
//!
//! One row is appended per project START/END and per completed job. The
//! table schema is dialect-neutral; each adapter owns the DDL and INSERT.

use chrono::NaiveDateTime;

/// Outcome vocabulary shared by progress lines and the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Project or job has begun.
    Start,
    /// Intermediate stage completed, job still in flight.
    Run,
    Done,
    Warn,
    Error,
    /// Project finished (run-log only).
    End,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Start => "START",
            LoadStatus::Run => "RUN",
            LoadStatus::Done => "DONE",
            LoadStatus::Warn => "WARN",
            LoadStatus::Error => "ERROR",
            LoadStatus::End => "END",
        }
    }
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for LoadStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One run-log row. Append-only; arrival order across concurrent jobs is
/// arbitrary.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub log_time: NaiveDateTime,
    pub project: String,
    pub project_started_at: NaiveDateTime,
    pub source_table: Option<String>,
    pub target_table: Option<String>,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub status: LoadStatus,
    pub exported_rows: Option<u64>,
    pub imported_rows: Option<u64>,
}

impl LogRecord {
    fn base(project: &str, project_started_at: NaiveDateTime, status: LoadStatus) -> Self {
        Self {
            log_time: chrono::Local::now().naive_local(),
            project: project.to_string(),
            project_started_at,
            source_table: None,
            target_table: None,
            started_at: None,
            ended_at: None,
            status,
            exported_rows: None,
            imported_rows: None,
        }
    }

    pub fn project_start(project: &str, project_started_at: NaiveDateTime) -> Self {
        let mut rec = Self::base(project, project_started_at, LoadStatus::Start);
        rec.started_at = Some(project_started_at);
        rec
    }

    pub fn project_end(
        project: &str,
        project_started_at: NaiveDateTime,
        ended_at: NaiveDateTime,
    ) -> Self {
        let mut rec = Self::base(project, project_started_at, LoadStatus::End);
        rec.ended_at = Some(ended_at);
        rec
    }

    #[allow(clippy::too_many_arguments)]
    pub fn job(
        project: &str,
        project_started_at: NaiveDateTime,
        source_table: &str,
        target_table: &str,
        started_at: NaiveDateTime,
        ended_at: NaiveDateTime,
        status: LoadStatus,
        exported_rows: u64,
        imported_rows: u64,
    ) -> Self {
        let mut rec = Self::base(project, project_started_at, status);
        rec.source_table = Some(source_table.to_string());
        rec.target_table = Some(target_table.to_string());
        rec.started_at = Some(started_at);
        rec.ended_at = Some(ended_at);
        rec.exported_rows = Some(exported_rows);
        rec.imported_rows = Some(imported_rows);
        rec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_log_vocabulary() {
        assert_eq!(LoadStatus::Start.to_string(), "START");
        assert_eq!(LoadStatus::Done.to_string(), "DONE");
        assert_eq!(LoadStatus::Warn.to_string(), "WARN");
        assert_eq!(LoadStatus::Error.to_string(), "ERROR");
        assert_eq!(LoadStatus::End.to_string(), "END");
    }

    #[test]
    fn job_record_carries_row_counts() {
        let t0 = chrono::Local::now().naive_local();
        let rec = LogRecord::job("proj", t0, "test.t1", "tgt.t1", t0, t0, LoadStatus::Done, 3, 3);
        assert_eq!(rec.exported_rows, Some(3));
        assert_eq!(rec.imported_rows, Some(3));
        assert_eq!(rec.source_table.as_deref(), Some("test.t1"));
    }

    #[test]
    fn project_rows_have_no_tables() {
        let t0 = chrono::Local::now().naive_local();
        let start = LogRecord::project_start("proj", t0);
        assert!(start.source_table.is_none());
        assert_eq!(start.status, LoadStatus::Start);

        let end = LogRecord::project_end("proj", t0, t0);
        assert_eq!(end.status, LoadStatus::End);
        assert!(end.ended_at.is_some());
    }
}
