//! Progress output: one timestamped, dot-justified line per job event.
//!
//! Concurrent jobs interleave whole lines only; every print is a single
//! `println!` call.

use crate::runlog::LoadStatus;

pub const COLOR_FG_RED: &str = "\x1b[31m";
pub const COLOR_FG_GREEN: &str = "\x1b[32m";
pub const COLOR_FG_YELLOW: &str = "\x1b[33m";
pub const COLOR_RESET_ALL: &str = "\x1b[0m";

pub const PRINTER_WIDTH: usize = 80;

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Plain message line.
pub fn print_msg(msg: &str) {
    println!("{}", msg);
}

/// Message line wrapped in a color.
pub fn print_msg_colored(msg: &str, color: &str) {
    println!("{}{}{}", color, msg, COLOR_RESET_ALL);
}

/// `HH:MM:SS | message`
pub fn print_output_line(msg: &str) {
    println!("{} | {}", timestamp(), msg);
}

/// Render one load progress line.
///
/// `HH:MM:SS | 2 of 7 DONE test.t1......................... [3 in 1.24s]`
pub fn format_load_line(
    index: usize,
    total: usize,
    status: LoadStatus,
    table: &str,
    rows: Option<u64>,
    execution_time: Option<f64>,
    detail: Option<&str>,
) -> String {
    let mut prefix = format!(
        "{} | {} of {} {} {}",
        timestamp(),
        index,
        total,
        status,
        table
    );
    if let Some(detail) = detail {
        prefix.push_str(": ");
        prefix.push_str(detail);
    }

    let mut justified = prefix;
    if justified.len() < PRINTER_WIDTH {
        let dots = PRINTER_WIDTH - justified.len();
        justified.push_str(&".".repeat(dots));
    }

    let status_time = match execution_time {
        Some(secs) => format!(" in {:.2}s", secs),
        None => String::new(),
    };

    let output = match (status, rows) {
        (LoadStatus::Done, Some(rows)) => {
            format!("{}{}{}", COLOR_FG_GREEN, rows, COLOR_RESET_ALL)
        }
        (LoadStatus::Warn, Some(rows)) => {
            format!("{}{}{}", COLOR_FG_YELLOW, rows, COLOR_RESET_ALL)
        }
        (LoadStatus::Error, _) => format!("{}ERROR{}", COLOR_FG_RED, COLOR_RESET_ALL),
        _ => "RUN".to_string(),
    };

    format!("{} [{}{}]", justified, output, status_time)
}

/// Print one load progress line.
pub fn print_load_line(
    index: usize,
    total: usize,
    status: LoadStatus,
    table: &str,
    rows: Option<u64>,
    execution_time: Option<f64>,
    detail: Option<&str>,
) {
    println!(
        "{}",
        format_load_line(index, total, status, table, rows, execution_time, detail)
    );
}

/// Output handle passed into the runners and strategies. Machine-readable
/// runs construct a disabled printer and read the summary instead.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    enabled: bool,
}

impl Printer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn msg(&self, msg: &str) {
        if self.enabled {
            print_msg(msg);
        }
    }

    pub fn msg_colored(&self, msg: &str, color: &str) {
        if self.enabled {
            print_msg_colored(msg, color);
        }
    }

    pub fn output_line(&self, msg: &str) {
        if self.enabled {
            print_output_line(msg);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn load_line(
        &self,
        index: usize,
        total: usize,
        status: LoadStatus,
        table: &str,
        rows: Option<u64>,
        execution_time: Option<f64>,
        detail: Option<&str>,
    ) {
        if self.enabled {
            print_load_line(index, total, status, table, rows, execution_time, detail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_line_is_justified_and_bracketed() {
        let line = format_load_line(1, 3, LoadStatus::Start, "test.t1", None, None, None);
        assert!(line.contains("1 of 3 START test.t1"));
        assert!(line.contains("..."));
        assert!(line.ends_with("[RUN]"));
    }

    #[test]
    fn done_line_shows_green_row_count() {
        let line = format_load_line(2, 3, LoadStatus::Done, "test.t1", Some(42), Some(1.5), None);
        assert!(line.contains(COLOR_FG_GREEN));
        assert!(line.contains("42"));
        assert!(line.contains("in 1.50s"));
    }

    #[test]
    fn error_line_shows_red_status_and_detail() {
        let line = format_load_line(
            1,
            1,
            LoadStatus::Error,
            "test.missing",
            None,
            None,
            Some("does not exist in source"),
        );
        assert!(line.contains("does not exist in source"));
        assert!(line.contains(COLOR_FG_RED));
    }

    #[test]
    fn long_prefix_is_not_truncated() {
        let table = "a".repeat(100);
        let line = format_load_line(1, 1, LoadStatus::Start, &table, None, None, None);
        assert!(line.contains(&table));
    }
}
