//! On-disk staging area for one load job.
//!
//! Every job owns a directory under the project temp root and stages its
//! exported data there as delimited text files, one file per partition. The
//! format is the lowest common denominator accepted by every bulk loader:
//! UTF-8, one record per `\n`, no header, NULL encoded as an empty field,
//! embedded delimiter bytes and newlines stripped from string fields.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// BufWriter capacity per stage file (256 KB).
pub const WRITER_BUFFER_SIZE: usize = 256 * 1024;
/// Rows to buffer before an explicit flush.
pub const ROW_FLUSH_COUNT: usize = 5_000;

/// Staging directory for a single load job.
#[derive(Debug, Clone)]
pub struct DelimitedStage {
    job_dir: PathBuf,
    delimiter: u8,
}

impl DelimitedStage {
    pub fn new(job_dir: impl Into<PathBuf>, delimiter: u8) -> Self {
        Self {
            job_dir: job_dir.into(),
            delimiter,
        }
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Create the job directory, clearing any leftovers from a prior run.
    pub fn init(&self) -> io::Result<()> {
        self.clear()?;
        fs::create_dir_all(&self.job_dir)
    }

    /// Recursive delete. Tolerates the directory not existing.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.job_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stage file path for one partition of a table export.
    ///
    /// `<db>_<schema>_<table>_<n>.csv`, or without the suffix for
    /// single-partition loads.
    pub fn partition_path(
        &self,
        database: &str,
        schema: &str,
        table: &str,
        partition: Option<usize>,
    ) -> PathBuf {
        let name = match partition {
            Some(n) => format!("{}_{}_{}_{}.csv", database, schema, table, n),
            None => format!("{}_{}_{}.csv", database, schema, table),
        };
        self.job_dir.join(name)
    }

    /// Stage file path for an ad-hoc query export.
    pub fn query_path(&self, query_name: &str) -> PathBuf {
        self.job_dir.join(format!("{}.csv", query_name))
    }

    /// Open an appending row writer for the given stage file.
    pub fn open_writer(&self, path: &Path) -> io::Result<RowWriter> {
        open_row_writer(path, self.delimiter)
    }

    /// All stage files produced for this job. Order is not significant.
    pub fn list_partitions(&self) -> io::Result<Vec<PathBuf>> {
        let pattern = self.job_dir.join("*.csv");
        let pattern = pattern.to_string_lossy();
        let mut files = Vec::new();
        for entry in glob::glob(&pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?
        {
            match entry {
                Ok(path) => files.push(path),
                Err(e) => return Err(e.into_error()),
            }
        }
        Ok(files)
    }
}

/// Split an oversized stage file into chunks of at most `max_bytes`,
/// breaking only on line boundaries. The original file is deleted and the
/// chunk paths are returned. Used by targets whose bulk loaders cap the
/// per-file size.
pub fn split_file(path: &Path, max_bytes: u64) -> io::Result<Vec<PathBuf>> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "stage file has no name"))?
        .to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let reader = BufReader::with_capacity(WRITER_BUFFER_SIZE, File::open(path)?);
    let mut chunks: Vec<PathBuf> = Vec::new();
    let mut writer: Option<BufWriter<File>> = None;
    let mut written: u64 = 0;

    for line in reader.split(b'\n') {
        let line = line?;
        let line_len = line.len() as u64 + 1;
        if writer.is_none() || written + line_len > max_bytes {
            if let Some(mut w) = writer.take() {
                w.flush()?;
            }
            let chunk = dir.join(format!("{}_part{}.csv", stem, chunks.len() + 1));
            writer = Some(BufWriter::with_capacity(
                WRITER_BUFFER_SIZE,
                File::create(&chunk)?,
            ));
            chunks.push(chunk);
            written = 0;
        }
        let w = writer.as_mut().expect("chunk writer was just created");
        w.write_all(&line)?;
        w.write_all(b"\n")?;
        written += line_len;
    }
    if let Some(mut w) = writer.take() {
        w.flush()?;
    }

    fs::remove_file(path)?;
    Ok(chunks)
}

/// Open an appending row writer for an arbitrary stage file. Used by
/// cursor-path adapters that stream fetched rows straight to disk.
pub fn open_row_writer(path: &Path, delimiter: u8) -> io::Result<RowWriter> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(RowWriter {
        writer: BufWriter::with_capacity(WRITER_BUFFER_SIZE, file),
        delimiter,
        rows_written: 0,
        rows_since_flush: 0,
    })
}

/// Buffered writer for one stage file, counting rows as they go.
pub struct RowWriter {
    writer: BufWriter<File>,
    delimiter: u8,
    rows_written: u64,
    rows_since_flush: usize,
}

impl RowWriter {
    /// Append one record. `None` fields encode as empty, never as a literal
    /// "None" or "NULL".
    pub fn write_row(&mut self, fields: &[Option<String>]) -> io::Result<()> {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(&[self.delimiter])?;
            }
            if let Some(value) = field {
                let encoded = encode_field(value, self.delimiter);
                self.writer.write_all(encoded.as_bytes())?;
            }
        }
        self.writer.write_all(b"\n")?;

        self.rows_written += 1;
        self.rows_since_flush += 1;
        if self.rows_since_flush >= ROW_FLUSH_COUNT {
            self.rows_since_flush = 0;
            self.writer.flush()?;
        }
        Ok(())
    }

    /// Flush and return the number of rows written.
    pub fn finish(mut self) -> io::Result<u64> {
        self.writer.flush()?;
        Ok(self.rows_written)
    }
}

/// Strip bytes that would corrupt a non-quote-aware bulk load: the field
/// delimiter itself and any line break.
fn encode_field(raw: &str, delimiter: u8) -> std::borrow::Cow<'_, str> {
    let delim_char = delimiter as char;
    if raw
        .chars()
        .any(|c| c == delim_char || c == '\n' || c == '\r')
    {
        std::borrow::Cow::Owned(
            raw.chars()
                .filter(|&c| c != delim_char && c != '\n' && c != '\r')
                .collect(),
        )
    } else {
        std::borrow::Cow::Borrowed(raw)
    }
}
