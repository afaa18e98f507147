use crate::config::InputFormat;
use crate::{Sample, Session};
use anyhow::{bail, Context, Result};
use arrow::array::{Array, ArrayRef, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::ipc::reader::FileReaderBuilder;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

const TIMESTAMP_COLUMNS: &[&str] = &["timestamp"];
const MVC_COLUMNS: &[&str] = &["percent_mvc", "mvc_percent"];
const POSTURE_COLUMNS: &[&str] = &["posture_score", "rula_score"];
const FORCE_COLUMNS: &[&str] = &["force_signal", "EMG_RMS"];

/// Session id used when a table has no session column.
pub const DEFAULT_SESSION_ID: &str = "session_0";

/// Positions of the recognised columns within one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    pub timestamp: usize,
    pub percent_mvc: usize,
    pub posture_score: usize,
    pub force_signal: Option<usize>,
    pub session: Option<usize>,
}

fn find_column<S: AsRef<str>>(headers: &[S], names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.contains(&h.as_ref().trim()))
}

fn require_column<S: AsRef<str>>(headers: &[S], names: &[&str]) -> Result<usize> {
    find_column(headers, names)
        .with_context(|| format!("missing required column {}", names.join(" | ")))
}

impl ColumnMap {
    pub fn resolve<S: AsRef<str>>(headers: &[S], session_column: &str) -> Result<Self> {
        Ok(Self {
            timestamp: require_column(headers, TIMESTAMP_COLUMNS)?,
            percent_mvc: require_column(headers, MVC_COLUMNS)?,
            posture_score: require_column(headers, POSTURE_COLUMNS)?,
            force_signal: find_column(headers, FORCE_COLUMNS),
            session: find_column(headers, &[session_column]),
        })
    }

    fn indices(&self) -> Vec<usize> {
        let mut out = vec![self.timestamp, self.percent_mvc, self.posture_score];
        out.extend(self.force_signal);
        out.extend(self.session);
        out
    }
}

/// Parse RFC 3339 or a naive `YYYY-MM-DD[ T]HH:MM:SS[.fff]` time (taken as UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_posture(value: &str) -> Option<i32> {
    let value = value.trim();
    value.parse::<i32>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i32)
    })
}

fn parse_finite(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Accumulates rows of one table into sessions.
struct SessionBuilder {
    columns: ColumnMap,
    groups: BTreeMap<String, Vec<Sample>>,
    rows: usize,
    skipped: usize,
}

impl SessionBuilder {
    fn new(columns: ColumnMap) -> Self {
        Self {
            columns,
            groups: BTreeMap::new(),
            rows: 0,
            skipped: 0,
        }
    }

    fn push_row<'a>(&mut self, field: impl Fn(usize) -> Option<&'a str>) {
        self.rows += 1;
        match self.parse_row(field) {
            Some((session, sample)) => self.groups.entry(session).or_default().push(sample),
            None => self.skipped += 1,
        }
    }

    fn parse_row<'a>(&self, field: impl Fn(usize) -> Option<&'a str>) -> Option<(String, Sample)> {
        let timestamp = parse_timestamp(field(self.columns.timestamp)?)?;
        let percent_mvc =
            parse_finite(field(self.columns.percent_mvc)?).filter(|v| (0.0..=100.0).contains(v))?;
        let posture_score = parse_posture(field(self.columns.posture_score)?)?;
        let force_signal = self
            .columns
            .force_signal
            .and_then(|i| field(i))
            .and_then(parse_finite);
        let session = match self.columns.session {
            Some(i) => field(i)?.trim().to_string(),
            None => DEFAULT_SESSION_ID.to_string(),
        };
        if session.is_empty() {
            return None;
        }

        Some((
            session,
            Sample {
                timestamp,
                percent_mvc,
                posture_score,
                force_signal,
            },
        ))
    }

    fn finish(self, source: &str) -> Vec<Session> {
        if self.skipped > 0 {
            warn!(
                "{}: skipped {} of {} rows with missing or invalid fields",
                source, self.skipped, self.rows
            );
        }
        let sessions: Vec<Session> = self
            .groups
            .into_iter()
            .map(|(id, samples)| Session::new(id, samples))
            .collect();
        debug!("{}: {} sessions", source, sessions.len());
        sessions
    }
}

/// Read one CSV table. Fails if the header lacks a required column.
pub fn read_csv_sessions<R: Read>(
    reader: R,
    source: &str,
    session_column: &str,
) -> Result<Vec<Session>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read CSV header: {}", source))?
        .clone();
    let header_names: Vec<&str> = headers.iter().collect();
    let columns = ColumnMap::resolve(&header_names, session_column)
        .with_context(|| format!("{}: malformed session table", source))?;

    let mut builder = SessionBuilder::new(columns);
    for result in rdr.records() {
        match result {
            Ok(record) => builder.push_row(|i| record.get(i).filter(|v| !v.is_empty())),
            Err(e) => {
                debug!("{}: unreadable CSV record: {}", source, e);
                builder.rows += 1;
                builder.skipped += 1;
            }
        }
    }
    Ok(builder.finish(source))
}

pub fn read_csv_file(path: &Path, session_column: &str) -> Result<Vec<Session>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    read_csv_sessions(file, &path.display().to_string(), session_column)
}

/// Read an Arrow IPC (feather v2) table. Recognised columns are cast to
/// strings and go through the same row parser as CSV.
pub fn read_feather_file(path: &Path, session_column: &str) -> Result<Vec<Session>> {
    let source = path.display().to_string();
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = FileReaderBuilder::new()
        .build(file)
        .with_context(|| format!("Failed to read feather file: {}", source))?;

    let schema = reader.schema();
    let header_names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    let columns = ColumnMap::resolve(&header_names, session_column)
        .with_context(|| format!("{}: malformed session table", source))?;
    let wanted = columns.indices();

    let mut builder = SessionBuilder::new(columns);
    for batch in reader {
        let batch = batch.with_context(|| format!("Failed to read record batch: {}", source))?;
        let mut as_text: Vec<Option<ArrayRef>> = vec![None; batch.num_columns()];
        for &i in &wanted {
            let converted = cast(batch.column(i), &DataType::Utf8).with_context(|| {
                format!("{}: column {} cannot be read as text", source, header_names[i])
            })?;
            as_text[i] = Some(converted);
        }
        let strings: Vec<Option<&StringArray>> = as_text
            .iter()
            .map(|c| c.as_ref().and_then(|a| a.as_any().downcast_ref::<StringArray>()))
            .collect();

        for row in 0..batch.num_rows() {
            builder.push_row(|i| {
                strings
                    .get(i)
                    .copied()
                    .flatten()
                    .filter(|a| a.is_valid(row))
                    .map(|a| a.value(row))
                    .filter(|v| !v.is_empty())
            });
        }
    }
    Ok(builder.finish(&source))
}

/// Load every session under `path`. A directory is walked for `*.csv`
/// files. Tables missing required columns are skipped; sessions sharing an
/// id across tables are merged. Fails only if nothing usable remains.
pub fn load_sessions(
    path: &Path,
    format: InputFormat,
    session_column: &str,
) -> Result<Vec<Session>> {
    let tables: Vec<std::path::PathBuf> = if path.is_dir() {
        WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
            })
            .collect()
    } else {
        vec![path.to_path_buf()]
    };

    let mut merged: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
    for table in &tables {
        let loaded = match format {
            InputFormat::Feather if !path.is_dir() => read_feather_file(table, session_column),
            _ => read_csv_file(table, session_column),
        };
        match loaded {
            Ok(sessions) => {
                for session in sessions {
                    merged.entry(session.id).or_default().extend(session.samples);
                }
            }
            Err(e) => warn!("Skipping {}: {:#}", table.display(), e),
        }
    }

    let sessions: Vec<Session> = merged
        .into_iter()
        .filter(|(_, samples)| !samples.is_empty())
        .map(|(id, samples)| Session::new(id, samples))
        .collect();

    if sessions.is_empty() {
        bail!(
            "No sessions met the minimum schema in {} ({} tables read)",
            path.display(),
            tables.len()
        );
    }
    info!(
        "Loaded {} sessions ({} samples) from {}",
        sessions.len(),
        sessions.iter().map(Session::len).sum::<usize>(),
        path.display()
    );
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = DateTime::<Utc>::from_timestamp(1_700_038_800, 0).unwrap();
        assert_eq!(parse_timestamp("2023-11-15T09:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2023-11-15T10:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2023-11-15 09:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2023-11-15T09:00:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2023-11-15 09:00:00.500"),
            Some(expected + chrono::Duration::milliseconds(500))
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_csv_with_aliases_and_sessions() {
        let csv = "\
timestamp,session_id,mvc_percent,rula_score,EMG_RMS
2023-11-15 09:00:00,a,25.0,4,0.31
2023-11-15 09:00:30,a,26.5,4.0,
2023-11-15 09:00:00,b,10,2,0.12
";
        let sessions = read_csv_sessions(csv.as_bytes(), "inline", "session_id").unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "a");
        assert_eq!(sessions[0].len(), 2);
        assert_eq!(sessions[0].samples[0].force_signal, Some(0.31));
        assert_eq!(sessions[0].samples[1].force_signal, None);
        assert_eq!(sessions[0].samples[1].posture_score, 4);
        assert_eq!(sessions[1].samples[0].percent_mvc, 10.0);
    }

    #[test]
    fn test_missing_session_column_gives_single_session() {
        let csv = "\
timestamp,percent_mvc,posture_score
2023-11-15T09:00:00Z,30,3
2023-11-15T09:00:30Z,31,3
";
        let sessions = read_csv_sessions(csv.as_bytes(), "inline", "session_id").unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, DEFAULT_SESSION_ID);
        assert!(!sessions[0].has_force_signal());
    }

    #[test]
    fn test_invalid_rows_are_skipped() {
        let csv = "\
timestamp,percent_mvc,posture_score
2023-11-15T09:00:00Z,30,3
not a time,30,3
2023-11-15T09:01:00Z,,3
2023-11-15T09:01:30Z,120,3
2023-11-15T09:02:00Z,-1,3
2023-11-15T09:02:30Z,NaN,3
2023-11-15T09:03:00Z,30,high
2023-11-15T09:03:30Z,40,5
";
        let sessions = read_csv_sessions(csv.as_bytes(), "inline", "session_id").unwrap();
        assert_eq!(sessions.len(), 1);
        let mvc: Vec<f64> = sessions[0].samples.iter().map(|s| s.percent_mvc).collect();
        assert_eq!(mvc, vec![30.0, 40.0]);
    }

    #[test]
    fn test_table_without_required_column_is_rejected() {
        let csv = "timestamp,posture_score\n2023-11-15T09:00:00Z,3\n";
        assert!(read_csv_sessions(csv.as_bytes(), "inline", "session_id").is_err());
    }

    #[test]
    fn test_load_sessions_from_missing_path_fails() {
        let path = Path::new("/nonexistent/fatigue/input.csv");
        assert!(load_sessions(path, InputFormat::Csv, "session_id").is_err());
    }
}
