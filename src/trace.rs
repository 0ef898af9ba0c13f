use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use log::info;

use crate::error::{Error, Result};

/// Largest UDP payload that fits a 1500 byte MTU without fragmentation.
pub const MAX_PAYLOAD_BYTES: usize = 1472;

const TIME_COLUMN: &str = "time";
const LENGTH_COLUMN: &str = "packet_length";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    pub offset: f64,
    pub payload_bytes: usize,
}

impl TracePoint {
    /// Validates one recorded sample. Negative offsets and sizes below one
    /// byte are rejected, sizes above `MAX_PAYLOAD_BYTES` are clamped.
    pub fn new(offset: f64, size: f64) -> Option<Self> {
        if !offset.is_finite() || offset < 0.0 || !size.is_finite() {
            return None;
        }
        let size = size.trunc();
        if size < 1.0 {
            return None;
        }
        Some(TracePoint {
            offset,
            payload_bytes: (size as usize).min(MAX_PAYLOAD_BYTES),
        })
    }
}

/// A recorded trace, sorted by offset.
#[derive(Debug, Clone)]
pub struct Trace {
    points: Vec<TracePoint>,
    period: f64,
}

impl Trace {
    /// Builds a trace from samples in any order. Returns `None` when there are
    /// no samples. Samples with equal offsets keep their input order.
    pub fn from_points(mut points: Vec<TracePoint>) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        points.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        let period = match points.len() {
            1 => 0.0,
            n => points[n - 1].offset - points[0].offset,
        };
        Some(Trace { points, period })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(file);
        let headers = reader.headers()?.clone();
        let time_idx = column_index(&headers, TIME_COLUMN);
        let len_idx = column_index(&headers, LENGTH_COLUMN);
        let (time_idx, len_idx) = match (time_idx, len_idx) {
            (Some(t), Some(l)) => (t, l),
            _ => {
                return Err(Error::config(format!(
                    "trace {} must have '{}' and '{}' columns",
                    path.display(),
                    TIME_COLUMN,
                    LENGTH_COLUMN
                )))
            }
        };

        let points = reader
            .records()
            .filter_map(|record| record.ok())
            .filter_map(|record| {
                let offset = parse_field(&record, time_idx)?;
                let size = parse_field(&record, len_idx)?;
                TracePoint::new(offset, size)
            })
            .collect();

        Trace::from_points(points).ok_or_else(|| Error::EmptyTrace {
            path: path.to_path_buf(),
        })
    }

    pub fn points(&self) -> &[TracePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Time between the first and last sample.
    pub fn period(&self) -> f64 {
        self.period
    }
}

/// Finds a header case-insensitively, ignoring surrounding whitespace and a
/// leading byte order mark.
pub(crate) fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| {
        h.trim_start_matches('\u{feff}')
            .trim()
            .eq_ignore_ascii_case(name)
    })
}

pub(crate) fn parse_field(record: &StringRecord, idx: usize) -> Option<f64> {
    record
        .get(idx)?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Every known application's trace. Built once, then only read.
#[derive(Debug, Clone, Default)]
pub struct AppCatalog {
    traces: BTreeMap<String, Trace>,
}

impl AppCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, app: S, trace: Trace) {
        self.traces.insert(app.into(), trace);
    }

    /// Loads every trace in `paths`. Each file is read independently, so the
    /// same path may back more than one application.
    pub fn load(paths: &BTreeMap<String, PathBuf>, tag: &str) -> Result<Self> {
        let mut catalog = AppCatalog::new();
        for (app, path) in paths {
            if !path.is_file() {
                return Err(Error::config(format!(
                    "trace for app '{}' not found at {}",
                    app,
                    path.display()
                )));
            }
            let trace = Trace::load(path)?;
            info!(
                "[{} TRACE] app={} rows={}, period={:.3}s, file={}",
                tag,
                app,
                trace.len(),
                trace.period(),
                path.file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default()
            );
            catalog.insert(app.clone(), trace);
        }
        Ok(catalog)
    }

    pub fn get(&self, app: &str) -> Option<&Trace> {
        self.traces.get(app)
    }

    pub fn contains(&self, app: &str) -> bool {
        self.traces.contains_key(app)
    }

    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.traces.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}
