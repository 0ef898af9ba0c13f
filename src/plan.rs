use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use csv::{ReaderBuilder, StringRecord};

use crate::error::{Error, Result};
use crate::trace::{column_index, parse_field};

/// Rows per day in a connection-count schedule sampled every 10 minutes.
pub const ROWS_PER_DAY: usize = 144;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPlanEntry {
    pub duration_secs: u64,
    pub flow_count: usize,
}

impl SlotPlanEntry {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// The two accepted schedule layouts, picked from the CSV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    /// `duration_min`, `flows`: one slot per row with its own duration.
    DurationFlows { duration: usize, flows: usize },
    /// `minutes_since_start`, `internet_connections`: fixed, compressed slot
    /// length and a day limit on the number of rows.
    MinutesConnections { connections: usize },
}

impl PlanSource {
    pub fn detect(headers: &StringRecord) -> Result<Self> {
        let duration = column_index(headers, "duration_min");
        let flows = column_index(headers, "flows");
        if let (Some(duration), Some(flows)) = (duration, flows) {
            return Ok(PlanSource::DurationFlows { duration, flows });
        }
        let minutes = column_index(headers, "minutes_since_start");
        let connections = column_index(headers, "internet_connections");
        if let (Some(_), Some(connections)) = (minutes, connections) {
            return Ok(PlanSource::MinutesConnections { connections });
        }
        Err(Error::config(
            "flow schedule must have either [duration_min, flows] or \
             [minutes_since_start, internet_connections] columns",
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPlan {
    entries: Vec<SlotPlanEntry>,
}

impl SlotPlan {
    pub fn new(entries: Vec<SlotPlanEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::config("empty or invalid flow schedule"));
        }
        Ok(SlotPlan { entries })
    }

    pub fn load<P: AsRef<Path>>(path: P, slot_minutes: u64, num_days: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, slot_minutes, num_days)
    }

    pub fn from_reader<R: Read>(rdr: R, slot_minutes: u64, num_days: usize) -> Result<Self> {
        let mut reader = ReaderBuilder::new().flexible(true).from_reader(rdr);
        let source = PlanSource::detect(reader.headers()?)?;
        let records = reader.records().filter_map(|r| r.ok());

        let entries = match source {
            PlanSource::DurationFlows {
                duration: duration_idx,
                flows: flows_idx,
            } => records
                .filter_map(|record| {
                    let minutes = parse_field(&record, duration_idx)?;
                    let flows = parse_field(&record, flows_idx)?.trunc();
                    if minutes <= 0.0 || flows < 0.0 {
                        return None;
                    }
                    let duration_secs = (minutes * 60.0).round() as u64;
                    if duration_secs == 0 {
                        return None;
                    }
                    Some(SlotPlanEntry {
                        duration_secs,
                        flow_count: flows as usize,
                    })
                })
                .collect(),
            PlanSource::MinutesConnections { connections } => {
                let duration_secs = slot_minutes * 60;
                if duration_secs == 0 {
                    return Err(Error::config("slot length must be at least one minute"));
                }
                records
                    .filter_map(|record| parse_field(&record, connections))
                    .take(num_days.saturating_mul(ROWS_PER_DAY))
                    .map(|count| SlotPlanEntry {
                        duration_secs,
                        flow_count: count.round().max(0.0) as usize,
                    })
                    .collect()
            }
        };
        SlotPlan::new(entries)
    }

    pub fn entries(&self) -> &[SlotPlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_secs(&self) -> u64 {
        self.entries.iter().map(|e| e.duration_secs).sum()
    }

    /// Sum of whole minutes per slot, the figure reported at startup.
    pub fn total_minutes(&self) -> u64 {
        self.entries.iter().map(|e| e.duration_secs / 60).sum()
    }
}

/// Renders a slot length as `"N min"` or `"N min Ss"`.
pub fn format_slot(secs: u64) -> String {
    let (mins, secs) = (secs / 60, secs % 60);
    if secs == 0 {
        format!("{} min", mins)
    } else {
        format!("{} min {}s", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(csv: &str, slot_minutes: u64, days: usize) -> Result<SlotPlan> {
        SlotPlan::from_reader(csv.as_bytes(), slot_minutes, days)
    }

    #[test]
    fn duration_flows_shape() {
        let p = plan("duration_min,flows\n10,5\n5,0\n", 1, 1).unwrap();
        assert_eq!(
            p.entries(),
            &[
                SlotPlanEntry { duration_secs: 600, flow_count: 5 },
                SlotPlanEntry { duration_secs: 300, flow_count: 0 },
            ]
        );
        assert_eq!(p.total_minutes(), 15);
    }

    #[test]
    fn duration_flows_skips_invalid_rows() {
        let p = plan(
            "Flows,Duration_Min\n3,0.5\nx,1\n2,0\n-1,4\n7.9,2\n",
            1,
            1,
        )
        .unwrap();
        assert_eq!(
            p.entries(),
            &[
                SlotPlanEntry { duration_secs: 30, flow_count: 3 },
                SlotPlanEntry { duration_secs: 120, flow_count: 7 },
            ]
        );
    }

    #[test]
    fn connections_shape_is_compressed_and_day_limited() {
        let mut csv = String::from("minutes_since_start,internet_connections\n");
        for i in 0..300 {
            csv.push_str(&format!("{},{}\n", i * 10, i % 7));
        }
        let p = plan(&csv, 2, 1).unwrap();
        assert_eq!(p.len(), ROWS_PER_DAY);
        assert!(p.entries().iter().all(|e| e.duration_secs == 120));
        assert_eq!(p.entries()[3].flow_count, 3);

        let p = plan(&csv, 1, 5).unwrap();
        assert_eq!(p.len(), 300);
    }

    #[test]
    fn unparseable_rows_do_not_count_toward_day_limit() {
        let mut csv = String::from("MINUTES_SINCE_START,Internet_Connections\n");
        for i in 0..ROWS_PER_DAY {
            csv.push_str(&format!("{},bad\n", i));
            csv.push_str(&format!("{},{}\n", i, 2.6));
        }
        csv.push_str("999,1\n");
        let p = plan(&csv, 1, 1).unwrap();
        assert_eq!(p.len(), ROWS_PER_DAY);
        assert!(p.entries().iter().all(|e| e.flow_count == 3));
    }

    #[test]
    fn huge_day_count_keeps_every_row() {
        let p = plan(
            "minutes_since_start,internet_connections\n0,1\n10,2\n",
            1,
            usize::MAX,
        )
        .unwrap();
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn negative_connections_clamp_to_zero() {
        let p = plan("minutes_since_start,internet_connections\n0,-4\n", 1, 1).unwrap();
        assert_eq!(p.entries()[0].flow_count, 0);
    }

    #[test]
    fn unknown_shape_and_empty_plans_fail() {
        assert!(plan("a,b\n1,2\n", 1, 1).unwrap_err().is_configuration());
        assert!(plan("duration_min,flows\n0,1\n", 1, 1).unwrap_err().is_configuration());
        assert!(plan("minutes_since_start,internet_connections\n", 1, 1)
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn slot_formatting() {
        assert_eq!(format_slot(120), "2 min");
        assert_eq!(format_slot(90), "1 min 30s");
        assert_eq!(format_slot(0), "0 min");
    }
}
