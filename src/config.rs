use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ArgMatches;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mix::MixDistribution;

pub const DEFAULT_SLOT_MINUTES: u64 = 1;
pub const DEFAULT_NUM_DAYS: usize = 1;
pub const DEFAULT_DEST_PORT: u16 = 5005;
pub const DEFAULT_SINK_ADDR: &str = "0.0.0.0:5005";
pub const DEFAULT_SCHEDULE: &str = "high_load_connections.csv";
pub const DEFAULT_APPS: [&str; 5] = ["youtube", "instagram", "facebook", "browsing", "mixed_traffic"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Uplink,
    Downlink,
}

impl Direction {
    /// Prefix used on every log line of a run.
    pub fn tag(&self) -> &'static str {
        match self {
            Direction::Uplink => "UL",
            Direction::Downlink => "DL",
        }
    }

    pub fn default_base_port(&self) -> u16 {
        match self {
            Direction::Uplink => 25000,
            Direction::Downlink => 50000,
        }
    }

    pub fn trace_file(&self, app: &str) -> String {
        match self {
            Direction::Uplink => format!("{}_uplink.csv", app),
            Direction::Downlink => format!("{}_downlink.csv", app),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uplink" | "ul" => Ok(Direction::Uplink),
            "downlink" | "dl" => Ok(Direction::Downlink),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Uplink => write!(f, "uplink"),
            Direction::Downlink => write!(f, "downlink"),
        }
    }
}

/// Everything one generator run needs, fixed before the first slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub direction: Direction,
    pub destination: SocketAddr,
    pub source_ip: IpAddr,
    pub base_port: u16,
    pub traces: BTreeMap<String, PathBuf>,
    pub schedule: PathBuf,
    pub slot_minutes: u64,
    pub num_days: usize,
    pub multiplex: bool,
    pub app_mix: BTreeMap<String, f64>,
    pub seed: Option<u64>,
}

impl GeneratorConfig {
    pub fn new(direction: Direction, destination: SocketAddr) -> Self {
        GeneratorConfig {
            direction,
            destination,
            source_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            base_port: direction.default_base_port(),
            traces: Self::default_traces(Path::new("."), direction),
            schedule: PathBuf::from(DEFAULT_SCHEDULE),
            slot_minutes: DEFAULT_SLOT_MINUTES,
            num_days: DEFAULT_NUM_DAYS,
            multiplex: true,
            app_mix: Self::default_mix(),
            seed: None,
        }
    }

    /// `<dir>/<app>_<direction>.csv` for every default app.
    pub fn default_traces(dir: &Path, direction: Direction) -> BTreeMap<String, PathBuf> {
        DEFAULT_APPS
            .iter()
            .map(|app| (app.to_string(), dir.join(direction.trace_file(app))))
            .collect()
    }

    /// All traffic from the first default app.
    pub fn default_mix() -> BTreeMap<String, f64> {
        DEFAULT_APPS
            .iter()
            .enumerate()
            .map(|(i, app)| (app.to_string(), if i == 0 { 1.0 } else { 0.0 }))
            .collect()
    }

    pub fn from_matches(direction: Direction, matches: &ArgMatches) -> Result<Self> {
        let destination = *matches
            .get_one::<SocketAddr>("dest")
            .ok_or_else(|| Error::config("a destination address is required"))?;
        let mut config = GeneratorConfig::new(direction, destination);

        if let Some(ip) = matches.get_one::<IpAddr>("source-ip") {
            config.source_ip = *ip;
        }
        if let Some(port) = matches.get_one::<u16>("base-port") {
            config.base_port = *port;
        }
        if let Some(dir) = matches.get_one::<PathBuf>("trace-dir") {
            config.traces = Self::default_traces(dir, direction);
        }
        for spec in matches.get_many::<String>("trace").unwrap_or_default() {
            let (app, path) = parse_trace_override(spec)?;
            config.traces.insert(app, path);
        }
        if let Some(schedule) = matches.get_one::<PathBuf>("schedule") {
            config.schedule = schedule.clone();
        }
        if let Some(mins) = matches.get_one::<u64>("slot-min") {
            config.slot_minutes = *mins;
        }
        if let Some(days) = matches.get_one::<usize>("days") {
            config.num_days = *days;
        }
        if matches.get_flag("no-mux") {
            config.multiplex = false;
        }
        if let Some(json) = matches.get_one::<String>("app-mix") {
            config.app_mix = MixDistribution::parse_weights(json)
                .map_err(|e| Error::config(format!("failed to parse --app-mix: {}", e)))?;
        }
        config.seed = matches.get_one::<u64>("seed").copied();

        config.validate()?;
        Ok(config)
    }

    /// Checks that need no file access.
    pub fn validate(&self) -> Result<()> {
        if self.slot_minutes == 0 {
            return Err(Error::config("--slot-min must be at least 1"));
        }
        if self.num_days == 0 {
            return Err(Error::config("--days must be at least 1"));
        }
        if self.traces.is_empty() {
            return Err(Error::config("no application traces configured"));
        }
        if let Some(app) = self.app_mix.keys().find(|app| !self.traces.contains_key(*app)) {
            return Err(Error::config(format!(
                "unknown app '{}' (must be one of {:?})",
                app,
                self.traces.keys().collect::<Vec<_>>()
            )));
        }
        Ok(())
    }
}

/// Parses `NAME=PATH`.
pub fn parse_trace_override(spec: &str) -> Result<(String, PathBuf)> {
    match spec.split_once('=') {
        Some((app, path)) if !app.trim().is_empty() && !path.trim().is_empty() => {
            Ok((app.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(Error::config(format!(
            "invalid trace override '{}', expected NAME=PATH",
            spec
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> SocketAddr {
        "127.0.0.1:5005".parse().unwrap()
    }

    #[test]
    fn direction_defaults() {
        let ul = GeneratorConfig::new(Direction::Uplink, dest());
        let dl = GeneratorConfig::new(Direction::Downlink, dest());
        assert_eq!(ul.base_port, 25000);
        assert_eq!(dl.base_port, 50000);
        assert_eq!(ul.traces["youtube"], PathBuf::from("./youtube_uplink.csv"));
        assert_eq!(dl.traces["browsing"], PathBuf::from("./browsing_downlink.csv"));
        assert_eq!("dl".parse::<Direction>().unwrap(), Direction::Downlink);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn default_mix_is_all_youtube() {
        let mix = GeneratorConfig::default_mix();
        assert_eq!(mix.len(), DEFAULT_APPS.len());
        assert_eq!(mix["youtube"], 1.0);
        assert_eq!(mix.values().sum::<f64>(), 1.0);
    }

    #[test]
    fn trace_override_parsing() {
        let (app, path) = parse_trace_override("gaming=/tmp/g.csv").unwrap();
        assert_eq!(app, "gaming");
        assert_eq!(path, PathBuf::from("/tmp/g.csv"));
        assert!(parse_trace_override("gaming").is_err());
        assert!(parse_trace_override("=x").is_err());
    }

    #[test]
    fn validate_rejects_unknown_mix_keys() {
        let mut config = GeneratorConfig::new(Direction::Uplink, dest());
        config.app_mix.insert("tiktok".to_string(), 1.0);
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn validate_rejects_zero_slots() {
        let mut config = GeneratorConfig::new(Direction::Uplink, dest());
        config.slot_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serializes() {
        let config = GeneratorConfig::new(Direction::Downlink, dest());
        let json = serde_json::to_string(&config).unwrap();
        let back: GeneratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.direction, Direction::Downlink);
        assert_eq!(back.traces, config.traces);
    }
}
