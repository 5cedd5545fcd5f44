use crate::config::{Config, SinkKind};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bacnet-forwarder",
    version,
    about = "Polls BACnet/IP points on an interval and forwards readings to Timestream"
)]
pub struct Args {
    /// Polling interval in seconds.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,
    /// JSON point list; overrides POLLER_POINTS_FILE.
    #[arg(long)]
    pub points: Option<PathBuf>,
    /// Where readings go; overrides POLLER_SINK.
    #[arg(long, value_enum)]
    pub sink: Option<SinkKind>,
    /// Seconds to wait before the first cycle; overrides POLLER_STARTUP_DELAY_SECONDS.
    #[arg(long)]
    pub startup_delay: Option<u64>,
    /// Print the resolved point list as JSON and exit.
    #[arg(long, default_value_t = false)]
    pub print_points: bool,
}

impl Args {
    pub fn apply(&self, config: &mut Config) {
        if let Some(points) = &self.points {
            config.points_file = Some(points.clone());
        }
        if let Some(sink) = self.sink {
            config.sink = sink;
        }
        if let Some(delay) = self.startup_delay {
            config.startup_delay_seconds = delay;
        }
    }
}
