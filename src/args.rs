// Commandline argument parser using clap for the monitor

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{MonitorConfig, OversizePolicy};

/// Everything the `monitor` binary accepts.
#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct MonitorArgs {
    #[command(subcommand, long_about)]
    /// Which task to perform, listing ports or monitoring one
    pub command: CommandTask,

    /// Configuration file in ron format; anything missing uses the defaults
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
}

#[allow(missing_docs)]
#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// List the serial ports on this machine
    #[command(about)]
    List(ListCommand),

    /// Keep a port connected, print what it sends, and forward stdin to it
    #[command(about)]
    Run(RunCommand),
}

#[allow(missing_docs)]
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ListCommand {
    /// Try opening every port to see whether it is free
    #[arg(long)]
    pub probe: bool,

    /// Speed to probe ports at, in bits per second
    #[arg(short, long)]
    pub baud: Option<u32>,
}

#[allow(missing_docs)]
#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct RunCommand {
    /// Port to monitor; a selector is shown if neither this nor the config
    /// file names one
    #[arg(short, long)]
    pub port: Option<String>,

    /// Speed in bits per second
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Talk to a simulated device instead of real hardware
    #[arg(long)]
    pub dummy: bool,

    /// Stop instead of resynchronizing when a frame is too large
    #[arg(long)]
    pub exit_on_oversize: bool,
}

impl RunCommand {
    /// Layer these flags on top of `config`.
    pub fn apply(&self, mut config: MonitorConfig) -> MonitorConfig {
        if let Some(port) = &self.port {
            config.port.name = port.clone();
        }
        if let Some(baud) = self.baud {
            config.port.baud_rate = baud;
        }
        if self.exit_on_oversize {
            config.oversize = OversizePolicy::Terminate;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_override_config() {
        let args = MonitorArgs::parse_from([
            "monitor",
            "run",
            "--port",
            "/dev/ttyUSB1",
            "--baud",
            "9600",
            "--exit-on-oversize",
        ]);
        let CommandTask::Run(run) = args.command else {
            panic!("expected run");
        };

        let config = run.apply(MonitorConfig::default());
        assert_eq!(config.port.name, "/dev/ttyUSB1");
        assert_eq!(config.port.baud_rate, 9600);
        assert_eq!(config.oversize, OversizePolicy::Terminate);
    }

    #[test]
    fn run_without_flags_keeps_config() {
        let args = MonitorArgs::parse_from(["monitor", "run", "-c", "monitor.ron"]);
        assert_eq!(args.config, Some(PathBuf::from("monitor.ron")));
        let CommandTask::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.apply(MonitorConfig::default()), MonitorConfig::default());
    }

    #[test]
    fn list_probe() {
        let args = MonitorArgs::parse_from(["monitor", "list", "--probe"]);
        assert!(matches!(
            args.command,
            CommandTask::List(ListCommand {
                probe: true,
                baud: None
            })
        ));
    }
}
