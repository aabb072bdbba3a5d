//! Watch a serial device: print every line it sends, send it every line typed
//! on stdin, and ride out disconnects.
//!
//! ```text
//! cargo run --bin monitor -- list --probe
//! cargo run --bin monitor -- run --port /dev/ttyACM0 --baud 115200
//! cargo run --bin monitor -- run --dummy
//! ```

use clap::Parser;
use linewatch::{
    args::{CommandTask, MonitorArgs, RunCommand},
    channel::{SerialBackend, SystemPorts},
    config::{MonitorConfig, PortConfig},
    dummy_backend::DummyBackend,
    gui::device_selector,
    port_enumerator::list_ports,
    supervisor::{spawn, MonitorEvent},
};
use log::{error, info};
use std::{io, process::ExitCode, thread, time::Duration};

fn main() -> ExitCode {
    env_logger::init();
    let args = MonitorArgs::parse();

    let config = match &args.config {
        Some(path) => match MonitorConfig::from_path(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Could not load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => MonitorConfig::default(),
    };

    match args.command {
        CommandTask::List(list) => {
            let baud_rate = list.baud.unwrap_or(config.port.baud_rate);
            let probe = list.probe.then_some(baud_rate);
            for port in list_ports(&SystemPorts, probe) {
                println!("{}", port);
            }
            ExitCode::SUCCESS
        }
        CommandTask::Run(run) => {
            let config = run.apply(config);
            if run.dummy {
                let backend = DummyBackend::builder()
                    .port("dummy0")
                    .chatter(Duration::from_millis(500))
                    .build();
                let config = with_port_name(config, "dummy0");
                monitor(backend, config)
            } else {
                match choose_port(&run, config) {
                    Some(config) => monitor(SystemPorts, config),
                    None => ExitCode::SUCCESS,
                }
            }
        }
    }
}

fn with_port_name(config: MonitorConfig, name: &str) -> MonitorConfig {
    let port = PortConfig {
        name: name.to_owned(),
        ..config.port.clone()
    };
    config.with_port(port)
}

/// Fill in the port name from the selector if nothing else named one.
fn choose_port(run: &RunCommand, config: MonitorConfig) -> Option<MonitorConfig> {
    if run.port.is_some() || !config.port.name.is_empty() {
        return Some(config);
    }

    match device_selector(list_ports(&SystemPorts, None)) {
        Ok(Some(port)) => Some(with_port_name(config, &port.name)),
        Ok(None) => None,
        Err(e) => {
            error!("No port given and none could be selected: {}", e);
            None
        }
    }
}

fn monitor<B>(backend: B, config: MonitorConfig) -> ExitCode
where
    B: SerialBackend + Send + 'static,
{
    info!("Monitoring {} at {}", config.port.name, config.port.baud_rate);
    let (mut monitor, events) = spawn(backend, config);

    let commands = monitor.commands();
    let stop = monitor.stop_signal();
    thread::spawn(move || {
        for line in io::stdin().lines() {
            let Ok(line) = line else { break };
            if line.trim() == ":quit" {
                break;
            }
            if commands.send(line).is_err() {
                break;
            }
        }
        stop.stop();
    });

    for event in events {
        if let MonitorEvent::Frame(frame) = event {
            println!("{}", frame);
        }
    }

    match monitor.join() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error - {}", e);
            ExitCode::FAILURE
        }
    }
}
