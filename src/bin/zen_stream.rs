//! Discover sensors, connect to the first one and print its IMU data for
//! a few seconds.
//!
//! Usage: zen-stream
//! Tunables are read from `ZEN_*` environment variables (see `ClientConfig::from_env`).

use std::sync::Arc;
use zenclient::{ClientConfig, SensorManager, ZenError};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ClientConfig::from_env();

    let source = match SensorManager::init(config.interfaces) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Sensor client could not be created: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    match zenclient::run(Arc::new(source), config, |s| {
        println!("{}", zenclient::sampler::render(s));
    }) {
        Ok(report) => {
            println!(
                "\nStreamed {} sample(s) from {} ({}) on {}; {} suppressed by down-sampling",
                report.samples.accepted,
                report.sensor.name,
                report.sensor.identifier,
                report.sensor.io_type,
                report.dispatcher.samples_suppressed,
            );
        }
        Err(ZenError::DiscoveryEmpty) => {
            println!("No sensor found on the system");
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
