//! List all sensors reachable through the enabled IO systems.
//!
//! Usage: cargo run --example enumerate
//! Set `ZEN_INTERFACES=test` to list only the simulated sensor.

use std::sync::Arc;
use zenclient::{ClientConfig, SensorClient, SensorManager, ZenError};

fn main() {
    env_logger::init();

    let config = ClientConfig::from_env();
    let source = match SensorManager::init(config.interfaces) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut client = SensorClient::new(Arc::new(source), config);
    if let Err(e) = client.start_discovery() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    match client.await_discovery() {
        Ok(sensors) => {
            println!("Found {} sensor(s):", sensors.len());
            for (i, s) in sensors.iter().enumerate() {
                println!(
                    "  [{}] {}  ID={}  IO={}  Addr={}",
                    i, s.name, s.identifier, s.io_type, s.address
                );
            }
        }
        Err(ZenError::DiscoveryEmpty) => println!("Found 0 sensor(s)"),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
