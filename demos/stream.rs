//! Print tracking events from every connected device to stdout.
//!
//! Usage: cargo run --example stream [-- /dev/videoN]
//! Pass the DK2 camera's video node to include it. Press Ctrl+C to stop.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use vrtrackd::{events, Registry, TrackdConfig, TrackdError, TrackingEvent};

fn main() {
    env_logger::init();

    let config = TrackdConfig::from_env();
    let (tx, stream) = events::channel(config.event_capacity);
    let mut registry = Registry::new(config, tx);

    match registry.discover_vive() {
        Ok(n) => println!("Found {} Vive headset(s)", n),
        Err(e) => eprintln!("Vive discovery failed: {}", e),
    }
    if let Some(video_node) = std::env::args().nth(1) {
        if let Err(e) = registry.add_dk2_camera(&video_node) {
            eprintln!("Failed to open camera {}: {}", video_node, e);
        }
    }
    if registry.is_empty() {
        eprintln!("No tracking devices found");
        std::process::exit(1);
    }

    let started = registry.start_all();
    println!("Started {} of {} device(s) (Ctrl+C to stop)...", started, registry.len());

    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut last_report = Instant::now();

    loop {
        match stream.recv_timeout(Duration::from_secs(2)) {
            Ok(event) => {
                let count = counts.entry(event.device().to_string()).or_default();
                *count += 1;
                match &event {
                    TrackingEvent::Imu { device, sequence, samples } if *count % 500 == 1 => {
                        let s = &samples[0];
                        println!(
                            "{} imu seq={:<3} ts={:<10} acc=[{:+.3}, {:+.3}, {:+.3}] gyro=[{:+.3}, {:+.3}, {:+.3}]",
                            device, sequence, s.time,
                            s.acceleration[0], s.acceleration[1], s.acceleration[2],
                            s.angular_velocity[0], s.angular_velocity[1], s.angular_velocity[2],
                        );
                    }
                    TrackingEvent::CameraIntrinsics { device, intrinsics } => {
                        println!("{} intrinsics {:?}", device, intrinsics);
                    }
                    TrackingEvent::LighthouseModel { device, model } => {
                        println!("{} lighthouse model with {} points", device, model.points.len());
                    }
                    TrackingEvent::Disconnected { device } => {
                        println!("{} disconnected", device);
                        for name in registry.reap_inactive() {
                            println!("removed {}", name);
                        }
                        if registry.is_empty() {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            Err(TrackdError::Timeout) => {
                // Devices that failed to start get another chance.
                registry.start_all();
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }

        if last_report.elapsed() >= Duration::from_secs(3) {
            let mut names: Vec<_> = counts.iter().collect();
            names.sort();
            for (name, count) in names {
                println!("--- {}: {} events ---", name, count);
            }
            last_report = Instant::now();
        }
    }

    registry.stop_all();
}
