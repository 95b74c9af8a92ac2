//! Example Listener (Reader)
//!
//! Attaches to a broadcast channel and prints every announcement newer
//! than five seconds.
//!
//! Usage: listener [namespace] [--loopback] [--flush]

use std::time::Duration;
use venom_broadcast::{BroadcastChannel, ChannelConfig};

const MAX_AGE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let namespace = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "venom_broadcast_demo".to_string());
    let loopback = args.iter().any(|a| a == "--loopback");
    let flush = args.iter().any(|a| a == "--flush");

    println!("[Listener] Connecting to namespace: {}", namespace);

    let mut channel = BroadcastChannel::new(ChannelConfig::default());
    if let Err(e) = channel.create(&namespace, 64) {
        eprintln!("[Listener] Failed to connect: {}", e);
        eprintln!("[Listener] Make sure every process uses the same capacity");
        std::process::exit(1);
    }

    // Skip whatever was announced before we arrived
    if flush {
        if let Err(e) = channel.flush_local() {
            eprintln!("[Listener] Failed to flush: {}", e);
        }
    }

    println!("[Listener] Listening... (Ctrl+C to quit)");
    loop {
        match channel.receive_broadcast(MAX_AGE, loopback) {
            Ok(messages) => {
                // Oldest first for display
                for message in messages.iter().rev() {
                    println!(
                        "[Listener] process {} {:?} payload {} at {}",
                        message.sender_process_id,
                        message.message_type,
                        message.payload_id,
                        message.timestamp
                    );
                }
            }
            Err(e) if e.is_timeout() => eprintln!("[Listener] Busy: {}", e),
            Err(e) => {
                eprintln!("[Listener] Receive failed: {}", e);
                break;
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}
