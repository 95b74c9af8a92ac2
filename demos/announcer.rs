//! Example Announcer (Writer)
//!
//! Creates (or attaches to) a broadcast channel and announces a new
//! payload id every second, alternating message types.

use std::time::Duration;
use venom_broadcast::{BroadcastChannel, ChannelConfig, MessageType};

fn main() {
    env_logger::init();

    let namespace = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "venom_broadcast_demo".to_string());

    println!("[Announcer] Starting with namespace: {}", namespace);

    let mut channel = BroadcastChannel::new(ChannelConfig::default());
    if let Err(e) = channel.create(&namespace, 64) {
        eprintln!("[Announcer] Failed to create channel: {}", e);
        std::process::exit(1);
    }

    println!(
        "[Announcer] Channel ready, process id {} (Ctrl+C to quit)",
        channel.config().process_id
    );

    let mut payload_id = 0u64;
    loop {
        payload_id += 1;
        let message_type = match payload_id % 3 {
            1 => MessageType::Created,
            2 => MessageType::Updated,
            _ => MessageType::Removed,
        };

        match channel.broadcast(payload_id, message_type) {
            Ok(timestamp) => println!(
                "[Announcer] {:?} payload {} at {}",
                message_type, payload_id, timestamp
            ),
            // Contention is expected, try again next tick
            Err(e) if e.is_timeout() => eprintln!("[Announcer] Busy: {}", e),
            Err(e) => {
                eprintln!("[Announcer] Broadcast failed: {}", e);
                break;
            }
        }

        std::thread::sleep(Duration::from_secs(1));
    }

    if let Err(e) = channel.destroy() {
        eprintln!("[Announcer] Failed to destroy channel: {}", e);
    }
}
