//! Example shmqp client sending a few messages and printing the echoes.
//!
//! Run with: `cargo run --example client`
//!
//! Make sure the server is running first: `cargo run --example server`

use shmqp::prelude::*;
use std::time::Duration;

const NAMESPACE: &str = "shmqp-demo";
const MAX_MESSAGE: usize = 4096;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Connecting to shmqp server in namespace '{}'", NAMESPACE);

    let client = Transport::init(
        TransportAttributes::client()
            .namespace(NAMESPACE)
            .timeout(Duration::from_secs(5)),
    )?;
    client.connect()?;
    client.finalize_connect()?;
    println!("[Client] Connected to server");

    let mr = client.register_memory(&[], AccessFlags::LOCAL_WRITE);

    println!("\nSending test messages...\n");

    for i in 1..=5 {
        let (tx, rx) = crossbeam_channel::bounded(1);
        client.post_receive(
            Data::with_capacity(MAX_MESSAGE),
            &mr,
            move |_, data| {
                let _ = tx.send(data);
            },
            |_, _, e| eprintln!("[Client] Receive failed: {}", e),
        )?;

        let payload = format!("Hello from shmqp client! Message #{}", i);
        match client.wait_send(Data::from(payload.as_str()), &mr) {
            Ok(_) => println!("[Client] Sent message #{}", i),
            Err(e) => {
                eprintln!("[Client] Failed to send message #{}: {}", i, e);
                continue;
            }
        }

        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(reply) => println!(
                "[Client] Response payload: {}",
                String::from_utf8_lossy(reply.as_slice())
            ),
            Err(e) => eprintln!("[Client] No response to message #{}: {}", i, e),
        }
    }

    client.destroy()?;
    println!("\nClient finished");
    Ok(())
}
