//! Example shmqp server echoing every message back to the client.
//!
//! Run with: `cargo run --example server`
//!
//! Then start the client: `cargo run --example client`

use shmqp::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const NAMESPACE: &str = "shmqp-demo";
const MAX_MESSAGE: usize = 4096;
/// Receives kept posted; one below the queue depth so a completion can
/// re-post before its own context is freed.
const POSTED_RECEIVES: usize = 4;

/// Posts a receive whose completion echoes the message and posts the next one.
fn post_echo_receive(
    transport: &Transport,
    mr: MemoryRegion,
    count: Arc<AtomicU64>,
) -> Result<(), TransportError> {
    transport.post_receive(
        Data::with_capacity(MAX_MESSAGE),
        &mr,
        move |transport, data| {
            let n = count.fetch_add(1, Ordering::Relaxed) + 1;
            println!("[Server] Message #{} received: {} bytes", n, data.size());

            if let Err(e) = transport.post_send(
                data,
                &mr,
                |_, _| {},
                |_, _, e| eprintln!("[Server] Echo failed: {}", e),
            ) {
                eprintln!("[Server] Failed to post echo: {}", e);
            }
            if let Err(e) = post_echo_receive(transport, mr, count) {
                eprintln!("[Server] Failed to re-post receive: {}", e);
            }
        },
        |_, _, e| {
            if !e.is_disconnect() {
                eprintln!("[Server] Receive failed: {}", e);
            }
        },
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let attrs = TransportAttributes::server()
        .namespace(NAMESPACE)
        .timeout(Duration::from_secs(60))
        .rq_depth(POSTED_RECEIVES + 1)
        .on_disconnect(move |_| {
            println!("[Server] Client disconnected");
            let _ = done_tx.send(());
        });

    println!("Starting shmqp server in namespace '{}'", NAMESPACE);
    let listener = Transport::init(attrs)?;
    listener.bind()?;
    listener.start_monitor_thread()?;
    let server = listener.accept_one()?;

    // Receives must be posted before the client can send.
    let mr = server.register_memory(&[], AccessFlags::LOCAL_WRITE);
    let count = Arc::new(AtomicU64::new(0));
    for _ in 0..POSTED_RECEIVES {
        post_echo_receive(&server, mr, Arc::clone(&count))?;
    }

    println!("Waiting for a client (60s)...");
    server.finalize_accept()?;
    println!("[Server] Client connected");

    done_rx.recv()?;
    server.destroy()?;

    println!(
        "Server stopped after {} messages",
        count.load(Ordering::Relaxed)
    );
    Ok(())
}
