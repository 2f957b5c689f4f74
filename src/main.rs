//! Chat server binary
//!
//! Usage:
//!   cargo run                          # listen on 127.0.0.1:4444
//!   cargo run -- --port 5000           # listen on a specific port
//!   RUST_LOG=debug cargo run           # verbose logging

use std::env;
use std::net::SocketAddr;

use anyhow::Context;
use parlor::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let host = parse_host(&args);
    let port = parse_port(&args);
    let bind_addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))?;

    let server = ChatServer::bind(ServerConfig { bind_addr })
        .await
        .context("failed to bind listening socket")?;
    server.run().await?;

    Ok(())
}

fn print_usage() {
    println!("parlor - multi-room chat server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --host <HOST>       Address to bind (default: 127.0.0.1)");
    println!("    --port <PORT>       Port to listen on (default: 4444)");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run");
    println!("    cargo run -- --port 5000");
    println!("    RUST_LOG=debug cargo run");
}

fn parse_host(args: &[String]) -> String {
    for i in 0..args.len() {
        if args[i] == "--host" && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "127.0.0.1".to_string()
}

fn parse_port(args: &[String]) -> u16 {
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            if let Ok(port) = args[i + 1].parse() {
                return port;
            }
        }
    }
    4444 // default port
}
