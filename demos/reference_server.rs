//! Reference server - answers INCREMENT and ERROR requests.
//!
//! # Running
//!
//! ```text
//! cargo run --example reference_server -- /tmp/localrpc.sock
//! cargo run --example reference_server -- --abstract localrpc-demo
//! ```
//!
//! Set `RUST_LOG=localrpc=debug` to see connection activity.

use localrpc::{create_server, ConnectionId, HandlerResult, TaggedValue};
use tracing_subscriber::EnvFilter;

fn increment(conn: ConnectionId, _name: &str, value: TaggedValue) -> HandlerResult {
    tracing::info!("{}: INCREMENT {}", conn, value);
    match value {
        TaggedValue::Int32(n) => Ok(TaggedValue::Int32(n.wrapping_add(1))),
        other => Err(format!("INCREMENT expects an int32, got {other}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (use_abstract, name) = match args.next().as_deref() {
        Some("--abstract") => (true, args.next()),
        other => (false, other.map(str::to_string)),
    };
    let Some(name) = name else {
        eprintln!("usage: reference_server [--abstract] <address>");
        std::process::exit(2);
    };

    let server = create_server(&name, use_abstract).await?;
    server.register_handler("INCREMENT", increment);
    server.register_handler("ERROR", |_, _, _| Err("error message".to_string()));

    println!("listening on {} ({})", server.address(), server.handler_names().join(", "));

    tokio::signal::ctrl_c().await?;
    server.destroy().await;
    Ok(())
}
