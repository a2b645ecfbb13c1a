//! Interactive client - sends requests typed on stdin.
//!
//! Each line has the form `send <name> <value>`, where the value is
//! `none`, `true`, `false`, an integer, a float, or any other text
//! (sent as a string). `quit` exits.
//!
//! # Running
//!
//! ```text
//! cargo run --example interactive_client -- /tmp/localrpc.sock
//! > send INCREMENT 3
//! ok: 4
//! > send ERROR none
//! error: error message
//! ```

use localrpc::{create_client, Reply, TaggedValue};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Parse a command-line value into the narrowest matching variant.
fn parse_value(text: &str) -> TaggedValue {
    match text {
        "" | "none" => TaggedValue::None,
        "true" => TaggedValue::Bool(true),
        "false" => TaggedValue::Bool(false),
        _ => {
            if let Ok(n) = text.parse::<i32>() {
                TaggedValue::Int32(n)
            } else if let Ok(f) = text.parse::<f32>() {
                TaggedValue::Float32(f)
            } else {
                TaggedValue::from(text)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let (use_abstract, name) = match args.next().as_deref() {
        Some("--abstract") => (true, args.next()),
        other => (false, other.map(str::to_string)),
    };
    let Some(name) = name else {
        eprintln!("usage: interactive_client [--abstract] <address>");
        std::process::exit(2);
    };

    let client = create_client(&name, use_abstract).await?;
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        let mut parts = line.splitn(3, ' ');
        let (Some("send"), Some(request)) = (parts.next(), parts.next()) else {
            println!("expected: send <name> <value>");
            continue;
        };
        let value = parse_value(parts.next().unwrap_or("").trim());

        match client.request(request, value).await {
            Ok(Reply::Ok(value)) => println!("ok: {value}"),
            Ok(Reply::Error(message)) => println!("error: {message}"),
            Err(e) => {
                println!("transport error: {e}");
                break;
            }
        }
    }

    client.destroy().await;
    Ok(())
}
