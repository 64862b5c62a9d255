use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "debugbar-cli")]
#[command(about = "Inspect a running debug bar", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(long, default_value = "/_debugbar/api")]
    api_prefix: String,

    #[arg(long, default_value = "/_debugbar/ws")]
    ws_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show debug bar status
    Status,
    /// List stored requests
    List {
        /// Only the most recent N requests
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show one request with its queries and errors
    Show { id: String },
    /// Clear the request history
    Clear,
    /// Stream live events
    Tail {
        /// Also print the history snapshot sent on connect
        #[arg(long)]
        history: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let api = format!("{}{}", cli.url.trim_end_matches('/'), cli.api_prefix);

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{api}/status")).send().await?;
            print_response(res).await?;
        }
        Commands::List { limit } => {
            let mut req = client.get(format!("{api}/requests"));
            if let Some(limit) = limit {
                req = req.query(&[("limit", limit)]);
            }
            let res = req.send().await?;
            if !res.status().is_success() {
                return print_response(res).await;
            }
            let records: Vec<Value> = res.json().await?;
            for record in &records {
                println!("{}", summarize_request(record));
            }
        }
        Commands::Show { id } => {
            let res = client.get(format!("{api}/requests/{id}")).send().await?;
            print_response(res).await?;
        }
        Commands::Clear => {
            let res = client.delete(format!("{api}/requests")).send().await?;
            if res.status().is_success() {
                println!("History cleared");
            } else {
                print_response(res).await?;
            }
        }
        Commands::Tail { history } => {
            let ws_url = format!("{}{}", websocket_base(&cli.url), cli.ws_path);
            tail(&ws_url, history).await?;
        }
    }

    Ok(())
}

async fn tail(url: &str, show_history: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (stream, _) = connect_async(url).await?;
    eprintln!("Connected to {url}");
    let (mut sink, mut stream) = stream.split();
    let mut keepalive = tokio::time::interval(std::time::Duration::from_secs(30));

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                sink.send(Message::text(r#"{"type":"ping","payload":null}"#)).await?;
            }
            _ = tokio::signal::ctrl_c() => break,
            frame = stream.next() => {
                let Some(frame) = frame else { break };
                let text = match frame? {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let msg: Value = serde_json::from_str(text.as_str())?;
                print_frame(&msg, show_history);
            }
        }
    }

    Ok(())
}

fn print_frame(msg: &Value, show_history: bool) {
    let payload = &msg["payload"];
    match msg["type"].as_str().unwrap_or_default() {
        "history" => {
            let records = payload.as_array().map(Vec::as_slice).unwrap_or_default();
            eprintln!("{} stored requests", records.len());
            if show_history {
                for record in records {
                    println!("{}", summarize_request(record));
                }
            }
        }
        "request" => println!(
            "→ {} {} [{}]",
            payload["method"].as_str().unwrap_or("?"),
            payload["path"].as_str().unwrap_or("?"),
            payload["id"].as_str().unwrap_or("?"),
        ),
        "request_end" => println!("← {}", summarize_request(payload)),
        "query" => println!(
            "  query {:.2}ms {}{}",
            payload["duration_ms"].as_f64().unwrap_or_default(),
            payload["query"].as_str().unwrap_or_default(),
            payload["error"]
                .as_str()
                .map(|e| format!(" (error: {e})"))
                .unwrap_or_default(),
        ),
        "error" => println!(
            "  {} {}",
            payload["type"].as_str().unwrap_or("error"),
            payload["message"].as_str().unwrap_or_default(),
        ),
        "missed" => eprintln!("  ... missed {} events", payload["count"]),
        "pong" => {}
        other => eprintln!("unknown frame type {other:?}"),
    }
}

fn summarize_request(record: &Value) -> String {
    format!(
        "{} {} {} {:.2}ms queries={} errors={} [{}]",
        record["method"].as_str().unwrap_or("?"),
        record["path"].as_str().unwrap_or("?"),
        record["status_code"],
        record["duration_ms"].as_f64().unwrap_or_default(),
        record["queries"].as_array().map_or(0, Vec::len),
        record["errors"].as_array().map_or(0, Vec::len),
        record["id"].as_str().unwrap_or("?"),
    )
}

fn websocket_base(http_url: &str) -> String {
    let trimmed = http_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: debug bar API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
