use std::collections::BTreeMap;

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "mediator-cli")]
#[command(about = "Client for the queue-mediator ingress API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a message
    Submit {
        /// JSON payload
        payload: String,

        /// Metadata entries as key=value (value parsed as JSON when possible)
        #[arg(short, long = "meta")]
        metadata: Vec<String>,

        /// Headers to forward as name=value
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Explicit correlation id
        #[arg(long)]
        correlation_id: Option<String>,
    },
    /// Show the status of a message
    Status { correlation_id: String },
    /// Show the result of a message
    Result { correlation_id: String },
    /// Check ingress health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Submit {
            payload,
            metadata,
            headers,
            correlation_id,
        } => {
            let payload: Value = serde_json::from_str(&payload)?;
            let mut meta = Map::new();
            for (key, value) in metadata.iter().map(|m| split_pair(m)).collect::<Result<Vec<_>, _>>()? {
                let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
                meta.insert(key.to_string(), value);
            }
            let mut header_map = BTreeMap::new();
            for (name, value) in headers.iter().map(|h| split_pair(h)).collect::<Result<Vec<_>, _>>()? {
                header_map.insert(name.to_string(), value.to_string());
            }

            let mut body = json!({
                "payload": payload,
                "metadata": meta,
                "headers": header_map,
            });
            if let Some(id) = correlation_id {
                body["correlation_id"] = Value::String(id);
            }

            let res = client
                .post(format!("{}/api/v1/submit", base))
                .json(&body)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Status { correlation_id } => {
            let res = client
                .get(format!("{}/api/v1/status/{}", base, correlation_id))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Result { correlation_id } => {
            let res = client
                .get(format!("{}/api/v1/response/{}", base, correlation_id))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Health => {
            let res = client.get(format!("{}/health", base)).send().await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

fn split_pair(raw: &str) -> Result<(&str, &str), String> {
    raw.split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: mediator returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
