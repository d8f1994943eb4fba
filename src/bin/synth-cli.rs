use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

use synth_orchestrator::protocol::ProtocolMessage;
use synth_orchestrator::{Priority, SynthesisRequest};

#[derive(Parser)]
#[command(name = "synth-cli")]
#[command(about = "Management CLI for the synthesis orchestrator", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8090")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pool, worker and request status
    Status,
    /// Negotiate a protocol version, e.g. "^1.0"
    Negotiate { requirement: String },
    /// Submit a synthesis request
    Synthesize {
        text: String,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long, default_value = "normal")]
        priority: Priority,
        #[arg(long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            let mut headers = HeaderMap::new();
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
            );
            let res = client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Negotiate { requirement } => {
            let res = client
                .post(format!("{}/v1/negotiate", cli.url))
                .json(&json!({ "version": requirement }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Synthesize {
            text,
            voice,
            priority,
            output,
        } => {
            let mut request = SynthesisRequest::new(text).with_priority(priority);
            if let Some(voice) = voice {
                request = request.with_voice(voice);
            }
            if let Some(output) = output {
                request = request.with_output_target(output);
            }
            let res = client
                .post(format!("{}/v1/synthesize", cli.url))
                .json(&ProtocolMessage::request(request))
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: orchestrator returned status {}", status);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
