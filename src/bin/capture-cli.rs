use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "capture-cli")]
#[command(about = "Operator CLI for the capture proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy status and connected observers
    Status,
    /// Show the request record for a document id
    Request {
        id: u64,
        /// Decode and print the raw request dump instead of the record
        #[arg(long)]
        dump: bool,
    },
    /// Show the response record for a document id
    Response {
        id: u64,
        /// Decode and print the stored body instead of the record
        #[arg(long)]
        body: bool,
    },
    /// Stream live request notifications
    Watch {
        /// Proxy user, as `name:password`
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    match cli.command {
        Commands::Status => {
            let res = client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res, None).await?;
        }
        Commands::Request { id, dump } => {
            let res = client
                .get(format!("{}/admin/requests/{id}", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res, dump.then_some("dump")).await?;
        }
        Commands::Response { id, body } => {
            let res = client
                .get(format!("{}/admin/responses/{id}", cli.url))
                .headers(headers)
                .send()
                .await?;
            print_response(res, body.then_some("body")).await?;
        }
        Commands::Watch { user } => watch(&cli.url, user.as_deref()).await?,
    }

    Ok(())
}

/// Pretty-print the JSON body, or base64-decode one of its fields.
async fn print_response(
    res: reqwest::Response,
    decode_field: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    match decode_field {
        Some(field) => {
            let encoded = json[field].as_str().unwrap_or_default();
            let raw = STANDARD.decode(encoded)?;
            println!("{}", String::from_utf8_lossy(&raw));
        }
        None => println!("{}", serde_json::to_string_pretty(&json)?),
    }
    Ok(())
}

async fn watch(admin_url: &str, user: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let ws_url = format!("{}/ws", admin_url.replacen("http", "ws", 1));
    let mut request = ws_url.as_str().into_client_request()?;
    if let Some(user) = user {
        let value = format!("Basic {}", STANDARD.encode(user));
        request.headers_mut().insert(AUTHORIZATION, value.parse()?);
    }

    let (mut stream, _) = tokio_tungstenite::connect_async(request).await?;
    eprintln!("Watching {ws_url}");
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => println!("{text}"),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
