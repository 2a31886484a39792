use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::RequestBuilder;
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "reqlog-cli")]
#[command(about = "Admin CLI for the reqlog request logging service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Admin API key. Leave empty when the server has none configured.
    #[arg(short, long, default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the admin API is up
    Health,
    /// List request logs, newest first
    Logs {
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        page_size: i64,
        #[arg(long)]
        method: Option<String>,
        /// Case-sensitive substring of the request path
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        status: Option<u16>,
        /// RFC 3339 lower bound on creation time
        #[arg(long)]
        start: Option<String>,
        /// RFC 3339 upper bound on creation time
        #[arg(long)]
        end: Option<String>,
    },
    /// Show one log entry
    Log { id: i64 },
    /// Show aggregate statistics
    Stats,
    /// Show the live logging settings
    Config,
    /// Update logging settings; omitted flags keep their current value
    SetConfig {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long = "async")]
        async_mode: Option<bool>,
        #[arg(long)]
        buffer_size: Option<usize>,
        /// Comma-separated list of exact paths to skip
        #[arg(long)]
        skip_paths: Option<String>,
        /// JSON object of fields added to every entry
        #[arg(long)]
        custom_fields: Option<String>,
        #[arg(long)]
        time_format: Option<String>,
    },
    /// Restore default logging settings
    ResetConfig,
    /// Delete logs older than the given number of days
    Purge {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if !cli.key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
        );
    }

    let base = cli.url.trim_end_matches('/');
    let request: RequestBuilder = match cli.command {
        Commands::Health => client.get(format!("{base}/admin/health")),
        Commands::Logs {
            page,
            page_size,
            method,
            path,
            status,
            start,
            end,
        } => {
            let mut params = vec![
                ("page", page.to_string()),
                ("page_size", page_size.to_string()),
            ];
            let optional = [
                ("method", method),
                ("path", path),
                ("status_code", status.map(|s| s.to_string())),
                ("start_time", start),
                ("end_time", end),
            ];
            params.extend(optional.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))));
            client.get(format!("{base}/admin/logs")).query(&params)
        }
        Commands::Log { id } => client.get(format!("{base}/admin/logs/{id}")),
        Commands::Stats => client.get(format!("{base}/admin/stats")),
        Commands::Config => client.get(format!("{base}/admin/config")),
        Commands::SetConfig {
            enabled,
            async_mode,
            buffer_size,
            skip_paths,
            custom_fields,
            time_format,
        } => {
            let mut body = Map::new();
            if let Some(enabled) = enabled {
                body.insert("enabled".into(), Value::from(enabled));
            }
            if let Some(async_mode) = async_mode {
                body.insert("async".into(), Value::from(async_mode));
            }
            if let Some(size) = buffer_size {
                body.insert("buffer_size".into(), Value::from(size));
            }
            if let Some(paths) = skip_paths {
                let paths: Vec<Value> = paths
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(Value::from)
                    .collect();
                body.insert("skip_paths".into(), Value::Array(paths));
            }
            if let Some(raw) = custom_fields {
                let fields: Value = serde_json::from_str(&raw)?;
                body.insert("custom_fields".into(), fields);
            }
            if let Some(format) = time_format {
                body.insert("time_format".into(), Value::from(format));
            }
            client
                .put(format!("{base}/admin/config"))
                .json(&Value::Object(body))
        }
        Commands::ResetConfig => client.post(format!("{base}/admin/config/reset")),
        Commands::Purge { days } => client
            .delete(format!("{base}/admin/logs"))
            .query(&[("days", days)]),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: admin API returned status {status}");
        if let Ok(text) = res.text().await {
            eprintln!("Response: {text}");
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
