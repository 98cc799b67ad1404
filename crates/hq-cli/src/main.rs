//! # hq — HOSTQUERY command line
//!
//! - `hq search "<query>"` — run a query through the hub.
//! - `hq convert "<query>"` — show the search DSL a query turns into.
//! - `hq seed` — recreate the inventory index with sample hosts.
//! - `hq health` — check that the hub is up.

use clap::{Parser, Subcommand};
use hq_core::HostDocument;
use serde_json::{json, Value};
use tabled::{Table, Tabled};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// HOSTQUERY — search the host inventory with a one-clause query language.
#[derive(Parser)]
#[command(name = "hq", version, about, long_about = None)]
struct Cli {
    /// Hub base URL.
    #[arg(long, env = "HQ_BASE_URL", default_value = "http://127.0.0.1:8000", global = true)]
    base_url: String,

    /// Bearer token for the hub API.
    #[arg(long, env = "HQ_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the inventory, e.g. `hq search "Hostname = octoxlabs*"`.
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 10)]
        page_size: usize,
        /// Print the raw JSON response instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Convert a query to search DSL without running it.
    Convert { query: String },

    /// Recreate the inventory index and load the sample hosts.
    Seed {
        /// Search cluster URL.
        #[arg(long, env = "HQ_SEARCH_URL", default_value = "http://localhost:9200")]
        search_url: String,
        #[arg(long, default_value = "hosts")]
        index: String,
    },

    /// Check hub health.
    Health,
}

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "Hostname")]
    hostname: String,
    #[tabled(rename = "Ip")]
    ip: String,
}

impl From<&HostDocument> for HostRow {
    fn from(doc: &HostDocument) -> Self {
        Self {
            hostname: doc.hostname.clone(),
            ip: doc.ip.join(", "),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base_url = cli.base_url.trim_end_matches('/').to_string();
    let token = cli.token.as_deref();

    let result = match cli.command {
        Commands::Search {
            query,
            page,
            page_size,
            json,
        } => search(&client, &base_url, token, &query, page, page_size, json).await,
        Commands::Convert { query } => convert(&client, &base_url, token, &query).await,
        Commands::Seed { search_url, index } => {
            seed(&client, search_url.trim_end_matches('/'), &index).await
        }
        Commands::Health => health(&client, &base_url).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn search(
    client: &reqwest::Client,
    base_url: &str,
    token: Option<&str>,
    query: &str,
    page: usize,
    page_size: usize,
    raw: bool,
) -> CliResult {
    let url = format!(
        "{}/api/search?page={}&page_size={}",
        base_url, page, page_size
    );
    let body = expect_success(post_request(client, &url, token, &json!({ "query": query })).await?)
        .await?;

    if raw {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let hosts: Vec<HostDocument> = serde_json::from_value(body["results"].clone())?;
    let total = body["total"].as_u64().unwrap_or(hosts.len() as u64);
    println!("Found {} results (page {}):", total, page);
    if !hosts.is_empty() {
        println!("{}", host_table(&hosts));
    }
    Ok(())
}

async fn convert(
    client: &reqwest::Client,
    base_url: &str,
    token: Option<&str>,
    query: &str,
) -> CliResult {
    let url = format!("{}/api/convert", base_url);
    let body = expect_success(post_request(client, &url, token, &json!({ "query": query })).await?)
        .await?;
    println!("{}", serde_json::to_string_pretty(&body["query"])?);
    Ok(())
}

async fn seed(client: &reqwest::Client, search_url: &str, index: &str) -> CliResult {
    let index_url = format!("{}/{}", search_url, index);

    if client.head(&index_url).send().await?.status().is_success() {
        eprintln!("Deleting existing index '{}'...", index);
        client.delete(&index_url).send().await?.error_for_status()?;
    }

    eprintln!("Creating index '{}' with mapping...", index);
    client
        .put(&index_url)
        .json(&inventory_mapping())
        .send()
        .await?
        .error_for_status()?;

    let response: Value = client
        .post(format!("{}/_bulk?refresh=true", search_url))
        .header("Content-Type", "application/x-ndjson")
        .body(bulk_body(index, &sample_hosts())?)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    if response["errors"].as_bool().unwrap_or(false) {
        return Err(format!("bulk load reported errors: {}", response).into());
    }

    let count: Value = client
        .get(format!("{}/_count", index_url))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    println!(
        "Loaded {} documents into '{}'",
        count["count"].as_u64().unwrap_or(0),
        index
    );
    Ok(())
}

async fn health(client: &reqwest::Client, base_url: &str) -> CliResult {
    let body = expect_success(client.get(format!("{}/health", base_url)).send().await?).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn expect_success(
    resp: reqwest::Response,
) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(format!("{} {}", status, text).into());
    }
    Ok(serde_json::from_str(&text)?)
}

async fn post_request(
    client: &reqwest::Client,
    url: &str,
    key: Option<&str>,
    json: &Value,
) -> Result<reqwest::Response, reqwest::Error> {
    let mut req = client.post(url).json(json);
    if let Some(k) = key {
        req = req.header("Authorization", format!("Bearer {}", k));
    }
    req.send().await
}

fn host_table(hosts: &[HostDocument]) -> String {
    Table::new(hosts.iter().map(HostRow::from)).to_string()
}

fn inventory_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "Hostname": { "type": "keyword" },
                "Ip": { "type": "keyword" }
            }
        }
    })
}

fn sample_hosts() -> Vec<HostDocument> {
    let host = |name: &str, ips: &[&str]| {
        HostDocument::new(name, ips.iter().map(|ip| ip.to_string()).collect())
    };
    vec![
        host("octoxlabs01", &["192.168.1.101", "10.0.0.101"]),
        host("octoxlabs02", &["192.168.1.102"]),
        host("octoxlabs-prod01", &["10.0.1.101", "10.0.2.101"]),
        host("octoxlabs-prod02", &["10.0.1.102"]),
        host("octoxlabs-dev01", &["172.16.1.101"]),
        host("octoxlabs-staging01", &["172.16.2.101", "172.16.2.102"]),
    ]
}

/// NDJSON body for the `_bulk` endpoint: an action line before each document.
fn bulk_body(index: &str, hosts: &[HostDocument]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for host in hosts {
        body.push_str(&json!({ "index": { "_index": index } }).to_string());
        body.push('\n');
        body.push_str(&serde_json::to_string(host)?);
        body.push('\n');
    }
    Ok(body)
}
