//! CRAFTS CLI: command-line client for a running CRAFTS server

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use reqwest::{Client, Url};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "crafts", version, about = "CRAFTS resource API CLI")]
struct Cli {
    /// Server HTTP URL
    #[arg(long, default_value = "http://localhost:9000", global = true, env = "CRAFTS_URL")]
    url: String,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one resource
    Get {
        api: String,
        /// Model element id
        #[arg(long)]
        id: String,
        iri: String,
    },
    /// Read several resources of one kind
    List {
        api: String,
        #[arg(long)]
        id: String,
        iris: Vec<String>,
        /// Namespace for prefixed identifiers
        #[arg(long, requires = "nspref")]
        ns: Option<String>,
        /// Prefix used in the identifiers
        #[arg(long, requires = "ns")]
        nspref: Option<String>,
    },
    /// Run a query template; parameters as name=value
    Query {
        api: String,
        template: String,
        params: Vec<String>,
    },
    /// Get server status
    Status,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = Client::new();

    let result = match &cli.command {
        Commands::Status => run(&client, &cli, "status", Vec::new()).await,
        Commands::Get { api, id, iri } => {
            let pairs = vec![("id", id.clone()), ("iri", iri.clone())];
            run(&client, &cli, &format!("apis/{}/resource", api), pairs).await
        }
        Commands::List { api, id, iris, ns, nspref } => {
            let mut pairs = vec![("id", id.clone())];
            pairs.extend(iris.iter().map(|iri| ("iris", iri.clone())));
            if let (Some(ns), Some(nspref)) = (ns, nspref) {
                pairs.push(("ns", ns.clone()));
                pairs.push(("nspref", nspref.clone()));
            }
            run(&client, &cli, &format!("apis/{}/resources", api), pairs).await
        }
        Commands::Query { api, template, params } => match parse_params(params) {
            Ok(parsed) => {
                let mut pairs: Vec<(&str, String)> = vec![("id", template.clone())];
                pairs.extend(parsed.iter().map(|(k, v)| (k.as_str(), v.clone())));
                run(&client, &cli, &format!("apis/{}/query", api), pairs).await
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn parse_params(raw: &[String]) -> CliResult<Vec<(String, String)>> {
    raw.iter()
        .map(|p| {
            p.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| -> Box<dyn std::error::Error> { format!("expected name=value, got \"{}\"", p).into() })
        })
        .collect()
}

async fn run(client: &Client, cli: &Cli, path: &str, pairs: Vec<(&str, String)>) -> CliResult<()> {
    let mut url = Url::parse(&cli.url)?.join(path)?;
    if !pairs.is_empty() {
        let mut query = url.query_pairs_mut();
        for (k, v) in &pairs {
            query.append_pair(k, v);
        }
    }

    let response = client.get(url).send().await?;
    let status = response.status();
    let body: Value = response.json().await?;
    if !status.is_success() {
        let message = body.get("message").and_then(Value::as_str).unwrap_or("request failed");
        return Err(format!("{}: {}", status, message).into());
    }

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
        OutputFormat::Table => print_table(&body),
    }
    Ok(())
}

/// SPARQL result sets become one row per solution; anything else prints as JSON
fn print_table(body: &Value) {
    let vars = body.pointer("/head/vars").and_then(Value::as_array);
    let rows = body.pointer("/results/bindings").and_then(Value::as_array);
    let (Some(vars), Some(rows)) = (vars, rows) else {
        println!("{}", serde_json::to_string_pretty(body).unwrap_or_default());
        return;
    };

    let header: Vec<&str> = vars.iter().filter_map(Value::as_str).collect();
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(&header);
    for row in rows {
        let cells: Vec<String> = header
            .iter()
            .map(|var| {
                row.pointer(&format!("/{}/value", var))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string()
            })
            .collect();
        table.add_row(cells);
    }
    println!("{}", table);
    println!("{} row(s)", rows.len());
}
