//! Get command - read resources through the cache
//!
//! Resolves the client configuration through the proxy-aware provider
//! (finding or spawning a daemon for this configuration's fingerprint) and
//! issues the GET or LIST against it, negotiating a server-side table for
//! human output. If no daemon can be started the request transparently
//! goes straight to the API server.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::cli::args::{GetArgs, OutputFormat};
use crate::client::{ProxyClientConfigProvider, UpstreamClient};
use crate::config::{ClientConfigFlags, ClientConfigProvider, FlagsConfigProvider};
use crate::error::{KubecacheError, KubecacheResult};
use crate::meta::status::Status;
use crate::meta::table::{Table, TABLE_ACCEPT};
use crate::meta::TypeMapper;
use crate::proxymgr::ProxyManager;

/// Execute the get command
pub async fn execute(
    args: GetArgs,
    data_root: PathBuf,
    flags: ClientConfigFlags,
) -> KubecacheResult<()> {
    let inner = Arc::new(FlagsConfigProvider::new(flags.clone()));
    let config = if args.no_cache {
        inner.client_config().await?
    } else {
        let mut spawn_args = flags.to_spawn_args();
        spawn_args.push("--data-root".to_string());
        spawn_args.push(data_root.display().to_string());
        let manager = ProxyManager::new(data_root, spawn_args);
        ProxyClientConfigProvider::new(inner, manager)
            .client_config()
            .await?
    };

    let client = UpstreamClient::new(&config)?;
    let mapper = TypeMapper::new();
    let gvr = mapper.resource_for(&args.resource);

    let namespace = if args.all_namespaces {
        None
    } else {
        Some(flags.namespace.clone().unwrap_or_else(|| "default".to_string()))
    };
    let path = client.resource_path(&gvr, namespace.as_deref(), args.name.as_deref());

    let mut query = Vec::new();
    if let Some(selector) = &args.label_selector {
        query.push(("labelSelector", selector.clone()));
    }
    if let Some(selector) = &args.field_selector {
        query.push(("fieldSelector", selector.clone()));
    }

    let accept = match args.output {
        OutputFormat::Json => "application/json".to_string(),
        _ => format!("{TABLE_ACCEPT},application/json"),
    };
    let response = client
        .http()
        .get(client.url_for(&path))
        .query(&query)
        .header(reqwest::header::ACCEPT, accept)
        .send()
        .await?;

    let code = response.status().as_u16();
    let body: Value = response.json().await?;
    if !(200..300).contains(&code) {
        if let Ok(status) = serde_json::from_value::<Status>(body.clone()) {
            return Err(KubecacheError::api(status));
        }
        return Err(KubecacheError::Internal(format!("HTTP {code}")));
    }

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
        OutputFormat::Plain | OutputFormat::Table => print_body(&body)?,
    }
    Ok(())
}

/// Print a response: tables as columns, anything else as names
fn print_body(body: &Value) -> KubecacheResult<()> {
    if body.get("kind").and_then(Value::as_str) == Some("Table") {
        let table: Table = serde_json::from_value(body.clone())?;
        print_table(&table);
        return Ok(());
    }

    // no table representation negotiated; fall back to names
    if let Some(items) = body.get("items").and_then(Value::as_array) {
        for item in items {
            if let Some(name) = item.pointer("/metadata/name").and_then(Value::as_str) {
                println!("{name}");
            }
        }
    } else if let Some(name) = body.pointer("/metadata/name").and_then(Value::as_str) {
        println!("{name}");
    }
    Ok(())
}

fn print_table(table: &Table) {
    let headers: Vec<String> = table
        .column_definitions
        .iter()
        .map(|c| c.name.to_uppercase())
        .collect();

    let mut rows: Vec<Vec<String>> = vec![headers];
    for row in &table.rows {
        rows.push(row.cells.iter().map(cell_to_string).collect());
    }

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|i| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(String::len)
                .max()
                .unwrap_or(0)
        })
        .collect();

    for row in &rows {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect();
        println!("{}", line.join("   ").trim_end());
    }
}

fn cell_to_string(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
