//! Proxies command - list cache proxy daemons

use std::path::PathBuf;

use chrono::Utc;
use console::style;
use tracing::warn;

use crate::cli::args::{OutputFormat, ProxiesArgs};
use crate::error::KubecacheResult;
use crate::proxymgr::{ProxyManager, ProxyRecord, ProxyState};
use crate::ui::{self, UiContext};

/// Execute the proxies command
pub async fn execute(args: ProxiesArgs, data_root: PathBuf) -> KubecacheResult<()> {
    let manager = ProxyManager::new(data_root, Vec::new());

    let records = if args.names.is_empty() {
        manager.list()?
    } else {
        let mut records = Vec::new();
        for name in &args.names {
            match manager.get(name) {
                Ok(record) => records.push(record),
                Err(e) => warn!("get proxy {:?} error: {}", name, e),
            }
        }
        records
    };

    if records.is_empty() {
        match args.output {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No cache proxies running");
            }
        }
        return Ok(());
    }

    match args.output {
        OutputFormat::Table => print_table(&records),
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Plain => {
            for record in &records {
                println!("{}", record.fingerprint);
            }
        }
    }

    Ok(())
}

fn print_table(records: &[ProxyRecord]) {
    println!(
        "{:<12} {:<8} {:<7} {:<9} {:<6} {}",
        style("NAME").bold(),
        style("PID").bold(),
        style("PORT").bold(),
        style("STATE").bold(),
        style("AGE").bold(),
        style("MESSAGE").bold(),
    );

    let now = Utc::now();
    for record in records {
        let state = match record.state {
            ProxyState::Ready => style("Ready").green(),
            ProxyState::Pending => style("Pending").yellow(),
            ProxyState::Dead => style("Dead").red(),
        };
        println!(
            "{:<12} {:<8} {:<7} {:<9} {:<6} {}",
            record.fingerprint,
            record.pid,
            record.port,
            state,
            record.age(now),
            record.message,
        );
    }
}

fn print_json(records: &[ProxyRecord]) -> KubecacheResult<()> {
    println!("{}", serde_json::to_string_pretty(records)?);
    Ok(())
}
