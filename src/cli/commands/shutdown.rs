//! Shutdown command - stop cache proxy daemons

use std::path::PathBuf;

use console::style;
use tracing::warn;

use crate::cli::args::ShutdownArgs;
use crate::error::{KubecacheError, KubecacheResult};
use crate::proxymgr::ProxyManager;
use crate::ui::{self, TaskSpinner, UiContext};

/// Execute the shutdown command
pub async fn execute(args: ShutdownArgs, data_root: PathBuf) -> KubecacheResult<()> {
    let ctx = UiContext::detect();
    let manager = ProxyManager::new(data_root, Vec::new());

    let records = if args.all {
        let records = manager.list()?;
        if !records.is_empty() {
            let message = format!("Shut down {} cache prox(ies)?", records.len());
            if !ui::confirm(&ctx, &message, true).await? {
                return Ok(());
            }
        }
        records
    } else {
        if args.names.is_empty() {
            return Err(KubecacheError::Internal(
                "no proxy names specified (use --all to shut down everything)".to_string(),
            ));
        }
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
        ui::step_info(&ctx, "No cache proxies to shut down");
        return Ok(());
    }

    for record in &records {
        let mut spinner = TaskSpinner::new(&ctx);
        spinner.start(&format!(
            "Shutting down proxy {}...",
            style(&record.fingerprint).cyan()
        ));

        match manager.kill(record, !args.no_wait, args.force).await {
            Ok(()) => spinner.stop(&format!(
                "Proxy {} shut down",
                style(&record.fingerprint).cyan()
            )),
            Err(e) => {
                // a proxy that died on its own is not a failure
                spinner.stop_error(&format!(
                    "Shutting down proxy {}: {}",
                    record.fingerprint, e
                ));
                warn!("kill proxy {:?} error: {}", record.fingerprint, e);
            }
        }
    }

    Ok(())
}
