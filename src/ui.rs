//! Terminal output helpers
//!
//! Interactive sessions get `cliclack` spinners and prompts; pipes and CI
//! fall back to plain line output so scripted use stays parseable.

use std::io::IsTerminal;

use console::style;

use crate::error::{KubecacheError, KubecacheResult};

/// Output behavior for the current environment
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    interactive: bool,
}

impl UiContext {
    /// Detect whether stdout/stdin are a real terminal
    pub fn detect() -> Self {
        let interactive = std::io::stdout().is_terminal()
            && std::io::stdin().is_terminal()
            && std::env::var_os("CI").is_none();
        Self { interactive }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }
}

/// Informational step line
pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.interactive {
        cliclack::log::info(message).ok();
    } else {
        println!("{message}");
    }
}

/// Successful step line
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.interactive {
        cliclack::log::success(message).ok();
    } else {
        println!("{} {}", style("[OK]").green(), message);
    }
}

/// Warning step line
pub fn step_warn(ctx: &UiContext, message: &str) {
    if ctx.interactive {
        cliclack::log::warning(message).ok();
    } else {
        println!("{} {}", style("[WARN]").yellow(), message);
    }
}

/// A task spinner with plain fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.interactive,
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else {
            println!("{} {}", style("[ERROR]").red(), message);
        }
    }
}

/// Yes/no confirmation; non-interactive sessions take the default
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> KubecacheResult<bool> {
    if !ctx.interactive {
        return Ok(default);
    }
    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message).initial_value(default).interact()
    })
    .await
    .map_err(|e| KubecacheError::Internal(format!("prompt task failed: {e}")))?
    .map_err(|e| KubecacheError::Internal(format!("prompt failed: {e}")))
}
