//! `add`, `remove`, `sync`, and `request`: run one change transaction

use anyhow::{Context as AnyhowContext, Result, bail};
use colored::Colorize;
use converge::{ChangeOrchestrator, ChangeRequest, FinalState, Outcome, SudoProvider};
use std::fs;
use std::io::{IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;

use crate::Context;
use crate::progress::TerminalStatus;
use crate::sudo::SudoContext;
use crate::ui;

/// Build the orchestrator for this host, acquiring sudo if configured.
///
/// Without a terminal sudo must already work non-interactively.
pub fn orchestrator(ctx: &Context) -> Result<ChangeOrchestrator> {
    let config = ctx.facts.orchestrator_config(&ctx.config);
    let sudo: Option<Arc<dyn SudoProvider>> = if ctx.elevate {
        let sudo = if std::io::stdin().is_terminal() {
            SudoContext::acquire(&format!("apply changes to {}", config.config_root.display()))?
        } else {
            SudoContext::non_interactive()?
        };
        Some(Arc::new(sudo))
    } else {
        None
    };
    Ok(ChangeOrchestrator::from_config(&config, sudo))
}

pub fn run(ctx: &Context, request: &ChangeRequest) -> Result<()> {
    let orchestrator = orchestrator(ctx)?;
    if !ctx.quiet {
        ui::info(&format!(
            "{} on {} [{}]",
            request.to_string().bold(),
            ctx.facts.config_root.display(),
            request.fingerprint().short().dimmed()
        ));
    }

    let mut status = TerminalStatus::new(&request.to_string(), ctx.quiet, ctx.config.status_file());
    let outcome = orchestrator.apply(request, &mut status);
    status.finish();
    log::debug!("{} progress markers recorded", status.history().len());

    report(ctx, &outcome)
}

/// Apply a serialized request; `-` reads stdin
pub fn run_file(ctx: &Context, file: &Path) -> Result<()> {
    let json = if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Could not read request from stdin")?;
        buf
    } else {
        fs::read_to_string(file).with_context(|| format!("Could not read {}", file.display()))?
    };

    let request = match ChangeRequest::from_json(&json) {
        Ok(request) => request,
        Err(e) => return report(ctx, &Outcome::failure(None, &e)),
    };
    run(ctx, &request)
}

fn report(ctx: &Context, outcome: &Outcome) -> Result<()> {
    if ctx.verbose > 0 {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    }

    match outcome.state {
        FinalState::Applied | FinalState::Skipped => {
            if !ctx.quiet {
                ui::success(&format!(
                    "{} ({})",
                    outcome.result_text,
                    ui::state_label(outcome.state)
                ));
            }
            Ok(())
        }
        FinalState::Fatal => {
            ui::error(&format!("{}", ui::state_label(outcome.state)));
            if let Some(err) = &outcome.error_text {
                ui::error(err);
            }
            ui::dim("Restore the configuration root, then run `stagehand repair --clear`");
            bail!("configuration root needs operator repair")
        }
        state => {
            let err = outcome.error_text.as_deref().unwrap_or("unknown error");
            ui::error(&format!("{} ({})", outcome.result_text, ui::state_label(state)));
            bail!("{err}")
        }
    }
}
