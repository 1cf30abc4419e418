use anyhow::Result;
use colored::Colorize;
use converge::{AppliedMarkers, FatalRecord, RootLayout};
use runlist::RunListDocument;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let layout = RootLayout::new(&ctx.facts.config_root);
    ui::header("Configuration Root");

    ui::kv("Root", &layout.root().display().to_string());
    ui::kv("User", &ctx.facts.exec_user);
    ui::kv(
        "Elevation",
        if ctx.elevate { "sudo" } else { "none" },
    );

    if let Some(record) = FatalRecord::read(&layout.fatal_path(), layout.root()) {
        println!();
        ui::error(&format!("{} {}", "FATAL:".red().bold(), record.reason));
        ui::kv("Recorded", &record.recorded_at);
        if let Some(backup) = &record.backup {
            ui::kv("Previous root", &backup.display().to_string());
        }
        if let Some(staging) = &record.staging {
            ui::kv("Unpromoted staging", &staging.display().to_string());
        }
        ui::dim("Restore the root, then run `stagehand repair --clear`");
    }

    if !layout.exists() {
        println!();
        ui::warn("Configuration root does not exist");
        return Ok(());
    }

    show_run_list(ctx, &layout)?;
    show_applied(ctx, &layout)?;
    show_backups(&layout)?;

    println!();
    Ok(())
}

fn show_run_list(ctx: &Context, layout: &RootLayout) -> Result<()> {
    ui::section("Run list");
    match RunListDocument::load_or_default(layout.root()) {
        Ok(doc) => {
            ui::kv("Entries", &doc.run_list.len().to_string());
            ui::kv("Units", &doc.run_list.units().join(", "));
            if ctx.verbose > 0 {
                for entry in &doc.run_list {
                    ui::dim(&entry.qualified());
                }
            }
        }
        Err(e) => ui::error(&format!("{e}")),
    }
    Ok(())
}

fn show_applied(ctx: &Context, layout: &RootLayout) -> Result<()> {
    ui::section("Applied changes");
    let markers = AppliedMarkers::new(layout.root());
    let applied = markers.list()?;
    if applied.is_empty() {
        ui::dim("(none)");
    }
    for request in &applied {
        let fp = request.fingerprint();
        if ctx.verbose > 0 {
            println!("  {} {}", fp.as_str().dimmed(), request);
        } else {
            println!("  {} {}", fp.short().dimmed(), request);
        }
    }
    Ok(())
}

fn show_backups(layout: &RootLayout) -> Result<()> {
    ui::section("Backups");
    let backups = layout.list_backups()?;
    ui::kv("Count", &backups.len().to_string());
    if let Some(latest) = backups.last() {
        ui::kv("Latest", &latest.display().to_string());
    }

    let leftovers = layout.list_staging()?;
    if !leftovers.is_empty() {
        ui::warn(&format!(
            "{} staging director{} left behind by interrupted runs",
            leftovers.len(),
            if leftovers.len() == 1 { "y" } else { "ies" }
        ));
        for dir in &leftovers {
            ui::dim(&dir.display().to_string());
        }
    }
    Ok(())
}
