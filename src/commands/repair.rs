use anyhow::{Result, bail};
use converge::{FatalRecord, RootLayout, clear_fatal};

use crate::Context;
use crate::ui;

/// Show the fatal sentinel for the root and optionally clear it
pub fn run(ctx: &Context, clear: bool) -> Result<()> {
    let layout = RootLayout::new(&ctx.facts.config_root);
    let sentinel = layout.fatal_path();

    let Some(record) = FatalRecord::read(&sentinel, layout.root()) else {
        ui::success(&format!("{} is not fenced off", layout.root().display()));
        return Ok(());
    };

    ui::header("Fatal Promotion Failure");
    ui::kv("Root", &record.root.display().to_string());
    ui::kv("Reason", &record.reason);
    ui::kv("Recorded", &record.recorded_at);
    if let Some(backup) = &record.backup {
        ui::kv("Previous root", &backup.display().to_string());
    }
    if let Some(staging) = &record.staging {
        ui::kv("Unpromoted staging", &staging.display().to_string());
    }
    println!();

    if !clear {
        ui::info("Restore the configuration root by hand, for example:");
        if let Some(backup) = &record.backup {
            ui::dim(&format!(
                "mv {} {}",
                backup.display(),
                layout.root().display()
            ));
        }
        ui::dim("stagehand repair --clear");
        return Ok(());
    }

    if !layout.exists() {
        bail!(
            "{} still does not exist; restore it before clearing the sentinel",
            layout.root().display()
        );
    }

    if clear_fatal(&sentinel, layout.root())? {
        ui::success("Sentinel cleared; changes will be accepted again");
    }
    Ok(())
}
