//! `runlist show | merge | sort`: read-only run list planning

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use runlist::{Category, RunList, RunListDocument, UnitRef};

use crate::Context;
use crate::cli::RunlistCommand;
use crate::ui;

pub fn run(ctx: &Context, cmd: RunlistCommand) -> Result<()> {
    let root = &ctx.facts.config_root;
    let doc = RunListDocument::load(&RunListDocument::path_in(root))
        .with_context(|| format!("Could not load run list from {}", root.display()))?;

    match cmd {
        RunlistCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&doc.run_list)?);
            } else {
                ui::header(&format!("Run list ({})", root.display()));
                print_entries(&doc.run_list, root);
                if !doc.run_list.is_category_ordered() {
                    println!();
                    ui::warn("Run list is not grouped lib → default → validate");
                }
            }
        }
        RunlistCommand::Merge { units } => {
            let added: Vec<&str> = units.iter().map(String::as_str).collect();
            let merged = doc.run_list.merge(&added, root)?;
            ui::header("Merged run list (not saved)");
            print_entries(&merged, root);
        }
        RunlistCommand::Sort { unit, deps } => {
            let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
            let sorted = doc.run_list.sorted_with_priority(&unit, &deps, root)?;
            ui::header(&format!("Priority order for {unit} (not saved)"));
            ui::section("lib");
            print_group(&sorted.lib);
            ui::section("default");
            print_group(&sorted.default);
            ui::section("validate");
            print_group(&sorted.validate);
        }
    }
    Ok(())
}

fn print_entries(run_list: &RunList, root: &std::path::Path) {
    if run_list.is_empty() {
        ui::dim("(empty)");
        return;
    }
    for (i, entry) in run_list.iter().enumerate() {
        let marker = if entry.exists_in(root) {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "  {:>3}. {} {} {}",
            i + 1,
            marker,
            entry,
            category_tag(entry.category())
        );
    }
}

fn print_group(entries: &[UnitRef]) {
    if entries.is_empty() {
        ui::dim("(none)");
    }
    for entry in entries {
        println!("  {}", entry.qualified());
    }
}

fn category_tag(category: Category) -> colored::ColoredString {
    let tag = format!("[{category}]");
    match category {
        Category::Lib => tag.blue(),
        Category::Default => tag.dimmed(),
        Category::Validate => tag.magenta(),
    }
}
