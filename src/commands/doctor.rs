use anyhow::Result;
use colored::Colorize;
use converge::{FatalRecord, RootLayout};
use runlist::RunListDocument;
use std::path::Path;

use crate::Context;
use crate::paths;
use crate::runner;
use crate::sudo::{self, SudoContext};
use crate::ui;

struct Issue {
    category: &'static str,
    summary: String,
    detail: Option<String>,
    fix: Option<String>,
    fix_cmd: Option<String>,
}

pub fn run(ctx: &Context) -> Result<()> {
    ui::header("Host Health Check");

    let mut issues: Vec<Issue> = Vec::new();

    check_agent_config(&mut issues);
    check_root(ctx, &mut issues);
    check_tool(ctx, &mut issues);
    check_elevation(ctx, &mut issues);

    println!();
    if issues.is_empty() {
        ui::success("Ready to converge");
    } else {
        print_issue_summary(&issues);
    }

    Ok(())
}

fn print_issue_summary(issues: &[Issue]) {
    let count = issues.len();
    let label = if count == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{count} {label} Found"));

    for (i, issue) in issues.iter().enumerate() {
        let num = i + 1;
        println!(
            "  {}  {} {}",
            format!("{num}.").bold(),
            issue.summary,
            format!("[{}]", issue.category).dimmed()
        );
        if let Some(detail) = &issue.detail {
            for line in detail.lines() {
                println!("      {}", line.dimmed());
            }
        }
        if let Some(fix) = &issue.fix {
            println!("      {} {}", "Fix:".cyan(), fix);
        }
        if let Some(cmd) = &issue.fix_cmd {
            println!("      {} {}", "$".dimmed(), cmd.bold());
        }
        println!();
    }

    let fix_cmds: Vec<&str> = issues.iter().filter_map(|i| i.fix_cmd.as_deref()).collect();
    if !fix_cmds.is_empty() {
        ui::section("Quick Fixes");
        println!();
        for cmd in &fix_cmds {
            println!("    {}", cmd.bold());
        }
    }
}

fn ok(label: &str, detail: &str) {
    println!("  {} {} {}", "✓".green(), label, detail.dimmed());
}

fn bad(label: &str, detail: &str) {
    println!("  {} {} {}", "✗".red(), label, detail.red());
}

fn check_agent_config(issues: &mut Vec<Issue>) {
    ui::section("Agent Configuration");

    match paths::config_file() {
        Ok(file) if file.exists() => ok("config.toml", &file.display().to_string()),
        Ok(file) => println!(
            "  {} config.toml {}",
            "○".dimmed(),
            format!("(defaults; {} not found)", file.display()).dimmed()
        ),
        Err(e) => {
            bad("config.toml", "(unresolvable)");
            issues.push(Issue {
                category: "Agent Configuration",
                summary: "Could not determine config directory".into(),
                detail: Some(format!("{e}")),
                fix: Some(format!("Set $HOME or {}", paths::ENV_CONFIG_DIR)),
                fix_cmd: None,
            });
        }
    }
}

fn check_root(ctx: &Context, issues: &mut Vec<Issue>) {
    ui::section("Configuration Root");
    let layout = RootLayout::new(&ctx.facts.config_root);
    let root = layout.root().display().to_string();

    if let Some(record) = FatalRecord::read(&layout.fatal_path(), layout.root()) {
        bad("fatal sentinel", &record.reason);
        issues.push(Issue {
            category: "Configuration Root",
            summary: "Root was lost during a promotion and is fenced off".into(),
            detail: Some(format!(
                "recorded {}\nprevious root: {}",
                record.recorded_at,
                record
                    .backup
                    .as_deref()
                    .map_or_else(|| "unknown".into(), |p| p.display().to_string())
            )),
            fix: Some("Restore the root, then clear the sentinel".into()),
            fix_cmd: Some("stagehand repair --clear".into()),
        });
    }

    if !layout.exists() {
        bad("root", &format!("{root} (missing)"));
        issues.push(Issue {
            category: "Configuration Root",
            summary: format!("{root} does not exist"),
            detail: None,
            fix: Some("Create the root or point --root at an existing one".into()),
            fix_cmd: Some(format!("mkdir -p {root}")),
        });
        return;
    }
    ok("root", &root);

    match RunListDocument::load_or_default(layout.root()) {
        Ok(doc) => {
            ok(runlist::SOLO_JSON, &format!("{} entries", doc.run_list.len()));
            let missing: Vec<String> = doc
                .run_list
                .iter()
                .filter(|e| !e.exists_in(layout.root()))
                .map(runlist::UnitRef::qualified)
                .collect();
            if !missing.is_empty() {
                issues.push(Issue {
                    category: "Configuration Root",
                    summary: format!("{} run list entries have no recipe", missing.len()),
                    detail: Some(missing.join("\n")),
                    fix: None,
                    fix_cmd: None,
                });
            }
            if !doc.run_list.is_category_ordered() {
                issues.push(Issue {
                    category: "Configuration Root",
                    summary: "Run list is not grouped by category".into(),
                    detail: Some("Expected every lib entry, then default, then validate".into()),
                    fix: Some("Re-apply any unit with --force to rewrite the list".into()),
                    fix_cmd: None,
                });
            }
        }
        Err(e) => {
            bad(runlist::SOLO_JSON, "(unreadable)");
            issues.push(Issue {
                category: "Configuration Root",
                summary: format!("{} cannot be parsed", runlist::SOLO_JSON),
                detail: Some(format!("{e}")),
                fix: None,
                fix_cmd: None,
            });
        }
    }

    match layout.list_staging() {
        Ok(leftovers) if !leftovers.is_empty() => {
            bad("staging", &format!("{} leftover", leftovers.len()));
            issues.push(Issue {
                category: "Configuration Root",
                summary: "Staging directories left behind by interrupted runs".into(),
                detail: Some(
                    leftovers
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join("\n"),
                ),
                fix: Some("Remove them once no apply is running".into()),
                fix_cmd: None,
            });
        }
        Ok(_) => ok("staging", "clean"),
        Err(e) => log::warn!("Could not list staging directories: {e}"),
    }
}

fn check_tool(ctx: &Context, issues: &mut Vec<Issue>) {
    ui::section("Convergence Tool");
    let tool = &ctx.config.tool;

    if let Some(found) = runner::find_program(&tool.program) {
        let version = runner::version_line(&tool.program).unwrap_or_default();
        ok(&tool.program, &format!("{} {version}", found.display()));
    } else {
        bad(&tool.program, "(missing)");
        issues.push(Issue {
            category: "Convergence Tool",
            summary: format!("{} is not on PATH", tool.program),
            detail: None,
            fix: Some("Install it or set [tool].program in config.toml".into()),
            fix_cmd: None,
        });
    }

    let script = Path::new(&tool.script);
    let resolved = if script.is_absolute() {
        script.to_path_buf()
    } else {
        ctx.facts.config_root.join(script)
    };
    if resolved.is_file() {
        ok(&tool.script, &resolved.display().to_string());
    } else {
        bad(&tool.script, "(missing)");
        issues.push(Issue {
            category: "Convergence Tool",
            summary: format!("Tool script {} not found", resolved.display()),
            detail: Some("Relative scripts resolve against the staged root".into()),
            fix: None,
            fix_cmd: None,
        });
    }
}

fn check_elevation(ctx: &Context, issues: &mut Vec<Issue>) {
    ui::section("Elevation");
    ok("exec user", &format!("{} ({})", ctx.facts.exec_user, ctx.facts.exec_home.display()));

    if !ctx.elevate {
        println!("  {} sudo {}", "○".dimmed(), "(disabled)".dimmed());
        return;
    }
    if sudo::is_root() {
        ok("sudo", "(running as root)");
        return;
    }
    if runner::find_program("sudo").is_none() {
        bad("sudo", "(missing)");
        issues.push(Issue {
            category: "Elevation",
            summary: "sudo is not installed but elevation is enabled".into(),
            detail: None,
            fix: Some("Set [agent].elevate = false or pass --no-elevate".into()),
            fix_cmd: None,
        });
        return;
    }
    if SudoContext::is_valid() {
        ok("sudo", "(credentials cached)");
    } else {
        println!(
            "  {} sudo {}",
            "○".dimmed(),
            "(will prompt on apply)".dimmed()
        );
    }
}
