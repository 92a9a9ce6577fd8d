//! Output formatting for CLI responses

use anyhow::Error;
use colored::Colorize;
use fwutil_update::prelude::*;
use serde_json::{Value, json};

use crate::error::CliError;

fn print_json(value: &Value, what: &str) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format {what} as JSON: {e}"),
    }
}

fn error_type_name(error: &Error) -> &'static str {
    if let Some(cli) = error.downcast_ref::<CliError>() {
        return match cli {
            CliError::InvalidTable(_) => "invalid_table",
            CliError::ComponentNotFound { .. } => "component_not_found",
            CliError::Locked { .. } => "locked",
            CliError::IoError(_) => "io",
            CliError::JsonError(_) => "json",
            CliError::ConfigError(_) => "config",
            CliError::Update(e) => e.reason().as_str(),
        };
    }
    match error.downcast_ref::<UpdateError>() {
        Some(e) => e.reason().as_str(),
        None => "other",
    }
}

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
            "type": error_type_name(error)
        }
    });
    print_json(&error_json, "error");
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Print the outcome of an update run
pub fn print_report(report: &UpdateReport, json: bool) {
    if json {
        let mut summary = report.to_json();
        if let Some(object) = summary.as_object_mut() {
            object.insert("success".to_owned(), Value::Bool(report.is_success()));
        }
        print_json(&summary, "update report");
        return;
    }

    let mode = if report.forced() { " (forced)" } else { "" };
    println!("{} {}{}", "Updating".bold(), report.component(), mode);
    for transition in report.transitions() {
        let state = match transition.state {
            UpdateState::Done => transition.state.to_string().green(),
            UpdateState::Failed(_) => transition.state.to_string().red(),
            _ => transition.state.to_string().normal(),
        };
        println!(
            "  {:<24} {}",
            state,
            transition.at.format("%H:%M:%S%.3f").to_string().dimmed()
        );
    }

    match report.error() {
        None if report.is_success() => {
            println!("{} {} updated", "✓".green(), report.component());
        }
        Some(UpdateError::NotSupported { .. }) => {
            println!("{} {} cannot be updated", "-".yellow(), report.component());
        }
        Some(error) => {
            println!("{} {} update failed: {error}", "✗".red(), report.component());
        }
        None => println!("{} {} did not finish", "✗".red(), report.component()),
    }
}

/// One line of `version` output.
#[derive(Debug)]
pub struct VersionLine {
    pub component: ComponentId,
    pub version: Result<String, String>,
}

/// Print collected versions as JSON
pub fn print_versions_json(versions: &[VersionLine]) {
    let entries: Vec<Value> = versions
        .iter()
        .map(|line| match &line.version {
            Ok(version) => json!({"component": line.component, "version": version}),
            Err(error) => json!({"component": line.component, "version": null, "error": error}),
        })
        .collect();
    print_json(&json!({"success": true, "versions": entries}), "versions");
}

/// Print the registered components and aliases
pub fn print_list(registry: &ComponentRegistry, json: bool) {
    let mut aliases: Vec<_> = registry.aliases().collect();
    aliases.sort();

    if json {
        let components: Vec<Value> = registry
            .iter()
            .map(|c| json!({"component": c.id(), "kind": c.kind()}))
            .collect();
        let aliases: Vec<Value> = aliases
            .iter()
            .map(|(id, target)| json!({"alias": id, "target": target}))
            .collect();
        print_json(
            &json!({"success": true, "components": components, "aliases": aliases}),
            "component list",
        );
        return;
    }

    if registry.is_empty() {
        println!("{}", "No components configured".yellow());
        return;
    }
    println!("{}", "Components:".bold());
    for component in registry.iter() {
        println!("  {:<28} {}", component.id().to_string(), component.kind().to_string().dimmed());
    }
    if !aliases.is_empty() {
        println!("{}", "Aliases:".bold());
        for (id, target) in aliases {
            println!("  {:<28} -> {}", id.to_string(), target);
        }
    }
}

/// Print the verdict of `validate`
pub fn print_validation(image: &str, verdicts: &[(String, Result<(), String>)], json: bool) {
    let matched = verdicts
        .iter()
        .find_map(|(name, verdict)| verdict.is_ok().then_some(name.as_str()));

    if json {
        let layouts: Vec<Value> = verdicts
            .iter()
            .map(|(name, verdict)| match verdict {
                Ok(()) => json!({"layout": name, "valid": true}),
                Err(reason) => json!({"layout": name, "valid": false, "reason": reason}),
            })
            .collect();
        print_json(
            &json!({"success": matched.is_some(), "image": image, "matched": matched, "layouts": layouts}),
            "validation result",
        );
        return;
    }

    for (name, verdict) in verdicts {
        match verdict {
            Ok(()) => println!("  {} {name}", "✓".green()),
            Err(reason) => println!("  {} {name}: {reason}", "✗".red()),
        }
    }
    match matched {
        Some(name) => println!("{} {image} matches layout '{name}'", "Valid:".green().bold()),
        None => println!("{} {image} matches no layout", "Invalid:".red().bold()),
    }
}
