use std::{path::PathBuf, time::Duration};

use {
    anyhow::Result,
    clap::Subcommand,
    courier_config::CourierConfig,
    courier_forward::{
        rules::RuleBook,
        transfer::{self, ImportMode},
        types::{ChatId, ForwardRule, RuleCreate, RuleOptions},
    },
};

use crate::store;

#[derive(Subcommand)]
pub enum RulesAction {
    /// List every rule.
    List,
    /// Add (or replace) the rule for a source chat.
    Add {
        #[arg(allow_negative_numbers = true)]
        source: ChatId,
        #[arg(allow_negative_numbers = true)]
        target: ChatId,
        /// Option tags: media kinds, `silent`, `handle-edited`, `replyTo:<id>`.
        #[arg(long = "option", value_name = "TAG")]
        options: Vec<String>,
        /// Blocklist keywords.
        #[arg(long = "filter", value_name = "KEYWORD")]
        filters: Vec<String>,
        #[arg(long)]
        source_name: Option<String>,
        #[arg(long)]
        target_name: Option<String>,
    },
    /// Remove the rule for a source chat.
    Remove {
        #[arg(allow_negative_numbers = true)]
        source: ChatId,
    },
    /// Stop relaying without deleting the rule.
    Pause {
        #[arg(allow_negative_numbers = true)]
        source: ChatId,
    },
    /// Relay again after `pause`.
    Resume {
        #[arg(allow_negative_numbers = true)]
        source: ChatId,
    },
    /// Add blocklist keywords.
    FilterAdd {
        #[arg(allow_negative_numbers = true)]
        source: ChatId,
        #[arg(required = true)]
        keywords: Vec<String>,
    },
    /// Remove blocklist keywords.
    FilterRemove {
        #[arg(allow_negative_numbers = true)]
        source: ChatId,
        #[arg(required = true)]
        keywords: Vec<String>,
    },
    /// Write all rules as JSON to a file, or stdout.
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load rules from a JSON file.
    Import {
        file: PathBuf,
        /// `merge` keeps existing rules, `replace` drops them first.
        #[arg(long, default_value = "merge")]
        mode: ImportMode,
    },
}

pub async fn handle_rules(config: &CourierConfig, action: RulesAction) -> Result<()> {
    let store = store::open_configured(config).await?;
    let rules = RuleBook::new(store, Duration::ZERO);

    match action {
        RulesAction::List => {
            let all = rules.list().await?;
            if all.is_empty() {
                println!("No rules configured.");
            }
            for (source, rule) in &all {
                println!("{}", describe(*source, rule));
            }
        },
        RulesAction::Add {
            source,
            target,
            options,
            filters,
            source_name,
            target_name,
        } => {
            let rule = rules
                .add_rule(RuleCreate {
                    source_id: source,
                    target_id: target,
                    options: RuleOptions::from_tags(&options)?,
                    filters,
                    source_display: source_name,
                    target_display: target_name,
                })
                .await?;
            println!("Added {}", describe(source, &rule));
        },
        RulesAction::Remove { source } => {
            rules.remove_rule(source).await?;
            println!("Removed rule for {source}.");
        },
        RulesAction::Pause { source } => {
            let rule = rules.set_paused(source, true).await?;
            println!("{}", describe(source, &rule));
        },
        RulesAction::Resume { source } => {
            let rule = rules.set_paused(source, false).await?;
            println!("{}", describe(source, &rule));
        },
        RulesAction::FilterAdd { source, keywords } => {
            let rule = rules.add_filters(source, &keywords).await?;
            println!("{}", describe(source, &rule));
        },
        RulesAction::FilterRemove { source, keywords } => {
            let rule = rules.remove_filters(source, &keywords).await?;
            println!("{}", describe(source, &rule));
        },
        RulesAction::Export { output } => {
            let json = transfer::export_rules_json(&rules).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    eprintln!("Exported rules to {}", path.display());
                },
                None => println!("{json}"),
            }
        },
        RulesAction::Import { file, mode } => {
            let json = std::fs::read_to_string(&file)?;
            let report = transfer::import_rules(&rules, &json, mode).await?;
            println!(
                "Imported {} rule(s), removed {}, skipped {}.",
                report.imported,
                report.removed,
                report.skipped.len()
            );
            for skipped in &report.skipped {
                println!("  skipped {}: {}", skipped.source_id, skipped.reason);
            }
        },
    }
    Ok(())
}

/// One-line rule summary: `source -> target [tags] filters=... (paused)`.
fn describe(source: ChatId, rule: &ForwardRule) -> String {
    let name = |id: ChatId, display: &Option<String>| match display {
        Some(display) => format!("{id} ({display})"),
        None => id.to_string(),
    };
    let mut line = format!(
        "{} -> {}",
        name(source, &rule.source_display),
        name(rule.target_id, &rule.target_display)
    );
    let tags = rule.options.tags();
    if !tags.is_empty() {
        line.push_str(&format!(" [{}]", tags.join(", ")));
    }
    if !rule.filters.is_empty() {
        let filters: Vec<&str> = rule.filters.iter().map(String::as_str).collect();
        line.push_str(&format!(" filters={}", filters.join(",")));
    }
    if rule.paused {
        line.push_str(" (paused)");
    }
    line
}
