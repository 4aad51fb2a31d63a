//! Rule-set export and import as a single JSON object keyed by source id.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
};

use {
    serde::{Deserialize, Serialize},
    tracing::{info, warn},
};

use crate::{
    Error, Result,
    loop_detect::check_new_rule,
    rules::RuleBook,
    types::{ChatId, ForwardRule},
};

/// Full rule set: source id -> rule.
pub type RuleSet = BTreeMap<ChatId, ForwardRule>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Drop every existing rule first.
    Replace,
    /// Keep existing rules; imported ones win on conflict.
    #[default]
    Merge,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Replace => "replace",
            Self::Merge => "merge",
        })
    }
}

impl FromStr for ImportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "merge" => Ok(Self::Merge),
            other => Err(Error::message(format!("unknown import mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRule {
    pub source_id: ChatId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    /// Rules deleted by [`ImportMode::Replace`].
    pub removed: usize,
    pub skipped: Vec<SkippedRule>,
}

pub async fn export_rules(rules: &RuleBook) -> Result<RuleSet> {
    Ok(rules.list().await?.into_iter().collect())
}

pub async fn export_rules_json(rules: &RuleBook) -> Result<String> {
    Ok(serde_json::to_string_pretty(&export_rules(rules).await?)?)
}

/// Parse and apply a rule set. The blob is fully parsed before anything is
/// changed. Rules that are self-loops or would close a cycle in the
/// resulting graph are skipped and reported.
pub async fn import_rules(rules: &RuleBook, json: &str, mode: ImportMode) -> Result<ImportReport> {
    let incoming: RuleSet = serde_json::from_str(json)?;
    let mut report = ImportReport::default();

    let mut graph: HashMap<ChatId, ChatId> = HashMap::new();
    for (source_id, rule) in rules.list().await? {
        match mode {
            ImportMode::Replace => {
                rules.delete(source_id).await?;
                report.removed += 1;
            },
            ImportMode::Merge => {
                graph.insert(source_id, rule.target_id);
            },
        }
    }

    for (source_id, rule) in incoming {
        let check = check_new_rule(source_id, rule.target_id, |chat| graph.get(&chat).copied());
        if check.is_circular() {
            warn!(
                source_id,
                target_id = rule.target_id,
                reason = %check,
                "skipping imported rule"
            );
            report.skipped.push(SkippedRule {
                source_id,
                reason: check.to_string(),
            });
            continue;
        }
        graph.insert(source_id, rule.target_id);
        rules.set(source_id, rule).await?;
        report.imported += 1;
    }

    info!(
        %mode,
        imported = report.imported,
        removed = report.removed,
        skipped = report.skipped.len(),
        "rules imported"
    );
    Ok(report)
}
