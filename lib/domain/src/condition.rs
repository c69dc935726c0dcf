//! Append-only condition history recorded on the platform status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Install,
    Upgrade,
}

impl Operation {
    pub fn started(self) -> ConditionType {
        match self {
            Operation::Install => ConditionType::InstallStarted,
            Operation::Upgrade => ConditionType::UpgradeStarted,
        }
    }

    pub fn failed(self) -> ConditionType {
        match self {
            Operation::Install => ConditionType::InstallFailed,
            Operation::Upgrade => ConditionType::UpgradeFailed,
        }
    }

    pub fn complete(self) -> ConditionType {
        match self {
            Operation::Install => ConditionType::InstallComplete,
            Operation::Upgrade => ConditionType::UpgradeComplete,
        }
    }

    /// Present participle used in log lines and failure messages.
    pub fn verb(self) -> &'static str {
        match self {
            Operation::Install => "installing",
            Operation::Upgrade => "upgrading",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Install => f.write_str("install"),
            Operation::Upgrade => f.write_str("upgrade"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    InstallStarted,
    InstallComplete,
    InstallFailed,
    UpgradeStarted,
    UpgradeComplete,
    UpgradeFailed,
}

impl ConditionType {
    pub fn operation(self) -> Operation {
        match self {
            ConditionType::InstallStarted
            | ConditionType::InstallComplete
            | ConditionType::InstallFailed => Operation::Install,
            ConditionType::UpgradeStarted
            | ConditionType::UpgradeComplete
            | ConditionType::UpgradeFailed => Operation::Upgrade,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ConditionType::InstallFailed | ConditionType::UpgradeFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Ordered phase markers. Entries can only be appended; the last one is the
/// current phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionLog {
    entries: Vec<Condition>,
}

impl ConditionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a condition stamped with `now`, clamped so timestamps never
    /// go backwards even when the clock does.
    pub fn append(
        &mut self,
        kind: ConditionType,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> &Condition {
        let last_transition_time = match self.entries.last() {
            Some(last) if last.last_transition_time > now => last.last_transition_time,
            _ => now,
        };
        self.entries.push(Condition {
            kind,
            message: message.into(),
            last_transition_time,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn last(&self) -> Option<&Condition> {
        self.entries.last()
    }

    pub fn is_last(&self, kind: ConditionType) -> bool {
        self.last().is_some_and(|condition| condition.kind == kind)
    }

    pub fn contains(&self, kind: ConditionType) -> bool {
        self.entries.iter().any(|condition| condition.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_time_ordered(&self) -> bool {
        self.entries
            .windows(2)
            .all(|pair| pair[0].last_transition_time <= pair[1].last_transition_time)
    }
}
