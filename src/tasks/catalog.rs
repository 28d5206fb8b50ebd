// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Registry of rewardable tasks.
//!
//! Loaded once at startup from `TASK_CATALOG_PATH` or the built-in default
//! list, then read-only. Rewards are written in whole-token units in the
//! JSON file and converted to base units with the token's decimals.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{AmountError, TokenAmount};

const BUILTIN_CATALOG: &str = include_str!("default_catalog.json");

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read task catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed task catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Task {task_id} has an invalid reward: {source}")]
    InvalidReward {
        task_id: String,
        #[source]
        source: AmountError,
    },

    #[error("Invalid task id: {0:?}")]
    InvalidTaskId(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task catalog is empty")]
    Empty,
}

/// A rewardable task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TaskDefinition {
    pub task_id: String,
    pub title: String,
    pub description: String,
    /// Reward in token base units
    pub reward_amount: TokenAmount,
    /// Grouping such as `social`, `content`, `community`, `platform`
    pub category: String,
    pub platform: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawReward {
    Text(String),
    Whole(u64),
}

#[derive(Deserialize)]
struct RawTask {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    reward: RawReward,
    #[serde(alias = "type")]
    category: String,
    #[serde(default)]
    platform: String,
}

#[derive(Deserialize)]
struct RawCatalog {
    tasks: Vec<RawTask>,
}

#[derive(Debug, Clone)]
pub struct TaskCatalog {
    tasks: Vec<TaskDefinition>,
    index: HashMap<String, usize>,
}

impl TaskCatalog {
    /// Parse a catalog document. `decimals` is the reward token's precision.
    pub fn from_json(json: &str, decimals: u8) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_json::from_str(json)?;
        if raw.tasks.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut tasks = Vec::with_capacity(raw.tasks.len());
        let mut index = HashMap::with_capacity(raw.tasks.len());

        for task in raw.tasks {
            let task_id = task.id.trim().to_string();
            if task_id.is_empty() || task_id.contains('|') {
                return Err(CatalogError::InvalidTaskId(task.id));
            }

            let reward_text = match task.reward {
                RawReward::Text(s) => s,
                RawReward::Whole(n) => n.to_string(),
            };
            let reward_amount = TokenAmount::parse_units(&reward_text, decimals).map_err(
                |source| CatalogError::InvalidReward {
                    task_id: task_id.clone(),
                    source,
                },
            )?;

            if index.insert(task_id.clone(), tasks.len()).is_some() {
                return Err(CatalogError::DuplicateTask(task_id));
            }
            tasks.push(TaskDefinition {
                task_id,
                title: task.title,
                description: task.description,
                reward_amount,
                category: task.category,
                platform: task.platform,
            });
        }

        Ok(Self { tasks, index })
    }

    /// Load a catalog file.
    pub fn load(path: &Path, decimals: u8) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json, decimals)
    }

    /// The built-in catalog of daily tasks.
    pub fn builtin(decimals: u8) -> Result<Self, CatalogError> {
        Self::from_json(BUILTIN_CATALOG, decimals)
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskDefinition> {
        self.index.get(task_id).map(|&i| &self.tasks[i])
    }

    /// Tasks in catalog order.
    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads() {
        let catalog = TaskCatalog::builtin(18).unwrap();
        assert_eq!(catalog.len(), 22);

        let blog = catalog.get("medium-blog").unwrap();
        assert_eq!(blog.reward_amount.format_units(18), "60");
        assert_eq!(blog.category, "content");
        assert_eq!(blog.platform, "medium");

        assert!(catalog.get("nonexistent").is_none());
    }

    #[test]
    fn reward_accepts_number_or_decimal_string() {
        let catalog = TaskCatalog::from_json(
            r#"{"tasks":[
                {"id":"a","title":"A","reward":5,"category":"social"},
                {"id":"b","title":"B","reward":"0.25","type":"content","platform":"x"}
            ]}"#,
            6,
        )
        .unwrap();
        assert_eq!(catalog.get("a").unwrap().reward_amount, TokenAmount::from(5_000_000u64));
        assert_eq!(catalog.get("b").unwrap().reward_amount, TokenAmount::from(250_000u64));
        assert_eq!(catalog.get("b").unwrap().category, "content");
    }

    #[test]
    fn rejects_duplicates_and_bad_ids() {
        let duplicate = r#"{"tasks":[
            {"id":"a","title":"A","reward":1,"category":"c"},
            {"id":"a","title":"A2","reward":1,"category":"c"}
        ]}"#;
        assert!(matches!(
            TaskCatalog::from_json(duplicate, 6),
            Err(CatalogError::DuplicateTask(_))
        ));

        let piped = r#"{"tasks":[{"id":"a|b","title":"A","reward":1,"category":"c"}]}"#;
        assert!(matches!(
            TaskCatalog::from_json(piped, 6),
            Err(CatalogError::InvalidTaskId(_))
        ));

        assert!(matches!(
            TaskCatalog::from_json(r#"{"tasks":[]}"#, 6),
            Err(CatalogError::Empty)
        ));
    }

    #[test]
    fn rejects_reward_finer_than_decimals() {
        let json = r#"{"tasks":[{"id":"a","title":"A","reward":"0.001","category":"c"}]}"#;
        assert!(matches!(
            TaskCatalog::from_json(json, 2),
            Err(CatalogError::InvalidReward { .. })
        ));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"tasks":[{"id":"only","title":"Only","reward":3,"category":"c"}]}"#,
        )
        .unwrap();

        let catalog = TaskCatalog::load(&path, 0).unwrap();
        assert_eq!(catalog.tasks().len(), 1);

        assert!(matches!(
            TaskCatalog::load(&dir.path().join("missing.json"), 0),
            Err(CatalogError::Io { .. })
        ));
    }
}
