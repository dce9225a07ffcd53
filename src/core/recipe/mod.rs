pub mod deeplink;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A declarative agent script: title, instructions/prompt, parameters,
/// referenced extensions, optional retry and response-schema metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub version: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<RecipeSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<RecipeParameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_recipes: Vec<SubRecipe>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

impl Recipe {
    /// Text the executor feeds to the agent for a non-interactive run.
    pub fn run_prompt(&self) -> String {
        if let Some(prompt) = &self.prompt {
            return prompt.clone();
        }
        if let Some(instructions) = &self.instructions {
            return instructions.clone();
        }
        self.title.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goose_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goose_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeParameter {
    pub key: String,
    pub input_type: String,
    pub requirement: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRecipe {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub values: std::collections::HashMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sequential_when_repeated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Success-check definition for retry configs, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuccessCheck {
    Shell { command: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<SuccessCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure_timeout_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
}

/// Parse a recipe file. `.yaml`/`.yml` parse as YAML, everything else as
/// JSON with a YAML fallback.
pub fn load_recipe_file(path: &Path) -> Result<Recipe> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read recipe file {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let recipe = if is_yaml {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid recipe YAML in {}", path.display()))?
    } else {
        match serde_json::from_str(&raw) {
            Ok(recipe) => recipe,
            Err(_) => serde_yaml::from_str(&raw)
                .with_context(|| format!("invalid recipe in {}", path.display()))?,
        }
    };
    Ok(recipe)
}

/// Recipe library over the configured search paths.
pub struct RecipeStorage {
    global_dir: PathBuf,
    local_dir: PathBuf,
}

impl RecipeStorage {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            global_dir: data_dir.join("recipes"),
            local_dir: PathBuf::from(".goose/recipes"),
        }
    }

    /// Search order: cwd, `$GOOSE_RECIPE_PATH` entries, the global library,
    /// then the project-local library.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".")];
        if let Ok(env_paths) = std::env::var("GOOSE_RECIPE_PATH") {
            let sep = if cfg!(windows) { ';' } else { ':' };
            paths.extend(
                env_paths
                    .split(sep)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
            );
        }
        paths.push(self.global_dir.clone());
        paths.push(self.local_dir.clone());
        paths
    }

    /// Resolve a recipe id (file stem or file name) against the search paths.
    pub fn find(&self, id: &str) -> Result<(PathBuf, Recipe)> {
        for dir in self.search_paths() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() || !is_recipe_file(&path) {
                    continue;
                }
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
                if stem == id || file_name == id {
                    let recipe = load_recipe_file(&path)?;
                    return Ok((path, recipe));
                }
            }
        }
        Err(anyhow!("recipe not found: {}", id))
    }

    /// All recipes reachable from the search paths, deduplicated by file stem.
    pub fn list(&self) -> Vec<(PathBuf, Recipe)> {
        let mut seen = std::collections::HashSet::new();
        let mut manifests = Vec::new();
        for dir in self.search_paths() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() || !is_recipe_file(&path) {
                    continue;
                }
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                if !seen.insert(stem) {
                    continue;
                }
                if let Ok(recipe) = load_recipe_file(&path) {
                    manifests.push((path, recipe));
                }
            }
        }
        manifests
    }
}

fn is_recipe_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml") | Some("json")
    )
}
