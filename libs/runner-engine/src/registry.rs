// Language profile registry
// Static table of supported languages, built once at startup and never mutated

use crate::error::{RegistryError, RequestRejected};
use runner_common::config::{cpu_limit_enforceable, memory_limit_enforceable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Directory inside the sandbox that holds the mounted source file
pub const SANDBOX_APP_DIR: &str = "/app";

/// Placeholder in command words, replaced with the in-sandbox source path
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// How a language turns a source file into a running program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipe {
    /// Run the source directly with an interpreter
    Interpreted { run: Vec<String> },
    /// Build first; the run step only happens if the build exits zero
    Compiled {
        compile: Vec<String>,
        run: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub id: String,
    pub file_extension: String,
    pub image: String,
    pub recipe: Recipe,
    /// Overrides the global memory ceiling for this language
    #[serde(default)]
    pub memory_limit_mb: Option<u32>,
    /// Overrides the global CPU ceiling for this language
    #[serde(default)]
    pub cpu_limit: Option<f64>,
}

impl LanguageProfile {
    pub fn interpreted(id: &str, ext: &str, image: &str, run: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            file_extension: ext.to_string(),
            image: image.to_string(),
            recipe: Recipe::Interpreted { run: owned(run) },
            memory_limit_mb: None,
            cpu_limit: None,
        }
    }

    pub fn compiled(id: &str, ext: &str, image: &str, compile: &[&str], run: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            file_extension: ext.to_string(),
            image: image.to_string(),
            recipe: Recipe::Compiled {
                compile: owned(compile),
                run: owned(run),
            },
            memory_limit_mb: None,
            cpu_limit: None,
        }
    }

    /// Fixed path the workspace file is mounted at inside the sandbox
    pub fn source_path(&self) -> String {
        format!("{}/main.{}", SANDBOX_APP_DIR, self.file_extension)
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.recipe, Recipe::Compiled { .. })
    }

    /// Argument vector executed inside the sandbox.
    ///
    /// Compiled recipes become a single `sh -c "compile && run"` so both steps share
    /// one isolated environment and a failed build never reaches the run step.
    pub fn command(&self) -> Vec<String> {
        let source = self.source_path();
        match &self.recipe {
            Recipe::Interpreted { run } => substitute(run, &source),
            Recipe::Compiled { compile, run } => {
                let line = format!(
                    "{} && {}",
                    shell_join(&substitute(compile, &source)),
                    shell_join(&substitute(run, &source)),
                );
                vec!["sh".to_string(), "-c".to_string(), line]
            }
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let fail = |reason: &str| RegistryError::InvalidProfile {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.is_empty() || self.id.chars().any(char::is_whitespace) {
            return Err(fail("id must be non-empty and contain no whitespace"));
        }
        if self.file_extension.is_empty()
            || !self.file_extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(fail("file extension must be non-empty and alphanumeric"));
        }
        if self.image.trim().is_empty() {
            return Err(fail("image reference is empty"));
        }
        let steps_present = match &self.recipe {
            Recipe::Interpreted { run } => !run.is_empty(),
            Recipe::Compiled { compile, run } => !compile.is_empty() && !run.is_empty(),
        };
        if !steps_present {
            return Err(fail("recipe has an empty command"));
        }
        // A zero ceiling reaches Docker as "unlimited"
        if let Some(memory_mb) = self.memory_limit_mb {
            if !memory_limit_enforceable(memory_mb) {
                return Err(fail("memory limit must be at least 6 MB"));
            }
        }
        if let Some(cpu) = self.cpu_limit {
            if !cpu_limit_enforceable(cpu) {
                return Err(fail("cpu limit must be at least 0.01 CPUs"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageProfile>,
}

/// Immutable set of language profiles. Lookups fail closed.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: BTreeMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    /// The compiled-in table
    pub fn builtin() -> Self {
        let profiles = [
            LanguageProfile::interpreted(
                "python",
                "py",
                "python:3.9-alpine",
                &["python", "-u", SOURCE_PLACEHOLDER],
            ),
            LanguageProfile::compiled(
                "cpp",
                "cpp",
                "gcc:11.3.0",
                &["g++", SOURCE_PLACEHOLDER, "-o", "/app/runner"],
                &["/app/runner"],
            ),
        ];

        Self {
            profiles: profiles
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
        }
    }

    pub fn from_profiles(profiles: Vec<LanguageProfile>) -> Result<Self, RegistryError> {
        if profiles.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut table = BTreeMap::new();
        for profile in profiles {
            profile.validate()?;
            if table.contains_key(&profile.id) {
                return Err(RegistryError::Duplicate(profile.id));
            }
            table.insert(profile.id.clone(), profile);
        }

        Ok(Self { profiles: table })
    }

    /// Load a replacement table from a `{"languages": [...]}` JSON file
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed: LanguagesJson = serde_json::from_str(&content)?;
        Self::from_profiles(parsed.languages)
    }

    /// Built-in table unless a replacement file is configured
    pub fn from_config(path: Option<&Path>) -> Result<Self, RegistryError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Exact, case-sensitive lookup
    pub fn resolve(&self, language: &str) -> Result<&LanguageProfile, RequestRejected> {
        self.profiles
            .get(language)
            .ok_or_else(|| RequestRejected::UnsupportedLanguage(language.to_string()))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &LanguageProfile> {
        self.profiles.values()
    }

    pub fn list_languages(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn substitute(words: &[String], source: &str) -> Vec<String> {
    words
        .iter()
        .map(|w| w.replace(SOURCE_PLACEHOLDER, source))
        .collect()
}

fn shell_join(words: &[String]) -> String {
    words
        .iter()
        .map(|w| shell_quote(w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=+,@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
