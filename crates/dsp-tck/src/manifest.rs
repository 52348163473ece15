//! Scenario manifests (TOML) and the scenario registry.
//!
//! A manifest is a list of `[[scenario]]` tables:
//!
//! ```toml
//! [[scenario]]
//! name = "consumer-request-offer"
//! role = "consumer"
//!
//! [[scenario.exchange]]
//! alias = "neg"
//!
//! [[scenario.step]]
//! kind = "send"
//! exchange = "neg"
//! message = { type = "request" }
//!
//! [[scenario.step]]
//! kind = "await"
//! exchange = "neg"
//! expect = ["offer"]
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use dsp_protocol::Role;
use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::error::ScenarioError;
use crate::scenario::Scenario;

/// Scenarios loaded from one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioManifest {
    #[serde(default, rename = "scenario")]
    pub scenarios: Vec<Scenario>,
}

impl ScenarioManifest {
    /// Parse TOML and validate.
    ///
    /// # Errors
    /// Returns an error if parsing or validation fails.
    pub fn parse_str(input: &str) -> Result<Self, ScenarioError> {
        let parsed = Self::parse_str_unchecked(input)?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse TOML without validation.
    ///
    /// # Errors
    /// Returns an error if TOML parsing fails.
    pub fn parse_str_unchecked(input: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(input)?)
    }

    /// Read, parse and validate a manifest file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_str(&raw)
    }

    /// Unique names and structurally sound scenarios. Deadlines are checked
    /// against the configured timeout only when a scenario runs.
    ///
    /// # Errors
    /// The first problem found.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let mut names = HashSet::new();
        for scenario in &self.scenarios {
            if !names.insert(scenario.name.as_str()) {
                return Err(ScenarioError::DuplicateName(scenario.name.clone()));
            }
            scenario.validate(Duration::MAX)?;
        }
        Ok(())
    }
}

/// Ordered, name-unique collection of runnable scenarios.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: Vec<Scenario>,
}

impl ScenarioRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            scenarios: catalog::builtin(),
        }
    }

    /// Add every scenario of `manifest` after the ones already registered.
    ///
    /// # Errors
    /// [`ScenarioError::DuplicateName`] if a name is already taken.
    pub fn with_manifest(mut self, manifest: ScenarioManifest) -> Result<Self, ScenarioError> {
        for scenario in manifest.scenarios {
            self.register(scenario)?;
        }
        Ok(self)
    }

    /// # Errors
    /// [`ScenarioError::DuplicateName`] if the name is already taken.
    pub fn register(&mut self, scenario: Scenario) -> Result<(), ScenarioError> {
        if self.get(&scenario.name).is_some() {
            return Err(ScenarioError::DuplicateName(scenario.name));
        }
        self.scenarios.push(scenario);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    #[must_use]
    pub fn all(&self) -> &[Scenario] {
        &self.scenarios
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Scenarios named in `names`, in the order given. An empty selection
    /// means all of them.
    ///
    /// # Errors
    /// [`ScenarioError::NotFound`] for the first unknown name.
    pub fn select(&self, names: &[String]) -> Result<Vec<Scenario>, ScenarioError> {
        if names.is_empty() {
            return Ok(self.scenarios.clone());
        }
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| ScenarioError::NotFound(name.clone()))
            })
            .collect()
    }

    /// Scenarios that exercise the engine in `role`.
    #[must_use]
    pub fn for_role(&self, role: Role, default: Role) -> Vec<Scenario> {
        self.scenarios
            .iter()
            .filter(|s| s.role.unwrap_or(default) == role)
            .cloned()
            .collect()
    }
}
