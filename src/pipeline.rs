//! Pipeline definitions and registry.
//!
//! A pipeline is a linear chain of phases for one category. Each phase names
//! the task that runs it and, optionally, an executable that implements it.
//!
//! ```toml
//! [pipeline]
//! category = "etl"
//!
//! [[pipeline.phases]]
//! phase = "extract"
//! task = "etl.extract"
//! command = "hooks/etl/extract"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::{Category, Phase};

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct PipelineFile {
    pipeline: Pipeline,
}

/// An ordered phase chain for one category.
#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    pub category: Category,
    pub phases: Vec<PhaseStep>,
}

/// One phase of a pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseStep {
    pub phase: Phase,
    /// Task name dispatched for this phase.
    pub task: String,
    /// Executable that implements the task, if run as an external command.
    #[serde(default)]
    pub command: Option<PathBuf>,
}

impl Pipeline {
    fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(Error::Config(format!(
                "pipeline {} has no phases",
                self.category
            )));
        }
        for (i, step) in self.phases.iter().enumerate() {
            if self.phases[..i].iter().any(|s| s.phase == step.phase) {
                return Err(Error::Config(format!(
                    "pipeline {} lists phase {} twice",
                    self.category, step.phase
                )));
            }
        }
        Ok(())
    }

    pub fn first(&self) -> Option<&PhaseStep> {
        self.phases.first()
    }

    /// The phase after `phase`, or `None` when `phase` is last (or unknown).
    pub fn next_after(&self, phase: Phase) -> Option<&PhaseStep> {
        let idx = self.phases.iter().position(|s| s.phase == phase)?;
        self.phases.get(idx + 1)
    }
}

/// Registry of loaded pipelines, indexed by category.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<Category, Pipeline>,
}

impl PipelineRegistry {
    /// Create an empty registry with no pipelines.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a pipeline, replacing any previous one for its category.
    pub fn insert(&mut self, pipeline: Pipeline) -> Result<()> {
        pipeline.validate()?;
        self.pipelines.insert(pipeline.category, pipeline);
        Ok(())
    }

    pub fn parse(content: &str) -> Result<Pipeline> {
        let file: PipelineFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad pipeline config: {e}")))?;
        file.pipeline.validate()?;
        Ok(file.pipeline)
    }

    /// Load all `.toml` files from a directory and build the registry.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::empty();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read pipeline dir {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                let pipeline = Self::parse(&content).map_err(|e| {
                    Error::Config(format!("{}: {e}", path.display()))
                })?;
                registry.insert(pipeline)?;
            }
        }

        Ok(registry)
    }

    pub fn get(&self, category: Category) -> Option<&Pipeline> {
        self.pipelines.get(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.values()
    }

    /// Every (category, phase) lane a worker pool must cover.
    pub fn lanes(&self) -> Vec<(Category, Phase)> {
        self.iter()
            .flat_map(|p| p.phases.iter().map(move |s| (p.category, s.phase)))
            .collect()
    }
}
