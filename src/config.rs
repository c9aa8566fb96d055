//! YAML tracer configuration.
//!
//! ```yaml
//! hooks:
//!   owner: com/example/Trampoline
//! exclude: ["java/", "sun/"]
//! trace:
//!   - class: com.example.Calc
//!     method: divide
//!     descriptor: (II)I
//!     capture: [0]
//!   - class: com/example/net/*
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::args::CaptureMask;
use crate::hooks::HookRuntime;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid tracer configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("trace request has an empty class pattern")]
    EmptyClassPattern,

    #[error("cannot capture parameter {index} of {class}.{method}: at most {max} parameters can be captured")]
    CaptureIndex { class: String, method: String, index: usize, max: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TracerConfig {
    pub hooks: HookRuntime,
    /// Class name prefixes that are never instrumented.
    pub exclude: Vec<String>,
    pub trace: Vec<TraceRequest>,
}

impl TracerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: TracerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for request in &self.trace {
            request.validate()?;
        }
        Ok(())
    }
}

/// Select methods by class and method pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceRequest {
    /// Internal or dotted class name; a trailing `*` matches any suffix.
    pub class: String,
    /// Method name, or `*` for every method.
    #[serde(default = "any_method")]
    pub method: String,
    /// Restrict to one overload.
    #[serde(default)]
    pub descriptor: Option<String>,
    /// Parameter indices passed to `enter(int, Object[])`.
    #[serde(default)]
    pub capture: Option<Vec<usize>>,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn any_method() -> String {
    "*".to_string()
}

fn enabled() -> bool {
    true
}

impl TraceRequest {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self { class: class.into(), method: method.into(), descriptor: None, capture: None, enabled: true }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.class.is_empty() {
            return Err(ConfigError::EmptyClassPattern);
        }
        self.capture_mask().map(|_| ())
    }

    pub fn matches_class(&self, class: &str) -> bool {
        let pattern = normalize(&self.class);
        match pattern.strip_suffix('*') {
            Some(prefix) => class.starts_with(prefix),
            None => class == pattern,
        }
    }

    pub fn matches_method(&self, name: &str, descriptor: &str) -> bool {
        (self.method == "*" || self.method == name)
            && self.descriptor.as_deref().map_or(true, |d| d == descriptor)
    }

    pub fn capture_mask(&self) -> Result<Option<CaptureMask>, ConfigError> {
        let Some(indices) = &self.capture else {
            return Ok(None);
        };
        match indices.iter().find(|&&i| i >= CaptureMask::CAPACITY) {
            Some(&index) => Err(ConfigError::CaptureIndex {
                class: self.class.clone(),
                method: self.method.clone(),
                index,
                max: CaptureMask::CAPACITY,
            }),
            None => Ok(CaptureMask::from_indices(indices.iter().copied())),
        }
    }
}

/// Dotted class names and patterns to internal form.
pub(crate) fn normalize(pattern: &str) -> String {
    pattern.replace('.', "/")
}
