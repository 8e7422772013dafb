// VSL Configuration
// Code generation options and the optional vsl.json project file

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codegen::Target;
use crate::error::{ErrorKind, Span, VslError, VslResult};

pub const CONFIG_FILE: &str = "vsl.json";

/// Options shared by every backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    /// Function that becomes the program entry point
    pub entry_point: String,
    /// Assembly/namespace name of the managed target
    pub namespace: String,
    /// Class holding all functions on the managed and JVM targets
    pub class_name: String,
    /// Emit explanatory comments
    pub comments: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            entry_point: "Main".to_string(),
            namespace: "Vsl".to_string(),
            class_name: "VslMain".to_string(),
            comments: true,
        }
    }
}

/// Project configuration (vsl.json)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub codegen: CodegenOptions,
}

impl Config {
    pub fn load(path: &Path) -> VslResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            config_error(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> VslResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| config_error(format!("invalid {}: {}", CONFIG_FILE, e)))
    }

    /// Walk up from `start` looking for a vsl.json
    pub fn discover(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Configured target, validated
    pub fn target(&self) -> VslResult<Option<Target>> {
        self.target.as_deref().map(str::parse).transpose()
    }
}

fn config_error(message: String) -> VslError {
    VslError::new(ErrorKind::InvalidConfig, message, Span::default())
}
