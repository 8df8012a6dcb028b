//! Design-source collaborators

use async_trait::async_trait;
use kiln_core::{DesignSpec, KilnError, Result};
use std::path::PathBuf;
use tracing::debug;

/// Supplies the design specification a run generates from
#[async_trait]
pub trait DesignSource: Send + Sync {
    async fn fetch_spec(&self) -> Result<DesignSpec>;
}

/// Reads a JSON design document from disk
#[derive(Debug, Clone)]
pub struct FileDesignSource {
    path: PathBuf,
}

impl FileDesignSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DesignSource for FileDesignSource {
    async fn fetch_spec(&self) -> Result<DesignSpec> {
        debug!(path = %self.path.display(), "reading design spec");
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            KilnError::DesignSource(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            KilnError::DesignSource(format!("Invalid design spec {}: {}", self.path.display(), e))
        })
    }
}

/// Fixed design source for tests and dry runs
#[derive(Debug, Clone)]
pub struct StaticDesignSource {
    spec: std::result::Result<DesignSpec, String>,
}

impl StaticDesignSource {
    pub fn new(spec: DesignSpec) -> Self {
        Self { spec: Ok(spec) }
    }

    /// Source whose fetch always fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            spec: Err(message.into()),
        }
    }
}

#[async_trait]
impl DesignSource for StaticDesignSource {
    async fn fetch_spec(&self) -> Result<DesignSpec> {
        self.spec.clone().map_err(KilnError::DesignSource)
    }
}
