//! # kiln-registry
//!
//! Structural inventory of generated artifacts.
//!
//! Artifacts live in four tier directories under the output root
//! (`elements`, `components`, `modules`, `icons`), one directory per artifact
//! holding `<Name>.tsx`. The registry is rebuilt from disk on demand and
//! passed around as a plain value.

mod imports;
mod registry;

pub use imports::{
    check_source, check_tier_ordering, extract_imports, referenced_artifacts, resolve_specifier,
    TierViolation,
};
pub use registry::{
    artifact_dir, artifact_path, import_path, scan, story_path, ArtifactRegistry,
    ARTIFACT_EXTENSION, IMPORT_PREFIX,
};
