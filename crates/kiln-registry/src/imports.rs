//! Import extraction and tier-direction checks
//!
//! Elements never reference components or modules; components never reference
//! modules. The check is advisory: violations are reported, not enforced.

use crate::registry::ArtifactRegistry;
use kiln_core::{ArtifactRecord, Tier};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

static IMPORT_RE: OnceLock<Regex> = OnceLock::new();

fn import_re() -> &'static Regex {
    IMPORT_RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*(?:import|export)\s+(?:type\s+)?(?:[^'";]*?\s+from\s+)?['"]([^'"]+)['"]"#)
            .expect("import pattern is valid")
    })
}

/// A reference from an artifact to an artifact of a higher tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierViolation {
    pub artifact: String,
    pub tier: Tier,
    pub referenced: String,
    pub referenced_tier: Tier,
}

impl std::fmt::Display for TierViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) references {} ({})",
            self.artifact, self.tier, self.referenced, self.referenced_tier
        )
    }
}

/// Module specifiers of every import/re-export statement in `source`
pub fn extract_imports(source: &str) -> Vec<String> {
    import_re()
        .captures_iter(source)
        .map(|c| c[1].to_string())
        .collect()
}

/// Resolve an import specifier to a registered artifact
///
/// Canonical import paths match directly. Relative or aliased paths match when
/// they contain a `<tier>/<Name>` segment pair naming a registered artifact.
pub fn resolve_specifier<'a>(
    registry: &'a ArtifactRegistry,
    specifier: &str,
) -> Option<&'a ArtifactRecord> {
    if let Some((name, _)) = registry
        .import_map()
        .iter()
        .find(|(_, path)| specifier == path.as_str() || specifier.starts_with(&format!("{}/", path)))
    {
        return registry.find_by_name(name);
    }

    let segments: Vec<&str> = specifier.split('/').collect();
    segments.windows(2).find_map(|pair| {
        let tier: Tier = pair[0].parse().ok()?;
        if pair[0] != tier.dir_name() {
            return None;
        }
        registry
            .get_by_tier(tier)
            .iter()
            .find(|r| r.name == pair[1])
    })
}

/// Artifacts referenced by `source`, excluding the artifact itself
pub fn referenced_artifacts<'a>(
    registry: &'a ArtifactRegistry,
    owner: &str,
    source: &str,
) -> Vec<&'a ArtifactRecord> {
    let mut found: Vec<&ArtifactRecord> = Vec::new();
    for specifier in extract_imports(source) {
        if let Some(record) = resolve_specifier(registry, &specifier) {
            if record.name != owner && !found.iter().any(|r| r.name == record.name) {
                found.push(record);
            }
        }
    }
    found
}

/// Check one artifact's source against the tier direction rule
pub fn check_source(
    registry: &ArtifactRegistry,
    name: &str,
    tier: Tier,
    source: &str,
) -> Vec<TierViolation> {
    referenced_artifacts(registry, name, source)
        .into_iter()
        .filter(|target| !tier.may_reference(target.tier))
        .map(|target| TierViolation {
            artifact: name.to_string(),
            tier,
            referenced: target.name.clone(),
            referenced_tier: target.tier,
        })
        .collect()
}

/// Check every registered artifact; unreadable sources are skipped with a warning
pub fn check_tier_ordering(registry: &ArtifactRegistry) -> Vec<TierViolation> {
    let mut violations = Vec::new();
    for record in registry.get_all() {
        match std::fs::read_to_string(&record.path) {
            Ok(source) => {
                violations.extend(check_source(registry, &record.name, record.tier, &source))
            }
            Err(e) => warn!(
                artifact = %record.name,
                error = %e,
                "could not read artifact for tier check"
            ),
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::artifact_path;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, tier: Tier, name: &str, body: &str) {
        let path = artifact_path(root, tier, name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_extract_imports() {
        let source = r#"
import React from 'react';
import { Button } from "@/ui/elements/Button";
import type { CardProps } from '../../components/Card/Card';
import './styles.css';
export { Icon } from '@/ui/icons/Star';
const x = "import fake from 'nope'";
"#;
        let imports = extract_imports(source);
        assert_eq!(
            imports,
            vec![
                "react",
                "@/ui/elements/Button",
                "../../components/Card/Card",
                "./styles.css",
                "@/ui/icons/Star",
            ]
        );
    }

    #[test]
    fn test_resolve_relative_and_canonical() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, Tier::Elements, "Button", "");
        write(root, Tier::Components, "Card", "");
        let registry = ArtifactRegistry::build(root);

        assert_eq!(
            resolve_specifier(&registry, "@/ui/elements/Button").unwrap().name,
            "Button"
        );
        assert_eq!(
            resolve_specifier(&registry, "../../components/Card/Card")
                .unwrap()
                .name,
            "Card"
        );
        assert!(resolve_specifier(&registry, "react").is_none());
    }

    #[test]
    fn test_elements_never_reference_higher_tiers() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, Tier::Icons, "Star", "export const Star = () => null;");
        write(
            root,
            Tier::Elements,
            "Button",
            "import { Star } from '@/ui/icons/Star';\nimport { Card } from '@/ui/components/Card';",
        );
        write(
            root,
            Tier::Components,
            "Card",
            "import { Button } from '@/ui/elements/Button';",
        );
        write(
            root,
            Tier::Modules,
            "Header",
            "import { Card } from '@/ui/components/Card';\nimport { Button } from '../../elements/Button/Button';",
        );

        let registry = ArtifactRegistry::build(root);
        let violations = check_tier_ordering(&registry);

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].artifact, "Button");
        assert_eq!(violations[0].referenced, "Card");
        assert_eq!(violations[0].referenced_tier, Tier::Components);
    }

    #[test]
    fn test_clean_tree_has_no_violations() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, Tier::Elements, "Input", "import React from 'react';");
        write(
            root,
            Tier::Modules,
            "SearchBar",
            "import { Input } from '@/ui/elements/Input';",
        );

        let registry = ArtifactRegistry::build(root);
        assert!(check_tier_ordering(&registry).is_empty());
    }
}
