//! Sidecar OpenAPI document handling.
//!
//! The compiler inspects only two things about the sidecar: whether it
//! exists, and the set of names under `components.schemas` (used to
//! resolve `ProcessEntity::entity_name` at validation time). Everything
//! else in the document is opaque and never deserialized.

use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A minimal, partial view of an OpenAPI document: just the schema names.
/// Grounded on `authoring::yaml::parse_workflow_yaml`'s `serde_yaml::from_str`
/// idiom, applied to a deliberately narrow shape instead of a full DTO —
/// the compiler has no use for any other part of the document.
#[derive(Debug, serde::Deserialize)]
struct OpenApiDocument {
    #[serde(default)]
    components: Components,
}

#[derive(Debug, Default, serde::Deserialize)]
struct Components {
    #[serde(default)]
    schemas: serde_yaml::Mapping,
}

/// The two facts the compiler cares about from a sidecar file.
#[derive(Debug, Clone, Default)]
pub struct Sidecar {
    pub path: PathBuf,
    pub schema_names: HashSet<String>,
}

/// Locate the sidecar OpenAPI file for a `.bpm` source at `source_path`:
/// same stem, same directory, extension `.yaml` or `.yml`.
///
/// Returns `None` when neither candidate exists — callers that need the
/// file (file-based entry points) turn that into
/// `CompileError::MissingOpenApi`.
pub fn find_sidecar(source_path: &Path) -> Option<PathBuf> {
    let stem = source_path.file_stem()?;
    let dir = source_path.parent().unwrap_or_else(|| Path::new("."));
    for ext in ["yaml", "yml"] {
        let candidate = dir.join(stem).with_extension(ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Load a sidecar file and extract its `components.schemas` names.
///
/// Any other content in the document is opaque and is not
/// deserialized beyond this shape.
pub fn load_sidecar(path: &Path) -> Result<Sidecar> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read sidecar '{}': {e}", path.display()))?;
    let doc: OpenApiDocument = serde_yaml::from_str(&text)
        .map_err(|e| anyhow!("failed to parse sidecar '{}' as YAML: {e}", path.display()))?;
    let schema_names = doc
        .components
        .schemas
        .keys()
        .filter_map(|k| k.as_str().map(str::to_string))
        .collect();
    Ok(Sidecar {
        path: path.to_path_buf(),
        schema_names,
    })
}

/// Resolve an `entityName` against the sidecar's schema names. Comparison
/// is exact (no case-folding): the schema key under `components.schemas`
/// must match the DSL's `entityName` string verbatim.
pub fn resolves_entity_name(sidecar: &Sidecar, entity_name: &str) -> bool {
    sidecar.schema_names.contains(entity_name)
}
