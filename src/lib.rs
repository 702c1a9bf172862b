//! Core compiler for the `.bpm` process DSL.
//!
//! Pipeline: source text → [`parser`] → [`ast::Process`] →
//! [`validator`] → [`emitter`] → BPMN 2.0 XML, with [`layout`] consulted
//! by the emitter to place and route diagram elements. The pipeline is
//! single-threaded and synchronous end to end: one call to
//! [`compile_text`] or [`compile_file`] runs parse → validate → emit to
//! completion on the caller's thread, with no shared state between calls.

pub mod ast;
pub mod emitter;
pub mod error;
pub mod layout;
pub mod lexer;
pub mod parser;
pub mod sidecar;
pub mod validator;

use std::path::Path;
use tracing::instrument;

pub use ast::{Element, Flow, Mapping, Process};
pub use error::{CompileError, Diagnostic, ErrorKind, Report};

/// Caller-facing knobs for the compile pipeline.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// When `false` (the default), emission is skipped if the validator
    /// produced any warnings, even though warnings alone don't make
    /// `Report::is_ok()` false. Mirrors the CLI's `--emit-on-warnings`
    /// flag: strict by default, overridable per call.
    pub emit_on_warnings: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            emit_on_warnings: false,
        }
    }
}

/// The result of running the full pipeline once.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub process: Process,
    pub report: Report,
    /// `None` when emission was skipped: either the validator found
    /// errors, or it found warnings and `emit_on_warnings` was `false`.
    pub xml: Option<String>,
}

/// Compile DSL source text with no sidecar context (no `ProcessEntity`
/// schema resolution is possible; an `entityModel` header, if any entity
/// is present, is left empty).
#[instrument(skip(source))]
pub fn compile_text(source: &str, options: CompileOptions) -> Result<CompileOutput, CompileError> {
    compile_text_with_sidecar(source, None, options)
}

/// Compile DSL source text against an already-loaded sidecar OpenAPI
/// document, enabling `ProcessEntity::entity_name` resolution and
/// populating the synthesized validator task's `entityModel` header with
/// the sidecar's path.
#[instrument(skip(source, sidecar))]
pub fn compile_text_with_sidecar(
    source: &str,
    sidecar: Option<&sidecar::Sidecar>,
    options: CompileOptions,
) -> Result<CompileOutput, CompileError> {
    let process = parser::parse(source)?;
    tracing::info!(elements = process.elements().len(), "parsed process");

    let mut report = validator::validate(&process);
    if let Some(sc) = sidecar {
        report
            .errors
            .extend(validator::check_entity_schema(&process, sc));
    }
    tracing::info!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "validated process"
    );

    let should_emit = report.errors.is_empty() && (report.warnings.is_empty() || options.emit_on_warnings);
    let xml = if should_emit {
        let sidecar_path = sidecar.map(|s| s.path.to_string_lossy().into_owned());
        Some(emitter::emit(&process, sidecar_path.as_deref())
            .map_err(|e| CompileError::Io(e.to_string()))?)
    } else {
        None
    };
    tracing::info!(emitted = xml.is_some(), "emission phase complete");

    Ok(CompileOutput {
        process,
        report,
        xml,
    })
}

/// Compile a `.bpm` file from disk. Locates and loads the sidecar OpenAPI
/// document (same stem, `.yaml`/`.yml`) before parsing — a missing
/// sidecar is an I/O error, not a validation finding.
#[instrument(skip(options))]
pub fn compile_file(path: &Path, options: CompileOptions) -> Result<CompileOutput, CompileError> {
    let sidecar_path = sidecar::find_sidecar(path).ok_or_else(|| {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        CompileError::MissingOpenApi { stem }
    })?;
    let sc = sidecar::load_sidecar(&sidecar_path).map_err(|e| CompileError::Io(e.to_string()))?;
    let source = std::fs::read_to_string(path).map_err(|e| CompileError::Io(e.to_string()))?;
    compile_text_with_sidecar(&source, Some(&sc), options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_text_minimal_pipeline() {
        let src = r#"process "M" { id:"m" start "S" {id:"s"} end "E" {id:"e"} flow { "s" -> "e" } }"#;
        let out = compile_text(src, CompileOptions::default()).unwrap();
        assert!(out.report.is_ok());
        assert!(out.xml.is_some());
        assert!(out.xml.unwrap().contains("bpmn:startEvent"));
    }

    #[test]
    fn test_compile_text_skips_emission_on_error() {
        let src = r#"process "M" { id:"m" start "S" {id:"s"} flow { "s" -> "missing" } }"#;
        let out = compile_text(src, CompileOptions::default()).unwrap();
        assert!(!out.report.is_ok());
        assert!(out.xml.is_none());
    }

    #[test]
    fn test_compile_text_skips_emission_on_warnings_by_default() {
        let src = r#"process "P" { id:"p"
            start "S" { id:"s" }
            xorGateway "G" { id:"g" }
            end "E" { id:"e" }
            flow { "s" -> "g" "g" -> "e" [condition:"x>0"] }
        }"#;
        let out = compile_text(src, CompileOptions::default()).unwrap();
        assert!(out.report.is_ok());
        assert!(!out.report.warnings.is_empty());
        assert!(out.xml.is_none());

        let opts = CompileOptions {
            emit_on_warnings: true,
        };
        let out = compile_text(src, opts).unwrap();
        assert!(out.xml.is_some());
    }

    #[test]
    fn test_compile_file_missing_sidecar_is_io_error() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("bpmd-lib-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bpm = dir.join("p.bpm");
        std::fs::write(
            &bpm,
            r#"process "M" { id:"m" start "S" {id:"s"} end "E" {id:"e"} flow { "s" -> "e" } }"#,
        )
        .unwrap();

        let err = compile_file(&bpm, CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::MissingOpenApi { .. }));

        std::fs::write(dir.join("p.yaml"), "components:\n  schemas: {}\n").unwrap();
        let out = compile_file(&bpm, CompileOptions::default()).unwrap();
        assert!(out.report.is_ok());
        assert!(out.xml.is_some());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// Exercises the `#[instrument]`/`tracing::info!` calls against an
    /// actual subscriber for the duration of the test, rather than the
    /// no-subscriber-installed default the other tests run under.
    #[test]
    fn test_compile_text_runs_under_a_tracing_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let src = r#"process "M" { id:"m" start "S" {id:"s"} end "E" {id:"e"} flow { "s" -> "e" } }"#;
        let out = compile_text(src, CompileOptions::default()).unwrap();
        assert!(out.report.is_ok());
    }

    #[test]
    fn test_compile_file_resolves_entity_schema() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("bpmd-lib-entity-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bpm = dir.join("p.bpm");
        std::fs::write(
            &bpm,
            r#"process "P" { id:"p"
                start "S" { id:"s" }
                processEntity "Load" { entityName:"Customer" }
                end "E" { id:"e" }
                flow { "s" -> "customer" "customer" -> "e" }
            }"#,
        )
        .unwrap();
        std::fs::write(dir.join("p.yaml"), "components:\n  schemas:\n    Order: {}\n").unwrap();

        let out = compile_file(&bpm, CompileOptions::default()).unwrap();
        assert!(out.report.errors.iter().any(|d| d.rule == "V8"));
        assert!(out.xml.is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
