//! Structural and engine-compatibility checks over a parsed `Process`.
//!
//! Validation is read-only and exhaustive: every violation is collected
//! into one `Report` rather than stopping at the first finding, so a
//! caller sees the whole picture in a single pass (mirrors
//! `authoring::validate::validate_dto`'s `Vec<ValidationError>` habit).

use crate::ast::{Element, Process};
use crate::error::{Diagnostic, ErrorKind, Report};
use std::collections::HashMap;

/// Validate `process`, returning every error and warning found.
///
/// Checks run in a fixed order (V1..V9, plus the V5b open-question warning)
/// so diagnostics are reported deterministically, but none of them stop
/// the others from running — only a dangling-reference endpoint is
/// skipped when computing in/out-degree for *that* flow, since there is
/// no element to attribute the degree to.
pub fn validate(process: &Process) -> Report {
    let mut report = Report::default();

    check_unique_ids(process, &mut report);
    check_flow_endpoints(process, &mut report);
    check_event_cardinality(process, &mut report);
    check_connectivity(process, &mut report);
    check_gateways(process, &mut report);
    check_process_entity_placement(process, &mut report);
    check_engine_compat(process, &mut report);
    check_self_loops(process, &mut report);

    report
}

/// V1: element ids must be unique within a process.
fn check_unique_ids(process: &Process, report: &mut Report) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for el in process.elements() {
        let count = seen.entry(el.id()).or_insert(0);
        *count += 1;
        if *count > 1 {
            report.errors.push(
                Diagnostic::new(
                    ErrorKind::Semantic,
                    "V1",
                    format!("duplicate element id '{}'", el.id()),
                )
                .with_element(el.id()),
            );
        }
    }
}

/// V2: every flow's `source_id` and `target_id` must resolve.
fn check_flow_endpoints(process: &Process, report: &mut Report) {
    for flow in process.flows() {
        if !process.contains(&flow.source_id) {
            report.errors.push(Diagnostic::new(
                ErrorKind::Semantic,
                "V2",
                format!(
                    "flow source '{}' does not reference a known element",
                    flow.source_id
                ),
            ));
        }
        if !process.contains(&flow.target_id) {
            report.errors.push(Diagnostic::new(
                ErrorKind::Semantic,
                "V2",
                format!(
                    "flow target '{}' does not reference a known element",
                    flow.target_id
                ),
            ));
        }
    }
}

/// V3: event cardinality (at least one start, at least one end) and the
/// in/out-degree rules on start/end events.
fn check_event_cardinality(process: &Process, report: &mut Report) {
    let start_count = process.elements().iter().filter(|e| e.is_start()).count();
    let end_count = process.elements().iter().filter(|e| e.is_end()).count();

    if start_count == 0 {
        report.errors.push(Diagnostic::new(
            ErrorKind::Semantic,
            "V3",
            "process has no StartEvent",
        ));
    }
    if end_count == 0 {
        report.errors.push(Diagnostic::new(
            ErrorKind::Semantic,
            "V3",
            "process has no EndEvent",
        ));
    }

    for el in process.elements() {
        if el.is_start() && process.in_degree(el.id()) > 0 {
            report.errors.push(
                Diagnostic::new(
                    ErrorKind::Semantic,
                    "V3",
                    format!("StartEvent '{}' has incoming flows", el.id()),
                )
                .with_element(el.id()),
            );
        }
        if el.is_end() && process.out_degree(el.id()) > 0 {
            report.errors.push(
                Diagnostic::new(
                    ErrorKind::Semantic,
                    "V3",
                    format!("EndEvent '{}' has outgoing flows", el.id()),
                )
                .with_element(el.id()),
            );
        }
    }
}

/// V4: exactly one connected component spanning every element. Strict by
/// default — orphans are errors, not warnings.
fn check_connectivity(process: &Process, report: &mut Report) {
    if process.elements().is_empty() {
        return;
    }
    let components = process.connected_components();
    if components > 1 {
        for el in process.elements() {
            if process.in_degree(el.id()) == 0 && process.out_degree(el.id()) == 0 {
                report.errors.push(
                    Diagnostic::new(
                        ErrorKind::Semantic,
                        "V4",
                        format!("element '{}' is unreachable (disconnected graph)", el.id()),
                    )
                    .with_element(el.id()),
                );
            }
        }
        if !report.errors.iter().any(|d| d.rule == "V4") {
            report.errors.push(Diagnostic::new(
                ErrorKind::Semantic,
                "V4",
                format!("process has {} disconnected components", components),
            ));
        }
    }
}

/// V5 / V5b: gateway outgoing-edge shape.
///
/// - `k == 0` outgoing edges on a gateway is also flagged here (a
///   dead-end gateway) — a gateway with nowhere to branch to is never
///   valid.
/// - `k == 1` with a condition: accepted with a warning, since a lone
///   conditional branch is suspicious but not structurally broken.
/// - `k >= 2`: every edge needs a condition except at most one (the
///   default branch).
fn check_gateways(process: &Process, report: &mut Report) {
    for el in process.elements() {
        if !el.is_gateway() {
            continue;
        }
        let successors = process.successors(el.id());
        let out_flows: Vec<_> = process
            .flows()
            .iter()
            .filter(|f| f.source_id == el.id())
            .collect();

        if successors.is_empty() {
            report.errors.push(
                Diagnostic::new(
                    ErrorKind::Semantic,
                    "V5",
                    format!("XorGateway '{}' has no outgoing flows", el.id()),
                )
                .with_element(el.id()),
            );
            continue;
        }

        if out_flows.len() == 1 {
            if out_flows[0].condition.is_some() {
                report.warnings.push(
                    Diagnostic::new(
                        ErrorKind::Semantic,
                        "V5b",
                        format!(
                            "XorGateway '{}' has a single outgoing flow carrying a condition",
                            el.id()
                        ),
                    )
                    .with_element(el.id()),
                );
            }
            continue;
        }

        let unconditional = out_flows.iter().filter(|f| f.condition.is_none()).count();
        if unconditional > 1 {
            report.errors.push(
                Diagnostic::new(
                    ErrorKind::Semantic,
                    "V5",
                    format!(
                        "XorGateway '{}' has {} unconditional outgoing flows; at most one default branch is allowed",
                        el.id(),
                        unconditional
                    ),
                )
                .with_element(el.id()),
            );
        }
    }
}

/// V6: at most one ProcessEntity per process; if present it must be the
/// unique successor of a StartEvent with no intervening elements.
fn check_process_entity_placement(process: &Process, report: &mut Report) {
    let entities: Vec<&Element> = process
        .elements()
        .iter()
        .filter(|e| matches!(e, Element::ProcessEntity { .. }))
        .collect();

    if entities.len() > 1 {
        for e in &entities {
            report.errors.push(
                Diagnostic::new(
                    ErrorKind::Semantic,
                    "V6",
                    format!("multiple ProcessEntity elements found ('{}')", e.id()),
                )
                .with_element(e.id()),
            );
        }
        return;
    }

    let Some(entity) = entities.first() else {
        return;
    };

    let starts: Vec<&Element> = process
        .elements()
        .iter()
        .filter(|e| e.is_start())
        .collect();

    let is_unique_successor_of_a_start = starts
        .iter()
        .any(|s| process.successors(s.id()) == vec![entity.id()]);

    if !is_unique_successor_of_a_start {
        report.errors.push(
            Diagnostic::new(
                ErrorKind::Semantic,
                "V6",
                format!(
                    "ProcessEntity '{}' must be the unique successor of a StartEvent",
                    entity.id()
                ),
            )
            .with_element(entity.id()),
        );
    }
}

/// V7: engine-compatibility lint.
///
/// - A condition on an edge leaving a non-gateway element is rejected.
/// - Non-gateway, non-end elements must have exactly one outgoing flow.
/// - Legacy `input_vars`/`output_vars` coexisting with full mappings on
///   the same element is rejected (not silently merged).
fn check_engine_compat(process: &Process, report: &mut Report) {
    for flow in process.flows() {
        let Some(source) = process.element(&flow.source_id) else {
            continue;
        };
        if flow.condition.is_some() && !source.is_gateway() {
            report.errors.push(Diagnostic::new(
                ErrorKind::EngineCompat,
                "V7",
                format!(
                    "flow '{}' -> '{}' carries a condition but its source is not a gateway",
                    flow.source_id, flow.target_id
                ),
            ));
        }
    }

    for el in process.elements() {
        if !el.is_gateway() && !el.is_end() {
            let out = process.out_degree(el.id());
            if out != 1 {
                report.errors.push(
                    Diagnostic::new(
                        ErrorKind::Semantic,
                        "V7",
                        format!(
                            "element '{}' must have exactly one outgoing flow, has {}",
                            el.id(),
                            out
                        ),
                    )
                    .with_element(el.id()),
                );
            }
        }
        if el.has_legacy_mapping_conflict() {
            report.errors.push(
                Diagnostic::new(
                    ErrorKind::EngineCompat,
                    "V7",
                    format!(
                        "element '{}' mixes legacy input_vars/output_vars with explicit mappings",
                        el.id()
                    ),
                )
                .with_element(el.id()),
            );
        }
    }
}

/// V9: a flow from an element to itself is always rejected, gateways
/// included — a gateway self-loop can otherwise slip past every other
/// check (a conditional self-edge alongside a valid forward exit reads as
/// a structurally fine gateway to V5, and gateways are exempt from V7's
/// single-outgoing-flow rule).
fn check_self_loops(process: &Process, report: &mut Report) {
    for flow in process.flows() {
        if flow.source_id == flow.target_id {
            report.errors.push(
                Diagnostic::new(
                    ErrorKind::Semantic,
                    "V9",
                    format!("element '{}' has a self-loop flow", flow.source_id),
                )
                .with_element(flow.source_id.clone()),
            );
        }
    }
}

/// Resolve every `ProcessEntity::entity_name` against a loaded sidecar's
/// `components.schemas` names.
///
/// Kept separate from `validate` because it needs the sidecar document,
/// which `validate`'s contract (`validate(process) -> Report`) does
/// not take — this is only reachable from a file-based compile, where a
/// sidecar is guaranteed to exist.
pub fn check_entity_schema(process: &Process, sidecar: &crate::sidecar::Sidecar) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for el in process.elements() {
        if let Element::ProcessEntity {
            id, entity_name, ..
        } = el
        {
            if !crate::sidecar::resolves_entity_name(sidecar, entity_name) {
                diagnostics.push(
                    Diagnostic::new(
                        ErrorKind::Semantic,
                        "V8",
                        format!(
                            "entity name '{}' has no matching schema in '{}'",
                            entity_name,
                            sidecar.path.display()
                        ),
                    )
                    .with_element(id),
                );
            }
        }
    }
    diagnostics
}
