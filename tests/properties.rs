//! Property-based tests for the universal invariants (P1, P2, P3, P4, P7).
//! These exercise the pipeline as an external caller would, through
//! `bpmd_compiler`'s public API, rather than reaching into module
//! internals.

use bpmd_compiler::{compile_text, parser, ast::Element, CompileOptions};
use proptest::prelude::*;

/// Projects a parsed `Process` back into DSL source text, for the
/// `processEntity`-free subset of elements P1 is scoped to. Not a
/// public operation: a test-only inverse of `parser::parse` good enough
/// to round-trip what `linear_chain_source` and similar generators
/// produce.
fn process_to_dsl(process: &bpmd_compiler::Process) -> String {
    let mut out = format!("process \"{}\" {{ id:\"{}\" ", process.name, process.id);
    for el in process.elements() {
        match el {
            Element::Start { id, name } => {
                out.push_str(&format!(r#"start "{name}" {{ id:"{id}" }} "#));
            }
            Element::End { id, name } => {
                out.push_str(&format!(r#"end "{name}" {{ id:"{id}" }} "#));
            }
            Element::ServiceTask { id, name, task_type, .. } => {
                out.push_str(&format!(
                    r#"serviceTask "{name}" {{ id:"{id}" task_type:"{task_type}" }} "#
                ));
            }
            Element::XorGateway { id, name, .. } => {
                out.push_str(&format!(r#"xorGateway "{name}" {{ id:"{id}" }} "#));
            }
            Element::ScriptCall { .. } | Element::ProcessEntity { .. } => unreachable!(
                "process_to_dsl only handles the processEntity/scriptCall-free subset"
            ),
        }
    }
    out.push_str("flow { ");
    for flow in process.flows() {
        match &flow.condition {
            Some(cond) => out.push_str(&format!(
                r#""{}" -> "{}" [condition:"{}"] "#,
                flow.source_id, flow.target_id, cond
            )),
            None => out.push_str(&format!(r#""{}" -> "{}" "#, flow.source_id, flow.target_id)),
        }
    }
    out.push_str("} }");
    out
}

/// Generates a small valid linear chain `start -> (service task)* -> end`
/// with N service tasks, each with a distinct id, as `.bpm` source text.
fn linear_chain_source(task_count: usize) -> String {
    let mut src = String::from(r#"process "Gen" { id:"gen" start "S" { id:"s" } "#);
    for i in 0..task_count {
        src.push_str(&format!(
            r#"serviceTask "T{i}" {{ id:"t{i}" task_type:"do_{i}" }} "#
        ));
    }
    src.push_str(r#"end "E" { id:"e" } flow { "s" -> "#);
    if task_count == 0 {
        src.push_str(r#""e""#);
    } else {
        src.push_str("\"t0\" ");
        for i in 0..task_count {
            let next = if i + 1 < task_count {
                format!("t{}", i + 1)
            } else {
                "e".to_string()
            };
            src.push_str(&format!("\"t{i}\" -> \"{next}\" "));
        }
    }
    src.push_str("} }");
    src
}

proptest! {
    /// P4: emitting the same source text twice produces byte-identical XML.
    #[test]
    fn p4_emission_is_deterministic(task_count in 0usize..8) {
        let src = linear_chain_source(task_count);
        let out1 = compile_text(&src, CompileOptions::default()).unwrap();
        let out2 = compile_text(&src, CompileOptions::default()).unwrap();
        prop_assert_eq!(out1.xml, out2.xml);
    }

    /// P1: parsing, projecting back to DSL text, and re-parsing a
    /// `processEntity`-free source yields a structurally equal AST — same
    /// elements and flows, since there are no synthetic nodes to account
    /// for in this subset.
    #[test]
    fn p1_parse_emit_dsl_parse_round_trip(task_count in 0usize..8) {
        let src = linear_chain_source(task_count);
        let process1 = parser::parse(&src).unwrap();
        let dsl = process_to_dsl(&process1);
        let process2 = parser::parse(&dsl).unwrap();
        prop_assert_eq!(process1.elements(), process2.elements());
        prop_assert_eq!(process1.flows(), process2.flows());
    }

    /// P7: a source with N independently-injected duplicate-id errors
    /// yields a report with at least N diagnostics.
    #[test]
    fn p7_validator_reports_at_least_n_injected_errors(n in 2usize..6) {
        // Build N+1 Start/End pairs sharing the same id "dup", each
        // duplication beyond the first is one independent V1 finding.
        let mut src = String::from(r#"process "Gen" { id:"gen" "#);
        for _ in 0..n {
            src.push_str(r#"start "S" { id:"dup" } "#);
        }
        src.push_str(r#"end "E" { id:"e" } flow { "dup" -> "e" } }"#);
        let out = compile_text(&src, CompileOptions::default()).unwrap();
        let dup_errors = out.report.errors.iter().filter(|d| d.rule == "V1").count();
        prop_assert!(dup_errors >= n - 1);
    }
}

/// P1, gateway/condition branch: a source with a conditional flow out of
/// an `xorGateway` survives the same round trip.
#[test]
fn p1_round_trip_covers_gateway_and_condition() {
    let src = r#"process "P" { id:"p"
        start "S" { id:"s" }
        xorGateway "G" { id:"g" }
        serviceTask "A" { id:"a" task_type:"do_a" }
        serviceTask "B" { id:"b" task_type:"do_b" }
        end "E" { id:"e" }
        flow { "s" -> "g" "g" -> "a" [condition:"x>0"] "g" -> "b" "a" -> "e" "b" -> "e" }
    }"#;
    let process1 = parser::parse(src).unwrap();
    let dsl = process_to_dsl(&process1);
    let process2 = parser::parse(&dsl).unwrap();
    assert_eq!(process1.elements(), process2.elements());
    assert_eq!(process1.flows(), process2.flows());
}

/// P3: the layout engine is deterministic across repeated runs on the
/// same (post-expansion) node/edge lists.
#[test]
fn p3_layout_determinism_across_many_shapes() {
    use bpmd_compiler::layout::{layout, LayoutConfig, LayoutEdge, LayoutNode, ShapeKind};

    let nodes = vec![
        LayoutNode { id: "s".into(), kind: ShapeKind::Event },
        LayoutNode { id: "g".into(), kind: ShapeKind::Gateway },
        LayoutNode { id: "a".into(), kind: ShapeKind::Task },
        LayoutNode { id: "b".into(), kind: ShapeKind::Task },
        LayoutNode { id: "c".into(), kind: ShapeKind::Task },
        LayoutNode { id: "e".into(), kind: ShapeKind::Event },
    ];
    let edges = vec![
        LayoutEdge { flow_id: "f1".into(), source_id: "s".into(), target_id: "g".into() },
        LayoutEdge { flow_id: "f2".into(), source_id: "g".into(), target_id: "a".into() },
        LayoutEdge { flow_id: "f3".into(), source_id: "g".into(), target_id: "b".into() },
        LayoutEdge { flow_id: "f4".into(), source_id: "g".into(), target_id: "c".into() },
        LayoutEdge { flow_id: "f5".into(), source_id: "a".into(), target_id: "e".into() },
        LayoutEdge { flow_id: "f6".into(), source_id: "b".into(), target_id: "e".into() },
        LayoutEdge { flow_id: "f7".into(), source_id: "c".into(), target_id: "e".into() },
    ];
    let cfg = LayoutConfig::default();

    let first = layout(&nodes, &edges, &cfg);
    for _ in 0..10 {
        let again = layout(&nodes, &edges, &cfg);
        assert_eq!(first.positions.len(), again.positions.len());
        for (id, rect) in &first.positions {
            assert_eq!(again.positions[id], *rect);
        }
        for (id, waypoints) in &first.edges {
            assert_eq!(&again.edges[id], waypoints);
        }
    }
}

/// P2: synthesized ids from `ProcessEntity` expansion (`{id}-validation-
/// gateway`, `{id}-validation-error`) never collide with the entity's own
/// id or with its sibling elements in the ordinary case.
#[test]
fn p2_synthetic_ids_never_collide_with_declared_ids() {
    let clean_src = r#"process "P" { id:"p"
        start "S" { id:"s" }
        processEntity "Load" { entityName:"Customer" }
        end "E" { id:"e" }
        flow { "s" -> "customer" "customer" -> "e" }
    }"#;
    let out = compile_text(clean_src, CompileOptions::default()).unwrap();
    assert!(out.report.is_ok());
    let xml = out.xml.unwrap();
    assert_eq!(xml.matches("id=\"customer-validation-gateway\"").count(), 1);
    assert_eq!(xml.matches("id=\"customer-validation-error\"").count(), 1);
}

/// P5: every BPMNShape has a matching semantic element id and vice
/// versa; every BPMNEdge matches a sequenceFlow id.
#[test]
fn p5_diagram_elements_match_semantic_elements() {
    let src = r#"process "P" { id:"p"
        start "S" { id:"s" }
        processEntity "Load" { entityName:"Customer" }
        serviceTask "Next" { id:"next" task_type:"continue" }
        end "E" { id:"e" }
        flow { "s" -> "customer" "customer" -> "next" "next" -> "e" }
    }"#;
    let out = compile_text(src, CompileOptions::default()).unwrap();
    let xml = out.xml.unwrap();

    let element_ids = ["s", "customer", "customer-validation-gateway", "customer-validation-error", "next", "e"];
    for id in element_ids {
        let shape_needle = format!("bpmnElement=\"{id}\"");
        assert!(xml.contains(&shape_needle), "missing BPMNShape for {id}");
    }

    let flow_ids = [
        "flow_s_to_customer",
        "flow_customer_to_customer-validation-gateway",
        "flow_customer-validation-gateway_to_next",
        "flow_customer-validation-gateway_to_customer-validation-error",
        "flow_next_to_e",
    ];
    for fid in flow_ids {
        assert!(
            xml.contains(&format!("<bpmn:sequenceFlow id=\"{fid}\"")),
            "missing sequenceFlow {fid}"
        );
        assert!(
            xml.contains(&format!("bpmnElement=\"{fid}\"")),
            "missing BPMNEdge for {fid}"
        );
    }
}

/// P6: exactly one outgoing edge is marked `default` on a gateway iff
/// exactly one of its outgoing edges is unconditional; otherwise none is.
#[test]
fn p6_default_marking_matches_unconditional_edge_presence() {
    // Two outgoing edges, one conditional: default is marked.
    let src_with_default = r#"process "P" { id:"p"
        start "S" { id:"s" }
        xorGateway "G" { id:"g" }
        serviceTask "A" { id:"a" task_type:"do_a" }
        serviceTask "B" { id:"b" task_type:"do_b" }
        end "E" { id:"e" }
        flow { "s" -> "g" "g" -> "a" [condition:"x>0"] "g" -> "b" "a" -> "e" "b" -> "e" }
    }"#;
    let out = compile_text(src_with_default, CompileOptions::default()).unwrap();
    let xml = out.xml.unwrap();
    assert_eq!(xml.matches("default=").count(), 1);

    // Single outgoing edge, unconditional: no default attribute needed
    // since there's no ambiguity to resolve.
    let src_passthrough = r#"process "P" { id:"p"
        start "S" { id:"s" }
        xorGateway "G" { id:"g" }
        end "E" { id:"e" }
        flow { "s" -> "g" "g" -> "e" }
    }"#;
    let out = compile_text(src_passthrough, CompileOptions::default()).unwrap();
    let xml = out.xml.unwrap();
    assert_eq!(xml.matches("default=").count(), 0);
}
