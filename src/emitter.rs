//! Encodes a validated `Process` into BPMN 2.0 XML with engine extensions
//! and diagram interchange.
//!
//! Grounded on `authoring::export_bpmn::dto_to_bpmn_xml`'s overall shape —
//! a `String` built with `write!`/`writeln!` rather than a streaming XML
//! writer — and its `sanitize_ncname`/`xml_escape`/`seq_flow_id` helpers,
//! extended with i/o-mapping, header, and inline-script extensions that
//! export helper never needed.

use crate::ast::{Element, Flow, Mapping, Process};
use crate::layout::{layout as run_layout, route_edge, LayoutConfig, LayoutEdge, LayoutNode, ShapeKind};
use anyhow::Result;
use std::collections::HashSet;
use std::fmt::Write;

const BPMN_NS: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";
const BPMNDI_NS: &str = "http://www.omg.org/spec/BPMN/20100524/DI";
const DC_NS: &str = "http://www.omg.org/spec/DD/20100524/DC";
const DI_NS: &str = "http://www.omg.org/spec/DD/20100524/DI";
const ZEEBE_NS: &str = "http://camunda.org/schema/zeebe/1.0";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

const VALIDATION_ERROR_ID: &str = "process-entity-validation-error";
const VALIDATION_ERROR_CODE: &str = "PROCESS_ENTITY_VALIDATION_ERROR";
const VALIDATION_CONDITION: &str = "=entityValidationResult.isValid = false";

/// Emit BPMN 2.0 XML for `process`. `sidecar_path` feeds the `entityModel`
/// header on a synthesized entity-validator service task; `None`
/// when the process was parsed from text with no known file path.
pub fn emit(process: &Process, sidecar_path: Option<&str>) -> Result<String> {
    let (elements, flows, synthetic_error_ends, expansions) =
        expand_process_entities(process, sidecar_path);
    let has_entity_validation = !synthetic_error_ends.is_empty();

    let layout_nodes: Vec<LayoutNode> = elements
        .iter()
        .map(|el| LayoutNode {
            id: el.id().to_string(),
            kind: shape_kind(el),
        })
        .collect();
    let layout_edges: Vec<LayoutEdge> = flows
        .iter()
        .map(|f| LayoutEdge {
            flow_id: flow_id(&f.source_id, &f.target_id),
            source_id: f.source_id.clone(),
            target_id: f.target_id.clone(),
        })
        .collect();
    let mut diagram = run_layout(&layout_nodes, &layout_edges, &LayoutConfig::default());
    apply_entity_validation_layout(&mut diagram, &expansions, &flows);

    let defaults = compute_gateway_defaults(&elements, &flows);

    let mut xml = String::new();
    writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(xml, r#"<bpmn:definitions xmlns:bpmn="{BPMN_NS}""#)?;
    writeln!(xml, r#"                  xmlns:bpmndi="{BPMNDI_NS}""#)?;
    writeln!(xml, r#"                  xmlns:dc="{DC_NS}""#)?;
    writeln!(xml, r#"                  xmlns:di="{DI_NS}""#)?;
    writeln!(xml, r#"                  xmlns:zeebe="{ZEEBE_NS}""#)?;
    writeln!(xml, r#"                  xmlns:xsi="{XSI_NS}""#)?;
    writeln!(
        xml,
        r#"                  id="Definitions_{}" targetNamespace="http://bpmn.io/schema/bpmn">"#,
        sanitize_ncname(&process.id)
    )?;

    if has_entity_validation {
        writeln!(
            xml,
            r#"  <bpmn:error id="{VALIDATION_ERROR_ID}" errorCode="{VALIDATION_ERROR_CODE}" />"#
        )?;
    }

    let version_attr = process
        .version
        .as_deref()
        .map(|v| format!(r#" zeebe:versionTag="{}""#, xml_escape(v)))
        .unwrap_or_default();
    writeln!(
        xml,
        r#"  <bpmn:process id="{}" name="{}" isExecutable="true"{}>"#,
        sanitize_ncname(&process.id),
        xml_escape(&process.name),
        version_attr
    )?;

    for el in &elements {
        write_element(&mut xml, el, &defaults, &synthetic_error_ends)?;
    }
    for f in &flows {
        write_flow(&mut xml, f)?;
    }

    writeln!(xml, r#"  </bpmn:process>"#)?;

    // ── Diagram section ──
    writeln!(xml, r#"  <bpmndi:BPMNDiagram id="BPMNDiagram_1">"#)?;
    writeln!(
        xml,
        r#"    <bpmndi:BPMNPlane id="BPMNPlane_1" bpmnElement="{}">"#,
        sanitize_ncname(&process.id)
    )?;
    for el in &elements {
        let id = el.id();
        if let Some(rect) = diagram.positions.get(id) {
            writeln!(
                xml,
                r#"      <bpmndi:BPMNShape id="{}_di" bpmnElement="{}">
        <dc:Bounds x="{:.0}" y="{:.0}" width="{:.0}" height="{:.0}" />
      </bpmndi:BPMNShape>"#,
                id, id, rect.x, rect.y, rect.width, rect.height
            )?;
        }
    }
    for f in &flows {
        let fid = flow_id(&f.source_id, &f.target_id);
        if let Some(waypoints) = diagram.edges.get(&fid) {
            writeln!(
                xml,
                r#"      <bpmndi:BPMNEdge id="{}_di" bpmnElement="{}">"#,
                fid, fid
            )?;
            for wp in waypoints {
                writeln!(xml, r#"        <di:waypoint x="{:.0}" y="{:.0}" />"#, wp.x, wp.y)?;
            }
            writeln!(xml, r#"      </bpmndi:BPMNEdge>"#)?;
        }
    }
    writeln!(xml, r#"    </bpmndi:BPMNPlane>"#)?;
    writeln!(xml, r#"  </bpmndi:BPMNDiagram>"#)?;
    writeln!(xml, r#"</bpmn:definitions>"#)?;

    Ok(xml)
}

fn shape_kind(el: &Element) -> ShapeKind {
    match el {
        Element::Start { .. } | Element::End { .. } => ShapeKind::Event,
        Element::XorGateway { .. } => ShapeKind::Gateway,
        Element::ScriptCall { .. } | Element::ServiceTask { .. } => ShapeKind::Task,
        Element::ProcessEntity { .. } => ShapeKind::Task,
    }
}

/// Deterministic sequence-flow id: `flow_{source}_to_{target}`.
fn flow_id(source_id: &str, target_id: &str) -> String {
    format!("flow_{}_to_{}", source_id, target_id)
}

/// The three synthetic ids one `ProcessEntity` expands into, plus the
/// entity's own id — the emitter's post-layout positioning override keys
/// off this triple rather than re-deriving the ids from naming convention.
struct EntityExpansion {
    entity_id: String,
    gateway_id: String,
    error_id: String,
}

/// Expand every `ProcessEntity` into a validator service task, a
/// validation gateway, and an error end, rewiring the single edge that
/// used to leave it. Runs against a private working copy; the AST itself
/// is never mutated.
fn expand_process_entities(
    process: &Process,
    sidecar_path: Option<&str>,
) -> (Vec<Element>, Vec<Flow>, HashSet<String>, Vec<EntityExpansion>) {
    let mut elements = Vec::with_capacity(process.elements().len());
    let mut error_end_ids = HashSet::new();
    let mut expansions = Vec::new();

    for el in process.elements() {
        if let Element::ProcessEntity {
            id,
            name,
            entity_name,
        } = el
        {
            let gateway_id = validation_gateway_id(id);
            let error_id = validation_error_id(id);
            expansions.push(EntityExpansion {
                entity_id: id.clone(),
                gateway_id: gateway_id.clone(),
                error_id: error_id.clone(),
            });

            elements.push(Element::ServiceTask {
                id: id.clone(),
                name: name.clone(),
                task_type: "process-entity-validator".to_string(),
                retries: 3,
                headers: vec![
                    ("entityName".to_string(), entity_name.clone()),
                    (
                        "entityModel".to_string(),
                        sidecar_path.unwrap_or_default().to_string(),
                    ),
                ],
                input_mappings: vec![Mapping {
                    source: "processEntity".to_string(),
                    target: "processEntity".to_string(),
                }],
                output_mappings: vec![Mapping {
                    source: "validationResult".to_string(),
                    target: "entityValidationResult".to_string(),
                }],
                result_variable: "result".to_string(),
                legacy_input_vars: None,
                legacy_output_vars: None,
            });
            elements.push(Element::XorGateway {
                id: gateway_id,
                name: "Validation Check".to_string(),
                default_condition: None,
            });
            elements.push(Element::End {
                id: error_id.clone(),
                name: "Validation Error".to_string(),
            });
            error_end_ids.insert(error_id);
        } else {
            elements.push(el.clone());
        }
    }

    let mut flows = Vec::with_capacity(process.flows().len());
    for f in process.flows() {
        if let Some(Element::ProcessEntity { id, .. }) = process.element(&f.source_id) {
            let gateway_id = validation_gateway_id(id);
            let error_id = validation_error_id(id);
            flows.push(Flow {
                source_id: id.clone(),
                target_id: gateway_id.clone(),
                condition: None,
            });
            flows.push(Flow {
                source_id: gateway_id.clone(),
                target_id: f.target_id.clone(),
                condition: None,
            });
            flows.push(Flow {
                source_id: gateway_id,
                target_id: error_id,
                condition: Some(VALIDATION_CONDITION.to_string()),
            });
        } else {
            flows.push(f.clone());
        }
    }

    (elements, flows, error_end_ids, expansions)
}

fn validation_gateway_id(entity_id: &str) -> String {
    format!("{}-validation-gateway", entity_id)
}

fn validation_error_id(entity_id: &str) -> String {
    format!("{}-validation-error", entity_id)
}

/// Overrides the general level-based layout for the validation sub-graph
/// each `ProcessEntity` expands into: the gateway sits 80 px to the right
/// of the entity's task, vertically centered on it, and the error end
/// sits directly below the gateway, 60 px down. The level-based engine
/// doesn't know about this relationship, so it places both a full level
/// away instead; this runs after `run_layout` and re-routes the edges
/// incident to the moved rects so waypoints stay anchored to the new
/// positions.
fn apply_entity_validation_layout(
    diagram: &mut crate::layout::Layout,
    expansions: &[EntityExpansion],
    flows: &[Flow],
) {
    if expansions.is_empty() {
        return;
    }

    for exp in expansions {
        let Some(&entity_rect) = diagram.positions.get(&exp.entity_id) else {
            continue;
        };
        if let Some(gateway_rect) = diagram.positions.get_mut(&exp.gateway_id) {
            gateway_rect.x = entity_rect.x + 80.0;
            gateway_rect.y = entity_rect.y + entity_rect.height / 2.0 - gateway_rect.height / 2.0;
        }
        let Some(&gateway_rect) = diagram.positions.get(&exp.gateway_id) else {
            continue;
        };
        if let Some(error_rect) = diagram.positions.get_mut(&exp.error_id) {
            error_rect.x = gateway_rect.x;
            error_rect.y = gateway_rect.y + 60.0;
        }
    }

    for f in flows {
        let touches_expansion = expansions.iter().any(|exp| {
            f.source_id == exp.entity_id
                || f.target_id == exp.gateway_id
                || f.source_id == exp.gateway_id
                || f.target_id == exp.error_id
        });
        if !touches_expansion {
            continue;
        }
        let (Some(&src), Some(&dst)) = (
            diagram.positions.get(&f.source_id),
            diagram.positions.get(&f.target_id),
        ) else {
            continue;
        };
        diagram
            .edges
            .insert(flow_id(&f.source_id, &f.target_id), route_edge(&src, &dst));
    }
}

/// For every gateway with two or more outgoing flows and exactly one
/// unconditional among them, its id maps to that flow's deterministic id
/// (P6). Gateways with a single outgoing flow, or with more than one
/// unconditional flow, have no entry.
fn compute_gateway_defaults(
    elements: &[Element],
    flows: &[Flow],
) -> std::collections::HashMap<String, String> {
    let mut defaults = std::collections::HashMap::new();
    for el in elements {
        if !el.is_gateway() {
            continue;
        }
        let out: Vec<&Flow> = flows.iter().filter(|f| f.source_id == el.id()).collect();
        if out.len() < 2 {
            continue;
        }
        let unconditional: Vec<&&Flow> = out.iter().filter(|f| f.condition.is_none()).collect();
        if unconditional.len() == 1 {
            let f = unconditional[0];
            defaults.insert(
                el.id().to_string(),
                flow_id(&f.source_id, &f.target_id),
            );
        }
    }
    defaults
}

fn write_element(
    xml: &mut String,
    el: &Element,
    defaults: &std::collections::HashMap<String, String>,
    synthetic_error_ends: &HashSet<String>,
) -> Result<()> {
    match el {
        Element::Start { id, name } => {
            writeln!(
                xml,
                r#"    <bpmn:startEvent id="{}" name="{}" />"#,
                id,
                xml_escape(name)
            )?;
        }
        Element::End { id, name } => {
            if synthetic_error_ends.contains(id) {
                writeln!(
                    xml,
                    r#"    <bpmn:endEvent id="{}" name="{}">
      <bpmn:errorEventDefinition errorRef="{}" />
    </bpmn:endEvent>"#,
                    id,
                    xml_escape(name),
                    VALIDATION_ERROR_ID
                )?;
            } else {
                writeln!(
                    xml,
                    r#"    <bpmn:endEvent id="{}" name="{}" />"#,
                    id,
                    xml_escape(name)
                )?;
            }
        }
        Element::XorGateway { id, name, .. } => {
            let default_attr = defaults
                .get(id)
                .map(|fid| format!(r#" default="{}""#, fid))
                .unwrap_or_default();
            writeln!(
                xml,
                r#"    <bpmn:exclusiveGateway id="{}" name="{}"{} />"#,
                id,
                xml_escape(name),
                default_attr
            )?;
        }
        Element::ScriptCall {
            id,
            name,
            script,
            result_variable,
            ..
        } => {
            writeln!(
                xml,
                r#"    <bpmn:scriptTask id="{}" name="{}">"#,
                id,
                xml_escape(name)
            )?;
            writeln!(xml, r#"      <bpmn:extensionElements>"#)?;
            writeln!(
                xml,
                r#"        <zeebe:script expression="={}" resultVariable="{}" />"#,
                xml_escape(script),
                xml_escape(result_variable)
            )?;
            write_io_mapping(xml, el)?;
            writeln!(xml, r#"      </bpmn:extensionElements>"#)?;
            writeln!(xml, r#"    </bpmn:scriptTask>"#)?;
        }
        Element::ServiceTask {
            id,
            name,
            task_type,
            retries,
            headers,
            ..
        } => {
            writeln!(
                xml,
                r#"    <bpmn:serviceTask id="{}" name="{}">"#,
                id,
                xml_escape(name)
            )?;
            writeln!(xml, r#"      <bpmn:extensionElements>"#)?;
            writeln!(
                xml,
                r#"        <zeebe:taskDefinition type="{}" retries="{}" />"#,
                xml_escape(task_type),
                retries
            )?;
            if !headers.is_empty() {
                writeln!(xml, r#"        <zeebe:taskHeaders>"#)?;
                for (k, v) in headers {
                    writeln!(
                        xml,
                        r#"          <zeebe:header key="{}" value="{}" />"#,
                        xml_escape(k),
                        xml_escape(v)
                    )?;
                }
                writeln!(xml, r#"        </zeebe:taskHeaders>"#)?;
            }
            write_io_mapping(xml, el)?;
            writeln!(xml, r#"      </bpmn:extensionElements>"#)?;
            writeln!(xml, r#"    </bpmn:serviceTask>"#)?;
        }
        Element::ProcessEntity { .. } => {
            unreachable!("ProcessEntity is expanded before emission and never written directly")
        }
    }
    Ok(())
}

fn write_io_mapping(xml: &mut String, el: &Element) -> Result<()> {
    let inputs = el.effective_input_mappings();
    let outputs = el.effective_output_mappings();
    if inputs.is_empty() && outputs.is_empty() {
        return Ok(());
    }
    writeln!(xml, r#"        <zeebe:ioMapping>"#)?;
    for Mapping { source, target } in &inputs {
        writeln!(
            xml,
            r#"          <zeebe:input source="={}" target="{}" />"#,
            xml_escape(source),
            xml_escape(target)
        )?;
    }
    for Mapping { source, target } in &outputs {
        writeln!(
            xml,
            r#"          <zeebe:output source="={}" target="{}" />"#,
            xml_escape(source),
            xml_escape(target)
        )?;
    }
    writeln!(xml, r#"        </zeebe:ioMapping>"#)?;
    Ok(())
}

fn write_flow(xml: &mut String, f: &Flow) -> Result<()> {
    let id = flow_id(&f.source_id, &f.target_id);
    match &f.condition {
        Some(cond) => {
            writeln!(
                xml,
                r#"    <bpmn:sequenceFlow id="{}" sourceRef="{}" targetRef="{}">
      <bpmn:conditionExpression xsi:type="tFormalExpression">{}</bpmn:conditionExpression>
    </bpmn:sequenceFlow>"#,
                id,
                f.source_id,
                f.target_id,
                xml_escape(cond)
            )?;
        }
        None => {
            writeln!(
                xml,
                r#"    <bpmn:sequenceFlow id="{}" sourceRef="{}" targetRef="{}" />"#,
                id, f.source_id, f.target_id
            )?;
        }
    }
    Ok(())
}

/// Sanitize a string to a valid XML NCName: starts with a letter or
/// underscore, then alphanumeric/underscore/hyphen/period.
fn sanitize_ncname(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for (i, ch) in s.chars().enumerate() {
        if i == 0 {
            if ch.is_ascii_alphabetic() || ch == '_' {
                result.push(ch);
            } else {
                result.push('_');
                if ch.is_ascii_alphanumeric() {
                    result.push(ch);
                }
            }
        } else if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
            result.push(ch);
        } else {
            result.push('_');
        }
    }
    if result.is_empty() {
        result.push_str("_id");
    }
    result
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_minimal_pipeline_emits_expected_elements() {
        let src = r#"process "M" { id:"m" start "S" {id:"s"} end "E" {id:"e"} flow { "s" -> "e" } }"#;
        let process = parse(src).unwrap();
        let xml = emit(&process, None).unwrap();
        assert!(xml.contains(r#"<bpmn:startEvent id="s""#));
        assert!(xml.contains(r#"<bpmn:endEvent id="e""#));
        assert!(xml.contains(r#"<bpmn:sequenceFlow id="flow_s_to_e""#));
        assert_eq!(xml.matches("bpmndi:BPMNShape").count(), 2);
        assert_eq!(xml.matches("bpmndi:BPMNEdge").count(), 1);
    }

    #[test]
    fn test_script_task_with_mappings_and_result_variable() {
        let src = r#"process "P" { id:"p"
            start "S" { id:"s" }
            scriptCall "Calc" {
                id: "calc"
                script: "a+b"
                input_mappings: [ {source: "a", target: "x"} ]
                output_mappings: [ {source: "x", target: "out"} ]
                result_variable: "r"
            }
            end "E" { id:"e" }
            flow { "s" -> "calc" "calc" -> "e" }
        }"#;
        let process = parse(src).unwrap();
        let xml = emit(&process, None).unwrap();
        assert!(xml.contains(r#"<bpmn:scriptTask id="calc""#));
        assert!(xml.contains(r#"expression="=a+b""#));
        assert!(xml.contains(r#"resultVariable="r""#));
        assert!(xml.contains(r#"source="=a" target="x""#));
        assert!(xml.contains(r#"source="=x" target="out""#));
    }

    #[test]
    fn test_xor_with_default() {
        let src = r#"process "P" { id:"p"
            start "S" { id:"s" }
            xorGateway "G" { id:"g" }
            serviceTask "A" { id:"t1" task_type:"do_a" }
            serviceTask "B" { id:"t2" task_type:"do_b" }
            end "E" { id:"e" }
            flow {
                "s" -> "g"
                "g" -> "t1" [condition:"x>0"]
                "g" -> "t2"
                "t1" -> "e"
                "t2" -> "e"
            }
        }"#;
        let process = parse(src).unwrap();
        let xml = emit(&process, None).unwrap();
        assert!(xml.contains(r#"<bpmn:exclusiveGateway id="g" name="G" default="flow_g_to_t2""#));
        assert!(xml.contains("flow_g_to_t1"));
        assert!(!xml.matches("conditionExpression").collect::<Vec<_>>().is_empty());
    }

    #[test]
    fn test_process_entity_expansion() {
        let src = r#"process "P" { id:"p"
            start "S" { id:"s" }
            processEntity "Load" { entityName:"Customer" }
            serviceTask "Next" { id:"next" task_type:"continue" }
            end "E" { id:"e" }
            flow { "s" -> "customer" "customer" -> "next" "next" -> "e" }
        }"#;
        let process = parse(src).unwrap();
        let xml = emit(&process, Some("p.yaml")).unwrap();
        assert!(xml.contains(r#"<bpmn:serviceTask id="customer""#));
        assert!(xml.contains(r#"type="process-entity-validator""#));
        assert!(xml.contains(r#"<bpmn:exclusiveGateway id="customer-validation-gateway" name="Validation Check" default="flow_customer-validation-gateway_to_next""#));
        assert!(xml.contains(r#"<bpmn:endEvent id="customer-validation-error" name="Validation Error">"#));
        assert!(xml.contains(&format!(r#"errorRef="{VALIDATION_ERROR_ID}""#)));
        assert_eq!(
            xml.matches(&format!(
                r#"<bpmn:error id="{VALIDATION_ERROR_ID}" errorCode="{VALIDATION_ERROR_CODE}""#
            ))
            .count(),
            1
        );
        assert!(xml.contains("flow_customer_to_customer-validation-gateway"));
        assert!(xml.contains("flow_customer-validation-gateway_to_customer-validation-error"));
        assert!(xml.contains(VALIDATION_CONDITION));
        assert!(xml.contains(r#"key="entityName" value="Customer""#));
        assert!(xml.contains(r#"key="entityModel" value="p.yaml""#));
    }

    #[test]
    fn test_entity_validation_gateway_and_error_end_are_pinned_relative_to_entity() {
        let src = r#"process "P" { id:"p"
            start "S" { id:"s" }
            processEntity "Load" { id:"load" entityName:"Customer" }
            serviceTask "Next" { id:"next" task_type:"continue" }
            end "E" { id:"e" }
            flow { "s" -> "load" "load" -> "next" "next" -> "e" }
        }"#;
        let process = parse(src).unwrap();
        let xml = emit(&process, None).unwrap();

        let bounds_for = |id: &str| -> (f64, f64) {
            let needle = format!(r#"bpmnElement="{id}">"#);
            let start = xml.find(&needle).unwrap_or_else(|| panic!("no shape for {id}"));
            let chunk = &xml[start..start + 200];
            let bounds_start = chunk.find("x=\"").unwrap() + 3;
            let x: f64 = chunk[bounds_start..].split('"').next().unwrap().parse().unwrap();
            let y_start = chunk.find("y=\"").unwrap() + 3;
            let y: f64 = chunk[y_start..].split('"').next().unwrap().parse().unwrap();
            (x, y)
        };

        let (load_x, _load_y) = bounds_for("load");
        let (gateway_x, gateway_y) = bounds_for("load-validation-gateway");
        let (error_x, error_y) = bounds_for("load-validation-error");

        assert!((gateway_x - (load_x + 80.0)).abs() < 1e-6);
        assert!((error_x - gateway_x).abs() < 1e-6);
        assert!((error_y - (gateway_y + 60.0)).abs() < 1e-6);
    }

    #[test]
    fn test_emission_is_deterministic() {
        let src = r#"process "M" { id:"m" start "S" {id:"s"} end "E" {id:"e"} flow { "s" -> "e" } }"#;
        let process = parse(src).unwrap();
        let xml1 = emit(&process, None).unwrap();
        let xml2 = emit(&process, None).unwrap();
        assert_eq!(xml1, xml2);
    }
}
