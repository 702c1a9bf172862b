//! Recursive-descent parser: DSL source text → `Process`.
//!
//! This goes the opposite direction of a BPMN-XML importer — text to AST,
//! not XML to IR — so it is a hand-written token-stream walker rather than
//! an XML tag-handler state machine. Each element body is parsed into an
//! order-insensitive property list first, then converted into its typed
//! `Element` variant; that split keeps duplicate-key detection and
//! required-field checks in one place instead of duplicated per element
//! kind.

use crate::ast::{Element, Flow, Mapping, Process};
use crate::error::{CompileError, Span};
use crate::lexer::{lex, Token, TokenKind};

#[derive(Debug, Clone)]
enum PropValue {
    Str(String),
    Int(i64),
    List(Vec<PropValue>),
    Map(Vec<(String, PropValue)>),
}

struct Prop {
    key: String,
    value: PropValue,
    span: Span,
}

pub fn parse(source: &str) -> Result<Process, CompileError> {
    let tokens = lex(source)?;
    let mut p = Parser { tokens, pos: 0 };
    p.parse_process()
}

/// File-based entry point: reads `path`, additionally verifying
/// that a sidecar OpenAPI file (same stem, `.yaml`/`.yml`) exists in the
/// same directory before parsing — a `processEntity` can't be validated
/// against a schema that isn't there.
pub fn parse_file(path: &std::path::Path) -> Result<Process, CompileError> {
    if crate::sidecar::find_sidecar(path).is_none() {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        return Err(CompileError::MissingOpenApi { stem });
    }
    let source = std::fs::read_to_string(path).map_err(|e| CompileError::Io(e.to_string()))?;
    parse(&source)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_ident(&mut self, word: &str) -> Result<Span, CompileError> {
        let span = self.span();
        match &self.peek().kind {
            TokenKind::Ident(s) if s == word => {
                self.advance();
                Ok(span)
            }
            other => Err(CompileError::syntax(
                span,
                format!("expected '{}', found {}", word, describe(other)),
            )),
        }
    }

    fn peek_is_ident(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(s) if s == word)
    }

    fn take_ident(&mut self) -> Result<(String, Span), CompileError> {
        let span = self.span();
        match self.advance().kind {
            TokenKind::Ident(s) => Ok((s, span)),
            other => Err(CompileError::syntax(
                span,
                format!("expected identifier, found {}", describe(&other)),
            )),
        }
    }

    fn take_str(&mut self) -> Result<(String, Span), CompileError> {
        let span = self.span();
        match self.advance().kind {
            TokenKind::Str(s) => Ok((s, span)),
            other => Err(CompileError::syntax(
                span,
                format!("expected string literal, found {}", describe(&other)),
            )),
        }
    }

    fn expect_punct(&mut self, kind: TokenKind) -> Result<Span, CompileError> {
        let span = self.span();
        if self.peek().kind == kind {
            self.advance();
            Ok(span)
        } else {
            Err(CompileError::syntax(
                span,
                format!(
                    "expected {}, found {}",
                    describe(&kind),
                    describe(&self.peek().kind)
                ),
            ))
        }
    }

    fn parse_process(&mut self) -> Result<Process, CompileError> {
        self.expect_ident("process")?;
        let (name, _) = self.take_str()?;
        self.expect_punct(TokenKind::LBrace)?;

        let mut id: Option<String> = None;
        let mut version: Option<String> = None;
        while self.peek_is_ident("id") || self.peek_is_ident("version") {
            let (key, _) = self.take_ident()?;
            self.expect_punct(TokenKind::Colon)?;
            let (value, _) = self.take_str()?;
            if key == "id" {
                id = Some(value);
            } else {
                version = Some(value);
            }
        }
        let id = id.ok_or_else(|| CompileError::MissingRequiredField {
            element_id: name.clone(),
            field: "id".to_string(),
        })?;

        let mut elements = Vec::new();
        while self.is_element_keyword() {
            elements.push(self.parse_element()?);
        }

        let flows = self.parse_flow_section()?;

        self.expect_punct(TokenKind::RBrace)?;
        Ok(Process::from_parts(name, id, version, elements, flows))
    }

    fn is_element_keyword(&self) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(s) if matches!(
            s.as_str(),
            "start" | "end" | "scriptCall" | "serviceTask" | "processEntity" | "xorGateway"
        ))
    }

    fn parse_element(&mut self) -> Result<Element, CompileError> {
        let (keyword, _) = self.take_ident()?;
        let (display_name, _) = self.take_str()?;
        self.expect_punct(TokenKind::LBrace)?;
        let props = self.parse_properties(&display_name)?;
        self.expect_punct(TokenKind::RBrace)?;

        build_element(&keyword, display_name, props)
    }

    fn parse_properties(&mut self, element_label: &str) -> Result<Vec<Prop>, CompileError> {
        let mut props: Vec<Prop> = Vec::new();
        while matches!(self.peek().kind, TokenKind::Ident(_)) {
            let (key, key_span) = self.take_ident()?;
            self.expect_punct(TokenKind::Colon)?;
            let value = self.parse_value()?;
            if props.iter().any(|p| p.key == key) {
                return Err(CompileError::DuplicateKey {
                    element_id: element_label.to_string(),
                    key,
                });
            }
            props.push(Prop {
                key,
                value,
                span: key_span,
            });
            if self.peek().kind == TokenKind::Comma {
                self.advance();
            }
        }
        Ok(props)
    }

    fn parse_value(&mut self) -> Result<PropValue, CompileError> {
        match &self.peek().kind {
            TokenKind::Str(_) => {
                let (s, _) = self.take_str()?;
                Ok(PropValue::Str(s))
            }
            TokenKind::Int(n) => {
                let n = *n;
                self.advance();
                Ok(PropValue::Int(n))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while self.peek().kind != TokenKind::RBracket {
                    items.push(self.parse_value()?);
                    if self.peek().kind == TokenKind::Comma {
                        self.advance();
                    }
                }
                self.expect_punct(TokenKind::RBracket)?;
                Ok(PropValue::List(items))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while matches!(self.peek().kind, TokenKind::Ident(_) | TokenKind::Str(_)) {
                    let key = match self.advance().kind {
                        TokenKind::Ident(s) => s,
                        TokenKind::Str(s) => s,
                        _ => unreachable!(),
                    };
                    self.expect_punct(TokenKind::Colon)?;
                    let value = self.parse_value()?;
                    entries.push((key, value));
                    if self.peek().kind == TokenKind::Comma {
                        self.advance();
                    }
                }
                self.expect_punct(TokenKind::RBrace)?;
                Ok(PropValue::Map(entries))
            }
            other => Err(CompileError::syntax(
                self.span(),
                format!("expected a value, found {}", describe(other)),
            )),
        }
    }

    fn parse_flow_section(&mut self) -> Result<Vec<Flow>, CompileError> {
        self.expect_ident("flow")?;
        self.expect_punct(TokenKind::LBrace)?;
        let mut flows = Vec::new();
        while let TokenKind::Str(_) = self.peek().kind {
            let (source_id, _) = self.take_str()?;
            self.expect_punct(TokenKind::Arrow)?;
            let (target_id, _) = self.take_str()?;
            let mut condition = None;
            if self.peek().kind == TokenKind::LBracket {
                self.advance();
                self.expect_ident_key("condition")?;
                self.expect_punct(TokenKind::Colon)?;
                let (cond, _) = self.take_str()?;
                condition = Some(cond);
                self.expect_punct(TokenKind::RBracket)?;
            }
            flows.push(Flow {
                source_id,
                target_id,
                condition,
            });
        }
        self.expect_punct(TokenKind::RBrace)?;
        Ok(flows)
    }

    fn expect_ident_key(&mut self, word: &str) -> Result<(), CompileError> {
        let (key, span) = self.take_ident()?;
        if key != word {
            return Err(CompileError::syntax(
                span,
                format!("expected '{}', found '{}'", word, key),
            ));
        }
        Ok(())
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(s) => format!("identifier '{}'", s),
        TokenKind::Str(s) => format!("string \"{}\"", s),
        TokenKind::Int(n) => format!("integer {}", n),
        TokenKind::LBrace => "'{'".to_string(),
        TokenKind::RBrace => "'}'".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Arrow => "'->'".to_string(),
        TokenKind::Eof => "end of input".to_string(),
    }
}

// ── Property extraction helpers ──

fn find<'a>(props: &'a [Prop], key: &str) -> Option<&'a Prop> {
    props.iter().find(|p| p.key == key)
}

fn find_str(props: &[Prop], key: &str) -> Option<String> {
    match &find(props, key)?.value {
        PropValue::Str(s) => Some(s.clone()),
        _ => None,
    }
}

fn require_str(props: &[Prop], key: &str, element_label: &str) -> Result<String, CompileError> {
    find_str(props, key).ok_or_else(|| CompileError::MissingRequiredField {
        element_id: element_label.to_string(),
        field: key.to_string(),
    })
}

fn find_int(props: &[Prop], key: &str) -> Option<i64> {
    match &find(props, key)?.value {
        PropValue::Int(n) => Some(*n),
        _ => None,
    }
}

fn find_str_list(props: &[Prop], key: &str) -> Option<Vec<String>> {
    match &find(props, key)?.value {
        PropValue::List(items) => Some(
            items
                .iter()
                .filter_map(|v| match v {
                    PropValue::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

fn find_mapping_list(props: &[Prop], key: &str) -> Vec<Mapping> {
    match find(props, key).map(|p| &p.value) {
        Some(PropValue::List(items)) => items
            .iter()
            .filter_map(|v| match v {
                PropValue::Map(entries) => {
                    let source = entries.iter().find(|(k, _)| k == "source").and_then(
                        |(_, v)| match v {
                            PropValue::Str(s) => Some(s.clone()),
                            _ => None,
                        },
                    )?;
                    let target = entries.iter().find(|(k, _)| k == "target").and_then(
                        |(_, v)| match v {
                            PropValue::Str(s) => Some(s.clone()),
                            _ => None,
                        },
                    )?;
                    Some(Mapping { source, target })
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn find_header_map(props: &[Prop], key: &str) -> Vec<(String, String)> {
    match find(props, key).map(|p| &p.value) {
        Some(PropValue::Map(entries)) => entries
            .iter()
            .filter_map(|(k, v)| match v {
                PropValue::Str(s) => Some((k.clone(), s.clone())),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn build_element(
    keyword: &str,
    display_name: String,
    props: Vec<Prop>,
) -> Result<Element, CompileError> {
    match keyword {
        "start" => {
            let id = require_str(&props, "id", &display_name)?;
            Ok(Element::Start {
                id,
                name: display_name,
            })
        }
        "end" => {
            let id = require_str(&props, "id", &display_name)?;
            Ok(Element::End {
                id,
                name: display_name,
            })
        }
        "scriptCall" => {
            let id = require_str(&props, "id", &display_name)?;
            let script = require_str(&props, "script", &id)?;
            let input_mappings = find_mapping_list(&props, "input_mappings");
            let output_mappings = find_mapping_list(&props, "output_mappings");
            let result_variable =
                find_str(&props, "result_variable").unwrap_or_else(|| "result".to_string());
            let legacy_input_vars = find_str_list(&props, "input_vars");
            let legacy_output_vars = find_str_list(&props, "output_vars");
            Ok(Element::ScriptCall {
                id,
                name: display_name,
                script,
                input_mappings,
                output_mappings,
                result_variable,
                legacy_input_vars,
                legacy_output_vars,
            })
        }
        "serviceTask" => {
            let id = require_str(&props, "id", &display_name)?;
            let task_type = require_str(&props, "task_type", &id)?;
            let retries = find_int(&props, "retries").unwrap_or(3).max(1) as u32;
            let headers = find_header_map(&props, "headers");
            let input_mappings = find_mapping_list(&props, "input_mappings");
            let output_mappings = find_mapping_list(&props, "output_mappings");
            let result_variable =
                find_str(&props, "result_variable").unwrap_or_else(|| "result".to_string());
            let legacy_input_vars = find_str_list(&props, "input_vars");
            let legacy_output_vars = find_str_list(&props, "output_vars");
            Ok(Element::ServiceTask {
                id,
                name: display_name,
                task_type,
                retries,
                headers,
                input_mappings,
                output_mappings,
                result_variable,
                legacy_input_vars,
                legacy_output_vars,
            })
        }
        "processEntity" => {
            let entity_name = require_str(&props, "entityName", &display_name)?;
            let id = find_str(&props, "id").unwrap_or_else(|| derive_entity_id(&entity_name));
            Ok(Element::ProcessEntity {
                id,
                name: display_name,
                entity_name,
            })
        }
        "xorGateway" => {
            let id = require_str(&props, "id", &display_name)?;
            let default_condition = find_str(&props, "condition");
            Ok(Element::XorGateway {
                id,
                name: display_name,
                default_condition,
            })
        }
        other => unreachable!("is_element_keyword admitted unknown keyword '{}'", other),
    }
}

/// Lowercase, hyphen-join the words of an entity name: `"Customer Profile"`
/// → `"customer-profile"`.
fn derive_entity_id(entity_name: &str) -> String {
    entity_name
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_process_parses() {
        let src = r#"process "M" { id:"m" start "S" {id:"s"} end "E" {id:"e"} flow { "s" -> "e" } }"#;
        let process = parse(src).unwrap();
        assert_eq!(process.id, "m");
        assert_eq!(process.elements().len(), 2);
        assert_eq!(process.flows().len(), 1);
    }

    #[test]
    fn test_script_call_with_mappings() {
        let src = r#"
        process "P" { id:"p"
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
        let el = process.element("calc").unwrap();
        match el {
            Element::ScriptCall {
                script,
                input_mappings,
                output_mappings,
                result_variable,
                ..
            } => {
                assert_eq!(script, "a+b");
                assert_eq!(input_mappings.len(), 1);
                assert_eq!(output_mappings.len(), 1);
                assert_eq!(result_variable, "r");
            }
            _ => panic!("expected ScriptCall"),
        }
    }

    #[test]
    fn test_duplicate_key_is_error() {
        let src = r#"process "P" { id:"p" start "S" { id:"s" id:"s2" } end "E" {id:"e"} flow { "s" -> "e" } }"#;
        let err = parse(src).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateKey { .. }));
    }

    #[test]
    fn test_missing_required_field_is_error() {
        let src = r#"process "P" { id:"p" scriptCall "C" { id:"c" } flow {} }"#;
        let err = parse(src).unwrap_err();
        assert!(matches!(err, CompileError::MissingRequiredField { .. }));
    }

    #[test]
    fn test_process_entity_derives_id_from_name() {
        let src = r#"process "P" { id:"p"
            start "S" {id:"s"}
            processEntity "Load" { entityName:"Customer Profile" }
            end "E" {id:"e"}
            flow { "s" -> "customer-profile" "customer-profile" -> "e" }
        }"#;
        let process = parse(src).unwrap();
        assert!(process.contains("customer-profile"));
    }

    #[test]
    fn test_xor_gateway_with_conditions() {
        let src = r#"process "P" { id:"p"
            start "S" {id:"s"}
            xorGateway "G" { id:"g" }
            serviceTask "A" { id:"a" task_type:"do_a" }
            serviceTask "B" { id:"b" task_type:"do_b" }
            end "E" {id:"e"}
            flow {
                "s" -> "g"
                "g" -> "a" [condition:"x>0"]
                "g" -> "b"
                "a" -> "e"
                "b" -> "e"
            }
        }"#;
        let process = parse(src).unwrap();
        let flows = process.flows();
        let conditional = flows.iter().find(|f| f.target_id == "a").unwrap();
        assert_eq!(conditional.condition.as_deref(), Some("x>0"));
        let default = flows.iter().find(|f| f.target_id == "b").unwrap();
        assert_eq!(default.condition, None);
    }

    #[test]
    fn test_legacy_vars_desugar_to_identity_mappings() {
        let src = r#"process "P" { id:"p"
            start "S" {id:"s"}
            serviceTask "A" { id:"a" task_type:"do_a" input_vars:["x","y"] }
            end "E" {id:"e"}
            flow { "s" -> "a" "a" -> "e" }
        }"#;
        let process = parse(src).unwrap();
        let el = process.element("a").unwrap();
        let effective = el.effective_input_mappings();
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0].source, "x");
        assert_eq!(effective[0].target, "x");
    }

    #[test]
    fn test_parse_file_requires_sidecar() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("bpmd-parser-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bpm = dir.join("p.bpm");
        std::fs::write(
            &bpm,
            r#"process "M" { id:"m" start "S" {id:"s"} end "E" {id:"e"} flow { "s" -> "e" } }"#,
        )
        .unwrap();

        let err = parse_file(&bpm).unwrap_err();
        assert!(matches!(err, CompileError::MissingOpenApi { .. }));

        std::fs::write(dir.join("p.yaml"), "components:\n  schemas: {}\n").unwrap();
        let process = parse_file(&bpm).unwrap();
        assert_eq!(process.id, "m");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
