//! Static discovery of tool functions in a Python adapter module
//!
//! The adapter is never executed. A tool is a `def` / `async def` preceded
//! by a decorator whose dotted name ends in `tool` (`@tool`, `@mcp.tool()`,
//! `@server.tool(name="...")`). Its signature and docstring are mined for a
//! JSON-schema description of the arguments.

use crate::types::ToolSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::warn;

static DECORATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*@([A-Za-z_][\w.]*)\s*(.*)$").expect("valid decorator pattern"));

static DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(").expect("valid def pattern")
});

static NAME_OVERRIDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bname\s*=\s*["']([^"']+)["']"#).expect("valid name override pattern")
});

static ARG_DOC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\*{0,2}([A-Za-z_]\w*)\s*(?:\([^)]*\))?\s*:\s*(.*)$").expect("valid arg doc pattern")
});

/// Maximum usage examples kept per tool
pub const MAX_EXAMPLES: usize = 3;

/// Schema type used when an annotation is missing or not understood
pub const OPEN_TYPES: [&str; 7] = [
    "string", "number", "integer", "boolean", "object", "array", "null",
];

#[derive(Debug)]
struct Param {
    name: String,
    annotation: Option<String>,
    default: Option<String>,
}

#[derive(Debug)]
enum ParamItem {
    Param(Param),
    VarKeyword,
    Skip,
}

/// Discover every exposed tool in `source`, in declaration order
pub fn parse_adapter(source: &str) -> Vec<ToolSpec> {
    let lines: Vec<&str> = source.lines().collect();
    let mut tools: Vec<ToolSpec> = Vec::new();
    // Some(name override) once a tool decorator has been seen
    let mut pending: Option<Option<String>> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = DECORATOR.captures(line) {
            let mut args = caps[2].to_string();
            while paren_balance(&args) > 0 && i + 1 < lines.len() {
                i += 1;
                args.push_str(lines[i]);
            }

            if caps[1].rsplit('.').next() == Some("tool") {
                let name = NAME_OVERRIDE.captures(&args).map(|c| c[1].to_string());
                pending = Some(name.or(pending.flatten()));
            }
            i += 1;
            continue;
        }

        if let Some(caps) = DEF.captures(line) {
            if let Some(name_override) = pending.take() {
                let open = caps.get(0).map_or(line.len(), |m| m.end());
                let name = name_override.unwrap_or_else(|| caps[1].to_string());

                match parse_function(&lines, i, open) {
                    Some((params, doc, next)) => {
                        if tools.iter().any(|t| t.name == name) {
                            warn!("Duplicate tool '{}' in adapter, keeping the first", name);
                        } else {
                            tools.push(build_spec(name, &params, doc.as_deref()));
                        }
                        i = next;
                        continue;
                    }
                    None => warn!("Unterminated signature for tool '{}'", name),
                }
            }
        }

        i += 1;
    }

    tools
}

fn build_spec(name: String, params: &str, doc: Option<&str>) -> ToolSpec {
    let doc = doc.unwrap_or_default();
    let arg_docs = arg_descriptions(doc);

    let mut properties = Map::new();
    let mut required = Vec::new();
    let mut var_keyword = false;

    for piece in split_top_level(params, ',') {
        match parse_param(piece) {
            ParamItem::Param(param) => {
                let mut property = Map::new();
                property.insert("type".to_string(), type_schema(param.annotation.as_deref()));
                if let Some(desc) = arg_docs.get(&param.name) {
                    property.insert("description".to_string(), json!(desc));
                }
                match param.default.as_deref() {
                    Some(default) => {
                        if let Some(value) = default_value(default) {
                            property.insert("default".to_string(), value);
                        }
                    }
                    None => required.push(json!(param.name)),
                }
                properties.insert(param.name, Value::Object(property));
            }
            ParamItem::VarKeyword => var_keyword = true,
            ParamItem::Skip => {}
        }
    }

    ToolSpec {
        name,
        description: doc
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": var_keyword,
        }),
        examples: examples(doc),
    }
}

/// Collect the parameter list and docstring of the `def` at `start`.
///
/// `open` is the byte offset just past the opening parenthesis. Returns the
/// raw parameter text, the docstring, and the index of the next line to scan.
fn parse_function(lines: &[&str], start: usize, open: usize) -> Option<(String, Option<String>, usize)> {
    let mut params = String::new();
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut row = start;
    let mut text = &lines[start][open..];

    'outer: loop {
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                    params.push(c);
                }
                None => match c {
                    '#' => break,
                    '"' | '\'' => {
                        quote = Some(c);
                        params.push(c);
                    }
                    '(' | '[' | '{' => {
                        depth += 1;
                        params.push(c);
                    }
                    ')' | ']' | '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break 'outer;
                        }
                        params.push(c);
                    }
                    _ => params.push(c),
                },
            }
        }

        row += 1;
        if row >= lines.len() {
            return None;
        }
        params.push('\n');
        text = lines[row];
    }

    let mut next = row + 1;
    while next < lines.len() && lines[next].trim().is_empty() {
        next += 1;
    }

    match read_docstring(lines, next) {
        Some((doc, after)) => Some((params, Some(doc), after)),
        None => Some((params, None, row + 1)),
    }
}

fn read_docstring(lines: &[&str], start: usize) -> Option<(String, usize)> {
    let first = lines.get(start)?.trim_start();
    let first = first
        .strip_prefix(['r', 'R', 'u', 'U'])
        .filter(|rest| rest.starts_with("\"\"\"") || rest.starts_with("'''"))
        .unwrap_or(first);

    let delim = if first.starts_with("\"\"\"") {
        "\"\"\""
    } else if first.starts_with("'''") {
        "'''"
    } else {
        return None;
    };

    let rest = &first[3..];
    if let Some(end) = rest.find(delim) {
        return Some((rest[..end].to_string(), start + 1));
    }

    let mut doc = rest.to_string();
    for (row, line) in lines.iter().enumerate().skip(start + 1) {
        doc.push('\n');
        if let Some(end) = line.find(delim) {
            doc.push_str(&line[..end]);
            return Some((doc, row + 1));
        }
        doc.push_str(line);
    }
    Some((doc, lines.len()))
}

fn parse_param(piece: &str) -> ParamItem {
    let piece = piece.trim();
    if piece.is_empty() || piece == "*" || piece == "/" {
        return ParamItem::Skip;
    }
    if piece.starts_with("**") {
        return ParamItem::VarKeyword;
    }
    if piece.starts_with('*') {
        return ParamItem::Skip;
    }

    let mut parts = split_top_level(piece, '=').into_iter();
    let head = parts.next().unwrap_or_default();
    let default: Vec<&str> = parts.collect();
    let default = if default.is_empty() {
        None
    } else {
        Some(default.join("=").trim().to_string())
    };

    let (name, annotation) = match head.split_once(':') {
        Some((name, annotation)) => (name.trim(), Some(annotation.trim().to_string())),
        None => (head.trim(), None),
    };

    if name == "self" || name == "cls" || name.is_empty() {
        return ParamItem::Skip;
    }

    ParamItem::Param(Param {
        name: name.to_string(),
        annotation,
        default,
    })
}

/// JSON-schema `type` for a Python annotation
pub fn type_schema(annotation: Option<&str>) -> Value {
    match annotation.and_then(annotation_types) {
        Some(types) => {
            let mut unique: Vec<&str> = Vec::new();
            for t in types {
                if !unique.contains(&t) {
                    unique.push(t);
                }
            }
            if unique.len() == 1 {
                json!(unique[0])
            } else {
                json!(unique)
            }
        }
        None => json!(OPEN_TYPES),
    }
}

fn annotation_types(annotation: &str) -> Option<Vec<&'static str>> {
    let annotation = annotation.trim().trim_matches(|c| c == '"' || c == '\'');

    let alternatives = split_top_level(annotation, '|');
    if alternatives.len() > 1 {
        return union_types(&alternatives);
    }

    let (base, inner) = match annotation.find('[') {
        Some(idx) if annotation.ends_with(']') => {
            (&annotation[..idx], Some(&annotation[idx + 1..annotation.len() - 1]))
        }
        _ => (annotation, None),
    };
    let base = base.trim().rsplit('.').next().unwrap_or_default();

    match base {
        "Optional" => {
            let mut types = annotation_types(inner?)?;
            types.push("null");
            Some(types)
        }
        "Union" => union_types(&split_top_level(inner?, ',')),
        "str" => Some(vec!["string"]),
        "int" => Some(vec!["integer"]),
        "float" => Some(vec!["number"]),
        "bool" => Some(vec!["boolean"]),
        "dict" | "Dict" | "Mapping" | "MutableMapping" => Some(vec!["object"]),
        "list" | "List" | "tuple" | "Tuple" | "Sequence" | "set" | "Set" | "Iterable" => {
            Some(vec!["array"])
        }
        "None" | "NoneType" => Some(vec!["null"]),
        _ => None,
    }
}

fn union_types(parts: &[&str]) -> Option<Vec<&'static str>> {
    let mut types = Vec::new();
    for part in parts {
        types.extend(annotation_types(part)?);
    }
    Some(types)
}

fn default_value(text: &str) -> Option<Value> {
    let text = text.trim();
    match text {
        "None" => return Some(Value::Null),
        "True" => return Some(json!(true)),
        "False" => return Some(json!(false)),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(json!(n));
    }
    if let Ok(n) = text.parse::<f64>() {
        return Some(json!(n));
    }
    for q in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(q) && text.ends_with(q) {
            return Some(json!(&text[1..text.len() - 1]));
        }
    }
    None
}

fn is_section_header(line: &str) -> bool {
    line.ends_with(':') && !line.contains(' ')
}

fn arg_descriptions(doc: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut in_args = false;

    for line in doc.lines().map(str::trim) {
        let lower = line.to_ascii_lowercase();
        if matches!(lower.as_str(), "args:" | "arguments:" | "parameters:" | "params:") {
            in_args = true;
            continue;
        }
        if !in_args {
            continue;
        }
        if line.is_empty() || is_section_header(line) {
            in_args = false;
            continue;
        }
        if let Some(caps) = ARG_DOC.captures(line) {
            out.insert(caps[1].to_string(), caps[2].trim().to_string());
        }
    }
    out
}

/// Text after an `Example:` / `Examples:` marker, case-insensitive
fn example_marker(line: &str) -> Option<&str> {
    let (head, rest) = line.split_once(':')?;
    matches!(head.trim_end().to_ascii_lowercase().as_str(), "example" | "examples").then_some(rest)
}

/// Usage examples following an "Example:" marker, at most [`MAX_EXAMPLES`]
fn examples(doc: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut in_section = false;

    for line in doc.lines().map(str::trim) {
        if out.len() == MAX_EXAMPLES {
            break;
        }

        if let Some(inline) = example_marker(line) {
            in_section = true;
            let inline = inline.trim();
            if !inline.is_empty() {
                out.push(inline.to_string());
            }
            continue;
        }
        if !in_section {
            continue;
        }
        if line.is_empty() {
            if !out.is_empty() {
                in_section = false;
            }
            continue;
        }
        if is_section_header(line) {
            in_section = false;
            continue;
        }

        let line = line.strip_prefix(">>>").map(str::trim).unwrap_or(line);
        out.push(line.to_string());
    }

    out
}

/// Split at `sep` outside brackets and string literals
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (idx, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                c if c == sep && depth == 0 => {
                    parts.push(&text[start..idx]);
                    start = idx + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&text[start..]);
    parts
}

fn paren_balance(text: &str) -> i32 {
    text.chars().fold(0, |depth, c| match c {
        '(' => depth + 1,
        ')' => depth - 1,
        _ => depth,
    })
}
