//! One-shot interpolation pass over the merged tree
//!
//! Supported forms inside string values:
//! - `${a.b.0.c}`: absolute reference (numeric segments index sequences)
//! - `${.x}`, `${..x}`: relative to the containing node, one level up per extra dot
//! - `${oc.env:NAME}`, `${env:NAME}`, `${oc.env:NAME,default}`: environment variable
//! - `${eval:'expr'}`: whitelisted arithmetic, see `expcfg_expr`
//!
//! A string made of exactly one interpolation takes the referenced value's
//! type; anything else is spliced into a string. `\${` is a literal `${`.

use expcfg_expr::{Number, Reference};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ConfigError, Result};

/// Access to environment variables.
pub trait Environment {
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Resolve every interpolation in `tree` in place.
///
/// References see the merged tree as it was before this pass; overrides
/// applied later are never visible to expressions.
pub fn resolve_interpolations(tree: &mut Value, env: &dyn Environment) -> Result<()> {
    let snapshot = tree.clone();
    let mut resolver = Resolver {
        root: &snapshot,
        env,
        cache: HashMap::new(),
        stack: Vec::new(),
    };
    let resolved = resolver.resolve_value(&snapshot, &[])?;
    *tree = resolved;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Seg {
    Key(String),
    Index(usize),
}

struct Location<'p>(&'p [Seg]);

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                Seg::Key(k) if i == 0 => write!(f, "{}", k)?,
                Seg::Key(k) => write!(f, ".{}", k)?,
                Seg::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

enum Part {
    Text(String),
    Interpolation(String),
}

struct Resolver<'a> {
    root: &'a Value,
    env: &'a dyn Environment,
    /// Resolved leaves by structural location. Keys may contain dots, so
    /// rendered locations are not unique.
    cache: HashMap<Vec<Seg>, Value>,
    /// Leaves currently being resolved, for cycle detection.
    stack: Vec<Vec<Seg>>,
}

impl<'a> Resolver<'a> {
    fn resolve_value(&mut self, node: &'a Value, path: &[Seg]) -> Result<Value> {
        match node {
            Value::String(s) if s.contains("${") => self.resolve_leaf(s, path),
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, child) in map {
                    let mut child_path = path.to_vec();
                    child_path.push(Seg::Key(key.clone()));
                    out.insert(key.clone(), self.resolve_value(child, &child_path)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let mut child_path = path.to_vec();
                    child_path.push(Seg::Index(i));
                    out.push(self.resolve_value(item, &child_path)?);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_leaf(&mut self, source: &str, path: &[Seg]) -> Result<Value> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }
        if self.stack.iter().any(|seen| seen.as_slice() == path) {
            let chain: Vec<String> = self
                .stack
                .iter()
                .map(|seen| Location(seen).to_string())
                .collect();
            return Err(ConfigError::ExpressionResolution {
                location: Location(path).to_string(),
                expression: source.to_string(),
                reason: format!("reference cycle through {}", chain.join(" -> ")),
            });
        }

        self.stack.push(path.to_vec());
        let result = self.resolve_string(source, path);
        self.stack.pop();

        let value = result?;
        self.cache.insert(path.to_vec(), value.clone());
        Ok(value)
    }

    fn resolve_string(&mut self, source: &str, path: &[Seg]) -> Result<Value> {
        let parts = split_parts(source).map_err(|reason| self.error(source, path, reason))?;

        if let [Part::Interpolation(body)] = parts.as_slice() {
            return self.resolve_interpolation(body, source, path);
        }

        let mut out = String::new();
        for part in &parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Interpolation(body) => {
                    match self.resolve_interpolation(body, source, path)? {
                        Value::String(s) => out.push_str(&s),
                        Value::Number(n) => out.push_str(&n.to_string()),
                        Value::Bool(b) => out.push_str(if b { "true" } else { "false" }),
                        Value::Null => out.push_str("null"),
                        _ => {
                            return Err(self.error(
                                source,
                                path,
                                format!("cannot splice a container into a string: ${{{}}}", body),
                            ))
                        }
                    }
                }
            }
        }
        Ok(Value::String(out))
    }

    fn resolve_interpolation(&mut self, body: &str, source: &str, path: &[Seg]) -> Result<Value> {
        let body = body.trim();
        let Some((resolver, args)) = body.split_once(':') else {
            return self.resolve_reference(body, source, path);
        };

        match resolver.trim() {
            "eval" => self.evaluate(unquote(args.trim()), source, path),
            "oc.env" | "env" => {
                let (name, default) = match args.split_once(',') {
                    Some((name, default)) => (name.trim(), Some(unquote(default.trim()))),
                    None => (args.trim(), None),
                };
                match (self.env.var(name), default) {
                    (Some(v), _) => Ok(Value::String(v)),
                    (None, Some(d)) => Ok(Value::String(d.to_string())),
                    (None, None) => Err(self.error(
                        source,
                        path,
                        format!("environment variable {} is not set", name),
                    )),
                }
            }
            other => Err(self.error(source, path, format!("unknown resolver '{}'", other))),
        }
    }

    fn evaluate(&mut self, expr: &str, source: &str, path: &[Seg]) -> Result<Value> {
        // Errors from nested resolution are kept intact rather than flattened
        // into the expression error message.
        let mut inner: Option<ConfigError> = None;

        let result = {
            let mut lookup = |reference: &Reference| -> std::result::Result<Number, String> {
                let value = match reference {
                    Reference::Path(p) => self.resolve_reference(p, source, path),
                    Reference::Interpolation(body) => self.resolve_interpolation(body, source, path),
                };
                match value {
                    Ok(v) => to_number(&v),
                    Err(e) => {
                        let message = e.to_string();
                        inner.get_or_insert(e);
                        Err(message)
                    }
                }
            };
            expcfg_expr::evaluate(expr, &mut lookup)
        };

        match result {
            Ok(Number::Int(i)) => Ok(Value::Number(i.into())),
            Ok(Number::Float(f)) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| self.error(source, path, "result is not a finite number".into())),
            Err(e) => Err(inner.unwrap_or_else(|| self.error(source, path, e.to_string()))),
        }
    }

    fn resolve_reference(&mut self, reference: &str, source: &str, path: &[Seg]) -> Result<Value> {
        let (base, rest) = match reference.find(|c| c != '.') {
            Some(0) => (Vec::new(), reference),
            Some(dots) => {
                // One dot is the leaf's own container; each extra dot climbs a level.
                let depth = path.len().checked_sub(dots).ok_or_else(|| {
                    self.error(source, path, format!("relative reference '{}' climbs above the root", reference))
                })?;
                (path[..depth].to_vec(), &reference[dots..])
            }
            None => {
                return Err(self.error(source, path, format!("invalid reference '{}'", reference)))
            }
        };

        let segments: Vec<&str> = rest.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(self.error(source, path, format!("invalid reference '{}'", reference)));
        }

        // Walk from the container the reference is relative to.
        let root: &'a Value = self.root;
        let mut node = root;
        for seg in &base {
            node = match (node, seg) {
                (Value::Object(map), Seg::Key(k)) => &map[k],
                (Value::Array(items), Seg::Index(i)) => &items[*i],
                _ => return Err(self.error(source, path, format!("invalid reference '{}'", reference))),
            };
        }

        let mut target = base;
        for (i, segment) in segments.iter().enumerate() {
            if let Value::String(s) = node {
                if s.contains("${") {
                    // Intermediate node is itself interpolated: resolve it and
                    // continue in the resolved value.
                    let resolved = self.resolve_leaf(s, &target)?;
                    return navigate(&resolved, &segments[i..])
                        .cloned()
                        .ok_or_else(|| self.not_found(reference, source, path));
                }
            }
            let (next, seg) = step(node, segment).ok_or_else(|| self.not_found(reference, source, path))?;
            node = next;
            target.push(seg);
        }

        self.resolve_value(node, &target)
    }

    fn not_found(&self, reference: &str, source: &str, path: &[Seg]) -> ConfigError {
        self.error(source, path, format!("reference '{}' not found", reference))
    }

    fn error(&self, source: &str, path: &[Seg], reason: String) -> ConfigError {
        ConfigError::ExpressionResolution {
            location: Location(path).to_string(),
            expression: source.to_string(),
            reason,
        }
    }
}

fn step<'v>(node: &'v Value, segment: &str) -> Option<(&'v Value, Seg)> {
    match node {
        Value::Object(map) => map
            .get(segment)
            .map(|child| (child, Seg::Key(segment.to_string()))),
        Value::Array(items) => {
            let index: usize = segment.parse().ok()?;
            items.get(index).map(|child| (child, Seg::Index(index)))
        }
        _ => None,
    }
}

fn navigate<'v>(mut node: &'v Value, segments: &[&str]) -> Option<&'v Value> {
    for segment in segments {
        node = step(node, segment)?.0;
    }
    Some(node)
}

fn to_number(value: &Value) -> std::result::Result<Number, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Number::Int)
            .or_else(|| n.as_f64().map(Number::Float))
            .ok_or_else(|| format!("{} is not representable", n)),
        Value::Bool(b) => Ok(Number::Int(i64::from(*b))),
        other => Err(format!("{} is not a number", other)),
    }
}

fn unquote(s: &str) -> &str {
    for q in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Split a string into literal text and `${...}` bodies.
fn split_parts(source: &str) -> std::result::Result<Vec<Part>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        let opens = |at: usize| chars.get(at) == Some(&'$') && chars.get(at + 1) == Some(&'{');

        if chars[i] == '\\' && opens(i + 1) {
            text.push_str("${");
            i += 3;
            continue;
        }

        if opens(i) {
            let end = matching_brace(&chars, i + 1)
                .ok_or_else(|| format!("unterminated interpolation at offset {}", i))?;
            if !text.is_empty() {
                parts.push(Part::Text(std::mem::take(&mut text)));
            }
            parts.push(Part::Interpolation(chars[i + 2..end].iter().collect()));
            i = end + 1;
            continue;
        }

        text.push(chars[i]);
        i += 1;
    }

    if !text.is_empty() {
        parts.push(Part::Text(text));
    }
    Ok(parts)
}

/// Index of the `}` closing the `{` at `open`, skipping quoted text.
fn matching_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}
