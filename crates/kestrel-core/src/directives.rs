//! Inline directive parsing — per-turn behaviour switches embedded in the
//! message body.
//!
//! Directives are leading `/word [value]` tokens: `"/think /verbose explain
//! this"` enables reasoning and debug output for the turn, `"/model gpt-4o
//! what's up"` overrides the model. Scanning starts at the beginning of the
//! body and stops at the first unknown token, which stays in place so slash
//! commands and ordinary text survive untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DIRECTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*/([A-Za-z_]+)(?:[ \t]+(\S+))?").unwrap());

/// Directive kinds and their value types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DirectiveKind {
    Bool,
    Str,
    Float,
    Int,
}

fn kind_of(name: &str) -> Option<DirectiveKind> {
    match name {
        "think" | "verbose" | "elevated" | "json" | "notools" | "raw" | "debug" => {
            Some(DirectiveKind::Bool)
        }
        "model" => Some(DirectiveKind::Str),
        "temp" => Some(DirectiveKind::Float),
        "maxtokens" => Some(DirectiveKind::Int),
        _ => None,
    }
}

/// Parsed directives for one turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectiveSet {
    #[serde(default)]
    pub think: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub elevated: bool,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub notools: bool,
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl DirectiveSet {
    /// Whether any directive was recognised.
    pub fn has_any(&self) -> bool {
        self != &DirectiveSet::default()
    }

    /// One-line summary for logging ("think | verbose | model=gpt-4o").
    pub fn summary(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for (flag, name) in [
            (self.think, "think"),
            (self.verbose, "verbose"),
            (self.elevated, "elevated"),
            (self.json, "json"),
            (self.notools, "notools"),
            (self.raw, "raw"),
            (self.debug, "debug"),
        ] {
            if flag {
                parts.push(name.to_string());
            }
        }
        if let Some(ref model) = self.model {
            parts.push(format!("model={model}"));
        }
        if let Some(temp) = self.temperature {
            parts.push(format!("temp={temp}"));
        }
        if let Some(max) = self.max_tokens {
            parts.push(format!("maxtokens={max}"));
        }
        parts.join(" | ")
    }
}

/// Scans message bodies for leading directives.
#[derive(Clone, Debug, Default)]
pub struct DirectiveParser;

impl DirectiveParser {
    pub fn new() -> Self {
        DirectiveParser
    }

    /// Parse directives off the front of `body`.
    ///
    /// Returns the cleaned body and the recognised set. When stripping would
    /// leave the body empty, the original is returned so the turn still has
    /// content to route.
    pub fn parse(&self, body: &str) -> (String, DirectiveSet) {
        let mut directives = DirectiveSet::default();
        let mut rest = body;

        loop {
            let Some(caps) = DIRECTIVE_RE.captures(rest) else {
                break;
            };
            let name = caps.get(1).unwrap().as_str().to_ascii_lowercase();
            let Some(kind) = kind_of(&name) else {
                // Unknown directive: leave in place, stop scanning.
                break;
            };

            let value = caps.get(2).map(|m| m.as_str());
            let consumed_end = match kind {
                // Boolean directives never swallow the following word.
                DirectiveKind::Bool => caps.get(1).unwrap().end(),
                // Typed directives consume their value token when present.
                _ => caps.get(0).unwrap().end(),
            };

            match kind {
                DirectiveKind::Bool => match name.as_str() {
                    "think" => directives.think = true,
                    "verbose" => directives.verbose = true,
                    "elevated" => directives.elevated = true,
                    "json" => directives.json = true,
                    "notools" => directives.notools = true,
                    "raw" => directives.raw = true,
                    "debug" => directives.debug = true,
                    _ => unreachable!(),
                },
                DirectiveKind::Str => {
                    if let Some(v) = value {
                        directives.model = Some(v.to_string());
                    }
                }
                DirectiveKind::Float => {
                    if let Some(parsed) = value.and_then(|v| v.parse::<f64>().ok()) {
                        directives.temperature = Some(parsed);
                    }
                }
                DirectiveKind::Int => {
                    if let Some(parsed) = value.and_then(|v| v.parse::<u32>().ok()) {
                        directives.max_tokens = Some(parsed);
                    }
                }
            }

            rest = &rest[consumed_end..];
        }

        let clean = rest.trim();
        if directives.has_any() && clean.is_empty() {
            // Directive-only message: keep the original body.
            (body.to_string(), directives)
        } else {
            (clean.to_string(), directives)
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
