//! Parsing of core metadata (`METADATA` / `PKG-INFO`) and of the older
//! `requires.txt` dependency listing found in eggs.
//!
//! Metadata files are allegedly RFC-822 messages; in practice they are
//! "whatever the Python stdlib email parser accepts". The grammar here covers
//! header lines with continuations and an optional free-form body, which is
//! all the fields we care about ever use.

use std::collections::HashMap;

use indexmap::IndexSet;
use miette::Diagnostic;
use pep440_rs::Version;
use thiserror::Error;

use crate::marker::{CompareOp, MarkerExpr, Value};
use crate::types::{Extra, PackageName, ParsePackageNameError, Requirement};

/// The importable metadata of a distribution: identity plus declared
/// dependencies.
#[derive(Debug, Clone)]
pub struct DistMetadata {
    /// The distribution name.
    pub name: PackageName,
    /// The distribution version.
    pub version: Version,
    /// Declared dependencies, markers intact.
    pub requires_dist: Vec<Requirement>,
    /// Feature groups this distribution provides.
    pub extras: IndexSet<Extra>,
}

/// Error produced while parsing metadata.
#[derive(Debug, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum MetadataError {
    #[error("malformed metadata: {0}")]
    Malformed(peg::error::ParseError<peg::str::LineCol>),

    #[error("missing {0} field in metadata")]
    MissingField(&'static str),

    #[error("invalid Version field: {0}")]
    InvalidVersion(String),

    #[error(transparent)]
    InvalidName(#[from] ParsePackageNameError),
}

peg::parser! {
    grammar headers() for str {
        rule line_ending()
            = quiet!{ "\r\n" / "\r" / "\n" } / expected!("end of line")

        rule field_name() -> &'input str
            = quiet!{ $(['\x21'..='\x39' | '\x3b'..='\x7e']+) } / expected!("field name")

        rule field_separator()
            = ":" [' ' | '\t']*

        rule field_value_piece()
            = [^ '\r' | '\n']*

        // A continuation line keeps extending the previous field value.
        rule continuation_line_ending()
            = quiet!{ line_ending() [' ' | '\t'] } / expected!("continuation line")

        rule field_value() -> &'input str
            = $(field_value_piece() ** continuation_line_ending())

        rule field() -> (String, String)
            = n:field_name() field_separator() v:field_value()
              { (n.to_ascii_lowercase(), v.trim().to_owned()) }

        rule fields() -> Vec<(String, String)>
            = field() ** line_ending()

        // The body (the description) starts after the first blank line and is
        // ignored entirely.
        rule trailing_body()
            = line_ending() line_ending() [_]*

        pub rule metadata() -> Vec<(String, String)>
            = f:fields() trailing_body()? line_ending()? { f }
    }
}

impl DistMetadata {
    /// Parses a `METADATA` / `PKG-INFO` payload. Unparseable `Requires-Dist`
    /// entries are logged and dropped rather than failing the whole file.
    pub fn from_metadata(input: &[u8]) -> Result<DistMetadata, MetadataError> {
        let input = String::from_utf8_lossy(input);
        let mut fields: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in headers::metadata(&input).map_err(MetadataError::Malformed)? {
            fields.entry(name).or_default().push(value);
        }

        let name: PackageName = fields
            .remove("name")
            .and_then(|mut v| v.pop())
            .ok_or(MetadataError::MissingField("Name"))?
            .parse()?;
        let version: Version = fields
            .remove("version")
            .and_then(|mut v| v.pop())
            .ok_or(MetadataError::MissingField("Version"))?
            .parse()
            .map_err(|e| MetadataError::InvalidVersion(format!("{e}")))?;

        let mut requires_dist = Vec::new();
        for raw in fields.remove("requires-dist").unwrap_or_default() {
            match raw.parse() {
                Ok(requirement) => requires_dist.push(requirement),
                Err(e) => tracing::warn!("ignoring Requires-Dist entry '{raw}': {e}"),
            }
        }

        let mut extras = IndexSet::new();
        for raw in fields.remove("provides-extra").unwrap_or_default() {
            match raw.parse::<Extra>() {
                Ok(extra) => {
                    extras.insert(extra);
                }
                Err(e) => tracing::warn!("ignoring Provides-Extra entry '{raw}': {e}"),
            }
        }

        Ok(DistMetadata {
            name,
            version,
            requires_dist,
            extras,
        })
    }

    /// Folds an egg's `requires.txt` into the dependency list. Section
    /// headers (`[extra]`, `[extra:marker]`, `[:marker]`) become markers on
    /// the requirements below them.
    pub fn merge_requires_txt(&mut self, input: &str) {
        let mut extra: Option<Extra> = None;
        let mut condition: Option<MarkerExpr> = None;
        let mut skip_section = false;

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let (extra_part, marker_part) = match header.split_once(':') {
                    Some((e, m)) => (e.trim(), Some(m.trim())),
                    None => (header.trim(), None),
                };
                skip_section = false;
                extra = None;
                condition = None;
                if !extra_part.is_empty() {
                    match extra_part.parse::<Extra>() {
                        Ok(parsed) => {
                            self.extras.insert(parsed.clone());
                            extra = Some(parsed);
                        }
                        Err(e) => {
                            // A section we cannot name would mislabel every
                            // requirement below it; skip until the next one.
                            tracing::warn!("ignoring requires.txt section '[{header}]': {e}");
                            skip_section = true;
                            continue;
                        }
                    }
                }
                condition = marker_part.and_then(|m| match MarkerExpr::parse(m) {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        tracing::warn!("ignoring marker on requires.txt section '[{header}]': {e}");
                        None
                    }
                });
                continue;
            }
            if skip_section {
                continue;
            }

            let mut requirement: Requirement = match line.parse() {
                Ok(requirement) => requirement,
                Err(e) => {
                    tracing::warn!("ignoring requires.txt entry '{line}': {e}");
                    continue;
                }
            };

            let mut guards = Vec::new();
            if let Some(extra) = &extra {
                guards.push(MarkerExpr::Comparison {
                    op: CompareOp::Eq,
                    lhs: Value::Variable("extra"),
                    rhs: Value::Literal(extra.as_str().to_owned()),
                });
            }
            if let Some(condition) = &condition {
                guards.push(condition.clone());
            }
            if let Some(own) = requirement.marker.take() {
                guards.push(own);
            }
            requirement.marker = guards
                .into_iter()
                .reduce(|lhs, rhs| MarkerExpr::And(Box::new(lhs), Box::new(rhs)));
            self.requires_dist.push(requirement);
        }
    }
}
