use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest operators first so `===` is not read as `==` followed by `=`.
const VERSION_OPERATORS: [&str; 8] = ["===", "==", ">=", "<=", "~=", "!=", "<", ">"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PackageSpecError {
    #[error("package spec cannot be empty")]
    Empty,
    #[error("invalid requirement '{token}': {reason}")]
    InvalidToken { token: String, reason: String },
}

impl PackageSpecError {
    fn invalid(token: &str, reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            token: token.to_string(),
            reason: reason.into(),
        }
    }
}

/// One requirement token, e.g. `requests==2.32.3` or `boto3[crt]>=1.34,<2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub token: String,
    pub name: String,
    pub extras: Vec<String>,
    pub constraint: Option<String>,
}

/// A whitespace-separated list of requirements bundled into one artifact.
///
/// The canonical form joins tokens with a single space; it is the literal
/// identity used for caching together with the build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageSpec {
    canonical: String,
    requirements: Vec<Requirement>,
}

impl PackageSpec {
    pub fn parse(raw: &str) -> Result<Self, PackageSpecError> {
        let requirements = raw
            .split_whitespace()
            .map(parse_requirement)
            .collect::<Result<Vec<_>, _>>()?;

        if requirements.is_empty() {
            return Err(PackageSpecError::Empty);
        }

        let canonical = requirements
            .iter()
            .map(|requirement| requirement.token.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(Self {
            canonical,
            requirements,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Requirement tokens in declaration order, ready to hand to an installer.
    pub fn install_args(&self) -> impl Iterator<Item = &str> {
        self.requirements
            .iter()
            .map(|requirement| requirement.token.as_str())
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for PackageSpec {
    type Err = PackageSpecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for PackageSpec {
    type Error = PackageSpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PackageSpec> for String {
    fn from(value: PackageSpec) -> Self {
        value.canonical
    }
}

fn parse_requirement(token: &str) -> Result<Requirement, PackageSpecError> {
    if token.starts_with('-') {
        return Err(PackageSpecError::invalid(token, "installer options are not allowed"));
    }
    if token.contains("://") || token.contains('/') || token.contains('\\') {
        return Err(PackageSpecError::invalid(token, "paths and URLs are not allowed"));
    }

    let name_end = token
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | '['))
        .unwrap_or(token.len());
    let name = &token[..name_end];
    validate_name(token, name)?;

    let mut rest = &token[name_end..];
    let mut extras = Vec::new();
    if let Some(after_bracket) = rest.strip_prefix('[') {
        let Some(close) = after_bracket.find(']') else {
            return Err(PackageSpecError::invalid(token, "unterminated extras"));
        };
        for extra in after_bracket[..close].split(',') {
            let extra = extra.trim();
            validate_name(token, extra)?;
            extras.push(extra.to_string());
        }
        rest = &after_bracket[close + 1..];
    }

    let constraint = if rest.is_empty() {
        None
    } else {
        for clause in rest.split(',') {
            validate_clause(token, clause)?;
        }
        Some(rest.to_string())
    };

    Ok(Requirement {
        token: token.to_string(),
        name: name.to_string(),
        extras,
        constraint,
    })
}

fn validate_name(token: &str, name: &str) -> Result<(), PackageSpecError> {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        Some(_) => {
            return Err(PackageSpecError::invalid(token, "names must start with a letter or digit"))
        }
        None => return Err(PackageSpecError::invalid(token, "missing package name")),
    }

    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        Ok(())
    } else {
        Err(PackageSpecError::invalid(token, format!("'{name}' contains unsupported characters")))
    }
}

fn validate_clause(token: &str, clause: &str) -> Result<(), PackageSpecError> {
    let Some(operator) = VERSION_OPERATORS
        .iter()
        .find(|operator| clause.starts_with(**operator))
    else {
        return Err(PackageSpecError::invalid(
            token,
            format!("'{clause}' must start with a version operator"),
        ));
    };

    let version = &clause[operator.len()..];
    if version.is_empty() {
        return Err(PackageSpecError::invalid(token, "missing version"));
    }
    if !version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '*' | '+' | '!' | '_' | '-'))
    {
        return Err(PackageSpecError::invalid(token, format!("'{version}' is not a valid version")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pinned_requirement() {
        let spec = PackageSpec::parse("requests==2.32.3").expect("spec should parse");

        assert_eq!(spec.as_str(), "requests==2.32.3");
        assert_eq!(spec.requirements().len(), 1);
        assert_eq!(spec.requirements()[0].name, "requests");
        assert_eq!(
            spec.requirements()[0].constraint.as_deref(),
            Some("==2.32.3")
        );
    }

    #[test]
    fn canonicalizes_whitespace_between_requirements() {
        let spec = PackageSpec::parse("  requests==2.32.3 \n\tPillow>=10,<12 ")
            .expect("spec should parse");

        assert_eq!(spec.as_str(), "requests==2.32.3 Pillow>=10,<12");
        assert_eq!(
            spec.install_args().collect::<Vec<_>>(),
            vec!["requests==2.32.3", "Pillow>=10,<12"]
        );
    }

    #[test]
    fn parses_extras_and_unpinned_names() {
        let spec = PackageSpec::parse("boto3[crt] numpy").expect("spec should parse");

        assert_eq!(spec.requirements()[0].extras, vec!["crt".to_string()]);
        assert_eq!(spec.requirements()[0].constraint, None);
        assert_eq!(spec.requirements()[1].name, "numpy");
    }

    #[test]
    fn rejects_empty_spec() {
        assert_eq!(PackageSpec::parse("   "), Err(PackageSpecError::Empty));
    }

    #[test]
    fn rejects_installer_options() {
        let message = PackageSpec::parse("requests --index-url=http://evil")
            .expect_err("should fail")
            .to_string();
        assert!(message.contains("installer options are not allowed"));
    }

    #[test]
    fn rejects_paths_and_urls() {
        assert!(PackageSpec::parse("./local_pkg").is_err());
        assert!(PackageSpec::parse("git+https://example.com/pkg.git").is_err());
    }

    #[test]
    fn rejects_malformed_version_clauses() {
        assert!(PackageSpec::parse("requests==").is_err());
        assert!(PackageSpec::parse("requests=2.0").is_err());
        assert!(PackageSpec::parse("requests==2.0;rm").is_err());
        assert!(PackageSpec::parse("requests[security").is_err());
    }

    #[test]
    fn deserializes_through_validation() {
        let spec: PackageSpec =
            serde_json::from_str("\"requests==2.32.3\"").expect("spec should deserialize");
        assert_eq!(spec.to_string(), "requests==2.32.3");

        assert!(serde_json::from_str::<PackageSpec>("\"--upgrade\"").is_err());
    }
}
