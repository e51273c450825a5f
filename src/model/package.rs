use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::AuditError;

/// npm refuses names longer than this.
const MAX_NAME_LEN: usize = 214;

const DEFAULT_TAG: &str = "latest";

/// Which version of a package is being audited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// A concrete release such as `4.17.21`.
    Exact(semver::Version),
    /// A dist-tag such as `latest` or `next`.
    Tag(String),
}

impl VersionSelector {
    pub fn is_exact(&self) -> bool {
        matches!(self, VersionSelector::Exact(_))
    }
}

impl std::fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionSelector::Exact(v) => write!(f, "{}", v),
            VersionSelector::Tag(t) => write!(f, "{}", t),
        }
    }
}

/// A validated `name[@version]` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub version: VersionSelector,
}

impl PackageSpec {
    /// Validates a package name and optional version.
    ///
    /// Names are `name` or `@scope/name`, built from ASCII alphanumerics,
    /// `.`, `-` and `_`. A missing or blank version means `latest`.
    ///
    /// # Example
    ///
    /// ```
    /// use pkgrisk::model::PackageSpec;
    ///
    /// let spec = PackageSpec::parse("@babel/core", Some("7.24.0")).unwrap();
    /// assert_eq!(spec.unscoped_name(), "core");
    /// assert!(spec.version.is_exact());
    ///
    /// assert!(PackageSpec::parse("../etc/passwd", None).is_err());
    /// ```
    pub fn parse(name: &str, version: Option<&str>) -> Result<Self, AuditError> {
        let name = name.trim();
        validate_name(name)?;

        let version = match version.map(str::trim) {
            None | Some("") => VersionSelector::Tag(DEFAULT_TAG.to_string()),
            Some(v) => parse_version(v)?,
        };

        Ok(Self {
            name: name.to_string(),
            version,
        })
    }

    /// The name without its `@scope/` prefix.
    pub fn unscoped_name(&self) -> &str {
        unscoped(&self.name)
    }
}

impl std::fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Strips an `@scope/` prefix, if any.
pub fn unscoped(name: &str) -> &str {
    match name.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
        Some((_, bare)) => bare,
        None => name,
    }
}

fn is_name_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

fn validate_name(name: &str) -> Result<(), AuditError> {
    if name.is_empty() {
        return Err(AuditError::invalid(name, "package name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(AuditError::invalid(
            name,
            format!("package name exceeds {} characters", MAX_NAME_LEN),
        ));
    }

    let valid = match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, bare)) => is_name_segment(scope) && is_name_segment(bare),
            None => false,
        },
        None => is_name_segment(name),
    };

    if valid {
        Ok(())
    } else {
        Err(AuditError::invalid(
            name,
            "expected 'name' or '@scope/name' using letters, digits, '.', '-' or '_'",
        ))
    }
}

fn parse_version(version: &str) -> Result<VersionSelector, AuditError> {
    if let Ok(exact) = semver::Version::parse(version.trim_start_matches('v')) {
        return Ok(VersionSelector::Exact(exact));
    }

    if is_name_segment(version) {
        Ok(VersionSelector::Tag(version.to_string()))
    } else {
        Err(AuditError::invalid(
            version,
            "version must be a semver release or a dist-tag",
        ))
    }
}

/// A person entry as the registry reports it: either a bare string or an
/// object with a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Person {
    Name(String),
    Detailed {
        #[serde(default)]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
    },
}

impl Person {
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            Person::Name(name) => Some(name.as_str()),
            Person::Detailed { name, .. } => name.as_deref(),
        };
        name.filter(|n| !n.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Repository {
    Url(String),
    Detailed {
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

impl Repository {
    pub fn url(&self) -> Option<&str> {
        let url = match self {
            Repository::Url(url) => Some(url.as_str()),
            Repository::Detailed { url, .. } => url.as_deref(),
        };
        url.filter(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum License {
    Id(String),
    Detailed {
        #[serde(default, rename = "type")]
        kind: Option<String>,
    },
}

impl License {
    pub fn id(&self) -> Option<&str> {
        match self {
            License::Id(id) => Some(id.as_str()),
            License::Detailed { kind } => kind.as_deref(),
        }
    }
}

/// One metadata snapshot for the audited version, in registry shape.
///
/// Every field is optional on the wire. Absent, null or oddly shaped data
/// deserializes to the most conservative value (no maintainers, zero
/// downloads, no scripts).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageMetadata {
    #[serde(deserialize_with = "lenient")]
    pub name: String,
    #[serde(deserialize_with = "lenient")]
    pub version: String,
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Weekly download count.
    #[serde(deserialize_with = "lenient")]
    pub downloads: u64,
    #[serde(deserialize_with = "lenient")]
    pub scripts: BTreeMap<String, String>,
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub maintainers: Option<Vec<Person>>,
    #[serde(
        alias = "_npmUser",
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub publisher: Option<Person>,
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    /// Publish timestamps keyed by version string (plus `created`/`modified`).
    #[serde(deserialize_with = "lenient")]
    pub time: BTreeMap<String, String>,
}

/// Decodes one snapshot field, falling back to its default when the value is
/// null or does not have the expected shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

impl PackageMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn maintainer_count(&self) -> usize {
        self.maintainers.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn has_script(&self, hook: &str) -> bool {
        self.scripts
            .get(hook)
            .map(|body| !body.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn publisher_name(&self) -> Option<&str> {
        self.publisher.as_ref().and_then(Person::name)
    }

    pub fn repository_url(&self) -> Option<&str> {
        self.repository.as_ref().and_then(Repository::url)
    }

    pub fn license_id(&self) -> Option<&str> {
        self.license.as_ref().and_then(License::id)
    }

    pub fn has_description(&self) -> bool {
        self.description
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false)
    }

    /// Publish time of `version`, if the time table has a parseable entry.
    pub fn published_at(&self, version: &str) -> Option<DateTime<Utc>> {
        let raw = self.time.get(version)?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Non-empty install-time hooks from `scripts`, keyed by hook name.
    pub fn install_hooks(&self) -> BTreeMap<&'static str, &str> {
        ["preinstall", "install", "postinstall"]
            .into_iter()
            .filter_map(|hook| {
                self.scripts
                    .get(hook)
                    .filter(|body| !body.trim().is_empty())
                    .map(|body| (hook, body.as_str()))
            })
            .collect()
    }
}
