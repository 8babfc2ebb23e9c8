//! Known-vulnerability lookups.
//!
//! [`VulnerabilitySource`] answers which advisories directly affect one
//! package version. [`OsvSource`] implements it against the OSV API for
//! the PyPI ecosystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// OSV ecosystem name for Python packages.
const ECOSYSTEM: &str = "PyPI";

/// Errors arising from vulnerability lookups.
#[derive(Debug, thiserror::Error)]
pub enum VulnerabilityError {
    /// HTTP request failed.
    #[error("request to {url} failed: {reason}")]
    Http {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The response body did not match the expected JSON shape.
    #[error("unexpected response from {url}: {reason}")]
    Parse {
        /// The URL that was requested.
        url: String,
        /// Description of the problem.
        reason: String,
    },
}

/// Advisory severity rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Lowest rating.
    Low,
    /// `MODERATE` / `MEDIUM`.
    Medium,
    /// Blocks packaging.
    High,
    /// Blocks packaging.
    Critical,
}

impl Severity {
    /// Parse a database rating label; unknown labels give `None`.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Self::Critical),
            "HIGH" => Some(Self::High),
            "MODERATE" | "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        };
        f.write_str(label)
    }
}

/// An advisory affecting a package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    /// Advisory identifier, e.g. `GHSA-...` or `PYSEC-...`.
    pub id: String,
    /// Identifiers of the same issue in other databases.
    pub aliases: Vec<String>,
    /// Database rating; `None` when the record is unrated.
    pub severity: Option<Severity>,
}

/// Human-readable detail of one advisory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisoryDetail {
    /// Advisory identifier.
    pub id: String,
    /// Database rating; `None` when the record is unrated.
    pub severity: Option<Severity>,
    /// One-line summary.
    pub title: String,
    /// Affected version ranges.
    pub versions: String,
}

/// Source of vulnerability data.
#[cfg_attr(test, mockall::automock)]
pub trait VulnerabilitySource {
    /// Advisories directly affecting `name` at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`VulnerabilityError`] if the source cannot be reached or
    /// answers with an unexpected document.
    fn direct_vulnerabilities(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<Advisory>, VulnerabilityError>;

    /// Detail record for one advisory.
    ///
    /// # Errors
    ///
    /// Returns [`VulnerabilityError`] if the record cannot be fetched.
    fn advisory(&self, id: &str) -> Result<AdvisoryDetail, VulnerabilityError>;
}

/// Per-severity counts for one package version.
///
/// Unrated advisories are counted as medium so they are reported without
/// blocking packaging on their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    /// Critical advisories.
    pub critical: u32,
    /// High advisories.
    pub high: u32,
    /// Medium and unrated advisories.
    pub medium: u32,
    /// Low advisories.
    pub low: u32,
}

impl SeverityCounts {
    /// Count advisories by severity.
    #[must_use]
    pub fn tally(advisories: &[Advisory]) -> Self {
        advisories.iter().fold(Self::default(), |mut counts, a| {
            match a.severity.unwrap_or(Severity::Medium) {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
            counts
        })
    }

    /// Pass iff there are no critical or high advisories.
    #[must_use]
    pub const fn passes(&self) -> bool {
        self.critical == 0 && self.high == 0
    }

    /// Counts in descending severity order.
    #[must_use]
    pub const fn values(&self) -> [u32; 4] {
        [self.critical, self.high, self.medium, self.low]
    }
}

/// Merge advisories that describe the same issue under different ids.
///
/// The surviving entry keeps the highest rating seen across its aliases.
#[must_use]
pub fn collapse_aliases(advisories: Vec<Advisory>) -> Vec<Advisory> {
    let mut merged: Vec<Advisory> = Vec::with_capacity(advisories.len());
    for advisory in advisories {
        let existing = merged.iter_mut().find(|m| {
            m.id == advisory.id || m.aliases.contains(&advisory.id) || advisory.aliases.contains(&m.id)
        });
        match existing {
            Some(m) => {
                m.severity = m.severity.max(advisory.severity);
                for alias in advisory.aliases {
                    if !m.aliases.contains(&alias) {
                        m.aliases.push(alias);
                    }
                }
            }
            None => merged.push(advisory),
        }
    }
    merged
}

/// The OSV vulnerability database.
pub struct OsvSource {
    base_url: String,
    agent: ureq::Agent,
}

impl OsvSource {
    /// Client for the OSV API at `base_url` with a per-request timeout.
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn read_body(
        url: &str,
        result: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<String, VulnerabilityError> {
        let http_error = |reason: String| VulnerabilityError::Http {
            url: url.to_owned(),
            reason,
        };
        result
            .map_err(|e| http_error(e.to_string()))?
            .into_body()
            .read_to_string()
            .map_err(|e| http_error(e.to_string()))
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    version: &'a str,
    package: QueryPackage<'a>,
}

#[derive(Serialize)]
struct QueryPackage<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    vulns: Vec<OsvRecord>,
}

#[derive(Deserialize)]
struct OsvRecord {
    id: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    database_specific: Option<DatabaseSpecific>,
    #[serde(default)]
    affected: Vec<Affected>,
}

#[derive(Deserialize)]
struct DatabaseSpecific {
    #[serde(default)]
    severity: Option<String>,
}

#[derive(Deserialize)]
struct Affected {
    #[serde(default)]
    ranges: Vec<AffectedRange>,
}

#[derive(Deserialize)]
struct AffectedRange {
    #[serde(default)]
    events: Vec<RangeEvent>,
}

#[derive(Deserialize)]
struct RangeEvent {
    #[serde(default)]
    introduced: Option<String>,
    #[serde(default)]
    fixed: Option<String>,
    #[serde(default)]
    last_affected: Option<String>,
}

impl OsvRecord {
    fn severity(&self) -> Option<Severity> {
        self.database_specific
            .as_ref()
            .and_then(|d| d.severity.as_deref())
            .and_then(Severity::from_label)
    }

    fn title(&self) -> String {
        self.summary
            .as_deref()
            .or(self.details.as_deref())
            .and_then(|s| s.lines().next())
            .unwrap_or("(no summary)")
            .trim()
            .to_owned()
    }

    fn versions(&self) -> String {
        let ranges: Vec<String> = self
            .affected
            .iter()
            .flat_map(|a| &a.ranges)
            .flat_map(|r| render_range(&r.events))
            .collect();
        ranges.join(" ")
    }
}

/// Render OSV range events as comparison clauses, e.g. `>=1.0,<1.2`.
fn render_range(events: &[RangeEvent]) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut introduced: Option<&str> = None;
    for event in events {
        if let Some(start) = event.introduced.as_deref() {
            introduced = Some(start);
        }
        let end = event
            .fixed
            .as_deref()
            .map(|v| format!("<{v}"))
            .or_else(|| event.last_affected.as_deref().map(|v| format!("<={v}")));
        if let Some(end) = end {
            clauses.push(match introduced.take() {
                Some(start) if start != "0" => format!(">={start},{end}"),
                _ => end,
            });
        }
    }
    if let Some(start) = introduced {
        clauses.push(if start == "0" {
            "*".to_owned()
        } else {
            format!(">={start}")
        });
    }
    clauses
}

/// Parse an OSV `/v1/query` response.
///
/// # Errors
///
/// Returns [`VulnerabilityError::Parse`] when the body is not a query
/// response.
pub fn parse_query_response(url: &str, body: &str) -> Result<Vec<Advisory>, VulnerabilityError> {
    let response: QueryResponse = serde_json::from_str(body).map_err(|e| parse_error(url, &e))?;
    Ok(response
        .vulns
        .into_iter()
        .map(|record| Advisory {
            severity: record.severity(),
            id: record.id,
            aliases: record.aliases,
        })
        .collect())
}

/// Parse an OSV `/v1/vulns/{id}` record.
///
/// # Errors
///
/// Returns [`VulnerabilityError::Parse`] when the body is not a record.
pub fn parse_advisory(url: &str, body: &str) -> Result<AdvisoryDetail, VulnerabilityError> {
    let record: OsvRecord = serde_json::from_str(body).map_err(|e| parse_error(url, &e))?;
    Ok(AdvisoryDetail {
        severity: record.severity(),
        title: record.title(),
        versions: record.versions(),
        id: record.id,
    })
}

fn parse_error(url: &str, err: &serde_json::Error) -> VulnerabilityError {
    VulnerabilityError::Parse {
        url: url.to_owned(),
        reason: err.to_string(),
    }
}

impl VulnerabilitySource for OsvSource {
    fn direct_vulnerabilities(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<Advisory>, VulnerabilityError> {
        let url = format!("{}/v1/query", self.base_url);
        log::debug!("querying {url} for {name} {version}");
        let request = QueryRequest {
            version,
            package: QueryPackage {
                name,
                ecosystem: ECOSYSTEM,
            },
        };
        let payload = serde_json::to_string(&request).map_err(|e| VulnerabilityError::Http {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let response = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(payload.as_str());
        let body = Self::read_body(&url, response)?;
        parse_query_response(&url, &body).map(collapse_aliases)
    }

    fn advisory(&self, id: &str) -> Result<AdvisoryDetail, VulnerabilityError> {
        let url = format!("{}/v1/vulns/{id}", self.base_url);
        let body = Self::read_body(&url, self.agent.get(url.as_str()).call())?;
        parse_advisory(&url, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn advisory(id: &str, aliases: &[&str], severity: Option<Severity>) -> Advisory {
        Advisory {
            id: id.to_owned(),
            aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
            severity,
        }
    }

    #[rstest]
    #[case("CRITICAL", Some(Severity::Critical))]
    #[case("high", Some(Severity::High))]
    #[case("MODERATE", Some(Severity::Medium))]
    #[case("LOW", Some(Severity::Low))]
    #[case("UNKNOWN", None)]
    fn severity_labels(#[case] label: &str, #[case] expected: Option<Severity>) {
        assert_eq!(Severity::from_label(label), expected);
    }

    #[test]
    fn unrated_advisories_count_as_medium() {
        let counts = SeverityCounts::tally(&[
            advisory("A", &[], None),
            advisory("B", &[], Some(Severity::Low)),
        ]);
        assert_eq!(counts.values(), [0, 0, 1, 1]);
        assert!(counts.passes());
    }

    #[rstest]
    #[case::critical(Severity::Critical)]
    #[case::high(Severity::High)]
    fn critical_or_high_fails(#[case] severity: Severity) {
        let counts = SeverityCounts::tally(&[advisory("A", &[], Some(severity))]);
        assert!(!counts.passes());
    }

    #[test]
    fn aliases_are_collapsed_keeping_highest_rating() {
        let merged = collapse_aliases(vec![
            advisory("PYSEC-2021-1", &["GHSA-xxxx"], None),
            advisory("GHSA-xxxx", &["PYSEC-2021-1"], Some(Severity::High)),
            advisory("GHSA-yyyy", &[], Some(Severity::Low)),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].severity, Some(Severity::High));
    }

    #[test]
    fn query_response_without_vulns_is_empty() {
        let advisories = parse_query_response("u", "{}").expect("valid response");
        assert!(advisories.is_empty());
    }

    #[test]
    fn query_response_reads_database_severity() {
        let body = r#"{"vulns":[{"id":"GHSA-1","aliases":["CVE-1"],"database_specific":{"severity":"HIGH"}},{"id":"PYSEC-1"}]}"#;
        let advisories = parse_query_response("u", body).expect("valid response");
        assert_eq!(advisories.len(), 2);
        assert_eq!(advisories[0].severity, Some(Severity::High));
        assert_eq!(advisories[0].aliases, ["CVE-1"]);
        assert_eq!(advisories[1].severity, None);
    }

    #[test]
    fn malformed_query_response_is_parse_error() {
        let err = parse_query_response("u", "<html>").expect_err("invalid");
        assert!(matches!(err, VulnerabilityError::Parse { .. }));
    }

    #[test]
    fn advisory_detail_renders_ranges() {
        let body = r#"{
            "id": "GHSA-1",
            "summary": "Arbitrary code execution in full_load",
            "database_specific": {"severity": "CRITICAL"},
            "affected": [{"ranges": [{"type": "ECOSYSTEM", "events": [
                {"introduced": "0"}, {"fixed": "5.4"},
                {"introduced": "6.0"}, {"last_affected": "6.0.1"}
            ]}]}]
        }"#;
        let detail = parse_advisory("u", body).expect("valid record");
        assert_eq!(detail.severity, Some(Severity::Critical));
        assert_eq!(detail.title, "Arbitrary code execution in full_load");
        assert_eq!(detail.versions, "<5.4 >=6.0,<=6.0.1");
    }

    #[test]
    fn open_ended_range_is_rendered() {
        let body = r#"{"id":"X","details":"Line one\nLine two","affected":[{"ranges":[{"events":[{"introduced":"2.0"}]}]}]}"#;
        let detail = parse_advisory("u", body).expect("valid record");
        assert_eq!(detail.title, "Line one");
        assert_eq!(detail.versions, ">=2.0");
    }
}
