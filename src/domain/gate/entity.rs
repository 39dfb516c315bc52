//! Gate entity, severity and deterministic pass criteria

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use super::verdict::CriterionEvidence;
use crate::domain::DomainError;
use crate::domain::storage::StorageEntity;
use crate::domain::validation::resource_id;

resource_id!(
    /// Gate identifier
    GateId
);

/// Gate severity. Critical and high failures block chain progression.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    pub fn blocks(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for Severity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(DomainError::validation(format!(
                "Unknown severity '{}' (expected critical, high, medium or low)",
                other
            ))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions checked mechanically against an output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Case-insensitive substrings that must appear
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_patterns: Vec<String>,
    /// Case-insensitive substrings that must not appear
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl PassCriteria {
    pub fn is_empty(&self) -> bool {
        self.min_length.is_none()
            && self.max_length.is_none()
            && self.required_patterns.is_empty()
            && self.forbidden_patterns.is_empty()
            && self.regex.is_none()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(DomainError::validation(format!(
                    "min_length {} exceeds max_length {}",
                    min, max
                )));
            }
        }

        if let Some(pattern) = &self.regex {
            RegexBuilder::new(pattern)
                .build()
                .map_err(|e| DomainError::validation(format!("Invalid gate regex: {}", e)))?;
        }

        Ok(())
    }

    /// One evidence entry per configured condition
    pub fn check(&self, output: &str) -> Vec<CriterionEvidence> {
        let mut evidence = Vec::new();
        let length = output.chars().count();
        let lowered = output.to_lowercase();

        if let Some(min) = self.min_length {
            evidence.push(CriterionEvidence::new(
                format!("length >= {}", min),
                length >= min,
                format!("output has {} characters", length),
            ));
        }

        if let Some(max) = self.max_length {
            evidence.push(CriterionEvidence::new(
                format!("length <= {}", max),
                length <= max,
                format!("output has {} characters", length),
            ));
        }

        for pattern in &self.required_patterns {
            let found = lowered.contains(&pattern.to_lowercase());
            evidence.push(CriterionEvidence::new(
                format!("contains '{}'", pattern),
                found,
                if found { "present" } else { "absent" },
            ));
        }

        for pattern in &self.forbidden_patterns {
            let found = lowered.contains(&pattern.to_lowercase());
            evidence.push(CriterionEvidence::new(
                format!("does not contain '{}'", pattern),
                !found,
                if found { "present" } else { "absent" },
            ));
        }

        if let Some(pattern) = &self.regex {
            let (satisfied, detail) = match RegexBuilder::new(pattern).build() {
                Ok(re) => match re.find(output) {
                    Some(m) => (true, format!("matched '{}'", m.as_str())),
                    None => (false, "no match".to_string()),
                },
                Err(e) => (false, format!("invalid regex: {}", e)),
            };
            evidence.push(CriterionEvidence::new(
                format!("matches /{}/", pattern),
                satisfied,
                detail,
            ));
        }

        evidence
    }
}

/// A named quality gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    id: GateId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    severity: Severity,
    /// Ordered textual assertions for the evaluator
    #[serde(default)]
    criteria: Vec<String>,
    #[serde(default)]
    pass_criteria: PassCriteria,
    /// Work-type keywords used for suggestions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    triggers: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StorageEntity for Gate {
    type Key = GateId;

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

impl Gate {
    pub fn new(id: GateId, name: impl Into<String>, severity: Severity) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: String::new(),
            severity,
            criteria: Vec::new(),
            pass_criteria: PassCriteria::default(),
            triggers: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Ad-hoc gate for a quoted criterion written inline in a chain
    pub fn inline(ordinal: usize, criterion: impl Into<String>, severity: Severity) -> Self {
        let criterion = criterion.into();
        let id = GateId(format!("inline-{}", ordinal));

        Self::new(id, "Inline criteria", severity).with_criteria(vec![criterion])
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_pass_criteria(mut self, pass_criteria: PassCriteria) -> Self {
        self.pass_criteria = pass_criteria;
        self
    }

    pub fn with_triggers(mut self, triggers: Vec<String>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn id(&self) -> &GateId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn criteria(&self) -> &[String] {
        &self.criteria
    }

    pub fn pass_criteria(&self) -> &PassCriteria {
        &self.pass_criteria
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    pub fn set_severity(&mut self, severity: Severity) {
        self.severity = severity;
        self.touch();
    }

    pub fn set_criteria(&mut self, criteria: Vec<String>) {
        self.criteria = criteria;
        self.touch();
    }

    pub fn set_pass_criteria(&mut self, pass_criteria: PassCriteria) {
        self.pass_criteria = pass_criteria;
        self.touch();
    }

    pub fn set_triggers(&mut self, triggers: Vec<String>) {
        self.triggers = triggers;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "Gate '{}' is missing a name",
                self.id
            )));
        }

        if self.criteria.iter().any(|c| c.trim().is_empty()) {
            return Err(DomainError::validation(format!(
                "Gate '{}' has an empty criterion",
                self.id
            )));
        }

        if self.criteria.is_empty() && self.pass_criteria.is_empty() {
            return Err(DomainError::validation(format!(
                "Gate '{}' needs at least one criterion or pass criterion",
                self.id
            )));
        }

        self.pass_criteria.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> Gate {
        Gate::new(GateId::new("code-quality").unwrap(), "Code Quality", Severity::High)
            .with_criteria(vec!["includes error handling".to_string()])
    }

    #[test]
    fn test_severity_blocks() {
        assert!(Severity::Critical.blocks());
        assert!(Severity::High.blocks());
        assert!(!Severity::Medium.blocks());
        assert!(!Severity::Low.blocks());
    }

    #[test]
    fn test_severity_parse_and_serde() {
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("urgent".parse::<Severity>().is_err());
        assert_eq!(serde_json::to_string(&Severity::Low).unwrap(), "\"low\"");
    }

    #[test]
    fn test_validate() {
        assert!(gate().validate().is_ok());

        let empty = Gate::new(GateId::new("empty").unwrap(), "Empty", Severity::Low);
        assert!(empty.validate().is_err());

        let pattern_only = Gate::new(GateId::new("p").unwrap(), "P", Severity::Low)
            .with_pass_criteria(PassCriteria {
                min_length: Some(10),
                ..Default::default()
            });
        assert!(pattern_only.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_regex() {
        let g = gate().with_pass_criteria(PassCriteria {
            regex: Some("(unclosed".to_string()),
            ..Default::default()
        });
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_validate_min_over_max() {
        let g = gate().with_pass_criteria(PassCriteria {
            min_length: Some(10),
            max_length: Some(5),
            ..Default::default()
        });
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_pass_criteria_check() {
        let criteria = PassCriteria {
            min_length: Some(5),
            max_length: Some(100),
            required_patterns: vec!["TEST".to_string()],
            forbidden_patterns: vec!["todo".to_string()],
            regex: Some(r"fn \w+".to_string()),
        };

        let evidence = criteria.check("fn main() has a test but a TODO remains");
        assert_eq!(evidence.len(), 5);
        assert!(evidence[0].satisfied);
        assert!(evidence[1].satisfied);
        assert!(evidence[2].satisfied);
        assert!(!evidence[3].satisfied);
        assert!(evidence[4].satisfied);
        assert_eq!(evidence[4].evidence, "matched 'fn main'");
    }

    #[test]
    fn test_inline_gate() {
        let g = Gate::inline(2, "mentions rollback plan", Severity::High);
        assert_eq!(g.id().as_str(), "inline-2");
        assert_eq!(g.criteria(), &["mentions rollback plan".to_string()]);
        assert!(g.validate().is_ok());
    }
}
