//! Customer records returned by the identity lookup

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A previously reported issue, used for repeated-issue escalation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorIssue {
    pub issue_type: String,
    pub reported_at: DateTime<Utc>,
}

/// Customer record as stored by the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CustomerProfile {
    #[serde(default)]
    pub customer_id: Option<String>,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    /// 1 (non-technical) to 5 (expert)
    #[serde(default)]
    pub technical_level: Option<u8>,
    /// 1 (impatient) to 5 (very patient)
    #[serde(default)]
    pub patience_level: Option<u8>,
    #[serde(default)]
    pub previous_calls: u32,
    #[serde(default)]
    pub successful_resolutions: u32,
    #[serde(default)]
    pub business_customer: bool,
    #[serde(default)]
    pub vip: bool,
    #[serde(default)]
    pub prior_issues: Vec<PriorIssue>,
}

impl CustomerProfile {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            ..Default::default()
        }
    }

    /// First name for spoken greetings
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }

    /// Multi-line block used in prompts, reports and tickets
    pub fn info_block(&self) -> String {
        fn or_unknown(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or("Unknown")
        }
        format!(
            "- Name: {}\n- Provider: {}\n- Region: {}\n- Plan: {}\n- Operator: {}",
            self.name,
            or_unknown(&self.provider),
            or_unknown(&self.region),
            or_unknown(&self.plan),
            or_unknown(&self.operator),
        )
    }
}

/// Inferred skill and patience of the caller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomerTechnicalProfile {
    pub technical_level: u8,
    pub patience_level: u8,
    pub previous_calls: u32,
    pub successful_resolutions: u32,
}

impl Default for CustomerTechnicalProfile {
    fn default() -> Self {
        Self {
            technical_level: 2,
            patience_level: 3,
            previous_calls: 0,
            successful_resolutions: 0,
        }
    }
}

impl CustomerTechnicalProfile {
    /// Derive from a directory record, keeping defaults for missing fields
    pub fn from_customer(customer: &CustomerProfile) -> Self {
        let defaults = Self::default();
        Self {
            technical_level: customer
                .technical_level
                .map(|l| l.clamp(1, 5))
                .unwrap_or(defaults.technical_level),
            patience_level: customer
                .patience_level
                .map(|l| l.clamp(1, 5))
                .unwrap_or(defaults.patience_level),
            previous_calls: customer.previous_calls,
            successful_resolutions: customer.successful_resolutions,
        }
    }

    /// Share of earlier calls that ended resolved (0.5 when there is no history)
    pub fn success_ratio(&self) -> f64 {
        if self.previous_calls == 0 {
            0.5
        } else {
            f64::from(self.successful_resolutions) / f64::from(self.previous_calls)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_technical_profile_defaults() {
        let customer = CustomerProfile::new("Anu Mathew", "9876543210");
        let profile = CustomerTechnicalProfile::from_customer(&customer);
        assert_eq!(profile.technical_level, 2);
        assert_eq!(profile.patience_level, 3);
        assert_eq!(profile.success_ratio(), 0.5);
    }

    #[test]
    fn test_technical_profile_clamps() {
        let mut customer = CustomerProfile::new("Anu", "9876543210");
        customer.technical_level = Some(9);
        customer.patience_level = Some(0);
        customer.previous_calls = 4;
        customer.successful_resolutions = 3;
        let profile = CustomerTechnicalProfile::from_customer(&customer);
        assert_eq!(profile.technical_level, 5);
        assert_eq!(profile.patience_level, 1);
        assert!((profile.success_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_first_name_and_info_block() {
        let mut customer = CustomerProfile::new("Anu Mathew", "9876543210");
        customer.region = Some("Kochi".into());
        assert_eq!(customer.first_name(), "Anu");
        let block = customer.info_block();
        assert!(block.contains("- Region: Kochi"));
        assert!(block.contains("- Plan: Unknown"));
    }
}
