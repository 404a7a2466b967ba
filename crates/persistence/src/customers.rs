//! Customer directory backed by a JSON file

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use call_agent_core::{CustomerDirectory, CustomerProfile, Result};

use crate::PersistenceError;

const PHONE_DIGITS: usize = 10;

/// Reduce a phone number to its last ten digits
///
/// Country codes and formatting (`+91 98765-43210`) are stripped. Returns
/// `None` when fewer than ten digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < PHONE_DIGITS {
        return None;
    }
    Some(digits[digits.len() - PHONE_DIGITS..].to_string())
}

/// Read-only directory indexed by normalized phone number
#[derive(Debug, Default)]
pub struct JsonCustomerDirectory {
    by_phone: HashMap<String, CustomerProfile>,
}

impl JsonCustomerDirectory {
    /// Load a JSON array of customer records
    ///
    /// Records without a usable phone number are skipped with a warning.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, PersistenceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let customers: Vec<CustomerProfile> = serde_json::from_str(&content)?;
        let directory = Self::from_customers(customers);
        tracing::info!(
            path = %path.display(),
            customers = directory.len(),
            "Loaded customer directory"
        );
        Ok(directory)
    }

    /// Load, or start empty when the file does not exist
    pub fn load_or_empty(path: impl AsRef<Path>) -> std::result::Result<Self, PersistenceError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Customer file not found, directory is empty");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_customers(customers: impl IntoIterator<Item = CustomerProfile>) -> Self {
        let mut by_phone = HashMap::new();
        for mut customer in customers {
            match normalize_phone(&customer.phone) {
                Some(phone) => {
                    customer.phone = phone.clone();
                    by_phone.insert(phone, customer);
                }
                None => {
                    tracing::warn!(phone = %customer.phone, "Skipping customer with invalid phone number");
                }
            }
        }
        Self { by_phone }
    }

    pub fn len(&self) -> usize {
        self.by_phone.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_phone.is_empty()
    }
}

#[async_trait]
impl CustomerDirectory for JsonCustomerDirectory {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<CustomerProfile>> {
        let Some(phone) = normalize_phone(phone) else {
            tracing::debug!(phone = %phone, "Lookup with invalid phone number");
            return Ok(None);
        };
        let found = self.by_phone.get(&phone).cloned();
        tracing::debug!(phone = %phone, found = found.is_some(), "Customer lookup");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("9876543210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_phone("+91 98765-43210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[tokio::test]
    async fn test_load_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("customers.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "Anu Thomas", "phone": "9876543210", "plan": "Fiber 100 Mbps", "vip": true},
                {"name": "No Phone", "phone": "n/a"}
            ]"#,
        )
        .unwrap();

        let directory = JsonCustomerDirectory::load(&path).unwrap();
        assert_eq!(directory.len(), 1);

        let found = directory.find_by_phone("+919876543210").await.unwrap().unwrap();
        assert_eq!(found.name, "Anu Thomas");
        assert!(found.vip);
        assert!(directory.find_by_phone("1111111111").await.unwrap().is_none());
        assert!(directory.find_by_phone("abc").await.unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let directory = JsonCustomerDirectory::load_or_empty("/nonexistent/customers.json").unwrap();
        assert!(directory.is_empty());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("customers.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonCustomerDirectory::load(&path),
            Err(PersistenceError::Serialization(_))
        ));
    }
}
