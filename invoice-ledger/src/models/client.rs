//! Business owners and their clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// The business issuing invoices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Owner {
    pub owner_id: Uuid,
    pub company_name: String,
    pub email: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// A customer invoices are addressed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub client_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOwner {
    #[validate(length(min = 1, max = 200))]
    pub company_name: String,
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateClient {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 7, max = 20))]
    pub phone: Option<String>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CreateOwner {
    /// Trimmed copy; validate this rather than the raw input.
    pub fn normalized(self) -> Self {
        Self {
            company_name: self.company_name.trim().to_string(),
            email: trimmed(self.email),
        }
    }
}

impl CreateClient {
    /// Trimmed copy; validate this rather than the raw input.
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: trimmed(self.email),
            phone: trimmed(self.phone),
        }
    }
}

/// Contact details a notice is addressed with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoticeRecipient {
    pub company_name: String,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_fail_after_trimming() {
        let owner = CreateOwner {
            company_name: "   ".to_string(),
            email: None,
        };
        assert!(owner.clone().validate().is_ok());
        assert!(owner.normalized().validate().is_err());

        let client = CreateClient {
            name: "\t \n".to_string(),
            email: Some("  ".to_string()),
            phone: None,
        };
        assert!(client.normalized().validate().is_err());
    }

    #[test]
    fn normalizing_keeps_real_values() {
        let client = CreateClient {
            name: "  Wanjiku Traders ".to_string(),
            email: Some(" accounts@wanjiku.test ".to_string()),
            phone: Some(" 0712345678 ".to_string()),
        }
        .normalized();
        assert!(client.validate().is_ok());
        assert_eq!(client.name, "Wanjiku Traders");
        assert_eq!(client.email.as_deref(), Some("accounts@wanjiku.test"));
        assert_eq!(client.phone.as_deref(), Some("0712345678"));
    }
}
