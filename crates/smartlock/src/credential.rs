//! Credential data model and per-operation request options.
//!
//! Pure data: serde-serializable shapes exchanged with the provider, plus
//! the sign-in [`Hint`] derived from a picked credential.

use serde::{Deserialize, Serialize};

/// A stored credential as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Account identifier, typically an email address.
    pub id: String,
    /// Display name attached to the account, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Identity-provider URI for federated accounts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture_uri: Option<String>,
}

impl Credential {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            password: None,
            account_type: None,
            profile_picture_uri: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_account_type(mut self, account_type: impl Into<String>) -> Self {
        self.account_type = Some(account_type.into());
        self
    }
}

/// Sign-in hint produced by the hint picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl Hint {
    /// Derives a hint from the credential the picker returned. The display
    /// name is split into first/last only when it contains exactly one
    /// interior space; anything else yields empty name parts.
    pub fn from_credential(credential: &Credential) -> Self {
        let (first_name, last_name) = credential
            .name
            .as_deref()
            .map(split_display_name)
            .unwrap_or_default();
        Self {
            email: credential.id.clone(),
            first_name,
            last_name,
        }
    }
}

fn split_display_name(name: &str) -> (String, String) {
    match (name.find(' '), name.rfind(' ')) {
        (Some(first), Some(last)) if first == last => {
            (name[..first].to_string(), name[first + 1..].to_string())
        }
        _ => (String::new(), String::new()),
    }
}

/// Options for the retrieve operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveRequest {
    /// Whether password-backed credentials are acceptable.
    pub password_login_supported: bool,
    /// Accepted federated identity-provider URIs.
    pub account_types: Vec<String>,
}

impl Default for RetrieveRequest {
    fn default() -> Self {
        Self {
            password_login_supported: true,
            account_types: Vec::new(),
        }
    }
}

/// Options for the sign-in hint picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintRequest {
    pub email_address_identifier_supported: bool,
    pub phone_number_identifier_supported: bool,
    pub show_cancel_button: bool,
}

impl Default for HintRequest {
    fn default() -> Self {
        Self {
            email_address_identifier_supported: true,
            phone_number_identifier_supported: false,
            show_cancel_button: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_splits_two_part_name() {
        let credential = Credential::new("ada@example.com").with_name("Ada Lovelace");
        let hint = Hint::from_credential(&credential);
        assert_eq!(hint.email, "ada@example.com");
        assert_eq!(hint.first_name, "Ada");
        assert_eq!(hint.last_name, "Lovelace");
    }

    #[test]
    fn hint_leaves_unsplittable_names_empty() {
        for name in ["Ada", "Ada King Lovelace", ""] {
            let credential = Credential::new("ada@example.com").with_name(name);
            let hint = Hint::from_credential(&credential);
            assert_eq!(hint.first_name, "");
            assert_eq!(hint.last_name, "");
        }
    }

    #[test]
    fn hint_without_display_name() {
        let credential = Credential::new("ada@example.com");
        let hint = Hint::from_credential(&credential);
        assert_eq!(hint.email, "ada@example.com");
        assert_eq!(hint.first_name, "");
    }

    #[test]
    fn credential_serialization_omits_unset_fields() {
        let credential = Credential::new("ada@example.com").with_password("s3cret");
        let json = serde_json::to_value(&credential).unwrap();
        assert_eq!(json["id"], "ada@example.com");
        assert_eq!(json["password"], "s3cret");
        assert!(json.get("name").is_none());
        assert!(json.get("account_type").is_none());
    }

    #[test]
    fn retrieve_request_defaults_allow_password_login() {
        let request = RetrieveRequest::default();
        assert!(request.password_login_supported);
        assert!(request.account_types.is_empty());
    }
}
