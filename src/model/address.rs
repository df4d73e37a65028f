//! Recipients, the owner's identity, and sender domains.

/// Role a recipient holds on a message. Codes follow the transport's
/// recipient-type property (1 = To, 2 = Cc, 3 = Bcc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RecipientRole {
    To,
    Cc,
    Bcc,
    /// A role code the store reported but we do not track.
    Other(u8),
}

impl RecipientRole {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::To,
            2 => Self::Cc,
            3 => Self::Bcc,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::To => 1,
            Self::Cc => 2,
            Self::Bcc => 3,
            Self::Other(c) => c,
        }
    }
}

/// One recipient entry. Either part may be unreadable on a given store.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Recipient {
    /// Bare address, if readable.
    pub address: Option<String>,
    /// Display name, if readable.
    pub name: Option<String>,
    /// Role on the message.
    pub role: RecipientRole,
}

impl Recipient {
    pub fn new(address: impl Into<String>, name: impl Into<String>, role: RecipientRole) -> Self {
        let address = address.into();
        let name = name.into();
        Self {
            address: (!address.is_empty()).then_some(address),
            name: (!name.is_empty()).then_some(name),
            role,
        }
    }
}

/// The mailbox owner, lowercased once for matching.
///
/// # Examples
/// `Identity::new("Me@Corp.example", "Jane Doe")` matches a recipient whose
/// address contains `me@corp.example` or whose name contains `jane doe`.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    email: String,
    display_name: String,
}

impl Identity {
    pub fn new(email: &str, display_name: &str) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            display_name: display_name.trim().to_lowercase(),
        }
    }

    /// Substring match on address OR display name, case-insensitive.
    ///
    /// An empty identity part never matches, otherwise every recipient
    /// would contain the empty string.
    pub fn matches(&self, recipient: &Recipient) -> bool {
        let addr = recipient
            .address
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();
        let name = recipient
            .name
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();
        (!self.email.is_empty() && addr.contains(&self.email))
            || (!self.display_name.is_empty() && name.contains(&self.display_name))
    }
}

/// Domain portion of a resolved sender identity.
///
/// `"user@sub.example.com"` → `"sub.example.com"`; anything without `@`
/// yields `sentinel`.
pub fn domain_of(identity: &str, sentinel: &str) -> String {
    match identity.split_once('@') {
        Some((_, domain)) => {
            // a stray second '@' belongs to the local part in practice
            let domain = domain.split('@').next().unwrap_or(domain).trim();
            if domain.is_empty() {
                sentinel.to_string()
            } else {
                domain.to_string()
            }
        }
        None => sentinel.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_of_subdomain() {
        assert_eq!(domain_of("user@sub.example.com", "internal"), "sub.example.com");
    }

    #[test]
    fn test_domain_of_without_at() {
        assert_eq!(domain_of("no-at-sign", "internal"), "internal");
    }

    #[test]
    fn test_domain_of_trailing_at() {
        assert_eq!(domain_of("broken@", "internal"), "internal");
    }

    #[test]
    fn test_identity_matches_address_substring() {
        let me = Identity::new("Me@Corp.Example", "Jane Doe");
        let r = Recipient::new("ME@corp.example", "", RecipientRole::To);
        assert!(me.matches(&r));
    }

    #[test]
    fn test_identity_matches_display_name() {
        let me = Identity::new("me@corp.example", "Jane Doe");
        let r = Recipient::new("/o=corp/cn=jdoe", "JANE DOE (Finance)", RecipientRole::Cc);
        assert!(me.matches(&r));
    }

    #[test]
    fn test_empty_identity_never_matches() {
        let me = Identity::new("", "");
        let r = Recipient::new("someone@example.com", "Someone", RecipientRole::To);
        assert!(!me.matches(&r));
    }

    #[test]
    fn test_role_codes() {
        assert_eq!(RecipientRole::from_code(1), RecipientRole::To);
        assert_eq!(RecipientRole::from_code(2), RecipientRole::Cc);
        assert_eq!(RecipientRole::from_code(9).code(), 9);
    }
}
