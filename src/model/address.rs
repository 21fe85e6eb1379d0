//! Sender address parsing (RFC 5322 §3.4).

/// A parsed sender address.
///
/// # Examples
/// - `"USPS Informed Delivery <USPSInformedDelivery@email.informeddelivery.usps.com>"`
///   → `display_name = "USPS Informed Delivery"`
/// - `"shipment-tracking@amazon.com"` → `display_name = ""`
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single address from a decoded `From:` value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    ///
    /// Anything else is kept verbatim as `address` so sender matching still
    /// sees the text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: strip_quotes(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Lowercased `"name address"` haystack used for sender matching.
    pub fn match_key(&self) -> String {
        let mut key = String::with_capacity(self.display_name.len() + self.address.len() + 1);
        key.push_str(&self.display_name.to_lowercase());
        key.push(' ');
        key.push_str(&self.address.to_lowercase());
        key
    }

    /// `true` if any filter is a case-insensitive substring of the sender.
    pub fn matches_any(&self, filters: &[String]) -> bool {
        let key = self.match_key();
        filters
            .iter()
            .map(|f| f.trim().to_lowercase())
            .any(|f| !f.is_empty() && key.contains(&f))
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
