use regex::Regex;

/// Validates a Collection or Catalog name against the DNS label shape
/// used throughout the system (same grammar as a Kubernetes pod label):
/// lowercase alphanumerics and interior dashes, starting with a letter,
/// at most 63 characters.
pub fn validate_dns_label(name: &str) -> Result<(), InvalidName> {
    lazy_static::lazy_static! {
        static ref DNS_LABEL: Regex = Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").unwrap();
    }
    if name.len() > 63 || !DNS_LABEL.is_match(name) {
        return Err(InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
#[error("invalid name {name:?} (expected a DNS label: lowercase, alphanumeric, dashes, <= 63 chars)")]
pub struct InvalidName {
    pub name: String,
}
