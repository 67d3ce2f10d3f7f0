//! Canonical event-type taxonomy.
//!
//! The taxonomy is a closed set: verification lifecycle events are enumerated
//! exactly, every other event type must belong to one of the registered
//! domain families. Extending the set requires a schema version bump.
//! Legacy `VERIFY_*` aliases map 1:1 onto canonical forms; callers that
//! normalize an alias are expected to record the original symbol in the
//! audit trail.

/// Domain family prefixes accepted for non-lifecycle events.
pub const FAMILY_PREFIXES: &[&str] = &[
    "HOME_",
    "SERVICE_",
    "CLAIM_",
    "CAPITAL_",
    "OPS_",
    "PROPERTIES_",
];

/// Verification lifecycle event types, enumerated exactly.
pub const VERIFICATION_LIFECYCLE: &[&str] = &[
    "CLAIM_ADDED",
    "CLAIM_UPDATED",
    "EVIDENCE_ADDED",
    "EVIDENCE_FROZEN",
    "FREEZE_LIFTED",
    "DISPUTE_FILED",
    "DISPUTE_RESOLVED",
    "VERIFICATION_GRANTED",
    "VERIFICATION_REVOKED",
    "PROOF_VIEW_CREATED",
    "PROOF_VIEW_REVOKED",
    "STATE_HASH_MISMATCH",
];

/// Legacy alias table. Each `VERIFY_*` symbol maps 1:1 to its canonical form.
const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("VERIFY_CLAIM_ADDED", "CLAIM_ADDED"),
    ("VERIFY_CLAIM_UPDATED", "CLAIM_UPDATED"),
    ("VERIFY_EVIDENCE_ADDED", "EVIDENCE_ADDED"),
    ("VERIFY_EVIDENCE_FROZEN", "EVIDENCE_FROZEN"),
    ("VERIFY_FREEZE_LIFTED", "FREEZE_LIFTED"),
    ("VERIFY_DISPUTE_FILED", "DISPUTE_FILED"),
    ("VERIFY_DISPUTE_RESOLVED", "DISPUTE_RESOLVED"),
    ("VERIFY_GRANTED", "VERIFICATION_GRANTED"),
    ("VERIFY_REVOKED", "VERIFICATION_REVOKED"),
    ("VERIFY_PROOF_CREATED", "PROOF_VIEW_CREATED"),
    ("VERIFY_PROOF_REVOKED", "PROOF_VIEW_REVOKED"),
];

/// Result of normalizing a submitted event type against the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedType {
    /// The canonical event type to persist.
    pub canonical: String,
    /// The original symbol, present only when a legacy alias was rewritten.
    pub alias_of: Option<String>,
}

/// Returns true when `symbol` uses the allowed character set:
/// uppercase ASCII letters, digits and underscores, starting with a letter.
fn well_formed(symbol: &str) -> bool {
    let mut chars = symbol.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    symbol
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Normalize a submitted event type.
///
/// Returns `None` when the symbol is outside the closed taxonomy. Known
/// legacy `VERIFY_*` aliases are rewritten to their canonical form with the
/// original preserved in [`NormalizedType::alias_of`].
pub fn normalize(event_type: &str) -> Option<NormalizedType> {
    if !well_formed(event_type) || event_type.len() > crate::MAX_EVENT_TYPE_LEN {
        return None;
    }

    if VERIFICATION_LIFECYCLE.contains(&event_type) {
        return Some(NormalizedType {
            canonical: event_type.to_string(),
            alias_of: None,
        });
    }

    if let Some((alias, canonical)) = LEGACY_ALIASES.iter().find(|(a, _)| *a == event_type) {
        return Some(NormalizedType {
            canonical: (*canonical).to_string(),
            alias_of: Some((*alias).to_string()),
        });
    }

    if FAMILY_PREFIXES
        .iter()
        .any(|prefix| event_type.starts_with(prefix) && event_type.len() > prefix.len())
    {
        return Some(NormalizedType {
            canonical: event_type.to_string(),
            alias_of: None,
        });
    }

    None
}

/// Derive the default origin domain for an event type: the lowercased
/// family segment before the first underscore (`HOME_ASSET_REGISTERED`
/// becomes `home`). Producers may override this with an explicit source.
pub fn default_source(event_type: &str) -> String {
    event_type
        .split('_')
        .next()
        .unwrap_or(event_type)
        .to_ascii_lowercase()
}

/// Returns true for event types the verification replay reducer consumes.
/// These events carry the materialized projection columns on their ledger
/// rows and trigger a verification-cache refresh after commit.
pub fn is_verification_relevant(event_type: &str) -> bool {
    matches!(
        event_type,
        "CLAIM_ADDED"
            | "CLAIM_UPDATED"
            | "EVIDENCE_ADDED"
            | "EVIDENCE_FROZEN"
            | "FREEZE_LIFTED"
            | "DISPUTE_FILED"
            | "DISPUTE_RESOLVED"
            | "VERIFICATION_GRANTED"
            | "VERIFICATION_REVOKED"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_types_are_canonical() {
        let n = normalize("VERIFICATION_GRANTED").unwrap();
        assert_eq!(n.canonical, "VERIFICATION_GRANTED");
        assert!(n.alias_of.is_none());
    }

    #[test]
    fn family_events_pass_through() {
        let n = normalize("HOME_ASSET_REGISTERED").unwrap();
        assert_eq!(n.canonical, "HOME_ASSET_REGISTERED");
        assert!(n.alias_of.is_none());
    }

    #[test]
    fn legacy_aliases_are_rewritten() {
        let n = normalize("VERIFY_GRANTED").unwrap();
        assert_eq!(n.canonical, "VERIFICATION_GRANTED");
        assert_eq!(n.alias_of.as_deref(), Some("VERIFY_GRANTED"));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(normalize("BILLING_INVOICE_SENT").is_none());
        assert!(normalize("home_asset_registered").is_none());
        assert!(normalize("HOME_").is_none());
        assert!(normalize("").is_none());
    }

    #[test]
    fn source_derivation_uses_family_segment() {
        assert_eq!(default_source("HOME_ASSET_REGISTERED"), "home");
        assert_eq!(default_source("VERIFICATION_GRANTED"), "verification");
        assert_eq!(default_source("PROOF_VIEW_CREATED"), "proof");
    }

    #[test]
    fn proof_events_are_not_reducer_inputs() {
        assert!(is_verification_relevant("EVIDENCE_ADDED"));
        assert!(!is_verification_relevant("PROOF_VIEW_CREATED"));
        assert!(!is_verification_relevant("HOME_PHOTO_ADDED"));
    }
}
