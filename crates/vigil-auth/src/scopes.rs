//! Scope authorization: wildcard or at-least-one-of.

/// Grants every capability.
pub const WILDCARD_SCOPE: &str = "*";

/// Decide whether `granted` satisfies `required`.
///
/// The wildcard scope always allows. Otherwise any single overlap between
/// granted and required scopes is enough (at-least-one-of, not all-of).
/// An empty `required` list only demands prior authentication, which the
/// pipeline has already established by the time this runs.
pub fn authorize(granted: &[String], required: &[String]) -> bool {
    if granted.iter().any(|s| s == WILDCARD_SCOPE) {
        return true;
    }
    if required.is_empty() {
        return true;
    }
    required.iter().any(|r| granted.iter().any(|g| g == r))
}
