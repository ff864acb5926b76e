//! Finalizer set manipulation
//!
//! Pure functions over an ordered sequence of marker strings. No I/O: the
//! engine decides when the result is persisted.

/// Whether `marker` is present in `finalizers`
pub fn contains(finalizers: &[String], marker: &str) -> bool {
    finalizers.iter().any(|f| f == marker)
}

/// Append `marker` unless already present
pub fn add(finalizers: &[String], marker: &str) -> Vec<String> {
    let mut out = finalizers.to_vec();
    if !contains(finalizers, marker) {
        out.push(marker.to_string());
    }
    out
}

/// Remove every occurrence of `marker`, keeping the rest in order
///
/// Always returns a (possibly empty) vector.
pub fn remove(finalizers: &[String], marker: &str) -> Vec<String> {
    finalizers
        .iter()
        .filter(|f| f.as_str() != marker)
        .cloned()
        .collect()
}
