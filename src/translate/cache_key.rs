//! Cache key derivation.
//! The same key is used for local lookups and sent to the service as `cache_key`,
//! so both sides agree on which translation a tuple refers to.

/// Domain separation for the blake3 key-derivation mode.
const KEY_CONTEXT: &str = "relaytext 2024 translation cache key v1";

/// Derive the cache key for a translation request.
///
/// Each field is length-prefixed before hashing, so moving characters across a
/// field boundary (`("ab", "c")` vs `("a", "bc")`) yields a different key.
/// Returns 64 lowercase hex chars.
pub fn generate(account_id: &str, text: &str, locale: &str, context: &str, tone: &str) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(KEY_CONTEXT);
    for field in [account_id, text, locale, context, tone] {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}
