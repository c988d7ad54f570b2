//! Node credential generation and hashing.
//!
//! Every registered node owns exactly one bearer key. The plaintext is
//! handed to the operator once at registration; only its SHA-256 digest and
//! a short suffix (for display) are ever persisted.

use rand::Rng;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Marker prepended to every node key so leaked keys are recognisable.
pub const KEY_MARKER: &str = "fgn_";

/// Number of random alphanumeric characters after the marker.
pub const KEY_RANDOM_LENGTH: usize = 48;

/// Number of trailing characters stored for display.
pub const KEY_SUFFIX_LENGTH: usize = 4;

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// The result of generating a new node key.
pub struct GeneratedNodeKey {
    /// The plaintext key (returned to the operator exactly once, never stored).
    pub plaintext: String,
    /// The last [`KEY_SUFFIX_LENGTH`] characters of the key for display.
    pub suffix: String,
    /// The SHA-256 hex digest of the plaintext key (stored in the database).
    pub hash: String,
}

/// Generate a new random node key.
///
/// The random part carries ~285 bits of entropy, so an unsalted digest is
/// sufficient and keeps authentication a single indexed lookup.
pub fn generate_node_key() -> GeneratedNodeKey {
    let random: String = rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(KEY_RANDOM_LENGTH)
        .map(char::from)
        .collect();

    let plaintext = format!("{KEY_MARKER}{random}");
    let suffix = extract_suffix(&plaintext).to_string();
    let hash = hash_node_key(&plaintext);

    GeneratedNodeKey {
        plaintext,
        suffix,
        hash,
    }
}

// ---------------------------------------------------------------------------
// Hashing and display
// ---------------------------------------------------------------------------

/// Compute the SHA-256 hex digest of a node key.
///
/// Used both at registration (to store the hash) and on every authenticated
/// node call (to look the node up by hash).
pub fn hash_node_key(key: &str) -> String {
    crate::hashing::sha256_hex(key.as_bytes())
}

/// Extract the display suffix from a plaintext key.
pub fn extract_suffix(key: &str) -> &str {
    let start = key.len().saturating_sub(KEY_SUFFIX_LENGTH);
    key.get(start..).unwrap_or(key)
}

/// Render a stored suffix as a masked key, e.g. `fgn_****a1B2`.
pub fn mask_key(suffix: &str) -> String {
    format!("{KEY_MARKER}****{suffix}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
