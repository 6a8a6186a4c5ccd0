use crate::repository::UrlRecord;
use crate::shortcode::ShortCode;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use uuid::Uuid;

/// Number of identifier bytes that make up a short code.
///
/// Six bytes encode to exactly eight base64 characters with no padding.
const SHORT_CODE_BYTES: usize = 6;

/// Derives content-addressed identifiers for original URLs.
///
/// The record identifier is a UUID v5 of the URL bytes in the standard URL
/// namespace, so the same URL always maps to the same identifier and short
/// code. Ownership never feeds into the identity. Uniqueness of short codes
/// is enforced by the storage layer, not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver;

impl KeyDeriver {
    /// Builds the record that shortening `original_url` on behalf of
    /// `owner_id` would create.
    pub fn derive(owner_id: &str, original_url: &str) -> UrlRecord {
        let id = Self::id(original_url);
        UrlRecord {
            id,
            owner_id: owner_id.to_owned(),
            short_code: Self::encode(&id),
            original_url: original_url.to_owned(),
            deleted: false,
        }
    }

    /// Returns the deterministic identifier for `original_url`.
    pub fn id(original_url: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, original_url.as_bytes())
    }

    /// Returns the short code for `original_url`.
    pub fn short_code(original_url: &str) -> ShortCode {
        Self::encode(&Self::id(original_url))
    }

    fn encode(id: &Uuid) -> ShortCode {
        let encoded = URL_SAFE_NO_PAD.encode(&id.as_bytes()[..SHORT_CODE_BYTES]);
        ShortCode::new_unchecked(encoded)
    }
}
