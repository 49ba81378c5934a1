//! Cache key namespacing.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::cache::CacheVariant;
use crate::routing::normalizer::DATA_PREFIX;

/// `{build_id}:{variant}:{key}`.
pub fn namespaced(build_id: &str, variant: CacheVariant, key: &str) -> String {
    format!("{}:{}:{}", build_id, variant, key)
}

/// File name for `key` that is safe on any filesystem.
pub fn file_name(key: &str) -> String {
    format!("{}.json", URL_SAFE_NO_PAD.encode(key.as_bytes()))
}

/// Cache key of a rendered page. Data requests key on their original
/// `/_next/data/{build_id}/...json` form so a revalidation of the key
/// re-enters the same route.
pub fn page_key(build_id: &str, path: &str, is_data: bool) -> String {
    if !is_data {
        return path.to_string();
    }
    let page = if path == "/" { "/index" } else { path };
    format!("{}/{}{}.json", DATA_PREFIX, build_id, page)
}
