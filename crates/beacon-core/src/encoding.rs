//! Query-string value encoding shared by request builders and the worker.

use url::form_urlencoded;

/// Percent-encodes a value for inclusion in an `application/x-www-form-urlencoded`
/// query string. Spaces become `+`.
pub fn encode_component(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Looks up the first value for `name` in an encoded query string.
pub fn query_value(query: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
