//! # Field codec
//!
//! Turns a `key=value&key=value` body into a field map. No interpretation
//! happens here; malformed pairs simply do not make it into the result.

use std::borrow::Cow;
use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

/// Decoded request fields, keyed by field name.
pub type Fields = BTreeMap<String, String>;

/// Parses a form body into its fields. Last occurrence of a key wins.
///
/// An entry is kept only when splitting it on `=` leaves exactly a key and a
/// value once trailing empty pieces are dropped. `a=` and `a=b=c` are both
/// discarded; `a=b=` keeps `b`.
pub fn parse_fields(body: &str) -> Fields {
    let mut fields = Fields::new();

    for entry in body.split('&') {
        let mut parts: Vec<&str> = entry.split('=').collect();
        while parts.last().is_some_and(|part| part.is_empty()) {
            parts.pop();
        }

        if let [key, value] = parts.as_slice() {
            fields.insert(decode_component(key), decode_component(value));
        }
    }

    fields
}

/// Form-style percent decoding: `+` is a space, invalid UTF-8 is replaced.
pub fn decode_component(raw: &str) -> String {
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };

    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
