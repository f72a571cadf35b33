use crate::error::{ErrorKind, Result};
use exn::ResultExt;

/// Splice `"_key": <name>` in as the first member of a raw JSON object.
///
/// The rest of the object is copied byte for byte, so whatever formatting the
/// upstream document used survives. Consumers read `_key` back to learn which
/// package a record belongs to without tracking it separately.
///
/// # Errors
///
/// Returns [`InvalidRecord`](ErrorKind::InvalidRecord) when `raw` is not a
/// JSON object.
///
/// # Examples
///
/// ```
/// let record = pkgdex_store::inject_key("hello", br#"{ "version": "2.12" }"#).unwrap();
/// assert_eq!(record, br#"{"_key":"hello", "version": "2.12" }"#);
/// ```
pub fn inject_key(name: &str, raw: &[u8]) -> Result<Vec<u8>> {
    let raw = raw.trim_ascii_start();
    let Some((b'{', rest)) = raw.split_first() else {
        exn::bail!(ErrorKind::InvalidRecord(name.to_string()));
    };
    let mut record = Vec::with_capacity(raw.len() + name.len() + 12);
    record.extend_from_slice(br#"{"_key":"#);
    serde_json::to_writer(&mut record, name).or_raise(|| ErrorKind::InvalidRecord(name.to_string()))?;
    // `{}` has no members to separate from.
    if rest.trim_ascii_start().first() != Some(&b'}') {
        record.push(b',');
    }
    record.extend_from_slice(rest);
    Ok(record)
}
