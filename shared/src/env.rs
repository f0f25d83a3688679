//! Process environment access that tolerates non UTF-8 entries.

use std::ffi::OsString;

/// Returns the process environment, skipping variables whose name or value
/// is not valid UTF-8.
pub fn utf8_vars() -> impl Iterator<Item = (String, String)> {
    utf8_pairs(std::env::vars_os())
}

pub fn utf8_pairs(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> impl Iterator<Item = (String, String)> {
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}
