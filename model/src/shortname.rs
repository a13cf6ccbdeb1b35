//! Expansion of compact cluster identifiers (`cluster01produseast1`) into
//! canonical dashed names (`cluster01-prod-useast1`).

use crate::errors::ModelError;
use regex::Regex;
use std::sync::LazyLock;

static SHORT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z]{2,10}[0-9]{1,5})(sbx|thrash|dev|stage|prod)(.*)$")
        .expect("short name regex is valid")
});

/// Returns the canonical name for a short name.
///
/// Names already in canonical form do not match and are rejected, which
/// makes the rewrite idempotent.
pub fn expand(short_name: &str) -> Result<String, ModelError> {
    let captures = SHORT_NAME_RE
        .captures(short_name)
        .ok_or_else(|| ModelError::NotAShortName(short_name.to_string()))?;
    Ok(format!("{}-{}-{}", &captures[1], &captures[2], &captures[3]))
}
