#![deny(clippy::unwrap_used)]

use refinery::embed_migrations;
use serde::Deserialize;

pub mod control;
pub mod coupon;
pub mod imports;
pub mod merchant;
pub mod sheet;
pub mod slug;
pub mod tag;
pub mod tag_store;

embed_migrations!("./migrations");

/// Spreadsheet producers spell booleans many ways. `1`, `true`, `yes`
/// and `y` are accepted case-insensitively; everything else is false.
pub fn parse_boolean(input: &str) -> bool {
    matches!(
        input.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

/// Dashboard filter dropdowns send `""` or `"all"` for "no filter";
/// treat both as absent instead of failing deserialization.
pub fn empty_string_as_none_parse<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    let opt = Option::<String>::deserialize(de)?;
    match opt.as_deref() {
        None | Some("") | Some("all") => Ok(None),
        Some(s) => s
            .parse()
            .map_err(|err| serde::de::Error::custom(format!("{err:?}")))
            .map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_true_spellings() {
        for value in ["1", "true", "TRUE", "Yes", "y", " Y "] {
            assert!(parse_boolean(value), "{value:?} should be true");
        }
    }

    #[test]
    fn rejects_everything_else() {
        for value in ["", "0", "no", "false", "on", "enabled"] {
            assert!(!parse_boolean(value), "{value:?} should be false");
        }
    }
}
