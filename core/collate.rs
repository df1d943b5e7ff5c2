use std::cmp::Ordering;

/// Predefined collation sequences.
///
/// Collating functions only matter when comparing text values. Numeric
/// values are always compared numerically and blobs byte-by-byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollationSeq {
    #[default]
    Binary,
    NoCase,
    Rtrim,
}

impl CollationSeq {
    pub fn new(name: &str) -> crate::Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "binary" => Ok(CollationSeq::Binary),
            "nocase" => Ok(CollationSeq::NoCase),
            "rtrim" => Ok(CollationSeq::Rtrim),
            _ => Err(crate::error::VellumError::ConversionError(format!(
                "no such collation sequence: {}",
                name
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CollationSeq::Binary => "BINARY",
            CollationSeq::NoCase => "NOCASE",
            CollationSeq::Rtrim => "RTRIM",
        }
    }

    pub fn compare_strings(&self, lhs: &str, rhs: &str) -> Ordering {
        match self {
            CollationSeq::Binary => lhs.cmp(rhs),
            CollationSeq::NoCase => Self::nocase_cmp(lhs, rhs),
            CollationSeq::Rtrim => Self::rtrim_cmp(lhs, rhs),
        }
    }

    // ASCII-only case folding, same as the built-in NOCASE of the on-disk
    // format this engine is compatible with.
    fn nocase_cmp(lhs: &str, rhs: &str) -> Ordering {
        let l = lhs.bytes().map(|b| b.to_ascii_lowercase());
        let r = rhs.bytes().map(|b| b.to_ascii_lowercase());
        l.cmp(r)
    }

    fn rtrim_cmp(lhs: &str, rhs: &str) -> Ordering {
        lhs.trim_end_matches(' ').cmp(rhs.trim_end_matches(' '))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_is_case_sensitive() {
        assert_eq!(
            CollationSeq::Binary.compare_strings("abc", "ABC"),
            Ordering::Greater
        );
        assert_eq!(
            CollationSeq::NoCase.compare_strings("abc", "ABC"),
            Ordering::Equal
        );
    }

    #[test]
    fn test_rtrim_ignores_trailing_spaces() {
        assert_eq!(
            CollationSeq::Rtrim.compare_strings("abc   ", "abc"),
            Ordering::Equal
        );
        assert_eq!(
            CollationSeq::Rtrim.compare_strings("abc  d", "abc"),
            Ordering::Greater
        );
    }

    #[test]
    fn test_unknown_collation_is_an_error() {
        assert!(CollationSeq::new("klingon").is_err());
        assert_eq!(CollationSeq::new("NOCASE").unwrap(), CollationSeq::NoCase);
    }
}
