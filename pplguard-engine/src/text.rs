use unicode_normalization::UnicodeNormalization;

/// Apply NFKC normalization to text.
///
/// Folds compatibility characters before tokenization so that visually
/// identical inputs get identical token ids:
/// - Full-width ASCII → Half-width: `（` → `(`, `！` → `!`
/// - Full-width digits → Half-width: `０` → `0`
/// - Ligatures and other compatibility forms → canonical forms
pub fn normalize_nfkc(text: &str) -> String {
    text.nfkc().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_nfkc() {
        assert_eq!(normalize_nfkc("ＡＢＣ１２３"), "ABC123");
        assert_eq!(normalize_nfkc("（！）"), "(!)");
        assert_eq!(normalize_nfkc("ﬁne"), "fine");
        // Plain ASCII passes through unchanged
        assert_eq!(normalize_nfkc("a a a a"), "a a a a");
        assert_eq!(normalize_nfkc(""), "");
    }
}
