//! Text normalization used by the rule engine and the pause vocabulary.
//!
//! Normalization is casefold + diacritic strip + trim, and is idempotent:
//! `normalize(normalize(s)) == normalize(s)`.

/// Normalize a message for keyword comparison.
///
/// Handles both precomposed accents (via the fold table) and decomposed
/// input, whose combining marks are dropped outright.
pub fn normalize(input: &str) -> String {
    input
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_diacritic)
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036f}')
}

/// Fold a lowercase Latin character to its unaccented form.
///
/// Covers the accented characters that occur in Portuguese and Spanish chat
/// text; anything else passes through unchanged.
fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casefolds_and_trims() {
        assert_eq!(normalize("  OI, Tudo Bem?  "), "oi, tudo bem?");
    }

    #[test]
    fn strips_diacritics() {
        assert_eq!(normalize("Opções"), "opcoes");
        assert_eq!(normalize("PREÇO à vista"), "preco a vista");
    }

    #[test]
    fn idempotent() {
        for s in ["  Ação  ", "MENU", "início", "já normalizado", ""] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn decomposed_accents_match_precomposed() {
        // "ação" written with combining marks instead of precomposed chars.
        assert_eq!(normalize("ac\u{327}a\u{303}o"), "acao");
        assert_eq!(normalize("ac\u{327}a\u{303}o"), normalize("ação"));
        assert_eq!(normalize("pre\u{301}co"), "preco");
    }

    #[test]
    fn uppercase_accents_fold_too() {
        // `to_lowercase` runs before the fold, so uppercase accented
        // characters land in the same bucket.
        assert_eq!(normalize("ÍNICIO"), normalize("ínicio"));
        assert_eq!(normalize("Ção"), "cao");
    }
}
