/// Normalize a drug name for registry lookup: lowercase, accents folded
/// to their base letter, punctuation dropped, whitespace collapsed.
///
/// Matching on the normalized form is exact. There is deliberately no
/// fuzzy matching: applying the wrong drug's limit is worse than
/// applying none.
pub fn normalize_drug_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = true;

    for ch in name.chars() {
        let ch = fold_accent(ch).to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_space = false;
        } else if ch.is_whitespace() || ch == '-' || ch == '_' || ch == '/' {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        }
        // Other punctuation is dropped entirely
    }

    out.trim_end().to_string()
}

/// Fold the accented characters seen in Spanish-language guideline text.
fn fold_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'ä' | 'â' | 'Á' | 'À' | 'Ä' | 'Â' => 'a',
        'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'Ó' | 'Ò' | 'Ö' | 'Ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => 'u',
        'ñ' | 'Ñ' => 'n',
        'ç' | 'Ç' => 'c',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_trims() {
        assert_eq!(normalize_drug_name("  Metotrexato  "), "metotrexato");
    }

    #[test]
    fn strips_accents() {
        assert_eq!(normalize_drug_name("Ácido Fólico"), "acido folico");
        assert_eq!(normalize_drug_name("Ibuprofén"), "ibuprofen");
    }

    #[test]
    fn drops_punctuation_keeps_separators() {
        assert_eq!(normalize_drug_name("metotrexato (oral)"), "metotrexato oral");
        assert_eq!(normalize_drug_name("trimetoprim/sulfametoxazol"), "trimetoprim sulfametoxazol");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize_drug_name("acido   folico"), "acido folico");
    }

    #[test]
    fn equivalent_spellings_collide() {
        assert_eq!(
            normalize_drug_name("METOTREXATO"),
            normalize_drug_name("metotrexato")
        );
    }
}
