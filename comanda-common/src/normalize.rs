//! Text canonicalization shared by every matcher.
//!
//! Client names, product names and route names are all compared through
//! this one function, so an accent or stray punctuation in an email never
//! splits what the catalog considers a single key.

/// Canonicalize a string for matching: Unicode-uppercase, fold the Spanish
/// accent set to ASCII, drop anything outside `[A-Z0-9 ]`, collapse
/// whitespace runs and trim.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;

    for upper in s.chars().flat_map(|c| c.to_uppercase()) {
        let folded = match upper {
            'Á' => 'A',
            'É' => 'E',
            'Í' => 'I',
            'Ó' => 'O',
            'Ú' | 'Ü' => 'U',
            'Ñ' => 'N',
            'Ç' => 'C',
            other => other,
        };

        match folded {
            'A'..='Z' | '0'..='9' => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(folded);
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            // Punctuation and any other character is dropped outright.
            _ => {}
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uppercases_and_trims() {
        assert_eq!(normalize("  ruta norte  "), "RUTA NORTE");
    }

    #[test]
    fn test_folds_spanish_accents() {
        assert_eq!(normalize("Camión Río"), "CAMION RIO");
        assert_eq!(normalize("señor peña"), "SENOR PENA");
        assert_eq!(normalize("Açaí Güero"), "ACAI GUERO");
    }

    #[test]
    fn test_drops_punctuation_without_spacing() {
        // A dropped character does not become a separator.
        assert_eq!(normalize("coca-kola"), "COCAKOLA");
        assert_eq!(normalize("Super: Uno!"), "SUPER UNO");
    }

    #[test]
    fn test_collapses_whitespace_runs() {
        assert_eq!(normalize("a\t b\n\nc"), "A B C");
    }

    #[test]
    fn test_empty_and_symbol_only() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  ¡¿!?  "), "");
    }

    #[test]
    fn test_stable_across_calls() {
        let once = normalize("Leche Entera 1L");
        assert_eq!(normalize(&once), once);
    }
}
