//! Product matching against the active catalog: exact first, then a
//! Levenshtein-ratio fuzzy pass with a configurable threshold.

use crate::db::catalogs::ProductCatalog;
use comanda_common::normalize::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Exact,
    Fuzzy,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "EXACT",
            MatchMethod::Fuzzy => "FUZZY",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProductMatch {
    pub product_id: String,
    pub norm_name: String,
    pub family: i64,
    pub method: MatchMethod,
    /// 0.0–1.0
    pub score: f64,
}

/// Levenshtein ratio on the 0–100 scale:
/// `100 × (len_a + len_b − distance) / (len_a + len_b)`.
pub fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 100.0;
    }
    let distance = strsim::levenshtein(a, b);
    100.0 * (total - distance) as f64 / total as f64
}

/// Match a raw product string against the catalog. Ties in the fuzzy pass
/// go to the earliest entry in catalog scan order.
pub fn match_product(
    catalog: &ProductCatalog,
    raw: &str,
    threshold: f64,
) -> Option<ProductMatch> {
    let key = normalize(raw);
    if key.is_empty() {
        return None;
    }

    if let Some(entry) = catalog.find_exact(&key) {
        return Some(ProductMatch {
            product_id: entry.product_id.clone(),
            norm_name: entry.norm_name.clone(),
            family: entry.family,
            method: MatchMethod::Exact,
            score: 1.0,
        });
    }

    let mut best: Option<(f64, &crate::db::catalogs::ProductEntry)> = None;
    for entry in &catalog.entries {
        let ratio = levenshtein_ratio(&key, &entry.norm_name);
        if best.map_or(true, |(best_ratio, _)| ratio > best_ratio) {
            best = Some((ratio, entry));
        }
    }

    match best {
        Some((ratio, entry)) if ratio >= threshold => Some(ProductMatch {
            product_id: entry.product_id.clone(),
            norm_name: entry.norm_name.clone(),
            family: entry.family,
            method: MatchMethod::Fuzzy,
            score: ratio / 100.0,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalogs::ProductEntry;

    fn catalog(entries: &[(&str, &str, i64)]) -> ProductCatalog {
        let mut entries: Vec<ProductEntry> = entries
            .iter()
            .map(|(id, name, family)| ProductEntry {
                product_id: id.to_string(),
                norm_name: name.to_string(),
                family: *family,
            })
            .collect();
        entries.sort_by(|a, b| a.norm_name.cmp(&b.norm_name));
        ProductCatalog { version: 1, entries }
    }

    #[test]
    fn test_exact_match() {
        let cat = catalog(&[("p1", "LECHE", 1)]);
        let m = match_product(&cat, "Leche", 80.0).expect("match");
        assert_eq!(m.method, MatchMethod::Exact);
        assert_eq!(m.family, 1);
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn test_fuzzy_match_above_threshold() {
        let cat = catalog(&[("p1", "COCA COLA", 3)]);
        let m = match_product(&cat, "coca-kola", 80.0).expect("fuzzy match");
        assert_eq!(m.method, MatchMethod::Fuzzy);
        assert!(m.score >= 0.80 && m.score < 1.0, "score was {}", m.score);
    }

    #[test]
    fn test_no_match_below_threshold() {
        let cat = catalog(&[("p1", "COCA COLA", 3)]);
        assert!(match_product(&cat, "xyzzy", 80.0).is_none());
    }

    #[test]
    fn test_empty_key_and_empty_catalog() {
        let cat = catalog(&[("p1", "LECHE", 1)]);
        assert!(match_product(&cat, "  ¡!  ", 80.0).is_none());

        let empty = catalog(&[]);
        assert!(match_product(&empty, "Leche", 80.0).is_none());
    }

    #[test]
    fn test_fuzzy_tie_goes_to_scan_order() {
        // Both entries are one edit away from the key; the alphabetically
        // earlier entry wins because the scan keeps the first best.
        let cat = catalog(&[("a", "PANA", 2), ("b", "PANO", 4)]);
        let m = match_product(&cat, "PANE", 50.0).expect("match");
        assert_eq!(m.product_id, "a");
    }

    #[test]
    fn test_ratio_formula() {
        // d("COCAKOLA", "COCA COLA") = 2, total length 17.
        let ratio = levenshtein_ratio("COCAKOLA", "COCA COLA");
        assert!((ratio - 100.0 * 15.0 / 17.0).abs() < 1e-9);
        assert_eq!(levenshtein_ratio("", ""), 100.0);
        assert_eq!(levenshtein_ratio("ABC", "ABC"), 100.0);
    }

    #[test]
    fn test_threshold_override() {
        let cat = catalog(&[("p1", "COCA COLA", 3)]);
        // 88.2 fails a 95 threshold.
        assert!(match_product(&cat, "coca-kola", 95.0).is_none());
    }
}
