//! Static symptom category table backing the partial-match scoring term.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Symptom token -> category name.
static CATEGORIES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    // Cholera-like / enteric
    for s in ["cholera", "diarrhea", "vomiting", "dehydration", "dysentery"] {
        m.insert(s, "enteric");
    }
    // Respiratory
    for s in ["cough", "pneumonia", "influenza", "shortness_of_breath", "sore_throat"] {
        m.insert(s, "respiratory");
    }
    // Hemorrhagic fevers
    for s in ["ebola", "marburg", "bleeding", "hemorrhage"] {
        m.insert(s, "hemorrhagic");
    }
    // Vector-borne
    for s in ["malaria", "dengue", "chikungunya", "yellow_fever"] {
        m.insert(s, "vector_borne");
    }
    m
});

/// Category for a symptom token, if known.
pub fn category_of(symptom: &str) -> Option<&'static str> {
    CATEGORIES.get(symptom).copied()
}

/// True if two distinct symptom tokens belong to the same category.
pub fn same_category(a: &str, b: &str) -> bool {
    match (category_of(a), category_of(b)) {
        (Some(ca), Some(cb)) => ca == cb,
        _ => false,
    }
}
