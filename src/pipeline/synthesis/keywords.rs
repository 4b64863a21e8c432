/// Rejection vocabulary scanned for in model justifications. A model may
/// classify a dose as acceptable while its own explanation says
/// otherwise; the explanation wins, toward rejection.
const REJECTION_STEMS: &[&str] = &[
    "contraindic",
    "toxic",
    "tóxic",
    "sobredosis",
    "sobrepasa",
    "supera",
    "excede",
    "exceso",
    "no recomendado",
    "no se recomienda",
    "rechaz",
    "peligros",
    "dangerous",
    "overdose",
    "exceeds",
];

pub fn contains_rejection_language(text: &str) -> bool {
    let lowered = text.to_lowercase();
    REJECTION_STEMS.iter().any(|stem| lowered.contains(stem))
}
