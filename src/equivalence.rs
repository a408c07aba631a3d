/// Groups of encoding labels that decode the printable range the same way
/// and get swapped for each other by editors. Entries are stored normalized.
pub const EQUIVALENCE_CLASSES: &[&[&str]] = &[
    &["windows1252", "iso88591", "cp1252", "latin1"],
];

/// Lowercases the label and drops `-` and `_`.
pub fn normalize(label: &str) -> String {
    label
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn class_of(normalized: &str) -> Option<&'static [&'static str]> {
    EQUIVALENCE_CLASSES
        .iter()
        .copied()
        .find(|class| class.contains(&normalized))
}

/// Both sides are normalized before the class lookup, so the result is
/// symmetric and insensitive to case and separators.
pub fn are_equivalent(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);

    if a == b {
        return true;
    }

    match class_of(&a) {
        Some(class) => class.contains(&b.as_str()),
        None => false,
    }
}
