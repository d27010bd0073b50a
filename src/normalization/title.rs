use strsim::jaro_winkler;

/// Minimum Jaro-Winkler similarity for two person names to be treated as the same person.
pub const MIN_NAME_SIMILARITY: f64 = 0.92;

/// Case-insensitive comparison key for film titles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TitleKey(String);

impl TitleKey {
    /// Build a key from a raw title.
    ///
    /// Normalization steps:
    /// - trim and lowercase (unicode-aware)
    /// - fold typographic quotes and dashes to ASCII
    /// - collapse runs of whitespace
    pub fn new(raw: &str) -> Self {
        Self(fold(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Whether two credited names refer to the same person.
///
/// Accepts containment either way ("Eggers" vs "Robert Eggers") and
/// near-identical spellings ("Bong Joon Ho" vs "Bong Joon-ho").
pub fn names_match(a: &str, b: &str) -> bool {
    let a = fold(a);
    let b = fold(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(&b) || b.contains(&a) {
        return true;
    }
    let strip = |s: &str| -> String { s.chars().filter(|c| c.is_alphanumeric()).collect() };
    jaro_winkler(&strip(&a), &strip(&b)) >= MIN_NAME_SIMILARITY
}

fn fold(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    for word in lowered.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        for c in word.chars() {
            out.push(match c {
                '\u{2018}' | '\u{2019}' | '\u{02BC}' => '\'',
                '\u{201C}' | '\u{201D}' => '"',
                '\u{2013}' | '\u{2014}' => '-',
                other => other,
            });
        }
    }
    out
}
