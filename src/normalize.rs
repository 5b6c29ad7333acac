// 🔤 Name Normalization - Rules applied BEFORE fuzzy matching
// The survey sheet and the invoice ledger spell park names differently
// ("Kızılırmak Parkı" vs "KIZILIRMAK PARK"). Folding case and stripping
// Turkish diacritics first leaves less work for the similarity threshold.

/// Owner text prepended to every subscriber name in the municipal ledger.
pub const DEFAULT_OWNER_PREFIX: &str = "ÇANKAYA BELEDİYESİ";

// ============================================================================
// CHARACTER FOLDING
// ============================================================================

/// Turkish-aware lowercase for a single char.
/// `I` lowercases to dotless `ı` and `İ` to `i` (std would give `i` and `i̇`).
fn turkish_lower_char(c: char, out: &mut String) {
    match c {
        'I' => out.push('ı'),
        'İ' => out.push('i'),
        _ => out.extend(c.to_lowercase()),
    }
}

/// Strip the diacritics that show up in Turkish park names.
fn strip_diacritic(c: char) -> char {
    match c {
        'ç' => 'c',
        'ğ' => 'g',
        'ı' => 'i',
        'ö' => 'o',
        'ş' => 's',
        'ü' => 'u',
        'â' => 'a',
        'î' => 'i',
        'û' => 'u',
        _ => c,
    }
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Canonical matching form of a park name.
///
/// Hyphens become spaces, case is folded the Turkish way, diacritics are
/// stripped and runs of whitespace collapse to one space.
///
/// ```
/// use park_water::normalize::normalize_name;
/// assert_eq!(normalize_name("Kızılırmak  Parkı"), "kizilirmak parki");
/// assert_eq!(normalize_name("KIZILIRMAK-PARK"), "kizilirmak park");
/// ```
pub fn normalize_name(name: &str) -> String {
    let mut lowered = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '-' {
            lowered.push(' ');
        } else {
            turkish_lower_char(c, &mut lowered);
        }
    }

    let folded: String = lowered
        .chars()
        // combining dot above, left behind by some decomposed inputs
        .filter(|c| *c != '\u{0307}')
        .map(strip_diacritic)
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turkish-aware uppercase (`i` → `İ`, `ı` → `I`).
pub fn turkish_upper(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            'i' => out.push('İ'),
            'ı' => out.push('I'),
            _ => out.extend(c.to_uppercase()),
        }
    }
    out
}

/// Remove the owner prefix from a ledger subscriber name and trim.
/// The prefix may appear anywhere in the string; every occurrence is removed.
pub fn strip_owner_prefix(name: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return name.trim().to_string();
    }
    name.replace(prefix, "").trim().to_string()
}

// ============================================================================
// TESTS
// ============================================================================
