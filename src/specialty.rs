//! Specialty name handling: canonicalization of raw source labels, the
//! macro-category synonym table used by the search dropdown, and a bounded
//! fuzzy fallback for free-text terms.

use strsim::jaro_winkler;

/// Minimum Jaro-Winkler similarity for a free-text term to be accepted as a
/// near-miss spelling of a known specialty.
const FUZZY_THRESHOLD: f64 = 0.88;

/// Raw source labels are matched by folded substring against these keys, in
/// order. First hit wins; keys for the same canonical name are adjacent so
/// order only matters across distinct targets.
const NORMALIZATION: &[(&str, &str)] = &[
    ("cardiologia", "Cardiologia"),
    ("cardiolog", "Cardiologia"),
    ("cardio", "Cardiologia"),
    ("traumatologia", "Ortopedia e Traumatologia"),
    ("ortopedia", "Ortopedia"),
    ("ortoped", "Ortopedia"),
    ("pediatria", "Pediatria"),
    ("pediatr", "Pediatria"),
    ("neonatologia", "Neonatologia"),
    ("medicina generale", "Medicina Generale"),
    ("medicina interna", "Medicina Interna"),
    ("geriatria", "Geriatria"),
    ("ginecologia", "Ginecologia e Ostetricia"),
    ("ostetricia", "Ginecologia e Ostetricia"),
    ("ginecolog", "Ginecologia e Ostetricia"),
    ("ostetric", "Ginecologia e Ostetricia"),
    ("neurologia", "Neurologia"),
    ("neurolog", "Neurologia"),
    ("psichiatria", "Psichiatria"),
    ("psichiatr", "Psichiatria"),
    ("dermatologia", "Dermatologia"),
    ("dermatolog", "Dermatologia"),
    ("oculistica", "Oculistica"),
    ("oftalmolog", "Oculistica"),
    ("oculist", "Oculistica"),
    ("otorinolaringoiatria", "Otorinolaringoiatria"),
    ("otorino", "Otorinolaringoiatria"),
    ("urologia", "Urologia"),
    ("urolog", "Urologia"),
    ("oncologia", "Oncologia"),
    ("oncolog", "Oncologia"),
    ("radioterapia", "Radioterapia"),
    ("radiologia", "Radiologia"),
    ("radiolog", "Radiologia"),
    ("diagnostica", "Diagnostica per Immagini"),
    ("laboratorio", "Analisi Cliniche"),
    ("analisi", "Analisi Cliniche"),
    ("pronto soccorso", "Pronto Soccorso"),
    ("emergenza", "Pronto Soccorso"),
    ("ambulatorio", "Ambulatorio"),
    ("fisioterapia", "Fisioterapia"),
    ("fisioter", "Fisioterapia"),
    ("riabilitazione", "Riabilitazione"),
    ("riabilit", "Riabilitazione"),
    ("chirurgia generale", "Chirurgia Generale"),
    ("chirurgia", "Chirurgia"),
];

/// Search-dropdown macro-categories. A facility matches a category when it
/// has a rating in ANY of the listed canonical names.
const SYNONYMS: &[(&str, &[&str])] = &[
    (
        "Allergologia",
        &["Allergologia", "Medicina Interna", "Pneumologia", "Dermatologia", "Immunologia"],
    ),
    (
        "Cardiologia",
        &["Cardiologia", "Medicina Interna", "Chirurgia Cardiaca", "Medicina Generale"],
    ),
    (
        "Chirurgia",
        &[
            "Chirurgia",
            "Chirurgia Generale",
            "Ortopedia e Traumatologia",
            "Chirurgia Plastica",
            "Chirurgia Vascolare",
            "Chirurgia Toracica",
            "Chirurgia Pediatrica",
        ],
    ),
    (
        "Dermatologia",
        &["Dermatologia", "Medicina Interna", "Medicina Estetica", "Allergologia"],
    ),
    (
        "Diagnostica",
        &["Diagnostica per Immagini", "Radiologia", "Medicina Nucleare", "Ecografia", "Analisi Cliniche"],
    ),
    (
        "Ematologia",
        &["Ematologia", "Oncologia", "Medicina Interna", "Immunologia"],
    ),
    (
        "Endocrinologia",
        &["Endocrinologia", "Medicina Interna", "Diabetologia", "Medicina Generale"],
    ),
    (
        "Fertilità",
        &["Fertilità", "Ginecologia e Ostetricia", "Urologia", "Andrologia"],
    ),
    (
        "Gastroenterologia",
        &["Gastroenterologia", "Medicina Interna", "Epatologia", "Chirurgia Generale", "Medicina Generale"],
    ),
    (
        "Ginecologia",
        &["Ginecologia e Ostetricia", "Ostetricia", "Senologia"],
    ),
    (
        "Malattie Infettive",
        &["Malattie Infettive", "Virologia", "Medicina Tropicale", "Medicina Interna", "Medicina Generale"],
    ),
    (
        "Medicina Interna",
        &["Medicina Interna", "Medicina Generale", "Geriatria"],
    ),
    (
        "Medicina d'Urgenza",
        &["Pronto Soccorso", "Medicina d'Urgenza", "Rianimazione", "Terapia Intensiva"],
    ),
    (
        "Medicina dello Sport",
        &["Medicina dello Sport", "Ortopedia", "Fisioterapia", "Riabilitazione"],
    ),
    (
        "Medicina Generale",
        &["Medicina Generale", "Medicina Interna", "Medicina di Base"],
    ),
    (
        "Neurologia",
        &["Neurologia", "Neurochirurgia", "Medicina Interna", "Neurofisiologia"],
    ),
    ("Oculistica", &["Oculistica", "Chirurgia Oculistica"]),
    (
        "Oncologia",
        &["Oncologia", "Ematologia", "Radioterapia", "Chemioterapia", "Chirurgia Oncologica"],
    ),
    (
        "Ortopedia",
        &["Ortopedia", "Ortopedia e Traumatologia", "Fisioterapia", "Riabilitazione"],
    ),
    (
        "Otorinolaringoiatria",
        &["Otorinolaringoiatria", "Audiologia", "Foniatria"],
    ),
    (
        "Pediatria",
        &["Pediatria", "Neonatologia", "Chirurgia Pediatrica", "Neuropsichiatria Infantile"],
    ),
    (
        "Pneumologia",
        &["Pneumologia", "Medicina Interna", "Chirurgia Toracica", "Medicina Generale"],
    ),
    (
        "Psichiatria",
        &["Psichiatria", "Psicologia", "Neurologia", "Neuropsichiatria"],
    ),
    (
        "Radiologia",
        &["Radiologia", "Diagnostica per Immagini", "Medicina Nucleare", "Radioterapia"],
    ),
    (
        "Reumatologia",
        &["Reumatologia", "Medicina Interna", "Ortopedia", "Immunologia", "Medicina Generale"],
    ),
    (
        "Riabilitazione",
        &["Riabilitazione", "Fisioterapia", "Medicina dello Sport", "Ortopedia", "Neurologia"],
    ),
    (
        "Urologia",
        &["Urologia", "Chirurgia Generale", "Andrologia", "Nefrologia"],
    ),
];

/// Lowercase, fold Italian diacritics to ASCII, and collapse whitespace.
/// This is the lookup key space for all specialty/city/region matching.
pub fn fold(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for ch in s.trim().chars() {
        let ch = ch.to_lowercase().next().unwrap_or(ch);
        let ch = match ch {
            'à' | 'á' | 'â' | 'ä' => 'a',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'ò' | 'ó' | 'ô' | 'ö' => 'o',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            _ => ch,
        };
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Canonical name for a label the normalization table recognizes; None for
/// anything else. Used to decide whether a CSV header is a rating column.
pub fn canonical_if_known(raw: &str) -> Option<String> {
    let folded = fold(raw);
    if folded.is_empty() {
        return None;
    }
    NORMALIZATION
        .iter()
        .find(|(key, _)| folded.contains(key))
        .map(|(_, canonical)| (*canonical).to_string())
}

/// Map a raw source label to its canonical specialty name. Unknown labels
/// keep their own spelling, capitalized. Empty input maps to None.
pub fn canonicalize(raw: &str) -> Option<String> {
    let folded = fold(raw);
    if folded.is_empty() {
        return None;
    }
    for (key, canonical) in NORMALIZATION {
        if folded.contains(key) {
            return Some((*canonical).to_string());
        }
    }
    Some(capitalize(raw.trim()))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Split a source cell like "Cardiologia, Pediatria / Oncologia" into
/// deduplicated canonical specialty names.
pub fn split_cell(cell: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in cell.split(|c| matches!(c, ',' | ';' | '/' | '|')) {
        if let Some(name) = canonicalize(part) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    out
}

/// Result of resolving a user-supplied specialty term against the store's
/// specialty dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecialtyMatch {
    /// One or more canonical names to search, from the synonym table or an
    /// exact/fuzzy dictionary hit.
    Names(Vec<String>),
    /// The term matched nothing; distinct from "zero facilities found".
    None,
}

/// Resolve a free-text specialty term. The deterministic synonym table is
/// authoritative; the fuzzy pass only recovers near-miss spellings of names
/// already in `known`.
pub fn resolve_term(term: &str, known: &[String]) -> SpecialtyMatch {
    let folded = fold(term);
    if folded.is_empty() {
        return SpecialtyMatch::None;
    }

    for (category, names) in SYNONYMS {
        if fold(category) == folded {
            return SpecialtyMatch::Names(names.iter().map(|s| s.to_string()).collect());
        }
    }

    for name in known {
        if fold(name) == folded {
            return SpecialtyMatch::Names(vec![name.clone()]);
        }
    }

    let mut best: Option<(&String, f64)> = None;
    for name in known {
        let score = jaro_winkler(&folded, &fold(name));
        if score >= FUZZY_THRESHOLD && best.map(|(_, b)| score > b).unwrap_or(true) {
            best = Some((name, score));
        }
    }
    match best {
        Some((name, _)) => SpecialtyMatch::Names(vec![name.clone()]),
        None => SpecialtyMatch::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_strips_accents_and_case() {
        assert_eq!(fold("  Specialità  Médica "), "specialita medica");
        assert_eq!(fold("FISIOTERAPIA"), "fisioterapia");
    }

    #[test]
    fn canonicalize_maps_partial_labels() {
        assert_eq!(canonicalize("cardiolog."), Some("Cardiologia".into()));
        assert_eq!(canonicalize("Oftalmologia"), Some("Oculistica".into()));
        assert_eq!(
            canonicalize("ginecologia e ostetricia"),
            Some("Ginecologia e Ostetricia".into())
        );
        // unknown labels keep their own spelling
        assert_eq!(canonicalize("PODOLOGIA"), Some("Podologia".into()));
        assert_eq!(canonicalize("   "), None);
    }

    #[test]
    fn split_cell_dedups_canonical_names() {
        let names = split_cell("Cardiologia, cardio / Pediatria; Oncologia");
        assert_eq!(names, vec!["Cardiologia", "Pediatria", "Oncologia"]);
    }

    #[test]
    fn resolve_prefers_synonym_table() {
        let known = vec!["Cardiologia".to_string(), "Pediatria".to_string()];
        match resolve_term("Cardiologia", &known) {
            SpecialtyMatch::Names(names) => {
                assert!(names.contains(&"Cardiologia".to_string()));
                assert!(names.contains(&"Medicina Interna".to_string()));
            }
            SpecialtyMatch::None => panic!("expected names"),
        }
    }

    #[test]
    fn resolve_falls_back_to_fuzzy() {
        let known = vec!["Gastroenterologia".to_string(), "Pediatria".to_string()];
        assert_eq!(
            resolve_term("Gastroenterologgia", &known),
            SpecialtyMatch::Names(vec!["Gastroenterologia".to_string()])
        );
        assert_eq!(resolve_term("xyzzy", &known), SpecialtyMatch::None);
    }
}
