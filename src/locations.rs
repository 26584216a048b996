//! Mapping of Italian cities to their regions, so a bare city name in the
//! search box can narrow results even when geocoding is unavailable.

use crate::specialty::fold;

/// Province capitals and larger municipalities, keyed by folded city name.
const CITY_TO_REGION: &[(&str, &str)] = &[
    // Lombardia
    ("milano", "Lombardia"),
    ("bergamo", "Lombardia"),
    ("brescia", "Lombardia"),
    ("como", "Lombardia"),
    ("cremona", "Lombardia"),
    ("lecco", "Lombardia"),
    ("lodi", "Lombardia"),
    ("mantova", "Lombardia"),
    ("monza", "Lombardia"),
    ("pavia", "Lombardia"),
    ("sondrio", "Lombardia"),
    ("varese", "Lombardia"),
    ("busto arsizio", "Lombardia"),
    ("legnano", "Lombardia"),
    // Lazio
    ("roma", "Lazio"),
    ("frosinone", "Lazio"),
    ("latina", "Lazio"),
    ("rieti", "Lazio"),
    ("viterbo", "Lazio"),
    ("civitavecchia", "Lazio"),
    ("albano laziale", "Lazio"),
    ("fiumicino", "Lazio"),
    // Campania
    ("napoli", "Campania"),
    ("avellino", "Campania"),
    ("benevento", "Campania"),
    ("caserta", "Campania"),
    ("salerno", "Campania"),
    ("pompei", "Campania"),
    ("sorrento", "Campania"),
    // Piemonte
    ("torino", "Piemonte"),
    ("alessandria", "Piemonte"),
    ("asti", "Piemonte"),
    ("biella", "Piemonte"),
    ("cuneo", "Piemonte"),
    ("novara", "Piemonte"),
    ("vercelli", "Piemonte"),
    ("verbania", "Piemonte"),
    // Veneto
    ("venezia", "Veneto"),
    ("belluno", "Veneto"),
    ("padova", "Veneto"),
    ("rovigo", "Veneto"),
    ("treviso", "Veneto"),
    ("verona", "Veneto"),
    ("vicenza", "Veneto"),
    ("mestre", "Veneto"),
    // Emilia-Romagna
    ("bologna", "Emilia-Romagna"),
    ("ferrara", "Emilia-Romagna"),
    ("forli", "Emilia-Romagna"),
    ("cesena", "Emilia-Romagna"),
    ("modena", "Emilia-Romagna"),
    ("parma", "Emilia-Romagna"),
    ("piacenza", "Emilia-Romagna"),
    ("ravenna", "Emilia-Romagna"),
    ("reggio emilia", "Emilia-Romagna"),
    ("rimini", "Emilia-Romagna"),
    // Toscana
    ("firenze", "Toscana"),
    ("arezzo", "Toscana"),
    ("grosseto", "Toscana"),
    ("livorno", "Toscana"),
    ("lucca", "Toscana"),
    ("massa", "Toscana"),
    ("pisa", "Toscana"),
    ("pistoia", "Toscana"),
    ("prato", "Toscana"),
    ("siena", "Toscana"),
    // Puglia
    ("bari", "Puglia"),
    ("barletta", "Puglia"),
    ("brindisi", "Puglia"),
    ("foggia", "Puglia"),
    ("lecce", "Puglia"),
    ("taranto", "Puglia"),
    ("andria", "Puglia"),
    ("trani", "Puglia"),
    // Sicilia
    ("palermo", "Sicilia"),
    ("agrigento", "Sicilia"),
    ("caltanissetta", "Sicilia"),
    ("catania", "Sicilia"),
    ("enna", "Sicilia"),
    ("messina", "Sicilia"),
    ("ragusa", "Sicilia"),
    ("siracusa", "Sicilia"),
    ("trapani", "Sicilia"),
    // Sardegna
    ("cagliari", "Sardegna"),
    ("nuoro", "Sardegna"),
    ("oristano", "Sardegna"),
    ("sassari", "Sardegna"),
    ("olbia", "Sardegna"),
    // Liguria
    ("genova", "Liguria"),
    ("imperia", "Liguria"),
    ("la spezia", "Liguria"),
    ("savona", "Liguria"),
    ("sanremo", "Liguria"),
    // Calabria
    ("catanzaro", "Calabria"),
    ("cosenza", "Calabria"),
    ("crotone", "Calabria"),
    ("reggio calabria", "Calabria"),
    ("vibo valentia", "Calabria"),
    // Marche
    ("ancona", "Marche"),
    ("ascoli piceno", "Marche"),
    ("fermo", "Marche"),
    ("macerata", "Marche"),
    ("pesaro", "Marche"),
    ("urbino", "Marche"),
    // Abruzzo
    ("l'aquila", "Abruzzo"),
    ("chieti", "Abruzzo"),
    ("pescara", "Abruzzo"),
    ("teramo", "Abruzzo"),
    // Umbria
    ("perugia", "Umbria"),
    ("terni", "Umbria"),
    ("foligno", "Umbria"),
    // Friuli-Venezia Giulia
    ("trieste", "Friuli-Venezia Giulia"),
    ("gorizia", "Friuli-Venezia Giulia"),
    ("pordenone", "Friuli-Venezia Giulia"),
    ("udine", "Friuli-Venezia Giulia"),
    // Trentino-Alto Adige
    ("trento", "Trentino"),
    ("rovereto", "Trentino"),
    ("bolzano", "Trentino"),
    ("merano", "Trentino"),
    ("pergine valsugana", "Trentino"),
    ("cavalese", "Trentino"),
    ("cles", "Trentino"),
    // Basilicata
    ("potenza", "Basilicata"),
    ("matera", "Basilicata"),
    // Molise
    ("campobasso", "Molise"),
    ("isernia", "Molise"),
    // Valle d'Aosta
    ("aosta", "Valle d'Aosta"),
];

const STREET_PREFIXES: &[&str] = &["via", "corso", "piazza", "viale", "vicolo", "strada", "largo"];

/// Region for a free-text city reference, if the text is exactly a known city.
pub fn region_for_city(text: &str) -> Option<&'static str> {
    let folded = fold(text);
    CITY_TO_REGION
        .iter()
        .find(|(city, _)| *city == folded)
        .map(|(_, region)| *region)
}

pub fn is_known_city(text: &str) -> bool {
    region_for_city(text).is_some()
}

/// Whether a search query looks like a street address (contains a street
/// type word such as "via" or "piazza").
pub fn is_address_query(text: &str) -> bool {
    let folded = fold(text);
    folded
        .split(' ')
        .any(|word| STREET_PREFIXES.contains(&word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn city_lookup_is_fold_insensitive() {
        assert_eq!(region_for_city("Milano"), Some("Lombardia"));
        assert_eq!(region_for_city("  FORLÌ "), Some("Emilia-Romagna"));
        assert_eq!(region_for_city("Atlantide"), None);
    }

    #[test]
    fn address_detection_requires_whole_words() {
        assert!(is_address_query("Via Roma 12, Milano"));
        assert!(is_address_query("piazza Giulio Cesare 11"));
        assert!(!is_address_query("Ospedale San Paolo"));
        // "viale" inside another word must not trigger
        assert!(!is_address_query("Ospedale Rivialetto"));
    }
}
