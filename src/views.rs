//! Server-rendered pages. Plain HTML assembled with format!; styling and map
//! behavior stay client-side and minimal.

use crate::search::{SearchOutcome, SearchRequest};
use crate::sources::SOURCES;
use crate::store::StoreStats;

pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="it">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title} - FindMyCure Italia</title>
</head>
<body>
<header>
  <h1><a href="/">FindMyCure Italia</a></h1>
  <nav>
    <a href="/">Ricerca</a> |
    <a href="/heatmap">Mappa</a> |
    <a href="/methodology">Metodologia</a>
  </nav>
</header>
<main>
{body}
</main>
</body>
</html>
"#,
        title = escape(title),
        body = body
    )
}

pub fn format_quality(score: Option<f64>) -> String {
    match score {
        Some(q) => format!("{q:.1}/5.0"),
        None => "dati insufficienti".to_string(),
    }
}

pub fn index_page(regions: &[String], specialties: &[String]) -> String {
    let mut region_options = String::from(r#"<option value="">Tutte le regioni</option>"#);
    for r in regions {
        let r = escape(r);
        region_options.push_str(&format!(r#"<option value="{r}">{r}</option>"#));
    }
    let mut specialty_options = String::from(r#"<option value="">Tutte le specialità</option>"#);
    for s in specialties {
        let s = escape(s);
        specialty_options.push_str(&format!(r#"<option value="{s}">{s}</option>"#));
    }

    let body = format!(
        r#"<h2>Cerca strutture sanitarie</h2>
<form action="/search" method="get">
  <label>Località o nome struttura
    <input type="text" name="q" placeholder="es. Milano, via Roma 12, Policlinico">
  </label>
  <label>Specialità
    <select name="specialty">{specialty_options}</select>
  </label>
  <label>Regione
    <select name="region">{region_options}</select>
  </label>
  <label>Qualità minima
    <input type="number" name="min_quality" min="1" max="5" step="0.1">
  </label>
  <label>Raggio (km)
    <input type="number" name="radius_km" min="5" max="300" value="30">
  </label>
  <label>Ordina per
    <select name="sort">
      <option value="quality_desc">Qualità (decrescente)</option>
      <option value="quality_asc">Qualità (crescente)</option>
      <option value="name_asc">Nome (A-Z)</option>
      <option value="name_desc">Nome (Z-A)</option>
      <option value="city_asc">Città (A-Z)</option>
      <option value="city_desc">Città (Z-A)</option>
    </select>
  </label>
  <button type="submit">Cerca</button>
</form>
"#
    );
    page("Ricerca", &body)
}

pub fn results_page(req: &SearchRequest, outcome: &SearchOutcome) -> String {
    let mut body = String::from("<h2>Risultati</h2>\n");

    if outcome.specialty_matched == Some(false) {
        let term = req.specialty.as_deref().unwrap_or("");
        body.push_str(&format!(
            "<p><strong>Nessuna specialità corrisponde a \"{}\".</strong> \
             Prova con un termine diverso.</p>",
            escape(term)
        ));
        return page("Risultati", &body);
    }

    if outcome.location_resolved == Some(false) {
        body.push_str(
            "<p><em>La località indicata non è stata riconosciuta; \
             i risultati non sono filtrati per distanza.</em></p>",
        );
    }

    if outcome.no_results_in_range {
        let radius = outcome.radius_km.unwrap_or(0.0);
        body.push_str(&format!(
            "<p><strong>Nessuna struttura entro {radius:.0} km dalla località indicata.</strong> \
             Allarga il raggio di ricerca o rimuovi i filtri.</p>"
        ));
        return page("Risultati", &body);
    }

    if outcome.facilities.is_empty() {
        body.push_str("<p>Nessuna struttura corrisponde ai criteri di ricerca.</p>");
        return page("Risultati", &body);
    }

    let shown = outcome.facilities.len();
    let total = outcome.total_matching;
    if total > shown {
        body.push_str(&format!(
            "<p>{shown} risultati mostrati su {total} corrispondenti.</p>"
        ));
    } else {
        body.push_str(&format!("<p>{shown} risultati.</p>"));
    }

    let geo_active = outcome.origin_latitude.is_some();
    body.push_str("<table border=\"1\">\n<tr><th>Struttura</th><th>Città</th><th>Regione</th><th>Tipo</th><th>Qualità</th>");
    if geo_active {
        body.push_str("<th>Distanza</th>");
    }
    body.push_str("</tr>\n");

    for hit in &outcome.facilities {
        let f = &hit.facility;
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td>",
            escape(&f.name),
            escape(&f.city),
            escape(f.region.as_deref().unwrap_or("-")),
            escape(f.facility_type.as_deref().unwrap_or("-")),
            format_quality(f.quality_score),
        ));
        if geo_active {
            match hit.distance_km {
                Some(d) => body.push_str(&format!("<td>{d:.1} km</td>")),
                None => body.push_str("<td>-</td>"),
            }
        }
        body.push_str("</tr>\n");
    }
    body.push_str("</table>\n");

    page("Risultati", &body)
}

/// Leaflet host page; the map pulls its points from /api/facilities.
pub fn heatmap_page() -> String {
    let body = r#"<h2>Densità delle strutture</h2>
<div id="map" style="height: 600px;"></div>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<script>
const map = L.map('map').setView([42.5, 12.5], 6);
L.tileLayer('https://tile.openstreetmap.org/{z}/{x}/{y}.png', {
  attribution: '&copy; OpenStreetMap contributors'
}).addTo(map);
fetch('/api/facilities')
  .then(r => r.json())
  .then(data => {
    for (const f of data.facilities) {
      const quality = f.quality_rating == null ? 'dati insufficienti'
        : f.quality_rating.toFixed(1) + '/5.0';
      L.circleMarker([f.latitude, f.longitude], { radius: 6 })
        .bindPopup(`<b>${f.name}</b><br>${f.city}<br>Qualità: ${quality}`)
        .addTo(map);
    }
  });
</script>
"#;
    page("Mappa", body)
}

pub fn methodology_page(stats: &StoreStats) -> String {
    let mut sources_html = String::from("<ul>\n");
    for s in SOURCES {
        sources_html.push_str(&format!(
            "<li><strong>{}</strong>: {}</li>\n",
            escape(s.region_name),
            escape(s.attribution)
        ));
    }
    sources_html.push_str("</ul>\n");

    let body = format!(
        r#"<h2>Metodologia</h2>
<p>Le strutture provengono dai portali open data regionali e vengono
aggiornate per lotti. Ogni struttura può avere un punteggio di qualità per
specialità, su una scala da 1.0 a 5.0.</p>
<p>Il punteggio complessivo di una struttura è la media dei punteggi delle
sue specialità, ricalcolata a ogni aggiornamento. Le strutture senza alcun
punteggio sono indicate come "dati insufficienti" e non vengono mai
conteggiate come punteggio zero.</p>
<p>Le coordinate geografiche sono ottenute dal servizio Nominatim di
OpenStreetMap. Le ricerche per distanza usano la distanza in linea d'aria
(grande cerchio) dal punto indicato.</p>
<h3>Fonti dei dati</h3>
{sources_html}
<h3>Stato del database</h3>
<ul>
<li>Strutture: {facilities}</li>
<li>Regioni: {regions}</li>
<li>Specialità: {specialties}</li>
<li>Punteggi registrati: {ratings}</li>
<li>Strutture con coordinate: {with_coordinates}</li>
</ul>
"#,
        sources_html = sources_html,
        facilities = stats.facilities,
        regions = stats.regions,
        specialties = stats.specialties,
        ratings = stats.ratings,
        with_coordinates = stats.with_coordinates,
    );
    page("Metodologia", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_neutralizes_markup() {
        assert_eq!(escape("<b>&\"x\"</b>"), "&lt;b&gt;&amp;&quot;x&quot;&lt;/b&gt;");
    }

    #[test]
    fn quality_formatting() {
        assert_eq!(format_quality(Some(4.25)), "4.2/5.0");
        assert_eq!(format_quality(None), "dati insufficienti");
    }

    #[test]
    fn results_page_always_renders_an_explanation() {
        let req = SearchRequest {
            specialty: Some("Pasticceria".to_string()),
            ..Default::default()
        };
        let outcome = SearchOutcome {
            specialty_matched: Some(false),
            ..Default::default()
        };
        let html = results_page(&req, &outcome);
        assert!(html.contains("Nessuna specialità"));

        let outcome = SearchOutcome::default();
        let html = results_page(&SearchRequest::default(), &outcome);
        assert!(html.contains("Nessuna struttura corrisponde"));
    }
}
