//! Per-region open-data source descriptors. Each region publishes its
//! facility registry with its own column headers; the `ColumnMap` names the
//! header carrying each field so the loader stays format-agnostic.
//!
//! Sources are grouped into fixed-size batches so one load invocation stays
//! well inside any host-imposed request time limit; the caller picks the
//! batch index and `load_progress` records what has been applied.

#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub name: &'static str,
    pub facility_type: Option<&'static str>,
    /// Used when the source has no type column.
    pub default_type: Option<&'static str>,
    pub address: Option<&'static str>,
    pub city: Option<&'static str>,
    pub telephone: Option<&'static str>,
    pub email: Option<&'static str>,
    pub website: Option<&'static str>,
    pub specialties: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct RegionSource {
    pub key: &'static str,
    pub region_name: &'static str,
    pub file_name: &'static str,
    /// Direct CSV download, when the portal offers one.
    pub url: Option<&'static str>,
    /// Seed data written to the data dir when neither a local file nor a
    /// download is available.
    pub sample: &'static str,
    pub data_source: &'static str,
    pub attribution: &'static str,
    pub columns: ColumnMap,
}

pub const REGIONS_PER_BATCH: usize = 2;

pub const SOURCES: &[RegionSource] = &[
    RegionSource {
        key: "puglia",
        region_name: "Puglia",
        file_name: "puglia.csv",
        url: None,
        sample: SAMPLE_PUGLIA,
        data_source: "Puglia Open Data",
        attribution: "Regione Puglia - Anagrafe strutture sanitarie - IODL 2.0",
        columns: ColumnMap {
            name: "DENOMSTRUTTURA",
            facility_type: Some("TIPOLOGIASTRUTTURA"),
            default_type: None,
            address: Some("INDIRIZZO"),
            city: Some("COMUNE"),
            telephone: Some("TELEFONO"),
            email: None,
            website: None,
            specialties: Some("BRANCHEAUTORIZZATE"),
        },
    },
    RegionSource {
        key: "trentino",
        region_name: "Trentino",
        file_name: "trentino.csv",
        url: None,
        sample: SAMPLE_TRENTINO,
        data_source: "Trento Open Data",
        attribution: "Provincia Autonoma di Trento - Strutture sanitarie - CC-BY",
        columns: ColumnMap {
            name: "DENOMINAZIONE",
            facility_type: Some("TIPO"),
            default_type: None,
            address: Some("INDIRIZZO"),
            city: Some("COMUNE"),
            telephone: Some("TELEFONO"),
            email: Some("EMAIL"),
            website: Some("SITO WEB"),
            specialties: Some("PRESTAZIONI"),
        },
    },
    RegionSource {
        key: "toscana",
        region_name: "Toscana",
        file_name: "toscana.csv",
        url: None,
        sample: SAMPLE_TOSCANA,
        data_source: "Toscana Open Data",
        attribution: "Regione Toscana - Strutture ospedaliere - IODL 2.0",
        columns: ColumnMap {
            name: "Denominazione",
            facility_type: None,
            default_type: Some("Ospedale"),
            address: Some("Indirizzo"),
            city: Some("Comune"),
            telephone: Some("Telefono"),
            email: None,
            website: None,
            specialties: Some("Tipologia"),
        },
    },
    RegionSource {
        key: "lazio",
        region_name: "Lazio",
        file_name: "lazio.csv",
        url: None,
        sample: SAMPLE_LAZIO,
        data_source: "Lazio Open Data",
        attribution: "Regione Lazio - Strutture sanitarie",
        columns: ColumnMap {
            name: "Nome",
            facility_type: Some("Tipo"),
            default_type: None,
            address: Some("Indirizzo"),
            city: Some("Città"),
            telephone: Some("Telefono"),
            email: None,
            website: None,
            specialties: Some("Specialità"),
        },
    },
];

pub fn batch_count() -> usize {
    SOURCES.len().div_ceil(REGIONS_PER_BATCH)
}

/// Sources belonging to one load batch; empty past the last batch.
pub fn batch(index: usize) -> &'static [RegionSource] {
    let start = index * REGIONS_PER_BATCH;
    if start >= SOURCES.len() {
        return &[];
    }
    let end = (start + REGIONS_PER_BATCH).min(SOURCES.len());
    &SOURCES[start..end]
}

const SAMPLE_PUGLIA: &str = "\
DENOMSTRUTTURA,TIPOLOGIASTRUTTURA,INDIRIZZO,COMUNE,TELEFONO,BRANCHEAUTORIZZATE
Ospedale San Paolo,Ospedale,Via Caposcardicchio 1,Bari,080 5555123,\"Cardiologia, Pediatria, Medicina Generale\"
Ospedale Di Venere,Ospedale,Via Ospedale Di Venere 1,Bari,080 5555124,\"Oncologia, Ortopedia, Ginecologia\"
Policlinico di Bari,Policlinico Universitario,Piazza Giulio Cesare 11,Bari,080 5555125,\"Cardiologia, Neurologia, Pediatria, Oncologia\"
Ospedale Santa Maria,Ospedale,Via Martiri 24,Taranto,099 4585123,\"Medicina Generale, Fisioterapia\"
Centro Medico San Giovanni,Centro Medico,Corso Italia 45,Brindisi,083 2284512,\"Dermatologia, Oculistica\"
Clinica Villa Bianca,Clinica Privata,Via Roma 128,Lecce,083 2395871,\"Ginecologia, Ostetricia, Pediatria\"
Ospedale Generale Regionale,Ospedale,Viale della Repubblica 12,Foggia,088 1733421,\"Ortopedia, Traumatologia, Medicina Generale\"
Centro Diagnostico Puglia,Centro Diagnostico,Via Napoli 37,Barletta,088 3571289,\"Radiologia, Diagnostica, Analisi Cliniche\"
Istituto Tumori Bari,Istituto Specializzato,Viale Orazio Flacco 65,Bari,080 5555789,\"Oncologia, Radioterapia\"
";

const SAMPLE_TRENTINO: &str = "\
DENOMINAZIONE,TIPO,INDIRIZZO,COMUNE,TELEFONO,EMAIL,SITO WEB,PRESTAZIONI
Ospedale Santa Chiara,Ospedale Pubblico,Largo Medaglie d'Oro 9,Trento,0461 903111,info@ospedalesc.it,www.ospedalesc.it,\"Cardiologia, Neurologia, Ortopedia\"
Ospedale San Camillo,Ospedale Privato,Via Giovanelli 19,Trento,0461 216111,info@sancamillo.org,www.sancamillo.org,\"Ginecologia, Ostetricia, Pediatria\"
Clinica Solatrix,Clinica Privata,Via Bellenzani 11,Rovereto,0464 491111,info@solatrix.it,www.solatrix.it,\"Fisioterapia, Riabilitazione\"
Centro Medico Trentino,Centro Medico,Via Gocciadoro 82,Trento,0461 374100,info@centromedtn.it,www.centromedtn.it,\"Dermatologia, Oculistica, Urologia\"
Ospedale Villa Rosa,Ospedale Pubblico,Via Degasperi 31,Pergine Valsugana,0461 515111,info@villarosa.it,www.villarosa.it,\"Medicina Generale, Geriatria\"
Poliambulatorio Montebello,Poliambulatorio,Via Montebello 6,Trento,0461 903400,info@montebello.it,www.montebello.it,\"Ambulatorio, Analisi Cliniche\"
Ospedale di Cavalese,Ospedale Pubblico,Via Dossi 17,Cavalese,0462 242111,ospedale.cavalese@apss.tn.it,www.apss.tn.it,\"Pronto Soccorso, Medicina Generale, Ortopedia\"
Ospedale di Cles,Ospedale Pubblico,Viale Degasperi 41,Cles,0463 660111,ospedale.cles@apss.tn.it,www.apss.tn.it,\"Medicina Generale, Pediatria, Cardiologia\"
";

const SAMPLE_TOSCANA: &str = "\
Denominazione,Indirizzo,Comune,Telefono,Tipologia
Ospedale di Careggi,Largo Brambilla 3,Firenze,055 794111,\"Ospedale Generale, Cardiologia, Neurologia, Oncologia\"
Ospedale Santa Maria Nuova,Piazza Santa Maria Nuova 1,Firenze,055 693111,\"Medicina Generale, Ginecologia, Pediatria\"
Ospedale Meyer,Viale Pieraccini 24,Firenze,055 5662111,\"Pediatria, Neuropsichiatria Infantile\"
Ospedale di Pisa,Via Roma 67,Pisa,050 992111,\"Medicina Generale, Cardiologia, Oncologia\"
Centro Medico Fiorentino,Via del Pergolino 4,Firenze,055 4296111,\"Ambulatorio, Diagnostica, Fisioterapia\"
Ospedale Misericordia,Via Senese 161,Grosseto,0564 483111,\"Medicina Generale, Ortopedia, Urologia\"
Ospedale San Donato,Via Pietro Nenni 20,Arezzo,0575 2551,\"Medicina Generale, Cardiologia, Chirurgia\"
Ospedale Le Scotte,Viale Mario Bracci 16,Siena,0577 585111,\"Medicina Generale, Ginecologia, Ostetricia, Neurologia\"
Centro Oncologico Toscano,Via Toscana 28,Prato,0574 434111,\"Oncologia, Radioterapia, Diagnostica\"
";

const SAMPLE_LAZIO: &str = "\
Nome,Tipo,Indirizzo,Città,Telefono,Specialità
Policlinico Umberto I,Policlinico Universitario,Viale del Policlinico 155,Roma,06 49971,\"Medicina Generale, Cardiologia, Neurologia, Oncologia\"
Ospedale San Giovanni,Ospedale,Via dell'Amba Aradam 9,Roma,06 77051,\"Cardiologia, Ortopedia, Oncologia\"
Ospedale San Camillo,Ospedale,Circonvallazione Gianicolense 87,Roma,06 58701,\"Medicina Generale, Cardiologia, Pronto Soccorso\"
Policlinico Gemelli,Policlinico Universitario,Largo Agostino Gemelli 8,Roma,06 30151,\"Oncologia, Ginecologia, Pediatria\"
Ospedale Sant'Eugenio,Ospedale,Piazzale dell'Umanesimo 10,Roma,06 51001,\"Medicina Generale, Oculistica, Dermatologia\"
Ospedale San Filippo Neri,Ospedale,Via Giovanni Martinotti 20,Roma,06 33061,\"Cardiologia, Neurologia, Ortopedia\"
Ospedale Sandro Pertini,Ospedale,Via dei Monti Tiburtini 385,Roma,06 41431,\"Chirurgia, Medicina Generale, Urologia\"
Ospedale Regina Apostolorum,Ospedale,Via San Francesco 50,Albano Laziale,06 932981,\"Ginecologia, Pediatria, Fisioterapia\"
Ospedale Sant'Andrea,Ospedale Universitario,Via di Grottarossa 1035,Roma,06 33771,\"Neurologia, Ortopedia, Urologia\"
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_cover_all_sources_without_overlap() {
        let mut seen = Vec::new();
        for i in 0..batch_count() {
            for s in batch(i) {
                seen.push(s.key);
            }
        }
        assert_eq!(seen.len(), SOURCES.len());
        assert!(batch(batch_count()).is_empty());
    }
}
