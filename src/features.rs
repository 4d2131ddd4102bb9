use crate::categorize::{CategoryIndex, Embedder, EmbeddingCategorizer};
use crate::config::{CATEGORY_VOCABULARY, Config};
use crate::fuzzy::{self, DEFAULT_SCORE_CUTOFF};
use crate::geo::GeoSource;
use crate::schema::{FeatureRow, ListingRow};
use crate::text::{CleanOptions, TextNormalizer};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Stopword-exempt polarity markers for warranty text: `sin garantia`
/// versus `con garantia` hinges on exactly these tokens.
const WARRANTY_KEEP_WORDS: &[&str] = &["sin", "con"];

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// Bad configuration; surfaced before any row is processed.
    Config,
    /// External collaborator (georef, embedding gateway) failed; the run
    /// aborts with no partial output.
    External,
}

impl PipelineError {
    pub fn config(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Config,
        }
    }

    pub fn external(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::External,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }
}

/// Ordered first-match-wins keyword rules. Terms are matched as whole-word
/// phrases against cleaned text; rule order is the tie-break and is part of
/// the contract (reputation terms run before defect terms before duration
/// terms).
const WARRANTY_RULES: &[(&[&str], &str)] = &[
    (
        &["sin garantia", "no tener garantia", "no ofrecer", "experiencia"],
        "sin garantia",
    ),
    (
        &[
            "reputacion",
            "calificacion",
            "comprador",
            "venta",
            "comentario",
            "prueba",
        ],
        "garantia basada en reputacion",
    ),
    (
        &[
            "con garantia",
            "defecto fabricacion",
            "fallo",
            "garantia defecto",
            "cubre defecto",
            "garantia fabrica",
        ],
        "garantia por defectos",
    ),
    (&["mes", "10 dia", "30 dia", "90 dia"], "garantia media"),
    (
        &["12 mes", "1 ano", "2 ano", "3 ano", "5 ano", "garantia vida"],
        "garantia larga",
    ),
];

const TITLE_NEW_TERMS: &[&str] = &[
    "nuevo",
    "flamante",
    "original",
    "precintado",
    "sellado",
    "estreno",
    "intacto",
    "sin uso",
    "garantia",
    "oficial",
    "modelo",
    "version",
    "ultima",
    "tecnologia",
    "innovador",
    "moderno",
    "actual",
    "premium",
    "lanzamiento",
    "digital",
    "automatizado",
    "optimizado",
    "avanzado",
    "mejorado",
    "actualizado",
    "profesional",
    "full",
    "completo",
    "vanguardia",
    "importado nuevo",
    "exclusivo",
    "primera mano",
    "perfecto estado",
    "accesorio nuevo",
    "edicion limitada",
    "garantia fabrica",
    "full pack",
];

const TITLE_USED_TERMS: &[&str] = &[
    "usado",
    "segunda mano",
    "antiguo",
    "vintage",
    "clasico",
    "restaurado",
    "reacondicionado",
    "detall",
    "detalle",
    "buen estado",
    "desgastado",
    "fallo",
    "defecto",
    "reparado",
    "signo uso",
    "funcionamiento correcto",
    "original usado",
    "deterioro",
    "envejecido",
    "descatalogado",
    "discontinuado",
    "unico dueno",
    "coleccionista",
    "retro",
    "pieza antigua",
    "raro",
    "escaso",
    "usado funcional",
    "autentico",
    "reparacion",
    "adaptado",
    "cambio",
    "segunda vida",
    "estado conservacion",
    "historico",
    "modelo antiguo",
    "desgaste normal",
    "estructura original",
    "restaurado profesional",
    "manual funcionamiento",
    "marca antigua",
    "pieza unica",
];

/// Classifies cleaned warranty text into the closed five-label set.
/// Unmatched or empty text falls back to `sin garantia`.
pub fn classify_warranty(cleaned: &str) -> &'static str {
    for (terms, label) in WARRANTY_RULES {
        if terms.iter().any(|term| contains_phrase(cleaned, term)) {
            return label;
        }
    }
    "sin garantia"
}

/// Whole-word phrase search: `term` must start and end on token boundaries.
fn contains_phrase(text: &str, term: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = text[start..].find(term) {
        let begin = start + pos;
        let end = begin + term.len();
        let boundary_before = begin == 0 || text.as_bytes()[begin - 1] == b' ';
        let boundary_after = end == text.len() || text.as_bytes()[end] == b' ';
        if boundary_before && boundary_after {
            return true;
        }
        start = begin + 1;
    }
    false
}

/// Derives the full engineered feature table. Generic over the embedding
/// provider and the geographic reference source so tests run without the
/// network.
pub struct FeatureEngineering<E, G> {
    normalizer: TextNormalizer,
    categorizer: EmbeddingCategorizer<E>,
    geo: G,
    score_cutoff: u8,
}

impl<E: Embedder, G: GeoSource> FeatureEngineering<E, G> {
    /// Fails on an unsupported configured language, before any row work.
    pub fn new(config: &Config, embedder: E, geo: G) -> Result<Self, PipelineError> {
        let normalizer = TextNormalizer::from_config(&config.language)
            .map_err(|err| PipelineError::config("init", err.to_string()))?;
        Ok(Self {
            normalizer,
            categorizer: EmbeddingCategorizer::new(embedder, config.embedding_batch_size),
            geo,
            score_cutoff: DEFAULT_SCORE_CUTOFF,
        })
    }

    /// Classifies a raw title into `nuevo` / `usado` / `otro`. The clean is
    /// applied here, to the raw title; the separately cleaned copy kept for
    /// embedding is deliberately not reused (the keyword rules were tuned
    /// against this exact normalization).
    pub fn classify_title(&self, raw_title: &str) -> &'static str {
        let cleaned = self
            .normalizer
            .clean(raw_title, &CleanOptions::full(WARRANTY_KEEP_WORDS));
        if TITLE_NEW_TERMS
            .iter()
            .any(|term| contains_phrase(&cleaned, term))
        {
            return "nuevo";
        }
        if TITLE_USED_TERMS
            .iter()
            .any(|term| contains_phrase(&cleaned, term))
        {
            return "usado";
        }
        "otro"
    }

    /// Runs every stage in order on one partition. Row count is invariant:
    /// rows with missing inputs carry missing outputs for that derivation
    /// only.
    pub async fn run(&self, rows: Vec<ListingRow>) -> Result<Vec<FeatureRow>, PipelineError> {
        let mut splits = self.run_splits(vec![rows]).await?;
        Ok(splits.pop().unwrap_or_default())
    }

    /// Runs the stages over several partitions with one shared setup: the
    /// geographic reference is fetched once and the vocabulary embedded
    /// once, no matter how many splits follow.
    pub async fn run_splits(
        &self,
        splits: Vec<Vec<ListingRow>>,
    ) -> Result<Vec<Vec<FeatureRow>>, PipelineError> {
        let vocabulary: Vec<String> = CATEGORY_VOCABULARY.iter().map(|c| c.to_string()).collect();
        let index = self
            .categorizer
            .index(&vocabulary)
            .await
            .map_err(|err| PipelineError::external("categorize", err.to_string()))?;

        let reference = self
            .geo
            .fetch()
            .await
            .map_err(|err| PipelineError::external("geo_reference", err.to_string()))?;
        info!(
            target = "meli.features",
            entries = reference.len(),
            "geographic reference loaded"
        );
        let provinces = fuzzy::reference_table(
            reference.iter().map(|e| e.province.as_str()),
            &self.normalizer,
        );
        let cities =
            fuzzy::reference_table(reference.iter().map(|e| e.city.as_str()), &self.normalizer);

        let mut out = Vec::with_capacity(splits.len());
        for rows in splits {
            let input_len = rows.len();
            let mut features: Vec<FeatureRow> = rows.into_iter().map(FeatureRow::new).collect();

            info!(target = "meli.features", rows = input_len, "classifying warranty");
            self.stage_warranty(&mut features);

            info!(target = "meli.features", "deriving picture features");
            stage_pictures(&mut features);

            info!(target = "meli.features", "deriving price and time deltas");
            stage_price_time(&mut features);

            info!(target = "meli.features", "cleaning and classifying titles");
            self.stage_titles(&mut features);

            info!(target = "meli.features", "assigning semantic categories");
            self.stage_categories(&mut features, &index).await?;

            info!(target = "meli.features", "matching provinces and cities");
            self.stage_geography(&mut features, &provinces, &cities);

            debug_assert_eq!(features.len(), input_len);
            out.push(features);
        }
        Ok(out)
    }

    fn stage_warranty(&self, features: &mut [FeatureRow]) {
        let options = CleanOptions::full(WARRANTY_KEEP_WORDS);
        for feature in features.iter_mut() {
            // Null warranty rows receive no class at all.
            let Some(warranty) = feature.row.warranty.as_deref() else {
                continue;
            };
            let cleaned = self.normalizer.clean(warranty, &options);
            feature.warranty_class = Some(classify_warranty(&cleaned).to_string());
        }
        for feature in features.iter_mut() {
            feature.have_warranty = match feature.warranty_class.as_deref() {
                None | Some("sin garantia") => 0,
                Some(_) => 1,
            };
        }
    }

    fn stage_titles(&self, features: &mut [FeatureRow]) {
        for feature in features.iter_mut() {
            let Some(title) = feature.row.title.clone() else {
                continue;
            };
            feature.title_clean = Some(self.normalizer.regex_clean(&title));
            feature.title_class = Some(self.classify_title(&title).to_string());
            feature.len_title = Some(title.chars().count() as u32);
        }
    }

    async fn stage_categories(
        &self,
        features: &mut [FeatureRow],
        index: &CategoryIndex,
    ) -> Result<(), PipelineError> {
        let items: Vec<String> = features
            .iter()
            .map(|f| f.title_clean.clone().unwrap_or_default())
            .collect();
        let labels = self
            .categorizer
            .assign(index, &items)
            .await
            .map_err(|err| PipelineError::external("categorize", err.to_string()))?;
        for (feature, label) in features.iter_mut().zip(labels) {
            feature.predicted_category = Some(label);
        }
        Ok(())
    }

    fn stage_geography(
        &self,
        features: &mut [FeatureRow],
        provinces: &BTreeMap<String, String>,
        cities: &BTreeMap<String, String>,
    ) {
        for feature in features.iter_mut() {
            let state = feature
                .row
                .seller_state
                .as_deref()
                .map(|name| self.normalizer.regex_clean(name))
                .unwrap_or_default();
            let (state_match, state_score) =
                fuzzy::find_best_match(&state, provinces, self.score_cutoff);
            feature.state_match = state_match;
            feature.state_score = state_score;

            let city = feature
                .row
                .seller_city
                .as_deref()
                .map(|name| self.normalizer.regex_clean(name))
                .unwrap_or_default();
            let (city_match, city_score) = fuzzy::find_best_match(&city, cities, self.score_cutoff);
            feature.city_match = city_match;
            feature.city_score = city_score;
        }
    }
}

fn stage_pictures(features: &mut [FeatureRow]) {
    for feature in features.iter_mut() {
        let row = &feature.row;
        feature.pictures_area = mul(row.pictures_width, row.pictures_height);
        feature.pictures_max_area = mul(row.pictures_max_width, row.pictures_max_height);
        // Zero heights produce inf/NaN sentinels, never a panic.
        feature.pictures_ratio_relation = div(row.pictures_width, row.pictures_height);
        feature.pictures_max_ratio_relation = div(row.pictures_max_width, row.pictures_max_height);
    }
}

fn stage_price_time(features: &mut [FeatureRow]) {
    for feature in features.iter_mut() {
        let row = &feature.row;
        feature.diff_price = match (row.price, row.base_price) {
            (Some(p), Some(b)) => Some(p - b),
            _ => None,
        };
        feature.time_to_start = day_fraction(row.start_time, row.date_created);
        feature.listing_duration = day_fraction(row.stop_time, row.start_time);
        feature.time_since_last_update = day_fraction(row.last_updated, row.date_created);
    }
}

fn mul(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a * b),
        _ => None,
    }
}

fn div(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a / b),
        _ => None,
    }
}

/// Signed day fraction between two instants; missing on either side means
/// a missing delta.
fn day_fraction(later: Option<DateTime<Utc>>, earlier: Option<DateTime<Utc>>) -> Option<f64> {
    let (later, earlier) = (later?, earlier?);
    Some((later - earlier).num_milliseconds() as f64 / MILLIS_PER_DAY)
}

const FEATURE_HEADER: &[&str] = &[
    "warranty_class",
    "have_warranty",
    "pictures_area",
    "pictures_max_area",
    "pictures_ratio_relation",
    "pictures_max_ratio_relation",
    "diff_price",
    "time_to_start",
    "listing_duration",
    "time_since_last_update",
    "title_clean",
    "title_class",
    "len_title",
    "categoria_predicha",
    "seller_address_state.name_clean_match",
    "seller_address_state.name_clean_score",
    "seller_address_city.name_clean_match",
    "seller_address_city.name_clean_score",
];

/// Writes the full feature table: every original column plus every derived
/// column, one output row per input row.
pub fn write_features_csv(
    path: &Path,
    features: &[FeatureRow],
) -> Result<(), crate::preprocess::PreprocessError> {
    use crate::preprocess::{opt_num, opt_str, row_record};

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().delimiter(b'|').from_path(path)?;
    let header: Vec<&str> = crate::preprocess::ROW_HEADER
        .iter()
        .chain(FEATURE_HEADER.iter())
        .copied()
        .collect();
    writer.write_record(&header)?;
    for feature in features {
        let mut record = row_record(&feature.row);
        record.extend([
            opt_str(&feature.warranty_class),
            feature.have_warranty.to_string(),
            opt_num(&feature.pictures_area),
            opt_num(&feature.pictures_max_area),
            opt_num(&feature.pictures_ratio_relation),
            opt_num(&feature.pictures_max_ratio_relation),
            opt_num(&feature.diff_price),
            opt_num(&feature.time_to_start),
            opt_num(&feature.listing_duration),
            opt_num(&feature.time_since_last_update),
            opt_str(&feature.title_clean),
            opt_str(&feature.title_class),
            opt_num(&feature.len_title),
            opt_str(&feature.predicted_category),
            opt_str(&feature.state_match),
            feature.state_score.to_string(),
            opt_str(&feature.city_match),
            feature.city_score.to_string(),
        ]);
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorize::EmbeddingError;
    use crate::geo::{CityProvince, GeoError};
    use crate::schema::{RawListing, TimestampField};

    /// Hash-free deterministic embedder: vector depends only on which
    /// vocabulary keyword the text shares.
    struct FakeEmbedder;

    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|text| {
                    let lower = text.to_lowercase();
                    if lower.contains("celular") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    struct FixtureGeo;

    impl GeoSource for FixtureGeo {
        async fn fetch(&self) -> Result<Vec<CityProvince>, GeoError> {
            Ok(vec![
                CityProvince {
                    city: "Río Cuarto".into(),
                    province: "Córdoba".into(),
                },
                CityProvince {
                    city: "Rosario".into(),
                    province: "Santa Fe".into(),
                },
            ])
        }
    }

    fn engine() -> FeatureEngineering<FakeEmbedder, FixtureGeo> {
        FeatureEngineering::new(&test_config(), FakeEmbedder, FixtureGeo).expect("engine")
    }

    fn test_config() -> Config {
        Config {
            language: "ES".into(),
            file_name: String::new(),
            geo_url: String::new(),
            embedding_gateway_url: String::new(),
            embedding_model: String::new(),
            embedding_api_key: None,
            embedding_batch_size: 100,
            http_timeout_secs: 1,
            http_connect_timeout_secs: 1,
            test_split: 0,
        }
    }

    fn row(json: &str) -> ListingRow {
        let raw: RawListing = serde_json::from_str(json).expect("raw");
        crate::preprocess::flatten(&raw)
    }

    #[test]
    fn unsupported_language_fails_before_row_processing() {
        let mut config = test_config();
        config.language = "DE".into();
        let Err(err) = FeatureEngineering::new(&config, FakeEmbedder, FixtureGeo) else {
            panic!("DE must be rejected");
        };
        assert_eq!(err.kind(), PipelineErrorKind::Config);
        assert_eq!(err.stage(), "init");
    }

    #[test]
    fn warranty_rules_cover_all_five_categories() {
        assert_eq!(classify_warranty("sin garantia"), "sin garantia");
        assert_eq!(
            classify_warranty("consultar calificacion vendedor"),
            "garantia basada en reputacion"
        );
        assert_eq!(
            classify_warranty("con garantia cubre defecto fabricacion"),
            "garantia por defectos"
        );
        assert_eq!(classify_warranty("garantia 30 dia"), "garantia media");
        assert_eq!(classify_warranty("garantia 1 ano"), "garantia larga");
    }

    #[test]
    fn warranty_unmatched_and_empty_fall_back() {
        assert_eq!(classify_warranty(""), "sin garantia");
        assert_eq!(classify_warranty("texto irrelevante"), "sin garantia");
    }

    #[test]
    fn warranty_rule_order_is_first_match_wins() {
        // Reputation terms outrank defect terms when both appear.
        assert_eq!(
            classify_warranty("comprador con garantia"),
            "garantia basada en reputacion"
        );
    }

    #[test]
    fn phrase_matching_requires_word_boundaries() {
        assert!(!contains_phrase("sinfonia garantizada", "sin"));
        assert!(contains_phrase("equipo sin garantia", "sin garantia"));
    }

    #[test]
    fn title_examples_from_the_three_classes() {
        let engine = engine();
        assert_eq!(
            engine.classify_title("Celular Samsung nuevo sellado con garantia"),
            "nuevo"
        );
        assert_eq!(
            engine.classify_title("Notebook usado con detalles, buen estado"),
            "usado"
        );
        assert_eq!(engine.classify_title("Repuesto generico"), "otro");
    }

    #[test]
    fn title_keywords_cover_marketing_vocabulary() {
        let engine = engine();
        assert_eq!(
            engine.classify_title("Parlante modelo 2023 version full"),
            "nuevo"
        );
        assert_eq!(engine.classify_title("Kit completo profesional"), "nuevo");
        assert_eq!(engine.classify_title("Lente raro de coleccionista"), "usado");
    }

    #[tokio::test]
    async fn raw_warranty_phrases_classify_end_to_end() {
        let phrases = [
            ("Sin garantía", "sin garantia"),
            (
                "Garantía basada en la reputación del vendedor, ver calificaciones",
                "garantia basada en reputacion",
            ),
            (
                "Con garantía por defectos de fabricación",
                "garantia por defectos",
            ),
            ("Garantía de 30 días", "garantia media"),
            ("Garantía de por vida", "garantia larga"),
        ];
        let rows = phrases
            .iter()
            .map(|(raw, _)| row(&format!(r#"{{"warranty": "{raw}"}}"#)))
            .collect();
        let features = engine().run(rows).await.expect("run");
        for (feature, (raw, expected)) in features.iter().zip(&phrases) {
            assert_eq!(
                feature.warranty_class.as_deref(),
                Some(*expected),
                "phrase `{raw}`"
            );
        }
    }

    #[tokio::test]
    async fn reference_fetched_and_vocabulary_embedded_once_across_splits() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingEmbedder(Arc<AtomicUsize>);
        impl Embedder for CountingEmbedder {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        }
        struct CountingGeo(Arc<AtomicUsize>);
        impl GeoSource for CountingGeo {
            async fn fetch(&self) -> Result<Vec<CityProvince>, GeoError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(vec![CityProvince {
                    city: "Rosario".into(),
                    province: "Santa Fe".into(),
                }])
            }
        }

        let embeds = Arc::new(AtomicUsize::new(0));
        let fetches = Arc::new(AtomicUsize::new(0));
        let engine = FeatureEngineering::new(
            &test_config(),
            CountingEmbedder(embeds.clone()),
            CountingGeo(fetches.clone()),
        )
        .expect("engine");

        let splits = engine
            .run_splits(vec![
                vec![row(r#"{"title": "Celular"}"#)],
                vec![row(r#"{"title": "Notebook"}"#)],
            ])
            .await
            .expect("run_splits");
        assert_eq!(splits.len(), 2);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        // vocabulary once, then one batch per split
        assert_eq!(embeds.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_preserves_row_count() {
        let rows = vec![
            row(r#"{"title": "Celular nuevo", "warranty": "12 meses"}"#),
            row("{}"),
            row(r#"{"title": "Mesa antigua"}"#),
        ];
        let features = engine().run(rows).await.expect("run");
        assert_eq!(features.len(), 3);
    }

    #[tokio::test]
    async fn zero_picture_height_yields_sentinel_not_crash() {
        let rows = vec![row(r#"{"pictures": [{"size": "500x0"}]}"#)];
        let features = engine().run(rows).await.expect("run");
        let ratio = features[0].pictures_ratio_relation.expect("ratio present");
        assert!(ratio.is_infinite());
        assert_eq!(features[0].pictures_area, Some(0.0));
    }

    #[tokio::test]
    async fn missing_warranty_gets_no_class_and_zero_flag() {
        let rows = vec![
            row(r#"{"warranty": "garantia de por vida"}"#),
            row("{}"),
        ];
        let features = engine().run(rows).await.expect("run");
        assert_eq!(features[0].warranty_class.as_deref(), Some("garantia larga"));
        assert_eq!(features[0].have_warranty, 1);
        assert!(features[1].warranty_class.is_none());
        assert_eq!(features[1].have_warranty, 0);
    }

    #[tokio::test]
    async fn timestamps_normalize_across_encodings() {
        let rows = vec![row(
            r#"{"start_time": 1441572178000, "date_created": "2015-09-05T20:42:58.000Z"}"#,
        )];
        let features = engine().run(rows).await.expect("run");
        // Exactly one day apart.
        assert_eq!(features[0].time_to_start, Some(1.0));
    }

    #[tokio::test]
    async fn malformed_timestamp_coerces_to_missing_delta() {
        let rows = vec![row(
            r#"{"start_time": "garbage", "date_created": "2015-09-05T20:42:58.000Z"}"#,
        )];
        let features = engine().run(rows).await.expect("run");
        assert_eq!(features[0].time_to_start, None);
    }

    #[tokio::test]
    async fn geographic_match_restores_canonical_accents() {
        let rows = vec![row(
            r#"{"seller_address": {"state": {"name": "cordoba"}, "city": {"name": "rio cuarto"}}}"#,
        )];
        let features = engine().run(rows).await.expect("run");
        assert_eq!(features[0].state_match.as_deref(), Some("Córdoba"));
        assert_eq!(features[0].state_score, 100);
        assert_eq!(features[0].city_match.as_deref(), Some("Río Cuarto"));
    }

    #[tokio::test]
    async fn unmatched_geography_keeps_original_with_zero_score() {
        let rows = vec![row(
            r#"{"seller_address": {"state": {"name": "Zzyzx"}, "city": {"name": ""}}}"#,
        )];
        let features = engine().run(rows).await.expect("run");
        assert_eq!(features[0].state_match.as_deref(), Some("zzyzx"));
        assert_eq!(features[0].state_score, 0);
        // Empty city is the null case: no match value at all.
        assert!(features[0].city_match.is_none());
        assert_eq!(features[0].city_score, 0);
    }

    #[tokio::test]
    async fn categories_assigned_per_row() {
        let rows = vec![
            row(r#"{"title": "Celular Motorola"}"#),
            row(r#"{"title": "Sillon de cuero"}"#),
        ];
        let features = engine().run(rows).await.expect("run");
        assert_eq!(
            features[0].predicted_category.as_deref(),
            Some("Celulares y Teléfonos")
        );
        assert!(features[1].predicted_category.is_some());
        assert!(
            CATEGORY_VOCABULARY.contains(&features[1].predicted_category.as_deref().unwrap())
        );
    }

    #[tokio::test]
    async fn failing_geo_source_aborts_the_run() {
        struct FailingGeo;
        impl GeoSource for FailingGeo {
            async fn fetch(&self) -> Result<Vec<CityProvince>, GeoError> {
                Err(GeoError::Request("HTTP 503".into()))
            }
        }
        let engine = FeatureEngineering::new(&test_config(), FakeEmbedder, FailingGeo).unwrap();
        let err = engine.run(vec![row("{}")]).await.unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::External);
        assert_eq!(err.stage(), "geo_reference");
    }

    #[test]
    fn timestamp_wire_formats_parse_to_comparable_instants() {
        let ms = crate::preprocess::parse_timestamp(Some(&TimestampField::Millis(
            1441485778000,
        )))
        .unwrap();
        let iso = crate::preprocess::parse_timestamp(Some(&TimestampField::Text(
            "2015-09-06T20:42:58.000Z".into(),
        )))
        .unwrap();
        assert_eq!(day_fraction(Some(iso), Some(ms)), Some(1.0));
    }
}
