use once_cell::sync::Lazy;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(http|www)\S+").expect("url regex"));
static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").expect("non-word regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported language code `{0}` (expected ES, EN or PT)")]
    UnsupportedLanguage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Spanish,
    English,
    Portuguese,
}

impl Language {
    /// Resolves the configured two-letter code. Fails before any row
    /// processing begins.
    pub fn from_code(code: &str) -> Result<Self, ConfigError> {
        match code.trim().to_uppercase().as_str() {
            "ES" => Ok(Language::Spanish),
            "EN" => Ok(Language::English),
            "PT" => Ok(Language::Portuguese),
            other => Err(ConfigError::UnsupportedLanguage(other.to_string())),
        }
    }

    fn stemmer_algorithm(self) -> Algorithm {
        match self {
            Language::Spanish => Algorithm::Spanish,
            Language::English => Algorithm::English,
            Language::Portuguese => Algorithm::Portuguese,
        }
    }

    fn stopword_language(self) -> stop_words::LANGUAGE {
        match self {
            Language::Spanish => stop_words::LANGUAGE::Spanish,
            Language::English => stop_words::LANGUAGE::English,
            Language::Portuguese => stop_words::LANGUAGE::Portuguese,
        }
    }
}

/// Cleaning switches for one `clean` call.
///
/// `keep_words` are checked verbatim against lowercased tokens, so callers
/// must supply them lowercase for the exemption to take effect.
#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    pub remove_stopwords: bool,
    pub lemmatize: bool,
    pub stem: bool,
    pub apply_regex_clean: bool,
    pub keep_words: HashSet<String>,
}

impl CleanOptions {
    pub fn regex_only() -> Self {
        Self {
            apply_regex_clean: true,
            ..Default::default()
        }
    }

    pub fn full(keep_words: &[&str]) -> Self {
        Self {
            remove_stopwords: true,
            lemmatize: true,
            stem: false,
            apply_regex_clean: true,
            keep_words: keep_words.iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// Language-aware text cleaner. Callers are responsible for filtering out
/// null/empty values before invoking it; a missing value here would leak
/// garbage tokens into batch-level columns.
pub struct TextNormalizer {
    language: Language,
    stopwords: HashSet<String>,
    stemmer: Stemmer,
}

impl TextNormalizer {
    pub fn new(language: Language) -> Self {
        let stopwords = stop_words::get(language.stopword_language())
            .into_iter()
            .collect();
        Self {
            language,
            stopwords,
            stemmer: Stemmer::create(language.stemmer_algorithm()),
        }
    }

    pub fn from_config(code: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(Language::from_code(code)?))
    }

    /// Accent stripping + lowercasing only. Used for building lookup keys;
    /// idempotent (a normalized string is its own fixed point).
    pub fn normalize(&self, text: &str) -> String {
        strip_to_ascii(text).to_lowercase().trim().to_string()
    }

    /// Strips URLs and punctuation, collapses whitespace, lowercases and
    /// maps accented characters (ñ included) to their ASCII base.
    pub fn regex_clean(&self, text: &str) -> String {
        let text = URL_RE.replace_all(text, "");
        let text = NON_WORD_RE.replace_all(&text, "");
        let text = WHITESPACE_RE.replace_all(&text, " ");
        strip_to_ascii(&text.to_lowercase()).trim().to_string()
    }

    pub fn remove_stopwords(&self, text: &str, keep_words: &HashSet<String>) -> String {
        text.split_whitespace()
            .filter(|word| {
                let lower = word.to_lowercase();
                keep_words.contains(&lower) || !self.stopwords.contains(&lower)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Replaces each token with its dictionary base form using a bundled
    /// exception table plus suffix rules for the configured language.
    pub fn lemmatize(&self, text: &str) -> String {
        text.split_whitespace()
            .map(|word| lemma_for(self.language, word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn stem(&self, text: &str) -> String {
        text.split_whitespace()
            .map(|word| self.stemmer.stem(word).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Full cleaning pass. Lemmatization can reintroduce stopword and
    /// punctuation forms, so regex clean and stopword removal are re-applied
    /// after it; stemming, when requested, runs on the lemmatized result.
    pub fn clean(&self, text: &str, options: &CleanOptions) -> String {
        let mut text = text.to_string();
        if options.apply_regex_clean {
            text = self.regex_clean(&text);
        }
        if options.remove_stopwords {
            text = self.remove_stopwords(&text, &options.keep_words);
        }
        if options.lemmatize {
            text = self.lemmatize(&text);
            text = self.regex_clean(&text);
            text = self.remove_stopwords(&text, &options.keep_words);
        }
        if options.stem {
            text = self.stem(&text);
        }
        text
    }
}

/// NFKD decomposition followed by an ASCII filter: drops combining marks,
/// so `ñ` → `n`, `á` → `a`.
fn strip_to_ascii(text: &str) -> String {
    text.nfkd().filter(char::is_ascii).collect()
}

fn lemma_for(language: Language, word: &str) -> String {
    let table = match language {
        Language::Spanish => SPANISH_LEMMAS,
        Language::English => ENGLISH_LEMMAS,
        Language::Portuguese => PORTUGUESE_LEMMAS,
    };
    if let Some((_, lemma)) = table.iter().find(|(form, _)| *form == word) {
        return (*lemma).to_string();
    }
    match language {
        Language::Spanish | Language::Portuguese => strip_plural_suffix(word),
        Language::English => strip_english_suffix(word),
    }
}

// Irregular forms the suffix rules would mangle. Expressed over
// accent-stripped lowercase tokens, the shape regex_clean produces.
const SPANISH_LEMMAS: &[(&str, &str)] = &[
    ("usada", "usado"),
    ("usadas", "usado"),
    ("usados", "usado"),
    ("nueva", "nuevo"),
    ("nuevas", "nuevo"),
    ("nuevos", "nuevo"),
    ("meses", "mes"),
    ("anos", "ano"),
    ("dias", "dia"),
    ("fallas", "fallo"),
    ("fallos", "fallo"),
    ("calificaciones", "calificacion"),
    ("comentarios", "comentario"),
    ("compradores", "comprador"),
    ("defectos", "defecto"),
    ("garantias", "garantia"),
    ("ventas", "venta"),
    ("pruebas", "prueba"),
    ("tiene", "tener"),
    ("ofrecemos", "ofrecer"),
];

const ENGLISH_LEMMAS: &[(&str, &str)] = &[
    ("used", "use"),
    ("months", "month"),
    ("years", "year"),
    ("days", "day"),
    ("warranties", "warranty"),
];

const PORTUGUESE_LEMMAS: &[(&str, &str)] = &[
    ("usada", "usado"),
    ("usadas", "usado"),
    ("usados", "usado"),
    ("novas", "novo"),
    ("novos", "novo"),
    ("meses", "mes"),
    ("anos", "ano"),
    ("dias", "dia"),
];

fn strip_plural_suffix(word: &str) -> String {
    if let Some(base) = word.strip_suffix("ciones") {
        return format!("{base}cion");
    }
    if word.len() > 4
        && let Some(base) = word.strip_suffix("es")
        && base.ends_with(['r', 'l', 'n', 'd', 'z'])
    {
        return base.to_string();
    }
    if word.len() > 3
        && let Some(base) = word.strip_suffix('s')
        && !base.ends_with('e')
    {
        return base.to_string();
    }
    word.to_string()
}

fn strip_english_suffix(word: &str) -> String {
    if word.len() > 4
        && let Some(base) = word.strip_suffix("ies")
    {
        return format!("{base}y");
    }
    if word.len() > 3
        && let Some(base) = word.strip_suffix('s')
        && !base.ends_with('s')
    {
        return base.to_string();
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spanish() -> TextNormalizer {
        TextNormalizer::new(Language::Spanish)
    }

    #[test]
    fn unsupported_language_fails_at_construction() {
        let Err(err) = TextNormalizer::from_config("FR") else {
            panic!("FR must be rejected");
        };
        assert!(err.to_string().contains("FR"));
    }

    #[test]
    fn normalize_strips_accents_and_lowercases() {
        let tn = spanish();
        assert_eq!(tn.normalize("  Córdoba  "), "cordoba");
        assert_eq!(tn.normalize("Ñandú"), "nandu");
    }

    #[test]
    fn normalize_is_idempotent() {
        let tn = spanish();
        let once = tn.normalize("Río Gallegos Ñuñoa");
        assert_eq!(tn.normalize(&once), once);
    }

    #[test]
    fn regex_clean_strips_urls_punctuation_and_case() {
        let tn = spanish();
        assert_eq!(
            tn.regex_clean("¡NUEVO! visita http://tienda.example/x ya, está sellado..."),
            "nuevo visita ya esta sellado"
        );
    }

    #[test]
    fn keep_words_survive_stopword_removal() {
        let tn = spanish();
        let mut keep = HashSet::new();
        keep.insert("sin".to_string());
        keep.insert("con".to_string());
        let out = tn.remove_stopwords("producto sin garantia con detalles de la caja", &keep);
        assert!(out.contains("sin"));
        assert!(out.contains("con"));
        assert!(!out.contains(" de "));
    }

    #[test]
    fn keep_words_contract_is_case_sensitive_on_caller_side() {
        // Uppercase keep_words never match the lowercased input tokens.
        let tn = spanish();
        let mut keep = HashSet::new();
        keep.insert("SIN".to_string());
        let out = tn.remove_stopwords("sin garantia", &keep);
        assert_eq!(out, "garantia");
    }

    #[test]
    fn lemmatize_maps_plurals_to_base_forms() {
        let tn = spanish();
        assert_eq!(tn.lemmatize("12 meses de garantia"), "12 mes de garantia");
        assert_eq!(tn.lemmatize("30 dias"), "30 dia");
        assert_eq!(tn.lemmatize("usadas"), "usado");
    }

    #[test]
    fn stem_collapses_inflected_forms() {
        let tn = spanish();
        let stems = tn.stem("gato gatos gatas");
        let parts: Vec<&str> = stems.split(' ').collect();
        assert_eq!(parts[0], parts[1]);
        assert_eq!(parts[1], parts[2]);
    }

    #[test]
    fn clean_full_pipeline_keeps_polarity_words() {
        let tn = spanish();
        let options = CleanOptions::full(&["sin", "con"]);
        let out = tn.clean("¡Sin garantía por 30 días!", &options);
        assert_eq!(out, "sin garantia 30 dia");
    }

    #[test]
    fn content_words_survive_stopword_removal() {
        // The classifier keywords must reach the rule cascades intact;
        // only function words are stopwords.
        let tn = spanish();
        for word in ["nuevo", "usado", "uso", "dia", "mes", "modelo", "general"] {
            assert!(
                !tn.stopwords.contains(word),
                "`{word}` must not be a stopword"
            );
        }
        let options = CleanOptions::full(&["sin", "con"]);
        assert_eq!(
            tn.clean("Celular nuevo sin uso por 30 días", &options),
            "celular nuevo sin uso 30 dia"
        );
    }
}
