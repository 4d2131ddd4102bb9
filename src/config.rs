use once_cell::sync::Lazy;

/// Default endpoint for the Argentina georef municipalities API.
/// Documented at https://www.datos.gob.ar/apis
pub static DEFAULT_GEO_URL: Lazy<String> =
    Lazy::new(|| "https://apis.datos.gob.ar/georef/api/municipios?max=5000".to_string());

/// MercadoLibre level-1 category taxonomy. Fixed and ordered; ties in the
/// semantic categorizer are broken by position in this list.
pub const CATEGORY_VOCABULARY: &[&str] = &[
    "Accesorios para Vehículos",
    "Agro",
    "Alimentos y Bebidas",
    "Animales y Mascotas",
    "Antiguedades y Colecciones",
    "Arte, Papelería y Mercería",
    "Bebés",
    "Belleza y Cuidado Personal",
    "Boletas para Espectáculos",
    "Cámaras y Accesorios",
    "Carros, Motos y Otros",
    "Celulares y Teléfonos",
    "Computación",
    "Consolas y Videojuegos",
    "Construcción",
    "Deportes y Fitness",
    "Electrodomésticos",
    "Electrónica, Audio y Video",
    "Herramientas",
    "Hogar y Muebles",
    "Industrias y Oficinas",
    "Inmuebles",
    "Instrumentos Musicales",
    "Juegos y Juguetes",
    "Libros, Revistas y Comics",
    "Música, Películas y Series",
    "Recuerdos, Piñatería y Fiestas",
    "Relojes y Joyas",
    "Ropa y Accesorios",
    "Salud y Equipamiento Médico",
    "Servicios",
    "Otras categorías",
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Two-letter language code (`ES`, `EN`, `PT`). Resolved to a concrete
    /// language at normalizer construction; an unknown code fails there,
    /// before any row is processed.
    pub language: String,
    /// Input file name under `data/raw/`.
    pub file_name: String,
    pub geo_url: String,
    pub embedding_gateway_url: String,
    pub embedding_model: String,
    pub embedding_api_key: Option<String>,
    pub embedding_batch_size: usize,
    pub http_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
    /// Number of trailing records held out as the test split.
    pub test_split: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            language: std::env::var("LANGUAGE").unwrap_or_else(|_| "ES".into()),
            file_name: std::env::var("FILE_NAME")
                .unwrap_or_else(|_| "MLA_100k_checked_v3.jsonlines".into()),
            geo_url: std::env::var("GEO_API_URL").unwrap_or_else(|_| DEFAULT_GEO_URL.clone()),
            embedding_gateway_url: std::env::var("EMBEDDING_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "paraphrase-multilingual-MiniLM-L12-v2".into()),
            embedding_api_key: std::env::var("EMBEDDING_API_KEY").ok(),
            embedding_batch_size: env_parse("EMBEDDING_BATCH_SIZE", 100),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 30),
            http_connect_timeout_secs: env_parse("HTTP_CONNECT_TIMEOUT_SECS", 5),
            test_split: env_parse("TEST_SPLIT", 10_000),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}
