use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One raw marketplace record, exactly as it appears in the `.jsonlines`
/// dump. Only the fields the pipeline consumes are declared; everything
/// else (ids, urls, permalinks) is dropped at deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawListing {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub warranty: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub base_price: Option<f64>,
    #[serde(default)]
    pub seller_address: Option<SellerAddress>,
    #[serde(default)]
    pub pictures: Vec<Picture>,
    #[serde(default)]
    pub shipping: Option<Shipping>,
    #[serde(default)]
    pub non_mercado_pago_payment_methods: Vec<PaymentMethod>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub date_created: Option<TimestampField>,
    #[serde(default)]
    pub last_updated: Option<TimestampField>,
    #[serde(default)]
    pub start_time: Option<TimestampField>,
    #[serde(default)]
    pub stop_time: Option<TimestampField>,
    #[serde(default)]
    pub listing_type_id: Option<String>,
    #[serde(default)]
    pub buying_mode: Option<String>,
    #[serde(default)]
    pub accepts_mercadopago: Option<bool>,
    #[serde(default)]
    pub automatic_relist: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub initial_quantity: Option<f64>,
    #[serde(default)]
    pub sold_quantity: Option<f64>,
    #[serde(default)]
    pub available_quantity: Option<f64>,
    #[serde(default)]
    pub seller_id: Option<i64>,
    #[serde(default)]
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SellerAddress {
    #[serde(default)]
    pub state: Option<NamedPlace>,
    #[serde(default)]
    pub city: Option<NamedPlace>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamedPlace {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Picture {
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub max_size: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentMethod {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Shipping {
    #[serde(default)]
    pub local_pick_up: Option<bool>,
    #[serde(default)]
    pub free_shipping: Option<bool>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// Timestamp column as found on the wire: `start_time`/`stop_time` are
/// epoch milliseconds, `date_created`/`last_updated` are ISO-8601 strings,
/// but individual records are not trusted to honor that split.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimestampField {
    Millis(i64),
    Text(String),
}

/// One flattened, typed listing. Every field carries an explicit
/// default-on-missing policy (`None`); the flattener never drops a row.
#[derive(Debug, Clone, Default)]
pub struct ListingRow {
    pub seller_state: Option<String>,
    pub seller_city: Option<String>,
    pub condition: Option<String>,
    pub base_price: Option<f64>,
    pub price: Option<f64>,
    pub shipping_local_pick_up: Option<bool>,
    pub shipping_free_shipping: Option<bool>,
    pub shipping_mode: Option<String>,
    pub payment_description: Option<String>,
    pub payment_type: Option<String>,
    pub listing_type_id: Option<String>,
    pub buying_mode: Option<String>,
    pub tag0: Option<String>,
    pub accepts_mercadopago: Option<bool>,
    pub automatic_relist: Option<bool>,
    pub status: Option<String>,
    pub initial_quantity: Option<f64>,
    pub sold_quantity: Option<f64>,
    pub available_quantity: Option<f64>,
    pub warranty: Option<String>,
    pub title: Option<String>,
    pub pictures_width: Option<f64>,
    pub pictures_height: Option<f64>,
    pub pictures_max_width: Option<f64>,
    pub pictures_max_height: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub date_created: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub seller_id: Option<i64>,
    pub category_id: Option<String>,
}

/// One engineered row: the flattened listing plus every derived column.
/// Derived values use `None` as the missing sentinel; the picture ratios
/// may legitimately hold `inf`/NaN when a height is zero.
#[derive(Debug, Clone, Default)]
pub struct FeatureRow {
    pub row: ListingRow,
    pub warranty_class: Option<String>,
    pub have_warranty: u8,
    pub pictures_area: Option<f64>,
    pub pictures_max_area: Option<f64>,
    pub pictures_ratio_relation: Option<f64>,
    pub pictures_max_ratio_relation: Option<f64>,
    pub diff_price: Option<f64>,
    pub time_to_start: Option<f64>,
    pub listing_duration: Option<f64>,
    pub time_since_last_update: Option<f64>,
    pub title_clean: Option<String>,
    pub title_class: Option<String>,
    pub len_title: Option<u32>,
    pub predicted_category: Option<String>,
    pub state_match: Option<String>,
    pub state_score: u8,
    pub city_match: Option<String>,
    pub city_score: u8,
}

impl FeatureRow {
    pub fn new(row: ListingRow) -> Self {
        Self {
            row,
            ..Default::default()
        }
    }
}
