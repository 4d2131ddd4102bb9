use crate::schema::{ListingRow, RawListing, TimestampField};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to read input file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to write output: {0}")]
    Csv(#[from] csv::Error),
}

/// Raw records split into labeled train and held-out test partitions.
/// Test records keep their rows but lose the `condition` label.
#[derive(Debug, Default)]
pub struct Dataset {
    pub train: Vec<RawListing>,
    pub train_labels: Vec<Option<String>>,
    pub test: Vec<RawListing>,
    pub test_labels: Vec<Option<String>>,
}

/// Loads the `.jsonlines` dump. A malformed line is fatal: partial inputs
/// never produce partial outputs.
pub fn load_raw(path: &Path) -> Result<Vec<RawListing>, PreprocessError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RawListing = serde_json::from_str(&line)
            .map_err(|source| PreprocessError::Malformed { line: idx + 1, source })?;
        records.push(record);
    }
    Ok(records)
}

/// The last `test_split` records are the held-out evaluation set.
pub fn split_dataset(mut records: Vec<RawListing>, test_split: usize) -> Dataset {
    let cut = records.len().saturating_sub(test_split);
    let mut test = records.split_off(cut);
    let train_labels = records.iter().map(|r| r.condition.clone()).collect();
    let test_labels = test.iter().map(|r| r.condition.clone()).collect();
    for record in &mut test {
        record.condition = None;
    }
    Dataset {
        train: records,
        train_labels,
        test,
        test_labels,
    }
}

/// Flattens one nested raw record into the explicit tabular schema.
/// Never fails and never drops the row: unparsable fields become `None`.
pub fn flatten(raw: &RawListing) -> ListingRow {
    let (pictures_width, pictures_height) = raw
        .pictures
        .first()
        .and_then(|p| p.size.as_deref())
        .map(parse_dimensions)
        .unwrap_or((None, None));
    let (pictures_max_width, pictures_max_height) = raw
        .pictures
        .first()
        .and_then(|p| p.max_size.as_deref())
        .map(parse_dimensions)
        .unwrap_or((None, None));

    let payment = raw.non_mercado_pago_payment_methods.first();

    ListingRow {
        seller_state: raw
            .seller_address
            .as_ref()
            .and_then(|a| a.state.as_ref())
            .and_then(|s| s.name.clone()),
        seller_city: raw
            .seller_address
            .as_ref()
            .and_then(|a| a.city.as_ref())
            .and_then(|c| c.name.clone()),
        condition: raw.condition.clone(),
        base_price: raw.base_price,
        price: raw.price,
        shipping_local_pick_up: raw.shipping.as_ref().and_then(|s| s.local_pick_up),
        shipping_free_shipping: raw.shipping.as_ref().and_then(|s| s.free_shipping),
        shipping_mode: raw.shipping.as_ref().and_then(|s| s.mode.clone()),
        payment_description: payment.and_then(|p| p.description.clone()),
        payment_type: payment.and_then(|p| p.kind.clone()),
        listing_type_id: raw.listing_type_id.clone(),
        buying_mode: raw.buying_mode.clone(),
        tag0: raw.tags.first().cloned(),
        accepts_mercadopago: raw.accepts_mercadopago,
        automatic_relist: raw.automatic_relist,
        status: raw.status.clone(),
        initial_quantity: raw.initial_quantity,
        sold_quantity: raw.sold_quantity,
        available_quantity: raw.available_quantity,
        warranty: raw.warranty.clone(),
        title: raw.title.clone(),
        pictures_width,
        pictures_height,
        pictures_max_width,
        pictures_max_height,
        start_time: parse_timestamp(raw.start_time.as_ref()),
        stop_time: parse_timestamp(raw.stop_time.as_ref()),
        date_created: parse_timestamp(raw.date_created.as_ref()),
        last_updated: parse_timestamp(raw.last_updated.as_ref()),
        seller_id: raw.seller_id,
        category_id: raw.category_id.clone(),
    }
}

/// `"WxH"` → `(width, height)`. Anything else is a per-field missing value.
pub fn parse_dimensions(size: &str) -> (Option<f64>, Option<f64>) {
    let mut parts = size.splitn(2, 'x');
    let width = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
    let height = parts.next().and_then(|v| v.trim().parse::<f64>().ok());
    match (width, height) {
        (Some(w), Some(h)) => (Some(w), Some(h)),
        _ => (None, None),
    }
}

/// Normalizes either wire encoding to `DateTime<Utc>`; malformed values
/// coerce to `None` instead of raising.
pub fn parse_timestamp(field: Option<&TimestampField>) -> Option<DateTime<Utc>> {
    match field? {
        TimestampField::Millis(ms) => DateTime::<Utc>::from_timestamp_millis(*ms),
        TimestampField::Text(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            // Epoch milliseconds serialized as a string.
            text.parse::<i64>()
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
        }
    }
}

/// Median for numeric columns, mode for closed categorical columns.
/// Free-text columns (warranty, title) and geographic names keep their
/// nulls; downstream stages define their own missing-value behavior.
pub fn impute_missing_values(rows: &mut [ListingRow]) {
    impute_numeric(rows, |r| &mut r.base_price);
    impute_numeric(rows, |r| &mut r.price);
    impute_numeric(rows, |r| &mut r.initial_quantity);
    impute_numeric(rows, |r| &mut r.sold_quantity);
    impute_numeric(rows, |r| &mut r.available_quantity);
    impute_numeric(rows, |r| &mut r.pictures_width);
    impute_numeric(rows, |r| &mut r.pictures_height);
    impute_numeric(rows, |r| &mut r.pictures_max_width);
    impute_numeric(rows, |r| &mut r.pictures_max_height);

    impute_categorical(rows, |r| &mut r.shipping_mode);
    impute_categorical(rows, |r| &mut r.payment_description);
    impute_categorical(rows, |r| &mut r.payment_type);
    impute_categorical(rows, |r| &mut r.listing_type_id);
    impute_categorical(rows, |r| &mut r.buying_mode);
    impute_categorical(rows, |r| &mut r.tag0);
    impute_categorical(rows, |r| &mut r.status);
    impute_categorical(rows, |r| &mut r.category_id);
}

fn impute_numeric<F>(rows: &mut [ListingRow], mut accessor: F)
where
    F: FnMut(&mut ListingRow) -> &mut Option<f64>,
{
    let mut present: Vec<f64> = rows
        .iter_mut()
        .filter_map(|row| *accessor(row))
        .filter(|v| v.is_finite())
        .collect();
    if present.is_empty() {
        return;
    }
    present.sort_by(|a, b| a.total_cmp(b));
    let mid = present.len() / 2;
    let median = if present.len() % 2 == 0 {
        (present[mid - 1] + present[mid]) / 2.0
    } else {
        present[mid]
    };
    for row in rows.iter_mut() {
        let slot = accessor(row);
        if slot.is_none() {
            *slot = Some(median);
        }
    }
}

fn impute_categorical<F>(rows: &mut [ListingRow], mut accessor: F)
where
    F: FnMut(&mut ListingRow) -> &mut Option<String>,
{
    use std::collections::HashMap;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in rows.iter_mut() {
        if let Some(value) = accessor(row) {
            *counts.entry(value.clone()).or_insert(0) += 1;
        }
    }
    // Highest count wins; lexicographic order settles equal counts.
    let mode = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(value, _)| value);
    let Some(mode) = mode else { return };
    for row in rows.iter_mut() {
        let slot = accessor(row);
        if slot.is_none() {
            *slot = Some(mode.clone());
        }
    }
}

/// Box-Cox with a +1 shift, applied only when every value is positive.
/// Lambda picked by grid-search MLE.
pub fn boxcox_transform<F>(rows: &mut [ListingRow], mut accessor: F)
where
    F: FnMut(&mut ListingRow) -> &mut Option<f64>,
{
    let values: Vec<f64> = rows.iter_mut().filter_map(|row| *accessor(row)).collect();
    if values.is_empty() || values.iter().any(|v| *v <= 0.0 || !v.is_finite()) {
        return;
    }
    let shifted: Vec<f64> = values.iter().map(|v| v + 1.0).collect();
    let lambda = best_boxcox_lambda(&shifted);
    for row in rows.iter_mut() {
        let slot = accessor(row);
        if let Some(value) = *slot {
            *slot = Some(boxcox(value + 1.0, lambda));
        }
    }
}

fn boxcox(x: f64, lambda: f64) -> f64 {
    if lambda.abs() < 1e-12 {
        x.ln()
    } else {
        (x.powf(lambda) - 1.0) / lambda
    }
}

/// Maximizes the Box-Cox log-likelihood over lambda in [-2, 2], step 0.05.
fn best_boxcox_lambda(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
    let mut best = (1.0, f64::NEG_INFINITY);
    let mut lambda = -2.0;
    while lambda <= 2.0 + 1e-9 {
        let transformed: Vec<f64> = values.iter().map(|v| boxcox(*v, lambda)).collect();
        let mean = transformed.iter().sum::<f64>() / n;
        let variance = transformed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        if variance > 0.0 {
            let ll = -0.5 * n * variance.ln() + (lambda - 1.0) * log_sum;
            if ll > best.1 {
                best = (lambda, ll);
            }
        }
        lambda += 0.05;
    }
    best.0
}

/// Full preprocessing for one partition: flatten, impute, stabilize prices.
pub fn preprocess(records: &[RawListing]) -> Vec<ListingRow> {
    info!(target = "meli.preprocess", records = records.len(), "flattening records");
    let mut rows: Vec<ListingRow> = records.iter().map(flatten).collect();
    info!(target = "meli.preprocess", "imputing missing values");
    impute_missing_values(&mut rows);
    info!(target = "meli.preprocess", "box-cox transform on price columns");
    boxcox_transform(&mut rows, |r| &mut r.base_price);
    boxcox_transform(&mut rows, |r| &mut r.price);
    rows
}

pub const ROW_HEADER: &[&str] = &[
    "seller_address_state.name",
    "seller_address_city.name",
    "condition",
    "base_price",
    "price",
    "shipping_local_pick_up",
    "shipping_free_shipping",
    "shipping_mode",
    "non_mercado_pago_payment_methods_description",
    "non_mercado_pago_payment_methods_type",
    "listing_type_id",
    "buying_mode",
    "tags_0",
    "accepts_mercadopago",
    "automatic_relist",
    "status",
    "initial_quantity",
    "sold_quantity",
    "available_quantity",
    "warranty",
    "title",
    "pictures_width",
    "pictures_height",
    "pictures_max_width",
    "pictures_max_height",
    "start_time",
    "stop_time",
    "date_created",
    "last_updated",
    "seller_id",
    "category_id",
];

pub fn opt_str(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

pub fn opt_num<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

pub fn opt_time(value: &Option<DateTime<Utc>>) -> String {
    value.map(|v| v.to_rfc3339()).unwrap_or_default()
}

pub fn row_record(row: &ListingRow) -> Vec<String> {
    vec![
        opt_str(&row.seller_state),
        opt_str(&row.seller_city),
        opt_str(&row.condition),
        opt_num(&row.base_price),
        opt_num(&row.price),
        opt_num(&row.shipping_local_pick_up),
        opt_num(&row.shipping_free_shipping),
        opt_str(&row.shipping_mode),
        opt_str(&row.payment_description),
        opt_str(&row.payment_type),
        opt_str(&row.listing_type_id),
        opt_str(&row.buying_mode),
        opt_str(&row.tag0),
        opt_num(&row.accepts_mercadopago),
        opt_num(&row.automatic_relist),
        opt_str(&row.status),
        opt_num(&row.initial_quantity),
        opt_num(&row.sold_quantity),
        opt_num(&row.available_quantity),
        opt_str(&row.warranty),
        opt_str(&row.title),
        opt_num(&row.pictures_width),
        opt_num(&row.pictures_height),
        opt_num(&row.pictures_max_width),
        opt_num(&row.pictures_max_height),
        opt_time(&row.start_time),
        opt_time(&row.stop_time),
        opt_time(&row.date_created),
        opt_time(&row.last_updated),
        opt_num(&row.seller_id),
        opt_str(&row.category_id),
    ]
}

/// Writes the processed table as `|`-separated CSV, the format the model
/// stage reads back.
pub fn write_rows_csv(path: &Path, rows: &[ListingRow]) -> Result<(), PreprocessError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().delimiter(b'|').from_path(path)?;
    writer.write_record(ROW_HEADER)?;
    for row in rows {
        writer.write_record(row_record(row))?;
    }
    writer.flush()?;
    Ok(())
}
