use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::round_money;
use crate::error::Error;
use crate::models::{LessonType, PricingEntry};
use crate::store::InstituteStore;

pub const DEFAULT_INDIVIDUAL_PRICE: Decimal = Decimal::from_parts(45, 0, 0, false, 0);
pub const DEFAULT_GROUP_PRICE: Decimal = Decimal::from_parts(28, 0, 0, false, 0);
pub const DEFAULT_CURRENCY: &str = "USD";

/// Subjects offered to administrators by `populate-pricing`.
pub const DEFAULT_SUBJECTS: [(&str, u32, u32); 15] = [
    ("Mathematics", 50, 30),
    ("Physics", 55, 35),
    ("Chemistry", 55, 35),
    ("Biology", 50, 30),
    ("English", 45, 25),
    ("History", 40, 25),
    ("Geography", 40, 25),
    ("Computer Science", 60, 40),
    ("Programming", 65, 45),
    ("Arabic", 45, 25),
    ("French", 50, 30),
    ("Spanish", 50, 30),
    ("Music", 55, 35),
    ("Art", 50, 30),
    ("Physical Education", 40, 20),
];

/// Hard-coded rate sheet used before pricing moved into the database.
const BUILTIN_PRICES: [(&str, u32, u32); 15] = [
    ("math", 50, 30),
    ("arabic", 60, 35),
    ("english", 55, 32),
    ("science", 50, 30),
    ("physics", 55, 33),
    ("chemistry", 55, 33),
    ("biology", 50, 30),
    ("history", 45, 28),
    ("geography", 45, 28),
    ("computer_science", 60, 35),
    ("programming", 65, 40),
    ("music", 40, 25),
    ("art", 40, 25),
    ("sports", 35, 22),
    ("other", 45, 28),
];

pub fn normalize_subject(subject: &str) -> String {
    subject.trim().to_lowercase()
}

pub fn default_price(lesson_type: LessonType) -> Decimal {
    match lesson_type {
        LessonType::Individual => DEFAULT_INDIVIDUAL_PRICE,
        LessonType::Group => DEFAULT_GROUP_PRICE,
    }
}

/// Rate for `lesson_type` from `entry`, or the system default.
pub fn resolve_price(entry: Option<&PricingEntry>, lesson_type: &str) -> Decimal {
    let tier = LessonType::lenient(lesson_type);
    entry
        .and_then(|e| e.rate_for(tier))
        .unwrap_or_else(|| default_price(tier))
}

/// `hours * price_per_hour`, rounded half up to cents.
///
/// Hours are taken to four decimal places before multiplying.
pub fn apply_rate(hours: f64, price_per_hour: Decimal) -> Decimal {
    let hours = Decimal::new((hours * 10_000.0).round() as i64, 4);
    round_money(hours * price_per_hour)
}

fn whole_units(amount: u32) -> Decimal {
    Decimal::from(amount)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectPrice {
    pub individual: Decimal,
    pub group: Decimal,
    pub currency: String,
}

impl SubjectPrice {
    fn from_entry(entry: &PricingEntry) -> Self {
        Self {
            individual: entry
                .individual_price
                .unwrap_or(DEFAULT_INDIVIDUAL_PRICE),
            group: entry.group_price.unwrap_or(DEFAULT_GROUP_PRICE),
            currency: entry.currency.clone(),
        }
    }
}

/// Resolves a subject and lesson type to an hourly rate.
///
/// Lookups ignore case and surrounding whitespace. Unknown subjects, and
/// entries without a rate for the requested tier, resolve to
/// [`DEFAULT_INDIVIDUAL_PRICE`] / [`DEFAULT_GROUP_PRICE`]; a missing price is
/// never an error.
#[async_trait]
pub trait PricingCatalog: Send + Sync {
    async fn get_price(&self, subject: &str, lesson_type: &str) -> Result<Decimal, Error>;

    /// Active rates keyed by lowercased subject.
    async fn get_all_prices(&self) -> Result<BTreeMap<String, SubjectPrice>, Error>;

    async fn calculate_earnings(
        &self,
        hours: f64,
        subject: &str,
        lesson_type: &str,
    ) -> Result<Decimal, Error> {
        let price = self.get_price(subject, lesson_type).await?;
        Ok(apply_rate(hours, price))
    }
}

/// Catalog reading the store's active pricing on every call.
pub struct StoreCatalog<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: InstituteStore + ?Sized> StoreCatalog<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: InstituteStore + ?Sized> PricingCatalog for StoreCatalog<'_, S> {
    async fn get_price(&self, subject: &str, lesson_type: &str) -> Result<Decimal, Error> {
        let entry = self.store.find_active_pricing(subject.trim()).await?;
        if entry.is_none() {
            debug!(subject, lesson_type, "no active pricing, using default rate");
        }
        Ok(resolve_price(entry.as_ref(), lesson_type))
    }

    async fn get_all_prices(&self) -> Result<BTreeMap<String, SubjectPrice>, Error> {
        let entries = self.store.active_pricing().await?;
        Ok(PriceTable::from_entries(entries).prices())
    }
}

/// Fixed in-memory rate sheet.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    entries: HashMap<String, PricingEntry>,
}

impl PriceTable {
    /// Keeps active entries only; the first entry wins for a repeated subject.
    pub fn from_entries(entries: impl IntoIterator<Item = PricingEntry>) -> Self {
        let mut table = HashMap::new();
        for entry in entries.into_iter().filter(|e| e.is_active) {
            table
                .entry(normalize_subject(&entry.subject))
                .or_insert(entry);
        }
        Self { entries: table }
    }

    pub fn builtin() -> Self {
        Self::from_entries(
            BUILTIN_PRICES
                .iter()
                .map(|(subject, individual, group)| {
                    PricingEntry::new(
                        subject,
                        whole_units(*individual),
                        whole_units(*group),
                        DEFAULT_CURRENCY,
                    )
                }),
        )
    }

    pub fn price(&self, subject: &str, lesson_type: &str) -> Decimal {
        resolve_price(self.entries.get(&normalize_subject(subject)), lesson_type)
    }

    pub fn prices(&self) -> BTreeMap<String, SubjectPrice> {
        self.entries
            .iter()
            .map(|(subject, entry)| (subject.clone(), SubjectPrice::from_entry(entry)))
            .collect()
    }
}

#[async_trait]
impl PricingCatalog for PriceTable {
    async fn get_price(&self, subject: &str, lesson_type: &str) -> Result<Decimal, Error> {
        Ok(self.price(subject, lesson_type))
    }

    async fn get_all_prices(&self) -> Result<BTreeMap<String, SubjectPrice>, Error> {
        Ok(self.prices())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulateError {
    pub subject: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulateSummary {
    pub created: usize,
    pub skipped: usize,
    pub total_subjects: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PopulateError>,
}

/// Insert `entries` whose subject is not yet priced. Existing subjects are
/// skipped, whatever their active flag.
pub async fn populate<S: InstituteStore + ?Sized>(
    store: &S,
    entries: Vec<PricingEntry>,
) -> Result<PopulateSummary, Error> {
    let mut summary = PopulateSummary {
        total_subjects: entries.len(),
        ..PopulateSummary::default()
    };

    for entry in entries {
        if store.pricing_subject_exists(&entry.subject).await? {
            summary.skipped += 1;
            continue;
        }
        match store.insert_pricing(&entry).await {
            Ok(()) => summary.created += 1,
            Err(err) => {
                warn!(subject = %entry.subject, error = %err, "failed to insert pricing");
                summary.errors.push(PopulateError {
                    subject: entry.subject.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    info!(
        created = summary.created,
        skipped = summary.skipped,
        "pricing population finished"
    );
    Ok(summary)
}

pub async fn populate_defaults<S: InstituteStore + ?Sized>(
    store: &S,
) -> Result<PopulateSummary, Error> {
    let entries = DEFAULT_SUBJECTS
        .iter()
        .map(|(subject, individual, group)| {
            PricingEntry::new(
                subject,
                whole_units(*individual),
                whole_units(*group),
                DEFAULT_CURRENCY,
            )
        })
        .collect();
    populate(store, entries).await
}

/// Custom population from a CSV with `subject,individual_price,group_price[,currency]`.
pub async fn import_pricing_csv<S: InstituteStore + ?Sized>(
    store: &S,
    csv_path: &Path,
) -> Result<PopulateSummary, Error> {
    #[derive(Deserialize)]
    struct CsvRow {
        subject: Option<String>,
        individual_price: Option<String>,
        group_price: Option<String>,
        currency: Option<String>,
    }

    fn parse_price(value: Option<&str>) -> Option<Decimal> {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse::<Decimal>().ok())
            .filter(|price| *price > Decimal::ZERO)
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut valid = Vec::new();
    let mut rejected = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let subject = row
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let individual = parse_price(row.individual_price.as_deref());
        let group = parse_price(row.group_price.as_deref());
        match (subject, individual, group) {
            (Some(subject), Some(individual), Some(group)) => {
                let currency = row
                    .currency
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .unwrap_or(DEFAULT_CURRENCY);
                valid.push(PricingEntry::new(subject, individual, group, currency));
            }
            (subject, _, _) => rejected.push(PopulateError {
                subject: subject.unwrap_or("Unknown").to_string(),
                error: "Missing required fields: subject, individual_price, group_price"
                    .to_string(),
            }),
        }
    }

    let mut summary = populate(store, valid).await?;
    summary.total_subjects += rejected.len();
    summary.errors.extend(rejected);
    Ok(summary)
}
