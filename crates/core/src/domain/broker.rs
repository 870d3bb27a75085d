use anyhow::ensure;
use serde::{Deserialize, Serialize};

/// One broker as seen by the chat responder at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
    /// Overall rating on a 0..=5 scale.
    pub rating: Option<f64>,
    pub min_deposit: Option<f64>,
    /// Average spread in pips.
    pub avg_spread: Option<f64>,
    /// Ratio as stored, e.g. "1:500".
    pub max_leverage: Option<String>,
    pub platforms: Vec<String>,
    pub regulations: Vec<String>,
}

impl BrokerSnapshot {
    /// Largest numeric component of the stored leverage ratio ("1:500", "500:1" and "500" all
    /// give 500). `None` when nothing numeric can be read.
    pub fn leverage_ratio(&self) -> Option<f64> {
        parse_leverage(self.max_leverage.as_deref()?)
    }

    pub fn regulation_label(&self) -> String {
        self.regulations.join(", ")
    }

    pub fn platform_label(&self) -> String {
        self.platforms.join(", ")
    }

    pub fn is_regulated_by(&self, label: &str) -> bool {
        contains_ignore_case(&self.regulation_label(), label)
    }

    pub fn supports_platform(&self, label: &str) -> bool {
        contains_ignore_case(&self.platform_label(), label)
    }
}

pub fn parse_leverage(raw: &str) -> Option<f64> {
    raw.split(':')
        .filter_map(|part| leading_number(part.trim()))
        .filter(|n| n.is_finite() && *n > 0.0)
        .fold(None, |best: Option<f64>, n| {
            Some(best.map_or(n, |b| b.max(n)))
        })
}

fn leading_number(s: &str) -> Option<f64> {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == ','))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let digits: String = s[..end].chars().filter(|c| *c != ',').collect();
    digits.parse::<f64>().ok()
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// A broker row as returned by the remote store. Every field except the name is optional and
/// several columns have historical aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrokerRow {
    #[serde(default)]
    pub id: Option<IdField>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub overall_rating: Option<NumberField>,
    #[serde(default)]
    pub avg_rating: Option<NumberField>,
    #[serde(default)]
    pub min_deposit: Option<NumberField>,
    #[serde(default)]
    pub avg_spread: Option<NumberField>,
    #[serde(default)]
    pub max_leverage: Option<TextField>,
    #[serde(default)]
    pub trading_platforms: Option<ListField>,
    #[serde(default)]
    pub platforms: Option<ListField>,
    #[serde(default)]
    pub regulations: Option<ListField>,
    #[serde(default)]
    pub regulation: Option<ListField>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IdField {
    Text(String),
    Number(i64),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumberField {
    Number(f64),
    Text(String),
}

impl NumberField {
    fn value(&self) -> Option<f64> {
        match self {
            NumberField::Number(n) => Some(*n),
            NumberField::Text(s) => s.trim().parse::<f64>().ok(),
        }
        .filter(|n| n.is_finite())
    }
}

/// Leverage is usually text ("1:500") but some rows store a bare number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TextField {
    Text(String),
    Number(f64),
}

impl TextField {
    fn value(&self) -> Option<String> {
        match self {
            TextField::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            TextField::Number(n) => Some(format!("1:{n}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ListField {
    List(Vec<String>),
    Text(String),
}

impl ListField {
    fn values(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            ListField::List(items) => items.iter().map(String::as_str).collect(),
            ListField::Text(s) => s.split(',').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl BrokerRow {
    pub fn is_active(&self) -> bool {
        self.is_active.unwrap_or(true)
    }

    pub fn validate_and_into_snapshot(self) -> anyhow::Result<BrokerSnapshot> {
        let name = self.name.as_deref().unwrap_or_default().trim().to_string();
        ensure!(!name.is_empty(), "broker name must be non-empty");

        let id = match &self.id {
            Some(IdField::Text(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(IdField::Number(n)) => n.to_string(),
            _ => name.clone(),
        };

        let rating = self
            .overall_rating
            .as_ref()
            .or(self.avg_rating.as_ref())
            .and_then(NumberField::value);
        if let Some(rating) = rating {
            ensure!(
                (0.0..=5.0).contains(&rating),
                "rating must be between 0 and 5 (got {rating}) for broker {name}"
            );
        }

        let country = self
            .country
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(BrokerSnapshot {
            id,
            name,
            country,
            rating,
            min_deposit: self.min_deposit.as_ref().and_then(NumberField::value),
            avg_spread: self.avg_spread.as_ref().and_then(NumberField::value),
            max_leverage: self.max_leverage.as_ref().and_then(TextField::value),
            platforms: self
                .trading_platforms
                .as_ref()
                .or(self.platforms.as_ref())
                .map(ListField::values)
                .unwrap_or_default(),
            regulations: self
                .regulations
                .as_ref()
                .or(self.regulation.as_ref())
                .map(ListField::values)
                .unwrap_or_default(),
        })
    }
}

/// Decodes active rows, skipping (and logging) rows that fail validation so one bad row does not
/// blank the whole catalog.
pub fn snapshots_from_rows(rows: Vec<BrokerRow>) -> Vec<BrokerSnapshot> {
    let mut out = Vec::with_capacity(rows.len());
    for (idx, row) in rows.into_iter().enumerate() {
        if !row.is_active() {
            continue;
        }
        match row.validate_and_into_snapshot() {
            Ok(snapshot) => out.push(snapshot),
            Err(err) => {
                tracing::warn!(idx, error = %err, "skipping invalid broker row");
            }
        }
    }
    out
}
