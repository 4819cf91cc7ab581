use std::{collections::BTreeMap, fmt, ops::RangeInclusive};

use serde::{de, Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Health tier assigned by the vision model.
///
/// Matching is case-sensitive. The legacy `Moderately Healthy` / `Unhealthy`
/// labels are not accepted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Category {
    Healthy,
    Balanced,
    Indulgent,
}

impl Category {
    /// Score band the model is asked to respect for this tier.
    pub fn band(self) -> RangeInclusive<u8> {
        match self {
            Category::Healthy => 75..=100,
            Category::Balanced => 50..=74,
            Category::Indulgent => 0..=49,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Healthy => "Healthy",
            Category::Balanced => "Balanced",
            Category::Indulgent => "Indulgent",
        };
        f.write_str(s)
    }
}

/// Macronutrients in grams.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Macros {
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
}

impl Macros {
    pub(crate) fn fields(&self) -> [(&'static str, f64); 5] {
        [
            ("macros.protein", self.protein),
            ("macros.carbs", self.carbs),
            ("macros.fat", self.fat),
            ("macros.fiber", self.fiber),
            ("macros.sugar", self.sugar),
        ]
    }
}

/// Nutrition payload produced by the vision model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MealAnalysis {
    pub food_name: String,
    pub serving_size: String,
    pub calories: f64,
    pub macros: Macros,
    #[serde(deserialize_with = "micros_as_text")]
    pub micros: BTreeMap<String, String>,
    pub ingredients: Vec<String>,
    pub category: Category,
    #[serde(deserialize_with = "rounded_score")]
    pub score: u8,
    pub emoji: String,
    pub short_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooking_method: Option<String>,
    #[serde(default)]
    pub health_warnings: Vec<String>,
    #[serde(default)]
    pub dietary_tags: Vec<String>,
    #[serde(default)]
    pub benefits: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portion_advice: Option<String>,
}

/// A stored analysis as listed in the history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MealRecord {
    pub id: Uuid,
    pub image_url: String,
    pub analysis: MealAnalysis,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Input to `MealStore::append`; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMeal {
    pub image_url: String,
    pub analysis: MealAnalysis,
}

// Models sometimes answer `"Iron": 18` instead of `"Iron": "18%"`.
fn micros_as_text<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Quantity {
        Text(String),
        Number(serde_json::Number),
    }

    let raw = BTreeMap::<String, Quantity>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Quantity::Text(s) => s,
                Quantity::Number(n) => n.to_string(),
            };
            (k, v)
        })
        .collect())
}

fn rounded_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let v = f64::deserialize(deserializer)?;
    if !v.is_finite() || !(0.0..=100.0).contains(&v) {
        return Err(de::Error::custom(format!(
            "score must be between 0 and 100, got {v}"
        )));
    }
    Ok(v.round() as u8)
}
