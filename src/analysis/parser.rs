use lazy_static::lazy_static;
use regex::Regex;

use crate::meals::MealAnalysis;

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("model output is not a valid analysis: {reason} (raw: {excerpt:?})")]
    Malformed { reason: String, excerpt: String },
    #[error("invalid `{field}`: {reason} (raw: {excerpt:?})")]
    Invalid {
        field: &'static str,
        reason: String,
        excerpt: String,
    },
}

lazy_static! {
    static ref FENCE_RE: Regex = Regex::new(r"```[A-Za-z0-9_+-]*").unwrap();
}

/// Removes markdown code fences (```` ``` ```` plus an optional language tag)
/// wherever they occur, then trims.
pub fn strip_code_fences(raw: &str) -> String {
    FENCE_RE.replace_all(raw, "").trim().to_string()
}

/// Turns raw model text into a validated analysis.
pub fn parse_analysis(raw: &str) -> Result<MealAnalysis, ParseError> {
    let cleaned = strip_code_fences(raw);

    let analysis: MealAnalysis =
        serde_json::from_str(&cleaned).map_err(|e| ParseError::Malformed {
            reason: e.to_string(),
            excerpt: excerpt(raw),
        })?;

    validate(&analysis).map_err(|(field, reason)| ParseError::Invalid {
        field,
        reason,
        excerpt: excerpt(raw),
    })?;

    if !analysis.category.band().contains(&analysis.score) {
        tracing::warn!(
            category = %analysis.category,
            score = analysis.score,
            "score outside its category band"
        );
    }

    Ok(analysis)
}

fn validate(a: &MealAnalysis) -> Result<(), (&'static str, String)> {
    if a.food_name.trim().is_empty() {
        return Err(("foodName", "must not be empty".into()));
    }
    check_quantity("calories", a.calories)?;
    for (field, value) in a.macros.fields() {
        check_quantity(field, value)?;
    }
    Ok(())
}

fn check_quantity(field: &'static str, v: f64) -> Result<(), (&'static str, String)> {
    if !v.is_finite() {
        return Err((field, format!("must be a finite number, got {v}")));
    }
    if v < 0.0 {
        return Err((field, format!("must not be negative, got {v}")));
    }
    Ok(())
}

/// First few hundred characters of `raw`, for logs and error messages.
pub(crate) fn excerpt(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meals::Category;

    const PIZZA: &str = r#"{"foodName":"Pizza","servingSize":"2 slices (180g)","calories":570,
        "macros":{"protein":24,"carbs":66,"fat":22,"fiber":3,"sugar":7},
        "micros":{"Sodium":"1200mg","Calcium":"30%"},
        "ingredients":["Dough","Tomato sauce","Mozzarella","Pepperoni"],
        "category":"Indulgent","score":35,"emoji":"🍕",
        "shortDescription":"Tasty but heavy in sodium and saturated fat."}"#;

    fn full_json() -> serde_json::Value {
        serde_json::json!({
            "foodName": "Grilled Chicken Salad",
            "servingSize": "1 bowl (350g)",
            "calories": 320.5,
            "macros": {"protein": 35, "carbs": 12, "fat": 14, "fiber": 5, "sugar": 4},
            "micros": {"Iron": "12%", "Vitamin C": "40mg"},
            "ingredients": ["Chicken breast", "Lettuce", "Olive oil"],
            "cookingMethod": "Grilled",
            "category": "Healthy",
            "score": 88,
            "emoji": "🥗",
            "shortDescription": "Lean protein with plenty of greens.",
            "healthWarnings": [],
            "dietaryTags": ["High-protein", "Gluten-free"],
            "benefits": ["Rich in protein"],
            "portionAdvice": "Appropriate - a filling lunch"
        })
    }

    #[test]
    fn parses_fenced_pizza() {
        let raw = format!("```json\n{PIZZA}\n```");
        let a = parse_analysis(&raw).expect("parses");
        assert_eq!(a.food_name, "Pizza");
        assert_eq!(a.category, Category::Indulgent);
        assert_eq!(a.score, 35);
        assert!(!a.food_name.contains('`'));
        assert!(!a.short_description.contains('`'));
        assert!(a.health_warnings.is_empty());
        assert_eq!(a.cooking_method, None);
    }

    #[test]
    fn fenced_and_bare_text_parse_the_same() {
        let bare = parse_analysis(PIZZA).unwrap();
        for wrapped in [
            format!("```json\n{PIZZA}\n```"),
            format!("```\n{PIZZA}\n```"),
            format!("  \n```JSON {PIZZA}```  \n"),
        ] {
            assert_eq!(parse_analysis(&wrapped).unwrap(), bare, "{wrapped}");
        }
    }

    #[test]
    fn strip_leaves_clean_text_alone() {
        assert_eq!(strip_code_fences("  {\"a\":1}\n"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn full_analysis_round_trips() {
        let original = parse_analysis(&full_json().to_string()).unwrap();
        assert_eq!(original.cooking_method.as_deref(), Some("Grilled"));
        assert_eq!(original.dietary_tags.len(), 2);

        let text = serde_json::to_string(&original).unwrap();
        let reparsed = parse_analysis(&text).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn not_json_is_malformed() {
        let err = parse_analysis("not json at all").unwrap_err();
        match err {
            ParseError::Malformed { excerpt, .. } => assert_eq!(excerpt, "not json at all"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let mut v = full_json();
        v.as_object_mut().unwrap().remove("emoji");
        let err = parse_analysis(&v.to_string()).unwrap_err();
        assert!(err.to_string().contains("emoji"), "{err}");
    }

    #[test]
    fn missing_macro_is_rejected() {
        let mut v = full_json();
        v["macros"].as_object_mut().unwrap().remove("sugar");
        assert!(parse_analysis(&v.to_string()).is_err());
    }

    #[test]
    fn category_must_match_exactly() {
        let mut v = full_json();
        v["category"] = "healthy".into();
        assert!(parse_analysis(&v.to_string()).is_err());
        v["category"] = "Moderately Healthy".into();
        assert!(parse_analysis(&v.to_string()).is_err());
    }

    #[test]
    fn numbers_must_be_numbers() {
        let mut v = full_json();
        v["calories"] = "320 kcal".into();
        assert!(parse_analysis(&v.to_string()).is_err());
    }

    #[test]
    fn negative_and_empty_values_are_invalid() {
        let mut v = full_json();
        v["calories"] = (-5).into();
        match parse_analysis(&v.to_string()).unwrap_err() {
            ParseError::Invalid { field, .. } => assert_eq!(field, "calories"),
            other => panic!("unexpected {other:?}"),
        }

        let mut v = full_json();
        v["macros"]["fat"] = (-1.5).into();
        match parse_analysis(&v.to_string()).unwrap_err() {
            ParseError::Invalid { field, .. } => assert_eq!(field, "macros.fat"),
            other => panic!("unexpected {other:?}"),
        }

        let mut v = full_json();
        v["foodName"] = "   ".into();
        match parse_analysis(&v.to_string()).unwrap_err() {
            ParseError::Invalid { field, .. } => assert_eq!(field, "foodName"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn score_is_bounded_and_rounded() {
        let mut v = full_json();
        v["score"] = 87.6.into();
        assert_eq!(parse_analysis(&v.to_string()).unwrap().score, 88);

        v["score"] = 140.into();
        assert!(parse_analysis(&v.to_string()).is_err());
        v["score"] = (-1).into();
        assert!(parse_analysis(&v.to_string()).is_err());
    }

    #[test]
    fn numeric_micros_become_text() {
        let mut v = full_json();
        v["micros"] = serde_json::json!({"Iron": 18, "Sodium": "680mg"});
        let a = parse_analysis(&v.to_string()).unwrap();
        assert_eq!(a.micros["Iron"], "18");
        assert_eq!(a.micros["Sodium"], "680mg");
    }

    #[test]
    fn excerpt_is_truncated_on_char_boundary() {
        let raw = "é".repeat(500);
        let err = parse_analysis(&raw).unwrap_err();
        let ParseError::Malformed { excerpt, .. } = err else {
            panic!("expected malformed");
        };
        assert_eq!(excerpt.chars().count(), EXCERPT_CHARS + 1);
        assert!(excerpt.ends_with('…'));
    }
}
