//! Instruction sent alongside every uploaded image.

const ROLE: &str = "You are an expert AI nutritionist with deep knowledge of global cuisines, \
cooking methods, and nutritional science.";

const STEPS: &[&str] = &[
    "IDENTIFY: Recognize the exact dish name, cuisine type, and cooking method",
    "PORTION: Estimate the serving size based on visible cues (plate size, utensils, portions)",
    "INGREDIENTS: List all visible ingredients and detect hidden ones based on dish type",
    "NUTRITION: Calculate accurate macros and micros based on ingredients and cooking method",
    "CATEGORIZE: Classify health level and provide actionable insights",
    "WARNINGS: Identify potential allergens, high sodium, added sugars, or health concerns",
];

const RULES: &[(&str, &str, &str)] = &[
    (
        "Healthy",
        "75-100",
        "Whole foods, lean proteins, vegetables, fruits, minimal processing, balanced macros",
    ),
    (
        "Balanced",
        "50-74",
        "Home-cooked, moderate portions, mix of food groups, some processed ingredients",
    ),
    (
        "Indulgent",
        "0-49",
        "High calorie, fried, processed, fast food, high sugar/sodium, poor nutrient density",
    ),
];

const ACCURACY: &[&str] = &[
    "Adjust calories based on visible portion size and cooking method",
    "Account for cooking oils, sauces, and hidden ingredients",
    "Consider regional variations of dishes",
    "Provide realistic micronutrient estimates",
    "Include dietary tags (vegan, vegetarian, gluten-free, dairy-free, keto-friendly, etc.)",
];

const SHAPE: &str = r#"{
  "foodName": "Exact dish name with cuisine (e.g., 'Chicken Tikka Masala (Indian)', 'California Roll (Japanese)')",
  "servingSize": "Precise portion (e.g., '1 medium bowl (350g)', '2 slices (180g)', '1 plate (400g)')",
  "calories": 420,
  "macros": {
    "protein": 28,
    "carbs": 45,
    "fat": 15,
    "fiber": 8,
    "sugar": 6
  },
  "micros": {
    "Iron": "18%",
    "Vitamin C": "35mg",
    "Calcium": "15%",
    "Vitamin A": "12%",
    "Potassium": "450mg",
    "Sodium": "680mg"
  },
  "ingredients": ["Primary ingredient 1", "Primary ingredient 2", "Sauce/seasoning", "Garnish"],
  "cookingMethod": "Grilled|Fried|Steamed|Baked|Raw|Boiled|Sautéed",
  "category": "Healthy|Balanced|Indulgent",
  "score": 82,
  "emoji": "🥗",
  "shortDescription": "One-sentence nutritional summary with key benefit or concern",
  "healthWarnings": ["High in sodium", "Contains gluten", "Fried in oil"],
  "dietaryTags": ["Vegetarian", "High-protein", "Low-carb"],
  "benefits": ["Rich in protein", "Good source of fiber", "Contains antioxidants"],
  "portionAdvice": "Appropriate|Large|Small - brief comment on portion size"
}"#;

struct Example {
    dish: &'static str,
    category: &'static str,
    score: u8,
    warnings: &'static [&'static str],
    tags: &'static [&'static str],
}

const EXAMPLES: &[Example] = &[
    Example {
        dish: "Grilled Chicken Salad",
        category: "Healthy",
        score: 88,
        warnings: &[],
        tags: &["High-protein", "Low-carb", "Gluten-free"],
    },
    Example {
        dish: "Pepperoni Pizza",
        category: "Indulgent",
        score: 35,
        warnings: &["High in sodium", "High in saturated fat"],
        tags: &[],
    },
    Example {
        dish: "Dal Tadka with Rice",
        category: "Balanced",
        score: 68,
        warnings: &[],
        tags: &["Vegetarian", "High-fiber", "Vegan"],
    },
    Example {
        dish: "Double Cheeseburger",
        category: "Indulgent",
        score: 28,
        warnings: &["High in saturated fat", "Processed meat"],
        tags: &[],
    },
    Example {
        dish: "Quinoa Buddha Bowl",
        category: "Healthy",
        score: 92,
        warnings: &[],
        tags: &["Vegan", "High-fiber", "Gluten-free"],
    },
];

fn quoted_list(items: &[&str]) -> String {
    let inner: Vec<String> = items.iter().map(|s| format!("\"{s}\"")).collect();
    format!("[{}]", inner.join(", "))
}

/// Builds the analysis instruction. Pure; the same text every call.
pub fn build_prompt() -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(ROLE);

    out.push_str("\n\nANALYSIS STEPS:\n");
    for (i, step) in STEPS.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }

    out.push_str("\nCATEGORIZATION RULES:\n");
    for (name, band, rule) in RULES {
        out.push_str(&format!("- \"{name}\" (Score {band}): {rule}\n"));
    }

    out.push_str("\nACCURACY REQUIREMENTS:\n");
    for req in ACCURACY {
        out.push_str(&format!("- {req}\n"));
    }

    out.push_str("\nReturn ONLY valid JSON (no markdown, no code fences, no explanations).\n");
    out.push_str("healthWarnings and dietaryTags may be empty arrays [].\n");
    out.push_str(SHAPE);

    out.push_str("\n\nEXAMPLES:\n");
    for (i, ex) in EXAMPLES.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} → \"{}\", score: {}, warnings: {}, tags: {}\n",
            i + 1,
            ex.dish,
            ex.category,
            ex.score,
            quoted_list(ex.warnings),
            quoted_list(ex.tags),
        ));
    }

    out.push_str("\nBe precise, realistic, and helpful. Focus on actionable nutritional insights.");
    out
}
