use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Serialised as the lowercase variant name. Deserialisation goes through
/// [`Category::parse_loose`], so labels such as `DESSERTS`, unknown strings,
/// `null` and non-string values are all accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase", from = "CategoryInput")]
#[ts(export, export_to = "bindings/")]
pub enum Category {
    Starter,
    Main,
    Dessert,
    #[default]
    Unclassified,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Starter => "starter",
            Category::Main => "main",
            Category::Dessert => "dessert",
            Category::Unclassified => "unclassified",
        }
    }

    /// Lenient parse that also understands the generator's French labels
    /// (`ENTRÉES`, `PLATS`, `DESSERTS`). Unknown values are unclassified.
    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "starter" | "entrée" | "entrées" | "entree" | "entrees" => Category::Starter,
            "main" | "plat" | "plats" => Category::Main,
            "dessert" | "desserts" => Category::Dessert,
            _ => Category::Unclassified,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CategoryInput {
    Label(String),
    Other(serde::de::IgnoredAny),
}

impl From<CategoryInput> for Category {
    fn from(input: CategoryInput) -> Self {
        match input {
            CategoryInput::Label(label) => Category::parse_loose(&label),
            CategoryInput::Other(_) => Category::Unclassified,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct IngredientGroup {
    #[serde(default, alias = "section")]
    pub label: Option<String>,
    #[serde(default)]
    pub items: Vec<String>,
}

/// One instruction step; the illustration is a data URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(from = "StepInput")]
#[ts(export, export_to = "bindings/")]
pub struct Step {
    pub text: String,
    pub illustration: Option<String>,
}

impl Step {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            illustration: None,
        }
    }

    pub fn illustrated(text: impl Into<String>, illustration: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            illustration: Some(illustration.into()),
        }
    }
}

/// Steps arrive either as bare strings or as `{text, illustration}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum StepInput {
    Plain(String),
    Rich {
        text: String,
        #[serde(default)]
        illustration: Option<String>,
    },
}

impl From<StepInput> for Step {
    fn from(input: StepInput) -> Self {
        match input {
            StepInput::Plain(text) => Step::text(text),
            StepInput::Rich { text, illustration } => Step { text, illustration },
        }
    }
}

/// Scalar metadata and ingredients, stored and returned verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct RecipeDetails {
    pub title: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub servings: Option<String>,
    #[serde(default)]
    pub prep_duration: Option<String>,
    #[serde(default)]
    pub cook_duration: Option<String>,
    #[serde(default)]
    pub rest_duration: Option<String>,
    #[serde(default)]
    pub chef_comment: Option<String>,
    #[serde(default)]
    pub ingredient_groups: Vec<IngredientGroup>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A recipe as handed over by the generation pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct DraftRecipe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub details: RecipeDetails,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub primary_image: Option<String>,
}

/// Returned by `save`: the caller's recipe plus its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SavedRecipe {
    pub id: String,
    #[ts(type = "number")]
    pub saved_at: i64,
    #[serde(flatten)]
    pub details: RecipeDetails,
    pub steps: Vec<Step>,
    pub primary_image: Option<String>,
}

/// A stored recipe with every image rendered back to a data URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct FullRecipe {
    pub id: String,
    #[ts(type = "number")]
    pub saved_at: i64,
    #[serde(flatten)]
    pub details: RecipeDetails,
    pub steps: Vec<Step>,
    pub primary_image: Option<String>,
    pub thumbnail_image: Option<String>,
}

/// Listing entry; carries the thumbnail only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SummaryRecipe {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub servings: Option<String>,
    pub prep_duration: Option<String>,
    pub cook_duration: Option<String>,
    #[ts(type = "number")]
    pub saved_at: i64,
    pub thumbnail_image: Option<String>,
}
