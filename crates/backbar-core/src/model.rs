use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub const DEFAULT_VENUE_NAME: &str = "Home Bar";
pub const MAX_INSTRUCTIONS_CHARS: usize = 256;
pub const DEFAULT_LANGUAGE: &str = "en";

/// Stable identifier assigned by the imported dataset.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RecipeId(pub String);

impl RecipeId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RecipeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecipeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

macro_rules! ulid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(value).map(Self)
            }
        }
    };
}

ulid_id!(UserRecipeId);
ulid_id!(VenueId);
ulid_id!(ProfileId);

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Ingredient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<String>,
}

impl Ingredient {
    #[must_use]
    pub fn new(name: &str, measure: Option<&str>) -> Self {
        Self { name: name.to_string(), measure: measure.map(str::to_string) }
    }
}

/// Imported catalog entry. Never mutated after load.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Recipe {
    pub id: RecipeId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_name: Option<String>,
    pub category: String,
    pub alcoholic: bool,
    pub glass: String,
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub instructions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<u32>,
}

impl Recipe {
    /// Instructions in `language`, falling back to English and then to any
    /// available translation.
    #[must_use]
    pub fn instructions_for(&self, language: &str) -> Option<&str> {
        self.instructions
            .get(language)
            .or_else(|| self.instructions.get(DEFAULT_LANGUAGE))
            .or_else(|| self.instructions.values().next())
            .map(String::as_str)
    }

    #[must_use]
    pub fn has_image(&self) -> bool {
        self.image.as_deref().is_some_and(|image| !image.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DatasetMetadata {
    pub export_date: String,
    pub count: usize,
    pub version: String,
}

/// Imported document: metadata plus recipes keyed by id.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Dataset {
    pub metadata: DatasetMetadata,
    pub recipes: BTreeMap<String, Recipe>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserRecipe {
    pub id: UserRecipeId,
    pub name: String,
    pub glass: String,
    pub instructions: String,
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub venue_ids: BTreeSet<VenueId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Venue {
    pub id: VenueId,
    pub name: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    /// Always empty for the default venue; its recipes are the favorites.
    #[serde(default)]
    pub cocktail_ids: BTreeSet<RecipeId>,
    #[serde(default)]
    pub custom_cocktail_ids: BTreeSet<UserRecipeId>,
    pub is_default: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Venue {
    pub(crate) fn new(name: &str, is_default: bool, now: OffsetDateTime) -> Self {
        Self {
            id: VenueId::new(),
            name: name.to_string(),
            ingredients: Vec::new(),
            cocktail_ids: BTreeSet::new(),
            custom_cocktail_ids: BTreeSet::new(),
            is_default,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn has_ingredient(&self, name: &str) -> bool {
        let needle = normalize_name(name);
        self.ingredients.iter().any(|existing| normalize_name(existing) == needle)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitSystem {
    #[default]
    Imperial,
    Metric,
}

impl UnitSystem {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imperial => "imperial",
            Self::Metric => "metric",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "imperial" => Some(Self::Imperial),
            "metric" => Some(Self::Metric),
            _ => None,
        }
    }
}

/// Entitlement signal supplied by the host application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    #[default]
    Free,
    Premium,
}

impl AccessTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "free" => Some(Self::Free),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub unit_system: UnitSystem,
    pub access_tier: AccessTier,
    pub language: String,
    pub show_images: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            unit_system: UnitSystem::default(),
            access_tier: AccessTier::default(),
            language: DEFAULT_LANGUAGE.to_string(),
            show_images: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct SettingsUpdate {
    pub unit_system: Option<UnitSystem>,
    pub access_tier: Option<AccessTier>,
    pub language: Option<String>,
    pub show_images: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct VenueUpdate {
    pub name: Option<String>,
    pub ingredients: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct UserRecipeUpdate {
    pub name: Option<String>,
    pub ingredients: Option<Vec<Ingredient>>,
    pub instructions: Option<String>,
    pub glass: Option<String>,
    pub venue_ids: Option<BTreeSet<VenueId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Profile {
    pub id: ProfileId,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub favorites: BTreeSet<RecipeId>,
    #[serde(default)]
    pub custom_cocktail_ids: BTreeSet<UserRecipeId>,
    pub venues: Vec<Venue>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Profile {
    pub(crate) fn new(now: OffsetDateTime) -> Self {
        Self {
            id: ProfileId::new(),
            settings: Settings::default(),
            favorites: BTreeSet::new(),
            custom_cocktail_ids: BTreeSet::new(),
            venues: vec![Venue::new(DEFAULT_VENUE_NAME, true, now)],
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn default_venue(&self) -> Option<&Venue> {
        self.venues.iter().find(|venue| venue.is_default)
    }

    #[must_use]
    pub fn venue(&self, id: VenueId) -> Option<&Venue> {
        self.venues.iter().find(|venue| venue.id == id)
    }

    #[must_use]
    pub fn is_favorite(&self, id: &RecipeId) -> bool {
        self.favorites.contains(id)
    }

    /// Recipe membership of `venue`. The default venue projects the favorites.
    #[must_use]
    pub fn venue_recipe_ids(&self, venue: &Venue) -> BTreeSet<RecipeId> {
        if venue.is_default {
            self.favorites.clone()
        } else {
            venue.cocktail_ids.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    UserAuthored,
    Imported,
}

impl Origin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserAuthored => "user_authored",
            Self::Imported => "imported",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(tag = "origin", content = "id", rename_all = "snake_case")]
pub enum CocktailId {
    UserAuthored(UserRecipeId),
    Imported(RecipeId),
}

/// Borrowed view over either kind of recipe.
#[derive(Debug, Clone, Copy)]
pub enum CocktailRef<'a> {
    UserAuthored(&'a UserRecipe),
    Imported(&'a Recipe),
}

impl<'a> CocktailRef<'a> {
    #[must_use]
    pub fn id(self) -> CocktailId {
        match self {
            Self::UserAuthored(recipe) => CocktailId::UserAuthored(recipe.id),
            Self::Imported(recipe) => CocktailId::Imported(recipe.id.clone()),
        }
    }

    #[must_use]
    pub fn origin(self) -> Origin {
        match self {
            Self::UserAuthored(_) => Origin::UserAuthored,
            Self::Imported(_) => Origin::Imported,
        }
    }

    #[must_use]
    pub fn name(self) -> &'a str {
        match self {
            Self::UserAuthored(recipe) => &recipe.name,
            Self::Imported(recipe) => &recipe.name,
        }
    }

    #[must_use]
    pub fn glass(self) -> &'a str {
        match self {
            Self::UserAuthored(recipe) => &recipe.glass,
            Self::Imported(recipe) => &recipe.glass,
        }
    }

    #[must_use]
    pub fn ingredients(self) -> &'a [Ingredient] {
        match self {
            Self::UserAuthored(recipe) => &recipe.ingredients,
            Self::Imported(recipe) => &recipe.ingredients,
        }
    }
}

/// Trimmed, lower-cased form used for every ingredient comparison.
#[must_use]
pub fn normalize_name(value: &str) -> String {
    value.trim().to_lowercase()
}
