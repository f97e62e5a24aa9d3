pub mod catalog;
pub mod error;
pub mod kv;
pub mod model;
pub mod profile;
pub mod search;
pub mod suggest;
pub mod units;

#[cfg(test)]
mod test_support;

pub use catalog::{compare_names, IngredientFrequency, RecipeCatalog, RecipeFilters};
pub use error::{BackbarError, EntityKind};
pub use kv::{KeyValueStore, MemoryStore};
pub use model::{
    normalize_name, AccessTier, CocktailId, CocktailRef, Dataset, DatasetMetadata, Ingredient,
    Origin, Profile, ProfileId, Recipe, RecipeId, Settings, SettingsUpdate, UnitSystem,
    UserRecipe, UserRecipeId, UserRecipeUpdate, Venue, VenueId, VenueUpdate, DEFAULT_VENUE_NAME,
    MAX_INSTRUCTIONS_CHARS,
};
pub use profile::{ClearSummary, ListenerId, NewUserRecipe, ProfileStore};
pub use search::{gate_by_tier, venue_listing, VenueListing, UNRESTRICTED_TIER};
pub use suggest::{missing_ingredients, suggest, Suggestion};
pub use units::{convert, convert_ingredient, has_convertible_units};
