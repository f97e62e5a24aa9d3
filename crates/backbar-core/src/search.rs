use crate::catalog::{
    compare_names, contains_all_ingredients, equals_ignoring_case, matches_query, RecipeCatalog,
    RecipeFilters,
};
use crate::model::{normalize_name, AccessTier, CocktailRef, Profile, Recipe, UserRecipe, Venue};

/// Tier a free profile may see. Recipes without a declared tier count as
/// this tier.
pub const UNRESTRICTED_TIER: u32 = 1;

#[must_use]
pub fn is_accessible(recipe: &Recipe, access: AccessTier) -> bool {
    match access {
        AccessTier::Premium => true,
        AccessTier::Free => matches!(recipe.tier, None | Some(UNRESTRICTED_TIER)),
    }
}

#[must_use]
pub fn gate_by_tier<'a>(
    recipes: impl IntoIterator<Item = &'a Recipe>,
    access: AccessTier,
) -> Vec<&'a Recipe> {
    recipes.into_iter().filter(|recipe| is_accessible(recipe, access)).collect()
}

/// User recipes carry no category, alcoholic flag, image or tier, so filters
/// on those attributes treat them as non-matching. Tier filters are ignored.
#[must_use]
pub fn user_recipe_matches(filters: &RecipeFilters, recipe: &UserRecipe) -> bool {
    if filters.alcoholic.is_some() || filters.category.is_some() {
        return false;
    }
    if filters.has_image == Some(true) {
        return false;
    }
    if !equals_ignoring_case(filters.glass.as_deref(), &recipe.glass) {
        return false;
    }
    contains_all_ingredients(&filters.ingredients, recipe.ingredients.iter().map(|i| &i.name))
}

/// Combined search over user-authored and imported recipes.
///
/// User-authored hits always come first. Order inside each group follows the
/// source iteration order and is not part of the contract.
#[must_use]
pub fn search<'a>(
    catalog: &'a RecipeCatalog,
    user_recipes: impl IntoIterator<Item = &'a UserRecipe>,
    query: &str,
    filters: &RecipeFilters,
    access: AccessTier,
) -> Vec<CocktailRef<'a>> {
    let normalized = normalize_name(query);
    let mut hits = user_recipes
        .into_iter()
        .filter(|recipe| {
            matches_query(&normalized, &recipe.name, None) && user_recipe_matches(filters, recipe)
        })
        .map(CocktailRef::UserAuthored)
        .collect::<Vec<_>>();

    let imported = catalog.search(query, filters);
    hits.extend(gate_by_tier(imported, access).into_iter().map(CocktailRef::Imported));

    tracing::debug!(query, hits = hits.len(), "combined search");
    hits
}

/// Recipes attached to one venue, as two separately sorted groups.
#[derive(Debug, Clone, Default)]
pub struct VenueListing<'a> {
    pub user_authored: Vec<&'a UserRecipe>,
    pub imported: Vec<&'a Recipe>,
}

impl<'a> VenueListing<'a> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.user_authored.len() + self.imported.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// User-authored group first, then imported.
    pub fn iter(&self) -> impl Iterator<Item = CocktailRef<'a>> + '_ {
        self.user_authored
            .iter()
            .map(|recipe| CocktailRef::UserAuthored(*recipe))
            .chain(self.imported.iter().map(|recipe| CocktailRef::Imported(*recipe)))
    }
}

/// Resolve `venue`'s recipe membership against the catalog and the owned user
/// recipes. Imported ids missing from the catalog are skipped.
#[must_use]
pub fn venue_listing<'a>(
    profile: &Profile,
    venue: &Venue,
    catalog: &'a RecipeCatalog,
    user_recipes: impl IntoIterator<Item = &'a UserRecipe>,
    access: AccessTier,
) -> VenueListing<'a> {
    let mut user_authored = user_recipes
        .into_iter()
        .filter(|recipe| venue.custom_cocktail_ids.contains(&recipe.id))
        .collect::<Vec<_>>();
    user_authored.sort_by(|lhs, rhs| {
        compare_names(&lhs.name, &rhs.name).then_with(|| lhs.id.cmp(&rhs.id))
    });

    let recipe_ids = profile.venue_recipe_ids(venue);
    let resolved = recipe_ids.iter().filter_map(|id| {
        let recipe = catalog.get_by_id(id);
        if recipe.is_none() {
            tracing::debug!(recipe = %id, venue = %venue.id, "venue references unknown recipe");
        }
        recipe
    });
    let mut imported = gate_by_tier(resolved, access);
    imported.sort_by(|lhs, rhs| {
        compare_names(&lhs.name, &rhs.name).then_with(|| lhs.id.cmp(&rhs.id))
    });

    VenueListing { user_authored, imported }
}
