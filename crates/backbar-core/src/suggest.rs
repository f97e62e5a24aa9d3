use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::catalog::compare_names;
use crate::model::{normalize_name, CocktailId, CocktailRef};

/// One scored candidate. `matched` and `missing` keep the recipe's own
/// spelling of each ingredient, in recipe order.
#[derive(Debug, Clone)]
pub struct Suggestion<'a> {
    pub cocktail: CocktailRef<'a>,
    pub match_count: usize,
    pub total_ingredients: usize,
    pub score: f64,
    pub matched: Vec<String>,
    pub missing: Vec<String>,
}

impl Suggestion<'_> {
    #[must_use]
    pub fn id(&self) -> CocktailId {
        self.cocktail.id()
    }
}

/// Rank `candidates` by how much of each recipe can be made from
/// `available`.
///
/// Candidates in `exclude` and candidates sharing no ingredient are dropped.
/// The result is ordered user-authored first, then by descending score,
/// descending match count, name, and id.
#[must_use]
pub fn suggest<'a>(
    available: impl IntoIterator<Item = impl AsRef<str>>,
    candidates: &[CocktailRef<'a>],
    exclude: &BTreeSet<CocktailId>,
) -> Vec<Suggestion<'a>> {
    let available = available
        .into_iter()
        .map(|name| normalize_name(name.as_ref()))
        .filter(|name| !name.is_empty())
        .collect::<HashSet<_>>();
    if available.is_empty() {
        return Vec::new();
    }

    let mut suggestions = candidates
        .iter()
        .filter(|candidate| !exclude.contains(&candidate.id()))
        .filter_map(|candidate| score_candidate(&available, *candidate))
        .collect::<Vec<_>>();
    suggestions.sort_by(compare_suggestions);
    suggestions
}

/// Ingredients the recipes need that the venue does not stock, de-duplicated
/// and sorted by name. Inventory matching is case-insensitive but exact.
#[must_use]
pub fn missing_ingredients<'a>(
    venue_recipes: impl IntoIterator<Item = CocktailRef<'a>>,
    venue_ingredients: &[String],
) -> Vec<String> {
    let stocked =
        venue_ingredients.iter().map(|name| normalize_name(name)).collect::<HashSet<_>>();

    let mut required = BTreeMap::new();
    for recipe in venue_recipes {
        for ingredient in recipe.ingredients() {
            let normalized = normalize_name(&ingredient.name);
            if normalized.is_empty() || stocked.contains(&normalized) {
                continue;
            }
            required.entry(normalized).or_insert_with(|| ingredient.name.trim().to_string());
        }
    }

    let mut missing = required.into_values().collect::<Vec<_>>();
    missing.sort_by(|lhs, rhs| compare_names(lhs, rhs));
    missing
}

#[allow(clippy::cast_precision_loss)]
fn score_candidate<'a>(
    available: &HashSet<String>,
    cocktail: CocktailRef<'a>,
) -> Option<Suggestion<'a>> {
    let mut seen = HashSet::new();
    let mut matched = Vec::new();
    let mut missing = Vec::new();
    for ingredient in cocktail.ingredients() {
        let normalized = normalize_name(&ingredient.name);
        if normalized.is_empty() || !seen.insert(normalized.clone()) {
            continue;
        }
        let display = ingredient.name.trim().to_string();
        if available.contains(&normalized) {
            matched.push(display);
        } else {
            missing.push(display);
        }
    }

    if matched.is_empty() {
        return None;
    }

    let match_count = matched.len();
    let total_ingredients = match_count + missing.len();
    Some(Suggestion {
        cocktail,
        match_count,
        total_ingredients,
        score: match_count as f64 / total_ingredients as f64,
        matched,
        missing,
    })
}

fn compare_suggestions(lhs: &Suggestion<'_>, rhs: &Suggestion<'_>) -> Ordering {
    lhs.cocktail
        .origin()
        .cmp(&rhs.cocktail.origin())
        .then_with(|| rhs.score.total_cmp(&lhs.score))
        .then_with(|| rhs.match_count.cmp(&lhs.match_count))
        .then_with(|| compare_names(lhs.cocktail.name(), rhs.cocktail.name()))
        .then_with(|| lhs.cocktail.id().cmp(&rhs.cocktail.id()))
}
