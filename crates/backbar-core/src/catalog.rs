use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::BackbarError;
use crate::kv::{load_json, save_json, KeyValueStore};
use crate::model::{normalize_name, Dataset, DatasetMetadata, Recipe, RecipeId};

pub const DATASET_CACHE_KEY: &str = "catalog:dataset";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct IngredientFrequency {
    pub name: String,
    pub count: usize,
}

/// Attribute predicates, combined with AND. `None`/empty means "any".
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct RecipeFilters {
    pub alcoholic: Option<bool>,
    pub category: Option<String>,
    pub glass: Option<String>,
    pub has_image: Option<bool>,
    #[serde(default)]
    pub ingredients: Vec<String>,
    pub tier: Option<u32>,
}

impl RecipeFilters {
    #[must_use]
    pub fn matches(&self, recipe: &Recipe) -> bool {
        if self.alcoholic.is_some_and(|alcoholic| alcoholic != recipe.alcoholic) {
            return false;
        }
        if !equals_ignoring_case(self.category.as_deref(), &recipe.category) {
            return false;
        }
        if !equals_ignoring_case(self.glass.as_deref(), &recipe.glass) {
            return false;
        }
        if self.has_image.is_some_and(|wanted| wanted != recipe.has_image()) {
            return false;
        }
        if self.tier.is_some_and(|tier| recipe.tier != Some(tier)) {
            return false;
        }
        contains_all_ingredients(&self.ingredients, recipe.ingredients.iter().map(|i| &i.name))
    }
}

/// Immutable imported recipe set plus its derived ingredient index.
#[derive(Debug, Clone, Default)]
pub struct RecipeCatalog {
    metadata: Option<DatasetMetadata>,
    recipes: HashMap<RecipeId, Recipe>,
    order: Vec<RecipeId>,
    frequency: Vec<IngredientFrequency>,
}

impl RecipeCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole recipe set with `dataset`.
    ///
    /// # Errors
    /// Returns [`BackbarError::Import`] when the dataset is structurally invalid;
    /// the previously loaded recipes are kept in that case.
    pub fn load(&mut self, dataset: Dataset) -> Result<(), BackbarError> {
        validate_dataset(&dataset)?;

        if dataset.metadata.count != dataset.recipes.len() {
            tracing::warn!(
                declared = dataset.metadata.count,
                actual = dataset.recipes.len(),
                "dataset metadata count does not match recipe count"
            );
        }

        let mut order = Vec::with_capacity(dataset.recipes.len());
        let mut recipes = HashMap::with_capacity(dataset.recipes.len());
        for recipe in dataset.recipes.into_values() {
            order.push(recipe.id.clone());
            recipes.insert(recipe.id.clone(), recipe);
        }
        order.sort();

        let frequency = build_frequency_index(order.iter().filter_map(|id| recipes.get(id)));

        tracing::info!(
            recipes = recipes.len(),
            version = %dataset.metadata.version,
            "loaded recipe catalog"
        );

        self.metadata = Some(dataset.metadata);
        self.recipes = recipes;
        self.order = order;
        self.frequency = frequency;
        Ok(())
    }

    /// Parse a dataset document and load it.
    ///
    /// # Errors
    /// Returns [`BackbarError::Import`] when the document does not parse or
    /// fails validation.
    pub fn load_json(&mut self, raw: &str) -> Result<(), BackbarError> {
        let dataset: Dataset = serde_json::from_str(raw)
            .map_err(|err| BackbarError::Import(format!("malformed dataset: {err}")))?;
        self.load(dataset)
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&DatasetMetadata> {
        self.metadata.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// All recipes, in id order.
    pub fn get_all(&self) -> impl Iterator<Item = &Recipe> + '_ {
        self.order.iter().filter_map(|id| self.recipes.get(id))
    }

    #[must_use]
    pub fn get_by_id(&self, id: &RecipeId) -> Option<&Recipe> {
        self.recipes.get(id)
    }

    /// Name/alternate-name substring search with attribute filters.
    #[must_use]
    pub fn search(&self, query: &str, filters: &RecipeFilters) -> Vec<&Recipe> {
        let query = normalize_name(query);
        self.get_all()
            .filter(|recipe| {
                matches_query(&query, &recipe.name, recipe.alternate_name.as_deref())
                    && filters.matches(recipe)
            })
            .collect()
    }

    #[must_use]
    pub fn ingredients_by_frequency(&self) -> &[IngredientFrequency] {
        &self.frequency
    }

    /// Ingredient names starting with `prefix`, most used first.
    #[must_use]
    pub fn suggest_ingredient_names(&self, prefix: &str, limit: usize) -> Vec<&str> {
        let prefix = normalize_name(prefix);
        self.frequency
            .iter()
            .filter(|entry| normalize_name(&entry.name).starts_with(&prefix))
            .take(limit)
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// Rebuild the dataset document for the loaded recipes.
    #[must_use]
    pub fn to_dataset(&self) -> Option<Dataset> {
        let metadata = self.metadata.clone()?;
        let recipes = self
            .get_all()
            .map(|recipe| (recipe.id.to_string(), recipe.clone()))
            .collect::<BTreeMap<_, _>>();
        Some(Dataset { metadata, recipes })
    }

    /// Persist the loaded dataset. Returns `false` when nothing is loaded.
    ///
    /// # Errors
    /// Returns an error when serialization or the store write fails.
    pub fn cache(&self, store: &mut impl KeyValueStore) -> Result<bool, BackbarError> {
        let Some(dataset) = self.to_dataset() else {
            return Ok(false);
        };
        save_json(store, DATASET_CACHE_KEY, &dataset)?;
        tracing::debug!(recipes = dataset.recipes.len(), "cached recipe catalog");
        Ok(true)
    }

    /// Load the dataset cached by [`RecipeCatalog::cache`], if any.
    ///
    /// # Errors
    /// Returns an error when the store read fails, the cached document is
    /// corrupt, or it fails validation.
    pub fn restore(&mut self, store: &impl KeyValueStore) -> Result<bool, BackbarError> {
        let Some(dataset) = load_json::<Dataset>(store, DATASET_CACHE_KEY)? else {
            return Ok(false);
        };
        self.load(dataset)?;
        Ok(true)
    }
}

fn validate_dataset(dataset: &Dataset) -> Result<(), BackbarError> {
    for (key, recipe) in &dataset.recipes {
        if recipe.id.as_str().trim().is_empty() {
            return Err(BackbarError::Import(format!("recipe under key `{key}` has an empty id")));
        }
        if key != recipe.id.as_str() {
            return Err(BackbarError::Import(format!(
                "recipe key `{key}` does not match recipe id `{}`",
                recipe.id
            )));
        }
        if recipe.name.trim().is_empty() {
            return Err(BackbarError::Import(format!("recipe `{key}` has an empty name")));
        }
        if recipe.ingredients.is_empty() {
            return Err(BackbarError::Import(format!("recipe `{key}` has no ingredients")));
        }
        if recipe.ingredients.iter().any(|ingredient| ingredient.name.trim().is_empty()) {
            return Err(BackbarError::Import(format!(
                "recipe `{key}` has an ingredient without a name"
            )));
        }
    }
    Ok(())
}

fn build_frequency_index<'a>(
    recipes: impl Iterator<Item = &'a Recipe>,
) -> Vec<IngredientFrequency> {
    let mut counts: HashMap<String, IngredientFrequency> = HashMap::new();
    for recipe in recipes {
        let mut seen = BTreeSet::new();
        for ingredient in &recipe.ingredients {
            let key = normalize_name(&ingredient.name);
            if !seen.insert(key.clone()) {
                continue;
            }
            counts
                .entry(key)
                .or_insert_with(|| IngredientFrequency {
                    name: ingredient.name.trim().to_string(),
                    count: 0,
                })
                .count += 1;
        }
    }

    let mut frequency = counts.into_values().collect::<Vec<_>>();
    frequency.sort_by(|lhs, rhs| {
        rhs.count.cmp(&lhs.count).then_with(|| compare_names(&lhs.name, &rhs.name))
    });
    frequency
}

pub(crate) fn matches_query(normalized_query: &str, name: &str, alternate: Option<&str>) -> bool {
    if normalized_query.is_empty() {
        return true;
    }
    name.to_lowercase().contains(normalized_query)
        || alternate.is_some_and(|alternate| alternate.to_lowercase().contains(normalized_query))
}

pub(crate) fn contains_all_ingredients<'a>(
    wanted: &[String],
    names: impl Iterator<Item = &'a String>,
) -> bool {
    let wanted = wanted
        .iter()
        .map(|name| normalize_name(name))
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>();
    if wanted.is_empty() {
        return true;
    }

    let names = names.map(|name| normalize_name(name)).collect::<Vec<_>>();
    wanted.iter().all(|needle| names.iter().any(|name| name.contains(needle.as_str())))
}

pub(crate) fn equals_ignoring_case(wanted: Option<&str>, actual: &str) -> bool {
    match wanted {
        Some(wanted) => normalize_name(wanted) == normalize_name(actual),
        None => true,
    }
}

/// Case-insensitive name order with an exact-compare tie-break.
#[must_use]
pub fn compare_names(lhs: &str, rhs: &str) -> Ordering {
    lhs.to_lowercase().cmp(&rhs.to_lowercase()).then_with(|| lhs.cmp(rhs))
}
