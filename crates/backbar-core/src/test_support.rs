use std::collections::BTreeMap;

use time::{Duration, OffsetDateTime};

use crate::model::{Dataset, DatasetMetadata, Ingredient, Recipe, RecipeId, UserRecipe, UserRecipeId};

pub(crate) fn fixture_time() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
}

pub(crate) fn ingredients(names: &[&str]) -> Vec<Ingredient> {
    names.iter().map(|name| Ingredient::new(name, Some("1 oz"))).collect()
}

pub(crate) fn recipe(id: &str, name: &str, names: &[&str]) -> Recipe {
    Recipe {
        id: RecipeId::from(id),
        name: name.to_string(),
        alternate_name: None,
        category: "Cocktail".to_string(),
        alcoholic: true,
        glass: "Cocktail glass".to_string(),
        ingredients: ingredients(names),
        instructions: BTreeMap::from([("en".to_string(), "Stir with ice.".to_string())]),
        image: None,
        tags: Vec::new(),
        tier: None,
    }
}

pub(crate) fn user_recipe(name: &str, names: &[&str]) -> UserRecipe {
    UserRecipe {
        id: UserRecipeId::new(),
        name: name.to_string(),
        glass: "Rocks glass".to_string(),
        instructions: "Build over ice.".to_string(),
        ingredients: ingredients(names),
        venue_ids: std::collections::BTreeSet::new(),
        created_at: fixture_time(),
        updated_at: fixture_time(),
    }
}

pub(crate) fn dataset(recipes: Vec<Recipe>) -> Dataset {
    Dataset {
        metadata: DatasetMetadata {
            export_date: "2024-01-01".to_string(),
            count: recipes.len(),
            version: "test".to_string(),
        },
        recipes: recipes.into_iter().map(|recipe| (recipe.id.to_string(), recipe)).collect(),
    }
}
