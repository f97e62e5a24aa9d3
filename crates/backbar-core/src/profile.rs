use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{BackbarError, EntityKind};
use crate::kv::{load_json, save_json, KeyValueStore};
use crate::model::{
    Ingredient, Profile, RecipeId, SettingsUpdate, UserRecipe, UserRecipeId, UserRecipeUpdate,
    Venue, VenueId, VenueUpdate, DEFAULT_VENUE_NAME, MAX_INSTRUCTIONS_CHARS,
};

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
pub type Listener = Box<dyn FnMut(Option<&Profile>) -> Result<(), ListenerError>>;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewUserRecipe {
    pub name: String,
    pub glass: String,
    pub instructions: String,
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub venue_ids: BTreeSet<VenueId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct ClearSummary {
    pub deleted: usize,
    pub failed: usize,
}

/// User recipe documents written together with a profile commit.
#[derive(Debug, Default)]
struct RecipeChanges {
    upserts: Vec<UserRecipe>,
    removals: Vec<UserRecipeId>,
}

impl RecipeChanges {
    fn upsert(recipe: UserRecipe) -> Self {
        Self { upserts: vec![recipe], removals: Vec::new() }
    }
}

#[must_use]
pub fn profile_key(scope: &str) -> String {
    format!("profile:{scope}")
}

#[must_use]
pub fn user_recipe_key(id: UserRecipeId) -> String {
    format!("user_recipe:{id}")
}

/// Owner of the active [`Profile`] and every user-authored recipe.
///
/// Each successful mutation validates its input, builds a new `Profile`
/// value, writes it to the key/value store, swaps it in, and then notifies
/// subscribers in registration order. Snapshots handed out earlier are never
/// modified.
pub struct ProfileStore<S> {
    store: S,
    scope: String,
    profile: Option<Arc<Profile>>,
    user_recipes: BTreeMap<UserRecipeId, UserRecipe>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: u64,
}

impl<S: fmt::Debug> fmt::Debug for ProfileStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileStore")
            .field("store", &self.store)
            .field("scope", &self.scope)
            .field("profile", &self.profile)
            .field("user_recipes", &self.user_recipes.len())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl<S: KeyValueStore> ProfileStore<S> {
    /// `scope` selects the persisted profile ("device" or an account id).
    pub fn new(store: S, scope: impl Into<String>) -> Self {
        Self {
            store,
            scope: scope.into(),
            profile: None,
            user_recipes: BTreeMap::new(),
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Current snapshot, if a profile is active.
    #[must_use]
    pub fn profile(&self) -> Option<Arc<Profile>> {
        self.profile.clone()
    }

    /// Load the persisted profile or create a fresh one, repairing any broken
    /// default-venue or membership state on the way. Calling it again while a
    /// profile is active returns the cached snapshot.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read or written, or holds a
    /// corrupt profile document.
    pub fn initialize(&mut self) -> Result<Arc<Profile>, BackbarError> {
        if let Some(profile) = &self.profile {
            return Ok(Arc::clone(profile));
        }

        let key = profile_key(&self.scope);
        let now = OffsetDateTime::now_utc();
        let (mut profile, mut dirty) = match load_json::<Profile>(&self.store, &key)? {
            Some(profile) => (profile, false),
            None => {
                tracing::info!(scope = %self.scope, "creating new profile");
                (Profile::new(now), true)
            }
        };

        dirty |= repair_default_venue(&mut profile, now);

        let mut recipes = BTreeMap::new();
        let mut missing = Vec::new();
        for id in &profile.custom_cocktail_ids {
            match load_json::<UserRecipe>(&self.store, &user_recipe_key(*id))? {
                Some(recipe) => {
                    recipes.insert(*id, recipe);
                }
                None => missing.push(*id),
            }
        }
        if !missing.is_empty() {
            tracing::warn!(count = missing.len(), "dropping references to missing user recipes");
            for id in &missing {
                profile.custom_cocktail_ids.remove(id);
            }
            dirty = true;
        }

        let (venues_changed, changed_recipes) = reconcile_memberships(&mut profile, &mut recipes);
        for id in &changed_recipes {
            if let Some(recipe) = recipes.get(id) {
                save_json(&mut self.store, &user_recipe_key(*id), recipe)?;
            }
        }
        if !changed_recipes.is_empty() {
            tracing::warn!(count = changed_recipes.len(), "repaired user recipe venue membership");
        }
        dirty |= venues_changed;

        if dirty {
            profile.updated_at = now;
            save_json(&mut self.store, &key, &profile)?;
        }

        tracing::debug!(
            scope = %self.scope,
            venues = profile.venues.len(),
            user_recipes = recipes.len(),
            "profile initialized"
        );

        let profile = Arc::new(profile);
        self.user_recipes = recipes;
        self.profile = Some(Arc::clone(&profile));
        self.notify();
        Ok(profile)
    }

    /// Drop the in-memory profile; persisted data is kept.
    pub fn sign_out(&mut self) {
        if self.profile.take().is_none() {
            return;
        }
        self.user_recipes.clear();
        self.notify();
    }

    /// Delete the persisted profile and its user recipes, then sign out.
    ///
    /// # Errors
    /// Returns an error when a store delete fails.
    pub fn reset(&mut self) -> Result<(), BackbarError> {
        let key = profile_key(&self.scope);
        let owned = match &self.profile {
            Some(profile) => profile.custom_cocktail_ids.clone(),
            None => match load_json::<Profile>(&self.store, &key) {
                Ok(profile) => profile.map(|p| p.custom_cocktail_ids).unwrap_or_default(),
                Err(err) => {
                    tracing::warn!(error = %err, "persisted profile is unreadable; deleting it");
                    BTreeSet::new()
                }
            },
        };

        for id in owned {
            self.store.delete(&user_recipe_key(id))?;
        }
        self.store.delete(&key)?;
        tracing::info!(scope = %self.scope, "profile reset");

        self.sign_out();
        Ok(())
    }

    /// Register `listener`; it runs after every successful mutation.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(Option<&Profile>) -> Result<(), ListenerError> + 'static,
    {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns `false` when `id` was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// # Errors
    /// Returns [`BackbarError::Validation`] for an empty language, or a
    /// storage error when persisting fails.
    pub fn update_settings(
        &mut self,
        update: SettingsUpdate,
    ) -> Result<Arc<Profile>, BackbarError> {
        let current = self.current()?;
        let mut next = (*current).clone();

        if let Some(unit_system) = update.unit_system {
            next.settings.unit_system = unit_system;
        }
        if let Some(access_tier) = update.access_tier {
            next.settings.access_tier = access_tier;
        }
        if let Some(language) = update.language {
            next.settings.language = require_text("language", &language)?;
        }
        if let Some(show_images) = update.show_images {
            next.settings.show_images = show_images;
        }

        self.commit(next)
    }

    /// # Errors
    /// Returns [`BackbarError::NoActiveProfile`] before initialization.
    pub fn is_favorite(&self, id: &RecipeId) -> Result<bool, BackbarError> {
        Ok(self.current()?.is_favorite(id))
    }

    /// Adding an existing favorite is a no-op.
    ///
    /// # Errors
    /// Returns a validation error for an empty id, or a storage error.
    pub fn add_favorite(&mut self, id: RecipeId) -> Result<Arc<Profile>, BackbarError> {
        let current = self.current()?;
        if id.as_str().trim().is_empty() {
            return Err(BackbarError::Validation("recipe id must not be empty".to_string()));
        }
        if current.favorites.contains(&id) {
            return Ok(current);
        }

        let mut next = (*current).clone();
        next.favorites.insert(id);
        self.commit(next)
    }

    /// Removing a recipe that is not a favorite is a no-op.
    ///
    /// # Errors
    /// Returns a storage error when persisting fails.
    pub fn remove_favorite(&mut self, id: &RecipeId) -> Result<Arc<Profile>, BackbarError> {
        let current = self.current()?;
        if !current.favorites.contains(id) {
            return Ok(current);
        }

        let mut next = (*current).clone();
        next.favorites.remove(id);
        self.commit(next)
    }

    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown venue.
    pub fn venue(&self, id: VenueId) -> Result<Venue, BackbarError> {
        let current = self.current()?;
        current.venue(id).cloned().ok_or_else(|| BackbarError::not_found(EntityKind::Venue, id))
    }

    /// Recipe membership of a venue; for the default venue this is the
    /// favorites set.
    ///
    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown venue.
    pub fn venue_recipe_ids(&self, id: VenueId) -> Result<BTreeSet<RecipeId>, BackbarError> {
        let current = self.current()?;
        let venue =
            current.venue(id).ok_or_else(|| BackbarError::not_found(EntityKind::Venue, id))?;
        Ok(current.venue_recipe_ids(venue))
    }

    /// # Errors
    /// Returns a validation error for an empty name, or a storage error.
    pub fn create_venue(&mut self, name: &str) -> Result<Venue, BackbarError> {
        let current = self.current()?;
        let name = require_text("venue name", name)?;

        let venue = Venue::new(&name, false, OffsetDateTime::now_utc());
        let mut next = (*current).clone();
        next.venues.push(venue.clone());
        self.commit(next)?;
        tracing::debug!(venue = %venue.id, "created venue");
        Ok(venue)
    }

    /// Apply `update`; a name change on the default venue is ignored.
    ///
    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown venue, a validation
    /// error for empty names, or a storage error.
    pub fn update_venue(
        &mut self,
        id: VenueId,
        update: VenueUpdate,
    ) -> Result<Venue, BackbarError> {
        let current = self.current()?;
        let index = venue_position(&current, id)?;
        let mut venue = current.venues[index].clone();

        match update.name {
            Some(_) if venue.is_default => {
                tracing::debug!(venue = %id, "ignoring rename of the default venue");
            }
            Some(name) => venue.name = require_text("venue name", &name)?,
            None => {}
        }
        if let Some(ingredients) = update.ingredients {
            venue.ingredients = dedupe_ingredient_names(ingredients)?;
        }
        venue.updated_at = OffsetDateTime::now_utc();

        let mut next = (*current).clone();
        next.venues[index] = venue.clone();
        self.commit(next)?;
        Ok(venue)
    }

    /// Remove a non-default venue. User recipes are kept but no longer
    /// reference it.
    ///
    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown venue and
    /// [`BackbarError::InvariantViolation`] for the default venue.
    pub fn delete_venue(&mut self, id: VenueId) -> Result<Arc<Profile>, BackbarError> {
        let current = self.current()?;
        let index = venue_position(&current, id)?;
        if current.venues[index].is_default {
            return Err(BackbarError::InvariantViolation(
                "the default venue cannot be deleted".to_string(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let upserts = self
            .user_recipes
            .values()
            .filter(|recipe| recipe.venue_ids.contains(&id))
            .map(|recipe| {
                let mut recipe = recipe.clone();
                recipe.venue_ids.remove(&id);
                recipe.updated_at = now;
                recipe
            })
            .collect();

        let mut next = (*current).clone();
        next.venues.remove(index);
        self.commit_with(next, RecipeChanges { upserts, removals: Vec::new() })
    }

    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown venue, a validation
    /// error for an empty name, or a storage error.
    pub fn add_ingredient_to_venue(
        &mut self,
        id: VenueId,
        name: &str,
    ) -> Result<Venue, BackbarError> {
        let current = self.current()?;
        let index = venue_position(&current, id)?;
        let name = require_text("ingredient", name)?;
        if current.venues[index].has_ingredient(&name) {
            return Ok(current.venues[index].clone());
        }

        let mut next = (*current).clone();
        let venue = &mut next.venues[index];
        venue.ingredients.push(name);
        venue.updated_at = OffsetDateTime::now_utc();
        let venue = venue.clone();
        self.commit(next)?;
        Ok(venue)
    }

    /// Matching is case-insensitive; removing an absent ingredient is a no-op.
    ///
    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown venue, or a storage
    /// error.
    pub fn remove_ingredient_from_venue(
        &mut self,
        id: VenueId,
        name: &str,
    ) -> Result<Venue, BackbarError> {
        let current = self.current()?;
        let index = venue_position(&current, id)?;
        if !current.venues[index].has_ingredient(name) {
            return Ok(current.venues[index].clone());
        }

        let needle = crate::model::normalize_name(name);
        let mut next = (*current).clone();
        let venue = &mut next.venues[index];
        venue.ingredients.retain(|existing| crate::model::normalize_name(existing) != needle);
        venue.updated_at = OffsetDateTime::now_utc();
        let venue = venue.clone();
        self.commit(next)?;
        Ok(venue)
    }

    /// Adding to the default venue adds a favorite instead.
    ///
    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown venue, or a storage
    /// error.
    pub fn add_cocktail_to_venue(
        &mut self,
        venue_id: VenueId,
        recipe_id: RecipeId,
    ) -> Result<Arc<Profile>, BackbarError> {
        let current = self.current()?;
        let index = venue_position(&current, venue_id)?;
        if current.venues[index].is_default {
            return self.add_favorite(recipe_id);
        }
        if recipe_id.as_str().trim().is_empty() {
            return Err(BackbarError::Validation("recipe id must not be empty".to_string()));
        }
        if current.venues[index].cocktail_ids.contains(&recipe_id) {
            return Ok(current);
        }

        let mut next = (*current).clone();
        let venue = &mut next.venues[index];
        venue.cocktail_ids.insert(recipe_id);
        venue.updated_at = OffsetDateTime::now_utc();
        self.commit(next)
    }

    /// Removing from the default venue removes a favorite instead.
    ///
    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown venue, or a storage
    /// error.
    pub fn remove_cocktail_from_venue(
        &mut self,
        venue_id: VenueId,
        recipe_id: &RecipeId,
    ) -> Result<Arc<Profile>, BackbarError> {
        let current = self.current()?;
        let index = venue_position(&current, venue_id)?;
        if current.venues[index].is_default {
            return self.remove_favorite(recipe_id);
        }
        if !current.venues[index].cocktail_ids.contains(recipe_id) {
            return Ok(current);
        }

        let mut next = (*current).clone();
        let venue = &mut next.venues[index];
        venue.cocktail_ids.remove(recipe_id);
        venue.updated_at = OffsetDateTime::now_utc();
        self.commit(next)
    }

    #[must_use]
    pub fn user_cocktail(&self, id: UserRecipeId) -> Option<&UserRecipe> {
        self.user_recipes.get(&id)
    }

    /// Owned user recipes, oldest first. Recipes created at the same instant
    /// are ordered by id.
    #[must_use]
    pub fn user_cocktails(&self) -> Vec<&UserRecipe> {
        let mut recipes = self.user_recipes.values().collect::<Vec<_>>();
        recipes.sort_by(|lhs, rhs| {
            lhs.created_at.cmp(&rhs.created_at).then_with(|| lhs.id.cmp(&rhs.id))
        });
        recipes
    }

    /// Create a user recipe. The default venue is always one of its venues.
    ///
    /// # Errors
    /// Returns a validation error when a field is empty, no ingredient is
    /// given, or the instructions exceed 256 characters;
    /// [`BackbarError::NotFound`] for an unknown venue id; or a storage error.
    pub fn create_user_cocktail(
        &mut self,
        draft: NewUserRecipe,
    ) -> Result<UserRecipe, BackbarError> {
        let current = self.current()?;
        let name = require_text("name", &draft.name)?;
        let ingredients = validate_ingredients(draft.ingredients)?;
        let instructions = validate_instructions(&draft.instructions)?;
        let glass = require_text("glass", &draft.glass)?;
        let venue_ids = resolve_venue_ids(&current, draft.venue_ids)?;

        let now = OffsetDateTime::now_utc();
        let recipe = UserRecipe {
            id: UserRecipeId::new(),
            name,
            glass,
            instructions,
            ingredients,
            venue_ids,
            created_at: now,
            updated_at: now,
        };

        let mut next = (*current).clone();
        next.custom_cocktail_ids.insert(recipe.id);
        for venue in &mut next.venues {
            if recipe.venue_ids.contains(&venue.id) {
                venue.custom_cocktail_ids.insert(recipe.id);
                venue.updated_at = now;
            }
        }

        self.commit_with(next, RecipeChanges::upsert(recipe.clone()))?;
        tracing::debug!(user_recipe = %recipe.id, "created user recipe");
        Ok(recipe)
    }

    /// Apply the fields present in `update`. A new venue set is diffed
    /// against the old one and both sides of the membership are updated.
    ///
    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown recipe or venue, a
    /// validation error for invalid fields, or a storage error.
    pub fn update_user_cocktail(
        &mut self,
        id: UserRecipeId,
        update: UserRecipeUpdate,
    ) -> Result<UserRecipe, BackbarError> {
        let current = self.current()?;
        let mut recipe = self.owned_recipe(&current, id)?;

        if let Some(name) = update.name {
            recipe.name = require_text("name", &name)?;
        }
        if let Some(ingredients) = update.ingredients {
            recipe.ingredients = validate_ingredients(ingredients)?;
        }
        if let Some(instructions) = update.instructions {
            recipe.instructions = validate_instructions(&instructions)?;
        }
        if let Some(glass) = update.glass {
            recipe.glass = require_text("glass", &glass)?;
        }

        let now = OffsetDateTime::now_utc();
        let mut next = (*current).clone();
        if let Some(requested) = update.venue_ids {
            let wanted = resolve_venue_ids(&current, requested)?;
            for venue in &mut next.venues {
                let was_member = recipe.venue_ids.contains(&venue.id);
                let is_member = wanted.contains(&venue.id);
                if is_member && !was_member {
                    venue.custom_cocktail_ids.insert(id);
                    venue.updated_at = now;
                } else if was_member && !is_member {
                    venue.custom_cocktail_ids.remove(&id);
                    venue.updated_at = now;
                }
            }
            recipe.venue_ids = wanted;
        }
        recipe.updated_at = now;

        self.commit_with(next, RecipeChanges::upsert(recipe.clone()))?;
        Ok(recipe)
    }

    /// # Errors
    /// Returns [`BackbarError::NotFound`] for an unknown recipe, or a storage
    /// error.
    pub fn delete_user_cocktail(&mut self, id: UserRecipeId) -> Result<Arc<Profile>, BackbarError> {
        let current = self.current()?;
        self.owned_recipe(&current, id)?;

        let now = OffsetDateTime::now_utc();
        let mut next = (*current).clone();
        next.custom_cocktail_ids.remove(&id);
        for venue in &mut next.venues {
            if venue.custom_cocktail_ids.remove(&id) {
                venue.updated_at = now;
            }
        }
        self.commit_with(next, RecipeChanges { upserts: Vec::new(), removals: vec![id] })
    }

    /// Delete every user recipe and every non-default venue. The profile is
    /// persisted first; the recipe deletes that follow are best-effort and
    /// failures are logged and counted.
    ///
    /// # Errors
    /// Returns a storage error when the profile itself cannot be persisted,
    /// in which case nothing is deleted.
    pub fn clear_custom_data(&mut self) -> Result<ClearSummary, BackbarError> {
        let current = self.current()?;
        let now = OffsetDateTime::now_utc();
        let mut next = (*current).clone();
        next.custom_cocktail_ids.clear();
        next.venues.retain(|venue| venue.is_default);
        for venue in &mut next.venues {
            venue.custom_cocktail_ids.clear();
            venue.updated_at = now;
        }

        next.updated_at = now;
        save_json(&mut self.store, &profile_key(&self.scope), &next)?;
        self.user_recipes.clear();

        let mut summary = ClearSummary::default();
        for id in &current.custom_cocktail_ids {
            match self.store.delete(&user_recipe_key(*id)) {
                Ok(()) => summary.deleted += 1,
                Err(err) => {
                    tracing::warn!(user_recipe = %id, error = %err, "failed to delete user recipe");
                    summary.failed += 1;
                }
            }
        }

        self.publish(next);
        Ok(summary)
    }

    fn current(&self) -> Result<Arc<Profile>, BackbarError> {
        self.profile.clone().ok_or(BackbarError::NoActiveProfile)
    }

    fn owned_recipe(
        &self,
        profile: &Profile,
        id: UserRecipeId,
    ) -> Result<UserRecipe, BackbarError> {
        if !profile.custom_cocktail_ids.contains(&id) {
            return Err(BackbarError::not_found(EntityKind::UserRecipe, id));
        }
        self.user_recipes
            .get(&id)
            .cloned()
            .ok_or_else(|| BackbarError::not_found(EntityKind::UserRecipe, id))
    }

    fn commit(&mut self, next: Profile) -> Result<Arc<Profile>, BackbarError> {
        self.commit_with(next, RecipeChanges::default())
    }

    /// Persist `changes` and then `next`. In-memory state is only replaced
    /// once every write succeeded; on failure the touched recipe documents
    /// are put back to their previous stored form.
    fn commit_with(
        &mut self,
        mut next: Profile,
        changes: RecipeChanges,
    ) -> Result<Arc<Profile>, BackbarError> {
        let mut touched = Vec::new();
        if let Err(err) = self.persist(&mut next, &changes, &mut touched) {
            self.roll_back(&touched);
            return Err(err);
        }

        for id in &changes.removals {
            self.user_recipes.remove(id);
        }
        for recipe in changes.upserts {
            self.user_recipes.insert(recipe.id, recipe);
        }
        Ok(self.publish(next))
    }

    fn persist(
        &mut self,
        next: &mut Profile,
        changes: &RecipeChanges,
        touched: &mut Vec<UserRecipeId>,
    ) -> Result<(), BackbarError> {
        for recipe in &changes.upserts {
            touched.push(recipe.id);
            save_json(&mut self.store, &user_recipe_key(recipe.id), recipe)?;
        }
        for id in &changes.removals {
            touched.push(*id);
            self.store.delete(&user_recipe_key(*id))?;
        }
        next.updated_at = OffsetDateTime::now_utc();
        save_json(&mut self.store, &profile_key(&self.scope), &*next)
    }

    /// Restore the stored documents for `ids` from the in-memory copies.
    fn roll_back(&mut self, ids: &[UserRecipeId]) {
        for id in ids {
            let key = user_recipe_key(*id);
            let restored = match self.user_recipes.get(id) {
                Some(previous) => save_json(&mut self.store, &key, previous),
                None => self.store.delete(&key),
            };
            if let Err(err) = restored {
                tracing::warn!(user_recipe = %id, error = %err, "failed to roll back user recipe");
            }
        }
    }

    fn publish(&mut self, next: Profile) -> Arc<Profile> {
        let next = Arc::new(next);
        self.profile = Some(Arc::clone(&next));
        self.notify();
        next
    }

    fn notify(&mut self) {
        let snapshot = self.profile.clone();
        for (id, listener) in &mut self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(snapshot.as_deref())));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(listener = id.0, error = %err, "profile listener failed");
                }
                Err(_) => tracing::warn!(listener = id.0, "profile listener panicked"),
            }
        }
    }
}

fn venue_position(profile: &Profile, id: VenueId) -> Result<usize, BackbarError> {
    profile
        .venues
        .iter()
        .position(|venue| venue.id == id)
        .ok_or_else(|| BackbarError::not_found(EntityKind::Venue, id))
}

fn resolve_venue_ids(
    profile: &Profile,
    requested: BTreeSet<VenueId>,
) -> Result<BTreeSet<VenueId>, BackbarError> {
    if let Some(unknown) = requested.iter().find(|id| profile.venue(**id).is_none()) {
        return Err(BackbarError::not_found(EntityKind::Venue, unknown));
    }
    let default = profile.default_venue().ok_or_else(|| {
        BackbarError::InvariantViolation("profile has no default venue".to_string())
    })?;

    let mut venue_ids = requested;
    venue_ids.insert(default.id);
    Ok(venue_ids)
}

/// Ensure exactly one default venue, and fold any stored default-venue
/// recipe ids into the favorites.
fn repair_default_venue(profile: &mut Profile, now: OffsetDateTime) -> bool {
    let mut changed = false;

    let mut seen_default = false;
    for venue in &mut profile.venues {
        if venue.is_default && seen_default {
            tracing::warn!(venue = %venue.id, "demoting duplicate default venue");
            venue.is_default = false;
            changed = true;
        }
        seen_default |= venue.is_default;
    }

    if !seen_default {
        tracing::warn!("profile has no default venue; creating one");
        profile.venues.insert(0, Venue::new(DEFAULT_VENUE_NAME, true, now));
        changed = true;
    }

    if let Some(default) = profile.venues.iter_mut().find(|venue| venue.is_default) {
        if !default.cocktail_ids.is_empty() {
            tracing::warn!(
                count = default.cocktail_ids.len(),
                "moving stored default venue recipes into favorites"
            );
            let moved = std::mem::take(&mut default.cocktail_ids);
            profile.favorites.extend(moved);
            changed = true;
        }
    }

    changed
}

/// Make venue and user-recipe membership symmetric. Returns whether any
/// venue changed and which recipes changed.
fn reconcile_memberships(
    profile: &mut Profile,
    recipes: &mut BTreeMap<UserRecipeId, UserRecipe>,
) -> (bool, Vec<UserRecipeId>) {
    let known_venues = profile.venues.iter().map(|venue| venue.id).collect::<BTreeSet<_>>();
    let default_id = profile.default_venue().map(|venue| venue.id);
    let mut venues_changed = false;

    for venue in &mut profile.venues {
        let before = venue.custom_cocktail_ids.len();
        venue.custom_cocktail_ids.retain(|id| recipes.contains_key(id));
        venues_changed |= before != venue.custom_cocktail_ids.len();
    }

    let mut changed_recipes = Vec::new();
    for (id, recipe) in recipes.iter_mut() {
        let mut wanted = recipe
            .venue_ids
            .iter()
            .copied()
            .filter(|venue_id| known_venues.contains(venue_id))
            .collect::<BTreeSet<_>>();
        wanted.extend(
            profile
                .venues
                .iter()
                .filter(|venue| venue.custom_cocktail_ids.contains(id))
                .map(|venue| venue.id),
        );
        wanted.extend(default_id);

        for venue in &mut profile.venues {
            if wanted.contains(&venue.id) && venue.custom_cocktail_ids.insert(*id) {
                venues_changed = true;
            }
        }
        if wanted != recipe.venue_ids {
            recipe.venue_ids = wanted;
            changed_recipes.push(*id);
        }
    }

    (venues_changed, changed_recipes)
}

fn require_text(field: &str, value: &str) -> Result<String, BackbarError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BackbarError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn validate_instructions(value: &str) -> Result<String, BackbarError> {
    let instructions = require_text("instructions", value)?;
    if instructions.chars().count() > MAX_INSTRUCTIONS_CHARS {
        return Err(BackbarError::Validation(format!(
            "instructions must be at most {MAX_INSTRUCTIONS_CHARS} characters"
        )));
    }
    Ok(instructions)
}

fn validate_ingredients(ingredients: Vec<Ingredient>) -> Result<Vec<Ingredient>, BackbarError> {
    if ingredients.is_empty() {
        return Err(BackbarError::Validation("at least one ingredient is required".to_string()));
    }
    ingredients
        .into_iter()
        .map(|ingredient| {
            let name = require_text("ingredient name", &ingredient.name)?;
            let measure = ingredient
                .measure
                .map(|measure| measure.trim().to_string())
                .filter(|measure| !measure.is_empty());
            Ok(Ingredient { name, measure })
        })
        .collect()
}

fn dedupe_ingredient_names(names: Vec<String>) -> Result<Vec<String>, BackbarError> {
    let mut seen = BTreeSet::new();
    let mut unique = Vec::with_capacity(names.len());
    for name in names {
        let name = require_text("ingredient", &name)?;
        if seen.insert(crate::model::normalize_name(&name)) {
            unique.push(name);
        }
    }
    Ok(unique)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use proptest::prelude::*;

    use super::*;
    use crate::kv::MemoryStore;
    use crate::model::{AccessTier, UnitSystem};
    use crate::test_support::{fixture_time, ingredients};

    /// Store double that can be told to fail writes or deletes.
    /// `fail_profile_sets` refuses only profile documents, so recipe writes
    /// staged ahead of a profile commit still land.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_sets: bool,
        fail_profile_sets: bool,
        fail_deletes: bool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, BackbarError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), BackbarError> {
            if self.fail_sets || (self.fail_profile_sets && key.starts_with("profile:")) {
                return Err(BackbarError::Storage(format!("refusing to write {key}")));
            }
            self.inner.set(key, value)
        }

        fn delete(&mut self, key: &str) -> Result<(), BackbarError> {
            if self.fail_deletes {
                return Err(BackbarError::Storage(format!("refusing to delete {key}")));
            }
            self.inner.delete(key)
        }

        fn list_keys(&self) -> Result<Vec<String>, BackbarError> {
            self.inner.list_keys()
        }
    }

    fn ok<T>(result: Result<T, BackbarError>) -> T {
        result.unwrap_or_else(|err| panic!("operation should succeed: {err}"))
    }

    fn initialized() -> ProfileStore<MemoryStore> {
        let mut store = ProfileStore::new(MemoryStore::new(), "device");
        ok(store.initialize());
        store
    }

    fn active(store: &ProfileStore<impl KeyValueStore>) -> Arc<Profile> {
        store.profile().unwrap_or_else(|| panic!("profile should be active"))
    }

    fn default_venue_id(store: &ProfileStore<impl KeyValueStore>) -> VenueId {
        active(store).default_venue().map(|venue| venue.id).unwrap_or_else(|| {
            panic!("profile should have a default venue");
        })
    }

    fn draft(name: &str, venue_ids: &[VenueId]) -> NewUserRecipe {
        NewUserRecipe {
            name: name.to_string(),
            glass: "Coupe".to_string(),
            instructions: "Shake hard and strain.".to_string(),
            ingredients: ingredients(&["Gin", "Lemon juice"]),
            venue_ids: venue_ids.iter().copied().collect(),
        }
    }

    fn assert_memberships_symmetric(store: &ProfileStore<impl KeyValueStore>) {
        let profile = active(store);
        for recipe in store.user_cocktails() {
            for venue in &profile.venues {
                assert_eq!(
                    recipe.venue_ids.contains(&venue.id),
                    venue.custom_cocktail_ids.contains(&recipe.id),
                    "membership of {} in {} is asymmetric",
                    recipe.id,
                    venue.id
                );
            }
        }
        for venue in &profile.venues {
            for id in &venue.custom_cocktail_ids {
                assert!(profile.custom_cocktail_ids.contains(id));
            }
        }
    }

    #[test]
    fn initialize_creates_profile_with_single_default_venue() {
        let store = initialized();
        let profile = active(&store);

        assert_eq!(profile.venues.len(), 1);
        assert_eq!(profile.venues.iter().filter(|venue| venue.is_default).count(), 1);
        assert_eq!(profile.venues[0].name, DEFAULT_VENUE_NAME);
        assert!(matches!(store.store().get(&profile_key("device")), Ok(Some(_))));
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut store = ProfileStore::new(MemoryStore::new(), "device");
        let calls = Rc::new(RefCell::new(0));
        let seen = Rc::clone(&calls);
        store.subscribe(move |_| {
            *seen.borrow_mut() += 1;
            Ok(())
        });

        let first = ok(store.initialize());
        let second = ok(store.initialize());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn initialize_reloads_persisted_profile() {
        let mut backing = MemoryStore::new();
        let (profile_id, recipe_id) = {
            let mut store = ProfileStore::new(&mut backing, "device");
            let profile = ok(store.initialize());
            ok(store.add_favorite(RecipeId::from("11007")));
            let recipe = ok(store.create_user_cocktail(draft("Bee's Knees", &[])));
            (profile.id, recipe.id)
        };

        let mut reloaded = ProfileStore::new(&mut backing, "device");
        let profile = ok(reloaded.initialize());
        assert_eq!(profile.id, profile_id);
        assert!(profile.is_favorite(&RecipeId::from("11007")));
        assert_eq!(
            reloaded.user_cocktail(recipe_id).map(|recipe| recipe.name.as_str()),
            Some("Bee's Knees")
        );
    }

    #[test]
    fn initialize_repairs_profile_without_default_venue() {
        let now = crate::test_support::fixture_time();
        let mut profile = Profile::new(now);
        profile.venues = vec![Venue::new("Cabin", false, now)];
        let mut backing = MemoryStore::new();
        ok(save_json(&mut backing, &profile_key("device"), &profile));

        let mut store = ProfileStore::new(backing, "device");
        let repaired = ok(store.initialize());
        assert_eq!(repaired.venues.len(), 2);
        assert!(repaired.venues[0].is_default);
        assert_eq!(repaired.venues[0].name, DEFAULT_VENUE_NAME);
        assert_eq!(repaired.venues[1].name, "Cabin");

        let persisted = ok(load_json::<Profile>(store.store(), &profile_key("device")));
        assert_eq!(persisted.map(|p| p.venues.len()), Some(2));
    }

    #[test]
    fn initialize_demotes_extra_defaults_and_folds_stored_default_recipes() {
        let now = crate::test_support::fixture_time();
        let mut profile = Profile::new(now);
        profile.venues[0].cocktail_ids.insert(RecipeId::from("17222"));
        profile.venues.push(Venue::new("Second Home", true, now));
        let mut backing = MemoryStore::new();
        ok(save_json(&mut backing, &profile_key("device"), &profile));

        let mut store = ProfileStore::new(backing, "device");
        let repaired = ok(store.initialize());
        assert_eq!(repaired.venues.iter().filter(|venue| venue.is_default).count(), 1);
        assert!(repaired.venues[0].is_default);
        assert!(repaired.venues[0].cocktail_ids.is_empty());
        assert!(repaired.is_favorite(&RecipeId::from("17222")));
    }

    #[test]
    fn mutations_before_initialize_fail() {
        let mut store = ProfileStore::new(MemoryStore::new(), "device");

        assert_eq!(
            store.add_favorite(RecipeId::from("1")).err(),
            Some(BackbarError::NoActiveProfile)
        );
        assert_eq!(store.create_venue("Cabin").err(), Some(BackbarError::NoActiveProfile));
        assert_eq!(
            store.create_user_cocktail(draft("Gimlet", &[])).err(),
            Some(BackbarError::NoActiveProfile)
        );
        assert_eq!(store.clear_custom_data().err(), Some(BackbarError::NoActiveProfile));
        assert!(store.store().is_empty());
    }

    #[test]
    fn favorites_have_set_semantics() {
        let mut store = initialized();
        let id = RecipeId::from("11000");

        ok(store.add_favorite(id.clone()));
        ok(store.add_favorite(id.clone()));
        assert_eq!(active(&store).favorites.len(), 1);
        assert_eq!(store.is_favorite(&id), Ok(true));

        ok(store.remove_favorite(&id));
        ok(store.remove_favorite(&id));
        assert_eq!(store.is_favorite(&id), Ok(false));
    }

    #[test]
    fn settings_updates_only_touch_present_fields() {
        let mut store = initialized();
        let updated = ok(store.update_settings(SettingsUpdate {
            unit_system: Some(UnitSystem::Metric),
            access_tier: Some(AccessTier::Premium),
            ..SettingsUpdate::default()
        }));
        assert_eq!(updated.settings.unit_system, UnitSystem::Metric);
        assert_eq!(updated.settings.access_tier, AccessTier::Premium);
        assert_eq!(updated.settings.language, "en");

        let err = store.update_settings(SettingsUpdate {
            language: Some(" ".to_string()),
            ..SettingsUpdate::default()
        });
        assert!(matches!(err, Err(BackbarError::Validation(_))));
    }

    #[test]
    fn default_venue_cannot_be_renamed_or_deleted() {
        let mut store = initialized();
        let id = default_venue_id(&store);

        let venue = ok(store.update_venue(
            id,
            VenueUpdate {
                name: Some("Garage".to_string()),
                ingredients: Some(vec!["Gin".to_string(), "gin ".to_string()]),
            },
        ));
        assert_eq!(venue.name, DEFAULT_VENUE_NAME);
        assert_eq!(venue.ingredients, vec!["Gin".to_string()]);

        let before = active(&store);
        let err = store.delete_venue(id);
        assert!(matches!(err, Err(BackbarError::InvariantViolation(_))));
        assert_eq!(*active(&store), *before);
    }

    #[test]
    fn custom_venues_can_be_renamed_and_deleted() {
        let mut store = initialized();
        let venue = ok(store.create_venue("Beach House"));

        let renamed = ok(store.update_venue(
            venue.id,
            VenueUpdate { name: Some("Lake House".to_string()), ingredients: None },
        ));
        assert_eq!(renamed.name, "Lake House");

        ok(store.delete_venue(venue.id));
        assert_eq!(active(&store).venues.len(), 1);
        assert!(matches!(
            store.delete_venue(venue.id),
            Err(BackbarError::NotFound { kind: EntityKind::Venue, .. })
        ));
        assert!(matches!(
            store.update_venue(venue.id, VenueUpdate::default()),
            Err(BackbarError::NotFound { .. })
        ));
    }

    #[test]
    fn venue_ingredients_have_set_semantics() {
        let mut store = initialized();
        let id = default_venue_id(&store);

        ok(store.add_ingredient_to_venue(id, "Gin"));
        ok(store.add_ingredient_to_venue(id, " gin"));
        let venue = ok(store.add_ingredient_to_venue(id, "Campari"));
        assert_eq!(venue.ingredients, vec!["Gin".to_string(), "Campari".to_string()]);

        let venue = ok(store.remove_ingredient_from_venue(id, "GIN"));
        assert_eq!(venue.ingredients, vec!["Campari".to_string()]);
        let venue = ok(store.remove_ingredient_from_venue(id, "Vermouth"));
        assert_eq!(venue.ingredients, vec!["Campari".to_string()]);

        assert!(matches!(
            store.add_ingredient_to_venue(id, "  "),
            Err(BackbarError::Validation(_))
        ));
    }

    #[test]
    fn default_venue_cocktails_are_the_favorites() {
        let mut store = initialized();
        let home = default_venue_id(&store);
        let recipe = RecipeId::from("11007");

        ok(store.add_cocktail_to_venue(home, recipe.clone()));
        ok(store.add_cocktail_to_venue(home, recipe.clone()));
        let profile = active(&store);
        assert!(profile.is_favorite(&recipe));
        assert_eq!(profile.favorites.len(), 1);
        assert!(profile.venues[0].cocktail_ids.is_empty());
        assert_eq!(ok(store.venue_recipe_ids(home)), BTreeSet::from([recipe.clone()]));

        ok(store.remove_cocktail_from_venue(home, &recipe));
        assert_eq!(store.is_favorite(&recipe), Ok(false));
        assert!(ok(store.venue_recipe_ids(home)).is_empty());
    }

    #[test]
    fn custom_venue_cocktails_are_independent_of_favorites() {
        let mut store = initialized();
        let cabin = ok(store.create_venue("Cabin"));
        let recipe = RecipeId::from("11007");

        ok(store.add_cocktail_to_venue(cabin.id, recipe.clone()));
        assert_eq!(store.is_favorite(&recipe), Ok(false));
        assert_eq!(ok(store.venue_recipe_ids(cabin.id)), BTreeSet::from([recipe.clone()]));

        ok(store.remove_cocktail_from_venue(cabin.id, &recipe));
        assert!(ok(store.venue_recipe_ids(cabin.id)).is_empty());
    }

    #[test]
    fn create_user_cocktail_always_includes_default_venue() {
        let mut store = initialized();
        let home = default_venue_id(&store);
        let cabin = ok(store.create_venue("Cabin"));

        let without_venues = ok(store.create_user_cocktail(draft("Gimlet", &[])));
        assert_eq!(without_venues.venue_ids, BTreeSet::from([home]));

        let with_cabin = ok(store.create_user_cocktail(draft("Southside", &[cabin.id])));
        assert_eq!(with_cabin.venue_ids, BTreeSet::from([home, cabin.id]));

        let profile = active(&store);
        assert_eq!(profile.custom_cocktail_ids.len(), 2);
        assert!(ok(store.venue(cabin.id)).custom_cocktail_ids.contains(&with_cabin.id));
        assert!(!ok(store.venue(cabin.id)).custom_cocktail_ids.contains(&without_venues.id));
        assert_memberships_symmetric(&store);
    }

    #[test]
    fn create_user_cocktail_validates_without_changing_state() {
        let mut store = initialized();
        let before = active(&store);

        let mut too_long = draft("Long", &[]);
        too_long.instructions = "x".repeat(MAX_INSTRUCTIONS_CHARS + 1);
        assert!(matches!(
            store.create_user_cocktail(too_long),
            Err(BackbarError::Validation(_))
        ));

        let mut no_name = draft(" ", &[]);
        no_name.name = "   ".to_string();
        assert!(matches!(store.create_user_cocktail(no_name), Err(BackbarError::Validation(_))));

        let mut no_ingredients = draft("Empty", &[]);
        no_ingredients.ingredients.clear();
        assert!(matches!(
            store.create_user_cocktail(no_ingredients),
            Err(BackbarError::Validation(_))
        ));

        let mut no_glass = draft("Glassless", &[]);
        no_glass.glass = String::new();
        assert!(matches!(store.create_user_cocktail(no_glass), Err(BackbarError::Validation(_))));

        let unknown_venue = draft("Lost", &[VenueId::new()]);
        assert!(matches!(
            store.create_user_cocktail(unknown_venue),
            Err(BackbarError::NotFound { kind: EntityKind::Venue, .. })
        ));

        let after = active(&store);
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.custom_cocktail_ids.is_empty());
        assert!(store.user_cocktails().is_empty());

        let mut at_limit = draft("Exactly", &[]);
        at_limit.instructions = "y".repeat(MAX_INSTRUCTIONS_CHARS);
        ok(store.create_user_cocktail(at_limit));
    }

    #[test]
    fn update_user_cocktail_moves_venue_membership_both_ways() {
        let mut store = initialized();
        let home = default_venue_id(&store);
        let cabin = ok(store.create_venue("Cabin"));
        let boat = ok(store.create_venue("Boat"));
        let recipe = ok(store.create_user_cocktail(draft("Tom Collins", &[cabin.id])));

        let updated = ok(store.update_user_cocktail(
            recipe.id,
            UserRecipeUpdate {
                venue_ids: Some(BTreeSet::from([boat.id])),
                ..UserRecipeUpdate::default()
            },
        ));
        assert_eq!(updated.venue_ids, BTreeSet::from([home, boat.id]));
        assert!(!ok(store.venue(cabin.id)).custom_cocktail_ids.contains(&recipe.id));
        assert!(ok(store.venue(boat.id)).custom_cocktail_ids.contains(&recipe.id));
        assert!(ok(store.venue(home)).custom_cocktail_ids.contains(&recipe.id));
        assert_memberships_symmetric(&store);
    }

    #[test]
    fn update_user_cocktail_validates_only_present_fields() {
        let mut store = initialized();
        let recipe = ok(store.create_user_cocktail(draft("Aviation", &[])));

        let renamed = ok(store.update_user_cocktail(
            recipe.id,
            UserRecipeUpdate { name: Some(" Aviation No. 2 ".to_string()), ..Default::default() },
        ));
        assert_eq!(renamed.name, "Aviation No. 2");
        assert_eq!(renamed.instructions, recipe.instructions);

        let err = store.update_user_cocktail(
            recipe.id,
            UserRecipeUpdate {
                name: Some("Fine".to_string()),
                instructions: Some("z".repeat(MAX_INSTRUCTIONS_CHARS + 1)),
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(BackbarError::Validation(_))));
        assert_eq!(
            store.user_cocktail(recipe.id).map(|r| r.name.as_str()),
            Some("Aviation No. 2")
        );

        let missing = store.update_user_cocktail(UserRecipeId::new(), UserRecipeUpdate::default());
        assert!(matches!(
            missing,
            Err(BackbarError::NotFound { kind: EntityKind::UserRecipe, .. })
        ));
    }

    #[test]
    fn delete_user_cocktail_removes_it_from_every_venue() {
        let mut store = initialized();
        let cabin = ok(store.create_venue("Cabin"));
        let recipe = ok(store.create_user_cocktail(draft("Last Word", &[cabin.id])));
        let key = user_recipe_key(recipe.id);
        assert!(matches!(store.store().get(&key), Ok(Some(_))));

        ok(store.delete_user_cocktail(recipe.id));
        let profile = active(&store);
        assert!(!profile.custom_cocktail_ids.contains(&recipe.id));
        assert!(profile.venues.iter().all(|venue| !venue.custom_cocktail_ids.contains(&recipe.id)));
        assert_eq!(store.store().get(&key), Ok(None));

        assert!(matches!(
            store.delete_user_cocktail(recipe.id),
            Err(BackbarError::NotFound { kind: EntityKind::UserRecipe, .. })
        ));
    }

    #[test]
    fn delete_venue_keeps_user_recipes_but_drops_membership() {
        let mut store = initialized();
        let cabin = ok(store.create_venue("Cabin"));
        let recipe = ok(store.create_user_cocktail(draft("Paper Plane", &[cabin.id])));

        ok(store.delete_venue(cabin.id));
        let kept = store.user_cocktail(recipe.id).cloned();
        assert!(kept.as_ref().is_some_and(|r| !r.venue_ids.contains(&cabin.id)));
        assert!(active(&store).custom_cocktail_ids.contains(&recipe.id));
        assert_memberships_symmetric(&store);
    }

    #[test]
    fn clear_custom_data_keeps_only_default_venue() {
        let mut store = initialized();
        let cabin = ok(store.create_venue("Cabin"));
        ok(store.add_favorite(RecipeId::from("11007")));
        ok(store.create_user_cocktail(draft("Gimlet", &[cabin.id])));
        ok(store.create_user_cocktail(draft("Gin Rickey", &[])));

        let summary = ok(store.clear_custom_data());
        assert_eq!(summary, ClearSummary { deleted: 2, failed: 0 });

        let profile = active(&store);
        assert_eq!(profile.venues.len(), 1);
        assert!(profile.venues[0].is_default);
        assert!(profile.venues[0].custom_cocktail_ids.is_empty());
        assert!(profile.custom_cocktail_ids.is_empty());
        assert!(profile.is_favorite(&RecipeId::from("11007")));
        let keys = ok(store.store().list_keys());
        assert!(keys.iter().all(|key| !key.starts_with("user_recipe:")));
    }

    #[test]
    fn clear_custom_data_is_best_effort_per_recipe() {
        let mut store = ProfileStore::new(FlakyStore::default(), "device");
        ok(store.initialize());
        ok(store.create_user_cocktail(draft("Gimlet", &[])));

        store.store.fail_deletes = true;
        let summary = ok(store.clear_custom_data());
        assert_eq!(summary, ClearSummary { deleted: 0, failed: 1 });
        assert!(active(&store).custom_cocktail_ids.is_empty());
    }

    #[test]
    fn storage_failures_propagate_and_keep_previous_state() {
        let mut store = ProfileStore::new(FlakyStore::default(), "device");
        ok(store.initialize());
        let before = active(&store);

        store.store.fail_sets = true;
        let err = store.add_favorite(RecipeId::from("11007"));
        assert!(matches!(err, Err(BackbarError::Storage(_))));
        assert!(Arc::ptr_eq(&before, &active(&store)));

        let err = store.create_user_cocktail(draft("Gimlet", &[]));
        assert!(matches!(err, Err(BackbarError::Storage(_))));
        assert!(store.user_cocktails().is_empty());
    }

    fn stored_recipe_keys(store: &ProfileStore<FlakyStore>) -> Vec<String> {
        ok(store.store.inner.list_keys())
            .into_iter()
            .filter(|key| key.starts_with("user_recipe:"))
            .collect()
    }

    fn stored_recipe(store: &ProfileStore<FlakyStore>, id: UserRecipeId) -> Option<UserRecipe> {
        ok(load_json(&store.store, &user_recipe_key(id)))
    }

    fn assert_unchanged(
        store: &ProfileStore<FlakyStore>,
        before: &Arc<Profile>,
        kept: &UserRecipe,
        keys: &[String],
    ) {
        assert!(Arc::ptr_eq(before, &active(store)));
        assert_eq!(store.user_cocktails(), vec![kept]);
        assert_eq!(stored_recipe(store, kept.id).as_ref(), Some(kept));
        assert_eq!(stored_recipe_keys(store), keys);
        assert_memberships_symmetric(store);
    }

    #[test]
    fn failed_profile_write_rolls_back_user_recipe_changes() {
        let mut store = ProfileStore::new(FlakyStore::default(), "device");
        ok(store.initialize());
        let cabin = ok(store.create_venue("Cabin")).id;
        let kept = ok(store.create_user_cocktail(draft("Kept", &[cabin])));
        let before = active(&store);
        let keys = stored_recipe_keys(&store);
        store.store.fail_profile_sets = true;

        let err = store.create_user_cocktail(draft("Orphan", &[cabin]));
        assert!(matches!(err, Err(BackbarError::Storage(_))));
        assert_unchanged(&store, &before, &kept, &keys);

        let moved = UserRecipeUpdate {
            name: Some("Renamed".to_string()),
            venue_ids: Some(BTreeSet::new()),
            ..Default::default()
        };
        let err = store.update_user_cocktail(kept.id, moved);
        assert!(matches!(err, Err(BackbarError::Storage(_))));
        assert_unchanged(&store, &before, &kept, &keys);

        let err = store.delete_user_cocktail(kept.id);
        assert!(matches!(err, Err(BackbarError::Storage(_))));
        assert_unchanged(&store, &before, &kept, &keys);

        let err = store.delete_venue(cabin);
        assert!(matches!(err, Err(BackbarError::Storage(_))));
        assert_unchanged(&store, &before, &kept, &keys);

        let err = store.clear_custom_data();
        assert!(matches!(err, Err(BackbarError::Storage(_))));
        assert_unchanged(&store, &before, &kept, &keys);

        store.store.fail_profile_sets = false;
        ok(store.delete_venue(cabin));
        assert_memberships_symmetric(&store);
        let reloaded = stored_recipe(&store, kept.id)
            .unwrap_or_else(|| panic!("kept recipe should still be stored"));
        assert!(!reloaded.venue_ids.contains(&cabin));
    }

    #[test]
    fn user_cocktails_are_listed_oldest_first() {
        let mut store = initialized();
        let zest = ok(store.create_user_cocktail(draft("Zest", &[])));
        let amaro = ok(store.create_user_cocktail(draft("Amaro", &[])));

        let hour = time::Duration::hours(1);
        for (id, created_at) in [(zest.id, fixture_time() + hour), (amaro.id, fixture_time())] {
            let key = user_recipe_key(id);
            let mut recipe: UserRecipe = ok(load_json(&store.store, &key))
                .unwrap_or_else(|| panic!("recipe {id} should be stored"));
            recipe.created_at = created_at;
            ok(save_json(&mut store.store, &key, &recipe));
        }
        store.sign_out();
        ok(store.initialize());

        let names = store.user_cocktails().iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Amaro", "Zest"]);
    }

    #[test]
    fn snapshots_are_never_mutated() {
        let mut store = initialized();
        let before = active(&store);

        ok(store.add_favorite(RecipeId::from("11007")));
        ok(store.create_venue("Cabin"));

        assert!(before.favorites.is_empty());
        assert_eq!(before.venues.len(), 1);
        assert_eq!(active(&store).venues.len(), 2);
    }

    #[test]
    fn listeners_run_after_mutations_and_failures_are_contained() {
        let mut store = ProfileStore::new(MemoryStore::new(), "device");
        let favorites_seen = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&favorites_seen);
        let recorder = store.subscribe(move |profile| {
            seen.borrow_mut().push(profile.map(|p| p.favorites.len()));
            Ok(())
        });
        store.subscribe(|_| Err("listener exploded".into()));
        store.subscribe(|_| panic!("listener panicked"));

        ok(store.initialize());
        ok(store.add_favorite(RecipeId::from("1")));
        assert!(store.add_favorite(RecipeId::from(" ")).is_err());
        assert!(store.unsubscribe(recorder));
        assert!(!store.unsubscribe(recorder));
        ok(store.add_favorite(RecipeId::from("2")));

        assert_eq!(*favorites_seen.borrow(), vec![Some(0), Some(1)]);
        assert_eq!(active(&store).favorites.len(), 2);
    }

    #[test]
    fn sign_out_notifies_none_and_reset_deletes_persisted_state() {
        let mut store = initialized();
        ok(store.create_user_cocktail(draft("Gimlet", &[])));
        let last = Rc::new(RefCell::new(Some(true)));
        let seen = Rc::clone(&last);
        store.subscribe(move |profile| {
            *seen.borrow_mut() = Some(profile.is_some());
            Ok(())
        });

        ok(store.reset());
        assert_eq!(*last.borrow(), Some(false));
        assert!(store.profile().is_none());
        assert!(store.store().is_empty());
        assert_eq!(
            store.add_favorite(RecipeId::from("1")).err(),
            Some(BackbarError::NoActiveProfile)
        );

        let fresh = ok(store.initialize());
        assert!(fresh.custom_cocktail_ids.is_empty());
        assert_eq!(*last.borrow(), Some(true));
    }

    #[derive(Debug, Clone)]
    enum Op {
        CreateVenue,
        DeleteVenue(usize),
        CreateRecipe(Vec<usize>),
        MoveRecipe(usize, Vec<usize>),
        DeleteRecipe(usize),
        Favorite(u8),
        DefaultCocktail(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::CreateVenue),
            (0usize..4).prop_map(Op::DeleteVenue),
            proptest::collection::vec(0usize..4, 0..3).prop_map(Op::CreateRecipe),
            (0usize..4, proptest::collection::vec(0usize..4, 0..3))
                .prop_map(|(recipe, venues)| Op::MoveRecipe(recipe, venues)),
            (0usize..4).prop_map(Op::DeleteRecipe),
            any::<u8>().prop_map(Op::Favorite),
            any::<u8>().prop_map(Op::DefaultCocktail),
        ]
    }

    fn pick<T: Copy>(items: &[T], index: usize) -> Option<T> {
        if items.is_empty() {
            None
        } else {
            items.get(index % items.len()).copied()
        }
    }

    proptest! {
        #[test]
        fn property_default_venue_and_membership_invariants_hold(ops in proptest::collection::vec(op_strategy(), 1..25)) {
            let mut store = initialized();
            for op in ops {
                let profile = active(&store);
                let venue_ids = profile.venues.iter().map(|venue| venue.id).collect::<Vec<_>>();
                let recipe_ids = profile.custom_cocktail_ids.iter().copied().collect::<Vec<_>>();
                let chosen = |indexes: &[usize]| {
                    indexes.iter().filter_map(|index| pick(&venue_ids, *index)).collect::<BTreeSet<_>>()
                };
                let _ = match op {
                    Op::CreateVenue => store.create_venue("Pop-up").map(|_| ()),
                    Op::DeleteVenue(index) => match pick(&venue_ids, index) {
                        Some(id) => store.delete_venue(id).map(|_| ()),
                        None => Ok(()),
                    },
                    Op::CreateRecipe(indexes) => {
                        let mut new = draft("Daisy", &[]);
                        new.venue_ids = chosen(&indexes);
                        store.create_user_cocktail(new).map(|_| ())
                    }
                    Op::MoveRecipe(recipe, indexes) => match pick(&recipe_ids, recipe) {
                        Some(id) => store
                            .update_user_cocktail(id, UserRecipeUpdate {
                                venue_ids: Some(chosen(&indexes)),
                                ..UserRecipeUpdate::default()
                            })
                            .map(|_| ()),
                        None => Ok(()),
                    },
                    Op::DeleteRecipe(recipe) => match pick(&recipe_ids, recipe) {
                        Some(id) => store.delete_user_cocktail(id).map(|_| ()),
                        None => Ok(()),
                    },
                    Op::Favorite(n) => store.add_favorite(RecipeId(format!("r{}", n % 5))).map(|_| ()),
                    Op::DefaultCocktail(n) => {
                        let home = default_venue_id(&store);
                        store.remove_cocktail_from_venue(home, &RecipeId(format!("r{}", n % 5))).map(|_| ())
                    }
                };

                let profile = active(&store);
                prop_assert_eq!(profile.venues.iter().filter(|venue| venue.is_default).count(), 1);
                let home = default_venue_id(&store);
                for recipe in store.user_cocktails() {
                    prop_assert!(recipe.venue_ids.contains(&home));
                }
                prop_assert!(profile.venues.iter().all(|venue| !venue.is_default || venue.cocktail_ids.is_empty()));
                assert_memberships_symmetric(&store);
            }
        }
    }
}
