use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use backbar_core::{
    convert, convert_ingredient, gate_by_tier, has_convertible_units, missing_ingredients,
    suggest, venue_listing, AccessTier, BackbarError, CocktailId, CocktailRef,
    EntityKind, Ingredient, KeyValueStore, NewUserRecipe, Profile, ProfileStore, RecipeCatalog,
    RecipeFilters, RecipeId, SettingsUpdate, Suggestion, UnitSystem, UserRecipeId,
    UserRecipeUpdate, Venue, VenueId, VenueUpdate,
};
use backbar_core::search::search;
use backbar_store_sqlite::SqliteKvStore;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV: &str = "BACKBAR_LOG";
const DEFAULT_VENUE_ALIAS: &str = "default";

#[derive(Debug, Parser)]
#[command(name = "bb")]
#[command(about = "Backbar cocktail catalogue CLI")]
struct Cli {
    #[arg(long, env = "BACKBAR_DB", default_value = "./backbar.sqlite3")]
    db: PathBuf,

    /// Profile scope: "device" or an account id.
    #[arg(long, env = "BACKBAR_PROFILE", default_value = "device")]
    profile: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Catalog {
        #[command(subcommand)]
        command: Box<CatalogCommand>,
    },
    Profile {
        #[command(subcommand)]
        command: Box<ProfileCommand>,
    },
    Favorite {
        #[command(subcommand)]
        command: Box<FavoriteCommand>,
    },
    Venue {
        #[command(subcommand)]
        command: Box<VenueCommand>,
    },
    Cocktail {
        #[command(subcommand)]
        command: Box<CocktailCommand>,
    },
    Suggest(SuggestArgs),
    Search(SearchArgs),
    Convert(ConvertArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum CatalogCommand {
    Import(CatalogImportArgs),
    Show,
    Get(RecipeIdArgs),
    Search(SearchArgs),
    Ingredients(IngredientsArgs),
}

#[derive(Debug, Args)]
struct CatalogImportArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct RecipeIdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct IngredientsArgs {
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long, default_value = "")]
    query: String,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    glass: Option<String>,
    #[arg(long)]
    alcoholic: Option<bool>,
    #[arg(long)]
    has_image: Option<bool>,
    #[arg(long = "ingredient")]
    ingredients: Vec<String>,
    #[arg(long)]
    tier: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    Show,
    Settings(SettingsArgs),
    ClearCustomData,
    Reset,
}

#[derive(Debug, Args)]
struct SettingsArgs {
    #[arg(long, value_enum)]
    units: Option<UnitsArg>,
    #[arg(long, value_enum)]
    tier: Option<TierArg>,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    show_images: Option<bool>,
}

#[derive(Debug, Subcommand)]
enum FavoriteCommand {
    Add(RecipeIdArgs),
    Remove(RecipeIdArgs),
    List,
}

#[derive(Debug, Subcommand)]
enum VenueCommand {
    List,
    Show(VenueArgs),
    Create(VenueCreateArgs),
    Rename(VenueRenameArgs),
    Delete(VenueArgs),
    AddIngredient(VenueIngredientArgs),
    RemoveIngredient(VenueIngredientArgs),
    AddCocktail(VenueCocktailArgs),
    RemoveCocktail(VenueCocktailArgs),
    Missing(VenueArgs),
}

#[derive(Debug, Args)]
struct VenueArgs {
    /// Venue id, or "default" for the default venue.
    #[arg(long)]
    venue: String,
}

#[derive(Debug, Args)]
struct VenueCreateArgs {
    #[arg(long)]
    name: String,
}

#[derive(Debug, Args)]
struct VenueRenameArgs {
    #[arg(long)]
    venue: String,
    #[arg(long)]
    name: String,
}

#[derive(Debug, Args)]
struct VenueIngredientArgs {
    #[arg(long)]
    venue: String,
    #[arg(long)]
    name: String,
}

#[derive(Debug, Args)]
struct VenueCocktailArgs {
    #[arg(long)]
    venue: String,
    #[arg(long)]
    recipe: String,
}

#[derive(Debug, Subcommand)]
enum CocktailCommand {
    Create(CocktailCreateArgs),
    Update(CocktailUpdateArgs),
    Delete(CocktailIdArgs),
    List,
}

#[derive(Debug, Args)]
struct CocktailCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    glass: String,
    #[arg(long)]
    instructions: String,
    /// `name` or `name:measure`; repeat for each ingredient.
    #[arg(long = "ingredient")]
    ingredients: Vec<String>,
    #[arg(long = "venue")]
    venues: Vec<String>,
}

#[derive(Debug, Args)]
struct CocktailUpdateArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    glass: Option<String>,
    #[arg(long)]
    instructions: Option<String>,
    #[arg(long = "ingredient")]
    ingredients: Vec<String>,
    /// Replace the venue set; the default venue is always kept.
    #[arg(long = "venue")]
    venues: Vec<String>,
    /// Drop every venue except the default one.
    #[arg(long, conflicts_with = "venues")]
    clear_venues: bool,
}

#[derive(Debug, Args)]
struct CocktailIdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct SuggestArgs {
    #[arg(long = "ingredient")]
    ingredients: Vec<String>,
    /// Add this venue's ingredients to the available set.
    #[arg(long)]
    venue: Option<String>,
    #[arg(long = "exclude")]
    exclude: Vec<String>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct ConvertArgs {
    #[arg(long)]
    measure: String,
    #[arg(long, value_enum, default_value_t = UnitsArg::Metric)]
    units: UnitsArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum UnitsArg {
    Imperial,
    Metric,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TierArg {
    Free,
    Premium,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    if let Err(err) = installed {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Db { command } => {
            let mut store = SqliteKvStore::open(&cli.db)?;
            run_db(*command, &mut store)
        }
        Command::Catalog { command } => run_catalog(*command, &cli.db, &cli.profile),
        Command::Profile { command } => run_profile(*command, &cli.db, &cli.profile),
        Command::Favorite { command } => {
            let mut profiles = open_profiles(&cli.db, &cli.profile)?;
            run_favorite(*command, &mut profiles)
        }
        Command::Venue { command } => {
            let mut profiles = open_profiles(&cli.db, &cli.profile)?;
            run_venue(*command, &mut profiles)
        }
        Command::Cocktail { command } => {
            let mut profiles = open_profiles(&cli.db, &cli.profile)?;
            run_cocktail(*command, &mut profiles)
        }
        Command::Suggest(args) => {
            let profiles = open_profiles(&cli.db, &cli.profile)?;
            run_suggest(&args, &profiles)
        }
        Command::Search(args) => {
            let profiles = open_profiles(&cli.db, &cli.profile)?;
            run_search(&args, &profiles)
        }
        Command::Convert(args) => run_convert(&args),
    }
}

fn open_profiles(db: &Path, scope: &str) -> Result<ProfileStore<SqliteKvStore>> {
    let store = SqliteKvStore::open_migrated(db)?;
    let mut profiles = ProfileStore::new(store, scope);
    profiles.subscribe(|profile| {
        if let Some(profile) = profile {
            tracing::debug!(
                favorites = profile.favorites.len(),
                venues = profile.venues.len(),
                user_recipes = profile.custom_cocktail_ids.len(),
                "profile updated"
            );
        } else {
            tracing::debug!("profile signed out");
        }
        Ok(())
    });
    profiles
        .initialize()
        .with_context(|| format!("failed to initialize profile {scope}"))?;
    Ok(profiles)
}

fn load_catalog(store: &impl KeyValueStore) -> Result<RecipeCatalog> {
    let mut catalog = RecipeCatalog::new();
    if !catalog.restore(store).context("failed to restore cached catalog")? {
        tracing::warn!("no catalog imported yet; run `bb catalog import`");
    }
    Ok(catalog)
}

fn active_profile(profiles: &ProfileStore<SqliteKvStore>) -> Result<Arc<Profile>> {
    profiles.profile().ok_or_else(|| anyhow!(BackbarError::NoActiveProfile))
}

fn run_db(command: DbCommand, store: &mut SqliteKvStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::Backup(args) => run_db_backup(&args, store),
        DbCommand::IntegrityCheck => run_db_integrity_check(store),
    }
}

fn run_db_schema_version(store: &SqliteKvStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty()
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteKvStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }))?;
        return Ok(());
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_db_backup(args: &DbBackupArgs, store: &mut SqliteKvStore) -> Result<()> {
    store.migrate()?;
    store.backup_database(&args.out)?;
    emit_json(serde_json::json!({
        "backup_path": args.out,
        "status": "ok"
    }))
}

fn run_db_integrity_check(store: &SqliteKvStore) -> Result<()> {
    let report = store.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

fn run_catalog(command: CatalogCommand, db: &Path, scope: &str) -> Result<()> {
    match command {
        CatalogCommand::Import(args) => {
            let mut store = SqliteKvStore::open_migrated(db)?;
            let raw = fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read dataset {}", args.file.display()))?;
            let mut catalog = RecipeCatalog::new();
            catalog.load_json(&raw)?;
            catalog.cache(&mut store)?;
            emit_json(serde_json::json!({
                "imported": catalog.len(),
                "metadata": catalog.metadata()
            }))
        }
        CatalogCommand::Show => {
            let store = SqliteKvStore::open_migrated(db)?;
            let catalog = load_catalog(&store)?;
            let top_ingredients =
                catalog.ingredients_by_frequency().iter().take(10).collect::<Vec<_>>();
            emit_json(serde_json::json!({
                "count": catalog.len(),
                "metadata": catalog.metadata(),
                "top_ingredients": top_ingredients
            }))
        }
        CatalogCommand::Get(args) => {
            let profiles = open_profiles(db, scope)?;
            let profile = active_profile(&profiles)?;
            let catalog = load_catalog(profiles.store())?;
            let id = RecipeId::from(args.id.as_str());
            let recipe = catalog
                .get_by_id(&id)
                .ok_or_else(|| BackbarError::NotFound { kind: EntityKind::Recipe, id: args.id })?;

            let settings = &profile.settings;
            let ingredients = recipe
                .ingredients
                .iter()
                .map(|ingredient| convert_ingredient(ingredient, settings.unit_system))
                .collect::<Vec<_>>();
            emit_json(serde_json::json!({
                "recipe": recipe,
                "favorite": profile.is_favorite(&id),
                "display": {
                    "unit_system": settings.unit_system.as_str(),
                    "language": settings.language,
                    "instructions": recipe.instructions_for(&settings.language),
                    "ingredients": ingredients,
                    "image": recipe.image.as_ref().filter(|_| settings.show_images)
                }
            }))
        }
        CatalogCommand::Search(args) => {
            let store = SqliteKvStore::open_migrated(db)?;
            let catalog = load_catalog(&store)?;
            let hits = catalog.search(&args.query, &filters_from_args(&args));
            emit_json(serde_json::json!({
                "query": args.query,
                "count": hits.len(),
                "recipes": hits
            }))
        }
        CatalogCommand::Ingredients(args) => {
            let store = SqliteKvStore::open_migrated(db)?;
            let catalog = load_catalog(&store)?;
            let ingredients = match args.prefix.as_deref() {
                Some(prefix) => catalog
                    .suggest_ingredient_names(prefix, args.limit)
                    .into_iter()
                    .map(|name| serde_json::json!({ "name": name }))
                    .collect::<Vec<_>>(),
                None => catalog
                    .ingredients_by_frequency()
                    .iter()
                    .take(args.limit)
                    .map(|entry| serde_json::json!({ "name": entry.name, "count": entry.count }))
                    .collect(),
            };
            emit_json(serde_json::json!({ "ingredients": ingredients }))
        }
    }
}

fn run_profile(command: ProfileCommand, db: &Path, scope: &str) -> Result<()> {
    match command {
        ProfileCommand::Show => {
            let profiles = open_profiles(db, scope)?;
            let profile = active_profile(&profiles)?;
            emit_json(serde_json::json!({
                "scope": profiles.scope(),
                "profile": &*profile
            }))
        }
        ProfileCommand::Settings(args) => {
            let mut profiles = open_profiles(db, scope)?;
            let update = SettingsUpdate {
                unit_system: args.units.map(UnitsArg::into_unit_system),
                access_tier: args.tier.map(TierArg::into_access_tier),
                language: args.language,
                show_images: args.show_images,
            };
            let profile = profiles.update_settings(update)?;
            emit_json(serde_json::json!({ "settings": profile.settings }))
        }
        ProfileCommand::ClearCustomData => {
            let mut profiles = open_profiles(db, scope)?;
            let summary = profiles.clear_custom_data()?;
            emit_json(serde_json::json!({
                "deleted_user_recipes": summary.deleted,
                "failed_user_recipes": summary.failed
            }))
        }
        ProfileCommand::Reset => {
            // Skips initialize so an undecodable profile can still be reset.
            let mut profiles = ProfileStore::new(SqliteKvStore::open_migrated(db)?, scope);
            profiles.reset()?;
            emit_json(serde_json::json!({
                "scope": profiles.scope(),
                "reset": true
            }))
        }
    }
}

fn run_favorite(
    command: FavoriteCommand,
    profiles: &mut ProfileStore<SqliteKvStore>,
) -> Result<()> {
    let profile = match command {
        FavoriteCommand::Add(args) => profiles.add_favorite(RecipeId::from(args.id.as_str()))?,
        FavoriteCommand::Remove(args) => {
            profiles.remove_favorite(&RecipeId::from(args.id.as_str()))?
        }
        FavoriteCommand::List => active_profile(profiles)?,
    };
    emit_json(serde_json::json!({ "favorites": profile.favorites }))
}

fn run_venue(command: VenueCommand, profiles: &mut ProfileStore<SqliteKvStore>) -> Result<()> {
    match command {
        VenueCommand::List => {
            let profile = active_profile(profiles)?;
            let venues = profile
                .venues
                .iter()
                .map(|venue| venue_json(&profile, venue))
                .collect::<Vec<_>>();
            emit_json(serde_json::json!({ "venues": venues }))
        }
        VenueCommand::Show(args) => {
            let profile = active_profile(profiles)?;
            let venue = profiles.venue(resolve_venue_id(&profile, &args.venue)?)?;
            let catalog = load_catalog(profiles.store())?;
            let listing = venue_listing(
                &profile,
                &venue,
                &catalog,
                profiles.user_cocktails(),
                profile.settings.access_tier,
            );
            let cocktails = listing.iter().map(cocktail_json).collect::<Vec<_>>();
            emit_json(serde_json::json!({
                "venue": venue_json(&profile, &venue),
                "cocktails": cocktails
            }))
        }
        VenueCommand::Create(args) => {
            let venue = profiles.create_venue(&args.name)?;
            emit_json(serde_json::json!({ "venue": venue }))
        }
        VenueCommand::Rename(args) => {
            let profile = active_profile(profiles)?;
            let id = resolve_venue_id(&profile, &args.venue)?;
            let venue =
                profiles.update_venue(id, VenueUpdate { name: Some(args.name), ingredients: None })?;
            emit_json(serde_json::json!({ "venue": venue }))
        }
        VenueCommand::Delete(args) => {
            let profile = active_profile(profiles)?;
            let id = resolve_venue_id(&profile, &args.venue)?;
            profiles.delete_venue(id)?;
            emit_json(serde_json::json!({ "deleted_venue_id": id.to_string() }))
        }
        VenueCommand::AddIngredient(args) => {
            let profile = active_profile(profiles)?;
            let id = resolve_venue_id(&profile, &args.venue)?;
            let venue = profiles.add_ingredient_to_venue(id, &args.name)?;
            emit_json(serde_json::json!({ "venue": venue }))
        }
        VenueCommand::RemoveIngredient(args) => {
            let profile = active_profile(profiles)?;
            let id = resolve_venue_id(&profile, &args.venue)?;
            let venue = profiles.remove_ingredient_from_venue(id, &args.name)?;
            emit_json(serde_json::json!({ "venue": venue }))
        }
        VenueCommand::AddCocktail(args) => {
            let profile = active_profile(profiles)?;
            let id = resolve_venue_id(&profile, &args.venue)?;
            profiles.add_cocktail_to_venue(id, RecipeId::from(args.recipe.as_str()))?;
            emit_json(serde_json::json!({
                "venue_id": id.to_string(),
                "recipe_ids": profiles.venue_recipe_ids(id)?
            }))
        }
        VenueCommand::RemoveCocktail(args) => {
            let profile = active_profile(profiles)?;
            let id = resolve_venue_id(&profile, &args.venue)?;
            profiles.remove_cocktail_from_venue(id, &RecipeId::from(args.recipe.as_str()))?;
            emit_json(serde_json::json!({
                "venue_id": id.to_string(),
                "recipe_ids": profiles.venue_recipe_ids(id)?
            }))
        }
        VenueCommand::Missing(args) => {
            let profile = active_profile(profiles)?;
            let venue = profiles.venue(resolve_venue_id(&profile, &args.venue)?)?;
            let catalog = load_catalog(profiles.store())?;
            let listing = venue_listing(
                &profile,
                &venue,
                &catalog,
                profiles.user_cocktails(),
                profile.settings.access_tier,
            );
            let missing = missing_ingredients(listing.iter(), &venue.ingredients);
            emit_json(serde_json::json!({
                "venue_id": venue.id.to_string(),
                "missing": missing
            }))
        }
    }
}

fn run_cocktail(
    command: CocktailCommand,
    profiles: &mut ProfileStore<SqliteKvStore>,
) -> Result<()> {
    match command {
        CocktailCommand::Create(args) => {
            let profile = active_profile(profiles)?;
            let draft = NewUserRecipe {
                name: args.name,
                glass: args.glass,
                instructions: args.instructions,
                ingredients: parse_ingredients(&args.ingredients),
                venue_ids: resolve_venue_ids(&profile, &args.venues)?,
            };
            let recipe = profiles.create_user_cocktail(draft)?;
            emit_json(serde_json::json!({ "cocktail": recipe }))
        }
        CocktailCommand::Update(args) => {
            let profile = active_profile(profiles)?;
            let id = parse_user_recipe_id(&args.id)?;
            let update = UserRecipeUpdate {
                name: args.name,
                glass: args.glass,
                instructions: args.instructions,
                ingredients: (!args.ingredients.is_empty())
                    .then(|| parse_ingredients(&args.ingredients)),
                venue_ids: if args.clear_venues {
                    Some(BTreeSet::new())
                } else if args.venues.is_empty() {
                    None
                } else {
                    Some(resolve_venue_ids(&profile, &args.venues)?)
                },
            };
            let recipe = profiles.update_user_cocktail(id, update)?;
            emit_json(serde_json::json!({ "cocktail": recipe }))
        }
        CocktailCommand::Delete(args) => {
            let id = parse_user_recipe_id(&args.id)?;
            profiles.delete_user_cocktail(id)?;
            emit_json(serde_json::json!({ "deleted_cocktail_id": id.to_string() }))
        }
        CocktailCommand::List => {
            emit_json(serde_json::json!({ "cocktails": profiles.user_cocktails() }))
        }
    }
}

fn run_suggest(args: &SuggestArgs, profiles: &ProfileStore<SqliteKvStore>) -> Result<()> {
    let profile = active_profile(profiles)?;
    let catalog = load_catalog(profiles.store())?;

    let mut available = args.ingredients.clone();
    if let Some(raw) = args.venue.as_deref() {
        let venue = profiles.venue(resolve_venue_id(&profile, raw)?)?;
        available.extend(venue.ingredients);
    }

    let mut candidates = profiles
        .user_cocktails()
        .into_iter()
        .map(CocktailRef::UserAuthored)
        .collect::<Vec<_>>();
    candidates.extend(
        gate_by_tier(catalog.get_all(), profile.settings.access_tier)
            .into_iter()
            .map(CocktailRef::Imported),
    );

    let exclude =
        args.exclude.iter().map(|raw| parse_cocktail_id(raw)).collect::<BTreeSet<_>>();
    let mut suggestions = suggest(&available, &candidates, &exclude);
    if let Some(limit) = args.limit {
        suggestions.truncate(limit);
    }

    let suggestions = suggestions.iter().map(suggestion_json).collect::<Vec<_>>();
    emit_json(serde_json::json!({
        "available": available,
        "suggestions": suggestions
    }))
}

fn run_search(args: &SearchArgs, profiles: &ProfileStore<SqliteKvStore>) -> Result<()> {
    let profile = active_profile(profiles)?;
    let catalog = load_catalog(profiles.store())?;
    let hits = search(
        &catalog,
        profiles.user_cocktails(),
        &args.query,
        &filters_from_args(args),
        profile.settings.access_tier,
    );

    let results = hits.into_iter().map(cocktail_json).collect::<Vec<_>>();
    emit_json(serde_json::json!({
        "query": args.query,
        "count": results.len(),
        "results": results
    }))
}

fn run_convert(args: &ConvertArgs) -> Result<()> {
    let units = args.units.into_unit_system();
    emit_json(serde_json::json!({
        "measure": args.measure,
        "units": units.as_str(),
        "convertible": has_convertible_units(&args.measure),
        "converted": convert(&args.measure, units)
    }))
}

fn filters_from_args(args: &SearchArgs) -> RecipeFilters {
    RecipeFilters {
        alcoholic: args.alcoholic,
        category: args.category.clone(),
        glass: args.glass.clone(),
        has_image: args.has_image,
        ingredients: args.ingredients.clone(),
        tier: args.tier,
    }
}

fn venue_json(profile: &Profile, venue: &Venue) -> Value {
    serde_json::json!({
        "id": venue.id.to_string(),
        "name": venue.name,
        "is_default": venue.is_default,
        "ingredients": venue.ingredients,
        "recipe_ids": profile.venue_recipe_ids(venue),
        "custom_cocktail_ids": venue.custom_cocktail_ids
    })
}

fn cocktail_json(cocktail: CocktailRef<'_>) -> Value {
    let id = match cocktail.id() {
        CocktailId::UserAuthored(id) => id.to_string(),
        CocktailId::Imported(id) => id.to_string(),
    };
    serde_json::json!({
        "origin": cocktail.origin().as_str(),
        "id": id,
        "name": cocktail.name(),
        "glass": cocktail.glass()
    })
}

fn suggestion_json(suggestion: &Suggestion<'_>) -> Value {
    let mut value = cocktail_json(suggestion.cocktail);
    if let Value::Object(object) = &mut value {
        object.insert("score".to_string(), serde_json::json!(suggestion.score));
        object.insert("match_count".to_string(), serde_json::json!(suggestion.match_count));
        object.insert(
            "total_ingredients".to_string(),
            serde_json::json!(suggestion.total_ingredients),
        );
        object.insert("matched".to_string(), serde_json::json!(suggestion.matched));
        object.insert("missing".to_string(), serde_json::json!(suggestion.missing));
    }
    value
}

fn parse_ingredients(raw: &[String]) -> Vec<Ingredient> {
    raw.iter()
        .map(|entry| match entry.split_once(':') {
            Some((name, measure)) => Ingredient::new(name.trim(), Some(measure.trim())),
            None => Ingredient::new(entry.trim(), None),
        })
        .collect()
}

fn resolve_venue_id(profile: &Profile, raw: &str) -> Result<VenueId> {
    if raw.eq_ignore_ascii_case(DEFAULT_VENUE_ALIAS) {
        return profile
            .default_venue()
            .map(|venue| venue.id)
            .ok_or_else(|| anyhow!("profile has no default venue"));
    }
    VenueId::from_str(raw).with_context(|| format!("invalid venue id: {raw}"))
}

fn resolve_venue_ids(profile: &Profile, raw: &[String]) -> Result<BTreeSet<VenueId>> {
    raw.iter().map(|value| resolve_venue_id(profile, value)).collect()
}

fn parse_user_recipe_id(raw: &str) -> Result<UserRecipeId> {
    UserRecipeId::from_str(raw).with_context(|| format!("invalid cocktail id: {raw}"))
}

// Catalog ids never parse as ULIDs, so anything that does is a user recipe.
fn parse_cocktail_id(raw: &str) -> CocktailId {
    match UserRecipeId::from_str(raw) {
        Ok(id) => CocktailId::UserAuthored(id),
        Err(_) => CocktailId::Imported(RecipeId::from(raw)),
    }
}

impl UnitsArg {
    fn into_unit_system(self) -> UnitSystem {
        match self {
            Self::Imperial => UnitSystem::Imperial,
            Self::Metric => UnitSystem::Metric,
        }
    }
}

impl TierArg {
    fn into_access_tier(self) -> AccessTier {
        match self {
            Self::Free => AccessTier::Free,
            Self::Premium => AccessTier::Premium,
        }
    }
}
