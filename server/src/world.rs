//! Authoritative store for accounts, characters and clans
//!
//! Every record lives behind one lock. Each operation takes the lock,
//! builds the changed collections beside the live ones, writes them through
//! the persistence adapter and swaps them in only after the write succeeded.
//! A failed save leaves the in-memory state as it was before the call, so
//! memory never runs ahead of disk. Writes run on the blocking pool so a
//! slow disk holds up only callers waiting on the lock, not the runtime.
//!
//! Callers never see a reference into the store: reads hand out clones and
//! writes go through closures run under the lock.

use crate::credential::Credential;
use crate::error::{AuthError, PersistenceError, WorldError};
use crate::persistence::{Document, DocumentKind, Persistence};
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::{Location, MapBounds};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keys owned by the store that default attributes may not override
const RESERVED_KEYS: [&str; 3] = ["user_name", "clan", "location"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub user_name: String,
    #[serde(default)]
    pub clan: Option<String>,
    #[serde(default)]
    pub location: Location,
    /// Extra attributes copied from the character defaults document
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clan {
    pub name: String,
    pub members: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct WorldState {
    accounts: BTreeMap<String, Credential>,
    characters: BTreeMap<String, Character>,
    clans: BTreeMap<String, Clan>,
}

pub struct WorldStore {
    state: RwLock<WorldState>,
    persistence: Arc<dyn Persistence>,
    bounds: MapBounds,
    defaults: Map<String, Value>,
}

impl WorldStore {
    /// Loads every document and builds the store.
    ///
    /// Characters outside the map are clamped back inside, and accounts
    /// without a character get a fresh one. Both repairs are only written
    /// out with the next mutation of that document.
    pub fn load(persistence: Arc<dyn Persistence>, bounds: MapBounds) -> Result<Self, WorldError> {
        let accounts: BTreeMap<String, Credential> =
            decode(DocumentKind::Accounts, persistence.load(DocumentKind::Accounts)?)?;
        let mut characters: BTreeMap<String, Character> =
            decode(DocumentKind::Characters, persistence.load(DocumentKind::Characters)?)?;
        let clans: BTreeMap<String, Clan> =
            decode(DocumentKind::Clans, persistence.load(DocumentKind::Clans)?)?;

        let mut defaults = persistence.load(DocumentKind::CharacterDefaults)?;
        for key in RESERVED_KEYS {
            defaults.remove(key);
        }

        for (name, character) in characters.iter_mut() {
            if !bounds.contains(character.location) {
                let clamped = bounds.clamp(character.location);
                warn!(
                    "Character {} stored at {} is outside the map, moved to {}",
                    name, character.location, clamped
                );
                character.location = clamped;
            }
            if !accounts.contains_key(name) {
                warn!("Character {} has no account", name);
            }
        }

        let plaintext = accounts
            .values()
            .filter(|credential| credential.is_legacy_plaintext())
            .count();
        if plaintext > 0 {
            warn!("{} accounts still use plaintext credentials", plaintext);
        }

        for name in accounts.keys() {
            if !characters.contains_key(name) {
                warn!("Account {} has no character, creating one", name);
                characters.insert(name.clone(), new_character(&defaults, name));
            }
        }

        info!(
            "Loaded {} accounts, {} characters, {} clans",
            accounts.len(),
            characters.len(),
            clans.len()
        );

        Ok(Self {
            state: RwLock::new(WorldState {
                accounts,
                characters,
                clans,
            }),
            persistence,
            bounds,
            defaults,
        })
    }

    pub fn bounds(&self) -> MapBounds {
        self.bounds
    }

    pub async fn account_exists(&self, username: &str) -> bool {
        self.state.read().await.accounts.contains_key(username)
    }

    /// Creates an account and its character at the origin
    pub async fn create_account(&self, username: &str, secret: &str) -> Result<Character, WorldError> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(username) {
            return Err(AuthError::AccountExists.into());
        }

        let character = new_character(&self.defaults, username);
        let mut accounts = state.accounts.clone();
        accounts.insert(username.to_string(), Credential::hash(secret));
        let mut characters = state.characters.clone();
        characters.insert(username.to_string(), character.clone());

        if let Err(e) = self.save(DocumentKind::Accounts, &accounts).await {
            error!("Failed to persist new account {}: {}", username, e);
            return Err(e.into());
        }
        if let Err(e) = self.save(DocumentKind::Characters, &characters).await {
            error!("Failed to persist character of new account {}: {}", username, e);
            // The accounts document already holds the new entry
            if let Err(e) = self.save(DocumentKind::Accounts, &state.accounts).await {
                error!("Failed to restore accounts document: {}", e);
            }
            return Err(e.into());
        }

        state.accounts = accounts;
        state.characters = characters;
        info!("Created account {}", username);
        Ok(character)
    }

    pub async fn authenticate(&self, username: &str, secret: &str) -> Result<(), AuthError> {
        let state = self.state.read().await;
        match state.accounts.get(username) {
            None => Err(AuthError::UnknownUser),
            Some(credential) if credential.verify(secret) => Ok(()),
            Some(_) => Err(AuthError::InvalidCredential),
        }
    }

    /// Runs `f` with exclusive access to one character and persists the result.
    ///
    /// The closure works on a copy; the copy replaces the stored record only
    /// once the characters document has been saved. A closure that leaves the
    /// record unchanged causes no save.
    pub async fn with_character<T, F>(&self, username: &str, f: F) -> Result<T, WorldError>
    where
        F: FnOnce(&mut Character) -> T,
    {
        let mut state = self.state.write().await;
        let current = state
            .characters
            .get(username)
            .ok_or_else(|| WorldError::NotFound(username.to_string()))?;

        let mut updated = current.clone();
        let output = f(&mut updated);
        updated.user_name = current.user_name.clone();
        updated.location = self.bounds.clamp(updated.location);

        if updated == *current {
            return Ok(output);
        }

        let mut characters = state.characters.clone();
        characters.insert(username.to_string(), updated);
        if let Err(e) = self.save(DocumentKind::Characters, &characters).await {
            error!("Failed to persist character {}: {}", username, e);
            return Err(e.into());
        }

        state.characters = characters;
        Ok(output)
    }

    pub async fn get_character(&self, username: &str) -> Result<Character, WorldError> {
        self.state
            .read()
            .await
            .characters
            .get(username)
            .cloned()
            .ok_or_else(|| WorldError::NotFound(username.to_string()))
    }

    pub async fn get_clan(&self, name: &str) -> Option<Clan> {
        self.state.read().await.clans.get(name).cloned()
    }

    /// Creates a clan whose only member is `founder`
    pub async fn create_clan(&self, founder: &str, name: &str) -> Result<Clan, WorldError> {
        let mut state = self.state.write().await;
        if state.clans.contains_key(name) {
            return Err(WorldError::ClanExists(name.to_string()));
        }

        let character = state
            .characters
            .get(founder)
            .ok_or_else(|| WorldError::NotFound(founder.to_string()))?;
        if character.clan.is_some() {
            return Err(WorldError::AlreadyInClan(founder.to_string()));
        }

        let mut member = character.clone();
        member.clan = Some(name.to_string());
        let clan = Clan {
            name: name.to_string(),
            members: BTreeSet::from([founder.to_string()]),
        };

        let mut clans = state.clans.clone();
        clans.insert(name.to_string(), clan.clone());
        let mut characters = state.characters.clone();
        characters.insert(founder.to_string(), member);

        if let Err(e) = self.save(DocumentKind::Clans, &clans).await {
            error!("Failed to persist clan {}: {}", name, e);
            return Err(e.into());
        }
        if let Err(e) = self.save(DocumentKind::Characters, &characters).await {
            error!("Failed to persist founder of clan {}: {}", name, e);
            if let Err(e) = self.save(DocumentKind::Clans, &state.clans).await {
                error!("Failed to restore clans document: {}", e);
            }
            return Err(e.into());
        }

        state.clans = clans;
        state.characters = characters;
        info!("{} founded clan {}", founder, name);
        Ok(clan)
    }

    /// Writes one document on the blocking pool; the caller keeps the lock
    async fn save<T: Serialize>(
        &self,
        kind: DocumentKind,
        records: &BTreeMap<String, T>,
    ) -> Result<(), PersistenceError> {
        let document = encode(kind, records)?;
        let persistence = Arc::clone(&self.persistence);
        tokio::task::spawn_blocking(move || persistence.save(kind, &document))
            .await
            .map_err(|source| PersistenceError::Interrupted { kind, source })?
    }
}

fn new_character(defaults: &Map<String, Value>, username: &str) -> Character {
    Character {
        user_name: username.to_string(),
        clan: None,
        location: Location::default(),
        attributes: defaults.clone(),
    }
}

fn encode<T: Serialize>(
    kind: DocumentKind,
    records: &BTreeMap<String, T>,
) -> Result<Document, PersistenceError> {
    records
        .iter()
        .map(|(key, record)| serde_json::to_value(record).map(|value| (key.clone(), value)))
        .collect::<Result<Document, _>>()
        .map_err(|source| PersistenceError::Format { kind, source })
}

fn decode<T: DeserializeOwned>(
    kind: DocumentKind,
    document: Document,
) -> Result<BTreeMap<String, T>, PersistenceError> {
    document
        .into_iter()
        .map(|(key, value)| serde_json::from_value(value).map(|record| (key, record)))
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map_err(|source| PersistenceError::Format { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{DataPaths, JsonFilePersistence, MemoryPersistence};
    use serde_json::json;
    use shared::Direction;

    fn memory_store() -> (Arc<MemoryPersistence>, WorldStore) {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = WorldStore::load(persistence.clone(), MapBounds::default()).unwrap();
        (persistence, store)
    }

    fn step(direction: Direction) -> impl FnOnce(&mut Character) -> Location {
        let bounds = MapBounds::default();
        move |character| {
            character.location = bounds.step(character.location, direction);
            character.location
        }
    }

    #[tokio::test]
    async fn test_create_account_starts_at_origin() {
        let (persistence, store) = memory_store();

        let character = store.create_account("bob", "secret").await.unwrap();
        assert_eq!(character.user_name, "bob");
        assert_eq!(character.location, Location::new(0, 0));
        assert_eq!(character.clan, None);

        let saved = persistence.document(DocumentKind::Characters).unwrap();
        assert_eq!(saved["bob"]["location"], json!({ "x": 0, "y": 0 }));
        assert!(persistence
            .document(DocumentKind::Accounts)
            .unwrap()
            .contains_key("bob"));
    }

    #[tokio::test]
    async fn test_duplicate_account_keeps_first_credential() {
        let (_, store) = memory_store();

        store.create_account("alice", "pw").await.unwrap();
        match store.create_account("alice", "pw2").await {
            Err(WorldError::Auth(AuthError::AccountExists)) => {}
            other => panic!("Unexpected result: {:?}", other),
        }

        assert!(store.authenticate("alice", "pw").await.is_ok());
        assert_eq!(
            store.authenticate("alice", "pw2").await,
            Err(AuthError::InvalidCredential)
        );
    }

    #[tokio::test]
    async fn test_authenticate_unknown_user() {
        let (_, store) = memory_store();
        assert_eq!(
            store.authenticate("nobody", "pw").await,
            Err(AuthError::UnknownUser)
        );
    }

    #[tokio::test]
    async fn test_defaults_are_copied_into_new_characters() {
        let mut defaults = Document::new();
        defaults.insert("health".to_string(), json!(100));
        defaults.insert("location".to_string(), json!({ "x": 9, "y": 9 }));
        let persistence =
            Arc::new(MemoryPersistence::new().with_document(DocumentKind::CharacterDefaults, defaults));
        let store = WorldStore::load(persistence, MapBounds::default()).unwrap();

        let character = store.create_account("carol", "pw").await.unwrap();
        assert_eq!(character.attributes.get("health"), Some(&json!(100)));
        assert_eq!(character.location, Location::new(0, 0));
    }

    #[tokio::test]
    async fn test_failed_account_save_rolls_back() {
        let (persistence, store) = memory_store();
        persistence.fail_saves(DocumentKind::Characters, true);

        match store.create_account("dave", "pw").await {
            Err(WorldError::Persistence(_)) => {}
            other => panic!("Unexpected result: {:?}", other),
        }

        assert!(!store.account_exists("dave").await);
        assert!(store.get_character("dave").await.is_err());
        let accounts = persistence.document(DocumentKind::Accounts).unwrap();
        assert!(!accounts.contains_key("dave"));

        persistence.fail_saves(DocumentKind::Characters, false);
        assert!(store.create_account("dave", "pw").await.is_ok());
    }

    #[tokio::test]
    async fn test_with_character_persists_change() {
        let (persistence, store) = memory_store();
        store.create_account("bob", "secret").await.unwrap();

        let location = store
            .with_character("bob", step(Direction::North))
            .await
            .unwrap();
        assert_eq!(location, Location::new(0, 1));

        let saved = persistence.document(DocumentKind::Characters).unwrap();
        assert_eq!(saved["bob"]["location"], json!({ "x": 0, "y": 1 }));
    }

    #[tokio::test]
    async fn test_with_character_rolls_back_on_save_failure() {
        let (persistence, store) = memory_store();
        store.create_account("bob", "secret").await.unwrap();
        persistence.fail_saves(DocumentKind::Characters, true);

        let result = store.with_character("bob", step(Direction::East)).await;
        assert!(matches!(result, Err(WorldError::Persistence(_))));

        let character = store.get_character("bob").await.unwrap();
        assert_eq!(character.location, Location::new(0, 0));
    }

    #[tokio::test]
    async fn test_unchanged_character_is_not_saved() {
        let (persistence, store) = memory_store();
        store.create_account("bob", "secret").await.unwrap();
        persistence.fail_saves(DocumentKind::Characters, true);

        let result = store.with_character("bob", |character| character.location).await;
        assert_eq!(result.unwrap(), Location::new(0, 0));
    }

    #[tokio::test]
    async fn test_with_character_not_found() {
        let (_, store) = memory_store();
        match store.with_character("ghost", |_| ()).await {
            Err(WorldError::NotFound(name)) => assert_eq!(name, "ghost"),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_interleaved_moves_are_linearizable_per_character() {
        let (_, store) = memory_store();
        let store = Arc::new(store);
        let bounds = store.bounds();

        let plans: Vec<(String, Vec<Direction>)> = (0..8)
            .map(|i| {
                let moves = (0..40)
                    .map(|n| Direction::ALL[(i + n * (i + 1)) % 4])
                    .collect();
                (format!("player{}", i), moves)
            })
            .collect();

        for (name, _) in &plans {
            store.create_account(name, "pw").await.unwrap();
        }

        let mut handles = Vec::new();
        for (name, moves) in plans.clone() {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for direction in moves {
                    store.with_character(&name, step(direction)).await.unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for (name, moves) in plans {
            let expected = moves
                .into_iter()
                .fold(Location::default(), |at, direction| bounds.step(at, direction));
            let character = store.get_character(&name).await.unwrap();
            assert_eq!(character.location, expected, "{} diverged", name);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_updates_to_one_character_are_not_lost() {
        let (_, store) = memory_store();
        let store = Arc::new(store);
        store.create_account("bob", "pw").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    store.with_character("bob", step(Direction::North)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let character = store.get_character("bob").await.unwrap();
        assert_eq!(character.location, Location::new(0, 40));
    }

    #[tokio::test]
    async fn test_reload_from_disk_reflects_moves() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::in_dir(dir.path());

        {
            let store =
                WorldStore::load(Arc::new(JsonFilePersistence::new(paths.clone())), MapBounds::default())
                    .unwrap();
            store.create_account("bob", "secret").await.unwrap();
            for _ in 0..3 {
                store.with_character("bob", step(Direction::North)).await.unwrap();
            }
        }

        let reloaded =
            WorldStore::load(Arc::new(JsonFilePersistence::new(paths.clone())), MapBounds::default())
                .unwrap();
        let character = reloaded.get_character("bob").await.unwrap();
        assert_eq!(character.location, Location::new(0, 3));
        assert!(reloaded.authenticate("bob", "secret").await.is_ok());

        // A second reload of the same files gives the same single record
        let again =
            WorldStore::load(Arc::new(JsonFilePersistence::new(paths)), MapBounds::default()).unwrap();
        assert_eq!(again.get_character("bob").await.unwrap(), character);
    }

    #[tokio::test]
    async fn test_load_repairs_out_of_bounds_and_missing_characters() {
        let mut accounts = Document::new();
        accounts.insert("legacy".to_string(), json!("plain"));
        accounts.insert("wanderer".to_string(), json!("pw"));
        let mut characters = Document::new();
        characters.insert(
            "wanderer".to_string(),
            json!({ "user_name": "wanderer", "clan": null, "location": { "x": 0, "y": -50 } }),
        );

        let persistence = Arc::new(
            MemoryPersistence::new()
                .with_document(DocumentKind::Accounts, accounts)
                .with_document(DocumentKind::Characters, characters),
        );
        let store = WorldStore::load(persistence, MapBounds::default()).unwrap();

        let wanderer = store.get_character("wanderer").await.unwrap();
        assert_eq!(wanderer.location, Location::new(0, -49));

        let legacy = store.get_character("legacy").await.unwrap();
        assert_eq!(legacy.location, Location::new(0, 0));
        assert!(store.authenticate("legacy", "plain").await.is_ok());
    }

    #[tokio::test]
    async fn test_load_clamps_extreme_coordinates() {
        let mut characters = Document::new();
        characters.insert(
            "edge".to_string(),
            json!({ "user_name": "edge", "location": { "x": i32::MIN, "y": i32::MAX } }),
        );
        let persistence =
            Arc::new(MemoryPersistence::new().with_document(DocumentKind::Characters, characters));

        let store = WorldStore::load(persistence, MapBounds::default()).unwrap();
        let edge = store.get_character("edge").await.unwrap();
        assert_eq!(edge.location, Location::new(-49, 49));
    }

    /// Persistence whose saves stall the calling thread
    struct SlowPersistence {
        inner: MemoryPersistence,
        delay: std::time::Duration,
    }

    impl Persistence for SlowPersistence {
        fn load(&self, kind: DocumentKind) -> Result<Document, PersistenceError> {
            self.inner.load(kind)
        }

        fn save(&self, kind: DocumentKind, document: &Document) -> Result<(), PersistenceError> {
            std::thread::sleep(self.delay);
            self.inner.save(kind, document)
        }
    }

    #[tokio::test]
    async fn test_slow_save_does_not_stall_the_runtime() {
        let persistence = Arc::new(SlowPersistence {
            inner: MemoryPersistence::new(),
            delay: std::time::Duration::from_millis(300),
        });
        let store = Arc::new(WorldStore::load(persistence, MapBounds::default()).unwrap());

        // Single-threaded runtime: the ticker only advances while the save is off this thread
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            })
        };

        store.create_account("bob", "pw").await.unwrap();
        ticker.abort();

        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) >= 10);
        assert!(store.account_exists("bob").await);
    }

    #[tokio::test]
    async fn test_create_clan() {
        let (persistence, store) = memory_store();
        store.create_account("bob", "pw").await.unwrap();
        store.create_account("eve", "pw").await.unwrap();

        let clan = store.create_clan("bob", "wolves").await.unwrap();
        assert!(clan.members.contains("bob"));
        assert_eq!(
            store.get_character("bob").await.unwrap().clan,
            Some("wolves".to_string())
        );
        assert!(persistence
            .document(DocumentKind::Clans)
            .unwrap()
            .contains_key("wolves"));

        assert!(matches!(
            store.create_clan("eve", "wolves").await,
            Err(WorldError::ClanExists(_))
        ));
        assert!(matches!(
            store.create_clan("bob", "bears").await,
            Err(WorldError::AlreadyInClan(_))
        ));
        assert!(store.get_clan("bears").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_clan_save_rolls_back() {
        let (persistence, store) = memory_store();
        store.create_account("bob", "pw").await.unwrap();
        persistence.fail_saves(DocumentKind::Characters, true);

        assert!(matches!(
            store.create_clan("bob", "wolves").await,
            Err(WorldError::Persistence(_))
        ));
        assert!(store.get_clan("wolves").await.is_none());
        assert_eq!(store.get_character("bob").await.unwrap().clan, None);
        assert!(!persistence
            .document(DocumentKind::Clans)
            .unwrap()
            .contains_key("wolves"));
    }
}
