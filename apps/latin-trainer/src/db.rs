//! SQLite storage for the shared deck and the per-profile Leitner state.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use vocab_core::{
    parse_date, validate_shelf, Card, CardId, CardStore, CoreError, CoreResult, GroupForest, Language, PhraseInterner,
    RawTranslation, Shelf, UsedCard,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("Not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Core(e) => e,
            DbError::NotFound(what) => CoreError::NotFound(what),
            other => CoreError::Storage(other.to_string()),
        }
    }
}

pub struct Database {
    conn: Connection,
    profile: String,
    interner: PhraseInterner,
}

impl Database {
    pub fn open(path: &Path, profile: &str) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, profile)
    }

    pub fn in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, "default")
    }

    fn with_connection(conn: Connection, profile: &str) -> DbResult<Self> {
        let db = Self {
            conn,
            profile: profile.to_string(),
            interner: PhraseInterner::new(),
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> DbResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS phrases (
                id INTEGER PRIMARY KEY,
                text TEXT NOT NULL,
                language TEXT NOT NULL,
                UNIQUE (text, language)
            );

            CREATE TABLE IF NOT EXISTS translations (
                id INTEGER PRIMARY KEY,
                phrase_1 INTEGER NOT NULL REFERENCES phrases(id),
                phrase_2 INTEGER NOT NULL REFERENCES phrases(id),
                UNIQUE (phrase_1, phrase_2)
            );

            CREATE TABLE IF NOT EXISTS card_translations (
                card_id INTEGER NOT NULL,
                translation_id INTEGER NOT NULL REFERENCES translations(id),
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (card_id, translation_id)
            );

            CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                parent INTEGER REFERENCES groups(id)
            );

            CREATE TABLE IF NOT EXISTS card_groups (
                group_id INTEGER NOT NULL REFERENCES groups(id),
                card_id INTEGER NOT NULL,
                PRIMARY KEY (group_id, card_id)
            );

            CREATE TABLE IF NOT EXISTS used_cards (
                profile TEXT NOT NULL,
                card_id INTEGER NOT NULL,
                shelf INTEGER NOT NULL DEFAULT 0,
                due_date TEXT NOT NULL,
                PRIMARY KEY (profile, card_id)
            );

            CREATE INDEX IF NOT EXISTS idx_used_due ON used_cards(profile, due_date);
            CREATE INDEX IF NOT EXISTS idx_card_groups_card ON card_groups(card_id);
            "#,
        )?;

        // Databases written before translations were ordered per card.
        let has_position: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('card_translations') WHERE name = 'position'",
            [],
            |row| row.get(0),
        )?;
        if !has_position {
            self.conn.execute_batch(
                "ALTER TABLE card_translations ADD COLUMN position INTEGER NOT NULL DEFAULT 0",
            )?;
        }
        Ok(())
    }

    // Deck operations

    /// Id of a phrase, inserting it if needed.
    pub fn insert_phrase(&self, text: &str, language: Language) -> DbResult<i64> {
        let text = text.trim();
        self.conn.execute(
            "INSERT OR IGNORE INTO phrases (text, language) VALUES (?1, ?2)",
            params![text, language.tag()],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM phrases WHERE text = ?1 AND language = ?2",
            params![text, language.tag()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Id of a translation between two phrases, inserting it if needed.
    pub fn insert_translation(&self, phrase_1: i64, phrase_2: i64) -> DbResult<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO translations (phrase_1, phrase_2) VALUES (?1, ?2)",
            params![phrase_1, phrase_2],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM translations WHERE phrase_1 = ?1 AND phrase_2 = ?2",
            params![phrase_1, phrase_2],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Id of a group, inserting it (and its parent) if needed.
    ///
    /// An existing group without a parent adopts `parent`.
    pub fn insert_group(&self, name: &str, parent: Option<&str>) -> DbResult<i64> {
        let parent_id = match parent {
            Some(p) if p != name => Some(self.insert_group(p, None)?),
            _ => None,
        };
        self.conn.execute(
            "INSERT OR IGNORE INTO groups (name, parent) VALUES (?1, ?2)",
            params![name, parent_id],
        )?;
        if let Some(parent_id) = parent_id {
            self.conn.execute(
                "UPDATE groups SET parent = ?2 WHERE name = ?1 AND parent IS NULL",
                params![name, parent_id],
            )?;
        }
        self.group_id(name)?
            .ok_or_else(|| DbError::NotFound(format!("group {}", name)))
    }

    pub fn group_id(&self, name: &str) -> DbResult<Option<i64>> {
        let id = self
            .conn
            .query_row("SELECT id FROM groups WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    /// Add a card to a group, creating the group if needed.
    pub fn add_card_to_group(&self, card_id: CardId, group: &str) -> DbResult<()> {
        let group_id = self.insert_group(group, None)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO card_groups (group_id, card_id) VALUES (?1, ?2)",
            params![group_id, card_id],
        )?;
        Ok(())
    }

    /// Store a card made of `rows` and add it to `groups`.
    ///
    /// A card with exactly the same translations is reused, so inserting the
    /// same card twice only adds missing group memberships. Returns the card
    /// id and whether a new card was created.
    pub fn insert_card(&self, rows: &[RawTranslation], groups: &[String]) -> DbResult<(CardId, bool)> {
        let mut ordered = Vec::new();
        for (text1, tag1, text2, tag2) in rows {
            let first = self.insert_phrase(text1, tag1.parse()?)?;
            let second = self.insert_phrase(text2, tag2.parse()?)?;
            let id = self.insert_translation(first, second)?;
            if !ordered.contains(&id) {
                ordered.push(id);
            }
        }
        let translation_ids: BTreeSet<i64> = ordered.iter().copied().collect();

        let (card_id, created) = match self.find_card(&translation_ids)? {
            Some(id) => (id, false),
            None => {
                let id = self.next_card_id()?;
                for (position, translation_id) in ordered.iter().enumerate() {
                    self.conn.execute(
                        "INSERT OR IGNORE INTO card_translations (card_id, translation_id, position)
                         VALUES (?1, ?2, ?3)",
                        params![id, translation_id, position as i64],
                    )?;
                }
                (id, true)
            }
        };

        for group in groups {
            self.add_card_to_group(card_id, group)?;
        }
        debug!(card_id, created, "stored card");
        Ok((card_id, created))
    }

    fn find_card(&self, translation_ids: &BTreeSet<i64>) -> DbResult<Option<CardId>> {
        let Some(first) = translation_ids.iter().next() else {
            return Ok(None);
        };
        let mut stmt = self
            .conn
            .prepare("SELECT card_id FROM card_translations WHERE translation_id = ?1")?;
        let candidates = stmt
            .query_map(params![first], |row| row.get::<_, CardId>(0))?
            .collect::<SqlResult<Vec<_>>>()?;

        for candidate in candidates {
            if self.card_translation_ids(candidate)? == *translation_ids {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn card_translation_ids(&self, card_id: CardId) -> DbResult<BTreeSet<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT translation_id FROM card_translations WHERE card_id = ?1")?;
        let ids = stmt
            .query_map(params![card_id], |row| row.get(0))?
            .collect::<SqlResult<BTreeSet<_>>>()?;
        Ok(ids)
    }

    fn next_card_id(&self) -> DbResult<CardId> {
        let max: Option<CardId> = self
            .conn
            .query_row("SELECT MAX(card_id) FROM card_translations", [], |row| row.get(0))?;
        Ok(max.map_or(1, |m| m + 1))
    }

    /// Stored translation rows of a card, in the order they were given.
    pub fn card_rows(&self, card_id: CardId) -> DbResult<Vec<RawTranslation>> {
        let mut stmt = self.conn.prepare(
            "SELECT p1.text, p1.language, p2.text, p2.language
             FROM card_translations ct
             JOIN translations t ON t.id = ct.translation_id
             JOIN phrases p1 ON p1.id = t.phrase_1
             JOIN phrases p2 ON p2.id = t.phrase_2
             WHERE ct.card_id = ?1
             ORDER BY ct.position, t.id",
        )?;
        let rows = stmt
            .query_map(params![card_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn card_groups(&self, card_id: CardId) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT g.name FROM card_groups cg
             JOIN groups g ON g.id = cg.group_id
             WHERE cg.card_id = ?1
             ORDER BY g.name",
        )?;
        let names = stmt
            .query_map(params![card_id], |row| row.get(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(names)
    }

    /// Content of a card, used or not; `None` if no such card exists.
    pub fn get_card(&mut self, card_id: CardId) -> DbResult<Option<Card>> {
        let rows = self.card_rows(card_id)?;
        if rows.is_empty() {
            return Ok(None);
        }
        let groups = self.card_groups(card_id)?;
        Ok(Some(self.interner.build_card(card_id, &rows, groups)?))
    }

    /// Ids of cards with a phrase containing `needle`, ignoring ASCII case.
    pub fn find_cards_with(&self, needle: &str) -> DbResult<Vec<CardId>> {
        let pattern = format!(
            "%{}%",
            needle.trim().replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT ct.card_id FROM card_translations ct
             JOIN translations t ON t.id = ct.translation_id
             JOIN phrases p ON p.id = t.phrase_1 OR p.id = t.phrase_2
             WHERE p.text LIKE ?1 ESCAPE '\\'
             ORDER BY ct.card_id",
        )?;
        let ids = stmt
            .query_map(params![pattern], |row| row.get(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(ids)
    }

    /// The group forest as stored.
    pub fn group_forest(&self) -> DbResult<GroupForest> {
        let mut stmt = self.conn.prepare(
            "SELECT g.name, p.name FROM groups g
             LEFT JOIN groups p ON p.id = g.parent
             ORDER BY g.id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(GroupForest::from_rows(rows))
    }

    fn direct_group_members(&self, group: &str) -> DbResult<Vec<CardId>> {
        let mut stmt = self.conn.prepare(
            "SELECT cg.card_id FROM card_groups cg
             JOIN groups g ON g.id = cg.group_id
             WHERE g.name = ?1",
        )?;
        let ids = stmt
            .query_map(params![group], |row| row.get(0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(ids)
    }

    // Leitner state of the active profile

    /// Shelf and due date of a used card.
    ///
    /// Corrupt rows surface as card-local errors.
    pub fn used_state(&self, card_id: CardId) -> DbResult<Option<(Shelf, NaiveDate)>> {
        let row = self
            .conn
            .query_row(
                "SELECT shelf, due_date FROM used_cards WHERE profile = ?1 AND card_id = ?2",
                params![self.profile, card_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((shelf, due)) => Ok(Some((validate_shelf(shelf)?, parse_date(&due)?))),
            None => Ok(None),
        }
    }

    fn used_ids_where(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> DbResult<Vec<(CardId, i64)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }
}

impl CardStore for Database {
    fn due_card_shelves(&self, as_of: NaiveDate) -> CoreResult<BTreeMap<CardId, Shelf>> {
        let as_of = as_of.format(DATE_FORMAT).to_string();
        let rows = self.used_ids_where(
            "SELECT card_id, shelf FROM used_cards WHERE profile = ?1 AND due_date <= ?2",
            params![self.profile, as_of],
        )?;

        let mut due = BTreeMap::new();
        for (id, shelf) in rows {
            match validate_shelf(shelf) {
                Ok(shelf) => {
                    due.insert(id, shelf);
                }
                Err(e) => warn!(card_id = id, error = %e, "ignoring used card"),
            }
        }
        Ok(due)
    }

    fn load_card(&mut self, id: CardId) -> CoreResult<Option<UsedCard>> {
        let Some((shelf, due_date)) = self.used_state(id)? else {
            return Ok(None);
        };
        let card = self
            .get_card(id)?
            .ok_or_else(|| CoreError::malformed(id, "used card has no translations"))?;
        Ok(Some(UsedCard::new(card, shelf, due_date)))
    }

    fn update_card(&mut self, id: CardId, shelf: Shelf, due_date: NaiveDate) -> CoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE used_cards SET shelf = ?3, due_date = ?4 WHERE profile = ?1 AND card_id = ?2",
                params![self.profile, id, shelf, due_date.format(DATE_FORMAT).to_string()],
            )
            .map_err(DbError::from)?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!("card {} is not used", id)));
        }
        Ok(())
    }

    fn group_card_ids(&self, group: &str, include_descendants: bool) -> CoreResult<Option<Vec<CardId>>> {
        let forest = self.group_forest()?;
        let names = if include_descendants {
            match forest.descendant_names(group) {
                Some(names) => names,
                None => return Ok(None),
            }
        } else if forest.contains(group) {
            vec![group]
        } else {
            return Ok(None);
        };

        let mut ids = BTreeSet::new();
        for name in names {
            ids.extend(self.direct_group_members(name)?);
        }
        Ok(Some(ids.into_iter().collect()))
    }

    fn shelf_card_ids(&self, shelf: Shelf) -> CoreResult<Vec<CardId>> {
        let rows = self.used_ids_where(
            "SELECT card_id, shelf FROM used_cards WHERE profile = ?1 AND shelf = ?2 ORDER BY card_id",
            params![self.profile, shelf],
        )?;
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }

    fn card_is_used(&self, id: CardId) -> CoreResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM used_cards WHERE profile = ?1 AND card_id = ?2",
                params![self.profile, id],
                |_| Ok(()),
            )
            .optional()
            .map_err(DbError::from)?;
        Ok(found.is_some())
    }

    fn add_used_card(&mut self, id: CardId, shelf: Shelf, due_date: NaiveDate) -> CoreResult<()> {
        if self.card_rows(id)?.is_empty() {
            return Err(CoreError::NotFound(format!("card {}", id)));
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO used_cards (profile, card_id, shelf, due_date) VALUES (?1, ?2, ?3, ?4)",
                params![self.profile, id, shelf, due_date.format(DATE_FORMAT).to_string()],
            )
            .map_err(DbError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(latin: &str, german: &str) -> RawTranslation {
        (latin.into(), "latin".into(), german.into(), "german".into())
    }

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_inserts_are_idempotent() {
        let db = Database::in_memory().unwrap();
        let a = db.insert_phrase("rex, regis", Language::Latin).unwrap();
        let b = db.insert_phrase("rex, regis", Language::Latin).unwrap();
        assert_eq!(a, b);

        let g1 = db.insert_group("lektion-1", Some("latein")).unwrap();
        let g2 = db.insert_group("lektion-1", None).unwrap();
        assert_eq!(g1, g2);

        let (card, created) = db.insert_card(&[row("rex, regis", "König")], &["lektion-1".into()]).unwrap();
        assert!(created);
        let (again, created) = db.insert_card(&[row("rex, regis", "König")], &["latein".into()]).unwrap();
        assert!(!created);
        assert_eq!(card, again);
        assert_eq!(db.card_groups(card).unwrap(), vec!["latein", "lektion-1"]);
    }

    #[test]
    fn test_card_round_trip() {
        let mut db = Database::in_memory().unwrap();
        let (id, _) = db
            .insert_card(&[row("magnus, a, um", "groß"), row("magnus, a, um", "bedeutend")], &[])
            .unwrap();

        let card = db.get_card(id).unwrap().unwrap();
        assert_eq!(card.translations.len(), 2);
        assert_eq!(card.translations[0].second.text(), "groß");
        assert!(db.get_card(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_rows_keep_given_order() {
        let mut db = Database::in_memory().unwrap();
        db.insert_card(&[row("magnus, a, um", "groß")], &[]).unwrap();
        let (id, _) = db
            .insert_card(&[row("ingens, ingentis", "riesig"), row("magnus, a, um", "groß")], &[])
            .unwrap();

        let rows = db.card_rows(id).unwrap();
        assert_eq!(rows[0].0, "ingens, ingentis");
        assert_eq!(rows[1].0, "magnus, a, um");
        let card = db.get_card(id).unwrap().unwrap();
        assert_eq!(card.translations[0].second.text(), "riesig");
    }

    #[test]
    fn test_find_cards_with() {
        let db = Database::in_memory().unwrap();
        let (rex, _) = db.insert_card(&[row("rex, regis", "König")], &[]).unwrap();
        let (via, _) = db.insert_card(&[row("via, viae", "Weg")], &[]).unwrap();
        let (lex, _) = db.insert_card(&[row("lex, legis", "Gesetz_50%")], &[]).unwrap();

        assert_eq!(db.find_cards_with("REX").unwrap(), vec![rex]);
        assert_eq!(db.find_cards_with("weg").unwrap(), vec![via]);
        assert_eq!(db.find_cards_with("e").unwrap(), vec![rex, via, lex]);
        assert_eq!(db.find_cards_with("_50%").unwrap(), vec![lex]);
        assert_eq!(db.find_cards_with("%").unwrap(), vec![lex]);
        assert!(db.find_cards_with("Pferd").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        let db = Database::in_memory().unwrap();
        let rows = vec![("rex".to_string(), "latin".to_string(), "king".to_string(), "english".to_string())];
        let err = db.insert_card(&rows, &[]).unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::UnknownLanguage(_))));
    }

    #[test]
    fn test_used_cards_per_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin.db");
        let mut db = Database::open(&path, "default").unwrap();
        let (id, _) = db.insert_card(&[row("via, viae", "Weg")], &[]).unwrap();
        let today = date("2024-03-01");

        db.add_used_card(id, 1, today).unwrap();
        assert!(db.card_is_used(id).unwrap());
        let card = db.load_card(id).unwrap().unwrap();
        assert_eq!((card.shelf, card.due_date), (1, today));

        let mut other = Database::open(&path, "anna").unwrap();
        assert!(other.get_card(id).unwrap().is_some());
        assert!(!other.card_is_used(id).unwrap());
        assert!(other.load_card(id).unwrap().is_none());
        assert!(other.update_card(id, 2, today).is_err());
    }

    #[test]
    fn test_due_and_update() {
        let mut db = Database::in_memory().unwrap();
        let (a, _) = db.insert_card(&[row("rex, regis", "König")], &[]).unwrap();
        let (b, _) = db.insert_card(&[row("via, viae", "Weg")], &[]).unwrap();
        db.add_used_card(a, 0, date("2024-03-01")).unwrap();
        db.add_used_card(b, 4, date("2024-03-10")).unwrap();

        let due = db.due_card_shelves(date("2024-03-05")).unwrap();
        assert_eq!(due.into_iter().collect::<Vec<_>>(), vec![(a, 0)]);

        db.update_card(a, 1, date("2024-03-06")).unwrap();
        assert_eq!(db.used_state(a).unwrap(), Some((1, date("2024-03-06"))));
        assert!(db.due_card_shelves(date("2024-03-05")).unwrap().is_empty());
        assert_eq!(db.shelf_card_ids(4).unwrap(), vec![b]);
    }

    #[test]
    fn test_corrupt_shelf_is_card_local() {
        let mut db = Database::in_memory().unwrap();
        let (id, _) = db.insert_card(&[row("rex, regis", "König")], &[]).unwrap();
        db.add_used_card(id, 1, date("2024-03-01")).unwrap();
        db.conn
            .execute("UPDATE used_cards SET shelf = 12 WHERE card_id = ?1", params![id])
            .unwrap();

        let err = db.load_card(id).unwrap_err();
        assert!(err.is_card_local());
        assert!(db.due_card_shelves(date("2024-03-01")).unwrap().is_empty());
    }

    #[test]
    fn test_group_queries() {
        let db = Database::in_memory().unwrap();
        db.insert_group("lektion-1", Some("latein")).unwrap();
        db.insert_group("verben", Some("lektion-1")).unwrap();
        let (a, _) = db.insert_card(&[row("rex, regis", "König")], &["lektion-1".into()]).unwrap();
        let (b, _) = db
            .insert_card(&[row("amare, amo, amavi, amatum", "lieben")], &["verben".into()])
            .unwrap();

        assert_eq!(db.group_card_ids("latein", true).unwrap(), Some(vec![a, b]));
        assert_eq!(db.group_card_ids("lektion-1", false).unwrap(), Some(vec![a]));
        assert_eq!(db.group_card_ids("nope", true).unwrap(), None);

        let forest = db.group_forest().unwrap();
        let verben = forest.id("verben").unwrap();
        assert_eq!(forest.path(verben), vec!["latein", "lektion-1", "verben"]);
    }
}
