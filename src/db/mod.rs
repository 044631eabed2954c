use crate::errors::{AppError, AppResult};
use crate::models::{Entry, EntryId, EntryUpdate, Placement, Topic, TopicId, TopicRef};
use crate::services::PersistenceService;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Local entry/topic store. Pseudo-topics are never written; an entry with a
/// NULL `topic_id` is uncategorized.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(AppError::from)?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>) -> AppResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn insert_topic(&self, name: &str) -> AppResult<Topic> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Topic name cannot be empty".to_string()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO topics (topic_name, creation_date) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;
        Ok(Topic {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            entry_count: Some(0),
        })
    }

    pub fn list_topics(&self) -> AppResult<Vec<Topic>> {
        let conn = self.lock()?;
        let mut statement = conn.prepare(
            "SELECT t.topic_id, t.topic_name, COUNT(e.entry_id)
             FROM topics t
             LEFT JOIN entries e ON e.topic_id = t.topic_id
             GROUP BY t.topic_id, t.topic_name
             ORDER BY t.topic_id ASC",
        )?;
        let topics = statement
            .query_map([], |row| {
                Ok(Topic {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    entry_count: Some(row.get::<_, i64>(2)?.max(0) as u64),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(topics)
    }

    pub fn rename_topic(&self, topic_id: TopicId, name: &str) -> AppResult<Topic> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Topic name cannot be empty".to_string()));
        }
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE topics SET topic_name = ?1 WHERE topic_id = ?2",
            params![name, topic_id],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("topic {}", topic_id)));
        }
        let entry_count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM entries WHERE topic_id = ?1",
            [topic_id],
            |row| row.get(0),
        )?;
        Ok(Topic {
            id: topic_id,
            name: name.to_string(),
            entry_count: Some(entry_count.max(0) as u64),
        })
    }

    /// Deletes a topic; its entries become uncategorized.
    pub fn remove_topic(&self, topic_id: TopicId) -> AppResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE entries SET topic_id = NULL WHERE topic_id = ?1",
            [topic_id],
        )?;
        let removed = tx.execute("DELETE FROM topics WHERE topic_id = ?1", [topic_id])?;
        if removed == 0 {
            return Err(AppError::NotFound(format!("topic {}", topic_id)));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_entry(&self, content: &str, topic_id: Option<TopicId>) -> AppResult<Entry> {
        let conn = self.lock()?;
        if let Some(topic_id) = topic_id {
            ensure_topic_exists(&conn, topic_id)?;
        }
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO entries (content, topic_id, creation_date) VALUES (?1, ?2, ?3)",
            params![content, topic_id, created_at.to_rfc3339()],
        )?;
        Ok(Entry {
            id: conn.last_insert_rowid(),
            content: content.to_string(),
            topic_id,
            created_at,
        })
    }

    pub fn get_entry(&self, entry_id: EntryId) -> AppResult<Option<Entry>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT entry_id, content, topic_id, creation_date FROM entries WHERE entry_id = ?1",
            [entry_id],
            parse_entry_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_entries(&self, view: &TopicRef) -> AppResult<Vec<Entry>> {
        let conn = self.lock()?;
        let base = "SELECT entry_id, content, topic_id, creation_date FROM entries";
        let entries = match view {
            TopicRef::Real(topic) => {
                let mut statement =
                    conn.prepare(&format!("{} WHERE topic_id = ?1 ORDER BY entry_id ASC", base))?;
                let rows = statement.query_map([topic.id], parse_entry_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            TopicRef::Uncategorized => {
                let mut statement =
                    conn.prepare(&format!("{} WHERE topic_id IS NULL ORDER BY entry_id ASC", base))?;
                let rows = statement.query_map([], parse_entry_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            TopicRef::AllTopics => {
                let mut statement = conn.prepare(&format!("{} ORDER BY entry_id ASC", base))?;
                let rows = statement.query_map([], parse_entry_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(entries)
    }

    pub fn patch_entry(&self, entry_id: EntryId, update: EntryUpdate) -> AppResult<Entry> {
        let conn = self.lock()?;
        let mut entry = conn
            .query_row(
                "SELECT entry_id, content, topic_id, creation_date FROM entries WHERE entry_id = ?1",
                [entry_id],
                parse_entry_row,
            )
            .optional()?
            .ok_or_else(|| AppError::NotFound(format!("entry {}", entry_id)))?;

        if let Some(Placement::Topic(topic_id)) = update.placement {
            ensure_topic_exists(&conn, topic_id)?;
        }
        if let Some(content) = update.content {
            entry.content = content;
        }
        if let Some(placement) = update.placement {
            entry.topic_id = placement.topic_id();
        }

        conn.execute(
            "UPDATE entries SET content = ?1, topic_id = ?2 WHERE entry_id = ?3",
            params![entry.content, entry.topic_id, entry_id],
        )?;
        Ok(entry)
    }

    pub fn remove_entry(&self, entry_id: EntryId) -> AppResult<()> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM entries WHERE entry_id = ?1", [entry_id])?;
        if removed == 0 {
            return Err(AppError::NotFound(format!("entry {}", entry_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceService for Database {
    async fn create_topic(&self, name: &str) -> AppResult<Topic> {
        self.insert_topic(name)
    }

    async fn get_topics(&self) -> AppResult<Vec<TopicRef>> {
        let mut topics = self
            .list_topics()?
            .into_iter()
            .map(TopicRef::Real)
            .collect::<Vec<_>>();
        topics.push(TopicRef::Uncategorized);
        Ok(topics)
    }

    async fn update_topic(&self, topic_id: TopicId, name: &str) -> AppResult<Topic> {
        self.rename_topic(topic_id, name)
    }

    async fn delete_topic(&self, topic_id: TopicId) -> AppResult<()> {
        self.remove_topic(topic_id)
    }

    async fn get_entries(&self, view: &TopicRef) -> AppResult<Vec<Entry>> {
        self.list_entries(view)
    }

    async fn update_entry(&self, entry_id: EntryId, update: EntryUpdate) -> AppResult<Entry> {
        self.patch_entry(entry_id, update)
    }

    async fn delete_entry(&self, entry_id: EntryId) -> AppResult<()> {
        self.remove_entry(entry_id)
    }
}

fn ensure_topic_exists(conn: &Connection, topic_id: TopicId) -> AppResult<()> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM topics WHERE topic_id = ?1",
            [topic_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !exists {
        return Err(AppError::StaleReference(format!(
            "topic {} no longer exists",
            topic_id
        )));
    }
    Ok(())
}

fn parse_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        content: row.get(1)?,
        topic_id: row.get(2)?,
        created_at: parse_time(&row.get::<_, String>(3)?)?,
    })
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::errors::AppError;
    use crate::models::{EntryUpdate, Placement, TopicRef};
    use crate::services::PersistenceService;

    #[test]
    fn database_counts_entries_per_topic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("nested/notes.db")).expect("db");
        let work = db.insert_topic("Work").expect("topic");
        let home = db.insert_topic("Home").expect("topic");
        db.insert_entry("standup notes", Some(work.id)).expect("entry");
        db.insert_entry("retro", Some(work.id)).expect("entry");
        db.insert_entry("loose thought", None).expect("entry");

        let topics = db.list_topics().expect("topics");
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].name, "Work");
        assert_eq!(topics[0].entry_count, Some(2));
        assert_eq!(topics[1].id, home.id);
        assert_eq!(topics[1].entry_count, Some(0));
        assert!(db.path().is_some());
    }

    #[test]
    fn blank_topic_name_is_rejected() {
        let db = Database::in_memory().expect("db");
        let error = db.insert_topic("   ").expect_err("must reject");
        assert!(matches!(error, AppError::Validation(_)));
    }

    #[test]
    fn moving_into_missing_topic_is_stale() {
        let db = Database::in_memory().expect("db");
        let entry = db.insert_entry("orphan", None).expect("entry");
        let error = db
            .patch_entry(entry.id, EntryUpdate::move_to(Placement::Topic(99)))
            .expect_err("must fail");
        assert!(matches!(error, AppError::StaleReference(_)));

        let missing = db
            .patch_entry(404, EntryUpdate::move_to(Placement::Uncategorized))
            .expect_err("must fail");
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[test]
    fn deleting_topic_uncategorizes_entries() {
        let db = Database::in_memory().expect("db");
        let topic = db.insert_topic("Scratch").expect("topic");
        let entry = db.insert_entry("draft", Some(topic.id)).expect("entry");

        db.remove_topic(topic.id).expect("delete");
        let reloaded = db.get_entry(entry.id).expect("get").expect("exists");
        assert_eq!(reloaded.topic_id, None);
        assert!(matches!(db.remove_topic(topic.id), Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn service_views_filter_by_topic_ref() {
        let db = Database::in_memory().expect("db");
        let topic = db.insert_topic("Recipes").expect("topic");
        db.insert_entry("pasta", Some(topic.id)).expect("entry");
        db.insert_entry("idea", None).expect("entry");

        let listed = db.get_topics().await.expect("topics");
        assert_eq!(listed.last(), Some(&TopicRef::Uncategorized));
        let real = listed[0].clone();

        assert_eq!(db.get_entries(&real).await.expect("real").len(), 1);
        let uncategorized = db.get_entries(&TopicRef::Uncategorized).await.expect("uncategorized");
        assert_eq!(uncategorized.len(), 1);
        assert_eq!(uncategorized[0].content, "idea");
        assert_eq!(db.get_entries(&TopicRef::AllTopics).await.expect("all").len(), 2);

        let renamed = db.update_topic(topic.id, "Cooking").await.expect("rename");
        assert_eq!(renamed.entry_count, Some(1));
    }
}
