use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::{
    Bucket, BucketMut, Db, Entry, EntryIter, Order, RangeOptions, empty_bucket_name,
    not_found_bucket,
};
use crate::errors::Result;

/// Bucket id of the transaction root. Never stored in `buckets`.
const ROOT: i64 = 0;

/// Durable store backed by a single SQLite database.
///
/// Buckets form a tree in the `buckets` table; entries live in `kv` keyed by
/// `(bucket, key)`. BLOB comparison in SQLite is bytewise, so `ORDER BY key`
/// matches the in-memory ordering.
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Open (or create) a database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    /// Open a private in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS buckets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent INTEGER NOT NULL,
                name BLOB NOT NULL,
                UNIQUE(parent, name)
            );

            CREATE TABLE IF NOT EXISTS kv (
                bucket INTEGER NOT NULL,
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (bucket, key)
            ) WITHOUT ROWID;
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Db for SqliteDb {
    fn view(&self, f: &mut dyn FnMut(&dyn Bucket) -> Result<()>) -> Result<()> {
        let mut conn = self.conn.lock()?;
        // Deferred transaction: a consistent snapshot, discarded on drop.
        let tx = conn.transaction()?;
        f(&SqliteBucket {
            conn: &tx,
            id: ROOT,
        })
    }

    fn update(&self, f: &mut dyn FnMut(&mut dyn BucketMut) -> Result<()>) -> Result<()> {
        let mut conn = self.conn.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = f(&mut SqliteBucket {
            conn: &tx,
            id: ROOT,
        });
        match outcome {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }
}

struct SqliteBucket<'a> {
    conn: &'a Connection,
    id: i64,
}

impl SqliteBucket<'_> {
    fn child_id(&self, name: &[u8]) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM buckets WHERE parent = ?1 AND name = ?2",
                params![self.id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn edge(&self, descending: bool) -> Result<Option<Entry>> {
        let sql = if descending {
            "SELECT key, value FROM kv WHERE bucket = ?1 ORDER BY key DESC LIMIT 1"
        } else {
            "SELECT key, value FROM kv WHERE bucket = ?1 ORDER BY key ASC LIMIT 1"
        };
        let entry = self
            .conn
            .query_row(sql, params![self.id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        Ok(entry)
    }
}

impl Bucket for SqliteBucket<'_> {
    fn bucket(&self, name: &[u8]) -> Result<Box<dyn Bucket + '_>> {
        let id = self.child_id(name)?.ok_or_else(|| not_found_bucket(name))?;
        Ok(Box::new(SqliteBucket {
            conn: self.conn,
            id,
        }))
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE bucket = ?1 AND key = ?2",
                params![self.id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn first(&self) -> Result<Option<Entry>> {
        self.edge(false)
    }

    fn last(&self) -> Result<Option<Entry>> {
        self.edge(true)
    }

    fn range(&self, options: RangeOptions) -> Result<EntryIter<'_>> {
        let cursor = match options.start {
            Some(start) => Cursor::From(start),
            None => Cursor::Unstarted,
        };
        Ok(Box::new(SqliteRange {
            conn: self.conn,
            bucket: self.id,
            order: options.order,
            cursor,
        }))
    }
}

impl BucketMut for SqliteBucket<'_> {
    fn bucket_mut(&mut self, name: &[u8]) -> Result<Box<dyn BucketMut + '_>> {
        let id = self.child_id(name)?.ok_or_else(|| not_found_bucket(name))?;
        Ok(Box::new(SqliteBucket {
            conn: self.conn,
            id,
        }))
    }

    fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> Result<Box<dyn BucketMut + '_>> {
        if name.is_empty() {
            return Err(empty_bucket_name());
        }
        let id = match self.child_id(name)? {
            Some(id) => id,
            None => {
                self.conn.execute(
                    "INSERT INTO buckets (parent, name) VALUES (?1, ?2)",
                    params![self.id, name],
                )?;
                self.conn.last_insert_rowid()
            }
        };
        Ok(Box::new(SqliteBucket {
            conn: self.conn,
            id,
        }))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (bucket, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
            params![self.id, key, value],
        )?;
        Ok(())
    }
}

enum Cursor {
    Unstarted,
    /// Next key is the first at or beyond this one.
    From(Vec<u8>),
    /// Next key is the first strictly beyond this one.
    After(Vec<u8>),
    Done,
}

/// Lazy range: one indexed lookup per step, resuming after the last key.
struct SqliteRange<'a> {
    conn: &'a Connection,
    bucket: i64,
    order: Order,
    cursor: Cursor,
}

impl SqliteRange<'_> {
    fn step(&mut self) -> Result<Option<Entry>> {
        let (inclusive, exclusive, dir) = match self.order {
            Order::Ascending => (">=", ">", "ASC"),
            Order::Descending => ("<=", "<", "DESC"),
        };
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Entry> {
            Ok((row.get(0)?, row.get(1)?))
        };
        let entry: Option<Entry> = match &self.cursor {
            Cursor::Done => return Ok(None),
            Cursor::Unstarted => self
                .conn
                .query_row(
                    &format!(
                        "SELECT key, value FROM kv WHERE bucket = ?1 ORDER BY key {dir} LIMIT 1"
                    ),
                    params![self.bucket],
                    map,
                )
                .optional()?,
            Cursor::From(key) | Cursor::After(key) => {
                let op = if matches!(self.cursor, Cursor::From(_)) {
                    inclusive
                } else {
                    exclusive
                };
                self.conn
                    .query_row(
                        &format!(
                            "SELECT key, value FROM kv WHERE bucket = ?1 AND key {op} ?2 \
                             ORDER BY key {dir} LIMIT 1"
                        ),
                        params![self.bucket, key],
                        map,
                    )
                    .optional()?
            }
        };
        self.cursor = match &entry {
            Some((key, _)) => Cursor::After(key.clone()),
            None => Cursor::Done,
        };
        Ok(entry)
    }
}

impl Iterator for SqliteRange<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.cursor = Cursor::Done;
                Some(Err(e))
            }
        }
    }
}
