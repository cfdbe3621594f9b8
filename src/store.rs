// 🗄️ Ledger backing stores
// One interface (append / snapshot / rewrite), three backends:
//   CsvFileStore  - ';'-separated UTF-8 file (historial_paseu.csv)
//   SqliteStore   - rows as JSON arrays in a single table, WAL mode
//   MemoryStore   - in-process, for tests and embedding
//
// rewrite() is the only mutation besides append. It checks the revision taken
// at snapshot time and refuses to overwrite a store that moved underneath it.
//
// The CSV file is plain `;`-joined text with no quoting, as the legacy ledger
// wrote it. A `;` inside a value is stored as `,` and line breaks as a space.

use crate::error::LedgerError;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Opaque revision marker of a store's content
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(marker: impl Into<String>) -> Self {
        Revision(marker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full content of a store at one revision, header first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub revision: Revision,
}

impl LedgerSnapshot {
    pub fn empty(revision: Revision) -> Self {
        LedgerSnapshot {
            header: Vec::new(),
            rows: Vec::new(),
            revision,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// LedgerStore - persistence seam for the ledger
///
/// Every call round-trips to the backend. No caching.
pub trait LedgerStore {
    /// Append one row; create the store with `header` first if it does not exist yet
    fn append(&self, header: &[&str], row: &[String]) -> Result<(), LedgerError>;

    /// Read everything. A missing store is an empty snapshot, not an error.
    fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError>;

    /// Replace the whole content with `snapshot.header` + `snapshot.rows`
    ///
    /// Fails with `LedgerError::Conflict` if the store is no longer at `snapshot.revision`.
    fn rewrite(&self, snapshot: &LedgerSnapshot) -> Result<(), LedgerError>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

impl<T: LedgerStore + ?Sized> LedgerStore for Box<T> {
    fn append(&self, header: &[&str], row: &[String]) -> Result<(), LedgerError> {
        (**self).append(header, row)
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        (**self).snapshot()
    }

    fn rewrite(&self, snapshot: &LedgerSnapshot) -> Result<(), LedgerError> {
        (**self).rewrite(snapshot)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

fn conflict(expected: &Revision, found: &Revision) -> LedgerError {
    LedgerError::Conflict {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

// ============================================================================
// CSV FILE STORE
// ============================================================================

const DELIMITER: u8 = b';';
const ABSENT: &str = "absent";

/// `;`-delimited file store. Revision = SHA-256 of the file bytes.
pub struct CsvFileStore {
    path: PathBuf,
}

impl CsvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvFileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_bytes(&self) -> Result<Option<Vec<u8>>, LedgerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&self.path)?))
    }

    fn revision_of(bytes: Option<&[u8]>) -> Revision {
        match bytes {
            Some(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                Revision(format!("{:x}", hasher.finalize()))
            }
            None => Revision::new(ABSENT),
        }
    }

    /// Current revision without parsing the file
    pub fn revision(&self) -> Result<Revision, LedgerError> {
        let bytes = self.read_bytes()?;
        Ok(Self::revision_of(bytes.as_deref()))
    }

    fn writer<W: Write>(w: W) -> csv::Writer<W> {
        csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .flexible(true)
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(w)
    }

    fn write_line<W, I, T>(writer: &mut csv::Writer<W>, cells: I) -> Result<(), LedgerError>
    where
        W: Write,
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        writer.write_record(cells.into_iter().map(|c| plain_cell(c.as_ref())))?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("historial");
        self.path
            .with_file_name(format!(".{}.tmp-{}", name, std::process::id()))
    }
}

/// Cell as written to the unquoted file; values read back from it pass through unchanged
fn plain_cell(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ';' => ',',
            '\r' | '\n' => ' ',
            other => other,
        })
        .collect()
}

impl LedgerStore for CsvFileStore {
    fn append(&self, header: &[&str], row: &[String]) -> Result<(), LedgerError> {
        let is_new = match fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        if is_new {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = Self::writer(file);

        if is_new {
            Self::write_line(&mut writer, header)?;
        }
        Self::write_line(&mut writer, row)?;
        writer.flush()?;

        Ok(())
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let bytes = match self.read_bytes()? {
            Some(bytes) => bytes,
            None => return Ok(LedgerSnapshot::empty(Revision::new(ABSENT))),
        };
        let revision = Self::revision_of(Some(&bytes));

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(bytes.as_slice());

        let mut lines = Vec::new();
        for result in reader.records() {
            let record = result?;
            let row: Vec<String> = record.iter().map(|f| f.to_string()).collect();
            // whitespace-only lines carry no data
            if row.iter().all(|f| f.trim().is_empty()) {
                continue;
            }
            lines.push(row);
        }

        let mut lines = lines.into_iter();
        let header = match lines.next() {
            Some(header) => header,
            None => return Ok(LedgerSnapshot::empty(revision)),
        };

        Ok(LedgerSnapshot {
            header,
            rows: lines.collect(),
            revision,
        })
    }

    fn rewrite(&self, snapshot: &LedgerSnapshot) -> Result<(), LedgerError> {
        let current = self.revision()?;
        if current != snapshot.revision {
            return Err(conflict(&snapshot.revision, &current));
        }

        let tmp = self.temp_path();
        {
            let file = File::create(&tmp)?;
            let mut writer = Self::writer(file);
            Self::write_line(&mut writer, &snapshot.header)?;
            for row in &snapshot.rows {
                Self::write_line(&mut writer, row)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(path = %self.path.display(), rows = snapshot.rows.len(), "rewrote ledger file");
        Ok(())
    }

    fn name(&self) -> &str {
        "csv"
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// SQLite store. Revision = counter bumped on every write.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        setup_ledger_tables(&conn)?;
        Ok(SqliteStore { conn })
    }

    fn revision_in(conn: &Connection) -> Result<Option<i64>, LedgerError> {
        let revision = conn
            .query_row("SELECT revision FROM historial_meta WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(revision)
    }
}

pub fn setup_ledger_tables(conn: &Connection) -> Result<(), LedgerError> {
    // WAL for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS historial (
            position INTEGER PRIMARY KEY AUTOINCREMENT,
            row_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS historial_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            header_json TEXT NOT NULL,
            revision INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

impl LedgerStore for SqliteStore {
    fn append(&self, header: &[&str], row: &[String]) -> Result<(), LedgerError> {
        let tx = self.conn.unchecked_transaction()?;

        if Self::revision_in(&tx)?.is_none() {
            tx.execute(
                "INSERT INTO historial_meta (id, header_json, revision) VALUES (1, ?1, 0)",
                params![serde_json::to_string(header)?],
            )?;
        }

        tx.execute(
            "INSERT INTO historial (row_json) VALUES (?1)",
            params![serde_json::to_string(row)?],
        )?;
        tx.execute(
            "UPDATE historial_meta SET revision = revision + 1 WHERE id = 1",
            [],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let meta: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT header_json, revision FROM historial_meta WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (header_json, revision) = match meta {
            Some(meta) => meta,
            None => return Ok(LedgerSnapshot::empty(Revision::new("0"))),
        };

        let mut stmt = self
            .conn
            .prepare("SELECT row_json FROM historial ORDER BY position")?;
        let encoded = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let rows = encoded
            .iter()
            .map(|json| serde_json::from_str::<Vec<String>>(json))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LedgerSnapshot {
            header: serde_json::from_str(&header_json)?,
            rows,
            revision: Revision(revision.to_string()),
        })
    }

    fn rewrite(&self, snapshot: &LedgerSnapshot) -> Result<(), LedgerError> {
        let tx = self.conn.unchecked_transaction()?;

        let current = Revision(Self::revision_in(&tx)?.unwrap_or(0).to_string());
        if current != snapshot.revision {
            return Err(conflict(&snapshot.revision, &current));
        }

        tx.execute("DELETE FROM historial", [])?;
        for row in &snapshot.rows {
            tx.execute(
                "INSERT INTO historial (row_json) VALUES (?1)",
                params![serde_json::to_string(row)?],
            )?;
        }
        tx.execute(
            "INSERT INTO historial_meta (id, header_json, revision) VALUES (1, ?1, 1)
             ON CONFLICT(id) DO UPDATE SET header_json = excluded.header_json,
                                           revision = revision + 1",
            params![serde_json::to_string(&snapshot.header)?],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

#[derive(Default)]
struct MemoryState {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    revision: u64,
}

/// In-process store. Revision = write counter.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl LedgerStore for MemoryStore {
    fn append(&self, header: &[&str], row: &[String]) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.header.is_empty() {
            state.header = header.iter().map(|h| h.to_string()).collect();
        }
        state.rows.push(row.to_vec());
        state.revision += 1;
        Ok(())
    }

    fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(LedgerSnapshot {
            header: state.header.clone(),
            rows: state.rows.clone(),
            revision: Revision(state.revision.to_string()),
        })
    }

    fn rewrite(&self, snapshot: &LedgerSnapshot) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = Revision(state.revision.to_string());
        if current != snapshot.revision {
            return Err(conflict(&snapshot.revision, &current));
        }
        state.header = snapshot.header.clone();
        state.rows = snapshot.rows.clone();
        state.revision += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
