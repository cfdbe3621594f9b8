// 📒 Ledger - audit trail of generated documents
//
// One row per generated document, created PENDIENTE and flipped at most once
// to REEMPLAZO RECIBIDO when the physical replacement arrives. Rows are never
// deleted. Identity for updates is (CEDULA_ESTUDIANTE, CHEQUE).
//
// Every query is a full scan; every update is scan + rewrite of the whole store.

use crate::error::LedgerError;
use crate::guardian::Guardian;
use crate::parser::ChequeRecord;
use crate::store::{LedgerSnapshot, LedgerStore, Revision};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Fixed column layout of the persisted ledger
pub const LEDGER_HEADER: [&str; 12] = [
    "FECHA",
    "NOMBRE_ESTUDIANTE",
    "CEDULA_ESTUDIANTE",
    "TELEFONO",
    "ESTADO",
    "NOMBRE_ACUDIENTE",
    "CEDULA_ACUDIENTE",
    "PLANILLA",
    "CHEQUE",
    "NIVEL",
    "COLEGIO",
    "PERIODO",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// ENTRY TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerStatus {
    #[serde(rename = "PENDIENTE")]
    Pending,
    #[serde(rename = "REEMPLAZO RECIBIDO")]
    ReplacementReceived,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Pending => "PENDIENTE",
            LedgerStatus::ReplacementReceived => "REEMPLAZO RECIBIDO",
        }
    }

    /// Anything other than REEMPLAZO RECIBIDO still counts as pending
    pub fn from_cell(cell: &str) -> Self {
        if cell == LedgerStatus::ReplacementReceived.as_str() {
            LedgerStatus::ReplacementReceived
        } else {
            LedgerStatus::Pending
        }
    }
}

/// LedgerEntry - one generated document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "FECHA")]
    pub timestamp: String,

    #[serde(rename = "NOMBRE_ESTUDIANTE")]
    pub subject_name: String,

    #[serde(rename = "CEDULA_ESTUDIANTE")]
    pub subject_id: String,

    #[serde(rename = "TELEFONO")]
    pub contact_value: String,

    #[serde(rename = "ESTADO")]
    pub status: LedgerStatus,

    #[serde(rename = "NOMBRE_ACUDIENTE")]
    pub guardian_name: String,

    #[serde(rename = "CEDULA_ACUDIENTE")]
    pub guardian_id: String,

    #[serde(rename = "PLANILLA")]
    pub form_number: String,

    #[serde(rename = "CHEQUE")]
    pub check_number: String,

    #[serde(rename = "NIVEL")]
    pub level: String,

    #[serde(rename = "COLEGIO")]
    pub school: String,

    #[serde(rename = "PERIODO")]
    pub period: String,
}

impl LedgerEntry {
    /// Entry for a freshly generated document, stamped now, status PENDIENTE
    pub fn for_record(record: &ChequeRecord, guardian: &Guardian, contact: &str) -> Self {
        LedgerEntry {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            subject_name: record.subject_name.clone(),
            subject_id: record.subject_id.clone(),
            contact_value: contact.to_string(),
            status: LedgerStatus::Pending,
            guardian_name: guardian.name.clone(),
            guardian_id: guardian.id.clone(),
            form_number: record.form_number.clone(),
            check_number: record.check_number.clone(),
            level: record.grade.clone(),
            school: record.center.clone(),
            period: record.period.clone(),
        }
    }

    /// Cells in LEDGER_HEADER order
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.timestamp.clone(),
            self.subject_name.clone(),
            self.subject_id.clone(),
            self.contact_value.clone(),
            self.status.as_str().to_string(),
            self.guardian_name.clone(),
            self.guardian_id.clone(),
            self.form_number.clone(),
            self.check_number.clone(),
            self.level.clone(),
            self.school.clone(),
            self.period.clone(),
        ]
    }
}

/// Column positions resolved from a stored header, by name
#[derive(Debug, Clone, Copy)]
struct Columns {
    width: usize,
    timestamp: usize,
    subject_name: usize,
    subject_id: usize,
    contact: usize,
    status: usize,
    guardian_name: usize,
    guardian_id: usize,
    form_number: usize,
    check_number: usize,
    level: usize,
    school: usize,
    period: usize,
}

impl Columns {
    fn resolve(header: &[String]) -> Option<Self> {
        let idx = |name: &str| header.iter().position(|h| h.trim() == name);

        Some(Columns {
            width: header.len(),
            timestamp: idx("FECHA")?,
            subject_name: idx("NOMBRE_ESTUDIANTE")?,
            subject_id: idx("CEDULA_ESTUDIANTE")?,
            contact: idx("TELEFONO")?,
            status: idx("ESTADO")?,
            guardian_name: idx("NOMBRE_ACUDIENTE")?,
            guardian_id: idx("CEDULA_ACUDIENTE")?,
            form_number: idx("PLANILLA")?,
            check_number: idx("CHEQUE")?,
            level: idx("NIVEL")?,
            school: idx("COLEGIO")?,
            period: idx("PERIODO")?,
        })
    }

    /// Rows shorter than the header are partially written; ignore them
    fn is_complete(&self, row: &[String]) -> bool {
        row.len() >= self.width
    }

    fn entry(&self, row: &[String]) -> LedgerEntry {
        LedgerEntry {
            timestamp: row[self.timestamp].clone(),
            subject_name: row[self.subject_name].clone(),
            subject_id: row[self.subject_id].clone(),
            contact_value: row[self.contact].clone(),
            status: LedgerStatus::from_cell(&row[self.status]),
            guardian_name: row[self.guardian_name].clone(),
            guardian_id: row[self.guardian_id].clone(),
            form_number: row[self.form_number].clone(),
            check_number: row[self.check_number].clone(),
            level: row[self.level].clone(),
            school: row[self.school].clone(),
            period: row[self.period].clone(),
        }
    }
}

/// Result of the replacement workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplacementUpdate {
    /// TELEFONO of the first updated row, in scan order
    pub contact_value: Option<String>,
    pub updated_check_numbers: Vec<String>,
}

impl ReplacementUpdate {
    pub fn is_empty(&self) -> bool {
        self.updated_check_numbers.is_empty()
    }
}

/// What to do when the backing store fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Return the error to the caller
    #[default]
    Propagate,
    /// Log it and carry on with an empty result
    DegradeToEmpty,
}

// ============================================================================
// LEDGER
// ============================================================================

pub struct Ledger<S: LedgerStore> {
    store: S,
    policy: ErrorPolicy,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, policy: ErrorPolicy) -> Self {
        Ledger { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    fn degrade<T>(&self, op: &str, err: LedgerError, fallback: T) -> Result<T, LedgerError> {
        match self.policy {
            ErrorPolicy::Propagate => Err(err),
            ErrorPolicy::DegradeToEmpty => {
                warn!(backend = self.store.name(), error = %err, "ledger {} failed, continuing", op);
                Ok(fallback)
            }
        }
    }

    fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        match self.store.snapshot() {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => self.degrade("read", e, LedgerSnapshot::empty(Revision::new("unreadable"))),
        }
    }

    /// Record a generated document. The row is always written as PENDIENTE.
    pub fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let row = LedgerEntry {
            status: LedgerStatus::Pending,
            ..entry.clone()
        }
        .to_row();

        match self.store.append(&LEDGER_HEADER, &row) {
            Ok(()) => {
                info!(
                    subject = %entry.subject_id,
                    check = %entry.check_number,
                    backend = self.store.name(),
                    "ledger entry appended"
                );
                Ok(())
            }
            Err(e) => self.degrade("append", e, ()),
        }
    }

    /// Header and raw rows, header first. Missing store → both empty.
    pub fn read_all(&self) -> Result<(Vec<String>, Vec<Vec<String>>), LedgerError> {
        let snapshot = self.load()?;
        Ok((snapshot.header, snapshot.rows))
    }

    /// Every well-formed row as a typed entry, in store order
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.scan(|_| true)
    }

    pub fn find_by_subject(&self, subject_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.scan(|e| e.subject_id == subject_id)
    }

    /// Entries for a subject still waiting for their replacement
    pub fn find_pending_by_subject(&self, subject_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.scan(|e| e.subject_id == subject_id && e.status != LedgerStatus::ReplacementReceived)
    }

    fn scan<F>(&self, keep: F) -> Result<Vec<LedgerEntry>, LedgerError>
    where
        F: Fn(&LedgerEntry) -> bool,
    {
        let snapshot = self.load()?;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let columns = match Columns::resolve(&snapshot.header) {
            Some(columns) => columns,
            None => {
                warn!(header = ?snapshot.header, "ledger header is missing required columns");
                return Ok(Vec::new());
            }
        };

        Ok(snapshot
            .rows
            .iter()
            .filter(|row| columns.is_complete(row))
            .map(|row| columns.entry(row))
            .filter(|entry| keep(entry))
            .collect())
    }

    /// Flip the selected pending cheques of a subject to REEMPLAZO RECIBIDO
    ///
    /// Matches rows with this CEDULA_ESTUDIANTE, a CHEQUE in `check_numbers`
    /// and status still pending. The contact value comes from the first match.
    /// Nothing matched → empty result and the store is not touched.
    /// A store modified since it was read → `LedgerError::Conflict`, whatever the policy.
    pub fn mark_replacement_received(
        &self,
        subject_id: &str,
        check_numbers: &HashSet<String>,
    ) -> Result<ReplacementUpdate, LedgerError> {
        let mut snapshot = self.load()?;
        if snapshot.is_empty() {
            return Ok(ReplacementUpdate::default());
        }

        let columns = match Columns::resolve(&snapshot.header) {
            Some(columns) => columns,
            None => {
                warn!(header = ?snapshot.header, "ledger header is missing required columns");
                return Ok(ReplacementUpdate::default());
            }
        };

        let received = LedgerStatus::ReplacementReceived.as_str();
        let mut update = ReplacementUpdate::default();

        for row in snapshot.rows.iter_mut() {
            if !columns.is_complete(row) {
                continue;
            }
            if row[columns.subject_id] != subject_id
                || !check_numbers.contains(&row[columns.check_number])
                || row[columns.status] == received
            {
                continue;
            }

            row[columns.status] = received.to_string();
            update.updated_check_numbers.push(row[columns.check_number].clone());
            if update.contact_value.is_none() {
                update.contact_value = Some(row[columns.contact].clone());
            }
        }

        if update.is_empty() {
            return Ok(update);
        }

        match self.store.rewrite(&snapshot) {
            Ok(()) => {}
            Err(e @ LedgerError::Conflict { .. }) => return Err(e),
            Err(e) => return self.degrade("rewrite", e, ReplacementUpdate::default()),
        }

        info!(
            subject = subject_id,
            checks = ?update.updated_check_numbers,
            "replacement received"
        );
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CsvFileStore, MemoryStore};
    use std::fs;

    fn create_test_entry(subject_id: &str, check: &str, contact: &str) -> LedgerEntry {
        LedgerEntry {
            timestamp: "2024-03-01 10:00:00".to_string(),
            subject_name: "JUAN PEREZ".to_string(),
            subject_id: subject_id.to_string(),
            contact_value: contact.to_string(),
            status: LedgerStatus::Pending,
            guardian_name: "MARIA LOPEZ".to_string(),
            guardian_id: "8-222-333".to_string(),
            form_number: "FORM1".to_string(),
            check_number: check.to_string(),
            level: "4 A".to_string(),
            school: "ESC X".to_string(),
            period: "2-015".to_string(),
        }
    }

    fn checks(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn csv_ledger(dir: &tempfile::TempDir) -> Ledger<CsvFileStore> {
        Ledger::new(
            CsvFileStore::new(dir.path().join("historial_paseu.csv")),
            ErrorPolicy::Propagate,
        )
    }

    #[test]
    fn test_append_then_read_all() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = csv_ledger(&dir);

        let mut entry = create_test_entry("8-111-222", "CHK001", "6000-0000");
        // status given by the caller is ignored on append
        entry.status = LedgerStatus::ReplacementReceived;
        ledger.append(&entry).unwrap();

        let (header, rows) = ledger.read_all().unwrap();
        assert_eq!(header, LEDGER_HEADER.to_vec());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][4], "PENDIENTE");

        let mut expected = entry.to_row();
        expected[4] = "PENDIENTE".to_string();
        assert_eq!(rows[0][1..], expected[1..]);
    }

    #[test]
    fn test_read_all_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = csv_ledger(&dir);

        let (header, rows) = ledger.read_all().unwrap();
        assert!(header.is_empty());
        assert!(rows.is_empty());
        assert!(ledger.find_by_subject("8-111-222").unwrap().is_empty());
    }

    #[test]
    fn test_find_by_subject_and_pending() {
        let ledger = Ledger::new(MemoryStore::new(), ErrorPolicy::Propagate);
        ledger.append(&create_test_entry("8-111-222", "CHK001", "6000")).unwrap();
        ledger.append(&create_test_entry("8-111-222", "CHK002", "6000")).unwrap();
        ledger.append(&create_test_entry("9-999-999", "CHK003", "7000")).unwrap();

        assert_eq!(ledger.find_by_subject("8-111-222").unwrap().len(), 2);
        assert_eq!(ledger.find_by_subject("9-999-999").unwrap().len(), 1);
        assert!(ledger.find_by_subject("8-111").unwrap().is_empty());

        ledger
            .mark_replacement_received("8-111-222", &checks(&["CHK001"]))
            .unwrap();

        let pending = ledger.find_pending_by_subject("8-111-222").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].check_number, "CHK002");
        assert_eq!(ledger.find_by_subject("8-111-222").unwrap().len(), 2);
    }

    #[test]
    fn test_short_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("historial_paseu.csv");
        let complete = create_test_entry("8-111-222", "CHK001", "6000").to_row().join(";");
        fs::write(
            &path,
            format!("{}\n8-111-222;truncated\n{}\n", LEDGER_HEADER.join(";"), complete),
        )
        .unwrap();

        let ledger = Ledger::new(CsvFileStore::new(&path), ErrorPolicy::Propagate);
        let found = ledger.find_by_subject("8-111-222").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].check_number, "CHK001");

        // the truncated row survives a rewrite untouched
        ledger
            .mark_replacement_received("8-111-222", &checks(&["CHK001"]))
            .unwrap();
        let (_, rows) = ledger.read_all().unwrap();
        assert_eq!(rows[0], vec!["8-111-222".to_string(), "truncated".to_string()]);
    }

    #[test]
    fn test_rewrite_keeps_unselected_legacy_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("historial_paseu.csv");

        let mut quoted = create_test_entry("8-111-222", "C1", "6000").to_row();
        quoted[10] = "\"LA PAZ\" ESC".to_string();
        let quoted = quoted.join(";");
        let other = create_test_entry("9-9-9", "C2", "7000").to_row().join(";");
        fs::write(
            &path,
            format!("{}\n{}\n{}\n", LEDGER_HEADER.join(";"), quoted, other),
        )
        .unwrap();

        let ledger = Ledger::new(CsvFileStore::new(&path), ErrorPolicy::Propagate);
        assert_eq!(ledger.find_by_subject("8-111-222").unwrap()[0].school, "\"LA PAZ\" ESC");

        let update = ledger
            .mark_replacement_received("9-9-9", &checks(&["C2"]))
            .unwrap();
        assert_eq!(update.updated_check_numbers, vec!["C2"]);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[1], quoted);
        assert!(lines[2].contains(";REEMPLAZO RECIBIDO;"));
    }

    #[test]
    fn test_mark_replacement_received() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = csv_ledger(&dir);
        ledger.append(&create_test_entry("8-111-222", "CHK001", "6000-1111")).unwrap();
        ledger.append(&create_test_entry("9-999-999", "CHK001", "7000")).unwrap();
        ledger.append(&create_test_entry("8-111-222", "CHK002", "6000-2222")).unwrap();
        ledger.append(&create_test_entry("8-111-222", "CHK003", "6000-3333")).unwrap();

        let update = ledger
            .mark_replacement_received("8-111-222", &checks(&["CHK002", "CHK001"]))
            .unwrap();

        // first match in scan order supplies the contact
        assert_eq!(update.contact_value.as_deref(), Some("6000-1111"));
        assert_eq!(update.updated_check_numbers, vec!["CHK001", "CHK002"]);

        let (_, rows) = ledger.read_all().unwrap();
        let statuses: Vec<&str> = rows.iter().map(|r| r[4].as_str()).collect();
        assert_eq!(
            statuses,
            vec!["REEMPLAZO RECIBIDO", "PENDIENTE", "REEMPLAZO RECIBIDO", "PENDIENTE"]
        );
        // order and other subjects untouched
        assert_eq!(rows[1][2], "9-999-999");
        assert_eq!(rows[3][8], "CHK003");
    }

    #[test]
    fn test_no_match_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = csv_ledger(&dir);
        ledger.append(&create_test_entry("8-111-222", "CHK001", "6000")).unwrap();

        let path = dir.path().join("historial_paseu.csv");
        let before = fs::read(&path).unwrap();

        let update = ledger
            .mark_replacement_received("8-111-222", &checks(&["CHKXXX"]))
            .unwrap();
        assert!(update.is_empty());
        assert_eq!(update.contact_value, None);

        let update = ledger
            .mark_replacement_received("0-000-000", &checks(&["CHK001"]))
            .unwrap();
        assert!(update.is_empty());

        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_mark_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = csv_ledger(&dir);
        ledger.append(&create_test_entry("8-111-222", "CHK001", "6000")).unwrap();
        ledger.append(&create_test_entry("8-111-222", "CHK002", "6000")).unwrap();

        let selected = checks(&["CHK001"]);
        let first = ledger.mark_replacement_received("8-111-222", &selected).unwrap();
        assert_eq!(first.updated_check_numbers, vec!["CHK001"]);

        let path = dir.path().join("historial_paseu.csv");
        let after_first = fs::read(&path).unwrap();

        let second = ledger.mark_replacement_received("8-111-222", &selected).unwrap();
        assert!(second.is_empty());
        assert_eq!(fs::read(&path).unwrap(), after_first);

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, LedgerStatus::ReplacementReceived);
        assert_eq!(entries[1].status, LedgerStatus::Pending);
    }

    #[test]
    fn test_columns_resolved_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("historial_paseu.csv");
        let mut header: Vec<&str> = LEDGER_HEADER.to_vec();
        header.reverse();
        let mut row = create_test_entry("8-111-222", "CHK001", "6000").to_row();
        row.reverse();
        fs::write(&path, format!("{}\n{}\n", header.join(";"), row.join(";"))).unwrap();

        let ledger = Ledger::new(CsvFileStore::new(&path), ErrorPolicy::Propagate);
        let found = ledger.find_pending_by_subject("8-111-222").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].contact_value, "6000");
        assert_eq!(found[0].period, "2-015");
    }

    #[test]
    fn test_unreadable_store_policies() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be makes every read fail
        let path = dir.path().join("historial_paseu.csv");
        fs::create_dir(&path).unwrap();

        let strict = Ledger::new(CsvFileStore::new(&path), ErrorPolicy::Propagate);
        assert!(strict.read_all().is_err());
        assert!(strict.find_by_subject("8-111-222").is_err());
        assert!(strict.append(&create_test_entry("8-111-222", "C1", "6")).is_err());

        let lenient = Ledger::new(CsvFileStore::new(&path), ErrorPolicy::DegradeToEmpty);
        let (header, rows) = lenient.read_all().unwrap();
        assert!(header.is_empty() && rows.is_empty());
        assert!(lenient.find_pending_by_subject("8-111-222").unwrap().is_empty());
        assert!(lenient.append(&create_test_entry("8-111-222", "C1", "6")).is_ok());
        assert!(lenient
            .mark_replacement_received("8-111-222", &checks(&["C1"]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_error_policy_from_config_text() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: ErrorPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"degrade_to_empty\"").unwrap();
        assert_eq!(w.policy, ErrorPolicy::DegradeToEmpty);
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::Propagate);
    }
}
