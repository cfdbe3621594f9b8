// 📄 Document assembly
// Record + guardian + contact → filled document + one PENDIENTE ledger row.
//
// The layout itself is never modified: only `{{FIELD}}` tokens are replaced,
// everything else in the template passes through as is.

use crate::error::DocumentError;
use crate::guardian::Guardian;
use crate::ledger::{Ledger, LedgerEntry};
use crate::parser::ChequeRecord;
use crate::period::stage_marks;
use crate::store::LedgerStore;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Placeholder name → value
pub type TemplateFields = BTreeMap<&'static str, String>;

/// Every placeholder a layout may contain
pub const PLACEHOLDERS: [&str; 12] = [
    "CHEQUE",
    "PLANILLA",
    "NIVEL",
    "COLEGIO",
    "NOMBRE_ESTUDIANTE",
    "CEDULA_ESTUDIANTE",
    "NOMBRE_ACUDIENTE",
    "CEDULA_ACUDIENTE",
    "PRIMER_PAGO",
    "SEGUNDO_PAGO",
    "TERCER_PAGO",
    "FECHA_ACTUAL",
];

pub fn template_fields(record: &ChequeRecord, guardian: &Guardian, today: NaiveDate) -> TemplateFields {
    let mut fields = TemplateFields::new();
    fields.insert("FECHA_ACTUAL", today.format("%d/%m/%Y").to_string());
    fields.insert("NOMBRE_ESTUDIANTE", record.subject_name.clone());
    fields.insert("CEDULA_ESTUDIANTE", record.subject_id.clone());
    fields.insert("NIVEL", record.grade.clone());
    fields.insert("COLEGIO", record.center.clone());
    fields.insert("PLANILLA", record.form_number.clone());
    fields.insert("CHEQUE", record.check_number.clone());
    fields.insert("NOMBRE_ACUDIENTE", guardian.name.clone());
    fields.insert("CEDULA_ACUDIENTE", guardian.id.clone());

    for (placeholder, mark) in stage_marks(&record.period) {
        fields.insert(placeholder, mark.to_string());
    }

    fields
}

/// Replace every `{{NAME}}` whose NAME is in `fields`
///
/// Returns the new text and whether anything was substituted, so a renderer
/// can restyle only the runs it touched.
pub fn fill_placeholders(text: &str, fields: &TemplateFields) -> (String, bool) {
    let mut out = text.to_string();
    for (name, value) in fields {
        let token = format!("{{{{{}}}}}", name);
        if out.contains(&token) {
            out = out.replace(&token, value);
        }
    }
    let changed = out != text;
    (out, changed)
}

/// "{cedula}_{periodo}_{cheque}" with '/' made path-safe
pub fn output_file_stem(record: &ChequeRecord) -> String {
    format!(
        "{}_{}_{}",
        record.subject_id, record.period, record.check_number
    )
    .replace('/', "-")
}

// ============================================================================
// RENDERER
// ============================================================================

/// DocumentRenderer - the templating engine seam
pub trait DocumentRenderer {
    /// Produce one document named after `output_stem`, return where it landed
    fn render(&self, fields: &TemplateFields, output_stem: &str) -> Result<PathBuf, DocumentError>;
}

/// Plain-text layout renderer: substitutes placeholders line by line
pub struct TextTemplateRenderer {
    template_path: PathBuf,
    output_dir: PathBuf,
}

impl TextTemplateRenderer {
    pub fn new(template_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        TextTemplateRenderer {
            template_path: template_path.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl DocumentRenderer for TextTemplateRenderer {
    fn render(&self, fields: &TemplateFields, output_stem: &str) -> Result<PathBuf, DocumentError> {
        if !self.template_path.exists() {
            return Err(DocumentError::TemplateNotFound(self.template_path.clone()));
        }
        let layout = fs::read_to_string(&self.template_path)?;

        let mut filled = String::with_capacity(layout.len());
        let mut touched = 0;
        for line in layout.split_inclusive('\n') {
            let (line, changed) = fill_placeholders(line, fields);
            if changed {
                touched += 1;
            }
            filled.push_str(&line);
        }

        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}.txt", output_stem));
        fs::write(&path, filled)?;

        debug!(path = %path.display(), lines = touched, "rendered document");
        Ok(path)
    }
}

// ============================================================================
// ASSEMBLER
// ============================================================================

/// Outcome for one selected row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Generated { index: usize, path: PathBuf },
    Skipped { index: usize, reason: String },
    Failed { index: usize, error: String },
}

impl RowOutcome {
    pub fn is_generated(&self) -> bool {
        matches!(self, RowOutcome::Generated { .. })
    }
}

pub struct DocumentAssembler<R: DocumentRenderer, S: LedgerStore> {
    renderer: R,
    ledger: Ledger<S>,
}

impl<R: DocumentRenderer, S: LedgerStore> DocumentAssembler<R, S> {
    pub fn new(renderer: R, ledger: Ledger<S>) -> Self {
        DocumentAssembler { renderer, ledger }
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    /// Render one record and log it as PENDIENTE
    pub fn fill(
        &self,
        record: &ChequeRecord,
        guardian: &Guardian,
        contact: &str,
    ) -> Result<PathBuf, DocumentError> {
        let fields = template_fields(record, guardian, Local::now().date_naive());
        let path = self.renderer.render(&fields, &output_file_stem(record))?;

        self.ledger
            .append(&LedgerEntry::for_record(record, guardian, contact))?;

        Ok(path)
    }

    /// Fill every selected record, one outcome per selected index
    pub fn generate(
        &self,
        records: &[ChequeRecord],
        selection: &[usize],
        guardian: &Guardian,
        contact: &str,
    ) -> Vec<RowOutcome> {
        selection
            .iter()
            .map(|&index| match records.get(index) {
                None => RowOutcome::Skipped {
                    index,
                    reason: format!("no row {} (parsed {})", index, records.len()),
                },
                Some(record) => match self.fill(record, guardian, contact) {
                    Ok(path) => RowOutcome::Generated { index, path },
                    Err(e) => {
                        warn!(index, check = %record.check_number, error = %e, "document not generated");
                        RowOutcome::Failed {
                            index,
                            error: e.to_string(),
                        }
                    }
                },
            })
            .collect()
    }
}
