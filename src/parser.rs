// 🏗️ Parser Framework
// Header-anchored, tab-delimited cheque table parser
//
// The pasted block looks like:
//   Regional  Grado  Centro  ESTUDIANTE  Beca  Monto  N° Cheque ...
//   PANAMA NORTE  4 A  ESC. NUEVO PROGRESO  8-1161-843 ALIANIS GUTIERREZ ...
//
// Column positions live in a RowSchema (data), not in the parsing loop (code).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, trace};

// Cedula shape at the start of the student column: 8-1161-843, 10-222-3333
static SUBJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}-\d{3,4}-\d{3,4}").unwrap());

// ============================================================================
// CORE TYPES
// ============================================================================

/// ChequeRecord - one parsed data row (a single cheque for one student)
///
/// Every field is kept as text. Amounts and dates are never parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChequeRecord {
    pub grade: String,
    pub center: String,         // upper-cased
    pub subject_id: String,     // empty when the student column has no cedula
    pub subject_name: String,   // upper-cased
    pub scholarship: String,
    pub amount: String,         // currency text as pasted
    pub check_number: String,
    pub form_number: String,
    pub date: String,
    pub line_status: String,
    pub period: String,         // "2-015", "3 - 020" ...
}

/// Target slot of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordField {
    Grade,
    Center,
    /// Student column: optional cedula followed by the name
    Subject,
    Scholarship,
    Amount,
    CheckNumber,
    FormNumber,
    Date,
    LineStatus,
    Period,
}

/// How a raw cell becomes a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    Trim,
    TrimUpper,
    /// Split a leading cedula token off the name (fills subject_id + subject_name)
    SubjectSplit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub source_index: usize,
    pub target: RecordField,
    pub transform: Transform,
}

impl FieldSpec {
    pub fn new(source_index: usize, target: RecordField, transform: Transform) -> Self {
        FieldSpec {
            source_index,
            target,
            transform,
        }
    }
}

/// RowSchema - header anchors plus the ordered field mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    /// Substrings that must all appear in the header line (case-sensitive)
    pub anchors: Vec<String>,
    pub fields: Vec<FieldSpec>,
    /// Lines with fewer tab-separated cells are skipped
    pub min_fields: usize,
}

impl RowSchema {
    /// Build a schema; `min_fields` defaults to one past the highest source index
    pub fn new(anchors: &[&str], fields: Vec<FieldSpec>) -> Self {
        let min_fields = fields
            .iter()
            .map(|f| f.source_index + 1)
            .max()
            .unwrap_or(0);

        RowSchema {
            anchors: anchors.iter().map(|a| a.to_string()).collect(),
            fields,
            min_fields,
        }
    }

    pub fn with_min_fields(mut self, min_fields: usize) -> Self {
        self.min_fields = min_fields;
        self
    }

    /// Layout of the PASEU cheque export (13 columns, 0/7/8 unused)
    pub fn paseu() -> Self {
        use RecordField::*;
        use Transform::*;

        RowSchema::new(
            &["Regional", "Grado", "Centro", "ESTUDIANTE"],
            vec![
                FieldSpec::new(1, Grade, Trim),
                FieldSpec::new(2, Center, TrimUpper),
                FieldSpec::new(3, Subject, SubjectSplit),
                FieldSpec::new(4, Scholarship, Trim),
                FieldSpec::new(5, Amount, Trim),
                FieldSpec::new(6, CheckNumber, Trim),
                FieldSpec::new(9, FormNumber, Trim),
                FieldSpec::new(10, Date, Trim),
                FieldSpec::new(11, LineStatus, Trim),
                FieldSpec::new(12, Period, Trim),
            ],
        )
        .with_min_fields(13)
    }

    /// Does this line carry every header anchor?
    pub fn is_header(&self, line: &str) -> bool {
        self.anchors.iter().all(|a| line.contains(a.as_str()))
    }

    /// Map one line's cells into a record. None if the line is too short.
    pub fn map_row(&self, cells: &[&str]) -> Option<ChequeRecord> {
        if cells.len() < self.min_fields {
            return None;
        }

        let mut record = ChequeRecord::default();
        for spec in &self.fields {
            let raw = cells.get(spec.source_index)?.trim();
            match spec.transform {
                Transform::Trim => set_field(&mut record, spec.target, raw.to_string()),
                Transform::TrimUpper => set_field(&mut record, spec.target, raw.to_uppercase()),
                Transform::SubjectSplit => {
                    let (id, name) = split_subject(raw);
                    record.subject_id = id;
                    record.subject_name = name;
                }
            }
        }

        Some(record)
    }
}

impl Default for RowSchema {
    fn default() -> Self {
        RowSchema::paseu()
    }
}

fn set_field(record: &mut ChequeRecord, field: RecordField, value: String) {
    match field {
        RecordField::Grade => record.grade = value,
        RecordField::Center => record.center = value,
        RecordField::Subject => record.subject_name = value,
        RecordField::Scholarship => record.scholarship = value,
        RecordField::Amount => record.amount = value,
        RecordField::CheckNumber => record.check_number = value,
        RecordField::FormNumber => record.form_number = value,
        RecordField::Date => record.date = value,
        RecordField::LineStatus => record.line_status = value,
        RecordField::Period => record.period = value,
    }
}

/// Split "8-1161-843 alianis gutierrez" into ("8-1161-843", "ALIANIS GUTIERREZ")
///
/// Without a leading cedula the whole cell becomes the name and the id is empty.
pub fn split_subject(cell: &str) -> (String, String) {
    let cell = cell.trim();
    let tokens: Vec<&str> = cell.split_whitespace().collect();

    match tokens.first() {
        Some(first) if SUBJECT_ID.is_match(first) => {
            (first.to_string(), tokens[1..].join(" ").to_uppercase())
        }
        _ => (String::new(), cell.to_uppercase()),
    }
}

/// ParseReport - records plus what was dropped on the way
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub records: Vec<ChequeRecord>,
    pub header_found: bool,
    /// Non-blank lines after the header that had too few cells
    pub skipped_lines: usize,
}

impl ParseReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// TableParser - turns a pasted text block into records
///
/// Never fails: a missing header or short lines produce fewer records, not errors.
pub trait TableParser: Send + Sync {
    fn parse_with_report(&self, text: &str) -> ParseReport;

    fn parse(&self, text: &str) -> Vec<ChequeRecord> {
        self.parse_with_report(text).records
    }

    /// Parser version (for provenance in logs)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// Characters that end a line in pasted text. A `\r\n` pair leaves a blank
/// piece between its halves, which the blank-line filter drops.
const LINE_BREAKS: [char; 10] = [
    '\n', '\r', '\u{0b}', '\u{0c}', '\u{1c}', '\u{1d}', '\u{1e}', '\u{85}', '\u{2028}', '\u{2029}',
];

/// Parser for the PASEU cheque export, driven by a RowSchema
pub struct PaseuParser {
    schema: RowSchema,
}

impl PaseuParser {
    pub fn new() -> Self {
        PaseuParser {
            schema: RowSchema::paseu(),
        }
    }

    pub fn with_schema(schema: RowSchema) -> Self {
        PaseuParser { schema }
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }
}

impl Default for PaseuParser {
    fn default() -> Self {
        PaseuParser::new()
    }
}

impl TableParser for PaseuParser {
    fn parse_with_report(&self, text: &str) -> ParseReport {
        let lines: Vec<&str> = text
            .split(LINE_BREAKS)
            .filter(|l| !l.trim().is_empty())
            .collect();

        let header_idx = match lines.iter().position(|l| self.schema.is_header(l)) {
            Some(idx) => idx,
            None => {
                debug!("no header line found in {} non-blank lines", lines.len());
                return ParseReport::default();
            }
        };

        let mut report = ParseReport {
            header_found: true,
            ..ParseReport::default()
        };

        for line in &lines[header_idx + 1..] {
            let cells: Vec<&str> = line.split('\t').collect();
            match self.schema.map_row(&cells) {
                Some(record) => report.records.push(record),
                None => {
                    trace!(cells = cells.len(), "skipping short line");
                    report.skipped_lines += 1;
                }
            }
        }

        debug!(
            records = report.records.len(),
            skipped = report.skipped_lines,
            parser_version = self.version(),
            "parsed cheque table"
        );

        report
    }
}

/// Parse a pasted block with the default PASEU layout
pub fn parse_cheque_table(text: &str) -> Vec<ChequeRecord> {
    PaseuParser::new().parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::{classify_period, PaymentStageFlags};

    const HEADER: &str =
        "Regional\tGrado\tCentro\tESTUDIANTE\tBeca\tMonto\tN° Cheque\tBanco\tCuenta\tPlanilla\tFecha\tEstado\tPeriodo";

    fn sample_line() -> &'static str {
        "R1\tGRADO4\tESC X\t8-111-222 JUAN PEREZ\tBECA\t50.00\tCHK001\tx\ty\tFORM1\t2024-01-01\tOK\t2-015"
    }

    #[test]
    fn test_no_header_returns_empty() {
        let text = format!("Grado\tCentro\tESTUDIANTE\n{}", sample_line());
        assert!(parse_cheque_table(&text).is_empty());
        assert!(parse_cheque_table("").is_empty());
    }

    #[test]
    fn test_header_is_case_sensitive() {
        let text = format!("regional\tgrado\tcentro\testudiante\n{}", sample_line());
        let report = PaseuParser::new().parse_with_report(&text);
        assert!(!report.header_found);
        assert!(report.is_empty());
    }

    #[test]
    fn test_header_without_data_returns_empty() {
        let text = format!("{}\nshort\tline\n\n", HEADER);
        let report = PaseuParser::new().parse_with_report(&text);

        assert!(report.header_found);
        assert!(report.records.is_empty());
        assert_eq!(report.skipped_lines, 1);
    }

    #[test]
    fn test_end_to_end_single_row() {
        let text = format!("R.Legal: Maria Lopez Cedula: 8-222-333\n{}\n{}", HEADER, sample_line());
        let records = parse_cheque_table(&text);

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.subject_id, "8-111-222");
        assert_eq!(r.subject_name, "JUAN PEREZ");
        assert_eq!(r.check_number, "CHK001");
        assert_eq!(r.period, "2-015");
        assert_eq!(r.grade, "GRADO4");
        assert_eq!(r.center, "ESC X");
        assert_eq!(r.scholarship, "BECA");
        assert_eq!(r.amount, "50.00");
        assert_eq!(r.form_number, "FORM1");
        assert_eq!(r.date, "2024-01-01");
        assert_eq!(r.line_status, "OK");

        let flags = PaymentStageFlags::from(classify_period(&r.period));
        assert_eq!(
            flags,
            PaymentStageFlags {
                first_payment: true,
                second_payment: false,
                third_payment: false,
            }
        );
    }

    #[test]
    fn test_cr_and_unicode_line_breaks() {
        for sep in ["\r", "\r\n", "\u{2028}", "\u{2029}", "\u{0c}", "\u{85}"] {
            let text = format!("{}{}{}{}", HEADER, sep, sample_line(), sep);
            let records = parse_cheque_table(&text);
            assert_eq!(records.len(), 1, "separator {:?}", sep);
            assert_eq!(records[0].period, "2-015");
        }
    }

    #[test]
    fn test_subject_without_cedula() {
        let line = "R1\t4 A\tesc. nuevo progreso\t  ana  maria  \tB\t1\tC9\tx\ty\tF\tD\tS\t3-1";
        let records = parse_cheque_table(&format!("{}\n{}", HEADER, line));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject_id, "");
        assert_eq!(records[0].subject_name, "ANA  MARIA");
        assert_eq!(records[0].center, "ESC. NUEVO PROGRESO");
    }

    #[test]
    fn test_split_subject_branches() {
        assert_eq!(
            split_subject("8-1161-843 alianis   gutierrez"),
            ("8-1161-843".to_string(), "ALIANIS GUTIERREZ".to_string())
        );
        assert_eq!(
            split_subject("10-2222-3333 ANA"),
            ("10-2222-3333".to_string(), "ANA".to_string())
        );
        // PE-12-345 is not a cedula shape for this export
        assert_eq!(
            split_subject("PE-12-345 ANA"),
            (String::new(), "PE-12-345 ANA".to_string())
        );
        assert_eq!(split_subject(""), (String::new(), String::new()));
    }

    #[test]
    fn test_blank_and_short_lines_skipped() {
        let text = format!(
            "basura\n\n{}\n\n{}\n\t\t\n{}\nfila\tcorta\n",
            HEADER,
            sample_line(),
            sample_line().replace("CHK001", "CHK002")
        );
        let report = PaseuParser::new().parse_with_report(&text);

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].check_number, "CHK001");
        assert_eq!(report.records[1].check_number, "CHK002");
        // "\t\t" trims to empty and is dropped as blank, only "fila\tcorta" counts
        assert_eq!(report.skipped_lines, 1);
    }

    #[test]
    fn test_duplicate_check_numbers_allowed() {
        let text = format!("{}\n{}\n{}", HEADER, sample_line(), sample_line());
        let records = parse_cheque_table(&text);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], records[1]);
    }

    #[test]
    fn test_fields_are_trimmed() {
        let line = " R1 \t GRADO4 \t esc x \t 8-111-222 juan \t BECA \t 50.00 \t CHK001 \tx\ty\t FORM1 \t 2024 \t OK \t 2 - 015 ";
        let records = parse_cheque_table(&format!("{}\n{}", HEADER, line));

        assert_eq!(records[0].grade, "GRADO4");
        assert_eq!(records[0].center, "ESC X");
        assert_eq!(records[0].subject_id, "8-111-222");
        assert_eq!(records[0].subject_name, "JUAN");
        assert_eq!(records[0].period, "2 - 015");
    }

    #[test]
    fn test_extra_columns_are_ignored() {
        let line = format!("{}\textra\tmore", sample_line());
        let records = parse_cheque_table(&format!("{}\n{}", HEADER, line));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].period, "2-015");
    }

    #[test]
    fn test_custom_schema() {
        let schema = RowSchema::new(
            &["Cheque", "Alumno"],
            vec![
                FieldSpec::new(0, RecordField::CheckNumber, Transform::Trim),
                FieldSpec::new(1, RecordField::Subject, Transform::SubjectSplit),
            ],
        );
        assert_eq!(schema.min_fields, 2);

        let parser = PaseuParser::with_schema(schema);
        let records = parser.parse("Cheque\tAlumno\nC1\t8-111-222 luis\nC2\n");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].check_number, "C1");
        assert_eq!(records[0].subject_id, "8-111-222");
        assert_eq!(records[0].subject_name, "LUIS");
    }
}
