// PASEU cheque documents - Core Library
// Parser, period classifier, ledger state machine and document assembly.
// Used by the `paseu` binary and by tests.

pub mod config;
pub mod document;
pub mod error;
pub mod guardian;
pub mod ledger;
pub mod parser;
pub mod period;
pub mod store;

// Re-export commonly used types
pub use config::{AppConfig, Backend};
pub use document::{
    fill_placeholders, output_file_stem, template_fields,
    DocumentAssembler, DocumentRenderer, RowOutcome, TemplateFields, TextTemplateRenderer,
    PLACEHOLDERS,
};
pub use error::{ConfigError, DocumentError, LedgerError};
pub use guardian::{extract_guardian, Guardian};
pub use ledger::{
    ErrorPolicy, Ledger, LedgerEntry, LedgerStatus, ReplacementUpdate, LEDGER_HEADER,
};
pub use parser::{
    parse_cheque_table, split_subject,
    ChequeRecord, FieldSpec, PaseuParser, ParseReport, RecordField, RowSchema, TableParser,
    Transform,
};
pub use period::{classify_period, stage_marks, PaymentStage, PaymentStageFlags};
pub use store::{
    CsvFileStore, LedgerSnapshot, LedgerStore, MemoryStore, Revision, SqliteStore,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
