//! Error types of the loader.

/// Classification of loader errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorKind {
    MappingInvalid,
    MappingMissing,
    MappingAmbiguous,
    TypeMismatch,
    NullOnRequired,
    RequiredMissing,
    ArrayCardinality,
    RepertoireNotFound,
    RepertoireAmbiguous,
    SchemaViolation,
    PresetLinkField,
    Repository,
    Input,
}

/// How far an error reaches: the failing record, the current file, or the
/// whole ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Scope {
    Record,
    File,
    Mapping,
}

/// Errors raised while mapping, building and storing records.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid mapping table: {0}")]
    MappingInvalid(String),
    #[error("no mapping for field {field:?} in view {view:?}")]
    MappingMissing { field: String, view: String },
    #[error("duplicate mapping entries for field {field:?} in class {class}")]
    MappingAmbiguous { field: String, class: String },
    #[error("cannot coerce value {value} of field {field:?} to {target}")]
    TypeMismatch {
        field: String,
        value: String,
        target: String,
    },
    #[error("null value for non-nullable field {field:?}")]
    NullOnRequired { field: String },
    #[error("required field {field:?} is missing")]
    RequiredMissing { field: String },
    #[error("cannot flatten list of {len} objects at {path:?}")]
    ArrayCardinality { path: String, len: usize },
    #[error("no repertoire lists data file {file:?}")]
    RepertoireNotFound { file: String },
    #[error("{count} repertoires list data file {file:?}")]
    RepertoireAmbiguous { file: String, count: usize },
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("record sets {field:?} to {found:?} but its repertoire has {expected:?}")]
    PresetLinkField {
        field: String,
        found: String,
        expected: String,
    },
    #[error("repository error: {0}")]
    Repository(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("problem reading tabular input: {0}")]
    Csv(#[from] csv::Error),
    #[error("problem reading JSON input: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MappingInvalid(_) => ErrorKind::MappingInvalid,
            Error::MappingMissing { .. } => ErrorKind::MappingMissing,
            Error::MappingAmbiguous { .. } => ErrorKind::MappingAmbiguous,
            Error::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Error::NullOnRequired { .. } => ErrorKind::NullOnRequired,
            Error::RequiredMissing { .. } => ErrorKind::RequiredMissing,
            Error::ArrayCardinality { .. } => ErrorKind::ArrayCardinality,
            Error::RepertoireNotFound { .. } => ErrorKind::RepertoireNotFound,
            Error::RepertoireAmbiguous { .. } => ErrorKind::RepertoireAmbiguous,
            Error::SchemaViolation(_) => ErrorKind::SchemaViolation,
            Error::PresetLinkField { .. } => ErrorKind::PresetLinkField,
            Error::Repository(_) => ErrorKind::Repository,
            Error::Io(_) | Error::Csv(_) | Error::Json(_) => ErrorKind::Input,
        }
    }

    /// Recovery scope of the error.
    ///
    /// Record-scope errors still abort the containing chunk and file, the scope
    /// only tells callers which unit of work is to blame.
    pub fn scope(&self) -> Scope {
        match self.kind() {
            ErrorKind::MappingInvalid | ErrorKind::MappingAmbiguous => Scope::Mapping,
            ErrorKind::TypeMismatch
            | ErrorKind::NullOnRequired
            | ErrorKind::RequiredMissing
            | ErrorKind::ArrayCardinality => Scope::Record,
            ErrorKind::MappingMissing
            | ErrorKind::RepertoireNotFound
            | ErrorKind::RepertoireAmbiguous
            | ErrorKind::SchemaViolation
            | ErrorKind::PresetLinkField
            | ErrorKind::Repository
            | ErrorKind::Input => Scope::File,
        }
    }
}
