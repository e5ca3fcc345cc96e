#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("\"{name}\" is already on the roster")]
    DuplicateName { name: String },
    #[error("store is not ready")]
    NotReady,
    #[error("roster entry not found: {0}")]
    UnknownEntry(String),
    #[error("date must be YYYY-MM-DD: {0}")]
    InvalidDate(String),
    #[error("unknown attendance status: {0}")]
    InvalidStatus(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateName { .. } => "duplicate_name",
            Self::NotReady => "not_ready",
            Self::UnknownEntry(_) => "not_found",
            Self::InvalidDate(_) | Self::InvalidStatus(_) => "bad_params",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("remote load failed: {0}")]
    LoadFailure(String),
    #[error("remote save failed: {0}")]
    SaveFailure(String),
}
