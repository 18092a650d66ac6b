//! Server status codes
//!
//! The status byte of a response header. Only a handful of codes are a
//! legitimate transactional answer; the rest are surfaced as errors.

/// Status reported by the proxy in a response header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerStatus {
    Success,
    BadMessage,
    NoKey,
    DuplicateKey,
    BadParam,
    RecordLocked,
    NoStorageServer,
    ServerBusy,
    VersionConflict,
    TtlExtendFailure,
    CommitFailure,
    InconsistentState,
    Internal,
}

impl ServerStatus {
    /// Map a wire code to a status; unknown codes are `Internal`
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ServerStatus::Success,
            1 => ServerStatus::BadMessage,
            3 => ServerStatus::NoKey,
            4 => ServerStatus::DuplicateKey,
            7 => ServerStatus::BadParam,
            8 => ServerStatus::RecordLocked,
            12 => ServerStatus::NoStorageServer,
            14 => ServerStatus::ServerBusy,
            19 => ServerStatus::VersionConflict,
            23 => ServerStatus::TtlExtendFailure,
            25 => ServerStatus::CommitFailure,
            26 => ServerStatus::InconsistentState,
            _ => ServerStatus::Internal,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ServerStatus::Success => 0,
            ServerStatus::BadMessage => 1,
            ServerStatus::NoKey => 3,
            ServerStatus::DuplicateKey => 4,
            ServerStatus::BadParam => 7,
            ServerStatus::RecordLocked => 8,
            ServerStatus::NoStorageServer => 12,
            ServerStatus::ServerBusy => 14,
            ServerStatus::VersionConflict => 19,
            ServerStatus::TtlExtendFailure => 23,
            ServerStatus::CommitFailure => 25,
            ServerStatus::InconsistentState => 26,
            ServerStatus::Internal => 255,
        }
    }

    /// Collapse statuses the client reports as plain success
    pub fn normalized(self) -> Self {
        match self {
            ServerStatus::InconsistentState => ServerStatus::Success,
            other => other,
        }
    }

    /// Whether this status is a valid answer to the operation rather than a
    /// failure of the system
    pub fn is_txn_ok(&self) -> bool {
        matches!(
            self.normalized(),
            ServerStatus::Success
                | ServerStatus::VersionConflict
                | ServerStatus::NoKey
                | ServerStatus::RecordLocked
                | ServerStatus::DuplicateKey
                | ServerStatus::TtlExtendFailure
        )
    }

    pub fn error_text(&self) -> &'static str {
        match self {
            ServerStatus::Success => "no error",
            ServerStatus::BadMessage => "bad message",
            ServerStatus::NoKey => "key not found",
            ServerStatus::DuplicateKey => "duplicate key",
            ServerStatus::BadParam => "bad parameter",
            ServerStatus::RecordLocked => "record locked",
            ServerStatus::NoStorageServer => "no active storage server",
            ServerStatus::ServerBusy => "server busy",
            ServerStatus::VersionConflict => "version conflict",
            ServerStatus::TtlExtendFailure => "failed to extend TTL",
            ServerStatus::CommitFailure => "commit failed",
            ServerStatus::InconsistentState => "inconsistent state",
            ServerStatus::Internal => "internal error",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.error_text(), self.code())
    }
}
