use std::error::Error;
use std::io::ErrorKind;

use http::StatusCode;

use crate::cache::CacheError;
use crate::fs::FsError;
use crate::lockmanager::FileLock;

/// Everything that can go wrong while handling a request.
#[derive(Debug)]
pub enum DavError {
    XmlReadError,  // error reading/parsing xml
    XmlParseError, // error interpreting xml
    XmlWriteError, // error generating xml
    InvalidPath,   // error parsing path
    IllegalPath,   // path not valid here
    ForbiddenPath, // too many dotdots
    UnknownDavMethod,
    Status(StatusCode),
    StatusClose(StatusCode),
    LockConflict(Box<FileLock>),
    FsError(FsError),
    CacheError(CacheError),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::FsError(e) => Some(e),
            DavError::CacheError(e) => Some(e),
            DavError::IoError(e) => Some(e),
            DavError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for DavError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DavError::XmlReadError => write!(f, "XML parse error"),
            DavError::XmlWriteError => write!(f, "XML generate error"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::LockConflict(lock) => write!(f, "lock conflict on {}", lock.db_file_path),
            DavError::FsError(e) => write!(f, "filesystem error: {e}"),
            DavError::CacheError(e) => write!(f, "lock store error: {e}"),
            DavError::JsonError(e) => write!(f, "lock record error: {e}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::FsError(e)
    }
}

impl From<CacheError> for DavError {
    fn from(e: CacheError) -> Self {
        DavError::CacheError(e)
    }
}

impl From<std::io::Error> for DavError {
    fn from(e: std::io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<serde_json::Error> for DavError {
    fn from(e: serde_json::Error) -> Self {
        DavError::JsonError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

fn ioerror_to_status(ioerror: &std::io::Error) -> StatusCode {
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

pub(crate) fn fserror_to_status(e: &FsError) -> StatusCode {
    match e {
        FsError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::InsufficientStorage => StatusCode::INSUFFICIENT_STORAGE,
        FsError::LoopDetected => StatusCode::LOOP_DETECTED,
        FsError::PathTooLong => StatusCode::URI_TOO_LONG,
        FsError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        FsError::IsRemote => StatusCode::BAD_GATEWAY,
        FsError::Status(code, _) => *code,
    }
}

impl DavError {
    /// The HTTP status this error maps to.
    pub fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::XmlWriteError => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::BAD_GATEWAY,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::LockConflict(_) => StatusCode::LOCKED,
            DavError::FsError(e) => fserror_to_status(e),
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::CacheError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::JsonError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(
            self,
            DavError::Status(_) | DavError::LockConflict(_) | DavError::FsError(FsError::Status(..))
        )
    }

    // errors that nobody expects, these get logged loudly.
    pub(crate) fn is_unexpected(&self) -> bool {
        matches!(
            self,
            DavError::XmlWriteError
                | DavError::CacheError(_)
                | DavError::JsonError(_)
                | DavError::FsError(FsError::GeneralFailure)
        )
    }
}

pub type DavResult<T> = Result<T, DavError>;
