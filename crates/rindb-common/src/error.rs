use thiserror::Error;

#[derive(Error, Debug)]
pub enum RinError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("write error: {message} (code {code})")]
    Write { message: String, code: i32 },

    #[error("not found")]
    NotFound,

    #[error("cursor is closed")]
    CursorClosed,

    #[error("bson error: {0}")]
    Bson(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid ObjectId: {0}")]
    InvalidObjectId(String),
}

pub type RinResult<T> = Result<T, RinError>;
