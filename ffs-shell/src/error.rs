use std::io;

use flat_fs::FsError;
use thiserror::Error;

/// Errors that end a shell session
#[derive(Debug, Error)]
pub enum ShellError {
    /// Host I/O on the command streams or an image file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The file system reported an error
    #[error("file system error: {0}")]
    Fs(#[from] FsError),
}

/// A command line that could not be turned into a command
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("file system isn't initialized")]
    NotInitialized,
    #[error("wrong argument count")]
    WrongArgumentCount,
    #[error("wrong command")]
    WrongCommand,
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("insert one char at a time, please")]
    NotOneChar,
}
