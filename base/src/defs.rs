use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    IoError,
    MalformedData,
    InconsistentState,
    InvalidArgument,
    InvalidLabel,
    FormatError,
    PatchTooLarge,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub description: String,
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, description: String) -> Self {
        Self {
            kind,
            description,
            source: None,
        }
    }

    pub fn with_source<E: StdError + Send + Sync + 'static>(
        kind: ErrorKind,
        description: String,
        source: E,
    ) -> Self {
        Self {
            kind,
            description,
            source: Some(Box::new(source)),
        }
    }

    // Prefixes the description with the pipeline stage that failed.
    pub fn in_stage(mut self, stage: &str) -> Self {
        self.description = format!("{}: {}", stage, self.description);
        self
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if let Some(source) = &self.source {
            write!(f, "{} ({})", self.description, source)
        } else {
            write!(f, "{}", self.description)
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        let desc = "i/o failure".to_string();
        Error::with_source(ErrorKind::IoError, desc, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait IntoResult<T> {
    fn res<F: FnOnce() -> String>(self, desc: F) -> Result<T>;
}

impl<T, E: StdError + Send + Sync + 'static> IntoResult<T>
    for std::result::Result<T, E>
{
    fn res<F: FnOnce() -> String>(self, desc: F) -> Result<T> {
        self.map_err(|err| {
            Error::with_source(ErrorKind::IoError, desc(), err)
        })
    }
}

impl<T> IntoResult<T> for Option<T> {
    fn res<F: FnOnce() -> String>(self, desc: F) -> Result<T> {
        self.ok_or_else(|| Error::new(ErrorKind::InconsistentState, desc()))
    }
}
