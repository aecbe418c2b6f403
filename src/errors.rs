use std::error::Error;
use std::fmt;
use std::io;

/// Enumeration of all errors raised while reading, writing or converting media
#[derive(Debug)]
pub enum MediaError {
    Format(FormatError),
    Configuration(ConfigurationError),
    Unsupported(UnsupportedError),
    Stream(StreamError),
    Conversion(ConversionError),
    Other(io::Error),
}

/// The input signature is unrecognized or a required structure is invalid
#[derive(Debug)]
pub struct FormatError {
    pub message: String,
}

impl FormatError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Invalid output composition or lifecycle misuse, raised before any bytes are written
#[derive(Debug)]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A valid feature of the format that is not implemented
#[derive(Debug)]
pub struct UnsupportedError {
    pub message: String,
}

impl UnsupportedError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct StreamError {
    pub message: String,
}

impl StreamError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Conversion pipeline errors
#[derive(Debug)]
pub struct ConversionError {
    pub message: String,
}

impl ConversionError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl MediaError {
    /// Shorthand for a [`FormatError`].
    pub fn format(message: impl Into<String>) -> Self {
        MediaError::Format(FormatError::new(message))
    }

    /// Shorthand for a [`ConfigurationError`].
    pub fn configuration(message: impl Into<String>) -> Self {
        MediaError::Configuration(ConfigurationError::new(message))
    }

    /// Shorthand for an [`UnsupportedError`].
    pub fn unsupported(message: impl Into<String>) -> Self {
        MediaError::Unsupported(UnsupportedError::new(message))
    }

    /// Shorthand for a [`StreamError`].
    pub fn stream(message: impl Into<String>) -> Self {
        MediaError::Stream(StreamError::new(message))
    }

    /// Shorthand for a [`ConversionError`].
    pub fn conversion(message: impl Into<String>) -> Self {
        MediaError::Conversion(ConversionError::new(message))
    }
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::Other(err) => write!(f, "I/O error: {}", err),
            MediaError::Format(err) => write!(f, "Format error: {}", err),
            MediaError::Configuration(err) => write!(f, "Configuration error: {}", err),
            MediaError::Unsupported(err) => write!(f, "Unsupported: {}", err),
            MediaError::Stream(err) => write!(f, "Stream error: {}", err),
            MediaError::Conversion(err) => write!(f, "Conversion error: {}", err),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for UnsupportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for MediaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MediaError::Other(err) => Some(err),
            _ => None,
        }
    }
}
impl Error for FormatError {}
impl Error for ConfigurationError {}
impl Error for UnsupportedError {}
impl Error for StreamError {}
impl Error for ConversionError {}

impl From<io::Error> for MediaError {
    fn from(err: io::Error) -> Self {
        MediaError::Other(err)
    }
}

impl From<FormatError> for MediaError {
    fn from(err: FormatError) -> Self {
        MediaError::Format(err)
    }
}

impl From<ConfigurationError> for MediaError {
    fn from(err: ConfigurationError) -> Self {
        MediaError::Configuration(err)
    }
}

impl From<UnsupportedError> for MediaError {
    fn from(err: UnsupportedError) -> Self {
        MediaError::Unsupported(err)
    }
}

impl From<StreamError> for MediaError {
    fn from(err: StreamError) -> Self {
        MediaError::Stream(err)
    }
}

impl From<ConversionError> for MediaError {
    fn from(err: ConversionError) -> Self {
        MediaError::Conversion(err)
    }
}

// Byte sources and targets speak io::Error
impl From<MediaError> for io::Error {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Other(err) => err,
            other => io::Error::other(other),
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        io::Error::other(err)
    }
}

pub type MediaResult<T> = Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes_category() {
        let err = MediaError::format("no signature recognized");
        assert_eq!(err.to_string(), "Format error: no signature recognized");
        let err = MediaError::configuration("too many video tracks");
        assert_eq!(err.to_string(), "Configuration error: too many video tracks");
    }

    #[test]
    fn test_io_round_trip_keeps_inner_error() {
        let err: MediaError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::UnexpectedEof);
    }
}
