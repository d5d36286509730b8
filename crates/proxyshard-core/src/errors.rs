//! Error types for the proxyshard core library.

use quick_xml::events::attributes::AttrError;

/// Top-level error enum for the proxyshard core library.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing reference: {0}")]
    MissingReference(String),

    #[error("Split error: {0}")]
    Split(String),

    #[error("Sharding error: {0}")]
    Sharding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    XmlAttr(#[from] AttrError),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Directory walk error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ShardError {
    /// Whether retrying the same task could plausibly succeed.
    ///
    /// Filesystem contention while copying or zipping a bundle is transient;
    /// a malformed document or a dangling policy reference is not.
    pub fn is_transient(&self) -> bool {
        match self {
            ShardError::Io(_) | ShardError::WalkDir(_) => true,
            ShardError::Zip(err) => matches!(err, zip::result::ZipError::Io(_)),
            _ => false,
        }
    }
}

pub type ShardResult<T> = Result<T, ShardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_transient() {
        let err = ShardError::from(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "locked",
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_errors_are_permanent() {
        assert!(!ShardError::Parse("bad root".into()).is_transient());
        assert!(!ShardError::MissingReference("policy".into()).is_transient());
        assert!(!ShardError::Config("zero".into()).is_transient());
    }
}
