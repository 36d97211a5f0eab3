use thiserror::Error;

#[derive(Debug, Error)]
pub enum PivotCacheError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml error: {0}")]
    RoXml(#[from] roxmltree::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("utf-8 error in {part}: {source}")]
    Utf8 {
        part: String,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error(
        "pivot cache part is too large to load safely: {part} is {size} bytes (max {max} bytes)"
    )]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("malformed pivot cache part {part}: {reason}")]
    Malformed { part: String, reason: String },
}

impl PivotCacheError {
    pub(crate) fn malformed(part: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            part: part.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error means a cache part exists but its contents could not be understood.
    ///
    /// Container-level failures (unreadable zip, I/O, oversized parts) return `false`.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::Xml(_) | Self::RoXml(_) | Self::Attr(_) | Self::Utf8 { .. } | Self::Malformed { .. }
        )
    }
}
