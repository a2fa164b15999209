//! Validation verdicts shared by the abuse guard checks

use crate::error::{Error, Result};

/// Why a request was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Client identity is in the blocked set
    Blocked,
    /// Client crossed the lookup-failure threshold on this call
    TooManyFailures { failures: u32 },
    /// Content longer than the configured ceiling
    TooLarge { size: usize, max: usize },
    /// Content matched a deny rule
    DeniedPattern(String),
    /// File extension is on the denylist
    DeniedExtension(String),
    /// Upload carried no file name
    EmptyFileName,
    /// Upload carried no body
    EmptyFile,
}

impl Rejection {
    /// Short stable label, used as a metrics dimension
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::Blocked => "blocked",
            Rejection::TooManyFailures { .. } => "too_many_failures",
            Rejection::TooLarge { .. } => "too_large",
            Rejection::DeniedPattern(_) => "denied_pattern",
            Rejection::DeniedExtension(_) => "denied_extension",
            Rejection::EmptyFileName => "empty_file_name",
            Rejection::EmptyFile => "empty_file",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Blocked => write!(f, "client is blocked"),
            Rejection::TooManyFailures { failures } => {
                write!(f, "too many failed requests ({})", failures)
            }
            Rejection::TooLarge { size, max } => {
                write!(f, "content too large ({} bytes, max {})", size, max)
            }
            Rejection::DeniedPattern(pattern) => {
                write!(f, "content contains forbidden pattern {:?}", pattern)
            }
            Rejection::DeniedExtension(ext) => write!(f, "file type .{} is not allowed", ext),
            Rejection::EmptyFileName => write!(f, "file name is empty"),
            Rejection::EmptyFile => write!(f, "no file uploaded"),
        }
    }
}

/// Result of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Verdict {
    Pass,
    Reject(Rejection),
}

impl Verdict {
    #[inline]
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    /// Convert into the crate error taxonomy
    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Pass => Ok(()),
            Verdict::Reject(Rejection::Blocked) | Verdict::Reject(Rejection::TooManyFailures { .. }) => {
                Err(Error::Blocked)
            }
            Verdict::Reject(reason) => Err(Error::ValidationRejected(reason)),
        }
    }
}
