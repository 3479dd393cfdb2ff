// Consistent exit codes for the pagepatch CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = snapshot or patch store unavailable
//   11 = import payload rejected
//   12 = locator matched nothing

use std::process;

use pagepatch_common::transfer::ImportError;
use pagepatch_engine::session::SessionError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Unavailable = 10,
    ImportRejected = 11,
    NoMatch = 12,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(session_err) = cause.downcast_ref::<SessionError>() {
                return Self::from_session_error(session_err);
            }
            if cause.downcast_ref::<ImportError>().is_some() {
                return Self::ImportRejected;
            }
            if cause.downcast_ref::<NoMatch>().is_some() {
                return Self::NoMatch;
            }
            if cause.downcast_ref::<std::io::Error>().is_some() {
                return Self::Unavailable;
            }
        }
        Self::Error
    }

    pub fn from_session_error(err: &SessionError) -> Self {
        match err {
            SessionError::Scope(_) | SessionError::InvalidEdit(_) => Self::Usage,
            SessionError::Import(_) => Self::ImportRejected,
            SessionError::Storage(_) => Self::Unavailable,
            SessionError::Export(_) => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

/// A selector or locator that found no node in the snapshot.
#[derive(Debug)]
pub struct NoMatch {
    pub query: String,
}

impl std::fmt::Display for NoMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no node matches `{}`", self.query)
    }
}

impl std::error::Error for NoMatch {}

#[cfg(test)]
mod tests {
    use super::*;
    use pagepatch_common::scope::ScopeError;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Error.code(), 1);
        assert_eq!(ExitCode::Usage.code(), 2);
        assert_eq!(ExitCode::Unavailable.code(), 10);
        assert_eq!(ExitCode::ImportRejected.code(), 11);
        assert_eq!(ExitCode::NoMatch.code(), 12);
    }

    #[test]
    fn session_import_error_in_chain() {
        let err = anyhow::Error::new(SessionError::Import(ImportError::PatchesNotAList))
            .context("import failed");
        assert_eq!(ExitCode::from_error(&err), ExitCode::ImportRejected);
    }

    #[test]
    fn bad_address_is_usage() {
        let err = anyhow::Error::new(SessionError::Scope(ScopeError::Empty));
        assert_eq!(ExitCode::from_error(&err), ExitCode::Usage);
    }

    #[test]
    fn no_match_in_chain() {
        let err = anyhow::Error::new(NoMatch { query: "#gone".into() });
        assert_eq!(ExitCode::from_error(&err), ExitCode::NoMatch);
        assert_eq!(err.to_string(), "no node matches `#gone`");
    }

    #[test]
    fn missing_snapshot_is_unavailable() {
        let err = anyhow::Error::new(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(ExitCode::from_error(&err), ExitCode::Unavailable);
    }

    #[test]
    fn generic_is_error() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Error);
    }
}
