use thiserror::Error;

/// Failures on the exec path. Every variant reaches the client as a line on
/// the channel's stderr followed by a non-zero exit status.
#[derive(Debug, Error)]
pub enum GitSshError {
    #[error("{0}")]
    BadRequest(String),
    #[error("invalid repository path: {0}")]
    Forbidden(String),
    #[error("repository not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl GitSshError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        GitSshError::Internal(err.to_string())
    }

    /// Exit status reported over the channel. Clients only ever see 0 or 1.
    pub fn exit_status(&self) -> u32 {
        match self {
            GitSshError::BadRequest(_)
            | GitSshError::Forbidden(_)
            | GitSshError::NotFound(_)
            | GitSshError::Internal(_) => 1,
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GitSshError::BadRequest(_) => "bad_request",
            GitSshError::Forbidden(_) => "forbidden",
            GitSshError::NotFound(_) => "not_found",
            GitSshError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_failure_status() {
        let errors = [
            GitSshError::BadRequest("x".into()),
            GitSshError::Forbidden("x".into()),
            GitSshError::NotFound("x".into()),
            GitSshError::Internal("x".into()),
        ];
        for err in errors {
            assert_eq!(err.exit_status(), 1, "{}", err.kind());
        }
    }

    #[test]
    fn display_carries_the_offending_path() {
        let err = GitSshError::Forbidden("../../etc".into());
        assert_eq!(err.to_string(), "invalid repository path: ../../etc");

        let err = GitSshError::NotFound("demo.git".into());
        assert_eq!(err.to_string(), "repository not found: demo.git");
    }
}
