/// Error returned by a protocol handler to the router.
///
/// The router turns every error into exactly one `error` envelope for the
/// sender; only `Authentication` also closes the connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Malformed payload, missing field, unsupported content.
    #[error("{0}")]
    Validation(String),
    /// Bad credential or login timeout. Closes the connection.
    #[error("{0}")]
    Authentication(String),
    /// A frame other than `login` arrived before authentication.
    #[error("authentication required")]
    LoginRequired,
    /// Acting on a resource without the required relationship or role.
    #[error("{0}")]
    Authorization(String),
    /// Duplicate pending request, already friends, already a member.
    #[error("{0}")]
    Conflict(String),
    /// Unknown user, group or request.
    #[error("{0}")]
    NotFound(String),
    /// Collaborator failure. The detail is logged, never sent to the client.
    #[error("internal error, please retry")]
    Store(String),
}

impl RelayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the router must close the connection after reporting.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authentication(_) => "authentication",
            Self::LoginRequired => "login_required",
            Self::Authorization(_) => "authorization",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Store(_) => "store",
        }
    }
}
