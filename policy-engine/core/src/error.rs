use http::StatusCode;

/// Why a request could not be routed to an upstream.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no route matched the request for {host}")]
    NotFound { host: String },

    #[error("{host} is not in the service registry")]
    BlackHole { host: String },

    #[error("no healthy upstream for {host}")]
    NoHealthyUpstream { host: String },

    #[error("too many requests in flight to {destination}")]
    Overflow { destination: String },
}

// === impl RouteError ===

impl RouteError {
    /// The HTTP status returned to a client whose request failed to route.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BlackHole { .. } => StatusCode::BAD_GATEWAY,
            Self::NoHealthyUpstream { .. } | Self::Overflow { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// A short, stable identifier for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::BlackHole { .. } => "black_hole",
            Self::NoHealthyUpstream { .. } => "no_healthy_upstream",
            Self::Overflow { .. } => "overflow",
        }
    }
}
