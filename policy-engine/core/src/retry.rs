use anyhow::{bail, Result};
use http::StatusCode;
use std::{fmt, time::Duration};

/// Describes when and how often a failed request is retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The number of retries allowed after the initial attempt. Zero disables retries.
    pub attempts: u32,

    /// Bounds each attempt independently of the route's overall timeout.
    pub per_try_timeout: Option<Duration>,

    pub conditions: Vec<RetryCondition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RetryCondition {
    /// Any 5xx response, or no response at all.
    ServerError,

    /// A 502, 503 or 504 response.
    GatewayError,
    ConnectFailure,
    RefusedStream,

    /// The upstream reset the stream or did not respond in time.
    Reset,

    /// A 409 response.
    Retriable4xx,

    /// A response whose status falls in an inclusive range.
    Status { min: u16, max: u16 },

    /// A gRPC status code.
    Grpc(u32),
}

/// The result of a single upstream attempt, as far as retries and outlier detection care.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UpstreamOutcome {
    Status(StatusCode),
    Grpc(u32),
    ConnectFailure,
    RefusedStream,
    Reset,
    Timeout,
}

pub mod grpc {
    pub const CANCELLED: u32 = 1;
    pub const DEADLINE_EXCEEDED: u32 = 4;
    pub const RESOURCE_EXHAUSTED: u32 = 8;
    pub const INTERNAL: u32 = 13;
    pub const UNAVAILABLE: u32 = 14;

    const NAMES: [&str; 17] = [
        "OK",
        "CANCELLED",
        "UNKNOWN",
        "INVALID_ARGUMENT",
        "DEADLINE_EXCEEDED",
        "NOT_FOUND",
        "ALREADY_EXISTS",
        "PERMISSION_DENIED",
        "RESOURCE_EXHAUSTED",
        "FAILED_PRECONDITION",
        "ABORTED",
        "OUT_OF_RANGE",
        "UNIMPLEMENTED",
        "INTERNAL",
        "UNAVAILABLE",
        "DATA_LOSS",
        "UNAUTHENTICATED",
    ];

    /// Parses a gRPC status given either by its canonical name or by number.
    pub fn parse_code(s: &str) -> Option<u32> {
        if let Ok(code) = s.parse::<u32>() {
            return (code < NAMES.len() as u32).then_some(code);
        }
        NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(s))
            .map(|code| code as u32)
    }
}

// === impl RetryPolicy ===

impl RetryPolicy {
    pub const DEFAULT_ATTEMPTS: u32 = 2;

    pub fn disabled() -> Self {
        Self {
            attempts: 0,
            per_try_timeout: None,
            conditions: vec![],
        }
    }

    /// The conditions retried when a route does not configure any.
    pub fn default_conditions() -> Vec<RetryCondition> {
        vec![
            RetryCondition::ConnectFailure,
            RetryCondition::RefusedStream,
            RetryCondition::Grpc(grpc::UNAVAILABLE),
            RetryCondition::Grpc(grpc::CANCELLED),
            RetryCondition::Status { min: 503, max: 503 },
        ]
    }

    /// Parses a comma-separated `retryOn` value.
    ///
    /// `retriable-status-codes` refers to the numeric codes listed alongside it and falls back to
    /// 503 when none are listed.
    pub fn parse_conditions(retry_on: &str) -> Result<Vec<RetryCondition>> {
        fn to_code(s: &str) -> Option<u16> {
            let code = s.parse::<u16>().ok()?;
            (100..600).contains(&code).then_some(code)
        }

        let mut conditions = Vec::new();
        let mut retriable_status_codes = false;
        for cond in retry_on.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let condition = match cond.to_ascii_lowercase().as_str() {
                "5xx" => RetryCondition::ServerError,
                "gateway-error" => RetryCondition::GatewayError,
                "connect-failure" => RetryCondition::ConnectFailure,
                "refused-stream" => RetryCondition::RefusedStream,
                "reset" => RetryCondition::Reset,
                "retriable-4xx" => RetryCondition::Retriable4xx,
                "retriable-status-codes" => {
                    retriable_status_codes = true;
                    continue;
                }
                "cancelled" => RetryCondition::Grpc(grpc::CANCELLED),
                "deadline-exceeded" => RetryCondition::Grpc(grpc::DEADLINE_EXCEEDED),
                "internal" => RetryCondition::Grpc(grpc::INTERNAL),
                "resource-exhausted" => RetryCondition::Grpc(grpc::RESOURCE_EXHAUSTED),
                "unavailable" => RetryCondition::Grpc(grpc::UNAVAILABLE),
                _ => {
                    if let Some(code) = to_code(cond) {
                        RetryCondition::Status {
                            min: code,
                            max: code,
                        }
                    } else if let Some((min, max)) = cond
                        .split_once('-')
                        .and_then(|(s, e)| Some((to_code(s)?, to_code(e)?)))
                        .filter(|(s, e)| s <= e)
                    {
                        RetryCondition::Status { min, max }
                    } else {
                        bail!("invalid retry condition: {cond}");
                    }
                }
            };
            if !conditions.contains(&condition) {
                conditions.push(condition);
            }
        }

        if retriable_status_codes
            && !conditions
                .iter()
                .any(|c| matches!(c, RetryCondition::Status { .. }))
        {
            conditions.push(RetryCondition::Status { min: 503, max: 503 });
        }

        Ok(conditions)
    }

    /// Returns true if an attempt that ended with `outcome` may be retried under this policy.
    /// This does not consider the remaining attempt budget.
    pub fn is_retryable(&self, outcome: &UpstreamOutcome) -> bool {
        self.conditions.iter().any(|c| c.matches(outcome))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: Self::DEFAULT_ATTEMPTS,
            per_try_timeout: None,
            conditions: Self::default_conditions(),
        }
    }
}

// === impl RetryCondition ===

impl RetryCondition {
    pub fn matches(&self, outcome: &UpstreamOutcome) -> bool {
        use UpstreamOutcome as O;

        match (self, outcome) {
            (Self::ServerError, O::Status(s)) => s.is_server_error(),
            (Self::ServerError, O::ConnectFailure | O::RefusedStream | O::Reset | O::Timeout) => {
                true
            }
            (Self::GatewayError, O::Status(s)) => (502..=504).contains(&s.as_u16()),
            // A timed out attempt is answered with a 504.
            (Self::GatewayError, O::Timeout) => true,
            (Self::ConnectFailure, O::ConnectFailure) => true,
            (Self::RefusedStream, O::RefusedStream) => true,
            (Self::Reset, O::Reset | O::Timeout) => true,
            (Self::Retriable4xx, O::Status(s)) => *s == StatusCode::CONFLICT,
            (Self::Status { min, max }, O::Status(s)) => (*min..=*max).contains(&s.as_u16()),
            (Self::Grpc(code), O::Grpc(c)) => code == c,
            _ => false,
        }
    }
}

impl fmt::Display for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerError => f.write_str("5xx"),
            Self::GatewayError => f.write_str("gateway-error"),
            Self::ConnectFailure => f.write_str("connect-failure"),
            Self::RefusedStream => f.write_str("refused-stream"),
            Self::Reset => f.write_str("reset"),
            Self::Retriable4xx => f.write_str("retriable-4xx"),
            Self::Status { min, max } if min == max => write!(f, "{}", min),
            Self::Status { min, max } => write!(f, "{}-{}", min, max),
            Self::Grpc(code) => write!(f, "grpc-{}", code),
        }
    }
}

// === impl UpstreamOutcome ===

impl UpstreamOutcome {
    /// Failures that happen before a response is received. These count as both 5xx and
    /// gateway errors for outlier detection.
    pub fn is_local_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailure | Self::RefusedStream | Self::Reset | Self::Timeout
        )
    }

    pub fn is_server_error(&self) -> bool {
        match self {
            Self::Status(s) => s.is_server_error(),
            _ => self.is_local_failure(),
        }
    }

    pub fn is_gateway_error(&self) -> bool {
        match self {
            Self::Status(s) => (502..=504).contains(&s.as_u16()),
            _ => self.is_local_failure(),
        }
    }
}

impl fmt::Display for UpstreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(s) => write!(f, "{}", s.as_u16()),
            Self::Grpc(code) => write!(f, "grpc-{}", code),
            Self::ConnectFailure => f.write_str("connect-failure"),
            Self::RefusedStream => f.write_str("refused-stream"),
            Self::Reset => f.write_str("reset"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

impl std::str::FromStr for UpstreamOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connect-failure" => return Ok(Self::ConnectFailure),
            "refused-stream" => return Ok(Self::RefusedStream),
            "reset" => return Ok(Self::Reset),
            "timeout" => return Ok(Self::Timeout),
            _ => {}
        }
        if let Some(code) = s.strip_prefix("grpc-") {
            match grpc::parse_code(code) {
                Some(code) => return Ok(Self::Grpc(code)),
                None => bail!("invalid gRPC status: {code}"),
            }
        }
        let status = s
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok());
        match status {
            Some(status) => Ok(Self::Status(status)),
            None => bail!("invalid upstream outcome: {s}"),
        }
    }
}
