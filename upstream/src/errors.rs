use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("HTTP client error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid json response: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("could not decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("fetch task failed: {0}")]
    TaskFailed(String),
}

/// The upstream call a fetch failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Page,
    TeamMembers,
    Campaign,
    ExerciseLogs,
    Donations,
    DonationsUpTo,
    ProfilesSince,
    UpdatePage,
}

impl RequestKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Page => "page",
            RequestKind::TeamMembers => "team_members",
            RequestKind::Campaign => "campaign",
            RequestKind::ExerciseLogs => "exercise_logs",
            RequestKind::Donations => "donations",
            RequestKind::DonationsUpTo => "donations_up_to",
            RequestKind::ProfilesSince => "profiles_since",
            RequestKind::UpdatePage => "update_page",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed branch of a fan-out.
#[derive(thiserror::Error, Debug)]
#[error("{kind} {id}: {source}")]
pub struct FetchError {
    pub kind: RequestKind,
    pub id: String,
    #[source]
    pub source: UpstreamError,
}

impl FetchError {
    pub fn new(kind: RequestKind, id: impl Into<String>, source: UpstreamError) -> Self {
        FetchError {
            kind,
            id: id.into(),
            source,
        }
    }
}

/// Every failure of one logical fetch, along with whatever data the
/// successful branches produced.
#[derive(Debug)]
pub struct FanOutError<T> {
    pub partial: T,
    pub errors: Vec<FetchError>,
}

impl<T> FanOutError<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FanOutError<U> {
        FanOutError {
            partial: f(self.partial),
            errors: self.errors,
        }
    }
}

impl<T> fmt::Display for FanOutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} upstream request(s) failed", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{error}")?;
        }
        Ok(())
    }
}

impl<T: fmt::Debug> std::error::Error for FanOutError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{which} page is missing an owner")]
pub struct MissingOwner {
    pub which: &'static str,
}
