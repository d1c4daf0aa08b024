//! Team roles and routing targets

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Terminal sentinel as written by the supervisor model
pub const FINISH: &str = "FINISH";

/// A team member role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    DatabaseExpert,
    PythonExpert,
    DataSummarizer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::DatabaseExpert, Role::PythonExpert, Role::DataSummarizer];

    /// Name used in prompts, tags and routing decisions
    pub fn name(&self) -> &'static str {
        match self {
            Role::DatabaseExpert => "DatabaseExpert",
            Role::PythonExpert => "PythonExpert",
            Role::DataSummarizer => "DataSummarizer",
        }
    }

    /// Whether this role answers from domain tools rather than summarizing
    pub fn is_domain_expert(&self) -> bool {
        !matches!(self, Role::DataSummarizer)
    }

    /// Attribution tag prefixed to this role's transcript entries
    pub fn tag(&self) -> String {
        format!("[{}]", self.name())
    }

    /// Prefix `content` with this role's tag
    pub fn tagged(&self, content: &str) -> String {
        format!("{} {}", self.tag(), content)
    }

}

/// Remove every leading role tag, whichever role it names.
///
/// Models see tagged transcript entries and sometimes echo the tags back,
/// so a reply may start with its own tag or another role's, possibly repeated.
pub fn strip_role_tags(content: &str) -> &str {
    let mut rest = content.trim_start();
    loop {
        let stripped = Role::ALL.iter().find_map(|role| {
            rest.strip_prefix('[')
                .and_then(|r| r.strip_prefix(role.name()))
                .and_then(|r| r.strip_prefix(']'))
        });
        match stripped {
            Some(r) => rest = r.trim_start(),
            None => return rest,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a string names no known role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown role: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Role::ALL
            .into_iter()
            .find(|role| role.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// Where the graph goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Supervisor,
    Member(Role),
    Finish,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Supervisor => f.write_str("supervisor"),
            Route::Member(role) => f.write_str(role.name()),
            Route::Finish => f.write_str(FINISH),
        }
    }
}
