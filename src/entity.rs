//! Subject/session entities parsed out of file and directory names.
//!
//! Names are inconsistent across job trees: merged trees use BIDS-style
//! `sub-10001`/`ses-V1` tokens, while multi-site pipeline outputs use bare
//! names such as `NS10001V1`. Both forms resolve to the same [`UnitKey`].
use crate::error::SnapshotError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

/// Visit label. `V1` is the baseline visit, `V3` the follow-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Session {
    V1,
    V3,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Session::V1 => "V1",
            Session::V3 => "V3",
        }
    }

    pub fn is_baseline(&self) -> bool {
        matches!(self, Session::V1)
    }

    /// Protocol name recorded in the sessions table.
    pub fn protocol(&self) -> &'static str {
        match self {
            Session::V1 => "baseline",
            Session::V3 => "follow-up",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Session {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches("ses-") {
            "V1" => Ok(Session::V1),
            "V3" => Ok(Session::V3),
            _ => Err(SnapshotError::MissingEntity {
                entity: "session",
                path: s.into(),
            }),
        }
    }
}

/// The atomic release entity: one subject at one visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitKey {
    pub subject: u32,
    pub session: Session,
}

impl UnitKey {
    pub fn new(subject: u32, session: Session) -> Self {
        Self { subject, session }
    }

    /// Parse both entities from a path; either missing is a config error.
    pub fn from_path(path: &Path) -> Result<Self, SnapshotError> {
        Ok(Self::new(parse_subject(path)?, parse_session(path)?))
    }

    /// `sub-{subject}_ses-{session}`, the flat join name used by reports.
    pub fn join_name(&self) -> String {
        format!("sub-{}_ses-{}", self.subject, self.session)
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join_name())
    }
}

fn subject_prefixed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"sub[-=](\d+)").expect("valid subject regex"))
}

fn subject_bare() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\D)(\d{5})(?:\D|$)").expect("valid subject regex"))
}

fn session_prefixed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ses[-=](V[13])").expect("valid session regex"))
}

fn session_bare() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^A-Za-z])(V[13])(?:\D|$)").expect("valid session regex"))
}

/// Subject ID from the nearest path component carrying one.
///
/// `sub-<digits>` wins over a bare five-digit token; components are scanned
/// from the file name upwards so scratch-directory names never match first.
pub fn parse_subject(path: &Path) -> Result<u32, SnapshotError> {
    find_entity(path, &[subject_prefixed(), subject_bare()])
        .and_then(|raw| raw.parse().ok())
        .filter(|id: &u32| *id > 0)
        .ok_or_else(|| SnapshotError::MissingEntity {
            entity: "subject",
            path: path.to_path_buf(),
        })
}

/// Session label from the nearest path component carrying one.
pub fn parse_session(path: &Path) -> Result<Session, SnapshotError> {
    find_entity(path, &[session_prefixed(), session_bare()])
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| SnapshotError::MissingEntity {
            entity: "session",
            path: path.to_path_buf(),
        })
}

/// Subject ID from free text (e.g. a `filename` column), if any.
pub fn subject_in_text(text: &str) -> Option<u32> {
    [subject_prefixed(), subject_bare()]
        .iter()
        .find_map(|re| re.captures(text).map(|caps| caps[1].to_string()))
        .and_then(|raw| raw.parse().ok())
}

/// Session label from free text, if any.
pub fn session_in_text(text: &str) -> Option<Session> {
    [session_prefixed(), session_bare()]
        .iter()
        .find_map(|re| re.captures(text).map(|caps| caps[1].to_string()))
        .and_then(|raw| raw.parse().ok())
}

fn find_entity(path: &Path, patterns: &[&Regex]) -> Option<String> {
    let components: Vec<String> = path
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect();
    for re in patterns {
        for component in components.iter().rev() {
            if let Some(caps) = re.captures(component) {
                return Some(caps[1].to_string());
            }
        }
    }
    None
}
