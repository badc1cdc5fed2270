use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identity-provider credentials. `Debug` never prints the secrets.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Base32 TOTP seed.
    pub totp_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("totp_secret", &"<redacted>")
            .finish()
    }
}

/// One row of the LMS course roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseUser {
    pub user_id: u64,
    pub name: String,
    pub unikey: String,
    pub student_number: String,
    #[serde(with = "semicolon_list")]
    pub sections: Vec<String>,
    #[serde(with = "semicolon_list")]
    pub roles: Vec<String>,
    pub profile_url: String,
    pub inactive: bool,
}

impl CourseUser {
    pub fn is_student(&self) -> bool {
        self.roles.iter().all(|role| role == "Student")
    }

    pub fn is_active(&self) -> bool {
        !self.inactive
    }
}

/// List columns are stored as a single `;`-joined CSV cell.
mod semicolon_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[String], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&values.join(";"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        Ok(raw.split(';').map(|s| s.to_string()).collect())
    }
}

/// A row of the lecture-capture recording list.
///
/// The UI exposes no stable identifier, so `position` (indices from the root)
/// locates the row and `name` is the dedup key. Two recordings with the same
/// title are treated as one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingNode {
    pub name: String,
    pub position: Vec<usize>,
}

/// A recording whose analytics CSV was saved during this walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub name: String,
    pub path: PathBuf,
}
