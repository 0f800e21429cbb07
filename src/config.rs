use std::path::PathBuf;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 300;
pub const DEFAULT_ALERT_KEYWORDS: [&str; 3] = ["python", "backend developer", "data engineer"];

/// Runtime settings. Passed explicitly to whatever needs them; nothing reads
/// the environment after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub user_first_name: Option<String>,
    pub user_last_name: Option<String>,
    pub email_address: Option<String>,
    pub debug: bool,
    pub database_path: PathBuf,
    pub batch_size: usize,
    pub claim_lease_secs: u64,
    pub alert_keywords: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_first_name: None,
            user_last_name: None,
            email_address: None,
            debug: false,
            database_path: default_database_path(),
            batch_size: DEFAULT_BATCH_SIZE,
            claim_lease_secs: DEFAULT_CLAIM_LEASE_SECS,
            alert_keywords: DEFAULT_ALERT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests never touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            user_first_name: get("JOBTRACKR_USER_FIRST_NAME"),
            user_last_name: get("JOBTRACKR_USER_LAST_NAME"),
            email_address: get("JOBTRACKR_EMAIL_ADDRESS"),
            debug: get("JOBTRACKR_DEBUG")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.debug),
            database_path: get("JOBTRACKR_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            batch_size: get("JOBTRACKR_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.batch_size),
            claim_lease_secs: get("JOBTRACKR_CLAIM_LEASE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.claim_lease_secs),
            alert_keywords: get("JOBTRACKR_ALERT_KEYWORDS")
                .map(|v| parse_keywords(&v))
                .unwrap_or(defaults.alert_keywords),
        }
    }
}

fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn default_database_path() -> PathBuf {
    // XDG data directory, or the working directory when there is no home
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrackr") {
        proj_dirs.data_dir().join("jobtrackr.db")
    } else {
        PathBuf::from("jobtrackr.db")
    }
}
