use serde::Deserialize;
use std::path::PathBuf;

/// Application settings, read from the `[default]`/profile tables of
/// `Rocket.toml` next to Rocket's own keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub posts_per_page: i64,
    /// Seconds the index page stays cached, 0 switches the cache off.
    pub index_cache_ttl: u64,
    pub media_dir: PathBuf,
    pub token_ttl_hours: i64,
    /// Usernames allowed to manage groups and users.
    pub admins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: "yatube.sqlite3".to_string(),
            posts_per_page: 10,
            index_cache_ttl: 20,
            media_dir: PathBuf::from("media"),
            token_ttl_hours: 24,
            admins: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.iter().any(|admin| admin == username)
    }
}
