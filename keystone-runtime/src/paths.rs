use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";
pub const CACHE_DIR: &str = "cache";
pub const REMOTE_DIR: &str = "remote";

pub fn keystone_root(home: &Path) -> PathBuf {
    home.join(".keystone")
}

pub fn config_path(home: &Path) -> PathBuf {
    keystone_root(home).join(CONFIG_FILE)
}

pub fn cache_dir(home: &Path) -> PathBuf {
    keystone_root(home).join(CACHE_DIR)
}

pub fn remote_dir(home: &Path) -> PathBuf {
    keystone_root(home).join(REMOTE_DIR)
}
