use std::path::PathBuf;

/// Resolves the ambient filesystem layout (`AGENTS_DIR`, `VAULTS_DIR`,
/// `DJINN_DATA_PATH`) into typed paths, so call sites never build a path
/// by hand.
#[derive(Debug, Clone)]
pub struct Layout {
    agents_dir: PathBuf,
    vaults_dir: PathBuf,
    data_path: PathBuf,
}

impl Layout {
    pub fn new(agents_dir: PathBuf, vaults_dir: PathBuf, data_path: PathBuf) -> Self {
        Self {
            agents_dir,
            vaults_dir,
            data_path,
        }
    }

    pub fn persona_file(&self, agent_id: &str, name: &str) -> PathBuf {
        self.agents_dir.join(agent_id).join(name)
    }

    pub fn vault_root(&self, agent_id: &str) -> PathBuf {
        self.vaults_dir.join(agent_id)
    }

    pub fn sandbox_root(&self, agent_id: &str) -> PathBuf {
        self.data_path.join("sandboxes").join(agent_id)
    }

    pub fn cookie_file(&self, agent_id: &str, filename: &str) -> PathBuf {
        self.sandbox_root(agent_id).join(filename)
    }

    pub fn pipelines_root(&self) -> PathBuf {
        self.data_path.join("pipelines")
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("store.sqlite3")
    }

    /// The agent roster is just the set of configured agent identities:
    /// one subdirectory per agent under `AGENTS_DIR`.
    pub fn agent_roster(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.agents_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_file_nests_under_the_agent_directory() {
        let layout = Layout::new(PathBuf::from("/agents"), PathBuf::from("/vaults"), PathBuf::from("/data"));
        assert_eq!(layout.persona_file("aurora", "SOUL.md"), PathBuf::from("/agents/aurora/SOUL.md"));
        assert_eq!(layout.vault_root("aurora"), PathBuf::from("/vaults/aurora"));
        assert_eq!(layout.sandbox_root("aurora"), PathBuf::from("/data/sandboxes/aurora"));
        assert_eq!(
            layout.cookie_file("aurora", "session.cookie"),
            PathBuf::from("/data/sandboxes/aurora/session.cookie")
        );
    }
}
