use std::path::PathBuf;

/// A pipeline is a named, externally defined sequence of steps (§
/// GLOSSARY); the dispatcher only needs to know whether one exists, not
/// parse its contents.
pub trait PipelineRegistry: Send + Sync {
    fn exists(&self, pipeline_id: &str) -> bool;
}

/// Looks for `{root}/{pipeline_id}.yaml` (or `.yml`/`.json`), matching the
/// on-disk pipeline definitions the dispatcher validates against per §4.3.
pub struct FsPipelineRegistry {
    root: PathBuf,
}

impl FsPipelineRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PipelineRegistry for FsPipelineRegistry {
    fn exists(&self, pipeline_id: &str) -> bool {
        ["yaml", "yml", "json"]
            .iter()
            .any(|ext| self.root.join(format!("{pipeline_id}.{ext}")).is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_means_no_pipeline_exists() {
        let registry = FsPipelineRegistry::new("/nonexistent/path/for/tests");
        assert!(!registry.exists("code-review"));
    }

    #[test]
    fn a_file_with_a_recognized_extension_counts_as_existing() {
        let dir = std::env::temp_dir().join(format!("djinnbot-pipeline-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("code-review.yaml"), "steps: []").unwrap();

        let registry = FsPipelineRegistry::new(&dir);
        assert!(registry.exists("code-review"));
        assert!(!registry.exists("no-such-pipeline"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
