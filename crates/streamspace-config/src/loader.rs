use crate::{Config, ConfigError};
use std::path::{Path, PathBuf};

/// Builder for loading [`Config`] from the precedence chain documented on
/// the module root. Mirrors `kimberlite-config::ConfigLoader`'s shape.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "STREAMSPACE".to_string(),
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let defaults_source = config::Config::try_from(&defaults)?;

        let project_toml = self.project_dir.join("streamspace.toml");
        let local_toml = self.project_dir.join("streamspace.local.toml");

        let builder = config::Config::builder()
            .add_source(defaults_source)
            .add_source(config::File::from(project_toml).required(false))
            .add_source(config::File::from(local_toml).required(false))
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            );

        let merged = builder.build()?;
        let config: Config = merged.try_deserialize()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_with_no_files_present() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigLoader::new().with_project_dir(dir.path()).load().unwrap();
        assert_eq!(cfg.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn project_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("streamspace.toml")).unwrap();
        writeln!(f, "bind_address = \"127.0.0.1:9000\"").unwrap();
        let cfg = ConfigLoader::new().with_project_dir(dir.path()).load().unwrap();
        assert_eq!(cfg.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn env_overrides_project_toml() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("streamspace.toml")).unwrap();
        writeln!(f, "bind_address = \"127.0.0.1:9000\"").unwrap();
        std::env::set_var("STREAMSPACE_TEST_BIND_ADDRESS", "unused");
        std::env::set_var("STREAMSPACETEST2_BIND_ADDRESS", "1.2.3.4:1");
        let cfg = ConfigLoader::new()
            .with_project_dir(dir.path())
            .with_env_prefix("STREAMSPACETEST2")
            .load()
            .unwrap();
        assert_eq!(cfg.bind_address, "1.2.3.4:1");
        std::env::remove_var("STREAMSPACE_TEST_BIND_ADDRESS");
        std::env::remove_var("STREAMSPACETEST2_BIND_ADDRESS");
    }
}
