use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".outreach"))
            .unwrap_or_else(|| PathBuf::from(".outreach"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Directory holding heal-state checkpoint files.
    pub fn heal_state_dir(&self) -> PathBuf {
        self.base.join("heal-state")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.base.join("keys")
    }

    /// X25519 secret key used to seal/open checkpoint credentials.
    pub fn sealbox_key_file(&self) -> PathBuf {
        self.keys_dir().join("sealbox.key")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.heal_state_dir())?;
        std::fs::create_dir_all(self.keys_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
