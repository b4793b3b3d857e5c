//! Layered daemon configuration.
//!
//! Sources, highest priority last:
//! 1. Built-in defaults
//! 2. `termresultsd.toml` in the working directory (if present)
//! 3. `TERMRESULTSD_*` environment variables

use crate::calc::TieRanking;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "termresultsd.toml";
pub const ENV_PREFIX: &str = "TERMRESULTSD_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    /// Workspace opened at startup, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub exam_code: String,
    pub exam_weight: f64,
    pub report_card_ranking: TieRanking,
    pub pass_mark: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            workspace: None,
            exam_code: "EXAM".to_string(),
            exam_weight: 60.0,
            report_card_ranking: TieRanking::Competition,
            pass_mark: crate::grading::PASS_MARK,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE_NAME))
    }

    pub fn load_from(file: &Path) -> anyhow::Result<Self> {
        let cfg: Config = Self::figment(file).extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn figment(file: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if file.exists() {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["log"]))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.exam_code.trim().is_empty() {
            anyhow::bail!("exam_code must not be empty");
        }
        if !(self.exam_weight.is_finite() && self.exam_weight > 0.0) {
            anyhow::bail!("exam_weight must be > 0 (got {})", self.exam_weight);
        }
        if !(0.0..=100.0).contains(&self.pass_mark) {
            anyhow::bail!("pass_mark must be within 0..=100 (got {})", self.pass_mark);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from(&dir.path().join("missing.toml")).expect("load");
        assert_eq!(cfg.exam_code, "EXAM");
        assert_eq!(cfg.exam_weight, 60.0);
        assert_eq!(cfg.report_card_ranking, TieRanking::Competition);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "report_card_ranking = \"dense\"\nlog_level = \"debug\"\n",
        )
        .expect("write config");
        let cfg = Config::load_from(&path).expect("load");
        assert_eq!(cfg.report_card_ranking, TieRanking::Dense);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn rejects_bad_pass_mark() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "pass_mark = 140\n").expect("write config");
        assert!(Config::load_from(&path).is_err());
    }
}
