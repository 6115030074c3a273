use std::{env, io::ErrorKind, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use directories_next::BaseDirs;
use log::debug;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tokio::fs;

use crate::repo::{DecodeOptions, SizeAccounting};

pub struct EnvCfg {
    pub carscope_cfg_dir: PathBuf,
    pub carscope_cfg_file: PathBuf,
}

fn init_env_cfg() -> EnvCfg {
    let carscope_cfg_dir = env::var("CARSCOPE_CFG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| match BaseDirs::new() {
            Some(base_dirs) => base_dirs.config_dir().join("carscope"),
            None => PathBuf::from(".carscope"),
        });

    let carscope_cfg_file = carscope_cfg_dir.join("cfg.toml");

    EnvCfg {
        carscope_cfg_dir,
        carscope_cfg_file,
    }
}

pub static ENV_CFG: Lazy<EnvCfg> = Lazy::new(init_env_cfg);

#[derive(Deserialize, Default)]
struct SysCfgFile {
    size_accounting: Option<SizeAccounting>,
    verify_blocks: Option<bool>,
    tree_depth: Option<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SysCfg {
    pub size_accounting: SizeAccounting,
    pub verify_blocks: bool,
    /// Levels shown by the tree view, 0 for all of them
    pub tree_depth: usize,
}

impl SysCfg {
    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            size_accounting: self.size_accounting,
            verify_blocks: self.verify_blocks,
        }
    }
}

pub fn parse_cfg(contents: &str) -> Result<SysCfg> {
    let sys_cfg: SysCfgFile = toml::from_str(contents)?;

    Ok(SysCfg {
        size_accounting: sys_cfg.size_accounting.unwrap_or_default(),
        verify_blocks: sys_cfg.verify_blocks.unwrap_or(false),
        tree_depth: sys_cfg.tree_depth.unwrap_or(0),
    })
}

/// Reads a config file. A missing file gives the defaults.
pub async fn get_cfg_from(path: &Path) -> Result<SysCfg> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("No config at {}, using defaults", path.display());
            return Ok(SysCfg::default());
        }
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };

    parse_cfg(&contents).with_context(|| format!("parsing {}", path.display()))
}

pub async fn get_cfg() -> Result<SysCfg> {
    get_cfg_from(&ENV_CFG.carscope_cfg_file).await
}
