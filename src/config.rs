use std::{
    env, fs,
    path::{Path, PathBuf},
};

use clap::Parser;
use derive_builder::Builder;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_CACHE_SIZE: usize = 5;

#[derive(Builder, Default, Parser)]
#[builder(default, setter(into, strip_option))]
pub struct Args {
    /// Directory holding cdec.ini, sa.ini, weights.final and the aligner
    /// model files.
    pub config_dir: PathBuf,

    /// Optional YAML service config, overridden by the flags below.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Tokenize input and detokenize output.
    #[arg(short, long)]
    pub normalize: bool,

    /// Per-context grammar cache capacity.
    #[arg(long)]
    pub cache_size: Option<usize>,

    /// Parent directory for the scratch root.
    #[arg(long)]
    pub tmp: Option<PathBuf>,

    /// Listen for clients on this TCP port instead of serving stdio.
    #[arg(long)]
    pub port: Option<u16>,
}

impl Args {
    pub fn into_settings(self) -> Result<Settings> {
        let file = match &self.config {
            Some(path) => load_service_config(path)?,
            None => ServiceConfigFile::default(),
        };
        let paths = ConfigPaths::locate(&self.config_dir)?;
        let dir = paths.dir.clone();

        let cache_size = self
            .cache_size
            .or(file.cache_size)
            .unwrap_or(DEFAULT_CACHE_SIZE);
        if cache_size == 0 {
            return Err(Error::Config("cache-size must be at least 1".to_owned()));
        }

        let command = |from_file: Option<Vec<String>>, default: fn() -> Vec<String>| {
            resolve_command(from_file.unwrap_or_else(default), &dir)
        };

        Ok(Settings {
            paths,
            cache_size,
            normalize: self.normalize || file.normalize.unwrap_or(false),
            tmp_root: self.tmp.or(file.tmp).unwrap_or_else(env::temp_dir),
            port: self.port.or(file.port),
            decoder_command: command(file.decoder_command, default_decoder_command),
            extractor_command: command(file.extractor_command, default_extractor_command),
            fast_align_command: command(file.fast_align_command, default_fast_align_command),
            atools_command: command(file.atools_command, default_atools_command),
            tokenizer_command: command(file.tokenizer_command, default_tokenizer_command),
            detokenizer_command: command(file.detokenizer_command, default_detokenizer_command),
        })
    }
}

/// Runtime configuration for the translator, fully resolved.
#[derive(Builder, Clone, Debug)]
#[builder(setter(into), pattern = "owned")]
pub struct Settings {
    pub paths: ConfigPaths,

    #[builder(default = "DEFAULT_CACHE_SIZE")]
    pub cache_size: usize,

    #[builder(default)]
    pub normalize: bool,

    #[builder(default = "env::temp_dir()")]
    pub tmp_root: PathBuf,

    #[builder(default, setter(strip_option))]
    pub port: Option<u16>,

    #[builder(default = "default_decoder_command()")]
    pub decoder_command: Vec<String>,

    #[builder(default = "default_extractor_command()")]
    pub extractor_command: Vec<String>,

    #[builder(default = "default_fast_align_command()")]
    pub fast_align_command: Vec<String>,

    #[builder(default = "default_atools_command()")]
    pub atools_command: Vec<String>,

    #[builder(default = "default_tokenizer_command()")]
    pub tokenizer_command: Vec<String>,

    #[builder(default = "default_detokenizer_command()")]
    pub detokenizer_command: Vec<String>,
}

fn default_decoder_command() -> Vec<String> {
    vec![
        "kbest_cut_mira".to_owned(),
        "-o".to_owned(),
        "2".to_owned(),
        "-C".to_owned(),
        "0.001".to_owned(),
    ]
}

fn default_extractor_command() -> Vec<String> {
    vec!["sa-extract".to_owned(), "--online".to_owned()]
}

fn default_fast_align_command() -> Vec<String> {
    vec!["fast_align".to_owned()]
}

fn default_atools_command() -> Vec<String> {
    vec!["atools".to_owned()]
}

fn default_tokenizer_command() -> Vec<String> {
    vec!["tokenize-anything.sh".to_owned(), "-u".to_owned()]
}

fn default_detokenizer_command() -> Vec<String> {
    vec!["detokenize-anything.sh".to_owned(), "-u".to_owned()]
}

/// Optional YAML service config.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServiceConfigFile {
    pub cache_size: Option<usize>,
    pub normalize: Option<bool>,
    pub tmp: Option<PathBuf>,
    pub port: Option<u16>,
    pub decoder_command: Option<Vec<String>>,
    pub extractor_command: Option<Vec<String>>,
    pub fast_align_command: Option<Vec<String>>,
    pub atools_command: Option<Vec<String>>,
    pub tokenizer_command: Option<Vec<String>>,
    pub detokenizer_command: Option<Vec<String>>,
}

pub fn load_service_config(path: &Path) -> Result<ServiceConfigFile> {
    let contents = fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|source| Error::ServiceConfig {
        path: path.to_owned(),
        source,
    })
}

/// The external model files consumed from the configuration directory.
#[derive(Clone, Debug)]
pub struct ConfigPaths {
    pub dir: PathBuf,
    pub decoder_ini: PathBuf,
    pub extractor_ini: PathBuf,
    pub weights: PathBuf,
    pub fwd_params: PathBuf,
    pub fwd_err: PathBuf,
    pub rev_params: PathBuf,
    pub rev_err: PathBuf,
}

impl ConfigPaths {
    pub fn locate(dir: &Path) -> Result<Self> {
        let dir = dir.canonicalize()?;
        let require = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(Error::MissingConfig(path))
            }
        };
        Ok(Self {
            decoder_ini: require("cdec.ini")?,
            extractor_ini: require("sa.ini")?,
            weights: require("weights.final")?,
            fwd_params: require("a.fwd_params")?,
            fwd_err: require("a.fwd_err")?,
            rev_params: require("a.rev_params")?,
            rev_err: require("a.rev_err")?,
            dir,
        })
    }
}

/// Programs given as relative paths that exist under the configuration
/// directory are absolutized; anything else resolves via PATH.
fn resolve_command(mut command: Vec<String>, config_dir: &Path) -> Vec<String> {
    if let Some(program) = command.first_mut() {
        if !Path::new(program.as_str()).is_absolute() {
            let candidate = config_dir.join(program.as_str());
            if candidate.is_file() {
                *program = candidate.to_string_lossy().into_owned();
            }
        }
    }
    command
}

static HPYPLM_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"-r\s+\S+").unwrap());

/// Mechanically rewrites a `cdec.ini` template for one context: relative
/// paths become absolute against the configuration directory and the HPYPLM
/// feature function reads references from the context's fifo.
pub fn patch_decoder_ini(template: &str, config_dir: &Path, ref_fifo: &Path) -> String {
    template
        .lines()
        .map(|line| patch_decoder_line(line, config_dir, ref_fifo))
        .join("\n")
        + "\n"
}

fn patch_decoder_line(line: &str, config_dir: &Path, ref_fifo: &Path) -> String {
    let Some((key, value)) = line.split_once('=') else {
        return line.to_owned();
    };
    let (key, value) = (key.trim(), value.trim());
    let value = absolutize_tokens(value, config_dir);
    let value = if key == "feature_function" && value.contains("HPYPLM") {
        let fifo = format!("-r {}", ref_fifo.display());
        if HPYPLM_REF.is_match(&value) {
            HPYPLM_REF.replace(&value, fifo.as_str()).into_owned()
        } else {
            format!("{value} {fifo}")
        }
    } else {
        value
    };
    format!("{key}={value}")
}

/// Same rewrite for `sa.ini`, minus the reference pipe.
pub fn patch_extractor_ini(template: &str, config_dir: &Path) -> String {
    template
        .lines()
        .map(|line| match line.split_once('=') {
            Some((key, value)) => format!(
                "{}={}",
                key.trim(),
                absolutize_tokens(value.trim(), config_dir)
            ),
            None => line.to_owned(),
        })
        .join("\n")
        + "\n"
}

fn absolutize_tokens(value: &str, config_dir: &Path) -> String {
    value
        .split_whitespace()
        .map(|token| {
            if Path::new(token).is_absolute() {
                return token.to_owned();
            }
            let candidate = config_dir.join(token);
            if candidate.exists() {
                candidate.to_string_lossy().into_owned()
            } else {
                token.to_owned()
            }
        })
        .join(" ")
}
