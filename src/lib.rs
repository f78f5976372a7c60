mod aligner;
mod cli;
mod command;
mod config;
mod context;
mod decoder;
mod error;
mod extractor;
mod fifo;
mod grammar;
mod process;
mod service;
mod sync;
mod translator;

pub use aligner::ForceAligner;
pub use cli::bootstrap_cli;
pub use command::{parse as parse_command, Command, ParseError, Request};
pub use config::{
    load_service_config, patch_decoder_ini, patch_extractor_ini, Args, ArgsBuilder, ConfigPaths,
    ServiceConfigFile, Settings, SettingsBuilder, DEFAULT_CACHE_SIZE,
};
pub use context::TrainingInstance;
pub use decoder::ContextDecoder;
pub use error::{Error, Result};
pub use extractor::GrammarExtractor;
pub use fifo::RefPipe;
pub use grammar::GrammarCache;
pub use process::ProcessPipe;
pub use service::{run_stdio, run_tcp};
pub use sync::{OrderedMutex, OrderedMutexGuard};
pub use translator::{Translator, DEFAULT_CONTEXT};
