use std::{fmt, str::FromStr, sync::Arc};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    decoder::ContextDecoder,
    error::Error,
    grammar::GrammarCache,
    sync::OrderedMutex,
};

/// One aligned training pair as it appears in a context's history and in
/// save files: `source ||| target ||| alignment`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainingInstance {
    pub source: String,
    pub target: String,
    pub alignment: String,
}

static ALIGNMENT_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+-\d+$").unwrap());

impl fmt::Display for TrainingInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ||| {} ||| {}", self.source, self.target, self.alignment)
    }
}

impl FromStr for TrainingInstance {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = line.split("|||").map(str::trim).collect();
        let [source, target, alignment] = fields.as_slice() else {
            return Err(Error::MalformedState(line.to_owned()));
        };
        if source.is_empty() || target.is_empty() {
            return Err(Error::MalformedState(line.to_owned()));
        }
        if !alignment
            .split_whitespace()
            .all(|link| ALIGNMENT_LINK.is_match(link))
        {
            return Err(Error::MalformedState(line.to_owned()));
        }
        Ok(Self {
            source: (*source).to_owned(),
            target: (*target).to_owned(),
            alignment: (*alignment).to_owned(),
        })
    }
}

/// Live state of one adaptive translation session.
pub(crate) struct ContextState {
    pub name: String,
    pub history: Vec<TrainingInstance>,
    pub grammars: GrammarCache,
    pub decoder: ContextDecoder,
}

/// What a context's ordered mutex actually guards. `state` is `None` until
/// lazy initialization completes; `detached` marks a slot whose registry
/// entry has been dropped, telling late waiters to retry the lookup.
#[derive(Default)]
pub(crate) struct ContextSlot {
    pub state: Option<ContextState>,
    pub detached: bool,
}

pub(crate) type ContextCell = OrderedMutex<ContextSlot>;

/// name → context slot. Registry mutation is pointer-level; all real work
/// happens under the per-context ordered mutexes.
pub(crate) type Registry = DashMap<String, Arc<ContextCell>>;
