use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Instant,
};

use itertools::Itertools;
use tempfile::TempDir;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    aligner::ForceAligner,
    command::{self, Command, Request},
    config::{patch_extractor_ini, Settings},
    context::{ContextCell, ContextSlot, ContextState, Registry, TrainingInstance},
    decoder::ContextDecoder,
    error::{Error, Result},
    extractor::GrammarExtractor,
    grammar::GrammarCache,
    process::ProcessPipe,
    sync::OrderedMutex,
};

pub const DEFAULT_CONTEXT: &str = "default";

/// Sentinel decoded during state replay; its only job is to make the
/// decoder consume the previously queued reference.
const LIKELY_OOV: &str = "(OOV)";

pub(crate) const STATE_EOF: &str = "EOF";

/// The public façade: binds the shared worker subsystems and the context
/// registry, dispatches parsed commands, and enforces the concurrency and
/// lifecycle rules. All per-context operations are FIFO-ordered through the
/// context's ordered mutex; the shared extractor and the tokenizer pipes
/// each serialize through their own.
pub struct Translator {
    settings: Settings,
    tmp: Mutex<Option<TempDir>>,
    tmp_path: PathBuf,
    extractor: OrderedMutex<GrammarExtractor>,
    aligner: ForceAligner,
    tokenizer: Option<OrderedMutex<ProcessPipe>>,
    detokenizer: Option<OrderedMutex<ProcessPipe>>,
    contexts: Registry,
}

impl Translator {
    pub fn new(settings: Settings) -> Result<Self> {
        if settings.cache_size == 0 {
            return Err(Error::Config("cache-size must be at least 1".to_owned()));
        }
        fs::create_dir_all(&settings.tmp_root)?;
        let tmp = tempfile::Builder::new()
            .prefix("realtime.")
            .tempdir_in(&settings.tmp_root)?;
        let tmp_path = tmp.path().to_owned();
        info!(tmp = %tmp_path.display(), "scratch root ready");

        let sa_template = fs::read_to_string(&settings.paths.extractor_ini)?;
        let sa_ini = tmp_path.join("sa.ini");
        fs::write(&sa_ini, patch_extractor_ini(&sa_template, &settings.paths.dir))?;

        let extractor = GrammarExtractor::start(&settings.extractor_command, &sa_ini)?;
        let aligner = ForceAligner::start(&settings)?;
        let (tokenizer, detokenizer) = if settings.normalize {
            (
                Some(OrderedMutex::new(ProcessPipe::spawn(
                    &settings.tokenizer_command,
                )?)),
                Some(OrderedMutex::new(ProcessPipe::spawn(
                    &settings.detokenizer_command,
                )?)),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            settings,
            tmp: Mutex::new(Some(tmp)),
            tmp_path,
            extractor: OrderedMutex::new(extractor),
            aligner,
            tokenizer,
            detokenizer,
            contexts: Registry::default(),
        })
    }

    /// The scratch root all per-context temp directories live under.
    pub fn scratch_dir(&self) -> &Path {
        &self.tmp_path
    }

    /// Parses and runs one protocol line. Client errors and operation
    /// failures are logged; the caller only sees output when the command
    /// produces a response. `input` supplies the state block for a LOAD
    /// without a filename.
    pub fn command_line(&self, line: &str, input: &mut dyn BufRead) -> Option<String> {
        let request = match command::parse(line) {
            Ok(request) => request,
            Err(err) => {
                error!(line, error = %err, "bad command");
                return None;
            }
        };
        match self.execute(&request, input) {
            Ok(response) => response,
            Err(err) => {
                error!(line, error = %err, "command failed");
                None
            }
        }
    }

    pub fn execute(&self, request: &Request, input: &mut dyn BufRead) -> Result<Option<String>> {
        let ctx = request.ctx.as_deref().unwrap_or(DEFAULT_CONTEXT);
        match &request.command {
            Command::Translate { sentence } => self.translate(sentence, ctx).map(Some),
            Command::Learn { source, target } => self.learn(source, target, ctx).map(|()| None),
            Command::Save { path } => self.save(path.as_deref(), ctx),
            Command::Load { path: Some(path) } => self.load_path(path, ctx).map(|()| None),
            Command::Load { path: None } => self.load_from(input, ctx).map(|()| None),
            Command::Drop => self.drop_context(ctx, false).map(|()| None),
            Command::List => Ok(Some(self.list())),
        }
    }

    #[instrument(skip(self))]
    pub fn translate(&self, sentence: &str, ctx: &str) -> Result<String> {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            return Ok(String::new());
        }
        let start = Instant::now();
        self.with_context(ctx, |state| {
            let source = if self.settings.normalize {
                self.tokenize(sentence)?
            } else {
                sentence.to_owned()
            };
            let grammar = self.fetch_grammar(state, &source)?;
            let hypothesis = state.decoder.decode(&source, Some(&grammar))?;
            // No reference: the adaptive LM must not learn from this decode.
            state.decoder.push_reference("")?;
            let hypothesis = if self.settings.normalize {
                self.detokenize(&hypothesis)?
            } else {
                hypothesis
            };
            info!(
                ctx = state.name.as_str(),
                seconds = start.elapsed().as_secs_f32(),
                "translated"
            );
            Ok(hypothesis)
        })
    }

    #[instrument(skip(self))]
    pub fn learn(&self, source: &str, target: &str, ctx: &str) -> Result<()> {
        let (source, target) = (source.trim(), target.trim());
        if source.is_empty() || target.is_empty() {
            error!(ctx, "learning requires a source and a target sentence");
            return Ok(());
        }
        self.with_context(ctx, |state| {
            let (source, target) = if self.settings.normalize {
                (self.tokenize(source)?, self.tokenize(target)?)
            } else {
                (source.to_owned(), target.to_owned())
            };
            let alignment = self.aligner.align(&source, &target)?;
            // The update must see the grammar as it existed at translation
            // time, so it runs before the extractor hears about the pair.
            let grammar = self.fetch_grammar(state, &source)?;
            let mira_log = state.decoder.update(&source, &grammar, &target)?;
            debug!(ctx = state.name.as_str(), log = mira_log.as_str(), "mira update");
            state.decoder.push_reference(&target)?;
            let instance = TrainingInstance {
                source,
                target,
                alignment,
            };
            info!(ctx = state.name.as_str(), %instance, "adding instance");
            state.history.push(instance.clone());
            self.extractor.lock().add_instance(
                &state.name,
                &instance.source,
                &instance.target,
                &instance.alignment,
            )?;
            state.grammars.invalidate(&instance.source)?;
            Ok(())
        })
    }

    /// Serializes the context: one weights line, one line per history
    /// triple, a terminating EOF line. Without a filename the block is
    /// returned for the client stream.
    #[instrument(skip(self))]
    pub fn save(&self, path: Option<&Path>, ctx: &str) -> Result<Option<String>> {
        self.with_context(ctx, |state| {
            let weights = state.decoder.get_weights()?;
            let block = std::iter::once(weights)
                .chain(state.history.iter().map(ToString::to_string))
                .chain(std::iter::once(STATE_EOF.to_owned()))
                .join("\n");
            match path {
                Some(path) => {
                    let mut out = BufWriter::new(File::create(path)?);
                    out.write_all(block.as_bytes())?;
                    out.write_all(b"\n")?;
                    out.flush()?;
                    info!(ctx = state.name.as_str(), path = %path.display(), "state saved");
                    Ok(None)
                }
                None => Ok(Some(block)),
            }
        })
    }

    pub fn load_path(&self, path: &Path, ctx: &str) -> Result<()> {
        let file = File::open(path)?;
        self.load_from(&mut BufReader::new(file), ctx)
    }

    /// Restores a previously saved context. Only a fresh context (empty
    /// history) may be loaded into. Corrupt input forcefully drops and
    /// recreates the context before the mutex is released, so no partially
    /// loaded state is ever exposed.
    #[instrument(skip(self, input))]
    pub fn load_from(&self, input: &mut dyn BufRead, ctx: &str) -> Result<()> {
        loop {
            let cell = self.lazy_cell(ctx);
            let mut slot = cell.lock();
            if slot.detached {
                continue;
            }
            if slot.state.is_none() {
                match self.init_context(ctx) {
                    Ok(state) => slot.state = Some(state),
                    Err(err) => {
                        slot.detached = true;
                        drop(slot);
                        self.contexts.remove(ctx);
                        return Err(err);
                    }
                }
            }
            let state = slot.state.as_mut().unwrap();
            if !state.history.is_empty() {
                error!(ctx, "can only load into a fresh context");
                return Ok(());
            }
            return match self.replay_state(state, input) {
                Ok(count) => {
                    info!(ctx, instances = count, "state loaded");
                    Ok(())
                }
                Err(err) if err.is_corrupt_state() => {
                    error!(ctx, error = %err, "corrupt state, restarting context");
                    if let Some(stale) = slot.state.take() {
                        let _ = self.teardown_context(stale, true);
                    }
                    slot.state = Some(self.init_context(ctx)?);
                    Ok(())
                }
                Err(err) => Err(err),
            };
        }
    }

    fn replay_state(&self, state: &mut ContextState, input: &mut dyn BufRead) -> Result<usize> {
        let weights = read_state_line(input)?.ok_or(Error::TruncatedState)?;
        state.decoder.set_weights(&weights)?;
        let mut count = 0;
        loop {
            let line = read_state_line(input)?.ok_or(Error::TruncatedState)?;
            if line == STATE_EOF {
                return Ok(count);
            }
            let instance: TrainingInstance = line.parse()?;
            state.history.push(instance.clone());
            self.extractor.lock().add_instance(
                &state.name,
                &instance.source,
                &instance.target,
                &instance.alignment,
            )?;
            // Replay the adaptive LM's schedule: one decode consumes the
            // previously queued reference before the next one is queued.
            state.decoder.decode(LIKELY_OOV, None)?;
            state.decoder.push_reference(&instance.target)?;
            count += 1;
        }
    }

    /// Destroys the named context: registry entry, decoder, extractor
    /// per-context state, grammar cache, and the mutex entry itself.
    #[instrument(skip(self))]
    pub fn drop_context(&self, ctx: &str, force: bool) -> Result<()> {
        let Some(cell) = self.contexts.get(ctx).map(|entry| Arc::clone(entry.value())) else {
            error!(ctx, "no such context");
            return Ok(());
        };
        let mut slot = if force { cell.lock_unordered() } else { cell.lock() };
        if slot.detached {
            // Lost the race against a concurrent drop.
            return Ok(());
        }
        slot.detached = true;
        self.contexts.remove(ctx);
        if let Some(state) = slot.state.take() {
            self.teardown_context(state, force)?;
        }
        info!(ctx, "context dropped");
        Ok(())
    }

    /// `ctx_name ||| ` followed by the active context names, sorted.
    pub fn list(&self) -> String {
        let names = self
            .contexts
            .iter()
            .map(|entry| entry.key().clone())
            .sorted()
            .join(" ");
        format!("ctx_name ||| {names}")
    }

    /// Drops every context, stops the shared workers, and removes the
    /// scratch root. Forced shutdown skips queue ordering and tolerates
    /// child-process errors.
    #[instrument(skip(self))]
    pub fn close(&self, force: bool) -> Result<()> {
        info!(force, "shutting down translator");
        let mut first_error: Option<Error> = None;
        let mut note = |result: Result<()>| {
            if let Err(err) = result {
                if force || first_error.is_some() {
                    warn!(error = %err, "shutdown error");
                } else {
                    first_error = Some(err);
                }
            }
        };

        let names: Vec<String> = self.contexts.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            note(self.drop_context(&name, force));
        }

        {
            let mut extractor = if force {
                self.extractor.lock_unordered()
            } else {
                self.extractor.lock()
            };
            note(extractor.close(force));
        }
        note(self.aligner.close(force));
        for pipe in [&self.tokenizer, &self.detokenizer].into_iter().flatten() {
            let mut pipe = if force { pipe.lock_unordered() } else { pipe.lock() };
            note(pipe.close(force));
        }

        if let Some(tmp) = self.tmp.lock().unwrap().take() {
            note(tmp.close().map_err(Error::from));
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Registers (or finds) the context's slot, which is pointer-level work
    /// only, then runs `f` under the context's ordered mutex, initializing the
    /// context first if this is its first use.
    fn with_context<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ContextState) -> Result<R>,
    ) -> Result<R> {
        loop {
            let cell = self.lazy_cell(name);
            let mut slot = cell.lock();
            if slot.detached {
                // The slot was dropped while we waited; look it up again.
                continue;
            }
            if slot.state.is_none() {
                match self.init_context(name) {
                    Ok(state) => slot.state = Some(state),
                    Err(err) => {
                        // Initialization failure: the context is not
                        // admitted to the registry.
                        slot.detached = true;
                        drop(slot);
                        self.contexts.remove(name);
                        return Err(err);
                    }
                }
            }
            return f(slot.state.as_mut().unwrap());
        }
    }

    fn lazy_cell(&self, name: &str) -> Arc<ContextCell> {
        Arc::clone(
            self.contexts
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(OrderedMutex::new(ContextSlot::default())))
                .value(),
        )
    }

    fn init_context(&self, name: &str) -> Result<ContextState> {
        info!(ctx = name, "materializing context");
        let decoder = ContextDecoder::start(name, &self.tmp_path, &self.settings)?;
        Ok(ContextState {
            name: name.to_owned(),
            history: Vec::new(),
            grammars: GrammarCache::new(self.settings.cache_size),
            decoder,
        })
    }

    fn teardown_context(&self, mut state: ContextState, force: bool) -> Result<()> {
        let stopped = state.decoder.close(force);
        let forgotten = {
            let mut extractor = if force {
                self.extractor.lock_unordered()
            } else {
                self.extractor.lock()
            };
            extractor.drop_ctx(&state.name)
        };
        if !force {
            stopped?;
            forgotten?;
        }
        Ok(())
    }

    /// Returns the cached grammar for `source`, extracting (under the
    /// extractor mutex) on a miss.
    fn fetch_grammar(&self, state: &mut ContextState, source: &str) -> Result<PathBuf> {
        if let Some(path) = state.grammars.get(source) {
            debug!(ctx = state.name.as_str(), "grammar cache hit");
            return Ok(path.to_owned());
        }
        let file = tempfile::Builder::new()
            .prefix("grammar.")
            .tempfile_in(state.decoder.dir())?;
        {
            let mut out = BufWriter::new(file.as_file());
            let mut extractor = self.extractor.lock();
            extractor.write_grammar(&state.name, source, &mut out)?;
            out.flush()?;
        }
        let (_, path) = file.keep().map_err(|err| Error::Io(err.error))?;
        state.grammars.insert(source.to_owned(), path.clone())?;
        Ok(path)
    }

    fn tokenize(&self, line: &str) -> Result<String> {
        match &self.tokenizer {
            Some(tokenizer) => tokenizer.lock().exchange(line),
            None => Ok(line.to_owned()),
        }
    }

    fn detokenize(&self, line: &str) -> Result<String> {
        match &self.detokenizer {
            Some(detokenizer) => detokenizer.lock().exchange(line),
            None => Ok(line.to_owned()),
        }
    }
}

fn read_state_line(input: &mut dyn BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}
