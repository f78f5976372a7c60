use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    config::{patch_decoder_ini, Settings},
    error::Result,
    fifo::RefPipe,
    process::ProcessPipe,
};

/// Per-context decoder bundle: a temp directory, the reference pipe the
/// decoder's adaptive language model reads, and the decoder child itself.
pub struct ContextDecoder {
    dir: PathBuf,
    ref_pipe: RefPipe,
    pipe: ProcessPipe,
}

impl ContextDecoder {
    /// Creates the context's temp directory, sets up the reference pipe,
    /// writes a patched decoder config next to it, and launches the decoder
    /// child against that config and the base weights.
    pub fn start(name: &str, tmp_root: &Path, settings: &Settings) -> Result<Self> {
        let dir = tmp_root.join(format!("decoder.{}", sanitize(name)));
        fs::create_dir(&dir)?;

        let ref_pipe = RefPipe::create(dir.join("ref.fifo"))?;

        let template = fs::read_to_string(&settings.paths.decoder_ini)?;
        let patched = patch_decoder_ini(&template, &settings.paths.dir, ref_pipe.path());
        let ini = dir.join("cdec.ini");
        fs::write(&ini, patched)?;

        let mut argv = settings.decoder_command.clone();
        argv.push("-c".to_owned());
        argv.push(ini.to_string_lossy().into_owned());
        argv.push("-w".to_owned());
        argv.push(settings.paths.weights.to_string_lossy().into_owned());
        let pipe = ProcessPipe::spawn(&argv)?;

        info!(ctx = name, dir = %dir.display(), "decoder started");
        Ok(Self {
            dir,
            ref_pipe,
            pipe,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn child_id(&self) -> u32 {
        self.pipe.id()
    }

    /// Decodes one sentence, optionally against a per-sentence grammar.
    pub fn decode(&mut self, source: &str, grammar: Option<&Path>) -> Result<String> {
        let input = match grammar {
            Some(grammar) => format!(r#"<seg grammar="{}">{}</seg>"#, grammar.display(), source),
            None => source.to_owned(),
        };
        self.pipe.exchange(&input)
    }

    /// One online discriminative update on a (source, grammar, target)
    /// triple; returns the learner's log line.
    pub fn update(&mut self, source: &str, grammar: &Path, target: &str) -> Result<String> {
        self.pipe.exchange(&format!(
            r#"LEARN ||| <seg grammar="{}">{}</seg> ||| {}"#,
            grammar.display(),
            source,
            target
        ))
    }

    pub fn get_weights(&mut self) -> Result<String> {
        self.pipe.exchange("WEIGHTS ||| WRITE")
    }

    /// Replaces the decoder's weights. The decoder sends no reply for this
    /// request.
    pub fn set_weights(&mut self, weights: &str) -> Result<()> {
        self.pipe.write_line(&format!("WEIGHTS ||| {weights}"))
    }

    /// Queues `target` as the reference the adaptive language model learns
    /// from before its next decode; an empty line means "do not learn".
    pub fn push_reference(&mut self, target: &str) -> Result<()> {
        self.ref_pipe.write_line(target)
    }

    /// Stops the child (graceful unless forced), closes the reference pipe
    /// and removes the temp subtree.
    pub fn close(&mut self, force: bool) -> Result<()> {
        debug!(dir = %self.dir.display(), force, "closing decoder");
        let stopped = self.pipe.close(force);
        self.ref_pipe.close();
        let removed = fs::remove_dir_all(&self.dir);
        if !force {
            stopped?;
            removed?;
        }
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
