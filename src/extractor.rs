use std::{io::Write, path::Path};

use tracing::debug;

use crate::{
    error::{Error, Result},
    process::ProcessPipe,
};

/// Wrapper over the grammar extractor child. The extractor is
/// single-threaded and keeps per-context bitext, so the translator guards
/// this wrapper with a dedicated ordered mutex; every call here assumes the
/// caller holds it.
pub struct GrammarExtractor {
    pipe: ProcessPipe,
}

impl GrammarExtractor {
    pub fn start(command: &[String], ini: &Path) -> Result<Self> {
        let mut argv = command.to_vec();
        argv.push("-c".to_owned());
        argv.push(ini.to_string_lossy().into_owned());
        Ok(Self {
            pipe: ProcessPipe::spawn(&argv)?,
        })
    }

    /// Extracts a grammar for `sentence` in `ctx` and streams the rules to
    /// `out`. The child replies with a rule count line followed by that
    /// many rule lines.
    pub fn write_grammar(&mut self, ctx: &str, sentence: &str, out: &mut dyn Write) -> Result<usize> {
        let reply = self
            .pipe
            .exchange(&format!("GRAMMAR ||| {ctx} ||| {sentence}"))?;
        let count: usize = reply.trim().parse().map_err(|_| Error::ChildReply {
            program: self.pipe.program().to_owned(),
            reply: reply.clone(),
        })?;
        for _ in 0..count {
            let rule = self.pipe.read_line()?;
            out.write_all(rule.as_bytes())?;
            out.write_all(b"\n")?;
        }
        debug!(ctx, sentence, rules = count, "extracted grammar");
        Ok(count)
    }

    /// Adds one aligned sentence pair to the context's bitext.
    pub fn add_instance(
        &mut self,
        ctx: &str,
        source: &str,
        target: &str,
        alignment: &str,
    ) -> Result<()> {
        self.pipe
            .exchange(&format!("LEARN ||| {ctx} ||| {source} ||| {target} ||| {alignment}"))?;
        Ok(())
    }

    /// Discards the context's bitext and statistics.
    pub fn drop_ctx(&mut self, ctx: &str) -> Result<()> {
        self.pipe.exchange(&format!("DROP ||| {ctx}"))?;
        Ok(())
    }

    pub fn close(&mut self, force: bool) -> Result<()> {
        self.pipe.close(force)
    }
}
