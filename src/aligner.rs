use std::{fs, path::Path};

use tracing::debug;

use crate::{
    config::Settings,
    error::{Error, Result},
    process::ProcessPipe,
    sync::OrderedMutex,
};

/// Forced word aligner: a forward and a reverse `fast_align` child plus an
/// `atools` child symmetrizing their outputs. The children are not
/// thread-safe, so the three pipes live behind one ordered mutex and every
/// `align` call holds it across the full exchange.
pub struct ForceAligner {
    pipes: OrderedMutex<AlignerPipes>,
}

struct AlignerPipes {
    fwd: ProcessPipe,
    rev: ProcessPipe,
    tools: ProcessPipe,
}

impl ForceAligner {
    pub fn start(settings: &Settings) -> Result<Self> {
        let paths = &settings.paths;
        let (fwd_tension, fwd_mean) = read_err(&paths.fwd_err)?;
        let (rev_tension, rev_mean) = read_err(&paths.rev_err)?;

        let mut fwd = settings.fast_align_command.clone();
        fwd.extend(forced_args(&fwd_tension, &fwd_mean, &paths.fwd_params));
        let mut rev = settings.fast_align_command.clone();
        rev.extend(forced_args(&rev_tension, &rev_mean, &paths.rev_params));
        rev.push("-r".to_owned());

        let mut tools = settings.atools_command.clone();
        tools.extend(
            ["-i", "-", "-j", "-", "-c", "grow-diag-final-and"]
                .iter()
                .map(|arg| (*arg).to_owned()),
        );

        Ok(Self {
            pipes: OrderedMutex::new(AlignerPipes {
                fwd: ProcessPipe::spawn(&fwd)?,
                rev: ProcessPipe::spawn(&rev)?,
                tools: ProcessPipe::spawn(&tools)?,
            }),
        })
    }

    /// Aligns one sentence pair, returning whitespace-separated `i-j`
    /// links.
    pub fn align(&self, source: &str, target: &str) -> Result<String> {
        let mut pipes = self.pipes.lock();
        let line = format!("{source} ||| {target}");
        pipes.fwd.write_line(&line)?;
        pipes.rev.write_line(&line)?;
        // Each aligner replies `source ||| target ||| links ||| score`.
        let fwd_reply = pipes.fwd.read_line()?;
        let fwd_links = links_field(&fwd_reply, "fwd aligner")?;
        let rev_reply = pipes.rev.read_line()?;
        let rev_links = links_field(&rev_reply, "rev aligner")?;
        pipes.tools.write_line(&fwd_links)?;
        pipes.tools.write_line(&rev_links)?;
        let merged = pipes.tools.read_line()?;
        debug!(source, target, alignment = merged.as_str(), "aligned");
        Ok(merged)
    }

    pub fn close(&self, force: bool) -> Result<()> {
        let mut pipes = if force {
            self.pipes.lock_unordered()
        } else {
            self.pipes.lock()
        };
        let results = [
            pipes.fwd.close(force),
            pipes.rev.close(force),
            pipes.tools.close(force),
        ];
        if !force {
            for result in results {
                result?;
            }
        }
        Ok(())
    }
}

fn forced_args(tension: &str, mean: &str, params: &Path) -> Vec<String> {
    vec![
        "-i".to_owned(),
        "-".to_owned(),
        "-d".to_owned(),
        "-T".to_owned(),
        tension.to_owned(),
        "-m".to_owned(),
        mean.to_owned(),
        "-f".to_owned(),
        params.to_string_lossy().into_owned(),
    ]
}

fn links_field(reply: &str, program: &str) -> Result<String> {
    reply
        .split("|||")
        .nth(2)
        .map(|field| field.trim().to_owned())
        .ok_or_else(|| Error::ChildReply {
            program: program.to_owned(),
            reply: reply.to_owned(),
        })
}

/// Recovers the tension and mean parameters a `fast_align` training run
/// reports on stderr: the last token of the `expected target length` line
/// and of the `final tension` line.
fn read_err(err: &Path) -> Result<(String, String)> {
    let mut tension = None;
    let mut mean = None;
    for line in fs::read_to_string(err)?.lines() {
        if line.contains("expected target length") {
            mean = line.split_whitespace().last().map(ToOwned::to_owned);
        } else if line.contains("final tension") {
            tension = line.split_whitespace().last().map(ToOwned::to_owned);
        }
    }
    match (tension, mean) {
        (Some(tension), Some(mean)) => Ok((tension, mean)),
        _ => Err(Error::Config(format!(
            "no tension/mean parameters in {}",
            err.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_err_takes_the_last_token_of_each_line() {
        let dir = tempfile::tempdir().unwrap();
        let err = dir.path().join("a.fwd_err");
        fs::write(
            &err,
            "iteration 5\n\
             expected target length = source length * 1.0843\n\
             ...\n\
             final tension: 4.372\n",
        )
        .unwrap();
        let (tension, mean) = read_err(&err).unwrap();
        assert_eq!(tension, "4.372");
        assert_eq!(mean, "1.0843");
    }

    #[test]
    fn read_err_rejects_a_log_without_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let err = dir.path().join("a.fwd_err");
        fs::write(&err, "nothing useful here\n").unwrap();
        assert!(matches!(read_err(&err), Err(Error::Config(_))));
    }

    #[test]
    fn links_field_wants_at_least_three_fields() {
        assert_eq!(
            links_field("a b ||| c d ||| 0-0 1-1 ||| -2.4", "fwd aligner").unwrap(),
            "0-0 1-1"
        );
        assert!(matches!(
            links_field("garbage", "fwd aligner"),
            Err(Error::ChildReply { .. })
        ));
    }
}
