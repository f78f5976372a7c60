#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use realtime_mt::{ConfigPaths, Settings, SettingsBuilder, Translator};
use tempfile::TempDir;

/// A config directory populated with shell-script stand-ins for the
/// decoder, extractor, aligner and tokenizer children, plus the model
/// files the translator expects to find next to them.
pub struct Fixture {
    pub config_dir: TempDir,
    pub scratch_parent: TempDir,
}

const DECODER: &str = r#"#!/bin/sh
weights="w0=1.0"
while IFS= read -r line; do
  case "$line" in
    "WEIGHTS ||| WRITE") printf '%s\n' "$weights" ;;
    "WEIGHTS ||| "*) weights="${line#WEIGHTS ||| }" ;;
    "LEARN ||| "*) weights="$weights +u"; printf 'mira: 1 update\n' ;;
    *)
      body="${line#*>}"
      body="${body%</seg>}"
      printf 'hyp(%s): %s\n' "$weights" "$body"
      ;;
  esac
done
"#;

const EXTRACTOR: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    "GRAMMAR ||| "*)
      rest="${line#GRAMMAR ||| }"
      sent="${rest#* ||| }"
      printf '2\n'
      printf '[X] ||| %s ||| %s ||| 0.3\n' "$sent" "$sent"
      printf '[X] ||| [X,1] ||| [X,1] ||| 0.1\n'
      ;;
    "LEARN ||| "*) printf 'ok\n' ;;
    "DROP ||| "*) printf 'ok\n' ;;
    *) printf 'unsupported\n' ;;
  esac
done
"#;

const FAST_ALIGN: &str = r#"#!/bin/sh
while IFS= read -r line; do
  printf '%s ||| 0-0 ||| -1.5\n' "$line"
done
"#;

const ATOOLS: &str = r#"#!/bin/sh
while IFS= read -r fwd; do
  IFS= read -r rev || break
  printf '%s\n' "$fwd"
done
"#;

const TOKENIZER: &str = r#"#!/bin/sh
while IFS= read -r line; do
  printf '%s @tok\n' "$line"
done
"#;

const DETOKENIZER: &str = r#"#!/bin/sh
while IFS= read -r line; do
  printf '%s @detok\n' "$line"
done
"#;

const ALIGNER_ERR: &str = "\
iteration 5\n\
expected target length = source length * 1.0843\n\
final tension: 4.372\n";

pub fn fixture() -> Fixture {
    let config_dir = tempfile::tempdir().unwrap();
    let dir = config_dir.path();

    fs::write(
        dir.join("cdec.ini"),
        "formalism=scfg\n\
         feature_function=KLanguageModel lm.klm\n\
         feature_function=HPYPLM -r ref.placeholder\n",
    )
    .unwrap();
    fs::write(dir.join("lm.klm"), "").unwrap();
    fs::write(dir.join("sa.ini"), "corpus=bitext\nmax-len=15\n").unwrap();
    fs::write(dir.join("bitext"), "").unwrap();
    fs::write(dir.join("weights.final"), "Glue=-0.1 LanguageModel=1.0\n").unwrap();
    fs::write(dir.join("a.fwd_params"), "").unwrap();
    fs::write(dir.join("a.rev_params"), "").unwrap();
    fs::write(dir.join("a.fwd_err"), ALIGNER_ERR).unwrap();
    fs::write(dir.join("a.rev_err"), ALIGNER_ERR).unwrap();

    write_script(dir, "decoder.sh", DECODER);
    write_script(dir, "extractor.sh", EXTRACTOR);
    write_script(dir, "fast_align.sh", FAST_ALIGN);
    write_script(dir, "atools.sh", ATOOLS);
    write_script(dir, "tokenizer.sh", TOKENIZER);
    write_script(dir, "detokenizer.sh", DETOKENIZER);

    Fixture {
        config_dir,
        scratch_parent: tempfile::tempdir().unwrap(),
    }
}

impl Fixture {
    pub fn settings(&self, cache_size: usize, normalize: bool) -> Settings {
        let dir = self.config_dir.path();
        let script = |name: &str| vec![dir.join(name).to_string_lossy().into_owned()];
        SettingsBuilder::default()
            .paths(ConfigPaths::locate(dir).unwrap())
            .cache_size(cache_size)
            .normalize(normalize)
            .tmp_root(self.scratch_parent.path())
            .decoder_command(script("decoder.sh"))
            .extractor_command(script("extractor.sh"))
            .fast_align_command(script("fast_align.sh"))
            .atools_command(script("atools.sh"))
            .tokenizer_command(script("tokenizer.sh"))
            .detokenizer_command(script("detokenizer.sh"))
            .build()
            .unwrap()
    }

    pub fn translator(&self, cache_size: usize, normalize: bool) -> Translator {
        Translator::new(self.settings(cache_size, normalize)).unwrap()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn grammar_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("grammar."))
        })
        .collect();
    files.sort();
    files
}
