use std::path::PathBuf;

use thiserror::Error;

/// A parsed client command. Arity is a parse-time concern: by the time a
/// variant exists, its arguments are known to be well-formed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Translate { sentence: String },
    Learn { source: String, target: String },
    Save { path: Option<PathBuf> },
    Load { path: Option<PathBuf> },
    Drop,
    List,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Context named in the head field; `None` selects the default context.
    pub ctx: Option<String>,
    pub command: Command,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("malformed head field '{0}'")]
    MalformedHead(String),

    #[error("'{command}' takes {expected} argument(s), got {got}")]
    Arity {
        command: &'static str,
        expected: &'static str,
        got: usize,
    },
}

/// Parses one protocol line: `CMD [ctx] ||| arg1 [||| arg2 …]`. Each `|||`
/// may be surrounded by whitespace, which is stripped; a single trailing
/// empty field is tolerated.
pub fn parse(line: &str) -> Result<Request, ParseError> {
    let mut fields: Vec<&str> = line.split("|||").map(str::trim).collect();
    if fields.last() == Some(&"") && fields.len() > 1 {
        fields.pop();
    }

    let head: Vec<&str> = fields[0].split_whitespace().collect();
    let (name, ctx) = match head.as_slice() {
        [] => return Err(ParseError::Empty),
        [name] => (*name, None),
        [name, ctx] => (*name, Some((*ctx).to_owned())),
        _ => return Err(ParseError::MalformedHead(fields[0].to_owned())),
    };

    let args = &fields[1..];
    let arity = |command, expected| ParseError::Arity {
        command,
        expected,
        got: args.len(),
    };

    let command = match name {
        "TR" => match args {
            [sentence] => Command::Translate {
                sentence: (*sentence).to_owned(),
            },
            _ => return Err(arity("TR", "1")),
        },
        "LEARN" => match args {
            [source, target] => Command::Learn {
                source: (*source).to_owned(),
                target: (*target).to_owned(),
            },
            _ => return Err(arity("LEARN", "2")),
        },
        "SAVE" => match args {
            [] => Command::Save { path: None },
            [path] => Command::Save {
                path: Some(PathBuf::from(path)),
            },
            _ => return Err(arity("SAVE", "0 or 1")),
        },
        "LOAD" => match args {
            [] => Command::Load { path: None },
            [path] => Command::Load {
                path: Some(PathBuf::from(path)),
            },
            _ => return Err(arity("LOAD", "0 or 1")),
        },
        "DROP" => match args {
            [] => Command::Drop,
            _ => return Err(arity("DROP", "0")),
        },
        "LIST" => match args {
            [] => Command::List,
            _ => return Err(arity("LIST", "0")),
        },
        other => return Err(ParseError::UnknownCommand(other.to_owned())),
    };

    Ok(Request { ctx, command })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_with_and_without_context() {
        assert_eq!(
            parse("TR ctxA ||| hello world").unwrap(),
            Request {
                ctx: Some("ctxA".to_owned()),
                command: Command::Translate {
                    sentence: "hello world".to_owned()
                },
            }
        );
        assert_eq!(
            parse("TR ||| hello").unwrap(),
            Request {
                ctx: None,
                command: Command::Translate {
                    sentence: "hello".to_owned()
                },
            }
        );
    }

    #[test]
    fn separators_are_whitespace_tolerant() {
        assert_eq!(
            parse("LEARN ctxA|||hola mundo   |||   hello world").unwrap(),
            Request {
                ctx: Some("ctxA".to_owned()),
                command: Command::Learn {
                    source: "hola mundo".to_owned(),
                    target: "hello world".to_owned(),
                },
            }
        );
    }

    #[test]
    fn trailing_empty_field_is_trimmed() {
        assert_eq!(
            parse("DROP ctxA ||| ").unwrap().command,
            Command::Drop
        );
        assert_eq!(
            parse("SAVE ctxA |||").unwrap().command,
            Command::Save { path: None }
        );
    }

    #[test]
    fn save_and_load_take_an_optional_filename() {
        assert_eq!(
            parse("SAVE ctxA ||| /tmp/state").unwrap().command,
            Command::Save {
                path: Some(PathBuf::from("/tmp/state"))
            }
        );
        assert_eq!(
            parse("LOAD").unwrap(),
            Request {
                ctx: None,
                command: Command::Load { path: None },
            }
        );
    }

    #[test]
    fn arity_violations_are_rejected() {
        assert!(matches!(
            parse("TR ctxA"),
            Err(ParseError::Arity { command: "TR", .. })
        ));
        assert!(matches!(
            parse("TR ctxA ||| a ||| b"),
            Err(ParseError::Arity { command: "TR", .. })
        ));
        assert!(matches!(
            parse("LEARN ctxA ||| solo"),
            Err(ParseError::Arity {
                command: "LEARN",
                ..
            })
        ));
        assert!(matches!(
            parse("LIST ||| extra"),
            Err(ParseError::Arity { command: "LIST", .. })
        ));
    }

    #[test]
    fn junk_is_rejected() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(
            parse("FROBNICATE ||| x"),
            Err(ParseError::UnknownCommand("FROBNICATE".to_owned()))
        );
        assert!(matches!(
            parse("TR ctx extra ||| x"),
            Err(ParseError::MalformedHead(_))
        ));
    }

    #[test]
    fn list_accepts_and_carries_an_ignored_context() {
        let request = parse("LIST ctxA").unwrap();
        assert_eq!(request.ctx, Some("ctxA".to_owned()));
        assert_eq!(request.command, Command::List);
    }
}
