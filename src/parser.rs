use std::path::PathBuf;

use thiserror::Error;

use crate::command::{CommandLine, CommandRequest, OutputTarget};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Pipe,
    RedirIn,
    RedirOut,
    RedirAppend,
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Syntax error: parentheses are not supported")]
    Parenthesis,
    #[error("Syntax error: only one pipe is supported")]
    TooManyStages,
    #[error("Syntax error: empty command")]
    EmptyCommand,
    #[error("Syntax error: missing file name after {0}")]
    MissingTarget(&'static str),
    #[error("Syntax error: {0} given twice")]
    DuplicateRedirect(&'static str),
    #[error("Syntax error: {0} is not allowed here")]
    Misplaced(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Builtin {
    Cd(Vec<String>),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Empty,
    Builtin(Builtin),
    Command(CommandLine),
}

/// Split a line into words and operators. Operators do not need
/// surrounding whitespace: `ls>out` is three tokens.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        let op = match c {
            '|' => Some(Token::Pipe),
            '<' => Some(Token::RedirIn),
            '&' => Some(Token::Background),
            '>' if chars.peek() == Some(&'>') => {
                chars.next();
                Some(Token::RedirAppend)
            }
            '>' => Some(Token::RedirOut),
            c if c.is_whitespace() => None,
            c => {
                word.push(c);
                continue;
            }
        };
        if !word.is_empty() {
            tokens.push(Token::Word(std::mem::take(&mut word)));
        }
        tokens.extend(op);
    }
    if !word.is_empty() {
        tokens.push(Token::Word(word));
    }
    tokens
}

/// Turn one input line into something the shell can act on.
pub fn parse(line: &str) -> Result<ParsedLine, ParseError> {
    let line = line.trim_matches(|c: char| c == ' ' || c == '\t' || c == '\n' || c == '\r');
    if line.contains('(') || line.contains(')') {
        return Err(ParseError::Parenthesis);
    }

    let mut tokens = tokenize(line);
    if tokens.is_empty() {
        return Ok(ParsedLine::Empty);
    }

    let background = tokens.last() == Some(&Token::Background);
    if background {
        tokens.pop();
    }
    if tokens.contains(&Token::Background) {
        return Err(ParseError::Misplaced("&"));
    }

    let stages: Vec<&[Token]> = tokens.split(|t| *t == Token::Pipe).collect();
    match stages.as_slice() {
        [single] => {
            if let Some(builtin) = builtin(single, background)? {
                return Ok(ParsedLine::Builtin(builtin));
            }
            let request = stage(single, Allowed::Both)?.in_background(background);
            Ok(ParsedLine::Command(CommandLine::Single(request)))
        }
        [first, second] => {
            let first = stage(first, Allowed::Input)?.in_background(background);
            let second = stage(second, Allowed::Output)?.in_background(background);
            Ok(ParsedLine::Command(CommandLine::Pipeline(first, second)))
        }
        _ => Err(ParseError::TooManyStages),
    }
}

fn builtin(tokens: &[Token], background: bool) -> Result<Option<Builtin>, ParseError> {
    let name = match tokens.first() {
        Some(Token::Word(w)) if w == "cd" || w == "exit" => w.as_str(),
        _ => return Ok(None),
    };
    if background {
        return Err(ParseError::Misplaced("&"));
    }
    let mut args = Vec::new();
    for token in &tokens[1..] {
        match token {
            Token::Word(w) => args.push(w.clone()),
            _ => return Err(ParseError::Misplaced("redirection")),
        }
    }
    Ok(Some(match name {
        "cd" => Builtin::Cd(args),
        _ => Builtin::Exit,
    }))
}

/// Which redirections a stage may carry.
#[derive(Clone, Copy)]
enum Allowed {
    Both,
    Input,
    Output,
}

fn stage(tokens: &[Token], allowed: Allowed) -> Result<CommandRequest, ParseError> {
    let mut words = Vec::new();
    let mut redir_in: Option<PathBuf> = None;
    let mut redir_out: Option<OutputTarget> = None;

    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        match token {
            Token::Word(w) => words.push(w.clone()),
            Token::RedirIn => {
                if matches!(allowed, Allowed::Output) {
                    return Err(ParseError::Misplaced("<"));
                }
                let path = target(iter.next(), "<")?;
                if redir_in.replace(path.into()).is_some() {
                    return Err(ParseError::DuplicateRedirect("<"));
                }
            }
            Token::RedirOut | Token::RedirAppend => {
                let (op, append) = match token {
                    Token::RedirAppend => (">>", true),
                    _ => (">", false),
                };
                if matches!(allowed, Allowed::Input) {
                    return Err(ParseError::Misplaced(op));
                }
                let path = target(iter.next(), op)?;
                let previous = redir_out.replace(OutputTarget {
                    path: path.into(),
                    append,
                });
                if previous.is_some() {
                    return Err(ParseError::DuplicateRedirect(">"));
                }
            }
            Token::Pipe | Token::Background => unreachable!("split out by parse"),
        }
    }

    let mut words = words.into_iter();
    let program = words.next().ok_or(ParseError::EmptyCommand)?;
    let mut request = CommandRequest::new(&program, words);
    request.redir_in = redir_in;
    request.redir_out = redir_out;
    Ok(request)
}

fn target(token: Option<&Token>, op: &'static str) -> Result<String, ParseError> {
    match token {
        Some(Token::Word(w)) => Ok(w.clone()),
        _ => Err(ParseError::MissingTarget(op)),
    }
}
