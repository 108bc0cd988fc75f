// src/router/command.rs

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Lower-cased first word.
    pub verb: String,
    pub args: Vec<String>,
    pub raw: String,
}

impl Command {
    /// Split on whitespace. Returns `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next()?.to_lowercase();
        Some(Self {
            verb,
            args: words.map(str::to_string).collect(),
            raw: line.trim().to_string(),
        })
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_is_lowercased_and_args_kept_verbatim() {
        let cmd = Command::parse("  VERIFY  sdB1 --Fast ").unwrap();
        assert_eq!(cmd.verb, "verify");
        assert_eq!(cmd.args, vec!["sdB1", "--Fast"]);
        assert_eq!(cmd.raw, "VERIFY  sdB1 --Fast");
        assert_eq!(cmd.arg(0), Some("sdB1"));
        assert_eq!(cmd.arg(2), None);
    }

    #[test]
    fn blank_lines_do_not_parse() {
        assert!(Command::parse("").is_none());
        assert!(Command::parse(" \t ").is_none());
    }
}
