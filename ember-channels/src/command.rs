//! Slash-command parsing.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unterminated quote or escape in command")]
    Unterminated,
}

/// A parsed `/command arg...` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Lowercased command word without the slash or any `@botname` suffix.
    pub name: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Parse text that starts with `/`. Returns `Ok(None)` for a bare slash.
    pub fn parse(text: &str) -> Result<Option<Self>, CommandError> {
        let body = text.trim().strip_prefix('/').unwrap_or(text).trim();
        let mut words = split_command_line(body)?.into_iter();

        let Some(first) = words.next() else {
            return Ok(None);
        };
        let name = match first.split_once('@') {
            Some((name, _bot)) => name,
            None => first.as_str(),
        };

        Ok(Some(Self {
            name: name.to_lowercase(),
            args: words.collect(),
        }))
    }
}

/// Split a line into words with POSIX shell quoting rules.
pub fn split_command_line(line: &str) -> Result<Vec<String>, CommandError> {
    shlex::split(line).ok_or(CommandError::Unterminated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(line: &str) -> Vec<String> {
        split_command_line(line).unwrap()
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(split("memory  rm\t3 "), vec!["memory", "rm", "3"]);
        assert!(split("   ").is_empty());
    }

    #[test]
    fn quotes_group_words() {
        assert_eq!(split(r#"say "hello world" 'it''s'"#), vec!["say", "hello world", "its"]);
        assert_eq!(split(r#"a "" b"#), vec!["a", "", "b"]);
        assert_eq!(split(r#"x"y z"w"#), vec!["xy zw"]);
    }

    #[test]
    fn backslash_escapes() {
        assert_eq!(split(r"a\ b c"), vec!["a b", "c"]);
        assert_eq!(split(r#""say \"hi\"""#), vec![r#"say "hi""#]);
        assert_eq!(split(r#""C:\temp""#), vec![r"C:\temp"]);
        assert_eq!(split(r"'no \escape'"), vec![r"no \escape"]);
    }

    #[test]
    fn unterminated_input_is_an_error() {
        for line in ["memory 'oops", r#"memory "oops"#, r"memory \"] {
            assert_eq!(split_command_line(line), Err(CommandError::Unterminated), "{line}");
        }
        assert_eq!(
            CommandLine::parse("/memory rm 'oops"),
            Err(CommandError::Unterminated)
        );
    }

    #[test]
    fn parse_command_line() {
        let cmd = CommandLine::parse("/user add 42 admin").unwrap().unwrap();
        assert_eq!(cmd.name, "user");
        assert_eq!(cmd.args, vec!["add", "42", "admin"]);
    }

    #[test]
    fn parse_strips_bot_name_and_case() {
        let cmd = CommandLine::parse("/Info@ember_bot").unwrap().unwrap();
        assert_eq!(cmd.name, "info");
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn bare_slash_is_nothing() {
        assert_eq!(CommandLine::parse("/").unwrap(), None);
        assert_eq!(CommandLine::parse("/   ").unwrap(), None);
    }
}
