//! Command lines and environment blocks for processes started on a console
//!
//! `CreateProcessW` takes a single UTF-16 command line and an optional
//! Unicode environment block. This module builds both from a familiar
//! builder, following the quoting rules `CommandLineToArgvW` parses back.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const NUL: u16 = 0;
const TAB: u16 = b'\t' as u16;
const NEWLINE: u16 = b'\n' as u16;
const VTAB: u16 = 0x0B;
const SPACE: u16 = b' ' as u16;
const QUOTE: u16 = b'"' as u16;
const BACKSLASH: u16 = b'\\' as u16;
const EQUALS: u16 = b'=' as u16;

/// Builder for a process to run inside a pseudo console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    /// Program to execute
    program: OsString,
    /// Arguments, not including the program
    args: Vec<OsString>,
    /// Environment edits in the order they were made. `None` removes.
    env: Vec<(OsString, Option<OsString>)>,
    /// Start from an empty environment instead of the parent's
    env_clear: bool,
    /// Working directory
    cwd: Option<PathBuf>,
}

impl CommandBuilder {
    /// Create a new builder for the given program
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: Vec::new(),
            env_clear: false,
            cwd: None,
        }
    }

    /// The default shell: `%COMSPEC%`, falling back to `cmd.exe`
    pub fn default_shell() -> Self {
        let shell = std::env::var_os("COMSPEC")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| OsString::from("cmd.exe"));
        Self::new(shell)
    }

    /// Add an argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Set an environment variable
    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, key: K, value: V) -> Self {
        self.env.push((
            key.as_ref().to_os_string(),
            Some(value.as_ref().to_os_string()),
        ));
        self
    }

    /// Remove an environment variable
    pub fn env_remove<K: AsRef<OsStr>>(mut self, key: K) -> Self {
        self.env.push((key.as_ref().to_os_string(), None));
        self
    }

    /// Clear all environment variables, including earlier edits
    pub fn env_clear(mut self) -> Self {
        self.env.clear();
        self.env_clear = true;
        self
    }

    /// Set the working directory
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> impl Iterator<Item = &OsStr> {
        self.args.iter().map(OsString::as_os_str)
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Build the NUL-terminated UTF-16 command line
    pub fn command_line(&self) -> Result<Vec<u16>> {
        let program = to_wide(&self.program)?;
        if program.contains(&QUOTE) {
            return Err(Error::InvalidCommand(format!(
                "program name {:?} contains a double quote",
                self.program
            )));
        }

        let mut line = Vec::with_capacity(program.len() + 2);
        if program.is_empty() || program.iter().any(|&c| c == SPACE || c == TAB) {
            line.push(QUOTE);
            line.extend_from_slice(&program);
            line.push(QUOTE);
        } else {
            line.extend_from_slice(&program);
        }

        for arg in &self.args {
            line.push(SPACE);
            append_quoted(&mut line, &to_wide(arg)?);
        }

        line.push(NUL);
        Ok(line)
    }

    /// Build a Unicode environment block, or `None` to inherit the parent's
    /// environment unchanged.
    pub fn environment_block(&self) -> Result<Option<Vec<u16>>> {
        if !self.env_clear && self.env.is_empty() {
            return Ok(None);
        }

        // Names are case-insensitive; the block is sorted by upper-cased name
        // in UTF-16 code unit order.
        let mut vars: BTreeMap<Vec<u16>, (OsString, OsString)> = BTreeMap::new();
        if !self.env_clear {
            for (key, value) in std::env::vars_os() {
                vars.insert(env_key(&key)?, (key, value));
            }
        }
        for (key, value) in &self.env {
            validate_env_name(key)?;
            match value {
                Some(value) => {
                    vars.insert(env_key(key)?, (key.clone(), value.clone()));
                }
                None => {
                    vars.remove(&env_key(key)?);
                }
            }
        }

        let mut block = Vec::new();
        for (key, value) in vars.values() {
            block.extend(to_wide(key)?);
            block.push(EQUALS);
            block.extend(to_wide(value)?);
            block.push(NUL);
        }
        if block.is_empty() {
            block.push(NUL);
        }
        block.push(NUL);
        Ok(Some(block))
    }

    /// The working directory as a NUL-terminated UTF-16 string
    pub fn current_dir_wide(&self) -> Result<Option<Vec<u16>>> {
        self.cwd
            .as_ref()
            .map(|dir| {
                let mut wide = to_wide(dir.as_os_str())?;
                wide.push(NUL);
                Ok(wide)
            })
            .transpose()
    }
}

/// Append `arg` so that `CommandLineToArgvW` parses it back unchanged
fn append_quoted(line: &mut Vec<u16>, arg: &[u16]) {
    let needs_quotes = arg.is_empty()
        || arg
            .iter()
            .any(|&c| matches!(c, SPACE | TAB | NEWLINE | VTAB | QUOTE));
    if !needs_quotes {
        line.extend_from_slice(arg);
        return;
    }

    line.push(QUOTE);
    let mut backslashes = 0usize;
    for &c in arg {
        if c == BACKSLASH {
            backslashes += 1;
        } else {
            if c == QUOTE {
                // Backslashes before a quote are doubled, then the quote escaped
                line.extend(std::iter::repeat(BACKSLASH).take(backslashes + 1));
            }
            backslashes = 0;
        }
        line.push(c);
    }
    // The closing quote must not be escaped by trailing backslashes
    line.extend(std::iter::repeat(BACKSLASH).take(backslashes));
    line.push(QUOTE);
}

/// Upper-case a name one UTF-16 unit at a time, the way Windows compares
/// environment names. Units whose upper case is not a single unit are kept.
fn env_key(key: &OsStr) -> Result<Vec<u16>> {
    Ok(to_wide(key)?.into_iter().map(upcase_unit).collect())
}

fn upcase_unit(unit: u16) -> u16 {
    let Some(c) = char::from_u32(u32::from(unit)) else {
        // Surrogate halves compare as-is
        return unit;
    };
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u16::try_from(u32::from(u)).unwrap_or(unit),
        _ => unit,
    }
}

fn validate_env_name(key: &OsStr) -> Result<()> {
    let wide = to_wide(key)?;
    // Drive-letter variables such as `=C:` start with '='
    if wide.is_empty() || wide.iter().skip(1).any(|&c| c == EQUALS) {
        return Err(Error::InvalidCommand(format!(
            "invalid environment variable name {:?}",
            key
        )));
    }
    Ok(())
}

#[cfg(windows)]
fn to_wide(s: &OsStr) -> Result<Vec<u16>> {
    use std::os::windows::ffi::OsStrExt;

    let wide: Vec<u16> = s.encode_wide().collect();
    check_nul(s, wide)
}

#[cfg(not(windows))]
fn to_wide(s: &OsStr) -> Result<Vec<u16>> {
    let text = s
        .to_str()
        .ok_or_else(|| Error::InvalidCommand(format!("{:?} is not valid Unicode", s)))?;
    check_nul(s, text.encode_utf16().collect())
}

fn check_nul(s: &OsStr, wide: Vec<u16>) -> Result<Vec<u16>> {
    if wide.contains(&NUL) {
        return Err(Error::InvalidCommand(format!(
            "{:?} contains an interior NUL",
            s
        )));
    }
    Ok(wide)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(cmd: &CommandBuilder) -> String {
        let wide = cmd.command_line().unwrap();
        assert_eq!(wide.last(), Some(&0));
        String::from_utf16(&wide[..wide.len() - 1]).unwrap()
    }

    fn quoted(arg: &str) -> String {
        let mut out = Vec::new();
        append_quoted(&mut out, &arg.encode_utf16().collect::<Vec<_>>());
        String::from_utf16(&out).unwrap()
    }

    fn block_entries(block: &[u16]) -> Vec<String> {
        assert!(block.ends_with(&[0, 0]));
        String::from_utf16(&block[..block.len() - 2])
            .unwrap()
            .split('\0')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_plain_args_are_not_quoted() {
        let cmd = CommandBuilder::new("cmd.exe").args(["/c", "echo", "hello"]);
        assert_eq!(line(&cmd), "cmd.exe /c echo hello");
    }

    #[test]
    fn test_quoting_rules() {
        assert_eq!(quoted("hello"), "hello");
        assert_eq!(quoted(""), "\"\"");
        assert_eq!(quoted("a b"), "\"a b\"");
        assert_eq!(quoted("tab\there"), "\"tab\there\"");
        assert_eq!(quoted("a\"b"), r#""a\"b""#);
        assert_eq!(quoted(r#"a\"b"#), r#""a\\\"b""#);
        assert_eq!(quoted(r"C:\Program Files\"), r#""C:\Program Files\\""#);
        // Backslashes not followed by a quote stay literal
        assert_eq!(quoted(r"C:\dir\"), r"C:\dir\");
        assert_eq!(quoted(r"a\\b c"), r#""a\\b c""#);
    }

    #[test]
    fn test_program_with_spaces_is_quoted() {
        let cmd = CommandBuilder::new(r"C:\Program Files\Git\bin\bash.exe").arg("-l");
        assert_eq!(line(&cmd), r#""C:\Program Files\Git\bin\bash.exe" -l"#);
    }

    #[test]
    fn test_program_with_quote_is_rejected() {
        let cmd = CommandBuilder::new("bad\"name.exe");
        assert!(matches!(cmd.command_line(), Err(Error::InvalidCommand(_))));
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        let cmd = CommandBuilder::new("cmd.exe").arg("a\0b");
        assert!(matches!(cmd.command_line(), Err(Error::InvalidCommand(_))));
    }

    #[test]
    fn test_inherited_environment_has_no_block() {
        let cmd = CommandBuilder::new("cmd.exe");
        assert_eq!(cmd.environment_block().unwrap(), None);
    }

    #[test]
    fn test_cleared_environment_is_double_nul() {
        let cmd = CommandBuilder::new("cmd.exe").env_clear();
        assert_eq!(cmd.environment_block().unwrap(), Some(vec![0, 0]));
    }

    #[test]
    fn test_environment_block_sorted_case_insensitively() {
        let cmd = CommandBuilder::new("cmd.exe")
            .env_clear()
            .env("zeta", "1")
            .env("Alpha", "2")
            .env("beta", "3");
        let block = cmd.environment_block().unwrap().unwrap();
        assert_eq!(block_entries(&block), ["Alpha=2", "beta=3", "zeta=1"]);
    }

    #[test]
    fn test_environment_override_and_remove() {
        let cmd = CommandBuilder::new("cmd.exe")
            .env_clear()
            .env("Path", r"C:\old")
            .env("PATH", r"C:\new")
            .env("TERM", "xterm-256color")
            .env_remove("term");
        let block = cmd.environment_block().unwrap().unwrap();
        assert_eq!(block_entries(&block), [r"PATH=C:\new"]);
    }

    #[test]
    fn test_environment_names_do_not_fold_to_several_chars() {
        // 'ß' upper-cases to "SS", which Windows does not treat as equal
        let cmd = CommandBuilder::new("cmd.exe")
            .env_clear()
            .env("STRASSE", "a")
            .env("STRAßE", "b")
            .env("straße", "c");
        let block = cmd.environment_block().unwrap().unwrap();
        assert_eq!(block_entries(&block), ["STRASSE=a", "straße=c"]);
    }

    #[test]
    fn test_environment_block_sorted_by_code_unit() {
        let cmd = CommandBuilder::new("cmd.exe")
            .env_clear()
            .env("é", "1")
            .env("z", "2")
            .env("_", "3");
        let block = cmd.environment_block().unwrap().unwrap();
        // 'Z' (0x5A) < '_' (0x5F) < 'É' (0xC9)
        assert_eq!(block_entries(&block), ["z=2", "_=3", "é=1"]);
    }

    #[test]
    fn test_upcase_unit() {
        assert_eq!(upcase_unit(u16::from(b'a')), u16::from(b'A'));
        assert_eq!(upcase_unit(u16::from(b'_')), u16::from(b'_'));
        assert_eq!(upcase_unit(0x00DF), 0x00DF); // ß
        assert_eq!(upcase_unit(0x00E9), 0x00C9); // é
        assert_eq!(upcase_unit(0xD83D), 0xD83D); // lone surrogate
    }

    #[test]
    fn test_environment_inherits_parent() {
        let cmd = CommandBuilder::new("cmd.exe").env("CONPTY_TEST_MARKER", "on");
        let block = cmd.environment_block().unwrap().unwrap();
        let entries = block_entries(&block);
        assert!(entries.contains(&"CONPTY_TEST_MARKER=on".to_string()));
        assert!(entries.len() <= std::env::vars_os().count() + 1);
    }

    #[test]
    fn test_invalid_environment_names() {
        let cmd = CommandBuilder::new("cmd.exe").env("A=B", "1");
        assert!(cmd.environment_block().is_err());
        let cmd = CommandBuilder::new("cmd.exe").env("", "1");
        assert!(cmd.environment_block().is_err());
        let cmd = CommandBuilder::new("cmd.exe").env_clear().env("=C:", r"C:\");
        assert!(cmd.environment_block().is_ok());
    }

    #[test]
    fn test_current_dir_wide() {
        let cmd = CommandBuilder::new("cmd.exe");
        assert_eq!(cmd.current_dir_wide().unwrap(), None);

        let cmd = cmd.current_dir(r"C:\work");
        let wide = cmd.current_dir_wide().unwrap().unwrap();
        assert_eq!(String::from_utf16(&wide).unwrap(), "C:\\work\0");
        assert_eq!(cmd.get_current_dir(), Some(Path::new(r"C:\work")));
    }

    #[test]
    fn test_default_shell_is_not_empty() {
        let shell = CommandBuilder::default_shell();
        assert!(!shell.program().is_empty());
        assert_eq!(shell.get_args().count(), 0);
    }
}
