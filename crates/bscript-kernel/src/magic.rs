//! Magic command parsing.
//!
//! A magic line starts with [`MAGIC_SENTINEL`] and reads
//! `//! command arg1 arg2 ...`. Magic lines are interpreted by the kernel and
//! never forwarded to the driver.

/// Prefix marking a magic line.
pub const MAGIC_SENTINEL: &str = "//!";

/// A parsed magic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagicCommand {
    pub name: String,
    pub args: Vec<String>,
}

impl MagicCommand {
    /// Parse a line, returning `None` if it is not a magic line.
    ///
    /// A sentinel with nothing after it parses to an empty command name.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let body = line.strip_prefix(MAGIC_SENTINEL)?;
        let mut words = body.split_whitespace().map(str::to_string);
        Some(Self {
            name: words.next().unwrap_or_default(),
            args: words.collect(),
        })
    }
}

/// Separate magic lines from the rest of `text`.
///
/// Non-magic lines are returned verbatim, line terminators included, in
/// their original order.
#[must_use]
pub fn strip_magic(text: &str) -> (String, Vec<MagicCommand>) {
    let mut cleaned = String::with_capacity(text.len());
    let mut commands = Vec::new();

    for line in text.split_inclusive('\n') {
        match MagicCommand::parse(line) {
            Some(command) => commands.push(command),
            None => cleaned.push_str(line),
        }
    }

    (cleaned, commands)
}
