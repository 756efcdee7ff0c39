/// A chat command addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `play <query>`; the query may be empty, which is answered with usage.
    Play(String),
    Skip,
    Leave,
    Help,
}

impl Command {
    /// Parses `content` if it starts with `prefix` and names a known
    /// command. Command names are case-insensitive; the query keeps its case.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let rest = content.trim_start().strip_prefix(prefix)?;
        let rest = rest.trim();
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        match name.to_ascii_lowercase().as_str() {
            "play" | "p" => Some(Self::Play(args.to_string())),
            "skip" | "s" => Some(Self::Skip),
            "leave" | "stop" | "disconnect" => Some(Self::Leave),
            "help" => Some(Self::Help),
            _ => None,
        }
    }
}
