//! Composable text extraction, used to scrape tokens out of container logs.

/// One extraction step. Negative indices count from the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extractor {
    /// The `n`th line containing `needle`.
    Line { needle: String, n: isize },
    /// The `n`th whitespace-delimited word.
    Word { n: isize },
    /// Apply each extractor to the previous result.
    Chain(Vec<Extractor>),
}

impl Extractor {
    pub fn line(needle: impl Into<String>, n: isize) -> Self {
        Self::Line {
            needle: needle.into(),
            n,
        }
    }

    #[must_use]
    pub const fn word(n: isize) -> Self {
        Self::Word { n }
    }

    /// Run the extractor; `None` if any stage fails to match.
    #[must_use]
    pub fn extract(&self, text: &str) -> Option<String> {
        match self {
            Self::Line { needle, n } => {
                let lines: Vec<&str> = text.lines().filter(|l| l.contains(needle.as_str())).collect();
                pick(&lines, *n).map(ToString::to_string)
            }
            Self::Word { n } => {
                let words: Vec<&str> = text.split_whitespace().collect();
                pick(&words, *n).map(ToString::to_string)
            }
            Self::Chain(steps) => steps
                .iter()
                .try_fold(text.to_string(), |acc, step| step.extract(&acc)),
        }
    }
}

fn pick<'a>(items: &[&'a str], n: isize) -> Option<&'a str> {
    let index = if n < 0 {
        items.len().checked_sub(n.unsigned_abs())?
    } else {
        n.unsigned_abs()
    };
    items.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
[I 10:00:01 ServerApp] Jupyter Server 2.7.0 is running at:
[I 10:00:01 ServerApp] http://abc123:8888/lab?token=first
[I 10:00:01 ServerApp]     http://127.0.0.1:8888/lab?token=second
";

    #[test]
    fn test_line_indices() {
        let first = Extractor::line("token=", 0).extract(LOG).unwrap();
        assert!(first.ends_with("token=first"));
        let last = Extractor::line("token=", -1).extract(LOG).unwrap();
        assert!(last.ends_with("token=second"));
        assert!(Extractor::line("token=", 2).extract(LOG).is_none());
        assert!(Extractor::line("token=", -3).extract(LOG).is_none());
        assert!(Extractor::line("password", 0).extract(LOG).is_none());
    }

    #[test]
    fn test_word_indices() {
        assert_eq!(Extractor::word(1).extract("a  b\tc").as_deref(), Some("b"));
        assert_eq!(Extractor::word(-1).extract("a b c").as_deref(), Some("c"));
        assert!(Extractor::word(0).extract("   ").is_none());
    }

    #[test]
    fn test_chain() {
        let chain = Extractor::Chain(vec![Extractor::line("token=", -1), Extractor::word(-1)]);
        assert_eq!(
            chain.extract(LOG).as_deref(),
            Some("http://127.0.0.1:8888/lab?token=second")
        );

        let broken = Extractor::Chain(vec![Extractor::line("nope", 0), Extractor::word(0)]);
        assert!(broken.extract(LOG).is_none());
    }
}
