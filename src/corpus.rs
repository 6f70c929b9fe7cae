use crate::config::Config;
use crate::text::fields;

/// One training line, borrowed from the line it was parsed from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Example<'a> {
    /// `skip<TAB>text`
    Skip { text: &'a str },
    /// `cls<TAB>tag<TAB>label<TAB>text`
    Cls {
        tag: &'a str,
        label: usize,
        text: &'a str,
    },
    /// `pair<TAB>tag<TAB>label<TAB>text_a<TAB>text_b`
    Pair {
        tag: &'a str,
        label: usize,
        a: &'a str,
        b: &'a str,
    },
}

impl<'a> Example<'a> {
    /// Classifies a line, which should already be trimmed and lower-cased.
    /// Lines of a disabled family, with the wrong number of fields, a label
    /// that isn't a non-negative integer, or an empty text give `None`.
    pub fn parse(line: &'a str, config: &Config) -> Option<Example<'a>> {
        let parts = fields(line);
        let label = |s: &str| s.parse::<usize>().ok();
        let example = match parts[..] {
            ["skip", text] if config.use_skipgram => Example::Skip { text },
            ["cls", tag, l, text] if config.use_cls => Example::Cls {
                tag,
                label: label(l)?,
                text,
            },
            ["pair", tag, l, a, b] if config.use_pair => Example::Pair {
                tag,
                label: label(l)?,
                a,
                b,
            },
            _ => return None,
        };
        let has_text = match &example {
            Example::Skip { text } | Example::Cls { text, .. } => !text.is_empty(),
            Example::Pair { a, b, .. } => !a.is_empty() && !b.is_empty(),
        };
        has_text.then_some(example)
    }

    /// The text that feeds the vocabulary; pairs join both sides with `" . "`.
    pub fn vocabulary_text(&self) -> String {
        match self {
            Example::Skip { text } | Example::Cls { text, .. } => text.to_string(),
            Example::Pair { a, b, .. } => format!("{a} . {b}"),
        }
    }
}
