use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::layers::Catalog;
use crate::real;
use crate::rng::Rng;
use crate::session::Session;
use crate::text::{tokens, trim};

fn prompt(catalog: Catalog) {
    let name = match catalog {
        Catalog::All => "_all",
        Catalog::Words => "_word",
        Catalog::Phrases => "_phrase",
    };
    eprint!("---------------- {name} (_all / _word / _phrase) input word ('exit' to quit): ");
    let _ = io::stderr().flush();
}

impl Session {
    /// Nearest-neighbour queries, one per input line, until `exit` or EOF.
    pub fn distance(&self, input: impl BufRead, mut output: impl Write) -> Result<()> {
        let lexicon = &self.net.lexicon;
        let mut catalog = Catalog::All;
        prompt(catalog);
        for line in input.lines() {
            let line = line.context("failed to read query")?;
            let query = trim(&line);
            if let Some(c) = Catalog::from_command(query) {
                catalog = c;
            } else if query == "exit" {
                break;
            } else {
                let rows = lexicon.lookup_all(&tokens(query));
                if !rows.is_empty() {
                    let mut heap = self.net.input.nearest(&rows, lexicon, catalog);
                    let mut shown = 0;
                    while shown < self.config().top_size {
                        let Some((sim, row)) = heap.pop() else {
                            break;
                        };
                        let text = &lexicon.symbol(row).text;
                        if text != query {
                            writeln!(output, "{text}\t\t{}", sim.0)?;
                            shown += 1;
                        }
                    }
                    output.flush()?;
                }
            }
            prompt(catalog);
        }
        Ok(())
    }

    /// Rewrites one `cls` or `pair` line with its prediction filled in.
    ///
    /// A `cls` line gets its label and probability replaced, or `-1` and `0`
    /// when its tag has no task. A text that resolves to nothing keeps its
    /// label and gets probability `-1`. A `pair` line gets the score, or
    /// `-1`, in its label field. Anything else comes back unchanged.
    pub fn predict_line(&self, line: &str) -> String {
        let parts: Vec<&str> = line.split('\t').collect();
        match parts[..] {
            ["cls", tag, label, text] => {
                let (tag, text) = (trim(tag), trim(text));
                let rows = self.resolve(text, &mut Rng(1));
                let (label, prob) = if rows.is_empty() {
                    (label.to_string(), "-1".to_string())
                } else {
                    let best = self.cls.get(tag).and_then(|trainer| {
                        trainer
                            .predict_distribution(&self.net, &rows)
                            .first()
                            .copied()
                    });
                    match best {
                        Some((label, prob)) => (label.to_string(), prob.to_string()),
                        None => ("-1".to_string(), "0".to_string()),
                    }
                };
                format!("cls\t{tag}\t{label}\t{prob}\t{text}")
            }
            ["pair", tag, _, a, b] => {
                let (tag, a, b) = (trim(tag), trim(a), trim(b));
                let score = match self.predict_pair(tag, a, b) {
                    Some(score) => score.to_string(),
                    None => "-1".to_string(),
                };
                format!("pair\t{tag}\t{score}\t{a}\t{b}")
            }
            _ => line.to_string(),
        }
    }

    /// Predicts every input line, lower-cased, and writes the results.
    pub fn predict(&self, input: impl BufRead, mut output: impl Write) -> Result<()> {
        info!("predicting");
        for line in input.lines() {
            let line = line.context("failed to read input")?;
            let line = trim(&line).to_ascii_lowercase();
            if line.is_empty() {
                continue;
            }
            writeln!(output, "{}", self.predict_line(&line))?;
        }
        output.flush()?;
        Ok(())
    }

    /// The averaged word and phrase embedding of a text, or `None` if no
    /// part of it is in the vocabulary.
    pub fn sentence_vector(&self, text: &str) -> Option<Vec<real>> {
        let rows = self.net.resolve_plain(text);
        if rows.is_empty() {
            return None;
        }
        let mut v = vec![0.0; self.net.dim()];
        self.net.input.read_averaged(&rows, &mut v);
        Some(v)
    }

    /// Writes `line<TAB>vector` for every input line that resolves to
    /// something.
    pub fn sentence_vec(&self, input: impl BufRead, mut output: impl Write) -> Result<()> {
        for line in input.lines() {
            let line = line.context("failed to read input")?;
            let line = trim(&line);
            let Some(v) = self.sentence_vector(line) else {
                continue;
            };
            let v: Vec<String> = v.iter().map(|x| x.to_string()).collect();
            writeln!(output, "{line}\t{}", v.join(" "))?;
        }
        output.flush()?;
        Ok(())
    }
}
