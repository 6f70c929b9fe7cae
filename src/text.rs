/// Joins the tokens of an n-gram into a phrase symbol.
pub const PHRASE_SEPARATOR: &str = "_";

/// Strips spaces, tabs and line endings from both ends.
pub fn trim(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
}

/// Splits on single spaces, dropping empty pieces.
pub fn tokens(text: &str) -> Vec<&str> {
    text.split(' ').filter(|t| !t.is_empty()).collect()
}

pub fn join_ngram(tokens: &[&str]) -> String {
    tokens.join(PHRASE_SEPARATOR)
}

/// All n-grams of `2..=max_n` tokens, in order of starting position.
pub(crate) fn phrase_candidates(tokens: &[&str], max_n: usize) -> Vec<String> {
    let mut out = vec![];
    for i in 0..tokens.len() {
        for n in 2..=max_n {
            if i + n > tokens.len() {
                break;
            }
            out.push(join_ngram(&tokens[i..i + n]));
        }
    }
    out
}

/// Splits a line into TAB-separated fields, each trimmed.
pub(crate) fn fields(line: &str) -> Vec<&str> {
    line.split('\t').map(trim).collect()
}
