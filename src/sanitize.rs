use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // "On Mon, Jan 1, 2024 at 9:00 AM John wrote:" and everything quoted after it
    static ref QUOTED_REPLY: Regex = Regex::new(r"On\s.*wrote:[\s\S]*$").unwrap();
    static ref SIGNATURE: Regex = Regex::new(r"(?m)^--[\s\S]*$").unwrap();
}

/// Strip quoted reply chains and trailing signatures from a message body.
///
/// Reply removal runs first so a signature inside a quoted block is already
/// gone when the signature pass looks for `--`. The reply header match is a
/// heuristic for English clients; other formats pass through untouched.
pub fn clean(text: &str) -> String {
    let text = text.trim();
    let text = QUOTED_REPLY.replace(text, "");
    let text = SIGNATURE.replace(&text, "");
    text.trim().to_string()
}
