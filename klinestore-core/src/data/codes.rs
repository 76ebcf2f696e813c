//! Code lists: comma-separated arguments and one-code-per-line files.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

/// Parse a code list file body. Blank lines and `#` comments are ignored;
/// order is kept and repeats dropped.
pub fn parse_code_list(text: &str) -> Vec<String> {
    dedup(
        text.lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty()),
    )
}

pub fn read_code_file(path: &Path) -> io::Result<Vec<String>> {
    Ok(parse_code_list(&fs::read_to_string(path)?))
}

/// Split a `--codes a,b,c` argument.
pub fn split_code_arg(arg: &str) -> Vec<String> {
    dedup(arg.split(',').map(str::trim).filter(|c| !c.is_empty()))
}

fn dedup<'a>(codes: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    codes
        .filter(|c| seen.insert(*c))
        .map(str::to_string)
        .collect()
}
