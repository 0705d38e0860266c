//! Package-clause scanner
//!
//! Reads just enough of a Go source file to find the name in its leading
//! `package` clause: whitespace, line and block comments, the keyword, one
//! identifier and the terminating semicolon (explicit or implied by a newline).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackageClauseError {
    #[error("expected 'package' keyword")]
    MissingKeyword,
    #[error("expected package name")]
    MissingName,
    #[error("comment not terminated")]
    UnterminatedComment,
    #[error("expected ';' or newline after package clause")]
    MissingTerminator,
}

/// Returns the package name declared by `src`
pub fn package_name(src: &str) -> Result<&str, PackageClauseError> {
    let mut rest = src.strip_prefix('\u{feff}').unwrap_or(src);

    rest = skip_trivia(rest, true)?.0;
    rest = rest
        .strip_prefix("package")
        .filter(|after| !after.starts_with(is_ident_char))
        .ok_or(PackageClauseError::MissingKeyword)?;

    rest = skip_trivia(rest, true)?.0;
    let name_len = rest
        .char_indices()
        .find(|&(_, c)| !is_ident_char(c))
        .map_or(rest.len(), |(i, _)| i);
    let name = &rest[..name_len];
    if !name.starts_with(is_ident_start) {
        return Err(PackageClauseError::MissingName);
    }

    let (after, saw_newline) = skip_trivia(&rest[name_len..], false)?;
    if saw_newline || after.is_empty() || after.starts_with(';') {
        Ok(name)
    } else {
        Err(PackageClauseError::MissingTerminator)
    }
}

/// Skips whitespace and comments
///
/// With `cross_lines` unset, scanning stops at the first newline (a line comment
/// ends at one), and the flag in the result tells whether one was reached.
fn skip_trivia(mut s: &str, cross_lines: bool) -> Result<(&str, bool), PackageClauseError> {
    loop {
        let trimmed = s.trim_start_matches([' ', '\t', '\r']);
        if let Some(after) = trimmed.strip_prefix('\n') {
            if !cross_lines {
                return Ok((after, true));
            }
            s = after;
        } else if let Some(after) = trimmed.strip_prefix("//") {
            if !cross_lines {
                return Ok(("", true));
            }
            s = after.find('\n').map_or("", |i| &after[i + 1..]);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            let end = after
                .find("*/")
                .ok_or(PackageClauseError::UnterminatedComment)?;
            if !cross_lines && after[..end].contains('\n') {
                return Ok((&after[end + 2..], true));
            }
            s = &after[end + 2..];
        } else {
            return Ok((trimmed, false));
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_char(c: char) -> bool {
    is_ident_start(c) || c.is_numeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_clause() {
        assert_eq!(package_name("package main\n\nfunc main() {}\n"), Ok("main"));
        assert_eq!(package_name("package foo"), Ok("foo"));
        assert_eq!(package_name("package main; func main() {}"), Ok("main"));
    }

    #[test]
    fn test_leading_comments_and_bom() {
        let src = "\u{feff}// Copyright\n/* multi\nline */\n\tpackage   /* inline */ main // trailing\n";
        assert_eq!(package_name(src), Ok("main"));
    }

    #[test]
    fn test_unicode_and_blank_names() {
        assert_eq!(package_name("package café\n"), Ok("café"));
        assert_eq!(package_name("package _\n"), Ok("_"));
        assert_eq!(package_name("package x2\n"), Ok("x2"));
    }

    #[test]
    fn test_block_comment_with_newline_terminates_clause() {
        assert_eq!(package_name("package main /*\n*/ func"), Ok("main"));
        assert_eq!(
            package_name("package main /* same line */ func"),
            Err(PackageClauseError::MissingTerminator)
        );
    }

    #[test]
    fn test_malformed_clauses() {
        assert_eq!(package_name(""), Err(PackageClauseError::MissingKeyword));
        assert_eq!(
            package_name("func main() {}"),
            Err(PackageClauseError::MissingKeyword)
        );
        assert_eq!(
            package_name("packagemain\n"),
            Err(PackageClauseError::MissingKeyword)
        );
        assert_eq!(package_name("package\n"), Err(PackageClauseError::MissingName));
        assert_eq!(package_name("package 9lives\n"), Err(PackageClauseError::MissingName));
        assert_eq!(
            package_name("/* never closed"),
            Err(PackageClauseError::UnterminatedComment)
        );
        assert_eq!(
            package_name("package main func\n"),
            Err(PackageClauseError::MissingTerminator)
        );
    }
}
