//! Line and token helpers shared by the text formats.

use std::str::FromStr;

/// Lines of a text model file with their 1-based numbers.
pub(crate) struct LineReader<'a> {
    lines: std::str::Lines<'a>,
    line: usize,
    num_lines: usize,
}

impl<'a> LineReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(data).map_err(|e| format!("not valid UTF-8: {e}"))?;
        Ok(Self {
            lines: text.lines(),
            line: 0,
            num_lines: text.lines().count(),
        })
    }

    pub(crate) fn line(&self) -> usize {
        self.line
    }

    /// A count declared by the file, checked against its length: every counted record takes at
    /// least one line. Negative counts read as zero.
    pub(crate) fn declared(&self, n: i64, what: &str) -> Result<usize, String> {
        let n = usize::try_from(n).unwrap_or(0);
        if n > self.num_lines {
            return Err(format!("{what} {n} exceeds the {} lines of the file", self.num_lines));
        }
        Ok(n)
    }

    /// Next raw line.
    pub(crate) fn next_line(&mut self) -> Option<&'a str> {
        let l = self.lines.next()?;
        self.line += 1;
        Some(l)
    }

    /// Next line that is neither blank nor a `#`, `;` or `//` comment.
    pub(crate) fn next_content(&mut self) -> Option<&'a str> {
        loop {
            let l = self.next_line()?;
            if !is_comment(l) {
                return Some(l);
            }
        }
    }

    pub(crate) fn error(&self, message: impl std::fmt::Display) -> String {
        format!("line {}: {}", self.line, message)
    }
}

pub(crate) fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.is_empty() || t.starts_with('#') || t.starts_with(';') || t.starts_with("//")
}

/// Splits a line into words. Quoted strings are one token (without quotes), brackets and
/// braces are tokens of their own, and everything after `//` is ignored.
#[derive(Clone)]
pub(crate) struct Tokens<'a> {
    rest: &'a str,
}

pub(crate) fn tokens(line: &str) -> Tokens<'_> {
    Tokens { rest: line }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let s = self.rest.trim_start();
        if s.is_empty() || s.starts_with("//") {
            self.rest = "";
            return None;
        }
        if let Some(quoted) = s.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            self.rest = quoted.get(end + 1..).unwrap_or("");
            return Some(&quoted[..end]);
        }
        let first = s.chars().next()?;
        if matches!(first, '(' | ')' | '{' | '}') {
            self.rest = &s[1..];
            return Some(&s[..1]);
        }
        let end = s
            .find(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '{' | '}' | '"'))
            .unwrap_or(s.len());
        self.rest = &s[end..];
        Some(&s[..end])
    }
}

impl<'a> Tokens<'a> {
    pub(crate) fn parse<T: FromStr>(&mut self, what: &str) -> Result<T, String> {
        let tok = self.next().ok_or_else(|| format!("missing {what}"))?;
        tok.parse()
            .map_err(|_| format!("invalid {what} '{tok}'"))
    }

    pub(crate) fn expect(&mut self, tok: &str) -> Result<(), String> {
        match self.next() {
            Some(t) if t == tok => Ok(()),
            Some(t) => Err(format!("expected '{tok}', found '{t}'")),
            None => Err(format!("expected '{tok}'")),
        }
    }

    pub(crate) fn vec3(&mut self, what: &str) -> Result<glam::Vec3, String> {
        Ok(glam::Vec3::new(
            self.parse(what)?,
            self.parse(what)?,
            self.parse(what)?,
        ))
    }

    /// `( x y z )`
    pub(crate) fn bracketed_vec3(&mut self, what: &str) -> Result<glam::Vec3, String> {
        self.expect("(")?;
        let v = self.vec3(what)?;
        self.expect(")")?;
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_quotes_and_brackets() {
        let toks: Vec<_> = tokens(r#"  "Bip01 Head" 3 ( 1 2 3 ) (0.5 0 0) // trailing"#).collect();
        assert_eq!(
            toks,
            ["Bip01 Head", "3", "(", "1", "2", "3", ")", "(", "0.5", "0", "0", ")"]
        );
    }

    #[test]
    fn skips_comment_lines() {
        let mut r = LineReader::new(b"# one\n\n; two\n// three\nversion 1\n").unwrap();
        assert_eq!(r.next_content(), Some("version 1"));
        assert_eq!(r.line(), 5);
        assert_eq!(r.next_content(), None);
    }

    #[test]
    fn declared_counts_are_bounded_by_the_line_count() {
        let r = LineReader::new(b"a\nb\nc\n").unwrap();
        assert_eq!(r.declared(3, "numverts"), Ok(3));
        assert_eq!(r.declared(-2, "numverts"), Ok(0));
        assert!(r.declared(4, "numverts").is_err());
    }
}
