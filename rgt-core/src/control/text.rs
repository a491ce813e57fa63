//! Text control messages
//!
//! ```text
//! start := PARENT NODE (TEST|PACKAGE|SESSION) ["%s"] ["\"%s\""] [TIN n]
//!          [PAGE %s] [AUTHORS %s] [HASH %s] [ARGs %s]
//! end   := PARENT NODE (PASSED|KILLED|CORED|DUMPED|SKIPPED|FAKED|EMPTY|FAILED|INCOMPLETE|%s) [%s]
//! ```
//!
//! Every `%s` consumes the next record argument in order. The `ARGs`
//! argument is a list of `name="value"` pairs where `\"` and `\\` are the
//! only escapes.

use std::slice;
use std::sync::OnceLock;

use bytes::Bytes;
use regex::Regex;
use tracing::debug;

use super::{ControlEvent, NodeEnd};
use crate::error::{Result, RgtError};
use crate::flow::{NodeInfo, NodeType, Param, ResultStatus};
use crate::raw::RawRecord;

const START_KEYWORDS: [(&str, NodeType); 3] = [
    ("TEST", NodeType::Test),
    ("PACKAGE", NodeType::Package),
    ("SESSION", NodeType::Session),
];

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s+(\d+)[\d\s]*").expect("control header regex is valid"))
}

/// Clause scanner over one control message
struct Scanner<'a> {
    rest: &'a str,
    args: slice::Iter<'a, Bytes>,
    node_id: u32,
}

impl<'a> Scanner<'a> {
    fn error(&self, reason: impl Into<String>) -> RgtError {
        RgtError::BadControl {
            reason: reason.into(),
            node_id: Some(self.node_id),
            offset: None,
        }
    }

    fn skip_spaces(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, token: &str) -> bool {
        match self.rest.strip_prefix(token) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn next_arg(&mut self, what: &str) -> Result<String> {
        match self.args.next() {
            Some(arg) => Ok(String::from_utf8_lossy(arg).into_owned()),
            None => Err(self.error(format!("missing {} argument", what))),
        }
    }

    /// `KEYWORD %s` clause
    fn keyword_arg(&mut self, keyword: &str) -> Result<Option<String>> {
        if !self.eat(keyword) {
            return Ok(None);
        }
        self.skip_spaces();
        if !self.eat("%s") {
            return Err(self.error(format!("missing \"%s\" after {} clause", keyword)));
        }
        let value = self.next_arg(keyword)?;
        self.skip_spaces();
        Ok(Some(value))
    }
}

/// Parses the `PARENT NODE` header, returning ids and the remainder
pub(crate) fn parse_header(format: &str) -> Result<(u32, u32, &str)> {
    let unrecognized = || RgtError::BadControl {
        reason: format!("unrecognized control message \"{}\"", format),
        node_id: None,
        offset: None,
    };
    let caps = header_regex().captures(format).ok_or_else(unrecognized)?;
    let parent = caps[1].parse::<u32>().map_err(|_| unrecognized())?;
    let node = caps[2].parse::<u32>().map_err(|_| unrecognized())?;
    let consumed = caps.get(0).map_or(0, |m| m.end());
    Ok((parent, node, &format[consumed..]))
}

/// Parses a text control message
pub fn parse(record: &RawRecord) -> Result<ControlEvent> {
    let format = record.format();
    let (parent_id, node_id, rest) = parse_header(&format)?;
    let mut scanner = Scanner {
        rest,
        args: record.args().iter(),
        node_id,
    };

    if let Some((keyword, node_type)) = START_KEYWORDS
        .iter()
        .find(|(keyword, _)| scanner.rest.starts_with(keyword))
    {
        scanner.rest = &scanner.rest[keyword.len()..];
        let mut info = NodeInfo::new(*node_type, parent_id, node_id, record.timestamp);
        info.start_offset = record.offset;
        parse_start_clauses(&mut scanner, &mut info)?;
        return Ok(ControlEvent::Start(info));
    }

    let status = parse_status(&mut scanner)?;
    scanner.skip_spaces();
    let mut error = None;
    if !scanner.rest.is_empty() {
        if scanner.rest != "%s" {
            return Err(scanner.error(format!(
                "only %s may follow the status in \"{}\"",
                format
            )));
        }
        error = Some(scanner.next_arg("error string")?);
    }

    Ok(ControlEvent::End(NodeEnd {
        parent_id,
        node_id,
        status,
        error: error.filter(|_| status != ResultStatus::Passed),
    }))
}

fn parse_status(scanner: &mut Scanner<'_>) -> Result<ResultStatus> {
    let at_word_end = |rest: &str, len: usize| rest[len..].chars().next().map_or(true, char::is_whitespace);

    if scanner.rest.starts_with("%s") && at_word_end(scanner.rest, 2) {
        scanner.rest = &scanner.rest[2..];
        let word = scanner.next_arg("status")?;
        return ResultStatus::from_keyword(&word)
            .filter(|_| word.bytes().all(|b| b.is_ascii_uppercase()))
            .ok_or_else(|| scanner.error(format!("unexpected status '{}'", word)));
    }

    for (keyword, status) in ResultStatus::keywords() {
        if scanner.rest.starts_with(keyword) && at_word_end(scanner.rest, keyword.len()) {
            scanner.rest = &scanner.rest[keyword.len()..];
            return Ok(status);
        }
    }
    Err(scanner.error(format!("unknown control event in \"{}\"", scanner.rest)))
}

fn parse_start_clauses(scanner: &mut Scanner<'_>, info: &mut NodeInfo) -> Result<()> {
    scanner.skip_spaces();

    if scanner.rest.starts_with("%s") {
        scanner.rest = &scanner.rest[2..];
        info.name = Some(scanner.next_arg("name")?);
        scanner.skip_spaces();
    }

    if scanner.eat("\"%s\"") {
        let objective = scanner.next_arg("objective")?;
        info.objective = Some(objective).filter(|o| !o.is_empty());
        scanner.skip_spaces();
    }

    if scanner.eat("TIN") {
        scanner.skip_spaces();
        let digits = scanner.rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(scanner.error("missing test identification number after TIN"));
        }
        let tin = scanner.rest[..digits]
            .parse::<u32>()
            .map_err(|_| scanner.error("test identification number out of range"))?;
        info.tin = Some(tin);
        scanner.rest = &scanner.rest[digits..];
        scanner.skip_spaces();
    }

    info.page = scanner.keyword_arg("PAGE")?.map(|p| p.trim_start().to_string());
    if let Some(authors) = scanner.keyword_arg("AUTHORS")? {
        info.authors = split_authors(&authors);
    }
    info.hash = scanner.keyword_arg("HASH")?;
    if let Some(list) = scanner.keyword_arg("ARGs")? {
        info.params = parse_params(&list).map_err(|reason| {
            scanner.error(format!(
                "parameters of {} \"{}\": {}",
                info.node_type,
                info.display_name(),
                reason
            ))
        })?;
    }

    if !scanner.rest.is_empty() {
        debug!(node = info.id, rest = scanner.rest, "ignoring trailing control clauses");
    }
    Ok(())
}

/// Splits `mailto:a@b mailto:c@d` into addresses
pub(crate) fn split_authors(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| word.strip_prefix("mailto:").unwrap_or(word).to_string())
        .filter(|word| !word.is_empty())
        .collect()
}

/// Parses `name="value" name2="va\"lue"`
pub fn parse_params(list: &str) -> std::result::Result<Vec<Param>, String> {
    let mut params = Vec::new();
    let mut rest = list;
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            return Ok(params);
        }
        let eq = rest
            .find('=')
            .ok_or_else(|| format!("'{}' has no '='", rest))?;
        let name = rest[..eq].to_string();
        let Some(quoted) = rest[eq + 1..].strip_prefix('"') else {
            return Err(format!("value of '{}' does not start with a quote", name));
        };

        let mut value = String::new();
        let mut chars = quoted.char_indices();
        let end = loop {
            match chars.next() {
                None => return Err(format!("value of '{}' has no trailing quotation mark", name)),
                Some((i, '"')) => break i,
                Some((_, '\\')) => match chars.next() {
                    Some((_, c @ ('\\' | '"'))) => value.push(c),
                    Some((_, c)) => {
                        return Err(format!("value of '{}' has back slash followed by '{}'", name, c))
                    }
                    None => {
                        return Err(format!("value of '{}' has no trailing quotation mark", name))
                    }
                },
                Some((_, c)) => value.push(c),
            }
        };
        params.push(Param { name, value });
        rest = &quoted[end + 1..];
    }
}
