//! A line-level parser for obfuscator mapping files.
//!
//! A mapping file consists of unindented class lines, each followed by
//! indented member lines:
//!
//! ```text
//! com.example.Main -> a.a:
//!     java.lang.String name -> a
//!     12:14:void run(int):40:42 -> b
//! ```
//!
//! Lines are classified independently. Lines that cannot be classified are
//! reported with a non-fatal [`ParseErrorKind::Unrecognized`] so that newer
//! extensions of the format do not break parsing, while member lines that are
//! clearly broken (for example unbalanced parentheses) are reported with a
//! fatal kind.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

#[cfg(feature = "uuid")]
use uuid::Uuid;

/// Error when parsing a mapping line.
///
/// Since the mapping is parsed line-by-line, an error also contains the
/// offending line and its 1-based line number.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ParseError<'s> {
    pub(crate) line: &'s str,
    pub(crate) line_number: usize,
    pub(crate) kind: ParseErrorKind,
}

impl<'s> ParseError<'s> {
    /// The offending line that caused the error.
    pub fn line(&self) -> &'s str {
        self.line
    }

    /// The 1-based number of the offending line.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// The specific parse error.
    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line_number, self.kind)
    }
}

impl std::error::Error for ParseError<'_> {}

/// The specific parse error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    /// The line matches none of the known record shapes and can be skipped.
    #[error("line is not a valid mapping record")]
    Unrecognized,
    /// A member line with parentheses that do not form a single argument list.
    #[error("member line has unbalanced parentheses")]
    UnbalancedParentheses,
    /// A member line with malformed line numbers.
    #[error("member line has an invalid line range")]
    InvalidLineRange,
    /// A member line that appears before any class line.
    #[error("member line appears before any class mapping")]
    MemberWithoutClass,
}

impl ParseErrorKind {
    /// Whether a line with this error invalidates the whole mapping file.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ParseErrorKind::Unrecognized)
    }
}

/// Summary of a mapping file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappingSummary<'s> {
    compiler: Option<&'s str>,
    compiler_version: Option<&'s str>,
    min_api: Option<u32>,
    class_count: usize,
    method_count: usize,
}

impl<'s> MappingSummary<'s> {
    fn new(mapping: &Mapping<'s>) -> MappingSummary<'s> {
        let mut summary = MappingSummary::default();

        for record in mapping.iter().filter_map(Result::ok) {
            match record {
                MappingRecord::Header { key, value } => match key {
                    "compiler" => summary.compiler = value,
                    "compiler_version" => summary.compiler_version = value,
                    "min_api" => summary.min_api = value.and_then(|x| x.parse().ok()),
                    _ => {}
                },
                MappingRecord::Class { .. } => summary.class_count += 1,
                MappingRecord::Method { .. } => summary.method_count += 1,
                _ => {}
            }
        }

        summary
    }

    /// Returns the name of the compiler that created the mapping.
    pub fn compiler(&self) -> Option<&str> {
        self.compiler
    }

    /// Returns the version of the compiler.
    pub fn compiler_version(&self) -> Option<&str> {
        self.compiler_version
    }

    /// Returns the min-api value.
    pub fn min_api(&self) -> Option<u32> {
        self.min_api
    }

    /// Returns the number of classes in the mapping file.
    pub fn class_count(&self) -> usize {
        self.class_count
    }

    /// Returns the number of methods in the mapping file.
    pub fn method_count(&self) -> usize {
        self.method_count
    }
}

/// The raw text of a mapping file.
#[derive(Clone, Copy, Default)]
pub struct Mapping<'s> {
    source: &'s str,
}

impl fmt::Debug for Mapping<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping").finish()
    }
}

impl<'s> Mapping<'s> {
    /// Create a new Mapping over the given text.
    pub fn new(source: &'s str) -> Self {
        Self { source }
    }

    /// The underlying text.
    pub fn source(&self) -> &'s str {
        self.source
    }

    /// Whether the text looks like a mapping file.
    ///
    /// # Examples
    ///
    /// ```
    /// use retrace::Mapping;
    ///
    /// let valid = Mapping::new("a -> b:\n    void method() -> b");
    /// assert!(valid.is_valid());
    ///
    /// let invalid = Mapping::new("just some\ntext -> that is not\n");
    /// assert!(!invalid.is_valid());
    /// ```
    pub fn is_valid(&self) -> bool {
        // A class followed by a member within the first 50 records is a good
        // enough heuristic without reading the whole file.
        let mut has_class_line = false;
        for record in self.iter().take(50) {
            match record {
                Ok(MappingRecord::Class { .. }) => has_class_line = true,
                Ok(MappingRecord::Field { .. }) | Ok(MappingRecord::Method { .. })
                    if has_class_line =>
                {
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// Returns a summary of the file.
    pub fn summary(&self) -> MappingSummary<'s> {
        MappingSummary::new(self)
    }

    /// Whether the mapping file contains line info.
    ///
    /// # Examples
    ///
    /// ```
    /// use retrace::Mapping;
    ///
    /// let with = Mapping::new("a -> b:\n    1:1:void method() -> a");
    /// assert!(with.has_line_info());
    ///
    /// let without = Mapping::new("a -> b:\n    void method() -> b");
    /// assert!(!without.has_line_info());
    /// ```
    pub fn has_line_info(&self) -> bool {
        self.iter().filter_map(Result::ok).any(|record| {
            matches!(
                record,
                MappingRecord::Method {
                    obfuscated_range: Some(_),
                    ..
                }
            )
        })
    }

    /// Calculates the UUID of the mapping file.
    ///
    /// The UUID is generated from a file checksum.
    #[cfg(feature = "uuid")]
    pub fn uuid(&self) -> Uuid {
        lazy_static::lazy_static! {
            static ref NAMESPACE: Uuid = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"guardsquare.com");
        }
        Uuid::new_v5(&NAMESPACE, self.source.as_bytes())
    }

    /// Create an Iterator over [`MappingRecord`]s.
    ///
    /// Blank lines are skipped, every other line yields one item.
    pub fn iter(&self) -> MappingRecordIter<'s> {
        MappingRecordIter {
            lines: self.source.lines().enumerate(),
        }
    }

    /// Like [`iter`](Self::iter), but also yields the 1-based line number
    /// and raw text of every non-blank line.
    pub(crate) fn numbered_records(
        &self,
    ) -> impl Iterator<Item = (usize, &'s str, Result<MappingRecord<'s>, ParseErrorKind>)> {
        self.source
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| (index + 1, line, parse_mapping_record(line)))
    }
}

/// An Iterator yielding [`MappingRecord`]s, created by [`Mapping::iter`].
#[derive(Clone)]
pub struct MappingRecordIter<'s> {
    lines: std::iter::Enumerate<std::str::Lines<'s>>,
}

impl fmt::Debug for MappingRecordIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingRecordIter").finish()
    }
}

impl<'s> Iterator for MappingRecordIter<'s> {
    type Item = Result<MappingRecord<'s>, ParseError<'s>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (index, line) = self.lines.next()?;
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_mapping_record(line).map_err(|kind| ParseError {
                line,
                line_number: index + 1,
                kind,
            }));
        }
    }
}

/// An inclusive, 1-based range of line numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LineRange {
    /// First line of the range.
    pub start: usize,
    /// Last line of the range, inclusive.
    pub end: usize,
}

impl LineRange {
    /// Create a new range.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Whether `line` lies within this range.
    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }

    /// Whether `other` lies completely within this range.
    pub fn encloses(&self, other: &LineRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The number of lines covered, minus one.
    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Structured metadata written by R8 as JSON comments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum R8Header<'s> {
    /// The original source file of the preceding class.
    SourceFile {
        /// The file name, e.g. `Foobar.kt`.
        file_name: &'s str,
    },
    /// Any metadata this crate does not interpret.
    Other,
}

#[derive(Deserialize)]
struct R8Metadata<'s> {
    id: &'s str,
    #[serde(rename = "fileName", borrow, default)]
    file_name: Option<&'s str>,
}

impl<'s> R8Header<'s> {
    fn from_json(json: &'s str) -> Self {
        match serde_json::from_str::<R8Metadata<'s>>(json) {
            Ok(R8Metadata {
                id: "sourceFile",
                file_name: Some(file_name),
            }) => R8Header::SourceFile { file_name },
            _ => R8Header::Other,
        }
    }
}

/// A mapping file record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MappingRecord<'s> {
    /// A `# key: value` comment line.
    Header {
        /// The key of the header.
        key: &'s str,
        /// Optional value if the header is a key-value pair.
        value: Option<&'s str>,
    },
    /// A `# {...}` JSON metadata line.
    R8Header(R8Header<'s>),
    /// A class mapping.
    Class {
        /// Original name of the class.
        original: &'s str,
        /// Obfuscated name of the class.
        obfuscated: &'s str,
    },
    /// A field mapping.
    Field {
        /// Type of the field.
        ty: &'s str,
        /// Original name of the field.
        original: &'s str,
        /// Obfuscated name of the field.
        obfuscated: &'s str,
    },
    /// A method mapping.
    Method {
        /// Return type of the method.
        ty: &'s str,
        /// Original name of the method.
        original: &'s str,
        /// Obfuscated name of the method.
        obfuscated: &'s str,
        /// Arguments of the method as raw, comma separated string.
        arguments: &'s str,
        /// Original class of a method inlined from a foreign class.
        original_class: Option<&'s str>,
        /// Lines of the method in the obfuscated output.
        obfuscated_range: Option<LineRange>,
        /// Lines of the method in the original source.
        original_range: Option<LineRange>,
    },
}

impl<'s> MappingRecord<'s> {
    /// Parses a single line of a mapping file.
    ///
    /// # Examples
    ///
    /// ```
    /// use retrace::{LineRange, MappingRecord};
    ///
    /// let parsed = MappingRecord::try_parse("com.example.Main -> a.a:");
    /// assert_eq!(
    ///     parsed,
    ///     Ok(MappingRecord::Class {
    ///         original: "com.example.Main",
    ///         obfuscated: "a.a",
    ///     })
    /// );
    ///
    /// let parsed = MappingRecord::try_parse("    12:14:void run(int):40:42 -> b");
    /// assert_eq!(
    ///     parsed,
    ///     Ok(MappingRecord::Method {
    ///         ty: "void",
    ///         original: "run",
    ///         obfuscated: "b",
    ///         arguments: "int",
    ///         original_class: None,
    ///         obfuscated_range: Some(LineRange::new(12, 14)),
    ///         original_range: Some(LineRange::new(40, 42)),
    ///     })
    /// );
    /// ```
    pub fn try_parse(line: &'s str) -> Result<Self, ParseError<'s>> {
        parse_mapping_record(line).map_err(|kind| ParseError {
            line,
            line_number: 1,
            kind,
        })
    }
}

/// Parses a single, non-blank line of a mapping file.
fn parse_mapping_record(line: &str) -> Result<MappingRecord<'_>, ParseErrorKind> {
    let trimmed = line.trim_start();

    if let Some(comment) = trimmed.strip_prefix('#') {
        Ok(parse_header(comment))
    } else if trimmed.len() != line.len() {
        parse_member(trimmed)
    } else {
        parse_class(line)
    }
}

/// Parses the content of a comment line following the `#`.
fn parse_header(comment: &str) -> MappingRecord<'_> {
    let comment = comment.trim();
    if comment.starts_with('{') {
        return MappingRecord::R8Header(R8Header::from_json(comment));
    }

    match comment.split_once(':') {
        Some((key, value)) => MappingRecord::Header {
            key: key.trim(),
            value: Some(value.trim()),
        },
        None => MappingRecord::Header {
            key: comment,
            value: None,
        },
    }
}

/// Parses `originalclassname -> obfuscatedclassname:`.
fn parse_class(line: &str) -> Result<MappingRecord<'_>, ParseErrorKind> {
    let (original, rest) = line
        .split_once(" -> ")
        .ok_or(ParseErrorKind::Unrecognized)?;
    let obfuscated = rest
        .trim_end()
        .strip_suffix(':')
        .ok_or(ParseErrorKind::Unrecognized)?;

    if !is_name(original) || !is_name(obfuscated) {
        return Err(ParseErrorKind::Unrecognized);
    }

    Ok(MappingRecord::Class {
        original,
        obfuscated,
    })
}

/// Parses a field or method line with its indentation already removed.
fn parse_member(line: &str) -> Result<MappingRecord<'_>, ParseErrorKind> {
    // field line or method line:
    // `originalfieldtype originalfieldname -> obfuscatedfieldname`
    // `[startline:endline:]originalreturntype [originalclassname.]originalmethodname(originalargumenttype,...)[:originalstartline[:originalendline]] -> obfuscatedmethodname`
    let has_parens = check_parentheses(line)?;

    let (lhs, obfuscated) = line
        .split_once(" -> ")
        .ok_or(ParseErrorKind::Unrecognized)?;
    let obfuscated = obfuscated.trim();
    if !is_name(obfuscated) {
        return Err(ParseErrorKind::Unrecognized);
    }

    let (obfuscated_range, lhs) = parse_leading_range(lhs)?;

    let (ty, name_and_args) = lhs
        .split_once(' ')
        .ok_or(ParseErrorKind::Unrecognized)?;
    if ty.is_empty() {
        return Err(ParseErrorKind::Unrecognized);
    }

    if !has_parens {
        let original = name_and_args.trim();
        if obfuscated_range.is_some() || !is_name(original) {
            return Err(ParseErrorKind::Unrecognized);
        }
        return Ok(MappingRecord::Field {
            ty,
            original,
            obfuscated,
        });
    }

    let (open, close) = match (name_and_args.find('('), name_and_args.find(')')) {
        (Some(open), Some(close)) => (open, close),
        _ => return Err(ParseErrorKind::Unrecognized),
    };

    let qualified_name = name_and_args[..open].trim();
    let arguments = name_and_args[open + 1..close].trim();
    let original_range = parse_trailing_range(&name_and_args[close + 1..])?;

    let (original_class, original) = match qualified_name.rsplit_once('.') {
        Some((class, name)) => (Some(class), name),
        None => (None, qualified_name),
    };
    if original.is_empty() || original.contains(' ') {
        return Err(ParseErrorKind::Unrecognized);
    }

    Ok(MappingRecord::Method {
        ty,
        original,
        obfuscated,
        arguments,
        original_class,
        obfuscated_range,
        original_range: match original_range {
            // `:0:0` is written for inlined synthetic methods without lines.
            Some((0, _)) => None,
            Some((start, end)) => Some(LineRange::new(start, end.max(start))),
            None => obfuscated_range,
        },
    })
}

/// Whether the member line has an argument list.
///
/// A member line either has no parentheses at all or exactly one `(`
/// followed by exactly one `)`.
fn check_parentheses(line: &str) -> Result<bool, ParseErrorKind> {
    let mut open = line.match_indices('(').map(|(i, _)| i);
    let mut close = line.match_indices(')').map(|(i, _)| i);

    match (open.next(), close.next(), open.next(), close.next()) {
        (None, None, _, _) => Ok(false),
        (Some(open), Some(close), None, None) if open < close => Ok(true),
        _ => Err(ParseErrorKind::UnbalancedParentheses),
    }
}

/// Parses the optional `startline:endline:` prefix of a method line.
fn parse_leading_range(lhs: &str) -> Result<(Option<LineRange>, &str), ParseErrorKind> {
    if !lhs.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok((None, lhs));
    }

    let (start, rest) = parse_usize(lhs)?;
    let rest = rest
        .strip_prefix(':')
        .ok_or(ParseErrorKind::InvalidLineRange)?;
    let (end, rest) = parse_usize(rest)?;
    let rest = rest
        .strip_prefix(':')
        .ok_or(ParseErrorKind::InvalidLineRange)?;

    if start > end {
        return Err(ParseErrorKind::InvalidLineRange);
    }
    // `0:0:` is written for members without line information.
    let range = (end > 0).then(|| LineRange::new(start, end));

    Ok((range, rest))
}

/// Parses the optional `:originalstartline[:originalendline]` suffix
/// following the argument list.
fn parse_trailing_range(suffix: &str) -> Result<Option<(usize, usize)>, ParseErrorKind> {
    let suffix = suffix.trim_end();
    if suffix.is_empty() {
        return Ok(None);
    }

    let rest = suffix
        .strip_prefix(':')
        .ok_or(ParseErrorKind::InvalidLineRange)?;
    let (start, rest) = parse_usize(rest)?;
    let end = match rest.strip_prefix(':') {
        Some(rest) => {
            let (end, rest) = parse_usize(rest)?;
            if !rest.is_empty() {
                return Err(ParseErrorKind::InvalidLineRange);
            }
            end
        }
        None if rest.is_empty() => start,
        None => return Err(ParseErrorKind::InvalidLineRange),
    };

    Ok(Some((start, end)))
}

fn parse_usize(s: &str) -> Result<(usize, &str), ParseErrorKind> {
    let pos = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, rest) = s.split_at(pos);
    let value = digits
        .parse()
        .map_err(|_| ParseErrorKind::InvalidLineRange)?;
    Ok((value, rest))
}

/// A class, type or member name: non-empty and free of whitespace.
fn is_name(s: &str) -> bool {
    !s.is_empty() && !s.contains(char::is_whitespace)
}
