//! Streaming deobfuscation of stack trace text.

use std::borrow::Cow;
use std::fmt;
use std::io::{BufRead, Write};
use std::ops::Range;

use serde::Serialize;
use tracing::debug;

use crate::error::Error;
use crate::mapper::{Mapper, ResolvedFrame};
use crate::stacktrace::{self, FrameLine, NATIVE_METHOD, UNKNOWN_SOURCE};
use crate::utils::synthesize_source_file;

/// Options controlling the output of a [`Retracer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetraceOptions {
    /// Print the return type and argument types of every method.
    pub verbose: bool,
}

impl RetraceOptions {
    /// Sets whether full method signatures are printed.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Counts of frames that could not be retraced exactly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Warnings {
    /// Frames whose class or method is not part of the mapping.
    pub unresolved: usize,
    /// Frames that matched more than one original method.
    pub ambiguous: usize,
}

impl Warnings {
    /// Whether every frame was resolved unambiguously.
    pub fn is_empty(&self) -> bool {
        self.unresolved == 0 && self.ambiguous == 0
    }
}

/// The result of retracing a complete stack trace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Retraced {
    /// The deobfuscated text, one `\n` terminated line per output line.
    pub output: String,
    /// Frames that could not be retraced exactly.
    pub warnings: Warnings,
}

/// Translates stack trace lines using a [`Mapper`].
///
/// Every line is translated on its own, so input can be streamed.
///
/// # Examples
///
/// ```
/// use retrace::{Mapper, RetraceOptions, Retracer};
///
/// let mapping = "\
/// com.example.Main -> a:
///     10:20:void run():5:5 -> a
/// ";
/// let mapper = Mapper::parse(mapping).unwrap();
/// let retracer = Retracer::new(&mapper, RetraceOptions::default());
///
/// let retraced = retracer
///     .retrace_str("java.lang.IllegalStateException\n    at a.a(SourceFile:15)\n")
///     .unwrap();
/// assert_eq!(
///     retraced.output,
///     "java.lang.IllegalStateException\n    at com.example.Main.run(Main.java:5)\n"
/// );
/// assert!(retraced.warnings.is_empty());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Retracer<'a, 's> {
    mapper: &'a Mapper<'s>,
    options: RetraceOptions,
}

impl<'a, 's> Retracer<'a, 's> {
    /// Create a new Retracer.
    pub fn new(mapper: &'a Mapper<'s>, options: RetraceOptions) -> Self {
        Self { mapper, options }
    }

    /// Retraces a single line, writing one or more `\n` terminated lines.
    pub fn retrace_line(
        &self,
        line: &str,
        out: &mut impl fmt::Write,
        warnings: &mut Warnings,
    ) -> fmt::Result {
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(frame_line) = FrameLine::try_parse(line) {
            return self.retrace_frame(&frame_line, out, warnings);
        }

        if let Some(rewritten) = self.remap_message_members(line) {
            out.write_str(&rewritten)?;
            return out.write_char('\n');
        }

        match circular_reference(line) {
            Some(inner) => {
                out.write_str(&line[..inner.start])?;
                self.remap_text(&line[inner.clone()], out)?;
                out.write_str(&line[inner.end..])?;
            }
            None => self.remap_text(line, out)?,
        }
        out.write_char('\n')
    }

    /// Retraces a complete stack trace held in memory.
    pub fn retrace_str(&self, input: &str) -> Result<Retraced, Error> {
        let mut retraced = Retraced {
            output: String::with_capacity(input.len()),
            warnings: Warnings::default(),
        };

        for line in input.lines() {
            self.retrace_line(line, &mut retraced.output, &mut retraced.warnings)?;
        }

        Ok(retraced)
    }

    /// Retraces a stack trace line by line from `input` to `output`.
    pub fn retrace_stream(
        &self,
        input: impl BufRead,
        mut output: impl Write,
    ) -> Result<Warnings, Error> {
        let mut warnings = Warnings::default();
        let mut buffer = String::new();

        for line in input.lines() {
            let line = line?;
            buffer.clear();
            self.retrace_line(&line, &mut buffer, &mut warnings)?;
            output.write_all(buffer.as_bytes())?;
        }
        output.flush()?;

        debug!(
            unresolved = warnings.unresolved,
            ambiguous = warnings.ambiguous,
            "finished retracing"
        );
        Ok(warnings)
    }

    fn retrace_frame(
        &self,
        frame_line: &FrameLine<'_>,
        out: &mut impl fmt::Write,
        warnings: &mut Warnings,
    ) -> fmt::Result {
        let frame = frame_line.frame();
        let resolved = self.mapper.remap_frame(frame);

        if resolved.len() == 0 {
            debug!(
                class = frame.class(),
                method = frame.method(),
                "frame could not be resolved"
            );
            warnings.unresolved += 1;
            let class = self
                .mapper
                .remap_class(frame.class())
                .unwrap_or(frame.class());
            return writeln!(
                out,
                "{}{}.{}{}{}",
                frame_line.prefix(),
                class,
                frame.method(),
                frame_line.location(),
                frame_line.suffix()
            );
        }

        if resolved.is_ambiguous() {
            warnings.ambiguous += 1;
        }

        // The JVM knows these locations better than the mapping does.
        let kept_file = frame
            .file()
            .filter(|&file| file == NATIVE_METHOD || file == UNKNOWN_SOURCE);

        for resolved_frame in resolved {
            let file = match kept_file.or(resolved_frame.file()) {
                Some(file) => Cow::Borrowed(file),
                None => Cow::Owned(synthesize_source_file(resolved_frame.class())),
            };

            write!(out, "{}{}.", frame_line.prefix(), resolved_frame.class())?;
            self.write_method(&resolved_frame, out)?;
            match resolved_frame.line().filter(|_| !frame.is_native()) {
                Some(line) => write!(out, "({}:{})", file, line)?,
                None => write!(out, "({})", file)?,
            }
            writeln!(out, "{}", frame_line.suffix())?;
        }

        Ok(())
    }

    fn write_method(&self, frame: &ResolvedFrame<'_>, out: &mut impl fmt::Write) -> fmt::Result {
        if !self.options.verbose {
            return out.write_str(frame.method());
        }

        write!(out, "{} {}(", frame.return_type(), frame.method())?;
        for (index, argument) in frame.arguments().iter().enumerate() {
            if index > 0 {
                out.write_char(',')?;
            }
            out.write_str(argument)?;
        }
        out.write_char(')')
    }

    /// Writes text that is not a frame, remapping the thrown class and any
    /// dotted class names.
    fn remap_text(&self, text: &str, out: &mut impl fmt::Write) -> fmt::Result {
        match self.thrown_class(text) {
            Some((range, original)) => {
                self.remap_tokens(&text[..range.start], out)?;
                out.write_str(original)?;
                self.remap_tokens(&text[range.end..], out)
            }
            None => self.remap_tokens(text, out),
        }
    }

    /// Finds the exception class of a throwable line.
    ///
    /// The class either starts the line, possibly after `Caused by: ` or
    /// `Suppressed: `, or follows a `:` or `"` and whitespace, as in
    /// `Exception in thread "main" a: boom`. It runs up to the next `:` or the
    /// end of the line. The first known class wins.
    fn thrown_class(&self, text: &str) -> Option<(Range<usize>, &'s str)> {
        if let Some(header) = stacktrace::parse_throwable_line(text) {
            let class = header.throwable.class;
            if let Some(original) = self.mapper.remap_class(class) {
                let start = header.prefix.len();
                return Some((start..start + class.len(), original));
            }
        }

        text.match_indices([':', '"']).find_map(|(index, _)| {
            let after = &text[index + 1..];
            let candidate = after.trim_start();
            if candidate.len() == after.len() {
                return None;
            }
            let class = candidate.split(':').next().unwrap_or(candidate);
            if class.is_empty() || class.contains(|c: char| c.is_whitespace() || c == '"') {
                return None;
            }
            let original = self.mapper.remap_class(class)?;
            let start = text.len() - candidate.len();
            Some((start..start + class.len(), original))
        })
    }

    /// Rewrites the members and classes named by the messages of
    /// `NullPointerException` and `ClassCastException`.
    ///
    /// Returns `None` if the line names no known member or class.
    fn remap_message_members(&self, line: &str) -> Option<String> {
        let mut edits: Vec<(Range<usize>, String)> = MEMBER_REFERENCES
            .iter()
            .filter_map(|reference| {
                let start = line.find(reference.opening)? + reference.opening.len();
                let len = line[start..].find(reference.closing)?;
                let remapped = self.remap_member_reference(&line[start..start + len], reference)?;
                Some((start..start + len, remapped))
            })
            .collect();
        self.class_cast_edits(line, &mut edits);

        if edits.is_empty() {
            return None;
        }
        edits.sort_by_key(|(range, _)| range.start);

        let mut rewritten = String::with_capacity(line.len());
        let mut position = 0;
        for (range, replacement) in edits {
            if range.start < position {
                continue;
            }
            rewritten.push_str(&line[position..range.start]);
            rewritten.push_str(&replacement);
            position = range.end;
        }
        rewritten.push_str(&line[position..]);
        Some(rewritten)
    }

    /// Remaps a reference like `void a.b(c,int)` or `a.b`.
    fn remap_member_reference(&self, text: &str, reference: &MemberReference) -> Option<String> {
        let (ty, qualified) = if reference.typed {
            let (ty, qualified) = text.split_once(' ')?;
            (Some(ty), qualified)
        } else {
            (None, text)
        };
        let (qualified, arguments) = if reference.method {
            let (qualified, arguments) = qualified.split_once('(')?;
            (qualified, Some(arguments.strip_suffix(')')?))
        } else {
            (qualified, None)
        };
        let (class, member) = qualified.rsplit_once('.')?;

        let remapped = if reference.method {
            self.mapper.remap_method(class, member)
        } else {
            self.mapper.remap_field(class, member)
        };
        let (class, member): (&str, &str) = match remapped {
            Some(found) => found,
            None => (self.mapper.remap_class(class)?, member),
        };

        let mut rewritten = String::with_capacity(text.len());
        if let Some(ty) = ty {
            rewritten.push_str(&self.remap_type(ty).unwrap_or_else(|| ty.to_owned()));
            rewritten.push(' ');
        }
        rewritten.push_str(class);
        rewritten.push('.');
        rewritten.push_str(member);
        if let Some(arguments) = arguments {
            rewritten.push('(');
            for (index, argument) in arguments.split(',').enumerate() {
                if index > 0 {
                    rewritten.push(',');
                }
                let name = argument.trim();
                let leading = argument.len() - argument.trim_start().len();
                rewritten.push_str(&argument[..leading]);
                rewritten.push_str(&self.remap_type(name).unwrap_or_else(|| name.to_owned()));
                rewritten.push_str(&argument[leading + name.len()..]);
            }
            rewritten.push(')');
        }
        Some(rewritten)
    }

    /// Collects the classes of `x cannot be cast to y`.
    fn class_cast_edits(&self, line: &str, edits: &mut Vec<(Range<usize>, String)>) {
        let Some(found) = line.find(CLASS_CAST_EXCEPTION) else {
            return;
        };
        let message = found + CLASS_CAST_EXCEPTION.len();
        let Some(cast) = line[message..].find(CANNOT_BE_CAST) else {
            return;
        };
        let cast = message + cast;

        let source = (message + class_keyword_len(&line[message..])).min(cast);
        let target = cast + CANNOT_BE_CAST.len();
        let target = target + class_keyword_len(&line[target..]);
        let target_end = line[target..]
            .find(char::is_whitespace)
            .map_or(line.len(), |len| target + len);

        for range in [source..cast, target..target_end] {
            if let Some(original) = self.remap_type(&line[range.clone()]) {
                edits.push((range, original));
            }
        }
    }

    /// Remaps a possibly array-typed class name.
    fn remap_type(&self, name: &str) -> Option<String> {
        let class = name.trim_end_matches("[]");
        let original = self.mapper.remap_class(class)?;
        Some(format!("{}{}", original, &name[class.len()..]))
    }

    /// Replaces every dotted token that is a known obfuscated class name.
    fn remap_tokens(&self, text: &str, out: &mut impl fmt::Write) -> fmt::Result {
        let mut start = 0;
        for (index, c) in text.char_indices() {
            if is_delimiter(c) {
                self.write_token(&text[start..index], out)?;
                out.write_char(c)?;
                start = index + c.len_utf8();
            }
        }
        self.write_token(&text[start..], out)
    }

    fn write_token(&self, token: &str, out: &mut impl fmt::Write) -> fmt::Result {
        // A sentence may end right after a class name.
        let (name, period) = match token.strip_suffix('.') {
            Some(name) => (name, "."),
            None => (token, ""),
        };
        match self.mapper.remap_class(name).filter(|_| name.contains('.')) {
            Some(original) => {
                out.write_str(original)?;
                out.write_str(period)
            }
            None => out.write_str(token),
        }
    }
}

/// A member named in quotes by an exception message.
struct MemberReference {
    opening: &'static str,
    closing: char,
    method: bool,
    /// Whether the member is preceded by its type, as in `int a.b`.
    typed: bool,
}

const MEMBER_REFERENCES: &[MemberReference] = &[
    MemberReference {
        opening: "Attempt to invoke virtual method '",
        closing: '\'',
        method: true,
        typed: true,
    },
    MemberReference {
        opening: "Attempt to invoke interface method '",
        closing: '\'',
        method: true,
        typed: true,
    },
    MemberReference {
        opening: "Attempt to read from field '",
        closing: '\'',
        method: false,
        typed: true,
    },
    MemberReference {
        opening: "Attempt to write to field '",
        closing: '\'',
        method: false,
        typed: true,
    },
    MemberReference {
        opening: "Cannot invoke \"",
        closing: '"',
        method: true,
        typed: false,
    },
    MemberReference {
        opening: "because the return value of \"",
        closing: '"',
        method: true,
        typed: false,
    },
    MemberReference {
        opening: "because \"",
        closing: '"',
        method: false,
        typed: false,
    },
];

const CLASS_CAST_EXCEPTION: &str = "java.lang.ClassCastException: ";
const CANNOT_BE_CAST: &str = " cannot be cast to ";
const CIRCULAR_REFERENCE: &str = "[CIRCULAR REFERENCE: ";

/// Newer JVMs write `class a cannot be cast to class b`.
fn class_keyword_len(text: &str) -> usize {
    if text.starts_with("class ") {
        "class ".len()
    } else {
        0
    }
}

/// The range of the throwable text in `[CIRCULAR REFERENCE: a: boom]`.
fn circular_reference(line: &str) -> Option<Range<usize>> {
    let inner = line.trim_start().strip_prefix(CIRCULAR_REFERENCE)?;
    let len = inner.find(']')?;
    let start = line.len() - inner.len();
    Some(start..start + len)
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || "[]{}()/\\:;,'\"<>".contains(c)
}

/// Retraces a stack trace with the given mapping text.
///
/// # Examples
///
/// ```
/// let mapping = "\
/// com.example.Main -> a:
///     28:35:void a():10:17 -> a
///     30:30:void b():50:50 -> a
/// ";
/// let retraced = retrace::retrace("\tat a.a(SourceFile:30)", mapping).unwrap();
/// assert_eq!(
///     retraced.output,
///     "\tat com.example.Main.b(Main.java:50)\n\tat com.example.Main.a(Main.java:12)\n"
/// );
/// ```
pub fn retrace(stack_trace: &str, mapping: &str) -> Result<Retraced, Error> {
    retrace_with_options(stack_trace, mapping, RetraceOptions::default())
}

/// Retraces a stack trace with the given mapping text and options.
pub fn retrace_with_options(
    stack_trace: &str,
    mapping: &str,
    options: RetraceOptions,
) -> Result<Retraced, Error> {
    let mapper = Mapper::parse(mapping)?;
    Retracer::new(&mapper, options).retrace_str(stack_trace)
}
