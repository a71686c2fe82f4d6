//! Recognition of single lines of a Java stack trace.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// The location text written for frames of native methods.
pub const NATIVE_METHOD: &str = "Native Method";

/// The location text written for frames without a known source file.
pub const UNKNOWN_SOURCE: &str = "Unknown Source";

/// A Java StackFrame.
///
/// Basically a Rust version of the Java [`StackTraceElement`].
///
/// [`StackTraceElement`]: https://docs.oracle.com/en/java/javase/14/docs/api/java.base/java/lang/StackTraceElement.html
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame<'s> {
    pub(crate) class: &'s str,
    pub(crate) method: &'s str,
    pub(crate) line: Option<usize>,
    pub(crate) file: Option<&'s str>,
}

impl<'s> StackFrame<'s> {
    /// Create a new StackFrame.
    pub fn new(class: &'s str, method: &'s str, line: usize) -> Self {
        Self {
            class,
            method,
            line: Some(line),
            file: None,
        }
    }

    /// Create a new StackFrame with file information.
    pub fn with_file(class: &'s str, method: &'s str, line: usize, file: &'s str) -> Self {
        Self {
            class,
            method,
            line: Some(line),
            file: Some(file),
        }
    }

    /// Create a new StackFrame without line information.
    pub fn without_line(class: &'s str, method: &'s str, file: Option<&'s str>) -> Self {
        Self {
            class,
            method,
            line: None,
            file,
        }
    }

    /// Parses a StackFrame from a line of a Java StackTrace.
    ///
    /// # Examples
    ///
    /// ```
    /// use retrace::StackFrame;
    ///
    /// let parsed = StackFrame::try_parse("    at some.Klass.method(Klass.java:1234)");
    /// assert_eq!(
    ///     parsed,
    ///     Some(StackFrame::with_file(
    ///         "some.Klass",
    ///         "method",
    ///         1234,
    ///         "Klass.java"
    ///     ))
    /// );
    /// ```
    pub fn try_parse(line: &'s str) -> Option<Self> {
        parse_frame_line(line).map(|frame_line| frame_line.frame)
    }

    /// The class of the StackFrame.
    pub fn class(&self) -> &'s str {
        self.class
    }

    /// The method of the StackFrame.
    pub fn method(&self) -> &'s str {
        self.method
    }

    /// The fully qualified method name, including the class.
    pub fn full_method(&self) -> String {
        format!("{}.{}", self.class, self.method)
    }

    /// The file of the StackFrame.
    ///
    /// This is the location text as written, which may also be
    /// [`NATIVE_METHOD`] or [`UNKNOWN_SOURCE`].
    pub fn file(&self) -> Option<&'s str> {
        self.file
    }

    /// The line of the StackFrame, 1-based.
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    /// Whether this frame belongs to a native method.
    pub fn is_native(&self) -> bool {
        self.file == Some(NATIVE_METHOD)
    }
}

impl Display for StackFrame<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let file = self.file.unwrap_or(UNKNOWN_SOURCE);
        match self.line {
            Some(line) => write!(f, "at {}.{}({}:{})", self.class, self.method, file, line),
            None => write!(f, "at {}.{}({})", self.class, self.method, file),
        }
    }
}

/// A stack frame line split into the frame and the text around it.
///
/// ```text
/// E/App(42):     at a.b.c + 7(SourceFile:12) ~[app.jar:?]
/// |------------------|     |---------------||------------|
///        prefix             location          suffix
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameLine<'s> {
    prefix: &'s str,
    frame: StackFrame<'s>,
    location: &'s str,
    suffix: &'s str,
}

impl<'s> FrameLine<'s> {
    /// Parses a line of a stack trace that contains a frame.
    ///
    /// The frame is introduced by the word `at`, which may be preceded by
    /// arbitrary text such as a logcat tag.
    ///
    /// # Examples
    ///
    /// ```
    /// use retrace::{FrameLine, StackFrame};
    ///
    /// let parsed = FrameLine::try_parse("\tat a.b.c(SourceFile:12) ~[app.jar:?]").unwrap();
    /// assert_eq!(parsed.prefix(), "\tat ");
    /// assert_eq!(parsed.frame(), &StackFrame::with_file("a.b", "c", 12, "SourceFile"));
    /// assert_eq!(parsed.suffix(), " ~[app.jar:?]");
    /// ```
    pub fn try_parse(line: &'s str) -> Option<Self> {
        parse_frame_line(line)
    }

    /// Everything preceding the frame, up to and including the `at` marker.
    pub fn prefix(&self) -> &'s str {
        self.prefix
    }

    /// The frame itself.
    pub fn frame(&self) -> &StackFrame<'s> {
        &self.frame
    }

    /// The text between the method name and the suffix as written.
    ///
    /// This is usually the location in parentheses, possibly preceded by an
    /// instruction offset like ` + 45`.
    pub fn location(&self) -> &'s str {
        self.location
    }

    /// Any text following the location of the frame.
    pub fn suffix(&self) -> &'s str {
        self.suffix
    }
}

/// Parses a single frame line of a Java StackTrace.
///
/// Returns `None` if the line is not a frame line.
pub(crate) fn parse_frame_line(line: &str) -> Option<FrameLine<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    line.match_indices("at")
        .map(|(index, _)| index)
        .filter(|&index| is_at_marker(line, index))
        .find_map(|index| parse_frame_after(line, index + 2))
}

/// Whether the `at` at `index` is a word of its own followed by whitespace.
fn is_at_marker(line: &str, index: usize) -> bool {
    let starts_word = line[..index]
        .chars()
        .next_back()
        .map_or(true, |c| !is_identifier_part(c));
    starts_word && line[index + 2..].starts_with(char::is_whitespace)
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Parses the frame following the `at` marker ending at `marker_end`.
fn parse_frame_after(line: &str, marker_end: usize) -> Option<FrameLine<'_>> {
    let rest = line[marker_end..].trim_start();
    let prefix = &line[..line.len() - rest.len()];

    let qualified_len = rest
        .find(|c: char| c == '(' || c.is_whitespace())
        .unwrap_or(rest.len());
    let (qualified, tail) = rest.split_at(qualified_len);
    let (class, method) = qualified.rsplit_once('.')?;
    if class.is_empty() || method.is_empty() {
        return None;
    }

    let offset_len = instruction_offset_len(tail);
    let after_offset = &tail[offset_len..];
    let after_space = after_offset.trim_start();
    let (location_len, parenthesized) = match after_space.strip_prefix('(') {
        Some(inner) => {
            let close = inner.find(')')?;
            let space = after_offset.len() - after_space.len();
            (offset_len + space + close + 2, Some(&inner[..close]))
        }
        None if after_space.is_empty() || after_space.starts_with("~[") => (offset_len, None),
        None => return None,
    };
    let (location, suffix) = tail.split_at(location_len);

    let (file, line) = parenthesized.map_or((None, None), parse_location);

    Some(FrameLine {
        prefix,
        location,
        frame: StackFrame {
            class,
            method,
            line,
            file,
        },
        suffix,
    })
}

/// The length of a leading ` + 45` instruction offset, as written by
/// Crashlytics, or 0 if there is none.
fn instruction_offset_len(text: &str) -> usize {
    let Some(after_plus) = text.trim_start().strip_prefix('+') else {
        return 0;
    };
    let digits = after_plus.trim_start();
    let count = digits.bytes().take_while(u8::is_ascii_digit).count();
    if digits.len() == after_plus.len() || count == 0 {
        return 0;
    }
    text.len() - digits.len() + count
}

/// Parses the text within the parentheses of a frame.
///
/// Accepts `file:line`, `file:line:column`, `file`, `:line` and the empty
/// string.
fn parse_location(location: &str) -> (Option<&str>, Option<usize>) {
    let (file, line) = match location.split_once(':') {
        Some((file, rest)) => {
            let number = rest.split(':').next().unwrap_or(rest);
            (file, number.trim().parse().ok())
        }
        None => (location, None),
    };

    let file = Some(file.trim()).filter(|file| !file.is_empty());
    (file, line)
}

/// A Java Throwable.
///
/// This is a Rust version of the first line from a [`Throwable.printStackTrace()`] output in Java.
///
/// [`Throwable.printStackTrace()`]: https://docs.oracle.com/en/java/javase/14/docs/api/java.base/java/lang/Throwable.html#printStackTrace()
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Throwable<'s> {
    pub(crate) class: &'s str,
    pub(crate) message: Option<&'s str>,
}

impl<'s> Throwable<'s> {
    /// Create a new Throwable.
    pub fn new(class: &'s str) -> Self {
        Self {
            class,
            message: None,
        }
    }

    /// Create a new Throwable with message.
    pub fn with_message(class: &'s str, message: &'s str) -> Self {
        Self {
            class,
            message: Some(message),
        }
    }

    /// Parses a Throwable from the a line of a full Java StackTrace.
    ///
    /// # Example
    /// ```rust
    /// use retrace::Throwable;
    ///
    /// let parsed = Throwable::try_parse("some.CustomException: Crash!");
    /// assert_eq!(
    ///     parsed,
    ///     Some(Throwable::with_message("some.CustomException", "Crash!")),
    /// )
    /// ```
    pub fn try_parse(line: &'s str) -> Option<Self> {
        parse_throwable_line(line).map(|line| line.throwable)
    }

    /// The class of this Throwable.
    pub fn class(&self) -> &'s str {
        self.class
    }

    /// The optional message of this Throwable.
    pub fn message(&self) -> Option<&'s str> {
        self.message
    }
}

impl Display for Throwable<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.class)?;

        if let Some(message) = self.message {
            write!(f, ": {}", message)?;
        }

        Ok(())
    }
}

/// A throwable header line, possibly introduced by `Caused by: ` or
/// `Suppressed: `.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ThrowableLine<'s> {
    /// Everything in front of the class name.
    pub(crate) prefix: &'s str,
    pub(crate) throwable: Throwable<'s>,
    /// Everything after the class name, including the `: ` separator.
    pub(crate) suffix: &'s str,
}

/// Parses a line of a Java StackTrace which is the string version of a
/// [`Throwable`], optionally introduced as a cause or suppressed exception.
///
/// Returns `None` if the line could not be parsed.
///
/// [`Throwable`]: https://docs.oracle.com/en/java/javase/14/docs/api/java.base/java/lang/Throwable.html
pub(crate) fn parse_throwable_line(line: &str) -> Option<ThrowableLine<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let content = line.trim_start();
    let content = content
        .strip_prefix("Caused by: ")
        .or_else(|| content.strip_prefix("Suppressed: "))
        .unwrap_or(content);
    let prefix = &line[..line.len() - content.len()];

    let (class, message) = match content.split_once(": ") {
        Some((class, message)) => (class, Some(message)),
        None => (content.trim_end(), None),
    };

    if class.is_empty() || class.contains(char::is_whitespace) {
        return None;
    }

    Some(ThrowableLine {
        prefix,
        throwable: Throwable { class, message },
        suffix: &content[class.len()..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_frame() {
        let expect = Some(StackFrame {
            class: "com.example.MainFragment",
            method: "onClick",
            line: Some(1),
            file: Some("SourceFile"),
        });

        let line = "at com.example.MainFragment.onClick(SourceFile:1)";
        assert_eq!(expect, StackFrame::try_parse(line));

        let line = "    at com.example.MainFragment.onClick(SourceFile:1)";
        assert_eq!(expect, StackFrame::try_parse(line));

        let line = "\tat com.example.MainFragment.onClick(SourceFile:1)";
        assert_eq!(expect, StackFrame::try_parse(line));

        let line = "\tat com.example.MainFragment.onClick(SourceFile:1:17)";
        assert_eq!(expect, StackFrame::try_parse(line));
    }

    #[test]
    fn stack_frame_locations() {
        let frame = StackFrame::try_parse("at a.b(Native Method)").unwrap();
        assert_eq!(frame.file(), Some(NATIVE_METHOD));
        assert_eq!(frame.line(), None);
        assert!(frame.is_native());

        let frame = StackFrame::try_parse("at a.b(Unknown Source)").unwrap();
        assert_eq!(frame.file(), Some(UNKNOWN_SOURCE));
        assert_eq!(frame.line(), None);

        let frame = StackFrame::try_parse("at a.b(:42)").unwrap();
        assert_eq!(frame.file(), None);
        assert_eq!(frame.line(), Some(42));

        let frame = StackFrame::try_parse("at a.b()").unwrap();
        assert_eq!(frame, StackFrame::without_line("a", "b", None));

        let frame = StackFrame::try_parse("at a.b").unwrap();
        assert_eq!(frame, StackFrame::without_line("a", "b", None));
    }

    #[test]
    fn frame_line_spans() {
        let parsed = FrameLine::try_parse("  at   a.b.c(SourceFile:3) ~[0]\r").unwrap();
        assert_eq!(parsed.prefix(), "  at   ");
        assert_eq!(parsed.location(), "(SourceFile:3)");
        assert_eq!(parsed.suffix(), " ~[0]");
        assert_eq!(parsed.frame().class(), "a.b");
        assert_eq!(parsed.frame().method(), "c");

        let parsed = FrameLine::try_parse("    at a.b   ").unwrap();
        assert_eq!(parsed.frame(), &StackFrame::without_line("a", "b", None));
        assert_eq!(parsed.location(), "");
        assert_eq!(parsed.suffix(), "   ");
    }

    #[test]
    fn frame_after_arbitrary_prefix() {
        let parsed =
            FrameLine::try_parse("E/AndroidRuntime(123):     at a.a(SourceFile:12)").unwrap();
        assert_eq!(parsed.prefix(), "E/AndroidRuntime(123):     at ");
        assert_eq!(
            parsed.frame(),
            &StackFrame::with_file("a", "a", 12, "SourceFile")
        );

        let parsed = FrameLine::try_parse("java.lang.Exception: at a.b(Foo.java:1)").unwrap();
        assert_eq!(parsed.prefix(), "java.lang.Exception: at ");
        assert_eq!(parsed.frame().class(), "a");

        let parsed = FrameLine::try_parse("thread at risk at x.y.z(:3)").unwrap();
        assert_eq!(parsed.prefix(), "thread at risk at ");
        let expect = StackFrame {
            class: "x.y",
            method: "z",
            line: Some(3),
            file: None,
        };
        assert_eq!(parsed.frame(), &expect);
    }

    #[test]
    fn frame_with_instruction_offset() {
        let parsed = FrameLine::try_parse("    at o.afc.b + 45(:45)").unwrap();
        assert_eq!(parsed.prefix(), "    at ");
        assert_eq!(parsed.location(), " + 45(:45)");
        assert_eq!(parsed.suffix(), "");
        assert_eq!(parsed.frame().class(), "o.afc");
        assert_eq!(parsed.frame().method(), "b");
        assert_eq!(parsed.frame().line(), Some(45));

        let parsed = FrameLine::try_parse("    at o.afc.b + 45").unwrap();
        assert_eq!(parsed.location(), " + 45");
        assert_eq!(parsed.frame().line(), None);
    }

    #[test]
    fn not_a_frame() {
        for line in [
            "",
            "at",
            "atom.Foo.bar(Foo.java:1)",
            "    at noDot(Foo.java:1)",
            "    at a.b(Foo.java:1",
            "    at a.b with words",
            "    at a.b + (Foo.java:1)",
            "    ... 5 more",
            "Looking at something",
            "flat a.b(Foo.java:1)",
        ] {
            assert_eq!(StackFrame::try_parse(line), None, "{line:?}");
        }
    }

    #[test]
    fn print_stack_frame() {
        let frame = StackFrame::new("com.example.MainFragment", "onClick", 1);
        assert_eq!(
            "at com.example.MainFragment.onClick(Unknown Source:1)",
            frame.to_string()
        );

        let frame = StackFrame::with_file("com.example.MainFragment", "onClick", 1, "SourceFile");
        assert_eq!(
            "at com.example.MainFragment.onClick(SourceFile:1)",
            frame.to_string()
        );

        let frame = StackFrame::without_line("a.b", "c", Some(NATIVE_METHOD));
        assert_eq!("at a.b.c(Native Method)", frame.to_string());
        assert_eq!("a.b.c", frame.full_method());
    }

    #[test]
    fn throwable() {
        let line = "com.example.MainFragment: Crash!";
        let expect = Some(Throwable {
            class: "com.example.MainFragment",
            message: Some("Crash!"),
        });
        assert_eq!(expect, Throwable::try_parse(line));

        assert_eq!(Throwable::try_parse("a"), Some(Throwable::new("a")));
        assert_eq!(Throwable::try_parse("Exception in thread \"main\" a.b"), None);
        assert_eq!(Throwable::try_parse("   "), None);
    }

    #[test]
    fn throwable_line_prefixes() {
        let parsed = parse_throwable_line("Caused by: a.b: boom").unwrap();
        assert_eq!(parsed.prefix, "Caused by: ");
        assert_eq!(parsed.throwable, Throwable::with_message("a.b", "boom"));
        assert_eq!(parsed.suffix, ": boom");

        let parsed = parse_throwable_line("\tSuppressed: c").unwrap();
        assert_eq!(parsed.prefix, "\tSuppressed: ");
        assert_eq!(parsed.throwable, Throwable::new("c"));
        assert_eq!(parsed.suffix, "");
    }

    #[test]
    fn print_throwable() {
        let throwable = Throwable::new("com.example.MainFragment");
        assert_eq!("com.example.MainFragment", throwable.to_string());

        let throwable = Throwable::with_message("com.example.MainFragment", "Crash");
        assert_eq!("com.example.MainFragment: Crash", throwable.to_string());
    }
}
