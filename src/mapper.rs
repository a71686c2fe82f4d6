use std::iter::FusedIterator;

use tracing::trace;

use crate::error::Error;
use crate::model::{ClassMapping, MappingModel, MethodMapping};
use crate::stacktrace::{StackFrame, Throwable};

/// A frame resolved to its original class, method and line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFrame<'m> {
    class: &'m str,
    method: &'m str,
    return_type: &'m str,
    arguments: &'m [&'m str],
    line: Option<usize>,
    file: Option<&'m str>,
}

impl<'m> ResolvedFrame<'m> {
    /// The original class of the frame.
    pub fn class(&self) -> &'m str {
        self.class
    }

    /// The original method name.
    pub fn method(&self) -> &'m str {
        self.method
    }

    /// The return type of the original method.
    pub fn return_type(&self) -> &'m str {
        self.return_type
    }

    /// The argument types of the original method.
    pub fn arguments(&self) -> &'m [&'m str] {
        self.arguments
    }

    /// The original line, if it can be determined.
    pub fn line(&self) -> Option<usize> {
        self.line
    }

    /// The original source file, if the mapping records it for the class
    /// of this frame.
    pub fn file(&self) -> Option<&'m str> {
        self.file
    }
}

#[derive(Clone, Copy, Debug)]
struct Link<'m> {
    method: &'m MethodMapping<'m>,
    line: Option<usize>,
}

/// An Iterator over resolved frames, innermost first.
///
/// More than one frame is yielded when the obfuscated frame contains
/// inlined methods.
#[derive(Clone, Debug, Default)]
pub struct RemappedFrameIter<'m> {
    class: &'m str,
    source_file: Option<&'m str>,
    links: Vec<Link<'m>>,
    position: usize,
    ambiguous: bool,
}

impl<'m> RemappedFrameIter<'m> {
    fn empty() -> Self {
        Self::default()
    }

    fn new(class: &'m ClassMapping<'m>, links: Vec<Link<'m>>, ambiguous: bool) -> Self {
        Self {
            class: class.original_name(),
            source_file: class.source_file(),
            links,
            position: 0,
            ambiguous,
        }
    }

    /// Whether the frame could have been resolved to a different method.
    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }
}

impl<'m> Iterator for RemappedFrameIter<'m> {
    type Item = ResolvedFrame<'m>;

    fn next(&mut self) -> Option<Self::Item> {
        let Link { method, line } = *self.links.get(self.position)?;
        self.position += 1;

        // Inlined methods from foreign classes are not in our source file.
        let (class, file) = match method.original_class() {
            Some(class) if class != self.class => (class, None),
            _ => (self.class, self.source_file),
        };

        Some(ResolvedFrame {
            class,
            method: method.original_name(),
            return_type: method.original_return_type(),
            arguments: method.original_arguments(),
            line,
            file,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.links.len() - self.position;
        (len, Some(len))
    }
}

impl ExactSizeIterator for RemappedFrameIter<'_> {}

impl FusedIterator for RemappedFrameIter<'_> {}

/// Resolves obfuscated names and frames against a [`MappingModel`].
///
/// This can remap class names, fields, methods and stack frames one at a time.
#[derive(Clone, Debug, Default)]
pub struct Mapper<'s> {
    model: MappingModel<'s>,
}

impl<'s> From<MappingModel<'s>> for Mapper<'s> {
    fn from(model: MappingModel<'s>) -> Self {
        Self::new(model)
    }
}

impl<'s> Mapper<'s> {
    /// Create a new Mapper.
    pub fn new(model: MappingModel<'s>) -> Self {
        Self { model }
    }

    /// Parses mapping text and creates a Mapper for it.
    pub fn parse(source: &'s str) -> Result<Self, Error> {
        MappingModel::parse(source).map(Self::new)
    }

    /// The underlying model.
    pub fn model(&self) -> &MappingModel<'s> {
        &self.model
    }

    /// Remaps an obfuscated Class.
    ///
    /// This works on the fully-qualified name of the class, with its complete
    /// module prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// let mapping = r#"android.arch.core.executor.ArchTaskExecutor -> a.a.a.a.c:"#;
    /// let mapper = retrace::Mapper::parse(mapping).unwrap();
    ///
    /// let mapped = mapper.remap_class("a.a.a.a.c");
    /// assert_eq!(mapped, Some("android.arch.core.executor.ArchTaskExecutor"));
    /// ```
    pub fn remap_class(&self, class: &str) -> Option<&'s str> {
        self.model
            .class_by_obfuscated(class)
            .map(|class| class.original_name())
    }

    /// Returns the obfuscated name of an original Class.
    pub fn obfuscate_class(&self, class: &str) -> Option<&'s str> {
        self.model
            .class_by_original(class)
            .map(|class| class.obfuscated_name())
    }

    /// Remaps an obfuscated Class Method.
    ///
    /// The `class` argument has to be the fully-qualified obfuscated name of the
    /// class, with its complete module prefix.
    ///
    /// If the `method` can be resolved unambiguously, it will be returned
    /// alongside the remapped `class`, otherwise `None` is being returned.
    pub fn remap_method(&self, class: &str, method: &str) -> Option<(&'s str, &'s str)> {
        let class = self.model.class_by_obfuscated(class)?;
        let mut methods = class.methods_by_obfuscated_name(method);
        let first = methods.next()?;

        // Without line numbers, only a name shared by a single original
        // method can be resolved.
        methods
            .all(|method| method.same_method(first))
            .then(|| {
                (
                    first.original_class().unwrap_or(class.original_name()),
                    first.original_name(),
                )
            })
    }

    /// Remaps an obfuscated field to its class and original name.
    pub fn remap_field(&self, class: &str, field: &str) -> Option<(&'s str, &'s str)> {
        let class = self.model.class_by_obfuscated(class)?;
        let field = class.field(field)?;
        Some((class.original_name(), field.original_name()))
    }

    /// Resolves an obfuscated frame to the original frames.
    ///
    /// Returns zero frames if the class or method is not part of the mapping,
    /// and more than one frame if methods were inlined into the obfuscated
    /// method, innermost first.
    ///
    /// # Examples
    ///
    /// ```
    /// let mapping = "\
    /// com.example.Main -> a:
    ///     30:30:void inner():50:50 -> a
    ///     28:35:void outer():10:17 -> a
    /// ";
    /// let mapper = retrace::Mapper::parse(mapping).unwrap();
    ///
    /// let frames: Vec<_> = mapper
    ///     .resolve("a", "a", Some(30))
    ///     .map(|frame| (frame.method(), frame.line()))
    ///     .collect();
    /// assert_eq!(frames, [("inner", Some(50)), ("outer", Some(12))]);
    /// ```
    pub fn resolve<'m>(
        &'m self,
        class: &str,
        method: &str,
        line: Option<usize>,
    ) -> RemappedFrameIter<'m> {
        let Some(class_mapping) = self.model.class_by_obfuscated(class) else {
            trace!(class, "class not found in mapping");
            return RemappedFrameIter::empty();
        };
        let candidates: Vec<_> = class_mapping.methods_by_obfuscated_name(method).collect();
        if candidates.is_empty() {
            trace!(class, method, "method not found in mapping");
            return RemappedFrameIter::empty();
        }

        let Some(line) = line.filter(|&line| line > 0) else {
            return resolve_first_declared(class_mapping, &candidates, None, false);
        };

        let mut matches: Vec<_> = candidates
            .iter()
            .copied()
            .filter_map(|method| {
                let range = method.obfuscated_range()?;
                range.contains(line).then_some((method, range))
            })
            .collect();

        if matches.is_empty() {
            let has_line_info = candidates.iter().any(|m| m.obfuscated_range().is_some());
            return if has_line_info {
                resolve_first_declared(class_mapping, &candidates, None, true)
            } else {
                resolve_first_declared(class_mapping, &candidates, Some(line), false)
            };
        }

        matches.sort_by_key(|(method, range)| {
            (range.width(), range.start, method.declaration_index())
        });

        let (head, mut previous) = matches[0];
        let mut links = vec![Link {
            method: head,
            line: original_line(head, line),
        }];
        let mut ambiguous = false;

        for &(method, range) in &matches[1..] {
            if range.encloses(&previous) {
                links.push(Link {
                    method,
                    line: original_line(method, line),
                });
                previous = range;
            } else {
                ambiguous = true;
            }
        }

        RemappedFrameIter::new(class_mapping, links, ambiguous)
    }

    /// Remaps a single Stackframe.
    ///
    /// Returns zero or more [`ResolvedFrame`]s, based on the information in
    /// the mapping. This can return more than one frame in the case
    /// of inlined functions. In that case, frames are sorted top to bottom.
    pub fn remap_frame<'m>(&'m self, frame: &StackFrame<'_>) -> RemappedFrameIter<'m> {
        self.resolve(frame.class(), frame.method(), frame.line())
    }

    /// Remaps a throwable which is the first line of a full stacktrace.
    ///
    /// # Example
    ///
    /// ```
    /// use retrace::{Mapper, Throwable};
    ///
    /// let mapping = "com.example.Mapper -> a.b:";
    /// let mapper = Mapper::parse(mapping).unwrap();
    ///
    /// let throwable = Throwable::try_parse("a.b: Crash").unwrap();
    /// let mapped = mapper.remap_throwable(&throwable);
    ///
    /// assert_eq!(
    ///     Some(Throwable::with_message("com.example.Mapper", "Crash")),
    ///     mapped
    /// );
    /// ```
    pub fn remap_throwable<'a>(&'a self, throwable: &Throwable<'a>) -> Option<Throwable<'a>> {
        self.remap_class(throwable.class).map(|class| Throwable {
            class,
            message: throwable.message,
        })
    }
}

/// Maps an obfuscated line into the original range of `method`.
fn original_line(method: &MethodMapping<'_>, line: usize) -> Option<usize> {
    let original = method.original_range()?;
    let obfuscated = method.obfuscated_range()?;
    let offset = line.saturating_sub(obfuscated.start);
    Some(original.start.saturating_add(offset).min(original.end))
}

/// Resolves to the first declared method among the candidates, preferring
/// methods that were not inlined.
fn resolve_first_declared<'m>(
    class: &'m ClassMapping<'m>,
    candidates: &[&'m MethodMapping<'m>],
    line: Option<usize>,
    ambiguous: bool,
) -> RemappedFrameIter<'m> {
    let outermost: Vec<_> = candidates
        .iter()
        .copied()
        .filter(|method| !method.is_inlined())
        .collect();
    let pool = if outermost.is_empty() {
        candidates
    } else {
        &outermost[..]
    };

    let Some(first) = pool.iter().copied().min_by_key(|m| m.declaration_index()) else {
        return RemappedFrameIter::empty();
    };
    let ambiguous = ambiguous || pool.iter().any(|method| !method.same_method(first));
    let line = line.or_else(|| first.original_range().map(|range| range.start));

    RemappedFrameIter::new(
        class,
        vec![Link {
            method: first,
            line,
        }],
        ambiguous,
    )
}
