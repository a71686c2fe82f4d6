//! The in-memory representation of a parsed mapping file.
//!
//! A [`MappingModel`] is built once from the mapping text and then only
//! queried. All names borrow from the mapping text.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::Error;
use crate::mapping::{LineRange, Mapping, MappingRecord, ParseErrorKind, R8Header};

/// The source file R8 records for classes it synthesized.
const SYNTHETIC_SOURCE_FILE: &str = "R8$$SyntheticClass";

/// A field of an obfuscated class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMapping<'s> {
    original_type: &'s str,
    original_name: &'s str,
    obfuscated_name: &'s str,
}

impl<'s> FieldMapping<'s> {
    /// The declared type of the field.
    pub fn original_type(&self) -> &'s str {
        self.original_type
    }

    /// The original name of the field.
    pub fn original_name(&self) -> &'s str {
        self.original_name
    }

    /// The obfuscated name of the field.
    pub fn obfuscated_name(&self) -> &'s str {
        self.obfuscated_name
    }
}

/// A single method line of a class mapping.
///
/// One original method may be described by several entries, one per
/// contiguous block of obfuscated lines, and one obfuscated method may
/// contain entries for methods that were inlined into it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodMapping<'s> {
    original_return_type: &'s str,
    original_name: &'s str,
    original_arguments: Vec<&'s str>,
    original_class: Option<&'s str>,
    original_range: Option<LineRange>,
    obfuscated_name: &'s str,
    obfuscated_range: Option<LineRange>,
    declaration_index: usize,
    inlined: bool,
}

impl<'s> MethodMapping<'s> {
    /// The return type of the original method.
    pub fn original_return_type(&self) -> &'s str {
        self.original_return_type
    }

    /// The name of the original method.
    pub fn original_name(&self) -> &'s str {
        self.original_name
    }

    /// The argument types of the original method.
    pub fn original_arguments(&self) -> &[&'s str] {
        &self.original_arguments
    }

    /// The class the original method was declared in, when it differs from
    /// the enclosing class mapping.
    pub fn original_class(&self) -> Option<&'s str> {
        self.original_class
    }

    /// The lines of the original method covered by this entry.
    pub fn original_range(&self) -> Option<LineRange> {
        self.original_range
    }

    /// The obfuscated name of the method.
    pub fn obfuscated_name(&self) -> &'s str {
        self.obfuscated_name
    }

    /// The obfuscated lines covered by this entry.
    pub fn obfuscated_range(&self) -> Option<LineRange> {
        self.obfuscated_range
    }

    /// Position of the entry among the members of its class, in file order.
    pub fn declaration_index(&self) -> usize {
        self.declaration_index
    }

    /// Whether this entry describes a method inlined into a caller that is
    /// described by another entry of the same obfuscated method.
    pub fn is_inlined(&self) -> bool {
        self.inlined
    }

    /// Whether two entries describe the same original method.
    pub(crate) fn same_method(&self, other: &MethodMapping<'_>) -> bool {
        self.original_class == other.original_class
            && self.original_name == other.original_name
            && self.original_arguments == other.original_arguments
    }
}

/// The mapping of a single class and its members.
#[derive(Clone, Debug, Default)]
pub struct ClassMapping<'s> {
    original_name: &'s str,
    obfuscated_name: &'s str,
    source_file: Option<&'s str>,
    fields: Vec<FieldMapping<'s>>,
    methods: Vec<MethodMapping<'s>>,
    methods_by_name: HashMap<&'s str, Vec<usize>>,
    member_count: usize,
}

impl<'s> ClassMapping<'s> {
    fn new(original_name: &'s str, obfuscated_name: &'s str) -> Self {
        Self {
            original_name,
            obfuscated_name,
            ..Default::default()
        }
    }

    /// The original, dotted name of the class.
    pub fn original_name(&self) -> &'s str {
        self.original_name
    }

    /// The obfuscated, dotted name of the class.
    pub fn obfuscated_name(&self) -> &'s str {
        self.obfuscated_name
    }

    /// The original source file, if the mapping records one.
    pub fn source_file(&self) -> Option<&'s str> {
        self.source_file
    }

    /// All fields, in file order.
    pub fn fields(&self) -> &[FieldMapping<'s>] {
        &self.fields
    }

    /// Looks up a field by its obfuscated name.
    pub fn field(&self, obfuscated: &str) -> Option<&FieldMapping<'s>> {
        self.fields.iter().find(|f| f.obfuscated_name == obfuscated)
    }

    /// All method entries, ordered by the start of their obfuscated line
    /// range. Entries without line information come last, in file order.
    pub fn methods(&self) -> &[MethodMapping<'s>] {
        &self.methods
    }

    /// All method entries with the given obfuscated name, in the order of
    /// [`methods`](Self::methods).
    pub fn methods_by_obfuscated_name<'a>(
        &'a self,
        obfuscated: &str,
    ) -> impl Iterator<Item = &'a MethodMapping<'s>> + 'a {
        self.methods_by_name
            .get(obfuscated)
            .into_iter()
            .flatten()
            .map(|&index| &self.methods[index])
    }

    fn push_field(&mut self, ty: &'s str, original: &'s str, obfuscated: &'s str) {
        self.member_count += 1;
        self.fields.push(FieldMapping {
            original_type: ty,
            original_name: original,
            obfuscated_name: obfuscated,
        });
    }

    fn push_method(&mut self, mut method: MethodMapping<'s>) {
        method.declaration_index = self.member_count;
        self.member_count += 1;
        self.methods.push(method);
    }

    /// Sorts the methods, builds the name index and marks inlined entries.
    fn finish(mut self) -> Self {
        self.methods
            .sort_by_key(|m| m.obfuscated_range.map_or(usize::MAX, |r| r.start));

        for (index, method) in self.methods.iter().enumerate() {
            self.methods_by_name
                .entry(method.obfuscated_name)
                .or_default()
                .push(index);
        }

        for indices in self.methods_by_name.values() {
            for &index in indices {
                let inlined = indices
                    .iter()
                    .any(|&other| other != index && self.is_enclosed_by(index, other));
                self.methods[index].inlined = inlined;
            }
        }

        self
    }

    /// Whether the entry at `inner` is a link of an inlining chain whose
    /// next link is the entry at `outer`.
    fn is_enclosed_by(&self, inner: usize, outer: usize) -> bool {
        let inner = &self.methods[inner];
        let outer = &self.methods[outer];
        match (inner.obfuscated_range, outer.obfuscated_range) {
            (Some(inner_range), Some(outer_range)) => {
                outer_range.encloses(&inner_range)
                    && (outer_range.width() > inner_range.width()
                        || outer.declaration_index > inner.declaration_index)
            }
            _ => false,
        }
    }
}

/// A parsed mapping file.
///
/// # Examples
///
/// ```
/// use retrace::MappingModel;
///
/// let model = MappingModel::parse(
///     "com.example.Main -> a:\n    java.lang.String name -> a\n    void run() -> b\n",
/// )
/// .unwrap();
///
/// let class = model.class_by_obfuscated("a").unwrap();
/// assert_eq!(class.original_name(), "com.example.Main");
/// assert_eq!(class.field("a").unwrap().original_name(), "name");
/// assert_eq!(
///     model.class_by_original("com.example.Main").unwrap().obfuscated_name(),
///     "a"
/// );
/// ```
#[derive(Clone, Debug, Default)]
pub struct MappingModel<'s> {
    classes: Vec<ClassMapping<'s>>,
    by_obfuscated: HashMap<&'s str, usize>,
    by_original: HashMap<&'s str, usize>,
}

impl<'s> MappingModel<'s> {
    /// Parses mapping text into a model.
    ///
    /// Lines that cannot be classified are skipped. Fails on the first line
    /// that is recognizably a member line but malformed, or a member line
    /// preceding any class line.
    pub fn parse(source: &'s str) -> Result<Self, Error> {
        Self::from_mapping(Mapping::new(source))
    }

    /// Builds a model from a [`Mapping`].
    pub fn from_mapping(mapping: Mapping<'s>) -> Result<Self, Error> {
        let mut model = Self::default();
        let mut current: Option<ClassMapping<'s>> = None;

        for (line_number, line, record) in mapping.numbered_records() {
            let record = match record {
                Ok(record) => record,
                Err(kind) if kind.is_fatal() => {
                    return Err(Error::MalformedMapping {
                        line_number,
                        line: line.to_owned(),
                        kind,
                    })
                }
                Err(_) => {
                    debug!(line_number, line, "skipping unrecognized mapping line");
                    continue;
                }
            };

            match record {
                MappingRecord::Header { .. } => {}
                MappingRecord::R8Header(R8Header::SourceFile { file_name }) => {
                    if let Some(class) = current.as_mut() {
                        class.source_file = Some(file_name).filter(|&f| f != SYNTHETIC_SOURCE_FILE);
                    }
                }
                MappingRecord::R8Header(R8Header::Other) => {}
                MappingRecord::Class {
                    original,
                    obfuscated,
                } => {
                    if let Some(class) = current.take() {
                        model.insert(class.finish());
                    }
                    current = Some(ClassMapping::new(original, obfuscated));
                }
                MappingRecord::Field {
                    ty,
                    original,
                    obfuscated,
                } => {
                    let Some(class) = current.as_mut() else {
                        return Err(member_without_class(line_number, line));
                    };
                    class.push_field(ty, original, obfuscated);
                }
                MappingRecord::Method {
                    ty,
                    original,
                    obfuscated,
                    arguments,
                    original_class,
                    obfuscated_range,
                    original_range,
                } => {
                    let Some(class) = current.as_mut() else {
                        return Err(member_without_class(line_number, line));
                    };
                    class.push_method(MethodMapping {
                        original_return_type: ty,
                        original_name: original,
                        original_arguments: split_arguments(arguments),
                        original_class,
                        original_range,
                        obfuscated_name: obfuscated,
                        obfuscated_range,
                        declaration_index: 0,
                        inlined: false,
                    });
                }
            }
        }

        if let Some(class) = current.take() {
            model.insert(class.finish());
        }

        Ok(model)
    }

    fn insert(&mut self, class: ClassMapping<'s>) {
        let index = self.classes.len();
        if let Some(previous) = self.by_obfuscated.insert(class.obfuscated_name, index) {
            warn!(
                obfuscated = class.obfuscated_name,
                previous = self.classes[previous].original_name,
                original = class.original_name,
                "duplicate obfuscated class name, the later class wins"
            );
        }
        self.by_original.insert(class.original_name, index);
        self.classes.push(class);
    }

    /// Looks up a class by its obfuscated name.
    pub fn class_by_obfuscated(&self, obfuscated: &str) -> Option<&ClassMapping<'s>> {
        self.by_obfuscated
            .get(obfuscated)
            .map(|&index| &self.classes[index])
    }

    /// Looks up a class by its original name.
    pub fn class_by_original(&self, original: &str) -> Option<&ClassMapping<'s>> {
        self.by_original
            .get(original)
            .map(|&index| &self.classes[index])
    }

    /// Iterates over all classes that can be found by their obfuscated name.
    ///
    /// Classes are yielded in file order. Of several classes sharing an
    /// obfuscated name only the last one is yielded.
    pub fn classes(&self) -> impl Iterator<Item = &ClassMapping<'s>> {
        self.classes
            .iter()
            .enumerate()
            .filter(move |(index, class)| {
                self.by_obfuscated.get(class.obfuscated_name) == Some(index)
            })
            .map(|(_, class)| class)
    }

    /// The number of distinct obfuscated classes.
    pub fn class_count(&self) -> usize {
        self.by_obfuscated.len()
    }

    /// Whether the model contains no classes.
    pub fn is_empty(&self) -> bool {
        self.by_obfuscated.is_empty()
    }
}

fn member_without_class(line_number: usize, line: &str) -> Error {
    Error::MalformedMapping {
        line_number,
        line: line.to_owned(),
        kind: ParseErrorKind::MemberWithoutClass,
    }
}

fn split_arguments(arguments: &str) -> Vec<&str> {
    if arguments.trim().is_empty() {
        return Vec::new();
    }
    arguments.split(',').map(str::trim).collect()
}
