//! This crate deobfuscates stack traces using the mapping files written by
//! ProGuard and R8.
//!
//! The main use case is to retrace complete stack traces, expanding frames of
//! inlined methods, but it can also be used to re-map single classes and
//! frames or to parse a mapping file line-by-line.
//!
//! # Examples
//!
//! ```
//! use retrace::{Mapper, RetraceOptions, Retracer, StackFrame};
//!
//! let mapping = "\
//! android.arch.core.internal.SafeIterableMap -> a.a.a.b.c:
//!     13:13:java.util.Map$Entry eldest():168:168 -> a
//! ";
//! let mapper = Mapper::parse(mapping).unwrap();
//!
//! // re-mapping a classname
//! assert_eq!(
//!     mapper.remap_class("a.a.a.b.c"),
//!     Some("android.arch.core.internal.SafeIterableMap"),
//! );
//!
//! // re-map a stack frame
//! let frames: Vec<_> = mapper
//!     .remap_frame(&StackFrame::new("a.a.a.b.c", "a", 13))
//!     .map(|frame| (frame.class(), frame.method(), frame.line()))
//!     .collect();
//! assert_eq!(
//!     frames,
//!     [("android.arch.core.internal.SafeIterableMap", "eldest", Some(168))],
//! );
//!
//! // retrace a complete stack trace
//! let retracer = Retracer::new(&mapper, RetraceOptions::default());
//! let retraced = retracer
//!     .retrace_str("java.lang.NullPointerException\n\tat a.a.a.b.c.a(SourceFile:13)")
//!     .unwrap();
//! assert_eq!(
//!     retraced.output,
//!     "java.lang.NullPointerException\n\tat android.arch.core.internal.SafeIterableMap.eldest(SafeIterableMap.java:168)\n",
//! );
//! ```

#![warn(missing_docs)]

mod error;
mod mapper;
mod mapping;
mod model;
mod retrace;
mod stacktrace;
mod utils;

pub use error::Error;
pub use mapper::{Mapper, RemappedFrameIter, ResolvedFrame};
pub use mapping::{
    LineRange, Mapping, MappingRecord, MappingRecordIter, MappingSummary, ParseError,
    ParseErrorKind, R8Header,
};
pub use model::{ClassMapping, FieldMapping, MappingModel, MethodMapping};
pub use retrace::{retrace, retrace_with_options, RetraceOptions, Retraced, Retracer, Warnings};
pub use stacktrace::{FrameLine, StackFrame, Throwable, NATIVE_METHOD, UNKNOWN_SOURCE};
