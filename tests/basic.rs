use retrace::{Mapper, Mapping, MappingModel};

static MAPPING: &str = include_str!("res/mapping.txt");

#[test]
fn test_summary() {
    let mapping = Mapping::new(MAPPING);
    assert!(mapping.is_valid());
    assert!(mapping.has_line_info());

    let summary = mapping.summary();
    assert_eq!(summary.compiler(), Some("R8"));
    assert_eq!(summary.compiler_version(), Some("8.2.42"));
    assert_eq!(summary.min_api(), Some(24));
    assert_eq!(summary.class_count(), 5);
    assert_eq!(summary.method_count(), 18);
}

#[test]
fn test_classes() {
    let model = MappingModel::parse(MAPPING).unwrap();
    assert_eq!(model.class_count(), 5);

    let class = model.class_by_obfuscated("e.a.d.a").unwrap();
    assert_eq!(class.original_name(), "io.sentry.sample.util.StringsKt");
    assert_eq!(class.source_file(), None);

    let class = model
        .class_by_original("io.sentry.sample.MainActivity")
        .unwrap();
    assert_eq!(class.obfuscated_name(), "io.sentry.sample.MainActivity");
    assert_eq!(class.source_file(), Some("MainActivity.kt"));

    // Synthesized classes do not have a real source file.
    let class = model.class_by_obfuscated("e.a.c.a").unwrap();
    assert_eq!(class.source_file(), None);
}

#[test]
fn test_fields() {
    let model = MappingModel::parse(MAPPING).unwrap();
    let class = model.class_by_obfuscated("e.a.e").unwrap();

    let field = class.field("b").unwrap();
    assert_eq!(field.original_type(), "java.util.Map");
    assert_eq!(field.original_name(), "cache");
    assert!(class.field("z").is_none());

    let mapper = Mapper::new(model);
    assert_eq!(
        mapper.remap_field("e.a.e", "a"),
        Some(("io.sentry.sample.Repository", "items"))
    );
}

#[test]
fn test_methods() {
    let model = MappingModel::parse(MAPPING).unwrap();
    let class = model.class_by_obfuscated("e.a.d.a").unwrap();

    let formats: Vec<_> = class
        .methods_by_obfuscated_name("a")
        .map(|m| (m.original_name(), m.original_arguments().len()))
        .collect();
    assert_eq!(formats, [("format", 2), ("format", 1)]);

    let mapper = Mapper::new(model);
    assert_eq!(
        mapper.remap_method("e.a.d.a", "a"),
        None,
        "overloads cannot be told apart without lines"
    );
    assert_eq!(
        mapper.remap_method("e.a.b", "<init>"),
        Some(("io.sentry.sample.CrashException", "<init>"))
    );
}

#[test]
fn test_remap_class() {
    let mapper = Mapper::parse(MAPPING).unwrap();
    assert_eq!(
        mapper.remap_class("e.a.c.a"),
        Some("io.sentry.sample.MainActivity$$ExternalSyntheticLambda0")
    );
    assert_eq!(
        mapper.obfuscate_class("io.sentry.sample.Repository"),
        Some("e.a.e")
    );
    assert_eq!(mapper.remap_class("io.sentry.sample.Repository"), None);
}

#[cfg(feature = "uuid")]
#[test]
fn test_uuid() {
    let mapping = Mapping::new(MAPPING);
    assert_eq!(mapping.uuid(), Mapping::new(MAPPING).uuid());
    assert_ne!(mapping.uuid(), Mapping::new("a -> b:\n").uuid());
}
