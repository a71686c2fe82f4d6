use retrace::{retrace, retrace_with_options, Mapper, RetraceOptions, Retracer, Warnings};

static MAPPING: &str = include_str!("res/mapping.txt");

#[test]
fn test_retrace_full_stacktrace() {
    let input = "\
e.a.b: Button press caused an exception!
    at io.sentry.sample.MainActivity.t(MainActivity.java:1)
    at e.a.c.a.onClick
    at android.view.View.performClick(View.java:7125)
    at android.os.Looper.loop(Looper.java:214)
Caused by: java.lang.IllegalStateException: e.a.e failed
    at e.a.e.a(SourceFile:14)
    at e.a.e.a(SourceFile:12)
    at e.a.d.a.a(SourceFile:9)
    at io.sentry.sample.MainActivity.onCreate(SourceFile:5)
    ... 3 more
";
    let expected = "\
io.sentry.sample.CrashException: Button press caused an exception!
    at io.sentry.sample.MainActivity.bar(MainActivity.kt:54)
    at io.sentry.sample.MainActivity.foo(MainActivity.kt:44)
    at io.sentry.sample.MainActivity.onClickHandler(MainActivity.kt:40)
    at io.sentry.sample.MainActivity$$ExternalSyntheticLambda0.onClick(MainActivity.java)
    at android.view.View.performClick(View.java:7125)
    at android.os.Looper.loop(Looper.java:214)
Caused by: java.lang.IllegalStateException: io.sentry.sample.Repository failed
    at io.sentry.sample.util.StringsKt.format(StringsKt.java:25)
    at io.sentry.sample.util.Log.debug(Log.java:3)
    at io.sentry.sample.Repository.load(Repository.java:104)
    at io.sentry.sample.util.Cache.get(Cache.java:7)
    at io.sentry.sample.Repository.load(Repository.java:102)
    at io.sentry.sample.util.StringsKt.format(StringsKt.java:26)
    at io.sentry.sample.MainActivity.setupButtons(MainActivity.kt:30)
    at io.sentry.sample.MainActivity.onCreate(MainActivity.kt:24)
    ... 3 more
";

    let retraced = retrace(input, MAPPING).unwrap();
    assert_eq!(retraced.output, expected);
    assert_eq!(
        retraced.warnings,
        Warnings {
            unresolved: 2,
            ambiguous: 0,
        }
    );
}

#[test]
fn test_retrace_is_deterministic() {
    let input = "    at e.a.d.a.b(Unknown Source)\n    at e.a.e.a(SourceFile:14)\n";
    let mapper = Mapper::parse(MAPPING).unwrap();
    let retracer = Retracer::new(&mapper, RetraceOptions::default());

    let first = retracer.retrace_str(input).unwrap();
    let second = retracer.retrace_str(input).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.warnings.ambiguous, 1);
}

#[test]
fn test_empty_mapping_is_identity() {
    let input = "\
java.lang.RuntimeException: boom
\tat a.b.c(SourceFile:1)
\tat d.e(Native Method)
Caused by: f.g
\t... 1 more
";
    let retraced = retrace(input, "").unwrap();
    assert_eq!(retraced.output, input);
    assert_eq!(retraced.warnings.unresolved, 2);
    assert_eq!(retraced.warnings.ambiguous, 0);
}

#[test]
fn test_retrace_issue_5() {
    // https://github.com/getsentry/rust-proguard/issues/5#issue-410310382
    let mapping = r#"some.Class -> obfuscated:
    7:8:void method3(long):78:79 -> main
    7:8:void method2(int):87 -> main
    7:8:void method1(java.lang.String):95 -> main
    7:8:void main(java.lang.String[]):101 -> main"#;
    let retraced = retrace("    at obfuscated.main(Foo.java:8)", mapping).unwrap();
    assert_eq!(
        retraced.output,
        "    at some.Class.method3(Class.java:79)
    at some.Class.method2(Class.java:87)
    at some.Class.method1(Class.java:95)
    at some.Class.main(Class.java:101)\n"
    );
}

#[test]
fn test_retrace_issue_6() {
    // https://github.com/getsentry/rust-proguard/issues/6#issuecomment-605610326
    let mapping = r#"com.exmaple.app.MainActivity -> com.exmaple.app.MainActivity:
    com.example1.domain.MyBean myBean -> p
    1:1:void <init>():11:11 -> <init>
    1:1:void buttonClicked(android.view.View):29:29 -> buttonClicked
    2:2:void com.example1.domain.MyBean.doWork():16:16 -> buttonClicked
    2:2:void buttonClicked(android.view.View):29 -> buttonClicked
    1:1:void onCreate(android.os.Bundle):17:17 -> onCreate
    2:5:void onCreate(android.os.Bundle):22:25 -> onCreate"#;
    let stacktrace = "    at com.exmaple.app.MainActivity.buttonClicked(MainActivity.java:2)";
    let retraced = retrace(stacktrace, mapping).unwrap();
    assert_eq!(
        retraced.output,
        "    at com.example1.domain.MyBean.doWork(MyBean.java:16)
    at com.exmaple.app.MainActivity.buttonClicked(MainActivity.java:29)\n"
    );

    // https://github.com/getsentry/rust-proguard/issues/6#issuecomment-605613412
    let mapping = r#"com.exmaple.app.MainActivity -> com.exmaple.app.MainActivity:
    com.example1.domain.MyBean myBean -> k
    11:11:void <init>() -> <init>
    17:26:void onCreate(android.os.Bundle) -> onCreate
    29:30:void buttonClicked(android.view.View) -> buttonClicked
    1016:1016:void com.example1.domain.MyBean.doWork():16:16 -> buttonClicked
    1016:1016:void buttonClicked(android.view.View):29 -> buttonClicked"#;
    let stacktrace = "    at com.exmaple.app.MainActivity.buttonClicked(MainActivity.java:1016)";
    let retraced = retrace(stacktrace, mapping).unwrap();
    assert_eq!(
        retraced.output,
        "    at com.example1.domain.MyBean.doWork(MyBean.java:16)
    at com.exmaple.app.MainActivity.buttonClicked(MainActivity.java:29)\n"
    );
}

#[test]
fn test_unknown_source_with_cause() {
    let mapping = "\
com.android.tools.r8.R8 -> a.a:
  void bar(int, int) -> a
";
    let input = "\
com.android.tools.r8.CompilationException: foo[parens](Source:3)
    at a.a.a(Unknown Source)
Caused by: com.android.tools.r8.CompilationException: foo[parens](Source:3)
    ... 42 more
";

    let retraced = retrace(input, mapping).unwrap();
    assert_eq!(
        retraced.output,
        "\
com.android.tools.r8.CompilationException: foo[parens](Source:3)
    at com.android.tools.r8.R8.bar(Unknown Source)
Caused by: com.android.tools.r8.CompilationException: foo[parens](Source:3)
    ... 42 more
"
    );
    assert!(retraced.warnings.is_empty());

    let retraced =
        retrace_with_options(input, mapping, RetraceOptions::default().verbose(true)).unwrap();
    assert!(retraced
        .output
        .contains("    at com.android.tools.r8.R8.void bar(int,int)(Unknown Source)\n"));
}

#[test]
fn test_line_outside_of_ranges() {
    let mapping = "\
com.example.MyClass -> a:
    1:1:void doThing():42:42 -> a
com.example.Other -> b:
    1:1:void run():12:12 -> b
";
    let input = "\
java.lang.NullPointerException
    at a.a(Unknown Source:10)
    at b.b(Unknown Source:1)
";

    let retraced = retrace(input, mapping).unwrap();
    assert_eq!(
        retraced.output,
        "\
java.lang.NullPointerException
    at com.example.MyClass.doThing(Unknown Source:42)
    at com.example.Other.run(Unknown Source:12)
"
    );
    assert_eq!(
        retraced.warnings,
        Warnings {
            unresolved: 0,
            ambiguous: 1,
        }
    );
}

#[test]
fn test_retrace_stream() {
    let mapper = Mapper::parse(MAPPING).unwrap();
    let retracer = Retracer::new(&mapper, RetraceOptions::default().verbose(true));

    let input = "e.a.b\r\n\tat e.a.d.a.a(SourceFile:4) ~[app.apk]\r\n";
    let mut output = Vec::new();
    let warnings = retracer.retrace_stream(input.as_bytes(), &mut output).unwrap();

    assert_eq!(
        String::from_utf8(output).unwrap(),
        "io.sentry.sample.CrashException\n\tat io.sentry.sample.util.StringsKt.java.lang.String format(java.lang.String,int)(StringsKt.java:16) ~[app.apk]\n"
    );
    assert!(warnings.is_empty());
}
