//! Internal helpers shared across modules.

/// Extracts the simple name of the outermost class from a dotted class name.
pub(crate) fn extract_class_name(full_path: &str) -> &str {
    let after_last_period = full_path.rsplit('.').next().unwrap_or(full_path);
    // If the class is an inner class, we need to extract the outer class name
    after_last_period.split('$').next().unwrap_or(after_last_period)
}

/// Synthesizes a source file name from a class name.
///
/// The name is always that of a Java file for the outermost class, so
/// "com.example.Main$Inner" becomes "Main.java". Kotlin sources are only
/// known when the mapping records them.
pub(crate) fn synthesize_source_file(class_name: &str) -> String {
    format!("{}.java", extract_class_name(class_name))
}
