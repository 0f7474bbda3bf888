pub(super) const TRUNCATED_MARKER: &str = "[output truncated]";

/// Stdout first, then stderr on its own line.
pub(super) fn combine_output(stdout: (Vec<u8>, bool), stderr: (Vec<u8>, bool)) -> String {
    let mut combined = String::new();
    for (bytes, truncated) in [stdout, stderr] {
        if bytes.is_empty() {
            continue;
        }
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&String::from_utf8_lossy(&bytes));
        if truncated {
            if !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(TRUNCATED_MARKER);
        }
    }
    combined
}
