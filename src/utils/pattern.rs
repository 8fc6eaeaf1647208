use regex::{Regex, RegexBuilder};

/// Compiles an include/exclude pattern into an anchored regex over full paths.
///
/// `**` matches any run of characters, `**/` zero or more directories and `*` any
/// run without a separator. Relative
/// patterns are taken relative to `base`.
pub fn compile_path_pattern(
    pattern: &str,
    base: &str,
    case_sensitive: bool,
) -> Result<Regex, regex::Error> {
    let sep = std::path::MAIN_SEPARATOR;
    let normalized = pattern.replace('\\', "/");
    let absolute = if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        normalized
    } else {
        format!("{}/{}", base.replace('\\', "/").trim_end_matches('/'), normalized)
    };

    let sep_re = regex::escape(&sep.to_string());
    let mut re = String::from("^");
    let mut chars = absolute.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '/' => re.push_str(&sep_re),
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        // `**/` also matches no directory at all
                        chars.next();
                        re.push_str(&format!("(?:.*{sep_re})?"));
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str(&format!("[^{sep_re}]*"));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    RegexBuilder::new(&re).case_insensitive(!case_sensitive).build()
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_single_star_stays_in_directory() {
        let re = compile_path_pattern("lib/*.jar", "/opt/app", true).unwrap();
        assert!(re.is_match("/opt/app/lib/old.jar"));
        assert!(!re.is_match("/opt/app/lib/ext/old.jar"));
        assert!(!re.is_match("/opt/app/lib/old.jar.bak"));
    }

    #[test]
    fn test_double_star_crosses_directories() {
        let re = compile_path_pattern("**/*.log", "/opt/app/", true).unwrap();
        assert!(re.is_match("/opt/app/logs/2020/run.log"));
        assert!(re.is_match("/opt/app/top.log"));
        assert!(!re.is_match("/var/run.log"));
    }

    #[test]
    fn test_absolute_and_case_insensitive() {
        let re = compile_path_pattern("/etc/App.CONF", "/opt/app", false).unwrap();
        assert!(re.is_match("/etc/app.conf"));
        let dots = compile_path_pattern("a.b", "/x", true).unwrap();
        assert!(!dots.is_match("/x/aXb"));
    }
}
