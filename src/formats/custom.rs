//! A user-supplied named-group regex, for `--log-format-regex` (SPEC_FULL.md §6).
//! Overrides both auto-detection and `--log-format-name`.

use regex::Regex;

use super::{Fields, Format};

pub struct CustomRegexFormat {
    regex: Regex,
    date_format: String,
}

impl CustomRegexFormat {
    pub fn new(pattern: &str, date_format: String) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self { regex, date_format })
    }
}

impl Format for CustomRegexFormat {
    fn name(&self) -> &str {
        "custom"
    }

    fn auto_detectable(&self) -> bool {
        false
    }

    fn match_line(&self, line: &str) -> Option<(Fields, usize)> {
        let captures = self.regex.captures(line)?;
        let mut fields = Fields::new();
        let mut count = 0;
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = captures.name(name) {
                fields.insert(name.to_string(), m.as_str().to_string());
                count += 1;
            }
        }
        Some((fields, count))
    }

    fn date_format(&self) -> &str {
        &self.date_format
    }

    fn regex_source(&self) -> Option<String> {
        Some(self.regex.as_str().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_named_groups_and_reports_their_count() {
        let format = CustomRegexFormat::new(
            r"^(?P<ip>\S+) (?P<path>\S+) (?P<status>\d+)$",
            "%Y-%m-%d".to_string(),
        )
        .unwrap();
        let (fields, count) = format.match_line("1.2.3.4 /a 200").unwrap();
        assert_eq!(count, 3);
        assert_eq!(fields.get("ip").unwrap(), "1.2.3.4");
    }

    #[test]
    fn non_matching_line_returns_none() {
        let format = CustomRegexFormat::new(r"^(?P<ip>\S+)$", "%Y-%m-%d".to_string()).unwrap();
        assert!(format.match_line("").is_none());
    }
}
