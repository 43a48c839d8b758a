//! Bounding of encoder error output.
//!
//! ffmpeg repeats progress and decode-warning lines thousands of times on a
//! corrupt input; persisted error messages must stay bounded. Each known
//! repetitive pattern is capped, everything else passes through untouched.

use std::collections::HashMap;

/// Patterns that ffmpeg emits repetitively.
pub const REPETITIVE_PATTERNS: &[&str] = &[
    "Header missing",
    "Error while decoding",
    "Invalid data",
    "Application provided invalid",
    "out_time_ms=",
    "out_time_us=",
    "bitrate=",
    "progress=",
];

/// Max occurrences kept per pattern.
pub const MAX_PER_PATTERN: usize = 10;

pub fn filter_error_lines(input: &str) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut out = String::with_capacity(input.len().min(16 * 1024));

    'lines: for line in input.lines() {
        for pattern in REPETITIVE_PATTERNS {
            if line.contains(pattern) {
                let count = counts.entry(pattern).or_insert(0);
                if *count < MAX_PER_PATTERN {
                    *count += 1;
                    out.push_str(line);
                    out.push('\n');
                }
                continue 'lines;
            }
        }
        out.push_str(line);
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_repetitive_patterns_at_ten() {
        let input = "Header missing\n".repeat(50);
        let filtered = filter_error_lines(&input);
        assert_eq!(filtered.lines().count(), MAX_PER_PATTERN);
    }

    #[test]
    fn unknown_lines_pass_through() {
        let input = "some unique failure\nanother detail\n";
        assert_eq!(filter_error_lines(input), input);
    }

    #[test]
    fn caps_are_per_pattern_and_order_preserved() {
        let mut input = String::new();
        for _ in 0..20 {
            input.push_str("out_time_us=12345\n");
            input.push_str("bitrate= 320kbits/s\n");
        }
        input.push_str("tail line\n");
        let filtered = filter_error_lines(&input);
        assert_eq!(
            filtered
                .lines()
                .filter(|l| l.contains("out_time_us="))
                .count(),
            MAX_PER_PATTERN
        );
        assert_eq!(
            filtered.lines().filter(|l| l.contains("bitrate=")).count(),
            MAX_PER_PATTERN
        );
        assert_eq!(filtered.lines().last(), Some("tail line"));
    }
}
