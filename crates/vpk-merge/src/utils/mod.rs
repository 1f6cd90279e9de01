use regex::Regex;

pub mod config;

#[macro_export]
macro_rules! println_pad {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        for __line in __s.lines() {
            println!("    {}", __line);
        }
    }};
}

/// Visible width of a string once ANSI color codes are stripped.
fn visible_len(ansi: &Regex, s: &str) -> usize {
    ansi.replace_all(s, "").chars().count()
}

/// Prints the provided lines inside an ASCII box
pub fn print_ansi_boxed_lines(lines: &[String]) {
    let ansi = Regex::new("\x1b\\[[0-9;]*m").unwrap();

    let width = lines
        .iter()
        .map(|s| visible_len(&ansi, s))
        .max()
        .unwrap_or(0);

    let border = "-".repeat(width + 4);
    println_pad!("{}", border);
    for line in lines {
        let pad = width - visible_len(&ansi, line);
        println_pad!("| {}{} |", line, " ".repeat(pad));
    }
    println_pad!("{}", border);
}

/// Human readable size in MiB, one decimal.
pub fn format_mib(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_len_ignores_color_codes() {
        let ansi = Regex::new("\x1b\\[[0-9;]*m").unwrap();
        assert_eq!(visible_len(&ansi, "\x1b[1;32mDone\x1b[0m"), 4);
        assert_eq!(visible_len(&ansi, "plain"), 5);
    }

    #[test]
    fn format_mib_rounds() {
        assert_eq!(format_mib(0), "0.0 MB");
        assert_eq!(format_mib(3 * 1024 * 1024 + 512 * 1024), "3.5 MB");
    }
}
