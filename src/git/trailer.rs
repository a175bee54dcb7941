//! Commit message trailer editing
//!
//! Pure string manipulation; `GitRepo::tag_with_trailer` feeds every
//! rewritten commit message through [`with_trailer`].

/// Whether `line` looks like `Key: value`
fn is_trailer_line(line: &str) -> bool {
    let Some((key, value)) = line.split_once(':') else {
        return false;
    };
    !key.is_empty()
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && value.starts_with(' ')
}

fn trailer_key(line: &str) -> Option<&str> {
    is_trailer_line(line)
        .then(|| line.split_once(':').map(|(k, _)| k))
        .flatten()
}

/// Replace every `name:` trailer in `message` with one line per value.
///
/// Existing trailers with the same key (case-insensitive) are dropped first,
/// so applying the same trailer twice yields the same message. Other trailers
/// keep their order. The subject paragraph is never treated as a trailer
/// block. An empty `values` leaves the message untouched.
pub fn with_trailer(message: &str, name: &str, values: &[String]) -> String {
    if values.is_empty() {
        return message.to_string();
    }

    let mut lines: Vec<&str> = message.trim_end().lines().collect();

    // The trailer block is the last paragraph, if it is not the subject and
    // every line in it is a trailer.
    let block_start = lines
        .iter()
        .rposition(|l| l.trim().is_empty())
        .map(|blank| blank + 1);
    let mut trailers: Vec<String> = Vec::new();
    if let Some(start) = block_start {
        let block = &lines[start..];
        if !block.is_empty() && block.iter().all(|l| is_trailer_line(l)) {
            trailers = block
                .iter()
                .filter(|l| !trailer_key(l).is_some_and(|k| k.eq_ignore_ascii_case(name)))
                .map(|l| (*l).to_string())
                .collect();
            lines.truncate(start);
            while lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.pop();
            }
        }
    }

    let mut seen = Vec::new();
    for value in values {
        if !seen.contains(&value) {
            trailers.push(format!("{name}: {value}"));
            seen.push(value);
        }
    }

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(&trailers.join("\n"));
    out.push('\n');
    out
}
