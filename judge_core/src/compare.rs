/// Compare a program's output with the expected answer.
///
/// Trailing whitespace of every line and trailing blank lines are ignored,
/// everything else must match exactly.
pub fn compare_output(answer: &str, output: &str) -> bool {
    let answer = normalize(answer);
    let output = normalize(output);

    answer.len() == output.len() && answer.into_iter().zip(output).all(|pair| pair.0 == pair.1)
}

fn normalize(s: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = s.lines().map(|f| f.trim_end()).collect();
    while lines.last().map_or(false, |f| f.is_empty()) {
        lines.pop();
    }
    lines
}
