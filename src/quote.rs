// SHELL QUOTING FOR THE "Generated by:" HEADER
// TOKENS MADE OF [A-Za-z0-9/.,_@-] STAY BARE. '=' IS ALSO BARE EXCEPT IN THE
// FIRST TOKEN (WHERE THE SHELL WOULD READ AN ASSIGNMENT). EVERYTHING ELSE IS
// SINGLE-QUOTED WITH EMBEDDED QUOTES WRITTEN AS '\''.

fn is_safe(c: char, first: bool) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | ',' | '_' | '-' | '@') || (c == '=' && !first)
}

pub fn shell_quote<S: AsRef<str>>(args: &[S]) -> String {
    let mut result = String::new();
    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        if i > 0 {
            result.push(' ');
        }
        if !arg.is_empty() && arg.chars().all(|c| is_safe(c, i == 0)) {
            result.push_str(arg);
            continue;
        }
        result.push('\'');
        for c in arg.chars() {
            if c == '\'' {
                result.push_str("'\\''");
            } else {
                result.push(c);
            }
        }
        result.push('\'');
    }
    result
}
