//! CloudFormation logical IDs as Architect derives them
//!
//! Architect names the stack of a deployed app by converting the app name
//! and the environment into PascalCase logical IDs and concatenating them,
//! so `my-app` deployed to `staging` becomes the stack `MyAppStaging`.

/// Separator characters: anything that is not an ASCII letter or digit.
fn is_separator(c: char) -> bool {
    !c.is_ascii_alphanumeric()
}

/// Convert an arbitrary name into a PascalCase logical ID.
///
/// Word boundaries are separators (`-`, `_`, `.`, spaces, ...) and
/// upper-case letters in the input. The reserved word `Get` maps to
/// `GetIndex`.
pub fn to_logical_id(input: &str) -> String {
    let mut spaced = String::with_capacity(input.len() * 2);
    for c in input.chars() {
        if c.is_ascii_uppercase() {
            spaced.push(' ');
        }
        spaced.push(c);
    }

    if input.chars().count() == 1 {
        return input.to_uppercase();
    }

    let trimmed = spaced.trim_matches(is_separator).to_lowercase();

    let mut out = String::with_capacity(trimmed.len());
    let mut upper_next = true;
    for c in trimmed.chars() {
        if is_separator(c) {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }

    if out == "Get" {
        return "GetIndex".to_string();
    }
    out
}

/// Stack name for `app_name` deployed to `environment`.
pub fn stack_name(app_name: &str, environment: &str) -> String {
    format!("{}{}", to_logical_id(app_name), to_logical_id(environment))
}
