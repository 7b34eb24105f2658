//! Command-template resolution against a concrete combination.
//!
//! Templates are token vectors containing literal arguments and `${name}`
//! placeholders. Two tokens are special: `${input}` names the benchmark
//! instance (or `-` when it streams over stdin) and `${bin}` names the
//! resolved binary. Optional CLI flags are expressed by leaving their
//! parameter out of the active sweep branch; the formatter then prunes the
//! dangling flag together with its unresolved placeholder.

use std::path::Path;

use anyhow::{Result, bail};

use crate::core::sweep::Combination;

pub const BIN_TOKEN: &str = "${bin}";
pub const INPUT_TOKEN: &str = "${input}";

/// How the input file reaches the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// The literal path substitutes for `${input}`.
    Path,
    /// The input streams over stdin; `${input}` becomes `-`.
    Stdin,
}

/// Resolve `template` into an executable argument vector.
///
/// Substitution order: `${input}`, `${bin}`, then every combination key.
/// A combination value named `bin` overrides the resolved binary path unless
/// it is the `auto` sentinel. After substitution, a flag token (leading `-`)
/// followed by a still-unresolved placeholder drops with it, lone unresolved
/// placeholders drop alone, and empty tokens are removed. When the template
/// never mentions `${bin}`, the binary path is prepended instead.
pub fn format_command(
    template: &[String],
    combination: &Combination,
    input: &Path,
    input_mode: InputMode,
    bin: &Path,
) -> Result<Vec<String>> {
    let input_value = match input_mode {
        InputMode::Path => input.display().to_string(),
        InputMode::Stdin => "-".to_string(),
    };
    let uses_bin_token = template.iter().any(|t| t.contains(BIN_TOKEN));

    let mut tokens: Vec<String> = template
        .iter()
        .map(|t| t.replace(INPUT_TOKEN, &input_value))
        .collect();

    if uses_bin_token {
        let bin_value = match combination.get("bin") {
            Some(v) if v != "auto" && v != "${auto}" => v.clone(),
            _ => bin.display().to_string(),
        };
        substitute(&mut tokens, "bin", &bin_value);
    }
    for (key, value) in combination {
        if key == "bin" {
            continue;
        }
        substitute(&mut tokens, key, value);
    }

    let mut cleaned = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.starts_with('-') && tokens.get(i + 1).is_some_and(|next| is_placeholder(next)) {
            i += 2;
            continue;
        }
        if is_placeholder(token) {
            i += 1;
            continue;
        }
        cleaned.push(token.clone());
        i += 1;
    }
    let argv: Vec<String> = cleaned.into_iter().filter(|t| !t.is_empty()).collect();

    if argv.iter().any(|t| t.contains(BIN_TOKEN)) {
        bail!("unresolved {BIN_TOKEN} in command template");
    }
    if uses_bin_token {
        Ok(argv)
    } else {
        let mut with_bin = Vec::with_capacity(argv.len() + 1);
        with_bin.push(bin.display().to_string());
        with_bin.extend(argv);
        Ok(with_bin)
    }
}

fn substitute(tokens: &mut [String], key: &str, value: &str) {
    let placeholder = format!("${{{key}}}");
    for token in tokens.iter_mut() {
        if token.contains(&placeholder) {
            *token = token.replace(&placeholder, value);
        }
    }
}

fn is_placeholder(token: &str) -> bool {
    token.starts_with("${") && token.ends_with('}')
}

/// Render an argument vector for display, quoting arguments that need it.
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._+-=/:,@".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn template(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    fn combo(pairs: &[(&str, &str)]) -> Combination {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn drops_flag_with_unresolved_placeholder() {
        let tmpl = template(&[
            "${bin}", "-i", "${input}", "-t", "${threads}", "--maxbuf", "${maxbuf}",
        ]);
        let argv = format_command(
            &tmpl,
            &combo(&[("threads", "2")]),
            Path::new("/tmp/test.cnf"),
            InputMode::Path,
            Path::new("/bin/echo"),
        )
        .expect("format");
        assert_eq!(argv, template(&["/bin/echo", "-i", "/tmp/test.cnf", "-t", "2"]));
    }

    #[test]
    fn stdin_mode_substitutes_dash() {
        let tmpl = template(&["${bin}", "-i", "${input}"]);
        let argv = format_command(
            &tmpl,
            &Combination::new(),
            Path::new("/tmp/test.cnf.xz"),
            InputMode::Stdin,
            Path::new("/bin/echo"),
        )
        .expect("format");
        assert_eq!(argv, template(&["/bin/echo", "-i", "-"]));
    }

    #[test]
    fn prepends_binary_when_template_lacks_bin_token() {
        let tmpl = template(&["-i", "${input}"]);
        let argv = format_command(
            &tmpl,
            &Combination::new(),
            Path::new("in.cnf"),
            InputMode::Path,
            Path::new("/opt/solver"),
        )
        .expect("format");
        assert_eq!(argv, template(&["/opt/solver", "-i", "in.cnf"]));
    }

    #[test]
    fn lone_unresolved_placeholder_drops_alone() {
        let tmpl = template(&["${bin}", "${extra}", "run"]);
        let argv = format_command(
            &tmpl,
            &Combination::new(),
            Path::new("in.cnf"),
            InputMode::Path,
            Path::new("/opt/solver"),
        )
        .expect("format");
        assert_eq!(argv, template(&["/opt/solver", "run"]));
    }

    #[test]
    fn empty_tokens_are_removed() {
        let tmpl = template(&["${bin}", "${pad}", "-i", "${input}"]);
        let argv = format_command(
            &tmpl,
            &combo(&[("pad", "")]),
            Path::new("in.cnf"),
            InputMode::Path,
            Path::new("/opt/solver"),
        )
        .expect("format");
        assert_eq!(argv, template(&["/opt/solver", "-i", "in.cnf"]));
    }

    #[test]
    fn combination_bin_value_overrides_discovered_path() {
        let tmpl = template(&["${bin}", "-i", "${input}"]);
        let argv = format_command(
            &tmpl,
            &combo(&[("bin", "/custom/solver")]),
            Path::new("in.cnf"),
            InputMode::Path,
            Path::new("/opt/solver"),
        )
        .expect("format");
        assert_eq!(argv[0], "/custom/solver");

        let auto = format_command(
            &tmpl,
            &combo(&[("bin", "auto")]),
            Path::new("in.cnf"),
            InputMode::Path,
            Path::new("/opt/solver"),
        )
        .expect("format");
        assert_eq!(auto[0], "/opt/solver");
    }

    #[test]
    fn display_command_quotes_when_needed() {
        let argv = vec![
            "/opt/solver".to_string(),
            "-i".to_string(),
            "a file.cnf".to_string(),
        ];
        assert_eq!(display_command(&argv), "/opt/solver -i 'a file.cnf'");
    }

    #[test]
    fn placeholder_values_may_contain_paths() {
        let tmpl = template(&["${bin}", "--out", "${out_path}"]);
        let argv = format_command(
            &tmpl,
            &combo(&[("out_path", "/tmp/out/result.csv")]),
            Path::new("in.cnf"),
            InputMode::Path,
            Path::new("/opt/solver"),
        )
        .expect("format");
        assert_eq!(argv, template(&["/opt/solver", "--out", "/tmp/out/result.csv"]));
    }

    #[test]
    fn bin_path_is_used_verbatim() {
        let bin = PathBuf::from("/opt/tools/solver-v2");
        let tmpl = template(&["${bin}"]);
        let argv = format_command(
            &tmpl,
            &Combination::new(),
            Path::new("in.cnf"),
            InputMode::Path,
            &bin,
        )
        .expect("format");
        assert_eq!(argv, vec!["/opt/tools/solver-v2".to_string()]);
    }
}
