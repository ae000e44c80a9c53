//! Raw argv handling ahead of clap.
//!
//! clap consumes the first `--` as its own escape token, but for this
//! CLI the separator is load-bearing: it divides mappings from the
//! command. So the adapter splits the raw argv first and hands only the
//! head (flags, target, mappings) to clap.

/// Split raw argv at the first `--`. Returns the head (including
/// `argv[0]`) and, when a separator was present, everything after it.
pub fn split_at_separator(argv: &[String]) -> (Vec<String>, Option<Vec<String>>) {
    match argv.iter().position(|a| a == "--") {
        Some(i) => (argv[..i].to_vec(), Some(argv[i + 1..].to_vec())),
        None => (argv.to_vec(), None),
    }
}

/// Divide the positional tokens after the target into mappings and
/// command, honouring the single-mapping shortcut when no `--` was
/// given.
pub fn divide_positionals(
    rest: Vec<String>,
    command_after_separator: Option<Vec<String>>,
) -> Result<(Vec<String>, Vec<String>), &'static str> {
    match command_after_separator {
        Some(command) => {
            if rest.is_empty() {
                return Err("no mappings specified");
            }
            if command.is_empty() {
                return Err("no command specified");
            }
            Ok((rest, command))
        }
        None => {
            // Without `--`, exactly one mapping is expected.
            let mut rest = rest;
            if rest.is_empty() {
                return Err("no mappings specified");
            }
            let mapping = rest.remove(0);
            if rest.is_empty() {
                return Err("no command specified");
            }
            Ok((vec![mapping], rest))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn splits_at_first_separator_only() {
        let (head, tail) = split_at_separator(&v(&["rmp", "/t", "m", "--", "sh", "--", "-c"]));
        assert_eq!(head, v(&["rmp", "/t", "m"]));
        assert_eq!(tail.unwrap(), v(&["sh", "--", "-c"]));
    }

    #[test]
    fn no_separator_yields_none() {
        let (head, tail) = split_at_separator(&v(&["rmp", "/t", "m", "cmd"]));
        assert_eq!(head, v(&["rmp", "/t", "m", "cmd"]));
        assert!(tail.is_none());
    }

    #[test]
    fn separator_form_takes_all_mappings() {
        let (maps, cmd) =
            divide_positionals(v(&["m1", "m2", "m3"]), Some(v(&["prog", "-x"]))).unwrap();
        assert_eq!(maps, v(&["m1", "m2", "m3"]));
        assert_eq!(cmd, v(&["prog", "-x"]));
    }

    #[test]
    fn shortcut_form_takes_one_mapping() {
        let (maps, cmd) = divide_positionals(v(&["m1", "prog", "arg"]), None).unwrap();
        assert_eq!(maps, v(&["m1"]));
        assert_eq!(cmd, v(&["prog", "arg"]));
    }

    #[test]
    fn missing_pieces_are_errors() {
        assert!(divide_positionals(vec![], None).is_err());
        assert!(divide_positionals(v(&["m1"]), None).is_err());
        assert!(divide_positionals(vec![], Some(v(&["prog"]))).is_err());
        assert!(divide_positionals(v(&["m1"]), Some(vec![])).is_err());
    }
}
