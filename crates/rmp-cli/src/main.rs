//! # remapper
//!
//! Launch a program with a private view of the filesystem: paths
//! matching the given mappings appear to resolve inside the target
//! directory, for the command and every process it spawns.
//!
//! On Linux the redirection is a private mount namespace with bind
//! mounts (works on every binary, statically linked included). On macOS
//! it is a dyld-injected interposition library plus the machinery that
//! keeps the injection alive across hardened binaries and SIP-protected
//! interpreters.

use std::env;
use std::path::PathBuf;
use std::process::exit;

use clap::error::ErrorKind;
use clap::Parser;

use rmp_core::mapping::MAX_MAPPINGS;
use rmp_core::path::{absolutize, mkdirs};
use rmp_core::settings;

mod args;
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
mod embed;
mod launch;

#[cfg(target_os = "macos")]
mod darwin;
#[cfg(target_os = "linux")]
mod linux;

use launch::LaunchRequest;

/// Redirect filesystem paths matching MAPPING into TARGET-DIR.
///
/// Mappings are full paths with optional globs in the last component;
/// single-quote them to prevent shell glob expansion. With more than
/// one mapping, `--` must separate the mappings from the command.
#[derive(Parser)]
#[command(
    name = "remapper",
    version,
    override_usage = "remapper [--debug-log <FILE>] <target-dir> <mapping>... -- <program> [args...]\n       \
                      remapper [--debug-log <FILE>] <target-dir> <mapping> <program> [args...]",
    after_help = "Examples:\n  \
                  remapper ~/v1 '~/.claude*' -- claude\n  \
                  remapper ~/v1 '~/.codex*' codex --model X\n  \
                  remapper --debug-log /tmp/rmp.log ~/v1 '~/.claude*' -- claude\n\n\
                  Environment variables:\n  \
                  RMP_CONFIG      Base directory (default: ~/.remapper/)\n  \
                  RMP_CACHE       Cache directory (default: $RMP_CONFIG/cache/, macOS only)\n  \
                  RMP_DEBUG_LOG   Log file (enables debug when set)"
)]
struct Cli {
    /// Log debug output to FILE
    #[arg(long, value_name = "FILE")]
    debug_log: Option<PathBuf>,

    /// <target-dir> <mapping>... <program> [args...]
    #[arg(
        value_name = "ARGS",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    rest: Vec<String>,
}

fn main() {
    rmp_core::logging::init_tracing("warn");

    let argv: Vec<String> = env::args().collect();
    let (head, command_tail) = args::split_at_separator(&argv);

    let cli = match Cli::try_parse_from(&head) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            print!("{e}");
            exit(0);
        }
        Err(e) => {
            eprint!("{e}");
            exit(1);
        }
    };

    let request = match build_request(cli, command_tail) {
        Ok(req) => req,
        Err(msg) => {
            eprintln!("remapper: error: {msg}");
            eprintln!("Try 'remapper --help' for usage.");
            exit(1);
        }
    };

    tracing::debug!(
        target_dir = %request.target.display(),
        mappings = request.mappings.len(),
        command = %request.command[0],
        "launching"
    );

    // A successful launch replaces this process; returning here means
    // the exec (or something before it) failed.
    let err = dispatch(&request);
    eprintln!("remapper: {err:#}");
    exit(127);
}

fn build_request(
    cli: Cli,
    command_tail: Option<Vec<String>>,
) -> Result<LaunchRequest, String> {
    let mut rest = cli.rest;
    let target_raw = rest.remove(0);

    let (mappings_raw, command) = args::divide_positionals(rest, command_tail)?;
    if mappings_raw.len() > MAX_MAPPINGS {
        return Err(format!("too many mappings (max {MAX_MAPPINGS})"));
    }

    let target = absolutize(&target_raw).map_err(|e| format!("cannot resolve target: {e}"))?;
    // Best-effort: a target that genuinely cannot be created surfaces
    // as a launch failure with a better message later.
    let _ = mkdirs(&target, 0o755);

    let mut mappings = Vec::with_capacity(mappings_raw.len());
    for raw in mappings_raw {
        let abs = absolutize(&raw).map_err(|e| format!("cannot resolve mapping {raw:?}: {e}"))?;
        mappings.push(abs.to_string_lossy().into_owned());
    }

    Ok(LaunchRequest {
        target,
        mappings,
        command,
        debug_log: cli.debug_log.or_else(settings::debug_log_from_env),
    })
}

#[cfg(target_os = "macos")]
fn dispatch(request: &LaunchRequest) -> anyhow::Error {
    match darwin::launch(request) {
        Ok(never) => match never {},
        Err(e) => e,
    }
}

#[cfg(target_os = "linux")]
fn dispatch(request: &LaunchRequest) -> anyhow::Error {
    match linux::launch(request) {
        Ok(never) => match never {},
        Err(e) => e,
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn dispatch(_request: &LaunchRequest) -> anyhow::Error {
    anyhow::anyhow!("remapper supports only Linux and macOS")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    fn parse(argv: &[&str]) -> Result<LaunchRequest, String> {
        let argv = v(argv);
        let (head, tail) = args::split_at_separator(&argv);
        let cli = Cli::try_parse_from(&head).map_err(|e| e.to_string())?;
        build_request(cli, tail)
    }

    #[test]
    fn separator_form() {
        let dir = tempfile::tempdir().unwrap();
        let tgt = dir.path().join("t");
        let req = parse(&[
            "remapper",
            tgt.to_str().unwrap(),
            "/h/.a*",
            "/h/.b*",
            "--",
            "prog",
            "--flag",
        ])
        .unwrap();
        assert_eq!(req.target, tgt);
        assert!(req.target.is_dir()); // created by the adapter
        assert_eq!(req.mappings, v(&["/h/.a*", "/h/.b*"]));
        assert_eq!(req.command, v(&["prog", "--flag"]));
    }

    #[test]
    fn shortcut_form_with_hyphen_args() {
        let dir = tempfile::tempdir().unwrap();
        let tgt = dir.path().join("t");
        let req = parse(&[
            "remapper",
            tgt.to_str().unwrap(),
            "/h/.codex*",
            "codex",
            "--model",
            "X",
        ])
        .unwrap();
        assert_eq!(req.mappings, v(&["/h/.codex*"]));
        assert_eq!(req.command, v(&["codex", "--model", "X"]));
    }

    #[test]
    fn relative_mappings_are_absolutized() {
        let dir = tempfile::tempdir().unwrap();
        let req = parse(&[
            "remapper",
            dir.path().to_str().unwrap(),
            "rel/.app*",
            "cmd",
        ])
        .unwrap();
        assert!(req.mappings[0].starts_with('/'));
        assert!(req.mappings[0].ends_with("rel/.app*"));
    }

    #[test]
    fn missing_command_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(parse(&["remapper", dir.path().to_str().unwrap(), "/h/.a*"]).is_err());
        assert!(parse(&["remapper", dir.path().to_str().unwrap(), "/h/.a*", "--"]).is_err());
    }

    #[test]
    fn too_many_mappings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut argv = vec!["remapper".to_string(), dir.path().display().to_string()];
        for i in 0..MAX_MAPPINGS + 1 {
            argv.push(format!("/h/.m{i}*"));
        }
        argv.push("--".into());
        argv.push("prog".into());

        let (head, tail) = args::split_at_separator(&argv);
        let cli = Cli::try_parse_from(&head).unwrap();
        let err = build_request(cli, tail).unwrap_err();
        assert!(err.contains("too many mappings"));
    }

    #[test]
    fn debug_log_flag_wins_over_env() {
        let dir = tempfile::tempdir().unwrap();
        let req = parse(&[
            "remapper",
            "--debug-log",
            "/tmp/x.log",
            dir.path().to_str().unwrap(),
            "/h/.a*",
            "cmd",
        ])
        .unwrap();
        assert_eq!(req.debug_log, Some(PathBuf::from("/tmp/x.log")));
    }
}
