//! Darwin launcher: extract the library, prepare the signer context,
//! rewrite the exec vector where SIP or hardened runtimes would strip
//! the injection, set the environment and exec.

use std::convert::Infallible;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};

use rmp_core::mapping::MappingSet;
use rmp_core::path::resolve_in_path;
use rmp_core::rmp_debug;
use rmp_core::settings::{
    self, ENV_CACHE, ENV_CONFIG, ENV_DEBUG_LOG, ENV_INSERT_LIBRARIES, ENV_MAPPINGS, ENV_TARGET,
};
use rmp_core::shebang::resolve_shebang;
use rmp_core::{DebugSink, SignerContext};

use crate::embed;
use crate::launch::LaunchRequest;

pub fn launch(req: &LaunchRequest) -> Result<Infallible> {
    let debug = match &req.debug_log {
        Some(path) => DebugSink::create(path),
        None => DebugSink::disabled(),
    };

    let config_dir = settings::config_dir();
    let cache_dir = settings::cache_dir(&config_dir);

    let lib_path = embed::ensure_library(&config_dir)?;

    let ctx = SignerContext::new(config_dir.clone(), cache_dir.clone(), debug.clone());
    if ctx.signer().is_none() {
        anyhow::bail!("cannot find 'codesign' in PATH");
    }

    let mappings_joined = MappingSet::join_for_env(&req.mappings)?;

    // Resolve the command to an absolute path: through the filesystem
    // when it names one, through PATH otherwise.
    let command_path = if req.command[0].contains('/') {
        fs::canonicalize(&req.command[0]).ok()
    } else {
        resolve_in_path(&req.command[0])
    };

    // A shebang rewrite and a trampoline are mutually exclusive for the
    // top-level target too: scripts get their interpreter fixed, plain
    // binaries get checked themselves.
    let mut exec_vector: Option<(PathBuf, Vec<OsString>)> = None;
    if let Some(script) = &command_path {
        if let Some(plan) = resolve_shebang(&ctx, script) {
            let mut args: Vec<OsString> = plan.inserts.clone();
            args.push(script.into());
            args.extend(req.command[1..].iter().map(OsString::from));
            exec_vector = Some((plan.program, args));
        }
    }

    let final_binary = match &exec_vector {
        Some((program, _)) => Some(program.clone()),
        None => command_path.clone(),
    };
    if let Some(binary) = final_binary {
        let resolved = ctx.resolve_hardened(&binary);
        if resolved.was_cached() {
            rmp_debug!(debug, "hardened binary detected: {}", binary.display());
            let cached = resolved.path_or(&binary).to_path_buf();
            rmp_debug!(debug, "using cached copy: {}", cached.display());
            let args = match exec_vector.take() {
                Some((_, args)) => args,
                None => req.command[1..].iter().map(OsString::from).collect(),
            };
            exec_vector = Some((cached, args));
        }
    }

    env::set_var(ENV_TARGET, &req.target);
    env::set_var(ENV_MAPPINGS, bytes_to_os(mappings_joined));
    env::set_var(ENV_CONFIG, &config_dir);
    env::set_var(ENV_CACHE, &cache_dir);
    if let Some(log) = &req.debug_log {
        env::set_var(ENV_DEBUG_LOG, log);
    }

    // Prepend so injections already present in the environment survive.
    let insert = match env::var(ENV_INSERT_LIBRARIES) {
        Ok(existing) if !existing.is_empty() => {
            format!("{}:{existing}", lib_path.display())
        }
        _ => lib_path.display().to_string(),
    };
    env::set_var(ENV_INSERT_LIBRARIES, &insert);

    rmp_debug!(debug, "target:   {}", req.target.display());
    rmp_debug!(debug, "mappings: {}", req.mappings.join(":"));
    rmp_debug!(debug, "config:   {}", config_dir.display());
    rmp_debug!(debug, "cache:    {}", cache_dir.display());
    rmp_debug!(debug, "library:  {}", lib_path.display());

    let err = match exec_vector {
        Some((program, args)) => {
            rmp_debug!(
                debug,
                "exec: {} {}",
                program.display(),
                args.iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(" ")
            );
            Command::new(program).args(args).exec()
        }
        // No rewrite: behave like execvp on the user's command.
        None => {
            rmp_debug!(debug, "exec: {}", req.command.join(" "));
            Command::new(&req.command[0]).args(&req.command[1..]).exec()
        }
    };
    Err(err).with_context(|| format!("cannot exec {}", req.command[0]))
}

fn bytes_to_os(bytes: Vec<u8>) -> OsString {
    use std::os::unix::ffi::OsStringExt;
    OsString::from_vec(bytes)
}
