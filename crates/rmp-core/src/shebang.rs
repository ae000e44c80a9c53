//! Shebang resolution.
//!
//! Two separate problems hide behind `#!`:
//!
//! * `#!/usr/bin/env PROG`: the kernel would run `/usr/bin/env`, which
//!   is SIP-protected and strips the injection variable before `PROG`
//!   ever starts. We resolve `PROG` through `PATH` ourselves and exec it
//!   directly.
//! * `#!/path/to/interpreter`: if the interpreter lives in a
//!   SIP-protected region or carries the hardened runtime, the script's
//!   children lose the injection. We re-sign the interpreter through the
//!   trampoline cache and exec the cached copy with the script as
//!   argument.
//!
//! Parsing follows the kernel's convention: first line only, one
//! optional argument after the interpreter path, preserved verbatim
//! (embedded blanks and all).

use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::path::resolve_in_path;
use crate::rmp_debug;
use crate::signer::{ResolveGuard, SignerContext};

/// How many leading bytes of a script we look at.
const SHEBANG_READ: usize = 256;

/// Filesystem regions whose binaries are always treated as hardened,
/// regardless of their own signature.
const SIP_PREFIXES: [&str; 3] = ["/usr/", "/bin/", "/sbin/"];

/// A parsed `#!` line: interpreter path plus at most one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShebangLine {
    pub interpreter: String,
    pub arg: Option<String>,
}

/// A rewritten exec: run `program` with `inserts` placed between it and
/// the script path. The full vector is
/// `[program, inserts.., script, orig_argv[1..]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecPlan {
    pub program: PathBuf,
    pub inserts: Vec<OsString>,
}

pub fn is_sip_path(path: &str) -> bool {
    SIP_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Read and split the shebang line of `script`, if it has one.
pub fn read_shebang(script: &Path) -> Option<ShebangLine> {
    let mut buf = [0u8; SHEBANG_READ];
    let n = File::open(script).ok()?.read(&mut buf).ok()?;
    if n < 3 || &buf[..2] != b"#!" {
        return None;
    }

    let line = &buf[2..n];
    let line = match line.iter().position(|&b| b == b'\n') {
        Some(i) => &line[..i],
        None => line,
    };
    let line = std::str::from_utf8(line).ok()?;
    let line = line.trim_start_matches(' ');
    if line.is_empty() {
        return None;
    }

    let (interpreter, arg) = match line.split_once(' ') {
        Some((interp, rest)) => {
            let rest = rest.trim_start_matches(' ');
            (interp, (!rest.is_empty()).then(|| rest.to_string()))
        }
        None => (line, None),
    };

    Some(ShebangLine {
        interpreter: interpreter.to_string(),
        arg,
    })
}

/// Decide whether executing `script` needs a rewritten exec vector.
///
/// Returns `None` when the script has no shebang or the kernel can run
/// it without losing the injection. Runs under the resolve guard: when
/// re-entered from the signer's own exec it degrades to "no rewrite".
pub fn resolve_shebang(ctx: &SignerContext, script: &Path) -> Option<ExecPlan> {
    let Some(_guard) = ResolveGuard::enter() else {
        return None;
    };

    let line = read_shebang(script)?;

    // Env form: resolve the program through PATH and skip `env`
    // entirely. A bare `#!/usr/bin/env` falls through to the direct
    // form below, where the SIP prefix gives `env` itself a trampoline.
    if line.interpreter == "/usr/bin/env" {
        if let Some(arg) = &line.arg {
            let (prog, extra) = match arg.split_once(' ') {
                Some((p, rest)) => {
                    let rest = rest.trim_start_matches(' ');
                    (p, (!rest.is_empty()).then(|| rest.to_string()))
                }
                None => (arg.as_str(), None),
            };
            let resolved = resolve_in_path(prog)?;
            rmp_debug!(
                ctx.debug(),
                "shebang: '#!/usr/bin/env {prog}' -> {}",
                resolved.display()
            );
            return Some(ExecPlan {
                program: resolved,
                inserts: extra.map(OsString::from).into_iter().collect(),
            });
        }
    }

    // Direct form: only interesting when the interpreter would strip
    // the injection.
    let needs_trampoline =
        is_sip_path(&line.interpreter) || ctx.is_hardened(Path::new(&line.interpreter));
    if !needs_trampoline {
        return None;
    }

    let interp = PathBuf::from(&line.interpreter);
    let md = std::fs::metadata(&interp).ok()?;
    let (mtime, size) = (md.mtime(), md.size());

    let cached = ctx.cache_path(&interp);
    if !ctx.cache_valid(&cached, mtime, size) {
        if let Err(e) = ctx.cache_create(&interp, &cached, mtime, size) {
            rmp_debug!(ctx.debug(), "shebang: re-sign of {} failed: {e}", interp.display());
            return None;
        }
    }

    rmp_debug!(
        ctx.debug(),
        "shebang resign: {} -> {}",
        interp.display(),
        cached.display()
    );
    Some(ExecPlan {
        program: cached,
        inserts: line.arg.map(OsString::from).into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::DebugSink;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn ctx(dir: &Path, signer: Option<PathBuf>) -> SignerContext {
        SignerContext::with_signer(
            dir.join("cfg"),
            dir.join("cfg/cache"),
            signer,
            DebugSink::disabled(),
        )
    }

    fn always_signs(dir: &Path) -> PathBuf {
        let path = dir.join("codesign");
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn read_shebang_forms() {
        let dir = tempfile::tempdir().unwrap();

        let s = write_script(dir.path(), "plain", "#!/bin/sh\necho hi\n");
        assert_eq!(
            read_shebang(&s).unwrap(),
            ShebangLine { interpreter: "/bin/sh".into(), arg: None }
        );

        let s = write_script(dir.path(), "arged", "#!/bin/sh -eu\n");
        assert_eq!(
            read_shebang(&s).unwrap(),
            ShebangLine { interpreter: "/bin/sh".into(), arg: Some("-eu".into()) }
        );

        // One argument only; inner blanks are part of it.
        let s = write_script(dir.path(), "multi", "#!/usr/bin/env -S node --max-old-space\n");
        assert_eq!(
            read_shebang(&s).unwrap().arg.unwrap(),
            "-S node --max-old-space"
        );

        let s = write_script(dir.path(), "spaced", "#!  /bin/sh\n");
        assert_eq!(read_shebang(&s).unwrap().interpreter, "/bin/sh");
    }

    #[test]
    fn read_shebang_rejects_non_scripts() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_shebang(&write_script(dir.path(), "a", "")).is_none());
        assert!(read_shebang(&write_script(dir.path(), "b", "#!")).is_none());
        assert!(read_shebang(&write_script(dir.path(), "c", "echo no shebang")).is_none());
        assert!(read_shebang(&write_script(dir.path(), "d", "#x/bin/sh\n")).is_none());
        assert!(read_shebang(Path::new("/no/such/script")).is_none());
    }

    #[test]
    fn shebang_line_stops_at_newline() {
        let dir = tempfile::tempdir().unwrap();
        let s = write_script(dir.path(), "s", "#!/bin/sh arg\nnot part of it\n");
        let line = read_shebang(&s).unwrap();
        assert_eq!(line.interpreter, "/bin/sh");
        assert_eq!(line.arg.unwrap(), "arg");
    }

    #[test]
    fn env_form_resolves_through_path() {
        let _guard = crate::test_env::lock();
        let dir = tempfile::tempdir().unwrap();
        let bindir = dir.path().join("bin");
        fs::create_dir(&bindir).unwrap();
        let prog = write_script(&bindir, "myprog", "#!/bin/sh\n");

        let script = write_script(dir.path(), "run", "#!/usr/bin/env myprog\n");
        let c = ctx(dir.path(), None);

        let old_path = std::env::var_os("PATH").unwrap();
        let mut joined = bindir.as_os_str().to_os_string();
        joined.push(":");
        joined.push(&old_path);
        std::env::set_var("PATH", &joined);
        let plan = resolve_shebang(&c, &script);
        std::env::set_var("PATH", old_path);

        let plan = plan.unwrap();
        assert_eq!(plan.program, prog);
        assert!(plan.inserts.is_empty());
    }

    #[test]
    fn env_form_keeps_the_extra_argument() {
        let _guard = crate::test_env::lock();
        let dir = tempfile::tempdir().unwrap();
        // `sh` is always on PATH; the remainder rides along verbatim.
        let script = write_script(dir.path(), "run", "#!/usr/bin/env sh -eu\n");
        let c = ctx(dir.path(), None);

        let plan = resolve_shebang(&c, &script).unwrap();
        assert!(plan.program.ends_with("sh"));
        assert_eq!(plan.inserts, vec![OsString::from("-eu")]);
    }

    #[test]
    fn env_form_unresolvable_program_is_none() {
        let _guard = crate::test_env::lock();
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "run", "#!/usr/bin/env no-such-prog-xyz\n");
        let c = ctx(dir.path(), None);
        assert!(resolve_shebang(&c, &script).is_none());
    }

    #[test]
    fn direct_form_tramps_sip_interpreters() {
        let dir = tempfile::tempdir().unwrap();
        let signer = always_signs(dir.path());
        let c = ctx(dir.path(), Some(signer));

        let script = write_script(dir.path(), "run", "#!/bin/sh\necho hi\n");
        let plan = resolve_shebang(&c, &script).unwrap();
        assert_eq!(plan.program, c.cache_path(Path::new("/bin/sh")));
        assert!(plan.inserts.is_empty());

        // The trampoline really is a copy of the interpreter.
        assert_eq!(
            fs::read(&plan.program).unwrap(),
            fs::read("/bin/sh").unwrap()
        );
    }

    #[test]
    fn direct_form_keeps_shebang_arg() {
        let dir = tempfile::tempdir().unwrap();
        let signer = always_signs(dir.path());
        let c = ctx(dir.path(), Some(signer));

        let script = write_script(dir.path(), "run", "#!/bin/sh -e\n");
        let plan = resolve_shebang(&c, &script).unwrap();
        assert_eq!(plan.inserts, vec![OsString::from("-e")]);
    }

    #[test]
    fn direct_form_leaves_safe_interpreters_alone() {
        let dir = tempfile::tempdir().unwrap();
        let interp = write_script(dir.path(), "interp", "#!/bin/sh\n");
        let script = write_script(
            dir.path(),
            "run",
            &format!("#!{}\n", interp.display()),
        );
        let c = ctx(dir.path(), None);
        assert!(resolve_shebang(&c, &script).is_none());
    }

    #[test]
    fn resolve_under_guard_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let signer = always_signs(dir.path());
        let c = ctx(dir.path(), Some(signer));
        let script = write_script(dir.path(), "run", "#!/bin/sh\n");

        let _outer = ResolveGuard::enter().unwrap();
        assert!(resolve_shebang(&c, &script).is_none());
    }

    #[test]
    fn sip_prefixes() {
        assert!(is_sip_path("/usr/bin/perl"));
        assert!(is_sip_path("/bin/sh"));
        assert!(is_sip_path("/sbin/thing"));
        assert!(!is_sip_path("/opt/local/bin/python"));
        assert!(!is_sip_path("/usrx/bin"));
    }
}
