// Embeds the interposition library into the launcher so `remapper` ships
// as one self-contained binary. The shim is a separate cdylib crate, so
// release builds pass its path via RMP_SHIM_LIB; development builds fall
// back to whatever a prior `cargo build -p rmp-shim` left in the target
// directory. When neither exists an empty placeholder is embedded and
// the launcher looks for the library on disk at runtime instead.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-env-changed=RMP_SHIM_LIB");

    let out = PathBuf::from(env::var("OUT_DIR").unwrap()).join("embedded_shim");

    let explicit = env::var_os("RMP_SHIM_LIB")
        .map(PathBuf::from)
        .filter(|p| p.is_file());
    let lib = explicit.or_else(find_built_shim);

    match lib {
        Some(lib) => {
            println!("cargo:rerun-if-changed={}", lib.display());
            fs::copy(&lib, &out).expect("copy shim library into OUT_DIR");
        }
        None => {
            println!(
                "cargo:warning=no rmp-shim library found (set RMP_SHIM_LIB or \
                 `cargo build -p rmp-shim` first); embedding an empty placeholder"
            );
            fs::write(&out, []).expect("write placeholder blob");
        }
    }
}

/// Look for the shim cdylib in the profile directory this build writes
/// to (OUT_DIR is `target/<profile>/build/<crate>-<hash>/out`).
fn find_built_shim() -> Option<PathBuf> {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR")?);
    let profile_dir = out_dir.ancestors().nth(3)?;
    for name in ["librmp_shim.dylib", "librmp_shim.so"] {
        let candidate = profile_dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
