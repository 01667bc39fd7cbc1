//! Ambient external aligner invocation (section 4.8). The aligner binary
//! name, its reference layout, and its argument contract are opaque to the
//! core (section 2, Non-goals); this module only spawns it, checks it is on
//! `PATH` first, and propagates its exit status.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::Config;
use crate::error::ProfilerError;

/// The long-read aligner binary this crate shells out to.
pub const ALIGNER_BINARY: &str = "minimap2";

/// Fail fast with a clear message if the aligner is not on `PATH`, rather
/// than letting `Command::spawn` surface a generic "file not found".
fn check_on_path(binary: &str) -> Result<(), ProfilerError> {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    let found = std::env::split_paths(&path_var).any(|dir| dir.join(binary).is_file());
    if found {
        Ok(())
    } else {
        Err(ProfilerError::MissingInputFile {
            path: PathBuf::from(binary),
        })
    }
}

/// Invoke the aligner once, writing its SAM output to `<output>/alignments.sam`.
/// stdout/stderr are inherited so the aligner's own progress reporting reaches
/// the terminal; only the alignment records are redirected to a file.
pub fn align(config: &Config, output_dir: &Path) -> Result<PathBuf, ProfilerError> {
    check_on_path(ALIGNER_BINARY)?;

    let input = config.input.as_ref().ok_or_else(|| ProfilerError::MissingInputFile {
        path: PathBuf::from("--input"),
    })?;
    let reference = config.db_prefix.join("reference.fasta");
    let sam_path = output_dir.join("alignments.sam");

    let sam_file = std::fs::File::create(&sam_path).map_err(|e| ProfilerError::SchemaMismatch {
        table: sam_path.display().to_string(),
        detail: e.to_string(),
    })?;

    let status = Command::new(ALIGNER_BINARY)
        .args(["-a", "-x", "map-ont", "-t"])
        .arg(config.num_threads.to_string())
        .arg(&reference)
        .arg(input)
        .stdout(Stdio::from(sam_file))
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| ProfilerError::AlignerFailed {
            status: -1,
            stderr_tail: e.to_string(),
        })?;

    if !status.success() {
        return Err(ProfilerError::AlignerFailed {
            status: status.code().unwrap_or(-1),
            stderr_tail: format!("{ALIGNER_BINARY} exited with {status}"),
        });
    }

    Ok(sam_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_on_path_rejects_unknown_binary() {
        let result = check_on_path("definitely-not-a-real-aligner-binary");
        assert!(matches!(result, Err(ProfilerError::MissingInputFile { .. })));
    }
}
