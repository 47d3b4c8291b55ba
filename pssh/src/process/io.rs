use anyhow::{Context as _, Result};
use nix::fcntl::{OFlag, open};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};
use std::os::unix::io::RawFd;
use std::path::Path;

/// Move `src` onto `dst` and drop the original descriptor.
pub(crate) fn copy_fd(src: RawFd, dst: RawFd) -> Result<()> {
    if src != dst {
        dup2(src, dst).context("failed dup2")?;
        close(src).context("failed close")?;
    }
    Ok(())
}

/// Open an input redirection target for the first pipeline stage.
pub(crate) fn open_input(path: &str) -> Result<RawFd> {
    open(Path::new(path), OFlag::O_RDONLY, Mode::empty())
        .with_context(|| format!("failed to open input file: {path}"))
}

/// Open (create or truncate) an output redirection target for the last
/// pipeline stage.
pub(crate) fn open_output(path: &str) -> Result<RawFd> {
    open(
        Path::new(path),
        OFlag::O_CREAT | OFlag::O_WRONLY | OFlag::O_TRUNC,
        Mode::from_bits_truncate(0o644),
    )
    .with_context(|| format!("failed to open output file: {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::unix::io::FromRawFd;

    #[test]
    fn output_fd_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let fd = open_output(path.to_str().unwrap()).unwrap();
        let mut file = unsafe { File::from_raw_fd(fd) };
        writeln!(file, "hello").unwrap();
        drop(file);

        let mut content = String::new();
        File::open(&path).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello\n");
    }

    #[test]
    fn output_truncates_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "previous content").unwrap();

        let fd = open_output(path.to_str().unwrap()).unwrap();
        let _ = close(fd);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn input_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "data").unwrap();

        let fd = open_input(path.to_str().unwrap()).unwrap();
        let mut file = unsafe { File::from_raw_fd(fd) };
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "data");
    }

    #[test]
    fn missing_input_file_fails() {
        assert!(open_input("/no/such/file/anywhere").is_err());
    }
}
