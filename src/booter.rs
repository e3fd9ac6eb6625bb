//! Boot decision policy.
//!
//! The HTTP orchestrator asks a [`Booter`] two questions: "should this
//! machine network-boot, and with what?" and "give me the bytes behind
//! this blob id". The trait keeps the policy pluggable; the crate ships
//! [`FileBooter`], which serves one fixed image set from local files to
//! every client.

use std::io;
use std::path::PathBuf;

use tokio::io::AsyncRead;

/// What a machine should boot: a kernel, zero or more initrds, and a
/// kernel command line. Kernel and initrds are opaque blob ids, not
/// paths; the booter that minted them knows how to open them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootSpec {
    pub kernel: Vec<u8>,
    pub initrds: Vec<Vec<u8>>,
    pub cmdline: String,
}

/// A readable blob plus a human-readable name for logging.
pub type Blob = (Box<dyn AsyncRead + Send + Unpin>, String);

/// Decides whether and what a machine boots.
pub trait Booter: Send + Sync {
    /// Returns the boot spec for a machine, or `None` to tell it to boot
    /// from its local disk. `None` is a normal verdict, not an error.
    fn boot_spec(&self, mac: [u8; 6]) -> Option<BootSpec>;

    /// Opens the blob behind an id previously handed out in a
    /// [`BootSpec`]. Ids the booter never minted fail with `NotFound`.
    fn open_blob(&self, blob_id: &[u8]) -> io::Result<Blob>;
}

/// Serves one fixed kernel/initrd set from the local filesystem to every
/// machine that asks. Blob ids are the configured file paths.
pub struct FileBooter {
    kernel: PathBuf,
    initrds: Vec<PathBuf>,
    cmdline: String,
}

impl FileBooter {
    pub fn new(kernel: PathBuf, initrds: Vec<PathBuf>, cmdline: String) -> Self {
        Self {
            kernel,
            initrds,
            cmdline,
        }
    }

    fn is_known(&self, blob_id: &[u8]) -> bool {
        let matches_path = |path: &PathBuf| path.as_os_str().as_encoded_bytes() == blob_id;
        matches_path(&self.kernel) || self.initrds.iter().any(matches_path)
    }
}

impl Booter for FileBooter {
    fn boot_spec(&self, _mac: [u8; 6]) -> Option<BootSpec> {
        Some(BootSpec {
            kernel: self.kernel.as_os_str().as_encoded_bytes().to_vec(),
            initrds: self
                .initrds
                .iter()
                .map(|path| path.as_os_str().as_encoded_bytes().to_vec())
                .collect(),
            cmdline: self.cmdline.clone(),
        })
    }

    fn open_blob(&self, blob_id: &[u8]) -> io::Result<Blob> {
        // Only hand out files this booter advertised; the id space is
        // paths, and anything else is a probe.
        if !self.is_known(blob_id) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "unknown blob id",
            ));
        }
        let path = PathBuf::from(String::from_utf8_lossy(blob_id).into_owned());
        let file = std::fs::File::open(&path)?;
        let name = path.display().to_string();
        Ok((Box::new(tokio::fs::File::from_std(file)), name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_booter() -> FileBooter {
        FileBooter::new(
            PathBuf::from("/images/vmlinuz"),
            vec![PathBuf::from("/images/initrd.img")],
            "console=ttyS0".to_string(),
        )
    }

    #[test]
    fn test_boot_spec_uses_paths_as_blob_ids() {
        let spec = test_booter().boot_spec([0; 6]).unwrap();
        assert_eq!(spec.kernel, b"/images/vmlinuz");
        assert_eq!(spec.initrds, vec![b"/images/initrd.img".to_vec()]);
        assert_eq!(spec.cmdline, "console=ttyS0");
    }

    #[test]
    fn test_same_spec_for_every_mac() {
        let booter = test_booter();
        let a = booter.boot_spec([0x11; 6]);
        let b = booter.boot_spec([0x22; 6]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_blob_id_rejected() {
        let result = test_booter().open_blob(b"/etc/shadow");
        assert_eq!(result.map(|_| ()).unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_open_known_blob_streams_file_contents() {
        use tokio::io::AsyncReadExt;

        let dir = std::env::temp_dir().join("chainboot-booter-test");
        std::fs::create_dir_all(&dir).unwrap();
        let kernel = dir.join("vmlinuz");
        std::fs::write(&kernel, b"kernel bytes").unwrap();

        let booter = FileBooter::new(kernel.clone(), vec![], String::new());
        let (mut reader, name) = booter
            .open_blob(kernel.as_os_str().as_encoded_bytes())
            .unwrap();
        assert_eq!(name, kernel.display().to_string());

        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"kernel bytes");
    }
}
