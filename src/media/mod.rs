//! Install media: fetch the original, unpack it for customization, repack it
//! as the medium the install boots from.
//!
//! Two variants exist. [`OpticalMedia`] unpacks an ISO into a scratch tree and
//! rebuilds a bootable ISO from it. [`FloppyMedia`] copies a floppy image
//! as-is; customizers edit the copy in place.

pub mod fetch;
pub mod filesystem;
pub mod remaster;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::domain::{InstallMedium, MediumKind};
use crate::error::Result;
use crate::guest::GuestPaths;
use filesystem::{remove_file, remove_tree};

pub use fetch::{FetchOutcome, MediaFetcher};
pub use remaster::MediaTools;

/// Log download progress at most once per tenth of the total (or per 64 MiB
/// when the size is unknown).
pub fn log_progress() -> impl FnMut(u64, Option<u64>) {
    let mut last_step = 0u64;
    move |done, total| {
        let step = match total {
            Some(total) if total > 0 => done * 10 / total,
            _ => done >> 26,
        };
        if step > last_step {
            last_step = step;
            match total {
                Some(total) => info!("{}kB of {}kB", done / 1024, total / 1024),
                None => info!("{}kB", done / 1024),
            }
        }
    }
}

/// One kind of install medium and the on-disk locations it works in.
pub trait InstallMedia {
    /// Fetch the original medium, reusing a cached copy when possible.
    fn acquire(&self, fetcher: &MediaFetcher, url: &str) -> Result<FetchOutcome>;

    /// Prepare the writable copy that customizers modify.
    fn remaster(&self) -> Result<()>;

    /// What a customizer is pointed at after [`remaster`](Self::remaster).
    fn scratch_dir(&self) -> &Path;

    /// Produce the final medium from the customized copy.
    fn finalize(&self) -> Result<()> {
        Ok(())
    }

    /// The medium the install boots from.
    fn install_medium(&self) -> InstallMedium;

    fn cleanup_scratch(&self) -> Result<()>;

    /// Remove the generated medium once the install no longer needs it.
    fn cleanup_install(&self) -> Result<()>;
}

pub struct OpticalMedia {
    original: PathBuf,
    mountpoint: PathBuf,
    scratch: PathBuf,
    output: PathBuf,
    label: String,
    tools: MediaTools,
}

impl OpticalMedia {
    pub fn new(paths: &GuestPaths, label: impl Into<String>) -> Self {
        Self {
            original: paths.original_iso.clone(),
            mountpoint: paths.iso_mount.clone(),
            scratch: paths.iso_contents.clone(),
            output: paths.output_iso.clone(),
            label: label.into(),
            tools: MediaTools::default(),
        }
    }

    pub fn with_tools(mut self, tools: MediaTools) -> Self {
        self.tools = tools;
        self
    }
}

impl InstallMedia for OpticalMedia {
    fn acquire(&self, fetcher: &MediaFetcher, url: &str) -> Result<FetchOutcome> {
        fetcher.fetch(url, &self.original, &mut log_progress())
    }

    fn remaster(&self) -> Result<()> {
        self.tools
            .remaster_iso(&self.original, &self.mountpoint, &self.scratch)
    }

    fn scratch_dir(&self) -> &Path {
        &self.scratch
    }

    fn finalize(&self) -> Result<()> {
        self.tools.build_iso(&self.scratch, &self.output, &self.label)
    }

    fn install_medium(&self) -> InstallMedium {
        InstallMedium {
            kind: MediumKind::Cdrom,
            path: self.output.clone(),
        }
    }

    fn cleanup_scratch(&self) -> Result<()> {
        info!(path = %self.scratch.display(), "cleaning up old ISO data");
        remove_tree(&self.scratch)
    }

    fn cleanup_install(&self) -> Result<()> {
        info!(path = %self.output.display(), "cleaning up modified ISO");
        remove_file(&self.output)
    }
}

pub struct FloppyMedia {
    original: PathBuf,
    scratch: PathBuf,
    output: PathBuf,
}

impl FloppyMedia {
    pub fn new(paths: &GuestPaths) -> Self {
        Self {
            original: paths.original_floppy.clone(),
            scratch: paths.floppy_contents.clone(),
            output: paths.output_floppy.clone(),
        }
    }
}

impl InstallMedia for FloppyMedia {
    fn acquire(&self, fetcher: &MediaFetcher, url: &str) -> Result<FetchOutcome> {
        fetcher.fetch(url, &self.original, &mut log_progress())
    }

    fn remaster(&self) -> Result<()> {
        remaster::remaster_floppy(&self.original, &self.output)?;
        std::fs::create_dir_all(&self.scratch)?;
        Ok(())
    }

    fn scratch_dir(&self) -> &Path {
        &self.scratch
    }

    fn install_medium(&self) -> InstallMedium {
        InstallMedium {
            kind: MediumKind::Floppy,
            path: self.output.clone(),
        }
    }

    fn cleanup_scratch(&self) -> Result<()> {
        info!(path = %self.scratch.display(), "cleaning up floppy data");
        remove_tree(&self.scratch)
    }

    fn cleanup_install(&self) -> Result<()> {
        info!(path = %self.output.display(), "cleaning up modified floppy");
        remove_file(&self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn paths(temp: &TempDir) -> GuestPaths {
        GuestPaths::new(
            &temp.path().join("images"),
            &temp.path().join("state"),
            "rhel5x86_64",
        )
    }

    #[test]
    fn test_optical_medium_is_output_iso() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        let media = OpticalMedia::new(&paths, "RHEL5");

        let medium = media.install_medium();
        assert_eq!(medium.kind, MediumKind::Cdrom);
        assert_eq!(medium.path, paths.output_iso);
        assert_eq!(media.scratch_dir(), paths.iso_contents);
    }

    #[test]
    fn test_floppy_lifecycle() {
        let temp = TempDir::new().unwrap();
        let paths = paths(&temp);
        fs::create_dir_all(paths.original_floppy.parent().unwrap()).unwrap();
        fs::write(&paths.original_floppy, vec![0u8; 1440]).unwrap();

        let media = FloppyMedia::new(&paths);
        media.remaster().unwrap();

        let medium = media.install_medium();
        assert_eq!(medium.kind, MediumKind::Floppy);
        assert_eq!(fs::read(&medium.path).unwrap().len(), 1440);
        assert!(media.scratch_dir().is_dir());

        media.cleanup_scratch().unwrap();
        media.cleanup_install().unwrap();
        assert!(!paths.floppy_contents.exists());
        assert!(!paths.output_floppy.exists());
        assert!(paths.original_floppy.exists());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let media = OpticalMedia::new(&paths(&temp), "X");
        media.cleanup_scratch().unwrap();
        media.cleanup_install().unwrap();
    }

    #[test]
    fn test_log_progress_accepts_unknown_total() {
        let mut progress = log_progress();
        progress(0, None);
        progress(1 << 27, None);
        progress(50, Some(100));
        progress(100, Some(100));
        progress(10, Some(0));
    }
}
