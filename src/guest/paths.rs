use std::path::{Path, PathBuf};

/// On-disk locations for one guest, all keyed by its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestPaths {
    pub disk_image: PathBuf,
    pub original_iso: PathBuf,
    pub output_iso: PathBuf,
    pub iso_contents: PathBuf,
    pub iso_mount: PathBuf,
    pub original_floppy: PathBuf,
    pub output_floppy: PathBuf,
    pub floppy_contents: PathBuf,
    pub screenshot_dir: PathBuf,
    pub lock_file: PathBuf,
}

impl GuestPaths {
    pub fn new(image_dir: &Path, state_dir: &Path, name: &str) -> Self {
        Self {
            disk_image: image_dir.join(format!("{name}.dsk")),
            original_iso: state_dir.join("isos").join(format!("{name}.iso")),
            output_iso: image_dir.join(format!("{name}-install.iso")),
            iso_contents: state_dir.join("isocontent").join(name),
            iso_mount: state_dir.join("mnt").join(name),
            original_floppy: state_dir.join("floppies").join(format!("{name}.img")),
            output_floppy: image_dir.join(format!("{name}-install.img")),
            floppy_contents: state_dir.join("floppycontent").join(name),
            screenshot_dir: state_dir.join("screenshots"),
            lock_file: state_dir.join("locks").join(format!("{name}.lock")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_namespaced_by_name() {
        let paths = GuestPaths::new(
            Path::new("/var/lib/libvirt/images"),
            Path::new("/var/lib/guest-installer"),
            "fedora14x86_64",
        );

        assert_eq!(
            paths.disk_image,
            PathBuf::from("/var/lib/libvirt/images/fedora14x86_64.dsk")
        );
        assert_eq!(
            paths.output_iso,
            PathBuf::from("/var/lib/libvirt/images/fedora14x86_64-install.iso")
        );
        assert_eq!(
            paths.iso_contents,
            PathBuf::from("/var/lib/guest-installer/isocontent/fedora14x86_64")
        );
        assert_eq!(
            paths.original_floppy,
            PathBuf::from("/var/lib/guest-installer/floppies/fedora14x86_64.img")
        );
    }

    #[test]
    fn test_distinct_names_never_share_paths() {
        let a = GuestPaths::new(Path::new("/img"), Path::new("/state"), "rhel5i386");
        let b = GuestPaths::new(Path::new("/img"), Path::new("/state"), "rhel5x86_64");
        assert_ne!(a.disk_image, b.disk_image);
        assert_ne!(a.iso_contents, b.iso_contents);
        assert_ne!(a.lock_file, b.lock_file);
        assert_eq!(a.screenshot_dir, b.screenshot_dir);
    }
}
