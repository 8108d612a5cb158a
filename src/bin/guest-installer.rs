use std::fs::{self, File};
use std::net::IpAddr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use guest_installer::error::BestEffort;
use guest_installer::process::Cmd;
use guest_installer::{
    disk, preflight, Arch, Config, DomainBuilder, FloppyMedia, GuestDiskInspector,
    GuestIdentity, GuestNetworkWaiter, GuestPaths, GuestfishBackend, InstallController,
    InstallMedia, InstallSettings, Iptables, MediaFetcher, OpticalMedia, VirshControlPlane,
    VncScreenshot,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PACKAGE_QUERY: &str = "rpm -qa";
const ISO_LABEL_MAX: usize = 32;

fn usage() -> &'static str {
    "Usage:\n  guest-installer install <cdrom|floppy> <distro> <update> <arch> <media-url> [customizer]\n  guest-installer inspect <disk-image> [package-query]\n  guest-installer cleanup <distro> <update> <arch>\n\nThe customizer is run as: <customizer> <scratch-dir> <install-medium> <host-ip> <port>"
}

#[derive(Clone, Copy)]
enum MediaKind {
    Cdrom,
    Floppy,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd, kind, distro, update, arch, url] if cmd == "install" => {
            install(parse_kind(kind)?, distro, update, arch, url, None)
        }
        [cmd, kind, distro, update, arch, url, customizer] if cmd == "install" => {
            install(parse_kind(kind)?, distro, update, arch, url, Some(customizer))
        }
        [cmd, disk] if cmd == "inspect" => inspect(Path::new(disk), DEFAULT_PACKAGE_QUERY),
        [cmd, disk, query] if cmd == "inspect" => inspect(Path::new(disk), query),
        [cmd, distro, update, arch] if cmd == "cleanup" => cleanup(distro, update, arch),
        _ => bail!(usage()),
    }
}

fn parse_kind(value: &str) -> Result<MediaKind> {
    match value {
        "cdrom" => Ok(MediaKind::Cdrom),
        "floppy" => Ok(MediaKind::Floppy),
        other => bail!("unknown media kind '{}'\n\n{}", other, usage()),
    }
}

fn load_config() -> Result<Config> {
    match Config::default_path() {
        Some(path) => Config::load(&path)
            .with_context(|| format!("loading config from '{}'", path.display())),
        None => Ok(Config::default()),
    }
}

fn identity(config: &Config, distro: &str, update: &str, arch: &str) -> Result<GuestIdentity> {
    let arch: Arch = arch.parse()?;
    Ok(GuestIdentity::generate(
        distro,
        update,
        arch,
        config.mac_prefix()?,
        &mut rand::rng(),
    ))
}

/// Hold an exclusive lock on the guest's session file for the whole run.
fn lock_session(paths: &GuestPaths) -> Result<File> {
    if let Some(parent) = paths.lock_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating lock directory '{}'", parent.display()))?;
    }
    let file = File::create(&paths.lock_file)
        .with_context(|| format!("opening lock file '{}'", paths.lock_file.display()))?;
    if file.try_lock_exclusive().is_err() {
        bail!(
            "another session holds '{}'; refusing to run concurrently",
            paths.lock_file.display()
        );
    }
    Ok(file)
}

fn media_for(kind: MediaKind, paths: &GuestPaths, name: &str) -> Box<dyn InstallMedia> {
    match kind {
        MediaKind::Cdrom => {
            let label: String = name.to_uppercase().chars().take(ISO_LABEL_MAX).collect();
            Box::new(OpticalMedia::new(paths, label))
        }
        MediaKind::Floppy => Box::new(FloppyMedia::new(paths)),
    }
}

fn install(
    kind: MediaKind,
    distro: &str,
    update: &str,
    arch: &str,
    url: &str,
    customizer: Option<&String>,
) -> Result<()> {
    let config = load_config()?;
    preflight::check_host_tools()?;
    if let Some(customizer) = customizer {
        if !preflight::command_exists(customizer) && !Path::new(customizer).is_file() {
            bail!("customizer '{}' not found", customizer);
        }
    }

    let identity = identity(&config, distro, update, arch)?;
    let name = identity.name().to_string();
    let paths = config.guest_paths(&name);
    let _lock = lock_session(&paths)?;

    let control = VirshControlPlane::new(config.tools.connect_uri.clone());
    let builder = DomainBuilder::new(
        &control,
        identity,
        config.domain_config()?,
        &paths.disk_image,
        &config.network.bridge,
    )
    .context("resolving the guest network")?;
    builder.cleanup_old_guest();

    let media = media_for(kind, &paths, &name);
    let fetcher = MediaFetcher::new(config.connect_timeout())?;
    media
        .acquire(&fetcher, url)
        .with_context(|| format!("fetching install media from {url}"))?;
    media.remaster().context("preparing install media")?;

    let host_ip = IpAddr::V4(builder.host_bridge_ip());
    let port = config.pick_listen_port(&mut rand::rng());
    if let Some(customizer) = customizer {
        Cmd::new(customizer)
            .arg_path(media.scratch_dir())
            .arg_path(&media.install_medium().path)
            .arg(host_ip.to_string())
            .arg(port.to_string())
            .error_msg("customizer failed")
            .run()?;
    }
    media.finalize().context("building install medium")?;

    disk::create_disk_image(&paths.disk_image, config.install.disk_size_gib)?;

    let screenshot = VncScreenshot::new(config.tools.screenshot.clone());
    let controller = InstallController::new(
        &control,
        &builder,
        &screenshot,
        InstallSettings {
            poll_budget: config.install.poll_budget,
            poll_interval: config.poll_interval(),
            screenshot_dir: paths.screenshot_dir.clone(),
        },
    );

    let installed = controller.install(media.as_ref());
    media.cleanup_install().best_effort("removing install medium");
    media.cleanup_scratch().best_effort("removing media scratch tree");
    let report = installed.with_context(|| format!("installing {name}"))?;
    tracing::info!(guest = %report.name, polls = report.polls, "install complete");

    // Listen before booting so an early connection is not refused.
    let firewall = Iptables::default();
    let listener = GuestNetworkWaiter::new(&firewall).listen(host_ip, port)?;
    controller.boot_installed()?;
    let guest_ip = listener
        .wait(config.boot_timeout())
        .with_context(|| format!("waiting for {name} to boot"))?;

    println!("{guest_ip}");
    Ok(())
}

fn inspect(disk: &Path, query: &str) -> Result<()> {
    let config = load_config()?;
    preflight::check_required_tools(preflight::INSPECT_TOOLS)?;

    let control = VirshControlPlane::new(config.tools.connect_uri.clone());
    let backend = GuestfishBackend::default();
    let mut handle = GuestDiskInspector::new(&control, &backend)
        .open(disk)
        .with_context(|| format!("inspecting '{}'", disk.display()))?;

    let manifest = handle.package_manifest(query)?;
    handle.close()?;

    println!("{manifest}");
    Ok(())
}

fn cleanup(distro: &str, update: &str, arch: &str) -> Result<()> {
    let config = load_config()?;
    let identity = identity(&config, distro, update, arch)?;
    let name = identity.name().to_string();
    let paths = config.guest_paths(&name);
    let _lock = lock_session(&paths)?;

    let control = VirshControlPlane::new(config.tools.connect_uri.clone());
    let builder = DomainBuilder::new(
        &control,
        identity,
        config.domain_config()?,
        &paths.disk_image,
        &config.network.bridge,
    )?;
    builder.cleanup_old_guest();

    for kind in [MediaKind::Cdrom, MediaKind::Floppy] {
        let media = media_for(kind, &paths, &name);
        media.cleanup_install().best_effort("removing install medium");
        media.cleanup_scratch().best_effort("removing media scratch tree");
    }
    Ok(())
}
