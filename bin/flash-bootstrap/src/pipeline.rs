use log::{debug, error, info};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use crate::{
    boot::setup_first_boot,
    bootsector::{BOOT_PARTITION_INDEX, ROOT_PARTITION_INDEX},
    config::Config,
    media::{ImageSource, Media},
    patcher::{patch_image_file, rc_local_payload, FIRST_BOOT_LOG, RC_LOCAL_ANCHOR},
};

#[derive(Debug, PartialEq)]
pub enum Stage {
    Idle,
    Fetching,
    Duplicating { base_image: PathBuf },
    PatchingRoot { working_image: PathBuf },
    Flashing { working_image: PathBuf },
    UnmountingPreMount,
    MountingBoot,
    PatchingBoot { boot_dir: PathBuf },
    UnmountingFinal,
    Done,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching base image",
            Self::Duplicating { .. } => "duplicating base image",
            Self::PatchingRoot { .. } => "patching root partition",
            Self::Flashing { .. } => "flashing",
            Self::UnmountingPreMount => "unmounting before remount",
            Self::MountingBoot => "mounting boot partition",
            Self::PatchingBoot { .. } => "patching boot partition",
            Self::UnmountingFinal => "unmounting",
            Self::Done => "done",
        })
    }
}

pub fn working_image_path(base_image: &Path) -> PathBuf {
    let stem = base_image.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match base_image.extension() {
        Some(ext) => format!("{}-mod.{}", stem, ext.to_string_lossy()),
        None => format!("{}-mod", stem),
    };
    base_image.with_file_name(name)
}

// The working copy is always created fresh and writable, whatever the base image's permissions are.
fn duplicate_image(base_image: &Path, working_image: &Path) -> io::Result<u64> {
    let mut src = File::open(base_image)?;
    match fs::remove_file(working_image) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => (),
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    let mut dst = options.open(working_image)?;
    io::copy(&mut src, &mut dst)
}

pub struct Pipeline<'a> {
    config: &'a Config,
    source: &'a dyn ImageSource,
    media: &'a dyn Media,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, source: &'a dyn ImageSource, media: &'a dyn Media) -> Self {
        Self { config, source, media }
    }

    pub fn run(&self) -> Result<(), Box<dyn Error>> {
        let mut stage = Stage::Idle;
        while stage != Stage::Done {
            let current = stage.to_string();
            stage = match self.step(stage) {
                Ok(next) => next,
                Err(e) => {
                    error!("Failed while {}: {}", current, e);
                    return Err(e);
                }
            };
            debug!("{} -> {}", current, stage);
        }

        self.print_next_steps();
        Ok(())
    }

    fn step(&self, stage: Stage) -> Result<Stage, Box<dyn Error>> {
        let config = self.config;
        let next = match stage {
            Stage::Idle => Stage::Fetching,

            Stage::Fetching => Stage::Duplicating { base_image: self.source.fetch(&config.distro)? },

            Stage::Duplicating { base_image } => {
                let working_image = working_image_path(&base_image);
                info!("Copying {} to {}", base_image.display(), working_image.display());
                duplicate_image(&base_image, &working_image).map_err(|e| {
                    format!("Unable to copy {} to {}: {}", base_image.display(), working_image.display(), e)
                })?;
                Stage::PatchingRoot { working_image }
            }

            Stage::PatchingRoot { working_image } => {
                let payload = rc_local_payload(&config.boot_args);
                patch_image_file(&working_image, ROOT_PARTITION_INDEX, RC_LOCAL_ANCHOR, payload.as_bytes())?;
                Stage::Flashing { working_image }
            }

            Stage::Flashing { working_image } => {
                println!("Warning! This will blow up everything in {}\n", config.sdcard);
                println!("This script has minimal use of 'sudo' for 'dd' to format the SDCard\n");
                self.media.flash(&working_image, &config.sdcard)?;
                Stage::UnmountingPreMount
            }

            // The host may still hold mounts from before the partition table changed.
            Stage::UnmountingPreMount => {
                self.media.unmount(&config.sdcard)?;
                Stage::MountingBoot
            }

            Stage::MountingBoot => {
                let boot_dir = self.media.mount(&config.sdcard, BOOT_PARTITION_INDEX)?;
                if boot_dir.as_os_str().is_empty() {
                    return Err("failed to mount /boot".into());
                }
                info!("  /boot mounted as {}", boot_dir.display());
                Stage::PatchingBoot { boot_dir }
            }

            Stage::PatchingBoot { boot_dir } => {
                setup_first_boot(&boot_dir, config.boot_script.as_deref(), config.wifi.as_ref())?;
                Stage::UnmountingFinal
            }

            Stage::UnmountingFinal => {
                self.media.unmount(&config.sdcard)?;
                Stage::Done
            }

            Stage::Done => Stage::Done,
        };

        Ok(next)
    }

    fn print_next_steps(&self) {
        let distro = &self.config.distro;
        println!("\nYou can now remove the SDCard safely and boot your micro computer");
        println!("Connect with:");
        println!("  ssh -o StrictHostKeyChecking=no {}@{}\n", distro.default_user(), distro.default_hostname());
        println!("You can follow the update process by either:");
        println!("- connecting a monitor");
        println!("- connecting to the serial port");
        println!("- ssh'ing into the device and running:");
        println!("    tail -f {}", FIRST_BOOT_LOG);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootsector::{test_image, SECTOR_SIZE},
        catalog::{Distro, DEFAULT_BOARD, DEFAULT_MANUFACTURER},
        config::WifiConfig,
        errors::ImageError,
        media::LocalImage,
    };
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct FakeMedia {
        boot_dir: PathBuf,
        calls: RefCell<Vec<String>>,
    }

    impl Media for FakeMedia {
        fn flash(&self, image: &Path, device: &str) -> Result<(), Box<dyn Error>> {
            self.calls.borrow_mut().push("flash".to_string());
            fs::copy(image, device)?;
            Ok(())
        }

        fn unmount(&self, _device: &str) -> Result<(), Box<dyn Error>> {
            self.calls.borrow_mut().push("unmount".to_string());
            Ok(())
        }

        fn mount(&self, _device: &str, partition: usize) -> Result<PathBuf, Box<dyn Error>> {
            self.calls.borrow_mut().push(format!("mount {}", partition));
            Ok(self.boot_dir.clone())
        }
    }

    struct Fixture {
        _dir: TempDir,
        base_image: PathBuf,
        config: Config,
        media: FakeMedia,
    }

    impl Fixture {
        fn new(image: &[u8]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let boot_dir = dir.path().join("boot");
            fs::create_dir(&boot_dir).unwrap();

            let base_image = dir.path().join("base.img");
            fs::write(&base_image, image).unwrap();
            let script = dir.path().join("setup.sh");
            fs::write(&script, "#!/bin/sh\n").unwrap();

            let config = Config {
                distro: Distro::lookup(DEFAULT_MANUFACTURER, DEFAULT_BOARD).unwrap(),
                sdcard: dir.path().join("sdcard").to_string_lossy().into_owned(),
                boot_script: Some(script),
                boot_args: Vec::new(),
                wifi: Some(WifiConfig { country: "US".into(), ssid: "lab".into(), psk: "hunter22".into() }),
                image: Some(base_image.clone()),
                cache_dir: dir.path().to_path_buf(),
                verbose: false,
            };

            Self { _dir: dir, base_image, config, media: FakeMedia { boot_dir, calls: RefCell::new(Vec::new()) } }
        }

        fn run(&self) -> Result<(), Box<dyn Error>> {
            let source = LocalImage { path: self.base_image.clone() };
            Pipeline::new(&self.config, &source, &self.media).run()
        }

        fn calls(&self) -> Vec<String> {
            self.media.calls.borrow().clone()
        }
    }

    fn image_with_anchor(root_sectors: u32) -> Vec<u8> {
        let mut data = test_image(128 * SECTOR_SIZE, &[(0x0c, 8, 24), (0x83, 32, root_sectors)]);
        let at = 40 * SECTOR_SIZE;
        data[at..at + RC_LOCAL_ANCHOR.len()].copy_from_slice(RC_LOCAL_ANCHOR);
        data
    }

    #[test]
    fn working_image_names() {
        assert_eq!(working_image_path(Path::new("/c/raspios.img")), PathBuf::from("/c/raspios-mod.img"));
        assert_eq!(working_image_path(Path::new("/c/raspios")), PathBuf::from("/c/raspios-mod"));
    }

    #[test]
    fn provisions_device() {
        let original = image_with_anchor(96);
        let fixture = Fixture::new(&original);
        fixture.run().unwrap();

        assert_eq!(fixture.calls(), vec!["flash", "unmount", "mount 1", "unmount"]);
        assert_eq!(fs::read(&fixture.base_image).unwrap(), original);

        let flashed = fs::read(&fixture.config.sdcard).unwrap();
        let sector = 40 * SECTOR_SIZE..41 * SECTOR_SIZE;
        assert!(flashed[sector.clone()].starts_with(rc_local_payload(&[]).as_bytes()));
        assert_eq!(&flashed[..sector.start], &original[..sector.start]);
        assert_eq!(&flashed[sector.end..], &original[sector.end..]);

        let boot_dir = &fixture.media.boot_dir;
        assert_eq!(fs::read_to_string(boot_dir.join("firstboot.sh")).unwrap(), "#!/bin/sh\n");
        assert!(fs::read_to_string(boot_dir.join("wpa_supplicant.conf")).unwrap().contains("ssid=\"lab\""));
    }

    fn set_readonly(path: &Path) {
        let mut permissions = fs::metadata(path).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(path, permissions).unwrap();
    }

    #[test]
    fn read_only_base_image_gives_writable_working_copy() {
        let original = image_with_anchor(96);
        let fixture = Fixture::new(&original);
        set_readonly(&fixture.base_image);

        // A read-only copy left behind by an earlier run is replaced.
        let working_image = working_image_path(&fixture.base_image);
        fs::write(&working_image, b"stale").unwrap();
        set_readonly(&working_image);

        fixture.run().unwrap();

        assert!(!fs::metadata(&working_image).unwrap().permissions().readonly());
        assert!(fs::metadata(&fixture.base_image).unwrap().permissions().readonly());
        assert_eq!(fs::read(&fixture.base_image).unwrap(), original);

        let patched = fs::read(&working_image).unwrap();
        assert_eq!(patched.len(), original.len());
        assert!(patched[40 * SECTOR_SIZE..].starts_with(rc_local_payload(&[]).as_bytes()));
        assert_eq!(fs::read(&fixture.config.sdcard).unwrap(), patched);

        // Running again over the now writable copy works the same way.
        fixture.run().unwrap();
        assert_eq!(fs::read(&working_image).unwrap(), patched);
    }

    #[test]
    fn invalid_partition_table_never_flashes() {
        // Root partition runs past the end of the 128 sector image.
        let fixture = Fixture::new(&image_with_anchor(200));
        let err = fixture.run().unwrap_err();

        assert!(matches!(err.downcast_ref::<ImageError>(), Some(ImageError::InvalidPartitionTable(_))));
        assert!(fixture.calls().is_empty());
        assert!(!Path::new(&fixture.config.sdcard).exists());
    }

    #[test]
    fn missing_anchor_never_flashes() {
        let fixture = Fixture::new(&test_image(128 * SECTOR_SIZE, &[(0x0c, 8, 24), (0x83, 32, 96)]));
        let err = fixture.run().unwrap_err();

        assert!(matches!(err.downcast_ref::<ImageError>(), Some(ImageError::AnchorNotFound { .. })));
        assert!(fixture.calls().is_empty());
    }

    #[test]
    fn empty_mount_path_stops_the_run() {
        let mut fixture = Fixture::new(&image_with_anchor(96));
        fixture.media.boot_dir = PathBuf::new();
        let err = fixture.run().unwrap_err();

        assert_eq!(err.to_string(), "failed to mount /boot");
        assert_eq!(fixture.calls(), vec!["flash", "unmount", "mount 1"]);
    }

    #[test]
    fn missing_base_image_stops_at_fetch() {
        let fixture = Fixture::new(&image_with_anchor(96));
        fs::remove_file(&fixture.base_image).unwrap();

        assert!(fixture.run().is_err());
        assert!(fixture.calls().is_empty());
    }
}
