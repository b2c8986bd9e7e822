use log::{debug, info};
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use crate::catalog::Distro;

pub trait ImageSource {
    fn fetch(&self, distro: &Distro) -> Result<PathBuf, Box<dyn Error>>;
}

pub trait Media {
    fn flash(&self, image: &Path, device: &str) -> Result<(), Box<dyn Error>>;

    fn unmount(&self, device: &str) -> Result<(), Box<dyn Error>>;

    fn mount(&self, device: &str, partition: usize) -> Result<PathBuf, Box<dyn Error>>;
}

#[derive(Debug)]
pub struct LocalImage {
    pub path: PathBuf,
}

impl ImageSource for LocalImage {
    fn fetch(&self, _distro: &Distro) -> Result<PathBuf, Box<dyn Error>> {
        if !self.path.is_file() {
            return Err(format!("Base image {} does not exist", self.path.display()).into());
        }
        Ok(self.path.clone())
    }
}

#[derive(Debug)]
pub struct ImageCache {
    pub dir: PathBuf,
}

impl ImageSource for ImageCache {
    fn fetch(&self, distro: &Distro) -> Result<PathBuf, Box<dyn Error>> {
        let path = self.dir.join(distro.image_file());
        if !path.is_file() {
            return Err(format!(
                "{} is not cached; download the image for {} and save it as {}, or pass --image",
                distro.image_file(),
                distro,
                path.display()
            )
            .into());
        }

        info!("Using cached image {}", path.display());
        Ok(path)
    }
}

#[derive(Debug, Default)]
pub struct HostMedia;

impl Media for HostMedia {
    fn flash(&self, image: &Path, device: &str) -> Result<(), Box<dyn Error>> {
        let if_arg = format!("if={}", image.display());
        let of_arg = format!("of={}", device);
        let args = ["dd", if_arg.as_str(), of_arg.as_str(), "bs=4M", "conv=fsync", "status=progress"];
        debug!("Running sudo {}", args.join(" "));

        let status = Command::new("sudo").args(&args).status()?;
        if !status.success() {
            return Err(format!("Flashing {} to {} failed: {}", image.display(), device, status).into());
        }
        Ok(())
    }

    fn unmount(&self, device: &str) -> Result<(), Box<dyn Error>> {
        let mounts = fs::read_to_string("/proc/mounts")?;
        for partition in mounted_partitions(&mounts, device) {
            run_command("udisksctl", &["unmount", "-f", "-b", &partition])?;
            info!("Unmounted {}", partition);
        }
        Ok(())
    }

    fn mount(&self, device: &str, partition: usize) -> Result<PathBuf, Box<dyn Error>> {
        let partition = partition_path(device, partition);
        let stdout = run_command("udisksctl", &["mount", "-b", &partition])?;
        match parse_mount_output(&stdout) {
            Some(path) => Ok(path),
            None => Err(format!("Unable to find where {} was mounted in {:?}", partition, stdout.trim()).into()),
        }
    }
}

fn run_command(program: &str, args: &[&str]) -> Result<String, Box<dyn Error>> {
    debug!("Running {} {}", program, args.join(" "));
    let output = Command::new(program).args(args).output()?;
    if !output.status.success() {
        return Err(format!(
            "{} {} failed: {}: {}",
            program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn partition_path(device: &str, partition: usize) -> String {
    match device.chars().last() {
        Some(c) if c.is_ascii_digit() => format!("{}p{}", device, partition),
        _ => format!("{}{}", device, partition),
    }
}

pub fn mounted_partitions(mounts: &str, device: &str) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for source in mounts.lines().filter_map(|line| line.split_whitespace().next()) {
        let suffix = match source.strip_prefix(device) {
            Some(s) => s.strip_prefix('p').unwrap_or(s),
            None => continue,
        };
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) && !result.iter().any(|r| r == source) {
            result.push(source.to_string());
        }
    }
    result
}

pub fn parse_mount_output(stdout: &str) -> Option<PathBuf> {
    let line = stdout.lines().find(|l| l.starts_with("Mounted "))?;
    let (_, path) = line.split_once(" at ")?;
    let path = path.trim().trim_end_matches('.');
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}
