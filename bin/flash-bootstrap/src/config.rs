use getopts::{Matches, Options};
use std::{env, ffi::OsString, path::PathBuf};

use crate::catalog::{board_help, manufacturer_help, Distro, DEFAULT_BOARD, DEFAULT_MANUFACTURER};

pub const DEFAULT_BOOT_SCRIPT: &str = "firstboot.sh";
pub const DEFAULT_COUNTRY: &str = "US";
const CACHE_DIR_NAME: &str = "flash-bootstrap";

#[derive(Debug, Clone, PartialEq)]
pub struct WifiConfig {
    pub country: String,
    pub ssid: String,
    pub psk: String,
}

#[derive(Debug)]
pub struct Config {
    pub distro: Distro,
    pub sdcard: String,
    pub boot_script: Option<PathBuf>,
    pub boot_args: Vec<String>,
    pub wifi: Option<WifiConfig>,
    pub image: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub verbose: bool,
}

pub fn options() -> Options {
    let mut opts = Options::new();
    opts.optflag("h", "help", "show this usage information");
    opts.optflag("v", "verbose", "log verbosely");
    opts.optopt("", "manufacturer", &manufacturer_help(), "NAME");
    opts.optopt("", "board", &board_help(), "NAME");
    opts.optopt("", "sdcard", "path to the SDCard device, e.g. /dev/sdb or /dev/mmcblk0", "PATH");
    opts.optopt("", "boot-script", "script to execute on first boot; empty to skip (default firstboot.sh)", "PATH");
    opts.optopt("", "boot-args", "extra arguments passed to the first boot script", "ARGS");
    opts.optopt("", "wifi-country", "country setting for Wifi; affects usable bands", "CC");
    opts.optopt("", "wifi-ssid", "wifi ssid", "SSID");
    opts.optopt("", "wifi-psk", "wifi passphrase, or the 64 hex digit raw key", "PSK");
    opts.optopt("", "image", "use this base image instead of the image cache", "PATH");
    opts.optopt("", "cache-dir", "directory holding cached base images", "DIR");
    opts
}

impl Config {
    pub fn from_matches(matches: &Matches) -> Result<Self, String> {
        let manufacturer = matches.opt_str("manufacturer").unwrap_or_else(|| DEFAULT_MANUFACTURER.to_string());
        let board = matches.opt_str("board").unwrap_or_else(|| DEFAULT_BOARD.to_string());
        let distro = Distro::lookup(&manufacturer, &board)?;

        let sdcard = match matches.opt_str("sdcard") {
            Some(s) if !s.is_empty() => s,
            _ => return Err("--sdcard is required".to_string()),
        };

        let boot_script = match matches.opt_str("boot-script") {
            Some(s) if s.is_empty() => None,
            Some(s) => Some(PathBuf::from(s)),
            None => Some(PathBuf::from(DEFAULT_BOOT_SCRIPT)),
        };

        let boot_args = matches
            .opt_str("boot-args")
            .map(|a| a.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        // An empty value counts as not given.
        let ssid = matches.opt_str("wifi-ssid").filter(|s| !s.is_empty());
        let psk = matches.opt_str("wifi-psk").filter(|s| !s.is_empty());
        let wifi = match (ssid, psk) {
            (Some(ssid), Some(psk)) => Some(WifiConfig {
                country: matches
                    .opt_str("wifi-country")
                    .unwrap_or_else(|| default_country(env::var("LANG").ok().as_deref())),
                ssid,
                psk,
            }),
            (None, None) => None,
            _ => return Err("use both --wifi-ssid and --wifi-psk".to_string()),
        };

        let cache_dir = match matches.opt_str("cache-dir") {
            Some(dir) => PathBuf::from(dir),
            None => default_cache_dir(env::var_os("XDG_CACHE_HOME"), env::var_os("HOME")),
        };

        Ok(Self {
            distro,
            sdcard,
            boot_script,
            boot_args,
            wifi,
            image: matches.opt_str("image").map(PathBuf::from),
            cache_dir,
            verbose: matches.opt_present("v"),
        })
    }
}

pub fn default_country(lang: Option<&str>) -> String {
    lang.and_then(|l| l.split('.').next())
        .and_then(|l| l.split('_').nth(1))
        .filter(|cc| cc.len() == 2 && cc.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|cc| cc.to_ascii_uppercase())
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string())
}

pub fn default_cache_dir(xdg_cache_home: Option<OsString>, home: Option<OsString>) -> PathBuf {
    match (xdg_cache_home.filter(|d| !d.is_empty()), home.filter(|d| !d.is_empty())) {
        (Some(cache), _) => PathBuf::from(cache).join(CACHE_DIR_NAME),
        (None, Some(home)) => PathBuf::from(home).join(".cache").join(CACHE_DIR_NAME),
        (None, None) => env::temp_dir().join(CACHE_DIR_NAME),
    }
}
