use log::info;
use std::{error::Error, fs, path::Path};

use crate::config::WifiConfig;

pub const FIRST_BOOT_SCRIPT_NAME: &str = "firstboot.sh";
pub const WPA_SUPPLICANT_NAME: &str = "wpa_supplicant.conf";

pub fn wpa_supplicant_conf(wifi: &WifiConfig) -> String {
    // 64 hex digits is a raw key and must not be quoted; anything else is a passphrase.
    let psk = match hex::decode(&wifi.psk) {
        Ok(key) if key.len() == 32 => wifi.psk.clone(),
        _ => format!("\"{}\"", wifi.psk),
    };

    format!(
        "country={}\n\
         ctrl_interface=DIR=/var/run/wpa_supplicant GROUP=netdev\n\
         update_config=1\n\
         \n\
         network={{\n\
         \tssid=\"{}\"\n\
         \tpsk={}\n\
         \tscan_ssid=1\n\
         \tkey_mgmt=WPA-PSK\n\
         }}\n",
        wifi.country, wifi.ssid, psk
    )
}

pub fn setup_first_boot(
    boot_dir: &Path,
    boot_script: Option<&Path>,
    wifi: Option<&WifiConfig>,
) -> Result<(), Box<dyn Error>> {
    println!("- First boot setup script");

    if let Some(script) = boot_script {
        let dest = boot_dir.join(FIRST_BOOT_SCRIPT_NAME);
        fs::copy(script, &dest)
            .map_err(|e| format!("Unable to copy {} to {}: {}", script.display(), dest.display(), e))?;
        set_mode(&dest, 0o755)?;
        info!("Copied {} to {}", script.display(), dest.display());
    }

    if let Some(wifi) = wifi {
        let dest = boot_dir.join(WPA_SUPPLICANT_NAME);
        fs::write(&dest, wpa_supplicant_conf(wifi))?;
        set_mode(&dest, 0o644)?;
        info!("Wrote Wifi settings for {} to {}", wifi.ssid, dest.display());
    }

    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

// FAT has no permission bits to speak of.
#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
