use log::{debug, info};
use std::{
    io::{Read, Seek, Write},
    path::Path,
};

use crate::{
    bootsector::BootSector,
    errors::ImageError,
    window::{DiskImage, PartitionWindow},
};

// Start of /etc/rc.local as shipped by Debian derived distributions.
pub const RC_LOCAL_ANCHOR: &[u8] = b"#!/bin/sh -e\n#\n# rc.local\n#\n\
    # This script is executed at the end of each multiuser runlevel.\n\
    # Make sure that the script will \"exit 0\" on success or any other\n\
    # value on error.\n#\n\
    # In order to enable or disable this script just change the execution\n\
    # bits.\n#\n\
    # By default this script does nothing.\n";

pub const FIRST_BOOT_LOG: &str = "/var/log/firstboot.log";

pub fn rc_local_payload(boot_args: &[String]) -> String {
    let args: String = boot_args.iter().map(|a| format!(" {}", a)).collect();
    format!(
        "#!/bin/sh -e\nL={};if [ ! -f $L ];then /boot/firstboot.sh{} 2>&1|tee $L;fi\n#",
        FIRST_BOOT_LOG, args
    )
}

/// Finds the first sector of `window` that starts with `anchor` and overwrites the start of that sector with
/// `replacement`. Returns the sector's offset within the window. An anchor that straddles two sectors is never found.
pub(crate) fn patch<D: Read + Write + Seek>(
    window: &mut PartitionWindow<'_, D>,
    anchor: &[u8],
    replacement: &[u8],
) -> Result<u64, ImageError> {
    let sector_size = window.sector_size();
    if anchor.is_empty() {
        return Err(ImageError::EmptyAnchor);
    }
    if anchor.len() > sector_size {
        return Err(ImageError::PayloadTooLarge { len: anchor.len(), sector_size });
    }
    if replacement.len() > sector_size {
        return Err(ImageError::PayloadTooLarge { len: replacement.len(), sector_size });
    }

    let mut buf = vec![0u8; sector_size];
    let mut offset = 0u64;
    let found = loop {
        if offset + sector_size as u64 > window.len() {
            break None;
        }

        window.read_at(&mut buf, offset)?;
        if &buf[..anchor.len()] == anchor {
            break Some(offset);
        }

        offset += sector_size as u64;
    };

    let offset = match found {
        Some(offset) => offset,
        None => return Err(ImageError::AnchorNotFound { scanned: offset }),
    };
    info!("found /etc/rc.local at offset {}", offset);

    buf[..replacement.len()].copy_from_slice(replacement);
    debug!("Writing /etc/rc.local:\n{}", String::from_utf8_lossy(&buf));
    window.write_at(&buf, offset)?;

    Ok(offset)
}

pub(crate) fn patch_image<D: Read + Write + Seek>(
    image: &mut DiskImage<D>,
    partition_index: usize,
    anchor: &[u8],
    replacement: &[u8],
) -> Result<u64, ImageError> {
    let boot_sector = BootSector::from_disk_image(image.inner_mut())?;
    boot_sector.validate(image.len())?;
    let partition = boot_sector.partition(partition_index)?;

    let partition_offset = partition.start_offset();
    let mut window = image.partition_window(partition);
    let offset = patch(&mut window, anchor, replacement)?;
    debug!("Patched sector at image offset {}", partition_offset + offset);

    Ok(offset)
}

pub(crate) fn patch_image_file<P: AsRef<Path>>(
    path: P,
    partition_index: usize,
    anchor: &[u8],
    replacement: &[u8],
) -> Result<u64, ImageError> {
    println!("- Modifying image {}", path.as_ref().display());
    let mut image = DiskImage::open(path)?;
    let offset = patch_image(&mut image, partition_index, anchor, replacement)?;
    image.close()?;
    Ok(offset)
}
