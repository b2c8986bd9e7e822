use log::debug;
use phf::{phf_map, Map};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::{Read, Seek, SeekFrom},
};

use crate::errors::ImageError;

pub const SECTOR_SIZE: usize = 512;
pub const BOOT_SECTOR_SIGNATURE: &[u8; 2] = b"\x55\xAA";
pub const BOOT_SECTOR_SIGNATURE_OFFSET: usize = 510;

pub const PARTITION_TABLE_OFFSET: usize = 446;
pub const PARTITION_TABLE_ENTRIES: usize = 4;
pub const PARTITION_ENTRY_SIZE: usize = 16;

pub const BOOT_PARTITION_INDEX: usize = 1;

pub const ROOT_PARTITION_INDEX: usize = 2;

fn le_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[derive(Debug)]
pub struct BootSector {
    pub partitions: [PartitionEntry; PARTITION_TABLE_ENTRIES],
    pub signature: [u8; 2],
}

impl BootSector {
    pub fn new(data: &[u8; SECTOR_SIZE]) -> Self {
        let entry = |i: usize| {
            let start = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
            PartitionEntry::new(&data[start..start + PARTITION_ENTRY_SIZE])
        };

        Self {
            partitions: [entry(0), entry(1), entry(2), entry(3)],
            signature: [data[BOOT_SECTOR_SIGNATURE_OFFSET], data[BOOT_SECTOR_SIGNATURE_OFFSET + 1]],
        }
    }

    pub(crate) fn from_disk_image<R: Read + Seek>(reader: &mut R) -> Result<Self, ImageError> {
        let mut data = [0u8; SECTOR_SIZE];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut data)?;

        let boot_sector = Self::new(&data);
        if &boot_sector.signature != BOOT_SECTOR_SIGNATURE {
            return Err(ImageError::InvalidSignature(boot_sector.signature));
        }

        Ok(boot_sector)
    }

    pub(crate) fn validate(&self, disk_len: u64) -> Result<(), ImageError> {
        let disk_sectors = disk_len / SECTOR_SIZE as u64;

        for (i, partition) in self.partitions.iter().enumerate() {
            if !partition.is_populated() {
                continue;
            }

            if partition.sector_count == 0 {
                return Err(ImageError::InvalidPartitionTable(format!("partition {} has zero sectors", i + 1)));
            }

            if partition.lba_start == 0 {
                return Err(ImageError::InvalidPartitionTable(format!(
                    "partition {} starts at LBA 0 and covers the partition table",
                    i + 1
                )));
            }

            if partition.end_sector() > disk_sectors {
                return Err(ImageError::InvalidPartitionTable(format!(
                    "partition {} ends at sector {} but the image has {} sectors",
                    i + 1,
                    partition.end_sector(),
                    disk_sectors
                )));
            }

            for (j, other) in self.partitions.iter().enumerate().skip(i + 1) {
                if other.is_populated() && partition.overlaps(other) {
                    return Err(ImageError::InvalidPartitionTable(format!(
                        "partitions {} and {} overlap",
                        i + 1,
                        j + 1
                    )));
                }
            }
        }

        Ok(())
    }

    pub(crate) fn partition(&self, index: usize) -> Result<&PartitionEntry, ImageError> {
        let partition = match index {
            1..=PARTITION_TABLE_ENTRIES => &self.partitions[index - 1],
            _ => return Err(ImageError::PartitionIndexOutOfRange(index)),
        };

        if !partition.is_populated() {
            return Err(ImageError::PartitionIndexOutOfRange(index));
        }

        debug!("MBR partition {}: {}", index, partition.to_string().replace("\n", ", "));
        Ok(partition)
    }
}

#[derive(Debug, PartialEq)]
pub struct CHSPosition {
    pub cylinder: u16,
    pub head: u8,
    pub sector: u8,
}

impl CHSPosition {
    pub fn new(data: &[u8]) -> Self {
        Self {
            cylinder: (((data[1] & 0xc0) as u16) << 2) | data[2] as u16,
            head: data[0],
            sector: data[1] & 0x3f,
        }
    }
}

impl Display for CHSPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}:{}", self.cylinder, self.head, self.sector)
    }
}

// Only the types found on single-board computer images; anything else prints as "Unknown".
pub const MBR_PARTITION_TYPES: Map<u8, &'static str> = phf_map! {
    0x00u8 => "Empty",
    0x01u8 => "FAT12",
    0x04u8 => "FAT16 <32 MB",
    0x05u8 => "Extended",
    0x06u8 => "FAT16B",
    0x07u8 => "HPFS; NTFS; exFAT",
    0x0bu8 => "FAT32",
    0x0cu8 => "FAT32 LBA",
    0x0eu8 => "FAT16 LBA",
    0x0fu8 => "Extended LBA",
    0x82u8 => "Linux swap; Solaris",
    0x83u8 => "Linux",
    0x85u8 => "Linux extended",
    0x8eu8 => "Linux LVM",
    0xeeu8 => "GPT",
    0xefu8 => "EFI system",
};

#[derive(Debug)]
pub struct PartitionEntry {
    pub bootable: bool,
    pub chs_start: CHSPosition,
    pub partition_type: u8,
    pub chs_end: CHSPosition,
    pub lba_start: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    pub fn new(data: &[u8]) -> Self {
        Self {
            bootable: data[0] & 0x80 != 0,
            chs_start: CHSPosition::new(&data[1..4]),
            partition_type: data[4],
            chs_end: CHSPosition::new(&data[5..8]),
            lba_start: le_u32(data, 8),
            sector_count: le_u32(data, 12),
        }
    }

    pub fn is_populated(&self) -> bool {
        self.partition_type > 0 || self.lba_start > 0 || self.sector_count > 0
    }

    pub fn type_name(&self) -> &'static str {
        MBR_PARTITION_TYPES.get(&self.partition_type).copied().unwrap_or("Unknown")
    }

    pub fn end_sector(&self) -> u64 {
        self.lba_start as u64 + self.sector_count as u64
    }

    pub fn start_offset(&self) -> u64 {
        self.lba_start as u64 * SECTOR_SIZE as u64
    }

    pub fn byte_len(&self) -> u64 {
        self.sector_count as u64 * SECTOR_SIZE as u64
    }

    fn overlaps(&self, other: &PartitionEntry) -> bool {
        (self.lba_start as u64) < other.end_sector() && (other.lba_start as u64) < self.end_sector()
    }
}

impl Display for PartitionEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "Partition Type: 0x{:02x} ({})\nBootable: {}\nStart CHS: {}\nEnd CHS: {}\n\
            LBA Start: {} (0x{:x})\nSector Count: {} (0x{:x})",
            self.partition_type,
            self.type_name(),
            self.bootable,
            self.chs_start,
            self.chs_end,
            self.lba_start,
            self.lba_start,
            self.sector_count,
            self.sector_count
        )
    }
}

#[cfg(test)]
pub(crate) fn test_image(len: usize, partitions: &[(u8, u32, u32)]) -> Vec<u8> {
    let mut data = vec![0u8; len];
    for (i, (partition_type, lba_start, sector_count)) in partitions.iter().enumerate() {
        let entry = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
        data[entry + 4] = *partition_type;
        data[entry + 8..entry + 12].copy_from_slice(&lba_start.to_le_bytes());
        data[entry + 12..entry + 16].copy_from_slice(&sector_count.to_le_bytes());
    }
    data[BOOT_SECTOR_SIGNATURE_OFFSET..SECTOR_SIZE].copy_from_slice(BOOT_SECTOR_SIGNATURE);
    data
}
